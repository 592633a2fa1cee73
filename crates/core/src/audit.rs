use serde_json::json;
use std::collections::HashMap;
use types::{
    ClassroomId, CourseId, Dataset, ScheduledClass, StudentId, TeacherId, TimeblockId, Violation,
};

use crate::config::SchedulerConfig;

/// Checks a finished schedule against the hard rules: no shared room or
/// teacher per timeblock, one class per student per timeblock, capacity.
pub fn audit_schedule(
    data: &Dataset,
    config: &SchedulerConfig,
    classes: &[ScheduledClass],
) -> Vec<Violation> {
    let mut out = Vec::new();

    let mut rooms: HashMap<(ClassroomId, TimeblockId), Vec<usize>> = HashMap::new();
    let mut teachers: HashMap<(TeacherId, TimeblockId), Vec<usize>> = HashMap::new();
    let mut seats: HashMap<(StudentId, TimeblockId), Vec<usize>> = HashMap::new();
    for (i, c) in classes.iter().enumerate() {
        rooms.entry((c.classroom_id, c.timeblock_id)).or_default().push(i);
        teachers.entry((c.teacher_id, c.timeblock_id)).or_default().push(i);
        for s in &c.students {
            seats.entry((*s, c.timeblock_id)).or_default().push(i);
        }
    }

    let mut room_rows: Vec<_> = rooms.into_iter().filter(|(_, v)| v.len() > 1).collect();
    room_rows.sort();
    for ((room, tb), idx) in room_rows {
        out.push(Violation {
            r#type: "room_double_booked".into(),
            details: json!({ "classroom_id": room, "timeblock_id": tb, "classes": idx }),
        });
    }

    let mut teacher_rows: Vec<_> = teachers.into_iter().filter(|(_, v)| v.len() > 1).collect();
    teacher_rows.sort();
    for ((teacher, tb), idx) in teacher_rows {
        out.push(Violation {
            r#type: "teacher_double_booked".into(),
            details: json!({ "teacher_id": teacher, "timeblock_id": tb, "classes": idx }),
        });
    }

    let mut seat_rows: Vec<_> = seats.into_iter().filter(|(_, v)| v.len() > 1).collect();
    seat_rows.sort();
    for ((student, tb), idx) in seat_rows {
        out.push(Violation {
            r#type: "student_timeblock_conflict".into(),
            details: json!({ "student_id": student, "timeblock_id": tb, "classes": idx }),
        });
    }

    let course_by_id: HashMap<CourseId, _> = data.courses.iter().map(|c| (c.id, c)).collect();
    for (i, c) in classes.iter().enumerate() {
        let Some(course) = course_by_id.get(&c.course_id) else {
            out.push(Violation {
                r#type: "unknown_course".into(),
                details: json!({ "class": i, "course_id": c.course_id }),
            });
            continue;
        };
        let max = config.max_class_size(course) as usize;
        if c.students.len() > max {
            out.push(Violation {
                r#type: "over_capacity".into(),
                details: json!({
                    "class": i,
                    "course_id": c.course_id,
                    "students": c.students.len(),
                    "max_student_count": max,
                }),
            });
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::Course;

    fn class(course: u32, room: u32, teacher: u32, tb: u32, students: &[u32]) -> ScheduledClass {
        ScheduledClass {
            course_id: CourseId(course),
            classroom_id: ClassroomId(room),
            teacher_id: TeacherId(teacher),
            timeblock_id: TimeblockId(tb),
            start_time: 800,
            end_time: 850,
            days: Vec::new(),
            students: students.iter().map(|s| StudentId(*s)).collect(),
        }
    }

    #[test]
    fn clean_schedule_has_no_violations() {
        let mut data = Dataset::default();
        data.courses.push(Course::new(1, "a"));
        let classes = [class(1, 1, 1, 1, &[1, 2]), class(1, 1, 1, 2, &[3])];
        assert!(audit_schedule(&data, &SchedulerConfig::default(), &classes).is_empty());
    }

    #[test]
    fn reports_each_kind_of_breach() {
        let mut data = Dataset::default();
        let mut small = Course::new(1, "a");
        small.max_student_count = Some(1);
        data.courses.push(small);
        data.courses.push(Course::new(2, "b"));
        let classes = [class(1, 1, 1, 1, &[1, 2]), class(2, 1, 1, 1, &[1])];
        let kinds: Vec<String> = audit_schedule(&data, &SchedulerConfig::default(), &classes)
            .into_iter()
            .map(|v| v.r#type)
            .collect();
        assert_eq!(
            kinds,
            vec![
                "room_double_booked",
                "teacher_double_booked",
                "student_timeblock_conflict",
                "over_capacity"
            ]
        );
    }
}
