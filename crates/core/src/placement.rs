//! Student placement over a solved set of class instances.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use types::{
    ClassroomId, CourseId, EntityKind, ScheduledClass, StudentId, TeacherId, TimeblockId,
};

use crate::error::SchedulerError;
use crate::requirements::StudentRequirements;
use crate::store::EntityStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CollisionKind {
    FullClass,
    Timeblock,
}

impl fmt::Display for CollisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CollisionKind::FullClass => "full class",
            CollisionKind::Timeblock => "timeblock",
        })
    }
}

/// A rejected attempt to put a student into a class instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Collision {
    pub student_id: StudentId,
    pub class_index: usize,
    pub course_id: CourseId,
    pub kind: CollisionKind,
}

/// A solved class instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheduleClass {
    /// Index of the instance in the compiled variable set.
    pub index: usize,
    pub course_id: CourseId,
    pub room_id: ClassroomId,
    pub teacher_id: TeacherId,
    pub timeblock_id: TimeblockId,
    pub max_student_count: u32,
    pub min_student_count: u32,
    pub students: BTreeSet<StudentId>,
}

impl ScheduleClass {
    fn add_student(&mut self, student: &mut ScheduleStudent) -> Option<Collision> {
        let kind = if self.students.len() >= self.max_student_count as usize {
            CollisionKind::FullClass
        } else if student.occupant(self.timeblock_id).is_some() {
            CollisionKind::Timeblock
        } else {
            self.students.insert(student.id);
            student
                .timeblock_occupancy
                .insert(self.timeblock_id, Some(self.index));
            return None;
        };
        Some(Collision {
            student_id: student.id,
            class_index: self.index,
            course_id: self.course_id,
            kind,
        })
    }

    /// Above its minimum and more than three quarters of its maximum.
    fn nearly_full(&self) -> bool {
        let count = self.students.len() as u64;
        count > u64::from(self.min_student_count)
            && count * 4 > u64::from(self.max_student_count) * 3
    }

    fn drop_student(&mut self, student: &mut ScheduleStudent) {
        self.students.remove(&student.id);
        student.timeblock_occupancy.insert(self.timeblock_id, None);
    }
}

#[derive(Clone, Debug)]
pub struct ScheduleStudent {
    pub id: StudentId,
    pub required_course_ids: Vec<CourseId>,
    pub timeblock_occupancy: HashMap<TimeblockId, Option<usize>>,
}

impl ScheduleStudent {
    pub fn new(id: StudentId, required_course_ids: Vec<CourseId>, timeblocks: &[TimeblockId]) -> Self {
        Self {
            id,
            required_course_ids,
            timeblock_occupancy: timeblocks.iter().map(|t| (*t, None)).collect(),
        }
    }

    /// Class instance the student already holds in `timeblock`.
    pub fn occupant(&self, timeblock: TimeblockId) -> Option<usize> {
        self.timeblock_occupancy.get(&timeblock).copied().flatten()
    }
}

/// Solved class instances grouped by course, in candidate order.
#[derive(Clone, Debug, Default)]
pub struct ScheduleData {
    classes: Vec<ScheduleClass>,
    by_course: BTreeMap<CourseId, Vec<usize>>,
}

impl ScheduleData {
    pub fn new(classes: Vec<ScheduleClass>) -> Self {
        let mut by_course: BTreeMap<CourseId, Vec<usize>> = BTreeMap::new();
        for (pos, c) in classes.iter().enumerate() {
            by_course.entry(c.course_id).or_default().push(pos);
        }
        Self { classes, by_course }
    }

    pub fn classes(&self) -> &[ScheduleClass] {
        &self.classes
    }

    /// Candidate instances of `course`, in the order placement tries them.
    pub fn candidates(&self, course: CourseId) -> impl Iterator<Item = &ScheduleClass> {
        self.by_course
            .get(&course)
            .into_iter()
            .flatten()
            .map(|&pos| &self.classes[pos])
    }

    pub fn clear_all_students(&mut self) {
        for c in &mut self.classes {
            c.students.clear();
        }
    }

    /// Places one student. An empty result means every required course got
    /// a class instance.
    pub fn place_student(
        &mut self,
        student_id: StudentId,
        required_course_ids: &[CourseId],
        timeblocks: &[TimeblockId],
    ) -> Result<Vec<Collision>, SchedulerError> {
        let mut student = ScheduleStudent::new(student_id, required_course_ids.to_vec(), timeblocks);
        self.schedule_student_to_courses(&mut student, 0)
    }

    pub fn schedule_student_to_courses(
        &mut self,
        student: &mut ScheduleStudent,
        course_pos: usize,
    ) -> Result<Vec<Collision>, SchedulerError> {
        let Some(&course_id) = student.required_course_ids.get(course_pos) else {
            return Ok(Vec::new());
        };
        let candidates = match self.by_course.get(&course_id) {
            Some(c) if !c.is_empty() => c.clone(),
            _ => return Err(SchedulerError::UnknownCourse(course_id)),
        };

        let mut collisions = Vec::new();
        for pos in candidates {
            if let Some(col) = self.classes[pos].add_student(student) {
                collisions.push(col);
                continue;
            }
            let deeper = self.schedule_student_to_courses(student, course_pos + 1)?;
            if deeper.is_empty() {
                // push nearly full instances to the back so later students
                // spread across the emptier parallel instances first
                if self.classes[pos].nearly_full() {
                    if let Some(order) = self.by_course.get_mut(&course_id) {
                        order.retain(|p| *p != pos);
                        order.push(pos);
                    }
                }
                return Ok(Vec::new());
            }
            self.classes[pos].drop_student(student);
            collisions.extend(deeper);
        }
        Ok(collisions)
    }

    /// Clears previous placements, then places students in order. Stops at
    /// the first student that cannot be placed and returns its collisions.
    pub fn place_students(
        &mut self,
        requirements: &[StudentRequirements],
        timeblocks: &[TimeblockId],
    ) -> Result<Vec<Collision>, SchedulerError> {
        self.clear_all_students();
        for req in requirements {
            let collisions =
                self.place_student(req.student_id, &req.required_course_ids, timeblocks)?;
            if !collisions.is_empty() {
                return Ok(collisions);
            }
        }
        Ok(Vec::new())
    }

    pub fn underfilled(&self) -> impl Iterator<Item = &ScheduleClass> {
        self.classes
            .iter()
            .filter(|c| (c.students.len() as u32) < c.min_student_count)
    }

    pub fn min_student_counts_satisfied(&self) -> bool {
        self.underfilled().next().is_none()
    }

    pub fn into_scheduled(
        self,
        store: &dyn EntityStore,
    ) -> Result<Vec<ScheduledClass>, SchedulerError> {
        self.classes
            .into_iter()
            .map(|c| {
                let tb = store
                    .timeblock(c.timeblock_id)
                    .ok_or(SchedulerError::UnknownEntity {
                        kind: EntityKind::Timeblock,
                        id: c.timeblock_id.0,
                    })?;
                let mut days = tb.days.clone();
                days.sort();
                days.dedup();
                Ok(ScheduledClass {
                    course_id: c.course_id,
                    classroom_id: c.room_id,
                    teacher_id: c.teacher_id,
                    timeblock_id: c.timeblock_id,
                    start_time: tb.start_time,
                    end_time: tb.end_time,
                    days,
                    students: c.students.into_iter().collect(),
                })
            })
            .collect()
    }
}

impl fmt::Display for ScheduleData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "course | room | teacher | timeblock | max | students")?;
        for positions in self.by_course.values() {
            for &pos in positions {
                let c = &self.classes[pos];
                writeln!(
                    f,
                    "{:>6} | {:>4} | {:>7} | {:>9} | {:>3} | {}",
                    c.course_id,
                    c.room_id,
                    c.teacher_id,
                    c.timeblock_id,
                    c.max_student_count,
                    c.students.len()
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(index: usize, course: u32, timeblock: u32, max: u32) -> ScheduleClass {
        ScheduleClass {
            index,
            course_id: CourseId(course),
            room_id: ClassroomId(1),
            teacher_id: TeacherId(1),
            timeblock_id: TimeblockId(timeblock),
            max_student_count: max,
            min_student_count: 0,
            students: BTreeSet::new(),
        }
    }

    fn req(student: u32, courses: &[u32]) -> StudentRequirements {
        StudentRequirements {
            student_id: StudentId(student),
            required_course_ids: courses.iter().map(|c| CourseId(*c)).collect(),
        }
    }

    const TBS: [TimeblockId; 2] = [TimeblockId(1), TimeblockId(2)];

    #[test]
    fn backtracks_out_of_timeblock_collision() {
        // course 1 is offered at 1 and 2, course 2 only at 1
        let mut data = ScheduleData::new(vec![class(0, 1, 1, 5), class(1, 1, 2, 5), class(2, 2, 1, 5)]);
        let collisions = data.place_students(&[req(7, &[1, 2])], &TBS).unwrap();
        assert!(collisions.is_empty());
        assert!(data.classes()[0].students.is_empty());
        assert!(data.classes()[1].students.contains(&StudentId(7)));
        assert!(data.classes()[2].students.contains(&StudentId(7)));
    }

    #[test]
    fn full_class_is_reported() {
        let mut data = ScheduleData::new(vec![class(0, 1, 1, 1)]);
        let collisions = data.place_students(&[req(1, &[1]), req(2, &[1])], &TBS).unwrap();
        assert_eq!(collisions.len(), 1);
        assert_eq!(collisions[0].kind, CollisionKind::FullClass);
        assert_eq!(collisions[0].kind.to_string(), "full class");
        assert_eq!(collisions[0].student_id, StudentId(2));
    }

    #[test]
    fn unsatisfiable_student_reports_timeblock_collision() {
        let mut data = ScheduleData::new(vec![class(0, 1, 1, 5), class(1, 2, 1, 5)]);
        let collisions = data.place_students(&[req(1, &[1, 2])], &TBS).unwrap();
        assert_eq!(collisions.len(), 1);
        assert_eq!(collisions[0].kind, CollisionKind::Timeblock);
        assert_eq!(collisions[0].course_id, CourseId(2));
        // the tentative seat in course 1 is released again
        assert!(data.classes().iter().all(|c| c.students.is_empty()));
    }

    #[test]
    fn nearly_full_instance_moves_to_back() {
        let mut data = ScheduleData::new(vec![class(0, 1, 1, 8), class(1, 1, 2, 8)]);
        let reqs: Vec<_> = (1..=8).map(|s| req(s, &[1])).collect();
        assert!(data.place_students(&reqs, &TBS).unwrap().is_empty());
        // instance 0 passes 3/4 full with its seventh student
        assert_eq!(data.classes()[0].students.len(), 7);
        assert_eq!(data.classes()[1].students.len(), 1);
        let order: Vec<usize> = data.candidates(CourseId(1)).map(|c| c.index).collect();
        assert_eq!(order, vec![1, 0]);
    }

    #[test]
    fn nearly_full_holds_for_any_capacity() {
        let mut c = class(0, 1, 1, 8);
        c.students.extend((1..=6).map(StudentId));
        assert!(!c.nearly_full());
        c.students.insert(StudentId(7));
        assert!(c.nearly_full());

        let mut huge = class(1, 1, 1, u32::MAX);
        huge.students.insert(StudentId(1));
        assert!(!huge.nearly_full());
    }

    #[test]
    fn missing_course_is_an_error() {
        let mut data = ScheduleData::new(vec![class(0, 1, 1, 4)]);
        let err = data.place_students(&[req(1, &[9])], &TBS).unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownCourse(CourseId(9))));
    }

    #[test]
    fn underfilled_classes_are_listed() {
        let mut c = class(0, 1, 1, 4);
        c.min_student_count = 2;
        let mut data = ScheduleData::new(vec![c]);
        data.place_students(&[req(1, &[1])], &TBS).unwrap();
        assert!(!data.min_student_counts_satisfied());
        assert_eq!(data.underfilled().count(), 1);
    }
}
