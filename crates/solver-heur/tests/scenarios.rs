use sched_core::{
    audit_schedule, InMemoryStore, MemorySchedules, NoteBook, Scheduler, SchedulerConfig,
    SchedulerError,
};
use solver_heur::BacktrackSolver;
use types::{
    Classroom, ClassroomId, Course, CourseId, Dataset, LinkKind, Priority, ScheduleOutcome,
    Severity, Student, Teacher, TeacherId, Timeblock, TimeblockId,
};

fn school(teachers: u32, rooms: u32, timeblocks: u32) -> Dataset {
    let mut ds = Dataset {
        term: "spring".into(),
        ..Dataset::default()
    };
    for id in 1..=teachers {
        ds.teachers.push(Teacher::new(id));
    }
    for id in 1..=rooms {
        ds.classrooms.push(Classroom::new(id));
    }
    for id in 1..=timeblocks {
        ds.timeblocks.push(Timeblock::new(id, 700 + id * 100, 750 + id * 100));
    }
    ds
}

fn run(ds: Dataset, seed: u64) -> (Result<ScheduleOutcome, SchedulerError>, NoteBook, Dataset) {
    let store = InMemoryStore::new(ds.clone());
    let sink = MemorySchedules::new();
    let notes = NoteBook::new();
    let config = SchedulerConfig {
        seed,
        ..SchedulerConfig::default()
    };
    let mut solver = BacktrackSolver::new(seed);
    let out = Scheduler::new(&store, &sink, &notes, config).make_schedule(&mut solver);
    if let Ok(out) = &out {
        assert!(sink.get(out.schedule_id).is_some());
    }
    (out, notes, ds)
}

fn assert_clean(ds: &Dataset, out: &ScheduleOutcome) {
    let violations = audit_schedule(ds, &SchedulerConfig::default(), &out.classes);
    assert!(violations.is_empty(), "{violations:?}");
}

#[test]
fn large_course_splits_into_two_full_instances() {
    let mut ds = school(1, 1, 2);
    let mut course = Course::new(1, "history");
    course.max_student_count = Some(5);
    ds.courses.push(course);
    for id in 1..=10 {
        ds.students.push(Student::new(id));
        ds.link(LinkKind::StudentCourse, id, 1, Priority::Mandatory);
    }

    let (out, _, ds) = run(ds, 3);
    let out = out.unwrap();
    assert_eq!(out.classes.len(), 2);
    assert!(out.classes.iter().all(|c| c.students.len() == 5));
    assert_ne!(out.classes[0].timeblock_id, out.classes[1].timeblock_id);
    assert_clean(&ds, &out);
}

#[test]
fn room_availability_limits_timeblocks() {
    let mut ds = school(1, 0, 3);
    let mut room = Classroom::new(1);
    room.avail_end_time = Some(900);
    ds.classrooms.push(room);
    ds.courses.push(Course::new(1, "biology"));
    ds.students.push(Student::new(1));
    ds.link(LinkKind::StudentCourse, 1, 1, Priority::Mandatory);

    let (out, _, _) = run(ds, 11);
    let out = out.unwrap();
    assert_eq!(out.classes.len(), 1);
    assert_eq!(out.classes[0].classroom_id, ClassroomId(1));
    assert_eq!(out.classes[0].timeblock_id, TimeblockId(1));
    assert_eq!((out.classes[0].start_time, out.classes[0].end_time), (800, 850));
}

#[test]
fn shared_teacher_gets_distinct_timeblocks() {
    let mut ds = school(2, 2, 2);
    ds.courses.push(Course::new(1, "algebra"));
    ds.courses.push(Course::new(2, "geometry"));
    ds.link(LinkKind::CourseTeacher, 1, 1, Priority::Mandatory);
    ds.link(LinkKind::CourseTeacher, 2, 1, Priority::Mandatory);
    ds.students.push(Student::new(1));
    ds.link(LinkKind::StudentCourse, 1, 1, Priority::Mandatory);
    ds.link(LinkKind::StudentCourse, 1, 2, Priority::Mandatory);

    let (out, _, ds) = run(ds, 5);
    let out = out.unwrap();
    assert_eq!(out.classes.len(), 2);
    assert!(out.classes.iter().all(|c| c.teacher_id == TeacherId(1)));
    assert_ne!(out.classes[0].timeblock_id, out.classes[1].timeblock_id);
    let courses: Vec<CourseId> = out
        .classes
        .iter()
        .filter(|c| c.students.contains(&types::StudentId(1)))
        .map(|c| c.course_id)
        .collect();
    assert_eq!(courses.len(), 2);
    assert_clean(&ds, &out);
}

#[test]
fn shared_teacher_with_one_free_timeblock_has_no_solution() {
    let mut ds = school(1, 2, 2);
    ds.courses.push(Course::new(1, "algebra"));
    ds.courses.push(Course::new(2, "geometry"));
    ds.link(LinkKind::CourseTeacher, 1, 1, Priority::Mandatory);
    ds.link(LinkKind::CourseTeacher, 2, 1, Priority::Mandatory);
    ds.link(LinkKind::TeacherTimeblock, 1, 1, Priority::Mandatory);
    for s in 1..=3 {
        ds.students.push(Student::new(s));
        ds.link(LinkKind::StudentCourse, s, 1, Priority::Mandatory);
        ds.link(LinkKind::StudentCourse, s, 2, Priority::Mandatory);
    }

    let (out, notes, _) = run(ds, 4);
    let err = out.unwrap_err();
    assert!(err.is_no_solution(), "{err}");
    assert!(matches!(err, SchedulerError::Unsatisfiable { classes: 2, .. }));
    assert!(notes.all().iter().any(|n| n.severity == Severity::Error));
}

#[test]
fn overscheduled_student_reports_no_solution() {
    let mut ds = school(1, 1, 5);
    ds.students.push(Student::new(1));
    for id in 1..=6 {
        ds.courses.push(Course::new(id, format!("course {id}")));
        ds.link(LinkKind::StudentCourse, 1, id, Priority::Mandatory);
    }

    let (out, notes, _) = run(ds, 0);
    let err = out.unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::Overscheduled { required: 6, timeblocks: 5, .. }
    ));
    assert!(err.is_no_solution());
    assert!(notes.all().iter().any(|n| n.severity == Severity::Error));
}

#[test]
fn conflicting_high_timeblock_is_relaxed() {
    let mut ds = school(1, 1, 2);
    ds.courses.push(Course::new(1, "music"));
    ds.link(LinkKind::CourseTimeblock, 1, 1, Priority::High);
    ds.link(LinkKind::TeacherTimeblock, 1, 2, Priority::Mandatory);
    ds.students.push(Student::new(1));
    ds.link(LinkKind::StudentCourse, 1, 1, Priority::Mandatory);

    let (out, notes, _) = run(ds, 9);
    let out = out.unwrap();
    assert_eq!(out.stats.relaxations, 1);
    assert_eq!(out.classes[0].timeblock_id, TimeblockId(2));
    assert!(notes
        .all()
        .iter()
        .any(|n| n.message.starts_with("Relaxing the course->timeblock constraints")));
}

#[test]
fn mandatory_conflict_has_no_solution() {
    let mut ds = school(1, 1, 2);
    ds.courses.push(Course::new(1, "music"));
    ds.link(LinkKind::CourseTimeblock, 1, 1, Priority::Mandatory);
    ds.link(LinkKind::TeacherTimeblock, 1, 2, Priority::Mandatory);
    ds.students.push(Student::new(1));
    ds.link(LinkKind::StudentCourse, 1, 1, Priority::Mandatory);

    let (out, _, _) = run(ds, 9);
    assert!(matches!(
        out.unwrap_err(),
        SchedulerError::Unsatisfiable { classes: 1, .. }
    ));
}

#[test]
fn same_seed_same_schedule() {
    let build = || {
        let mut ds = school(2, 2, 4);
        for id in 1..=3 {
            ds.courses.push(Course::new(id, format!("c{id}")));
        }
        for s in 1..=6 {
            ds.students.push(Student::new(s));
            for c in 1..=3 {
                if (s + c) % 3 != 0 {
                    ds.link(LinkKind::StudentCourse, s, c, Priority::Mandatory);
                }
            }
        }
        ds
    };
    let (a, _, ds) = run(build(), 21);
    let (b, _, _) = run(build(), 21);
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.classes, b.classes);
    assert_eq!(a.stats, b.stats);
    assert_clean(&ds, &a);
}
