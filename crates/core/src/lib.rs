pub mod audit;
pub mod compiler;
pub mod config;
pub mod derive;
pub mod error;
pub mod expr;
pub mod notes;
pub mod placement;
pub mod requirements;
pub mod scheduler;
pub mod store;
pub mod tier;

use async_trait::async_trait;
use std::collections::HashSet;

pub use audit::audit_schedule;
pub use compiler::ScheduleConstraints;
pub use config::SchedulerConfig;
pub use error::{SchedulerError, ValidationError};
pub use expr::{ConstraintSolver, ConstraintStack, Expr, Field, SatResult, Valuation, Var};
pub use notes::{NoteBook, NoteSink, TracingNotes};
pub use placement::{Collision, CollisionKind, ScheduleData};
pub use requirements::{RequirementCalculator, StudentConstraint, StudentRequirements};
pub use scheduler::{RunState, Scheduler};
pub use store::{EntityStore, InMemoryStore, MemorySchedules, ScheduleSink};
pub use types::{
    Dataset, EntityKind, LinkKind, Priority, RunParams, ScheduleOutcome, ScheduleRequest,
    ScheduledClass, SolverKind,
};

pub fn validate(data: &Dataset) -> Result<(), ValidationError> {
    let mut errors: Vec<String> = Vec::new();

    if data.timeblocks.is_empty() {
        errors.push("timeblocks is empty".into());
    }

    fn chk_unique<I: ToString>(name: &str, ids: impl Iterator<Item = I>, errors: &mut Vec<String>) {
        let mut seen = HashSet::new();
        for id in ids {
            let s = id.to_string();
            if !seen.insert(s.clone()) {
                errors.push(format!("duplicate {name} id: {s}"));
            }
        }
    }
    chk_unique("course", data.courses.iter().map(|x| x.id), &mut errors);
    chk_unique("teacher", data.teachers.iter().map(|x| x.id), &mut errors);
    chk_unique("classroom", data.classrooms.iter().map(|x| x.id), &mut errors);
    chk_unique("timeblock", data.timeblocks.iter().map(|x| x.id), &mut errors);
    chk_unique("student", data.students.iter().map(|x| x.id), &mut errors);
    chk_unique("student group", data.student_groups.iter().map(|x| x.id), &mut errors);
    chk_unique("subject", data.subjects.iter().map(|x| x.id), &mut errors);

    fn chk_window(
        what: &str,
        start: Option<u32>,
        end: Option<u32>,
        errors: &mut Vec<String>,
    ) {
        for t in [start, end].into_iter().flatten() {
            if t > types::LAST_MINUTE || t % 100 >= 60 {
                errors.push(format!("{what} has invalid time {t}"));
            }
        }
        if let (Some(s), Some(e)) = (start, end) {
            if s >= e {
                errors.push(format!("{what} availability starts at {s} but ends at {e}"));
            }
        }
    }

    for tb in &data.timeblocks {
        chk_window(
            &format!("timeblock {}", tb.id),
            Some(tb.start_time),
            Some(tb.end_time),
            &mut errors,
        );
    }
    for t in &data.teachers {
        chk_window(&format!("teacher {}", t.id), t.avail_start_time, t.avail_end_time, &mut errors);
    }
    for r in &data.classrooms {
        chk_window(&format!("classroom {}", r.id), r.avail_start_time, r.avail_end_time, &mut errors);
    }
    for c in &data.courses {
        chk_window(&format!("course {}", c.id), c.avail_start_time, c.avail_end_time, &mut errors);
        if c.max_student_count == Some(0) {
            errors.push(format!("course {} has max_student_count=0", c.id));
        }
        if let (Some(min), Some(max)) = (c.min_student_count, c.max_student_count) {
            if min > max {
                errors.push(format!(
                    "course {} has min_student_count {min} above max_student_count {max}",
                    c.id
                ));
            }
        }
    }

    let ids = |kind: EntityKind| -> HashSet<u32> {
        match kind {
            EntityKind::Course => data.courses.iter().map(|x| x.id.0).collect(),
            EntityKind::Teacher => data.teachers.iter().map(|x| x.id.0).collect(),
            EntityKind::Classroom => data.classrooms.iter().map(|x| x.id.0).collect(),
            EntityKind::Timeblock => data.timeblocks.iter().map(|x| x.id.0).collect(),
            EntityKind::Student => data.students.iter().map(|x| x.id.0).collect(),
            EntityKind::StudentGroup => data.student_groups.iter().map(|x| x.id.0).collect(),
            EntityKind::Subject => data.subjects.iter().map(|x| x.id.0).collect(),
        }
    };
    let known: Vec<(EntityKind, HashSet<u32>)> = [
        EntityKind::Course,
        EntityKind::Teacher,
        EntityKind::Classroom,
        EntityKind::Timeblock,
        EntityKind::Student,
        EntityKind::StudentGroup,
        EntityKind::Subject,
    ]
    .into_iter()
    .map(|k| (k, ids(k)))
    .collect();
    let exists = |kind: EntityKind, id: u32| {
        known
            .iter()
            .find(|(k, _)| *k == kind)
            .is_some_and(|(_, set)| set.contains(&id))
    };
    for l in &data.links {
        let (left, right) = l.kind.endpoints();
        if !exists(left, l.left_id) {
            errors.push(format!("{:?} link references missing {left:?} {}", l.kind, l.left_id));
        }
        if !exists(right, l.right_id) {
            errors.push(format!("{:?} link references missing {right:?} {}", l.kind, l.right_id));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::Msg(errors.join("; ")))
    }
}

#[async_trait]
pub trait ScheduleService: Send + Sync + 'static {
    async fn schedule(&self, req: ScheduleRequest) -> anyhow::Result<ScheduleOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::{Course, Student, Timeblock};

    #[test]
    fn accepts_consistent_dataset() {
        let mut ds = Dataset::default();
        ds.timeblocks.push(Timeblock::new(1, 800, 850));
        ds.courses.push(Course::new(1, "math"));
        ds.students.push(Student::new(1));
        ds.link(LinkKind::StudentCourse, 1, 1, Priority::Mandatory);
        assert!(validate(&ds).is_ok());
    }

    #[test]
    fn collects_every_problem() {
        let mut ds = Dataset::default();
        ds.timeblocks.push(Timeblock::new(1, 900, 850));
        ds.timeblocks.push(Timeblock::new(1, 800, 875));
        let mut c = Course::new(1, "math");
        c.min_student_count = Some(5);
        c.max_student_count = Some(2);
        ds.courses.push(c);
        ds.link(LinkKind::StudentCourse, 4, 1, Priority::Low);

        let ValidationError::Msg(msg) = validate(&ds).unwrap_err();
        assert!(msg.contains("duplicate timeblock id: 1"), "{msg}");
        assert!(msg.contains("timeblock 1 availability starts at 900"), "{msg}");
        assert!(msg.contains("invalid time 875"), "{msg}");
        assert!(msg.contains("min_student_count 5 above"), "{msg}");
        assert!(msg.contains("StudentCourse link references missing Student 4"), "{msg}");
    }
}
