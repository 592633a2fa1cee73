use thiserror::Error;
use types::{CourseId, EntityKind, StudentId};

use crate::expr::{SatResult, Var};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid dataset: {0}")]
    Msg(String),
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(
        "student {student} course requirements ({required}) are greater than the available number of timeblocks ({timeblocks})"
    )]
    Overscheduled {
        student: StudentId,
        required: usize,
        timeblocks: usize,
    },
    #[error("not enough {resource} for course {course}: {available} slots for {classes} classes")]
    InsufficientResources {
        course: CourseId,
        resource: &'static str,
        available: usize,
        classes: usize,
    },
    #[error("constraint system over {classes} classes has no solution (solver: {result})")]
    Unsatisfiable { classes: usize, result: SatResult },
    #[error("no schedule found after {rounds} rounds")]
    Exhausted { rounds: u32 },
    #[error("course {0} has no class instance in the solved schedule")]
    UnknownCourse(CourseId),
    #[error("{kind:?} {id} does not exist")]
    UnknownEntity { kind: EntityKind, id: u32 },
    #[error("solver model has no value for {0}")]
    IncompleteModel(Var),
    #[error("failed to save schedule: {0}")]
    Persist(String),
}

impl SchedulerError {
    /// Errors the caller reports as "no solution" rather than as an internal fault.
    pub fn is_no_solution(&self) -> bool {
        matches!(
            self,
            SchedulerError::Overscheduled { .. }
                | SchedulerError::InsufficientResources { .. }
                | SchedulerError::Unsatisfiable { .. }
                | SchedulerError::Exhausted { .. }
        )
    }
}
