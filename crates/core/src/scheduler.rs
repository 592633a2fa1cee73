use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::cell::Cell;
use tracing::{debug, info, warn};
use types::{RunStats, ScheduleOutcome, Severity};

use crate::compiler::ScheduleConstraints;
use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::expr::{ConstraintSolver, SatResult};
use crate::notes::NoteSink;
use crate::placement::{Collision, ScheduleData};
use crate::store::{EntityStore, ScheduleSink};

const NOTE_SUBJECT: &str = "Scheduler";
const SEED_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Init,
    Solving,
    Placing,
    Retrying,
    AddingClass,
    Saved,
    NoSolution,
}

fn attempt_seed(seed: u64, round: u32, attempt: u32) -> u64 {
    (seed ^ SEED_MIX).wrapping_add((u64::from(round) << 32) | u64::from(attempt))
}

fn reinstall(solver: &mut dyn ConstraintSolver, compiled: &ScheduleConstraints<'_>) {
    solver.pop();
    solver.push();
    compiled.install(solver);
}

/// Runs solve, place and retry rounds until a schedule is saved or the
/// budgets run out.
pub struct Scheduler<'a> {
    store: &'a dyn EntityStore,
    sink: &'a dyn ScheduleSink,
    notes: &'a dyn NoteSink,
    config: SchedulerConfig,
    state: Cell<RunState>,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        store: &'a dyn EntityStore,
        sink: &'a dyn ScheduleSink,
        notes: &'a dyn NoteSink,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            sink,
            notes,
            config,
            state: Cell::new(RunState::Init),
        }
    }

    pub fn state(&self) -> RunState {
        self.state.get()
    }

    fn enter(&self, next: RunState) {
        let prev = self.state.replace(next);
        if prev != next {
            debug!(from = ?prev, to = ?next, "scheduler state");
        }
    }

    pub fn make_schedule(
        &mut self,
        solver: &mut dyn ConstraintSolver,
    ) -> Result<ScheduleOutcome, SchedulerError> {
        self.enter(RunState::Init);
        info!(term = self.store.term(), "schedule run started");
        let result = self.run(solver);
        match &result {
            Ok(out) => info!(
                schedule = %out.schedule_id,
                rounds = out.stats.rounds,
                attempts = out.stats.attempts,
                "schedule run finished"
            ),
            Err(e) => {
                self.enter(RunState::NoSolution);
                warn!(error = %e, "schedule run failed");
            }
        }
        result
    }

    fn run(&self, solver: &mut dyn ConstraintSolver) -> Result<ScheduleOutcome, SchedulerError> {
        let cfg = &self.config;
        let mut compiled = ScheduleConstraints::new(self.store, cfg, self.notes)?;
        solver.push();
        compiled.install(solver);

        let mut stats = RunStats::default();
        let mut rng = ChaCha8Rng::seed_from_u64(cfg.seed ^ SEED_MIX);
        let mut order = compiled.requirements().to_vec();

        for round in 1..=cfg.macro_attempts {
            stats.rounds = round;
            let mut last_collisions: Vec<Collision> = Vec::new();
            let mut attempt = 0;
            while attempt < cfg.micro_attempts {
                attempt += 1;
                stats.attempts += 1;

                self.enter(RunState::Solving);
                solver.reseed(attempt_seed(cfg.seed, round, attempt));
                let verdict = solver.check(cfg.solver_timeout());
                if verdict != SatResult::Sat {
                    if compiled.relax_constraints()? {
                        stats.relaxations += 1;
                        warn!(round, attempt, %verdict, "relaxed constraints after failed solve");
                        reinstall(solver, &compiled);
                        continue;
                    }
                    let err = SchedulerError::Unsatisfiable {
                        classes: compiled.class_count(),
                        result: verdict,
                    };
                    self.notes
                        .log_note(Severity::Error, NOTE_SUBJECT, &err.to_string());
                    return Err(err);
                }
                let model = solver.model().cloned().unwrap_or_default();

                self.enter(RunState::Placing);
                let mut data = ScheduleData::new(compiled.decode(&model)?);
                if stats.attempts > 1 {
                    order.shuffle(&mut rng);
                }
                let collisions = data.place_students(&order, compiled.timeblock_ids())?;
                if collisions.is_empty() {
                    return self.finish(data, stats);
                }
                debug!(round, attempt, collisions = collisions.len(), "placement failed");
                self.enter(RunState::Retrying);
                last_collisions = collisions;
            }

            if compiled.can_relax_constraints() {
                compiled.relax_constraints()?;
                stats.relaxations += 1;
                warn!(round, "relaxed constraints after placement retries");
            } else {
                self.enter(RunState::AddingClass);
                match compiled.add_class_from_collisions(&last_collisions)? {
                    Some(course) => {
                        stats.classes_added += 1;
                        warn!(round, %course, classes = compiled.class_count(), "added class instance");
                    }
                    None => {
                        // every attempt went to relaxing, so the relaxed
                        // system has not been solved yet
                        warn!(round, "no collisions to add a class for");
                        self.notes.log_note(
                            Severity::Warning,
                            NOTE_SUBJECT,
                            &format!("Round {round} ended without a placement to learn from; retrying the relaxed constraints"),
                        );
                    }
                }
            }
            reinstall(solver, &compiled);
        }

        let err = SchedulerError::Exhausted {
            rounds: cfg.macro_attempts,
        };
        self.notes
            .log_note(Severity::Error, NOTE_SUBJECT, &err.to_string());
        Err(err)
    }

    fn finish(&self, data: ScheduleData, stats: RunStats) -> Result<ScheduleOutcome, SchedulerError> {
        for c in data.underfilled() {
            self.notes.log_note(
                Severity::Warning,
                NOTE_SUBJECT,
                &format!(
                    "Class {} (course: {}) has {} students, below its minimum of {}",
                    c.index,
                    c.course_id,
                    c.students.len(),
                    c.min_student_count
                ),
            );
        }
        debug!("\n{data}");

        let classes = data.into_scheduled(self.store)?;
        let name = format!("Schedule for {}", self.store.term());
        let schedule_id = self
            .sink
            .save(&name, &classes)
            .map_err(|e| SchedulerError::Persist(format!("{e:#}")))?;
        self.enter(RunState::Saved);
        self.notes.log_note(
            Severity::Success,
            NOTE_SUBJECT,
            &format!(
                "Schedule {schedule_id} created with {} classes after {} rounds",
                classes.len(),
                stats.rounds
            ),
        );
        Ok(ScheduleOutcome {
            schedule_id,
            classes,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{ConstraintStack, Expr, Field, Valuation, Var};
    use crate::notes::NoteBook;
    use crate::store::{InMemoryStore, MemorySchedules};
    use std::time::Duration;
    use types::{Classroom, Course, Dataset, LinkKind, Priority, Student, Teacher, Timeblock};

    /// Answers from a script and builds a model that puts every class in
    /// one fixed timeblock with the first teacher and room.
    struct StubSolver {
        stack: ConstraintStack,
        script: Vec<SatResult>,
        checks: usize,
        time: i64,
        model: Option<Valuation>,
    }

    impl StubSolver {
        fn new(script: Vec<SatResult>) -> Self {
            Self {
                stack: ConstraintStack::default(),
                script,
                checks: 0,
                time: 1,
                model: None,
            }
        }

        fn course_of(&self, class: usize) -> Option<i64> {
            self.stack.constraints().iter().find_map(|e| match e {
                Expr::And(parts) => parts.iter().find_map(|p| match p {
                    Expr::Eq(v, c) if *v == Var::course(class) => Some(*c),
                    _ => None,
                }),
                _ => None,
            })
        }
    }

    impl ConstraintSolver for StubSolver {
        fn declare(&mut self, var: Var, domain: Vec<i64>) {
            self.stack.declare(var, domain);
        }
        fn add(&mut self, constraint: Expr) {
            self.stack.add(constraint);
        }
        fn push(&mut self) {
            self.stack.push();
        }
        fn pop(&mut self) {
            self.stack.pop();
        }
        fn reseed(&mut self, _seed: u64) {}
        fn check(&mut self, _timeout: Duration) -> SatResult {
            let verdict = self
                .script
                .get(self.checks)
                .or(self.script.last())
                .copied()
                .unwrap_or(SatResult::Sat);
            self.checks += 1;
            self.model = (verdict == SatResult::Sat).then(|| {
                self.stack
                    .domains()
                    .iter()
                    .map(|(var, dom)| {
                        let v = match var.field {
                            Field::Course => self.course_of(var.class).unwrap_or(dom[0]),
                            Field::Time => self.time,
                            _ => dom[0],
                        };
                        (*var, v)
                    })
                    .collect()
            });
            verdict
        }
        fn model(&self) -> Option<&Valuation> {
            self.model.as_ref()
        }
    }

    fn dataset(timeblocks: u32) -> Dataset {
        let mut ds = Dataset {
            term: "fall".into(),
            ..Dataset::default()
        };
        ds.teachers.push(Teacher::new(1));
        ds.classrooms.push(Classroom::new(1));
        for id in 1..=timeblocks {
            ds.timeblocks.push(Timeblock::new(id, 700 + id * 100, 750 + id * 100));
        }
        ds
    }

    #[test]
    fn places_students_and_saves() {
        let mut ds = dataset(1);
        ds.courses.push(Course::new(1, "math"));
        for s in 1..=2 {
            ds.students.push(Student::new(s));
            ds.link(LinkKind::StudentCourse, s, 1, Priority::Mandatory);
        }
        let store = InMemoryStore::new(ds);
        let sink = MemorySchedules::new();
        let notes = NoteBook::new();
        let mut solver = StubSolver::new(vec![SatResult::Sat]);

        let mut sched = Scheduler::new(&store, &sink, &notes, SchedulerConfig::default());
        let out = sched.make_schedule(&mut solver).unwrap();
        assert_eq!(sched.state(), RunState::Saved);
        assert_eq!(out.classes.len(), 1);
        assert_eq!(out.classes[0].students.len(), 2);
        assert_eq!(out.stats.rounds, 1);
        assert_eq!(out.stats.attempts, 1);

        let saved = sink.get(out.schedule_id).unwrap();
        assert_eq!(saved.name, "Schedule for fall");
        assert_eq!(notes.all().last().map(|n| n.severity), Some(Severity::Success));
    }

    #[test]
    fn unsat_without_relaxation_is_fatal() {
        let mut ds = dataset(1);
        ds.courses.push(Course::new(1, "math"));
        ds.students.push(Student::new(1));
        ds.link(LinkKind::StudentCourse, 1, 1, Priority::Mandatory);
        let store = InMemoryStore::new(ds);
        let sink = MemorySchedules::new();
        let notes = NoteBook::new();
        let mut solver = StubSolver::new(vec![SatResult::Unsat]);

        let mut sched = Scheduler::new(&store, &sink, &notes, SchedulerConfig::default());
        let err = sched.make_schedule(&mut solver).unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Unsatisfiable { classes: 1, result: SatResult::Unsat }
        ));
        assert_eq!(solver.checks, 1);
        assert_eq!(sched.state(), RunState::NoSolution);
        assert!(sink.list().is_empty());
    }

    #[test]
    fn timeout_relaxes_before_giving_up() {
        let mut ds = dataset(1);
        ds.courses.push(Course::new(1, "math"));
        ds.students.push(Student::new(1));
        ds.link(LinkKind::StudentCourse, 1, 1, Priority::Mandatory);
        ds.link(LinkKind::CourseTeacher, 1, 1, Priority::High);
        let store = InMemoryStore::new(ds);
        let sink = MemorySchedules::new();
        let notes = NoteBook::new();
        let mut solver = StubSolver::new(vec![SatResult::Unknown, SatResult::Sat]);

        let mut sched = Scheduler::new(&store, &sink, &notes, SchedulerConfig::default());
        let out = sched.make_schedule(&mut solver).unwrap();
        assert_eq!(out.stats.relaxations, 1);
        assert_eq!(out.stats.attempts, 2);
        assert!(notes
            .all()
            .iter()
            .any(|n| n.message.starts_with("Relaxing the course->teacher")));
    }

    #[test]
    fn adds_classes_until_budget_runs_out() {
        let mut ds = dataset(3);
        ds.courses.push(Course::new(1, "math"));
        ds.courses.push(Course::new(2, "art"));
        ds.students.push(Student::new(1));
        ds.link(LinkKind::StudentCourse, 1, 1, Priority::Mandatory);
        ds.link(LinkKind::StudentCourse, 1, 2, Priority::Mandatory);
        let store = InMemoryStore::new(ds);
        let sink = MemorySchedules::new();
        let notes = NoteBook::new();
        // every class lands in timeblock 1, so the student always collides
        let mut solver = StubSolver::new(vec![SatResult::Sat]);
        let cfg = SchedulerConfig {
            macro_attempts: 2,
            micro_attempts: 2,
            ..SchedulerConfig::default()
        };

        let mut sched = Scheduler::new(&store, &sink, &notes, cfg);
        let err = sched.make_schedule(&mut solver).unwrap_err();
        assert!(matches!(err, SchedulerError::Exhausted { rounds: 2 }));
        assert!(err.is_no_solution());
        assert_eq!(solver.checks, 4);
        let added = notes
            .all()
            .iter()
            .filter(|n| n.message == "Added another class for the course: 2 art")
            .count();
        assert_eq!(added, 2);
    }

    #[test]
    fn round_spent_relaxing_retries_the_relaxed_system() {
        let mut ds = dataset(1);
        ds.courses.push(Course::new(1, "math"));
        ds.students.push(Student::new(1));
        ds.link(LinkKind::StudentCourse, 1, 1, Priority::Mandatory);
        ds.link(LinkKind::CourseTeacher, 1, 1, Priority::High);
        let store = InMemoryStore::new(ds);
        let sink = MemorySchedules::new();
        let notes = NoteBook::new();
        // the first round's only attempt is spent relaxing
        let mut solver = StubSolver::new(vec![SatResult::Unknown, SatResult::Sat]);
        let cfg = SchedulerConfig {
            micro_attempts: 1,
            ..SchedulerConfig::default()
        };

        let mut sched = Scheduler::new(&store, &sink, &notes, cfg);
        let out = sched.make_schedule(&mut solver).unwrap();
        assert_eq!(out.stats.rounds, 2);
        assert_eq!(out.stats.relaxations, 1);
        assert_eq!(out.stats.classes_added, 0);
        assert!(notes
            .all()
            .iter()
            .any(|n| n.severity == Severity::Warning && n.message.starts_with("Round 1 ended")));
    }

    #[test]
    fn overscheduled_student_never_reaches_solver() {
        let mut ds = dataset(1);
        ds.students.push(Student::new(1));
        for c in 1..=2 {
            ds.courses.push(Course::new(c, format!("c{c}")));
            ds.link(LinkKind::StudentCourse, 1, c, Priority::Mandatory);
        }
        let store = InMemoryStore::new(ds);
        let sink = MemorySchedules::new();
        let notes = NoteBook::new();
        let mut solver = StubSolver::new(vec![SatResult::Sat]);

        let mut sched = Scheduler::new(&store, &sink, &notes, SchedulerConfig::default());
        let err = sched.make_schedule(&mut solver).unwrap_err();
        assert!(matches!(err, SchedulerError::Overscheduled { .. }));
        assert_eq!(solver.checks, 0);
    }

    #[test]
    fn attempt_seeds_differ() {
        assert_ne!(attempt_seed(0, 1, 1), attempt_seed(0, 1, 2));
        assert_ne!(attempt_seed(0, 1, 1), attempt_seed(0, 2, 1));
    }
}
