//! Turns derived eligibility into a constraint system over class instances.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, info};
use types::{CourseId, EntityKind, Severity, StudentId, TimeblockId};

use crate::config::SchedulerConfig;
use crate::derive::{ConstraintTree, Node, NodeId};
use crate::error::SchedulerError;
use crate::expr::{ConstraintSolver, Expr, Field, Valuation, Var};
use crate::notes::NoteSink;
use crate::placement::{Collision, CollisionKind, ScheduleClass};
use crate::requirements::{RequirementCalculator, StudentRequirements};
use crate::store::EntityStore;

const NOTE_SUBJECT: &str = "Scheduler";

struct Shortage {
    course: CourseId,
    resource: &'static str,
    count: usize,
    available: usize,
    classes: usize,
}

/// Candidate values of one class instance after windows are applied.
#[derive(Clone, Debug, Default)]
struct Candidates {
    teachers: Vec<i64>,
    rooms: Vec<i64>,
    times: Vec<i64>,
}

fn disjoint(a: &[i64], b: &[i64]) -> bool {
    !a.iter().any(|x| b.contains(x))
}

/// `var ∈ values`, or nothing when the declared domain already implies it.
fn restrict(var: Var, values: Vec<i64>, domain: &[i64]) -> Option<Expr> {
    if domain.iter().all(|d| values.contains(d)) {
        None
    } else {
        Some(Expr::In(var, values))
    }
}

pub struct ScheduleConstraints<'a> {
    store: &'a dyn EntityStore,
    config: &'a SchedulerConfig,
    notes: &'a dyn NoteSink,
    tree: ConstraintTree,
    classes: BTreeMap<CourseId, Vec<NodeId>>,
    requirements: Vec<StudentRequirements>,
    timeblocks: Vec<TimeblockId>,
    slots: Vec<NodeId>,
    domains: BTreeMap<Field, Vec<i64>>,
    constraints: Vec<Expr>,
}

impl<'a> ScheduleConstraints<'a> {
    /// Computes requirements, opens the class instances they need and
    /// compiles the first constraint set.
    pub fn new(
        store: &'a dyn EntityStore,
        config: &'a SchedulerConfig,
        notes: &'a dyn NoteSink,
    ) -> Result<Self, SchedulerError> {
        let calc = RequirementCalculator::new(store, config, notes);
        let timeblocks = calc.usable_timeblocks();
        let requirements = calc.all_requirements()?;
        let plan = calc.plan_classes(&requirements)?;

        let mut tree = ConstraintTree::new();
        let mut classes: BTreeMap<CourseId, Vec<NodeId>> = BTreeMap::new();
        for (course_id, counts) in plan {
            let course = store.course(course_id).ok_or(SchedulerError::UnknownEntity {
                kind: EntityKind::Course,
                id: course_id.0,
            })?;
            for count in counts {
                let node = tree.add_class(store, course, 0);
                if let Some(c) = tree.class_mut(node) {
                    c.student_count = count;
                }
                classes.entry(course_id).or_default().push(node);
            }
        }

        let as_i64 = |ids: Vec<u32>| ids.into_iter().map(i64::from).collect::<Vec<_>>();
        let domains = BTreeMap::from([
            (Field::Teacher, as_i64(store.ids(EntityKind::Teacher))),
            (Field::Room, as_i64(store.ids(EntityKind::Classroom))),
            (Field::Time, timeblocks.iter().map(|t| i64::from(t.0)).collect()),
            (Field::Course, as_i64(store.ids(EntityKind::Course))),
        ]);

        let mut this = Self {
            store,
            config,
            notes,
            tree,
            classes,
            requirements,
            timeblocks,
            slots: Vec::new(),
            domains,
            constraints: Vec::new(),
        };
        this.reset_constraints()?;
        info!(
            classes = this.class_count(),
            students = this.requirements.len(),
            "compiled schedule constraints"
        );
        Ok(this)
    }

    pub fn class_count(&self) -> usize {
        self.slots.len()
    }

    pub fn requirements(&self) -> &[StudentRequirements] {
        &self.requirements
    }

    /// Timeblocks inside the school day; the domain of every `time(i)`.
    pub fn timeblock_ids(&self) -> &[TimeblockId] {
        &self.timeblocks
    }

    pub fn constraints(&self) -> &[Expr] {
        &self.constraints
    }

    pub fn domain(&self, field: Field) -> &[i64] {
        self.domains.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Declares every variable and adds every constraint to `solver`.
    pub fn install(&self, solver: &mut dyn ConstraintSolver) {
        for i in 0..self.slots.len() {
            for field in Field::ALL {
                solver.declare(Var { class: i, field }, self.domain(field).to_vec());
            }
        }
        for c in &self.constraints {
            solver.add(c.clone());
        }
    }

    /// Re-indexes class instances and regenerates every constraint.
    pub fn reset_constraints(&mut self) -> Result<(), SchedulerError> {
        self.slots.clear();
        for nodes in self.classes.values() {
            for &node in nodes {
                let index = self.slots.len();
                if let Some(c) = self.tree.class_mut(node) {
                    c.index = index;
                }
                self.slots.push(node);
            }
        }

        self.check_fact_utilization()?;

        let mut constraints = Vec::new();
        let candidates: Vec<Candidates> = (0..self.slots.len())
            .map(|i| self.class_constraints(i, &mut constraints))
            .collect();
        self.collision_constraints(&candidates, &mut constraints);
        self.course_path_constraints(&mut constraints);

        debug!(
            classes = self.slots.len(),
            constraints = constraints.len(),
            "regenerated constraints"
        );
        self.constraints = constraints;
        Ok(())
    }

    fn allowed_times(
        &self,
        ids: &[TimeblockId],
        start: Option<u32>,
        end: Option<u32>,
    ) -> Vec<i64> {
        ids.iter()
            .filter(|id| self.timeblocks.contains(*id))
            .filter(|id| {
                self.store
                    .timeblock(**id)
                    .is_some_and(|tb| tb.within(start, end))
            })
            .map(|id| i64::from(id.0))
            .collect()
    }

    fn node_times(&self, node: NodeId) -> Vec<i64> {
        let ids = self.tree.timeblock_ids(node);
        let (start, end) = match self.tree.node(node) {
            Node::Classroom(n) => self
                .store
                .classroom(n.classroom_id)
                .map_or((None, None), |r| (r.avail_start_time, r.avail_end_time)),
            Node::Teacher(n) => self
                .store
                .teacher(n.teacher_id)
                .map_or((None, None), |t| (t.avail_start_time, t.avail_end_time)),
            Node::Class(n) => self
                .store
                .course(n.course_id)
                .map_or((None, None), |c| (c.avail_start_time, c.avail_end_time)),
        };
        self.allowed_times(&ids, start, end)
    }

    /// Membership plus guarded teacher and room constraints for instance `i`.
    fn class_constraints(&self, i: usize, out: &mut Vec<Expr>) -> Candidates {
        let node = self.slots[i];
        let Some(class) = self.tree.class(node) else {
            return Candidates::default();
        };
        let cand = Candidates {
            teachers: self.tree.teacher_ids(node).iter().map(|t| i64::from(t.0)).collect(),
            rooms: self.tree.classroom_ids(node).iter().map(|r| i64::from(r.0)).collect(),
            times: self.node_times(node),
        };
        out.push(Expr::And(vec![
            Expr::Eq(Var::course(i), i64::from(class.course_id.0)),
            Expr::In(Var::teacher(i), cand.teachers.clone()),
            Expr::In(Var::room(i), cand.rooms.clone()),
            Expr::In(Var::time(i), cand.times.clone()),
        ]));

        let mut rooms: Vec<NodeId> = self.tree.classroom_nodes(node).to_vec();
        for &t in self.tree.teacher_nodes(node) {
            let Node::Teacher(teacher) = self.tree.node(t) else {
                continue;
            };
            let teacher_rooms: Vec<i64> = self
                .tree
                .classroom_ids(t)
                .iter()
                .map(|r| i64::from(r.0))
                .collect();
            let parts: Vec<Expr> = [
                restrict(Var::room(i), teacher_rooms, &cand.rooms),
                restrict(Var::time(i), self.node_times(t), &cand.times),
            ]
            .into_iter()
            .flatten()
            .collect();
            if !parts.is_empty() {
                out.push(Expr::implies(
                    Expr::Eq(Var::teacher(i), i64::from(teacher.teacher_id.0)),
                    Expr::And(parts),
                ));
            }
            for &r in self.tree.classroom_nodes(t) {
                if !rooms.contains(&r) {
                    rooms.push(r);
                }
            }
        }

        // classroom nodes are shared per id, so one guard per room covers
        // both the class's own rooms and the rooms reached through teachers
        for r in rooms {
            let Node::Classroom(room) = self.tree.node(r) else {
                continue;
            };
            if !cand.rooms.contains(&i64::from(room.classroom_id.0)) {
                continue;
            }
            if let Some(times) = restrict(Var::time(i), self.node_times(r), &cand.times) {
                out.push(Expr::implies(
                    Expr::Eq(Var::room(i), i64::from(room.classroom_id.0)),
                    times,
                ));
            }
        }
        cand
    }

    /// No room and no teacher holds two instances in one timeblock.
    fn collision_constraints(&self, cand: &[Candidates], out: &mut Vec<Expr>) {
        for i in 0..cand.len() {
            for j in (i + 1)..cand.len() {
                if disjoint(&cand[i].times, &cand[j].times) {
                    continue;
                }
                let apart = || Expr::distinct(Var::time(i), Var::time(j));
                if !disjoint(&cand[i].rooms, &cand[j].rooms) {
                    out.push(Expr::implies(Expr::VarEq(Var::room(i), Var::room(j)), apart()));
                }
                if !disjoint(&cand[i].teachers, &cand[j].teachers) {
                    out.push(Expr::implies(
                        Expr::VarEq(Var::teacher(i), Var::teacher(j)),
                        apart(),
                    ));
                }
            }
        }
    }

    fn instance_indexes(&self, course: CourseId) -> Vec<usize> {
        self.classes.get(&course).map_or_else(Vec::new, |nodes| {
            nodes
                .iter()
                .filter_map(|n| self.tree.class(*n).map(|c| c.index))
                .collect()
        })
    }

    /// For every distinct required-course layout, at least one choice of
    /// instances must sit in pairwise different timeblocks.
    fn course_path_constraints(&self, out: &mut Vec<Expr>) {
        let mut seen: HashSet<Vec<Vec<usize>>> = HashSet::new();
        for req in &self.requirements {
            if req.required_course_ids.len() < 2 {
                continue;
            }
            let layout: Vec<Vec<usize>> = req
                .required_course_ids
                .iter()
                .map(|c| self.instance_indexes(*c))
                .collect();
            if !seen.insert(layout.clone()) {
                continue;
            }
            let paths = layout
                .iter()
                .try_fold(1usize, |acc, l| acc.checked_mul(l.len()));
            match paths {
                Some(n) if n <= self.config.max_course_paths => {}
                _ => {
                    self.skip_course_paths(req.student_id, paths);
                    continue;
                }
            }
            let alternatives = course_paths(&layout)
                .into_iter()
                .map(|path| {
                    let mut apart = Vec::new();
                    for a in 0..path.len() {
                        for b in (a + 1)..path.len() {
                            apart.push(Expr::distinct(Var::time(path[a]), Var::time(path[b])));
                        }
                    }
                    Expr::And(apart)
                })
                .collect();
            out.push(Expr::Or(alternatives));
        }
    }

    fn skip_course_paths(&self, student: StudentId, paths: Option<usize>) {
        let count = paths.map_or_else(|| "too many".to_string(), |n| n.to_string());
        self.notes.log_note(
            Severity::Warning,
            NOTE_SUBJECT,
            &format!(
                "Skipping the course path constraint for student {student}: {count} paths exceed the limit of {}",
                self.config.max_course_paths
            ),
        );
    }

    /// A course needs more instances than its teachers or rooms can host
    /// across its eligible timeblocks. The course's own tiers are widened
    /// first; the shortage is only fatal once nothing is left to relax.
    fn check_fact_utilization(&mut self) -> Result<(), SchedulerError> {
        while let Some(short) = self.shortage() {
            let nodes = self.classes.get(&short.course).cloned().unwrap_or_default();
            let mut relaxed = false;
            for node in nodes {
                if self.tree.can_relax(node) {
                    relaxed |= self.tree.relax(node, self.notes);
                }
            }
            if !relaxed {
                return Err(self.report_shortage(short));
            }
        }
        Ok(())
    }

    fn shortage(&self) -> Option<Shortage> {
        for (course_id, nodes) in &self.classes {
            let Some(&first) = nodes.first() else {
                continue;
            };
            let times = self.node_times(first).len();
            let checks = [
                ("teachers", self.tree.teacher_ids(first).len()),
                ("classrooms", self.tree.classroom_ids(first).len()),
            ];
            for (resource, count) in checks {
                if nodes.len() > count * times {
                    return Some(Shortage {
                        course: *course_id,
                        resource,
                        count,
                        available: count * times,
                        classes: nodes.len(),
                    });
                }
            }
        }
        None
    }

    fn report_shortage(&self, short: Shortage) -> SchedulerError {
        let name = self
            .store
            .course(short.course)
            .map_or_else(String::new, |c| c.name.clone());
        self.notes.log_note(
            Severity::Error,
            NOTE_SUBJECT,
            &format!(
                "No solution, Not enough {resource} for course: {} {name}, {resource}={}, classes={}",
                short.course,
                short.count,
                short.classes,
                resource = short.resource,
            ),
        );
        SchedulerError::InsufficientResources {
            course: short.course,
            resource: short.resource,
            available: short.available,
            classes: short.classes,
        }
    }

    pub fn can_relax_constraints(&self) -> bool {
        self.slots.iter().any(|n| self.tree.can_relax(*n))
    }

    /// Relaxes the first relaxable instance and recompiles.
    pub fn relax_constraints(&mut self) -> Result<bool, SchedulerError> {
        let Some(node) = self.slots.iter().copied().find(|n| self.tree.can_relax(*n)) else {
            return Ok(false);
        };
        let relaxed = self.tree.relax(node, self.notes);
        self.reset_constraints()?;
        Ok(relaxed)
    }

    /// Opens one more instance of the course that collided most often.
    /// Timeblock collisions are counted first; full-class collisions only
    /// decide when there are no timeblock collisions.
    pub fn add_class_from_collisions(
        &mut self,
        collisions: &[Collision],
    ) -> Result<Option<CourseId>, SchedulerError> {
        let pick = |only: Option<CollisionKind>| -> Option<CourseId> {
            let mut counts: Vec<(CourseId, usize)> = Vec::new();
            for col in collisions.iter().filter(|c| only.map_or(true, |k| c.kind == k)) {
                match counts.iter_mut().find(|(c, _)| *c == col.course_id) {
                    Some((_, n)) => *n += 1,
                    None => counts.push((col.course_id, 1)),
                }
            }
            // first seen wins ties
            counts
                .into_iter()
                .fold(None, |best: Option<(CourseId, usize)>, (c, n)| match best {
                    Some((_, m)) if m >= n => best,
                    _ => Some((c, n)),
                })
                .map(|(c, _)| c)
        };
        let Some(course_id) = pick(Some(CollisionKind::Timeblock)).or_else(|| pick(None)) else {
            return Ok(None);
        };

        let store = self.store;
        let course = store.course(course_id).ok_or(SchedulerError::UnknownEntity {
            kind: EntityKind::Course,
            id: course_id.0,
        })?;
        let node = self.tree.add_class(store, course, self.slots.len());
        self.classes.entry(course_id).or_default().push(node);
        self.notes.log_note(
            Severity::Info,
            NOTE_SUBJECT,
            &format!("Added another class for the course: {} {}", course.id, course.name),
        );
        self.reset_constraints()?;
        Ok(Some(course_id))
    }

    /// Reads one concrete class instance per slot out of a solver model.
    pub fn decode(&self, model: &Valuation) -> Result<Vec<ScheduleClass>, SchedulerError> {
        let value = |var: Var| -> Result<u32, SchedulerError> {
            model
                .get(var)
                .and_then(|v| u32::try_from(v).ok())
                .ok_or(SchedulerError::IncompleteModel(var))
        };
        let mut out = Vec::with_capacity(self.slots.len());
        for i in 0..self.slots.len() {
            let course_id = CourseId(value(Var::course(i))?);
            let course = self
                .store
                .course(course_id)
                .ok_or(SchedulerError::UnknownEntity {
                    kind: EntityKind::Course,
                    id: course_id.0,
                })?;
            out.push(ScheduleClass {
                index: i,
                course_id,
                room_id: value(Var::room(i))?.into(),
                teacher_id: value(Var::teacher(i))?.into(),
                timeblock_id: value(Var::time(i))?.into(),
                max_student_count: self.config.max_class_size(course),
                min_student_count: self.config.min_class_size(course),
                students: BTreeSet::new(),
            });
        }
        Ok(out)
    }
}

/// Cartesian product of the per-course instance lists.
pub fn course_paths(layout: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let mut paths: Vec<Vec<usize>> = vec![Vec::new()];
    for options in layout {
        let mut next = Vec::with_capacity(paths.len() * options.len());
        for path in &paths {
            for &o in options {
                let mut p = path.clone();
                p.push(o);
                next.push(p);
            }
        }
        paths = next;
    }
    paths
}
