//! Per-entity eligibility derived from link rows.
//!
//! Constraints form a tree: a class points at teacher and classroom nodes,
//! a teacher points at classroom nodes. Teacher and classroom nodes are
//! shared per entity id, so widening one widens it for every class that
//! refers to it.

use std::collections::HashMap;
use types::{
    ClassroomId, Course, CourseId, EntityKind, LinkKind, Priority, Severity, TeacherId,
    TimeblockId,
};

use crate::notes::NoteSink;
use crate::store::EntityStore;
use crate::tier::{TierBuilder, TieredIds};

const NOTE_SUBJECT: &str = "Scheduler";
const ROWS: [Priority; 4] = [
    Priority::Mandatory,
    Priority::High,
    Priority::Low,
    Priority::Not,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Clone, Debug)]
pub struct ClassroomNode {
    pub classroom_id: ClassroomId,
    pub timeblocks: TieredIds<TimeblockId>,
}

#[derive(Clone, Debug)]
pub struct TeacherNode {
    pub teacher_id: TeacherId,
    pub timeblocks: TieredIds<TimeblockId>,
    pub classrooms: TieredIds<NodeId>,
}

#[derive(Clone, Debug)]
pub struct ClassNode {
    pub course_id: CourseId,
    pub course_name: String,
    /// Position of the class instance in the compiled variable set.
    pub index: usize,
    pub student_count: u32,
    pub timeblocks: TieredIds<TimeblockId>,
    pub classrooms: TieredIds<NodeId>,
    pub teachers: TieredIds<NodeId>,
}

#[derive(Clone, Debug)]
pub enum Node {
    Classroom(ClassroomNode),
    Teacher(TeacherNode),
    Class(ClassNode),
}

#[derive(Clone, Copy)]
enum Dir {
    Forward,
    Reverse,
}

fn collect(
    b: &mut TierBuilder<u32>,
    store: &dyn EntityStore,
    kind: LinkKind,
    id: u32,
    dir: Dir,
) {
    for p in ROWS {
        let ids = match dir {
            Dir::Forward => store.forward(kind, id, Some(p)),
            Dir::Reverse => store.reverse(kind, id, Some(p)),
        };
        b.extend(p, ids);
    }
}

/// Timeblock tiers from a direct link table plus every linked subject.
fn timeblock_tiers(
    store: &dyn EntityStore,
    direct: LinkKind,
    id: u32,
    subjects: &[u32],
) -> TieredIds<TimeblockId> {
    let mut b = TierBuilder::new();
    collect(&mut b, store, direct, id, Dir::Forward);
    for &s in subjects {
        collect(&mut b, store, LinkKind::SubjectTimeblock, s, Dir::Forward);
    }
    b.build(Some(store.ids(EntityKind::Timeblock)))
        .map(TimeblockId)
}

/// Arena of constraint nodes for one scheduling run.
#[derive(Clone, Debug, Default)]
pub struct ConstraintTree {
    nodes: Vec<Node>,
    teachers: HashMap<TeacherId, NodeId>,
    classrooms: HashMap<ClassroomId, NodeId>,
}

impl ConstraintTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn class(&self, id: NodeId) -> Option<&ClassNode> {
        match &self.nodes[id.0] {
            Node::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn class_mut(&mut self, id: NodeId) -> Option<&mut ClassNode> {
        match &mut self.nodes[id.0] {
            Node::Class(c) => Some(c),
            _ => None,
        }
    }

    /// Shared classroom node for `id`.
    pub fn classroom(&mut self, store: &dyn EntityStore, id: ClassroomId) -> NodeId {
        if let Some(n) = self.classrooms.get(&id) {
            return *n;
        }
        let subjects = store.forward(LinkKind::ClassroomSubject, id.0, None);
        let timeblocks = timeblock_tiers(store, LinkKind::ClassroomTimeblock, id.0, &subjects);
        let n = self.push(Node::Classroom(ClassroomNode {
            classroom_id: id,
            timeblocks,
        }));
        self.classrooms.insert(id, n);
        n
    }

    /// Shared teacher node for `id`, with its classroom children.
    pub fn teacher(&mut self, store: &dyn EntityStore, id: TeacherId) -> NodeId {
        if let Some(n) = self.teachers.get(&id) {
            return *n;
        }
        let subjects = store.forward(LinkKind::TeacherSubject, id.0, None);
        let timeblocks = timeblock_tiers(store, LinkKind::TeacherTimeblock, id.0, &subjects);

        let mut rooms = TierBuilder::new();
        collect(&mut rooms, store, LinkKind::TeacherClassroom, id.0, Dir::Forward);
        for &s in &subjects {
            collect(&mut rooms, store, LinkKind::ClassroomSubject, s, Dir::Reverse);
        }
        let classrooms = rooms
            .build(Some(store.ids(EntityKind::Classroom)))
            .map(|r| self.classroom(store, ClassroomId(r)));

        let n = self.push(Node::Teacher(TeacherNode {
            teacher_id: id,
            timeblocks,
            classrooms,
        }));
        self.teachers.insert(id, n);
        n
    }

    /// New class instance of `course`. Never shared.
    pub fn add_class(&mut self, store: &dyn EntityStore, course: &Course, index: usize) -> NodeId {
        let cid = course.id.0;
        let subjects = store.forward(LinkKind::CourseSubject, cid, None);
        let timeblocks = timeblock_tiers(store, LinkKind::CourseTimeblock, cid, &subjects);

        let mut rooms = TierBuilder::new();
        collect(&mut rooms, store, LinkKind::CourseClassroom, cid, Dir::Forward);
        let mut teachers = TierBuilder::new();
        collect(&mut teachers, store, LinkKind::CourseTeacher, cid, Dir::Forward);
        for &s in &subjects {
            collect(&mut rooms, store, LinkKind::ClassroomSubject, s, Dir::Reverse);
            collect(&mut teachers, store, LinkKind::TeacherSubject, s, Dir::Reverse);
        }
        let classrooms = rooms
            .build(Some(store.ids(EntityKind::Classroom)))
            .map(|r| self.classroom(store, ClassroomId(r)));
        let teachers = teachers
            .build(Some(store.ids(EntityKind::Teacher)))
            .map(|t| self.teacher(store, TeacherId(t)));

        self.push(Node::Class(ClassNode {
            course_id: course.id,
            course_name: course.name.clone(),
            index,
            student_count: 0,
            timeblocks,
            classrooms,
            teachers,
        }))
    }

    pub fn timeblock_ids(&self, id: NodeId) -> Vec<TimeblockId> {
        let tiers = match &self.nodes[id.0] {
            Node::Classroom(n) => &n.timeblocks,
            Node::Teacher(n) => &n.timeblocks,
            Node::Class(n) => &n.timeblocks,
        };
        tiers.tightest().to_vec()
    }

    /// Tightest classroom children; empty for classroom nodes.
    pub fn classroom_nodes(&self, id: NodeId) -> &[NodeId] {
        match &self.nodes[id.0] {
            Node::Classroom(_) => &[],
            Node::Teacher(n) => n.classrooms.tightest(),
            Node::Class(n) => n.classrooms.tightest(),
        }
    }

    pub fn teacher_nodes(&self, id: NodeId) -> &[NodeId] {
        match &self.nodes[id.0] {
            Node::Class(n) => n.teachers.tightest(),
            _ => &[],
        }
    }

    pub fn classroom_ids(&self, id: NodeId) -> Vec<ClassroomId> {
        self.classroom_nodes(id)
            .iter()
            .filter_map(|n| match &self.nodes[n.0] {
                Node::Classroom(c) => Some(c.classroom_id),
                _ => None,
            })
            .collect()
    }

    pub fn teacher_ids(&self, id: NodeId) -> Vec<TeacherId> {
        self.teacher_nodes(id)
            .iter()
            .filter_map(|n| match &self.nodes[n.0] {
                Node::Teacher(t) => Some(t.teacher_id),
                _ => None,
            })
            .collect()
    }

    fn tier_can_relax(&self, tier: &TieredIds<NodeId>) -> bool {
        if !tier.mandatory.is_empty() {
            return false;
        }
        tier.can_relax() || tier.low.iter().any(|c| self.can_relax(*c))
    }

    /// True when `relax` would change something below `id`.
    pub fn can_relax(&self, id: NodeId) -> bool {
        match &self.nodes[id.0] {
            Node::Classroom(n) => n.timeblocks.can_relax(),
            Node::Teacher(n) => self.tier_can_relax(&n.classrooms) || n.timeblocks.can_relax(),
            Node::Class(n) => {
                self.tier_can_relax(&n.teachers)
                    || self.tier_can_relax(&n.classrooms)
                    || n.timeblocks.can_relax()
            }
        }
    }

    /// Widens one tier at or below `id`: teachers first, then classrooms,
    /// then timeblocks. Returns false when nothing is left to relax.
    pub fn relax(&mut self, id: NodeId, notes: &dyn NoteSink) -> bool {
        let index = match &self.nodes[id.0] {
            Node::Class(c) => c.index,
            _ => 0,
        };
        self.relax_node(id, index, notes)
    }

    fn relax_children(&mut self, children: Vec<NodeId>, class: usize, notes: &dyn NoteSink) -> bool {
        for c in children {
            if self.can_relax(c) {
                return self.relax_node(c, class, notes);
            }
        }
        false
    }

    fn relax_node(&mut self, id: NodeId, class: usize, notes: &dyn NoteSink) -> bool {
        match self.nodes[id.0].clone() {
            Node::Classroom(n) => {
                if n.timeblocks.can_relax() {
                    if let Node::Classroom(m) = &mut self.nodes[id.0] {
                        m.timeblocks.relax();
                    }
                    notes.log_note(
                        Severity::Info,
                        NOTE_SUBJECT,
                        &format!(
                            "Relaxing the classroom->timeblock constraints for class {class} (classroom: {})",
                            n.classroom_id
                        ),
                    );
                    return true;
                }
                false
            }
            Node::Teacher(n) => {
                if n.classrooms.mandatory.is_empty() {
                    if n.classrooms.can_relax() {
                        if let Node::Teacher(m) = &mut self.nodes[id.0] {
                            m.classrooms.relax();
                        }
                        notes.log_note(
                            Severity::Info,
                            NOTE_SUBJECT,
                            &format!(
                                "Relaxing the teacher->classroom constraints for class {class} (teacher: {})",
                                n.teacher_id
                            ),
                        );
                        return true;
                    }
                    if self.relax_children(n.classrooms.low.clone(), class, notes) {
                        return true;
                    }
                }
                if n.timeblocks.can_relax() {
                    if let Node::Teacher(m) = &mut self.nodes[id.0] {
                        m.timeblocks.relax();
                    }
                    notes.log_note(
                        Severity::Info,
                        NOTE_SUBJECT,
                        &format!(
                            "Relaxing the teacher->timeblock constraints for class {class} (teacher: {})",
                            n.teacher_id
                        ),
                    );
                    return true;
                }
                false
            }
            Node::Class(n) => {
                let label = format!("class {class} (course: {} {})", n.course_id, n.course_name);
                if n.teachers.mandatory.is_empty() {
                    if n.teachers.can_relax() {
                        if let Node::Class(m) = &mut self.nodes[id.0] {
                            m.teachers.relax();
                        }
                        notes.log_note(
                            Severity::Info,
                            NOTE_SUBJECT,
                            &format!("Relaxing the course->teacher constraints for {label}"),
                        );
                        return true;
                    }
                    if self.relax_children(n.teachers.low.clone(), class, notes) {
                        return true;
                    }
                }
                if n.classrooms.mandatory.is_empty() {
                    if n.classrooms.can_relax() {
                        if let Node::Class(m) = &mut self.nodes[id.0] {
                            m.classrooms.relax();
                        }
                        notes.log_note(
                            Severity::Info,
                            NOTE_SUBJECT,
                            &format!("Relaxing the course->classroom constraints for {label}"),
                        );
                        return true;
                    }
                    if self.relax_children(n.classrooms.low.clone(), class, notes) {
                        return true;
                    }
                }
                if n.timeblocks.can_relax() {
                    if let Node::Class(m) = &mut self.nodes[id.0] {
                        m.timeblocks.relax();
                    }
                    notes.log_note(
                        Severity::Info,
                        NOTE_SUBJECT,
                        &format!("Relaxing the course->timeblock constraints for {label}"),
                    );
                    return true;
                }
                false
            }
        }
    }
}
