use anyhow::Result;
use parking_lot::RwLock;
use std::collections::HashMap;
use types::{
    Classroom, ClassroomId, Course, CourseId, Dataset, EntityKind, LinkKind, Priority, Schedule,
    ScheduleId, ScheduledClass, Teacher, TeacherId, Timeblock, TimeblockId,
};

/// Read side of the entity store.
///
/// `priority = None` selects every active row whose priority is not `Not`.
/// Results keep insertion order and may contain duplicates if the data does.
pub trait EntityStore {
    fn term(&self) -> &str;
    /// Right ids linked from `left`.
    fn forward(&self, kind: LinkKind, left: u32, priority: Option<Priority>) -> Vec<u32>;
    /// Left ids linked to `right`.
    fn reverse(&self, kind: LinkKind, right: u32, priority: Option<Priority>) -> Vec<u32>;
    fn ids(&self, kind: EntityKind) -> Vec<u32>;
    fn course(&self, id: CourseId) -> Option<&Course>;
    fn teacher(&self, id: TeacherId) -> Option<&Teacher>;
    fn classroom(&self, id: ClassroomId) -> Option<&Classroom>;
    fn timeblock(&self, id: TimeblockId) -> Option<&Timeblock>;
}

type LinkIndex = HashMap<(LinkKind, u32), Vec<(u32, Priority)>>;

pub struct InMemoryStore {
    data: Dataset,
    forward: LinkIndex,
    reverse: LinkIndex,
    courses: HashMap<CourseId, usize>,
    teachers: HashMap<TeacherId, usize>,
    classrooms: HashMap<ClassroomId, usize>,
    timeblocks: HashMap<TimeblockId, usize>,
}

impl InMemoryStore {
    pub fn new(data: Dataset) -> Self {
        let mut forward: LinkIndex = HashMap::new();
        let mut reverse: LinkIndex = HashMap::new();
        for l in data.links.iter().filter(|l| l.active) {
            forward
                .entry((l.kind, l.left_id))
                .or_default()
                .push((l.right_id, l.priority));
            reverse
                .entry((l.kind, l.right_id))
                .or_default()
                .push((l.left_id, l.priority));
        }
        let courses = data.courses.iter().enumerate().map(|(i, c)| (c.id, i)).collect();
        let teachers = data.teachers.iter().enumerate().map(|(i, t)| (t.id, i)).collect();
        let classrooms = data.classrooms.iter().enumerate().map(|(i, r)| (r.id, i)).collect();
        let timeblocks = data.timeblocks.iter().enumerate().map(|(i, t)| (t.id, i)).collect();
        Self {
            data,
            forward,
            reverse,
            courses,
            teachers,
            classrooms,
            timeblocks,
        }
    }

    pub fn dataset(&self) -> &Dataset {
        &self.data
    }

    fn select(index: &LinkIndex, kind: LinkKind, id: u32, priority: Option<Priority>) -> Vec<u32> {
        let Some(rows) = index.get(&(kind, id)) else {
            return Vec::new();
        };
        rows.iter()
            .filter(|(_, p)| match priority {
                Some(want) => *p == want,
                None => *p != Priority::Not,
            })
            .map(|(other, _)| *other)
            .collect()
    }
}

impl EntityStore for InMemoryStore {
    fn term(&self) -> &str {
        &self.data.term
    }

    fn forward(&self, kind: LinkKind, left: u32, priority: Option<Priority>) -> Vec<u32> {
        Self::select(&self.forward, kind, left, priority)
    }

    fn reverse(&self, kind: LinkKind, right: u32, priority: Option<Priority>) -> Vec<u32> {
        Self::select(&self.reverse, kind, right, priority)
    }

    fn ids(&self, kind: EntityKind) -> Vec<u32> {
        let d = &self.data;
        match kind {
            EntityKind::Course => d.courses.iter().map(|x| x.id.0).collect(),
            EntityKind::Teacher => d.teachers.iter().map(|x| x.id.0).collect(),
            EntityKind::Classroom => d.classrooms.iter().map(|x| x.id.0).collect(),
            EntityKind::Timeblock => d.timeblocks.iter().map(|x| x.id.0).collect(),
            EntityKind::Student => d.students.iter().map(|x| x.id.0).collect(),
            EntityKind::StudentGroup => d.student_groups.iter().map(|x| x.id.0).collect(),
            EntityKind::Subject => d.subjects.iter().map(|x| x.id.0).collect(),
        }
    }

    fn course(&self, id: CourseId) -> Option<&Course> {
        self.courses.get(&id).map(|&i| &self.data.courses[i])
    }

    fn teacher(&self, id: TeacherId) -> Option<&Teacher> {
        self.teachers.get(&id).map(|&i| &self.data.teachers[i])
    }

    fn classroom(&self, id: ClassroomId) -> Option<&Classroom> {
        self.classrooms.get(&id).map(|&i| &self.data.classrooms[i])
    }

    fn timeblock(&self, id: TimeblockId) -> Option<&Timeblock> {
        self.timeblocks.get(&id).map(|&i| &self.data.timeblocks[i])
    }
}

/// Write side: persists one finished schedule.
pub trait ScheduleSink: Send + Sync {
    fn save(&self, name: &str, classes: &[ScheduledClass]) -> Result<ScheduleId>;
}

#[derive(Default)]
pub struct MemorySchedules {
    inner: RwLock<Vec<Schedule>>,
}

impl MemorySchedules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self) -> Vec<Schedule> {
        self.inner.read().clone()
    }

    pub fn get(&self, id: ScheduleId) -> Option<Schedule> {
        self.inner.read().iter().find(|s| s.id == id).cloned()
    }
}

impl ScheduleSink for MemorySchedules {
    fn save(&self, name: &str, classes: &[ScheduledClass]) -> Result<ScheduleId> {
        let mut w = self.inner.write();
        let id = ScheduleId(w.len() as u32 + 1);
        w.push(Schedule {
            id,
            name: name.to_string(),
            classes: classes.to_vec(),
        });
        Ok(id)
    }
}
