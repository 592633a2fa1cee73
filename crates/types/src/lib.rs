use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Clone,
            Copy,
            Debug,
            Serialize,
            Deserialize,
            ToSchema,
            JsonSchema,
            Eq,
            PartialEq,
            Hash,
            Ord,
            PartialOrd,
        )]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<u32> for $name {
            fn from(raw: u32) -> Self {
                Self(raw)
            }
        }
    };
}
id_newtype!(CourseId);
id_newtype!(TeacherId);
id_newtype!(ClassroomId);
id_newtype!(TimeblockId);
id_newtype!(StudentId);
id_newtype!(StudentGroupId);
id_newtype!(SubjectId);
id_newtype!(ScheduleId);

/// Latest representable wall-clock time in 24-hour `HHMM` form.
pub const LAST_MINUTE: u32 = 2359;

#[derive(
    Clone, Copy, Debug, Serialize, Deserialize, ToSchema, JsonSchema, Eq, PartialEq, Hash, Ord,
    PartialOrd,
)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

/// Strength of a link row. `Not` excludes the linked id from every tier.
#[derive(
    Clone, Copy, Debug, Serialize, Deserialize, ToSchema, JsonSchema, Eq, PartialEq, Hash, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Mandatory,
    High,
    #[default]
    Low,
    Not,
}

impl Priority {
    /// Inclusion tiers, tightest first.
    pub const TIERS: [Priority; 3] = [Priority::Mandatory, Priority::High, Priority::Low];
}

#[derive(
    Clone, Copy, Debug, Serialize, Deserialize, ToSchema, JsonSchema, Eq, PartialEq, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Course,
    Teacher,
    Classroom,
    Timeblock,
    Student,
    StudentGroup,
    Subject,
}

/// Relationship tables. The first entity named is the link's `left_id`.
#[derive(
    Clone, Copy, Debug, Serialize, Deserialize, ToSchema, JsonSchema, Eq, PartialEq, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    CourseTeacher,
    CourseClassroom,
    CourseTimeblock,
    CourseSubject,
    StudentCourse,
    StudentSubject,
    StudentStudentGroup,
    StudentGroupCourse,
    StudentGroupSubject,
    TeacherSubject,
    TeacherTimeblock,
    TeacherClassroom,
    ClassroomSubject,
    ClassroomTimeblock,
    SubjectTimeblock,
}

impl LinkKind {
    pub fn endpoints(self) -> (EntityKind, EntityKind) {
        use EntityKind as E;
        match self {
            LinkKind::CourseTeacher => (E::Course, E::Teacher),
            LinkKind::CourseClassroom => (E::Course, E::Classroom),
            LinkKind::CourseTimeblock => (E::Course, E::Timeblock),
            LinkKind::CourseSubject => (E::Course, E::Subject),
            LinkKind::StudentCourse => (E::Student, E::Course),
            LinkKind::StudentSubject => (E::Student, E::Subject),
            LinkKind::StudentStudentGroup => (E::Student, E::StudentGroup),
            LinkKind::StudentGroupCourse => (E::StudentGroup, E::Course),
            LinkKind::StudentGroupSubject => (E::StudentGroup, E::Subject),
            LinkKind::TeacherSubject => (E::Teacher, E::Subject),
            LinkKind::TeacherTimeblock => (E::Teacher, E::Timeblock),
            LinkKind::TeacherClassroom => (E::Teacher, E::Classroom),
            LinkKind::ClassroomSubject => (E::Classroom, E::Subject),
            LinkKind::ClassroomTimeblock => (E::Classroom, E::Timeblock),
            LinkKind::SubjectTimeblock => (E::Subject, E::Timeblock),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema, JsonSchema, PartialEq, Eq)]
pub struct Link {
    pub kind: LinkKind,
    pub left_id: u32,
    pub right_id: u32,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl Link {
    pub fn new(kind: LinkKind, left_id: u32, right_id: u32, priority: Priority) -> Self {
        Self {
            kind,
            left_id,
            right_id,
            priority,
            active: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct Course {
    pub id: CourseId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub max_student_count: Option<u32>,
    #[serde(default)]
    pub min_student_count: Option<u32>,
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub avail_start_time: Option<u32>,
    #[serde(default)]
    pub avail_end_time: Option<u32>,
}

impl Course {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id: CourseId(id),
            name: name.into(),
            max_student_count: None,
            min_student_count: None,
            duration: None,
            avail_start_time: None,
            avail_end_time: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct Teacher {
    pub id: TeacherId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub avail_start_time: Option<u32>,
    #[serde(default)]
    pub avail_end_time: Option<u32>,
}

impl Teacher {
    pub fn new(id: u32) -> Self {
        Self {
            id: TeacherId(id),
            name: String::new(),
            avail_start_time: None,
            avail_end_time: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct Classroom {
    pub id: ClassroomId,
    #[serde(default)]
    pub room_number: Option<u32>,
    #[serde(default)]
    pub avail_start_time: Option<u32>,
    #[serde(default)]
    pub avail_end_time: Option<u32>,
}

impl Classroom {
    pub fn new(id: u32) -> Self {
        Self {
            id: ClassroomId(id),
            room_number: None,
            avail_start_time: None,
            avail_end_time: None,
        }
    }
}

/// A fixed interval of the school day; times are `HHMM` integers.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct Timeblock {
    pub id: TimeblockId,
    pub start_time: u32,
    pub end_time: u32,
    #[serde(default)]
    pub days: Vec<DayOfWeek>,
}

impl Timeblock {
    pub fn new(id: u32, start_time: u32, end_time: u32) -> Self {
        Self {
            id: TimeblockId(id),
            start_time,
            end_time,
            days: Vec::new(),
        }
    }

    /// True when the block lies fully inside the optional `[start, end]` window.
    pub fn within(&self, start: Option<u32>, end: Option<u32>) -> bool {
        start.map_or(true, |s| self.start_time >= s) && end.map_or(true, |e| self.end_time <= e)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct Student {
    pub id: StudentId,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

impl Student {
    pub fn new(id: u32) -> Self {
        Self {
            id: StudentId(id),
            first_name: String::new(),
            last_name: String::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct StudentGroup {
    pub id: StudentGroupId,
    #[serde(default)]
    pub name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct Subject {
    pub id: SubjectId,
    #[serde(default)]
    pub name: String,
}

fn default_term() -> String {
    "default".into()
}

/// Everything one scheduling run reads: entities plus their link rows.
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct Dataset {
    #[serde(default = "default_term")]
    pub term: String,
    #[serde(default)]
    pub courses: Vec<Course>,
    #[serde(default)]
    pub teachers: Vec<Teacher>,
    #[serde(default)]
    pub classrooms: Vec<Classroom>,
    #[serde(default)]
    pub timeblocks: Vec<Timeblock>,
    #[serde(default)]
    pub students: Vec<Student>,
    #[serde(default)]
    pub student_groups: Vec<StudentGroup>,
    #[serde(default)]
    pub subjects: Vec<Subject>,
    #[serde(default)]
    pub links: Vec<Link>,
}

impl Dataset {
    pub fn link(&mut self, kind: LinkKind, left_id: u32, right_id: u32, priority: Priority) {
        self.links.push(Link::new(kind, left_id, right_id, priority));
    }
}

/// One solved class instance as persisted.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema, JsonSchema, PartialEq, Eq)]
pub struct ScheduledClass {
    pub course_id: CourseId,
    pub classroom_id: ClassroomId,
    pub teacher_id: TeacherId,
    pub timeblock_id: TimeblockId,
    pub start_time: u32,
    pub end_time: u32,
    #[serde(default)]
    pub days: Vec<DayOfWeek>,
    pub students: Vec<StudentId>,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct Schedule {
    pub id: ScheduleId,
    pub name: String,
    pub classes: Vec<ScheduledClass>,
}

/// A hard-rule breach found when auditing a schedule.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema, JsonSchema, PartialEq)]
pub struct Violation {
    pub r#type: String,
    pub details: serde_json::Value,
}

#[derive(
    Clone, Copy, Debug, Serialize, Deserialize, ToSchema, JsonSchema, Eq, PartialEq, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Success,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Success => "success",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct Notification {
    pub severity: Severity,
    pub subject: String,
    pub message: String,
    pub unread: bool,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, ToSchema, JsonSchema, Default)]
pub enum SolverKind {
    #[default]
    Heuristic,
    Milp,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema, JsonSchema, Default)]
pub struct RunParams {
    #[serde(default)]
    pub solver: SolverKind,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub macro_attempts: Option<u32>,
    #[serde(default)]
    pub micro_attempts: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct ScheduleRequest {
    pub dataset: Dataset,
    #[serde(default)]
    pub params: RunParams,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema, JsonSchema, PartialEq, Eq)]
pub struct RunStats {
    pub rounds: u32,
    pub attempts: u32,
    pub classes_added: u32,
    pub relaxations: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct ScheduleOutcome {
    pub schedule_id: ScheduleId,
    pub classes: Vec<ScheduledClass>,
    pub stats: RunStats,
}
