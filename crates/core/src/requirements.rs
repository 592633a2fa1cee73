use std::collections::BTreeMap;
use types::{
    CourseId, EntityKind, LinkKind, Priority, Severity, StudentId, TimeblockId,
};

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::notes::NoteSink;
use crate::store::EntityStore;
use crate::tier::TieredIds;

/// Tiered course requirements of one student.
#[derive(Clone, Debug)]
pub struct StudentConstraint {
    pub student_id: StudentId,
    pub courses: TieredIds<CourseId>,
}

impl StudentConstraint {
    /// Direct course links, then one course per linked subject that nothing
    /// collected so far covers, then the same two steps through every group
    /// the student belongs to. `Not` course rows are removed everywhere.
    pub fn derive(store: &dyn EntityStore, student_id: StudentId) -> Self {
        let sid = student_id.0;
        let groups = store.forward(LinkKind::StudentStudentGroup, sid, None);

        let mut excluded = store.forward(LinkKind::StudentCourse, sid, Some(Priority::Not));
        for &g in &groups {
            excluded.extend(store.forward(LinkKind::StudentGroupCourse, g, Some(Priority::Not)));
        }

        let mut courses: TieredIds<u32> = TieredIds::default();
        let add = |courses: &mut TieredIds<u32>, p: Priority, id: u32| {
            let slot = match p {
                Priority::Mandatory => &mut courses.mandatory,
                Priority::High => &mut courses.high,
                _ => &mut courses.low,
            };
            if !excluded.contains(&id) && !slot.contains(&id) {
                slot.push(id);
            }
        };
        let pick_for_subject = |courses: &TieredIds<u32>, subject: u32| -> Option<u32> {
            let options = store.reverse(LinkKind::CourseSubject, subject, None);
            if options.iter().any(|c| courses.iter().any(|have| have == c)) {
                return None;
            }
            options.into_iter().find(|c| !excluded.contains(c))
        };

        for p in Priority::TIERS {
            for c in store.forward(LinkKind::StudentCourse, sid, Some(p)) {
                add(&mut courses, p, c);
            }
        }
        for p in Priority::TIERS {
            for subject in store.forward(LinkKind::StudentSubject, sid, Some(p)) {
                if let Some(c) = pick_for_subject(&courses, subject) {
                    add(&mut courses, p, c);
                }
            }
        }
        for &g in &groups {
            for p in Priority::TIERS {
                for c in store.forward(LinkKind::StudentGroupCourse, g, Some(p)) {
                    add(&mut courses, p, c);
                }
            }
        }
        for &g in &groups {
            for p in Priority::TIERS {
                for subject in store.forward(LinkKind::StudentGroupSubject, g, Some(p)) {
                    if let Some(c) = pick_for_subject(&courses, subject) {
                        add(&mut courses, p, c);
                    }
                }
            }
        }

        Self {
            student_id,
            courses: courses.map(CourseId),
        }
    }

    /// Every required course, tightest tier first, without repeats.
    pub fn required_course_ids(&self) -> Vec<CourseId> {
        self.courses.all()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StudentRequirements {
    pub student_id: StudentId,
    pub required_course_ids: Vec<CourseId>,
}

pub struct RequirementCalculator<'a> {
    store: &'a dyn EntityStore,
    config: &'a SchedulerConfig,
    notes: &'a dyn NoteSink,
}

impl<'a> RequirementCalculator<'a> {
    pub fn new(
        store: &'a dyn EntityStore,
        config: &'a SchedulerConfig,
        notes: &'a dyn NoteSink,
    ) -> Self {
        Self {
            store,
            config,
            notes,
        }
    }

    /// Timeblocks that fall inside the configured school day.
    pub fn usable_timeblocks(&self) -> Vec<TimeblockId> {
        self.store
            .ids(EntityKind::Timeblock)
            .into_iter()
            .map(TimeblockId)
            .filter(|id| {
                self.store
                    .timeblock(*id)
                    .is_some_and(|tb| self.config.in_school_day(tb))
            })
            .collect()
    }

    pub fn student_requirements(
        &self,
        student_id: StudentId,
        timeblocks: usize,
    ) -> Result<StudentRequirements, SchedulerError> {
        let required = StudentConstraint::derive(self.store, student_id).required_course_ids();
        if required.len() > timeblocks {
            let err = SchedulerError::Overscheduled {
                student: student_id,
                required: required.len(),
                timeblocks,
            };
            self.notes
                .log_note(Severity::Error, "Scheduler", &err.to_string());
            return Err(err);
        }
        if required.len() < timeblocks {
            self.notes.log_note(
                Severity::Warning,
                "Scheduler",
                &format!(
                    "Student {student_id} course requirements are less than the number of timeblocks"
                ),
            );
        }
        Ok(StudentRequirements {
            student_id,
            required_course_ids: required,
        })
    }

    /// Requirements of every student. Fails on the first overscheduled one.
    pub fn all_requirements(&self) -> Result<Vec<StudentRequirements>, SchedulerError> {
        let timeblocks = self.usable_timeblocks().len();
        self.store
            .ids(EntityKind::Student)
            .into_iter()
            .map(|id| self.student_requirements(StudentId(id), timeblocks))
            .collect()
    }

    /// Student count per class instance, per course. A course opens another
    /// instance once the current one is at its maximum size.
    pub fn plan_classes(
        &self,
        requirements: &[StudentRequirements],
    ) -> Result<BTreeMap<CourseId, Vec<u32>>, SchedulerError> {
        let mut plan: BTreeMap<CourseId, Vec<u32>> = BTreeMap::new();
        for req in requirements {
            for &course_id in &req.required_course_ids {
                let course = self.store.course(course_id).ok_or(SchedulerError::UnknownEntity {
                    kind: EntityKind::Course,
                    id: course_id.0,
                })?;
                let max = self.config.max_class_size(course);
                let instances = plan.entry(course_id).or_default();
                match instances.last_mut() {
                    Some(count) if *count < max => *count += 1,
                    _ => instances.push(1),
                }
            }
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notes::NoteBook;
    use crate::store::InMemoryStore;
    use types::{Course, Dataset, Student, StudentGroup, Subject, Timeblock};

    fn dataset(timeblocks: u32) -> Dataset {
        let mut ds = Dataset::default();
        for id in 1..=timeblocks {
            ds.timeblocks.push(Timeblock::new(id, 800 + id * 100, 850 + id * 100));
        }
        ds
    }

    #[test]
    fn subject_fallback_skips_covered_subjects() {
        let mut ds = dataset(5);
        for id in 1..=4 {
            ds.courses.push(Course::new(id, format!("c{id}")));
        }
        ds.students.push(Student::new(1));
        ds.subjects.push(Subject { id: types::SubjectId(9), name: "math".into() });
        ds.subjects.push(Subject { id: types::SubjectId(8), name: "art".into() });
        ds.link(LinkKind::CourseSubject, 2, 9, Priority::Low);
        ds.link(LinkKind::CourseSubject, 3, 9, Priority::Low);
        ds.link(LinkKind::CourseSubject, 4, 8, Priority::Low);
        ds.link(LinkKind::StudentCourse, 1, 3, Priority::Mandatory);
        ds.link(LinkKind::StudentSubject, 1, 9, Priority::Low);
        ds.link(LinkKind::StudentSubject, 1, 8, Priority::High);
        let store = InMemoryStore::new(ds);

        let sc = StudentConstraint::derive(&store, StudentId(1));
        assert_eq!(sc.courses.mandatory, vec![CourseId(3)]);
        assert_eq!(sc.courses.high, vec![CourseId(4)]);
        assert!(sc.courses.low.is_empty());
    }

    #[test]
    fn group_courses_merge_and_not_excludes() {
        let mut ds = dataset(5);
        for id in 1..=3 {
            ds.courses.push(Course::new(id, format!("c{id}")));
        }
        ds.students.push(Student::new(1));
        ds.student_groups.push(StudentGroup { id: types::StudentGroupId(5), name: "g".into() });
        ds.link(LinkKind::StudentStudentGroup, 1, 5, Priority::Low);
        ds.link(LinkKind::StudentCourse, 1, 1, Priority::Low);
        ds.link(LinkKind::StudentGroupCourse, 5, 1, Priority::Low);
        ds.link(LinkKind::StudentGroupCourse, 5, 2, Priority::High);
        ds.link(LinkKind::StudentGroupCourse, 5, 3, Priority::Low);
        ds.link(LinkKind::StudentCourse, 1, 3, Priority::Not);
        let store = InMemoryStore::new(ds);

        let sc = StudentConstraint::derive(&store, StudentId(1));
        assert_eq!(sc.required_course_ids(), vec![CourseId(2), CourseId(1)]);
    }

    #[test]
    fn overscheduled_student_fails_immediately() {
        let mut ds = dataset(5);
        ds.students.push(Student::new(1));
        for id in 1..=6 {
            ds.courses.push(Course::new(id, format!("c{id}")));
            ds.link(LinkKind::StudentCourse, 1, id, Priority::Low);
        }
        let store = InMemoryStore::new(ds);
        let cfg = SchedulerConfig::default();
        let notes = NoteBook::new();
        let calc = RequirementCalculator::new(&store, &cfg, &notes);

        let err = calc.all_requirements().unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Overscheduled { required: 6, timeblocks: 5, .. }
        ));
        assert!(err.is_no_solution());
        assert_eq!(notes.all()[0].severity, Severity::Error);
    }

    #[test]
    fn plan_opens_instance_per_max_size() {
        let mut ds = dataset(2);
        let mut course = Course::new(1, "history");
        course.max_student_count = Some(5);
        ds.courses.push(course);
        for id in 1..=10 {
            ds.students.push(Student::new(id));
            ds.link(LinkKind::StudentCourse, id, 1, Priority::Mandatory);
        }
        let store = InMemoryStore::new(ds);
        let cfg = SchedulerConfig::default();
        let notes = NoteBook::new();
        let calc = RequirementCalculator::new(&store, &cfg, &notes);

        let reqs = calc.all_requirements().unwrap();
        assert_eq!(reqs.len(), 10);
        let plan = calc.plan_classes(&reqs).unwrap();
        assert_eq!(plan.get(&CourseId(1)), Some(&vec![5, 5]));
        // one course over two timeblocks leaves every student under-scheduled
        assert!(notes.all().iter().all(|n| n.severity == Severity::Warning));
    }
}
