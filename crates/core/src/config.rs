use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;
use types::{Course, RunParams, Timeblock};

pub const ENV_PREFIX: &str = "TERMSCHED__SCHEDULER__";

/// Tunables for one scheduling run. Passed explicitly into the requirement
/// calculator, the constraint compiler and the scheduler.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub default_max_class_size: u32,
    pub default_min_class_size: u32,
    pub school_start_time: u32,
    pub school_end_time: u32,
    pub macro_attempts: u32,
    pub micro_attempts: u32,
    pub solver_timeout_secs: u64,
    pub seed: u64,
    pub max_course_paths: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_max_class_size: 30,
            default_min_class_size: 0,
            school_start_time: 0,
            school_end_time: types::LAST_MINUTE,
            macro_attempts: 50,
            micro_attempts: 30,
            solver_timeout_secs: 300,
            seed: 0,
            max_course_paths: 4096,
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Overlays `TERMSCHED__SCHEDULER__<FIELD>` values on the defaults.
    /// Unparsable values are logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn read<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            field: &str,
            slot: &mut T,
        ) {
            let key = format!("{ENV_PREFIX}{field}");
            if let Some(raw) = lookup(&key) {
                match raw.trim().parse::<T>() {
                    Ok(v) => *slot = v,
                    Err(_) => warn!(%key, %raw, "ignoring unparsable config value"),
                }
            }
        }

        let mut cfg = Self::default();
        read(&lookup, "DEFAULT_MAX_CLASS_SIZE", &mut cfg.default_max_class_size);
        read(&lookup, "DEFAULT_MIN_CLASS_SIZE", &mut cfg.default_min_class_size);
        read(&lookup, "SCHOOL_START_TIME", &mut cfg.school_start_time);
        read(&lookup, "SCHOOL_END_TIME", &mut cfg.school_end_time);
        read(&lookup, "MACRO_ATTEMPTS", &mut cfg.macro_attempts);
        read(&lookup, "MICRO_ATTEMPTS", &mut cfg.micro_attempts);
        read(&lookup, "SOLVER_TIMEOUT_SECS", &mut cfg.solver_timeout_secs);
        read(&lookup, "SEED", &mut cfg.seed);
        read(&lookup, "MAX_COURSE_PATHS", &mut cfg.max_course_paths);
        cfg
    }

    pub fn with_params(mut self, params: &RunParams) -> Self {
        if let Some(seed) = params.seed {
            self.seed = seed;
        }
        if let Some(n) = params.macro_attempts {
            self.macro_attempts = n;
        }
        if let Some(n) = params.micro_attempts {
            self.micro_attempts = n;
        }
        self
    }

    pub fn max_class_size(&self, course: &Course) -> u32 {
        course
            .max_student_count
            .unwrap_or(self.default_max_class_size)
            .max(1)
    }

    pub fn min_class_size(&self, course: &Course) -> u32 {
        course
            .min_student_count
            .unwrap_or(self.default_min_class_size)
    }

    pub fn solver_timeout(&self) -> Duration {
        Duration::from_secs(self.solver_timeout_secs)
    }

    pub fn in_school_day(&self, tb: &Timeblock) -> bool {
        tb.within(Some(self.school_start_time), Some(self.school_end_time))
    }
}
