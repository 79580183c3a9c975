use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How to submit one job. Fields are filled in incrementally and only
/// validated when a submission script is generated from them.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobTemplate {
    /// Free-form name, sanitized by each backend
    pub job_name: Option<String>,

    pub num_machines: Option<u32>,
    pub num_cpus_per_machine: Option<u32>,
    pub max_wallclock_seconds: Option<u64>,
    pub max_memory_kb: Option<u64>,
    pub queue_name: Option<String>,
    /// Backend-defined range, `None` keeps the scheduler default
    pub priority: Option<i32>,

    /// `argv[0]` is the program to run
    pub argv: Vec<String>,
    /// Relative to the job working directory
    pub stdin_name: Option<String>,
    pub stdout_name: Option<String>,
    pub stderr_name: Option<String>,
    /// Merge stderr into stdout, `stderr_name` is then ignored
    pub join_files: bool,

    /// Verbatim shell text before the run line
    pub prepend_text: Option<String>,
    /// Verbatim shell text after the run line
    pub append_text: Option<String>,
    pub job_environment: BTreeMap<String, String>,
    pub submit_as_hold: bool,
    pub rerunnable: bool,
    pub email: Option<String>,
    pub email_on_started: bool,
    pub email_on_terminated: bool,

    /// Where the batch system writes its own output, distinct from the job's stdout
    pub sched_output_path: Option<String>,
    pub sched_error_path: Option<String>,
    pub sched_join_files: bool,
}
