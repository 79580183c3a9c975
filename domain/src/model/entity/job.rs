use std::collections::hash_map::Entry;
use std::collections::HashMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// Job state normalized across batch systems.
#[derive(
    Debug, Default, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    #[default]
    Undetermined,
    Queued,
    QueuedHeld,
    Running,
    Suspended,
    Done,
}

/// One machine allocated to a running job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineInfo {
    pub name: String,
    pub num_cpus: u32,
}

/// Snapshot of one job as reported by the batch system during one poll.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    /// Scheduler-native identifier
    pub job_id: String,
    pub job_state: JobState,
    /// Backend-specific refinement of `job_state`, advisory only
    pub job_substate: Option<String>,
    pub title: Option<String>,
    pub annotation: Option<String>,
    pub queue_name: Option<String>,
    pub job_owner: Option<String>,
    pub num_cpus: Option<u32>,
    pub num_machines: Option<u32>,
    pub allocated_machines: Option<Vec<MachineInfo>>,
    /// Absent until the job has started
    pub wallclock_time_seconds: Option<u64>,
    pub requested_wallclock_time_seconds: Option<u64>,
    pub cpu_time: Option<u64>,
    pub submission_time: Option<NaiveDateTime>,
    pub dispatch_time: Option<NaiveDateTime>,
    pub finish_time: Option<NaiveDateTime>,
    pub exit_status: Option<i32>,
    pub terminating_signal: Option<i32>,
}

impl JobInfo {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            ..Self::default()
        }
    }

    /// Index parsed jobs by id. Two entries with the same id make the whole
    /// listing ambiguous, so neither is kept.
    pub fn index(
        jobs: impl IntoIterator<Item = JobInfo>,
    ) -> Result<HashMap<String, JobInfo>, SchedulerError> {
        let mut indexed = HashMap::new();
        for job in jobs {
            match indexed.entry(job.job_id.clone()) {
                Entry::Occupied(entry) => {
                    return Err(SchedulerError::DuplicateJobId(entry.key().clone()))
                }
                Entry::Vacant(entry) => {
                    entry.insert(job);
                }
            }
        }
        Ok(indexed)
    }
}
