use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::{JobInfo, JobState};
use crate::model::vo::JobTemplate;

/// Lifecycle of a calculation, wider than the batch system's `JobState`.
#[derive(
    Debug, Default, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CalcState {
    #[default]
    New,
    Submitting,
    #[serde(rename = "WITHSCHEDULER")]
    #[strum(serialize = "WITHSCHEDULER")]
    WithScheduler,
    Finished,
    Retrieving,
    Retrieved,
    Undetermined,
    #[serde(rename = "SUBMISSIONFAILED")]
    #[strum(serialize = "SUBMISSIONFAILED")]
    SubmissionFailed,
}

/// One unit of work tracked from submission until the batch system forgets it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Calculation {
    pub id: Uuid,
    /// Name of the computer in the configuration
    pub computer: String,
    pub state: CalcState,
    pub job_id: Option<String>,
    pub scheduler_state: Option<JobState>,
    pub last_job_info: Option<JobInfo>,
    /// Remote directory the job runs in
    pub working_directory: String,
    #[serde(default = "Calculation::default_submit_script_name")]
    pub submit_script_name: String,
    pub job_template: JobTemplate,
}

impl Calculation {
    pub fn new(
        computer: impl Into<String>,
        working_directory: impl Into<String>,
        job_template: JobTemplate,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            computer: computer.into(),
            state: CalcState::New,
            job_id: None,
            scheduler_state: None,
            last_job_info: None,
            working_directory: working_directory.into(),
            submit_script_name: Self::default_submit_script_name(),
            job_template,
        }
    }

    pub fn default_submit_script_name() -> String {
        "submit.sh".to_owned()
    }

    pub fn set_scheduler_state(&mut self, state: JobState) {
        self.scheduler_state = Some(state);
    }

    pub fn set_last_job_info(&mut self, info: JobInfo) {
        self.last_job_info = Some(info);
    }
}
