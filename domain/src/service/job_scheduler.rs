use std::collections::HashMap;

use crate::error::{SchedulerError, ValidationError};
use crate::model::entity::JobInfo;
use crate::model::vo::JobTemplate;
use crate::service::transport::CommandOutput;

/// The dialect of one batch system: how to ask it things and how to read its answers.
///
/// Parsers are pure functions of the command output so that a failed poll can be
/// replayed offline from the logged text.
pub trait SchedulerBackend: Send + Sync {
    /// Registry name, used in logs
    fn name(&self) -> &'static str;

    /// Resource directives placed right after the shebang line.
    fn generate_header(&self, template: &JobTemplate) -> Result<String, ValidationError>;

    /// `job_ids` restricts the listing to exactly those jobs, `user` to one account.
    fn generate_listing_command(&self, job_ids: Option<&[String]>, user: Option<&str>) -> String;

    fn parse_listing_output(
        &self,
        output: &CommandOutput,
    ) -> Result<HashMap<String, JobInfo>, SchedulerError>;

    /// `script_path` is already shell-escaped.
    fn generate_submit_command(&self, script_path: &str) -> String;

    fn parse_submit_output(&self, output: &CommandOutput) -> Result<String, SchedulerError>;
}
