use std::collections::HashMap;
use std::fmt::Write;

use domain::{
    error::{SchedulerError, ValidationError},
    model::{entity::JobInfo, vo::JobTemplate},
    service::{escape_for_shell, CommandOutput, SchedulerBackend},
};
use once_cell::sync::Lazy;
use regex::Regex;

use super::{SqueueRecord, FORMAT_FIELDS, SEPARATOR};
use crate::infrastructure::service::job_scheduler::script::{environment_block, sanitize_job_name};

const MAX_JOB_NAME_LEN: usize = 128;

static SUBMITTED: Lazy<Regex> = Lazy::new(|| Regex::new(r"Submitted batch job (\d+)").unwrap());

/// Slurm through `sbatch` and `squeue`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SlurmClient;

impl SchedulerBackend for SlurmClient {
    fn name(&self) -> &'static str {
        "slurm"
    }

    fn generate_header(&self, template: &JobTemplate) -> Result<String, ValidationError> {
        let num_machines = template
            .num_machines
            .ok_or(ValidationError::MissingField("num_machines"))?;

        let mut header = String::new();
        if template.submit_as_hold {
            header.push_str("#SBATCH -H\n");
        }
        header.push_str(if template.rerunnable {
            "#SBATCH --requeue\n"
        } else {
            "#SBATCH --no-requeue\n"
        });
        if let Some(email) = &template.email {
            let _ = writeln!(header, "#SBATCH --mail-user={email}");
        }
        let mut mail_types = Vec::new();
        if template.email_on_started {
            mail_types.push("BEGIN");
        }
        if template.email_on_terminated {
            mail_types.extend(["FAIL", "END"]);
        }
        if !mail_types.is_empty() {
            let _ = writeln!(header, "#SBATCH --mail-type={}", mail_types.join(","));
        }
        if let Some(name) = &template.job_name {
            let _ = writeln!(
                header,
                "#SBATCH --job-name=\"{}\"",
                sanitize_job_name(name, MAX_JOB_NAME_LEN)
            );
        }

        if let Some(path) = &template.sched_output_path {
            let _ = writeln!(header, "#SBATCH --output={path}");
        }
        // Slurm joins both streams unless told otherwise.
        if template.sched_join_files {
            if let Some(path) = &template.sched_error_path {
                tracing::info!(path, "Scheduler error path ignored, joined with output");
            }
        } else if let Some(path) = &template.sched_error_path {
            let _ = writeln!(header, "#SBATCH --error={path}");
        }

        if let Some(partition) = &template.queue_name {
            let _ = writeln!(header, "#SBATCH --partition={partition}");
        }
        if let Some(priority) = template.priority {
            let _ = writeln!(header, "#SBATCH --nice={priority}");
        }

        let _ = writeln!(header, "#SBATCH --nodes={num_machines}");
        if let Some(cpus) = template.num_cpus_per_machine {
            let _ = writeln!(header, "#SBATCH --ntasks-per-node={cpus}");
        }
        if let Some(seconds) = template.max_wallclock_seconds {
            let _ = writeln!(header, "#SBATCH --time={}", format_time_limit(seconds));
        }
        if let Some(memory) = template.max_memory_kb {
            let _ = writeln!(header, "#SBATCH --mem={}", memory.div_ceil(1024));
        }

        header.push_str(&environment_block(&template.job_environment));
        Ok(header)
    }

    fn generate_listing_command(&self, job_ids: Option<&[String]>, user: Option<&str>) -> String {
        let format = FORMAT_FIELDS.join(SEPARATOR);
        let mut command = format!("squeue --noheader -o {}", escape_for_shell(&format));

        if let Some(ids) = job_ids.filter(|ids| !ids.is_empty()) {
            // A single id that left the queue is an error, the same id in a list is not.
            let ids = match ids {
                [id] => format!("{id},{id}"),
                _ => ids.join(","),
            };
            let _ = write!(command, " --jobs={}", escape_for_shell(&ids));
        }
        if let Some(user) = user {
            let _ = write!(command, " -u {}", escape_for_shell(user));
        }
        command
    }

    fn parse_listing_output(
        &self,
        output: &CommandOutput,
    ) -> Result<HashMap<String, JobInfo>, SchedulerError> {
        if !output.success() {
            return Err(SchedulerError::ReturnCode {
                command: "squeue".to_owned(),
                return_code: output.return_code,
                stdout: output.stdout.clone(),
                stderr: output.stderr.clone(),
            });
        }
        let records = SqueueRecord::parse_all(&output.stdout)?;
        JobInfo::index(records.into_iter().map(SqueueRecord::into_job_info))
    }

    fn generate_submit_command(&self, script_path: &str) -> String {
        format!("sbatch {script_path}")
    }

    fn parse_submit_output(&self, output: &CommandOutput) -> Result<String, SchedulerError> {
        SUBMITTED
            .captures(&output.stdout)
            .and_then(|captures| captures.get(1))
            .map(|id| id.as_str().to_owned())
            .ok_or_else(|| {
                SchedulerError::UnexpectedOutput(format!(
                    "no job id in sbatch output: {}",
                    output.stdout.trim()
                ))
            })
    }
}

/// `D-HH:MM:SS` once the limit reaches a day, `HH:MM:SS` below.
fn format_time_limit(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = seconds % 86_400 / 3600;
    let minutes = seconds % 3600 / 60;
    let seconds = seconds % 60;
    if days > 0 {
        format!("{days}-{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    }
}
