use std::collections::HashMap;

use domain::{
    error::{SchedulerError, ValidationError},
    model::{entity::JobInfo, vo::JobTemplate},
    service::{escape_for_shell, CommandOutput, SchedulerBackend, Transport},
};

/// Backend-agnostic half of a batch scheduler.
///
/// Holds no job state; it can be reused for any number of scripts and polls as
/// long as the bound transport session stays open. Not meant to be shared
/// between tasks: each session owns one transport and one scheduler.
pub struct Scheduler {
    backend: Box<dyn SchedulerBackend>,
    transport: Option<Box<dyn Transport>>,
}

impl Scheduler {
    pub fn new(backend: Box<dyn SchedulerBackend>) -> Self {
        Self {
            backend,
            transport: None,
        }
    }

    #[inline]
    pub fn backend(&self) -> &dyn SchedulerBackend {
        self.backend.as_ref()
    }

    /// Bind an open transport, handing back the one bound before, if any.
    pub fn set_transport(&mut self, transport: Box<dyn Transport>) -> Option<Box<dyn Transport>> {
        self.transport.replace(transport)
    }

    pub fn take_transport(&mut self) -> Option<Box<dyn Transport>> {
        self.transport.take()
    }

    /// Shebang, backend header, blank line, prepend text, run line, append text.
    pub fn build_submission_script(&self, template: &JobTemplate) -> Result<String, ValidationError> {
        validate(template)?;

        let header = self.backend.generate_header(template)?;
        let mut script = String::from("#!/bin/bash\n");
        push_block(&mut script, &header);
        script.push('\n');

        if let Some(prepend) = &template.prepend_text {
            push_block(&mut script, prepend);
        }
        script.push_str(&build_run_line(
            &template.argv,
            template.stdin_name.as_deref(),
            template.stdout_name.as_deref(),
            template.stderr_name.as_deref(),
            template.join_files,
        ));
        script.push('\n');
        if let Some(append) = &template.append_text {
            push_block(&mut script, append);
        }

        Ok(script)
    }

    /// Status of `job_ids`, or of every job visible to `user` (or the account) if none are given.
    ///
    /// Jobs the batch system no longer knows about are simply missing from the result.
    pub async fn get_job_status(
        &self,
        job_ids: Option<&[String]>,
        user: Option<&str>,
    ) -> Result<HashMap<String, JobInfo>, SchedulerError> {
        let transport = self.transport.as_deref().ok_or(SchedulerError::NotBound)?;

        let command = self.backend.generate_listing_command(job_ids, user);
        tracing::debug!(scheduler = self.backend.name(), %command, "Listing jobs");
        let output = transport.execute_and_wait(&command, None).await?;
        check_output(self.backend.name(), &command, &output)?;

        let jobs = self.backend.parse_listing_output(&output).map_err(|e| {
            tracing::error!(
                scheduler = self.backend.name(),
                stdout = %output.stdout,
                stderr = %output.stderr,
                "Unable to parse job listing: {e}"
            );
            e
        })?;
        tracing::debug!(scheduler = self.backend.name(), count = jobs.len(), "Parsed job listing");
        Ok(jobs)
    }

    /// Submit `script_filename` from `working_directory` and return the new job id.
    ///
    /// Leaves the transport in `working_directory`.
    pub async fn submit(
        &mut self,
        working_directory: &str,
        script_filename: &str,
    ) -> Result<String, SchedulerError> {
        let transport = self.transport.as_deref_mut().ok_or(SchedulerError::NotBound)?;
        transport.change_directory(working_directory).await?;

        let command = self.backend.generate_submit_command(&escape_for_shell(script_filename));
        tracing::debug!(scheduler = self.backend.name(), %command, working_directory, "Submitting job");
        let output = transport.execute_and_wait(&command, None).await?;
        check_output(self.backend.name(), &command, &output)?;

        let job_id = self.backend.parse_submit_output(&output)?;
        tracing::info!(scheduler = self.backend.name(), %job_id, "Job submitted");
        Ok(job_id)
    }
}

/// Escape every argument and append the requested redirections.
///
/// With `join_files` stderr goes to stdout and `stderr_name` is ignored.
pub fn build_run_line(
    argv: &[String],
    stdin_name: Option<&str>,
    stdout_name: Option<&str>,
    stderr_name: Option<&str>,
    join_files: bool,
) -> String {
    let mut line = argv
        .iter()
        .map(|arg| escape_for_shell(arg))
        .collect::<Vec<_>>()
        .join(" ");

    if let Some(stdin) = stdin_name {
        line.push_str(" < ");
        line.push_str(&escape_for_shell(stdin));
    }
    if let Some(stdout) = stdout_name {
        line.push_str(" > ");
        line.push_str(&escape_for_shell(stdout));
    }
    if join_files {
        line.push_str(" 2>&1");
    } else if let Some(stderr) = stderr_name {
        line.push_str(" 2> ");
        line.push_str(&escape_for_shell(stderr));
    }
    line
}

fn validate(template: &JobTemplate) -> Result<(), ValidationError> {
    match template.num_machines {
        None => return Err(ValidationError::MissingField("num_machines")),
        Some(0) => return Err(ValidationError::NotPositive("num_machines")),
        Some(_) => (),
    }
    if template.num_cpus_per_machine == Some(0) {
        return Err(ValidationError::NotPositive("num_cpus_per_machine"));
    }
    if template.max_wallclock_seconds == Some(0) {
        return Err(ValidationError::NotPositive("max_wallclock_seconds"));
    }
    if template.max_memory_kb == Some(0) {
        return Err(ValidationError::NotPositive("max_memory_kb"));
    }
    if template.argv.is_empty() {
        return Err(ValidationError::EmptyArgv);
    }
    Ok(())
}

fn push_block(script: &mut String, block: &str) {
    script.push_str(block);
    if !block.is_empty() && !block.ends_with('\n') {
        script.push('\n');
    }
}

/// A non-zero return code is never tolerated; stderr alone only warrants a warning.
fn check_output(
    scheduler: &str,
    command: &str,
    output: &CommandOutput,
) -> Result<(), SchedulerError> {
    if !output.success() {
        tracing::error!(
            scheduler,
            command,
            return_code = output.return_code,
            stdout = %output.stdout,
            stderr = %output.stderr,
            "Scheduler command failed"
        );
        return Err(SchedulerError::ReturnCode {
            command: command.to_owned(),
            return_code: output.return_code,
            stdout: output.stdout.clone(),
            stderr: output.stderr.clone(),
        });
    }
    if !output.stderr.trim().is_empty() {
        tracing::warn!(scheduler, command, stderr = %output.stderr, "Scheduler command wrote to stderr");
    }
    Ok(())
}
