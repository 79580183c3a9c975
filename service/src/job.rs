use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{ensure, Context};
use domain::{
    model::{
        entity::{CalcState, Calculation, JobInfo, JobState},
        vo::JobTemplate,
    },
    repository::CalculationRepository,
    service::{escape_for_shell, ComputerHandle, ComputerProvider, Transport},
};

use crate::scheduler::Scheduler;

/// Drives calculations through submission and polling.
///
/// Every computer session opens its own transport and scheduler and closes
/// them again before returning, so sessions never share a connection.
pub struct ExecutionManager {
    repo: Arc<dyn CalculationRepository>,
    computers: Arc<dyn ComputerProvider>,
}

impl ExecutionManager {
    pub fn new(repo: Arc<dyn CalculationRepository>, computers: Arc<dyn ComputerProvider>) -> Self {
        Self { repo, computers }
    }

    /// Submit every calculation still in `NEW`.
    pub async fn submit_new(&self) {
        let calculations = match self.repo.get_by_state(CalcState::New).await {
            Ok(x) => x,
            Err(e) => {
                tracing::error!("Unable to load new calculations: {e:#}");
                return;
            }
        };
        for calculation in calculations {
            let id = calculation.id;
            if let Err(e) = self.submit(calculation).await {
                tracing::error!(calculation_id = %id, "Submission failed: {e:#}");
            }
        }
    }

    /// Write the submission script into the calculation's working directory and submit it.
    ///
    /// On failure the calculation ends up in `SUBMISSIONFAILED`.
    pub async fn submit(&self, mut calculation: Calculation) -> anyhow::Result<String> {
        calculation.state = CalcState::Submitting;
        self.repo.update(calculation.clone()).await?;

        match self.try_submit(&calculation).await {
            Ok(job_id) => {
                tracing::info!(calculation_id = %calculation.id, %job_id, "Calculation submitted");
                calculation.job_id = Some(job_id.clone());
                calculation.set_scheduler_state(initial_scheduler_state(&calculation.job_template));
                calculation.state = CalcState::WithScheduler;
                self.repo.update(calculation).await?;
                Ok(job_id)
            }
            Err(e) => {
                calculation.state = CalcState::SubmissionFailed;
                self.repo.update(calculation).await?;
                Err(e)
            }
        }
    }

    /// Poll every computer that has calculations with the scheduler, one session per computer.
    pub async fn update_jobs(&self) {
        tracing::info!("Refreshing state of jobs");
        let calculations = match self.repo.get_by_state(CalcState::WithScheduler).await {
            Ok(x) => x,
            Err(e) => {
                tracing::error!("Unable to load calculations with the scheduler: {e:#}");
                return;
            }
        };

        let mut by_computer = HashMap::<String, Vec<Calculation>>::new();
        for calculation in calculations {
            by_computer.entry(calculation.computer.clone()).or_default().push(calculation);
        }

        let updates = by_computer.into_iter().map(|(computer, calculations)| async move {
            if let Err(e) = self.update_computer(&computer, calculations).await {
                // States stay as they are, the next cycle retries.
                tracing::error!(%computer, "Unable to refresh jobs: {e:#}");
            }
        });
        futures::future::join_all(updates).await;
    }

    /// Every job visible to the computer's configured account.
    pub async fn list_jobs(&self, computer: &str) -> anyhow::Result<HashMap<String, JobInfo>> {
        let ComputerHandle {
            mut transport,
            backend,
            username,
        } = self.computers.computer(computer)?;
        transport.open().await.with_context(|| format!("Unable to connect to {computer}"))?;

        let mut scheduler = Scheduler::new(backend);
        scheduler.set_transport(transport);
        let jobs = scheduler.get_job_status(None, username.as_deref()).await;
        release(&mut scheduler).await;
        Ok(jobs?)
    }

    async fn try_submit(&self, calculation: &Calculation) -> anyhow::Result<String> {
        let ComputerHandle {
            mut transport,
            backend,
            ..
        } = self.computers.computer(&calculation.computer)?;

        let mut scheduler = Scheduler::new(backend);
        // Validate before anything touches the remote side.
        let script = scheduler.build_submission_script(&calculation.job_template)?;

        transport
            .open()
            .await
            .with_context(|| format!("Unable to connect to {}", calculation.computer))?;
        let directory = match stage_script(transport.as_mut(), calculation, &script).await {
            Ok(x) => x,
            Err(e) => {
                close(transport).await;
                return Err(e);
            }
        };

        scheduler.set_transport(transport);
        let job_id = scheduler.submit(&directory, &calculation.submit_script_name).await;
        release(&mut scheduler).await;
        Ok(job_id?)
    }

    async fn update_computer(
        &self,
        computer: &str,
        calculations: Vec<Calculation>,
    ) -> anyhow::Result<()> {
        let job_ids: Vec<String> = calculations.iter().filter_map(|c| c.job_id.clone()).collect();
        let jobs = if job_ids.is_empty() {
            HashMap::new()
        } else {
            self.poll(computer, &job_ids).await?
        };

        for mut calculation in calculations {
            let Some(job_id) = calculation.job_id.clone() else {
                tracing::warn!(calculation_id = %calculation.id, "Calculation with the scheduler has no job id");
                calculation.state = CalcState::Undetermined;
                self.repo.update(calculation).await?;
                continue;
            };

            let info = jobs.get(&job_id);
            let next = next_calc_state(info);
            match info {
                Some(info) => {
                    calculation.set_scheduler_state(info.job_state);
                    calculation.set_last_job_info(info.clone());
                }
                None => tracing::info!(%job_id, "Job no longer known to the scheduler"),
            }
            if next != calculation.state {
                tracing::info!(calculation_id = %calculation.id, %job_id, from = %calculation.state, to = %next, "Calculation state changed");
            }
            calculation.state = next;
            self.repo.update(calculation).await?;
        }
        Ok(())
    }

    async fn poll(
        &self,
        computer: &str,
        job_ids: &[String],
    ) -> anyhow::Result<HashMap<String, JobInfo>> {
        let ComputerHandle {
            mut transport,
            backend,
            ..
        } = self.computers.computer(computer)?;
        transport.open().await.with_context(|| format!("Unable to connect to {computer}"))?;

        let mut scheduler = Scheduler::new(backend);
        scheduler.set_transport(transport);
        let jobs = scheduler.get_job_status(Some(job_ids), None).await;
        release(&mut scheduler).await;
        Ok(jobs?)
    }
}

/// Calculation state implied by the latest snapshot of its job; `None` means the
/// batch system no longer lists it.
pub fn next_calc_state(info: Option<&JobInfo>) -> CalcState {
    match info.map(|info| info.job_state) {
        None | Some(JobState::Done) => CalcState::Finished,
        Some(JobState::Undetermined) => CalcState::Undetermined,
        Some(_) => CalcState::WithScheduler,
    }
}

pub fn initial_scheduler_state(template: &JobTemplate) -> JobState {
    if template.submit_as_hold {
        JobState::QueuedHeld
    } else {
        JobState::Queued
    }
}

/// Create the working directory and pipe the script into it.
///
/// Returns the absolute working directory; a relative one is resolved once,
/// against the directory the transport opened in.
async fn stage_script(
    transport: &mut dyn Transport,
    calculation: &Calculation,
    script: &str,
) -> anyhow::Result<String> {
    let dir = &calculation.working_directory;
    let out = transport
        .execute_and_wait(&format!("mkdir -p {}", escape_for_shell(dir)), None)
        .await?;
    ensure!(
        out.success(),
        "Unable to create working directory {dir}. stderr: {}",
        out.stderr
    );
    transport.change_directory(dir).await?;
    let directory = transport.get_current_directory()?;

    let out = transport
        .execute_and_wait(
            &format!("cat > {}", escape_for_shell(&calculation.submit_script_name)),
            Some(script),
        )
        .await?;
    ensure!(
        out.success(),
        "Unable to write {} in {dir}. stderr: {}",
        calculation.submit_script_name,
        out.stderr
    );
    Ok(directory)
}

async fn release(scheduler: &mut Scheduler) {
    if let Some(transport) = scheduler.take_transport() {
        close(transport).await;
    }
}

async fn close(mut transport: Box<dyn Transport>) {
    if let Err(e) = transport.close().await {
        tracing::warn!("Unable to close transport: {e}");
    }
}
