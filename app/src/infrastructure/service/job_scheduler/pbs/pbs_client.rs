use std::collections::HashMap;
use std::fmt::Write;

use domain::{
    error::{SchedulerError, ValidationError},
    model::{entity::JobInfo, vo::JobTemplate},
    service::{escape_for_shell, CommandOutput, SchedulerBackend},
};

use super::QstatRecord;
use crate::infrastructure::service::job_scheduler::script::{
    environment_block, format_duration, sanitize_job_name,
};

const MAX_JOB_NAME_LEN: usize = 15;

/// PBSPro through `qsub` and `qstat -f`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PbsClient;

impl SchedulerBackend for PbsClient {
    fn name(&self) -> &'static str {
        "pbspro"
    }

    fn generate_header(&self, template: &JobTemplate) -> Result<String, ValidationError> {
        let num_machines = template
            .num_machines
            .ok_or(ValidationError::MissingField("num_machines"))?;

        let mut header = String::new();
        if template.submit_as_hold {
            header.push_str("#PBS -h\n");
        }
        let rerunnable = if template.rerunnable { 'y' } else { 'n' };
        let _ = writeln!(header, "#PBS -r {rerunnable}");
        if let Some(email) = &template.email {
            let _ = writeln!(header, "#PBS -M {email}");
        }
        let mail_points = match (template.email_on_started, template.email_on_terminated) {
            (true, true) => "be",
            (true, false) => "b",
            (false, true) => "e",
            (false, false) => "n",
        };
        let _ = writeln!(header, "#PBS -m {mail_points}");
        if let Some(name) = &template.job_name {
            let _ = writeln!(header, "#PBS -N {}", sanitize_job_name(name, MAX_JOB_NAME_LEN));
        }

        if let Some(path) = &template.sched_output_path {
            let _ = writeln!(header, "#PBS -o {path}");
        }
        if template.sched_join_files {
            header.push_str("#PBS -j oe\n");
            if let Some(path) = &template.sched_error_path {
                tracing::info!(path, "Scheduler error path ignored, joined with output");
            }
        } else if let Some(path) = &template.sched_error_path {
            let _ = writeln!(header, "#PBS -e {path}");
        }

        if let Some(queue) = &template.queue_name {
            let _ = writeln!(header, "#PBS -q {queue}");
        }
        if let Some(priority) = template.priority {
            let _ = writeln!(header, "#PBS -p {priority}");
        }

        let mut select = format!("select={num_machines}");
        if let Some(cpus) = template.num_cpus_per_machine {
            let _ = write!(select, ":ncpus={cpus}");
        }
        if let Some(memory) = template.max_memory_kb {
            let _ = write!(select, ":mem={memory}kb");
        }
        let _ = writeln!(header, "#PBS -l {select}");
        if let Some(seconds) = template.max_wallclock_seconds {
            let _ = writeln!(header, "#PBS -l walltime={}", format_duration(seconds));
        }

        header.push_str(&environment_block(&template.job_environment));
        header.push_str("cd \"$PBS_O_WORKDIR\"\n");
        Ok(header)
    }

    fn generate_listing_command(&self, job_ids: Option<&[String]>, user: Option<&str>) -> String {
        let job_ids = job_ids.unwrap_or_default();
        // Finished jobs stay queryable by id through the job history.
        let mut command = String::from(if job_ids.is_empty() { "qstat -f" } else { "qstat -x -f" });
        if let Some(user) = user {
            let _ = write!(command, " -u {}", escape_for_shell(user));
        }
        for id in job_ids {
            command.push(' ');
            command.push_str(&escape_for_shell(id));
        }
        command
    }

    fn parse_listing_output(
        &self,
        output: &CommandOutput,
    ) -> Result<HashMap<String, JobInfo>, SchedulerError> {
        if !output.success() {
            return Err(SchedulerError::ReturnCode {
                command: "qstat".to_owned(),
                return_code: output.return_code,
                stdout: output.stdout.clone(),
                stderr: output.stderr.clone(),
            });
        }
        let records = QstatRecord::parse_all(&output.stdout)?;
        JobInfo::index(records.into_iter().map(QstatRecord::into_job_info))
    }

    fn generate_submit_command(&self, script_path: &str) -> String {
        format!("qsub {script_path}")
    }

    fn parse_submit_output(&self, output: &CommandOutput) -> Result<String, SchedulerError> {
        output
            .stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| {
                SchedulerError::UnexpectedOutput(format!(
                    "qsub printed no job id, stderr: {}",
                    output.stderr.trim()
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashSet};

    use domain::{
        error::{SchedulerError, ValidationError},
        model::{entity::JobState, vo::JobTemplate},
        service::{CommandOutput, SchedulerBackend},
    };
    use indoc::indoc;
    use service::prelude::Scheduler;

    use super::PbsClient;
    use crate::infrastructure::service::job_scheduler::tests::CannedTransport;

    const QSTAT_F: &str = include_str!("testdata/qstat_f.txt");

    #[test]
    fn parse_sample_listing() {
        let jobs = PbsClient
            .parse_listing_output(&CommandOutput::new(0, QSTAT_F, ""))
            .unwrap();
        assert_eq!(6, jobs.len());

        let running: Vec<_> =
            jobs.values().filter(|j| j.job_state == JobState::Running).collect();
        assert_eq!(2, running.len());
        assert_eq!(
            HashSet::from(["user02", "user3"]),
            running
                .iter()
                .filter_map(|j| j.job_owner.as_deref())
                .collect::<HashSet<_>>()
        );
        assert_eq!(
            2,
            jobs.values().filter(|j| j.job_state == JobState::QueuedHeld).count()
        );
        assert_eq!(2, jobs.values().filter(|j| j.job_state == JobState::Queued).count());
    }

    #[test]
    fn ncpus_not_a_number() {
        let stdout = QSTAT_F.replace("Resource_List.ncpus = 64", "Resource_List.ncpus = N/A");
        let jobs = PbsClient
            .parse_listing_output(&CommandOutput::new(0, stdout, ""))
            .unwrap();
        assert_eq!(6, jobs.len());
        assert_eq!(None, jobs["69301.mycluster"].num_cpus);
        assert_eq!(Some(4), jobs["69301.mycluster"].num_machines);
        assert_eq!(Some(32), jobs["74164.mycluster"].num_cpus);
    }

    #[test]
    fn failing_listing() {
        let err = PbsClient
            .parse_listing_output(&CommandOutput::new(1, QSTAT_F, "qstat: Unknown Job Id"))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::ReturnCode { return_code: 1, .. }));
    }

    #[test]
    fn duplicate_job_ids() {
        let stdout = indoc! {"
            Job Id: 1.server
                job_state = R

            Job Id: 1.server
                job_state = Q
        "};
        let err = PbsClient
            .parse_listing_output(&CommandOutput::new(0, stdout, ""))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateJobId(id) if id == "1.server"));
    }

    #[tokio::test]
    async fn get_job_status_fails_on_return_code() {
        let mut scheduler = Scheduler::new(Box::new(PbsClient));
        let transport = CannedTransport::new([CommandOutput::new(1, QSTAT_F, "")]);
        let log = transport.log.clone();
        scheduler.set_transport(Box::new(transport));

        let ids = ["68350.mycluster".to_owned()];
        let err = scheduler.get_job_status(Some(ids.as_slice()), None).await.unwrap_err();
        assert!(matches!(err, SchedulerError::ReturnCode { return_code: 1, .. }));
        assert_eq!(vec!["qstat -x -f '68350.mycluster'".to_owned()], *log.lock().unwrap());
    }

    #[tokio::test]
    async fn finished_job_from_history() {
        let mut scheduler = Scheduler::new(Box::new(PbsClient));
        let stdout = indoc! {"
            Job Id: 68351.mycluster
                job_state = F
                exit_status = 0
        "};
        let transport = CannedTransport::new([CommandOutput::new(0, stdout, "")]);
        let log = transport.log.clone();
        scheduler.set_transport(Box::new(transport));

        let ids = ["68351.mycluster".to_owned()];
        let jobs = scheduler.get_job_status(Some(ids.as_slice()), None).await.unwrap();
        assert_eq!(JobState::Done, jobs["68351.mycluster"].job_state);
        assert_eq!(Some(0), jobs["68351.mycluster"].exit_status);
        assert_eq!(vec!["qstat -x -f '68351.mycluster'".to_owned()], *log.lock().unwrap());
    }

    #[tokio::test]
    async fn submit_with_qsub() {
        let mut scheduler = Scheduler::new(Box::new(PbsClient));
        let transport = CannedTransport::new([CommandOutput::new(0, "\n74166.mycluster\n", "")]);
        let log = transport.log.clone();
        scheduler.set_transport(Box::new(transport));

        let job_id = scheduler.submit("/scratch/calc", "submit.sh").await.unwrap();
        assert_eq!("74166.mycluster", job_id);
        assert_eq!(vec!["qsub 'submit.sh'".to_owned()], *log.lock().unwrap());
    }

    #[test]
    fn empty_submit_output() {
        let err = PbsClient
            .parse_submit_output(&CommandOutput::new(0, "  \n", "qsub: warning"))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::UnexpectedOutput(_)));
    }

    #[test]
    fn listing_commands() {
        assert_eq!("qstat -f", PbsClient.generate_listing_command(None, None));
        assert_eq!(
            "qstat -x -f -u 'o'\\''neil' '1.srv' '2.srv'",
            PbsClient.generate_listing_command(
                Some(["1.srv".to_owned(), "2.srv".to_owned()].as_slice()),
                Some("o'neil")
            )
        );
    }

    #[test]
    fn pw_submission_script() {
        let template = JobTemplate {
            argv: ["mpirun", "-np", "23", "pw.x", "-npool", "1"]
                .map(str::to_owned)
                .to_vec(),
            stdin_name: Some("input.in".to_owned()),
            num_machines: Some(1),
            max_wallclock_seconds: Some(86_400),
            ..JobTemplate::default()
        };
        let script = Scheduler::new(Box::new(PbsClient))
            .build_submission_script(&template)
            .unwrap();
        assert_eq!(
            indoc! {r#"
                #!/bin/bash
                #PBS -r n
                #PBS -m n
                #PBS -l select=1
                #PBS -l walltime=24:00:00
                cd "$PBS_O_WORKDIR"

                'mpirun' '-np' '23' 'pw.x' '-npool' '1' < 'input.in'
            "#},
            script
        );
    }

    #[test]
    fn full_header() {
        let template = JobTemplate {
            job_name: Some("_relax Si/bulk with a long name".to_owned()),
            num_machines: Some(2),
            num_cpus_per_machine: Some(16),
            max_wallclock_seconds: Some(3_661),
            max_memory_kb: Some(1_048_576),
            queue_name: Some("debug".to_owned()),
            priority: Some(-10),
            job_environment: BTreeMap::from([("OMP_NUM_THREADS".to_owned(), "1".to_owned())]),
            submit_as_hold: true,
            rerunnable: true,
            email: Some("someone@example.org".to_owned()),
            email_on_started: true,
            email_on_terminated: true,
            sched_output_path: Some("sched.out".to_owned()),
            sched_error_path: Some("sched.err".to_owned()),
            sched_join_files: true,
            ..JobTemplate::default()
        };
        assert_eq!(
            indoc! {r#"
                #PBS -h
                #PBS -r y
                #PBS -M someone@example.org
                #PBS -m be
                #PBS -N j_relaxSibulkwi
                #PBS -o sched.out
                #PBS -j oe
                #PBS -q debug
                #PBS -p -10
                #PBS -l select=2:ncpus=16:mem=1048576kb
                #PBS -l walltime=01:01:01
                # ENVIRONMENT VARIABLES BEGIN ###
                export OMP_NUM_THREADS='1'
                # ENVIRONMENT VARIABLES  END  ###
                cd "$PBS_O_WORKDIR"
            "#},
            PbsClient.generate_header(&template).unwrap()
        );
    }

    #[test]
    fn mail_points_and_error_path() {
        let template = JobTemplate {
            num_machines: Some(1),
            email_on_terminated: true,
            sched_error_path: Some("sched.err".to_owned()),
            ..JobTemplate::default()
        };
        let header = PbsClient.generate_header(&template).unwrap();
        assert!(header.contains("#PBS -m e\n"));
        assert!(header.contains("#PBS -e sched.err\n"));
        assert!(!header.contains("#PBS -j"));
    }

    #[test]
    fn header_needs_machines() {
        assert_eq!(
            Err(ValidationError::MissingField("num_machines")),
            PbsClient.generate_header(&JobTemplate::default())
        );
    }
}
