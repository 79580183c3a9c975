use std::collections::HashMap;

use domain::{
    error::ParsingError,
    model::entity::{JobInfo, JobState, MachineInfo},
};

use crate::infrastructure::service::job_scheduler::field::{
    parse_int, parse_timestamp, soft, FieldError,
};

const TIME_FORMAT: &str = "%a %b %d %H:%M:%S %Y";

/// One `Job Id:` block of `qstat -f`, keys lower-cased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QstatRecord {
    pub job_id: String,
    pub attributes: HashMap<String, String>,
}

struct RawRecord {
    job_id: String,
    lines: Vec<(usize, String)>,
}

impl QstatRecord {
    /// Split the full `qstat -f` output into records.
    ///
    /// Lines starting with a TAB continue the previous attribute. Noise before
    /// the first record is skipped; an attribute line without `=` is an error.
    pub fn parse_all(stdout: &str) -> Result<Vec<Self>, ParsingError> {
        let mut records = Vec::new();
        let mut current: Option<RawRecord> = None;

        for (index, line) in stdout.lines().enumerate() {
            let line_number = index + 1;

            if let Some(job_id) = line.strip_prefix("Job Id:") {
                let job_id = job_id.trim();
                if job_id.is_empty() {
                    return Err(ParsingError::new(line_number, line, "empty job id"));
                }
                records.extend(current.replace(RawRecord {
                    job_id: job_id.to_owned(),
                    lines: Vec::new(),
                }));
                continue;
            }
            if line.trim().is_empty() {
                continue;
            }

            let Some(record) = current.as_mut() else {
                tracing::warn!(line_number, line, "Ignoring qstat output before the first job");
                continue;
            };
            match line.strip_prefix('\t') {
                Some(continuation) => {
                    let Some((_, previous)) = record.lines.last_mut() else {
                        return Err(ParsingError::new(
                            line_number,
                            line,
                            "continuation line without an attribute to continue",
                        ));
                    };
                    previous.push_str(continuation);
                }
                None => record.lines.push((line_number, line.to_owned())),
            }
        }
        records.extend(current);

        records.into_iter().map(RawRecord::into_record).collect()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn into_job_info(self) -> JobInfo {
        let id = self.job_id.as_str();
        let mut info = JobInfo::new(id);

        info.job_state = match self.get("job_state") {
            Some(code) => map_state(code).unwrap_or_else(|| {
                tracing::warn!(job_id = id, code, "Unknown PBS job state");
                JobState::Undetermined
            }),
            None => {
                tracing::warn!(job_id = id, "No job_state in qstat output");
                JobState::Undetermined
            }
        };
        info.job_substate = self.get("substate").map(str::to_owned);

        info.title = self.get("job_name").map(str::to_owned);
        if info.title.is_none() {
            tracing::debug!(job_id = id, "No job_name in qstat output");
        }
        info.annotation = self.get("comment").map(str::to_owned);
        info.queue_name = self.get("queue").map(str::to_owned);
        info.job_owner = self
            .get("job_owner")
            .map(|owner| owner.split('@').next().unwrap_or(owner).to_owned());

        info.allocated_machines = self.get("exec_host").and_then(|value| {
            parse_exec_host(value)
                .map_err(|e| tracing::debug!(job_id = id, "No machine list: {e}"))
                .ok()
        });
        info.num_cpus = self
            .get("resource_list.ncpus")
            .and_then(|v| soft(id, "resource_list.ncpus", parse_int(v)));
        info.num_machines = self
            .get("resource_list.nodect")
            .and_then(|v| soft(id, "resource_list.nodect", parse_int(v)));
        if let (Some(machines), Some(count)) = (&info.allocated_machines, info.num_machines) {
            if machines.len() != count as usize {
                tracing::error!(
                    job_id = id,
                    exec_host = machines.len(),
                    nodect = count,
                    "Allocated machines do not match the node count"
                );
            }
        }

        info.requested_wallclock_time_seconds = self
            .get("resource_list.walltime")
            .and_then(|v| soft(id, "resource_list.walltime", parse_walltime(v)));
        info.wallclock_time_seconds = self
            .get("resources_used.walltime")
            .and_then(|v| soft(id, "resources_used.walltime", parse_walltime(v)));
        info.cpu_time = self
            .get("resources_used.cput")
            .and_then(|v| soft(id, "resources_used.cput", parse_walltime(v)));

        info.submission_time = self
            .get("ctime")
            .and_then(|v| soft(id, "ctime", parse_timestamp(v, TIME_FORMAT)));
        info.dispatch_time = self
            .get("stime")
            .and_then(|v| soft(id, "stime", parse_timestamp(v, TIME_FORMAT)));

        info.exit_status = self
            .get("exit_status")
            .and_then(|v| soft(id, "exit_status", parse_int(v)));
        info.terminating_signal = info.exit_status.filter(|&s| s > 256).map(|s| s - 256);
        if info.job_state == JobState::Done {
            info.finish_time = self
                .get("mtime")
                .and_then(|v| soft(id, "mtime", parse_timestamp(v, TIME_FORMAT)));
        }

        info
    }
}

impl RawRecord {
    fn into_record(self) -> Result<QstatRecord, ParsingError> {
        let mut attributes = HashMap::with_capacity(self.lines.len());
        for (line_number, line) in self.lines {
            let Some((key, value)) = line.split_once('=') else {
                return Err(ParsingError::new(
                    line_number,
                    &line,
                    format!("attribute of job {} has no `=`", self.job_id),
                ));
            };
            attributes.insert(key.trim().to_lowercase(), value.trim_start().to_owned());
        }
        Ok(QstatRecord {
            job_id: self.job_id,
            attributes,
        })
    }
}

pub fn map_state(code: &str) -> Option<JobState> {
    Some(match code.trim() {
        "B" | "E" | "R" => JobState::Running,
        "F" | "X" | "C" => JobState::Done,
        "H" => JobState::QueuedHeld,
        "Q" | "T" | "W" => JobState::Queued,
        "S" | "U" => JobState::Suspended,
        "M" => JobState::Undetermined,
        _ => return None,
    })
}

/// `host/idx*cores+host/idx*cores+...`, `*cores` defaults to one.
pub fn parse_exec_host(value: &str) -> Result<Vec<MachineInfo>, FieldError> {
    value
        .split('+')
        .map(|entry| {
            let invalid = || FieldError::Machines(value.to_owned());
            let (name, slot) = entry.trim().split_once('/').ok_or_else(invalid)?;
            if name.is_empty() {
                return Err(invalid());
            }
            let num_cpus = match slot.split_once('*') {
                Some((_, cores)) => cores.parse().map_err(|_| invalid())?,
                None => 1,
            };
            Ok(MachineInfo {
                name: name.to_owned(),
                num_cpus,
            })
        })
        .collect()
}

/// `HH:MM:SS` to seconds; hours may exceed a day.
pub fn parse_walltime(value: &str) -> Result<u64, FieldError> {
    let invalid = || FieldError::Duration(value.to_owned());
    let parts = value
        .trim()
        .split(':')
        .map(|part| part.parse::<u64>().map_err(|_| invalid()))
        .collect::<Result<Vec<_>, _>>()?;
    let &[hours, minutes, seconds] = parts.as_slice() else {
        return Err(invalid());
    };
    hours
        .checked_mul(3600)
        .and_then(|s| s.checked_add(minutes.checked_mul(60)?))
        .and_then(|s| s.checked_add(seconds))
        .ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use domain::model::entity::{JobState, MachineInfo};
    use indoc::indoc;

    use super::{map_state, parse_exec_host, parse_walltime, QstatRecord};

    const QSTAT_F: &str = include_str!("testdata/qstat_f.txt");

    fn parse(stdout: &str) -> Vec<domain::model::entity::JobInfo> {
        QstatRecord::parse_all(stdout)
            .unwrap()
            .into_iter()
            .map(QstatRecord::into_job_info)
            .collect()
    }

    #[test]
    fn six_jobs() {
        let jobs = parse(QSTAT_F);
        let ids: Vec<_> = jobs.iter().map(|j| j.job_id.as_str()).collect();
        assert_eq!(
            vec![
                "68350.mycluster",
                "68351.mycluster",
                "69301.mycluster",
                "69302.mycluster",
                "74164.mycluster",
                "74165.mycluster",
            ],
            ids
        );

        let count = |state| jobs.iter().filter(|j| j.job_state == state).count();
        assert_eq!(2, count(JobState::QueuedHeld));
        assert_eq!(2, count(JobState::Queued));
        assert_eq!(2, count(JobState::Running));

        let owners: Vec<_> = jobs.iter().filter_map(|j| j.job_owner.as_deref()).collect();
        assert_eq!(vec!["user01", "user02", "user03", "user04", "user02", "user3"], owners);
    }

    #[test]
    fn running_job_details() {
        let jobs = parse(QSTAT_F);
        let job = jobs.iter().find(|j| j.job_id == "74164.mycluster").unwrap();

        assert_eq!(Some("Ti-phonons"), job.title.as_deref());
        assert_eq!(Some("workq"), job.queue_name.as_deref());
        assert_eq!(Some("42"), job.job_substate.as_deref());
        assert_eq!(Some(32), job.num_cpus);
        assert_eq!(Some(2), job.num_machines);
        assert_eq!(
            Some(vec![
                MachineInfo {
                    name: "b141".to_owned(),
                    num_cpus: 16
                },
                MachineInfo {
                    name: "b142".to_owned(),
                    num_cpus: 16
                },
            ]),
            job.allocated_machines
        );
        assert_eq!(Some(7964), job.wallclock_time_seconds);
        assert_eq!(Some(127_307), job.cpu_time);
        assert_eq!(Some(14_400), job.requested_wallclock_time_seconds);

        let day = NaiveDate::from_ymd_opt(2013, 4, 15).unwrap();
        assert_eq!(day.and_hms_opt(8, 0, 12), job.submission_time);
        assert_eq!(day.and_hms_opt(8, 1, 2), job.dispatch_time);
        assert_eq!(None, job.finish_time);
    }

    #[test]
    fn tab_continuations() {
        let jobs = parse(QSTAT_F);
        let queued = jobs.iter().find(|j| j.job_id == "69301.mycluster").unwrap();
        assert_eq!(
            Some("Not Running: Insufficient amount of resource: ncpus (R: 64 A: 32 T: 512)"),
            queued.annotation.as_deref()
        );
        assert_eq!(Some(259_200), queued.requested_wallclock_time_seconds);
        assert_eq!(None, queued.allocated_machines);

        let split_host = jobs.iter().find(|j| j.job_id == "74165.mycluster").unwrap();
        let machines = split_host.allocated_machines.as_ref().unwrap();
        assert_eq!(7, machines.len());
        assert_eq!("b273", machines[6].name);
        assert_eq!(4, machines[6].num_cpus);
        assert_eq!(Some(7), split_host.num_machines);
    }

    #[test]
    fn reparse_is_identical() {
        assert_eq!(parse(QSTAT_F), parse(QSTAT_F));
    }

    #[test]
    fn empty_output() {
        assert!(parse("").is_empty());
        assert!(parse("\n\n").is_empty());
    }

    #[test]
    fn noise_before_first_job() {
        let jobs = parse(indoc! {"
            qstat: some server warning
            Job Id: 1.server
                job_state = R
        "});
        assert_eq!(1, jobs.len());
        assert_eq!(JobState::Running, jobs[0].job_state);
    }

    #[test]
    fn attribute_without_equals_sign() {
        let err = QstatRecord::parse_all(indoc! {"
            Job Id: 1.server
                job_state = R
                this line is broken
        "})
        .unwrap_err();
        assert_eq!(3, err.line_number);
        assert_eq!("    this line is broken", err.line);
    }

    #[test]
    fn continuation_without_attribute() {
        let stdout = "Job Id: 1.server\n\tdangling\n";
        assert_eq!(2, QstatRecord::parse_all(stdout).unwrap_err().line_number);
    }

    #[test]
    fn bad_fields_are_dropped() {
        let jobs = parse(indoc! {"
            Job Id: 9.server
                job_state = Z
                Resource_List.ncpus = N/A
                Resource_List.nodect = 3
                Resource_List.walltime = 1:-2:00
                resources_used.walltime = 01:00
                exec_host = /0*4+b1/0*x
                ctime = yesterday
        "});
        let job = &jobs[0];
        assert_eq!(JobState::Undetermined, job.job_state);
        assert_eq!(None, job.num_cpus);
        assert_eq!(Some(3), job.num_machines);
        assert_eq!(None, job.requested_wallclock_time_seconds);
        assert_eq!(None, job.wallclock_time_seconds);
        assert_eq!(None, job.allocated_machines);
        assert_eq!(None, job.submission_time);
        assert_eq!(None, job.title);
    }

    #[test]
    fn mismatched_node_count_is_kept() {
        let jobs = parse(indoc! {"
            Job Id: 10.server
                job_state = R
                exec_host = n1/0*2
                Resource_List.nodect = 2
        "});
        assert_eq!(Some(2), jobs[0].num_machines);
        assert_eq!(1, jobs[0].allocated_machines.as_ref().unwrap().len());
    }

    #[test]
    fn finished_job() {
        let jobs = parse(indoc! {"
            Job Id: 11.server
                job_state = F
                Exit_status = 271
                mtime = Tue Apr  9 15:02:34 2013
        "});
        let job = &jobs[0];
        assert_eq!(JobState::Done, job.job_state);
        assert_eq!(Some(271), job.exit_status);
        assert_eq!(Some(15), job.terminating_signal);
        assert_eq!(
            NaiveDate::from_ymd_opt(2013, 4, 9).unwrap().and_hms_opt(15, 2, 34),
            job.finish_time
        );
    }

    #[test]
    fn states() {
        for (code, state) in [
            ("B", JobState::Running),
            ("E", JobState::Running),
            ("R", JobState::Running),
            ("C", JobState::Done),
            ("F", JobState::Done),
            ("X", JobState::Done),
            ("H", JobState::QueuedHeld),
            ("Q", JobState::Queued),
            ("T", JobState::Queued),
            ("W", JobState::Queued),
            ("S", JobState::Suspended),
            ("U", JobState::Suspended),
            ("M", JobState::Undetermined),
        ] {
            assert_eq!(Some(state), map_state(code), "{code}");
        }
        assert_eq!(None, map_state("Z"));
    }

    #[test]
    fn exec_host() {
        let machines = parse_exec_host("n1/0+n2/3*8").unwrap();
        assert_eq!(1, machines[0].num_cpus);
        assert_eq!("n2", machines[1].name);
        assert_eq!(8, machines[1].num_cpus);
        assert!(parse_exec_host("n1").is_err());
        assert!(parse_exec_host("n1/0*").is_err());
    }

    #[test]
    fn walltimes() {
        assert_eq!(86_400, parse_walltime("24:00:00").unwrap());
        assert_eq!(3723, parse_walltime("01:02:03").unwrap());
        assert!(parse_walltime("01:02").is_err());
        assert!(parse_walltime("-1:00:00").is_err());
        assert!(parse_walltime("1:2:3:4").is_err());
        assert!(parse_walltime("").is_err());
        assert_eq!(360_000_000, parse_walltime("100000:00:00").unwrap());
        assert!(parse_walltime("18446744073709551615:00:00").is_err());
        assert!(parse_walltime("0:18446744073709551615:00").is_err());
        assert!(parse_walltime("0:0:18446744073709551615").is_ok());
    }
}
