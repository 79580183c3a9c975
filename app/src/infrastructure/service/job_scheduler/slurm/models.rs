use csv::StringRecord;
use domain::{
    error::ParsingError,
    model::entity::{JobInfo, JobState, MachineInfo},
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::infrastructure::service::job_scheduler::field::{
    parse_int, parse_timestamp, soft, FieldError,
};

pub const SEPARATOR: &str = "|";

/// `squeue -o` format letters, in the order of [`SqueueRecord`]'s fields.
pub const FORMAT_FIELDS: [&str; 13] = [
    "%i", "%t", "%r", "%u", "%D", "%C", "%R", "%P", "%l", "%M", "%S", "%j", "%V",
];

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Reasons of a pending job that only an explicit release can clear.
const HELD_REASONS: [&str; 4] = ["Dependency", "JobHeldUser", "JobHeldAdmin", "BeginTime"];

/// Upper bound on the hosts a single node list expands to.
const MAX_NODES: usize = 100_000;

static DURATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:(?:(\d+)-)?(\d+):)?(\d+):(\d+)$").unwrap());

/// One line of `squeue --noheader -o <FORMAT_FIELDS joined by SEPARATOR>`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SqueueRecord {
    pub job_id: String,
    pub state: String,
    pub reason: String,
    pub user: String,
    pub nodes: String,
    pub cpus: String,
    pub node_list: String,
    pub partition: String,
    pub time_limit: String,
    pub time_used: String,
    pub start_time: String,
    pub name: String,
    pub submit_time: String,
}

impl SqueueRecord {
    pub fn parse_all(stdout: &str) -> Result<Vec<Self>, ParsingError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(SEPARATOR.as_bytes()[0])
            .has_headers(false)
            .quoting(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(stdout.as_bytes());

        let mut records = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| {
                let line_number = e.position().map_or(0, |p| p.line() as usize);
                ParsingError::new(line_number, "", e.to_string())
            })?;
            if record.len() == 1 && record[0].is_empty() {
                continue;
            }
            records.push(Self::from_record(&record)?);
        }
        Ok(records)
    }

    fn from_record(record: &StringRecord) -> Result<Self, ParsingError> {
        let line_number = record.position().map_or(0, |p| p.line() as usize);
        let line = record.iter().collect::<Vec<_>>().join(SEPARATOR);
        if record.len() != FORMAT_FIELDS.len() {
            return Err(ParsingError::new(
                line_number,
                &line,
                format!("expected {} fields, found {}", FORMAT_FIELDS.len(), record.len()),
            ));
        }

        let parsed: Self = record
            .deserialize(None)
            .map_err(|e| ParsingError::new(line_number, &line, e.to_string()))?;
        if parsed.job_id.is_empty() {
            return Err(ParsingError::new(line_number, &line, "empty job id"));
        }
        Ok(parsed)
    }

    pub fn into_job_info(self) -> JobInfo {
        let id = self.job_id.as_str();
        let mut info = JobInfo::new(id);

        info.job_state = match map_state(&self.state) {
            Some(JobState::Queued) if HELD_REASONS.contains(&self.reason.as_str()) => {
                JobState::QueuedHeld
            }
            Some(state) => state,
            None => {
                tracing::warn!(job_id = id, code = %self.state, "Unknown Slurm job state");
                JobState::Undetermined
            }
        };
        info.annotation = value(&self.reason).filter(|r| *r != "None").map(str::to_owned);
        info.job_owner = value(&self.user).map(str::to_owned);
        info.queue_name = value(&self.partition).map(str::to_owned);
        info.title = value(&self.name).map(str::to_owned);

        info.num_machines = value(&self.nodes).and_then(|v| soft(id, "nodes", parse_int(v)));
        info.num_cpus = value(&self.cpus).and_then(|v| soft(id, "cpus", parse_int(v)));
        // Pending jobs report a reason in place of the node list.
        if matches!(info.job_state, JobState::Running | JobState::Suspended) {
            info.allocated_machines = value(&self.node_list).and_then(|v| {
                expand_node_list(v)
                    .map_err(|e| tracing::debug!(job_id = id, "No machine list: {e}"))
                    .ok()
            });
        }
        if let Some(machines) = &mut info.allocated_machines {
            if let Some(count) = info.num_machines.filter(|&n| n as usize != machines.len()) {
                tracing::error!(
                    job_id = id,
                    node_list = machines.len(),
                    nodes = count,
                    "Allocated machines do not match the node count"
                );
            }
            // Only an even split can be attributed to single nodes.
            if let Some(cpus) = info.num_cpus {
                let len = machines.len() as u32;
                if len > 0 && cpus % len == 0 {
                    machines.iter_mut().for_each(|m| m.num_cpus = cpus / len);
                }
            }
        }

        info.requested_wallclock_time_seconds = value(&self.time_limit)
            .and_then(|v| soft(id, "time_limit", parse_duration(v)));
        info.wallclock_time_seconds =
            value(&self.time_used).and_then(|v| soft(id, "time_used", parse_duration(v)));
        info.submission_time = value(&self.submit_time)
            .and_then(|v| soft(id, "submit_time", parse_timestamp(v, TIME_FORMAT)));
        // The start time of a pending job is only an estimate.
        if !matches!(info.job_state, JobState::Queued | JobState::QueuedHeld) {
            info.dispatch_time = value(&self.start_time)
                .and_then(|v| soft(id, "start_time", parse_timestamp(v, TIME_FORMAT)));
        }

        info
    }
}

fn value(raw: &str) -> Option<&str> {
    match raw {
        "" | "N/A" | "UNLIMITED" | "NOT_SET" | "(null)" => None,
        _ => Some(raw),
    }
}

pub fn map_state(code: &str) -> Option<JobState> {
    Some(match code {
        "PD" | "CF" => JobState::Queued,
        "R" | "CG" => JobState::Running,
        "S" => JobState::Suspended,
        "CA" | "CD" | "F" | "TO" | "NF" | "PR" | "BF" | "DL" | "OOM" => JobState::Done,
        _ => return None,
    })
}

/// `[D-]HH:MM:SS` or `MM:SS` to seconds.
pub fn parse_duration(value: &str) -> Result<u64, FieldError> {
    let invalid = || FieldError::Duration(value.to_owned());
    let captures = DURATION.captures(value).ok_or_else(invalid)?;
    let part = |i: usize| -> Result<u64, FieldError> {
        captures
            .get(i)
            .map_or(Ok(0), |m| m.as_str().parse().map_err(|_| invalid()))
    };
    let (days, hours, minutes, seconds) = (part(1)?, part(2)?, part(3)?, part(4)?);
    days.checked_mul(86_400)
        .and_then(|s| s.checked_add(hours.checked_mul(3600)?))
        .and_then(|s| s.checked_add(minutes.checked_mul(60)?))
        .and_then(|s| s.checked_add(seconds))
        .ok_or_else(invalid)
}

/// Expand `nid[001-003,007],login1` into one entry per host, cpu counts left at zero.
pub fn expand_node_list(value: &str) -> Result<Vec<MachineInfo>, FieldError> {
    let invalid = || FieldError::Machines(value.to_owned());
    let mut names = Vec::new();

    for group in split_top_level(value).ok_or_else(invalid)? {
        if group.is_empty() {
            return Err(invalid());
        }
        expand_group(group, &mut names).ok_or_else(invalid)?;
    }

    Ok(names
        .into_iter()
        .map(|name| MachineInfo { name, num_cpus: 0 })
        .collect())
}

/// Expand every bracket of one host pattern, so `r[1-2]n[1-2]` yields four hosts.
/// `None` on a malformed range or once `names` would exceed [`MAX_NODES`].
fn expand_group(group: &str, names: &mut Vec<String>) -> Option<()> {
    let mut prefixes = vec![String::new()];
    let mut rest = group;

    while let Some((literal, tail)) = rest.split_once('[') {
        let (ranges, tail) = tail.split_once(']')?;
        let mut numbers = Vec::new();
        for range in ranges.split(',') {
            let (start, end) = range.split_once('-').unwrap_or((range, range));
            let width = start.len();
            let first: u64 = start.parse().ok()?;
            let last: u64 = end.parse().ok()?;
            if last < first || last - first >= MAX_NODES as u64 {
                return None;
            }
            numbers.extend((first..=last).map(|n| format!("{n:0width$}")));
            if numbers.len() > MAX_NODES {
                return None;
            }
        }
        if names.len() + prefixes.len().checked_mul(numbers.len())? > MAX_NODES {
            return None;
        }
        prefixes = prefixes
            .iter()
            .flat_map(|prefix| numbers.iter().map(move |n| format!("{prefix}{literal}{n}")))
            .collect();
        rest = tail;
    }

    names.extend(prefixes.into_iter().map(|prefix| format!("{prefix}{rest}")));
    Some(())
}

/// Split at commas that are not inside brackets; `None` on unbalanced brackets.
fn split_top_level(value: &str) -> Option<Vec<&str>> {
    let mut groups = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in value.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.checked_sub(1)?,
            ',' if depth == 0 => {
                groups.push(&value[start..i]);
                start = i + 1;
            }
            _ => (),
        }
    }
    if depth != 0 {
        return None;
    }
    groups.push(&value[start..]);
    Some(groups)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use domain::model::entity::JobState;
    use indoc::indoc;

    use super::{expand_node_list, parse_duration, SqueueRecord};

    const SQUEUE: &str = indoc! {"
        862540|PD|Dependency|user1|1|4|(Dependency)|normal|1-00:00:00|0:00|N/A|relax|2024-03-01T10:00:00
        862541|PD|Priority|user1|2|64|(Priority)|normal|2:00:00|0:00|2024-03-02T08:00:00|scf|2024-03-01T10:00:05
        862538|R|None|user2|4|64|nid[001-003,007]|long|UNLIMITED|1-02:03:04|2024-02-29T07:56:56|md-run|2024-02-29T07:50:00
        862539|CG|None|user2|1|3|login1|debug|30:00|12:34|2024-03-01T09:40:00|post|2024-03-01T09:39:00
    "};

    fn parse(stdout: &str) -> Vec<domain::model::entity::JobInfo> {
        SqueueRecord::parse_all(stdout)
            .unwrap()
            .into_iter()
            .map(SqueueRecord::into_job_info)
            .collect()
    }

    #[test]
    fn listing() {
        let jobs = parse(SQUEUE);
        assert_eq!(4, jobs.len());

        let held = &jobs[0];
        assert_eq!(JobState::QueuedHeld, held.job_state);
        assert_eq!(Some("Dependency"), held.annotation.as_deref());
        assert_eq!(Some(86_400), held.requested_wallclock_time_seconds);
        assert_eq!(None, held.allocated_machines);

        let queued = &jobs[1];
        assert_eq!(JobState::Queued, queued.job_state);
        assert_eq!(None, queued.dispatch_time);

        let running = &jobs[2];
        assert_eq!(JobState::Running, running.job_state);
        assert_eq!(None, running.annotation);
        assert_eq!(Some("user2"), running.job_owner.as_deref());
        assert_eq!(Some("long"), running.queue_name.as_deref());
        assert_eq!(Some("md-run"), running.title.as_deref());
        assert_eq!(None, running.requested_wallclock_time_seconds);
        assert_eq!(Some(93_784), running.wallclock_time_seconds);
        let machines = running.allocated_machines.as_ref().unwrap();
        let names: Vec<_> = machines.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(vec!["nid001", "nid002", "nid003", "nid007"], names);
        assert!(machines.iter().all(|m| m.num_cpus == 16));
        assert_eq!(
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap().and_hms_opt(7, 56, 56),
            running.dispatch_time
        );

        let completing = &jobs[3];
        assert_eq!(JobState::Running, completing.job_state);
        assert_eq!(Some(754), completing.wallclock_time_seconds);
        assert_eq!(3, completing.allocated_machines.as_ref().unwrap()[0].num_cpus);
    }

    #[test]
    fn wrong_field_count() {
        let stdout = indoc! {"
            862539|CG|None|user2|1|3|login1|debug|30:00|12:34|2024-03-01T09:40:00|post|2024-03-01T09:39:00
            862538|R|None
        "};
        let err = SqueueRecord::parse_all(stdout).unwrap_err();
        assert_eq!(2, err.line_number);
        assert_eq!("862538|R|None", err.line);

        let name_with_separator =
            "7|R|None|u|1|1|n1|p|1:00|0:01|2024-03-01T09:40:00|a|b|2024-03-01T09:39:00\n";
        assert!(SqueueRecord::parse_all(name_with_separator).is_err());
    }

    #[test]
    fn blank_lines_are_skipped() {
        let stdout = "\n7|R|None|u|1|1|n1|p|1:00|0:01|2024-03-01T09:40:00|a|2024-03-01T09:39:00\n\n";
        let records = SqueueRecord::parse_all(stdout).unwrap();
        assert_eq!(1, records.len());
        assert_eq!("n1", records[0].node_list);
        assert!(SqueueRecord::parse_all("").unwrap().is_empty());
    }

    #[test]
    fn bad_fields_are_dropped() {
        let jobs = parse(
            "7|XX|None|u|x|4|n[1-|p|soon|1:2:3:4|later|j|never\n",
        );
        let job = &jobs[0];
        assert_eq!(JobState::Undetermined, job.job_state);
        assert_eq!(None, job.num_machines);
        assert_eq!(Some(4), job.num_cpus);
        assert_eq!(None, job.requested_wallclock_time_seconds);
        assert_eq!(None, job.wallclock_time_seconds);
        assert_eq!(None, job.submission_time);
        assert_eq!(None, job.dispatch_time);
    }

    #[test]
    fn durations() {
        assert_eq!(59, parse_duration("0:59").unwrap());
        assert_eq!(3723, parse_duration("01:02:03").unwrap());
        assert_eq!(176_523, parse_duration("2-01:02:03").unwrap());
        assert!(parse_duration("1-00").is_err());
        assert!(parse_duration("INVALID").is_err());
        assert!(parse_duration("213503982334602-00:00:00").is_err());
        assert!(parse_duration("99999999999999999999:00").is_err());
    }

    #[test]
    fn node_lists() {
        let names = |v| {
            expand_node_list(v)
                .unwrap()
                .into_iter()
                .map(|m| m.name)
                .collect::<Vec<_>>()
        };
        assert_eq!(vec!["login1"], names("login1"));
        assert_eq!(vec!["a9", "a10", "b-01-x", "c"], names("a[9-10],b-[01]-x,c"));
        assert!(expand_node_list("n[3-1]").is_err());
        assert!(expand_node_list("n[1,2").is_err());
        assert!(expand_node_list("n1,,n2").is_err());
        assert_eq!(vec!["r1n1", "r1n2", "r2n1", "r2n2"], names("r[1-2]n[1-2]"));
        assert_eq!(100_000, expand_node_list("n[0-99999]").unwrap().len());
        assert!(expand_node_list("n[0-4000000000]").is_err());
        assert!(expand_node_list("r[0-999]n[0-999]").is_err());
        assert!(expand_node_list("n[]").is_err());
    }
}
