// =============================================================================
// models.rs - JOBS, FINDINGS AND THE EVENTS WE SHIP TO THE SIEM
// =============================================================================
//
// A JobRecord is the registry's view of one module run. A Finding is a single
// thing a module thinks the SIEM should hear about. A CefEvent is that finding
// dressed up in Common Event Format, ready for the syslog emitter.
// =============================================================================

use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Timestamp layout used in status dumps and log lines.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// How a finished run ended.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    PartialFailure,
}

impl Outcome {
    /// The registry message a run finishes with.
    pub fn message(&self) -> &'static str {
        match self {
            Outcome::Success => "finished successfully",
            Outcome::PartialFailure => "finished with errors",
        }
    }
}

/// Lifecycle of a job. Only `Idle -> Running -> Finished` is legal, and a
/// finished job only becomes `Running` again through a fresh invocation.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Idle,
    Running,
    Finished(Outcome),
}

impl JobStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, JobStatus::Running)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Finished(_))
    }

    /// Transitions reachable through a plain field update. Re-entering
    /// `Running` from `Finished` is reserved for `JobRegistry::begin`.
    pub fn can_become(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Idle, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Finished(_))
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Idle => write!(f, "idle"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Finished(Outcome::Success) => write!(f, "finished"),
            JobStatus::Finished(Outcome::PartialFailure) => write!(f, "finished (errors)"),
        }
    }
}

/// The registry's record of one module's current or last run.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JobRecord {
    pub name: String,
    pub status: JobStatus,
    pub message: String,
    pub started: Option<DateTime<Local>>,
    pub ended: Option<DateTime<Local>>,
    /// Findings reported during this run. Never decreases within a run.
    pub events: u64,
    pub workers: u32,
    /// Fresh for every invocation so two runs of the same module can be told apart.
    pub run_id: Option<Uuid>,
}

impl JobRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: JobStatus::Idle,
            message: String::new(),
            started: None,
            ended: None,
            events: 0,
            workers: 0,
            run_id: None,
        }
    }

    /// Human-readable block in the `key: value` layout the console prints.
    pub fn dump(&self) -> String {
        let stamp = |ts: &Option<DateTime<Local>>| {
            ts.map(|t| t.format(TIMESTAMP_FORMAT).to_string())
                .unwrap_or_default()
        };
        format!(
            "{} =>\nstatus:  \t{}\nmessage: \t{}\nstarted: \t{}\nended:   \t{}\nevents:  \t{}\nworkers: \t{}\n",
            self.name,
            self.status,
            self.message,
            stamp(&self.started),
            stamp(&self.ended),
            self.events,
            self.workers,
        )
    }
}

/// One discovered item worth reporting: a host, a paste ID, an IP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub source: String,
    pub message: String,
}

impl Finding {
    pub fn new(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            message: message.into(),
        }
    }
}

/// Phases a module run walks through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Loading,
    Fetching,
    Reporting,
}

/// CEF header constants. The vendor/product/version triple identifies
/// everything this process sends.
pub const CEF_VENDOR: &str = "OSINT";
pub const CEF_PRODUCT: &str = "ArcReactor";
pub const CEF_VERSION: &str = "1.0";

/// A Common Event Format payload.
///
/// `Display` renders
/// `CEF:0|OSINT|ArcReactor|1.0|<signature>|<name>|<severity>|src=<src> msg=<msg>`
/// with header pipes and extension `=` signs escaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CefEvent {
    pub signature_id: u32,
    pub name: String,
    pub severity: u8,
    pub src: String,
    pub msg: String,
}

impl CefEvent {
    pub fn new(signature_id: u32, name: impl Into<String>, severity: u8, finding: &Finding) -> Self {
        Self {
            signature_id,
            name: name.into(),
            severity,
            src: finding.source.clone(),
            msg: finding.message.clone(),
        }
    }
}

fn escape_header(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '|' => out.push_str("\\|"),
            '\r' | '\n' => out.push(' '),
            _ => out.push(ch),
        }
    }
    out
}

fn escape_extension(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '=' => out.push_str("\\="),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
    out
}

impl fmt::Display for CefEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CEF:0|{}|{}|{}|{}|{}|{}|src={} msg={}",
            CEF_VENDOR,
            CEF_PRODUCT,
            CEF_VERSION,
            self.signature_id,
            escape_header(&self.name),
            self.severity,
            escape_extension(&self.src),
            escape_extension(&self.msg),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cef_event_matches_wire_layout() {
        let finding = Finding::new("evil.example.com", "http://lists.example/hosts.txt");
        let event = CefEvent::new(100, "Known Malicious Host", 1, &finding);
        assert_eq!(
            event.to_string(),
            "CEF:0|OSINT|ArcReactor|1.0|100|Known Malicious Host|1|src=evil.example.com msg=http://lists.example/hosts.txt"
        );
    }

    #[test]
    fn test_cef_event_escapes_reserved_characters() {
        let finding = Finding::new("a=b", "line one\nkey=value \\ done");
        let event = CefEvent::new(7, "Pipe|Name", 3, &finding);
        assert_eq!(
            event.to_string(),
            "CEF:0|OSINT|ArcReactor|1.0|7|Pipe\\|Name|3|src=a\\=b msg=line one\\nkey\\=value \\\\ done"
        );
    }

    #[test]
    fn test_status_transitions() {
        assert!(JobStatus::Idle.can_become(JobStatus::Running));
        assert!(JobStatus::Running.can_become(JobStatus::Finished(Outcome::Success)));
        assert!(!JobStatus::Idle.can_become(JobStatus::Finished(Outcome::Success)));
        assert!(!JobStatus::Finished(Outcome::Success).can_become(JobStatus::Running));
        assert!(!JobStatus::Running.can_become(JobStatus::Idle));
    }

    #[test]
    fn test_dump_lists_every_field() {
        let mut record = JobRecord::new("pastebin");
        record.status = JobStatus::Running;
        record.message = "collecting post archive".into();
        record.events = 3;
        record.workers = 1;
        let dump = record.dump();
        assert!(dump.starts_with("pastebin =>\n"));
        assert!(dump.contains("status:  \trunning\n"));
        assert!(dump.contains("message: \tcollecting post archive\n"));
        assert!(dump.contains("events:  \t3\n"));
        assert!(dump.contains("ended:   \t\n"));
    }
}
