// =============================================================================
// registry.rs - WHO IS DOING WHAT, RIGHT NOW
// =============================================================================
//
// The job registry maps a module name to the record of its current (or most
// recent) run. Every module task owns exactly one key, so contention is low
// and a single parking_lot RwLock around the map is plenty. The lock is never
// held across an await point.
//
// Updates are field-level: a patch only touches the fields it names, so
// bumping the event counter can never wipe out the start timestamp.
// Finished records stay put until somebody explicitly clears them.
// =============================================================================

use chrono::{DateTime, Local};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ReactorError, Result};
use crate::models::{JobRecord, JobStatus, Outcome};

/// A single field of a [`JobRecord`] that can be updated in place.
#[derive(Debug, Clone, PartialEq)]
pub enum JobField {
    Status(JobStatus),
    Message(String),
    Ended(DateTime<Local>),
    /// Raises the counter to the given value. Lower values are ignored,
    /// the counter never goes backwards within a run.
    Events(u64),
    Workers(u32),
}

/// A set of field updates applied together. Fields not named in the patch
/// keep their current value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    fields: Vec<JobField>,
}

impl JobPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: JobField) -> Self {
        self.fields.push(field);
        self
    }

    pub fn status(self, status: JobStatus) -> Self {
        self.with(JobField::Status(status))
    }

    pub fn message(self, message: impl Into<String>) -> Self {
        self.with(JobField::Message(message.into()))
    }
}

impl From<JobField> for JobPatch {
    fn from(field: JobField) -> Self {
        JobPatch::new().with(field)
    }
}

fn apply(record: &mut JobRecord, field: JobField) -> Result<()> {
    match field {
        JobField::Status(next) => {
            if record.status != next && !record.status.can_become(next) {
                return Err(ReactorError::InvalidTransition {
                    name: record.name.clone(),
                    from: record.status,
                    to: next,
                });
            }
            record.status = next;
        }
        JobField::Message(message) => record.message = message,
        JobField::Ended(ts) => record.ended = Some(ts),
        JobField::Events(events) => record.events = record.events.max(events),
        JobField::Workers(workers) => record.workers = workers,
    }
    Ok(())
}

/// Process-wide job status map, shared by `Arc` between the dispatcher,
/// every running module and the status server.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, JobRecord>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `patch` into the record for `name`, creating an idle record
    /// first if none exists. Either every field applies or none does.
    pub fn upsert(&self, name: &str, patch: impl Into<JobPatch>) -> Result<JobRecord> {
        let patch = patch.into();
        let mut jobs = self.jobs.write();
        let mut updated = jobs
            .get(name)
            .cloned()
            .unwrap_or_else(|| JobRecord::new(name));

        for field in patch.fields {
            apply(&mut updated, field)?;
        }

        jobs.insert(name.to_string(), updated.clone());
        Ok(updated)
    }

    /// Single-field form of [`JobRegistry::upsert`].
    pub fn update(&self, name: &str, field: JobField) -> Result<JobRecord> {
        self.upsert(name, field)
    }

    pub fn set_message(&self, name: &str, message: impl Into<String>) -> Result<()> {
        self.update(name, JobField::Message(message.into())).map(|_| ())
    }

    /// Start a fresh invocation of `name`. Resets the counters and timestamps
    /// of any previous run. Refused while the job is still running.
    pub fn begin(&self, name: &str) -> Result<JobRecord> {
        let mut jobs = self.jobs.write();
        if let Some(existing) = jobs.get(name) {
            if existing.status.is_running() {
                return Err(ReactorError::JobAlreadyRunning(name.to_string()));
            }
        }

        let record = JobRecord {
            status: JobStatus::Running,
            message: "starting".to_string(),
            started: Some(Local::now()),
            workers: 1,
            run_id: Some(Uuid::new_v4()),
            ..JobRecord::new(name)
        };
        jobs.insert(name.to_string(), record.clone());
        debug!(job = name, run_id = ?record.run_id, "Job registered as running");
        Ok(record)
    }

    /// Add one to the event counter of a running job and return the new value.
    pub fn increment_events(&self, name: &str) -> Result<u64> {
        let mut jobs = self.jobs.write();
        let record = jobs
            .get_mut(name)
            .ok_or_else(|| ReactorError::JobNotFound(name.to_string()))?;
        record.events += 1;
        Ok(record.events)
    }

    /// Move a running job to `Finished`, stamp the end time and set the
    /// outcome message.
    pub fn finish(&self, name: &str, outcome: Outcome) -> Result<JobRecord> {
        let patch = JobPatch::new()
            .status(JobStatus::Finished(outcome))
            .message(outcome.message())
            .with(JobField::Ended(Local::now()))
            .with(JobField::Workers(0));
        self.upsert(name, patch)
    }

    pub fn get(&self, name: &str) -> Result<JobRecord> {
        self.jobs
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ReactorError::JobNotFound(name.to_string()))
    }

    /// Every record, ordered by name.
    pub fn list_all(&self) -> Vec<JobRecord> {
        let mut all: Vec<JobRecord> = self.jobs.read().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Remove one record. A running job cannot be cleared out from under
    /// its task.
    pub fn clear(&self, name: &str) -> Result<JobRecord> {
        let mut jobs = self.jobs.write();
        let running = match jobs.get(name) {
            Some(record) => record.status.is_running(),
            None => return Err(ReactorError::JobNotFound(name.to_string())),
        };
        if running {
            return Err(ReactorError::JobAlreadyRunning(name.to_string()));
        }
        jobs.remove(name)
            .ok_or_else(|| ReactorError::JobNotFound(name.to_string()))
    }

    /// Drop every finished record, returning how many were removed.
    pub fn clear_finished(&self) -> usize {
        let mut jobs = self.jobs.write();
        let before = jobs.len();
        jobs.retain(|_, record| !record.status.is_finished());
        before - jobs.len()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    /// Text dump of one job, or of every job when `query` is `"all"`.
    pub fn get_stats(&self, query: &str) -> String {
        if self.is_empty() {
            return "no running jobs".to_string();
        }
        if query == "all" {
            return self
                .list_all()
                .iter()
                .map(JobRecord::dump)
                .collect::<Vec<_>>()
                .join("\n");
        }
        match self.get(query) {
            Ok(record) => record.dump(),
            Err(_) => format!("cannot find job {}", query),
        }
    }
}
