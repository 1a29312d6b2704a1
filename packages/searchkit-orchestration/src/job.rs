//! Job hub
//!
//! Tracked units of work with append-only logs. Every mutation is fanned out
//! to the subscribers of that job id and to every global subscriber.
//! Subscriber callbacks are snapshotted and invoked after all locks are
//! released, so a callback may call back into the hub.

use chrono::{SecondsFormat, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(String),
}

pub type JobResult<T> = std::result::Result<T, JobError>;

/// One log line of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLog {
    pub time: String,
    pub text: String,
}

impl JobLog {
    pub fn new(time: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            time: time.into(),
            text: text.into(),
        }
    }

    /// Stamp with the current UTC time (RFC 3339)
    pub fn now(text: impl Into<String>) -> Self {
        Self::new(
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            text,
        )
    }
}

/// Job model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Origin tag (which extension or endpoint created the job)
    pub point: String,
    pub performer: String,
    pub logs: Vec<JobLog>,
}

/// Data for `JobHub::add`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJob {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub point: String,
    #[serde(default)]
    pub performer: String,
}

impl NewJob {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn point(mut self, point: impl Into<String>) -> Self {
        self.point = point.into();
        self
    }

    pub fn performer(mut self, performer: impl Into<String>) -> Self {
        self.performer = performer.into();
        self
    }
}

/// Partial update; `None` leaves the field unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub point: Option<String>,
    pub performer: Option<String>,
}

impl JobPatch {
    fn apply(self, record: &mut JobRecord) {
        if let Some(name) = self.name {
            record.name = name;
        }
        if let Some(description) = self.description {
            record.description = description;
        }
        if let Some(point) = self.point {
            record.point = point;
        }
        if let Some(performer) = self.performer {
            record.performer = performer;
        }
    }
}

/// Mutation tag passed to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobEvent {
    #[serde(rename = "add")]
    Add,
    #[serde(rename = "update")]
    Update,
    #[serde(rename = "delete")]
    Delete,
    #[serde(rename = "addLogs")]
    AddLogs,
}

impl JobEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobEvent::Add => "add",
            JobEvent::Update => "update",
            JobEvent::Delete => "delete",
            JobEvent::AddLogs => "addLogs",
        }
    }
}

impl fmt::Display for JobEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Subscriber callback
pub type JobSubscriber = Arc<dyn Fn(&JobRecord, JobEvent) + Send + Sync>;

/// In-memory job table, insertion ordered
#[derive(Default)]
pub struct JobStore {
    records: Mutex<IndexMap<String, JobRecord>>,
}

impl JobStore {
    pub fn new_in_memory() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: JobRecord) {
        self.records.lock().insert(record.id.clone(), record);
    }

    pub async fn get(&self, id: &str) -> Option<JobRecord> {
        self.records.lock().get(id).cloned()
    }

    pub async fn list(&self) -> Vec<JobRecord> {
        self.records.lock().values().cloned().collect()
    }

    /// Apply `f` to an existing record under one lock and return the result
    pub async fn modify<F>(&self, id: &str, f: F) -> Option<JobRecord>
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut records = self.records.lock();
        let record = records.get_mut(id)?;
        f(record);
        Some(record.clone())
    }

    pub async fn remove(&self, id: &str) -> Option<JobRecord> {
        self.records.lock().shift_remove(id)
    }
}

/// Job tracking hub with per-job and global subscriber fan-out
#[derive(Default)]
pub struct JobHub {
    store: JobStore,
    job_subscribers: Mutex<HashMap<String, HashMap<String, JobSubscriber>>>,
    global_subscribers: Mutex<HashMap<String, JobSubscriber>>,
}

impl JobHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a job with a fresh id and empty logs
    pub async fn add(&self, data: NewJob) -> JobRecord {
        let record = JobRecord {
            id: Uuid::new_v4().to_string(),
            name: data.name,
            description: data.description,
            point: data.point,
            performer: data.performer,
            logs: Vec::new(),
        };

        self.store.insert(record.clone()).await;
        debug!("Job {} added ({})", record.id, record.name);
        self.notify(&record, JobEvent::Add);
        record
    }

    pub async fn get(&self, id: &str) -> JobResult<JobRecord> {
        self.store
            .get(id)
            .await
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    pub async fn list(&self) -> Vec<JobRecord> {
        self.store.list().await
    }

    /// Merge `patch` into an existing job
    pub async fn update(&self, id: &str, patch: JobPatch) -> JobResult<JobRecord> {
        let record = self
            .store
            .modify(id, |record| patch.apply(record))
            .await
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;

        debug!("Job {} updated", id);
        self.notify(&record, JobEvent::Update);
        Ok(record)
    }

    /// Remove a job; subscribers receive its last known value
    pub async fn delete(&self, id: &str) -> JobResult<JobRecord> {
        let record = self
            .store
            .remove(id)
            .await
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;

        debug!("Job {} deleted", id);
        self.notify(&record, JobEvent::Delete);
        self.job_subscribers.lock().remove(id);
        Ok(record)
    }

    /// Append log entries in order
    pub async fn add_logs(&self, id: &str, entries: Vec<JobLog>) -> JobResult<JobRecord> {
        let count = entries.len();
        let record = self
            .store
            .modify(id, |record| record.logs.extend(entries))
            .await
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;

        debug!("Job {}: {} log entries appended", id, count);
        self.notify(&record, JobEvent::AddLogs);
        Ok(record)
    }

    /// Subscribe to mutations of one job; replaces an existing subscriber with the same id
    pub fn subscribe(&self, job_id: &str, subscriber_id: &str, callback: JobSubscriber) {
        self.job_subscribers
            .lock()
            .entry(job_id.to_string())
            .or_default()
            .insert(subscriber_id.to_string(), callback);
    }

    /// Returns whether a subscriber was removed
    pub fn unsubscribe(&self, job_id: &str, subscriber_id: &str) -> bool {
        let mut subscribers = self.job_subscribers.lock();
        let Some(per_job) = subscribers.get_mut(job_id) else {
            return false;
        };
        let removed = per_job.remove(subscriber_id).is_some();
        if per_job.is_empty() {
            subscribers.remove(job_id);
        }
        removed
    }

    /// Subscribe to mutations of every job
    pub fn subscribe_all(&self, subscriber_id: &str, callback: JobSubscriber) {
        self.global_subscribers
            .lock()
            .insert(subscriber_id.to_string(), callback);
    }

    pub fn unsubscribe_all(&self, subscriber_id: &str) -> bool {
        self.global_subscribers.lock().remove(subscriber_id).is_some()
    }

    fn notify(&self, record: &JobRecord, event: JobEvent) {
        // Snapshot, then invoke without holding any lock
        let mut callbacks: Vec<JobSubscriber> = self
            .job_subscribers
            .lock()
            .get(&record.id)
            .map(|per_job| per_job.values().cloned().collect())
            .unwrap_or_default();
        callbacks.extend(self.global_subscribers.lock().values().cloned());

        for callback in callbacks {
            callback(record, event);
        }
    }
}
