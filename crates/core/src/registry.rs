//! In-memory job registry.
//!
//! [`JobRegistry`] owns every job record behind a single coarse lock. Reads
//! hand out clones and writes go through a mutator closure, so no caller can
//! hold a reference into the map. Critical sections are map lookups and
//! field assignments only; nothing awaits while the lock is held.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::generation::GenerationRequest;
use crate::job::Job;
use crate::types::JobId;

/// Process-lifetime store of generation jobs.
///
/// Designed to be wrapped in `Arc` and shared between request handlers and
/// job runners.
#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new `Pending` job and return its identifier.
    pub fn create(&self, request: GenerationRequest) -> JobId {
        let id = uuid::Uuid::new_v4();
        self.lock().insert(id, Job::new(id, request));
        id
    }

    /// Snapshot of one job.
    pub fn get(&self, id: JobId) -> Option<Job> {
        self.lock().get(&id).cloned()
    }

    /// Apply `mutator` to the job under exclusive access.
    ///
    /// Returns `None` when the id is unknown.
    pub fn update<R>(&self, id: JobId, mutator: impl FnOnce(&mut Job) -> R) -> Option<R> {
        let mut jobs = self.lock();
        match jobs.get_mut(&id) {
            Some(job) => Some(mutator(job)),
            None => {
                tracing::warn!(job_id = %id, "Update for unknown job ignored");
                None
            }
        }
    }

    /// Snapshot of every job, oldest first.
    pub fn list_all(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.lock().values().cloned().collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // Every mutation leaves the map consistent, so a panic in another
    // holder does not invalidate the data.
    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, Job>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
