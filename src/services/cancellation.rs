//! Cancellation registry for bulk export jobs
//!
//! A job may only be cancelled by the user who started it, within the same
//! tenant. Entries are removed by [`JobGuard`] when the job finishes.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Who started a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOwner {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
}

struct JobEntry {
    token: CancellationToken,
    owner: JobOwner,
}

/// Removes the job from the registry when dropped
pub struct JobGuard {
    job_id: String,
    token: CancellationToken,
    registry: CancellationRegistry,
}

impl JobGuard {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.job_id);
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum CancelError {
    /// Job exists but was started by someone else
    NotOwner,
}

#[derive(Clone, Default)]
pub struct CancellationRegistry {
    jobs: Arc<Mutex<HashMap<String, JobEntry>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running job. Hold the returned guard until the job ends.
    ///
    /// `None` if a job with this id is already running.
    pub fn register(&self, job_id: &str, owner: JobOwner) -> Option<JobGuard> {
        let token = CancellationToken::new();
        match self.jobs.lock().entry(job_id.to_string()) {
            Entry::Occupied(_) => return None,
            Entry::Vacant(slot) => {
                slot.insert(JobEntry { token: token.clone(), owner });
            }
        }
        Some(JobGuard {
            job_id: job_id.to_string(),
            token,
            registry: self.clone(),
        })
    }

    /// `Ok(true)` if cancelled, `Ok(false)` if no such job is running
    pub fn cancel(&self, job_id: &str, caller: JobOwner) -> Result<bool, CancelError> {
        let jobs = self.jobs.lock();
        match jobs.get(job_id) {
            Some(entry) if entry.owner != caller => Err(CancelError::NotOwner),
            Some(entry) => {
                entry.token.cancel();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    #[cfg(test)]
    fn is_cancelled(&self, job_id: &str) -> bool {
        self.jobs
            .lock()
            .get(job_id)
            .is_some_and(|e| e.token.is_cancelled())
    }

    #[cfg(test)]
    fn is_running(&self, job_id: &str) -> bool {
        self.jobs.lock().contains_key(job_id)
    }

    fn remove(&self, job_id: &str) {
        self.jobs.lock().remove(job_id);
    }
}
