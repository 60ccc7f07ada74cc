//! Cancellation tokens for running pipelines, keyed by job id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use cadence_core::{JobId, TaskId};

#[derive(Debug, Default)]
struct Inner {
    tokens: Mutex<HashMap<JobId, (TaskId, CancellationToken)>>,
}

/// Shared map from running job to the token its pipeline watches.
#[derive(Debug, Clone, Default)]
pub struct CancellationRegistry {
    inner: Arc<Inner>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the execution of `task_id` for `job_id`.
    ///
    /// The returned guard deregisters on drop, unless a later execution of
    /// the same job has replaced it.
    pub fn register(&self, job_id: JobId, task_id: TaskId) -> CancellationGuard {
        let token = CancellationToken::new();
        if let Ok(mut tokens) = self.inner.tokens.lock() {
            tokens.insert(job_id, (task_id, token.clone()));
        }
        CancellationGuard {
            registry: self.clone(),
            job_id,
            task_id,
            token,
        }
    }

    /// Signal the pipeline running `job_id`, if any. Returns whether one was signalled.
    pub fn cancel(&self, job_id: JobId) -> bool {
        let Ok(tokens) = self.inner.tokens.lock() else {
            return false;
        };
        match tokens.get(&job_id) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, job_id: JobId) -> bool {
        self.inner
            .tokens
            .lock()
            .map(|t| t.contains_key(&job_id))
            .unwrap_or(false)
    }

    fn deregister(&self, job_id: JobId, task_id: TaskId) {
        if let Ok(mut tokens) = self.inner.tokens.lock() {
            if tokens.get(&job_id).is_some_and(|(t, _)| *t == task_id) {
                tokens.remove(&job_id);
            }
        }
    }
}

/// Registration of one pipeline execution.
#[derive(Debug)]
pub struct CancellationGuard {
    registry: CancellationRegistry,
    job_id: JobId,
    task_id: TaskId,
    token: CancellationToken,
}

impl CancellationGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for CancellationGuard {
    fn drop(&mut self) {
        self.registry.deregister(self.job_id, self.task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_signals_registered_token() {
        let registry = CancellationRegistry::new();
        let job = JobId::new();
        let guard = registry.register(job, TaskId::new());

        assert!(registry.cancel(job));
        assert!(guard.token().is_cancelled());
    }

    #[test]
    fn cancel_without_running_pipeline_is_a_no_op() {
        let registry = CancellationRegistry::new();
        assert!(!registry.cancel(JobId::new()));
    }

    #[test]
    fn guard_deregisters_on_drop() {
        let registry = CancellationRegistry::new();
        let job = JobId::new();
        drop(registry.register(job, TaskId::new()));
        assert!(!registry.is_registered(job));
    }

    #[test]
    fn stale_guard_does_not_remove_newer_registration() {
        let registry = CancellationRegistry::new();
        let job = JobId::new();
        let first = registry.register(job, TaskId::new());
        let second = registry.register(job, TaskId::new());

        drop(first);
        assert!(registry.is_registered(job));
        assert!(registry.cancel(job));
        assert!(second.token().is_cancelled());
    }
}
