use crate::core::types::{CommandRequest, CommandResult};
use futures::future::{BoxFuture, Shared};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

pub type SharedRun = Shared<BoxFuture<'static, CommandResult>>;

/// In-flight runs of deduplicated requests, keyed by content hash.
#[derive(Default)]
pub struct InflightRuns {
    runs: Mutex<HashMap<String, SharedRun>>,
}

impl InflightRuns {
    /// Join the run for `key`, or start one with `start` when none is in flight.
    pub fn join_or_start<F>(&self, key: &str, start: F) -> (SharedRun, bool)
    where
        F: FnOnce() -> SharedRun,
    {
        let mut runs = self.lock();
        if let Some(existing) = runs.get(key) {
            return (existing.clone(), true);
        }
        let run = start();
        runs.insert(key.to_string(), run.clone());
        (run, false)
    }

    pub fn finish(&self, key: &str) {
        self.lock().remove(key);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SharedRun>> {
        self.runs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// SHA-256 over tool, arguments and working directory. Fields are NUL-separated so
/// `["a b"]` and `["a", "b"]` hash differently.
pub fn dedupe_key(request: &CommandRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.tool.as_str().as_bytes());
    hasher.update([0u8]);
    for arg in &request.args {
        hasher.update(arg.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update([1u8]);
    if let Some(cwd) = &request.cwd {
        hasher.update(cwd.to_string_lossy().as_bytes());
    }
    hex::encode(hasher.finalize())
}
