//! Id-keyed table of live processes.
//!
//! Every spawned child is registered through a [`Registration`] guard; dropping the
//! guard removes the entry, so success, failure, timeout and forced kill all leave
//! the table clean.

use crate::core::types::{LiveProcessInfo, ProcessStats, Tool};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug)]
struct LiveProcess {
    info: LiveProcessInfo,
    kill: CancellationToken,
}

/// How a tracked process ended, for the lifetime counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessEnd {
    Succeeded,
    Failed,
    TimedOut,
    Killed,
}

#[derive(Debug, Default)]
struct Counters {
    spawned: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    killed: AtomicU64,
    spawn_failures: AtomicU64,
}

#[derive(Debug, Default)]
pub struct ProcessRegistry {
    entries: Mutex<HashMap<Uuid, LiveProcess>>,
    counters: Counters,
    idle: Notify,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tool: Tool, pid: Option<u32>, command: String) -> Registration<'_> {
        let id = Uuid::new_v4();
        let kill = CancellationToken::new();
        self.lock().insert(
            id,
            LiveProcess {
                info: LiveProcessInfo {
                    id,
                    tool,
                    pid,
                    command,
                    started_at: Utc::now(),
                },
                kill: kill.clone(),
            },
        );
        self.counters.spawned.fetch_add(1, Ordering::Relaxed);
        Registration {
            registry: self,
            id,
            kill,
        }
    }

    pub fn record_spawn_failure(&self) {
        self.counters.spawn_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Signal every live process to be killed. Entries are removed by their owners
    /// once the kill has completed.
    pub fn kill_all(&self) -> usize {
        let entries = self.lock();
        for process in entries.values() {
            tracing::debug!(
                process_id = %process.info.id,
                pid = process.info.pid,
                command = %process.info.command,
                "killing live process"
            );
            process.kill.cancel();
        }
        entries.len()
    }

    pub fn live(&self) -> usize {
        self.lock().len()
    }

    /// Resolves once no process is tracked.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.live() == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn stats(&self) -> ProcessStats {
        let mut processes: Vec<LiveProcessInfo> =
            self.lock().values().map(|p| p.info.clone()).collect();
        processes.sort_by_key(|info| info.started_at);
        ProcessStats {
            live: processes.len(),
            spawned: self.counters.spawned.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            timed_out: self.counters.timed_out.load(Ordering::Relaxed),
            killed: self.counters.killed.load(Ordering::Relaxed),
            spawn_failures: self.counters.spawn_failures.load(Ordering::Relaxed),
            processes,
        }
    }

    fn remove(&self, id: Uuid) {
        let mut entries = self.lock();
        entries.remove(&id);
        if entries.is_empty() {
            self.idle.notify_waiters();
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, LiveProcess>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Ownership of one registry entry.
#[derive(Debug)]
pub struct Registration<'a> {
    registry: &'a ProcessRegistry,
    id: Uuid,
    kill: CancellationToken,
}

impl Registration<'_> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Cancelled when the process must be killed.
    pub fn kill_signal(&self) -> &CancellationToken {
        &self.kill
    }

    pub fn finish(self, end: ProcessEnd) {
        let counter = match end {
            ProcessEnd::Succeeded => &self.registry.counters.succeeded,
            ProcessEnd::Failed => &self.registry.counters.failed,
            ProcessEnd::TimedOut => &self.registry.counters.timed_out,
            ProcessEnd::Killed => &self.registry.counters.killed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}
