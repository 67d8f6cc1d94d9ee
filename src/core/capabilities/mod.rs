//! Version probe for the supported tools, with a TTL cache.

use crate::core::supervisor::ProcessSupervisor;
use crate::core::types::{
    CapabilitiesResult, CommandResult, FeatureFlags, GhFeatures, GitFeatures, Tool,
};
use chrono::Utc;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const VERSION_ARGS: [&str; 1] = ["--version"];

/// `major.minor[.patch]` as reported by a tool's version banner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ToolVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl ToolVersion {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// First version-looking token in `banner`, e.g. `git version 2.43.0`.
    pub fn parse(banner: &str) -> Option<Self> {
        static VERSION_RE: OnceLock<Option<Regex>> = OnceLock::new();
        let re = VERSION_RE
            .get_or_init(|| Regex::new(r"(\d+)\.(\d+)(?:\.(\d+))?").ok())
            .as_ref()?;
        let caps = re.captures(banner)?;
        let part = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u64>().ok());
        Some(Self::new(part(1)?, part(2)?, part(3).unwrap_or(0)))
    }
}

impl std::fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

pub fn git_features(version: Option<ToolVersion>) -> GitFeatures {
    let at_least = |min: ToolVersion| version.map(|v| v >= min).unwrap_or(false);
    GitFeatures {
        worktree: at_least(ToolVersion::new(2, 5, 0)),
        switch_restore: at_least(ToolVersion::new(2, 23, 0)),
        sparse_checkout: at_least(ToolVersion::new(2, 25, 0)),
    }
}

pub fn gh_features(version: Option<ToolVersion>) -> GhFeatures {
    let at_least = |min: ToolVersion| version.map(|v| v >= min).unwrap_or(false);
    GhFeatures {
        json_output: at_least(ToolVersion::new(2, 0, 0)),
        repo_clone: at_least(ToolVersion::new(1, 0, 0)),
    }
}

struct Probe {
    version: Option<ToolVersion>,
    error: Option<String>,
}

fn probe_from(tool: Tool, result: &CommandResult) -> Probe {
    if !result.success {
        return Probe {
            version: None,
            error: Some(format!(
                "{}: {}",
                tool,
                result.error.as_deref().unwrap_or("version probe failed")
            )),
        };
    }
    let banner = match &result.data {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    match ToolVersion::parse(&banner) {
        Some(version) => Probe {
            version: Some(version),
            error: None,
        },
        None => Probe {
            version: None,
            error: Some(format!("{}: could not parse version from '{}'", tool, banner.trim())),
        },
    }
}

struct CachedResult {
    stored_at: Instant,
    result: CapabilitiesResult,
}

/// Runs `--version` for every tool through the supervisor and caches the outcome.
pub struct CapabilitiesProbe {
    supervisor: ProcessSupervisor,
    ttl: Duration,
    cache: Mutex<Option<CachedResult>>,
}

impl CapabilitiesProbe {
    pub fn new(supervisor: ProcessSupervisor, ttl: Duration) -> Self {
        Self {
            supervisor,
            ttl,
            cache: Mutex::new(None),
        }
    }

    /// Cached capabilities, re-probed when stale or when `force_refresh` is set.
    ///
    /// Concurrent callers share one probe: the cache lock is held while probing.
    pub async fn check(&self, force_refresh: bool) -> CapabilitiesResult {
        let mut cache = self.cache.lock().await;
        if !force_refresh {
            if let Some(cached) = cache.as_ref() {
                if cached.stored_at.elapsed() < self.ttl {
                    return cached.result.clone();
                }
            }
        }

        let result = self.probe().await;
        *cache = Some(CachedResult {
            stored_at: Instant::now(),
            result: result.clone(),
        });
        result
    }

    pub async fn invalidate(&self) {
        self.cache.lock().await.take();
    }

    async fn probe(&self) -> CapabilitiesResult {
        let (git, gh) = tokio::join!(
            self.supervisor.git(VERSION_ARGS),
            self.supervisor.gh(VERSION_ARGS)
        );
        let git = probe_from(Tool::Git, &git);
        let gh = probe_from(Tool::Gh, &gh);

        let errors: Vec<String> = [&git.error, &gh.error]
            .into_iter()
            .flatten()
            .cloned()
            .collect();
        let result = CapabilitiesResult {
            git: git.version.map(|v| v.to_string()),
            gh: gh.version.map(|v| v.to_string()),
            features: FeatureFlags {
                git: git_features(git.version),
                gh: gh_features(gh.version),
            },
            available: git.version.is_some() && gh.version.is_some(),
            error: if errors.is_empty() {
                None
            } else {
                Some(errors.join("; "))
            },
            checked_at: Utc::now(),
        };
        tracing::info!(
            git = result.git.as_deref().unwrap_or("-"),
            gh = result.gh.as_deref().unwrap_or("-"),
            available = result.available,
            "tool capabilities probed"
        );
        result
    }
}
