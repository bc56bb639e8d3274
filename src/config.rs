use crate::common::{DEFAULT_QUEUE_CAPACITY, DEFAULT_RESULT_TIMEOUT, DEFAULT_UPLOAD_LIMIT_MB};
use anyhow::{Context, Result};
use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, thread::available_parallelism, time::Duration};

/// What `POST /api/pipe` does when the job buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdmissionPolicy {
    /// Hold the request until a slot frees up.
    #[default]
    Block,
    /// Answer 503 right away.
    Reject,
}

/// Service settings, read from `CHIVE_*` environment variables (and `.env`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding the `input/` and `output/` staging roots.
    pub work_root: PathBuf,
    /// Path of the external pipeline tool.
    pub cv_executable: PathBuf,
    /// Number of pipeline workers, i.e. concurrently running tool processes.
    pub workers: usize,
    pub queue_capacity: usize,
    pub result_timeout_secs: u64,
    pub admission: AdmissionPolicy,
    /// Multipart upload limit (MB)
    pub upload_limit_mb: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            work_root: PathBuf::from(".."),
            cv_executable: PathBuf::from("../cv/build/cv.exe"),
            workers: available_parallelism().map(|n| n.get()).unwrap_or(4),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            result_timeout_secs: DEFAULT_RESULT_TIMEOUT.as_secs(),
            admission: AdmissionPolicy::default(),
            upload_limit_mb: DEFAULT_UPLOAD_LIMIT_MB,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        envy::prefixed("CHIVE_")
            .from_env::<AppConfig>()
            .context("Failed to read CHIVE_* configuration from environment")
    }

    pub fn result_timeout(&self) -> Duration {
        Duration::from_secs(self.result_timeout_secs)
    }
}
