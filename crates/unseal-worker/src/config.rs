//! Configuration for the decryptor worker

use std::path::PathBuf;

/// Configuration for a DecryptorWorker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Base directory for worker data (keystore)
    pub data_dir: PathBuf,
    /// Maximum number of requests handled concurrently
    pub max_in_flight: usize,
    /// Event sequence cursor to resume from; 0 replays the full log
    pub resume_from: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./unseal-data"),
            max_in_flight: 16,
            resume_from: 0,
        }
    }
}

impl WorkerConfig {
    /// Create a configuration with a custom data directory
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Set the concurrent request bound (clamped to at least 1)
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Set the event sequence cursor to resume from
    pub fn with_resume_from(mut self, resume_from: u64) -> Self {
        self.resume_from = resume_from;
        self
    }

    /// Read overrides from the environment.
    ///
    /// `UNSEAL_DATA_DIR`, `UNSEAL_MAX_IN_FLIGHT`, and `UNSEAL_RESUME_FROM`
    /// are consulted; unset or unparsable values keep the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var("UNSEAL_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(value) = std::env::var("UNSEAL_MAX_IN_FLIGHT")
            && let Ok(parsed) = value.parse::<usize>()
        {
            config.max_in_flight = parsed.max(1);
        }
        if let Ok(value) = std::env::var("UNSEAL_RESUME_FROM")
            && let Ok(parsed) = value.parse::<u64>()
        {
            config.resume_from = parsed;
        }
        config
    }
}
