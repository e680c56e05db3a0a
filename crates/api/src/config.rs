use std::path::PathBuf;
use std::time::Duration;

use bowl_pipeline::ManagerConfig;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    pub request_timeout_secs: u64,
    /// Graceful shutdown timeout, also the per-task deadline of the job
    /// manager's shutdown.
    pub shutdown_timeout_secs: u64,
    /// Root directory of result images.
    pub results_dir: PathBuf,
    pub probe_interval_ms: u64,
    pub probe_timeout_ms: u64,
    /// Longest wait for a submitted job's completion event.
    pub job_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            cors_origins: vec!["http://localhost:5173".into()],
            request_timeout_secs: 30,
            shutdown_timeout_secs: 30,
            results_dir: PathBuf::from("./results"),
            probe_interval_ms: 1000,
            probe_timeout_ms: 2000,
            job_timeout_secs: 600,
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|_| panic!("{name} must be a valid {}", std::any::type_name::<T>())),
        Err(_) => default,
    }
}

fn absolute_dir(path: PathBuf) -> PathBuf {
    std::path::absolute(&path)
        .unwrap_or_else(|e| panic!("RESULTS_DIR `{}` cannot be resolved: {e}", path.display()))
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `3000`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`| `30`                       |
    /// | `RESULTS_DIR`          | `./results`                |
    /// | `PROBE_INTERVAL_MS`    | `1000`                     |
    /// | `PROBE_TIMEOUT_MS`     | `2000`                     |
    /// | `JOB_TIMEOUT_SECS`     | `600`                      |
    ///
    /// `RESULTS_DIR` is resolved to an absolute path. Panics on a value that
    /// does not parse; misconfiguration should fail at startup.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cors_origins: Vec<String> = match std::env::var("CORS_ORIGINS") {
            Ok(raw) => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            Err(_) => defaults.cors_origins,
        };

        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: env_or("PORT", defaults.port),
            cors_origins,
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs),
            shutdown_timeout_secs: env_or("SHUTDOWN_TIMEOUT_SECS", defaults.shutdown_timeout_secs),
            results_dir: absolute_dir(
                std::env::var("RESULTS_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.results_dir),
            ),
            probe_interval_ms: env_or("PROBE_INTERVAL_MS", defaults.probe_interval_ms),
            probe_timeout_ms: env_or("PROBE_TIMEOUT_MS", defaults.probe_timeout_ms),
            job_timeout_secs: env_or("JOB_TIMEOUT_SECS", defaults.job_timeout_secs),
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            probe_interval: Duration::from_millis(self.probe_interval_ms),
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            completion_timeout: Duration::from_secs(self.job_timeout_secs),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }
}
