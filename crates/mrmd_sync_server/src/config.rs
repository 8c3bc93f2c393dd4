use std::env;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Base directory holding the synced documents (default: ./docs)
    pub dir: PathBuf,
    /// Server host (default: 0.0.0.0)
    pub host: String,
    /// Server port (default: 3333)
    pub port: u16,
    /// Quiet interval before a replica change is written out (default: 1000)
    pub debounce_ms: u64,
    /// Cap on sockets across all documents (default: 256)
    pub max_connections: usize,
    /// Cap on sockets per document (default: 32)
    pub max_connections_per_doc: usize,
    /// Largest accepted socket frame in bytes (default: 1 MiB)
    pub max_message_size: usize,
    /// Largest document the filesystem backend will load (default: 10 MiB)
    pub max_file_size: u64,
    /// Heartbeat ping interval (default: 30 000)
    pub ping_interval_ms: u64,
    /// Idle time before a clientless document is evicted (default: 30 000)
    pub doc_cleanup_delay_ms: u64,
    /// Opt-in for base directories under system paths (default: false)
    pub dangerously_allow_system_paths: bool,
    /// Log level: debug|info|warn|error (default: info)
    pub log_level: String,
    /// Persist the encoded replica state alongside the text (default: true)
    pub persist_yjs_state: bool,
    /// Interval between crash-recovery snapshots (default: 30 000)
    pub snapshot_interval_ms: u64,
    /// Prefix stripped from request paths before name derivation
    pub path_prefix: Option<String>,
    /// Recognized document extensions; the first is the default suffix
    pub extensions: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./docs"),
            host: "0.0.0.0".to_string(),
            port: 3333,
            debounce_ms: 1000,
            max_connections: 256,
            max_connections_per_doc: 32,
            max_message_size: 1024 * 1024,
            max_file_size: 10 * 1024 * 1024,
            ping_interval_ms: 30_000,
            doc_cleanup_delay_ms: 30_000,
            dangerously_allow_system_paths: false,
            log_level: "info".to_string(),
            persist_yjs_state: true,
            snapshot_interval_ms: 30_000,
            path_prefix: None,
            extensions: vec!["md".to_string()],
        }
    }
}

impl Config {
    /// Load configuration from `MRMD_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let defaults = Config::default();

        let dir = env::var("MRMD_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.dir);
        let host = env::var("MRMD_HOST").unwrap_or(defaults.host);
        let port = parse_var("MRMD_PORT", defaults.port)?;

        let extensions = match env::var("MRMD_EXTENSIONS") {
            Ok(raw) => {
                let parsed: Vec<String> = raw
                    .split(',')
                    .map(|s| s.trim().trim_start_matches('.').to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                if parsed.is_empty() {
                    defaults.extensions
                } else {
                    parsed
                }
            }
            Err(_) => defaults.extensions,
        };

        Ok(Config {
            dir,
            host,
            port,
            debounce_ms: parse_var("MRMD_DEBOUNCE_MS", defaults.debounce_ms)?,
            max_connections: parse_var("MRMD_MAX_CONNECTIONS", defaults.max_connections)?,
            max_connections_per_doc: parse_var(
                "MRMD_MAX_CONNECTIONS_PER_DOC",
                defaults.max_connections_per_doc,
            )?,
            max_message_size: parse_var("MRMD_MAX_MESSAGE_SIZE", defaults.max_message_size)?,
            max_file_size: parse_var("MRMD_MAX_FILE_SIZE", defaults.max_file_size)?,
            ping_interval_ms: parse_var("MRMD_PING_INTERVAL_MS", defaults.ping_interval_ms)?,
            doc_cleanup_delay_ms: parse_var(
                "MRMD_DOC_CLEANUP_DELAY_MS",
                defaults.doc_cleanup_delay_ms,
            )?,
            dangerously_allow_system_paths: env::var("MRMD_DANGEROUSLY_ALLOW_SYSTEM_PATHS")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            log_level: env::var("MRMD_LOG_LEVEL").unwrap_or(defaults.log_level),
            persist_yjs_state: env::var("MRMD_PERSIST_YJS_STATE")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
            snapshot_interval_ms: parse_var(
                "MRMD_SNAPSHOT_INTERVAL_MS",
                defaults.snapshot_interval_ms,
            )?,
            path_prefix: env::var("MRMD_PATH_PREFIX").ok().filter(|s| !s.is_empty()),
            extensions,
        })
    }

    /// Get the server bind address.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Refuse base directories that are, or sit under, system paths, unless
    /// the operator opted in. Subdirectories more than one level below
    /// `/home` are always allowed (`/home/user/notes` is fine,
    /// `/home/user` is not).
    pub fn check_base_dir(&self) -> Result<(), ConfigError> {
        if self.dangerously_allow_system_paths {
            return Ok(());
        }
        let absolute = if self.dir.is_absolute() {
            self.dir.clone()
        } else {
            env::current_dir().unwrap_or_default().join(&self.dir)
        };
        if is_system_path(&absolute) {
            return Err(ConfigError::DangerousBaseDir(absolute));
        }
        Ok(())
    }
}

const SYSTEM_PATHS: &[&str] = &["/etc", "/usr", "/var", "/bin", "/sbin", "/root", "/home"];

fn is_system_path(dir: &Path) -> bool {
    let normals: Vec<&std::ffi::OsStr> = dir
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect();

    // "/" itself (no normal components) is an ancestor of everything
    if normals.is_empty() {
        return dir.is_absolute();
    }

    let first = Path::new("/").join(normals[0]);
    if !SYSTEM_PATHS.iter().any(|p| Path::new(p) == first) {
        return false;
    }

    // /home gets a depth exception: more than one level below it is fine
    if first == Path::new("/home") {
        return normals.len() <= 2;
    }
    true
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidVar(&'static str),
    DangerousBaseDir(PathBuf),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidVar(name) => {
                write!(f, "Invalid {} environment variable", name)
            }
            ConfigError::DangerousBaseDir(dir) => write!(
                f,
                "Base directory '{}' is a system path; set MRMD_DANGEROUSLY_ALLOW_SYSTEM_PATHS=1 to use it anyway",
                dir.display()
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidVar(name)),
        Err(_) => Ok(default),
    }
}
