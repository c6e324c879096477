use crate::domain::SourceKind;
use crate::infra::SummarizeSettings;
use dirs::home_dir;
use serde::Deserialize;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CODEX_SESSIONS_DIR_ENV: &str = "CODEX_SESSIONS_DIR";
pub const CLAUDE_PROJECTS_DIR_ENV: &str = "CLAUDE_PROJECTS_DIR";
pub const MANY_MESSAGES_BYTES_ENV: &str = "AGENT_SESSIONS_MANY_MESSAGES_BYTES";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Settings {
    pub codex_root: PathBuf,
    pub claude_root: PathBuf,
    pub summarize: SummarizeSettings,
    pub cache_max_entries: usize,
    pub cache_max_bytes: u64,
    pub query_debounce: Duration,
    pub deep_search_debounce: Duration,
    pub refresh_debounce: Duration,
    pub refresh_max_delay: Duration,
    /// Replace estimated message counts with exact ones once a transcript has been hydrated.
    pub reconcile_counts_on_hydrate: bool,
}

impl Settings {
    pub fn with_roots(codex_root: PathBuf, claude_root: PathBuf) -> Self {
        Self {
            codex_root,
            claude_root,
            summarize: SummarizeSettings::default(),
            cache_max_entries: 32,
            cache_max_bytes: 256 * 1024 * 1024,
            query_debounce: Duration::from_millis(150),
            deep_search_debounce: Duration::from_millis(400),
            refresh_debounce: Duration::from_millis(900),
            refresh_max_delay: Duration::from_millis(5_000),
            reconcile_counts_on_hydrate: false,
        }
    }

    pub fn root_for(&self, source: SourceKind) -> &Path {
        match source {
            SourceKind::Codex => &self.codex_root,
            SourceKind::Claude => &self.claude_root,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("home directory not found")]
    HomeDirNotFound,

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SettingsFile {
    codex_sessions_dir: Option<PathBuf>,
    claude_projects_dir: Option<PathBuf>,
    many_messages_bytes: Option<u64>,
    many_messages_lines: Option<u64>,
    cache_max_entries: Option<usize>,
    cache_max_bytes: Option<u64>,
    query_debounce_ms: Option<u64>,
    deep_search_debounce_ms: Option<u64>,
    refresh_debounce_ms: Option<u64>,
    refresh_max_delay_ms: Option<u64>,
    reconcile_counts_on_hydrate: Option<bool>,
}

pub fn resolve_state_dir(home: &Path) -> PathBuf {
    home.join(".agent-sessions")
}

pub fn config_path(home: &Path) -> PathBuf {
    resolve_state_dir(home).join("config.json")
}

pub fn load_settings() -> Result<Settings, ConfigError> {
    let Some(home) = home_dir() else {
        return Err(ConfigError::HomeDirNotFound);
    };
    load_settings_with(&home, |name| std::env::var_os(name))
}

/// Defaults, then `~/.agent-sessions/config.json`, then environment overrides.
pub fn load_settings_with(
    home: &Path,
    env: impl Fn(&str) -> Option<OsString>,
) -> Result<Settings, ConfigError> {
    let mut settings = Settings::with_roots(
        home.join(".codex").join("sessions"),
        home.join(".claude").join("projects"),
    );

    let path = config_path(home);
    let file = match fs::read_to_string(&path) {
        Ok(raw) => serde_json::from_str::<SettingsFile>(&raw).map_err(|source| {
            ConfigError::Parse {
                path: path.clone(),
                source,
            }
        })?,
        Err(error) if error.kind() == io::ErrorKind::NotFound => SettingsFile::default(),
        Err(source) => return Err(ConfigError::Read { path, source }),
    };
    apply_file(&mut settings, file);

    if let Some(dir) = env(CODEX_SESSIONS_DIR_ENV) {
        settings.codex_root = PathBuf::from(dir);
    }
    if let Some(dir) = env(CLAUDE_PROJECTS_DIR_ENV) {
        settings.claude_root = PathBuf::from(dir);
    }
    if let Some(raw) = env(MANY_MESSAGES_BYTES_ENV) {
        match raw.to_string_lossy().trim().parse::<u64>() {
            Ok(bytes) => settings.summarize.many_messages_bytes = bytes,
            Err(_) => tracing::warn!(
                value = %raw.to_string_lossy(),
                "ignoring invalid {MANY_MESSAGES_BYTES_ENV}"
            ),
        }
    }

    Ok(settings)
}

fn apply_file(settings: &mut Settings, file: SettingsFile) {
    if let Some(dir) = file.codex_sessions_dir {
        settings.codex_root = dir;
    }
    if let Some(dir) = file.claude_projects_dir {
        settings.claude_root = dir;
    }
    if let Some(bytes) = file.many_messages_bytes {
        settings.summarize.many_messages_bytes = bytes;
    }
    if let Some(lines) = file.many_messages_lines {
        settings.summarize.many_messages_lines = lines;
    }
    if let Some(entries) = file.cache_max_entries {
        settings.cache_max_entries = entries;
    }
    if let Some(bytes) = file.cache_max_bytes {
        settings.cache_max_bytes = bytes;
    }
    if let Some(ms) = file.query_debounce_ms {
        settings.query_debounce = Duration::from_millis(ms);
    }
    if let Some(ms) = file.deep_search_debounce_ms {
        settings.deep_search_debounce = Duration::from_millis(ms);
    }
    if let Some(ms) = file.refresh_debounce_ms {
        settings.refresh_debounce = Duration::from_millis(ms);
    }
    if let Some(ms) = file.refresh_max_delay_ms {
        settings.refresh_max_delay = Duration::from_millis(ms);
    }
    if let Some(reconcile) = file.reconcile_counts_on_hydrate {
        settings.reconcile_counts_on_hydrate = reconcile;
    }
}
