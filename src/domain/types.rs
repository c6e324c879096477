use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Codex,
    Claude,
}

impl SourceKind {
    pub const ALL: [SourceKind; 2] = [Self::Codex, Self::Claude];

    pub fn label(self) -> &'static str {
        match self {
            Self::Codex => "Codex",
            Self::Claude => "Claude",
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::Codex => "codex",
            Self::Claude => "claude",
        }
    }

    pub fn from_tag(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "codex" | "cx" => Some(Self::Codex),
            "claude" | "cl" => Some(Self::Claude),
            _ => None,
        }
    }

    /// Whether a file with this extension holds a session log for the source.
    pub fn accepts_extension(self, ext: &str) -> bool {
        match self {
            Self::Codex => ext == "jsonl",
            Self::Claude => ext == "jsonl" || ext == "ndjson",
        }
    }

    pub fn accepts_path(self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.accepts_extension(ext))
    }
}

/// Globally unique session identity: the source tag plus a digest of the log path.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct SessionKey {
    pub source: SourceKind,
    pub id: String,
}

impl SessionKey {
    pub fn for_log_path(source: SourceKind, log_path: &Path) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source.tag().as_bytes());
        hasher.update([0u8]);
        hasher.update(log_path.to_string_lossy().as_bytes());
        let digest = hasher.finalize();
        let id = digest
            .iter()
            .take(8)
            .map(|byte| format!("{byte:02x}"))
            .collect::<String>();
        Self { source, id }
    }

    /// Parses the `source:id` form produced by `Display`.
    pub fn parse(text: &str) -> Option<Self> {
        let (tag, id) = text.trim().split_once(':')?;
        let source = SourceKind::from_tag(tag)?;
        if id.is_empty() {
            return None;
        }
        Some(Self {
            source,
            id: id.to_string(),
        })
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source.tag(), self.id)
    }
}

/// The (mtime, size) pair used to decide whether a file changed since it was last read.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct FileFingerprint {
    pub size_bytes: u64,
    pub modified: Option<SystemTime>,
}

impl FileFingerprint {
    pub fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        Self {
            size_bytes: metadata.len(),
            modified: metadata.modified().ok(),
        }
    }

    pub fn modified_unix_ms(&self) -> Option<i64> {
        self.modified.and_then(system_time_to_unix_ms)
    }
}

pub fn system_time_to_unix_ms(value: SystemTime) -> Option<i64> {
    let delta = value.duration_since(UNIX_EPOCH).ok()?;
    i64::try_from(delta.as_millis()).ok()
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum MessageCount {
    Exact(u64),
    Estimated(u64),
}

impl MessageCount {
    pub fn value(self) -> u64 {
        match self {
            Self::Exact(value) | Self::Estimated(value) => value,
        }
    }

    pub fn is_estimate(self) -> bool {
        matches!(self, Self::Estimated(_))
    }

    pub fn label(self) -> String {
        match self {
            Self::Exact(value) => value.to_string(),
            Self::Estimated(value) => format!("~{value}"),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum SummaryStatus {
    Ok,
    Unreadable { reason: String },
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SessionSummary {
    pub key: SessionKey,
    /// Session id as recorded inside the log, when present.
    pub native_id: Option<String>,
    pub log_path: PathBuf,
    pub title: String,
    pub started_at_ms: i64,
    pub last_activity_ms: Option<i64>,
    pub cwd: Option<PathBuf>,
    pub repo: Option<String>,
    pub git_branch: Option<String>,
    pub models: Vec<String>,
    pub message_count: MessageCount,
    pub file_size_bytes: u64,
    #[serde(skip)]
    pub fingerprint: FileFingerprint,
    pub many_messages: bool,
    /// Approximate size shown instead of an exact count, e.g. `~110MB`.
    pub size_label: Option<String>,
    pub preamble_detected: bool,
    pub status: SummaryStatus,
}

impl SessionSummary {
    pub fn source(&self) -> SourceKind {
        self.key.source
    }

    pub fn is_unreadable(&self) -> bool {
        matches!(self.status, SummaryStatus::Unreadable { .. })
    }

    pub fn started_at_rfc3339(&self) -> String {
        super::format_unix_ms_rfc3339(self.started_at_ms)
    }
}

pub fn repo_name_from_cwd(cwd: &Path) -> Option<String> {
    cwd.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .filter(|name| !name.is_empty())
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    User,
    Assistant,
    ToolCall,
    ToolResult,
    System,
    Preamble,
}

impl EventKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Assistant => "ASSISTANT",
            Self::ToolCall => "TOOL",
            Self::ToolResult => "TOOL_OUT",
            Self::System => "SYSTEM",
            Self::Preamble => "PREAMBLE",
        }
    }

    /// Conversation turns counted as messages; system notes and preamble are not.
    pub fn is_message(self) -> bool {
        matches!(
            self,
            Self::User | Self::Assistant | Self::ToolCall | Self::ToolResult
        )
    }
}

/// Fields only one of the two log schemas carries.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "schema", rename_all = "lowercase")]
pub enum SourceFields {
    Codex {
        record_type: String,
        call_id: Option<String>,
    },
    Claude {
        uuid: Option<String>,
        call_id: Option<String>,
        sidechain: bool,
    },
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SessionEvent {
    pub kind: EventKind,
    /// 1-based line number in the source log.
    pub line_no: u64,
    pub timestamp_ms: Option<i64>,
    pub text: String,
    pub tool_name: Option<String>,
    pub fields: SourceFields,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Transcript {
    pub key: SessionKey,
    #[serde(skip)]
    pub fingerprint: FileFingerprint,
    pub events: Vec<SessionEvent>,
    pub malformed_lines: usize,
    /// The last line was incomplete (file still being written) and was left for a later read.
    pub pending_tail: bool,
}

impl Transcript {
    pub fn message_count(&self) -> u64 {
        self.events
            .iter()
            .filter(|event| event.kind.is_message())
            .count() as u64
    }

    /// Rough in-memory footprint, used for the cache byte budget.
    pub fn approx_bytes(&self) -> u64 {
        self.events
            .iter()
            .map(|event| {
                let tool = event.tool_name.as_ref().map_or(0, String::len);
                (event.text.len() + tool + 96) as u64
            })
            .sum()
    }

    /// True when event timestamps never decrease in file order.
    pub fn is_chronological(&self) -> bool {
        let mut last: Option<i64> = None;
        for ts in self.events.iter().filter_map(|event| event.timestamp_ms) {
            if last.is_some_and(|prev| ts < prev) {
                return false;
            }
            last = Some(ts);
        }
        true
    }
}
