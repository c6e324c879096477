use crate::domain::{
    EventKind, FileFingerprint, MessageCount, ParsedRecord, RawLine, RecordOutcome, SessionKey,
    SessionSummary, SourceKind, SummaryStatus, derive_title_from_user_text, parse_record,
    repo_name_from_cwd,
};
use humansize::{DECIMAL, format_size};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use thiserror::Error;

const UNTITLED: &str = "(untitled)";
/// Assumed record size when not a single complete record fits in the head read.
const FALLBACK_RECORD_BYTES: u64 = 4_096;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SummarizeSettings {
    /// Files larger than this are summarized from head and tail windows only.
    pub many_messages_bytes: u64,
    /// Fully parsed files with more lines than this are still flagged as "many messages".
    pub many_messages_lines: u64,
    pub head_window_bytes: u64,
    pub tail_window_bytes: u64,
}

impl Default for SummarizeSettings {
    fn default() -> Self {
        Self {
            many_messages_bytes: 20_000_000,
            many_messages_lines: 2_000,
            head_window_bytes: 256 * 1024,
            tail_window_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("session file vanished: {0}")]
    FileVanished(PathBuf),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn read_error(path: &Path, error: io::Error) -> SummarizeError {
    if error.kind() == io::ErrorKind::NotFound {
        SummarizeError::FileVanished(path.to_path_buf())
    } else {
        SummarizeError::Read {
            path: path.to_path_buf(),
            source: error,
        }
    }
}

pub fn summarize_session_file(
    path: &Path,
    source: SourceKind,
    settings: &SummarizeSettings,
) -> Result<SessionSummary, SummarizeError> {
    let metadata = fs::metadata(path).map_err(|error| read_error(path, error))?;
    let fingerprint = FileFingerprint::from_metadata(&metadata);
    if fingerprint.size_bytes > settings.many_messages_bytes {
        summarize_windowed(path, source, fingerprint, settings)
    } else {
        summarize_full(path, source, fingerprint, settings)
    }
}

fn summarize_full(
    path: &Path,
    source: SourceKind,
    fingerprint: FileFingerprint,
    settings: &SummarizeSettings,
) -> Result<SessionSummary, SummarizeError> {
    let file = File::open(path).map_err(|error| read_error(path, error))?;
    let mut builder = SummaryBuilder::new(source);
    read_lines(BufReader::new(file), 1, |line, _| builder.observe(line))
        .map_err(|error| read_error(path, error))?;

    let many_messages = builder.lines > settings.many_messages_lines;
    let message_count = MessageCount::Exact(builder.messages);
    let size_label = many_messages.then(|| approximate_size_label(fingerprint.size_bytes));
    Ok(builder.finish(path, fingerprint, message_count, many_messages, size_label))
}

fn summarize_windowed(
    path: &Path,
    source: SourceKind,
    fingerprint: FileFingerprint,
    settings: &SummarizeSettings,
) -> Result<SessionSummary, SummarizeError> {
    let file = File::open(path).map_err(|error| read_error(path, error))?;
    let mut builder = SummaryBuilder::new(source);
    let mut head_bytes = 0u64;
    let mut consumed = 0u64;
    let mut window_start: Option<u64> = None;
    // Whole lines only. The window opens after the first record, however large that one is,
    // and a single record is never read past `many_messages_bytes`.
    let head_limit = settings.many_messages_bytes.max(settings.head_window_bytes);
    read_lines_until(
        BufReader::new(file.take(head_limit)),
        1,
        |line, bytes| {
            consumed += bytes as u64;
            if line.terminated {
                head_bytes += bytes as u64;
            }
            builder.observe(line);
            let start = *window_start.get_or_insert(consumed);
            consumed - start < settings.head_window_bytes
        },
    )
    .map_err(|error| read_error(path, error))?;

    let head_lines = builder.lines;
    let head_messages = builder.messages;

    // Later lines only refine metadata: last activity, extra models, a late cwd.
    builder.counting = false;
    let (tail, start) =
        read_tail(path, settings.tail_window_bytes).map_err(|error| read_error(path, error))?;
    let tail = if start > 0 {
        // The first tail line is almost certainly cut.
        match tail.iter().position(|byte| *byte == b'\n') {
            Some(index) => &tail[index + 1..],
            None => &[][..],
        }
    } else {
        &tail[..]
    };
    read_lines(Cursor::new(tail), 0, |line, _| builder.observe(line))
        .map_err(|error| read_error(path, error))?;

    let estimate = estimate_messages(fingerprint.size_bytes, head_bytes, head_lines, head_messages);
    let size_label = Some(approximate_size_label(fingerprint.size_bytes));
    Ok(builder.finish(
        path,
        fingerprint,
        MessageCount::Estimated(estimate),
        true,
        size_label,
    ))
}

/// Scales the head window's message density to the whole file.
fn estimate_messages(size_bytes: u64, head_bytes: u64, head_lines: u64, head_messages: u64) -> u64 {
    if head_bytes == 0 || head_lines == 0 {
        return (size_bytes / FALLBACK_RECORD_BYTES).max(1);
    }
    let per_byte = if head_messages > 0 {
        head_messages as f64 / head_bytes as f64
    } else {
        head_lines as f64 / head_bytes as f64
    };
    (size_bytes as f64 * per_byte).round() as u64
}

pub fn approximate_size_label(size_bytes: u64) -> String {
    let size = format_size(
        size_bytes,
        DECIMAL.decimal_places(0).space_after_value(false),
    );
    format!("~{size}")
}

/// Placeholder shown for files that exist but could not be read.
pub fn unreadable_summary(
    path: &Path,
    source: SourceKind,
    fingerprint: FileFingerprint,
    reason: String,
) -> SessionSummary {
    SessionSummary {
        key: SessionKey::for_log_path(source, path),
        native_id: None,
        log_path: path.to_path_buf(),
        title: UNTITLED.to_string(),
        started_at_ms: fingerprint.modified_unix_ms().unwrap_or(0),
        last_activity_ms: fingerprint.modified_unix_ms(),
        cwd: None,
        repo: None,
        git_branch: None,
        models: Vec::new(),
        message_count: MessageCount::Exact(0),
        file_size_bytes: fingerprint.size_bytes,
        fingerprint,
        many_messages: false,
        size_label: None,
        preamble_detected: false,
        status: SummaryStatus::Unreadable { reason },
    }
}

/// Reads newline-delimited lines, decoding each lossily. The callback also gets the raw byte
/// length including the terminator.
pub(crate) fn read_lines<R: BufRead>(
    reader: R,
    first_line_no: u64,
    mut visit: impl FnMut(RawLine<'_>, usize),
) -> io::Result<()> {
    read_lines_until(reader, first_line_no, |line, bytes| {
        visit(line, bytes);
        true
    })
}

/// Like `read_lines`, but stops after the first line for which `visit` returns false.
fn read_lines_until<R: BufRead>(
    mut reader: R,
    first_line_no: u64,
    mut visit: impl FnMut(RawLine<'_>, usize) -> bool,
) -> io::Result<()> {
    let mut buf = Vec::new();
    let mut line_no = first_line_no;
    loop {
        buf.clear();
        let bytes = reader.read_until(b'\n', &mut buf)?;
        if bytes == 0 {
            return Ok(());
        }
        let terminated = buf.last() == Some(&b'\n');
        let text = String::from_utf8_lossy(&buf);
        let text = text.trim_end_matches(['\n', '\r']);
        let more = visit(
            RawLine {
                text,
                line_no,
                terminated,
            },
            bytes,
        );
        if !more {
            return Ok(());
        }
        line_no += 1;
    }
}

/// Returns up to `max_bytes` from the end of the file and the offset they start at.
pub fn read_tail(path: &Path, max_bytes: u64) -> io::Result<(Vec<u8>, u64)> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    let start = size.saturating_sub(max_bytes);
    file.seek(SeekFrom::Start(start))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok((buf, start))
}

struct SummaryBuilder {
    source: SourceKind,
    counting: bool,
    native_id: Option<String>,
    cwd: Option<PathBuf>,
    git_branch: Option<String>,
    models: Vec<String>,
    first_ts: Option<i64>,
    last_ts: Option<i64>,
    title: Option<String>,
    preamble_detected: bool,
    messages: u64,
    lines: u64,
    malformed: u64,
}

impl SummaryBuilder {
    fn new(source: SourceKind) -> Self {
        Self {
            source,
            counting: true,
            native_id: None,
            cwd: None,
            git_branch: None,
            models: Vec::new(),
            first_ts: None,
            last_ts: None,
            title: None,
            preamble_detected: false,
            messages: 0,
            lines: 0,
            malformed: 0,
        }
    }

    fn observe(&mut self, line: RawLine<'_>) {
        match parse_record(line, self.source) {
            Ok(RecordOutcome::Parsed(record)) => {
                if self.counting {
                    self.lines += 1;
                }
                self.absorb(record);
            }
            Ok(RecordOutcome::Blank | RecordOutcome::Pending) => {}
            Err(error) => {
                if self.counting {
                    self.lines += 1;
                }
                self.malformed += 1;
                tracing::debug!(line = line.line_no, %error, "skipping malformed record");
            }
        }
    }

    fn absorb(&mut self, record: ParsedRecord) {
        let meta = record.meta;
        if self.native_id.is_none() {
            self.native_id = meta.native_id;
        }
        if self.cwd.is_none() {
            self.cwd = meta.cwd;
        }
        if self.git_branch.is_none() {
            self.git_branch = meta.git_branch;
        }
        if let Some(model) = meta.model
            && !self.models.contains(&model)
        {
            self.models.push(model);
        }
        if let Some(ts) = meta.timestamp_ms {
            if self.counting && self.first_ts.is_none() {
                self.first_ts = Some(ts);
            }
            self.last_ts = Some(self.last_ts.map_or(ts, |last| last.max(ts)));
        }

        for event in &record.events {
            if self.counting && event.kind.is_message() {
                self.messages += 1;
            }
            match event.kind {
                EventKind::Preamble => self.preamble_detected = true,
                EventKind::User if self.title.is_none() => {
                    self.title = derive_title_from_user_text(&event.text);
                }
                _ => {}
            }
        }
    }

    fn finish(
        self,
        path: &Path,
        fingerprint: FileFingerprint,
        message_count: MessageCount,
        many_messages: bool,
        size_label: Option<String>,
    ) -> SessionSummary {
        if self.malformed > 0 {
            tracing::debug!(
                path = %path.display(),
                malformed = self.malformed,
                "summarized with malformed records"
            );
        }
        let modified_ms = fingerprint.modified_unix_ms();
        let repo = self.cwd.as_deref().and_then(repo_name_from_cwd);
        SessionSummary {
            key: SessionKey::for_log_path(self.source, path),
            native_id: self.native_id,
            log_path: path.to_path_buf(),
            title: self.title.unwrap_or_else(|| UNTITLED.to_string()),
            started_at_ms: self.first_ts.or(modified_ms).unwrap_or(0),
            last_activity_ms: self.last_ts.or(modified_ms),
            cwd: self.cwd,
            repo,
            git_branch: self.git_branch,
            models: self.models,
            message_count,
            file_size_bytes: fingerprint.size_bytes,
            fingerprint,
            many_messages,
            size_label,
            preamble_detected: self.preamble_detected,
            status: SummaryStatus::Ok,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn claude_user(ts: &str, text: &str) -> String {
        serde_json::json!({
            "type": "user",
            "sessionId": "s-1",
            "cwd": "/work/Codex-History",
            "timestamp": ts,
            "message": { "role": "user", "content": text }
        })
        .to_string()
    }

    fn claude_assistant(ts: &str, text: &str) -> String {
        serde_json::json!({
            "type": "assistant",
            "timestamp": ts,
            "message": { "model": "claude-opus-4-1", "content": [{ "type": "text", "text": text }] }
        })
        .to_string()
    }

    fn write_lines(path: &Path, lines: &[String]) {
        let mut out = lines.join("\n");
        out.push('\n');
        fs::write(path, out).expect("write");
    }

    #[test]
    fn small_file_gets_exact_counts_title_and_metadata() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("s.jsonl");
        write_lines(
            &path,
            &[
                claude_user("2025-01-01T10:00:00Z", "<command-name>/clear</command-name>"),
                claude_user("2025-01-01T10:00:01Z", "Fix   the build\nplease"),
                claude_assistant("2025-01-01T10:00:02Z", "On it."),
                "not json".to_string(),
                claude_assistant("2025-01-01T10:00:05Z", "Done."),
            ],
        );

        let summary =
            summarize_session_file(&path, SourceKind::Claude, &SummarizeSettings::default())
                .expect("summary");
        assert_eq!(summary.message_count, MessageCount::Exact(3));
        assert_eq!(summary.title, "Fix the build");
        assert!(summary.preamble_detected);
        assert!(!summary.many_messages);
        assert_eq!(summary.size_label, None);
        assert_eq!(summary.native_id.as_deref(), Some("s-1"));
        assert_eq!(summary.repo.as_deref(), Some("Codex-History"));
        assert_eq!(summary.models, vec!["claude-opus-4-1".to_string()]);
        assert_eq!(summary.started_at_ms, 1_735_725_600_000);
        assert_eq!(summary.last_activity_ms, Some(1_735_725_605_000));
    }

    #[test]
    fn empty_file_is_a_zero_message_summary() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("empty.jsonl");
        fs::write(&path, "").expect("write");

        let summary =
            summarize_session_file(&path, SourceKind::Codex, &SummarizeSettings::default())
                .expect("summary");
        assert_eq!(summary.message_count, MessageCount::Exact(0));
        assert_eq!(summary.title, "(untitled)");
        assert_eq!(summary.status, SummaryStatus::Ok);
    }

    #[test]
    fn missing_file_reports_vanished() {
        let temp = tempdir().expect("tempdir");
        let result = summarize_session_file(
            &temp.path().join("gone.jsonl"),
            SourceKind::Codex,
            &SummarizeSettings::default(),
        );
        assert!(matches!(result, Err(SummarizeError::FileVanished(_))));
    }

    #[test]
    fn corrupt_bytes_and_partial_tail_are_skipped() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("s.jsonl");
        let mut file = File::create(&path).expect("create");
        writeln!(file, "{}", claude_user("2025-01-01T10:00:00Z", "hello")).expect("write");
        file.write_all(&[0xff, 0xfe, 0x00, b'\n']).expect("write");
        write!(file, r#"{{"type":"assistant","message":{{"content":"par"#).expect("write");
        drop(file);

        let summary =
            summarize_session_file(&path, SourceKind::Claude, &SummarizeSettings::default())
                .expect("summary");
        assert_eq!(summary.message_count, MessageCount::Exact(1));
    }

    #[test]
    fn long_line_count_flags_many_messages_on_full_tier() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("s.jsonl");
        let lines = (0..12)
            .map(|i| claude_assistant("2025-01-01T10:00:00Z", &format!("reply {i}")))
            .collect::<Vec<_>>();
        write_lines(&path, &lines);

        let settings = SummarizeSettings {
            many_messages_lines: 10,
            ..SummarizeSettings::default()
        };
        let summary = summarize_session_file(&path, SourceKind::Claude, &settings).expect("summary");
        assert!(summary.many_messages);
        assert_eq!(summary.message_count, MessageCount::Exact(12));
        assert!(summary.size_label.is_some());
    }

    #[test]
    fn large_file_uses_windows_and_estimates() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("big.jsonl");
        let mut lines = vec![claude_user("2025-02-01T09:00:00Z", "Investigate the leak")];
        for i in 0..400 {
            lines.push(claude_assistant("2025-02-01T09:30:00Z", &format!("step {i}")));
        }
        lines.push(serde_json::json!({
            "type": "assistant",
            "timestamp": "2025-02-01T12:00:00Z",
            "message": { "model": "claude-sonnet-4-5", "content": "final" }
        })
        .to_string());
        write_lines(&path, &lines);

        let settings = SummarizeSettings {
            many_messages_bytes: 4_096,
            many_messages_lines: 2_000,
            head_window_bytes: 2_048,
            tail_window_bytes: 1_024,
        };
        let summary = summarize_session_file(&path, SourceKind::Claude, &settings).expect("summary");

        assert!(summary.many_messages);
        assert!(summary.message_count.is_estimate());
        let estimate = summary.message_count.value();
        assert!((300..=500).contains(&estimate), "estimate {estimate}");
        assert!(summary.size_label.as_deref().is_some_and(|label| label.starts_with('~')));
        assert_eq!(summary.title, "Investigate the leak");
        assert_eq!(summary.started_at_ms, 1_738_400_400_000);
        assert_eq!(summary.last_activity_ms, Some(1_738_411_200_000));
        assert!(summary.models.contains(&"claude-sonnet-4-5".to_string()));
    }

    #[test]
    fn oversized_first_record_still_yields_start_time_and_estimate() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("wide.jsonl");
        let pasted = format!("Review this log {}", "x".repeat(3_000));
        let mut lines = vec![claude_user("2025-02-01T09:00:00Z", &pasted)];
        for i in 0..400 {
            lines.push(claude_assistant("2025-02-01T09:30:00Z", &format!("step {i}")));
        }
        write_lines(&path, &lines);

        let settings = SummarizeSettings {
            many_messages_bytes: 4_096,
            many_messages_lines: 2_000,
            head_window_bytes: 2_048,
            tail_window_bytes: 1_024,
        };
        assert!(lines[0].len() as u64 > settings.head_window_bytes);
        let summary = summarize_session_file(&path, SourceKind::Claude, &settings).expect("summary");

        assert!(summary.message_count.is_estimate());
        let estimate = summary.message_count.value();
        assert!(estimate >= 50, "estimate {estimate}");
        assert_eq!(summary.started_at_ms, 1_738_400_400_000);
        assert!(summary.title.starts_with("Review this log"));
    }

    #[test]
    fn estimate_falls_back_when_no_record_fits() {
        assert_eq!(estimate_messages(40_960, 0, 0, 0), 10);
        assert_eq!(estimate_messages(100, 0, 0, 0), 1);
        assert_eq!(estimate_messages(1_000, 100, 2, 1), 10);
    }

    #[test]
    fn size_label_rounds_to_whole_units() {
        assert_eq!(approximate_size_label(110_000_000), "~110MB");
        assert_eq!(approximate_size_label(200_400_000), "~200MB");
    }
}
