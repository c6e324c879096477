use crate::app::{ServiceEvent, SessionService, run_deep_search};
use crate::domain::{
    SessionEvent, SessionKey, SessionSummary, SourceKind, UnifiedCollection, evaluate,
    format_unix_ms_rfc3339, index_repos, parse_query, system_time_to_unix_ms,
};
use crate::infra::{HydrateError, Settings, UnifiedIndexer, UnifiedRefresh};
use serde::Serialize;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;

const DEFAULT_LIMIT: usize = 20;
const SHOW_PREVIEW_CHARS: usize = 160;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CliInvocation {
    PrintHelp,
    PrintVersion,
    Command(CliCommand),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CliCommand {
    Sessions {
        source: Option<SourceKind>,
        offset: usize,
        limit: usize,
        json: bool,
    },
    Search {
        query: String,
        source: Option<SourceKind>,
        deep: bool,
        offset: usize,
        limit: usize,
        json: bool,
    },
    Show {
        session: String,
        offset: usize,
        limit: Option<usize>,
        full: bool,
        json: bool,
    },
    Path {
        session: String,
    },
    Repos {
        source: Option<SourceKind>,
        limit: usize,
        json: bool,
    },
    Watch,
}

#[derive(Debug, Error)]
pub enum CliParseError {
    #[error("unknown subcommand: {0}")]
    UnknownSubcommand(String),

    #[error("unknown flag: {0}")]
    UnknownFlag(String),

    #[error("missing value for flag: {0}")]
    MissingFlagValue(String),

    #[error("invalid value for {flag}: {value}")]
    InvalidFlagValue { flag: String, value: String },

    #[error("unexpected argument: {0}")]
    UnexpectedArgument(String),

    #[error("missing argument: {0}")]
    MissingArgument(&'static str),
}

#[derive(Debug, Error)]
pub enum CliRunError {
    #[error(transparent)]
    Hydrate(#[from] HydrateError),

    #[error("session not found: {0} (hint: run `agent-sessions sessions` to list keys)")]
    SessionNotFound(String),

    #[error("session id is ambiguous: {needle} matches {matches} sessions")]
    AmbiguousSession { needle: String, matches: usize },

    #[error("failed to start session service: {0}")]
    Spawn(#[source] io::Error),

    #[error("session service stopped unexpectedly")]
    ServiceStopped,

    #[error("failed to encode JSON output: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write output: {0}")]
    WriteOutput(#[from] io::Error),
}

/// `-v`/`--verbose` may appear anywhere; it only affects logging.
pub fn verbose_requested(args: &[String]) -> bool {
    args.iter().skip(1).any(|arg| is_verbose_flag(arg))
}

fn is_verbose_flag(arg: &str) -> bool {
    arg == "--verbose" || arg == "-v"
}

pub fn parse_invocation(args: &[String]) -> Result<CliInvocation, CliParseError> {
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        return Ok(CliInvocation::PrintHelp);
    }
    if args.iter().any(|arg| arg == "--version" || arg == "-V") {
        return Ok(CliInvocation::PrintVersion);
    }

    let mut iter = args
        .iter()
        .skip(1)
        .filter(|arg| !is_verbose_flag(arg))
        .peekable();
    let mut global_source: Option<SourceKind> = None;
    while let Some(arg) = iter.peek() {
        match arg.as_str() {
            "--source" | "-s" => {
                let _ = iter.next();
                let value = iter
                    .next()
                    .ok_or_else(|| CliParseError::MissingFlagValue("--source".to_string()))?;
                global_source = parse_source_flag("--source", value)?;
            }
            "--" => {
                let _ = iter.next();
                break;
            }
            _ => break,
        }
    }

    let Some(subcommand) = iter.next() else {
        return Ok(CliInvocation::Command(CliCommand::Sessions {
            source: global_source,
            offset: 0,
            limit: DEFAULT_LIMIT,
            json: false,
        }));
    };

    match subcommand.as_str() {
        "sessions" | "ls" => {
            let mut source = global_source;
            let mut offset = 0usize;
            let mut limit = DEFAULT_LIMIT;
            let mut json = false;

            while let Some(arg) = iter.next() {
                match arg.as_str() {
                    "--source" | "-s" => {
                        source = parse_source_flag("--source", flag_value(&mut iter, "--source")?)?;
                    }
                    "--limit" | "-n" => {
                        limit = parse_usize_flag("--limit", flag_value(&mut iter, "--limit")?)?;
                    }
                    "--offset" => {
                        offset = parse_usize_flag("--offset", flag_value(&mut iter, "--offset")?)?;
                    }
                    "--json" => json = true,
                    _ if arg.starts_with('-') => {
                        return Err(CliParseError::UnknownFlag(arg.to_string()));
                    }
                    _ => return Err(CliParseError::UnexpectedArgument(arg.to_string())),
                }
            }

            Ok(CliInvocation::Command(CliCommand::Sessions {
                source,
                offset,
                limit,
                json,
            }))
        }
        "search" | "find" => {
            let mut words: Vec<String> = Vec::new();
            let mut source = global_source;
            let mut deep = false;
            let mut offset = 0usize;
            let mut limit = DEFAULT_LIMIT;
            let mut json = false;
            let mut literal = false;

            while let Some(arg) = iter.next() {
                if literal {
                    words.push(arg.to_string());
                    continue;
                }
                match arg.as_str() {
                    "--" => literal = true,
                    "--source" | "-s" => {
                        source = parse_source_flag("--source", flag_value(&mut iter, "--source")?)?;
                    }
                    "--deep" | "-d" => deep = true,
                    "--limit" | "-n" => {
                        limit = parse_usize_flag("--limit", flag_value(&mut iter, "--limit")?)?;
                    }
                    "--offset" => {
                        offset = parse_usize_flag("--offset", flag_value(&mut iter, "--offset")?)?;
                    }
                    "--json" => json = true,
                    // Exclusions (`-term`) are query syntax, not flags.
                    _ if arg.starts_with("--") => {
                        return Err(CliParseError::UnknownFlag(arg.to_string()));
                    }
                    _ => words.push(arg.to_string()),
                }
            }

            Ok(CliInvocation::Command(CliCommand::Search {
                query: words.join(" "),
                source,
                deep,
                offset,
                limit,
                json,
            }))
        }
        "show" | "history" => {
            let mut session: Option<String> = None;
            let mut offset = 0usize;
            let mut limit: Option<usize> = None;
            let mut full = false;
            let mut json = false;

            while let Some(arg) = iter.next() {
                match arg.as_str() {
                    "--limit" | "-n" => {
                        limit = Some(parse_usize_flag(
                            "--limit",
                            flag_value(&mut iter, "--limit")?,
                        )?);
                    }
                    "--offset" => {
                        offset = parse_usize_flag("--offset", flag_value(&mut iter, "--offset")?)?;
                    }
                    "--full" => full = true,
                    "--json" => json = true,
                    _ if arg.starts_with('-') => {
                        return Err(CliParseError::UnknownFlag(arg.to_string()));
                    }
                    _ if session.is_none() => session = Some(arg.to_string()),
                    _ => return Err(CliParseError::UnexpectedArgument(arg.to_string())),
                }
            }

            let session = session.ok_or(CliParseError::MissingArgument("session"))?;
            Ok(CliInvocation::Command(CliCommand::Show {
                session,
                offset,
                limit,
                full,
                json,
            }))
        }
        "path" | "reveal" => {
            let mut session: Option<String> = None;
            for arg in iter {
                match arg.as_str() {
                    _ if arg.starts_with('-') => {
                        return Err(CliParseError::UnknownFlag(arg.to_string()));
                    }
                    _ if session.is_none() => session = Some(arg.to_string()),
                    _ => return Err(CliParseError::UnexpectedArgument(arg.to_string())),
                }
            }
            let session = session.ok_or(CliParseError::MissingArgument("session"))?;
            Ok(CliInvocation::Command(CliCommand::Path { session }))
        }
        "repos" | "projects" => {
            let mut source = global_source;
            let mut limit = usize::MAX;
            let mut json = false;

            while let Some(arg) = iter.next() {
                match arg.as_str() {
                    "--source" | "-s" => {
                        source = parse_source_flag("--source", flag_value(&mut iter, "--source")?)?;
                    }
                    "--limit" | "-n" => {
                        limit = parse_usize_flag("--limit", flag_value(&mut iter, "--limit")?)?;
                    }
                    "--json" => json = true,
                    _ if arg.starts_with('-') => {
                        return Err(CliParseError::UnknownFlag(arg.to_string()));
                    }
                    _ => return Err(CliParseError::UnexpectedArgument(arg.to_string())),
                }
            }

            Ok(CliInvocation::Command(CliCommand::Repos {
                source,
                limit,
                json,
            }))
        }
        "watch" => {
            if let Some(arg) = iter.next() {
                return Err(if arg.starts_with('-') {
                    CliParseError::UnknownFlag(arg.to_string())
                } else {
                    CliParseError::UnexpectedArgument(arg.to_string())
                });
            }
            Ok(CliInvocation::Command(CliCommand::Watch))
        }
        other => Err(CliParseError::UnknownSubcommand(other.to_string())),
    }
}

fn flag_value<'a>(
    iter: &mut impl Iterator<Item = &'a String>,
    flag: &str,
) -> Result<&'a str, CliParseError> {
    iter.next()
        .map(String::as_str)
        .ok_or_else(|| CliParseError::MissingFlagValue(flag.to_string()))
}

pub fn help_text() -> String {
    format!(
        "{name} - index and search Codex and Claude session logs\n\n\
USAGE:\n  \
{name} [--source SOURCE]                     List recent sessions (same as `sessions`)\n  \
{name} sessions [--source S] [--limit N] [--offset N] [--json]\n  \
{name} search <query...> [--deep] [--source S] [--limit N] [--offset N] [--json]\n  \
{name} show <session> [--limit N] [--offset N] [--full] [--json]\n  \
{name} path <session>                        Print the session's log file path\n  \
{name} repos [--source S] [--limit N] [--json]\n  \
{name} watch                                 Print a line whenever the index changes\n  \
{name} --help | --version\n\n\
GLOBAL:\n  \
--source NAME  Filter by source: all|codex|claude (default: all)\n  \
-v, --verbose  Debug logging on stderr (or set AGENT_SESSIONS_LOG)\n\n\
QUERY SYNTAX:\n  \
words          Every session matching at least one word (case-insensitive)\n  \
\"a phrase\"     Exact phrase\n  \
-word          Exclude sessions containing word\n  \
repo:NAME  path:SUBSTR  model:NAME  branch:NAME  source:codex|claude\n  \
after:YYYY-MM-DD  before:YYYY-MM-DD  on:YYYY-MM-DD\n  \
--deep         Also search full transcripts, not just titles and metadata\n\n\
SESSION:\n  \
A key as printed by `sessions` (codex:1a2b...), a unique key prefix, or the native session id.\n\n\
OUTPUT:\n  \
sessions/search: started_at<TAB>key<TAB>messages<TAB>repo<TAB>title\n  \
show: line<TAB>timestamp<TAB>kind<TAB>text\n  \
repos: name<TAB>path<TAB>session_count<TAB>last_started_at\n\n\
ENV:\n  \
CODEX_SESSIONS_DIR    Override Codex sessions dir (default: ~/.codex/sessions)\n  \
CLAUDE_PROJECTS_DIR   Override Claude projects dir (default: ~/.claude/projects)\n  \
AGENT_SESSIONS_MANY_MESSAGES_BYTES  Size above which files are summarized from head/tail windows\n\n\
CONFIG:\n  \
~/.agent-sessions/config.json\n",
        name = env!("CARGO_PKG_NAME")
    )
}

pub fn run(command: CliCommand, settings: Settings) -> Result<(), CliRunError> {
    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());
    let stderr = io::stderr();
    let mut err = io::BufWriter::new(stderr.lock());

    match command {
        CliCommand::Sessions {
            source,
            offset,
            limit,
            json,
        } => {
            let (_, collection) = load_collection(&settings, &mut err)?;
            let sessions = collection
                .iter()
                .map(|session| &session.summary)
                .filter(|summary| source.is_none_or(|source| summary.source() == source))
                .skip(offset)
                .take(limit)
                .cloned()
                .collect::<Vec<_>>();
            write_sessions(&mut out, &sessions, json)?;
        }
        CliCommand::Search {
            query,
            source,
            deep,
            offset,
            limit,
            json,
        } => {
            let (index, collection) = load_collection(&settings, &mut err)?;
            let text = match source {
                Some(source) => format!("source:{} {query}", source.tag()),
                None => query,
            };
            let query = Arc::new(parse_query(&text));
            let matches = if deep && query.has_text() {
                run_deep_search(&query, &collection, index.cache(), || false).unwrap_or_default()
            } else {
                evaluate(Arc::clone(&query), Arc::clone(&collection)).collect()
            };
            let page = matches
                .into_iter()
                .skip(offset)
                .take(limit)
                .collect::<Vec<_>>();
            write_sessions(&mut out, &page, json)?;
        }
        CliCommand::Show {
            session,
            offset,
            limit,
            full,
            json,
        } => {
            let (mut index, collection) = load_collection(&settings, &mut err)?;
            let summary = resolve_session(&collection, &session)?;
            let transcript = index.hydrate(&summary.key)?;
            let current = index
                .summary(&summary.key)
                .unwrap_or_else(|| Arc::clone(&summary));
            let events = transcript
                .events
                .iter()
                .skip(offset)
                .take(limit.unwrap_or(usize::MAX))
                .collect::<Vec<_>>();

            if json {
                let view = ShowOutput {
                    session: &current,
                    events,
                    malformed_lines: transcript.malformed_lines,
                    pending_tail: transcript.pending_tail,
                };
                write_line(&mut out, &serde_json::to_string_pretty(&view)?)?;
            } else {
                for event in events {
                    if !write_line(&mut out, &event_row(event, full))? {
                        return Ok(());
                    }
                }
                if transcript.malformed_lines > 0 {
                    write_line(
                        &mut err,
                        &format!("skipped {} malformed lines", transcript.malformed_lines),
                    )?;
                }
            }
        }
        CliCommand::Path { session } => {
            let (index, collection) = load_collection(&settings, &mut err)?;
            let summary = resolve_session(&collection, &session)?;
            let path = index
                .reveal_path(&summary.key)
                .ok_or_else(|| CliRunError::SessionNotFound(session.clone()))?;
            write_line(&mut out, &path.display().to_string())?;
        }
        CliCommand::Repos {
            source,
            limit,
            json,
        } => {
            let (_, collection) = load_collection(&settings, &mut err)?;
            let filtered = match source {
                Some(source) => Arc::new(collection.filtered(|summary| summary.source() == source)),
                None => collection,
            };
            let repos = index_repos(&filtered)
                .into_iter()
                .take(limit)
                .collect::<Vec<_>>();
            if json {
                let rows = repos
                    .iter()
                    .map(|repo| RepoRow {
                        name: &repo.name,
                        path: repo.cwd.display().to_string(),
                        sessions: repo.sessions.len(),
                        last_started_at: format_unix_ms_rfc3339(repo.last_started_ms),
                    })
                    .collect::<Vec<_>>();
                write_line(&mut out, &serde_json::to_string_pretty(&rows)?)?;
            } else {
                for repo in repos {
                    let line = format!(
                        "{}\t{}\t{}\t{}",
                        sanitize_field(&repo.name),
                        repo.cwd.display(),
                        repo.sessions.len(),
                        format_unix_ms_rfc3339(repo.last_started_ms),
                    );
                    if !write_line(&mut out, &line)? {
                        return Ok(());
                    }
                }
            }
        }
        CliCommand::Watch => {
            let mut service = SessionService::start(settings).map_err(CliRunError::Spawn)?;
            for notice in service.watch() {
                write_line(&mut err, &notice)?;
            }
            err.flush()?;
            service.refresh();
            loop {
                let event = service
                    .events()
                    .recv()
                    .map_err(|_| CliRunError::ServiceStopped)?;
                match event {
                    ServiceEvent::Refreshed(refresh) => {
                        if let Some(notice) = &refresh.notice {
                            write_line(&mut err, notice)?;
                            err.flush()?;
                        }
                        if !write_line(&mut out, &refresh_row(&refresh))? {
                            return Ok(());
                        }
                        out.flush()?;
                    }
                    ServiceEvent::Notice(notice) => {
                        write_line(&mut err, &notice)?;
                        err.flush()?;
                    }
                    ServiceEvent::SessionsUpdated(_) | ServiceEvent::SearchResults(_) => {}
                }
            }
        }
    }

    out.flush()?;
    err.flush()?;
    Ok(())
}

fn load_collection(
    settings: &Settings,
    err: &mut impl Write,
) -> Result<(UnifiedIndexer, Arc<UnifiedCollection>), CliRunError> {
    let mut index = UnifiedIndexer::new(settings);
    let refresh = index.refresh();
    if let Some(notice) = &refresh.notice {
        write_line(err, notice)?;
    }
    let warnings = refresh
        .reports
        .iter()
        .map(|(_, report)| report.warnings)
        .sum::<usize>();
    if warnings > 0 {
        write_line(err, &format!("warnings: {warnings}"))?;
    }
    Ok((index, refresh.collection))
}

/// Accepts a full key, a unique key-id prefix, the native session id, or the log path.
pub fn resolve_session(
    collection: &UnifiedCollection,
    needle: &str,
) -> Result<Arc<SessionSummary>, CliRunError> {
    let needle = needle.trim();
    if let Some(key) = SessionKey::parse(needle)
        && let Some(summary) = collection.get(&key)
    {
        return Ok(Arc::clone(summary));
    }

    let exact = collection
        .iter()
        .map(|session| &session.summary)
        .filter(|summary| {
            summary.native_id.as_deref() == Some(needle)
                || summary.log_path.as_os_str() == needle
        })
        .collect::<Vec<_>>();
    if let [only] = exact.as_slice() {
        return Ok(Arc::clone(only));
    }

    let id_prefix = needle
        .split_once(':')
        .filter(|(tag, _)| SourceKind::from_tag(tag).is_some())
        .map_or(needle, |(_, id)| id);
    let candidates = if exact.is_empty() {
        collection
            .iter()
            .map(|session| &session.summary)
            .filter(|summary| !id_prefix.is_empty() && summary.key.id.starts_with(id_prefix))
            .collect::<Vec<_>>()
    } else {
        exact
    };

    match candidates.as_slice() {
        [] => Err(CliRunError::SessionNotFound(needle.to_string())),
        [only] => Ok(Arc::clone(only)),
        many => Err(CliRunError::AmbiguousSession {
            needle: needle.to_string(),
            matches: many.len(),
        }),
    }
}

fn write_sessions(
    out: &mut impl Write,
    sessions: &[Arc<SessionSummary>],
    json: bool,
) -> Result<(), CliRunError> {
    if json {
        let rows = sessions.iter().map(Arc::as_ref).collect::<Vec<_>>();
        write_line(out, &serde_json::to_string_pretty(&rows)?)?;
        return Ok(());
    }
    for summary in sessions {
        if !write_line(out, &session_row(summary))? {
            break;
        }
    }
    Ok(())
}

fn session_row(summary: &SessionSummary) -> String {
    let messages = match (&summary.size_label, summary.is_unreadable()) {
        (_, true) => "unreadable".to_string(),
        (Some(label), false) => label.clone(),
        (None, false) => summary.message_count.label(),
    };
    format!(
        "{}\t{}\t{}\t{}\t{}",
        summary.started_at_rfc3339(),
        summary.key,
        messages,
        summary.repo.as_deref().unwrap_or("-"),
        sanitize_field(&summary.title),
    )
}

fn event_row(event: &SessionEvent, full: bool) -> String {
    let timestamp = event
        .timestamp_ms
        .map(format_unix_ms_rfc3339)
        .unwrap_or_else(|| "-".to_string());
    let label = match &event.tool_name {
        Some(tool) => format!("{}({tool})", event.kind.label()),
        None => event.kind.label().to_string(),
    };
    let text = if full {
        event.text.replace('\t', " ")
    } else {
        preview(&event.text)
    };
    format!("{}\t{timestamp}\t{label}\t{text}", event.line_no)
}

fn refresh_row(refresh: &UnifiedRefresh) -> String {
    let (added, updated, removed) =
        refresh
            .reports
            .iter()
            .fold((0, 0, 0), |(added, updated, removed), (_, report)| {
                (
                    added + report.added,
                    updated + report.updated,
                    removed + report.removed,
                )
            });
    format!(
        "{}\tsessions={}\tadded={added}\tupdated={updated}\tremoved={removed}",
        system_time_to_unix_ms(SystemTime::now())
            .map(format_unix_ms_rfc3339)
            .unwrap_or_default(),
        refresh.collection.len(),
    )
}

fn preview(text: &str) -> String {
    let first_line = text.lines().find(|line| !line.trim().is_empty()).unwrap_or("");
    let mut preview = sanitize_field(first_line);
    if preview.chars().count() > SHOW_PREVIEW_CHARS {
        preview = preview.chars().take(SHOW_PREVIEW_CHARS).collect();
        preview.push('…');
    } else if text.trim().lines().count() > 1 {
        preview.push_str(" …");
    }
    preview
}

fn sanitize_field(value: &str) -> String {
    value
        .chars()
        .map(|ch| if ch == '\t' || ch == '\n' || ch == '\r' { ' ' } else { ch })
        .collect()
}

#[derive(Serialize)]
struct ShowOutput<'a> {
    session: &'a SessionSummary,
    events: Vec<&'a SessionEvent>,
    malformed_lines: usize,
    pending_tail: bool,
}

#[derive(Serialize)]
struct RepoRow<'a> {
    name: &'a str,
    path: String,
    sessions: usize,
    last_started_at: String,
}

fn write_line(out: &mut impl Write, line: &str) -> io::Result<bool> {
    match writeln!(out, "{line}") {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == io::ErrorKind::BrokenPipe => Ok(false),
        Err(error) => Err(error),
    }
}

fn parse_usize_flag(flag: &str, value: &str) -> Result<usize, CliParseError> {
    value
        .parse::<usize>()
        .map_err(|_| CliParseError::InvalidFlagValue {
            flag: flag.to_string(),
            value: value.to_string(),
        })
}

fn parse_source_flag(flag: &str, value: &str) -> Result<Option<SourceKind>, CliParseError> {
    let normalized = value.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "all" => Ok(None),
        "cx" => Ok(Some(SourceKind::Codex)),
        "cl" => Ok(Some(SourceKind::Claude)),
        other => SourceKind::from_tag(other).map(Some).ok_or_else(|| {
            CliParseError::InvalidFlagValue {
                flag: flag.to_string(),
                value: value.to_string(),
            }
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{merge, test_summary};

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| (*v).to_string()).collect()
    }

    #[test]
    fn parse_defaults_to_session_listing() {
        let parsed = parse_invocation(&args(&["agent-sessions"])).expect("parse");
        assert_eq!(
            parsed,
            CliInvocation::Command(CliCommand::Sessions {
                source: None,
                offset: 0,
                limit: DEFAULT_LIMIT,
                json: false,
            })
        );
    }

    #[test]
    fn parse_help_flag_wins() {
        let parsed = parse_invocation(&args(&["agent-sessions", "show", "--help"])).expect("parse");
        assert_eq!(parsed, CliInvocation::PrintHelp);
    }

    #[test]
    fn parse_global_source_applies_to_subcommand() {
        let parsed = parse_invocation(&args(&[
            "agent-sessions",
            "--source",
            "claude",
            "sessions",
            "--limit",
            "5",
            "--json",
        ]))
        .expect("parse");
        assert_eq!(
            parsed,
            CliInvocation::Command(CliCommand::Sessions {
                source: Some(SourceKind::Claude),
                offset: 0,
                limit: 5,
                json: true,
            })
        );
    }

    #[test]
    fn parse_search_keeps_exclusions_and_operators_as_query_text() {
        let parsed = parse_invocation(&args(&[
            "agent-sessions",
            "search",
            "repo:app",
            "error",
            "-flaky",
            "--deep",
            "-v",
        ]))
        .expect("parse");
        assert_eq!(
            parsed,
            CliInvocation::Command(CliCommand::Search {
                query: "repo:app error -flaky".to_string(),
                source: None,
                deep: true,
                offset: 0,
                limit: DEFAULT_LIMIT,
                json: false,
            })
        );
    }

    #[test]
    fn parse_show_requires_a_session() {
        let err = parse_invocation(&args(&["agent-sessions", "show", "--full"])).unwrap_err();
        assert!(matches!(err, CliParseError::MissingArgument("session")));

        let parsed =
            parse_invocation(&args(&["agent-sessions", "show", "codex:ab12", "-n", "3"]))
                .expect("parse");
        assert_eq!(
            parsed,
            CliInvocation::Command(CliCommand::Show {
                session: "codex:ab12".to_string(),
                offset: 0,
                limit: Some(3),
                full: false,
                json: false,
            })
        );
    }

    #[test]
    fn parse_rejects_bad_values_and_unknown_input() {
        assert!(matches!(
            parse_invocation(&args(&["agent-sessions", "sessions", "--limit", "many"])),
            Err(CliParseError::InvalidFlagValue { .. })
        ));
        assert!(matches!(
            parse_invocation(&args(&["agent-sessions", "--source", "gemini", "repos"])),
            Err(CliParseError::InvalidFlagValue { .. })
        ));
        assert!(matches!(
            parse_invocation(&args(&["agent-sessions", "sessions", "--limit"])),
            Err(CliParseError::MissingFlagValue(_))
        ));
        assert!(matches!(
            parse_invocation(&args(&["agent-sessions", "frobnicate"])),
            Err(CliParseError::UnknownSubcommand(_))
        ));
        assert!(matches!(
            parse_invocation(&args(&["agent-sessions", "watch", "extra"])),
            Err(CliParseError::UnexpectedArgument(_))
        ));
    }

    #[test]
    fn verbose_is_detected_anywhere() {
        assert!(verbose_requested(&args(&["agent-sessions", "search", "x", "--verbose"])));
        assert!(!verbose_requested(&args(&["agent-sessions", "sessions"])));
    }

    #[test]
    fn resolve_session_accepts_keys_prefixes_and_native_ids() {
        let a = Arc::new(test_summary(SourceKind::Codex, "alpha", 1));
        let b = Arc::new(test_summary(SourceKind::Claude, "beta", 2));
        let collection = merge(&[Arc::clone(&a)], &[Arc::clone(&b)]);

        let by_key = resolve_session(&collection, &a.key.to_string()).expect("key");
        assert_eq!(by_key.key, a.key);

        let by_native = resolve_session(&collection, "beta").expect("native id");
        assert_eq!(by_native.key, b.key);

        let prefix = format!("claude:{}", &b.key.id[..6]);
        let by_prefix = resolve_session(&collection, &prefix).expect("prefix");
        assert_eq!(by_prefix.key, b.key);

        assert!(matches!(
            resolve_session(&collection, "missing"),
            Err(CliRunError::SessionNotFound(_))
        ));
    }

    #[test]
    fn session_rows_prefer_size_labels_for_large_logs() {
        let mut summary = test_summary(SourceKind::Codex, "big", 0);
        summary.title = "line one\tline two".to_string();
        summary.size_label = Some("~110MB".to_string());
        let row = session_row(&summary);
        let columns = row.split('\t').collect::<Vec<_>>();
        assert_eq!(columns.len(), 5);
        assert_eq!(columns[2], "~110MB");
        assert_eq!(columns[4], "line one line two");
    }

    #[test]
    fn preview_keeps_first_line_and_marks_truncation() {
        assert_eq!(preview("first\nsecond"), "first …");
        assert_eq!(preview("only"), "only");
        let long = "x".repeat(SHOW_PREVIEW_CHARS + 10);
        assert_eq!(preview(&long).chars().count(), SHOW_PREVIEW_CHARS + 1);
    }
}
