use crate::domain::{
    FileFingerprint, RecordOutcome, SessionKey, SourceKind, Transcript, parse_record,
};
use crate::infra::read_lines;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HydrateError {
    #[error("unknown session: {0}")]
    UnknownSession(SessionKey),

    #[error("session file vanished: {0}")]
    FileVanished(PathBuf),

    #[error("transcript unavailable for {path}: no readable records ({malformed} malformed lines)")]
    HydrationFailure { path: PathBuf, malformed: usize },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn read_error(path: &Path, error: io::Error) -> HydrateError {
    if error.kind() == io::ErrorKind::NotFound {
        HydrateError::FileVanished(path.to_path_buf())
    } else {
        HydrateError::Read {
            path: path.to_path_buf(),
            source: error,
        }
    }
}

pub fn stat_fingerprint(path: &Path) -> Result<FileFingerprint, HydrateError> {
    fs::metadata(path)
        .map(|metadata| FileFingerprint::from_metadata(&metadata))
        .map_err(|error| read_error(path, error))
}

/// Fully parses a session log in file order. Malformed lines are skipped; a file with nothing
/// but malformed lines fails as a whole.
pub fn load_transcript(
    path: &Path,
    source: SourceKind,
    key: &SessionKey,
) -> Result<Transcript, HydrateError> {
    let file = File::open(path).map_err(|error| read_error(path, error))?;
    let fingerprint = file
        .metadata()
        .map(|metadata| FileFingerprint::from_metadata(&metadata))
        .map_err(|error| read_error(path, error))?;

    let mut events = Vec::new();
    let mut parsed_records = 0usize;
    let mut malformed_lines = 0usize;
    let mut pending_tail = false;

    read_lines(BufReader::new(file), 1, |line, _| {
        match parse_record(line, source) {
            Ok(RecordOutcome::Parsed(record)) => {
                parsed_records += 1;
                events.extend(record.events);
            }
            Ok(RecordOutcome::Blank) => {}
            Ok(RecordOutcome::Pending) => pending_tail = true,
            Err(error) => {
                malformed_lines += 1;
                tracing::debug!(
                    path = %path.display(),
                    line = line.line_no,
                    %error,
                    "skipping malformed record"
                );
            }
        }
    })
    .map_err(|error| read_error(path, error))?;

    if parsed_records == 0 && malformed_lines > 0 {
        return Err(HydrateError::HydrationFailure {
            path: path.to_path_buf(),
            malformed: malformed_lines,
        });
    }

    Ok(Transcript {
        key: key.clone(),
        fingerprint,
        events,
        malformed_lines,
        pending_tail,
    })
}
