use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chat_protocol::ChatMessage;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::SessionStoreError;
use crate::paths::export_file_name;
use crate::schema::{ExportHeader, ExportLine, EXPORT_VERSION};
use crate::store::SessionStore;

impl SessionStore {
    /// Writes the transcript of `session_key` to `path` as JSONL: one header
    /// line, then one line per message with its audit trail.
    pub fn export_jsonl(
        &self,
        session_key: &str,
        path: &Path,
    ) -> Result<ExportHeader, SessionStoreError> {
        let transcript = self.transcript(session_key)?;
        let exported_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(SessionStoreError::ClockFormat)?;
        let header = ExportHeader::v1(
            Uuid::new_v4().to_string(),
            session_key,
            exported_at,
            transcript.len(),
        );

        write_export(path, &header, transcript)?;
        tracing::info!(
            session_key,
            path = %path.display(),
            messages = header.message_count,
            "exported transcript"
        );
        Ok(header)
    }

    /// Exports into `dir` under a timestamped file name and returns the path.
    pub fn export_to_dir(
        &self,
        session_key: &str,
        dir: &Path,
    ) -> Result<PathBuf, SessionStoreError> {
        fs::create_dir_all(dir)
            .map_err(|source| SessionStoreError::io("creating export directory", dir, source))?;

        let exported_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(SessionStoreError::ClockFormat)?;
        let path = dir.join(export_file_name(&exported_at, session_key));
        self.export_jsonl(session_key, &path)?;
        Ok(path)
    }
}

fn write_export(
    path: &Path,
    header: &ExportHeader,
    transcript: Vec<ChatMessage>,
) -> Result<(), SessionStoreError> {
    let file = File::create(path)
        .map_err(|source| SessionStoreError::io("creating export file", path, source))?;
    let mut writer = BufWriter::new(file);

    write_line(&mut writer, path, &ExportLine::Session(header.clone()))?;
    for message in transcript {
        write_line(&mut writer, path, &ExportLine::Message(Box::new(message)))?;
    }

    writer
        .flush()
        .map_err(|source| SessionStoreError::io("flushing export file", path, source))
}

fn write_line(
    writer: &mut impl Write,
    path: &Path,
    line: &ExportLine,
) -> Result<(), SessionStoreError> {
    serde_json::to_writer(&mut *writer, line)
        .map_err(|source| SessionStoreError::json_serialize(path, source))?;
    writer
        .write_all(b"\n")
        .map_err(|source| SessionStoreError::io("writing export file", path, source))
}

/// Reads back an export written by [`SessionStore::export_jsonl`].
pub fn read_export(path: &Path) -> Result<(ExportHeader, Vec<ChatMessage>), SessionStoreError> {
    let file = File::open(path)
        .map_err(|source| SessionStoreError::io("opening export file", path, source))?;
    let reader = BufReader::new(file);

    let mut header = None;
    let mut messages = Vec::new();

    for (line_index, line_result) in reader.lines().enumerate() {
        let line_number = line_index + 1;
        let line =
            line_result.map_err(|source| SessionStoreError::io_line(path, line_number, source))?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed = serde_json::from_str::<ExportLine>(&line)
            .map_err(|source| SessionStoreError::json_line(path, line_number, source))?;

        match (line_number, parsed) {
            (1, ExportLine::Session(parsed_header)) => {
                validate_header(path, line_number, &parsed_header)?;
                header = Some(parsed_header);
            }
            (1, ExportLine::Message(_)) => {
                return Err(SessionStoreError::InvalidHeaderRecord {
                    path: path.to_path_buf(),
                    line: line_number,
                });
            }
            (_, ExportLine::Session(_)) => {
                return Err(SessionStoreError::InvalidMessageRecord {
                    path: path.to_path_buf(),
                    line: line_number,
                });
            }
            (_, ExportLine::Message(message)) => messages.push(*message),
        }
    }

    let header = header.ok_or_else(|| SessionStoreError::MissingHeader {
        path: path.to_path_buf(),
    })?;
    Ok((header, messages))
}

fn validate_header(
    path: &Path,
    line_number: usize,
    header: &ExportHeader,
) -> Result<(), SessionStoreError> {
    if header.version != EXPORT_VERSION {
        return Err(SessionStoreError::UnsupportedVersion {
            path: path.to_path_buf(),
            line: line_number,
            found: header.version,
        });
    }

    if OffsetDateTime::parse(&header.exported_at, &Rfc3339).is_err() {
        return Err(SessionStoreError::InvalidTimestamp {
            path: path.to_path_buf(),
            line: line_number,
            field: "exported_at",
            value: header.exported_at.clone(),
        });
    }

    Ok(())
}
