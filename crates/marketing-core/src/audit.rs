use crate::config::default_audit_dir;
use anyhow::Context;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use uuid::Uuid;

const DEFAULT_MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;

/// Append-only JSONL record of commands and task outcomes, one file per day.
#[derive(Clone, Debug)]
pub struct AuditLogger {
    session_id: Uuid,
    dir: PathBuf,
    max_file_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Ok,
    Failed,
    Skipped,
    Retrying,
}

impl AuditStatus {
    fn severity(self) -> &'static str {
        match self {
            AuditStatus::Failed => "error",
            AuditStatus::Retrying => "warn",
            AuditStatus::Ok | AuditStatus::Skipped => "info",
        }
    }
}

/// Which sync task and user an entry belongs to.
#[derive(Debug, Clone, Default)]
pub struct AuditContext {
    pub task: Option<String>,
    pub email: Option<String>,
    pub attempt: Option<u32>,
}

#[derive(Serialize)]
struct AuditLine<'a> {
    ts: String,
    level: &'static str,
    event: &'a str,
    audit_id: Uuid,
    session_id: Uuid,
    status: AuditStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    task: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attempt: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl AuditLogger {
    pub fn new() -> anyhow::Result<Self> {
        Self::new_with_dir(default_audit_dir()?, DEFAULT_MAX_FILE_BYTES)
    }

    pub fn new_with_dir(dir: PathBuf, max_file_bytes: u64) -> anyhow::Result<Self> {
        fs::create_dir_all(&dir)
            .with_context(|| format!("create audit dir {}", dir.display()))?;
        Ok(Self {
            session_id: Uuid::new_v4(),
            dir,
            max_file_bytes,
        })
    }

    pub fn record(
        &self,
        event: &str,
        status: AuditStatus,
        details: Option<Value>,
        error: Option<&str>,
    ) -> anyhow::Result<String> {
        self.record_with_context(event, status, AuditContext::default(), details, error)
    }

    /// Appends one entry and returns its audit id.
    pub fn record_with_context(
        &self,
        event: &str,
        status: AuditStatus,
        context: AuditContext,
        details: Option<Value>,
        error: Option<&str>,
    ) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let audit_id = Uuid::new_v4();
        let line = AuditLine {
            ts: now.format(&Rfc3339).context("format audit timestamp")?,
            level: status.severity(),
            event,
            audit_id,
            session_id: self.session_id,
            status,
            task: context.task,
            email: context.email,
            attempt: context.attempt,
            error,
            details,
        };
        let mut encoded = serde_json::to_vec(&line).context("serialize audit entry")?;
        encoded.push(b'\n');

        let day = now
            .format(format_description!("[year][month][day]"))
            .context("format audit date")?;
        let path = self.file_for(&day);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut file| file.write_all(&encoded))
            .with_context(|| format!("append to audit log {}", path.display()))?;
        Ok(audit_id.to_string())
    }

    // First file for the day that is still below the size limit.
    fn file_for(&self, day: &str) -> PathBuf {
        (0u32..)
            .map(|part| match part {
                0 => self.dir.join(format!("audit-{day}.jsonl")),
                n => self.dir.join(format!("audit-{day}-{n}.jsonl")),
            })
            .find(|path| {
                fs::metadata(path)
                    .map(|meta| meta.len() < self.max_file_bytes)
                    .unwrap_or(true)
            })
            .unwrap_or_else(|| self.dir.join(format!("audit-{day}.jsonl")))
    }
}
