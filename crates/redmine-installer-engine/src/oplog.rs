use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::fs_utils::sync_parent_dir;

pub const DONE_STEP: &str = "done";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    Success,
    Failure,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LogRecord {
    Run {
        command: String,
        started_at: String,
        pid: u32,
        #[serde(default)]
        digest: String,
    },
    Start {
        seq: u64,
        step: String,
        at: String,
        #[serde(default)]
        digest: String,
    },
    End {
        seq: u64,
        step: String,
        at: String,
        outcome: StepOutcome,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default)]
        digest: String,
    },
}

impl LogRecord {
    fn digest(&self) -> &str {
        match self {
            Self::Run { digest, .. } | Self::Start { digest, .. } | Self::End { digest, .. } => {
                digest
            }
        }
    }

    pub(crate) fn seal(&mut self) -> Result<()> {
        let value = record_digest(self)?;
        match self {
            Self::Run { digest, .. } | Self::Start { digest, .. } | Self::End { digest, .. } => {
                *digest = value
            }
        }
        Ok(())
    }
}

// serde_json::Value keeps object keys sorted, so the serialisation is canonical.
pub fn record_digest(record: &LogRecord) -> Result<String> {
    let mut value = serde_json::to_value(record).context("failed to encode log record")?;
    let object = value
        .as_object_mut()
        .ok_or_else(|| anyhow!("log record is not a JSON object"))?;
    object.remove("digest");
    let canonical = serde_json::to_string(&value).context("failed to encode log record")?;
    Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
}

pub struct OperationLog {
    path: PathBuf,
    file: File,
    next_seq: u64,
    open_step: Option<(u64, String)>,
}

impl OperationLog {
    pub fn create(path: &Path, command: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .with_context(|| format!("failed to create operation log {}", path.display()))?;
        sync_parent_dir(path);

        let mut log = Self {
            path: path.to_path_buf(),
            file,
            next_seq: 1,
            open_step: None,
        };
        log.append(LogRecord::Run {
            command: command.to_string(),
            started_at: now_rfc3339(),
            pid: std::process::id(),
            digest: String::new(),
        })?;
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn begin(&mut self, step: &str) -> Result<()> {
        if let Some((_, open)) = &self.open_step {
            return Err(anyhow!("step '{step}' started while '{open}' is still open"));
        }
        let seq = self.next_seq;
        self.append(LogRecord::Start {
            seq,
            step: step.to_string(),
            at: now_rfc3339(),
            digest: String::new(),
        })?;
        self.next_seq += 1;
        self.open_step = Some((seq, step.to_string()));
        Ok(())
    }

    pub fn succeed(&mut self) -> Result<()> {
        self.end(StepOutcome::Success, None)
    }

    pub fn fail(&mut self, error: &str) -> Result<()> {
        self.end(StepOutcome::Failure, Some(error.to_string()))
    }

    pub fn skip(&mut self, step: &str) -> Result<()> {
        self.begin(step)?;
        self.end(StepOutcome::Skipped, None)
    }

    pub fn has_open_step(&self) -> bool {
        self.open_step.is_some()
    }

    fn end(&mut self, outcome: StepOutcome, error: Option<String>) -> Result<()> {
        let (seq, step) = self
            .open_step
            .take()
            .ok_or_else(|| anyhow!("no step is open in {}", self.path.display()))?;
        self.append(LogRecord::End {
            seq,
            step,
            at: now_rfc3339(),
            outcome,
            error,
            digest: String::new(),
        })
    }

    fn append(&mut self, mut record: LogRecord) -> Result<()> {
        record.seal()?;
        let mut line = serde_json::to_string(&record).context("failed to encode log record")?;
        line.push('\n');

        self.file
            .write_all(line.as_bytes())
            .with_context(|| format!("failed to append operation log {}", self.path.display()))?;
        self.file
            .flush()
            .with_context(|| format!("failed to flush operation log {}", self.path.display()))?;
        self.file
            .sync_data()
            .with_context(|| format!("failed to sync operation log {}", self.path.display()))
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogVerdict {
    Complete,
    Failed { step: String, error: String },
    Interrupted { step: String },
    Incomplete { last_step: Option<String> },
    Corrupt { line: usize, reason: String },
}

impl LogVerdict {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl fmt::Display for LogVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete => write!(f, "complete"),
            Self::Failed { step, error } => write!(f, "failed at step '{step}': {error}"),
            Self::Interrupted { step } => write!(f, "interrupted during step '{step}'"),
            Self::Incomplete {
                last_step: Some(step),
            } => write!(f, "incomplete: stopped after step '{step}'"),
            Self::Incomplete { last_step: None } => write!(f, "incomplete: no step recorded"),
            Self::Corrupt { line, reason } => write!(f, "corrupt at line {line}: {reason}"),
        }
    }
}

pub fn verify_log(path: &Path) -> Result<LogVerdict> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read operation log {}", path.display()))?;
    Ok(verify_log_str(&raw))
}

pub fn verify_log_str(input: &str) -> LogVerdict {
    let corrupt = |line: usize, reason: String| LogVerdict::Corrupt { line, reason };

    let mut next_seq = 1_u64;
    let mut open: Option<(u64, String)> = None;
    let mut last_ended: Option<(String, StepOutcome)> = None;
    let mut failure: Option<(String, String)> = None;
    let mut saw_header = false;

    for (index, raw) in input.lines().enumerate() {
        let line = index + 1;
        let record: LogRecord = match serde_json::from_str(raw) {
            Ok(record) => record,
            Err(err) => return corrupt(line, format!("unparseable record: {err}")),
        };
        match record_digest(&record) {
            Ok(expected) if expected == record.digest() => {}
            Ok(_) => return corrupt(line, "digest mismatch".to_string()),
            Err(err) => return corrupt(line, format!("{err:#}")),
        }
        if let Some((step, _)) = &failure {
            return corrupt(line, format!("record after failed step '{step}'"));
        }

        match record {
            LogRecord::Run { .. } if !saw_header && line == 1 => saw_header = true,
            LogRecord::Run { .. } => {
                return corrupt(line, "run header outside the first line".to_string());
            }
            _ if !saw_header => return corrupt(line, "missing run header".to_string()),
            LogRecord::Start { seq, step, .. } => {
                if let Some((_, open_step)) = &open {
                    return corrupt(
                        line,
                        format!("step '{step}' started while '{open_step}' is still open"),
                    );
                }
                if seq != next_seq {
                    return corrupt(line, format!("expected sequence {next_seq}, found {seq}"));
                }
                next_seq += 1;
                open = Some((seq, step));
            }
            LogRecord::End {
                seq,
                step,
                outcome,
                error,
                ..
            } => {
                match open.take() {
                    Some((open_seq, open_step)) if open_seq == seq && open_step == step => {}
                    Some((_, open_step)) => {
                        return corrupt(
                            line,
                            format!("end of '{step}' does not match open step '{open_step}'"),
                        );
                    }
                    None => return corrupt(line, format!("end of '{step}' without a start")),
                }
                if outcome == StepOutcome::Failure {
                    failure = Some((step.clone(), error.unwrap_or_default()));
                }
                last_ended = Some((step, outcome));
            }
        }
    }

    if !saw_header {
        return corrupt(1, "log is empty".to_string());
    }
    if let Some((_, step)) = open {
        return LogVerdict::Interrupted { step };
    }
    if let Some((step, error)) = failure {
        return LogVerdict::Failed { step, error };
    }
    match last_ended {
        Some((step, StepOutcome::Success)) if step == DONE_STEP => LogVerdict::Complete,
        other => LogVerdict::Incomplete {
            last_step: other.map(|(step, _)| step),
        },
    }
}
