use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, warn};

pub const HEADER: &str = "DATE\tSTATUS\tMESSAGE\n";

/// Notable events worth keeping a human-readable trail of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusType {
    /// Payload was not JSON, or not the expected shape
    RequestParsingError,
    RequestWithMissingSamples,
    /// CMO request with samples lacking the fields the label generator needs
    CmoRequestWithSamplesMissingCmoLabelFields,
    /// Non-CMO request seen while the CMO-only filter is enabled
    CmoRequestFilterSkippedRequest,
    CmoRequestFailedSanityCheck,
    RequestFailedSanityCheck,
    RequestUpdateFailedSanityCheck,
    SampleUpdateFailedSanityCheck,
    PromotedRequestFailedSanityCheck,
    PromotedSamplesMissingIds,
    PublishFailed,
    /// A worker panicked while handling the message
    ProcessingFailed,
}

impl StatusType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusType::RequestParsingError => "REQUEST_PARSING_ERROR",
            StatusType::RequestWithMissingSamples => "REQUEST_WITH_MISSING_SAMPLES",
            StatusType::CmoRequestWithSamplesMissingCmoLabelFields => {
                "CMO_REQUEST_WITH_SAMPLES_MISSING_CMO_LABEL_FIELDS"
            }
            StatusType::CmoRequestFilterSkippedRequest => "CMO_REQUEST_FILTER_SKIPPED_REQUEST",
            StatusType::CmoRequestFailedSanityCheck => "CMO_REQUEST_FAILED_SANITY_CHECK",
            StatusType::RequestFailedSanityCheck => "REQUEST_FAILED_SANITY_CHECK",
            StatusType::RequestUpdateFailedSanityCheck => "REQUEST_UPDATE_FAILED_SANITY_CHECK",
            StatusType::SampleUpdateFailedSanityCheck => "SAMPLE_UPDATE_FAILED_SANITY_CHECK",
            StatusType::PromotedRequestFailedSanityCheck => "PROMOTED_REQUEST_FAILED_SANITY_CHECK",
            StatusType::PromotedSamplesMissingIds => "PROMOTED_SAMPLES_MISSING_IDS",
            StatusType::PublishFailed => "PUBLISH_FAILED",
            StatusType::ProcessingFailed => "PROCESSING_FAILED",
        }
    }
}

impl fmt::Display for StatusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only trail of notable events. Implementations must never fail the caller: write
/// errors are logged and dropped.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn log_status(&self, message: &str, status: StatusType);
}

/// Appends `DATE\tSTATUS\tMESSAGE` lines to a file, creating it with a header on first use.
pub struct FileAuditSink {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FileAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    async fn open_with_header(&self) -> std::io::Result<File> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        if file.metadata().await?.len() == 0 {
            file.write_all(HEADER.as_bytes()).await?;
        }
        Ok(file)
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        // One writer at a time keeps lines whole.
        let mut guard = self.file.lock().await;
        let file = match guard.take() {
            Some(file) => file,
            None => self.open_with_header().await?,
        };
        let file = guard.insert(file);
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn log_status(&self, message: &str, status: StatusType) {
        let date = chrono::Local::now().format("%Y-%m-%d");
        let line = format!("{date}\t{status}\t{message}\n");
        if let Err(err) = self.append(&line).await {
            error!(
                path = %self.path.display(),
                status = status.as_str(),
                "failed to write audit entry: {}",
                err
            );
        }
    }
}

/// Used when no audit file is configured: the trail goes to the service logs.
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn log_status(&self, message: &str, status: StatusType) {
        warn!(status = status.as_str(), payload = message, "audit");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_header_once_then_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("logs").join("request-status.txt");

        let sink = FileAuditSink::new(&path);
        sink.log_status("{\"requestId\":\"1456_T\"}", StatusType::RequestWithMissingSamples)
            .await;
        sink.log_status("not json", StatusType::RequestParsingError)
            .await;

        // A second sink on the same file must not repeat the header.
        let reopened = FileAuditSink::new(&path);
        reopened
            .log_status("1456_T", StatusType::PromotedSamplesMissingIds)
            .await;

        let contents = tokio::fs::read_to_string(&path).await.expect("read log");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "DATE\tSTATUS\tMESSAGE");

        let fields: Vec<&str> = lines[1].split('\t').collect();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0].len(), "2024-01-01".len());
        assert_eq!(fields[1], "REQUEST_WITH_MISSING_SAMPLES");
        assert_eq!(fields[2], "{\"requestId\":\"1456_T\"}");

        assert!(lines[2].ends_with("\tREQUEST_PARSING_ERROR\tnot json"));
        assert!(lines[3].ends_with("\tPROMOTED_SAMPLES_MISSING_IDS\t1456_T"));
    }

    #[tokio::test]
    async fn write_failures_are_swallowed() {
        let dir = tempfile::tempdir().expect("tempdir");
        // A directory cannot be opened for appending.
        let sink = FileAuditSink::new(dir.path());
        sink.log_status("1456_T", StatusType::PublishFailed).await;
    }

    #[test]
    fn status_tags() {
        assert_eq!(
            StatusType::CmoRequestWithSamplesMissingCmoLabelFields.to_string(),
            "CMO_REQUEST_WITH_SAMPLES_MISSING_CMO_LABEL_FIELDS"
        );
        assert_eq!(StatusType::PublishFailed.as_str(), "PUBLISH_FAILED");
    }
}
