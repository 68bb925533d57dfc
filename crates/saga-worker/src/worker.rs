//! Line-delimited ingestion worker.
//!
//! Reads one JSON ingestion request per line, runs it through the pipeline
//! and answers with one JSON line: an ack on success, a nack carrying the
//! failed stage and whether redelivery can help. Messages are handled one at
//! a time and never retried here; that is the transport's job.

use std::time::Instant;

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{error, info, info_span, Instrument};

use saga_core::ingestion::{IngestFailure, IngestRequest, IngestStage, IngestionPipeline};
use saga_core::{ErrorCode, SagaError};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub status: &'static str,
    pub line: usize,
    pub episode_id: String,
    pub episode_no: u32,
    pub version: u32,
    pub index: String,
    pub facts_count: usize,
    pub vector_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<u32>,
    pub duration_ms: u128,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Nack {
    pub status: &'static str,
    pub line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<IngestStage>,
    pub code: &'static str,
    pub retryable: bool,
    pub error: String,
}

impl Nack {
    fn malformed(line: usize, err: serde_json::Error) -> Self {
        Self {
            status: "nack",
            line,
            episode_id: None,
            version: None,
            stage: None,
            code: ErrorCode::ParseInvalidJson.as_str(),
            retryable: false,
            error: format!("malformed ingestion message: {}", err),
        }
    }

    fn failed(line: usize, failure: &IngestFailure) -> Self {
        Self {
            status: "nack",
            line,
            episode_id: Some(failure.episode_id.clone()),
            version: Some(failure.version),
            stage: Some(failure.stage),
            code: failure.error.code().as_str(),
            retryable: failure.error.is_retryable(),
            error: failure.error.to_string(),
        }
    }
}

/// Counts for one worker run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerSummary {
    pub processed: usize,
    pub acked: usize,
    pub nacked: usize,
}

impl WorkerSummary {
    pub fn all_acked(&self) -> bool {
        self.nacked == 0
    }
}

async fn write_line<W, T>(output: &mut W, value: &T) -> Result<(), SagaError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    output.write_all(&line).await?;
    output.flush().await?;
    Ok(())
}

/// Process every message on `input` until end of stream.
///
/// Only I/O failures on the streams themselves end the run early; message
/// failures are reported as nacks and counted.
pub async fn run_worker<R, W>(
    pipeline: &IngestionPipeline,
    input: R,
    mut output: W,
) -> Result<WorkerSummary, SagaError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut summary = WorkerSummary::default();
    let mut lines = input.lines();
    let mut line_no = 0;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        summary.processed += 1;

        let request: IngestRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                error!(line = line_no, error = %e, "Malformed ingestion message");
                summary.nacked += 1;
                write_line(&mut output, &Nack::malformed(line_no, e)).await?;
                continue;
            }
        };

        let span = info_span!("worker_message", line = line_no, story = ?request.story_id);
        let started = Instant::now();
        match pipeline.ingest(&request).instrument(span).await {
            Ok(report) => {
                summary.acked += 1;
                info!(
                    episode_id = %report.episode_id,
                    facts = report.facts_count,
                    vectors = report.vector_ids.len(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Message acknowledged"
                );
                let ack = Ack {
                    status: "ack",
                    line: line_no,
                    episode_no: report.episode_no,
                    version: report.version,
                    facts_count: report.facts_count,
                    vector_count: report.vector_ids.len(),
                    superseded: report.superseded,
                    superseded_by: report.superseded_by,
                    duration_ms: started.elapsed().as_millis(),
                    episode_id: report.episode_id,
                    index: report.index,
                };
                write_line(&mut output, &ack).await?;
            }
            Err(failure) => {
                summary.nacked += 1;
                error!(
                    episode_id = %failure.episode_id,
                    stage = %failure.stage,
                    retryable = failure.error.is_retryable(),
                    error = %failure.error,
                    "Message failed"
                );
                write_line(&mut output, &Nack::failed(line_no, &failure)).await?;
            }
        }
    }

    info!(
        processed = summary.processed,
        acked = summary.acked,
        nacked = summary.nacked,
        "Input exhausted"
    );
    Ok(summary)
}
