use chrono::{DateTime, Utc};
use db::{
    DBService,
    models::processing_log::{ProcessingLog, ProcessingStep},
};
use serde::Serialize;
use ts_rs::TS;
use utils::progress::{self, DocumentProgress};
use uuid::Uuid;

pub const DEFAULT_LOG_LIMIT: i64 = 100;
pub const MAX_LOG_LIMIT: i64 = 500;

#[derive(Debug, Serialize, TS)]
pub struct LogView {
    pub current_step: ProcessingStep,
    pub started_at: Option<DateTime<Utc>>,
    pub total_documents: u32,
    pub completed_documents: u32,
    pub logs: Vec<ProcessingLog>,
}

/// Append-only writer and polling reader over the processing-log table.
#[derive(Clone)]
pub struct ProcessingLogService {
    db: DBService,
}

impl ProcessingLogService {
    pub fn new(db: DBService) -> Self {
        ProcessingLogService { db }
    }

    /// One insert in its own pool acquisition. A failure here is logged and
    /// swallowed so it can never poison the caller's unit of work.
    pub async fn log(
        &self,
        repository_id: Uuid,
        step: ProcessingStep,
        message: &str,
        is_ai_output: bool,
        tool_name: Option<&str>,
    ) {
        if let Err(e) = ProcessingLog::append(
            &self.db.pool,
            repository_id,
            step,
            message,
            is_ai_output,
            tool_name,
        )
        .await
        {
            tracing::warn!("Failed to append processing log for {repository_id}: {e}");
        }
    }

    /// Up to `limit` newest entries in chronological order, plus the derived
    /// step, start time and document progress.
    pub async fn get_logs(
        &self,
        repository_id: Uuid,
        since: Option<DateTime<Utc>>,
        limit: Option<i64>,
    ) -> Result<LogView, sqlx::Error> {
        let limit = limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, MAX_LOG_LIMIT);
        let mut logs =
            ProcessingLog::find_recent(&self.db.pool, repository_id, since, limit).await?;
        logs.reverse();

        let current_step = logs
            .last()
            .map(|entry| entry.step)
            .unwrap_or(ProcessingStep::Workspace);
        let started_at = logs.first().map(|entry| entry.created_at);

        // AI output and tool invocations never carry progress markers.
        let DocumentProgress { total, completed } = progress::scan_messages(
            logs.iter()
                .filter(|entry| !entry.is_ai_output && entry.tool_name.is_none())
                .map(|entry| entry.message.as_str()),
        );

        Ok(LogView {
            current_step,
            started_at,
            total_documents: total,
            completed_documents: completed,
            logs,
        })
    }

    /// Hard delete, invoked on regeneration.
    pub async fn clear_logs(&self, repository_id: Uuid) -> Result<u64, sqlx::Error> {
        ProcessingLog::clear(&self.db.pool, repository_id).await
    }
}
