//! Persistence and event side of an execution's lifecycle.

use crate::context::ExecutorSettings;
use crate::cursor::ParsedError;
use crate::error::ExecutorError;
use crate::events::{EventBus, EventKind, LifecycleEvent};
use crate::progress::ExecutionProgress;
use catalog::Catalog;
use model::execution::ExecutionId;
use model::execution::execution_error::CreateExecutionError;
use model::execution::execution_status::ExecutionStatus;
use model::execution::statement::{
    CreateStatement, FinishStatement, MetaInfo, StatementId, StatementRange, StatementStatus,
    UpdateStatement,
};
use object_store::ObjectStore;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use store::{StoreError, Uploader, keys};
use tokio::sync::watch;
use tracing::{debug, info, warn};

struct StatementState {
    id: StatementId,
    index: usize,
    has_log: bool,
    percent: Option<f64>,
    tracking_url: Option<String>,
    /// Set once the log chunks were moved into a blob.
    log_key: Option<String>,
}

pub struct ExecutionLogger {
    execution_id: ExecutionId,
    catalog: Catalog,
    store: Arc<dyn ObjectStore>,
    events: EventBus,
    settings: ExecutorSettings,
    progress: watch::Sender<ExecutionProgress>,
    current: Option<StatementState>,
}

impl ExecutionLogger {
    pub fn new(
        execution_id: ExecutionId,
        catalog: Catalog,
        store: Arc<dyn ObjectStore>,
        events: EventBus,
        settings: ExecutorSettings,
    ) -> Self {
        let (progress, _) = watch::channel(ExecutionProgress::default());
        Self {
            execution_id,
            catalog,
            store,
            events,
            settings,
            progress,
            current: None,
        }
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<ExecutionProgress> {
        self.progress.subscribe()
    }

    pub fn statement_id(&self) -> Option<StatementId> {
        self.current.as_ref().map(|s| s.id)
    }

    fn emit(&self, kind: EventKind, statement_id: Option<StatementId>, payload: Value) {
        let mut event = LifecycleEvent::new(kind, self.execution_id, payload);
        event.statement_id = statement_id;
        self.events.publish(event);
    }

    pub async fn on_query_start(
        &mut self,
        total_statements: usize,
        payload: Value,
    ) -> Result<(), ExecutorError> {
        self.catalog
            .execution
            .update_status(self.execution_id, ExecutionStatus::Running)
            .await?;
        self.progress
            .send_replace(ExecutionProgress::new(total_statements));
        info!("Execution {} started with {total_statements} statements", self.execution_id);
        self.emit(EventKind::QueryStart, None, payload);
        Ok(())
    }

    pub async fn on_statement_start(
        &mut self,
        index: usize,
        range: StatementRange,
    ) -> Result<StatementId, ExecutorError> {
        let statement = self
            .catalog
            .execution
            .create_statement(CreateStatement {
                execution_id: self.execution_id,
                range,
            })
            .await?;
        self.current = Some(StatementState {
            id: statement.id,
            index,
            has_log: false,
            percent: None,
            tracking_url: None,
            log_key: None,
        });
        self.progress.send_modify(|p| *p = p.at(index, 0.0));
        self.emit(
            EventKind::StatementStart,
            Some(statement.id),
            json!({
                "index": index,
                "statement_start": range.start,
                "statement_end": range.end,
            }),
        );
        Ok(statement.id)
    }

    /// Persist what changed since the previous update and report exactly that.
    pub async fn on_statement_update(
        &mut self,
        log: &str,
        percent_complete: Option<f64>,
        tracking_url: Option<String>,
    ) -> Result<(), ExecutorError> {
        let Some(state) = self.current.as_mut() else {
            return Ok(());
        };
        let statement_id = state.id;
        let mut changed = Map::new();
        let mut update = UpdateStatement::default();

        if !log.is_empty() {
            let appended = self
                .catalog
                .execution
                .append_log_chunks(statement_id, log)
                .await;
            match appended {
                Ok(_) => {
                    if !state.has_log {
                        state.has_log = true;
                        update.has_log = Some(true);
                    }
                }
                // Lost log lines never fail the statement
                Err(e) => warn!("Failed to store log of statement {statement_id}: {e}"),
            }
            changed.insert("log".into(), json!(log));
        }
        if let Some(percent) = percent_complete {
            if state.percent != Some(percent) {
                state.percent = Some(percent);
                let index = state.index;
                self.progress.send_modify(|p| *p = p.at(index, percent));
                changed.insert("percent_complete".into(), json!(percent));
            }
        }
        if tracking_url.is_some() && tracking_url != state.tracking_url {
            state.tracking_url = tracking_url.clone();
            update.meta_info = Some(MetaInfo {
                tracking_url: tracking_url.clone(),
            });
            changed.insert("tracking_url".into(), json!(tracking_url));
        }

        if !update.is_empty() {
            self.catalog
                .execution
                .update_statement(statement_id, update)
                .await?;
        }
        if !changed.is_empty() {
            self.emit(
                EventKind::StatementUpdate,
                Some(statement_id),
                Value::Object(changed),
            );
        }
        Ok(())
    }

    pub async fn on_statement_upload(&mut self) -> Result<(), ExecutorError> {
        let Some(statement_id) = self.statement_id() else {
            return Ok(());
        };
        self.catalog
            .execution
            .update_statement(
                statement_id,
                UpdateStatement {
                    status: Some(StatementStatus::Uploading),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    pub async fn on_statement_end(
        &mut self,
        result_key: Option<String>,
        result_row_count: i64,
    ) -> Result<(), ExecutorError> {
        let Some(mut state) = self.current.take() else {
            return Ok(());
        };
        state.log_key = self.consolidate_log(&state).await;
        let log_key = state.log_key.clone();
        let finished = self
            .catalog
            .execution
            .finish_statement(
                state.id,
                FinishStatement {
                    status: StatementStatus::Done,
                    result_key: result_key.clone(),
                    log_key: log_key.clone(),
                    result_row_count,
                    has_log: state.has_log,
                },
            )
            .await;
        if let Err(e) = finished {
            // Still open, the error path closes it
            self.current = Some(state);
            return Err(e.into());
        }
        debug!(
            "Statement {} of execution {} done with {result_row_count} rows",
            state.id, self.execution_id
        );
        self.emit(
            EventKind::StatementEnd,
            Some(state.id),
            json!({
                "result_key": result_key,
                "log_key": log_key,
                "result_row_count": result_row_count,
            }),
        );
        Ok(())
    }

    pub async fn on_query_end(&mut self) -> Result<(), ExecutorError> {
        self.catalog
            .execution
            .update_status(self.execution_id, ExecutionStatus::Done)
            .await?;
        self.progress.send_modify(|p| *p = p.finished());
        info!("Execution {} finished", self.execution_id);
        self.emit(EventKind::QueryEnd, None, json!({}));
        Ok(())
    }

    pub async fn on_cancel(&mut self) -> Result<(), ExecutorError> {
        let statement_id = self.statement_id();
        self.close_statement(StatementStatus::Cancel).await?;
        self.catalog
            .execution
            .update_status(self.execution_id, ExecutionStatus::Cancel)
            .await?;
        info!("Execution {} cancelled", self.execution_id);
        self.emit(EventKind::QueryCancel, statement_id, json!({}));
        Ok(())
    }

    pub async fn on_exception(&mut self, error: &ParsedError) -> Result<(), ExecutorError> {
        let statement_id = self.statement_id();
        self.close_statement(StatementStatus::Error).await?;
        let (_, record) = self
            .catalog
            .execution
            .finish_with_error(CreateExecutionError {
                execution_id: self.execution_id,
                kind: error.kind,
                message: error.message.clone(),
                extracted_message: error.extracted.clone(),
                position: error.position,
            })
            .await?;
        warn!(
            "Execution {} failed ({}): {}",
            self.execution_id, error.kind, error.message
        );
        self.emit(
            EventKind::QueryException,
            statement_id,
            json!({
                "kind": record.kind,
                "message": record.message,
                "extracted_message": record.extracted_message,
                "line": record.line,
                "column": record.column,
            }),
        );
        Ok(())
    }

    /// Finalize the in-flight statement without a result.
    async fn close_statement(&mut self, status: StatementStatus) -> Result<(), ExecutorError> {
        let Some(state) = self.current.take() else {
            return Ok(());
        };
        let log_key = self.consolidate_log(&state).await;
        self.catalog
            .execution
            .finish_statement(
                state.id,
                FinishStatement {
                    status,
                    result_key: None,
                    log_key,
                    result_row_count: 0,
                    has_log: state.has_log,
                },
            )
            .await?;
        Ok(())
    }

    /// Move the live log chunks of a statement into one blob.
    ///
    /// On failure the chunks stay in the catalog and remain readable from there.
    async fn consolidate_log(&self, state: &StatementState) -> Option<String> {
        if state.log_key.is_some() {
            return state.log_key.clone();
        }
        if !state.has_log {
            return None;
        }
        let chunks = match self.catalog.execution.get_log_chunks(state.id).await {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!("Failed to load log chunks of statement {}: {e}", state.id);
                return None;
            }
        };
        let key = keys::log_key(&self.settings.result_prefix, self.execution_id, state.id);
        let log: Vec<&str> = chunks.iter().map(|c| c.log.as_str()).collect();
        if let Err(e) = self.upload_log(&key, &log).await {
            warn!("Failed to upload log of statement {}: {e}", state.id);
            return None;
        }
        if let Err(e) = self.catalog.execution.delete_log_chunks(state.id).await {
            warn!("Failed to delete log chunks of statement {}: {e}", state.id);
        }
        Some(key)
    }

    async fn upload_log(&self, key: &str, chunks: &[&str]) -> Result<(), StoreError> {
        let mut uploader =
            Uploader::open(self.store.clone(), key, self.settings.uploader).await?;
        for chunk in chunks {
            if !uploader.write(chunk.as_bytes()).await? {
                warn!("Log {key} truncated at the part limit");
                break;
            }
        }
        uploader.complete().await
    }
}
