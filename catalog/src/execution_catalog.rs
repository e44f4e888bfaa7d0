use crate::database::State;
use crate::error::CatalogError;
use crate::notification::{IntentChannel, NotifiableCatalog};
use chrono::Local;
use model::IntoCondition;
use model::execution::execution_error::{self, CreateExecutionError};
use model::execution::execution_status::ExecutionStatus;
use model::execution::log_chunk::{self, CreateLogChunk, split_into_chunks};
use model::execution::statement::{
    self, CreateStatement, FinishStatement, StatementId, UpdateStatement,
};
use model::execution::{
    self, CreateExecution, Entity as ExecutionEntity, ExecutionId, GetExecution,
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// Persistent record of executions, their statements, live log chunks and errors.
///
/// Every status change of an execution is forwarded on `state_tx`, so listeners
/// waiting for a terminal state never miss an intermediate update.
pub struct ExecutionCatalog {
    pub(crate) db: State,
    intent: IntentChannel<()>,
    state_tx: mpsc::UnboundedSender<execution::Model>,
}

/// Move `id` into `next` if its current status is one of `from`.
///
/// The status guard is part of the `UPDATE`, so a terminal row can never be reopened.
async fn transition<C: ConnectionTrait>(
    conn: &C,
    id: ExecutionId,
    next: ExecutionStatus,
    from: Vec<ExecutionStatus>,
    task_id: Option<String>,
) -> Result<execution::Model, CatalogError> {
    let mut update = execution::ActiveModel {
        status: Set(next),
        ..Default::default()
    };
    if next.is_terminal() {
        update.completed_at = Set(Some(Local::now()));
    }
    if let Some(task_id) = task_id {
        update.task_id = Set(Some(task_id));
    }

    let result = ExecutionEntity::update_many()
        .set(update)
        .filter(execution::Column::Id.eq(id))
        .filter(execution::Column::Status.is_in(from))
        .exec(conn)
        .await?;

    let current = ExecutionEntity::find_by_id(id)
        .one(conn)
        .await?
        .ok_or(CatalogError::ExecutionNotFound(id))?;

    if result.rows_affected == 0 {
        return Err(CatalogError::InvalidTransition {
            id,
            from: current.status,
            to: next,
        });
    }
    Ok(current)
}

impl ExecutionCatalog {
    pub fn new(db: State, state_tx: mpsc::UnboundedSender<execution::Model>) -> Arc<Self> {
        Arc::new(Self {
            db,
            intent: IntentChannel::new(()),
            state_tx,
        })
    }

    fn publish(&self, model: &execution::Model) {
        // Receivers are optional; the coordinator may run without a listener
        let _ = self.state_tx.send(model.clone());
    }

    pub async fn create_execution(
        &self,
        req: CreateExecution,
    ) -> Result<execution::Model, CatalogError> {
        let model = execution::ActiveModel::from(req)
            .insert(&self.db.conn)
            .await?;
        debug!("Created execution {}", model.id);
        self.intent.notify_intent(());
        Ok(model)
    }

    pub async fn get_execution(&self, id: ExecutionId) -> Result<execution::Model, CatalogError> {
        ExecutionEntity::find_by_id(id)
            .one(&self.db.conn)
            .await?
            .ok_or(CatalogError::ExecutionNotFound(id))
    }

    pub async fn get_executions(
        &self,
        req: GetExecution,
    ) -> Result<Vec<execution::Model>, CatalogError> {
        Ok(ExecutionEntity::find()
            .filter(req.into_condition())
            .order_by_asc(execution::Column::Id)
            .all(&self.db.conn)
            .await?)
    }

    /// Executions that were submitted but not yet picked up by a worker.
    pub async fn get_initialized(&self) -> Result<Vec<execution::Model>, CatalogError> {
        self.get_executions(GetExecution::new().with_status(ExecutionStatus::Initialized))
            .await
    }

    /// Record the worker's task handle and move the execution to `Delivered`.
    pub async fn deliver(
        &self,
        id: ExecutionId,
        task_id: impl Into<String>,
    ) -> Result<execution::Model, CatalogError> {
        let updated = transition(
            &self.db.conn,
            id,
            ExecutionStatus::Delivered,
            ExecutionStatus::predecessors(ExecutionStatus::Delivered),
            Some(task_id.into()),
        )
        .await?;
        self.publish(&updated);
        Ok(updated)
    }

    pub async fn update_status(
        &self,
        id: ExecutionId,
        next: ExecutionStatus,
    ) -> Result<execution::Model, CatalogError> {
        let updated = transition(
            &self.db.conn,
            id,
            next,
            ExecutionStatus::predecessors(next),
            None,
        )
        .await?;
        self.publish(&updated);
        Ok(updated)
    }

    /// Cancel an execution no worker has picked up yet.
    ///
    /// Returns `None` when the execution already left `Initialized`; the owning
    /// worker is then responsible for cancelling it.
    pub async fn cancel_initialized(
        &self,
        id: ExecutionId,
    ) -> Result<Option<execution::Model>, CatalogError> {
        match transition(
            &self.db.conn,
            id,
            ExecutionStatus::Cancel,
            vec![ExecutionStatus::Initialized],
            None,
        )
        .await
        {
            Ok(updated) => {
                self.publish(&updated);
                Ok(Some(updated))
            }
            Err(CatalogError::InvalidTransition { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Store the execution's single error record and move it to `Error` atomically.
    pub async fn finish_with_error(
        &self,
        req: CreateExecutionError,
    ) -> Result<(execution::Model, execution_error::Model), CatalogError> {
        let (updated, error) = self
            .db
            .conn
            .transaction::<_, _, CatalogError>(|txn| {
                Box::pin(async move {
                    let updated = transition(
                        txn,
                        req.execution_id,
                        ExecutionStatus::Error,
                        ExecutionStatus::predecessors(ExecutionStatus::Error),
                        None,
                    )
                    .await?;
                    let error = execution_error::ActiveModel::from(req).insert(txn).await?;
                    Ok((updated, error))
                })
            })
            .await?;
        self.publish(&updated);
        Ok((updated, error))
    }

    pub async fn get_error(
        &self,
        id: ExecutionId,
    ) -> Result<Option<execution_error::Model>, CatalogError> {
        Ok(execution_error::Entity::find()
            .filter(execution_error::Column::ExecutionId.eq(id))
            .one(&self.db.conn)
            .await?)
    }

    pub async fn create_statement(
        &self,
        req: CreateStatement,
    ) -> Result<statement::Model, CatalogError> {
        Ok(statement::ActiveModel::from(req)
            .insert(&self.db.conn)
            .await?)
    }

    pub async fn get_statement(&self, id: StatementId) -> Result<statement::Model, CatalogError> {
        statement::Entity::find_by_id(id)
            .one(&self.db.conn)
            .await?
            .ok_or(CatalogError::StatementNotFound(id))
    }

    /// Statements of an execution in creation order.
    pub async fn get_statements(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Vec<statement::Model>, CatalogError> {
        Ok(statement::Entity::find()
            .filter(statement::Column::ExecutionId.eq(execution_id))
            .order_by_asc(statement::Column::Id)
            .all(&self.db.conn)
            .await?)
    }

    pub async fn update_statement(
        &self,
        id: StatementId,
        req: UpdateStatement,
    ) -> Result<statement::Model, CatalogError> {
        if req.is_empty() {
            return self.get_statement(id).await;
        }

        let mut model = statement::ActiveModel {
            id: sea_orm::ActiveValue::Unchanged(id),
            ..Default::default()
        };
        if let Some(status) = req.status {
            model.status = Set(status);
            if status.is_terminal() {
                model.completed_at = Set(Some(Local::now()));
            }
        }
        if let Some(meta_info) = req.meta_info {
            model.meta_info = Set(meta_info);
        }
        if let Some(has_log) = req.has_log {
            model.has_log = Set(has_log);
        }
        Ok(model.update(&self.db.conn).await?)
    }

    pub async fn finish_statement(
        &self,
        id: StatementId,
        req: FinishStatement,
    ) -> Result<statement::Model, CatalogError> {
        let completed_at = req.status.is_terminal().then(Local::now);
        let model = statement::ActiveModel {
            id: sea_orm::ActiveValue::Unchanged(id),
            status: Set(req.status),
            result_key: Set(req.result_key),
            log_key: Set(req.log_key),
            result_row_count: Set(req.result_row_count),
            has_log: Set(req.has_log),
            completed_at: Set(completed_at),
            ..Default::default()
        };
        Ok(model.update(&self.db.conn).await?)
    }

    /// Append `log` as bounded chunk rows. Returns the number of rows written.
    pub async fn append_log_chunks(
        &self,
        statement_id: StatementId,
        log: &str,
    ) -> Result<usize, CatalogError> {
        let chunks: Vec<log_chunk::ActiveModel> = split_into_chunks(log)
            .into_iter()
            .map(|log| log_chunk::ActiveModel::from(CreateLogChunk { statement_id, log }))
            .collect();
        if chunks.is_empty() {
            return Ok(0);
        }

        let count = chunks.len();
        self.db
            .with_retry(|| log_chunk::Entity::insert_many(chunks.clone()).exec(&self.db.conn))
            .await?;
        Ok(count)
    }

    pub async fn get_log_chunks(
        &self,
        statement_id: StatementId,
    ) -> Result<Vec<log_chunk::Model>, CatalogError> {
        Ok(log_chunk::Entity::find()
            .filter(log_chunk::Column::StatementId.eq(statement_id))
            .order_by_asc(log_chunk::Column::Id)
            .all(&self.db.conn)
            .await?)
    }

    pub async fn delete_log_chunks(&self, statement_id: StatementId) -> Result<u64, CatalogError> {
        let result = log_chunk::Entity::delete_many()
            .filter(log_chunk::Column::StatementId.eq(statement_id))
            .exec(&self.db.conn)
            .await?;
        Ok(result.rows_affected)
    }
}

impl NotifiableCatalog for ExecutionCatalog {
    type Intent = ();

    fn subscribe_intent(&self) -> watch::Receiver<Self::Intent> {
        self.intent.subscribe_intent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Catalog;
    use crate::test_utils::{
        TEST_ENGINE_ID, TEST_UID, seed_engine_and_user, seed_test_ids, test_prop,
    };
    use model::execution::execution_error::{ErrorKind, ErrorPosition};
    use model::execution::log_chunk::LOG_CHUNK_CHARS;
    use model::execution::statement::{MetaInfo, StatementRange, StatementStatus};
    use model::testing::{arb_create_execution, arb_valid_status_path};
    use proptest::prelude::*;
    use sea_orm::Iterable;

    async fn submit(catalog: &Catalog, query: &str) -> execution::Model {
        let (engine, user) = seed_engine_and_user(catalog).await;
        catalog
            .execution
            .create_execution(CreateExecution::new(query, engine.id, user.id))
            .await
            .expect("Execution creation should succeed")
    }

    #[tokio::test]
    async fn test_create_and_get_execution() {
        let (catalog, _receivers) = Catalog::for_test().await;
        let mut intent = catalog.execution.subscribe_intent();
        intent.mark_unchanged();

        let created = submit(&catalog, "SELECT 1").await;
        assert_eq!(created.status, ExecutionStatus::Initialized);
        assert!(created.task_id.is_none());
        assert!(created.completed_at.is_none());
        assert!(intent.has_changed().unwrap(), "Creation must notify intent");

        let fetched = catalog.execution.get_execution(created.id).await.unwrap();
        assert_eq!(fetched, created);

        let initialized = catalog.execution.get_initialized().await.unwrap();
        assert_eq!(initialized, vec![created]);
    }

    #[tokio::test]
    async fn test_missing_execution_is_not_found() {
        let (catalog, _receivers) = Catalog::for_test().await;
        assert!(matches!(
            catalog.execution.get_execution(42).await,
            Err(CatalogError::ExecutionNotFound(42))
        ));
        assert!(matches!(
            catalog
                .execution
                .update_status(42, ExecutionStatus::Running)
                .await,
            Err(CatalogError::ExecutionNotFound(42))
        ));
    }

    #[tokio::test]
    async fn test_deliver_records_task_handle() {
        let (catalog, _receivers) = Catalog::for_test().await;
        let created = submit(&catalog, "SELECT 1").await;

        let delivered = catalog.execution.deliver(created.id, "task-1").await.unwrap();
        assert_eq!(delivered.status, ExecutionStatus::Delivered);
        assert_eq!(delivered.task_id.as_deref(), Some("task-1"));

        // A redelivered task must not pick up the same execution twice
        assert!(matches!(
            catalog.execution.deliver(created.id, "task-2").await,
            Err(CatalogError::InvalidTransition {
                from: ExecutionStatus::Delivered,
                to: ExecutionStatus::Delivered,
                ..
            })
        ));
        assert!(catalog.execution.get_initialized().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_initialized_only_revokes_unstarted() {
        let (catalog, _receivers) = Catalog::for_test().await;
        let pending = submit(&catalog, "SELECT 1").await;
        let revoked = catalog
            .execution
            .cancel_initialized(pending.id)
            .await
            .unwrap()
            .expect("Initialized execution should be revoked");
        assert_eq!(revoked.status, ExecutionStatus::Cancel);
        assert!(revoked.completed_at.is_some());

        let started = catalog
            .execution
            .create_execution(CreateExecution::new("SELECT 2", pending.engine_id, pending.uid))
            .await
            .unwrap();
        catalog.execution.deliver(started.id, "task").await.unwrap();
        assert!(
            catalog
                .execution
                .cancel_initialized(started.id)
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(
            catalog.execution.get_execution(started.id).await.unwrap().status,
            ExecutionStatus::Delivered
        );
    }

    #[tokio::test]
    async fn test_finish_with_error_is_recorded_once() {
        let (catalog, _receivers) = Catalog::for_test().await;
        let created = submit(&catalog, "SELECT 1;\nSELEC 2").await;
        catalog.execution.deliver(created.id, "task").await.unwrap();

        let req = CreateExecutionError {
            execution_id: created.id,
            kind: ErrorKind::Engine,
            message: "line 2:1: mismatched input 'SELEC'".to_string(),
            extracted_message: Some("mismatched input 'SELEC'".to_string()),
            position: Some(ErrorPosition {
                line: 2,
                column: Some(1),
            }),
        };
        let (updated, error) = catalog
            .execution
            .finish_with_error(req.clone())
            .await
            .unwrap();
        assert_eq!(updated.status, ExecutionStatus::Error);
        assert_eq!(error.kind, ErrorKind::Engine);
        assert_eq!(error.position(), req.position);

        // The execution is terminal, a second error must be refused
        assert!(catalog.execution.finish_with_error(req).await.is_err());
        let stored = catalog.execution.get_error(created.id).await.unwrap();
        assert_eq!(stored, Some(error));
    }

    #[tokio::test]
    async fn test_statements_and_log_chunks() {
        let (catalog, _receivers) = Catalog::for_test().await;
        let query = "SELECT 1; SELECT 2;";
        let created = submit(&catalog, query).await;

        let first = catalog
            .execution
            .create_statement(CreateStatement {
                execution_id: created.id,
                range: StatementRange::new(0, 8),
            })
            .await
            .unwrap();
        let second = catalog
            .execution
            .create_statement(CreateStatement {
                execution_id: created.id,
                range: StatementRange::new(10, 18),
            })
            .await
            .unwrap();
        assert_eq!(first.status, StatementStatus::Running);
        assert_eq!(first.range().slice(query), "SELECT 1");

        let statements = catalog.execution.get_statements(created.id).await.unwrap();
        assert_eq!(
            statements.iter().map(|s| s.id).collect::<Vec<_>>(),
            vec![first.id, second.id]
        );

        let updated = catalog
            .execution
            .update_statement(
                first.id,
                UpdateStatement {
                    meta_info: Some(MetaInfo {
                        tracking_url: Some("http://tracker/1".to_string()),
                    }),
                    has_log: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, StatementStatus::Running);
        assert!(updated.has_log);
        assert_eq!(
            updated.meta_info.tracking_url.as_deref(),
            Some("http://tracker/1")
        );

        let log = "x".repeat(LOG_CHUNK_CHARS + 10);
        let written = catalog
            .execution
            .append_log_chunks(first.id, &log)
            .await
            .unwrap();
        assert_eq!(written, 2);
        catalog
            .execution
            .append_log_chunks(first.id, "tail")
            .await
            .unwrap();
        assert_eq!(catalog.execution.append_log_chunks(first.id, "").await.unwrap(), 0);

        let chunks = catalog.execution.get_log_chunks(first.id).await.unwrap();
        let joined: String = chunks.iter().map(|c| c.log.as_str()).collect();
        assert_eq!(joined, format!("{log}tail"));
        assert!(catalog.execution.get_log_chunks(second.id).await.unwrap().is_empty());

        assert_eq!(catalog.execution.delete_log_chunks(first.id).await.unwrap(), 3);
        assert!(catalog.execution.get_log_chunks(first.id).await.unwrap().is_empty());

        let finished = catalog
            .execution
            .finish_statement(
                first.id,
                FinishStatement {
                    status: StatementStatus::Done,
                    result_key: Some("results/1/1/result.csv".to_string()),
                    log_key: Some("results/1/1/log.txt".to_string()),
                    result_row_count: 1,
                    has_log: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(finished.status, StatementStatus::Done);
        assert_eq!(finished.result_row_count, 1);
        assert!(finished.completed_at.is_some());
        assert_eq!(finished.created_at, first.created_at);
    }

    /// Walk an execution along `path`, checking that every invalid move in between is refused.
    async fn prop_status_moves_are_monotonic(
        db: State,
        req: CreateExecution,
        path: Vec<ExecutionStatus>,
    ) {
        let (catalog, _receivers) = Catalog::from(db);
        let created = catalog.execution.create_execution(req).await.unwrap();
        let mut current = created;

        for next in &path[1..] {
            for invalid in current.status.invalid_transitions() {
                assert!(
                    catalog
                        .execution
                        .update_status(current.id, invalid)
                        .await
                        .is_err(),
                    "Transition {} -> {} should be rejected",
                    current.status,
                    invalid
                );
            }
            let refetched = catalog.execution.get_execution(current.id).await.unwrap();
            assert_eq!(refetched.status, current.status, "Rejected moves must not write");

            current = catalog
                .execution
                .update_status(current.id, *next)
                .await
                .expect("Valid transition should succeed");
            assert_eq!(current.status, *next);
        }

        assert!(current.status.is_terminal());
        assert!(current.completed_at.is_some());
        for status in ExecutionStatus::iter() {
            assert!(
                catalog
                    .execution
                    .update_status(current.id, status)
                    .await
                    .is_err(),
                "Terminal execution must not move to {status}"
            );
        }
    }

    /// Each accepted status change produces exactly one notification, in order.
    async fn prop_notification_per_status_change(
        db: State,
        req: CreateExecution,
        path: Vec<ExecutionStatus>,
    ) {
        let (catalog, mut receivers) = Catalog::from(db);
        let created = catalog.execution.create_execution(req).await.unwrap();
        for next in &path[1..] {
            catalog
                .execution
                .update_status(created.id, *next)
                .await
                .unwrap();
        }

        let notifications: Vec<_> =
            std::iter::from_fn(|| receivers.execution.try_recv().ok()).collect();
        assert_eq!(notifications.len(), path.len() - 1);
        for (notification, expected) in notifications.iter().zip(&path[1..]) {
            assert_eq!(notification.id, created.id);
            assert_eq!(notification.status, *expected);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn status_moves_are_monotonic(
            req in arb_create_execution(TEST_ENGINE_ID, TEST_UID),
            path in arb_valid_status_path(),
        ) {
            test_prop(|db| async move {
                seed_test_ids(&db).await;
                prop_status_moves_are_monotonic(db, req, path).await;
            });
        }

        #[test]
        fn notification_per_status_change(
            req in arb_create_execution(TEST_ENGINE_ID, TEST_UID),
            path in arb_valid_status_path(),
        ) {
            test_prop(|db| async move {
                seed_test_ids(&db).await;
                prop_notification_per_status_change(db, req, path).await;
            });
        }
    }
}
