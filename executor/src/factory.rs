use crate::context::WorkerContext;
use crate::error::FactoryError;
use crate::logger::ExecutionLogger;
use crate::query_executor::{ExecutorParts, QueryExecutor};
use crate::table_extractor::first_violation;
use catalog::CatalogError;
use model::execution::execution_status::ExecutionStatus;
use model::execution::{ExecutionId, ExecutionType};
use serde_json::Value;
use tracing::{debug, instrument};

/// Turn an `Initialized` execution into an executor ready to be polled.
///
/// All checks run before the execution is marked `Delivered` and before any
/// statement row exists, so a rejected execution leaves no partial state.
#[instrument(skip(ctx, task_handle))]
pub async fn create_executor_from_execution(
    ctx: &WorkerContext,
    execution_id: ExecutionId,
    task_handle: impl Into<String>,
    execution_type: ExecutionType,
) -> Result<QueryExecutor, FactoryError> {
    let execution = match ctx.catalog.execution.get_execution(execution_id).await {
        Ok(execution) => execution,
        Err(CatalogError::ExecutionNotFound(_)) => {
            return Err(FactoryError::InvalidExecution {
                id: execution_id,
                reason: "execution does not exist".to_string(),
            });
        }
        Err(e) => return Err(e.into()),
    };
    if execution.status != ExecutionStatus::Initialized {
        return Err(FactoryError::InvalidExecution {
            id: execution_id,
            reason: format!("execution is already {}", execution.status),
        });
    }

    let engine = ctx
        .catalog
        .engine
        .get_engine_by_id(execution.engine_id)
        .await?;
    if engine.is_archived() {
        return Err(FactoryError::ArchivedEngine(engine.id));
    }

    let spec = ctx
        .registry
        .lookup(&engine.language, &engine.executor)
        .cloned()
        .ok_or_else(|| FactoryError::UnknownExecutor {
            language: engine.language.clone(),
            executor: engine.executor.clone(),
        })?;

    let mut params = engine.connection_params();
    if let Some(field) = &engine.proxy_user_field {
        let user = ctx.catalog.engine.get_user(execution.uid).await?;
        params.insert(field.clone(), Value::String(user.username));
    }

    let ranges = ctx.splitter.get_statement_ranges(&execution.query);
    if ranges.is_empty() {
        return Err(FactoryError::InvalidExecution {
            id: execution_id,
            reason: "query contains no statements".to_string(),
        });
    }

    if let Some(metastore_id) = engine.metastore_id {
        let metastore = ctx.catalog.engine.get_metastore(metastore_id).await?;
        for range in &ranges {
            let tables = ctx
                .table_extractor
                .referenced_tables(range.slice(&execution.query), &engine.language);
            if let Some(denied) = first_violation(&metastore.acl_control, &tables) {
                return Err(FactoryError::AclViolation {
                    schema: denied.schema.clone(),
                    table: denied.table.clone(),
                });
            }
        }
    }

    match ctx.catalog.execution.deliver(execution_id, task_handle).await {
        Ok(_) => {}
        // Another worker got there first
        Err(CatalogError::InvalidTransition { from, .. }) => {
            return Err(FactoryError::InvalidExecution {
                id: execution_id,
                reason: format!("execution is already {from}"),
            });
        }
        Err(e) => return Err(e.into()),
    }
    debug!(
        "Delivered execution {execution_id} to executor '{}' with {} statements",
        spec.name,
        ranges.len()
    );

    let logger = ExecutionLogger::new(
        execution_id,
        ctx.catalog.clone(),
        ctx.store.clone(),
        ctx.events.clone(),
        ctx.settings.clone(),
    );
    Ok(QueryExecutor::new(ExecutorParts {
        execution_id,
        execution_type,
        query: execution.query,
        language: engine.language,
        params,
        ranges,
        spec,
        store: ctx.store.clone(),
        settings: ctx.settings.clone(),
        logger,
    }))
}
