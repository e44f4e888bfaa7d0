use crate::{assert_not_has_tables, drop_tables};
use model::execution::execution_error::ErrorKind;
use model::execution::execution_status::ExecutionStatus;
use model::execution::statement::StatementStatus;
use sea_orm::DbBackend;
use sea_orm_migration::prelude::{Table as MigrationTable, *};
use strum::IntoEnumIterator;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        assert_not_has_tables!(
            manager,
            User,
            Metastore,
            QueryEngine,
            QueryExecution,
            StatementExecution,
            StatementLogChunk,
            ExecutionError
        );

        if manager.get_database_backend() == DbBackend::Sqlite {
            manager
                .get_connection()
                .execute_unprepared("PRAGMA foreign_keys = ON")
                .await?;
        }

        manager
            .create_table(
                MigrationTable::create()
                    .table(User::Table)
                    .col(
                        ColumnDef::new(User::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(User::Username).string().not_null().unique_key())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                MigrationTable::create()
                    .table(Metastore::Table)
                    .col(
                        ColumnDef::new(Metastore::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Metastore::Name).string().not_null().unique_key())
                    .col(ColumnDef::new(Metastore::AclControl).json().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                MigrationTable::create()
                    .table(QueryEngine::Table)
                    .col(
                        ColumnDef::new(QueryEngine::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(QueryEngine::Name).string().not_null().unique_key())
                    .col(ColumnDef::new(QueryEngine::Language).string().not_null())
                    .col(ColumnDef::new(QueryEngine::Executor).string().not_null())
                    .col(ColumnDef::new(QueryEngine::ExecutorParams).json().not_null())
                    .col(ColumnDef::new(QueryEngine::ProxyUserField).string().null())
                    .col(ColumnDef::new(QueryEngine::MetastoreId).big_integer().null())
                    .col(ColumnDef::new(QueryEngine::DeletedAt).date_time().null())
                    .foreign_key(
                        ForeignKey::create()
                            .from(QueryEngine::Table, QueryEngine::MetastoreId)
                            .to(Metastore::Table, Metastore::Id)
                            .on_delete(ForeignKeyAction::SetNull)
                            .on_update(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                MigrationTable::create()
                    .table(QueryExecution::Table)
                    .col(
                        ColumnDef::new(QueryExecution::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(QueryExecution::Query).text().not_null())
                    .col(ColumnDef::new(QueryExecution::EngineId).big_integer().not_null())
                    .col(ColumnDef::new(QueryExecution::Uid).big_integer().not_null())
                    .col(
                        ColumnDef::new(QueryExecution::Status)
                            .string()
                            .not_null()
                            .default(ExecutionStatus::default().to_string())
                            .check(
                                Expr::col(QueryExecution::Status).is_in(
                                    ExecutionStatus::iter()
                                        .map(|s| s.to_string())
                                        .collect::<Vec<_>>(),
                                ),
                            ),
                    )
                    .col(ColumnDef::new(QueryExecution::TaskId).string().null())
                    .col(ColumnDef::new(QueryExecution::CreatedAt).date_time().not_null())
                    .col(ColumnDef::new(QueryExecution::CompletedAt).date_time().null())
                    .foreign_key(
                        ForeignKey::create()
                            .from(QueryExecution::Table, QueryExecution::EngineId)
                            .to(QueryEngine::Table, QueryEngine::Id)
                            .on_delete(ForeignKeyAction::Restrict)
                            .on_update(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(QueryExecution::Table, QueryExecution::Uid)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Restrict)
                            .on_update(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                MigrationTable::create()
                    .table(StatementExecution::Table)
                    .col(
                        ColumnDef::new(StatementExecution::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(StatementExecution::ExecutionId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StatementExecution::StatementStart)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StatementExecution::StatementEnd)
                            .big_integer()
                            .not_null()
                            .check(
                                Expr::col(StatementExecution::StatementEnd)
                                    .gte(Expr::col(StatementExecution::StatementStart)),
                            ),
                    )
                    .col(
                        ColumnDef::new(StatementExecution::Status)
                            .string()
                            .not_null()
                            .default(StatementStatus::default().to_string())
                            .check(
                                Expr::col(StatementExecution::Status).is_in(
                                    StatementStatus::iter()
                                        .map(|s| s.to_string())
                                        .collect::<Vec<_>>(),
                                ),
                            ),
                    )
                    .col(ColumnDef::new(StatementExecution::ResultKey).string().null())
                    .col(ColumnDef::new(StatementExecution::LogKey).string().null())
                    .col(
                        ColumnDef::new(StatementExecution::ResultRowCount)
                            .big_integer()
                            .not_null()
                            .default(0)
                            .check(Expr::col(StatementExecution::ResultRowCount).gte(0)),
                    )
                    .col(
                        ColumnDef::new(StatementExecution::HasLog)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(StatementExecution::MetaInfo).json().not_null())
                    .col(
                        ColumnDef::new(StatementExecution::CreatedAt)
                            .date_time()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StatementExecution::CompletedAt)
                            .date_time()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(StatementExecution::Table, StatementExecution::ExecutionId)
                            .to(QueryExecution::Table, QueryExecution::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                MigrationTable::create()
                    .table(StatementLogChunk::Table)
                    .col(
                        ColumnDef::new(StatementLogChunk::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(StatementLogChunk::StatementId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(StatementLogChunk::Log).text().not_null())
                    .col(
                        ColumnDef::new(StatementLogChunk::CreatedAt)
                            .date_time()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(StatementLogChunk::Table, StatementLogChunk::StatementId)
                            .to(StatementExecution::Table, StatementExecution::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                MigrationTable::create()
                    .table(ExecutionError::Table)
                    .col(
                        ColumnDef::new(ExecutionError::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ExecutionError::ExecutionId)
                            .big_integer()
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(ExecutionError::Kind)
                            .string()
                            .not_null()
                            .check(
                                Expr::col(ExecutionError::Kind).is_in(
                                    ErrorKind::iter().map(|s| s.to_string()).collect::<Vec<_>>(),
                                ),
                            ),
                    )
                    .col(ColumnDef::new(ExecutionError::ExtractedMessage).text().null())
                    .col(ColumnDef::new(ExecutionError::Message).text().not_null())
                    .col(ColumnDef::new(ExecutionError::Line).integer().null())
                    .col(ColumnDef::new(ExecutionError::Column).integer().null())
                    .col(ColumnDef::new(ExecutionError::CreatedAt).date_time().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .from(ExecutionError::Table, ExecutionError::ExecutionId)
                            .to(QueryExecution::Table, QueryExecution::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_statement_execution_execution_id")
                    .table(StatementExecution::Table)
                    .col(StatementExecution::ExecutionId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_statement_log_chunk_statement_id")
                    .table(StatementLogChunk::Table)
                    .col(StatementLogChunk::StatementId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        drop_tables!(
            manager,
            ExecutionError,
            StatementLogChunk,
            StatementExecution,
            QueryExecution,
            QueryEngine,
            Metastore,
            User
        );
        Ok(())
    }
}

#[derive(DeriveIden)]
enum User {
    Table,
    Id,
    Username,
}

#[derive(DeriveIden)]
enum Metastore {
    Table,
    Id,
    Name,
    AclControl,
}

#[derive(DeriveIden)]
enum QueryEngine {
    Table,
    Id,
    Name,
    Language,
    Executor,
    ExecutorParams,
    ProxyUserField,
    MetastoreId,
    DeletedAt,
}

#[derive(DeriveIden)]
enum QueryExecution {
    Table,
    Id,
    Query,
    EngineId,
    Uid,
    Status,
    TaskId,
    CreatedAt,
    CompletedAt,
}

#[derive(DeriveIden)]
enum StatementExecution {
    Table,
    Id,
    ExecutionId,
    StatementStart,
    StatementEnd,
    Status,
    ResultKey,
    LogKey,
    ResultRowCount,
    HasLog,
    MetaInfo,
    CreatedAt,
    CompletedAt,
}

#[derive(DeriveIden)]
enum StatementLogChunk {
    Table,
    Id,
    StatementId,
    Log,
    CreatedAt,
}

#[derive(DeriveIden)]
enum ExecutionError {
    Table,
    Id,
    ExecutionId,
    Kind,
    ExtractedMessage,
    Message,
    Line,
    Column,
    CreatedAt,
}
