use crate::execution::ExecutionId;
#[cfg(feature = "testing")]
use proptest_derive::Arbitrary;
use sea_orm::entity::prelude::*;
use sea_orm::{FromJsonQueryResult, NotSet, Set};
use serde::{Deserialize, Serialize};
use strum::Display;

pub type StatementId = i64;

/// Byte offsets `[start, end)` of one statement inside the execution's query text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatementRange {
    pub start: usize,
    pub end: usize,
}

impl StatementRange {
    pub fn new(start: usize, end: usize) -> Self {
        assert!(start <= end, "Statement range must not be inverted");
        Self { start, end }
    }

    pub fn slice<'a>(&self, query: &'a str) -> &'a str {
        &query[self.start..self.end]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, FromJsonQueryResult)]
pub struct MetaInfo {
    pub tracking_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "statement_execution")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = true)]
    pub id: StatementId,
    pub execution_id: ExecutionId,
    pub statement_start: i64,
    pub statement_end: i64,
    pub status: StatementStatus,
    pub result_key: Option<String>,
    pub log_key: Option<String>,
    pub result_row_count: i64,
    pub has_log: bool,
    #[sea_orm(column_type = "JsonBinary")]
    pub meta_info: MetaInfo,
    pub created_at: chrono::DateTime<chrono::Local>,
    pub completed_at: Option<chrono::DateTime<chrono::Local>>,
}

impl Model {
    pub fn range(&self) -> StatementRange {
        StatementRange::new(self.statement_start as usize, self.statement_end as usize)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::Entity",
        from = "Column::ExecutionId",
        to = "super::Column::Id",
        on_update = "Restrict",
        on_delete = "Cascade"
    )]
    Execution,
    #[sea_orm(has_many = "super::log_chunk::Entity")]
    LogChunk,
}

impl Related<super::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Execution.def()
    }
}

impl Related<super::log_chunk::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LogChunk.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg_attr(feature = "testing", derive(Arbitrary))]
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Display,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
)]
#[sea_orm(
    rs_type = "String",
    db_type = "Enum",
    enum_name = "statement_status",
    rename_all = "PascalCase"
)]
#[strum(serialize_all = "PascalCase")]
pub enum StatementStatus {
    #[default]
    #[sea_orm(rename = "PascalCase")]
    Running,
    #[sea_orm(rename = "PascalCase")]
    Uploading,
    #[sea_orm(rename = "PascalCase")]
    Done,
    #[sea_orm(rename = "PascalCase")]
    Error,
    #[sea_orm(rename = "PascalCase")]
    Cancel,
}

impl StatementStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StatementStatus::Done | StatementStatus::Error | StatementStatus::Cancel
        )
    }
}

#[derive(Clone, Debug)]
pub struct CreateStatement {
    pub execution_id: ExecutionId,
    pub range: StatementRange,
}

impl From<CreateStatement> for ActiveModel {
    fn from(req: CreateStatement) -> Self {
        Self {
            id: NotSet,
            execution_id: Set(req.execution_id),
            statement_start: Set(req.range.start as i64),
            statement_end: Set(req.range.end as i64),
            status: Set(StatementStatus::Running),
            result_key: Set(None),
            log_key: Set(None),
            result_row_count: Set(0),
            has_log: Set(false),
            meta_info: Set(MetaInfo::default()),
            created_at: Set(chrono::Local::now()),
            completed_at: Set(None),
        }
    }
}

/// Fields the logger persists when a statement finishes.
#[derive(Clone, Debug)]
pub struct FinishStatement {
    pub status: StatementStatus,
    pub result_key: Option<String>,
    pub log_key: Option<String>,
    pub result_row_count: i64,
    pub has_log: bool,
}

/// Fields changed by one poll tick. `None` leaves the column untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdateStatement {
    pub status: Option<StatementStatus>,
    pub meta_info: Option<MetaInfo>,
    pub has_log: Option<bool>,
}

impl UpdateStatement {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.meta_info.is_none() && self.has_log.is_none()
    }
}
