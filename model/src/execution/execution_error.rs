use crate::execution::ExecutionId;
#[cfg(feature = "testing")]
use proptest_derive::Arbitrary;
use sea_orm::entity::prelude::*;
use sea_orm::{NotSet, Set};
use serde::{Deserialize, Serialize};
use strum::Display;

#[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "execution_error")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = true)]
    pub id: i64,
    #[sea_orm(unique)]
    pub execution_id: ExecutionId,
    pub kind: ErrorKind,
    pub extracted_message: Option<String>,
    pub message: String,
    pub line: Option<i32>,
    pub column: Option<i32>,
    pub created_at: chrono::DateTime<chrono::Local>,
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
}

impl Related<super::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Execution.def()
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
    enum_name = "error_kind",
    rename_all = "PascalCase"
)]
#[strum(serialize_all = "PascalCase")]
pub enum ErrorKind {
    /// Framework or connectivity fault.
    #[default]
    #[sea_orm(rename = "PascalCase")]
    Internal,
    /// The engine rejected or failed the query.
    #[sea_orm(rename = "PascalCase")]
    Engine,
    /// Wall-clock ceiling exceeded.
    #[sea_orm(rename = "PascalCase")]
    Timeout,
    /// Pre-flight check failed before any engine I/O.
    #[sea_orm(rename = "PascalCase")]
    Validation,
}

/// Position of an error inside the query text, 1-based.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPosition {
    pub line: u32,
    pub column: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct CreateExecutionError {
    pub execution_id: ExecutionId,
    pub kind: ErrorKind,
    pub message: String,
    pub extracted_message: Option<String>,
    pub position: Option<ErrorPosition>,
}

impl From<CreateExecutionError> for ActiveModel {
    fn from(req: CreateExecutionError) -> Self {
        Self {
            id: NotSet,
            execution_id: Set(req.execution_id),
            kind: Set(req.kind),
            extracted_message: Set(req.extracted_message),
            message: Set(req.message),
            line: Set(req.position.map(|p| p.line as i32)),
            column: Set(req.position.and_then(|p| p.column).map(|c| c as i32)),
            created_at: Set(chrono::Local::now()),
        }
    }
}

impl Model {
    pub fn position(&self) -> Option<ErrorPosition> {
        self.line.map(|line| ErrorPosition {
            line: line as u32,
            column: self.column.map(|c| c as u32),
        })
    }
}
