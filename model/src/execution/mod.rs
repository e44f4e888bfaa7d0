pub mod execution_error;
pub mod execution_status;
pub mod log_chunk;
pub mod statement;

use crate::IntoCondition;
use crate::engine::EngineId;
use crate::user::UserId;
use execution_status::ExecutionStatus;
use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::Condition;
use sea_orm::entity::prelude::*;

pub type ExecutionId = i64;

#[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "query_execution")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: ExecutionId,
    pub query: String,
    pub engine_id: EngineId,
    pub uid: UserId,
    pub status: ExecutionStatus,
    pub task_id: Option<String>,
    pub created_at: chrono::DateTime<chrono::Local>,
    pub completed_at: Option<chrono::DateTime<chrono::Local>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "statement::Entity")]
    Statement,
    #[sea_orm(has_one = "execution_error::Entity")]
    ExecutionError,
}

impl Related<statement::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Statement.def()
    }
}

impl Related<execution_error::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ExecutionError.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Whether the execution was submitted interactively or by a schedule.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ExecutionType {
    #[default]
    Adhoc,
    Scheduled,
}

#[derive(Clone, Debug)]
pub struct CreateExecution {
    pub query: String,
    pub engine_id: EngineId,
    pub uid: UserId,
}

impl CreateExecution {
    pub fn new(query: impl Into<String>, engine_id: EngineId, uid: UserId) -> Self {
        Self {
            query: query.into(),
            engine_id,
            uid,
        }
    }
}

impl From<CreateExecution> for ActiveModel {
    fn from(req: CreateExecution) -> Self {
        Self {
            id: NotSet,
            query: Set(req.query),
            engine_id: Set(req.engine_id),
            uid: Set(req.uid),
            status: Set(ExecutionStatus::default()),
            task_id: Set(None),
            created_at: Set(chrono::Local::now()),
            completed_at: Set(None),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CancelExecution {
    pub id: ExecutionId,
}

#[derive(Clone, Debug, Default)]
pub struct GetExecution {
    pub id: Option<ExecutionId>,
    pub engine_id: Option<EngineId>,
    pub uid: Option<UserId>,
    pub status: Option<ExecutionStatus>,
}

impl GetExecution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: ExecutionId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_engine(mut self, engine_id: EngineId) -> Self {
        self.engine_id = Some(engine_id);
        self
    }

    pub fn with_uid(mut self, uid: UserId) -> Self {
        self.uid = Some(uid);
        self
    }

    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.status = Some(status);
        self
    }
}

impl IntoCondition for GetExecution {
    fn into_condition(self) -> Condition {
        Condition::all()
            .add_option(self.id.map(|v| Column::Id.eq(v)))
            .add_option(self.engine_id.map(|v| Column::EngineId.eq(v)))
            .add_option(self.uid.map(|v| Column::Uid.eq(v)))
            .add_option(self.status.map(|v| Column::Status.eq(v)))
    }
}
