use crate::metastore::MetastoreId;
use sea_orm::entity::prelude::*;
use sea_orm::{NotSet, Set};
use serde_json::{Map, Value};

pub type EngineId = i64;

/// Connection parameters handed to an engine driver.
pub type ConnectionParams = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "query_engine")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: EngineId,
    #[sea_orm(unique)]
    pub name: String,
    /// SQL dialect, e.g. `hive`, `presto`, `sqlite`.
    pub language: String,
    /// Registered executor name, e.g. `hive` or `sqlalchemy`.
    pub executor: String,
    pub executor_params: Json,
    /// Connection parameter that receives the submitter's username.
    pub proxy_user_field: Option<String>,
    pub metastore_id: Option<MetastoreId>,
    pub deleted_at: Option<chrono::DateTime<chrono::Local>>,
}

impl Model {
    pub fn is_archived(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn connection_params(&self) -> ConnectionParams {
        match &self.executor_params {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "crate::metastore::Entity",
        from = "Column::MetastoreId",
        to = "crate::metastore::Column::Id",
        on_update = "Restrict",
        on_delete = "SetNull"
    )]
    Metastore,
}

impl Related<crate::metastore::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Metastore.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Clone, Debug)]
pub struct CreateEngine {
    pub name: String,
    pub language: String,
    pub executor: String,
    pub executor_params: ConnectionParams,
    pub proxy_user_field: Option<String>,
    pub metastore_id: Option<MetastoreId>,
}

impl CreateEngine {
    pub fn new(
        name: impl Into<String>,
        language: impl Into<String>,
        executor: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            language: language.into(),
            executor: executor.into(),
            executor_params: ConnectionParams::new(),
            proxy_user_field: None,
            metastore_id: None,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.executor_params.insert(key.into(), value.into());
        self
    }

    pub fn with_proxy_user_field(mut self, field: impl Into<String>) -> Self {
        self.proxy_user_field = Some(field.into());
        self
    }

    pub fn with_metastore(mut self, metastore_id: MetastoreId) -> Self {
        self.metastore_id = Some(metastore_id);
        self
    }
}

impl From<CreateEngine> for ActiveModel {
    fn from(req: CreateEngine) -> Self {
        Self {
            id: NotSet,
            name: Set(req.name),
            language: Set(req.language),
            executor: Set(req.executor),
            executor_params: Set(Value::Object(req.executor_params)),
            proxy_user_field: Set(req.proxy_user_field),
            metastore_id: Set(req.metastore_id),
            deleted_at: Set(None),
        }
    }
}
