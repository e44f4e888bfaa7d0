use crate::database::State;
use crate::error::CatalogError;
use chrono::Local;
use model::engine::{self, CreateEngine, EngineId};
use model::metastore::{self, CreateMetastore, MetastoreId};
use model::user::{self, CreateUser, UserId};
use sea_orm::{ActiveModelTrait, ActiveValue, ColumnTrait, EntityTrait, QueryFilter, Set};
use std::sync::Arc;

/// Engine configurations together with the metastores and users they reference.
///
/// Read-only from the executor's point of view; writes come from administration.
pub struct EngineCatalog {
    db: State,
}

impl EngineCatalog {
    pub fn from(db: State) -> Arc<Self> {
        Arc::new(Self { db })
    }

    pub async fn create_engine(&self, req: CreateEngine) -> Result<engine::Model, CatalogError> {
        Ok(engine::ActiveModel::from(req).insert(&self.db.conn).await?)
    }

    pub async fn get_engine_by_id(&self, id: EngineId) -> Result<engine::Model, CatalogError> {
        engine::Entity::find_by_id(id)
            .one(&self.db.conn)
            .await?
            .ok_or(CatalogError::EngineNotFound(id))
    }

    pub async fn get_engine_by_name(
        &self,
        name: &str,
    ) -> Result<Option<engine::Model>, CatalogError> {
        Ok(engine::Entity::find()
            .filter(engine::Column::Name.eq(name))
            .one(&self.db.conn)
            .await?)
    }

    /// Soft-delete an engine. Archived engines refuse new executions.
    pub async fn archive_engine(&self, id: EngineId) -> Result<engine::Model, CatalogError> {
        let model = engine::ActiveModel {
            id: ActiveValue::Unchanged(id),
            deleted_at: Set(Some(Local::now())),
            ..Default::default()
        };
        model.update(&self.db.conn).await.map_err(|e| match e {
            sea_orm::DbErr::RecordNotUpdated => CatalogError::EngineNotFound(id),
            other => other.into(),
        })
    }

    pub async fn create_metastore(
        &self,
        req: CreateMetastore,
    ) -> Result<metastore::Model, CatalogError> {
        Ok(metastore::ActiveModel::from(req)
            .insert(&self.db.conn)
            .await?)
    }

    pub async fn get_metastore(&self, id: MetastoreId) -> Result<metastore::Model, CatalogError> {
        metastore::Entity::find_by_id(id)
            .one(&self.db.conn)
            .await?
            .ok_or(CatalogError::MetastoreNotFound(id))
    }

    pub async fn create_user(&self, req: CreateUser) -> Result<user::Model, CatalogError> {
        Ok(user::ActiveModel::from(req).insert(&self.db.conn).await?)
    }

    pub async fn get_user(&self, id: UserId) -> Result<user::Model, CatalogError> {
        user::Entity::find_by_id(id)
            .one(&self.db.conn)
            .await?
            .ok_or(CatalogError::UserNotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::metastore::AclControl;

    #[tokio::test]
    async fn test_create_and_archive_engine() {
        let catalog = EngineCatalog::from(State::for_test().await);
        let created = catalog
            .create_engine(
                CreateEngine::new("warehouse", "sqlite", "sqlalchemy")
                    .with_param("connection_string", "sqlite::memory:"),
            )
            .await
            .unwrap();
        assert!(!created.is_archived());
        assert_eq!(
            created.connection_params().get("connection_string"),
            Some(&serde_json::json!("sqlite::memory:"))
        );

        let by_name = catalog.get_engine_by_name("warehouse").await.unwrap();
        assert_eq!(by_name, Some(created.clone()));

        let archived = catalog.archive_engine(created.id).await.unwrap();
        assert!(archived.is_archived());
        assert_eq!(archived.name, created.name);
        assert!(catalog.get_engine_by_id(created.id).await.unwrap().is_archived());
    }

    #[tokio::test]
    async fn test_engine_names_are_unique() {
        let catalog = EngineCatalog::from(State::for_test().await);
        catalog
            .create_engine(CreateEngine::new("hive", "hive", "hive"))
            .await
            .unwrap();
        assert!(
            catalog
                .create_engine(CreateEngine::new("hive", "hive", "hive"))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_missing_rows_are_not_found() {
        let catalog = EngineCatalog::from(State::for_test().await);
        assert!(matches!(
            catalog.get_engine_by_id(7).await,
            Err(CatalogError::EngineNotFound(7))
        ));
        assert!(matches!(
            catalog.archive_engine(7).await,
            Err(CatalogError::EngineNotFound(7))
        ));
        assert!(matches!(
            catalog.get_metastore(3).await,
            Err(CatalogError::MetastoreNotFound(3))
        ));
        assert!(matches!(
            catalog.get_user(5).await,
            Err(CatalogError::UserNotFound(5))
        ));
    }

    #[tokio::test]
    async fn test_engine_with_metastore_acl() {
        let catalog = EngineCatalog::from(State::for_test().await);
        let metastore = catalog
            .create_metastore(CreateMetastore {
                name: "hms".to_string(),
                acl_control: AclControl::denylist(["secret.*"]),
            })
            .await
            .unwrap();
        let engine = catalog
            .create_engine(
                CreateEngine::new("presto", "presto", "presto").with_metastore(metastore.id),
            )
            .await
            .unwrap();
        let fetched = catalog
            .get_metastore(engine.metastore_id.unwrap())
            .await
            .unwrap();
        assert_eq!(fetched.acl_control, AclControl::denylist(["secret.*"]));
        assert!(!fetched.acl_control.is_table_valid("secret", "keys"));

        let user = catalog
            .create_user(CreateUser {
                username: "alice".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(catalog.get_user(user.id).await.unwrap().username, "alice");
    }
}
