use sea_orm::entity::prelude::*;
use sea_orm::{FromJsonQueryResult, NotSet, Set};
use serde::{Deserialize, Serialize};

pub type MetastoreId = i64;

#[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "metastore")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: MetastoreId,
    #[sea_orm(unique)]
    pub name: String,
    #[sea_orm(column_type = "JsonBinary")]
    pub acl_control: AclControl,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AclType {
    Allowlist,
    #[default]
    Denylist,
}

/// Table-level access control of a metastore.
///
/// Entries are `schema.table` or `schema.*`. An empty denylist allows everything,
/// an empty allowlist allows nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct AclControl {
    #[serde(rename = "type", default)]
    pub acl_type: AclType,
    #[serde(default)]
    pub tables: Vec<String>,
}

impl AclControl {
    pub fn allowlist<I: IntoIterator<Item = S>, S: Into<String>>(tables: I) -> Self {
        Self {
            acl_type: AclType::Allowlist,
            tables: tables.into_iter().map(Into::into).collect(),
        }
    }

    pub fn denylist<I: IntoIterator<Item = S>, S: Into<String>>(tables: I) -> Self {
        Self {
            acl_type: AclType::Denylist,
            tables: tables.into_iter().map(Into::into).collect(),
        }
    }

    fn matches(&self, schema: &str, table: &str) -> bool {
        self.tables.iter().any(|entry| match entry.split_once('.') {
            Some((s, "*")) => s.eq_ignore_ascii_case(schema),
            Some((s, t)) => s.eq_ignore_ascii_case(schema) && t.eq_ignore_ascii_case(table),
            None => false,
        })
    }

    pub fn is_table_valid(&self, schema: &str, table: &str) -> bool {
        let listed = self.matches(schema, table);
        match self.acl_type {
            AclType::Allowlist => listed,
            AclType::Denylist => !listed,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CreateMetastore {
    pub name: String,
    pub acl_control: AclControl,
}

impl From<CreateMetastore> for ActiveModel {
    fn from(req: CreateMetastore) -> Self {
        Self {
            id: NotSet,
            name: Set(req.name),
            acl_control: Set(req.acl_control),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denylist_blocks_listed_tables_and_wildcards() {
        let acl = AclControl::denylist(["pii.users", "secret.*"]);
        assert!(!acl.is_table_valid("pii", "users"));
        assert!(!acl.is_table_valid("SECRET", "anything"));
        assert!(acl.is_table_valid("pii", "orders"));
        assert!(acl.is_table_valid("default", "users"));
    }

    #[test]
    fn allowlist_only_admits_listed_tables() {
        let acl = AclControl::allowlist(["default.*", "sales.orders"]);
        assert!(acl.is_table_valid("default", "t"));
        assert!(acl.is_table_valid("sales", "orders"));
        assert!(!acl.is_table_valid("sales", "refunds"));
    }

    #[test]
    fn acl_deserializes_from_json() {
        let acl: AclControl =
            serde_json::from_str(r#"{"type": "allowlist", "tables": ["a.b"]}"#).unwrap();
        assert_eq!(acl, AclControl::allowlist(["a.b"]));
        let empty: AclControl = serde_json::from_str("{}").unwrap();
        assert!(empty.is_table_valid("any", "table"));
    }
}
