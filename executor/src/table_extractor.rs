use model::metastore::AclControl;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }
}

/// Reports the tables a statement reads or writes.
pub trait TableExtractor: Send + Sync {
    fn referenced_tables(&self, statement: &str, language: &str) -> Vec<TableRef>;
}

/// Extractor for deployments without lineage analysis. Reports no tables.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoTableExtractor;

impl TableExtractor for NoTableExtractor {
    fn referenced_tables(&self, _statement: &str, _language: &str) -> Vec<TableRef> {
        Vec::new()
    }
}

pub trait TableAcl {
    fn is_table_valid(&self, schema: &str, table: &str) -> bool;
}

impl TableAcl for AclControl {
    fn is_table_valid(&self, schema: &str, table: &str) -> bool {
        AclControl::is_table_valid(self, schema, table)
    }
}

/// First table in `tables` the ACL rejects.
pub fn first_violation<'a>(
    acl: &dyn TableAcl,
    tables: impl IntoIterator<Item = &'a TableRef>,
) -> Option<&'a TableRef> {
    tables
        .into_iter()
        .find(|t| !acl.is_table_valid(&t.schema, &t.table))
}
