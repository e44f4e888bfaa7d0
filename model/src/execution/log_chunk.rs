use crate::execution::statement::StatementId;
use sea_orm::entity::prelude::*;
use sea_orm::{NotSet, Set};

/// Upper bound on the characters stored in one live log chunk.
pub const LOG_CHUNK_CHARS: usize = 5000;

#[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "statement_log_chunk")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = true)]
    pub id: i64,
    pub statement_id: StatementId,
    pub log: String,
    pub created_at: chrono::DateTime<chrono::Local>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::statement::Entity",
        from = "Column::StatementId",
        to = "super::statement::Column::Id",
        on_update = "Restrict",
        on_delete = "Cascade"
    )]
    Statement,
}

impl Related<super::statement::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Statement.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Clone, Debug)]
pub struct CreateLogChunk {
    pub statement_id: StatementId,
    pub log: String,
}

impl From<CreateLogChunk> for ActiveModel {
    fn from(req: CreateLogChunk) -> Self {
        Self {
            id: NotSet,
            statement_id: Set(req.statement_id),
            log: Set(req.log),
            created_at: Set(chrono::Local::now()),
        }
    }
}

/// Split `log` into pieces of at most `LOG_CHUNK_CHARS` characters, never inside a char.
pub fn split_into_chunks(log: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0;
    for ch in log.chars() {
        if count == LOG_CHUNK_CHARS {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
        current.push(ch);
        count += 1;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_log_has_no_chunks() {
        assert!(split_into_chunks("").is_empty());
    }

    #[test]
    fn chunks_are_bounded_and_lossless() {
        let log: String = "ä".repeat(LOG_CHUNK_CHARS * 2 + 17);
        let chunks = split_into_chunks(&log);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= LOG_CHUNK_CHARS));
        assert_eq!(chunks.concat(), log);
    }
}
