use sea_orm::entity::prelude::*;
use sea_orm::{NotSet, Set};

pub type UserId = i64;

#[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "user")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: UserId,
    #[sea_orm(unique)]
    pub username: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Clone, Debug)]
pub struct CreateUser {
    pub username: String,
}

impl From<CreateUser> for ActiveModel {
    fn from(req: CreateUser) -> Self {
        Self {
            id: NotSet,
            username: Set(req.username),
        }
    }
}
