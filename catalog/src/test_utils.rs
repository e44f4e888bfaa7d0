use crate::Catalog;
use crate::database::State;
use model::engine::{self, CreateEngine, EngineId};
use model::user::{self, CreateUser, UserId};
use sea_orm::ConnectionTrait;
use std::future::Future;

pub const TEST_ENGINE_NAME: &str = "sqlite_local";
pub const TEST_USERNAME: &str = "tester";

/// Ids assigned to the fixtures of `seed_test_ids` in a fresh database.
pub const TEST_ENGINE_ID: EngineId = 1;
pub const TEST_UID: UserId = 1;

pub async fn seed_engine_and_user(catalog: &Catalog) -> (engine::Model, user::Model) {
    let engine = catalog
        .engine
        .create_engine(
            CreateEngine::new(TEST_ENGINE_NAME, "sqlite", "sqlalchemy")
                .with_param("connection_string", "sqlite::memory:"),
        )
        .await
        .expect("failed to seed engine");
    let user = catalog
        .engine
        .create_user(CreateUser {
            username: TEST_USERNAME.to_string(),
        })
        .await
        .expect("failed to seed user");
    (engine, user)
}

/// Run raw SQL on the catalog database, around the catalog API.
pub async fn execute_raw(catalog: &Catalog, sql: &str) {
    catalog
        .execution
        .db
        .conn
        .execute_unprepared(sql)
        .await
        .expect("raw SQL failed");
}

/// Seed the fixtures on `db` and check they received the well-known ids.
pub async fn seed_test_ids(db: &State) {
    let (catalog, _receivers) = Catalog::from(db.clone());
    let (engine, user) = seed_engine_and_user(&catalog).await;
    assert_eq!(engine.id, TEST_ENGINE_ID);
    assert_eq!(user.id, TEST_UID);
}

/// Helper function to run async property tests with a fresh in-memory database.
/// Creates a new SQLite in-memory database, runs migrations, and passes the
/// resulting State to the test function.
/// Panics are treated as test failures.
pub fn test_prop<F, Fut>(f: F)
where
    F: FnOnce(State) -> Fut,
    Fut: Future<Output = ()>,
{
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to create tokio runtime");

    rt.block_on(async {
        let db = State::for_test().await;
        f(db).await;
    });
}
