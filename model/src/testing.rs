//! Test utilities and proptest strategies for model types.
//!
//! This module is only available when the `testing` feature is enabled.

use crate::engine::EngineId;
use crate::execution::CreateExecution;
use crate::execution::execution_status::ExecutionStatus;
use crate::user::UserId;
use proptest::prelude::*;

prop_compose! {
    /// Strategy for a single `SELECT` statement without a trailing semicolon.
    pub fn arb_select()(
        column in proptest::string::string_regex("[a-z][a-z0-9_]{0,9}").unwrap(),
        table in proptest::string::string_regex("[a-z][a-z0-9_]{0,9}").unwrap(),
    ) -> String {
        format!("SELECT {column} FROM {table}")
    }
}

/// Strategy for a query text of 1..=`max` statements separated by `;` and newlines.
pub fn arb_multi_statement_query(max: usize) -> impl Strategy<Value = (String, Vec<String>)> {
    prop::collection::vec(arb_select(), 1..=max).prop_map(|statements| {
        let query = statements
            .iter()
            .map(|s| format!("{s};"))
            .collect::<Vec<_>>()
            .join("\n");
        (query, statements)
    })
}

prop_compose! {
    /// Strategy for generating CreateExecution requests against a fixed engine and user.
    pub fn arb_create_execution(engine_id: EngineId, uid: UserId)(
        (query, _) in arb_multi_statement_query(4),
    ) -> CreateExecution {
        CreateExecution::new(query, engine_id, uid)
    }
}

/// Strategy that generates one of the valid status paths from Initialized to a terminal status.
pub fn arb_valid_status_path() -> impl Strategy<Value = Vec<ExecutionStatus>> {
    use ExecutionStatus::*;
    prop_oneof![
        Just(vec![Initialized, Delivered, Running, Done]),
        Just(vec![Initialized, Delivered, Running, Error]),
        Just(vec![Initialized, Delivered, Running, Cancel]),
        Just(vec![Initialized, Delivered, Error]),
        Just(vec![Initialized, Delivered, Cancel]),
        Just(vec![Initialized, Error]),
        Just(vec![Initialized, Cancel]),
    ]
}
