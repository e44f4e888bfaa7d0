//! Blob key layout: `{prefix}/{execution_id}/{statement_id}/{file}`.

pub const RESULT_FILE: &str = "result.csv";
pub const LOG_FILE: &str = "log.txt";

fn statement_key(prefix: &str, execution_id: i64, statement_id: i64, file: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        format!("{execution_id}/{statement_id}/{file}")
    } else {
        format!("{prefix}/{execution_id}/{statement_id}/{file}")
    }
}

pub fn result_key(prefix: &str, execution_id: i64, statement_id: i64) -> String {
    statement_key(prefix, execution_id, statement_id, RESULT_FILE)
}

pub fn log_key(prefix: &str, execution_id: i64, statement_id: i64) -> String {
    statement_key(prefix, execution_id, statement_id, LOG_FILE)
}
