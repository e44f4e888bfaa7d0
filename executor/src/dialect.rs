//! Per-dialect error interpretation.

use crate::cursor::ParsedError;
use crate::driver::{DriverError, DriverErrorKind};
use model::execution::execution_error::{ErrorKind, ErrorPosition};
use once_cell::sync::Lazy;
use regex::Regex;
use strum::{Display, EnumString};

static LINE_COLON_COLUMN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bline (\d+):(\d+)").expect("valid regex"));
static BRACKETED: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[(\d+):(\d+)\]").expect("valid regex"));
static AT_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bat line (\d+)").expect("valid regex"));
static UPPER_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bLINE (\d+):").expect("valid regex"));
static LINE_AT_POSITION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bline (\d+) at position (\d+)").expect("valid regex"));

/// SQL dialect family of an engine, selected from the engine's language.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Dialect {
    Hive,
    Presto,
    Trino,
    BigQuery,
    MySql,
    #[strum(serialize = "postgresql", serialize = "postgres")]
    Postgres,
    Snowflake,
    Sqlite,
    Generic,
}

impl Dialect {
    pub fn from_language(language: &str) -> Self {
        language
            .trim()
            .to_ascii_lowercase()
            .parse()
            .unwrap_or(Dialect::Generic)
    }

    fn position_pattern(&self) -> Option<&'static Regex> {
        match self {
            Dialect::Hive | Dialect::Presto | Dialect::Trino => Some(&LINE_COLON_COLUMN),
            Dialect::BigQuery => Some(&BRACKETED),
            Dialect::MySql => Some(&AT_LINE),
            Dialect::Postgres => Some(&UPPER_LINE),
            Dialect::Snowflake => Some(&LINE_AT_POSITION),
            Dialect::Sqlite | Dialect::Generic => None,
        }
    }

    /// Locate the error position in `message`, together with the text following it.
    pub fn extract_position(&self, message: &str) -> Option<(ErrorPosition, String)> {
        let captures = self.position_pattern()?.captures(message)?;
        let line = captures.get(1)?.as_str().parse().ok()?;
        let column = captures.get(2).and_then(|c| c.as_str().parse().ok());
        let tail = &message[captures.get(0)?.end()..];
        let extracted = tail
            .trim_start_matches(|c: char| c == ':' || c.is_whitespace())
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();
        Some((ErrorPosition { line, column }, extracted))
    }

    pub fn classify(&self, err: &DriverError) -> ParsedError {
        let kind = match err.kind {
            DriverErrorKind::Query => ErrorKind::Engine,
            DriverErrorKind::Connection | DriverErrorKind::Protocol | DriverErrorKind::Other => {
                ErrorKind::Internal
            }
        };
        if kind == ErrorKind::Internal {
            return ParsedError::internal(err.message.clone());
        }

        let (position, extracted) = match self.extract_position(&err.message) {
            Some((position, tail)) if !tail.is_empty() => (Some(position), Some(tail)),
            Some((position, _)) => (Some(position), first_line(&err.message)),
            None => (None, first_line(&err.message)),
        };
        ParsedError {
            kind,
            message: err.message.clone(),
            extracted,
            position,
        }
    }
}

fn first_line(message: &str) -> Option<String> {
    message
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}
