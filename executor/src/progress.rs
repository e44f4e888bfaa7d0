use serde::Serialize;

/// Coarse progress of a whole execution, published on a watch channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct ExecutionProgress {
    pub total_statements: usize,
    /// Zero-based index of the statement in flight.
    pub current_statement: usize,
    pub percent_complete: f64,
}

impl ExecutionProgress {
    pub fn new(total_statements: usize) -> Self {
        Self {
            total_statements,
            ..Default::default()
        }
    }

    /// Overall percentage when statement `index` reports `statement_percent`.
    pub fn at(self, index: usize, statement_percent: f64) -> Self {
        let total = self.total_statements.max(1) as f64;
        let done = index as f64 + statement_percent.clamp(0.0, 100.0) / 100.0;
        Self {
            current_statement: index,
            percent_complete: (done / total * 100.0).min(100.0),
            ..self
        }
    }

    pub fn finished(self) -> Self {
        Self {
            percent_complete: 100.0,
            ..self
        }
    }
}
