use model::execution::statement::StatementRange;

/// Splits a query text into the byte ranges of its statements.
pub trait StatementSplitter: Send + Sync {
    fn get_statement_ranges(&self, query: &str) -> Vec<StatementRange>;
}

/// Semicolon splitter that ignores separators inside quotes and comments.
///
/// A range spans from the first to the last code character of a statement, so
/// surrounding whitespace, leading/trailing comments and the `;` are excluded.
/// Segments holding only comments or whitespace yield no range.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultSplitter;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Scan {
    Code,
    Quoted(char),
    LineComment,
    BlockComment,
}

impl StatementSplitter for DefaultSplitter {
    fn get_statement_ranges(&self, query: &str) -> Vec<StatementRange> {
        let mut ranges = Vec::new();
        let mut start: Option<usize> = None;
        let mut end = 0;
        let mut scan = Scan::Code;
        let mut chars = query.char_indices().peekable();

        while let Some((idx, ch)) = chars.next() {
            match scan {
                Scan::Code => match ch {
                    ';' => {
                        if let Some(begin) = start.take() {
                            ranges.push(StatementRange::new(begin, end));
                        }
                    }
                    '-' if matches!(chars.peek(), Some((_, '-'))) => {
                        chars.next();
                        scan = Scan::LineComment;
                    }
                    '/' if matches!(chars.peek(), Some((_, '*'))) => {
                        chars.next();
                        scan = Scan::BlockComment;
                    }
                    c if c.is_whitespace() => {}
                    c => {
                        if matches!(c, '\'' | '"' | '`') {
                            scan = Scan::Quoted(c);
                        }
                        start.get_or_insert(idx);
                        end = idx + c.len_utf8();
                    }
                },
                Scan::Quoted(quote) => {
                    end = idx + ch.len_utf8();
                    if ch == '\\' {
                        if let Some((next_idx, next)) = chars.next() {
                            end = next_idx + next.len_utf8();
                        }
                    } else if ch == quote {
                        scan = Scan::Code;
                    }
                }
                Scan::LineComment => {
                    if ch == '\n' {
                        scan = Scan::Code;
                    }
                }
                Scan::BlockComment => {
                    if ch == '*' && matches!(chars.peek(), Some((_, '/'))) {
                        chars.next();
                        scan = Scan::Code;
                    }
                }
            }
        }

        if let Some(begin) = start {
            ranges.push(StatementRange::new(begin, end));
        }
        ranges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn split(query: &str) -> Vec<&str> {
        DefaultSplitter
            .get_statement_ranges(query)
            .iter()
            .map(|r| r.slice(query))
            .collect()
    }

    #[test]
    fn splits_on_semicolons() {
        let query = "SELECT 1; SELECT 2;";
        assert_eq!(
            DefaultSplitter.get_statement_ranges(query),
            vec![StatementRange::new(0, 8), StatementRange::new(10, 18)]
        );
        assert_eq!(split("SELECT 1;\n\nSELECT 2"), vec!["SELECT 1", "SELECT 2"]);
    }

    #[test]
    fn separators_inside_quotes_are_kept() {
        assert_eq!(
            split("SELECT 'a;b', \"c;d\", `e;f`; SELECT 'it''s;'"),
            vec!["SELECT 'a;b', \"c;d\", `e;f`", "SELECT 'it''s;'"]
        );
        assert_eq!(split(r"SELECT 'a\';b'; SELECT 2"), vec![r"SELECT 'a\';b'", "SELECT 2"]);
    }

    #[test]
    fn comments_are_not_statements() {
        let query = "-- leading; comment\nSELECT 1 /* inner; */ + 1; /* only a comment; */ ; -- tail";
        assert_eq!(split(query), vec!["SELECT 1 /* inner; */ + 1"]);
    }

    #[test]
    fn empty_and_blank_queries_have_no_statements() {
        assert!(split("").is_empty());
        assert!(split("  ;\n ; -- nothing").is_empty());
    }

    #[test]
    fn multibyte_text_keeps_char_boundaries() {
        assert_eq!(split("SELECT 'ü';SELECT 'ß'"), vec!["SELECT 'ü'", "SELECT 'ß'"]);
    }

    proptest! {
        #[test]
        fn generated_queries_split_into_their_statements(
            (query, statements) in model::testing::arb_multi_statement_query(6)
        ) {
            prop_assert_eq!(split(&query), statements.iter().map(String::as_str).collect::<Vec<_>>());
        }
    }
}
