//! SQL batch splitting.
//!
//! Splits a client-submitted batch into individual statements on `;`,
//! honoring single-quoted strings, double-quoted identifiers, line and
//! block comments, and dollar-quoted bodies (`$$ ... $$`, `$tag$ ... $tag$`)
//! so procedural `DO` blocks survive intact.

use crate::error::EngineError;

/// Splits a SQL batch into trimmed, non-empty statements in submission
/// order. The trailing `;` is not part of the returned statements.
pub fn split_statements(sql: &str) -> Result<Vec<String>, EngineError> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut chars = sql.chars().peekable();

    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut in_line_comment = false;
    let mut in_block_comment = false;
    let mut dollar_tag: Option<String> = None;

    while let Some(ch) = chars.next() {
        if in_line_comment {
            if ch == '\n' {
                in_line_comment = false;
            }
            current.push(ch);
            continue;
        }

        if in_block_comment {
            if ch == '*' && chars.peek() == Some(&'/') {
                current.push(ch);
                current.push(chars.next().unwrap());
                in_block_comment = false;
                continue;
            }
            current.push(ch);
            continue;
        }

        if let Some(tag) = &dollar_tag {
            current.push(ch);
            if ch == '$' && current.ends_with(tag.as_str()) {
                dollar_tag = None;
            }
            continue;
        }

        if !in_single_quote && !in_double_quote {
            if ch == '-' && chars.peek() == Some(&'-') {
                current.push(ch);
                current.push(chars.next().unwrap());
                in_line_comment = true;
                continue;
            }
            if ch == '/' && chars.peek() == Some(&'*') {
                current.push(ch);
                current.push(chars.next().unwrap());
                in_block_comment = true;
                continue;
            }
            if ch == '$' {
                // Opening delimiter: $$ or $tag$ where tag is alphanumeric.
                let mut tag = String::from('$');
                let mut lookahead = chars.clone();
                let mut matched = false;
                while let Some(&next) = lookahead.peek() {
                    if next == '$' {
                        tag.push('$');
                        matched = true;
                        break;
                    }
                    if next.is_alphanumeric() || next == '_' {
                        tag.push(next);
                        lookahead.next();
                    } else {
                        break;
                    }
                }
                if matched {
                    for _ in 0..tag.len() - 1 {
                        chars.next();
                    }
                    current.push_str(&tag);
                    dollar_tag = Some(tag);
                    continue;
                }
            }
        }

        match ch {
            '\'' if !in_double_quote => {
                if in_single_quote && chars.peek() == Some(&'\'') {
                    // Escaped quote inside single-quoted string
                    current.push(ch);
                    current.push(chars.next().unwrap());
                    continue;
                }
                in_single_quote = !in_single_quote;
                current.push(ch);
            }
            '"' if !in_single_quote => {
                in_double_quote = !in_double_quote;
                current.push(ch);
            }
            ';' if !in_single_quote && !in_double_quote => {
                let statement = current.trim();
                if !statement.is_empty() {
                    statements.push(statement.to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    if in_single_quote {
        return Err(EngineError::Statement(
            "unterminated quoted string in batch".to_string(),
        ));
    }
    if dollar_tag.is_some() {
        return Err(EngineError::Statement(
            "unterminated dollar-quoted string in batch".to_string(),
        ));
    }

    let statement = current.trim();
    if !statement.is_empty() {
        statements.push(statement.to_string());
    }

    Ok(statements)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_plain_batch() {
        let stmts = split_statements("SELECT 1; SELECT 2;").unwrap();
        assert_eq!(stmts, vec!["SELECT 1", "SELECT 2"]);
    }

    #[test]
    fn single_statement_without_semicolon() {
        let stmts = split_statements("SELECT 'CHECKING POLLING'").unwrap();
        assert_eq!(stmts, vec!["SELECT 'CHECKING POLLING'"]);
    }

    #[test]
    fn semicolon_inside_quotes_is_not_a_separator() {
        let stmts = split_statements("SELECT 'a;b'; SELECT 2").unwrap();
        assert_eq!(stmts, vec!["SELECT 'a;b'", "SELECT 2"]);
    }

    #[test]
    fn dollar_quoted_do_block_stays_whole() {
        let sql = "DROP TABLE IF EXISTS t;\n\nDO $$\nBEGIN\n    RAISE NOTICE 'Hello, world!';\nEND $$;\n\nSELECT 'CHECKING POLLING';";
        let stmts = split_statements(sql).unwrap();
        assert_eq!(stmts.len(), 3);
        assert!(stmts[1].starts_with("DO $$"));
        assert!(stmts[1].contains("RAISE NOTICE 'Hello, world!';"));
        assert_eq!(stmts[2], "SELECT 'CHECKING POLLING'");
    }

    #[test]
    fn tagged_dollar_quotes() {
        let sql = "DO $body$ BEGIN RAISE NOTICE 'x;y'; END $body$; SELECT 1";
        let stmts = split_statements(sql).unwrap();
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].contains("'x;y'"));
    }

    #[test]
    fn comments_are_preserved_inside_statements() {
        let sql = "SELECT 1 -- trailing; not a separator\n; SELECT 2 /* block; comment */";
        let stmts = split_statements(sql).unwrap();
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].contains("-- trailing"));
        assert!(stmts[1].contains("/* block; comment */"));
    }

    #[test]
    fn unterminated_quote_is_an_error() {
        assert!(split_statements("SELECT 'oops").is_err());
        assert!(split_statements("DO $$ BEGIN END").is_err());
    }

    #[test]
    fn empty_batch_yields_no_statements() {
        assert!(split_statements("  ;  ; ").unwrap().is_empty());
    }
}
