//! In-process pseudo-database implementing the connection capability traits.
//!
//! Interprets the small statement subset the query tool's reference
//! scenarios exercise: `CREATE TABLE` / `DROP TABLE [IF EXISTS]`,
//! `DO $$ ... $$` blocks with `RAISE NOTICE` (including `FOR .. LOOP`
//! bodies that emit thousands of notices), and `SELECT` of a literal.
//! Notice text carries the driver-style `NOTICE:  ` prefix so responses
//! look exactly like the real tool's output.
//!
//! Notices are handed out in bounded chunks across successive polls, so the
//! executor's incremental draining path is exercised for real instead of
//! receiving everything in one shot.

use super::{
    ColumnInfo, ConnectionProvider, DatabaseConnection, ResultSet, StatementHandle,
    StatementProgress,
};
use crate::error::EngineError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Max notices delivered per poll. Large loops span several polls.
const NOTICE_CHUNK: usize = 128;

/// Interpreted outcome of one statement.
#[derive(Debug)]
struct Script {
    notices: Vec<String>,
    result: Option<ResultSet>,
    error: Option<String>,
}

/// Per-handle delivery state.
#[derive(Debug)]
struct ScriptState {
    script: Script,
    delivered: usize,
}

/// Shared state of one simulated database (table names only).
#[derive(Debug, Default)]
struct SimDatabase {
    tables: Mutex<HashSet<String>>,
}

/// Leases [`SimulatedConnection`]s. Databases are keyed by the
/// server/database pair, so two sessions against the same pair observe the
/// same tables.
pub struct SimulatorProvider {
    /// When set, only these server names accept connections; everything
    /// else fails with a connection error.
    servers: Option<HashSet<String>>,
    databases: DashMap<(String, String), Arc<SimDatabase>>,
}

impl Default for SimulatorProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatorProvider {
    /// Provider accepting any server name.
    pub fn new() -> Self {
        Self {
            servers: None,
            databases: DashMap::new(),
        }
    }

    /// Provider restricted to an allowlist of server names.
    pub fn with_servers<I, S>(servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            servers: Some(servers.into_iter().map(Into::into).collect()),
            databases: DashMap::new(),
        }
    }
}

#[async_trait]
impl ConnectionProvider for SimulatorProvider {
    async fn acquire(
        &self,
        server: &str,
        database: &str,
    ) -> Result<Arc<dyn DatabaseConnection>, EngineError> {
        if server.is_empty() || database.is_empty() {
            return Err(EngineError::Connection(
                "server and database names must not be empty".to_string(),
            ));
        }
        if let Some(allowed) = &self.servers {
            if !allowed.contains(server) {
                return Err(EngineError::Connection(format!(
                    "could not connect to server \"{}\"",
                    server
                )));
            }
        }

        let key = (server.to_string(), database.to_string());
        let db = self
            .databases
            .entry(key)
            .or_insert_with(|| Arc::new(SimDatabase::default()))
            .clone();

        Ok(Arc::new(SimulatedConnection {
            db,
            scripts: DashMap::new(),
            next_handle: AtomicU64::new(1),
            cancelled: AtomicBool::new(false),
        }))
    }
}

/// One leased connection against a [`SimulatorProvider`] database.
pub struct SimulatedConnection {
    db: Arc<SimDatabase>,
    scripts: DashMap<u64, ScriptState>,
    next_handle: AtomicU64,
    cancelled: AtomicBool,
}

#[async_trait]
impl DatabaseConnection for SimulatedConnection {
    async fn execute(&self, sql: &str) -> Result<StatementHandle, EngineError> {
        // A new statement clears any stale cancel request; a cancel only
        // ever applies to the statement in flight when it was issued.
        self.cancelled.store(false, Ordering::SeqCst);

        let script = self.interpret(sql);
        let id = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.scripts.insert(
            id,
            ScriptState {
                script,
                delivered: 0,
            },
        );
        Ok(StatementHandle::new(id))
    }

    async fn poll(&self, handle: StatementHandle) -> Result<StatementProgress, EngineError> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Ok(StatementProgress::Error {
                notices: Vec::new(),
                message: "canceling statement due to user request".to_string(),
            });
        }

        let mut state = self.scripts.get_mut(&handle.id()).ok_or_else(|| {
            EngineError::Internal(format!("unknown statement handle {}", handle))
        })?;

        let total = state.script.notices.len();
        let from = state.delivered;
        let to = (from + NOTICE_CHUNK).min(total);
        let chunk = state.script.notices[from..to].to_vec();
        state.delivered = to;

        if to < total {
            return Ok(StatementProgress::Busy { notices: chunk });
        }
        if let Some(message) = state.script.error.clone() {
            return Ok(StatementProgress::Error {
                notices: chunk,
                message,
            });
        }
        Ok(StatementProgress::Done {
            notices: chunk,
            result: state.script.result.clone(),
        })
    }

    async fn cancel(&self) -> Result<(), EngineError> {
        self.cancelled.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self, handle: StatementHandle) -> Result<(), EngineError> {
        self.scripts.remove(&handle.id());
        Ok(())
    }
}

impl SimulatedConnection {
    fn interpret(&self, sql: &str) -> Script {
        let trimmed = sql.trim().trim_end_matches(';').trim();
        if trimmed.is_empty() {
            return Script {
                notices: Vec::new(),
                result: None,
                error: None,
            };
        }

        let upper = trimmed.to_ascii_uppercase();
        if let Some(rest) = strip_keyword_prefix(trimmed, &upper, "DROP TABLE IF EXISTS") {
            return self.drop_table(rest, true);
        }
        if let Some(rest) = strip_keyword_prefix(trimmed, &upper, "DROP TABLE") {
            return self.drop_table(rest, false);
        }
        if let Some(rest) = strip_keyword_prefix(trimmed, &upper, "CREATE TABLE") {
            return self.create_table(rest);
        }
        if upper.starts_with("DO") {
            return interpret_do_block(trimmed);
        }
        if let Some(rest) = strip_keyword_prefix(trimmed, &upper, "SELECT") {
            return interpret_select(rest);
        }

        let first_token = trimmed.split_whitespace().next().unwrap_or(trimmed);
        Script {
            notices: Vec::new(),
            result: None,
            error: Some(format!("syntax error at or near \"{}\"", first_token)),
        }
    }

    fn drop_table(&self, rest: &str, if_exists: bool) -> Script {
        let name = table_name(rest);
        let existed = {
            let mut tables = match self.db.tables.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            tables.remove(&name)
        };
        if existed {
            return Script {
                notices: Vec::new(),
                result: None,
                error: None,
            };
        }
        if if_exists {
            Script {
                notices: vec![format!(
                    "NOTICE:  table \"{}\" does not exist, skipping",
                    name
                )],
                result: None,
                error: None,
            }
        } else {
            Script {
                notices: Vec::new(),
                result: None,
                error: Some(format!("table \"{}\" does not exist", name)),
            }
        }
    }

    fn create_table(&self, rest: &str) -> Script {
        let name = table_name(rest);
        let mut tables = match self.db.tables.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if tables.insert(name.clone()) {
            Script {
                notices: Vec::new(),
                result: None,
                error: None,
            }
        } else {
            Script {
                notices: Vec::new(),
                result: None,
                error: Some(format!("relation \"{}\" already exists", name)),
            }
        }
    }
}

/// Strips a leading keyword sequence, matched case-insensitively against the
/// pre-uppercased copy, returning the remainder of the original text.
fn strip_keyword_prefix<'a>(original: &'a str, upper: &str, keywords: &str) -> Option<&'a str> {
    if upper.starts_with(keywords)
        && original[keywords.len()..]
            .chars()
            .next()
            .map(|c| c.is_whitespace())
            .unwrap_or(false)
    {
        Some(original[keywords.len()..].trim_start())
    } else {
        None
    }
}

/// First identifier of the remainder, unquoted and lowercased.
fn table_name(rest: &str) -> String {
    let token = rest
        .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .next()
        .unwrap_or("");
    token.trim_matches('"').to_ascii_lowercase()
}

fn interpret_select(rest: &str) -> Script {
    let expr = rest.trim();
    let value = if let Some(literal) = quoted_literal(expr) {
        Some(serde_json::Value::String(literal))
    } else {
        expr.parse::<i64>().ok().map(|n| serde_json::json!(n))
    };

    match value {
        Some(v) => Script {
            notices: Vec::new(),
            result: Some(ResultSet {
                columns: vec![ColumnInfo::with_type("?column?", "text")],
                rows: vec![vec![v]],
            }),
            error: None,
        },
        None => Script {
            notices: Vec::new(),
            result: None,
            error: Some(format!(
                "column \"{}\" does not exist",
                expr.split_whitespace().next().unwrap_or(expr)
            )),
        },
    }
}

/// Full content of a single-quoted literal, or None if `expr` is not one.
fn quoted_literal(expr: &str) -> Option<String> {
    let inner = expr.strip_prefix('\'')?.strip_suffix('\'')?;
    Some(inner.replace("''", "'"))
}

/// Interprets a `DO $$ ... $$` body: plain `RAISE NOTICE` lines and
/// single-level `FOR i IN a..b LOOP` blocks around them.
fn interpret_do_block(stmt: &str) -> Script {
    let body = match dollar_quoted_body(stmt) {
        Some(body) => body,
        None => {
            return Script {
                notices: Vec::new(),
                result: None,
                error: Some("unterminated dollar-quoted string in DO block".to_string()),
            }
        }
    };

    let mut notices = Vec::new();
    let mut loop_range: Option<(String, i64, i64)> = None;
    let mut loop_raises: Vec<(String, Option<String>)> = Vec::new();

    for line in body.lines() {
        let line = line.trim().trim_end_matches(';').trim();
        if line.is_empty() {
            continue;
        }
        let upper = line.to_ascii_uppercase();

        if upper.starts_with("FOR ") && upper.ends_with(" LOOP") {
            loop_range = parse_for_range(line);
            loop_raises.clear();
            continue;
        }
        if upper == "END LOOP" {
            if let Some((var, from, to)) = loop_range.take() {
                for i in from..=to {
                    for (template, arg) in &loop_raises {
                        notices.push(render_notice(template, arg.as_deref(), &var, i));
                    }
                }
            }
            loop_raises.clear();
            continue;
        }
        if let Some(raise) = parse_raise_notice(line, &upper) {
            if loop_range.is_some() {
                loop_raises.push(raise);
            } else {
                let (template, arg) = raise;
                notices.push(format!("NOTICE:  {}", substitute_arg(&template, arg.as_deref())));
            }
        }
        // BEGIN / END / DECLARE and anything else procedural is ignored.
    }

    Script {
        notices,
        result: None,
        error: None,
    }
}

/// Text between the first pair of matching `$tag$` delimiters.
fn dollar_quoted_body(stmt: &str) -> Option<&str> {
    let open = stmt.find('$')?;
    let tag_end = stmt[open + 1..].find('$')? + open + 1;
    let tag = &stmt[open..=tag_end];
    let body_start = tag_end + 1;
    let close = stmt[body_start..].find(tag)? + body_start;
    Some(&stmt[body_start..close])
}

/// Parses `FOR i IN a..b LOOP` (keywords case-insensitive).
fn parse_for_range(line: &str) -> Option<(String, i64, i64)> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    // FOR <var> IN <a..b> LOOP
    if tokens.len() < 5 || !tokens[2].eq_ignore_ascii_case("in") {
        return None;
    }
    let var = tokens[1].to_string();
    let (from, to) = tokens[3].split_once("..")?;
    Some((var, from.trim().parse().ok()?, to.trim().parse().ok()?))
}

/// Parses `RAISE NOTICE '<template>'[, <arg>]` into (template, arg).
fn parse_raise_notice(line: &str, upper: &str) -> Option<(String, Option<String>)> {
    if !upper.starts_with("RAISE NOTICE") {
        return None;
    }
    let rest = line["RAISE NOTICE".len()..].trim();
    let after_quote = rest.strip_prefix('\'')?;
    let end = after_quote.find('\'')?;
    let template = after_quote[..end].to_string();
    let tail = after_quote[end + 1..].trim();
    let arg = tail
        .strip_prefix(',')
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty());
    Some((template, arg))
}

/// Renders one loop-body notice, substituting `%` with the loop variable's
/// current value when the argument names it.
fn render_notice(template: &str, arg: Option<&str>, var: &str, value: i64) -> String {
    let rendered = match arg {
        Some(a) if a.eq_ignore_ascii_case(var) => template.replacen('%', &value.to_string(), 1),
        other => substitute_arg(template, other),
    };
    format!("NOTICE:  {}", rendered)
}

/// Substitutes `%` with a literal argument when one is present.
fn substitute_arg(template: &str, arg: Option<&str>) -> String {
    match arg {
        Some(a) => template.replacen('%', a.trim_matches('\''), 1),
        None => template.to_string(),
    }
}
