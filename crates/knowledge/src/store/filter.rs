//! Filter expressions understood by the in-memory store.
//!
//! Supports equality clauses on chunk metadata joined by `and` / `&&`:
//!
//! ```text
//! source == "handbook.pdf" and page == 3
//! ```

use crate::types::DocumentChunk;
use hrdesk_core::{AppError, AppResult};
use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq)]
enum Clause {
    Source(String),
    Path(String),
    Page(u32),
}

/// A parsed conjunction of equality clauses. Empty matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkFilter {
    clauses: Vec<Clause>,
}

fn clause_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^\s*(\w+)\s*==\s*(?:"([^"]*)"|'([^']*)'|(\d+))\s*$"#)
            .expect("Invalid filter clause regex")
    })
}

fn separator_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\s+and\s+|&&").expect("Invalid filter separator regex")
    })
}

impl ChunkFilter {
    /// Parse a filter expression. Unsupported syntax is a retrieval error.
    pub fn parse(expr: &str) -> AppResult<Self> {
        if expr.trim().is_empty() {
            return Ok(Self::default());
        }

        let clauses = separator_regex()
            .split(expr)
            .map(parse_clause)
            .collect::<AppResult<Vec<_>>>()?;

        Ok(Self { clauses })
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches(&self, chunk: &DocumentChunk) -> bool {
        self.clauses.iter().all(|clause| match clause {
            Clause::Source(value) => chunk.source == *value,
            Clause::Path(value) => chunk.path == *value,
            Clause::Page(value) => chunk.page == Some(*value),
        })
    }
}

fn parse_clause(text: &str) -> AppResult<Clause> {
    let unsupported = || AppError::Retrieval(format!("Unsupported filter clause: '{}'", text.trim()));

    let caps = clause_regex().captures(text).ok_or_else(unsupported)?;
    let field = &caps[1];
    let string_value = caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str());
    let number_value = caps.get(4).map(|m| m.as_str());

    match (field, string_value, number_value) {
        ("source", Some(value), None) => Ok(Clause::Source(value.to_string())),
        ("path", Some(value), None) => Ok(Clause::Path(value.to_string())),
        ("page", None, Some(value)) => value.parse().map(Clause::Page).map_err(|_| unsupported()),
        _ => Err(unsupported()),
    }
}
