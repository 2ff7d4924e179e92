//! Split a SQL file into named queries.
//!
//! Each query is introduced by a marker comment on its own line, e.g.
//! ```sql
//! -- name: total
//! SELECT COUNT(*) FROM energy_usage;
//! ```
//! The query body runs until the next marker or the end of the file.

use log::warn;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedQuery {
    pub name: String,
    pub query: String,
}

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} is not a UTF-8 text file")]
    NotText(PathBuf),
}

enum State<'a> {
    /// Before the first marker, lines are ignored.
    Seeking,
    Body { name: &'a str, lines: Vec<&'a str> },
}

/// Return the query name if the line is a marker.
fn marker_name(line: &str) -> Option<&str> {
    let directive = line.trim().strip_prefix("--")?.trim_start();
    let name = directive.strip_prefix("name:")?.trim();
    if !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        Some(name)
    } else {
        None
    }
}

/// Parse the named queries in the order they appear.  Names are not
/// deduplicated.  Text without any marker gives an empty list.
pub fn parse(text: &str) -> Vec<NamedQuery> {
    let mut queries = Vec::new();
    let mut state = State::Seeking;
    for (i, line) in text.lines().enumerate() {
        if let Some(name) = marker_name(line) {
            if let State::Body { name: previous, lines } = state {
                queries.push(finish(previous, &lines));
            }
            state = State::Body {
                name,
                lines: Vec::new(),
            };
            continue;
        }
        if line.trim_start().starts_with("--") && line.contains("name:") {
            warn!("Line {}: ignoring malformed query marker '{}'", i + 1, line.trim());
        }
        if let State::Body { lines, .. } = &mut state {
            lines.push(line);
        }
    }
    if let State::Body { name, lines } = state {
        queries.push(finish(name, &lines));
    }
    queries
}

fn finish(name: &str, lines: &[&str]) -> NamedQuery {
    NamedQuery {
        name: name.to_string(),
        query: lines.join("\n").trim().to_string(),
    }
}

/// Read and parse a query file.  Fails only if the file can't be read as text.
pub fn parse_file(path: &Path) -> Result<Vec<NamedQuery>, FormatError> {
    let bytes = fs::read(path).map_err(|source| FormatError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let text = String::from_utf8(bytes).map_err(|_| FormatError::NotText(path.to_path_buf()))?;
    Ok(parse(&text))
}
