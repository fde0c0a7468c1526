//! Error types for the SQL front end.

use sqlparser::parser::ParserError;
use thiserror::Error;

/// Result type for parsing operations.
pub type SqlResult<T> = Result<T, SqlError>;

/// Errors produced while tokenizing or parsing statement text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SqlError {
    /// The text is not a well-formed statement.
    #[error("syntax error at offset {position}: {message}")]
    Syntax {
        /// Description of what went wrong.
        message: String,
        /// Byte offset into the statement text.
        position: usize,
    },

    /// The text parses but uses SQL this engine does not execute.
    #[error("unsupported SQL: {0}")]
    Unsupported(String),

    /// The text contains no statement at all.
    #[error("empty statement")]
    Empty,
}

impl From<ParserError> for SqlError {
    fn from(err: ParserError) -> Self {
        let message = match err {
            ParserError::TokenizerError(message) | ParserError::ParserError(message) => message,
            ParserError::RecursionLimitExceeded => "expression nested too deeply".to_string(),
        };
        Self::Syntax {
            message,
            position: 0,
        }
    }
}

impl SqlError {
    /// Creates a syntax error at the given byte offset.
    pub fn syntax(message: impl Into<String>, position: usize) -> Self {
        Self::Syntax {
            message: message.into(),
            position,
        }
    }

    /// Creates an error for a construct outside the executable subset.
    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::Unsupported(what.into())
    }

    /// Returns the byte offset of the error, if known.
    #[must_use]
    pub fn position(&self) -> Option<usize> {
        match self {
            Self::Syntax { position, .. } => Some(*position),
            Self::Unsupported(_) | Self::Empty => None,
        }
    }

    /// Resolves the `at Line: L, Column C` suffix sqlparser appends to its
    /// messages into a byte offset into `text`. Messages without a
    /// location point at the end of the text.
    pub(crate) fn locate(self, text: &str) -> Self {
        let Self::Syntax { message, .. } = self else {
            return self;
        };
        match message.rsplit_once(" at Line: ") {
            Some((head, location)) => {
                let position = location
                    .split_once(", Column ")
                    .and_then(|(line, column)| {
                        Some(byte_offset(text, line.parse().ok()?, column.parse().ok()?))
                    })
                    .unwrap_or(0);
                Self::Syntax {
                    message: head.to_string(),
                    position,
                }
            }
            None => Self::Syntax {
                message,
                position: text.len(),
            },
        }
    }
}

/// Byte offset of a 1-based line and character column.
fn byte_offset(text: &str, line: usize, column: usize) -> usize {
    let mut offset = 0;
    for (n, content) in text.split_inclusive('\n').enumerate() {
        if n + 1 == line {
            return offset
                + content
                    .char_indices()
                    .nth(column.saturating_sub(1))
                    .map_or(content.len(), |(i, _)| i);
        }
        offset += content.len();
    }
    text.len()
}
