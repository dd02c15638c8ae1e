//! SQL statements issued by the coordinator.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error for an invalid savepoint prefix.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidNameError {
    #[error("name cannot be empty")]
    Empty,

    #[error("name too long: {0} characters (max {max})", max = SavepointPrefix::MAX_LEN)]
    TooLong(usize),

    #[error("name must start with a letter or underscore, found '{0}'")]
    InvalidStart(char),

    #[error("invalid character '{char}' at position {position}")]
    InvalidCharacter { char: char, position: usize },
}

/// A validated savepoint name prefix.
///
/// Savepoint names are spliced into SQL text, so the prefix is restricted
/// to a plain identifier:
/// - 1-48 characters
/// - ASCII letters, digits and underscores only
/// - Must start with a letter or underscore
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SavepointPrefix(String);

impl SavepointPrefix {
    /// Leaves room for a 20-digit counter inside a 64-character identifier.
    pub const MAX_LEN: usize = 48;

    pub fn new(prefix: impl Into<String>) -> Result<Self, InvalidNameError> {
        let prefix = prefix.into();
        Self::validate(&prefix)?;
        Ok(Self(prefix))
    }

    fn validate(prefix: &str) -> Result<(), InvalidNameError> {
        let Some(first) = prefix.chars().next() else {
            return Err(InvalidNameError::Empty);
        };

        if prefix.len() > Self::MAX_LEN {
            return Err(InvalidNameError::TooLong(prefix.len()));
        }

        if !first.is_ascii_alphabetic() && first != '_' {
            return Err(InvalidNameError::InvalidStart(first));
        }

        for (i, c) in prefix.chars().enumerate() {
            if !c.is_ascii_alphanumeric() && c != '_' {
                return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
            }
        }

        Ok(())
    }

    /// Name of the savepoint with the given number.
    pub fn savepoint(&self, number: u64) -> SavepointName {
        SavepointName(format!("{}{}", self.0, number))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SavepointPrefix {
    fn default() -> Self {
        Self("SP".to_string())
    }
}

impl TryFrom<String> for SavepointPrefix {
    type Error = InvalidNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SavepointPrefix> for String {
    fn from(prefix: SavepointPrefix) -> Self {
        prefix.0
    }
}

impl fmt::Display for SavepointPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A savepoint identifier such as `SP3`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SavepointName(String);

impl SavepointName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SavepointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A statement the coordinator sends to the database.
///
/// `Display` renders the SQL text, which is also what tracers and errors
/// report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Begin,
    Savepoint(SavepointName),
    ReleaseSavepoint(SavepointName),
    RollbackToSavepoint(SavepointName),
    Commit,
    Rollback,
    /// Caller-supplied SQL run against the active transaction.
    Raw(String),
}

impl Statement {
    /// True for statements that end the real transaction.
    pub fn is_finalizing(&self) -> bool {
        matches!(self, Statement::Commit | Statement::Rollback)
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Begin => write!(f, "BEGIN"),
            Statement::Savepoint(name) => write!(f, "SAVEPOINT {name}"),
            Statement::ReleaseSavepoint(name) => write!(f, "RELEASE SAVEPOINT {name}"),
            Statement::RollbackToSavepoint(name) => write!(f, "ROLLBACK TO SAVEPOINT {name}"),
            Statement::Commit => write!(f, "COMMIT"),
            Statement::Rollback => write!(f, "ROLLBACK"),
            Statement::Raw(sql) => f.write_str(sql),
        }
    }
}
