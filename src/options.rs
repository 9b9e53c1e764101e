use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::config::UnitOfWorkConfig;

/// Whether a session opens a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Begin a transaction at construction; commit and rollback reach the store.
    #[default]
    Transactional,
    /// Run every statement straight against the pool. Commit and rollback
    /// only move the session's state.
    NonTransactional,
}

impl Mode {
    pub fn is_transactional(self) -> bool {
        self == Mode::Transactional
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Transactional => f.write_str("transactional"),
            Mode::NonTransactional => f.write_str("non_transactional"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Options applied when a session begins.
///
/// Isolation level and statement timeout only apply to transactional
/// sessions; they are scoped to the transaction (`SET TRANSACTION`,
/// `SET LOCAL`) and never leak into the pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionOptions {
    pub mode: Mode,
    pub isolation_level: Option<IsolationLevel>,
    pub statement_timeout: Option<Duration>,
}

impl SessionOptions {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn transactional() -> Self {
        Self::new(Mode::Transactional)
    }

    pub fn non_transactional() -> Self {
        Self::new(Mode::NonTransactional)
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = Some(level);
        self
    }

    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }

    pub fn from_config(config: &UnitOfWorkConfig) -> Self {
        Self {
            mode: config.default_mode,
            isolation_level: config.isolation_level,
            statement_timeout: config.statement_timeout_ms.map(Duration::from_millis),
        }
    }
}
