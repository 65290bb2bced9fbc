//! Repository contracts and SQLite implementations.
//!
//! # Responsibility
//! - Define the persistence seams the ledger depends on.
//! - Isolate SQL details from sweep and completion orchestration.
//!
//! # Invariants
//! - Every marker write is a single-key conditional upsert, insert, or
//!   delete; no operation spans multiple occurrences.
//! - Read paths reject invalid persisted state instead of masking it.

use crate::db::DbError;
use crate::model::ScheduleError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod marker_repo;
pub mod sweep_run_repo;
pub mod task_repo;

pub type RepoResult<T> = Result<T, RepoError>;

/// Persistence error shared by ledger repositories.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    InvalidData(String),
    Schedule(ScheduleError),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted ledger data: {message}"),
            Self::Schedule(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::InvalidData(_) => None,
            Self::Schedule(err) => Some(err),
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<ScheduleError> for RepoError {
    fn from(value: ScheduleError) -> Self {
        Self::Schedule(value)
    }
}
