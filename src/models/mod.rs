mod job;
mod job_log;
mod lead;
mod store;
mod usage;
mod verification_log;
mod workspace_config;

pub use job::*;
pub use job_log::*;
pub use lead::*;
pub use store::*;
pub use usage::*;
pub use verification_log::*;
pub use workspace_config::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Database(sqlx::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("{0}")]
    NotFound(&'static str),
    #[error("conflict")]
    Conflict,
    #[error("{0}")]
    Validation(String),
}

impl From<sqlx::Error> for Error {
    fn from(sql: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &sql
            && db_err.is_unique_violation()
        {
            return Error::Conflict;
        }
        if matches!(sql, sqlx::Error::RowNotFound) {
            return Error::NotFound("not found");
        }
        Error::Database(sql)
    }
}
