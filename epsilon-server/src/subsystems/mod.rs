pub mod agent;
pub mod ask;
pub mod executor;
pub mod history;
pub mod inspector;
pub mod memory;
pub mod validator;

/// Failures that mean the store itself is gone, as opposed to a bad statement.
pub(crate) fn is_store_unavailable(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => true,
        // SQLITE_CANTOPEN / SQLITE_NOTADB
        sqlx::Error::Database(db) => matches!(db.code().as_deref(), Some("14") | Some("26")),
        _ => false,
    }
}
