/// Store error types
///
/// Persistence operations return `StoreError`, which separates the one
/// condition callers are expected to branch on — a unique-key conflict on
/// creation — from everything else the database can throw at us.
///
/// # Example
///
/// ```no_run
/// use relaymeter_shared::error::StoreError;
/// use relaymeter_shared::models::user::{User, CreateUser};
/// use sqlx::PgPool;
///
/// # async fn example(pool: PgPool, data: CreateUser) -> anyhow::Result<()> {
/// match User::create(&pool, data).await {
///     Ok(user) => println!("created {}", user.username),
///     Err(StoreError::AlreadyExists(what)) => println!("{} is taken", what),
///     Err(e) => return Err(e.into()),
/// }
/// # Ok(())
/// # }
/// ```
use thiserror::Error;

/// Store result type alias
pub type StoreResult<T> = Result<T, StoreError>;

/// Unified persistence error
#[derive(Debug, Error)]
pub enum StoreError {
    /// A row with the same natural key already exists (SQLSTATE 23505)
    #[error("{0} already exists")]
    AlreadyExists(&'static str),

    /// Any other database failure
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Checks whether a sqlx error is a Postgres unique-constraint violation.
///
/// Used by creation paths to surface a distinct "already exists" condition
/// instead of a generic database error.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}

impl StoreError {
    /// Maps a unique violation to `AlreadyExists(what)`, everything else
    /// to `Database`.
    pub fn on_create(err: sqlx::Error, what: &'static str) -> Self {
        if is_unique_violation(&err) {
            StoreError::AlreadyExists(what)
        } else {
            StoreError::Database(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_exists_display() {
        let err = StoreError::AlreadyExists("user");
        assert_eq!(err.to_string(), "user already exists");
    }

    #[test]
    fn test_non_database_error_is_not_unique_violation() {
        let err = sqlx::Error::RowNotFound;
        assert!(!is_unique_violation(&err));
    }

    #[test]
    fn test_on_create_passes_through_other_errors() {
        let err = StoreError::on_create(sqlx::Error::RowNotFound, "user");
        assert!(matches!(err, StoreError::Database(_)));
    }
}
