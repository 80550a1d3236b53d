/// Database models for relaymeter
///
/// This module contains all database models and their operations. Each
/// model owns the SQL it needs as inherent async methods taking a
/// `&PgPool`.
///
/// # Example
///
/// ```no_run
/// use relaymeter_shared::models::user::{User, UserStatus};
/// use sqlx::PgPool;
///
/// # async fn example(pool: PgPool) -> Result<(), sqlx::Error> {
/// let active = User::list_by_status(&pool, UserStatus::Active).await?;
/// println!("{} active users", active.len());
/// # Ok(())
/// # }
/// ```
pub mod admin;
pub mod next_plan;
pub mod node;
pub mod reminder;
pub mod usage;
pub mod user;
