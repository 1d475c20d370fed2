use {
    super::is_unique_violation,
    crate::domain::error::PipelineError,
    chrono::{DateTime, Utc},
    sqlx::PgPool,
};

/// Reap locks whose holder crashed or overran its lease.
pub async fn purge_expired(pool: &PgPool, now: DateTime<Utc>) -> Result<u64, PipelineError> {
    let result = sqlx::query("DELETE FROM idempotency_locks WHERE expires_at < $1")
        .bind(now)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// The insert is the acquisition: the primary key on `name` turns a
/// concurrent second insert into a unique violation.
pub async fn try_insert(
    pool: &PgPool,
    name: &str,
    owner: &str,
    expires_at: DateTime<Utc>,
) -> Result<bool, PipelineError> {
    let insert = sqlx::query(
        r#"
        INSERT INTO idempotency_locks (name, owner, expires_at)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(name)
    .bind(owner)
    .bind(expires_at)
    .execute(pool)
    .await;

    match insert {
        Ok(_) => Ok(true),
        Err(err) if is_unique_violation(&err) => Ok(false),
        Err(err) => Err(err.into()),
    }
}

pub async fn delete(pool: &PgPool, name: &str, owner: &str) -> Result<bool, PipelineError> {
    let result = sqlx::query("DELETE FROM idempotency_locks WHERE name = $1 AND owner = $2")
        .bind(name)
        .bind(owner)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
