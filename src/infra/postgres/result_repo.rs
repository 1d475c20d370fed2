use {
    crate::domain::error::PipelineError,
    chrono::{DateTime, Utc},
    sqlx::PgPool,
};

pub async fn get(
    pool: &PgPool,
    key: &str,
    now: DateTime<Utc>,
) -> Result<Option<String>, PipelineError> {
    let row: Option<String> = sqlx::query_scalar(
        "SELECT result FROM idempotency_results WHERE key = $1 AND expires_at > $2",
    )
    .bind(key)
    .bind(now)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn upsert(
    pool: &PgPool,
    key: &str,
    value: &str,
    expires_at: DateTime<Utc>,
) -> Result<(), PipelineError> {
    sqlx::query(
        r#"
        INSERT INTO idempotency_results (key, result, expires_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (key) DO UPDATE
        SET result = EXCLUDED.result, expires_at = EXCLUDED.expires_at, created_at = now()
        "#,
    )
    .bind(key)
    .bind(value)
    .bind(expires_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn purge_expired(pool: &PgPool, now: DateTime<Utc>) -> Result<u64, PipelineError> {
    let result = sqlx::query("DELETE FROM idempotency_results WHERE expires_at < $1")
        .bind(now)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
