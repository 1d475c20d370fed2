use {crate::domain::audit::NewSyncLogEntry, crate::domain::error::PipelineError};

pub async fn insert_sync_log(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    entry: &NewSyncLogEntry,
) -> Result<(), PipelineError> {
    sqlx::query(
        r#"
        INSERT INTO sync_log (id, entity_type, entity_id, action, actor, detail)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(entry.id)
    .bind(entry.entity_type.as_str())
    .bind(entry.entity_id)
    .bind(&entry.action)
    .bind(entry.actor.as_str())
    .bind(&entry.detail)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
