use {
    super::{audit_repo::insert_sync_log, is_unique_violation},
    crate::domain::{
        error::PipelineError,
        money::{Currency, MoneyAmount},
        subscription::{
            ActivationSource, BillingCadence, FrequencyUnit, NewSubscription, Pricing,
            SubscriptionRecord, SubscriptionStatus, SubscriptionUpdate,
        },
    },
    chrono::{DateTime, Utc},
    sqlx::PgPool,
    uuid::Uuid,
};

const SELECT_SUBSCRIPTION: &str = r#"
    SELECT id, owner_id, owner_email, plan_id, remote_subscription_id, status,
           external_reference, frequency, frequency_unit, base_price, discount_percent,
           effective_price, currency, next_billing_at, last_billing_at, activated_at,
           activation_source, last_synced_at, created_at
    FROM subscriptions
"#;

#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    owner_id: String,
    owner_email: String,
    plan_id: String,
    remote_subscription_id: Option<String>,
    status: String,
    external_reference: String,
    frequency: i32,
    frequency_unit: String,
    base_price: i64,
    discount_percent: i16,
    effective_price: i64,
    currency: String,
    next_billing_at: Option<DateTime<Utc>>,
    last_billing_at: Option<DateTime<Utc>>,
    activated_at: Option<DateTime<Utc>>,
    activation_source: Option<String>,
    last_synced_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for SubscriptionRecord {
    type Error = PipelineError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let frequency = u32::try_from(row.frequency)
            .map_err(|_| PipelineError::Validation(format!("bad frequency: {}", row.frequency)))?;
        let discount_percent = u8::try_from(row.discount_percent).map_err(|_| {
            PipelineError::Validation(format!("bad discount: {}", row.discount_percent))
        })?;

        Ok(SubscriptionRecord {
            id: row.id,
            owner_id: row.owner_id,
            owner_email: row.owner_email,
            plan_id: row.plan_id,
            remote_subscription_id: row.remote_subscription_id,
            status: SubscriptionStatus::try_from(row.status.as_str())?,
            external_reference: row.external_reference,
            cadence: BillingCadence::new(frequency, FrequencyUnit::try_from(row.frequency_unit.as_str())?)?,
            pricing: Pricing {
                base: MoneyAmount::new(row.base_price)?,
                discount_percent,
                effective: MoneyAmount::new(row.effective_price)?,
            },
            currency: Currency::try_from(row.currency.as_str())?,
            next_billing_at: row.next_billing_at,
            last_billing_at: row.last_billing_at,
            activated_at: row.activated_at,
            activation_source: row
                .activation_source
                .as_deref()
                .map(ActivationSource::try_from)
                .transpose()?,
            last_synced_at: row.last_synced_at,
            created_at: row.created_at,
        })
    }
}

pub async fn insert_subscription(
    pool: &PgPool,
    sub: &NewSubscription,
) -> Result<bool, PipelineError> {
    let frequency = i32::try_from(sub.cadence.frequency)
        .map_err(|_| PipelineError::Validation("frequency exceeds storage capacity".into()))?;

    let inserted: Option<bool> = sqlx::query_scalar(
        r#"
        INSERT INTO subscriptions
            (id, owner_id, owner_email, plan_id, status, external_reference,
             frequency, frequency_unit, base_price, discount_percent, effective_price, currency)
        VALUES ($1, $2, $3, $4, 'pending', $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (external_reference) DO NOTHING
        RETURNING true
        "#,
    )
    .bind(sub.id)
    .bind(&sub.owner_id)
    .bind(&sub.owner_email)
    .bind(&sub.plan_id)
    .bind(&sub.external_reference)
    .bind(frequency)
    .bind(sub.cadence.unit.as_str())
    .bind(sub.pricing.base.minor())
    .bind(i16::from(sub.pricing.discount_percent))
    .bind(sub.pricing.effective.minor())
    .bind(sub.currency.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(inserted.is_some())
}

pub async fn get_subscription(
    pool: &PgPool,
    id: Uuid,
) -> Result<Option<SubscriptionRecord>, PipelineError> {
    let row: Option<SubscriptionRow> =
        sqlx::query_as(&format!("{SELECT_SUBSCRIPTION} WHERE id = $1"))
            .bind(id)
            .fetch_optional(pool)
            .await?;
    row.map(SubscriptionRecord::try_from).transpose()
}

pub async fn find_by_remote_id(
    pool: &PgPool,
    remote_id: &str,
) -> Result<Option<SubscriptionRecord>, PipelineError> {
    let row: Option<SubscriptionRow> =
        sqlx::query_as(&format!("{SELECT_SUBSCRIPTION} WHERE remote_subscription_id = $1"))
            .bind(remote_id)
            .fetch_optional(pool)
            .await?;
    row.map(SubscriptionRecord::try_from).transpose()
}

pub async fn find_by_reference(
    pool: &PgPool,
    reference: &str,
) -> Result<Option<SubscriptionRecord>, PipelineError> {
    let row: Option<SubscriptionRow> =
        sqlx::query_as(&format!("{SELECT_SUBSCRIPTION} WHERE external_reference = $1"))
            .bind(reference)
            .fetch_optional(pool)
            .await?;
    row.map(SubscriptionRecord::try_from).transpose()
}

pub async fn latest_for(
    pool: &PgPool,
    owner_id: &str,
    plan_id: &str,
) -> Result<Option<SubscriptionRecord>, PipelineError> {
    let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
        "{SELECT_SUBSCRIPTION} WHERE owner_id = $1 AND plan_id = $2 ORDER BY created_at DESC, id DESC LIMIT 1"
    ))
    .bind(owner_id)
    .bind(plan_id)
    .fetch_optional(pool)
    .await?;
    row.map(SubscriptionRecord::try_from).transpose()
}

/// Compare-and-set on status plus the sync-log row, in one transaction.
/// The partial unique index on active rows rejects a second activation
/// for the same owner and plan.
pub async fn apply_update(
    pool: &PgPool,
    update: &SubscriptionUpdate,
) -> Result<bool, PipelineError> {
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        r#"
        UPDATE subscriptions
        SET status = $3,
            remote_subscription_id = COALESCE(remote_subscription_id, $4),
            activated_at = COALESCE(activated_at, $5),
            activation_source = COALESCE(activation_source, $6),
            next_billing_at = COALESCE($7, next_billing_at),
            last_billing_at = COALESCE($8, last_billing_at),
            last_synced_at = $9,
            updated_at = now()
        WHERE id = $1 AND status = $2
        "#,
    )
    .bind(update.id)
    .bind(update.expected_status.as_str())
    .bind(update.status.as_str())
    .bind(update.remote_subscription_id.as_deref())
    .bind(update.activated_at)
    .bind(update.activation_source.map(|s| s.as_str()))
    .bind(update.next_billing_at)
    .bind(update.last_billing_at)
    .bind(update.synced_at)
    .execute(&mut *tx)
    .await;

    let result = match result {
        Ok(r) => r,
        Err(err) if is_unique_violation(&err) => {
            return Err(PipelineError::InvalidTransition(format!(
                "subscription {} conflicts with an existing active subscription or remote id",
                update.id
            )));
        }
        Err(err) => return Err(err.into()),
    };

    if result.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    insert_sync_log(&mut tx, &update.log).await?;
    tx.commit().await?;
    Ok(true)
}

pub async fn list_stale(
    pool: &PgPool,
    older_than: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<SubscriptionRecord>, PipelineError> {
    let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
        r#"{SELECT_SUBSCRIPTION}
        WHERE status = 'pending'
          AND created_at < $1
          AND (last_synced_at IS NULL OR last_synced_at < $1)
        ORDER BY created_at
        LIMIT $2"#
    ))
    .bind(older_than)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(SubscriptionRecord::try_from).collect()
}
