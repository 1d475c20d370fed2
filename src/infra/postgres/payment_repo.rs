use {
    super::{audit_repo::insert_sync_log, is_unique_violation},
    crate::domain::{
        error::PipelineError,
        money::{Currency, Money, MoneyAmount},
        payment::{NewPaymentRecord, PaymentRecord, PaymentStatus, PaymentUpdate},
    },
    chrono::{DateTime, Utc},
    sqlx::PgPool,
    uuid::Uuid,
};

const SELECT_PAYMENT: &str = r#"
    SELECT id, remote_payment_id, status, amount, currency, payment_method,
           reference, customer_email, created_at, confirmed_at, last_synced_at
    FROM payments
"#;

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    remote_payment_id: Option<String>,
    status: String,
    amount: i64,
    currency: String,
    payment_method: Option<String>,
    reference: String,
    customer_email: String,
    created_at: DateTime<Utc>,
    confirmed_at: Option<DateTime<Utc>>,
    last_synced_at: Option<DateTime<Utc>>,
}

impl TryFrom<PaymentRow> for PaymentRecord {
    type Error = PipelineError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let currency = Currency::try_from(row.currency.as_str())?;
        Ok(PaymentRecord {
            id: row.id,
            remote_payment_id: row.remote_payment_id,
            status: PaymentStatus::try_from(row.status.as_str())?,
            money: Money::new(MoneyAmount::new(row.amount)?, currency),
            payment_method: row.payment_method,
            reference: row.reference,
            customer_email: row.customer_email,
            created_at: row.created_at,
            confirmed_at: row.confirmed_at,
            last_synced_at: row.last_synced_at,
        })
    }
}

pub async fn insert_payment(
    pool: &PgPool,
    payment: &NewPaymentRecord,
) -> Result<bool, PipelineError> {
    let inserted: Option<bool> = sqlx::query_scalar(
        r#"
        INSERT INTO payments (id, status, amount, currency, reference, customer_email)
        VALUES ($1, 'pending', $2, $3, $4, $5)
        ON CONFLICT (reference) DO NOTHING
        RETURNING true
        "#,
    )
    .bind(payment.id)
    .bind(payment.money.amount().minor())
    .bind(payment.money.currency().as_str())
    .bind(&payment.reference)
    .bind(&payment.customer_email)
    .fetch_optional(pool)
    .await?;

    Ok(inserted.is_some())
}

pub async fn get_payment(pool: &PgPool, id: Uuid) -> Result<Option<PaymentRecord>, PipelineError> {
    let row: Option<PaymentRow> = sqlx::query_as(&format!("{SELECT_PAYMENT} WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.map(PaymentRecord::try_from).transpose()
}

pub async fn find_by_remote_id(
    pool: &PgPool,
    remote_id: &str,
) -> Result<Option<PaymentRecord>, PipelineError> {
    let row: Option<PaymentRow> =
        sqlx::query_as(&format!("{SELECT_PAYMENT} WHERE remote_payment_id = $1"))
            .bind(remote_id)
            .fetch_optional(pool)
            .await?;
    row.map(PaymentRecord::try_from).transpose()
}

pub async fn find_by_reference(
    pool: &PgPool,
    reference: &str,
) -> Result<Option<PaymentRecord>, PipelineError> {
    let row: Option<PaymentRow> = sqlx::query_as(&format!("{SELECT_PAYMENT} WHERE reference = $1"))
        .bind(reference)
        .fetch_optional(pool)
        .await?;
    row.map(PaymentRecord::try_from).transpose()
}

/// Compare-and-set on status plus the sync-log row, in one transaction.
/// Amount and currency only change while the row is still pending.
pub async fn apply_update(pool: &PgPool, update: &PaymentUpdate) -> Result<bool, PipelineError> {
    let mut tx = pool.begin().await?;

    let amount = update.money.as_ref().map(|m| m.amount().minor());
    let currency = update.money.as_ref().map(|m| m.currency().as_str());

    let result = sqlx::query(
        r#"
        UPDATE payments
        SET status = $3,
            remote_payment_id = COALESCE(remote_payment_id, $4),
            amount = CASE WHEN status = 'pending' AND $5::BIGINT IS NOT NULL THEN $5 ELSE amount END,
            currency = CASE WHEN status = 'pending' AND $6::TEXT IS NOT NULL THEN $6 ELSE currency END,
            payment_method = COALESCE($7, payment_method),
            confirmed_at = COALESCE(confirmed_at, $8),
            last_synced_at = $9,
            updated_at = now()
        WHERE id = $1 AND status = $2
        "#,
    )
    .bind(update.id)
    .bind(update.expected_status.as_str())
    .bind(update.status.as_str())
    .bind(update.remote_payment_id.as_deref())
    .bind(amount)
    .bind(currency)
    .bind(update.payment_method.as_deref())
    .bind(update.confirmed_at)
    .bind(update.synced_at)
    .execute(&mut *tx)
    .await;

    let result = match result {
        Ok(r) => r,
        Err(err) if is_unique_violation(&err) => {
            return Err(PipelineError::InvalidTransition(format!(
                "remote payment id {:?} already linked to another payment",
                update.remote_payment_id
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
) -> Result<Vec<PaymentRecord>, PipelineError> {
    let rows: Vec<PaymentRow> = sqlx::query_as(&format!(
        r#"{SELECT_PAYMENT}
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

    rows.into_iter().map(PaymentRecord::try_from).collect()
}
