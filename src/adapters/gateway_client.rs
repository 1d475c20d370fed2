use {
    crate::domain::{
        BoxFuture,
        error::PipelineError,
        id::RemoteId,
        money::{Currency, Money, MoneyAmount},
        notification::opt_string_or_number,
        provider::{
            CreatedSubscription, PaymentGateway, RemotePayment, RemotePaymentStatus,
            RemoteSubscription, RemoteSubscriptionStatus, SubscriptionSpec,
        },
        subscription::{BillingCadence, FrequencyUnit},
    },
    chrono::{DateTime, Utc},
    reqwest::{Client, Response, StatusCode},
    serde::{Deserialize, Serialize, de::DeserializeOwned},
    std::sync::Arc,
};

/// REST client for the gateway's payments and preapproval APIs.
#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: Arc<str>,
    access_token: Arc<str>,
}

impl HttpGateway {
    pub fn new(client: Client, base_url: &str, access_token: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').into(),
            access_token: access_token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, PipelineError> {
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(&*self.access_token)
            .send()
            .await
            .map_err(transport_error)?;
        decode(path, response).await
    }

    async fn send_json<B: Serialize, T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &B,
    ) -> Result<T, PipelineError> {
        let response = self
            .client
            .request(method, self.url(path))
            .bearer_auth(&*self.access_token)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        decode(path, response).await
    }
}

fn transport_error(err: reqwest::Error) -> PipelineError {
    if err.is_decode() {
        PipelineError::GatewayDecode(err.to_string())
    } else {
        PipelineError::Transient(err.to_string())
    }
}

async fn decode<T: DeserializeOwned>(path: &str, response: Response) -> Result<T, PipelineError> {
    let status = response.status();
    if status.is_success() {
        let body = response.bytes().await.map_err(transport_error)?;
        return serde_json::from_slice(&body)
            .map_err(|e| PipelineError::GatewayDecode(format!("{path}: {e}")));
    }

    let detail = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => PipelineError::NotFound(path.to_string()),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            PipelineError::Transient(format!("{path}: {status}"))
        }
        s if s.is_server_error() => PipelineError::Transient(format!("{path}: {status}")),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            PipelineError::Configuration(format!("gateway rejected credentials for {path}"))
        }
        _ => PipelineError::GatewayDecode(format!("{path}: {status} {detail}")),
    })
}

// ── wire shapes ──

#[derive(Debug, Deserialize)]
struct PaymentBody {
    #[serde(deserialize_with = "crate::domain::notification::string_or_number")]
    id: String,
    status: String,
    transaction_amount: f64,
    currency_id: String,
    #[serde(default)]
    external_reference: Option<String>,
    #[serde(default)]
    payment_method_id: Option<String>,
    #[serde(default)]
    metadata: serde_json::Value,
    #[serde(default)]
    date_approved: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    preapproval_id: Option<String>,
    #[serde(default)]
    point_of_interaction: Option<PointOfInteraction>,
}

#[derive(Debug, Deserialize)]
struct PointOfInteraction {
    #[serde(default)]
    transaction_data: Option<TransactionData>,
}

#[derive(Debug, Deserialize)]
struct TransactionData {
    #[serde(default)]
    subscription_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PreapprovalBody {
    id: String,
    status: String,
    #[serde(default)]
    external_reference: Option<String>,
    #[serde(default)]
    next_payment_date: Option<String>,
    #[serde(default)]
    auto_recurring: Option<AutoRecurring>,
    #[serde(default)]
    init_point: Option<String>,
    #[serde(default)]
    last_modified: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct AutoRecurring {
    frequency: u32,
    frequency_type: String,
    transaction_amount: f64,
    currency_id: String,
}

#[derive(Debug, Serialize)]
struct CreatePreapproval<'a> {
    reason: &'a str,
    external_reference: &'a str,
    payer_email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    back_url: Option<&'a str>,
    auto_recurring: AutoRecurring,
    status: &'static str,
}

fn parse_time(field: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>, PipelineError> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| PipelineError::GatewayDecode(format!("{field}: {e}")))
    })
    .transpose()
}

fn decode_money(amount: f64, currency: &str) -> Result<Money, PipelineError> {
    let currency = Currency::try_from(currency)
        .map_err(|e| PipelineError::GatewayDecode(e.to_string()))?;
    let amount = MoneyAmount::from_decimal(amount, &currency)
        .map_err(|e| PipelineError::GatewayDecode(e.to_string()))?;
    Ok(Money::new(amount, currency))
}

fn remote_id(raw: &str) -> Result<RemoteId, PipelineError> {
    RemoteId::new(raw).map_err(|e| PipelineError::GatewayDecode(e.to_string()))
}

impl TryFrom<PaymentBody> for RemotePayment {
    type Error = PipelineError;

    fn try_from(body: PaymentBody) -> Result<Self, Self::Error> {
        let subscription_id = body
            .preapproval_id
            .or_else(|| {
                body.point_of_interaction
                    .and_then(|p| p.transaction_data)
                    .and_then(|t| t.subscription_id)
            })
            .map(|id| remote_id(&id))
            .transpose()?;

        Ok(RemotePayment {
            id: remote_id(&body.id)?,
            status: RemotePaymentStatus::try_from(body.status.as_str())?,
            money: decode_money(body.transaction_amount, &body.currency_id)?,
            external_reference: body.external_reference.filter(|r| !r.is_empty()),
            payment_method: body.payment_method_id,
            subscription_id,
            metadata: body.metadata,
            approved_at: parse_time("date_approved", body.date_approved.as_deref())?,
        })
    }
}

impl TryFrom<PreapprovalBody> for RemoteSubscription {
    type Error = PipelineError;

    fn try_from(body: PreapprovalBody) -> Result<Self, Self::Error> {
        let (cadence, money) = match body.auto_recurring {
            Some(recurring) => {
                let unit = FrequencyUnit::try_from(recurring.frequency_type.as_str())
                    .map_err(|e| PipelineError::GatewayDecode(e.to_string()))?;
                let cadence = BillingCadence::new(recurring.frequency, unit)
                    .map_err(|e| PipelineError::GatewayDecode(e.to_string()))?;
                let money = decode_money(recurring.transaction_amount, &recurring.currency_id)?;
                (Some(cadence), Some(money))
            }
            None => (None, None),
        };

        Ok(RemoteSubscription {
            id: remote_id(&body.id)?,
            status: RemoteSubscriptionStatus::try_from(body.status.as_str())?,
            external_reference: body.external_reference.filter(|r| !r.is_empty()),
            next_payment_at: parse_time("next_payment_date", body.next_payment_date.as_deref())?,
            cadence,
            money,
            last_modified: parse_time("last_modified", body.last_modified.as_deref())?,
        })
    }
}

impl PaymentGateway for HttpGateway {
    fn get_payment<'a>(
        &'a self,
        id: &'a RemoteId,
    ) -> BoxFuture<'a, Result<RemotePayment, PipelineError>> {
        Box::pin(async move {
            let body: PaymentBody = self.get_json(&format!("/v1/payments/{id}")).await?;
            RemotePayment::try_from(body)
        })
    }

    fn get_subscription<'a>(
        &'a self,
        id: &'a RemoteId,
    ) -> BoxFuture<'a, Result<RemoteSubscription, PipelineError>> {
        Box::pin(async move {
            let body: PreapprovalBody = self.get_json(&format!("/preapproval/{id}")).await?;
            RemoteSubscription::try_from(body)
        })
    }

    fn create_subscription<'a>(
        &'a self,
        spec: &'a SubscriptionSpec,
    ) -> BoxFuture<'a, Result<CreatedSubscription, PipelineError>> {
        Box::pin(async move {
            let request = CreatePreapproval {
                reason: &spec.reason,
                external_reference: &spec.external_reference,
                payer_email: &spec.payer_email,
                back_url: spec.back_url.as_deref(),
                auto_recurring: AutoRecurring {
                    frequency: spec.cadence.frequency,
                    frequency_type: spec.cadence.unit.as_str().to_string(),
                    transaction_amount: spec.money.amount().to_decimal(spec.money.currency()),
                    currency_id: spec.money.currency().as_str().to_string(),
                },
                status: "pending",
            };
            let body: PreapprovalBody = self
                .send_json(reqwest::Method::POST, "/preapproval", &request)
                .await?;
            Ok(CreatedSubscription {
                id: remote_id(&body.id)?,
                init_point: body.init_point,
            })
        })
    }

    fn cancel_subscription<'a>(
        &'a self,
        id: &'a RemoteId,
    ) -> BoxFuture<'a, Result<RemoteSubscription, PipelineError>> {
        Box::pin(async move {
            let body: PreapprovalBody = self
                .send_json(
                    reqwest::Method::PUT,
                    &format!("/preapproval/{id}"),
                    &serde_json::json!({ "status": "cancelled" }),
                )
                .await?;
            RemoteSubscription::try_from(body)
        })
    }
}
