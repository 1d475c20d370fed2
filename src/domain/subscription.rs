use {
    super::audit::NewSyncLogEntry,
    super::error::PipelineError,
    super::money::{Currency, MoneyAmount},
    super::provider::RemoteSubscriptionStatus,
    chrono::{DateTime, Duration, Months, Utc},
    serde::{Deserialize, Serialize},
    std::fmt,
    uuid::Uuid,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Paused,
    Cancelled,
    Expired,
    Error,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
            Self::Error => "error",
        }
    }

    /// Legal forward moves. `active ⇄ paused` is the only cycle.
    pub fn can_transition_to(&self, next: &SubscriptionStatus) -> bool {
        use SubscriptionStatus::*;
        matches!(
            (self, next),
            (Pending, Active | Paused | Cancelled | Expired | Error)
                | (Active, Paused | Cancelled | Expired | Error)
                | (Paused, Active | Cancelled | Expired | Error)
                | (Error, Cancelled | Expired)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Expired)
    }

    pub fn from_remote(remote: RemoteSubscriptionStatus) -> Self {
        match remote {
            RemoteSubscriptionStatus::Pending => Self::Pending,
            RemoteSubscriptionStatus::Authorized => Self::Active,
            RemoteSubscriptionStatus::Paused => Self::Paused,
            RemoteSubscriptionStatus::Cancelled => Self::Cancelled,
            RemoteSubscriptionStatus::Finished => Self::Expired,
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for SubscriptionStatus {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, PipelineError> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            "error" => Ok(SubscriptionStatus::Error),
            other => Err(PipelineError::Validation(format!(
                "unknown subscription status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyUnit {
    Days,
    Months,
}

impl FrequencyUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Days => "days",
            Self::Months => "months",
        }
    }
}

impl TryFrom<&str> for FrequencyUnit {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "day" | "days" => Ok(Self::Days),
            "month" | "months" => Ok(Self::Months),
            other => Err(PipelineError::Validation(format!(
                "unknown frequency unit: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BillingCadence {
    pub frequency: u32,
    pub unit: FrequencyUnit,
}

impl BillingCadence {
    pub fn new(frequency: u32, unit: FrequencyUnit) -> Result<Self, PipelineError> {
        if frequency == 0 {
            return Err(PipelineError::Validation(
                "billing frequency must be positive".into(),
            ));
        }
        Ok(Self { frequency, unit })
    }

    pub fn monthly() -> Self {
        Self {
            frequency: 1,
            unit: FrequencyUnit::Months,
        }
    }

    /// One billing period after `from`.
    pub fn advance(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.unit {
            FrequencyUnit::Days => from.checked_add_signed(Duration::days(i64::from(self.frequency))),
            FrequencyUnit::Months => from.checked_add_months(Months::new(self.frequency)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pricing {
    pub base: MoneyAmount,
    pub discount_percent: u8,
    pub effective: MoneyAmount,
}

impl Pricing {
    pub fn new(base: MoneyAmount, discount_percent: u8) -> Result<Self, PipelineError> {
        Ok(Self {
            base,
            discount_percent,
            effective: base.discounted(discount_percent)?,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivationSource {
    Webhook,
    Sweep,
    Manual,
}

impl ActivationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::Sweep => "sweep",
            Self::Manual => "manual",
        }
    }
}

impl TryFrom<&str> for ActivationSource {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "webhook" => Ok(Self::Webhook),
            "sweep" => Ok(Self::Sweep),
            "manual" => Ok(Self::Manual),
            other => Err(PipelineError::Validation(format!(
                "unknown activation source: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionAction {
    SameStatus,
    Advance { old_status: SubscriptionStatus },
    LogAnomaly { current: SubscriptionStatus },
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionRecord {
    pub id: Uuid,
    pub owner_id: String,
    pub owner_email: String,
    pub plan_id: String,
    pub remote_subscription_id: Option<String>,
    pub status: SubscriptionStatus,
    pub external_reference: String,
    pub cadence: BillingCadence,
    pub pricing: Pricing,
    pub currency: Currency,
    pub next_billing_at: Option<DateTime<Utc>>,
    pub last_billing_at: Option<DateTime<Utc>>,
    pub activated_at: Option<DateTime<Utc>>,
    pub activation_source: Option<ActivationSource>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SubscriptionRecord {
    pub fn decide(&self, incoming: SubscriptionStatus) -> SubscriptionAction {
        if incoming == self.status {
            SubscriptionAction::SameStatus
        } else if self.status.can_transition_to(&incoming) {
            SubscriptionAction::Advance {
                old_status: self.status,
            }
        } else {
            SubscriptionAction::LogAnomaly {
                current: self.status,
            }
        }
    }

    pub fn lock_name(&self) -> String {
        format!("subscription:{}", self.external_reference)
    }

    /// Whether this record blocks a new subscribe intent for the same
    /// owner and plan.
    pub fn blocks_new_intent(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match self.status {
            SubscriptionStatus::Active | SubscriptionStatus::Paused => true,
            SubscriptionStatus::Pending => {
                self.remote_subscription_id.is_some() || now - self.created_at < window
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub id: Uuid,
    pub owner_id: String,
    pub owner_email: String,
    pub plan_id: String,
    pub external_reference: String,
    pub cadence: BillingCadence,
    pub pricing: Pricing,
    pub currency: Currency,
}

/// Compare-and-set update keyed on `expected_status`. `None` fields keep
/// the stored value.
#[derive(Debug, Clone)]
pub struct SubscriptionUpdate {
    pub id: Uuid,
    pub expected_status: SubscriptionStatus,
    pub status: SubscriptionStatus,
    pub remote_subscription_id: Option<String>,
    pub activated_at: Option<DateTime<Utc>>,
    pub activation_source: Option<ActivationSource>,
    pub next_billing_at: Option<DateTime<Utc>>,
    pub last_billing_at: Option<DateTime<Utc>>,
    pub synced_at: DateTime<Utc>,
    pub log: NewSyncLogEntry,
}
