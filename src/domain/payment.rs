use {
    super::audit::NewSyncLogEntry,
    super::error::PipelineError,
    super::money::Money,
    super::provider::RemotePaymentStatus,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::fmt,
    uuid::Uuid,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Confirmed,
    Cancelled,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }

    /// Lifecycle rank. Higher means further along.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Confirmed | Self::Cancelled => 1,
            Self::Refunded => 2,
        }
    }

    pub fn can_transition_to(&self, next: &PaymentStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Confirmed)
                | (Self::Pending, Self::Cancelled)
                | (Self::Confirmed, Self::Refunded)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Refunded)
    }

    pub fn from_remote(remote: RemotePaymentStatus) -> Self {
        match remote {
            RemotePaymentStatus::Approved => Self::Confirmed,
            RemotePaymentStatus::Pending
            | RemotePaymentStatus::InProcess
            | RemotePaymentStatus::Authorized => Self::Pending,
            RemotePaymentStatus::Rejected | RemotePaymentStatus::Cancelled => Self::Cancelled,
            RemotePaymentStatus::Refunded | RemotePaymentStatus::ChargedBack => Self::Refunded,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for PaymentStatus {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "cancelled" => Ok(Self::Cancelled),
            "refunded" => Ok(Self::Refunded),
            other => Err(PipelineError::Validation(format!(
                "unknown payment status: {other}"
            ))),
        }
    }
}

/// What to do with a freshly fetched status given the stored one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentAction {
    SameStatus,
    Advance { old_status: PaymentStatus },
    LogAnomaly { current: PaymentStatus },
}

/// Order payment as stored locally.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub remote_payment_id: Option<String>,
    pub status: PaymentStatus,
    pub money: Money,
    pub payment_method: Option<String>,
    pub reference: String,
    pub customer_email: String,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl PaymentRecord {
    pub fn decide(&self, incoming: PaymentStatus) -> PaymentAction {
        if incoming == self.status {
            PaymentAction::SameStatus
        } else if self.status.can_transition_to(&incoming) {
            PaymentAction::Advance {
                old_status: self.status,
            }
        } else {
            PaymentAction::LogAnomaly {
                current: self.status,
            }
        }
    }

    pub fn lock_name(&self) -> String {
        format!("payment:{}", self.reference)
    }
}

/// For INSERT. The id is generated in Rust via `Uuid::now_v7()`.
#[derive(Debug, Clone)]
pub struct NewPaymentRecord {
    pub id: Uuid,
    pub reference: String,
    pub money: Money,
    pub customer_email: String,
}

/// Compare-and-set update: applied only while the row still has
/// `expected_status`.
#[derive(Debug, Clone)]
pub struct PaymentUpdate {
    pub id: Uuid,
    pub expected_status: PaymentStatus,
    pub status: PaymentStatus,
    pub remote_payment_id: Option<String>,
    /// Only honoured while the row is still pending.
    pub money: Option<Money>,
    pub payment_method: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub synced_at: DateTime<Utc>,
    pub log: NewSyncLogEntry,
}
