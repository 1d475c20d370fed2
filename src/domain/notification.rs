use {
    super::error::PipelineError,
    super::id::RemoteId,
    serde::{Deserialize, Deserializer, Serialize},
};

/// Inbound webhook envelope. Only a trigger: it names a resource, it never
/// carries the state we act on.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Notification {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    pub data: NotificationData,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotificationData {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
}

impl Notification {
    pub fn resource_id(&self) -> Result<RemoteId, PipelineError> {
        RemoteId::new(self.data.id.as_str())
    }

    /// Identifier used in logs when the envelope has no id of its own.
    pub fn log_id(&self) -> &str {
        self.id.as_deref().unwrap_or(self.data.id.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Order,
    SubscriptionLifecycle,
    SubscriptionPayment,
    Unrecognized,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Order => "order",
            Self::SubscriptionLifecycle => "subscription_lifecycle",
            Self::SubscriptionPayment => "subscription_payment",
            Self::Unrecognized => "unrecognized",
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Str(String),
    Int(i64),
    Uint(u64),
}

impl StringOrNumber {
    fn into_string(self) -> String {
        match self {
            Self::Str(s) => s,
            Self::Int(n) => n.to_string(),
            Self::Uint(n) => n.to_string(),
        }
    }
}

/// Gateways send ids as JSON numbers or strings interchangeably.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    StringOrNumber::deserialize(deserializer).map(StringOrNumber::into_string)
}

pub(crate) fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<StringOrNumber>::deserialize(deserializer).map(|v| v.map(StringOrNumber::into_string))
}
