use {
    derive_more::Display,
    serde::{Deserialize, Serialize},
    uuid::Uuid,
};

/// Who drove a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    #[display("webhook")]
    Webhook,
    #[display("sweep")]
    Sweep,
    #[display("manual")]
    Manual,
}

impl Actor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::Sweep => "sweep",
            Self::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Payment,
    Subscription,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Payment => "payment",
            Self::Subscription => "subscription",
        }
    }
}

/// Row for `sync_log`, written in the same transaction as the mutation it
/// describes.
#[derive(Debug, Clone, Serialize)]
pub struct NewSyncLogEntry {
    pub id: Uuid,
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub action: String,
    pub actor: Actor,
    pub detail: serde_json::Value,
}

impl NewSyncLogEntry {
    pub fn new(
        entity_type: EntityType,
        entity_id: Uuid,
        action: &str,
        actor: Actor,
        detail: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            entity_type,
            entity_id,
            action: action.to_string(),
            actor,
            detail,
        }
    }
}
