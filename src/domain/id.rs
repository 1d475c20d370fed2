use derive_more::Display;
use serde::{Deserialize, Serialize};

use super::error::PipelineError;

/// Gateway-side identifier of a payment or subscription.
///
/// Gateways hand these out as numbers or opaque strings; both are kept as
/// text. Ids end up in request paths, so anything outside `[A-Za-z0-9_-]`
/// is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(String);

impl RemoteId {
    pub fn new(id: impl Into<String>) -> Result<Self, PipelineError> {
        let id = id.into();
        let id = id.trim();
        if id.is_empty() {
            return Err(PipelineError::Validation("RemoteId cannot be empty".into()));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(PipelineError::Validation(format!(
                "RemoteId contains invalid characters: {id}"
            )));
        }
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}
