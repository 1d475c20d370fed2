//! Deterministic external references.
//!
//! Identical creation intents collapse onto the same reference, which is what
//! lets a second "subscribe" click be recognised before anything is created at
//! the gateway. References stay human-legible: `SUB-<actor>-<plan>-<digest>`.

use {
    super::{error::PipelineError, money::Currency, money::MoneyAmount},
    sha2::{Digest, Sha256},
    std::collections::BTreeMap,
};

const DIGEST_LEN: usize = 16;
const LEGIBLE_PART_MAX: usize = 24;

/// Reserved prefix for subscription-originated references.
pub const SUBSCRIPTION_PREFIX: &str = "SUB-";
pub const ORDER_PREFIX: &str = "ORD-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Subscription,
    Order,
}

impl Namespace {
    fn tag(&self) -> &'static str {
        match self {
            Self::Subscription => "SUB",
            Self::Order => "ORD",
        }
    }
}

/// Everything that identifies one creation intent.
#[derive(Debug, Clone)]
pub struct ReferenceInput<'a> {
    pub namespace: Namespace,
    pub actor: &'a str,
    pub plan: &'a str,
    pub amount: Option<MoneyAmount>,
    pub currency: Option<Currency>,
    pub salt: Option<&'a str>,
}

pub fn generate(input: &ReferenceInput<'_>) -> Result<String, PipelineError> {
    let actor = input.actor.trim();
    let plan = input.plan.trim();
    if actor.is_empty() {
        return Err(PipelineError::Validation("reference actor cannot be empty".into()));
    }
    if plan.is_empty() {
        return Err(PipelineError::Validation("reference plan cannot be empty".into()));
    }

    // BTreeMap keeps the serialized form independent of insertion order.
    let mut fields: BTreeMap<&str, String> = BTreeMap::new();
    fields.insert("actor", actor.to_string());
    fields.insert("namespace", input.namespace.tag().to_string());
    fields.insert("plan", plan.to_string());
    if let Some(amount) = input.amount {
        fields.insert("amount", amount.minor().to_string());
    }
    if let Some(currency) = input.currency {
        fields.insert("currency", currency.as_str().to_string());
    }
    if let Some(salt) = input.salt {
        fields.insert("salt", salt.to_string());
    }

    let canonical = serde_json::to_string(&fields)?;
    let digest = hex::encode(Sha256::digest(canonical.as_bytes()));

    Ok(format!(
        "{}-{}-{}-{}",
        input.namespace.tag(),
        legible(actor),
        legible(plan),
        &digest[..DIGEST_LEN]
    ))
}

pub fn subscription_reference(
    actor: &str,
    plan: &str,
    amount: Option<MoneyAmount>,
    currency: Option<Currency>,
    salt: Option<&str>,
) -> Result<String, PipelineError> {
    generate(&ReferenceInput {
        namespace: Namespace::Subscription,
        actor,
        plan,
        amount,
        currency,
        salt,
    })
}

pub fn is_subscription_reference(reference: &str) -> bool {
    reference.starts_with(SUBSCRIPTION_PREFIX)
}

fn legible(part: &str) -> String {
    part.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(LEGIBLE_PART_MAX)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amount(v: i64) -> Option<MoneyAmount> {
        Some(MoneyAmount::new(v).unwrap())
    }

    #[test]
    fn same_input_same_reference() {
        let a = subscription_reference("user-42", "gold", amount(4990), Some(Currency::Brl), None)
            .unwrap();
        let b = subscription_reference("user-42", "gold", amount(4990), Some(Currency::Brl), None)
            .unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("SUB-user_42-gold-"));
        assert_eq!(a.len(), "SUB-user_42-gold-".len() + DIGEST_LEN);
    }

    #[test]
    fn any_field_changes_the_digest() {
        let base = subscription_reference("u1", "p1", amount(100), Some(Currency::Usd), None)
            .unwrap();
        let variants = [
            subscription_reference("u2", "p1", amount(100), Some(Currency::Usd), None),
            subscription_reference("u1", "p2", amount(100), Some(Currency::Usd), None),
            subscription_reference("u1", "p1", amount(101), Some(Currency::Usd), None),
            subscription_reference("u1", "p1", amount(100), Some(Currency::Eur), None),
            subscription_reference("u1", "p1", amount(100), Some(Currency::Usd), Some("1")),
            subscription_reference("u1", "p1", None, Some(Currency::Usd), None),
        ];
        for v in variants {
            assert_ne!(v.unwrap(), base);
        }
    }

    #[test]
    fn sanitized_prefix_does_not_cause_collisions() {
        // "a.b" and "a-b" share a legible form but not a digest.
        let x = subscription_reference("a.b", "p", None, None, None).unwrap();
        let y = subscription_reference("a-b", "p", None, None, None).unwrap();
        assert_ne!(x, y);
    }

    #[test]
    fn empty_actor_or_plan_is_rejected() {
        assert!(subscription_reference("", "p", None, None, None).is_err());
        assert!(subscription_reference("u", "  ", None, None, None).is_err());
    }

    #[test]
    fn namespaces_are_distinct() {
        let order = generate(&ReferenceInput {
            namespace: Namespace::Order,
            actor: "u",
            plan: "sku",
            amount: None,
            currency: None,
            salt: None,
        })
        .unwrap();
        assert!(order.starts_with(ORDER_PREFIX));
        assert!(!is_subscription_reference(&order));
    }
}
