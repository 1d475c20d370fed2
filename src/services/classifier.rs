use crate::domain::{
    notification::{Notification, NotificationKind},
    provider::RemotePayment,
    reference::is_subscription_reference,
};

/// Decides which reconciliation path a notification takes.
///
/// Without `fetched`, payment notifications classify as `Order`; pass the
/// fetched payment to tell a one-off order apart from a recurring charge.
pub fn classify(notification: &Notification, fetched: Option<&RemotePayment>) -> NotificationKind {
    let kind = match notification.event_type.as_deref() {
        Some("payment") => NotificationKind::Order,
        Some("subscription_preapproval" | "preapproval") => NotificationKind::SubscriptionLifecycle,
        Some("subscription_authorized_payment") => NotificationKind::SubscriptionPayment,
        _ => classify_action(notification.action.as_deref()),
    };

    match (kind, fetched) {
        (NotificationKind::Order, Some(payment)) if belongs_to_subscription(payment) => {
            NotificationKind::SubscriptionPayment
        }
        (kind, _) => kind,
    }
}

fn classify_action(action: Option<&str>) -> NotificationKind {
    match action {
        Some(a) if a.starts_with("payment.") => NotificationKind::Order,
        Some(a) if a.starts_with("subscription.") || a.starts_with("preapproval.") => {
            NotificationKind::SubscriptionLifecycle
        }
        _ => NotificationKind::Unrecognized,
    }
}

fn belongs_to_subscription(payment: &RemotePayment) -> bool {
    payment.subscription_id.is_some()
        || payment
            .metadata
            .get("preapproval_id")
            .is_some_and(|v| !v.is_null())
        || payment
            .external_reference
            .as_deref()
            .is_some_and(is_subscription_reference)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        id::RemoteId,
        money::{Currency, Money, MoneyAmount},
        notification::NotificationData,
        provider::RemotePaymentStatus,
    };

    fn notification(event_type: Option<&str>, action: Option<&str>) -> Notification {
        Notification {
            id: Some("1".into()),
            event_type: event_type.map(String::from),
            action: action.map(String::from),
            data: NotificationData { id: "42".into() },
        }
    }

    fn payment(reference: Option<&str>) -> RemotePayment {
        RemotePayment {
            id: RemoteId::new("42").unwrap(),
            status: RemotePaymentStatus::Approved,
            money: Money::new(MoneyAmount::new(100).unwrap(), Currency::Brl),
            external_reference: reference.map(String::from),
            payment_method: None,
            subscription_id: None,
            metadata: serde_json::json!({}),
            approved_at: None,
        }
    }

    #[test]
    fn envelope_type_wins_over_action() {
        let n = notification(Some("subscription_preapproval"), Some("payment.created"));
        assert_eq!(classify(&n, None), NotificationKind::SubscriptionLifecycle);
    }

    #[test]
    fn action_prefix_is_the_fallback() {
        assert_eq!(
            classify(&notification(None, Some("preapproval.updated")), None),
            NotificationKind::SubscriptionLifecycle
        );
        assert_eq!(
            classify(&notification(None, Some("payment.updated")), None),
            NotificationKind::Order
        );
        assert_eq!(
            classify(&notification(Some("merchant_order"), Some("topic.x")), None),
            NotificationKind::Unrecognized
        );
    }

    #[test]
    fn fetched_payment_reveals_recurring_charge() {
        let n = notification(Some("payment"), None);
        assert_eq!(classify(&n, Some(&payment(Some("ORD-a-b-1")))), NotificationKind::Order);
        assert_eq!(
            classify(&n, Some(&payment(Some("SUB-a-b-1")))),
            NotificationKind::SubscriptionPayment
        );

        let mut linked = payment(None);
        linked.metadata = serde_json::json!({"preapproval_id": "2c93"});
        assert_eq!(classify(&n, Some(&linked)), NotificationKind::SubscriptionPayment);
    }
}
