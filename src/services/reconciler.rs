//! Applies fetched gateway state to local records.
//!
//! Callers hold the per-resource lock. Each mutation is a compare-and-set on
//! the status read at the start of the call and is committed together with
//! its sync-log row; emails go out only after that commit.

use {
    crate::domain::{
        audit::{Actor, EntityType, NewSyncLogEntry},
        email::{EmailDispatcher, EmailMessage, TemplateKind},
        error::PipelineError,
        payment::{PaymentAction, PaymentRecord, PaymentStatus, PaymentUpdate},
        provider::{RemotePayment, RemotePaymentStatus, RemoteSubscription},
        store::{PaymentStore, SubscriptionStore},
        subscription::{
            ActivationSource, SubscriptionAction, SubscriptionRecord, SubscriptionStatus,
            SubscriptionUpdate,
        },
    },
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    serde_json::json,
    std::sync::Arc,
    uuid::Uuid,
};

/// What a reconciliation did. Cached verbatim under the fetched-state key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Transitioned {
        record_id: Uuid,
        from: String,
        to: String,
    },
    Resynced {
        record_id: Uuid,
    },
    BillingRecorded {
        record_id: Uuid,
    },
    Anomaly {
        record_id: Uuid,
        current: String,
        incoming: String,
    },
    Ignored {
        reason: String,
    },
}

impl ReconcileOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            Self::Transitioned { .. } => "updated",
            Self::Resynced { .. } => "unchanged",
            Self::BillingRecorded { .. } => "billing_recorded",
            Self::Anomaly { .. } => "anomaly",
            Self::Ignored { .. } => "ignored",
        }
    }

    fn concurrent(record_id: Uuid) -> Self {
        tracing::warn!(%record_id, "status changed underneath reconcile, skipping");
        Self::Ignored {
            reason: "concurrent_update".into(),
        }
    }
}

fn activation_source(actor: Actor) -> ActivationSource {
    match actor {
        Actor::Webhook => ActivationSource::Webhook,
        Actor::Sweep => ActivationSource::Sweep,
        Actor::Manual => ActivationSource::Manual,
    }
}

#[derive(Clone)]
pub struct Reconciler {
    payments: Arc<dyn PaymentStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    email: Arc<dyn EmailDispatcher>,
}

impl Reconciler {
    pub fn new(
        payments: Arc<dyn PaymentStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        email: Arc<dyn EmailDispatcher>,
    ) -> Self {
        Self {
            payments,
            subscriptions,
            email,
        }
    }

    pub async fn reload_payment(&self, id: Uuid) -> Result<PaymentRecord, PipelineError> {
        self.payments
            .get_payment(id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("payment {id}")))
    }

    pub async fn reload_subscription(&self, id: Uuid) -> Result<SubscriptionRecord, PipelineError> {
        self.subscriptions
            .get_subscription(id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("subscription {id}")))
    }

    /// Local order payment for a fetched remote payment: by remote id first,
    /// then by the reference it was created with.
    pub async fn locate_payment(
        &self,
        remote: &RemotePayment,
    ) -> Result<PaymentRecord, PipelineError> {
        if let Some(record) = self.payments.find_payment_by_remote_id(remote.id.as_str()).await? {
            return Ok(record);
        }
        if let Some(reference) = remote.external_reference.as_deref() {
            if let Some(record) = self.payments.find_payment_by_reference(reference).await? {
                return Ok(record);
            }
        }
        Err(PipelineError::NotFound(format!(
            "no local payment for remote payment {}",
            remote.id
        )))
    }

    pub async fn locate_subscription(
        &self,
        remote_id: Option<&str>,
        reference: Option<&str>,
    ) -> Result<SubscriptionRecord, PipelineError> {
        if let Some(id) = remote_id {
            if let Some(record) = self.subscriptions.find_subscription_by_remote_id(id).await? {
                return Ok(record);
            }
        }
        if let Some(reference) = reference {
            if let Some(record) = self.subscriptions.find_subscription_by_reference(reference).await? {
                return Ok(record);
            }
        }
        Err(PipelineError::NotFound(format!(
            "no local subscription for remote {remote_id:?} / reference {reference:?}"
        )))
    }

    /// Local subscription a recurring charge belongs to.
    pub async fn locate_subscription_for_payment(
        &self,
        payment: &RemotePayment,
    ) -> Result<SubscriptionRecord, PipelineError> {
        let preapproval = payment
            .subscription_id
            .as_ref()
            .map(|id| id.as_str().to_string())
            .or_else(|| {
                payment
                    .metadata
                    .get("preapproval_id")
                    .and_then(|v| v.as_str())
                    .map(String::from)
            });
        self.locate_subscription(preapproval.as_deref(), payment.external_reference.as_deref())
            .await
    }

    pub async fn reconcile_payment(
        &self,
        record: &PaymentRecord,
        remote: &RemotePayment,
        actor: Actor,
    ) -> Result<ReconcileOutcome, PipelineError> {
        let now = Utc::now();
        let incoming = PaymentStatus::from_remote(remote.status);

        match record.decide(incoming) {
            PaymentAction::SameStatus => {
                let update = PaymentUpdate {
                    id: record.id,
                    expected_status: record.status,
                    status: record.status,
                    remote_payment_id: Some(remote.id.as_str().to_string()),
                    money: None,
                    payment_method: None,
                    confirmed_at: None,
                    synced_at: now,
                    log: NewSyncLogEntry::new(
                        EntityType::Payment,
                        record.id,
                        "resynced",
                        actor,
                        json!({ "remote_status": remote.status.as_str() }),
                    ),
                };
                if !self.payments.apply_payment_update(&update).await? {
                    return Ok(ReconcileOutcome::concurrent(record.id));
                }
                Ok(ReconcileOutcome::Resynced {
                    record_id: record.id,
                })
            }
            PaymentAction::LogAnomaly { current } => {
                let update = PaymentUpdate {
                    id: record.id,
                    expected_status: current,
                    status: current,
                    remote_payment_id: None,
                    money: None,
                    payment_method: None,
                    confirmed_at: None,
                    synced_at: now,
                    log: NewSyncLogEntry::new(
                        EntityType::Payment,
                        record.id,
                        "anomaly",
                        actor,
                        json!({
                            "current_status": current.as_str(),
                            "incoming_status": incoming.as_str(),
                            "remote_status": remote.status.as_str(),
                            "remote_payment_id": remote.id.as_str(),
                        }),
                    ),
                };
                if !self.payments.apply_payment_update(&update).await? {
                    return Ok(ReconcileOutcome::concurrent(record.id));
                }
                tracing::warn!(
                    payment_id = %record.id,
                    from = %current,
                    to = %incoming,
                    "invalid payment transition, logged as anomaly"
                );
                Ok(ReconcileOutcome::Anomaly {
                    record_id: record.id,
                    current: current.as_str().into(),
                    incoming: incoming.as_str().into(),
                })
            }
            PaymentAction::Advance { old_status } => {
                let confirming = incoming == PaymentStatus::Confirmed;
                let update = PaymentUpdate {
                    id: record.id,
                    expected_status: old_status,
                    status: incoming,
                    remote_payment_id: Some(remote.id.as_str().to_string()),
                    money: confirming.then(|| remote.money.clone()),
                    payment_method: remote.payment_method.clone(),
                    confirmed_at: confirming.then(|| remote.approved_at.unwrap_or(now)),
                    synced_at: now,
                    log: NewSyncLogEntry::new(
                        EntityType::Payment,
                        record.id,
                        "status_changed",
                        actor,
                        json!({
                            "old_status": old_status.as_str(),
                            "new_status": incoming.as_str(),
                            "remote_status": remote.status.as_str(),
                        }),
                    ),
                };
                if !self.payments.apply_payment_update(&update).await? {
                    return Ok(ReconcileOutcome::concurrent(record.id));
                }
                tracing::info!(
                    payment_id = %record.id,
                    from = %old_status,
                    to = %incoming,
                    %actor,
                    "payment status changed"
                );

                let template = match incoming {
                    PaymentStatus::Confirmed => Some(TemplateKind::PaymentConfirmed),
                    PaymentStatus::Refunded => Some(TemplateKind::PaymentRefunded),
                    _ => None,
                };
                if let Some(template) = template {
                    let money = if confirming { &remote.money } else { &record.money };
                    self.notify(EmailMessage {
                        to: record.customer_email.clone(),
                        template,
                        data: json!({
                            "reference": record.reference,
                            "amount": money.amount().to_decimal(money.currency()),
                            "currency": money.currency().as_str(),
                            "payment_method": remote.payment_method,
                        }),
                    })
                    .await;
                }

                Ok(ReconcileOutcome::Transitioned {
                    record_id: record.id,
                    from: old_status.as_str().into(),
                    to: incoming.as_str().into(),
                })
            }
        }
    }

    pub async fn reconcile_subscription(
        &self,
        record: &SubscriptionRecord,
        remote: &RemoteSubscription,
        actor: Actor,
    ) -> Result<ReconcileOutcome, PipelineError> {
        let now = Utc::now();
        let incoming = SubscriptionStatus::from_remote(remote.status);

        match record.decide(incoming) {
            SubscriptionAction::SameStatus => {
                let update = SubscriptionUpdate {
                    remote_subscription_id: Some(remote.id.as_str().to_string()),
                    next_billing_at: remote.next_payment_at,
                    ..self.touch(record, now, "resynced", actor, json!({
                        "remote_status": remote.status.as_str(),
                    }))
                };
                if !self.subscriptions.apply_subscription_update(&update).await? {
                    return Ok(ReconcileOutcome::concurrent(record.id));
                }
                Ok(ReconcileOutcome::Resynced {
                    record_id: record.id,
                })
            }
            SubscriptionAction::LogAnomaly { .. } => {
                self.log_subscription_anomaly(record, remote, None, actor)
                    .await
            }
            SubscriptionAction::Advance { old_status } => {
                let activating = incoming == SubscriptionStatus::Active
                    && record.activated_at.is_none();
                let next_billing_at = if activating {
                    remote.next_payment_at.or_else(|| record.cadence.advance(now))
                } else {
                    remote.next_payment_at
                };

                let update = SubscriptionUpdate {
                    id: record.id,
                    expected_status: old_status,
                    status: incoming,
                    remote_subscription_id: Some(remote.id.as_str().to_string()),
                    activated_at: activating.then_some(now),
                    activation_source: activating.then(|| activation_source(actor)),
                    next_billing_at,
                    last_billing_at: None,
                    synced_at: now,
                    log: NewSyncLogEntry::new(
                        EntityType::Subscription,
                        record.id,
                        "status_changed",
                        actor,
                        json!({
                            "old_status": old_status.as_str(),
                            "new_status": incoming.as_str(),
                            "remote_status": remote.status.as_str(),
                        }),
                    ),
                };
                let applied = match self.subscriptions.apply_subscription_update(&update).await {
                    Ok(applied) => applied,
                    // Another active row for the same owner and plan. The rollback
                    // dropped the log row, so the anomaly is written separately.
                    Err(PipelineError::InvalidTransition(reason)) => {
                        return self
                            .log_subscription_anomaly(record, remote, Some(&reason), actor)
                            .await;
                    }
                    Err(e) => return Err(e),
                };
                if !applied {
                    return Ok(ReconcileOutcome::concurrent(record.id));
                }
                tracing::info!(
                    subscription_id = %record.id,
                    from = %old_status,
                    to = %incoming,
                    %actor,
                    "subscription status changed"
                );

                let template = match (old_status, incoming) {
                    (SubscriptionStatus::Pending, SubscriptionStatus::Active) => {
                        Some(TemplateKind::SubscriptionActivated)
                    }
                    (_, SubscriptionStatus::Cancelled) => Some(TemplateKind::SubscriptionCancelled),
                    _ => None,
                };
                if let Some(template) = template {
                    self.notify(subscription_email(record, template, next_billing_at))
                        .await;
                }

                Ok(ReconcileOutcome::Transitioned {
                    record_id: record.id,
                    from: old_status.as_str().into(),
                    to: incoming.as_str().into(),
                })
            }
        }
    }

    /// A recurring charge approved after the last recorded billing moves
    /// the billing dates forward by one cadence. Anything else is a resync.
    pub async fn reconcile_subscription_payment(
        &self,
        record: &SubscriptionRecord,
        payment: &RemotePayment,
        actor: Actor,
    ) -> Result<ReconcileOutcome, PipelineError> {
        let now = Utc::now();
        let billed_at = payment.approved_at.unwrap_or(now);
        let is_new_charge = payment.status == RemotePaymentStatus::Approved
            && !record.status.is_terminal()
            && record.last_billing_at.is_none_or(|last| billed_at > last);

        if !is_new_charge {
            let update = self.touch(record, now, "resynced", actor, json!({
                "remote_payment_id": payment.id.as_str(),
                "remote_status": payment.status.as_str(),
            }));
            if !self.subscriptions.apply_subscription_update(&update).await? {
                return Ok(ReconcileOutcome::concurrent(record.id));
            }
            return Ok(ReconcileOutcome::Resynced {
                record_id: record.id,
            });
        }

        let next_billing_at = record.cadence.advance(billed_at);
        let update = SubscriptionUpdate {
            last_billing_at: Some(billed_at),
            next_billing_at,
            ..self.touch(record, now, "billing_recorded", actor, json!({
                "remote_payment_id": payment.id.as_str(),
                "amount": payment.money.amount().minor(),
                "currency": payment.money.currency().as_str(),
                "billed_at": billed_at,
            }))
        };
        if !self.subscriptions.apply_subscription_update(&update).await? {
            return Ok(ReconcileOutcome::concurrent(record.id));
        }
        tracing::info!(
            subscription_id = %record.id,
            remote_payment_id = %payment.id,
            next_billing_at = ?next_billing_at,
            "recurring charge recorded"
        );

        self.notify(EmailMessage {
            to: record.owner_email.clone(),
            template: TemplateKind::RenewalReceipt,
            data: json!({
                "plan_id": record.plan_id,
                "reference": record.external_reference,
                "amount": payment.money.amount().to_decimal(payment.money.currency()),
                "currency": payment.money.currency().as_str(),
                "billed_at": billed_at,
                "next_billing_at": next_billing_at,
            }),
        })
        .await;

        Ok(ReconcileOutcome::BillingRecorded {
            record_id: record.id,
        })
    }

    /// Local-only transition for records the gateway cannot speak for:
    /// never created remotely, or no longer known there.
    pub async fn force_subscription_status(
        &self,
        record: &SubscriptionRecord,
        status: SubscriptionStatus,
        reason: &str,
        actor: Actor,
    ) -> Result<ReconcileOutcome, PipelineError> {
        if !record.status.can_transition_to(&status) {
            return Ok(ReconcileOutcome::Ignored {
                reason: format!("cannot move {} subscription to {status}", record.status),
            });
        }

        let update = SubscriptionUpdate {
            status,
            ..self.touch(record, Utc::now(), "status_changed", actor, json!({
                "old_status": record.status.as_str(),
                "new_status": status.as_str(),
                "reason": reason,
            }))
        };
        if !self.subscriptions.apply_subscription_update(&update).await? {
            return Ok(ReconcileOutcome::concurrent(record.id));
        }
        tracing::warn!(
            subscription_id = %record.id,
            from = %record.status,
            to = %status,
            reason,
            "subscription status forced locally"
        );

        Ok(ReconcileOutcome::Transitioned {
            record_id: record.id,
            from: record.status.as_str().into(),
            to: status.as_str().into(),
        })
    }

    /// Status-preserving update that only bumps `last_synced_at`.
    async fn log_subscription_anomaly(
        &self,
        record: &SubscriptionRecord,
        remote: &RemoteSubscription,
        reason: Option<&str>,
        actor: Actor,
    ) -> Result<ReconcileOutcome, PipelineError> {
        let incoming = SubscriptionStatus::from_remote(remote.status);
        let mut detail = json!({
            "current_status": record.status.as_str(),
            "incoming_status": incoming.as_str(),
            "remote_status": remote.status.as_str(),
            "remote_subscription_id": remote.id.as_str(),
        });
        if let Some(reason) = reason {
            detail["reason"] = json!(reason);
        }

        let update = self.touch(record, Utc::now(), "anomaly", actor, detail);
        if !self.subscriptions.apply_subscription_update(&update).await? {
            return Ok(ReconcileOutcome::concurrent(record.id));
        }
        tracing::warn!(
            subscription_id = %record.id,
            from = %record.status,
            to = %incoming,
            reason,
            "invalid subscription transition, logged as anomaly"
        );
        Ok(ReconcileOutcome::Anomaly {
            record_id: record.id,
            current: record.status.as_str().into(),
            incoming: incoming.as_str().into(),
        })
    }

    fn touch(
        &self,
        record: &SubscriptionRecord,
        now: DateTime<Utc>,
        action: &str,
        actor: Actor,
        detail: serde_json::Value,
    ) -> SubscriptionUpdate {
        SubscriptionUpdate {
            id: record.id,
            expected_status: record.status,
            status: record.status,
            remote_subscription_id: None,
            activated_at: None,
            activation_source: None,
            next_billing_at: None,
            last_billing_at: None,
            synced_at: now,
            log: NewSyncLogEntry::new(EntityType::Subscription, record.id, action, actor, detail),
        }
    }

    async fn notify(&self, message: EmailMessage) {
        if let Err(e) = self.email.send(&message).await {
            tracing::error!(
                template = ?message.template,
                to = %message.to,
                error = %e,
                "email dispatch failed"
            );
        }
    }
}

fn subscription_email(
    record: &SubscriptionRecord,
    template: TemplateKind,
    next_billing_at: Option<DateTime<Utc>>,
) -> EmailMessage {
    EmailMessage {
        to: record.owner_email.clone(),
        template,
        data: json!({
            "plan_id": record.plan_id,
            "reference": record.external_reference,
            "amount": record.pricing.effective.to_decimal(&record.currency),
            "currency": record.currency.as_str(),
            "next_billing_at": next_billing_at.or(record.next_billing_at),
        }),
    }
}
