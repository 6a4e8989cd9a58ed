use super::{
    CheckoutSession, CheckoutSessionRequest, PaymentProcessor, PaymentResult, RefundRequest,
    RefundResult,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Processor that accepts every request (local development only).
///
/// Session URLs point back at the configured success redirect so the flow can
/// be exercised without leaving the machine.
#[derive(Clone, Debug, Default)]
pub struct MockPaymentProcessor;

impl MockPaymentProcessor {
    /// Creates a new mock processor
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Creates an Arc-wrapped instance for sharing
    #[must_use]
    pub fn shared() -> Arc<dyn PaymentProcessor> {
        Arc::new(Self::new())
    }
}

impl PaymentProcessor for MockPaymentProcessor {
    fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Pin<Box<dyn Future<Output = PaymentResult<CheckoutSession>> + Send>> {
        Box::pin(async move {
            let session_id = format!("mock_cs_{}", uuid::Uuid::new_v4().simple());
            let session_url = request
                .success_url
                .replace("{CHECKOUT_SESSION_ID}", &session_id);

            tracing::info!(
                session_id = %session_id,
                event_id = %request.metadata.event_id,
                buyer = %request.metadata.buyer_id,
                amount = request.amount.minor_units(),
                "Mock checkout session opened"
            );

            Ok(CheckoutSession {
                session_id,
                session_url,
            })
        })
    }

    fn create_refund(
        &self,
        request: RefundRequest,
    ) -> Pin<Box<dyn Future<Output = PaymentResult<RefundResult>> + Send>> {
        Box::pin(async move {
            let refund_reference = format!("mock_re_{}", uuid::Uuid::new_v4().simple());

            tracing::info!(
                payment_reference = %request.payment_reference,
                refund_reference = %refund_reference,
                amount = request.amount.minor_units(),
                "Mock refund issued"
            );

            Ok(RefundResult { refund_reference })
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::payment::CheckoutMetadata;
    use crate::types::{EntryId, EventId, Money, UserId};
    use chrono::Utc;

    #[tokio::test]
    async fn test_mock_session_substitutes_session_id() {
        let processor = MockPaymentProcessor::new();
        let session = processor
            .create_checkout_session(CheckoutSessionRequest {
                item_name: "Concert".into(),
                item_description: "Live".into(),
                amount: Money::from_minor(5_000),
                currency: "usd".into(),
                application_fee: Money::from_minor(50),
                expires_at: Utc::now(),
                success_url: "http://x/tickets/purchase-success?session_id={CHECKOUT_SESSION_ID}"
                    .into(),
                cancel_url: "http://x/event/1".into(),
                metadata: CheckoutMetadata {
                    event_id: EventId::new(),
                    buyer_id: UserId::new("b"),
                    waiting_list_entry_id: EntryId::new(),
                },
                destination_account: "acct_1".into(),
            })
            .await
            .unwrap();

        assert!(session.session_id.starts_with("mock_cs_"));
        assert!(session.session_url.ends_with(&session.session_id));
    }

    #[tokio::test]
    async fn test_mock_refund_succeeds() {
        let refund = MockPaymentProcessor::new()
            .create_refund(RefundRequest {
                payment_reference: "pi_1".into(),
                destination_account: None,
                amount: Money::from_minor(100),
            })
            .await
            .unwrap();
        assert!(refund.refund_reference.starts_with("mock_re_"));
    }
}
