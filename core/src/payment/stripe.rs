use super::{
    CheckoutSession, CheckoutSessionRequest, PaymentError, PaymentProcessor, PaymentResult,
    RefundRequest, RefundResult,
};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Stripe credentials and endpoint.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Secret API key (`sk_live_...` / `sk_test_...`)
    pub secret_key: String,
    /// API base, `https://api.stripe.com` outside of tests
    pub api_base: String,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl StripeConfig {
    /// Config against the public Stripe API
    #[must_use]
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            api_base: "https://api.stripe.com".to_string(),
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// Stripe Checkout processor using Connect destination accounts.
///
/// Sessions are created on behalf of the seller's connected account
/// (`Stripe-Account` header) with a platform application fee.
#[derive(Clone)]
pub struct StripeProcessor {
    client: Client,
    config: StripeConfig,
}

impl std::fmt::Debug for StripeProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeProcessor")
            .field("api_base", &self.config.api_base)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
}

#[derive(Deserialize)]
struct RefundResponse {
    id: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

impl StripeProcessor {
    /// Create a processor with its own HTTP client
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Transport`] if the HTTP client cannot be built
    pub fn new(config: StripeConfig) -> PaymentResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| PaymentError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn post(&self, path: &str, account: Option<&str>) -> RequestBuilder {
        let builder = self
            .client
            .post(format!("{}{path}", self.config.api_base))
            .bearer_auth(&self.config.secret_key);
        match account {
            Some(account) => builder.header("Stripe-Account", account),
            None => builder,
        }
    }
}

/// Form fields for `POST /v1/checkout/sessions`
fn session_form(request: &CheckoutSessionRequest) -> Vec<(String, String)> {
    let metadata = &request.metadata;
    vec![
        ("mode".into(), "payment".into()),
        ("payment_method_types[0]".into(), "card".into()),
        ("line_items[0][quantity]".into(), "1".into()),
        (
            "line_items[0][price_data][currency]".into(),
            request.currency.clone(),
        ),
        (
            "line_items[0][price_data][unit_amount]".into(),
            request.amount.minor_units().to_string(),
        ),
        (
            "line_items[0][price_data][product_data][name]".into(),
            request.item_name.clone(),
        ),
        (
            "line_items[0][price_data][product_data][description]".into(),
            request.item_description.clone(),
        ),
        (
            "payment_intent_data[application_fee_amount]".into(),
            request.application_fee.minor_units().to_string(),
        ),
        ("expires_at".into(), request.expires_at.timestamp().to_string()),
        ("success_url".into(), request.success_url.clone()),
        ("cancel_url".into(), request.cancel_url.clone()),
        ("metadata[eventId]".into(), metadata.event_id.to_string()),
        ("metadata[userId]".into(), metadata.buyer_id.to_string()),
        (
            "metadata[waitingListId]".into(),
            metadata.waiting_list_entry_id.to_string(),
        ),
    ]
}

/// `Idempotency-Key` for refunds. A payment is refunded at most once, so
/// repeating a refund replays the first response.
fn refund_idempotency_key(request: &RefundRequest) -> String {
    format!("refund-{}", request.payment_reference)
}

async fn read_response<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
) -> PaymentResult<T> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|e| PaymentError::InvalidResponse(e.to_string()));
    }

    let body = response.text().await.unwrap_or_default();
    let (message, kind) = serde_json::from_str::<ErrorEnvelope>(&body).map_or_else(
        |_| (body.clone(), None),
        |envelope| {
            (
                envelope.error.message.unwrap_or_default(),
                envelope.error.kind,
            )
        },
    );

    Err(match status {
        StatusCode::PAYMENT_REQUIRED => PaymentError::Declined { reason: message },
        StatusCode::TOO_MANY_REQUESTS => PaymentError::Unavailable(message),
        s if s.is_server_error() => PaymentError::Unavailable(message),
        _ if kind.as_deref() == Some("card_error") => PaymentError::Declined { reason: message },
        s => PaymentError::Rejected {
            status: s.as_u16(),
            message,
        },
    })
}

impl PaymentProcessor for StripeProcessor {
    fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Pin<Box<dyn Future<Output = PaymentResult<CheckoutSession>> + Send>> {
        let builder = self
            .post("/v1/checkout/sessions", Some(&request.destination_account))
            .form(&session_form(&request));

        Box::pin(async move {
            let response = builder
                .send()
                .await
                .map_err(|e| PaymentError::Transport(e.to_string()))?;
            let session: SessionResponse = read_response(response).await?;
            let session_url = session.url.ok_or_else(|| {
                PaymentError::InvalidResponse("checkout session has no url".to_string())
            })?;

            tracing::info!(
                session_id = %session.id,
                event_id = %request.metadata.event_id,
                buyer = %request.metadata.buyer_id,
                "Stripe checkout session created"
            );

            Ok(CheckoutSession {
                session_id: session.id,
                session_url,
            })
        })
    }

    fn create_refund(
        &self,
        request: RefundRequest,
    ) -> Pin<Box<dyn Future<Output = PaymentResult<RefundResult>> + Send>> {
        let builder = self
            .post("/v1/refunds", request.destination_account.as_deref())
            .header("Idempotency-Key", refund_idempotency_key(&request))
            .form(&[
                ("payment_intent", request.payment_reference.clone()),
                ("amount", request.amount.minor_units().to_string()),
            ]);

        Box::pin(async move {
            let response = builder
                .send()
                .await
                .map_err(|e| PaymentError::Transport(e.to_string()))?;
            let refund: RefundResponse = read_response(response).await?;

            tracing::info!(
                payment_reference = %request.payment_reference,
                refund_reference = %refund.id,
                "Stripe refund created"
            );

            Ok(RefundResult {
                refund_reference: refund.id,
            })
        })
    }
}
