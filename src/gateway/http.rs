use super::{AuthProvider, PaymentConfirmation, PaymentGateway, PaymentRequest, PaymentSession, Payout};
use crate::client::session::Session;
use crate::config::{AuthSettings, GatewaySettings};
use crate::errors::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, header};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

const REQUEST_TIMEOUT_SECS: u64 = 30;
/// Header the payout function forwards to the gateway for replay protection.
const IDEMPOTENCY_KEY: &str = "Idempotency-Key";

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CheckoutResponse {
    #[serde(rename = "sessionId")]
    session_id: String,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IntentResponse {
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct PayoutResponse {
    #[serde(rename = "payoutId")]
    payout_id: String,
}

#[derive(Debug, Deserialize)]
struct ConfirmResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

/// Maps a non-success HTTP status and its body onto the error taxonomy.
///
/// 429 is rate limiting, 401/403 mean the session is gone, other 4xx are the
/// gateway rejecting the request (its `error` text is kept verbatim), and 5xx
/// are treated as transient.
pub(crate) fn classify_failure(status: StatusCode, retry_after: Option<Duration>, body: &str) -> Error {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .unwrap_or_else(|| format!("Payment service returned {status}"));

    match status {
        StatusCode::TOO_MANY_REQUESTS => Error::RateLimited { retry_after },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::NotAuthenticated,
        s if s.is_client_error() => Error::Gateway { message },
        _ => Error::Transient { message },
    }
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn build_client() -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .map_err(Into::into)
}

async fn send_json<T: DeserializeOwned>(request: RequestBuilder, what: &str) -> Result<T> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return response.json::<T>().await.map_err(Into::into);
    }

    let hint = retry_after(&response);
    let body = response.text().await.unwrap_or_default();
    warn!("{what} failed with {status}");
    Err(classify_failure(status, hint, &body))
}

/// Payment gateway reached through its HTTP edge functions.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
    success_url: String,
    cancel_url: String,
}

impl HttpGateway {
    /// Client for the edge functions under `settings.base_url`.
    pub fn new(settings: &GatewaySettings) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            success_url: settings.success_url.clone(),
            cancel_url: settings.cancel_url.clone(),
        })
    }

    fn function_url(&self, name: &str) -> String {
        format!("{}/{name}", self.base_url)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        function: &str,
        access_token: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        debug!("POST {}", function);
        let request = self
            .client
            .post(self.function_url(function))
            .bearer_auth(access_token)
            .json(&body);
        send_json(request, function).await
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn create_checkout_session(&self, request: PaymentRequest<'_>) -> Result<PaymentSession> {
        let response: CheckoutResponse = self
            .call(
                "create-checkout-session",
                request.access_token,
                json!({
                    "user_id": request.account_id,
                    "amount": request.amount_cents,
                    "success_url": self.success_url,
                    "cancel_url": self.cancel_url,
                }),
            )
            .await?;
        Ok(PaymentSession::Checkout {
            session_id: response.session_id,
            url: response.url,
        })
    }

    async fn create_payment_intent(&self, request: PaymentRequest<'_>) -> Result<PaymentSession> {
        let response: IntentResponse = self
            .call(
                "create-payment-intent",
                request.access_token,
                json!({ "user_id": request.account_id, "amount": request.amount_cents }),
            )
            .await?;
        Ok(PaymentSession::Intent {
            client_secret: response.client_secret,
        })
    }

    async fn create_payout(
        &self,
        request: PaymentRequest<'_>,
        idempotency_key: &str,
    ) -> Result<Payout> {
        debug!("POST create-payout ({idempotency_key})");
        let call = self
            .client
            .post(self.function_url("create-payout"))
            .bearer_auth(request.access_token)
            .header(IDEMPOTENCY_KEY, idempotency_key)
            .json(&json!({ "user_id": request.account_id, "amount": request.amount_cents }));
        let response: PayoutResponse = send_json(call, "create-payout").await?;
        Ok(Payout {
            payout_id: response.payout_id,
        })
    }

    async fn confirm_card_payment(&self, client_secret: &str) -> Result<PaymentConfirmation> {
        let request = self
            .client
            .post(self.function_url("confirm-payment"))
            .json(&json!({ "client_secret": client_secret }));
        let response: ConfirmResponse = send_json(request, "confirm-payment").await?;
        Ok(confirmation_from(response))
    }
}

fn confirmation_from(response: ConfirmResponse) -> PaymentConfirmation {
    if response.status == "succeeded" {
        PaymentConfirmation::Succeeded
    } else {
        PaymentConfirmation::Failed {
            message: response
                .error
                .unwrap_or_else(|| format!("Payment {}", response.status)),
        }
    }
}

/// Auth provider reached over HTTP (`GET {base}/user`).
#[derive(Debug, Clone)]
pub struct HttpAuthProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpAuthProvider {
    /// Client for the auth API under `settings.base_url`.
    pub fn new(settings: &AuthSettings) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
        })
    }
}

#[async_trait]
impl AuthProvider for HttpAuthProvider {
    async fn get_session(&self, access_token: &str) -> Result<Option<Session>> {
        let request = self
            .client
            .get(format!("{}/user", self.base_url))
            .header("apikey", &self.api_key)
            .bearer_auth(access_token);

        match send_json::<UserResponse>(request, "session lookup").await {
            Ok(user) => Ok(Some(Session {
                account_id: user.id,
                email: user.email.unwrap_or_default(),
                access_token: access_token.to_string(),
            })),
            Err(Error::NotAuthenticated) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
