//! M-Pesa (Daraja) gateway client: OAuth token handling, STK push
//! submission, and the phone/amount normalization policies the gateway
//! requires.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use metrics::counter;
use reqwest::StatusCode;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, instrument, warn};

use crate::config::{is_placeholder, MpesaConfig};
use crate::errors::ServiceError;

/// Kenyan country calling code, digits only
const COUNTRY_CODE: &str = "254";
/// Local mobile numbers start with this digit once the trunk prefix is gone
const MOBILE_PREFIX: char = '7';

/// Gateway field length limits
const ACCOUNT_REFERENCE_MAX: usize = 20;
const TRANSACTION_DESC_MAX: usize = 40;

/// Refresh the cached token this long before the gateway expires it
const TOKEN_EXPIRY_MARGIN_SECS: u64 = 60;
const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

/// Structured failure classification for gateway interactions.
#[derive(Debug, thiserror::Error)]
pub enum MpesaError {
    #[error("gateway configuration incomplete: {0}")]
    Configuration(String),

    #[error("gateway connection failed: {0}")]
    Connection(String),

    #[error("gateway authentication failed (HTTP {0})")]
    Auth(u16),

    #[error("gateway error (HTTP {status}): {body}")]
    Gateway { status: u16, body: String },

    #[error("{0}")]
    Rejected(String),

    #[error("unexpected gateway response: {0}")]
    Protocol(String),
}

impl From<MpesaError> for ServiceError {
    fn from(err: MpesaError) -> Self {
        match err {
            MpesaError::Configuration(msg) => ServiceError::ConfigurationError(msg),
            // Business-level rejection carries the gateway's own description
            MpesaError::Rejected(msg) => ServiceError::PaymentFailed(msg),
            other => ServiceError::ExternalServiceError(other.to_string()),
        }
    }
}

/// Normalizes a user-entered phone string into the gateway's canonical
/// subscriber format (`2547XXXXXXXX`).
///
/// Best-effort by design: malformed input passes through unchanged and the
/// gateway's own validation stays authoritative.
pub fn normalize_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();

    if let Some(rest) = digits.strip_prefix('0') {
        return format!("{COUNTRY_CODE}{rest}");
    }
    if digits.len() == 9 && digits.starts_with(MOBILE_PREFIX) {
        return format!("{COUNTRY_CODE}{digits}");
    }
    digits
}

/// Rounds a decimal amount to whole currency units with a floor of 1.
///
/// The gateway only accepts integer amounts. Sub-unit amounts are floored
/// up to 1 rather than rejected; this reproduces the production policy
/// exactly and must not be changed without confirming the live gateway's
/// minimum.
pub fn round_to_unit(amount: Decimal) -> u64 {
    amount
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_u64()
        .unwrap_or(0)
        .max(1)
}

/// Truncates free-text fields to the gateway's fixed limits, respecting
/// char boundaries.
fn truncate(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

/// Daraja timestamp format: YYYYMMDDHHMMSS
fn gateway_timestamp() -> String {
    Utc::now().format("%Y%m%d%H%M%S").to_string()
}

/// Request password: base64(shortcode + passkey + timestamp)
fn push_password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
    BASE64.encode(format!("{shortcode}{passkey}{timestamp}"))
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    /// Daraja reports this as a stringified integer ("3599")
    expires_in: Option<String>,
}

/// Outbound STK push request body; field names are the Daraja wire format.
#[derive(Debug, Serialize)]
struct StkPushRequest<'a> {
    #[serde(rename = "BusinessShortCode")]
    business_short_code: &'a str,
    #[serde(rename = "Password")]
    password: String,
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "TransactionType")]
    transaction_type: &'static str,
    #[serde(rename = "Amount")]
    amount: u64,
    #[serde(rename = "PartyA")]
    party_a: &'a str,
    #[serde(rename = "PartyB")]
    party_b: &'a str,
    #[serde(rename = "PhoneNumber")]
    phone_number: &'a str,
    #[serde(rename = "CallBackURL")]
    callback_url: &'a str,
    #[serde(rename = "AccountReference")]
    account_reference: String,
    #[serde(rename = "TransactionDesc")]
    transaction_desc: String,
}

/// Gateway acknowledgment of an accepted STK push. Carries the correlation
/// identifiers the eventual callback will be matched on.
#[derive(Debug, Clone, Deserialize)]
pub struct StkPushAck {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: Option<String>,
    #[serde(rename = "ResponseCode")]
    pub response_code: Option<String>,
    #[serde(rename = "ResponseDescription")]
    pub response_description: Option<String>,
    #[serde(rename = "CustomerMessage")]
    pub customer_message: Option<String>,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Stateless gateway client apart from the cached bearer token.
///
/// All configuration is passed in explicitly so tests can construct the
/// client with doubles; nothing reads the process environment.
pub struct MpesaClient {
    config: MpesaConfig,
    http: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

impl MpesaClient {
    pub fn new(config: MpesaConfig) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .expect("failed to build HTTP client");

        Self {
            config,
            http,
            token: Mutex::new(None),
        }
    }

    fn ensure_consumer_credentials(&self) -> Result<(), MpesaError> {
        if is_placeholder(&self.config.consumer_key) || is_placeholder(&self.config.consumer_secret)
        {
            return Err(MpesaError::Configuration(
                "M-Pesa consumer key/secret not configured".to_string(),
            ));
        }
        Ok(())
    }

    fn ensure_push_credentials(&self) -> Result<(), MpesaError> {
        if is_placeholder(&self.config.shortcode) || is_placeholder(&self.config.passkey) {
            return Err(MpesaError::Configuration(
                "M-Pesa shortcode/passkey not configured".to_string(),
            ));
        }
        if is_placeholder(&self.config.callback_url) {
            return Err(MpesaError::Configuration(
                "M-Pesa callback URL not configured".to_string(),
            ));
        }
        Ok(())
    }

    /// Sends a request, retrying connection-level failures only, with the
    /// configured bounded attempt count and fixed backoff. Authentication
    /// and business rejections are never retried.
    async fn send_with_retry<F, Fut>(&self, mut request: F) -> Result<reqwest::Response, MpesaError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match request().await {
                Ok(response) => return Ok(response),
                Err(err)
                    if (err.is_connect() || err.is_timeout())
                        && attempt < self.config.max_retries =>
                {
                    attempt += 1;
                    warn!(
                        attempt,
                        max_retries = self.config.max_retries,
                        error = %err,
                        "Gateway connection failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(self.config.retry_backoff_secs)).await;
                }
                Err(err) => return Err(MpesaError::Connection(err.to_string())),
            }
        }
    }

    /// Obtains a bearer credential from the gateway's token endpoint,
    /// serving from cache while the previous token is still valid.
    pub async fn access_token(&self) -> Result<String, MpesaError> {
        self.ensure_consumer_credentials()?;

        {
            let cache = self.token.lock().await;
            if let Some(cached) = cache.as_ref() {
                if cached.expires_at > Instant::now() {
                    return Ok(cached.token.clone());
                }
            }
        }

        let url = format!("{}/oauth/v1/generate", self.config.base_url());
        let response = self
            .send_with_retry(|| {
                self.http
                    .get(&url)
                    .query(&[("grant_type", "client_credentials")])
                    .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
                    .send()
            })
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            error!(status = status.as_u16(), "M-Pesa token request rejected");
            return Err(MpesaError::Auth(status.as_u16()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), %body, "M-Pesa token request failed");
            return Err(MpesaError::Gateway {
                status: status.as_u16(),
                body,
            });
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| MpesaError::Protocol(format!("malformed token response: {e}")))?;
        let token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| MpesaError::Protocol("token response missing access_token".into()))?;

        let ttl = body
            .expires_in
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TOKEN_TTL_SECS);
        let expires_at = Instant::now() + Duration::from_secs(ttl.saturating_sub(TOKEN_EXPIRY_MARGIN_SECS));

        let mut cache = self.token.lock().await;
        *cache = Some(CachedToken {
            token: token.clone(),
            expires_at,
        });

        Ok(token)
    }

    /// Submits an STK push request for the given amount and subscriber.
    ///
    /// Success means HTTP 2xx AND gateway `ResponseCode == "0"`; everything
    /// else is surfaced as a classified [`MpesaError`]. Persisting the
    /// payment record is the caller's responsibility.
    #[instrument(skip(self), fields(amount = %amount))]
    pub async fn initiate_stk_push(
        &self,
        amount: Decimal,
        phone: &str,
        reference: &str,
        description: &str,
    ) -> Result<StkPushAck, MpesaError> {
        self.ensure_consumer_credentials()?;
        self.ensure_push_credentials()?;

        let token = self.access_token().await?;

        let timestamp = gateway_timestamp();
        let password = push_password(&self.config.shortcode, &self.config.passkey, &timestamp);
        let subscriber = normalize_phone(phone);

        let payload = StkPushRequest {
            business_short_code: &self.config.shortcode,
            password,
            timestamp,
            transaction_type: "CustomerPayBillOnline",
            amount: round_to_unit(amount),
            party_a: &subscriber,
            party_b: &self.config.shortcode,
            phone_number: &subscriber,
            callback_url: &self.config.callback_url,
            account_reference: truncate(reference, ACCOUNT_REFERENCE_MAX),
            transaction_desc: truncate(description, TRANSACTION_DESC_MAX),
        };

        let url = format!("{}/mpesa/stkpush/v1/processrequest", self.config.base_url());
        let response = self
            .send_with_retry(|| {
                self.http
                    .post(&url)
                    .bearer_auth(&token)
                    .json(&payload)
                    .send()
            })
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            counter!("stockflow_mpesa.push.error", 1, "kind" => "auth");
            error!(status = status.as_u16(), "M-Pesa STK push unauthorized");
            return Err(MpesaError::Auth(status.as_u16()));
        }
        if !status.is_success() {
            counter!("stockflow_mpesa.push.error", 1, "kind" => "gateway");
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), %body, "M-Pesa STK push failed");
            return Err(MpesaError::Gateway {
                status: status.as_u16(),
                body,
            });
        }

        let ack: StkPushAck = response
            .json()
            .await
            .map_err(|e| MpesaError::Protocol(format!("malformed push response: {e}")))?;

        if ack.response_code.as_deref() != Some("0") {
            counter!("stockflow_mpesa.push.error", 1, "kind" => "rejected");
            let reason = ack
                .response_description
                .clone()
                .unwrap_or_else(|| "M-Pesa STK push rejected".to_string());
            warn!(response_code = ?ack.response_code, %reason, "M-Pesa STK push rejected");
            return Err(MpesaError::Rejected(reason));
        }

        counter!("stockflow_mpesa.push.accepted", 1);
        Ok(ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn normalize_phone_trunk_prefix() {
        assert_eq!(normalize_phone("0712345678"), "254712345678");
    }

    #[test]
    fn normalize_phone_bare_local_number() {
        assert_eq!(normalize_phone("712345678"), "254712345678");
    }

    #[test]
    fn normalize_phone_already_canonical() {
        assert_eq!(normalize_phone("254712345678"), "254712345678");
    }

    #[test]
    fn normalize_phone_strips_separators() {
        assert_eq!(normalize_phone("0712 345-678"), "254712345678");
        assert_eq!(normalize_phone("+254 712 345 678"), "254712345678");
    }

    #[test]
    fn normalize_phone_passes_through_nonconforming_input() {
        // 8 digits, no trunk prefix: not recognizable, left for the gateway
        assert_eq!(normalize_phone("12345678"), "12345678");
        assert_eq!(normalize_phone(""), "");
    }

    #[test]
    fn round_to_unit_rounds_to_nearest() {
        assert_eq!(round_to_unit(dec!(999.60)), 1000);
        assert_eq!(round_to_unit(dec!(999.49)), 999);
        assert_eq!(round_to_unit(dec!(1000)), 1000);
    }

    #[test]
    fn round_to_unit_floors_at_one() {
        assert_eq!(round_to_unit(dec!(0.2)), 1);
        assert_eq!(round_to_unit(dec!(0.5)), 1);
    }

    #[test]
    fn truncate_respects_gateway_limits() {
        let long = "X".repeat(60);
        assert_eq!(truncate(&long, ACCOUNT_REFERENCE_MAX).len(), 20);
        assert_eq!(truncate(&long, TRANSACTION_DESC_MAX).len(), 40);
        assert_eq!(truncate("short", ACCOUNT_REFERENCE_MAX), "short");
    }

    #[test]
    fn push_password_is_base64_of_concatenation() {
        let password = push_password("174379", "passkey", "20250201120000");
        let decoded = BASE64.decode(password).unwrap();
        assert_eq!(decoded, b"174379passkey20250201120000");
    }

    #[test]
    fn gateway_timestamp_shape() {
        let ts = gateway_timestamp();
        assert_eq!(ts.len(), 14);
        assert!(ts.chars().all(|c| c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn placeholder_credentials_fail_before_any_network_call() {
        let client = MpesaClient::new(MpesaConfig::default());

        let err = client.access_token().await.unwrap_err();
        assert!(matches!(err, MpesaError::Configuration(_)));

        let err = client
            .initiate_stk_push(dec!(100), "0712345678", "INV-1", "Payment")
            .await
            .unwrap_err();
        assert!(matches!(err, MpesaError::Configuration(_)));
    }

    #[tokio::test]
    async fn push_requires_shortcode_and_passkey() {
        let config = MpesaConfig {
            consumer_key: "real_key_value".to_string(),
            consumer_secret: "real_secret_value".to_string(),
            ..Default::default()
        };
        let client = MpesaClient::new(config);

        let err = client
            .initiate_stk_push(dec!(100), "0712345678", "INV-1", "Payment")
            .await
            .unwrap_err();
        assert!(matches!(err, MpesaError::Configuration(_)));
    }

    #[test]
    fn rejected_error_maps_to_payment_failed() {
        let service_err: ServiceError =
            MpesaError::Rejected("The balance is insufficient".into()).into();
        assert!(matches!(service_err, ServiceError::PaymentFailed(_)));

        let service_err: ServiceError = MpesaError::Configuration("missing".into()).into();
        assert!(matches!(service_err, ServiceError::ConfigurationError(_)));

        let service_err: ServiceError = MpesaError::Auth(401).into();
        assert!(matches!(service_err, ServiceError::ExternalServiceError(_)));
    }
}
