use crate::config::Config;
use crate::error::{DomainError, DomainResult};
use crate::wallet::WalletService;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use sqlx::{Row, SqlitePool};
use std::time::Duration;

type HmacSha512 = Hmac<Sha512>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCurrency {
    pub currency: String,
    pub networks: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StaticAddressRequest {
    pub currency: String,
    pub network: String,
    pub callback_url: Option<String>,
    pub order_id: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticAddressResponse {
    pub track_id: String,
    pub address: String,
}

/// The crypto payment provider as the core sees it. Failures surface as
/// retryable `CONFLICT` so users get a human-readable error instead of a
/// stack trace.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn is_configured(&self) -> bool;

    /// HMAC-SHA-512 of the exact body with the merchant key, constant-time
    /// compare against the hex signature header.
    fn verify_hmac(&self, raw_body: &[u8], header: &str) -> bool;

    async fn create_static_address(
        &self,
        request: StaticAddressRequest,
    ) -> DomainResult<StaticAddressResponse>;

    async fn get_accepted_currencies(&self) -> DomainResult<Vec<ProviderCurrency>>;
}

pub struct OxapayClient {
    http: reqwest::Client,
    base_url: String,
    merchant_key: String,
}

impl OxapayClient {
    pub fn new(config: &Config) -> DomainResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.provider_timeout_seconds))
            .build()
            .map_err(|err| DomainError::internal(err.to_string()))?;
        Ok(Self {
            http,
            base_url: config.provider_base_url.trim_end_matches('/').to_string(),
            merchant_key: config.provider_merchant_key.clone(),
        })
    }
}

fn provider_unavailable(err: impl std::fmt::Display) -> DomainError {
    log::warn!("payment provider call failed: {err}");
    DomainError::conflict_retryable("payment provider is temporarily unavailable")
}

#[async_trait]
impl ProviderClient for OxapayClient {
    fn is_configured(&self) -> bool {
        !self.merchant_key.is_empty()
    }

    fn verify_hmac(&self, raw_body: &[u8], header: &str) -> bool {
        if self.merchant_key.is_empty() {
            return false;
        }
        let Ok(signature) = hex::decode(header.trim()) else {
            return false;
        };
        let mut mac = HmacSha512::new_from_slice(self.merchant_key.as_bytes())
            .expect("hmac accepts any key length");
        mac.update(raw_body);
        mac.verify_slice(&signature).is_ok()
    }

    async fn create_static_address(
        &self,
        request: StaticAddressRequest,
    ) -> DomainResult<StaticAddressResponse> {
        if !self.is_configured() {
            return Err(DomainError::conflict("payments are not configured"));
        }
        #[derive(Deserialize)]
        struct Raw {
            #[serde(rename = "trackId")]
            track_id: serde_json::Value,
            address: String,
        }
        let response = self
            .http
            .post(format!("{}/merchants/request/staticaddress", self.base_url))
            .json(&serde_json::json!({
                "merchant": self.merchant_key,
                "currency": request.currency,
                "network": request.network,
                "callbackUrl": request.callback_url,
                "orderId": request.order_id,
                "description": request.description,
            }))
            .send()
            .await
            .map_err(provider_unavailable)?
            .error_for_status()
            .map_err(provider_unavailable)?;
        let raw: Raw = response.json().await.map_err(provider_unavailable)?;
        Ok(StaticAddressResponse {
            // The provider alternates between numeric and string ids.
            track_id: match raw.track_id {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            },
            address: raw.address,
        })
    }

    async fn get_accepted_currencies(&self) -> DomainResult<Vec<ProviderCurrency>> {
        if !self.is_configured() {
            return Err(DomainError::conflict("payments are not configured"));
        }
        #[derive(Deserialize)]
        struct Raw {
            #[serde(default)]
            allowed: Vec<RawCurrency>,
        }
        #[derive(Deserialize)]
        struct RawCurrency {
            symbol: String,
            #[serde(default)]
            networks: Vec<String>,
        }
        let response = self
            .http
            .post(format!("{}/api/currencies", self.base_url))
            .json(&serde_json::json!({ "merchant": self.merchant_key }))
            .send()
            .await
            .map_err(provider_unavailable)?
            .error_for_status()
            .map_err(provider_unavailable)?;
        let raw: Raw = response.json().await.map_err(provider_unavailable)?;
        Ok(raw
            .allowed
            .into_iter()
            .map(|c| ProviderCurrency {
                currency: c.symbol,
                networks: c.networks,
            })
            .collect())
    }
}

/// Stand-in when no merchant key is configured; every call reports a
/// human-readable conflict.
pub struct DisabledProvider;

#[async_trait]
impl ProviderClient for DisabledProvider {
    fn is_configured(&self) -> bool {
        false
    }

    fn verify_hmac(&self, _raw_body: &[u8], _header: &str) -> bool {
        false
    }

    async fn create_static_address(
        &self,
        _request: StaticAddressRequest,
    ) -> DomainResult<StaticAddressResponse> {
        Err(DomainError::conflict("payments are not configured"))
    }

    async fn get_accepted_currencies(&self) -> DomainResult<Vec<ProviderCurrency>> {
        Err(DomainError::conflict("payments are not configured"))
    }
}

/// One transfer inside a deposit webhook. The provider posts one object
/// per paid transaction to a static address.
#[derive(Debug, Deserialize)]
pub struct WebhookTransfer {
    #[serde(rename = "trackId")]
    pub track_id: serde_json::Value,
    #[serde(rename = "txID", default)]
    pub tx_id: String,
    pub status: String,
    pub amount: String,
    #[serde(default)]
    pub currency: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// Verify, parse and credit an inbound deposit webhook. Each paid transfer
/// maps to one idempotent wallet credit keyed by `(trackId, txId)`.
pub async fn handle_deposit_webhook(
    pool: &SqlitePool,
    wallet: &WalletService,
    provider: &dyn ProviderClient,
    raw_body: &[u8],
    hmac_header: &str,
) -> DomainResult<usize> {
    if !provider.verify_hmac(raw_body, hmac_header) {
        return Err(DomainError::unauthorized("invalid webhook signature"));
    }

    let transfers: Vec<WebhookTransfer> = match serde_json::from_slice::<WebhookTransfer>(raw_body)
    {
        Ok(one) => vec![one],
        Err(_) => serde_json::from_slice(raw_body)
            .map_err(|err| DomainError::validation(format!("malformed webhook body: {err}")))?,
    };

    let mut credited = 0;
    for transfer in transfers {
        if transfer.status.to_lowercase() != "paid" {
            continue;
        }
        let track_id = match &transfer.track_id {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let owner = sqlx::query(
            "SELECT user_id FROM wallet_static_addresses WHERE track_id = ?",
        )
        .bind(&track_id)
        .fetch_optional(pool)
        .await?;
        let Some(owner) = owner else {
            log::warn!("webhook for unknown trackId {track_id}, skipping");
            continue;
        };
        let user_id: String = owner.get("user_id");
        let amount = money::atomic_from_decimal(&transfer.amount)?;
        if amount <= 0 {
            continue;
        }
        wallet
            .credit_provider_deposit(&user_id, &track_id, &transfer.tx_id, &transfer.currency, amount)
            .await?;
        credited += 1;
    }
    Ok(credited)
}
