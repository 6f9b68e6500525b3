//! Typed operations against the Alpha-token exchange HTTP API.
//!
//! Every private operation takes [`UserCredentials`] explicitly; the client
//! itself carries no identity. Responses use the venue's
//! `{ code, message, data, success }` envelope.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{header::HeaderMap, Method, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use volt_core::pricing::format_fixed;
use volt_core::{
    OrderId, OrderStatus, OtoPlacement, Price, Quantity, Side, TokenCatalogEntry, UserCredentials,
    UserVolumeSnapshot,
};

pub mod classifier;

pub use classifier::AuthFailureClassifier;

const CATALOG_PATH: &str = "/bapi/defi/v1/public/alpha-trade/aggTicker24";
const USER_VOLUME_PATH: &str = "/bapi/defi/v1/private/wallet-direct/buw/wallet/today/user-volume";
const PLACE_OTO_PATH: &str = "/bapi/asset/v1/private/alpha-trade/oto-order/place";
const CANCEL_ORDER_PATH: &str = "/bapi/defi/v1/private/alpha-trade/order/cancel";
const OPEN_ORDERS_PATH: &str = "/bapi/defi/v1/private/alpha-trade/order/get-open-order";
const LISTEN_KEY_PATH: &str = "/bapi/defi/v1/private/alpha-trade/get-listen-key";
const USER_DATA_STREAM_PATH: &str = "/bapi/defi/v1/private/alpha-trade/userDataStream";

const QUOTE_ASSET: &str = "USDT";
const PAYMENT_WALLET_TYPE: &str = "CARD";

/// Convenience alias for exchange results.
pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// Error families surfaced by exchange operations.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Network-level failure: connect, timeout, non-success HTTP status.
    #[error("transport error: {0}")]
    Transport(String),
    /// The response arrived but could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The payload matched a credential-revocation pattern. Terminal for
    /// the affected user.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    /// Exchange-side validation refused the request.
    #[error("rejected [{code}]: {message}")]
    Rejected { code: String, message: String },
}

impl ExchangeError {
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::AuthenticationFailed(_))
    }
}

/// Parameters of one OTO placement: a BUY working leg and a SELL pending
/// leg over the same quantity.
#[derive(Clone, Debug)]
pub struct OtoOrderRequest {
    pub base_asset: String,
    pub quantity: Quantity,
    pub buy_price: Price,
    pub sell_price: Price,
    pub price_scale: u32,
    pub quantity_scale: u32,
}

/// One resting order as returned by the open-orders query.
#[derive(Clone, Debug)]
pub struct OpenOrder {
    pub order_id: OrderId,
    pub symbol: String,
    pub side: Side,
    pub price: Price,
    pub quantity: Quantity,
    pub executed_quantity: Quantity,
    pub status: OrderStatus,
}

/// Typed surface of the exchange consumed by the rest of the workspace.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    /// Current token catalog snapshot. May be served from a short-lived
    /// cache shared across users.
    async fn fetch_token_catalog(&self) -> ExchangeResult<Vec<TokenCatalogEntry>>;

    /// Per-token volume the exchange has attributed to the calling user
    /// today. This is the authoritative input to every stopping decision.
    async fn fetch_user_volume(&self, creds: &UserCredentials)
        -> ExchangeResult<UserVolumeSnapshot>;

    /// Submit one OTO order. Placement is not idempotent; callers must not
    /// blindly retry a call whose outcome is unknown.
    async fn place_oto_order(
        &self,
        creds: &UserCredentials,
        request: &OtoOrderRequest,
    ) -> ExchangeResult<OtoPlacement>;

    async fn list_open_orders(
        &self,
        creds: &UserCredentials,
        symbol: Option<&str>,
    ) -> ExchangeResult<Vec<OpenOrder>>;

    async fn cancel_order(
        &self,
        creds: &UserCredentials,
        symbol: &str,
        order_id: &str,
    ) -> ExchangeResult<()>;

    /// Obtain a listen key authorizing the user's order-event subscription.
    async fn obtain_listen_key(&self, creds: &UserCredentials) -> ExchangeResult<String>;

    async fn keep_alive_listen_key(
        &self,
        creds: &UserCredentials,
        listen_key: &str,
    ) -> ExchangeResult<()>;

    /// Release a listen key. A not-found answer is success: the key simply
    /// expired first.
    async fn close_listen_key(
        &self,
        creds: &UserCredentials,
        listen_key: &str,
    ) -> ExchangeResult<()>;
}

/// Client configuration.
#[derive(Clone, Debug)]
pub struct AlphaClientConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    /// How long a catalog snapshot may be served from cache.
    pub catalog_cache_ttl: Duration,
}

impl Default for AlphaClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.binance.com".to_string(),
            request_timeout: Duration::from_secs(30),
            catalog_cache_ttl: Duration::from_secs(5),
        }
    }
}

impl AlphaClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }
}

/// HTTP client for the Alpha-token exchange.
pub struct AlphaClient {
    http: reqwest::Client,
    base_url: String,
    classifier: AuthFailureClassifier,
    catalog_cache: CatalogCache,
}

impl AlphaClient {
    pub fn new(config: AlphaClientConfig) -> ExchangeResult<Self> {
        Self::with_classifier(config, AuthFailureClassifier::default())
    }

    pub fn with_classifier(
        config: AlphaClientConfig,
        classifier: AuthFailureClassifier,
    ) -> ExchangeResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| ExchangeError::Transport(err.to_string()))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            classifier,
            catalog_cache: CatalogCache::new(config.catalog_cache_ttl),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn credential_headers(creds: &UserCredentials) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in &creds.headers {
            let Ok(name) = name.parse::<reqwest::header::HeaderName>() else {
                continue;
            };
            let Ok(value) = value.parse::<reqwest::header::HeaderValue>() else {
                continue;
            };
            headers.insert(name, value);
        }
        if !creds.cookies.is_empty() {
            if let Ok(value) = creds.cookies.parse::<reqwest::header::HeaderValue>() {
                headers.insert(reqwest::header::COOKIE, value);
            }
        }
        headers
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        creds: Option<&UserCredentials>,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> ExchangeResult<T> {
        let mut request = self.http.request(method, self.url(path));
        if let Some(creds) = creds {
            request = request.headers(Self::credential_headers(creds));
        }
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .map_err(|err| ExchangeError::Transport(err.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| ExchangeError::Transport(err.to_string()))?;
        self.decode_envelope(path, status, &text)
    }

    fn decode_envelope<T: DeserializeOwned>(
        &self,
        path: &str,
        status: StatusCode,
        text: &str,
    ) -> ExchangeResult<T> {
        if !status.is_success() {
            // Some gateways deliver credential-revocation payloads with a
            // non-2xx status; classify before falling back to transport.
            if let Ok(envelope) = serde_json::from_str::<Envelope<Value>>(text) {
                if let Some(err) = self.envelope_failure(path, &envelope) {
                    return Err(err);
                }
            }
            return Err(ExchangeError::Transport(format!(
                "http {status} from {path}"
            )));
        }
        let envelope: Envelope<T> = serde_json::from_str(text)
            .map_err(|err| ExchangeError::Protocol(format!("{path}: {err}")))?;
        if let Some(err) = self.envelope_failure(path, &envelope) {
            return Err(err);
        }
        envelope
            .data
            .ok_or_else(|| ExchangeError::Protocol(format!("{path}: envelope carried no data")))
    }

    fn envelope_failure<T>(&self, path: &str, envelope: &Envelope<T>) -> Option<ExchangeError> {
        if envelope.success {
            return None;
        }
        let code = envelope.code.clone().unwrap_or_else(|| "UNKNOWN".into());
        let message = envelope.message.clone().unwrap_or_else(|| "no message".into());
        debug!(path, %code, %message, "exchange reported failure");
        if self
            .classifier
            .is_auth_failure(Some(&code), Some(&message))
        {
            Some(ExchangeError::AuthenticationFailed(message))
        } else {
            Some(ExchangeError::Rejected { code, message })
        }
    }
}

#[async_trait]
impl ExchangeApi for AlphaClient {
    async fn fetch_token_catalog(&self) -> ExchangeResult<Vec<TokenCatalogEntry>> {
        if let Some(cached) = self.catalog_cache.get().await {
            return Ok(cached);
        }
        let entries: Vec<CatalogEntryWire> = self
            .send(
                Method::GET,
                CATALOG_PATH,
                None,
                &[("dataType", "aggregate")],
                None,
            )
            .await?;
        let catalog: Vec<TokenCatalogEntry> =
            entries.into_iter().filter_map(CatalogEntryWire::decode).collect();
        self.catalog_cache.store(catalog.clone()).await;
        Ok(catalog)
    }

    async fn fetch_user_volume(
        &self,
        creds: &UserCredentials,
    ) -> ExchangeResult<UserVolumeSnapshot> {
        let wire: VolumeWire = self
            .send(Method::GET, USER_VOLUME_PATH, Some(creds), &[], None)
            .await?;
        Ok(UserVolumeSnapshot::new(
            wire.total_volume,
            wire.trade_volume_info_list
                .into_iter()
                .map(|entry| (entry.token_name, entry.volume)),
        ))
    }

    async fn place_oto_order(
        &self,
        creds: &UserCredentials,
        request: &OtoOrderRequest,
    ) -> ExchangeResult<OtoPlacement> {
        let amount = request.buy_price * request.quantity;
        let body = json!({
            "baseAsset": request.base_asset,
            "quoteAsset": QUOTE_ASSET,
            "workingSide": Side::Buy.as_wire(),
            "workingPrice": format_fixed(request.buy_price, request.price_scale),
            "workingQuantity": format_fixed(request.quantity, request.quantity_scale),
            "paymentDetails": [{
                "amount": format_fixed(amount, request.price_scale),
                "paymentWalletType": PAYMENT_WALLET_TYPE,
            }],
            "pendingPrice": format_fixed(request.sell_price, request.price_scale),
        });
        let data: Value = self
            .send(Method::POST, PLACE_OTO_PATH, Some(creds), &[], Some(body))
            .await?;
        let working_order_id = id_to_string(data.get("workingOrderId")).ok_or_else(|| {
            ExchangeError::Protocol("placement response missing workingOrderId".into())
        })?;
        let pending_order_id = id_to_string(data.get("pendingOrderId")).ok_or_else(|| {
            ExchangeError::Protocol("placement response missing pendingOrderId".into())
        })?;
        Ok(OtoPlacement {
            working_order_id,
            pending_order_id,
        })
    }

    async fn list_open_orders(
        &self,
        creds: &UserCredentials,
        symbol: Option<&str>,
    ) -> ExchangeResult<Vec<OpenOrder>> {
        let mut query = Vec::new();
        if let Some(symbol) = symbol {
            query.push(("symbol", symbol));
        }
        let raw: Vec<OpenOrderWire> = self
            .send(Method::GET, OPEN_ORDERS_PATH, Some(creds), &query, None)
            .await?;
        Ok(raw.into_iter().filter_map(OpenOrderWire::decode).collect())
    }

    async fn cancel_order(
        &self,
        creds: &UserCredentials,
        symbol: &str,
        order_id: &str,
    ) -> ExchangeResult<()> {
        let body = json!({ "symbol": symbol, "orderId": order_id });
        let _: Value = self
            .send(Method::POST, CANCEL_ORDER_PATH, Some(creds), &[], Some(body))
            .await?;
        Ok(())
    }

    async fn obtain_listen_key(&self, creds: &UserCredentials) -> ExchangeResult<String> {
        let data: Value = self
            .send(Method::POST, LISTEN_KEY_PATH, Some(creds), &[], None)
            .await?;
        // The venue answers with either {"listenKey": "..."} or the bare key.
        match &data {
            Value::String(key) if !key.is_empty() => Ok(key.clone()),
            Value::Object(map) => map
                .get("listenKey")
                .and_then(Value::as_str)
                .filter(|key| !key.is_empty())
                .map(str::to_string)
                .ok_or_else(|| ExchangeError::Protocol("listen key response missing key".into())),
            _ => Err(ExchangeError::Protocol(
                "unrecognized listen key response shape".into(),
            )),
        }
    }

    async fn keep_alive_listen_key(
        &self,
        creds: &UserCredentials,
        listen_key: &str,
    ) -> ExchangeResult<()> {
        let _: Value = self
            .send(
                Method::PUT,
                USER_DATA_STREAM_PATH,
                Some(creds),
                &[("listenKey", listen_key)],
                None,
            )
            .await?;
        Ok(())
    }

    async fn close_listen_key(
        &self,
        creds: &UserCredentials,
        listen_key: &str,
    ) -> ExchangeResult<()> {
        let result: ExchangeResult<Value> = self
            .send(
                Method::DELETE,
                USER_DATA_STREAM_PATH,
                Some(creds),
                &[("listenKey", listen_key)],
                None,
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(ExchangeError::Rejected { code, message })
                if message.to_lowercase().contains("not found") =>
            {
                debug!(%code, "listen key already gone");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "listen key close failed");
                Err(err)
            }
        }
    }
}

/// The venue's standard response envelope.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct Envelope<T> {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntryWire {
    symbol: Option<String>,
    price: Option<String>,
    #[serde(rename = "mulPoint")]
    mul_point: Option<u32>,
    #[serde(rename = "priceScale")]
    price_scale: Option<u32>,
    #[serde(rename = "quantityScale")]
    quantity_scale: Option<u32>,
    #[serde(rename = "stepSize")]
    step_size: Option<String>,
}

impl CatalogEntryWire {
    fn decode(self) -> Option<TokenCatalogEntry> {
        let symbol = self.symbol?;
        let last_price = parse_decimal_opt(self.price.as_deref())?;
        let mut entry = TokenCatalogEntry::new(symbol, last_price)
            .with_mul_point(self.mul_point.unwrap_or(1))
            .with_scales(self.price_scale.unwrap_or(8), self.quantity_scale.unwrap_or(8));
        if let Some(step) = parse_decimal_opt(self.step_size.as_deref()) {
            entry = entry.with_lot_step(step);
        }
        Some(entry)
    }
}

#[derive(Debug, Deserialize)]
struct VolumeWire {
    #[serde(rename = "totalVolume", default)]
    total_volume: Decimal,
    #[serde(rename = "tradeVolumeInfoList", default)]
    trade_volume_info_list: Vec<VolumeEntryWire>,
}

#[derive(Debug, Deserialize)]
struct VolumeEntryWire {
    #[serde(rename = "tokenName")]
    token_name: String,
    volume: Decimal,
}

#[derive(Debug, Deserialize)]
struct OpenOrderWire {
    #[serde(rename = "orderId")]
    order_id: Option<Value>,
    symbol: Option<String>,
    side: Option<String>,
    price: Option<String>,
    #[serde(rename = "origQty")]
    orig_qty: Option<String>,
    #[serde(rename = "executedQty")]
    executed_qty: Option<String>,
    status: Option<String>,
}

impl OpenOrderWire {
    fn decode(self) -> Option<OpenOrder> {
        Some(OpenOrder {
            order_id: id_to_string(self.order_id.as_ref())?,
            symbol: self.symbol?,
            side: self.side.as_deref().and_then(Side::from_wire)?,
            price: parse_decimal_opt(self.price.as_deref())?,
            quantity: parse_decimal_opt(self.orig_qty.as_deref())?,
            executed_quantity: parse_decimal_opt(self.executed_qty.as_deref())
                .unwrap_or(Decimal::ZERO),
            status: self.status.as_deref().and_then(OrderStatus::from_wire)?,
        })
    }
}

/// Parse an optional string into a decimal, discarding malformed values.
#[must_use]
pub fn parse_decimal_opt(value: Option<&str>) -> Option<Decimal> {
    value.and_then(|v| v.parse::<Decimal>().ok())
}

/// Order ids arrive as either JSON numbers or strings; normalize to string
/// so they compare equal to the ids carried on the event stream.
#[must_use]
pub fn id_to_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

struct CatalogCache {
    ttl: Duration,
    slot: Mutex<Option<(Instant, Arc<Vec<TokenCatalogEntry>>)>>,
}

impl CatalogCache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    async fn get(&self) -> Option<Vec<TokenCatalogEntry>> {
        if self.ttl.is_zero() {
            return None;
        }
        let guard = self.slot.lock().await;
        guard.as_ref().and_then(|(stored, catalog)| {
            (stored.elapsed() < self.ttl).then(|| catalog.as_ref().clone())
        })
    }

    async fn store(&self, catalog: Vec<TokenCatalogEntry>) {
        if self.ttl.is_zero() {
            return;
        }
        let mut guard = self.slot.lock().await;
        *guard = Some((Instant::now(), Arc::new(catalog)));
    }
}
