//! Mock REST server speaking the venue's envelope protocol.

use std::convert::Infallible;
use std::net::SocketAddr;

use anyhow::Result;
use hyper::body::{to_bytes, Bytes};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;

use volt_core::Side;

use crate::scenario::{ScenarioAction, ScenarioTrigger};
use crate::state::{MockAlphaState, PlacedOto};

const AUTH_HEADER: &str = "x-alpha-token";

const CATALOG_PATH: &str = "/bapi/defi/v1/public/alpha-trade/aggTicker24";
const USER_VOLUME_PATH: &str = "/bapi/defi/v1/private/wallet-direct/buw/wallet/today/user-volume";
const PLACE_OTO_PATH: &str = "/bapi/asset/v1/private/alpha-trade/oto-order/place";
const CANCEL_ORDER_PATH: &str = "/bapi/defi/v1/private/alpha-trade/order/cancel";
const OPEN_ORDERS_PATH: &str = "/bapi/defi/v1/private/alpha-trade/order/get-open-order";
const LISTEN_KEY_PATH: &str = "/bapi/defi/v1/private/alpha-trade/get-listen-key";
const USER_DATA_STREAM_PATH: &str = "/bapi/defi/v1/private/alpha-trade/userDataStream";

pub struct MockRestApi {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl MockRestApi {
    pub async fn spawn(state: MockAlphaState) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        let std_listener = listener.into_std()?;
        std_listener.set_nonblocking(true)?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let make_svc = make_service_fn(move |_| {
            let state = state.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let state = state.clone();
                    async move { Ok::<_, Infallible>(route(req, state).await) }
                }))
            }
        });
        let server = hyper::Server::from_tcp(std_listener)?.serve(make_svc);
        let handle = tokio::spawn(async move {
            if let Err(err) = server
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
            {
                tracing::error!(error = %err, "mock REST server exited with error");
            }
        });
        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            handle,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}

impl Drop for MockRestApi {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}

async fn route(req: Request<Body>, state: MockAlphaState) -> Response<Body> {
    let (parts, body) = req.into_parts();
    let method = parts.method.clone();
    let path = parts.uri.path().to_string();
    let body_bytes = match to_bytes(body).await {
        Ok(bytes) => bytes,
        Err(err) => return fail_response(StatusCode::BAD_REQUEST, "400", err.to_string()),
    };

    match (method, path.as_str()) {
        (Method::GET, CATALOG_PATH) => ok_response(state.catalog_payload().await),
        (Method::GET, USER_VOLUME_PATH) => handle_user_volume(parts, state).await,
        (Method::POST, PLACE_OTO_PATH) => handle_place_oto(parts, body_bytes, state).await,
        (Method::POST, CANCEL_ORDER_PATH) => match authenticate(&parts, &state).await {
            Ok(_) => ok_response(json!({})),
            Err(resp) => resp,
        },
        (Method::GET, OPEN_ORDERS_PATH) => match authenticate(&parts, &state).await {
            Ok(_) => ok_response(json!([])),
            Err(resp) => resp,
        },
        (Method::POST, LISTEN_KEY_PATH) => handle_listen_key(parts, state).await,
        (Method::PUT, USER_DATA_STREAM_PATH) => match authenticate(&parts, &state).await {
            Ok(_) => ok_response(json!({})),
            Err(resp) => resp,
        },
        (Method::DELETE, USER_DATA_STREAM_PATH) => handle_close_listen_key(parts, state).await,
        _ => fail_response(StatusCode::NOT_FOUND, "404", "endpoint not found"),
    }
}

async fn handle_user_volume(
    parts: http::request::Parts,
    state: MockAlphaState,
) -> Response<Body> {
    let auth_token = match authenticate(&parts, &state).await {
        Ok(token) => token,
        Err(resp) => return resp,
    };
    if let Some(action) = state
        .scenarios()
        .take_for(ScenarioTrigger::VolumeQuery, &auth_token)
        .await
    {
        match action {
            ScenarioAction::Delay(duration) => sleep(duration).await,
            ScenarioAction::Fail { code, message } => {
                return business_error(&code, &message);
            }
            other => debug!(?other, "scenario ignored for volume query"),
        }
    }
    match state.volume_payload(&auth_token).await {
        Ok(payload) => ok_response(payload),
        Err(err) => fail_response(StatusCode::BAD_REQUEST, "400", err.to_string()),
    }
}

async fn handle_place_oto(
    parts: http::request::Parts,
    body: Bytes,
    state: MockAlphaState,
) -> Response<Body> {
    let auth_token = match authenticate(&parts, &state).await {
        Ok(token) => token,
        Err(resp) => return resp,
    };
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(err) => {
            return fail_response(
                StatusCode::BAD_REQUEST,
                "400",
                format!("invalid JSON payload: {err}"),
            )
        }
    };

    let mut withhold_fills = false;
    if let Some(action) = state
        .scenarios()
        .take_for(ScenarioTrigger::PlaceOto, &auth_token)
        .await
    {
        match action {
            ScenarioAction::Delay(duration) => sleep(duration).await,
            ScenarioAction::Fail { code, message } => {
                return business_error(&code, &message);
            }
            ScenarioAction::WithholdFills => withhold_fills = true,
            ScenarioAction::SkipVolumeBump => {
                debug!("SkipVolumeBump has no effect at placement time");
            }
        }
    }

    let base_asset = payload["baseAsset"].as_str().unwrap_or_default().to_string();
    let quantity = payload["workingQuantity"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    let buy_price = payload["workingPrice"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    let sell_price = payload["pendingPrice"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    let placed = match state
        .place_oto(&auth_token, &base_asset, &quantity, &buy_price, &sell_price)
        .await
    {
        Ok(placed) => placed,
        Err(err) => return fail_response(StatusCode::BAD_REQUEST, "400", err.to_string()),
    };

    if !withhold_fills {
        spawn_fill_plan(state.clone(), auth_token, placed.clone(), base_asset);
    }

    ok_response(json!({
        "workingOrderId": placed.working_order_id,
        "pendingOrderId": placed.pending_order_id,
    }))
}

fn spawn_fill_plan(
    state: MockAlphaState,
    auth_token: String,
    placed: PlacedOto,
    symbol: String,
) {
    tokio::spawn(async move {
        let (working_delay, pending_delay) = state.fill_delays().await;
        sleep(working_delay).await;
        state.apply_volume_bump(&auth_token, &symbol).await;
        state
            .emit_execution(
                &auth_token,
                &placed.working_order_id,
                Side::Buy,
                "FILLED",
                &placed.quantity,
            )
            .await;
        sleep(pending_delay).await;
        state
            .emit_execution(
                &auth_token,
                &placed.pending_order_id,
                Side::Sell,
                "FILLED",
                &placed.quantity,
            )
            .await;
    });
}

async fn handle_listen_key(parts: http::request::Parts, state: MockAlphaState) -> Response<Body> {
    let auth_token = match authenticate(&parts, &state).await {
        Ok(token) => token,
        Err(resp) => return resp,
    };
    match state.obtain_listen_key(&auth_token).await {
        Ok(key) => ok_response(json!({ "listenKey": key })),
        Err(err) => fail_response(StatusCode::BAD_REQUEST, "400", err.to_string()),
    }
}

async fn handle_close_listen_key(
    parts: http::request::Parts,
    state: MockAlphaState,
) -> Response<Body> {
    let auth_token = match authenticate(&parts, &state).await {
        Ok(token) => token,
        Err(resp) => return resp,
    };
    let listen_key = parts
        .uri
        .query()
        .and_then(|query| {
            url_query_value(query, "listenKey")
        })
        .unwrap_or_default();
    if state.close_listen_key(&auth_token, &listen_key).await {
        ok_response(json!({}))
    } else {
        business_error("404001", "listen key not found")
    }
}

fn url_query_value(query: &str, name: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

async fn authenticate(
    parts: &http::request::Parts,
    state: &MockAlphaState,
) -> Result<String, Response<Body>> {
    let token = parts
        .headers
        .get(AUTH_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if token.is_empty() || !state.authenticate(&token).await {
        return Err(business_error(
            "100002001",
            "session expired, please re-login",
        ));
    }
    Ok(token)
}

fn ok_response(data: Value) -> Response<Body> {
    json_response(
        StatusCode::OK,
        json!({
            "code": "000000",
            "message": Value::Null,
            "data": data,
            "success": true,
        }),
    )
}

/// Business failure inside a 200: how the venue reports most errors.
fn business_error(code: &str, message: &str) -> Response<Body> {
    json_response(
        StatusCode::OK,
        json!({
            "code": code,
            "message": message,
            "data": Value::Null,
            "success": false,
        }),
    )
}

fn fail_response(status: StatusCode, code: &str, message: impl Into<String>) -> Response<Body> {
    json_response(
        status,
        json!({
            "code": code,
            "message": message.into(),
            "data": Value::Null,
            "success": false,
        }),
    )
}

fn json_response(status: StatusCode, body: Value) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}
