//! HTTP surface: Telegram webhooks, the /stat endpoint and the payment
//! gateway callback.
//!
//! Handlers do no work themselves; each one forwards into the orchestrator's
//! event channel and, where an answer is expected, awaits a oneshot reply.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Json, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::orchestrator::{Event, PaymentEvent, PaymentStatus};
use crate::telegram::Update;
use crate::{Error, Result};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    events: mpsc::Sender<Event>,
    stat_password: Arc<str>,
}

pub struct ApiServer {
    config: Arc<Config>,
    state: AppState,
    cancel: CancellationToken,
}

impl ApiServer {
    pub fn new(config: Arc<Config>, events: mpsc::Sender<Event>, cancel: CancellationToken) -> Self {
        let state = AppState {
            events,
            stat_password: config.stat_password.clone().into(),
        };
        Self {
            config,
            state,
            cancel,
        }
    }

    /// One webhook route per endpoint, plus /stat and the optional payment
    /// callback route.
    fn build_router(&self) -> Router {
        let mut router = Router::new().route("/stat", get(stat));
        for (name, endpoint) in &self.config.endpoints {
            let name = name.clone();
            router = router.route(
                &endpoint.listen_path,
                post(move |state: State<AppState>, update: Json<Update>| {
                    let endpoint = name.clone();
                    async move { webhook(state, endpoint, update).await }
                }),
            );
        }
        if let Some(payments) = &self.config.payments {
            router = router.route(&payments.callback_path, post(payment_callback));
        }
        router
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    pub async fn run(&self) -> Result<()> {
        let addr: SocketAddr = self
            .config
            .listen_address
            .parse()
            .map_err(|e| Error::config(format!("invalid listen_address: {e}")))?;
        let router = self.build_router();
        let listener = TcpListener::bind(addr).await?;
        info!("http surface listening on {addr}");

        let cancel = self.cancel.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
                info!("http surface shutting down");
            })
            .await?;
        Ok(())
    }
}

/// Telegram webhook for one endpoint. Always answers 200: a non-2xx makes
/// Telegram redeliver the same update over and over.
async fn webhook(
    State(state): State<AppState>,
    endpoint: String,
    Json(update): Json<Update>,
) -> StatusCode {
    if state
        .events
        .send(Event::ChatUpdate { endpoint, update })
        .await
        .is_err()
    {
        warn!("event loop is gone, dropping update");
    }
    StatusCode::OK
}

#[derive(Deserialize)]
struct StatQuery {
    #[serde(default)]
    password: String,
}

async fn stat(State(state): State<AppState>, Query(query): Query<StatQuery>) -> impl IntoResponse {
    if query.password.as_str() != &*state.stat_password {
        return StatusCode::FORBIDDEN.into_response();
    }
    let (reply, answer) = oneshot::channel();
    if state.events.send(Event::Stat { reply }).await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    match answer.await {
        Ok(stat) => Json(stat).into_response(),
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct PaymentCallback {
    local_id: String,
    status: String,
}

/// Gateway callback; the gateway's signature check runs in front of this
/// route (reverse proxy), so the body is trusted here.
async fn payment_callback(
    State(state): State<AppState>,
    Json(callback): Json<PaymentCallback>,
) -> StatusCode {
    let status = match callback.status.as_str() {
        "finished" => PaymentStatus::Finished,
        "canceled" => PaymentStatus::Canceled,
        "pending" => PaymentStatus::Pending,
        other => {
            warn!(status = other, "unknown payment status");
            return StatusCode::BAD_REQUEST;
        }
    };
    let (reply, answer) = oneshot::channel();
    let event = PaymentEvent {
        local_id: callback.local_id,
        status,
    };
    if state
        .events
        .send(Event::Payment { event, reply })
        .await
        .is_err()
    {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    match answer.await {
        Ok(true) => StatusCode::OK,
        Ok(false) => StatusCode::NOT_FOUND,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
