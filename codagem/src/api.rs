use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde_json::{Value, json};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::MonitorError;
use crate::registry::{EndpointStats, MonitorRegistry};
use crate::types::{ActiveSession, OneShotProbe};

/// Erro da API: corpo `{ "error": ... }` com o status HTTP correspondente.
pub struct ApiError(MonitorError);

impl From<MonitorError> for ApiError {
    fn from(error: MonitorError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            MonitorError::InvalidAddress(_) => StatusCode::BAD_REQUEST,
            MonitorError::ResourceExhaustion { .. } | MonitorError::ProbeUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub async fn start_monitor(
    State(registry): State<Arc<MonitorRegistry>>,
    Path(address): Path<String>,
) -> ApiResult<Value> {
    let outcome = registry.start_monitoring(&address)?;
    Ok(Json(json!({
        "address": address,
        "status": "ok",
        "outcome": outcome,
        "timestamp": Utc::now(),
    })))
}

pub async fn stop_monitor(
    State(registry): State<Arc<MonitorRegistry>>,
    Path(address): Path<String>,
) -> ApiResult<Value> {
    let final_state = registry.stop_monitoring(&address).await?;
    Ok(Json(json!({
        "address": address,
        "status": "ok",
        "stopped": final_state.is_some(),
        "final": final_state,
        "timestamp": Utc::now(),
    })))
}

pub async fn get_stats(
    State(registry): State<Arc<MonitorRegistry>>,
    Path(address): Path<String>,
) -> ApiResult<EndpointStats> {
    debug!("Consulta de estatísticas para {}", address);
    Ok(Json(registry.get_stats(&address)?))
}

pub async fn list_monitors(State(registry): State<Arc<MonitorRegistry>>) -> Json<Vec<ActiveSession>> {
    Json(registry.active())
}

pub async fn probe_once(
    State(registry): State<Arc<MonitorRegistry>>,
    Path(address): Path<String>,
) -> ApiResult<OneShotProbe> {
    Ok(Json(registry.probe_once(&address).await?))
}

pub fn create_router(registry: Arc<MonitorRegistry>) -> Router {
    Router::new()
        .route("/monitor", get(list_monitors))
        .route(
            "/monitor/{address}",
            post(start_monitor).delete(stop_monitor).get(get_stats),
        )
        .route("/probe/{address}", post(probe_once))
        .with_state(registry)
}

pub async fn start_server(
    listen_addr: &str,
    registry: Arc<MonitorRegistry>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(registry);
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("Falha ao abrir a porta da API em {}", listen_addr))?;
    info!("API de monitoramento: http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Servidor HTTP falhou")?;
    Ok(())
}
