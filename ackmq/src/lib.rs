pub mod config;
pub mod listeners;

use std::{net::SocketAddr, sync::Arc};

use ackmq_broker::{Broker, BrokerError};
use ackmq_models::{
    core::Destination,
    errors::SendableError,
    web::{ErrorResponse, SendQuery},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use log::{error, info};
use tokio::{net::TcpListener, sync::Notify};

#[derive(Clone)]
pub struct AppState {
    broker: Arc<dyn Broker>,
    queue: Destination,
    topic: Destination,
}

impl AppState {
    pub fn new(broker: Arc<dyn Broker>, queue: Destination, topic: Destination) -> Self {
        Self {
            broker,
            queue,
            topic,
        }
    }

    fn destination(&self, kind: &str) -> Option<&Destination> {
        match kind {
            "queue" => Some(&self.queue),
            "topic" => Some(&self.topic),
            _ => None,
        }
    }
}

async fn send_queue(State(state): State<AppState>, Query(query): Query<SendQuery>) -> Response {
    send_message(&state, &state.queue, query).await
}

async fn send_topic(State(state): State<AppState>, Query(query): Query<SendQuery>) -> Response {
    send_message(&state, &state.topic, query).await
}

async fn send_message(state: &AppState, destination: &Destination, query: SendQuery) -> Response {
    let payload = query.text.unwrap_or_default();
    match state.broker.send(destination, payload).await {
        Ok(message_id) => {
            info!("Sent message {} to {}", message_id, destination);
            "success".into_response()
        }
        Err(err) => {
            error!("Failed to send to {}: {}", destination, err);
            error_response(err)
        }
    }
}

async fn get_stats(State(state): State<AppState>, Path(kind): Path<String>) -> Response {
    let Some(destination) = state.destination(&kind) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match state.broker.stats(destination).await {
        Ok(stats) => Json(stats).into_response(),
        Err(err) => error_response(err),
    }
}

async fn get_dead_letters(State(state): State<AppState>, Path(kind): Path<String>) -> Response {
    let Some(destination) = state.destination(&kind) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match state.broker.dead_letters(destination).await {
        Ok(messages) => Json(messages).into_response(),
        Err(err) => error_response(err),
    }
}

fn error_response(err: BrokerError) -> Response {
    let (status, code) = match &err {
        BrokerError::Connection(_) | BrokerError::Closed => {
            (StatusCode::SERVICE_UNAVAILABLE, "broker_connection")
        }
        BrokerError::InvalidDestination(_) => (StatusCode::BAD_REQUEST, "invalid_destination"),
        BrokerError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    };
    (status, Json(ErrorResponse::new(code, err.to_string()))).into_response()
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/queue/test", get(send_queue))
        .route("/topic/test", get(send_topic))
        .route("/stats/:kind", get(get_stats))
        .route("/dead-letters/:kind", get(get_dead_letters))
        .with_state(state)
}

pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: Arc<Notify>,
) -> Result<(), SendableError> {
    info!("Producer endpoints listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.notified().await })
        .await?;
    info!("Web server stopped");
    Ok(())
}

pub async fn run_webserver(
    addr: SocketAddr,
    state: AppState,
    shutdown: Arc<Notify>,
) -> Result<(), SendableError> {
    let listener = TcpListener::bind(addr).await?;
    serve(listener, state, shutdown).await
}
