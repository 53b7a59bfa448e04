use std::convert::Infallible;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Html;
use axum::Json;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::{ApiError, AppState};
use crate::core::board::Board;
use crate::core::error::ProducerError;
use crate::core::publisher::{EnqueueReceipt, MAX_ENQUEUE_COUNT};

const DASHBOARD: &str = include_str!("../../assets/dashboard.html");

pub const DEFAULT_GROUP_ID: &str = "group-A";

fn default_group() -> String {
    DEFAULT_GROUP_ID.to_owned()
}

/// A JSON number, or a string holding one.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Numeric {
    Number(f64),
    Text(String),
}

impl Numeric {
    fn value(&self) -> Option<f64> {
        match self {
            Numeric::Number(n) => Some(*n),
            Numeric::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandardRequest {
    #[serde(default)]
    pub count: Option<Numeric>,
    #[serde(default)]
    pub failure_rate: Option<Numeric>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FifoRequest {
    #[serde(default)]
    pub count: Option<Numeric>,
    #[serde(default = "default_group")]
    pub group_id: String,
    #[serde(default)]
    pub failure_rate: Option<Numeric>,
}

/// Whole number of messages, 1 when absent.
fn requested_count(raw: Option<&Numeric>) -> Result<usize, ProducerError> {
    let Some(raw) = raw else { return Ok(1) };
    let count = raw
        .value()
        .filter(|v| v.is_finite() && v.fract() == 0.0 && *v >= 1.0)
        .ok_or(ProducerError::InvalidCount)?;
    if count > MAX_ENQUEUE_COUNT as f64 {
        return Err(ProducerError::CountTooLarge {
            max: MAX_ENQUEUE_COUNT,
        });
    }
    Ok(count as usize)
}

/// Percentage in 0..=100, rounded to a whole percent; 0 when absent.
fn requested_failure_rate(raw: Option<&Numeric>) -> Result<u32, ProducerError> {
    let Some(raw) = raw else { return Ok(0) };
    let rate = raw.value().unwrap_or(f64::NAN);
    if !(0.0..=100.0).contains(&rate) {
        return Err(ProducerError::InvalidFailureRate(rate));
    }
    Ok(rate.round() as u32)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthBody {
    pub status: &'static str,
    pub tracked_retries: usize,
    pub pending_timers: usize,
    pub observers: usize,
}

pub async fn dashboard() -> Html<&'static str> {
    Html(DASHBOARD)
}

pub async fn enqueue_standard(
    State(state): State<AppState>,
    payload: Result<Json<StandardRequest>, JsonRejection>,
) -> Result<Json<EnqueueReceipt>, ApiError> {
    let Json(req) = payload?;
    let count = requested_count(req.count.as_ref())?;
    let failure_rate = requested_failure_rate(req.failure_rate.as_ref())?;
    let receipt = state.producer.enqueue_standard(count, failure_rate).await?;
    Ok(Json(receipt))
}

pub async fn enqueue_fifo(
    State(state): State<AppState>,
    payload: Result<Json<FifoRequest>, JsonRejection>,
) -> Result<Json<EnqueueReceipt>, ApiError> {
    let Json(req) = payload?;
    let count = requested_count(req.count.as_ref())?;
    let failure_rate = requested_failure_rate(req.failure_rate.as_ref())?;
    let receipt = state
        .producer
        .enqueue_fifo(count, req.group_id, failure_rate)
        .await?;
    Ok(Json(receipt))
}

/// Server-sent events: the current board first, then one event per mutation.
pub async fn events(
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let subscription = state.engine.subscribe().await?;
    debug!(target: "queueboard::http", subscriber = %subscription.id(), "Event stream opened");
    let stream = subscription
        .into_stream()
        .map(|snapshot| Ok(Event::default().data(snapshot.as_str())));
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

pub async fn board(State(state): State<AppState>) -> Result<Json<Board>, ApiError> {
    Ok(Json(state.engine.snapshot().await?))
}

pub async fn health(State(state): State<AppState>) -> Result<Json<HealthBody>, ApiError> {
    let stats = state.engine.stats().await?;
    Ok(Json(HealthBody {
        status: "ok",
        tracked_retries: stats.tracked_retries,
        pending_timers: stats.pending_timers,
        observers: stats.observers,
    }))
}
