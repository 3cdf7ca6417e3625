//! Structured logging setup and per-request trace correlation.
//!
//! Every request runs inside a `request` span carrying its trace id. Work
//! spawned off the request (webhook orchestration) re-enters the same id via
//! [`with_trace_context`], so one delivery can be followed end to end.

use std::sync::OnceLock;

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use thiserror::Error;
use tokio::task_local;
use tracing::Instrument;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::AppConfig;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");
pub const TRACE_ID_HEADER: HeaderName = HeaderName::from_static("x-trace-id");

const MAX_INBOUND_ID_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: String,
}

impl TraceContext {
    pub fn generate() -> Self {
        Self {
            trace_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Adopts a caller-supplied id when it is short and printable.
    fn from_inbound(value: &HeaderValue) -> Option<Self> {
        let id = value.to_str().ok()?.trim();
        (!id.is_empty() && id.len() <= MAX_INBOUND_ID_LEN).then(|| Self {
            trace_id: id.to_string(),
        })
    }
}

task_local! {
    static ACTIVE_TRACE_CONTEXT: TraceContext;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl LogFormat {
    /// Unknown values fall back to JSON.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" => Self::Pretty,
            "compact" | "text" => Self::Compact,
            _ => Self::Json,
        }
    }
}

#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("failed to bridge log records into tracing: {0}")]
    LogBridge(#[from] log::SetLoggerError),
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

static INSTALLED: OnceLock<()> = OnceLock::new();

/// Installs the global subscriber once; later calls are no-ops.
///
/// `RUST_LOG` takes precedence over the configured `LOG_LEVEL`. Records
/// emitted through the `log` facade (SeaORM, sqlx) are forwarded as events.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryInitError> {
    if INSTALLED.get().is_some() {
        return Ok(());
    }

    tracing_log::LogTracer::init()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match LogFormat::parse(&config.log_format) {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init()?,
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init()?,
        LogFormat::Compact => registry.with(fmt::layer().compact()).try_init()?,
    }

    let _ = INSTALLED.set(());
    Ok(())
}

/// Runs `future` with `context` as the task's active trace context.
pub async fn with_trace_context<Fut, R>(context: TraceContext, future: Fut) -> R
where
    Fut: std::future::Future<Output = R>,
{
    ACTIVE_TRACE_CONTEXT.scope(context, future).await
}

pub fn current_trace_id() -> Option<String> {
    ACTIVE_TRACE_CONTEXT
        .try_with(|ctx| ctx.trace_id.clone())
        .ok()
}

/// Assigns a trace id to every request and echoes it back in `X-Trace-Id`.
///
/// An inbound `X-Request-Id` is reused so that GitHub delivery logs and ours line up.
pub async fn trace_context_middleware(mut request: Request, next: Next) -> Response {
    let context = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(TraceContext::from_inbound)
        .unwrap_or_else(TraceContext::generate);
    request.extensions_mut().insert(context.clone());

    let span = tracing::info_span!(
        "request",
        trace_id = %context.trace_id,
        method = %request.method(),
        path = %request.uri().path(),
    );
    let header_value = HeaderValue::from_str(&context.trace_id).ok();

    let mut response = with_trace_context(context, next.run(request))
        .instrument(span)
        .await;
    if let Some(value) = header_value {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trace_id_visible_inside_scope_only() {
        assert!(current_trace_id().is_none());

        let seen = with_trace_context(
            TraceContext {
                trace_id: "abc-123".to_string(),
            },
            async { current_trace_id() },
        )
        .await;

        assert_eq!(seen.as_deref(), Some("abc-123"));
        assert!(current_trace_id().is_none());
    }

    #[test]
    fn test_inbound_request_id_is_bounded() {
        let ok = HeaderValue::from_static("delivery-42");
        assert_eq!(
            TraceContext::from_inbound(&ok).map(|c| c.trace_id),
            Some("delivery-42".to_string())
        );

        let long = HeaderValue::from_str(&"x".repeat(MAX_INBOUND_ID_LEN + 1)).unwrap();
        assert!(TraceContext::from_inbound(&long).is_none());
        assert!(TraceContext::from_inbound(&HeaderValue::from_static("  ")).is_none());
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("TEXT"), LogFormat::Compact);
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("whatever"), LogFormat::Json);
    }
}
