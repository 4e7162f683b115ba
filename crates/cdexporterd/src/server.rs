//! Pull-metrics HTTP endpoint.
//!
//! Only reads the registry; collection state never crosses into here.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::net::TcpListener;
use tower_http::compression::CompressionLayer;
use tracing::{error, info};

use cdexporter_core::metrics::encode_text;

pub(crate) fn router(registry: Arc<Registry>) -> Router {
    Router::new()
        .route("/metrics", get(handle_metrics))
        .route("/health", get(handle_health))
        .with_state(registry)
        .layer(CompressionLayer::new())
}

async fn handle_metrics(State(registry): State<Arc<Registry>>) -> Response {
    match encode_text(&registry) {
        Ok(body) => (
            [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn handle_health() -> &'static str {
    "ok"
}

/// Serves the router until the runtime shuts down.
pub(crate) async fn serve(listener: TcpListener, registry: Arc<Registry>) {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "metrics available at http://{}/metrics", addr);
    }
    if let Err(e) = axum::serve(listener, router(registry)).await {
        error!(error = %e, "metrics server error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use cdexporter_core::classify::QueueCategory;
    use cdexporter_core::metrics::{ExporterMetrics, MetricSink};
    use tower::ServiceExt;

    #[tokio::test]
    async fn metrics_endpoint_renders_registry() {
        let registry = Arc::new(Registry::new());
        let metrics = ExporterMetrics::new(&registry).unwrap();
        metrics.set_processes(QueueCategory::Hold, 4).unwrap();
        metrics.record_scrape_error();

        let response = router(registry)
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(content_type.starts_with("text/plain"));

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("ibm_cd_processes_hold_total 4"));
        assert!(text.contains("ibm_cd_scrape_errors_total 1"));
    }

    #[tokio::test]
    async fn health_endpoint_answers_ok() {
        let registry = Arc::new(Registry::new());
        let response = router(registry)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"ok");
    }
}
