//! Observability module for centralized metrics, tracing, and logging setup.
//!
//! This module provides:
//! - Prometheus metrics recording and export
//! - Structured logging and optional OTLP trace export
//! - Liveness and readiness endpoints for the pipeline host

pub mod health_checks;
pub mod metrics;
pub mod tracing_mod;

use std::net::SocketAddr;

use anyhow::Result;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use metrics_exporter_prometheus::PrometheusHandle;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::observability_config::ObservabilityConfig;

pub use self::health_checks::ReadinessProbe;
pub use self::metrics::{
    record_classification, record_document_processed, record_field_extracted, record_manual_review,
    record_ocr_operation, record_persistence, record_pool_state, record_segmentation,
};
pub use self::tracing_mod::{db_span, ocr_span, pipeline_span};

/// Running observability stack. Call [`ObservabilityHandle::shutdown`] before exit.
#[derive(Debug)]
pub struct ObservabilityHandle {
    shutdown: CancellationToken,
    server: Option<JoinHandle<()>>,
    tracer_provider: Option<SdkTracerProvider>,
}

impl ObservabilityHandle {
    /// Stop the health server and flush pending spans
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Some(server) = self.server {
            if let Err(e) = server.await {
                tracing::warn!("Health server task ended abnormally: {}", e);
            }
        }
        if let Some(provider) = self.tracer_provider {
            if let Err(e) = provider.shutdown() {
                tracing::warn!("Failed to flush OpenTelemetry spans: {}", e);
            }
        }
    }
}

/// Initialize logging, metrics, tracing export and the health server
pub async fn init_observability_with_config(
    config: ObservabilityConfig,
    probe: ReadinessProbe,
) -> Result<ObservabilityHandle> {
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid observability configuration: {}", e))?;

    tracing_mod::init_tracing_with_config(&config)?;
    let tracer_provider = tracing_mod::init_opentelemetry_tracing_with_config(&config)?;

    let shutdown = CancellationToken::new();
    let server = if config.enable_metrics_export {
        let metrics_handle = metrics::init_metrics_with_config(&config)?;
        Some(start_health_server(metrics_handle, config.metrics_port, probe, shutdown.clone()).await?)
    } else {
        None
    };

    tracing::info!(
        environment = %config.environment,
        otlp_endpoint = ?config.otlp_endpoint,
        metrics_port = %config.metrics_port,
        "Observability stack initialized successfully"
    );
    Ok(ObservabilityHandle {
        shutdown,
        server,
        tracer_provider,
    })
}

async fn start_health_server(
    metrics_handle: PrometheusHandle,
    port: u16,
    probe: ReadinessProbe,
    shutdown: CancellationToken,
) -> Result<JoinHandle<()>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on {}", addr);

    Ok(tokio::spawn(async move {
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, _)) => {
                    let metrics_handle = metrics_handle.clone();
                    let probe = probe.clone();

                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);
                        let service = hyper::service::service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
                            let metrics_handle = metrics_handle.clone();
                            let probe = probe.clone();
                            async move { Ok::<_, std::convert::Infallible>(route(&req, &metrics_handle, &probe).await) }
                        });

                        if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                            tracing::error!("Error serving connection: {:?}", err);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Error accepting connection: {}", e);
                }
            }
        }
        tracing::info!("Metrics server stopped");
    }))
}

async fn route(
    req: &hyper::Request<hyper::body::Incoming>,
    metrics_handle: &PrometheusHandle,
    probe: &ReadinessProbe,
) -> hyper::Response<String> {
    match (req.method(), req.uri().path()) {
        (&hyper::Method::GET, "/metrics") => {
            let mut response = hyper::Response::new(metrics_handle.render());
            response.headers_mut().insert(
                "content-type",
                hyper::header::HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
            );
            response
        }
        (&hyper::Method::GET, "/health/live") => hyper::Response::new("OK".to_string()),
        (&hyper::Method::GET, "/health/ready") => match probe.check().await {
            Ok(()) => hyper::Response::new("OK".to_string()),
            Err(e) => {
                let mut response = hyper::Response::new(format!("NOT READY: {}", e));
                *response.status_mut() = hyper::StatusCode::SERVICE_UNAVAILABLE;
                response
            }
        },
        _ => {
            let mut response = hyper::Response::new("Not Found".to_string());
            *response.status_mut() = hyper::StatusCode::NOT_FOUND;
            response
        }
    }
}
