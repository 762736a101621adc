//! HTTP reporting API over the sample logs

use crate::aggregate::{aggregate_log, to_chart_series};
use crate::logging::LogContext;
use crate::protocol::{ApiResponse, ProcessSummary};
use crate::ranking::Metric;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument, Span};

const DASHBOARD_HTML: &str = include_str!("../assets/dashboard.html");

/// What a request resolves to: the dashboard page or an API body.
#[derive(Debug)]
pub enum Reply {
    Page(&'static str),
    Api(StatusCode, ApiResponse),
}

/// Answers API requests by re-aggregating the logs on every call.
pub struct ReportService {
    monitoring_log: PathBuf,
    snapshot_log: PathBuf,
    span: Span,
}

impl ReportService {
    pub fn new(monitoring_log: PathBuf, snapshot_log: PathBuf, log: &LogContext) -> Self {
        Self {
            monitoring_log,
            snapshot_log,
            span: log.component("reporting"),
        }
    }

    /// Serves the dashboard at `/`, everything else through `respond`.
    pub fn route(&self, method: &Method, path: &str) -> Reply {
        if method == Method::GET && matches!(path, "/" | "/index.html") {
            return Reply::Page(DASHBOARD_HTML);
        }
        let (status, body) = self.respond(method, path);
        Reply::Api(status, body)
    }

    /// Routes one API request. Reads files, so call it off the async workers.
    pub fn respond(&self, method: &Method, path: &str) -> (StatusCode, ApiResponse) {
        let _enter = self.span.clone().entered();
        if method != Method::GET {
            return (
                StatusCode::METHOD_NOT_ALLOWED,
                ApiResponse::failure(format!("method {method} not allowed")),
            );
        }

        let result = match path {
            "/api/memory-monitoring" => serde_json::to_value(to_chart_series(
                &aggregate_log(&self.monitoring_log),
                Metric::Memory,
            ))
            .map(|data| (data, Some("Memory Usage (Performance Monitoring)"))),
            "/api/memory-snapshot" => serde_json::to_value(to_chart_series(
                &aggregate_log(&self.snapshot_log),
                Metric::Memory,
            ))
            .map(|data| (data, Some("Memory Usage (Performance Snapshot)"))),
            "/api/cpu-usage" => serde_json::to_value(to_chart_series(
                &aggregate_log(&self.monitoring_log),
                Metric::Cpu,
            ))
            .map(|data| (data, Some("CPU Usage (Performance Monitoring)"))),
            "/api/process-summary" => serde_json::to_value(ProcessSummary::from_aggregates(
                &aggregate_log(&self.monitoring_log),
                &aggregate_log(&self.snapshot_log),
            ))
            .map(|data| (data, None)),
            "/api/health" => Ok((serde_json::json!({ "status": "ok" }), None)),
            _ => {
                return (
                    StatusCode::NOT_FOUND,
                    ApiResponse::failure(format!("no route for {path}")),
                )
            }
        };

        match result {
            Ok((data, title)) => {
                debug!(path, "request served");
                (StatusCode::OK, ApiResponse::ok(data, title))
            }
            Err(e) => {
                error!(path, error = %e, "failed to encode response");
                (StatusCode::INTERNAL_SERVER_ERROR, ApiResponse::failure(e.to_string()))
            }
        }
    }
}

pub struct ReportServer {
    listener: TcpListener,
    service: Arc<ReportService>,
}

impl ReportServer {
    pub async fn bind(addr: &str, service: ReportService) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Reporting API listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            service: Arc::new(service),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` turns true or its sender drops.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) {
        let span = self.service.span.clone();
        async move {
            loop {
                if *shutdown.borrow_and_update() {
                    break;
                }
                tokio::select! {
                    accepted = self.listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            let service = Arc::clone(&self.service);
                            tokio::spawn(async move {
                                let conn = http1::Builder::new().serve_connection(
                                    TokioIo::new(stream),
                                    service_fn(move |req| handle(Arc::clone(&service), req)),
                                );
                                if let Err(e) = conn.await {
                                    warn!(%peer, error = %e, "connection failed");
                                }
                            });
                        }
                        Err(e) => error!("Failed to accept connection: {}", e),
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            info!("Reporting API stopped");
        }
        .instrument(span)
        .await
    }
}

async fn handle(
    service: Arc<ReportService>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let reply = match tokio::task::spawn_blocking(move || service.route(&method, &path)).await {
        Ok(reply) => reply,
        Err(e) => Reply::Api(
            StatusCode::INTERNAL_SERVER_ERROR,
            ApiResponse::failure(format!("request handler failed: {e}")),
        ),
    };
    Ok(match reply {
        Reply::Page(html) => html_response(html),
        Reply::Api(status, body) => json_response(status, &body),
    })
}

fn html_response(html: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(html.as_bytes())));
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}

fn json_response(status: StatusCode, body: &ApiResponse) -> Response<Full<Bytes>> {
    let bytes = serde_json::to_vec(body)
        .unwrap_or_else(|_| br#"{"success":false,"error":"encoding failed"}"#.to_vec());
    let mut response = Response::new(Full::new(Bytes::from(bytes)));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}
