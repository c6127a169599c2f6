use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::cors;
use crate::error::{text_error_response, text_response, GatewayBody, GatewayErrorCode};
use crate::handlers::{self, AppState};

/// Header name for request ID
const X_REQUEST_ID: &str = "x-request-id";

/// The HTTP gateway in front of the backend services
pub struct GatewayServer {
    bind_addr: SocketAddr,
    state: Arc<AppState>,
    shutdown_rx: watch::Receiver<bool>,
}

impl GatewayServer {
    pub fn new(bind_addr: SocketAddr, state: Arc<AppState>, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            bind_addr,
            state,
            shutdown_rx,
        }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shutdown
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        let addr = listener.local_addr()?;
        info!(addr = %addr, "Gateway listening (HTTP/1.1 and HTTP/2)");

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let state = Arc::clone(&self.state);
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, addr, state).await {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    // A dropped sender also means shutdown
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Gateway shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection<S>(stream: S, addr: SocketAddr, state: Arc<AppState>) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let state = Arc::clone(&state);
        async move { Ok::<_, hyper::Error>(handle_request(req, state, addr).await) }
    });

    AutoBuilder::new(TokioExecutor::new())
        .http1()
        .preserve_header_case(true)
        .http2()
        .max_concurrent_streams(250)
        .serve_connection(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

    Ok(())
}

/// Route one request and apply the response middleware
pub async fn handle_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
    client_addr: SocketAddr,
) -> Response<GatewayBody> {
    let request_id = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!(%method, path, request_id, client = %client_addr, "Incoming request");

    let mut response = if cors::is_preflight(&req) {
        cors::preflight_response(&req)
    } else {
        route(req, &state).await
    };

    cors::apply_cors_headers(response.headers_mut());
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }

    debug!(%method, path, request_id, status = %response.status(), "Request complete");
    response
}

async fn route(req: Request<Incoming>, state: &AppState) -> Response<GatewayBody> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    if (method == Method::GET || method == Method::HEAD) && path == "/" {
        return handlers::health();
    }

    if method != Method::POST {
        return not_found(&method, &path);
    }

    match path.as_str() {
        "/summarize" | "/ideagenerator" | "/describe" | "/generatepdf" => {}
        _ => return not_found(&method, &path),
    }

    let body = match read_json_body(req, state.config.server.max_body_bytes).await {
        Ok(body) => body,
        Err(response) => return response,
    };

    match path.as_str() {
        "/summarize" => handlers::summarize(state, &body).await,
        "/ideagenerator" => handlers::generate_ideas(state, &body).await,
        "/describe" => handlers::describe(state, &body).await,
        _ => handlers::generate_pdf(state, &body).await,
    }
}

fn not_found(method: &Method, path: &str) -> Response<GatewayBody> {
    let mut response = text_response(
        GatewayErrorCode::NotFound.status_code(),
        format!("Cannot {} {}", method, path),
    );
    response.headers_mut().insert(
        crate::error::X_GATEWAY_ERROR,
        HeaderValue::from_static(GatewayErrorCode::NotFound.as_header_value()),
    );
    response
}

/// Whether the request declares a JSON body
fn is_json_content_type<B>(req: &Request<B>) -> bool {
    req.headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|mime| {
            let mime = mime.trim().to_ascii_lowercase();
            mime == "application/json" || (mime.starts_with("application/") && mime.ends_with("+json"))
        })
        .unwrap_or(false)
}

/// Parse the request body as a JSON object or array
///
/// Non-JSON content types and zero-length bodies become an empty object, leaving
/// the route's own field validation to reject them.
async fn read_json_body(req: Request<Incoming>, limit: usize) -> Result<Value, Response<GatewayBody>> {
    if !is_json_content_type(&req) {
        return Ok(Value::Object(Default::default()));
    }

    let bytes = match Limited::new(req.into_body(), limit).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            return Err(text_error_response(
                GatewayErrorCode::PayloadTooLarge,
                "request entity too large",
            ));
        }
        Err(e) => {
            debug!(error = %e, "Failed to read request body");
            return Err(text_error_response(
                GatewayErrorCode::InvalidBody,
                "Failed to read request body",
            ));
        }
    };

    parse_json_body(&bytes).map_err(|message| text_error_response(GatewayErrorCode::InvalidBody, message))
}

fn parse_json_body(bytes: &[u8]) -> Result<Value, String> {
    if bytes.is_empty() {
        return Ok(Value::Object(Default::default()));
    }

    match serde_json::from_slice::<Value>(bytes) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => Ok(value),
        Ok(_) => Err("Invalid JSON body: expected an object or array".to_string()),
        Err(e) => Err(format!("Invalid JSON body: {}", e)),
    }
}
