use crate::CRATE_NAME;
use crate::error::ServiceError;
use crate::service::CertificateService;
use http::{Method, StatusCode};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::pin;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const MAX_OPEN_CONNECTIONS: usize = 200;

const CERT_PATH_PREFIX: &str = "/cert/";

/// Accepts connections on `listener` until `shutdown` is cancelled, then lets open connections
/// finish their current request.
pub async fn serve(
    listener: TcpListener,
    service: Arc<CertificateService>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let connection_limit = Arc::new(Semaphore::new(MAX_OPEN_CONNECTIONS));
    let tracker = tokio_util::task::TaskTracker::new();
    info!("Listening on {}", listener.local_addr()?);
    loop {
        let permit = tokio::select! {
            () = shutdown.cancelled() => break,
            permit = connection_limit.clone().acquire_owned() => permit?,
        };
        let (stream, client_addr) = tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Accepting connection failed: {e}");
                    continue;
                }
            },
        };
        let service = service.clone();
        let shutdown = shutdown.clone();
        tracker.spawn(async move {
            serve_connection(stream, client_addr, service, shutdown).await;
            drop(permit);
        });
    }
    tracker.close();
    debug!("Waiting for {} open connections to finish", tracker.len());
    tracker.wait().await;
    info!("Server stopped");
    Ok(())
}

async fn serve_connection(
    stream: TcpStream,
    client_addr: SocketAddr,
    service: Arc<CertificateService>,
    shutdown: CancellationToken,
) {
    let io = TokioIo::new(stream);
    let handler = service_fn(move |request: Request<hyper::body::Incoming>| {
        let service = service.clone();
        async move {
            let method = request.method().clone();
            let path = request.uri().path().to_string();
            let response = route(&service, &method, &path).await;
            info!("{client_addr} {method} {path} {}", response.status().as_u16());
            Ok::<_, Infallible>(response)
        }
    });
    let mut connection = pin!(http1::Builder::new().serve_connection(io, handler));
    let result = tokio::select! {
        result = connection.as_mut() => result,
        () = shutdown.cancelled() => {
            // Finish the in-flight request, then close
            connection.as_mut().graceful_shutdown();
            connection.as_mut().await
        }
    };
    if let Err(e) = result {
        debug!("Connection from {client_addr} failed: {e}");
    }
}

/// Maps one request onto the service. Never fails; errors become error responses.
pub async fn route(service: &CertificateService, method: &Method, path: &str) -> Response<Full<Bytes>> {
    let is_known_path = path == "/health" || path == "/certs" || path.starts_with(CERT_PATH_PREFIX);
    if !is_known_path {
        return text_response(StatusCode::NOT_FOUND, "Not found");
    }
    if method != Method::GET {
        return text_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
    }

    let result = match path {
        "/health" => return text_response(StatusCode::OK, "ok"),
        "/certs" => service
            .list_certificates()
            .await
            .and_then(|certificates| json_body(&certificates)),
        _ => match decode_domain_param(&path[CERT_PATH_PREFIX.len()..]) {
            Ok(domain_param) => service
                .get_certificate(&domain_param)
                .await
                .and_then(|response| json_body(&response)),
            Err(e) => Err(e),
        },
    };

    match result {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header(http::header::SERVER, CRATE_NAME)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))
            .unwrap_or_else(|e| internal_error(&e)),
        Err(e) => error_response(&e),
    }
}

fn decode_domain_param(raw: &str) -> Result<String, ServiceError> {
    percent_encoding::percent_decode_str(raw)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| ServiceError::InvalidDomain(raw.to_string()))
}

fn json_body<T: Serialize>(value: &T) -> Result<Vec<u8>, ServiceError> {
    serde_json::to_vec(value).map_err(|e| ServiceError::Internal(e.into()))
}

fn error_response(err: &ServiceError) -> Response<Full<Bytes>> {
    if let ServiceError::Internal(inner) = err {
        error!("Request failed: {inner:#}");
    }
    text_response(err.status_code(), &err.to_string())
}

fn internal_error(err: &http::Error) -> Response<Full<Bytes>> {
    error!("Building response failed: {err}");
    let mut response = Response::new(Full::new(Bytes::from_static(b"Internal error")));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

fn text_response(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(http::header::SERVER, CRATE_NAME)
        .header(http::header::CONTENT_TYPE, "text/plain")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap_or_else(|e| internal_error(&e))
}
