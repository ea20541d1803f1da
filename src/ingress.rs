//! Capture ingress: HTTP endpoint for external bridging processes
//!
//! `POST /capture` with any JSON object relays it to every realtime
//! observer as a `new_data` event and answers `{"status":"captured"}`.
//! `POST /global_packets` lets peers append documents to the shared store.

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE, ORIGIN};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::error::{Result, SimError};
use crate::realtime::{RealtimeEvent, RealtimeHub};
use crate::store::MemoryPacketStore;

/// Marker added to every relayed capture body
pub const CAPTURE_TYPE: &str = "MITM_PACKET";

/// Shared state behind every ingress connection
#[derive(Debug, Clone)]
pub struct Ingress {
    hub: RealtimeHub,
    store: Option<MemoryPacketStore>,
    allowed_origins: Arc<Vec<String>>,
}

impl Ingress {
    pub fn new(hub: RealtimeHub, allowed_origins: Vec<String>) -> Self {
        Self {
            hub,
            store: None,
            allowed_origins: Arc::new(allowed_origins),
        }
    }

    /// Enables `POST /global_packets`
    pub fn with_store(mut self, store: MemoryPacketStore) -> Self {
        self.store = Some(store);
        self
    }
}

/// Serves the ingress endpoints on an already bound listener
pub async fn serve(listener: TcpListener, ingress: Ingress) -> Result<()> {
    let addr = listener.local_addr()?;
    info!("Capture ingress listening on http://{}", addr);

    loop {
        let (stream, remote_addr) = listener
            .accept()
            .await
            .map_err(|e| SimError::ServerError(format!("Accept failed: {}", e)))?;
        let ingress = ingress.clone();
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let ingress = ingress.clone();
                async move { handle_request(req, ingress).await }
            });

            if let Err(e) = hyper::server::conn::http1::Builder::new()
                .serve_connection(io, service)
                .await
            {
                debug!("Capture connection error from {}: {}", remote_addr, e);
            }
        });
    }
}

async fn handle_request(
    req: Request<Incoming>,
    ingress: Ingress,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    let origin = req
        .headers()
        .get(ORIGIN)
        .and_then(|v| v.to_str().ok())
        .filter(|o| ingress.allowed_origins.iter().any(|a| a.as_str() == *o))
        .map(str::to_string);
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match (&method, path.as_str()) {
        (&Method::OPTIONS, "/capture") => empty(StatusCode::NO_CONTENT),
        (&Method::POST, "/capture") => {
            let body = req.into_body().collect().await?.to_bytes();
            capture(&body, &ingress.hub)
        }
        (&Method::POST, "/global_packets") => match &ingress.store {
            Some(store) => {
                let body = req.into_body().collect().await?.to_bytes();
                append_packet(&body, store)
            }
            None => json_response(StatusCode::NOT_FOUND, json!({ "error": "not found" })),
        },
        _ => json_response(StatusCode::NOT_FOUND, json!({ "error": "not found" })),
    };

    Ok(with_cors(response, origin.as_deref()))
}

fn parse_object(body: &[u8]) -> Option<serde_json::Map<String, Value>> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn not_an_object() -> Response<Full<Bytes>> {
    debug!("Rejected body: not a JSON object");
    json_response(
        StatusCode::BAD_REQUEST,
        json!({ "error": "expected a JSON object" }),
    )
}

fn capture(body: &[u8], hub: &RealtimeHub) -> Response<Full<Bytes>> {
    let Some(mut data) = parse_object(body) else {
        return not_an_object();
    };

    data.insert("type".to_string(), Value::String(CAPTURE_TYPE.to_string()));
    let observers = hub.publish(RealtimeEvent::NewData(Value::Object(data)));
    debug!("Capture relayed to {} observer(s)", observers);

    json_response(StatusCode::OK, json!({ "status": "captured" }))
}

fn append_packet(body: &[u8], store: &MemoryPacketStore) -> Response<Full<Bytes>> {
    let Some(doc) = parse_object(body) else {
        return not_an_object();
    };
    let key = store.push(Value::Object(doc));
    json_response(StatusCode::OK, json!({ "status": "stored", "id": key }))
}

fn json_response(status: StatusCode, body: Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn empty(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

fn with_cors(mut response: Response<Full<Bytes>>, origin: Option<&str>) -> Response<Full<Bytes>> {
    if let Some(value) = origin.and_then(|o| HeaderValue::from_str(o).ok()) {
        let headers = response.headers_mut();
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
        headers.insert(
            hyper::header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, POST"),
        );
        headers.insert(
            hyper::header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("content-type"),
        );
    }
    response
}
