//! Per-request proxy handling: report, then always let the request through

use chrono::Local;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::HOST;
use hyper::{Method, Request, Response};
use std::collections::HashMap;
use tokio::net::TcpStream;
use tracing::{debug, error};

use crate::models::{generate_id, ProxyCapture};
use crate::realtime::{RealtimeEvent, RealtimeHub};

/// Builds the capture event for a request as it enters the proxy
pub fn capture_of<B>(req: &Request<B>) -> ProxyCapture {
    let uri = req.uri();
    let host = req
        .headers()
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .or_else(|| uri.authority().map(|a| a.to_string()))
        .unwrap_or_else(|| "localhost".to_string());

    let url = if req.method() == Method::CONNECT {
        format!("https://{}", uri.authority().map(|a| a.to_string()).unwrap_or(host))
    } else if uri.scheme().is_some() {
        uri.to_string()
    } else {
        format!("https://{}{}", host, uri)
    };

    let headers: HashMap<String, String> = req
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
        .collect();

    ProxyCapture {
        id: generate_id("REAL"),
        method: req.method().to_string(),
        url,
        headers,
        timestamp: Local::now().format("%H:%M:%S").to_string(),
    }
}

/// Handle an incoming proxy request
pub async fn handle_request(
    req: Request<Incoming>,
    hub: RealtimeHub,
    client: reqwest::Client,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    let capture = capture_of(&req);
    debug!("Intercepted {} {} as {}", capture.method, capture.url, capture.id);
    hub.publish(RealtimeEvent::RequestIntercepted(capture));

    if req.method() == Method::CONNECT {
        Ok(tunnel(req))
    } else {
        forward(req, client).await
    }
}

/// Relays a plain HTTP request upstream unchanged
async fn forward(
    req: Request<Incoming>,
    client: reqwest::Client,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    let method = reqwest::Method::from_bytes(req.method().as_str().as_bytes())
        .unwrap_or(reqwest::Method::GET);
    let url = if req.uri().scheme().is_some() {
        req.uri().to_string()
    } else {
        let host = req
            .headers()
            .get(HOST)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("localhost");
        format!("http://{}{}", host, req.uri())
    };

    let mut upstream = client.request(method, &url);
    for (name, value) in req.headers() {
        let lower = name.as_str().to_ascii_lowercase();
        if lower != "host" && lower != "proxy-connection" {
            upstream = upstream.header(name.as_str(), value.as_bytes());
        }
    }

    let body = req.into_body().collect().await?.to_bytes();
    if !body.is_empty() {
        upstream = upstream.body(body);
    }

    match upstream.send().await {
        Ok(resp) => {
            let mut builder = Response::builder().status(resp.status().as_u16());
            for (name, value) in resp.headers() {
                let lower = name.as_str();
                if lower != "transfer-encoding" && lower != "connection" {
                    builder = builder.header(name.as_str(), value.as_bytes());
                }
            }
            let bytes = resp.bytes().await.unwrap_or_default();
            Ok(builder
                .body(Full::new(bytes))
                .unwrap_or_else(|_| Response::new(Full::new(Bytes::from("Proxy Error")))))
        }
        Err(e) => {
            error!("Failed to forward request to {}: {}", url, e);
            Ok(Response::builder()
                .status(502)
                .body(Full::new(Bytes::from(format!("Bad Gateway: {}", e))))
                .unwrap_or_else(|_| Response::new(Full::new(Bytes::from("Bad Gateway")))))
        }
    }
}

/// Answers a CONNECT and pipes the upgraded stream to the target
fn tunnel(req: Request<Incoming>) -> Response<Full<Bytes>> {
    let target = req
        .uri()
        .authority()
        .map(|a| a.to_string())
        .unwrap_or_default();

    tokio::task::spawn(async move {
        let mut upstream = match TcpStream::connect(&target).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to connect to {}: {}", target, e);
                return;
            }
        };
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                let mut client = hyper_util::rt::TokioIo::new(upgraded);
                if let Err(e) = tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
                    debug!("Tunnel to {} closed: {}", target, e);
                }
            }
            Err(e) => error!("CONNECT upgrade failed: {}", e),
        }
    });

    Response::builder()
        .status(200)
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}
