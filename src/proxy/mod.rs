//! Forward proxy feeding the interception bridge
//!
//! Every request passing through is stamped with a `REAL-` id and reported
//! on the realtime channel as `request_intercepted`. The proxy never blocks
//! or rewrites traffic: plain HTTP is forwarded as-is and CONNECT tunnels
//! are piped blind (metadata only).

pub mod handler;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::error::{Result, SimError};
use crate::realtime::RealtimeHub;

/// Intercepting forward proxy
pub struct InterceptProxy {
    hub: RealtimeHub,
    client: reqwest::Client,
}

impl InterceptProxy {
    pub fn new(hub: RealtimeHub) -> Self {
        // The upstream client must not itself go through a proxy from the environment.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { hub, client }
    }

    /// Accepts connections until the listener fails
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        info!("Forward proxy listening on http://{}", addr);

        loop {
            let (stream, client_addr) = listener
                .accept()
                .await
                .map_err(|e| SimError::ServerError(format!("Accept failed: {}", e)))?;

            let io = TokioIo::new(stream);
            let hub = self.hub.clone();
            let client = self.client.clone();
            debug!("Proxy connection from {}", client_addr);

            tokio::task::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    handler::handle_request(req, hub.clone(), client.clone())
                });

                if let Err(e) = http1::Builder::new()
                    .preserve_header_case(true)
                    .title_case_headers(true)
                    .serve_connection(io, service)
                    .with_upgrades()
                    .await
                {
                    let err_str = e.to_string();
                    if !err_str.contains("connection closed") && !err_str.contains("early eof") {
                        debug!("Proxy connection error from {}: {}", client_addr, e);
                    }
                }
            });
        }
    }
}
