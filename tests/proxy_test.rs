//! Integration tests for the intercepting forward proxy

use securecomm::proxy::InterceptProxy;
use securecomm::realtime::{RealtimeEvent, RealtimeHub};
use std::time::Duration;
use tokio::net::TcpListener;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn start_proxy(hub: RealtimeHub) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let proxy = InterceptProxy::new(hub);
    tokio::spawn(async move { proxy.serve(listener).await });
    format!("http://{addr}")
}

fn proxied_client(proxy_url: &str) -> reqwest::Client {
    reqwest::Client::builder()
        .proxy(reqwest::Proxy::http(proxy_url).unwrap())
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_http_request_is_reported_and_forwarded() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/inbox"))
        .and(header("x-session", "abc"))
        .respond_with(ResponseTemplate::new(200).set_body_string("3 new messages"))
        .mount(&upstream)
        .await;

    let hub = RealtimeHub::default();
    let mut events = hub.subscribe();
    let proxy_url = start_proxy(hub).await;

    let resp = proxied_client(&proxy_url)
        .get(format!("{}/inbox", upstream.uri()))
        .header("x-session", "abc")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "3 new messages");

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    match event {
        RealtimeEvent::RequestIntercepted(capture) => {
            assert!(capture.id.starts_with("REAL-"));
            assert_eq!(capture.method, "GET");
            assert_eq!(capture.url, format!("{}/inbox", upstream.uri()));
            assert_eq!(capture.headers.get("x-session").map(String::as_str), Some("abc"));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_post_body_passes_through() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/send_msg"))
        .respond_with(ResponseTemplate::new(201).set_body_string("ok"))
        .expect(1)
        .mount(&upstream)
        .await;

    let hub = RealtimeHub::default();
    let proxy_url = start_proxy(hub).await;

    let resp = proxied_client(&proxy_url)
        .post(format!("{}/v1/send_msg", upstream.uri()))
        .body("Hey buddy")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let received = upstream.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].body, b"Hey buddy");
}

#[tokio::test]
async fn test_unreachable_upstream_is_bad_gateway() {
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = closed.local_addr().unwrap();
    drop(closed);

    let proxy_url = start_proxy(RealtimeHub::default()).await;
    let resp = proxied_client(&proxy_url)
        .get(format!("http://{dead_addr}/"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
}
