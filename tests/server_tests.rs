use std::net::SocketAddr;
use std::time::Duration;

use portfolio::settings::{Profile, Settings};
use portfolio::{AppState, build_router};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const TEMPLATE_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/templates");

async fn start_server() -> SocketAddr {
    let mut settings = Settings::for_profile(Profile::Testing);
    settings.template.dir = TEMPLATE_DIR.to_string();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(build_router(AppState::new(settings)).serve(listener));
    addr
}

/// Sends one raw HTTP/1.1 request and returns the full response text.
async fn send(addr: SocketAddr, request: String) -> String {
    let mut socket = TcpStream::connect(addr).await.unwrap();
    socket.write_all(request.as_bytes()).await.unwrap();
    let mut buffer = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), socket.read_to_end(&mut buffer))
        .await
        .expect("server did not close the connection")
        .unwrap();
    String::from_utf8_lossy(&buffer).into_owned()
}

fn post(path: &str, content_type: &str, extra_headers: &str, body: &str) -> String {
    format!(
        "POST {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\
         Content-Type: {content_type}\r\nContent-Length: {}\r\n{extra_headers}\r\n{body}",
        body.len()
    )
}

#[tokio::test]
async fn test_urlencoded_contact_form_is_decoded() {
    let addr = start_server().await;
    let body = "name=Alice&email=a%40b.com&message=Hello+there";
    let response = send(addr, post("/contact", "application/x-www-form-urlencoded", "", body)).await;

    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
    assert!(response.contains("Thanks for your message."));
}

#[tokio::test]
async fn test_unreadable_form_body_counts_as_empty_form() {
    let addr = start_server().await;
    let body = "name=Alice&email=a%40b.com&message=Hello+there";
    let response = send(addr, post("/contact", "text/plain", "", body)).await;

    assert!(response.starts_with("HTTP/1.1 422"), "{response}");
    assert!(response.contains("This field is required."));
}

#[tokio::test]
async fn test_accept_header_reaches_handlers() {
    let addr = start_server().await;
    let body = "name=Bob&email=x&message=Hello+there";
    let response = send(
        addr,
        post(
            "/contact",
            "application/x-www-form-urlencoded",
            "Accept: application/json\r\n",
            body,
        ),
    )
    .await;

    assert!(response.starts_with("HTTP/1.1 422"), "{response}");
    assert!(response.to_ascii_lowercase().contains("content-type: application/json"));
    assert!(response.contains("\"valid\":false"));
    assert!(response.contains("\"email\""));
}

#[tokio::test]
async fn test_get_and_head_over_http() {
    let addr = start_server().await;

    let response = send(addr, "GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n".into()).await;
    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
    assert!(response.contains("action=\"/contact\""));

    let response = send(addr, "HEAD / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n".into()).await;
    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
    assert!(!response.contains("<html"));

    let response = send(addr, "GET /nowhere HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n".into()).await;
    assert!(response.starts_with("HTTP/1.1 404 Not Found"), "{response}");
}
