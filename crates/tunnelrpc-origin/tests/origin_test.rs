//! Origin connectors against local test servers
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http::{HeaderMap, HeaderValue, Request};
use http_body_util::{BodyExt, Full};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as WsRequest, Response as WsResponse,
};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tunnelrpc_origin::{
    generate_accept_key, BuildOriginService, HttpOriginService, OriginError, OriginService,
    WebSocketOriginService, WebSocketProxyServer,
};
use tunnelrpc_proto::{HttpOriginConfig, Origin, WebSocketOriginConfig};

/// Read one request head and answer it with a fixed body
async fn answer_once<S>(mut socket: S, body: &str) -> String
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut buf).await.unwrap();
        assert!(n > 0, "client closed before sending a full request");
        head.extend_from_slice(&buf[..n]);
    }

    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );
    socket.write_all(response.as_bytes()).await.unwrap();
    String::from_utf8(head).unwrap()
}

fn http_service(url: String) -> HttpOriginService {
    let config = HttpOriginConfig {
        url_string: url,
        tcp_keep_alive: Duration::from_secs(30),
        proxy_connection_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    match Origin::Http(config).service().unwrap() {
        OriginService::Http(service) => service,
        OriginService::WebSocket(_) => panic!("expected http service"),
    }
}

#[tokio::test]
async fn test_http_round_trip_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        answer_once(socket, "hello").await
    });

    let service = http_service(format!("http://{}", addr));
    let request = Request::builder()
        .uri("https://app.example.com/status?verbose=1")
        .header("host", "app.example.com")
        .body(Full::new(Bytes::new()))
        .unwrap();

    let response = service.round_trip(request).await.unwrap();
    assert_eq!(response.status(), 200);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"hello");

    let head = server.await.unwrap();
    assert!(head.starts_with("GET /status?verbose=1 HTTP/1.1\r\n"), "{}", head);
    assert!(head.to_ascii_lowercase().contains("host: app.example.com\r\n"));
}

/// Keep-alive origin answering "ok" to every request; counts accepted connections
async fn keep_alive_origin() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let accepted = Arc::new(AtomicUsize::new(0));

    let counter = accepted.clone();
    tokio::spawn(async move {
        loop {
            let (mut socket, _) = listener.accept().await.unwrap();
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut pending = Vec::new();
                let mut buf = [0u8; 1024];
                loop {
                    let n = match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    pending.extend_from_slice(&buf[..n]);
                    while let Some(end) = pending.windows(4).position(|w| w == b"\r\n\r\n") {
                        pending.drain(..end + 4);
                        let reply = "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
                        if socket.write_all(reply.as_bytes()).await.is_err() {
                            return;
                        }
                    }
                }
            });
        }
    });

    (url, accepted)
}

#[tokio::test]
async fn test_http_connection_reused_after_body_read() {
    let (url, accepted) = keep_alive_origin().await;
    let service = http_service(url);

    for _ in 0..3 {
        let request = Request::builder()
            .uri("/")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = service.round_trip(request).await.unwrap();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");

        // The connection goes back to the pool once the exchange is done
        tokio::time::timeout(Duration::from_secs(2), async {
            while service.idle_connections().await == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    assert_eq!(accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_http_expect_continue_sends_body_without_waiting() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        // Never answers 100 Continue; waits for head and body together
        let mut received = Vec::new();
        let mut buf = [0u8; 1024];
        while !received.ends_with(b"payload") {
            let n = socket.read(&mut buf).await.unwrap();
            assert!(n > 0, "client closed before sending the body");
            received.extend_from_slice(&buf[..n]);
        }
        socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();
    });

    let config = HttpOriginConfig {
        url_string: format!("http://{}", addr),
        proxy_connection_timeout: Duration::from_secs(5),
        expect_continue_timeout: Duration::from_secs(30),
        ..Default::default()
    };
    let service = match Origin::Http(config).service().unwrap() {
        OriginService::Http(service) => service,
        OriginService::WebSocket(_) => panic!("expected http service"),
    };

    let request = Request::builder()
        .method("POST")
        .uri("/upload")
        .header("expect", "100-continue")
        .body(Full::new(Bytes::from_static(b"payload")))
        .unwrap();
    let response = tokio::time::timeout(Duration::from_secs(5), service.round_trip(request))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.status(), 200);
    server.await.unwrap();
}

#[tokio::test]
async fn test_http_fills_missing_host() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        answer_once(socket, "").await
    });

    let service = http_service(format!("http://{}", addr));
    let request = Request::builder()
        .uri("/")
        .body(Full::new(Bytes::new()))
        .unwrap();
    service.round_trip(request).await.unwrap();

    let head = server.await.unwrap().to_ascii_lowercase();
    assert!(head.contains(&format!("host: {}\r\n", addr)), "{}", head);
}

#[cfg(unix)]
#[tokio::test]
async fn test_http_round_trip_over_unix_socket() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("origin.sock");
    let listener = tokio::net::UnixListener::bind(&path).unwrap();
    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        answer_once(socket, "unix").await
    });

    let service = http_service(format!("unix:{}", path.display()));
    let request = Request::builder()
        .uri("/")
        .body(Full::new(Bytes::new()))
        .unwrap();

    let response = service.round_trip(request).await.unwrap();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"unix");
    server.await.unwrap();
}

#[tokio::test]
async fn test_http_origin_unreachable() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let service = http_service(format!("http://127.0.0.1:{}", port));
    let request = Request::builder()
        .uri("/")
        .body(Full::new(Bytes::new()))
        .unwrap();

    let err = service.round_trip(request).await.unwrap_err();
    assert!(matches!(err, OriginError::ConnectionFailed { .. }));
}

#[tokio::test]
async fn test_websocket_connect_forwards_headers() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (seen_tx, seen_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let callback = move |req: &WsRequest, resp: WsResponse| -> Result<WsResponse, ErrorResponse> {
            let _ = seen_tx.send(req.headers().clone());
            Ok(resp)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(socket, callback)
            .await
            .unwrap();
        // Echo one message
        if let Some(Ok(message)) = ws.next().await {
            ws.send(message).await.unwrap();
        }
    });

    let service = WebSocketOriginService::new(&WebSocketOriginConfig {
        url_string: format!("http://{}/socket", addr),
        ..Default::default()
    })
    .unwrap();

    let inbound_key = "dGhlIHNhbXBsZSBub25jZQ==";
    let mut inbound = HeaderMap::new();
    inbound.insert("host", HeaderValue::from_static("ws.example.com"));
    inbound.insert("upgrade", HeaderValue::from_static("websocket"));
    inbound.insert("connection", HeaderValue::from_static("Upgrade"));
    inbound.insert("sec-websocket-key", HeaderValue::from_static(inbound_key));
    inbound.insert("sec-websocket-version", HeaderValue::from_static("13"));
    inbound.insert("x-request-id", HeaderValue::from_static("req-42"));

    let (mut ws, response) = service.connect(&inbound).await.unwrap();
    assert_eq!(
        response.headers()["sec-websocket-accept"],
        generate_accept_key(inbound_key).as_str()
    );

    let seen = seen_rx.await.unwrap();
    assert_eq!(seen["x-request-id"], "req-42");
    assert_eq!(seen["host"], "ws.example.com");
    // The client generated its own key
    assert_ne!(seen["sec-websocket-key"], inbound_key);

    ws.send(Message::Binary(b"echo".to_vec())).await.unwrap();
    let reply = ws.next().await.unwrap().unwrap();
    assert_eq!(reply, Message::Binary(b"echo".to_vec()));
}

#[tokio::test]
async fn test_websocket_proxy_server_relays_to_tcp() {
    // TCP echo backend
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = backend.accept().await.unwrap();
        let (mut reader, mut writer) = socket.split();
        let _ = tokio::io::copy(&mut reader, &mut writer).await;
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let proxy = WebSocketProxyServer::new(listener, backend_addr.to_string());
    let proxy_task = tokio::spawn(proxy.run(shutdown.clone()));

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/", proxy_addr))
        .await
        .unwrap();
    ws.send(Message::Binary(b"through the tunnel".to_vec()))
        .await
        .unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(reply, Message::Binary(b"through the tunnel".to_vec()));

    shutdown.cancel();
    proxy_task.await.unwrap().unwrap();
}
