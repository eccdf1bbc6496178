//! Forwarding integration tests
//!
//! Each test drives a real forwarding session over loopback sockets: a test
//! client on one side, a mock upstream on the other. The original
//! destination is injected with `TproxyConnection::with_destination`, so no
//! TPROXY rules or capabilities are needed.
//!
//! # Test Categories
//!
//! 1. **Rewrite Tests**: Host normalization and the marker header
//! 2. **Body Tests**: Content-Length and opaque bodies
//! 3. **Relay Tests**: Response transparency and half-close
//! 4. **Failure Tests**: Malformed requests and unreachable upstreams

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use node_forwarder::error::SessionError;
use node_forwarder::forwarder::{
    handle_session, ForwarderContext, SessionOutcome, SessionPhase, UpstreamDialer,
};
use node_forwarder::tproxy::TproxyConnection;

// ============================================================================
// Harness
// ============================================================================

fn context_for(upstream: SocketAddr) -> ForwarderContext {
    ForwarderContext::with_dialer(UpstreamDialer::with_timeout(
        upstream.to_string(),
        Duration::from_secs(2),
    ))
}

/// Start one session; returns the client end and the session task
async fn start_session(
    upstream: SocketAddr,
    original_dst: Option<SocketAddr>,
) -> (TcpStream, JoinHandle<SessionOutcome>) {
    let front = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client = TcpStream::connect(front.local_addr().unwrap()).await.unwrap();
    let (stream, client_addr) = front.accept().await.unwrap();

    let conn = TproxyConnection::with_destination(stream, client_addr, original_dst);
    let ctx = context_for(upstream);
    let session = tokio::spawn(async move { handle_session(conn, &ctx).await });

    (client, session)
}

/// Read one request head (through the blank line) as seen by the upstream
async fn read_head(reader: &mut BufReader<TcpStream>) -> String {
    let mut head = Vec::new();
    loop {
        let n = reader.read_until(b'\n', &mut head).await.unwrap();
        assert!(n > 0, "upstream saw EOF inside the request head");
        if head.ends_with(b"\r\n\r\n") {
            break;
        }
    }
    String::from_utf8(head).unwrap()
}

/// Accept one upstream connection and read its request head
async fn accept_upstream(listener: &TcpListener) -> (BufReader<TcpStream>, String) {
    let (stream, _) = listener.accept().await.unwrap();
    let mut reader = BufReader::new(stream);
    let head = read_head(&mut reader).await;
    (reader, head)
}

fn header_values<'a>(head: &'a str, name: &str) -> Vec<&'a str> {
    head.split("\r\n")
        .skip(1)
        .filter_map(|line| line.split_once(':'))
        .filter(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.trim())
        .collect()
}

// ============================================================================
// Rewrite Tests
// ============================================================================

#[tokio::test]
async fn test_host_preserved_with_single_marker() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dst: SocketAddr = "10.0.0.7:80".parse().unwrap();
    let (mut client, session) = start_session(upstream.local_addr().unwrap(), Some(dst)).await;

    client
        .write_all(b"GET /a HTTP/1.1\r\nHost: svc.example\r\nAccept: */*\r\n\r\n")
        .await
        .unwrap();

    let (reader, head) = accept_upstream(&upstream).await;
    assert_eq!(header_values(&head, "host"), vec!["svc.example"]);
    assert_eq!(header_values(&head, "x-node-forwarder"), vec!["tproxy"]);
    assert_eq!(header_values(&head, "accept"), vec!["*/*"]);
    drop(reader);

    let outcome = session.await.unwrap();
    assert!(outcome.is_success(), "{:?}", outcome.error);
    assert_eq!(outcome.host, "svc.example");
}

#[tokio::test]
async fn test_host_filled_from_original_destination() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dst: SocketAddr = "10.0.0.5:8080".parse().unwrap();
    let (mut client, session) = start_session(upstream.local_addr().unwrap(), Some(dst)).await;

    client
        .write_all(b"GET /no-host HTTP/1.1\r\nUser-Agent: probe\r\n\r\n")
        .await
        .unwrap();

    let (reader, head) = accept_upstream(&upstream).await;
    assert!(head.starts_with("GET /no-host HTTP/1.1\r\nHost: 10.0.0.5:8080\r\n"));
    assert_eq!(header_values(&head, "host").len(), 1);
    drop(reader);

    let outcome = session.await.unwrap();
    assert_eq!(outcome.host, "10.0.0.5:8080");
    assert_eq!(outcome.phase, SessionPhase::Closed);
}

#[tokio::test]
async fn test_host_empty_without_any_source() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (mut client, session) = start_session(upstream.local_addr().unwrap(), None).await;

    client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();

    let (reader, head) = accept_upstream(&upstream).await;
    assert!(head.starts_with("GET / HTTP/1.1\r\nHost: \r\n"));
    drop(reader);

    let outcome = session.await.unwrap();
    assert!(outcome.is_success());
    assert_eq!(outcome.host, "");
}

#[tokio::test]
async fn test_repeated_headers_kept_in_order() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (mut client, session) = start_session(upstream.local_addr().unwrap(), None).await;

    client
        .write_all(
            b"GET / HTTP/1.1\r\n\
              X-Forwarded-For: 10.0.0.1\r\n\
              Host: h\r\n\
              X-Forwarded-For: 10.0.0.2\r\n\
              X-Forwarded-For: 10.0.0.3\r\n\r\n",
        )
        .await
        .unwrap();

    let (reader, head) = accept_upstream(&upstream).await;
    assert_eq!(
        header_values(&head, "x-forwarded-for"),
        vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]
    );
    drop(reader);

    session.await.unwrap();
}

#[tokio::test]
async fn test_http10_request_forwarded_as_http11() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (mut client, session) = start_session(upstream.local_addr().unwrap(), None).await;

    client
        .write_all(b"GET /legacy HTTP/1.0\r\nHost: old.example\r\n\r\n")
        .await
        .unwrap();

    let (reader, head) = accept_upstream(&upstream).await;
    assert!(head.starts_with("GET /legacy HTTP/1.1\r\n"));
    drop(reader);

    session.await.unwrap();
}

/// `GET /status` with `Host: ignored.example`, recovered destination
/// 10.0.0.5:8080: the upstream sees the Host header (not the destination)
/// followed by the marker, and the response reaches the client unchanged.
#[tokio::test]
async fn test_status_request_end_to_end() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dst: SocketAddr = "10.0.0.5:8080".parse().unwrap();
    let (mut client, session) = start_session(upstream.local_addr().unwrap(), Some(dst)).await;

    client
        .write_all(b"GET /status HTTP/1.1\r\nHost: ignored.example\r\n\r\n")
        .await
        .unwrap();

    let (mut reader, head) = accept_upstream(&upstream).await;
    assert_eq!(
        head,
        "GET /status HTTP/1.1\r\nHost: ignored.example\r\nx-node-forwarder: tproxy\r\n\r\n"
    );

    let response = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
    reader.get_mut().write_all(response).await.unwrap();
    drop(reader);

    let mut received = Vec::new();
    client.read_to_end(&mut received).await.unwrap();
    assert_eq!(received, response);

    let outcome = session.await.unwrap();
    assert!(outcome.is_success());
    assert_eq!(outcome.original_dst, Some(dst));
    assert_eq!(outcome.method, "GET");
    assert_eq!(outcome.path, "/status");
    assert_eq!(outcome.bytes.upstream_to_client, response.len() as u64);
}

// ============================================================================
// Body Tests
// ============================================================================

#[tokio::test]
async fn test_ten_megabyte_body_identity() {
    const BODY_LEN: usize = 10 * 1024 * 1024;

    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (client, session) = start_session(upstream.local_addr().unwrap(), None).await;
    let (mut client_rx, mut client_tx) = client.into_split();

    let body: Vec<u8> = (0..BODY_LEN).map(|i| (i * 31 % 253) as u8).collect();
    let expected = body.clone();

    let writer = tokio::spawn(async move {
        let head = format!("POST /upload HTTP/1.1\r\nHost: up\r\nContent-Length: {BODY_LEN}\r\n\r\n");
        client_tx.write_all(head.as_bytes()).await.unwrap();
        for chunk in body.chunks(100_003) {
            client_tx.write_all(chunk).await.unwrap();
        }
        client_tx
    });

    let (mut reader, head) = accept_upstream(&upstream).await;
    assert_eq!(header_values(&head, "content-length"), vec![BODY_LEN.to_string()]);

    let mut received = vec![0u8; BODY_LEN];
    reader.read_exact(&mut received).await.unwrap();
    assert!(received == expected, "body differs after forwarding");

    reader
        .get_mut()
        .write_all(b"HTTP/1.1 201 Created\r\nContent-Length: 0\r\n\r\n")
        .await
        .unwrap();
    drop(reader);

    let _client_tx = writer.await.unwrap();
    let mut response = Vec::new();
    client_rx.read_to_end(&mut response).await.unwrap();
    assert!(response.starts_with(b"HTTP/1.1 201 Created"));

    let outcome = session.await.unwrap();
    assert!(outcome.is_success(), "{:?}", outcome.error);
    assert!(outcome.bytes.client_to_upstream >= BODY_LEN as u64);
}

#[tokio::test]
async fn test_chunked_body_passes_through_verbatim() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (mut client, session) = start_session(upstream.local_addr().unwrap(), None).await;

    let chunked = b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
    let mut request =
        b"POST /stream HTTP/1.1\r\nHost: c\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
    request.extend_from_slice(chunked);
    client.write_all(&request).await.unwrap();

    let (mut reader, head) = accept_upstream(&upstream).await;
    assert_eq!(header_values(&head, "transfer-encoding"), vec!["chunked"]);

    let mut body = vec![0u8; chunked.len()];
    reader.read_exact(&mut body).await.unwrap();
    assert_eq!(body, chunked);
    drop(reader);

    session.await.unwrap();
}

#[tokio::test]
async fn test_bytes_after_first_request_relayed_unmodified() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (mut client, session) = start_session(upstream.local_addr().unwrap(), None).await;

    let second = b"GET /second HTTP/1.1\r\nHost: other\r\n\r\n";
    let mut pipelined = b"POST /first HTTP/1.1\r\nHost: one\r\nContent-Length: 3\r\n\r\nabc".to_vec();
    pipelined.extend_from_slice(second);
    client.write_all(&pipelined).await.unwrap();

    let (mut reader, head) = accept_upstream(&upstream).await;
    assert!(head.starts_with("POST /first HTTP/1.1\r\nHost: one\r\n"));

    let mut rest = vec![0u8; 3 + second.len()];
    reader.read_exact(&mut rest).await.unwrap();
    assert_eq!(&rest[..3], b"abc");
    assert_eq!(&rest[3..], second);
    drop(reader);

    session.await.unwrap();
}

#[tokio::test]
async fn test_truncated_body_ends_session() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (mut client, session) = start_session(upstream.local_addr().unwrap(), None).await;

    client
        .write_all(b"POST / HTTP/1.1\r\nHost: t\r\nContent-Length: 100\r\n\r\npartial")
        .await
        .unwrap();
    client.shutdown().await.unwrap();

    let (_reader, _head) = accept_upstream(&upstream).await;

    let outcome = session.await.unwrap();
    assert_eq!(outcome.phase, SessionPhase::UpstreamConnected);
    assert!(matches!(
        outcome.error,
        Some(SessionError::BodyTruncated {
            expected: 100,
            received: 7
        })
    ));
}

// ============================================================================
// Relay Tests
// ============================================================================

#[tokio::test]
async fn test_response_relayed_across_multiple_writes() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (mut client, session) = start_session(upstream.local_addr().unwrap(), None).await;

    client
        .write_all(b"GET /events HTTP/1.1\r\nHost: ev\r\n\r\n")
        .await
        .unwrap();

    let (mut reader, _head) = accept_upstream(&upstream).await;
    let parts: [&[u8]; 5] = [
        b"HTTP/1.1 200 OK\r\n",
        b"Content-Type: text/plain\r\n\r\n",
        b"first ",
        b"second ",
        b"third",
    ];

    let upstream_writer = tokio::spawn(async move {
        for part in parts {
            reader.get_mut().write_all(part).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });

    let mut received = Vec::new();
    client.read_to_end(&mut received).await.unwrap();
    assert_eq!(received, parts.concat());

    upstream_writer.await.unwrap();
    let outcome = session.await.unwrap();
    assert_eq!(outcome.bytes.upstream_to_client, parts.concat().len() as u64);
}

#[tokio::test]
async fn test_client_half_close_keeps_response_flowing() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (mut client, session) = start_session(upstream.local_addr().unwrap(), None).await;

    client
        .write_all(b"GET / HTTP/1.1\r\nHost: hc\r\n\r\n")
        .await
        .unwrap();
    client.shutdown().await.unwrap();

    let (mut reader, _head) = accept_upstream(&upstream).await;

    // The client's FIN reaches the upstream as EOF
    let mut rest = Vec::new();
    reader.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());

    reader.get_mut().write_all(b"after half-close").await.unwrap();
    drop(reader);

    let mut received = Vec::new();
    client.read_to_end(&mut received).await.unwrap();
    assert_eq!(received, b"after half-close");

    assert!(session.await.unwrap().is_success());
}

// ============================================================================
// Failure Tests
// ============================================================================

#[tokio::test]
async fn test_malformed_request_never_contacts_upstream() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (mut client, session) = start_session(upstream.local_addr().unwrap(), None).await;

    client.write_all(b"garbage\r\n\r\n").await.unwrap();

    let mut received = Vec::new();
    client.read_to_end(&mut received).await.unwrap();
    assert!(received.is_empty(), "client must not receive a response");

    let outcome = session.await.unwrap();
    assert!(matches!(outcome.error, Some(SessionError::MalformedRequest(_))));

    let attempt = tokio::time::timeout(Duration::from_millis(200), upstream.accept()).await;
    assert!(attempt.is_err(), "upstream must not be dialed");
}

#[tokio::test]
async fn test_duplicate_host_rejected_before_dial() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (mut client, session) = start_session(upstream.local_addr().unwrap(), None).await;

    client
        .write_all(b"GET / HTTP/1.1\r\nHost: a\r\nHost: b\r\n\r\n")
        .await
        .unwrap();

    let outcome = session.await.unwrap();
    assert!(matches!(outcome.error, Some(SessionError::MalformedRequest(_))));

    let attempt = tokio::time::timeout(Duration::from_millis(200), upstream.accept()).await;
    assert!(attempt.is_err());
}

#[tokio::test]
async fn test_unreachable_upstream_closes_client_silently() {
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = closed.local_addr().unwrap();
    drop(closed);

    let (mut client, session) = start_session(upstream_addr, None).await;
    client
        .write_all(b"GET / HTTP/1.1\r\nHost: down\r\n\r\n")
        .await
        .unwrap();

    let mut received = Vec::new();
    client.read_to_end(&mut received).await.unwrap();
    assert!(received.is_empty());

    let outcome = session.await.unwrap();
    assert_eq!(outcome.phase, SessionPhase::Rewritten);
    assert!(matches!(
        outcome.error,
        Some(SessionError::UpstreamConnect { .. })
    ));
}

#[tokio::test]
async fn test_client_closes_before_head() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (mut client, session) = start_session(upstream.local_addr().unwrap(), None).await;

    client.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n").await.unwrap();
    client.shutdown().await.unwrap();

    let outcome = session.await.unwrap();
    assert!(matches!(outcome.error, Some(SessionError::ClientClosed)));
    assert!(outcome.error.as_ref().is_some_and(SessionError::is_parse_failure));
}
