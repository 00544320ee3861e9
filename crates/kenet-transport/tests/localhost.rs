//! Integration tests: a listener and a dialer on localhost.

use std::sync::Arc;
use std::time::Duration;

use kenet_transport::{LinkConfig, LinkError, LinkListener, LinkNode};

fn local_config() -> LinkConfig {
    LinkConfig::new().bind_host("127.0.0.1").port(0)
}

/// Bind on an ephemeral port, dial it, and return both ends.
async fn link_pair() -> (LinkNode, LinkNode) {
    let listener = LinkListener::bind(&local_config()).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let dial = tokio::spawn(async move {
        LinkNode::connect("127.0.0.1", &local_config().port(port))
            .await
            .unwrap()
    });
    let server = listener.accept().await.unwrap();
    let client = dial.await.unwrap();
    (server, client)
}

#[tokio::test]
async fn frames_cross_the_link_in_order() {
    let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();

    let (server, client) = link_pair().await;

    client.send_frame(b"one").await.unwrap();
    client.send_frame(b"two").await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(5), server.recv_frame())
        .await
        .expect("recv timed out")
        .unwrap();
    let second = server.recv_frame().await.unwrap();

    assert_eq!(first.as_deref(), Some(&b"one"[..]));
    assert_eq!(second.as_deref(), Some(&b"two"[..]));
    assert!(server.is_connected());
}

#[tokio::test]
async fn concurrent_writers_never_interleave() {
    let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();

    let (server, client) = link_pair().await;
    let client = Arc::new(client);

    let mut handles = Vec::new();
    for writer in 0u8..8 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..25 {
                client.send_frame(&vec![writer; 2048]).await.unwrap();
            }
        }));
    }

    // Drain while the writers run so socket buffers never fill up.
    for _ in 0..(8 * 25) {
        let frame = server.recv_frame().await.unwrap().expect("frame");
        assert_eq!(frame.len(), 2048);
        let first = frame[0];
        assert!(frame.iter().all(|b| *b == first), "frame bytes interleaved");
    }
    for h in handles {
        h.await.unwrap();
    }
}

#[tokio::test]
async fn peer_shutdown_is_clean_eof() {
    let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();

    let (server, client) = link_pair().await;
    client.shutdown().await.unwrap();

    let next = server.recv_frame().await.unwrap();
    assert!(next.is_none());
    assert!(!server.is_connected());
    assert!(matches!(
        client.send_frame(b"late").await,
        Err(LinkError::Closed)
    ));
}

#[tokio::test]
async fn connect_to_closed_port_fails() {
    let listener = LinkListener::bind(&local_config()).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let result = LinkNode::connect("127.0.0.1", &local_config().port(port)).await;
    assert!(matches!(
        result,
        Err(LinkError::Connect { .. }) | Err(LinkError::ConnectTimeout { .. })
    ));
}
