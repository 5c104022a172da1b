//! Integration tests for probing over real WebSocket links
//!
//! A local echo server stands in for a hosting location. The registry uses
//! the plain `ws` scheme so no certificates are involved.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use ping_probe::probe::{ConnectionState, ProbeConfig, ProbeDriver, ProbeRegistry};

fn local_config() -> ProbeConfig {
    ProbeConfig {
        scheme: "ws".into(),
        probe_interval: Duration::from_millis(50),
        connect_timeout: Duration::from_secs(2),
        ..ProbeConfig::default()
    }
}

/// Echo server that answers every text frame with the same text
async fn spawn_echo_server() -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let received = Arc::new(Mutex::new(Vec::new()));
    let log = received.clone();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let log = log.clone();
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(message)) = ws.next().await {
                    if let Message::Text(text) = message {
                        log.lock().push(text.clone());
                        if ws.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                }
            });
        }
    });

    (addr, received)
}

#[tokio::test]
async fn test_reports_latency_from_echo_server() {
    let (addr, received) = spawn_echo_server().await;
    let address = addr.to_string();
    let registry = ProbeRegistry::new(local_config());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = registry.subscribe(Some(address.as_str()), move |latency| {
        let _ = tx.send(latency);
    });
    let driver = ProbeDriver::with_config_interval(registry.clone(), vec![address.clone()]).spawn();

    let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no latency reported")
        .expect("callback channel closed");

    assert!(first.is_some(), "expected a measurement, got {:?}", first);
    assert_eq!(registry.state(&address), Some(ConnectionState::Connected));
    assert!(received.lock().len() >= 3);
    assert!(received.lock().iter().all(|payload| payload == "ping"));

    driver.abort();
    handle.cancel();
    assert!(!registry.contains(&address));
    assert!(!registry.send_probe(Some(address.as_str())));

    // Drop anything reported before the cancel, then expect silence
    while rx.try_recv().is_ok() {}
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_refused_connection_reports_unavailable() {
    // Bind then drop to get a port with nothing listening
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let address = addr.to_string();
    let registry = ProbeRegistry::new(local_config());

    let value = registry.measure_once(Some(address.as_str())).await;
    assert_eq!(value, None);
    assert_eq!(registry.state(&address), Some(ConnectionState::Disconnected));

    let metrics = registry.metrics();
    assert_eq!(metrics.failures(&address, "network"), 1);
    assert_eq!(metrics.last_latency(&address), None);
}
