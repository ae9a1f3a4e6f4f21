//! Integration tests for client-role services: supervisor backoff pacing,
//! parallel scale, and fleet shutdown.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use hawser_stream::{EndpointConfig, Handlers, RetryPolicy, Role, Service, TransportError};
use tokio::net::TcpListener;

async fn wait_for(mut pred: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if pred() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    pred()
}

/// Reserve a port that nothing listens on.
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(400),
        max_attempts: -1,
    }
}

#[tokio::test]
async fn failed_attempts_pace_out_with_exponential_backoff() {
    let attempts: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = attempts.clone();
    let handlers = Handlers::new().with_on_error(move |_service, conn, err| {
        let sink = sink.clone();
        async move {
            assert!(conn.is_none(), "connect failures carry no connection");
            assert!(matches!(err, TransportError::ServiceNotFound(_)));
            sink.lock().unwrap().push(Instant::now());
            Ok(())
        }
    });

    let config = EndpointConfig {
        retry: fast_retry(),
        ..EndpointConfig::default()
    };
    let service = Service::bind_with(
        Role::Client,
        "127.0.0.1",
        closed_port().await,
        handlers,
        config,
    );

    assert!(wait_for(|| attempts.lock().unwrap().len() >= 4, Duration::from_secs(5)).await);
    service.stop_clients();

    let attempts = attempts.lock().unwrap();
    // Gap after attempt N is at least 0.8 * min(base * 2^N, max).
    for (n, pair) in attempts.windows(2).enumerate() {
        let expected = Duration::from_millis(50)
            .saturating_mul(1 << (n as u32 + 1))
            .min(Duration::from_millis(400));
        let gap = pair[1] - pair[0];
        assert!(
            gap >= expected.mul_f64(0.8),
            "gap {n} was {gap:?}, expected at least {:?}",
            expected.mul_f64(0.8),
        );
    }
}

#[tokio::test]
async fn stop_clients_halts_the_retry_loop() {
    let attempt_count = Arc::new(AtomicU32::new(0));
    let counter = attempt_count.clone();
    let handlers = Handlers::new().with_on_error(move |_service, _conn, _err| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });

    let config = EndpointConfig {
        retry: fast_retry(),
        ..EndpointConfig::default()
    };
    let service = Service::bind_with(
        Role::Client,
        "127.0.0.1",
        closed_port().await,
        handlers,
        config,
    );
    assert!(wait_for(|| service.get_running(), Duration::from_secs(2)).await);
    assert!(
        wait_for(|| attempt_count.load(Ordering::SeqCst) >= 2, Duration::from_secs(3)).await
    );

    service.stop_clients();
    assert!(!service.get_running());

    // One attempt may already be in flight when the scope fires; after it
    // lands the supervisors must stay quiet.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let settled = attempt_count.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(attempt_count.load(Ordering::SeqCst), settled);
}

#[tokio::test]
async fn retry_budget_stops_the_supervisor() {
    let attempt_count = Arc::new(AtomicU32::new(0));
    let counter = attempt_count.clone();
    let handlers = Handlers::new().with_on_error(move |_service, _conn, _err| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });

    let config = EndpointConfig {
        retry: RetryPolicy {
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
            max_attempts: 3,
        },
        ..EndpointConfig::default()
    };
    let service = Service::bind_with(
        Role::Client,
        "127.0.0.1",
        closed_port().await,
        handlers,
        config,
    );

    assert!(
        wait_for(|| attempt_count.load(Ordering::SeqCst) == 3, Duration::from_secs(3)).await
    );
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(attempt_count.load(Ordering::SeqCst), 3);

    service.stop_clients();
}

#[tokio::test]
async fn scaled_client_holds_parallel_connections_on_both_ends() {
    let server = Service::bind(Role::Server, "0.0.0.0", 0, Handlers::new());
    assert!(wait_for(|| server.get_running(), Duration::from_secs(2)).await);

    let connected = Arc::new(AtomicU32::new(0));
    let accepted = Arc::new(AtomicU32::new(0));
    let connect_counter = connected.clone();
    let accept_counter = accepted.clone();
    let handlers = Handlers::new()
        .with_on_connect(move |_service, _conn| {
            let counter = connect_counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .with_on_accepted(move |_service, _conn| {
            let counter = accept_counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

    let config = EndpointConfig {
        scale: 4,
        ..EndpointConfig::default()
    };
    let client = Service::bind_with(
        Role::Client,
        "127.0.0.1",
        server.get_port(),
        handlers,
        config,
    );

    assert!(
        wait_for(|| server.snapshot().len() == 4, Duration::from_secs(2)).await,
        "server should see all four connections within 2s",
    );
    assert!(wait_for(|| client.snapshot().len() == 4, Duration::from_secs(2)).await);
    // Both lifecycle events fire once per connection.
    assert!(wait_for(|| connected.load(Ordering::SeqCst) == 4, Duration::from_secs(1)).await);
    assert_eq!(accepted.load(Ordering::SeqCst), 4);

    client.stop_clients();
    assert!(wait_for(|| client.snapshot().is_empty(), Duration::from_secs(1)).await);
    server.stop_clients();
    assert!(wait_for(|| server.snapshot().is_empty(), Duration::from_secs(1)).await);
}

#[tokio::test]
async fn nonpositive_scale_still_connects_once() {
    let server = Service::bind(Role::Server, "0.0.0.0", 0, Handlers::new());
    assert!(wait_for(|| server.get_running(), Duration::from_secs(2)).await);

    let config = EndpointConfig {
        scale: 0,
        ..EndpointConfig::default()
    };
    let client = Service::bind_with(
        Role::Client,
        "127.0.0.1",
        server.get_port(),
        Handlers::new(),
        config,
    );

    assert!(wait_for(|| client.snapshot().len() == 1, Duration::from_secs(2)).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.snapshot().len(), 1);

    client.stop_clients();
    server.stop_clients();
}

#[tokio::test]
async fn unresolvable_host_reports_host_not_resolved() {
    let kinds: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = kinds.clone();
    let handlers = Handlers::new().with_on_error(move |_service, conn, err| {
        let sink = sink.clone();
        async move {
            assert!(conn.is_none());
            if matches!(err, TransportError::HostNotResolved(_)) {
                sink.lock().unwrap().push("host_not_resolved");
            }
            Ok(())
        }
    });

    let config = EndpointConfig {
        retry: fast_retry(),
        ..EndpointConfig::default()
    };
    let service = Service::bind_with(
        Role::Client,
        "hawser-test.invalid",
        4242,
        handlers,
        config,
    );

    assert!(wait_for(|| !kinds.lock().unwrap().is_empty(), Duration::from_secs(5)).await);
    service.stop_clients();
}
