//! End-to-end scenarios over the in-process bridge.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use corelink::{
    ApiRegistry, Command, ConnectOptions, ConnectionEvent, ConnectionToCore, Duplexer, Error,
    EventPayload, RemoteError, RemoteErrorKind, Transport, TransportBridge, Value,
};

fn api() -> Arc<ApiRegistry<String>> {
    let mut registry = ApiRegistry::<String>::new();
    registry
        .register("api", |args: Vec<Value>, _session| async move {
            let mut args = args.into_iter();
            Ok(Value::object([
                ("arg1", args.next().unwrap_or_default()),
                ("arg2", args.next().unwrap_or_default()),
                ("ok", Value::Date(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap())),
            ]))
        })
        .register("stamp", |args: Vec<Value>, session: String| async move {
            let date = args
                .first()
                .and_then(Value::as_date)
                .copied()
                .ok_or_else(|| Error::protocol("expected a date"))?;
            Ok(Value::object([
                ("session", Value::from(session)),
                ("date", Value::Date(date)),
            ]))
        })
        .register("never", |_args, _session| async move {
            std::future::pending::<()>().await;
            Ok(Value::Null)
        })
        .register("closed", |_args, _session| async move {
            Err(RemoteError::named("SessionClosedOrMissingError", "session is gone").into())
        })
        .register("launch", |_args, _session| async move {
            Err(RemoteError::named("DependenciesMissingError", "missing libs").into())
        });
    Arc::new(registry)
}

#[tokio::test]
async fn test_api_call_over_direct_bridge() {
    let duplex = Duplexer::new().from_client(&api(), String::new());

    let reply = duplex
        .to_core
        .send_request(
            Command::new("api")
                .arg("1")
                .arg(Value::object([("test", true)])),
            None,
        )
        .await
        .unwrap()
        .expect("reply");

    let expected_date = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
    assert_eq!(reply.get("arg1"), Some(&Value::from("1")));
    assert_eq!(
        reply.get("arg2").and_then(|arg| arg.get("test")),
        Some(&Value::Bool(true))
    );
    assert_eq!(reply.get("ok").and_then(Value::as_date), Some(&expected_date));
}

#[tokio::test]
async fn test_dates_survive_serialized_bridge() {
    let duplex = Duplexer::serialized().from_client(&api(), "session-1".to_string());
    let date = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();

    let reply = duplex
        .to_core
        .send_request(Command::new("stamp").arg(date), None)
        .await
        .unwrap()
        .expect("reply");

    assert_eq!(reply.get("session"), Some(&Value::from("session-1")));
    assert_eq!(reply.get("date").and_then(Value::as_date), Some(&date));
}

#[tokio::test]
async fn test_unanswered_request_times_out() {
    let duplex = Duplexer::new().from_client(&api(), String::new());
    duplex.to_core.connect(ConnectOptions::new()).await.unwrap();

    let started = tokio::time::Instant::now();
    let err = duplex
        .to_core
        .send_request(Command::new("never"), Some(Duration::from_millis(500)))
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert_eq!(duplex.to_core.pending_count(), 0);
}

#[tokio::test]
async fn test_request_in_flight_during_disconnect_resolves_to_none() {
    let duplex = Duplexer::new().from_client(&api(), String::new());
    let caller = duplex.to_core.clone();

    let request = tokio::spawn(async move { caller.send_request(Command::new("never"), None).await });
    while duplex.to_core.pending_count() == 0 {
        tokio::task::yield_now().await;
    }

    duplex.to_core.disconnect(None).await;
    assert_eq!(request.await.unwrap().unwrap(), None);
}

#[tokio::test]
async fn test_session_closed_is_normalized_but_launch_errors_are_not() {
    let duplex = Duplexer::serialized().from_client(&api(), String::new());

    let err = duplex
        .to_core
        .send_request(Command::new("closed"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Disconnected { .. }));

    let err = duplex
        .to_core
        .send_request(Command::new("launch"), None)
        .await
        .unwrap_err();
    match err {
        Error::Remote(remote) => {
            assert_eq!(remote.kind, RemoteErrorKind::DependenciesMissing);
            assert_eq!(remote.message, "missing libs");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_concurrent_connects_call_hook_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let duplex = Duplexer::new().from_core(
        move |builder| {
            builder.after_connect(move |_connection, _action| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
        },
        &api(),
        String::new(),
    );

    let connection = &duplex.to_core;
    let results = futures_util::future::join_all(
        (0..5).map(|_| connection.connect(ConnectOptions::new())),
    )
    .await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_connect_hook_message_canceled_when_transport_drops() {
    let bridge = TransportBridge::new();
    let connection = ConnectionToCore::builder(bridge.transport_to_core.clone())
        .after_connect(|connection, _action| async move {
            connection.send_request(Command::new("Core.connect"), None).await?;
            Ok(())
        })
        .build();

    let connecting = connection.clone();
    let connect = tokio::spawn(async move { connecting.connect(ConnectOptions::new()).await });

    // Nothing answers on the client side; wait for the hook's request.
    let mut outbound = bridge.transport_to_core.outbound();
    let _ = outbound.recv().await;

    let action = connection.connect_action().expect("connect action");
    assert!(action.hook_message_id().is_some());

    bridge.transport_to_core.disconnect(None).await;

    let err = connect.await.unwrap().unwrap_err();
    assert!(err.to_string().contains("disconnected"));
    assert!(action.error().is_some());
    assert!(connection.connect_action().is_none());
}

#[tokio::test]
async fn test_events_reach_the_caller() {
    let duplex = Duplexer::serialized().from_client(&api(), String::new());
    let mut events = duplex.to_core.events();
    duplex.to_core.connect(ConnectOptions::new()).await.unwrap();

    duplex
        .to_client
        .send_event(EventPayload::new("tab-updated", Value::object([("url", "about:blank")])).with_listener("l-7"))
        .await
        .unwrap();

    loop {
        match events.recv().await {
            Some(ConnectionEvent::Connected) => continue,
            Some(ConnectionEvent::Event(event)) => {
                assert_eq!(event.event_type, "tab-updated");
                assert_eq!(event.listener_id.as_deref(), Some("l-7"));
                assert_eq!(event.data.get("url"), Some(&Value::from("about:blank")));
                break;
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
