//! WebSocket transport against an in-process hub on a loopback socket.

use std::future::Future;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use scorelink_websocket::{
    ConnectRequest, HubInvocation, HubMessage, RECORD_SEPARATOR, TransportError, TransportEvent,
    TransportFactory, TransportHandle, TransportType, WebSocketHubConfig,
    WebSocketTransportFactory,
};

type HubSocket = WebSocketStream<TcpStream>;

/// Accepts one websocket connection and runs `script` against it
async fn spawn_hub<F, Fut>(script: F) -> (String, JoinHandle<()>)
where
    F: FnOnce(HubSocket) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let socket = tokio_tungstenite::accept_async(stream).await.unwrap();
        script(socket).await;
    });
    (format!("http://{addr}/hubs/scores?access_token=abc"), task)
}

/// Next text record from the client, without its separator
async fn next_record(socket: &mut HubSocket) -> String {
    loop {
        let message = socket.next().await.expect("client hung up").unwrap();
        if let Message::Text(text) = message {
            return text.as_str().trim_end_matches(RECORD_SEPARATOR).to_owned();
        }
    }
}

async fn accept_handshake(socket: &mut HubSocket) -> serde_json::Value {
    let request = next_record(socket).await;
    socket
        .send(Message::text(format!("{{}}{RECORD_SEPARATOR}")))
        .await
        .unwrap();
    serde_json::from_str(&request).unwrap()
}

async fn send(socket: &mut HubSocket, message: HubMessage) {
    socket.send(Message::text(message.to_record())).await.unwrap();
}

fn connect(url: String) -> TransportHandle {
    WebSocketTransportFactory::new(WebSocketHubConfig::new().with_handshake_timeout(Duration::from_secs(5)))
        .create(TransportType::WebSockets, ConnectRequest::new(url))
        .unwrap()
}

#[tokio::test]
async fn test_handshake_invoke_push_and_stop() {
    let (url, hub) = spawn_hub(|mut socket| async move {
        let handshake = accept_handshake(&mut socket).await;
        assert_eq!(handshake, json!({"protocol": "json", "version": 1}));

        let record = next_record(&mut socket).await;
        let HubMessage::Invocation {
            invocation_id: Some(id),
            invocation,
        } = HubMessage::parse(&record).unwrap()
        else {
            panic!("expected an invocation, got {record}");
        };
        assert_eq!(invocation.target, "SubscribeToSession");
        assert_eq!(invocation.arguments, vec![json!(1)]);

        send(&mut socket, HubMessage::Completion { invocation_id: id, error: None }).await;
        send(
            &mut socket,
            HubMessage::Invocation {
                invocation_id: None,
                invocation: HubInvocation::new("ScoreCreated").with_argument(json!({"id": 7})),
            },
        )
        .await;

        let record = next_record(&mut socket).await;
        assert!(matches!(
            HubMessage::parse(&record).unwrap(),
            HubMessage::Close { .. }
        ));
    })
    .await;

    let TransportHandle {
        transport,
        mut events,
    } = connect(url);
    transport.start().await.unwrap();
    assert!(transport.is_connected());
    assert!(matches!(
        events.recv().await,
        Some(TransportEvent::Connected {
            transport_type: TransportType::WebSockets,
            ..
        })
    ));

    transport
        .invoke(HubInvocation::new("SubscribeToSession").with_argument(1))
        .await
        .unwrap();

    match events.recv().await {
        Some(TransportEvent::Invocation(invocation)) => {
            assert_eq!(invocation.target, "ScoreCreated");
            assert_eq!(invocation.first_argument(), Some(&json!({"id": 7})));
        }
        other => panic!("expected a push, got {other:?}"),
    }

    transport.stop().await.unwrap();
    assert!(matches!(
        events.recv().await,
        Some(TransportEvent::Closed { error: None })
    ));
    assert!(!transport.is_connected());

    hub.await.unwrap();
    let metrics = transport.metrics();
    assert!(metrics.messages_sent >= 2);
}

#[tokio::test]
async fn test_hub_error_reported_on_invocation() {
    let (url, hub) = spawn_hub(|mut socket| async move {
        accept_handshake(&mut socket).await;
        let record = next_record(&mut socket).await;
        let HubMessage::Invocation {
            invocation_id: Some(id),
            ..
        } = HubMessage::parse(&record).unwrap()
        else {
            panic!("expected an invocation");
        };
        send(
            &mut socket,
            HubMessage::Completion {
                invocation_id: id,
                error: Some("session 99 not found".into()),
            },
        )
        .await;
        // Hold the socket until the client leaves
        while socket.next().await.is_some() {}
    })
    .await;

    let TransportHandle { transport, .. } = connect(url);
    transport.start().await.unwrap();

    let error = transport
        .invoke(HubInvocation::new("SubscribeToSession").with_argument(99))
        .await
        .unwrap_err();
    match error {
        TransportError::InvocationFailed { target, message } => {
            assert_eq!(target, "SubscribeToSession");
            assert_eq!(message, "session 99 not found");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(transport.is_connected());

    transport.stop().await.unwrap();
    hub.await.unwrap();
}

#[tokio::test]
async fn test_hub_close_with_error_is_reported() {
    let (url, hub) = spawn_hub(|mut socket| async move {
        accept_handshake(&mut socket).await;
        send(
            &mut socket,
            HubMessage::Close {
                error: Some("server restarting".into()),
                allow_reconnect: true,
            },
        )
        .await;
    })
    .await;

    let TransportHandle {
        transport,
        mut events,
    } = connect(url);
    transport.start().await.unwrap();
    assert!(matches!(events.recv().await, Some(TransportEvent::Connected { .. })));

    match tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
        Ok(Some(TransportEvent::Closed { error: Some(error) })) => {
            assert!(error.to_string().contains("server restarting"));
        }
        other => panic!("expected an unrequested close, got {other:?}"),
    }
    assert!(!transport.is_connected());
    hub.await.unwrap();
}

#[tokio::test]
async fn test_socket_loss_is_reported() {
    let (url, hub) = spawn_hub(|mut socket| async move {
        accept_handshake(&mut socket).await;
        drop(socket);
    })
    .await;

    let TransportHandle {
        transport,
        mut events,
    } = connect(url);
    transport.start().await.unwrap();
    hub.await.unwrap();

    let closed = loop {
        match tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
            Ok(Some(TransportEvent::Closed { error })) => break error,
            Ok(Some(_)) => continue,
            other => panic!("expected a close, got {other:?}"),
        }
    };
    assert!(closed.is_some());
}

#[tokio::test]
async fn test_handshake_rejection() {
    let (url, hub) = spawn_hub(|mut socket| async move {
        next_record(&mut socket).await;
        socket
            .send(Message::text(format!(
                "{}{RECORD_SEPARATOR}",
                json!({"error": "Requested protocol 'json' is not available."})
            )))
            .await
            .unwrap();
    })
    .await;

    let TransportHandle { transport, .. } = connect(url);
    let error = transport.start().await.unwrap_err();
    assert!(matches!(error, TransportError::ProtocolError(_)));
    assert!(!transport.is_connected());
    hub.await.unwrap();
}

#[tokio::test]
async fn test_unauthorized_upgrade_is_an_authentication_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hub = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut request = vec![0_u8; 4096];
        let _ = stream.read(&mut request).await.unwrap();
        stream
            .write_all(b"HTTP/1.1 401 Unauthorized\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
    });

    let TransportHandle { transport, .. } =
        connect(format!("http://{addr}/hubs/scores?access_token=expired"));
    let error = transport.start().await.unwrap_err();
    assert!(error.is_authentication(), "unexpected error {error:?}");
    hub.await.unwrap();
}
