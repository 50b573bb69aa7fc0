//! End-to-end tests running servers and clients over loopback TCP

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use shardrpc::{
    CallError, ChannelOptions, ChannelState, Reply, RpcChannel, RpcClient, RpcCodec, RpcErrorCode, RpcService,
    SerializationFormat,
};
use shardrpc_core::ReactorHandle;
use shardrpc_demos::{
    DeleteRequest, DeleteResponse, EchoRequest, EchoResponse, GetRequest, GetResponse, KvStatus, KvStore,
    PutRequest, PutResponse, ECHO_METHOD, ECHO_SERVICE, KV_DELETE, KV_GET, KV_PUT, KV_SERVICE,
};
use shardrpc_tests::{client_config, eventually, start_server};
use tokio::sync::oneshot;

const WAIT: Duration = Duration::from_secs(5);

/// Service whose `Wait` method parks every call until the test releases it
fn holding_service(held: Arc<Mutex<Vec<Reply<u32>>>>) -> RpcService {
    let mut service = RpcService::new("Hold");
    service.add_deferred_method("Wait", move |_: u32, reply: Reply<u32>| {
        held.lock().push(reply);
    });
    service
}

/// Test 1: Echo round trip
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_echo_round_trip() {
    let server = start_server(1, vec![shardrpc_demos::echo_service()]).unwrap();
    let client = RpcClient::connect(client_config(&server)).await.unwrap();
    
    let response: EchoResponse = client
        .call(
            ECHO_SERVICE,
            ECHO_METHOD,
            &EchoRequest {
                payload: "Hello".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(response.payload, "Hello");
    
    client.close().await;
    server.shutdown().await;
}

/// Test 2: The response carries the id of the request it answers
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_echo_callback_receives_matching_id() {
    let server = start_server(1, vec![shardrpc_demos::echo_service()]).unwrap();
    let client = RpcClient::connect(client_config(&server)).await.unwrap();
    
    let (tx, rx) = oneshot::channel();
    let request = EchoRequest {
        payload: "Hello".to_string(),
    };
    let first = client
        .channel()
        .call(ECHO_SERVICE, ECHO_METHOD, &request, move |result: Result<EchoResponse, CallError>| {
            let _ = tx.send(result);
        });
    assert_eq!(first, 1);
    
    let response = rx.await.unwrap().unwrap();
    assert_eq!(response.payload, "Hello");
    assert_eq!(client.channel().outstanding_calls(), 0);
    
    client.close().await;
    server.shutdown().await;
}

/// Test 3: Unknown services and methods are answered with explicit errors
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_service_and_method() {
    let server = start_server(1, vec![shardrpc_demos::echo_service()]).unwrap();
    let client = RpcClient::connect(client_config(&server)).await.unwrap();
    let request = EchoRequest {
        payload: "Hello".to_string(),
    };
    
    let missing_service = client
        .call::<_, EchoResponse>("Missing", ECHO_METHOD, &request)
        .await;
    match missing_service {
        Err(CallError::Remote(error)) => assert_eq!(error.code, RpcErrorCode::ServiceNotFound),
        other => panic!("unexpected result: {:?}", other),
    }
    
    let missing_method = client
        .call::<_, EchoResponse>(ECHO_SERVICE, "Shout", &request)
        .await;
    match missing_method {
        Err(CallError::Remote(error)) => assert_eq!(error.code, RpcErrorCode::MethodNotFound),
        other => panic!("unexpected result: {:?}", other),
    }
    
    // The connection survives error responses.
    assert!(client.is_connected());
    let response: EchoResponse = client.call(ECHO_SERVICE, ECHO_METHOD, &request).await.unwrap();
    assert_eq!(response.payload, "Hello");
    
    client.close().await;
    server.shutdown().await;
}

/// Test 4: Accepted connections are spread over worker reactors round-robin
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connections_assigned_round_robin() {
    let server = start_server(3, vec![shardrpc_demos::echo_service()]).unwrap();
    assert_eq!(server.thread_count(), 3);
    
    let reactor = ReactorHandle::current(100).unwrap();
    let mut clients = Vec::new();
    for accepted in 1..=9 {
        let channel = RpcChannel::connect(&reactor, server.local_addr(), ChannelOptions::default());
        assert_eq!(channel.ready().await, ChannelState::Connected);
        assert!(eventually(WAIT, || server.channel_count() == accepted).await);
        clients.push(channel);
    }
    
    let assignment: Vec<usize> = server.channels().iter().map(|channel| channel.reactor_id()).collect();
    assert_eq!(assignment, vec![0, 1, 2, 0, 1, 2, 0, 1, 2]);
    
    // Every worker reactor serves its connections.
    for channel in &clients {
        let response: EchoResponse = channel
            .call_async(
                ECHO_SERVICE,
                ECHO_METHOD,
                &EchoRequest {
                    payload: format!("from {}", channel.id()),
                },
            )
            .await
            .unwrap();
        assert_eq!(response.payload, format!("from {}", channel.id()));
    }
    
    for channel in &clients {
        channel.close();
    }
    assert!(eventually(WAIT, || server.channel_count() == 0).await);
    server.shutdown().await;
}

/// Test 5: Closing a client removes its channel from the server's live set
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disconnect_removes_channel() {
    let server = start_server(2, vec![shardrpc_demos::echo_service()]).unwrap();
    let first = RpcClient::connect(client_config(&server)).await.unwrap();
    let second = RpcClient::connect(client_config(&server)).await.unwrap();
    assert!(eventually(WAIT, || server.channel_count() == 2).await);
    
    first.close().await;
    assert!(eventually(WAIT, || server.channel_count() == 1).await);
    
    second.close().await;
    assert!(eventually(WAIT, || server.channel_count() == 0).await);
    server.shutdown().await;
}

/// Test 6: Server shutdown fails calls the client is still waiting on
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_fails_outstanding_calls() {
    let held = Arc::new(Mutex::new(Vec::new()));
    let server = start_server(2, vec![holding_service(held.clone())]).unwrap();
    let client = RpcClient::connect(client_config(&server)).await.unwrap();
    
    let channel = client.channel().clone();
    let pending = tokio::spawn(async move { channel.call_async::<_, u32>("Hold", "Wait", &7u32).await });
    assert!(eventually(WAIT, || held.lock().len() == 1).await);
    
    server.shutdown().await;
    assert_eq!(pending.await.unwrap(), Err(CallError::ConnectionClosed));
    assert!(client.channel().closed().await.is_terminal());
    assert_eq!(client.channel().outstanding_calls(), 0);
    
    client.close().await;
}

/// Test 7: A call without a response times out and leaves no table entry behind
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_client_request_timeout() {
    let held = Arc::new(Mutex::new(Vec::new()));
    let server = start_server(1, vec![holding_service(held.clone()), shardrpc_demos::echo_service()]).unwrap();
    
    let mut config = client_config(&server);
    config.request_timeout = Duration::from_millis(100);
    let client = RpcClient::connect(config).await.unwrap();
    
    let result = client.call::<_, u32>("Hold", "Wait", &1u32).await;
    assert_eq!(result, Err(CallError::Timeout(Duration::from_millis(100))));
    assert_eq!(client.channel().outstanding_calls(), 0);
    
    // A late reply for the abandoned call is discarded.
    assert!(eventually(WAIT, || held.lock().len() == 1).await);
    let late = held.lock().pop().unwrap();
    late.send(&99);
    let response: EchoResponse = client
        .call(ECHO_SERVICE, ECHO_METHOD, &EchoRequest { payload: "x".into() })
        .await
        .unwrap();
    assert_eq!(response.payload, "x");
    assert!(client.is_connected());
    
    client.close().await;
    server.shutdown().await;
}

/// Test 8: Deferred replies completed from other threads reach the right callers
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deferred_replies() {
    let mut service = RpcService::new("Math");
    service.add_deferred_method("Double", |n: u64, reply: Reply<u64>| {
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(n % 7));
            reply.send(&(n * 2));
        });
    });
    
    let server = start_server(2, vec![service]).unwrap();
    let client = Arc::new(RpcClient::connect(client_config(&server)).await.unwrap());
    
    let mut tasks = tokio::task::JoinSet::new();
    for n in 0..64u64 {
        let client = client.clone();
        tasks.spawn(async move {
            let doubled: u64 = client.call("Math", "Double", &n).await.unwrap();
            (n, doubled)
        });
    }
    
    let mut completed = 0;
    while let Some(result) = tasks.join_next().await {
        let (n, doubled) = result.unwrap();
        assert_eq!(doubled, n * 2);
        completed += 1;
    }
    assert_eq!(completed, 64);
    
    let client = Arc::try_unwrap(client).unwrap();
    client.close().await;
    server.shutdown().await;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Identity {
    name: String,
}

/// Test 9: The server can call services exposed by a connected client
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_server_calls_client() {
    let server = start_server(1, vec![shardrpc_demos::echo_service()]).unwrap();
    
    let mut client_service = RpcService::new("Client.Info");
    client_service.add_typed_method("Identify", |_: ()| {
        Ok(Identity {
            name: "test-client".to_string(),
        })
    });
    let client = RpcClient::builder()
        .config(client_config(&server))
        .service(client_service)
        .connect()
        .await
        .unwrap();
    
    assert!(eventually(WAIT, || server.channel_count() == 1).await);
    let server_channel = server.channels().remove(0);
    assert_eq!(server_channel.state(), ChannelState::Connected);
    
    let identity: Identity = server_channel.call_async("Client.Info", "Identify", &()).await.unwrap();
    assert_eq!(identity.name, "test-client");
    
    // Calls keep flowing in the other direction at the same time.
    let response: EchoResponse = client
        .call(ECHO_SERVICE, ECHO_METHOD, &EchoRequest { payload: "both".into() })
        .await
        .unwrap();
    assert_eq!(response.payload, "both");
    
    client.close().await;
    server.shutdown().await;
}

/// Test 10: Key/value service over a multi-reactor server
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_kv_service() {
    let store = Arc::new(KvStore::new());
    let server = start_server(2, vec![shardrpc_demos::kv_service(store.clone())]).unwrap();
    let client = RpcClient::connect(client_config(&server)).await.unwrap();
    
    let put: PutResponse = client
        .call(
            KV_SERVICE,
            KV_PUT,
            &PutRequest {
                key: "a".into(),
                value: "1".into(),
            },
        )
        .await
        .unwrap();
    assert_eq!(put.status, KvStatus::Ok);
    assert_eq!(store.len(), 1);
    
    let get: GetResponse = client.call(KV_SERVICE, KV_GET, &GetRequest { key: "a".into() }).await.unwrap();
    assert_eq!(get.status, KvStatus::Ok);
    assert_eq!(get.value.as_deref(), Some("1"));
    
    let delete: DeleteResponse = client
        .call(KV_SERVICE, KV_DELETE, &DeleteRequest { key: "a".into() })
        .await
        .unwrap();
    assert_eq!(delete.status, KvStatus::Ok);
    
    let get: GetResponse = client.call(KV_SERVICE, KV_GET, &GetRequest { key: "a".into() }).await.unwrap();
    assert_eq!(get.status, KvStatus::NotFound);
    assert_eq!(get.value, None);
    
    client.close().await;
    server.shutdown().await;
}

/// Test 11: Services and clients agree on a non-default body format
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_json_bodies() {
    let codec = RpcCodec::with_format(SerializationFormat::Json);
    let mut service = RpcService::new("Json").with_codec(codec);
    service.add_typed_method("Greet", |name: String| Ok(format!("hello {}", name)));
    
    let server = start_server(1, vec![service]).unwrap();
    let mut config = client_config(&server);
    config.codec = codec;
    let client = RpcClient::connect(config).await.unwrap();
    
    let greeting: String = client.call("Json", "Greet", "shardrpc").await.unwrap();
    assert_eq!(greeting, "hello shardrpc");
    
    client.close().await;
    server.shutdown().await;
}

/// Test 12: A corrupt frame fails the server channel and drops it from the live set
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_corrupt_frame_fails_server_channel() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    
    let server = start_server(2, vec![shardrpc_demos::echo_service()]).unwrap();
    let mut peer = tokio::net::TcpStream::connect(server.local_addr()).await.unwrap();
    assert!(eventually(WAIT, || server.channel_count() == 1).await);
    let channel = server.channels().remove(0);
    
    // Well-formed length and magic followed by a checksum that does not match.
    peer.write_all(&[0, 0, 0, 8, b'R', b'P', b'C', b'0', 0, 0, 0, 0]).await.unwrap();
    
    let state = tokio::time::timeout(WAIT, channel.closed()).await.unwrap();
    assert_eq!(state, ChannelState::Failed);
    assert!(eventually(WAIT, || server.channel_count() == 0).await);
    
    let mut rest = Vec::new();
    let read = tokio::time::timeout(WAIT, peer.read_to_end(&mut rest)).await.unwrap();
    assert!(read.map(|n| n == 0).unwrap_or(true));
    server.shutdown().await;
}

/// Test 13: A call issued while the channel is still connecting is sent once it connects
#[tokio::test]
async fn test_call_queued_while_connecting() {
    let server = start_server(1, vec![shardrpc_demos::echo_service()]).unwrap();
    let reactor = ReactorHandle::current(100).unwrap();
    let channel = RpcChannel::connect(&reactor, server.local_addr(), ChannelOptions::default());
    assert_eq!(channel.state(), ChannelState::Connecting);
    
    let (tx, rx) = oneshot::channel();
    channel.call(
        ECHO_SERVICE,
        ECHO_METHOD,
        &EchoRequest {
            payload: "early".into(),
        },
        move |result: Result<EchoResponse, CallError>| {
            let _ = tx.send(result);
        },
    );
    assert_eq!(channel.outstanding_calls(), 1);
    
    assert_eq!(channel.ready().await, ChannelState::Connected);
    let response = tokio::time::timeout(WAIT, rx).await.unwrap().unwrap().unwrap();
    assert_eq!(response.payload, "early");
    assert_eq!(channel.outstanding_calls(), 0);
    
    channel.close();
    channel.closed().await;
    server.shutdown().await;
}
