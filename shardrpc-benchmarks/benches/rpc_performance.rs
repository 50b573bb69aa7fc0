use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use shardrpc::{RpcClient, RpcClientConfig, RpcServer, RpcServerConfig, RpcService};
use shardrpc_core::ReactorHandle;

fn echo_service() -> RpcService {
    let mut service = RpcService::new("Echo.Echo");
    service.add_closure_method("Echo", Ok);
    service
}

fn bench_echo_round_trip(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();
    
    let config = RpcServerConfig {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        threads: 2,
        ..RpcServerConfig::default()
    };
    let mut server = RpcServer::new(ReactorHandle::from_runtime(0, "bench", rt.handle().clone()), config).unwrap();
    server.register_service(echo_service());
    let server = server.start().unwrap();
    
    let client = rt
        .block_on(RpcClient::connect(RpcClientConfig {
            server_address: server.local_addr(),
            ..RpcClientConfig::default()
        }))
        .unwrap();
    let client = Arc::new(client);
    
    let mut group = c.benchmark_group("rpc_echo");
    group.measurement_time(Duration::from_secs(10));
    
    for size in [16, 1024, 64 * 1024].iter() {
        let body = vec![0xAB_u8; *size];
        group.bench_with_input(BenchmarkId::new("sequential", size), &body, |b, body| {
            b.iter(|| {
                rt.block_on(async {
                    let response: Vec<u8> = client.call("Echo.Echo", "Echo", body).await.unwrap();
                    black_box(response)
                })
            });
        });
    }
    
    group.bench_function("pipelined_32", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut tasks = tokio::task::JoinSet::new();
                for n in 0..32u8 {
                    let client = client.clone();
                    tasks.spawn(async move { client.call::<_, Vec<u8>>("Echo.Echo", "Echo", &vec![n; 64]).await });
                }
                while let Some(result) = tasks.join_next().await {
                    black_box(result.unwrap().unwrap());
                }
            })
        });
    });
    
    group.finish();
    
    if let Ok(client) = Arc::try_unwrap(client) {
        rt.block_on(client.close());
    }
    rt.block_on(server.shutdown());
}

criterion_group!(benches, bench_echo_round_trip);
criterion_main!(benches);
