//! Key/value client: runs a put, get, delete, get sequence against a KV server
//!
//! Usage: `kv_client [key] [value] [config-file]`

use std::path::PathBuf;

use shardrpc::{CallResult, RpcClient, RpcClientConfig};
use shardrpc_core::{Error, Result};
use shardrpc_demos::{
    DeleteRequest, DeleteResponse, GetRequest, GetResponse, PutRequest, PutResponse, KV_DELETE, KV_GET,
    KV_PUT, KV_SERVICE,
};
use tracing::info;

async fn run(client: &RpcClient, key: String, value: String) -> CallResult<()> {
    let put: PutResponse = client
        .call(KV_SERVICE, KV_PUT, &PutRequest { key: key.clone(), value })
        .await?;
    info!("Put {} -> {:?}", key, put.status);
    
    let get: GetResponse = client.call(KV_SERVICE, KV_GET, &GetRequest { key: key.clone() }).await?;
    info!("Get {} -> {:?} {:?}", key, get.status, get.value);
    
    let delete: DeleteResponse = client
        .call(KV_SERVICE, KV_DELETE, &DeleteRequest { key: key.clone() })
        .await?;
    info!("Delete {} -> {:?}", key, delete.status);
    
    let get: GetResponse = client.call(KV_SERVICE, KV_GET, &GetRequest { key: key.clone() }).await?;
    info!("Get {} -> {:?}", key, get.status);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let key = args.next().unwrap_or_else(|| "greeting".to_string());
    let value = args.next().unwrap_or_else(|| "hello".to_string());
    let config_path = args.next().map(PathBuf::from);
    let config = shardrpc_demos::init(config_path.as_deref())?;
    
    let client = RpcClient::connect(RpcClientConfig::from_config(&config)?).await?;
    let result = run(&client, key, value).await;
    client.close().await;
    result.map_err(|e| Error::Protocol(e.to_string()))
}
