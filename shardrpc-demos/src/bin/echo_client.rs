//! Echo client: sends one message to an echo server and prints the reply
//!
//! Usage: `echo_client [message] [config-file]`

use std::path::PathBuf;

use shardrpc::{RpcClient, RpcClientConfig};
use shardrpc_core::{Error, Result};
use shardrpc_demos::{EchoRequest, EchoResponse, ECHO_METHOD, ECHO_SERVICE};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let message = args.next().unwrap_or_else(|| "Hello".to_string());
    let config_path = args.next().map(PathBuf::from);
    let config = shardrpc_demos::init(config_path.as_deref())?;
    
    let client = RpcClient::connect(RpcClientConfig::from_config(&config)?).await?;
    let request = EchoRequest { payload: message };
    let result = client
        .call::<_, EchoResponse>(ECHO_SERVICE, ECHO_METHOD, &request)
        .await;
    client.close().await;
    
    let response = result.map_err(|e| Error::Protocol(e.to_string()))?;
    info!("Echo reply: {}", response.payload);
    println!("{}", response.payload);
    Ok(())
}
