//! Socket driver for a channel
//!
//! Each connection runs as one task on its channel's reactor. The task reads
//! bytes into the channel and owns a writer task that drains the channel's
//! outbound queue. Whatever ends the task, including the reactor dropping
//! it, tears the channel down exactly once.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::channel::{ChannelId, ChannelState, RpcChannel};

/// Upper bound on flushing queued frames after a local close
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Runs the channel's teardown when dropped.
///
/// Built before the connection task is spawned and moved into it, so a task
/// its reactor drops without ever polling still tears the channel down.
pub(crate) struct Teardown {
    channel: Arc<RpcChannel>,
    state: ChannelState,
}

impl Teardown {
    /// A guard that reports `Failed` until the connection is being served
    pub(crate) fn new(channel: Arc<RpcChannel>) -> Self {
        Self {
            channel,
            state: ChannelState::Failed,
        }
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        self.channel.teardown(self.state);
    }
}

/// Connect to `addr`, then serve the connection
pub(crate) async fn connect_and_serve(
    mut teardown: Teardown,
    addr: SocketAddr,
    outbound: UnboundedReceiver<Bytes>,
) {
    let channel = teardown.channel.clone();
    
    let stream = tokio::select! {
        result = TcpStream::connect(addr) => match result {
            Ok(stream) => stream,
            Err(e) => {
                warn!(channel = channel.id(), %addr, error = %e, "Connect failed");
                return;
            }
        },
        _ = channel.close_requested() => {
            debug!(channel = channel.id(), "Closed while connecting");
            teardown.state = ChannelState::Closed;
            return;
        }
    };
    
    channel.on_connected();
    serve(teardown, stream, outbound).await;
}

/// Serve an accepted connection handed over from another reactor
pub(crate) async fn adopt_and_serve(
    teardown: Teardown,
    stream: std::net::TcpStream,
    outbound: UnboundedReceiver<Bytes>,
) {
    // Registers the socket with this reactor's I/O driver.
    let stream = match TcpStream::from_std(stream) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(channel = teardown.channel.id(), error = %e, "Failed to register accepted socket");
            return;
        }
    };
    
    serve(teardown, stream, outbound).await;
}

async fn serve(mut teardown: Teardown, stream: TcpStream, outbound: UnboundedReceiver<Bytes>) {
    // A served connection dropped by its reactor ends normally.
    teardown.state = ChannelState::Closed;
    
    let channel = teardown.channel.clone();
    if let Err(e) = stream.set_nodelay(true) {
        debug!(channel = channel.id(), error = %e, "Failed to set TCP_NODELAY");
    }
    
    let (mut reader, writer) = stream.into_split();
    let (drain_tx, drain_rx) = oneshot::channel();
    let mut writer_task = tokio::spawn(write_loop(channel.id(), writer, outbound, drain_rx));
    let chunk = channel.read_buffer_size();
    let mut buf = BytesMut::with_capacity(chunk);
    
    let (state, drain) = loop {
        buf.reserve(chunk);
        tokio::select! {
            _ = channel.close_requested() => {
                debug!(channel = channel.id(), "Local close requested");
                break (ChannelState::Closed, true);
            }
            result = &mut writer_task => {
                let state = match result {
                    Ok(Ok(())) => ChannelState::Closed,
                    Ok(Err(e)) => {
                        warn!(channel = channel.id(), error = %e, "Write failed");
                        ChannelState::Failed
                    }
                    Err(e) => {
                        warn!(channel = channel.id(), error = %e, "Writer task ended unexpectedly");
                        ChannelState::Failed
                    }
                };
                // The writer already finished; it must not be polled again.
                teardown.state = state;
                return;
            }
            result = reader.read_buf(&mut buf) => match result {
                Ok(0) => {
                    debug!(channel = channel.id(), "Peer closed connection");
                    break (ChannelState::Closed, false);
                }
                Ok(n) => {
                    trace!(channel = channel.id(), bytes = n, "Read");
                    if let Err(e) = channel.on_readable(&mut buf) {
                        warn!(channel = channel.id(), error = %e, "Framing error, closing connection");
                        break (ChannelState::Failed, false);
                    }
                }
                Err(e) => {
                    warn!(channel = channel.id(), error = %e, "Read failed");
                    break (ChannelState::Failed, false);
                }
            }
        }
    };
    teardown.state = state;
    
    if drain {
        // Frames queued before the close, responses included, still go out.
        let _ = drain_tx.send(());
        match tokio::time::timeout(DRAIN_TIMEOUT, &mut writer_task).await {
            Ok(Ok(Err(e))) => debug!(channel = channel.id(), error = %e, "Failed to flush on close"),
            Ok(_) => {}
            Err(_) => {
                debug!(channel = channel.id(), "Flush on close timed out");
                writer_task.abort();
            }
        }
    } else {
        writer_task.abort();
    }
}

/// Write queued frames, coalescing whatever is ready into one flush.
///
/// Once `drain` fires the queue is closed, the frames already in it are
/// written and the write half is shut down.
async fn write_loop(
    channel: ChannelId,
    writer: OwnedWriteHalf,
    mut outbound: UnboundedReceiver<Bytes>,
    mut drain: oneshot::Receiver<()>,
) -> io::Result<()> {
    let mut writer = BufWriter::new(writer);
    loop {
        let frame = tokio::select! {
            frame = outbound.recv() => frame,
            _ = &mut drain => {
                outbound.close();
                let mut drained = 0;
                while let Some(frame) = outbound.recv().await {
                    writer.write_all(&frame).await?;
                    drained += 1;
                }
                writer.flush().await?;
                writer.shutdown().await?;
                trace!(channel, frames = drained, "Drained on close");
                return Ok(());
            }
        };
        let Some(frame) = frame else {
            return Ok(());
        };
        
        writer.write_all(&frame).await?;
        let mut batched = 1;
        while let Ok(frame) = outbound.try_recv() {
            writer.write_all(&frame).await?;
            batched += 1;
        }
        writer.flush().await?;
        trace!(channel, frames = batched, "Flushed");
    }
}
