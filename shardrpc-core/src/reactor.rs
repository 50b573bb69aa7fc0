//! Reactor implementation for shardrpc
//!
//! A reactor is a single-threaded event loop pinned to a dedicated OS thread.
//! Every connection registered on a reactor has its I/O driven by that thread
//! only, so callbacks belonging to one reactor never run concurrently.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::bounded;
use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tokio::task::JoinHandle as TaskHandle;

use crate::{Error, Result};

/// Identifier of a reactor within a pool
pub type ReactorId = usize;

/// Reactor configuration
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    /// Prefix for reactor thread names, the reactor id is appended
    pub thread_name: String,
    
    /// Number of scheduled tasks polled before the reactor checks for new I/O events
    pub event_interval: u32,
    
    /// Stack size of the reactor thread in bytes, `None` keeps the platform default
    pub stack_size: Option<usize>,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            thread_name: "shardrpc-reactor".to_string(),
            event_interval: 61,
            stack_size: None,
        }
    }
}

/// Cloneable handle used to schedule work on a reactor from any thread
#[derive(Clone)]
pub struct ReactorHandle {
    id: ReactorId,
    name: Arc<str>,
    runtime: Handle,
}

impl ReactorHandle {
    /// Wrap an existing tokio runtime handle, typically the runtime of `#[tokio::main]`
    pub fn from_runtime(id: ReactorId, name: impl Into<Arc<str>>, runtime: Handle) -> Self {
        Self {
            id,
            name: name.into(),
            runtime,
        }
    }
    
    /// Handle of the runtime the caller is currently running on
    pub fn current(id: ReactorId) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::ReactorUnavailable(e.to_string()))?;
        Ok(Self::from_runtime(id, "current", runtime))
    }
    
    pub fn id(&self) -> ReactorId {
        self.id
    }
    
    pub fn name(&self) -> &str {
        &self.name
    }
    
    /// Schedule a future on this reactor
    pub fn spawn<F>(&self, future: F) -> TaskHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.runtime.spawn(future)
    }
    
    /// Drive a future to completion from a thread that is not a reactor.
    ///
    /// Panics if called from inside an async context.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
    
    /// Underlying tokio runtime handle
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }
}

impl fmt::Debug for ReactorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactorHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

/// An owned reactor thread.
///
/// The thread stays parked on a stop signal until [`Reactor::stop`] is called
/// or the reactor is dropped, so it never exits while it has no connections.
pub struct Reactor {
    handle: ReactorHandle,
    stop_tx: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Reactor {
    /// Start a reactor thread and wait until its runtime is ready
    pub fn spawn(id: ReactorId, config: &ReactorConfig) -> Result<Self> {
        let name = format!("{}-{}", config.thread_name, id);
        let (ready_tx, ready_rx) = bounded::<Result<Handle>>(1);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let event_interval = config.event_interval;
        
        let mut builder = thread::Builder::new().name(name.clone());
        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }
        
        let thread = builder.spawn(move || {
            let runtime = match Builder::new_current_thread()
                .enable_all()
                .event_interval(event_interval)
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    let _ = ready_tx.send(Err(Error::from(e)));
                    return;
                }
            };
            
            if ready_tx.send(Ok(runtime.handle().clone())).is_err() {
                return;
            }
            
            tracing::debug!(reactor = id, "Reactor running");
            runtime.block_on(async move {
                // Sentinel: resolves only when the owner asks the reactor to stop.
                let _ = stop_rx.await;
            });
            tracing::debug!(reactor = id, "Reactor stopped");
        })?;
        
        let runtime = ready_rx
            .recv()
            .map_err(|_| Error::ReactorUnavailable(format!("{} exited during startup", name)))??;
        
        Ok(Self {
            handle: ReactorHandle {
                id,
                name: name.into(),
                runtime,
            },
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }
    
    pub fn id(&self) -> ReactorId {
        self.handle.id
    }
    
    /// Get a cloneable handle to this reactor
    pub fn handle(&self) -> ReactorHandle {
        self.handle.clone()
    }
    
    /// Stop the event loop and join the reactor thread.
    ///
    /// Tasks still scheduled on the reactor are dropped.
    pub fn stop(mut self) {
        self.shutdown();
    }
    
    fn shutdown(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        
        if let Some(thread) = self.thread.take() {
            // A reactor dropped from one of its own tasks cannot wait for itself.
            if thread.thread().id() == thread::current().id() {
                return;
            }
            if let Err(e) = thread.join() {
                tracing::error!(reactor = self.handle.id, "Reactor thread panicked: {:?}", e);
            }
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("handle", &self.handle)
            .field("running", &self.thread.is_some())
            .finish()
    }
}
