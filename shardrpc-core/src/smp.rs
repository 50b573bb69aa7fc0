//! Symmetric multiprocessing (SMP) support for shardrpc
//!
//! A fixed pool of reactors, one per worker thread, and the round-robin
//! cursor that spreads new work across them.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::reactor::{Reactor, ReactorConfig, ReactorHandle, ReactorId};
use crate::{Error, Result};

/// Get the number of reactors used when a pool is sized automatically
pub fn reactor_count() -> usize {
    num_cpus::get()
}

/// Cyclic selection over a fixed, non-empty set of items.
///
/// Selection is a single atomic fetch-and-increment, so concurrent callers
/// never observe the same slot twice in a row and no lock is needed.
#[derive(Debug)]
pub struct RoundRobin<T> {
    items: Vec<T>,
    cursor: AtomicUsize,
}

impl<T> RoundRobin<T> {
    pub fn new(items: Vec<T>) -> Result<Self> {
        if items.is_empty() {
            return Err(Error::InvalidArgument(
                "round-robin set must not be empty".to_string(),
            ));
        }
        Ok(Self {
            items,
            cursor: AtomicUsize::new(0),
        })
    }
    
    /// Index of the next slot, wrapping at the set size
    pub fn next_index(&self) -> usize {
        self.cursor.fetch_add(1, Ordering::Relaxed) % self.items.len()
    }
    
    /// Select the next item together with its index
    pub fn next(&self) -> (usize, &T) {
        let index = self.next_index();
        (index, &self.items[index])
    }
    
    pub fn len(&self) -> usize {
        self.items.len()
    }
    
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
    
    pub fn items(&self) -> &[T] {
        &self.items
    }
}

/// A pool of independently owned reactors.
///
/// Each reactor runs its own event loop on a dedicated thread until the pool
/// is shut down or dropped.
pub struct ReactorPool {
    reactors: Vec<Reactor>,
    handles: RoundRobin<ReactorHandle>,
}

impl ReactorPool {
    /// Start `count` reactors, `0` means one per CPU
    pub fn new(count: usize, config: &ReactorConfig) -> Result<Self> {
        let count = if count == 0 { reactor_count() } else { count };
        
        tracing::info!("Starting reactor pool with {} reactors", count);
        
        let mut reactors = Vec::with_capacity(count);
        for id in 0..count {
            // Reactors started so far are joined by their Drop if a later one fails.
            reactors.push(Reactor::spawn(id as ReactorId, config)?);
        }
        
        let handles = RoundRobin::new(reactors.iter().map(Reactor::handle).collect())?;
        Ok(Self { reactors, handles })
    }
    
    /// Number of reactors in the pool
    pub fn len(&self) -> usize {
        self.reactors.len()
    }
    
    pub fn is_empty(&self) -> bool {
        self.reactors.is_empty()
    }
    
    /// Select the next reactor in round-robin order
    pub fn next(&self) -> (usize, ReactorHandle) {
        let (index, handle) = self.handles.next();
        (index, handle.clone())
    }
    
    /// Handle of the reactor at `index`
    pub fn get(&self, index: usize) -> Option<ReactorHandle> {
        self.reactors.get(index).map(Reactor::handle)
    }
    
    /// Handles of every reactor, in pool order
    pub fn handles(&self) -> Vec<ReactorHandle> {
        self.handles.items().to_vec()
    }
    
    /// Stop every reactor and join its thread
    pub fn shutdown(self) {
        tracing::info!("Shutting down reactor pool with {} reactors", self.reactors.len());
        for reactor in self.reactors {
            reactor.stop();
        }
    }
}

impl std::fmt::Debug for ReactorPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactorPool")
            .field("reactors", &self.reactors.len())
            .finish()
    }
}
