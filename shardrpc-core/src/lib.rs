//! # shardrpc core
//!
//! Threading building blocks shared by the shardrpc crates.
//!
//! - [`Reactor`]: a single-threaded event loop owned by a dedicated OS thread
//! - [`ReactorPool`]: a fixed set of reactors selected round-robin
//! - [`Error`]: the error type used across the workspace

pub mod error;
pub mod reactor;
pub mod smp;

pub use error::{Error, Result};
pub use reactor::{Reactor, ReactorConfig, ReactorHandle, ReactorId};
pub use smp::{reactor_count, ReactorPool, RoundRobin};

pub mod prelude {
    //! Common imports for shardrpc applications
    
    pub use crate::error::{Error, Result};
    pub use crate::reactor::{Reactor, ReactorConfig, ReactorHandle};
    pub use crate::smp::ReactorPool;
}
