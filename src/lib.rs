//! # ferrogroup
//!
//! Type-generic process-group communication: point-to-point messages and
//! collective operations over a pluggable transport.
//!
//! This crate provides:
//! - A [`ProcessGroup`] handle that is passed explicitly to every operation
//! - Blocking and non-blocking point-to-point messages with tags and wildcards
//! - Collectives: barrier, broadcast, gather, all-gather, gatherv, scatter,
//!   scatterv, all-to-all, reduce, all-reduce and scan
//! - Sub-groups through `split` and `duplicate`
//! - A serial fallback: a group of size 1 runs every collective without
//!   communicating
//! - An in-process [`LocalFabric`] transport that runs one rank per thread
//!
//! ## Supported Types
//!
//! All operations are generic over [`Element`]. Arithmetic types
//! (`f32`, `f64`, `i8` through `i64`, `u8` through `u64`) travel as raw
//! bytes and support the built-in [`ReduceOp`]s. `String`, `bool`, `char`
//! and any `serde` type wrapped in [`Serialized`] travel through `bincode`.
//!
//! Buffers can be scalars, slices, arrays or `Vec`s. A `Vec` receiving data
//! is resized to fit; a slice or array must already be large enough.
//!
//! ## Quick Start
//!
//! ```no_run
//! use ferrogroup::{LocalFabric, ReduceOp};
//!
//! fn main() -> Result<(), ferrogroup::Error> {
//!     let results = LocalFabric::run(4, |world| -> ferrogroup::Result<()> {
//!         let rank = world.rank();
//!         println!("Hello from {world}");
//!
//!         let mut data = vec![0.0f64; 100];
//!         if rank == 0 {
//!             data.fill(42.0);
//!         }
//!         world.broadcast(&mut data, 0)?;
//!
//!         let sum = world.all_reduce_scalar(rank as f64, ReduceOp::Sum)?;
//!         println!("Rank {rank}: sum of all ranks = {sum}");
//!         Ok(())
//!     })?;
//!     results.into_iter().collect()
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description | Dependencies |
//! |---------|-------------|--------------|
//! | `debug` | Per-message trace logging in the in-process transport | — |
//!
//! ## Environment
//!
//! See [`env`] for the variables read by [`LocalConfig::from_env`].

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]

mod buffer;
mod collective;
mod datatype;
pub mod env;
mod error;
mod group;
mod local;
mod reduce;
mod request;
mod status;
mod timer;
mod transport;

pub use buffer::{Buffer, BufferMut};
pub use datatype::{Arithmetic, DatatypeTag, Element, Serialized};
pub use env::LocalConfig;
pub use error::{Error, Result, TransportError};
pub use group::ProcessGroup;
pub use local::{LocalFabric, LocalTransport};
pub use reduce::{Reduction, UserOp};
pub use request::Request;
pub use status::Status;
pub use timer::{wtime, Timer};
pub use transport::{
    Completion, ContextId, Envelope, Message, Outcome, Pending, Ready, Selector, Transport,
    TransportResult, ANY_SOURCE, ANY_TAG, WORLD_CONTEXT,
};

/// Built-in reduction operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ReduceOp {
    /// Sum of values
    Sum = 0,
    /// Maximum value
    Max = 1,
    /// Minimum value
    Min = 2,
    /// Product of values
    Prod = 3,
}
