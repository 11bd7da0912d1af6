#![forbid(unsafe_code)]
//! Asynchronous 9P2000.L filesystem server core.
//!
//! This crate implements the protocol-facing half of a 9P2000.L server:
//! wire marshalling, fid and tag bookkeeping, QID assignment, and the
//! request dispatcher that drives a pluggable [`backend::Backend`]. It
//! does not itself speak to any particular filesystem, storage engine, or
//! virtio transport — those live one layer up (see `crates/demofs` for a
//! reference backend and CLI).
//!
//! # Getting started
//!
//! Implement [`backend::Backend`] for your storage, then hand it to
//! [`transport::serve`]:
//!
//! ```no_run
//! use ninep::{backend::Backend, config::DeviceConfig, transport};
//!
//! # async fn run(my_backend: impl Backend) -> ninep::Result<()> {
//! transport::serve(my_backend, DeviceConfig::default_tag(), 8192, 8192, "tcp!0.0.0.0!564").await
//! # }
//! ```
//!
//! # Message flow
//!
//! 1. `Tversion`/`Rversion` negotiate `msize` and reset session state.
//! 2. `Tattach` binds a fid to the backend's root.
//! 3. `Twalk`, `Tlopen`, `Tread`, `Twrite`, ... operate on fids.
//! 4. `Tclunk` releases a fid.
//!
//! # Error handling
//!
//! Handlers return [`error::Error`]; the dispatcher converts it to an
//! `Rlerror` carrying the mapped POSIX errno.
pub mod backend;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fid;
pub mod proto;
pub mod qid;
pub mod reply;
pub mod session;
pub mod tag;
pub mod transport;
#[macro_use]
pub mod utils;
pub mod wire;

pub use crate::error::errno;
pub use crate::error::Error;
pub use crate::proto::*;
pub use crate::utils::Result;
