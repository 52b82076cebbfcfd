//! A multiplexing FastCGI application runtime: reactor, transceiver, request manager and
//! HTTP environment parsing.
//!
//! Generalizes the teacher's single-connection, blocking `minifcgi` sketch into the
//! `mio`-backed, multi-worker design spec'd out module by module below. See `DESIGN.md` for
//! the grounding of each piece.

#![forbid(unsafe_code)]

pub mod config;
pub mod encode;
pub mod error;
pub mod http;
pub mod logging;
pub mod manager;
pub mod message;
pub mod reactor;
pub mod record;
pub mod request;
pub mod stream;
pub mod transceiver;

pub use config::Config;
pub use error::{FcgiError, Result};
pub use manager::Manager;
pub use message::{Message, RequestId, Socket};
pub use record::{ProtocolStatus, RecordType, Role};
pub use request::{Handler, RequestContext};
