//! # leasebind
//!
//! A minimal DHCP lease server: it turns a stream of untrusted UDP
//! datagrams into a consistent, time-bounded address-assignment ledger.
//!
//! ## Features
//!
//! - DISCOVER → OFFER, REQUEST → ACK (fresh grant or renewal), RELEASE,
//!   DECLINE, and INFORM handling
//! - Fixed-capacity lease table bound to client hardware addresses,
//!   guarded by a single lock
//! - Reserved offers: an offered address is held for 60 seconds until the
//!   client's REQUEST confirms it
//! - Relay agent passthrough (`giaddr` preserved, replies routed to the
//!   relay)
//! - Background expiration sweep and periodic lease statistics
//! - Async/await with Tokio
//!
//! ## Quick Start
//!
//! ```no_run
//! use leasebind::{Config, DhcpServer};
//!
//! #[tokio::main]
//! async fn main() -> leasebind::Result<()> {
//!     let config = Config::load("dhcp_config.txt")?;
//!     let server = DhcpServer::new(config)?;
//!     server.run().await
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`Config`] - server configuration (pool bounds, addresses, ports)
//! - [`DhcpServer`] - UDP server listening on the configured port
//! - [`LeaseTable`] - lock-guarded lease ledger, the allocation authority
//! - [`Pool`] - the assignable address range
//! - [`DhcpPacket`] - DHCP message parsing and encoding
//! - [`DhcpOption`] - option TLV codec
//! - [`NameTable`] - static name-resolution table (illustrative only)

pub mod config;
pub mod error;
pub mod lease;
pub mod names;
pub mod options;
pub mod packet;
pub mod pool;
pub mod server;

pub use config::Config;
pub use error::{Error, Result};
pub use lease::{Lease, LeaseState, LeaseTable};
pub use names::NameTable;
pub use options::{DhcpOption, MessageType};
pub use packet::DhcpPacket;
pub use pool::Pool;
pub use server::DhcpServer;
