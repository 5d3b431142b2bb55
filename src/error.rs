//! Error types for the DHCP server.
//!
//! All fallible operations in this crate return [`Result<T>`], which uses
//! the [`Error`] enum for error variants.

use std::net::Ipv4Addr;

/// Errors that can occur during DHCP server operation.
///
/// Every variant except [`Socket`](Self::Socket) is recovered where it is
/// detected: the offending datagram is dropped, the condition is logged, and
/// the server keeps serving other clients.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Network or file system I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error (`show-config` output).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed DHCP message received.
    ///
    /// Covers undersized datagrams, truncated option lengths, and option
    /// payloads whose size does not match their code.
    #[error("Malformed DHCP message: {0}")]
    MalformedPacket(String),

    /// Encoding the reply options would exceed the 312-byte options region.
    #[error("Options exceed the {0}-byte options region")]
    OptionsOverflow(usize),

    /// The address pool is exhausted.
    ///
    /// Every address in the configured range is held by an offered or
    /// active lease. The triggering Discover/Request is dropped.
    #[error("No available address in pool")]
    PoolExhausted,

    /// The lease table has reached its fixed capacity and no freed slot
    /// can be reused.
    #[error("Lease table full")]
    TableFull,

    /// The requested address is already bound to a different client.
    #[error("Address {0} is already leased to another client")]
    AddressInUse(Ipv4Addr),

    /// No lease exists for the given hardware address.
    ///
    /// Returned when a renewal arrives for a client the table has never
    /// seen or whose lease has already been freed.
    #[error("No active lease for {0}")]
    LeaseNotFound(String),

    /// Invalid server configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Socket creation or bind error at startup.
    ///
    /// The only fatal error: without a listening socket there is no server.
    #[error("Socket error: {0}")]
    Socket(String),
}

/// A specialized Result type for DHCP operations.
pub type Result<T> = std::result::Result<T, Error>;
