//! Library-wide defaults for listeners, dialers and read loops.
//!
//! Every configuration struct in `tether-network` falls back to these values
//! in its `Default` impl, so they are the single place to look when a default
//! needs to change.
//!
//! # Usage
//!
//! ```
//! use tether_core::constants::*;
//! use std::time::Duration;
//!
//! assert_eq!(DEFAULT_PORT, 3000);
//! let timeout = Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS);
//! assert_eq!(timeout.as_secs(), 3);
//! ```

// ============================================================================
// Addresses
// ============================================================================

/// Port used by the example echo server and client when none is given.
pub const DEFAULT_PORT: u16 = 3000;

/// Default bind address for servers (all interfaces, [`DEFAULT_PORT`]).
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

/// Default remote address for clients (loopback, [`DEFAULT_PORT`]).
pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:3000";

// ============================================================================
// Read loop
// ============================================================================

/// Capacity reserved for each read from a connection (32 KiB).
///
/// A single read never yields more than this many bytes, so this is also the
/// upper bound on the size of one data chunk handed to a data callback.
/// Chunk boundaries carry no meaning; there is no framing.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 32 * 1024;

// ============================================================================
// Timeouts
// ============================================================================

/// Outbound connect timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3000;

/// Server-side TLS handshake timeout in milliseconds.
///
/// Handshakes run off the accept loop; a peer that does not finish within
/// this window is dropped without ever becoming a registered connection.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

/// Upper bound on the write-half shutdown performed when a connection closes.
pub const CLOSE_TIMEOUT_MS: u64 = 500;
