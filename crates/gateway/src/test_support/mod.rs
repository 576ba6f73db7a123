//! In-memory SSH collaborators.
//!
//! Used by the unit tests and by the integration tests under `tests/`, which
//! run the real HTTP and WebSocket stack against a [`MockConnector`].
//!
//! - [`MockConnector`] hands out [`MockConnection`]s and remembers them
//! - [`MockShellChannel`] plays a [`ShellScript`] and records what it receives
//!   in a [`ShellRecorder`]
//! - [`MemoryFileTransfer`] keeps a file tree in a map

mod connection;
mod files;
mod shell;

use std::sync::atomic::{AtomicU64, Ordering};

pub use connection::{MockConnection, MockConnector};
pub use files::MemoryFileTransfer;
pub use shell::{MockShellChannel, ShellEvent, ShellRecorder, ShellScript};

static CLOSE_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Returns a process-wide increasing number used to order close calls.
fn next_close_order() -> u64 {
    CLOSE_SEQUENCE.fetch_add(1, Ordering::SeqCst)
}
