//! Process-wide cancellation.
//!
//! A single root [`CancellationToken`] fans out to every service; the binary
//! wires ctrl-c / SIGTERM to it. Services derive child tokens so cancelling
//! the root reaches all of them, while a subtree can still be cancelled on
//! its own.

use std::sync::OnceLock;

use quarry_logger::info;
pub use tokio_util::sync::CancellationToken;

static ROOT_TOKEN: OnceLock<CancellationToken> = OnceLock::new();

/// The process root token. Created lazily on first use.
pub fn root_token() -> CancellationToken {
    ROOT_TOKEN.get_or_init(CancellationToken::new).clone()
}

/// A child of the root token for one service.
pub fn new_child_token() -> CancellationToken {
    root_token().child_token()
}

/// Cancels the root token, telling every service to wind down.
pub fn broadcast_exit_signal() {
    info!("exit signal broadcast to all services");
    root_token().cancel();
}

/// Wires ctrl-c (and SIGTERM where the platform delivers it through the
/// handler) to the root token. Later registrations are no-ops.
pub fn register_ctrlc_handler() {
    static REGISTERED: OnceLock<()> = OnceLock::new();
    REGISTERED.get_or_init(|| {
        if let Err(err) = ctrlc::set_handler(broadcast_exit_signal) {
            quarry_logger::warn!("failed to register ctrl-c handler: {}", err);
        }
    });
}
