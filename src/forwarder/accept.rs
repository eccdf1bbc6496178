//! Accept loop
//!
//! Accepts connections and spawns one independent session task per
//! connection. Sessions share nothing but the immutable context.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn, Instrument};

use super::context::ForwarderContext;
use super::session::handle_session;
use crate::tproxy::{TproxyConnection, TproxyListener};

/// Pause after running out of file descriptors
const FD_EXHAUSTION_BACKOFF: Duration = Duration::from_millis(100);

/// Spawn a task running one session, logged under a per-connection span
pub fn spawn_session(conn: TproxyConnection, ctx: Arc<ForwarderContext>) -> JoinHandle<()> {
    let span = tracing::info_span!("session", client = %conn.client_addr());

    tokio::spawn(
        async move {
            let outcome = handle_session(conn, &ctx).await;
            outcome.log();
        }
        .instrument(span),
    )
}

/// Run the accept loop.
///
/// Accept errors are logged and the loop continues; this future only
/// finishes when it is dropped.
pub async fn run_accept_loop(listener: TproxyListener, ctx: Arc<ForwarderContext>) {
    info!(
        "Starting accept loop on {}, forwarding to {}",
        listener.listen_addr(),
        ctx.dialer.address()
    );

    loop {
        match listener.accept().await {
            Ok(conn) => {
                spawn_session(conn, Arc::clone(&ctx));
            }
            Err(e) => {
                warn!(class = %e.class(), "Accept error: {}", e);
                if e.is_fd_exhaustion() {
                    tokio::time::sleep(FD_EXHAUSTION_BACKOFF).await;
                }
            }
        }
    }
}
