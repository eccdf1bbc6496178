//! Connection forwarding
//!
//! For each accepted connection this module reads one HTTP/1.x request head,
//! rewrites it, opens a fresh connection to the configured upstream, sends
//! the rewritten head and declared body, then relays bytes in both
//! directions until the upstream is done.
//!
//! ```text
//! client ──TPROXY──> listener ──> session ──> upstream
//!                                  │
//!                        parse → rewrite → dial → relay
//! ```
//!
//! Failures never produce a response: both connections are closed and the
//! session logs one `warn` record naming the phase it failed in.

mod accept;
mod context;
mod session;
mod upstream;

pub use accept::{run_accept_loop, spawn_session};
pub use context::ForwarderContext;
pub use session::{handle_session, SessionOutcome, SessionPhase};
pub use upstream::UpstreamDialer;
