//! Prometheus metrics for the gateway.
//!
//! Metric name constants live here so call sites never spell raw strings.
//! Gauges are refreshed from the gateway state after every mutation that can
//! move them; counters are bumped inline.

use metrics::{counter, gauge};

// ---------------------------------------------------------------------------
// Connection metrics
// ---------------------------------------------------------------------------

/// Current number of open sockets, authenticated or not (gauge).
pub const CONNECTIONS: &str = "swarmgate_connections_open";
/// Current number of authenticated connections (gauge).
pub const AUTHENTICATED: &str = "swarmgate_connections_authenticated";
/// Total successful AUTHs (counter).
pub const AUTH_SUCCESS: &str = "swarmgate_auth_success_total";
/// Total rejected AUTHs (counter).
pub const AUTH_FAILURE: &str = "swarmgate_auth_failure_total";
/// Total connections closed by a newer session for the same agent (counter).
pub const TAKEOVERS: &str = "swarmgate_session_takeovers_total";

// ---------------------------------------------------------------------------
// Traffic metrics
// ---------------------------------------------------------------------------

/// Inbound lines processed, labelled by verb (counter).
pub const LINES: &str = "swarmgate_lines_total";
/// Error replies sent, labelled by numeric (counter).
pub const ERROR_REPLIES: &str = "swarmgate_error_replies_total";
/// Delivered PRIVMSGs (counter).
pub const MESSAGES: &str = "swarmgate_messages_total";
/// Current number of channels (gauge).
pub const CHANNELS: &str = "swarmgate_channels";
/// Current number of agents considered online (gauge).
pub const ONLINE_AGENTS: &str = "swarmgate_online_agents";

// ---------------------------------------------------------------------------
// Bridge metrics
// ---------------------------------------------------------------------------

/// Bridge publishes that failed (counter).
pub const BRIDGE_FAILURES: &str = "swarmgate_bridge_failures_total";

// ---------------------------------------------------------------------------
// Inline helpers used at call sites
// ---------------------------------------------------------------------------

#[inline]
pub fn line(verb: &str) {
    counter!(LINES, "verb" => verb.to_owned()).increment(1);
}

#[inline]
pub fn error_reply(numeric: &'static str) {
    counter!(ERROR_REPLIES, "numeric" => numeric).increment(1);
}

#[inline]
pub fn message_delivered() {
    counter!(MESSAGES).increment(1);
}

#[inline]
pub fn auth(success: bool) {
    if success {
        counter!(AUTH_SUCCESS).increment(1);
    } else {
        counter!(AUTH_FAILURE).increment(1);
    }
}

#[inline]
pub fn takeover() {
    counter!(TAKEOVERS).increment(1);
}

#[inline]
pub fn bridge_failure() {
    counter!(BRIDGE_FAILURES).increment(1);
}

/// Refresh every gauge from a fresh count.
pub fn gauges(connections: usize, authenticated: usize, channels: usize, online: usize) {
    gauge!(CONNECTIONS).set(connections as f64);
    gauge!(AUTHENTICATED).set(authenticated as f64);
    gauge!(CHANNELS).set(channels as f64);
    gauge!(ONLINE_AGENTS).set(online as f64);
}
