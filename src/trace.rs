//! Structured diagnostics (ambient; SPEC_FULL.md §10.1): emits the same event taxonomy the
//! teacher driver's CMAP/SDAM/command event system does, but directly through `tracing` rather
//! than a typed event-listener registry, gated behind the `tracing-unstable` feature paired with
//! `log` for downstream consumers that prefer the `log` facade — the same flag name and crate
//! pairing the teacher uses for its own tracing integration.
//!
//! Every macro here compiles away to nothing when the feature is off, so emission is always a
//! synchronous, non-blocking call: it can never introduce a suspension point into the
//! single-threaded cooperative scheduling model of spec §5.

use once_cell::sync::Lazy;
use std::collections::HashSet;

/// Command names whose request/reply bodies must never reach a log, per SPEC_FULL.md §10.1,
/// mirroring the teacher's `REDACTED_COMMANDS` set in `client/executor.rs`.
pub(crate) static REDACTED_COMMANDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "saslstart",
        "saslcontinue",
        "authenticate",
        "getnonce",
        "createuser",
        "updateuser",
        "copydbgetnonce",
        "copydb",
    ]
    .into_iter()
    .collect()
});

/// Whether a command's body should be redacted before being logged, per SPEC_FULL.md §10.1: by
/// name, or because it carries `speculativeAuthenticate` (sent alongside `hello`/`isMaster` to
/// pipeline authentication into the handshake).
pub(crate) fn should_redact(command_name: &str, body: &bson::Document) -> bool {
    REDACTED_COMMANDS.contains(command_name.to_ascii_lowercase().as_str())
        || body.contains_key("speculativeAuthenticate")
}

#[cfg(feature = "tracing-unstable")]
macro_rules! trace_debug {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}
#[cfg(not(feature = "tracing-unstable"))]
macro_rules! trace_debug {
    ($($arg:tt)*) => {
        ()
    };
}

#[cfg(feature = "tracing-unstable")]
macro_rules! trace_warn {
    ($($arg:tt)*) => {
        tracing::warn!($($arg)*)
    };
}
#[cfg(not(feature = "tracing-unstable"))]
macro_rules! trace_warn {
    ($($arg:tt)*) => {
        ()
    };
}

pub(crate) use trace_debug as debug;
pub(crate) use trace_warn as warn;

#[cfg(test)]
mod test {
    use super::*;
    use bson::doc;

    #[test]
    fn redacted_commands_are_matched_case_insensitively() {
        assert!(should_redact("saslStart", &doc! {}));
        assert!(should_redact("AUTHENTICATE", &doc! {}));
        assert!(!should_redact("find", &doc! {}));
    }

    #[test]
    fn speculative_authenticate_forces_redaction_regardless_of_command_name() {
        assert!(should_redact("hello", &doc! { "speculativeAuthenticate": {} }));
    }
}
