use crate::audit::{AuditLog, Catalog, Severity};
use crate::config::CoreConfig;
use crate::conversation::{Conversation, MessageKind};
use crate::decision::Decision;

/// Environment variables that mark a remote login.
pub const REMOTE_SESSION_VARS: [&str; 3] = ["SSH_CONNECTION", "SSH_CLIENT", "SSHD_OPTS"];

/// Looks variables up in the real process environment.
pub fn process_env(name: &str) -> bool {
    std::env::var_os(name).is_some()
}

/// Runs the gates in order. Returns the decision of the first gate that
/// stops the attempt, or `None` when facial authentication should proceed.
pub fn preflight(
    core: &CoreConfig,
    env_is_set: &dyn Fn(&str) -> bool,
    conversation: &dyn Conversation,
    audit: &dyn AuditLog,
    catalog: &dyn Catalog,
) -> Option<Decision> {
    if core.disabled {
        audit.record(
            Severity::Info,
            "Skipped authentication, faceguard is disabled",
        );
        return Some(Decision::Unavailable);
    }

    if core.ignore_ssh && REMOTE_SESSION_VARS.iter().any(|var| env_is_set(var)) {
        audit.record(
            Severity::Info,
            "Skipped authentication, SSH session detected",
        );
        return Some(Decision::Unavailable);
    }

    if core.ignore_closed_lid && lid_closed(&core.lid_state_glob, audit) {
        audit.record(
            Severity::Info,
            "Skipped authentication, closed lid detected",
        );
        return Some(Decision::Unavailable);
    }

    if core.detection_notice {
        let notice = catalog.translate("Attempting facial authentication");
        if conversation.send_message(MessageKind::Info, &notice).is_err() {
            audit.record(Severity::Error, "Failed to send detection notice");
        }
    }

    None
}

/// Whether any lid state file matched by `pattern` reports "closed".
/// A pattern that cannot be enumerated counts as an open lid.
pub fn lid_closed(pattern: &str, audit: &dyn AuditLog) -> bool {
    let paths = match glob::glob(pattern) {
        Ok(paths) => paths,
        Err(e) => {
            audit.record(
                Severity::Error,
                &format!("Failed to read files from glob {pattern}: {e}"),
            );
            return false;
        }
    };
    paths
        .filter_map(|entry| entry.ok())
        .filter_map(|path| std::fs::read_to_string(path).ok())
        .any(|state| state.contains("closed"))
}
