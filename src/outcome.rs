use std::ffi::CStr;
use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

use crate::audit::{Catalog, Severity};
use crate::conversation::MessageKind;
use crate::decision::Decision;

// Exit codes of the matcher process
pub const EXIT_NO_FACE_MODEL: i32 = 10;
pub const EXIT_TIMEOUT_REACHED: i32 = 11;
pub const EXIT_ABORT: i32 = 12;
pub const EXIT_TOO_DARK: i32 = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceMatchOutcome {
    Success,
    NoFaceModel,
    TimeoutExceeded,
    AbortedGeneral,
    ImageTooDark,
    UnknownError(i32),
    SignalKilled(i32),
}

/// What to tell the user, what to log, and what to return for one outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub outcome: FaceMatchOutcome,
    pub user_message: Option<(MessageKind, String)>,
    pub severity: Severity,
    pub log_line: String,
    pub decision: Decision,
}

pub fn classify(status: ExitStatus) -> FaceMatchOutcome {
    match (status.code(), status.signal()) {
        (Some(code), _) => FaceMatchOutcome::from_exit_code(code),
        (None, Some(signal)) => FaceMatchOutcome::SignalKilled(signal),
        // stopped or continued, never a success
        (None, None) => FaceMatchOutcome::UnknownError(-1),
    }
}

impl FaceMatchOutcome {
    pub fn from_exit_code(code: i32) -> Self {
        match code {
            0 => FaceMatchOutcome::Success,
            EXIT_NO_FACE_MODEL => FaceMatchOutcome::NoFaceModel,
            EXIT_TIMEOUT_REACHED => FaceMatchOutcome::TimeoutExceeded,
            EXIT_ABORT => FaceMatchOutcome::AbortedGeneral,
            EXIT_TOO_DARK => FaceMatchOutcome::ImageTooDark,
            other => FaceMatchOutcome::UnknownError(other),
        }
    }

    pub fn is_success(self) -> bool {
        self == FaceMatchOutcome::Success
    }

    /// Builds the report for this outcome. `confirm` enables the
    /// "Identified face as ..." message on success.
    pub fn report(self, username: &str, confirm: bool, catalog: &dyn Catalog) -> Report {
        let error = |msgid: &str| Some((MessageKind::Error, catalog.translate(msgid).into_owned()));
        let (user_message, severity, log_line, decision) = match self {
            FaceMatchOutcome::Success => {
                let confirmation = confirm.then(|| {
                    let text = catalog
                        .translate("Identified face as {}")
                        .replacen("{}", username, 1);
                    (MessageKind::Info, text)
                });
                (
                    confirmation,
                    Severity::Info,
                    "Login approved".to_string(),
                    Decision::Success,
                )
            }
            FaceMatchOutcome::NoFaceModel => (
                error("There is no face model known"),
                Severity::Notice,
                "Failure, no face model known".to_string(),
                Decision::AuthError,
            ),
            FaceMatchOutcome::TimeoutExceeded => (
                None,
                Severity::Error,
                "Failure, timeout reached".to_string(),
                Decision::AuthError,
            ),
            FaceMatchOutcome::AbortedGeneral => (
                None,
                Severity::Error,
                "Failure, general abort".to_string(),
                Decision::AuthError,
            ),
            FaceMatchOutcome::ImageTooDark => (
                error("Face detection image too dark"),
                Severity::Error,
                "Failure, image too dark".to_string(),
                Decision::AuthError,
            ),
            FaceMatchOutcome::UnknownError(code) => (
                Some((
                    MessageKind::Error,
                    format!("{}{code}", catalog.translate("Unknown error: ")),
                )),
                Severity::Error,
                format!("Failure, unknown error {code}"),
                Decision::AuthError,
            ),
            FaceMatchOutcome::SignalKilled(signal) => (
                None,
                Severity::Error,
                format!("Child killed by signal {} ({signal})", signal_name(signal)),
                Decision::AuthError,
            ),
        };
        Report {
            outcome: self,
            user_message,
            severity,
            log_line,
            decision,
        }
    }
}

impl fmt::Display for FaceMatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaceMatchOutcome::Success => f.write_str("face identified"),
            FaceMatchOutcome::NoFaceModel => f.write_str("no face model known"),
            FaceMatchOutcome::TimeoutExceeded => f.write_str("timeout reached"),
            FaceMatchOutcome::AbortedGeneral => f.write_str("aborted"),
            FaceMatchOutcome::ImageTooDark => f.write_str("image too dark"),
            FaceMatchOutcome::UnknownError(code) => write!(f, "unknown error {code}"),
            FaceMatchOutcome::SignalKilled(signal) => {
                write!(f, "killed by signal {} ({signal})", signal_name(*signal))
            }
        }
    }
}

fn signal_name(signal: i32) -> String {
    unsafe {
        let ptr = libc::strsignal(signal);
        if ptr.is_null() {
            return "unknown signal".to_string();
        }
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}
