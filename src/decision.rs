use std::fmt;
use std::os::raw::c_int;

// PAM return codes
pub const PAM_SUCCESS: c_int = 0;
pub const PAM_SYSTEM_ERR: c_int = 4;
pub const PAM_AUTH_ERR: c_int = 7;
pub const PAM_AUTHINFO_UNAVAIL: c_int = 9;
pub const PAM_IGNORE: c_int = 25;

/// The single outcome an authentication attempt hands back to the PAM stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Success,
    AuthError,
    Unavailable,
    SystemError,
    /// Let the rest of the stack (the password module) decide.
    Defer,
    /// A code surfaced by the conversation channel, returned unchanged.
    Propagate(c_int),
}

impl Decision {
    pub fn to_pam(self) -> c_int {
        match self {
            Decision::Success => PAM_SUCCESS,
            Decision::AuthError => PAM_AUTH_ERR,
            Decision::Unavailable => PAM_AUTHINFO_UNAVAIL,
            Decision::SystemError => PAM_SYSTEM_ERR,
            Decision::Defer => PAM_IGNORE,
            Decision::Propagate(code) => code,
        }
    }

    /// Maps a raw libpam return value into a decision, keeping unknown codes intact.
    pub fn from_pam(code: c_int) -> Self {
        match code {
            PAM_SUCCESS => Decision::Success,
            PAM_AUTH_ERR => Decision::AuthError,
            PAM_AUTHINFO_UNAVAIL => Decision::Unavailable,
            PAM_SYSTEM_ERR => Decision::SystemError,
            PAM_IGNORE => Decision::Defer,
            other => Decision::Propagate(other),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Success => f.write_str("success"),
            Decision::AuthError => f.write_str("authentication error"),
            Decision::Unavailable => f.write_str("unavailable"),
            Decision::SystemError => f.write_str("system error"),
            Decision::Defer => f.write_str("deferred"),
            Decision::Propagate(code) => write!(f, "pam code {code}"),
        }
    }
}
