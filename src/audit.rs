use std::borrow::Cow;
use std::ffi::CString;
use std::sync::Once;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Notice,
    Error,
}

impl Severity {
    fn syslog_priority(self) -> libc::c_int {
        match self {
            Severity::Info => libc::LOG_INFO,
            Severity::Notice => libc::LOG_NOTICE,
            Severity::Error => libc::LOG_ERR,
        }
    }

    fn level(self) -> log::Level {
        match self {
            Severity::Info | Severity::Notice => log::Level::Info,
            Severity::Error => log::Level::Error,
        }
    }
}

pub trait AuditLog: Send + Sync {
    fn record(&self, severity: Severity, line: &str);
}

/// Looks up translations of user-visible messages.
pub trait Catalog: Send + Sync {
    fn translate<'a>(&self, msgid: &'a str) -> Cow<'a, str>;
}

/// Returns every message untranslated.
#[derive(Debug, Default, Clone, Copy)]
pub struct Untranslated;

impl Catalog for Untranslated {
    fn translate<'a>(&self, msgid: &'a str) -> Cow<'a, str> {
        Cow::Borrowed(msgid)
    }
}

static OPENLOG: Once = Once::new();

const IDENT: &[u8] = b"pam_faceguard\0";

/// Writes audit lines to the `authpriv` syslog facility.
#[derive(Debug, Default, Clone, Copy)]
pub struct Syslog;

impl Syslog {
    pub fn open() -> Self {
        OPENLOG.call_once(|| unsafe {
            // openlog keeps the pointer, IDENT is 'static
            libc::openlog(IDENT.as_ptr().cast(), 0, libc::LOG_AUTHPRIV);
        });
        Syslog
    }
}

impl AuditLog for Syslog {
    fn record(&self, severity: Severity, line: &str) {
        log::log!(severity.level(), "{line}");
        let Ok(msg) = CString::new(line.replace('\0', "")) else {
            return;
        };
        unsafe {
            libc::syslog(
                severity.syslog_priority(),
                b"%s\0".as_ptr().cast(),
                msg.as_ptr(),
            );
        }
    }
}
