use anyhow::Result;
use libc::{getpwuid, uid_t};
use std::ffi::CStr;

/// The account the CLI acts on: the user who invoked sudo, else the effective user.
pub fn default_user() -> Result<String> {
    match std::env::var("SUDO_USER") {
        Ok(user) if !user.is_empty() => Ok(user),
        _ => effective_user(),
    }
}

pub fn effective_user() -> Result<String> {
    unsafe {
        let uid = libc::geteuid();
        let pwd = getpwuid(uid as uid_t);
        if pwd.is_null() {
            return Err(anyhow::anyhow!("failed to resolve current user"));
        }
        let name = CStr::from_ptr((*pwd).pw_name);
        Ok(name.to_string_lossy().into_owned())
    }
}
