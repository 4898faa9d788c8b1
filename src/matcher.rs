use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::{MatcherConfig, Signal};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatcherCommand {
    pub interpreter: PathBuf,
    pub script: PathBuf,
}

impl From<&MatcherConfig> for MatcherCommand {
    fn from(cfg: &MatcherConfig) -> Self {
        Self {
            interpreter: cfg.interpreter.clone(),
            script: cfg.script.clone(),
        }
    }
}

impl MatcherCommand {
    pub fn spawn(&self, username: &str) -> io::Result<MatcherProcess> {
        let child = Command::new(&self.interpreter)
            .arg(&self.script)
            .arg(username)
            .stdin(Stdio::null())
            .spawn()?;
        log::debug!(
            "spawned matcher {} {} for {} (pid {})",
            self.interpreter.display(),
            self.script.display(),
            username,
            child.id()
        );
        Ok(MatcherProcess {
            terminator: Terminator {
                shared: Arc::new(Shared {
                    pid: child.id() as libc::pid_t,
                    exited: Mutex::new(false),
                    delivered: AtomicUsize::new(0),
                }),
            },
            child,
            reaped: false,
        })
    }
}

struct Shared {
    pid: libc::pid_t,
    exited: Mutex<bool>,
    delivered: AtomicUsize,
}

/// Signals the matcher while it is still running.
#[derive(Clone)]
pub struct Terminator {
    shared: Arc<Shared>,
}

impl Terminator {
    /// Delivers `signal` unless the process has already exited.
    /// Returns whether the signal was sent.
    pub fn signal(&self, signal: Signal) -> io::Result<bool> {
        let exited = self
            .shared
            .exited
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *exited {
            return Ok(false);
        }
        if unsafe { libc::kill(self.shared.pid, signal.number()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        self.shared.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    /// Number of signals delivered so far.
    pub fn delivered(&self) -> usize {
        self.shared.delivered.load(Ordering::Relaxed)
    }

    pub fn pid(&self) -> u32 {
        self.shared.pid as u32
    }
}

pub struct MatcherProcess {
    child: Child,
    terminator: Terminator,
    reaped: bool,
}

impl MatcherProcess {
    pub fn terminator(&self) -> Terminator {
        self.terminator.clone()
    }

    /// Blocks until the matcher exits and reaps it.
    pub fn wait(mut self) -> io::Result<ExitStatus> {
        let shared = &self.terminator.shared;
        // observe the exit without reaping so signal() never hits a recycled pid
        loop {
            let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
            let rc = unsafe {
                libc::waitid(
                    libc::P_PID,
                    shared.pid as libc::id_t,
                    &mut info,
                    libc::WEXITED | libc::WNOWAIT,
                )
            };
            if rc == 0 {
                break;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
        *shared
            .exited
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = true;
        let status = self.child.wait()?;
        self.reaped = true;
        Ok(status)
    }
}

impl Drop for MatcherProcess {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        log::warn!("matcher (pid {}) dropped unreaped, killing it", self.child.id());
        let _ = self.terminator.signal(Signal(libc::SIGKILL));
        let _ = self.child.wait();
    }
}
