use std::io;
use std::process::ExitStatus;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::audit::{AuditLog, Catalog, Severity, Syslog, Untranslated};
use crate::config::{Config, Signal, Workaround};
use crate::conversation::Conversation;
use crate::decision::Decision;
use crate::error::{FaceguardError, Result};
use crate::gates;
use crate::matcher::{MatcherCommand, Terminator};
use crate::outcome::classify;
use crate::task::{CancelToken, CancellableTask, TaskPoll};

/// Which task resolved the attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    Unset,
    Face,
    Password,
}

/// Single-writer-wins cell: the first claim sticks, later claims are ignored.
pub struct ConfirmationCell {
    state: Mutex<Claim>,
    signal: Condvar,
}

impl Default for ConfirmationCell {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfirmationCell {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Claim::Unset),
            signal: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Claim> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns whether this call was the one that resolved the cell.
    pub fn claim(&self, claim: Claim) -> bool {
        let won = {
            let mut state = self.lock();
            if *state == Claim::Unset && claim != Claim::Unset {
                *state = claim;
                true
            } else {
                false
            }
        };
        self.signal.notify_all();
        won
    }

    /// Blocks until some task has claimed the cell.
    pub fn wait(&self) -> Claim {
        let state = self.lock();
        let state = self
            .signal
            .wait_while(state, |claim| *claim == Claim::Unset)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *state
    }

    pub fn get(&self) -> Claim {
        *self.lock()
    }
}

/// Everything one attempt needs, fixed once the username is known.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub username: String,
    pub workaround: Workaround,
    pub password_requested: bool,
    pub config: Config,
}

impl AuthSession {
    pub fn races_password(&self) -> bool {
        self.workaround.races_password() && self.password_requested
    }
}

/// The result of [`RaceCoordinator::identify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub decision: Decision,
    /// `None` when the attempt ended before the race started.
    pub winner: Option<Claim>,
    /// Termination signals delivered to the matcher.
    pub matcher_signals: usize,
}

impl Verdict {
    fn early(decision: Decision) -> Self {
        Self {
            decision,
            winner: None,
            matcher_signals: 0,
        }
    }
}

type EnvLookup = Box<dyn Fn(&str) -> bool + Send + Sync>;

pub struct RaceCoordinator {
    config: Config,
    conversation: Arc<dyn Conversation>,
    audit: Arc<dyn AuditLog>,
    catalog: Arc<dyn Catalog>,
    env_is_set: EnvLookup,
}

impl RaceCoordinator {
    /// A coordinator logging to syslog and reading the real environment.
    pub fn new(config: Config, conversation: Arc<dyn Conversation>) -> Self {
        Self {
            config,
            conversation,
            audit: Arc::new(Syslog::open()),
            catalog: Arc::new(Untranslated),
            env_is_set: Box::new(gates::process_env),
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditLog>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn Catalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_env<F>(mut self, env_is_set: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.env_is_set = Box::new(env_is_set);
        self
    }

    /// Runs one authentication attempt. `password_requested` is set when the
    /// caller wants the password prompt to race the face matcher.
    pub fn identify(&self, password_requested: bool) -> Verdict {
        if let Some(decision) = gates::preflight(
            &self.config.core,
            &*self.env_is_set,
            &*self.conversation,
            &*self.audit,
            &*self.catalog,
        ) {
            return Verdict::early(decision);
        }

        let username = match self.conversation.username() {
            Ok(name) => name,
            Err(code) => {
                self.audit.record(Severity::Error, "Failed to get username");
                return Verdict::early(code);
            }
        };

        let session = AuthSession {
            username,
            workaround: self.config.core.workaround,
            password_requested,
            config: self.config.clone(),
        };

        match self.race(&session) {
            Ok(verdict) => verdict,
            Err(e) => {
                self.audit.record(Severity::Error, &e.to_string());
                Verdict::early(e.decision())
            }
        }
    }

    fn race(&self, session: &AuthSession) -> Result<Verdict> {
        let matcher = &session.config.matcher;
        let cell = Arc::new(ConfirmationCell::new());

        let process = MatcherCommand::from(matcher)
            .spawn(&session.username)
            .map_err(FaceguardError::Spawn)?;
        let terminator = process.terminator();

        let mut face = CancellableTask::new("faceguard-matcher", {
            let cell = Arc::clone(&cell);
            move |_: &CancelToken| {
                let status = process.wait();
                cell.claim(Claim::Face);
                status
            }
        });
        // an unstarted matcher task drops the process, which kills and reaps it
        face.start().map_err(|e| FaceguardError::Thread("matcher", e))?;

        let mut password = session.races_password().then(|| {
            let cell = Arc::clone(&cell);
            let conversation = Arc::clone(&self.conversation);
            CancellableTask::new("faceguard-password", move |token: &CancelToken| {
                let credential = conversation.request_credential(token);
                cell.claim(Claim::Password);
                credential
            })
        });
        if let Some(task) = password.as_mut() {
            if let Err(e) = task.start() {
                self.terminate(&terminator, matcher.termination_signal);
                face.stop(false);
                return Err(FaceguardError::Thread("password", e));
            }
        }

        let winner = cell.wait();
        log::debug!("{:?} claimed the attempt for {}", winner, session.username);

        match (winner, password.as_mut()) {
            (Claim::Password, Some(prompt)) => {
                if face.poll_timeout(matcher.grace_period()) == TaskPoll::Running {
                    self.terminate(&terminator, matcher.termination_signal);
                }
                face.stop(false);
                prompt.stop(false);

                let credential = prompt.result().map_err(|code| {
                    self.audit
                        .record(Severity::Error, "Failed to read the password");
                    FaceguardError::Conversation(code)
                })?;

                let decision = if credential.is_empty() {
                    self.conclude(session, face.result())?
                } else {
                    self.audit.record(
                        Severity::Info,
                        "Password entered, handing over to the password stack",
                    );
                    Decision::Defer
                };
                Ok(Verdict {
                    decision,
                    winner: Some(winner),
                    matcher_signals: terminator.delivered(),
                })
            }
            (_, prompt) => {
                if let Some(prompt) = prompt {
                    if prompt.is_active() {
                        prompt.stop(true);
                    }
                }
                face.stop(false);
                let decision = self.conclude(session, face.result())?;
                Ok(Verdict {
                    decision,
                    winner: Some(winner),
                    matcher_signals: terminator.delivered(),
                })
            }
        }
    }

    fn terminate(&self, terminator: &Terminator, signal: Signal) {
        match terminator.signal(signal) {
            Ok(true) => self.audit.record(
                Severity::Error,
                &format!(
                    "Matcher (pid {}) still running after the grace period, sent {signal}",
                    terminator.pid()
                ),
            ),
            Ok(false) => {}
            Err(e) => self.audit.record(
                Severity::Error,
                &format!("Failed to signal the matcher: {e}"),
            ),
        }
    }

    /// Reports the matcher's outcome to the user and the audit log.
    fn conclude(&self, session: &AuthSession, status: io::Result<ExitStatus>) -> Result<Decision> {
        let outcome = classify(status.map_err(FaceguardError::Wait)?);
        let confirm = !session.config.core.no_confirmation;
        let report = outcome.report(&session.username, confirm, &*self.catalog);
        if let Some((kind, text)) = &report.user_message {
            if self.conversation.send_message(*kind, text).is_err() {
                self.audit
                    .record(Severity::Error, "Failed to send message to the user");
            }
        }
        self.audit.record(report.severity, &report.log_line);
        Ok(report.decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn first_claim_wins() {
        let cell = ConfirmationCell::new();
        assert_eq!(cell.get(), Claim::Unset);
        assert!(cell.claim(Claim::Password));
        assert!(!cell.claim(Claim::Face));
        assert_eq!(cell.get(), Claim::Password);
        assert_eq!(cell.wait(), Claim::Password);
    }

    #[test]
    fn unset_is_not_a_claim() {
        let cell = ConfirmationCell::new();
        assert!(!cell.claim(Claim::Unset));
        assert!(cell.claim(Claim::Face));
    }

    #[test]
    fn concurrent_claims_resolve_exactly_once() {
        for _ in 0..50 {
            let cell = Arc::new(ConfirmationCell::new());
            let handles: Vec<_> = [Claim::Face, Claim::Password]
                .into_iter()
                .map(|claim| {
                    let cell = Arc::clone(&cell);
                    thread::spawn(move || cell.claim(claim))
                })
                .collect();
            let winner = cell.wait();
            let wins: usize = handles
                .into_iter()
                .map(|h| usize::from(h.join().unwrap()))
                .sum();
            assert_eq!(wins, 1);
            assert_ne!(winner, Claim::Unset);
            assert_eq!(cell.get(), winner);
        }
    }

    #[test]
    fn waiter_wakes_on_late_claim() {
        let cell = Arc::new(ConfirmationCell::new());
        let writer = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                cell.claim(Claim::Face)
            })
        };
        assert_eq!(cell.wait(), Claim::Face);
        assert!(writer.join().unwrap());
    }

    #[test]
    fn password_race_needs_policy_and_caller() {
        let mut session = AuthSession {
            username: "alice".to_string(),
            workaround: Workaround::Input,
            password_requested: true,
            config: Config::default(),
        };
        assert!(session.races_password());
        session.password_requested = false;
        assert!(!session.races_password());
        session.password_requested = true;
        session.workaround = Workaround::Off;
        assert!(!session.races_password());
    }
}
