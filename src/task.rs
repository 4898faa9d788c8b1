use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

type Hook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct TokenInner {
    cancelled: AtomicBool,
    next_id: AtomicU64,
    hooks: Mutex<Vec<(u64, Hook)>>,
}

impl TokenInner {
    fn hooks(&self) -> MutexGuard<'_, Vec<(u64, Hook)>> {
        self.hooks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Interrupt request shared between a task's owner and the operation it runs.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Registers `hook` as a cancellation point for as long as the returned
    /// guard lives. If the token was already cancelled the hook runs now.
    ///
    /// Hooks run with the token's lock held and must not call back into it.
    pub fn on_cancel<F>(&self, hook: F) -> CancelGuard
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut hooks = self.inner.hooks();
        if self.is_cancelled() {
            drop(hooks);
            hook();
        } else {
            hooks.push((id, Box::new(hook)));
        }
        CancelGuard {
            inner: Arc::clone(&self.inner),
            id,
        }
    }

    /// Sets the interrupt flag and fires every registered hook, once.
    pub fn cancel(&self) {
        let mut hooks = self.inner.hooks();
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        for (_, hook) in hooks.drain(..) {
            hook();
        }
    }
}

/// Deregisters a cancellation hook when the operation leaves its blocking call.
pub struct CancelGuard {
    inner: Arc<TokenInner>,
    id: u64,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.inner.hooks().retain(|(id, _)| *id != self.id);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Active,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPoll {
    Ready,
    Running,
}

type Outcome<T> = thread::Result<T>;
type Operation<T> = Box<dyn FnOnce(&CancelToken) -> T + Send>;

struct Slot<T> {
    value: Mutex<Option<Outcome<T>>>,
    ready: Condvar,
}

impl<T> Slot<T> {
    fn lock(&self) -> MutexGuard<'_, Option<Outcome<T>>> {
        self.value.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct CancellableTask<T: Send + 'static> {
    name: String,
    state: TaskState,
    operation: Option<Operation<T>>,
    handle: Option<JoinHandle<()>>,
    slot: Arc<Slot<T>>,
    token: CancelToken,
}

impl<T: Send + 'static> CancellableTask<T> {
    pub fn new<F>(name: impl Into<String>, operation: F) -> Self
    where
        F: FnOnce(&CancelToken) -> T + Send + 'static,
    {
        Self {
            name: name.into(),
            state: TaskState::Idle,
            operation: Some(Box::new(operation)),
            handle: None,
            slot: Arc::new(Slot {
                value: Mutex::new(None),
                ready: Condvar::new(),
            }),
            token: CancelToken::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TaskState::Active
    }

    /// Spawns the background thread.
    ///
    /// # Panics
    /// If the task was already started.
    pub fn start(&mut self) -> std::io::Result<()> {
        let operation = match (self.state, self.operation.take()) {
            (TaskState::Idle, Some(op)) => op,
            _ => panic!("task `{}` started twice", self.name),
        };
        let slot = Arc::clone(&self.slot);
        let token = self.token.clone();
        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                let outcome =
                    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| operation(&token)));
                *slot.lock() = Some(outcome);
                slot.ready.notify_all();
            })?;
        log::debug!("task `{}` started", self.name);
        self.handle = Some(handle);
        self.state = TaskState::Active;
        Ok(())
    }

    /// Waits at most `timeout` for the operation to finish without taking its result.
    pub fn poll_timeout(&self, timeout: Duration) -> TaskPoll {
        if self.state == TaskState::Idle {
            return TaskPoll::Running;
        }
        let guard = self.slot.lock();
        let (guard, _) = self
            .slot
            .ready
            .wait_timeout_while(guard, timeout, |value| value.is_none())
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.is_some() || self.state == TaskState::Stopped {
            TaskPoll::Ready
        } else {
            TaskPoll::Running
        }
    }

    /// Joins the background thread. With `force`, the task's cancellation
    /// points are fired first. No-op unless the task is active.
    pub fn stop(&mut self, force: bool) {
        if self.state != TaskState::Active {
            return;
        }
        if force {
            log::debug!("task `{}` interrupted", self.name);
            self.token.cancel();
        }
        if let Some(handle) = self.handle.take() {
            // the thread body catches the operation's panic, join cannot fail
            let _ = handle.join();
        }
        self.state = TaskState::Stopped;
        log::debug!("task `{}` stopped", self.name);
    }

    /// Takes the operation's result. A panic inside the operation resumes here.
    ///
    /// # Panics
    /// If the task is not stopped or its result was already taken.
    pub fn result(&mut self) -> T {
        assert!(
            self.state == TaskState::Stopped,
            "result of task `{}` read while {:?}",
            self.name,
            self.state
        );
        let outcome = self.slot.lock().take();
        match outcome {
            Some(Ok(value)) => value,
            Some(Err(payload)) => std::panic::resume_unwind(payload),
            None => panic!("result of task `{}` read twice", self.name),
        }
    }
}

impl<T: Send + 'static> Drop for CancellableTask<T> {
    fn drop(&mut self) {
        if self.state == TaskState::Active {
            self.stop(false);
        }
    }
}
