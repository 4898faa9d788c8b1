use std::ffi::{CStr, CString};
use std::io;
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use once_cell::sync::Lazy;

use crate::audit::{AuditLog, Severity, Syslog};
use crate::conversation::{Conversation, MessageKind};
use crate::coordinator::RaceCoordinator;
use crate::decision::{Decision, PAM_IGNORE, PAM_SUCCESS};
use crate::error::FaceguardError;
use crate::task::CancelToken;

// PAM item types
const PAM_CONV: c_int = 5;
const PAM_AUTHTOK: c_int = 6;

// PAM message styles
const PAM_ERROR_MSG: c_int = 3;
const PAM_TEXT_INFO: c_int = 4;

const PAM_CONV_ERR: c_int = 19;

// not bound by the libc crate on Linux
const PTHREAD_CANCEL_DISABLE: c_int = 1;

extern "C" {
    fn pthread_cancel(thread: libc::pthread_t) -> c_int;
    fn pthread_setcancelstate(state: c_int, oldstate: *mut c_int) -> c_int;
}

// PAM handle opaque pointer type
type PamHandle = c_void;

#[repr(C)]
struct PamMessage {
    msg_style: c_int,
    msg: *const c_char,
}

#[repr(C)]
#[allow(dead_code)]
struct PamResponse {
    resp: *mut c_char,
    resp_retcode: c_int,
}

type ConvFn = unsafe extern "C" fn(
    num_msg: c_int,
    msg: *mut *const PamMessage,
    resp: *mut *mut PamResponse,
    appdata_ptr: *mut c_void,
) -> c_int;

#[repr(C)]
struct PamConv {
    conv: Option<ConvFn>,
    appdata_ptr: *mut c_void,
}

type GetItemFn =
    unsafe extern "C" fn(pamh: *const PamHandle, item_type: c_int, item: *mut *const c_void) -> c_int;
type GetUserFn =
    unsafe extern "C" fn(pamh: *mut PamHandle, user: *mut *const c_char, prompt: *const c_char) -> c_int;
// may be torn down by thread cancellation while the host reads the password
type GetAuthtokFn = unsafe extern "C-unwind" fn(
    pamh: *mut PamHandle,
    item: c_int,
    authtok: *mut *const c_char,
    prompt: *const c_char,
) -> c_int;

type PromptMain = unsafe extern "C-unwind" fn(*mut c_void) -> *mut c_void;

/// libpam entry points, looked up in the host process.
struct Libpam {
    get_item: GetItemFn,
    get_user: GetUserFn,
    get_authtok: GetAuthtokFn,
}

static LIBPAM: Lazy<Option<Libpam>> = Lazy::new(|| unsafe {
    let get_item = symbol(b"pam_get_item\0")?;
    let get_user = symbol(b"pam_get_user\0")?;
    let get_authtok = symbol(b"pam_get_authtok\0")?;
    Some(Libpam {
        get_item: std::mem::transmute::<*mut c_void, GetItemFn>(get_item),
        get_user: std::mem::transmute::<*mut c_void, GetUserFn>(get_user),
        get_authtok: std::mem::transmute::<*mut c_void, GetAuthtokFn>(get_authtok),
    })
});

unsafe fn symbol(name: &[u8]) -> Option<*mut c_void> {
    let sym = libc::dlsym(libc::RTLD_DEFAULT, name.as_ptr().cast());
    (!sym.is_null()).then_some(sym)
}

fn libpam() -> Result<&'static Libpam, Decision> {
    LIBPAM.as_ref().ok_or(Decision::SystemError)
}

/// [`Conversation`] backed by a live PAM handle.
pub struct PamConversation {
    handle: *mut PamHandle,
    pam: &'static Libpam,
}

// SAFETY: the handle outlives every task of the attempt, and the coordinator
// never calls into PAM from two threads at once: messages are only sent
// before the prompt starts or after it has been joined.
unsafe impl Send for PamConversation {}
unsafe impl Sync for PamConversation {}

impl PamConversation {
    fn new(handle: *mut PamHandle, pam: &'static Libpam) -> Self {
        Self { handle, pam }
    }
}

impl Conversation for PamConversation {
    fn send_message(&self, kind: MessageKind, text: &str) -> Result<(), Decision> {
        let mut conv: *const c_void = ptr::null();
        let rc = unsafe { (self.pam.get_item)(self.handle, PAM_CONV, &mut conv) };
        if rc != PAM_SUCCESS {
            return Err(Decision::from_pam(rc));
        }
        let conv = conv as *const PamConv;
        let Some(conv_fn) = (unsafe { conv.as_ref() }).and_then(|c| c.conv) else {
            return Err(Decision::from_pam(PAM_CONV_ERR));
        };
        let text = CString::new(text.replace('\0', "")).map_err(|_| Decision::SystemError)?;
        let msg = PamMessage {
            msg_style: match kind {
                MessageKind::Info => PAM_TEXT_INFO,
                MessageKind::Error => PAM_ERROR_MSG,
            },
            msg: text.as_ptr(),
        };
        let mut msgp: *const PamMessage = &msg;
        let mut resp: *mut PamResponse = ptr::null_mut();
        let rc = unsafe {
            let rc = conv_fn(1, &mut msgp, &mut resp, (*conv).appdata_ptr);
            free_responses(resp);
            rc
        };
        if rc != PAM_SUCCESS {
            return Err(Decision::from_pam(rc));
        }
        Ok(())
    }

    fn username(&self) -> Result<String, Decision> {
        let mut user: *const c_char = ptr::null();
        let rc = unsafe { (self.pam.get_user)(self.handle, &mut user, ptr::null()) };
        if rc != PAM_SUCCESS {
            return Err(Decision::from_pam(rc));
        }
        if user.is_null() {
            return Err(Decision::SystemError);
        }
        Ok(unsafe { CStr::from_ptr(user) }.to_string_lossy().into_owned())
    }

    /// Asks the host for the password on a bare pthread. Cancelling the token
    /// cancels that thread at the conversation's next cancellation point,
    /// such as the `read` of the terminal.
    fn request_credential(&self, cancel: &CancelToken) -> Result<String, Decision> {
        if cancel.is_cancelled() {
            return Err(Decision::from_pam(PAM_CONV_ERR));
        }
        let call = Arc::new(PromptCall::new(self.pam.get_authtok, self.handle));
        let mut thread: libc::pthread_t = unsafe { std::mem::zeroed() };
        let rc = unsafe {
            let start = std::mem::transmute::<PromptMain, extern "C" fn(*mut c_void) -> *mut c_void>(
                prompt_main,
            );
            libc::pthread_create(&mut thread, ptr::null(), start, Arc::as_ptr(&call) as *mut c_void)
        };
        if rc != 0 {
            log::error!(
                "failed to start the password prompt: {}",
                io::Error::from_raw_os_error(rc)
            );
            return Err(Decision::SystemError);
        }

        let interrupt = cancel.on_cancel({
            let call = Arc::clone(&call);
            move || call.cancel(thread)
        });
        let answer = call.wait();
        // settled, so the hook can no longer reach the thread
        unsafe { libc::pthread_join(thread, ptr::null_mut()) };
        drop(interrupt);
        answer
    }
}

enum PromptState {
    Running,
    Answered(Result<String, Decision>),
    Cancelled,
}

/// One `pam_get_authtok` call, shared by the prompt thread and its owner.
struct PromptCall {
    get_authtok: GetAuthtokFn,
    handle: *mut PamHandle,
    state: Mutex<PromptState>,
    settled: Condvar,
}

// SAFETY: only the prompt thread uses `handle`, and the owner joins that
// thread before the call is dropped.
unsafe impl Send for PromptCall {}
unsafe impl Sync for PromptCall {}

impl PromptCall {
    fn new(get_authtok: GetAuthtokFn, handle: *mut PamHandle) -> Self {
        Self {
            get_authtok,
            handle,
            state: Mutex::new(PromptState::Running),
            settled: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PromptState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn answer(&self, answer: Result<String, Decision>) {
        let mut state = self.lock();
        if matches!(*state, PromptState::Running) {
            *state = PromptState::Answered(answer);
        }
        self.settled.notify_all();
    }

    /// Cancels the prompt thread unless it has already answered.
    fn cancel(&self, thread: libc::pthread_t) {
        let mut state = self.lock();
        if matches!(*state, PromptState::Running) {
            unsafe { pthread_cancel(thread) };
            *state = PromptState::Cancelled;
            log::debug!("password prompt cancelled");
        }
        self.settled.notify_all();
    }

    fn wait(&self) -> Result<String, Decision> {
        let state = self.lock();
        let mut state = self
            .settled
            .wait_while(state, |state| matches!(state, PromptState::Running))
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match std::mem::replace(&mut *state, PromptState::Cancelled) {
            PromptState::Answered(answer) => answer,
            _ => Err(Decision::from_pam(PAM_CONV_ERR)),
        }
    }
}

// Nothing with a destructor is live across the `get_authtok` call, so a
// cancellation there unwinds this frame without running Rust code.
unsafe extern "C-unwind" fn prompt_main(arg: *mut c_void) -> *mut c_void {
    let call = &*(arg as *const PromptCall);
    let mut token: *const c_char = ptr::null();
    let rc = (call.get_authtok)(call.handle, PAM_AUTHTOK, &mut token, ptr::null());
    let mut previous: c_int = 0;
    pthread_setcancelstate(PTHREAD_CANCEL_DISABLE, &mut previous);
    call.answer(credential(rc, token));
    ptr::null_mut()
}

unsafe fn credential(rc: c_int, token: *const c_char) -> Result<String, Decision> {
    if rc != PAM_SUCCESS {
        return Err(Decision::from_pam(rc));
    }
    if token.is_null() {
        return Ok(String::new());
    }
    Ok(CStr::from_ptr(token).to_string_lossy().into_owned())
}

unsafe fn free_responses(resp: *mut PamResponse) {
    if resp.is_null() {
        return;
    }
    if !(*resp).resp.is_null() {
        libc::free((*resp).resp.cast());
    }
    libc::free(resp.cast());
}

fn identify(pamh: *mut PamHandle, password_requested: bool) -> c_int {
    let audit = Syslog::open();
    let config = match crate::config::load_config(None).map_err(FaceguardError::Config) {
        Ok(config) => config,
        Err(e) => {
            audit.record(Severity::Error, &e.to_string());
            return e.decision().to_pam();
        }
    };
    let Ok(pam) = libpam() else {
        audit.record(Severity::Error, "libpam symbols not found in the host process");
        return Decision::SystemError.to_pam();
    };

    let conversation = Arc::new(PamConversation::new(pamh, pam));
    let verdict = RaceCoordinator::new(config, conversation)
        .with_audit(Arc::new(audit))
        .identify(password_requested);
    log::debug!("attempt finished: {:?}", verdict);
    verdict.decision.to_pam()
}

// Called by PAM when a user needs to be authenticated, for example by sudo
#[no_mangle]
pub extern "C" fn pam_sm_authenticate(
    pamh: *mut PamHandle,
    _flags: c_int,
    _argc: c_int,
    _argv: *const *const c_char,
) -> c_int {
    identify(pamh, true)
}

// Called by PAM when a session is started, such as by su
#[no_mangle]
pub extern "C" fn pam_sm_open_session(
    pamh: *mut PamHandle,
    _flags: c_int,
    _argc: c_int,
    _argv: *const *const c_char,
) -> c_int {
    identify(pamh, false)
}

#[no_mangle]
pub extern "C" fn pam_sm_acct_mgmt(
    _pamh: *mut PamHandle,
    _flags: c_int,
    _argc: c_int,
    _argv: *const *const c_char,
) -> c_int {
    PAM_IGNORE
}

#[no_mangle]
pub extern "C" fn pam_sm_close_session(
    _pamh: *mut PamHandle,
    _flags: c_int,
    _argc: c_int,
    _argv: *const *const c_char,
) -> c_int {
    PAM_IGNORE
}

#[no_mangle]
pub extern "C" fn pam_sm_chauthtok(
    _pamh: *mut PamHandle,
    _flags: c_int,
    _argc: c_int,
    _argv: *const *const c_char,
) -> c_int {
    PAM_IGNORE
}

#[no_mangle]
pub extern "C" fn pam_sm_setcred(
    _pamh: *mut PamHandle,
    _flags: c_int,
    _argc: c_int,
    _argv: *const *const c_char,
) -> c_int {
    PAM_IGNORE
}
