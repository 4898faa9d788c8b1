use crate::decision::Decision;
use crate::task::CancelToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Info,
    Error,
}

/// The channel to the user being authenticated.
///
/// Failures carry the code the authentication stack should see.
pub trait Conversation: Send + Sync {
    fn send_message(&self, kind: MessageKind, text: &str) -> Result<(), Decision>;

    /// Name of the account being authenticated.
    fn username(&self) -> Result<String, Decision>;

    /// Blocks until the user submits a password. Implementations register
    /// their blocking read with `cancel` so a forced stop can interrupt it.
    fn request_credential(&self, cancel: &CancelToken) -> Result<String, Decision>;
}
