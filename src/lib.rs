pub mod audit;
pub mod config;
pub mod conversation;
pub mod coordinator;
pub mod decision;
pub mod error;
pub mod gates;
pub mod identity;
pub mod matcher;
pub mod outcome;
pub mod task;

// Re-export commonly used types
pub use coordinator::{AuthSession, Claim, ConfirmationCell, RaceCoordinator, Verdict};
pub use decision::Decision;
pub use outcome::FaceMatchOutcome;
pub use task::{CancelToken, CancellableTask};

// PAM module for cdylib
pub mod pam;
