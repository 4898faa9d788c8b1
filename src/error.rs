use thiserror::Error;

use crate::decision::Decision;

#[derive(Error, Debug)]
pub enum FaceguardError {
    /// The configuration file could not be read or parsed
    #[error("configuration error: {0:#}")]
    Config(#[from] anyhow::Error),

    /// The user or the credential source could not be reached
    #[error("conversation failed: {0}")]
    Conversation(Decision),

    /// The face matcher process could not be started
    #[error("can't spawn the matcher process: {0}")]
    Spawn(#[source] std::io::Error),

    /// A task thread could not be started
    #[error("can't start the {0} task: {1}")]
    Thread(&'static str, #[source] std::io::Error),

    /// Waiting on the face matcher process failed
    #[error("failed to wait on the matcher process: {0}")]
    Wait(#[source] std::io::Error),
}

impl FaceguardError {
    pub fn decision(&self) -> Decision {
        match self {
            FaceguardError::Conversation(code) => *code,
            FaceguardError::Config(_)
            | FaceguardError::Spawn(_)
            | FaceguardError::Thread(..)
            | FaceguardError::Wait(_) => Decision::SystemError,
        }
    }
}

pub type Result<T> = std::result::Result<T, FaceguardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_errors_keep_their_code() {
        let err = FaceguardError::Conversation(Decision::Propagate(19));
        assert_eq!(err.decision(), Decision::Propagate(19));
    }

    #[test]
    fn process_and_config_errors_are_system_errors() {
        let spawn = FaceguardError::Spawn(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert_eq!(spawn.decision(), Decision::SystemError);
        let cfg = FaceguardError::Config(anyhow::anyhow!("bad toml"));
        assert_eq!(cfg.decision(), Decision::SystemError);
        assert!(cfg.to_string().contains("bad toml"));
    }
}
