//! Bring a freshly created instance from bare OS to a running application.
//!
//! The procedure is a fixed sequence of [Step]s:
//!
//! 1. apply OS package updates
//! 2. install the language runtime, `git`, the process supervisor, and the package manager
//! 3. create the application directory, owned by the application account
//! 4. fetch the source-control credential from the secret store
//! 5. resolve the branch (explicit override, otherwise the environment's default)
//! 6. clone the repository, or hard-reset an existing clone to the remote tip
//! 7. hand off to the repository's build script with the environment label
//! 8. persist the supervisor's process list and register it to start on boot
//!
//! Privileged work runs as root; everything that touches the repository runs as the
//! application account. The same [Procedure] can be rendered into a shell script (used as
//! instance user data) or run natively by an [Executor].
//!
//! # Status
//!
//! `webstack-bootstrap` is **ALPHA** software: expect breaking changes.

use std::path::PathBuf;
use thiserror::Error;

pub mod environment;
pub use environment::{
    resolve_branch, resolve_default_branch, resolve_environment_label, Branch, Environment, Label,
    DEVELOPMENT_BRANCH, PRODUCTION_BRANCH,
};
mod config;
pub use config::{Config, DEFAULT_CONFIG_PATH, DEFAULT_LOG_PATH};
pub mod procedure;
pub use procedure::{Account, Action, Arg, Context, Fragment, Invocation, Procedure, Step};
mod render;
pub use render::INSTALL_PATH;
mod secrets;
pub use secrets::Credential;
mod runner;
pub use runner::{Command, Output, Runner};
mod executor;
pub use executor::{Executor, Report};

cfg_if::cfg_if! {
    if #[cfg(feature = "aws")] {
        pub use runner::SystemRunner;
    }
}

/// Errors that can occur while preparing or running the procedure.
#[derive(Error, Debug)]
pub enum Error {
    #[error("unknown environment: {0}")]
    UnknownEnvironment(String),
    #[error("invalid branch name: {0:?}")]
    InvalidBranch(String),
    #[error("unsupported repository url (expected https://): {0}")]
    UnsupportedRepository(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("region used before it was resolved")]
    UnresolvedRegion,
    #[error("branch used before it was resolved")]
    UnresolvedBranch,
    #[error("credential used before it was fetched")]
    MissingCredential,
    #[error("secret {0} has no string value")]
    EmptySecret(String),
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("step {index} ({step}) exited with status {code}")]
    StepFailed {
        step: &'static str,
        index: usize,
        code: i32,
    },
    #[error("step {index} ({step}) aborted: {source}")]
    StepAborted {
        step: &'static str,
        index: usize,
        #[source]
        source: Box<Error>,
    },
    #[error("failed to open log {path:?}: {source}")]
    Log {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Exit status to surface for this error.
    ///
    /// A failed command propagates its own status; everything else exits with 1.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::StepFailed { code, .. } => u8::try_from(*code)
                .ok()
                .filter(|code| *code != 0)
                .unwrap_or(1),
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(2, 2)]
    #[test_case(127, 127)]
    #[test_case(255, 255)]
    #[test_case(256, 1; "out of range")]
    #[test_case(-1, 1; "signal")]
    #[test_case(0, 1; "zero")]
    fn test_exit_code(code: i32, expected: u8) {
        let err = Error::StepFailed {
            step: procedure::UPDATE_PACKAGES,
            index: 1,
            code,
        };
        assert_eq!(err.exit_code(), expected);
    }

    #[test]
    fn test_exit_code_other() {
        assert_eq!(Error::UnresolvedBranch.exit_code(), 1);
    }
}
