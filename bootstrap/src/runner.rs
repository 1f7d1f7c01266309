//! Execution of resolved commands.

use crate::Error;
use std::{future::Future, path::PathBuf};

/// A fully resolved command, ready to run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    pub program: String,
    pub args: Vec<String>,
    pub dir: Option<PathBuf>,
    /// Credential-free rendering for the transcript.
    pub display: String,
}

/// Captured result of a [Command].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Output {
    /// Exit status, or `None` if the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl Output {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs commands on behalf of an [crate::Executor].
pub trait Runner {
    /// Runs `command` to completion.
    fn run(&self, command: &Command) -> impl Future<Output = Result<Output, Error>> + Send;
}

cfg_if::cfg_if! {
    if #[cfg(feature = "aws")] {
        use std::process::Stdio;

        /// Runs commands as local processes.
        #[derive(Clone, Copy, Debug, Default)]
        pub struct SystemRunner;

        impl Runner for SystemRunner {
            async fn run(&self, command: &Command) -> Result<Output, Error> {
                let mut process = tokio::process::Command::new(&command.program);
                process
                    .args(&command.args)
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped());
                if let Some(dir) = &command.dir {
                    process.current_dir(dir);
                }
                let output = process.output().await.map_err(|source| Error::Spawn {
                    program: command.program.clone(),
                    source,
                })?;
                Ok(Output {
                    code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                })
            }
        }
    }
}
