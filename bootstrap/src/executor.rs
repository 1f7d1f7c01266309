//! Native execution of a [Procedure].

use crate::{
    resolve_branch, Action, Branch, Command, Context, Credential, Error, Invocation, Output,
    Procedure, Runner,
};
use std::time::Instant;
use tracing::{error, info};

/// Outcome of a successful run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Report {
    /// Branch the clone now tracks.
    pub branch: Branch,
    /// Whether the repository was cloned (rather than reset).
    pub cloned: bool,
}

/// Runs a [Procedure] step by step, stopping at the first failure.
pub struct Executor<R: Runner> {
    runner: R,
}

impl<R: Runner> Executor<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    /// Runs every step of `procedure` in order.
    ///
    /// `branch_override` replaces the configured default branch when present and non-empty.
    pub async fn run(
        &self,
        procedure: &Procedure,
        branch_override: Option<&str>,
    ) -> Result<Report, Error> {
        let total = procedure.steps().len();
        let mut context = Context {
            region: Some(procedure.region().to_string()),
            ..Context::default()
        };
        let mut cloned = false;
        for (offset, step) in procedure.steps().iter().enumerate() {
            let index = offset + 1;
            let start = Instant::now();
            info!(step = step.name, index, total, "starting step");
            match &step.action {
                Action::Run(invocations) => {
                    self.run_all(procedure, step.name, index, invocations, &context)
                        .await?;
                }
                Action::FetchCredential { secret, fetch } => {
                    // The secret arrives on stdout, which never reaches the transcript
                    let output = self
                        .execute(procedure, step.name, index, fetch, &context, false)
                        .await?;
                    let credential = Credential::from_stdout(secret, &output.stdout)
                        .map_err(|e| aborted(step.name, index, e))?;
                    info!(secret = secret.as_str(), "fetched credential");
                    context.credential = Some(credential);
                }
                Action::ResolveBranch { default } => {
                    let branch = resolve_branch(branch_override, default)
                        .map_err(|e| aborted(step.name, index, e))?;
                    info!(
                        branch = branch.as_str(),
                        overridden = branch != *default,
                        "resolved branch"
                    );
                    context.branch = Some(branch);
                }
                Action::SyncSource { dir, clone, update } => {
                    let existing = dir.join(".git").is_dir();
                    info!(?dir, existing, "synchronizing source");
                    let plan = if existing { update } else { clone };
                    self.run_all(procedure, step.name, index, plan, &context)
                        .await?;
                    cloned = !existing;
                }
            }
            info!(
                step = step.name,
                index,
                elapsed = ?start.elapsed(),
                "completed step"
            );
        }

        let branch = context.branch.ok_or(Error::UnresolvedBranch)?;
        info!(branch = branch.as_str(), cloned, "bootstrap complete");
        Ok(Report { branch, cloned })
    }

    async fn run_all(
        &self,
        procedure: &Procedure,
        step: &'static str,
        index: usize,
        invocations: &[Invocation],
        context: &Context,
    ) -> Result<(), Error> {
        for invocation in invocations {
            self.execute(procedure, step, index, invocation, context, true)
                .await?;
        }
        Ok(())
    }

    /// Runs one invocation, failing the step on a non-zero exit. Stdout is logged only when
    /// `echo` is set.
    async fn execute(
        &self,
        procedure: &Procedure,
        step: &'static str,
        index: usize,
        invocation: &Invocation,
        context: &Context,
        echo: bool,
    ) -> Result<Output, Error> {
        let command = invocation
            .command(procedure.account(), context)
            .map_err(|e| aborted(step, index, e))?;
        info!(step, command = command.display.as_str(), "running");
        let output = self
            .runner
            .run(&command)
            .await
            .map_err(|e| aborted(step, index, e))?;
        if echo {
            for line in output.stdout.lines().filter(|l| !l.trim().is_empty()) {
                info!(step, stdout = line);
            }
        }
        for line in output.stderr.lines().filter(|l| !l.trim().is_empty()) {
            info!(step, stderr = line);
        }
        if !output.success() {
            let code = output.code.unwrap_or(-1);
            error!(
                step,
                index,
                code,
                command = command.display.as_str(),
                "command failed"
            );
            return Err(Error::StepFailed { step, index, code });
        }
        Ok(output)
    }
}

fn aborted(step: &'static str, index: usize, source: Error) -> Error {
    Error::StepAborted {
        step,
        index,
        source: Box::new(source),
    }
}

impl Invocation {
    /// Resolves placeholders and the account switch into a runnable [Command].
    pub fn command(&self, account: &str, context: &Context) -> Result<Command, Error> {
        let argv = self.argv(account);
        let display = argv
            .iter()
            .map(|arg| shell_words::quote(&arg.redacted(context)).into_owned())
            .collect::<Vec<_>>()
            .join(" ");
        let mut resolved = argv
            .iter()
            .map(|arg| arg.resolve(context))
            .collect::<Result<Vec<_>, _>>()?;
        let program = resolved.remove(0);
        Ok(Command {
            program,
            args: resolved,
            dir: self.dir.clone(),
            display,
        })
    }
}
