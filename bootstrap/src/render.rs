//! Rendering of a [Procedure] into a standalone bash script.
//!
//! The script is used as instance user data. It runs as root, appends a timestamped transcript
//! to the procedure's log, accepts an optional branch override as its first argument, and
//! installs itself at [INSTALL_PATH] so operators can re-run it later.

use crate::{Action, Arg, Branch, Fragment, Invocation, Procedure};
use std::fmt::Write as _;

/// Where the rendered script installs itself for ad-hoc redeploys.
pub const INSTALL_PATH: &str = "/usr/local/sbin/webstack-bootstrap.sh";

/// Marker identifying the script (so it only installs itself, never its interpreter).
const MARKER: &str = "webstack bootstrap procedure";

/// Shell variable holding the region.
const REGION_VARIABLE: &str = "AWS_REGION";

/// Shell variable holding the branch override (the script's first argument).
const OVERRIDE_VARIABLE: &str = "BRANCH_OVERRIDE";

/// Shell variable holding the resolved branch.
const BRANCH_VARIABLE: &str = "BRANCH";

/// Shell variable holding the fetched credential.
const CREDENTIAL_VARIABLE: &str = "GIT_TOKEN";

impl Procedure {
    /// Renders the procedure as a bash script.
    pub fn render(&self) -> String {
        let account = self.account();
        let total = self.steps().len();
        let mut out = String::new();

        // Preamble
        let _ = writeln!(out, "#!/bin/bash");
        let _ = writeln!(out, "# {MARKER} ({})", self.environment());
        let _ = writeln!(out, "#");
        let _ = writeln!(out, "# Usage: {INSTALL_PATH} [BRANCH]");
        let _ = writeln!(out, "set -euo pipefail");
        let _ = writeln!(out, "shopt -s extglob");
        let _ = writeln!(out);
        let _ = writeln!(out, "LOG={}", quote(&self.log().to_string_lossy()));
        let _ = writeln!(out, "mkdir -p \"$(dirname \"$LOG\")\"");
        let _ = writeln!(out, "exec > >(tee -a \"$LOG\") 2>&1");
        let _ = writeln!(out);
        let _ = writeln!(out, "log() {{");
        let _ = writeln!(
            out,
            "  printf '%s %s\\n' \"$(date -u +%Y-%m-%dT%H:%M:%SZ)\" \"$*\""
        );
        let _ = writeln!(out, "}}");
        let _ = writeln!(
            out,
            "trap 'status=$?; log \"bootstrap failed with status $status\"; exit $status' ERR"
        );
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "export {REGION_VARIABLE}=\"${{{REGION_VARIABLE}:-{}}}\"",
            escape(self.region())
        );
        let _ = writeln!(out, "{OVERRIDE_VARIABLE}=\"${{1:-}}\"");
        let _ = writeln!(out);
        let _ = writeln!(out, "SELF=\"$(readlink -f \"$0\")\"");
        let _ = writeln!(
            out,
            "if [ \"$SELF\" != {INSTALL_PATH} ] && grep -qs {} \"$SELF\"; then",
            quote(MARKER)
        );
        let _ = writeln!(out, "  install -D -m 0755 \"$SELF\" {INSTALL_PATH}");
        let _ = writeln!(out, "fi");
        let _ = writeln!(out, "log \"starting bootstrap\"");

        // Steps
        for (offset, step) in self.steps().iter().enumerate() {
            let _ = writeln!(out);
            let _ = writeln!(out, "log \"step {}/{total}: {}\"", offset + 1, step.name);
            match &step.action {
                Action::Run(invocations) => {
                    for invocation in invocations {
                        let _ = writeln!(out, "{}", render_invocation(invocation, account));
                    }
                }
                Action::FetchCredential { secret, fetch } => {
                    let _ = writeln!(
                        out,
                        "{CREDENTIAL_VARIABLE}=\"$({})\"",
                        render_invocation(fetch, account)
                    );
                    let _ = writeln!(
                        out,
                        "if [ -z \"${CREDENTIAL_VARIABLE}\" ] || [ \"${CREDENTIAL_VARIABLE}\" = None ]; then"
                    );
                    let _ = writeln!(
                        out,
                        "  log {}",
                        quote(&format!("secret {secret} has no string value"))
                    );
                    let _ = writeln!(out, "  exit 1");
                    let _ = writeln!(out, "fi");
                }
                Action::ResolveBranch { default } => {
                    out.push_str(&branch_resolution(default));
                    let _ = writeln!(out, "log \"resolved branch ${BRANCH_VARIABLE}\"");
                }
                Action::SyncSource { dir, clone, update } => {
                    let git_dir = dir.join(".git");
                    let _ = writeln!(out, "if [ -d {} ]; then", quote(&git_dir.to_string_lossy()));
                    for invocation in update {
                        let _ = writeln!(out, "  {}", render_invocation(invocation, account));
                    }
                    let _ = writeln!(out, "else");
                    for invocation in clone {
                        let _ = writeln!(out, "  {}", render_invocation(invocation, account));
                    }
                    let _ = writeln!(out, "fi");
                }
            }
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "log \"bootstrap complete\"");
        out
    }
}

/// Trims the override, rejects names `git` would misread, and falls back to `default`.
fn branch_resolution(default: &Branch) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{OVERRIDE_VARIABLE}=\"${{{OVERRIDE_VARIABLE}##+([[:space:]])}}\"");
    let _ = writeln!(out, "{OVERRIDE_VARIABLE}=\"${{{OVERRIDE_VARIABLE}%%+([[:space:]])}}\"");
    let _ = writeln!(out, "case \"${OVERRIDE_VARIABLE}\" in");
    let _ = writeln!(out, "  -*|*[[:space:]]*|*[[:cntrl:]]*)");
    let _ = writeln!(out, "    log \"invalid branch name: ${OVERRIDE_VARIABLE}\"");
    let _ = writeln!(out, "    exit 1");
    let _ = writeln!(out, "    ;;");
    let _ = writeln!(out, "esac");
    let _ = writeln!(
        out,
        "{BRANCH_VARIABLE}=\"${{{OVERRIDE_VARIABLE}:-{}}}\"",
        escape(default.as_str())
    );
    out
}

fn quote(value: &str) -> String {
    shell_words::quote(value).into_owned()
}

/// Escapes a literal for use inside double quotes.
fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '"' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn render_arg(arg: &Arg) -> String {
    if arg.is_literal() {
        let mut literal = String::new();
        for fragment in arg.fragments() {
            if let Fragment::Literal(value) = fragment {
                literal.push_str(value);
            }
        }
        return quote(&literal);
    }
    let mut out = String::from("\"");
    for fragment in arg.fragments() {
        match fragment {
            Fragment::Literal(value) => out.push_str(&escape(value)),
            Fragment::Region => {
                let _ = write!(out, "${{{REGION_VARIABLE}}}");
            }
            Fragment::Branch => {
                let _ = write!(out, "${{{BRANCH_VARIABLE}}}");
            }
            Fragment::Credential => {
                let _ = write!(out, "${{{CREDENTIAL_VARIABLE}}}");
            }
        }
    }
    out.push('"');
    out
}

fn render_invocation(invocation: &Invocation, account: &str) -> String {
    let line = invocation
        .argv(account)
        .iter()
        .map(render_arg)
        .collect::<Vec<_>>()
        .join(" ");
    match &invocation.dir {
        Some(dir) => format!("(cd {} && {line})", quote(&dir.to_string_lossy())),
        None => line,
    }
}
