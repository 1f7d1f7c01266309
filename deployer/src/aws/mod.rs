//! Deploy synthesized templates with CloudFormation.

use crate::Error;
use aws_config::{retry::RetryConfig, BehaviorVersion};
pub use aws_config::Region;
use aws_sdk_cloudformation::{
    config::retry::ReconnectMode, error::ProvideErrorMetadata, types::StackStatus,
    Client as CloudFormationClient,
};
use std::{fmt, time::Duration};
use tracing::debug;

mod deploy;
pub use deploy::deploy;
mod destroy;
pub use destroy::destroy;

pub const CMD: &str = "aws";
pub const DEPLOY_CMD: &str = "deploy";
pub const DESTROY_CMD: &str = "destroy";
pub const LIST_CMD: &str = "list";

/// Interval between status checks.
const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Longest wait for a change set to be computed.
const CHANGE_SET_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Longest wait for a stack operation (instance replacement and certificate-backed resources
/// can be slow).
const STACK_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// CloudFormation call that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    DescribeStacks,
    CreateChangeSet,
    DescribeChangeSet,
    ExecuteChangeSet,
    DeleteChangeSet,
    DeleteStack,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DescribeStacks => "DescribeStacks",
            Self::CreateChangeSet => "CreateChangeSet",
            Self::DescribeChangeSet => "DescribeChangeSet",
            Self::ExecuteChangeSet => "ExecuteChangeSet",
            Self::DeleteChangeSet => "DeleteChangeSet",
            Self::DeleteStack => "DeleteStack",
        })
    }
}

/// Creates a CloudFormation client for the given region.
pub async fn create_client(region: Region) -> CloudFormationClient {
    let retry = RetryConfig::adaptive()
        .with_max_attempts(10)
        .with_initial_backoff(Duration::from_millis(500))
        .with_max_backoff(Duration::from_secs(30))
        .with_reconnect_mode(ReconnectMode::ReconnectOnTransientError);
    let config = aws_config::defaults(BehaviorVersion::latest())
        .region(region)
        .retry_config(retry)
        .load()
        .await;
    CloudFormationClient::new(&config)
}

/// Current state of a stack.
#[derive(Clone, Debug, PartialEq)]
pub struct StackState {
    pub status: StackStatus,
    pub reason: Option<String>,
    pub outputs: Vec<(String, String)>,
}

/// Describes a stack, returning `None` when it does not exist.
pub async fn describe_stack(
    client: &CloudFormationClient,
    stack: &str,
) -> Result<Option<StackState>, Error> {
    let resp = match client.describe_stacks().stack_name(stack).send().await {
        Ok(resp) => resp,
        Err(e) => {
            let missing = e
                .as_service_error()
                .and_then(|s| s.message())
                .is_some_and(|m| m.contains("does not exist"));
            if missing {
                return Ok(None);
            }
            return Err(Error::AwsCloudFormation {
                operation: Operation::DescribeStacks,
                source: Box::new(aws_sdk_cloudformation::Error::from(e.into_service_error())),
            });
        }
    };
    let Some(found) = resp.stacks().first() else {
        return Ok(None);
    };
    let Some(status) = found.stack_status().cloned() else {
        return Ok(None);
    };
    let outputs = found
        .outputs()
        .iter()
        .filter_map(|o| Some((o.output_key()?.to_string(), o.output_value()?.to_string())))
        .collect();
    Ok(Some(StackState {
        status,
        reason: found.stack_status_reason().map(String::from),
        outputs,
    }))
}

/// Whether a status is final (nothing is in progress).
fn is_settled(status: &StackStatus) -> bool {
    !status.as_str().ends_with("_IN_PROGRESS")
}

/// Whether a settled status means the last operation succeeded.
fn is_success(status: &StackStatus) -> bool {
    status.as_str().ends_with("_COMPLETE") && !status.as_str().contains("ROLLBACK")
}

/// Polls a stack until it settles. Returns `None` if the stack disappeared (a completed
/// deletion).
pub async fn wait_for_stack(
    client: &CloudFormationClient,
    stack: &str,
) -> Result<Option<StackState>, Error> {
    let start = std::time::Instant::now();
    let mut interval = tokio::time::interval(POLL_INTERVAL);
    loop {
        interval.tick().await;
        if start.elapsed() > STACK_TIMEOUT {
            return Err(Error::Timeout(format!("stack {stack}")));
        }
        let Some(state) = describe_stack(client, stack).await? else {
            return Ok(None);
        };
        debug!(
            stack,
            status = state.status.as_str(),
            elapsed_secs = start.elapsed().as_secs(),
            "stack status"
        );
        if is_settled(&state.status) {
            return Ok(Some(state));
        }
    }
}

/// Fails unless a settled stack reached a successful state.
fn ensure_success(stack: &str, state: &StackState) -> Result<(), Error> {
    if is_success(&state.status) {
        return Ok(());
    }
    Err(Error::StackFailed {
        stack: stack.to_string(),
        status: state.status.as_str().to_string(),
        reason: state.reason.clone().unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(StackStatus::CreateComplete, true, true)]
    #[test_case(StackStatus::UpdateComplete, true, true)]
    #[test_case(StackStatus::DeleteComplete, true, true)]
    #[test_case(StackStatus::CreateInProgress, false, false)]
    #[test_case(StackStatus::UpdateCompleteCleanupInProgress, false, false)]
    #[test_case(StackStatus::RollbackComplete, true, false)]
    #[test_case(StackStatus::UpdateRollbackComplete, true, false)]
    #[test_case(StackStatus::CreateFailed, true, false)]
    fn test_status(status: StackStatus, settled: bool, success: bool) {
        assert_eq!(is_settled(&status), settled);
        if settled {
            assert_eq!(is_success(&status), success);
        }
    }

    #[test]
    fn test_ensure_success() {
        let state = StackState {
            status: StackStatus::UpdateRollbackComplete,
            reason: Some("Resource ApiInstance2 failed to stabilize".into()),
            outputs: vec![],
        };
        let Err(Error::StackFailed { status, reason, .. }) = ensure_success("storefront-prod", &state)
        else {
            panic!("expected failure");
        };
        assert_eq!(status, "UPDATE_ROLLBACK_COMPLETE");
        assert!(reason.contains("ApiInstance2"));
    }
}
