//! `destroy` subcommand for `aws`

use crate::{
    aws::{create_client, describe_stack, wait_for_stack, Operation, Region},
    deployments::{self, deployer_directory},
    stack::{stack_name, Target},
    Config, Error,
};
use aws_sdk_cloudformation::types::StackStatus;
use std::path::Path;
use tracing::{info, warn};

/// Deletes the target's stack and waits until it is gone.
pub async fn destroy(config_path: &Path, target: Target) -> Result<(), Error> {
    let config = Config::load(config_path)?;
    let stack = stack_name(&config, target);
    let root = deployer_directory(None)?;
    let client = create_client(Region::new(config.region.clone())).await;

    if describe_stack(&client, &stack).await?.is_none() {
        warn!(stack = stack.as_str(), "stack does not exist");
        deployments::mark_destroyed(&root, &stack)?;
        return Ok(());
    }

    client
        .delete_stack()
        .stack_name(&stack)
        .send()
        .await
        .map_err(|e| Error::AwsCloudFormation {
            operation: Operation::DeleteStack,
            source: Box::new(aws_sdk_cloudformation::Error::from(e.into_service_error())),
        })?;
    info!(stack = stack.as_str(), "deleting stack");

    match wait_for_stack(&client, &stack).await? {
        None => {}
        Some(state) if state.status == StackStatus::DeleteComplete => {}
        Some(state) => {
            return Err(Error::StackFailed {
                stack,
                status: state.status.as_str().to_string(),
                reason: state.reason.unwrap_or_default(),
            });
        }
    }
    deployments::mark_destroyed(&root, &stack)?;
    info!(stack = stack.as_str(), "stack destroyed");
    Ok(())
}
