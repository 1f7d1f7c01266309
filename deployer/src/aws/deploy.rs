//! `deploy` subcommand for `aws`

use crate::{
    aws::{
        create_client, describe_stack, ensure_success, is_settled, wait_for_stack, Operation,
        Region, CHANGE_SET_TIMEOUT, POLL_INTERVAL,
    },
    deployments::{self, deployer_directory, Metadata},
    stack::{stack_name, synthesize, Target},
    Config, Error,
};
use aws_sdk_cloudformation::{
    types::{Capability, Change, ChangeSetStatus, ChangeSetType, StackStatus},
    Client as CloudFormationClient,
};
use std::{
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{debug, info};

/// Reasons CloudFormation gives for a change set without changes.
const NO_CHANGES: [&str; 2] = ["didn't contain changes", "No updates are to be performed"];

/// One entry of a change set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedChange {
    pub action: String,
    pub logical_id: String,
    pub resource_type: String,
    pub replacement: Option<String>,
}

impl PlannedChange {
    fn from_change(change: &Change) -> Option<Self> {
        let resource = change.resource_change()?;
        Some(Self {
            action: resource
                .action()
                .map(|a| a.as_str().to_string())
                .unwrap_or_default(),
            logical_id: resource.logical_resource_id().unwrap_or_default().to_string(),
            resource_type: resource.resource_type().unwrap_or_default().to_string(),
            replacement: resource.replacement().map(|r| r.as_str().to_string()),
        })
    }
}

/// Whether a failed change set only failed because there was nothing to do.
fn is_empty_change_set(reason: &str) -> bool {
    NO_CHANGES.iter().any(|marker| reason.contains(marker))
}

/// Picks how the change set applies to the current stack.
fn change_set_type(stack: &str, status: Option<&StackStatus>) -> Result<ChangeSetType, Error> {
    match status {
        // A stack left in review by an earlier plan has never been created.
        None | Some(StackStatus::ReviewInProgress) => Ok(ChangeSetType::Create),
        Some(StackStatus::RollbackComplete) => Err(Error::StackFailed {
            stack: stack.to_string(),
            status: StackStatus::RollbackComplete.as_str().to_string(),
            reason: "creation failed; destroy the stack before deploying again".to_string(),
        }),
        Some(_) => Ok(ChangeSetType::Update),
    }
}

/// Polls a change set until it is computed. Returns `None` when it contains no changes.
async fn wait_for_change_set(
    client: &CloudFormationClient,
    stack: &str,
    change_set: &str,
) -> Result<Option<Vec<PlannedChange>>, Error> {
    let start = std::time::Instant::now();
    let mut interval = tokio::time::interval(POLL_INTERVAL);
    loop {
        interval.tick().await;
        if start.elapsed() > CHANGE_SET_TIMEOUT {
            return Err(Error::Timeout(format!("change set {change_set}")));
        }

        let resp = client
            .describe_change_set()
            .stack_name(stack)
            .change_set_name(change_set)
            .send()
            .await
            .map_err(|e| Error::AwsCloudFormation {
                operation: Operation::DescribeChangeSet,
                source: Box::new(aws_sdk_cloudformation::Error::from(e.into_service_error())),
            })?;
        let status = resp.status().cloned();
        debug!(
            stack,
            change_set,
            status = status.as_ref().map(|s| s.as_str()),
            "change set status"
        );
        match status {
            Some(ChangeSetStatus::CreateComplete) => {}
            Some(ChangeSetStatus::Failed) => {
                let reason = resp.status_reason().unwrap_or_default();
                if is_empty_change_set(reason) {
                    return Ok(None);
                }
                return Err(Error::ChangeSetFailed {
                    stack: stack.to_string(),
                    reason: reason.to_string(),
                });
            }
            _ => continue,
        }

        // Collect every page of changes
        let mut changes: Vec<PlannedChange> = resp
            .changes()
            .iter()
            .filter_map(PlannedChange::from_change)
            .collect();
        let mut next = resp.next_token().map(String::from);
        while let Some(token) = next {
            let page = client
                .describe_change_set()
                .stack_name(stack)
                .change_set_name(change_set)
                .next_token(token)
                .send()
                .await
                .map_err(|e| Error::AwsCloudFormation {
                    operation: Operation::DescribeChangeSet,
                    source: Box::new(aws_sdk_cloudformation::Error::from(e.into_service_error())),
                })?;
            changes.extend(page.changes().iter().filter_map(PlannedChange::from_change));
            next = page.next_token().map(String::from);
        }
        return Ok(Some(changes));
    }
}

/// Synthesizes the target's template, computes a change set against the deployed stack,
/// logs it, and executes it unless `plan` is set.
pub async fn deploy(config_path: &Path, target: Target, plan: bool) -> Result<(), Error> {
    // Build and validate the template before touching the provider
    let config = Config::load(config_path)?;
    let template = synthesize(&config, target)?;
    let body = template.render()?;
    let stack = stack_name(&config, target);
    info!(
        stack = stack.as_str(),
        resources = template.resources().len(),
        "synthesized template"
    );

    // Wait out any operation already in flight
    let client = create_client(Region::new(config.region.clone())).await;
    let existing = match describe_stack(&client, &stack).await? {
        Some(state) if !is_settled(&state.status) => {
            info!(
                stack = stack.as_str(),
                status = state.status.as_str(),
                "waiting for in-progress operation"
            );
            wait_for_stack(&client, &stack).await?
        }
        existing => existing,
    };
    let kind = change_set_type(&stack, existing.as_ref().map(|s| &s.status))?;

    // Create the change set
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let change_set = format!("{stack}-{timestamp}");
    client
        .create_change_set()
        .stack_name(&stack)
        .change_set_name(&change_set)
        .change_set_type(kind.clone())
        .template_body(&body)
        .capabilities(Capability::CapabilityNamedIam)
        .description(format!("webstack-deployer {target}"))
        .send()
        .await
        .map_err(|e| Error::AwsCloudFormation {
            operation: Operation::CreateChangeSet,
            source: Box::new(aws_sdk_cloudformation::Error::from(e.into_service_error())),
        })?;
    info!(
        stack = stack.as_str(),
        change_set = change_set.as_str(),
        kind = kind.as_str(),
        "created change set"
    );

    // Surface the plan
    let Some(changes) = wait_for_change_set(&client, &stack, &change_set).await? else {
        info!(stack = stack.as_str(), "stack is up to date");
        client
            .delete_change_set()
            .stack_name(&stack)
            .change_set_name(&change_set)
            .send()
            .await
            .map_err(|e| Error::AwsCloudFormation {
                operation: Operation::DeleteChangeSet,
                source: Box::new(aws_sdk_cloudformation::Error::from(e.into_service_error())),
            })?;
        return Ok(());
    };
    for change in &changes {
        info!(
            action = change.action.as_str(),
            logical_id = change.logical_id.as_str(),
            resource_type = change.resource_type.as_str(),
            replacement = change.replacement.as_deref(),
            "planned change"
        );
    }
    if plan {
        info!(
            stack = stack.as_str(),
            change_set = change_set.as_str(),
            changes = changes.len(),
            "plan only: change set left for review"
        );
        return Ok(());
    }

    // Record what is being deployed, then converge
    let root = deployer_directory(None)?;
    deployments::record(
        &root,
        &Metadata::new(&stack, &target.to_string(), &config.region),
        &body,
    )?;
    client
        .execute_change_set()
        .stack_name(&stack)
        .change_set_name(&change_set)
        .send()
        .await
        .map_err(|e| Error::AwsCloudFormation {
            operation: Operation::ExecuteChangeSet,
            source: Box::new(aws_sdk_cloudformation::Error::from(e.into_service_error())),
        })?;
    info!(stack = stack.as_str(), "executing change set");

    let state = wait_for_stack(&client, &stack)
        .await?
        .ok_or_else(|| Error::StackNotFound(stack.clone()))?;
    ensure_success(&stack, &state)?;
    deployments::mark_created(&root, &stack)?;
    for (key, value) in &state.outputs {
        info!(stack = stack.as_str(), key = key.as_str(), value = value.as_str(), "output");
    }
    info!(
        stack = stack.as_str(),
        status = state.status.as_str(),
        "deployment complete"
    );
    Ok(())
}
