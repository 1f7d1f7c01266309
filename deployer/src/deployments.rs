//! Local record of deployed stacks.
//!
//! Each stack gets a directory under `~/.webstack/deployer/` holding its metadata, the last
//! template sent to the provider, and marker files for completed creation and destruction.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::info;

/// File name of the marker written once a stack has been deployed.
pub const CREATED_FILE_NAME: &str = "created";

/// File name of the marker written once a stack has been destroyed.
pub const DESTROYED_FILE_NAME: &str = "destroyed";

/// File name of the stack metadata.
pub const METADATA_FILE_NAME: &str = "metadata.yaml";

/// File name of the last deployed template.
pub const TEMPLATE_FILE_NAME: &str = "template.json";

/// Returns the deployer directory, or the directory of a stack when one is given.
pub fn deployer_directory(stack: Option<&str>) -> Result<PathBuf, Error> {
    let home = std::env::var_os("HOME").ok_or(Error::HomeNotSet)?;
    let base = PathBuf::from(home).join(".webstack").join("deployer");
    Ok(match stack {
        Some(stack) => base.join(stack),
        None => base,
    })
}

/// Metadata persisted for every deployed stack.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Metadata {
    pub stack: String,
    pub target: String,
    pub region: String,
    /// First deployment, in seconds since the unix epoch.
    pub created_at: u64,
    /// Latest deployment, in seconds since the unix epoch.
    #[serde(default)]
    pub updated_at: u64,
}

impl Metadata {
    pub fn new(stack: &str, target: &str, region: &str) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            stack: stack.to_string(),
            target: target.to_string(),
            region: region.to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Stores metadata and the template about to be deployed.
///
/// A stack that is still live keeps its original `created_at`. A previous destroyed marker is
/// removed since the stack is coming back.
pub fn record(root: &Path, metadata: &Metadata, template: &str) -> Result<PathBuf, Error> {
    let directory = root.join(&metadata.stack);
    fs::create_dir_all(&directory)?;
    let metadata_path = directory.join(METADATA_FILE_NAME);
    let destroyed = directory.join(DESTROYED_FILE_NAME);
    let mut metadata = metadata.clone();
    if metadata_path.exists() && !destroyed.exists() {
        let previous: Metadata = serde_yaml::from_reader(File::open(&metadata_path)?)?;
        metadata.created_at = previous.created_at;
    }
    serde_yaml::to_writer(File::create(&metadata_path)?, &metadata)?;
    fs::write(directory.join(TEMPLATE_FILE_NAME), template)?;
    if destroyed.exists() {
        fs::remove_file(destroyed)?;
    }
    Ok(directory)
}

/// Marks a stack as deployed.
pub fn mark_created(root: &Path, stack: &str) -> Result<(), Error> {
    let directory = root.join(stack);
    fs::create_dir_all(&directory)?;
    File::create(directory.join(CREATED_FILE_NAME))?;
    Ok(())
}

/// Marks a stack as destroyed.
pub fn mark_destroyed(root: &Path, stack: &str) -> Result<(), Error> {
    let directory = root.join(stack);
    fs::create_dir_all(&directory)?;
    File::create(directory.join(DESTROYED_FILE_NAME))?;
    Ok(())
}

/// Stacks that were created and not destroyed, newest first.
pub fn active(root: &Path) -> Result<Vec<Metadata>, Error> {
    let mut active = Vec::new();
    if !root.exists() {
        return Ok(active);
    }
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }

        // Skip incomplete or destroyed stacks
        if !path.join(CREATED_FILE_NAME).exists() || path.join(DESTROYED_FILE_NAME).exists() {
            continue;
        }

        // Fall back to the directory name when metadata is missing
        let metadata_path = path.join(METADATA_FILE_NAME);
        if metadata_path.exists() {
            let file = File::open(&metadata_path)?;
            active.push(serde_yaml::from_reader::<_, Metadata>(file)?);
        } else {
            let Some(stack) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            active.push(Metadata {
                stack: stack.to_string(),
                target: "unknown".to_string(),
                region: "unknown".to_string(),
                created_at: 0,
                updated_at: 0,
            });
        }
    }
    active.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.stack.cmp(&b.stack))
    });
    Ok(active)
}

/// Logs all active stacks.
pub fn list() -> Result<(), Error> {
    let active = active(&deployer_directory(None)?)?;
    if active.is_empty() {
        info!("no active deployments");
        return Ok(());
    }
    for d in &active {
        info!(
            stack = d.stack.as_str(),
            target = d.target.as_str(),
            region = d.region.as_str(),
            created_at = d.created_at,
            updated_at = d.updated_at,
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(stack: &str, created_at: u64) -> Metadata {
        Metadata {
            stack: stack.to_string(),
            target: "dev".to_string(),
            region: "us-east-1".to_string(),
            created_at,
            updated_at: created_at,
        }
    }

    #[test]
    fn test_active() {
        let root = tempfile::tempdir().unwrap();
        let root = root.path();

        // Recorded but never completed
        record(root, &metadata("storefront-staging", 5), "{}").unwrap();

        record(root, &metadata("storefront-dev", 10), "{}").unwrap();
        mark_created(root, "storefront-dev").unwrap();

        record(root, &metadata("storefront-prod", 20), "{}").unwrap();
        mark_created(root, "storefront-prod").unwrap();

        record(root, &metadata("storefront-shared", 30), "{}").unwrap();
        mark_created(root, "storefront-shared").unwrap();
        mark_destroyed(root, "storefront-shared").unwrap();

        let stacks: Vec<_> = active(root)
            .unwrap()
            .into_iter()
            .map(|m| m.stack)
            .collect();
        assert_eq!(stacks, vec!["storefront-prod", "storefront-dev"]);
    }

    #[test]
    fn test_redeploy_after_destroy() {
        let root = tempfile::tempdir().unwrap();
        let root = root.path();
        record(root, &metadata("storefront-dev", 10), "{}").unwrap();
        mark_created(root, "storefront-dev").unwrap();
        mark_destroyed(root, "storefront-dev").unwrap();
        assert!(active(root).unwrap().is_empty());

        let directory = record(root, &metadata("storefront-dev", 11), "{\"Resources\":{}}").unwrap();
        assert_eq!(
            fs::read_to_string(directory.join(TEMPLATE_FILE_NAME)).unwrap(),
            "{\"Resources\":{}}"
        );
        assert_eq!(active(root).unwrap(), vec![metadata("storefront-dev", 11)]);
    }

    #[test]
    fn test_update_keeps_created_at() {
        let root = tempfile::tempdir().unwrap();
        let root = root.path();
        record(root, &metadata("storefront-prod", 10), "{}").unwrap();
        mark_created(root, "storefront-prod").unwrap();
        record(root, &metadata("storefront-prod", 25), "{}").unwrap();

        let active = active(root).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].created_at, 10);
        assert_eq!(active[0].updated_at, 25);
    }

    #[test]
    fn test_missing_metadata() {
        let root = tempfile::tempdir().unwrap();
        mark_created(root.path(), "legacy").unwrap();
        let active = active(root.path()).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].stack, "legacy");
        assert_eq!(active[0].created_at, 0);
    }

    #[test]
    fn test_missing_root() {
        let root = tempfile::tempdir().unwrap();
        assert!(active(&root.path().join("absent")).unwrap().is_empty());
    }
}
