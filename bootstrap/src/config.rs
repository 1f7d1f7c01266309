use crate::{Branch, Environment, Error};
use serde::{Deserialize, Serialize};
use std::{fs::File, path::Path, path::PathBuf};

/// Default location of the configuration file on an instance.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/webstack/bootstrap.yaml";

/// Default location of the transcript.
pub const DEFAULT_LOG_PATH: &str = "/var/log/webstack-bootstrap.log";

/// Unprivileged account that owns and runs the application.
const DEFAULT_ACCOUNT: &str = "ec2-user";

/// Build script (relative to the clone) that starts the application.
const DEFAULT_DEPLOY_SCRIPT: &str = "scripts/deploy.sh";

/// Configuration of the procedure for one instance.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Config {
    pub environment: Environment,
    /// Region used when `AWS_REGION` is not set.
    pub region: String,
    /// HTTPS clone URL without credentials.
    pub repository: String,
    /// Name or ARN of the secret holding the source-control token.
    pub secret: String,
    /// Pinned branch, used instead of the environment default when no override is given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<Branch>,
    #[serde(default = "default_account")]
    pub account: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_dir: Option<PathBuf>,
    #[serde(default = "default_deploy_script")]
    pub deploy_script: String,
    #[serde(default = "default_log")]
    pub log: PathBuf,
}

fn default_account() -> String {
    DEFAULT_ACCOUNT.to_string()
}

fn default_deploy_script() -> String {
    DEFAULT_DEPLOY_SCRIPT.to_string()
}

fn default_log() -> PathBuf {
    PathBuf::from(DEFAULT_LOG_PATH)
}

impl Config {
    /// Minimal configuration with every optional key at its default.
    pub fn new(environment: Environment, region: &str, repository: &str, secret: &str) -> Self {
        Self {
            environment,
            region: region.to_string(),
            repository: repository.to_string(),
            secret: secret.to_string(),
            branch: None,
            account: default_account(),
            home: None,
            app_dir: None,
            deploy_script: default_deploy_script(),
            log: default_log(),
        }
    }

    /// Loads a configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let file = File::open(path)?;
        let config: Config = serde_yaml::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that are interpolated into commands.
    pub fn validate(&self) -> Result<(), Error> {
        if self.account.is_empty()
            || !self
                .account
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::InvalidConfig(format!(
                "invalid account: {:?}",
                self.account
            )));
        }
        if self.secret.is_empty() {
            return Err(Error::InvalidConfig("secret must not be empty".into()));
        }
        if self.deploy_script.is_empty() || Path::new(&self.deploy_script).is_absolute() {
            return Err(Error::InvalidConfig(format!(
                "deploy script must be relative to the clone: {:?}",
                self.deploy_script
            )));
        }
        if !self.repository.starts_with("https://") {
            return Err(Error::UnsupportedRepository(self.repository.clone()));
        }
        Ok(())
    }

    /// Home directory of the application account.
    pub fn home(&self) -> PathBuf {
        self.home
            .clone()
            .unwrap_or_else(|| PathBuf::from("/home").join(&self.account))
    }

    /// Directory the repository is cloned into.
    pub fn app_dir(&self) -> PathBuf {
        self.app_dir.clone().unwrap_or_else(|| self.home().join("app"))
    }

    /// Branch deployed when no override is given.
    pub fn default_branch(&self) -> Branch {
        self.branch
            .clone()
            .unwrap_or_else(|| self.environment.default_branch())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: Config = serde_yaml::from_str(
            r#"
environment: prod
region: us-east-1
repository: https://github.com/acme/api.git
secret: acme/github-token
"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.account, "ec2-user");
        assert_eq!(config.home(), PathBuf::from("/home/ec2-user"));
        assert_eq!(config.app_dir(), PathBuf::from("/home/ec2-user/app"));
        assert_eq!(config.log, PathBuf::from(DEFAULT_LOG_PATH));
        assert_eq!(config.default_branch().as_str(), "main");
    }

    #[test]
    fn test_pinned_branch() {
        let mut config = Config::new(
            Environment::Dev,
            "us-east-1",
            "https://github.com/acme/api.git",
            "token",
        );
        assert_eq!(config.default_branch().as_str(), "develop");
        config.branch = Some(Branch::new("release").unwrap());
        assert_eq!(config.default_branch().as_str(), "release");
    }

    #[test]
    fn test_validate() {
        let base = Config::new(
            Environment::Dev,
            "us-east-1",
            "https://github.com/acme/api.git",
            "token",
        );
        base.validate().unwrap();

        let mut config = base.clone();
        config.account = "root; rm -rf /".into();
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = base.clone();
        config.repository = "git@github.com:acme/api.git".into();
        assert!(matches!(
            config.validate(),
            Err(Error::UnsupportedRepository(_))
        ));

        let mut config = base;
        config.deploy_script = "/tmp/deploy.sh".into();
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bootstrap.yaml");
        let config = Config::new(
            Environment::Staging,
            "eu-west-1",
            "https://github.com/acme/api.git",
            "token",
        );
        std::fs::write(&path, serde_yaml::to_string(&config).unwrap()).unwrap();
        assert_eq!(Config::load(&path).unwrap(), config);
    }
}
