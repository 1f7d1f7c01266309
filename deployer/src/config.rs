//! Deployment configuration and per-environment settings.

use crate::{routing::MAX_ASSET_PATHS, Error};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs::File, net::Ipv4Addr, path::Path};
use webstack_bootstrap::{Branch, Environment};

/// Address space of every environment's network unless overridden.
pub const DEFAULT_VPC_CIDR: &str = "10.0.0.0/16";

/// Availability zones spanned by the network unless overridden.
pub const DEFAULT_AVAILABILITY_ZONES: u8 = 2;

/// Upper bound on availability zones (each gets a public and a private subnet).
pub const MAX_AVAILABILITY_ZONES: u8 = 4;

/// Instance generation used when none is configured.
pub const DEFAULT_GENERATION: &str = "1";

/// Path served by the site rather than the API.
pub const DEFAULT_ASSET_PATH: &str = "/assets/*";

const DEFAULT_API_PORT: u16 = 3000;
const DEFAULT_HEALTH_CHECK_PATH: &str = "/health";
const DEFAULT_VOLUME_SIZE: i32 = 20;

/// Prefix lengths accepted for a network (each subnet is a /24 carved out of it).
const VPC_PREFIX_RANGE: std::ops::RangeInclusive<u8> = 16..=20;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ApiConfig {
    /// HTTPS clone URL of the API repository.
    pub repository: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    #[serde(default = "default_health_check_path")]
    pub health_check_path: String,
    /// Root volume size in GiB.
    #[serde(default = "default_volume_size")]
    pub volume_size: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_script: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct WebappConfig {
    /// HTTPS clone URL of the site repository.
    pub repository: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_spec: Option<String>,
    /// Extra build variables, added after the generated ones.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

/// Location of the packaged claim hook and the user pool that invokes it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct IdentityConfig {
    pub user_pool_arn: String,
    pub code_bucket: String,
    pub code_key: String,
}

/// Per-environment overrides. Every key is optional.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct EnvironmentSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elastic_ip: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpc_cidr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_zones: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<Branch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_subdomain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_subdomain: Option<String>,
    /// Changing this replaces the API instance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_paths: Option<Vec<String>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Config {
    /// Organization prefix of parameter paths.
    pub org: String,
    /// Application name, used as the stack name prefix.
    pub name: String,
    pub region: String,
    pub domain: String,
    pub hosted_zone_id: String,
    /// Certificate used by environments that do not set their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_arn: Option<String>,
    /// Secret holding the source-control token.
    pub secret: String,
    pub api: ApiConfig,
    pub webapp: WebappConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityConfig>,
    #[serde(default)]
    pub environments: BTreeMap<Environment, EnvironmentSettings>,
}

fn default_api_port() -> u16 {
    DEFAULT_API_PORT
}

fn default_health_check_path() -> String {
    DEFAULT_HEALTH_CHECK_PATH.to_string()
}

fn default_volume_size() -> i32 {
    DEFAULT_VOLUME_SIZE
}

/// Values used for keys an environment does not override.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Defaults {
    pub instance_type: &'static str,
    pub elastic_ip: bool,
    pub site_subdomain: String,
    pub api_subdomain: String,
}

impl Defaults {
    pub fn for_environment(environment: Environment) -> Self {
        if environment.is_production() {
            return Self {
                instance_type: "t3.small",
                elastic_ip: true,
                site_subdomain: "www".to_string(),
                api_subdomain: "api".to_string(),
            };
        }
        Self {
            instance_type: "t3.micro",
            elastic_ip: false,
            site_subdomain: environment.name().to_string(),
            api_subdomain: format!("api-{}", environment.name()),
        }
    }
}

/// Fully resolved settings of one environment.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub environment: Environment,
    pub instance_type: String,
    pub certificate_arn: String,
    pub elastic_ip: bool,
    pub vpc_cidr: String,
    pub availability_zones: u8,
    pub branch: Branch,
    pub site_host: String,
    pub api_host: String,
    pub generation: String,
    pub asset_paths: Vec<String>,
}

impl Config {
    /// Loads a configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let file = File::open(path)?;
        let config: Config = serde_yaml::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks everything that can be checked without resolving an environment.
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
            || !self.name.starts_with(|c: char| c.is_ascii_alphabetic())
        {
            return Err(Error::InvalidConfig(format!(
                "name must start with a letter and contain only letters, digits and '-': {:?}",
                self.name
            )));
        }
        if self.org.is_empty() || self.org.contains('/') {
            return Err(Error::InvalidConfig(format!("invalid org: {:?}", self.org)));
        }
        if self.domain.is_empty() || self.domain.starts_with('.') || self.domain.ends_with('.') {
            return Err(Error::InvalidConfig(format!(
                "invalid domain: {:?}",
                self.domain
            )));
        }
        if self.secret.is_empty() {
            return Err(Error::InvalidConfig("secret must not be empty".into()));
        }
        if self.api.port == 0 {
            return Err(Error::InvalidConfig("api port must not be 0".into()));
        }
        if !self.api.health_check_path.starts_with('/') {
            return Err(Error::InvalidConfig(format!(
                "health check path must start with '/': {:?}",
                self.api.health_check_path
            )));
        }
        for repository in [&self.api.repository, &self.webapp.repository] {
            if !repository.starts_with("https://") {
                return Err(Error::InvalidConfig(format!(
                    "repository must be an https url: {repository}"
                )));
            }
        }
        Ok(())
    }

    /// Overrides configured for an environment (empty when absent).
    pub fn overrides(&self, environment: Environment) -> EnvironmentSettings {
        self.environments
            .get(&environment)
            .cloned()
            .unwrap_or_default()
    }

    /// Resolves the settings of an environment, falling back to [Defaults] per key.
    pub fn settings(&self, environment: Environment) -> Result<Settings, Error> {
        let overrides = self.overrides(environment);
        let defaults = Defaults::for_environment(environment);

        let certificate_arn = overrides
            .certificate_arn
            .or_else(|| self.certificate_arn.clone())
            .ok_or(Error::MissingCertificate(environment))?;

        let vpc_cidr = overrides
            .vpc_cidr
            .unwrap_or_else(|| DEFAULT_VPC_CIDR.to_string());
        validate_cidr(&vpc_cidr)?;

        let availability_zones = overrides
            .availability_zones
            .unwrap_or(DEFAULT_AVAILABILITY_ZONES);
        if !(1..=MAX_AVAILABILITY_ZONES).contains(&availability_zones) {
            return Err(Error::InvalidConfig(format!(
                "availability zones must be in 1..={MAX_AVAILABILITY_ZONES}: {availability_zones}"
            )));
        }

        let generation = overrides
            .generation
            .unwrap_or_else(|| DEFAULT_GENERATION.to_string());
        if generation.is_empty() || !generation.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::InvalidConfig(format!(
                "generation must be alphanumeric: {generation:?}"
            )));
        }

        let site_subdomain = overrides.site_subdomain.unwrap_or(defaults.site_subdomain);
        let api_subdomain = overrides.api_subdomain.unwrap_or(defaults.api_subdomain);
        for subdomain in [&site_subdomain, &api_subdomain] {
            validate_subdomain(subdomain)?;
        }
        if site_subdomain == api_subdomain {
            return Err(Error::InvalidConfig(format!(
                "site and api share the subdomain {site_subdomain:?}"
            )));
        }

        let asset_paths = overrides
            .asset_paths
            .unwrap_or_else(|| vec![DEFAULT_ASSET_PATH.to_string()]);
        if let Some(path) = asset_paths.iter().find(|p| !p.starts_with('/')) {
            return Err(Error::InvalidConfig(format!(
                "asset path must start with '/': {path:?}"
            )));
        }
        if asset_paths.len() > MAX_ASSET_PATHS {
            return Err(Error::InvalidConfig(format!(
                "at most {MAX_ASSET_PATHS} asset paths are supported, found {}",
                asset_paths.len()
            )));
        }

        Ok(Settings {
            environment,
            instance_type: overrides
                .instance_type
                .unwrap_or_else(|| defaults.instance_type.to_string()),
            certificate_arn,
            elastic_ip: overrides.elastic_ip.unwrap_or(defaults.elastic_ip),
            vpc_cidr,
            availability_zones,
            branch: overrides
                .branch
                .unwrap_or_else(|| environment.default_branch()),
            site_host: format!("{site_subdomain}.{}", self.domain),
            api_host: format!("{api_subdomain}.{}", self.domain),
            generation,
            asset_paths,
        })
    }

    /// Bootstrap configuration baked into the API instance.
    pub fn bootstrap(&self, settings: &Settings) -> Result<webstack_bootstrap::Config, Error> {
        let mut config = webstack_bootstrap::Config::new(
            settings.environment,
            &self.region,
            &self.api.repository,
            &self.secret,
        );
        config.branch = Some(settings.branch.clone());
        if let Some(account) = &self.api.account {
            config.account = account.clone();
        }
        if let Some(script) = &self.api.deploy_script {
            config.deploy_script = script.clone();
        }
        config.validate()?;
        Ok(config)
    }

    /// Identity section, required by the shared stack.
    pub fn identity(&self) -> Result<&IdentityConfig, Error> {
        self.identity.as_ref().ok_or(Error::MissingIdentity)
    }
}

fn validate_subdomain(subdomain: &str) -> Result<(), Error> {
    let valid = !subdomain.is_empty()
        && subdomain
            .split('.')
            .all(|label| !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
    if !valid {
        return Err(Error::InvalidConfig(format!(
            "invalid subdomain: {subdomain:?}"
        )));
    }
    Ok(())
}

/// Accepts `a.b.c.d/p` with `p` in 16..=20 and no host bits set.
fn validate_cidr(cidr: &str) -> Result<(), Error> {
    let invalid = || Error::InvalidCidr(cidr.to_string());
    let (address, prefix) = cidr.split_once('/').ok_or_else(invalid)?;
    let address: Ipv4Addr = address.parse().map_err(|_| invalid())?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    if !VPC_PREFIX_RANGE.contains(&prefix) {
        return Err(invalid());
    }
    let host_mask = u32::MAX >> prefix;
    if u32::from(address) & host_mask != 0 {
        return Err(invalid());
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use test_case::test_case;

    pub(crate) const CONFIG: &str = r#"
org: acme
name: storefront
region: us-east-1
domain: example.com
hosted_zone_id: Z0123456789ABCDEFGHIJ
certificate_arn: arn:aws:acm:us-east-1:111122223333:certificate/wildcard
secret: acme/github-token
api:
  repository: https://github.com/acme/storefront-api.git
webapp:
  repository: https://github.com/acme/storefront-web.git
identity:
  user_pool_arn: arn:aws:cognito-idp:us-east-1:111122223333:userpool/us-east-1_abc
  code_bucket: acme-artifacts
  code_key: claims/bootstrap.zip
environments:
  production:
    generation: "2"
  dev:
    instance_type: t3.medium
    elastic_ip: true
    certificate_arn: arn:aws:acm:us-east-1:111122223333:certificate/dev
"#;

    pub(crate) fn config() -> Config {
        let config: Config = serde_yaml::from_str(CONFIG).unwrap();
        config.validate().unwrap();
        config
    }

    #[test]
    fn test_parse() {
        let config = config();
        assert_eq!(config.api.port, 3000);
        assert_eq!(config.api.health_check_path, "/health");
        assert_eq!(config.api.volume_size, 20);
        assert!(config.environments.contains_key(&Environment::Prod));
        assert!(!config.environments.contains_key(&Environment::Staging));
    }

    #[test]
    fn test_unknown_environment_key() {
        let yaml = CONFIG.replace("  dev:\n", "  qa:\n");
        assert!(serde_yaml::from_str::<Config>(&yaml).is_err());
    }

    #[test_case(Environment::Prod, "t3.small", true, "www.example.com", "api.example.com", "main")]
    #[test_case(Environment::Staging, "t3.micro", false, "staging.example.com", "api-staging.example.com", "develop")]
    fn test_fallback(
        environment: Environment,
        instance_type: &str,
        elastic_ip: bool,
        site_host: &str,
        api_host: &str,
        branch: &str,
    ) {
        let settings = config().settings(environment).unwrap();
        assert_eq!(settings.instance_type, instance_type);
        assert_eq!(settings.elastic_ip, elastic_ip);
        assert_eq!(settings.site_host, site_host);
        assert_eq!(settings.api_host, api_host);
        assert_eq!(settings.branch.as_str(), branch);
        assert_eq!(settings.vpc_cidr, DEFAULT_VPC_CIDR);
        assert_eq!(settings.availability_zones, DEFAULT_AVAILABILITY_ZONES);
        assert_eq!(settings.asset_paths, vec![DEFAULT_ASSET_PATH.to_string()]);
        assert_eq!(
            settings.certificate_arn,
            "arn:aws:acm:us-east-1:111122223333:certificate/wildcard"
        );
    }

    #[test]
    fn test_overrides() {
        let config = config();
        let dev = config.settings(Environment::Dev).unwrap();
        assert_eq!(dev.instance_type, "t3.medium");
        assert!(dev.elastic_ip);
        assert_eq!(dev.certificate_arn, "arn:aws:acm:us-east-1:111122223333:certificate/dev");
        assert_eq!(dev.generation, DEFAULT_GENERATION);

        let prod = config.settings(Environment::Prod).unwrap();
        assert_eq!(prod.generation, "2");
    }

    #[test]
    fn test_missing_certificate() {
        let mut config = config();
        config.certificate_arn = None;
        assert!(matches!(
            config.settings(Environment::Staging),
            Err(Error::MissingCertificate(Environment::Staging))
        ));
        config.settings(Environment::Dev).unwrap();
    }

    #[test_case("10.0.0.0/16", true)]
    #[test_case("172.16.0.0/20", true)]
    #[test_case("10.0.0.0/24", false)]
    #[test_case("10.0.0.0/8", false)]
    #[test_case("10.0.1.0/16", false)]
    #[test_case("10.0.0/16", false)]
    #[test_case("10.0.0.0", false)]
    fn test_cidr(cidr: &str, valid: bool) {
        assert_eq!(validate_cidr(cidr).is_ok(), valid);
    }

    #[test]
    fn test_invalid_settings() {
        let base = config();

        let mut config = base.clone();
        config.environments.entry(Environment::Staging).or_default().availability_zones = Some(5);
        assert!(matches!(
            config.settings(Environment::Staging),
            Err(Error::InvalidConfig(_))
        ));

        let mut config = base.clone();
        config.environments.entry(Environment::Staging).or_default().generation =
            Some("v-2".into());
        assert!(matches!(
            config.settings(Environment::Staging),
            Err(Error::InvalidConfig(_))
        ));

        let mut config = base.clone();
        config.environments.entry(Environment::Staging).or_default().api_subdomain =
            Some("staging".into());
        assert!(matches!(
            config.settings(Environment::Staging),
            Err(Error::InvalidConfig(_))
        ));

        let mut config = base;
        config.environments.entry(Environment::Staging).or_default().asset_paths =
            Some(vec!["assets/*".into()]);
        assert!(matches!(
            config.settings(Environment::Staging),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_asset_path_limit() {
        let paths =
            |count: usize| -> Vec<String> { (0..count).map(|i| format!("/static{i}/*")).collect() };

        let mut config = config();
        config.environments.entry(Environment::Dev).or_default().asset_paths =
            Some(paths(MAX_ASSET_PATHS));
        let settings = config.settings(Environment::Dev).unwrap();
        let rules = crate::routing::default_rules(&settings, "ApiTargetGroup").unwrap();
        assert_eq!(rules.rules().len(), MAX_ASSET_PATHS + 1);

        config.environments.entry(Environment::Dev).or_default().asset_paths =
            Some(paths(MAX_ASSET_PATHS + 1));
        let Err(Error::InvalidConfig(message)) = config.settings(Environment::Dev) else {
            panic!("expected asset path limit");
        };
        assert!(message.contains("asset paths"));
    }

    #[test]
    fn test_validate() {
        let base = config();

        let mut config = base.clone();
        config.name = "store front".into();
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = base.clone();
        config.webapp.repository = "git@github.com:acme/web.git".into();
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = base;
        config.api.health_check_path = "health".into();
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_bootstrap() {
        let mut config = config();
        config.api.account = Some("node".into());
        let settings = config.settings(Environment::Staging).unwrap();
        let bootstrap = config.bootstrap(&settings).unwrap();
        assert_eq!(bootstrap.environment, Environment::Staging);
        assert_eq!(bootstrap.account, "node");
        assert_eq!(bootstrap.secret, "acme/github-token");
        assert_eq!(bootstrap.default_branch().as_str(), "develop");
    }

    #[test]
    fn test_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("webstack.yaml");
        std::fs::write(&path, CONFIG).unwrap();
        assert_eq!(Config::load(&path).unwrap(), config());
    }
}
