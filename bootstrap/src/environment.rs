//! Deployment environments and the values derived from them.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Branch tracked by the production environment.
pub const PRODUCTION_BRANCH: &str = "main";

/// Branch tracked by every other environment.
pub const DEVELOPMENT_BRANCH: &str = "develop";

/// A deployment environment.
///
/// Selected once per invocation and passed explicitly to everything derived from it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Environment {
    Prod,
    Staging,
    Dev,
}

impl Environment {
    /// Every supported environment.
    pub const ALL: [Environment; 3] = [Environment::Prod, Environment::Staging, Environment::Dev];

    /// Short name used in resource names, parameter paths, and subdomains.
    pub const fn name(&self) -> &'static str {
        match self {
            Environment::Prod => "prod",
            Environment::Staging => "staging",
            Environment::Dev => "dev",
        }
    }

    /// Whether this environment serves live traffic.
    pub const fn is_production(&self) -> bool {
        matches!(self, Environment::Prod)
    }

    /// Branch tracked when no override is supplied.
    pub fn default_branch(&self) -> Branch {
        resolve_default_branch(self.name())
    }

    /// Label handed to the application so it can select its runtime configuration.
    pub const fn label(&self) -> Label {
        match self {
            Environment::Prod => Label("production"),
            Environment::Staging => Label("staging"),
            Environment::Dev => Label("development"),
        }
    }

    /// Parameter-store prefix for a component, e.g. `/acme/prod/api/`.
    pub fn parameter_prefix(&self, org: &str, component: &str) -> String {
        format!("/{org}/{}/{component}/", self.name())
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Ok(Environment::Prod),
            "staging" | "stage" => Ok(Environment::Staging),
            "dev" | "development" => Ok(Environment::Dev),
            _ => Err(Error::UnknownEnvironment(s.to_string())),
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Environment> for String {
    fn from(value: Environment) -> Self {
        value.name().to_string()
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A source-control branch name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Branch(String);

impl Branch {
    /// Validates a branch name.
    ///
    /// Names are handed to `git` as arguments, so a leading `-` (which would be read as an
    /// option) and whitespace are rejected along with the empty string.
    pub fn new(name: &str) -> Result<Self, Error> {
        if name.is_empty()
            || name.starts_with('-')
            || name.chars().any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(Error::InvalidBranch(name.to_string()));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Branch {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Branch::new(&value)
    }
}

impl From<Branch> for String {
    fn from(value: Branch) -> Self {
        value.0
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Environment label passed to the application's build script.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Label(&'static str);

impl Label {
    pub const fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Resolves the branch an environment tracks by default.
///
/// Only the production environment tracks [PRODUCTION_BRANCH]; any other name (including one
/// that is not a known environment) tracks [DEVELOPMENT_BRANCH].
pub fn resolve_default_branch(name: &str) -> Branch {
    match name.parse::<Environment>() {
        Ok(env) if env.is_production() => Branch(PRODUCTION_BRANCH.to_string()),
        _ => Branch(DEVELOPMENT_BRANCH.to_string()),
    }
}

/// Resolves the label handed to the application for an environment name.
///
/// Unknown names resolve to the development label.
pub fn resolve_environment_label(name: &str) -> Label {
    name.parse::<Environment>()
        .map(|env| env.label())
        .unwrap_or(Environment::Dev.label())
}

/// Resolves the branch to deploy: a non-empty override wins over the default.
pub fn resolve_branch(override_branch: Option<&str>, default: &Branch) -> Result<Branch, Error> {
    match override_branch.map(str::trim) {
        Some(name) if !name.is_empty() => Branch::new(name),
        _ => Ok(default.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("prod", PRODUCTION_BRANCH; "prod")]
    #[test_case("production", PRODUCTION_BRANCH; "production alias")]
    #[test_case("PROD", PRODUCTION_BRANCH; "uppercase")]
    #[test_case("dev", DEVELOPMENT_BRANCH; "dev")]
    #[test_case("staging", DEVELOPMENT_BRANCH; "staging")]
    #[test_case("qa", DEVELOPMENT_BRANCH; "unknown")]
    #[test_case("", DEVELOPMENT_BRANCH; "empty")]
    fn test_resolve_default_branch(name: &str, expected: &str) {
        assert_eq!(resolve_default_branch(name).as_str(), expected);
    }

    #[test_case("prod", "production")]
    #[test_case("staging", "staging")]
    #[test_case("dev", "development")]
    #[test_case("sandbox", "development")]
    fn test_resolve_environment_label(name: &str, expected: &str) {
        assert_eq!(resolve_environment_label(name).as_str(), expected);
    }

    #[test]
    fn test_override_wins() {
        for env in Environment::ALL {
            let default = env.default_branch();
            let branch = resolve_branch(Some("feature/login"), &default).unwrap();
            assert_eq!(branch.as_str(), "feature/login");
            assert_eq!(resolve_branch(None, &default).unwrap(), default);
            assert_eq!(resolve_branch(Some("  "), &default).unwrap(), default);
        }
    }

    #[test_case("-x"; "option")]
    #[test_case("two words"; "whitespace")]
    #[test_case(""; "empty")]
    fn test_invalid_branch(name: &str) {
        assert!(matches!(Branch::new(name), Err(Error::InvalidBranch(_))));
    }

    #[test]
    fn test_parse_environment() {
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Dev);
        assert_eq!(" Staging ".parse::<Environment>().unwrap(), Environment::Staging);
        assert!(matches!(
            "qa".parse::<Environment>(),
            Err(Error::UnknownEnvironment(name)) if name == "qa"
        ));
    }

    #[test]
    fn test_serde_roundtrip() {
        let env: Environment = serde_yaml::from_str("production").unwrap();
        assert_eq!(env, Environment::Prod);
        assert_eq!(serde_yaml::to_string(&env).unwrap().trim(), "prod");
        assert!(serde_yaml::from_str::<Environment>("qa").is_err());
    }

    #[test]
    fn test_is_production() {
        let production: Vec<_> = Environment::ALL
            .into_iter()
            .filter(Environment::is_production)
            .collect();
        assert_eq!(production, vec![Environment::Prod]);
    }

    #[test]
    fn test_parameter_prefix() {
        assert_eq!(
            Environment::Dev.parameter_prefix("acme", "api"),
            "/acme/dev/api/"
        );
    }
}
