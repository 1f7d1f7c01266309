//! Managed static-site application, its tracked branch, and its domain binding.

use crate::{
    template::{get_att, tags, Resource, Template},
    Config, Settings,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use webstack_bootstrap::Environment;

pub const APP: &str = "WebApp";
pub const BRANCH: &str = "WebAppBranch";
pub const DOMAIN: &str = "WebAppDomain";

/// Rewrites every route without a file extension to the single-page entry point.
const SPA_SOURCE: &str = "</^[^.]+$|\\.(?!(css|gif|ico|jpg|jpeg|js|json|map|png|svg|txt|ttf|webp|woff|woff2)$)([^.]+$)/>";

/// Logical IDs of the declared hosting resources.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hosting {
    pub app: String,
    pub branch: String,
    pub domain: String,
}

/// Release stage reported for a branch.
pub fn stage(environment: Environment) -> &'static str {
    match environment {
        Environment::Prod => "PRODUCTION",
        Environment::Staging => "BETA",
        Environment::Dev => "DEVELOPMENT",
    }
}

/// Build variables the site reads at build time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildVariables {
    pub api_url: String,
    pub environment: &'static str,
    pub parameter_prefix: String,
    pub region: String,
}

impl BuildVariables {
    pub fn new(config: &Config, settings: &Settings) -> Self {
        Self {
            api_url: format!("https://{}", settings.api_host),
            environment: settings.environment.label().as_str(),
            parameter_prefix: settings.environment.parameter_prefix(&config.org, "webapp"),
            region: config.region.clone(),
        }
    }

    /// Generated variables first, then extras that do not collide with them.
    fn to_json(&self, extra: &BTreeMap<String, String>) -> Value {
        let generated = [
            ("API_URL", self.api_url.as_str()),
            ("APP_ENV", self.environment),
            ("PARAMETER_PREFIX", self.parameter_prefix.as_str()),
            ("AWS_REGION_NAME", self.region.as_str()),
        ];
        let mut variables: Vec<Value> = generated
            .iter()
            .map(|(name, value)| json!({ "Name": name, "Value": value }))
            .collect();
        for (name, value) in extra {
            if generated.iter().any(|(generated, _)| generated == name) {
                continue;
            }
            variables.push(json!({ "Name": name, "Value": value }));
        }
        Value::Array(variables)
    }
}

/// Declares the application, the branch it builds, and the binding of the site subdomain to
/// that branch.
pub fn declare(
    template: &mut Template,
    prefix: &str,
    config: &Config,
    settings: &Settings,
) -> Hosting {
    let environment = settings.environment;
    let variables = BuildVariables::new(config, settings).to_json(&config.webapp.variables);

    let mut properties = json!({
        "Name": format!("{prefix}-webapp"),
        "Repository": config.webapp.repository,
        "AccessToken": format!("{{{{resolve:secretsmanager:{}}}}}", config.secret),
        "Platform": "WEB",
        "EnvironmentVariables": variables,
        "CustomRules": [{ "Source": SPA_SOURCE, "Target": "/index.html", "Status": "200" }],
        "Tags": tags(&format!("{prefix}-webapp"), environment.name()),
    });
    if let Some(build_spec) = &config.webapp.build_spec {
        properties["BuildSpec"] = json!(build_spec);
    }
    let app = template.add(Resource::new(APP, "AWS::Amplify::App", properties));

    let branch = template.add(Resource::new(
        BRANCH,
        "AWS::Amplify::Branch",
        json!({
            "AppId": get_att(&app, "AppId"),
            "BranchName": settings.branch.as_str(),
            "Stage": stage(environment),
            "EnableAutoBuild": true,
            "Tags": tags(&format!("{prefix}-webapp-{}", settings.branch), environment.name()),
        }),
    ));

    let subdomain = settings
        .site_host
        .strip_suffix(&format!(".{}", config.domain))
        .unwrap_or(&settings.site_host);
    let domain = template.add(Resource::new(
        DOMAIN,
        "AWS::Amplify::Domain",
        json!({
            "AppId": get_att(&app, "AppId"),
            "DomainName": config.domain,
            "EnableAutoSubDomain": false,
            "SubDomainSettings": [{
                "Prefix": subdomain,
                "BranchName": get_att(&branch, "BranchName"),
            }],
        }),
    ));

    Hosting {
        app,
        branch,
        domain,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::config;
    use test_case::test_case;

    #[test_case(Environment::Prod, "PRODUCTION", "main", "www")]
    #[test_case(Environment::Staging, "BETA", "develop", "staging")]
    #[test_case(Environment::Dev, "DEVELOPMENT", "develop", "dev")]
    fn test_declare(environment: Environment, expected_stage: &str, branch: &str, prefix: &str) {
        let config = config();
        let settings = config.settings(environment).unwrap();
        let mut template = Template::new("hosting");
        let hosting = declare(&mut template, "storefront", &config, &settings);
        template.validate().unwrap();

        let branch_resource = template.resource(&hosting.branch).unwrap();
        assert_eq!(branch_resource.properties["Stage"], expected_stage);
        assert_eq!(branch_resource.properties["BranchName"], branch);

        let domain = template.resource(&hosting.domain).unwrap();
        assert_eq!(domain.properties["DomainName"], "example.com");
        assert_eq!(domain.properties["SubDomainSettings"][0]["Prefix"], prefix);

        // The binding waits for the branch, which waits for the app.
        let order: Vec<_> = template
            .order()
            .unwrap()
            .into_iter()
            .map(|r| r.logical_id.as_str())
            .collect();
        assert_eq!(order, vec![APP, BRANCH, DOMAIN]);
    }

    #[test]
    fn test_variables() {
        let mut config = config();
        config.webapp.variables.insert("API_URL".into(), "http://override".into());
        config.webapp.variables.insert("SENTRY_DSN".into(), "https://sentry".into());
        let settings = config.settings(Environment::Staging).unwrap();
        let mut template = Template::new("hosting");
        let hosting = declare(&mut template, "storefront", &config, &settings);

        let app = template.resource(&hosting.app).unwrap();
        let variables = app.properties["EnvironmentVariables"].as_array().unwrap();
        let lookup = |name: &str| {
            variables
                .iter()
                .filter(|v| v["Name"] == name)
                .map(|v| v["Value"].as_str().unwrap().to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(lookup("API_URL"), vec!["https://api-staging.example.com"]);
        assert_eq!(lookup("APP_ENV"), vec!["staging"]);
        assert_eq!(lookup("PARAMETER_PREFIX"), vec!["/acme/staging/webapp/"]);
        assert_eq!(lookup("SENTRY_DSN"), vec!["https://sentry"]);
        assert_eq!(
            app.properties["AccessToken"],
            "{{resolve:secretsmanager:acme/github-token}}"
        );
        assert!(app.properties.get("BuildSpec").is_none());
    }
}
