//! Composition of complete stacks.

use crate::{
    compute, dns, hosting, identity, network, routing, security,
    template::{get_att, reference, Template},
    Config, Error,
};
use serde_json::json;
use std::{fmt, str::FromStr};
use webstack_bootstrap::Environment;

/// Suffix of the shared stack's name.
pub const SHARED: &str = "shared";

/// Stack a command operates on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    Shared,
    Environment(Environment),
}

impl FromStr for Target {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case(SHARED) {
            return Ok(Self::Shared);
        }
        s.parse::<Environment>()
            .map(Self::Environment)
            .map_err(|_| Error::InvalidTarget(s.to_string()))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shared => f.write_str(SHARED),
            Self::Environment(environment) => write!(f, "{environment}"),
        }
    }
}

/// `<name>-<env>` or `<name>-shared`.
pub fn stack_name(config: &Config, target: Target) -> String {
    format!("{}-{target}", config.name)
}

/// Builds the template of a target.
pub fn synthesize(config: &Config, target: Target) -> Result<Template, Error> {
    match target {
        Target::Shared => shared_stack(config),
        Target::Environment(environment) => environment_stack(config, environment),
    }
}

/// Everything one environment runs on, declared in dependency order.
pub fn environment_stack(config: &Config, environment: Environment) -> Result<Template, Error> {
    let settings = config.settings(environment)?;
    let prefix = stack_name(config, Target::Environment(environment));
    let mut template = Template::new(&format!("{} {} environment", config.name, environment));

    let network = network::declare(&mut template, &prefix, &settings);
    let security = security::declare(&mut template, &prefix, &settings, &network, config.api.port);
    let compute = compute::declare(&mut template, &prefix, config, &settings, &network, &security)?;
    let hosting = hosting::declare(&mut template, &prefix, config, &settings);
    let routing = routing::declare(
        &mut template,
        &prefix,
        config,
        &settings,
        &network,
        &security,
        &compute,
    )?;
    let records = dns::records(&settings, &compute, &routing);
    dns::declare(&mut template, config, &records);

    template.output("InstanceId", "API instance", reference(&compute.instance));
    template.output(
        "ApiUrl",
        "Public URL of the API",
        json!(format!("https://{}", settings.api_host)),
    );
    template.output(
        "SiteUrl",
        "Public URL of the site",
        json!(format!("https://{}", settings.site_host)),
    );
    template.output(
        "AmplifyAppId",
        "Managed application",
        get_att(&hosting.app, "AppId"),
    );
    template.output(
        "LoadBalancerDnsName",
        "Load balancer hostname",
        get_att(&routing.load_balancer, "DNSName"),
    );
    if let Some(eip) = &compute.elastic_ip {
        template.output("ElasticIp", "Fixed address of the API instance", reference(eip));
    }

    template.validate()?;
    Ok(template)
}

/// Resources shared by every environment.
pub fn shared_stack(config: &Config) -> Result<Template, Error> {
    let mut template = Template::new(&format!("{} shared resources", config.name));
    let identity = identity::declare(&mut template, config)?;
    template.export(
        "ClaimsFunctionArn",
        "Claim enrichment hook",
        get_att(&identity.function, "Arn"),
        &format!("{}-claims-function-arn", config.name),
    );
    template.validate()?;
    Ok(template)
}
