//! Load balancer, listeners, target group, and ordered routing rules.
//!
//! Rules are evaluated by ascending priority and the first match wins. A [RuleSet] rejects
//! rule lists that could not behave as written: duplicate or out-of-range priorities, and
//! rules that can never match because a lower-numbered rule already covers every request
//! they would see (an `/assets/*` rule placed after a `/*` catch-all, for example).

use crate::{
    compute::Compute,
    network::Network,
    security::Security,
    template::{reference, tags, Resource, Template},
    Config, Error, Settings,
};
use serde_json::{json, Value};

pub const LOAD_BALANCER: &str = "LoadBalancer";
pub const TARGET_GROUP: &str = "ApiTargetGroup";
pub const HTTPS_LISTENER: &str = "HttpsListener";
pub const HTTP_LISTENER: &str = "HttpListener";

/// Highest priority a listener rule may have.
pub const MAX_PRIORITY: u16 = 50_000;

/// Priority of the asset redirect rules (one per path, counting up).
pub const ASSET_PRIORITY: u16 = 10;

/// Priority of the rule forwarding everything else to the API.
pub const API_PRIORITY: u16 = 100;

/// Most asset paths that fit below [API_PRIORITY].
pub const MAX_ASSET_PATHS: usize = (API_PRIORITY - ASSET_PRIORITY) as usize;

const SSL_POLICY: &str = "ELBSecurityPolicy-TLS13-1-2-2021-06";

/// What a matching rule does.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuleAction {
    /// Forward to a target group (logical ID).
    Forward { target_group: String },
    /// Permanent redirect to another host, keeping the path and query.
    Redirect { host: String },
}

/// A listener rule. Empty `hosts` or `paths` match anything.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rule {
    pub name: String,
    pub priority: u16,
    pub hosts: Vec<String>,
    pub paths: Vec<String>,
    pub action: RuleAction,
}

impl Rule {
    /// Whether a request for `host` and `path` satisfies every condition.
    pub fn matches(&self, host: &str, path: &str) -> bool {
        let host = host.to_ascii_lowercase();
        (self.hosts.is_empty()
            || self
                .hosts
                .iter()
                .any(|p| wildcard_match(&p.to_ascii_lowercase(), &host)))
            && (self.paths.is_empty() || self.paths.iter().any(|p| wildcard_match(p, path)))
    }

    /// Logical ID of the listener rule resource.
    fn logical_id(&self) -> String {
        let mut id = String::from("Rule");
        let mut upper = true;
        for c in self.name.chars() {
            if c.is_ascii_alphanumeric() {
                id.push(if upper { c.to_ascii_uppercase() } else { c });
                upper = false;
            } else {
                upper = true;
            }
        }
        id
    }

    fn to_json(&self, listener: &str) -> Value {
        let mut conditions = Vec::new();
        if !self.hosts.is_empty() {
            conditions.push(json!({
                "Field": "host-header",
                "HostHeaderConfig": { "Values": self.hosts },
            }));
        }
        if !self.paths.is_empty() {
            conditions.push(json!({
                "Field": "path-pattern",
                "PathPatternConfig": { "Values": self.paths },
            }));
        }
        let action = match &self.action {
            RuleAction::Forward { target_group } => json!({
                "Type": "forward",
                "TargetGroupArn": reference(target_group),
            }),
            RuleAction::Redirect { host } => json!({
                "Type": "redirect",
                "RedirectConfig": {
                    "Protocol": "HTTPS",
                    "Port": "443",
                    "Host": host,
                    "Path": "/#{path}",
                    "Query": "#{query}",
                    "StatusCode": "HTTP_301",
                },
            }),
        };
        json!({
            "ListenerArn": reference(listener),
            "Priority": self.priority,
            "Conditions": conditions,
            "Actions": [action],
        })
    }
}

/// Matches `value` against a pattern where `*` is any run of characters and `?` is exactly
/// one character.
pub fn wildcard_match(pattern: &str, value: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let value: Vec<char> = value.chars().collect();
    let (mut p, mut v) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while v < value.len() {
        match pattern.get(p) {
            Some(&'*') => {
                backtrack = Some((p, v));
                p += 1;
            }
            Some(&c) if c == '?' || c == value[v] => {
                p += 1;
                v += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    v = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

/// Whether every value matched by `specific` is also matched by `general`.
///
/// Conservative: only recognizes equal patterns and trailing-`*` prefixes.
fn covers(general: &str, specific: &str) -> bool {
    if general == specific {
        return true;
    }
    match general.strip_suffix('*') {
        Some(prefix) if !prefix.contains(['*', '?']) => specific.starts_with(prefix),
        _ => false,
    }
}

/// Whether a condition list (empty = anything) covers another.
fn covers_all(general: &[String], specific: &[String], fold: bool) -> bool {
    if general.is_empty() {
        return true;
    }
    if specific.is_empty() {
        return general.iter().any(|g| g == "*");
    }
    specific.iter().all(|s| {
        general.iter().any(|g| {
            if fold {
                covers(&g.to_ascii_lowercase(), &s.to_ascii_lowercase())
            } else {
                covers(g, s)
            }
        })
    })
}

/// Listener rules, sorted by priority.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(mut rules: Vec<Rule>) -> Result<Self, Error> {
        for rule in &rules {
            if rule.priority == 0 || rule.priority > MAX_PRIORITY {
                return Err(Error::InvalidPriority {
                    rule: rule.name.clone(),
                    priority: rule.priority,
                });
            }
            if rule.hosts.is_empty() && rule.paths.is_empty() {
                return Err(Error::UnconditionalRule {
                    rule: rule.name.clone(),
                });
            }
        }
        rules.sort_by_key(|r| r.priority);
        for pair in rules.windows(2) {
            if pair[0].priority == pair[1].priority {
                return Err(Error::DuplicatePriority {
                    priority: pair[0].priority,
                    first: pair[0].name.clone(),
                    second: pair[1].name.clone(),
                });
            }
        }
        for (i, rule) in rules.iter().enumerate() {
            let earlier = rules[..i].iter().find(|earlier| {
                covers_all(&earlier.hosts, &rule.hosts, true)
                    && covers_all(&earlier.paths, &rule.paths, false)
            });
            if let Some(earlier) = earlier {
                return Err(Error::ShadowedRule {
                    rule: rule.name.clone(),
                    by: earlier.name.clone(),
                });
            }
        }
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// First rule matching the request, if any (otherwise the listener default applies).
    pub fn evaluate(&self, host: &str, path: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.matches(host, path))
    }
}

/// Rules of an environment: asset paths redirect to the site, everything else on the API
/// host goes to the API.
pub fn default_rules(settings: &Settings, target_group: &str) -> Result<RuleSet, Error> {
    let mut rules = Vec::with_capacity(settings.asset_paths.len() + 1);
    for (i, path) in settings.asset_paths.iter().enumerate() {
        let name = if i == 0 {
            "assets".to_string()
        } else {
            format!("assets-{}", i + 1)
        };
        rules.push(Rule {
            name,
            priority: ASSET_PRIORITY + i as u16,
            hosts: vec![settings.api_host.clone()],
            paths: vec![path.clone()],
            action: RuleAction::Redirect {
                host: settings.site_host.clone(),
            },
        });
    }
    rules.push(Rule {
        name: "api".to_string(),
        priority: API_PRIORITY,
        hosts: vec![settings.api_host.clone()],
        paths: vec!["/*".to_string()],
        action: RuleAction::Forward {
            target_group: target_group.to_string(),
        },
    });
    RuleSet::new(rules)
}

/// Logical IDs of the declared routing resources.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Routing {
    pub load_balancer: String,
    pub target_group: String,
    pub https_listener: String,
    pub http_listener: String,
    pub rules: Vec<String>,
}

/// Declares the load balancer in the public subnets, the target group holding the instance,
/// the listeners, and the environment's listener rules.
pub fn declare(
    template: &mut Template,
    prefix: &str,
    config: &Config,
    settings: &Settings,
    network: &Network,
    security: &Security,
    compute: &Compute,
) -> Result<Routing, Error> {
    let environment = settings.environment.name();
    let load_balancer = template.add(Resource::new(
        LOAD_BALANCER,
        "AWS::ElasticLoadBalancingV2::LoadBalancer",
        json!({
            "Type": "application",
            "Scheme": "internet-facing",
            "Subnets": network.public_subnets.iter().map(|s| reference(s)).collect::<Vec<_>>(),
            "SecurityGroups": [reference(&security.load_balancer)],
            "Tags": tags(&format!("{prefix}-alb"), environment),
        }),
    ));
    let target_group = template.add(Resource::new(
        TARGET_GROUP,
        "AWS::ElasticLoadBalancingV2::TargetGroup",
        json!({
            "VpcId": reference(&network.vpc),
            "Protocol": "HTTP",
            "Port": config.api.port,
            "TargetType": "instance",
            "HealthCheckProtocol": "HTTP",
            "HealthCheckPath": config.api.health_check_path,
            "HealthCheckIntervalSeconds": 30,
            "HealthyThresholdCount": 2,
            "UnhealthyThresholdCount": 5,
            "Matcher": { "HttpCode": "200" },
            "Targets": [{ "Id": reference(&compute.instance), "Port": config.api.port }],
            "Tags": tags(&format!("{prefix}-api"), environment),
        }),
    ));
    let https_listener = template.add(Resource::new(
        HTTPS_LISTENER,
        "AWS::ElasticLoadBalancingV2::Listener",
        json!({
            "LoadBalancerArn": reference(&load_balancer),
            "Port": 443,
            "Protocol": "HTTPS",
            "SslPolicy": SSL_POLICY,
            "Certificates": [{ "CertificateArn": settings.certificate_arn }],
            "DefaultActions": [{
                "Type": "fixed-response",
                "FixedResponseConfig": {
                    "StatusCode": "404",
                    "ContentType": "text/plain",
                    "MessageBody": "not found",
                },
            }],
        }),
    ));
    let http_listener = template.add(Resource::new(
        HTTP_LISTENER,
        "AWS::ElasticLoadBalancingV2::Listener",
        json!({
            "LoadBalancerArn": reference(&load_balancer),
            "Port": 80,
            "Protocol": "HTTP",
            "DefaultActions": [{
                "Type": "redirect",
                "RedirectConfig": {
                    "Protocol": "HTTPS",
                    "Port": "443",
                    "StatusCode": "HTTP_301",
                },
            }],
        }),
    ));

    let rule_set = default_rules(settings, &target_group)?;
    let rules = rule_set
        .rules()
        .iter()
        .map(|rule| {
            template.add(Resource::new(
                &rule.logical_id(),
                "AWS::ElasticLoadBalancingV2::ListenerRule",
                rule.to_json(&https_listener),
            ))
        })
        .collect();

    Ok(Routing {
        load_balancer,
        target_group,
        https_listener,
        http_listener,
        rules,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{compute, config::tests::config, network, security};
    use test_case::test_case;
    use webstack_bootstrap::Environment;

    fn forward(name: &str, priority: u16, hosts: &[&str], paths: &[&str]) -> Rule {
        Rule {
            name: name.to_string(),
            priority,
            hosts: hosts.iter().map(|s| s.to_string()).collect(),
            paths: paths.iter().map(|s| s.to_string()).collect(),
            action: RuleAction::Forward {
                target_group: TARGET_GROUP.to_string(),
            },
        }
    }

    #[test_case("/*", "/users", true)]
    #[test_case("/*", "/", true)]
    #[test_case("/assets/*", "/assets/logo.png", true)]
    #[test_case("/assets/*", "/assets", false)]
    #[test_case("/assets/*.css", "/assets/app.min.css", true)]
    #[test_case("/assets/*.css", "/assets/app.js", false)]
    #[test_case("/v?/users", "/v1/users", true)]
    #[test_case("/v?/users", "/v10/users", false)]
    #[test_case("*.example.com", "api.example.com", true)]
    #[test_case("", "", true)]
    fn test_wildcard(pattern: &str, value: &str, expected: bool) {
        assert_eq!(wildcard_match(pattern, value), expected);
    }

    #[test]
    fn test_asset_rule_evaluated_first() {
        let settings = config().settings(Environment::Dev).unwrap();
        let rules = default_rules(&settings, TARGET_GROUP).unwrap();

        let rule = rules.evaluate("api-dev.example.com", "/assets/logo.png").unwrap();
        assert_eq!(rule.name, "assets");
        assert_eq!(
            rule.action,
            RuleAction::Redirect {
                host: "dev.example.com".into()
            }
        );

        let rule = rules.evaluate("API-DEV.example.com", "/users/1").unwrap();
        assert_eq!(rule.name, "api");

        assert!(rules.evaluate("api.example.com", "/users/1").is_none());
    }

    #[test]
    fn test_shadowed_asset_rule() {
        let result = RuleSet::new(vec![
            forward("api", 10, &["api.example.com"], &["/*"]),
            forward("assets", 20, &["api.example.com"], &["/assets/*"]),
        ]);
        let Err(Error::ShadowedRule { rule, by }) = result else {
            panic!("expected shadowed rule");
        };
        assert_eq!(rule, "assets");
        assert_eq!(by, "api");
    }

    #[test]
    fn test_hostless_catch_all_shadows() {
        let result = RuleSet::new(vec![
            forward("catch-all", 5, &[], &["/*"]),
            forward("assets", 20, &["api.example.com"], &["/assets/*"]),
        ]);
        assert!(matches!(result, Err(Error::ShadowedRule { .. })));
    }

    #[test]
    fn test_different_hosts_do_not_shadow() {
        let rules = RuleSet::new(vec![
            forward("api", 10, &["api.example.com"], &["/*"]),
            forward("assets", 20, &["cdn.example.com"], &["/assets/*"]),
        ])
        .unwrap();
        assert_eq!(
            rules.evaluate("cdn.example.com", "/assets/a.js").unwrap().name,
            "assets"
        );
    }

    #[test]
    fn test_sorted_by_priority() {
        let rules = RuleSet::new(vec![
            forward("api", 100, &["api.example.com"], &["/*"]),
            forward("assets", 10, &["api.example.com"], &["/assets/*"]),
        ])
        .unwrap();
        let names: Vec<_> = rules.rules().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["assets", "api"]);
    }

    #[test]
    fn test_duplicate_priority() {
        let result = RuleSet::new(vec![
            forward("a", 10, &["a.example.com"], &[]),
            forward("b", 10, &["b.example.com"], &[]),
        ]);
        assert!(matches!(
            result,
            Err(Error::DuplicatePriority { priority: 10, .. })
        ));
    }

    #[test_case(0)]
    #[test_case(50_001)]
    fn test_invalid_priority(priority: u16) {
        let result = RuleSet::new(vec![forward("a", priority, &["a.example.com"], &[])]);
        assert!(matches!(result, Err(Error::InvalidPriority { .. })));
    }

    #[test]
    fn test_unconditional() {
        let result = RuleSet::new(vec![forward("a", 1, &[], &[])]);
        assert!(matches!(result, Err(Error::UnconditionalRule { .. })));
    }

    #[test]
    fn test_logical_id() {
        assert_eq!(forward("assets-2", 1, &[], &[]).logical_id(), "RuleAssets2");
        assert_eq!(forward("api", 1, &[], &[]).logical_id(), "RuleApi");
    }

    #[test]
    fn test_declare() {
        let config = config();
        let settings = config.settings(Environment::Prod).unwrap();
        let prefix = "storefront-prod";
        let mut template = Template::new("routing");
        let network = network::declare(&mut template, prefix, &settings);
        let security = security::declare(&mut template, prefix, &settings, &network, 3000);
        let compute =
            compute::declare(&mut template, prefix, &config, &settings, &network, &security)
                .unwrap();
        let routing = declare(
            &mut template,
            prefix,
            &config,
            &settings,
            &network,
            &security,
            &compute,
        )
        .unwrap();
        template.validate().unwrap();

        assert_eq!(routing.rules, vec!["RuleAssets", "RuleApi"]);
        let assets = template.resource("RuleAssets").unwrap();
        assert_eq!(assets.properties["Priority"], 10);
        assert_eq!(assets.properties["Actions"][0]["Type"], "redirect");
        assert_eq!(
            assets.properties["Actions"][0]["RedirectConfig"]["Host"],
            "www.example.com"
        );
        let api = template.resource("RuleApi").unwrap();
        assert_eq!(api.properties["Actions"][0]["TargetGroupArn"]["Ref"], TARGET_GROUP);

        let listener = template.resource(HTTPS_LISTENER).unwrap();
        assert_eq!(
            listener.properties["Certificates"][0]["CertificateArn"],
            settings.certificate_arn
        );
        assert_eq!(
            listener.properties["DefaultActions"][0]["FixedResponseConfig"]["StatusCode"],
            "404"
        );
        let group = template.resource(TARGET_GROUP).unwrap();
        assert_eq!(group.properties["Targets"][0]["Id"]["Ref"], "ApiInstance2");
    }
}
