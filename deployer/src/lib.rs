//! Declare and deploy the infrastructure of a web application.
//!
//! Every environment gets its own stack: a virtual network, an API instance that bootstraps
//! itself from source control, a managed static-site application, a load balancer with
//! ordered routing rules, and DNS records. One shared stack holds the identity hook that
//! enriches issued tokens.
//!
//! Stacks are assembled as typed [template::Resource]s. References between resources
//! (`Ref`, `Fn::GetAtt`, `DependsOn`) form a dependency graph that is validated (no
//! duplicates, no dangling references, no cycles) before anything is sent to the provider.
//! The resulting template is deployed through CloudFormation change sets, which surface a
//! plan before any resource is touched.
//!
//! # Example
//!
//! ```yaml
//! org: acme
//! name: storefront
//! region: us-east-1
//! domain: example.com
//! hosted_zone_id: Z0123456789ABCDEFGHIJ
//! certificate_arn: arn:aws:acm:us-east-1:111122223333:certificate/wildcard
//! secret: acme/github-token
//! api:
//!   repository: https://github.com/acme/storefront-api.git
//!   port: 3000
//! webapp:
//!   repository: https://github.com/acme/storefront-web.git
//! identity:
//!   user_pool_arn: arn:aws:cognito-idp:us-east-1:111122223333:userpool/us-east-1_abc
//!   code_bucket: acme-artifacts
//!   code_key: claims/bootstrap.zip
//! environments:
//!   prod:
//!     generation: "2"
//!   dev:
//!     instance_type: t3.small
//! ```
//!
//! # Status
//!
//! `webstack-deployer` is **ALPHA** software: expect breaking changes.

use thiserror::Error;
use webstack_bootstrap::Environment;

pub mod config;
pub use config::{Config, Defaults, EnvironmentSettings, Settings};
pub mod deployments;
pub mod template;
pub use template::{Output, Resource, Template};
pub mod network;
pub mod security;
pub mod compute;
pub mod hosting;
pub mod routing;
pub use routing::{Rule, RuleAction, RuleSet};
pub mod dns;
pub mod identity;
pub mod stack;
pub use stack::Target;

cfg_if::cfg_if! {
    if #[cfg(feature = "aws")] {
        pub mod aws;
    }
}

/// Errors that can occur while declaring or deploying a stack.
#[derive(Error, Debug)]
pub enum Error {
    #[error("bootstrap error: {0}")]
    Bootstrap(#[from] webstack_bootstrap::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("no certificate configured for {0}")]
    MissingCertificate(Environment),
    #[error("no identity section configured")]
    MissingIdentity,
    #[error("invalid cidr block: {0}")]
    InvalidCidr(String),
    #[error("invalid target: {0}")]
    InvalidTarget(String),
    #[error("rule {rule} has priority {priority} (must be in 1..=50000)")]
    InvalidPriority { rule: String, priority: u16 },
    #[error("rule {rule} has no conditions")]
    UnconditionalRule { rule: String },
    #[error("rules {first} and {second} share priority {priority}")]
    DuplicatePriority {
        priority: u16,
        first: String,
        second: String,
    },
    #[error("rule {rule} can never match: shadowed by {by}")]
    ShadowedRule { rule: String, by: String },
    #[error("duplicate resource: {0}")]
    DuplicateResource(String),
    #[error("duplicate output: {0}")]
    DuplicateOutput(String),
    #[error("invalid logical id: {0:?}")]
    InvalidLogicalId(String),
    #[error("{resource} references unknown resource {target}")]
    DanglingReference { resource: String, target: String },
    #[error("dependency cycle between: {0:?}")]
    DependencyCycle(Vec<String>),
    #[cfg(feature = "aws")]
    #[error("aws cloudformation error during {operation}: {source}")]
    AwsCloudFormation {
        operation: aws::Operation,
        #[source]
        source: Box<aws_sdk_cloudformation::Error>,
    },
    #[error("change set for {stack} failed: {reason}")]
    ChangeSetFailed { stack: String, reason: String },
    #[error("stack {stack} ended in {status}: {reason}")]
    StackFailed {
        stack: String,
        status: String,
        reason: String,
    },
    #[error("stack {0} does not exist")]
    StackNotFound(String),
    #[error("timed out waiting for {0}")]
    Timeout(String),
    #[error("home directory not set")]
    HomeNotSet,
}
