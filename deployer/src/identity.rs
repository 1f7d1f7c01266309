//! Claim enrichment hook shared by every environment.

use crate::{
    template::{get_att, sub, Resource, Template},
    Config, Error,
};
use serde_json::json;

pub const FUNCTION_ROLE: &str = "ClaimsFunctionRole";
pub const FUNCTION: &str = "ClaimsFunction";
pub const LOG_GROUP: &str = "ClaimsFunctionLogGroup";
pub const PERMISSION: &str = "ClaimsFunctionPermission";

/// Runtime of the packaged hook (a `bootstrap` binary).
const RUNTIME: &str = "provided.al2023";
const HANDLER: &str = "bootstrap";
const TIMEOUT_SECONDS: u16 = 5;
const MEMORY_MB: u16 = 128;
const LOG_RETENTION_DAYS: u16 = 30;

/// Logical IDs of the declared identity resources.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub role: String,
    pub function: String,
    pub permission: String,
}

/// Name of the deployed function.
pub fn function_name(config: &Config) -> String {
    format!("{}-claims", config.name)
}

/// Declares the hook function, its execution role and log group, and the permission that
/// lets the user pool invoke it.
pub fn declare(template: &mut Template, config: &Config) -> Result<Identity, Error> {
    let identity = config.identity()?;
    let name = function_name(config);

    let role = template.add(Resource::new(
        FUNCTION_ROLE,
        "AWS::IAM::Role",
        json!({
            "AssumeRolePolicyDocument": {
                "Version": "2012-10-17",
                "Statement": [{
                    "Effect": "Allow",
                    "Principal": { "Service": "lambda.amazonaws.com" },
                    "Action": "sts:AssumeRole",
                }],
            },
            "ManagedPolicyArns": [
                sub("arn:${AWS::Partition}:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole"),
            ],
        }),
    ));
    let log_group = template.add(Resource::new(
        LOG_GROUP,
        "AWS::Logs::LogGroup",
        json!({
            "LogGroupName": format!("/aws/lambda/{name}"),
            "RetentionInDays": LOG_RETENTION_DAYS,
        }),
    ));
    let function = template.add(
        Resource::new(
            FUNCTION,
            "AWS::Lambda::Function",
            json!({
                "FunctionName": name,
                "Runtime": RUNTIME,
                "Handler": HANDLER,
                "Architectures": ["arm64"],
                "Code": { "S3Bucket": identity.code_bucket, "S3Key": identity.code_key },
                "Role": get_att(&role, "Arn"),
                "Timeout": TIMEOUT_SECONDS,
                "MemorySize": MEMORY_MB,
                "Environment": { "Variables": { "RUST_LOG": "info" } },
            }),
        )
        .depends_on(&log_group),
    );
    let permission = template.add(Resource::new(
        PERMISSION,
        "AWS::Lambda::Permission",
        json!({
            "Action": "lambda:InvokeFunction",
            "FunctionName": get_att(&function, "Arn"),
            "Principal": "cognito-idp.amazonaws.com",
            "SourceArn": identity.user_pool_arn,
        }),
    ));

    Ok(Identity {
        role,
        function,
        permission,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::config;

    #[test]
    fn test_declare() {
        let config = config();
        let mut template = Template::new("shared");
        let identity = declare(&mut template, &config).unwrap();
        template.validate().unwrap();

        let function = template.resource(&identity.function).unwrap();
        assert_eq!(function.properties["FunctionName"], "storefront-claims");
        assert_eq!(function.properties["Code"]["S3Key"], "claims/bootstrap.zip");
        assert_eq!(function.properties["Handler"], "bootstrap");

        let permission = template.resource(&identity.permission).unwrap();
        assert_eq!(permission.properties["Principal"], "cognito-idp.amazonaws.com");
        assert_eq!(
            permission.properties["SourceArn"],
            "arn:aws:cognito-idp:us-east-1:111122223333:userpool/us-east-1_abc"
        );

        let order: Vec<_> = template
            .order()
            .unwrap()
            .into_iter()
            .map(|r| r.logical_id.as_str())
            .collect();
        assert_eq!(order, vec![FUNCTION_ROLE, LOG_GROUP, FUNCTION, PERMISSION]);
    }

    #[test]
    fn test_missing_identity() {
        let mut config = config();
        config.identity = None;
        let mut template = Template::new("shared");
        assert!(matches!(
            declare(&mut template, &config),
            Err(Error::MissingIdentity)
        ));
    }
}
