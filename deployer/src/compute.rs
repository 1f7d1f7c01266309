//! API instance, its identity, and its optional fixed address.

use crate::{
    network::{Network, GATEWAY_ATTACHMENT},
    security::Security,
    template::{base64, reference, sub, tags, Resource, Template},
    Config, Error, Settings,
};
use serde_json::json;
use webstack_bootstrap::Procedure;

pub const INSTANCE_ROLE: &str = "InstanceRole";
pub const INSTANCE_PROFILE: &str = "InstanceProfile";
pub const ELASTIC_IP: &str = "ElasticIp";

/// Prefix of the instance logical ID; the generation is appended.
const INSTANCE_PREFIX: &str = "ApiInstance";

/// Public parameters resolving to the latest Amazon Linux 2023 images.
const AMI_PARAMETER_X86_64: &str = "/aws/service/ami-amazon-linux-latest/al2023-ami-kernel-default-x86_64";
const AMI_PARAMETER_ARM64: &str = "/aws/service/ami-amazon-linux-latest/al2023-ami-kernel-default-arm64";

/// Logical IDs of the declared compute resources.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Compute {
    pub role: String,
    pub profile: String,
    pub instance: String,
    pub elastic_ip: Option<String>,
}

/// Logical ID of the instance. A new generation is a new resource, so CloudFormation
/// replaces the instance instead of updating it in place.
pub fn instance_id(generation: &str) -> String {
    format!("{INSTANCE_PREFIX}{generation}")
}

/// CPU architecture of an instance type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Architecture {
    X86_64,
    Arm64,
}

impl Architecture {
    /// Graviton families carry a `g` after the generation digit (`t4g`, `m7gd`, `c7gn`).
    pub fn of(instance_type: &str) -> Self {
        let family = instance_type.split('.').next().unwrap_or(instance_type);
        match family.find(|c: char| c.is_ascii_digit()) {
            Some(digit) if family[digit + 1..].contains('g') => Self::Arm64,
            _ => Self::X86_64,
        }
    }

    fn image(&self) -> String {
        let parameter = match self {
            Self::X86_64 => AMI_PARAMETER_X86_64,
            Self::Arm64 => AMI_PARAMETER_ARM64,
        };
        format!("{{{{resolve:ssm:{parameter}}}}}")
    }
}

/// Declares the role, instance profile, instance (whose user data is the rendered bootstrap
/// procedure), and, when enabled, an elastic IP.
pub fn declare(
    template: &mut Template,
    prefix: &str,
    config: &Config,
    settings: &Settings,
    network: &Network,
    security: &Security,
) -> Result<Compute, Error> {
    let environment = settings.environment;
    let parameters = environment.parameter_prefix(&config.org, "api");
    let secret = &config.secret;
    let role = template.add(Resource::new(
        INSTANCE_ROLE,
        "AWS::IAM::Role",
        json!({
            "RoleName": format!("{prefix}-api"),
            "AssumeRolePolicyDocument": {
                "Version": "2012-10-17",
                "Statement": [{
                    "Effect": "Allow",
                    "Principal": { "Service": "ec2.amazonaws.com" },
                    "Action": "sts:AssumeRole",
                }],
            },
            "ManagedPolicyArns": [
                sub("arn:${AWS::Partition}:iam::aws:policy/AmazonSSMManagedInstanceCore"),
            ],
            "Policies": [{
                "PolicyName": "api",
                "PolicyDocument": {
                    "Version": "2012-10-17",
                    "Statement": [
                        {
                            "Effect": "Allow",
                            "Action": "secretsmanager:GetSecretValue",
                            "Resource": sub(&format!(
                                "arn:${{AWS::Partition}}:secretsmanager:${{AWS::Region}}:${{AWS::AccountId}}:secret:{secret}-*"
                            )),
                        },
                        {
                            "Effect": "Allow",
                            "Action": [
                                "ssm:GetParameter",
                                "ssm:GetParameters",
                                "ssm:GetParametersByPath",
                            ],
                            "Resource": [
                                sub(&format!(
                                    "arn:${{AWS::Partition}}:ssm:${{AWS::Region}}:${{AWS::AccountId}}:parameter{}",
                                    parameters.trim_end_matches('/')
                                )),
                                sub(&format!(
                                    "arn:${{AWS::Partition}}:ssm:${{AWS::Region}}:${{AWS::AccountId}}:parameter{parameters}*"
                                )),
                            ],
                        },
                    ],
                },
            }],
        }),
    ));
    let profile = template.add(Resource::new(
        INSTANCE_PROFILE,
        "AWS::IAM::InstanceProfile",
        json!({ "Roles": [reference(&role)] }),
    ));

    let procedure = Procedure::new(&config.bootstrap(settings)?)?;
    let instance = template.add(Resource::new(
        &instance_id(&settings.generation),
        "AWS::EC2::Instance",
        json!({
            "ImageId": Architecture::of(&settings.instance_type).image(),
            "InstanceType": settings.instance_type,
            "SubnetId": reference(&network.public_subnets[0]),
            "SecurityGroupIds": [reference(&security.instance)],
            "IamInstanceProfile": reference(&profile),
            "UserData": base64(json!(procedure.render())),
            "BlockDeviceMappings": [{
                "DeviceName": "/dev/xvda",
                "Ebs": {
                    "VolumeType": "gp3",
                    "VolumeSize": config.api.volume_size,
                    "Encrypted": true,
                    "DeleteOnTermination": true,
                },
            }],
            "MetadataOptions": { "HttpTokens": "required" },
            "Tags": tags(&format!("{prefix}-api-{}", settings.generation), environment.name()),
        }),
    ));

    let elastic_ip = settings.elastic_ip.then(|| {
        template.add(
            Resource::new(
                ELASTIC_IP,
                "AWS::EC2::EIP",
                json!({
                    "Domain": "vpc",
                    "InstanceId": reference(&instance),
                    "Tags": tags(&format!("{prefix}-api"), environment.name()),
                }),
            )
            .depends_on(GATEWAY_ATTACHMENT),
        )
    });

    Ok(Compute {
        role,
        profile,
        instance,
        elastic_ip,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::tests::config, network, security};
    use test_case::test_case;
    use webstack_bootstrap::Environment;

    fn declared(environment: Environment) -> (Template, Compute) {
        let config = config();
        let settings = config.settings(environment).unwrap();
        let prefix = format!("storefront-{}", environment.name());
        let mut template = Template::new("compute");
        let network = network::declare(&mut template, &prefix, &settings);
        let security = security::declare(&mut template, &prefix, &settings, &network, 3000);
        let compute =
            declare(&mut template, &prefix, &config, &settings, &network, &security).unwrap();
        template.validate().unwrap();
        (template, compute)
    }

    #[test_case("t3.small", Architecture::X86_64)]
    #[test_case("t4g.micro", Architecture::Arm64)]
    #[test_case("m7gd.large", Architecture::Arm64)]
    #[test_case("c7gn.xlarge", Architecture::Arm64)]
    #[test_case("g5.xlarge", Architecture::X86_64)]
    #[test_case("m5dn.large", Architecture::X86_64)]
    fn test_architecture(instance_type: &str, expected: Architecture) {
        assert_eq!(Architecture::of(instance_type), expected);
    }

    #[test]
    fn test_elastic_ip_only_in_prod() {
        let (template, compute) = declared(Environment::Prod);
        assert_eq!(compute.elastic_ip.as_deref(), Some(ELASTIC_IP));
        assert!(template.resource(ELASTIC_IP).is_some());

        let (template, compute) = declared(Environment::Staging);
        assert!(compute.elastic_ip.is_none());
        assert!(template.resource(ELASTIC_IP).is_none());
    }

    #[test]
    fn test_generation_changes_identity() {
        let (_, first) = declared(Environment::Prod);
        assert_eq!(first.instance, "ApiInstance2");
        let (_, second) = declared(Environment::Staging);
        assert_eq!(second.instance, "ApiInstance1");
        assert_ne!(instance_id("1"), instance_id("2"));
    }

    #[test]
    fn test_user_data_is_bootstrap_script() {
        let (template, compute) = declared(Environment::Staging);
        let instance = template.resource(&compute.instance).unwrap();
        let script = instance.properties["UserData"]["Fn::Base64"].as_str().unwrap();
        assert!(script.starts_with("#!/bin/bash"));
        assert!(script.contains("develop"));
        assert!(!script.contains("github-token:"));
        assert_eq!(instance.properties["InstanceType"], "t3.micro");
        assert_eq!(instance.properties["SubnetId"]["Ref"], "PublicSubnet1");
    }

    #[test]
    fn test_role_scopes() {
        let (template, compute) = declared(Environment::Dev);
        let role = template.resource(&compute.role).unwrap();
        let policy = serde_json::to_string(&role.properties["Policies"]).unwrap();
        assert!(policy.contains("secret:acme/github-token-*"));
        assert!(policy.contains("parameter/acme/dev/api/*"));
        assert!(!policy.contains("/acme/prod/"));
        let managed = serde_json::to_string(&role.properties["ManagedPolicyArns"]).unwrap();
        assert!(managed.contains("AmazonSSMManagedInstanceCore"));
    }
}
