//! Security groups of an environment.

use crate::{
    network::Network,
    template::{get_att, reference, tags, Resource, Template},
    Settings,
};
use serde_json::json;

pub const LOAD_BALANCER_SECURITY_GROUP: &str = "LoadBalancerSecurityGroup";
pub const INSTANCE_SECURITY_GROUP: &str = "InstanceSecurityGroup";

/// Logical IDs of the declared security groups.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Security {
    pub load_balancer: String,
    pub instance: String,
}

/// The load balancer accepts HTTP and HTTPS from anywhere; the instance only accepts the API
/// port from the load balancer.
pub fn declare(
    template: &mut Template,
    prefix: &str,
    settings: &Settings,
    network: &Network,
    api_port: u16,
) -> Security {
    let environment = settings.environment.name();
    let load_balancer = template.add(Resource::new(
        LOAD_BALANCER_SECURITY_GROUP,
        "AWS::EC2::SecurityGroup",
        json!({
            "GroupDescription": format!("{prefix} load balancer"),
            "VpcId": reference(&network.vpc),
            "SecurityGroupIngress": [
                { "IpProtocol": "tcp", "FromPort": 443, "ToPort": 443, "CidrIp": "0.0.0.0/0" },
                { "IpProtocol": "tcp", "FromPort": 80, "ToPort": 80, "CidrIp": "0.0.0.0/0" },
            ],
            "Tags": tags(&format!("{prefix}-alb"), environment),
        }),
    ));
    let instance = template.add(Resource::new(
        INSTANCE_SECURITY_GROUP,
        "AWS::EC2::SecurityGroup",
        json!({
            "GroupDescription": format!("{prefix} api instance"),
            "VpcId": reference(&network.vpc),
            "SecurityGroupIngress": [{
                "IpProtocol": "tcp",
                "FromPort": api_port,
                "ToPort": api_port,
                "SourceSecurityGroupId": get_att(&load_balancer, "GroupId"),
            }],
            "Tags": tags(&format!("{prefix}-api"), environment),
        }),
    ));
    Security {
        load_balancer,
        instance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::tests::config, network};
    use webstack_bootstrap::Environment;

    #[test]
    fn test_instance_only_reachable_from_load_balancer() {
        let settings = config().settings(Environment::Dev).unwrap();
        let mut template = Template::new("security");
        let network = network::declare(&mut template, "storefront-dev", &settings);
        let security = declare(&mut template, "storefront-dev", &settings, &network, 3000);
        template.validate().unwrap();

        let instance = template.resource(&security.instance).unwrap();
        let ingress = instance.properties["SecurityGroupIngress"].as_array().unwrap();
        assert_eq!(ingress.len(), 1);
        assert_eq!(ingress[0]["FromPort"], 3000);
        assert!(ingress[0].get("CidrIp").is_none());
        assert!(instance.dependencies().contains(LOAD_BALANCER_SECURITY_GROUP));
    }
}
