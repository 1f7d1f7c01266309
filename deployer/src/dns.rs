//! DNS records of an environment.

use crate::{
    compute::Compute,
    routing::Routing,
    template::{get_att, reference, Resource, Template},
    Config, Settings,
};
use serde_json::{json, Value};

pub const API_RECORD: &str = "ApiRecord";
pub const INSTANCE_RECORD: &str = "InstanceRecord";

const TTL: &str = "300";

/// What a record resolves to.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordTarget {
    /// Alias to a load balancer (`DNSName`, `CanonicalHostedZoneID`).
    Alias { dns_name: Value, zone: Value },
    /// Another hostname.
    Cname(Value),
    /// A literal address.
    A(Value),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub logical_id: String,
    pub name: String,
    pub target: RecordTarget,
}

impl Record {
    fn to_resource(&self, hosted_zone_id: &str) -> Resource {
        let mut properties = json!({
            "HostedZoneId": hosted_zone_id,
            "Name": self.name,
        });
        match &self.target {
            RecordTarget::Alias { dns_name, zone } => {
                properties["Type"] = json!("A");
                properties["AliasTarget"] = json!({
                    "DNSName": dns_name,
                    "HostedZoneId": zone,
                    "EvaluateTargetHealth": true,
                });
            }
            RecordTarget::Cname(host) => {
                properties["Type"] = json!("CNAME");
                properties["TTL"] = json!(TTL);
                properties["ResourceRecords"] = json!([host]);
            }
            RecordTarget::A(address) => {
                properties["Type"] = json!("A");
                properties["TTL"] = json!(TTL);
                properties["ResourceRecords"] = json!([address]);
            }
        }
        Resource::new(&self.logical_id, "AWS::Route53::RecordSet", properties)
    }
}

/// Host of the direct instance record (below the API host).
pub fn instance_host(settings: &Settings) -> String {
    format!("instance.{}", settings.api_host)
}

/// Records of an environment: the API host aliases the load balancer, and the instance gets
/// a direct name (an `A` record to its elastic IP, or a `CNAME` to its public DNS name).
pub fn records(settings: &Settings, compute: &Compute, routing: &Routing) -> Vec<Record> {
    let api = Record {
        logical_id: API_RECORD.to_string(),
        name: settings.api_host.clone(),
        target: RecordTarget::Alias {
            dns_name: get_att(&routing.load_balancer, "DNSName"),
            zone: get_att(&routing.load_balancer, "CanonicalHostedZoneID"),
        },
    };
    let target = match &compute.elastic_ip {
        Some(eip) => RecordTarget::A(reference(eip)),
        None => RecordTarget::Cname(get_att(&compute.instance, "PublicDnsName")),
    };
    let instance = Record {
        logical_id: INSTANCE_RECORD.to_string(),
        name: instance_host(settings),
        target,
    };
    vec![api, instance]
}

/// Adds records to the template under the configured hosted zone.
pub fn declare(template: &mut Template, config: &Config, records: &[Record]) -> Vec<String> {
    records
        .iter()
        .map(|record| template.add(record.to_resource(&config.hosted_zone_id)))
        .collect()
}
