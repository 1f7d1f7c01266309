//! Token generation event exchanged with the identity provider.
//!
//! Field names follow the provider's camelCase wire format. Every field is optional on the way
//! in: a missing key deserializes to its default so a sparse event still produces a response.
//! Keys this crate does not recognize are kept in `extra` and echoed back unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Profile attribute holding the principal's domain.
pub const DOMAIN_ID_ATTRIBUTE: &str = "custom:domainId";

/// Event delivered by the identity provider before it issues tokens.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PreTokenGenerationEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_pool_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_context: Option<CallerContext>,
    #[serde(default)]
    pub request: Request,
    #[serde(default)]
    pub response: Response,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Client that triggered the token request.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallerContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_sdk_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

/// Request half of the event.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Profile attributes of the authenticated principal.
    #[serde(default)]
    pub user_attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_configuration: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_metadata: Option<BTreeMap<String, String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Request {
    /// Returns the principal's domain, if the attribute is present.
    pub fn domain_id(&self) -> Option<&str> {
        self.user_attributes
            .get(DOMAIN_ID_ATTRIBUTE)
            .map(String::as_str)
    }
}

/// Response half of the event, filled in by the hook.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    #[serde(default)]
    pub claims_and_scope_override_details: Option<ClaimsAndScopeOverrideDetails>,
}

/// Claim overrides for both issued tokens.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClaimsAndScopeOverrideDetails {
    pub id_token_generation: TokenGeneration,
    pub access_token_generation: TokenGeneration,
}

/// Overrides applied to a single token.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenGeneration {
    pub claims_to_add_or_override: DomainClaims,
}

/// Custom claims injected into issued tokens.
///
/// An absent domain serializes as `null` rather than being omitted.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct DomainClaims {
    #[serde(rename = "domainId", default)]
    pub domain_id: Option<String>,
}
