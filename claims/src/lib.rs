//! Inject profile attributes as custom claims during token issuance.
//!
//! The identity provider invokes [handle] once per token request. The hook copies the
//! principal's `custom:domainId` attribute into the `domainId` claim of both the access token
//! and the ID token. A missing attribute produces a `null` claim. A malformed event degrades
//! to an empty one that still carries the attribute if it can be found: the hook never fails,
//! so it can never block authentication.

use serde_json::Value;
use tracing::{info, warn};

mod event;
pub use event::{
    CallerContext, ClaimsAndScopeOverrideDetails, DomainClaims, PreTokenGenerationEvent, Request,
    Response, TokenGeneration, DOMAIN_ID_ATTRIBUTE,
};

/// Computes the claim overrides for an event.
pub fn enrich(event: &PreTokenGenerationEvent) -> ClaimsAndScopeOverrideDetails {
    let claims = DomainClaims {
        domain_id: event.request.domain_id().map(str::to_string),
    };
    ClaimsAndScopeOverrideDetails {
        id_token_generation: TokenGeneration {
            claims_to_add_or_override: claims.clone(),
        },
        access_token_generation: TokenGeneration {
            claims_to_add_or_override: claims,
        },
    }
}

/// Builds an empty event carrying only the domain attribute of `raw`, if it is a string.
fn salvage(raw: &Value) -> PreTokenGenerationEvent {
    let mut event = PreTokenGenerationEvent::default();
    let pointer = format!("/request/userAttributes/{DOMAIN_ID_ATTRIBUTE}");
    if let Some(domain_id) = raw.pointer(&pointer).and_then(Value::as_str) {
        event
            .request
            .user_attributes
            .insert(DOMAIN_ID_ATTRIBUTE.to_string(), domain_id.to_string());
    }
    event
}

/// Handles a raw event, returning it with the claim overrides attached.
pub fn handle(raw: Value) -> Value {
    info!(event = %raw, "received token generation event");
    let mut event = match serde_json::from_value::<PreTokenGenerationEvent>(raw.clone()) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "malformed event, continuing with defaults");
            salvage(&raw)
        }
    };

    let details = enrich(&event);
    event.response.claims_and_scope_override_details = Some(details);

    let response = serde_json::to_value(&event).unwrap_or_else(|e| {
        warn!(error = %e, "failed to serialize response");
        Value::Null
    });
    info!(response = %response, "computed claim overrides");
    response
}
