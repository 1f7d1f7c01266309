//! Lambda entrypoint for the claim enrichment hook.

use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde_json::Value;
use tracing::debug;
use tracing_subscriber::EnvFilter;

async fn handler(event: LambdaEvent<Value>) -> Result<Value, Error> {
    debug!(request_id = event.context.request_id.as_str(), "invoked");
    Ok(webstack_claims::handle(event.payload))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Error> {
    // CloudWatch stamps every line, so the formatter omits time
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    run(service_fn(handler)).await
}
