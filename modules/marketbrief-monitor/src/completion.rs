use std::time::Duration;

use ai_client::{CompletionClient, CompletionRequest};
use marketbrief_common::MarketBriefError;

/// Call the completion collaborator under a deadline. The collaborator
/// guarantees no latency bound, so expiry is a stage failure.
pub async fn complete_bounded(
    client: &dyn CompletionClient,
    request: CompletionRequest,
    timeout: Duration,
) -> Result<String, MarketBriefError> {
    match tokio::time::timeout(timeout, client.complete(request)).await {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(MarketBriefError::Completion(e.to_string())),
        Err(_) => Err(MarketBriefError::Completion(format!(
            "completion timed out after {}s",
            timeout.as_secs()
        ))),
    }
}
