//! Throttle-aware retrying call shared by the crawler and the fetcher.

use serde_json::Value;
use tracing::debug;

use crate::throttle::ThrottleController;
use crate::transport::{ApiRequest, RetryPolicy, Transport, TransportError, classify_error, retry_call};

/// Sends `request` through the retry wrapper, feeding every outcome that
/// says something about server health into `throttle`.
///
/// Returns the document or the last error, each with the attempt count.
pub(crate) async fn call_with_retry(
    transport: &dyn Transport,
    throttle: &ThrottleController,
    policy: &RetryPolicy,
    request: &ApiRequest,
) -> Result<(Value, u32), (TransportError, u32)> {
    let result = retry_call(
        policy,
        classify_error,
        |error, kind, attempt| {
            if kind.indicates_server_stress() {
                throttle.observe(false);
            }
            debug!(
                path = %request.path,
                attempt,
                kind = kind.as_str(),
                error = %error,
                "request attempt failed"
            );
        },
        |_| transport.request(request),
    )
    .await;

    if result.is_ok() {
        throttle.observe(true);
    }
    result
}
