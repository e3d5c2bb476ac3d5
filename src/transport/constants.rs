//! Constants for the transport module (endpoints, timeouts, headers).

/// Listing endpoint path, relative to the base URL.
pub const LISTING_PATH: &str = "/get/page";

/// Object endpoint path, relative to the base URL.
pub const OBJECT_PATH: &str = "/get/object";

/// Default HTTP connect timeout (10 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default whole-request timeout (60 seconds).
pub const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Idle keep-alive connections retained per host.
pub const POOL_MAX_IDLE_PER_HOST: usize = 50;

/// Browser User-Agent; the remote service rejects obvious bot agents.
pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
