//! Shared resources for all exchange clients
//!
//! This module provides the process-wide HTTP client and one token bucket per
//! platform, so every client of a platform draws from the same budget.
//!
//! # Critical for Production
//!
//! Exchanges enforce rate limits per IP address. If each client created its own
//! limiter, concurrent pipelines would bypass the shared quota and risk bans.

use once_cell::sync::Lazy;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::warn;

use crate::ingest::rate_limit::TokenBucketLimiter;
use crate::registry::PlatformProfile;
use crate::Platform;

/// HTTP connect timeout (seconds) - time to establish TCP connection
const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
/// HTTP request timeout (seconds) - overall time for the entire request
const HTTP_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Global HTTP client shared by all exchange clients
///
/// Configured with explicit timeouts to prevent indefinite hangs:
/// - Connect timeout: 10 seconds
/// - Request timeout: 30 seconds
pub static GLOBAL_HTTP_CLIENT: Lazy<Arc<Client>> = Lazy::new(|| {
    let client = Client::builder()
        .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
        .build()
        .unwrap_or_else(|e| {
            warn!(
                error = %e,
                "Failed to build configured HTTP client, falling back to defaults without timeouts"
            );
            Client::new()
        });
    Arc::new(client)
});

static PLATFORM_LIMITERS: Lazy<Mutex<HashMap<Platform, TokenBucketLimiter>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Get the global HTTP client
///
/// Returns a clone of the Arc, which is cheap (just increments ref count)
pub fn global_http_client() -> Arc<Client> {
    GLOBAL_HTTP_CLIENT.clone()
}

/// Get the shared token bucket of a platform, creating it from the profile's budget
///
/// The first call for a platform fixes its budget for the life of the process.
pub fn platform_rate_limiter(profile: &PlatformProfile) -> TokenBucketLimiter {
    let mut limiters = PLATFORM_LIMITERS
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    limiters
        .entry(profile.platform)
        .or_insert_with(|| TokenBucketLimiter::from_budget(&profile.rate_limit))
        .clone()
}
