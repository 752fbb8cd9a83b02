//! Platform profile registry
//!
//! The registry contains the immutable per-platform settings the orchestrator is
//! built from: native funding cadence, dataset intervals, the token bucket
//! budget and the worker pool concurrency ceiling.

use crate::{Interval, Platform};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Embedded registry data
const REGISTRY_JSON: &str = include_str!("platforms.json");

/// Global registry instance (loaded once)
static REGISTRY: Lazy<Result<PlatformRegistry, RegistryError>> =
    Lazy::new(|| PlatformRegistry::from_json(REGISTRY_JSON));

/// Registry of supported platforms and their ingestion profiles
#[derive(Debug, Clone)]
pub struct PlatformRegistry {
    #[allow(dead_code)]
    schema_version: String,
    #[allow(dead_code)]
    last_updated: String,
    profiles: HashMap<Platform, PlatformProfile>,
}

impl PlatformRegistry {
    /// Load the embedded registry
    ///
    /// This is a singleton operation - the registry is loaded once and cached.
    pub fn load() -> Result<&'static Self, &'static RegistryError> {
        REGISTRY.as_ref()
    }

    /// Load embedded registry, returning an owned copy
    pub fn load_embedded() -> Result<Self, RegistryError> {
        Self::from_json(REGISTRY_JSON)
    }

    /// Parse registry from JSON string
    pub fn from_json(json: &str) -> Result<Self, RegistryError> {
        let raw: RawRegistry = serde_json::from_str(json)
            .map_err(|e| RegistryError::ParseError(format!("Failed to parse registry: {e}")))?;

        let mut profiles = HashMap::new();
        for profile in raw.platforms {
            profile.validate()?;
            if profiles.insert(profile.platform, profile.clone()).is_some() {
                return Err(RegistryError::ParseError(format!(
                    "Duplicate profile for platform {}",
                    profile.platform
                )));
            }
        }

        Ok(Self {
            schema_version: raw.schema_version,
            last_updated: raw.last_updated,
            profiles,
        })
    }

    /// Get the profile of a platform
    pub fn profile(&self, platform: Platform) -> Result<&PlatformProfile, RegistryError> {
        self.profiles
            .get(&platform)
            .ok_or_else(|| RegistryError::NotFound(platform.to_string()))
    }

    /// All profiles in canonical platform order
    pub fn profiles(&self) -> Vec<&PlatformProfile> {
        Platform::ALL
            .iter()
            .filter_map(|p| self.profiles.get(p))
            .collect()
    }
}

/// Token bucket budget for one platform
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateBudget {
    /// Maximum tokens held by the bucket
    pub capacity: u32,
    /// Time for an empty bucket to refill completely
    pub refill_interval_ms: u64,
}

impl RateBudget {
    /// Refill interval as a [`Duration`]
    pub fn refill_interval(&self) -> Duration {
        Duration::from_millis(self.refill_interval_ms)
    }
}

/// Immutable ingestion settings of one platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformProfile {
    /// Platform this profile describes
    pub platform: Platform,
    /// Human-readable description
    pub description: String,
    /// Native funding sampling interval (1h or 8h)
    pub funding_interval: Interval,
    /// Candle interval ingested
    pub ohlcv_interval: Interval,
    /// Open interest interval ingested
    pub oi_interval: Interval,
    /// Long/short ratio interval ingested
    pub ratio_interval: Interval,
    /// Token bucket budget
    pub rate_limit: RateBudget,
    /// Worker pool concurrency ceiling
    pub concurrency: usize,
    /// Fixed delay between items claimed by one worker
    #[serde(default)]
    pub item_delay_ms: u64,
}

impl PlatformProfile {
    /// Canonical interval used for cross-platform funding comparison
    pub const CANONICAL_FUNDING_INTERVAL: Interval = Interval::EightHours;

    /// Whether hourly funding must be aggregated into the canonical interval
    pub fn needs_resampling(&self) -> bool {
        self.funding_interval.to_milliseconds()
            < Self::CANONICAL_FUNDING_INTERVAL.to_milliseconds()
    }

    /// Delay between items claimed by one worker
    pub fn item_delay(&self) -> Duration {
        Duration::from_millis(self.item_delay_ms)
    }

    fn validate(&self) -> Result<(), RegistryError> {
        if self.concurrency == 0 {
            return Err(RegistryError::ParseError(format!(
                "{}: concurrency must be at least 1",
                self.platform
            )));
        }
        if self.rate_limit.capacity == 0 || self.rate_limit.refill_interval_ms == 0 {
            return Err(RegistryError::ParseError(format!(
                "{}: rate limit capacity and refill interval must be positive",
                self.platform
            )));
        }
        if !matches!(self.funding_interval, Interval::OneHour | Interval::EightHours) {
            return Err(RegistryError::ParseError(format!(
                "{}: funding interval must be 1h or 8h, got {}",
                self.platform, self.funding_interval
            )));
        }
        Ok(())
    }
}

/// Raw registry structure for deserialization
#[derive(Debug, Deserialize)]
struct RawRegistry {
    schema_version: String,
    last_updated: String,
    platforms: Vec<PlatformProfile>,
}

/// Errors that can occur when working with the registry
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    /// Failed to parse registry JSON
    #[error("registry parse error: {0}")]
    ParseError(String),

    /// Platform not found in registry
    #[error("platform not found: {0}")]
    NotFound(String),
}
