//! Run configuration: entity definitions and engine tunables.
//!
//! Tunables come from `HARVEST_*` environment variables (the binary loads a
//! `.env` file first) and may be overridden by CLI flags. Entities come from
//! a JSON file or the built-in set.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::throttle::{DEFAULT_CONCURRENCY_FLOOR, ThrottleController};
use crate::transport::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAYS, RetryPolicy};

/// Default remote API root.
pub const DEFAULT_BASE_URL: &str = "https://www.eoz.kz/api/uicommand";
/// Default data directory.
pub const DEFAULT_DATA_DIR: &str = "raw";
/// Default listing concurrency.
pub const DEFAULT_MAX_CONCURRENT_PAGES: usize = 2;
/// Default object concurrency.
pub const DEFAULT_MAX_CONCURRENT_OBJECTS: usize = 75;
/// Default request rate at full speed.
pub const DEFAULT_REQUESTS_PER_SECOND: u32 = 10;
/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
/// Default number of identifiers dispatched per chunk.
pub const DEFAULT_BATCH_SIZE: usize = 1000;
/// Default listing page length.
pub const DEFAULT_PAGE_LENGTH: u32 = 1000;
/// Identifier field used when an entity does not name one.
pub const DEFAULT_IDENTIFIER_FIELD: &str = "id";

const ENV_BASE_URL: &str = "HARVEST_BASE_URL";
const ENV_COOKIE: &str = "HARVEST_COOKIE";
const ENV_DATA_DIR: &str = "HARVEST_DATA_DIR";
const ENV_MAX_CONCURRENT_PAGES: &str = "HARVEST_MAX_CONCURRENT_PAGES";
const ENV_MAX_CONCURRENT_OBJECTS: &str = "HARVEST_MAX_CONCURRENT_OBJECTS";
const ENV_REQUESTS_PER_SECOND: &str = "HARVEST_REQUESTS_PER_SECOND";
const ENV_MAX_ATTEMPTS: &str = "HARVEST_MAX_ATTEMPTS";
const ENV_RETRY_DELAYS: &str = "HARVEST_RETRY_DELAYS";
const ENV_RETRY_JITTER_MS: &str = "HARVEST_RETRY_JITTER_MS";
const ENV_TIMEOUT_SECS: &str = "HARVEST_TIMEOUT_SECS";
const ENV_MIN_ID: &str = "HARVEST_MIN_ID";
const ENV_BATCH_SIZE: &str = "HARVEST_BATCH_SIZE";
const ENV_PAGE_LENGTH: &str = "HARVEST_PAGE_LENGTH";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A setting has an unusable value.
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        /// Setting name.
        key: String,
        /// Raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The entities file could not be read.
    #[error("failed to read entities file {path}: {source}")]
    EntitiesIo {
        /// File path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The entities file is not a JSON array of entity definitions.
    #[error("invalid entities file {path}: {source}")]
    EntitiesParse {
        /// File path.
        path: PathBuf,
        /// The JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// An entity definition is unusable.
    #[error("invalid entity definition: {0}")]
    InvalidEntity(String),
}

impl ConfigError {
    fn invalid(key: &str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// One resource category to harvest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySpec {
    /// Listing entity name; also names the checkpoint directories.
    pub name: String,
    /// Filter object sent with every listing request.
    #[serde(default = "empty_filter")]
    pub listing_filter: Value,
    /// Field of a listing item holding its identifier.
    #[serde(default = "default_identifier_field")]
    pub identifier_field: String,
    /// Entity name for the object endpoint when it differs from `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_entity: Option<String>,
}

fn empty_filter() -> Value {
    json!({})
}

fn default_identifier_field() -> String {
    DEFAULT_IDENTIFIER_FIELD.to_string()
}

impl EntitySpec {
    /// Creates an entity keyed by `"id"` and fetched under its own name.
    #[must_use]
    pub fn new(name: impl Into<String>, listing_filter: Value) -> Self {
        Self {
            name: name.into(),
            listing_filter,
            identifier_field: default_identifier_field(),
            object_entity: None,
        }
    }

    /// Sets the object endpoint entity name.
    #[must_use]
    pub fn with_object_entity(mut self, object_entity: impl Into<String>) -> Self {
        self.object_entity = Some(object_entity.into());
        self
    }

    /// Sets the identifier field.
    #[must_use]
    pub fn with_identifier_field(mut self, field: impl Into<String>) -> Self {
        self.identifier_field = field.into();
        self
    }

    /// Entity name sent to the object endpoint.
    #[must_use]
    pub fn object_entity_name(&self) -> &str {
        self.object_entity.as_deref().unwrap_or(&self.name)
    }
}

/// Built-in entity set for the public procurement portal.
#[must_use]
pub fn default_entities() -> Vec<EntitySpec> {
    vec![
        EntitySpec::new("_Lot", json!({"tru": null, "includeMyTru": 0})).with_object_entity("Lot"),
        EntitySpec::new("OrderDetail", json!({})).with_object_entity("ContractTitle"),
        EntitySpec::new("Plan", json!({"includeMyTru": 0})),
    ]
}

/// Loads entity definitions from a JSON array file.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file cannot be read or parsed, is empty,
/// or defines an entity with an empty or duplicate name.
pub fn load_entities_file(path: &Path) -> Result<Vec<EntitySpec>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::EntitiesIo {
        path: path.to_path_buf(),
        source,
    })?;
    let entities: Vec<EntitySpec> =
        serde_json::from_str(&raw).map_err(|source| ConfigError::EntitiesParse {
            path: path.to_path_buf(),
            source,
        })?;
    validate_entities(&entities)?;
    debug!(path = %path.display(), count = entities.len(), "loaded entities file");
    Ok(entities)
}

fn validate_entities(entities: &[EntitySpec]) -> Result<(), ConfigError> {
    if entities.is_empty() {
        return Err(ConfigError::InvalidEntity("no entities defined".to_string()));
    }
    let mut seen = HashSet::new();
    for entity in entities {
        if entity.name.trim().is_empty() {
            return Err(ConfigError::InvalidEntity("empty entity name".to_string()));
        }
        if entity.identifier_field.trim().is_empty() {
            return Err(ConfigError::InvalidEntity(format!(
                "entity {} has an empty identifier field",
                entity.name
            )));
        }
        if !seen.insert(entity.name.as_str()) {
            return Err(ConfigError::InvalidEntity(format!(
                "duplicate entity {}",
                entity.name
            )));
        }
    }
    Ok(())
}

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// Remote API root; endpoint paths are appended to it.
    pub base_url: String,
    /// Cookie header attached to every request.
    pub cookie: Option<String>,
    /// Checkpoint root directory.
    pub data_dir: PathBuf,
    /// Listing concurrency per entity.
    pub max_concurrent_pages: usize,
    /// Base object concurrency per entity before throttling.
    pub max_concurrent_objects: usize,
    /// Request rate at full speed; sets the base inter-request delay.
    pub requests_per_second: u32,
    /// Attempts per call, including the first.
    pub max_attempts: u32,
    /// Delay after failed attempt `n` is `retry_delays[n - 1]`.
    pub retry_delays: Vec<Duration>,
    /// Random jitter added to each retry delay.
    pub retry_jitter: Duration,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Only fetch identifiers numerically at or above this value.
    pub min_id: Option<i64>,
    /// Identifiers dispatched per chunk.
    pub batch_size: usize,
    /// Items requested per listing page.
    pub page_length: u32,
    /// Lowest concurrency the throttle shrinks to.
    pub concurrency_floor: usize,
    /// Draw progress bars.
    pub show_progress: bool,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            cookie: None,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            max_concurrent_pages: DEFAULT_MAX_CONCURRENT_PAGES,
            max_concurrent_objects: DEFAULT_MAX_CONCURRENT_OBJECTS,
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delays: DEFAULT_RETRY_DELAYS.to_vec(),
            retry_jitter: Duration::ZERO,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            min_id: None,
            batch_size: DEFAULT_BATCH_SIZE,
            page_length: DEFAULT_PAGE_LENGTH,
            concurrency_floor: DEFAULT_CONCURRENCY_FLOOR,
            show_progress: false,
        }
    }
}

impl HarvestConfig {
    /// Reads `HARVEST_*` variables from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for unparsable values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup; unset or blank keys
    /// keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for unparsable values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(value) = get(ENV_BASE_URL) {
            config.base_url = value.trim().to_string();
        }
        config.cookie = get(ENV_COOKIE);
        if let Some(value) = get(ENV_DATA_DIR) {
            config.data_dir = PathBuf::from(value.trim());
        }
        if let Some(value) = get(ENV_MAX_CONCURRENT_PAGES) {
            config.max_concurrent_pages = parse_number(ENV_MAX_CONCURRENT_PAGES, &value)?;
        }
        if let Some(value) = get(ENV_MAX_CONCURRENT_OBJECTS) {
            config.max_concurrent_objects = parse_number(ENV_MAX_CONCURRENT_OBJECTS, &value)?;
        }
        if let Some(value) = get(ENV_REQUESTS_PER_SECOND) {
            config.requests_per_second = parse_number(ENV_REQUESTS_PER_SECOND, &value)?;
        }
        if let Some(value) = get(ENV_MAX_ATTEMPTS) {
            config.max_attempts = parse_number(ENV_MAX_ATTEMPTS, &value)?;
        }
        if let Some(value) = get(ENV_RETRY_DELAYS) {
            config.retry_delays = parse_delays(ENV_RETRY_DELAYS, &value)?;
        }
        if let Some(value) = get(ENV_RETRY_JITTER_MS) {
            config.retry_jitter =
                Duration::from_millis(parse_number(ENV_RETRY_JITTER_MS, &value)?);
        }
        if let Some(value) = get(ENV_TIMEOUT_SECS) {
            config.timeout = Duration::from_secs(parse_number(ENV_TIMEOUT_SECS, &value)?);
        }
        if let Some(value) = get(ENV_MIN_ID) {
            config.min_id = Some(parse_number(ENV_MIN_ID, &value)?);
        }
        if let Some(value) = get(ENV_BATCH_SIZE) {
            config.batch_size = parse_number(ENV_BATCH_SIZE, &value)?;
        }
        if let Some(value) = get(ENV_PAGE_LENGTH) {
            config.page_length = parse_number(ENV_PAGE_LENGTH, &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the first bad setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.base_url)
            .map_err(|e| ConfigError::invalid(ENV_BASE_URL, &self.base_url, e.to_string()))?;

        let positive = [
            (ENV_MAX_CONCURRENT_PAGES, self.max_concurrent_pages),
            (ENV_MAX_CONCURRENT_OBJECTS, self.max_concurrent_objects),
            (ENV_BATCH_SIZE, self.batch_size),
            (ENV_PAGE_LENGTH, self.page_length as usize),
            (ENV_MAX_ATTEMPTS, self.max_attempts as usize),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::invalid(key, "0", "must be at least 1"));
            }
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::invalid(ENV_TIMEOUT_SECS, "0", "must be at least 1"));
        }
        Ok(())
    }

    /// Retry policy for every transport call.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.retry_delays.clone()).with_jitter(self.retry_jitter)
    }

    /// Inter-request delay at full speed.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        if self.requests_per_second == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1) / self.requests_per_second
        }
    }

    /// Fresh throttle controller for one entity.
    #[must_use]
    pub fn throttle(&self) -> ThrottleController {
        ThrottleController::new(self.base_delay(), self.concurrency_floor)
    }
}

fn parse_number<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::invalid(key, value, e.to_string()))
}

fn parse_delays(key: &str, value: &str) -> Result<Vec<Duration>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let secs: f64 = parse_number(key, part)?;
            Duration::try_from_secs_f64(secs)
                .map_err(|e| ConfigError::invalid(key, part, e.to_string()))
        })
        .collect()
}
