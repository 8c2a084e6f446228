use std::collections::HashMap;
use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::pool::FareSchedule;

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub service: ServiceConfig,
    pub matching: MatchingConfig,
    pub pool: PoolSettings,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub http_port: u16,
    pub log_level: String,
    /// `LOG_FORMAT=json` switches to one JSON object per line.
    pub log_json: bool,
    pub event_queue_size: usize,
    pub notification_buffer_size: usize,
    pub pool_sweep_interval_seconds: u64,
    pub store_purge_interval_seconds: u64,
    pub ride_status_ttl_seconds: u64,
    pub eta_tracking_ttl_seconds: u64,
    pub average_speed_kmh: f64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            log_json: false,
            event_queue_size: 1024,
            notification_buffer_size: 1024,
            pool_sweep_interval_seconds: 30,
            store_purge_interval_seconds: 60,
            ride_status_ttl_seconds: 3600,
            eta_tracking_ttl_seconds: 1800,
            average_speed_kmh: 30.0,
        }
    }
}

/// Dispatch tuning. The search radius fields bound what the candidate
/// locator may return; the engine itself only uses the offer settings.
#[derive(Debug, Clone)]
pub struct MatchingConfig {
    pub initial_search_radius_km: f64,
    pub max_search_radius_km: f64,
    pub search_radius_increment_km: f64,
    pub max_drivers_to_notify: usize,
    pub first_batch_size: usize,
    pub offer_timeout_seconds: u64,
    pub retry_delay_seconds: u64,
    pub offer_set_grace_seconds: u64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            initial_search_radius_km: 3.0,
            max_search_radius_km: 10.0,
            search_radius_increment_km: 2.0,
            max_drivers_to_notify: 10,
            first_batch_size: 3,
            offer_timeout_seconds: 30,
            retry_delay_seconds: 15,
            offer_set_grace_seconds: 30,
        }
    }
}

impl MatchingConfig {
    pub fn offer_timeout(&self) -> Duration {
        Duration::from_secs(self.offer_timeout_seconds)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_seconds)
    }

    pub fn offer_set_ttl(&self) -> Duration {
        Duration::from_secs(self.offer_timeout_seconds + self.offer_set_grace_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    pub max_detour_percent: f64,
    pub max_detour_minutes: f64,
    pub max_wait_minutes: i64,
    pub max_passengers_per_ride: u32,
    pub min_match_score: f64,
    pub match_radius_km: f64,
    pub cell_resolution: u8,
    pub discount_percent: f64,
    pub min_savings_percent: f64,
    pub base_fare: f64,
    pub per_km: f64,
    pub per_minute: f64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_detour_percent: 40.0,
            max_detour_minutes: 15.0,
            max_wait_minutes: 10,
            max_passengers_per_ride: 4,
            min_match_score: 0.5,
            match_radius_km: 2.0,
            cell_resolution: 8,
            discount_percent: 25.0,
            min_savings_percent: 10.0,
            base_fare: 2.0,
            per_km: 1.5,
            per_minute: 0.25,
        }
    }
}

impl PoolConfig {
    pub fn fares(&self) -> FareSchedule {
        FareSchedule {
            base_fare: self.base_fare,
            per_km: self.per_km,
            per_minute: self.per_minute,
        }
    }
}

/// Global pool configuration with optional per-city replacements.
#[derive(Debug, Clone, Default)]
pub struct PoolSettings {
    pub global: PoolConfig,
    pub city_overrides: HashMap<String, PoolConfig>,
}

impl PoolSettings {
    pub fn resolve(&self, city: Option<&str>) -> &PoolConfig {
        city.and_then(|name| self.city_overrides.get(&name.to_lowercase()))
            .unwrap_or(&self.global)
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let service_defaults = ServiceConfig::default();
        let service = ServiceConfig {
            http_port: parse_or_default("HTTP_PORT", service_defaults.http_port)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(service_defaults.log_level),
            log_json: env::var("LOG_FORMAT")
                .map(|format| format.eq_ignore_ascii_case("json"))
                .unwrap_or(service_defaults.log_json),
            event_queue_size: parse_or_default("EVENT_QUEUE_SIZE", service_defaults.event_queue_size)?,
            notification_buffer_size: parse_or_default(
                "NOTIFICATION_BUFFER_SIZE",
                service_defaults.notification_buffer_size,
            )?,
            pool_sweep_interval_seconds: parse_or_default(
                "POOL_SWEEP_INTERVAL_SECONDS",
                service_defaults.pool_sweep_interval_seconds,
            )?,
            store_purge_interval_seconds: parse_or_default(
                "STORE_PURGE_INTERVAL_SECONDS",
                service_defaults.store_purge_interval_seconds,
            )?,
            ride_status_ttl_seconds: parse_or_default(
                "RIDE_STATUS_TTL_SECONDS",
                service_defaults.ride_status_ttl_seconds,
            )?,
            eta_tracking_ttl_seconds: parse_or_default(
                "ETA_TRACKING_TTL_SECONDS",
                service_defaults.eta_tracking_ttl_seconds,
            )?,
            average_speed_kmh: parse_or_default("AVERAGE_SPEED_KMH", service_defaults.average_speed_kmh)?,
        };

        let matching_defaults = MatchingConfig::default();
        let matching = MatchingConfig {
            initial_search_radius_km: parse_or_default(
                "INITIAL_SEARCH_RADIUS_KM",
                matching_defaults.initial_search_radius_km,
            )?,
            max_search_radius_km: parse_or_default(
                "MAX_SEARCH_RADIUS_KM",
                matching_defaults.max_search_radius_km,
            )?,
            search_radius_increment_km: parse_or_default(
                "SEARCH_RADIUS_INCREMENT_KM",
                matching_defaults.search_radius_increment_km,
            )?,
            max_drivers_to_notify: parse_or_default(
                "MAX_DRIVERS_TO_NOTIFY",
                matching_defaults.max_drivers_to_notify,
            )?,
            first_batch_size: parse_or_default("FIRST_BATCH_SIZE", matching_defaults.first_batch_size)?,
            offer_timeout_seconds: parse_or_default(
                "OFFER_TIMEOUT_SECONDS",
                matching_defaults.offer_timeout_seconds,
            )?,
            retry_delay_seconds: parse_or_default(
                "RETRY_DELAY_SECONDS",
                matching_defaults.retry_delay_seconds,
            )?,
            offer_set_grace_seconds: parse_or_default(
                "OFFER_SET_GRACE_SECONDS",
                matching_defaults.offer_set_grace_seconds,
            )?,
        };

        let pool_defaults = PoolConfig::default();
        let global = PoolConfig {
            max_detour_percent: parse_or_default("POOL_MAX_DETOUR_PERCENT", pool_defaults.max_detour_percent)?,
            max_detour_minutes: parse_or_default("POOL_MAX_DETOUR_MINUTES", pool_defaults.max_detour_minutes)?,
            max_wait_minutes: parse_or_default("POOL_MAX_WAIT_MINUTES", pool_defaults.max_wait_minutes)?,
            max_passengers_per_ride: parse_or_default(
                "POOL_MAX_PASSENGERS",
                pool_defaults.max_passengers_per_ride,
            )?,
            min_match_score: parse_or_default("POOL_MIN_MATCH_SCORE", pool_defaults.min_match_score)?,
            match_radius_km: parse_or_default("POOL_MATCH_RADIUS_KM", pool_defaults.match_radius_km)?,
            cell_resolution: parse_or_default("POOL_CELL_RESOLUTION", pool_defaults.cell_resolution)?,
            discount_percent: parse_or_default("POOL_DISCOUNT_PERCENT", pool_defaults.discount_percent)?,
            min_savings_percent: parse_or_default(
                "POOL_MIN_SAVINGS_PERCENT",
                pool_defaults.min_savings_percent,
            )?,
            base_fare: parse_or_default("POOL_BASE_FARE", pool_defaults.base_fare)?,
            per_km: parse_or_default("POOL_PER_KM", pool_defaults.per_km)?,
            per_minute: parse_or_default("POOL_PER_MINUTE", pool_defaults.per_minute)?,
        };

        let city_overrides = match env::var("POOL_CITY_OVERRIDES") {
            Ok(raw) => parse_city_overrides(&raw)?,
            Err(_) => HashMap::new(),
        };

        Ok(Self {
            service,
            matching,
            pool: PoolSettings {
                global,
                city_overrides,
            },
        })
    }
}

/// Parses `{"city": {partial pool config}}`; missing fields take the defaults.
pub fn parse_city_overrides(raw: &str) -> Result<HashMap<String, PoolConfig>, AppError> {
    let parsed: HashMap<String, PoolConfig> = serde_json::from_str(raw)
        .map_err(|err| AppError::Internal(format!("invalid POOL_CITY_OVERRIDES: {err}")))?;

    Ok(parsed
        .into_iter()
        .map(|(city, config)| (city.to_lowercase(), config))
        .collect())
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
