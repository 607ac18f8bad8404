//! Configuration System using Figment
//!
//! Strongly-typed configuration for the scan engine. Configuration is layered from:
//! 1. a TOML file (base configuration, `config/scan.toml` by default)
//! 2. environment variables prefixed with `NEARFIELD_`, nested keys separated by `__`
//!    (e.g. `NEARFIELD_SCAN__STAGE__FEED_RATE=1200`)
//!
//! The `[scan]` table holds one group per collaborator: `stage`, `instrument`, `path` and
//! `progress`. Every field of these groups is optional while loading; presence is checked
//! when an acquisition starts ([`ScanConfig::resolve`]), so a partially filled file can
//! still be used to plan a path or to inspect settings.
//!
//! # Example
//! ```no_run
//! use nearfield_scan::config::AppConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load_from("config/scan.toml")?;
//! let geometry = config.scan.geometry()?;
//! println!("Scanning at {} mm", geometry.pass_height);
//! # Ok(())
//! # }
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ScanError, ScanResult};
use crate::experiment::planner::{Point3, ScanArea, ScanGeometry};

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "config/scan.toml";

/// Prefix of environment variable overrides
pub const ENV_PREFIX: &str = "NEARFIELD_";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Acquisition settings
    #[serde(default)]
    pub scan: ScanConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_name() -> String {
    "nearfield-scan".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// The four configuration groups consumed by an acquisition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Motion stage settings
    #[serde(default)]
    pub stage: StageSettings,
    /// Measurement instrument settings
    #[serde(default)]
    pub instrument: InstrumentSettings,
    /// Scan path geometry
    #[serde(default)]
    pub path: PathSettings,
    /// Progress reporting and time estimation
    #[serde(default)]
    pub progress: ProgressSettings,
}

/// `[scan.stage]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageSettings {
    /// Feed rate for every move (mm/min)
    pub feed_rate: Option<f64>,
    /// Usable travel along X (mm)
    pub travel_x: Option<f64>,
    /// Usable travel along Y (mm)
    pub travel_y: Option<f64>,
}

/// `[scan.instrument]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSettings {
    /// Measurement frequency (Hz)
    pub frequency_hz: Option<f64>,
    /// Measurement time (s) for level readings, sample count for network analyzers
    pub dwell: Option<f64>,
}

/// `[scan.path]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathSettings {
    /// Probe height above the bed (mm)
    pub pass_height: Option<f64>,
    /// Sample area origin X (mm)
    pub sample_x: Option<f64>,
    /// Sample area origin Y (mm)
    pub sample_y: Option<f64>,
    /// Sample area extent along X (mm)
    pub sample_width: Option<f64>,
    /// Sample area extent along Y (mm)
    pub sample_length: Option<f64>,
    /// Probe-to-actuator offset X (mm)
    pub offset_x: Option<f64>,
    /// Probe-to-actuator offset Y (mm)
    pub offset_y: Option<f64>,
    /// Probe-to-actuator offset Z (mm); 0 when absent
    pub offset_z: Option<f64>,
    /// Point spacing (mm)
    pub measurement_radius: Option<f64>,
}

/// `[scan.progress]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSettings {
    /// Estimated time per sample point (s)
    pub seconds_per_point: Option<f64>,
    /// Estimated fixed overhead of a scan (s)
    pub overhead_seconds: Option<f64>,
    /// Publish a grid snapshot every n points; 1 when absent
    pub snapshot_interval: Option<usize>,
}

/// Fully resolved acquisition settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedScanConfig {
    /// Feed rate for every move (mm/min)
    pub feed_rate: f64,
    /// Stage travel limits (mm)
    pub travel_limits: (f64, f64),
    /// Measurement frequency (Hz)
    pub frequency_hz: f64,
    /// Second instrument parameter
    pub dwell: f64,
    /// Estimated time per sample point (s)
    pub seconds_per_point: f64,
    /// Estimated fixed overhead of a scan (s)
    pub overhead_seconds: f64,
    /// Publish a grid snapshot every n points
    pub snapshot_interval: usize,
}

impl AppConfig {
    /// Load configuration from the default location and environment variables
    pub fn load() -> ScanResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// Environment variables override file values, e.g.
    /// `NEARFIELD_APPLICATION__LOG_LEVEL=debug`.
    pub fn load_from<P: AsRef<Path>>(path: P) -> ScanResult<Self> {
        Ok(Self::figment(path).extract()?)
    }

    /// Parse configuration from TOML text, without environment overrides
    pub fn from_toml_str(toml: &str) -> ScanResult<Self> {
        Ok(Figment::new().merge(Toml::string(toml)).extract()?)
    }

    /// Provider stack used by [`AppConfig::load_from`]
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> ScanResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(ScanError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(ScanError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        Ok(())
    }
}

/// Collects the dotted names of absent keys while unpacking a group.
struct Presence {
    missing: Vec<String>,
}

impl Presence {
    fn require<T: Copy + Default>(&mut self, value: Option<T>, key: &str) -> T {
        value.unwrap_or_else(|| {
            self.missing.push(key.to_string());
            T::default()
        })
    }

    fn finish(self) -> ScanResult<()> {
        if self.missing.is_empty() {
            Ok(())
        } else {
            Err(ScanError::ConfigIncomplete {
                missing: self.missing,
            })
        }
    }
}

impl ScanConfig {
    /// Check that every required key of the four groups is present.
    ///
    /// Fails with [`ScanError::ConfigIncomplete`] listing all missing keys (e.g.
    /// `stage.feed_rate`), or with [`ScanError::Configuration`] for values that are
    /// present but unusable.
    pub fn resolve(&self) -> ScanResult<ResolvedScanConfig> {
        let mut presence = Presence {
            missing: Vec::new(),
        };

        let feed_rate = presence.require(self.stage.feed_rate, "stage.feed_rate");
        let travel_x = presence.require(self.stage.travel_x, "stage.travel_x");
        let travel_y = presence.require(self.stage.travel_y, "stage.travel_y");

        let frequency_hz = presence.require(self.instrument.frequency_hz, "instrument.frequency_hz");
        let dwell = presence.require(self.instrument.dwell, "instrument.dwell");

        self.check_path(&mut presence);

        let seconds_per_point =
            presence.require(self.progress.seconds_per_point, "progress.seconds_per_point");
        let overhead_seconds =
            presence.require(self.progress.overhead_seconds, "progress.overhead_seconds");
        let snapshot_interval = self.progress.snapshot_interval.unwrap_or(1);

        presence.finish()?;

        if !(feed_rate.is_finite() && feed_rate > 0.0) {
            return Err(ScanError::Configuration(format!(
                "stage.feed_rate must be positive, got {}",
                feed_rate
            )));
        }
        if snapshot_interval == 0 {
            return Err(ScanError::Configuration(
                "progress.snapshot_interval must be at least 1".to_string(),
            ));
        }

        Ok(ResolvedScanConfig {
            feed_rate,
            travel_limits: (travel_x, travel_y),
            frequency_hz,
            dwell,
            seconds_per_point,
            overhead_seconds,
            snapshot_interval,
        })
    }

    /// Build the scan geometry from the `path` and `stage` groups.
    pub fn geometry(&self) -> ScanResult<ScanGeometry> {
        let mut presence = Presence {
            missing: Vec::new(),
        };
        let travel_x = presence.require(self.stage.travel_x, "stage.travel_x");
        let travel_y = presence.require(self.stage.travel_y, "stage.travel_y");
        self.check_path(&mut presence);
        presence.finish()?;

        let path = &self.path;
        Ok(ScanGeometry {
            pass_height: path.pass_height.unwrap_or_default(),
            offset: Point3::new(
                path.offset_x.unwrap_or_default(),
                path.offset_y.unwrap_or_default(),
                path.offset_z.unwrap_or(0.0),
            ),
            area: ScanArea::new(
                path.sample_x.unwrap_or_default(),
                path.sample_y.unwrap_or_default(),
                path.sample_width.unwrap_or_default(),
                path.sample_length.unwrap_or_default(),
            ),
            measurement_radius: path.measurement_radius.unwrap_or_default(),
            travel_limits: (travel_x, travel_y),
        })
    }

    fn check_path(&self, presence: &mut Presence) {
        let path = &self.path;
        presence.require(path.pass_height, "path.pass_height");
        presence.require(path.sample_x, "path.sample_x");
        presence.require(path.sample_y, "path.sample_y");
        presence.require(path.sample_width, "path.sample_width");
        presence.require(path.sample_length, "path.sample_length");
        presence.require(path.offset_x, "path.offset_x");
        presence.require(path.offset_y, "path.offset_y");
        presence.require(path.measurement_radius, "path.measurement_radius");
    }
}
