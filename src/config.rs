//! Console configuration using Figment
//!
//! Configuration is loaded from:
//! 1. A TOML file (default `config/console.toml`)
//! 2. Environment variables prefixed with `SPIM_LIVE_`, nested keys separated by `__`
//!    (e.g. `SPIM_LIVE_LIVE__WAVELENGTH=561`)
//!
//! Every section has defaults, so an empty file is a valid configuration.
//!
//! # Example
//! ```no_run
//! use spim_live::config::ConsoleConfig;
//!
//! let config = ConsoleConfig::load_from("config/console.toml")?;
//! config.validate()?;
//! println!("Live wavelength: {}", config.live.wavelength);
//! # Ok::<(), spim_live::error::ConsoleError>(())
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppResult, ConsoleError};
use crate::hardware::DeviceKind;
use crate::property::PropertyValue;

/// Top-level console configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Live streaming and polling settings
    pub live: LiveConfig,
    /// Waveform task names per signal-generation board
    pub daqs: IndexMap<String, DaqTasks>,
    /// Custom widget bindings per device name
    pub device_widgets: IndexMap<String, WidgetSpec>,
    /// Acquisition model settings
    pub acquisition: AcquisitionConfig,
    /// Devices created by the headless binary when no hardware is attached
    pub simulated: SimulatedConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "spim-live".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Live session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Wavelength used for live waveforms and display entry keys
    pub wavelength: String,
    /// Stage position poll interval in milliseconds
    pub poll_interval_ms: u64,
    /// How long live/snapshot controls stay disabled after activation, in milliseconds
    pub control_cooldown_ms: u64,
    /// Capacity of the event channel to the presentation sink
    pub event_capacity: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            wavelength: "488".to_string(),
            poll_interval_ms: 100,
            control_cooldown_ms: 1000,
            event_capacity: 16,
        }
    }
}

impl LiveConfig {
    /// Poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Control cooldown as a duration.
    pub fn control_cooldown(&self) -> Duration {
        Duration::from_millis(self.control_cooldown_ms)
    }
}

/// Waveform task names of one signal-generation board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaqTasks {
    /// Analog output task
    pub ao_task: String,
    /// Digital output task
    pub do_task: String,
}

impl Default for DaqTasks {
    fn default() -> Self {
        Self {
            ao_task: "ao_task".to_string(),
            do_task: "do_task".to_string(),
        }
    }
}

/// Custom widget binding for one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetSpec {
    /// Device kind this binding applies to (e.g. "camera")
    #[serde(rename = "type")]
    pub kind: String,
    /// Widget driver package
    pub driver: String,
    /// Widget class within the driver
    pub module: String,
    /// Extra widget arguments
    #[serde(default)]
    pub init: toml::Table,
}

/// How a device's form is built.
#[derive(Debug, Clone, PartialEq)]
pub enum WidgetBinding {
    /// Generic form generated from the device's property schema
    Generic,
    /// Custom widget supplied by a driver package
    Custom {
        /// Widget driver package
        driver: String,
        /// Widget class within the driver
        module: String,
        /// Extra widget arguments
        init: toml::Table,
    },
}

/// Acquisition model settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Editable acquisition metadata
    pub metadata: IndexMap<String, PropertyValue>,
    /// Image writers by name
    pub writers: IndexMap<String, WriterConfig>,
    /// Transfers to external storage by name
    pub transfers: IndexMap<String, TransferConfig>,
}

/// Image writer of one camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Camera whose frames the writer stores
    pub camera: String,
    /// Directory images are written to
    pub path: PathBuf,
    /// Compression: none, lz4 or zstd
    #[serde(default = "default_compression")]
    pub compression: String,
}

fn default_compression() -> String {
    "none".to_string()
}

/// Copy of finished acquisitions to external storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Destination directory
    pub external_path: PathBuf,
    /// Verify checksums after copying
    #[serde(default)]
    pub verify_checksums: bool,
}

/// Simulated instrument used by the headless binary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedConfig {
    /// Camera names
    pub cameras: Vec<String>,
    /// Camera sensor size in pixels (width, height)
    pub camera_resolution: (u32, u32),
    /// Single-axis scanning stage names
    pub scanning_stages: Vec<String>,
    /// Multi-axis (x/y) tiling stage names
    pub tiling_stages: Vec<String>,
    /// Signal-generation board names
    pub daqs: Vec<String>,
    /// Laser name to wavelength in nm
    pub lasers: IndexMap<String, i64>,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            cameras: vec!["cam0".to_string()],
            camera_resolution: (512, 512),
            scanning_stages: vec!["scan_z".to_string()],
            tiling_stages: vec!["tile_xy".to_string()],
            daqs: vec!["daq0".to_string()],
            lasers: IndexMap::from([("laser_488".to_string(), 488)]),
        }
    }
}

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl ConsoleConfig {
    /// Load configuration from `config/console.toml` and environment variables
    pub fn load() -> AppResult<Self> {
        Self::load_from("config/console.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SPIM_LIVE_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string (no environment overrides)
    pub fn from_toml_str(toml: &str) -> AppResult<Self> {
        Ok(Figment::new().merge(Toml::string(toml)).extract()?)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        if !VALID_LOG_LEVELS.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(ConsoleError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        if self.live.wavelength.trim().is_empty() {
            return Err(ConsoleError::Configuration(
                "live.wavelength must not be empty".to_string(),
            ));
        }
        if self.live.poll_interval_ms == 0 {
            return Err(ConsoleError::Configuration(
                "live.poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.live.event_capacity == 0 {
            return Err(ConsoleError::Configuration(
                "live.event_capacity must be greater than 0".to_string(),
            ));
        }

        for (name, tasks) in &self.daqs {
            if tasks.ao_task.is_empty() || tasks.do_task.is_empty() {
                return Err(ConsoleError::Configuration(format!(
                    "DAQ '{name}' must name both ao_task and do_task"
                )));
            }
        }

        for (name, spec) in &self.device_widgets {
            if !DeviceKind::ALL.iter().any(|k| k.as_str() == spec.kind) {
                return Err(ConsoleError::Configuration(format!(
                    "Widget for '{name}' has unknown device type '{}'",
                    spec.kind
                )));
            }
            if spec.driver.is_empty() || spec.module.is_empty() {
                return Err(ConsoleError::Configuration(format!(
                    "Widget for '{name}' must name a driver and a module"
                )));
            }
        }

        Ok(())
    }

    /// Waveform tasks of `daq`, falling back to the default task names.
    pub fn daq_tasks(&self, daq: &str) -> DaqTasks {
        self.daqs.get(daq).cloned().unwrap_or_default()
    }

    /// Widget binding for `device` of kind `kind`.
    ///
    /// A configured binding only applies when its `type` matches the device kind; anything
    /// else gets the generic form.
    pub fn widget_binding(&self, device: &str, kind: DeviceKind) -> WidgetBinding {
        match self.device_widgets.get(device) {
            Some(spec) if spec.kind == kind.as_str() => WidgetBinding::Custom {
                driver: spec.driver.clone(),
                module: spec.module.clone(),
                init: spec.init.clone(),
            },
            _ => WidgetBinding::Generic,
        }
    }
}
