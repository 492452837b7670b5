use crate::algorithms::trilateration::DEFAULT_DEGENERACY_EPSILON;
use crate::algorithms::{DistanceEstimator, Trilaterator};
use crate::core::DEFAULT_PATH_LOSS_EXPONENT;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Beacon firmware identifiers: advertised name, service and characteristics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Name every eligible beacon advertises
    pub broadcast_name: String,
    /// Service exposing the ranging characteristics
    pub service_uuid: Uuid,
    /// Reference RSSI at one meter (i32, little-endian)
    pub reference_rssi_uuid: Uuid,
    /// Beacon x coordinate in centimeters (i32, little-endian)
    pub x_location_uuid: Uuid,
    /// Beacon y coordinate in centimeters (i32, little-endian)
    pub y_location_uuid: Uuid,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            broadcast_name: "LocationBeacon".to_string(),
            service_uuid: Uuid::from_u128(0x9a4c_1000_51c2_4b0e_a7f3_6e1d_5c80_b3a1),
            reference_rssi_uuid: Uuid::from_u128(0x9a4c_1001_51c2_4b0e_a7f3_6e1d_5c80_b3a1),
            x_location_uuid: Uuid::from_u128(0x9a4c_1002_51c2_4b0e_a7f3_6e1d_5c80_b3a1),
            y_location_uuid: Uuid::from_u128(0x9a4c_1003_51c2_4b0e_a7f3_6e1d_5c80_b3a1),
        }
    }
}

/// Per-state bounds on how long a beacon session may wait for the transport
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub connect_ms: u32,
    pub discovery_ms: u32,
    pub read_ms: u32,
    pub disconnect_ms: u32,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 10_000,
            discovery_ms: 5_000,
            read_ms: 3_000,
            disconnect_ms: 2_000,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms as u64)
    }

    pub fn discovery(&self) -> Duration {
        Duration::from_millis(self.discovery_ms as u64)
    }

    pub fn read(&self) -> Duration {
        Duration::from_millis(self.read_ms as u64)
    }

    pub fn disconnect(&self) -> Duration {
        Duration::from_millis(self.disconnect_ms as u64)
    }
}

/// Ranging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangingConfig {
    pub protocol: ProtocolConfig,
    /// Log-distance path-loss exponent (2.0 in free space)
    pub path_loss_exponent: f64,
    pub timeouts: TimeoutConfig,
    /// Denominators smaller than this make a trilateration degenerate
    pub degeneracy_epsilon: f64,
}

impl Default for RangingConfig {
    fn default() -> Self {
        Self {
            protocol: ProtocolConfig::default(),
            path_loss_exponent: DEFAULT_PATH_LOSS_EXPONENT,
            timeouts: TimeoutConfig::default(),
            degeneracy_epsilon: DEFAULT_DEGENERACY_EPSILON,
        }
    }
}

impl RangingConfig {
    /// Load and validate a JSON configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::IoError {
            message: format!("Failed to read config file '{}': {}", path_str, e),
        })?;

        let config: RangingConfig =
            serde_json::from_str(&content).map_err(|e| ConfigError::SerializationError {
                message: format!("Failed to parse config file '{}': {}", path_str, e),
            })?;

        config.validate()?.into_result()?;
        Ok(config)
    }

    /// Write this configuration as pretty-printed JSON
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let content = serde_json::to_string_pretty(self).map_err(|e| ConfigError::SerializationError {
            message: format!("Failed to serialize config: {}", e),
        })?;

        fs::write(&path, content).map_err(|e| ConfigError::IoError {
            message: format!("Failed to write config file '{}': {}", path_str, e),
        })
    }

    pub fn validate(&self) -> Result<ValidationResult, ConfigError> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if self.protocol.broadcast_name.trim().is_empty() {
            errors.push(ConfigError::InvalidParameter {
                parameter: "protocol.broadcast_name".to_string(),
                value: format!("{:?}", self.protocol.broadcast_name),
                reason: "Broadcast name must not be empty".to_string(),
            });
        }

        let uuids = [
            ("protocol.service_uuid", self.protocol.service_uuid),
            ("protocol.reference_rssi_uuid", self.protocol.reference_rssi_uuid),
            ("protocol.x_location_uuid", self.protocol.x_location_uuid),
            ("protocol.y_location_uuid", self.protocol.y_location_uuid),
        ];
        for (parameter, uuid) in uuids {
            if uuid.is_nil() {
                errors.push(ConfigError::InvalidParameter {
                    parameter: parameter.to_string(),
                    value: uuid.to_string(),
                    reason: "UUID must not be nil".to_string(),
                });
            }
        }
        let characteristics = [
            self.protocol.reference_rssi_uuid,
            self.protocol.x_location_uuid,
            self.protocol.y_location_uuid,
        ];
        if characteristics[0] == characteristics[1]
            || characteristics[0] == characteristics[2]
            || characteristics[1] == characteristics[2]
        {
            errors.push(ConfigError::InvalidParameter {
                parameter: "protocol".to_string(),
                value: "duplicate characteristic UUID".to_string(),
                reason: "Reference RSSI, x and y characteristics must be distinct".to_string(),
            });
        }

        if !self.path_loss_exponent.is_finite() || self.path_loss_exponent <= 0.0 {
            errors.push(ConfigError::InvalidParameter {
                parameter: "path_loss_exponent".to_string(),
                value: self.path_loss_exponent.to_string(),
                reason: "Path-loss exponent must be a positive number".to_string(),
            });
        } else if !(1.6..=6.0).contains(&self.path_loss_exponent) {
            warnings.push(format!(
                "Path-loss exponent {} is outside the usual 1.6-6.0 range",
                self.path_loss_exponent
            ));
        }

        let timeouts = [
            ("timeouts.connect_ms", self.timeouts.connect_ms),
            ("timeouts.discovery_ms", self.timeouts.discovery_ms),
            ("timeouts.read_ms", self.timeouts.read_ms),
            ("timeouts.disconnect_ms", self.timeouts.disconnect_ms),
        ];
        for (parameter, value) in timeouts {
            if value == 0 {
                errors.push(ConfigError::InvalidParameter {
                    parameter: parameter.to_string(),
                    value: value.to_string(),
                    reason: "Timeout must be positive".to_string(),
                });
            } else if value > 60_000 {
                warnings.push(format!("{} of {} ms may stall a ranging run", parameter, value));
            }
        }

        if !self.degeneracy_epsilon.is_finite() || self.degeneracy_epsilon <= 0.0 {
            errors.push(ConfigError::InvalidParameter {
                parameter: "degeneracy_epsilon".to_string(),
                value: self.degeneracy_epsilon.to_string(),
                reason: "Degeneracy threshold must be a positive number".to_string(),
            });
        }

        Ok(ValidationResult {
            is_valid: errors.is_empty(),
            errors,
            warnings,
        })
    }

    pub fn distance_estimator(&self) -> DistanceEstimator {
        DistanceEstimator::new(self.path_loss_exponent)
    }

    pub fn trilaterator(&self) -> Trilaterator {
        Trilaterator::new(self.degeneracy_epsilon)
    }
}

/// Configuration validation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid {parameter} = {value}: {reason}")]
    InvalidParameter { parameter: String, value: String, reason: String },
    #[error("{message}")]
    IoError { message: String },
    #[error("{message}")]
    SerializationError { message: String },
}

/// Configuration validation result
#[derive(Debug)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ConfigError>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// First error, if any
    pub fn into_result(self) -> Result<(), ConfigError> {
        match self.errors.into_iter().next() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Holds the active configuration and where it came from
pub struct ConfigurationManager {
    config: RangingConfig,
    config_file_path: Option<String>,
    is_modified: bool,
}

impl ConfigurationManager {
    pub fn new() -> Self {
        Self {
            config: RangingConfig::default(),
            config_file_path: None,
            is_modified: false,
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = RangingConfig::from_file(&path)?;
        Ok(Self {
            config,
            config_file_path: Some(path.as_ref().to_string_lossy().to_string()),
            is_modified: false,
        })
    }

    pub fn get_config(&self) -> &RangingConfig {
        &self.config
    }

    /// Replace the configuration after validating it
    pub fn update_config(&mut self, config: RangingConfig) -> Result<(), ConfigError> {
        let validation = config.validate()?;
        for warning in &validation.warnings {
            log::warn!("{}", warning);
        }
        validation.into_result()?;

        self.config = config;
        self.is_modified = true;
        Ok(())
    }

    pub fn set_path_loss_exponent(&mut self, exponent: f64) -> Result<f64, ConfigError> {
        let mut config = self.config.clone();
        config.path_loss_exponent = exponent;
        self.update_config(config)?;
        Ok(exponent)
    }

    pub fn set_timeouts(&mut self, timeouts: TimeoutConfig) -> Result<(), ConfigError> {
        let mut config = self.config.clone();
        config.timeouts = timeouts;
        self.update_config(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), ConfigError> {
        self.config.save_to_file(&path)?;
        self.config_file_path = Some(path.as_ref().to_string_lossy().to_string());
        self.is_modified = false;
        Ok(())
    }

    /// Save to the file this configuration was loaded from
    pub fn save(&mut self) -> Result<(), ConfigError> {
        match self.config_file_path.clone() {
            Some(path) => self.save_to_file(path),
            None => Err(ConfigError::IoError {
                message: "No file path set for saving configuration".to_string(),
            }),
        }
    }

    pub fn is_modified(&self) -> bool {
        self.is_modified
    }
}

impl Default for ConfigurationManager {
    fn default() -> Self {
        Self::new()
    }
}
