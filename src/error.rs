//! # Plant Simulator Errors
//!
//! A single error taxonomy for the register codec, topology loading and the
//! simulation engine.
//!
//! | Class | Variants | Severity |
//! |-------|----------|----------|
//! | Encoding range | `EncodingRange`, `InvalidBitRange` | rejected, register untouched |
//! | Store access | `AddressOutOfRange` | reported to the caller |
//! | Per-tick fault | `MissingVector`, `MissingTag`, `Simulation` | isolated per device |
//! | Configuration | `Configuration`, `UnknownDeviceType`, `AddressOverlap`, `LayoutOverflow`, `Json`, `Io` | fatal at startup |

use std::io;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type PlantResult<T> = Result<T, PlantError>;

#[derive(Error, Debug)]
pub enum PlantError {
    /// A bit-field write wider than its target slot.
    #[error("Value {value:#b} does not fit in bits {start}..={end}")]
    EncodingRange { start: u8, end: u8, value: u16 },

    /// Bit positions outside 0..=15 or reversed.
    #[error("Invalid bit range {start}..={end}")]
    InvalidBitRange { start: u8, end: u8 },

    #[error("Register access {address}+{count} outside bank of {size} registers")]
    AddressOutOfRange {
        address: u32,
        count: usize,
        size: usize,
    },

    #[error("Unknown device type: {type_name}")]
    UnknownDeviceType { type_name: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Two devices reserve overlapping register ranges.
    #[error("Address range of {first} ({first_start}..{first_end}) overlaps {second} (starting at {second_start})")]
    AddressOverlap {
        first: String,
        first_start: u32,
        first_end: u32,
        second: String,
        second_start: u32,
    },

    /// A device layout needs more registers than its type reserves.
    #[error("Device {device} needs {needed} registers but its type reserves {reserved}")]
    LayoutOverflow {
        device: String,
        needed: u32,
        reserved: u32,
    },

    #[error("Device not found: {place}/{alias}")]
    DeviceNotFound { place: String, alias: String },

    #[error("Device {device} has no {vector} vector")]
    MissingVector {
        device: String,
        vector: &'static str,
    },

    #[error("Device {device} has no {group} tag at index {index}")]
    MissingTag {
        device: String,
        group: &'static str,
        index: usize,
    },

    #[error("Simulation is not available for device {device}")]
    SimulationUnsupported { device: String },

    #[error("Simulation error on {device}: {message}")]
    Simulation { device: String, message: String },

    /// Link pass invoked on a plant without devices.
    #[error("Devices are not created")]
    EmptyPlant,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PlantError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a simulation error for a device
    pub fn simulation<D: Into<String>, S: Into<String>>(device: D, message: S) -> Self {
        Self::Simulation {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Create a device lookup error
    pub fn device_not_found<P: Into<String>, A: Into<String>>(place: P, alias: A) -> Self {
        Self::DeviceNotFound {
            place: place.into(),
            alias: alias.into(),
        }
    }

    /// Errors that must stop the process before serving starts.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. }
                | Self::UnknownDeviceType { .. }
                | Self::AddressOverlap { .. }
                | Self::LayoutOverflow { .. }
                | Self::Io(_)
                | Self::Json(_)
        )
    }

    /// Errors produced by a bit-field write that was rejected.
    pub fn is_encoding_error(&self) -> bool {
        matches!(
            self,
            Self::EncodingRange { .. } | Self::InvalidBitRange { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PlantError::EncodingRange {
            start: 0,
            end: 1,
            value: 0b101,
        };
        assert_eq!(err.to_string(), "Value 0b101 does not fit in bits 0..=1");

        let err = PlantError::device_not_found("WTP", "WTP_Pump1");
        assert_eq!(err.to_string(), "Device not found: WTP/WTP_Pump1");
    }

    #[test]
    fn test_classification() {
        assert!(PlantError::configuration("bad").is_fatal());
        assert!(PlantError::UnknownDeviceType {
            type_name: "Turbine".into()
        }
        .is_fatal());
        assert!(!PlantError::EmptyPlant.is_fatal());

        let err = PlantError::InvalidBitRange { start: 3, end: 1 };
        assert!(err.is_encoding_error());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: PlantError = json_err.into();
        assert!(matches!(err, PlantError::Json(_)));
        assert!(err.is_fatal());
    }
}
