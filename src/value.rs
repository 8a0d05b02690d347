//! # Tag Value Types
//!
//! Decoded value of a plant tag, as seen by the display front end and the
//! runtime write surface.

use std::fmt;

use serde::Serialize;

/// Decoded tag value.
///
/// # Register Mapping
///
/// | Variant | Registers | Source tag |
/// |---------|-----------|------------|
/// | Bits | 1 | status/control bit-vector |
/// | Int | 1 | scaled integer (`int`) |
/// | SignedInt | 1 | signed scaled integer (`Sint`) |
/// | Long | 2 | 32-bit long (`long`, `longInv`) |
/// | Float | 2 | IEEE-754 float (`float`, `floatInv`) |
///
/// # Example
///
/// ```rust
/// use modbus_plant_sim::TagValue;
///
/// let level = TagValue::Int(12.5);
/// assert_eq!(level.register_count(), 1);
/// assert_eq!(level.as_f64(), 12.5);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TagValue {
    /// Raw 16-bit vector
    Bits(u16),
    /// Unsigned scaled integer, already divided by 10^dp
    Int(f64),
    /// Signed scaled integer, already divided by 10^dp
    SignedInt(f64),
    /// 32-bit unsigned long
    Long(u32),
    /// Single precision float
    Float(f32),
}

impl TagValue {
    /// Convert the value to f64 for uniform numeric handling.
    #[inline]
    pub fn as_f64(&self) -> f64 {
        match self {
            TagValue::Bits(v) => f64::from(*v),
            TagValue::Int(v) | TagValue::SignedInt(v) => *v,
            TagValue::Long(v) => f64::from(*v),
            TagValue::Float(v) => f64::from(*v),
        }
    }

    /// Number of holding registers behind this value.
    #[inline]
    pub fn register_count(&self) -> usize {
        match self {
            TagValue::Bits(_) | TagValue::Int(_) | TagValue::SignedInt(_) => 1,
            TagValue::Long(_) | TagValue::Float(_) => 2,
        }
    }

    /// Check if the value is zero.
    #[inline]
    pub fn is_zero(&self) -> bool {
        match self {
            TagValue::Bits(v) => *v == 0,
            TagValue::Int(v) | TagValue::SignedInt(v) => *v == 0.0,
            TagValue::Long(v) => *v == 0,
            TagValue::Float(v) => *v == 0.0,
        }
    }

    /// Returns the type name as used in device templates.
    pub fn type_name(&self) -> &'static str {
        match self {
            TagValue::Bits(_) => "bits",
            TagValue::Int(_) => "int",
            TagValue::SignedInt(_) => "Sint",
            TagValue::Long(_) => "long",
            TagValue::Float(_) => "float",
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Bits(v) => write!(f, "{:016b}", v),
            TagValue::Int(v) | TagValue::SignedInt(v) => write!(f, "{}", v),
            TagValue::Long(v) => write!(f, "{}", v),
            TagValue::Float(v) => write!(f, "{}", v),
        }
    }
}

impl Default for TagValue {
    fn default() -> Self {
        TagValue::Bits(0)
    }
}

impl From<u16> for TagValue {
    fn from(v: u16) -> Self {
        TagValue::Bits(v)
    }
}

impl From<u32> for TagValue {
    fn from(v: u32) -> Self {
        TagValue::Long(v)
    }
}

impl From<f32> for TagValue {
    fn from(v: f32) -> Self {
        TagValue::Float(v)
    }
}
