//! # Tag Codec Layer
//!
//! Typed views over one or two holding registers. A tag carries an address and
//! a codec, never a copy of the data: every read goes to the [`RegisterStore`],
//! so writes by another tag or by a Modbus client are visible immediately.
//!
//! | Tag | Registers | Encoding |
//! |-----|-----------|----------|
//! | [`BitVector`] | 1 | 16 independent bits, no sign |
//! | [`ScaledInt`] | 1 | `round(value × 10^dp)` |
//! | [`SignedScaledInt`] | 1 | same, two's complement, masked to 16 bits |
//! | [`LongTag`] | 2 | u32, word order per [`WordOrder`] |
//! | [`FloatTag`] | 2 | IEEE-754 single, word order per [`WordOrder`] |
//!
//! Rounding is half away from zero (`f64::round`).

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::bytes::{f32_to_regs, regs_to_f32, regs_to_u32, u32_to_regs, WordOrder};
use crate::error::{PlantError, PlantResult};
use crate::store::RegisterStore;
use crate::value::TagValue;

/// Highest bit position of a register.
const MAX_BIT: u8 = 15;

#[inline]
fn bit_length(value: u16) -> u8 {
    (u16::BITS - value.leading_zeros()) as u8
}

#[inline]
fn field_mask(start: u8, len: u8) -> u16 {
    if len == 0 {
        return 0;
    }
    let ones = if len >= 16 { u16::MAX } else { (1u16 << len) - 1 };
    ones << start
}

#[inline]
fn scale(decimals: u8) -> f64 {
    10f64.powi(i32::from(decimals))
}

// ============================================================================
// Bit Vector
// ============================================================================

/// Status or control word. Bit 0 is the least significant bit.
///
/// # Example
///
/// ```rust
/// use modbus_plant_sim::{BitVector, RegisterStore};
///
/// let store = RegisterStore::new(8);
/// let status = BitVector::new(4);
/// status.set_range(&store, 2, 3, 0b10).unwrap();
/// assert_eq!(status.value(&store), 8);
/// assert!(status.set_range(&store, 0, 1, 0b101).is_err());
/// assert_eq!(status.value(&store), 8);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitVector {
    address: u16,
}

impl BitVector {
    pub fn new(address: u16) -> Self {
        Self { address }
    }

    #[inline]
    pub fn address(&self) -> u16 {
        self.address
    }

    /// Reposition the vector. Data at the old address is left alone.
    #[inline]
    pub fn set_address(&mut self, address: u16) {
        self.address = address;
    }

    #[inline]
    pub fn value(&self, store: &RegisterStore) -> u16 {
        store.read(self.address)
    }

    #[inline]
    pub fn set_value(&self, store: &RegisterStore, value: u16) {
        store.write(self.address, &[value]);
    }

    /// Single bit. Positions above 15 read as clear.
    #[inline]
    pub fn bit(&self, store: &RegisterStore, position: u8) -> bool {
        position <= MAX_BIT && (self.value(store) >> position) & 1 == 1
    }

    pub fn set_bit(&self, store: &RegisterStore, position: u8, on: bool) -> PlantResult<()> {
        if position > MAX_BIT {
            return Err(PlantError::InvalidBitRange {
                start: position,
                end: position,
            });
        }
        let mask = 1u16 << position;
        self.modify(store, |v| if on { v | mask } else { v & !mask });
        Ok(())
    }

    /// Inclusive bit range `start..=end`, shifted down to bit 0.
    pub fn range(&self, store: &RegisterStore, start: u8, end: u8) -> PlantResult<u16> {
        let len = Self::check_range(start, end)?;
        Ok((self.value(store) & field_mask(start, len)) >> start)
    }

    /// Write `value` into the inclusive range `start..=end`.
    ///
    /// A value with more significant bits than the range holds is rejected and
    /// the register keeps its previous content.
    pub fn set_range(&self, store: &RegisterStore, start: u8, end: u8, value: u16) -> PlantResult<()> {
        let len = Self::check_range(start, end)?;
        if bit_length(value) > len {
            let err = PlantError::EncodingRange { start, end, value };
            warn!("Bit-vector {} write rejected: {}", self.address, err);
            return Err(err);
        }
        let mask = field_mask(start, len);
        self.modify(store, |v| (v & !mask) | (value << start));
        Ok(())
    }

    /// Write `value` at `start` using the value's own bit length as the field
    /// width. A zero value has no width and leaves the register unchanged.
    pub fn force_range(&self, store: &RegisterStore, start: u8, value: u16) -> PlantResult<()> {
        let len = bit_length(value);
        if start > MAX_BIT || start + len > MAX_BIT + 1 {
            return Err(PlantError::InvalidBitRange {
                start,
                end: start + len.saturating_sub(1),
            });
        }
        let mask = field_mask(start, len);
        self.modify(store, |v| (v & !mask) | (value << start));
        Ok(())
    }

    /// Clear the `clear` bits and set the `set` bits in one store update, so
    /// no reader sees the intermediate value.
    pub fn replace_bits(&self, store: &RegisterStore, clear: u16, set: u16) {
        self.modify(store, |v| (v & !clear) | set);
    }

    #[inline]
    fn check_range(start: u8, end: u8) -> PlantResult<u8> {
        if start > end || end > MAX_BIT {
            return Err(PlantError::InvalidBitRange { start, end });
        }
        Ok(end - start + 1)
    }

    #[inline]
    fn modify(&self, store: &RegisterStore, f: impl FnOnce(u16) -> u16) {
        if let Err(e) = store.update(self.address, f) {
            warn!("Bit-vector write dropped: {}", e);
        }
    }
}

// ============================================================================
// Scaled integers
// ============================================================================

/// Unsigned scaled integer: `stored = round(value × 10^dp)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaledInt {
    address: u16,
    decimals: u8,
}

impl ScaledInt {
    pub fn new(address: u16, decimals: u8) -> Self {
        Self { address, decimals }
    }

    #[inline]
    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    #[inline]
    pub fn value(&self, store: &RegisterStore) -> f64 {
        f64::from(store.read(self.address)) / scale(self.decimals)
    }

    /// Values outside the register range saturate at 0 and 65535.
    #[inline]
    pub fn set_value(&self, store: &RegisterStore, value: f64) {
        let raw = (value * scale(self.decimals)).round().clamp(0.0, f64::from(u16::MAX));
        store.write(self.address, &[raw as u16]);
    }

    /// Change the decimal point count, re-quantising the held logical value.
    pub fn set_decimals(&mut self, store: &RegisterStore, decimals: u8) {
        let value = self.value(store);
        self.decimals = decimals;
        self.set_value(store, value);
    }
}

/// Signed scaled integer in 16-bit two's complement.
///
/// # Example
///
/// ```rust
/// use modbus_plant_sim::{RegisterStore, SignedScaledInt};
///
/// let store = RegisterStore::new(1);
/// let tag = SignedScaledInt::new(0, 1);
/// tag.set_value(&store, -12.3);
/// assert_eq!(store.read(0), 0xFF85);
/// assert_eq!(tag.value(&store), -12.3);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedScaledInt {
    address: u16,
    decimals: u8,
}

impl SignedScaledInt {
    pub fn new(address: u16, decimals: u8) -> Self {
        Self { address, decimals }
    }

    #[inline]
    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    #[inline]
    pub fn value(&self, store: &RegisterStore) -> f64 {
        let raw = store.read(self.address);
        let signed = if raw > 0x7FFF {
            -(i32::from(0xFFFF - raw) + 1)
        } else {
            i32::from(raw)
        };
        f64::from(signed) / scale(self.decimals)
    }

    /// Stores the low 16 bits of the rounded scaled value.
    #[inline]
    pub fn set_value(&self, store: &RegisterStore, value: f64) {
        let raw = (value * scale(self.decimals)).round() as i64 & 0xFFFF;
        store.write(self.address, &[raw as u16]);
    }

    pub fn set_decimals(&mut self, store: &RegisterStore, decimals: u8) {
        let value = self.value(store);
        self.decimals = decimals;
        self.set_value(store, value);
    }
}

// ============================================================================
// Two-register tags
// ============================================================================

/// 32-bit unsigned long over registers `address` and `address + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LongTag {
    address: u16,
    order: WordOrder,
}

impl LongTag {
    pub fn new(address: u16, order: WordOrder) -> Self {
        Self { address, order }
    }

    #[inline]
    pub fn order(&self) -> WordOrder {
        self.order
    }

    #[inline]
    pub fn value(&self, store: &RegisterStore) -> u32 {
        regs_to_u32(&store.read_pair(self.address), self.order)
    }

    #[inline]
    pub fn set_value(&self, store: &RegisterStore, value: u32) {
        store.write(self.address, &u32_to_regs(value, self.order));
    }

    /// Switch word order, re-splitting the current value.
    pub fn set_order(&mut self, store: &RegisterStore, order: WordOrder) {
        let value = self.value(store);
        self.order = order;
        self.set_value(store, value);
    }
}

/// IEEE-754 single precision over registers `address` and `address + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloatTag {
    address: u16,
    order: WordOrder,
}

impl FloatTag {
    pub fn new(address: u16, order: WordOrder) -> Self {
        Self { address, order }
    }

    #[inline]
    pub fn order(&self) -> WordOrder {
        self.order
    }

    #[inline]
    pub fn value(&self, store: &RegisterStore) -> f32 {
        regs_to_f32(&store.read_pair(self.address), self.order)
    }

    #[inline]
    pub fn set_value(&self, store: &RegisterStore, value: f32) {
        store.write(self.address, &f32_to_regs(value, self.order));
    }

    pub fn set_order(&mut self, store: &RegisterStore, order: WordOrder) {
        let value = self.value(store);
        self.order = order;
        self.set_value(store, value);
    }
}

// ============================================================================
// Tag kinds and the unified tag
// ============================================================================

/// Encoding kind as named in device templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TagKind {
    #[serde(rename = "int")]
    Int,
    #[serde(rename = "Sint")]
    SignedInt,
    #[serde(rename = "long")]
    Long,
    #[serde(rename = "float")]
    Float,
    #[serde(rename = "longInv")]
    LongInverse,
    #[serde(rename = "floatInv")]
    FloatInverse,
}

impl TagKind {
    /// Registers consumed in a device layout.
    #[inline]
    pub fn register_count(&self) -> u16 {
        match self {
            TagKind::Int | TagKind::SignedInt => 1,
            _ => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TagKind::Int => "int",
            TagKind::SignedInt => "Sint",
            TagKind::Long => "long",
            TagKind::Float => "float",
            TagKind::LongInverse => "longInv",
            TagKind::FloatInverse => "floatInv",
        }
    }
}

impl fmt::Display for TagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Analog or setting tag of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Int(ScaledInt),
    SignedInt(SignedScaledInt),
    Long(LongTag),
    Float(FloatTag),
}

impl Tag {
    /// Build the tag for a template entry placed at `address`.
    pub fn from_kind(kind: TagKind, decimals: u8, address: u16) -> Self {
        match kind {
            TagKind::Int => Tag::Int(ScaledInt::new(address, decimals)),
            TagKind::SignedInt => Tag::SignedInt(SignedScaledInt::new(address, decimals)),
            TagKind::Long => Tag::Long(LongTag::new(address, WordOrder::LowWordFirst)),
            TagKind::LongInverse => Tag::Long(LongTag::new(address, WordOrder::HighWordFirst)),
            TagKind::Float => Tag::Float(FloatTag::new(address, WordOrder::LowWordFirst)),
            TagKind::FloatInverse => Tag::Float(FloatTag::new(address, WordOrder::HighWordFirst)),
        }
    }

    #[inline]
    pub fn address(&self) -> u16 {
        match self {
            Tag::Int(t) => t.address,
            Tag::SignedInt(t) => t.address,
            Tag::Long(t) => t.address,
            Tag::Float(t) => t.address,
        }
    }

    /// Reposition the tag (both registers for two-register tags).
    pub fn set_address(&mut self, address: u16) {
        match self {
            Tag::Int(t) => t.address = address,
            Tag::SignedInt(t) => t.address = address,
            Tag::Long(t) => t.address = address,
            Tag::Float(t) => t.address = address,
        }
    }

    #[inline]
    pub fn register_count(&self) -> u16 {
        match self {
            Tag::Int(_) | Tag::SignedInt(_) => 1,
            Tag::Long(_) | Tag::Float(_) => 2,
        }
    }

    /// Logical value as f64.
    #[inline]
    pub fn get(&self, store: &RegisterStore) -> f64 {
        match self {
            Tag::Int(t) => t.value(store),
            Tag::SignedInt(t) => t.value(store),
            Tag::Long(t) => f64::from(t.value(store)),
            Tag::Float(t) => f64::from(t.value(store)),
        }
    }

    /// Write a logical value. Longs round and saturate to the u32 range,
    /// floats narrow to single precision.
    #[inline]
    pub fn set(&self, store: &RegisterStore, value: f64) {
        match self {
            Tag::Int(t) => t.set_value(store, value),
            Tag::SignedInt(t) => t.set_value(store, value),
            Tag::Long(t) => {
                let raw = value.round().clamp(0.0, f64::from(u32::MAX));
                t.set_value(store, raw as u32)
            }
            Tag::Float(t) => t.set_value(store, value as f32),
        }
    }

    /// Typed value.
    pub fn read(&self, store: &RegisterStore) -> TagValue {
        match self {
            Tag::Int(t) => TagValue::Int(t.value(store)),
            Tag::SignedInt(t) => TagValue::SignedInt(t.value(store)),
            Tag::Long(t) => TagValue::Long(t.value(store)),
            Tag::Float(t) => TagValue::Float(t.value(store)),
        }
    }

    /// Raw register contents, for exact baseline capture.
    pub fn raw(&self, store: &RegisterStore) -> Vec<u16> {
        match self.register_count() {
            1 => vec![store.read(self.address())],
            _ => store.read_pair(self.address()).to_vec(),
        }
    }

    /// Write back contents captured by [`Tag::raw`].
    pub fn restore_raw(&self, store: &RegisterStore, raw: &[u16]) {
        store.write(self.address(), raw);
    }

    /// Zero the tag's registers.
    pub fn clear(&self, store: &RegisterStore) {
        match self.register_count() {
            1 => store.write(self.address(), &[0]),
            _ => store.write(self.address(), &[0, 0]),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
