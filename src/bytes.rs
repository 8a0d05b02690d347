//! # Word Order Handling for Two-Register Tags
//!
//! Long and float tags span two consecutive holding registers. Bytes inside a
//! register are always big-endian (Modbus wire order); only the order of the
//! two 16-bit words varies.
//!
//! ## Naming Convention
//!
//! Uses ABCD notation where A is the most significant byte. For the 32-bit
//! value `0x12345678`:
//!
//! | Order | Register N | Register N+1 | Tag flag |
//! |-------|------------|--------------|----------|
//! | `LowWordFirst` (CDAB) | `0x5678` | `0x1234` | normal |
//! | `HighWordFirst` (ABCD) | `0x1234` | `0x5678` | inverse |

use std::fmt;

/// Order of the two 16-bit words of a 32-bit tag.
///
/// # Example
///
/// ```rust
/// use modbus_plant_sim::WordOrder;
///
/// let order = WordOrder::from_str("CDAB").unwrap();
/// assert_eq!(order, WordOrder::LowWordFirst);
/// assert!(!order.is_inverse());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WordOrder {
    /// Register N holds the low word: CDAB.
    ///
    /// The normal (non-inverse) layout of plant tags.
    #[default]
    LowWordFirst,

    /// Register N holds the high word: ABCD.
    ///
    /// Selected by the `inverse` flag (`longInv` / `floatInv` tag types).
    HighWordFirst,
}

impl WordOrder {
    /// Convert from string formats.
    ///
    /// - "CDAB", "CD-AB", "normal", "low" → LowWordFirst
    /// - "ABCD", "AB-CD", "inverse", "inv", "high" → HighWordFirst
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .map(|c| c.to_ascii_uppercase())
            .collect();
        match normalized.as_str() {
            "CDAB" | "NORMAL" | "LOW" | "LOWWORDFIRST" => Some(Self::LowWordFirst),
            "ABCD" | "INVERSE" | "INV" | "HIGH" | "HIGHWORDFIRST" => Some(Self::HighWordFirst),
            _ => None,
        }
    }

    /// Map the tag `inverse` flag onto a word order.
    #[inline]
    pub fn from_inverse(inverse: bool) -> Self {
        if inverse {
            Self::HighWordFirst
        } else {
            Self::LowWordFirst
        }
    }

    /// Whether register N holds the high word.
    #[inline]
    pub fn is_inverse(&self) -> bool {
        matches!(self, Self::HighWordFirst)
    }

    /// Get descriptive name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LowWordFirst => "CDAB (low word first)",
            Self::HighWordFirst => "ABCD (high word first)",
        }
    }
}

impl fmt::Display for WordOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Register <-> Bytes
// ============================================================================

/// Convert 2 registers to the 4 big-endian bytes of the 32-bit value.
///
/// # Example
///
/// ```rust
/// use modbus_plant_sim::{regs_to_bytes_4, WordOrder};
///
/// let regs = [0x5678, 0x1234];
/// assert_eq!(regs_to_bytes_4(&regs, WordOrder::LowWordFirst), [0x12, 0x34, 0x56, 0x78]);
/// assert_eq!(regs_to_bytes_4(&regs, WordOrder::HighWordFirst), [0x56, 0x78, 0x12, 0x34]);
/// ```
#[inline]
pub fn regs_to_bytes_4(regs: &[u16; 2], order: WordOrder) -> [u8; 4] {
    let [h0, h1] = [regs[0].to_be_bytes(), regs[1].to_be_bytes()];

    match order {
        WordOrder::HighWordFirst => [h0[0], h0[1], h1[0], h1[1]], // ABCD
        WordOrder::LowWordFirst => [h1[0], h1[1], h0[0], h0[1]],  // CDAB
    }
}

/// Convert 4 big-endian bytes to 2 registers in the given word order.
#[inline]
pub fn bytes_4_to_regs(bytes: &[u8; 4], order: WordOrder) -> [u16; 2] {
    let high = u16::from_be_bytes([bytes[0], bytes[1]]);
    let low = u16::from_be_bytes([bytes[2], bytes[3]]);

    match order {
        WordOrder::HighWordFirst => [high, low],
        WordOrder::LowWordFirst => [low, high],
    }
}

// ============================================================================
// Register <-> Numeric
// ============================================================================

/// Convert 2 registers to u32.
#[inline]
pub fn regs_to_u32(regs: &[u16; 2], order: WordOrder) -> u32 {
    u32::from_be_bytes(regs_to_bytes_4(regs, order))
}

/// Convert u32 to 2 registers.
#[inline]
pub fn u32_to_regs(value: u32, order: WordOrder) -> [u16; 2] {
    bytes_4_to_regs(&value.to_be_bytes(), order)
}

/// Convert 2 registers to f32. Bit-exact, NaN payloads included.
#[inline]
pub fn regs_to_f32(regs: &[u16; 2], order: WordOrder) -> f32 {
    f32::from_bits(regs_to_u32(regs, order))
}

/// Convert f32 to 2 registers. Bit-exact, NaN payloads included.
#[inline]
pub fn f32_to_regs(value: f32, order: WordOrder) -> [u16; 2] {
    u32_to_regs(value.to_bits(), order)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_from_str_valid() {
        assert_eq!(WordOrder::from_str("CDAB"), Some(WordOrder::LowWordFirst));
        assert_eq!(WordOrder::from_str("cd-ab"), Some(WordOrder::LowWordFirst));
        assert_eq!(WordOrder::from_str("normal"), Some(WordOrder::LowWordFirst));
        assert_eq!(WordOrder::from_str("ABCD"), Some(WordOrder::HighWordFirst));
        assert_eq!(WordOrder::from_str("inverse"), Some(WordOrder::HighWordFirst));
    }

    #[test]
    fn test_from_str_invalid() {
        assert_eq!(WordOrder::from_str("DCBA"), None);
        assert_eq!(WordOrder::from_str(""), None);
    }

    #[test]
    fn test_inverse_flag() {
        assert_eq!(WordOrder::from_inverse(false), WordOrder::LowWordFirst);
        assert_eq!(WordOrder::from_inverse(true), WordOrder::HighWordFirst);
        assert!(WordOrder::HighWordFirst.is_inverse());
        assert_eq!(WordOrder::default(), WordOrder::LowWordFirst);
    }

    #[test]
    fn test_u32_word_placement() {
        assert_eq!(u32_to_regs(0x12345678, WordOrder::LowWordFirst), [0x5678, 0x1234]);
        assert_eq!(u32_to_regs(0x12345678, WordOrder::HighWordFirst), [0x1234, 0x5678]);
        assert_eq!(regs_to_u32(&[0x5678, 0x1234], WordOrder::LowWordFirst), 0x12345678);
    }

    #[test]
    fn test_regs_to_f32() {
        // 25.0 in IEEE 754: 0x41C80000
        let value = regs_to_f32(&[0x41C8, 0x0000], WordOrder::HighWordFirst);
        assert_eq!(value, 25.0);
        let value = regs_to_f32(&[0x0000, 0x41C8], WordOrder::LowWordFirst);
        assert_eq!(value, 25.0);
    }

    #[test]
    fn test_f32_special_values() {
        for bits in [0x0000_0000u32, 0x8000_0000, 0x0000_0001, 0x7FC0_0001, 0xFF80_0000] {
            for order in [WordOrder::LowWordFirst, WordOrder::HighWordFirst] {
                let regs = f32_to_regs(f32::from_bits(bits), order);
                assert_eq!(regs_to_f32(&regs, order).to_bits(), bits);
            }
        }
    }

    proptest! {
        #[test]
        fn prop_u32_roundtrip(value: u32, inverse: bool) {
            let order = WordOrder::from_inverse(inverse);
            prop_assert_eq!(regs_to_u32(&u32_to_regs(value, order), order), value);
        }

        #[test]
        fn prop_f32_roundtrip_bit_exact(bits: u32, inverse: bool) {
            let order = WordOrder::from_inverse(inverse);
            let regs = f32_to_regs(f32::from_bits(bits), order);
            prop_assert_eq!(regs_to_f32(&regs, order).to_bits(), bits);
        }

        #[test]
        fn prop_orders_swap_words(value: u32) {
            let low = u32_to_regs(value, WordOrder::LowWordFirst);
            let high = u32_to_regs(value, WordOrder::HighWordFirst);
            prop_assert_eq!(low, [high[1], high[0]]);
        }
    }
}
