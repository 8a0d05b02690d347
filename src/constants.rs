//! Modbus register limits and plant layout constants
//!
//! Register limits are derived from the Modbus specification:
//! - Maximum PDU size: 253 bytes (inherited from RS485 ADU limit of 256 bytes)
//! - Register limits are calculated to fit within the PDU size constraint
//!
//! Layout constants describe the fixed slots every device reserves at the start
//! of its register range.

use std::time::Duration;

// ============================================================================
// Frame Size Constants
// ============================================================================

/// Maximum PDU (Protocol Data Unit) size per Modbus specification
/// RS485 ADU (256 bytes) - Slave Address (1 byte) - CRC (2 bytes) = 253 bytes
pub const MAX_PDU_SIZE: usize = 253;

// ============================================================================
// Register Operation Limits
// ============================================================================

/// Maximum number of registers for FC03 (Read Holding Registers)
///
/// Response PDU: Function Code (1) + Byte Count (1) + N × 2 ≤ 253
/// Therefore: N ≤ (253 - 2) / 2 = 125.5 → 125 registers
pub const MAX_READ_REGISTERS: usize = 125;

/// Maximum number of registers for FC16 (Write Multiple Registers)
///
/// Request PDU: Function Code (1) + Address (2) + Quantity (2) + Byte Count (1) + N × 2 ≤ 253
/// Therefore: N ≤ (253 - 6) / 2 = 123.5 → 123 registers
pub const MAX_WRITE_REGISTERS: usize = 123;

/// Maximum number of write registers for FC23 (Read/Write Multiple Registers)
///
/// Request PDU: Function Code (1) + Read Address (2) + Read Quantity (2)
/// + Write Address (2) + Write Quantity (2) + Byte Count (1) + N × 2 ≤ 253
/// Therefore: N ≤ (253 - 10) / 2 = 121.5 → 121 registers
pub const MAX_READ_WRITE_REGISTERS: usize = 121;

// ============================================================================
// Register Bank
// ============================================================================

/// Default number of holding registers in the bank.
pub const DEFAULT_REGISTER_COUNT: usize = 50_000;

/// Display base for holding registers (4xxxxx notation).
pub const HOLDING_REGISTER_BASE: u32 = 400_000;

// ============================================================================
// Device Layout
// ============================================================================

/// Offset of the first status vector (`Status01`).
pub const STATUS0_OFFSET: u16 = 0;

/// Offset of the second status vector (`Status02`).
pub const STATUS1_OFFSET: u16 = 1;

/// Offset of the control vector (`Control01`).
pub const CONTROL_OFFSET: u16 = 2;

/// Offset of the first analog tag. The three vector slots are always
/// reserved, whether or not the type uses them.
pub const FIRST_TAG_OFFSET: u16 = 3;

/// Default simulation amplitude for new devices.
pub const DEFAULT_SIM_SCALE: f64 = 0.75;

// ============================================================================
// Timing
// ============================================================================

/// Scheduler tick period in milliseconds.
pub const DEFAULT_TICK_MS: u64 = 250;

/// Display poll period in milliseconds.
pub const DEFAULT_POLL_MS: u64 = 250;

/// Period of the background noise updates.
pub const NOISE_UPDATE_PERIOD: Duration = Duration::from_secs(2);

/// Travel time of a motor-operated valve.
pub const VALVE_TRAVEL_TIME: Duration = Duration::from_secs(5);

/// Step period of ramps and sequence counters.
pub const SECOND: Duration = Duration::from_secs(1);

/// Format a register offset in 4xxxxx notation.
#[inline]
pub fn display_address(offset: u16) -> u32 {
    HOLDING_REGISTER_BASE + u32::from(offset)
}
