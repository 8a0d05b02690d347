//! # Modbus Plant Simulator - Industrial Process Simulation over Modbus TCP
//!
//! **Author:** Evan Liu <liuyifanz.1996@gmail.com>
//! **Version:** 0.2.0
//! **License:** MIT
//!
//! Simulates a water-treatment style plant of pumps, valves, sensors, power
//! panels and filter sequencers behind one bank of Modbus holding registers.
//! A SCADA or HMI client writes control bits over Modbus TCP; per-device
//! state machines answer with status bits and analog values.
//!
//! ## Features
//!
//! - **Typed tags**: bit vectors, scaled integers, longs and floats in both
//!   word orders over one shared register bank
//! - **Plant topology**: places, devices, parent and link references loaded
//!   from three JSON documents, with address-map validation
//! - **16 device behaviors**: motors, valves, sensors, PID loops, power
//!   panels, RSF backwash sequencing, screens and fans
//! - **Cooperative scheduling**: a 250 ms tick with launch-if-idle timed
//!   sub-operations and per-device fault isolation
//! - **Modbus TCP server**: FC03/06/16/23 over the register bank
//!
//! ## Device Register Layout
//!
//! | Offset | Content |
//! |--------|---------|
//! | +0 | Status01 bit vector |
//! | +1 | Status02 bit vector |
//! | +2 | Control01 bit vector |
//! | +3.. | analog tags, then setting tags |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use modbus_plant_sim::{Plant, PlantResult, PlantRuntime, RegisterStore, Topology};
//!
//! fn main() -> PlantResult<()> {
//!     let topology = Topology::load_dir("topology")?;
//!     let store = RegisterStore::new(50_000);
//!     let plant = Plant::build(&topology, &store)?;
//!
//!     let mut runtime = PlantRuntime::new(plant, store);
//!     let valve = runtime.find("WTP", "WTP_Inlet_Valve")?;
//!     runtime.enable_simulation(valve)?;
//!     let report = runtime.tick();
//!     println!("{} devices simulated", report.simulated);
//!     Ok(())
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Error types and result handling
pub mod error;

/// Modbus register limits and device layout constants
pub mod constants;

/// Word order handling for two-register tags
pub mod bytes;

/// Decoded tag values
pub mod value;

/// Shared holding register bank
pub mod store;

/// Typed views over registers
pub mod tag;

// ============================================================================
// Plant model
// ============================================================================

/// Topology documents and runtime settings
pub mod config;

/// Device kinds and register layout
pub mod device;

/// Places and the plant tree
pub mod plant;

// ============================================================================
// Simulation
// ============================================================================

/// Launch-if-idle timed sub-operation slot
pub mod task_slot;

/// Per-device behaviors
pub mod sim;

/// Runtime surface, tick loop and polling reader
pub mod scheduler;

/// Modbus TCP server over the register bank
#[cfg(feature = "server")]
pub mod server;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime ===
pub use tokio;

// === Error handling ===
pub use error::{PlantError, PlantResult};

// === Register codec ===
pub use bytes::{regs_to_bytes_4, regs_to_f32, regs_to_u32, WordOrder};
pub use store::RegisterStore;
pub use tag::{BitVector, FloatTag, LongTag, ScaledInt, SignedScaledInt, Tag, TagKind};
pub use value::TagValue;

// === Plant model ===
pub use config::{SimConfig, Topology};
pub use device::{Device, DeviceKind, PreloadCategory, TagGroup, VectorSlot};
pub use plant::{DeviceRef, Place, Plant};

// === Simulation ===
pub use scheduler::{
    DeviceSnapshot, PlantRuntime, Poller, Scheduler, SharedRuntime, TickFailure, TickReport,
};
pub use sim::Simulator;
pub use task_slot::TaskSlot;

#[cfg(feature = "server")]
pub use server::RegisterService;

// === Protocol limits ===
pub use constants::{MAX_READ_REGISTERS, MAX_READ_WRITE_REGISTERS, MAX_WRITE_REGISTERS};

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!(
        "Modbus Plant Simulator v{} - industrial plant simulation over Modbus TCP by Evan Liu",
        VERSION
    )
}
