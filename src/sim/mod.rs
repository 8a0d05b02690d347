//! # Simulation Engine
//!
//! One behavior per device type, selected from the device kind when
//! simulation is enabled. Every behavior offers the same two capabilities:
//!
//! | Capability | Caller | Effect |
//! |------------|--------|--------|
//! | `simulate` | scheduler, once per tick | apply control bits, refresh outputs |
//! | `restore`  | runtime, on disable | cancel timed work, return analogs to baseline |
//!
//! A tick never blocks. Status transitions happen synchronously inside
//! `simulate`; operations with a physical duration (valve travel, ramps,
//! backwash phases) run as background tasks held in a [`TaskSlot`], and
//! periodic noise updates are rate limited by holding a slot for the
//! update period.
//!
//! Control bits are level-triggered: the operator pulses them and the
//! simulator never clears them.

mod motor;
mod pid;
mod power;
mod rsf;
mod sensor;
mod station;
mod valve;

use std::time::Duration;

use rand::Rng;
use tracing::{debug, info};

use crate::device::{Device, DeviceKind, TagGroup, VectorSlot};
use crate::error::{PlantError, PlantResult};
use crate::store::RegisterStore;
use crate::tag::{BitVector, Tag};
use crate::task_slot::TaskSlot;

use motor::{MotorNormal, MotorVsd};
use pid::PidControl;
use power::{Dpa, Generator, Ups};
use rsf::Rsf;
use sensor::{AnalogSensor, LevelSensor, TotalizingSensor};
use station::{RootPanel, ScreenPackage, VentilationFans};
use valve::{ModulatingValve, MovValve, SolenoidValve};

// ============================================================================
// Device access helpers
// ============================================================================

/// Snapshot of the control vector taken at the start of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Commands(u16);

impl Commands {
    #[inline]
    pub(crate) fn has(&self, bit: u8) -> bool {
        bit < 16 && (self.0 >> bit) & 1 == 1
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// A bit-vector bound to the store it lives in.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Bits<'a> {
    vector: BitVector,
    store: &'a RegisterStore,
}

impl<'a> Bits<'a> {
    #[inline]
    pub(crate) fn vector(&self) -> BitVector {
        self.vector
    }

    #[inline]
    pub(crate) fn bit(&self, position: u8) -> bool {
        self.vector.bit(self.store, position)
    }

    #[inline]
    pub(crate) fn set_bit(&self, position: u8, on: bool) -> PlantResult<()> {
        self.vector.set_bit(self.store, position, on)
    }

    #[inline]
    pub(crate) fn range(&self, start: u8, end: u8) -> PlantResult<u16> {
        self.vector.range(self.store, start, end)
    }

    #[inline]
    pub(crate) fn set_range(&self, start: u8, end: u8, value: u16) -> PlantResult<()> {
        self.vector.set_range(self.store, start, end, value)
    }
}

/// Read/write view of one device during a tick.
pub(crate) struct DeviceIo<'a> {
    device: &'a Device,
    store: &'a RegisterStore,
}

impl<'a> DeviceIo<'a> {
    pub(crate) fn new(device: &'a Device, store: &'a RegisterStore) -> Self {
        Self { device, store }
    }

    #[inline]
    pub(crate) fn alias(&self) -> &'a str {
        self.device.alias()
    }

    #[inline]
    pub(crate) fn store(&self) -> &'a RegisterStore {
        self.store
    }

    #[inline]
    pub(crate) fn sim_scale(&self) -> f64 {
        self.device.sim_scale()
    }

    pub(crate) fn commands(&self) -> PlantResult<Commands> {
        let control = self.device.require_vector(VectorSlot::Control)?;
        Ok(Commands(control.value(self.store)))
    }

    pub(crate) fn status0(&self) -> PlantResult<Bits<'a>> {
        self.bits(VectorSlot::Status0)
    }

    pub(crate) fn status1(&self) -> PlantResult<Bits<'a>> {
        self.bits(VectorSlot::Status1)
    }

    fn bits(&self, slot: VectorSlot) -> PlantResult<Bits<'a>> {
        Ok(Bits {
            vector: self.device.require_vector(slot)?,
            store: self.store,
        })
    }

    #[inline]
    pub(crate) fn analogs(&self) -> &'a [Tag] {
        self.device.tags(TagGroup::Analog)
    }

    pub(crate) fn analog(&self, index: usize) -> PlantResult<Tag> {
        self.device.tag(TagGroup::Analog, index)
    }

    pub(crate) fn analog_value(&self, index: usize) -> PlantResult<f64> {
        Ok(self.analog(index)?.get(self.store))
    }

    pub(crate) fn set_analog(&self, index: usize, value: f64) -> PlantResult<()> {
        self.analog(index)?.set(self.store, value);
        Ok(())
    }

    pub(crate) fn setting_value(&self, index: usize) -> PlantResult<f64> {
        Ok(self.device.tag(TagGroup::Settings, index)?.get(self.store))
    }
}

// ============================================================================
// Shared transition tables
// ============================================================================

/// Auto / manual mode selection in status1 bits 0..=2.
///
/// The manual command selects SCADA manual (`010`) when status1 bit 11
/// (SCADA active) is set and HMI manual (`100`) otherwise.
pub(crate) fn apply_mode_commands(
    cmd: Commands,
    status1: &Bits<'_>,
    auto: u8,
    manual: u8,
) -> PlantResult<()> {
    if cmd.has(auto) {
        status1.set_range(0, 2, 0b001)?;
    }
    if cmd.has(manual) {
        let mode = if status1.bit(11) { 0b010 } else { 0b100 };
        status1.set_range(0, 2, mode)?;
    }
    Ok(())
}

/// Out-of-service / in-service commands on status0 bit 15.
pub(crate) fn apply_service_commands(
    cmd: Commands,
    status0: &Bits<'_>,
    out_of_service: u8,
    in_service: u8,
) -> PlantResult<()> {
    if cmd.has(out_of_service) {
        status0.set_bit(15, true)?;
    }
    if cmd.has(in_service) {
        status0.set_bit(15, false)?;
    }
    Ok(())
}

// ============================================================================
// Noise
// ============================================================================

/// Uniform sample in `lo..=hi`. A degenerate interval yields `lo`; a
/// non-finite bound yields `lo`, or zero when `lo` itself is not finite.
pub(crate) fn uniform(lo: f64, hi: f64) -> f64 {
    if !lo.is_finite() {
        return 0.0;
    }
    if !hi.is_finite() {
        return lo;
    }
    if lo < hi {
        rand::thread_rng().gen_range(lo..=hi)
    } else {
        lo
    }
}

/// `reference` perturbed by a uniform fraction of itself in `±scale`.
pub(crate) fn jitter(reference: f64, scale: f64) -> f64 {
    let scale = scale.abs();
    reference + reference * uniform(-scale, scale)
}

/// Run `update` now unless the slot is still holding from the previous
/// update, then hold the slot for `period`.
pub(crate) fn run_periodic<F>(slot: &mut TaskSlot, period: Duration, update: F) -> PlantResult<()>
where
    F: FnOnce() -> PlantResult<()>,
{
    if slot.is_running() {
        return Ok(());
    }
    update()?;
    slot.hold(period);
    Ok(())
}

#[inline]
pub(crate) fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

// ============================================================================
// Behaviors
// ============================================================================

/// Per-type simulation behavior.
pub(crate) trait Behavior {
    /// Apply one scheduler tick. Must not block.
    fn step(&mut self, io: &DeviceIo<'_>) -> PlantResult<()>;

    /// Abort outstanding timed work.
    fn cancel(&mut self) {}

    /// Type-specific cleanup run after `cancel` and before the analog
    /// baseline is written back.
    fn restore(&mut self, _io: &DeviceIo<'_>) -> PlantResult<()> {
        Ok(())
    }

    /// Whether a timed sub-operation is in flight.
    fn is_busy(&self) -> bool {
        false
    }
}

enum Variant {
    MotorVsd(MotorVsd),
    MotorNormal(MotorNormal),
    Mov(MovValve),
    Modulating(ModulatingValve),
    Solenoid(SolenoidValve),
    Level(LevelSensor),
    Totalizing(TotalizingSensor),
    Analog(AnalogSensor),
    Pid(PidControl),
    Dpa(Dpa),
    Generator(Generator),
    Rsf(Rsf),
    Ups(Ups),
    Screen(ScreenPackage),
    Root(RootPanel),
    Fans(VentilationFans),
}

macro_rules! dispatch {
    ($variant:expr, $b:ident => $body:expr) => {
        match $variant {
            Variant::MotorVsd($b) => $body,
            Variant::MotorNormal($b) => $body,
            Variant::Mov($b) => $body,
            Variant::Modulating($b) => $body,
            Variant::Solenoid($b) => $body,
            Variant::Level($b) => $body,
            Variant::Totalizing($b) => $body,
            Variant::Analog($b) => $body,
            Variant::Pid($b) => $body,
            Variant::Dpa($b) => $body,
            Variant::Generator($b) => $body,
            Variant::Rsf($b) => $body,
            Variant::Ups($b) => $body,
            Variant::Screen($b) => $body,
            Variant::Root($b) => $body,
            Variant::Fans($b) => $body,
        }
    };
}

impl Variant {
    fn for_device(io: &DeviceIo<'_>, kind: DeviceKind) -> PlantResult<Self> {
        Ok(match kind {
            DeviceKind::MotorVsd => Variant::MotorVsd(MotorVsd::new(io)?),
            DeviceKind::MotorNormal => Variant::MotorNormal(MotorNormal),
            DeviceKind::ValveMov => Variant::Mov(MovValve::new()),
            DeviceKind::ValveModulating => Variant::Modulating(ModulatingValve::new(io)?),
            DeviceKind::ValveSolenoid => Variant::Solenoid(SolenoidValve),
            DeviceKind::SensorLevel => Variant::Level(LevelSensor::new(io)?),
            DeviceKind::SensorTotalizing => Variant::Totalizing(TotalizingSensor::new(io)?),
            DeviceKind::SensorAnalog => Variant::Analog(AnalogSensor::new(io)?),
            DeviceKind::PidControl => Variant::Pid(PidControl::new(io)?),
            DeviceKind::Dpa => Variant::Dpa(Dpa::new(io)),
            DeviceKind::Generator => Variant::Generator(Generator::new(io)),
            DeviceKind::Rsf => Variant::Rsf(Rsf::new(io)?),
            DeviceKind::Ups => Variant::Ups(Ups::new(io)),
            DeviceKind::ScreenPackage => Variant::Screen(ScreenPackage),
            DeviceKind::Root => Variant::Root(RootPanel),
            DeviceKind::VentilationFans => Variant::Fans(VentilationFans),
        })
    }
}

// ============================================================================
// Simulator
// ============================================================================

/// Simulation state attached to one device while simulation is enabled.
///
/// Creating a simulator captures the raw registers of every analog tag;
/// [`Simulator::restore`] writes them back, so disabling simulation leaves
/// the analogs exactly as they were when it was enabled.
pub struct Simulator {
    kind: DeviceKind,
    alias: String,
    variant: Variant,
    baseline: Vec<(Tag, Vec<u16>)>,
}

impl Simulator {
    /// Attach a simulator to `device`.
    ///
    /// Fails with [`PlantError::SimulationUnsupported`] when the device type
    /// does not allow simulation, or when a tag the behavior needs at
    /// creation is missing from the template.
    pub fn new(device: &Device, store: &RegisterStore) -> PlantResult<Self> {
        if !device.simulation_allowed() {
            return Err(PlantError::SimulationUnsupported {
                device: device.alias().to_string(),
            });
        }
        let io = DeviceIo::new(device, store);
        let variant = Variant::for_device(&io, device.kind())?;
        let baseline = io
            .analogs()
            .iter()
            .map(|tag| (*tag, tag.raw(store)))
            .collect();
        info!("Simulation enabled for {} ({})", device.alias(), device.kind());
        Ok(Self {
            kind: device.kind(),
            alias: device.alias().to_string(),
            variant,
            baseline,
        })
    }

    #[inline]
    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    #[inline]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// A timed sub-operation is still running.
    pub fn is_busy(&self) -> bool {
        dispatch!(&self.variant, b => b.is_busy())
    }

    /// Run one tick against `device`.
    pub fn simulate(&mut self, device: &Device, store: &RegisterStore) -> PlantResult<()> {
        let io = DeviceIo::new(device, store);
        dispatch!(&mut self.variant, b => b.step(&io))
    }

    /// Cancel timed work and return the analogs to the captured baseline.
    pub fn restore(&mut self, device: &Device, store: &RegisterStore) -> PlantResult<()> {
        let io = DeviceIo::new(device, store);
        dispatch!(&mut self.variant, b => b.cancel());
        let hook = dispatch!(&mut self.variant, b => b.restore(&io));
        for (tag, raw) in &self.baseline {
            tag.restore_raw(store, raw);
        }
        debug!("Restored {} analog tags of {}", self.baseline.len(), self.alias);
        hook
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        dispatch!(&mut self.variant, b => b.cancel());
    }
}

impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("kind", &self.kind)
            .field("alias", &self.alias)
            .field("busy", &self.is_busy())
            .finish()
    }
}

// ============================================================================
// Test fixtures
// ============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::config::{DeviceDecl, DeviceTemplate, TagSpec};
    use crate::tag::TagKind;

    /// Device with all three vectors, `analog` int tags with one decimal
    /// and `settings` int tags with one decimal, at address 0.
    pub(crate) fn device(
        kind: DeviceKind,
        analog: &[f64],
        settings: &[f64],
    ) -> (Device, RegisterStore) {
        let store = RegisterStore::new(200);
        let spec = |i: usize| TagSpec {
            name: format!("T{}", i),
            kind: TagKind::Int,
            dp: 1,
        };
        let template = DeviceTemplate {
            status0: Some(vec!["S1".into()]),
            status1: Some(vec!["S2".into()]),
            control: Some(vec!["C".into()]),
            analog: (0..analog.len()).map(spec).collect(),
            settings: (0..settings.len()).map(spec).collect(),
            registers: 100,
            enable_simulate: true,
        };
        let mut decl = DeviceDecl::new("Dev", 0, kind.as_str(), None);
        decl.settings = Some(settings.to_vec());
        decl.simscale = 0.1;
        let device = Device::build("Dev", &decl, &template, &store).unwrap();
        for (tag, value) in device.tags(TagGroup::Analog).iter().zip(analog) {
            tag.set(&store, *value);
        }
        (device, store)
    }

    pub(crate) fn command(device: &Device, store: &RegisterStore, bit: u8) {
        let control = device.vector(VectorSlot::Control).unwrap();
        control.set_value(store, 1 << bit);
    }

    pub(crate) fn release(device: &Device, store: &RegisterStore) {
        device.vector(VectorSlot::Control).unwrap().set_value(store, 0);
    }

    pub(crate) fn status0(device: &Device, store: &RegisterStore) -> u16 {
        device.vector(VectorSlot::Status0).unwrap().value(store)
    }

    pub(crate) fn status1(device: &Device, store: &RegisterStore) -> u16 {
        device.vector(VectorSlot::Status1).unwrap().value(store)
    }

    pub(crate) fn set_status0(device: &Device, store: &RegisterStore, value: u16) {
        device.vector(VectorSlot::Status0).unwrap().set_value(store, value);
    }

    pub(crate) fn set_status1(device: &Device, store: &RegisterStore, value: u16) {
        device.vector(VectorSlot::Status1).unwrap().set_value(store, value);
    }

    /// Tick `count` times, 300 ms apart, so ticks never coincide with the
    /// one-second and two-second slot boundaries.
    pub(crate) async fn run_ticks(
        sim: &mut Simulator,
        device: &Device,
        store: &RegisterStore,
        count: usize,
    ) {
        for _ in 0..count {
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
            sim.simulate(device, store).unwrap();
        }
    }

    pub(crate) fn analog(device: &Device, store: &RegisterStore, index: usize) -> f64 {
        device.tag(TagGroup::Analog, index).unwrap().get(store)
    }

    pub(crate) fn set_analog(device: &Device, store: &RegisterStore, index: usize, value: f64) {
        device.tag(TagGroup::Analog, index).unwrap().set(store, value);
    }
}

// ============================================================================
// Tests
// ============================================================================
