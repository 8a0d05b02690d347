//! Valve behaviors.
//!
//! Status0 layout shared by the three valve types:
//!
//! | Bit | Meaning |
//! |-----|---------|
//! | 0 | fully closed |
//! | 1 | fully open |
//! | 2 | travelling to closed |
//! | 3 | travelling to open (any travel for modulating valves) |
//! | 4..=5 | faults |
//! | 15 | out of service |
//!
//! Control bits: 0 open, 1 close, 2 stop, 3 reset fault, 4 set reference
//! angle (modulating), 7 / 8 auto / manual, 9 / 10 service, 14 / 15
//! scheduler open / close.

use tokio::time::sleep;
use tracing::warn;

use crate::constants::{SECOND, VALVE_TRAVEL_TIME};
use crate::error::PlantResult;
use crate::store::RegisterStore;
use crate::tag::{BitVector, Tag};
use crate::task_slot::TaskSlot;

use super::{apply_mode_commands, apply_service_commands, approx_eq, Behavior, Bits, DeviceIo};

const OPEN_ANGLE: f64 = 100.0;
const CLOSED_ANGLE: f64 = 0.0;

/// Open and close are allowed only from rest, not already at the target.
fn may_travel(s1: &Bits<'_>, end_bit: u8) -> PlantResult<bool> {
    Ok(!s1.bit(end_bit) && s1.range(2, 3)? == 0)
}

fn log_dropped(result: PlantResult<()>) {
    if let Err(e) = result {
        warn!("Valve status update dropped: {}", e);
    }
}

// ============================================================================
// Motor operated valve
// ============================================================================

/// Motor operated valve with a fixed travel time.
pub(crate) struct MovValve {
    travel: TaskSlot,
}

/// Direction of a MOV stroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stroke {
    Open,
    Close,
}

impl Stroke {
    /// `(end bit left behind, travel pattern in bits 2..=3, travel bit,
    /// end pattern in bits 0..=1)`
    fn bits(self) -> (u8, u16, u8, u16) {
        match self {
            Stroke::Open => (0, 0b10, 3, 0b10),
            Stroke::Close => (1, 0b01, 2, 0b01),
        }
    }
}

impl MovValve {
    pub(crate) fn new() -> Self {
        Self {
            travel: TaskSlot::new("mov travel"),
        }
    }

    /// Leave the end position now and arrive after the travel time.
    fn start(&mut self, s1: &Bits<'_>, store: &RegisterStore, stroke: Stroke) -> PlantResult<()> {
        if self.travel.is_running() {
            return Ok(());
        }
        let (leaving, travel, travel_bit, arrived) = stroke.bits();
        s1.set_bit(leaving, false)?;
        s1.set_range(2, 3, travel)?;

        let vector = s1.vector();
        let store = store.clone();
        self.travel.launch(async move {
            sleep(VALVE_TRAVEL_TIME).await;
            vector.replace_bits(&store, (1 << travel_bit) | 0b11, arrived);
        });
        Ok(())
    }
}

impl Behavior for MovValve {
    fn step(&mut self, io: &DeviceIo<'_>) -> PlantResult<()> {
        let cmd = io.commands()?;
        if cmd.is_empty() {
            return Ok(());
        }
        let store = io.store();
        let s1 = io.status0()?;
        let s2 = io.status1()?;

        if cmd.has(0) && may_travel(&s1, 1)? {
            self.start(&s1, store, Stroke::Open)?;
        }
        if cmd.has(1) && may_travel(&s1, 0)? {
            self.start(&s1, store, Stroke::Close)?;
        }
        if cmd.has(2) && s1.range(2, 3)? != 0 {
            s1.set_range(2, 3, 0b00)?;
            self.travel.cancel();
        }
        if cmd.has(3) {
            s1.set_range(4, 5, 0b00)?;
            if !s1.bit(0) {
                self.start(&s1, store, Stroke::Close)?;
            }
        }
        apply_mode_commands(cmd, &s2, 7, 8)?;
        apply_service_commands(cmd, &s1, 9, 10)?;
        if cmd.has(14) && may_travel(&s1, 1)? {
            self.start(&s1, store, Stroke::Open)?;
        }
        if cmd.has(15) && may_travel(&s1, 0)? {
            self.start(&s1, store, Stroke::Close)?;
        }
        Ok(())
    }

    fn cancel(&mut self) {
        self.travel.cancel();
    }

    fn restore(&mut self, io: &DeviceIo<'_>) -> PlantResult<()> {
        io.status0()?.set_range(2, 3, 0b00)
    }

    fn is_busy(&self) -> bool {
        self.travel.is_running()
    }
}

// ============================================================================
// Modulating valve
// ============================================================================

/// Modulating valve. Analog 0 is the reference angle, analog 1 the actual
/// angle in percent open.
pub(crate) struct ModulatingValve {
    ramp: TaskSlot,
}

impl ModulatingValve {
    pub(crate) fn new(io: &DeviceIo<'_>) -> PlantResult<Self> {
        io.analog(1)?;
        Ok(Self {
            ramp: TaskSlot::new("modulating ramp"),
        })
    }

    /// Ramp the actual angle to the reference angle by one tenth per second.
    fn set_angle(&mut self, io: &DeviceIo<'_>) -> PlantResult<()> {
        if self.ramp.is_running() {
            return Ok(());
        }
        let reference = io.analog(0)?;
        let actual = io.analog(1)?;
        let s1 = io.status0()?;
        let store = io.store();
        s1.set_bit(3, true)?;

        let end = tenths(reference.get(store));
        let start = tenths(actual.get(store));
        let vector = s1.vector();
        let store = store.clone();
        self.ramp.launch(ramp(store, vector, actual, start, end));
        Ok(())
    }

    fn command_angle(&mut self, io: &DeviceIo<'_>, angle: f64) -> PlantResult<()> {
        io.set_analog(0, angle)?;
        self.set_angle(io)
    }
}

#[inline]
fn tenths(angle: f64) -> i64 {
    (angle * 10.0).round() as i64
}

async fn ramp(store: RegisterStore, status: BitVector, actual: Tag, start: i64, end: i64) {
    let step = if start > end { -1 } else { 1 };
    let mut position = start;
    while position != end {
        actual.set(&store, position as f64 / 10.0);
        sleep(SECOND).await;
        position += step;
    }
    actual.set(&store, end as f64 / 10.0);
    log_dropped(status.set_bit(&store, 3, false));
}

impl Behavior for ModulatingValve {
    fn step(&mut self, io: &DeviceIo<'_>) -> PlantResult<()> {
        let cmd = io.commands()?;
        let s1 = io.status0()?;
        let s2 = io.status1()?;

        if cmd.has(0) && may_travel(&s1, 1)? {
            self.command_angle(io, OPEN_ANGLE)?;
        }
        if cmd.has(1) && may_travel(&s1, 0)? {
            self.command_angle(io, CLOSED_ANGLE)?;
        }

        let angle = io.analog_value(1)?;
        s1.set_bit(1, approx_eq(angle, OPEN_ANGLE))?;
        s1.set_bit(0, approx_eq(angle, CLOSED_ANGLE))?;

        if cmd.has(2) && s1.range(2, 3)? != 0 {
            s1.set_bit(3, false)?;
            self.ramp.cancel();
        }
        if cmd.has(3) {
            s1.set_bit(4, false)?;
            self.ramp.cancel();
            self.command_angle(io, CLOSED_ANGLE)?;
        }
        if cmd.has(4) {
            self.set_angle(io)?;
        }
        apply_mode_commands(cmd, &s2, 7, 8)?;
        apply_service_commands(cmd, &s1, 9, 10)?;
        if cmd.has(14) && may_travel(&s1, 1)? {
            self.command_angle(io, OPEN_ANGLE)?;
        }
        if cmd.has(15) && may_travel(&s1, 0)? {
            self.command_angle(io, CLOSED_ANGLE)?;
        }
        Ok(())
    }

    fn cancel(&mut self) {
        self.ramp.cancel();
    }

    fn restore(&mut self, io: &DeviceIo<'_>) -> PlantResult<()> {
        io.status0()?.set_bit(3, false)
    }

    fn is_busy(&self) -> bool {
        self.ramp.is_running()
    }
}

// ============================================================================
// Solenoid valve
// ============================================================================

/// Solenoid valve: open and close take effect immediately.
pub(crate) struct SolenoidValve;

impl Behavior for SolenoidValve {
    fn step(&mut self, io: &DeviceIo<'_>) -> PlantResult<()> {
        let cmd = io.commands()?;
        if cmd.is_empty() {
            return Ok(());
        }
        let s1 = io.status0()?;
        let s2 = io.status1()?;

        if cmd.has(0) && !s1.bit(1) {
            s1.set_range(0, 1, 0b10)?;
        }
        if cmd.has(1) && !s1.bit(0) {
            s1.set_range(0, 1, 0b01)?;
        }
        if cmd.has(3) {
            s1.set_range(4, 5, 0b00)?;
            s1.set_range(0, 1, 0b01)?;
        }
        apply_mode_commands(cmd, &s2, 7, 8)?;
        apply_service_commands(cmd, &s1, 9, 10)?;
        if cmd.has(14) && may_travel(&s1, 1)? {
            s1.set_range(0, 1, 0b10)?;
        }
        if cmd.has(15) && may_travel(&s1, 0)? {
            s1.set_range(0, 1, 0b01)?;
        }
        Ok(())
    }
}
