//! Power distribution behaviors.
//!
//! DPA, generator and UPS panels capture every analog at enable time and
//! perturb the nonzero ones around that capture once per noise period.
//! Energy and run-hour meters count up by one instead.

use crate::constants::NOISE_UPDATE_PERIOD;
use crate::error::PlantResult;
use crate::task_slot::TaskSlot;

use super::{apply_mode_commands, jitter, run_periodic, Behavior, DeviceIo};

/// DPA energy counters.
const DPA_COUNTERS: [usize; 2] = [18, 19];
/// Generator run-hour counter.
const GENERATOR_COUNTERS: [usize; 1] = [9];
/// Generator analogs below this index are left alone.
const GENERATOR_FIRST_SIMULATED: usize = 3;

/// Captured analog values plus the slot pacing their updates.
struct Meters {
    reference: Vec<f64>,
    values: TaskSlot,
}

impl Meters {
    fn capture(io: &DeviceIo<'_>, name: &'static str) -> Self {
        let store = io.store();
        Self {
            reference: io.analogs().iter().map(|t| t.get(store)).collect(),
            values: TaskSlot::new(name),
        }
    }

    /// Perturb the nonzero references from `first` on; counters increment.
    fn update(&mut self, io: &DeviceIo<'_>, first: usize, counters: &[usize]) -> PlantResult<()> {
        let scale = io.sim_scale();
        let reference = &self.reference;
        run_periodic(&mut self.values, NOISE_UPDATE_PERIOD, || {
            for (i, value) in reference.iter().enumerate().skip(first) {
                if *value <= 0.0 {
                    continue;
                }
                if counters.contains(&i) {
                    io.set_analog(i, io.analog_value(i)? + 1.0)?;
                } else {
                    io.set_analog(i, jitter(*value, scale))?;
                }
            }
            Ok(())
        })
    }
}

/// Power distribution analyser.
pub(crate) struct Dpa {
    meters: Meters,
}

impl Dpa {
    pub(crate) fn new(io: &DeviceIo<'_>) -> Self {
        Self {
            meters: Meters::capture(io, "dpa values"),
        }
    }
}

impl Behavior for Dpa {
    fn step(&mut self, io: &DeviceIo<'_>) -> PlantResult<()> {
        self.meters.update(io, 0, &DPA_COUNTERS)
    }

    fn cancel(&mut self) {
        self.meters.values.cancel();
    }

    fn is_busy(&self) -> bool {
        self.meters.values.is_running()
    }
}

/// Uninterruptible power supply.
pub(crate) struct Ups {
    meters: Meters,
}

impl Ups {
    pub(crate) fn new(io: &DeviceIo<'_>) -> Self {
        Self {
            meters: Meters::capture(io, "ups values"),
        }
    }
}

impl Behavior for Ups {
    fn step(&mut self, io: &DeviceIo<'_>) -> PlantResult<()> {
        self.meters.update(io, 0, &[])
    }

    fn cancel(&mut self) {
        self.meters.values.cancel();
    }

    fn is_busy(&self) -> bool {
        self.meters.values.is_running()
    }
}

/// Generator set. Control 0 / 1 start and stop (status0 bit 6), 7 / 8
/// select auto / manual.
pub(crate) struct Generator {
    meters: Meters,
}

impl Generator {
    pub(crate) fn new(io: &DeviceIo<'_>) -> Self {
        Self {
            meters: Meters::capture(io, "generator values"),
        }
    }
}

impl Behavior for Generator {
    fn step(&mut self, io: &DeviceIo<'_>) -> PlantResult<()> {
        self.meters
            .update(io, GENERATOR_FIRST_SIMULATED, &GENERATOR_COUNTERS)?;

        let cmd = io.commands()?;
        if cmd.is_empty() {
            return Ok(());
        }
        let s1 = io.status0()?;
        if cmd.has(0) {
            s1.set_bit(6, true)?;
        }
        if cmd.has(1) {
            s1.set_bit(6, false)?;
        }
        apply_mode_commands(cmd, &io.status1()?, 7, 8)
    }

    fn cancel(&mut self) {
        self.meters.values.cancel();
    }

    fn is_busy(&self) -> bool {
        self.meters.values.is_running()
    }
}
