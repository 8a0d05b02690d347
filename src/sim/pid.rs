//! PID loop behavior.
//!
//! Analog 0 is the process value, analog 1 the active setpoint and analog 2
//! the controller output. Status0 bits 13, 14 and 15 select settings 0, 1
//! or 2 as the active setpoint, first match wins. Status0 bit 0 is the
//! running flag.

use crate::constants::NOISE_UPDATE_PERIOD;
use crate::error::PlantResult;
use crate::task_slot::TaskSlot;

use super::{jitter, run_periodic, uniform, Behavior, DeviceIo};

const PROCESS_NOISE: f64 = 0.1;
const OUTPUT_RANGE: (f64, f64) = (25.0, 75.0);

/// Status0 bit selecting each setpoint setting, in priority order.
const SETPOINT_BITS: [(u8, usize); 3] = [(13, 0), (14, 1), (15, 2)];

pub(crate) struct PidControl {
    values: TaskSlot,
}

impl PidControl {
    pub(crate) fn new(io: &DeviceIo<'_>) -> PlantResult<Self> {
        io.analog(2)?;
        Ok(Self {
            values: TaskSlot::new("pid values"),
        })
    }
}

impl Behavior for PidControl {
    fn step(&mut self, io: &DeviceIo<'_>) -> PlantResult<()> {
        let s1 = io.status0()?;
        if let Some((_, setting)) = SETPOINT_BITS.iter().find(|(bit, _)| s1.bit(*bit)) {
            io.set_analog(1, io.setting_value(*setting)?)?;
        }

        if s1.bit(0) {
            run_periodic(&mut self.values, NOISE_UPDATE_PERIOD, || {
                io.set_analog(0, jitter(io.analog_value(1)?, PROCESS_NOISE))?;
                io.set_analog(2, uniform(OUTPUT_RANGE.0, OUTPUT_RANGE.1))
            })
        } else {
            io.set_analog(0, 0.0)?;
            io.set_analog(2, 0.0)
        }
    }

    fn cancel(&mut self) {
        self.values.cancel();
    }

    fn is_busy(&self) -> bool {
        self.values.is_running()
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::super::Simulator;
    use crate::device::DeviceKind;

    #[tokio::test(start_paused = true)]
    async fn test_setpoint_selection_priority() {
        let (device, store) = device(DeviceKind::PidControl, &[0.0, 0.0, 0.0], &[40.0, 60.0, 80.0]);
        let mut sim = Simulator::new(&device, &store).unwrap();

        set_status0(&device, &store, 1 << 15);
        sim.simulate(&device, &store).unwrap();
        assert_eq!(analog(&device, &store, 1), 80.0);

        set_status0(&device, &store, (1 << 14) | (1 << 15));
        sim.simulate(&device, &store).unwrap();
        assert_eq!(analog(&device, &store, 1), 60.0);

        set_status0(&device, &store, 0x7 << 13);
        sim.simulate(&device, &store).unwrap();
        assert_eq!(analog(&device, &store, 1), 40.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_and_stopped_outputs() {
        let (device, store) = device(DeviceKind::PidControl, &[0.0, 0.0, 0.0], &[40.0, 60.0, 80.0]);
        let mut sim = Simulator::new(&device, &store).unwrap();

        set_status0(&device, &store, (1 << 14) | 1);
        sim.simulate(&device, &store).unwrap();
        let pv = analog(&device, &store, 0);
        assert!((53.9..=66.1).contains(&pv), "pv {}", pv);
        let out = analog(&device, &store, 2);
        assert!((25.0..=75.0).contains(&out), "out {}", out);

        set_status0(&device, &store, 1 << 14);
        sim.simulate(&device, &store).unwrap();
        assert_eq!(analog(&device, &store, 0), 0.0);
        assert_eq!(analog(&device, &store, 2), 0.0);
    }

    #[tokio::test]
    async fn test_requires_output_tag() {
        let (device, store) = device(DeviceKind::PidControl, &[0.0, 0.0], &[]);
        assert!(Simulator::new(&device, &store).is_err());
    }
}
