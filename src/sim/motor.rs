//! Motor behaviors.
//!
//! | Control bit | Command |
//! |-------------|---------|
//! | 0 / 14 | run (manual / scheduler) |
//! | 1 / 15 | stop (manual / scheduler) |
//! | 2 | reset fault, clears status0 bits 0..=2 |
//! | 3 | set speed (VSD only) |
//! | 5 / 6 | PID control on / off (VSD only) |
//! | 7 / 8 | auto / manual |
//! | 9 / 10 | out of service / in service |

use crate::constants::NOISE_UPDATE_PERIOD;
use crate::error::PlantResult;
use crate::task_slot::TaskSlot;

use super::{
    apply_mode_commands, apply_service_commands, jitter, run_periodic, uniform, Behavior,
    DeviceIo,
};

/// Output speed noise band around the speed reference.
const SPEED_NOISE: f64 = 0.1;

/// Variable speed drive.
///
/// Analog 0 is the output speed, analog 1 the speed reference and the last
/// analog the DC bus voltage. While running with a positive reference the
/// output follows the reference and the analogs in between are perturbed
/// around their captured values.
pub(crate) struct MotorVsd {
    reference: Vec<f64>,
    running: bool,
    values: TaskSlot,
    bus_voltage: TaskSlot,
}

impl MotorVsd {
    pub(crate) fn new(io: &DeviceIo<'_>) -> PlantResult<Self> {
        io.analog(1)?;
        let store = io.store();
        let mut reference: Vec<f64> = io.analogs().iter().map(|t| t.get(store)).collect();
        reference[0] = 0.0;
        Ok(Self {
            reference,
            running: false,
            values: TaskSlot::new("vsd values"),
            bus_voltage: TaskSlot::new("vsd bus voltage"),
        })
    }

    fn start(&mut self, io: &DeviceIo<'_>) -> PlantResult<()> {
        self.reference[1] = io.analog_value(1)?;
        io.status0()?.set_bit(0, true)?;
        self.running = true;
        Ok(())
    }

    fn settle_stopped(&mut self, io: &DeviceIo<'_>) -> PlantResult<()> {
        io.set_analog(0, 0.0)?;
        for (i, value) in self.reference.iter().enumerate().skip(2) {
            io.set_analog(i, *value)?;
        }
        self.running = false;
        Ok(())
    }
}

/// Outputs while running. The bus voltage is left to its own slot.
fn update_running(io: &DeviceIo<'_>, reference: &[f64], scale: f64) -> PlantResult<()> {
    io.set_analog(0, reference[1] + uniform(-SPEED_NOISE, SPEED_NOISE))?;
    for (i, value) in reference.iter().enumerate().take(reference.len() - 1).skip(2) {
        if *value > 0.0 {
            io.set_analog(i, jitter(*value, scale))?;
        }
    }
    Ok(())
}

impl Behavior for MotorVsd {
    fn step(&mut self, io: &DeviceIo<'_>) -> PlantResult<()> {
        let cmd = io.commands()?;
        let s1 = io.status0()?;
        let s2 = io.status1()?;

        if cmd.has(0) {
            self.start(io)?;
        }
        if cmd.has(1) {
            s1.set_bit(0, false)?;
        }
        if cmd.has(2) {
            s1.set_range(0, 2, 0b000)?;
        }
        if cmd.has(3) {
            self.reference[1] = io.analog_value(1)?;
        }
        if cmd.has(5) {
            s2.set_range(8, 10, 0b001)?;
        }
        if cmd.has(6) {
            s2.set_range(8, 10, 0b100)?;
        }
        apply_mode_commands(cmd, &s2, 7, 8)?;
        apply_service_commands(cmd, &s1, 9, 10)?;
        if cmd.has(14) {
            self.start(io)?;
        }
        if cmd.has(15) {
            s1.set_bit(0, false)?;
            self.running = false;
        }

        let scale = io.sim_scale();
        if s1.bit(0) && self.reference[1] > 0.0 {
            let reference = &self.reference;
            run_periodic(&mut self.values, NOISE_UPDATE_PERIOD, || {
                update_running(io, reference, scale)
            })?;
        }
        if !s1.bit(0) && self.running {
            self.settle_stopped(io)?;
        }

        let last = self.reference.len() - 1;
        if last >= 2 {
            let bus_reference = self.reference[last];
            run_periodic(&mut self.bus_voltage, NOISE_UPDATE_PERIOD, || {
                if bus_reference > 0.0 {
                    io.set_analog(last, jitter(bus_reference, scale))?;
                }
                Ok(())
            })?;
        }
        Ok(())
    }

    fn cancel(&mut self) {
        self.values.cancel();
        self.bus_voltage.cancel();
    }

    fn restore(&mut self, _io: &DeviceIo<'_>) -> PlantResult<()> {
        self.running = false;
        Ok(())
    }

    fn is_busy(&self) -> bool {
        self.values.is_running() || self.bus_voltage.is_running()
    }
}

/// Direct-on-line motor: a pure status-bit state machine.
pub(crate) struct MotorNormal;

impl Behavior for MotorNormal {
    fn step(&mut self, io: &DeviceIo<'_>) -> PlantResult<()> {
        let cmd = io.commands()?;
        if cmd.is_empty() {
            return Ok(());
        }
        let s1 = io.status0()?;
        let s2 = io.status1()?;

        if cmd.has(0) {
            s1.set_bit(0, true)?;
        }
        if cmd.has(1) {
            s1.set_bit(0, false)?;
        }
        if cmd.has(2) {
            s1.set_range(0, 2, 0b000)?;
        }
        apply_mode_commands(cmd, &s2, 7, 8)?;
        apply_service_commands(cmd, &s1, 9, 10)?;
        if cmd.has(14) {
            s1.set_bit(0, true)?;
        }
        if cmd.has(15) {
            s1.set_bit(0, false)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::super::Simulator;
    use crate::device::DeviceKind;
    use std::time::Duration;
    use tokio::time::sleep;

    const VSD: [f64; 4] = [0.0, 50.0, 12.0, 400.0];

    #[tokio::test(start_paused = true)]
    async fn test_vsd_run_and_stop() {
        let (device, store) = device(DeviceKind::MotorVsd, &VSD, &[]);
        let mut sim = Simulator::new(&device, &store).unwrap();

        command(&device, &store, 0);
        sim.simulate(&device, &store).unwrap();
        release(&device, &store);
        assert_eq!(status0(&device, &store) & 1, 1);
        let speed = analog(&device, &store, 0);
        assert!((49.9..=50.1).contains(&speed), "speed {}", speed);
        let current = analog(&device, &store, 2);
        assert!((10.7..=13.3).contains(&current), "current {}", current);

        command(&device, &store, 1);
        sim.simulate(&device, &store).unwrap();
        release(&device, &store);
        assert_eq!(status0(&device, &store) & 1, 0);
        assert_eq!(analog(&device, &store, 0), 0.0);
        assert_eq!(analog(&device, &store, 2), 12.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_vsd_values_refresh_every_period() {
        let (device, store) = device(DeviceKind::MotorVsd, &VSD, &[]);
        let mut sim = Simulator::new(&device, &store).unwrap();
        command(&device, &store, 14);
        sim.simulate(&device, &store).unwrap();
        release(&device, &store);
        assert!(sim.is_busy());

        // mid-period ticks leave the outputs alone
        set_analog(&device, &store, 0, 1.0);
        sleep(Duration::from_millis(500)).await;
        sim.simulate(&device, &store).unwrap();
        assert_eq!(analog(&device, &store, 0), 1.0);

        sleep(Duration::from_millis(1600)).await;
        sim.simulate(&device, &store).unwrap();
        assert!(analog(&device, &store, 0) > 49.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_vsd_status_commands() {
        let (device, store) = device(DeviceKind::MotorVsd, &VSD, &[]);
        let mut sim = Simulator::new(&device, &store).unwrap();
        set_status0(&device, &store, 0b111);

        command(&device, &store, 2);
        sim.simulate(&device, &store).unwrap();
        assert_eq!(status0(&device, &store), 0);

        command(&device, &store, 5);
        sim.simulate(&device, &store).unwrap();
        assert_eq!(status1(&device, &store) >> 8, 0b001);
        command(&device, &store, 6);
        sim.simulate(&device, &store).unwrap();
        assert_eq!(status1(&device, &store) >> 8, 0b100);

        command(&device, &store, 9);
        sim.simulate(&device, &store).unwrap();
        assert_eq!(status0(&device, &store), 0x8000);
    }

    #[tokio::test]
    async fn test_normal_motor_transitions() {
        let (device, store) = device(DeviceKind::MotorNormal, &[], &[]);
        let mut sim = Simulator::new(&device, &store).unwrap();

        command(&device, &store, 14);
        sim.simulate(&device, &store).unwrap();
        assert_eq!(status0(&device, &store), 1);

        // holding the command is idempotent
        sim.simulate(&device, &store).unwrap();
        assert_eq!(status0(&device, &store), 1);

        command(&device, &store, 15);
        sim.simulate(&device, &store).unwrap();
        assert_eq!(status0(&device, &store), 0);

        set_status0(&device, &store, 0b110);
        command(&device, &store, 2);
        sim.simulate(&device, &store).unwrap();
        assert_eq!(status0(&device, &store), 0);

        command(&device, &store, 7);
        sim.simulate(&device, &store).unwrap();
        assert_eq!(status1(&device, &store), 0b001);
    }
}
