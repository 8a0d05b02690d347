//! Pure status-bit devices: screen package, station root and ventilation
//! fans. None of them has timed behavior.

use crate::error::PlantResult;

use super::{apply_mode_commands, apply_service_commands, Behavior, DeviceIo};

/// Two-valve screen package.
///
/// Status0 bits 3..=4 and 9..=10 hold the open (`01`) / closed (`10`)
/// state of sluice valves 1 and 2; bits 2, 5, 8 and 11 are their faults.
/// In auto mode (status1 bit 0) control bits 14 and 15 hold the scheduled
/// state of each valve: set means open, clear means closed.
pub(crate) struct ScreenPackage;

const SCREEN_FAULT_BITS: [u8; 4] = [2, 5, 8, 11];

impl Behavior for ScreenPackage {
    fn step(&mut self, io: &DeviceIo<'_>) -> PlantResult<()> {
        let cmd = io.commands()?;
        let s1 = io.status0()?;
        let s2 = io.status1()?;

        if cmd.has(0) {
            s1.set_range(3, 4, 0b01)?;
        }
        if cmd.has(1) {
            s1.set_range(3, 4, 0b10)?;
        }
        if cmd.has(2) {
            s1.set_range(9, 10, 0b01)?;
        }
        if cmd.has(3) {
            s1.set_range(9, 10, 0b10)?;
        }
        if cmd.has(4) {
            for bit in SCREEN_FAULT_BITS {
                s1.set_bit(bit, false)?;
            }
            s1.set_range(3, 4, 0b10)?;
            s1.set_range(9, 10, 0b10)?;
        }
        apply_mode_commands(cmd, &s2, 7, 8)?;
        apply_service_commands(cmd, &s1, 9, 10)?;

        if s2.bit(0) {
            s1.set_range(3, 4, if cmd.has(14) { 0b01 } else { 0b10 })?;
            s1.set_range(9, 10, if cmd.has(15) { 0b01 } else { 0b10 })?;
        }
        Ok(())
    }
}

/// Place root panel: selects SCADA or HMI as the active control location
/// (status1 bits 1 and 6).
pub(crate) struct RootPanel;

impl Behavior for RootPanel {
    fn step(&mut self, io: &DeviceIo<'_>) -> PlantResult<()> {
        let cmd = io.commands()?;
        if cmd.is_empty() {
            return Ok(());
        }
        let s2 = io.status1()?;
        if cmd.has(0) {
            s2.set_bit(1, true)?;
            s2.set_bit(6, false)?;
        }
        if cmd.has(1) {
            s2.set_bit(1, false)?;
            s2.set_bit(6, true)?;
        }
        Ok(())
    }
}

/// Four fan pairs. Control bits `2n` / `2n + 1` run and stop pair `n`,
/// whose run feedback sits in status0 bits `4n` and `4n + 2`.
pub(crate) struct VentilationFans;

const FAN_PAIRS: u8 = 4;

impl Behavior for VentilationFans {
    fn step(&mut self, io: &DeviceIo<'_>) -> PlantResult<()> {
        let cmd = io.commands()?;
        if cmd.is_empty() {
            return Ok(());
        }
        let s1 = io.status0()?;

        for pair in 0..FAN_PAIRS {
            let (run, stop) = (2 * pair, 2 * pair + 1);
            let feedback = [4 * pair, 4 * pair + 2];
            if cmd.has(run) {
                for bit in feedback {
                    s1.set_bit(bit, true)?;
                }
            }
            if cmd.has(stop) {
                for bit in feedback {
                    s1.set_bit(bit, false)?;
                }
            }
        }
        if cmd.has(9) {
            s1.set_range(0, 11, 0)?;
        }
        apply_mode_commands(cmd, &io.status1()?, 10, 11)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::super::Simulator;
    use crate::device::DeviceKind;

    #[tokio::test]
    async fn test_screen_manual_commands() {
        let (device, store) = device(DeviceKind::ScreenPackage, &[], &[]);
        let mut sim = Simulator::new(&device, &store).unwrap();

        command(&device, &store, 0);
        sim.simulate(&device, &store).unwrap();
        assert_eq!(status0(&device, &store), 0b01 << 3);

        command(&device, &store, 2);
        sim.simulate(&device, &store).unwrap();
        assert_eq!(status0(&device, &store), (0b01 << 3) | (0b01 << 9));

        set_status0(&device, &store, 0xFFFF & !(1 << 15));
        command(&device, &store, 4);
        sim.simulate(&device, &store).unwrap();
        let status = status0(&device, &store);
        for bit in [2, 5, 8, 11] {
            assert_eq!((status >> bit) & 1, 0, "fault bit {}", bit);
        }
        assert_eq!((status >> 3) & 0b11, 0b10);
        assert_eq!((status >> 9) & 0b11, 0b10);
    }

    #[tokio::test]
    async fn test_screen_auto_follows_schedule() {
        let (device, store) = device(DeviceKind::ScreenPackage, &[], &[]);
        let mut sim = Simulator::new(&device, &store).unwrap();
        set_status1(&device, &store, 0b001);

        command(&device, &store, 14);
        sim.simulate(&device, &store).unwrap();
        assert_eq!(status0(&device, &store), (0b01 << 3) | (0b10 << 9));

        release(&device, &store);
        sim.simulate(&device, &store).unwrap();
        assert_eq!(status0(&device, &store), (0b10 << 3) | (0b10 << 9));
    }

    #[tokio::test]
    async fn test_root_control_location() {
        let (device, store) = device(DeviceKind::Root, &[], &[]);
        let mut sim = Simulator::new(&device, &store).unwrap();
        command(&device, &store, 0);
        sim.simulate(&device, &store).unwrap();
        assert_eq!(status1(&device, &store), 1 << 1);
        command(&device, &store, 1);
        sim.simulate(&device, &store).unwrap();
        assert_eq!(status1(&device, &store), 1 << 6);
    }

    #[tokio::test]
    async fn test_fan_pairs() {
        let (device, store) = device(DeviceKind::VentilationFans, &[], &[]);
        let mut sim = Simulator::new(&device, &store).unwrap();

        command(&device, &store, 0);
        sim.simulate(&device, &store).unwrap();
        assert_eq!(status0(&device, &store), 0b101);

        command(&device, &store, 6);
        sim.simulate(&device, &store).unwrap();
        assert_eq!(status0(&device, &store), 0b101 | (0b101 << 12));

        command(&device, &store, 1);
        sim.simulate(&device, &store).unwrap();
        assert_eq!(status0(&device, &store), 0b101 << 12);

        set_status0(&device, &store, 0xFFFF);
        command(&device, &store, 9);
        sim.simulate(&device, &store).unwrap();
        assert_eq!(status0(&device, &store), 0xF000);

        command(&device, &store, 11);
        sim.simulate(&device, &store).unwrap();
        assert_eq!(status1(&device, &store), 0b100);
    }
}
