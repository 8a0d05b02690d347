//! Sensor behaviors. Every sensor refreshes its reading once per noise
//! period around the value captured when simulation was enabled.

use crate::constants::NOISE_UPDATE_PERIOD;
use crate::error::PlantResult;
use crate::task_slot::TaskSlot;

use super::{jitter, run_periodic, Behavior, DeviceIo};

/// Half amplitude of the level oscillation, in steps.
const LEVEL_STEPS: i32 = 25;

/// Divisor turning one flow reading into a total increment.
const TOTALIZER_DIVISOR: f64 = 36.0;

// ============================================================================
// Level
// ============================================================================

/// Triangle wave between `-LEVEL_STEPS` and `LEVEL_STEPS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Oscillator {
    counter: i32,
    rising: bool,
}

impl Oscillator {
    fn new() -> Self {
        Self {
            counter: 0,
            rising: true,
        }
    }

    /// Step once and return the position as a fraction in `-1.0..=1.0`.
    fn advance(&mut self) -> f64 {
        self.counter += if self.rising { 1 } else { -1 };
        if self.counter >= LEVEL_STEPS {
            self.rising = false;
        }
        if self.counter <= -LEVEL_STEPS {
            self.rising = true;
        }
        f64::from(self.counter) / f64::from(LEVEL_STEPS)
    }
}

/// Level transmitter. Analog 0 is the level, settings 0..=3 the LL, LH, HL
/// and HH thresholds mirrored to status0 bits 0..=3.
pub(crate) struct LevelSensor {
    reference: f64,
    wave: Oscillator,
    values: TaskSlot,
}

impl LevelSensor {
    pub(crate) fn new(io: &DeviceIo<'_>) -> PlantResult<Self> {
        io.setting_value(3)?;
        Ok(Self {
            reference: io.analog_value(0)?,
            wave: Oscillator::new(),
            values: TaskSlot::new("level values"),
        })
    }
}

impl Behavior for LevelSensor {
    fn step(&mut self, io: &DeviceIo<'_>) -> PlantResult<()> {
        let scale = io.sim_scale();
        let reference = self.reference;
        let wave = &mut self.wave;
        run_periodic(&mut self.values, NOISE_UPDATE_PERIOD, || {
            let position = wave.advance();
            io.set_analog(0, reference + reference * scale * position)
        })?;

        let level = io.analog_value(0)?;
        let s1 = io.status0()?;
        for alarm in 0..4u8 {
            s1.set_bit(alarm, level > io.setting_value(usize::from(alarm))?)?;
        }
        Ok(())
    }

    fn cancel(&mut self) {
        self.values.cancel();
    }

    fn is_busy(&self) -> bool {
        self.values.is_running()
    }
}

// ============================================================================
// Totalizing
// ============================================================================

/// Flow meter with a running total. Analog 0 is the flow, analog 1 the
/// total.
pub(crate) struct TotalizingSensor {
    reference: f64,
    values: TaskSlot,
}

impl TotalizingSensor {
    pub(crate) fn new(io: &DeviceIo<'_>) -> PlantResult<Self> {
        io.analog(1)?;
        Ok(Self {
            reference: io.analog_value(0)?,
            values: TaskSlot::new("totalizer values"),
        })
    }
}

impl Behavior for TotalizingSensor {
    fn step(&mut self, io: &DeviceIo<'_>) -> PlantResult<()> {
        let scale = io.sim_scale();
        let reference = self.reference;
        run_periodic(&mut self.values, NOISE_UPDATE_PERIOD, || {
            io.set_analog(0, jitter(reference, scale))?;
            let increment = (io.analog_value(0)? / TOTALIZER_DIVISOR).trunc();
            io.set_analog(1, io.analog_value(1)? + increment)
        })
    }

    fn cancel(&mut self) {
        self.values.cancel();
    }

    fn is_busy(&self) -> bool {
        self.values.is_running()
    }
}

// ============================================================================
// Analog
// ============================================================================

/// Plain transmitter: analog 0 perturbed around its reference.
pub(crate) struct AnalogSensor {
    reference: f64,
    values: TaskSlot,
}

impl AnalogSensor {
    pub(crate) fn new(io: &DeviceIo<'_>) -> PlantResult<Self> {
        Ok(Self {
            reference: io.analog_value(0)?,
            values: TaskSlot::new("analog values"),
        })
    }
}

impl Behavior for AnalogSensor {
    fn step(&mut self, io: &DeviceIo<'_>) -> PlantResult<()> {
        let scale = io.sim_scale();
        let reference = self.reference;
        run_periodic(&mut self.values, NOISE_UPDATE_PERIOD, || {
            io.set_analog(0, jitter(reference, scale))
        })
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
    use super::*;
    use crate::device::DeviceKind;
    use std::time::Duration;
    use tokio::time::sleep;

    #[test]
    fn test_oscillator_turns_at_the_limits() {
        let mut wave = Oscillator::new();
        for _ in 0..LEVEL_STEPS {
            wave.advance();
        }
        assert_eq!(wave.counter, LEVEL_STEPS);
        assert_eq!(wave.advance(), f64::from(LEVEL_STEPS - 1) / f64::from(LEVEL_STEPS));
        for _ in 0..(2 * LEVEL_STEPS - 1) {
            wave.advance();
        }
        assert_eq!(wave.counter, -LEVEL_STEPS);
        assert!(wave.rising);
        assert!(wave.advance() > -1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_level_alarms_follow_thresholds() {
        let (device, store) = device(DeviceKind::SensorLevel, &[50.0], &[10.0, 45.0, 50.1, 90.0]);
        let mut sim = Simulator::new(&device, &store).unwrap();

        sim.simulate(&device, &store).unwrap();
        assert_eq!(analog(&device, &store, 0), 50.2);
        assert_eq!(status0(&device, &store), 0b0111);

        sleep(Duration::from_millis(2100)).await;
        sim.simulate(&device, &store).unwrap();
        assert_eq!(analog(&device, &store, 0), 50.4);

        // a level written from outside is compared on the next tick
        set_analog(&device, &store, 0, 95.0);
        sim.simulate(&device, &store).unwrap();
        assert_eq!(status0(&device, &store), 0b1111);
    }

    #[tokio::test(start_paused = true)]
    async fn test_level_requires_thresholds() {
        let (device, store) = device(DeviceKind::SensorLevel, &[50.0], &[10.0]);
        assert!(Simulator::new(&device, &store).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_totalizer_accumulates() {
        let (device, store) = device(DeviceKind::SensorTotalizing, &[360.0, 100.0], &[]);
        let mut sim = Simulator::new(&device, &store).unwrap();

        sim.simulate(&device, &store).unwrap();
        let flow = analog(&device, &store, 0);
        assert!((324.0..=396.0).contains(&flow), "flow {}", flow);
        let total = analog(&device, &store, 1);
        assert!((109.0..=111.0).contains(&total), "total {}", total);

        // one update per period
        sim.simulate(&device, &store).unwrap();
        assert_eq!(analog(&device, &store, 1), total);

        sim.restore(&device, &store).unwrap();
        assert_eq!(analog(&device, &store, 0), 360.0);
        assert_eq!(analog(&device, &store, 1), 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_analog_sensor_noise() {
        let (device, store) = device(DeviceKind::SensorAnalog, &[20.0], &[]);
        let mut sim = Simulator::new(&device, &store).unwrap();
        for _ in 0..10 {
            sim.simulate(&device, &store).unwrap();
            let value = analog(&device, &store, 0);
            assert!((17.9..=22.1).contains(&value), "value {}", value);
            assert!(sim.is_busy());
            sleep(Duration::from_millis(2100)).await;
        }
    }
}
