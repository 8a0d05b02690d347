//! # Rapid Sand Filter
//!
//! Backwash sequencer with four timed phases followed by a standby period.
//!
//! ## Status0
//!
//! | Bits | Meaning |
//! |------|---------|
//! | 0..=1 | `01` filtering, `10` backwash, `00` stopped |
//! | 2..=6 | phase: drawdown, air, air+water, water, standby (one-hot) |
//! | 6 | also set while shut down |
//! | 7 | backwash paused |
//! | 15 | out of service |
//!
//! ## Tags
//!
//! | Tag | Meaning |
//! |-----|---------|
//! | settings 0..=3 | drawdown, air, air+water, water durations (s) |
//! | setting 4 | standby duration (s) |
//! | setting 5 | filtering run time before backwash is due (s) |
//! | analog 2..=5 | elapsed time of the active phase |
//! | analog 6 | standby elapsed |
//! | analog 7 / 8 | filtering elapsed / remaining |
//!
//! One counter advances per second while the backwash runs. Phase
//! boundaries are the running sums of the phase durations; pausing freezes
//! the counter without stopping the sequence.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::constants::SECOND;
use crate::error::PlantResult;
use crate::store::RegisterStore;
use crate::tag::{BitVector, Tag};
use crate::task_slot::TaskSlot;

use super::{apply_service_commands, run_periodic, Behavior, DeviceIo};

/// Standby elapsed counter saturates here.
const STANDBY_LIMIT: u32 = 65_000;

/// First analog of the phase elapsed block (drawdown).
const PHASE_TAG_BASE: usize = 2;
const STANDBY_TAG: usize = 6;
const FILTERING_ELAPSED_TAG: usize = 7;
const FILTERING_REMAINING_TAG: usize = 8;
const WAIT_SETTING: usize = 5;

// ============================================================================
// Backwash plan
// ============================================================================

/// Phase durations read when a backwash starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct BackwashPlan {
    pub drawdown: f64,
    pub air: f64,
    pub air_water: f64,
    pub water: f64,
    pub standby: f64,
}

/// Where the sequence is for a given counter value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Stage {
    /// Phase index 0..=3 and seconds elapsed in it.
    Phase(usize, f64),
    Standby(f64),
    Done,
}

impl BackwashPlan {
    fn read(io: &DeviceIo<'_>) -> PlantResult<Self> {
        Ok(Self {
            drawdown: io.setting_value(0)?,
            air: io.setting_value(1)?,
            air_water: io.setting_value(2)?,
            water: io.setting_value(3)?,
            standby: io.setting_value(4)?,
        })
    }

    /// End of the four phases.
    pub(crate) fn total(&self) -> f64 {
        self.drawdown + self.air + self.air_water + self.water
    }

    pub(crate) fn stage(&self, counter: u32) -> Stage {
        let at = f64::from(counter);
        let mut start = 0.0;
        for (index, duration) in [self.drawdown, self.air, self.air_water, self.water]
            .into_iter()
            .enumerate()
        {
            let end = start + duration;
            if at <= end {
                return Stage::Phase(index, at - start);
            }
            start = end;
        }
        if at <= self.total() + self.standby {
            Stage::Standby(at - self.total())
        } else {
            Stage::Done
        }
    }
}

/// State shared between the tick and the backwash task.
#[derive(Debug, Default)]
struct Sequence {
    counter: u32,
    paused: bool,
    filtering: u32,
}

type SharedSequence = Arc<Mutex<Sequence>>;

fn lock(sequence: &SharedSequence) -> MutexGuard<'_, Sequence> {
    sequence.lock().unwrap_or_else(PoisonError::into_inner)
}

fn log_dropped(result: PlantResult<()>) {
    if let Err(e) = result {
        warn!("RSF status update dropped: {}", e);
    }
}

/// The backwash task. `tags` are analogs 2..=6.
async fn backwash(
    store: RegisterStore,
    status: BitVector,
    tags: [Tag; 5],
    plan: BackwashPlan,
    sequence: SharedSequence,
) {
    loop {
        let counter = lock(&sequence).counter;
        match plan.stage(counter) {
            Stage::Phase(index, elapsed) => {
                log_dropped(status.set_range(&store, 2, 6, 1 << index));
                if index > 0 {
                    tags[index - 1].set(&store, 0.0);
                }
                tags[index].set(&store, elapsed);
            }
            Stage::Standby(elapsed) => {
                log_dropped(status.set_range(&store, 2, 6, 0b10000));
                tags[3].set(&store, 0.0);
                tags[4].set(&store, elapsed);
            }
            Stage::Done => break,
        }
        {
            let mut sequence = lock(&sequence);
            if !sequence.paused {
                sequence.counter += 1;
            }
        }
        sleep(SECOND).await;
    }

    tags[4].set(&store, 0.0);
    {
        let mut sequence = lock(&sequence);
        sequence.counter = 0;
        sequence.filtering = 0;
    }
    log_dropped(status.set_range(&store, 0, 1, 0b01));
    log_dropped(status.set_bit(&store, 6, false));
    debug!("Backwash complete");
}

// ============================================================================
// Behavior
// ============================================================================

pub(crate) struct Rsf {
    sequence: SharedSequence,
    standby_counter: u32,
    backwash: TaskSlot,
    filtering: TaskSlot,
    standby: TaskSlot,
}

impl Rsf {
    pub(crate) fn new(io: &DeviceIo<'_>) -> PlantResult<Self> {
        io.setting_value(WAIT_SETTING)?;
        io.analog(FILTERING_REMAINING_TAG)?;
        Ok(Self {
            sequence: SharedSequence::default(),
            standby_counter: 0,
            backwash: TaskSlot::new("rsf backwash"),
            filtering: TaskSlot::new("rsf filtering"),
            standby: TaskSlot::new("rsf standby"),
        })
    }

    fn start_backwash(&mut self, io: &DeviceIo<'_>) -> PlantResult<()> {
        if self.backwash.is_running() {
            return Ok(());
        }
        let plan = BackwashPlan::read(io)?;
        let s1 = io.status0()?;
        s1.set_range(0, 1, 0b10)?;

        let mut tags = [io.analog(PHASE_TAG_BASE)?; 5];
        for (offset, tag) in tags.iter_mut().enumerate().skip(1) {
            *tag = io.analog(PHASE_TAG_BASE + offset)?;
        }
        debug!(
            "{}: backwash {:.0}s + {:.0}s standby",
            io.alias(),
            plan.total(),
            plan.standby
        );
        self.backwash.launch(backwash(
            io.store().clone(),
            s1.vector(),
            tags,
            plan,
            self.sequence.clone(),
        ));
        Ok(())
    }
}

impl Behavior for Rsf {
    fn step(&mut self, io: &DeviceIo<'_>) -> PlantResult<()> {
        let cmd = io.commands()?;
        let s1 = io.status0()?;
        let s2 = io.status1()?;

        // startup / shutdown
        if cmd.has(0) {
            s1.set_range(0, 1, 0b01)?;
            s1.set_bit(6, false)?;
        }
        if cmd.has(1) {
            s1.set_range(0, 1, 0b00)?;
            s1.set_bit(6, true)?;
        }
        if cmd.has(2) {
            self.start_backwash(io)?;
        }
        if s1.bit(1) {
            if cmd.has(3) {
                lock(&self.sequence).paused = true;
                s1.set_bit(7, true)?;
            }
            if cmd.has(4) {
                lock(&self.sequence).paused = false;
                s1.set_bit(7, false)?;
            }
            if cmd.has(5) {
                {
                    let mut sequence = lock(&self.sequence);
                    sequence.paused = false;
                    sequence.counter = 0;
                }
                s1.set_bit(7, false)?;
                s1.set_range(2, 6, 0b00000)?;
            }
        }

        // auto / semi-auto / manual, bits 5..=6 hold the semi-auto source
        if cmd.has(6) {
            s2.set_range(0, 2, 0b001)?;
            s2.set_range(5, 6, 0b00)?;
        }
        if cmd.has(7) {
            s2.set_range(0, 2, 0b000)?;
            s2.set_range(5, 6, if s2.bit(11) { 0b01 } else { 0b10 })?;
        }
        if cmd.has(8) {
            s2.set_range(0, 2, if s2.bit(11) { 0b010 } else { 0b100 })?;
            s2.set_range(5, 6, 0b00)?;
        }
        apply_service_commands(cmd, &s1, 9, 10)?;

        // backwash trigger source: time, level, pressure
        for (bit, mode) in [(11, 0b001), (12, 0b010), (13, 0b100)] {
            if cmd.has(bit) {
                s2.set_range(8, 10, mode)?;
            }
        }

        if s1.bit(0) {
            let sequence = &self.sequence;
            run_periodic(&mut self.filtering, SECOND, || {
                let wait = io.setting_value(WAIT_SETTING)?;
                let mut sequence = lock(sequence);
                let elapsed = f64::from(sequence.filtering);
                io.set_analog(FILTERING_ELAPSED_TAG, elapsed)?;
                io.set_analog(FILTERING_REMAINING_TAG, wait - elapsed)?;
                if elapsed < wait {
                    sequence.filtering += 1;
                }
                Ok(())
            })?;
        }

        if s1.range(0, 1)? == 0 && s1.bit(6) {
            let counter = &mut self.standby_counter;
            run_periodic(&mut self.standby, SECOND, || {
                io.set_analog(STANDBY_TAG, f64::from(*counter))?;
                if *counter < STANDBY_LIMIT {
                    *counter += 1;
                }
                Ok(())
            })?;
        }
        if !s1.bit(6) {
            self.standby_counter = 0;
            io.set_analog(STANDBY_TAG, 0.0)?;
        }
        Ok(())
    }

    fn cancel(&mut self) {
        self.backwash.cancel();
        self.filtering.cancel();
        self.standby.cancel();
    }

    fn restore(&mut self, _io: &DeviceIo<'_>) -> PlantResult<()> {
        *lock(&self.sequence) = Sequence::default();
        self.standby_counter = 0;
        Ok(())
    }

    fn is_busy(&self) -> bool {
        self.backwash.is_running() || self.filtering.is_running() || self.standby.is_running()
    }
}
