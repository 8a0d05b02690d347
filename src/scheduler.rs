//! # Plant Runtime and Scheduler
//!
//! [`PlantRuntime`] is the write surface of the simulator: device lookup,
//! tag reads and writes, preload control and simulation enable/disable. It
//! owns the enabled [`Simulator`]s, keyed by [`DeviceRef`].
//!
//! Two loops share one runtime behind a single async mutex:
//!
//! | Loop | Period | Work under the lock |
//! |------|--------|---------------------|
//! | [`Scheduler`] | 250 ms | one [`PlantRuntime::tick`] |
//! | [`Poller`] | 250 ms | one [`DeviceSnapshot`] of the selected device |
//!
//! The lock is held for a whole tick or sample, so a display sample never
//! observes a tick half applied. Timed sub-operations run as their own tasks
//! and only touch the register store, which is atomic per call.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::constants::display_address;
use crate::device::{Device, DeviceKind, PreloadCategory, PreloadFlags, TagGroup, VectorSlot};
use crate::error::{PlantError, PlantResult};
use crate::plant::{DeviceRef, Plant};
use crate::sim::Simulator;
use crate::store::RegisterStore;
use crate::value::TagValue;

/// Runtime shared by the scheduler, the poller and the front end.
pub type SharedRuntime = Arc<Mutex<PlantRuntime>>;

// ============================================================================
// Reports and snapshots
// ============================================================================

/// A simulator step that failed during a tick.
#[derive(Debug)]
pub struct TickFailure {
    pub device: DeviceRef,
    pub alias: String,
    pub error: PlantError,
}

/// Outcome of one scheduler tick.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Simulators stepped, including the ones that failed.
    pub simulated: usize,
    pub failures: Vec<TickFailure>,
}

impl TickReport {
    #[inline]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One named tag value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedValue {
    pub name: String,
    pub value: TagValue,
}

/// Decoded state of one device at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    pub place: String,
    pub alias: String,
    pub name: String,
    pub kind: DeviceKind,
    /// Start address in 4xxxxx notation.
    pub address: u32,
    pub status0: Option<u16>,
    pub status1: Option<u16>,
    pub control: Option<u16>,
    pub analog: Vec<NamedValue>,
    pub settings: Vec<NamedValue>,
    pub preload: PreloadFlags,
    pub sim_scale: f64,
    pub simulating: bool,
    pub sampled_at: DateTime<Utc>,
}

fn named_values(device: &Device, group: TagGroup, store: &RegisterStore) -> Vec<NamedValue> {
    device
        .tag_names(group)
        .iter()
        .zip(device.read_tags(group, store))
        .map(|(name, value)| NamedValue {
            name: name.clone(),
            value,
        })
        .collect()
}

// ============================================================================
// Runtime
// ============================================================================

/// Plant, register bank and the simulators currently enabled.
#[derive(Debug)]
pub struct PlantRuntime {
    plant: Plant,
    store: RegisterStore,
    simulators: BTreeMap<DeviceRef, Simulator>,
    selected: Option<DeviceRef>,
}

impl PlantRuntime {
    pub fn new(plant: Plant, store: RegisterStore) -> Self {
        Self {
            plant,
            store,
            simulators: BTreeMap::new(),
            selected: None,
        }
    }

    /// Wrap the runtime for sharing between loops.
    pub fn into_shared(self) -> SharedRuntime {
        Arc::new(Mutex::new(self))
    }

    #[inline]
    pub fn plant(&self) -> &Plant {
        &self.plant
    }

    /// Handle to the register bank.
    #[inline]
    pub fn store(&self) -> &RegisterStore {
        &self.store
    }

    pub fn find(&self, place: &str, alias: &str) -> PlantResult<DeviceRef> {
        self.plant.find(place, alias)
    }

    pub fn device(&self, r: DeviceRef) -> PlantResult<&Device> {
        self.plant.device(r)
    }

    /// Decode every vector and tag of a device.
    pub fn snapshot(&self, r: DeviceRef) -> PlantResult<DeviceSnapshot> {
        let device = self.plant.device(r)?;
        let place = self
            .plant
            .places()
            .get(r.place)
            .map(|p| p.alias().to_string())
            .unwrap_or_default();
        let store = &self.store;
        let vector = |slot| device.vector(slot).map(|v| v.value(store));
        Ok(DeviceSnapshot {
            place,
            alias: device.alias().to_string(),
            name: device.name().to_string(),
            kind: device.kind(),
            address: display_address(device.address()),
            status0: vector(VectorSlot::Status0),
            status1: vector(VectorSlot::Status1),
            control: vector(VectorSlot::Control),
            analog: named_values(device, TagGroup::Analog, store),
            settings: named_values(device, TagGroup::Settings, store),
            preload: device.preload_flags(),
            sim_scale: device.sim_scale(),
            simulating: self.simulators.contains_key(&r),
            sampled_at: Utc::now(),
        })
    }

    // ========================================================================
    // Tag and vector access
    // ========================================================================

    pub fn tag_value(&self, r: DeviceRef, group: TagGroup, index: usize) -> PlantResult<TagValue> {
        Ok(self.plant.device(r)?.tag(group, index)?.read(&self.store))
    }

    /// Manual tag write. The category stops taking its declared values.
    pub fn set_tag_value(
        &mut self,
        r: DeviceRef,
        group: TagGroup,
        index: usize,
        value: f64,
    ) -> PlantResult<()> {
        let device = self.plant.device_mut(r)?;
        device.tag(group, index)?.set(&self.store, value);
        let category = match group {
            TagGroup::Analog => PreloadCategory::Analog,
            TagGroup::Settings => PreloadCategory::Settings,
        };
        device.preload.set(category, false);
        debug!("{} {}[{}] = {}", device.alias(), group.as_str(), index, value);
        Ok(())
    }

    pub fn vector(&self, r: DeviceRef, slot: VectorSlot) -> PlantResult<u16> {
        Ok(self
            .plant
            .device(r)?
            .require_vector(slot)?
            .value(&self.store))
    }

    /// Manual vector write. A status write stops the status preload.
    pub fn set_vector(&mut self, r: DeviceRef, slot: VectorSlot, value: u16) -> PlantResult<()> {
        let device = self.plant.device_mut(r)?;
        device.require_vector(slot)?.set_value(&self.store, value);
        if slot != VectorSlot::Control {
            device.preload.set(PreloadCategory::Status, false);
        }
        debug!("{} {} = {:#06x}", device.alias(), slot.as_str(), value);
        Ok(())
    }

    fn reject_while_simulating(&self, r: DeviceRef, what: &str) -> PlantResult<()> {
        if self.simulators.contains_key(&r) {
            let alias = self.plant.device(r)?.alias();
            return Err(PlantError::simulation(
                alias,
                format!("cannot change {} while simulation is enabled", what),
            ));
        }
        Ok(())
    }

    /// Enabling a category writes its declared values, disabling zeroes it.
    pub fn set_preload(
        &mut self,
        r: DeviceRef,
        category: PreloadCategory,
        enabled: bool,
    ) -> PlantResult<()> {
        self.reject_while_simulating(r, "preload")?;
        let device = self.plant.device_mut(r)?;
        device.preload.set(category, enabled);
        if enabled {
            device.load(category, &self.store);
        } else {
            device.clear(category, &self.store);
        }
        Ok(())
    }

    /// Set the noise amplitude, a fraction in `0.0..=1.0`.
    pub fn set_sim_scale(&mut self, r: DeviceRef, fraction: f64) -> PlantResult<()> {
        self.reject_while_simulating(r, "sim scale")?;
        let device = self.plant.device_mut(r)?;
        if !(0.0..=1.0).contains(&fraction) {
            return Err(PlantError::simulation(
                device.alias(),
                format!("sim scale {} outside 0..=1", fraction),
            ));
        }
        device.sim_scale = fraction;
        Ok(())
    }

    // ========================================================================
    // Simulation control
    // ========================================================================

    #[inline]
    pub fn is_simulating(&self, r: DeviceRef) -> bool {
        self.simulators.contains_key(&r)
    }

    /// Number of enabled simulators.
    #[inline]
    pub fn simulating_count(&self) -> usize {
        self.simulators.len()
    }

    /// Attach a simulator. Returns `false` when one is already attached.
    pub fn enable_simulation(&mut self, r: DeviceRef) -> PlantResult<bool> {
        if self.simulators.contains_key(&r) {
            return Ok(false);
        }
        let simulator = Simulator::new(self.plant.device(r)?, &self.store)?;
        self.simulators.insert(r, simulator);
        Ok(true)
    }

    /// Enable every device whose type allows simulation. Devices that fail
    /// to attach are logged and skipped. Returns the number enabled.
    pub fn enable_all(&mut self) -> usize {
        let refs: Vec<DeviceRef> = self.plant.device_refs().collect();
        let mut enabled = 0;
        for r in refs {
            let allowed = self
                .plant
                .device(r)
                .map(|d| d.simulation_allowed())
                .unwrap_or(false);
            if !allowed {
                continue;
            }
            match self.enable_simulation(r) {
                Ok(true) => enabled += 1,
                Ok(false) => {}
                Err(e) => warn!("Simulation not enabled: {}", e),
            }
        }
        enabled
    }

    /// Detach the simulator and restore its baseline. Returns `false` when
    /// none was attached.
    pub fn disable_simulation(&mut self, r: DeviceRef) -> PlantResult<bool> {
        let Some(mut simulator) = self.simulators.remove(&r) else {
            return Ok(false);
        };
        let device = self.plant.device(r)?;
        simulator.restore(device, &self.store)?;
        info!("Simulation disabled for {}", device.alias());
        Ok(true)
    }

    /// Step every enabled simulator once. A failing device is logged and
    /// reported; the others still run. A simulator that panics is reported
    /// the same way and detached.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        let mut panicked = Vec::new();
        let plant = &self.plant;
        let store = &self.store;
        for (r, simulator) in self.simulators.iter_mut() {
            report.simulated += 1;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                plant
                    .device(*r)
                    .and_then(|device| simulator.simulate(device, store))
            }));
            let result = match outcome {
                Ok(result) => result,
                Err(_) => {
                    panicked.push(*r);
                    Err(PlantError::simulation(simulator.alias(), "behavior panicked"))
                }
            };
            if let Err(error) = result {
                warn!("Tick failed for {}: {}", simulator.alias(), error);
                report.failures.push(TickFailure {
                    device: *r,
                    alias: simulator.alias().to_string(),
                    error,
                });
            }
        }
        for r in panicked {
            if let Some(simulator) = self.simulators.remove(&r) {
                error!("Simulation detached from {}", simulator.alias());
            }
        }
        report
    }

    // ========================================================================
    // Display selection
    // ========================================================================

    pub fn select(&mut self, r: Option<DeviceRef>) -> PlantResult<()> {
        if let Some(r) = r {
            self.plant.device(r)?;
        }
        self.selected = r;
        Ok(())
    }

    #[inline]
    pub fn selected(&self) -> Option<DeviceRef> {
        self.selected
    }

    /// Snapshot of the selected device, if any.
    pub fn sample(&self) -> Option<DeviceSnapshot> {
        let r = self.selected?;
        match self.snapshot(r) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("Sample failed: {}", e);
                None
            }
        }
    }
}

// ============================================================================
// Loops
// ============================================================================

/// Fixed-period tick loop.
#[derive(Debug, Clone)]
pub struct Scheduler {
    runtime: SharedRuntime,
    period: Duration,
}

impl Scheduler {
    pub fn new(runtime: SharedRuntime, period: Duration) -> Self {
        Self { runtime, period }
    }

    /// Tick until `shutdown` turns true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Scheduler started, period {:?}", self.period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.runtime.lock().await.tick();
                    if !report.is_clean() {
                        debug!(
                            "Tick: {} simulated, {} failed",
                            report.simulated,
                            report.failures.len()
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Scheduler stopped");
    }
}

/// Polling reader publishing the selected device's state.
#[derive(Debug)]
pub struct Poller {
    runtime: SharedRuntime,
    period: Duration,
    publisher: watch::Sender<Option<DeviceSnapshot>>,
}

impl Poller {
    /// Create a poller and the receiver its samples are published on.
    pub fn new(
        runtime: SharedRuntime,
        period: Duration,
    ) -> (Self, watch::Receiver<Option<DeviceSnapshot>>) {
        let (publisher, samples) = watch::channel(None);
        (
            Self {
                runtime,
                period,
                publisher,
            },
            samples,
        )
    }

    /// Sample until `shutdown` turns true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let sample = self.runtime.lock().await.sample();
                    self.publisher.send_replace(sample);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Poller stopped");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Topology;

    const PROJECT: &str = r#"{"Project Name": "Test", "AddressCount": 31}"#;

    const DEVICES: &str = r#"{
        "Root": {"Status01": [], "Status02": ["SCADA", "HMI"], "Control01": ["SCADA", "HMI"],
                 "Analog": [], "Settings": [], "Registers": 5, "EnableSimulate": true},
        "Sensor-Analog": {"Status01": ["Fault"], "Status02": [], "Control01": [],
                          "Analog": [{"name": "Value", "type": "int", "dp": 1}],
                          "Settings": [{"name": "Offset", "type": "Sint", "dp": 1}],
                          "Registers": 6, "EnableSimulate": true},
        "PID Control": {"Status01": ["Run"], "Status02": [], "Control01": [],
                        "Analog": [{"name": "PV", "type": "int", "dp": 1}],
                        "Settings": [], "Registers": 10, "EnableSimulate": true},
        "Screen Package": {"Status01": ["Open"], "Status02": ["Auto"], "Control01": ["Open"],
                           "Analog": [], "Settings": [], "Registers": 5, "EnableSimulate": false},
        "Motor-Normal": {"Status01": ["Run"], "Status02": null, "Control01": ["Start"],
                         "Analog": [], "Settings": [], "Registers": 5, "EnableSimulate": true}
    }"#;

    const PLACES: &str = r#"{
        "WTP": {
            "WTP": {"name": "Water Plant", "address": 0, "type": "Root", "parent": null},
            "WTP_Flow": {"name": "Flow", "address": 5, "type": "Sensor-Analog", "parent": "WTP",
                         "analog": [40.0], "settings": [-1.5], "simscale": 0.1},
            "WTP_Loop": {"name": "Loop", "address": 11, "type": "PID Control", "parent": "WTP"},
            "WTP_Screen": {"name": "Screen", "address": 21, "type": "Screen Package", "parent": "WTP"},
            "WTP_Pump": {"name": "Pump", "address": 26, "type": "Motor-Normal", "parent": "WTP"}
        }
    }"#;

    fn runtime() -> PlantRuntime {
        let topology = Topology::from_json_strs(PROJECT, DEVICES, PLACES).unwrap();
        let store = RegisterStore::new(100);
        let plant = Plant::build(&topology, &store).unwrap();
        PlantRuntime::new(plant, store)
    }

    #[test]
    fn test_snapshot_decodes_device() {
        let rt = runtime();
        let flow = rt.find("WTP", "WTP_Flow").unwrap();
        let snapshot = rt.snapshot(flow).unwrap();
        assert_eq!(snapshot.place, "WTP");
        assert_eq!(snapshot.kind, DeviceKind::SensorAnalog);
        assert_eq!(snapshot.address, 400_005);
        assert_eq!(snapshot.status0, Some(0));
        assert_eq!(snapshot.control, None);
        assert_eq!(snapshot.analog[0].name, "Value");
        assert_eq!(snapshot.analog[0].value, TagValue::Int(0.0));
        assert_eq!(snapshot.settings[0].value, TagValue::SignedInt(-1.5));
        assert!(!snapshot.simulating);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["kind"], "SensorAnalog");
    }

    #[test]
    fn test_manual_writes_clear_preload() {
        let mut rt = runtime();
        let flow = rt.find("WTP", "WTP_Flow").unwrap();

        rt.set_tag_value(flow, TagGroup::Settings, 0, 2.5).unwrap();
        assert_eq!(
            rt.tag_value(flow, TagGroup::Settings, 0).unwrap(),
            TagValue::SignedInt(2.5)
        );
        assert!(!rt.device(flow).unwrap().preload_flags().settings);

        rt.set_vector(flow, VectorSlot::Status0, 0b11).unwrap();
        assert_eq!(rt.vector(flow, VectorSlot::Status0).unwrap(), 0b11);
        assert!(!rt.device(flow).unwrap().preload_flags().status);

        assert!(rt.set_vector(flow, VectorSlot::Control, 1).is_err());
        assert!(rt.tag_value(flow, TagGroup::Analog, 3).is_err());
    }

    #[test]
    fn test_preload_toggle() {
        let mut rt = runtime();
        let flow = rt.find("WTP", "WTP_Flow").unwrap();

        rt.set_preload(flow, PreloadCategory::Analog, true).unwrap();
        assert_eq!(rt.tag_value(flow, TagGroup::Analog, 0).unwrap(), TagValue::Int(40.0));

        rt.set_preload(flow, PreloadCategory::Settings, false).unwrap();
        assert_eq!(
            rt.tag_value(flow, TagGroup::Settings, 0).unwrap(),
            TagValue::SignedInt(0.0)
        );
    }

    #[tokio::test]
    async fn test_enable_disable_restores_baseline() {
        let mut rt = runtime();
        let flow = rt.find("WTP", "WTP_Flow").unwrap();
        rt.set_preload(flow, PreloadCategory::Analog, true).unwrap();

        assert!(rt.enable_simulation(flow).unwrap());
        assert!(!rt.enable_simulation(flow).unwrap());
        assert!(rt.is_simulating(flow));
        assert!(rt.set_sim_scale(flow, 0.5).is_err());
        assert!(rt.set_preload(flow, PreloadCategory::Analog, false).is_err());

        let report = rt.tick();
        assert_eq!(report.simulated, 1);
        assert!(report.is_clean());

        assert!(rt.disable_simulation(flow).unwrap());
        assert!(!rt.disable_simulation(flow).unwrap());
        assert_eq!(rt.tag_value(flow, TagGroup::Analog, 0).unwrap(), TagValue::Int(40.0));
        rt.set_sim_scale(flow, 0.5).unwrap();
        assert_eq!(rt.device(flow).unwrap().sim_scale(), 0.5);
        assert!(rt.set_sim_scale(flow, 1.5).is_err());
    }

    #[tokio::test]
    async fn test_enable_rejects_disallowed_type() {
        let mut rt = runtime();
        let screen = rt.find("WTP", "WTP_Screen").unwrap();
        assert!(matches!(
            rt.enable_simulation(screen),
            Err(PlantError::SimulationUnsupported { .. })
        ));
        // the pid loop lacks its output tag and is skipped
        assert_eq!(rt.enable_all(), 3);
        let pid = rt.find("WTP", "WTP_Loop").unwrap();
        assert!(!rt.is_simulating(pid));
    }

    #[tokio::test]
    async fn test_tick_isolates_failures() {
        let mut rt = runtime();
        let root = rt.find("WTP", "WTP").unwrap();
        let pump = rt.find("WTP", "WTP_Pump").unwrap();
        rt.enable_simulation(root).unwrap();
        rt.enable_simulation(pump).unwrap();

        // the pump has no status1 vector to apply a start command to
        rt.set_vector(pump, VectorSlot::Control, 0b1).unwrap();
        rt.set_vector(root, VectorSlot::Control, 0b1).unwrap();
        let report = rt.tick();
        assert_eq!(report.simulated, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].alias, "WTP_Pump");
        assert!(matches!(
            report.failures[0].error,
            PlantError::MissingVector { .. }
        ));
        assert_eq!(rt.vector(root, VectorSlot::Status1).unwrap(), 0b10);

        let report = rt.tick();
        assert_eq!(report.failures.len(), 1);
        assert!(rt.is_simulating(pump));
    }

    #[tokio::test]
    async fn test_tick_detaches_panicking_simulator() {
        let mut rt = runtime();
        let root = rt.find("WTP", "WTP").unwrap();
        let flow = rt.find("WTP", "WTP_Flow").unwrap();
        rt.enable_simulation(root).unwrap();
        rt.enable_simulation(flow).unwrap();
        // amplitude whose noise interval overflows the sampler
        rt.plant.device_mut(flow).unwrap().sim_scale = 1e308;

        rt.set_vector(root, VectorSlot::Control, 0b1).unwrap();
        let report = rt.tick();
        assert_eq!(report.simulated, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].alias, "WTP_Flow");
        assert!(matches!(
            report.failures[0].error,
            PlantError::Simulation { .. }
        ));
        assert_eq!(rt.vector(root, VectorSlot::Status1).unwrap(), 0b10);

        assert!(!rt.is_simulating(flow));
        assert!(rt.is_simulating(root));
        let report = rt.tick();
        assert_eq!(report.simulated, 1);
        assert!(report.is_clean());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_and_poller_loops() {
        let mut rt = runtime();
        let root = rt.find("WTP", "WTP").unwrap();
        rt.enable_simulation(root).unwrap();
        rt.select(Some(root)).unwrap();
        rt.set_vector(root, VectorSlot::Control, 0b10).unwrap();
        let shared = rt.into_shared();

        let (stop_tx, stop_rx) = watch::channel(false);
        let scheduler = tokio::spawn(
            Scheduler::new(shared.clone(), Duration::from_millis(250)).run(stop_rx.clone()),
        );
        let (poller, mut samples) = Poller::new(shared.clone(), Duration::from_millis(250));
        let poller = tokio::spawn(poller.run(stop_rx));

        tokio::time::sleep(Duration::from_millis(600)).await;
        samples.changed().await.unwrap();
        let sample = samples.borrow().clone().unwrap();
        assert_eq!(sample.alias, "WTP");
        assert_eq!(sample.status1, Some(1 << 6));
        assert!(sample.simulating);

        stop_tx.send(true).unwrap();
        scheduler.await.unwrap();
        poller.await.unwrap();
    }
}
