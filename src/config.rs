//! # Topology and Runtime Configuration
//!
//! Three JSON documents describe a plant:
//!
//! | File | Content |
//! |------|---------|
//! | `project.json` | project name and the next free register address |
//! | `devices.json` | device-type templates: vectors, tag specs, reserved registers |
//! | `places.json` | `{ place: { device: decl } }`, order significant |
//!
//! The device whose alias equals its place alias is the place root and names
//! the place. Declaration order is preserved on load and save.
//!
//! The editing helpers on [`Topology`] are the data side of the configuration
//! editor: adding and removing devices, parent-first reordering and address
//! resequencing.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::constants::{DEFAULT_POLL_MS, DEFAULT_REGISTER_COUNT, DEFAULT_SIM_SCALE, DEFAULT_TICK_MS};
use crate::error::{PlantError, PlantResult};
use crate::tag::TagKind;
use crate::DEFAULT_TCP_PORT;

/// Type name of place root devices.
pub const ROOT_TYPE: &str = "Root";

pub const PROJECT_FILE: &str = "project.json";
pub const DEVICES_FILE: &str = "devices.json";
pub const PLACES_FILE: &str = "places.json";

// ============================================================================
// Documents
// ============================================================================

/// `project.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectDef {
    #[serde(rename = "Project Name", default)]
    pub project_name: String,
    /// Next free register address.
    #[serde(rename = "AddressCount", default)]
    pub address_count: u32,
}

/// Analog or setting entry of a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TagKind,
    /// Decimal points, used by `int` and `Sint`.
    #[serde(default)]
    pub dp: u8,
}

/// One entry of `devices.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceTemplate {
    #[serde(rename = "Status01", default)]
    pub status0: Option<Vec<String>>,
    #[serde(rename = "Status02", default)]
    pub status1: Option<Vec<String>>,
    #[serde(rename = "Control01", default)]
    pub control: Option<Vec<String>>,
    #[serde(rename = "Analog", default)]
    pub analog: Vec<TagSpec>,
    #[serde(rename = "Settings", default)]
    pub settings: Vec<TagSpec>,
    /// Registers reserved per device of this type.
    #[serde(rename = "Registers")]
    pub registers: u16,
    #[serde(rename = "EnableSimulate", default)]
    pub enable_simulate: bool,
}

#[inline]
fn declared(labels: &Option<Vec<String>>) -> bool {
    labels.as_ref().is_some_and(|l| !l.is_empty())
}

impl DeviceTemplate {
    pub fn has_status0(&self) -> bool {
        declared(&self.status0)
    }

    pub fn has_status1(&self) -> bool {
        declared(&self.status1)
    }

    pub fn has_control(&self) -> bool {
        declared(&self.control)
    }

    /// Registers the layout actually uses: three vector slots plus tag widths.
    pub fn footprint(&self) -> u32 {
        let tags: u32 = self
            .analog
            .iter()
            .chain(self.settings.iter())
            .map(|t| u32::from(t.kind.register_count()))
            .sum();
        3 + tags
    }
}

/// One device entry of `places.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDecl {
    pub name: String,
    pub address: u16,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub status01: Option<u16>,
    #[serde(default)]
    pub status02: Option<u16>,
    #[serde(default)]
    pub analog: Option<Vec<f64>>,
    #[serde(default)]
    pub settings: Option<Vec<f64>>,
    #[serde(default = "default_sim_scale")]
    pub simscale: f64,
}

fn default_sim_scale() -> f64 {
    DEFAULT_SIM_SCALE
}

impl DeviceDecl {
    /// Fresh declaration as created by the editor.
    pub fn new(name: &str, address: u16, type_name: &str, parent: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            address,
            type_name: type_name.to_string(),
            parent,
            link: None,
            status01: None,
            status02: None,
            analog: None,
            settings: None,
            simscale: DEFAULT_SIM_SCALE,
        }
    }
}

/// Device declaration with its alias.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceEntry {
    pub alias: String,
    pub decl: DeviceDecl,
}

/// One place of `places.json`.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceDecl {
    pub alias: String,
    pub devices: Vec<DeviceEntry>,
}

impl PlaceDecl {
    /// Display name, taken from the root device.
    pub fn name(&self) -> &str {
        self.device(&self.alias)
            .map(|d| d.name.as_str())
            .unwrap_or(self.alias.as_str())
    }

    pub fn device(&self, alias: &str) -> Option<&DeviceDecl> {
        self.devices.iter().find(|e| e.alias == alias).map(|e| &e.decl)
    }

    pub fn device_mut(&mut self, alias: &str) -> Option<&mut DeviceDecl> {
        self.devices
            .iter_mut()
            .find(|e| e.alias == alias)
            .map(|e| &mut e.decl)
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.devices.iter().any(|e| e.alias == alias)
    }

    /// Rename a device entry and every parent or link reference to it.
    fn rename_alias(&mut self, from: &str, to: &str) {
        if from == to {
            return;
        }
        for entry in &mut self.devices {
            if entry.alias == from {
                entry.alias = to.to_string();
            }
            for reference in [&mut entry.decl.parent, &mut entry.decl.link] {
                if reference.as_deref() == Some(from) {
                    *reference = Some(to.to_string());
                }
            }
        }
    }

    /// Reorder so that every device follows its parent. Devices without a
    /// parent come first, in their current order.
    pub fn reconfigure(&mut self) -> PlantResult<()> {
        let mut placed: HashSet<String> = HashSet::new();
        let mut ordered = Vec::with_capacity(self.devices.len());
        let mut pending: Vec<DeviceEntry> = Vec::new();

        for entry in self.devices.drain(..) {
            if entry.decl.parent.is_none() {
                placed.insert(entry.alias.clone());
                ordered.push(entry);
            } else {
                pending.push(entry);
            }
        }

        while !pending.is_empty() {
            let before = pending.len();
            let mut rest = Vec::new();
            for entry in pending {
                let ready = entry
                    .decl
                    .parent
                    .as_ref()
                    .is_some_and(|p| placed.contains(p));
                if ready {
                    placed.insert(entry.alias.clone());
                    ordered.push(entry);
                } else {
                    rest.push(entry);
                }
            }
            if rest.len() == before {
                let orphans: Vec<&str> = rest.iter().map(|e| e.alias.as_str()).collect();
                let message = format!(
                    "place {}: parents not found for {}",
                    self.alias,
                    orphans.join(", ")
                );
                ordered.extend(rest);
                self.devices = ordered;
                return Err(PlantError::configuration(message));
            }
            pending = rest;
        }

        self.devices = ordered;
        Ok(())
    }
}

/// `places.json`, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlacesDecl {
    pub places: Vec<PlaceDecl>,
}

impl PlacesDecl {
    pub fn from_json_str(json: &str) -> PlantResult<Self> {
        let root: Map<String, Value> = serde_json::from_str(json)?;
        let mut places = Vec::with_capacity(root.len());

        for (place_alias, devices) in root {
            let Value::Object(devices) = devices else {
                return Err(PlantError::configuration(format!(
                    "place {} is not an object",
                    place_alias
                )));
            };
            let mut entries = Vec::with_capacity(devices.len());
            for (alias, decl) in devices {
                let decl: DeviceDecl = serde_json::from_value(decl)?;
                entries.push(DeviceEntry { alias, decl });
            }
            places.push(PlaceDecl {
                alias: place_alias,
                devices: entries,
            });
        }

        Ok(Self { places })
    }

    pub fn to_json_string(&self) -> PlantResult<String> {
        let mut root = Map::new();
        for place in &self.places {
            let mut devices = Map::new();
            for entry in &place.devices {
                devices.insert(entry.alias.clone(), serde_json::to_value(&entry.decl)?);
            }
            root.insert(place.alias.clone(), Value::Object(devices));
        }
        Ok(serde_json::to_string_pretty(&Value::Object(root))?)
    }

    pub fn place(&self, alias: &str) -> Option<&PlaceDecl> {
        self.places.iter().find(|p| p.alias == alias)
    }

    pub fn place_mut(&mut self, alias: &str) -> Option<&mut PlaceDecl> {
        self.places.iter_mut().find(|p| p.alias == alias)
    }
}

// ============================================================================
// Topology
// ============================================================================

/// The three documents together.
#[derive(Debug, Clone)]
pub struct Topology {
    pub project: ProjectDef,
    pub templates: HashMap<String, DeviceTemplate>,
    pub places: PlacesDecl,
}

impl Topology {
    /// Parse the three documents.
    pub fn from_json_strs(project: &str, devices: &str, places: &str) -> PlantResult<Self> {
        Ok(Self {
            project: serde_json::from_str(project)?,
            templates: serde_json::from_str(devices)?,
            places: PlacesDecl::from_json_str(places)?,
        })
    }

    /// Load `project.json`, `devices.json` and `places.json` from a directory.
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> PlantResult<Self> {
        let dir = dir.as_ref();
        let read = |file: &str| -> PlantResult<String> {
            let path = dir.join(file);
            debug!("Loading {}", path.display());
            Ok(fs::read_to_string(path)?)
        };
        let topology = Self::from_json_strs(
            &read(PROJECT_FILE)?,
            &read(DEVICES_FILE)?,
            &read(PLACES_FILE)?,
        )?;
        info!(
            "Loaded project '{}': {} device types, {} places",
            topology.project.project_name,
            topology.templates.len(),
            topology.places.places.len()
        );
        Ok(topology)
    }

    /// Write `project.json` and `places.json` back to a directory.
    pub fn save_dir<P: AsRef<Path>>(&self, dir: P) -> PlantResult<()> {
        let dir = dir.as_ref();
        fs::write(
            dir.join(PROJECT_FILE),
            serde_json::to_string_pretty(&self.project)?,
        )?;
        fs::write(dir.join(PLACES_FILE), self.places.to_json_string()?)?;
        Ok(())
    }

    pub fn template(&self, type_name: &str) -> PlantResult<&DeviceTemplate> {
        self.templates
            .get(type_name)
            .ok_or_else(|| PlantError::UnknownDeviceType {
                type_name: type_name.to_string(),
            })
    }

    fn place_decl_mut(&mut self, place: &str) -> PlantResult<&mut PlaceDecl> {
        self.places
            .place_mut(place)
            .ok_or_else(|| PlantError::configuration(format!("place {} not found", place)))
    }

    fn next_address(&self) -> PlantResult<u16> {
        u16::try_from(self.project.address_count).map_err(|_| {
            PlantError::configuration(format!(
                "address count {} exceeds the register space",
                self.project.address_count
            ))
        })
    }

    // ========================================================================
    // Editing
    // ========================================================================

    /// Add a place with its Root device at the next free address.
    pub fn add_place(&mut self, name: &str, alias: &str) -> PlantResult<()> {
        if name.is_empty() || alias.is_empty() {
            return Err(PlantError::configuration("place name and alias are required"));
        }
        if self.places.place(alias).is_some() {
            return Err(PlantError::configuration(format!(
                "place alias {} already exists",
                alias
            )));
        }
        let registers = self.template(ROOT_TYPE)?.registers;
        let address = self.next_address()?;
        self.places.places.push(PlaceDecl {
            alias: alias.to_string(),
            devices: vec![DeviceEntry {
                alias: alias.to_string(),
                decl: DeviceDecl::new(name, address, ROOT_TYPE, None),
            }],
        });
        self.project.address_count += u32::from(registers);
        Ok(())
    }

    /// Add a device to a place and return its alias.
    ///
    /// The alias is `parent_name` (or `name` without a parent) with spaces
    /// replaced by underscores.
    pub fn add_device(
        &mut self,
        place: &str,
        name: &str,
        type_name: &str,
        parent: Option<&str>,
    ) -> PlantResult<String> {
        if name.is_empty() {
            return Err(PlantError::configuration("device name is required"));
        }
        if type_name == ROOT_TYPE {
            return Err(PlantError::configuration("cannot add another Root device"));
        }
        let registers = self.template(type_name)?.registers;
        let address = self.next_address()?;

        let alias = match parent {
            Some(parent) => format!("{}_{}", parent, name),
            None => name.to_string(),
        }
        .replace(' ', "_");

        let place_decl = self.place_decl_mut(place)?;
        if place_decl.contains(&alias) {
            return Err(PlantError::configuration(format!(
                "device alias {} already exists",
                alias
            )));
        }
        if let Some(parent) = parent {
            if !place_decl.contains(parent) {
                return Err(PlantError::device_not_found(place, parent));
            }
        }
        place_decl.devices.push(DeviceEntry {
            alias: alias.clone(),
            decl: DeviceDecl::new(name, address, type_name, parent.map(str::to_string)),
        });
        place_decl.reconfigure()?;
        self.project.address_count += u32::from(registers);
        Ok(alias)
    }

    /// Remove a device and its direct children. The place root stays.
    pub fn remove_device(&mut self, place: &str, alias: &str) -> PlantResult<()> {
        if place == alias {
            return Err(PlantError::configuration("cannot remove the Root device"));
        }
        let place_decl = self.place_decl_mut(place)?;
        if !place_decl.contains(alias) {
            return Err(PlantError::device_not_found(place, alias));
        }
        place_decl
            .devices
            .retain(|e| e.alias != alias && e.decl.parent.as_deref() != Some(alias));
        place_decl.reconfigure()
    }

    /// Remove a place and all its devices. Their addresses are not reused
    /// until [`Topology::resequence_addresses`] runs.
    pub fn remove_place(&mut self, alias: &str) -> PlantResult<()> {
        let before = self.places.places.len();
        self.places.places.retain(|p| p.alias != alias);
        if self.places.places.len() == before {
            return Err(PlantError::configuration(format!("place {} not found", alias)));
        }
        Ok(())
    }

    /// Rename a place. A new alias also renames the root device and every
    /// parent or link reference to it.
    pub fn rename_place(&mut self, alias: &str, name: &str, new_alias: Option<&str>) -> PlantResult<()> {
        if name.is_empty() {
            return Err(PlantError::configuration("place name is required"));
        }
        let new_alias = new_alias.filter(|a| !a.is_empty()).unwrap_or(alias);
        if new_alias != alias && self.places.place(new_alias).is_some() {
            return Err(PlantError::configuration(format!(
                "place alias {} already exists",
                new_alias
            )));
        }
        let place_decl = self.place_decl_mut(alias)?;
        if new_alias != alias {
            place_decl.rename_alias(alias, new_alias);
            place_decl.alias = new_alias.to_string();
        }
        let root = place_decl
            .device_mut(new_alias)
            .ok_or_else(|| PlantError::device_not_found(new_alias, new_alias))?;
        root.name = name.to_string();
        Ok(())
    }

    /// Rename a device and move it under `parent`, returning its new alias.
    ///
    /// The alias is rebuilt the same way [`Topology::add_device`] builds it.
    /// Direct children get the old alias prefix replaced and point at the
    /// new alias. The place root cannot be renamed here.
    pub fn rename_device(
        &mut self,
        place: &str,
        alias: &str,
        name: &str,
        parent: Option<&str>,
    ) -> PlantResult<String> {
        if name.is_empty() {
            return Err(PlantError::configuration("device name is required"));
        }
        if place == alias {
            return Err(PlantError::configuration("cannot rename the Root device"));
        }
        let new_alias = match parent {
            Some(parent) => format!("{}_{}", parent, name),
            None => name.to_string(),
        }
        .replace(' ', "_");

        let place_decl = self.place_decl_mut(place)?;
        if !place_decl.contains(alias) {
            return Err(PlantError::device_not_found(place, alias));
        }
        if let Some(parent) = parent {
            if parent == alias || !place_decl.contains(parent) {
                return Err(PlantError::device_not_found(place, parent));
            }
        }
        if new_alias != alias && place_decl.contains(&new_alias) {
            return Err(PlantError::configuration(format!(
                "device alias {} already exists",
                new_alias
            )));
        }

        let children: Vec<(String, String)> = place_decl
            .devices
            .iter()
            .filter(|e| e.decl.parent.as_deref() == Some(alias))
            .map(|e| (e.alias.clone(), e.alias.replacen(alias, &new_alias, 1)))
            .collect();
        if let Some((_, taken)) = children
            .iter()
            .find(|(child, renamed)| renamed != child && place_decl.contains(renamed))
        {
            return Err(PlantError::configuration(format!(
                "device alias {} already exists",
                taken
            )));
        }
        for (child, renamed) in &children {
            place_decl.rename_alias(child, renamed);
        }
        place_decl.rename_alias(alias, &new_alias);

        if let Some(decl) = place_decl.device_mut(&new_alias) {
            decl.name = name.to_string();
            decl.parent = parent.map(str::to_string);
        }
        place_decl.reconfigure()?;
        Ok(new_alias)
    }

    /// Change a device type. Only types reserving the same register count
    /// are accepted, so neighbouring addresses stay valid.
    pub fn change_device_type(&mut self, place: &str, alias: &str, type_name: &str) -> PlantResult<()> {
        let new_registers = self.template(type_name)?.registers;
        let current = self
            .places
            .place(place)
            .and_then(|p| p.device(alias))
            .ok_or_else(|| PlantError::device_not_found(place, alias))?
            .type_name
            .clone();
        let old_registers = self.template(&current)?.registers;
        if old_registers != new_registers {
            return Err(PlantError::configuration(format!(
                "{} reserves {} registers, {} reserves {}",
                current, old_registers, type_name, new_registers
            )));
        }
        if let Some(decl) = self.place_decl_mut(place)?.device_mut(alias) {
            decl.type_name = type_name.to_string();
        }
        Ok(())
    }

    /// Reassign addresses sequentially over all places and devices in
    /// declaration order. Returns the new next free address.
    pub fn resequence_addresses(&mut self) -> PlantResult<u32> {
        let mut address: u32 = 0;
        let mut assigned = Vec::new();
        for place in &self.places.places {
            for entry in &place.devices {
                let registers = self.template(&entry.decl.type_name)?.registers;
                let start = u16::try_from(address).map_err(|_| {
                    PlantError::configuration("resequenced addresses exceed the register space")
                })?;
                assigned.push(start);
                address += u32::from(registers);
            }
        }

        let mut next = assigned.into_iter();
        for place in &mut self.places.places {
            for entry in &mut place.devices {
                if let Some(start) = next.next() {
                    entry.decl.address = start;
                }
            }
        }
        self.project.address_count = address;
        Ok(address)
    }
}

// ============================================================================
// Runtime settings
// ============================================================================

/// Runtime settings of the simulator process.
///
/// # Example
///
/// ```rust
/// use modbus_plant_sim::SimConfig;
/// use std::time::Duration;
///
/// let config = SimConfig::new()
///     .with_port(5020)
///     .with_tick_interval(Duration::from_millis(100));
///
/// assert_eq!(config.port, 5020);
/// assert_eq!(config.register_count, 50_000);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    /// Directory holding the three topology documents.
    pub topology_dir: PathBuf,
    /// Size of the holding register bank.
    pub register_count: usize,
    pub bind_address: IpAddr,
    pub port: u16,
    pub tick_interval: Duration,
    pub poll_interval: Duration,
    /// Apply device links after building the plant.
    pub link_devices: bool,
}

impl SimConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_topology_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.topology_dir = dir.into();
        self
    }

    pub fn with_register_count(mut self, count: usize) -> Self {
        self.register_count = count;
        self
    }

    pub fn with_bind_address(mut self, address: IpAddr) -> Self {
        self.bind_address = address;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_link_devices(mut self, link: bool) -> Self {
        self.link_devices = link;
        self
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            topology_dir: PathBuf::from("."),
            register_count: DEFAULT_REGISTER_COUNT,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_TCP_PORT,
            tick_interval: Duration::from_millis(DEFAULT_TICK_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_MS),
            link_devices: false,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
