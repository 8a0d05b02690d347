//! # Device Model
//!
//! A device is a run of holding registers laid out from its template:
//!
//! | Offset | Content |
//! |--------|---------|
//! | +0 | `Status01` bit-vector (status0), if the type declares it |
//! | +1 | `Status02` bit-vector (status1), if the type declares it |
//! | +2 | `Control01` bit-vector, if the type declares it |
//! | +3.. | analog tags, then setting tags, 1 register for `int`/`Sint`, 2 for `long`/`float` |
//!
//! The three vector slots are reserved whether or not the type uses them.
//! External tooling re-derives Modbus addresses from the same arithmetic, so
//! the layout must not change.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{DeviceDecl, DeviceTemplate, TagSpec};
use crate::constants::{CONTROL_OFFSET, FIRST_TAG_OFFSET, STATUS0_OFFSET, STATUS1_OFFSET};
use crate::error::{PlantError, PlantResult};
use crate::store::RegisterStore;
use crate::tag::{BitVector, Tag};
use crate::value::TagValue;

// ============================================================================
// Device kinds
// ============================================================================

/// Closed set of device types known to the simulation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum DeviceKind {
    MotorVsd,
    MotorNormal,
    ValveMov,
    ValveModulating,
    ValveSolenoid,
    SensorLevel,
    SensorTotalizing,
    SensorAnalog,
    PidControl,
    Dpa,
    Generator,
    Rsf,
    Ups,
    ScreenPackage,
    Root,
    VentilationFans,
}

impl DeviceKind {
    pub const ALL: [DeviceKind; 16] = [
        DeviceKind::MotorVsd,
        DeviceKind::MotorNormal,
        DeviceKind::ValveMov,
        DeviceKind::ValveModulating,
        DeviceKind::ValveSolenoid,
        DeviceKind::SensorLevel,
        DeviceKind::SensorTotalizing,
        DeviceKind::SensorAnalog,
        DeviceKind::PidControl,
        DeviceKind::Dpa,
        DeviceKind::Generator,
        DeviceKind::Rsf,
        DeviceKind::Ups,
        DeviceKind::ScreenPackage,
        DeviceKind::Root,
        DeviceKind::VentilationFans,
    ];

    /// Type name as written in `devices.json`.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::MotorVsd => "Motor-VSD",
            DeviceKind::MotorNormal => "Motor-Normal",
            DeviceKind::ValveMov => "Valve-MOV",
            DeviceKind::ValveModulating => "Valve-Modulating",
            DeviceKind::ValveSolenoid => "Valve-Solenoid",
            DeviceKind::SensorLevel => "Sensor-Level",
            DeviceKind::SensorTotalizing => "Sensor-Totalizing",
            DeviceKind::SensorAnalog => "Sensor-Analog",
            DeviceKind::PidControl => "PID Control",
            DeviceKind::Dpa => "DPA",
            DeviceKind::Generator => "GEN Power",
            DeviceKind::Rsf => "RSF",
            DeviceKind::Ups => "UPS Power",
            DeviceKind::ScreenPackage => "Screen Package",
            DeviceKind::Root => "Root",
            DeviceKind::VentilationFans => "Ventilation Fans",
        }
    }
}

impl FromStr for DeviceKind {
    type Err = PlantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| PlantError::UnknownDeviceType {
                type_name: s.to_string(),
            })
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Selectors
// ============================================================================

/// One of the three bit-vector slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorSlot {
    Status0,
    Status1,
    Control,
}

impl VectorSlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            VectorSlot::Status0 => "status0",
            VectorSlot::Status1 => "status1",
            VectorSlot::Control => "control",
        }
    }
}

/// Analog or setting tag list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagGroup {
    Analog,
    Settings,
}

impl TagGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagGroup::Analog => "analog",
            TagGroup::Settings => "settings",
        }
    }
}

/// Preload categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadCategory {
    Settings,
    Analog,
    Status,
}

/// Which categories take their declared values at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PreloadFlags {
    pub settings: bool,
    pub analog: bool,
    pub status: bool,
}

impl PreloadFlags {
    pub fn get(&self, category: PreloadCategory) -> bool {
        match category {
            PreloadCategory::Settings => self.settings,
            PreloadCategory::Analog => self.analog,
            PreloadCategory::Status => self.status,
        }
    }

    pub fn set(&mut self, category: PreloadCategory, enabled: bool) {
        match category {
            PreloadCategory::Settings => self.settings = enabled,
            PreloadCategory::Analog => self.analog = enabled,
            PreloadCategory::Status => self.status = enabled,
        }
    }
}

impl Default for PreloadFlags {
    fn default() -> Self {
        Self {
            settings: true,
            analog: false,
            status: false,
        }
    }
}

/// Initial values declared for a device in `places.json`.
#[derive(Debug, Clone, Default, PartialEq)]
struct Preset {
    status0: Option<u16>,
    status1: Option<u16>,
    analog: Option<Vec<f64>>,
    settings: Option<Vec<f64>>,
}

// ============================================================================
// Device
// ============================================================================

/// A device of the plant tree.
#[derive(Debug, Clone)]
pub struct Device {
    alias: String,
    name: String,
    kind: DeviceKind,
    address: u16,
    reserved: u16,
    footprint: u16,
    pub(crate) parent: Option<usize>,
    pub(crate) link: Option<usize>,
    pub(crate) sim_scale: f64,
    enable_simulate: bool,
    status0: Option<BitVector>,
    status1: Option<BitVector>,
    control: Option<BitVector>,
    analog: Vec<Tag>,
    settings: Vec<Tag>,
    analog_names: Vec<String>,
    setting_names: Vec<String>,
    pub(crate) preload: PreloadFlags,
    preset: Preset,
}

impl Device {
    /// Lay out a device from its declaration and template, zero its
    /// registers and apply the default preload.
    pub fn build(
        alias: &str,
        decl: &DeviceDecl,
        template: &DeviceTemplate,
        store: &RegisterStore,
    ) -> PlantResult<Self> {
        let kind: DeviceKind = decl.type_name.parse()?;
        if !(0.0..=1.0).contains(&decl.simscale) {
            return Err(PlantError::configuration(format!(
                "device {} simscale {} outside 0..=1",
                alias, decl.simscale
            )));
        }
        let start = decl.address;
        let at = |offset: u32| -> PlantResult<u16> {
            u16::try_from(u32::from(start) + offset).map_err(|_| {
                PlantError::configuration(format!(
                    "device {} exceeds the register space",
                    alias
                ))
            })
        };

        let status0 = if template.has_status0() {
            Some(BitVector::new(at(u32::from(STATUS0_OFFSET))?))
        } else {
            None
        };
        let status1 = if template.has_status1() {
            Some(BitVector::new(at(u32::from(STATUS1_OFFSET))?))
        } else {
            None
        };
        let control = if template.has_control() {
            Some(BitVector::new(at(u32::from(CONTROL_OFFSET))?))
        } else {
            None
        };

        let mut counter = u32::from(FIRST_TAG_OFFSET);
        let mut place_tags = |specs: &[TagSpec]| -> PlantResult<Vec<Tag>> {
            let mut tags = Vec::with_capacity(specs.len());
            for spec in specs {
                tags.push(Tag::from_kind(spec.kind, spec.dp, at(counter)?));
                counter += u32::from(spec.kind.register_count());
            }
            Ok(tags)
        };
        let analog = place_tags(&template.analog)?;
        let settings = place_tags(&template.settings)?;
        // last register of the layout must be addressable
        at(counter.saturating_sub(1))?;

        let device = Self {
            alias: alias.to_string(),
            name: decl.name.clone(),
            kind,
            address: start,
            reserved: template.registers,
            footprint: u16::try_from(counter).unwrap_or(u16::MAX),
            parent: None,
            link: None,
            sim_scale: decl.simscale,
            enable_simulate: template.enable_simulate,
            status0,
            status1,
            control,
            analog,
            settings,
            analog_names: template.analog.iter().map(|t| t.name.clone()).collect(),
            setting_names: template.settings.iter().map(|t| t.name.clone()).collect(),
            preload: PreloadFlags::default(),
            preset: Preset {
                status0: decl.status01,
                status1: decl.status02,
                analog: decl.analog.clone(),
                settings: decl.settings.clone(),
            },
        };

        device.clear_all(store);
        device.preload(store);
        debug!(
            "Built {} ({}) at {} with {} analog, {} settings",
            device.alias,
            device.kind,
            device.address,
            device.analog.len(),
            device.settings.len()
        );
        Ok(device)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[inline]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// Start address.
    #[inline]
    pub fn address(&self) -> u16 {
        self.address
    }

    /// Registers the type reserves.
    #[inline]
    pub fn reserved(&self) -> u16 {
        self.reserved
    }

    /// Registers the layout uses.
    #[inline]
    pub fn footprint(&self) -> u16 {
        self.footprint
    }

    #[inline]
    pub fn sim_scale(&self) -> f64 {
        self.sim_scale
    }

    #[inline]
    pub fn simulation_allowed(&self) -> bool {
        self.enable_simulate
    }

    #[inline]
    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    #[inline]
    pub fn link(&self) -> Option<usize> {
        self.link
    }

    #[inline]
    pub fn preload_flags(&self) -> PreloadFlags {
        self.preload
    }

    pub fn vector(&self, slot: VectorSlot) -> Option<BitVector> {
        match slot {
            VectorSlot::Status0 => self.status0,
            VectorSlot::Status1 => self.status1,
            VectorSlot::Control => self.control,
        }
    }

    pub(crate) fn vector_mut(&mut self, slot: VectorSlot) -> Option<&mut BitVector> {
        match slot {
            VectorSlot::Status0 => self.status0.as_mut(),
            VectorSlot::Status1 => self.status1.as_mut(),
            VectorSlot::Control => self.control.as_mut(),
        }
    }

    /// Vector that must exist for the caller to proceed.
    pub fn require_vector(&self, slot: VectorSlot) -> PlantResult<BitVector> {
        self.vector(slot).ok_or_else(|| PlantError::MissingVector {
            device: self.alias.clone(),
            vector: slot.as_str(),
        })
    }

    pub fn tags(&self, group: TagGroup) -> &[Tag] {
        match group {
            TagGroup::Analog => &self.analog,
            TagGroup::Settings => &self.settings,
        }
    }

    pub(crate) fn tags_mut(&mut self, group: TagGroup) -> &mut [Tag] {
        match group {
            TagGroup::Analog => &mut self.analog,
            TagGroup::Settings => &mut self.settings,
        }
    }

    pub fn tag_names(&self, group: TagGroup) -> &[String] {
        match group {
            TagGroup::Analog => &self.analog_names,
            TagGroup::Settings => &self.setting_names,
        }
    }

    /// Tag that must exist for the caller to proceed.
    pub fn tag(&self, group: TagGroup, index: usize) -> PlantResult<Tag> {
        self.tags(group)
            .get(index)
            .copied()
            .ok_or_else(|| PlantError::MissingTag {
                device: self.alias.clone(),
                group: group.as_str(),
                index,
            })
    }

    /// Decoded values of a tag list.
    pub fn read_tags(&self, group: TagGroup, store: &RegisterStore) -> Vec<TagValue> {
        self.tags(group).iter().map(|t| t.read(store)).collect()
    }

    // ========================================================================
    // Preload
    // ========================================================================

    /// Apply declared values to every category whose flag is set and zero
    /// the others.
    pub fn preload(&self, store: &RegisterStore) {
        for category in [
            PreloadCategory::Settings,
            PreloadCategory::Analog,
            PreloadCategory::Status,
        ] {
            if self.preload.get(category) {
                self.load(category, store);
            } else {
                self.clear(category, store);
            }
        }
    }

    /// Write the declared values of one category, in list order.
    pub fn load(&self, category: PreloadCategory, store: &RegisterStore) {
        match category {
            PreloadCategory::Settings => {
                self.load_tags(TagGroup::Settings, self.preset.settings.as_deref(), store)
            }
            PreloadCategory::Analog => {
                self.load_tags(TagGroup::Analog, self.preset.analog.as_deref(), store)
            }
            PreloadCategory::Status => {
                if let (Some(v), Some(value)) = (self.status0, self.preset.status0) {
                    v.set_value(store, value);
                }
                if let (Some(v), Some(value)) = (self.status1, self.preset.status1) {
                    v.set_value(store, value);
                }
            }
        }
    }

    /// Zero every tag of one category.
    pub fn clear(&self, category: PreloadCategory, store: &RegisterStore) {
        match category {
            PreloadCategory::Settings => self.settings.iter().for_each(|t| t.clear(store)),
            PreloadCategory::Analog => self.analog.iter().for_each(|t| t.clear(store)),
            PreloadCategory::Status => {
                for v in [self.status0, self.status1].into_iter().flatten() {
                    v.set_value(store, 0);
                }
            }
        }
    }

    fn load_tags(&self, group: TagGroup, values: Option<&[f64]>, store: &RegisterStore) {
        let Some(values) = values else {
            return;
        };
        let tags = self.tags(group);
        if values.len() != tags.len() {
            warn!(
                "{}: {} {} values declared for {} tags",
                self.alias,
                values.len(),
                group.as_str(),
                tags.len()
            );
        }
        for (tag, value) in tags.iter().zip(values) {
            tag.set(store, *value);
        }
    }

    fn clear_all(&self, store: &RegisterStore) {
        for v in [self.status0, self.status1, self.control].into_iter().flatten() {
            v.set_value(store, 0);
        }
        self.analog
            .iter()
            .chain(self.settings.iter())
            .for_each(|t| t.clear(store));
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::TagKind;

    fn template(analog: Vec<TagSpec>, settings: Vec<TagSpec>) -> DeviceTemplate {
        DeviceTemplate {
            status0: Some(vec!["Running".into()]),
            status1: None,
            control: Some(vec!["Start".into()]),
            analog,
            settings,
            registers: 20,
            enable_simulate: true,
        }
    }

    fn spec(kind: TagKind, dp: u8) -> TagSpec {
        TagSpec {
            name: kind.as_str().to_string(),
            kind,
            dp,
        }
    }

    #[test]
    fn test_kind_mapping_is_total() {
        for kind in DeviceKind::ALL {
            assert_eq!(kind.as_str().parse::<DeviceKind>().unwrap(), kind);
        }
        assert_eq!("PID Control".parse::<DeviceKind>().unwrap(), DeviceKind::PidControl);
        assert!(matches!(
            "Default".parse::<DeviceKind>(),
            Err(PlantError::UnknownDeviceType { .. })
        ));
    }

    #[test]
    fn test_layout_offsets() {
        let store = RegisterStore::new(200);
        let template = template(
            vec![
                spec(TagKind::Int, 1),
                spec(TagKind::Float, 0),
                spec(TagKind::SignedInt, 2),
                spec(TagKind::LongInverse, 0),
            ],
            vec![spec(TagKind::Int, 0), spec(TagKind::FloatInverse, 0)],
        );
        let decl = DeviceDecl::new("Pump", 100, "Motor-VSD", None);
        let device = Device::build("P_Pump", &decl, &template, &store).unwrap();

        assert_eq!(device.vector(VectorSlot::Status0).unwrap().address(), 100);
        assert!(device.vector(VectorSlot::Status1).is_none());
        assert_eq!(device.vector(VectorSlot::Control).unwrap().address(), 102);

        let analog: Vec<u16> = device.tags(TagGroup::Analog).iter().map(|t| t.address()).collect();
        assert_eq!(analog, [103, 104, 106, 107]);
        let settings: Vec<u16> = device
            .tags(TagGroup::Settings)
            .iter()
            .map(|t| t.address())
            .collect();
        assert_eq!(settings, [109, 110]);
        assert_eq!(device.footprint(), 12);
        assert_eq!(u32::from(device.footprint()), template.footprint());
    }

    #[test]
    fn test_default_preload_loads_settings_only() {
        let store = RegisterStore::new(50);
        store.set(0, &[0xFFFF; 10]).unwrap();
        let template = template(vec![spec(TagKind::Int, 1)], vec![spec(TagKind::Int, 1)]);
        let mut decl = DeviceDecl::new("Level", 0, "Sensor-Level", None);
        decl.analog = Some(vec![4.5]);
        decl.settings = Some(vec![2.5]);
        decl.status01 = Some(3);

        let device = Device::build("L", &decl, &template, &store).unwrap();
        assert_eq!(device.tag(TagGroup::Settings, 0).unwrap().get(&store), 2.5);
        assert_eq!(device.tag(TagGroup::Analog, 0).unwrap().get(&store), 0.0);
        assert_eq!(device.vector(VectorSlot::Status0).unwrap().value(&store), 0);
        // unused vector slot is not touched
        assert_eq!(store.read(1), 0xFFFF);
    }

    #[test]
    fn test_load_and_clear_categories() {
        let store = RegisterStore::new(50);
        let template = template(vec![spec(TagKind::Int, 1)], vec![]);
        let mut decl = DeviceDecl::new("Level", 0, "Sensor-Level", None);
        decl.analog = Some(vec![4.5]);
        decl.status01 = Some(3);
        let device = Device::build("L", &decl, &template, &store).unwrap();

        device.load(PreloadCategory::Analog, &store);
        device.load(PreloadCategory::Status, &store);
        assert_eq!(device.tag(TagGroup::Analog, 0).unwrap().get(&store), 4.5);
        assert_eq!(device.vector(VectorSlot::Status0).unwrap().value(&store), 3);

        device.clear(PreloadCategory::Analog, &store);
        device.clear(PreloadCategory::Status, &store);
        assert_eq!(device.tag(TagGroup::Analog, 0).unwrap().get(&store), 0.0);
        assert_eq!(device.vector(VectorSlot::Status0).unwrap().value(&store), 0);
    }

    #[test]
    fn test_missing_parts_are_errors() {
        let store = RegisterStore::new(50);
        let template = template(vec![], vec![]);
        let decl = DeviceDecl::new("Valve", 0, "Valve-Solenoid", None);
        let device = Device::build("V", &decl, &template, &store).unwrap();
        assert!(matches!(
            device.require_vector(VectorSlot::Status1),
            Err(PlantError::MissingVector { vector: "status1", .. })
        ));
        assert!(matches!(
            device.tag(TagGroup::Analog, 0),
            Err(PlantError::MissingTag { index: 0, .. })
        ));
    }

    #[test]
    fn test_unknown_type_and_overflow() {
        let store = RegisterStore::new(50);
        let template = template(vec![spec(TagKind::Float, 0)], vec![]);
        let decl = DeviceDecl::new("X", 0, "Turbine", None);
        assert!(Device::build("X", &decl, &template, &store).is_err());

        let decl = DeviceDecl::new("X", u16::MAX - 2, "Sensor-Analog", None);
        assert!(Device::build("X", &decl, &template, &store).is_err());
    }

    #[test]
    fn test_sim_scale_range() {
        let store = RegisterStore::new(50);
        let template = template(vec![spec(TagKind::Int, 1)], vec![]);
        for simscale in [1e308, -0.5, 1.01, f64::NAN, f64::INFINITY] {
            let mut decl = DeviceDecl::new("Flow", 0, "Sensor-Analog", None);
            decl.simscale = simscale;
            assert!(matches!(
                Device::build("F", &decl, &template, &store),
                Err(PlantError::Configuration { .. })
            ));
        }
        for simscale in [0.0, 0.25, 1.0] {
            let mut decl = DeviceDecl::new("Flow", 0, "Sensor-Analog", None);
            decl.simscale = simscale;
            let device = Device::build("F", &decl, &template, &store).unwrap();
            assert_eq!(device.sim_scale(), simscale);
        }
    }
}
