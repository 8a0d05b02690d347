//! # Place / Plant Hierarchy
//!
//! Pure composition: a plant is an ordered list of places, a place is an arena
//! of devices keyed by alias. Parent and link references are indices into the
//! owning place's arena; they are look-ups, never ownership.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::{PlaceDecl, Topology};
use crate::device::{Device, VectorSlot};
use crate::error::{PlantError, PlantResult};
use crate::store::RegisterStore;

/// Index of a device inside a [`Plant`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DeviceRef {
    pub place: usize,
    pub device: usize,
}

// ============================================================================
// Place
// ============================================================================

#[derive(Debug, Clone)]
pub struct Place {
    alias: String,
    name: String,
    devices: Vec<Device>,
    index: HashMap<String, usize>,
    /// (device, link target) pairs, resolved at build
    links: Vec<(usize, usize)>,
}

impl Place {
    fn build(
        decl: &PlaceDecl,
        topology: &Topology,
        store: &RegisterStore,
    ) -> PlantResult<Self> {
        let mut devices = Vec::with_capacity(decl.devices.len());
        let mut index = HashMap::with_capacity(decl.devices.len());

        for entry in &decl.devices {
            let template = topology.template(&entry.decl.type_name)?;
            let device = Device::build(&entry.alias, &entry.decl, template, store)?;
            if index.insert(entry.alias.clone(), devices.len()).is_some() {
                return Err(PlantError::configuration(format!(
                    "duplicate device alias {} in place {}",
                    entry.alias, decl.alias
                )));
            }
            devices.push(device);
        }

        let resolve = |alias: &str, role: &str, owner: &str| -> PlantResult<usize> {
            index.get(alias).copied().ok_or_else(|| {
                PlantError::configuration(format!(
                    "{} {} of {} not found in place {}",
                    role, alias, owner, decl.alias
                ))
            })
        };

        let mut links = Vec::new();
        for (i, entry) in decl.devices.iter().enumerate() {
            if let Some(parent) = entry.decl.parent.as_deref() {
                devices[i].parent = Some(resolve(parent, "parent", &entry.alias)?);
            }
            if let Some(link) = entry.decl.link.as_deref() {
                let target = resolve(link, "link", &entry.alias)?;
                devices[i].link = Some(target);
                links.push((i, target));
            }
        }

        Ok(Self {
            alias: decl.alias.clone(),
            name: decl.name().to_string(),
            devices,
            index,
            links,
        })
    }

    #[inline]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn index_of(&self, alias: &str) -> Option<usize> {
        self.index.get(alias).copied()
    }

    pub fn device(&self, alias: &str) -> Option<&Device> {
        self.index_of(alias).map(|i| &self.devices[i])
    }

    /// Devices whose parent is `index`, in declaration order.
    pub fn children(&self, index: usize) -> impl Iterator<Item = &Device> {
        self.devices
            .iter()
            .filter(move |d| d.parent() == Some(index))
    }

    /// Point each linked device's status1 vector at its target's status1
    /// register. Returns the number of links applied.
    pub fn link_devices(&mut self) -> PlantResult<usize> {
        for &(source, target) in &self.links {
            let shared = self.devices[target]
                .require_vector(VectorSlot::Status1)?
                .address();
            let device = &mut self.devices[source];
            let alias = device.alias().to_string();
            let vector = device.vector_mut(VectorSlot::Status1).ok_or_else(|| {
                PlantError::MissingVector {
                    device: alias.clone(),
                    vector: VectorSlot::Status1.as_str(),
                }
            })?;
            vector.set_address(shared);
            info!(
                "Linking {} --> {}",
                alias,
                self.devices[target].alias()
            );
        }
        Ok(self.links.len())
    }
}

// ============================================================================
// Plant
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct Plant {
    places: Vec<Place>,
}

impl Plant {
    /// Validate the address map, then build every place in declaration order.
    pub fn build(topology: &Topology, store: &RegisterStore) -> PlantResult<Self> {
        validate_address_map(topology, store.len())?;
        let places = topology
            .places
            .places
            .iter()
            .map(|decl| Place::build(decl, topology, store))
            .collect::<PlantResult<Vec<_>>>()?;
        let plant = Self { places };
        info!(
            "Plant built: {} places, {} devices",
            plant.places.len(),
            plant.device_count()
        );
        Ok(plant)
    }

    /// Apply the declared links of every place.
    pub fn link_devices(&mut self) -> PlantResult<usize> {
        if self.device_count() == 0 {
            return Err(PlantError::EmptyPlant);
        }
        let mut linked = 0;
        for place in &mut self.places {
            linked += place.link_devices()?;
        }
        Ok(linked)
    }

    pub fn places(&self) -> &[Place] {
        &self.places
    }

    pub fn place(&self, alias: &str) -> Option<&Place> {
        self.places.iter().find(|p| p.alias == alias)
    }

    pub fn device_count(&self) -> usize {
        self.places.iter().map(|p| p.devices.len()).sum()
    }

    /// Look a device up by place alias and device alias.
    pub fn find(&self, place: &str, alias: &str) -> PlantResult<DeviceRef> {
        self.places
            .iter()
            .position(|p| p.alias == place)
            .and_then(|p| {
                self.places[p]
                    .index_of(alias)
                    .map(|d| DeviceRef { place: p, device: d })
            })
            .ok_or_else(|| PlantError::device_not_found(place, alias))
    }

    pub fn device(&self, r: DeviceRef) -> PlantResult<&Device> {
        self.places
            .get(r.place)
            .and_then(|p| p.devices.get(r.device))
            .ok_or_else(|| PlantError::device_not_found(r.place.to_string(), r.device.to_string()))
    }

    pub fn device_mut(&mut self, r: DeviceRef) -> PlantResult<&mut Device> {
        self.places
            .get_mut(r.place)
            .and_then(|p| p.devices.get_mut(r.device))
            .ok_or_else(|| PlantError::device_not_found(r.place.to_string(), r.device.to_string()))
    }

    /// Every device, in place then declaration order.
    pub fn device_refs(&self) -> impl Iterator<Item = DeviceRef> + '_ {
        self.places.iter().enumerate().flat_map(|(p, place)| {
            (0..place.devices.len()).map(move |d| DeviceRef { place: p, device: d })
        })
    }
}

// ============================================================================
// Address map validation
// ============================================================================

/// Check that every device layout fits its reserved range, that every range
/// fits the bank and that no two ranges overlap.
pub fn validate_address_map(topology: &Topology, bank_size: usize) -> PlantResult<()> {
    let mut ranges: Vec<(u32, u32, String)> = Vec::new();

    for place in &topology.places.places {
        for entry in &place.devices {
            let template = topology.template(&entry.decl.type_name)?;
            let label = format!("{}/{}", place.alias, entry.alias);
            let footprint = template.footprint();
            let reserved = u32::from(template.registers);
            if footprint > reserved {
                return Err(PlantError::LayoutOverflow {
                    device: label,
                    needed: footprint,
                    reserved,
                });
            }
            let start = u32::from(entry.decl.address);
            let end = start + reserved;
            if end as usize > bank_size {
                return Err(PlantError::AddressOutOfRange {
                    address: start,
                    count: reserved as usize,
                    size: bank_size,
                });
            }
            ranges.push((start, end, label));
        }
    }

    ranges.sort_by_key(|(start, end, _)| (*start, *end));
    for pair in ranges.windows(2) {
        let (first_start, first_end, first) = &pair[0];
        let (second_start, second_end, second) = &pair[1];
        // zero-width reservations cannot collide
        if second_end > second_start && first_end > first_start && second_start < first_end {
            return Err(PlantError::AddressOverlap {
                first: first.clone(),
                first_start: *first_start,
                first_end: *first_end,
                second: second.clone(),
                second_start: *second_start,
            });
        }
    }

    debug!("Address map valid: {} devices", ranges.len());
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
