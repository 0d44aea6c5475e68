//! Phase registry and ordering

use indexmap::IndexMap;
use std::collections::HashSet;

use super::error::RegistryError;
use super::unit::DynUnit;

/// Named deployment units in registration order
#[derive(Default, Clone)]
pub struct PhaseRegistry {
    units: IndexMap<String, DynUnit>,
}

impl PhaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unit under its own name
    pub fn register(&mut self, unit: DynUnit) -> Result<(), RegistryError> {
        let name = unit.name().to_string();
        if self.units.contains_key(&name) {
            return Err(RegistryError::DuplicateUnit(name));
        }
        self.units.insert(name, unit);
        Ok(())
    }

    /// Builder-style register
    pub fn with_unit(mut self, unit: DynUnit) -> Result<Self, RegistryError> {
        self.register(unit)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&DynUnit> {
        self.units.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.units.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Split into the ordered prefix and the unordered remainder.
    ///
    /// Order names missing from the registry are ignored and repeated names
    /// are taken once. The registry itself is not modified.
    pub fn partition(&self, order: &PhaseOrder) -> Partition {
        let mut taken = HashSet::new();
        let mut ordered = Vec::new();

        for name in order.names() {
            if let Some((index, _, unit)) = self.units.get_full(name)
                && taken.insert(index)
            {
                ordered.push(Scheduled {
                    index,
                    unit: unit.clone(),
                });
            }
        }

        let remainder = self
            .units
            .values()
            .enumerate()
            .filter(|(index, _)| !taken.contains(index))
            .map(|(index, unit)| Scheduled {
                index,
                unit: unit.clone(),
            })
            .collect();

        Partition { ordered, remainder }
    }
}

impl std::fmt::Debug for PhaseRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.units.keys()).finish()
    }
}

/// Unit names that must run, in sequence, before everything else
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseOrder(Vec<String>);

impl PhaseOrder {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// A unit with its registration index
#[derive(Clone)]
pub struct Scheduled {
    pub index: usize,
    pub unit: DynUnit,
}

impl Scheduled {
    pub fn name(&self) -> &str {
        self.unit.name()
    }
}

impl std::fmt::Debug for Scheduled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.unit.name(), self.index)
    }
}

/// Disjoint execution lists produced from a registry and an order
#[derive(Debug, Clone)]
pub struct Partition {
    pub ordered: Vec<Scheduled>,
    pub remainder: Vec<Scheduled>,
}

impl Partition {
    pub fn ordered_names(&self) -> Vec<&str> {
        self.ordered.iter().map(Scheduled::name).collect()
    }

    pub fn remainder_names(&self) -> Vec<&str> {
        self.remainder.iter().map(Scheduled::name).collect()
    }
}
