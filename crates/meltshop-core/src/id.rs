use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::fmt;

new_key_type! {
    /// Identifies a ladle car owned by the dispatcher.
    pub struct CarId;

    /// Identifies a crane owned by a bay's crane pool.
    pub struct CraneId;

    /// Identifies a process station (furnace, caster, ...) registered with the plant.
    pub struct StationId;
}

/// Identifies a bay by its configured name (e.g. `"bay1"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BayId(pub String);

impl BayId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BayId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// Identifies a heat. Assigned by the production subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HeatId(pub u64);

impl fmt::Display for HeatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "heat-{}", self.0)
    }
}

/// Identifies a ladle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LadleId(pub u32);

/// Identifies a transport request. Doubles as the dispatcher's tie-break sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

/// Anything with a place on the plant floor that a crane can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EquipmentId {
    Station(StationId),
    Car(CarId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn bay_id_display_and_order() {
        let a = BayId::new("bay1");
        let b = BayId::from("bay2");
        assert_eq!(a.to_string(), "bay1");
        assert!(a < b);
    }

    #[test]
    fn bay_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&BayId::new("bay3")).unwrap();
        assert_eq!(json, "\"bay3\"");
    }

    #[test]
    fn equipment_ids_are_hashable() {
        use std::collections::HashMap;
        let mut stations = SlotMap::<StationId, ()>::with_key();
        let mut cars = SlotMap::<CarId, ()>::with_key();
        let s = stations.insert(());
        let c = cars.insert(());

        let mut map = HashMap::new();
        map.insert(EquipmentId::Station(s), "eaf");
        map.insert(EquipmentId::Car(c), "car");
        assert_eq!(map[&EquipmentId::Station(s)], "eaf");
        assert_eq!(map[&EquipmentId::Car(c)], "car");
    }
}
