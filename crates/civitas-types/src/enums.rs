//! Enumeration types for the Civitas simulation.
//!
//! The entity taxonomy is a tagged union: an [`EntityKind`] plus a
//! [`Subtype`] whose variant must belong to that kind. Everything that
//! varies per subtype (resource demand, action text) is a lookup over these
//! enums rather than per-type behaviour.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Entity taxonomy
// ---------------------------------------------------------------------------

/// Top-level entity category.
///
/// The declaration order is the scheduling order: citizens act first, then
/// buildings, then infrastructure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A person living in the city.
    Citizen,
    /// A zoned building.
    Building,
    /// Shared city infrastructure.
    Infrastructure,
}

impl EntityKind {
    /// All kinds, in scheduling order.
    pub const ALL: [Self; 3] = [Self::Citizen, Self::Building, Self::Infrastructure];

    /// Parse a kind name (case-insensitive).
    pub fn parse(name: &str) -> Option<Self> {
        match normalize(name).as_str() {
            "citizen" => Some(Self::Citizen),
            "building" => Some(Self::Building),
            "infrastructure" => Some(Self::Infrastructure),
            _ => None,
        }
    }

    /// Lowercase display name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Citizen => "citizen",
            Self::Building => "building",
            Self::Infrastructure => "infrastructure",
        }
    }
}

impl core::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Citizen subtypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CitizenType {
    /// Employed citizen.
    Worker,
    /// Citizen in education.
    Student,
    /// Retired citizen.
    Retiree,
}

/// Building subtypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildingType {
    /// Housing.
    Residential,
    /// Shops and services.
    Commercial,
    /// Production.
    Industrial,
}

/// Infrastructure subtypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfrastructureType {
    /// Transportation.
    Road,
    /// Electricity distribution.
    PowerGrid,
    /// Water distribution.
    WaterSystem,
}

/// A concrete entity subtype, tagged with the kind it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "subtype", rename_all = "snake_case")]
pub enum Subtype {
    /// A citizen subtype.
    Citizen(CitizenType),
    /// A building subtype.
    Building(BuildingType),
    /// An infrastructure subtype.
    Infrastructure(InfrastructureType),
}

impl Subtype {
    /// Every subtype, grouped by kind in scheduling order.
    pub const ALL: [Self; 9] = [
        Self::Citizen(CitizenType::Worker),
        Self::Citizen(CitizenType::Student),
        Self::Citizen(CitizenType::Retiree),
        Self::Building(BuildingType::Residential),
        Self::Building(BuildingType::Commercial),
        Self::Building(BuildingType::Industrial),
        Self::Infrastructure(InfrastructureType::Road),
        Self::Infrastructure(InfrastructureType::PowerGrid),
        Self::Infrastructure(InfrastructureType::WaterSystem),
    ];

    /// The kind this subtype belongs to.
    pub const fn kind(self) -> EntityKind {
        match self {
            Self::Citizen(_) => EntityKind::Citizen,
            Self::Building(_) => EntityKind::Building,
            Self::Infrastructure(_) => EntityKind::Infrastructure,
        }
    }

    /// Parse a subtype name within a kind.
    ///
    /// Matching ignores case, `_`, `-` and spaces, so `power_grid`,
    /// `PowerGrid` and `power-grid` are the same subtype. Returns `None` if
    /// the name is not a subtype of `kind`.
    pub fn parse(kind: EntityKind, name: &str) -> Option<Self> {
        let name = normalize(name);
        Self::ALL
            .into_iter()
            .find(|subtype| subtype.kind() == kind && normalize(subtype.as_str()) == name)
    }

    /// Snake-case display name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Citizen(CitizenType::Worker) => "worker",
            Self::Citizen(CitizenType::Student) => "student",
            Self::Citizen(CitizenType::Retiree) => "retiree",
            Self::Building(BuildingType::Residential) => "residential",
            Self::Building(BuildingType::Commercial) => "commercial",
            Self::Building(BuildingType::Industrial) => "industrial",
            Self::Infrastructure(InfrastructureType::Road) => "road",
            Self::Infrastructure(InfrastructureType::PowerGrid) => "power_grid",
            Self::Infrastructure(InfrastructureType::WaterSystem) => "water_system",
        }
    }
}

impl core::fmt::Display for Subtype {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.kind(), self.as_str())
    }
}

/// Lifecycle state of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    /// Scheduled every tick.
    Active,
    /// Alive but not scheduled (e.g. an unemployed citizen).
    Inactive,
    /// Removed from the registry. Terminal.
    Destroyed,
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// A shared, finite city resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Electricity, in units per tick.
    Power,
    /// Water, in units per tick.
    Water,
    /// Job slots.
    Jobs,
    /// Housing capacity.
    Housing,
}

impl ResourceKind {
    /// All resource kinds, in ledger order.
    pub const ALL: [Self; 4] = [Self::Power, Self::Water, Self::Jobs, Self::Housing];

    /// Parse a resource name (case-insensitive).
    pub fn parse(name: &str) -> Option<Self> {
        match normalize(name).as_str() {
            "power" => Some(Self::Power),
            "water" => Some(Self::Water),
            "jobs" => Some(Self::Jobs),
            "housing" => Some(Self::Housing),
            _ => None,
        }
    }

    /// Lowercase display name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Power => "power",
            Self::Water => "water",
            Self::Jobs => "jobs",
            Self::Housing => "housing",
        }
    }

    /// Bit used by [`ResourceMask`](crate::ResourceMask).
    pub(crate) const fn bit(self) -> u8 {
        match self {
            Self::Power => 0b0001,
            Self::Water => 0b0010,
            Self::Jobs => 0b0100,
            Self::Housing => 0b1000,
        }
    }
}

impl core::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Events and ledger
// ---------------------------------------------------------------------------

/// Category of an [`Event`](crate::Event), used for subscription filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// An entity was created.
    EntityCreated,
    /// An entity moved between Active and Inactive.
    EntityStateChanged,
    /// An entity was destroyed.
    EntityDestroyed,
    /// An entity performed its full action this tick.
    ActionPerformed,
    /// An entity performed a reduced action after a denied reservation.
    ActionDegraded,
    /// At least one reservation for a resource was denied this tick.
    ResourceShortage,
    /// A release asked for more than was allocated and was clamped.
    ReleaseUnderflow,
    /// A tick committed.
    TickCompleted,
}

/// Direction of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryType {
    /// Units moved from free capacity into the allocation.
    Reserve,
    /// Units returned from the allocation to free capacity.
    Release,
}

/// Lowercase and strip separators for lenient name matching.
fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}
