//! Per-tick resource demand for each entity subtype.
//!
//! Demand is a pure function of subtype and lifecycle state: the same
//! entity in the same state always asks for the same resources, in the
//! same order. Only active entities demand anything.
//!
//! All values are whole units per tick.

use civitas_types::{
    BuildingType, CitizenType, EntityState, InfrastructureType, ResourceKind, Subtype,
};

/// One resource request: `(resource, units)`.
pub type Demand = (ResourceKind, u64);

const WORKER: &[Demand] = &[(ResourceKind::Power, 1)];
const STUDENT: &[Demand] = &[(ResourceKind::Water, 1)];
const RETIREE: &[Demand] = &[(ResourceKind::Water, 1)];
const RESIDENTIAL: &[Demand] = &[(ResourceKind::Water, 2), (ResourceKind::Housing, 4)];
const COMMERCIAL: &[Demand] = &[(ResourceKind::Power, 2), (ResourceKind::Jobs, 2)];
const INDUSTRIAL: &[Demand] = &[
    (ResourceKind::Power, 3),
    (ResourceKind::Water, 2),
    (ResourceKind::Jobs, 4),
];
const ROAD: &[Demand] = &[];
const POWER_GRID: &[Demand] = &[(ResourceKind::Water, 1)];
const WATER_SYSTEM: &[Demand] = &[(ResourceKind::Power, 1)];

/// Resource requests of an active entity of `subtype`, in reservation
/// order.
pub const fn base_demand(subtype: Subtype) -> &'static [Demand] {
    match subtype {
        Subtype::Citizen(CitizenType::Worker) => WORKER,
        Subtype::Citizen(CitizenType::Student) => STUDENT,
        Subtype::Citizen(CitizenType::Retiree) => RETIREE,
        Subtype::Building(BuildingType::Residential) => RESIDENTIAL,
        Subtype::Building(BuildingType::Commercial) => COMMERCIAL,
        Subtype::Building(BuildingType::Industrial) => INDUSTRIAL,
        Subtype::Infrastructure(InfrastructureType::Road) => ROAD,
        Subtype::Infrastructure(InfrastructureType::PowerGrid) => POWER_GRID,
        Subtype::Infrastructure(InfrastructureType::WaterSystem) => WATER_SYSTEM,
    }
}

/// Resource requests for this tick given the entity's current state.
pub const fn demand_for(subtype: Subtype, state: EntityState) -> &'static [Demand] {
    match state {
        EntityState::Active => base_demand(subtype),
        EntityState::Inactive | EntityState::Destroyed => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_demands_one_power() {
        assert_eq!(
            base_demand(Subtype::Citizen(CitizenType::Worker)),
            &[(ResourceKind::Power, 1)]
        );
    }

    #[test]
    fn road_demands_nothing() {
        assert!(base_demand(Subtype::Infrastructure(InfrastructureType::Road)).is_empty());
    }

    #[test]
    fn inactive_entities_demand_nothing() {
        for subtype in Subtype::ALL {
            assert!(demand_for(subtype, EntityState::Inactive).is_empty());
            assert!(demand_for(subtype, EntityState::Destroyed).is_empty());
            assert_eq!(demand_for(subtype, EntityState::Active), base_demand(subtype));
        }
    }

    #[test]
    fn no_subtype_requests_a_resource_twice() {
        for subtype in Subtype::ALL {
            let demand = base_demand(subtype);
            for resource in ResourceKind::ALL {
                let requests = demand.iter().filter(|(kind, _)| *kind == resource).count();
                assert!(requests <= 1, "{subtype} requests {resource} {requests} times");
            }
        }
    }
}
