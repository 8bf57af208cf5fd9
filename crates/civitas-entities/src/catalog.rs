//! Human-readable action lines for each subtype.
//!
//! The core never prints these. Action events carry only the subtype;
//! whoever renders them looks the line up here.

use civitas_types::{BuildingType, CitizenType, InfrastructureType, Subtype};

/// What an entity of `subtype` does on a full action.
pub const fn action_line(subtype: Subtype) -> &'static str {
    match subtype {
        Subtype::Citizen(CitizenType::Worker) => "Worker is working",
        Subtype::Citizen(CitizenType::Student) => "Student is studying",
        Subtype::Citizen(CitizenType::Retiree) => "Retiree is relaxing",
        Subtype::Building(BuildingType::Residential) => "Residential building provides housing",
        Subtype::Building(BuildingType::Commercial) => "Commercial building provides services",
        Subtype::Building(BuildingType::Industrial) => {
            "Industrial building facilitates production"
        }
        Subtype::Infrastructure(InfrastructureType::Road) => "Road facilitates transportation",
        Subtype::Infrastructure(InfrastructureType::PowerGrid) => "Power grid supplies electricity",
        Subtype::Infrastructure(InfrastructureType::WaterSystem) => {
            "Water system provides water supply"
        }
    }
}

/// What an entity of `subtype` does when a reservation was denied.
pub fn degraded_line(subtype: Subtype) -> String {
    format!("{} at reduced capacity", action_line(subtype))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subtype_has_a_line() {
        for subtype in Subtype::ALL {
            assert!(!action_line(subtype).is_empty());
        }
    }

    #[test]
    fn degraded_line_extends_action_line() {
        let worker = Subtype::Citizen(CitizenType::Worker);
        assert_eq!(degraded_line(worker), "Worker is working at reduced capacity");
    }
}
