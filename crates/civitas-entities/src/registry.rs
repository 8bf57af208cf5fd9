//! Entity creation, lookup, and destruction.
//!
//! The [`EntityRegistry`] is the sole owner of entity records. Everything
//! else holds an [`EntityId`] and asks the registry for a copy of the
//! record when it needs one.
//!
//! Ids are issued sequentially starting at 1 and are never reused: an id
//! below the high-water mark that is not live belongs to a destroyed
//! entity, so no tombstone set is needed.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use civitas_types::{Entity, EntityId, EntityKind, EntityState, Subtype};

use crate::error::RegistryError;

/// Owner of every live entity in a simulation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityRegistry {
    /// Live entities (active or inactive).
    entities: BTreeMap<EntityId, Entity>,
    /// Live ids per kind, ascending.
    by_kind: BTreeMap<EntityKind, BTreeSet<EntityId>>,
    /// Highest id ever issued (0 = none yet).
    last_issued: u64,
}

impl EntityRegistry {
    /// Create an empty registry.
    pub const fn new() -> Self {
        Self {
            entities: BTreeMap::new(),
            by_kind: BTreeMap::new(),
            last_issued: 0,
        }
    }

    /// Create an active entity.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidSubtype`] if `subtype` does not
    /// belong to `kind`, or [`RegistryError::IdExhausted`] if no id is left.
    pub fn create(
        &mut self,
        kind: EntityKind,
        subtype: Subtype,
    ) -> Result<EntityId, RegistryError> {
        if subtype.kind() != kind {
            return Err(RegistryError::InvalidSubtype {
                kind,
                subtype: subtype.as_str().to_owned(),
            });
        }

        let raw = self
            .last_issued
            .checked_add(1)
            .ok_or(RegistryError::IdExhausted)?;
        self.last_issued = raw;
        let id = EntityId::from_raw(raw);

        self.entities.insert(
            id,
            Entity {
                id,
                kind,
                subtype,
                state: EntityState::Active,
            },
        );
        self.by_kind.entry(kind).or_default().insert(id);

        debug!(entity_id = %id, %subtype, "Entity created");
        Ok(id)
    }

    /// Create an active entity from a subtype name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidSubtype`] if `name` is not a subtype
    /// of `kind`.
    pub fn create_named(
        &mut self,
        kind: EntityKind,
        name: &str,
    ) -> Result<EntityId, RegistryError> {
        let subtype = Subtype::parse(kind, name).ok_or_else(|| RegistryError::InvalidSubtype {
            kind,
            subtype: name.to_owned(),
        })?;
        self.create(kind, subtype)
    }

    /// Copy of a live entity.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if the id was never issued or
    /// the entity was destroyed.
    pub fn get(&self, id: EntityId) -> Result<Entity, RegistryError> {
        self.entities
            .get(&id)
            .copied()
            .ok_or(RegistryError::NotFound(id))
    }

    /// Destroy an entity.
    ///
    /// Returns the final record (with state [`EntityState::Destroyed`]) the
    /// first time, and `None` if the entity was already destroyed.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if the id was never issued.
    pub fn destroy(&mut self, id: EntityId) -> Result<Option<Entity>, RegistryError> {
        let Some(mut entity) = self.entities.remove(&id) else {
            return if self.was_issued(id) {
                Ok(None)
            } else {
                Err(RegistryError::NotFound(id))
            };
        };

        if let Some(ids) = self.by_kind.get_mut(&entity.kind) {
            ids.remove(&id);
        }
        entity.state = EntityState::Destroyed;
        debug!(entity_id = %id, subtype = %entity.subtype, "Entity destroyed");
        Ok(Some(entity))
    }

    /// Move a live entity between [`EntityState::Active`] and
    /// [`EntityState::Inactive`]. Returns the previous state.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for unknown or destroyed ids and
    /// [`RegistryError::InvalidTransition`] for a target of
    /// [`EntityState::Destroyed`] (use [`destroy`](Self::destroy)).
    pub fn set_state(
        &mut self,
        id: EntityId,
        state: EntityState,
    ) -> Result<EntityState, RegistryError> {
        if state == EntityState::Destroyed {
            return Err(RegistryError::InvalidTransition { id, to: state });
        }
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(RegistryError::NotFound(id))?;
        let previous = entity.state;
        entity.state = state;
        Ok(previous)
    }

    /// Live ids of `kind` in ascending order.
    ///
    /// Each call starts a fresh pass over the current contents.
    pub fn list_by_kind(&self, kind: EntityKind) -> impl Iterator<Item = EntityId> {
        self.by_kind.get(&kind).into_iter().flatten().copied()
    }

    /// Live entities in ascending id order.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Number of live entities of `kind`.
    pub fn count_by_kind(&self, kind: EntityKind) -> usize {
        self.by_kind.get(&kind).map_or(0, BTreeSet::len)
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether there are no live entities.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Whether `id` was issued and has since been destroyed.
    pub fn is_destroyed(&self, id: EntityId) -> bool {
        self.was_issued(id) && !self.entities.contains_key(&id)
    }

    const fn was_issued(&self, id: EntityId) -> bool {
        let raw = id.into_inner();
        raw >= 1 && raw <= self.last_issued
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use civitas_types::{BuildingType, CitizenType, InfrastructureType};

    use super::*;

    const WORKER: Subtype = Subtype::Citizen(CitizenType::Worker);
    const RETIREE: Subtype = Subtype::Citizen(CitizenType::Retiree);
    const HOUSING: Subtype = Subtype::Building(BuildingType::Residential);
    const ROAD: Subtype = Subtype::Infrastructure(InfrastructureType::Road);

    #[test]
    fn create_issues_ascending_ids() {
        let mut registry = EntityRegistry::new();
        let a = registry.create(EntityKind::Citizen, WORKER).unwrap();
        let b = registry.create(EntityKind::Building, HOUSING).unwrap();
        assert!(a < b);
        assert_eq!(a.into_inner(), 1);
        assert_eq!(registry.get(b).unwrap().state, EntityState::Active);
    }

    #[test]
    fn create_rejects_subtype_of_other_kind() {
        let mut registry = EntityRegistry::new();
        let err = registry.create(EntityKind::Citizen, ROAD).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidSubtype { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn create_named_parses_and_rejects() {
        let mut registry = EntityRegistry::new();
        let id = registry
            .create_named(EntityKind::Infrastructure, "water_system")
            .unwrap();
        assert_eq!(
            registry.get(id).unwrap().subtype,
            Subtype::Infrastructure(InfrastructureType::WaterSystem)
        );

        let err = registry
            .create_named(EntityKind::Building, "skyscraper")
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::InvalidSubtype {
                kind: EntityKind::Building,
                subtype: "skyscraper".to_owned(),
            }
        );
    }

    #[test]
    fn get_unknown_is_not_found() {
        let registry = EntityRegistry::new();
        let id = EntityId::from_raw(42);
        assert_eq!(registry.get(id), Err(RegistryError::NotFound(id)));
    }

    #[test]
    fn destroy_is_idempotent() {
        let mut registry = EntityRegistry::new();
        let id = registry.create(EntityKind::Citizen, WORKER).unwrap();

        let first = registry.destroy(id).unwrap();
        assert_eq!(first.map(|e| e.state), Some(EntityState::Destroyed));
        assert_eq!(registry.destroy(id), Ok(None));
        assert_eq!(registry.get(id), Err(RegistryError::NotFound(id)));
        assert!(registry.is_destroyed(id));
    }

    #[test]
    fn destroy_never_issued_is_not_found() {
        let mut registry = EntityRegistry::new();
        let id = EntityId::from_raw(3);
        assert_eq!(registry.destroy(id), Err(RegistryError::NotFound(id)));
    }

    #[test]
    fn destroyed_ids_are_not_reused_or_listed() {
        let mut registry = EntityRegistry::new();
        let a = registry.create(EntityKind::Citizen, WORKER).unwrap();
        let b = registry.create(EntityKind::Citizen, RETIREE).unwrap();
        let _ = registry.destroy(b).unwrap();
        let c = registry.create(EntityKind::Citizen, WORKER).unwrap();

        assert_ne!(c, b);
        let ids: Vec<EntityId> = registry.list_by_kind(EntityKind::Citizen).collect();
        assert_eq!(ids, vec![a, c]);
    }

    #[test]
    fn list_by_kind_is_restartable_and_scoped() {
        let mut registry = EntityRegistry::new();
        let w = registry.create(EntityKind::Citizen, WORKER).unwrap();
        let _h = registry.create(EntityKind::Building, HOUSING).unwrap();

        let first: Vec<EntityId> = registry.list_by_kind(EntityKind::Citizen).collect();
        let second: Vec<EntityId> = registry.list_by_kind(EntityKind::Citizen).collect();
        assert_eq!(first, vec![w]);
        assert_eq!(first, second);
        assert_eq!(registry.list_by_kind(EntityKind::Infrastructure).count(), 0);
        assert_eq!(registry.count_by_kind(EntityKind::Building), 1);
    }

    #[test]
    fn set_state_toggles_and_refuses_destroyed() {
        let mut registry = EntityRegistry::new();
        let id = registry.create(EntityKind::Citizen, WORKER).unwrap();

        assert_eq!(
            registry.set_state(id, EntityState::Inactive),
            Ok(EntityState::Active)
        );
        assert_eq!(registry.get(id).unwrap().state, EntityState::Inactive);
        assert!(matches!(
            registry.set_state(id, EntityState::Destroyed),
            Err(RegistryError::InvalidTransition { .. })
        ));

        let _ = registry.destroy(id).unwrap();
        assert_eq!(
            registry.set_state(id, EntityState::Active),
            Err(RegistryError::NotFound(id))
        );
    }

    #[test]
    fn inactive_entities_are_still_listed() {
        let mut registry = EntityRegistry::new();
        let id = registry.create(EntityKind::Citizen, WORKER).unwrap();
        let _ = registry.set_state(id, EntityState::Inactive).unwrap();
        assert_eq!(registry.list_by_kind(EntityKind::Citizen).count(), 1);
    }
}
