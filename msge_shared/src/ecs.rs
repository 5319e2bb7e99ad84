//! Entities and the entity manager.
//!
//! Entities live in a UID-keyed arena. Adds and removes requested while a
//! tick is running go to pending lists and are applied once per tick, after
//! the update pass, so the live map is never mutated mid-iteration.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    component::{Component, ComponentKind, Retired, UpdateContext},
    math::Transform,
    physics::BodyHandle,
};

/// Process-wide entity UID counter.
static NEXT_UID: AtomicU32 = AtomicU32::new(0);

/// Process-unique entity identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl EntityId {
    /// Takes the next UID from the process-wide counter.
    pub fn next() -> Self {
        Self(NEXT_UID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EcsError {
    #[error("entity {uid:?} already has a {kind:?} component")]
    DuplicateComponent { uid: EntityId, kind: ComponentKind },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    uid: EntityId,
    pub tag: String,
    pub transform: Transform,
    /// Include this entity in outgoing world snapshots.
    pub replicate: bool,
    components: Vec<Component>,
}

impl Entity {
    /// Creates an entity with a freshly allocated UID.
    pub fn new(tag: impl Into<String>) -> Self {
        Self::with_uid(EntityId::next(), tag)
    }

    /// Creates an entity with a known UID (snapshot decode).
    pub fn with_uid(uid: EntityId, tag: impl Into<String>) -> Self {
        Self {
            uid,
            tag: tag.into(),
            transform: Transform::default(),
            replicate: false,
            components: Vec::new(),
        }
    }

    pub fn uid(&self) -> EntityId {
        self.uid
    }

    /// Attaches a component. At most one component per kind.
    pub fn add_component(&mut self, component: Component) -> Result<(), EcsError> {
        let kind = component.kind();
        if self.component(kind).is_some() {
            return Err(EcsError::DuplicateComponent {
                uid: self.uid,
                kind,
            });
        }
        self.components.push(component);
        Ok(())
    }

    pub fn component(&self, kind: ComponentKind) -> Option<&Component> {
        self.components.iter().find(|c| c.kind() == kind)
    }

    pub fn component_mut(&mut self, kind: ComponentKind) -> Option<&mut Component> {
        self.components.iter_mut().find(|c| c.kind() == kind)
    }

    /// Components in attachment order.
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn components_mut(&mut self) -> impl Iterator<Item = &mut Component> {
        self.components.iter_mut()
    }

    /// Physics body of the rigid-body component, once created.
    pub fn body_handle(&self) -> Option<BodyHandle> {
        match self.component(ComponentKind::RigidBody) {
            Some(Component::RigidBody(rb)) => rb.handle(),
            _ => None,
        }
    }

    /// Updates every component in order.
    pub fn update(&mut self, ctx: &mut UpdateContext<'_>) {
        let Self {
            uid,
            transform,
            components,
            ..
        } = self;

        let mut body = None;
        for c in components.iter_mut() {
            if let Component::RigidBody(rb) = c {
                body = Some(rb.ensure_created(transform, ctx.physics));
            }
        }
        ctx.owner = *uid;
        ctx.body = body;

        for c in components.iter_mut() {
            c.update(transform, ctx);
        }
    }

    /// Tears down every component, handing their resources to `retired`.
    pub fn destroy(&mut self, retired: &mut Retired) {
        for c in &mut self.components {
            c.destroy(retired);
        }
    }
}

/// UID-keyed entity arena with deferred add/remove.
#[derive(Debug, Default)]
pub struct EntityManager {
    entities: BTreeMap<EntityId, Entity>,
    pending_add: Vec<Entity>,
    pending_remove: Vec<EntityId>,
    retired: Retired,
}

impl EntityManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts immediately. Only safe outside an update pass.
    pub fn insert(&mut self, entity: Entity) {
        if let Some(mut old) = self.entities.insert(entity.uid(), entity) {
            old.destroy(&mut self.retired);
        }
    }

    /// Queues an entity for insertion at the end of the next update.
    pub fn add(&mut self, entity: Entity) {
        self.pending_add.push(entity);
    }

    /// Queues a UID for removal at the end of the next update.
    pub fn remove(&mut self, uid: EntityId) {
        self.pending_remove.push(uid);
    }

    pub fn get(&self, uid: EntityId) -> Option<&Entity> {
        self.entities.get(&uid)
    }

    pub fn get_mut(&mut self, uid: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&uid)
    }

    pub fn contains(&self, uid: EntityId) -> bool {
        self.entities.contains_key(&uid)
    }

    /// First entity (lowest UID) with the given tag.
    pub fn by_tag(&self, tag: &str) -> Option<&Entity> {
        self.entities.values().find(|e| e.tag == tag)
    }

    pub fn by_tag_mut(&mut self, tag: &str) -> Option<&mut Entity> {
        self.entities.values_mut().find(|e| e.tag == tag)
    }

    /// Live entities in UID order.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.entities.values_mut()
    }

    /// Entities flagged for replication, in UID order.
    pub fn replicated(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values().filter(|e| e.replicate)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn pending(&self) -> (usize, usize) {
        (self.pending_add.len(), self.pending_remove.len())
    }

    /// Runs one update pass over every live entity, then applies pending
    /// adds and removes.
    pub fn update(&mut self, ctx: &mut UpdateContext<'_>) {
        for entity in self.entities.values_mut() {
            entity.update(ctx);
        }
        self.flush_pending();
    }

    /// Applies pending adds, then pending removes.
    pub fn flush_pending(&mut self) {
        for entity in std::mem::take(&mut self.pending_add) {
            self.insert(entity);
        }
        for uid in std::mem::take(&mut self.pending_remove) {
            if let Some(mut entity) = self.entities.remove(&uid) {
                entity.destroy(&mut self.retired);
            }
        }
    }

    /// Destroys every entity, including pending adds.
    pub fn clear(&mut self) {
        for (_, mut entity) in std::mem::take(&mut self.entities) {
            entity.destroy(&mut self.retired);
        }
        for mut entity in self.pending_add.drain(..) {
            entity.destroy(&mut self.retired);
        }
        self.pending_remove.clear();
    }

    /// Replaces the whole world with `entities`.
    pub fn apply_snapshot(&mut self, entities: Vec<Entity>) {
        self.clear();
        for entity in entities {
            self.insert(entity);
        }
    }

    /// Resources released by destroyed entities since the last call.
    pub fn take_retired(&mut self) -> Retired {
        std::mem::take(&mut self.retired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{
        ControlInputs, RenderComponent, RigidBodyComponent, RotateOverTime,
    };
    use crate::event::EventQueue;
    use crate::math::Vec3;
    use crate::physics::{BodyKind, KinematicPhysics, PhysicsBackend};
    use crate::render::HeadlessScene;

    #[test]
    fn uids_are_unique() {
        let a = Entity::new("a");
        let b = Entity::new("b");
        assert_ne!(a.uid(), b.uid());
    }

    #[test]
    fn one_component_per_kind() {
        let mut e = Entity::new("ball");
        e.add_component(Component::Render(RenderComponent::with_sprite("ball")))
            .unwrap();
        let err = e
            .add_component(Component::Render(RenderComponent::default()))
            .unwrap_err();
        assert_eq!(
            err,
            EcsError::DuplicateComponent {
                uid: e.uid(),
                kind: ComponentKind::Render
            }
        );
        assert_eq!(e.components().len(), 1);
    }

    #[test]
    fn add_and_remove_are_deferred_until_update() {
        let mut physics = KinematicPhysics::new();
        let mut scene = HeadlessScene::new();
        let mut events = EventQueue::new();
        let controls = ControlInputs::new();

        let mut m = EntityManager::new();
        let keep = Entity::new("keep");
        let keep_uid = keep.uid();
        m.insert(keep);

        let added = Entity::new("added");
        let added_uid = added.uid();
        m.add(added);
        m.remove(keep_uid);
        assert!(m.contains(keep_uid));
        assert!(!m.contains(added_uid));
        assert_eq!(m.pending(), (1, 1));

        let mut ctx = UpdateContext::new(0.1, &mut physics, &mut scene, &mut events, &controls, &[]);
        m.update(&mut ctx);
        assert!(!m.contains(keep_uid));
        assert!(m.contains(added_uid));
        assert_eq!(m.pending(), (0, 0));
    }

    #[test]
    fn update_drives_components_and_body() {
        let mut physics = KinematicPhysics::new();
        let mut scene = HeadlessScene::new();
        let mut events = EventQueue::new();
        let controls = ControlInputs::new();

        let mut e = Entity::new("spinner");
        e.add_component(Component::RotateOverTime(RotateOverTime {
            radians_per_sec: Vec3::new(0.0, 0.0, 2.0),
        }))
        .unwrap();
        let mut rb = RigidBodyComponent::new(BodyKind::Kinematic, Vec3::ONE);
        rb.velocity = Vec3::new(1.0, 0.0, 0.0);
        e.add_component(Component::RigidBody(rb)).unwrap();
        let uid = e.uid();

        let mut m = EntityManager::new();
        m.insert(e);
        {
            let mut ctx =
                UpdateContext::new(0.5, &mut physics, &mut scene, &mut events, &controls, &[]);
            m.update(&mut ctx);
        }
        assert_eq!(physics.body_count(), 1);
        physics.step(0.5, 1);
        {
            let mut ctx =
                UpdateContext::new(0.5, &mut physics, &mut scene, &mut events, &controls, &[]);
            m.update(&mut ctx);
        }

        let e = m.get(uid).unwrap();
        assert_eq!(e.transform.rotation, Vec3::new(0.0, 0.0, 2.0));
        assert_eq!(e.transform.translation, Vec3::new(0.5, 0.0, 0.0));
        assert!(e.body_handle().is_some());
    }

    #[test]
    fn clear_retires_resources() {
        let mut physics = KinematicPhysics::new();
        let mut scene = HeadlessScene::new();
        let mut events = EventQueue::new();
        let controls = ControlInputs::new();

        let mut e = Entity::new("ball");
        e.add_component(Component::Render(RenderComponent::with_sprite("ball")))
            .unwrap();
        e.add_component(Component::RigidBody(RigidBodyComponent::new(
            BodyKind::Dynamic,
            Vec3::ONE,
        )))
        .unwrap();
        let mut m = EntityManager::new();
        m.insert(e);
        let mut ctx = UpdateContext::new(0.1, &mut physics, &mut scene, &mut events, &controls, &[]);
        m.update(&mut ctx);
        assert_eq!(scene.len(), 1);

        m.clear();
        assert!(m.is_empty());
        let mut retired = m.take_retired();
        assert_eq!(retired.bodies.len(), 1);
        assert_eq!(retired.scene_nodes.len(), 1);
        retired.release(&mut physics, &mut scene);
        assert!(scene.is_empty());
        assert_eq!(physics.body_count(), 0);
    }

    #[test]
    fn queries_by_tag_and_replicate_flag() {
        let mut m = EntityManager::new();
        let mut ball = Entity::new("ball");
        ball.replicate = true;
        m.insert(ball);
        m.insert(Entity::new("camera"));
        assert_eq!(m.len(), 2);
        assert!(m.by_tag("ball").is_some());
        assert!(m.by_tag("nope").is_none());
        let replicated: Vec<_> = m.replicated().map(|e| e.tag.as_str()).collect();
        assert_eq!(replicated, ["ball"]);
    }
}
