//! Physics abstraction.
//!
//! The engine only needs a narrow slice of a physics library: step the world,
//! create/destroy bodies, read and write position and velocity, push forces,
//! and learn when two bodies start touching. [`KinematicPhysics`] provides
//! exactly that with velocity integration and AABB overlap tests; there is no
//! contact solver, so responses (bounces, resets) are up to components.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::math::Vec3;

/// Opaque body handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BodyHandle(pub u32);

/// How a body participates in the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BodyKind {
    /// Never moves.
    #[default]
    Static,
    /// Moves only by its velocity; ignores forces and impulses.
    Kinematic,
    /// Integrates forces and impulses.
    Dynamic,
}

/// Parameters for [`PhysicsBackend::create_body`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyDef {
    pub kind: BodyKind,
    pub position: Vec3,
    pub velocity: Vec3,
    pub half_extents: Vec3,
    pub mass: f32,
}

/// A collision-begin notification. `normal` points from `a` towards `b`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    pub a: BodyHandle,
    pub b: BodyHandle,
    pub normal: Vec3,
}

impl Contact {
    /// Returns the other body and the normal pointing into `body`, if `body`
    /// is part of this contact.
    pub fn involving(&self, body: BodyHandle) -> Option<(BodyHandle, Vec3)> {
        if self.a == body {
            Some((self.b, -self.normal))
        } else if self.b == body {
            Some((self.a, self.normal))
        } else {
            None
        }
    }
}

/// Physics stepper trait.
pub trait PhysicsBackend: Send {
    fn step(&mut self, dt_sec: f32, iterations: u32);
    fn create_body(&mut self, def: &BodyDef) -> BodyHandle;
    fn destroy_body(&mut self, body: BodyHandle);
    fn position(&self, body: BodyHandle) -> Option<Vec3>;
    fn set_position(&mut self, body: BodyHandle, position: Vec3);
    fn velocity(&self, body: BodyHandle) -> Option<Vec3>;
    fn set_velocity(&mut self, body: BodyHandle, velocity: Vec3);
    fn apply_force(&mut self, body: BodyHandle, force: Vec3);
    fn apply_impulse(&mut self, body: BodyHandle, impulse: Vec3);
    /// Returns and forgets the collision-begin events of the last step.
    fn drain_contacts(&mut self) -> Vec<Contact>;
}

/// No-op physics for processes that never own bodies (clients).
#[derive(Default)]
pub struct NullPhysics {
    next: u32,
}

impl PhysicsBackend for NullPhysics {
    fn step(&mut self, _dt_sec: f32, _iterations: u32) {}

    fn create_body(&mut self, _def: &BodyDef) -> BodyHandle {
        self.next += 1;
        BodyHandle(self.next)
    }

    fn destroy_body(&mut self, _body: BodyHandle) {}

    fn position(&self, _body: BodyHandle) -> Option<Vec3> {
        None
    }

    fn set_position(&mut self, _body: BodyHandle, _position: Vec3) {}

    fn velocity(&self, _body: BodyHandle) -> Option<Vec3> {
        None
    }

    fn set_velocity(&mut self, _body: BodyHandle, _velocity: Vec3) {}
    fn apply_force(&mut self, _body: BodyHandle, _force: Vec3) {}
    fn apply_impulse(&mut self, _body: BodyHandle, _impulse: Vec3) {}

    fn drain_contacts(&mut self) -> Vec<Contact> {
        Vec::new()
    }
}

#[derive(Debug, Clone)]
struct Body {
    kind: BodyKind,
    position: Vec3,
    velocity: Vec3,
    half_extents: Vec3,
    inv_mass: f32,
    force: Vec3,
}

impl Body {
    fn overlap(&self, other: &Body) -> Option<Vec3> {
        let d = other.position - self.position;
        let px = self.half_extents.x + other.half_extents.x - d.x.abs();
        let py = self.half_extents.y + other.half_extents.y - d.y.abs();
        let pz = self.half_extents.z + other.half_extents.z - d.z.abs();
        if px <= 0.0 || py <= 0.0 || pz <= 0.0 {
            return None;
        }
        // Axis of least penetration, signed towards `other`.
        let sign = |v: f32| if v < 0.0 { -1.0 } else { 1.0 };
        let normal = if px <= py && px <= pz {
            Vec3::new(sign(d.x), 0.0, 0.0)
        } else if py <= pz {
            Vec3::new(0.0, sign(d.y), 0.0)
        } else {
            Vec3::new(0.0, 0.0, sign(d.z))
        };
        Some(normal)
    }
}

/// Velocity-integrating world with begin-overlap detection.
///
/// Contacts are only reported for pairs that include a dynamic body.
#[derive(Default)]
pub struct KinematicPhysics {
    next: u32,
    bodies: BTreeMap<BodyHandle, Body>,
    touching: BTreeSet<(BodyHandle, BodyHandle)>,
    contacts: Vec<Contact>,
}

impl KinematicPhysics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    fn detect_contacts(&mut self) {
        let mut now = BTreeSet::new();
        let bodies: Vec<(&BodyHandle, &Body)> = self.bodies.iter().collect();
        for (i, (ha, a)) in bodies.iter().enumerate() {
            for (hb, b) in &bodies[i + 1..] {
                if a.kind != BodyKind::Dynamic && b.kind != BodyKind::Dynamic {
                    continue;
                }
                if let Some(normal) = a.overlap(b) {
                    let pair = (**ha, **hb);
                    now.insert(pair);
                    if !self.touching.contains(&pair) {
                        self.contacts.push(Contact {
                            a: pair.0,
                            b: pair.1,
                            normal,
                        });
                    }
                }
            }
        }
        self.touching = now;
    }
}

impl PhysicsBackend for KinematicPhysics {
    fn step(&mut self, dt_sec: f32, iterations: u32) {
        let iterations = iterations.max(1);
        let h = dt_sec / iterations as f32;
        for _ in 0..iterations {
            for body in self.bodies.values_mut() {
                match body.kind {
                    BodyKind::Static => {}
                    BodyKind::Kinematic => body.position += body.velocity * h,
                    BodyKind::Dynamic => {
                        body.velocity += body.force * (body.inv_mass * h);
                        body.position += body.velocity * h;
                    }
                }
            }
        }
        for body in self.bodies.values_mut() {
            body.force = Vec3::ZERO;
        }
        self.detect_contacts();
    }

    fn create_body(&mut self, def: &BodyDef) -> BodyHandle {
        self.next += 1;
        let handle = BodyHandle(self.next);
        let inv_mass = if def.mass > 0.0 { 1.0 / def.mass } else { 0.0 };
        self.bodies.insert(
            handle,
            Body {
                kind: def.kind,
                position: def.position,
                velocity: def.velocity,
                half_extents: def.half_extents,
                inv_mass,
                force: Vec3::ZERO,
            },
        );
        handle
    }

    fn destroy_body(&mut self, body: BodyHandle) {
        self.bodies.remove(&body);
        self.touching.retain(|(a, b)| *a != body && *b != body);
    }

    fn position(&self, body: BodyHandle) -> Option<Vec3> {
        self.bodies.get(&body).map(|b| b.position)
    }

    fn set_position(&mut self, body: BodyHandle, position: Vec3) {
        if let Some(b) = self.bodies.get_mut(&body) {
            b.position = position;
        }
    }

    fn velocity(&self, body: BodyHandle) -> Option<Vec3> {
        self.bodies.get(&body).map(|b| b.velocity)
    }

    fn set_velocity(&mut self, body: BodyHandle, velocity: Vec3) {
        if let Some(b) = self.bodies.get_mut(&body) {
            if b.kind != BodyKind::Static {
                b.velocity = velocity;
            }
        }
    }

    fn apply_force(&mut self, body: BodyHandle, force: Vec3) {
        if let Some(b) = self.bodies.get_mut(&body) {
            if b.kind == BodyKind::Dynamic {
                b.force += force;
            }
        }
    }

    fn apply_impulse(&mut self, body: BodyHandle, impulse: Vec3) {
        if let Some(b) = self.bodies.get_mut(&body) {
            if b.kind == BodyKind::Dynamic {
                b.velocity += impulse * b.inv_mass;
            }
        }
    }

    fn drain_contacts(&mut self) -> Vec<Contact> {
        std::mem::take(&mut self.contacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(kind: BodyKind, position: Vec3, velocity: Vec3) -> BodyDef {
        BodyDef {
            kind,
            position,
            velocity,
            half_extents: Vec3::new(0.5, 0.5, 0.5),
            mass: 1.0,
        }
    }

    #[test]
    fn dynamic_body_integrates_velocity_and_impulse() {
        let mut world = KinematicPhysics::new();
        let b = world.create_body(&def(BodyKind::Dynamic, Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0)));
        world.step(1.0, 4);
        assert_eq!(world.position(b), Some(Vec3::new(1.0, 0.0, 0.0)));
        world.apply_impulse(b, Vec3::new(0.0, 2.0, 0.0));
        assert_eq!(world.velocity(b), Some(Vec3::new(1.0, 2.0, 0.0)));
    }

    #[test]
    fn static_body_ignores_velocity() {
        let mut world = KinematicPhysics::new();
        let b = world.create_body(&def(BodyKind::Static, Vec3::ZERO, Vec3::ZERO));
        world.set_velocity(b, Vec3::new(5.0, 0.0, 0.0));
        world.step(1.0, 1);
        assert_eq!(world.position(b), Some(Vec3::ZERO));
    }

    #[test]
    fn contact_reported_once_per_touch() {
        let mut world = KinematicPhysics::new();
        let ball = world.create_body(&def(
            BodyKind::Dynamic,
            Vec3::new(-1.5, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
        ));
        let wall = world.create_body(&def(BodyKind::Static, Vec3::ZERO, Vec3::ZERO));

        world.step(1.0, 1);
        let contacts = world.drain_contacts();
        assert_eq!(contacts.len(), 1);
        let (other, n) = contacts[0].involving(ball).unwrap();
        assert_eq!(other, wall);
        // Normal into the ball points back the way it came.
        assert_eq!(n, Vec3::new(-1.0, 0.0, 0.0));

        // Still overlapping: no new begin event.
        world.set_velocity(ball, Vec3::ZERO);
        world.step(0.1, 1);
        assert!(world.drain_contacts().is_empty());
    }

    #[test]
    fn static_pairs_never_collide() {
        let mut world = KinematicPhysics::new();
        world.create_body(&def(BodyKind::Static, Vec3::ZERO, Vec3::ZERO));
        world.create_body(&def(BodyKind::Kinematic, Vec3::ZERO, Vec3::ZERO));
        world.step(0.1, 1);
        assert!(world.drain_contacts().is_empty());
    }
}
