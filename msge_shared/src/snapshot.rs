//! World snapshot codec.
//!
//! ```text
//! snapshot  := u32 entity_count, entity*
//! entity    := u32 uid, str tag, transform, u8 component_count, component*
//! component := u8 kind, payload
//! ```
//!
//! Only entities with `replicate` set are encoded, and of those only the
//! replicable components. Decoding never merges: the receiving manager is
//! cleared and refilled.

use std::{collections::BTreeSet, sync::Mutex};

use bytes::{BufMut, Bytes, BytesMut};
use tracing::warn;

use crate::{
    component::Component,
    ecs::{Entity, EntityId, EntityManager},
    wire::{self, DecodeError},
};

/// Encodes every replicated entity of `entities`.
pub fn encode_world(entities: &EntityManager) -> Bytes {
    let mut out = BytesMut::with_capacity(256);
    let count_at = out.len();
    out.put_u32(0);

    let mut count = 0u32;
    for entity in entities.replicated() {
        encode_entity(entity, &mut out);
        count += 1;
    }
    out[count_at..count_at + 4].copy_from_slice(&count.to_be_bytes());
    out.freeze()
}

fn encode_entity(entity: &Entity, out: &mut BytesMut) {
    out.put_u32(entity.uid().0);
    wire::put_str(out, &entity.tag);
    wire::put_transform(out, &entity.transform);

    let count_at = out.len();
    out.put_u8(0);
    let mut count = 0u8;
    for component in entity.components() {
        if count == u8::MAX {
            warn!(uid = ?entity.uid(), "replicated component list truncated");
            break;
        }
        if component.encode_replicated(out) {
            count += 1;
        }
    }
    out[count_at] = count;
}

/// Decodes a snapshot into fresh entities, in encoded order. A UID may
/// appear only once.
pub fn decode_world(bytes: &[u8]) -> Result<Vec<Entity>, DecodeError> {
    let mut buf = bytes;
    let count = wire::get_u32(&mut buf)?;
    // Each entity takes at least 43 bytes; cap the preallocation accordingly.
    let mut entities = Vec::with_capacity((count as usize).min(buf.len() / 43));
    let mut seen = BTreeSet::new();
    for _ in 0..count {
        let entity = decode_entity(&mut buf)?;
        if !seen.insert(entity.uid()) {
            return Err(DecodeError::DuplicateEntity(entity.uid().0));
        }
        entities.push(entity);
    }
    wire::expect_end(buf)?;
    Ok(entities)
}

fn decode_entity(buf: &mut &[u8]) -> Result<Entity, DecodeError> {
    let uid = EntityId(wire::get_u32(buf)?);
    let tag = wire::get_str(buf)?;
    let mut entity = Entity::with_uid(uid, tag);
    entity.transform = wire::get_transform(buf)?;
    entity.replicate = true;

    let n = wire::get_u8(buf)?;
    for _ in 0..n {
        let component = Component::decode_replicated(buf)?;
        let kind = component.kind();
        entity
            .add_component(component)
            .map_err(|_| DecodeError::DuplicateComponent {
                uid: uid.0,
                kind: kind.tag(),
            })?;
    }
    Ok(entity)
}

/// Decodes `bytes` and swaps the result into `shared`, holding the lock for
/// both steps. On error the manager is left untouched.
pub fn decode_and_swap(shared: &Mutex<EntityManager>, bytes: &[u8]) -> Result<usize, DecodeError> {
    let mut guard = shared
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let entities = decode_world(bytes)?;
    let n = entities.len();
    guard.apply_snapshot(entities);
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{
        AxisSweep, BallController, ComponentKind, ModelRef, PerspectiveCamera, RenderComponent,
        RigidBodyComponent, RotateOverTime, ScaleOverTime, TranslateOverTime,
    };
    use crate::math::{Transform, Vec3};
    use crate::physics::BodyKind;

    fn sweep(decreasing: bool, speed: f32) -> AxisSweep {
        AxisSweep {
            decreasing,
            speed,
            min: -speed,
            max: speed,
        }
    }

    fn mixed_world() -> EntityManager {
        let mut m = EntityManager::new();

        let mut ball = Entity::new("ball");
        ball.replicate = true;
        ball.transform = Transform {
            translation: Vec3::new(1.0, -2.0, 0.5),
            rotation: Vec3::new(0.0, 0.0, 0.25),
            scale: Vec3::new(2.0, 2.0, 1.0),
        };
        ball.add_component(Component::Render(RenderComponent::with_sprite("ball")))
            .unwrap();
        ball.add_component(Component::RigidBody(RigidBodyComponent::new(
            BodyKind::Dynamic,
            Vec3::ONE,
        )))
        .unwrap();
        ball.add_component(Component::BallController(BallController::new(6.0)))
            .unwrap();
        m.insert(ball);

        let mut ship = Entity::new("ship");
        ship.replicate = true;
        ship.add_component(Component::Render(RenderComponent::new(
            vec![],
            vec![ModelRef {
                name: "ship".into(),
                obj_file: "models/ship.obj".into(),
            }],
        )))
        .unwrap();
        ship.add_component(Component::TranslateOverTime(TranslateOverTime {
            x: sweep(true, 2.0),
            y: sweep(false, 0.5),
            z: AxisSweep::default(),
        }))
        .unwrap();
        ship.add_component(Component::RotateOverTime(RotateOverTime {
            radians_per_sec: Vec3::new(0.1, 0.2, 0.3),
        }))
        .unwrap();
        ship.add_component(Component::ScaleOverTime(ScaleOverTime {
            x: sweep(false, 1.0),
            ..Default::default()
        }))
        .unwrap();
        ship.add_component(Component::PerspectiveCamera(PerspectiveCamera::default()))
            .unwrap();
        m.insert(ship);

        let mut camera = Entity::new("camera");
        camera.replicate = false;
        camera
            .add_component(Component::PerspectiveCamera(PerspectiveCamera::default()))
            .unwrap();
        m.insert(camera);

        m
    }

    #[test]
    fn round_trip_keeps_only_replicable_state() {
        let world = mixed_world();
        let bytes = encode_world(&world);
        let decoded = decode_world(&bytes).unwrap();

        let originals: Vec<&Entity> = world.replicated().collect();
        assert_eq!(decoded.len(), originals.len());
        assert_eq!(decoded.len(), 2);

        for (got, want) in decoded.iter().zip(originals) {
            assert_eq!(got.uid(), want.uid());
            assert_eq!(got.tag, want.tag);
            assert_eq!(got.transform, want.transform);
            let expected: Vec<&Component> = want
                .components()
                .iter()
                .filter(|c| c.kind().is_replicable())
                .collect();
            let actual: Vec<&Component> = got.components().iter().collect();
            assert_eq!(actual, expected);
        }

        let ball = &decoded[0];
        assert!(ball.component(ComponentKind::RigidBody).is_none());
        assert!(ball.component(ComponentKind::BallController).is_none());
        assert_eq!(decoded[1].components().len(), 4);
    }

    #[test]
    fn empty_world_is_four_zero_bytes() {
        let bytes = encode_world(&EntityManager::new());
        assert_eq!(&bytes[..], &[0, 0, 0, 0]);
        assert!(decode_world(&bytes).unwrap().is_empty());
    }

    #[test]
    fn unknown_component_kind_fails_decode() {
        let mut m = EntityManager::new();
        let mut e = Entity::new("x");
        e.replicate = true;
        e.add_component(Component::RotateOverTime(RotateOverTime::default()))
            .unwrap();
        m.insert(e);
        let mut bytes = encode_world(&m).to_vec();
        // count(4) + uid(4) + tag(2 + 1) + transform(36) + n(1), then the kind tag.
        let kind_at = 4 + 4 + 3 + 36 + 1;
        assert_eq!(bytes[kind_at], ComponentKind::RotateOverTime.tag());
        bytes[kind_at] = 200;
        assert_eq!(
            decode_world(&bytes),
            Err(DecodeError::UnknownComponentKind(200))
        );
    }

    #[test]
    fn truncated_and_trailing_input_fail() {
        let bytes = encode_world(&mixed_world());
        assert!(matches!(
            decode_world(&bytes[..bytes.len() - 1]),
            Err(DecodeError::Truncated { .. })
        ));
        let mut long = bytes.to_vec();
        long.push(0);
        assert_eq!(decode_world(&long), Err(DecodeError::TrailingBytes(1)));
    }

    #[test]
    fn repeated_uid_is_rejected_and_manager_kept() {
        let mut bytes = BytesMut::new();
        bytes.put_u32(2);
        for tag in ["first", "second"] {
            encode_entity(&Entity::with_uid(EntityId(7), tag), &mut bytes);
        }
        assert_eq!(decode_world(&bytes), Err(DecodeError::DuplicateEntity(7)));

        let shared = Mutex::new(EntityManager::new());
        shared.lock().unwrap().insert(Entity::new("current"));
        assert_eq!(
            decode_and_swap(&shared, &bytes),
            Err(DecodeError::DuplicateEntity(7))
        );
        let m = shared.lock().unwrap();
        assert_eq!(m.len(), 1);
        assert!(m.by_tag("current").is_some());
    }

    #[test]
    fn decode_and_swap_replaces_and_keeps_on_error() {
        let shared = Mutex::new(EntityManager::new());
        shared.lock().unwrap().insert(Entity::new("stale"));

        let bytes = encode_world(&mixed_world());
        assert_eq!(decode_and_swap(&shared, &bytes).unwrap(), 2);
        {
            let m = shared.lock().unwrap();
            assert!(m.by_tag("stale").is_none());
            assert!(m.by_tag("ball").is_some());
        }

        assert!(decode_and_swap(&shared, &bytes[..10]).is_err());
        assert_eq!(shared.lock().unwrap().len(), 2);
    }
}
