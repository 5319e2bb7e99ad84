//! Replicated actions: targeted state changes addressed by entity UID.
//!
//! Applying an action whose target entity or component no longer exists
//! logs a warning and does nothing.

use bytes::{BufMut, BytesMut};
use tracing::warn;

use crate::{
    component::{Component, ComponentKind},
    ecs::{EntityId, EntityManager},
    math::Vec3,
    physics::PhysicsBackend,
    wire::{self, DecodeError},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    Translate { target: EntityId, delta: Vec3 },
    Rotate { target: EntityId, delta: Vec3 },
    Scale { target: EntityId, delta: Vec3 },
    SetMovingLeft { target: EntityId, value: bool },
    SetMovingDown { target: EntityId, value: bool },
    SetMovingForward { target: EntityId, value: bool },
    SetXScalingUp { target: EntityId, value: bool },
    SetYScalingUp { target: EntityId, value: bool },
    SetZScalingUp { target: EntityId, value: bool },
}

impl Action {
    fn tag(&self) -> u8 {
        match self {
            Action::Translate { .. } => 1,
            Action::Rotate { .. } => 2,
            Action::Scale { .. } => 3,
            Action::SetMovingLeft { .. } => 4,
            Action::SetMovingDown { .. } => 5,
            Action::SetMovingForward { .. } => 6,
            Action::SetXScalingUp { .. } => 7,
            Action::SetYScalingUp { .. } => 8,
            Action::SetZScalingUp { .. } => 9,
        }
    }

    pub fn target(&self) -> EntityId {
        match *self {
            Action::Translate { target, .. }
            | Action::Rotate { target, .. }
            | Action::Scale { target, .. }
            | Action::SetMovingLeft { target, .. }
            | Action::SetMovingDown { target, .. }
            | Action::SetMovingForward { target, .. }
            | Action::SetXScalingUp { target, .. }
            | Action::SetYScalingUp { target, .. }
            | Action::SetZScalingUp { target, .. } => target,
        }
    }

    /// Applies the action. Returns false when the target was missing.
    pub fn apply(&self, entities: &mut EntityManager, physics: &mut dyn PhysicsBackend) -> bool {
        let target = self.target();
        let Some(entity) = entities.get_mut(target) else {
            warn!(?target, action = ?self, "action target entity not found");
            return false;
        };

        match *self {
            Action::Translate { delta, .. } => {
                entity.transform.translation += delta;
                if let Some(body) = entity.body_handle() {
                    physics.set_position(body, entity.transform.translation);
                }
                true
            }
            Action::Rotate { delta, .. } => {
                entity.transform.rotation += delta;
                true
            }
            Action::Scale { delta, .. } => {
                entity.transform.scale += delta;
                true
            }
            Action::SetMovingLeft { value, .. }
            | Action::SetMovingDown { value, .. }
            | Action::SetMovingForward { value, .. } => {
                let Some(Component::TranslateOverTime(c)) =
                    entity.component_mut(ComponentKind::TranslateOverTime)
                else {
                    warn!(?target, action = ?self, "target has no translate-over-time component");
                    return false;
                };
                match self {
                    Action::SetMovingLeft { .. } => c.set_moving_left(value),
                    Action::SetMovingDown { .. } => c.set_moving_down(value),
                    _ => c.set_moving_forward(value),
                }
                true
            }
            Action::SetXScalingUp { value, .. }
            | Action::SetYScalingUp { value, .. }
            | Action::SetZScalingUp { value, .. } => {
                let Some(Component::ScaleOverTime(c)) =
                    entity.component_mut(ComponentKind::ScaleOverTime)
                else {
                    warn!(?target, action = ?self, "target has no scale-over-time component");
                    return false;
                };
                match self {
                    Action::SetXScalingUp { .. } => c.set_x_scaling_up(value),
                    Action::SetYScalingUp { .. } => c.set_y_scaling_up(value),
                    _ => c.set_z_scaling_up(value),
                }
                true
            }
        }
    }

    /// `[tag u8][target u32][vec3 | bool]`
    pub fn encode(&self, out: &mut BytesMut) {
        out.put_u8(self.tag());
        out.put_u32(self.target().0);
        match *self {
            Action::Translate { delta, .. }
            | Action::Rotate { delta, .. }
            | Action::Scale { delta, .. } => wire::put_vec3(out, delta),
            Action::SetMovingLeft { value, .. }
            | Action::SetMovingDown { value, .. }
            | Action::SetMovingForward { value, .. }
            | Action::SetXScalingUp { value, .. }
            | Action::SetYScalingUp { value, .. }
            | Action::SetZScalingUp { value, .. } => wire::put_bool(out, value),
        }
    }

    pub fn decode(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        let tag = wire::get_u8(buf)?;
        let target = EntityId(wire::get_u32(buf)?);
        let action = match tag {
            1 => Action::Translate {
                target,
                delta: wire::get_vec3(buf)?,
            },
            2 => Action::Rotate {
                target,
                delta: wire::get_vec3(buf)?,
            },
            3 => Action::Scale {
                target,
                delta: wire::get_vec3(buf)?,
            },
            4..=9 => {
                let value = wire::get_bool(buf)?;
                match tag {
                    4 => Action::SetMovingLeft { target, value },
                    5 => Action::SetMovingDown { target, value },
                    6 => Action::SetMovingForward { target, value },
                    7 => Action::SetXScalingUp { target, value },
                    8 => Action::SetYScalingUp { target, value },
                    _ => Action::SetZScalingUp { target, value },
                }
            }
            other => return Err(DecodeError::UnknownActionKind(other)),
        };
        Ok(action)
    }
}
