//! Components.
//!
//! The set of component kinds is closed, so a component is one variant of
//! [`Component`] and dispatch is a `match`. Replicable kinds implement
//! [`Replicable`] and travel inside world snapshots. The rest (cameras,
//! physics bodies, controllers, goal listeners) stay on the process that
//! created them.
//!
//! Components never hold a pointer to their entity. Everything they need
//! about it (owner UID, physics body, transform) is passed into `update`.

use std::collections::HashMap;
use std::f32::consts::FRAC_PI_4;

use bytes::{BufMut, BytesMut};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    ecs::EntityId,
    event::{EventQueue, GameEvent},
    math::{Transform, Vec3},
    physics::{BodyDef, BodyHandle, BodyKind, Contact, PhysicsBackend},
    protocol::ClientId,
    render::{CameraView, Projection, SceneBackend, SceneHandle},
    wire::{self, DecodeError},
};

bitflags::bitflags! {
    /// Buttons a paddle controller samples. Arrow keys and WASD.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct PaddleButtons: u8 {
        const LEFT = 1 << 0;
        const RIGHT = 1 << 1;
        const UP = 1 << 2;
        const DOWN = 1 << 3;
        const W = 1 << 4;
        const A = 1 << 5;
        const S = 1 << 6;
        const D = 1 << 7;
    }
}

impl Default for PaddleButtons {
    fn default() -> Self {
        Self::empty()
    }
}

/// Latest controller state per connected client.
pub type ControlInputs = HashMap<ClientId, PaddleButtons>;

/// Wire tag of each component kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ComponentKind {
    Render = 1,
    RigidBody = 2,
    PerspectiveCamera = 3,
    OrthographicCamera = 4,
    TranslateOverTime = 5,
    RotateOverTime = 6,
    ScaleOverTime = 7,
    ClientPaddleController = 8,
    ServerPaddleController = 9,
    BallController = 10,
    GoalListener = 11,
}

impl ComponentKind {
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Whether this kind crosses the wire in world snapshots.
    pub fn is_replicable(self) -> bool {
        matches!(
            self,
            ComponentKind::Render
                | ComponentKind::TranslateOverTime
                | ComponentKind::RotateOverTime
                | ComponentKind::ScaleOverTime
        )
    }
}

/// Encode/decode contract of replicable components.
pub trait Replicable: Sized {
    const KIND: ComponentKind;

    fn encode(&self, out: &mut BytesMut);
    fn decode(buf: &mut &[u8]) -> Result<Self, DecodeError>;
}

/// Resources released by destroyed components, handed back to the owner of
/// the physics world and scene.
#[derive(Debug, Default)]
pub struct Retired {
    pub bodies: Vec<BodyHandle>,
    pub scene_nodes: Vec<SceneHandle>,
}

impl Retired {
    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty() && self.scene_nodes.is_empty()
    }

    pub fn release(&mut self, physics: &mut dyn PhysicsBackend, scene: &mut dyn SceneBackend) {
        for body in self.bodies.drain(..) {
            physics.destroy_body(body);
        }
        for node in self.scene_nodes.drain(..) {
            scene.remove(node);
        }
    }
}

/// Everything a component may touch during one update.
pub struct UpdateContext<'a> {
    pub dt_sec: f32,
    /// Entity being updated.
    pub owner: EntityId,
    /// The entity's physics body, if it has a rigid-body component.
    pub body: Option<BodyHandle>,
    pub physics: &'a mut dyn PhysicsBackend,
    pub scene: &'a mut dyn SceneBackend,
    pub events: &'a mut EventQueue,
    pub controls: &'a ControlInputs,
    /// Collision-begin events of this tick's physics step.
    pub contacts: &'a [Contact],
    /// Buttons held on this machine (client-side controllers only).
    pub local_input: PaddleButtons,
}

impl<'a> UpdateContext<'a> {
    pub fn new(
        dt_sec: f32,
        physics: &'a mut dyn PhysicsBackend,
        scene: &'a mut dyn SceneBackend,
        events: &'a mut EventQueue,
        controls: &'a ControlInputs,
        contacts: &'a [Contact],
    ) -> Self {
        Self {
            dt_sec,
            owner: EntityId(0),
            body: None,
            physics,
            scene,
            events,
            controls,
            contacts,
            local_input: PaddleButtons::empty(),
        }
    }

    pub fn with_local_input(mut self, local_input: PaddleButtons) -> Self {
        self.local_input = local_input;
        self
    }
}

// ─── Render ───

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelRef {
    pub name: String,
    pub obj_file: String,
}

/// Sprites and models drawn at the entity's transform.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenderComponent {
    #[serde(default)]
    pub sprites: Vec<String>,
    #[serde(default)]
    pub models: Vec<ModelRef>,
    #[serde(skip)]
    handles: Vec<SceneHandle>,
}

impl PartialEq for RenderComponent {
    fn eq(&self, other: &Self) -> bool {
        self.sprites == other.sprites && self.models == other.models
    }
}

impl RenderComponent {
    pub fn new(sprites: Vec<String>, models: Vec<ModelRef>) -> Self {
        Self {
            sprites,
            models,
            handles: Vec::new(),
        }
    }

    pub fn with_sprite(name: impl Into<String>) -> Self {
        Self::new(vec![name.into()], Vec::new())
    }

    /// Scene handles currently held; empty until the first sync.
    pub fn handles(&self) -> &[SceneHandle] {
        &self.handles
    }

    /// Creates scene instances on first use, then pushes the transform.
    pub fn sync(&mut self, transform: &Transform, scene: &mut dyn SceneBackend) {
        if self.handles.is_empty() {
            for sprite in &self.sprites {
                self.handles.push(scene.add_sprite(sprite));
            }
            for model in &self.models {
                self.handles.push(scene.add_model(&model.name, &model.obj_file));
            }
        }
        for handle in &self.handles {
            scene.set_transform(*handle, transform);
        }
    }
}

impl Replicable for RenderComponent {
    const KIND: ComponentKind = ComponentKind::Render;

    fn encode(&self, out: &mut BytesMut) {
        if self.sprites.len() > u16::MAX as usize || self.models.len() > u16::MAX as usize {
            warn!(
                sprites = self.sprites.len(),
                models = self.models.len(),
                "render asset list truncated on encode"
            );
        }
        let sprites = &self.sprites[..self.sprites.len().min(u16::MAX as usize)];
        out.put_u16(sprites.len() as u16);
        for sprite in sprites {
            wire::put_str(out, sprite);
        }
        let models = &self.models[..self.models.len().min(u16::MAX as usize)];
        out.put_u16(models.len() as u16);
        for model in models {
            wire::put_str(out, &model.name);
            wire::put_str(out, &model.obj_file);
        }
    }

    fn decode(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        let n = wire::get_u16(buf)?;
        let sprites = (0..n)
            .map(|_| wire::get_str(buf))
            .collect::<Result<Vec<_>, _>>()?;
        let n = wire::get_u16(buf)?;
        let models = (0..n)
            .map(|_| {
                Ok(ModelRef {
                    name: wire::get_str(buf)?,
                    obj_file: wire::get_str(buf)?,
                })
            })
            .collect::<Result<Vec<_>, DecodeError>>()?;
        Ok(Self {
            sprites,
            models,
            handles: Vec::new(),
        })
    }
}

// ─── Rigid body ───

fn default_mass() -> f32 {
    1.0
}

/// Physics body whose position drives the entity translation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigidBodyComponent {
    #[serde(default)]
    pub kind: BodyKind,
    pub half_extents: Vec3,
    #[serde(default)]
    pub velocity: Vec3,
    #[serde(default = "default_mass")]
    pub mass: f32,
    #[serde(skip)]
    handle: Option<BodyHandle>,
}

impl RigidBodyComponent {
    pub fn new(kind: BodyKind, half_extents: Vec3) -> Self {
        Self {
            kind,
            half_extents,
            velocity: Vec3::ZERO,
            mass: default_mass(),
            handle: None,
        }
    }

    pub fn handle(&self) -> Option<BodyHandle> {
        self.handle
    }

    /// Creates the body at the entity's translation on first call.
    pub fn ensure_created(
        &mut self,
        transform: &Transform,
        physics: &mut dyn PhysicsBackend,
    ) -> BodyHandle {
        *self.handle.get_or_insert_with(|| {
            physics.create_body(&BodyDef {
                kind: self.kind,
                position: transform.translation,
                velocity: self.velocity,
                half_extents: self.half_extents,
                mass: self.mass,
            })
        })
    }
}

// ─── Cameras ───

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerspectiveCamera {
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for PerspectiveCamera {
    fn default() -> Self {
        Self {
            fov_y: std::f32::consts::FRAC_PI_3,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrthographicCamera {
    pub left: f32,
    pub right: f32,
    pub bottom: f32,
    pub top: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for OrthographicCamera {
    fn default() -> Self {
        Self {
            left: -10.0,
            right: 10.0,
            bottom: -7.0,
            top: 7.0,
            near: -100.0,
            far: 100.0,
        }
    }
}

// ─── Over-time motion ───

/// Ping-pong motion along one axis between `min` and `max`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AxisSweep {
    /// Currently heading towards `min`.
    pub decreasing: bool,
    /// Units per second.
    pub speed: f32,
    pub min: f32,
    pub max: f32,
}

impl AxisSweep {
    /// Returns this tick's delta. The direction flips once `current` is past
    /// a limit; the flip takes effect on the next step.
    fn step(&mut self, current: f32, dt_sec: f32) -> f32 {
        let delta = if self.decreasing {
            if current < self.min {
                self.decreasing = false;
            }
            -self.speed
        } else {
            if current > self.max {
                self.decreasing = true;
            }
            self.speed
        };
        delta * dt_sec
    }

    fn encode(&self, out: &mut BytesMut) {
        wire::put_bool(out, self.decreasing);
        out.put_f32(self.speed);
        out.put_f32(self.min);
        out.put_f32(self.max);
    }

    fn decode(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            decreasing: wire::get_bool(buf)?,
            speed: wire::get_f32(buf)?,
            min: wire::get_f32(buf)?,
            max: wire::get_f32(buf)?,
        })
    }
}

/// Moves the entity back and forth on each axis.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslateOverTime {
    pub x: AxisSweep,
    pub y: AxisSweep,
    pub z: AxisSweep,
}

impl TranslateOverTime {
    pub fn moving_left(&self) -> bool {
        self.x.decreasing
    }

    pub fn set_moving_left(&mut self, v: bool) {
        self.x.decreasing = v;
    }

    pub fn moving_down(&self) -> bool {
        self.y.decreasing
    }

    pub fn set_moving_down(&mut self, v: bool) {
        self.y.decreasing = v;
    }

    pub fn moving_forward(&self) -> bool {
        self.z.decreasing
    }

    pub fn set_moving_forward(&mut self, v: bool) {
        self.z.decreasing = v;
    }

    fn update(&mut self, transform: &mut Transform, dt_sec: f32) {
        let t = transform.translation;
        let delta = Vec3::new(
            self.x.step(t.x, dt_sec),
            self.y.step(t.y, dt_sec),
            self.z.step(t.z, dt_sec),
        );
        transform.translation += delta;
    }
}

impl Replicable for TranslateOverTime {
    const KIND: ComponentKind = ComponentKind::TranslateOverTime;

    fn encode(&self, out: &mut BytesMut) {
        self.x.encode(out);
        self.y.encode(out);
        self.z.encode(out);
    }

    fn decode(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            x: AxisSweep::decode(buf)?,
            y: AxisSweep::decode(buf)?,
            z: AxisSweep::decode(buf)?,
        })
    }
}

/// Spins the entity at a constant rate.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RotateOverTime {
    pub radians_per_sec: Vec3,
}

impl Replicable for RotateOverTime {
    const KIND: ComponentKind = ComponentKind::RotateOverTime;

    fn encode(&self, out: &mut BytesMut) {
        wire::put_vec3(out, self.radians_per_sec);
    }

    fn decode(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            radians_per_sec: wire::get_vec3(buf)?,
        })
    }
}

/// Grows and shrinks the entity between per-axis limits.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleOverTime {
    pub x: AxisSweep,
    pub y: AxisSweep,
    pub z: AxisSweep,
}

impl ScaleOverTime {
    pub fn set_x_scaling_up(&mut self, v: bool) {
        self.x.decreasing = !v;
    }

    pub fn set_y_scaling_up(&mut self, v: bool) {
        self.y.decreasing = !v;
    }

    pub fn set_z_scaling_up(&mut self, v: bool) {
        self.z.decreasing = !v;
    }

    fn update(&mut self, transform: &mut Transform, dt_sec: f32) {
        let s = transform.scale;
        let delta = Vec3::new(
            self.x.step(s.x, dt_sec),
            self.y.step(s.y, dt_sec),
            self.z.step(s.z, dt_sec),
        );
        transform.scale += delta;
    }
}

impl Replicable for ScaleOverTime {
    const KIND: ComponentKind = ComponentKind::ScaleOverTime;

    fn encode(&self, out: &mut BytesMut) {
        self.x.encode(out);
        self.y.encode(out);
        self.z.encode(out);
    }

    fn decode(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            x: AxisSweep::decode(buf)?,
            y: AxisSweep::decode(buf)?,
            z: AxisSweep::decode(buf)?,
        })
    }
}

// ─── Pong gameplay ───

/// Samples this machine's buttons so the client can forward them.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ClientPaddleController {
    #[serde(skip)]
    state: PaddleButtons,
}

impl ClientPaddleController {
    pub fn state(&self) -> PaddleButtons {
        self.state
    }
}

/// Drives a paddle body from the buttons a remote client holds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServerPaddleController {
    pub client_id: ClientId,
    pub up: PaddleButtons,
    pub down: PaddleButtons,
    /// Units per second.
    pub speed: f32,
    pub min_y: f32,
    pub max_y: f32,
}

impl ServerPaddleController {
    fn update(&self, transform: &Transform, ctx: &mut UpdateContext<'_>) {
        let held = ctx
            .controls
            .get(&self.client_id)
            .copied()
            .unwrap_or_default();
        let Some(body) = ctx.body else {
            if !held.is_empty() {
                warn!(owner = ?ctx.owner, client_id = ?self.client_id, "paddle has no rigid body, input dropped");
            }
            return;
        };

        let mut dir = 0.0;
        if held.intersects(self.up) {
            dir += 1.0;
        }
        if held.intersects(self.down) {
            dir -= 1.0;
        }
        let y = transform.translation.y;
        if (dir > 0.0 && y >= self.max_y) || (dir < 0.0 && y <= self.min_y) {
            dir = 0.0;
        }
        ctx.physics
            .set_velocity(body, Vec3::new(0.0, dir * self.speed, 0.0));
    }
}

/// Launches the ball and bounces it off whatever it touches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BallController {
    /// Units per second.
    pub speed: f32,
    #[serde(skip)]
    launched: bool,
}

impl BallController {
    pub fn new(speed: f32) -> Self {
        Self {
            speed,
            launched: false,
        }
    }

    pub fn launched(&self) -> bool {
        self.launched
    }

    /// Relaunches on the next update.
    pub fn reset(&mut self) {
        self.launched = false;
    }

    fn update(&mut self, ctx: &mut UpdateContext<'_>) {
        let Some(body) = ctx.body else {
            return;
        };

        if !self.launched {
            let mut rng = rand::thread_rng();
            let angle = rng.gen_range(-FRAC_PI_4..FRAC_PI_4);
            let dir_x = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
            let v = Vec3::new(angle.cos() * dir_x, angle.sin(), 0.0) * self.speed;
            ctx.physics.set_velocity(body, v);
            self.launched = true;
        }

        for contact in ctx.contacts {
            let Some((_, normal)) = contact.involving(body) else {
                continue;
            };
            let Some(v) = ctx.physics.velocity(body) else {
                continue;
            };
            if v.dot(normal) < 0.0 {
                let bounced = v.reflect(normal).normalized() * self.speed;
                ctx.physics.set_velocity(body, bounced);
            }
        }
    }
}

/// Reports a goal whenever its body is touched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GoalListener {
    /// Side credited when this goal is hit.
    pub side: u8,
}

impl GoalListener {
    fn update(&self, ctx: &mut UpdateContext<'_>) {
        let Some(body) = ctx.body else {
            return;
        };
        let hits = ctx
            .contacts
            .iter()
            .filter(|c| c.involving(body).is_some())
            .count();
        for _ in 0..hits {
            ctx.events.queue(GameEvent::GoalScored {
                goal: ctx.owner,
                side: self.side,
            });
        }
    }
}

// ─── Dispatch ───

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Component {
    Render(RenderComponent),
    RigidBody(RigidBodyComponent),
    PerspectiveCamera(PerspectiveCamera),
    OrthographicCamera(OrthographicCamera),
    TranslateOverTime(TranslateOverTime),
    RotateOverTime(RotateOverTime),
    ScaleOverTime(ScaleOverTime),
    ClientPaddleController(ClientPaddleController),
    ServerPaddleController(ServerPaddleController),
    BallController(BallController),
    GoalListener(GoalListener),
}

impl Component {
    pub fn kind(&self) -> ComponentKind {
        match self {
            Component::Render(_) => ComponentKind::Render,
            Component::RigidBody(_) => ComponentKind::RigidBody,
            Component::PerspectiveCamera(_) => ComponentKind::PerspectiveCamera,
            Component::OrthographicCamera(_) => ComponentKind::OrthographicCamera,
            Component::TranslateOverTime(_) => ComponentKind::TranslateOverTime,
            Component::RotateOverTime(_) => ComponentKind::RotateOverTime,
            Component::ScaleOverTime(_) => ComponentKind::ScaleOverTime,
            Component::ClientPaddleController(_) => ComponentKind::ClientPaddleController,
            Component::ServerPaddleController(_) => ComponentKind::ServerPaddleController,
            Component::BallController(_) => ComponentKind::BallController,
            Component::GoalListener(_) => ComponentKind::GoalListener,
        }
    }

    pub fn update(&mut self, transform: &mut Transform, ctx: &mut UpdateContext<'_>) {
        match self {
            Component::Render(c) => c.sync(transform, ctx.scene),
            Component::RigidBody(c) => {
                if let Some(position) = c.handle.and_then(|h| ctx.physics.position(h)) {
                    transform.translation = position;
                }
            }
            Component::PerspectiveCamera(c) => ctx.scene.set_camera(CameraView {
                eye: transform.translation,
                rotation: transform.rotation,
                projection: Projection::Perspective {
                    fov_y: c.fov_y,
                    aspect: c.aspect,
                    near: c.near,
                    far: c.far,
                },
            }),
            Component::OrthographicCamera(c) => ctx.scene.set_camera(CameraView {
                eye: transform.translation,
                rotation: transform.rotation,
                projection: Projection::Orthographic {
                    left: c.left,
                    right: c.right,
                    bottom: c.bottom,
                    top: c.top,
                    near: c.near,
                    far: c.far,
                },
            }),
            Component::TranslateOverTime(c) => c.update(transform, ctx.dt_sec),
            Component::RotateOverTime(c) => {
                transform.rotation += c.radians_per_sec * ctx.dt_sec;
            }
            Component::ScaleOverTime(c) => c.update(transform, ctx.dt_sec),
            Component::ClientPaddleController(c) => c.state = ctx.local_input,
            Component::ServerPaddleController(c) => c.update(transform, ctx),
            Component::BallController(c) => c.update(ctx),
            Component::GoalListener(c) => c.update(ctx),
        }
    }

    /// Hands any physics or scene resources over to `retired`.
    pub fn destroy(&mut self, retired: &mut Retired) {
        match self {
            Component::Render(c) => retired.scene_nodes.append(&mut c.handles),
            Component::RigidBody(c) => retired.bodies.extend(c.handle.take()),
            _ => {}
        }
    }

    /// Writes `kind tag + payload` and returns true for replicable kinds;
    /// writes nothing and returns false otherwise.
    pub fn encode_replicated(&self, out: &mut BytesMut) -> bool {
        fn put<R: Replicable>(c: &R, out: &mut BytesMut) -> bool {
            out.put_u8(R::KIND.tag());
            c.encode(out);
            true
        }

        match self {
            Component::Render(c) => put(c, out),
            Component::TranslateOverTime(c) => put(c, out),
            Component::RotateOverTime(c) => put(c, out),
            Component::ScaleOverTime(c) => put(c, out),
            _ => false,
        }
    }

    /// Reads one `kind tag + payload`. Tags without a decoder are an error.
    pub fn decode_replicated(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        let tag = wire::get_u8(buf)?;
        let component = match tag {
            t if t == RenderComponent::KIND.tag() => {
                Component::Render(RenderComponent::decode(buf)?)
            }
            t if t == TranslateOverTime::KIND.tag() => {
                Component::TranslateOverTime(TranslateOverTime::decode(buf)?)
            }
            t if t == RotateOverTime::KIND.tag() => {
                Component::RotateOverTime(RotateOverTime::decode(buf)?)
            }
            t if t == ScaleOverTime::KIND.tag() => {
                Component::ScaleOverTime(ScaleOverTime::decode(buf)?)
            }
            other => return Err(DecodeError::UnknownComponentKind(other)),
        };
        Ok(component)
    }
}
