//! Level definitions.
//!
//! A level is a JSON list of entity definitions. Component definitions use
//! the same `{"type": "...", ...}` shape as [`Component`]'s serde form, so
//! a level file is deserialized directly into components.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    component::{
        BallController, Component, GoalListener, PaddleButtons, RenderComponent,
        RigidBodyComponent, ServerPaddleController,
    },
    ecs::{Entity, EntityId, EntityManager},
    math::{Transform, Vec3},
    physics::BodyKind,
    protocol::ClientId,
    wire::MAX_STR_LEN,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDef {
    pub tag: String,
    #[serde(default)]
    pub transform: Transform,
    #[serde(default)]
    pub replicate: bool,
    #[serde(default)]
    pub components: Vec<Component>,
}

impl EntityDef {
    /// Rejects strings that would not survive a snapshot round trip.
    fn check_encodable(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.tag.len() <= MAX_STR_LEN,
            "entity tag is {} bytes, limit is {MAX_STR_LEN}",
            self.tag.len()
        );
        for component in &self.components {
            let Component::Render(render) = component else {
                continue;
            };
            let names = render
                .sprites
                .iter()
                .chain(render.models.iter().flat_map(|m| [&m.name, &m.obj_file]));
            for name in names {
                anyhow::ensure!(
                    name.len() <= MAX_STR_LEN,
                    "entity '{}': asset name is {} bytes, limit is {MAX_STR_LEN}",
                    self.tag,
                    name.len()
                );
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelDef {
    pub entities: Vec<EntityDef>,
}

impl LevelDef {
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read level {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse level {}", path.display()))
    }

    /// Spawns every entity immediately, in definition order. Returns the new
    /// UIDs.
    pub fn spawn_into(&self, entities: &mut EntityManager) -> anyhow::Result<Vec<EntityId>> {
        let mut uids = Vec::with_capacity(self.entities.len());
        for def in &self.entities {
            def.check_encodable()?;
            let mut entity = Entity::new(def.tag.clone());
            entity.transform = def.transform;
            entity.replicate = def.replicate;
            for component in &def.components {
                entity
                    .add_component(component.clone())
                    .with_context(|| format!("entity '{}'", def.tag))?;
            }
            debug!(uid = ?entity.uid(), tag = %def.tag, "spawned");
            uids.push(entity.uid());
            entities.insert(entity);
        }
        Ok(uids)
    }

    /// Built-in pong table: ball, two paddles, two walls, two goals.
    ///
    /// The left paddle belongs to client 1 (W/S), the right one to client 2
    /// (Up/Down). A ball reaching the left goal scores for side 1.
    pub fn pong() -> Self {
        let body = |kind, hx, hy| {
            Component::RigidBody(RigidBodyComponent::new(kind, Vec3::new(hx, hy, 0.5)))
        };
        let at = |x, y| Transform::from_translation(Vec3::new(x, y, 0.0));

        let ball = EntityDef {
            tag: "ball".into(),
            transform: Transform::default(),
            replicate: true,
            components: vec![
                Component::Render(RenderComponent::with_sprite("ball")),
                body(BodyKind::Dynamic, 0.25, 0.25),
                Component::BallController(BallController::new(6.0)),
            ],
        };
        let paddle = |tag: &str, x, client, up, down| EntityDef {
            tag: tag.into(),
            transform: at(x, 0.0),
            replicate: true,
            components: vec![
                Component::Render(RenderComponent::with_sprite("paddle")),
                body(BodyKind::Kinematic, 0.25, 1.5),
                Component::ServerPaddleController(ServerPaddleController {
                    client_id: ClientId(client),
                    up,
                    down,
                    speed: 8.0,
                    min_y: -4.5,
                    max_y: 4.5,
                }),
            ],
        };
        let wall = |tag: &str, y| EntityDef {
            tag: tag.into(),
            transform: at(0.0, y),
            replicate: true,
            components: vec![
                Component::Render(RenderComponent::with_sprite("wall")),
                body(BodyKind::Static, 10.0, 0.25),
            ],
        };
        let goal = |tag: &str, x, side| EntityDef {
            tag: tag.into(),
            transform: at(x, 0.0),
            replicate: false,
            components: vec![
                body(BodyKind::Static, 0.25, 6.0),
                Component::GoalListener(GoalListener { side }),
            ],
        };

        Self {
            entities: vec![
                ball,
                paddle("paddle_left", -8.0, 1, PaddleButtons::W, PaddleButtons::S),
                paddle("paddle_right", 8.0, 2, PaddleButtons::UP, PaddleButtons::DOWN),
                wall("wall_top", 6.0),
                wall("wall_bottom", -6.0),
                goal("goal_left", -10.0, 1),
                goal("goal_right", 10.0, 0),
            ],
        }
    }
}
