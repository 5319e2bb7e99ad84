//! Server implementation.
//!
//! Authoritative fixed-timestep loop. One tick:
//! 1. drain client messages (controller states, actions);
//! 2. step physics and collect collision-begin contacts;
//! 3. update every entity, then apply deferred adds/removes;
//! 4. handle gameplay events (goal scored: score and reset the ball);
//! 5. release physics bodies and scene nodes of destroyed entities;
//! 6. when the send interval elapsed, encode a snapshot and broadcast it.
//!
//! Determinism notes:
//! - Keep simulation in a fixed timestep.
//! - Entities iterate in UID order.

use std::{
    collections::BTreeMap,
    net::SocketAddr,
    time::Duration,
};

use anyhow::Context;
use bytes::Bytes;
use msge_shared::{
    component::{Component, ComponentKind, ControlInputs, PaddleButtons, UpdateContext},
    config::EngineConfig,
    ecs::EntityManager,
    event::{EventQueue, GameEvent},
    level::LevelDef,
    math::Vec3,
    physics::{KinematicPhysics, PhysicsBackend},
    protocol::{ClientId, Message},
    render::HeadlessScene,
    snapshot::encode_world,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::multiplexer::{Inbound, Multiplexer};

/// Game server.
pub struct GameServer {
    pub cfg: EngineConfig,
    mux: Multiplexer,
    entities: EntityManager,
    physics: KinematicPhysics,
    scene: HeadlessScene,
    events: EventQueue,
    controls: ControlInputs,
    /// Connected clients and their dedicated ports.
    clients: BTreeMap<ClientId, u16>,
    scores: [u32; 2],
    tick: u64,
    since_send: Duration,
}

impl GameServer {
    /// Binds the handshake port and spawns `level`.
    pub async fn new(cfg: EngineConfig, level: &LevelDef) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg
            .handshake_addr()
            .parse()
            .context("parse handshake address")?;
        let mux = Multiplexer::bind(addr, cfg.ring_capacity, cfg.handshake_timeout()).await?;

        let mut entities = EntityManager::new();
        let spawned = level.spawn_into(&mut entities).context("spawn level")?;
        info!(entities = spawned.len(), "level loaded");

        Ok(Self {
            cfg,
            mux,
            entities,
            physics: KinematicPhysics::new(),
            scene: HeadlessScene::new(),
            events: EventQueue::new(),
            controls: ControlInputs::new(),
            clients: BTreeMap::new(),
            scores: [0; 2],
            tick: 0,
            since_send: Duration::ZERO,
        })
    }

    /// Loads the configured level (built-in pong when unset) and binds.
    pub async fn start(cfg: EngineConfig) -> anyhow::Result<Self> {
        let level = match &cfg.level_path {
            Some(path) => LevelDef::from_json_file(path)?,
            None => LevelDef::pong(),
        };
        Self::new(cfg, &level).await
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.mux.local_addr()
    }

    pub fn entities(&self) -> &EntityManager {
        &self.entities
    }

    pub fn entities_mut(&mut self) -> &mut EntityManager {
        &mut self.entities
    }

    pub fn scores(&self) -> [u32; 2] {
        self.scores
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn connected_clients(&self) -> Vec<ClientId> {
        self.clients.keys().copied().collect()
    }

    pub fn allocated_ports(&self) -> Vec<u16> {
        self.mux.allocated_ports()
    }

    /// Runs the server for a number of ticks at the configured rate.
    pub async fn run_for_ticks(&mut self, ticks: u32) {
        let dt = self.cfg.tick_interval();
        let mut next = Instant::now();

        for _ in 0..ticks {
            next += dt;
            self.step(dt.as_secs_f32());
            tokio::time::sleep_until(next).await;
        }
    }

    /// Executes one fixed simulation step. Returns the snapshot when one was
    /// broadcast this tick.
    pub fn step(&mut self, dt_sec: f32) -> Option<Bytes> {
        self.drain_inbound();

        self.physics.step(dt_sec, self.cfg.physics_iterations);
        let contacts = self.physics.drain_contacts();
        {
            let mut ctx = UpdateContext::new(
                dt_sec,
                &mut self.physics,
                &mut self.scene,
                &mut self.events,
                &self.controls,
                &contacts,
            );
            self.entities.update(&mut ctx);
        }

        self.events.update();
        self.handle_events();

        let mut retired = self.entities.take_retired();
        if !retired.is_empty() {
            debug!(
                bodies = retired.bodies.len(),
                nodes = retired.scene_nodes.len(),
                "releasing retired resources"
            );
            retired.release(&mut self.physics, &mut self.scene);
        }

        self.tick += 1;
        self.since_send += Duration::from_secs_f32(dt_sec.max(0.0));
        if self.since_send < self.cfg.send_interval() {
            return None;
        }
        self.since_send = Duration::ZERO;
        let snapshot = encode_world(&self.entities);
        self.mux.broadcast(snapshot.clone());
        Some(snapshot)
    }

    /// Stops every sub-listener and the handshake listener.
    pub async fn shutdown(self) {
        info!(tick = self.tick, scores = ?self.scores, "server shutting down");
        self.mux.shutdown().await;
    }

    fn drain_inbound(&mut self) {
        while let Some(inbound) = self.mux.try_recv() {
            match inbound {
                Inbound::Connected { client_id, port } => {
                    info!(?client_id, port, "client connected");
                    self.clients.insert(client_id, port);
                }
                Inbound::Disconnected { client_id } => {
                    info!(?client_id, "client disconnected");
                    self.clients.remove(&client_id);
                    self.controls.remove(&client_id);
                }
                Inbound::Message { client_id, message } => self.on_message(client_id, message),
            }
        }
    }

    fn on_message(&mut self, client_id: ClientId, message: Message) {
        match message {
            Message::ControllerState(buttons) => {
                if !buttons.is_empty() && !self.has_paddle(client_id) {
                    warn!(?client_id, "controller state for client without a paddle");
                }
                self.controls.insert(client_id, buttons);
            }
            Message::Actions(actions) => {
                for action in actions {
                    action.apply(&mut self.entities, &mut self.physics);
                }
            }
            other => debug!(?client_id, message = ?other, "unexpected message from client"),
        }
    }

    fn has_paddle(&self, client_id: ClientId) -> bool {
        self.entities.iter().any(|e| {
            matches!(
                e.component(ComponentKind::ServerPaddleController),
                Some(Component::ServerPaddleController(p)) if p.client_id == client_id
            )
        })
    }

    fn handle_events(&mut self) {
        let goals: Vec<u8> = self
            .events
            .ready()
            .iter()
            .map(|event| match event {
                GameEvent::GoalScored { side, .. } => *side,
            })
            .collect();

        for side in goals {
            match self.scores.get_mut(usize::from(side)) {
                Some(score) => *score += 1,
                None => warn!(side, "goal credited to unknown side"),
            }
            info!(side, scores = ?self.scores, "goal scored");
            self.reset_ball();
        }
    }

    fn reset_ball(&mut self) {
        let Some(ball) = self
            .entities
            .iter_mut()
            .find(|e| e.component(ComponentKind::BallController).is_some())
        else {
            warn!("goal scored but there is no ball to reset");
            return;
        };

        ball.transform.translation = Vec3::ZERO;
        if let Some(body) = ball.body_handle() {
            self.physics.set_position(body, Vec3::ZERO);
            self.physics.set_velocity(body, Vec3::ZERO);
        }
        if let Some(Component::BallController(c)) =
            ball.component_mut(ComponentKind::BallController)
        {
            c.reset();
        }
    }

    /// Buttons last reported by `client_id`.
    pub fn controls_of(&self, client_id: ClientId) -> PaddleButtons {
        self.controls.get(&client_id).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use msge_shared::{
        component::{GoalListener, RigidBodyComponent},
        ecs::Entity,
        level::EntityDef,
        math::Transform,
        physics::BodyKind,
    };

    fn cfg(port: u16) -> EngineConfig {
        EngineConfig {
            handshake_port: port,
            send_interval_ms: 0,
            ..EngineConfig::default()
        }
    }

    #[tokio::test]
    async fn step_broadcasts_every_tick_with_zero_interval() {
        let mut server = GameServer::new(cfg(47100), &LevelDef::pong()).await.unwrap();
        let snapshot = server.step(1.0 / 60.0).expect("snapshot");
        let decoded = msge_shared::snapshot::decode_world(&snapshot).unwrap();
        assert_eq!(decoded.len(), 5);
        assert_eq!(server.tick(), 1);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn send_interval_throttles_snapshots() {
        let mut config = cfg(47110);
        config.send_interval_ms = 100;
        let mut server = GameServer::new(config, &LevelDef::default()).await.unwrap();
        assert!(server.step(0.05).is_none());
        assert!(server.step(0.06).is_some());
        assert!(server.step(0.05).is_none());
        server.shutdown().await;
    }

    #[tokio::test]
    async fn goal_scores_and_resets_ball() {
        let level = LevelDef {
            entities: vec![EntityDef {
                tag: "goal".into(),
                transform: Transform::from_translation(Vec3::new(2.0, 0.0, 0.0)),
                replicate: false,
                components: vec![
                    Component::RigidBody(RigidBodyComponent::new(
                        BodyKind::Static,
                        Vec3::new(0.5, 5.0, 0.5),
                    )),
                    Component::GoalListener(GoalListener { side: 1 }),
                ],
            }],
        };
        let mut server = GameServer::new(cfg(47120), &level).await.unwrap();

        // A ball placed inside the goal, already "launched" so it stays put.
        let mut ball = Entity::new("ball");
        ball.transform.translation = Vec3::new(2.0, 0.0, 0.0);
        ball.add_component(Component::RigidBody(RigidBodyComponent::new(
            BodyKind::Dynamic,
            Vec3::new(0.25, 0.25, 0.25),
        )))
        .unwrap();
        ball.add_component(Component::BallController(
            msge_shared::component::BallController::new(0.0),
        ))
        .unwrap();
        let ball_uid = ball.uid();
        server.entities_mut().insert(ball);

        // Tick 1 creates bodies; tick 2's physics step reports the overlap and
        // the goal listener queues the event, handled the same tick.
        server.step(0.01);
        server.step(0.01);
        assert_eq!(server.scores(), [0, 1]);
        let ball = server.entities().get(ball_uid).unwrap();
        assert_eq!(ball.transform.translation, Vec3::ZERO);
        server.shutdown().await;
    }
}
