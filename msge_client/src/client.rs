//! Client implementation.
//!
//! The client maintains:
//! - A redirected transport session to the server
//! - The shared entity manager, replaced wholesale by each applied snapshot
//! - A local entity manager for client-only entities (camera, input sampling)
//! - A scene the shared entities are rendered into
//!
//! The shared manager sits behind a mutex; applying a snapshot (decode and
//! swap) and rendering both hold it, so a render never sees half a world.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use anyhow::Context;
use msge_shared::{
    action::Action,
    cancel::CancelToken,
    component::{
        ClientPaddleController, Component, ComponentKind, ControlInputs, OrthographicCamera,
        PaddleButtons, UpdateContext,
    },
    config::EngineConfig,
    ecs::{Entity, EntityId, EntityManager},
    event::EventQueue,
    math::Vec3,
    physics::{NullPhysics, PhysicsBackend},
    protocol::{ClientId, Message},
    render::{HeadlessScene, SceneBackend},
    snapshot::decode_and_swap,
    wire::DecodeError,
};
use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::session::ClientSession;

/// High-level game client.
pub struct GameClient {
    pub cfg: EngineConfig,
    session: ClientSession,
    client_id: Option<ClientId>,

    shared: Arc<Mutex<EntityManager>>,
    local: EntityManager,
    controller: EntityId,

    physics: NullPhysics,
    scene: HeadlessScene,
    events: EventQueue,
    no_controls: ControlInputs,

    since_controller_send: Duration,
    snapshots_applied: u64,
}

impl GameClient {
    /// Connects to the configured server and performs the redirect handshake.
    pub async fn connect(cfg: EngineConfig, cancel: &CancelToken) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg
            .handshake_addr()
            .parse()
            .context("parse handshake address")?;
        info!(server = %addr, "Connecting to server");

        let session = ClientSession::connect(
            addr,
            cfg.ring_capacity,
            cfg.handshake_timeout(),
            cancel,
        )
        .await
        .context("handshake")?;

        let mut local = EntityManager::new();
        let mut camera = Entity::new("camera");
        camera.transform.translation = Vec3::new(0.0, 0.0, 10.0);
        camera.add_component(Component::OrthographicCamera(OrthographicCamera::default()))?;
        local.insert(camera);

        let mut controller = Entity::new("local_input");
        controller.add_component(Component::ClientPaddleController(
            ClientPaddleController::default(),
        ))?;
        let controller_uid = controller.uid();
        local.insert(controller);

        Ok(Self {
            cfg,
            session,
            client_id: None,
            shared: Arc::new(Mutex::new(EntityManager::new())),
            local,
            controller: controller_uid,
            physics: NullPhysics::default(),
            scene: HeadlessScene::new(),
            events: EventQueue::new(),
            no_controls: ControlInputs::new(),
            since_controller_send: Duration::ZERO,
            snapshots_applied: 0,
        })
    }

    /// Assigned by the server's init message; `None` until it arrives.
    pub fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_active()
    }

    pub fn server_port(&self) -> u16 {
        self.session.server_port()
    }

    /// Handle to the replicated world, for readers outside the game loop.
    pub fn shared(&self) -> Arc<Mutex<EntityManager>> {
        self.shared.clone()
    }

    pub fn local(&self) -> &EntityManager {
        &self.local
    }

    pub fn scene(&self) -> &HeadlessScene {
        &self.scene
    }

    pub fn snapshots_applied(&self) -> u64 {
        self.snapshots_applied
    }

    /// Buttons sampled by the local paddle controller on the last update.
    pub fn controller_state(&self) -> PaddleButtons {
        match self
            .local
            .get(self.controller)
            .and_then(|e| e.component(ComponentKind::ClientPaddleController))
        {
            Some(Component::ClientPaddleController(c)) => c.state(),
            _ => PaddleButtons::empty(),
        }
    }

    /// One client tick: handle received messages, apply the newest snapshot,
    /// update local entities, render, and send controller state when due.
    ///
    /// A snapshot that fails to decode is a protocol mismatch and is returned
    /// as an error.
    pub async fn update(&mut self, dt_sec: f32, input: PaddleButtons) -> anyhow::Result<()> {
        self.handle_messages()?;

        {
            let mut ctx = UpdateContext::new(
                dt_sec,
                &mut self.physics,
                &mut self.scene,
                &mut self.events,
                &self.no_controls,
                &[],
            )
            .with_local_input(input);
            self.local.update(&mut ctx);
        }
        self.events.update();
        let mut retired = self.local.take_retired();
        retired.release(&mut self.physics, &mut self.scene);

        self.render();

        self.since_controller_send += Duration::from_secs_f32(dt_sec.max(0.0));
        if self.since_controller_send >= self.cfg.controller_send_interval() && self.is_connected() {
            self.since_controller_send = Duration::ZERO;
            let state = self.controller_state();
            self.session
                .send(&Message::ControllerState(state))
                .await
                .context("send controller state")?;
        }
        Ok(())
    }

    /// Sends replicated actions to the server.
    pub async fn send_actions(&mut self, actions: Vec<Action>) -> anyhow::Result<()> {
        self.session
            .send(&Message::Actions(actions))
            .await
            .context("send actions")
    }

    /// Pushes every shared render component into the scene and draws.
    pub fn render(&mut self) {
        {
            let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
            for entity in shared.iter_mut() {
                let transform = entity.transform;
                for component in entity.components_mut() {
                    if let Component::Render(render) = component {
                        render.sync(&transform, &mut self.scene);
                    }
                }
            }
            let mut retired = shared.take_retired();
            retired.release(&mut self.physics, &mut self.scene);
        }
        self.scene.render();
    }

    pub async fn disconnect(self) {
        self.session.disconnect().await;
    }

    fn handle_messages(&mut self) -> anyhow::Result<()> {
        let mut messages = Vec::new();
        for body in self.session.poll_messages() {
            match Message::decode(body) {
                Ok(Message::Init { client_id }) => {
                    info!(?client_id, "Assigned client id");
                    self.client_id = Some(client_id);
                }
                Ok(message) => messages.push(message),
                Err(e) => warn!(error = %e, "undecodable server message dropped"),
            }
        }

        let applied = apply_in_order(&self.shared, &mut self.physics, messages)
            .context("apply world snapshot")?;
        self.snapshots_applied += applied;
        Ok(())
    }
}

/// Applies snapshots and actions in arrival order. Consecutive snapshots
/// collapse to the newest one; a pending snapshot is swapped in before any
/// actions that followed it. Returns how many snapshots were applied.
fn apply_in_order(
    shared: &Mutex<EntityManager>,
    physics: &mut dyn PhysicsBackend,
    messages: impl IntoIterator<Item = Message>,
) -> Result<u64, DecodeError> {
    let mut pending: Option<Bytes> = None;
    let mut applied = 0;
    let mut flush = |pending: &mut Option<Bytes>| -> Result<(), DecodeError> {
        if let Some(snapshot) = pending.take() {
            let n = decode_and_swap(shared, &snapshot)?;
            applied += 1;
            debug!(entities = n, "snapshot applied");
        }
        Ok(())
    };

    for message in messages {
        match message {
            Message::WorldSnapshot(snapshot) => pending = Some(snapshot),
            Message::Actions(actions) => {
                flush(&mut pending)?;
                let mut world = shared.lock().unwrap_or_else(PoisonError::into_inner);
                for action in actions {
                    action.apply(&mut world, physics);
                }
            }
            other => debug!(message = ?other, "unexpected message from server"),
        }
    }
    flush(&mut pending)?;
    Ok(applied)
}
