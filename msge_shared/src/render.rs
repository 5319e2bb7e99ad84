//! Rendering abstraction.
//!
//! This crate does not depend on a graphics backend. The engine talks to a
//! scene through handles: add a sprite or model instance, push its transform
//! every frame, remove it when the owning component is destroyed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::math::{Transform, Vec3};

/// Opaque scene instance handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SceneHandle(pub u32);

/// Projection pushed by camera components.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Perspective {
        fov_y: f32,
        aspect: f32,
        near: f32,
        far: f32,
    },
    Orthographic {
        left: f32,
        right: f32,
        bottom: f32,
        top: f32,
        near: f32,
        far: f32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraView {
    pub eye: Vec3,
    pub rotation: Vec3,
    pub projection: Projection,
}

/// A minimal scene API.
pub trait SceneBackend: Send {
    fn add_sprite(&mut self, name: &str) -> SceneHandle;
    fn add_model(&mut self, name: &str, obj_file: &str) -> SceneHandle;
    fn remove(&mut self, handle: SceneHandle);
    fn set_transform(&mut self, handle: SceneHandle, transform: &Transform);
    fn set_camera(&mut self, view: CameraView);
    fn render(&mut self);
}

/// What a headless scene remembers about one instance.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneNode {
    pub name: String,
    pub obj_file: Option<String>,
    pub transform: Transform,
}

/// In-memory scene useful for servers and tests.
#[derive(Debug, Default)]
pub struct HeadlessScene {
    next: u32,
    nodes: BTreeMap<SceneHandle, SceneNode>,
    camera: Option<CameraView>,
    frames: u64,
}

impl HeadlessScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, handle: SceneHandle) -> Option<&SceneNode> {
        self.nodes.get(&handle)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&SceneHandle, &SceneNode)> {
        self.nodes.iter()
    }

    pub fn camera(&self) -> Option<&CameraView> {
        self.camera.as_ref()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn insert(&mut self, name: &str, obj_file: Option<&str>) -> SceneHandle {
        self.next += 1;
        let handle = SceneHandle(self.next);
        self.nodes.insert(
            handle,
            SceneNode {
                name: name.to_owned(),
                obj_file: obj_file.map(str::to_owned),
                transform: Transform::default(),
            },
        );
        handle
    }
}

impl SceneBackend for HeadlessScene {
    fn add_sprite(&mut self, name: &str) -> SceneHandle {
        self.insert(name, None)
    }

    fn add_model(&mut self, name: &str, obj_file: &str) -> SceneHandle {
        self.insert(name, Some(obj_file))
    }

    fn remove(&mut self, handle: SceneHandle) {
        self.nodes.remove(&handle);
    }

    fn set_transform(&mut self, handle: SceneHandle, transform: &Transform) {
        if let Some(node) = self.nodes.get_mut(&handle) {
            node.transform = *transform;
        }
    }

    fn set_camera(&mut self, view: CameraView) {
        self.camera = Some(view);
    }

    fn render(&mut self) {
        self.frames += 1;
    }
}
