use serde::{Deserialize, Serialize};

/// Where freshly created objects are placed, in scene units.
pub const DEFAULT_SPAWN: (f32, f32) = (100.0, 100.0);

/// Visible offset applied to duplicates so they do not cover the original.
pub const DUPLICATE_OFFSET: (f32, f32) = (30.0, 30.0);

/// Variant tag of a scene object. The on-disk tags are kept from the
/// project format (`EmptyObject` / `Sprite2D`).
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    #[serde(rename = "EmptyObject")]
    Empty,
    #[serde(rename = "Sprite2D")]
    Sprite,
}

impl ObjectKind {
    /// Base used for name disambiguation on creation.
    pub fn base_name(self) -> &'static str {
        match self {
            ObjectKind::Empty => "EmptyObject",
            ObjectKind::Sprite => "Sprite",
        }
    }

    pub fn is_sprite(self) -> bool {
        self == ObjectKind::Sprite
    }
}

/// A node of the scene graph.
///
/// `parent` is a back-reference by name. Absent or dangling means the object
/// is a root. `sprite` and `opacity` only ever appear on sprites.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct SceneObject {
    #[serde(rename = "type")]
    pub kind: ObjectKind,
    pub name: String,
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub rotation: f32,
    #[serde(default = "default_scale")]
    pub scale_x: f32,
    #[serde(default = "default_scale")]
    pub scale_y: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sprite: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
}

fn default_scale() -> f32 {
    1.0
}

impl SceneObject {
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            kind: ObjectKind::Empty,
            name: name.into(),
            x: DEFAULT_SPAWN.0,
            y: DEFAULT_SPAWN.1,
            rotation: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            parent: None,
            sprite: None,
            opacity: None,
            script: None,
        }
    }

    pub fn sprite(name: impl Into<String>, sprite: Option<String>) -> Self {
        Self {
            kind: ObjectKind::Sprite,
            sprite,
            opacity: Some(1.0),
            ..Self::empty(name)
        }
    }

    pub fn at(mut self, x: f32, y: f32) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn opacity_or_default(&self) -> f32 {
        self.opacity.unwrap_or(1.0)
    }

    /// Drops sprite-only fields from non-sprites.
    pub fn enforce_variant(&mut self) {
        if !self.kind.is_sprite() {
            self.sprite = None;
            self.opacity = None;
        }
    }
}
