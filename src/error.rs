use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by scene editing, persistence and the simulation runtime.
///
/// Validation variants are returned before any state is touched. `Io` and
/// `Json` may be returned after an in-memory edit already happened, in which
/// case memory and disk diverge until the next successful save.
#[derive(Debug, Error)]
pub enum SparError {
    #[error("no project is loaded")]
    NoProject,
    #[error("no scene is selected")]
    NoScene,
    #[error("a scene named '{0}' already exists")]
    DuplicateScene(String),
    #[error("scene '{0}' does not exist")]
    UnknownScene(String),
    #[error("invalid name '{0}'")]
    InvalidName(String),
    #[error("an object named '{0}' already exists")]
    DuplicateName(String),
    #[error("object '{0}' does not exist")]
    UnknownObject(String),
    #[error("parenting '{child}' under '{parent}' would create a cycle")]
    ParentCycle { child: String, parent: String },
    #[error("object '{0}' is not a sprite")]
    NotASprite(String),
    #[error("invalid resolution '{0}', expected WIDTHxHEIGHT")]
    InvalidResolution(String),
    #[error("a simulation is already running")]
    SimulationRunning,
    #[error("presentation surface failed: {0}")]
    Surface(String),
    #[error("script error: {0}")]
    Script(String),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

impl SparError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }

    /// Validation failures leave every piece of state untouched.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::NoProject
                | Self::NoScene
                | Self::DuplicateScene(_)
                | Self::UnknownScene(_)
                | Self::InvalidName(_)
                | Self::DuplicateName(_)
                | Self::UnknownObject(_)
                | Self::ParentCycle { .. }
                | Self::NotASprite(_)
                | Self::InvalidResolution(_)
                | Self::SimulationRunning
        )
    }
}

pub type SparResult<T> = Result<T, SparError>;
