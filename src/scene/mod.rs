//! glTF 2.0 scene loading: document model, node graph traversal, GPU geometry,
//! material resolution and skin animation baking.

pub mod accessor;
pub mod animation;
pub mod document;
#[cfg(test)]
pub(crate) mod fixtures;
pub mod geometry;
pub mod glb;
pub mod graph;
pub mod loader;
pub mod material;

pub use animation::{sample_row_position, BakedSkin, Clip, SkinJoints};
pub use document::Document;
pub use geometry::{Bounds, Geometry};
pub use graph::SceneGraph;
pub use loader::SceneLoader;

use crate::{assets::FetchError, render_context::ResourceError};

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("invalid scene document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("scene document has no {0}")]
    MissingArray(&'static str),
    #[error("{what} {index} does not exist")]
    DanglingReference { what: &'static str, index: usize },
    #[error("primitive {primitive} of mesh {mesh} has no usable attributes")]
    NoAttributes { mesh: usize, primitive: usize },
    #[error("accessor {accessor}: {reason}")]
    InvalidAccessor { accessor: usize, reason: &'static str },
    #[error("buffer view {0} is used for both vertex and index data")]
    BufferKindConflict(usize),
    #[error("node hierarchy is malformed at node {0}")]
    NodeHierarchy(usize),
    #[error("only LINEAR interpolation is supported, found {0}")]
    UnsupportedInterpolation(String),
    #[error("material {0} uses an unsupported shading model")]
    UnsupportedMaterial(usize),
    #[error("document mixes metallic-roughness and specular-glossiness materials")]
    MixedMaterialModels,
    #[error("malformed binary container: {0}")]
    Glb(&'static str),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
}
