//! Viewer configuration, read from a TOML file. Every field has a default so a partial
//! (or missing) file is fine.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{camera::CameraSettings, ibl::IblSettings};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    /// Report the reduced capability set even on capable hardware.
    pub force_reduced_path: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { title: "pbr-viewer".to_string(), width: 1280, height: 720, force_reduced_path: false }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    pub root: PathBuf,
    /// Scene document, relative to `root`.
    pub scene: String,
    pub panorama: String,
    pub shaders: String,
    pub io_threads: usize,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("assets"),
            scene: "scene/scene.gltf".to_string(),
            panorama: "env/environment.hdr".to_string(),
            shaders: "shaders".to_string(),
            io_threads: 2,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnimationConfig {
    /// Clip played on load, `None` keeps the bind pose.
    pub clip: Option<usize>,
    pub speed: f32,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self { clip: Some(0), speed: 1.0 }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub window: WindowConfig,
    pub assets: AssetConfig,
    pub camera: CameraSettings,
    pub ibl: IblSettings,
    pub animation: AnimationConfig,
}

impl ViewerConfig {
    pub fn parse(path: &Path, text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text =
            std::fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::parse(path, &text)
    }

    /// Loads `path` when given and present, otherwise falls back to the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) if path.exists() => Self::load(path),
            Some(path) => {
                log::warn!("config {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = ViewerConfig::parse(
            Path::new("viewer.toml"),
            r#"
            [assets]
            scene = "helmet/DamagedHelmet.glb"

            [camera]
            fovy_degrees = 45.0

            [ibl]
            radiance_levels = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.assets.scene, "helmet/DamagedHelmet.glb");
        assert_eq!(config.assets.shaders, "shaders");
        assert_relative_eq!(config.camera.fovy_degrees, 45.0);
        assert_relative_eq!(config.camera.near, 0.1);
        assert_eq!(config.ibl.radiance_levels, 5);
        assert_eq!(config.ibl.env_size, 2048);
        assert_eq!(config.animation, AnimationConfig::default());
    }

    #[test]
    fn malformed_file_names_the_path() {
        let error = ViewerConfig::parse(Path::new("broken.toml"), "[window\nwidth = 3").unwrap_err();
        assert!(error.to_string().contains("broken.toml"));
    }

    #[test]
    fn missing_file_means_defaults() {
        let config = ViewerConfig::load_or_default(Some(Path::new("does/not/exist.toml"))).unwrap();
        assert_eq!(config, ViewerConfig::default());
    }
}
