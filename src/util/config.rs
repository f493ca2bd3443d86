//! Game settings, read from a JSON file in the assets directory.

use std::{fs, path::Path};

use bevy::{prelude::*, window::WindowDescriptor};
use serde::Deserialize;
use thiserror::Error;

pub const CONFIG_PATH: &str = "assets/config/game.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: f32,
    pub height: f32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        WindowConfig {
            title: "Portal Room".to_string(),
            width: 1280.,
            height: 720.,
        }
    }
}

impl WindowConfig {
    pub fn descriptor(&self) -> WindowDescriptor {
        WindowDescriptor {
            title: self.title.clone(),
            width: self.width,
            height: self.height,
            ..default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Walking speed, in units per second.
    pub speed: f32,
    /// Radians per pixel of mouse motion.
    pub look_sensitivity: f32,
    /// Height of the eyes above the body center.
    pub eye_height: f32,
    pub jump_speed: f32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        PlayerConfig {
            speed: 5.,
            look_sensitivity: 0.004,
            eye_height: 0.8,
            jump_speed: 5.,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Resource)]
#[serde(default)]
pub struct GameConfig {
    pub window: WindowConfig,
    /// Ticks per second.
    pub tick_rate: f32,
    /// How many portals deep views through portals go.
    pub max_recursion_depth: u8,
    pub player: PlayerConfig,
    /// Resolution of the textures portal views are rendered to.
    pub portal_view_size: [u32; 2],
}

impl Default for GameConfig {
    fn default() -> Self {
        GameConfig {
            window: WindowConfig::default(),
            tick_rate: 60.,
            max_recursion_depth: 1,
            player: PlayerConfig::default(),
            portal_view_size: [1280, 720],
        }
    }
}

impl GameConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: GameConfig = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tick_rate > 0.) {
            return Err(ConfigError::Invalid(format!(
                "tick rate must be positive, got {}",
                self.tick_rate
            )));
        }
        if self.portal_view_size.contains(&0) {
            return Err(ConfigError::Invalid(
                "portal view size must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
