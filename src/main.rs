#![allow(clippy::type_complexity)]

use bevy::prelude::*;

mod plugins;
mod util;

use util::config::{GameConfig, CONFIG_PATH};

fn main() {
    // Logging only starts with the app, so a bad file gets reported by the game plugin.
    let (config, config_error) = match GameConfig::load(CONFIG_PATH) {
        Ok(config) => (config, None),
        Err(err) => (GameConfig::default(), Some(err)),
    };

    App::new()
        .add_plugin(plugins::game::GamePlugin {
            config,
            config_error,
        })
        .run();
}
