//! Frame pacing: the game ticks at most at a fixed rate, frames coming in too early are skipped
//! without accumulating any backlog.

use bevy::prelude::*;
use bevy_rapier3d::prelude::RapierConfiguration;

use crate::util::config::GameConfig;

/// Longest step the simulation is allowed to take, in seconds.
pub const MAX_DELTA: f32 = 1. / 20.;

pub struct ClockPlugin;

impl Plugin for ClockPlugin {
    fn build(&self, app: &mut App) {
        let tick_rate = app
            .world
            .get_resource::<GameConfig>()
            .map_or(GameConfig::default().tick_rate, |config| config.tick_rate);
        app.insert_resource(FrameClock::new(tick_rate))
            .add_system_to_stage(CoreStage::First, tick_frame_clock);
    }
}

#[derive(Debug, Clone, Resource)]
pub struct FrameClock {
    interval: f32,
    last_tick: Option<f64>,
    delta: f32,
    due: bool,
}

impl FrameClock {
    pub fn new(tick_rate: f32) -> Self {
        FrameClock {
            interval: 1. / tick_rate,
            last_tick: None,
            delta: 0.,
            due: false,
        }
    }

    /// Advance the clock to `now`, in seconds. Returns whether a tick is due.
    pub fn tick(&mut self, now: f64) -> bool {
        let Some(last_tick) = self.last_tick else {
            self.last_tick = Some(now);
            self.delta = self.interval;
            self.due = true;
            return true;
        };

        let elapsed = (now - last_tick) as f32;
        self.due = elapsed >= self.interval;
        if self.due {
            // Keep the phase, drop whole intervals.
            self.last_tick = Some(now - f64::from(elapsed % self.interval));
            self.delta = elapsed.min(MAX_DELTA);
        }
        self.due
    }

    pub fn due(&self) -> bool {
        self.due
    }

    /// Simulated time of the current tick.
    pub fn delta(&self) -> f32 {
        self.delta
    }
}

/// Run condition for the systems making up a tick.
pub fn tick_due(clock: Res<FrameClock>) -> bool {
    clock.due()
}

fn tick_frame_clock(
    time: Res<Time>,
    mut clock: ResMut<FrameClock>,
    mut rapier_config: ResMut<RapierConfiguration>,
) {
    let due = clock.tick(time.elapsed_seconds_f64());
    if rapier_config.physics_pipeline_active != due {
        rapier_config.physics_pipeline_active = due;
    }
}
