#[cfg(feature = "devel")]
pub mod debug;

pub mod clock;
pub mod first_person_controller;
pub mod game;
pub mod input;
pub mod physics;
pub mod portal;
