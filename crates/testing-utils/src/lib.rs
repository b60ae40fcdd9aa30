//! Test helpers shared across crates: entity builders and
//! scripted fakes for plugins and storage backends.

pub mod builders;
pub mod mocks;

pub use builders::{DeviceBuilder, ScheduleBuilder};
pub use mocks::{FlakyBackend, ScriptedPlugin};
