// Control surface
// Keyboard shortcuts, voice phrases and slash commands

pub mod commands;

pub use commands::{CommandHandler, CommandProcessor, ControlAction};
