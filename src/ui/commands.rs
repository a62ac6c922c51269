use crate::audio::{BinauralPreset, SleepPreset};
use std::collections::BTreeMap;
use std::fmt;

/// Discrete action from the keyboard or from a voice phrase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Play,
    Stop,
    TogglePlay,
    ToggleMute,
    SetMuted(bool),
    ToggleZen,
    /// Remove every mixer layer
    ClearMix,
}

impl ControlAction {
    /// Global shortcuts. Anything unbound is ignored.
    pub fn from_key(key: char) -> Option<Self> {
        match key.to_ascii_lowercase() {
            ' ' => Some(ControlAction::TogglePlay),
            'm' => Some(ControlAction::ToggleMute),
            'z' => Some(ControlAction::ToggleZen),
            'x' => Some(ControlAction::ClearMix),
            _ => None,
        }
    }

    /// Match a transcript against the voice vocabulary. Stopping phrases win
    /// over starting ones so that "stop playing" pauses.
    pub fn from_voice(transcript: &str) -> Option<Self> {
        let lower = transcript.to_lowercase();

        if lower.contains("stop") || lower.contains("pause") {
            Some(ControlAction::Stop)
        } else if lower.contains("play") || lower.contains("start") {
            Some(ControlAction::Play)
        } else if lower.contains("unmute") {
            Some(ControlAction::SetMuted(false))
        } else if lower.contains("mute") {
            Some(ControlAction::SetMuted(true))
        } else if lower.contains("clear mix") || lower.contains("reset") {
            Some(ControlAction::ClearMix)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct Command {
    pub name: String,
    pub args: Vec<String>,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.name)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Target of the slash commands
pub trait CommandHandler {
    fn feature(&mut self, id: &str) -> Result<(), String>;
    fn add_layer(&mut self, id: &str) -> Result<(), String>;
    fn remove_layer(&mut self, id: &str) -> Result<(), String>;
    fn set_volume(&mut self, level: u8) -> Result<(), String>;
    fn apply_mix(&mut self, payload: &str) -> Result<(), String>;
    fn blend(&mut self, x: f32, y: f32) -> Result<(), String>;
    /// `None` stops the generator
    fn binaural(&mut self, preset: Option<BinauralPreset>) -> Result<(), String>;
    /// `None` cancels the countdown
    fn sleep_timer(&mut self, preset: Option<SleepPreset>) -> Result<(), String>;
    fn status(&self) -> Result<Vec<String>, String>;
    fn spectrum(&self) -> Result<Vec<u8>, String>;
    fn help(&self) -> Vec<String>;
}

pub struct CommandProcessor {
    commands: BTreeMap<String, String>,
}

impl Default for CommandProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandProcessor {
    pub fn new() -> Self {
        let mut commands = BTreeMap::new();
        commands.insert("play".to_string(), "Feature a track (play <id>)".to_string());
        commands.insert("layer".to_string(), "Add a mixer layer (layer <id>)".to_string());
        commands.insert("unlayer".to_string(), "Remove a mixer layer (unlayer <id>)".to_string());
        commands.insert("volume".to_string(), "Set featured volume (0-100)".to_string());
        commands.insert(
            "mix".to_string(),
            "Apply a mix command ({\"mix\":[{\"id\":..,\"volume\":..}]})".to_string(),
        );
        commands.insert("blend".to_string(), "Blend the first four layers (x y)".to_string());
        commands.insert(
            "binaural".to_string(),
            "Start a binaural preset (delta|theta|alpha|beta|gamma|stop)".to_string(),
        );
        commands.insert("timer".to_string(), "Sleep timer (15|30|45|60|cancel)".to_string());
        commands.insert("status".to_string(), "Show engine state".to_string());
        commands.insert("spectrum".to_string(), "Show the visualizer bars".to_string());
        commands.insert("help".to_string(), "Show available commands".to_string());
        commands.insert("quit".to_string(), "Exit the application".to_string());

        Self { commands }
    }

    pub fn parse(&self, input: &str) -> Result<Command, String> {
        let input = input.trim();

        let body = input
            .strip_prefix('/')
            .ok_or_else(|| "Not a command (must start with /)".to_string())?;

        let mut parts = body.splitn(2, char::is_whitespace);
        let name = match parts.next() {
            Some(name) if !name.is_empty() => name.to_lowercase(),
            _ => return Err("Empty command".to_string()),
        };

        // A mix payload is JSON and keeps its spacing.
        let rest = parts.next().unwrap_or("").trim();
        let args = if name == "mix" {
            if rest.is_empty() {
                Vec::new()
            } else {
                vec![rest.to_string()]
            }
        } else {
            rest.split_whitespace().map(|s| s.to_string()).collect()
        };

        Ok(Command { name, args })
    }

    pub fn execute<H: CommandHandler>(
        &self,
        input: &str,
        handler: &mut H,
    ) -> Result<String, String> {
        let cmd = self.parse(input)?;

        match cmd.name.as_str() {
            "play" => {
                let id = cmd.args.first().ok_or("Missing track id")?;
                handler.feature(id)?;
                Ok(format!("Featuring {}", id))
            }
            "layer" => {
                let id = cmd.args.first().ok_or("Missing track id")?;
                handler.add_layer(id)?;
                Ok(format!("Layered {}", id))
            }
            "unlayer" => {
                let id = cmd.args.first().ok_or("Missing track id")?;
                handler.remove_layer(id)?;
                Ok(format!("Removed layer {}", id))
            }
            "volume" => {
                let level = cmd.args.first().ok_or("Missing volume level")?;
                let level: u8 = level
                    .parse()
                    .ok()
                    .filter(|level| *level <= 100)
                    .ok_or_else(|| "Volume must be a number between 0-100".to_string())?;
                handler.set_volume(level)?;
                Ok(format!("Volume set to {}", level))
            }
            "mix" => {
                let payload = cmd.args.first().ok_or("Missing mix payload")?;
                handler.apply_mix(payload)?;
                Ok("Mix sent".to_string())
            }
            "blend" => {
                if cmd.args.len() < 2 {
                    return Err("Missing blend coordinates (need x y)".to_string());
                }
                let x: f32 = cmd.args[0]
                    .parse()
                    .map_err(|_| "X coordinate must be a number".to_string())?;
                let y: f32 = cmd.args[1]
                    .parse()
                    .map_err(|_| "Y coordinate must be a number".to_string())?;
                handler.blend(x, y)?;
                Ok(format!("Blend set to ({}, {})", x, y))
            }
            "binaural" => {
                let arg = cmd.args.first().ok_or("Missing preset name")?;
                if arg.eq_ignore_ascii_case("stop") {
                    handler.binaural(None)?;
                    return Ok("Binaural stopped".to_string());
                }
                let preset = BinauralPreset::from_name(arg)
                    .ok_or_else(|| format!("Unknown preset: {}", arg))?;
                handler.binaural(Some(preset))?;
                Ok(format!("{}: {}", preset.name(), preset.description()))
            }
            "timer" => {
                let arg = cmd.args.first().ok_or("Missing timer duration")?;
                if arg.eq_ignore_ascii_case("cancel") {
                    handler.sleep_timer(None)?;
                    return Ok("Sleep timer cancelled".to_string());
                }
                let preset = arg
                    .parse::<u64>()
                    .ok()
                    .and_then(SleepPreset::from_minutes)
                    .ok_or_else(|| "Timer must be one of 15, 30, 45, 60".to_string())?;
                handler.sleep_timer(Some(preset))?;
                Ok(format!("Sleep timer set for {}", preset.label()))
            }
            "status" => {
                let lines = handler.status()?;
                Ok(lines.join("\n"))
            }
            "spectrum" => {
                let bars = handler.spectrum()?;
                Ok(render_bars(&bars))
            }
            "help" => {
                let commands = handler.help();
                let mut result = String::from("Available commands:");

                for cmd in commands {
                    result.push_str(&format!("\n  {}", cmd));
                }

                Ok(result)
            }
            "quit" => Ok("Quitting application...".to_string()),
            _ => Err(format!("Unknown command: /{}", cmd.name)),
        }
    }

    pub fn get_commands(&self) -> Vec<(String, String)> {
        self.commands
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// One text column per bar, eight levels high
pub fn render_bars(bars: &[u8]) -> String {
    const LEVELS: [char; 9] = [' ', '▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
    bars.iter()
        .map(|&value| LEVELS[(value as usize * 8 + 127) / 255])
        .collect()
}
