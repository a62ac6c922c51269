//! Dual sine generator for binaural beats.
//!
//! The left ear hears `base`, the right ear `base + beat`. Each generator
//! runs in its own context so stopping it releases everything it built.

use audio_io::{AudioContext, ContextFactory, GraphError, NodeId, NodeKind, ParamKind};
use aura_core::{clamp_unit, Error};
use log::{debug, info, warn};
use settings_manager::BinauralSettings;
use std::fmt;
use std::sync::Arc;

/// Named brainwave targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinauralPreset {
    Delta,
    Theta,
    Alpha,
    Beta,
    Gamma,
}

impl BinauralPreset {
    pub const ALL: [BinauralPreset; 5] = [
        BinauralPreset::Delta,
        BinauralPreset::Theta,
        BinauralPreset::Alpha,
        BinauralPreset::Beta,
        BinauralPreset::Gamma,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BinauralPreset::Delta => "Deep Sleep (Delta)",
            BinauralPreset::Theta => "Meditation (Theta)",
            BinauralPreset::Alpha => "Relaxation (Alpha)",
            BinauralPreset::Beta => "Active Focus (Beta)",
            BinauralPreset::Gamma => "High Performance (Gamma)",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            BinauralPreset::Delta => "Dreamless sleep, healing (0.5-4Hz)",
            BinauralPreset::Theta => "Deep relaxation, creativity (4-8Hz)",
            BinauralPreset::Alpha => "Calm focus, stress reduction (8-13Hz)",
            BinauralPreset::Beta => "Concentration, problem solving (13-30Hz)",
            BinauralPreset::Gamma => "Cognitive enhancement (30Hz+)",
        }
    }

    pub fn beat_hz(&self) -> f32 {
        match self {
            BinauralPreset::Delta => 2.0,
            BinauralPreset::Theta => 6.0,
            BinauralPreset::Alpha => 10.0,
            BinauralPreset::Beta => 20.0,
            BinauralPreset::Gamma => 40.0,
        }
    }

    pub fn base_hz(&self) -> f32 {
        match self {
            BinauralPreset::Delta => 100.0,
            BinauralPreset::Theta => 150.0,
            BinauralPreset::Alpha => 200.0,
            BinauralPreset::Beta => 250.0,
            BinauralPreset::Gamma => 300.0,
        }
    }

    /// Match by band name, case-insensitively ("alpha", "Gamma")
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|p| format!("{:?}", p).to_lowercase() == name)
    }
}

impl fmt::Display for BinauralPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Point-in-time view of the generator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OscillatorSnapshot {
    pub base_hz: f32,
    pub beat_hz: f32,
    pub volume: f32,
    pub running: bool,
}

impl OscillatorSnapshot {
    pub fn left_hz(&self) -> f32 {
        self.base_hz
    }

    pub fn right_hz(&self) -> f32 {
        self.base_hz + self.beat_hz
    }
}

struct OscillatorPair {
    context: AudioContext,
    left: NodeId,
    right: NodeId,
    master: NodeId,
}

impl OscillatorPair {
    fn build(context: AudioContext, base: f32, beat: f32, volume: f32) -> Result<Self, GraphError> {
        let (left, right, master) = context.with_graph(|graph| {
            let master = graph.add_node(NodeKind::gain(volume))?;
            graph.connect_to_destination(master)?;

            let left = graph.add_node(NodeKind::oscillator(base))?;
            let left_pan = graph.add_node(NodeKind::panner(-1.0))?;
            graph.connect(left, left_pan)?;
            graph.connect(left_pan, master)?;

            let right = graph.add_node(NodeKind::oscillator(base + beat))?;
            let right_pan = graph.add_node(NodeKind::panner(1.0))?;
            graph.connect(right, right_pan)?;
            graph.connect(right_pan, master)?;

            Ok((left, right, master))
        })?;

        Ok(Self {
            context,
            left,
            right,
            master,
        })
    }
}

/// Binaural beat generator
pub struct BinauralSynthesizer {
    factory: Arc<dyn ContextFactory>,
    settings: BinauralSettings,
    pair: Option<OscillatorPair>,
    base_hz: f32,
    beat_hz: f32,
    volume: f32,
}

impl BinauralSynthesizer {
    pub fn new(factory: Arc<dyn ContextFactory>, settings: BinauralSettings) -> Self {
        let volume = clamp_unit(settings.default_volume);
        Self {
            factory,
            settings,
            pair: None,
            base_hz: BinauralPreset::Alpha.base_hz(),
            beat_hz: BinauralPreset::Alpha.beat_hz(),
            volume,
        }
    }

    pub fn is_running(&self) -> bool {
        self.pair.is_some()
    }

    /// Context of the running pair
    pub fn context(&self) -> Option<&AudioContext> {
        self.pair.as_ref().map(|p| &p.context)
    }

    fn clamp_base(&self, hz: f32) -> f32 {
        if hz.is_nan() {
            return self.settings.base_min_hz;
        }
        hz.clamp(self.settings.base_min_hz, self.settings.base_max_hz)
    }

    fn clamp_beat(&self, hz: f32) -> f32 {
        if hz.is_nan() {
            return self.settings.beat_min_hz;
        }
        hz.clamp(self.settings.beat_min_hz, self.settings.beat_max_hz)
    }

    /// Build a fresh oscillator pair. A running pair is torn down first.
    pub fn start(&mut self, base_hz: f32, beat_hz: f32, volume: f32) -> Result<(), Error> {
        self.stop();

        self.base_hz = self.clamp_base(base_hz);
        self.beat_hz = self.clamp_beat(beat_hz);
        self.volume = clamp_unit(volume);

        let context = self.factory.create("binaural")?;
        let pair = match OscillatorPair::build(context.clone(), self.base_hz, self.beat_hz, self.volume) {
            Ok(pair) => pair,
            Err(e) => {
                context.close();
                return Err(e.into());
            }
        };
        if let Err(e) = context.resume() {
            context.close();
            return Err(e.into());
        }

        info!(
            "Binaural started: {} Hz / {} Hz at {:.2}",
            self.base_hz,
            self.base_hz + self.beat_hz,
            self.volume
        );
        self.pair = Some(pair);
        Ok(())
    }

    /// Halt both generators and release the context. Safe to repeat.
    pub fn stop(&mut self) {
        if let Some(pair) = self.pair.take() {
            pair.context.close();
            info!("Binaural stopped");
        }
    }

    pub fn set_base(&mut self, hz: f32) {
        self.base_hz = self.clamp_base(hz);
        self.retune();
    }

    pub fn set_beat(&mut self, hz: f32) {
        self.beat_hz = self.clamp_beat(hz);
        self.retune();
    }

    fn retune(&self) {
        let pair = match &self.pair {
            Some(pair) => pair,
            None => return,
        };
        let ramp = self.settings.ramp();
        let targets = [
            (pair.left, self.base_hz),
            (pair.right, self.base_hz + self.beat_hz),
        ];

        let result = pair.context.with_graph(|graph| {
            for (node, hz) in targets {
                if let Err(e) = graph.ramp_param(node, ParamKind::Frequency, hz, ramp) {
                    warn!("Frequency ramp failed, setting directly: {}", e);
                    graph.set_param(node, ParamKind::Frequency, hz)?;
                }
            }
            Ok(())
        });
        if let Err(e) = result {
            warn!("Failed to retune binaural pair: {}", e);
        }
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = clamp_unit(volume);
        let pair = match &self.pair {
            Some(pair) => pair,
            None => return,
        };

        let master = pair.master;
        let volume = self.volume;
        let time_constant = self.settings.volume_time_constant();
        let result = pair.context.with_graph(|graph| {
            graph
                .set_param_target(master, ParamKind::Gain, volume, time_constant)
                .or_else(|_| graph.set_param(master, ParamKind::Gain, volume))
        });
        if let Err(e) = result {
            warn!("Failed to set binaural volume: {}", e);
        }
    }

    /// Load a preset's frequencies, starting the generator if it is stopped
    pub fn apply_preset(&mut self, preset: BinauralPreset) -> Result<(), Error> {
        debug!("Applying binaural preset {}", preset);
        if self.is_running() {
            self.base_hz = self.clamp_base(preset.base_hz());
            self.beat_hz = self.clamp_beat(preset.beat_hz());
            self.retune();
            Ok(())
        } else {
            let volume = self.volume;
            self.start(preset.base_hz(), preset.beat_hz(), volume)
        }
    }

    /// Requested parameters
    pub fn snapshot(&self) -> OscillatorSnapshot {
        OscillatorSnapshot {
            base_hz: self.base_hz,
            beat_hz: self.beat_hz,
            volume: self.volume,
            running: self.is_running(),
        }
    }

    /// Frequencies the oscillators are producing right now, left then right
    pub fn live_frequencies(&self) -> Option<(f32, f32)> {
        let pair = self.pair.as_ref()?;
        let (left, right) = (pair.left, pair.right);
        pair.context
            .with_graph(|graph| {
                Ok((
                    graph.param_value(left, ParamKind::Frequency)?,
                    graph.param_value(right, ParamKind::Frequency)?,
                ))
            })
            .ok()
    }

    /// Master gain right now
    pub fn live_volume(&self) -> Option<f32> {
        let pair = self.pair.as_ref()?;
        let master = pair.master;
        pair.context
            .with_graph(|graph| graph.param_value(master, ParamKind::Gain))
            .ok()
    }
}

impl Drop for BinauralSynthesizer {
    fn drop(&mut self) {
        self.stop();
    }
}
