//! Frequency analysis for the visualizer bars.
//!
//! The analyzer taps one node of an audio graph and turns the most recent
//! `fft_size` samples into byte magnitudes, the same shape a browser
//! analyser node hands to a canvas.

use audio_io::{AudioContext, NodeId};
use aura_core::Error;
use log::{debug, warn};
use ringbuf::{HeapConsumer, HeapRb};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::collections::VecDeque;
use std::sync::Arc;

/// Capacity of the tap between the render thread and the analyzer
const TAP_CAPACITY: usize = 8192;

/// Tunables of the analysis window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalyzerSettings {
    /// FFT length; power of two in 32..=32768
    pub fft_size: usize,
    /// Weight of the previous frame in `[0, 1)`
    pub smoothing: f32,
    /// Level mapped to byte 0
    pub min_decibels: f32,
    /// Level mapped to byte 255
    pub max_decibels: f32,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            fft_size: 64,
            smoothing: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
        }
    }
}

impl AnalyzerSettings {
    fn validate(&self) -> Result<(), Error> {
        if !self.fft_size.is_power_of_two() || !(32..=32768).contains(&self.fft_size) {
            return Err(Error::Config(format!(
                "fft_size must be a power of two between 32 and 32768, got {}",
                self.fft_size
            )));
        }
        if !(0.0..1.0).contains(&self.smoothing) {
            return Err(Error::Config(format!(
                "smoothing must be in [0, 1), got {}",
                self.smoothing
            )));
        }
        if self.min_decibels >= self.max_decibels {
            return Err(Error::Config(
                "min_decibels must be below max_decibels".to_string(),
            ));
        }
        Ok(())
    }
}

/// One snapshot of byte magnitudes, lowest bin first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyzerFrame {
    bins: Vec<u8>,
}

impl AnalyzerFrame {
    pub fn new(bins: Vec<u8>) -> Self {
        Self { bins }
    }

    pub fn bins(&self) -> &[u8] {
        &self.bins
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Downsample to `count` bars by picking every `len / count`th bin.
    /// Bars past the end of the data are 0.
    pub fn bars(&self, count: usize) -> Vec<u8> {
        if count == 0 {
            return Vec::new();
        }
        let step = (self.bins.len() / count).max(1);
        (0..count)
            .map(|i| self.bins.get(i * step).copied().unwrap_or(0))
            .collect()
    }
}

struct Binding {
    context: AudioContext,
    node: NodeId,
    consumer: HeapConsumer<f32>,
}

/// Spectral snapshots of a single tapped source
pub struct FrequencyAnalyzer {
    settings: AnalyzerSettings,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    history: VecDeque<f32>,
    smoothed: Vec<f32>,
    scratch: Vec<Complex<f32>>,
    binding: Option<Binding>,
}

impl FrequencyAnalyzer {
    pub fn new(settings: AnalyzerSettings) -> Result<Self, Error> {
        settings.validate()?;

        let n = settings.fft_size;
        let fft = FftPlanner::<f32>::new().plan_fft_forward(n);

        // Blackman window, alpha = 0.16
        let window = (0..n)
            .map(|i| {
                let x = 2.0 * std::f32::consts::PI * i as f32 / n as f32;
                0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos()
            })
            .collect();

        Ok(Self {
            settings,
            fft,
            window,
            history: std::iter::repeat(0.0).take(n).collect(),
            smoothed: vec![0.0; n / 2],
            scratch: vec![Complex::new(0.0, 0.0); n],
            binding: None,
        })
    }

    pub fn settings(&self) -> &AnalyzerSettings {
        &self.settings
    }

    /// Number of values in every non-empty frame
    pub fn bin_count(&self) -> usize {
        self.settings.fft_size / 2
    }

    pub fn is_attached(&self) -> bool {
        self.binding.is_some()
    }

    /// Tap `node` in `context`. Returns `false` when already bound, in which
    /// case the first binding is kept.
    pub fn attach(&mut self, context: &AudioContext, node: NodeId) -> Result<bool, Error> {
        if self.binding.is_some() {
            debug!("Analyzer already attached, ignoring {:?}", node);
            return Ok(false);
        }

        let (producer, consumer) = HeapRb::<f32>::new(TAP_CAPACITY).split();
        context.with_graph(|graph| graph.set_tap(node, producer))?;

        self.binding = Some(Binding {
            context: context.clone(),
            node,
            consumer,
        });
        debug!("Analyzer attached to {:?} in '{}'", node, context.label());
        Ok(true)
    }

    /// Release the tap and forget all history
    pub fn detach(&mut self) {
        if let Some(binding) = self.binding.take() {
            let node = binding.node;
            if let Err(e) = binding.context.with_graph(|graph| graph.clear_tap(node)) {
                debug!("Analyzer tap already gone: {}", e);
            }
        }
        self.history.iter_mut().for_each(|s| *s = 0.0);
        self.smoothed.iter_mut().for_each(|s| *s = 0.0);
    }

    /// Make sure the analysed context is running. Safe to call repeatedly.
    pub fn resume(&self) {
        if let Some(binding) = &self.binding {
            if let Err(e) = binding.context.resume() {
                warn!("Failed to resume analysis context: {}", e);
            }
        }
    }

    /// Current spectrum, empty when nothing is attached
    pub fn sample(&mut self) -> AnalyzerFrame {
        let binding = match self.binding.as_mut() {
            Some(binding) => binding,
            None => return AnalyzerFrame::default(),
        };

        let n = self.settings.fft_size;
        while let Some(sample) = binding.consumer.pop() {
            if self.history.len() == n {
                self.history.pop_front();
            }
            self.history.push_back(sample);
        }

        for ((slot, sample), w) in self
            .scratch
            .iter_mut()
            .zip(self.history.iter())
            .zip(self.window.iter())
        {
            *slot = Complex::new(sample * w, 0.0);
        }
        self.fft.process(&mut self.scratch);

        let tau = self.settings.smoothing;
        let min = self.settings.min_decibels;
        let range = self.settings.max_decibels - min;

        let bins = self
            .smoothed
            .iter_mut()
            .zip(self.scratch.iter())
            .map(|(smoothed, x)| {
                let magnitude = x.norm() / n as f32;
                *smoothed = tau * *smoothed + (1.0 - tau) * magnitude;
                to_byte(*smoothed, min, range)
            })
            .collect();

        AnalyzerFrame::new(bins)
    }
}

fn to_byte(magnitude: f32, min_decibels: f32, range: f32) -> u8 {
    if magnitude <= 0.0 || !magnitude.is_finite() {
        return 0;
    }
    let db = 20.0 * magnitude.log10();
    let scaled = (255.0 / range * (db - min_decibels)).floor();
    scaled.clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use audio_io::NodeKind;

    fn tone_context(frequency: f32) -> (AudioContext, NodeId) {
        let ctx = AudioContext::offline("analysis", 48000);
        let osc = ctx
            .with_graph(|g| {
                let osc = g.add_node(NodeKind::oscillator(frequency))?;
                g.connect_to_destination(osc)?;
                Ok(osc)
            })
            .unwrap();
        ctx.resume().unwrap();
        (ctx, osc)
    }

    #[test_log::test]
    fn unattached_sample_is_empty() {
        let mut analyzer = FrequencyAnalyzer::new(AnalyzerSettings::default()).unwrap();
        assert!(analyzer.sample().is_empty());
        analyzer.resume();
    }

    #[test]
    fn rejects_bad_settings() {
        let settings = AnalyzerSettings {
            fft_size: 100,
            ..AnalyzerSettings::default()
        };
        assert!(FrequencyAnalyzer::new(settings).is_err());

        let settings = AnalyzerSettings {
            smoothing: 1.0,
            ..AnalyzerSettings::default()
        };
        assert!(FrequencyAnalyzer::new(settings).is_err());
    }

    #[test]
    fn second_attach_keeps_first_binding() {
        let (ctx, osc) = tone_context(440.0);
        let other = ctx.with_graph(|g| g.add_node(NodeKind::gain(1.0))).unwrap();

        let mut analyzer = FrequencyAnalyzer::new(AnalyzerSettings::default()).unwrap();
        assert!(analyzer.attach(&ctx, osc).unwrap());
        assert!(!analyzer.attach(&ctx, other).unwrap());
        assert!(ctx.with_graph(|g| g.has_tap(osc)).unwrap());
        assert!(!ctx.with_graph(|g| g.has_tap(other)).unwrap());
    }

    #[test]
    fn silence_maps_to_zero() {
        let ctx = AudioContext::offline("analysis", 48000);
        let gain = ctx
            .with_graph(|g| {
                let gain = g.add_node(NodeKind::gain(1.0))?;
                g.connect_to_destination(gain)?;
                Ok(gain)
            })
            .unwrap();
        ctx.resume().unwrap();

        let mut analyzer = FrequencyAnalyzer::new(AnalyzerSettings::default()).unwrap();
        analyzer.attach(&ctx, gain).unwrap();
        ctx.render(256).unwrap();

        let frame = analyzer.sample();
        assert_eq!(frame.len(), 32);
        assert!(frame.bins().iter().all(|b| *b == 0));
    }

    #[test]
    fn tone_peaks_in_its_bin() {
        // 48 kHz / 64 points = 750 Hz per bin, so 3 kHz lands in bin 4.
        let (ctx, osc) = tone_context(3000.0);
        let mut analyzer = FrequencyAnalyzer::new(AnalyzerSettings::default()).unwrap();
        analyzer.attach(&ctx, osc).unwrap();
        ctx.render(1024).unwrap();

        let frame = analyzer.sample();
        let peak = frame
            .bins()
            .iter()
            .enumerate()
            .max_by_key(|(_, b)| **b)
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 4);
        assert!(frame.bins()[4] > frame.bins()[20]);
    }

    #[test]
    fn smoothing_builds_up_over_frames() {
        // Quiet enough to stay below the byte ceiling.
        let ctx = AudioContext::offline("analysis", 48000);
        let gain = ctx
            .with_graph(|g| {
                let osc = g.add_node(NodeKind::oscillator(1500.0))?;
                let gain = g.add_node(NodeKind::gain(0.01))?;
                g.connect(osc, gain)?;
                g.connect_to_destination(gain)?;
                Ok(gain)
            })
            .unwrap();
        ctx.resume().unwrap();

        let mut analyzer = FrequencyAnalyzer::new(AnalyzerSettings::default()).unwrap();
        analyzer.attach(&ctx, gain).unwrap();

        ctx.render(64).unwrap();
        let first = analyzer.sample().bins()[2];
        ctx.render(64).unwrap();
        let second = analyzer.sample().bins()[2];
        assert!(second > first, "{} then {}", first, second);
    }

    #[test]
    fn bars_downsample_by_stride() {
        let frame = AnalyzerFrame::new((0..32).collect());
        assert_eq!(frame.bars(4), vec![0, 8, 16, 24]);
        assert_eq!(frame.bars(20), (0..20).collect::<Vec<u8>>());
        assert_eq!(frame.bars(40).len(), 40);
        assert_eq!(frame.bars(40)[39], 0);
        assert!(AnalyzerFrame::default().bars(20).iter().all(|b| *b == 0));
    }
}
