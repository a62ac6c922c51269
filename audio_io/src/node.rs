use crate::media::PcmBuffer;
use crate::param::AudioParam;
use std::f64::consts::PI;
use std::sync::Arc;

/// Addressable parameter of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Frequency,
    Gain,
    Pan,
}

/// Sine generator with a phase accumulator
#[derive(Debug, Clone)]
pub struct Oscillator {
    pub frequency: AudioParam,
    phase: f64,
}

impl Oscillator {
    pub fn new(frequency: f32) -> Self {
        Self {
            frequency: AudioParam::new(frequency, 0.0, 24000.0),
            phase: 0.0,
        }
    }

    fn next(&mut self, frame: u64, sample_rate: u32) -> f32 {
        let freq = self.frequency.value_at(frame) as f64;
        let sample = (2.0 * PI * self.phase).sin() as f32;
        self.phase = (self.phase + freq / sample_rate as f64).fract();
        sample
    }
}

/// Plays a decoded buffer, optionally looping
#[derive(Debug, Clone)]
pub struct BufferSource {
    buffer: Option<Arc<PcmBuffer>>,
    /// Read position in buffer frames
    position: f64,
    pub looping: bool,
    playing: bool,
    ended: bool,
}

impl BufferSource {
    pub fn new(looping: bool) -> Self {
        Self {
            buffer: None,
            position: 0.0,
            looping,
            playing: false,
            ended: false,
        }
    }

    pub fn with_buffer(buffer: Arc<PcmBuffer>, looping: bool) -> Self {
        Self {
            buffer: Some(buffer),
            ..Self::new(looping)
        }
    }

    pub fn set_buffer(&mut self, buffer: Arc<PcmBuffer>) {
        self.buffer = Some(buffer);
        self.position = 0.0;
        self.ended = false;
    }

    pub fn has_buffer(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn has_ended(&self) -> bool {
        self.ended
    }

    /// Start or pause. Restarting an ended source rewinds it.
    pub fn set_playing(&mut self, playing: bool) {
        if playing && self.ended {
            self.position = 0.0;
            self.ended = false;
        }
        self.playing = playing && self.buffer.is_some();
    }

    /// Move the read head, clamped to the buffer
    pub fn seek(&mut self, seconds: f64) {
        if let Some(buffer) = &self.buffer {
            let frames = buffer.frames() as f64;
            let target = (seconds.max(0.0) * buffer.sample_rate() as f64).min(frames);
            self.position = target;
            self.ended = false;
        }
    }

    pub fn position_secs(&self) -> f64 {
        match &self.buffer {
            Some(buffer) => self.position / buffer.sample_rate() as f64,
            None => 0.0,
        }
    }

    pub fn duration_secs(&self) -> Option<f64> {
        self.buffer.as_ref().map(|b| b.duration_secs())
    }

    fn next(&mut self, sample_rate: u32) -> [f32; 2] {
        let buffer = match (&self.buffer, self.playing) {
            (Some(buffer), true) => buffer,
            _ => return [0.0, 0.0],
        };

        let frames = buffer.frames();
        if frames == 0 {
            self.playing = false;
            self.ended = true;
            return [0.0, 0.0];
        }

        let index = self.position.floor() as usize;
        let frac = (self.position - index as f64) as f32;
        let next_index = if index + 1 >= frames && self.looping {
            0
        } else {
            index + 1
        };

        let a = buffer.frame(index);
        let b = buffer.frame(next_index);
        let out = [a[0] + (b[0] - a[0]) * frac, a[1] + (b[1] - a[1]) * frac];

        self.position += buffer.sample_rate() as f64 / sample_rate as f64;
        if self.position >= frames as f64 {
            if self.looping {
                self.position %= frames as f64;
            } else {
                self.position = frames as f64;
                self.playing = false;
                self.ended = true;
            }
        }

        out
    }
}

/// Processing performed by a graph node
#[derive(Debug, Clone)]
pub enum NodeKind {
    Oscillator(Oscillator),
    BufferSource(BufferSource),
    /// Equal-power stereo panner, `pan` in `[-1, 1]`
    StereoPanner { pan: AudioParam },
    Gain { gain: AudioParam },
}

impl NodeKind {
    pub fn oscillator(frequency: f32) -> Self {
        NodeKind::Oscillator(Oscillator::new(frequency))
    }

    pub fn buffer_source(looping: bool) -> Self {
        NodeKind::BufferSource(BufferSource::new(looping))
    }

    pub fn panner(pan: f32) -> Self {
        NodeKind::StereoPanner {
            pan: AudioParam::new(pan, -1.0, 1.0),
        }
    }

    pub fn gain(gain: f32) -> Self {
        NodeKind::Gain {
            gain: AudioParam::new(gain, 0.0, 1.0),
        }
    }

    pub fn is_source(&self) -> bool {
        matches!(self, NodeKind::Oscillator(_) | NodeKind::BufferSource(_))
    }

    pub fn param(&self, kind: ParamKind) -> Option<&AudioParam> {
        match (self, kind) {
            (NodeKind::Oscillator(osc), ParamKind::Frequency) => Some(&osc.frequency),
            (NodeKind::StereoPanner { pan }, ParamKind::Pan) => Some(pan),
            (NodeKind::Gain { gain }, ParamKind::Gain) => Some(gain),
            _ => None,
        }
    }

    pub fn param_mut(&mut self, kind: ParamKind) -> Option<&mut AudioParam> {
        match (self, kind) {
            (NodeKind::Oscillator(osc), ParamKind::Frequency) => Some(&mut osc.frequency),
            (NodeKind::StereoPanner { pan }, ParamKind::Pan) => Some(pan),
            (NodeKind::Gain { gain }, ParamKind::Gain) => Some(gain),
            _ => None,
        }
    }

    /// Produce one stereo frame from the summed input
    pub(crate) fn process(&mut self, frame: u64, sample_rate: u32, input: [f32; 2]) -> [f32; 2] {
        match self {
            NodeKind::Oscillator(osc) => {
                let s = osc.next(frame, sample_rate);
                [s, s]
            }
            NodeKind::BufferSource(source) => source.next(sample_rate),
            NodeKind::StereoPanner { pan } => {
                let mono = (input[0] + input[1]) * 0.5;
                let angle = (pan.value_at(frame) + 1.0) * std::f32::consts::PI / 4.0;
                [mono * angle.cos(), mono * angle.sin()]
            }
            NodeKind::Gain { gain } => {
                let g = gain.value_at(frame);
                [input[0] * g, input[1] * g]
            }
        }
    }
}
