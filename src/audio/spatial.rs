use super::mixer::MixerEngine;
use aura_core::clamp_unit;
use log::trace;

/// Channels addressed by the blend surface, in insertion order
pub const BLEND_CHANNELS: usize = 4;

/// Pointer position on the blend pad, both axes in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendPosition {
    pub x: f32,
    pub y: f32,
}

impl Default for BlendPosition {
    fn default() -> Self {
        Self { x: 0.5, y: 0.5 }
    }
}

impl BlendPosition {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x: clamp_unit(x),
            y: clamp_unit(y),
        }
    }

    /// Bilinear corner weights: top-left, top-right, bottom-left,
    /// bottom-right. They always sum to 1.
    pub fn weights(&self) -> [f32; BLEND_CHANNELS] {
        let (x, y) = (self.x, self.y);
        [
            (1.0 - x) * (1.0 - y),
            x * (1.0 - y),
            (1.0 - x) * y,
            x * y,
        ]
    }
}

/// Drag gesture over the mixer's first four layers
#[derive(Debug, Default)]
pub struct SpatialBlender {
    position: BlendPosition,
    dragging: bool,
}

impl SpatialBlender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> BlendPosition {
        self.position
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    /// Begin a drag and apply the pressed position
    pub fn press(&mut self, x: f32, y: f32, mixer: &mut MixerEngine) {
        self.dragging = true;
        self.apply(x, y, mixer);
    }

    /// Update while a drag is held. Ignored otherwise.
    pub fn move_to(&mut self, x: f32, y: f32, mixer: &mut MixerEngine) {
        if self.dragging {
            self.apply(x, y, mixer);
        }
    }

    /// End the drag. Position and volumes stay where they are.
    pub fn release(&mut self) {
        self.dragging = false;
    }

    /// Below two layers nothing is applied and the position stays put
    fn apply(&mut self, x: f32, y: f32, mixer: &mut MixerEngine) {
        if mixer.len() < 2 {
            return;
        }
        self.position = BlendPosition::new(x, y);

        let weights = self.position.weights();
        let ids: Vec<_> = mixer
            .channels()
            .iter()
            .take(BLEND_CHANNELS)
            .map(|c| c.track.id.clone())
            .collect();

        for (id, weight) in ids.iter().zip(weights) {
            mixer.update_volume(id, weight);
        }
        trace!("Blend at ({:.2}, {:.2}) -> {:?}", self.position.x, self.position.y, weights);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audio_io::AudioContext;
    use aura_core::{Track, TrackId};
    use settings_manager::MixerSettings;

    fn mixer_with(ids: &[&str]) -> MixerEngine {
        let mut mixer = MixerEngine::new(AudioContext::offline("media", 1000), &MixerSettings::default());
        for id in ids {
            mixer.add_sound(Track::new(*id, *id));
        }
        mixer
    }

    fn volume(mixer: &MixerEngine, id: &str) -> f32 {
        mixer.channel(&TrackId::new(id)).unwrap().volume
    }

    #[test]
    fn weights_sum_to_one() {
        for &(x, y) in &[(0.0, 0.0), (1.0, 1.0), (0.3, 0.8), (0.5, 0.5), (0.99, 0.01)] {
            let sum: f32 = BlendPosition::new(x, y).weights().iter().sum();
            assert!((sum - 1.0).abs() < 1e-6, "({}, {}) sums to {}", x, y, sum);
        }
    }

    #[test]
    fn corners_isolate_one_channel() {
        assert_eq!(BlendPosition::new(0.0, 0.0).weights(), [1.0, 0.0, 0.0, 0.0]);
        assert_eq!(BlendPosition::new(1.0, 0.0).weights(), [0.0, 1.0, 0.0, 0.0]);
        assert_eq!(BlendPosition::new(0.0, 1.0).weights(), [0.0, 0.0, 1.0, 0.0]);
        assert_eq!(BlendPosition::new(1.0, 1.0).weights(), [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn two_channels_get_the_top_row_weights() {
        let mut mixer = mixer_with(&["a", "b"]);
        let mut blender = SpatialBlender::new();
        blender.press(0.25, 0.5, &mut mixer);

        assert!((volume(&mixer, "a") - 0.375).abs() < 1e-6);
        assert!((volume(&mixer, "b") - 0.125).abs() < 1e-6);
    }

    #[test]
    fn fifth_channel_is_untouched() {
        let mut mixer = mixer_with(&["a", "b", "c", "d", "e"]);
        let mut blender = SpatialBlender::new();
        blender.press(1.0, 1.0, &mut mixer);

        assert_eq!(volume(&mixer, "a"), 0.0);
        assert_eq!(volume(&mixer, "d"), 1.0);
        assert_eq!(volume(&mixer, "e"), 0.7);
    }

    #[test]
    fn single_channel_is_left_alone() {
        let mut mixer = mixer_with(&["a"]);
        let mut blender = SpatialBlender::new();
        blender.press(0.0, 1.0, &mut mixer);
        assert_eq!(volume(&mixer, "a"), 0.7);
        assert!(blender.is_dragging());
        assert_eq!(blender.position(), BlendPosition::default());
    }

    #[test]
    fn moves_only_apply_while_dragging() {
        let mut mixer = mixer_with(&["a", "b"]);
        let mut blender = SpatialBlender::new();

        blender.move_to(0.0, 0.0, &mut mixer);
        assert_eq!(volume(&mixer, "a"), 0.7);

        blender.press(0.0, 0.0, &mut mixer);
        blender.move_to(1.0, 0.0, &mut mixer);
        assert_eq!(volume(&mixer, "b"), 1.0);

        blender.release();
        blender.move_to(0.0, 0.0, &mut mixer);
        assert_eq!(volume(&mixer, "b"), 1.0);
        assert_eq!(blender.position(), BlendPosition::new(1.0, 0.0));
    }

    #[test]
    fn out_of_range_positions_are_clamped() {
        let position = BlendPosition::new(-2.0, 3.0);
        assert_eq!(position, BlendPosition::new(0.0, 1.0));
    }
}
