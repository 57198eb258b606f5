//! Periodic tone generator

use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

impl Waveform {
    /// Sample at `phase` (in cycles, [0, 1)). Every shape is zero at phase 0,
    /// so a 0 Hz oscillator renders exact silence.
    fn sample(self, phase: f32) -> f32 {
        match self {
            Waveform::Sine => (TAU * phase).sin(),
            Waveform::Square => {
                let s = (TAU * phase).sin();
                if s > 0.0 {
                    1.0
                } else if s < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            }
            Waveform::Sawtooth => 2.0 * (phase + 0.5).fract() - 1.0,
            Waveform::Triangle => 1.0 - 4.0 * ((phase + 0.25).fract() - 0.5).abs(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Oscillator {
    waveform: Waveform,
    frequency: f32,
    sample_rate: u32,
    phase: f32,
}

impl Oscillator {
    pub fn new(waveform: Waveform, frequency: f32, sample_rate: u32) -> Self {
        Self {
            waveform,
            frequency,
            sample_rate: sample_rate.max(1),
            phase: 0.0,
        }
    }

    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    /// Add `gain * wave` into every channel of an interleaved block
    pub fn render_add(&mut self, out: &mut [f32], channels: u16, gain: f32) {
        let channels = channels.max(1) as usize;
        let step = self.frequency / self.sample_rate as f32;
        for frame in out.chunks_mut(channels) {
            let value = gain * self.waveform.sample(self.phase);
            for sample in frame {
                *sample += value;
            }
            self.phase = (self.phase + step).rem_euclid(1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_frequency_square_is_silent() {
        let mut osc = Oscillator::new(Waveform::Square, 0.0, 48_000);
        let mut block = vec![0.0f32; 256];
        osc.render_add(&mut block, 2, 1.0);
        assert!(block.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_every_waveform_starts_at_zero() {
        for waveform in [Waveform::Sine, Waveform::Square, Waveform::Sawtooth, Waveform::Triangle] {
            assert!(waveform.sample(0.0).abs() < 1e-6, "{:?}", waveform);
        }
    }

    #[test]
    fn test_square_alternates_sign() {
        let mut osc = Oscillator::new(Waveform::Square, 1_000.0, 8_000);
        let mut block = vec![0.0f32; 8];
        osc.render_add(&mut block, 1, 1.0);
        // Eight samples span one cycle
        assert_eq!(&block[1..4], &[1.0, 1.0, 1.0]);
        assert_eq!(&block[5..8], &[-1.0, -1.0, -1.0]);
    }

    #[test]
    fn test_render_add_mixes_into_existing() {
        let mut osc = Oscillator::new(Waveform::Sine, 440.0, 48_000);
        let mut block = vec![0.5f32; 4];
        osc.render_add(&mut block, 2, 0.0);
        assert_eq!(block, vec![0.5; 4]);
    }
}
