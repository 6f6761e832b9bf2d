//! Input Crossfading
//!
//! Every processing node that accepts a live source wraps it in an
//! [`InputFader`] so the source can be hot-swapped without clicks: a linear
//! gain ramp runs from the old source set to the new one, advancing exactly
//! one block per tick. While a fade is active the fader declares both the old
//! and the new refs; the old ones are dropped when the ramp completes.
//!
//! `InputFader` is embeddable (the spectral composites each own one or two)
//! and is also a [`SpectralNode`] in its own right, so a bare crossfader can
//! be patched into a rack.

use crate::stream::{tap, ChannelRef, SpectralError, SpectralNode, Update};

/// Click-free hot swap of a live source
pub struct InputFader {
    cur: Vec<ChannelRef>,
    prev: Vec<ChannelRef>,
    /// Cached `prev ++ cur`, what the rack gathers for us
    refs: Vec<ChannelRef>,
    /// Logical channel count, fixed at construction
    channels: usize,
    /// Crossfade position in [0, 1]; 1 when idle
    gain: f64,
    /// Ramp increment per sample
    step: f64,
    sample_rate: f64,
}

impl InputFader {
    pub fn new(source: Vec<ChannelRef>) -> Result<Self, SpectralError> {
        if source.is_empty() {
            return Err(SpectralError::InvalidParameter(
                "input must reference at least one channel".into(),
            ));
        }
        let channels = source.len();
        Ok(Self {
            refs: source.clone(),
            cur: source,
            prev: Vec::new(),
            channels,
            gain: 1.0,
            step: 0.0,
            sample_rate: 44100.0,
        })
    }

    /// Logical channel count established at construction
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Refs to gather this tick, old sources first
    pub fn refs(&self) -> &[ChannelRef] {
        &self.refs
    }

    /// Number of refs currently declared (grows during a fade)
    pub fn ref_count(&self) -> usize {
        self.refs.len()
    }

    pub fn is_fading(&self) -> bool {
        !self.prev.is_empty()
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        if sample_rate > 0.0 {
            self.sample_rate = sample_rate;
        }
    }

    /// Replace the source, crossfading over `fade_secs` seconds
    ///
    /// A zero (or negative) fade time switches immediately. Replacing the
    /// source mid-fade abandons the oldest source and fades from the current
    /// mix target instead.
    pub fn set_input(
        &mut self,
        source: Vec<ChannelRef>,
        fade_secs: f64,
    ) -> Result<(), SpectralError> {
        if source.is_empty() {
            return Err(SpectralError::InvalidParameter(
                "replacement input must reference at least one channel".into(),
            ));
        }
        if fade_secs <= 0.0 {
            self.cur = source;
            self.prev.clear();
            self.gain = 1.0;
            self.step = 0.0;
        } else {
            self.prev = std::mem::replace(&mut self.cur, source);
            self.gain = 0.0;
            self.step = 1.0 / (fade_secs * self.sample_rate).max(1.0);
        }
        self.rebuild_refs();
        Ok(())
    }

    fn rebuild_refs(&mut self) {
        self.refs.clear();
        self.refs.extend_from_slice(&self.prev);
        self.refs.extend_from_slice(&self.cur);
    }

    /// Crossfaded sample for logical channel `ch` at block offset `s`
    ///
    /// `inputs` is the gathered region for this fader, ordered as [`refs`].
    /// Channels wrap modulo the active source width, so a narrower
    /// replacement still feeds every logical channel.
    ///
    /// [`refs`]: Self::refs
    #[inline]
    pub fn sample(&self, inputs: &[Vec<f64>], ch: usize, s: usize) -> f64 {
        let cur = tap(inputs, self.prev.len() + ch % self.cur.len(), s);
        if self.prev.is_empty() {
            return cur;
        }
        let g = (self.gain + self.step * s as f64).min(1.0);
        let old = tap(inputs, ch % self.prev.len(), s);
        old + (cur - old) * g
    }

    /// Advance the ramp by one processed block
    pub fn advance(&mut self, frames: usize) {
        if self.prev.is_empty() {
            return;
        }
        self.gain += self.step * frames as f64;
        if self.gain >= 1.0 {
            self.gain = 1.0;
            self.step = 0.0;
            self.prev.clear();
            self.rebuild_refs();
        }
    }

    /// Complete any pending fade instantly
    pub fn settle(&mut self) {
        if !self.prev.is_empty() {
            self.gain = 1.0;
            self.step = 0.0;
            self.prev.clear();
            self.rebuild_refs();
        }
    }
}

impl SpectralNode for InputFader {
    fn output_channels(&self) -> usize {
        self.channels
    }

    fn input_refs(&self) -> &[ChannelRef] {
        &self.refs
    }

    fn process(&mut self, inputs: &[Vec<f64>], outputs: &mut [Vec<f64>]) {
        let frames = outputs.first().map(|b| b.len()).unwrap_or(0);
        for ch in 0..self.channels.min(outputs.len()) {
            for s in 0..frames {
                outputs[ch][s] = self.sample(inputs, ch, s);
            }
        }
        self.advance(frames);
    }

    fn reset(&mut self) {
        self.settle();
    }

    fn configure(&mut self, sample_rate: f64, _block_size: usize) {
        self.set_sample_rate(sample_rate);
    }

    fn update(&mut self, update: Update) -> Result<(), SpectralError> {
        match update {
            Update::Input { source, fade } => self.set_input(source, fade),
            other => Err(SpectralError::UnsupportedUpdate(other.kind())),
        }
    }

    fn type_id(&self) -> &'static str {
        "input_fader"
    }
}
