//! Phase Vocoder Primitives
//!
//! [`FrameDelta`], [`FrameAccum`], and [`Vectral`] operate on serialized
//! spectral streams (usually the `ang` or `mag` views of a
//! [`CarToPol`](crate::convert::CarToPol)) and relate corresponding bins of
//! *successive* frames. Their input channels interleave overlap positions the
//! way the analysis bank emits them: with `lmax` channels and `overlaps`
//! positions, `mains = lmax / overlaps` signal voices exist, and channel `i`
//! belongs to voice `i % mains` at overlap position `i / mains`.
//!
//! All channels of one voice share a single frame-length memory per node.
//! The overlap streams visit each bin slot in staggered rotation, so the
//! shared memory always holds the most recent value of that bin regardless
//! of which overlap stream produced it, which is what turns a per-frame
//! difference into a per-hop difference.

use crate::fader::InputFader;
use crate::poly::PolyParam;
use crate::stream::{
    check_coefficient, ChannelRef, SpectralError, SpectralNode, Update,
};
use libm::Libm;
use std::f64::consts::{PI, TAU};

/// Wrap a phase difference into [-pi, pi)
#[inline]
pub fn wrap_phase(x: f64) -> f64 {
    x - TAU * Libm::<f64>::floor((x + PI) / TAU)
}

/// Shared frame memory and rotation state for one voice
struct AggState {
    mem: Vec<f64>,
    /// Bin cursor per overlap slot, staggered so slot `k` trails slot
    /// `k + 1` by one hop
    pos: Vec<usize>,
}

impl AggState {
    fn new(framesize: usize, overlaps: usize) -> Self {
        Self {
            mem: vec![0.0; framesize],
            pos: (0..overlaps)
                .map(|k| (framesize - framesize * k / overlaps) % framesize)
                .collect(),
        }
    }
}

/// Overlap-stream regrouping shared by the vocoder nodes
struct Regroup {
    framesize: usize,
    overlaps: usize,
    mains: usize,
    aggs: Vec<AggState>,
}

impl Regroup {
    fn new(lmax: usize, framesize: usize, overlaps: usize) -> Result<Self, SpectralError> {
        if framesize == 0 {
            return Err(SpectralError::InvalidParameter(
                "frame size must be at least 1".into(),
            ));
        }
        if overlaps == 0 {
            return Err(SpectralError::InvalidParameter(
                "overlaps must be at least 1".into(),
            ));
        }
        if lmax % overlaps != 0 {
            return Err(SpectralError::InconsistentTopology(format!(
                "{} input channels do not divide into {} overlap positions",
                lmax, overlaps
            )));
        }
        let mains = lmax / overlaps;
        if mains == 0 {
            return Err(SpectralError::InvalidParameter(format!(
                "{} overlaps cannot be recovered from {} channels",
                overlaps, lmax
            )));
        }
        Ok(Self {
            framesize,
            overlaps,
            mains,
            aggs: (0..mains)
                .map(|_| AggState::new(framesize, overlaps))
                .collect(),
        })
    }

    fn channels(&self) -> usize {
        self.mains * self.overlaps
    }

    fn set_frame_size(&mut self, framesize: usize) -> Result<(), SpectralError> {
        if framesize == 0 {
            return Err(SpectralError::InvalidParameter(
                "frame size must be at least 1".into(),
            ));
        }
        self.framesize = framesize;
        self.reset();
        Ok(())
    }

    fn reset(&mut self) {
        for agg in self.aggs.iter_mut() {
            *agg = AggState::new(self.framesize, self.overlaps);
        }
    }

    /// Run one block through `op(voice, bin, state, input) -> output`
    ///
    /// Samples are walked in chronological order across all overlap slots of
    /// a voice, so the shared memory is always updated by whichever stream
    /// most recently carried a bin.
    fn process<F>(
        &mut self,
        fader: &InputFader,
        inputs: &[Vec<f64>],
        outputs: &mut [Vec<f64>],
        frames: usize,
        mut op: F,
    ) where
        F: FnMut(usize, usize, &mut f64, f64) -> f64,
    {
        let framesize = self.framesize;
        for (j, agg) in self.aggs.iter_mut().enumerate() {
            for s in 0..frames {
                for slot in 0..self.overlaps {
                    let ch = j + slot * self.mains;
                    let x = fader.sample(inputs, ch, s);
                    let p = agg.pos[slot];
                    outputs[ch][s] = op(j, p, &mut agg.mem[p], x);
                    agg.pos[slot] = (p + 1) % framesize;
                }
            }
        }
    }
}

/// Bin-wise difference between successive frames, wrapped to [-pi, pi)
///
/// Fed a phase stream, this yields the phase advance per hop, the first
/// stage of phase-vocoder processing.
pub struct FrameDelta {
    fader: InputFader,
    regroup: Regroup,
}

impl FrameDelta {
    pub fn new(
        inputs: Vec<ChannelRef>,
        framesize: usize,
        overlaps: usize,
    ) -> Result<Self, SpectralError> {
        let fader = InputFader::new(inputs)?;
        let regroup = Regroup::new(fader.channels(), framesize, overlaps)?;
        Ok(Self { fader, regroup })
    }

    pub fn frame_size(&self) -> usize {
        self.regroup.framesize
    }

    pub fn mains(&self) -> usize {
        self.regroup.mains
    }
}

impl SpectralNode for FrameDelta {
    fn output_channels(&self) -> usize {
        self.regroup.channels()
    }

    fn input_refs(&self) -> &[ChannelRef] {
        self.fader.refs()
    }

    fn process(&mut self, inputs: &[Vec<f64>], outputs: &mut [Vec<f64>]) {
        let frames = outputs.first().map(|b| b.len()).unwrap_or(0);
        self.regroup
            .process(&self.fader, inputs, outputs, frames, |_, _, mem, x| {
                let delta = wrap_phase(x - *mem);
                *mem = x;
                delta
            });
        self.fader.advance(frames);
    }

    fn reset(&mut self) {
        self.regroup.reset();
        self.fader.settle();
    }

    fn configure(&mut self, sample_rate: f64, _block_size: usize) {
        self.fader.set_sample_rate(sample_rate);
    }

    fn update(&mut self, update: Update) -> Result<(), SpectralError> {
        match update {
            Update::Input { source, fade } => self.fader.set_input(source, fade),
            Update::FrameSize(framesize) => self.regroup.set_frame_size(framesize),
            other => Err(SpectralError::UnsupportedUpdate(other.kind())),
        }
    }

    fn type_id(&self) -> &'static str {
        "frame_delta"
    }
}

/// Bin-wise running sum across successive frames
///
/// The inverse of [`FrameDelta`]: fed per-hop phase advances, it rebuilds a
/// continuous phase track.
pub struct FrameAccum {
    fader: InputFader,
    regroup: Regroup,
}

impl FrameAccum {
    pub fn new(
        inputs: Vec<ChannelRef>,
        framesize: usize,
        overlaps: usize,
    ) -> Result<Self, SpectralError> {
        let fader = InputFader::new(inputs)?;
        let regroup = Regroup::new(fader.channels(), framesize, overlaps)?;
        Ok(Self { fader, regroup })
    }

    pub fn frame_size(&self) -> usize {
        self.regroup.framesize
    }

    pub fn mains(&self) -> usize {
        self.regroup.mains
    }
}

impl SpectralNode for FrameAccum {
    fn output_channels(&self) -> usize {
        self.regroup.channels()
    }

    fn input_refs(&self) -> &[ChannelRef] {
        self.fader.refs()
    }

    fn process(&mut self, inputs: &[Vec<f64>], outputs: &mut [Vec<f64>]) {
        let frames = outputs.first().map(|b| b.len()).unwrap_or(0);
        self.regroup
            .process(&self.fader, inputs, outputs, frames, |_, _, mem, x| {
                *mem += x;
                *mem
            });
        self.fader.advance(frames);
    }

    fn reset(&mut self) {
        self.regroup.reset();
        self.fader.settle();
    }

    fn configure(&mut self, sample_rate: f64, _block_size: usize) {
        self.fader.set_sample_rate(sample_rate);
    }

    fn update(&mut self, update: Update) -> Result<(), SpectralError> {
        match update {
            Update::Input { source, fade } => self.fader.set_input(source, fade),
            Update::FrameSize(framesize) => self.regroup.set_frame_size(framesize),
            other => Err(SpectralError::UnsupportedUpdate(other.kind())),
        }
    }

    fn type_id(&self) -> &'static str {
        "frame_accum"
    }
}

/// Directional one-pole smoothing of magnitude frames
///
/// Each bin follows its input with a coefficient chosen by direction:
/// `up` when the magnitude rises, `down` when it falls. `damp` reduces the
/// effective coefficient toward the top of the frame, slowing the high bins.
/// All three coefficients sit in [0, 1]; 1 everywhere is a pass-through.
pub struct Vectral {
    fader: InputFader,
    regroup: Regroup,
    up: PolyParam<f64>,
    down: PolyParam<f64>,
    damp: PolyParam<f64>,
    /// (up, down, damp) resolved per voice
    coeffs: Vec<(f64, f64, f64)>,
}

impl Vectral {
    pub fn new(
        inputs: Vec<ChannelRef>,
        framesize: usize,
        overlaps: usize,
        up: impl Into<PolyParam<f64>>,
        down: impl Into<PolyParam<f64>>,
        damp: impl Into<PolyParam<f64>>,
    ) -> Result<Self, SpectralError> {
        let up = up.into();
        let down = down.into();
        let damp = damp.into();
        validate_coefficients("up", &up)?;
        validate_coefficients("down", &down)?;
        validate_coefficients("damp", &damp)?;

        let fader = InputFader::new(inputs)?;
        let regroup = Regroup::new(fader.channels(), framesize, overlaps)?;
        let coeffs = resolve_coeffs(regroup.mains, &up, &down, &damp);
        Ok(Self {
            fader,
            regroup,
            up,
            down,
            damp,
            coeffs,
        })
    }

    pub fn frame_size(&self) -> usize {
        self.regroup.framesize
    }

    pub fn mains(&self) -> usize {
        self.regroup.mains
    }

    fn refresh_coeffs(&mut self) {
        self.coeffs = resolve_coeffs(self.regroup.mains, &self.up, &self.down, &self.damp);
    }
}

fn validate_coefficients(name: &str, param: &PolyParam<f64>) -> Result<(), SpectralError> {
    param.validate()?;
    for i in 0..param.len() {
        check_coefficient(name, param.wrap(i))?;
    }
    Ok(())
}

fn resolve_coeffs(
    mains: usize,
    up: &PolyParam<f64>,
    down: &PolyParam<f64>,
    damp: &PolyParam<f64>,
) -> Vec<(f64, f64, f64)> {
    (0..mains)
        .map(|j| (up.wrap(j), down.wrap(j), damp.wrap(j)))
        .collect()
}

impl SpectralNode for Vectral {
    fn output_channels(&self) -> usize {
        self.regroup.channels()
    }

    fn input_refs(&self) -> &[ChannelRef] {
        self.fader.refs()
    }

    fn process(&mut self, inputs: &[Vec<f64>], outputs: &mut [Vec<f64>]) {
        let frames = outputs.first().map(|b| b.len()).unwrap_or(0);
        let framesize = self.regroup.framesize as f64;
        let coeffs = &self.coeffs;
        self.regroup
            .process(&self.fader, inputs, outputs, frames, |j, bin, mem, x| {
                let (up, down, damp) = coeffs[j];
                let coeff = if x >= *mem { up } else { down };
                let binfac = damp + (1.0 - damp) * (1.0 - bin as f64 / framesize);
                let eff = (coeff * binfac).clamp(0.0, 1.0);
                *mem += (x - *mem) * eff;
                *mem
            });
        self.fader.advance(frames);
    }

    fn reset(&mut self) {
        self.regroup.reset();
        self.fader.settle();
    }

    fn configure(&mut self, sample_rate: f64, _block_size: usize) {
        self.fader.set_sample_rate(sample_rate);
    }

    fn update(&mut self, update: Update) -> Result<(), SpectralError> {
        match update {
            Update::Input { source, fade } => self.fader.set_input(source, fade),
            Update::FrameSize(framesize) => self.regroup.set_frame_size(framesize),
            Update::Up(up) => {
                validate_coefficients("up", &up)?;
                self.up = up;
                self.refresh_coeffs();
                Ok(())
            }
            Update::Down(down) => {
                validate_coefficients("down", &down)?;
                self.down = down;
                self.refresh_coeffs();
                Ok(())
            }
            Update::Damp(damp) => {
                validate_coefficients("damp", &damp)?;
                self.damp = damp;
                self.refresh_coeffs();
                Ok(())
            }
            other => Err(SpectralError::UnsupportedUpdate(other.kind())),
        }
    }

    fn type_id(&self) -> &'static str {
        "vectral"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::NodeId;

    fn refs(n: usize) -> Vec<ChannelRef> {
        (0..n)
            .map(|channel| ChannelRef {
                node: NodeId::default(),
                channel,
            })
            .collect()
    }

    #[test]
    fn test_wrap_phase_range() {
        assert!((wrap_phase(0.0)).abs() < 1e-12);
        assert!((wrap_phase(TAU + 0.5) - 0.5).abs() < 1e-12);
        assert!((wrap_phase(-TAU - 0.5) + 0.5).abs() < 1e-12);
        // pi maps to the low end of the half-open interval
        assert!((wrap_phase(PI) + PI).abs() < 1e-12);
        for x in [-100.0, -3.2, 0.1, 7.9, 1234.5] {
            let w = wrap_phase(x);
            assert!((-PI..PI).contains(&w), "{} wrapped to {}", x, w);
        }
    }

    #[test]
    fn test_regroup_validation() {
        assert!(FrameDelta::new(refs(4), 0, 4).is_err());
        assert!(FrameDelta::new(refs(4), 16, 0).is_err());
        // 6 channels into 4 overlap positions does not divide
        assert!(matches!(
            FrameDelta::new(refs(6), 16, 4),
            Err(SpectralError::InconsistentTopology(_))
        ));
        // 2 channels cannot carry 4 positions
        assert!(FrameDelta::new(refs(2), 16, 4).is_err());
        let delta = FrameDelta::new(refs(8), 16, 4).unwrap();
        assert_eq!(delta.mains(), 2);
        assert_eq!(delta.output_channels(), 8);
    }

    /// Drive a node with the same per-sample value on every channel
    fn drive(node: &mut dyn SpectralNode, signal: &[f64], channels: usize) -> Vec<Vec<f64>> {
        let inputs: Vec<Vec<f64>> = (0..channels).map(|_| signal.to_vec()).collect();
        let mut outputs = vec![vec![0.0; signal.len()]; channels];
        node.process(&inputs, &mut outputs);
        outputs
    }

    #[test]
    fn test_delta_of_ramp_is_hop_difference() {
        // All 4 overlap streams of one voice carry the same ramp c*t. The
        // shared memory is refreshed every hopsize samples by whichever
        // stream gets there, so the difference settles at c * hopsize, not
        // c * framesize.
        let framesize = 16;
        let overlaps = 4;
        let c = 0.001;
        let mut delta = FrameDelta::new(refs(4), framesize, overlaps).unwrap();
        let signal: Vec<f64> = (0..64).map(|t| c * t as f64).collect();
        let outputs = drive(&mut delta, &signal, 4);

        let hop = framesize / overlaps;
        for ch in 0..4 {
            for t in 2 * framesize..64 {
                assert!(
                    (outputs[ch][t] - c * hop as f64).abs() < 1e-12,
                    "channel {} sample {}: {}",
                    ch,
                    t,
                    outputs[ch][t]
                );
            }
        }
    }

    #[test]
    fn test_accum_inverts_delta() {
        // delta telescopes, so accumulating it rebuilds the ramp exactly
        // (values stay inside [-pi, pi), so wrapping never engages)
        let framesize = 16;
        let overlaps = 4;
        let c = 0.001;
        let signal: Vec<f64> = (0..64).map(|t| c * t as f64).collect();

        let mut delta = FrameDelta::new(refs(4), framesize, overlaps).unwrap();
        let deltas = drive(&mut delta, &signal, 4);

        let mut accum = FrameAccum::new(refs(4), framesize, overlaps).unwrap();
        let mut rebuilt = vec![vec![0.0; 64]; 4];
        accum.process(&deltas, &mut rebuilt);

        for ch in 0..4 {
            for t in 0..64 {
                assert!(
                    (rebuilt[ch][t] - signal[t]).abs() < 1e-12,
                    "channel {} sample {}: {} vs {}",
                    ch,
                    t,
                    rebuilt[ch][t],
                    signal[t]
                );
            }
        }
    }

    #[test]
    fn test_delta_wraps_large_steps() {
        // A jump larger than pi comes out wrapped
        let framesize = 4;
        let mut delta = FrameDelta::new(refs(1), framesize, 1).unwrap();
        let mut signal = vec![0.0; 8];
        signal[4] = TAU - 0.25; // position 0 again: raw delta is TAU - 0.25
        let outputs = drive(&mut delta, &signal, 1);
        assert!((outputs[0][4] + 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_vectral_unity_is_pass_through() {
        let mut vectral = Vectral::new(refs(4), 16, 4, 1.0, 1.0, 1.0).unwrap();
        let signal: Vec<f64> = (0..32).map(|t| (t as f64 * 0.37).sin().abs()).collect();
        let outputs = drive(&mut vectral, &signal, 4);
        for ch in 0..4 {
            for t in 0..32 {
                assert!((outputs[ch][t] - signal[t]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_vectral_smooths_falling_magnitudes() {
        // Constant 1.0 then silence: with down < 1 the release is gradual
        let framesize = 8;
        let mut vectral = Vectral::new(refs(1), framesize, 1, 1.0, 0.5, 1.0).unwrap();
        let mut signal = vec![1.0; 16];
        signal[8..].fill(0.0);
        let outputs = drive(&mut vectral, &signal, 1);

        // Rise is instantaneous (up = 1)
        assert!((outputs[0][7] - 1.0).abs() < 1e-12);
        // First silent frame halves each bin, second halves again
        assert!((outputs[0][8] - 0.5).abs() < 1e-12);
        assert!(outputs[0][8] > 0.0);
    }

    #[test]
    fn test_vectral_damp_slows_high_bins() {
        // With damp < 1 the effective coefficient shrinks toward the top of
        // the frame, so high bins lag further behind a rising input.
        let framesize = 8;
        let mut vectral = Vectral::new(refs(1), framesize, 1, 0.5, 0.5, 0.0).unwrap();
        let signal = vec![1.0; 8];
        let outputs = drive(&mut vectral, &signal, 1);
        // One frame in: bin b reached 0.5 * (1 - b/framesize)
        for b in 1..8 {
            assert!(
                outputs[0][b] < outputs[0][b - 1],
                "bin {} should lag bin {}",
                b,
                b - 1
            );
        }
    }

    #[test]
    fn test_vectral_rejects_out_of_range_coefficients() {
        assert!(Vectral::new(refs(4), 16, 4, 1.5, 1.0, 1.0).is_err());
        assert!(Vectral::new(refs(4), 16, 4, 1.0, -0.1, 1.0).is_err());
        let mut vectral = Vectral::new(refs(4), 16, 4, 1.0, 1.0, 1.0).unwrap();
        assert!(vectral
            .update(Update::Damp(PolyParam::Scalar(2.0)))
            .is_err());
        assert!(vectral
            .update(Update::Down(PolyParam::List(vec![0.2, 0.8])))
            .is_ok());
    }

    #[test]
    fn test_frame_size_update_discards_state() {
        let mut delta = FrameDelta::new(refs(4), 16, 4).unwrap();
        let signal: Vec<f64> = (0..32).map(|t| 0.01 * t as f64).collect();
        drive(&mut delta, &signal, 4);
        delta.update(Update::FrameSize(32)).unwrap();
        assert_eq!(delta.frame_size(), 32);
        // Memory was cleared: first deltas are the raw inputs again
        let outputs = drive(&mut delta, &[0.25], 4);
        assert!((outputs[0][0] - 0.25).abs() < 1e-12);
        assert!(delta.update(Update::FrameSize(0)).is_err());
    }
}
