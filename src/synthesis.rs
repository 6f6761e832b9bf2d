//! Inverse Transform Bank
//!
//! [`Ifft`] consumes paired real/imaginary spectral streams (typically the
//! `real` and `imag` views of an [`Fft`](crate::analysis::Fft) bank, possibly
//! routed through converters or vocoder nodes) and resynthesizes audio. It
//! runs one unit per input channel pair; with `lmax` pairs and `overlaps`
//! overlap positions, `ratio = lmax / overlaps` voices are interleaved and
//! unit `i` carries voice `i % ratio` at overlap position `i / ratio`.
//!
//! Each unit outputs one channel. Summing the `overlaps` channels of a voice
//! completes the overlap-add. The synthesis window is normalized against the
//! bank's squared-window overlap profile, so a matched analysis/synthesis
//! pair reconstructs its input exactly (two frames late) for any window
//! shape, not just the classic constant-overlap ones.

use crate::fader::InputFader;
use crate::kernel::{KernelBuilder, RealFftBuilder, TransformKernel};
use crate::poly::{self, PolyParam};
use crate::stream::{
    check_transform_size, ChannelRef, SpectralError, SpectralNode, Update,
};
use crate::window::WindowKind;

/// One synthesis stream: a single spectral pair at a single overlap position
struct IfftUnit {
    size: usize,
    half: usize,
    hop: usize,
    window: Vec<f64>,
    /// Per-position gain correcting the bank's squared-window overlap sum
    norm: Vec<f64>,
    kernel: Box<dyn TransformKernel>,
    in_re: Vec<f64>,
    in_im: Vec<f64>,
    /// Time frame of the last complete spectrum, ready to stream
    out_frame: Vec<f64>,
    time: Vec<f64>,
    pos: isize,
}

impl IfftUnit {
    fn new(
        size: usize,
        hop: usize,
        overlaps: usize,
        wintype: WindowKind,
        builder: &dyn KernelBuilder,
    ) -> Self {
        let half = size / 2;
        let window = wintype.table(size);
        let norm = norm_table(&window, size, hop, overlaps);
        Self {
            size,
            half,
            hop,
            window,
            norm,
            kernel: builder.build(size),
            in_re: vec![0.0; half + 1],
            in_im: vec![0.0; half + 1],
            out_frame: vec![0.0; size],
            time: vec![0.0; size],
            pos: -(hop as isize),
        }
    }

    fn set_window(&mut self, wintype: WindowKind, overlaps: usize) {
        self.window = wintype.table(self.size);
        self.norm = norm_table(&self.window, self.size, self.hop, overlaps);
    }

    fn reset(&mut self) {
        self.in_re.fill(0.0);
        self.in_im.fill(0.0);
        self.out_frame.fill(0.0);
        self.pos = -(self.hop as isize);
    }

    /// Push one spectral sample pair, returning this instant's audio sample
    #[inline]
    fn tick_sample(&mut self, re: f64, im: f64) -> f64 {
        let out = if self.pos >= 0 {
            let p = self.pos as usize;
            if p <= self.half {
                self.in_re[p] = re;
            }
            if p < self.half {
                self.in_im[p] = im;
            }
            self.out_frame[p]
        } else {
            0.0
        };
        self.pos += 1;
        if self.pos >= self.size as isize {
            self.inverse();
            self.pos = 0;
        }
        out
    }

    fn inverse(&mut self) {
        self.kernel.inverse(&self.in_re, &self.in_im, &mut self.time);
        for ((dst, (x, w)), g) in self
            .out_frame
            .iter_mut()
            .zip(self.time.iter().zip(self.window.iter()))
            .zip(self.norm.iter())
        {
            *dst = x * w * g;
        }
    }
}

/// Per-position normalization so the summed overlap channels reconstruct
///
/// `profile[m]` is the squared-window overlap sum at absolute frame phase
/// `m`; a unit at offset `hop` hits phase `(n + hop) % size` when streaming
/// its frame position `n`.
fn norm_table(window: &[f64], size: usize, hop: usize, overlaps: usize) -> Vec<f64> {
    let mut profile = vec![0.0; size];
    for (m, p) in profile.iter_mut().enumerate() {
        for j in 0..overlaps {
            let h = size * j / overlaps;
            let w = window[(m + size - h) % size];
            *p += w * w;
        }
    }
    (0..size)
        .map(|n| {
            let g = profile[(n + hop) % size];
            if g < 1e-12 {
                0.0
            } else {
                1.0 / g
            }
        })
        .collect()
}

/// Polyphonic inverse short-time transform bank
pub struct Ifft {
    fader_re: InputFader,
    fader_im: InputFader,
    size: PolyParam<usize>,
    overlaps: usize,
    wintype: PolyParam<WindowKind>,
    lmax: usize,
    ratio: usize,
    units: Vec<IfftUnit>,
    builder: Box<dyn KernelBuilder>,
    refs: Vec<ChannelRef>,
}

impl Ifft {
    pub fn new(
        real: Vec<ChannelRef>,
        imag: Vec<ChannelRef>,
        size: impl Into<PolyParam<usize>>,
        overlaps: usize,
        wintype: impl Into<PolyParam<WindowKind>>,
    ) -> Result<Self, SpectralError> {
        Self::with_kernel(real, imag, size, overlaps, wintype, Box::new(RealFftBuilder))
    }

    pub fn with_kernel(
        real: Vec<ChannelRef>,
        imag: Vec<ChannelRef>,
        size: impl Into<PolyParam<usize>>,
        overlaps: usize,
        wintype: impl Into<PolyParam<WindowKind>>,
        builder: Box<dyn KernelBuilder>,
    ) -> Result<Self, SpectralError> {
        let size = size.into();
        let wintype = wintype.into();
        if overlaps == 0 {
            return Err(SpectralError::InvalidParameter(
                "overlaps must be at least 1".into(),
            ));
        }
        if real.len() != imag.len() {
            return Err(SpectralError::InconsistentTopology(format!(
                "real and imaginary inputs must pair up, got {} and {}",
                real.len(),
                imag.len()
            )));
        }
        size.validate()?;
        wintype.validate()?;
        for i in 0..size.len() {
            check_transform_size(size.wrap(i))?;
        }

        let fader_re = InputFader::new(real)?;
        let fader_im = InputFader::new(imag)?;
        let lmax = poly::lmax(&[fader_re.channels(), size.len(), wintype.len()]);
        let ratio = lmax / overlaps;
        if ratio == 0 {
            return Err(SpectralError::InvalidParameter(format!(
                "{} overlaps cannot be recovered from {} spectral channels",
                overlaps, lmax
            )));
        }

        let units = build_units(lmax, ratio, overlaps, &size, &wintype, builder.as_ref());
        let mut bank = Self {
            fader_re,
            fader_im,
            size,
            overlaps,
            wintype,
            lmax,
            ratio,
            units,
            builder,
            refs: Vec::new(),
        };
        bank.rebuild_refs();
        Ok(bank)
    }

    /// Number of interleaved voices (`lmax / overlaps`)
    pub fn ratio(&self) -> usize {
        self.ratio
    }

    pub fn overlaps(&self) -> usize {
        self.overlaps
    }

    pub fn size(&self) -> &PolyParam<usize> {
        &self.size
    }

    pub fn wintype(&self) -> &PolyParam<WindowKind> {
        &self.wintype
    }

    /// (voice, overlap position) recovered from a unit index
    pub fn unit_source(&self, i: usize) -> (usize, usize) {
        (i % self.ratio, i / self.ratio)
    }

    /// Output channels carrying one voice, suitable for summing
    pub fn voice_channels(&self, voice: usize) -> Vec<usize> {
        (0..self.units.len())
            .filter(|&i| i % self.ratio == voice % self.ratio)
            .collect()
    }

    fn rebuild_refs(&mut self) {
        self.refs.clear();
        self.refs.extend_from_slice(self.fader_re.refs());
        self.refs.extend_from_slice(self.fader_im.refs());
    }

    fn set_size(&mut self, size: PolyParam<usize>) -> Result<(), SpectralError> {
        size.validate()?;
        for i in 0..size.len() {
            check_transform_size(size.wrap(i))?;
        }
        self.units = build_units(
            self.lmax,
            self.ratio,
            self.overlaps,
            &size,
            &self.wintype,
            self.builder.as_ref(),
        );
        self.size = size;
        Ok(())
    }

    fn set_wintype(&mut self, wintype: PolyParam<WindowKind>) -> Result<(), SpectralError> {
        wintype.validate()?;
        for (i, unit) in self.units.iter_mut().enumerate() {
            unit.set_window(wintype.wrap(i % self.ratio), self.overlaps);
        }
        self.wintype = wintype;
        Ok(())
    }
}

fn build_units(
    lmax: usize,
    ratio: usize,
    overlaps: usize,
    size: &PolyParam<usize>,
    wintype: &PolyParam<WindowKind>,
    builder: &dyn KernelBuilder,
) -> Vec<IfftUnit> {
    (0..lmax)
        .map(|i| {
            let sz = size.wrap(i % ratio);
            let j = (i / ratio) % overlaps;
            IfftUnit::new(sz, sz * j / overlaps, overlaps, wintype.wrap(i % ratio), builder)
        })
        .collect()
}

impl SpectralNode for Ifft {
    fn output_channels(&self) -> usize {
        self.units.len()
    }

    fn input_refs(&self) -> &[ChannelRef] {
        &self.refs
    }

    fn process(&mut self, inputs: &[Vec<f64>], outputs: &mut [Vec<f64>]) {
        let frames = outputs.first().map(|b| b.len()).unwrap_or(0);
        let split = self.fader_re.ref_count().min(inputs.len());
        let (re_in, im_in) = inputs.split_at(split);
        for (i, unit) in self.units.iter_mut().enumerate() {
            for s in 0..frames {
                let re = self.fader_re.sample(re_in, i, s);
                let im = self.fader_im.sample(im_in, i, s);
                outputs[i][s] = unit.tick_sample(re, im);
            }
        }
        self.fader_re.advance(frames);
        self.fader_im.advance(frames);
        if self.refs.len() != self.fader_re.ref_count() + self.fader_im.ref_count() {
            self.rebuild_refs();
        }
    }

    fn reset(&mut self) {
        for unit in &mut self.units {
            unit.reset();
        }
        self.fader_re.settle();
        self.fader_im.settle();
        self.rebuild_refs();
    }

    fn configure(&mut self, sample_rate: f64, _block_size: usize) {
        self.fader_re.set_sample_rate(sample_rate);
        self.fader_im.set_sample_rate(sample_rate);
    }

    fn update(&mut self, update: Update) -> Result<(), SpectralError> {
        let result = match update {
            Update::Input { source, fade } => self.fader_re.set_input(source, fade),
            Update::PairedInput { source, fade } => self.fader_im.set_input(source, fade),
            Update::Size(size) => self.set_size(size),
            Update::WinType(wintype) => self.set_wintype(wintype),
            other => Err(SpectralError::UnsupportedUpdate(other.kind())),
        };
        if result.is_ok() {
            self.rebuild_refs();
        }
        result
    }

    fn type_id(&self) -> &'static str {
        "ifft"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Fft;
    use crate::io::AudioInput;
    use crate::rack::Rack;
    use crate::stream::{NodeId, StreamTag};
    use std::f64::consts::TAU;

    fn refs(n: usize) -> Vec<ChannelRef> {
        (0..n)
            .map(|channel| ChannelRef {
                node: NodeId::default(),
                channel,
            })
            .collect()
    }

    #[test]
    fn test_voice_recovery_from_interleave() {
        // 8 spectral pairs at 4 overlaps: 2 voices
        let ifft = Ifft::new(refs(8), refs(8), 64usize, 4, WindowKind::Hanning).unwrap();
        assert_eq!(ifft.ratio(), 2);
        assert_eq!(ifft.unit_source(0), (0, 0));
        assert_eq!(ifft.unit_source(1), (1, 0));
        assert_eq!(ifft.unit_source(5), (1, 2));
        assert_eq!(ifft.voice_channels(0), vec![0, 2, 4, 6]);
        assert_eq!(ifft.voice_channels(1), vec![1, 3, 5, 7]);
    }

    #[test]
    fn test_rejects_mismatched_pairs_and_starved_overlaps() {
        assert!(matches!(
            Ifft::new(refs(4), refs(3), 64usize, 4, WindowKind::Hanning),
            Err(SpectralError::InconsistentTopology(_))
        ));
        // 2 channels cannot carry 4 overlap positions
        assert!(Ifft::new(refs(2), refs(2), 64usize, 4, WindowKind::Hanning).is_err());
    }

    #[test]
    fn test_norm_profile_sums_to_unity() {
        let size = 64;
        let overlaps = 4;
        let window = WindowKind::Hanning.table(size);
        // At every absolute phase, the squared windows scaled by their norm
        // tables must add back to exactly one.
        let tables: Vec<Vec<f64>> = (0..overlaps)
            .map(|j| norm_table(&window, size, size * j / overlaps, overlaps))
            .collect();
        for t in 0..size {
            let mut sum = 0.0;
            for (j, norm) in tables.iter().enumerate() {
                let h = size * j / overlaps;
                let n = (t + size - h) % size;
                sum += window[n] * window[n] * norm[n];
            }
            assert!((sum - 1.0).abs() < 1e-12, "phase {} sums to {}", t, sum);
        }
    }

    fn reconstruction_case(wintype: WindowKind, overlaps: usize) {
        let size = 64;
        let block = 64;
        let ticks = 10;
        let total = block * ticks;

        let mut rack = Rack::new(44100.0, block);
        let mut input = AudioInput::new(1);
        let writer = input.writer(0);
        let src = rack.add("src", input);

        let fft = Fft::new(src.refs(), size, overlaps, wintype).unwrap();
        let fft = rack.add("fft", fft);
        let real = rack.view(fft.id(), StreamTag::Real).unwrap();
        let imag = rack.view(fft.id(), StreamTag::Imag).unwrap();

        let ifft = Ifft::new(real.refs(), imag.refs(), size, overlaps, wintype).unwrap();
        let ifft = rack.add("ifft", ifft);
        assert_eq!(ifft.channels(), overlaps);

        let signal: Vec<f64> = (0..total)
            .map(|t| {
                let t = t as f64;
                (TAU * t / 50.0).sin() + 0.5 * (TAU * t / 13.0).sin()
            })
            .collect();

        let mut out = vec![0.0; total];
        let mut chan = vec![0.0; block];
        for k in 0..ticks {
            writer.write(&signal[k * block..(k + 1) * block]);
            rack.tick();
            for ch in 0..overlaps {
                rack.read_channel(ifft.channel(ch), &mut chan);
                for s in 0..block {
                    out[k * block + s] += chan[s];
                }
            }
        }

        // Two frames of latency; skip one extra frame of bank warm-up
        let delay = 2 * size;
        for t in 3 * size..total {
            assert!(
                (out[t] - signal[t - delay]).abs() < 1e-7,
                "{:?}/{}: sample {} reconstructed {} expected {}",
                wintype,
                overlaps,
                t,
                out[t],
                signal[t - delay]
            );
        }
    }

    #[test]
    fn test_reconstruction_rectangular_single_overlap() {
        reconstruction_case(WindowKind::Rectangular, 1);
    }

    #[test]
    fn test_reconstruction_rectangular_two_overlaps() {
        reconstruction_case(WindowKind::Rectangular, 2);
    }

    #[test]
    fn test_reconstruction_rectangular_four_overlaps() {
        reconstruction_case(WindowKind::Rectangular, 4);
    }

    #[test]
    fn test_reconstruction_hanning_two_overlaps() {
        reconstruction_case(WindowKind::Hanning, 2);
    }

    #[test]
    fn test_reconstruction_hanning_four_overlaps() {
        reconstruction_case(WindowKind::Hanning, 4);
    }

    #[test]
    fn test_reconstruction_blackman_three_overlaps() {
        // Not a constant-overlap-add pairing; the normalization absorbs it
        reconstruction_case(WindowKind::Blackman3, 3);
    }
}
