//! Coordinate Conversion
//!
//! Stateless per-sample converters between the rectangular spectra the
//! transform banks speak and the polar form the phase-vocoder nodes want.
//! Both nodes pair two input sets channel-for-channel and interleave their
//! two result families on the output side (even channels first family, odd
//! channels second), with tagged views to pull either family apart.

use crate::fader::InputFader;
use crate::stream::{ChannelRef, SpectralError, SpectralNode, StreamTag, Update};
use libm::Libm;

/// Rectangular to polar: (real, imag) pairs in, (mag, ang) pairs out
pub struct CarToPol {
    fader_re: InputFader,
    fader_im: InputFader,
    lmax: usize,
    refs: Vec<ChannelRef>,
}

impl CarToPol {
    pub fn new(real: Vec<ChannelRef>, imag: Vec<ChannelRef>) -> Result<Self, SpectralError> {
        let (fader_re, fader_im) = paired_faders(real, imag)?;
        let lmax = fader_re.channels();
        let mut node = Self {
            fader_re,
            fader_im,
            lmax,
            refs: Vec::new(),
        };
        node.rebuild_refs();
        Ok(node)
    }

    pub fn lmax(&self) -> usize {
        self.lmax
    }

    fn rebuild_refs(&mut self) {
        self.refs.clear();
        self.refs.extend_from_slice(self.fader_re.refs());
        self.refs.extend_from_slice(self.fader_im.refs());
    }
}

fn paired_faders(
    first: Vec<ChannelRef>,
    second: Vec<ChannelRef>,
) -> Result<(InputFader, InputFader), SpectralError> {
    if first.len() != second.len() {
        return Err(SpectralError::InconsistentTopology(format!(
            "paired inputs must match channel-for-channel, got {} and {}",
            first.len(),
            second.len()
        )));
    }
    Ok((InputFader::new(first)?, InputFader::new(second)?))
}

impl SpectralNode for CarToPol {
    fn output_channels(&self) -> usize {
        2 * self.lmax
    }

    fn input_refs(&self) -> &[ChannelRef] {
        &self.refs
    }

    fn process(&mut self, inputs: &[Vec<f64>], outputs: &mut [Vec<f64>]) {
        let frames = outputs.first().map(|b| b.len()).unwrap_or(0);
        let split = self.fader_re.ref_count().min(inputs.len());
        let (re_in, im_in) = inputs.split_at(split);
        for i in 0..self.lmax {
            for s in 0..frames {
                let re = self.fader_re.sample(re_in, i, s);
                let im = self.fader_im.sample(im_in, i, s);
                outputs[2 * i][s] = Libm::<f64>::sqrt(re * re + im * im);
                outputs[2 * i + 1][s] = Libm::<f64>::atan2(im, re);
            }
        }
        self.fader_re.advance(frames);
        self.fader_im.advance(frames);
        if self.refs.len() != self.fader_re.ref_count() + self.fader_im.ref_count() {
            self.rebuild_refs();
        }
    }

    fn reset(&mut self) {
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
            other => Err(SpectralError::UnsupportedUpdate(other.kind())),
        };
        if result.is_ok() {
            self.rebuild_refs();
        }
        result
    }

    fn view_channels(&self, tag: StreamTag) -> Option<Vec<usize>> {
        match tag {
            StreamTag::Mag => Some((0..self.lmax).map(|i| 2 * i).collect()),
            StreamTag::Ang => Some((0..self.lmax).map(|i| 2 * i + 1).collect()),
            _ => None,
        }
    }

    fn type_id(&self) -> &'static str {
        "car_to_pol"
    }
}

/// Polar to rectangular: (mag, ang) pairs in, (real, imag) pairs out
pub struct PolToCar {
    fader_mag: InputFader,
    fader_ang: InputFader,
    lmax: usize,
    refs: Vec<ChannelRef>,
}

impl PolToCar {
    pub fn new(mag: Vec<ChannelRef>, ang: Vec<ChannelRef>) -> Result<Self, SpectralError> {
        let (fader_mag, fader_ang) = paired_faders(mag, ang)?;
        let lmax = fader_mag.channels();
        let mut node = Self {
            fader_mag,
            fader_ang,
            lmax,
            refs: Vec::new(),
        };
        node.rebuild_refs();
        Ok(node)
    }

    pub fn lmax(&self) -> usize {
        self.lmax
    }

    fn rebuild_refs(&mut self) {
        self.refs.clear();
        self.refs.extend_from_slice(self.fader_mag.refs());
        self.refs.extend_from_slice(self.fader_ang.refs());
    }
}

impl SpectralNode for PolToCar {
    fn output_channels(&self) -> usize {
        2 * self.lmax
    }

    fn input_refs(&self) -> &[ChannelRef] {
        &self.refs
    }

    fn process(&mut self, inputs: &[Vec<f64>], outputs: &mut [Vec<f64>]) {
        let frames = outputs.first().map(|b| b.len()).unwrap_or(0);
        let split = self.fader_mag.ref_count().min(inputs.len());
        let (mag_in, ang_in) = inputs.split_at(split);
        for i in 0..self.lmax {
            for s in 0..frames {
                let mag = self.fader_mag.sample(mag_in, i, s);
                let ang = self.fader_ang.sample(ang_in, i, s);
                outputs[2 * i][s] = mag * Libm::<f64>::cos(ang);
                outputs[2 * i + 1][s] = mag * Libm::<f64>::sin(ang);
            }
        }
        self.fader_mag.advance(frames);
        self.fader_ang.advance(frames);
        if self.refs.len() != self.fader_mag.ref_count() + self.fader_ang.ref_count() {
            self.rebuild_refs();
        }
    }

    fn reset(&mut self) {
        self.fader_mag.settle();
        self.fader_ang.settle();
        self.rebuild_refs();
    }

    fn configure(&mut self, sample_rate: f64, _block_size: usize) {
        self.fader_mag.set_sample_rate(sample_rate);
        self.fader_ang.set_sample_rate(sample_rate);
    }

    fn update(&mut self, update: Update) -> Result<(), SpectralError> {
        let result = match update {
            Update::Input { source, fade } => self.fader_mag.set_input(source, fade),
            Update::PairedInput { source, fade } => self.fader_ang.set_input(source, fade),
            other => Err(SpectralError::UnsupportedUpdate(other.kind())),
        };
        if result.is_ok() {
            self.rebuild_refs();
        }
        result
    }

    fn view_channels(&self, tag: StreamTag) -> Option<Vec<usize>> {
        match tag {
            StreamTag::Real => Some((0..self.lmax).map(|i| 2 * i).collect()),
            StreamTag::Imag => Some((0..self.lmax).map(|i| 2 * i + 1).collect()),
            _ => None,
        }
    }

    fn type_id(&self) -> &'static str {
        "pol_to_car"
    }
}
