//! Forward Transform Bank
//!
//! [`Fft`] slices its inputs into overlapping frames and streams the spectra
//! back out as ordinary sample channels. The bank expands polyphonically:
//! with `lmax` logical inputs and `overlaps` overlap positions it runs
//! `overlaps * lmax` independent units, laid out overlap-major — unit
//! `j * lmax + i` analyses input channel `i` at overlap position `j`.
//!
//! Each unit re-transforms every `size` samples; time resolution comes from
//! the stagger between overlap positions, unit `j` being offset by
//! `size * j / overlaps` samples. A freshly captured frame is transformed
//! when its last sample lands and the spectrum streams out bin-by-bin while
//! the next frame fills, so the spectral streams trail the audio by exactly
//! one frame per stage.

use crate::fader::InputFader;
use crate::kernel::{KernelBuilder, RealFftBuilder, TransformKernel};
use crate::poly::{self, PolyParam};
use crate::stream::{
    check_transform_size, ChannelRef, SpectralError, SpectralNode, StreamTag, Update,
};
use crate::window::WindowKind;

/// One analysis stream: a single input channel at a single overlap position
pub(crate) struct FftUnit {
    size: usize,
    half: usize,
    hop: usize,
    window: Vec<f64>,
    kernel: Box<dyn TransformKernel>,
    /// Frame currently being captured
    in_frame: Vec<f64>,
    /// Windowed copy handed to the kernel
    scratch: Vec<f64>,
    /// Spectrum of the last complete frame, serialized for streaming
    real_frame: Vec<f64>,
    imag_frame: Vec<f64>,
    spec_re: Vec<f64>,
    spec_im: Vec<f64>,
    /// Frame cursor; negative during the initial stagger
    pos: isize,
}

impl FftUnit {
    pub(crate) fn new(
        size: usize,
        hop: usize,
        wintype: WindowKind,
        builder: &dyn KernelBuilder,
    ) -> Self {
        let half = size / 2;
        Self {
            size,
            half,
            hop,
            window: wintype.table(size),
            kernel: builder.build(size),
            in_frame: vec![0.0; size],
            scratch: vec![0.0; size],
            real_frame: vec![0.0; size],
            imag_frame: vec![0.0; size],
            spec_re: vec![0.0; half + 1],
            spec_im: vec![0.0; half + 1],
            pos: -(hop as isize),
        }
    }

    pub(crate) fn hop(&self) -> usize {
        self.hop
    }

    pub(crate) fn set_window(&mut self, wintype: WindowKind) {
        self.window = wintype.table(self.size);
    }

    pub(crate) fn reset(&mut self) {
        self.in_frame.fill(0.0);
        self.real_frame.fill(0.0);
        self.imag_frame.fill(0.0);
        self.pos = -(self.hop as isize);
    }

    /// Push one input sample, returning (real, imag, bin) for this instant
    #[inline]
    pub(crate) fn tick_sample(&mut self, x: f64) -> (f64, f64, f64) {
        let out = if self.pos >= 0 {
            let p = self.pos as usize;
            let out = (self.real_frame[p], self.imag_frame[p], p as f64);
            self.in_frame[p] = x;
            out
        } else {
            (0.0, 0.0, 0.0)
        };
        self.pos += 1;
        if self.pos >= self.size as isize {
            self.transform();
            self.pos = 0;
        }
        out
    }

    fn transform(&mut self) {
        for (dst, (x, w)) in self
            .scratch
            .iter_mut()
            .zip(self.in_frame.iter().zip(self.window.iter()))
        {
            *dst = x * w;
        }
        self.kernel
            .forward(&self.scratch, &mut self.spec_re, &mut self.spec_im);
        // Serialize: real occupies bins 0..=half, imaginary 0..half, the
        // remainder of each frame reads as zero.
        self.real_frame[..=self.half].copy_from_slice(&self.spec_re);
        self.real_frame[self.half + 1..].fill(0.0);
        self.imag_frame[..self.half].copy_from_slice(&self.spec_im[..self.half]);
        self.imag_frame[self.half..].fill(0.0);
    }
}

/// Polyphonic forward short-time transform bank
pub struct Fft {
    fader: InputFader,
    size: PolyParam<usize>,
    overlaps: usize,
    wintype: PolyParam<WindowKind>,
    lmax: usize,
    units: Vec<FftUnit>,
    builder: Box<dyn KernelBuilder>,
}

impl Fft {
    pub fn new(
        inputs: Vec<ChannelRef>,
        size: impl Into<PolyParam<usize>>,
        overlaps: usize,
        wintype: impl Into<PolyParam<WindowKind>>,
    ) -> Result<Self, SpectralError> {
        Self::with_kernel(inputs, size, overlaps, wintype, Box::new(RealFftBuilder))
    }

    /// Construct with a non-default transform backend
    pub fn with_kernel(
        inputs: Vec<ChannelRef>,
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
        size.validate()?;
        wintype.validate()?;
        for i in 0..size.len() {
            check_transform_size(size.wrap(i))?;
        }
        let fader = InputFader::new(inputs)?;

        let lmax = poly::lmax(&[fader.channels(), size.len(), wintype.len()]);
        let units = build_units(lmax, overlaps, &size, &wintype, builder.as_ref());
        Ok(Self {
            fader,
            size,
            overlaps,
            wintype,
            lmax,
            units,
            builder,
        })
    }

    /// Number of parallel analysis units (`overlaps * lmax`)
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    pub fn overlaps(&self) -> usize {
        self.overlaps
    }

    pub fn lmax(&self) -> usize {
        self.lmax
    }

    pub fn size(&self) -> &PolyParam<usize> {
        &self.size
    }

    pub fn wintype(&self) -> &PolyParam<WindowKind> {
        &self.wintype
    }

    /// Stagger offset of unit `u` in samples
    pub fn hop_offset(&self, u: usize) -> usize {
        self.units[u].hop()
    }

    fn set_size(&mut self, size: PolyParam<usize>) -> Result<(), SpectralError> {
        size.validate()?;
        for i in 0..size.len() {
            check_transform_size(size.wrap(i))?;
        }
        self.units = build_units(
            self.lmax,
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
        for (u, unit) in self.units.iter_mut().enumerate() {
            unit.set_window(wintype.wrap(u % self.lmax));
        }
        self.wintype = wintype;
        Ok(())
    }
}

fn build_units(
    lmax: usize,
    overlaps: usize,
    size: &PolyParam<usize>,
    wintype: &PolyParam<WindowKind>,
    builder: &dyn KernelBuilder,
) -> Vec<FftUnit> {
    let mut units = Vec::with_capacity(overlaps * lmax);
    for j in 0..overlaps {
        for i in 0..lmax {
            let sz = size.wrap(i);
            units.push(FftUnit::new(sz, sz * j / overlaps, wintype.wrap(i), builder));
        }
    }
    units
}

impl SpectralNode for Fft {
    fn output_channels(&self) -> usize {
        3 * self.units.len()
    }

    fn input_refs(&self) -> &[ChannelRef] {
        self.fader.refs()
    }

    fn process(&mut self, inputs: &[Vec<f64>], outputs: &mut [Vec<f64>]) {
        let n = self.units.len();
        let frames = outputs.first().map(|b| b.len()).unwrap_or(0);
        for (u, unit) in self.units.iter_mut().enumerate() {
            let i = u % self.lmax;
            for s in 0..frames {
                let x = self.fader.sample(inputs, i, s);
                let (re, im, bin) = unit.tick_sample(x);
                outputs[u][s] = re;
                outputs[n + u][s] = im;
                outputs[2 * n + u][s] = bin;
            }
        }
        self.fader.advance(frames);
    }

    fn reset(&mut self) {
        for unit in &mut self.units {
            unit.reset();
        }
        self.fader.settle();
    }

    fn configure(&mut self, sample_rate: f64, _block_size: usize) {
        self.fader.set_sample_rate(sample_rate);
    }

    fn update(&mut self, update: Update) -> Result<(), SpectralError> {
        match update {
            Update::Input { source, fade } => self.fader.set_input(source, fade),
            Update::Size(size) => self.set_size(size),
            Update::WinType(wintype) => self.set_wintype(wintype),
            other => Err(SpectralError::UnsupportedUpdate(other.kind())),
        }
    }

    fn view_channels(&self, tag: StreamTag) -> Option<Vec<usize>> {
        let n = self.units.len();
        match tag {
            StreamTag::Real => Some((0..n).collect()),
            StreamTag::Imag => Some((n..2 * n).collect()),
            StreamTag::Bin => Some((2 * n..3 * n).collect()),
            _ => None,
        }
    }

    fn type_id(&self) -> &'static str {
        "fft"
    }
}
