//! # Prism: Spectral Stream Processing Library
//!
//! `prism` is a Rust library for short-time spectral processing built around
//! a runtime-patchable node rack. Audio flows through analysis banks that
//! serialize overlapping transform frames into ordinary sample channels,
//! through converters and phase-vocoder nodes that reshape those channels,
//! and back out through synthesis banks that overlap-add the result.
//!
//! ## Architecture
//!
//! The library is organized in three layers:
//!
//! - **Streams** - Channel references, tagged views, and the type-erased
//!   [`SpectralNode`] interface every processor implements
//! - **Rack** - Node storage, dependency-ordered block scheduling, and the
//!   single mutation point for hot parameter updates
//! - **Banks** - Polyphonic analysis/synthesis transform banks, coordinate
//!   converters, and the frame-memory vocoder primitives
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use prism::prelude::*;
//!
//! // A rack processing 64-sample blocks at 44.1kHz
//! let mut rack = Rack::new(44100.0, 64);
//!
//! // Feed one channel of live audio in
//! let input = AudioInput::new(1);
//! let writer = input.writer(0);
//! let src = rack.add("src", input);
//!
//! // Analyze with 4 overlapping 1024-point frames
//! let fft = Fft::new(src.refs(), 1024, 4, WindowKind::Hanning).unwrap();
//! let fft = rack.add("fft", fft);
//! let real = rack.view(fft.id(), StreamTag::Real).unwrap();
//! let imag = rack.view(fft.id(), StreamTag::Imag).unwrap();
//!
//! // ...and resynthesize straight back
//! let ifft = Ifft::new(real.refs(), imag.refs(), 1024, 4, WindowKind::Hanning).unwrap();
//! let ifft = rack.add("ifft", ifft);
//!
//! // Process audio
//! writer.write(&[0.0; 64]);
//! rack.tick();
//! ```

pub mod analysis;
pub mod convert;
pub mod fader;
pub mod io;
pub mod kernel;
pub mod poly;
pub mod rack;
pub mod stream;
pub mod synthesis;
pub mod vocoder;
pub mod window;

/// Prelude module for convenient imports
pub mod prelude {
    // Streams
    pub use crate::stream::{
        ChannelRef, NodeId, SpectralError, SpectralNode, StreamTag, Update, View,
    };

    // Rack
    pub use crate::rack::{NodeHandle, Rack};

    // Polyphonic expansion
    pub use crate::poly::PolyParam;

    // Transform banks
    pub use crate::analysis::Fft;
    pub use crate::kernel::{KernelBuilder, RealFftBuilder, RealFftKernel, TransformKernel};
    pub use crate::synthesis::Ifft;
    pub use crate::window::WindowKind;

    // Converters and vocoder primitives
    pub use crate::convert::{CarToPol, PolToCar};
    pub use crate::vocoder::{wrap_phase, FrameAccum, FrameDelta, Vectral};

    // I/O and crossfading
    pub use crate::fader::InputFader;
    pub use crate::io::{AudioInput, AudioOutput, InputWriter, OutputReader};
}

// Re-export key types at crate root for convenience
pub use prelude::*;
