//! Signal Conventions and Stream System
//!
//! This module defines the channel references, stream tags, views, and the
//! type-erased node interface that the rack schedules. A [`ChannelRef`] names
//! one sample-stream endpoint: it is produced by exactly one node and only
//! ever *referenced* by consumers, never owned. Reading a channel whose
//! producer has been stopped or removed yields silence, so downstream nodes
//! and outstanding views go quiet instead of dangling.

use crate::poly::PolyParam;
use crate::window::WindowKind;
use serde::{Deserialize, Serialize};
use slotmap::DefaultKey;

/// Unique identifier for a node in the rack
pub type NodeId = DefaultKey;

/// Reference to one output channel of one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelRef {
    pub node: NodeId,
    pub channel: usize,
}

/// Tag selecting one of the parallel stream families a node exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamTag {
    /// Real spectrum part (analysis banks, polar-to-rectangular converters)
    Real,
    /// Imaginary spectrum part
    Imag,
    /// Monotonically increasing bin-index stream
    Bin,
    /// Magnitude part (rectangular-to-polar converters)
    Mag,
    /// Angle (phase) part
    Ang,
}

impl StreamTag {
    /// String identifier, matching the dynamic accessor names of the
    /// control surface ("real", "imag", "bin", "mag", "ang")
    pub fn name(&self) -> &'static str {
        match self {
            StreamTag::Real => "real",
            StreamTag::Imag => "imag",
            StreamTag::Bin => "bin",
            StreamTag::Mag => "mag",
            StreamTag::Ang => "ang",
        }
    }

    /// Parse a dynamic identifier into a tag
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "real" => Some(StreamTag::Real),
            "imag" => Some(StreamTag::Imag),
            "bin" => Some(StreamTag::Bin),
            "mag" => Some(StreamTag::Mag),
            "ang" => Some(StreamTag::Ang),
            _ => None,
        }
    }
}

/// Read-only ordered selection of a producer's output channels
///
/// A view holds no sample data, only channel indices into its producer.
/// Views are built on demand and never retained by the producer; if the
/// producer is removed, reads through the view return silence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct View {
    pub node: NodeId,
    pub tag: StreamTag,
    pub channels: Vec<usize>,
}

impl View {
    /// Number of channels selected by this view
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Channel references in view order, suitable as construction inputs
    pub fn refs(&self) -> Vec<ChannelRef> {
        self.channels
            .iter()
            .map(|&channel| ChannelRef {
                node: self.node,
                channel,
            })
            .collect()
    }

    /// Reference to the i-th selected channel
    pub fn channel(&self, i: usize) -> Option<ChannelRef> {
        self.channels.get(i).map(|&channel| ChannelRef {
            node: self.node,
            channel,
        })
    }
}

/// Hot parameter replacement, applied between ticks on the control path
///
/// Each node accepts the subset of updates that matches its configuration
/// surface and rejects the rest with [`SpectralError::UnsupportedUpdate`].
/// A rejected update leaves the previous valid state in effect.
#[derive(Debug, Clone)]
pub enum Update {
    /// Replace the primary input, crossfading over `fade` seconds
    Input {
        source: Vec<ChannelRef>,
        fade: f64,
    },
    /// Replace the paired input (imaginary/angle side of two-input nodes)
    PairedInput {
        source: Vec<ChannelRef>,
        fade: f64,
    },
    /// Replace the transform size of an analysis/synthesis bank
    Size(PolyParam<usize>),
    /// Replace the frame size of a phase-vocoder node (state is discarded)
    FrameSize(usize),
    /// Replace the window shape
    WinType(PolyParam<WindowKind>),
    /// Rising-magnitude filter coefficient (Vectral)
    Up(PolyParam<f64>),
    /// Falling-magnitude filter coefficient (Vectral)
    Down(PolyParam<f64>),
    /// High-frequency damping factor (Vectral)
    Damp(PolyParam<f64>),
}

impl Update {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Update::Input { .. } => "input",
            Update::PairedInput { .. } => "paired_input",
            Update::Size(_) => "size",
            Update::FrameSize(_) => "framesize",
            Update::WinType(_) => "wintype",
            Update::Up(_) => "up",
            Update::Down(_) => "down",
            Update::Damp(_) => "damp",
        }
    }
}

/// Error types for construction and hot-update validation
#[derive(Debug, Clone)]
pub enum SpectralError {
    /// A construction or update parameter is out of its valid range
    InvalidParameter(String),
    /// Paired inputs or declared overlap counts disagree with the actual
    /// channel layout
    InconsistentTopology(String),
    /// The referenced node does not exist
    InvalidNode,
    /// An input replacement would make a node depend on itself
    CycleDetected,
    /// The node does not recognize this update kind
    UnsupportedUpdate(&'static str),
}

impl std::fmt::Display for SpectralError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpectralError::InvalidParameter(msg) => write!(f, "invalid parameter: {}", msg),
            SpectralError::InconsistentTopology(msg) => {
                write!(f, "inconsistent topology: {}", msg)
            }
            SpectralError::InvalidNode => write!(f, "invalid node"),
            SpectralError::CycleDetected => write!(f, "cycle detected"),
            SpectralError::UnsupportedUpdate(kind) => {
                write!(f, "node does not support '{}' updates", kind)
            }
        }
    }
}

impl std::error::Error for SpectralError {}

/// Validate a transform size: must be a power of two greater than 4
pub(crate) fn check_transform_size(size: usize) -> Result<(), SpectralError> {
    if size > 4 && size.is_power_of_two() {
        Ok(())
    } else {
        Err(SpectralError::InvalidParameter(format!(
            "transform size must be a power of two greater than 4, got {}",
            size
        )))
    }
}

/// Validate a filter coefficient: must lie in [0, 1]
pub(crate) fn check_coefficient(name: &str, value: f64) -> Result<(), SpectralError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(SpectralError::InvalidParameter(format!(
            "{} must be between 0 and 1, got {}",
            name, value
        )))
    }
}

/// Read one sample out of a gathered input block, silent on any miss
#[inline]
pub(crate) fn tap(inputs: &[Vec<f64>], index: usize, sample: usize) -> f64 {
    inputs
        .get(index)
        .and_then(|block| block.get(sample))
        .copied()
        .unwrap_or(0.0)
}

/// Type-erased processing node scheduled by the rack
///
/// Nodes pull their inputs by declaring [`ChannelRef`]s; the rack gathers the
/// referenced blocks (silence for missing producers) and calls [`process`]
/// exactly once per audio block. Implementations must not block or allocate
/// in `process` beyond initial warm-up.
///
/// [`process`]: SpectralNode::process
pub trait SpectralNode: Send {
    /// Number of output channels; fixed for the lifetime of the node
    fn output_channels(&self) -> usize;

    /// Channels this node currently reads, in gather order
    fn input_refs(&self) -> &[ChannelRef];

    /// Process one block; `inputs` holds one gathered block per declared
    /// ref, `outputs` one block per output channel
    fn process(&mut self, inputs: &[Vec<f64>], outputs: &mut [Vec<f64>]);

    /// Clear internal state (frame buffers, phase memory, ramps)
    fn reset(&mut self);

    /// Called once when the node is added to a rack
    fn configure(&mut self, _sample_rate: f64, _block_size: usize) {}

    /// Apply a validated hot update; default rejects everything
    fn update(&mut self, update: Update) -> Result<(), SpectralError> {
        Err(SpectralError::UnsupportedUpdate(update.kind()))
    }

    /// Output channel indices belonging to a tagged stream family
    fn view_channels(&self, _tag: StreamTag) -> Option<Vec<usize>> {
        None
    }

    /// Node type identifier for diagnostics
    fn type_id(&self) -> &'static str {
        "unknown"
    }
}
