//! External Audio I/O
//!
//! Bridges between the rack and the outside world. [`AudioInput`] is a node
//! whose channels are fed from lock-guarded sample queues; the matching
//! [`InputWriter`] handles live on another thread (a soundcard callback, a
//! file reader, a test harness) and pushes blocks in whenever convenient.
//! [`AudioOutput`] does the reverse, accumulating a node's output for
//! external consumption.
//!
//! The queues are plain `Mutex<VecDeque<f64>>`; writers are expected to stay
//! ahead of the rack, and an underrun produces silence rather than an error.

use crate::stream::{tap, ChannelRef, SpectralNode};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

type SampleQueue = Arc<Mutex<VecDeque<f64>>>;

/// Writer half of an [`AudioInput`] channel
///
/// Clone-cheap handle that pushes samples into the queue an input channel
/// drains from. Safe to use from any thread.
#[derive(Clone)]
pub struct InputWriter(SampleQueue);

impl InputWriter {
    /// Append a block of samples to the channel's queue
    pub fn write(&self, block: &[f64]) {
        if let Ok(mut queue) = self.0.lock() {
            queue.extend(block.iter().copied());
        }
    }

    /// Samples currently buffered and not yet consumed
    pub fn pending(&self) -> usize {
        self.0.lock().map(|q| q.len()).unwrap_or(0)
    }
}

/// Multichannel audio source fed from external sample queues
///
/// Each tick drains up to one block per channel from its queue; a queue that
/// runs dry pads the remainder of the block with zeros.
pub struct AudioInput {
    feeds: Vec<SampleQueue>,
}

impl AudioInput {
    pub fn new(channels: usize) -> Self {
        Self {
            feeds: (0..channels.max(1))
                .map(|_| Arc::new(Mutex::new(VecDeque::new())))
                .collect(),
        }
    }

    /// Writer handle for channel `ch`
    pub fn writer(&self, ch: usize) -> InputWriter {
        InputWriter(Arc::clone(&self.feeds[ch % self.feeds.len()]))
    }
}

impl SpectralNode for AudioInput {
    fn output_channels(&self) -> usize {
        self.feeds.len()
    }

    fn input_refs(&self) -> &[ChannelRef] {
        &[]
    }

    fn process(&mut self, _inputs: &[Vec<f64>], outputs: &mut [Vec<f64>]) {
        for (feed, out) in self.feeds.iter().zip(outputs.iter_mut()) {
            if let Ok(mut queue) = feed.lock() {
                for sample in out.iter_mut() {
                    *sample = queue.pop_front().unwrap_or(0.0);
                }
            } else {
                out.fill(0.0);
            }
        }
    }

    fn reset(&mut self) {
        for feed in &self.feeds {
            if let Ok(mut queue) = feed.lock() {
                queue.clear();
            }
        }
    }

    fn type_id(&self) -> &'static str {
        "audio_input"
    }
}

/// Reader half of an [`AudioOutput`] channel
#[derive(Clone)]
pub struct OutputReader(SampleQueue);

impl OutputReader {
    /// Drain up to `block.len()` samples into `block`, returning the count
    pub fn read(&self, block: &mut [f64]) -> usize {
        if let Ok(mut queue) = self.0.lock() {
            let n = block.len().min(queue.len());
            for sample in block.iter_mut().take(n) {
                *sample = queue.pop_front().unwrap_or(0.0);
            }
            block[n..].fill(0.0);
            n
        } else {
            block.fill(0.0);
            0
        }
    }

    pub fn pending(&self) -> usize {
        self.0.lock().map(|q| q.len()).unwrap_or(0)
    }
}

/// Sink node that queues its input channels for external reading
///
/// Mirrors its input width on the output side so downstream nodes can still
/// tap the signal.
pub struct AudioOutput {
    refs: Vec<ChannelRef>,
    sinks: Vec<SampleQueue>,
}

impl AudioOutput {
    pub fn new(source: Vec<ChannelRef>) -> Self {
        let sinks = (0..source.len().max(1))
            .map(|_| Arc::new(Mutex::new(VecDeque::new())))
            .collect();
        Self {
            refs: source,
            sinks,
        }
    }

    /// Reader handle for channel `ch`
    pub fn reader(&self, ch: usize) -> OutputReader {
        OutputReader(Arc::clone(&self.sinks[ch % self.sinks.len()]))
    }
}

impl SpectralNode for AudioOutput {
    fn output_channels(&self) -> usize {
        self.sinks.len()
    }

    fn input_refs(&self) -> &[ChannelRef] {
        &self.refs
    }

    fn process(&mut self, inputs: &[Vec<f64>], outputs: &mut [Vec<f64>]) {
        let frames = outputs.first().map(|b| b.len()).unwrap_or(0);
        for ch in 0..self.sinks.len() {
            // One lock per channel per block
            let mut queue = self.sinks[ch].lock().ok();
            for s in 0..frames {
                let x = tap(inputs, ch, s);
                outputs[ch][s] = x;
                if let Some(queue) = queue.as_mut() {
                    queue.push_back(x);
                }
            }
        }
    }

    fn reset(&mut self) {
        for sink in &self.sinks {
            if let Ok(mut queue) = sink.lock() {
                queue.clear();
            }
        }
    }

    fn type_id(&self) -> &'static str {
        "audio_output"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::NodeId;

    #[test]
    fn test_input_drains_queue_and_pads_with_silence() {
        let mut input = AudioInput::new(1);
        let writer = input.writer(0);
        writer.write(&[1.0, 2.0]);
        assert_eq!(writer.pending(), 2);

        let mut outputs = vec![vec![9.0; 4]];
        input.process(&[], &mut outputs);
        assert_eq!(outputs[0], vec![1.0, 2.0, 0.0, 0.0]);
        assert_eq!(writer.pending(), 0);
    }

    #[test]
    fn test_input_writer_from_another_thread() {
        let mut input = AudioInput::new(1);
        let writer = input.writer(0);

        std::thread::spawn(move || {
            writer.write(&[3.0; 8]);
        })
        .join()
        .unwrap();

        let mut outputs = vec![vec![0.0; 8]];
        input.process(&[], &mut outputs);
        assert_eq!(outputs[0], vec![3.0; 8]);
    }

    #[test]
    fn test_input_reset_clears_queue() {
        let mut input = AudioInput::new(2);
        input.writer(0).write(&[1.0; 16]);
        input.reset();

        let mut outputs = vec![vec![1.0; 4], vec![1.0; 4]];
        input.process(&[], &mut outputs);
        assert_eq!(outputs[0], vec![0.0; 4]);
    }

    #[test]
    fn test_output_queues_and_passes_through() {
        let refs = vec![ChannelRef {
            node: NodeId::default(),
            channel: 0,
        }];
        let mut output = AudioOutput::new(refs);
        let reader = output.reader(0);

        let inputs = vec![vec![0.5, -0.5, 1.0, 0.0]];
        let mut outputs = vec![vec![0.0; 4]];
        output.process(&inputs, &mut outputs);

        assert_eq!(outputs[0], vec![0.5, -0.5, 1.0, 0.0]);
        let mut drained = vec![0.0; 4];
        assert_eq!(reader.read(&mut drained), 4);
        assert_eq!(drained, vec![0.5, -0.5, 1.0, 0.0]);
        assert_eq!(reader.pending(), 0);
    }

    #[test]
    fn test_output_reader_underrun_pads_silence() {
        let mut output = AudioOutput::new(vec![ChannelRef {
            node: NodeId::default(),
            channel: 0,
        }]);
        let reader = output.reader(0);

        let inputs = vec![vec![1.0, 1.0]];
        let mut outputs = vec![vec![0.0; 2]];
        output.process(&inputs, &mut outputs);

        let mut drained = vec![9.0; 4];
        assert_eq!(reader.read(&mut drained), 2);
        assert_eq!(drained, vec![1.0, 1.0, 0.0, 0.0]);
    }
}
