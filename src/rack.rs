//! Rack Scheduling and Control
//!
//! The [`Rack`] owns every node, schedules them in dependency order, and is
//! the single mutation point for the whole processing graph. All control
//! operations (adding nodes, hot updates, start/stop) go through `&mut Rack`,
//! so they land exactly on block boundaries: a tick always sees a fully
//! applied configuration, never a half-applied one.
//!
//! Scheduling uses Kahn's algorithm over the refs each node declares. Edges
//! into missing producers are simply dropped, which is what makes removed or
//! stopped nodes read as silence downstream.

use crate::stream::{ChannelRef, NodeId, SpectralError, SpectralNode, StreamTag, Update, View};
use slotmap::{SecondaryMap, SlotMap};
use tracing::{debug, warn};

struct NodeSlot {
    module: Box<dyn SpectralNode>,
    name: String,
    /// Gathered input blocks, one per declared ref
    scratch: Vec<Vec<f64>>,
    active: bool,
}

/// Typed handle returned by [`Rack::add`], carrying the channel count so
/// callers can build refs without consulting the rack again
#[derive(Debug, Clone, Copy)]
pub struct NodeHandle {
    id: NodeId,
    channels: usize,
}

impl NodeHandle {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Refs to every output channel, in channel order
    pub fn refs(&self) -> Vec<ChannelRef> {
        (0..self.channels)
            .map(|channel| ChannelRef {
                node: self.id,
                channel,
            })
            .collect()
    }

    /// Ref to one output channel
    pub fn channel(&self, channel: usize) -> ChannelRef {
        ChannelRef {
            node: self.id,
            channel,
        }
    }
}

/// Node container and block scheduler
pub struct Rack {
    nodes: SlotMap<NodeId, NodeSlot>,
    /// Last produced block per node, kept out of `nodes` so gathers can
    /// borrow buffers while a node is mutably borrowed
    buffers: SecondaryMap<NodeId, Vec<Vec<f64>>>,
    order: Vec<NodeId>,
    dirty: bool,
    sample_rate: f64,
    block_size: usize,
}

impl Rack {
    pub fn new(sample_rate: f64, block_size: usize) -> Self {
        Self {
            nodes: SlotMap::with_key(),
            buffers: SecondaryMap::new(),
            order: Vec::new(),
            dirty: false,
            sample_rate,
            block_size: block_size.max(1),
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Add a node to the rack
    pub fn add(&mut self, name: &str, module: impl SpectralNode + 'static) -> NodeHandle {
        self.add_boxed(name, Box::new(module))
    }

    pub fn add_boxed(&mut self, name: &str, mut module: Box<dyn SpectralNode>) -> NodeHandle {
        module.configure(self.sample_rate, self.block_size);
        let channels = module.output_channels();
        let bs = self.block_size;
        let id = self.nodes.insert(NodeSlot {
            module,
            name: name.to_string(),
            scratch: Vec::new(),
            active: true,
        });
        self.buffers.insert(id, vec![vec![0.0; bs]; channels]);
        self.dirty = true;
        debug!(name, channels, "node added");
        NodeHandle { id, channels }
    }

    /// Remove a node; consumers of its channels read silence afterwards
    pub fn remove(&mut self, id: NodeId) -> Result<(), SpectralError> {
        if self.nodes.remove(id).is_none() {
            return Err(SpectralError::InvalidNode);
        }
        self.buffers.remove(id);
        self.dirty = true;
        debug!("node removed");
        Ok(())
    }

    /// Stop a node: it no longer processes and its channels read as silence
    pub fn stop(&mut self, id: NodeId) -> Result<(), SpectralError> {
        let slot = self.nodes.get_mut(id).ok_or(SpectralError::InvalidNode)?;
        slot.active = false;
        if let Some(buffers) = self.buffers.get_mut(id) {
            for buffer in buffers.iter_mut() {
                buffer.fill(0.0);
            }
        }
        Ok(())
    }

    /// Restart a stopped node
    pub fn start(&mut self, id: NodeId) -> Result<(), SpectralError> {
        let slot = self.nodes.get_mut(id).ok_or(SpectralError::InvalidNode)?;
        slot.active = true;
        Ok(())
    }

    /// Clear the internal state of every node
    pub fn reset(&mut self) {
        for slot in self.nodes.values_mut() {
            slot.module.reset();
        }
        for buffers in self.buffers.values_mut() {
            for buffer in buffers.iter_mut() {
                buffer.fill(0.0);
            }
        }
    }

    /// Apply a hot parameter update to one node
    ///
    /// Input replacements are checked for feedback before the node sees
    /// them; everything else is validated by the node itself. A rejected
    /// update leaves the node's previous configuration running.
    pub fn update(&mut self, id: NodeId, update: Update) -> Result<(), SpectralError> {
        if !self.nodes.contains_key(id) {
            return Err(SpectralError::InvalidNode);
        }
        if let Update::Input { source, .. } | Update::PairedInput { source, .. } = &update {
            for r in source {
                if r.node == id || self.depends_on(r.node, id) {
                    return Err(SpectralError::CycleDetected);
                }
            }
        }
        let kind = update.kind();
        let slot = self.nodes.get_mut(id).ok_or(SpectralError::InvalidNode)?;
        if let Err(e) = slot.module.update(update) {
            warn!(name = %slot.name, kind, error = %e, "update rejected");
            return Err(e);
        }
        self.dirty = true;
        debug!(name = %slot.name, kind, "update applied");
        Ok(())
    }

    /// True when `from` (transitively) reads any channel of `to`
    fn depends_on(&self, from: NodeId, to: NodeId) -> bool {
        if from == to {
            return true;
        }
        let mut stack = vec![from];
        let mut seen: Vec<NodeId> = Vec::new();
        while let Some(id) = stack.pop() {
            if seen.contains(&id) {
                continue;
            }
            seen.push(id);
            if let Some(slot) = self.nodes.get(id) {
                for r in slot.module.input_refs() {
                    if r.node == to {
                        return true;
                    }
                    stack.push(r.node);
                }
            }
        }
        false
    }

    /// Recompute processing order (Kahn's algorithm)
    fn compile(&mut self) {
        let ids: Vec<NodeId> = self.nodes.keys().collect();
        let mut indegree: SecondaryMap<NodeId, usize> = SecondaryMap::new();
        for &id in &ids {
            indegree.insert(id, 0);
        }
        // consumer <- producer edges; refs to missing nodes contribute nothing
        for &id in &ids {
            let mut count = 0;
            if let Some(slot) = self.nodes.get(id) {
                for r in slot.module.input_refs() {
                    if r.node != id && self.nodes.contains_key(r.node) {
                        count += 1;
                    }
                }
            }
            indegree[id] = count;
        }

        self.order.clear();
        let mut ready: Vec<NodeId> = ids
            .iter()
            .copied()
            .filter(|&id| indegree[id] == 0)
            .collect();
        while let Some(id) = ready.pop() {
            self.order.push(id);
            for &consumer in &ids {
                if consumer == id {
                    continue;
                }
                if let Some(slot) = self.nodes.get(consumer) {
                    let feeds = slot
                        .module
                        .input_refs()
                        .iter()
                        .filter(|r| r.node == id)
                        .count();
                    if feeds > 0 {
                        indegree[consumer] -= feeds;
                        if indegree[consumer] == 0 {
                            ready.push(consumer);
                        }
                    }
                }
            }
        }
        // Anything left participates in a cycle; schedule it after the rest
        // so it still runs (reading last-block data across the back edge).
        for &id in &ids {
            if !self.order.contains(&id) {
                self.order.push(id);
            }
        }
        self.dirty = false;
        debug!(nodes = self.order.len(), "schedule compiled");
    }

    /// Process one audio block through every active node
    pub fn tick(&mut self) {
        if self.dirty {
            self.compile();
        }
        let bs = self.block_size;
        for i in 0..self.order.len() {
            let id = self.order[i];
            let Some(slot) = self.nodes.get_mut(id) else {
                continue;
            };
            if !slot.active {
                continue;
            }
            let NodeSlot {
                module, scratch, ..
            } = slot;

            let refs = module.input_refs();
            if scratch.len() != refs.len() {
                scratch.resize_with(refs.len(), || vec![0.0; bs]);
            }
            for (dst, r) in scratch.iter_mut().zip(refs.iter()) {
                if dst.len() != bs {
                    dst.resize(bs, 0.0);
                }
                match self.buffers.get(r.node).and_then(|b| b.get(r.channel)) {
                    Some(src) => dst.copy_from_slice(src),
                    None => dst.fill(0.0),
                }
            }

            if let Some(outputs) = self.buffers.get_mut(id) {
                module.process(scratch, outputs);
            }
        }
    }

    /// Build a read-only view of one of a node's tagged stream families
    pub fn view(&self, id: NodeId, tag: StreamTag) -> Result<View, SpectralError> {
        let slot = self.nodes.get(id).ok_or(SpectralError::InvalidNode)?;
        let channels = slot
            .module
            .view_channels(tag)
            .ok_or(SpectralError::UnsupportedUpdate(tag.name()))?;
        Ok(View {
            node: id,
            tag,
            channels,
        })
    }

    /// First sample of the first channel a view selects, from the last
    /// produced block; silence if the producer is gone
    pub fn get(&self, view: &View) -> f64 {
        view.channels
            .first()
            .and_then(|&ch| self.peek(view.node, ch))
            .unwrap_or(0.0)
    }

    /// First sample of every channel a view selects
    pub fn get_all(&self, view: &View) -> Vec<f64> {
        view.channels
            .iter()
            .map(|&ch| self.peek(view.node, ch).unwrap_or(0.0))
            .collect()
    }

    fn peek(&self, id: NodeId, channel: usize) -> Option<f64> {
        self.buffers
            .get(id)?
            .get(channel)?
            .first()
            .copied()
    }

    /// Copy a node's last produced block for one channel
    pub fn read_channel(&self, r: ChannelRef, out: &mut [f64]) {
        match self.buffers.get(r.node).and_then(|b| b.get(r.channel)) {
            Some(src) => {
                let n = src.len().min(out.len());
                out[..n].copy_from_slice(&src[..n]);
                out[n..].fill(0.0);
            }
            None => out.fill(0.0),
        }
    }
}
