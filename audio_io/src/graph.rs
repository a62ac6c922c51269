use crate::context::ContextState;
use crate::media::PcmBuffer;
use crate::node::{BufferSource, NodeKind, ParamKind};
use crate::GraphError;
use log::trace;
use ringbuf::HeapProducer;
use std::sync::Arc;
use std::time::Duration;

/// Generational handle to a node. Handles to removed nodes stay invalid even
/// after their slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Output {
    Disconnected,
    Destination,
    Node(NodeId),
}

struct Node {
    kind: NodeKind,
    inputs: Vec<NodeId>,
    output: Output,
    tap: Option<HeapProducer<f32>>,
}

struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Node storage plus the render clock.
///
/// Each node feeds exactly one place (another node or the destination), so a
/// connection made from a node replaces its previous one.
pub struct AudioGraph {
    slots: Vec<Slot>,
    free: Vec<usize>,
    sample_rate: u32,
    frame: u64,
    state: ContextState,
    order: Vec<usize>,
    outputs: Vec<usize>,
    order_dirty: bool,
    scratch: Vec<[f32; 2]>,
}

impl AudioGraph {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            sample_rate: sample_rate.max(1),
            frame: 0,
            state: ContextState::Suspended,
            order: Vec::new(),
            outputs: Vec::new(),
            order_dirty: false,
            scratch: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub(crate) fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate.max(1);
    }

    /// Frames rendered so far. Only advances while running.
    pub fn current_frame(&self) -> u64 {
        self.frame
    }

    pub fn current_time(&self) -> f64 {
        self.frame as f64 / self.sample_rate as f64
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ContextState) {
        self.state = state;
    }

    /// Whole frames covering `duration` at the graph rate
    pub fn frames_for(&self, duration: Duration) -> u64 {
        (duration.as_secs_f64() * self.sample_rate as f64).round() as u64
    }

    pub fn node_count(&self) -> usize {
        self.slots.iter().filter(|s| s.node.is_some()).count()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_ok()
    }

    pub fn add_node(&mut self, kind: NodeKind) -> Result<NodeId, GraphError> {
        if self.state == ContextState::Closed {
            return Err(GraphError::Closed);
        }

        let node = Node {
            kind,
            inputs: Vec::new(),
            output: Output::Disconnected,
            tap: None,
        };

        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index].node = Some(node);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                self.scratch.push([0.0, 0.0]);
                self.slots.len() - 1
            }
        };

        Ok(NodeId {
            index: index as u32,
            generation: self.slots[index].generation,
        })
    }

    fn node(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
            .ok_or(GraphError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, GraphError> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
            .ok_or(GraphError::UnknownNode(id))
    }

    pub fn kind(&self, id: NodeId) -> Result<&NodeKind, GraphError> {
        self.node(id).map(|n| &n.kind)
    }

    /// Route `from` into `to`
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        self.node(from)?;
        if self.node(to)?.kind.is_source() {
            return Err(GraphError::WrongKind(to));
        }

        // Following outputs downstream from `to` must never reach `from`.
        let mut cursor = Output::Node(to);
        while let Output::Node(id) = cursor {
            if id == from {
                return Err(GraphError::Cycle { from, to });
            }
            cursor = self.node(id)?.output;
        }

        self.detach_output(from)?;
        self.node_mut(from)?.output = Output::Node(to);
        self.node_mut(to)?.inputs.push(from);
        self.order_dirty = true;
        Ok(())
    }

    pub fn connect_to_destination(&mut self, from: NodeId) -> Result<(), GraphError> {
        self.detach_output(from)?;
        self.node_mut(from)?.output = Output::Destination;
        self.order_dirty = true;
        Ok(())
    }

    pub fn disconnect(&mut self, id: NodeId) -> Result<(), GraphError> {
        self.detach_output(id)?;
        self.order_dirty = true;
        Ok(())
    }

    fn detach_output(&mut self, id: NodeId) -> Result<(), GraphError> {
        let previous = std::mem::replace(&mut self.node_mut(id)?.output, Output::Disconnected);
        if let Output::Node(target) = previous {
            if let Ok(target) = self.node_mut(target) {
                target.inputs.retain(|input| *input != id);
            }
        }
        Ok(())
    }

    /// Disconnect and free a node. Its upstream nodes are left disconnected.
    pub fn remove_node(&mut self, id: NodeId) -> Result<(), GraphError> {
        self.detach_output(id)?;

        let index = id.index as usize;
        let node = self.slots[index].node.take();
        if let Some(node) = node {
            for input in node.inputs {
                if let Ok(upstream) = self.node_mut(input) {
                    upstream.output = Output::Disconnected;
                }
            }
        }

        self.slots[index].generation = self.slots[index].generation.wrapping_add(1);
        self.free.push(index);
        self.order_dirty = true;
        trace!("Removed node {:?}", id);
        Ok(())
    }

    /// Drop every node. Outstanding ids become invalid.
    pub fn clear(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.node.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index);
            }
        }
        self.order.clear();
        self.outputs.clear();
        self.order_dirty = false;
    }

    fn param_mut(&mut self, id: NodeId, kind: ParamKind) -> Result<&mut crate::AudioParam, GraphError> {
        self.node_mut(id)?
            .kind
            .param_mut(kind)
            .ok_or(GraphError::WrongKind(id))
    }

    pub fn set_param(&mut self, id: NodeId, kind: ParamKind, value: f32) -> Result<(), GraphError> {
        self.param_mut(id, kind)?.set_value(value);
        Ok(())
    }

    /// Linear ramp from the current value, timed by the render clock
    pub fn ramp_param(
        &mut self,
        id: NodeId,
        kind: ParamKind,
        target: f32,
        duration: Duration,
    ) -> Result<(), GraphError> {
        let now = self.frame;
        let frames = self.frames_for(duration);
        self.param_mut(id, kind)?.linear_ramp_to(target, now, frames)
    }

    /// Exponential approach with the given time constant
    pub fn set_param_target(
        &mut self,
        id: NodeId,
        kind: ParamKind,
        target: f32,
        time_constant: Duration,
    ) -> Result<(), GraphError> {
        let now = self.frame;
        let tc = time_constant.as_secs_f64() * self.sample_rate as f64;
        self.param_mut(id, kind)?.set_target_at_time(target, now, tc)
    }

    pub fn param_value(&self, id: NodeId, kind: ParamKind) -> Result<f32, GraphError> {
        self.node(id)?
            .kind
            .param(kind)
            .map(|p| p.value())
            .ok_or(GraphError::WrongKind(id))
    }

    pub fn param_target(&self, id: NodeId, kind: ParamKind) -> Result<f32, GraphError> {
        self.node(id)?
            .kind
            .param(kind)
            .map(|p| p.target())
            .ok_or(GraphError::WrongKind(id))
    }

    pub fn is_automating(&self, id: NodeId, kind: ParamKind) -> Result<bool, GraphError> {
        self.node(id)?
            .kind
            .param(kind)
            .map(|p| p.is_automating())
            .ok_or(GraphError::WrongKind(id))
    }

    fn source_mut(&mut self, id: NodeId) -> Result<&mut BufferSource, GraphError> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::BufferSource(source) => Ok(source),
            _ => Err(GraphError::WrongKind(id)),
        }
    }

    fn source(&self, id: NodeId) -> Result<&BufferSource, GraphError> {
        match &self.node(id)?.kind {
            NodeKind::BufferSource(source) => Ok(source),
            _ => Err(GraphError::WrongKind(id)),
        }
    }

    pub fn set_source_buffer(&mut self, id: NodeId, buffer: Arc<PcmBuffer>) -> Result<(), GraphError> {
        self.source_mut(id)?.set_buffer(buffer);
        Ok(())
    }

    pub fn set_source_playing(&mut self, id: NodeId, playing: bool) -> Result<(), GraphError> {
        self.source_mut(id)?.set_playing(playing);
        Ok(())
    }

    pub fn seek_source(&mut self, id: NodeId, seconds: f64) -> Result<(), GraphError> {
        self.source_mut(id)?.seek(seconds);
        Ok(())
    }

    pub fn source_position(&self, id: NodeId) -> Result<f64, GraphError> {
        self.source(id).map(|s| s.position_secs())
    }

    pub fn source_duration(&self, id: NodeId) -> Result<Option<f64>, GraphError> {
        self.source(id).map(|s| s.duration_secs())
    }

    pub fn source_ended(&self, id: NodeId) -> Result<bool, GraphError> {
        self.source(id).map(|s| s.has_ended())
    }

    pub fn source_playing(&self, id: NodeId) -> Result<bool, GraphError> {
        self.source(id).map(|s| s.is_playing())
    }

    /// Feed the mono mix of a node's output into `tap` every rendered frame
    pub fn set_tap(&mut self, id: NodeId, tap: HeapProducer<f32>) -> Result<(), GraphError> {
        self.node_mut(id)?.tap = Some(tap);
        Ok(())
    }

    pub fn clear_tap(&mut self, id: NodeId) -> Result<(), GraphError> {
        self.node_mut(id)?.tap = None;
        Ok(())
    }

    pub fn has_tap(&self, id: NodeId) -> Result<bool, GraphError> {
        self.node(id).map(|n| n.tap.is_some())
    }

    fn rebuild_order(&mut self) {
        self.order.clear();
        self.outputs.clear();
        let mut visited = vec![false; self.slots.len()];

        for index in 0..self.slots.len() {
            let feeds_destination = matches!(
                self.slots[index].node.as_ref().map(|n| n.output),
                Some(Output::Destination)
            );
            if feeds_destination {
                self.outputs.push(index);
                self.visit(index, &mut visited);
            }
        }
        self.order_dirty = false;
    }

    fn visit(&mut self, index: usize, visited: &mut [bool]) {
        if visited[index] {
            return;
        }
        visited[index] = true;

        let inputs: Vec<usize> = self.slots[index]
            .node
            .as_ref()
            .map(|n| n.inputs.iter().map(|i| i.index as usize).collect())
            .unwrap_or_default();
        for input in inputs {
            self.visit(input, visited);
        }
        self.order.push(index);
    }

    fn render_frame(&mut self) -> [f32; 2] {
        let frame = self.frame;
        let sample_rate = self.sample_rate;

        for &index in &self.order {
            let input = match self.slots[index].node.as_ref() {
                Some(node) => node.inputs.iter().fold([0.0f32, 0.0], |acc, input| {
                    let s = self.scratch[input.index as usize];
                    [acc[0] + s[0], acc[1] + s[1]]
                }),
                None => continue,
            };

            if let Some(node) = self.slots[index].node.as_mut() {
                let out = node.kind.process(frame, sample_rate, input);
                if let Some(tap) = node.tap.as_mut() {
                    let _ = tap.push((out[0] + out[1]) * 0.5);
                }
                self.scratch[index] = out;
            }
        }

        let mixed = self.outputs.iter().fold([0.0f32, 0.0], |acc, &index| {
            let s = self.scratch[index];
            [acc[0] + s[0], acc[1] + s[1]]
        });

        self.frame += 1;
        [mixed[0].clamp(-1.0, 1.0), mixed[1].clamp(-1.0, 1.0)]
    }

    /// Fill interleaved stereo `out`. Silence while not running.
    pub fn render(&mut self, out: &mut [f32]) {
        if self.state != ContextState::Running {
            out.iter_mut().for_each(|s| *s = 0.0);
            return;
        }

        if self.order_dirty {
            self.rebuild_order();
        }

        for frame in out.chunks_mut(2) {
            let [left, right] = self.render_frame();
            frame[0] = left;
            if frame.len() > 1 {
                frame[1] = right;
            }
        }
    }

    pub fn render_frames(&mut self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames * 2];
        self.render(&mut out);
        out
    }
}
