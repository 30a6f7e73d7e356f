//! Node Contract
//!
//! Every processing unit implements [`Node`]. The trait is deliberately
//! small: a variant supplies access to its [`NodeBase`] and its block
//! processing, and inherits the port, parameter and lifecycle bookkeeping
//! from the provided methods.
//!
//! Ports carry one scalar per block. A node reads its inputs from the base,
//! does its DSP, and leaves results in its output ports; terminal nodes may
//! also write into the host buffer.

use crate::port::{Parameter, Port, PortDirection};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Unique, immutable identifier of a node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Shared state behind every node variant
#[derive(Debug, Clone)]
pub struct NodeBase {
    id: NodeId,
    type_name: String,
    pub display_name: String,
    category: String,
    pub enabled: bool,
    inputs: Vec<Port>,
    outputs: Vec<Port>,
    parameters: Vec<Parameter>,
    sample_rate: Option<u32>,
    disposed: bool,
}

impl NodeBase {
    pub fn new(id: NodeId, type_name: impl Into<String>, category: impl Into<String>) -> Self {
        let type_name = type_name.into();
        Self {
            display_name: type_name.clone(),
            id,
            type_name,
            category: category.into(),
            enabled: true,
            inputs: Vec::new(),
            outputs: Vec::new(),
            parameters: Vec::new(),
            sample_rate: None,
            disposed: false,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// Append an input port; its index is its position
    pub fn with_input(mut self, mut port: Port) -> Self {
        port.direction = PortDirection::Input;
        port.index = self.inputs.len();
        self.inputs.push(port);
        self
    }

    /// Append an output port; its index is its position
    pub fn with_output(mut self, mut port: Port) -> Self {
        port.direction = PortDirection::Output;
        port.index = self.outputs.len();
        self.outputs.push(port);
        self
    }

    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Re-tag the node with the name it was registered under
    pub(crate) fn set_type_name(&mut self, type_name: &str) {
        if self.type_name != type_name {
            self.type_name = type_name.to_string();
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn inputs(&self) -> &[Port] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Port] {
        &self.outputs
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut [Parameter] {
        &mut self.parameters
    }

    /// Current value of an input port, 0 when out of range
    #[inline]
    pub fn input(&self, index: usize) -> f32 {
        self.inputs.get(index).map_or(0.0, |p| p.current_value)
    }

    /// Store into an input port; out of range is a no-op
    #[inline]
    pub fn set_input(&mut self, index: usize, value: f32) {
        if let Some(port) = self.inputs.get_mut(index) {
            port.current_value = value;
        }
    }

    /// Last value written to an output port, 0 when out of range
    #[inline]
    pub fn output(&self, index: usize) -> f32 {
        self.outputs.get(index).map_or(0.0, |p| p.current_value)
    }

    /// Write an output port; out of range is a no-op
    #[inline]
    pub fn set_output(&mut self, index: usize, value: f32) {
        if let Some(port) = self.outputs.get_mut(index) {
            port.current_value = value;
        }
    }

    pub fn input_connected(&self, index: usize) -> bool {
        self.inputs.get(index).is_some_and(|p| p.is_connected)
    }

    /// Current value of the parameter at `index`, 0 when out of range
    #[inline]
    pub fn param(&self, index: usize) -> f32 {
        self.parameters.get(index).map_or(0.0, |p| p.value())
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Set a parameter by name; false if no such parameter
    pub fn set_parameter(&mut self, name: &str, value: f32) -> bool {
        match self.parameters.iter_mut().find(|p| p.name == name) {
            Some(p) => {
                p.set_value(value);
                true
            }
            None => false,
        }
    }

    pub fn set_parameter_at(&mut self, index: usize, value: f32) -> bool {
        match self.parameters.get_mut(index) {
            Some(p) => {
                p.set_value(value);
                true
            }
            None => false,
        }
    }

    pub fn mark_connected(&mut self, direction: PortDirection, index: usize, connected: bool) {
        let ports = match direction {
            PortDirection::Input => &mut self.inputs,
            PortDirection::Output => &mut self.outputs,
        };
        if let Some(port) = ports.get_mut(index) {
            port.is_connected = connected;
        }
    }

    /// Restore every port value to its default
    pub fn reset_ports(&mut self) {
        self.inputs.iter_mut().for_each(Port::reset);
        self.outputs.iter_mut().for_each(Port::reset);
    }

    /// Record the block's sample rate; true when it differs from the last one seen
    fn observe_sample_rate(&mut self, sample_rate: u32) -> bool {
        if self.sample_rate == Some(sample_rate) {
            return false;
        }
        self.sample_rate = Some(sample_rate);
        true
    }

    /// Last sample rate this node processed at
    pub fn sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }
}

/// The polymorphic processing-unit interface
pub trait Node: Send {
    fn base(&self) -> &NodeBase;

    fn base_mut(&mut self) -> &mut NodeBase;

    /// Advance DSP state by one block, leaving results in the output ports
    fn process(&mut self, buffer: &mut [f32], frames: usize, sample_rate: u32);

    /// Clear variant-specific DSP state (filter memory, envelope phase)
    fn reset_state(&mut self) {}

    /// Recompute rate-dependent coefficients
    fn sample_rate_changed(&mut self, _sample_rate: u32) {}

    /// Release variant-held resources; runs at most once
    fn on_dispose(&mut self) {}

    fn id(&self) -> &NodeId {
        self.base().id()
    }

    fn type_name(&self) -> &str {
        self.base().type_name()
    }

    fn display_name(&self) -> &str {
        &self.base().display_name
    }

    fn set_display_name(&mut self, name: &str) {
        self.base_mut().display_name = name.to_string();
    }

    fn category(&self) -> &str {
        self.base().category()
    }

    fn is_enabled(&self) -> bool {
        self.base().enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.base_mut().enabled = enabled;
    }

    fn inputs(&self) -> &[Port] {
        self.base().inputs()
    }

    fn outputs(&self) -> &[Port] {
        self.base().outputs()
    }

    fn parameters(&self) -> &[Parameter] {
        self.base().parameters()
    }

    fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.base().parameter(name)
    }

    fn set_parameter(&mut self, name: &str, value: f32) -> bool {
        self.base_mut().set_parameter(name, value)
    }

    fn get_output(&self, index: usize) -> f32 {
        self.base().output(index)
    }

    fn set_input(&mut self, index: usize, value: f32) {
        self.base_mut().set_input(index, value);
    }

    fn mark_connected(&mut self, direction: PortDirection, index: usize, connected: bool) {
        self.base_mut().mark_connected(direction, index, connected);
    }

    /// Clear port values and DSP state
    fn reset(&mut self) {
        self.base_mut().reset_ports();
        self.reset_state();
    }

    /// Process one block, first notifying the node if the sample rate changed
    fn render(&mut self, buffer: &mut [f32], frames: usize, sample_rate: u32) {
        if self.base_mut().observe_sample_rate(sample_rate) {
            self.sample_rate_changed(sample_rate);
        }
        self.process(buffer, frames, sample_rate);
    }

    /// Release resources; idempotent
    fn dispose(&mut self) {
        if self.base().disposed {
            return;
        }
        self.base_mut().disposed = true;
        self.on_dispose();
    }

    fn is_disposed(&self) -> bool {
        self.base().disposed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::SignalKind;

    struct Doubler {
        base: NodeBase,
        rate_changes: usize,
        disposals: usize,
        state: f32,
    }

    impl Doubler {
        fn new() -> Self {
            Self {
                base: NodeBase::new(NodeId::from("d"), "doubler", "Test")
                    .with_input(Port::input("in", SignalKind::Audio))
                    .with_output(Port::output("out", SignalKind::Audio).with_default(0.5))
                    .with_parameter(Parameter::new("factor", 0.0, 4.0, 2.0)),
                rate_changes: 0,
                disposals: 0,
                state: 0.0,
            }
        }
    }

    impl Node for Doubler {
        fn base(&self) -> &NodeBase {
            &self.base
        }

        fn base_mut(&mut self) -> &mut NodeBase {
            &mut self.base
        }

        fn process(&mut self, _buffer: &mut [f32], _frames: usize, _sample_rate: u32) {
            self.state += 1.0;
            let out = self.base.input(0) * self.base.param(0);
            self.base.set_output(0, out);
        }

        fn reset_state(&mut self) {
            self.state = 0.0;
        }

        fn sample_rate_changed(&mut self, _sample_rate: u32) {
            self.rate_changes += 1;
        }

        fn on_dispose(&mut self) {
            self.disposals += 1;
        }
    }

    #[test]
    fn test_port_indices_are_dense() {
        let base = NodeBase::new(NodeId::from("n"), "t", "c")
            .with_input(Port::input("a", SignalKind::Audio))
            .with_input(Port::input("b", SignalKind::Control))
            .with_output(Port::output("out", SignalKind::Audio));
        assert_eq!(base.inputs()[0].index, 0);
        assert_eq!(base.inputs()[1].index, 1);
        assert_eq!(base.outputs()[0].index, 0);
    }

    #[test]
    fn test_out_of_range_ports() {
        let mut node = Doubler::new();
        assert_eq!(node.get_output(7), 0.0);
        node.set_input(7, 1.0);
        assert_eq!(node.base().input(0), 0.0);
    }

    #[test]
    fn test_process_and_reset() {
        let mut node = Doubler::new();
        let mut buffer = [0.0; 8];
        node.set_input(0, 1.5);
        node.render(&mut buffer, 8, 48000);
        assert_eq!(node.get_output(0), 3.0);

        node.reset();
        assert_eq!(node.get_output(0), 0.5);
        assert_eq!(node.base().input(0), 0.0);
        assert_eq!(node.state, 0.0);
    }

    #[test]
    fn test_sample_rate_hook_fires_on_change_only() {
        let mut node = Doubler::new();
        let mut buffer = [0.0; 4];
        node.render(&mut buffer, 4, 44100);
        node.render(&mut buffer, 4, 44100);
        node.render(&mut buffer, 4, 48000);
        node.render(&mut buffer, 2, 48000);
        assert_eq!(node.rate_changes, 2);
        assert_eq!(node.base().sample_rate(), Some(48000));
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let mut node = Doubler::new();
        node.dispose();
        node.dispose();
        assert!(node.is_disposed());
        assert_eq!(node.disposals, 1);
    }

    #[test]
    fn test_parameter_by_name() {
        let mut node = Doubler::new();
        assert!(node.set_parameter("factor", 10.0));
        assert_eq!(node.parameter("factor").map(|p| p.value()), Some(4.0));
        assert!(!node.set_parameter("missing", 1.0));
    }

    #[test]
    fn test_mark_connected() {
        let mut node = Doubler::new();
        node.mark_connected(PortDirection::Input, 0, true);
        assert!(node.base().input_connected(0));
        node.mark_connected(PortDirection::Output, 3, true);
        assert!(!node.outputs()[0].is_connected);
    }
}
