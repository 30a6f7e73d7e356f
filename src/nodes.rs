//! Built-in Nodes
//!
//! A small set of block-rate processing units: sources, a filter, an
//! envelope, utilities and an audio sink. Each port carries one value per
//! block, so these are most useful for control signals and for exercising
//! patches; heavier DSP lives in external node variants.

use crate::node::{Node, NodeBase, NodeId};
use crate::port::{ParamScale, Parameter, Port, SignalKind};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::hash_map::DefaultHasher;
use std::f32::consts::TAU;
use std::hash::{Hash, Hasher};

/// Seconds covered by one block
#[inline]
fn block_seconds(frames: usize, sample_rate: u32) -> f32 {
    if sample_rate == 0 {
        return 0.0;
    }
    frames as f32 / sample_rate as f32
}

/// Rising-edge detector for trigger and gate inputs
#[derive(Debug, Clone, Copy, Default)]
struct EdgeDetector {
    high: bool,
}

impl EdgeDetector {
    fn rising(&mut self, value: f32) -> bool {
        let high = value > 0.5;
        let rose = high && !self.high;
        self.high = high;
        rose
    }
}

/// Outputs a fixed value
pub struct Constant {
    base: NodeBase,
}

impl Constant {
    pub const TYPE_NAME: &'static str = "constant";

    pub fn new(id: impl Into<NodeId>, value: f32) -> Self {
        Self {
            base: NodeBase::new(id.into(), Self::TYPE_NAME, "Sources")
                .with_display_name("Constant")
                .with_output(Port::output("out", SignalKind::Control))
                .with_parameter(Parameter::new("value", -10.0, 10.0, value)),
        }
    }
}

impl Node for Constant {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn process(&mut self, _buffer: &mut [f32], _frames: usize, _sample_rate: u32) {
        let value = self.base.param(0);
        self.base.set_output(0, value);
    }
}

/// Waveform shapes for [`Oscillator`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Triangle,
    Saw,
    Square,
}

impl Waveform {
    fn from_param(value: f32) -> Self {
        match value.round() as i32 {
            1 => Waveform::Triangle,
            2 => Waveform::Saw,
            3 => Waveform::Square,
            _ => Waveform::Sine,
        }
    }

    /// Value at `phase` in `[0, 1)`, range ±1
    pub fn sample(&self, phase: f32) -> f32 {
        match self {
            Waveform::Sine => libm::sinf(phase * TAU),
            Waveform::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
            Waveform::Saw => 2.0 * phase - 1.0,
            Waveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
        }
    }
}

/// Multi-waveform oscillator with exponential FM and hard sync
pub struct Oscillator {
    base: NodeBase,
    phase: f32,
    sync: EdgeDetector,
}

impl Oscillator {
    pub const TYPE_NAME: &'static str = "oscillator";

    pub fn new(id: impl Into<NodeId>) -> Self {
        Self {
            base: NodeBase::new(id.into(), Self::TYPE_NAME, "Oscillators")
                .with_display_name("Oscillator")
                .with_input(
                    Port::input("fm", SignalKind::Control)
                        .with_description("Frequency offset in octaves"),
                )
                .with_input(Port::input("sync", SignalKind::Trigger))
                .with_output(Port::output("out", SignalKind::Audio))
                .with_parameter(
                    Parameter::new("frequency", 0.01, 20000.0, 440.0)
                        .with_unit("Hz")
                        .with_scale(ParamScale::Logarithmic),
                )
                .with_parameter(
                    Parameter::new("waveform", 0.0, 3.0, 0.0)
                        .with_description("0 sine, 1 triangle, 2 saw, 3 square"),
                )
                .with_parameter(Parameter::new("amplitude", 0.0, 1.0, 1.0)),
            phase: 0.0,
            sync: EdgeDetector::default(),
        }
    }

    pub fn with_frequency(mut self, hz: f32) -> Self {
        self.base.set_parameter_at(0, hz);
        self
    }
}

impl Node for Oscillator {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn process(&mut self, _buffer: &mut [f32], frames: usize, sample_rate: u32) {
        if self.sync.rising(self.base.input(1)) {
            self.phase = 0.0;
        }

        let waveform = Waveform::from_param(self.base.param(1));
        let out = waveform.sample(self.phase) * self.base.param(2);
        self.base.set_output(0, out);

        let fm = self.base.input(0).clamp(-10.0, 10.0);
        let freq = self.base.param(0) * libm::exp2f(fm);
        self.phase = (self.phase + freq * block_seconds(frames, sample_rate)).fract();
        if !self.phase.is_finite() || self.phase < 0.0 {
            self.phase = 0.0;
        }
    }

    fn reset_state(&mut self) {
        self.phase = 0.0;
        self.sync = EdgeDetector::default();
    }
}

/// Seeded white noise
pub struct Noise {
    base: NodeBase,
    seed: u64,
    rng: StdRng,
}

impl Noise {
    pub const TYPE_NAME: &'static str = "noise";

    pub fn new(id: impl Into<NodeId>) -> Self {
        let id = id.into();
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        let seed = hasher.finish();
        Self {
            base: NodeBase::new(id, Self::TYPE_NAME, "Sources")
                .with_display_name("Noise")
                .with_output(Port::output("out", SignalKind::Audio))
                .with_parameter(Parameter::new("amplitude", 0.0, 1.0, 1.0)),
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Node for Noise {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn process(&mut self, _buffer: &mut [f32], _frames: usize, _sample_rate: u32) {
        let out = self.rng.gen_range(-1.0f32..=1.0) * self.base.param(0);
        self.base.set_output(0, out);
    }

    fn reset_state(&mut self) {
        self.rng = StdRng::seed_from_u64(self.seed);
    }
}

/// One-pole low-pass filter
pub struct Filter {
    base: NodeBase,
    memory: f32,
    coefficient: f32,
    /// (cutoff, frames) the coefficient was computed for
    computed_for: Option<(f32, usize)>,
    sample_rate: u32,
}

impl Filter {
    pub const TYPE_NAME: &'static str = "filter";

    pub fn new(id: impl Into<NodeId>) -> Self {
        Self {
            base: NodeBase::new(id.into(), Self::TYPE_NAME, "Filters")
                .with_display_name("Low-pass Filter")
                .with_input(Port::input("in", SignalKind::Audio))
                .with_input(
                    Port::input("cutoff", SignalKind::Control)
                        .with_description("Cutoff modulation; ±1 sweeps the full range"),
                )
                .with_output(Port::output("out", SignalKind::Audio))
                .with_parameter(
                    Parameter::new("cutoff", 20.0, 20000.0, 1000.0)
                        .with_unit("Hz")
                        .with_scale(ParamScale::Logarithmic)
                        .modulatable(1.0),
                ),
            memory: 0.0,
            coefficient: 1.0,
            computed_for: None,
            sample_rate: 0,
        }
    }

    fn update_coefficient(&mut self, frames: usize) {
        let cv = self.base.input(1);
        let cutoff = self
            .base
            .parameters()
            .first()
            .map_or(1000.0, |p| p.modulated(cv));
        if self.computed_for == Some((cutoff, frames)) {
            return;
        }
        let dt = block_seconds(frames, self.sample_rate);
        self.coefficient = 1.0 - libm::expf(-TAU * cutoff * dt);
        self.computed_for = Some((cutoff, frames));
    }

    pub fn coefficient(&self) -> f32 {
        self.coefficient
    }
}

impl Node for Filter {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn process(&mut self, _buffer: &mut [f32], frames: usize, _sample_rate: u32) {
        self.update_coefficient(frames);
        let input = self.base.input(0);
        self.memory += self.coefficient * (input - self.memory);
        if !self.memory.is_finite() {
            self.memory = 0.0;
        }
        self.base.set_output(0, self.memory);
    }

    fn reset_state(&mut self) {
        self.memory = 0.0;
    }

    fn sample_rate_changed(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
        self.computed_for = None;
    }
}

/// Amplifier with a control-voltage input
pub struct Gain {
    base: NodeBase,
}

impl Gain {
    pub const TYPE_NAME: &'static str = "gain";

    pub fn new(id: impl Into<NodeId>) -> Self {
        Self {
            base: NodeBase::new(id.into(), Self::TYPE_NAME, "Utilities")
                .with_display_name("Gain")
                .with_input(Port::input("in", SignalKind::Audio))
                .with_input(Port::input("cv", SignalKind::Control).with_default(1.0))
                .with_output(Port::output("out", SignalKind::Audio))
                .with_parameter(Parameter::new("gain", 0.0, 4.0, 1.0)),
        }
    }
}

impl Node for Gain {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn process(&mut self, _buffer: &mut [f32], _frames: usize, _sample_rate: u32) {
        let out = self.base.input(0) * self.base.input(1) * self.base.param(0);
        self.base.set_output(0, out);
    }
}

/// Four-channel mixer; multiple sources into one input go through here
pub struct Mixer {
    base: NodeBase,
}

impl Mixer {
    pub const TYPE_NAME: &'static str = "mixer";
    pub const CHANNELS: usize = 4;

    pub fn new(id: impl Into<NodeId>) -> Self {
        let mut base = NodeBase::new(id.into(), Self::TYPE_NAME, "Utilities")
            .with_display_name("Mixer")
            .with_output(Port::output("out", SignalKind::Audio));
        for ch in 1..=Self::CHANNELS {
            base = base
                .with_input(Port::input(format!("in{ch}"), SignalKind::Audio))
                .with_parameter(Parameter::new(format!("level{ch}"), 0.0, 2.0, 1.0));
        }
        base = base.with_parameter(Parameter::new("master", 0.0, 2.0, 1.0));
        Self { base }
    }
}

impl Node for Mixer {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn process(&mut self, _buffer: &mut [f32], _frames: usize, _sample_rate: u32) {
        let sum: f32 = (0..Self::CHANNELS)
            .map(|ch| self.base.input(ch) * self.base.param(ch))
            .sum();
        let out = sum * self.base.param(Self::CHANNELS);
        self.base.set_output(0, out);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

/// Linear ADSR envelope driven by a gate input
pub struct Envelope {
    base: NodeBase,
    stage: Stage,
    level: f32,
    gate: EdgeDetector,
}

impl Envelope {
    pub const TYPE_NAME: &'static str = "envelope";

    pub fn new(id: impl Into<NodeId>) -> Self {
        let time = |name: &str, default: f32| {
            Parameter::new(name, 0.001, 10.0, default)
                .with_unit("s")
                .with_scale(ParamScale::Logarithmic)
        };
        Self {
            base: NodeBase::new(id.into(), Self::TYPE_NAME, "Envelopes")
                .with_display_name("ADSR Envelope")
                .with_input(Port::input("gate", SignalKind::Gate))
                .with_output(Port::output("env", SignalKind::Control))
                .with_parameter(time("attack", 0.01))
                .with_parameter(time("decay", 0.1))
                .with_parameter(Parameter::new("sustain", 0.0, 1.0, 0.7))
                .with_parameter(time("release", 0.3)),
            stage: Stage::Idle,
            level: 0.0,
            gate: EdgeDetector::default(),
        }
    }

    pub fn level(&self) -> f32 {
        self.level
    }
}

impl Node for Envelope {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn process(&mut self, _buffer: &mut [f32], frames: usize, sample_rate: u32) {
        let gate = self.base.input(0);
        if self.gate.rising(gate) {
            self.stage = Stage::Attack;
        } else if gate <= 0.5 && self.stage != Stage::Idle {
            self.stage = Stage::Release;
        }

        let dt = block_seconds(frames, sample_rate);
        let (attack, decay, sustain, release) = (
            self.base.param(0),
            self.base.param(1),
            self.base.param(2),
            self.base.param(3),
        );

        match self.stage {
            Stage::Idle => self.level = 0.0,
            Stage::Attack => {
                self.level += dt / attack;
                if self.level >= 1.0 {
                    self.level = 1.0;
                    self.stage = Stage::Decay;
                }
            }
            Stage::Decay => {
                self.level -= dt * (1.0 - sustain) / decay;
                if self.level <= sustain {
                    self.level = sustain;
                    self.stage = Stage::Sustain;
                }
            }
            Stage::Sustain => self.level = sustain,
            Stage::Release => {
                self.level -= dt / release;
                if self.level <= 0.0 {
                    self.level = 0.0;
                    self.stage = Stage::Idle;
                }
            }
        }

        self.base.set_output(0, self.level);
    }

    fn reset_state(&mut self) {
        self.stage = Stage::Idle;
        self.level = 0.0;
        self.gate = EdgeDetector::default();
    }
}

/// Eight-step CV/gate sequencer advanced by a clock trigger
pub struct Sequencer {
    base: NodeBase,
    step: Option<usize>,
    clock: EdgeDetector,
    reset: EdgeDetector,
}

impl Sequencer {
    pub const TYPE_NAME: &'static str = "sequencer";
    pub const STEPS: usize = 8;

    pub fn new(id: impl Into<NodeId>) -> Self {
        let mut base = NodeBase::new(id.into(), Self::TYPE_NAME, "Sequencing")
            .with_display_name("Step Sequencer")
            .with_input(Port::input("clock", SignalKind::Trigger))
            .with_input(Port::input("reset", SignalKind::Trigger))
            .with_output(Port::output("cv", SignalKind::Control))
            .with_output(Port::output("gate", SignalKind::Gate));
        for step in 1..=Self::STEPS {
            base = base.with_parameter(Parameter::new(format!("step{step}"), -5.0, 5.0, 0.0));
        }
        base = base.with_parameter(Parameter::new("length", 1.0, Self::STEPS as f32, 8.0));
        Self {
            base,
            step: None,
            clock: EdgeDetector::default(),
            reset: EdgeDetector::default(),
        }
    }

    /// Current step index, None before the first clock
    pub fn current_step(&self) -> Option<usize> {
        self.step
    }
}

impl Node for Sequencer {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn process(&mut self, _buffer: &mut [f32], _frames: usize, _sample_rate: u32) {
        if self.reset.rising(self.base.input(1)) {
            self.step = None;
        }

        let clock = self.base.input(0);
        if self.clock.rising(clock) {
            let length = (self.base.param(Self::STEPS).round() as usize).clamp(1, Self::STEPS);
            self.step = Some(self.step.map_or(0, |s| (s + 1) % length));
        }

        let cv = self.step.map_or(0.0, |s| self.base.param(s));
        let gate = if self.step.is_some() && clock > 0.5 {
            1.0
        } else {
            0.0
        };
        self.base.set_output(0, cv);
        self.base.set_output(1, gate);
    }

    fn reset_state(&mut self) {
        self.step = None;
        self.clock = EdgeDetector::default();
        self.reset = EdgeDetector::default();
    }
}

/// Terminal sink that mixes its input into the host buffer
pub struct AudioOutput {
    base: NodeBase,
}

impl AudioOutput {
    pub const TYPE_NAME: &'static str = "audio_output";

    pub fn new(id: impl Into<NodeId>) -> Self {
        Self {
            base: NodeBase::new(id.into(), Self::TYPE_NAME, "I/O")
                .with_display_name("Audio Output")
                .with_input(Port::input("in", SignalKind::Audio))
                .with_parameter(Parameter::new("volume", 0.0, 2.0, 1.0))
                .with_parameter(Parameter::new("mute", 0.0, 1.0, 0.0).with_scale(ParamScale::Toggle)),
        }
    }
}

impl Node for AudioOutput {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn process(&mut self, buffer: &mut [f32], frames: usize, _sample_rate: u32) {
        if self.base.param(1) > 0.5 {
            return;
        }
        let value = self.base.input(0) * self.base.param(0);
        for sample in buffer.iter_mut().take(frames) {
            *sample += value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn block(node: &mut dyn Node, frames: usize, sample_rate: u32) {
        let mut buffer = vec![0.0f32; frames];
        node.render(&mut buffer, frames, sample_rate);
    }

    #[test]
    fn test_constant() {
        let mut node = Constant::new("k", 2.5);
        block(&mut node, 16, 48000);
        assert_relative_eq!(node.get_output(0), 2.5);
        node.set_parameter("value", 100.0);
        block(&mut node, 16, 48000);
        assert_relative_eq!(node.get_output(0), 10.0);
    }

    #[test]
    fn test_waveforms() {
        assert_relative_eq!(Waveform::Sine.sample(0.25), 1.0, epsilon = 1e-6);
        assert_relative_eq!(Waveform::Triangle.sample(0.5), 1.0);
        assert_relative_eq!(Waveform::Saw.sample(0.0), -1.0);
        assert_relative_eq!(Waveform::Square.sample(0.75), -1.0);
    }

    #[test]
    fn test_oscillator_advances_phase() {
        // 1 Hz saw, blocks of a quarter second
        let mut osc = Oscillator::new("osc").with_frequency(1.0);
        osc.set_parameter("waveform", 2.0);
        let mut outputs = Vec::new();
        for _ in 0..4 {
            block(&mut osc, 100, 400);
            outputs.push(osc.get_output(0));
        }
        let expected = [-1.0, -0.5, 0.0, 0.5];
        for (out, want) in outputs.iter().zip(expected) {
            assert_relative_eq!(*out, want, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_oscillator_sync_and_reset() {
        let mut osc = Oscillator::new("osc").with_frequency(1.0);
        osc.set_parameter("waveform", 2.0);
        block(&mut osc, 100, 400);
        block(&mut osc, 100, 400);
        osc.set_input(1, 1.0);
        block(&mut osc, 100, 400);
        assert_relative_eq!(osc.get_output(0), -1.0);

        osc.reset();
        assert_eq!(osc.get_output(0), 0.0);
        block(&mut osc, 100, 400);
        assert_relative_eq!(osc.get_output(0), -1.0);
    }

    #[test]
    fn test_noise_is_bounded_and_repeatable() {
        let mut noise = Noise::new("n");
        let first: Vec<f32> = (0..32)
            .map(|_| {
                block(&mut noise, 8, 48000);
                noise.get_output(0)
            })
            .collect();
        assert!(first.iter().all(|v| v.abs() <= 1.0));

        noise.reset();
        block(&mut noise, 8, 48000);
        assert_eq!(noise.get_output(0), first[0]);
    }

    #[test]
    fn test_filter_converges() {
        let mut filter = Filter::new("f");
        filter.set_parameter("cutoff", 20.0);
        filter.set_input(0, 1.0);
        block(&mut filter, 64, 48000);
        let first = filter.get_output(0);
        assert!(first > 0.0 && first < 1.0);
        for _ in 0..2000 {
            block(&mut filter, 64, 48000);
        }
        assert_relative_eq!(filter.get_output(0), 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_filter_cutoff_input_modulates() {
        let mut filter = Filter::new("f");
        filter.set_parameter("cutoff", 20.0);
        block(&mut filter, 64, 48000);
        let closed = filter.coefficient();

        filter.set_input(1, 1.0);
        block(&mut filter, 64, 48000);
        let open = filter.coefficient();
        assert!(open > closed);

        // Modulation past the top of the range is clamped
        filter.set_input(1, 5.0);
        block(&mut filter, 64, 48000);
        assert_relative_eq!(filter.coefficient(), open);
    }

    #[test]
    fn test_filter_recomputes_on_rate_change() {
        let mut filter = Filter::new("f");
        block(&mut filter, 64, 48000);
        let at_48k = filter.coefficient();
        block(&mut filter, 64, 96000);
        let at_96k = filter.coefficient();
        assert!(at_96k < at_48k);
    }

    #[test]
    fn test_gain_defaults_cv_to_unity() {
        let mut gain = Gain::new("g");
        gain.set_parameter("gain", 2.0);
        gain.set_input(0, 0.5);
        block(&mut gain, 8, 48000);
        assert_relative_eq!(gain.get_output(0), 1.0);
        gain.set_input(1, 0.5);
        block(&mut gain, 8, 48000);
        assert_relative_eq!(gain.get_output(0), 0.5);
    }

    #[test]
    fn test_mixer_sums_levels() {
        let mut mixer = Mixer::new("m");
        mixer.set_input(0, 1.0);
        mixer.set_input(2, 2.0);
        mixer.set_parameter("level3", 0.5);
        mixer.set_parameter("master", 2.0);
        block(&mut mixer, 8, 48000);
        assert_relative_eq!(mixer.get_output(0), 4.0);
    }

    #[test]
    fn test_envelope_stages() {
        let mut env = Envelope::new("e");
        env.set_parameter("attack", 0.01);
        env.set_parameter("decay", 0.01);
        env.set_parameter("sustain", 0.5);
        env.set_parameter("release", 0.01);

        block(&mut env, 100, 10000);
        assert_eq!(env.get_output(0), 0.0);

        env.set_input(0, 1.0);
        block(&mut env, 100, 10000);
        assert_relative_eq!(env.level(), 1.0);
        block(&mut env, 100, 10000);
        assert_relative_eq!(env.level(), 0.5);
        block(&mut env, 100, 10000);
        assert_relative_eq!(env.level(), 0.5);

        env.set_input(0, 0.0);
        block(&mut env, 100, 10000);
        assert_relative_eq!(env.level(), 0.0);
    }

    #[test]
    fn test_sequencer_steps_and_wraps() {
        let mut seq = Sequencer::new("s");
        seq.set_parameter("step1", 1.0);
        seq.set_parameter("step2", 2.0);
        seq.set_parameter("length", 2.0);

        let tick = |seq: &mut Sequencer| {
            seq.set_input(0, 1.0);
            block(seq, 8, 48000);
            let cv = seq.get_output(0);
            assert_eq!(seq.get_output(1), 1.0);
            seq.set_input(0, 0.0);
            block(seq, 8, 48000);
            assert_eq!(seq.get_output(1), 0.0);
            cv
        };
        assert_eq!(tick(&mut seq), 1.0);
        assert_eq!(tick(&mut seq), 2.0);
        assert_eq!(tick(&mut seq), 1.0);

        seq.set_input(1, 1.0);
        block(&mut seq, 8, 48000);
        assert_eq!(seq.current_step(), None);
    }

    #[test]
    fn test_audio_output_mixes_into_buffer() {
        let mut out = AudioOutput::new("out");
        out.set_input(0, 0.25);
        let mut buffer = vec![0.5f32; 8];
        out.render(&mut buffer, 4, 48000);
        assert_eq!(&buffer[..4], &[0.75; 4]);
        assert_eq!(&buffer[4..], &[0.5; 4]);

        out.set_parameter("mute", 1.0);
        out.render(&mut buffer, 4, 48000);
        assert_eq!(&buffer[..4], &[0.75; 4]);
    }
}
