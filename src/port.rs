//! Ports and Parameters
//!
//! Ports are the typed connection points of a node. Parameters are the named,
//! bounded controls a user or automation lane adjusts, independent of the
//! wiring.

use serde::{Deserialize, Serialize};

/// Whether a port receives or produces values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortDirection {
    Input,
    Output,
}

/// Semantic classification of the values a port carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    /// Audio-rate signal
    Audio,

    /// Continuous control value (modulation, pitch, levels)
    Control,

    /// Short pulse; only rising edges carry meaning
    Trigger,

    /// Binary state held high while an event is active
    Gate,
}

impl SignalKind {
    /// Threshold for high/low detection on event-like signals
    pub fn threshold(&self) -> Option<f32> {
        match self {
            SignalKind::Trigger | SignalKind::Gate => Some(0.5),
            _ => None,
        }
    }
}

/// A single input or output connection point on a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Port {
    pub name: String,
    pub description: String,
    pub direction: PortDirection,
    pub kind: SignalKind,

    /// Dense index within the node's inputs or outputs, stable for the node's lifetime
    pub index: usize,

    pub default_value: f32,
    pub current_value: f32,
    pub is_connected: bool,
}

impl Port {
    fn new(name: impl Into<String>, direction: PortDirection, kind: SignalKind) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            direction,
            kind,
            index: 0,
            default_value: 0.0,
            current_value: 0.0,
            is_connected: false,
        }
    }

    pub fn input(name: impl Into<String>, kind: SignalKind) -> Self {
        Self::new(name, PortDirection::Input, kind)
    }

    pub fn output(name: impl Into<String>, kind: SignalKind) -> Self {
        Self::new(name, PortDirection::Output, kind)
    }

    pub fn with_default(mut self, default: f32) -> Self {
        self.default_value = default;
        self.current_value = default;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Restore the current value to the default
    pub fn reset(&mut self) {
        self.current_value = self.default_value;
    }

    /// Whether the current value reads as high for trigger/gate signals
    pub fn is_high(&self) -> bool {
        self.current_value > self.kind.threshold().unwrap_or(0.5)
    }
}

/// How a control position maps onto a parameter's range
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamScale {
    #[default]
    Linear,
    /// Equal ratios per step (frequency, time)
    Logarithmic,
    /// Fine resolution near the minimum
    Exponential,
    /// Two states: minimum or maximum
    Toggle,
}

impl ParamScale {
    /// Map a control position in `[0, 1]` onto `[min, max]`
    pub fn map(&self, position: f32, min: f32, max: f32) -> f32 {
        let n = position.clamp(0.0, 1.0);
        match self {
            ParamScale::Linear => min + n * (max - min),
            ParamScale::Logarithmic => {
                if min <= 0.0 || max <= 0.0 {
                    // Log mapping needs a strictly positive range
                    min + n * (max - min)
                } else {
                    min * libm::powf(max / min, n)
                }
            }
            ParamScale::Exponential => min + n * n * (max - min),
            ParamScale::Toggle => {
                if n >= 0.5 {
                    max
                } else {
                    min
                }
            }
        }
    }
}

/// A named, bounded control value
///
/// `minimum <= value <= maximum` holds whenever the value is observable;
/// every setter clamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub description: String,
    value: f32,
    minimum: f32,
    maximum: f32,
    default_value: f32,
    pub unit: String,
    pub scale: ParamScale,
    pub is_modulatable: bool,
    pub modulation_amount: f32,
}

impl Parameter {
    /// Create a parameter; `default` is clamped into the range
    pub fn new(name: impl Into<String>, minimum: f32, maximum: f32, default: f32) -> Self {
        let mut parameter = Self {
            name: name.into(),
            description: String::new(),
            value: default,
            minimum: 0.0,
            maximum: 0.0,
            default_value: default,
            unit: String::new(),
            scale: ParamScale::Linear,
            is_modulatable: false,
            modulation_amount: 0.0,
        };
        parameter.set_range(minimum, maximum);
        parameter
    }

    pub fn minimum(&self) -> f32 {
        self.minimum
    }

    pub fn maximum(&self) -> f32 {
        self.maximum
    }

    pub fn default_value(&self) -> f32 {
        self.default_value
    }

    /// Replace the bounds, ordering them and pulling the value and the
    /// default back into range. NaN bounds are ignored.
    pub fn set_range(&mut self, minimum: f32, maximum: f32) {
        if minimum.is_nan() || maximum.is_nan() {
            return;
        }
        let (minimum, maximum) = if minimum <= maximum {
            (minimum, maximum)
        } else {
            (maximum, minimum)
        };
        self.minimum = minimum;
        self.maximum = maximum;
        self.default_value = self.snap(self.bounded(self.default_value));
        self.value = self.snap(self.bounded(self.value));
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_scale(mut self, scale: ParamScale) -> Self {
        self.scale = scale;
        if scale == ParamScale::Toggle {
            self.default_value = self.snap(self.default_value);
            self.value = self.default_value;
        }
        self
    }

    pub fn modulatable(mut self, amount: f32) -> Self {
        self.is_modulatable = true;
        self.modulation_amount = amount;
        self
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    /// Set the value, clamped into range (NaN is ignored)
    pub fn set_value(&mut self, value: f32) {
        if value.is_nan() {
            return;
        }
        self.value = self.snap(self.bounded(value));
    }

    pub fn reset(&mut self) {
        self.value = self.default_value;
    }

    /// Value mapped linearly onto `[0, 1]`; a zero-width range reads as 0
    pub fn normalized(&self) -> f32 {
        let width = self.maximum - self.minimum;
        if width.abs() <= f32::EPSILON {
            return 0.0;
        }
        (self.value - self.minimum) / width
    }

    /// Inverse of [`normalized`](Self::normalized)
    pub fn set_normalized(&mut self, normalized: f32) {
        let n = normalized.clamp(0.0, 1.0);
        self.set_value(self.minimum + n * (self.maximum - self.minimum));
    }

    /// Set from a UI control position, honoring the parameter's scale
    pub fn set_from_control(&mut self, position: f32) {
        let mapped = self.scale.map(position, self.minimum, self.maximum);
        self.set_value(mapped);
    }

    /// Value offset by a modulation signal, clamped into range
    pub fn modulated(&self, cv: f32) -> f32 {
        if !self.is_modulatable {
            return self.value;
        }
        let offset = cv * self.modulation_amount * (self.maximum - self.minimum);
        self.snap(self.bounded(self.value + offset))
    }

    /// Clamp without `f32::clamp`, which panics on unordered bounds
    fn bounded(&self, value: f32) -> f32 {
        if value.is_nan() {
            return self.minimum;
        }
        value.max(self.minimum).min(self.maximum)
    }

    fn snap(&self, value: f32) -> f32 {
        if self.scale != ParamScale::Toggle {
            return value;
        }
        let mid = self.minimum + (self.maximum - self.minimum) * 0.5;
        if value >= mid {
            self.maximum
        } else {
            self.minimum
        }
    }
}
