//! Processor parameters.
//!
//! A parameter is declared once while its processor initializes and lives
//! for the lifetime of the processor. The control thread writes values with
//! `set_param`, the render thread reads them with `get_param`. Values are
//! stored as `f64` bits in an `AtomicU64`, next to two flags:
//!
//! - `DIRTY`: set on every value change, cleared when the render thread
//!   fetches the value. Fresh parameters start dirty so processors see their
//!   initial values through `adjust_param`.
//! - `CHANGED`: set on every value change, cleared when the control thread
//!   drains notifications. Only the first change after a drain needs to
//!   enqueue a notification.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Stable parameter identifier, unique within one processor.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(pub u32);

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "param#{}", self.0)
    }
}

/// One entry of a choice parameter.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceEntry {
    pub ident: String,
    pub label: String,
}

impl ChoiceEntry {
    pub fn new(ident: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            ident: ident.into(),
            label: label.into(),
        }
    }
}

/// Static parameter metadata.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct ParamInfo {
    pub ident: String,
    pub label: String,
    pub nick: String,
    pub unit: String,
    pub min: f64,
    pub max: f64,
    /// Quantization step, 0 for continuous values.
    pub step: f64,
    pub initial: f64,
    /// Non-empty for choice and toggle parameters.
    pub choices: Vec<ChoiceEntry>,
    pub toggle: bool,
}

impl ParamInfo {
    /// A continuous parameter in `min ..= max`.
    pub fn range(ident: &str, label: &str, nick: &str, initial: f64, min: f64, max: f64) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            ident: ident.to_owned(),
            label: label.to_owned(),
            nick: nick.to_owned(),
            unit: String::new(),
            min,
            max,
            step: 0.0,
            initial: initial.clamp(min, max),
            choices: Vec::new(),
            toggle: false,
        }
    }

    /// An enumeration, stored as the selected index.
    pub fn choice(ident: &str, label: &str, nick: &str, initial: usize, choices: Vec<ChoiceEntry>) -> Self {
        let last = choices.len().saturating_sub(1) as f64;
        Self {
            step: 1.0,
            choices,
            ..Self::range(ident, label, nick, initial as f64, 0.0, last)
        }
    }

    /// An Off/On switch, a two entry choice.
    pub fn toggle(ident: &str, label: &str, nick: &str, initial: bool) -> Self {
        let choices = vec![ChoiceEntry::new("off", "Off"), ChoiceEntry::new("on", "On")];
        Self {
            toggle: true,
            ..Self::choice(ident, label, nick, initial as usize, choices)
        }
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = unit.to_owned();
        self
    }

    pub fn with_step(mut self, step: f64) -> Self {
        self.step = step.max(0.0);
        self.initial = self.constrain(self.initial);
        self
    }

    pub fn is_choice(&self) -> bool {
        !self.choices.is_empty()
    }

    /// Clamp into range and quantize to the step, rounding halfway cases down.
    pub fn constrain(&self, value: f64) -> f64 {
        if value.is_nan() {
            return self.initial;
        }
        let v = value.clamp(self.min, self.max);
        if self.step <= 0.0 {
            return v;
        }
        const NEARINT_OFFSET: f64 = 0.5 - f64::EPSILON;
        let steps = ((v - self.min) / self.step + NEARINT_OFFSET).floor();
        (self.min + self.step * steps).clamp(self.min, self.max)
    }

    pub fn value_to_normalized(&self, value: f64) -> f64 {
        let span = self.max - self.min;
        if span <= 0.0 {
            return 0.0;
        }
        ((value - self.min) / span).clamp(0.0, 1.0)
    }

    pub fn value_from_normalized(&self, normalized: f64) -> f64 {
        let normalized = if normalized >= 0.0 { normalized.min(1.0) } else { 0.0 };
        self.min + normalized * (self.max - self.min)
    }

    /// Display text like `"-6.0 dB"`, `"1.25 kHz"` or a choice label.
    pub fn value_to_text(&self, value: f64) -> String {
        if self.is_choice() {
            let index = self.constrain(value) as usize;
            return self.choices[index.min(self.choices.len() - 1)].label.clone();
        }
        let mut val = value;
        let mut unit = self.unit.as_str();
        if unit == "Hz" && val.abs() >= 1000.0 {
            unit = "kHz";
            val /= 1000.0;
        }
        let fdigits = if val.abs() < 10.0 {
            2
        } else if val.abs() < 100.0 {
            1
        } else {
            0
        };
        let mut text = if self.min < 0.0 {
            format!("{val:+.fdigits$}")
        } else {
            format!("{val:.fdigits$}")
        };
        if !unit.is_empty() {
            text.push(' ');
            text.push_str(unit);
        }
        text
    }

    /// Parse a choice ident/label or a leading number, constrained.
    pub fn value_from_text(&self, text: &str) -> f64 {
        let text = text.trim();
        if self.is_choice() {
            return self
                .choices
                .iter()
                .position(|c| c.ident.eq_ignore_ascii_case(text) || c.label.eq_ignore_ascii_case(text))
                .map_or(0.0, |index| index as f64);
        }
        let end = text
            .char_indices()
            .find(|&(i, c)| !(c.is_ascii_digit() || c == '.' || (i == 0 && (c == '-' || c == '+'))))
            .map_or(text.len(), |(i, _)| i);
        let mut value: f64 = text[..end].parse().unwrap_or(self.initial);
        if text[end..].trim_start().starts_with("kHz") {
            value *= 1000.0;
        }
        self.constrain(value)
    }
}

const DIRTY: u32 = 1;
const CHANGED: u32 = 2;

/// Runtime state of one parameter.
#[derive(Debug)]
pub struct Param {
    pub id: ParamId,
    pub info: ParamInfo,
    value: AtomicU64,
    flags: AtomicU32,
}

impl Param {
    pub(crate) fn new(id: ParamId, info: ParamInfo) -> Self {
        let value = AtomicU64::new(info.initial.to_bits());
        Self {
            id,
            info,
            value,
            flags: AtomicU32::new(DIRTY),
        }
    }

    pub fn peek(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Acquire))
    }

    /// Read the value and clear the dirty flag.
    pub fn fetch_and_clean(&self) -> f64 {
        self.flags.fetch_and(!DIRTY, Ordering::AcqRel);
        self.peek()
    }

    pub fn dirty(&self) -> bool {
        self.flags.load(Ordering::Acquire) & DIRTY != 0
    }

    pub fn changed(&self) -> bool {
        self.flags.load(Ordering::Acquire) & CHANGED != 0
    }

    /// Clear the changed flag, returns whether it was set.
    pub(crate) fn take_changed(&self) -> bool {
        self.flags.fetch_and(!CHANGED, Ordering::AcqRel) & CHANGED != 0
    }

    /// Store an already constrained value. Returns `true` if this is the
    /// first change since the last drain and a notification is needed.
    pub(crate) fn assign(&self, value: f64) -> bool {
        let old = f64::from_bits(self.value.swap(value.to_bits(), Ordering::AcqRel));
        if old.to_bits() == value.to_bits() {
            return false;
        }
        let prev = self.flags.fetch_or(DIRTY | CHANGED, Ordering::AcqRel);
        prev & CHANGED == 0
    }
}
