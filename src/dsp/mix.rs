//! Summing and stereo channel routing.

/*
Channel Routing
===============

A stereo bus carries two blocks, left and right. Routing decides which input
block ends up in which output block:

    Stereo   L → L, R → R        pass through
    Swap     L → R, R → L        mirror the image
    Mono     (L + R) / 2 → both  fold down, keeps level for correlated input
    Left     L → both
    Right    R → both

The mono fold halves the sum. Two identical channels then come out at the
same level they went in, uncorrelated channels lose about 3 dB.
*/

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelMode {
    #[default]
    Stereo,
    Swap,
    Mono,
    Left,
    Right,
}

impl ChannelMode {
    pub const ALL: [ChannelMode; 5] = [Self::Stereo, Self::Swap, Self::Mono, Self::Left, Self::Right];

    /// Mode for a choice parameter index, out of range falls back to stereo.
    pub fn from_index(index: usize) -> Self {
        Self::ALL.get(index).copied().unwrap_or_default()
    }

    pub fn ident(self) -> &'static str {
        match self {
            Self::Stereo => "stereo",
            Self::Swap => "swap",
            Self::Mono => "mono",
            Self::Left => "left",
            Self::Right => "right",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Stereo => "Stereo",
            Self::Swap => "Swap",
            Self::Mono => "Mono",
            Self::Left => "Left Only",
            Self::Right => "Right Only",
        }
    }
}

/// Route a stereo pair into `out_left`/`out_right` according to `mode`.
pub fn route(mode: ChannelMode, left: &[f32], right: &[f32], out_left: &mut [f32], out_right: &mut [f32]) {
    debug_assert_eq!(left.len(), right.len());
    match mode {
        ChannelMode::Stereo => {
            out_left.copy_from_slice(left);
            out_right.copy_from_slice(right);
        }
        ChannelMode::Swap => {
            out_left.copy_from_slice(right);
            out_right.copy_from_slice(left);
        }
        ChannelMode::Mono => {
            for (((ol, or), &l), &r) in out_left.iter_mut().zip(out_right.iter_mut()).zip(left).zip(right) {
                let m = 0.5 * (l + r);
                *ol = m;
                *or = m;
            }
        }
        ChannelMode::Left => {
            out_left.copy_from_slice(left);
            out_right.copy_from_slice(left);
        }
        ChannelMode::Right => {
            out_left.copy_from_slice(right);
            out_right.copy_from_slice(right);
        }
    }
}

/// Add `b` into `a`.
#[inline]
pub fn sum_in_place(a: &mut [f32], b: &[f32]) {
    debug_assert_eq!(a.len(), b.len());
    for (x, &y) in a.iter_mut().zip(b) {
        *x += y;
    }
}

/// Peak absolute sample value.
pub fn peak(block: &[f32]) -> f32 {
    block.iter().fold(0.0, |peak, s| peak.max(s.abs()))
}
