//! Pure scalar operators.
//!
//! Every function here is a plain function of already-resolved argument
//! values. Nothing is guarded: division by zero, logs of non-positive
//! values and the like produce IEEE NaN/Infinity, which propagate into
//! the rendered audio.

use std::f64::consts::TAU;

use tg_ir::{bezier, pitch_to_freq, sine_bezier, Curve, OpTag};

/// Apply a value operator to its argument values.
///
/// Missing arguments read as 0; the graph checks arity when it compiles.
/// Name-taking operators (`constant`, `input`, curve lookups,
/// `harmonics`) are evaluated by the graph itself and read as 0 here.
pub fn apply(op: OpTag, args: &[f64]) -> f64 {
    let at = |i: usize| args.get(i).copied().unwrap_or(0.0);
    let (a, b) = (at(0), at(1));
    match op {
        OpTag::Add => args.iter().sum(),
        OpTag::Sub => match args {
            [x] => -x,
            [x, rest @ ..] => rest.iter().fold(*x, |acc, v| acc - v),
            [] => 0.0,
        },
        OpTag::Mul => args.iter().product(),
        OpTag::Div => match args {
            [x] => 1.0 / x,
            [x, rest @ ..] => rest.iter().fold(*x, |acc, v| acc / v),
            [] => 0.0,
        },
        OpTag::Rem => a % b,
        OpTag::Pow => a.powf(b),
        OpTag::SignedPow => signed_pow(a, b),

        OpTag::Sin => a.sin(),
        OpTag::Cos => a.cos(),
        OpTag::Tan => a.tan(),
        OpTag::Asin => a.asin(),
        OpTag::Acos => a.acos(),
        OpTag::Atan => a.atan(),
        OpTag::Sinh => a.sinh(),
        OpTag::Cosh => a.cosh(),
        OpTag::Tanh => a.tanh(),
        OpTag::Ln => a.ln(),
        OpTag::Log => {
            if args.len() > 1 {
                a.log(b)
            } else {
                a.log10()
            }
        }

        OpTag::Map => map_range(a, b, at(2), at(3), at(4)),
        OpTag::Envelope => envelope(a, b, at(2)),
        OpTag::Bezier => match args.split_last() {
            Some((t, points)) => bezier(points, *t),
            None => 0.0,
        },
        OpTag::SineBezier => match args.split_last() {
            Some((t, points)) => sine_bezier(points, *t),
            None => 0.0,
        },
        OpTag::ToFreq => pitch_to_freq(a),

        OpTag::Round => a.round(),
        OpTag::Floor => a.floor(),
        OpTag::Ceil => a.ceil(),
        OpTag::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
        OpTag::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        OpTag::Dir => direction(a),
        OpTag::CopyDir => a.abs() * direction(b),

        OpTag::Greater => truth(a > b),
        OpTag::Less => truth(a < b),
        OpTag::Equal => truth(a == b),
        OpTag::NotEqual => truth(a != b),
        OpTag::GreaterEq => truth(a >= b),
        OpTag::LessEq => truth(a <= b),
        OpTag::Constrain => a.max(b).min(at(2)),
        OpTag::Relay => a,

        OpTag::UnitSine => (TAU * a).sin(),
        OpTag::UnitSaw => 2.0 * (a + 0.5 - (a + 0.5).floor()) - 1.0,
        OpTag::UnitSquare => {
            if a - a.floor() < 0.5 {
                1.0
            } else {
                -1.0
            }
        }
        OpTag::UnitTriangle => {
            let shifted = a + 0.25;
            1.0 - 4.0 * (shifted - shifted.floor() - 0.5).abs()
        }

        OpTag::Constant
        | OpTag::Input
        | OpTag::Curve
        | OpTag::PeriodicCurve
        | OpTag::Harmonics => 0.0,
    }
}

fn truth(cond: bool) -> f64 {
    if cond {
        1.0
    } else {
        0.0
    }
}

/// -1, 0 or 1; NaN stays NaN.
fn direction(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        x * 0.0
    }
}

/// `|x|^e` carrying the sign of `x`.
fn signed_pow(x: f64, e: f64) -> f64 {
    direction(x) * x.abs().powf(e)
}

/// Linear remap of `x` from `[in_lo, in_hi]` to `[out_lo, out_hi]`.
fn map_range(x: f64, in_lo: f64, in_hi: f64, out_lo: f64, out_hi: f64) -> f64 {
    out_lo + (x - in_lo) * (out_hi - out_lo) / (in_hi - in_lo)
}

/// Trapezoid over a `0..1` rate: ramps up across `attack`, holds at 1,
/// ramps down across the final `release`.
fn envelope(rate: f64, attack: f64, release: f64) -> f64 {
    let rise = if attack > 0.0 { rate / attack } else { 1.0 };
    let fall = if release > 0.0 { (1.0 - rate) / release } else { 1.0 };
    rise.min(fall).clamp(0.0, 1.0)
}

/// Upper bound on partials regardless of the node's own cap.
pub const MAX_PARTIALS: usize = 4096;

/// Parameters of one `harmonics` evaluation, in argument order after
/// the curve name.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Harmonics {
    /// Phase in cycles of the fundamental.
    pub x: f64,
    pub base: f64,
    pub exponent: f64,
    /// Step between partial numbers; 1 gives every harmonic, 2 odd ones.
    pub increment: f64,
    /// How far partial numbers are stretched by the increment (0..1).
    pub correction: f64,
    pub max_partials: f64,
    pub fundamental: f64,
    pub max_freq: f64,
}

impl Harmonics {
    /// Sum of partials `k = 1, 1 + increment, ...`.
    ///
    /// Each partial number is corrected to
    /// `k' = k * (1 + (increment - 1) * correction)` and contributes
    /// `sin(2π x k') * curve(k') * base^k' / k'^exponent`. Summation stops
    /// after `max_partials` terms or once `fundamental * k'` exceeds
    /// `max_freq`.
    pub fn sum(&self, curve: &Curve) -> f64 {
        let cap = if self.max_partials.is_nan() {
            0
        } else {
            self.max_partials.clamp(0.0, MAX_PARTIALS as f64) as usize
        };
        let stretch = 1.0 + (self.increment - 1.0) * self.correction;

        let mut total = 0.0;
        for n in 0..cap {
            let k = 1.0 + n as f64 * self.increment;
            let corrected = k * stretch;
            if self.fundamental * corrected > self.max_freq {
                break;
            }
            let weight =
                curve.value_at(corrected) * self.base.powf(corrected) / corrected.powf(self.exponent);
            total += (TAU * self.x * corrected).sin() * weight;
        }
        total
    }
}
