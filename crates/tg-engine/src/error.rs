//! Error types for graph evaluation and runtime construction.

use std::fmt;
use tg_ir::{CurveError, ScriptError};

/// Failure while compiling or evaluating a node graph.
#[derive(Clone, Debug, PartialEq)]
pub enum EvalError {
    /// A referenced node or clip input does not exist.
    KeyNotFound(String),
    /// A node depends on itself, directly or transitively.
    Cycle(String),
    /// A curve lookup names a curve the graph does not hold.
    UnknownCurve(String),
    /// `set_constant` on a node that is not a constant.
    NotConstant(String),
    /// A node definition is invalid for its operator.
    Malformed { node: String, reason: ScriptError },
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::KeyNotFound(name) => write!(f, "no node or input named '{}'", name),
            EvalError::Cycle(name) => write!(f, "node '{}' depends on itself", name),
            EvalError::UnknownCurve(name) => write!(f, "no curve named '{}'", name),
            EvalError::NotConstant(name) => write!(f, "node '{}' is not a constant", name),
            EvalError::Malformed { node, reason } => write!(f, "node '{}': {}", node, reason),
        }
    }
}

impl std::error::Error for EvalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EvalError::Malformed { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// Failure while building a runtime composition from its state.
#[derive(Clone, Debug, PartialEq)]
pub enum BuildError {
    /// A pattern names a synthesizer that is not registered.
    UnknownSynth { pattern: String, synth: String },
    /// A placement names a pattern that does not exist.
    UnknownPattern(String),
    /// A synthesizer's node graph failed to compile.
    Graph { synth: String, source: EvalError },
    /// A synthesizer's curve has invalid points.
    Curve { synth: String, curve: String, source: CurveError },
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::UnknownSynth { pattern, synth } => {
                write!(f, "pattern '{}' uses unknown synthesizer '{}'", pattern, synth)
            }
            BuildError::UnknownPattern(name) => write!(f, "unknown pattern '{}'", name),
            BuildError::Graph { synth, source } => {
                write!(f, "synthesizer '{}': {}", synth, source)
            }
            BuildError::Curve { synth, curve, source } => {
                write!(f, "synthesizer '{}', curve '{}': {}", synth, curve, source)
            }
        }
    }
}

impl std::error::Error for BuildError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BuildError::Graph { source, .. } => Some(source),
            BuildError::Curve { source, .. } => Some(source),
            _ => None,
        }
    }
}
