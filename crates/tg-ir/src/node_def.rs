//! Node definitions as written in node scripts.
//!
//! A script line is `name;type;arg0;arg1;...`. The `type` field may be a
//! long-form alias (`"unit sine"`) or the short tag (`"sinf"`); both are
//! normalised to an [`OpTag`] when the line is parsed.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;
use serde::{Deserialize, Serialize};

/// Per-frame scalars available to every node by name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Coded {
    /// Absolute time in seconds.
    Time,
    /// Seconds since clip start.
    Position,
    /// Fraction of the clip elapsed, `0..1`.
    Rate,
    /// Accumulated phase in cycles.
    Phase,
    /// Clip start time.
    Start,
    /// Clip end time.
    End,
}

impl Coded {
    pub fn from_name(name: &str) -> Option<Coded> {
        match name {
            "time" => Some(Coded::Time),
            "position" => Some(Coded::Position),
            "rate" => Some(Coded::Rate),
            "phase" => Some(Coded::Phase),
            "start" => Some(Coded::Start),
            "end" => Some(Coded::End),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Coded::Time => "time",
            Coded::Position => "position",
            Coded::Rate => "rate",
            Coded::Phase => "phase",
            Coded::Start => "start",
            Coded::End => "end",
        }
    }

    /// Whether this value changes from one sample to the next.
    /// `start`/`end` are fixed for the whole clip.
    pub fn varies_per_frame(self) -> bool {
        !matches!(self, Coded::Start | Coded::End)
    }
}

/// Operator kinds a node can evaluate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpTag {
    Constant,
    Curve,
    PeriodicCurve,
    Harmonics,
    Input,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    SignedPow,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Ln,
    Log,
    Map,
    Envelope,
    Bezier,
    SineBezier,
    ToFreq,
    Round,
    Floor,
    Ceil,
    Min,
    Max,
    Dir,
    CopyDir,
    Greater,
    Less,
    Equal,
    NotEqual,
    GreaterEq,
    LessEq,
    Constrain,
    Relay,
    UnitSine,
    UnitSaw,
    UnitSquare,
    UnitTriangle,
}

/// Argument layout of `harmonics`: the phase input, the spectral envelope
/// curve name, then base, exponent, increment, correction, partial cap,
/// fundamental frequency and frequency cap.
pub const HARMONICS_ARGS: usize = 9;

/// `(long alias, short tag, op)`; the alias column is what the writer emits.
const ALIASES: &[(&str, &str, OpTag)] = &[
    ("constant", "c", OpTag::Constant),
    ("curve", "curve", OpTag::Curve),
    ("periodic curve", "curf", OpTag::PeriodicCurve),
    ("harmonics", "harm", OpTag::Harmonics),
    ("input", "input", OpTag::Input),
    ("add", "+", OpTag::Add),
    ("subtract", "-", OpTag::Sub),
    ("multiply", "*", OpTag::Mul),
    ("divide", "/", OpTag::Div),
    ("modulo", "%", OpTag::Rem),
    ("power", "^", OpTag::Pow),
    ("signed power", "d^", OpTag::SignedPow),
    ("sine", "sin", OpTag::Sin),
    ("cosine", "cos", OpTag::Cos),
    ("tangent", "tan", OpTag::Tan),
    ("arcsine", "asin", OpTag::Asin),
    ("arccosine", "acos", OpTag::Acos),
    ("arctangent", "atan", OpTag::Atan),
    ("hyperbolic sine", "sinh", OpTag::Sinh),
    ("hyperbolic cosine", "cosh", OpTag::Cosh),
    ("hyperbolic tangent", "tanh", OpTag::Tanh),
    ("natural logarithm", "ln", OpTag::Ln),
    ("logarithm", "log", OpTag::Log),
    ("map", "map", OpTag::Map),
    ("envelope", "envelope", OpTag::Envelope),
    ("bezier", "bz", OpTag::Bezier),
    ("sine bezier", "sinbz", OpTag::SineBezier),
    ("to frequency", "tofreq", OpTag::ToFreq),
    ("round", "round", OpTag::Round),
    ("floor", "floor", OpTag::Floor),
    ("ceiling", "ceil", OpTag::Ceil),
    ("minimum", "min", OpTag::Min),
    ("maximum", "max", OpTag::Max),
    ("direction", "dir", OpTag::Dir),
    ("copy direction", "copydir", OpTag::CopyDir),
    ("greater than", ">", OpTag::Greater),
    ("less than", "<", OpTag::Less),
    ("equal", "=", OpTag::Equal),
    ("not equal", "!=", OpTag::NotEqual),
    ("greater or equal", ">=", OpTag::GreaterEq),
    ("less or equal", "<=", OpTag::LessEq),
    ("constrain", "constrain", OpTag::Constrain),
    ("relay", "relay", OpTag::Relay),
    ("unit sine", "sinf", OpTag::UnitSine),
    ("unit sawtooth", "sawf", OpTag::UnitSaw),
    ("unit square", "sqrf", OpTag::UnitSquare),
    ("unit triangle", "trif", OpTag::UnitTriangle),
];

impl OpTag {
    /// Resolve a long alias or short tag (case-insensitive for aliases).
    pub fn from_name(name: &str) -> Option<OpTag> {
        let name = name.trim();
        ALIASES
            .iter()
            .find(|(alias, tag, _)| *tag == name || alias.eq_ignore_ascii_case(name))
            .map(|(_, _, op)| *op)
    }

    /// Short internal tag.
    pub fn tag(self) -> &'static str {
        self.entry().1
    }

    /// Canonical long-form alias.
    pub fn alias(self) -> &'static str {
        self.entry().0
    }

    fn entry(self) -> &'static (&'static str, &'static str, OpTag) {
        // Every variant has a row; the table is checked by a test.
        ALIASES.iter().find(|(_, _, op)| *op == self).unwrap_or(&ALIASES[0])
    }

    /// `(min, max)` argument count; `None` max means variadic.
    pub fn arity(self) -> (usize, Option<usize>) {
        use OpTag::*;
        match self {
            Constant | Input | Relay => (1, Some(1)),
            Curve | PeriodicCurve => (2, Some(2)),
            Harmonics => (HARMONICS_ARGS, Some(HARMONICS_ARGS)),
            Add | Mul | Min | Max => (1, None),
            Sub | Div => (1, None),
            Rem | Pow | SignedPow | CopyDir => (2, Some(2)),
            Greater | Less | Equal | NotEqual | GreaterEq | LessEq => (2, Some(2)),
            Sin | Cos | Tan | Asin | Acos | Atan | Sinh | Cosh | Tanh | Ln => (1, Some(1)),
            Log => (1, Some(2)),
            Round | Floor | Ceil | Dir | ToFreq => (1, Some(1)),
            UnitSine | UnitSaw | UnitSquare | UnitTriangle => (1, Some(1)),
            Map => (5, Some(5)),
            Envelope => (3, Some(3)),
            Bezier | SineBezier => (2, None),
            Constrain => (3, Some(3)),
        }
    }

    /// Whether argument `index` is a bare name (curve or input name, or a
    /// literal) rather than a value reference.
    pub fn is_name_arg(self, index: usize) -> bool {
        match self {
            OpTag::Constant | OpTag::Input => index == 0,
            OpTag::Curve | OpTag::PeriodicCurve => index == 0,
            OpTag::Harmonics => index == 1,
            _ => false,
        }
    }

    /// All operators, in table order.
    pub fn all() -> impl Iterator<Item = OpTag> {
        ALIASES.iter().map(|(_, _, op)| *op)
    }
}

/// Error for a single malformed script line.
#[derive(Clone, Debug, PartialEq)]
pub enum ScriptError {
    /// The line has no name field.
    EmptyName,
    /// The name shadows a per-frame input (`time`, `phase`, ...) or reads
    /// as a number (`nan`, `inf`, `1e3`).
    ReservedName(String),
    /// The type field matches no alias or tag.
    UnknownType(String),
    /// Wrong number of arguments for the operator.
    Arity { op: OpTag, found: usize },
    /// A `constant` argument that is not a number.
    BadLiteral(String),
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptError::EmptyName => write!(f, "missing node name"),
            ScriptError::ReservedName(n) => write!(f, "node name '{}' is reserved", n),
            ScriptError::UnknownType(t) => write!(f, "unknown node type '{}'", t),
            ScriptError::Arity { op, found } => {
                let (min, max) = op.arity();
                match max {
                    Some(max) if max == min => {
                        write!(f, "'{}' takes {} argument(s), found {}", op.alias(), min, found)
                    }
                    Some(max) => write!(
                        f,
                        "'{}' takes {}..={} arguments, found {}",
                        op.alias(),
                        min,
                        max,
                        found
                    ),
                    None => write!(f, "'{}' takes at least {} argument(s), found {}", op.alias(), min, found),
                }
            }
            ScriptError::BadLiteral(s) => write!(f, "'{}' is not a number", s),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ScriptError {}

/// One node as written in a script.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
    pub name: String,
    pub op: OpTag,
    pub args: Vec<String>,
}

impl NodeDef {
    pub fn new(name: &str, op: OpTag, args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            op,
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Parse one `name;type;args...` line.
    pub fn parse_line(line: &str) -> Result<NodeDef, ScriptError> {
        let mut fields = line.split(';').map(str::trim);
        let name = fields.next().unwrap_or("");
        if name.is_empty() {
            return Err(ScriptError::EmptyName);
        }
        // arguments resolve as numbers first, so such a name is unreachable
        if Coded::from_name(name).is_some() || name.parse::<f64>().is_ok() {
            return Err(ScriptError::ReservedName(name.to_string()));
        }
        let type_field = fields.next().unwrap_or("");
        let op = OpTag::from_name(type_field)
            .ok_or_else(|| ScriptError::UnknownType(type_field.to_string()))?;

        let args: Vec<String> = fields.map(|s| s.to_string()).collect();
        let (min, max) = op.arity();
        if args.len() < min || max.is_some_and(|m| args.len() > m) {
            return Err(ScriptError::Arity { op, found: args.len() });
        }
        if op == OpTag::Constant && args[0].parse::<f64>().is_err() {
            return Err(ScriptError::BadLiteral(args[0].clone()));
        }

        Ok(NodeDef {
            name: name.to_string(),
            op,
            args,
        })
    }

    /// Render as a script line using the long-form alias.
    pub fn to_line(&self) -> String {
        let mut line = String::with_capacity(self.name.len() + 16);
        line.push_str(&self.name);
        line.push(';');
        line.push_str(self.op.alias());
        for arg in &self.args {
            line.push(';');
            line.push_str(arg);
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_alias_round_trips_to_its_tag() {
        for op in OpTag::all() {
            assert_eq!(OpTag::from_name(op.alias()), Some(op));
            assert_eq!(OpTag::from_name(op.tag()), Some(op));
        }
    }

    #[test]
    fn aliases_are_unique() {
        let ops: Vec<OpTag> = OpTag::all().collect();
        for (i, a) in ops.iter().enumerate() {
            assert!(!ops[i + 1..].contains(a), "{:?} listed twice", a);
        }
        assert_eq!(ops.len(), 47);
    }

    #[test]
    fn parse_long_alias_normalises_to_tag() {
        let def = NodeDef::parse_line("osc; unit sine ;t").unwrap();
        assert_eq!(def.op, OpTag::UnitSine);
        assert_eq!(def.op.tag(), "sinf");
        assert_eq!(def.args, vec!["t".to_string()]);
    }

    #[test]
    fn parse_rejects_unknown_type() {
        assert_eq!(
            NodeDef::parse_line("x;wobble;1"),
            Err(ScriptError::UnknownType("wobble".into()))
        );
    }

    #[test]
    fn parse_checks_arity_and_literals() {
        assert!(matches!(
            NodeDef::parse_line("x;map;1;2"),
            Err(ScriptError::Arity { op: OpTag::Map, found: 2 })
        ));
        assert_eq!(
            NodeDef::parse_line("x;c;abc"),
            Err(ScriptError::BadLiteral("abc".into()))
        );
        assert_eq!(NodeDef::parse_line(";c;1"), Err(ScriptError::EmptyName));
        assert_eq!(
            NodeDef::parse_line("phase;c;1"),
            Err(ScriptError::ReservedName("phase".into()))
        );
        for name in ["nan", "inf", "Infinity", "-inf", "1e3", "2"] {
            assert_eq!(
                NodeDef::parse_line(&format!("{};c;1", name)),
                Err(ScriptError::ReservedName(name.into()))
            );
        }
        assert!(NodeDef::parse_line("nan2;c;1").is_ok());
    }

    #[test]
    fn to_line_uses_alias() {
        let def = NodeDef::new("sum", OpTag::Add, &["a", "b"]);
        assert_eq!(def.to_line(), "sum;add;a;b");
        assert_eq!(NodeDef::parse_line(&def.to_line()).unwrap(), def);
    }

    #[test]
    fn coded_inputs_that_vary() {
        assert!(Coded::Phase.varies_per_frame());
        assert!(!Coded::Start.varies_per_frame());
        assert_eq!(Coded::from_name("rate"), Some(Coded::Rate));
        assert_eq!(Coded::from_name("rates"), None);
    }
}
