//! Named scalar dataflow graph, evaluated once per output sample.
//!
//! Nodes are kept in a `Vec` with a name index. Compiling resolves every
//! argument string to a literal, a per-frame input or a node index, rejects
//! cycles, and records which nodes must be re-derived on every frame. A
//! node is per-frame when it reads `time`/`position`/`rate`/`phase`,
//! directly or through any of its arguments; constants and plain inputs
//! never are. Each node memoizes its value behind a dirty flag.

use std::collections::HashMap;

use tg_ir::{Coded, Curve, NodeDef, OpTag, ScriptError, HARMONICS_ARGS};
use tracing::debug;

use crate::error::EvalError;
use crate::ops::{self, Harmonics};

/// Transient per-frame scalars, set by the clip renderer.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Frame {
    /// Absolute time in seconds.
    pub time: f64,
    /// Seconds since clip start.
    pub position: f64,
    /// Fraction of the clip elapsed.
    pub rate: f64,
    /// Accumulated phase in cycles.
    pub phase: f64,
}

/// Inputs supplied by the clip currently rendering.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UserInputs {
    pub start: f64,
    pub end: f64,
    pub values: HashMap<String, f64>,
}

/// A resolved argument.
#[derive(Clone, Copy, Debug, PartialEq)]
enum Arg {
    Literal(f64),
    Coded(Coded),
    Node(usize),
    /// Names nothing in the graph; evaluating it fails.
    Missing,
}

#[derive(Clone, Debug, Default)]
enum Compiled {
    /// Placeholder for nodes not compiled yet.
    #[default]
    Pending,
    Constant(f64),
    Coded(Coded),
    /// Clip input named by the node's first argument.
    Input,
    /// Lookup in the curve named by the first argument.
    Curve { periodic: bool, x: Arg },
    /// Phase plus the seven numeric parameters; curve name is argument 1.
    Harmonics([Arg; HARMONICS_ARGS - 1]),
    Apply(OpTag, Vec<Arg>),
}

impl Compiled {
    fn args(&self) -> &[Arg] {
        match self {
            Compiled::Pending | Compiled::Constant(_) | Compiled::Coded(_) | Compiled::Input => &[],
            Compiled::Curve { x, .. } => std::slice::from_ref(x),
            Compiled::Harmonics(args) => args,
            Compiled::Apply(_, args) => args,
        }
    }
}

/// Script argument position of `Compiled::Harmonics` slot `k`.
fn harmonics_position(k: usize) -> usize {
    if k == 0 {
        0
    } else {
        k + 1
    }
}

#[derive(Clone, Debug)]
struct Node {
    def: NodeDef,
    compiled: Compiled,
    per_frame: bool,
    /// Nodes that take this one as a direct argument.
    dependents: Vec<usize>,
    value: f64,
    dirty: bool,
    /// Reused argument buffer.
    scratch: Vec<f64>,
}

impl Node {
    fn new(def: NodeDef) -> Self {
        Self {
            def,
            compiled: Compiled::Pending,
            per_frame: false,
            dependents: Vec::new(),
            value: 0.0,
            dirty: true,
            scratch: Vec::new(),
        }
    }
}

/// A named dataflow graph of scalar operators.
///
/// Evaluation state (`Frame`, `UserInputs`, cached values) lives in the
/// graph itself, so one graph instance renders one clip at a time. Voices
/// each hold their own clone.
#[derive(Clone, Debug, Default)]
pub struct NodeGraph {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    curves: HashMap<String, Curve>,
    per_frame: Vec<usize>,
    compiled: bool,
    frame: Frame,
    user: UserInputs,
    recalcs: u64,
}

impl NodeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and compile a graph from node definitions.
    pub fn from_defs<I: IntoIterator<Item = NodeDef>>(defs: I) -> Result<Self, EvalError> {
        let mut graph = Self::new();
        graph.import(defs)?;
        Ok(graph)
    }

    /// Add or replace nodes by name, then recompile.
    pub fn import<I: IntoIterator<Item = NodeDef>>(&mut self, defs: I) -> Result<(), EvalError> {
        for def in defs {
            self.insert(def);
        }
        self.recompile()
    }

    /// Add a node, replacing any node of the same name. The graph is
    /// recompiled before the next evaluation.
    pub fn insert(&mut self, def: NodeDef) -> Option<NodeDef> {
        self.compiled = false;
        match self.index.get(&def.name) {
            Some(&i) => Some(std::mem::replace(&mut self.nodes[i], Node::new(def)).def),
            None => {
                self.index.insert(def.name.clone(), self.nodes.len());
                self.nodes.push(Node::new(def));
                None
            }
        }
    }

    /// Remove a node by name. Nodes that referenced it fail to evaluate
    /// until it is replaced. The graph is recompiled before the next
    /// evaluation.
    pub fn remove_node(&mut self, name: &str) -> Option<NodeDef> {
        let idx = self.index.remove(name)?;
        let node = self.nodes.remove(idx);
        for i in self.index.values_mut() {
            if *i > idx {
                *i -= 1;
            }
        }
        // indices shifted; rebuilt by the next recompile
        self.per_frame.clear();
        self.compiled = false;
        Some(node.def)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node names in insertion order.
    pub fn node_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.nodes.iter().map(|n| n.def.name.as_str())
    }

    /// Node definitions in insertion order.
    pub fn defs(&self) -> impl Iterator<Item = &NodeDef> + '_ {
        self.nodes.iter().map(|n| &n.def)
    }

    pub fn node(&self, name: &str) -> Option<&NodeDef> {
        self.index.get(name).map(|&i| &self.nodes[i].def)
    }

    /// Add or replace a named curve.
    pub fn set_curve(&mut self, name: &str, curve: Curve) {
        self.curves.insert(name.to_string(), curve);
        self.invalidate_all();
    }

    pub fn curve(&self, name: &str) -> Option<&Curve> {
        self.curves.get(name)
    }

    pub fn curve_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.curves.keys().map(String::as_str)
    }

    /// Resolve arguments, check for cycles and recompute which nodes
    /// update per frame. Marks every node dirty.
    pub fn recompile(&mut self) -> Result<(), EvalError> {
        self.compiled = false;
        for i in 0..self.nodes.len() {
            let compiled = self.compile_node(i)?;
            let node = &mut self.nodes[i];
            node.compiled = compiled;
            node.dependents.clear();
        }

        let per_frame = self.mark_per_frame()?;
        self.per_frame.clear();
        for (i, varies) in per_frame.into_iter().enumerate() {
            self.nodes[i].per_frame = varies;
            if varies {
                self.per_frame.push(i);
            }
        }

        let edges: Vec<(usize, usize)> = self
            .nodes
            .iter()
            .enumerate()
            .flat_map(|(i, node)| {
                node.compiled.args().iter().filter_map(move |arg| match arg {
                    Arg::Node(j) => Some((*j, i)),
                    _ => None,
                })
            })
            .collect();
        for (j, i) in edges {
            if !self.nodes[j].dependents.contains(&i) {
                self.nodes[j].dependents.push(i);
            }
        }

        self.invalidate_all();
        self.compiled = true;
        debug!(
            nodes = self.nodes.len(),
            per_frame = self.per_frame.len(),
            "compiled node graph"
        );
        Ok(())
    }

    fn compile_node(&self, i: usize) -> Result<Compiled, EvalError> {
        let def = &self.nodes[i].def;
        let malformed = |reason| EvalError::Malformed {
            node: def.name.clone(),
            reason,
        };
        let (min, max) = def.op.arity();
        if def.args.len() < min || max.is_some_and(|m| def.args.len() > m) {
            return Err(malformed(ScriptError::Arity {
                op: def.op,
                found: def.args.len(),
            }));
        }

        let arg = |k: usize| self.resolve(&def.args[k]);
        Ok(match def.op {
            OpTag::Constant => {
                let value = def.args[0]
                    .trim()
                    .parse()
                    .map_err(|_| malformed(ScriptError::BadLiteral(def.args[0].clone())))?;
                Compiled::Constant(value)
            }
            OpTag::Input => match Coded::from_name(&def.args[0]) {
                Some(c) => Compiled::Coded(c),
                None => Compiled::Input,
            },
            OpTag::Curve | OpTag::PeriodicCurve => Compiled::Curve {
                periodic: def.op == OpTag::PeriodicCurve,
                x: arg(1),
            },
            OpTag::Harmonics => {
                Compiled::Harmonics(std::array::from_fn(|k| arg(harmonics_position(k))))
            }
            op => Compiled::Apply(op, (0..def.args.len()).map(arg).collect()),
        })
    }

    fn resolve(&self, raw: &str) -> Arg {
        let raw = raw.trim();
        if let Ok(v) = raw.parse::<f64>() {
            Arg::Literal(v)
        } else if let Some(c) = Coded::from_name(raw) {
            Arg::Coded(c)
        } else if let Some(&j) = self.index.get(raw) {
            Arg::Node(j)
        } else {
            Arg::Missing
        }
    }

    /// One depth-first pass over the whole graph.
    fn mark_per_frame(&self) -> Result<Vec<bool>, EvalError> {
        let n = self.nodes.len();
        let mut marks = vec![Mark::Unvisited; n];
        let mut per_frame = vec![false; n];
        for i in 0..n {
            self.visit(i, &mut marks, &mut per_frame)?;
        }
        Ok(per_frame)
    }

    fn visit(&self, i: usize, marks: &mut [Mark], per_frame: &mut [bool]) -> Result<bool, EvalError> {
        match marks[i] {
            Mark::Done => return Ok(per_frame[i]),
            Mark::Visiting => return Err(EvalError::Cycle(self.nodes[i].def.name.clone())),
            Mark::Unvisited => {}
        }
        marks[i] = Mark::Visiting;

        let compiled = &self.nodes[i].compiled;
        let mut varies = matches!(compiled, Compiled::Coded(c) if c.varies_per_frame());
        for arg in compiled.args() {
            match *arg {
                Arg::Coded(c) => varies |= c.varies_per_frame(),
                Arg::Node(j) => varies |= self.visit(j, marks, per_frame)?,
                Arg::Literal(_) | Arg::Missing => {}
            }
        }

        marks[i] = Mark::Done;
        per_frame[i] = varies;
        Ok(varies)
    }

    /// Whether `name` is re-derived on every frame. `None` for unknown
    /// names or before the graph is compiled.
    pub fn is_per_frame(&self, name: &str) -> Option<bool> {
        if !self.compiled {
            return None;
        }
        self.index.get(name).map(|&i| self.nodes[i].per_frame)
    }

    /// Replace a constant's value, invalidating exactly the nodes that
    /// depend on it.
    pub fn set_constant(&mut self, name: &str, value: f64) -> Result<(), EvalError> {
        let idx = *self
            .index
            .get(name)
            .ok_or_else(|| EvalError::KeyNotFound(name.to_string()))?;
        let node = &mut self.nodes[idx];
        if node.def.op != OpTag::Constant {
            return Err(EvalError::NotConstant(name.to_string()));
        }
        node.def.args[0] = value.to_string();
        if self.compiled {
            node.compiled = Compiled::Constant(value);
            self.invalidate_from(idx);
        }
        Ok(())
    }

    fn invalidate_from(&mut self, root: usize) {
        self.nodes[root].dirty = true;
        let mut stack = self.nodes[root].dependents.clone();
        while let Some(i) = stack.pop() {
            let node = &mut self.nodes[i];
            if node.dirty {
                continue;
            }
            node.dirty = true;
            stack.extend_from_slice(&node.dependents);
        }
    }

    fn invalidate_all(&mut self) {
        for node in &mut self.nodes {
            node.dirty = true;
        }
    }

    /// Bind the inputs of the clip about to render. Every cached value
    /// is dropped.
    pub fn set_user(&mut self, user: UserInputs) {
        self.user = user;
        self.invalidate_all();
    }

    pub fn user(&self) -> &UserInputs {
        &self.user
    }

    /// Start a new frame: store the transient scalars and invalidate every
    /// per-frame node.
    pub fn set_frame(&mut self, frame: Frame) {
        self.frame = frame;
        for &i in &self.per_frame {
            self.nodes[i].dirty = true;
        }
    }

    pub fn frame(&self) -> Frame {
        self.frame
    }

    /// Number of node recomputations since the last reset.
    pub fn recalc_count(&self) -> u64 {
        self.recalcs
    }

    pub fn reset_recalc_count(&mut self) {
        self.recalcs = 0;
    }

    /// Whether the named node holds a valid cached value.
    pub fn is_cached(&self, name: &str) -> bool {
        self.index.get(name).is_some_and(|&i| !self.nodes[i].dirty)
    }

    /// Value of a node or per-frame input, recomputing if stale.
    pub fn get_value(&mut self, name: &str) -> Result<f64, EvalError> {
        if let Some(c) = Coded::from_name(name) {
            return Ok(self.coded(c));
        }
        if !self.compiled {
            self.recompile()?;
        }
        let idx = *self
            .index
            .get(name)
            .ok_or_else(|| EvalError::KeyNotFound(name.to_string()))?;
        self.value(idx)
    }

    fn coded(&self, c: Coded) -> f64 {
        match c {
            Coded::Time => self.frame.time,
            Coded::Position => self.frame.position,
            Coded::Rate => self.frame.rate,
            Coded::Phase => self.frame.phase,
            Coded::Start => self.user.start,
            Coded::End => self.user.end,
        }
    }

    fn value(&mut self, idx: usize) -> Result<f64, EvalError> {
        if !self.nodes[idx].dirty {
            return Ok(self.nodes[idx].value);
        }

        // Cycles are rejected at compile time, so `idx` is not re-entered
        // while its compiled form is taken out.
        let compiled = std::mem::take(&mut self.nodes[idx].compiled);
        let mut scratch = std::mem::take(&mut self.nodes[idx].scratch);
        let result = self.recalculate(idx, &compiled, &mut scratch);
        let node = &mut self.nodes[idx];
        node.compiled = compiled;
        node.scratch = scratch;

        let value = result?;
        node.value = value;
        node.dirty = false;
        self.recalcs += 1;
        Ok(value)
    }

    fn recalculate(&mut self, idx: usize, compiled: &Compiled, scratch: &mut Vec<f64>) -> Result<f64, EvalError> {
        match compiled {
            Compiled::Pending => Err(EvalError::KeyNotFound(self.nodes[idx].def.name.clone())),
            Compiled::Constant(v) => Ok(*v),
            Compiled::Coded(c) => Ok(self.coded(*c)),
            Compiled::Input => {
                let name = &self.nodes[idx].def.args[0];
                self.user
                    .values
                    .get(name)
                    .copied()
                    .ok_or_else(|| EvalError::KeyNotFound(name.clone()))
            }
            Compiled::Curve { periodic, x } => {
                let x = self.arg(idx, 1, *x)?;
                let x = if *periodic { x.rem_euclid(1.0) } else { x };
                Ok(self.named_curve(idx, 0)?.value_at(x))
            }
            Compiled::Harmonics(args) => {
                scratch.clear();
                for (k, arg) in args.iter().enumerate() {
                    let v = self.arg(idx, harmonics_position(k), *arg)?;
                    scratch.push(v);
                }
                let h = Harmonics {
                    x: scratch[0],
                    base: scratch[1],
                    exponent: scratch[2],
                    increment: scratch[3],
                    correction: scratch[4],
                    max_partials: scratch[5],
                    fundamental: scratch[6],
                    max_freq: scratch[7],
                };
                Ok(h.sum(self.named_curve(idx, 1)?))
            }
            Compiled::Apply(op, args) => {
                scratch.clear();
                for (k, arg) in args.iter().enumerate() {
                    let v = self.arg(idx, k, *arg)?;
                    scratch.push(v);
                }
                Ok(ops::apply(*op, scratch))
            }
        }
    }

    fn arg(&mut self, idx: usize, position: usize, arg: Arg) -> Result<f64, EvalError> {
        match arg {
            Arg::Literal(v) => Ok(v),
            Arg::Coded(c) => Ok(self.coded(c)),
            Arg::Node(j) => self.value(j),
            Arg::Missing => Err(EvalError::KeyNotFound(
                self.nodes[idx].def.args[position].trim().to_string(),
            )),
        }
    }

    fn named_curve(&self, idx: usize, position: usize) -> Result<&Curve, EvalError> {
        let name = self.nodes[idx].def.args[position].trim();
        self.curves
            .get(name)
            .ok_or_else(|| EvalError::UnknownCurve(name.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}
