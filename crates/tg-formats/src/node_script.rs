//! Node-script text format.
//!
//! One node per line: `name;type;arg0;...;argN`. The type may be a long
//! alias (`unit sine`) or a short tag (`sinf`). Blank lines and lines
//! starting with `#` or `//` are skipped. A bad line is reported and
//! dropped; the rest of the script still loads.

use std::path::Path;

use tg_ir::NodeDef;
use tracing::{debug, warn};

use crate::FormatError;

/// A line that could not be imported.
#[derive(Clone, Debug, PartialEq)]
pub struct ScriptIssue {
    /// 1-based line number.
    pub line: usize,
    pub message: String,
}

/// Result of reading a script: the nodes that parsed, plus what did not.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeScript {
    pub nodes: Vec<NodeDef>,
    pub issues: Vec<ScriptIssue>,
}

impl NodeScript {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

fn is_skipped(line: &str) -> bool {
    line.is_empty() || line.starts_with('#') || line.starts_with("//")
}

/// Parse a whole script, keeping every good line.
///
/// A later line with an already used name replaces the earlier node.
pub fn parse_node_script(text: &str) -> NodeScript {
    let mut script = NodeScript::default();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if is_skipped(line) {
            continue;
        }
        match NodeDef::parse_line(line) {
            Ok(def) => {
                if let Some(pos) = script.nodes.iter().position(|n| n.name == def.name) {
                    debug!(line = idx + 1, name = %def.name, "node redefined");
                    script.nodes.remove(pos);
                }
                script.nodes.push(def);
            }
            Err(e) => {
                warn!(line = idx + 1, error = %e, "skipping node-script line");
                script.issues.push(ScriptIssue {
                    line: idx + 1,
                    message: e.to_string(),
                });
            }
        }
    }
    script
}

/// Parse a script, failing on the first bad line.
pub fn parse_node_script_strict(text: &str) -> Result<Vec<NodeDef>, FormatError> {
    let script = parse_node_script(text);
    match script.issues.into_iter().next() {
        Some(issue) => Err(FormatError::Parse {
            line: issue.line,
            message: issue.message,
        }),
        None => Ok(script.nodes),
    }
}

/// Read and parse a script file.
pub fn load_node_script(path: &Path) -> Result<NodeScript, FormatError> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_node_script(&text))
}

/// Render nodes with their long-form aliases, one per line.
pub fn write_node_script(nodes: &[NodeDef]) -> String {
    let mut out = String::new();
    for node in nodes {
        out.push_str(&node.to_line());
        out.push('\n');
    }
    out
}
