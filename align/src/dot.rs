// dot.rs — Graphviz DOT output for aligned routers
//
// Renders a router as a left-to-right digraph. Every edge is labelled with
// the alignment its source output guarantees, taken from a solved forward
// analysis of the same router.
//
// Preconditions: `facts` was built over `router` and `solve_have` succeeded.
// Postconditions: returns a valid DOT string; node IDs are unique.
// Failure modes: none (pure string formatting).
// Side effects: none.

use crate::elementmap::ElementMap;
use crate::flow::FlowAnalysis;
use crate::id::ElementId;
use crate::registry::{ALIGNMENT_INFO_TYPE, ALIGN_TYPE};
use crate::router::Router;

/// Emit the router as a Graphviz DOT string.
pub fn emit_dot(router: &Router, facts: &FlowAnalysis<'_>, emap: &ElementMap) -> String {
    let mut buf = String::new();
    buf.push_str("digraph calign {\n");
    buf.push_str("    rankdir=LR;\n");
    buf.push_str("    node [fontname=\"Helvetica\", fontsize=10];\n");
    buf.push_str("    edge [fontname=\"Helvetica\", fontsize=9];\n");
    buf.push('\n');

    for (e, element) in router.elements() {
        let (shape, color) = if element.type_name == ALIGN_TYPE {
            ("diamond", "lightsalmon")
        } else if element.type_name == ALIGNMENT_INFO_TYPE {
            ("note", "gray90")
        } else if emap.traits(&element.type_name).alignment_tolerant() {
            ("box", "lightyellow")
        } else {
            ("box", "lightblue")
        };
        buf.push_str(&format!(
            "    {} [shape={shape}, style=filled, fillcolor={color}, label=\"{}\\n{}\"];\n",
            node_id(e),
            escape(&element.name),
            escape(&element.type_name)
        ));
    }

    let index = facts.index();
    let have_out = facts.have_outputs();
    let edges: Vec<_> = router.connections().iter().filter(|c| c.live()).collect();
    if !edges.is_empty() {
        buf.push('\n');
    }
    for c in edges {
        let alignment = have_out[index.output(c.from)];
        let mut attrs = format!("label=\"{}\"", alignment);
        if c.from.port != 0 {
            attrs.push_str(&format!(", taillabel=\"{}\"", c.from.port));
        }
        if c.to.port != 0 {
            attrs.push_str(&format!(", headlabel=\"{}\"", c.to.port));
        }
        if alignment.is_bad() {
            attrs.push_str(", color=red");
        }
        buf.push_str(&format!(
            "    {} -> {} [{}];\n",
            node_id(c.from.element),
            node_id(c.to.element),
            attrs
        ));
    }

    buf.push_str("}\n");
    buf
}

fn node_id(e: ElementId) -> String {
    format!("n{}", e.0)
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

// ── Tests ───────────────────────────────────────────────────────────────────
