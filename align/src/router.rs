// router.rs — Router graph: stages, ports, connections and edit primitives
//
// A router is a list of elements (stages) and a list of directed connections
// from an output port to an input port. Elements and connections are killed
// in place (marked dead) and compacted later, so indices stay stable while a
// rewrite phase is iterating over them.
//
// Port counts are derived from live connections: one past the highest
// connected port on each side.
//
// Preconditions: none.
// Postconditions: element names are unique among elements.
// Failure modes: duplicate or unknown element names, port numbers above
//                `MAX_PORT`, malformed JSON documents → `RouterError`.
// Side effects: none (file I/O is left to callers).

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::ElementId;

/// Highest port number accepted from a router document.
pub const MAX_PORT: usize = u16::MAX as usize;

// ── Public types ────────────────────────────────────────────────────────────

/// An input or output port of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Port {
    pub element: ElementId,
    pub port: usize,
}

impl Port {
    pub fn new(element: ElementId, port: usize) -> Self {
        Port { element, port }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub type_name: String,
    pub config: String,
    live: bool,
}

impl Element {
    pub fn live(&self) -> bool {
        self.live
    }

    /// Configuration split into top-level comma-separated arguments.
    pub fn args(&self) -> Vec<String> {
        split_args(&self.config)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub from: Port,
    pub to: Port,
    live: bool,
}

impl Connection {
    pub fn live(&self) -> bool {
        self.live
    }
}

#[derive(Debug)]
pub enum RouterError {
    DuplicateElement { name: String },
    UnknownElement { name: String },
    PortOutOfRange { name: String, port: usize },
    JsonError(serde_json::Error),
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterError::DuplicateElement { name } => {
                write!(f, "element '{}' declared more than once", name)
            }
            RouterError::UnknownElement { name } => {
                write!(f, "connection refers to unknown element '{}'", name)
            }
            RouterError::PortOutOfRange { name, port } => write!(
                f,
                "port {} of element '{}' is above the limit of {}",
                port, name, MAX_PORT
            ),
            RouterError::JsonError(e) => write!(f, "malformed router document: {}", e),
        }
    }
}

impl std::error::Error for RouterError {}

// ── Router ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct Router {
    elements: Vec<Element>,
    connections: Vec<Connection>,
    by_name: HashMap<String, ElementId>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_element(
        &mut self,
        name: impl Into<String>,
        type_name: impl Into<String>,
        config: impl Into<String>,
    ) -> Result<ElementId, RouterError> {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(RouterError::DuplicateElement { name });
        }
        let id = ElementId(self.elements.len() as u32);
        self.by_name.insert(name.clone(), id);
        self.elements.push(Element {
            name,
            type_name: type_name.into(),
            config: config.into(),
            live: true,
        });
        Ok(id)
    }

    /// Number of element slots, dead ones included until `remove_dead_elements`.
    pub fn nelements(&self) -> usize {
        self.elements.len()
    }

    pub fn element(&self, id: ElementId) -> &Element {
        &self.elements[id.index()]
    }

    /// Live elements in index order.
    pub fn elements(&self) -> impl Iterator<Item = (ElementId, &Element)> {
        self.elements
            .iter()
            .enumerate()
            .filter(|(_, e)| e.live)
            .map(|(i, e)| (ElementId(i as u32), e))
    }

    pub fn eindex(&self, name: &str) -> Option<ElementId> {
        self.by_name.get(name).copied()
    }

    pub fn kill_element(&mut self, id: ElementId) {
        self.elements[id.index()].live = false;
    }

    /// Drop dead elements and every connection touching them, renumbering the rest.
    pub fn remove_dead_elements(&mut self) {
        let mut remap = vec![None; self.elements.len()];
        let mut kept = Vec::with_capacity(self.elements.len());
        for (i, e) in self.elements.drain(..).enumerate() {
            if e.live {
                remap[i] = Some(ElementId(kept.len() as u32));
                kept.push(e);
            }
        }
        self.elements = kept;

        let mut connections = Vec::with_capacity(self.connections.len());
        for c in &self.connections {
            if let (Some(from), Some(to)) = (remap[c.from.element.index()], remap[c.to.element.index()]) {
                connections.push(Connection {
                    from: Port::new(from, c.from.port),
                    to: Port::new(to, c.to.port),
                    live: c.live,
                });
            }
        }
        self.connections = connections;
        self.rebuild_name_index();
    }

    fn rebuild_name_index(&mut self) {
        self.by_name = self
            .elements
            .iter()
            .enumerate()
            .map(|(i, e)| (e.name.clone(), ElementId(i as u32)))
            .collect();
    }

    // ── Connections ──

    /// All connection slots, dead ones included.
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn add_connection(&mut self, from: Port, to: Port) -> usize {
        self.connections.push(Connection {
            from,
            to,
            live: true,
        });
        self.connections.len() - 1
    }

    pub fn kill_connection(&mut self, index: usize) {
        self.connections[index].live = false;
    }

    pub fn change_connection_to(&mut self, index: usize, to: Port) {
        self.connections[index].to = to;
    }

    pub fn change_connection_from(&mut self, index: usize, from: Port) {
        self.connections[index].from = from;
    }

    /// Sources of live connections arriving at input `port`.
    pub fn find_connections_to(&self, port: Port) -> Vec<Port> {
        self.connections
            .iter()
            .filter(|c| c.live && c.to == port)
            .map(|c| c.from)
            .collect()
    }

    /// Destinations of live connections leaving output `port`.
    pub fn find_connections_from(&self, port: Port) -> Vec<Port> {
        self.connections
            .iter()
            .filter(|c| c.live && c.from == port)
            .map(|c| c.to)
            .collect()
    }

    /// Route everything that fed `port` through input 0 of `element`, then
    /// connect output 0 of `element` to `port`.
    pub fn insert_before(&mut self, element: ElementId, port: Port) {
        let entry = Port::new(element, 0);
        for c in self.connections.iter_mut() {
            if c.live && c.to == port {
                c.to = entry;
            }
        }
        self.add_connection(Port::new(element, 0), port);
    }

    /// Drop dead connections and repeated (from, to) pairs, keeping first occurrences.
    pub fn remove_duplicate_connections(&mut self) {
        let mut seen = HashSet::new();
        self.connections
            .retain(|c| c.live && seen.insert((c.from, c.to)));
    }

    // ── Port counts ──

    /// (inputs, outputs) per element slot, derived from live connections.
    pub fn port_counts(&self) -> (Vec<usize>, Vec<usize>) {
        let mut ninputs = vec![0; self.elements.len()];
        let mut noutputs = vec![0; self.elements.len()];
        for c in self.connections.iter().filter(|c| c.live) {
            let to = &mut ninputs[c.to.element.index()];
            *to = (*to).max(c.to.port + 1);
            let from = &mut noutputs[c.from.element.index()];
            *from = (*from).max(c.from.port + 1);
        }
        (ninputs, noutputs)
    }

    pub fn ninputs(&self, id: ElementId) -> usize {
        self.connections
            .iter()
            .filter(|c| c.live && c.to.element == id)
            .map(|c| c.to.port + 1)
            .max()
            .unwrap_or(0)
    }

    pub fn noutputs(&self, id: ElementId) -> usize {
        self.connections
            .iter()
            .filter(|c| c.live && c.from.element == id)
            .map(|c| c.from.port + 1)
            .max()
            .unwrap_or(0)
    }

    // ── JSON document ──

    pub fn from_json(json: &str) -> Result<Self, RouterError> {
        let doc: RouterDoc = serde_json::from_str(json).map_err(RouterError::JsonError)?;
        let mut router = Router::new();
        for e in doc.elements {
            router.add_element(e.name, e.type_name, e.config)?;
        }
        for c in doc.connections {
            let from = router.resolve_port(&c.from)?;
            let to = router.resolve_port(&c.to)?;
            router.add_connection(from, to);
        }
        Ok(router)
    }

    fn resolve_port(&self, (name, port): &(String, usize)) -> Result<Port, RouterError> {
        let id = self
            .eindex(name)
            .filter(|id| self.element(*id).live)
            .ok_or_else(|| RouterError::UnknownElement { name: name.clone() })?;
        if *port > MAX_PORT {
            return Err(RouterError::PortOutOfRange {
                name: name.clone(),
                port: *port,
            });
        }
        Ok(Port::new(id, *port))
    }

    /// Pretty JSON of live elements and connections.
    pub fn to_json(&self) -> String {
        let doc = RouterDoc {
            elements: self
                .elements()
                .map(|(_, e)| ElementDoc {
                    name: e.name.clone(),
                    type_name: e.type_name.clone(),
                    config: e.config.clone(),
                })
                .collect(),
            connections: self
                .connections
                .iter()
                .filter(|c| c.live && self.element(c.from.element).live && self.element(c.to.element).live)
                .map(|c| ConnectionDoc {
                    from: (self.element(c.from.element).name.clone(), c.from.port),
                    to: (self.element(c.to.element).name.clone(), c.to.port),
                })
                .collect(),
        };
        serde_json::to_string_pretty(&doc).unwrap_or_default()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RouterDoc {
    #[serde(default)]
    elements: Vec<ElementDoc>,
    #[serde(default)]
    connections: Vec<ConnectionDoc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ElementDoc {
    name: String,
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default)]
    config: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ConnectionDoc {
    from: (String, usize),
    to: (String, usize),
}

// ── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (_, e) in self.elements() {
            if e.config.is_empty() {
                writeln!(f, "{} : {}", e.name, e.type_name)?;
            } else {
                writeln!(f, "{} : {} \"{}\"", e.name, e.type_name, e.config)?;
            }
        }
        for c in self.connections.iter().filter(|c| c.live) {
            writeln!(
                f,
                "{}.{} -> {}.{}",
                self.element(c.from.element).name,
                c.from.port,
                self.element(c.to.element).name,
                c.to.port
            )?;
        }
        Ok(())
    }
}

/// Split a configuration string on commas outside parentheses, brackets and quotes.
pub fn split_args(config: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut in_quote = false;
    let mut current = String::new();
    for c in config.chars() {
        match c {
            '"' => in_quote = !in_quote,
            '(' | '[' | '{' if !in_quote => depth += 1,
            ')' | ']' | '}' if !in_quote => depth = depth.saturating_sub(1),
            ',' if !in_quote && depth == 0 => {
                args.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if !current.trim().is_empty() || !args.is_empty() {
        args.push(current.trim().to_string());
    }
    args
}

// ── Tests ───────────────────────────────────────────────────────────────────
