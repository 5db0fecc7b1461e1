// flow.rs — Forward/backward alignment fixed points over a router
//
// Holds one aligner per stage and four flat fact arrays indexed through a
// `PortIndex`: input/output "have" (what producers guarantee) and
// input/output "want" (what consumers require). The "have" arrays start at
// `Bad`, the join identity, so facts only grow as data is observed; the
// "want" arrays start at `Any`, the meet identity.
//
// Preconditions: the router is not mutated while an analysis borrows it.
// Postconditions: after `solve_have`, every input "have" is the join of the
//                 output "have" of its live feeders; dually for `solve_want`.
// Failure modes: a fixed point that does not settle within the round cap →
//                `AnalysisError::NonTermination`. Unknown stage types and
//                rejected aligner parameters → warning diagnostics only.
// Side effects: none.

use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use crate::aligner::{Aligner, DefaultAligner};
use crate::alignment::Alignment;
use crate::diag::{codes, Diagnostic};
use crate::elementmap::ElementMap;
use crate::flow_code::FlowCode;
use crate::id::ElementId;
use crate::port_index::PortIndex;
use crate::registry::Registry;
use crate::router::Router;

/// Rounds allowed per port before a fixed point is declared divergent.
const ROUNDS_PER_PORT: usize = 64;

// ── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Have,
    Want,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Have => write!(f, "forward (have)"),
            Direction::Want => write!(f, "backward (want)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    NonTermination { direction: Direction, rounds: usize },
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisError::NonTermination { direction, rounds } => write!(
                f,
                "{} alignment analysis did not converge after {} rounds",
                direction, rounds
            ),
        }
    }
}

impl std::error::Error for AnalysisError {}

// ── Analysis state ──────────────────────────────────────────────────────────

/// Alignment facts for one router snapshot. Cloning copies the fact arrays,
/// so a clone can be adjusted without disturbing the original.
#[derive(Debug, Clone)]
pub struct FlowAnalysis<'r> {
    router: &'r Router,
    index: PortIndex,
    aligners: Vec<Rc<dyn Aligner>>,
    flows: Vec<FlowCode>,
    tolerant: Vec<bool>,
    have_in: Vec<Alignment>,
    have_out: Vec<Alignment>,
    want_in: Vec<Alignment>,
    want_out: Vec<Alignment>,
    max_rounds: Option<usize>,
}

impl<'r> FlowAnalysis<'r> {
    /// Index the router's ports and pick an aligner for every stage.
    pub fn new(
        router: &'r Router,
        emap: &ElementMap,
        registry: &Registry,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Self {
        let index = PortIndex::build(router);
        let n = router.nelements();
        let mut aligners: Vec<Rc<dyn Aligner>> = Vec::with_capacity(n);
        let mut flows = Vec::with_capacity(n);
        let mut tolerant = Vec::with_capacity(n);
        let mut reported = HashSet::new();

        for i in 0..n {
            let element = router.element(ElementId(i as u32));
            if !element.live() {
                aligners.push(Rc::new(DefaultAligner));
                flows.push(FlowCode::default());
                tolerant.push(false);
                continue;
            }

            if !emap.has_traits(&element.type_name) && reported.insert(element.type_name.clone())
            {
                diagnostics.push(
                    Diagnostic::warning(format!("unknown stage type '{}'", element.type_name))
                        .with_code(codes::W0101)
                        .with_element(element.name.clone())
                        .with_hint("flow code x/x and no flags assumed"),
                );
            }
            let traits = emap.traits(&element.type_name);

            let aligner = match registry.create_aligner(element) {
                Ok(aligner) => aligner,
                Err(e) => {
                    diagnostics.push(
                        Diagnostic::warning(format!(
                            "{} configuration rejected: {}",
                            element.type_name, e
                        ))
                        .with_code(codes::W0102)
                        .with_element(element.name.clone())
                        .with_hint("default aligner used"),
                    );
                    Rc::new(DefaultAligner)
                }
            };

            aligners.push(aligner);
            tolerant.push(traits.alignment_tolerant());
            flows.push(traits.flow);
        }

        let have_in = vec![Alignment::Bad; index.total_inputs()];
        let have_out = vec![Alignment::Bad; index.total_outputs()];
        let want_in = vec![Alignment::Any; index.total_inputs()];
        let want_out = vec![Alignment::Any; index.total_outputs()];

        FlowAnalysis {
            router,
            index,
            aligners,
            flows,
            tolerant,
            have_in,
            have_out,
            want_in,
            want_out,
            max_rounds: None,
        }
    }

    /// Override the per-direction round cap.
    pub fn with_max_rounds(mut self, rounds: Option<usize>) -> Self {
        self.max_rounds = rounds;
        self
    }

    pub fn router(&self) -> &'r Router {
        self.router
    }

    pub fn index(&self) -> &PortIndex {
        &self.index
    }

    pub fn is_tolerant(&self, e: ElementId) -> bool {
        self.tolerant[e.index()]
    }

    pub fn have_inputs(&self) -> &[Alignment] {
        &self.have_in
    }

    pub fn have_outputs(&self) -> &[Alignment] {
        &self.have_out
    }

    pub fn want_inputs(&self) -> &[Alignment] {
        &self.want_in
    }

    pub fn want_outputs(&self) -> &[Alignment] {
        &self.want_out
    }

    fn round_cap(&self) -> usize {
        self.max_rounds.unwrap_or_else(|| {
            (self.index.total_inputs() + self.index.total_outputs() + 1) * ROUNDS_PER_PORT
        })
    }

    // ── Forward ──

    /// Run every stage's `have_flow` over the current input facts.
    pub fn propagate_have_outputs(&mut self) {
        for (i, aligner) in self.aligners.iter().enumerate() {
            let e = ElementId(i as u32);
            let inputs = &self.have_in[self.index.input_range(e)];
            let outputs = &mut self.have_out[self.index.output_range(e)];
            if inputs.is_empty() && outputs.is_empty() {
                continue;
            }
            aligner.have_flow(inputs, outputs, &self.flows[i]);
        }
    }

    /// Recompute every input fact from scratch as the join of its feeders.
    /// Returns whether anything changed.
    pub fn propagate_have_inputs(&mut self) -> bool {
        let mut fresh = vec![Alignment::Bad; self.have_in.len()];
        for c in self.router.connections().iter().filter(|c| c.live()) {
            let slot = self.index.input(c.to);
            fresh[slot] = fresh[slot].join(&self.have_out[self.index.output(c.from)]);
        }
        let changed = fresh != self.have_in;
        self.have_in = fresh;
        changed
    }

    pub fn solve_have(&mut self) -> Result<(), AnalysisError> {
        let cap = self.round_cap();
        for _ in 0..cap {
            self.propagate_have_outputs();
            if !self.propagate_have_inputs() {
                return Ok(());
            }
        }
        Err(AnalysisError::NonTermination {
            direction: Direction::Have,
            rounds: cap,
        })
    }

    // ── Backward ──

    /// Run every stage's `want_flow` over the current output facts.
    pub fn propagate_want_inputs(&mut self) {
        for (i, aligner) in self.aligners.iter().enumerate() {
            let e = ElementId(i as u32);
            let inputs = &mut self.want_in[self.index.input_range(e)];
            let outputs = &self.want_out[self.index.output_range(e)];
            if inputs.is_empty() && outputs.is_empty() {
                continue;
            }
            aligner.want_flow(inputs, outputs, &self.flows[i]);
        }
    }

    /// Recompute every output requirement as the meet of what its consumers
    /// want. Returns whether anything changed.
    pub fn propagate_want_outputs(&mut self) -> bool {
        let mut fresh = vec![Alignment::Any; self.want_out.len()];
        for c in self.router.connections().iter().filter(|c| c.live()) {
            let slot = self.index.output(c.from);
            fresh[slot] = fresh[slot].meet(&self.want_in[self.index.input(c.to)]);
        }
        let changed = fresh != self.want_out;
        self.want_out = fresh;
        changed
    }

    pub fn solve_want(&mut self) -> Result<(), AnalysisError> {
        let cap = self.round_cap();
        for _ in 0..cap {
            self.propagate_want_inputs();
            if !self.propagate_want_outputs() {
                return Ok(());
            }
        }
        Err(AnalysisError::NonTermination {
            direction: Direction::Want,
            rounds: cap,
        })
    }

    // ── Adjustment ──

    /// Let alignment-tolerant stages rewrite their input "have" facts into
    /// the alignment they would settle for.
    pub fn adjust(&mut self) {
        for (i, aligner) in self.aligners.iter().enumerate() {
            if !self.tolerant[i] {
                continue;
            }
            let e = ElementId(i as u32);
            let inputs = &mut self.have_in[self.index.input_range(e)];
            let outputs = &mut self.have_out[self.index.output_range(e)];
            aligner.adjust_flow(inputs, outputs);
        }
    }

    /// Per-port "have" facts for every live stage.
    pub fn report(&self) -> AlignmentReport {
        let rows = self
            .router
            .elements()
            .map(|(e, element)| ReportRow {
                name: element.name.clone(),
                inputs: self.have_in[self.index.input_range(e)].to_vec(),
                outputs: self.have_out[self.index.output_range(e)].to_vec(),
            })
            .collect();
        AlignmentReport { rows }
    }
}

// ── Report ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRow {
    pub name: String,
    pub inputs: Vec<Alignment>,
    pub outputs: Vec<Alignment>,
}

/// One line per stage: `name : c/o c/o - c/o`, inputs then outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlignmentReport {
    pub rows: Vec<ReportRow>,
}

impl fmt::Display for AlignmentReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in &self.rows {
            write!(f, "{} :", row.name)?;
            for a in &row.inputs {
                write!(f, " {}", a)?;
            }
            write!(f, " -")?;
            for a in &row.outputs {
                write!(f, " {}", a)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::Port;

    fn al(chunk: u32, offset: u32) -> Alignment {
        Alignment::new(chunk, offset).unwrap()
    }

    fn chain(stages: &[(&str, &str, &str)]) -> Router {
        let mut r = Router::new();
        let mut prev: Option<ElementId> = None;
        for (name, ty, config) in stages {
            let id = r.add_element(*name, *ty, *config).unwrap();
            if let Some(p) = prev {
                r.add_connection(Port::new(p, 0), Port::new(id, 0));
            }
            prev = Some(id);
        }
        r
    }

    fn solved(r: &Router) -> FlowAnalysis<'_> {
        let mut diags = Vec::new();
        let mut fa = FlowAnalysis::new(r, &ElementMap::builtin(), &Registry::builtin(), &mut diags);
        fa.solve_have().unwrap();
        fa.solve_want().unwrap();
        fa
    }

    fn have_at(fa: &FlowAnalysis<'_>, name: &str, port: usize) -> Alignment {
        let e = fa.router().eindex(name).unwrap();
        fa.have_inputs()[fa.index().input(Port::new(e, port))]
    }

    fn want_at(fa: &FlowAnalysis<'_>, name: &str, port: usize) -> Alignment {
        let e = fa.router().eindex(name).unwrap();
        fa.want_inputs()[fa.index().input(Port::new(e, port))]
    }

    #[test]
    fn have_follows_shifts() {
        let r = chain(&[
            ("src", "FromDevice", "eth0"),
            ("strip", "Strip", "14"),
            ("q", "Queue", ""),
            ("sink", "Discard", ""),
        ]);
        let fa = solved(&r);
        assert_eq!(have_at(&fa, "strip", 0), al(4, 2));
        assert_eq!(have_at(&fa, "q", 0), al(4, 0));
        assert_eq!(have_at(&fa, "sink", 0), al(4, 0));
    }

    #[test]
    fn want_flows_upstream_through_shifts() {
        let r = chain(&[
            ("src", "FromDevice", "eth0"),
            ("strip", "Strip", "14"),
            ("chk", "CheckIPHeader", ""),
            ("sink", "Discard", ""),
        ]);
        let fa = solved(&r);
        assert_eq!(want_at(&fa, "chk", 0), al(4, 0));
        // 14 bytes before a word boundary.
        assert_eq!(want_at(&fa, "strip", 0), al(4, 2));
        assert!(have_at(&fa, "strip", 0).subsumes(&want_at(&fa, "strip", 0)));
        assert_eq!(want_at(&fa, "sink", 0), Alignment::Any);
    }

    #[test]
    fn fan_in_joins_and_fan_out_meets() {
        let mut r = Router::new();
        let a = r.add_element("a", "FromDevice", "eth0").unwrap();
        let b = r.add_element("b", "InfiniteSource", "").unwrap();
        let m = r.add_element("m", "Queue", "").unwrap();
        let x = r.add_element("x", "ToHost", "").unwrap();
        let y = r.add_element("y", "ARPResponder", "").unwrap();
        r.add_connection(Port::new(a, 0), Port::new(m, 0));
        r.add_connection(Port::new(b, 0), Port::new(m, 0));
        r.add_connection(Port::new(m, 0), Port::new(x, 0));
        r.add_connection(Port::new(m, 0), Port::new(y, 0));
        let fa = solved(&r);
        assert_eq!(have_at(&fa, "m", 0), al(2, 0));
        // (4,2) meet (2,0) is (4,2).
        assert_eq!(fa.want_outputs()[fa.index().output(Port::new(m, 0))], al(4, 2));
        assert_eq!(want_at(&fa, "m", 0), al(4, 2));
    }

    #[test]
    fn conflicting_wants_are_bad() {
        let mut r = Router::new();
        let s = r.add_element("s", "InfiniteSource", "").unwrap();
        let x = r.add_element("x", "ToHost", "").unwrap();
        let y = r.add_element("y", "IPEncap", "").unwrap();
        r.add_connection(Port::new(s, 0), Port::new(x, 0));
        r.add_connection(Port::new(s, 0), Port::new(y, 0));
        let fa = solved(&r);
        assert!(fa.want_outputs()[fa.index().output(Port::new(s, 0))].is_bad());
    }

    #[test]
    fn unconnected_input_stays_bad() {
        let mut r = Router::new();
        let s = r.add_element("s", "InfiniteSource", "").unwrap();
        let m = r.add_element("m", "Queue", "").unwrap();
        r.add_connection(Port::new(s, 0), Port::new(m, 1));
        let fa = solved(&r);
        assert!(have_at(&fa, "m", 0).is_bad());
        assert_eq!(have_at(&fa, "m", 1), al(4, 0));
    }

    #[test]
    fn cycle_reaches_a_fixed_point() {
        let mut r = Router::new();
        let s = r.add_element("s", "FromDevice", "eth0").unwrap();
        let m = r.add_element("m", "Queue", "").unwrap();
        let t = r.add_element("t", "Strip", "1").unwrap();
        r.add_connection(Port::new(s, 0), Port::new(m, 0));
        r.add_connection(Port::new(m, 0), Port::new(t, 0));
        r.add_connection(Port::new(t, 0), Port::new(m, 0));
        let fa = solved(&r);
        // Every residue reaches the loop, so nothing is known.
        assert_eq!(have_at(&fa, "m", 0), Alignment::Any);
    }

    #[test]
    fn cycle_without_shift_keeps_alignment() {
        let mut r = Router::new();
        let s = r.add_element("s", "FromDevice", "eth0").unwrap();
        let m = r.add_element("m", "Queue", "").unwrap();
        let t = r.add_element("t", "Counter", "").unwrap();
        r.add_connection(Port::new(s, 0), Port::new(m, 0));
        r.add_connection(Port::new(m, 0), Port::new(t, 0));
        r.add_connection(Port::new(t, 0), Port::new(m, 0));
        let fa = solved(&r);
        assert_eq!(have_at(&fa, "m", 0), al(4, 2));
    }

    #[test]
    fn solve_have_is_idempotent() {
        let r = chain(&[
            ("src", "FromDevice", "eth0"),
            ("strip", "Strip", "14"),
            ("sink", "Discard", ""),
        ]);
        let mut fa = solved(&r);
        let first = fa.have_inputs().to_vec();
        fa.solve_have().unwrap();
        assert_eq!(fa.have_inputs(), &first[..]);
        assert!(!fa.propagate_have_inputs());
    }

    #[test]
    fn round_cap_reports_non_termination() {
        let r = chain(&[("src", "FromDevice", "eth0"), ("sink", "Discard", "")]);
        let mut diags = Vec::new();
        let mut fa = FlowAnalysis::new(&r, &ElementMap::builtin(), &Registry::builtin(), &mut diags)
            .with_max_rounds(Some(1));
        assert_eq!(
            fa.solve_have(),
            Err(AnalysisError::NonTermination {
                direction: Direction::Have,
                rounds: 1
            })
        );
    }

    #[test]
    fn adjust_touches_only_a_copy() {
        let r = chain(&[
            ("src", "FromDevice", "eth0"),
            ("strip", "Strip", "13"),
            ("cl", "Classifier", "12/0800, -"),
        ]);
        let fa = solved(&r);
        let mut adjusted = fa.clone();
        adjusted.adjust();
        assert_eq!(have_at(&fa, "cl", 0), al(4, 3));
        assert_eq!(have_at(&adjusted, "cl", 0), al(4, 3));

        let mut r = chain(&[
            ("src", "FromDevice", "eth0"),
            ("strip", "Strip", "1"),
            ("m", "Queue", ""),
            ("cl", "Classifier", "12/0800, -"),
        ]);
        let other = r.add_element("other", "InfiniteSource", "").unwrap();
        let m = r.eindex("m").unwrap();
        r.add_connection(Port::new(other, 0), Port::new(m, 0));
        let fa = solved(&r);
        let mut adjusted = fa.clone();
        adjusted.adjust();
        // (4,3) joined with (4,0) is Any; the classifier settles for (4,0).
        assert_eq!(have_at(&fa, "cl", 0), Alignment::Any);
        assert_eq!(have_at(&adjusted, "cl", 0), al(4, 0));
    }

    #[test]
    fn unknown_type_and_bad_config_warn() {
        let r = chain(&[
            ("src", "Frobnicator", ""),
            ("fix", "Align", "4, 9"),
            ("more", "Frobnicator", ""),
        ]);
        let mut diags = Vec::new();
        let _ = FlowAnalysis::new(&r, &ElementMap::builtin(), &Registry::builtin(), &mut diags);
        let found: Vec<_> = diags.iter().map(|d| d.code).collect();
        assert_eq!(found, vec![Some(codes::W0101), Some(codes::W0102)]);
    }

    #[test]
    fn report_lists_inputs_then_outputs() {
        let r = chain(&[("src", "FromDevice", "eth0"), ("strip", "Strip", "14")]);
        let fa = solved(&r);
        assert_eq!(fa.report().to_string(), "src : - 4/2\nstrip : 4/2 -\n");
    }
}
