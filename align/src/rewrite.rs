// rewrite.rs — Align insertion driver
//
// Runs the five rewrite phases of `pass::ALL_PHASES` over a copy of the
// input router. Each phase rebuilds a `FlowAnalysis` over the router's
// current state, decides its edits from the solved facts, and only then
// mutates the router, so no analysis ever sees a half-edited graph.
//
// Preconditions: `router` element names are unique.
// Postconditions: on success, every original input port whose requirement is
//                 satisfiable receives data that satisfies it, and at most one
//                 `AlignmentInfo` stage exists.
// Failure modes: a fixed point, the insertion rounds or the redundancy loop
//                exceeding its cap →
//                `RewriteError`; the input router is left untouched.
// Side effects: prints per-phase timings to stderr when `verbose` is set.

use std::cell::Cell;
use std::fmt;
use std::time::Instant;

use crate::alignment::Alignment;
use crate::diag::{codes, Diagnostic};
use crate::elementmap::ElementMap;
use crate::flow::{AnalysisError, FlowAnalysis};
use crate::id::{ElementId, NameAllocator};
use crate::pass::{descriptor, required_phases, PhaseId, ALL_PHASES};
use crate::port_index::PortIndex;
use crate::registry::{Registry, ALIGNMENT_INFO_TYPE, ALIGN_TYPE};
use crate::router::{Port, Router, RouterError};

const ALIGN_PREFIX: &str = "Align@calign@";
const ALIGNMENT_INFO_PREFIX: &str = "AlignmentInfo@calign@";

/// Extra redundancy-elimination passes allowed beyond one per connection.
const REDUNDANCY_SLACK: usize = 16;

// ── Options and results ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct RewriteOptions {
    pub verbose: bool,
    /// Per-direction fixed-point round cap; `None` scales with the port count.
    pub max_rounds: Option<usize>,
    /// Stop after this phase instead of running all five.
    pub stop_after: Option<PhaseId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteReport {
    /// Align stages inserted by phases 1 and 3.
    pub inserted: usize,
    /// Align stages deleted as orphans in phase 5.
    pub removed: usize,
    /// Original input ports whose requirements conflict.
    pub unsatisfiable_ports: usize,
    /// Configuration of the fresh `AlignmentInfo` stage, if one was made.
    pub annotation: Option<String>,
    pub phases_run: Vec<PhaseId>,
}

impl RewriteReport {
    /// Inserted minus removed.
    pub fn net(&self) -> i64 {
        self.inserted as i64 - self.removed as i64
    }
}

#[derive(Debug)]
pub enum RewriteError {
    Analysis { phase: PhaseId, source: AnalysisError },
    InsertionLoop { rounds: usize },
    RedundancyLoop { passes: usize },
    Router(RouterError),
}

impl fmt::Display for RewriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RewriteError::Analysis { phase, source } => {
                write!(f, "{}: {}", descriptor(*phase).name, source)
            }
            RewriteError::InsertionLoop { rounds } => write!(
                f,
                "required Align insertion did not settle after {} rounds",
                rounds
            ),
            RewriteError::RedundancyLoop { passes } => write!(
                f,
                "redundant Align elimination did not settle after {} passes",
                passes
            ),
            RewriteError::Router(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for RewriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RewriteError::Analysis { source, .. } => Some(source),
            RewriteError::Router(e) => Some(e),
            RewriteError::InsertionLoop { .. } | RewriteError::RedundancyLoop { .. } => None,
        }
    }
}

impl From<RouterError> for RewriteError {
    fn from(e: RouterError) -> Self {
        RewriteError::Router(e)
    }
}

// ── Entry point ─────────────────────────────────────────────────────────────

/// Rewrite a copy of `router` so every stage gets data at an alignment it
/// can handle.
///
/// Warnings (unknown types, conflicting requirements, the net Align count)
/// are pushed onto `diagnostics`. On failure an `E0301` error is pushed as
/// well and no router is returned.
pub fn align_router(
    router: &Router,
    emap: &ElementMap,
    registry: &Registry,
    options: &RewriteOptions,
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<(Router, RewriteReport), RewriteError> {
    let mut emap = emap.clone();
    emap.ensure_classifier_traits(diagnostics);

    let original = router.nelements();
    let mut driver = Driver {
        router: router.clone(),
        emap,
        registry,
        options,
        original_nelements: original,
        names: NameAllocator::new(ALIGN_PREFIX, original + 1),
        report: RewriteReport::default(),
        setup_reported: Cell::new(false),
    };

    let phases = match options.stop_after {
        Some(last) => required_phases(last),
        None => ALL_PHASES.to_vec(),
    };

    for phase in phases {
        let t = Instant::now();
        let result = driver.run_phase(phase, diagnostics);
        if let Err(e) = result {
            diagnostics.push(
                Diagnostic::error(e.to_string())
                    .with_code(codes::E0301)
                    .with_hint("the configuration was left unrewritten"),
            );
            return Err(e);
        }
        driver.report.phases_run.push(phase);
        if options.verbose {
            let desc = descriptor(phase);
            let analyses: Vec<String> = desc.analyses.iter().map(|a| a.to_string()).collect();
            eprintln!(
                "calign: {} complete [{}], {:.1}ms",
                desc.name,
                analyses.join("+"),
                t.elapsed().as_secs_f64() * 1000.0
            );
        }
    }

    let report = driver.report;
    if report.unsatisfiable_ports > 0 {
        diagnostics.push(
            Diagnostic::warning(format!(
                "{} input port{} with conflicting alignment requirements",
                report.unsatisfiable_ports,
                plural(report.unsatisfiable_ports as i64)
            ))
            .with_code(codes::W0201)
            .with_hint("no Align can satisfy every consumer; these ports were left alone"),
        );
    }
    let net = report.net();
    if net != 0 {
        let verb = if net > 0 { "added" } else { "removed" };
        diagnostics.push(
            Diagnostic::warning(format!(
                "{} {} Align element{}",
                verb,
                net.abs(),
                plural(net)
            ))
            .with_code(codes::W0202),
        );
    }
    Ok((driver.router, report))
}

fn plural(n: i64) -> &'static str {
    if n.abs() == 1 {
        ""
    } else {
        "s"
    }
}

// ── Driver ──────────────────────────────────────────────────────────────────

struct Driver<'a> {
    router: Router,
    emap: ElementMap,
    registry: &'a Registry,
    options: &'a RewriteOptions,
    /// Only stages that existed before the rewrite get Aligns inserted.
    original_nelements: usize,
    names: NameAllocator,
    report: RewriteReport,
    /// Setup warnings are reported by the first analysis only.
    setup_reported: Cell<bool>,
}

impl<'a> Driver<'a> {
    fn run_phase(
        &mut self,
        phase: PhaseId,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<(), RewriteError> {
        match phase {
            PhaseId::RequiredInsertion => self.required_insertion(diagnostics),
            PhaseId::CollapseDuplicates => {
                self.collapse_duplicates();
                Ok(())
            }
            PhaseId::AdjustedInsertion => self.adjusted_insertion(diagnostics),
            PhaseId::EliminateRedundant => self.eliminate_redundant(diagnostics),
            PhaseId::Annotate => self.annotate(diagnostics),
        }
    }

    fn analysis(&self, diagnostics: &mut Vec<Diagnostic>) -> FlowAnalysis<'_> {
        let mut scratch = Vec::new();
        let sink = if self.setup_reported.replace(true) {
            &mut scratch
        } else {
            diagnostics
        };
        FlowAnalysis::new(&self.router, &self.emap, self.registry, sink)
            .with_max_rounds(self.options.max_rounds)
    }

    fn is_align(&self, e: ElementId) -> bool {
        self.router.element(e).type_name == ALIGN_TYPE
    }

    fn insert_align(&mut self, port: Port, want: Alignment) -> Result<(), RewriteError> {
        let name = self.names.mint(&self.router);
        let config = format!("{}, {}", want.chunk(), want.offset());
        let align = self.router.add_element(name, ALIGN_TYPE, config)?;
        self.router.insert_before(align, port);
        self.report.inserted += 1;
        Ok(())
    }

    // ── Phase 1 ──

    /// Insert Aligns for unmet requirements, repeating until a round inserts
    /// nothing. An Align pins the alignment at its port and later insertions
    /// only relax that port's want, so each original input is patched at most
    /// once.
    fn required_insertion(&mut self, diagnostics: &mut Vec<Diagnostic>) -> Result<(), RewriteError> {
        let cap = PortIndex::build(&self.router).total_inputs() + 1;
        for round in 0..cap {
            let (needed, conflicts) = self.required_round(diagnostics)?;
            if round == 0 {
                self.report.unsatisfiable_ports += conflicts;
            }
            if needed.is_empty() {
                return Ok(());
            }
            for (port, target) in needed {
                self.insert_align(port, target)?;
            }
        }
        Err(RewriteError::InsertionLoop { rounds: cap })
    }

    fn required_round(
        &self,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<(Vec<(Port, Alignment)>, usize), RewriteError> {
        let phase = PhaseId::RequiredInsertion;

        let mut have = self.analysis(diagnostics);
        have.solve_have()
            .map_err(|source| RewriteError::Analysis { phase, source })?;
        let have_in = have.have_inputs().to_vec();
        let index = have.index().clone();

        let mut want = self.analysis(diagnostics);
        want.solve_want()
            .map_err(|source| RewriteError::Analysis { phase, source })?;
        let want_in = want.want_inputs().to_vec();

        Ok(unmet_inputs(
            &self.router,
            &index,
            self.original_nelements,
            &have_in,
            &want_in,
        ))
    }

    // ── Phase 2 ──

    /// Splice out one side of every live Align -> Align connection.
    fn collapse_duplicates(&mut self) {
        let n = self.router.connections().len();
        for i in 0..n {
            let c = self.router.connections()[i];
            if !c.live()
                || c.from.element == c.to.element
                || !self.is_align(c.from.element)
                || !self.is_align(c.to.element)
            {
                continue;
            }
            let upstream_in = Port::new(c.from.element, 0);
            let above = self.router.find_connections_to(upstream_in);
            let below = self.router.find_connections_from(c.from);
            if below.len() == 1 {
                // Upstream Align only feeds this one: route its feeders here.
                for j in 0..n {
                    let other = self.router.connections()[j];
                    if other.live() && other.to == upstream_in {
                        self.router.change_connection_to(j, c.to);
                    }
                }
            } else if above.len() == 1 {
                self.router.change_connection_from(i, above[0]);
            }
        }
    }

    // ── Phase 3 ──

    fn adjusted_insertion(&mut self, diagnostics: &mut Vec<Diagnostic>) -> Result<(), RewriteError> {
        let phase = PhaseId::AdjustedInsertion;
        let original = self.original_nelements;

        let mut have = self.analysis(diagnostics);
        have.solve_have()
            .map_err(|source| RewriteError::Analysis { phase, source })?;
        let mut adjusted = have.clone();
        adjusted.adjust();
        let have_in = have.have_inputs().to_vec();
        let want_in = adjusted.have_inputs().to_vec();
        let index = have.index().clone();

        let (needed, _) = unmet_inputs(&self.router, &index, original, &have_in, &want_in);
        for (port, target) in needed {
            self.insert_align(port, target)?;
        }
        Ok(())
    }

    // ── Phase 4 ──

    /// Bypass Aligns whose feeder already delivers their output alignment.
    fn eliminate_redundant(&mut self, diagnostics: &mut Vec<Diagnostic>) -> Result<(), RewriteError> {
        let phase = PhaseId::EliminateRedundant;
        let cap = self.router.connections().len() + REDUNDANCY_SLACK;

        for _ in 0..cap {
            let redundant = {
                let mut fa = self.analysis(diagnostics);
                fa.solve_have()
                    .map_err(|source| RewriteError::Analysis { phase, source })?;
                let index = fa.index();
                let have_out = fa.have_outputs();
                let mut found = Vec::new();
                for (i, c) in self.router.connections().iter().enumerate() {
                    if !c.live()
                        || !self.is_align(c.to.element)
                        || index.noutputs(c.to.element) == 0
                    {
                        continue;
                    }
                    let arriving = have_out[index.output(c.from)];
                    let produced = have_out[index.output(Port::new(c.to.element, 0))];
                    if arriving.subsumes(&produced) {
                        found.push(i);
                    }
                }
                found
            };

            if redundant.is_empty() {
                return Ok(());
            }
            for i in redundant {
                let c = self.router.connections()[i];
                let dests = self.router.find_connections_from(Port::new(c.to.element, 0));
                for d in dests {
                    self.router.add_connection(c.from, d);
                }
                self.router.kill_connection(i);
            }
            self.router.remove_duplicate_connections();
        }
        Err(RewriteError::RedundancyLoop { passes: cap })
    }

    // ── Phase 5 ──

    fn annotate(&mut self, diagnostics: &mut Vec<Diagnostic>) -> Result<(), RewriteError> {
        let phase = PhaseId::Annotate;

        let mut dead = Vec::new();
        for (e, element) in self.router.elements() {
            if element.type_name == ALIGN_TYPE {
                if self.router.ninputs(e) == 0 || self.router.noutputs(e) == 0 {
                    dead.push(e);
                    self.report.removed += 1;
                }
            } else if element.type_name == ALIGNMENT_INFO_TYPE {
                dead.push(e);
            }
        }
        for e in dead {
            self.router.kill_element(e);
        }
        self.router.remove_dead_elements();

        let annotation = {
            let mut fa = self.analysis(diagnostics);
            fa.solve_have()
                .map_err(|source| RewriteError::Analysis { phase, source })?;
            annotation_text(&fa)
        };

        if !annotation.is_empty() {
            let mut names = NameAllocator::new(ALIGNMENT_INFO_PREFIX, self.router.nelements() + 1);
            let name = names.mint(&self.router);
            self.router
                .add_element(name, ALIGNMENT_INFO_TYPE, annotation.clone())?;
            self.report.annotation = Some(annotation);
        }
        Ok(())
    }
}

/// Input ports of original stages whose "have" does not satisfy a
/// satisfiable "want", plus the count of ports whose want is unsatisfiable.
fn unmet_inputs(
    router: &Router,
    index: &PortIndex,
    original: usize,
    have: &[Alignment],
    want: &[Alignment],
) -> (Vec<(Port, Alignment)>, usize) {
    let mut needed = Vec::new();
    let mut conflicts = 0;
    for slot in 0..index.total_inputs() {
        let Some(port) = index.input_port(slot) else {
            break;
        };
        if port.element.index() >= original || !router.element(port.element).live() {
            continue;
        }
        let (have, want) = (have[slot], want[slot]);
        if want.is_bad() {
            conflicts += 1;
        } else if !have.subsumes(&want) {
            needed.push((port, want));
        }
    }
    (needed, conflicts)
}

/// `name  c o  c o` for every tolerant stage with inputs, joined by `",\n  "`.
fn annotation_text(fa: &FlowAnalysis<'_>) -> String {
    let index = fa.index();
    let mut entries = Vec::new();
    for (e, element) in fa.router().elements() {
        if index.ninputs(e) == 0 || !fa.is_tolerant(e) {
            continue;
        }
        let mut entry = element.name.clone();
        for a in &fa.have_inputs()[index.input_range(e)] {
            entry.push_str(&format!("  {} {}", a.chunk(), a.offset()));
        }
        entries.push(entry);
    }
    entries.join(",\n  ")
}

// ── Tests ───────────────────────────────────────────────────────────────────
