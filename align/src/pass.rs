// pass.rs — Rewrite phase descriptors: metadata, ordering, analyses used
//
// Declares the five rewrite phases run by the driver, the phases each one
// depends on, and which analyses it recomputes over the current router.
// The driver walks `ALL_PHASES` in order; `required_phases` gives the
// prefix needed to stop after a given phase.

use std::collections::HashSet;
use std::fmt;

// ── Phase and analysis identifiers ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseId {
    RequiredInsertion,
    CollapseDuplicates,
    AdjustedInsertion,
    EliminateRedundant,
    Annotate,
}

/// Fixed points (or one-shot passes) a phase computes before editing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalysisKind {
    Have,    // forward fixed point
    Want,    // backward fixed point
    Adjust,  // adjust() on a copy of the forward facts
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AnalysisKind::Have => "have",
            AnalysisKind::Want => "want",
            AnalysisKind::Adjust => "adjust",
        };
        write!(f, "{}", name)
    }
}

// ── Phase descriptor ────────────────────────────────────────────────────────

pub struct PhaseDescriptor {
    /// Name used in verbose output and `--stop-after`.
    pub name: &'static str,
    /// Phases whose edits this phase builds on.
    pub inputs: &'static [PhaseId],
    /// Analyses recomputed at the start of the phase.
    pub analyses: &'static [AnalysisKind],
    /// Pre/post conditions (documentation only).
    pub invariants: &'static str,
}

pub fn descriptor(id: PhaseId) -> PhaseDescriptor {
    match id {
        PhaseId::RequiredInsertion => PhaseDescriptor {
            name: "required_insertion",
            inputs: &[],
            analyses: &[AnalysisKind::Have, AnalysisKind::Want],
            invariants: "rounds repeat until no original input has a satisfiable unmet want",
        },
        PhaseId::CollapseDuplicates => PhaseDescriptor {
            name: "collapse_duplicates",
            inputs: &[PhaseId::RequiredInsertion],
            analyses: &[],
            invariants: "no live Align -> Align connection bypassable by one splice",
        },
        PhaseId::AdjustedInsertion => PhaseDescriptor {
            name: "adjusted_insertion",
            inputs: &[PhaseId::CollapseDuplicates],
            analyses: &[AnalysisKind::Have, AnalysisKind::Adjust],
            invariants: "tolerant stages receive an alignment their adjust accepts",
        },
        PhaseId::EliminateRedundant => PhaseDescriptor {
            name: "eliminate_redundant",
            inputs: &[PhaseId::AdjustedInsertion],
            analyses: &[AnalysisKind::Have],
            invariants: "no Align is fed data already at least as aligned as its output",
        },
        PhaseId::Annotate => PhaseDescriptor {
            name: "annotate",
            inputs: &[PhaseId::EliminateRedundant],
            analyses: &[AnalysisKind::Have],
            invariants: "orphan Aligns and stale AlignmentInfo removed, one fresh AlignmentInfo",
        },
    }
}

/// All phases in execution order.
pub const ALL_PHASES: [PhaseId; 5] = [
    PhaseId::RequiredInsertion,
    PhaseId::CollapseDuplicates,
    PhaseId::AdjustedInsertion,
    PhaseId::EliminateRedundant,
    PhaseId::Annotate,
];

/// Look a phase up by its descriptor name (as given to `--stop-after`).
pub fn phase_by_name(name: &str) -> Option<PhaseId> {
    ALL_PHASES
        .iter()
        .copied()
        .find(|p| descriptor(*p).name == name)
}

/// Comma-separated descriptor names, for usage messages.
pub fn phase_names() -> String {
    ALL_PHASES
        .iter()
        .map(|p| descriptor(*p).name)
        .collect::<Vec<_>>()
        .join(", ")
}

// ── Dependency resolution ───────────────────────────────────────────────────

/// Phases needed to reach the end of `terminal`, in execution order.
pub fn required_phases(terminal: PhaseId) -> Vec<PhaseId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PhaseId, visited: &mut HashSet<PhaseId>, order: &mut Vec<PhaseId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ───────────────────────────────────────────────────────────────────
