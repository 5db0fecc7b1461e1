// Property-based tests for lattice and rewrite invariants.
//
// Three categories:
// 1. Alignment lattice laws: join/meet algebra and its agreement with subsumption
// 2. Forward fixed point: idempotent on arbitrary (possibly cyclic) routers
// 3. Rewrite driver: generated pipelines, including ones with requirements
//    part-way along, end satisfied and are a fixed point of the driver itself
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use calign::alignment::Alignment;
use calign::elementmap::ElementMap;
use calign::flow::FlowAnalysis;
use calign::registry::Registry;
use calign::rewrite::{align_router, RewriteOptions};
use calign::router::{Port, Router};
use proptest::prelude::*;

// ── Generators ──────────────────────────────────────────────────────────────

fn arb_alignment() -> impl Strategy<Value = Alignment> {
    prop_oneof![
        1 => Just(Alignment::Any),
        1 => Just(Alignment::Bad),
        6 => (1u32..=12)
            .prop_flat_map(|chunk| (Just(chunk), 0..chunk))
            .prop_map(|(chunk, offset)| Alignment::new(chunk, offset).unwrap()),
    ]
}

const SOURCES: &[(&str, &str)] = &[("FromDevice", "eth0"), ("InfiniteSource", "")];

const MIDDLES: &[(&str, &str)] = &[
    ("Queue", ""),
    ("Counter", ""),
    ("Strip", "2"),
    ("Strip", "14"),
    ("Classifier", "12/0800, -"),
];

const SINKS: &[(&str, &str)] = &[
    ("IPEncap", ""),
    ("ToHost", ""),
    ("CheckIPHeader", ""),
    ("Discard", ""),
];

/// Stages that demand an alignment and still pass data on.
const REQUIRING_MIDDLES: &[(&str, &str)] = &[
    ("IPEncap", ""),
    ("CheckIPHeader", ""),
    ("ToHost", ""),
];

fn chain(stages: &[(&str, &str)]) -> Router {
    let mut r = Router::new();
    let mut prev = None;
    for (i, (ty, config)) in stages.iter().enumerate() {
        let id = r.add_element(format!("s{}", i), *ty, *config).unwrap();
        if let Some(p) = prev {
            r.add_connection(Port::new(p, 0), Port::new(id, 0));
        }
        prev = Some(id);
    }
    r
}

/// Source → middles → sink, as a router.
fn arb_pipeline() -> impl Strategy<Value = Router> {
    (
        0..SOURCES.len(),
        prop::collection::vec(0..MIDDLES.len(), 0..=5),
        0..SINKS.len(),
    )
        .prop_map(|(source, middles, sink)| {
            let mut stages = vec![SOURCES[source]];
            stages.extend(middles.iter().map(|m| MIDDLES[*m]));
            stages.push(SINKS[sink]);
            chain(&stages)
        })
}

/// Like `arb_pipeline`, but middles may carry their own requirements.
fn arb_requirement_chain() -> impl Strategy<Value = Router> {
    let middles: Vec<(&str, &str)> = MIDDLES.iter().chain(REQUIRING_MIDDLES).copied().collect();
    let nmiddles = middles.len();
    (
        0..SOURCES.len(),
        prop::collection::vec(0..nmiddles, 1..=6),
        0..SINKS.len(),
    )
        .prop_map(move |(source, picks, sink)| {
            let mut stages = vec![SOURCES[source]];
            stages.extend(picks.iter().map(|m| middles[*m]));
            stages.push(SINKS[sink]);
            chain(&stages)
        })
}

/// Every input of a stage from `before` gets data its requirement accepts.
fn assert_satisfied(before: &Router, out: &Router) -> Result<(), TestCaseError> {
    let mut diags = Vec::new();
    let emap = ElementMap::builtin();
    let registry = Registry::builtin();
    let mut fa = FlowAnalysis::new(out, &emap, &registry, &mut diags);
    fa.solve_have().unwrap();
    fa.solve_want().unwrap();
    for (e, element) in out.elements() {
        if before.eindex(&element.name).is_none() {
            continue;
        }
        for slot in fa.index().input_range(e) {
            let (have, want) = (fa.have_inputs()[slot], fa.want_inputs()[slot]);
            prop_assert!(
                want.is_bad() || have.subsumes(&want),
                "{} has {} but wants {}\n{}",
                element.name, have, want, out
            );
        }
    }
    Ok(())
}

/// Arbitrary digraph over a mix of stage types; cycles and fan-in allowed.
fn arb_router() -> impl Strategy<Value = Router> {
    let types: Vec<(&str, &str)> = SOURCES
        .iter()
        .chain(MIDDLES)
        .chain(SINKS)
        .copied()
        .collect();
    let ntypes = types.len();
    (2usize..8)
        .prop_flat_map(move |n| {
            (
                prop::collection::vec(0..ntypes, n),
                prop::collection::vec((0..n, 0..n), 1..(n * 2)),
            )
        })
        .prop_map(move |(kinds, edges)| {
            let mut r = Router::new();
            for (i, k) in kinds.iter().enumerate() {
                let (ty, config) = types[*k];
                r.add_element(format!("e{}", i), ty, config).unwrap();
            }
            for (from, to) in edges {
                let from = r.eindex(&format!("e{}", from)).unwrap();
                let to = r.eindex(&format!("e{}", to)).unwrap();
                r.add_connection(Port::new(from, 0), Port::new(to, 0));
            }
            r
        })
}

fn rewrite(r: &Router) -> (Router, calign::rewrite::RewriteReport) {
    let mut diags = Vec::new();
    align_router(
        r,
        &ElementMap::builtin(),
        &Registry::builtin(),
        &RewriteOptions::default(),
        &mut diags,
    )
    .unwrap_or_else(|e| panic!("rewrite failed: {}\n{}", e, r))
}

// ── Lattice laws ────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn join_and_meet_commute(a in arb_alignment(), b in arb_alignment()) {
        prop_assert_eq!(a.join(&b), b.join(&a));
        prop_assert_eq!(a.meet(&b), b.meet(&a));
    }

    #[test]
    fn join_and_meet_associate(
        a in arb_alignment(),
        b in arb_alignment(),
        c in arb_alignment(),
    ) {
        prop_assert_eq!(a.join(&b).join(&c), a.join(&b.join(&c)));
        prop_assert_eq!(a.meet(&b).meet(&c), a.meet(&b.meet(&c)));
    }

    #[test]
    fn identities_and_absorbers(a in arb_alignment()) {
        prop_assert_eq!(a.meet(&Alignment::Any), a);
        prop_assert_eq!(a.join(&Alignment::Bad), a);
        prop_assert_eq!(a.meet(&Alignment::Bad), Alignment::Bad);
        prop_assert_eq!(a.join(&Alignment::Any), Alignment::Any);
    }

    #[test]
    fn bounds_are_bounds(a in arb_alignment(), b in arb_alignment()) {
        let j = a.join(&b);
        let m = a.meet(&b);
        prop_assert!(a.subsumes(&j) && b.subsumes(&j));
        prop_assert!(m.subsumes(&a) && m.subsumes(&b));
    }

    #[test]
    fn subsumption_agrees_with_join_and_meet(a in arb_alignment(), b in arb_alignment()) {
        prop_assert_eq!(a.subsumes(&b), a.join(&b) == b);
        prop_assert_eq!(a.subsumes(&b), a.meet(&b) == a);
    }

    #[test]
    fn shift_is_invertible(a in arb_alignment(), delta in -64i64..64) {
        prop_assert_eq!(a.shift(delta).shift(-delta), a);
    }
}

// ── Analysis and rewrite ────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn forward_fixed_point_is_idempotent(r in arb_router()) {
        let mut diags = Vec::new();
        let emap = ElementMap::builtin();
        let registry = Registry::builtin();
        let mut fa = FlowAnalysis::new(&r, &emap, &registry, &mut diags);
        fa.solve_have().unwrap();
        let first = fa.have_inputs().to_vec();
        fa.solve_have().unwrap();
        prop_assert_eq!(fa.have_inputs(), &first[..]);
    }

    #[test]
    fn arbitrary_routers_rewrite_without_failing(r in arb_router()) {
        let (_, report) = rewrite(&r);
        prop_assert!(report.removed <= report.inserted + r.nelements());
    }

    #[test]
    fn rewritten_pipelines_are_satisfied(r in arb_pipeline()) {
        let (out, _) = rewrite(&r);
        assert_satisfied(&r, &out)?;
    }

    #[test]
    fn rewritten_requirement_chains_are_satisfied(r in arb_requirement_chain()) {
        let (out, _) = rewrite(&r);
        assert_satisfied(&r, &out)?;
    }

    #[test]
    fn rewriting_a_requirement_chain_twice_changes_nothing(r in arb_requirement_chain()) {
        let (once, _) = rewrite(&r);
        let (twice, report) = rewrite(&once);
        prop_assert_eq!(report.inserted, 0, "{}", once);
        prop_assert_eq!(report.removed, 0, "{}", once);
        prop_assert_eq!(twice.to_json(), once.to_json());
    }

    #[test]
    fn rewriting_a_pipeline_twice_changes_nothing(r in arb_pipeline()) {
        let (once, _) = rewrite(&r);
        let (twice, report) = rewrite(&once);
        prop_assert_eq!(report.inserted, 0);
        prop_assert_eq!(report.removed, 0);
        prop_assert_eq!(twice.to_json(), once.to_json());
    }

    #[test]
    fn pipelines_need_at_most_one_align(r in arb_pipeline()) {
        let (out, report) = rewrite(&r);
        prop_assert!(report.net() <= 1, "net {}\n{}", report.net(), out);
    }
}
