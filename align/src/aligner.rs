// aligner.rs — Per-stage alignment transfer functions
//
// An `Aligner` describes how alignment facts cross one stage:
//   - `have_flow`: input "have" → output "have" (what the stage guarantees)
//   - `want_flow`: output "want" → input "want" (what the stage requires)
//   - `adjust_flow`: rewrite input "have" into the alignment the stage would
//     settle for, for stages that adapt to what they are given
//
// The default transfer functions route facts along the stage's flow code:
// an output guarantees the join of every input that flows to it, an input
// must satisfy the meet of every output it flows to.
//
// Preconditions: slices have the stage's input/output port counts.
// Postconditions: every written fact is a lattice value (no partial state).
// Failure modes: constructors reject `Bad` fixed alignments and nonsensical
//                parameters with `AlignError::InvalidArgument`.
// Side effects: none.

use std::fmt;
use std::rc::Rc;

use crate::alignment::{AlignError, Alignment};
use crate::flow_code::FlowCode;

pub trait Aligner: fmt::Debug {
    fn have_flow(&self, inputs: &[Alignment], outputs: &mut [Alignment], flow: &FlowCode) {
        default_have_flow(inputs, outputs, flow);
    }

    fn want_flow(&self, inputs: &mut [Alignment], outputs: &[Alignment], flow: &FlowCode) {
        default_want_flow(inputs, outputs, flow);
    }

    fn adjust_flow(&self, _inputs: &mut [Alignment], _outputs: &mut [Alignment]) {}
}

/// Each output gets the join of the inputs flowing to it, or `Any` if none do.
pub fn default_have_flow(inputs: &[Alignment], outputs: &mut [Alignment], flow: &FlowCode) {
    for (j, out) in outputs.iter_mut().enumerate() {
        let mut acc: Option<Alignment> = None;
        for (i, input) in inputs.iter().enumerate() {
            if flow.flows(i, j) {
                acc = Some(match acc {
                    Some(a) => a.join(input),
                    None => *input,
                });
            }
        }
        *out = acc.unwrap_or(Alignment::Any);
    }
}

/// Each input must meet the wants of every output it flows to.
pub fn default_want_flow(inputs: &mut [Alignment], outputs: &[Alignment], flow: &FlowCode) {
    for (i, input) in inputs.iter_mut().enumerate() {
        *input = outputs
            .iter()
            .enumerate()
            .filter(|(j, _)| flow.flows(i, *j))
            .fold(Alignment::Any, |acc, (_, out)| acc.meet(out));
    }
}

fn require_consistent(alignment: Alignment, what: &str) -> Result<Alignment, AlignError> {
    if alignment.is_bad() {
        Err(AlignError::invalid(format!("{} alignment is unsatisfiable", what)))
    } else {
        Ok(alignment)
    }
}

// ── Variants ────────────────────────────────────────────────────────────────

/// Flow-code passthrough; used for every stage type without custom behavior.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAligner;

impl Aligner for DefaultAligner {}

/// Emits a fixed alignment whatever arrives, and asks nothing of its inputs.
#[derive(Debug, Clone, Copy)]
pub struct GeneratorAligner {
    alignment: Alignment,
}

impl GeneratorAligner {
    pub fn new(alignment: Alignment) -> Result<Self, AlignError> {
        Ok(Self {
            alignment: require_consistent(alignment, "generated")?,
        })
    }

    pub fn alignment(&self) -> Alignment {
        self.alignment
    }
}

impl Aligner for GeneratorAligner {
    fn have_flow(&self, _inputs: &[Alignment], outputs: &mut [Alignment], _flow: &FlowCode) {
        outputs.fill(self.alignment);
    }

    fn want_flow(&self, inputs: &mut [Alignment], _outputs: &[Alignment], _flow: &FlowCode) {
        inputs.fill(Alignment::Any);
    }
}

/// Moves the data start by `shift` bytes (positive strips a header, negative
/// prepends one).
#[derive(Debug, Clone, Copy)]
pub struct ShifterAligner {
    shift: i64,
}

impl ShifterAligner {
    /// Fails for `i64::MIN`, whose inverse shift is not representable.
    pub fn new(shift: i64) -> Result<Self, AlignError> {
        if shift.checked_neg().is_none() {
            return Err(AlignError::invalid(format!("shift {} out of range", shift)));
        }
        Ok(Self { shift })
    }
}

impl Aligner for ShifterAligner {
    fn have_flow(&self, inputs: &[Alignment], outputs: &mut [Alignment], flow: &FlowCode) {
        default_have_flow(inputs, outputs, flow);
        for out in outputs.iter_mut() {
            *out = out.shift(self.shift);
        }
    }

    fn want_flow(&self, inputs: &mut [Alignment], outputs: &[Alignment], flow: &FlowCode) {
        let unshifted: Vec<Alignment> = outputs.iter().map(|a| a.shift(-self.shift)).collect();
        default_want_flow(inputs, &unshifted, flow);
    }
}

/// Requires a fixed alignment on every input, regardless of downstream wants.
#[derive(Debug, Clone, Copy)]
pub struct WantAligner {
    alignment: Alignment,
}

impl WantAligner {
    pub fn new(alignment: Alignment) -> Result<Self, AlignError> {
        Ok(Self {
            alignment: require_consistent(alignment, "required")?,
        })
    }
}

impl Aligner for WantAligner {
    fn want_flow(&self, inputs: &mut [Alignment], _outputs: &[Alignment], _flow: &FlowCode) {
        inputs.fill(self.alignment);
    }
}

/// Neither requires nor guarantees anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAligner;

impl Aligner for NullAligner {
    fn have_flow(&self, _inputs: &[Alignment], outputs: &mut [Alignment], _flow: &FlowCode) {
        outputs.fill(Alignment::Any);
    }

    fn want_flow(&self, inputs: &mut [Alignment], _outputs: &[Alignment], _flow: &FlowCode) {
        inputs.fill(Alignment::Any);
    }
}

/// Guarantees follow `have`, requirements follow `want`; adjustments apply
/// `have` then `want`.
#[derive(Debug, Clone)]
pub struct CombinedAligner {
    have: Rc<dyn Aligner>,
    want: Rc<dyn Aligner>,
}

impl CombinedAligner {
    pub fn new(have: Rc<dyn Aligner>, want: Rc<dyn Aligner>) -> Self {
        Self { have, want }
    }
}

impl Aligner for CombinedAligner {
    fn have_flow(&self, inputs: &[Alignment], outputs: &mut [Alignment], flow: &FlowCode) {
        self.have.have_flow(inputs, outputs, flow);
    }

    fn want_flow(&self, inputs: &mut [Alignment], outputs: &[Alignment], flow: &FlowCode) {
        self.want.want_flow(inputs, outputs, flow);
    }

    fn adjust_flow(&self, inputs: &mut [Alignment], outputs: &mut [Alignment]) {
        self.have.adjust_flow(inputs, outputs);
        self.want.adjust_flow(inputs, outputs);
    }
}

/// Works with any consistent alignment whose chunk is at least `min_chunk`.
/// Coarser inputs are refined to `min_chunk`, keeping their offset.
#[derive(Debug, Clone, Copy)]
pub struct ClassifierAligner {
    min_chunk: u32,
}

impl ClassifierAligner {
    pub fn new(min_chunk: u32) -> Result<Self, AlignError> {
        if min_chunk < 2 {
            return Err(AlignError::invalid(format!(
                "classifier minimum chunk {} must be at least 2",
                min_chunk
            )));
        }
        Ok(Self { min_chunk })
    }
}

impl Aligner for ClassifierAligner {
    fn adjust_flow(&self, inputs: &mut [Alignment], _outputs: &mut [Alignment]) {
        for input in inputs.iter_mut() {
            *input = match *input {
                Alignment::Congruent { chunk, .. } if chunk >= self.min_chunk => *input,
                Alignment::Congruent { offset, .. } => Alignment::Congruent {
                    chunk: self.min_chunk,
                    offset,
                },
                Alignment::Any => Alignment::Congruent {
                    chunk: self.min_chunk,
                    offset: 0,
                },
                Alignment::Bad => Alignment::Bad,
            };
        }
    }
}

/// Header check/mark stages. A required header alignment is demanded of the
/// inputs outright; a preferred one is only asked for during adjustment, so
/// it is satisfied by whatever required insertions already produced when
/// possible.
#[derive(Debug, Clone, Copy)]
pub struct HeaderAligner {
    alignment: Alignment,
    required: bool,
}

impl HeaderAligner {
    pub fn new(alignment: Alignment, required: bool) -> Result<Self, AlignError> {
        Ok(Self {
            alignment: require_consistent(alignment, "header")?,
            required,
        })
    }
}

impl Aligner for HeaderAligner {
    fn want_flow(&self, inputs: &mut [Alignment], outputs: &[Alignment], flow: &FlowCode) {
        if self.required {
            inputs.fill(self.alignment);
        } else {
            default_want_flow(inputs, outputs, flow);
        }
    }

    fn adjust_flow(&self, inputs: &mut [Alignment], _outputs: &mut [Alignment]) {
        if self.required {
            return;
        }
        for input in inputs.iter_mut() {
            if !input.subsumes(&self.alignment) {
                *input = self.alignment;
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
