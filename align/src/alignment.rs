// alignment.rs — Address-congruence lattice
//
// An `Alignment` states "address ≡ offset (mod chunk)" for the first byte of
// the data travelling through a port. Two sentinels complete the lattice:
// `Any` (every address, no constraint) and `Bad` (no address, conflicting
// requirements or no data at all).
//
// Precision order: `Bad` ⊑ every (chunk, offset) ⊑ `Any`.
//   - `join` is the least upper bound (what all producers together guarantee)
//   - `meet` is the greatest lower bound (what satisfies every consumer)
//
// Preconditions: none.
// Postconditions: every constructed value has `chunk >= 2` and
//                 `offset < chunk`; chunk 1 is normalized to `Any`.
// Failure modes: `Alignment::new` rejects chunk 0 and out-of-range offsets.
// Side effects: none.

use std::fmt;

// ── Error type ──────────────────────────────────────────────────────────────

/// Construction errors for alignments and the aligners built from them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlignError {
    InvalidArgument { message: String },
}

impl AlignError {
    pub fn invalid(message: impl Into<String>) -> Self {
        AlignError::InvalidArgument {
            message: message.into(),
        }
    }
}

impl fmt::Display for AlignError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlignError::InvalidArgument { message } => write!(f, "invalid argument: {}", message),
        }
    }
}

impl std::error::Error for AlignError {}

// ── Alignment ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Alignment {
    /// No constraint: every address satisfies it.
    Any,
    /// Unsatisfiable: no address satisfies it.
    Bad,
    /// `address ≡ offset (mod chunk)`, `chunk >= 2`, `offset < chunk`.
    Congruent { chunk: u32, offset: u32 },
}

impl Default for Alignment {
    fn default() -> Self {
        Alignment::Any
    }
}

impl Alignment {
    /// Build `address ≡ offset (mod chunk)`.
    pub fn new(chunk: u32, offset: u32) -> Result<Self, AlignError> {
        if chunk == 0 {
            return Err(AlignError::invalid("alignment chunk must be positive"));
        }
        if offset >= chunk {
            return Err(AlignError::invalid(format!(
                "alignment offset {} out of range for chunk {}",
                offset, chunk
            )));
        }
        Ok(Self::normalized(chunk, offset))
    }

    /// Build from an arbitrary (possibly negative) offset, reducing it modulo `chunk`.
    pub fn with_offset(chunk: u32, offset: i64) -> Result<Self, AlignError> {
        if chunk == 0 {
            return Err(AlignError::invalid("alignment chunk must be positive"));
        }
        let reduced = offset.rem_euclid(chunk as i64) as u32;
        Ok(Self::normalized(chunk, reduced))
    }

    pub const fn any() -> Self {
        Alignment::Any
    }

    pub const fn bad() -> Self {
        Alignment::Bad
    }

    fn normalized(chunk: u32, offset: u32) -> Self {
        if chunk == 1 {
            Alignment::Any
        } else {
            Alignment::Congruent { chunk, offset }
        }
    }

    pub fn is_bad(&self) -> bool {
        matches!(self, Alignment::Bad)
    }

    /// Chunk as printed in annotations: 1 for `Any`, 0 for `Bad`.
    pub fn chunk(&self) -> u32 {
        match self {
            Alignment::Any => 1,
            Alignment::Bad => 0,
            Alignment::Congruent { chunk, .. } => *chunk,
        }
    }

    pub fn offset(&self) -> u32 {
        match self {
            Alignment::Congruent { offset, .. } => *offset,
            _ => 0,
        }
    }

    /// True iff every address satisfying `self` also satisfies `other`.
    pub fn subsumes(&self, other: &Alignment) -> bool {
        match (self, other) {
            (Alignment::Bad, _) => true,
            (_, Alignment::Any) => true,
            (_, Alignment::Bad) => false,
            (Alignment::Any, _) => false,
            (
                Alignment::Congruent { chunk, offset },
                Alignment::Congruent {
                    chunk: ochunk,
                    offset: ooffset,
                },
            ) => chunk % ochunk == 0 && offset % ochunk == *ooffset,
        }
    }

    /// Least precise alignment subsumed by both operands.
    pub fn join(&self, other: &Alignment) -> Alignment {
        match (self, other) {
            (Alignment::Bad, x) | (x, Alignment::Bad) => *x,
            (Alignment::Any, _) | (_, Alignment::Any) => Alignment::Any,
            (
                Alignment::Congruent { chunk: c1, offset: o1 },
                Alignment::Congruent { chunk: c2, offset: o2 },
            ) => {
                let g = gcd(gcd(*c1, *c2), o1.abs_diff(*o2));
                Self::normalized(g, o1 % g)
            }
        }
    }

    /// Most precise alignment consistent with both operands, or `Bad`.
    pub fn meet(&self, other: &Alignment) -> Alignment {
        match (self, other) {
            (Alignment::Bad, _) | (_, Alignment::Bad) => Alignment::Bad,
            (Alignment::Any, x) | (x, Alignment::Any) => *x,
            (
                Alignment::Congruent { chunk: c1, offset: o1 },
                Alignment::Congruent { chunk: c2, offset: o2 },
            ) => {
                let g = gcd(*c1, *c2);
                if o1 % g != o2 % g {
                    return Alignment::Bad;
                }
                // Walk the residues of c1 until one also matches c2; at most c2 / g steps.
                let lcm = (*c1 as u64 / g as u64) * *c2 as u64;
                let mut x = *o1 as u64;
                while x % *c2 as u64 != *o2 as u64 {
                    x += *c1 as u64;
                }
                match u32::try_from(lcm) {
                    Ok(chunk) => Self::normalized(chunk, (x % lcm) as u32),
                    Err(_) => Alignment::Bad,
                }
            }
        }
    }

    /// Alignment of the same data viewed `delta` bytes further along.
    pub fn shift(&self, delta: i64) -> Alignment {
        match self {
            Alignment::Congruent { chunk, offset } => {
                let chunk64 = *chunk as i64;
                let step = delta.rem_euclid(chunk64);
                let shifted = ((*offset as i64 + step) % chunk64) as u32;
                Alignment::Congruent {
                    chunk: *chunk,
                    offset: shifted,
                }
            }
            other => *other,
        }
    }
}

impl fmt::Display for Alignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.chunk(), self.offset())
    }
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn al(chunk: u32, offset: u32) -> Alignment {
        Alignment::new(chunk, offset).unwrap()
    }

    #[test]
    fn rejects_zero_chunk_and_large_offset() {
        assert!(matches!(
            Alignment::new(0, 0),
            Err(AlignError::InvalidArgument { .. })
        ));
        assert!(Alignment::new(4, 4).is_err());
        assert!(Alignment::new(4, 3).is_ok());
    }

    #[test]
    fn chunk_one_is_unconstrained() {
        assert_eq!(al(1, 0), Alignment::Any);
        assert_eq!(Alignment::with_offset(4, -14).unwrap(), al(4, 2));
    }

    #[test]
    fn subsumption_follows_divisibility() {
        assert!(al(4, 2).subsumes(&al(2, 0)));
        assert!(!al(4, 2).subsumes(&al(4, 0)));
        assert!(!al(2, 0).subsumes(&al(4, 0)));
        assert!(al(8, 6).subsumes(&al(4, 2)));
        assert!(al(4, 0).subsumes(&Alignment::Any));
        assert!(!Alignment::Any.subsumes(&al(4, 0)));
        assert!(Alignment::Any.subsumes(&Alignment::Any));
        assert!(Alignment::Bad.subsumes(&al(4, 0)));
        assert!(!al(4, 0).subsumes(&Alignment::Bad));
    }

    #[test]
    fn join_keeps_common_congruence() {
        assert_eq!(al(4, 0).join(&al(4, 2)), al(2, 0));
        assert_eq!(al(4, 1).join(&al(4, 2)), Alignment::Any);
        assert_eq!(al(8, 2).join(&al(4, 2)), al(4, 2));
        assert_eq!(al(4, 2).join(&Alignment::Bad), al(4, 2));
        assert_eq!(al(4, 2).join(&Alignment::Any), Alignment::Any);
    }

    #[test]
    fn meet_picks_finer_or_reports_conflict() {
        assert_eq!(al(4, 2).meet(&al(2, 0)), al(4, 2));
        assert_eq!(al(4, 2).meet(&al(4, 0)), Alignment::Bad);
        assert_eq!(al(4, 2).meet(&Alignment::Any), al(4, 2));
        assert_eq!(al(4, 2).meet(&Alignment::Bad), Alignment::Bad);
        assert_eq!(al(3, 1).meet(&al(4, 2)), al(12, 10));
    }

    #[test]
    fn shift_wraps_offset() {
        assert_eq!(al(4, 2).shift(14), al(4, 0));
        assert_eq!(al(4, 0).shift(-14), al(4, 2));
        assert_eq!(Alignment::Any.shift(3), Alignment::Any);
        assert_eq!(al(4, 2).shift(i64::MAX), al(4, 1));
        assert_eq!(al(4, 2).shift(i64::MIN), al(4, 2));
    }

    #[test]
    fn display_uses_chunk_slash_offset() {
        assert_eq!(al(4, 2).to_string(), "4/2");
        assert_eq!(Alignment::Any.to_string(), "1/0");
        assert_eq!(Alignment::Bad.to_string(), "0/0");
    }
}
