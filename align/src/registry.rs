// registry.rs — Aligner registry
//
// Maps a stage type name to an `AlignerSpec` and instantiates one aligner per
// element, reading per-instance parameters (an `Align` target, a `Strip`
// length, a header OFFSET) from the element's configuration arguments.
// Unregistered types get the default aligner.

use std::collections::HashMap;
use std::rc::Rc;

use crate::aligner::*;
use crate::alignment::{AlignError, Alignment};
use crate::router::Element;

/// Type name of the corrective stage inserted by the rewrite driver.
pub const ALIGN_TYPE: &str = "Align";
/// Type name of the alignment summary stage.
pub const ALIGNMENT_INFO_TYPE: &str = "AlignmentInfo";

/// Header alignments are word (4-byte) congruences.
const HEADER_CHUNK: u32 = 4;
const CLASSIFIER_MIN_CHUNK: u32 = 4;

// ── Data types ──────────────────────────────────────────────────────────────

/// How to build the aligner for one stage type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlignerSpec {
    Default,
    Null,
    Generator(Alignment),
    Want(Alignment),
    Shifter(i64),
    Classifier { min_chunk: u32 },
    Combined(Box<AlignerSpec>, Box<AlignerSpec>),
    /// Generator whose alignment is the `CHUNK, OFFSET` configuration.
    AlignArgs,
    /// Shifter whose distance is the single configuration argument.
    StripArgs,
    /// Header stage; OFFSET is positional argument `arg` or keyword `OFFSET n`.
    Header { arg: usize, required: bool },
}

// ── Registry ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct Registry {
    specs: HashMap<String, AlignerSpec>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard stage-type table.
    pub fn builtin() -> Self {
        let mut reg = Registry::new();
        let w4_0 = Alignment::Congruent { chunk: 4, offset: 0 };
        let w4_2 = Alignment::Congruent { chunk: 4, offset: 2 };
        let w2_0 = Alignment::Congruent { chunk: 2, offset: 0 };

        reg.register(ALIGN_TYPE, AlignerSpec::AlignArgs);
        reg.register("Strip", AlignerSpec::StripArgs);
        for name in ["CheckIPHeader", "CheckIPHeader2"] {
            reg.register(name, AlignerSpec::Header { arg: 1, required: true });
        }
        reg.register("MarkIPHeader", AlignerSpec::Header { arg: 0, required: false });
        // IPClassifier and IPFilter compile to the same matcher as Classifier.
        for name in ["Classifier", "IPClassifier", "IPFilter"] {
            reg.register(
                name,
                AlignerSpec::Classifier {
                    min_chunk: CLASSIFIER_MIN_CHUNK,
                },
            );
        }
        reg.register("EtherEncap", AlignerSpec::Shifter(-14));
        for name in [
            "FromDevice",
            "PollDevice",
            "FromHost",
            "SR2SetChecksum",
            "SR2CheckHeader",
            "SetSRChecksum",
            "CheckSRHeader",
        ] {
            reg.register(name, AlignerSpec::Generator(w4_2));
        }
        for name in ["InfiniteSource", "RatedSource", "ICMPError"] {
            reg.register(name, AlignerSpec::Generator(w4_0));
        }
        reg.register("ToHost", AlignerSpec::Want(w4_2));
        for name in [
            "IPEncap",
            "UDPIPEncap",
            "ICMPPingEncap",
            "RandomUDPIPEncap",
            "RoundRobinUDPIPEncap",
            "RoundRobinTCPIPEncap",
        ] {
            reg.register(name, AlignerSpec::Want(w4_0));
        }
        for name in ["ARPResponder", "ARPQuerier"] {
            reg.register(name, AlignerSpec::Want(w2_0));
        }
        reg.register(
            "IPInputCombo",
            AlignerSpec::Combined(
                Box::new(AlignerSpec::Shifter(14)),
                Box::new(AlignerSpec::Want(w4_2)),
            ),
        );
        reg.register(
            "GridEncap",
            AlignerSpec::Combined(
                Box::new(AlignerSpec::Shifter(98)),
                Box::new(AlignerSpec::Want(w4_0)),
            ),
        );
        for name in ["Idle", "Discard"] {
            reg.register(name, AlignerSpec::Null);
        }
        reg
    }

    pub fn register(&mut self, type_name: impl Into<String>, spec: AlignerSpec) {
        self.specs.insert(type_name.into(), spec);
    }

    pub fn lookup(&self, type_name: &str) -> Option<&AlignerSpec> {
        self.specs.get(type_name)
    }

    /// Build the aligner for `element`. Unregistered types get `DefaultAligner`.
    pub fn create_aligner(&self, element: &Element) -> Result<Rc<dyn Aligner>, AlignError> {
        match self.lookup(&element.type_name) {
            Some(spec) => instantiate(spec, element),
            None => Ok(Rc::new(DefaultAligner)),
        }
    }
}

fn instantiate(spec: &AlignerSpec, element: &Element) -> Result<Rc<dyn Aligner>, AlignError> {
    Ok(match spec {
        AlignerSpec::Default => Rc::new(DefaultAligner),
        AlignerSpec::Null => Rc::new(NullAligner),
        AlignerSpec::Generator(a) => Rc::new(GeneratorAligner::new(*a)?),
        AlignerSpec::Want(a) => Rc::new(WantAligner::new(*a)?),
        AlignerSpec::Shifter(shift) => Rc::new(ShifterAligner::new(*shift)?),
        AlignerSpec::Classifier { min_chunk } => Rc::new(ClassifierAligner::new(*min_chunk)?),
        AlignerSpec::Combined(have, want) => Rc::new(CombinedAligner::new(
            instantiate(have, element)?,
            instantiate(want, element)?,
        )),
        AlignerSpec::AlignArgs => Rc::new(GeneratorAligner::new(parse_align_args(element)?)?),
        AlignerSpec::StripArgs => {
            let args = element.args();
            if args.len() != 1 {
                return Err(AlignError::invalid(format!(
                    "{} expects 1 argument, got {}",
                    element.type_name,
                    args.len()
                )));
            }
            Rc::new(ShifterAligner::new(parse_int(&args[0])?)?)
        }
        AlignerSpec::Header { arg, required } => {
            let offset = header_offset(element, *arg)?;
            let target = offset
                .checked_neg()
                .ok_or_else(|| AlignError::invalid(format!("OFFSET {} out of range", offset)))?;
            let alignment = Alignment::with_offset(HEADER_CHUNK, target)?;
            Rc::new(HeaderAligner::new(alignment, *required)?)
        }
    })
}

/// `CHUNK, OFFSET` → alignment.
pub fn parse_align_args(element: &Element) -> Result<Alignment, AlignError> {
    let args = element.args();
    if args.len() != 2 {
        return Err(AlignError::invalid(format!(
            "{} expects CHUNK, OFFSET, got '{}'",
            element.type_name, element.config
        )));
    }
    let chunk = parse_u32(&args[0])?;
    let offset = parse_u32(&args[1])?;
    Alignment::new(chunk, offset)
}

fn header_offset(element: &Element, arg: usize) -> Result<i64, AlignError> {
    let args = element.args();
    for a in &args {
        if let Some(rest) = a.strip_prefix("OFFSET") {
            if rest.starts_with(char::is_whitespace) {
                return parse_int(rest);
            }
        }
    }
    match args.get(arg) {
        Some(a) if !a.is_empty() => parse_int(a),
        _ => Ok(0),
    }
}

fn parse_int(s: &str) -> Result<i64, AlignError> {
    s.trim()
        .parse::<i64>()
        .map_err(|_| AlignError::invalid(format!("expected integer, got '{}'", s.trim())))
}

fn parse_u32(s: &str) -> Result<u32, AlignError> {
    s.trim()
        .parse::<u32>()
        .map_err(|_| AlignError::invalid(format!("expected unsigned integer, got '{}'", s.trim())))
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow_code::FlowCode;
    use crate::router::Router;

    fn element(type_name: &str, config: &str) -> Element {
        let mut r = Router::new();
        let id = r.add_element("e", type_name, config).unwrap();
        r.element(id).clone()
    }

    fn have_of(reg: &Registry, type_name: &str, config: &str, input: Alignment) -> Alignment {
        let aligner = reg.create_aligner(&element(type_name, config)).unwrap();
        let mut out = [Alignment::Bad];
        aligner.have_flow(&[input], &mut out, &FlowCode::default());
        out[0]
    }

    fn want_of(reg: &Registry, type_name: &str, config: &str) -> Alignment {
        let aligner = reg.create_aligner(&element(type_name, config)).unwrap();
        let mut inp = [Alignment::Bad];
        aligner.want_flow(&mut inp, &[Alignment::Any], &FlowCode::default());
        inp[0]
    }

    fn al(chunk: u32, offset: u32) -> Alignment {
        Alignment::new(chunk, offset).unwrap()
    }

    #[test]
    fn align_reads_chunk_and_offset() {
        let reg = Registry::builtin();
        assert_eq!(have_of(&reg, "Align", "8, 6", al(4, 0)), al(8, 6));
        assert_eq!(want_of(&reg, "Align", "8, 6"), Alignment::Any);
    }

    #[test]
    fn align_rejects_bad_arguments() {
        let reg = Registry::builtin();
        for config in ["", "4", "0, 0", "4, 4", "four, 0", "4, 0, 1"] {
            assert!(
                reg.create_aligner(&element("Align", config)).is_err(),
                "config {:?} should be rejected",
                config
            );
        }
    }

    #[test]
    fn strip_and_encap_shift() {
        let reg = Registry::builtin();
        assert_eq!(have_of(&reg, "Strip", "14", al(4, 2)), al(4, 0));
        assert_eq!(have_of(&reg, "EtherEncap", "0x0800, a, b", al(4, 0)), al(4, 2));
        assert!(reg.create_aligner(&element("Strip", "x")).is_err());
    }

    #[test]
    fn header_offset_positional_and_keyword() {
        let reg = Registry::builtin();
        assert_eq!(want_of(&reg, "CheckIPHeader", ""), al(4, 0));
        assert_eq!(want_of(&reg, "CheckIPHeader", "BADSRC, 14"), al(4, 2));
        assert_eq!(want_of(&reg, "CheckIPHeader", "OFFSET 14"), al(4, 2));
        // MarkIPHeader only prefers its alignment.
        assert_eq!(want_of(&reg, "MarkIPHeader", "14"), Alignment::Any);
        assert!(reg.create_aligner(&element("CheckIPHeader", "x, y")).is_err());
    }

    #[test]
    fn extreme_shift_and_offset_are_rejected() {
        let reg = Registry::builtin();
        assert!(reg.create_aligner(&element("Strip", "-9223372036854775808")).is_err());
        assert!(reg
            .create_aligner(&element("CheckIPHeader", "OFFSET -9223372036854775808"))
            .is_err());
        // Large but invertible values still work.
        assert_eq!(have_of(&reg, "Strip", "9223372036854775807", al(4, 0)), al(4, 3));
        assert_eq!(
            want_of(&reg, "CheckIPHeader", "OFFSET 9223372036854775807"),
            al(4, 1)
        );
    }

    #[test]
    fn sources_sinks_and_combined() {
        let reg = Registry::builtin();
        assert_eq!(have_of(&reg, "FromDevice", "eth0", Alignment::Bad), al(4, 2));
        assert_eq!(have_of(&reg, "InfiniteSource", "", Alignment::Bad), al(4, 0));
        assert_eq!(want_of(&reg, "ToHost", ""), al(4, 2));
        assert_eq!(want_of(&reg, "ARPQuerier", "1.0.0.1, 0:1:2:3:4:5"), al(2, 0));
        assert_eq!(want_of(&reg, "IPInputCombo", "0"), al(4, 2));
        assert_eq!(have_of(&reg, "IPInputCombo", "0", al(4, 2)), al(4, 0));
        assert_eq!(have_of(&reg, "Discard", "", al(4, 2)), Alignment::Any);
    }

    #[test]
    fn unknown_type_gets_default() {
        let reg = Registry::builtin();
        assert!(reg.lookup("Frob").is_none());
        assert_eq!(have_of(&reg, "Frob", "", al(4, 2)), al(4, 2));
        assert_eq!(want_of(&reg, "Frob", ""), Alignment::Any);
    }
}
