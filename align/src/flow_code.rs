// flow_code.rs — Flow descriptors: which outputs carry data from which inputs
//
// A flow code is `IN/OUT`, each side a sequence of port classes (one per
// port, the last repeating for higher-numbered ports). A class is a letter,
// `#`, or a bracketed set such as `[xy]` or `[^x]`. Input i flows to output j
// iff their classes share a letter, or both contain `#` and i == j.
//
// Lexed with `logos`, parsed with `chumsky`.
//
// Preconditions: none.
// Postconditions: `parse` returns a code with at least one class per side.
// Failure modes: unknown characters and malformed codes produce `FlowCodeError`.
// Side effects: none.

use std::collections::BTreeSet;
use std::fmt;

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;
use logos::Logos;

// ── Tokens ──────────────────────────────────────────────────────────────────

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum FlowToken {
    #[token("/")]
    Slash,
    #[token("#")]
    Hash,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("^")]
    Caret,
    #[regex("[a-zA-Z]", |lex| lex.slice().chars().next())]
    Letter(char),
}

impl fmt::Display for FlowToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowToken::Slash => write!(f, "/"),
            FlowToken::Hash => write!(f, "#"),
            FlowToken::LBracket => write!(f, "["),
            FlowToken::RBracket => write!(f, "]"),
            FlowToken::Caret => write!(f, "^"),
            FlowToken::Letter(c) => write!(f, "{}", c),
        }
    }
}

// ── Data types ──────────────────────────────────────────────────────────────

/// One port's flow class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortClass {
    letters: BTreeSet<char>,
    hash: bool,
    negated: bool,
}

#[derive(Debug, Clone)]
enum ClassItem {
    Letter(char),
    Hash,
}

impl PortClass {
    fn from_items(items: Vec<ClassItem>, negated: bool) -> Self {
        let mut letters = BTreeSet::new();
        let mut hash = false;
        for item in items {
            match item {
                ClassItem::Letter(c) => {
                    letters.insert(c);
                }
                ClassItem::Hash => hash = true,
            }
        }
        PortClass {
            letters,
            hash,
            negated,
        }
    }

    fn contains_letter(&self, c: char) -> bool {
        self.letters.contains(&c) != self.negated
    }

    fn contains_hash(&self) -> bool {
        self.hash != self.negated
    }

    fn shares_letter(&self, other: &PortClass) -> bool {
        ('a'..='z')
            .chain('A'..='Z')
            .any(|c| self.contains_letter(c) && other.contains_letter(c))
    }
}

impl fmt::Display for PortClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let single = !self.negated && self.letters.len() + usize::from(self.hash) == 1;
        if !single {
            write!(f, "[")?;
            if self.negated {
                write!(f, "^")?;
            }
        }
        for c in &self.letters {
            write!(f, "{}", c)?;
        }
        if self.hash {
            write!(f, "#")?;
        }
        if !single {
            write!(f, "]")?;
        }
        Ok(())
    }
}

/// A parsed flow code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowCode {
    inputs: Vec<PortClass>,
    outputs: Vec<PortClass>,
}

impl Default for FlowCode {
    /// `x/x`: every input flows to every output.
    fn default() -> Self {
        let x = PortClass::from_items(vec![ClassItem::Letter('x')], false);
        FlowCode {
            inputs: vec![x.clone()],
            outputs: vec![x],
        }
    }
}

impl FlowCode {
    fn input_class(&self, port: usize) -> &PortClass {
        &self.inputs[port.min(self.inputs.len() - 1)]
    }

    fn output_class(&self, port: usize) -> &PortClass {
        &self.outputs[port.min(self.outputs.len() - 1)]
    }

    /// Does data arriving on `input` leave on `output`?
    pub fn flows(&self, input: usize, output: usize) -> bool {
        let ic = self.input_class(input);
        let oc = self.output_class(output);
        (input == output && ic.contains_hash() && oc.contains_hash()) || ic.shares_letter(oc)
    }
}

impl fmt::Display for FlowCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for class in &self.inputs {
            write!(f, "{}", class)?;
        }
        write!(f, "/")?;
        for class in &self.outputs {
            write!(f, "{}", class)?;
        }
        Ok(())
    }
}

/// A flow code that failed to lex or parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowCodeError {
    pub code: String,
    pub messages: Vec<String>,
}

impl fmt::Display for FlowCodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bad flow code '{}': {}", self.code, self.messages.join("; "))
    }
}

impl std::error::Error for FlowCodeError {}

// ── Public entry point ──────────────────────────────────────────────────────

/// Lex and parse a flow code such as `x/x`, `xy/x` or `#/#`.
pub fn parse(code: &str) -> Result<FlowCode, FlowCodeError> {
    let mut tokens = Vec::new();
    let mut messages = Vec::new();
    for (result, range) in FlowToken::lexer(code).spanned() {
        match result {
            Ok(token) => tokens.push((token, SimpleSpan::from(range))),
            Err(()) => messages.push(format!(
                "unexpected character {:?} at {}",
                &code[range.clone()],
                range.start
            )),
        }
    }
    if !messages.is_empty() {
        return Err(FlowCodeError {
            code: code.to_string(),
            messages,
        });
    }

    let len = code.len();
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(tokens).map(eoi, |(t, s): (_, _)| (t, s));
    let (parsed, errors) = flow_code_parser().parse(stream).into_output_errors();

    match parsed {
        Some(flow) if errors.is_empty() => Ok(flow),
        _ => Err(FlowCodeError {
            code: code.to_string(),
            messages: errors.iter().map(|e| e.to_string()).collect(),
        }),
    }
}

fn flow_code_parser<'tokens, I>(
) -> impl Parser<'tokens, I, FlowCode, extra::Err<Rich<'tokens, FlowToken, SimpleSpan>>> + Clone
where
    I: ValueInput<'tokens, Token = FlowToken, Span = SimpleSpan>,
{
    let item = select! {
        FlowToken::Letter(c) => ClassItem::Letter(c),
        FlowToken::Hash => ClassItem::Hash,
    };

    let bracketed = just(FlowToken::Caret)
        .or_not()
        .then(item.clone().repeated().at_least(1).collect::<Vec<_>>())
        .delimited_by(just(FlowToken::LBracket), just(FlowToken::RBracket))
        .map(|(caret, items)| PortClass::from_items(items, caret.is_some()));

    let class = bracketed.or(item.map(|i| PortClass::from_items(vec![i], false)));

    let side = class.repeated().at_least(1).collect::<Vec<_>>();

    side.clone()
        .then_ignore(just(FlowToken::Slash))
        .then(side)
        .then_ignore(end())
        .map(|(inputs, outputs)| FlowCode { inputs, outputs })
}

// ── Tests ───────────────────────────────────────────────────────────────────
