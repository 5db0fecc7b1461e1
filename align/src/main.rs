use clap::Parser;
use std::io::{Read, Write};
use std::path::PathBuf;

use calign::diag::Diagnostic;
use calign::elementmap::ElementMap;
use calign::flow::FlowAnalysis;
use calign::pass::{phase_by_name, phase_names};
use calign::registry::Registry;
use calign::rewrite::{align_router, RewriteOptions};
use calign::router::Router;

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum EmitStage {
    Graph,
    Report,
    Dot,
}

#[derive(Parser, Debug)]
#[command(
    name = "calign",
    version,
    about = "Inserts Align stages so every stage of a router receives data at an alignment it can handle"
)]
struct Cli {
    /// Input router document (JSON); stdin when omitted
    input: Option<PathBuf>,

    /// Output file path; stdout when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Element map file layered over the built-in one (repeatable)
    #[arg(short = 'm', long = "elementmap")]
    elementmap: Vec<PathBuf>,

    /// Start from an empty element map instead of the built-in one
    #[arg(long)]
    no_builtin_map: bool,

    /// Output form
    #[arg(long, value_enum, default_value_t = EmitStage::Graph)]
    emit: EmitStage,

    /// Per-direction fixed-point round cap
    #[arg(long)]
    max_rounds: Option<usize>,

    /// Stop the rewrite after the named phase
    #[arg(long, value_name = "PHASE")]
    stop_after: Option<String>,

    /// Print phases and timing
    #[arg(long)]
    verbose: bool,
}

fn print_diagnostics(diags: &[Diagnostic]) {
    for d in diags {
        eprintln!("calign: {}", d);
    }
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        match &cli.input {
            Some(p) => eprintln!("calign: input  = {}", p.display()),
            None => eprintln!("calign: input  = <stdin>"),
        }
        eprintln!("calign: emit   = {:?}", cli.emit);
    }

    let stop_after = match cli.stop_after.as_deref() {
        None => None,
        Some(name) => match phase_by_name(name) {
            Some(phase) => Some(phase),
            None => {
                eprintln!(
                    "calign: error: unknown phase '{}' (expected one of: {})",
                    name,
                    phase_names()
                );
                std::process::exit(2);
            }
        },
    };

    // ── Load element map ──
    let mut diags = Vec::new();
    let mut emap = if cli.no_builtin_map {
        ElementMap::new()
    } else {
        ElementMap::builtin()
    };
    for path in &cli.elementmap {
        match emap.load_file(path, &mut diags) {
            Ok(n) => {
                if cli.verbose {
                    eprintln!("calign: loaded {} entries from {}", n, path.display());
                }
            }
            Err(e) => {
                eprintln!("calign: error: {}", e);
                std::process::exit(2);
            }
        }
    }
    if cli.verbose {
        eprintln!(
            "calign: element map has {} entries, fingerprint {}",
            emap.len(),
            emap.fingerprint()
        );
    }

    // ── Read router ──
    let source = match &cli.input {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("calign: error: {}: {}", path.display(), e);
                std::process::exit(2);
            }
        },
        None => {
            let mut s = String::new();
            if let Err(e) = std::io::stdin().read_to_string(&mut s) {
                eprintln!("calign: error: <stdin>: {}", e);
                std::process::exit(2);
            }
            s
        }
    };
    let router = match Router::from_json(&source) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("calign: error: {}", e);
            std::process::exit(1);
        }
    };
    if cli.verbose {
        eprintln!(
            "calign: read {} elements, {} connections",
            router.nelements(),
            router.connections().len()
        );
    }

    // ── Rewrite ──
    let registry = Registry::builtin();
    let options = RewriteOptions {
        verbose: cli.verbose,
        max_rounds: cli.max_rounds,
        stop_after,
    };
    let (aligned, _report) = match align_router(&router, &emap, &registry, &options, &mut diags) {
        Ok(result) => result,
        Err(_) => {
            print_diagnostics(&diags);
            std::process::exit(1);
        }
    };
    print_diagnostics(&diags);

    // ── Emit ──
    let text = match cli.emit {
        EmitStage::Graph => {
            let mut json = aligned.to_json();
            json.push('\n');
            json
        }
        EmitStage::Report | EmitStage::Dot => {
            let mut scratch = Vec::new();
            let mut facts = FlowAnalysis::new(&aligned, &emap, &registry, &mut scratch)
                .with_max_rounds(cli.max_rounds);
            if let Err(e) = facts.solve_have() {
                eprintln!("calign: error: {}", e);
                std::process::exit(1);
            }
            match cli.emit {
                EmitStage::Report => facts.report().to_string(),
                _ => calign::dot::emit_dot(&aligned, &facts, &emap),
            }
        }
    };

    let written = match &cli.output {
        Some(path) => std::fs::write(path, text.as_bytes()),
        None => std::io::stdout().write_all(text.as_bytes()),
    };
    if let Err(e) = written {
        eprintln!("calign: error: writing output: {}", e);
        std::process::exit(2);
    }
}
