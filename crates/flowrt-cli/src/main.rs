//! befdump — print the section layout and function index of a BEF image.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use miette::{Context, IntoDiagnostic};

use flowrt_bef::encoding::SectionId;
use flowrt_bef::layout::{
    find_section, read_function_index, read_nul_string, read_sections, section_body,
};
use flowrt_bef::FunctionKind;

/// Inspect a compiled BEF image.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Input .bef file
    input: PathBuf,

    /// Also decode and print the function index
    #[arg(short, long)]
    functions: bool,

    /// Verbose output (enable debug logging)
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    }

    let bytes = std::fs::read(&cli.input)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to read {}", cli.input.display()))?;

    let sections = read_sections(&bytes).map_err(|e| miette::miette!("{e}"))?;

    println!("{}: {} bytes, {} sections", cli.input.display(), bytes.len(), sections.len());
    println!("{:<20} {:>8} {:>8} {:>6}", "section", "offset", "length", "align");
    for section in &sections {
        let align = section
            .alignment
            .map_or_else(|| "-".to_string(), |a| a.to_string());
        println!(
            "{:<20} {:>8} {:>8} {:>6}",
            section.name(),
            section.body_offset,
            section.len,
            align
        );
    }

    if cli.functions {
        let index_section = find_section(&sections, SectionId::FunctionIndex)
            .ok_or_else(|| miette::miette!("image has no FunctionIndex section"))?;
        let strings = find_section(&sections, SectionId::Strings)
            .map(|s| section_body(&bytes, s))
            .unwrap_or_default();

        let entries = read_function_index(section_body(&bytes, index_section))
            .map_err(|e| miette::miette!("{e}"))?;
        println!();
        println!("{} function(s):", entries.len());
        for entry in entries {
            let name = read_nul_string(strings, entry.name_offset as usize).unwrap_or("<?>");
            let kind = match FunctionKind::from_u8(entry.kind) {
                Some(FunctionKind::Bef) => "async",
                Some(FunctionKind::SyncBef) => "sync",
                Some(FunctionKind::Native) => "native",
                None => "unknown",
            };
            println!(
                "  {:<24} kind={:<7} offset={:<6} inputs={} results={}",
                if name.is_empty() { "<anonymous>" } else { name },
                kind,
                entry.function_offset,
                entry.input_types.len(),
                entry.result_types.len()
            );
        }
    }
    Ok(())
}
