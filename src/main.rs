//! Destack CLI — EVM bytecode decompiler.

use anyhow::{bail, Context, Result};
use clap::Parser;
use destack::builder::CancelFlag;
use destack::config::Config;
use destack::decompiler::{decompile, InputKind};
use destack::disasm::disassemble;
use destack::export::FactExporter;
use destack::parser::{parse_hex, parse_listing};
use std::io::{IsTerminal, Read, Write};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "destack",
    version,
    about = "Static EVM bytecode decompiler: TAC, CFG, and Datalog facts"
)]
struct Cli {
    /// Input files; `-` or no argument reads standard input.
    #[arg(value_name = "FILE")]
    inputs: Vec<String>,

    /// Input is a pre-disassembled listing, not hex bytecode.
    #[arg(short = 'a', long = "disassembly")]
    disassembly: bool,

    /// Force hex-bytecode input mode.
    #[arg(short = 'b', long = "bytecode")]
    bytecode: bool,

    /// Fail with a non-zero exit on malformed input or invalid opcodes.
    #[arg(short = 's', long = "strict")]
    strict: bool,

    /// Render the disassembly view instead of decompiling.
    #[arg(long = "disasm")]
    disasm: bool,

    /// Disassembler only: colourise and separate blocks with blank lines.
    #[arg(short = 'p', long = "prettify")]
    prettify: bool,

    /// Output file (default standard output).
    #[arg(short = 'o', value_name = "FILE")]
    output: Option<PathBuf>,

    /// Emit TSV fact files into this directory (created if absent).
    #[arg(short = 't', value_name = "DIR")]
    tsv_dir: Option<PathBuf>,

    /// Drop blocks unreachable from the entry.
    #[arg(short = 'd')]
    remove_unreachable: bool,

    /// Suppress the textual TAC dump.
    #[arg(short = 'n')]
    no_dump: bool,

    /// Emit the analysis summary as JSON instead of the TAC dump.
    #[arg(long = "json")]
    json: bool,

    /// Override a configuration key (repeatable).
    #[arg(short = 'c', value_name = "KEY=VALUE")]
    config_overrides: Vec<String>,

    /// Load configuration from a `key = value` file.
    #[arg(long = "config", value_name = "FILE")]
    config_file: Option<PathBuf>,

    /// Increase verbosity (-v info, -vv debug).
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if cli.disassembly && cli.bytecode {
        bail!("-a and -b are mutually exclusive");
    }

    let mut config = match &cli.config_file {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read config file {}", path.display()))?;
            Config::from_file_contents(&text)?
        }
        None => Config::default(),
    };
    for pair in &cli.config_overrides {
        config.apply_override(pair)?;
    }
    if cli.remove_unreachable {
        config.remove_unreachable = true;
    }

    let kind = if cli.disassembly {
        InputKind::Listing
    } else {
        InputKind::HexBytecode
    };

    let inputs = if cli.inputs.is_empty() {
        vec!["-".to_string()]
    } else {
        cli.inputs.clone()
    };
    if cli.tsv_dir.is_some() && inputs.len() > 1 {
        bail!("-t accepts a single input");
    }

    let color = cli.output.is_none() && std::io::stdout().is_terminal();
    let mut rendered = Vec::new();

    for input in &inputs {
        let source = read_input(input)?;
        let mut out = String::new();
        if inputs.len() > 1 {
            out.push_str(&format!("# {input}\n"));
        }

        if cli.disasm || cli.prettify {
            let ops = match kind {
                InputKind::HexBytecode => parse_hex(&source, cli.strict)?,
                InputKind::Listing => parse_listing(&source, cli.strict)?,
            };
            out.push_str(&disassemble(&ops, cli.prettify, cli.prettify && color));
        } else {
            let analysis = decompile(&source, kind, cli.strict, &config, CancelFlag::new())?;
            if let Some(dir) = &cli.tsv_dir {
                FactExporter::new(&analysis.cfg).write_dir(dir)?;
            }
            if cli.json {
                out.push_str(&serde_json::to_string_pretty(&analysis.to_json())?);
                out.push('\n');
            } else if !cli.no_dump {
                out.push_str(&analysis.render_tac());
            }
        }
        rendered.push(out);
    }

    let text = rendered.concat();
    match &cli.output {
        Some(path) => std::fs::write(path, text)
            .with_context(|| format!("cannot write output file {}", path.display()))?,
        None => {
            std::io::stdout()
                .write_all(text.as_bytes())
                .context("cannot write to stdout")?;
        }
    }

    Ok(())
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        if std::io::stdin().is_terminal() {
            bail!("no input provided: pass a file or pipe to stdin");
        }
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("cannot read stdin")?;
        Ok(buf)
    } else {
        std::fs::read_to_string(input).with_context(|| format!("cannot read input file {input}"))
    }
}
