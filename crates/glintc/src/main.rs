//! Glint compiler CLI.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context as _, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use glint_core::{metadata, printer, Compiler, Context, ObjectFormat, Target};

#[derive(Parser)]
#[command(name = "glintc")]
#[command(author, version, about = "Glint compiler", long_about = None)]
struct Cli {
    /// Input source file.
    input: PathBuf,

    /// Print extra information about what the compiler is doing.
    #[arg(short, long)]
    verbose: bool,

    /// Print the AST after analysis (or after parsing with
    /// --syntax-only).
    #[arg(long)]
    print_ast: bool,

    /// Stop after parsing.
    #[arg(long)]
    syntax_only: bool,

    /// Output path.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Add a directory to the module search path. May be repeated.
    #[arg(short = 'I', value_name = "DIR")]
    include: Vec<PathBuf>,

    /// Write the module's exported interface as a .gmeta blob.
    #[arg(long)]
    emit_meta: bool,

    /// Use colour in diagnostics.
    #[arg(long)]
    colour: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("glintc: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut ctx = Context::new(Target::X86_64_LINUX, ObjectFormat::Elf, cli.colour);
    for dir in &cli.include {
        ctx.add_include_directory(dir);
    }

    let mut compiler = Compiler::with_context(ctx);
    let mut module = compiler
        .load_file(&cli.input)
        .with_context(|| format!("failed to read {}", cli.input.display()))?;

    if cli.syntax_only {
        if cli.print_ast {
            print!("{}", printer::print_module(compiler.context(), &module));
        }
        eprint!("{}", compiler.render_diagnostics());
        return Ok(exit_code(&compiler));
    }

    compiler.analyse(&mut module);
    eprint!("{}", compiler.render_diagnostics());

    if cli.print_ast {
        print!("{}", printer::print_module(compiler.context(), &module));
    }

    if compiler.has_errors() {
        return Ok(ExitCode::FAILURE);
    }

    if cli.emit_meta {
        let blob = metadata::serialise(compiler.context(), &module);
        let path = cli.output.clone().unwrap_or_else(|| {
            cli.input
                .with_file_name(format!("{}.gmeta", module.name))
        });
        std::fs::write(&path, blob)
            .with_context(|| format!("failed to write {}", path.display()))?;
    } else if let Some(path) = &cli.output {
        // IR and object emission live downstream; the elaborated tree
        // is what this tool produces.
        let dump = printer::print_module(compiler.context(), &module);
        std::fs::write(path, dump)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    Ok(ExitCode::SUCCESS)
}

fn exit_code(compiler: &Compiler) -> ExitCode {
    if compiler.has_errors() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
