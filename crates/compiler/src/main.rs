//! FasterBASIC compiler CLI.
//!
//! `fbc program.bas` builds an executable; `-i` stops after IR, `-c`
//! after assembly, `--jit` compiles and runs in-process.

use clap::Parser as ClapParser;
use std::path::PathBuf;
use std::process;

#[derive(ClapParser)]
#[command(name = "fbc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "FasterBASIC compiler - ARM64 AOT and JIT", long_about = None)]
struct Cli {
    /// Input .bas source file
    input: PathBuf,

    /// Output executable path (defaults to the input name without .bas)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print the intermediate representation and stop
    #[arg(short = 'i', long = "emit-ir")]
    emit_ir: bool,

    /// Write the assembly (.s) and stop
    #[arg(short = 'c', long = "emit-asm")]
    emit_asm: bool,

    /// Compile and execute in-process
    #[arg(long)]
    jit: bool,

    /// Directory containing libfb_runtime.a for the link step
    #[arg(long, value_name = "PATH")]
    runtime_dir: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_dir = cli
        .input
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    let mut config = fbc::CompilerConfig::load(&config_dir);
    if cli.runtime_dir.is_some() {
        config.runtime_dir = cli.runtime_dir.clone();
    }

    let source = match std::fs::read_to_string(&cli.input) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("fbc: cannot read {}: {}", cli.input.display(), err);
            process::exit(1);
        }
    };

    if cli.emit_ir {
        match fbc::emit_ir(&source, &config) {
            Ok(text) => print!("{}", text),
            Err(err) => fail(err),
        }
        return;
    }

    if cli.emit_asm {
        let asm_path = output_path(&cli).with_extension("s");
        match fbc::compile_to_assembly(&source, &config) {
            Ok(text) => {
                if let Err(err) = std::fs::write(&asm_path, text) {
                    eprintln!("fbc: cannot write {}: {}", asm_path.display(), err);
                    process::exit(1);
                }
                println!("wrote {}", asm_path.display());
            }
            Err(err) => fail(err),
        }
        return;
    }

    if cli.jit {
        match fbc::jit_run(&source, &config) {
            Ok(status) => process::exit(status),
            Err(err) => fail(err),
        }
    }

    let output = output_path(&cli);
    if let Err(err) = fbc::build_executable(&cli.input, &output, &config) {
        fail(err);
    }
}

fn output_path(cli: &Cli) -> PathBuf {
    cli.output.clone().unwrap_or_else(|| {
        let stem = cli.input.file_stem().unwrap_or_default();
        PathBuf::from(stem)
    })
}

fn fail(err: fbc::CompileError) -> ! {
    eprintln!("{}", err);
    process::exit(1);
}
