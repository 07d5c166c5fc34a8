use std::path::PathBuf;
use std::process;

use clap::Parser;

/// Compile a .j source file to ARM assembly.
#[derive(Parser)]
#[command(name = "compile", version, about = "JLite to ARM compiler")]
struct Cli {
    /// Input .j source file
    input: PathBuf,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let source = match std::fs::read_to_string(&cli.input) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", cli.input.display(), e);
            process::exit(1);
        }
    };

    let filename = cli.input.to_string_lossy().to_string();
    match jlite::compile(&source, &filename) {
        Ok(asm) => {
            println!("{}", asm);
            let out_path = cli.input.with_extension("s");
            if let Err(e) = std::fs::write(&out_path, &asm) {
                eprintln!("error: cannot write '{}': {}", out_path.display(), e);
                process::exit(1);
            }
            eprintln!("Compiled -> {}", out_path.display());
        }
        Err(diag) => {
            diag.render_ariadne(&source);
            print!("{}", diag.spec_text());
            process::exit(1);
        }
    }
}
