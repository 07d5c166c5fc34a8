//! Whole-program, non-optimizing JLite-to-ARM compiler.
//!
//! ```text
//! source -> lexer -> parser (CST + AST) -> checker -> IR3 lowering -> ARM backend
//! ```
//!
//! Every stage is fail-fast: the first [`Diagnostic`] produced by any stage
//! stops the pipeline and is handed back to the caller.

pub mod ast;
pub mod backend;
pub mod checker;
pub mod cst;
pub mod diagnostic;
pub mod ir;
pub mod lexer;
pub mod parser;
pub mod span;
pub mod token;
pub mod types;

use std::rc::Rc;

pub use diagnostic::Diagnostic;

/// Runs the full pipeline over `source` and returns the generated assembly
/// text. `filename` is used only for diagnostic positions.
pub fn compile(source: &str, filename: &str) -> Result<String, Diagnostic> {
    log::debug!("lexing {}", filename);
    let tokens = lexer::Lexer::new(source, filename).tokenize()?;

    log::debug!("parsing {} ({} tokens)", filename, tokens.len());
    let (_cst, mut program) = parser::parse(tokens, Rc::from(filename))?;

    log::debug!("checking {}", filename);
    checker::check(&mut program)?;

    log::debug!("lowering {} to IR3", filename);
    let ir3 = ir::lower::lower(&program)?;

    log::debug!("emitting ARM for {}", filename);
    backend::emitter::emit_program(&ir3)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_minimal_program() {
        let asm = compile("class Main { Void main() { println(1); } }", "t.j").unwrap();
        assert!(asm.contains("main:"));
        assert!(asm.contains("bl printf(PLT)"));
    }

    #[test]
    fn test_compile_reports_type_errors() {
        let err = compile("class Main { Void main() { println(true + 1); } }", "t.j").unwrap_err();
        assert_eq!(err.kind, diagnostic::ErrorKind::TypeCheck);
    }

    #[test]
    fn test_compile_reports_parse_errors() {
        let err = compile("class Main { Void notmain() { } }", "t.j").unwrap_err();
        assert_eq!(err.kind, diagnostic::ErrorKind::InvalidSyntax);
    }
}
