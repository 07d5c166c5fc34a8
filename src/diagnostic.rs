use crate::span::Position;

/// The five fatal error kinds from the pipeline's error taxonomy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    IllegalToken,
    InvalidSyntax,
    IllegalEscape,
    IllegalSyntax,
    StaticCheck,
    TypeCheck,
    NotImplemented,
}

impl ErrorKind {
    fn label(&self) -> &'static str {
        match self {
            ErrorKind::IllegalToken => "IllegalToken",
            ErrorKind::InvalidSyntax => "InvalidSyntax",
            ErrorKind::IllegalEscape => "IllegalEscape",
            ErrorKind::IllegalSyntax => "IllegalSyntax",
            ErrorKind::StaticCheck => "StaticCheck",
            ErrorKind::TypeCheck => "TypeCheck",
            ErrorKind::NotImplemented => "NotImplemented",
        }
    }
}

/// A fatal compiler diagnostic. The pipeline is fail-fast: the first one
/// produced by any stage stops compilation.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub message: String,
    pub position: Position,
    pub notes: Vec<String>,
    pub help: Option<String>,
}

impl Diagnostic {
    pub fn new(kind: ErrorKind, message: String, position: Position) -> Self {
        Self {
            kind,
            message,
            position,
            notes: Vec::new(),
            help: None,
        }
    }

    pub fn with_note(mut self, note: String) -> Self {
        self.notes.push(note);
        self
    }

    pub fn with_help(mut self, help: String) -> Self {
        self.help = Some(help);
        self
    }

    /// The exact wire format required by the external interface:
    /// `<ErrorKind>: <message>\nFile <file>, row <r>, col <c>\n`
    pub fn spec_text(&self) -> String {
        format!(
            "{}: {}\nFile {}, row {}, col {}\n",
            self.kind.label(),
            self.message,
            self.position.file,
            self.position.row,
            self.position.col
        )
    }

    /// Render a richer, boxed diagnostic to stderr using ariadne. Used by
    /// tooling that wants source context rather than the bare wire format.
    pub fn render_ariadne(&self, source: &str) {
        use ariadne::{Color, Label, Report, ReportKind, Source};

        let filename = self.position.file.to_string();
        let offset = self.position.byte_offset as usize;
        let end = (offset + 1).min(source.len().max(1));

        let mut report = Report::build(ReportKind::Error, filename.clone(), offset)
            .with_message(&self.message)
            .with_label(
                Label::new((filename.clone(), offset..end))
                    .with_message(&self.message)
                    .with_color(Color::Red),
            );

        for note in &self.notes {
            report = report.with_note(note);
        }
        if let Some(help) = &self.help {
            report = report.with_help(help);
        }

        let _ = report
            .finish()
            .eprint((filename, Source::from(source)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn pos(row: u32, col: u32) -> Position {
        Position::new(Rc::from("test.j"), row, col, 0)
    }

    #[test]
    fn test_spec_text_format() {
        let d = Diagnostic::new(ErrorKind::TypeCheck, "type mismatch".to_string(), pos(3, 7));
        assert_eq!(
            d.spec_text(),
            "TypeCheck: type mismatch\nFile test.j, row 3, col 7\n"
        );
    }

    #[test]
    fn test_with_note_and_help() {
        let d = Diagnostic::new(ErrorKind::StaticCheck, "duplicate field".to_string(), pos(1, 1))
            .with_note("field 'x' declared twice".to_string())
            .with_help("rename one of the fields".to_string());
        assert_eq!(d.notes.len(), 1);
        assert_eq!(d.help.as_deref(), Some("rename one of the fields"));
    }

    #[test]
    fn test_render_ariadne_does_not_panic() {
        let source = "class Main {\n}\n";
        let d = Diagnostic::new(ErrorKind::IllegalSyntax, "unexpected token".to_string(), pos(2, 1));
        d.render_ariadne(source);
    }
}
