/// A concrete syntax tree: preserves every token the parser consumed,
/// grouped the way the grammar groups them. Built in lockstep with the
/// AST (§4.2) purely so the pretty-printer can reconstruct an equivalent
/// program; nothing downstream of parsing reads it.
#[derive(Clone, Debug)]
pub enum Cst {
    /// A single token's original spelling.
    Leaf(String),
    /// An ordered group of child fragments (a grammar production).
    Node(Vec<Cst>),
}

impl Cst {
    pub fn node(children: Vec<Cst>) -> Cst {
        Cst::Node(children)
    }

    /// Render the tree back to source text, one space between tokens.
    /// Roundtrips up to whitespace and comments (§8).
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out);
        out
    }

    fn render_into(&self, out: &mut String) {
        match self {
            Cst::Leaf(text) => {
                if !out.is_empty() && !out.ends_with(['(', '.']) && text != ")" && text != ";" && text != "," && text != "." && text != "("
                {
                    out.push(' ');
                }
                out.push_str(text);
            }
            Cst::Node(children) => {
                for child in children {
                    child.render_into(out);
                }
            }
        }
    }
}

pub struct CstRoot {
    pub root: Cst,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_simple_sequence() {
        let cst = Cst::node(vec![
            Cst::Leaf("class".to_string()),
            Cst::Leaf("Main".to_string()),
            Cst::Leaf("{".to_string()),
            Cst::Leaf("}".to_string()),
        ]);
        assert_eq!(cst.render(), "class Main {}");
    }

    #[test]
    fn test_render_call_has_no_space_before_paren() {
        let cst = Cst::node(vec![
            Cst::Leaf("foo".to_string()),
            Cst::Leaf("(".to_string()),
            Cst::Leaf("1".to_string()),
            Cst::Leaf(")".to_string()),
            Cst::Leaf(";".to_string()),
        ]);
        assert_eq!(cst.render(), "foo(1);");
    }
}
