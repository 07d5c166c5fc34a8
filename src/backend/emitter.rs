//! Walks a lowered [`Ir3Program`] and a [`SymbolTable`] and prints textual
//! 32-bit ARM (AAPCS-ish) assembly against a C runtime. One register
//! convention throughout: any expression that isn't a bare atom is always
//! computed into `a1`, matching how [`super::mod`] never hands a call a
//! compound operand.

use std::collections::HashMap;

use crate::diagnostic::{Diagnostic, ErrorKind};
use crate::ir::{Exp3, Ir3Program, Method3, Op3, Stmt3, Un3};
use crate::span::Position;
use crate::types::JLiteType;

use super::{MethodLayout, SymbolTable, FP_DISPLACEMENT, FUNCTION_REGS};

pub fn emit_program(ir3: &Ir3Program) -> Result<String, Diagnostic> {
    let table = SymbolTable::build(ir3)?;
    let string_labels = label_strings(&ir3.strings);

    let mut lines = Vec::new();
    lines.push(".data".to_string());
    lines.push("IntegerFormat:".to_string());
    lines.push(".asciz \"%i\"".to_string());
    for s in &ir3.strings {
        lines.push(format!("{}:", string_labels[s]));
        lines.push(format!(".asciz \"{}\"", escape_asciz(s)));
    }

    lines.push(String::new());
    lines.push(".text".to_string());
    lines.push(".global main".to_string());
    lines.push(".type main, %function".to_string());

    // The main method's exit block is held back and appended after every
    // other method so it lands last in the file, the way a hand-written
    // program would put its one true exit point at the end.
    let mut main_exit: Vec<String> = Vec::new();

    for method in &ir3.methods {
        let layout = table.method(&method.name);
        let label = entry_label(method);
        let exit_label = format!("{}exit", label);

        lines.push(String::new());
        lines.push(format!("{}:", label));
        lines.push("stmfd sp!,{fp,lr,v1,v2,v3,v4,v5}".to_string());
        lines.push(format!("add fp,sp,#{}", FP_DISPLACEMENT));
        lines.push(format!("sub sp,fp,#{}", layout.frame_size));
        lines.extend(emit_param_stores(method, layout));
        lines.extend(emit_body(&method.body, layout, &table, &string_labels, &exit_label)?);
        lines.push(format!("b {}", exit_label));

        let exit_block = vec![
            String::new(),
            format!("{}:", exit_label),
            format!("sub sp,fp,#{}", FP_DISPLACEMENT),
            "ldmfd sp!,{fp,pc,v1,v2,v3,v4,v5}".to_string(),
        ];
        if method.is_main {
            main_exit = exit_block;
        } else {
            lines.extend(exit_block);
        }
    }

    lines.extend(main_exit);
    lines.push(String::new());
    Ok(lines.join("\n"))
}

fn entry_label(method: &Method3) -> &str {
    if method.is_main {
        "main"
    } else {
        &method.name
    }
}

fn label_strings(strings: &[String]) -> HashMap<String, String> {
    strings.iter().enumerate().map(|(i, s)| (s.clone(), format!("L{}", i + 1))).collect()
}

fn escape_asciz(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

fn emit_param_stores(method: &Method3, layout: &MethodLayout) -> Vec<String> {
    let mut lines = Vec::new();
    let mut reg_idx = 0;
    if layout.has_receiver {
        lines.push(format!("str {},[fp,#{}]", FUNCTION_REGS[reg_idx], fp_off(layout, "this")));
        reg_idx += 1;
    }
    for (name, _) in &method.params {
        lines.push(format!("str {},[fp,#{}]", FUNCTION_REGS[reg_idx], fp_off(layout, name)));
        reg_idx += 1;
    }
    lines
}

fn emit_body(
    stmts: &[Stmt3],
    layout: &MethodLayout,
    table: &SymbolTable,
    string_labels: &HashMap<String, String>,
    exit_label: &str,
) -> Result<Vec<String>, Diagnostic> {
    let blocks = super::flow::build_blocks(stmts);
    let mut lines = Vec::new();
    for block in blocks {
        for stmt in &stmts[block.start..block.end] {
            lines.extend(emit_stmt(stmt, layout, table, string_labels, exit_label)?);
        }
    }
    Ok(lines)
}

fn fp_off(layout: &MethodLayout, name: &str) -> i32 {
    -layout.slots.get(name).unwrap_or_else(|| panic!("no stack slot for '{}'", name)).fp_offset
}

fn class_name_of(layout: &MethodLayout, var: &str) -> String {
    match &layout.slots.get(var).unwrap_or_else(|| panic!("no stack slot for '{}'", var)).ty {
        JLiteType::Class(name) => name.clone(),
        other => unreachable!("field access target must be a class-typed variable, found {:?}", other),
    }
}

fn emit_stmt(
    stmt: &Stmt3,
    layout: &MethodLayout,
    table: &SymbolTable,
    string_labels: &HashMap<String, String>,
    exit_label: &str,
) -> Result<Vec<String>, Diagnostic> {
    Ok(match stmt {
        Stmt3::Label(name) => vec![String::new(), format!("{}:", name)],
        Stmt3::Goto(label) => vec![format!("b {}", label)],
        Stmt3::IfGoto { cond, label } => emit_cond_branch(cond, label, layout, string_labels),
        Stmt3::Assign { target, value } => {
            let mut code = emit_exp(value, layout, string_labels)?;
            code.push(format!("str a1,[fp,#{}]", fp_off(layout, target)));
            code
        }
        Stmt3::FieldAssign { object, field, value } => {
            let mut code = emit_exp(value, layout, string_labels)?;
            code.push(format!("ldr a2,[fp,#{}]", fp_off(layout, object)));
            let class_name = class_name_of(layout, object);
            let offset = table.class(&class_name).field_offset(field).expect("static checking guarantees the field exists");
            code.push(format!("str a1,[a2,#{}]", offset));
            code
        }
        Stmt3::ReadField { target, object, field } => {
            let mut code = vec![format!("ldr a1,[fp,#{}]", fp_off(layout, object))];
            let class_name = class_name_of(layout, object);
            let offset = table.class(&class_name).field_offset(field).expect("static checking guarantees the field exists");
            code.push(format!("ldr a1,[a1,#{}]", offset));
            code.push(format!("str a1,[fp,#{}]", fp_off(layout, target)));
            code
        }
        Stmt3::New { target, class_name } => {
            let size = table.class(class_name).size_bytes;
            vec![
                format!("mov a1,#{}", size),
                "bl malloc(PLT)".to_string(),
                format!("str a1,[fp,#{}]", fp_off(layout, target)),
            ]
        }
        Stmt3::Readln { target } => {
            vec!["ldr a1,=IntegerFormat".to_string(), format!("add a2,fp,#{}", fp_off(layout, target)), "bl scanf(PLT)".to_string()]
        }
        Stmt3::Println { value } => emit_println(value, layout, string_labels),
        Stmt3::Call { target, callee, args } => {
            if args.len() > FUNCTION_REGS.len() {
                return Err(Diagnostic::new(
                    ErrorKind::NotImplemented,
                    format!("call to '{}' passes {} argument(s); at most {} are supported", callee, args.len(), FUNCTION_REGS.len()),
                    Position::dummy(),
                ));
            }
            let mut code = Vec::new();
            for (i, arg) in args.iter().enumerate() {
                code.extend(emit_load_atom(FUNCTION_REGS[i], arg, layout, string_labels));
            }
            code.push(format!("bl {}", callee));
            if let Some(t) = target {
                code.push(format!("str a1,[fp,#{}]", fp_off(layout, t)));
            }
            code
        }
        Stmt3::Return(value) => {
            let mut code = match value {
                Some(atom) => emit_load_atom("a1", atom, layout, string_labels),
                None => Vec::new(),
            };
            code.push(format!("b {}", exit_label));
            code
        }
    })
}

/// `if`/`while` conditions are always lowered as `!cond` (see
/// [`crate::ir::lower`]), so this is the only shape that ever reaches here.
fn emit_cond_branch(cond: &Exp3, label: &str, layout: &MethodLayout, string_labels: &HashMap<String, String>) -> Vec<String> {
    let Exp3::UnOp { op: Un3::Not, operand } = cond else {
        unreachable!("if/while conditions are always lowered as a negated atom, found {:?}", cond);
    };
    let mut code = emit_load_atom("a1", operand, layout, string_labels);
    code.push("cmp a1,#1".to_string());
    code.push(format!("bne {}", label));
    code
}

fn emit_println(value: &Exp3, layout: &MethodLayout, string_labels: &HashMap<String, String>) -> Vec<String> {
    match value {
        Exp3::StringLit(s) => vec![format!("ldr a1,={}", string_labels[s]), "bl printf(PLT)".to_string()],
        Exp3::Var(name) if layout.slots[name].ty == JLiteType::String => {
            vec![format!("ldr a1,[fp,#{}]", fp_off(layout, name)), "bl printf(PLT)".to_string()]
        }
        atom => {
            let mut code = vec!["ldr a1,=IntegerFormat".to_string()];
            code.extend(emit_load_atom("a2", atom, layout, string_labels));
            code.push("bl printf(PLT)".to_string());
            code
        }
    }
}

/// Computes a possibly-compound expression into `a1`.
fn emit_exp(value: &Exp3, layout: &MethodLayout, string_labels: &HashMap<String, String>) -> Result<Vec<String>, Diagnostic> {
    match value {
        Exp3::BinOp { op, lhs, rhs } => emit_binop(*op, lhs, rhs, layout, string_labels),
        Exp3::UnOp { op, operand } => Ok(emit_unop(*op, operand, layout, string_labels)),
        atom => Ok(emit_load_atom("a1", atom, layout, string_labels)),
    }
}

fn emit_binop(
    op: Op3,
    lhs: &Exp3,
    rhs: &Exp3,
    layout: &MethodLayout,
    string_labels: &HashMap<String, String>,
) -> Result<Vec<String>, Diagnostic> {
    match op {
        Op3::Lt | Op3::Gt | Op3::Le | Op3::Ge | Op3::Eq | Op3::Ne => Ok(emit_relop(op, lhs, rhs, layout, string_labels)),
        Op3::Div => Err(Diagnostic::new(
            ErrorKind::NotImplemented,
            "division is not supported by this backend".to_string(),
            Position::dummy(),
        )),
        Op3::Add | Op3::Sub | Op3::Mul | Op3::And | Op3::Or => Ok(emit_arith(op, lhs, rhs, layout, string_labels)),
    }
}

fn emit_relop(op: Op3, lhs: &Exp3, rhs: &Exp3, layout: &MethodLayout, string_labels: &HashMap<String, String>) -> Vec<String> {
    let mut code = emit_load_atom("a1", lhs, layout, string_labels);
    code.extend(emit_load_atom("a2", rhs, layout, string_labels));
    code.push("cmp a1,a2".to_string());
    let (when_true, when_false) = match op {
        Op3::Lt => ("movlt", "movge"),
        Op3::Gt => ("movgt", "movle"),
        Op3::Le => ("movle", "movgt"),
        Op3::Ge => ("movge", "movlt"),
        Op3::Eq => ("moveq", "movne"),
        Op3::Ne => ("movne", "moveq"),
        _ => unreachable!("emit_relop only ever sees relational operators"),
    };
    code.push(format!("{} a1,#1", when_true));
    code.push(format!("{} a1,#0", when_false));
    code
}

fn emit_arith(op: Op3, lhs: &Exp3, rhs: &Exp3, layout: &MethodLayout, string_labels: &HashMap<String, String>) -> Vec<String> {
    let mut code = emit_load_atom("a2", lhs, layout, string_labels);
    code.extend(emit_load_atom("a3", rhs, layout, string_labels));
    let op_mnemonic = match op {
        Op3::Add => "add",
        Op3::Sub => "sub",
        Op3::Mul => "mul",
        Op3::And => "and",
        Op3::Or => "orr",
        _ => unreachable!("emit_arith only ever sees add/sub/mul/and/or"),
    };
    code.push(format!("{} a1,a2,a3", op_mnemonic));
    code
}

fn emit_unop(op: Un3, operand: &Exp3, layout: &MethodLayout, string_labels: &HashMap<String, String>) -> Vec<String> {
    let mut code = emit_load_atom("a2", operand, layout, string_labels);
    match op {
        Un3::Neg => {
            code.extend(emit_load_int_imm("a3", -1));
            code.push("mul a1,a2,a3".to_string());
        }
        Un3::Not => {
            code.push("eor a1,a2,#1".to_string());
        }
    }
    code
}

/// Loads an atom directly into `reg`. Never sees `BinOp`/`UnOp` — lowering
/// only ever puts a literal or a variable where an atom is required.
fn emit_load_atom(reg: &str, atom: &Exp3, layout: &MethodLayout, string_labels: &HashMap<String, String>) -> Vec<String> {
    match atom {
        Exp3::IntLit(n) => emit_load_int_imm(reg, *n),
        Exp3::BoolLit(b) => vec![format!("mov {},#{}", reg, if *b { 1 } else { 0 })],
        Exp3::StringLit(s) => vec![format!("ldr {},={}", reg, string_labels[s])],
        Exp3::Null => vec![format!("mov {},#0", reg)],
        Exp3::Var(name) => vec![format!("ldr {},[fp,#{}]", reg, fp_off(layout, name))],
        Exp3::BinOp { .. } | Exp3::UnOp { .. } => unreachable!("atoms never nest a compound expression"),
    }
}

/// `mov` can only encode an 8-bit immediate; anything outside it falls back
/// to the `ldr =` pseudo-op, which the assembler turns into a literal-pool
/// load.
fn emit_load_int_imm(reg: &str, n: i64) -> Vec<String> {
    if (0..=255).contains(&n) {
        vec![format!("mov {},#{}", reg, n)]
    } else {
        vec![format!("ldr {},=#{}", reg, n)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker;
    use crate::ir::lower;
    use crate::lexer::Lexer;
    use crate::parser;
    use std::rc::Rc;

    fn emit_src(src: &str) -> String {
        let lexer = Lexer::new(src, "t.j");
        let tokens = lexer.tokenize().unwrap();
        let (_, mut program) = parser::parse(tokens, Rc::from("t.j")).unwrap();
        checker::check(&mut program).unwrap();
        let ir3 = lower::lower(&program).unwrap();
        emit_program(&ir3).unwrap()
    }

    #[test]
    fn test_main_label_used_even_when_class_is_not_named_main() {
        let asm = emit_src("class Foo { Void main() { println(1); } }");
        assert!(asm.contains("main:"));
        assert!(!asm.contains("_Foo_main:"));
    }

    #[test]
    fn test_main_exit_block_is_last_in_file() {
        let asm = emit_src(
            "class Main { Void main() { Helper h; h = new Helper(); h.greet(); } } \
             class Helper { Void greet() { println(1); } }",
        );
        let main_exit_pos = asm.find("mainexit:").unwrap();
        let helper_exit_pos = asm.find("_Helper_greetexit:").unwrap();
        assert!(main_exit_pos > helper_exit_pos);
        assert!(asm.trim_end().ends_with("ldmfd sp!,{fp,pc,v1,v2,v3,v4,v5}"));
    }

    #[test]
    fn test_division_is_fatal_at_emission() {
        let lexer = Lexer::new("class Main { Void main() { println(10 / 2); } }", "t.j");
        let tokens = lexer.tokenize().unwrap();
        let (_, mut program) = parser::parse(tokens, Rc::from("t.j")).unwrap();
        checker::check(&mut program).unwrap();
        let ir3 = lower::lower(&program).unwrap();
        let err = emit_program(&ir3).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotImplemented);
    }

    #[test]
    fn test_string_literal_gets_own_data_label() {
        let asm = emit_src(r#"class Main { Void main() { println("hi"); } }"#);
        assert!(asm.contains("L1:"));
        assert!(asm.contains(".asciz \"hi\""));
        assert!(asm.contains("ldr a1,=L1"));
    }

    #[test]
    fn test_relop_le_emits_movle_movgt_pair() {
        let asm = emit_src("class Main { Void main() { println(1 <= 2); } }");
        assert!(asm.contains("movle a1,#1"));
        assert!(asm.contains("movgt a1,#0"));
    }

    #[test]
    fn test_field_write_reads_object_pointer_and_stores_into_offset() {
        let asm = emit_src(
            "class Main { Void main() { Foo f; f = new Foo(); f.set(5); } } \
             class Foo { Int x; Void set(Int v) { x = v; } }",
        );
        assert!(asm.contains("str a1,[a2,#0]"));
    }

    #[test]
    fn test_large_int_literal_uses_ldr_pseudo_op() {
        let asm = emit_src("class Main { Void main() { println(1000); } }");
        assert!(asm.contains("ldr a2,=#1000"));
    }
}
