use super::{ClassData3, Exp3, Ir3Program, Method3, Op3, Stmt3, Un3, Var3};
use crate::ast::{BinOp, Expr, ExprKind, MethodDecl, Program, Stmt, UnOp};
use crate::diagnostic::{Diagnostic, ErrorKind};
use crate::types::JLiteType;

/// Lowers a fully type-checked [`Program`] (every `Expr::resolved_ty` and
/// `MethodCall::owner_class` already filled in by [`crate::checker`]) into
/// three-address code.
pub fn lower(program: &Program) -> Result<Ir3Program, Diagnostic> {
    let mut strings = Vec::new();
    let mut methods = Vec::new();

    methods.push(lower_method(&program.main_class.name, true, &program.main_class.main_method, &mut strings)?);
    for class in &program.classes {
        for method in &class.methods {
            methods.push(lower_method(&class.name, false, method, &mut strings)?);
        }
    }

    let classes = program
        .classes
        .iter()
        .map(|c| ClassData3 {
            name: c.name.clone(),
            fields: c.fields.iter().map(|f| (f.name.clone(), f.ty.clone())).collect(),
        })
        .collect();

    Ok(Ir3Program { classes, methods, strings })
}

pub fn mangle(class_name: &str, method_name: &str) -> String {
    format!("_{}_{}", class_name, method_name)
}

fn intern_string(strings: &mut Vec<String>, s: &str) {
    if !strings.iter().any(|existing| existing == s) {
        strings.push(s.to_string());
    }
}

fn is_string_or_null(ty: &JLiteType) -> bool {
    matches!(ty, JLiteType::String | JLiteType::Null)
}

struct MethodLowering<'a> {
    temp_counter: u32,
    label_counter: u32,
    extra_locals: Vec<(String, JLiteType)>,
    stmts: Vec<Stmt3>,
    strings: &'a mut Vec<String>,
}

impl<'a> MethodLowering<'a> {
    fn fresh_temp(&mut self, ty: JLiteType) -> Var3 {
        self.temp_counter += 1;
        let name = format!("_t{}", self.temp_counter);
        self.extra_locals.push((name.clone(), ty));
        name
    }

    fn fresh_label(&mut self) -> String {
        self.label_counter += 1;
        format!("_L{}", self.label_counter)
    }

    fn emit(&mut self, stmt: Stmt3) {
        self.stmts.push(stmt);
    }

    fn lower_block(&mut self, block: &[Stmt]) -> Result<(), Diagnostic> {
        for stmt in block {
            self.lower_stmt(stmt)?;
        }
        Ok(())
    }

    fn lower_stmt(&mut self, stmt: &Stmt) -> Result<(), Diagnostic> {
        match stmt {
            Stmt::If { cond, then_branch, else_branch, .. } => {
                let label_else = self.fresh_label();
                let label_end = self.fresh_label();
                let cond_atom = self.lower_atom(cond)?;
                self.emit(Stmt3::IfGoto {
                    cond: Exp3::UnOp { op: Un3::Not, operand: Box::new(cond_atom) },
                    label: label_else.clone(),
                });
                self.lower_block(then_branch)?;
                self.emit(Stmt3::Goto(label_end.clone()));
                self.emit(Stmt3::Label(label_else));
                self.lower_block(else_branch)?;
                self.emit(Stmt3::Label(label_end));
            }
            Stmt::While { cond, body, .. } => {
                let label_start = self.fresh_label();
                let label_end = self.fresh_label();
                self.emit(Stmt3::Label(label_start.clone()));
                let cond_atom = self.lower_atom(cond)?;
                self.emit(Stmt3::IfGoto {
                    cond: Exp3::UnOp { op: Un3::Not, operand: Box::new(cond_atom) },
                    label: label_end.clone(),
                });
                self.lower_block(body)?;
                self.emit(Stmt3::Goto(label_start));
                self.emit(Stmt3::Label(label_end));
            }
            Stmt::Readln { name, .. } => {
                self.emit(Stmt3::Readln { target: name.clone() });
            }
            Stmt::Println { value, .. } => {
                let atom = self.lower_atom(value)?;
                self.emit(Stmt3::Println { value: atom });
            }
            Stmt::Assign { target, value, .. } => {
                let value_atom = self.lower_atom(value)?;
                match &target.kind {
                    ExprKind::Id(name) => {
                        self.emit(Stmt3::Assign { target: name.clone(), value: value_atom });
                    }
                    ExprKind::FieldAccess { target: object, field } => {
                        let object_var = self.lower_to_var(object)?;
                        self.emit(Stmt3::FieldAssign { object: object_var, field: field.clone(), value: value_atom });
                    }
                    other => unreachable!("static checking guarantees an lvalue, found {:?}", other),
                }
            }
            Stmt::ExprStmt { value, .. } => {
                self.lower_call_discarding_result(value)?;
            }
            Stmt::Return { value, .. } => {
                let atom = match value {
                    Some(v) => Some(self.lower_atom(v)?),
                    None => None,
                };
                self.emit(Stmt3::Return(atom));
            }
        }
        Ok(())
    }

    /// Lowers `expr` to an atom (a literal or a bare variable), emitting
    /// whatever intermediate assignments are needed to get there. `&&`/`||`
    /// are lowered as ordinary eager binary operators — JLite does not
    /// short-circuit (this is deliberate, not an oversight).
    fn lower_atom(&mut self, expr: &Expr) -> Result<Exp3, Diagnostic> {
        match &expr.kind {
            ExprKind::IntLit(n) => Ok(Exp3::IntLit(*n)),
            ExprKind::BoolLit(b) => Ok(Exp3::BoolLit(*b)),
            ExprKind::StringLit(s) => {
                intern_string(self.strings, s);
                Ok(Exp3::StringLit(s.clone()))
            }
            ExprKind::Null => Ok(Exp3::Null),
            ExprKind::This => Ok(Exp3::Var("this".to_string())),
            ExprKind::Id(name) => Ok(Exp3::Var(name.clone())),
            ExprKind::BinOp { op, lhs, rhs } => {
                // The checker accepts String/Null '+' (it type-checks to String),
                // but string concatenation has no runtime support to lower it
                // into — reject here rather than silently emitting nonsense.
                if *op == BinOp::Add && is_string_or_null(lhs.ty()) && is_string_or_null(rhs.ty()) {
                    return Err(Diagnostic::new(
                        ErrorKind::NotImplemented,
                        "string concatenation ('+' on String/Null operands) is not supported by this backend".to_string(),
                        expr.position.clone(),
                    ));
                }
                let l = self.lower_atom(lhs)?;
                let r = self.lower_atom(rhs)?;
                let temp = self.fresh_temp(expr.ty().clone());
                self.emit(Stmt3::Assign {
                    target: temp.clone(),
                    value: Exp3::BinOp { op: lower_binop(*op), lhs: Box::new(l), rhs: Box::new(r) },
                });
                Ok(Exp3::Var(temp))
            }
            ExprKind::UnOp { op, operand } => {
                let o = self.lower_atom(operand)?;
                let temp = self.fresh_temp(expr.ty().clone());
                self.emit(Stmt3::Assign {
                    target: temp.clone(),
                    value: Exp3::UnOp { op: lower_unop(*op), operand: Box::new(o) },
                });
                Ok(Exp3::Var(temp))
            }
            ExprKind::FieldAccess { target, field } => {
                let object = self.lower_to_var(target)?;
                let temp = self.fresh_temp(expr.ty().clone());
                self.emit(Stmt3::ReadField { target: temp.clone(), object, field: field.clone() });
                Ok(Exp3::Var(temp))
            }
            ExprKind::MethodCall { .. } => {
                let temp = self.lower_call(expr, true)?.expect("call requesting a result must produce a temp");
                Ok(Exp3::Var(temp))
            }
            ExprKind::New { class_name } => {
                let temp = self.fresh_temp(expr.ty().clone());
                self.emit(Stmt3::New { target: temp.clone(), class_name: class_name.clone() });
                Ok(Exp3::Var(temp))
            }
        }
    }

    /// A `FieldAccess`/`MethodCall` target is always itself object-valued
    /// (`this`, a variable, or another field read/call) — atomizing it
    /// always yields a `Var3`, never a literal.
    fn lower_to_var(&mut self, expr: &Expr) -> Result<Var3, Diagnostic> {
        match self.lower_atom(expr)? {
            Exp3::Var(v) => Ok(v),
            other => unreachable!("expected an object-valued atom, found {:?}", other),
        }
    }

    fn lower_call_discarding_result(&mut self, expr: &Expr) -> Result<(), Diagnostic> {
        self.lower_call(expr, false)?;
        Ok(())
    }

    fn lower_call(&mut self, expr: &Expr, want_result: bool) -> Result<Option<Var3>, Diagnostic> {
        let ExprKind::MethodCall { target, method, args, owner_class } = &expr.kind else {
            unreachable!("lower_call called on a non-call expression");
        };
        let owner = owner_class.as_deref().expect("owner_class is set by static checking");

        // A receiver-less call implicitly passes `this`; the static checker
        // rejects this form inside main, which has no receiver to pass.
        let receiver = match target {
            Some(target_expr) => self.lower_atom(target_expr)?,
            None => Exp3::Var("this".to_string()),
        };
        let mut call_args = vec![receiver];
        for arg in args {
            call_args.push(self.lower_atom(arg)?);
        }

        let result_temp = if want_result && *expr.ty() != JLiteType::Void {
            Some(self.fresh_temp(expr.ty().clone()))
        } else {
            None
        };
        self.emit(Stmt3::Call { target: result_temp.clone(), callee: mangle(owner, method), args: call_args });
        Ok(result_temp)
    }
}

fn lower_method(class_name: &str, is_main: bool, method: &MethodDecl, strings: &mut Vec<String>) -> Result<Method3, Diagnostic> {
    let mut lowering = MethodLowering {
        temp_counter: 0,
        label_counter: 0,
        extra_locals: Vec::new(),
        stmts: Vec::new(),
        strings,
    };
    lowering.lower_block(&method.body)?;

    let mut locals: Vec<(String, JLiteType)> =
        method.locals.iter().map(|l| (l.name.clone(), l.ty.clone())).collect();
    locals.extend(lowering.extra_locals);

    Ok(Method3 {
        name: mangle(class_name, &method.name),
        is_main,
        owner_class: if is_main { None } else { Some(class_name.to_string()) },
        params: method.params.iter().map(|p| (p.name.clone(), p.ty.clone())).collect(),
        return_ty: method.return_ty.clone(),
        locals,
        body: lowering.stmts,
    })
}

fn lower_binop(op: BinOp) -> Op3 {
    match op {
        BinOp::Add => Op3::Add,
        BinOp::Sub => Op3::Sub,
        BinOp::Mul => Op3::Mul,
        BinOp::Div => Op3::Div,
        BinOp::And => Op3::And,
        BinOp::Or => Op3::Or,
        BinOp::Lt => Op3::Lt,
        BinOp::Gt => Op3::Gt,
        // A correct lowering uses `Le` directly — an earlier implementation
        // of this grammar lowered `<=` through `ne`, which only happened to
        // work because its backend's `Relop` never distinguished them; ours does.
        BinOp::Le => Op3::Le,
        BinOp::Ge => Op3::Ge,
        BinOp::Eq => Op3::Eq,
        BinOp::Ne => Op3::Ne,
    }
}

fn lower_unop(op: UnOp) -> Un3 {
    match op {
        UnOp::Neg => Un3::Neg,
        UnOp::Not => Un3::Not,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker;
    use crate::lexer::Lexer;
    use crate::parser;
    use std::rc::Rc;

    fn lower_src(src: &str) -> Ir3Program {
        let lexer = Lexer::new(src, "t.j");
        let tokens = lexer.tokenize().unwrap();
        let (_, mut program) = parser::parse(tokens, Rc::from("t.j")).unwrap();
        checker::check(&mut program).unwrap();
        lower(&program).unwrap()
    }

    fn lower_src_err(src: &str) -> Diagnostic {
        let lexer = Lexer::new(src, "t.j");
        let tokens = lexer.tokenize().unwrap();
        let (_, mut program) = parser::parse(tokens, Rc::from("t.j")).unwrap();
        checker::check(&mut program).unwrap();
        lower(&program).unwrap_err()
    }

    #[test]
    fn test_main_method_mangled_and_flagged() {
        let ir3 = lower_src("class Main { Void main() { println(1); } }");
        assert_eq!(ir3.methods[0].name, "_Main_main");
        assert!(ir3.methods[0].is_main);
    }

    #[test]
    fn test_le_lowers_to_le_not_ne() {
        let ir3 = lower_src("class Main { Void main() { println(1 <= 2); } }");
        let found = ir3.methods[0].body.iter().any(|s| matches!(
            s,
            Stmt3::Assign { value: Exp3::BinOp { op: Op3::Le, .. }, .. }
        ));
        assert!(found, "expected a Le binop in the lowered body");
    }

    #[test]
    fn test_if_else_lowers_to_labels_and_gotos() {
        let ir3 = lower_src("class Main { Void main() { if (true) { println(1); } else { println(2); } } }");
        let labels: Vec<_> = ir3.methods[0]
            .body
            .iter()
            .filter(|s| matches!(s, Stmt3::Label(_)))
            .collect();
        assert_eq!(labels.len(), 2);
    }

    #[test]
    fn test_string_literal_interned_once() {
        let ir3 = lower_src(r#"class Main { Void main() { println("hi"); println("hi"); } }"#);
        assert_eq!(ir3.strings.len(), 1);
        assert_eq!(ir3.strings[0], "hi");
    }

    #[test]
    fn test_field_write_and_method_call_receiver() {
        let ir3 = lower_src(
            "class Main { Void main() { Foo f; f = new Foo(); f.set(1); } } \
             class Foo { Int x; Void set(Int v) { x = v; } }",
        );
        let set_method = ir3.methods.iter().find(|m| m.name == "_Foo_set").unwrap();
        assert!(matches!(set_method.body[0], Stmt3::FieldAssign { .. }));

        let main_method = &ir3.methods[0];
        let call = main_method.body.iter().find(|s| matches!(s, Stmt3::Call { .. })).unwrap();
        match call {
            Stmt3::Call { callee, args, .. } => {
                assert_eq!(callee, "_Foo_set");
                assert_eq!(args.len(), 2); // receiver + one argument
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_temp_and_label_numbering_starts_at_one() {
        let ir3 = lower_src("class Main { Void main() { if (1 <= 2) { println(1); } else { println(2); } } }");
        let has_t1 = ir3.methods[0].locals.iter().any(|(name, _)| name == "_t1");
        assert!(has_t1, "expected the first temporary to be named _t1");
        let has_l1 = ir3.methods[0].body.iter().any(|s| matches!(s, Stmt3::Label(l) if l == "_L1"));
        assert!(has_l1, "expected the first label to be named _L1");
    }

    #[test]
    fn test_string_concat_rejected_at_lowering() {
        let err = lower_src_err(r#"class Main { Void main() { String s; s = "a" + "b"; } }"#);
        assert_eq!(err.kind, ErrorKind::NotImplemented);
    }

    #[test]
    fn test_receiver_less_call_in_main_rejected_by_checker() {
        let result = checker::check(&mut {
            let lexer = Lexer::new("class Main { Void main() { main(); } }", "t.j");
            let tokens = lexer.tokenize().unwrap();
            parser::parse(tokens, Rc::from("t.j")).unwrap().1
        });
        assert!(result.is_err());
    }
}
