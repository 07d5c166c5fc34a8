use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::*;
use crate::diagnostic::{Diagnostic, ErrorKind};
use crate::span::Position;
use crate::types::JLiteType;

/// A class's shape: its fields (in declaration order — the backend relies
/// on that order for layout) and its method signatures.
#[derive(Clone, Debug)]
pub struct ClassDescriptor {
    pub name: String,
    pub fields: Vec<(String, JLiteType)>,
    pub methods: HashMap<String, MethodSig>,
}

#[derive(Clone, Debug)]
pub struct MethodSig {
    pub params: Vec<JLiteType>,
    pub return_ty: JLiteType,
}

/// Every class in the program, keyed by name, including the main class.
#[derive(Clone, Debug, Default)]
pub struct ClassTable {
    pub classes: HashMap<String, ClassDescriptor>,
}

impl ClassTable {
    pub fn get(&self, name: &str) -> Option<&ClassDescriptor> {
        self.classes.get(name)
    }
}

/// A cons-list scope chain: locals and parameters of the method currently
/// being checked. Lookup walks outward; nothing here ever needs mutation
/// once built, so sharing via `Rc` is enough — no block-scoped shadowing
/// exists in JLite (a method has exactly one flat scope of params+locals).
enum TypeEnvironment {
    Empty,
    Cons { name: String, ty: JLiteType, parent: Rc<TypeEnvironment> },
}

impl TypeEnvironment {
    fn lookup(&self, name: &str) -> Option<&JLiteType> {
        match self {
            TypeEnvironment::Empty => None,
            TypeEnvironment::Cons { name: n, ty, parent } => {
                if n == name {
                    Some(ty)
                } else {
                    parent.lookup(name)
                }
            }
        }
    }
}

fn extend(parent: &Rc<TypeEnvironment>, name: String, ty: JLiteType) -> Rc<TypeEnvironment> {
    Rc::new(TypeEnvironment::Cons { name, ty, parent: parent.clone() })
}

/// Runs both static-check passes over `program`, mutating its `Expr` nodes
/// in place to record `resolved_ty` and (for method calls) `owner_class`.
/// Fails fast: the first ill-typed construct stops checking.
pub fn check(program: &mut Program) -> Result<ClassTable, Diagnostic> {
    let table = build_class_table(program)?;

    {
        let main_name = program.main_class.name.clone();
        let method = &mut program.main_class.main_method;
        check_method(&table, &main_name, true, method)?;
    }
    for class in &mut program.classes {
        let class_name = class.name.clone();
        for method in &mut class.methods {
            check_method(&table, &class_name, false, method)?;
        }
    }
    Ok(table)
}

fn build_class_table(program: &Program) -> Result<ClassTable, Diagnostic> {
    let mut table = ClassTable::default();

    let main_descriptor = ClassDescriptor {
        name: program.main_class.name.clone(),
        fields: Vec::new(),
        methods: HashMap::from([(
            "main".to_string(),
            MethodSig {
                params: program.main_class.main_method.params.iter().map(|p| p.ty.clone()).collect(),
                return_ty: JLiteType::Void,
            },
        )]),
    };
    table.classes.insert(program.main_class.name.clone(), main_descriptor);

    for class in &program.classes {
        if table.classes.contains_key(&class.name) {
            return Err(static_error(
                format!("class '{}' is declared more than once", class.name),
                class.position.clone(),
            ));
        }

        let mut fields = Vec::new();
        let mut seen_fields: HashMap<&str, ()> = HashMap::new();
        for field in &class.fields {
            if seen_fields.insert(&field.name, ()).is_some() {
                return Err(static_error(
                    format!("field '{}' is declared more than once in class '{}'", field.name, class.name),
                    field.position.clone(),
                ));
            }
            fields.push((field.name.clone(), field.ty.clone()));
        }

        let mut methods = HashMap::new();
        for method in &class.methods {
            if methods
                .insert(
                    method.name.clone(),
                    MethodSig {
                        params: method.params.iter().map(|p| p.ty.clone()).collect(),
                        return_ty: method.return_ty.clone(),
                    },
                )
                .is_some()
            {
                return Err(static_error(
                    format!("method '{}' is declared more than once in class '{}'", method.name, class.name),
                    method.position.clone(),
                ));
            }
        }

        table.classes.insert(class.name.clone(), ClassDescriptor { name: class.name.clone(), fields, methods });
    }

    Ok(table)
}

fn static_error(message: String, position: Position) -> Diagnostic {
    Diagnostic::new(ErrorKind::StaticCheck, message, position)
}

fn type_error(message: String, position: Position) -> Diagnostic {
    Diagnostic::new(ErrorKind::TypeCheck, message, position)
}

fn check_method(table: &ClassTable, class_name: &str, is_main: bool, method: &mut MethodDecl) -> Result<(), Diagnostic> {
    let mut env = Rc::new(TypeEnvironment::Empty);
    for param in &method.params {
        env = extend(&env, param.name.clone(), param.ty.clone());
    }
    for local in &method.locals {
        env = extend(&env, local.name.clone(), local.ty.clone());
    }

    let mut ctx = MethodCtx { table, class_name, is_main, return_ty: method.return_ty.clone() };
    for stmt in &mut method.body {
        check_stmt(&mut ctx, &env, stmt)?;
    }
    Ok(())
}

struct MethodCtx<'a> {
    table: &'a ClassTable,
    class_name: &'a str,
    is_main: bool,
    return_ty: JLiteType,
}

fn check_stmt(ctx: &mut MethodCtx, env: &Rc<TypeEnvironment>, stmt: &mut Stmt) -> Result<(), Diagnostic> {
    match stmt {
        Stmt::If { cond, then_branch, else_branch, .. } => {
            let cond_ty = check_expr(ctx, env, cond)?;
            if cond_ty != JLiteType::Bool {
                return Err(type_error(
                    format!("if-condition must be Bool, found {}", cond_ty),
                    cond.position.clone(),
                ));
            }
            for s in then_branch {
                check_stmt(ctx, env, s)?;
            }
            for s in else_branch {
                check_stmt(ctx, env, s)?;
            }
            Ok(())
        }
        Stmt::While { cond, body, .. } => {
            let cond_ty = check_expr(ctx, env, cond)?;
            if cond_ty != JLiteType::Bool {
                return Err(type_error(
                    format!("while-condition must be Bool, found {}", cond_ty),
                    cond.position.clone(),
                ));
            }
            for s in body {
                check_stmt(ctx, env, s)?;
            }
            Ok(())
        }
        Stmt::Readln { name, position } => match env.lookup(name) {
            // Only word-sized scalars are safe to scanf into a stack slot;
            // String would need a pre-allocated buffer this language has no
            // way to express, so it's excluded even though it prints fine.
            Some(JLiteType::Int | JLiteType::Bool) => Ok(()),
            Some(other) => Err(type_error(
                format!("readln target '{}' has non-primitive type {}", name, other),
                position.clone(),
            )),
            None => Err(static_error(
                format!("readln target '{}' is not a declared local variable or parameter", name),
                position.clone(),
            )),
        },
        Stmt::Println { value, position } => {
            let ty = check_expr(ctx, env, value)?;
            if !ty.is_primitive_printable() {
                return Err(type_error(format!("cannot println a value of type {}", ty), position.clone()));
            }
            Ok(())
        }
        Stmt::Assign { target, value, position } => {
            match &target.kind {
                ExprKind::Id(_) | ExprKind::FieldAccess { .. } => {}
                _ => return Err(static_error("assignment target must be a variable or field".to_string(), position.clone())),
            }
            let target_ty = check_expr(ctx, env, target)?;
            let value_ty = check_expr(ctx, env, value)?;
            if target_ty != value_ty {
                return Err(type_error(
                    format!("cannot assign {} to a variable of type {}", value_ty, target_ty),
                    position.clone(),
                ));
            }
            Ok(())
        }
        Stmt::ExprStmt { value, position } => {
            check_expr(ctx, env, value)?;
            if !matches!(value.kind, ExprKind::MethodCall { .. }) {
                return Err(static_error("a bare expression statement must be a method call".to_string(), position.clone()));
            }
            Ok(())
        }
        Stmt::Return { value, position } => match (value, &ctx.return_ty) {
            (None, JLiteType::Void) => Ok(()),
            (None, other) => Err(type_error(format!("missing return value, method returns {}", other), position.clone())),
            (Some(expr), return_ty) => {
                let ty = check_expr(ctx, env, expr)?;
                if &ty != return_ty {
                    return Err(type_error(
                        format!("return type mismatch: expected {}, found {}", return_ty, ty),
                        expr.position.clone(),
                    ));
                }
                Ok(())
            }
        },
    }
}

fn check_expr(ctx: &mut MethodCtx, env: &Rc<TypeEnvironment>, expr: &mut Expr) -> Result<JLiteType, Diagnostic> {
    let position = expr.position.clone();
    let ty = match &mut expr.kind {
        ExprKind::IntLit(_) => JLiteType::Int,
        ExprKind::BoolLit(_) => JLiteType::Bool,
        ExprKind::StringLit(_) => JLiteType::String,
        ExprKind::Null => JLiteType::Null,
        ExprKind::This => {
            if ctx.is_main {
                return Err(static_error("'this' cannot be used in the main class".to_string(), position));
            }
            JLiteType::Class(ctx.class_name.to_string())
        }
        ExprKind::Id(name) => match env.lookup(name) {
            Some(ty) => ty.clone(),
            None => {
                let descriptor = ctx.table.get(ctx.class_name).expect("current class must be registered");
                let field = descriptor.fields.iter().find(|(n, _)| n == name);
                match field {
                    Some((_, ty)) => {
                        let field_ty = ty.clone();
                        let field_name = name.clone();
                        expr.kind = ExprKind::FieldAccess {
                            target: Box::new(Expr::new(ExprKind::This, position.clone())),
                            field: field_name,
                        };
                        field_ty
                    }
                    None => {
                        return Err(static_error(format!("'{}' is not a declared variable or field", name), position));
                    }
                }
            }
        },
        ExprKind::BinOp { op, lhs, rhs } => {
            let lhs_ty = check_expr(ctx, env, lhs)?;
            let rhs_ty = check_expr(ctx, env, rhs)?;
            check_binop(*op, &lhs_ty, &rhs_ty, &position)?
        }
        ExprKind::UnOp { op, operand } => {
            let operand_ty = check_expr(ctx, env, operand)?;
            match (op, &operand_ty) {
                (UnOp::Neg, JLiteType::Int) => JLiteType::Int,
                (UnOp::Not, JLiteType::Bool) => JLiteType::Bool,
                (UnOp::Neg, other) => return Err(type_error(format!("cannot negate a value of type {}", other), position)),
                (UnOp::Not, other) => return Err(type_error(format!("cannot negate a value of type {}", other), position)),
            }
        }
        ExprKind::FieldAccess { target, field } => {
            let target_ty = check_expr(ctx, env, target)?;
            match target_ty {
                JLiteType::Class(class_name) => {
                    let descriptor = ctx
                        .table
                        .get(&class_name)
                        .ok_or_else(|| static_error(format!("unknown class '{}'", class_name), position.clone()))?;
                    descriptor
                        .fields
                        .iter()
                        .find(|(n, _)| n == field)
                        .map(|(_, ty)| ty.clone())
                        .ok_or_else(|| static_error(format!("class '{}' has no field '{}'", class_name, field), position.clone()))?
                }
                other => return Err(type_error(format!("cannot access a field on a value of type {}", other), position)),
            }
        }
        ExprKind::MethodCall { target, method, args, owner_class } => {
            let receiver_class = match target {
                Some(target_expr) => match check_expr(ctx, env, target_expr)? {
                    JLiteType::Class(name) => name,
                    other => return Err(type_error(format!("cannot call a method on a value of type {}", other), position)),
                },
                None => {
                    // A receiver-less call's implicit `this` argument has nowhere
                    // to come from in main, which has no receiver (§4.5).
                    if ctx.is_main {
                        return Err(static_error(
                            format!("'{}' has no implicit receiver to call '{}' on inside the main method", ctx.class_name, method),
                            position,
                        ));
                    }
                    ctx.class_name.to_string()
                }
            };

            let mut arg_tys = Vec::with_capacity(args.len());
            for arg in args.iter_mut() {
                arg_tys.push(check_expr(ctx, env, arg)?);
            }

            let descriptor = ctx
                .table
                .get(&receiver_class)
                .ok_or_else(|| static_error(format!("unknown class '{}'", receiver_class), position.clone()))?;
            let sig = descriptor
                .methods
                .get(method)
                .ok_or_else(|| static_error(format!("class '{}' has no method '{}'", receiver_class, method), position.clone()))?
                .clone();

            if sig.params.len() != arg_tys.len() {
                return Err(static_error(
                    format!(
                        "method '{}' expects {} argument(s), found {}",
                        method,
                        sig.params.len(),
                        arg_tys.len()
                    ),
                    position,
                ));
            }
            for (expected, found) in sig.params.iter().zip(arg_tys.iter()) {
                if expected != found {
                    return Err(type_error(
                        format!("argument of type {} does not match expected type {}", found, expected),
                        position,
                    ));
                }
            }

            *owner_class = Some(receiver_class);
            sig.return_ty
        }
        ExprKind::New { class_name } => {
            ctx.table
                .get(class_name)
                .ok_or_else(|| static_error(format!("unknown class '{}'", class_name), position.clone()))?;
            JLiteType::Class(class_name.clone())
        }
    };
    expr.resolved_ty = Some(ty.clone());
    Ok(ty)
}

fn check_binop(op: BinOp, lhs: &JLiteType, rhs: &JLiteType, position: &Position) -> Result<JLiteType, Diagnostic> {
    use BinOp::*;
    match op {
        Add => {
            if *lhs == JLiteType::Int && *rhs == JLiteType::Int {
                Ok(JLiteType::Int)
            } else if is_string_or_null(lhs) && is_string_or_null(rhs) {
                // String concatenation type-checks; lowering rejects it (§4.4/§7).
                Ok(JLiteType::String)
            } else {
                Err(type_error(format!("'+' requires two Ints or two String/Null, found {} and {}", lhs, rhs), position.clone()))
            }
        }
        Sub | Mul | Div => {
            if *lhs == JLiteType::Int && *rhs == JLiteType::Int {
                Ok(JLiteType::Int)
            } else {
                Err(type_error(format!("arithmetic requires two Ints, found {} and {}", lhs, rhs), position.clone()))
            }
        }
        Lt | Gt | Le | Ge => {
            if *lhs == JLiteType::Int && *rhs == JLiteType::Int {
                Ok(JLiteType::Bool)
            } else {
                Err(type_error(format!("comparison requires two Ints, found {} and {}", lhs, rhs), position.clone()))
            }
        }
        And | Or => {
            if *lhs == JLiteType::Bool && *rhs == JLiteType::Bool {
                Ok(JLiteType::Bool)
            } else {
                Err(type_error(format!("logical operators require two Bools, found {} and {}", lhs, rhs), position.clone()))
            }
        }
        Eq | Ne => {
            if lhs == rhs {
                Ok(JLiteType::Bool)
            } else {
                Err(type_error(format!("cannot compare {} and {} for equality", lhs, rhs), position.clone()))
            }
        }
    }
}

fn is_string_or_null(ty: &JLiteType) -> bool {
    matches!(ty, JLiteType::String | JLiteType::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser;
    use std::rc::Rc as StdRc;

    fn check_src(src: &str) -> Result<(Program, ClassTable), Diagnostic> {
        let lexer = Lexer::new(src, "t.j");
        let tokens = lexer.tokenize().unwrap();
        let (_, mut program) = parser::parse(tokens, StdRc::from("t.j")).unwrap();
        let table = check(&mut program)?;
        Ok((program, table))
    }

    #[test]
    fn test_simple_program_checks_ok() {
        let result = check_src("class Main { Void main() { println(1 + 2); } }");
        assert!(result.is_ok());
    }

    #[test]
    fn test_arithmetic_type_mismatch_rejected() {
        let result = check_src("class Main { Void main() { println(true + 1); } }");
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().kind, ErrorKind::TypeCheck);
    }

    #[test]
    fn test_bare_identifier_resolves_to_field() {
        let (program, _) = check_src(
            "class Main { Void main() { Foo f; f = new Foo(); println(f.get()); } } \
             class Foo { Int x; Int get() { return x; } }",
        )
        .unwrap();
        let foo = program.classes.iter().find(|c| c.name == "Foo").unwrap();
        let get = foo.methods.iter().find(|m| m.name == "get").unwrap();
        match &get.body[0] {
            Stmt::Return { value: Some(expr), .. } => {
                assert!(matches!(expr.kind, ExprKind::FieldAccess { .. }));
            }
            other => panic!("expected Return, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = check_src(
            "class Main { Void main() { Foo f; f = new Foo(); println(f.bogus); } } \
             class Foo { Int x; }",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_method_call_records_owner_class() {
        let (program, _) = check_src(
            "class Main { Void main() { Foo f; f = new Foo(); println(f.get()); } } \
             class Foo { Int x; Int get() { return x; } }",
        )
        .unwrap();
        match &program.main_class.main_method.body[2] {
            Stmt::Println { value, .. } => match &value.kind {
                ExprKind::MethodCall { owner_class, .. } => assert_eq!(owner_class.as_deref(), Some("Foo")),
                other => panic!("expected MethodCall, got {:?}", other),
            },
            other => panic!("expected Println, got {:?}", other),
        }
    }

    #[test]
    fn test_null_relaxed_equality_allowed() {
        let result = check_src(
            "class Main { Void main() { Foo f; f = new Foo(); println(f == null); } } class Foo { }",
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_duplicate_class_rejected() {
        let result = check_src("class Main { Void main() { println(1); } } class Foo {} class Foo {}");
        assert!(result.is_err());
    }

    #[test]
    fn test_wrong_argument_count_rejected() {
        let result = check_src(
            "class Main { Void main() { Foo f; f = new Foo(); println(f.get(1)); } } \
             class Foo { Int get() { return 1; } }",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_this_rejected_in_main() {
        let result = check_src("class Main { Void main() { println(this.x); } }");
        assert!(result.is_err());
    }
}
