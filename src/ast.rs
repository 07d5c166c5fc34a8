use crate::span::Position;
use crate::types::JLiteType;

/// A whole JLite program: the main class, then zero or more auxiliary classes.
#[derive(Clone, Debug)]
pub struct Program {
    pub main_class: MainClass,
    pub classes: Vec<ClassDecl>,
}

#[derive(Clone, Debug)]
pub struct MainClass {
    pub name: String,
    pub main_method: MethodDecl,
}

#[derive(Clone, Debug)]
pub struct ClassDecl {
    pub name: String,
    pub position: Position,
    pub fields: Vec<VarDecl>,
    pub methods: Vec<MethodDecl>,
}

#[derive(Clone, Debug)]
pub struct VarDecl {
    pub name: String,
    pub ty: JLiteType,
    pub position: Position,
}

#[derive(Clone, Debug)]
pub struct Param {
    pub name: String,
    pub ty: JLiteType,
    pub position: Position,
}

#[derive(Clone, Debug)]
pub struct MethodDecl {
    pub name: String,
    pub return_ty: JLiteType,
    pub params: Vec<Param>,
    pub locals: Vec<VarDecl>,
    pub body: Vec<Stmt>,
    pub position: Position,
}

#[derive(Clone, Debug)]
pub enum Stmt {
    If {
        cond: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Vec<Stmt>,
        position: Position,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
        position: Position,
    },
    Readln {
        name: String,
        position: Position,
    },
    Println {
        value: Expr,
        position: Position,
    },
    Assign {
        target: Expr,
        value: Expr,
        position: Position,
    },
    /// A bare method call used as a statement, e.g. `foo.bar(1);`.
    ExprStmt {
        value: Expr,
        position: Position,
    },
    Return {
        value: Option<Expr>,
        position: Position,
    },
}

impl Stmt {
    pub fn position(&self) -> &Position {
        match self {
            Stmt::If { position, .. }
            | Stmt::While { position, .. }
            | Stmt::Readln { position, .. }
            | Stmt::Println { position, .. }
            | Stmt::Assign { position, .. }
            | Stmt::ExprStmt { position, .. }
            | Stmt::Return { position, .. } => position,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

/// An expression node: its shape (`kind`), the token it was parsed from
/// (`position`), and — filled in by the static checker, not the parser —
/// its resolved type (§9: the AST is annotated in place rather than kept
/// alongside a separate type map). Lowering reads `resolved_ty` to decide
/// temporary widths and `println`/`readln` codegen without re-deriving
/// types from scratch.
#[derive(Clone, Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub position: Position,
    pub resolved_ty: Option<JLiteType>,
}

impl Expr {
    pub fn new(kind: ExprKind, position: Position) -> Self {
        Self {
            kind,
            position,
            resolved_ty: None,
        }
    }

    pub fn ty(&self) -> &JLiteType {
        self.resolved_ty
            .as_ref()
            .expect("expression type queried before static checking")
    }
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    IntLit(i64),
    BoolLit(bool),
    StringLit(String),
    Null,
    This,
    Id(String),
    BinOp {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    UnOp {
        op: UnOp,
        operand: Box<Expr>,
    },
    FieldAccess {
        target: Box<Expr>,
        field: String,
    },
    /// A method call. `target` is `None` for a bare `m(args)` call resolved
    /// against the current class; `Some(e)` for `e.m(args)`.
    MethodCall {
        target: Option<Box<Expr>>,
        method: String,
        args: Vec<Expr>,
        /// Set by the static checker: the class whose method table matched.
        owner_class: Option<String>,
    },
    New {
        class_name: String,
    },
}
