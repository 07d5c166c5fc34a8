//! Three-address intermediate representation between the typed AST and
//! the ARM backend. Every operation's operands are atoms — a literal or
//! a named variable — never a nested expression; anything more complex
//! gets a fresh temporary during lowering (see [`lower::lower`]).

pub mod lower;

use crate::types::JLiteType;

pub type Var3 = String;

#[derive(Clone, Debug)]
pub struct Ir3Program {
    pub classes: Vec<ClassData3>,
    pub methods: Vec<Method3>,
    /// Every string literal appearing anywhere in the program, in first-use
    /// order. The backend emits one `.data` label per entry; nothing else
    /// in the pipeline needs its own copy of this table.
    pub strings: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct ClassData3 {
    pub name: String,
    pub fields: Vec<(String, JLiteType)>,
}

#[derive(Clone, Debug)]
pub struct Method3 {
    /// Mangled as `_<Class>_<method>`. The backend, not this stage, special
    /// cases the program's entry method down to a bare `main` label — so a
    /// main class need not literally be named `Main` for this to work.
    pub name: String,
    pub is_main: bool,
    /// `None` for the main method, which has no receiver. Lets the backend
    /// type the implicit `this` slot without re-deriving it from `name`.
    pub owner_class: Option<String>,
    /// Does not include the implicit receiver; the backend adds the
    /// receiver slot itself for non-main methods.
    pub params: Vec<(String, JLiteType)>,
    pub return_ty: JLiteType,
    /// Declared locals followed by the temporaries lowering introduced.
    pub locals: Vec<(String, JLiteType)>,
    pub body: Vec<Stmt3>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op3 {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Un3 {
    Neg,
    Not,
}

#[derive(Clone, Debug)]
pub enum Exp3 {
    IntLit(i64),
    BoolLit(bool),
    StringLit(String),
    Null,
    Var(Var3),
    BinOp { op: Op3, lhs: Box<Exp3>, rhs: Box<Exp3> },
    UnOp { op: Un3, operand: Box<Exp3> },
}

#[derive(Clone, Debug)]
pub enum Stmt3 {
    Label(String),
    Goto(String),
    /// `if (cond) goto label` — `cond` is an atom-level expression, most
    /// commonly a bare variable or its negation.
    IfGoto { cond: Exp3, label: String },
    Assign { target: Var3, value: Exp3 },
    FieldAssign { object: Var3, field: String, value: Exp3 },
    ReadField { target: Var3, object: Var3, field: String },
    New { target: Var3, class_name: String },
    Readln { target: Var3 },
    Println { value: Exp3 },
    /// `target = callee(args)`, or a bare call when `target` is `None`.
    /// `args` already has the receiver object prepended for instance calls.
    Call { target: Option<Var3>, callee: String, args: Vec<Exp3> },
    Return(Option<Exp3>),
}
