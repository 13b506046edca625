//! Untyped abstract syntax
//!
//! The trees produced by the parser, before name resolution and type
//! checking: expressions, statements, and the declaration records of the
//! input language. Everything here is plain data; the analyses live in
//! [`crate::expr`] as functions matching over these variants.

use std::fmt;

/// Unary operators.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    /// Arithmetic negation `-e`.
    Neg,
    /// Logical negation `!e`.
    Not,
}

/// Binary operators, C-like precedence. There is no `||`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Plus,
    Minus,
    Times,
    Div,
    Mod,
    Lt,
    Le,
    Eq,
    Ne,
    Ge,
    Gt,
    And,
}

impl BinaryOp {
    /// True for the six comparison operators.
    pub fn is_predicate(self) -> bool {
        matches!(
            self,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Ge | BinaryOp::Gt
        )
    }

    /// Mirror a comparison (`a op b` into `b op' a`).
    pub fn reversed(self) -> BinaryOp {
        match self {
            BinaryOp::Lt => BinaryOp::Gt,
            BinaryOp::Le => BinaryOp::Ge,
            BinaryOp::Gt => BinaryOp::Lt,
            BinaryOp::Ge => BinaryOp::Le,
            other => other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Times => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Ge => ">=",
            BinaryOp::Gt => ">",
            BinaryOp::And => "&&",
        }
    }
}

/// An expression as parsed. Variables are still names.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Int(i64),
    Var(String),
    /// `name[index]`
    Index(String, Box<Expr>),
    Par(Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// `if c then a else b` (internal form; produced by analyses, not by the
    /// surface grammar).
    Ite(Box<Expr>, Box<Expr>, Box<Expr>),
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Int(n) => write!(f, "{n}"),
            Expr::Var(name) => f.write_str(name),
            Expr::Index(name, idx) => write!(f, "{name}[{idx}]"),
            Expr::Par(e) => write!(f, "({e})"),
            Expr::Unary(UnaryOp::Neg, e) => write!(f, "-{e}"),
            Expr::Unary(UnaryOp::Not, e) => write!(f, "!{e}"),
            Expr::Binary(op, a, b) => write!(f, "{a}{}{b}", op.as_str()),
            Expr::Ite(c, a, b) => write!(f, "if {c} then {a} else {b}"),
        }
    }
}

/// Assignment target: `x` or `x[e]`.
#[derive(Clone, Debug, PartialEq)]
pub struct Lvalue {
    pub name: String,
    pub index: Option<Box<Expr>>,
}

impl fmt::Display for Lvalue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.index {
            Some(idx) => write!(f, "{}[{idx}]", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// A statement as parsed.
#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    Nop,
    Assign(Lvalue, Expr),
    Seq(Box<Stmt>, Box<Stmt>),
    /// `if c then s1 else s2 end`; the else branch defaults to `nop`.
    If(Expr, Box<Stmt>, Box<Stmt>),
    /// `while c do s end`
    While(Expr, Box<Stmt>),
    /// `local x` / `local x = e`
    LocalVar(String, Option<Expr>),
    /// `local x[e]`
    LocalArray(String, Expr),
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Nop => f.write_str("nop"),
            Stmt::Assign(lhs, rhs) => write!(f, "{lhs}={rhs}"),
            Stmt::Seq(a, b) => write!(f, "{a}; {b}"),
            Stmt::If(c, a, b) => write!(f, "if {c} then {a} else {b} end"),
            Stmt::While(c, s) => write!(f, "while {c} do {s} end"),
            Stmt::LocalVar(name, None) => write!(f, "local {name}"),
            Stmt::LocalVar(name, Some(e)) => write!(f, "local {name}={e}"),
            Stmt::LocalArray(name, e) => write!(f, "local {name}[{e}]"),
        }
    }
}

// ===============================================================================================
// Declarations
// ===============================================================================================

/// Attributes attached to a location or an edge.
#[derive(Clone, Debug, Default)]
pub struct Attributes {
    pub initial: bool,
    pub committed: bool,
    pub urgent: bool,
    pub invariant: Option<Expr>,
    pub provided: Option<Expr>,
    pub do_stmt: Option<Stmt>,
    pub labels: Vec<String>,
}

/// `event:NAME`
#[derive(Clone, Debug)]
pub struct EventDecl {
    pub name: String,
    pub line: usize,
}

/// `process:NAME`
#[derive(Clone, Debug)]
pub struct ProcessDecl {
    pub name: String,
    pub line: usize,
}

/// `int:SIZE:MIN:MAX:INIT:NAME`
#[derive(Clone, Debug)]
pub struct IntDecl {
    pub size: u32,
    pub min: i32,
    pub max: i32,
    pub init: i32,
    pub name: String,
    pub line: usize,
}

/// `clock:SIZE:NAME`
#[derive(Clone, Debug)]
pub struct ClockDecl {
    pub size: u32,
    pub name: String,
    pub line: usize,
}

/// `location:PROCESS:NAME{attrs}`
#[derive(Clone, Debug)]
pub struct LocationDecl {
    pub process: String,
    pub name: String,
    pub attrs: Attributes,
    pub line: usize,
}

/// `edge:PROCESS:SRC:TGT:EVENT{attrs}`
#[derive(Clone, Debug)]
pub struct EdgeDecl {
    pub process: String,
    pub src: String,
    pub tgt: String,
    pub event: String,
    pub attrs: Attributes,
    pub line: usize,
}

/// One `PROCESS@EVENT` item of a `sync:` vector; `?` marks weak
/// participation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncItem {
    pub process: String,
    pub event: String,
    pub weak: bool,
}

/// `sync:item1:item2:...`
#[derive(Clone, Debug)]
pub struct SyncDecl {
    pub items: Vec<SyncItem>,
    pub line: usize,
}

/// A parsed system declaration, in file order.
#[derive(Clone, Debug, Default)]
pub struct SystemDecl {
    pub name: String,
    pub events: Vec<EventDecl>,
    pub processes: Vec<ProcessDecl>,
    pub intvars: Vec<IntDecl>,
    pub clocks: Vec<ClockDecl>,
    pub locations: Vec<LocationDecl>,
    pub edges: Vec<EdgeDecl>,
    pub syncs: Vec<SyncDecl>,
}
