//! Typed expressions, statements and their analyses
//!
//! Name resolution and type checking turn the untyped trees of
//! [`crate::syntax`] into flat, id-based trees:
//!
//! - guards and invariants split into a list of *clock-constraint atoms*
//!   (`x − y # bound`, bound evaluated at firing time) and a purely integer
//!   predicate;
//! - statements resolve assignment targets to flattened integer cells or
//!   clock resets (`x := y + e`), keeping source order so resets apply to
//!   the zone in exactly the order written;
//! - the clock-update analysis folds a statement into a per-clock list of
//!   possible updates, feeding the clock-bounds solver.
//!
//! Evaluation works on the flattened integer valuation. Runtime failures
//! (range violations, bad array indexes, division by zero, a `while` that
//! exceeds its iteration budget) are [`EvalError`]s; the caller maps them to
//! a dead-transition status, never a crash.

use rustc_hash::FxHashMap;

use crate::syntax::{BinaryOp, Expr, Lvalue, Stmt, UnaryOp};

/// Iteration budget for `while` statements; the surface language only
/// promises bounded loops, this enforces it.
pub const WHILE_ITERATION_LIMIT: u64 = 1 << 20;

/// Flattened layout of one declared integer variable (possibly an array).
#[derive(Clone, Debug)]
pub struct IntVarInfo {
    /// First cell in the flattened valuation.
    pub base: usize,
    pub size: u32,
    pub min: i32,
    pub max: i32,
}

/// Flattened layout of one declared clock (possibly an array). `base` is a
/// DBM index, so the first declared clock has base 1.
#[derive(Clone, Debug)]
pub struct ClockInfo {
    pub base: usize,
    pub size: u32,
}

/// Symbol table handed to the type checker by the system builder.
#[derive(Clone, Debug, Default)]
pub struct Symbols {
    pub intvars: FxHashMap<String, IntVarInfo>,
    pub clocks: FxHashMap<String, ClockInfo>,
}

/// Type-checking failure.
#[derive(Debug, thiserror::Error)]
pub enum TypeError {
    #[error("unknown variable `{0}`")]
    UnknownVariable(String),
    #[error("`{0}` is not an array")]
    NotAnArray(String),
    #[error("`{0}` is an array and needs an index")]
    MissingIndex(String),
    #[error("clock `{0}` cannot appear in an integer expression")]
    ClockInIntExpr(String),
    #[error("unsupported clock expression `{0}`")]
    BadClockExpr(String),
    #[error("clocks cannot be compared with `!=`")]
    ClockDisequality,
    #[error("unsupported clock assignment `{0}`")]
    BadClockAssignment(String),
    #[error("statement conditions cannot read clocks (`{0}`)")]
    ClockInCondition(String),
}

/// Runtime evaluation failure; maps to a dead transition.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EvalError {
    #[error("array index {index} out of bounds 0..{size}")]
    IndexOutOfBounds { index: i64, size: u32 },
    #[error("assignment of {value} outside [{min},{max}]")]
    OutOfRange { value: i64, min: i32, max: i32 },
    #[error("division by zero")]
    DivisionByZero,
    #[error("while statement exceeded its iteration budget")]
    LoopLimit,
    #[error("local array size {0} is negative")]
    NegativeArraySize(i64),
    #[error("local slot read before declaration")]
    UnsetLocal,
    #[error("integer arithmetic overflow")]
    ArithmeticOverflow,
}

// ===============================================================================================
// Typed trees
// ===============================================================================================

/// A typed integer expression over flattened cells and local slots.
#[derive(Clone, Debug, PartialEq)]
pub enum IntExpr {
    Const(i64),
    /// One fixed cell of the flattened valuation.
    Cell(usize),
    /// `base + index` with a runtime bounds check against `size`.
    ArrayCell { base: usize, size: u32, index: Box<IntExpr> },
    Local(usize),
    LocalArrayCell { slot: usize, index: Box<IntExpr> },
    Unary(UnaryOp, Box<IntExpr>),
    Binary(BinaryOp, Box<IntExpr>, Box<IntExpr>),
    Ite(Box<IntExpr>, Box<IntExpr>, Box<IntExpr>),
}

/// A clock reference; `index` is present for array clocks with a non-constant
/// subscript and resolves at firing time.
#[derive(Clone, Debug, PartialEq)]
pub struct ClockRef {
    pub base: usize,
    pub size: u32,
    pub index: Option<Box<IntExpr>>,
}

impl ClockRef {
    /// The DBM index of this reference under the given valuation.
    pub fn resolve(&self, env: &mut EvalEnv<'_>) -> Result<usize, EvalError> {
        match &self.index {
            None => Ok(self.base),
            Some(idx) => {
                let i = eval_int(idx, env)?;
                if i < 0 || i >= self.size as i64 {
                    return Err(EvalError::IndexOutOfBounds { index: i, size: self.size });
                }
                Ok(self.base + i as usize)
            }
        }
    }

    /// Every DBM index this reference may denote (for static analyses).
    pub fn cells(&self) -> std::ops::Range<usize> {
        match &self.index {
            None => self.base..self.base + 1,
            Some(idx) => match const_evaluate(idx) {
                Some(i) if i >= 0 && (i as u64) < self.size as u64 => {
                    let c = self.base + i as usize;
                    c..c + 1
                }
                _ => self.base..self.base + self.size as usize,
            },
        }
    }
}

/// One clock-constraint atom `left − right # bound`, with `left`/`right`
/// `None` standing for the zero clock and the bound evaluated at firing
/// time.
#[derive(Clone, Debug, PartialEq)]
pub struct ClockAtom {
    pub left: Option<ClockRef>,
    pub right: Option<ClockRef>,
    pub strict: bool,
    pub bound: IntExpr,
}

/// A type-checked guard or invariant: clock atoms plus an integer predicate.
#[derive(Clone, Debug, Default)]
pub struct TypedGuard {
    pub clock: Vec<ClockAtom>,
    pub int: Option<IntExpr>,
}

/// Assignment target after resolution.
#[derive(Clone, Debug, PartialEq)]
pub enum IntLvalue {
    Cell { idx: usize, min: i32, max: i32 },
    ArrayCell { base: usize, size: u32, min: i32, max: i32, index: Box<IntExpr> },
    Local(usize),
    LocalArrayCell { slot: usize, index: Box<IntExpr> },
}

/// A type-checked statement.
#[derive(Clone, Debug, PartialEq)]
pub enum TypedStmt {
    Nop,
    AssignInt { lhs: IntLvalue, rhs: IntExpr },
    /// `lhs := rhs_clock + value` (`rhs_clock` absent for a value reset).
    ResetClock { lhs: ClockRef, rhs_clock: Option<ClockRef>, value: IntExpr },
    Seq(Box<TypedStmt>, Box<TypedStmt>),
    If { cond: IntExpr, then_branch: Box<TypedStmt>, else_branch: Box<TypedStmt> },
    While { cond: IntExpr, body: Box<TypedStmt> },
    LocalVar { slot: usize, init: IntExpr },
    LocalArray { slot: usize, size: IntExpr },
}

/// A reset with everything evaluated: `x_left := x_right + value` on DBM
/// indices, `right == 0` for a plain value reset.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ConcreteReset {
    pub left: usize,
    pub right: usize,
    pub value: i64,
}

/// A clock-constraint atom with its bound evaluated: `x_left − x_right # value`
/// on DBM indices (0 is the zero clock).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ConcreteConstraint {
    pub left: usize,
    pub right: usize,
    pub strict: bool,
    pub value: i64,
}

/// Evaluate a list of clock atoms against the current valuation.
pub fn eval_clock_atoms(
    atoms: &[ClockAtom],
    env: &mut EvalEnv<'_>,
    out: &mut Vec<ConcreteConstraint>,
) -> Result<(), EvalError> {
    for atom in atoms {
        let left = match &atom.left {
            Some(r) => r.resolve(env)?,
            None => 0,
        };
        let right = match &atom.right {
            Some(r) => r.resolve(env)?,
            None => 0,
        };
        let value = eval_int(&atom.bound, env)?;
        out.push(ConcreteConstraint { left, right, strict: atom.strict, value });
    }
    Ok(())
}

// ===============================================================================================
// Type checking
// ===============================================================================================

struct Scope<'a> {
    symbols: &'a Symbols,
    /// Innermost-last list of (name, slot, is_array) for `local`s in scope.
    locals: Vec<(String, usize, bool)>,
    next_slot: usize,
}

impl<'a> Scope<'a> {
    fn lookup_local(&self, name: &str) -> Option<(usize, bool)> {
        self.locals.iter().rev().find(|(n, _, _)| n == name).map(|&(_, slot, arr)| (slot, arr))
    }
}

fn contains_clock(expr: &Expr, symbols: &Symbols) -> bool {
    match expr {
        Expr::Int(_) => false,
        Expr::Var(name) | Expr::Index(name, _) => symbols.clocks.contains_key(name),
        Expr::Par(e) | Expr::Unary(_, e) => contains_clock(e, symbols),
        Expr::Binary(_, a, b) => contains_clock(a, symbols) || contains_clock(b, symbols),
        Expr::Ite(c, a, b) => {
            contains_clock(c, symbols) || contains_clock(a, symbols) || contains_clock(b, symbols)
        }
    }
}

fn strip_par(expr: &Expr) -> &Expr {
    match expr {
        Expr::Par(inner) => strip_par(inner),
        other => other,
    }
}

/// Type-check a guard or invariant into clock atoms and an int predicate.
pub fn typecheck_guard(expr: &Expr, symbols: &Symbols) -> Result<TypedGuard, TypeError> {
    let mut scope = Scope { symbols, locals: Vec::new(), next_slot: 0 };
    let mut guard = TypedGuard::default();
    collect_conjuncts(expr, symbols, &mut scope, &mut guard)?;
    Ok(guard)
}

fn collect_conjuncts(
    expr: &Expr,
    symbols: &Symbols,
    scope: &mut Scope<'_>,
    out: &mut TypedGuard,
) -> Result<(), TypeError> {
    match strip_par(expr) {
        Expr::Binary(BinaryOp::And, a, b) => {
            collect_conjuncts(a, symbols, scope, out)?;
            collect_conjuncts(b, symbols, scope, out)?;
            Ok(())
        }
        atom => {
            if contains_clock(atom, symbols) {
                typecheck_clock_atom(atom, symbols, scope, out)
            } else {
                let typed = typecheck_int(atom, scope)?;
                out.int = Some(match out.int.take() {
                    None => typed,
                    Some(prev) => IntExpr::Binary(BinaryOp::And, Box::new(prev), Box::new(typed)),
                });
                Ok(())
            }
        }
    }
}

/// Recognize `c # e`, `e # c`, `c1 - c2 # e` and push the normalized atoms.
fn typecheck_clock_atom(
    atom: &Expr,
    symbols: &Symbols,
    scope: &mut Scope<'_>,
    out: &mut TypedGuard,
) -> Result<(), TypeError> {
    let (op, lhs, rhs) = match atom {
        Expr::Binary(op, lhs, rhs) if op.is_predicate() => (*op, strip_par(lhs), strip_par(rhs)),
        other => return Err(TypeError::BadClockExpr(other.to_string())),
    };
    // `x # y` with clocks on both sides is the difference `x − y # 0`.
    if contains_clock(lhs, symbols)
        && contains_clock(rhs, symbols)
        && !is_clock_difference(lhs, symbols)
        && !is_clock_difference(rhs, symbols)
    {
        let left = clock_ref(lhs, symbols, scope)?;
        let right = clock_ref(rhs, symbols, scope)?;
        return push_atoms(op, (Some(left), Some(right)), IntExpr::Const(0), out);
    }
    // Otherwise put the clock side on the left.
    let (op, clock_side, bound_side) = if contains_clock(lhs, symbols) {
        (op, lhs, rhs)
    } else {
        (op.reversed(), rhs, lhs)
    };
    if contains_clock(bound_side, symbols) {
        return Err(TypeError::BadClockExpr(atom.to_string()));
    }
    let bound = typecheck_int(bound_side, scope)?;
    let (left, right) = clock_pair(clock_side, symbols, scope)?;
    push_atoms(op, (left, right), bound, out)
}

fn push_atoms(
    op: BinaryOp,
    (left, right): (Option<ClockRef>, Option<ClockRef>),
    bound: IntExpr,
    out: &mut TypedGuard,
) -> Result<(), TypeError> {
    // left − right # bound, normalized to `<`/`<=` atoms.
    let mut push = |left: Option<ClockRef>, right: Option<ClockRef>, strict: bool, bound: IntExpr| {
        out.clock.push(ClockAtom { left, right, strict, bound });
    };
    match op {
        BinaryOp::Lt => push(left, right, true, bound),
        BinaryOp::Le => push(left, right, false, bound),
        BinaryOp::Gt => {
            push(right, left, true, IntExpr::Unary(UnaryOp::Neg, Box::new(bound)))
        }
        BinaryOp::Ge => {
            push(right, left, false, IntExpr::Unary(UnaryOp::Neg, Box::new(bound)))
        }
        BinaryOp::Eq => {
            push(left.clone(), right.clone(), false, bound.clone());
            push(right, left, false, IntExpr::Unary(UnaryOp::Neg, Box::new(bound)));
        }
        BinaryOp::Ne => return Err(TypeError::ClockDisequality),
        other => return Err(TypeError::BadClockExpr(other.as_str().to_string())),
    }
    Ok(())
}

fn is_clock_difference(expr: &Expr, symbols: &Symbols) -> bool {
    matches!(strip_par(expr), Expr::Binary(BinaryOp::Minus, a, b)
        if contains_clock(strip_par(a), symbols) && contains_clock(strip_par(b), symbols))
}

/// `x` or `x - y` as a pair of clock references.
fn clock_pair(
    expr: &Expr,
    symbols: &Symbols,
    scope: &mut Scope<'_>,
) -> Result<(Option<ClockRef>, Option<ClockRef>), TypeError> {
    match strip_par(expr) {
        Expr::Binary(BinaryOp::Minus, a, b) => {
            let left = clock_ref(strip_par(a), symbols, scope)?;
            let right = clock_ref(strip_par(b), symbols, scope)?;
            Ok((Some(left), Some(right)))
        }
        single => Ok((Some(clock_ref(single, symbols, scope)?), None)),
    }
}

fn clock_ref(
    expr: &Expr,
    symbols: &Symbols,
    scope: &mut Scope<'_>,
) -> Result<ClockRef, TypeError> {
    match expr {
        Expr::Var(name) => {
            let info = symbols
                .clocks
                .get(name)
                .ok_or_else(|| TypeError::BadClockExpr(expr.to_string()))?;
            if info.size > 1 {
                return Err(TypeError::MissingIndex(name.clone()));
            }
            Ok(ClockRef { base: info.base, size: info.size, index: None })
        }
        Expr::Index(name, idx) => {
            let info = symbols
                .clocks
                .get(name)
                .ok_or_else(|| TypeError::BadClockExpr(expr.to_string()))?;
            let index = typecheck_int(idx, scope)?;
            Ok(ClockRef { base: info.base, size: info.size, index: Some(Box::new(index)) })
        }
        other => Err(TypeError::BadClockExpr(other.to_string())),
    }
}

/// Type-check a clock-free integer expression.
fn typecheck_int(expr: &Expr, scope: &mut Scope<'_>) -> Result<IntExpr, TypeError> {
    match expr {
        Expr::Int(n) => Ok(IntExpr::Const(*n)),
        Expr::Var(name) => {
            if let Some((slot, is_array)) = scope.lookup_local(name) {
                if is_array {
                    return Err(TypeError::MissingIndex(name.clone()));
                }
                return Ok(IntExpr::Local(slot));
            }
            if scope.symbols.clocks.contains_key(name) {
                return Err(TypeError::ClockInIntExpr(name.clone()));
            }
            let info = scope
                .symbols
                .intvars
                .get(name)
                .ok_or_else(|| TypeError::UnknownVariable(name.clone()))?;
            if info.size > 1 {
                return Err(TypeError::MissingIndex(name.clone()));
            }
            Ok(IntExpr::Cell(info.base))
        }
        Expr::Index(name, idx) => {
            let index = Box::new(typecheck_int(idx, scope)?);
            if let Some((slot, is_array)) = scope.lookup_local(name) {
                if !is_array {
                    return Err(TypeError::NotAnArray(name.clone()));
                }
                return Ok(IntExpr::LocalArrayCell { slot, index });
            }
            if scope.symbols.clocks.contains_key(name) {
                return Err(TypeError::ClockInIntExpr(name.clone()));
            }
            let info = scope
                .symbols
                .intvars
                .get(name)
                .ok_or_else(|| TypeError::UnknownVariable(name.clone()))?;
            if info.size == 1 {
                return Err(TypeError::NotAnArray(name.clone()));
            }
            Ok(IntExpr::ArrayCell { base: info.base, size: info.size, index })
        }
        Expr::Par(e) => typecheck_int(e, scope),
        Expr::Unary(op, e) => Ok(IntExpr::Unary(*op, Box::new(typecheck_int(e, scope)?))),
        Expr::Binary(op, a, b) => Ok(IntExpr::Binary(
            *op,
            Box::new(typecheck_int(a, scope)?),
            Box::new(typecheck_int(b, scope)?),
        )),
        Expr::Ite(c, a, b) => Ok(IntExpr::Ite(
            Box::new(typecheck_int(c, scope)?),
            Box::new(typecheck_int(a, scope)?),
            Box::new(typecheck_int(b, scope)?),
        )),
    }
}

/// Type-check an edge statement. Returns the typed tree and the number of
/// local slots it allocates.
pub fn typecheck_stmt(stmt: &Stmt, symbols: &Symbols) -> Result<(TypedStmt, usize), TypeError> {
    let mut scope = Scope { symbols, locals: Vec::new(), next_slot: 0 };
    let typed = check_stmt(stmt, &mut scope)?;
    Ok((typed, scope.next_slot))
}

fn check_stmt(stmt: &Stmt, scope: &mut Scope<'_>) -> Result<TypedStmt, TypeError> {
    match stmt {
        Stmt::Nop => Ok(TypedStmt::Nop),
        Stmt::Assign(lhs, rhs) => check_assign(lhs, rhs, scope),
        Stmt::Seq(a, b) => {
            // Locals declared in `a` stay visible in `b`.
            let a = check_stmt(a, scope)?;
            let b = check_stmt(b, scope)?;
            Ok(TypedStmt::Seq(Box::new(a), Box::new(b)))
        }
        Stmt::If(cond, then_branch, else_branch) => {
            if contains_clock(cond, scope.symbols) {
                return Err(TypeError::ClockInCondition(cond.to_string()));
            }
            let cond = typecheck_int(cond, scope)?;
            let mark = scope.locals.len();
            let then_branch = check_stmt(then_branch, scope)?;
            scope.locals.truncate(mark);
            let else_branch = check_stmt(else_branch, scope)?;
            scope.locals.truncate(mark);
            Ok(TypedStmt::If {
                cond,
                then_branch: Box::new(then_branch),
                else_branch: Box::new(else_branch),
            })
        }
        Stmt::While(cond, body) => {
            if contains_clock(cond, scope.symbols) {
                return Err(TypeError::ClockInCondition(cond.to_string()));
            }
            let cond = typecheck_int(cond, scope)?;
            let mark = scope.locals.len();
            let body = check_stmt(body, scope)?;
            scope.locals.truncate(mark);
            Ok(TypedStmt::While { cond, body: Box::new(body) })
        }
        Stmt::LocalVar(name, init) => {
            let init = match init {
                Some(e) => typecheck_int(e, scope)?,
                None => IntExpr::Const(0),
            };
            let slot = scope.next_slot;
            scope.next_slot += 1;
            scope.locals.push((name.clone(), slot, false));
            Ok(TypedStmt::LocalVar { slot, init })
        }
        Stmt::LocalArray(name, size) => {
            let size = typecheck_int(size, scope)?;
            let slot = scope.next_slot;
            scope.next_slot += 1;
            scope.locals.push((name.clone(), slot, true));
            Ok(TypedStmt::LocalArray { slot, size })
        }
    }
}

fn check_assign(lhs: &Lvalue, rhs: &Expr, scope: &mut Scope<'_>) -> Result<TypedStmt, TypeError> {
    // Local shadowing first, then clocks, then globals.
    if let Some((slot, is_array)) = scope.lookup_local(&lhs.name) {
        let rhs = typecheck_int(rhs, scope)?;
        let lv = match (&lhs.index, is_array) {
            (None, false) => IntLvalue::Local(slot),
            (Some(idx), true) => {
                IntLvalue::LocalArrayCell { slot, index: Box::new(typecheck_int(idx, scope)?) }
            }
            (None, true) => return Err(TypeError::MissingIndex(lhs.name.clone())),
            (Some(_), false) => return Err(TypeError::NotAnArray(lhs.name.clone())),
        };
        return Ok(TypedStmt::AssignInt { lhs: lv, rhs });
    }
    if let Some(info) = scope.symbols.clocks.get(&lhs.name).cloned() {
        let target = match &lhs.index {
            None if info.size == 1 => ClockRef { base: info.base, size: info.size, index: None },
            None => return Err(TypeError::MissingIndex(lhs.name.clone())),
            Some(idx) => ClockRef {
                base: info.base,
                size: info.size,
                index: Some(Box::new(typecheck_int(idx, scope)?)),
            },
        };
        return check_clock_reset(target, rhs, scope);
    }
    let info = scope
        .symbols
        .intvars
        .get(&lhs.name)
        .cloned()
        .ok_or_else(|| TypeError::UnknownVariable(lhs.name.clone()))?;
    let lv = match &lhs.index {
        None if info.size == 1 => IntLvalue::Cell { idx: info.base, min: info.min, max: info.max },
        None => return Err(TypeError::MissingIndex(lhs.name.clone())),
        Some(_) if info.size == 1 => return Err(TypeError::NotAnArray(lhs.name.clone())),
        Some(idx) => IntLvalue::ArrayCell {
            base: info.base,
            size: info.size,
            min: info.min,
            max: info.max,
            index: Box::new(typecheck_int(idx, scope)?),
        },
    };
    let rhs = typecheck_int(rhs, scope)?;
    Ok(TypedStmt::AssignInt { lhs: lv, rhs })
}

/// `x := e`, `x := y`, `x := y + e`, `x := y - e`.
fn check_clock_reset(
    target: ClockRef,
    rhs: &Expr,
    scope: &mut Scope<'_>,
) -> Result<TypedStmt, TypeError> {
    let rhs_stripped = strip_par(rhs);
    if !contains_clock(rhs_stripped, scope.symbols) {
        let value = typecheck_int(rhs_stripped, scope)?;
        return Ok(TypedStmt::ResetClock { lhs: target, rhs_clock: None, value });
    }
    match rhs_stripped {
        Expr::Var(_) | Expr::Index(..) => {
            let src = clock_ref(rhs_stripped, scope.symbols, scope)?;
            Ok(TypedStmt::ResetClock { lhs: target, rhs_clock: Some(src), value: IntExpr::Const(0) })
        }
        Expr::Binary(op @ (BinaryOp::Plus | BinaryOp::Minus), a, b) => {
            let (clock_side, int_side) = if contains_clock(strip_par(a), scope.symbols) {
                (strip_par(a), strip_par(b))
            } else if *op == BinaryOp::Plus {
                (strip_par(b), strip_par(a))
            } else {
                return Err(TypeError::BadClockAssignment(rhs.to_string()));
            };
            if contains_clock(int_side, scope.symbols) {
                return Err(TypeError::BadClockAssignment(rhs.to_string()));
            }
            let src = clock_ref(clock_side, scope.symbols, scope)?;
            let mut value = typecheck_int(int_side, scope)?;
            if *op == BinaryOp::Minus {
                value = IntExpr::Unary(UnaryOp::Neg, Box::new(value));
            }
            Ok(TypedStmt::ResetClock { lhs: target, rhs_clock: Some(src), value })
        }
        other => Err(TypeError::BadClockAssignment(other.to_string())),
    }
}

// ===============================================================================================
// Evaluation
// ===============================================================================================

/// A local slot value during statement execution.
#[derive(Clone, Debug)]
pub enum LocalVal {
    Scalar(i64),
    Array(Vec<i64>),
}

/// Evaluation environment: the flattened integer valuation plus local slots.
pub struct EvalEnv<'a> {
    pub intval: &'a mut [i32],
    pub locals: Vec<Option<LocalVal>>,
}

impl<'a> EvalEnv<'a> {
    pub fn new(intval: &'a mut [i32], local_slots: usize) -> EvalEnv<'a> {
        EvalEnv { intval, locals: vec![None; local_slots] }
    }
}

fn truthy(v: i64) -> bool {
    v != 0
}

/// Evaluate a typed integer expression.
pub fn eval_int(expr: &IntExpr, env: &mut EvalEnv<'_>) -> Result<i64, EvalError> {
    match expr {
        IntExpr::Const(n) => Ok(*n),
        IntExpr::Cell(idx) => Ok(env.intval[*idx] as i64),
        IntExpr::ArrayCell { base, size, index } => {
            let i = eval_int(index, env)?;
            if i < 0 || i >= *size as i64 {
                return Err(EvalError::IndexOutOfBounds { index: i, size: *size });
            }
            Ok(env.intval[*base + i as usize] as i64)
        }
        IntExpr::Local(slot) => match env.locals.get(*slot) {
            Some(Some(LocalVal::Scalar(v))) => Ok(*v),
            _ => Err(EvalError::UnsetLocal),
        },
        IntExpr::LocalArrayCell { slot, index } => {
            let i = eval_int(index, env)?;
            match env.locals.get(*slot) {
                Some(Some(LocalVal::Array(cells))) => {
                    if i < 0 || i as usize >= cells.len() {
                        return Err(EvalError::IndexOutOfBounds {
                            index: i,
                            size: cells.len() as u32,
                        });
                    }
                    Ok(cells[i as usize])
                }
                _ => Err(EvalError::UnsetLocal),
            }
        }
        IntExpr::Unary(UnaryOp::Neg, e) => Ok(-eval_int(e, env)?),
        IntExpr::Unary(UnaryOp::Not, e) => Ok(if truthy(eval_int(e, env)?) { 0 } else { 1 }),
        IntExpr::Binary(op, a, b) => {
            let x = eval_int(a, env)?;
            // Short-circuit `&&`.
            if *op == BinaryOp::And && !truthy(x) {
                return Ok(0);
            }
            let y = eval_int(b, env)?;
            Ok(match op {
                BinaryOp::Plus => x.checked_add(y).ok_or(EvalError::ArithmeticOverflow)?,
                BinaryOp::Minus => x.checked_sub(y).ok_or(EvalError::ArithmeticOverflow)?,
                BinaryOp::Times => x.checked_mul(y).ok_or(EvalError::ArithmeticOverflow)?,
                BinaryOp::Div => {
                    if y == 0 {
                        return Err(EvalError::DivisionByZero);
                    }
                    x / y
                }
                BinaryOp::Mod => {
                    if y == 0 {
                        return Err(EvalError::DivisionByZero);
                    }
                    x % y
                }
                BinaryOp::Lt => (x < y) as i64,
                BinaryOp::Le => (x <= y) as i64,
                BinaryOp::Eq => (x == y) as i64,
                BinaryOp::Ne => (x != y) as i64,
                BinaryOp::Ge => (x >= y) as i64,
                BinaryOp::Gt => (x > y) as i64,
                BinaryOp::And => (truthy(x) && truthy(y)) as i64,
            })
        }
        IntExpr::Ite(c, a, b) => {
            if truthy(eval_int(c, env)?) {
                eval_int(a, env)
            } else {
                eval_int(b, env)
            }
        }
    }
}

/// Execute a typed statement, mutating the valuation in place and collecting
/// clock resets in source order.
pub fn exec_stmt(
    stmt: &TypedStmt,
    env: &mut EvalEnv<'_>,
    resets: &mut Vec<ConcreteReset>,
) -> Result<(), EvalError> {
    match stmt {
        TypedStmt::Nop => Ok(()),
        TypedStmt::AssignInt { lhs, rhs } => {
            let value = eval_int(rhs, env)?;
            assign(lhs, value, env)
        }
        TypedStmt::ResetClock { lhs, rhs_clock, value } => {
            let left = lhs.resolve(env)?;
            let right = match rhs_clock {
                Some(src) => src.resolve(env)?,
                None => 0,
            };
            let value = eval_int(value, env)?;
            resets.push(ConcreteReset { left, right, value });
            Ok(())
        }
        TypedStmt::Seq(a, b) => {
            exec_stmt(a, env, resets)?;
            exec_stmt(b, env, resets)
        }
        TypedStmt::If { cond, then_branch, else_branch } => {
            if truthy(eval_int(cond, env)?) {
                exec_stmt(then_branch, env, resets)
            } else {
                exec_stmt(else_branch, env, resets)
            }
        }
        TypedStmt::While { cond, body } => {
            let mut budget = WHILE_ITERATION_LIMIT;
            while truthy(eval_int(cond, env)?) {
                if budget == 0 {
                    return Err(EvalError::LoopLimit);
                }
                budget -= 1;
                exec_stmt(body, env, resets)?;
            }
            Ok(())
        }
        TypedStmt::LocalVar { slot, init } => {
            let v = eval_int(init, env)?;
            env.locals[*slot] = Some(LocalVal::Scalar(v));
            Ok(())
        }
        TypedStmt::LocalArray { slot, size } => {
            let n = eval_int(size, env)?;
            if n < 0 {
                return Err(EvalError::NegativeArraySize(n));
            }
            env.locals[*slot] = Some(LocalVal::Array(vec![0; n as usize]));
            Ok(())
        }
    }
}

fn assign(lhs: &IntLvalue, value: i64, env: &mut EvalEnv<'_>) -> Result<(), EvalError> {
    match lhs {
        IntLvalue::Cell { idx, min, max } => {
            if value < *min as i64 || value > *max as i64 {
                return Err(EvalError::OutOfRange { value, min: *min, max: *max });
            }
            env.intval[*idx] = value as i32;
            Ok(())
        }
        IntLvalue::ArrayCell { base, size, min, max, index } => {
            let i = eval_int(index, env)?;
            if i < 0 || i >= *size as i64 {
                return Err(EvalError::IndexOutOfBounds { index: i, size: *size });
            }
            if value < *min as i64 || value > *max as i64 {
                return Err(EvalError::OutOfRange { value, min: *min, max: *max });
            }
            env.intval[*base + i as usize] = value as i32;
            Ok(())
        }
        IntLvalue::Local(slot) => {
            env.locals[*slot] = Some(LocalVal::Scalar(value));
            Ok(())
        }
        IntLvalue::LocalArrayCell { slot, index } => {
            let i = eval_int(index, env)?;
            match env.locals.get_mut(*slot) {
                Some(Some(LocalVal::Array(cells))) => {
                    if i < 0 || i as usize >= cells.len() {
                        return Err(EvalError::IndexOutOfBounds {
                            index: i,
                            size: cells.len() as u32,
                        });
                    }
                    cells[i as usize] = value;
                    Ok(())
                }
                _ => Err(EvalError::UnsetLocal),
            }
        }
    }
}

/// Evaluate an expression that reads no variables; `None` if it does.
pub fn const_evaluate(expr: &IntExpr) -> Option<i64> {
    match expr {
        IntExpr::Const(n) => Some(*n),
        IntExpr::Cell(_)
        | IntExpr::ArrayCell { .. }
        | IntExpr::Local(_)
        | IntExpr::LocalArrayCell { .. } => None,
        IntExpr::Unary(UnaryOp::Neg, e) => Some(-const_evaluate(e)?),
        IntExpr::Unary(UnaryOp::Not, e) => Some(if const_evaluate(e)? != 0 { 0 } else { 1 }),
        IntExpr::Binary(op, a, b) => {
            let x = const_evaluate(a)?;
            let y = const_evaluate(b)?;
            Some(match op {
                BinaryOp::Plus => x.checked_add(y)?,
                BinaryOp::Minus => x.checked_sub(y)?,
                BinaryOp::Times => x.checked_mul(y)?,
                BinaryOp::Div => x.checked_div(y)?,
                BinaryOp::Mod => x.checked_rem(y)?,
                BinaryOp::Lt => (x < y) as i64,
                BinaryOp::Le => (x <= y) as i64,
                BinaryOp::Eq => (x == y) as i64,
                BinaryOp::Ne => (x != y) as i64,
                BinaryOp::Ge => (x >= y) as i64,
                BinaryOp::Gt => (x > y) as i64,
                BinaryOp::And => ((x != 0) && (y != 0)) as i64,
            })
        }
        IntExpr::Ite(c, a, b) => {
            if const_evaluate(c)? != 0 {
                const_evaluate(a)
            } else {
                const_evaluate(b)
            }
        }
    }
}

// ===============================================================================================
// Clock-update analysis
// ===============================================================================================

/// One possible update of a clock along an edge: `x := src + value`
/// (`src == None` for a constant assignment).
#[derive(Clone, Debug, PartialEq)]
pub struct ClockUpdate {
    pub src: Option<usize>,
    pub value: IntExpr,
}

/// Per-clock update lists; an empty list means the update cannot be
/// determined statically.
#[derive(Clone, Debug, PartialEq)]
pub struct ClockUpdatesMap {
    updates: Vec<Vec<ClockUpdate>>,
}

impl ClockUpdatesMap {
    /// Identity map: every clock keeps its value.
    pub fn identity(clock_count: usize) -> ClockUpdatesMap {
        ClockUpdatesMap {
            updates: (0..clock_count)
                .map(|x| vec![ClockUpdate { src: Some(x), value: IntExpr::Const(0) }])
                .collect(),
        }
    }

    /// Updates for clock `x` (0-based clock index, not a DBM index).
    pub fn get(&self, x: usize) -> &[ClockUpdate] {
        &self.updates[x]
    }

    pub fn clock_count(&self) -> usize {
        self.updates.len()
    }

    /// Union with absorption: an undetermined side wins.
    fn merge(&mut self, other: &ClockUpdatesMap) {
        for (mine, theirs) in self.updates.iter_mut().zip(other.updates.iter()) {
            if mine.is_empty() || theirs.is_empty() {
                mine.clear();
            } else if mine != theirs {
                mine.extend(theirs.iter().cloned());
            }
        }
    }
}

/// Fold a statement into the clock-update map used by the bounds solver.
/// Clock indices are 0-based (DBM index minus one).
pub fn compute_clock_updates(clock_count: usize, stmt: &TypedStmt) -> ClockUpdatesMap {
    let mut map = ClockUpdatesMap::identity(clock_count);
    visit_updates(stmt, &mut map);
    map
}

fn visit_updates(stmt: &TypedStmt, map: &mut ClockUpdatesMap) {
    match stmt {
        TypedStmt::Nop
        | TypedStmt::AssignInt { .. }
        | TypedStmt::LocalVar { .. }
        | TypedStmt::LocalArray { .. } => {}
        TypedStmt::ResetClock { lhs, rhs_clock, value } => {
            // Compose with the updates accumulated for the source clock.
            let new_updates: Vec<ClockUpdate> = match rhs_clock {
                None => vec![ClockUpdate { src: None, value: value.clone() }],
                Some(src) => {
                    let mut composed = Vec::new();
                    for cell in src.cells() {
                        for up in map.get(cell - 1) {
                            composed.push(ClockUpdate {
                                src: up.src,
                                value: add_exprs(&up.value, value),
                            });
                        }
                    }
                    composed
                }
            };
            let targets: Vec<usize> = lhs.cells().collect();
            let exact = targets.len() == 1;
            for cell in targets {
                let entry = &mut map.updates[cell - 1];
                if exact {
                    *entry = new_updates.clone();
                } else if !entry.is_empty() {
                    // The target is only known up to the array range; keep
                    // both the old and the new updates.
                    entry.extend(new_updates.iter().cloned());
                }
            }
        }
        TypedStmt::Seq(a, b) => {
            visit_updates(a, map);
            visit_updates(b, map);
        }
        TypedStmt::If { then_branch, else_branch, .. } => {
            let mut then_map = map.clone();
            visit_updates(then_branch, &mut then_map);
            let mut else_map = map.clone();
            visit_updates(else_branch, &mut else_map);
            *map = then_map;
            map.merge(&else_map);
        }
        TypedStmt::While { body, .. } => {
            let mut body_map = map.clone();
            visit_updates(body, &mut body_map);
            // A clock touched inside the loop has no static update.
            for (mine, after) in map.updates.iter_mut().zip(body_map.updates.iter()) {
                if mine != after {
                    mine.clear();
                }
            }
        }
    }
}

fn add_exprs(a: &IntExpr, b: &IntExpr) -> IntExpr {
    match (const_evaluate(a), const_evaluate(b)) {
        (Some(x), Some(y)) => IntExpr::Const(x + y),
        _ => IntExpr::Binary(BinaryOp::Plus, Box::new(a.clone()), Box::new(b.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{parse_expr, parse_stmt};

    fn symbols() -> Symbols {
        let mut s = Symbols::default();
        s.intvars.insert("i".into(), IntVarInfo { base: 0, size: 1, min: -10, max: 10 });
        s.intvars.insert("a".into(), IntVarInfo { base: 1, size: 3, min: 0, max: 5 });
        s.clocks.insert("x".into(), ClockInfo { base: 1, size: 1 });
        s.clocks.insert("y".into(), ClockInfo { base: 2, size: 1 });
        s
    }

    fn guard(text: &str) -> TypedGuard {
        typecheck_guard(&parse_expr(text, 1).unwrap(), &symbols()).unwrap()
    }

    fn stmt(text: &str) -> (TypedStmt, usize) {
        typecheck_stmt(&parse_stmt(text, 1).unwrap(), &symbols()).unwrap()
    }

    #[test]
    fn guard_splits_clock_and_int() {
        let g = guard("x<3 && i==0 && y-x<=2");
        assert_eq!(g.clock.len(), 2);
        assert!(g.int.is_some());
        let first = &g.clock[0];
        assert!(first.strict);
        assert_eq!(first.left.as_ref().unwrap().base, 1);
        assert!(first.right.is_none());
        let diag = &g.clock[1];
        assert_eq!(diag.left.as_ref().unwrap().base, 2);
        assert_eq!(diag.right.as_ref().unwrap().base, 1);
    }

    #[test]
    fn reversed_and_equality_atoms() {
        let g = guard("3>=x");
        assert_eq!(g.clock.len(), 1);
        // 3 >= x becomes x <= 3.
        assert!(!g.clock[0].strict);
        assert_eq!(g.clock[0].left.as_ref().unwrap().base, 1);

        let g = guard("x==4");
        assert_eq!(g.clock.len(), 2);
        assert_eq!(const_evaluate(&g.clock[0].bound), Some(4));
        assert_eq!(const_evaluate(&g.clock[1].bound), Some(-4));
    }

    #[test]
    fn clock_misuse_is_rejected() {
        let s = symbols();
        assert!(typecheck_guard(&parse_expr("x+1<3", 1).unwrap(), &s).is_err());
        assert!(typecheck_guard(&parse_expr("x!=3", 1).unwrap(), &s).is_err());
        assert!(typecheck_guard(&parse_expr("i+x==0", 1).unwrap(), &s).is_err());
        assert!(typecheck_stmt(&parse_stmt("i=x", 1).unwrap(), &s).is_err());
        assert!(typecheck_stmt(&parse_stmt("if x<1 then nop end", 1).unwrap(), &s).is_err());
    }

    #[test]
    fn statement_execution() {
        let (s, slots) = stmt("i=i+1; a[i]=2; if i==1 then a[0]=a[i]+1 else nop end");
        let mut intval = vec![0i32, 0, 0, 0];
        let mut env = EvalEnv::new(&mut intval, slots);
        let mut resets = Vec::new();
        exec_stmt(&s, &mut env, &mut resets).unwrap();
        assert_eq!(intval, vec![1, 3, 2, 0]);
        assert!(resets.is_empty());
    }

    #[test]
    fn out_of_range_assignment_fails() {
        let (s, slots) = stmt("a[0]=7");
        let mut intval = vec![0i32, 0, 0, 0];
        let mut env = EvalEnv::new(&mut intval, slots);
        let mut resets = Vec::new();
        let err = exec_stmt(&s, &mut env, &mut resets).unwrap_err();
        assert!(matches!(err, EvalError::OutOfRange { value: 7, .. }));
    }

    #[test]
    fn clock_resets_in_order() {
        let (s, slots) = stmt("x=0; y=x+2; i=1");
        let mut intval = vec![0i32, 0, 0, 0];
        let mut env = EvalEnv::new(&mut intval, slots);
        let mut resets = Vec::new();
        exec_stmt(&s, &mut env, &mut resets).unwrap();
        assert_eq!(
            resets,
            vec![
                ConcreteReset { left: 1, right: 0, value: 0 },
                ConcreteReset { left: 2, right: 1, value: 2 },
            ]
        );
        assert_eq!(intval[0], 1);
    }

    #[test]
    fn locals_shadow_and_scope() {
        let (s, slots) = stmt("local t = 3; i = t; local u[2]; u[1] = 4; i = i + u[1]");
        assert_eq!(slots, 2);
        let mut intval = vec![0i32, 0, 0, 0];
        let mut env = EvalEnv::new(&mut intval, slots);
        let mut resets = Vec::new();
        exec_stmt(&s, &mut env, &mut resets).unwrap();
        assert_eq!(intval[0], 7);
    }

    #[test]
    fn while_has_a_budget() {
        let (s, slots) = stmt("local t = 1; while t > 0 do t = t + 1 end");
        let mut intval = vec![0i32, 0, 0, 0];
        let mut env = EvalEnv::new(&mut intval, slots);
        let mut resets = Vec::new();
        assert_eq!(exec_stmt(&s, &mut env, &mut resets), Err(EvalError::LoopLimit));
    }

    #[test]
    fn clock_updates_basic() {
        let (s, _) = stmt("x=0");
        let map = compute_clock_updates(2, &s);
        assert_eq!(map.get(0), &[ClockUpdate { src: None, value: IntExpr::Const(0) }]);
        // y untouched.
        assert_eq!(map.get(1), &[ClockUpdate { src: Some(1), value: IntExpr::Const(0) }]);
    }

    #[test]
    fn clock_updates_compose_through_sequence() {
        let (s, _) = stmt("x=y+1; y=x+2");
        let map = compute_clock_updates(2, &s);
        // x := y + 1
        assert_eq!(map.get(0), &[ClockUpdate { src: Some(1), value: IntExpr::Const(1) }]);
        // y := (y+1) + 2
        assert_eq!(map.get(1), &[ClockUpdate { src: Some(1), value: IntExpr::Const(3) }]);
    }

    #[test]
    fn clock_updates_branch_and_loop() {
        let (s, _) = stmt("if i==0 then x=0 else x=y end");
        let map = compute_clock_updates(2, &s);
        assert_eq!(map.get(0).len(), 2);

        let (s, _) = stmt("while i>0 do x=0; i=i-1 end");
        let map = compute_clock_updates(2, &s);
        assert!(map.get(0).is_empty());
        assert_eq!(map.get(1).len(), 1);
    }
}
