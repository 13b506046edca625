//! Parser for the system description language
//!
//! The input is line-oriented: every non-empty line holds one declaration,
//! `#` starts a comment. Attribute lists ride in braces at the end of
//! `location:` and `edge:` declarations; their `invariant:`, `provided:` and
//! `do:` values are parsed by a small recursive-descent parser over the
//! C-like expression grammar (`&&` only, no `||`).
//!
//! Errors are fatal and carry the 1-based source line.

use crate::syntax::{
    Attributes, BinaryOp, ClockDecl, EdgeDecl, EventDecl, Expr, IntDecl, LocationDecl, Lvalue,
    ProcessDecl, Stmt, SyncDecl, SyncItem, SystemDecl, UnaryOp,
};

/// Parse failure with source position.
#[derive(Debug, thiserror::Error)]
#[error("line {line}: {msg}")]
pub struct ParseError {
    pub line: usize,
    pub msg: String,
}

impl ParseError {
    fn new(line: usize, msg: impl Into<String>) -> ParseError {
        ParseError { line, msg: msg.into() }
    }
}

/// Parse a full system description.
pub fn parse_system(input: &str) -> Result<SystemDecl, ParseError> {
    let mut sys = SystemDecl::default();
    let mut seen_system = false;
    for (lineno, raw) in input.lines().enumerate() {
        let line = lineno + 1;
        let text = strip_comment(raw).trim();
        if text.is_empty() {
            continue;
        }
        let (kind, rest) = text
            .split_once(':')
            .ok_or_else(|| ParseError::new(line, format!("expected a declaration, got `{text}`")))?;
        match kind.trim() {
            "system" => {
                if seen_system {
                    return Err(ParseError::new(line, "duplicate system declaration"));
                }
                seen_system = true;
                sys.name = ident(rest.trim(), line)?;
            }
            "event" => sys.events.push(EventDecl { name: ident(rest.trim(), line)?, line }),
            "process" => sys.processes.push(ProcessDecl { name: ident(rest.trim(), line)?, line }),
            "int" => sys.intvars.push(parse_int_decl(rest, line)?),
            "clock" => sys.clocks.push(parse_clock_decl(rest, line)?),
            "location" => sys.locations.push(parse_location_decl(rest, line)?),
            "edge" => sys.edges.push(parse_edge_decl(rest, line)?),
            "sync" => sys.syncs.push(parse_sync_decl(rest, line)?),
            other => {
                return Err(ParseError::new(line, format!("unknown declaration `{other}`")));
            }
        }
    }
    if !seen_system {
        return Err(ParseError::new(1, "missing system declaration"));
    }
    Ok(sys)
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

fn ident(s: &str, line: usize) -> Result<String, ParseError> {
    let ok = !s.is_empty()
        && s.chars().next().map(|c| c.is_ascii_alphabetic() || c == '_').unwrap_or(false)
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !ok {
        return Err(ParseError::new(line, format!("invalid identifier `{s}`")));
    }
    Ok(s.to_string())
}

fn parse_i32(s: &str, line: usize, what: &str) -> Result<i32, ParseError> {
    s.trim()
        .parse::<i32>()
        .map_err(|_| ParseError::new(line, format!("invalid {what} `{}`", s.trim())))
}

fn parse_size(s: &str, line: usize) -> Result<u32, ParseError> {
    let size = s
        .trim()
        .parse::<u32>()
        .map_err(|_| ParseError::new(line, format!("invalid size `{}`", s.trim())))?;
    if size < 1 {
        return Err(ParseError::new(line, "declaration has size < 1"));
    }
    Ok(size)
}

fn parse_int_decl(rest: &str, line: usize) -> Result<IntDecl, ParseError> {
    let parts: Vec<&str> = rest.split(':').collect();
    if parts.len() != 5 {
        return Err(ParseError::new(line, "expected int:SIZE:MIN:MAX:INIT:NAME"));
    }
    let decl = IntDecl {
        size: parse_size(parts[0], line)?,
        min: parse_i32(parts[1], line, "min")?,
        max: parse_i32(parts[2], line, "max")?,
        init: parse_i32(parts[3], line, "init")?,
        name: ident(parts[4].trim(), line)?,
        line,
    };
    if decl.min > decl.max {
        return Err(ParseError::new(line, "int declaration has min > max"));
    }
    if decl.init < decl.min || decl.init > decl.max {
        return Err(ParseError::new(line, "int declaration has init outside [min,max]"));
    }
    Ok(decl)
}

fn parse_clock_decl(rest: &str, line: usize) -> Result<ClockDecl, ParseError> {
    let parts: Vec<&str> = rest.split(':').collect();
    if parts.len() != 2 {
        return Err(ParseError::new(line, "expected clock:SIZE:NAME"));
    }
    Ok(ClockDecl { size: parse_size(parts[0], line)?, name: ident(parts[1].trim(), line)?, line })
}

/// Split `head{attrs}` into the head and the optional brace content.
fn split_braces(rest: &str, line: usize) -> Result<(&str, Option<&str>), ParseError> {
    match rest.find('{') {
        None => Ok((rest, None)),
        Some(open) => {
            let tail = &rest[open + 1..];
            let close = tail
                .rfind('}')
                .ok_or_else(|| ParseError::new(line, "unterminated attribute list"))?;
            if !tail[close + 1..].trim().is_empty() {
                return Err(ParseError::new(line, "trailing input after attribute list"));
            }
            Ok((&rest[..open], Some(&tail[..close])))
        }
    }
}

fn parse_location_decl(rest: &str, line: usize) -> Result<LocationDecl, ParseError> {
    let (head, attrs) = split_braces(rest, line)?;
    let parts: Vec<&str> = head.split(':').collect();
    if parts.len() != 2 {
        return Err(ParseError::new(line, "expected location:PROCESS:NAME"));
    }
    Ok(LocationDecl {
        process: ident(parts[0].trim(), line)?,
        name: ident(parts[1].trim(), line)?,
        attrs: parse_attributes(attrs.unwrap_or(""), line)?,
        line,
    })
}

fn parse_edge_decl(rest: &str, line: usize) -> Result<EdgeDecl, ParseError> {
    let (head, attrs) = split_braces(rest, line)?;
    let parts: Vec<&str> = head.split(':').collect();
    if parts.len() != 4 {
        return Err(ParseError::new(line, "expected edge:PROCESS:SRC:TGT:EVENT"));
    }
    Ok(EdgeDecl {
        process: ident(parts[0].trim(), line)?,
        src: ident(parts[1].trim(), line)?,
        tgt: ident(parts[2].trim(), line)?,
        event: ident(parts[3].trim(), line)?,
        attrs: parse_attributes(attrs.unwrap_or(""), line)?,
        line,
    })
}

fn parse_sync_decl(rest: &str, line: usize) -> Result<SyncDecl, ParseError> {
    let mut items = Vec::new();
    for part in rest.split(':') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (weak, body) = match part.strip_suffix('?') {
            Some(body) => (true, body),
            None => (false, part),
        };
        let (process, event) = body
            .split_once('@')
            .ok_or_else(|| ParseError::new(line, format!("expected PROCESS@EVENT, got `{part}`")))?;
        items.push(SyncItem {
            process: ident(process.trim(), line)?,
            event: ident(event.trim(), line)?,
            weak,
        });
    }
    if items.len() < 2 {
        return Err(ParseError::new(line, "synchronization needs at least two participants"));
    }
    Ok(SyncDecl { items, line })
}

// ===============================================================================================
// Attributes
// ===============================================================================================

fn parse_attributes(text: &str, line: usize) -> Result<Attributes, ParseError> {
    let mut attrs = Attributes::default();
    // Chunks are separated by commas; a chunk without a colon continues the
    // previous attribute's value (the `labels:` list).
    let mut pending: Option<(String, String)> = None;
    let mut chunks: Vec<(String, String)> = Vec::new();
    for chunk in text.split(',') {
        if chunk.trim().is_empty() && pending.is_none() {
            continue;
        }
        match chunk.split_once(':') {
            Some((name, value)) if is_attr_name(name.trim()) => {
                if let Some(done) = pending.take() {
                    chunks.push(done);
                }
                pending = Some((name.trim().to_string(), value.trim().to_string()));
            }
            _ => match pending.as_mut() {
                Some((_, value)) => {
                    value.push(',');
                    value.push_str(chunk.trim());
                }
                None => {
                    return Err(ParseError::new(line, format!("stray attribute text `{chunk}`")));
                }
            },
        }
    }
    if let Some(done) = pending.take() {
        chunks.push(done);
    }

    for (name, value) in chunks {
        match name.as_str() {
            "initial" => attrs.initial = no_value(&value, &name, line).map(|_| true)?,
            "committed" => attrs.committed = no_value(&value, &name, line).map(|_| true)?,
            "urgent" => attrs.urgent = no_value(&value, &name, line).map(|_| true)?,
            "invariant" => attrs.invariant = Some(parse_expr(&value, line)?),
            "provided" => attrs.provided = Some(parse_expr(&value, line)?),
            "do" => attrs.do_stmt = Some(parse_stmt(&value, line)?),
            "labels" => {
                for label in value.split(',') {
                    let label = label.trim();
                    if !label.is_empty() {
                        attrs.labels.push(ident(label, line)?);
                    }
                }
            }
            other => {
                return Err(ParseError::new(line, format!("unknown attribute `{other}`")));
            }
        }
    }
    Ok(attrs)
}

fn is_attr_name(name: &str) -> bool {
    matches!(name, "initial" | "committed" | "urgent" | "invariant" | "provided" | "do" | "labels")
}

fn no_value(value: &str, name: &str, line: usize) -> Result<(), ParseError> {
    if value.trim().is_empty() {
        Ok(())
    } else {
        Err(ParseError::new(line, format!("attribute `{name}` takes no value")))
    }
}

// ===============================================================================================
// Expression / statement grammar
// ===============================================================================================

#[derive(Clone, Debug, PartialEq)]
enum Tok {
    Int(i64),
    Ident(String),
    // keywords
    If,
    Then,
    Else,
    End,
    While,
    Do,
    Local,
    Nop,
    // punctuation and operators
    LPar,
    RPar,
    LBracket,
    RBracket,
    Semi,
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    AndAnd,
    Lt,
    Le,
    EqEq,
    Ne,
    Ge,
    Gt,
}

fn tokenize(text: &str, line: usize) -> Result<Vec<Tok>, ParseError> {
    let bytes = text.as_bytes();
    let mut toks = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' => i += 1,
            '(' => {
                toks.push(Tok::LPar);
                i += 1;
            }
            ')' => {
                toks.push(Tok::RPar);
                i += 1;
            }
            '[' => {
                toks.push(Tok::LBracket);
                i += 1;
            }
            ']' => {
                toks.push(Tok::RBracket);
                i += 1;
            }
            ';' => {
                toks.push(Tok::Semi);
                i += 1;
            }
            '+' => {
                toks.push(Tok::Plus);
                i += 1;
            }
            '-' => {
                toks.push(Tok::Minus);
                i += 1;
            }
            '*' => {
                toks.push(Tok::Star);
                i += 1;
            }
            '/' => {
                toks.push(Tok::Slash);
                i += 1;
            }
            '%' => {
                toks.push(Tok::Percent);
                i += 1;
            }
            '&' => {
                if bytes.get(i + 1) == Some(&b'&') {
                    toks.push(Tok::AndAnd);
                    i += 2;
                } else {
                    return Err(ParseError::new(line, "single `&` (use `&&`)"));
                }
            }
            '<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    toks.push(Tok::Le);
                    i += 2;
                } else {
                    toks.push(Tok::Lt);
                    i += 1;
                }
            }
            '>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    toks.push(Tok::Ge);
                    i += 2;
                } else {
                    toks.push(Tok::Gt);
                    i += 1;
                }
            }
            '=' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    toks.push(Tok::EqEq);
                    i += 2;
                } else {
                    toks.push(Tok::Assign);
                    i += 1;
                }
            }
            '!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    toks.push(Tok::Ne);
                    i += 2;
                } else {
                    toks.push(Tok::Bang);
                    i += 1;
                }
            }
            '0'..='9' => {
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                let lit = &text[start..i];
                let n = lit
                    .parse::<i64>()
                    .map_err(|_| ParseError::new(line, format!("integer literal `{lit}` too large")))?;
                toks.push(Tok::Int(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                let word = &text[start..i];
                toks.push(match word {
                    "if" => Tok::If,
                    "then" => Tok::Then,
                    "else" => Tok::Else,
                    "end" => Tok::End,
                    "while" => Tok::While,
                    "do" => Tok::Do,
                    "local" => Tok::Local,
                    "nop" => Tok::Nop,
                    _ => Tok::Ident(word.to_string()),
                });
            }
            other => {
                return Err(ParseError::new(line, format!("unexpected character `{other}`")));
            }
        }
    }
    Ok(toks)
}

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
    line: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn bump(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, tok: &Tok, what: &str) -> Result<(), ParseError> {
        if self.peek() == Some(tok) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.err(format!("expected {what}")))
        }
    }

    fn err(&self, msg: impl Into<String>) -> ParseError {
        ParseError::new(self.line, msg.into())
    }

    // expr := cmp ( "&&" cmp )*
    fn expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.comparison()?;
        while self.peek() == Some(&Tok::AndAnd) {
            self.pos += 1;
            let rhs = self.comparison()?;
            lhs = Expr::Binary(BinaryOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    // cmp := additive ( ("<"|"<="|"=="|"!="|">="|">") additive )?
    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.additive()?;
        let op = match self.peek() {
            Some(Tok::Lt) => Some(BinaryOp::Lt),
            Some(Tok::Le) => Some(BinaryOp::Le),
            Some(Tok::EqEq) => Some(BinaryOp::Eq),
            Some(Tok::Ne) => Some(BinaryOp::Ne),
            Some(Tok::Ge) => Some(BinaryOp::Ge),
            Some(Tok::Gt) => Some(BinaryOp::Gt),
            _ => None,
        };
        match op {
            None => Ok(lhs),
            Some(op) => {
                self.pos += 1;
                let rhs = self.additive()?;
                Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
            }
        }
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Plus) => BinaryOp::Plus,
                Some(Tok::Minus) => BinaryOp::Minus,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Star) => BinaryOp::Times,
                Some(Tok::Slash) => BinaryOp::Div,
                Some(Tok::Percent) => BinaryOp::Mod,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Some(Tok::Minus) => {
                self.pos += 1;
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.unary()?)))
            }
            Some(Tok::Bang) => {
                self.pos += 1;
                Ok(Expr::Unary(UnaryOp::Not, Box::new(self.unary()?)))
            }
            _ => self.atom(),
        }
    }

    fn atom(&mut self) -> Result<Expr, ParseError> {
        match self.bump() {
            Some(Tok::Int(n)) => Ok(Expr::Int(n)),
            Some(Tok::Ident(name)) => {
                if self.peek() == Some(&Tok::LBracket) {
                    self.pos += 1;
                    let idx = self.expr()?;
                    self.eat(&Tok::RBracket, "`]`")?;
                    Ok(Expr::Index(name, Box::new(idx)))
                } else {
                    Ok(Expr::Var(name))
                }
            }
            Some(Tok::LPar) => {
                let inner = self.expr()?;
                self.eat(&Tok::RPar, "`)`")?;
                Ok(Expr::Par(Box::new(inner)))
            }
            other => Err(self.err(format!("expected an expression, got {other:?}"))),
        }
    }

    // stmt := simple ( ";" stmt )?
    fn stmt(&mut self) -> Result<Stmt, ParseError> {
        let first = self.simple_stmt()?;
        if self.peek() == Some(&Tok::Semi) {
            self.pos += 1;
            if self.peek().is_none() {
                return Ok(first); // trailing `;`
            }
            let rest = self.stmt()?;
            return Ok(Stmt::Seq(Box::new(first), Box::new(rest)));
        }
        Ok(first)
    }

    fn simple_stmt(&mut self) -> Result<Stmt, ParseError> {
        match self.peek() {
            Some(Tok::Nop) => {
                self.pos += 1;
                Ok(Stmt::Nop)
            }
            Some(Tok::If) => {
                self.pos += 1;
                let cond = self.expr()?;
                self.eat(&Tok::Then, "`then`")?;
                let then_branch = self.stmt()?;
                let else_branch = if self.peek() == Some(&Tok::Else) {
                    self.pos += 1;
                    self.stmt()?
                } else {
                    Stmt::Nop
                };
                self.eat(&Tok::End, "`end`")?;
                Ok(Stmt::If(cond, Box::new(then_branch), Box::new(else_branch)))
            }
            Some(Tok::While) => {
                self.pos += 1;
                let cond = self.expr()?;
                self.eat(&Tok::Do, "`do`")?;
                let body = self.stmt()?;
                self.eat(&Tok::End, "`end`")?;
                Ok(Stmt::While(cond, Box::new(body)))
            }
            Some(Tok::Local) => {
                self.pos += 1;
                let name = match self.bump() {
                    Some(Tok::Ident(name)) => name,
                    _ => return Err(self.err("expected a variable name after `local`")),
                };
                if self.peek() == Some(&Tok::LBracket) {
                    self.pos += 1;
                    let size = self.expr()?;
                    self.eat(&Tok::RBracket, "`]`")?;
                    Ok(Stmt::LocalArray(name, size))
                } else if self.peek() == Some(&Tok::Assign) {
                    self.pos += 1;
                    let init = self.expr()?;
                    Ok(Stmt::LocalVar(name, Some(init)))
                } else {
                    Ok(Stmt::LocalVar(name, None))
                }
            }
            Some(Tok::Ident(_)) => {
                let name = match self.bump() {
                    Some(Tok::Ident(name)) => name,
                    _ => unreachable!(),
                };
                let index = if self.peek() == Some(&Tok::LBracket) {
                    self.pos += 1;
                    let idx = self.expr()?;
                    self.eat(&Tok::RBracket, "`]`")?;
                    Some(Box::new(idx))
                } else {
                    None
                };
                self.eat(&Tok::Assign, "`=`")?;
                let rhs = self.expr()?;
                Ok(Stmt::Assign(Lvalue { name, index }, rhs))
            }
            other => Err(self.err(format!("expected a statement, got {other:?}"))),
        }
    }
}

/// Parse a single expression (attribute values, tests).
pub fn parse_expr(text: &str, line: usize) -> Result<Expr, ParseError> {
    let mut p = Parser { toks: tokenize(text, line)?, pos: 0, line };
    let e = p.expr()?;
    if p.peek().is_some() {
        return Err(p.err("trailing input after expression"));
    }
    Ok(e)
}

/// Parse a single statement (attribute values, tests).
pub fn parse_stmt(text: &str, line: usize) -> Result<Stmt, ParseError> {
    let mut p = Parser { toks: tokenize(text, line)?, pos: 0, line };
    let s = p.stmt()?;
    if p.peek().is_some() {
        return Err(p.err("trailing input after statement"));
    }
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expression_precedence() {
        let e = parse_expr("1+2*3<x && !(y==4)", 1).unwrap();
        assert_eq!(e.to_string(), "1+2*3<x&&!(y==4)");
        let e = parse_expr("-x+1", 1).unwrap();
        assert_eq!(e.to_string(), "-x+1");
        let e = parse_expr("a[i+1]>=2", 1).unwrap();
        assert_eq!(e.to_string(), "a[i+1]>=2");
    }

    #[test]
    fn statement_forms() {
        let s = parse_stmt("x=1; if x<2 then y=x else nop end; while i>0 do i=i-1 end", 1).unwrap();
        assert!(matches!(s, Stmt::Seq(..)));
        let s = parse_stmt("local t[3]; t[0]=1", 1).unwrap();
        assert!(matches!(s, Stmt::Seq(..)));
    }

    #[test]
    fn full_system() {
        let input = "\
system:demo
event:a # comment
process:P
int:1:0:3:0:i
clock:1:x
location:P:l0{initial: , invariant: x<=5}
location:P:l1{labels: goal, done}
edge:P:l0:l1:a{provided: x<3 && i==0 , do: i=i+1}
";
        let sys = parse_system(input).unwrap();
        assert_eq!(sys.name, "demo");
        assert_eq!(sys.events.len(), 1);
        assert_eq!(sys.locations.len(), 2);
        assert!(sys.locations[0].attrs.initial);
        assert!(sys.locations[0].attrs.invariant.is_some());
        assert_eq!(sys.locations[1].attrs.labels, vec!["goal", "done"]);
        let edge = &sys.edges[0];
        assert!(edge.attrs.provided.is_some());
        assert!(edge.attrs.do_stmt.is_some());
    }

    #[test]
    fn sync_items() {
        let sys = parse_system("system:s\nprocess:P1\nprocess:P2\nevent:a\nsync:P1@a:P2@a?\n").unwrap();
        let sync = &sys.syncs[0];
        assert_eq!(sync.items.len(), 2);
        assert!(!sync.items[0].weak);
        assert!(sync.items[1].weak);
    }

    #[test]
    fn errors_carry_line() {
        let err = parse_system("system:s\nlocation:P\n").unwrap_err();
        assert_eq!(err.line, 2);
        let err = parse_system("system:s\nint:1:5:2:0:i\n").unwrap_err();
        assert!(err.msg.contains("min > max"));
        let err = parse_expr("x ||", 3).unwrap_err();
        assert_eq!(err.line, 3);
    }

    #[test]
    fn weak_sync_needs_two_participants() {
        let err = parse_system("system:s\nprocess:P\nevent:a\nsync:P@a\n").unwrap_err();
        assert!(err.msg.contains("two participants"));
    }
}
