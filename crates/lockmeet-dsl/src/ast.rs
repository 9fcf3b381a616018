use std::fmt;

/// Source span for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct Span {
    pub start: usize,
    pub end: usize,
    /// 1-based line of `start` (0 when unknown).
    pub line: usize,
    /// 1-based column of `start` (0 when unknown).
    pub column: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start,
            end,
            line: 0,
            column: 0,
        }
    }

    pub fn with_position(start: usize, end: usize, line: usize, column: usize) -> Self {
        Self {
            start,
            end,
            line,
            column,
        }
    }
}

/// A spanned AST node.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }
}

/// Top-level file = a single program declaration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct Program {
    pub program: Spanned<ProgramDecl>,
}

/// `program Name { ... }`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct ProgramDecl {
    pub name: String,
    pub analysis: Vec<AnalysisItem>,
    pub globals: Vec<Spanned<GlobalDecl>>,
    pub mutexes: Vec<Spanned<MutexDecl>>,
    pub threads: Vec<Spanned<ThreadDecl>>,
}

/// One `key: value;` entry of the `analysis { }` block.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct AnalysisItem {
    pub key: String,
    pub value: String,
    pub span: Span,
}

/// `global g = 0;`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct GlobalDecl {
    pub name: String,
    pub init: Option<i64>,
}

/// `mutex A protects g, h;`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct MutexDecl {
    pub name: String,
    pub protects: Vec<String>,
}

/// `thread name { stmt* }`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct ThreadDecl {
    pub name: String,
    pub body: Vec<Spanned<Stmt>>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum Stmt {
    Lock(String),
    Unlock(String),
    Spawn(String),
    Join(String),
    Assign { target: String, value: Expr },
    Assert(PredExpr),
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum Expr {
    Int(i64),
    Nondet,
    Var(String),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Names referenced by the expression, in source order.
    pub fn referenced_names(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_names(&mut out);
        out
    }

    fn collect_names<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Int(_) | Expr::Nondet => {}
            Expr::Var(name) => out.push(name),
            Expr::Add(l, r) | Expr::Sub(l, r) => {
                l.collect_names(out);
                r.collect_names(out);
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Int(n) => write!(f, "{n}"),
            Expr::Nondet => write!(f, "nondet"),
            Expr::Var(name) => write!(f, "{name}"),
            Expr::Add(l, r) => write!(f, "{l} + {r}"),
            Expr::Sub(l, r) => match r.as_ref() {
                Expr::Add(..) | Expr::Sub(..) => write!(f, "{l} - ({r})"),
                _ => write!(f, "{l} - {r}"),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum PredExpr {
    Cmp { lhs: Expr, op: CmpOp, rhs: Expr },
    And(Box<PredExpr>, Box<PredExpr>),
    Or(Box<PredExpr>, Box<PredExpr>),
    Not(Box<PredExpr>),
}

impl PredExpr {
    /// Names referenced by the predicate, in source order.
    pub fn referenced_names(&self) -> Vec<&str> {
        match self {
            PredExpr::Cmp { lhs, rhs, .. } => {
                let mut out = lhs.referenced_names();
                out.extend(rhs.referenced_names());
                out
            }
            PredExpr::And(l, r) | PredExpr::Or(l, r) => {
                let mut out = l.referenced_names();
                out.extend(r.referenced_names());
                out
            }
            PredExpr::Not(inner) => inner.referenced_names(),
        }
    }
}

impl fmt::Display for PredExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredExpr::Cmp { lhs, op, rhs } => write!(f, "{lhs} {op} {rhs}"),
            PredExpr::And(l, r) => write!(f, "({l} && {r})"),
            PredExpr::Or(l, r) => write!(f, "({l} || {r})"),
            PredExpr::Not(inner) => write!(f, "!({inner})"),
        }
    }
}
