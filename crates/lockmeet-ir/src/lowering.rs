use indexmap::IndexSet;
use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use crate::program::*;
use lockmeet_dsl::ast;

/// Name of the entry thread.
pub const MAIN_THREAD: &str = "main";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoweringError {
    #[error("Duplicate global '{0}'")]
    DuplicateGlobal(String),
    #[error("Duplicate mutex '{0}'")]
    DuplicateMutex(String),
    #[error("Duplicate thread '{0}'")]
    DuplicateThread(String),
    #[error("Analysis option '{0}' is set more than once")]
    DuplicateOption(String),
    #[error("Mutex '{mutex}' protects unknown global '{global}'")]
    UnknownProtectedGlobal { mutex: String, global: String },
    #[error("Unknown mutex '{mutex}' in thread '{thread}'")]
    UnknownMutex { thread: String, mutex: String },
    #[error("Unknown thread '{target}' referenced from thread '{thread}'")]
    UnknownThread { thread: String, target: String },
    #[error("Variable '{name}' in thread '{thread}' is neither a global nor assigned locally")]
    UnknownVariable { thread: String, name: String },
    #[error("Local '{name}' in thread '{thread}' shadows a mutex or thread name")]
    AmbiguousName { thread: String, name: String },
    #[error("Program has no 'main' thread")]
    MissingMain,
    #[error("Thread '{0}' spawns 'main'")]
    SpawnMain(String),
}

/// A lowering error enriched with source span information for pretty-printed diagnostics.
#[derive(Debug, Error, Diagnostic)]
#[error("{inner}")]
#[diagnostic(code(lockmeet::lower))]
pub struct SpannedLoweringError {
    #[source_code]
    pub src: NamedSource<String>,
    pub inner: LoweringError,
    #[label("here")]
    pub span: Option<SourceSpan>,
}

impl SpannedLoweringError {
    fn new(err: LoweringError, source: &str, filename: &str, span: Option<ast::Span>) -> Self {
        Self {
            src: NamedSource::new(filename, source.to_string()),
            inner: err,
            span: span.map(|s| SourceSpan::new(s.start.into(), s.end.saturating_sub(s.start))),
        }
    }
}

/// Lower an AST program, attaching the offending declaration's span to errors.
pub fn lower_with_source(
    program: &ast::Program,
    source: &str,
    filename: &str,
) -> Result<ThreadedProgram, SpannedLoweringError> {
    lower_spanned(program)
        .map_err(|(err, span)| SpannedLoweringError::new(err, source, filename, span))
}

/// Resolve names and produce the indexed threaded program.
pub fn lower(program: &ast::Program) -> Result<ThreadedProgram, LoweringError> {
    lower_spanned(program).map_err(|(err, _)| err)
}

type LowerResult<T> = Result<T, (LoweringError, Option<ast::Span>)>;

fn at(span: ast::Span) -> impl FnOnce(LoweringError) -> (LoweringError, Option<ast::Span>) {
    move |err| (err, Some(span))
}

fn loc(span: ast::Span) -> SourceLoc {
    SourceLoc {
        line: span.line,
        column: span.column,
    }
}

fn lower_spanned(program: &ast::Program) -> LowerResult<ThreadedProgram> {
    let decl = &program.program.node;
    let mut out = ThreadedProgram::new(decl.name.clone());

    for item in &decl.analysis {
        if out.analysis.contains_key(&item.key) {
            return Err((LoweringError::DuplicateOption(item.key.clone()), Some(item.span)));
        }
        out.analysis.insert(item.key.clone(), item.value.clone());
    }

    for global in &decl.globals {
        if out.global_id(&global.node.name).is_some() {
            return Err((
                LoweringError::DuplicateGlobal(global.node.name.clone()),
                Some(global.span),
            ));
        }
        out.add_global(global.node.name.clone(), global.node.init.unwrap_or(0));
    }

    for mutex in &decl.mutexes {
        let name = &mutex.node.name;
        if out.mutex_id(name).is_some() {
            return Err((LoweringError::DuplicateMutex(name.clone()), Some(mutex.span)));
        }
        let protects = mutex
            .node
            .protects
            .iter()
            .map(|g| {
                out.global_id(g).ok_or_else(|| {
                    (
                        LoweringError::UnknownProtectedGlobal {
                            mutex: name.clone(),
                            global: g.clone(),
                        },
                        Some(mutex.span),
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        out.add_mutex(name.clone(), protects);
    }

    for thread in &decl.threads {
        if out.thread_id(&thread.node.name).is_some() {
            return Err((
                LoweringError::DuplicateThread(thread.node.name.clone()),
                Some(thread.span),
            ));
        }
        out.add_thread(thread.node.name.clone());
    }

    out.main = out
        .thread_id(MAIN_THREAD)
        .ok_or((LoweringError::MissingMain, Some(program.program.span)))?;

    for (tid, thread) in decl.threads.iter().enumerate() {
        let locals = collect_locals(&out, &thread.node)?;
        let mut events = Vec::new();
        for stmt in &thread.node.body {
            lower_stmt(&out, &thread.node.name, &locals, stmt, &mut events)?;
        }
        out.threads[tid].locals = locals.into_iter().collect();
        out.threads[tid].events = events;
    }

    out.compute_multiplicities();
    Ok(out)
}

/// Non-global assignment targets, in first-assignment order.
fn collect_locals(
    program: &ThreadedProgram,
    thread: &ast::ThreadDecl,
) -> LowerResult<IndexSet<String>> {
    let mut locals = IndexSet::new();
    for stmt in &thread.body {
        if let ast::Stmt::Assign { target, .. } = &stmt.node {
            if program.global_id(target).is_some() {
                continue;
            }
            if program.mutex_id(target).is_some() || program.thread_id(target).is_some() {
                return Err((
                    LoweringError::AmbiguousName {
                        thread: thread.name.clone(),
                        name: target.clone(),
                    },
                    Some(stmt.span),
                ));
            }
            locals.insert(target.clone());
        }
    }
    Ok(locals)
}

struct Scope<'a> {
    program: &'a ThreadedProgram,
    thread: &'a str,
    locals: &'a IndexSet<String>,
}

impl Scope<'_> {
    fn var(&self, name: &str) -> Result<Var, LoweringError> {
        if let Some(g) = self.program.global_id(name) {
            return Ok(Var::Global(g));
        }
        self.locals
            .get_index_of(name)
            .map(Var::Local)
            .ok_or_else(|| LoweringError::UnknownVariable {
                thread: self.thread.to_string(),
                name: name.to_string(),
            })
    }

    fn expr(&self, expr: &ast::Expr) -> Result<Expr, LoweringError> {
        Ok(match expr {
            ast::Expr::Int(n) => Expr::Const(*n),
            ast::Expr::Nondet => Expr::Nondet,
            ast::Expr::Var(name) => Expr::Var(self.var(name)?),
            ast::Expr::Add(l, r) => Expr::Add(Box::new(self.expr(l)?), Box::new(self.expr(r)?)),
            ast::Expr::Sub(l, r) => Expr::Sub(Box::new(self.expr(l)?), Box::new(self.expr(r)?)),
        })
    }

    fn pred(&self, pred: &ast::PredExpr) -> Result<Predicate, LoweringError> {
        Ok(match pred {
            ast::PredExpr::Cmp { lhs, op, rhs } => Predicate::Cmp {
                lhs: self.expr(lhs)?,
                op: lower_cmp(*op),
                rhs: self.expr(rhs)?,
            },
            ast::PredExpr::And(l, r) => {
                Predicate::And(Box::new(self.pred(l)?), Box::new(self.pred(r)?))
            }
            ast::PredExpr::Or(l, r) => Predicate::Or(Box::new(self.pred(l)?), Box::new(self.pred(r)?)),
            ast::PredExpr::Not(inner) => Predicate::Not(Box::new(self.pred(inner)?)),
        })
    }

    fn mutex(&self, name: &str) -> Result<MutexId, LoweringError> {
        self.program
            .mutex_id(name)
            .ok_or_else(|| LoweringError::UnknownMutex {
                thread: self.thread.to_string(),
                mutex: name.to_string(),
            })
    }

    fn thread(&self, name: &str) -> Result<ThreadId, LoweringError> {
        self.program
            .thread_id(name)
            .ok_or_else(|| LoweringError::UnknownThread {
                thread: self.thread.to_string(),
                target: name.to_string(),
            })
    }
}

fn lower_cmp(op: ast::CmpOp) -> CmpOp {
    match op {
        ast::CmpOp::Eq => CmpOp::Eq,
        ast::CmpOp::Ne => CmpOp::Ne,
        ast::CmpOp::Lt => CmpOp::Lt,
        ast::CmpOp::Le => CmpOp::Le,
        ast::CmpOp::Gt => CmpOp::Gt,
        ast::CmpOp::Ge => CmpOp::Ge,
    }
}

fn lower_stmt(
    program: &ThreadedProgram,
    thread: &str,
    locals: &IndexSet<String>,
    stmt: &ast::Spanned<ast::Stmt>,
    events: &mut Vec<Event>,
) -> LowerResult<()> {
    let scope = Scope {
        program,
        thread,
        locals,
    };
    let span = stmt.span;
    let here = loc(span);
    let push_reads = |events: &mut Vec<Event>, globals: Vec<GlobalId>| {
        events.extend(
            globals
                .into_iter()
                .map(|g| Event::new(EventKind::Read(g), here)),
        );
    };

    match &stmt.node {
        ast::Stmt::Lock(name) => {
            let m = scope.mutex(name).map_err(at(span))?;
            events.push(Event::new(EventKind::Lock(m), here));
        }
        ast::Stmt::Unlock(name) => {
            let m = scope.mutex(name).map_err(at(span))?;
            events.push(Event::new(EventKind::Unlock(m), here));
        }
        ast::Stmt::Spawn(name) => {
            let t = scope.thread(name).map_err(at(span))?;
            if t == program.main {
                return Err((LoweringError::SpawnMain(thread.to_string()), Some(span)));
            }
            events.push(Event::new(EventKind::ThreadCreate(t), here));
        }
        ast::Stmt::Join(name) => {
            let t = scope.thread(name).map_err(at(span))?;
            events.push(Event::new(EventKind::ThreadJoin(t), here));
        }
        ast::Stmt::Assign { target, value } => {
            let value = scope.expr(value).map_err(at(span))?;
            push_reads(events, value.globals_read());
            let kind = match scope.var(target).map_err(at(span))? {
                Var::Global(global) => EventKind::Write { global, value },
                Var::Local(local) => EventKind::Assign { local, value },
            };
            events.push(Event::new(kind, here));
        }
        ast::Stmt::Assert(pred) => {
            let predicate = scope.pred(pred).map_err(at(span))?;
            push_reads(events, predicate.globals_read());
            events.push(Event::new(
                EventKind::Assert {
                    predicate,
                    text: pred.to_string(),
                },
                here,
            ));
        }
    }
    Ok(())
}
