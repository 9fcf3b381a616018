#![allow(clippy::result_large_err)]

use pest::Parser;
use pest_derive::Parser;

use crate::ast::*;
use crate::errors::{to_source_span, ParseError, ANALYSIS_KEYS};

#[derive(Parser)]
#[grammar = "grammar.pest"]
struct LockmeetParser;

type Pair<'a> = pest::iterators::Pair<'a, Rule>;

fn span_from(pair: &Pair<'_>) -> Span {
    let s = pair.as_span();
    let (line, column) = s.start_pos().line_col();
    Span::with_position(s.start(), s.end(), line, column)
}

fn next_inner<'a>(
    inner: &mut pest::iterators::Pairs<'a, Rule>,
    span: Span,
    what: &str,
) -> Result<Pair<'a>, ParseError> {
    inner
        .next()
        .ok_or_else(|| ParseError::syntax(format!("missing {what}"), span, "", ""))
}

/// Parse a `.lmt` source file into an AST Program.
pub fn parse(source: &str, filename: &str) -> Result<Program, ParseError> {
    parse_inner(source).map_err(|e| e.with_source_context(source, filename))
}

fn parse_inner(source: &str) -> Result<Program, ParseError> {
    let pairs = LockmeetParser::parse(Rule::program, source).map_err(|e| {
        let (start, end) = match e.location {
            pest::error::InputLocation::Pos(p) => (p, p + 1),
            pest::error::InputLocation::Span((s, e)) => (s, e),
        };
        ParseError::syntax(format!("{e}"), Span::new(start, end), "", "")
    })?;

    let whole = Span::new(0, source.len());
    let decl = pairs
        .flat_map(|p| p.into_inner())
        .find(|p| p.as_rule() == Rule::program_decl)
        .ok_or_else(|| ParseError::syntax("missing program declaration", whole, "", ""))?;

    let span = span_from(&decl);
    Ok(Program {
        program: Spanned::new(parse_program_decl(decl)?, span),
    })
}

fn parse_program_decl(pair: Pair<'_>) -> Result<ProgramDecl, ParseError> {
    let span = span_from(&pair);
    let mut inner = pair.into_inner();
    let name = next_inner(&mut inner, span, "program name")?
        .as_str()
        .to_string();

    let mut decl = ProgramDecl {
        name,
        analysis: Vec::new(),
        globals: Vec::new(),
        mutexes: Vec::new(),
        threads: Vec::new(),
    };

    for item in inner {
        let item_span = span_from(&item);
        match item.as_rule() {
            Rule::analysis_block => decl.analysis.extend(parse_analysis(item)?),
            Rule::global_decl => decl
                .globals
                .push(Spanned::new(parse_global(item)?, item_span)),
            Rule::mutex_decl => decl
                .mutexes
                .push(Spanned::new(parse_mutex(item)?, item_span)),
            Rule::thread_decl => decl
                .threads
                .push(Spanned::new(parse_thread(item)?, item_span)),
            _ => {}
        }
    }
    Ok(decl)
}

fn parse_analysis(pair: Pair<'_>) -> Result<Vec<AnalysisItem>, ParseError> {
    let mut items = Vec::new();
    for item in pair.into_inner() {
        if item.as_rule() != Rule::analysis_item {
            continue;
        }
        let span = span_from(&item);
        let mut inner = item.into_inner();
        let key_pair = next_inner(&mut inner, span, "analysis key")?;
        let key = key_pair.as_str().to_string();
        if !ANALYSIS_KEYS.contains(&key.as_str()) {
            return Err(ParseError::InvalidField {
                field: key,
                span: to_source_span(span_from(&key_pair)),
                src: miette::NamedSource::new("", String::new()),
            });
        }
        let value = next_inner(&mut inner, span, "analysis value")?
            .as_str()
            .to_string();
        items.push(AnalysisItem { key, value, span });
    }
    Ok(items)
}

fn parse_global(pair: Pair<'_>) -> Result<GlobalDecl, ParseError> {
    let span = span_from(&pair);
    let mut inner = pair.into_inner();
    let name = next_inner(&mut inner, span, "global name")?
        .as_str()
        .to_string();
    let init = match inner.next() {
        Some(lit) => Some(parse_int(&lit)?),
        None => None,
    };
    Ok(GlobalDecl { name, init })
}

fn parse_mutex(pair: Pair<'_>) -> Result<MutexDecl, ParseError> {
    let span = span_from(&pair);
    let mut inner = pair.into_inner();
    let name = next_inner(&mut inner, span, "mutex name")?
        .as_str()
        .to_string();
    let protects = match inner.next() {
        Some(list) => list.into_inner().map(|p| p.as_str().to_string()).collect(),
        None => Vec::new(),
    };
    Ok(MutexDecl { name, protects })
}

fn parse_thread(pair: Pair<'_>) -> Result<ThreadDecl, ParseError> {
    let span = span_from(&pair);
    let mut inner = pair.into_inner();
    let name = next_inner(&mut inner, span, "thread name")?
        .as_str()
        .to_string();
    let mut body = Vec::new();
    for stmt in inner {
        let stmt_span = span_from(&stmt);
        body.push(Spanned::new(parse_stmt(stmt)?, stmt_span));
    }
    Ok(ThreadDecl { name, body })
}

fn parse_stmt(pair: Pair<'_>) -> Result<Stmt, ParseError> {
    let span = span_from(&pair);
    let rule = pair.as_rule();
    let mut inner = pair.into_inner();
    let stmt = match rule {
        Rule::lock_stmt => Stmt::Lock(next_inner(&mut inner, span, "mutex")?.as_str().into()),
        Rule::unlock_stmt => Stmt::Unlock(next_inner(&mut inner, span, "mutex")?.as_str().into()),
        Rule::spawn_stmt => Stmt::Spawn(next_inner(&mut inner, span, "thread")?.as_str().into()),
        Rule::join_stmt => Stmt::Join(next_inner(&mut inner, span, "thread")?.as_str().into()),
        Rule::assert_stmt => Stmt::Assert(parse_pred(next_inner(&mut inner, span, "predicate")?)?),
        Rule::assign_stmt => {
            let target = next_inner(&mut inner, span, "assignment target")?
                .as_str()
                .to_string();
            let value = parse_expr(next_inner(&mut inner, span, "expression")?)?;
            Stmt::Assign { target, value }
        }
        other => {
            return Err(ParseError::syntax(
                format!("unexpected statement {other:?}"),
                span,
                "",
                "",
            ))
        }
    };
    Ok(stmt)
}

fn parse_expr(pair: Pair<'_>) -> Result<Expr, ParseError> {
    let span = span_from(&pair);
    let mut inner = pair.into_inner();
    let mut acc = parse_term(next_inner(&mut inner, span, "operand")?)?;
    while let Some(op) = inner.next() {
        let rhs = parse_term(next_inner(&mut inner, span, "operand")?)?;
        acc = match op.as_str() {
            "+" => Expr::Add(Box::new(acc), Box::new(rhs)),
            _ => Expr::Sub(Box::new(acc), Box::new(rhs)),
        };
    }
    Ok(acc)
}

fn parse_term(pair: Pair<'_>) -> Result<Expr, ParseError> {
    match pair.as_rule() {
        Rule::nondet => Ok(Expr::Nondet),
        Rule::int_lit => Ok(Expr::Int(parse_int(&pair)?)),
        Rule::ident => Ok(Expr::Var(pair.as_str().to_string())),
        Rule::expr => parse_expr(pair),
        other => Err(ParseError::syntax(
            format!("unexpected operand {other:?}"),
            span_from(&pair),
            "",
            "",
        )),
    }
}

fn parse_int(pair: &Pair<'_>) -> Result<i64, ParseError> {
    pair.as_str()
        .parse::<i64>()
        .map_err(|_| ParseError::IntegerOutOfRange {
            literal: pair.as_str().to_string(),
            span: to_source_span(span_from(pair)),
            src: miette::NamedSource::new("", String::new()),
        })
}

fn parse_pred(pair: Pair<'_>) -> Result<PredExpr, ParseError> {
    let span = span_from(&pair);
    match pair.as_rule() {
        Rule::pred => fold_binary(pair, span, PredExpr::Or),
        Rule::and_pred => fold_binary(pair, span, PredExpr::And),
        Rule::not_pred => parse_pred(next_inner(&mut pair.into_inner(), span, "predicate")?),
        Rule::negation => {
            let inner = next_inner(&mut pair.into_inner(), span, "negated predicate")?;
            Ok(PredExpr::Not(Box::new(parse_pred(inner)?)))
        }
        Rule::comparison => {
            let mut inner = pair.into_inner();
            let lhs = parse_expr(next_inner(&mut inner, span, "left operand")?)?;
            let op = match next_inner(&mut inner, span, "comparison operator")?.as_str() {
                "==" => CmpOp::Eq,
                "!=" => CmpOp::Ne,
                "<=" => CmpOp::Le,
                ">=" => CmpOp::Ge,
                "<" => CmpOp::Lt,
                _ => CmpOp::Gt,
            };
            let rhs = parse_expr(next_inner(&mut inner, span, "right operand")?)?;
            Ok(PredExpr::Cmp { lhs, op, rhs })
        }
        other => Err(ParseError::syntax(
            format!("unexpected predicate {other:?}"),
            span,
            "",
            "",
        )),
    }
}

fn fold_binary(
    pair: Pair<'_>,
    span: Span,
    combine: fn(Box<PredExpr>, Box<PredExpr>) -> PredExpr,
) -> Result<PredExpr, ParseError> {
    let mut inner = pair.into_inner();
    let mut acc = parse_pred(next_inner(&mut inner, span, "predicate")?)?;
    for next in inner {
        acc = combine(Box::new(acc), Box::new(parse_pred(next)?));
    }
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLUSTER12: &str = r#"
program Cluster12 {
    analysis { cluster_size: 2; path_sensitivity: threadflag; }

    global g = 0;
    global h;
    mutex A protects g, h;

    thread worker {
        lock A;
        x = h;      // copy through a local
        g = x + 1;
        unlock A;
    }

    thread main {
        spawn worker;
        lock A;
        assert g == h && !(h < 0);
        unlock A;
        join worker;
    }
}
"#;

    #[test]
    fn parses_full_program() {
        let program = parse(CLUSTER12, "cluster12.lmt").expect("should parse");
        let decl = &program.program.node;
        assert_eq!(decl.name, "Cluster12");
        assert_eq!(decl.analysis.len(), 2);
        assert_eq!(decl.analysis[0].key, "cluster_size");
        assert_eq!(decl.analysis[0].value, "2");
        assert_eq!(decl.globals.len(), 2);
        assert_eq!(decl.globals[0].node.init, Some(0));
        assert_eq!(decl.globals[1].node.init, None);
        assert_eq!(decl.mutexes[0].node.protects, vec!["g", "h"]);
        assert_eq!(decl.threads.len(), 2);
        assert_eq!(decl.threads[0].node.body.len(), 4);
    }

    #[test]
    fn statements_carry_line_and_column() {
        let program = parse(CLUSTER12, "cluster12.lmt").unwrap();
        let main = &program.program.node.threads[1].node;
        let assert_stmt = &main.body[2];
        assert!(matches!(assert_stmt.node, Stmt::Assert(_)));
        assert_eq!(assert_stmt.span.line, 19);
        assert_eq!(assert_stmt.span.column, 9);
    }

    #[test]
    fn predicate_precedence_and_negation() {
        let program = parse(CLUSTER12, "cluster12.lmt").unwrap();
        let main = &program.program.node.threads[1].node;
        let Stmt::Assert(pred) = &main.body[2].node else {
            panic!("expected assert");
        };
        match pred {
            PredExpr::And(lhs, rhs) => {
                assert!(matches!(**lhs, PredExpr::Cmp { op: CmpOp::Eq, .. }));
                assert!(matches!(**rhs, PredExpr::Not(_)));
            }
            other => panic!("expected conjunction, got {other:?}"),
        }
    }

    #[test]
    fn expressions_are_left_associative() {
        let src = "program P { thread main { x = 1 - 2 + nondet(); } }";
        let program = parse(src, "p.lmt").unwrap();
        let Stmt::Assign { value, .. } = &program.program.node.threads[0].node.body[0].node else {
            panic!("expected assignment");
        };
        assert_eq!(
            *value,
            Expr::Add(
                Box::new(Expr::Sub(Box::new(Expr::Int(1)), Box::new(Expr::Int(2)))),
                Box::new(Expr::Nondet)
            )
        );
    }

    #[test]
    fn identifiers_may_start_with_keywords() {
        let src = "program P { global lock_count; thread main { lock_count = 1; } }";
        let program = parse(src, "p.lmt").unwrap();
        let body = &program.program.node.threads[0].node.body;
        assert!(matches!(&body[0].node, Stmt::Assign { target, .. } if target == "lock_count"));
    }

    #[test]
    fn rejects_unknown_analysis_key() {
        let src = "program P { analysis { depth: 3; } thread main { } }";
        let err = parse(src, "p.lmt").unwrap_err();
        assert!(matches!(err, ParseError::InvalidField { ref field, .. } if field == "depth"));
    }

    #[test]
    fn rejects_missing_semicolon() {
        let src = "program P { thread main { lock A } }";
        assert!(matches!(
            parse(src, "p.lmt"),
            Err(ParseError::Syntax { .. })
        ));
    }

    #[test]
    fn rejects_oversized_integer() {
        let src = "program P { global g = 99999999999999999999; }";
        assert!(matches!(
            parse(src, "p.lmt"),
            Err(ParseError::IntegerOutOfRange { .. })
        ));
    }
}
