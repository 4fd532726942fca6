//! Parser implementation for GLSL translation units.

use super::ast::{
    ArrayDim, AssignOp, BinaryOp, BlockDecl, CaseLabel, Decl, Declarator, Expr, FullType,
    FunctionDecl, GlobalDecl, Initializer, InterpQualifier, LayoutItem, LayoutValue, MemberDecl,
    Param, Qualifier, Spanned, Stmt, StorageQualifier, SwitchCase, TranslationUnit, TypeSpecifier,
    UnaryOp,
};
use crate::source::{SourceId, Span};
use pest::iterators::Pair;
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest::Parser;
use pest_derive::Parser;
use std::sync::LazyLock;

#[derive(Parser)]
#[grammar = "syntax/grammar.pest"]
struct GlslParser;

/// Pratt parser for binary operator precedence.
static PRATT_PARSER: LazyLock<PrattParser<Rule>> = LazyLock::new(|| {
    PrattParser::new()
        // Lowest precedence
        .op(Op::infix(Rule::log_or, Assoc::Left))
        .op(Op::infix(Rule::log_xor, Assoc::Left))
        .op(Op::infix(Rule::log_and, Assoc::Left))
        .op(Op::infix(Rule::bit_or, Assoc::Left))
        .op(Op::infix(Rule::bit_xor, Assoc::Left))
        .op(Op::infix(Rule::bit_and, Assoc::Left))
        .op(Op::infix(Rule::eq, Assoc::Left) | Op::infix(Rule::neq, Assoc::Left))
        .op(Op::infix(Rule::lt, Assoc::Left)
            | Op::infix(Rule::gt, Assoc::Left)
            | Op::infix(Rule::lte, Assoc::Left)
            | Op::infix(Rule::gte, Assoc::Left))
        .op(Op::infix(Rule::shl, Assoc::Left) | Op::infix(Rule::shr, Assoc::Left))
        .op(Op::infix(Rule::add, Assoc::Left) | Op::infix(Rule::sub, Assoc::Left))
        // Highest precedence
        .op(Op::infix(Rule::mul, Assoc::Left)
            | Op::infix(Rule::div, Assoc::Left)
            | Op::infix(Rule::modulo, Assoc::Left))
});

/// Parse error with source location.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("parse error: {message} at line {line}, column {column}")]
    Syntax {
        message: String,
        line: usize,
        column: usize,
        span: Option<Span>,
    },

    #[error("unexpected rule: expected {expected}, found {found}")]
    UnexpectedRule {
        expected: String,
        found: String,
        span: Option<Span>,
    },

    #[error("missing required element: {0}")]
    Missing(String),
}

impl ParseError {
    pub fn span(&self) -> Option<Span> {
        match self {
            ParseError::Syntax { span, .. } => *span,
            ParseError::UnexpectedRule { span, .. } => *span,
            ParseError::Missing(_) => None,
        }
    }
}

struct ParserContext {
    source_id: SourceId,
}

impl ParserContext {
    fn new(source_id: SourceId) -> Self {
        Self { source_id }
    }

    fn span(&self, pair: &Pair<Rule>) -> Span {
        let pest_span = pair.as_span();
        Span::new(self.source_id, pest_span.start(), pest_span.end())
    }

    fn unexpected<T>(&self, expected: &str, pair: &Pair<Rule>) -> Result<T, ParseError> {
        Err(ParseError::UnexpectedRule {
            expected: expected.to_string(),
            found: format!("{:?}", pair.as_rule()),
            span: Some(self.span(pair)),
        })
    }
}

/// Parse preprocessed GLSL into a translation unit.
pub fn parse(source: &str, source_id: SourceId) -> Result<TranslationUnit, ParseError> {
    let mut pairs = GlslParser::parse(Rule::translation_unit, source).map_err(|err| {
        let (line, column) = match err.line_col {
            pest::error::LineColLocation::Pos((l, c)) => (l, c),
            pest::error::LineColLocation::Span((l, c), _) => (l, c),
        };
        let offset = match err.location {
            pest::error::InputLocation::Pos(p) => p,
            pest::error::InputLocation::Span((s, _)) => s,
        };
        ParseError::Syntax {
            message: err.variant.message().to_string(),
            line,
            column,
            span: Some(Span::point(source_id, offset)),
        }
    })?;

    let mut ctx = ParserContext::new(source_id);
    let unit = pairs
        .next()
        .ok_or(ParseError::Missing("translation unit".into()))?;

    let mut decls = Vec::new();
    for pair in unit.into_inner() {
        match pair.as_rule() {
            Rule::external_decl => {
                let span = ctx.span(&pair);
                let inner = pair
                    .into_inner()
                    .next()
                    .ok_or(ParseError::Missing("declaration".into()))?;
                if inner.as_rule() == Rule::empty_stmt {
                    continue;
                }
                decls.push(Spanned::new(parse_external_decl(&mut ctx, inner)?, span));
            }
            Rule::EOI => {}
            _ => return ctx.unexpected("external declaration", &pair),
        }
    }
    Ok(TranslationUnit { decls })
}

fn parse_external_decl(ctx: &mut ParserContext, pair: Pair<Rule>) -> Result<Decl, ParseError> {
    match pair.as_rule() {
        Rule::function_decl => Ok(Decl::Function(parse_function_decl(ctx, pair)?)),
        Rule::global_decl => Ok(Decl::Global(parse_global_decl(ctx, pair)?)),
        Rule::block_decl => Ok(Decl::Block(parse_block_decl(ctx, pair)?)),
        Rule::precision_decl => {
            let mut precision = String::new();
            let mut type_name = String::new();
            for inner in pair.into_inner() {
                match inner.as_rule() {
                    Rule::precision_qualifier => precision = inner.as_str().to_string(),
                    Rule::type_specifier => type_name = inner.as_str().trim().to_string(),
                    _ => {}
                }
            }
            Ok(Decl::Precision {
                precision,
                type_name,
            })
        }
        Rule::qualifier_decl => {
            let mut qualifiers = Vec::new();
            for inner in pair.into_inner() {
                if inner.as_rule() == Rule::qualifier {
                    qualifiers.push(parse_qualifier(ctx, inner)?);
                }
            }
            Ok(Decl::QualifierOnly { qualifiers })
        }
        _ => ctx.unexpected("declaration", &pair),
    }
}

fn parse_function_decl(
    ctx: &mut ParserContext,
    pair: Pair<Rule>,
) -> Result<FunctionDecl, ParseError> {
    let mut return_type = None;
    let mut name = String::new();
    let mut name_span = Span::default();
    let mut params = Vec::new();
    let mut body = None;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::full_type => return_type = Some(parse_full_type(ctx, inner)?),
            Rule::ident => {
                name = inner.as_str().to_string();
                name_span = ctx.span(&inner);
            }
            Rule::param_list => {
                for p in inner.into_inner() {
                    let span = ctx.span(&p);
                    let param = parse_param(ctx, p)?;
                    // `f(void)` declares no parameters.
                    if let TypeSpecifier::Named { name, .. } = &param.type_spec {
                        if name == "void" && param.name.is_none() && param.arrays.is_empty() {
                            continue;
                        }
                    }
                    params.push(Spanned::new(param, span));
                }
            }
            Rule::compound_stmt => body = Some(parse_compound(ctx, inner)?),
            _ => {}
        }
    }

    Ok(FunctionDecl {
        return_type: return_type.ok_or(ParseError::Missing("return type".into()))?,
        name,
        name_span,
        params,
        body,
    })
}

fn parse_param(ctx: &mut ParserContext, pair: Pair<Rule>) -> Result<Param, ParseError> {
    let mut qualifiers = Vec::new();
    let mut type_spec = None;
    let mut arrays = Vec::new();
    let mut name = None;
    let mut name_span = Span::default();

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::qualifier => qualifiers.push(parse_qualifier(ctx, inner)?),
            Rule::type_specifier => type_spec = Some(parse_type_specifier(ctx, inner)?),
            // Dimensions written on the type and on the name both apply.
            Rule::array_spec => arrays.push(parse_array_spec(ctx, inner)?),
            Rule::ident => {
                name = Some(inner.as_str().to_string());
                name_span = ctx.span(&inner);
            }
            _ => {}
        }
    }

    Ok(Param {
        qualifiers,
        type_spec: type_spec.ok_or(ParseError::Missing("parameter type".into()))?,
        arrays,
        name,
        name_span,
    })
}

fn parse_global_decl(ctx: &mut ParserContext, pair: Pair<Rule>) -> Result<GlobalDecl, ParseError> {
    let mut ty = None;
    let mut declarators = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::full_type => ty = Some(parse_full_type(ctx, inner)?),
            Rule::declarator => declarators.push(parse_declarator(ctx, inner)?),
            _ => {}
        }
    }
    Ok(GlobalDecl {
        ty: ty.ok_or(ParseError::Missing("type".into()))?,
        declarators,
    })
}

fn parse_block_decl(ctx: &mut ParserContext, pair: Pair<Rule>) -> Result<BlockDecl, ParseError> {
    let mut qualifiers = Vec::new();
    let mut type_name = String::new();
    let mut type_name_span = Span::default();
    let mut members = Vec::new();
    let mut instance: Option<(String, Span, Vec<ArrayDim>)> = None;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::qualifier => qualifiers.push(parse_qualifier(ctx, inner)?),
            Rule::ident => {
                if type_name.is_empty() {
                    type_name = inner.as_str().to_string();
                    type_name_span = ctx.span(&inner);
                } else {
                    instance = Some((inner.as_str().to_string(), ctx.span(&inner), Vec::new()));
                }
            }
            Rule::member_decl => {
                let span = ctx.span(&inner);
                members.push(Spanned::new(parse_member_decl(ctx, inner)?, span));
            }
            Rule::array_spec => {
                if let Some((_, _, dims)) = instance.as_mut() {
                    dims.push(parse_array_spec(ctx, inner)?);
                }
            }
            _ => {}
        }
    }

    Ok(BlockDecl {
        qualifiers,
        type_name,
        type_name_span,
        members,
        instance,
    })
}

fn parse_member_decl(ctx: &mut ParserContext, pair: Pair<Rule>) -> Result<MemberDecl, ParseError> {
    let mut ty = None;
    let mut declarators = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::full_type => ty = Some(parse_full_type(ctx, inner)?),
            Rule::member_declarator => {
                let mut name = String::new();
                let mut name_span = Span::default();
                let mut arrays = Vec::new();
                for part in inner.into_inner() {
                    match part.as_rule() {
                        Rule::ident => {
                            name = part.as_str().to_string();
                            name_span = ctx.span(&part);
                        }
                        Rule::array_spec => arrays.push(parse_array_spec(ctx, part)?),
                        _ => {}
                    }
                }
                declarators.push(Declarator {
                    name,
                    name_span,
                    arrays,
                    init: None,
                });
            }
            _ => {}
        }
    }
    Ok(MemberDecl {
        ty: ty.ok_or(ParseError::Missing("member type".into()))?,
        declarators,
    })
}

fn parse_full_type(ctx: &mut ParserContext, pair: Pair<Rule>) -> Result<FullType, ParseError> {
    let mut qualifiers = Vec::new();
    let mut spec = None;
    let mut arrays = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::qualifier => qualifiers.push(parse_qualifier(ctx, inner)?),
            Rule::type_specifier => spec = Some(parse_type_specifier(ctx, inner)?),
            Rule::array_spec => arrays.push(parse_array_spec(ctx, inner)?),
            _ => {}
        }
    }
    Ok(FullType {
        qualifiers,
        spec: spec.ok_or(ParseError::Missing("type specifier".into()))?,
        arrays,
    })
}

fn parse_type_specifier(
    ctx: &mut ParserContext,
    pair: Pair<Rule>,
) -> Result<TypeSpecifier, ParseError> {
    let span = ctx.span(&pair);
    let inner = pair
        .into_inner()
        .next()
        .ok_or(ParseError::Missing("type specifier".into()))?;
    match inner.as_rule() {
        Rule::ident => Ok(TypeSpecifier::Named {
            name: inner.as_str().to_string(),
            span,
        }),
        Rule::struct_specifier => {
            let mut name = None;
            let mut members = Vec::new();
            for part in inner.into_inner() {
                match part.as_rule() {
                    Rule::ident => name = Some(part.as_str().to_string()),
                    Rule::member_decl => {
                        let mspan = ctx.span(&part);
                        members.push(Spanned::new(parse_member_decl(ctx, part)?, mspan));
                    }
                    _ => {}
                }
            }
            Ok(TypeSpecifier::Struct {
                name,
                members,
                span,
            })
        }
        _ => ctx.unexpected("type specifier", &inner),
    }
}

fn parse_array_spec(ctx: &mut ParserContext, pair: Pair<Rule>) -> Result<ArrayDim, ParseError> {
    let span = ctx.span(&pair);
    let size = match pair.into_inner().next() {
        Some(expr) => Some(parse_expression(ctx, expr)?),
        None => None,
    };
    Ok(ArrayDim { size, span })
}

fn parse_qualifier(
    ctx: &mut ParserContext,
    pair: Pair<Rule>,
) -> Result<Spanned<Qualifier>, ParseError> {
    let span = ctx.span(&pair);
    let inner = pair
        .into_inner()
        .next()
        .ok_or(ParseError::Missing("qualifier".into()))?;
    let q = match inner.as_rule() {
        Rule::layout_qualifier => {
            let mut items = Vec::new();
            for item in inner.into_inner() {
                if item.as_rule() != Rule::layout_item {
                    continue;
                }
                let ispan = ctx.span(&item);
                let mut name = String::new();
                let mut value = None;
                for part in item.into_inner() {
                    match part.as_rule() {
                        Rule::ident if name.is_empty() => name = part.as_str().to_string(),
                        Rule::ident => value = Some(LayoutValue::Ident(part.as_str().to_string())),
                        Rule::int_lit => {
                            let (v, _) = parse_int_text(part.as_str());
                            value = Some(LayoutValue::Int(v));
                        }
                        _ => {}
                    }
                }
                items.push(LayoutItem {
                    name,
                    value,
                    span: ispan,
                });
            }
            Qualifier::Layout(items)
        }
        Rule::storage_qualifier => Qualifier::Storage(match inner.as_str() {
            "const" => StorageQualifier::Const,
            "in" => StorageQualifier::In,
            "out" => StorageQualifier::Out,
            "inout" => StorageQualifier::InOut,
            "uniform" => StorageQualifier::Uniform,
            "buffer" => StorageQualifier::Buffer,
            "shared" => StorageQualifier::Shared,
            "attribute" => StorageQualifier::Attribute,
            _ => StorageQualifier::Varying,
        }),
        Rule::interp_qualifier => Qualifier::Interpolation(match inner.as_str() {
            "flat" => InterpQualifier::Flat,
            "noperspective" => InterpQualifier::NoPerspective,
            _ => InterpQualifier::Smooth,
        }),
        Rule::precision_qualifier => Qualifier::Precision(inner.as_str().to_string()),
        Rule::memory_qualifier => Qualifier::Memory(inner.as_str().to_string()),
        Rule::aux_qualifier => Qualifier::Auxiliary(inner.as_str().to_string()),
        _ => return ctx.unexpected("qualifier", &inner),
    };
    Ok(Spanned::new(q, span))
}

fn parse_declarator(ctx: &mut ParserContext, pair: Pair<Rule>) -> Result<Declarator, ParseError> {
    let mut name = String::new();
    let mut name_span = Span::default();
    let mut arrays = Vec::new();
    let mut init = None;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::ident => {
                name = inner.as_str().to_string();
                name_span = ctx.span(&inner);
            }
            Rule::array_spec => arrays.push(parse_array_spec(ctx, inner)?),
            Rule::initializer => init = Some(parse_initializer(ctx, inner)?),
            _ => {}
        }
    }

    Ok(Declarator {
        name,
        name_span,
        arrays,
        init,
    })
}

fn parse_initializer(
    ctx: &mut ParserContext,
    pair: Pair<Rule>,
) -> Result<Spanned<Initializer>, ParseError> {
    let span = ctx.span(&pair);
    let inner = pair
        .into_inner()
        .next()
        .ok_or(ParseError::Missing("initializer".into()))?;
    let init = match inner.as_rule() {
        Rule::init_list => {
            let mut items = Vec::new();
            for item in inner.into_inner() {
                items.push(parse_initializer(ctx, item)?);
            }
            Initializer::List(items)
        }
        Rule::assignment => Initializer::Expr(parse_assignment(ctx, inner)?),
        _ => return ctx.unexpected("initializer", &inner),
    };
    Ok(Spanned::new(init, span))
}

// ---- statements -----------------------------------------------------------

fn parse_compound(
    ctx: &mut ParserContext,
    pair: Pair<Rule>,
) -> Result<Vec<Spanned<Stmt>>, ParseError> {
    let mut stmts = Vec::new();
    for inner in pair.into_inner() {
        if inner.as_rule() == Rule::statement {
            stmts.push(parse_statement(ctx, inner)?);
        }
    }
    Ok(stmts)
}

fn parse_statement(ctx: &mut ParserContext, pair: Pair<Rule>) -> Result<Spanned<Stmt>, ParseError> {
    let span = ctx.span(&pair);
    let inner = pair
        .into_inner()
        .next()
        .ok_or(ParseError::Missing("statement".into()))?;

    let stmt = match inner.as_rule() {
        Rule::compound_stmt => Stmt::Compound(parse_compound(ctx, inner)?),
        Rule::decl_stmt => Stmt::Decl(parse_global_decl(ctx, inner)?),
        Rule::expr_stmt => {
            let expr = inner
                .into_inner()
                .next()
                .ok_or(ParseError::Missing("expression".into()))?;
            Stmt::Expr(parse_expression(ctx, expr)?)
        }
        Rule::empty_stmt => Stmt::Empty,
        Rule::selection_stmt => {
            let mut cond = None;
            let mut then_branch = None;
            let mut else_branch = None;
            for part in inner.into_inner() {
                match part.as_rule() {
                    Rule::expression => cond = Some(parse_expression(ctx, part)?),
                    Rule::statement if then_branch.is_none() => {
                        then_branch = Some(parse_statement(ctx, part)?)
                    }
                    Rule::statement => else_branch = Some(parse_statement(ctx, part)?),
                    _ => {}
                }
            }
            Stmt::If {
                cond: cond.ok_or(ParseError::Missing("if condition".into()))?,
                then_branch: Box::new(
                    then_branch.ok_or(ParseError::Missing("if body".into()))?,
                ),
                else_branch: else_branch.map(Box::new),
            }
        }
        Rule::for_stmt => {
            let mut init = None;
            let mut cond = None;
            let mut step = None;
            let mut body = None;
            for part in inner.into_inner() {
                match part.as_rule() {
                    Rule::for_init => {
                        let init_span = ctx.span(&part);
                        let init_inner = part
                            .into_inner()
                            .next()
                            .ok_or(ParseError::Missing("for initializer".into()))?;
                        let stmt = match init_inner.as_rule() {
                            Rule::decl_stmt => Stmt::Decl(parse_global_decl(ctx, init_inner)?),
                            Rule::expr_stmt => {
                                let expr = init_inner
                                    .into_inner()
                                    .next()
                                    .ok_or(ParseError::Missing("expression".into()))?;
                                Stmt::Expr(parse_expression(ctx, expr)?)
                            }
                            _ => Stmt::Empty,
                        };
                        if !matches!(stmt, Stmt::Empty) {
                            init = Some(Box::new(Spanned::new(stmt, init_span)));
                        }
                    }
                    Rule::for_cond => {
                        let expr = part
                            .into_inner()
                            .next()
                            .ok_or(ParseError::Missing("loop condition".into()))?;
                        cond = Some(parse_expression(ctx, expr)?);
                    }
                    Rule::for_step => {
                        let expr = part
                            .into_inner()
                            .next()
                            .ok_or(ParseError::Missing("loop step".into()))?;
                        step = Some(parse_expression(ctx, expr)?);
                    }
                    Rule::statement => body = Some(parse_statement(ctx, part)?),
                    _ => {}
                }
            }
            Stmt::For {
                init,
                cond,
                step,
                body: Box::new(body.ok_or(ParseError::Missing("loop body".into()))?),
            }
        }
        Rule::while_stmt => {
            let mut cond = None;
            let mut body = None;
            for part in inner.into_inner() {
                match part.as_rule() {
                    Rule::expression => cond = Some(parse_expression(ctx, part)?),
                    Rule::statement => body = Some(parse_statement(ctx, part)?),
                    _ => {}
                }
            }
            Stmt::While {
                cond: cond.ok_or(ParseError::Missing("loop condition".into()))?,
                body: Box::new(body.ok_or(ParseError::Missing("loop body".into()))?),
            }
        }
        Rule::do_stmt => {
            let mut cond = None;
            let mut body = None;
            for part in inner.into_inner() {
                match part.as_rule() {
                    Rule::statement => body = Some(parse_statement(ctx, part)?),
                    Rule::expression => cond = Some(parse_expression(ctx, part)?),
                    _ => {}
                }
            }
            Stmt::DoWhile {
                body: Box::new(body.ok_or(ParseError::Missing("loop body".into()))?),
                cond: cond.ok_or(ParseError::Missing("loop condition".into()))?,
            }
        }
        Rule::switch_stmt => parse_switch(ctx, inner)?,
        Rule::jump_stmt => {
            let mut parts = inner.into_inner();
            let kw = parts.next().ok_or(ParseError::Missing("jump".into()))?;
            match kw.as_rule() {
                Rule::kw_return => {
                    let value = match parts.next() {
                        Some(expr) => Some(parse_expression(ctx, expr)?),
                        None => None,
                    };
                    Stmt::Return(value)
                }
                Rule::kw_break => Stmt::Break,
                Rule::kw_continue => Stmt::Continue,
                Rule::kw_discard => Stmt::Discard,
                _ => return ctx.unexpected("jump statement", &kw),
            }
        }
        _ => return ctx.unexpected("statement", &inner),
    };

    Ok(Spanned::new(stmt, span))
}

/// Group the flat label/statement sequence of a switch body into cases.
fn parse_switch(ctx: &mut ParserContext, pair: Pair<Rule>) -> Result<Stmt, ParseError> {
    let mut scrutinee = None;
    let mut cases: Vec<SwitchCase> = Vec::new();

    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::expression => scrutinee = Some(parse_expression(ctx, part)?),
            Rule::case_label => {
                let span = ctx.span(&part);
                let mut label = CaseLabel::Default(span);
                for p in part.into_inner() {
                    if p.as_rule() == Rule::expression {
                        label = CaseLabel::Case(parse_expression(ctx, p)?);
                    }
                }
                // Consecutive labels share one case body.
                match cases.last_mut() {
                    Some(case) if case.body.is_empty() => case.labels.push(label),
                    _ => cases.push(SwitchCase {
                        labels: vec![label],
                        body: Vec::new(),
                    }),
                }
            }
            Rule::statement => {
                let stmt = parse_statement(ctx, part)?;
                match cases.last_mut() {
                    Some(case) => case.body.push(stmt),
                    None => {
                        return Err(ParseError::Syntax {
                            message: "statement before the first case label".to_string(),
                            line: 0,
                            column: 0,
                            span: Some(stmt.span),
                        })
                    }
                }
            }
            _ => {}
        }
    }

    Ok(Stmt::Switch {
        scrutinee: scrutinee.ok_or(ParseError::Missing("switch expression".into()))?,
        cases,
    })
}

// ---- expressions ----------------------------------------------------------

fn parse_expression(
    ctx: &mut ParserContext,
    pair: Pair<Rule>,
) -> Result<Spanned<Expr>, ParseError> {
    let inner = pair
        .into_inner()
        .next()
        .ok_or(ParseError::Missing("expression".into()))?;
    parse_assignment(ctx, inner)
}

fn parse_assignment(
    ctx: &mut ParserContext,
    pair: Pair<Rule>,
) -> Result<Spanned<Expr>, ParseError> {
    let span = ctx.span(&pair);
    let mut parts = pair.into_inner();
    let lhs_pair = parts
        .next()
        .ok_or(ParseError::Missing("expression".into()))?;
    let lhs = parse_conditional(ctx, lhs_pair)?;

    let Some(op_pair) = parts.next() else {
        return Ok(lhs);
    };
    let op = match op_pair.as_str() {
        "=" => AssignOp::Assign,
        "+=" => AssignOp::Add,
        "-=" => AssignOp::Sub,
        "*=" => AssignOp::Mul,
        "/=" => AssignOp::Div,
        "%=" => AssignOp::Mod,
        "<<=" => AssignOp::Shl,
        ">>=" => AssignOp::Shr,
        "&=" => AssignOp::And,
        "^=" => AssignOp::Xor,
        _ => AssignOp::Or,
    };
    let rhs_pair = parts
        .next()
        .ok_or(ParseError::Missing("assignment value".into()))?;
    let rhs = parse_assignment(ctx, rhs_pair)?;

    Ok(Spanned::new(
        Expr::Assign {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        span,
    ))
}

fn parse_conditional(
    ctx: &mut ParserContext,
    pair: Pair<Rule>,
) -> Result<Spanned<Expr>, ParseError> {
    let span = ctx.span(&pair);
    let mut parts = pair.into_inner();
    let cond_pair = parts
        .next()
        .ok_or(ParseError::Missing("expression".into()))?;
    let cond = parse_binary(ctx, cond_pair)?;

    let Some(then_pair) = parts.next() else {
        return Ok(cond);
    };
    let then_expr = parse_expression(ctx, then_pair)?;
    let else_pair = parts
        .next()
        .ok_or(ParseError::Missing("ternary alternative".into()))?;
    let else_expr = parse_assignment(ctx, else_pair)?;

    Ok(Spanned::new(
        Expr::Ternary {
            cond: Box::new(cond),
            then_expr: Box::new(then_expr),
            else_expr: Box::new(else_expr),
        },
        span,
    ))
}

fn parse_binary(ctx: &mut ParserContext, pair: Pair<Rule>) -> Result<Spanned<Expr>, ParseError> {
    // PrattParser cannot thread `ctx` mutably through both closures, so
    // spans are rebuilt from the pest pairs directly.
    let source_id = ctx.source_id;
    PRATT_PARSER
        .map_primary(|primary| {
            let mut ctx = ParserContext::new(source_id);
            parse_unary(&mut ctx, primary)
        })
        .map_infix(|lhs, op, rhs| {
            let lhs = lhs?;
            let rhs = rhs?;
            let binop = match op.as_rule() {
                Rule::add => BinaryOp::Add,
                Rule::sub => BinaryOp::Sub,
                Rule::mul => BinaryOp::Mul,
                Rule::div => BinaryOp::Div,
                Rule::modulo => BinaryOp::Mod,
                Rule::shl => BinaryOp::Shl,
                Rule::shr => BinaryOp::Shr,
                Rule::lt => BinaryOp::Lt,
                Rule::gt => BinaryOp::Gt,
                Rule::lte => BinaryOp::Le,
                Rule::gte => BinaryOp::Ge,
                Rule::eq => BinaryOp::Eq,
                Rule::neq => BinaryOp::Ne,
                Rule::bit_and => BinaryOp::BitAnd,
                Rule::bit_xor => BinaryOp::BitXor,
                Rule::bit_or => BinaryOp::BitOr,
                Rule::log_and => BinaryOp::LogicalAnd,
                Rule::log_xor => BinaryOp::LogicalXor,
                _ => BinaryOp::LogicalOr,
            };
            let span = lhs.span.merge(rhs.span);
            Ok(Spanned::new(
                Expr::Binary {
                    op: binop,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            ))
        })
        .parse(pair.into_inner())
}

fn parse_unary(ctx: &mut ParserContext, pair: Pair<Rule>) -> Result<Spanned<Expr>, ParseError> {
    let span = ctx.span(&pair);
    let mut prefixes = Vec::new();
    let mut operand = None;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::pre_inc => prefixes.push(UnaryOp::PreInc),
            Rule::pre_dec => prefixes.push(UnaryOp::PreDec),
            Rule::pos => prefixes.push(UnaryOp::Plus),
            Rule::neg => prefixes.push(UnaryOp::Neg),
            Rule::bang => prefixes.push(UnaryOp::Not),
            Rule::tilde => prefixes.push(UnaryOp::BitNot),
            Rule::postfix_expr => operand = Some(parse_postfix_expr(ctx, inner)?),
            _ => return ctx.unexpected("unary expression", &inner),
        }
    }

    let mut expr = operand.ok_or(ParseError::Missing("operand".into()))?;
    // Innermost prefix binds tightest.
    for op in prefixes.into_iter().rev() {
        expr = Spanned::new(
            Expr::Unary {
                op,
                operand: Box::new(expr),
            },
            span,
        );
    }
    Ok(expr)
}

fn parse_postfix_expr(
    ctx: &mut ParserContext,
    pair: Pair<Rule>,
) -> Result<Spanned<Expr>, ParseError> {
    let span = ctx.span(&pair);
    let mut parts = pair.into_inner();
    let primary = parts.next().ok_or(ParseError::Missing("expression".into()))?;
    let mut expr = parse_primary(ctx, primary)?;

    for suffix in parts {
        let sspan = ctx.span(&suffix);
        expr = match suffix.as_rule() {
            Rule::call_suffix => {
                let mut args = Vec::new();
                for arg in suffix.into_inner() {
                    args.push(parse_assignment(ctx, arg)?);
                }
                Spanned::new(
                    Expr::Call {
                        callee: Box::new(expr),
                        args,
                    },
                    span.merge(sspan),
                )
            }
            Rule::index_suffix => {
                let index = suffix
                    .into_inner()
                    .next()
                    .ok_or(ParseError::Missing("index".into()))?;
                Spanned::new(
                    Expr::Index {
                        base: Box::new(expr),
                        index: Box::new(parse_expression(ctx, index)?),
                    },
                    span.merge(sspan),
                )
            }
            Rule::member_suffix => {
                let field = suffix
                    .into_inner()
                    .next()
                    .ok_or(ParseError::Missing("field name".into()))?;
                let field_span = ctx.span(&field);
                Spanned::new(
                    Expr::Member {
                        base: Box::new(expr),
                        field: field.as_str().to_string(),
                        field_span,
                    },
                    span.merge(sspan),
                )
            }
            Rule::post_inc => Spanned::new(
                Expr::Unary {
                    op: UnaryOp::PostInc,
                    operand: Box::new(expr),
                },
                span.merge(sspan),
            ),
            Rule::post_dec => Spanned::new(
                Expr::Unary {
                    op: UnaryOp::PostDec,
                    operand: Box::new(expr),
                },
                span.merge(sspan),
            ),
            _ => return ctx.unexpected("postfix suffix", &suffix),
        };
    }
    Ok(expr)
}

fn parse_primary(ctx: &mut ParserContext, pair: Pair<Rule>) -> Result<Spanned<Expr>, ParseError> {
    let span = ctx.span(&pair);
    let inner = pair
        .into_inner()
        .next()
        .ok_or(ParseError::Missing("expression".into()))?;

    let expr = match inner.as_rule() {
        Rule::float_lit => {
            let text = inner.as_str();
            let double = text.ends_with("lf") || text.ends_with("LF");
            let digits = text
                .trim_end_matches(['f', 'F'])
                .trim_end_matches(['l', 'L']);
            let value: f64 = digits.parse().map_err(|_| ParseError::Syntax {
                message: format!("invalid float literal `{}`", text),
                line: 0,
                column: 0,
                span: Some(span),
            })?;
            Expr::FloatLit { value, double }
        }
        Rule::int_lit => {
            let (value, unsigned) = parse_int_text(inner.as_str());
            Expr::IntLit { value, unsigned }
        }
        Rule::bool_lit => Expr::BoolLit(inner.as_str() == "true"),
        Rule::paren_expr => {
            let e = inner
                .into_inner()
                .next()
                .ok_or(ParseError::Missing("expression".into()))?;
            return parse_expression(ctx, e);
        }
        Rule::array_ctor => {
            let mut type_name = String::new();
            let mut dims = Vec::new();
            let mut args = Vec::new();
            for part in inner.into_inner() {
                match part.as_rule() {
                    Rule::ident => type_name = part.as_str().to_string(),
                    Rule::array_spec => dims.push(parse_array_spec(ctx, part)?),
                    Rule::call_suffix => {
                        for arg in part.into_inner() {
                            args.push(parse_assignment(ctx, arg)?);
                        }
                    }
                    _ => {}
                }
            }
            Expr::ArrayCtor {
                type_name,
                dims,
                args,
            }
        }
        Rule::ident => Expr::Ident(inner.as_str().to_string()),
        _ => return ctx.unexpected("primary expression", &inner),
    };
    Ok(Spanned::new(expr, span))
}

/// Parse an integer literal's text. Suffix handling matches the grammar.
fn parse_int_text(text: &str) -> (u64, bool) {
    let unsigned = text.ends_with(['u', 'U']);
    let t = text.trim_end_matches(['u', 'U']);
    let value = if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).unwrap_or(0)
    } else if t.len() > 1 && t.starts_with('0') {
        u64::from_str_radix(&t[1..], 8).unwrap_or(0)
    } else {
        t.parse().unwrap_or(0)
    };
    (value, unsigned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> TranslationUnit {
        parse(src, SourceId(0)).unwrap()
    }

    fn first_fn(unit: &TranslationUnit) -> &FunctionDecl {
        for decl in &unit.decls {
            if let Decl::Function(f) = &decl.node {
                return f;
            }
        }
        panic!("no function in unit");
    }

    #[test]
    fn test_minimal_shader() {
        let unit = parse_ok("void main() {}\n");
        assert_eq!(unit.decls.len(), 1);
        let f = first_fn(&unit);
        assert_eq!(f.name, "main");
        assert!(f.params.is_empty());
        assert_eq!(f.body.as_deref(), Some(&[][..]));
    }

    #[test]
    fn test_global_with_layout() {
        let unit = parse_ok("layout(location = 0) in vec3 position;\n");
        let Decl::Global(g) = &unit.decls[0].node else {
            panic!("expected global");
        };
        assert_eq!(g.declarators[0].name, "position");
        assert!(matches!(
            g.ty.qualifiers[0].node,
            Qualifier::Layout(ref items) if items[0].name == "location"
        ));
        assert!(g
            .ty
            .qualifiers
            .iter()
            .any(|q| matches!(q.node, Qualifier::Storage(StorageQualifier::In))));
    }

    #[test]
    fn test_uniform_block() {
        let unit = parse_ok(
            "layout(set = 0, binding = 1) uniform Camera { mat4 view; mat4 proj; } cam;\n",
        );
        let Decl::Block(b) = &unit.decls[0].node else {
            panic!("expected block");
        };
        assert_eq!(b.type_name, "Camera");
        assert_eq!(b.members.len(), 2);
        assert_eq!(b.instance.as_ref().map(|(n, _, _)| n.as_str()), Some("cam"));
    }

    #[test]
    fn test_anonymous_block() {
        let unit = parse_ok("layout(binding = 0) uniform Globals { float time; };\n");
        let Decl::Block(b) = &unit.decls[0].node else {
            panic!("expected block");
        };
        assert!(b.instance.is_none());
    }

    #[test]
    fn test_operator_precedence() {
        let unit = parse_ok("int x = 1 + 2 * 3;\n");
        let Decl::Global(g) = &unit.decls[0].node else {
            panic!("expected global");
        };
        let Some(init) = &g.declarators[0].init else {
            panic!("expected init");
        };
        let Initializer::Expr(e) = &init.node else {
            panic!("expected expr");
        };
        let Expr::Binary { op, rhs, .. } = &e.node else {
            panic!("expected binary, got {:?}", e.node);
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(
            rhs.node,
            Expr::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn test_short_circuit_and_ternary() {
        let unit = parse_ok("bool b = a > 0 && a < 10 ? true : false;\n");
        let Decl::Global(g) = &unit.decls[0].node else {
            panic!("expected global");
        };
        let Some(init) = &g.declarators[0].init else {
            panic!("expected init");
        };
        let Initializer::Expr(e) = &init.node else {
            panic!("expected expr");
        };
        assert!(matches!(e.node, Expr::Ternary { .. }));
    }

    #[test]
    fn test_swizzle_and_index() {
        let unit = parse_ok("void main() { v.xyz = m[2].rgb; }\n");
        let f = first_fn(&unit);
        let body = f.body.as_ref().unwrap();
        let Stmt::Expr(e) = &body[0].node else {
            panic!("expected expr stmt");
        };
        let Expr::Assign { lhs, rhs, .. } = &e.node else {
            panic!("expected assignment");
        };
        assert!(matches!(lhs.node, Expr::Member { ref field, .. } if field == "xyz"));
        let Expr::Member { base, field, .. } = &rhs.node else {
            panic!("expected member");
        };
        assert_eq!(field, "rgb");
        assert!(matches!(base.node, Expr::Index { .. }));
    }

    #[test]
    fn test_constructor_call() {
        let unit = parse_ok("vec4 c = vec4(pos, 1.0);\n");
        let Decl::Global(g) = &unit.decls[0].node else {
            panic!("expected global");
        };
        let Some(init) = &g.declarators[0].init else {
            panic!("expected init");
        };
        let Initializer::Expr(e) = &init.node else {
            panic!("expected expr");
        };
        let Expr::Call { callee, args } = &e.node else {
            panic!("expected call");
        };
        assert!(matches!(callee.node, Expr::Ident(ref n) if n == "vec4"));
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn test_control_flow() {
        let src = r#"
void main() {
    for (int i = 0; i < 4; ++i) {
        if (i == 2) continue;
        total += float(i);
    }
    while (total > 10.0) { total -= 1.0; }
    do { total += 0.5; } while (total < 1.0);
}
"#;
        let unit = parse_ok(src);
        let f = first_fn(&unit);
        let body = f.body.as_ref().unwrap();
        assert!(matches!(body[0].node, Stmt::For { .. }));
        assert!(matches!(body[1].node, Stmt::While { .. }));
        assert!(matches!(body[2].node, Stmt::DoWhile { .. }));
    }

    #[test]
    fn test_for_without_cond_keeps_step() {
        let unit = parse_ok("void main() { for (;; i++) { break; } }\n");
        let f = first_fn(&unit);
        let body = f.body.as_ref().unwrap();
        let Stmt::For {
            init, cond, step, ..
        } = &body[0].node
        else {
            panic!("expected for");
        };
        assert!(init.is_none());
        assert!(cond.is_none());
        assert!(step.is_some());
    }

    #[test]
    fn test_switch_grouping() {
        let src = r#"
void main() {
    switch (mode) {
        case 0:
        case 1: x = 1.0; break;
        default: x = 0.0; break;
    }
}
"#;
        let unit = parse_ok(src);
        let f = first_fn(&unit);
        let body = f.body.as_ref().unwrap();
        let Stmt::Switch { cases, .. } = &body[0].node else {
            panic!("expected switch");
        };
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].labels.len(), 2);
        assert!(matches!(cases[1].labels[0], CaseLabel::Default(_)));
    }

    #[test]
    fn test_struct_definition() {
        let unit = parse_ok("struct Light { vec3 pos; float intensity; };\n");
        let Decl::Global(g) = &unit.decls[0].node else {
            panic!("expected global");
        };
        assert!(g.declarators.is_empty());
        let TypeSpecifier::Struct { name, members, .. } = &g.ty.spec else {
            panic!("expected struct");
        };
        assert_eq!(name.as_deref(), Some("Light"));
        assert_eq!(members.len(), 2);
    }

    #[test]
    fn test_compute_layout_decl() {
        let unit = parse_ok("layout(local_size_x = 8, local_size_y = 8) in;\n");
        let Decl::QualifierOnly { qualifiers } = &unit.decls[0].node else {
            panic!("expected qualifier declaration");
        };
        assert_eq!(qualifiers.len(), 2);
    }

    #[test]
    fn test_function_with_params() {
        let unit = parse_ok("float add(float a, in float b) { return a + b; }\n");
        let f = first_fn(&unit);
        assert_eq!(f.params.len(), 2);
        assert_eq!(f.params[1].name.as_deref(), Some("b"));
    }

    #[test]
    fn test_void_param_list_is_empty() {
        let unit = parse_ok("void main(void) {}\n");
        assert!(first_fn(&unit).params.is_empty());
    }

    #[test]
    fn test_prototype() {
        let unit = parse_ok("float helper(float x);\nvoid main() {}\n");
        let Decl::Function(f) = &unit.decls[0].node else {
            panic!("expected function");
        };
        assert!(f.body.is_none());
    }

    #[test]
    fn test_array_declarations() {
        let unit = parse_ok("float weights[4];\n");
        let Decl::Global(g) = &unit.decls[0].node else {
            panic!("expected global");
        };
        assert_eq!(g.declarators[0].arrays.len(), 1);
        assert!(g.declarators[0].arrays[0].size.is_some());
    }

    #[test]
    fn test_array_constructor() {
        let unit = parse_ok("float w[2] = float[2](0.25, 0.75);\n");
        let Decl::Global(g) = &unit.decls[0].node else {
            panic!("expected global");
        };
        let Some(init) = &g.declarators[0].init else {
            panic!("expected init");
        };
        let Initializer::Expr(e) = &init.node else {
            panic!("expected expr");
        };
        assert!(matches!(e.node, Expr::ArrayCtor { ref args, .. } if args.len() == 2));
    }

    #[test]
    fn test_unsigned_and_hex_literals() {
        let unit = parse_ok("uint mask = 0xFFu;\n");
        let Decl::Global(g) = &unit.decls[0].node else {
            panic!("expected global");
        };
        let Some(init) = &g.declarators[0].init else {
            panic!("expected init");
        };
        let Initializer::Expr(e) = &init.node else {
            panic!("expected expr");
        };
        assert!(matches!(
            e.node,
            Expr::IntLit {
                value: 255,
                unsigned: true
            }
        ));
    }

    #[test]
    fn test_syntax_error_has_location() {
        let err = parse("void main() { int = ; }\n", SourceId(0)).unwrap_err();
        match err {
            ParseError::Syntax { line, .. } => assert_eq!(line, 1),
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn test_precision_decl_parsed() {
        let unit = parse_ok("precision highp float;\nvoid main() {}\n");
        assert!(matches!(unit.decls[0].node, Decl::Precision { .. }));
    }
}
