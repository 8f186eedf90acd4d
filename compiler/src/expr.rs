// expr.rs - Submission-time expressions and channel intrinsics
//
// Import filters, subscriptions, exported stream properties and placement
// ids may reference `getChannel()` and `getMaxChannels()`. Two entry points
// resolve them for a concrete channel:
//
//   substitute: plain textual replacement of the intrinsic calls.
//   evaluate:   parse as an or-expression, replace intrinsics with int64
//               literals, fold arithmetic and casts over literal operands,
//               and print the result back to text.
//
// Preconditions: none.
// Postconditions: `evaluate` output re-parses to an equivalent expression.
// Failure modes: lex/parse failures, type mismatches and division by zero
//   produce `TransformError::Expression`.
// Side effects: none.

use std::fmt;

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::diag::{Result, TransformError};
use crate::expr_lexer::{lex, Token};

const GET_CHANNEL: &str = "getChannel()";
const GET_MAX_CHANNELS: &str = "getMaxChannels()";

// ── AST ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intrinsic {
    GetChannel,
    GetMaxChannels,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastType {
    Int64,
    Float64,
    RString,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Or,
    And,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    In,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Intrinsic(Intrinsic),
    Symbol {
        name: String,
        subscript: Option<i64>,
    },
    Paren(Box<Expr>),
    Cast {
        ty: CastType,
        expr: Box<Expr>,
    },
    Binary {
        lhs: Box<Expr>,
        op: BinOp,
        rhs: Box<Expr>,
    },
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(v) => write!(f, "{}", v),
            Literal::Float(v) => write!(f, "{:?}", v),
            Literal::Str(s) => {
                f.write_str("\"")?;
                for c in s.chars() {
                    match c {
                        '"' => f.write_str("\\\"")?,
                        '\\' => f.write_str("\\\\")?,
                        '\n' => f.write_str("\\n")?,
                        '\t' => f.write_str("\\t")?,
                        '\r' => f.write_str("\\r")?,
                        '\0' => f.write_str("\\0")?,
                        c => write!(f, "{}", c)?,
                    }
                }
                f.write_str("\"")
            }
        }
    }
}

impl fmt::Display for CastType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CastType::Int64 => write!(f, "int64"),
            CastType::Float64 => write!(f, "float64"),
            CastType::RString => write!(f, "rstring"),
        }
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Or => "||",
            BinOp::And => "&&",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::In => "in",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
        };
        f.write_str(s)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(lit) => write!(f, "{}", lit),
            Expr::Intrinsic(Intrinsic::GetChannel) => f.write_str(GET_CHANNEL),
            Expr::Intrinsic(Intrinsic::GetMaxChannels) => f.write_str(GET_MAX_CHANNELS),
            Expr::Symbol { name, subscript } => match subscript {
                Some(i) => write!(f, "{}[{}]", name, i),
                None => f.write_str(name),
            },
            Expr::Paren(inner) => write!(f, "({})", inner),
            Expr::Cast { ty, expr } => write!(f, "({}){}", ty, expr),
            Expr::Binary { lhs, op, rhs } => write!(f, "{} {} {}", lhs, op, rhs),
        }
    }
}

// ── Parser ───────────────────────────────────────────────────────────────

fn binary(lhs: Expr, (op, rhs): (BinOp, Expr)) -> Expr {
    Expr::Binary {
        lhs: Box::new(lhs),
        op,
        rhs: Box::new(rhs),
    }
}

fn expr_parser<'tokens, I>(
) -> impl Parser<'tokens, I, Expr, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    recursive(|or_expr| {
        let number = select! {
            Token::Int(v) => Literal::Int(v),
            Token::Float(v) => Literal::Float(v),
        };
        let signed = just(Token::Minus)
            .or_not()
            .then(number)
            .map(|(neg, lit)| match (neg, lit) {
                (Some(_), Literal::Int(v)) => Literal::Int(v.wrapping_neg()),
                (Some(_), Literal::Float(v)) => Literal::Float(-v),
                (_, lit) => lit,
            });
        let string = select! { Token::Str(s) => Literal::Str(s) };
        let intrinsic = select! {
            Token::GetChannel => Intrinsic::GetChannel,
            Token::GetMaxChannels => Intrinsic::GetMaxChannels,
        };
        let value = intrinsic
            .map(Expr::Intrinsic)
            .or(signed.or(string).map(Expr::Literal));

        let subscript = select! { Token::Int(v) => v }
            .delimited_by(just(Token::LBracket), just(Token::RBracket));
        let symbol = select! { Token::Ident(name) => name }
            .then(subscript.or_not())
            .map(|(name, subscript)| Expr::Symbol { name, subscript });

        let group = or_expr
            .delimited_by(just(Token::LParen), just(Token::RParen))
            .map(|e| Expr::Paren(Box::new(e)));

        let primary = value.or(symbol).or(group);

        let cast_type = select! {
            Token::Int64 => CastType::Int64,
            Token::Float64 => CastType::Float64,
            Token::RString => CastType::RString,
        };
        let cast = recursive(|cast| {
            cast_type
                .delimited_by(just(Token::LParen), just(Token::RParen))
                .then(cast)
                .map(|(ty, e)| Expr::Cast {
                    ty,
                    expr: Box::new(e),
                })
                .or(primary.clone())
        });

        let mul_op = select! {
            Token::Star => BinOp::Mul,
            Token::Slash => BinOp::Div,
            Token::Percent => BinOp::Mod,
        };
        let mul = cast
            .clone()
            .foldl(mul_op.then(cast).repeated(), binary);

        let add_op = select! {
            Token::Plus => BinOp::Add,
            Token::Minus => BinOp::Sub,
        };
        let add = mul.clone().foldl(add_op.then(mul).repeated(), binary);

        let rel_op = select! {
            Token::Lt => BinOp::Lt,
            Token::LtEq => BinOp::Le,
            Token::Gt => BinOp::Gt,
            Token::GtEq => BinOp::Ge,
            Token::EqEq => BinOp::Eq,
            Token::NotEq => BinOp::Ne,
            Token::In => BinOp::In,
        };
        let predicate = add
            .clone()
            .then(rel_op.then(add).or_not())
            .map(|(lhs, rhs)| match rhs {
                Some(rhs) => binary(lhs, rhs),
                None => lhs,
            });

        let and = predicate
            .clone()
            .foldl(just(Token::AndAnd).to(BinOp::And).then(predicate).repeated(), binary);

        and.clone()
            .foldl(just(Token::OrOr).to(BinOp::Or).then(and).repeated(), binary)
    })
}

fn expression_error(text: &str, message: impl Into<String>) -> TransformError {
    TransformError::Expression {
        text: text.to_string(),
        message: message.into(),
    }
}

/// Parse expression text. Blank text parses to `None`.
pub fn parse(text: &str) -> Result<Option<Expr>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let lex_result = lex(trimmed);
    if let Some(err) = lex_result.errors.first() {
        return Err(expression_error(text, err.message.clone()));
    }

    let len = trimmed.len();
    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let (expr, errors) = expr_parser()
        .then_ignore(end())
        .parse(stream)
        .into_output_errors();
    if let Some(err) = errors.first() {
        return Err(expression_error(text, err.to_string()));
    }
    match expr {
        Some(e) => Ok(Some(e)),
        None => Err(expression_error(text, "parse failure")),
    }
}

// ── Folding ──────────────────────────────────────────────────────────────

fn type_name(lit: &Literal) -> &'static str {
    match lit {
        Literal::Int(_) => "int64",
        Literal::Float(_) => "float64",
        Literal::Str(_) => "rstring",
    }
}

fn fold_arith(lhs: Literal, op: BinOp, rhs: Literal) -> std::result::Result<Literal, String> {
    match (lhs, rhs) {
        (Literal::Int(l), Literal::Int(r)) => {
            if r == 0 && matches!(op, BinOp::Div | BinOp::Mod) {
                return Err("divide by zero".to_string());
            }
            let v = match op {
                BinOp::Add => l.wrapping_add(r),
                BinOp::Sub => l.wrapping_sub(r),
                BinOp::Mul => l.wrapping_mul(r),
                BinOp::Div => l.wrapping_div(r),
                BinOp::Mod => l.wrapping_rem(r),
                other => return Err(format!("'{}' is not an arithmetic operator", other)),
            };
            Ok(Literal::Int(v))
        }
        (Literal::Float(l), Literal::Float(r)) => {
            let v = match op {
                BinOp::Add => l + r,
                BinOp::Sub => l - r,
                BinOp::Mul => l * r,
                BinOp::Div => l / r,
                other => return Err(format!("'{}' is not valid on float64", other)),
            };
            Ok(Literal::Float(v))
        }
        (Literal::Str(l), Literal::Str(r)) => match op {
            BinOp::Add => Ok(Literal::Str(l + &r)),
            other => Err(format!("'{}' is not valid on rstring", other)),
        },
        (l, r) => Err(format!(
            "type mismatch: {} {} {}",
            type_name(&l),
            op,
            type_name(&r)
        )),
    }
}

fn fold_cast(ty: CastType, lit: Literal) -> std::result::Result<Literal, String> {
    Ok(match (ty, lit) {
        (CastType::Int64, Literal::Int(v)) => Literal::Int(v),
        (CastType::Int64, Literal::Float(v)) => Literal::Int(v as i64),
        (CastType::Int64, Literal::Str(s)) => Literal::Int(
            s.trim()
                .parse()
                .map_err(|_| format!("cannot cast {:?} to int64", s))?,
        ),
        (CastType::Float64, Literal::Int(v)) => Literal::Float(v as f64),
        (CastType::Float64, Literal::Float(v)) => Literal::Float(v),
        (CastType::Float64, Literal::Str(s)) => Literal::Float(
            s.trim()
                .parse()
                .map_err(|_| format!("cannot cast {:?} to float64", s))?,
        ),
        (CastType::RString, Literal::Int(v)) => Literal::Str(v.to_string()),
        (CastType::RString, Literal::Float(v)) => Literal::Str(format!("{:?}", v)),
        (CastType::RString, Literal::Str(s)) => Literal::Str(s),
    })
}

fn is_arith(op: BinOp) -> bool {
    matches!(
        op,
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod
    )
}

/// Replace intrinsics with literals and fold every subtree whose operands
/// are all literal. Relational and logical operators are never folded.
pub fn fold(expr: Expr, max_channels: i64, channel: i64) -> std::result::Result<Expr, String> {
    match expr {
        Expr::Literal(_) | Expr::Symbol { .. } => Ok(expr),
        Expr::Intrinsic(Intrinsic::GetChannel) => Ok(Expr::Literal(Literal::Int(channel))),
        Expr::Intrinsic(Intrinsic::GetMaxChannels) => {
            Ok(Expr::Literal(Literal::Int(max_channels)))
        }
        Expr::Paren(inner) => match fold(*inner, max_channels, channel)? {
            Expr::Literal(lit) => Ok(Expr::Literal(lit)),
            other => Ok(Expr::Paren(Box::new(other))),
        },
        Expr::Cast { ty, expr } => match fold(*expr, max_channels, channel)? {
            Expr::Literal(lit) => Ok(Expr::Literal(fold_cast(ty, lit)?)),
            other => Ok(Expr::Cast {
                ty,
                expr: Box::new(other),
            }),
        },
        Expr::Binary { lhs, op, rhs } => {
            let lhs = fold(*lhs, max_channels, channel)?;
            let rhs = fold(*rhs, max_channels, channel)?;
            match (lhs, rhs) {
                (Expr::Literal(l), Expr::Literal(r)) if is_arith(op) => {
                    Ok(Expr::Literal(fold_arith(l, op, r)?))
                }
                (lhs, rhs) => Ok(Expr::Binary {
                    lhs: Box::new(lhs),
                    op,
                    rhs: Box::new(rhs),
                }),
            }
        }
    }
}

// ── Public API ───────────────────────────────────────────────────────────

/// Textually replace `getChannel()` and `getMaxChannels()` with decimal values.
pub fn substitute(text: &str, max_channels: i64, channel: i64) -> String {
    text.replace(GET_CHANNEL, &channel.to_string())
        .replace(GET_MAX_CHANNELS, &max_channels.to_string())
}

/// Parse `text`, resolve the intrinsics for `channel` of `max_channels`, fold
/// constants and print the result. Blank text evaluates to an empty string.
pub fn evaluate(text: &str, max_channels: i64, channel: i64) -> Result<String> {
    match parse(text)? {
        None => Ok(String::new()),
        Some(expr) => fold(expr, max_channels, channel)
            .map(|e| e.to_string())
            .map_err(|message| expression_error(text, message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_ok(text: &str, max: i64, ch: i64) -> String {
        evaluate(text, max, ch).unwrap_or_else(|e| panic!("evaluate({:?}) failed: {}", text, e))
    }

    #[test]
    fn substitution_is_textual() {
        assert_eq!(
            substitute("host_getChannel()_of_getMaxChannels()", 4, 2),
            "host_2_of_4"
        );
        assert_eq!(substitute("no intrinsics", 4, 2), "no intrinsics");
    }

    #[test]
    fn intrinsic_arithmetic_folds() {
        assert_eq!(eval_ok("getChannel() + 1", 4, 2), "3");
        assert_eq!(eval_ok("(getChannel() * 2) + getMaxChannels()", 4, 3), "10");
        assert_eq!(eval_ok("getMaxChannels() % 3", 4, 0), "1");
    }

    #[test]
    fn relational_subscriptions_keep_symbols() {
        assert_eq!(eval_ok("channel == getChannel()", 4, 2), "channel == 2");
        assert_eq!(
            eval_ok("kind == \"a\" && shard == getChannel() + 1", 4, 1),
            "kind == \"a\" && shard == 2"
        );
        assert_eq!(eval_ok("tags[1] in \"x\"", 1, 0), "tags[1] in \"x\"");
    }

    #[test]
    fn casts_fold_over_literals() {
        assert_eq!(eval_ok("\"ch\" + (rstring)getChannel()", 4, 2), "\"ch2\"");
        assert_eq!(eval_ok("(float64)getChannel() / 2.0", 4, 3), "1.5");
        assert_eq!(eval_ok("(int64)\"7\" + 1", 1, 0), "8");
    }

    #[test]
    fn unresolved_parens_are_kept() {
        assert_eq!(eval_ok("(a || b) && c", 1, 0), "(a || b) && c");
    }

    #[test]
    fn blank_is_empty() {
        assert_eq!(eval_ok("   ", 4, 2), "");
    }

    #[test]
    fn divide_by_zero_is_an_error() {
        let err = evaluate("1 / (getChannel() - 2)", 4, 2).unwrap_err();
        assert!(matches!(err, TransformError::Expression { .. }));
    }

    #[test]
    fn type_mismatch_is_an_error() {
        assert!(evaluate("\"a\" + getChannel()", 4, 2).is_err());
    }

    #[test]
    fn parse_failure_is_an_error() {
        assert!(evaluate("a == ", 4, 2).is_err());
        assert!(evaluate("a $ b", 4, 2).is_err());
    }

    #[test]
    fn negative_literals() {
        assert_eq!(eval_ok("getChannel() - -1", 4, 2), "3");
        assert_eq!(eval_ok("x > -1", 4, 2), "x > -1");
    }
}
