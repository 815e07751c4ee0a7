//! Go expression parser.
//!
//! Debugger input arrives as a single expression, never a statement, so an
//! assignment like `x = y` is a parse failure here: it is reported as a
//! dedicated error carrying the offset of the `=` token and the caller may
//! split the input and compile both sides separately.

use super::{BinaryOp, ChanDir, CompositeElt, Expr, Lit, LitKind, UnaryOp};
use nom::branch::alt;
use nom::character::complete::{anychar, char, multispace0, none_of, satisfy};
use nom::bytes::complete::{take_while, take_while1};
use nom::combinator::{eof, map, not, opt, peek, recognize, value, verify};
use nom::error::{context, ErrorKind, ParseError as NomParseError};
use nom::multi::{many0, many0_count, separated_list0, separated_list1};
use nom::sequence::{delimited, pair, preceded, terminated, tuple};
use nom::IResult;
use nom_supreme::error::ErrorTree;
use nom_supreme::final_parser::{final_parser, Location};
use nom_supreme::tag::complete::tag;

type PResult<'a, T> = IResult<&'a str, T, ErrorTree<&'a str>>;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ParseError {
    #[error("{0}")]
    Syntax(String),
    /// A top-level `=` where `==` was expected; `offset` is the byte offset
    /// of the `=` token in the original input.
    #[error("expected '==', found '='")]
    Assignment { offset: usize },
}

/// Parse a complete expression.
pub fn parse_expr(input: &str) -> Result<Expr, ParseError> {
    let complete = terminated(expr, preceded(multispace0, eof));
    match final_parser::<_, _, _, ErrorTree<Location>>(complete)(input) {
        Ok(e) => Ok(e),
        Err(tree) => {
            // An expression followed by a single `=` is an assignment, not a
            // malformed expression.
            if let Ok((rest, _)) = expr(input) {
                let tail = rest.trim_start();
                if tail.starts_with('=') && !tail.starts_with("==") {
                    return Err(ParseError::Assignment {
                        offset: input.len() - tail.len(),
                    });
                }
            }
            Err(ParseError::Syntax(tree.to_string()))
        }
    }
}

const KEYWORDS: &[&str] = &[
    "break",
    "case",
    "chan",
    "const",
    "continue",
    "default",
    "defer",
    "else",
    "fallthrough",
    "for",
    "func",
    "go",
    "goto",
    "if",
    "import",
    "interface",
    "map",
    "package",
    "range",
    "return",
    "select",
    "struct",
    "switch",
    "type",
    "var",
];

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// A lexical token preceded by optional whitespace.
fn tok<'a>(t: &'static str) -> impl FnMut(&'a str) -> PResult<'a, &'a str> {
    preceded(multispace0, tag(t))
}

/// A keyword: the tag must not be a prefix of a longer identifier.
fn keyword<'a>(t: &'static str) -> impl FnMut(&'a str) -> PResult<'a, &'a str> {
    preceded(
        multispace0,
        terminated(tag(t), peek(not(satisfy(is_ident_char)))),
    )
}

fn go_ident(i: &str) -> PResult<'_, &str> {
    preceded(
        multispace0,
        verify(
            recognize(pair(
                satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
                take_while(is_ident_char),
            )),
            |s: &str| !KEYWORDS.contains(&s),
        ),
    )(i)
}

// Literals /////////////////////////////////////////////////////////////////

fn number(i: &str) -> PResult<'_, Expr> {
    preceded(multispace0, alt((prefixed_int, decimal_number)))(i)
}

fn prefixed_int(i: &str) -> PResult<'_, Expr> {
    map(
        recognize(preceded(
            alt((
                tag("0x"),
                tag("0X"),
                tag("0b"),
                tag("0B"),
                tag("0o"),
                tag("0O"),
            )),
            take_while1(|c: char| c.is_ascii_hexdigit() || c == '_'),
        )),
        |raw: &str| Expr::Lit(Lit::int(raw)),
    )(i)
}

fn decimal_number(i: &str) -> PResult<'_, Expr> {
    let digits1 = |i| take_while1::<_, _, ErrorTree<&str>>(|c: char| c.is_ascii_digit() || c == '_')(i);
    let (rest, raw) = recognize(tuple((
        digits1,
        opt(preceded(char('.'), take_while(|c: char| c.is_ascii_digit() || c == '_'))),
        opt(tuple((
            nom::character::complete::one_of("eE"),
            opt(nom::character::complete::one_of("+-")),
            take_while1(|c: char| c.is_ascii_digit()),
        ))),
    )))(i)?;
    let kind = if raw.contains(['.', 'e', 'E']) {
        LitKind::Float
    } else {
        LitKind::Int
    };
    Ok((
        rest,
        Expr::Lit(Lit {
            kind,
            raw: raw.to_string(),
        }),
    ))
}

fn escaped_char(i: &str) -> PResult<'_, ()> {
    value((), preceded(char('\\'), anychar))(i)
}

fn string_lit(i: &str) -> PResult<'_, Expr> {
    let interpreted = recognize(delimited(
        char('"'),
        many0_count(alt((escaped_char, value((), none_of("\\\""))))),
        char('"'),
    ));
    let raw = recognize(delimited(char('`'), take_while(|c| c != '`'), char('`')));
    map(
        preceded(multispace0, alt((interpreted, raw))),
        |s: &str| {
            Expr::Lit(Lit {
                kind: LitKind::Str,
                raw: s.to_string(),
            })
        },
    )(i)
}

fn char_lit(i: &str) -> PResult<'_, Expr> {
    map(
        preceded(
            multispace0,
            recognize(delimited(
                char('\''),
                many0_count(alt((escaped_char, value((), none_of("\\'"))))),
                char('\''),
            )),
        ),
        |s: &str| {
            Expr::Lit(Lit {
                kind: LitKind::Char,
                raw: s.to_string(),
            })
        },
    )(i)
}

// Type expressions /////////////////////////////////////////////////////////

/// A type in type context (conversion head, assertion body, element type).
/// Unlike value context, a trailing `(...)` or `{...}` is not consumed.
fn type_expr(i: &str) -> PResult<'_, Expr> {
    preceded(
        multispace0,
        alt((
            map(preceded(tag("*"), type_expr), |t| Expr::Star(t.boxed())),
            recv_chan_type,
            array_type,
            map_type,
            chan_type,
            func_type,
            struct_type,
            interface_type,
            map(
                delimited(tok("("), type_expr, tok(")")),
                |t| Expr::Paren(t.boxed()),
            ),
            type_name,
        )),
    )(i)
}

/// `ident`, `pkg.Name`, optionally instantiated: `Name[T1, T2]`.
fn type_name(i: &str) -> PResult<'_, Expr> {
    let (i, id) = go_ident(i)?;
    let mut e = Expr::Ident(id.to_string());
    let mut i = i;
    if let Ok((rest, sel)) = preceded(tok("."), go_ident)(i) {
        e = Expr::Selector {
            x: e.boxed(),
            sel: sel.to_string(),
        };
        i = rest;
    }
    if let Ok((rest, args)) = delimited(
        tok("["),
        separated_list1(tok(","), type_expr),
        tok("]"),
    )(i)
    {
        e = index_node(e, args);
        i = rest;
    }
    Ok((i, e))
}

fn index_node(x: Expr, mut indices: Vec<Expr>) -> Expr {
    if indices.len() == 1 {
        Expr::Index {
            x: x.boxed(),
            index: indices.remove(0).boxed(),
        }
    } else {
        Expr::IndexList {
            x: x.boxed(),
            indices,
        }
    }
}

fn array_type(i: &str) -> PResult<'_, Expr> {
    let (i, _) = tok("[")(i)?;
    let (i, len) = opt(expr)(i)?;
    let (i, _) = tok("]")(i)?;
    let (i, elem) = type_expr(i)?;
    Ok((
        i,
        Expr::ArrayType {
            len: len.map(Expr::boxed),
            elem: elem.boxed(),
        },
    ))
}

fn map_type(i: &str) -> PResult<'_, Expr> {
    map(
        tuple((
            keyword("map"),
            tok("["),
            type_expr,
            tok("]"),
            type_expr,
        )),
        |(_, _, key, _, val)| Expr::MapType {
            key: key.boxed(),
            value: val.boxed(),
        },
    )(i)
}

fn chan_type(i: &str) -> PResult<'_, Expr> {
    let (i, _) = keyword("chan")(i)?;
    let (i, dir) = opt(tag("<-"))(i)?;
    let (i, elem) = type_expr(i)?;
    let dir = if dir.is_some() {
        ChanDir::Send
    } else {
        ChanDir::Both
    };
    Ok((
        i,
        Expr::ChanType {
            dir,
            elem: elem.boxed(),
        },
    ))
}

fn recv_chan_type(i: &str) -> PResult<'_, Expr> {
    map(
        preceded(pair(tok("<-"), keyword("chan")), type_expr),
        |elem| Expr::ChanType {
            dir: ChanDir::Recv,
            elem: elem.boxed(),
        },
    )(i)
}

fn func_type(i: &str) -> PResult<'_, Expr> {
    let (i, _) = keyword("func")(i)?;
    let (i, params) = delimited(
        tok("("),
        separated_list0(tok(","), type_expr),
        tok(")"),
    )(i)?;
    let (i, result) = opt(preceded(
        multispace0,
        alt((
            map(preceded(tag("*"), type_expr), |t| Expr::Star(t.boxed())),
            array_type,
            map_type,
            chan_type,
            interface_type,
            type_name,
        )),
    ))(i)?;
    Ok((
        i,
        Expr::FuncType {
            params,
            results: result.into_iter().collect(),
        },
    ))
}

fn struct_type(i: &str) -> PResult<'_, Expr> {
    let field = map(pair(go_ident, type_expr), |(name, typ)| {
        (name.to_string(), typ)
    });
    map(
        preceded(
            keyword("struct"),
            delimited(
                tok("{"),
                terminated(separated_list0(tok(";"), field), opt(tok(";"))),
                tok("}"),
            ),
        ),
        |fields| Expr::StructType { fields },
    )(i)
}

fn interface_type(i: &str) -> PResult<'_, Expr> {
    value(
        Expr::InterfaceType,
        tuple((keyword("interface"), tok("{"), tok("}"))),
    )(i)
}

// Operands and postfix operations //////////////////////////////////////////

fn operand(i: &str) -> PResult<'_, Expr> {
    preceded(
        multispace0,
        alt((
            map(delimited(tok("("), expr, context("closing parenthesis", tok(")"))), |e| {
                Expr::Paren(e.boxed())
            }),
            number,
            string_lit,
            char_lit,
            recv_chan_type,
            array_type,
            map_type,
            chan_type,
            func_type,
            struct_type,
            interface_type,
            map(go_ident, |id| Expr::Ident(id.to_string())),
        )),
    )(i)
}

enum Postfix {
    Assert(Expr),
    Select(String),
    Call(Vec<Expr>),
    Index(Vec<Expr>),
    Slice {
        low: Option<Expr>,
        high: Option<Expr>,
        max: Option<Expr>,
        slice3: bool,
    },
    Composite(Vec<CompositeElt>),
}

fn postfix(i: &str, allow_composite: bool) -> PResult<'_, Postfix> {
    if let Ok((i, pf)) = alt((
        context(
            "type assertion",
            map(
                preceded(pair(tok("."), tok("(")), terminated(type_expr, tok(")"))),
                Postfix::Assert,
            ),
        ),
        context(
            "field selector",
            map(preceded(tok("."), go_ident), |s| {
                Postfix::Select(s.to_string())
            }),
        ),
        context(
            "call arguments",
            map(
                delimited(tok("("), separated_list0(tok(","), expr), tok(")")),
                Postfix::Call,
            ),
        ),
        context("index or slice", index_or_slice),
    ))(i)
    {
        return Ok((i, pf));
    }
    if allow_composite {
        return context("composite literal body", composite_body)(i);
    }
    Err(nom::Err::Error(ErrorTree::from_error_kind(i, ErrorKind::Alt)))
}

fn index_or_slice(i: &str) -> PResult<'_, Postfix> {
    let (i, _) = tok("[")(i)?;
    let (i, low) = opt(expr)(i)?;
    let (i, colon) = opt(tok(":"))(i)?;
    if colon.is_none() {
        // plain index, possibly an explicit type-argument list
        let Some(first) = low else {
            return Err(nom::Err::Error(ErrorTree::from_error_kind(i, ErrorKind::Fail)));
        };
        let (i, mut rest) = many0(preceded(tok(","), expr))(i)?;
        let (i, _) = tok("]")(i)?;
        let mut indices = vec![first];
        indices.append(&mut rest);
        return Ok((i, Postfix::Index(indices)));
    }
    let (i, high) = opt(expr)(i)?;
    let (i, colon2) = opt(tok(":"))(i)?;
    let (i, max) = if colon2.is_some() { opt(expr)(i)? } else { (i, None) };
    let (i, _) = tok("]")(i)?;
    Ok((
        i,
        Postfix::Slice {
            low,
            high,
            max,
            slice3: colon2.is_some(),
        },
    ))
}

fn composite_body(i: &str) -> PResult<'_, Postfix> {
    let elt = |i| {
        let (i, first) = expr(i)?;
        let (i, colon) = opt(tok(":"))(i)?;
        if colon.is_none() {
            return Ok((
                i,
                CompositeElt {
                    key: None,
                    value: first,
                },
            ));
        }
        let (i, val) = expr(i)?;
        Ok((
            i,
            CompositeElt {
                key: Some(first),
                value: val,
            },
        ))
    };
    map(
        delimited(
            tok("{"),
            terminated(separated_list0(tok(","), elt), opt(tok(","))),
            tok("}"),
        ),
        Postfix::Composite,
    )(i)
}

/// True when `e` may be the type of a composite literal.
fn composite_eligible(e: &Expr) -> bool {
    match e {
        Expr::Ident(_) | Expr::ArrayType { .. } | Expr::MapType { .. } => true,
        Expr::Selector { x, .. } => matches!(&**x, Expr::Ident(_)),
        _ => false,
    }
}

fn primary_expr(i: &str) -> PResult<'_, Expr> {
    let (mut i, mut acc) = operand(i)?;
    loop {
        match postfix(i, composite_eligible(&acc)) {
            Ok((rest, pf)) => {
                acc = apply_postfix(acc, pf);
                i = rest;
            }
            Err(nom::Err::Failure(e)) => return Err(nom::Err::Failure(e)),
            Err(_) => break,
        }
    }
    Ok((i, acc))
}

fn apply_postfix(acc: Expr, pf: Postfix) -> Expr {
    match pf {
        Postfix::Assert(typ) => Expr::TypeAssert {
            x: acc.boxed(),
            typ: typ.boxed(),
        },
        Postfix::Select(sel) => Expr::Selector {
            x: acc.boxed(),
            sel,
        },
        Postfix::Call(args) => Expr::Call {
            fun: acc.boxed(),
            args,
        },
        Postfix::Index(indices) => index_node(acc, indices),
        Postfix::Slice {
            low,
            high,
            max,
            slice3,
        } => Expr::Slice {
            x: acc.boxed(),
            low: low.map(Expr::boxed),
            high: high.map(Expr::boxed),
            max: max.map(Expr::boxed),
            slice3,
        },
        Postfix::Composite(elts) => Expr::Composite {
            typ: acc.boxed(),
            elts,
        },
    }
}

// Unary and binary layers //////////////////////////////////////////////////

fn unary_expr(i: &str) -> PResult<'_, Expr> {
    let (i, _) = multispace0(i)?;
    let un = |op: UnaryOp| move |x: Expr| Expr::Unary { op, x: x.boxed() };
    // `primary_expr` goes first so a `<-chan T` operand keeps its postfix
    // operations instead of degrading into a unary receive
    alt((
        primary_expr,
        map(preceded(tag("<-"), unary_expr), un(UnaryOp::Recv)),
        map(preceded(tag("*"), unary_expr), |x| Expr::Star(x.boxed())),
        map(preceded(tag("&"), unary_expr), un(UnaryOp::And)),
        map(preceded(tag("!"), unary_expr), un(UnaryOp::Not)),
        map(preceded(tag("^"), unary_expr), un(UnaryOp::Xor)),
        map(preceded(tag("+"), unary_expr), un(UnaryOp::Add)),
        map(preceded(tag("-"), unary_expr), un(UnaryOp::Sub)),
    ))(i)
}

fn fold_binary(first: Expr, rest: Vec<(BinaryOp, Expr)>) -> Expr {
    rest.into_iter().fold(first, |x, (op, y)| Expr::Binary {
        x: x.boxed(),
        op,
        y: y.boxed(),
    })
}

/// One binary operator among `ops`, longest spelling first, with a guard
/// against eating the first half of a longer operator.
fn binary_op<'a>(
    ops: &'static [(&'static str, BinaryOp, Option<char>)],
) -> impl FnMut(&'a str) -> PResult<'a, BinaryOp> {
    move |i| {
        let (i, _) = multispace0(i)?;
        for &(sym, op, guard) in ops {
            let res: PResult<'_, &str> = tag(sym)(i);
            if let Ok((rest, _)) = res {
                if let Some(g) = guard {
                    if rest.starts_with(g) {
                        continue;
                    }
                }
                return Ok((rest, op));
            }
        }
        Err(nom::Err::Error(ErrorTree::from_error_kind(i, ErrorKind::Alt)))
    }
}

fn mul_expr(i: &str) -> PResult<'_, Expr> {
    const OPS: &[(&str, BinaryOp, Option<char>)] = &[
        ("<<", BinaryOp::Shl, None),
        (">>", BinaryOp::Shr, None),
        ("&^", BinaryOp::AndNot, None),
        ("&", BinaryOp::And, Some('&')),
        ("*", BinaryOp::Mul, None),
        ("/", BinaryOp::Quo, None),
        ("%", BinaryOp::Rem, None),
    ];
    let (i, first) = unary_expr(i)?;
    let (i, rest) = many0(pair(binary_op(OPS), unary_expr))(i)?;
    Ok((i, fold_binary(first, rest)))
}

fn add_expr(i: &str) -> PResult<'_, Expr> {
    const OPS: &[(&str, BinaryOp, Option<char>)] = &[
        ("++", BinaryOp::Inc, None),
        ("--", BinaryOp::Dec, None),
        ("+", BinaryOp::Add, None),
        ("-", BinaryOp::Sub, None),
        ("|", BinaryOp::Or, Some('|')),
        ("^", BinaryOp::Xor, None),
    ];
    let (i, first) = mul_expr(i)?;
    let (i, rest) = many0(pair(binary_op(OPS), mul_expr))(i)?;
    Ok((i, fold_binary(first, rest)))
}

fn cmp_expr(i: &str) -> PResult<'_, Expr> {
    const OPS: &[(&str, BinaryOp, Option<char>)] = &[
        ("==", BinaryOp::Eql, None),
        ("!=", BinaryOp::Neq, None),
        ("<=", BinaryOp::Leq, None),
        (">=", BinaryOp::Geq, None),
        ("<-", BinaryOp::Arrow, None),
        ("<", BinaryOp::Lss, None),
        (">", BinaryOp::Gtr, None),
    ];
    let (i, first) = add_expr(i)?;
    let (i, rest) = many0(pair(binary_op(OPS), add_expr))(i)?;
    Ok((i, fold_binary(first, rest)))
}

fn land_expr(i: &str) -> PResult<'_, Expr> {
    const OPS: &[(&str, BinaryOp, Option<char>)] = &[("&&", BinaryOp::LAnd, None)];
    let (i, first) = cmp_expr(i)?;
    let (i, rest) = many0(pair(binary_op(OPS), cmp_expr))(i)?;
    Ok((i, fold_binary(first, rest)))
}

/// Parser for a full expression, lowest precedence first.
pub fn expr(i: &str) -> PResult<'_, Expr> {
    const OPS: &[(&str, BinaryOp, Option<char>)] = &[("||", BinaryOp::LOr, None)];
    let (i, first) = land_expr(i)?;
    let (i, rest) = many0(pair(binary_op(OPS), land_expr))(i)?;
    Ok((i, fold_binary(first, rest)))
}
