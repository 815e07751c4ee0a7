//! Syntax tree for the supported subset of Go expressions.
//!
//! The debugger accepts arbitrary Go expressions typed by a user, so the node
//! set mirrors the surface grammar: selectors, calls, index and slice
//! operations, type assertions, composite literals and the type expressions
//! that may appear at a conversion head (`[]byte(x)`, `map[k]v(x)`, ...).

pub mod parser;

use itertools::Itertools;
use std::fmt::{self, Display, Formatter};
use strum_macros::Display as StrumDisplay;

/// Binary operator tokens. `++`, `--` and `<-` never form valid Go binary
/// expressions, they are carried through to the compiler so it can reject
/// them with a dedicated message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay)]
pub enum BinaryOp {
    #[strum(to_string = "+")]
    Add,
    #[strum(to_string = "-")]
    Sub,
    #[strum(to_string = "*")]
    Mul,
    #[strum(to_string = "/")]
    Quo,
    #[strum(to_string = "%")]
    Rem,
    #[strum(to_string = "&")]
    And,
    #[strum(to_string = "|")]
    Or,
    #[strum(to_string = "^")]
    Xor,
    #[strum(to_string = "&^")]
    AndNot,
    #[strum(to_string = "<<")]
    Shl,
    #[strum(to_string = ">>")]
    Shr,
    #[strum(to_string = "&&")]
    LAnd,
    #[strum(to_string = "||")]
    LOr,
    #[strum(to_string = "==")]
    Eql,
    #[strum(to_string = "!=")]
    Neq,
    #[strum(to_string = "<")]
    Lss,
    #[strum(to_string = "<=")]
    Leq,
    #[strum(to_string = ">")]
    Gtr,
    #[strum(to_string = ">=")]
    Geq,
    #[strum(to_string = "++")]
    Inc,
    #[strum(to_string = "--")]
    Dec,
    #[strum(to_string = "<-")]
    Arrow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay)]
pub enum UnaryOp {
    #[strum(to_string = "+")]
    Add,
    #[strum(to_string = "-")]
    Sub,
    #[strum(to_string = "!")]
    Not,
    #[strum(to_string = "^")]
    Xor,
    #[strum(to_string = "&")]
    And,
    #[strum(to_string = "<-")]
    Recv,
}

/// Channel direction of a channel type expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChanDir {
    Both,
    Send,
    Recv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LitKind {
    Int,
    Float,
    Char,
    Str,
}

/// Basic literal, kept in source form. Conversion to a typed constant
/// happens when the literal is lowered (see [`Const::from_lit`]), printing
/// reuses the original spelling.
#[derive(Debug, Clone, PartialEq)]
pub struct Lit {
    pub kind: LitKind,
    pub raw: String,
}

impl Lit {
    pub fn int(raw: impl ToString) -> Self {
        Lit {
            kind: LitKind::Int,
            raw: raw.to_string(),
        }
    }

    /// Decode a quoted string literal (interpreted or raw form).
    pub fn unquote(&self) -> Option<String> {
        unquote(&self.raw)
    }
}

/// A value known at compile time, the operand of `PushConst`.
#[derive(Debug, Clone, PartialEq)]
pub enum Const {
    Int(i128),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl Const {
    /// Convert a literal to its constant value. Rune literals become untyped
    /// integer constants, like any Go constant expression.
    pub fn from_lit(lit: &Lit) -> Option<Const> {
        match lit.kind {
            LitKind::Int => parse_int(&lit.raw).map(Const::Int),
            LitKind::Float => lit.raw.replace('_', "").parse::<f64>().ok().map(Const::Float),
            LitKind::Char => {
                let body = lit.raw.strip_prefix('\'')?.strip_suffix('\'')?;
                let (c, rest) = unescape_char(body)?;
                rest.is_empty().then_some(Const::Int(c as i128))
            }
            LitKind::Str => unquote(&lit.raw).map(Const::Str),
        }
    }
}

impl Display for Const {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Const::Int(v) => write!(f, "{v}"),
            Const::Float(v) => write!(f, "{v}"),
            Const::Str(v) => write!(f, "{v:?}"),
            Const::Bool(v) => write!(f, "{v}"),
        }
    }
}

fn parse_int(raw: &str) -> Option<i128> {
    let s = raw.replace('_', "");
    let (digits, radix) = match s.as_bytes() {
        [b'0', b'x' | b'X', ..] => (&s[2..], 16),
        [b'0', b'o' | b'O', ..] => (&s[2..], 8),
        [b'0', b'b' | b'B', ..] => (&s[2..], 2),
        [b'0', _, ..] => (&s[1..], 8),
        _ => (s.as_str(), 10),
    };
    i128::from_str_radix(digits, radix).ok()
}

fn unescape_char(s: &str) -> Option<(char, &str)> {
    let mut chars = s.chars();
    let c = chars.next()?;
    if c != '\\' {
        return Some((c, chars.as_str()));
    }
    let esc = chars.next()?;
    let simple = |c| Some((c, chars.as_str()));
    match esc {
        'n' => simple('\n'),
        't' => simple('\t'),
        'r' => simple('\r'),
        '\\' => simple('\\'),
        '\'' => simple('\''),
        '"' => simple('"'),
        '0' => simple('\0'),
        'a' => simple('\x07'),
        'b' => simple('\x08'),
        'f' => simple('\x0c'),
        'v' => simple('\x0b'),
        'x' => {
            let rest = chars.as_str();
            let c = u8::from_str_radix(rest.get(..2)?, 16).ok()?;
            Some((c as char, &rest[2..]))
        }
        'u' => {
            let rest = chars.as_str();
            let c = u32::from_str_radix(rest.get(..4)?, 16).ok()?;
            Some((char::from_u32(c)?, &rest[4..]))
        }
        'U' => {
            let rest = chars.as_str();
            let c = u32::from_str_radix(rest.get(..8)?, 16).ok()?;
            Some((char::from_u32(c)?, &rest[8..]))
        }
        _ => None,
    }
}

fn unquote(raw: &str) -> Option<String> {
    if let Some(body) = raw.strip_prefix('`') {
        return Some(body.strip_suffix('`')?.to_string());
    }
    let mut body = raw.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::with_capacity(body.len());
    while !body.is_empty() {
        let (c, rest) = unescape_char(body)?;
        out.push(c);
        body = rest;
    }
    Some(out)
}

/// Element of a composite literal, either positional or `key: value`.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeElt {
    pub key: Option<Expr>,
    pub value: Expr,
}

/// Expression node. The set mirrors the Go grammar subset the evaluator
/// understands; type expressions are ordinary nodes so that a conversion
/// head can be inspected without a separate type grammar.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Ident(String),
    Lit(Lit),
    Paren(Box<Expr>),
    Selector {
        x: Box<Expr>,
        sel: String,
    },
    TypeAssert {
        x: Box<Expr>,
        typ: Box<Expr>,
    },
    Index {
        x: Box<Expr>,
        index: Box<Expr>,
    },
    IndexList {
        x: Box<Expr>,
        indices: Vec<Expr>,
    },
    Slice {
        x: Box<Expr>,
        low: Option<Box<Expr>>,
        high: Option<Box<Expr>>,
        max: Option<Box<Expr>>,
        slice3: bool,
    },
    /// `*X`: pointer dereference in value position, pointer type in type
    /// position.
    Star(Box<Expr>),
    Unary {
        op: UnaryOp,
        x: Box<Expr>,
    },
    Binary {
        x: Box<Expr>,
        op: BinaryOp,
        y: Box<Expr>,
    },
    Call {
        fun: Box<Expr>,
        args: Vec<Expr>,
    },
    Composite {
        typ: Box<Expr>,
        elts: Vec<CompositeElt>,
    },
    /// `[]T` or `[N]T`.
    ArrayType {
        len: Option<Box<Expr>>,
        elem: Box<Expr>,
    },
    MapType {
        key: Box<Expr>,
        value: Box<Expr>,
    },
    ChanType {
        dir: ChanDir,
        elem: Box<Expr>,
    },
    FuncType {
        params: Vec<Expr>,
        results: Vec<Expr>,
    },
    StructType {
        fields: Vec<(String, Expr)>,
    },
    InterfaceType,
}

impl Expr {
    pub fn boxed(self) -> Box<Self> {
        Box::new(self)
    }

    pub fn ident(name: impl ToString) -> Self {
        Expr::Ident(name.to_string())
    }

    /// Node kind for "not implemented" diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Expr::Ident(_) => "identifier",
            Expr::Lit(_) => "literal",
            Expr::Paren(_) => "parenthesized expression",
            Expr::Selector { .. } => "selector",
            Expr::TypeAssert { .. } => "type assertion",
            Expr::Index { .. } => "index expression",
            Expr::IndexList { .. } => "index list expression",
            Expr::Slice { .. } => "slice expression",
            Expr::Star(_) => "star expression",
            Expr::Unary { .. } => "unary expression",
            Expr::Binary { .. } => "binary expression",
            Expr::Call { .. } => "call expression",
            Expr::Composite { .. } => "composite literal",
            Expr::ArrayType { .. } => "array type",
            Expr::MapType { .. } => "map type",
            Expr::ChanType { .. } => "chan type",
            Expr::FuncType { .. } => "func type",
            Expr::StructType { .. } => "struct type",
            Expr::InterfaceType => "interface type",
        }
    }
}

/// Strip any number of enclosing parentheses.
pub fn remove_paren(mut e: &Expr) -> &Expr {
    while let Expr::Paren(inner) = e {
        e = inner;
    }
    e
}

/// True for literals that denote a string value: a string literal, a
/// parenthesized string literal or a concatenation of such.
pub fn is_string_literal(e: &Expr) -> bool {
    match e {
        Expr::Lit(lit) => lit.kind == LitKind::Str,
        Expr::Binary {
            x,
            op: BinaryOp::Add,
            y,
        } => is_string_literal(x) && is_string_literal(y),
        Expr::Paren(inner) => is_string_literal(inner),
        _ => false,
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Ident(name) => f.write_str(name),
            Expr::Lit(lit) => f.write_str(&lit.raw),
            Expr::Paren(x) => write!(f, "({x})"),
            Expr::Selector { x, sel } => write!(f, "{x}.{sel}"),
            Expr::TypeAssert { x, typ } => write!(f, "{x}.({typ})"),
            Expr::Index { x, index } => write!(f, "{x}[{index}]"),
            Expr::IndexList { x, indices } => {
                write!(f, "{x}[{}]", indices.iter().join(", "))
            }
            Expr::Slice {
                x,
                low,
                high,
                max,
                slice3,
            } => {
                write!(f, "{x}[")?;
                if let Some(low) = low {
                    write!(f, "{low}")?;
                }
                f.write_str(":")?;
                if let Some(high) = high {
                    write!(f, "{high}")?;
                }
                if *slice3 {
                    f.write_str(":")?;
                    if let Some(max) = max {
                        write!(f, "{max}")?;
                    }
                }
                f.write_str("]")
            }
            Expr::Star(x) => write!(f, "*{x}"),
            Expr::Unary { op, x } => write!(f, "{op}{x}"),
            Expr::Binary { x, op, y } => write!(f, "{x} {op} {y}"),
            Expr::Call { fun, args } => {
                write!(f, "{fun}({})", args.iter().join(", "))
            }
            Expr::Composite { typ, elts } => {
                let body = elts
                    .iter()
                    .map(|elt| match &elt.key {
                        Some(key) => format!("{key}: {}", elt.value),
                        None => elt.value.to_string(),
                    })
                    .join(", ");
                write!(f, "{typ}{{{body}}}")
            }
            Expr::ArrayType { len, elem } => match len {
                Some(len) => write!(f, "[{len}]{elem}"),
                None => write!(f, "[]{elem}"),
            },
            Expr::MapType { key, value } => write!(f, "map[{key}]{value}"),
            Expr::ChanType { dir, elem } => match dir {
                ChanDir::Both => write!(f, "chan {elem}"),
                ChanDir::Send => write!(f, "chan<- {elem}"),
                ChanDir::Recv => write!(f, "<-chan {elem}"),
            },
            Expr::FuncType { params, results } => {
                write!(f, "func({})", params.iter().join(", "))?;
                match results.len() {
                    0 => Ok(()),
                    1 => write!(f, " {}", results[0]),
                    _ => write!(f, " ({})", results.iter().join(", ")),
                }
            }
            Expr::StructType { fields } => {
                let body = fields
                    .iter()
                    .map(|(name, typ)| format!("{name} {typ}"))
                    .join("; ");
                write!(f, "struct{{{body}}}")
            }
            Expr::InterfaceType => f.write_str("interface{}"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_const_from_lit() {
        struct TestCase {
            lit: Lit,
            expect: Const,
        }
        let test_cases = [
            TestCase {
                lit: Lit::int("42"),
                expect: Const::Int(42),
            },
            TestCase {
                lit: Lit::int("0x2a"),
                expect: Const::Int(42),
            },
            TestCase {
                lit: Lit::int("0b101"),
                expect: Const::Int(5),
            },
            TestCase {
                lit: Lit::int("0o17"),
                expect: Const::Int(15),
            },
            TestCase {
                lit: Lit::int("017"),
                expect: Const::Int(15),
            },
            TestCase {
                lit: Lit::int("1_000"),
                expect: Const::Int(1000),
            },
            TestCase {
                lit: Lit {
                    kind: LitKind::Float,
                    raw: "1.5e2".to_string(),
                },
                expect: Const::Float(150.0),
            },
            TestCase {
                lit: Lit {
                    kind: LitKind::Char,
                    raw: "'A'".to_string(),
                },
                expect: Const::Int(65),
            },
            TestCase {
                lit: Lit {
                    kind: LitKind::Char,
                    raw: r"'\n'".to_string(),
                },
                expect: Const::Int(10),
            },
            TestCase {
                lit: Lit {
                    kind: LitKind::Str,
                    raw: r#""a\tb""#.to_string(),
                },
                expect: Const::Str("a\tb".to_string()),
            },
            TestCase {
                lit: Lit {
                    kind: LitKind::Str,
                    raw: "`raw\\n`".to_string(),
                },
                expect: Const::Str("raw\\n".to_string()),
            },
        ];

        for tc in test_cases {
            assert_eq!(Const::from_lit(&tc.lit), Some(tc.expect), "{:?}", tc.lit);
        }
    }

    #[test]
    fn test_expr_display() {
        let e = Expr::Binary {
            x: Expr::Ident("a".to_string()).boxed(),
            op: BinaryOp::LAnd,
            y: Expr::Paren(
                Expr::Call {
                    fun: Expr::Selector {
                        x: Expr::ident("pkg").boxed(),
                        sel: "f".to_string(),
                    }
                    .boxed(),
                    args: vec![Expr::Lit(Lit::int("1"))],
                }
                .boxed(),
            )
            .boxed(),
        };
        assert_eq!(e.to_string(), "a && (pkg.f(1))");

        let cast = Expr::Call {
            fun: Expr::ArrayType {
                len: None,
                elem: Expr::ident("byte").boxed(),
            }
            .boxed(),
            args: vec![Expr::ident("s")],
        };
        assert_eq!(cast.to_string(), "[]byte(s)");
    }
}
