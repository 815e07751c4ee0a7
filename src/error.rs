use crate::syntax::parser::ParseError;
use crate::syntax::BinaryOp;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- syntax errors ---------------------------------------------
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("malformed literal {0}")]
    MalformedLiteral(String),

    // --------------------------------- unsupported constructs ------------------------------------
    #[error("operator {0} not supported")]
    UnsupportedOperator(BinaryOp),
    #[error("3-index slice expressions not supported")]
    ThreeIndexSlice,
    #[error("expression {0} not implemented")]
    NotImplemented(&'static str),
    #[error("expected integer value for frame, got {0}")]
    BadFrameArgument(String),
    #[error("invalid key {0} in struct literal")]
    BadCompositeKey(String),
    #[error("too many values in literal of type {0}")]
    TooManyInitializers(String),

    // --------------------------------- resolution errors -----------------------------------------
    #[error("could not find symbol value for {0}")]
    SymbolNotFound(String),
    #[error("type not found")]
    TypeNotFound,
    #[error("could not evaluate function or type {0}: {1}")]
    AmbiguousCallOrCast(String, Box<Error>),
    #[error("error evaluating {arg:?} as argument {num} in function {fun}: {source}")]
    BadCallArgument {
        arg: String,
        num: usize,
        fun: String,
        source: Box<Error>,
    },
    #[error(transparent)]
    Lookup(#[from] anyhow::Error),

    // --------------------------------- policy errors ---------------------------------------------
    #[error("function calls not allowed without using 'call'")]
    FuncCallNotAllowed,
    #[error("literal can not be allocated because function calls are not allowed without using 'call'")]
    LiteralAllocNotAllowed,

    // --------------------------------- internal invariant failures -------------------------------
    #[error("internal debugger error: depth check error at instruction {index}: expected at least {expected} have {actual}\n{listing}")]
    StackUnderflow {
        index: usize,
        expected: i64,
        actual: i64,
        listing: String,
    },
    #[error("internal debugger error: depth check error at instruction {index}: expected depth {expected} have {actual} (jump target)\n{listing}")]
    DepthMismatch {
        index: usize,
        expected: i64,
        actual: i64,
        listing: String,
    },
    #[error("internal debugger error: depth check failed: depth at the end is not {expected} (got {actual})\n{listing}")]
    BadTerminalDepth {
        expected: i64,
        actual: i64,
        listing: String,
    },
    #[error("internal debugger error: pinning call injection seen before call to {fn_name} at instruction {index}")]
    PinningBeforeAcquire {
        index: usize,
        fn_name: &'static str,
    },
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!(target: "evaluator", "{:#}", e);
                None
            }
        }
    };
}
