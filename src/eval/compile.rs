//! Lowering of Go expressions to stack-machine programs.

use super::depth::depth_check;
use super::opcode::{JumpCond, Op, Program};
use super::{EvalScope, Flags, TypeResolver};
use crate::error::Error;
use crate::syntax::parser::{parse_expr, ParseError};
use crate::syntax::{
    is_string_literal, remove_paren, BinaryOp, Const, Expr, Lit, LitKind, UnaryOp,
};
use crate::types::TypeKind;
use log::debug;

/// The inferior function that hands out the debug pinner.
pub const DEBUG_PINNER_FUNCTION_NAME: &str = "runtime.debugPinner";

/// Compile the expression `expr` into a program.
///
/// If [`Flags::CAN_SET`] is set, input of the form `lhs = rhs` is accepted
/// and compiled as an assignment.
pub fn compile<L>(lookup: &L, expr: &str, flags: Flags) -> Result<Program, Error>
where
    L: EvalScope + TypeResolver,
{
    match parse_expr(expr) {
        Ok(t) => compile_ast(lookup, &t, flags),
        Err(ParseError::Assignment { offset }) if flags.contains(Flags::CAN_SET) => {
            compile_set(lookup, &expr[..offset], &expr[offset + 1..], flags)
        }
        Err(err) => Err(err.into()),
    }
}

/// Compile an already parsed expression into a program.
pub fn compile_ast<L>(lookup: &L, t: &Expr, flags: Flags) -> Result<Program, Error>
where
    L: EvalScope + TypeResolver,
{
    let mut ctx = CompileCtx::new(lookup, flags);
    ctx.compile_ast(t)?;
    ctx.compile_debug_unpin();

    let ops = ctx.ops;
    depth_check(&ops, 1)?;
    debug!(target: "evaluator", "compiled `{t}` to {} instructions", ops.len());
    Ok(Program::new(ops))
}

/// Compile the assignment of `rhexpr` to `lhexpr` into a program.
pub fn compile_set<L>(lookup: &L, lhexpr: &str, rhexpr: &str, flags: Flags) -> Result<Program, Error>
where
    L: EvalScope + TypeResolver,
{
    let lhe = parse_expr(lhexpr)?;
    let rhe = parse_expr(rhexpr)?;

    let mut ctx = CompileCtx::new(lookup, flags);
    ctx.compile_ast(&rhe)?;

    if is_string_literal(&rhe) {
        ctx.compile_alloc_literal_string()?;
    }

    ctx.compile_ast(&lhe)?;
    ctx.push_op(Op::SetValue { rhs: rhe });

    let ops = ctx.ops;
    depth_check(&ops, 0)?;
    Ok(Program::new(ops))
}

struct CompileCtx<'a, L> {
    lookup: &'a L,
    ops: Vec<Op>,
    allow_calls: bool,
    cur_call: usize,
    flags: Flags,
    first_call: bool,
}

impl<'a, L: EvalScope + TypeResolver> CompileCtx<'a, L> {
    fn new(lookup: &'a L, flags: Flags) -> Self {
        CompileCtx {
            lookup,
            ops: vec![],
            allow_calls: true,
            cur_call: 0,
            flags,
            first_call: true,
        }
    }

    /// Probing context for the ambiguous call-or-cast case: no calls, no
    /// flags, output discarded.
    fn speculative(lookup: &'a L) -> Self {
        CompileCtx {
            lookup,
            ops: vec![],
            allow_calls: false,
            cur_call: 0,
            flags: Flags::default(),
            first_call: false,
        }
    }

    fn push_op(&mut self, op: Op) {
        self.ops.push(op);
    }

    /// Point a previously emitted jump at the next instruction.
    fn patch_jump(&mut self, idx: usize) {
        let next = self.ops.len();
        if let Some(Op::Jump { target, .. }) = self.ops.get_mut(idx) {
            *target = next;
        }
    }

    fn compile_ast(&mut self, t: &Expr) -> Result<(), Error> {
        match t {
            Expr::Call { .. } => self.compile_type_cast_or_func_call(t)?,

            Expr::Ident(name) => self.compile_ident(name)?,

            // otherwise just eval recursively
            Expr::Paren(x) => self.compile_ast(x)?,

            Expr::Selector { x, sel } => self.compile_selector(t, x, sel)?,

            Expr::TypeAssert { x, typ } => self.compile_type_assert(x, typ)?,

            Expr::Index { x, index } => {
                self.compile_binary(x, index, None, Op::Index)?;
            }

            Expr::Slice { slice3: true, .. } => return Err(Error::ThreeIndexSlice),
            Expr::Slice { x, low, high, .. } => self.compile_reslice(x, low, high)?,

            // pointer dereferencing *<expression>
            Expr::Star(x) => self.compile_unary(x, Op::PointerDeref)?,

            Expr::Unary {
                op: UnaryOp::And,
                x,
            } => self.compile_unary(x, Op::AddrOf)?,
            Expr::Unary { op, x } => self.compile_unary(x, Op::Unary { op: *op })?,

            Expr::Binary { x, op, y } => match op {
                BinaryOp::Inc | BinaryOp::Dec | BinaryOp::Arrow => {
                    return Err(Error::UnsupportedOperator(*op))
                }
                _ => {
                    // short circuit logical operators
                    let sop = match op {
                        BinaryOp::LAnd => Some(JumpCond::JumpIfFalse),
                        BinaryOp::LOr => Some(JumpCond::JumpIfTrue),
                        _ => None,
                    };
                    let jmp = self.compile_binary(x, y, sop, Op::Binary { op: *op })?;
                    if let Some(jmp) = jmp {
                        self.patch_jump(jmp);
                        self.push_op(Op::BoolToConst);
                    }
                }
            },

            Expr::Lit(lit) => {
                let value = Const::from_lit(lit)
                    .ok_or_else(|| Error::MalformedLiteral(lit.raw.clone()))?;
                self.push_op(Op::PushConst(value));
            }

            Expr::Composite { typ, elts } => self.compile_composite_lit(t, typ, elts)?,

            _ => return Err(Error::NotImplemented(t.kind_name())),
        }
        Ok(())
    }

    fn compile_selector(&mut self, node: &Expr, x: &Expr, sel: &str) -> Result<(), Error> {
        match x {
            Expr::Ident(xname) => match (xname.as_str(), sel) {
                ("runtime", "curg") => self.push_op(Op::PushCurg),
                ("runtime", "frameoff") => self.push_op(Op::PushFrameoff),
                ("runtime", "threadid") => self.push_op(Op::PushThreadID),
                _ if self.lookup.has_local(xname) => {
                    self.push_op(Op::PushLocal {
                        name: xname.clone(),
                        frame: 0,
                    });
                    self.push_op(Op::Select {
                        name: sel.to_string(),
                    });
                }
                _ if self.lookup.has_global(xname, sel) => self.push_op(Op::PushPackageVar {
                    package: xname.clone(),
                    name: sel.to_string(),
                }),
                _ => {
                    return self.compile_unary(
                        x,
                        Op::Select {
                            name: sel.to_string(),
                        },
                    )
                }
            },

            // reading a local of a caller frame: runtime.frame(N).name
            Expr::Call { fun, args } => {
                if let Expr::Selector { x: fx, sel: fsel } = &**fun {
                    if matches!(&**fx, Expr::Ident(f) if f == "runtime") && fsel == "frame" {
                        let frame = match args.first() {
                            Some(Expr::Lit(lit @ Lit { kind: LitKind::Int, .. })) => {
                                lit.raw.parse::<i8>().map_err(|_| {
                                    Error::BadFrameArgument(lit.raw.clone())
                                })? as i64
                            }
                            Some(arg) => return Err(Error::BadFrameArgument(arg.to_string())),
                            None => return Err(Error::BadFrameArgument(node.to_string())),
                        };
                        self.push_op(Op::PushLocal {
                            name: sel.to_string(),
                            frame,
                        });
                        return Ok(());
                    }
                }
                return self.compile_unary(
                    x,
                    Op::Select {
                        name: sel.to_string(),
                    },
                );
            }

            // accept "package/path".varname syntax for package variables
            Expr::Lit(lit) if lit.kind == LitKind::Str => {
                let path = lit
                    .unquote()
                    .ok_or_else(|| Error::MalformedLiteral(lit.raw.clone()))?;
                if self.lookup.has_global(&path, sel) {
                    self.push_op(Op::PushPackageVar {
                        package: path,
                        name: sel.to_string(),
                    });
                } else {
                    return self.compile_unary(
                        x,
                        Op::Select {
                            name: sel.to_string(),
                        },
                    );
                }
            }

            _ => {
                return self.compile_unary(
                    x,
                    Op::Select {
                        name: sel.to_string(),
                    },
                )
            }
        }
        Ok(())
    }

    fn compile_ident(&mut self, name: &str) -> Result<(), Error> {
        if self.lookup.has_local(name) {
            self.push_op(Op::PushLocal {
                name: name.to_string(),
                frame: 0,
            });
        } else if self.lookup.has_global("", name) {
            self.push_op(Op::PushPackageVar {
                package: String::new(),
                name: name.to_string(),
            });
        } else if name == "true" || name == "false" {
            self.push_op(Op::PushConst(Const::Bool(name == "true")));
        } else if name == "nil" {
            self.push_op(Op::PushNil);
        } else if let Some(regnum) = self.lookup.lookup_register(name) {
            self.push_op(Op::PushRegister {
                regnum,
                name: name.to_string(),
            });
        } else {
            return Err(Error::SymbolNotFound(name.to_string()));
        }
        Ok(())
    }

    fn compile_unary(&mut self, x: &Expr, op: Op) -> Result<(), Error> {
        self.compile_ast(x)?;
        self.push_op(op);
        Ok(())
    }

    fn compile_type_assert(&mut self, x: &Expr, typ: &Expr) -> Result<(), Error> {
        self.compile_ast(x)?;
        // Accept .(data) as a type assertion that always succeeds, so that
        // users can access the data field of an interface without actually
        // having to type the concrete type.
        if matches!(typ, Expr::Ident(name) if name == "data") {
            self.push_op(Op::TypeAssert { typ: None });
            return Ok(());
        }
        let typ = self.lookup.find_type_expr(typ)?;
        self.push_op(Op::TypeAssert { typ: Some(typ) });
        Ok(())
    }

    /// Compile `a`, an optional short-circuit jump, `b`, then `op`.
    /// Returns the index of the emitted jump so the caller can patch it.
    fn compile_binary(
        &mut self,
        a: &Expr,
        b: &Expr,
        sop: Option<JumpCond>,
        op: Op,
    ) -> Result<Option<usize>, Error> {
        self.compile_ast(a)?;
        let jmp = sop.map(|when| {
            let idx = self.ops.len();
            self.push_op(Op::Jump {
                when,
                target: 0,
                pop: false,
            });
            idx
        });
        self.compile_ast(b)?;
        self.push_op(op);
        Ok(jmp)
    }

    fn compile_reslice(
        &mut self,
        x: &Expr,
        low: &Option<Box<Expr>>,
        high: &Option<Box<Expr>>,
    ) -> Result<(), Error> {
        self.compile_ast(x)?;

        let has_high = if let Some(high) = high {
            self.compile_ast(high)?;
            true
        } else {
            false
        };

        if let Some(low) = low {
            self.compile_ast(low)?;
        } else {
            self.push_op(Op::PushConst(Const::Int(0)));
        }

        self.push_op(Op::Reslice { has_high });
        Ok(())
    }

    // Calls and type casts /////////////////////////////////////////////////

    fn compile_type_cast_or_func_call(&mut self, node: &Expr) -> Result<(), Error> {
        let Expr::Call { fun, args } = node else {
            unreachable!("checked by the caller");
        };
        if args.len() != 1 {
            // Things that have more or less than one argument are always
            // function calls.
            return self.compile_function_call(node);
        }

        // strip parentheses and stars off the callee
        let mut fnnode: &Expr = fun;
        loop {
            fnnode = remove_paren(fnnode);
            match fnnode {
                Expr::Star(inner) => fnnode = inner.as_ref(),
                _ => break,
            }
        }

        match fnnode {
            // It can only be a ("type string")(x) type cast
            Expr::Lit(_) => self.compile_type_cast(node, None),

            Expr::ArrayType { .. }
            | Expr::StructType { .. }
            | Expr::FuncType { .. }
            | Expr::InterfaceType
            | Expr::MapType { .. }
            | Expr::ChanType { .. } => self.compile_type_cast(node, None),

            Expr::Selector { x, .. } if matches!(&**x, Expr::Ident(_)) => {
                if self.lookup.find_type_expr(fnnode).is_ok() {
                    self.compile_type_cast(node, None)
                } else {
                    self.compile_ambiguous(node)
                }
            }
            Expr::Selector { .. } => self.compile_function_call(node),

            Expr::Ident(name) => {
                if self.lookup.has_builtin(name)
                    || self.lookup.has_global("", name)
                    || self.lookup.has_local(name)
                {
                    self.compile_function_call(node)
                } else {
                    self.compile_type_cast(node, Some(Error::SymbolNotFound(name.clone())))
                }
            }

            Expr::Index { x, .. }
                if matches!(&**x, Expr::Ident(_) | Expr::Selector { .. }) =>
            {
                // Ambiguous, could be a parametric type. Do the type-cast
                // first since evaluating the callee could be expensive; roll
                // the emitted argument back if the type does not exist.
                let ops_len = self.ops.len();
                let cur_call = self.cur_call;
                let first_call = self.first_call;
                match self.compile_type_cast(node, None) {
                    Err(Error::TypeNotFound) => {
                        self.ops.truncate(ops_len);
                        self.cur_call = cur_call;
                        self.first_call = first_call;
                        self.compile_function_call(node)
                    }
                    res => res,
                }
            }
            Expr::IndexList { .. } => self.compile_type_cast(node, None),

            // All other expressions must be function calls
            _ => self.compile_function_call(node),
        }
    }

    /// Could be a function call or a type cast: if the callee can be
    /// evaluated treat it as a function call, otherwise try the type cast.
    fn compile_ambiguous(&mut self, node: &Expr) -> Result<(), Error> {
        let Expr::Call { fun, .. } = node else {
            unreachable!("checked by the caller");
        };
        let mut probe = CompileCtx::speculative(self.lookup);
        match probe.compile_ast(fun) {
            Ok(()) => self.compile_function_call(node),
            Err(err0) => self.compile_type_cast(node, Some(err0)),
        }
    }

    fn compile_type_cast(&mut self, node: &Expr, ambiguous_err: Option<Error>) -> Result<(), Error> {
        let Expr::Call { fun, args } = node else {
            unreachable!("checked by the caller");
        };
        self.compile_ast(&args[0])?;

        let fnnode = remove_paren(fun);
        let target_type_str = fnnode.to_string();
        let typ = match self.lookup.find_type_expr(fnnode) {
            Ok(typ) => typ,
            Err(err) => match target_type_str.as_str() {
                "[]byte" | "[]uint8" => crate::types::fake_slice_type("uint", 8),
                "[]int32" | "[]rune" => crate::types::fake_slice_type("int", 32),
                _ => {
                    if let (Some(ambiguous_err), Error::TypeNotFound) = (ambiguous_err, &err) {
                        return Err(Error::AmbiguousCallOrCast(
                            fun.to_string(),
                            Box::new(ambiguous_err),
                        ));
                    }
                    return Err(err);
                }
            },
        };

        self.push_op(Op::TypeCast { typ });
        Ok(())
    }

    fn compile_builtin_call(&mut self, builtin: &str, args: &[Expr]) -> Result<(), Error> {
        for arg in args {
            self.compile_ast(arg)?;
        }
        self.push_op(Op::BuiltinCall {
            name: builtin.to_string(),
            num_args: args.len(),
        });
        Ok(())
    }

    fn compile_function_call(&mut self, node: &Expr) -> Result<(), Error> {
        let Expr::Call { fun, args } = node else {
            unreachable!("checked by the caller");
        };
        if let Expr::Ident(name) = &**fun {
            if self.lookup.has_builtin(name) {
                return self.compile_builtin_call(name, args);
            }
        }
        if !self.allow_calls {
            return Err(Error::FuncCallNotAllowed);
        }

        let id = self.cur_call;
        self.cur_call += 1;

        if self.flags.contains(Flags::HAS_DEBUG_PINNER) {
            self.compile_function_call_new(node, id)
        } else {
            self.compile_function_call_old(node, id)
        }
    }

    /// Call injection without a debug pinner in the target: the callee is
    /// compiled speculatively first so its address is on the stack before
    /// the protocol starts.
    fn compile_function_call_old(&mut self, node: &Expr, id: usize) -> Result<(), Error> {
        let Expr::Call { fun, args } = node else {
            unreachable!("checked by the caller");
        };

        let old_allow_calls = self.allow_calls;
        let ops_len = self.ops.len();
        self.allow_calls = false;
        let res = self.compile_ast(fun);
        self.allow_calls = old_allow_calls;

        let has_func = match res {
            Ok(()) => true,
            Err(err) => {
                self.ops.truncate(ops_len);
                if !matches!(err, Error::FuncCallNotAllowed) {
                    return Err(err);
                }
                false
            }
        };

        self.push_op(Op::CallInjectionStart {
            has_func,
            id,
            node: node.clone(),
        });

        // CallInjectionStart pushes true on the stack if it needs the
        // function expression re-evaluated
        let jmpif = has_func.then(|| {
            let idx = self.ops.len();
            self.push_op(Op::Jump {
                when: JumpCond::JumpIfFalse,
                target: 0,
                pop: true,
            });
            idx
        });

        self.push_op(Op::Pop);
        self.compile_ast(fun)?;
        if let Some(jmpif) = jmpif {
            self.patch_jump(jmpif);
        }

        self.push_op(Op::CallInjectionSetTarget { id });

        for (i, arg) in args.iter().enumerate() {
            self.compile_ast(arg).map_err(|err| Error::BadCallArgument {
                arg: arg.to_string(),
                num: i + 1,
                fun: fun.to_string(),
                source: Box::new(err),
            })?;
            if is_string_literal(arg) {
                self.compile_alloc_literal_string()?;
            }
            self.push_op(Op::CallInjectionCopyArg { id, arg_num: i });
        }

        self.push_op(Op::CallInjectionComplete {
            id,
            do_pinning: false,
        });

        Ok(())
    }

    /// Call injection when the debug pinner is available: callee and all
    /// arguments are evaluated up front, then rolled into protocol order.
    fn compile_function_call_new(&mut self, node: &Expr, id: usize) -> Result<(), Error> {
        let Expr::Call { fun, args } = node else {
            unreachable!("checked by the caller");
        };

        self.compile_get_debug_pinner();

        self.compile_ast(fun)?;

        for (i, arg) in args.iter().enumerate() {
            let res = self.compile_ast(arg);
            if is_string_literal(arg) {
                self.compile_alloc_literal_string()?;
            }
            res.map_err(|err| Error::BadCallArgument {
                arg: arg.to_string(),
                num: i + 1,
                fun: fun.to_string(),
                source: Box::new(err),
            })?;
        }

        self.push_op(Op::Roll { n: args.len() });
        self.push_op(Op::CallInjectionStart {
            has_func: true,
            id,
            node: node.clone(),
        });
        self.push_op(Op::Pop);
        self.push_op(Op::CallInjectionSetTarget { id });

        for i in (0..args.len()).rev() {
            self.push_op(Op::CallInjectionCopyArg { id, arg_num: i });
        }

        self.push_op(Op::CallInjectionComplete {
            id,
            do_pinning: true,
        });

        self.compile_pinning_loop(id);

        Ok(())
    }

    // String allocation and pinning ////////////////////////////////////////

    /// Copy the string literal at the top of the stack into inferior memory,
    /// unless the executor decides the copy is unnecessary.
    fn compile_alloc_literal_string(&mut self) -> Result<(), Error> {
        if !self.allow_calls {
            return Err(Error::LiteralAllocNotAllowed);
        }

        let jmp = self.ops.len();
        self.push_op(Op::Jump {
            when: JumpCond::JumpIfAllocStringChecksFail,
            target: 0,
            pop: false,
        });

        self.compile_special_call(
            "runtime.mallocgc",
            vec![
                Expr::Lit(Lit::int("0")),
                Expr::ident("nil"),
                Expr::ident("false"),
            ],
            vec![
                Some(Op::PushLen),
                Some(Op::PushNil),
                Some(Op::PushConst(Const::Bool(false))),
            ],
            true,
        );

        self.push_op(Op::ConvertAllocToString);
        self.patch_jump(jmp);
        Ok(())
    }

    /// Inject a call to a well-known runtime function. A `None` entry in
    /// `args` means the operand is already on the stack and only the copy
    /// opcode is emitted for it.
    fn compile_special_call(
        &mut self,
        fn_name: &str,
        arg_ast: Vec<Expr>,
        args: Vec<Option<Op>>,
        do_pinning: bool,
    ) {
        if do_pinning {
            self.compile_get_debug_pinner();
        }

        let id = self.cur_call;
        self.cur_call += 1;
        self.push_op(Op::CallInjectionStartSpecial {
            id,
            fn_name: fn_name.to_string(),
            arg_ast,
        });
        self.push_op(Op::CallInjectionSetTarget { id });

        for (i, arg) in args.into_iter().enumerate() {
            if let Some(op) = arg {
                self.push_op(op);
            }
            self.push_op(Op::CallInjectionCopyArg { id, arg_num: i });
        }

        let do_pinning = do_pinning && self.flags.contains(Flags::HAS_DEBUG_PINNER);

        self.push_op(Op::CallInjectionComplete { id, do_pinning });

        if do_pinning {
            self.compile_pinning_loop(id);
        }
    }

    /// Acquire the debug pinner, once per program.
    fn compile_get_debug_pinner(&mut self) {
        if self.first_call && self.flags.contains(Flags::HAS_DEBUG_PINNER) {
            self.compile_special_call(DEBUG_PINNER_FUNCTION_NAME, vec![], vec![], false);
            self.push_op(Op::SetDebugPinner);
            self.first_call = false;
        }
    }

    /// Release the debug pinner and clear its slot, if it was acquired.
    fn compile_debug_unpin(&mut self) {
        if !self.first_call && self.flags.contains(Flags::HAS_DEBUG_PINNER) {
            self.compile_special_call(
                "runtime.(*Pinner).Unpin",
                vec![Expr::ident("debugPinner")],
                vec![Some(Op::PushDebugPinner)],
                false,
            );
            self.push_op(Op::Pop);
            self.push_op(Op::PushNil);
            self.push_op(Op::SetDebugPinner);
        }
    }

    /// Pin every pointer produced by call injection `id` until the executor
    /// reports there is nothing left to pin.
    fn compile_pinning_loop(&mut self, id: usize) {
        let loop_start = self.ops.len();
        self.push_op(Op::Jump {
            when: JumpCond::JumpIfPinningDone,
            target: 0,
            pop: false,
        });
        self.push_op(Op::PushPinAddress);
        self.compile_special_call(
            "runtime.(*Pinner).Pin",
            vec![Expr::ident("debugPinner"), Expr::ident("pinAddress")],
            vec![Some(Op::PushDebugPinner), None],
            false,
        );
        self.push_op(Op::Pop);
        self.push_op(Op::Jump {
            when: JumpCond::JumpAlways,
            target: loop_start,
            pop: false,
        });
        self.patch_jump(loop_start);
        self.push_op(Op::CallInjectionComplete2 { id });
    }

    // Composite literals ///////////////////////////////////////////////////

    /// A struct composite literal allocates one element of the named type in
    /// the inferior and fills its fields one assignment at a time.
    fn compile_composite_lit(
        &mut self,
        node: &Expr,
        typ: &Expr,
        elts: &[crate::syntax::CompositeElt],
    ) -> Result<(), Error> {
        let not_impl = Error::NotImplemented(node.kind_name());
        if !self.flags.contains(Flags::HAS_DEBUG_PINNER) {
            return Err(not_impl);
        }

        let dtyp = self.lookup.find_type_expr(typ)?;
        let rtyp = dtyp.resolved();
        match rtyp.kind() {
            TypeKind::Struct => {
                if !self.allow_calls {
                    return Err(Error::LiteralAllocNotAllowed);
                }

                self.compile_special_call(
                    "runtime.mallocgc",
                    vec![Expr::Lit(Lit::int("1")), typ.clone(), Expr::ident("true")],
                    vec![
                        Some(Op::PushConst(Const::Int(1))),
                        Some(Op::PushRuntimeType(dtyp.clone())),
                        Some(Op::PushConst(Const::Bool(true))),
                    ],
                    true,
                );
                self.push_op(Op::TypeCast {
                    typ: dtyp.pointer_to(),
                });
                self.push_op(Op::PointerDeref);

                for (i, elt) in elts.iter().enumerate() {
                    let field = match &elt.key {
                        Some(Expr::Ident(name)) => name.clone(),
                        Some(key) => return Err(Error::BadCompositeKey(key.to_string())),
                        None => {
                            let fields = rtyp
                                .struct_fields()
                                .ok_or(Error::NotImplemented(node.kind_name()))?;
                            fields
                                .get_index(i)
                                .map(|(name, _)| name.clone())
                                .ok_or_else(|| Error::TooManyInitializers(rtyp.name()))?
                        }
                    };
                    self.compile_ast(&elt.value)?;
                    self.push_op(Op::Dup);
                    self.push_op(Op::Select { name: field });
                    self.push_op(Op::SetValue {
                        rhs: elt.value.clone(),
                    });
                }
                Ok(())
            }
            _ => Err(not_impl),
        }
    }
}
