#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::fmt;
use std::mem;

use prism_ir::{
    apply_ret_type, existentialize, ext_ranks_compatible, ext_subtypes_of, generalize_ext_types,
    ranks_compatible, static_shapes, Body, Diet, Exp, ExtDim, ExtLambda, ExtType, FloatWidth,
    FunDef, Lambda, LoopForm, Names, Param, Pattern, PrimType, Prog, Stmt, SubExp, Type,
    Uniqueness, VName, INT32,
};

use crate::capability::Checkable;
use crate::error::{ErrorCase, TypeError};
use crate::occurrence::{alt_occurrences, unoccur, Consumption, Occurrence};

/// Check a program: types, shapes, aliasing and uniqueness.
pub fn check_prog<L: Checkable>(prog: &Prog<L>) -> Result<(), TypeError> {
    check_prog_with(prog, true)
}

/// Check a program's types and shapes only; consumption violations are
/// tracked but not raised.
pub fn check_prog_no_uniqueness<L: Checkable>(prog: &Prog<L>) -> Result<(), TypeError> {
    check_prog_with(prog, false)
}

fn check_prog_with<L: Checkable>(prog: &Prog<L>, check_occurrences: bool) -> Result<(), TypeError> {
    let prog = prism_ir::alias::analyze_prog(prog);
    let mut ftable = builtin_ftable::<L>();
    for fun in &prog.funs {
        if ftable.contains_key(&fun.name) {
            return Err(TypeError::bare(ErrorCase::DupDefinitionError {
                func: fun.name.clone(),
            }));
        }
        ftable.insert(
            fun.name.clone(),
            FunBinding {
                ret: fun.ret.clone(),
                params: fun.params.clone(),
            },
        );
    }
    let mut ck = TypeChecker::new(ftable, check_occurrences);
    for fun in &prog.funs {
        // no occurrences escape between functions
        ck.no_dataflow(|ck| ck.check_fun(fun))?;
    }
    Ok(())
}

/// The built-in function table every program starts from.
pub fn builtin_ftable<L: Checkable>() -> HashMap<String, FunBinding<L>> {
    let f64t = PrimType::Float(FloatWidth::F64);
    let builtins: Vec<(&str, Vec<PrimType>, PrimType)> = vec![
        ("sqrt64", vec![f64t], f64t),
        ("log64", vec![f64t], f64t),
        ("exp64", vec![f64t], f64t),
        ("atan2_64", vec![f64t, f64t], f64t),
    ];
    let mut table = HashMap::new();
    for (name, param_tys, ret) in builtins {
        let params = param_tys
            .into_iter()
            .enumerate()
            .map(|(i, t)| L::prim_fparam(VName::new("x", i as u32), t))
            .collect();
        table.insert(
            name.to_string(),
            FunBinding {
                ret: vec![ExtType::Prim(ret)],
                params,
            },
        );
    }
    table
}

/// A declared function: return type and parameters.
#[derive(Clone, Debug)]
pub struct FunBinding<L: Checkable> {
    pub ret: Vec<ExtType>,
    pub params: Vec<Param<L::FParamAttr>>,
}

/// What the checker knows about a name in scope.
#[derive(Clone, Debug)]
pub enum NameInfo<L: Checkable> {
    Let {
        aliases: Names,
        ty: Type,
        attr: L::LetAttr,
    },
    FParam {
        ty: Type,
        attr: L::FParamAttr,
    },
    LParam {
        ty: Type,
        attr: L::LParamAttr,
    },
    IndexVar,
}

impl<L: Checkable> NameInfo<L> {
    /// The value-level type of the binding. Declared uniqueness does
    /// not survive to value level.
    pub fn ty(&self) -> Type {
        match self {
            NameInfo::Let { ty, .. } => ty.clone().set_uniqueness(Uniqueness::Nonunique),
            NameInfo::FParam { ty, .. } => ty.clone().set_uniqueness(Uniqueness::Nonunique),
            NameInfo::LParam { ty, .. } => ty.clone().set_uniqueness(Uniqueness::Nonunique),
            NameInfo::IndexVar => Type::Prim(INT32),
        }
    }
}

/// A checked argument: its type, what it aliases, and the occurrences
/// its checking produced (held back so the caller can interleave them
/// with diet-driven consumption).
#[derive(Clone, Debug)]
pub struct Arg {
    pub ty: Type,
    pub aliases: Names,
    pub occurrences: Vec<Occurrence>,
}

pub(crate) fn message(prefix: &str, payload: impl fmt::Display) -> String {
    format!("{prefix} {payload}")
}

fn fmt_list<T: fmt::Display>(xs: &[T]) -> String {
    xs.iter()
        .map(|x| x.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// The checking context: variable and function tables, the breadcrumb
/// stack, the occurrence accumulator and the uniqueness toggle.
pub struct TypeChecker<L: Checkable> {
    vtable: HashMap<VName, NameInfo<L>>,
    ftable: HashMap<String, FunBinding<L>>,
    check_occurrences: bool,
    breadcrumbs: Vec<String>,
    dataflow: Consumption,
}

impl<L: Checkable> TypeChecker<L> {
    pub fn new(ftable: HashMap<String, FunBinding<L>>, check_occurrences: bool) -> Self {
        TypeChecker {
            vtable: HashMap::new(),
            ftable,
            check_occurrences,
            breadcrumbs: Vec::new(),
            dataflow: Consumption::default(),
        }
    }

    // ---- context and failure ----------------------------------------

    /// Fail with the breadcrumbs as they stand at the raise site.
    pub fn bad(&self, case: ErrorCase) -> TypeError {
        TypeError {
            breadcrumbs: self.breadcrumbs.clone(),
            case,
        }
    }

    /// Run `f` with `label` pushed onto the breadcrumb stack.
    pub fn context<T>(
        &mut self,
        label: String,
        f: impl FnOnce(&mut Self) -> Result<T, TypeError>,
    ) -> Result<T, TypeError> {
        self.breadcrumbs.push(label);
        let result = f(self);
        self.breadcrumbs.pop();
        result
    }

    // ---- the environment --------------------------------------------

    pub fn lookup_var(&self, name: &VName) -> Result<&NameInfo<L>, TypeError> {
        self.vtable.get(name).ok_or_else(|| {
            self.bad(ErrorCase::UnknownVariableError { name: name.clone() })
        })
    }

    pub fn lookup_type(&self, name: &VName) -> Result<Type, TypeError> {
        Ok(self.lookup_var(name)?.ty())
    }

    /// The alias set of `name`, reflexive and transitively closed.
    pub fn lookup_aliases(&self, name: &VName) -> Result<Names, TypeError> {
        let mut aliases = match self.lookup_var(name)? {
            NameInfo::Let { aliases, .. } => aliases.clone(),
            _ => Names::new(),
        };
        aliases.insert(name.clone());
        Ok(aliases)
    }

    /// Union `names` with the alias sets of its members. Sets in the
    /// table are closed on insertion, so one level suffices.
    pub fn expand_aliases(&self, names: &Names) -> Names {
        let mut out = names.clone();
        for n in names.iter() {
            if let Some(NameInfo::Let { aliases, .. }) = self.vtable.get(n) {
                out.extend_with(aliases);
            }
        }
        out
    }

    /// Bind `scope`, run `f`, then unbind. Rebinding a name already in
    /// scope is an error. Let-bound alias annotations are expanded
    /// against the environment and symmetrised; occurrences of the
    /// bound names do not escape.
    fn binding<T>(
        &mut self,
        scope: Vec<(VName, NameInfo<L>)>,
        f: impl FnOnce(&mut Self) -> Result<T, TypeError>,
    ) -> Result<T, TypeError> {
        let mut bound_names = Names::new();
        for (name, _) in &scope {
            if self.vtable.contains_key(name) || bound_names.contains(name) {
                return Err(self.bad(ErrorCase::TypeError(format!(
                    "variable {name} is bound twice"
                ))));
            }
            bound_names.insert(name.clone());
        }
        let mut inserted: Vec<VName> = Vec::with_capacity(scope.len());
        let mut symmetrised: Vec<(VName, VName)> = Vec::new();
        for (name, mut info) in scope {
            if let NameInfo::Let { aliases, ty, .. } = &mut info {
                if ty.is_prim() {
                    *aliases = Names::new();
                } else {
                    *aliases = self.expand_aliases(aliases);
                }
                let expanded = aliases.clone();
                for al in expanded.iter() {
                    if let Some(NameInfo::Let { aliases: other, .. }) = self.vtable.get_mut(al) {
                        other.insert(name.clone());
                        symmetrised.push((al.clone(), name.clone()));
                    }
                }
            }
            self.vtable.insert(name.clone(), info);
            inserted.push(name);
        }
        let result = (|ck: &mut Self| {
            let (value, occurrences) = ck.collect_occurrences(f)?;
            ck.occur(unoccur(&bound_names, occurrences));
            Ok(value)
        })(self);
        for name in inserted {
            self.vtable.remove(&name);
        }
        for (holder, added) in symmetrised {
            if let Some(NameInfo::Let { aliases, .. }) = self.vtable.get_mut(&holder) {
                aliases.remove(&added);
            }
        }
        result
    }

    // ---- occurrences ------------------------------------------------

    /// Append occurrences to the log. Detection of consumed-then-used
    /// names follows the uniqueness toggle.
    pub fn occur(&mut self, occurrences: Vec<Occurrence>) {
        let detect = self.check_occurrences;
        let current = mem::take(&mut self.dataflow);
        self.dataflow =
            current.seq_checked(Consumption::from_occurrences(occurrences), detect);
    }

    /// Record that `name` (and everything it aliases) was observed.
    /// Primitive values carry no aliases and leave no trace.
    pub fn observe(&mut self, name: &VName) -> Result<(), TypeError> {
        let ty = self.lookup_type(name)?;
        if !ty.is_prim() {
            let aliases = self.lookup_aliases(name)?;
            self.occur(vec![Occurrence::observation(aliases)]);
        }
        Ok(())
    }

    /// Record the consumption of an alias set.
    pub fn consume(&mut self, aliases: Names) {
        self.occur(vec![Occurrence::consumption(aliases)]);
    }

    fn check_consumption(&self, c: Consumption) -> Result<Vec<Occurrence>, TypeError> {
        match c {
            Consumption::Error(name) => {
                if self.check_occurrences {
                    Err(self.bad(ErrorCase::UseAfterConsume { name }))
                } else {
                    Ok(Vec::new())
                }
            }
            Consumption::Occurrences(occurrences) => Ok(occurrences),
        }
    }

    /// Run `f` with an empty log and hand back what it accumulated.
    pub fn collect_occurrences<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, TypeError>,
    ) -> Result<(T, Vec<Occurrence>), TypeError> {
        let saved = mem::take(&mut self.dataflow);
        let value = f(self);
        let collected = mem::replace(&mut self.dataflow, saved);
        let value = value?;
        let occurrences = self.check_consumption(collected)?;
        Ok((value, occurrences))
    }

    /// Run `f` and discard its occurrences entirely.
    fn no_dataflow<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, TypeError>,
    ) -> Result<T, TypeError> {
        Ok(self.collect_occurrences(f)?.0)
    }

    /// Compose the effects of two alternative computations.
    pub fn alternative(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<(), TypeError>,
        g: impl FnOnce(&mut Self) -> Result<(), TypeError>,
    ) -> Result<(), TypeError> {
        let ((), first) = self.collect_occurrences(f)?;
        let ((), then) = self.collect_occurrences(g)?;
        self.occur(alt_occurrences(first, then));
        Ok(())
    }

    /// Restrict what `f` may consume. A consumption of a consumable
    /// name is replaced by that name's associated alias set; any other
    /// consumption is an error.
    pub fn consume_only_params<T>(
        &mut self,
        consumable: Vec<(VName, Names)>,
        f: impl FnOnce(&mut Self) -> Result<T, TypeError>,
    ) -> Result<T, TypeError> {
        let (value, occurrences) = self.collect_occurrences(f)?;
        let mut rewritten = Vec::with_capacity(occurrences.len());
        for occ in occurrences {
            let mut consumed = Names::new();
            for name in occ.consumed.iter() {
                match consumable.iter().find(|(c, _)| c == name) {
                    Some((_, aliases)) => consumed.extend_with(aliases),
                    None if self.check_occurrences => {
                        return Err(self.bad(ErrorCase::TypeError(format!(
                            "variable {name} was invalidly consumed; only unique function or merge parameters may be consumed here"
                        ))));
                    }
                    None => {}
                }
            }
            rewritten.push(Occurrence {
                observed: occ.observed,
                consumed,
            });
        }
        self.occur(rewritten);
        Ok(value)
    }

    // ---- leaves and requirements ------------------------------------

    /// The type of a subexpression without recording an observation.
    pub fn sub_exp_type(&self, se: &SubExp) -> Result<Type, TypeError> {
        match se {
            SubExp::Constant(v) => Ok(Type::Prim(v.prim_type())),
            SubExp::Var(v) => self.lookup_type(v),
        }
    }

    /// Check a subexpression, recording the observation.
    pub fn check_sub_exp(&mut self, se: &SubExp) -> Result<Type, TypeError> {
        if let SubExp::Var(v) = se {
            self.observe(v)?;
        }
        self.sub_exp_type(se)
    }

    /// Check a subexpression and demand one of the given types.
    pub fn require(&mut self, allowed: &[Type], se: &SubExp) -> Result<Type, TypeError> {
        let t = self.check_sub_exp(se)?;
        if !allowed.contains(&t) {
            return Err(self.bad(ErrorCase::UnexpectedType {
                exp: se.to_string(),
                got: t,
                allowed: allowed.to_vec(),
            }));
        }
        Ok(t)
    }

    /// `require` for a variable.
    pub fn require_var(&mut self, allowed: &[Type], name: &VName) -> Result<Type, TypeError> {
        self.require(allowed, &SubExp::Var(name.clone()))
    }

    fn require_i32(&mut self, se: &SubExp) -> Result<(), TypeError> {
        self.require(&[Type::Prim(INT32)], se)?;
        Ok(())
    }

    fn check_certs(&mut self, certs: &[VName]) -> Result<(), TypeError> {
        for c in certs {
            self.require_var(&[Type::Prim(PrimType::Cert)], c)?;
        }
        Ok(())
    }

    /// Look up an array operand; scalars are rejected.
    fn check_array_operand(&mut self, name: &VName) -> Result<Type, TypeError> {
        self.observe(name)?;
        let t = self.lookup_type(name)?;
        if t.is_prim() {
            return Err(self.bad(ErrorCase::NotAnArray {
                name: name.clone(),
                ty: t,
            }));
        }
        Ok(t)
    }

    // ---- arguments and calls ----------------------------------------

    /// Check a call argument, holding its occurrences back for the
    /// caller to interleave with diet-driven consumption.
    pub fn check_arg(&mut self, se: &SubExp) -> Result<Arg, TypeError> {
        let (ty, occurrences) = self.collect_occurrences(|ck| ck.check_sub_exp(se))?;
        let aliases = match se {
            SubExp::Var(v) => self.lookup_aliases(v)?,
            SubExp::Constant(_) => Names::new(),
        };
        Ok(Arg {
            ty,
            aliases,
            occurrences,
        })
    }

    /// Check arguments against declared parameter types, then replay
    /// each argument's occurrences and consume what `Consume`-dieted
    /// parameters take.
    pub fn check_funcall(
        &mut self,
        fname: Option<&str>,
        params: &[Type],
        args: Vec<Arg>,
    ) -> Result<(), TypeError> {
        let got: Vec<Type> = args.iter().map(|a| a.ty.clone()).collect();
        if !ranks_compatible(&got, params) {
            return Err(self.bad(ErrorCase::ParameterMismatch {
                func: fname.map(String::from),
                expected: params.to_vec(),
                got,
            }));
        }
        for (param, arg) in params.iter().zip(args) {
            self.occur(arg.occurrences);
            if param.diet() == Diet::Consume {
                self.consume(arg.aliases);
            }
        }
        Ok(())
    }

    /// Check the array arguments of a SOAC: each must be an array with
    /// the combinator's width as its outer size. The returned arguments
    /// are row-typed, the way the combinator presents them to its
    /// lambda.
    pub fn check_soac_array_args(
        &mut self,
        width: &SubExp,
        arrays: &[VName],
    ) -> Result<Vec<Arg>, TypeError> {
        let mut out = Vec::with_capacity(arrays.len());
        for v in arrays {
            let t = self.lookup_type(v)?;
            let outer_ok = match &t {
                Type::Array { shape, .. } => shape.dims.first() == Some(width),
                Type::Prim(_) => {
                    return Err(self.bad(ErrorCase::NotAnArray {
                        name: v.clone(),
                        ty: t,
                    }))
                }
            };
            if !outer_ok {
                return Err(self.bad(ErrorCase::TypeError(format!(
                    "array {v} does not have outer size {width}"
                ))));
            }
            let (_, occurrences) = self.collect_occurrences(|ck| ck.observe(v))?;
            let aliases = self.lookup_aliases(v)?;
            out.push(Arg {
                ty: t.row_type(),
                aliases,
                occurrences,
            });
        }
        Ok(out)
    }

    // ---- the function/loop/lambda harness ---------------------------

    /// The common scaffold for checking anything callable: parameters
    /// are bound, `inner` checks the body and returns the alias sets
    /// of its results, consumption is restricted to `consumable`, and
    /// unique results must not alias anything else returned or any
    /// parameter that is not consumed.
    pub fn check_fun_harness(
        &mut self,
        fname: &str,
        ret: &[ExtType],
        scope: Vec<(VName, NameInfo<L>)>,
        consumable: Vec<(VName, Names)>,
        inner: impl FnOnce(&mut Self) -> Result<Vec<Names>, TypeError>,
    ) -> Result<(), TypeError> {
        let mut seen = Names::new();
        for (name, _) in &scope {
            if seen.contains(name) {
                return Err(self.bad(ErrorCase::DupParamError {
                    func: fname.to_string(),
                    param: name.clone(),
                }));
            }
            seen.insert(name.clone());
        }
        let fname = fname.to_string();
        let ret = ret.to_vec();
        self.binding(scope, |ck| {
            ck.consume_only_params(consumable, |ck| {
                let body_aliases = inner(ck)?;
                ck.check_return_aliases(&fname, &ret, &body_aliases)
            })
        })
    }

    /// The unique-return aliasing fold of the harness.
    fn check_return_aliases(
        &mut self,
        fname: &str,
        ret: &[ExtType],
        body_aliases: &[Names],
    ) -> Result<(), TypeError> {
        // names bound inside the body are gone; only function-level
        // names can witness an aliasing violation
        let aliases: Vec<Names> = body_aliases
            .iter()
            .map(|names| {
                let mut names = names.clone();
                names.retain(|v| self.vtable.contains_key(v));
                names
            })
            .collect();
        let mut seen_any = Names::new();
        let mut seen_unique = Names::new();
        for (t, names) in ret.iter().zip(&aliases) {
            match t.uniqueness() {
                Uniqueness::Unique => {
                    if names.iter().any(|v| seen_any.contains(v)) {
                        return Err(self.bad(ErrorCase::UniqueReturnAliased {
                            func: fname.to_string(),
                        }));
                    }
                    self.consume(names.clone());
                    seen_any.extend_with(names);
                    seen_unique.extend_with(names);
                }
                Uniqueness::Nonunique => {
                    if names.iter().any(|v| seen_unique.contains(v)) {
                        return Err(self.bad(ErrorCase::UniqueReturnAliased {
                            func: fname.to_string(),
                        }));
                    }
                    seen_any.extend_with(names);
                }
            }
        }
        // a unique return may not alias a parameter the function does
        // not consume
        for (t, names) in ret.iter().zip(&aliases) {
            if t.uniqueness() != Uniqueness::Unique {
                continue;
            }
            for v in names.iter() {
                if let Some(NameInfo::FParam { ty, .. }) = self.vtable.get(v) {
                    if !ty.is_unique() {
                        return Err(self.bad(ErrorCase::ReturnAliased {
                            func: fname.to_string(),
                            name: v.clone(),
                        }));
                    }
                }
            }
        }
        Ok(())
    }

    /// Check every parameter: flavor attribute, then shape dimensions.
    pub fn check_fun_params(&mut self, params: &[Param<L::FParamAttr>]) -> Result<(), TypeError> {
        for p in params {
            self.context(message("In function parameter", p), |ck| {
                L::check_fparam_attr(ck, &p.name, &p.attr)?;
                ck.check_param_dims(&p.ty)
            })?;
        }
        Ok(())
    }

    fn check_lambda_params(&mut self, params: &[Param<L::LParamAttr>]) -> Result<(), TypeError> {
        for p in params {
            self.context(message("In anonymous function parameter", p), |ck| {
                L::check_lparam_attr(ck, &p.name, &p.attr)?;
                ck.check_param_dims(&p.ty)
            })?;
        }
        Ok(())
    }

    fn check_param_dims(&mut self, ty: &Type) -> Result<(), TypeError> {
        if let Type::Array { shape, .. } = ty {
            for d in &shape.dims {
                self.require_i32(d)?;
            }
        }
        Ok(())
    }

    /// Free dimensions of a declared return type must be `i32`s in
    /// scope.
    pub fn check_ret_type_dims(&mut self, ret: &[ExtType]) -> Result<(), TypeError> {
        for t in ret {
            if let ExtType::Array { shape, .. } = t {
                for d in &shape.dims {
                    if let ExtDim::Free(se) = d {
                        self.require_i32(se)?;
                    }
                }
            }
        }
        Ok(())
    }

    // ---- functions, bodies, statements ------------------------------

    fn check_fun(&mut self, fun: &FunDef<L>) -> Result<(), TypeError> {
        self.context(message("In function", &fun.name), |ck| {
            let scope: Vec<(VName, NameInfo<L>)> = fun
                .params
                .iter()
                .map(|p| {
                    (
                        p.name.clone(),
                        NameInfo::FParam {
                            ty: p.ty.clone(),
                            attr: p.attr.clone(),
                        },
                    )
                })
                .collect();
            let consumable: Vec<(VName, Names)> = fun
                .params
                .iter()
                .filter(|p| p.ty.is_unique())
                .map(|p| (p.name.clone(), Names::new()))
                .collect();
            ck.check_fun_harness(&fun.name, &fun.ret, scope, consumable, |ck| {
                ck.check_fun_params(&fun.params)?;
                L::check_ret_type(ck, &fun.ret)?;
                ck.context("When checking function body".to_string(), |ck| {
                    ck.check_fun_body(&fun.name, &fun.ret, &fun.body)
                })
            })
        })
    }

    /// Check a body and return the alias sets of its results, then
    /// match the result against the declared return type.
    pub fn check_fun_body(
        &mut self,
        fname: &str,
        ret: &[ExtType],
        body: &Body<L>,
    ) -> Result<Vec<Names>, TypeError> {
        let aliases = self.check_body(body)?;
        self.context(
            "When matching declared return type to body result".to_string(),
            |ck| L::match_return_type(ck, fname, ret, body),
        )?;
        Ok(aliases)
    }

    /// Check a body and return the alias sets of its results.
    pub fn check_body(&mut self, body: &Body<L>) -> Result<Vec<Names>, TypeError> {
        L::check_body_attr(self, &body.attr)?;
        self.check_stmts(&body.stmts, &mut |ck| {
            for se in &body.result {
                ck.check_sub_exp(se)?;
            }
            let mut aliases = Vec::with_capacity(body.result.len());
            for se in &body.result {
                aliases.push(match se {
                    SubExp::Var(v) => ck.lookup_aliases(v)?,
                    SubExp::Constant(_) => Names::new(),
                });
            }
            Ok(aliases)
        })
    }

    fn check_stmts<T>(
        &mut self,
        stmts: &[Stmt<L>],
        and_then: &mut dyn FnMut(&mut Self) -> Result<T, TypeError>,
    ) -> Result<T, TypeError> {
        let Some((stmt, rest)) = stmts.split_first() else {
            return and_then(self);
        };
        self.context(message("In expression of let-binding", &stmt.pattern), |ck| {
            ck.check_exp(&stmt.exp)
        })?;
        L::check_exp_attr(self, &stmt.attr)?;
        self.context(message("When matching pattern", &stmt.pattern), |ck| {
            L::match_pattern(ck, &stmt.pattern, &stmt.exp)
        })?;
        let scope: Vec<(VName, NameInfo<L>)> = stmt
            .pattern
            .elems
            .iter()
            .map(|pe| {
                (
                    pe.name.clone(),
                    NameInfo::Let {
                        aliases: pe.aliases.clone(),
                        ty: pe.ty.clone(),
                        attr: pe.attr.clone(),
                    },
                )
            })
            .collect();
        self.binding(scope, |ck| {
            for pe in &stmt.pattern.elems {
                L::check_let_bound_attr(ck, &pe.name, &pe.attr)?;
            }
            ck.check_stmts(rest, and_then)
        })
    }

    // ---- expressions ------------------------------------------------

    pub fn check_exp(&mut self, exp: &Exp<L>) -> Result<(), TypeError> {
        match exp {
            Exp::SubExp(se) => {
                self.check_sub_exp(se)?;
            }
            Exp::ArrayLit { elems, elem_ty } => {
                if let Some((first, rest)) = elems.split_first() {
                    let t0 = self.check_sub_exp(first)?;
                    for e in rest {
                        let te = self.check_sub_exp(e)?;
                        if te != t0 {
                            return Err(self.bad(ErrorCase::UnifyError {
                                e1: first.to_string(),
                                t1: t0,
                                e2: e.to_string(),
                                t2: te,
                            }));
                        }
                    }
                    if t0 != *elem_ty {
                        return Err(self.bad(ErrorCase::TypeError(format!(
                            "array literal elements have type {t0}, but the annotation says {elem_ty}"
                        ))));
                    }
                }
            }
            Exp::BinOp { op, x, y } => {
                let t = Type::Prim(op.operand_type());
                self.require(&[t.clone()], x)?;
                self.require(&[t], y)?;
            }
            Exp::UnOp { op, x } => {
                self.require(&[Type::Prim(op.operand_type())], x)?;
            }
            Exp::CmpOp { op, x, y } => {
                let t = Type::Prim(op.operand_type());
                self.require(&[t.clone()], x)?;
                self.require(&[t], y)?;
            }
            Exp::ConvOp { op, x } => {
                self.require(&[Type::Prim(op.from_type())], x)?;
            }
            Exp::Index {
                certs,
                array,
                indexes,
            } => {
                self.check_certs(certs)?;
                self.observe(array)?;
                let t = self.lookup_type(array)?;
                if t.rank() < indexes.len() {
                    return Err(self.bad(ErrorCase::IndexingError {
                        rank: t.rank(),
                        got: indexes.len(),
                    }));
                }
                for i in indexes {
                    self.require_i32(i)?;
                }
            }
            Exp::Iota { n } => {
                self.require_i32(n)?;
            }
            Exp::Replicate { n, value } => {
                self.require_i32(n)?;
                self.check_sub_exp(value)?;
            }
            Exp::Scratch { dims, .. } => {
                for d in dims {
                    self.require_i32(d)?;
                }
            }
            Exp::Reshape {
                certs,
                new_shape,
                array,
            } => {
                self.check_certs(certs)?;
                for d in new_shape {
                    self.require_i32(d)?;
                }
                self.check_array_operand(array)?;
            }
            Exp::Rearrange { certs, perm, array } => {
                self.check_certs(certs)?;
                let t = self.check_array_operand(array)?;
                let rank = t.rank();
                let mut hit = vec![false; rank];
                let valid = perm.len() == rank
                    && perm.iter().all(|&i| {
                        if i < rank && !hit[i] {
                            hit[i] = true;
                            true
                        } else {
                            false
                        }
                    });
                if !valid {
                    return Err(self.bad(ErrorCase::PermutationError {
                        perm: perm.clone(),
                        rank,
                        array: Some(array.clone()),
                    }));
                }
            }
            Exp::Split {
                certs,
                sizes,
                array,
            } => {
                // split sizes are not checked against the outer
                // dimension; the shape context discharges that
                self.check_certs(certs)?;
                for s in sizes {
                    self.require_i32(s)?;
                }
                self.check_array_operand(array)?;
            }
            Exp::Concat {
                certs,
                first,
                rest,
                result_size,
            } => {
                self.check_certs(certs)?;
                let t = self.check_array_operand(first)?;
                let row = t.row_type();
                for other in rest {
                    let ot = self.check_array_operand(other)?;
                    if ot.row_type() != row {
                        return Err(self.bad(ErrorCase::TypeError(
                            "types of arguments to concat do not match".to_string(),
                        )));
                    }
                }
                self.require_i32(result_size)?;
            }
            Exp::Copy { array } => {
                self.observe(array)?;
            }
            Exp::Assert { cond } => {
                self.require(&[Type::Prim(PrimType::Bool)], cond)?;
            }
            Exp::Partition {
                certs,
                flags,
                arrays,
                ..
            } => {
                self.check_certs(certs)?;
                let ft = self.check_array_operand(flags)?;
                if ft.rank() != 1 || ft.elem_type() != INT32 {
                    return Err(self.bad(ErrorCase::TypeError(format!(
                        "flag array of partition has type {ft}; expected a vector of i32"
                    ))));
                }
                for a in arrays {
                    self.check_array_operand(a)?;
                }
            }
            Exp::If {
                cond,
                then_body,
                else_body,
                ret,
            } => {
                self.require(&[Type::Prim(PrimType::Bool)], cond)?;
                self.alternative(
                    |ck| ck.check_body(then_body).map(|_| ()),
                    |ck| ck.check_body(else_body).map(|_| ()),
                )?;
                let then_ts = self.body_ext_type(then_body)?;
                let else_ts = self.body_ext_type(else_body)?;
                let combined = generalize_ext_types(&then_ts, &else_ts);
                if then_ts.len() != else_ts.len() || !ext_subtypes_of(&combined, ret) {
                    return Err(self.bad(ErrorCase::TypeError(format!(
                        "branches of conditional have types {{{}}} and {{{}}}, which do not fit the annotated {{{}}}",
                        fmt_list(&then_ts),
                        fmt_list(&else_ts),
                        fmt_list(ret)
                    ))));
                }
            }
            Exp::Apply { func, args, ret } => {
                let fb = match self.ftable.get(func) {
                    Some(fb) => fb.clone(),
                    None => {
                        return Err(self.bad(ErrorCase::UnknownFunctionError {
                            func: func.clone(),
                        }))
                    }
                };
                let mut arg_vals = Vec::with_capacity(args.len());
                for a in args {
                    arg_vals.push(self.check_arg(a)?);
                }
                let param_names: Vec<VName> =
                    fb.params.iter().map(|p| p.name.clone()).collect();
                let param_tys: Vec<Type> = fb.params.iter().map(|p| p.ty.clone()).collect();
                match apply_ret_type(&fb.ret, &param_names, args) {
                    None => {
                        return Err(self.bad(ErrorCase::ParameterMismatch {
                            func: Some(func.clone()),
                            expected: param_tys,
                            got: arg_vals.into_iter().map(|a| a.ty).collect(),
                        }))
                    }
                    Some(derived) => {
                        if derived != *ret {
                            return Err(self.bad(ErrorCase::BadAnnotation {
                                desc: "return type".to_string(),
                                expected: ret.clone(),
                                got: derived,
                            }));
                        }
                    }
                }
                self.check_funcall(Some(func), &param_tys, arg_vals)?;
            }
            Exp::DoLoop { merge, form, body } => self.check_do_loop(merge, form, body)?,
            Exp::Op(op) => L::check_op(self, op)?,
        }
        Ok(())
    }

    /// A loop is checked as an anonymous function applied to its merge
    /// arguments. Unique merge parameters are the only consumables
    /// inside the body.
    fn check_do_loop(
        &mut self,
        merge: &[(Param<L::FParamAttr>, SubExp)],
        form: &LoopForm,
        body: &Body<L>,
    ) -> Result<(), TypeError> {
        let mut param_tys: Vec<Type> = Vec::with_capacity(merge.len() + 1);
        let mut args: Vec<Arg> = Vec::with_capacity(merge.len() + 1);
        let mut scope: Vec<(VName, NameInfo<L>)> = Vec::with_capacity(merge.len() + 1);
        match form {
            LoopForm::For { var, bound } => {
                let bound_arg = self.check_arg(bound)?;
                if bound_arg.ty != Type::Prim(INT32) {
                    return Err(self.bad(ErrorCase::UnexpectedType {
                        exp: bound.to_string(),
                        got: bound_arg.ty,
                        allowed: vec![Type::Prim(INT32)],
                    }));
                }
                param_tys.push(Type::Prim(INT32));
                args.push(bound_arg);
                scope.push((var.clone(), NameInfo::IndexVar));
            }
            LoopForm::While(cond) => match merge.iter().find(|(p, _)| p.name == *cond) {
                Some((p, _)) => {
                    if p.ty != Type::Prim(PrimType::Bool) {
                        return Err(self.bad(ErrorCase::UnexpectedType {
                            exp: cond.to_string(),
                            got: p.ty.clone(),
                            allowed: vec![Type::Prim(PrimType::Bool)],
                        }));
                    }
                }
                None => {
                    return Err(self.bad(ErrorCase::TypeError(format!(
                        "conditional variable {cond} is not a merge parameter"
                    ))))
                }
            },
        }
        for (p, init) in merge {
            param_tys.push(p.ty.clone());
            args.push(self.check_arg(init)?);
            scope.push((
                p.name.clone(),
                NameInfo::FParam {
                    ty: p.ty.clone(),
                    attr: p.attr.clone(),
                },
            ));
        }
        self.check_funcall(None, &param_tys, args)?;
        let ret_tys: Vec<Type> = merge.iter().map(|(p, _)| p.ty.clone()).collect();
        let ret = static_shapes(&ret_tys);
        let consumable: Vec<(VName, Names)> = merge
            .iter()
            .filter(|(p, _)| p.ty.is_unique())
            .map(|(p, _)| (p.name.clone(), Names::new()))
            .collect();
        let merge_params: Vec<Param<L::FParamAttr>> =
            merge.iter().map(|(p, _)| p.clone()).collect();
        self.context("Inside the loop body".to_string(), |ck| {
            ck.check_fun_harness("<loop body>", &ret, scope, consumable, |ck| {
                ck.check_fun_params(&merge_params)?;
                ck.check_fun_body("<loop body>", &ret, body)
            })
        })
    }

    /// Check a lambda against already-checked arguments.
    pub fn check_lambda(&mut self, lambda: &Lambda<L>, args: Vec<Arg>) -> Result<(), TypeError> {
        let ret = static_shapes(&lambda.ret);
        self.check_anon_fun(&lambda.params, &lambda.body, &ret, args)
    }

    /// Check a lambda whose return type may be existential.
    pub fn check_ext_lambda(
        &mut self,
        lambda: &ExtLambda<L>,
        args: Vec<Arg>,
    ) -> Result<(), TypeError> {
        self.check_anon_fun(&lambda.params, &lambda.body, &lambda.ret, args)
    }

    fn check_anon_fun(
        &mut self,
        params: &[Param<L::LParamAttr>],
        body: &Body<L>,
        ret: &[ExtType],
        args: Vec<Arg>,
    ) -> Result<(), TypeError> {
        let param_tys: Vec<Type> = params.iter().map(|p| p.ty.clone()).collect();
        self.check_funcall(None, &param_tys, args)?;
        let scope: Vec<(VName, NameInfo<L>)> = params
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    NameInfo::LParam {
                        ty: p.ty.clone(),
                        attr: p.attr.clone(),
                    },
                )
            })
            .collect();
        self.context("In anonymous function".to_string(), |ck| {
            // lambdas may not consume anything
            ck.check_fun_harness("<anonymous function>", ret, scope, Vec::new(), |ck| {
                ck.check_lambda_params(params)?;
                ck.check_fun_body("<anonymous function>", ret, body)
            })
        })
    }

    // ---- static result typing ---------------------------------------

    /// The statically known result types of an expression, existential
    /// where sizes are not known from the outside.
    pub fn exp_ext_type(&self, exp: &Exp<L>) -> Result<Vec<ExtType>, TypeError> {
        let prim = |t: PrimType| Ok(vec![ExtType::Prim(t)]);
        match exp {
            Exp::SubExp(se) => Ok(static_shapes(&[self.sub_exp_type(se)?])),
            Exp::ArrayLit { elems, elem_ty } => Ok(static_shapes(&[Type::array_of(
                elem_ty,
                SubExp::int32(elems.len() as i64),
                Uniqueness::Nonunique,
            )])),
            Exp::BinOp { op, .. } => prim(op.result_type()),
            Exp::UnOp { op, .. } => prim(op.result_type()),
            Exp::CmpOp { .. } => prim(PrimType::Bool),
            Exp::ConvOp { op, .. } => prim(op.to_type()),
            Exp::Index { array, indexes, .. } => {
                let t = self.lookup_type(array)?;
                Ok(static_shapes(&[t.strip_dims(indexes.len())]))
            }
            Exp::Iota { n } => Ok(static_shapes(&[Type::array(
                INT32,
                vec![n.clone()],
                Uniqueness::Nonunique,
            )])),
            Exp::Replicate { n, value } => {
                let vt = self.sub_exp_type(value)?;
                Ok(static_shapes(&[Type::array_of(
                    &vt,
                    n.clone(),
                    Uniqueness::Nonunique,
                )]))
            }
            Exp::Scratch { elem, dims } => Ok(static_shapes(&[Type::array(
                *elem,
                dims.clone(),
                Uniqueness::Nonunique,
            )])),
            Exp::Reshape {
                new_shape, array, ..
            } => {
                let t = self.lookup_type(array)?;
                Ok(static_shapes(&[Type::array(
                    t.elem_type(),
                    new_shape.clone(),
                    Uniqueness::Nonunique,
                )]))
            }
            Exp::Rearrange { perm, array, .. } => {
                let t = self.lookup_type(array)?;
                match &t {
                    Type::Array { elem, shape, .. } => {
                        let dims: Option<Vec<SubExp>> =
                            perm.iter().map(|&i| shape.dims.get(i).cloned()).collect();
                        match dims {
                            Some(dims) => Ok(static_shapes(&[Type::array(
                                *elem,
                                dims,
                                Uniqueness::Nonunique,
                            )])),
                            None => Ok(static_shapes(&[t.clone()])),
                        }
                    }
                    Type::Prim(_) => Ok(static_shapes(&[t.clone()])),
                }
            }
            Exp::Split { sizes, array, .. } => {
                let t = self.lookup_type(array)?;
                let parts: Vec<Type> = sizes.iter().map(|s| t.set_outer_dim(s.clone())).collect();
                Ok(static_shapes(&parts))
            }
            Exp::Concat {
                first, result_size, ..
            } => {
                let t = self.lookup_type(first)?;
                Ok(static_shapes(&[t.set_outer_dim(result_size.clone())]))
            }
            Exp::Copy { array } => Ok(static_shapes(&[self.lookup_type(array)?])),
            Exp::Assert { .. } => prim(PrimType::Cert),
            Exp::Partition { n, arrays, .. } => {
                let mut ts = vec![Type::Prim(INT32); *n];
                for a in arrays {
                    ts.push(self.lookup_type(a)?);
                }
                Ok(static_shapes(&ts))
            }
            Exp::If { ret, .. } => Ok(ret.clone()),
            Exp::Apply { ret, .. } => Ok(ret
                .iter()
                .map(|t| t.clone().set_uniqueness(Uniqueness::Nonunique))
                .collect()),
            Exp::DoLoop { merge, form, .. } => {
                let mut bound: Names = merge.iter().map(|(p, _)| p.name.clone()).collect();
                if let LoopForm::For { var, .. } = form {
                    bound.insert(var.clone());
                }
                let ts: Vec<Type> = merge
                    .iter()
                    .map(|(p, _)| p.ty.clone().set_uniqueness(Uniqueness::Nonunique))
                    .collect();
                Ok(existentialize(&bound, static_shapes(&ts)))
            }
            Exp::Op(op) => Ok(L::op_ext_type(op)),
        }
    }

    /// The statically known result types of a body: dimensions that
    /// name a binding local to the body become existential.
    pub fn body_ext_type(&self, body: &Body<L>) -> Result<Vec<ExtType>, TypeError> {
        let mut local: Vec<(VName, Type)> = Vec::new();
        let mut bound = Names::new();
        for stmt in &body.stmts {
            for pe in &stmt.pattern.elems {
                local.push((pe.name.clone(), pe.ty.clone()));
                bound.insert(pe.name.clone());
            }
        }
        let mut ts = Vec::with_capacity(body.result.len());
        for se in &body.result {
            let t = match se {
                SubExp::Constant(v) => Type::Prim(v.prim_type()),
                SubExp::Var(v) => match local.iter().find(|(n, _)| n == v) {
                    Some((_, t)) => t.clone(),
                    None => self.lookup_type(v)?,
                },
            };
            ts.push(t);
        }
        Ok(existentialize(&bound, static_shapes(&ts)))
    }

    // ---- default match hooks ----------------------------------------

    /// The default pattern match: the expression's result types must
    /// fit the pattern's declared types, instantiating existential
    /// dimensions consistently.
    pub fn match_pattern_default(
        &mut self,
        pattern: &Pattern<L>,
        exp: &Exp<L>,
    ) -> Result<(), TypeError> {
        let mut seen = Names::new();
        for name in pattern.names() {
            if seen.contains(name) {
                return Err(self.bad(ErrorCase::DupPatternError { name: name.clone() }));
            }
            seen.insert(name.clone());
        }
        let ts = self.exp_ext_type(exp)?;
        if pattern.elems.len() != ts.len() {
            return Err(self.bad(ErrorCase::InvalidPatternError {
                pattern: pattern.to_string(),
                types: ts,
                note: Some("wrong number of bindings".to_string()),
            }));
        }
        let mut inst: Vec<(usize, SubExp)> = Vec::new();
        for (pe, et) in pattern.elems.iter().zip(&ts) {
            let ok = match (&pe.ty, et) {
                (Type::Prim(a), ExtType::Prim(b)) => a == b,
                (
                    Type::Array {
                        elem: e1, shape, ..
                    },
                    ExtType::Array {
                        elem: e2,
                        shape: ext_shape,
                        ..
                    },
                ) => {
                    e1 == e2
                        && shape.rank() == ext_shape.rank()
                        && shape.dims.iter().zip(&ext_shape.dims).all(|(d, ed)| match ed {
                            ExtDim::Free(se) => d == se,
                            ExtDim::Ext(i) => {
                                if let Some((_, prior)) = inst.iter().find(|(j, _)| j == i) {
                                    prior == d
                                } else {
                                    inst.push((*i, d.clone()));
                                    true
                                }
                            }
                        })
                }
                _ => false,
            };
            if !ok {
                return Err(self.bad(ErrorCase::InvalidPatternError {
                    pattern: pattern.to_string(),
                    types: ts.clone(),
                    note: None,
                }));
            }
        }
        Ok(())
    }

    /// The default return match: element types and ranks must line up;
    /// exact sizes are compared rank-shaped.
    pub fn match_return_type_default(
        &mut self,
        fname: &str,
        ret: &[ExtType],
        body: &Body<L>,
    ) -> Result<(), TypeError> {
        let body_ts = self.body_ext_type(body)?;
        if !ext_ranks_compatible(&body_ts, ret) {
            return Err(self.bad(ErrorCase::ReturnTypeError {
                func: fname.to_string(),
                declared: ret.to_vec(),
                got: body_ts,
            }));
        }
        Ok(())
    }
}
