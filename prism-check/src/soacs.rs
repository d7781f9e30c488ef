#![forbid(unsafe_code)]

use prism_ir::{ranks_compatible, ExtType, Param, PrimType, Soac, Soacs, Type, VName, INT32};

use crate::capability::Checkable;
use crate::check::{Arg, TypeChecker};
use crate::error::{ErrorCase, TypeError};

impl Checkable for Soacs {
    fn prim_fparam(name: VName, t: PrimType) -> Param<()> {
        Param::new(name, Type::Prim(t), ())
    }

    fn check_op(ck: &mut TypeChecker<Self>, op: &Soac) -> Result<(), TypeError> {
        match op {
            Soac::Map {
                width,
                lambda,
                arrays,
            } => {
                ck.require(&[Type::Prim(INT32)], width)?;
                let args = ck.check_soac_array_args(width, arrays)?;
                ck.check_lambda(lambda, args)
            }
            Soac::Reduce {
                width,
                lambda,
                neutral,
                arrays,
            }
            | Soac::Scan {
                width,
                lambda,
                neutral,
                arrays,
            } => {
                let kind = match op {
                    Soac::Scan { .. } => "scan",
                    _ => "reduce",
                };
                ck.require(&[Type::Prim(INT32)], width)?;
                let mut args: Vec<Arg> = Vec::with_capacity(neutral.len() + arrays.len());
                for ne in neutral {
                    args.push(ck.check_arg(ne)?);
                }
                let neutral_tys: Vec<Type> = args.iter().map(|a| a.ty.clone()).collect();
                if !ranks_compatible(&lambda.ret, &neutral_tys) {
                    return Err(ck.bad(ErrorCase::TypeError(format!(
                        "operator of {kind} returns {} value(s), which does not match its neutral element",
                        lambda.ret.len()
                    ))));
                }
                args.extend(ck.check_soac_array_args(width, arrays)?);
                ck.check_lambda(lambda, args)
            }
        }
    }

    fn op_ext_type(op: &Soac) -> Vec<ExtType> {
        op.ext_type()
    }
}
