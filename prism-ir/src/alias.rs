#![forbid(unsafe_code)]

use std::collections::HashMap;

use crate::ir::{Body, Exp, FunDef, Lambda, PatElem, Pattern, Prog, Stmt, SubExp};
use crate::lore::{Lore, OpAliases};
use crate::name::{Names, VName};

/// What each name in scope is known to alias, transitively closed.
/// Names absent from the table (parameters, loop indexes) alias only
/// themselves.
#[derive(Clone, Debug, Default)]
pub struct AliasTable {
    bound: HashMap<VName, Names>,
}

impl AliasTable {
    pub fn new() -> Self {
        AliasTable::default()
    }

    /// The closed alias set of `v`, including `v` itself.
    pub fn aliases_of(&self, v: &VName) -> Names {
        let mut names = self.bound.get(v).cloned().unwrap_or_default();
        names.insert(v.clone());
        names
    }

    pub fn bind(&mut self, v: VName, mut aliases: Names) {
        aliases.remove(&v);
        self.bound.insert(v, aliases);
    }
}

/// Annotate every pattern element of the program with the alias set of
/// its binding. This is the pre-pass the checker runs before anything
/// else; the checker itself only reads the annotations.
pub fn analyze_prog<L: Lore>(prog: &Prog<L>) -> Prog<L> {
    Prog {
        funs: prog.funs.iter().map(analyze_fun).collect(),
    }
}

pub fn analyze_fun<L: Lore>(fun: &FunDef<L>) -> FunDef<L> {
    let (body, _) = analyze_body(&AliasTable::new(), &fun.body);
    FunDef {
        name: fun.name.clone(),
        ret: fun.ret.clone(),
        params: fun.params.clone(),
        body,
    }
}

pub fn analyze_lambda<L: Lore>(table: &AliasTable, lambda: &Lambda<L>) -> Lambda<L> {
    let (body, _) = analyze_body(table, &lambda.body);
    Lambda {
        params: lambda.params.clone(),
        body,
        ret: lambda.ret.clone(),
    }
}

/// Annotate a body. The second component is the alias set of each
/// result, with the body's own bindings masked out (only names visible
/// outside the body remain).
pub fn analyze_body<L: Lore>(table: &AliasTable, body: &Body<L>) -> (Body<L>, Vec<Names>) {
    let mut table = table.clone();
    let mut bound = Names::new();
    let mut stmts = Vec::with_capacity(body.stmts.len());
    for stmt in &body.stmts {
        let (exp, mut aliases) = analyze_exp(&table, &stmt.exp);
        aliases.resize(stmt.pattern.elems.len(), Names::new());
        let elems = stmt
            .pattern
            .elems
            .iter()
            .zip(aliases)
            .map(|(pe, als)| {
                let als = if pe.ty.is_prim() { Names::new() } else { als };
                table.bind(pe.name.clone(), als.clone());
                bound.insert(pe.name.clone());
                PatElem {
                    name: pe.name.clone(),
                    ty: pe.ty.clone(),
                    aliases: als,
                    attr: pe.attr.clone(),
                }
            })
            .collect();
        stmts.push(Stmt {
            pattern: Pattern::new(elems),
            attr: stmt.attr.clone(),
            exp,
        });
    }
    let res_aliases = body
        .result
        .iter()
        .map(|se| match se {
            SubExp::Var(v) => table.aliases_of(v).minus(&bound),
            SubExp::Constant(_) => Names::new(),
        })
        .collect();
    let body = Body {
        attr: body.attr.clone(),
        stmts,
        result: body.result.clone(),
    };
    (body, res_aliases)
}

/// The annotated expression plus the alias set of each of its results.
/// Fresh-array producers alias nothing; the slicing operators alias
/// their array operand; a conditional aliases whatever either branch
/// result may alias.
fn analyze_exp<L: Lore>(table: &AliasTable, exp: &Exp<L>) -> (Exp<L>, Vec<Names>) {
    match exp {
        Exp::SubExp(SubExp::Var(v)) => (exp.clone(), vec![table.aliases_of(v)]),
        Exp::Index { array, .. }
        | Exp::Reshape { array, .. }
        | Exp::Rearrange { array, .. } => (exp.clone(), vec![table.aliases_of(array)]),
        Exp::Split { sizes, array, .. } => {
            (exp.clone(), vec![table.aliases_of(array); sizes.len()])
        }
        Exp::Partition { n, arrays, .. } => {
            let mut aliases = vec![Names::new(); *n];
            aliases.extend(arrays.iter().map(|a| table.aliases_of(a)));
            (exp.clone(), aliases)
        }
        Exp::If {
            cond,
            then_body,
            else_body,
            ret,
        } => {
            let (then_body, then_als) = analyze_body(table, then_body);
            let (else_body, else_als) = analyze_body(table, else_body);
            let aliases = then_als
                .into_iter()
                .zip(else_als)
                .map(|(mut a, b)| {
                    a.extend_with(&b);
                    a
                })
                .collect();
            (
                Exp::If {
                    cond: cond.clone(),
                    then_body,
                    else_body,
                    ret: ret.clone(),
                },
                aliases,
            )
        }
        Exp::DoLoop { merge, form, body } => {
            let (body, _) = analyze_body(table, body);
            let aliases = vec![Names::new(); merge.len()];
            (
                Exp::DoLoop {
                    merge: merge.clone(),
                    form: form.clone(),
                    body,
                },
                aliases,
            )
        }
        Exp::Op(op) => (Exp::Op(op.analyze(table)), op.result_aliases(table)),
        // everything else produces fresh values
        _ => (exp.clone(), Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lore::Plain;
    use crate::prim::INT32;
    use crate::types::{Type, Uniqueness};

    fn arr_ty(dim: SubExp) -> Type {
        Type::array(INT32, vec![dim], Uniqueness::Nonunique)
    }

    fn let_stmt(name: VName, ty: Type, exp: Exp<Plain>) -> Stmt<Plain> {
        Stmt {
            pattern: Pattern::new(vec![PatElem::new(name, ty, ())]),
            attr: (),
            exp,
        }
    }

    #[test]
    fn test_var_binding_aliases_transitively() {
        let a = VName::new("a", 0);
        let x = VName::new("x", 1);
        let y = VName::new("y", 2);
        let n = SubExp::Var(VName::new("n", 9));
        let body = Body::<Plain> {
            attr: (),
            stmts: vec![
                let_stmt(x.clone(), arr_ty(n.clone()), Exp::SubExp(SubExp::Var(a.clone()))),
                let_stmt(y.clone(), arr_ty(n), Exp::SubExp(SubExp::Var(x.clone()))),
            ],
            result: vec![SubExp::Var(y.clone())],
        };
        let (annotated, res) = analyze_body(&AliasTable::new(), &body);
        let y_aliases = &annotated.stmts[1].pattern.elems[0].aliases;
        assert!(y_aliases.contains(&x));
        assert!(y_aliases.contains(&a));
        // body result masks locally bound names
        assert!(res[0].contains(&a));
        assert!(!res[0].contains(&x));
        assert!(!res[0].contains(&y));
    }

    #[test]
    fn test_copy_is_fresh() {
        let a = VName::new("a", 0);
        let x = VName::new("x", 1);
        let n = SubExp::Var(VName::new("n", 9));
        let body = Body::<Plain> {
            attr: (),
            stmts: vec![let_stmt(x.clone(), arr_ty(n), Exp::Copy { array: a })],
            result: vec![SubExp::Var(x)],
        };
        let (annotated, _) = analyze_body(&AliasTable::new(), &body);
        assert!(annotated.stmts[0].pattern.elems[0].aliases.is_empty());
    }

    #[test]
    fn test_if_unions_branches() {
        let a = VName::new("a", 0);
        let b = VName::new("b", 1);
        let x = VName::new("x", 2);
        let c = VName::new("c", 3);
        let n = SubExp::Var(VName::new("n", 9));
        let branch = |v: &VName| Body::<Plain> {
            attr: (),
            stmts: vec![],
            result: vec![SubExp::Var(v.clone())],
        };
        let body = Body::<Plain> {
            attr: (),
            stmts: vec![let_stmt(
                x.clone(),
                arr_ty(n.clone()),
                Exp::If {
                    cond: SubExp::Var(c),
                    then_body: branch(&a),
                    else_body: branch(&b),
                    ret: vec![(&arr_ty(n)).into()],
                },
            )],
            result: vec![SubExp::Var(x)],
        };
        let (annotated, _) = analyze_body(&AliasTable::new(), &body);
        let aliases = &annotated.stmts[0].pattern.elems[0].aliases;
        assert!(aliases.contains(&a));
        assert!(aliases.contains(&b));
    }

    #[test]
    fn test_analyze_is_idempotent() {
        let a = VName::new("a", 0);
        let x = VName::new("x", 1);
        let n = SubExp::Var(VName::new("n", 9));
        let body = Body::<Plain> {
            attr: (),
            stmts: vec![let_stmt(x.clone(), arr_ty(n), Exp::SubExp(SubExp::Var(a)))],
            result: vec![SubExp::Var(x)],
        };
        let (once, _) = analyze_body(&AliasTable::new(), &body);
        let (twice, _) = analyze_body(&AliasTable::new(), &once);
        assert_eq!(once, twice);
    }
}
