//! Dead-code elimination.
//!
//! Removes stores to locals that are never read and then compacts the
//! local arena, dropping locals nothing refers to. Parameters are part of
//! the signature and are always kept, as are stores to them.

use super::Pass;
use crate::ir::visit::{for_each_expr, for_each_expr_mut, for_each_statement, for_each_statement_mut};
use crate::ir::{Arena, Block, CallArg, ExprKind, Function, Handle, Local, Module, Place, Statement};
use std::collections::{HashMap, HashSet};

#[derive(Debug)]
pub struct DeadCodeElimination;

impl Pass for DeadCodeElimination {
    fn name(&self) -> &str {
        "dce"
    }

    fn run(&self, module: &mut Module) -> bool {
        let mut changed = false;
        for (_, function) in module.functions.iter_mut() {
            changed |= remove_dead_stores(function);
            changed |= compact_locals(function);
        }
        changed
    }
}

fn local_root(place: &Place) -> Option<Handle<Local>> {
    match place.root() {
        Place::Local(h) => Some(*h),
        _ => None,
    }
}

/// Locals whose value is observed: loaded, passed by reference or returned
/// through a parameter.
fn read_locals(function: &Function) -> HashSet<Handle<Local>> {
    let mut read: HashSet<Handle<Local>> = function.params.iter().map(|p| p.local).collect();
    for_each_expr(&function.body, &mut |e| {
        if let ExprKind::Load(place) = &e.kind {
            read.extend(local_root(place));
        }
    });
    for_each_statement(&function.body, &mut |s| {
        if let Statement::Call { args, .. } = s {
            for arg in args {
                if let CallArg::Ref(local) = arg {
                    read.insert(*local);
                }
            }
        }
    });
    read
}

fn remove_dead_stores(function: &mut Function) -> bool {
    let read = read_locals(function);
    let mut changed = false;
    retain_statements(&mut function.body, &mut |s| {
        let dead = matches!(s, Statement::Store { place, .. }
            if local_root(place).is_some_and(|h| !read.contains(&h)));
        changed |= dead;
        !dead
    });
    changed
}

fn retain_statements(block: &mut Block, keep: &mut dyn FnMut(&Statement) -> bool) {
    block.retain(|s| keep(s));
    for statement in block.iter_mut() {
        match statement {
            Statement::Block(b) => retain_statements(b, keep),
            Statement::If { accept, reject, .. } => {
                retain_statements(accept, keep);
                retain_statements(reject, keep);
            }
            Statement::Loop {
                body, continuing, ..
            } => {
                retain_statements(body, keep);
                retain_statements(continuing, keep);
            }
            Statement::Switch { cases, .. } => {
                for case in cases.iter_mut() {
                    retain_statements(&mut case.body, keep);
                }
            }
            _ => {}
        }
    }
}

fn place_root_mut(place: &mut Place) -> &mut Place {
    match place {
        Place::Member(base, _) | Place::Index(base, _) | Place::Swizzle(base, _) => {
            place_root_mut(base)
        }
        other => other,
    }
}

/// Drops locals that nothing mentions and renumbers the rest.
fn compact_locals(function: &mut Function) -> bool {
    let mut used: HashSet<Handle<Local>> = function.params.iter().map(|p| p.local).collect();
    for_each_expr(&function.body, &mut |e| {
        if let ExprKind::Load(place) = &e.kind {
            used.extend(local_root(place));
        }
    });
    for_each_statement(&function.body, &mut |s| match s {
        Statement::Store { place, .. }
        | Statement::Call {
            result: Some(place), ..
        } => used.extend(local_root(place)),
        _ => {}
    });
    for_each_statement(&function.body, &mut |s| {
        if let Statement::Call { args, .. } = s {
            for arg in args {
                if let CallArg::Ref(local) = arg {
                    used.insert(*local);
                }
            }
        }
    });
    if used.len() == function.locals.len() {
        return false;
    }

    let old = std::mem::take(&mut function.locals);
    let mut remap: HashMap<Handle<Local>, Handle<Local>> = HashMap::new();
    let mut locals = Arena::new();
    for (handle, local) in old.iter() {
        if used.contains(&handle) {
            remap.insert(handle, locals.append(local.clone()));
        }
    }
    function.locals = locals;
    for param in function.params.iter_mut() {
        if let Some(new) = remap.get(&param.local) {
            param.local = *new;
        }
    }
    let rename = |place: &mut Place| {
        if let Place::Local(h) = place_root_mut(place) {
            if let Some(new) = remap.get(h) {
                *h = *new;
            }
        }
    };
    for_each_expr_mut(&mut function.body, &mut |e| {
        if let ExprKind::Load(place) = &mut e.kind {
            rename(place);
        }
    });
    for_each_statement_mut(&mut function.body, &mut |s| match s {
        Statement::Store { place, .. } => rename(place),
        Statement::Call { args, result, .. } => {
            if let Some(place) = result {
                rename(place);
            }
            for arg in args.iter_mut() {
                if let CallArg::Ref(h) = arg {
                    if let Some(new) = remap.get(h) {
                        *h = *new;
                    }
                }
            }
        }
        _ => {}
    });
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Expr, Type};

    fn local(name: &str) -> Local {
        Local {
            name: name.into(),
            ty: Type::INT,
            semantic: None,
            interpolation: None,
        }
    }

    #[test]
    fn test_unread_local_is_removed() {
        let mut locals = Arena::new();
        let dead = locals.append(local("dead"));
        let live = locals.append(local("live"));
        let mut module = Module::new("test.hlsl");
        module.functions.append(Function {
            name: "f".into(),
            params: Vec::new(),
            result: Type::INT,
            result_semantic: None,
            locals,
            body: vec![
                Statement::Store {
                    place: Place::Local(dead),
                    value: Expr::int(1),
                },
                Statement::Store {
                    place: Place::Local(live),
                    value: Expr::int(2),
                },
                Statement::Return(Some(Expr::load(Place::Local(live), Type::INT))),
            ],
            numthreads: None,
            location: None,
        });
        assert!(DeadCodeElimination.run(&mut module));
        let (_, f) = module.functions.iter().next().unwrap();
        assert_eq!(f.locals.len(), 1);
        let first = f.locals.handles().next().unwrap();
        assert_eq!(f.locals[first].name, "live");
        assert_eq!(
            f.body,
            vec![
                Statement::Store {
                    place: Place::Local(first),
                    value: Expr::int(2),
                },
                Statement::Return(Some(Expr::load(Place::Local(first), Type::INT))),
            ]
        );
        assert!(!DeadCodeElimination.run(&mut module));
    }
}
