//! Control-flow cleanup required before emission.
//!
//! Drops statements that follow a `return`, `break`, `continue` or
//! `discard` in the same block, splices nested blocks into their parent,
//! removes `if`s with two empty branches and moves a lone `else` branch
//! into the `then` position.

use super::Pass;
use crate::ir::{Block, Expr, ExprKind, Module, Statement, Type, UnaryOp};

#[derive(Debug)]
pub struct Legalize;

impl Pass for Legalize {
    fn name(&self) -> &str {
        "legalize"
    }

    fn run(&self, module: &mut Module) -> bool {
        let mut changed = false;
        for (_, function) in module.functions.iter_mut() {
            changed |= legalize_block(&mut function.body);
        }
        changed
    }
}

fn legalize_block(block: &mut Block) -> bool {
    let mut changed = false;
    if let Some(end) = block.iter().position(Statement::is_terminator) {
        if end + 1 < block.len() {
            block.truncate(end + 1);
            changed = true;
        }
    }

    let mut i = 0;
    while i < block.len() {
        match &mut block[i] {
            Statement::Block(inner) => {
                legalize_block(inner);
                let inner = std::mem::take(inner);
                block.splice(i..=i, inner);
                changed = true;
                // Re-check the spliced statements for a new terminator
                return legalize_block(block) || changed;
            }
            Statement::If {
                condition,
                accept,
                reject,
            } => {
                changed |= legalize_block(accept);
                changed |= legalize_block(reject);
                if accept.is_empty() && reject.is_empty() {
                    block.remove(i);
                    changed = true;
                    continue;
                }
                if accept.is_empty() {
                    let negated = negate(std::mem::replace(condition, Expr::bool(false)));
                    *condition = negated;
                    std::mem::swap(accept, reject);
                    changed = true;
                }
            }
            Statement::Loop {
                body, continuing, ..
            } => {
                changed |= legalize_block(body);
                changed |= legalize_block(continuing);
            }
            Statement::Switch { cases, .. } => {
                for case in cases.iter_mut() {
                    changed |= legalize_block(&mut case.body);
                }
            }
            _ => {}
        }
        i += 1;
    }
    changed
}

fn negate(condition: Expr) -> Expr {
    match condition.kind {
        ExprKind::Unary {
            op: UnaryOp::Not,
            expr,
        } => *expr,
        ExprKind::Literal(l) => Expr::bool(!l.as_bool()),
        _ => Expr::new(
            ExprKind::Unary {
                op: UnaryOp::Not,
                expr: Box::new(condition),
            },
            Type::BOOL,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Arena, Function, Literal};

    fn function(body: Block) -> Module {
        let mut module = Module::new("test.hlsl");
        module.functions.append(Function {
            name: "f".into(),
            params: Vec::new(),
            result: Type::Void,
            result_semantic: None,
            locals: Arena::new(),
            body,
            numthreads: None,
            location: None,
        });
        module
    }

    fn body(module: &Module) -> &Block {
        &module.functions.iter().next().unwrap().1.body
    }

    #[test]
    fn test_drops_unreachable_statements() {
        let mut module = function(vec![
            Statement::Return(None),
            Statement::Discard,
            Statement::Break,
        ]);
        assert!(Legalize.run(&mut module));
        assert_eq!(body(&module), &vec![Statement::Return(None)]);
        assert!(!Legalize.run(&mut module));
    }

    #[test]
    fn test_splices_blocks_and_drops_empty_ifs() {
        let mut module = function(vec![
            Statement::Block(vec![Statement::Block(vec![])]),
            Statement::If {
                condition: Expr::bool(true),
                accept: vec![],
                reject: vec![],
            },
            Statement::Block(vec![Statement::Return(None), Statement::Discard]),
        ]);
        Legalize.run(&mut module);
        assert_eq!(body(&module), &vec![Statement::Return(None)]);
    }

    #[test]
    fn test_lone_else_becomes_then() {
        let condition = Expr::new(ExprKind::Literal(Literal::Bool(true)), Type::BOOL);
        let mut module = function(vec![Statement::If {
            condition,
            accept: vec![],
            reject: vec![Statement::Discard],
        }]);
        Legalize.run(&mut module);
        assert_eq!(
            body(&module),
            &vec![Statement::If {
                condition: Expr::bool(false),
                accept: vec![Statement::Discard],
                reject: vec![],
            }]
        );
    }
}
