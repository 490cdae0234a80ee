//! Traversal helpers over statements, places and expressions

use super::{Block, CallArg, Expr, ExprKind, Place, ResourceRef, SampleLevel, Statement};

/// Calls `f` on every expression node (pre-order), including index
/// expressions inside places.
pub fn for_each_expr(block: &Block, f: &mut dyn FnMut(&Expr)) {
    for statement in block {
        statement_exprs(statement, f);
    }
}

fn statement_exprs(statement: &Statement, f: &mut dyn FnMut(&Expr)) {
    match statement {
        Statement::Block(b) => for_each_expr(b, f),
        Statement::Store { place, value } => {
            place_exprs(place, f);
            expr_tree(value, f);
        }
        Statement::ImageStore { coord, value, .. } => {
            expr_tree(coord, f);
            expr_tree(value, f);
        }
        Statement::Call { args, result, .. } => {
            for arg in args {
                if let CallArg::Value(e) = arg {
                    expr_tree(e, f);
                }
            }
            if let Some(place) = result {
                place_exprs(place, f);
            }
        }
        Statement::If {
            condition,
            accept,
            reject,
        } => {
            expr_tree(condition, f);
            for_each_expr(accept, f);
            for_each_expr(reject, f);
        }
        Statement::Loop {
            body,
            continuing,
            break_if,
        } => {
            for_each_expr(body, f);
            for_each_expr(continuing, f);
            if let Some(e) = break_if {
                expr_tree(e, f);
            }
        }
        Statement::Switch { selector, cases } => {
            expr_tree(selector, f);
            for case in cases {
                for_each_expr(&case.body, f);
            }
        }
        Statement::Return(Some(e)) => expr_tree(e, f),
        Statement::Return(None)
        | Statement::Break
        | Statement::Continue
        | Statement::Discard
        | Statement::Barrier { .. } => {}
    }
}

pub fn place_exprs(place: &Place, f: &mut dyn FnMut(&Expr)) {
    match place {
        Place::Local(_) | Place::Global(_) | Place::CBuffer { .. } => {}
        Place::Element { index, .. } => expr_tree(index, f),
        Place::Member(base, _) | Place::Swizzle(base, _) => place_exprs(base, f),
        Place::Index(base, index) => {
            place_exprs(base, f);
            expr_tree(index, f);
        }
    }
}

/// Pre-order walk of one expression tree.
pub fn expr_tree(expr: &Expr, f: &mut dyn FnMut(&Expr)) {
    f(expr);
    match &expr.kind {
        ExprKind::Literal(_) => {}
        ExprKind::Load(place) => place_exprs(place, f),
        ExprKind::Binary { left, right, .. } | ExprKind::MatMul { left, right } => {
            expr_tree(left, f);
            expr_tree(right, f);
        }
        ExprKind::Unary { expr, .. }
        | ExprKind::Splat(expr)
        | ExprKind::Convert(expr)
        | ExprKind::Bitcast(expr) => expr_tree(expr, f),
        ExprKind::Select {
            condition,
            accept,
            reject,
        } => {
            expr_tree(condition, f);
            expr_tree(accept, f);
            expr_tree(reject, f);
        }
        ExprKind::Construct(args) | ExprKind::Intrinsic { args, .. } => {
            for arg in args {
                expr_tree(arg, f);
            }
        }
        ExprKind::Swizzle { vector: base, .. } | ExprKind::Member { base, .. } => {
            expr_tree(base, f)
        }
        ExprKind::Index { base, index } => {
            expr_tree(base, f);
            expr_tree(index, f);
        }
        ExprKind::Sample {
            coord,
            level,
            offset,
            compare,
            ..
        } => {
            expr_tree(coord, f);
            match level {
                SampleLevel::Bias(e) | SampleLevel::Lod(e) => expr_tree(e, f),
                SampleLevel::Grad(x, y) => {
                    expr_tree(x, f);
                    expr_tree(y, f);
                }
                SampleLevel::Auto | SampleLevel::Zero => {}
            }
            if let Some(e) = offset {
                expr_tree(e, f);
            }
            if let Some(e) = compare {
                expr_tree(e, f);
            }
        }
        ExprKind::ImageLoad { coord, lod, .. } => {
            expr_tree(coord, f);
            if let Some(e) = lod {
                expr_tree(e, f);
            }
        }
    }
}

/// Calls `f` on every statement, parents before the statements they contain.
pub fn for_each_statement(block: &Block, f: &mut dyn FnMut(&Statement)) {
    for statement in block {
        f(statement);
        match statement {
            Statement::Block(b) => for_each_statement(b, f),
            Statement::If { accept, reject, .. } => {
                for_each_statement(accept, f);
                for_each_statement(reject, f);
            }
            Statement::Loop {
                body, continuing, ..
            } => {
                for_each_statement(body, f);
                for_each_statement(continuing, f);
            }
            Statement::Switch { cases, .. } => {
                for case in cases {
                    for_each_statement(&case.body, f);
                }
            }
            _ => {}
        }
    }
}

/// Calls `f` on every statement, parents before children; `f` may rewrite
/// the statement in place before its nested blocks are visited.
pub fn for_each_statement_mut(block: &mut Block, f: &mut dyn FnMut(&mut Statement)) {
    for statement in block.iter_mut() {
        f(statement);
        match statement {
            Statement::Block(b) => for_each_statement_mut(b, f),
            Statement::If { accept, reject, .. } => {
                for_each_statement_mut(accept, f);
                for_each_statement_mut(reject, f);
            }
            Statement::Loop {
                body, continuing, ..
            } => {
                for_each_statement_mut(body, f);
                for_each_statement_mut(continuing, f);
            }
            Statement::Switch { cases, .. } => {
                for case in cases.iter_mut() {
                    for_each_statement_mut(&mut case.body, f);
                }
            }
            _ => {}
        }
    }
}

/// Calls `f` on every expression node bottom-up, so children are rewritten
/// before their parents see them.
pub fn for_each_expr_mut(block: &mut Block, f: &mut dyn FnMut(&mut Expr)) {
    for statement in block.iter_mut() {
        statement_exprs_mut(statement, f);
    }
}

pub fn statement_exprs_mut(statement: &mut Statement, f: &mut dyn FnMut(&mut Expr)) {
    match statement {
        Statement::Block(b) => for_each_expr_mut(b, f),
        Statement::Store { place, value } => {
            place_exprs_mut(place, f);
            expr_tree_mut(value, f);
        }
        Statement::ImageStore { coord, value, .. } => {
            expr_tree_mut(coord, f);
            expr_tree_mut(value, f);
        }
        Statement::Call { args, result, .. } => {
            for arg in args.iter_mut() {
                if let CallArg::Value(e) = arg {
                    expr_tree_mut(e, f);
                }
            }
            if let Some(place) = result {
                place_exprs_mut(place, f);
            }
        }
        Statement::If {
            condition,
            accept,
            reject,
        } => {
            expr_tree_mut(condition, f);
            for_each_expr_mut(accept, f);
            for_each_expr_mut(reject, f);
        }
        Statement::Loop {
            body,
            continuing,
            break_if,
        } => {
            for_each_expr_mut(body, f);
            for_each_expr_mut(continuing, f);
            if let Some(e) = break_if {
                expr_tree_mut(e, f);
            }
        }
        Statement::Switch { selector, cases } => {
            expr_tree_mut(selector, f);
            for case in cases.iter_mut() {
                for_each_expr_mut(&mut case.body, f);
            }
        }
        Statement::Return(Some(e)) => expr_tree_mut(e, f),
        _ => {}
    }
}

pub fn place_exprs_mut(place: &mut Place, f: &mut dyn FnMut(&mut Expr)) {
    match place {
        Place::Local(_) | Place::Global(_) | Place::CBuffer { .. } => {}
        Place::Element { index, .. } => expr_tree_mut(index, f),
        Place::Member(base, _) | Place::Swizzle(base, _) => place_exprs_mut(base, f),
        Place::Index(base, index) => {
            place_exprs_mut(base, f);
            expr_tree_mut(index, f);
        }
    }
}

pub fn expr_tree_mut(expr: &mut Expr, f: &mut dyn FnMut(&mut Expr)) {
    match &mut expr.kind {
        ExprKind::Literal(_) => {}
        ExprKind::Load(place) => place_exprs_mut(place, f),
        ExprKind::Binary { left, right, .. } | ExprKind::MatMul { left, right } => {
            expr_tree_mut(left, f);
            expr_tree_mut(right, f);
        }
        ExprKind::Unary { expr: inner, .. }
        | ExprKind::Splat(inner)
        | ExprKind::Convert(inner)
        | ExprKind::Bitcast(inner) => expr_tree_mut(inner, f),
        ExprKind::Select {
            condition,
            accept,
            reject,
        } => {
            expr_tree_mut(condition, f);
            expr_tree_mut(accept, f);
            expr_tree_mut(reject, f);
        }
        ExprKind::Construct(args) | ExprKind::Intrinsic { args, .. } => {
            for arg in args.iter_mut() {
                expr_tree_mut(arg, f);
            }
        }
        ExprKind::Swizzle { vector: base, .. } | ExprKind::Member { base, .. } => {
            expr_tree_mut(base, f)
        }
        ExprKind::Index { base, index } => {
            expr_tree_mut(base, f);
            expr_tree_mut(index, f);
        }
        ExprKind::Sample {
            coord,
            level,
            offset,
            compare,
            ..
        } => {
            expr_tree_mut(coord, f);
            match level {
                SampleLevel::Bias(e) | SampleLevel::Lod(e) => expr_tree_mut(e, f),
                SampleLevel::Grad(x, y) => {
                    expr_tree_mut(x, f);
                    expr_tree_mut(y, f);
                }
                SampleLevel::Auto | SampleLevel::Zero => {}
            }
            if let Some(e) = offset {
                expr_tree_mut(e, f);
            }
            if let Some(e) = compare {
                expr_tree_mut(e, f);
            }
        }
        ExprKind::ImageLoad { coord, lod, .. } => {
            expr_tree_mut(coord, f);
            if let Some(e) = lod {
                expr_tree_mut(e, f);
            }
        }
    }
    f(expr);
}

/// Rewrites every resource reference in a block.
pub fn for_each_resource_ref_mut(block: &mut Block, f: &mut dyn FnMut(&mut ResourceRef)) {
    for statement in block.iter_mut() {
        match statement {
            Statement::ImageStore { image, .. } => f(image),
            Statement::Call { args, .. } => {
                for arg in args.iter_mut() {
                    if let CallArg::Resource(r) = arg {
                        f(r);
                    }
                }
            }
            Statement::Block(b) => for_each_resource_ref_mut(b, f),
            Statement::If { accept, reject, .. } => {
                for_each_resource_ref_mut(accept, f);
                for_each_resource_ref_mut(reject, f);
            }
            Statement::Loop {
                body, continuing, ..
            } => {
                for_each_resource_ref_mut(body, f);
                for_each_resource_ref_mut(continuing, f);
            }
            Statement::Switch { cases, .. } => {
                for case in cases.iter_mut() {
                    for_each_resource_ref_mut(&mut case.body, f);
                }
            }
            _ => {}
        }
        // places inside stores and calls
        match statement {
            Statement::Store { place, .. } => place_resource_refs_mut(place, f),
            Statement::Call {
                result: Some(place),
                ..
            } => place_resource_refs_mut(place, f),
            _ => {}
        }
        statement_exprs_mut(statement, &mut |e| match &mut e.kind {
            ExprKind::Sample {
                texture, sampler, ..
            } => {
                f(texture);
                f(sampler);
            }
            ExprKind::ImageLoad { image, .. } => f(image),
            ExprKind::Load(place) => place_resource_refs_mut(place, f),
            _ => {}
        });
    }
}

fn place_resource_refs_mut(place: &mut Place, f: &mut dyn FnMut(&mut ResourceRef)) {
    match place {
        Place::Element { resource, .. } => f(resource),
        Place::Member(base, _) | Place::Swizzle(base, _) | Place::Index(base, _) => {
            place_resource_refs_mut(base, f)
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, Type};

    fn add(a: Expr, b: Expr) -> Expr {
        let ty = a.ty.clone();
        Expr::new(
            ExprKind::Binary {
                op: BinaryOp::Add,
                left: Box::new(a),
                right: Box::new(b),
            },
            ty,
        )
    }

    #[test]
    fn test_counts_all_expression_nodes() {
        let block = vec![Statement::Return(Some(add(Expr::int(1), add(Expr::int(2), Expr::int(3)))))];
        let mut count = 0;
        for_each_expr(&block, &mut |_| count += 1);
        assert_eq!(count, 5);
    }

    #[test]
    fn test_mutable_walk_is_bottom_up() {
        let mut block = vec![Statement::Return(Some(add(Expr::int(1), Expr::int(2))))];
        let mut order = Vec::new();
        for_each_expr_mut(&mut block, &mut |e| {
            order.push(matches!(e.kind, ExprKind::Binary { .. }));
        });
        assert_eq!(order, vec![false, false, true]);
        assert_eq!(Type::INT, Expr::int(0).ty);
    }
}
