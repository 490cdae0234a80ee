//! Statement lowering: declarations, control flow and structured loops

use super::{Analyzer, Breakable, FnCtx, Reported, SResult, Symbol};
use crate::diag::{ErrorKind, SourceLocation};
use crate::front::ast;
use crate::ir::{
    Expr, ExprKind, GlobalKind, GlobalVariable, Literal, Local, Place, Statement, SwitchCase, Type,
    UnaryOp,
};
use std::collections::HashSet;

impl Analyzer<'_> {
    pub(super) fn lower_stmt(
        &mut self,
        f: &mut FnCtx,
        stmt: &ast::Stmt,
        out: &mut Vec<Statement>,
    ) -> SResult<()> {
        let loc = &stmt.location;
        match &stmt.kind {
            ast::StmtKind::Empty => Ok(()),
            ast::StmtKind::Block(stmts) => {
                let block = self.scoped_block(f, stmts)?;
                if !block.is_empty() {
                    out.push(Statement::Block(block));
                }
                Ok(())
            }
            ast::StmtKind::Decl(vars) => {
                for var in vars {
                    self.local_decl(f, var, out)?;
                }
                Ok(())
            }
            ast::StmtKind::Expr(e) => self.lower_effect(f, e, out),
            ast::StmtKind::If {
                condition,
                accept,
                reject,
            } => {
                let value = self.lower_expr(f, condition, out)?;
                let condition = self.to_bool(value, &condition.location)?;
                let accept = self.nested(f, accept)?;
                let reject = match reject {
                    Some(reject) => self.nested(f, reject)?,
                    None => Vec::new(),
                };
                out.push(Statement::If {
                    condition,
                    accept,
                    reject,
                });
                Ok(())
            }
            ast::StmtKind::For {
                init,
                condition,
                step,
                body,
            } => {
                f.scopes.push(Default::default());
                let result = self.for_loop(f, init.as_deref(), condition.as_ref(), step.as_ref(), body, out);
                f.scopes.pop();
                result
            }
            ast::StmtKind::While { condition, body } => {
                self.for_loop(f, None, Some(condition), None, body, out)
            }
            ast::StmtKind::DoWhile { body, condition } => {
                f.breakable.push(Breakable::Loop);
                let body = self.nested(f, body);
                f.breakable.pop();
                let body = body?;
                let mut continuing = Vec::new();
                let value = self.lower_expr(f, condition, &mut continuing)?;
                let value = self.to_bool(value, &condition.location)?;
                out.push(Statement::Loop {
                    body,
                    continuing,
                    break_if: Some(not(value)),
                });
                Ok(())
            }
            ast::StmtKind::Switch { selector, cases } => self.switch(f, selector, cases, loc, out),
            ast::StmtKind::Break => {
                if f.breakable.is_empty() {
                    return self.fail(
                        ErrorKind::Semantic,
                        loc,
                        "'break' statement not in loop or switch statement",
                    );
                }
                out.push(Statement::Break);
                Ok(())
            }
            ast::StmtKind::Continue => {
                if !f.breakable.contains(&Breakable::Loop) {
                    return self.fail(
                        ErrorKind::Semantic,
                        loc,
                        "'continue' statement not in loop statement",
                    );
                }
                out.push(Statement::Continue);
                Ok(())
            }
            ast::StmtKind::Return(value) => {
                let result = f.result.clone();
                let value = match (value, &result) {
                    (None, Type::Void) => None,
                    (None, _) => {
                        return self.fail(
                            ErrorKind::Semantic,
                            loc,
                            "non-void function must return a value",
                        );
                    }
                    (Some(_), Type::Void) => {
                        return self.fail(
                            ErrorKind::Semantic,
                            loc,
                            "void function should not return a value",
                        );
                    }
                    (Some(e), ty) => {
                        let value = self.lower_expr(f, e, out)?;
                        Some(self.convert(value, ty, &e.location, false)?)
                    }
                };
                out.push(Statement::Return(value));
                Ok(())
            }
            ast::StmtKind::Discard => {
                out.push(Statement::Discard);
                Ok(())
            }
        }
    }

    /// Lowers a list of statements in a fresh scope. Every statement is
    /// checked even after an earlier one failed.
    fn scoped_block(&mut self, f: &mut FnCtx, stmts: &[ast::Stmt]) -> SResult<Vec<Statement>> {
        f.scopes.push(Default::default());
        let mut block = Vec::new();
        let mut failed = false;
        for stmt in stmts {
            failed |= self.lower_stmt(f, stmt, &mut block).is_err();
        }
        f.scopes.pop();
        if failed { Err(Reported) } else { Ok(block) }
    }

    /// The body of a control statement, unwrapping a braced block.
    fn nested(&mut self, f: &mut FnCtx, stmt: &ast::Stmt) -> SResult<Vec<Statement>> {
        match &stmt.kind {
            ast::StmtKind::Block(stmts) => self.scoped_block(f, stmts),
            _ => self.scoped_block(f, std::slice::from_ref(stmt)),
        }
    }

    fn for_loop(
        &mut self,
        f: &mut FnCtx,
        init: Option<&ast::Stmt>,
        condition: Option<&ast::Expr>,
        step: Option<&ast::Expr>,
        body: &ast::Stmt,
        out: &mut Vec<Statement>,
    ) -> SResult<()> {
        if let Some(init) = init {
            self.lower_stmt(f, init, out)?;
        }
        let mut head = Vec::new();
        if let Some(condition) = condition {
            let value = self.lower_expr(f, condition, &mut head)?;
            let value = self.to_bool(value, &condition.location)?;
            match value.as_literal() {
                Some(Literal::Bool(true)) => {}
                _ => head.push(Statement::If {
                    condition: not(value),
                    accept: vec![Statement::Break],
                    reject: Vec::new(),
                }),
            }
        }
        f.breakable.push(Breakable::Loop);
        let lowered = self.nested(f, body);
        f.breakable.pop();
        head.extend(lowered?);

        let mut continuing = Vec::new();
        if let Some(step) = step {
            self.lower_effect(f, step, &mut continuing)?;
        }
        out.push(Statement::Loop {
            body: head,
            continuing,
            break_if: None,
        });
        Ok(())
    }

    fn switch(
        &mut self,
        f: &mut FnCtx,
        selector: &ast::Expr,
        groups: &[ast::CaseGroup],
        loc: &SourceLocation,
        out: &mut Vec<Statement>,
    ) -> SResult<()> {
        let value = self.lower_expr(f, selector, out)?;
        let is_integer = value.ty.is_scalar() && value.ty.scalar().is_some_and(|s| s.is_integer());
        if !is_integer {
            return self.fail(
                ErrorKind::Semantic,
                &selector.location,
                format!(
                    "switch condition must be an integer, found '{}'",
                    self.type_name(&value.ty)
                ),
            );
        }

        let mut seen = HashSet::new();
        let mut has_default = false;
        let mut cases = Vec::new();
        for group in groups {
            let mut values = Vec::with_capacity(group.labels.len());
            for label in &group.labels {
                let value = match label {
                    None => {
                        if has_default {
                            return self.fail(
                                ErrorKind::Semantic,
                                &group.location,
                                "multiple default labels in one switch",
                            );
                        }
                        has_default = true;
                        None
                    }
                    Some(e) => {
                        let v = self.const_int(e)?;
                        if !seen.insert(v) {
                            return self.fail(
                                ErrorKind::Semantic,
                                &e.location,
                                format!("duplicate case value '{}'", v),
                            );
                        }
                        Some(v)
                    }
                };
                values.push(value);
            }

            f.breakable.push(Breakable::Switch);
            let body = self.scoped_block(f, &group.body);
            f.breakable.pop();
            let body = body?;
            let falls = !body.last().is_some_and(Statement::is_terminator);

            let last = values.len().saturating_sub(1);
            for (i, value) in values.into_iter().enumerate() {
                let (body, fall_through) = if i == last {
                    (body.clone(), falls)
                } else {
                    (Vec::new(), true)
                };
                cases.push(SwitchCase {
                    value,
                    body,
                    fall_through,
                });
            }
        }
        if cases.last().is_some_and(|c| c.fall_through) {
            // Running off the end of the switch leaves it
            if let Some(case) = cases.last_mut() {
                case.body.push(Statement::Break);
                case.fall_through = false;
            }
        }
        if cases.is_empty() {
            self.warn(loc, "switch statement contains no case labels");
        }
        out.push(Statement::Switch {
            selector: value,
            cases,
        });
        Ok(())
    }

    fn local_decl(
        &mut self,
        f: &mut FnCtx,
        var: &ast::VarDecl,
        out: &mut Vec<Statement>,
    ) -> SResult<()> {
        let base = self.resolve_type(&var.ty)?;
        if base.is_resource() {
            return self.fail(
                ErrorKind::UnsupportedFeature,
                &var.location,
                "local resource variables are not supported",
            );
        }
        if base == Type::Void {
            return self.fail(
                ErrorKind::Semantic,
                &var.location,
                format!("variable '{}' has incomplete type 'void'", var.name),
            );
        }
        let q = &var.qualifiers;
        if q.is_const && var.init.is_none() {
            return self.fail(
                ErrorKind::Semantic,
                &var.location,
                format!("const variable '{}' must be initialized", var.name),
            );
        }

        if q.is_static {
            let mut scratch = Vec::new();
            let (ty, init) = self.declared_value(f, base, var, &mut scratch)?;
            if !scratch.is_empty() || init.as_ref().is_some_and(|e| !e.is_constant()) {
                return self.fail(
                    ErrorKind::Semantic,
                    &var.location,
                    "static local initializers must be constant",
                );
            }
            let handle = self.module.globals.append(GlobalVariable {
                name: format!("{}_{}", var.name, self.module.globals.len()),
                ty,
                kind: GlobalKind::Private,
                register: None,
                space: 0,
                binding: None,
                init,
                is_const: q.is_const,
                location: Some(var.location.clone()),
            });
            return self.redeclare(f, &var.name, Symbol::Global(handle), &var.location);
        }

        let (ty, init) = self.declared_value(f, base, var, out)?;
        let local = f.locals.append(Local {
            name: var.name.clone(),
            ty,
            semantic: None,
            interpolation: None,
        });
        if q.is_const {
            f.const_locals.insert(local);
        }
        if let Some(value) = init {
            out.push(Statement::Store {
                place: Place::Local(local),
                value,
            });
        }
        self.redeclare(f, &var.name, Symbol::Local(local), &var.location)
    }

    fn redeclare(
        &mut self,
        f: &mut FnCtx,
        name: &str,
        symbol: Symbol,
        location: &SourceLocation,
    ) -> SResult<()> {
        if f.declare(name, symbol) {
            Ok(())
        } else {
            self.fail(
                ErrorKind::Semantic,
                location,
                format!("redefinition of '{}'", name),
            )
        }
    }
}

fn not(value: Expr) -> Expr {
    match value.kind {
        ExprKind::Literal(l) => Expr::bool(!l.as_bool()),
        ExprKind::Unary {
            op: UnaryOp::Not,
            expr,
        } => *expr,
        _ => Expr::new(
            ExprKind::Unary {
                op: UnaryOp::Not,
                expr: Box::new(value),
            },
            Type::BOOL,
        ),
    }
}
