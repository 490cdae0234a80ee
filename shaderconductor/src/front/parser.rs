//! Recursive-descent parser for HLSL

use super::ast::*;
use super::token::{Token, TokenKind};
use crate::diag::{Diagnostic, ErrorKind, SourceLocation};
use crate::ir::{BinaryOp, Interpolation, MatrixLayout, ParamDirection, RegisterClass};
use std::collections::HashSet;

type PResult<T> = Result<T, Diagnostic>;

/// Parses a token stream ending in `Eof`.
pub fn parse(tokens: Vec<Token>) -> PResult<TranslationUnit> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        user_types: HashSet::new(),
        pack_matrix: None,
    };
    parser.translation_unit()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Struct and typedef names seen so far
    user_types: HashSet<String>,
    /// Layout selected by `#pragma pack_matrix`
    pack_matrix: Option<MatrixLayout>,
}

impl Parser {
    fn peek(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + offset).min(last)]
    }

    fn location(&self) -> SourceLocation {
        self.peek().location.clone()
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn check(&self, punct: &str) -> bool {
        self.peek().is_punct(punct)
    }

    fn check_ident(&self, name: &str) -> bool {
        self.peek().is_ident(name)
    }

    fn eat(&mut self, punct: &str) -> bool {
        if self.check(punct) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_ident(&mut self, name: &str) -> bool {
        if self.check_ident(name) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error_here(&self, expected: &str) -> Diagnostic {
        let token = self.peek();
        Diagnostic::error(
            ErrorKind::Syntax,
            Some(token.location.clone()),
            format!("expected {} but found '{}'", expected, token.kind),
        )
    }

    fn expect(&mut self, punct: &str) -> PResult<()> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(self.error_here(&format!("'{}'", punct)))
        }
    }

    fn expect_ident(&mut self) -> PResult<String> {
        match &self.peek().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error_here("identifier")),
        }
    }

    /// Consumes a `>` closing a template argument list, splitting `>>`.
    fn expect_template_close(&mut self) -> PResult<()> {
        if self.eat(">") {
            return Ok(());
        }
        if self.check(">>") {
            let index = self.pos;
            self.tokens[index].kind = TokenKind::Punct(">");
            self.tokens[index].location.column += 1;
            return Ok(());
        }
        Err(self.error_here("'>'"))
    }

    fn is_type_name(&self, name: &str) -> bool {
        is_builtin_type(name) || self.user_types.contains(name)
    }

    fn translation_unit(&mut self) -> PResult<TranslationUnit> {
        let mut decls = Vec::new();
        while !self.at_eof() {
            if self.eat(";") {
                continue;
            }
            if let TokenKind::PackMatrix(layout) = self.peek().kind {
                self.pack_matrix = Some(layout);
                self.advance();
                continue;
            }
            decls.extend(self.top_level_decl()?);
        }
        Ok(TranslationUnit { decls })
    }

    fn top_level_decl(&mut self) -> PResult<Vec<Decl>> {
        if self.check_ident("struct") && !self.peek_at(2).is_punct(";") {
            let def = self.struct_def()?;
            // `struct S { ... } instance;` is not supported; require the `;`
            self.expect(";")?;
            return Ok(vec![Decl::Struct(def)]);
        }
        if self.check_ident("typedef") {
            return Ok(vec![Decl::Typedef(self.typedef()?)]);
        }
        if self.check_ident("cbuffer") || self.check_ident("tbuffer") {
            let def = self.cbuffer()?;
            self.eat(";");
            return Ok(vec![Decl::CBuffer(def)]);
        }

        let attributes = self.attributes()?;
        let location = self.location();
        let qualifiers = self.qualifiers();
        let ty = self.type_name()?;
        let name = self.expect_ident()?;

        if self.check("(") {
            let function = self.function_rest(name, ty, qualifiers, attributes, location)?;
            return Ok(vec![Decl::Function(function)]);
        }

        let mut decls = Vec::new();
        let mut name = name;
        let mut location = location;
        loop {
            decls.push(Decl::Variable(self.declarator_rest(
                name,
                ty.clone(),
                qualifiers.clone(),
                location,
            )?));
            if !self.eat(",") {
                break;
            }
            location = self.location();
            name = self.expect_ident()?;
        }
        self.expect(";")?;
        Ok(decls)
    }

    fn struct_def(&mut self) -> PResult<StructDef> {
        let location = self.location();
        self.advance();
        let name = self.expect_ident()?;
        self.user_types.insert(name.clone());
        self.expect("{")?;
        let mut fields = Vec::new();
        while !self.eat("}") {
            if self.at_eof() {
                return Err(self.error_here("'}'"));
            }
            fields.extend(self.member_decls()?);
        }
        Ok(StructDef {
            name,
            fields,
            location,
        })
    }

    /// One member declaration line (`float a, b : TEXCOORD0;`).
    fn member_decls(&mut self) -> PResult<Vec<VarDecl>> {
        let location = self.location();
        let qualifiers = self.qualifiers();
        let ty = self.type_name()?;
        let mut decls = Vec::new();
        let mut location = location;
        loop {
            let name = self.expect_ident()?;
            decls.push(self.declarator_rest(name, ty.clone(), qualifiers.clone(), location)?);
            if !self.eat(",") {
                break;
            }
            location = self.location();
        }
        self.expect(";")?;
        Ok(decls)
    }

    fn typedef(&mut self) -> PResult<TypedefDecl> {
        let location = self.location();
        self.advance();
        self.qualifiers();
        let ty = self.type_name()?;
        let name = self.expect_ident()?;
        let dims = self.array_dims()?;
        self.expect(";")?;
        self.user_types.insert(name.clone());
        Ok(TypedefDecl {
            name,
            ty,
            dims,
            location,
        })
    }

    fn cbuffer(&mut self) -> PResult<CBufferDef> {
        let location = self.location();
        let texture_buffer = self.check_ident("tbuffer");
        self.advance();
        let name = self.expect_ident()?;
        let mut register = None;
        while self.eat(":") {
            if let Some(reg) = self.register_or_packoffset()? {
                register = Some(reg);
            }
        }
        self.expect("{")?;
        let mut fields = Vec::new();
        while !self.eat("}") {
            if self.at_eof() {
                return Err(self.error_here("'}'"));
            }
            fields.extend(self.member_decls()?);
        }
        Ok(CBufferDef {
            name,
            fields,
            register,
            texture_buffer,
            location,
        })
    }

    fn attributes(&mut self) -> PResult<Vec<Attribute>> {
        let mut attributes = Vec::new();
        while self.check("[") {
            let location = self.location();
            self.advance();
            let name = self.expect_ident()?;
            let mut args = Vec::new();
            if self.eat("(") {
                if !self.check(")") {
                    loop {
                        args.push(self.assignment()?);
                        if !self.eat(",") {
                            break;
                        }
                    }
                }
                self.expect(")")?;
            }
            self.expect("]")?;
            attributes.push(Attribute {
                name,
                args,
                location,
            });
        }
        Ok(attributes)
    }

    fn qualifiers(&mut self) -> Qualifiers {
        let mut q = Qualifiers::default();
        loop {
            let Some(word) = self.peek().ident() else {
                break;
            };
            match word {
                "static" => q.is_static = true,
                "const" => q.is_const = true,
                "uniform" => q.is_uniform = true,
                "extern" => q.is_extern = true,
                "groupshared" => q.groupshared = true,
                "precise" => q.precise = true,
                "volatile" | "shared" | "inline" | "snorm" | "unorm" => {}
                "row_major" => q.matrix_layout = Some(MatrixLayout::RowMajor),
                "column_major" => q.matrix_layout = Some(MatrixLayout::ColumnMajor),
                "linear" => q.interpolation = Some(Interpolation::Linear),
                "nointerpolation" => q.interpolation = Some(Interpolation::NoInterpolation),
                "centroid" => q.interpolation = Some(Interpolation::Centroid),
                "noperspective" => q.interpolation = Some(Interpolation::NoPerspective),
                "sample" => q.interpolation = Some(Interpolation::Sample),
                "in" => q.direction = Some(ParamDirection::In),
                "out" => q.direction = Some(ParamDirection::Out),
                "inout" => q.direction = Some(ParamDirection::InOut),
                _ => match InputPrimitive::from_keyword(word) {
                    // `line` and `point` are ordinary identifiers unless a type follows
                    Some(primitive)
                        if self.peek_at(1).ident().is_some_and(|next| self.is_type_name(next)) =>
                    {
                        q.primitive = Some(primitive);
                    }
                    _ => break,
                },
            }
            self.advance();
        }
        if q.matrix_layout.is_none() {
            q.matrix_layout = self.pack_matrix;
        }
        q
    }

    fn type_name(&mut self) -> PResult<TypeName> {
        let location = self.location();
        let name = match self.peek().ident() {
            Some(name) if self.is_type_name(name) => name.to_string(),
            _ => return Err(self.error_here("type name")),
        };
        self.advance();
        let mut args = Vec::new();
        if TEMPLATE_TYPES.contains(&name.as_str()) && self.eat("<") {
            loop {
                while self.eat_ident("snorm") || self.eat_ident("unorm") {}
                match self.peek().kind.clone() {
                    TokenKind::Int { value, .. } => {
                        self.advance();
                        args.push(TemplateArg::Int(value));
                    }
                    _ => args.push(TemplateArg::Type(self.type_name()?)),
                }
                if !self.eat(",") {
                    break;
                }
            }
            self.expect_template_close()?;
        }
        Ok(TypeName {
            name,
            args,
            location,
        })
    }

    fn array_dims(&mut self) -> PResult<Vec<Option<Expr>>> {
        let mut dims = Vec::new();
        while self.eat("[") {
            if self.eat("]") {
                dims.push(None);
            } else {
                dims.push(Some(self.conditional()?));
                self.expect("]")?;
            }
        }
        Ok(dims)
    }

    /// Parses `register(...)` or `packoffset(...)` after a `:`; the latter is
    /// accepted and ignored.
    fn register_or_packoffset(&mut self) -> PResult<Option<Register>> {
        let location = self.location();
        if self.eat_ident("packoffset") {
            self.expect("(")?;
            while !self.eat(")") {
                if self.at_eof() {
                    return Err(self.error_here("')'"));
                }
                self.advance();
            }
            return Ok(None);
        }
        if !self.eat_ident("register") {
            return Err(self.error_here("'register' or 'packoffset'"));
        }
        self.expect("(")?;
        let slot = self.expect_ident()?;
        let mut space = 0;
        if self.eat(",") {
            let space_name = self.expect_ident()?;
            space = space_name
                .strip_prefix("space")
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| {
                    Diagnostic::error(
                        ErrorKind::Syntax,
                        Some(location.clone()),
                        format!("invalid space specifier '{}'", space_name),
                    )
                })?;
        }
        self.expect(")")?;

        let mut chars = slot.chars();
        let class = chars.next().and_then(RegisterClass::from_prefix);
        let index = chars.as_str().parse::<u32>().ok();
        match (class, index) {
            (Some(class), Some(index)) => Ok(Some(Register {
                class,
                index,
                space,
                location,
            })),
            _ => Err(Diagnostic::error(
                ErrorKind::Syntax,
                Some(location),
                format!("invalid register specification '{}'", slot),
            )),
        }
    }

    /// Everything after the declared name: dimensions, semantic or
    /// register, initializer.
    fn declarator_rest(
        &mut self,
        name: String,
        ty: TypeName,
        qualifiers: Qualifiers,
        location: SourceLocation,
    ) -> PResult<VarDecl> {
        let dims = self.array_dims()?;
        let mut semantic = None;
        let mut register = None;
        while self.eat(":") {
            if self.check_ident("register") || self.check_ident("packoffset") {
                if let Some(reg) = self.register_or_packoffset()? {
                    register = Some(reg);
                }
            } else {
                semantic = Some(self.expect_ident()?);
            }
        }
        let init = if self.eat("=") {
            Some(self.initializer()?)
        } else {
            None
        };
        Ok(VarDecl {
            name,
            ty,
            dims,
            qualifiers,
            semantic,
            register,
            init,
            location,
        })
    }

    fn initializer(&mut self) -> PResult<Initializer> {
        let location = self.location();
        if self.eat("{") {
            let mut items = Vec::new();
            while !self.eat("}") {
                items.push(self.initializer()?);
                if !self.eat(",") {
                    self.expect("}")?;
                    break;
                }
            }
            Ok(Initializer::List(items, location))
        } else {
            Ok(Initializer::Expr(self.assignment()?))
        }
    }

    fn function_rest(
        &mut self,
        name: String,
        return_type: TypeName,
        return_qualifiers: Qualifiers,
        attributes: Vec<Attribute>,
        location: SourceLocation,
    ) -> PResult<FunctionDef> {
        self.expect("(")?;
        let mut params = Vec::new();
        if self.check_ident("void") && self.peek_at(1).is_punct(")") {
            self.advance();
        }
        if !self.check(")") {
            loop {
                let location = self.location();
                let qualifiers = self.qualifiers();
                let ty = self.type_name()?;
                let name = self.expect_ident()?;
                params.push(self.declarator_rest(name, ty, qualifiers, location)?);
                if !self.eat(",") {
                    break;
                }
            }
        }
        self.expect(")")?;
        let mut semantic = None;
        if self.eat(":") {
            semantic = Some(self.expect_ident()?);
        }
        let body = if self.eat(";") {
            None
        } else {
            Some(self.block()?)
        };
        Ok(FunctionDef {
            name,
            return_type,
            return_qualifiers,
            params,
            semantic,
            attributes,
            body,
            location,
        })
    }

    fn block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect("{")?;
        let mut stmts = Vec::new();
        while !self.eat("}") {
            if self.at_eof() {
                return Err(self.error_here("'}'"));
            }
            stmts.push(self.statement()?);
        }
        Ok(stmts)
    }

    /// Whether the tokens at the cursor start a local declaration.
    fn at_declaration(&self) -> bool {
        let mut offset = 0;
        while let Some(word) = self.peek_at(offset).ident() {
            match word {
                "static" | "const" | "uniform" | "groupshared" | "precise" | "row_major"
                | "column_major" | "volatile" => offset += 1,
                _ => break,
            }
        }
        let Some(name) = self.peek_at(offset).ident() else {
            return false;
        };
        if !self.is_type_name(name) {
            return false;
        }
        if self.peek_at(offset + 1).is_punct("<") {
            return true;
        }
        matches!(self.peek_at(offset + 1).kind, TokenKind::Ident(_))
    }

    fn statement(&mut self) -> PResult<Stmt> {
        let location = self.location();
        if self.check("[") {
            // [unroll], [loop], [branch], [flatten], ... only steer codegen
            self.attributes()?;
            return self.statement();
        }
        let kind = if self.check("{") {
            StmtKind::Block(self.block()?)
        } else if self.eat(";") {
            StmtKind::Empty
        } else if self.eat_ident("if") {
            self.expect("(")?;
            let condition = self.expression()?;
            self.expect(")")?;
            let accept = Box::new(self.statement()?);
            let reject = if self.eat_ident("else") {
                Some(Box::new(self.statement()?))
            } else {
                None
            };
            StmtKind::If {
                condition,
                accept,
                reject,
            }
        } else if self.eat_ident("for") {
            self.expect("(")?;
            let init = if self.eat(";") {
                None
            } else if self.at_declaration() {
                let init_location = self.location();
                let decls = self.local_decls()?;
                Some(Box::new(Stmt {
                    kind: StmtKind::Decl(decls),
                    location: init_location,
                }))
            } else {
                let init_location = self.location();
                let expr = self.expression()?;
                self.expect(";")?;
                Some(Box::new(Stmt {
                    kind: StmtKind::Expr(expr),
                    location: init_location,
                }))
            };
            let condition = if self.check(";") {
                None
            } else {
                Some(self.expression()?)
            };
            self.expect(";")?;
            let step = if self.check(")") {
                None
            } else {
                Some(self.expression()?)
            };
            self.expect(")")?;
            let body = Box::new(self.statement()?);
            StmtKind::For {
                init,
                condition,
                step,
                body,
            }
        } else if self.eat_ident("while") {
            self.expect("(")?;
            let condition = self.expression()?;
            self.expect(")")?;
            StmtKind::While {
                condition,
                body: Box::new(self.statement()?),
            }
        } else if self.eat_ident("do") {
            let body = Box::new(self.statement()?);
            if !self.eat_ident("while") {
                return Err(self.error_here("'while'"));
            }
            self.expect("(")?;
            let condition = self.expression()?;
            self.expect(")")?;
            self.expect(";")?;
            StmtKind::DoWhile { body, condition }
        } else if self.eat_ident("switch") {
            self.switch_body()?
        } else if self.eat_ident("break") {
            self.expect(";")?;
            StmtKind::Break
        } else if self.eat_ident("continue") {
            self.expect(";")?;
            StmtKind::Continue
        } else if self.eat_ident("discard") {
            self.expect(";")?;
            StmtKind::Discard
        } else if self.eat_ident("return") {
            let value = if self.check(";") {
                None
            } else {
                Some(self.expression()?)
            };
            self.expect(";")?;
            StmtKind::Return(value)
        } else if self.at_declaration() {
            StmtKind::Decl(self.local_decls()?)
        } else {
            let expr = self.expression()?;
            self.expect(";")?;
            StmtKind::Expr(expr)
        };
        Ok(Stmt { kind, location })
    }

    fn local_decls(&mut self) -> PResult<Vec<VarDecl>> {
        let location = self.location();
        let qualifiers = self.qualifiers();
        let ty = self.type_name()?;
        let mut decls = Vec::new();
        let mut location = location;
        loop {
            let name = self.expect_ident()?;
            decls.push(self.declarator_rest(name, ty.clone(), qualifiers.clone(), location)?);
            if !self.eat(",") {
                break;
            }
            location = self.location();
        }
        self.expect(";")?;
        Ok(decls)
    }

    fn switch_body(&mut self) -> PResult<StmtKind> {
        self.expect("(")?;
        let selector = self.expression()?;
        self.expect(")")?;
        self.expect("{")?;
        let mut cases: Vec<CaseGroup> = Vec::new();
        while !self.eat("}") {
            if self.at_eof() {
                return Err(self.error_here("'}'"));
            }
            let location = self.location();
            let mut labels = Vec::new();
            loop {
                if self.eat_ident("case") {
                    labels.push(Some(self.conditional()?));
                    self.expect(":")?;
                } else if self.eat_ident("default") {
                    labels.push(None);
                    self.expect(":")?;
                } else {
                    break;
                }
            }
            if labels.is_empty() {
                return Err(self.error_here("'case' or 'default'"));
            }
            let mut body = Vec::new();
            while !self.check_ident("case") && !self.check_ident("default") && !self.check("}") {
                if self.at_eof() {
                    return Err(self.error_here("'}'"));
                }
                body.push(self.statement()?);
            }
            cases.push(CaseGroup {
                labels,
                body,
                location,
            });
        }
        Ok(StmtKind::Switch { selector, cases })
    }

    fn expression(&mut self) -> PResult<Expr> {
        let mut expr = self.assignment()?;
        while self.check(",") {
            let location = self.location();
            self.advance();
            let right = self.assignment()?;
            expr = Expr {
                kind: ExprKind::Comma(Box::new(expr), Box::new(right)),
                location,
            };
        }
        Ok(expr)
    }

    fn assignment(&mut self) -> PResult<Expr> {
        let target = self.conditional()?;
        let op = match &self.peek().kind {
            TokenKind::Punct(p) => match *p {
                "=" => Some(None),
                "+=" => Some(Some(BinaryOp::Add)),
                "-=" => Some(Some(BinaryOp::Sub)),
                "*=" => Some(Some(BinaryOp::Mul)),
                "/=" => Some(Some(BinaryOp::Div)),
                "%=" => Some(Some(BinaryOp::Rem)),
                "<<=" => Some(Some(BinaryOp::Shl)),
                ">>=" => Some(Some(BinaryOp::Shr)),
                "&=" => Some(Some(BinaryOp::BitAnd)),
                "|=" => Some(Some(BinaryOp::BitOr)),
                "^=" => Some(Some(BinaryOp::BitXor)),
                _ => None,
            },
            _ => None,
        };
        let Some(op) = op else {
            return Ok(target);
        };
        let location = self.location();
        self.advance();
        let value = self.assignment()?;
        Ok(Expr {
            kind: ExprKind::Assign {
                op,
                target: Box::new(target),
                value: Box::new(value),
            },
            location,
        })
    }

    fn conditional(&mut self) -> PResult<Expr> {
        let condition = self.binary(1)?;
        if !self.check("?") {
            return Ok(condition);
        }
        let location = self.location();
        self.advance();
        let accept = self.assignment()?;
        self.expect(":")?;
        let reject = self.assignment()?;
        Ok(Expr {
            kind: ExprKind::Conditional {
                condition: Box::new(condition),
                accept: Box::new(accept),
                reject: Box::new(reject),
            },
            location,
        })
    }

    fn binary_op(&self) -> Option<(BinaryOp, u8)> {
        let TokenKind::Punct(p) = self.peek().kind else {
            return None;
        };
        Some(match p {
            "||" => (BinaryOp::LogicalOr, 1),
            "&&" => (BinaryOp::LogicalAnd, 2),
            "|" => (BinaryOp::BitOr, 3),
            "^" => (BinaryOp::BitXor, 4),
            "&" => (BinaryOp::BitAnd, 5),
            "==" => (BinaryOp::Eq, 6),
            "!=" => (BinaryOp::Ne, 6),
            "<" => (BinaryOp::Lt, 7),
            ">" => (BinaryOp::Gt, 7),
            "<=" => (BinaryOp::Le, 7),
            ">=" => (BinaryOp::Ge, 7),
            "<<" => (BinaryOp::Shl, 8),
            ">>" => (BinaryOp::Shr, 8),
            "+" => (BinaryOp::Add, 9),
            "-" => (BinaryOp::Sub, 9),
            "*" => (BinaryOp::Mul, 10),
            "/" => (BinaryOp::Div, 10),
            "%" => (BinaryOp::Rem, 10),
            _ => return None,
        })
    }

    fn binary(&mut self, min_prec: u8) -> PResult<Expr> {
        let mut left = self.unary()?;
        while let Some((op, prec)) = self.binary_op() {
            if prec < min_prec {
                break;
            }
            let location = self.location();
            self.advance();
            let right = self.binary(prec + 1)?;
            left = Expr {
                kind: ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                location,
            };
        }
        Ok(left)
    }

    /// Whether `(` at the cursor opens a cast.
    fn at_cast(&self) -> bool {
        if !self.check("(") {
            return false;
        }
        let mut offset = 1;
        while matches!(self.peek_at(offset).ident(), Some("const" | "row_major" | "column_major")) {
            offset += 1;
        }
        match self.peek_at(offset).ident() {
            Some(name) if self.is_type_name(name) => {
                let next = self.peek_at(offset + 1);
                next.is_punct(")") || next.is_punct("<")
            }
            _ => false,
        }
    }

    fn unary(&mut self) -> PResult<Expr> {
        let location = self.location();
        let op = match self.peek().kind {
            TokenKind::Punct("+") => Some(UnaryOperator::Plus),
            TokenKind::Punct("-") => Some(UnaryOperator::Neg),
            TokenKind::Punct("!") => Some(UnaryOperator::Not),
            TokenKind::Punct("~") => Some(UnaryOperator::BitNot),
            TokenKind::Punct("++") => Some(UnaryOperator::PreInc),
            TokenKind::Punct("--") => Some(UnaryOperator::PreDec),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.unary()?;
            return Ok(Expr {
                kind: ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                location,
            });
        }
        if self.at_cast() {
            self.advance();
            while self.eat_ident("const") || self.eat_ident("row_major") || self.eat_ident("column_major") {}
            let ty = self.type_name()?;
            self.expect(")")?;
            let operand = self.unary()?;
            return Ok(Expr {
                kind: ExprKind::Cast {
                    ty,
                    operand: Box::new(operand),
                },
                location,
            });
        }
        self.postfix()
    }

    fn call_args(&mut self) -> PResult<Vec<Expr>> {
        self.expect("(")?;
        let mut args = Vec::new();
        if !self.check(")") {
            loop {
                args.push(self.assignment()?);
                if !self.eat(",") {
                    break;
                }
            }
        }
        self.expect(")")?;
        Ok(args)
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            let location = self.location();
            if self.eat(".") {
                let name = self.expect_ident()?;
                expr = if self.check("(") {
                    let args = self.call_args()?;
                    Expr {
                        kind: ExprKind::MethodCall {
                            object: Box::new(expr),
                            method: name,
                            args,
                        },
                        location,
                    }
                } else {
                    Expr {
                        kind: ExprKind::Member {
                            base: Box::new(expr),
                            name,
                        },
                        location,
                    }
                };
            } else if self.eat("[") {
                let index = self.expression()?;
                self.expect("]")?;
                expr = Expr {
                    kind: ExprKind::Index {
                        base: Box::new(expr),
                        index: Box::new(index),
                    },
                    location,
                };
            } else if self.check("++") || self.check("--") {
                let op = if self.check("++") {
                    UnaryOperator::PostInc
                } else {
                    UnaryOperator::PostDec
                };
                self.advance();
                expr = Expr {
                    kind: ExprKind::Unary {
                        op,
                        operand: Box::new(expr),
                    },
                    location,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> PResult<Expr> {
        let location = self.location();
        let kind = match self.peek().kind.clone() {
            TokenKind::Int { value, unsigned } => {
                self.advance();
                ExprKind::Int { value, unsigned }
            }
            TokenKind::Float { value, suffix } => {
                self.advance();
                ExprKind::Float { value, suffix }
            }
            TokenKind::Str(text) => {
                self.advance();
                ExprKind::Str(text)
            }
            TokenKind::Punct("(") => {
                self.advance();
                let inner = self.expression()?;
                self.expect(")")?;
                return Ok(inner);
            }
            TokenKind::Ident(name) => {
                if name == "true" || name == "false" {
                    self.advance();
                    ExprKind::Bool(name == "true")
                } else if self.is_type_name(&name) {
                    let ty = self.type_name()?;
                    if !self.check("(") {
                        return Err(self.error_here("'(' after type name"));
                    }
                    let args = self.call_args()?;
                    ExprKind::Constructor { ty, args }
                } else {
                    self.advance();
                    if self.check("(") {
                        let args = self.call_args()?;
                        ExprKind::Call { name, args }
                    } else {
                        ExprKind::Ident(name)
                    }
                }
            }
            _ => return Err(self.error_here("expression")),
        };
        Ok(Expr { kind, location })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::lexer::tokenize;
    use std::sync::Arc;

    fn parse_str(source: &str) -> PResult<TranslationUnit> {
        let tokens = tokenize(source, Arc::from("test.hlsl")).unwrap();
        parse(tokens)
    }

    #[test]
    fn test_parses_pixel_shader() {
        let unit = parse_str("float4 PS() : SV_Target { return float4(1, 0, 0, 1); }").unwrap();
        let Decl::Function(f) = &unit.decls[0] else {
            panic!("expected function");
        };
        assert_eq!(f.name, "PS");
        assert_eq!(f.semantic.as_deref(), Some("SV_Target"));
        let body = f.body.as_ref().unwrap();
        assert!(matches!(
            &body[0].kind,
            StmtKind::Return(Some(Expr { kind: ExprKind::Constructor { .. }, .. }))
        ));
    }

    #[test]
    fn test_parses_resources_and_cbuffers() {
        let unit = parse_str(
            "Texture2D<float4> tex : register(t1, space2);\n\
             SamplerState samp : register(s0);\n\
             cbuffer Params : register(b3) { float4x4 wvp; float2 offset, scale; };\n\
             RWStructuredBuffer<uint> output : register(u0);",
        )
        .unwrap();
        assert_eq!(unit.decls.len(), 4);
        let Decl::Variable(tex) = &unit.decls[0] else {
            panic!("expected variable");
        };
        let reg = tex.register.as_ref().unwrap();
        assert_eq!((reg.class, reg.index, reg.space), (RegisterClass::ShaderResource, 1, 2));
        let Decl::CBuffer(cb) = &unit.decls[2] else {
            panic!("expected cbuffer");
        };
        assert_eq!(cb.fields.len(), 3);
        assert_eq!(cb.fields[2].name, "scale");
    }

    #[test]
    fn test_precedence_and_assignment() {
        let unit = parse_str("void f() { int a; a += 1 + 2 * 3; }").unwrap();
        let Decl::Function(f) = &unit.decls[0] else {
            panic!("expected function");
        };
        let StmtKind::Expr(expr) = &f.body.as_ref().unwrap()[1].kind else {
            panic!("expected expression statement");
        };
        let ExprKind::Assign { op, value, .. } = &expr.kind else {
            panic!("expected assignment");
        };
        assert_eq!(*op, Some(BinaryOp::Add));
        assert!(matches!(
            &value.kind,
            ExprKind::Binary { op: BinaryOp::Add, right, .. }
                if matches!(right.kind, ExprKind::Binary { op: BinaryOp::Mul, .. })
        ));
    }

    #[test]
    fn test_nested_template_close() {
        let unit = parse_str("StructuredBuffer<vector<float, 4>> data;").unwrap();
        let Decl::Variable(v) = &unit.decls[0] else {
            panic!("expected variable");
        };
        assert_eq!(v.ty.name, "StructuredBuffer");
        assert!(matches!(&v.ty.args[0], TemplateArg::Type(t) if t.name == "vector"));
    }

    #[test]
    fn test_casts_and_struct_types() {
        let unit = parse_str(
            "struct V { float3 p : POSITION; };\nfloat f(V v) { return (float)v.p.x + ((int)2); }",
        )
        .unwrap();
        assert_eq!(unit.decls.len(), 2);
    }

    #[test]
    fn test_numthreads_and_control_flow() {
        let unit = parse_str(
            "[numthreads(8, 8, 1)]\nvoid CS(uint3 id : SV_DispatchThreadID) {\n\
             [unroll] for (int i = 0; i < 4; ++i) { if (i == 2) continue; }\n\
             switch (id.x) { case 0: case 1: break; default: return; }\n\
             do { } while (false);\n}",
        )
        .unwrap();
        let Decl::Function(f) = &unit.decls[0] else {
            panic!("expected function");
        };
        assert_eq!(f.attributes[0].name, "numthreads");
        assert_eq!(f.attributes[0].args.len(), 3);
        let body = f.body.as_ref().unwrap();
        let StmtKind::Switch { cases, .. } = &body[1].kind else {
            panic!("expected switch");
        };
        assert_eq!(cases[0].labels.len(), 2);
        assert_eq!(cases[1].labels, vec![None]);
    }

    #[test]
    fn test_syntax_error_reports_token() {
        let err = parse_str("float4 main() : SV_Target { return 1 }").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert!(err.message.contains("';'"));
        assert!(err.message.contains("'}'"));
    }

    #[test]
    fn test_pack_matrix_pragma_applies_to_later_declarations() {
        let tokens = tokenize(
            "#pragma pack_matrix(row_major)\nfloat4x4 m;",
            Arc::from("test.hlsl"),
        )
        .unwrap();
        let unit = parse(tokens).unwrap();
        let Decl::Variable(v) = &unit.decls[0] else {
            panic!("expected variable");
        };
        assert_eq!(v.qualifiers.matrix_layout, Some(MatrixLayout::RowMajor));
    }
}
