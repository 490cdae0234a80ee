//! Shared machinery for the C-like text targets (HLSL, GLSL, MSL)
//!
//! The dialects only differ in spelling: types, literals, intrinsic names,
//! resource access and the entry-point interface. Everything structural
//! (statement nesting, loop lowering, local naming) lives here and calls
//! back into a [`Syntax`] for the dialect-specific pieces.

use crate::ir::{
    BinaryOp, Block, CallArg, EntryPoint, Expr, ExprKind, Function, GlobalVariable,
    Handle, Intrinsic, Literal, Local, MemoryScope, Module, ParamDirection, Place, ResourceRef,
    SampleLevel, Scalar, ScalarKind, Statement, TextureType, Type, UnaryOp, Varying,
    VaryingSource,
};
use std::collections::HashSet;

/// Indenting line writer.
#[derive(Debug, Default)]
pub(super) struct Writer {
    out: String,
    level: usize,
}

impl Writer {
    pub fn new() -> Self {
        Writer::default()
    }

    pub fn line(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        if !text.is_empty() {
            for _ in 0..self.level {
                self.out.push_str("    ");
            }
            self.out.push_str(text);
        }
        self.out.push('\n');
    }

    pub fn blank(&mut self) {
        if !self.out.is_empty() && !self.out.ends_with("\n\n") {
            self.out.push('\n');
        }
    }

    pub fn open(&mut self) {
        self.line("{");
        self.level += 1;
    }

    pub fn close(&mut self) {
        self.close_with("}");
    }

    /// Closes a scope with custom text, `};` for type declarations.
    pub fn close_with(&mut self, text: &str) {
        self.level = self.level.saturating_sub(1);
        self.line(text);
    }

    pub fn finish(self) -> String {
        self.out
    }
}

/// Hands out identifiers that collide neither with keywords nor with each other.
#[derive(Debug, Clone)]
pub(super) struct Namer {
    used: HashSet<String>,
    reserved: &'static [&'static str],
    reserved_prefixes: &'static [&'static str],
}

impl Namer {
    pub fn new(reserved: &'static [&'static str], reserved_prefixes: &'static [&'static str]) -> Self {
        Namer {
            used: HashSet::new(),
            reserved,
            reserved_prefixes,
        }
    }

    /// Claims `name` verbatim, for built-in identifiers the output defines itself.
    pub fn reserve(&mut self, name: &str) {
        self.used.insert(name.to_string());
    }

    pub fn is_keyword(&self, name: &str) -> bool {
        self.reserved.contains(&name)
            || self.reserved_prefixes.iter().any(|p| name.starts_with(p))
    }

    /// A legal, unused identifier derived from `base`.
    pub fn name(&mut self, base: &str) -> String {
        let mut candidate = sanitize(base);
        if self.is_keyword(&candidate) {
            candidate = format!("_{}", candidate);
        }
        if self.used.contains(&candidate) {
            let mut n = 1;
            while self.used.contains(&format!("{}_{}", candidate, n)) {
                n += 1;
            }
            candidate = format!("{}_{}", candidate, n);
        }
        self.used.insert(candidate.clone());
        candidate
    }

    /// Legal spelling of a struct member; members live in their own namespace.
    pub fn member(&self, base: &str) -> String {
        let candidate = sanitize(base);
        if self.is_keyword(&candidate) {
            format!("_{}", candidate)
        } else {
            candidate
        }
    }
}

/// Replaces anything outside `[A-Za-z0-9_]` and collapses double underscores.
pub(super) fn sanitize(base: &str) -> String {
    let mut out = String::with_capacity(base.len() + 1);
    for c in base.chars() {
        let c = if c.is_ascii_alphanumeric() { c } else { '_' };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Module-wide identifiers.
#[derive(Debug, Clone)]
pub(super) struct Names {
    pub structs: Vec<String>,
    pub members: Vec<Vec<String>>,
    pub globals: Vec<String>,
    pub functions: Vec<String>,
}

impl Names {
    /// Names structs, globals and functions in declaration order.
    pub fn new(module: &Module, namer: &mut Namer) -> Self {
        let structs = module.structs.iter().map(|(_, s)| namer.name(&s.name)).collect();
        let members = module
            .structs
            .iter()
            .map(|(_, s)| s.members.iter().map(|m| namer.member(&m.name)).collect())
            .collect();
        let globals = module.globals.iter().map(|(_, g)| namer.name(&g.name)).collect();
        let functions = module.functions.iter().map(|(_, f)| namer.name(&f.name)).collect();
        Names {
            structs,
            members,
            globals,
            functions,
        }
    }

    pub fn global(&self, h: Handle<GlobalVariable>) -> &str {
        &self.globals[h.index()]
    }

    pub fn member(&self, ty: &Type, index: u32) -> &str {
        match ty {
            Type::Struct(h) => self.members[h.index()]
                .get(index as usize)
                .map(String::as_str)
                .unwrap_or("_invalid"),
            _ => "_invalid",
        }
    }
}

/// Unique names for every local of `function`.
pub(super) fn local_names(function: &Function, namer: &Namer) -> Vec<String> {
    let mut namer = namer.clone();
    function.locals.iter().map(|(_, l)| namer.name(&l.name)).collect()
}

pub(super) fn swizzle_letters(pattern: &[u8]) -> String {
    pattern
        .iter()
        .map(|&c| ['x', 'y', 'z', 'w'][(c & 3) as usize])
        .collect()
}

/// Shortest round-tripping spelling of a 32-bit float, always with a `.` or exponent.
pub(super) fn float_digits(value: f64) -> String {
    let text = format!("{:?}", value as f32);
    if text.contains(['.', 'e', 'E']) {
        text
    } else {
        format!("{}.0", text)
    }
}

pub(super) fn double_digits(value: f64) -> String {
    let text = format!("{:?}", value);
    if text.contains(['.', 'e', 'E']) {
        text
    } else {
        format!("{}.0", text)
    }
}

/// Signed integer spelling that survives the unary-minus-on-literal parse.
pub(super) fn int_digits(value: i64) -> String {
    if value == i32::MIN as i64 {
        "(-2147483647 - 1)".to_string()
    } else {
        value.to_string()
    }
}

/// Sampling operands, already printed.
pub(super) struct SampleText {
    pub texture: ResourceRef,
    pub sampler: ResourceRef,
    pub image: TextureType,
    pub coord: String,
    pub level: LevelText,
    pub offset: Option<String>,
    pub compare: Option<String>,
}

pub(super) enum LevelText {
    Auto,
    Bias(String),
    Lod(String),
    Grad(String, String),
    Zero,
}

/// Per-function naming state handed to the dialect hooks.
pub(super) struct Scope<'a> {
    pub module: &'a Module,
    pub names: &'a Names,
    pub function: &'a Function,
    pub handle: Handle<Function>,
    pub locals: Vec<String>,
}

impl Scope<'_> {
    pub fn local(&self, h: Handle<Local>) -> &str {
        &self.locals[h.index()]
    }

    pub fn resource(&self, r: ResourceRef) -> &str {
        match r {
            ResourceRef::Global(h) => self.names.global(h),
            ResourceRef::Param(i) => match self.function.params.get(i as usize) {
                Some(p) => self.local(p.local),
                None => "_invalid",
            },
        }
    }

    pub fn resource_type(&self, r: ResourceRef) -> Type {
        self.function.resource_type(self.module, r)
    }
}

/// Dialect hooks. Operands arrive printed; types arrive as IR types.
pub(super) trait Syntax {
    fn type_name(&self, s: &Scope, ty: &Type) -> String;

    fn literal(&self, value: Literal, scalar: Scalar) -> String;

    /// `T name` including array suffixes.
    fn declare(&self, s: &Scope, ty: &Type, name: &str) -> String {
        let mut dims = String::new();
        let mut base = ty;
        while let Type::Array(elem, n) = base {
            dims.push_str(&format!("[{}]", n));
            base = elem;
        }
        format!("{} {}{}", self.type_name(s, base), name, dims)
    }

    fn global(&self, s: &Scope, h: Handle<GlobalVariable>) -> String {
        s.names.global(h).to_string()
    }

    fn cbuffer_member(&self, s: &Scope, buffer: Handle<GlobalVariable>, member: u32) -> String;

    /// Element `index` of a structured or byte-address buffer.
    fn element(&self, s: &Scope, resource: ResourceRef, index: String) -> String;

    /// Rewrites a completed read, for members whose stored form differs.
    fn load(&self, _s: &Scope, _place: &Place, text: String) -> String {
        text
    }

    fn binary(&self, _s: &Scope, op: BinaryOp, _ty: &Type, left: String, right: String) -> String {
        format!("({} {} {})", left, op.symbol(), right)
    }

    fn unary(&self, _s: &Scope, op: UnaryOp, _ty: &Type, value: String) -> String {
        let symbol = match op {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "~",
        };
        if value.starts_with(['-', '!', '~']) {
            format!("({}({}))", symbol, value)
        } else {
            format!("({}{})", symbol, value)
        }
    }

    fn select(&self, _s: &Scope, _condition: &Type, _ty: &Type, c: String, a: String, b: String) -> String {
        format!("({} ? {} : {})", c, a, b)
    }

    fn construct(&self, s: &Scope, ty: &Type, args: Vec<String>) -> String {
        format!("{}({})", self.type_name(s, ty), args.join(", "))
    }

    fn splat(&self, s: &Scope, ty: &Type, value: String) -> String {
        format!("{}({})", self.type_name(s, ty), value)
    }

    fn convert(&self, s: &Scope, ty: &Type, _from: &Type, value: String) -> String {
        format!("{}({})", self.type_name(s, ty), value)
    }

    fn bitcast(&self, s: &Scope, ty: &Type, from: &Type, value: String) -> String;

    fn swizzle(&self, s: &Scope, base: &Type, value: String, pattern: &[u8], ty: &Type) -> String {
        if base.is_scalar() {
            if pattern.len() == 1 {
                value
            } else {
                self.splat(s, ty, value)
            }
        } else {
            format!("{}.{}", value, swizzle_letters(pattern))
        }
    }

    fn intrinsic(&self, s: &Scope, fun: Intrinsic, args: &[Expr], printed: Vec<String>, ty: &Type) -> String;

    fn matmul(&self, s: &Scope, left: &Expr, right: &Expr, l: String, r: String) -> String;

    fn sample(&self, s: &Scope, sample: SampleText, ty: &Type) -> String;

    fn image_load(&self, s: &Scope, image: ResourceRef, coord: String, lod: Option<String>, ty: &Type) -> String;

    /// Statement text for a texel write.
    fn image_store(&self, s: &Scope, image: ResourceRef, coord: String, value: String, value_ty: &Type) -> String;

    /// Statement text for a store straight into a buffer element, when the
    /// dialect cannot spell it as an assignment.
    fn element_store(&self, _s: &Scope, _resource: ResourceRef, _index: &str, _value: &str) -> Option<String> {
        None
    }

    fn discard(&self) -> &'static str {
        "discard;"
    }

    fn barrier(&self, scope: MemoryScope, sync: bool) -> String;

    /// Extra arguments a call passes, for dialects without global resources.
    fn call_args(&self, _s: &Scope, _callee: Handle<Function>, args: Vec<String>) -> Vec<String> {
        args
    }

    /// Whether struct and array values must be spelled as per-member stores.
    fn split_aggregate_stores(&self) -> bool {
        false
    }

    fn case_label(&self, selector: &Type, value: i64) -> String {
        match selector.scalar() {
            Some(Scalar {
                kind: ScalarKind::Uint,
                ..
            }) => format!("{}u", value as u32),
            _ => int_digits(value),
        }
    }
}

enum Frame<'a> {
    Loop {
        continuing: &'a Block,
        break_if: Option<&'a Expr>,
    },
    Switch,
}

/// Prints one function body through a [`Syntax`].
pub(super) struct BodyWriter<'a, 's, S: Syntax + ?Sized> {
    pub syntax: &'s S,
    pub scope: Scope<'a>,
    frames: Vec<Frame<'a>>,
    temps: usize,
}

impl<'a, 's, S: Syntax + ?Sized> BodyWriter<'a, 's, S> {
    pub fn new(syntax: &'s S, scope: Scope<'a>) -> Self {
        BodyWriter {
            syntax,
            scope,
            frames: Vec::new(),
            temps: 0,
        }
    }

    /// Opening brace, declarations of non-parameter locals, the body and the closing brace.
    pub fn write_body(&mut self, w: &mut Writer) {
        let function = self.scope.function;
        w.open();
        for (h, local) in function.locals.iter() {
            if function.params.iter().any(|p| p.local == h) {
                continue;
            }
            w.line(format!(
                "{};",
                self.syntax.declare(&self.scope, &local.ty, self.scope.local(h))
            ));
        }
        self.block(w, &function.body);
        w.close();
    }

    pub fn block(&mut self, w: &mut Writer, block: &'a Block) {
        for statement in block {
            self.statement(w, statement);
            if statement.is_terminator() {
                break;
            }
        }
    }

    fn temp(&mut self) -> String {
        self.temps += 1;
        let mut name = format!("_tmp{}", self.temps);
        while self.scope.locals.contains(&name) {
            self.temps += 1;
            name = format!("_tmp{}", self.temps);
        }
        name
    }

    fn statement(&mut self, w: &mut Writer, statement: &'a Statement) {
        match statement {
            Statement::Block(inner) => {
                w.open();
                self.block(w, inner);
                w.close();
            }
            Statement::Store { place, value } => self.store(w, place, value),
            Statement::ImageStore { image, coord, value } => {
                let coord = self.expr(coord);
                let text = self.expr(value);
                w.line(self.syntax.image_store(&self.scope, *image, coord, text, &value.ty));
            }
            Statement::Call {
                function,
                args,
                result,
            } => {
                let printed = args
                    .iter()
                    .map(|arg| match arg {
                        CallArg::Value(e) => self.expr(e),
                        CallArg::Ref(h) => self.scope.local(*h).to_string(),
                        CallArg::Resource(r) => self.scope.resource(*r).to_string(),
                    })
                    .collect();
                let args = self.syntax.call_args(&self.scope, *function, printed);
                let call = format!(
                    "{}({})",
                    self.scope.names.functions[function.index()],
                    args.join(", ")
                );
                match result {
                    Some(place) => w.line(format!("{} = {};", self.place(place), call)),
                    None => w.line(format!("{};", call)),
                }
            }
            Statement::If {
                condition,
                accept,
                reject,
            } => {
                w.line(format!("if ({})", self.expr(condition)));
                w.open();
                self.block(w, accept);
                w.close();
                if !reject.is_empty() {
                    w.line("else");
                    w.open();
                    self.block(w, reject);
                    w.close();
                }
            }
            Statement::Loop {
                body,
                continuing,
                break_if,
            } => {
                w.line("for (;;)");
                w.open();
                self.frames.push(Frame::Loop {
                    continuing,
                    break_if: break_if.as_ref(),
                });
                self.block(w, body);
                self.frames.pop();
                if !body.last().is_some_and(Statement::is_terminator) {
                    self.loop_tail(w, continuing, break_if.as_ref());
                }
                w.close();
            }
            Statement::Switch { selector, cases } => {
                w.line(format!("switch ({})", self.expr(selector)));
                w.open();
                self.frames.push(Frame::Switch);
                for case in cases {
                    match case.value {
                        Some(value) => w.line(format!(
                            "case {}:",
                            self.syntax.case_label(&selector.ty, value)
                        )),
                        None => w.line("default:"),
                    }
                    if case.body.is_empty() {
                        continue;
                    }
                    w.open();
                    self.block(w, &case.body);
                    w.close();
                }
                self.frames.pop();
                w.close();
            }
            Statement::Break => w.line("break;"),
            Statement::Continue => {
                let frame = self.frames.iter().rev().find_map(|f| match f {
                    Frame::Loop {
                        continuing,
                        break_if,
                    } => Some((*continuing, *break_if)),
                    Frame::Switch => None,
                });
                match frame {
                    Some((continuing, break_if)) if !continuing.is_empty() || break_if.is_some() => {
                        w.open();
                        self.loop_tail(w, continuing, break_if);
                        w.line("continue;");
                        w.close();
                    }
                    _ => w.line("continue;"),
                }
            }
            Statement::Return(None) => w.line("return;"),
            Statement::Return(Some(value)) => {
                let aggregate = matches!(value.ty, Type::Struct(_) | Type::Array(..))
                    && matches!(value.kind, ExprKind::Construct(_));
                if aggregate && self.syntax.split_aggregate_stores() {
                    let temp = self.temp();
                    w.line(format!(
                        "{} = {};",
                        self.syntax.declare(&self.scope, &value.ty, &temp),
                        self.expr(value)
                    ));
                    w.line(format!("return {};", temp));
                } else {
                    w.line(format!("return {};", self.expr(value)));
                }
            }
            Statement::Discard => w.line(self.syntax.discard()),
            Statement::Barrier { scope, sync } => w.line(self.syntax.barrier(*scope, *sync)),
        }
    }

    fn loop_tail(&mut self, w: &mut Writer, continuing: &'a Block, break_if: Option<&'a Expr>) {
        self.block(w, continuing);
        if let Some(condition) = break_if {
            w.line(format!("if ({})", self.expr(condition)));
            w.open();
            w.line("break;");
            w.close();
        }
    }

    fn store(&mut self, w: &mut Writer, place: &Place, value: &Expr) {
        if self.syntax.split_aggregate_stores() {
            if let ExprKind::Construct(parts) = &value.kind {
                let member = |i: usize| match &value.ty {
                    Type::Struct(_) => Some(Place::Member(Box::new(place.clone()), i as u32)),
                    Type::Array(..) => Some(Place::Index(
                        Box::new(place.clone()),
                        Box::new(Expr::int(i as i64)),
                    )),
                    _ => None,
                };
                if matches!(value.ty, Type::Struct(_) | Type::Array(..)) {
                    for (i, part) in parts.iter().enumerate() {
                        if let Some(target) = member(i) {
                            self.store(w, &target, part);
                        }
                    }
                    return;
                }
            }
        }
        let text = self.expr(value);
        if let Place::Element { resource, index } = place {
            let index = self.expr(index);
            if let Some(line) = self.syntax.element_store(&self.scope, *resource, &index, &text) {
                w.line(line);
                return;
            }
        }
        w.line(format!("{} = {};", self.place(place), text));
    }

    pub fn place(&self, place: &Place) -> String {
        match place {
            Place::Local(h) => self.scope.local(*h).to_string(),
            Place::Global(h) => self.syntax.global(&self.scope, *h),
            Place::CBuffer { buffer, member } => {
                self.syntax.cbuffer_member(&self.scope, *buffer, *member)
            }
            Place::Element { resource, index } => {
                let index = self.expr(index);
                self.syntax.element(&self.scope, *resource, index)
            }
            Place::Member(base, index) => {
                let ty = self.scope.function.place_type(self.scope.module, base);
                format!(
                    "{}.{}",
                    self.place(base),
                    self.scope.names.member(&ty, *index)
                )
            }
            Place::Index(base, index) => format!("{}[{}]", self.place(base), self.expr(index)),
            Place::Swizzle(base, pattern) => {
                format!("{}.{}", self.place(base), swizzle_letters(pattern))
            }
        }
    }

    pub fn expr(&self, expr: &Expr) -> String {
        let s = &self.scope;
        let syntax = self.syntax;
        match &expr.kind {
            ExprKind::Literal(value) => match expr.ty.scalar() {
                Some(scalar) => syntax.literal(*value, scalar),
                None => "0".to_string(),
            },
            ExprKind::Load(place) => syntax.load(s, place, self.place(place)),
            ExprKind::Binary { op, left, right } => {
                syntax.binary(s, *op, &left.ty, self.expr(left), self.expr(right))
            }
            ExprKind::Unary { op, expr: inner } => {
                syntax.unary(s, *op, &inner.ty, self.expr(inner))
            }
            ExprKind::Select {
                condition,
                accept,
                reject,
            } => syntax.select(
                s,
                &condition.ty,
                &expr.ty,
                self.expr(condition),
                self.expr(accept),
                self.expr(reject),
            ),
            ExprKind::Construct(parts) => {
                let args = parts.iter().map(|p| self.expr(p)).collect();
                syntax.construct(s, &expr.ty, args)
            }
            ExprKind::Splat(inner) => syntax.splat(s, &expr.ty, self.expr(inner)),
            ExprKind::Convert(inner) => syntax.convert(s, &expr.ty, &inner.ty, self.expr(inner)),
            ExprKind::Bitcast(inner) => syntax.bitcast(s, &expr.ty, &inner.ty, self.expr(inner)),
            ExprKind::Swizzle { vector, pattern } => {
                syntax.swizzle(s, &vector.ty, self.expr(vector), pattern, &expr.ty)
            }
            ExprKind::Member { base, index } => {
                format!("{}.{}", self.expr(base), s.names.member(&base.ty, *index))
            }
            ExprKind::Index { base, index } => {
                format!("{}[{}]", self.expr(base), self.expr(index))
            }
            ExprKind::Intrinsic { fun, args } => {
                let printed = args.iter().map(|a| self.expr(a)).collect();
                syntax.intrinsic(s, *fun, args, printed, &expr.ty)
            }
            ExprKind::MatMul { left, right } => {
                syntax.matmul(s, left, right, self.expr(left), self.expr(right))
            }
            ExprKind::Sample {
                texture,
                sampler,
                coord,
                level,
                offset,
                compare,
            } => {
                let image = match s.resource_type(*texture) {
                    Type::Texture(t) => t,
                    _ => return "_invalid".to_string(),
                };
                let level = match level {
                    SampleLevel::Auto => LevelText::Auto,
                    SampleLevel::Bias(b) => LevelText::Bias(self.expr(b)),
                    SampleLevel::Lod(l) => LevelText::Lod(self.expr(l)),
                    SampleLevel::Grad(x, y) => LevelText::Grad(self.expr(x), self.expr(y)),
                    SampleLevel::Zero => LevelText::Zero,
                };
                let sample = SampleText {
                    texture: *texture,
                    sampler: *sampler,
                    image,
                    coord: self.expr(coord),
                    level,
                    offset: offset.as_ref().map(|o| self.expr(o)),
                    compare: compare.as_ref().map(|c| self.expr(c)),
                };
                syntax.sample(s, sample, &expr.ty)
            }
            ExprKind::ImageLoad { image, coord, lod } => syntax.image_load(
                s,
                *image,
                self.expr(coord),
                lod.as_ref().map(|l| self.expr(l)),
                &expr.ty,
            ),
        }
    }
}

/// `.a.b` for a member path below a value of type `ty`.
pub(super) fn member_path<'a>(
    module: &'a Module,
    names: &Names,
    mut ty: &'a Type,
    path: &[u32],
) -> String {
    let mut text = String::new();
    for &index in path {
        text.push('.');
        text.push_str(names.member(ty, index));
        ty = match ty {
            Type::Struct(h) => match module.structs[*h].members.get(index as usize) {
                Some(m) => &m.ty,
                None => break,
            },
            _ => break,
        };
    }
    text
}

/// Semantic with its index always spelled out (`TEXCOORD0`).
pub(super) fn semantic_text(varying: &Varying) -> String {
    format!("{}{}", varying.semantic.name, varying.semantic.index)
}

/// Narrows a four-component texel to the expression type.
pub(super) fn narrow_texel(value: String, ty: &Type) -> String {
    match ty.vector_size() {
        Some(n) if n < 4 => {
            let pattern: Vec<u8> = (0..n).collect();
            format!("{}.{}", value, swizzle_letters(&pattern))
        }
        _ => value,
    }
}

/// Converts a value between a built-in's natural type and the declared type.
pub(super) fn adapt<S: Syntax + ?Sized>(syntax: &S, s: &Scope, value: String, from: &Type, to: &Type) -> String {
    if from == to {
        return value;
    }
    let mut value = value;
    let mut shape = from.clone();
    if let (Some(n_from), Some(n_to)) = (from.vector_size(), to.vector_size()) {
        if n_to < n_from {
            let pattern: Vec<u8> = (0..n_to).collect();
            value = format!("{}.{}", value, swizzle_letters(&pattern));
            if let Some(scalar) = from.scalar() {
                shape = Type::vector(scalar, n_to);
            }
        }
    }
    if &shape != to {
        value = format!("{}({})", syntax.type_name(s, to), value);
    }
    value
}

pub(super) fn zero_value<S: Syntax + ?Sized>(syntax: &S, s: &Scope, ty: &Type) -> String {
    match ty.scalar() {
        Some(scalar) => {
            let zero = syntax.literal(Literal::Int(0), scalar);
            if ty.is_scalar() {
                zero
            } else {
                syntax.splat(s, ty, zero)
            }
        }
        None => format!("{}(0)", syntax.type_name(s, ty)),
    }
}

/// Per-varying access text and natural type; `None` for built-ins the target lacks.
#[derive(Debug, Default)]
pub(super) struct Interface {
    pub inputs: Vec<Option<(String, Type)>>,
    pub outputs: Vec<Option<(String, Type)>>,
}

impl Interface {
    pub fn push(&mut self, is_output: bool, entry: Option<(String, Type)>) {
        if is_output {
            self.outputs.push(entry);
        } else {
            self.inputs.push(entry);
        }
    }
}

/// Gathers the stage inputs into entry arguments, calls the entry function
/// and scatters its results to the stage outputs.
pub(super) fn write_entry_call<S: Syntax + ?Sized>(
    syntax: &S,
    w: &mut Writer,
    scope: &Scope,
    entry: &EntryPoint,
    interface: &Interface,
    namer: &mut Namer,
    extra_args: Vec<String>,
) {
    let module = scope.module;
    let names = scope.names;
    let function = scope.function;
    let read = |varying: &Varying, io: &Option<(String, Type)>| match io {
        Some((name, natural)) => adapt(syntax, scope, name.clone(), natural, &varying.ty),
        None => zero_value(syntax, scope, &varying.ty),
    };
    let mut args = Vec::new();
    let mut temps: Vec<Option<String>> = Vec::new();
    for (index, param) in function.params.iter().enumerate() {
        let local = &function.locals[param.local];
        let sources: Vec<(&Varying, &Option<(String, Type)>)> = entry
            .inputs
            .iter()
            .zip(&interface.inputs)
            .filter(|(v, _)| matches!(&v.source, VaryingSource::Param { index: i, .. } if *i == index))
            .collect();
        let whole = sources.len() == 1
            && matches!(&sources[0].0.source, VaryingSource::Param { path, .. } if path.is_empty());
        if whole && param.direction == ParamDirection::In {
            let (varying, io) = sources[0];
            args.push(read(varying, io));
            temps.push(None);
            continue;
        }
        let temp = namer.name(&format!("param_var_{}", local.name));
        w.line(format!("{};", syntax.declare(scope, &local.ty, &temp)));
        if param.direction != ParamDirection::Out {
            for (varying, io) in &sources {
                let VaryingSource::Param { path, .. } = &varying.source else {
                    continue;
                };
                w.line(format!(
                    "{}{} = {};",
                    temp,
                    member_path(module, names, &local.ty, path),
                    read(*varying, *io)
                ));
            }
        }
        args.push(temp.clone());
        temps.push(Some(temp));
    }
    args.extend(extra_args);
    let call = format!("{}({})", names.functions[scope.handle.index()], args.join(", "));
    let result = if function.result == Type::Void {
        w.line(format!("{};", call));
        None
    } else {
        let name = namer.name("_ret");
        w.line(format!("{} = {};", syntax.declare(scope, &function.result, &name), call));
        Some(name)
    };
    for (varying, io) in entry.outputs.iter().zip(&interface.outputs) {
        let Some((target, natural)) = io else {
            continue;
        };
        let value = match &varying.source {
            VaryingSource::Result { path } => match &result {
                Some(name) => format!("{}{}", name, member_path(module, names, &function.result, path)),
                None => continue,
            },
            VaryingSource::Param { index, path } => {
                let Some(Some(temp)) = temps.get(*index) else {
                    continue;
                };
                let ty = &function.locals[function.params[*index].local].ty;
                format!("{}{}", temp, member_path(module, names, ty, path))
            }
        };
        w.line(format!("{} = {};", target, adapt(syntax, scope, value, &varying.ty, natural)));
    }
}

/// Globals a function reads or writes, directly or through its callees.
///
/// Indexed by function; relies on callees preceding callers.
pub(super) fn globals_used(module: &Module) -> Vec<Vec<Handle<GlobalVariable>>> {
    let mut used: Vec<Vec<Handle<GlobalVariable>>> = Vec::with_capacity(module.functions.len());
    for (_, function) in module.functions.iter() {
        let mut set = HashSet::new();
        let add_place = |place: &Place, set: &mut HashSet<Handle<GlobalVariable>>| match place.root() {
            Place::Global(h) | Place::CBuffer { buffer: h, .. } => {
                set.insert(*h);
            }
            Place::Element {
                resource: ResourceRef::Global(h),
                ..
            } => {
                set.insert(*h);
            }
            _ => {}
        };
        crate::ir::visit::for_each_expr(&function.body, &mut |e| match &e.kind {
            ExprKind::Load(place) => add_place(place, &mut set),
            ExprKind::Sample {
                texture, sampler, ..
            } => {
                for r in [texture, sampler] {
                    if let ResourceRef::Global(h) = r {
                        set.insert(*h);
                    }
                }
            }
            ExprKind::ImageLoad {
                image: ResourceRef::Global(h),
                ..
            } => {
                set.insert(*h);
            }
            _ => {}
        });
        crate::ir::visit::for_each_statement(&function.body, &mut |st| match st {
            Statement::Store { place, .. } => add_place(place, &mut set),
            Statement::ImageStore {
                image: ResourceRef::Global(h),
                ..
            } => {
                set.insert(*h);
            }
            Statement::Call {
                function: callee,
                result,
                ..
            } => {
                if let Some(callee_globals) = used.get(callee.index()) {
                    set.extend(callee_globals.iter().copied());
                }
                if let Some(place) = result {
                    add_place(place, &mut set);
                }
            }
            _ => {}
        });
        let mut list: Vec<_> = set.into_iter().collect();
        list.sort_by_key(|h| h.index());
        used.push(list);
    }
    used
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_writer_indents_blocks() {
        let mut w = Writer::new();
        w.line("void f()");
        w.open();
        w.line("return;");
        w.close();
        assert_eq!(w.finish(), "void f()\n{\n    return;\n}\n");
    }

    #[test]
    fn test_namer_avoids_keywords_and_duplicates() {
        let mut namer = Namer::new(&["float", "main"], &["gl_"]);
        assert_eq!(namer.name("color"), "color");
        assert_eq!(namer.name("color"), "color_1");
        assert_eq!(namer.name("float"), "_float");
        assert_eq!(namer.name("gl_Thing"), "_gl_Thing");
        assert_eq!(namer.name("$Globals"), "_Globals");
        assert_eq!(namer.name("a__b"), "a_b");
    }

    #[test]
    fn test_literal_digits() {
        assert_eq!(float_digits(1.0), "1.0");
        assert_eq!(float_digits(0.5), "0.5");
        assert_eq!(double_digits(2.0), "2.0");
        assert_eq!(int_digits(-3), "-3");
        assert_eq!(int_digits(i32::MIN as i64), "(-2147483647 - 1)");
        assert_eq!(swizzle_letters(&[3, 2, 1, 0]), "wzyx");
    }
}
