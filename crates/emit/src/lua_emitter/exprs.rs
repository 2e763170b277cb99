use std::fmt::Write;

use codlua_bytecode::constant::Constant;
use codlua_hir::arena::ExprId;
use codlua_hir::expr::HirExpr;
use codlua_hir::types::UnOp;
use codlua_hir::var::is_identifier;

use super::comment_text;
use super::precedence::{binop_precedence, binop_str, is_right_assoc, Precedence};
use super::LuaEmitter;

impl<'a> LuaEmitter<'a> {
    pub(super) fn emit_expr(&mut self, id: ExprId) {
        self.emit_expr_prec(id, Precedence::LOWEST);
    }

    /// Emit `id`, parenthesized if it binds looser than `min`.
    pub(super) fn emit_expr_prec(&mut self, id: ExprId, min: Precedence) {
        if self.precedence(id) < min {
            self.output.push('(');
            self.emit_bare(id);
            self.output.push(')');
        } else {
            self.emit_bare(id);
        }
    }

    pub(super) fn emit_expr_list(&mut self, ids: &[ExprId]) {
        for (i, id) in ids.iter().enumerate() {
            if i > 0 {
                self.output.push_str(", ");
            }
            self.emit_expr(*id);
        }
    }

    fn precedence(&self, id: ExprId) -> Precedence {
        match self.hir.exprs.get(id) {
            HirExpr::Binary { op, .. } => binop_precedence(*op),
            HirExpr::Unary { .. } => Precedence::UNARY,
            HirExpr::Concat(_) => Precedence::CONCAT,
            HirExpr::ConstantRef(k) => self
                .func
                .proto
                .constant(*k)
                .map_or(Precedence::ATOM, constant_precedence),
            HirExpr::Literal(c) => constant_precedence(c),
            _ => Precedence::ATOM,
        }
    }

    fn constant_of(&self, id: ExprId) -> Option<&'a Constant> {
        match self.hir.exprs.get(id) {
            HirExpr::ConstantRef(k) => self.func.proto.constant(*k),
            HirExpr::Literal(c) => Some(c),
            _ => None,
        }
    }

    /// True for a literal numeric 1, the default `for` step.
    pub(super) fn is_one(&self, id: ExprId) -> bool {
        match self.constant_of(id) {
            Some(Constant::Integer(1)) => true,
            Some(Constant::Float(f)) => *f == 1.0,
            _ => false,
        }
    }

    /// The key as a bare field name, when it is an identifier string.
    pub(super) fn key_name(&self, key: ExprId) -> Option<String> {
        let bytes = self.constant_of(key)?.as_str()?;
        let name = std::str::from_utf8(bytes).ok()?;
        is_identifier(name).then(|| name.to_string())
    }

    /// Expressions that can be called or indexed without parentheses.
    fn is_prefix(&self, id: ExprId) -> bool {
        matches!(
            self.hir.exprs.get(id),
            HirExpr::Register(_)
                | HirExpr::Upvalue(_)
                | HirExpr::Global(_)
                | HirExpr::Index { .. }
                | HirExpr::Call { .. }
                | HirExpr::MethodCall { .. }
                | HirExpr::Paren(_)
        )
    }

    pub(super) fn emit_prefix(&mut self, id: ExprId) {
        if self.is_prefix(id) {
            self.emit_bare(id);
        } else {
            self.output.push('(');
            self.emit_bare(id);
            self.output.push(')');
        }
    }

    /// `.name` or `[key]`.
    pub(super) fn emit_key(&mut self, key: ExprId) {
        match self.key_name(key) {
            Some(name) => {
                self.output.push('.');
                self.output.push_str(&name);
            }
            None => {
                self.output.push('[');
                self.emit_expr(key);
                self.output.push(']');
            }
        }
    }

    /// True if the printed expression starts with `(`.
    pub(super) fn starts_with_paren(&self, id: ExprId) -> bool {
        match self.hir.exprs.get(id) {
            HirExpr::Call { func, .. } => self.starts_with_paren(*func),
            HirExpr::MethodCall { callee, .. } => self.starts_with_paren(*callee),
            HirExpr::Index { table, .. } => self.starts_with_paren(*table),
            HirExpr::Paren(_) => true,
            _ => !self.is_prefix(id),
        }
    }

    fn starts_with_minus(&self, id: ExprId) -> bool {
        match self.hir.exprs.get(id) {
            HirExpr::Unary { op: UnOp::Neg, .. } => true,
            _ => self.constant_of(id).is_some_and(is_negative_number),
        }
    }

    fn emit_bare(&mut self, id: ExprId) {
        let hir = self.hir;
        match hir.exprs.get(id) {
            HirExpr::ConstantRef(k) => match self.func.proto.constant(*k) {
                Some(c) => self.emit_constant(c),
                None => {
                    let _ = write!(self.output, "nil --[[ missing constant {} ]]", k.0);
                }
            },
            HirExpr::Literal(c) => self.emit_constant(c),
            HirExpr::Register(r) => {
                let name = self.names.read(*r);
                self.output.push_str(&name);
            }
            HirExpr::Upvalue(i) => {
                let name = self.names.upvalue(*i);
                self.output.push_str(&name);
            }
            HirExpr::Global(name) => {
                if is_identifier(name) {
                    self.output.push_str(name);
                } else {
                    self.output.push_str("_G[");
                    self.emit_string(name.as_bytes());
                    self.output.push(']');
                }
            }
            HirExpr::Index { table, key } => {
                self.emit_prefix(*table);
                self.emit_key(*key);
            }
            HirExpr::Binary { op, left, right } => {
                let prec = binop_precedence(*op);
                let tighter = Precedence(prec.0 + 1);
                let (left_min, right_min) = if is_right_assoc(*op) {
                    (tighter, prec)
                } else {
                    (prec, tighter)
                };
                self.emit_expr_prec(*left, left_min);
                let _ = write!(self.output, " {} ", binop_str(*op));
                self.emit_expr_prec(*right, right_min);
            }
            HirExpr::Unary { op, operand } => {
                match op {
                    UnOp::Not => self.output.push_str("not "),
                    UnOp::Len => self.output.push('#'),
                    // `--x` would start a comment.
                    UnOp::Neg if self.starts_with_minus(*operand) => self.output.push_str("- "),
                    UnOp::Neg => self.output.push('-'),
                }
                self.emit_expr_prec(*operand, Precedence::UNARY);
            }
            HirExpr::Call { func, args } => {
                self.emit_prefix(*func);
                self.output.push('(');
                self.emit_expr_list(args);
                self.output.push(')');
            }
            HirExpr::MethodCall { callee, args } => {
                let method = match hir.exprs.get(*callee) {
                    HirExpr::Index { table, key } => self.key_name(*key).map(|name| (*table, name)),
                    _ => None,
                };
                match method {
                    Some((receiver, name)) => {
                        self.emit_prefix(receiver);
                        let _ = write!(self.output, ":{name}(");
                        self.emit_expr_list(args);
                    }
                    None => {
                        // No colon form for a computed method name.
                        self.emit_prefix(*callee);
                        self.output.push('(');
                        if let HirExpr::Index { table, .. } = hir.exprs.get(*callee) {
                            self.emit_expr(*table);
                            if !args.is_empty() {
                                self.output.push_str(", ");
                            }
                        }
                        self.emit_expr_list(args);
                    }
                }
                self.output.push(')');
            }
            HirExpr::Table { array, hash } => self.emit_table(array, hash),
            HirExpr::Closure { proto } => self.emit_function(*proto, None, false),
            HirExpr::VarArg => self.output.push_str("..."),
            HirExpr::Concat(parts) => {
                let part_min = Precedence(Precedence::CONCAT.0 + 1);
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        self.output.push_str(" .. ");
                    }
                    self.emit_expr_prec(*part, part_min);
                }
            }
            HirExpr::Paren(inner) => {
                self.output.push('(');
                self.emit_expr(*inner);
                self.output.push(')');
            }
        }
    }

    fn emit_table(&mut self, array: &[ExprId], hash: &[(ExprId, ExprId)]) {
        if array.is_empty() && hash.is_empty() {
            self.output.push_str("{}");
            return;
        }
        self.output.push('{');
        let mut first = true;
        for item in array {
            if !first {
                self.output.push_str(", ");
            }
            first = false;
            self.emit_expr(*item);
        }
        for (key, value) in hash {
            if !first {
                self.output.push_str(", ");
            }
            first = false;
            match self.key_name(*key) {
                Some(name) => self.output.push_str(&name),
                None => {
                    self.output.push('[');
                    self.emit_expr(*key);
                    self.output.push(']');
                }
            }
            self.output.push_str(" = ");
            self.emit_expr(*value);
        }
        self.output.push('}');
    }

    pub(super) fn emit_constant(&mut self, c: &Constant) {
        match c {
            Constant::Nil => self.output.push_str("nil"),
            Constant::Boolean(b) => self.output.push_str(if *b { "true" } else { "false" }),
            Constant::Integer(i) => {
                let _ = write!(self.output, "{i}");
            }
            Constant::Float(f) => self.output.push_str(&format_number(*f)),
            Constant::String(s) => self.emit_string(s),
            Constant::Int64(v) => self.emit_hash(*v as u64, "LL"),
            Constant::UInt64(v) => self.emit_hash(*v, "ULL"),
            Constant::Complex(re, im) => {
                if *re == 0.0 {
                    let _ = write!(self.output, "{}i", format_number(*im));
                } else {
                    let _ = write!(self.output, "({} + {}i)", format_number(*re), format_number(*im));
                }
            }
            Constant::Table(template) => {
                self.output.push('{');
                let mut first = true;
                let mut sep = |out: &mut String| {
                    if !first {
                        out.push_str(", ");
                    }
                    first = false;
                };
                if let Some(zero) = template.array.first().filter(|c| **c != Constant::Nil) {
                    sep(&mut self.output);
                    self.output.push_str("[0] = ");
                    self.emit_constant(zero);
                }
                for item in template.array.iter().skip(1) {
                    sep(&mut self.output);
                    self.emit_constant(item);
                }
                for (key, value) in &template.hash {
                    sep(&mut self.output);
                    match key.as_str().and_then(|b| std::str::from_utf8(b).ok()) {
                        Some(name) if is_identifier(name) => self.output.push_str(name),
                        _ => {
                            self.output.push('[');
                            self.emit_constant(key);
                            self.output.push(']');
                        }
                    }
                    self.output.push_str(" = ");
                    self.emit_constant(value);
                }
                self.output.push('}');
            }
        }
    }

    /// A 64-bit cdata constant, annotated with its resolved name.
    fn emit_hash(&mut self, value: u64, suffix: &str) {
        let resolved = self
            .resolver
            .and_then(|r| r.resolve(value, self.options.hash_mask));
        if self.options.show_hash_type {
            let kind = resolved.map_or("hash", |r| r.kind);
            let _ = write!(self.output, "--[[{}]]", comment_text(kind));
        }
        let _ = write!(self.output, "0x{value:X}{suffix}");
        if let Some(r) = resolved {
            let _ = write!(self.output, " --[[ {} ]]", comment_text(r.name));
        }
    }

    /// A quoted string literal. Valid UTF-8 text stays readable; control
    /// characters and stray bytes become decimal escapes.
    pub(super) fn emit_string(&mut self, bytes: &[u8]) {
        let text = std::str::from_utf8(bytes).ok();
        self.output.push('"');
        let mut chars = bytes.iter().enumerate().peekable();
        while let Some((i, &b)) = chars.next() {
            match b {
                b'"' => self.output.push_str("\\\""),
                b'\\' => self.output.push_str("\\\\"),
                b'\n' => self.output.push_str("\\n"),
                b'\r' => self.output.push_str("\\r"),
                b'\t' => self.output.push_str("\\t"),
                0x07 => self.output.push_str("\\a"),
                0x08 => self.output.push_str("\\b"),
                0x0B => self.output.push_str("\\v"),
                0x0C => self.output.push_str("\\f"),
                0x20..=0x7E => self.output.push(b as char),
                0x80..=0xFF if text.is_some() => {
                    // Copy the whole UTF-8 sequence.
                    let len = utf8_len(b);
                    if let Some(seq) = text.and_then(|t| t.get(i..i + len)) {
                        self.output.push_str(seq);
                        for _ in 1..len {
                            chars.next();
                        }
                    } else {
                        let _ = write!(self.output, "\\{b:03}");
                    }
                }
                _ => {
                    let _ = write!(self.output, "\\{b:03}");
                }
            }
        }
        self.output.push('"');
    }
}

fn utf8_len(lead: u8) -> usize {
    match lead {
        0xF0..=0xFF => 4,
        0xE0..=0xEF => 3,
        0xC0..=0xDF => 2,
        _ => 1,
    }
}

fn is_negative_number(c: &Constant) -> bool {
    match c {
        Constant::Integer(i) => *i < 0,
        Constant::Float(f) => !f.is_nan() && f.is_sign_negative(),
        _ => false,
    }
}

fn constant_precedence(c: &Constant) -> Precedence {
    if is_negative_number(c) {
        Precedence::UNARY
    } else {
        Precedence::ATOM
    }
}

/// Lua source form of a number constant.
pub(super) fn format_number(f: f64) -> String {
    if f.is_nan() {
        "(0/0)".to_string()
    } else if f.is_infinite() {
        let text = if f > 0.0 { "math.huge" } else { "-math.huge" };
        text.to_string()
    } else if f == 0.0 && f.is_sign_negative() {
        "-0.0".to_string()
    } else if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else if f.abs() >= 1e15 || f.abs() < 1e-5 {
        format!("{f:e}")
    } else {
        format!("{f}")
    }
}
