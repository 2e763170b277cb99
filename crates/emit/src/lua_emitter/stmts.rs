use std::fmt::Write;

use petgraph::stable_graph::NodeIndex;

use codlua_hir::arena::ExprId;
use codlua_hir::control::ControlNode;
use codlua_hir::expr::HirExpr;
use codlua_hir::stmt::{HirStmt, LValue};
use codlua_hir::var::{is_identifier, RegRef};

use super::hoisting::{header_has_statements, Anchor};
use super::precedence::Precedence;
use super::LuaEmitter;

impl<'a> LuaEmitter<'a> {
    pub(super) fn emit_items(&mut self, items: &'a [ControlNode]) {
        for (i, node) in items.iter().enumerate() {
            self.emit_hoisted(Anchor::item(node));
            self.emit_node(node, i + 1 == items.len());
        }
    }

    fn emit_hoisted(&mut self, at: Anchor) {
        let names = self.plan.hoisted(at);
        if !names.is_empty() {
            let text = format!("local {}", names.join(", "));
            self.line(&text);
        }
    }

    fn emit_node(&mut self, node: &'a ControlNode, last: bool) {
        match node {
            ControlNode::Block(n) => self.emit_block(*n),
            ControlNode::Sequence(items) => self.emit_items(items),
            ControlNode::If {
                condition,
                then_body,
                else_body,
            } => self.emit_if(*condition, then_body, else_body),
            ControlNode::While {
                header,
                condition,
                body,
            } => {
                if header_has_statements(self.hir, header) {
                    self.line("while true do");
                    self.indent += 1;
                    self.emit_hoisted(Anchor::item(header));
                    self.emit_node(header, false);
                    self.emit_hoisted(Anchor::while_test(node));
                    self.write_indent();
                    self.output.push_str("if not ");
                    self.emit_expr_prec(*condition, Precedence::UNARY);
                    self.output.push_str(" then break end\n");
                } else {
                    self.write_indent();
                    self.output.push_str("while ");
                    self.emit_expr(*condition);
                    self.output.push_str(" do\n");
                    self.indent += 1;
                }
                self.emit_items(body);
                self.indent -= 1;
                self.line("end");
            }
            ControlNode::RepeatUntil { body, condition } => {
                self.line("repeat");
                self.indent += 1;
                self.emit_items(body);
                self.emit_hoisted(Anchor::until_test(node));
                self.indent -= 1;
                self.write_indent();
                self.output.push_str("until ");
                self.emit_expr(*condition);
                self.output.push('\n');
            }
            ControlNode::NumericFor {
                base,
                start,
                limit,
                step,
                body,
            } => {
                let var = self.loop_var(base.saturating_add(3), body);
                self.write_indent();
                let _ = write!(self.output, "for {var} = ");
                self.emit_expr(*start);
                self.output.push_str(", ");
                self.emit_expr(*limit);
                if !self.is_one(*step) {
                    self.output.push_str(", ");
                    self.emit_expr(*step);
                }
                self.output.push_str(" do\n");
                self.indent += 1;
                self.emit_items(body);
                self.indent -= 1;
                self.line("end");
            }
            ControlNode::GenericFor {
                base,
                var_count,
                iterators,
                body,
                ..
            } => {
                let vars: Vec<String> = (0..*var_count)
                    .map(|i| self.loop_var(base.saturating_add(3).saturating_add(i), body))
                    .collect();
                self.write_indent();
                let _ = write!(self.output, "for {} in ", vars.join(", "));
                self.emit_expr_list(iterators);
                self.output.push_str(" do\n");
                self.indent += 1;
                self.emit_items(body);
                self.indent -= 1;
                self.line("end");
            }
            ControlNode::Break => self.line(if last { "break" } else { "do break end" }),
            ControlNode::Return(values) => {
                self.write_indent();
                if !last {
                    self.output.push_str("do ");
                }
                self.output.push_str("return");
                if !values.is_empty() {
                    self.output.push(' ');
                    self.emit_expr_list(values);
                }
                if !last {
                    self.output.push_str(" end");
                }
                self.output.push('\n');
            }
            ControlNode::Label(pc) => self.line(&format!("::pc_{pc}::")),
            ControlNode::Goto(pc) => self.line(&format!("goto pc_{pc}")),
            ControlNode::Comment(text) => self.line(&format!("-- {text}")),
        }
    }

    fn emit_if(
        &mut self,
        condition: ExprId,
        then_body: &'a [ControlNode],
        else_body: &'a [ControlNode],
    ) {
        self.write_indent();
        self.output.push_str("if ");
        self.emit_expr(condition);
        self.output.push_str(" then\n");
        self.indent += 1;
        self.emit_items(then_body);
        self.indent -= 1;

        let mut rest = else_body;
        while !rest.is_empty() {
            if let Some((condition, then_body, else_body)) = self.as_elseif(rest) {
                self.write_indent();
                self.output.push_str("elseif ");
                self.emit_expr(condition);
                self.output.push_str(" then\n");
                self.indent += 1;
                self.emit_items(then_body);
                self.indent -= 1;
                rest = else_body;
                continue;
            }
            self.line("else");
            self.indent += 1;
            self.emit_items(rest);
            self.indent -= 1;
            break;
        }
        self.line("end");
    }

    /// An else arm that holds nothing but another `if` prints as `elseif`.
    /// Leading blocks whose statements were all folded into the condition
    /// do not count.
    fn as_elseif(
        &self,
        body: &'a [ControlNode],
    ) -> Option<(ExprId, &'a [ControlNode], &'a [ControlNode])> {
        let (last, rest) = body.split_last()?;
        let ControlNode::If {
            condition,
            then_body,
            else_body,
        } = last
        else {
            return None;
        };
        let silent = rest
            .iter()
            .all(|n| matches!(n, ControlNode::Block(b) if self.hir.cfg[*b].stmts.is_empty()));
        let declares = body
            .iter()
            .any(|n| !self.plan.hoisted(Anchor::item(n)).is_empty());
        (silent && !declares).then_some((*condition, then_body.as_slice(), else_body.as_slice()))
    }

    /// Name of a loop variable, looked up where the loop body starts.
    fn loop_var(&self, register: u8, body: &[ControlNode]) -> String {
        let pc = body
            .iter()
            .flat_map(ControlNode::blocks)
            .map(|n| self.hir.cfg[n].pc_range.0)
            .min()
            .unwrap_or(0);
        self.names.read(RegRef::new(register, pc))
    }

    fn emit_block(&mut self, node: NodeIndex) {
        let hir = self.hir;
        for (index, stmt) in hir.cfg[node].stmts.iter().enumerate() {
            self.emit_stmt(node, index, stmt);
        }
    }

    fn emit_stmt(&mut self, node: NodeIndex, index: usize, stmt: &'a HirStmt) {
        match stmt {
            HirStmt::RegAssign { target, value } => {
                let name = self.names.write(*target);
                let local = self.plan.declares(node, index, target.register);
                if let HirExpr::Closure { proto } = self.hir.exprs.get(*value) {
                    if local && self.captures(*proto, &name) {
                        self.write_indent();
                        self.output.push_str("local ");
                        self.emit_function(*proto, Some(name.as_str()), false);
                        self.output.push('\n');
                        return;
                    }
                }
                self.write_indent();
                if local {
                    self.output.push_str("local ");
                }
                let _ = write!(self.output, "{name} = ");
                self.emit_expr(*value);
                self.output.push('\n');
            }
            HirStmt::MultiAssign { targets, value } => {
                let names: Vec<String> = targets.iter().map(|t| self.names.write(*t)).collect();
                let declared: Vec<&str> = targets
                    .iter()
                    .zip(&names)
                    .filter(|(t, _)| self.plan.declares(node, index, t.register))
                    .map(|(_, n)| n.as_str())
                    .collect();
                let all = declared.len() == names.len();
                if !all && !declared.is_empty() {
                    let text = format!("local {}", declared.join(", "));
                    self.line(&text);
                }
                self.write_indent();
                if all {
                    self.output.push_str("local ");
                }
                let _ = write!(self.output, "{} = ", names.join(", "));
                self.emit_expr(*value);
                self.output.push('\n');
            }
            HirStmt::Assign { target, value } => self.emit_store(target, *value),
            HirStmt::ExprStmt(e) => {
                self.write_indent();
                // `f()\n(g)()` would parse as one call.
                if self.starts_with_paren(*e) {
                    self.output.push(';');
                }
                self.emit_expr(*e);
                self.output.push('\n');
            }
            HirStmt::SetList {
                table,
                first_index,
                values,
            } => {
                let table = self.names.read(*table);
                for (i, value) in values.iter().enumerate() {
                    self.write_indent();
                    let _ = write!(self.output, "{table}[{}] = ", u64::from(*first_index) + i as u64);
                    self.emit_expr(*value);
                    self.output.push('\n');
                }
            }
        }
    }

    fn emit_store(&mut self, target: &LValue, value: ExprId) {
        let closure = match self.hir.exprs.get(value) {
            HirExpr::Closure { proto } => Some(*proto),
            _ => None,
        };
        match target {
            LValue::Global(name) => {
                self.write_indent();
                if is_identifier(name) {
                    if let Some(proto) = closure {
                        self.emit_function(proto, Some(name.as_str()), false);
                        self.output.push('\n');
                        return;
                    }
                    self.output.push_str(name);
                } else {
                    self.output.push_str("_G[");
                    self.emit_string(name.as_bytes());
                    self.output.push(']');
                }
            }
            LValue::Upvalue(index) => {
                self.write_indent();
                let name = self.names.upvalue(*index);
                self.output.push_str(&name);
            }
            LValue::Index { table, key } => {
                if let Some(proto) = closure {
                    if let (Some(path), Some(field)) = (self.name_path(*table), self.key_name(*key)) {
                        let method = self.is_method(proto);
                        let name = format!("{path}{}{field}", if method { ':' } else { '.' });
                        self.write_indent();
                        self.emit_function(proto, Some(name.as_str()), method);
                        self.output.push('\n');
                        return;
                    }
                }
                self.write_indent();
                self.emit_prefix(*table);
                self.emit_key(*key);
            }
        }
        self.output.push_str(" = ");
        self.emit_expr(value);
        self.output.push('\n');
    }

    /// `a.b.c` for a chain of names, the left side of `function a.b.c()`.
    fn name_path(&self, expr: ExprId) -> Option<String> {
        match self.hir.exprs.get(expr) {
            HirExpr::Global(name) if is_identifier(name) => Some(name.clone()),
            HirExpr::Register(r) => Some(self.names.read(*r)),
            HirExpr::Upvalue(i) => Some(self.names.upvalue(*i)),
            HirExpr::Index { table, key } => {
                let base = self.name_path(*table)?;
                let field = self.key_name(*key)?;
                Some(format!("{base}.{field}"))
            }
            _ => None,
        }
    }
}
