use rustc_hash::FxHashMap;

use codlua_bytecode::function::Function;

use crate::func::HirFunc;
use crate::var::RegRef;

/// The pcs at which each register is read or written.
#[derive(Debug, Clone, Default)]
pub struct AccessIndex {
    pcs: FxHashMap<u8, Vec<usize>>,
}

impl AccessIndex {
    pub fn build(func: &HirFunc) -> Self {
        let mut index = Self::default();
        let mut reads = Vec::new();
        for node in func.cfg.node_indices() {
            let block = &func.cfg[node];
            for stmt in &block.stmts {
                for target in stmt.defined_registers() {
                    index.record(target);
                }
                if let Some(table) = stmt.implicit_reads() {
                    index.record(table);
                }
                for root in stmt.expr_roots() {
                    func.exprs.register_reads(root, &mut reads);
                }
            }
            for root in block.terminator.expr_roots() {
                func.exprs.register_reads(root, &mut reads);
            }
            if let Some(regs) = block.terminator.loop_registers() {
                let pc = block.pc_range.1.saturating_sub(1);
                for register in regs {
                    index.record(RegRef::new(register, pc));
                }
            }
        }
        for id in reads {
            if let Some(r) = func.exprs.get(id).as_register() {
                index.record(r);
            }
        }
        for pcs in index.pcs.values_mut() {
            pcs.sort_unstable();
            pcs.dedup();
        }
        index
    }

    fn record(&mut self, r: RegRef) {
        self.pcs.entry(r.register).or_default().push(r.pc);
    }

    /// True if `register` is touched strictly between `after` and `before`.
    pub fn touched_between(&self, register: u8, after: usize, before: usize) -> bool {
        self.pcs
            .get(&register)
            .is_some_and(|pcs| pcs.iter().any(|&pc| after < pc && pc < before))
    }

    /// Debug name of the local that a write initializes.
    ///
    /// Usually that local's scope opens right after the write. In a
    /// multi-local declaration such as `local a, b = f(), g()` every scope
    /// opens after the last initializer, so the next scope of the register
    /// also counts when nothing touches the register before it opens.
    pub fn write_name<'p>(&self, proto: &'p Function, target: RegRef) -> Option<&'p str> {
        if let Some(name) = proto.local_name(target.register, target.pc + 1) {
            return Some(name);
        }
        let scope = proto
            .debug
            .as_ref()?
            .scopes
            .next_opening(target.register, target.pc)?;
        (!self.touched_between(target.register, target.pc, scope.pc_range.start))
            .then_some(scope.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use codlua_bytecode::constant::Constant;
    use codlua_bytecode::function::DebugInfo;
    use codlua_bytecode::scope_tree::{LocalScope, ScopeTree};

    use super::*;
    use crate::expr::HirExpr;
    use crate::stmt::HirStmt;

    fn with_locals(locals: &[(u8, &str, std::ops::Range<usize>)]) -> Function {
        Function {
            debug: Some(DebugInfo {
                lines: Vec::new(),
                scopes: ScopeTree::new(
                    locals
                        .iter()
                        .map(|(register, name, pc_range)| LocalScope {
                            register: *register,
                            name: name.to_string(),
                            pc_range: pc_range.clone(),
                        })
                        .collect(),
                ),
                upvalue_names: Vec::new(),
            }),
            ..Function::default()
        }
    }

    fn assign(func: &mut HirFunc, register: u8, pc: usize) {
        let value = func.exprs.alloc(HirExpr::Literal(Constant::Nil));
        let entry = func.entry;
        func.cfg[entry].stmts.push(HirStmt::RegAssign {
            target: RegRef::new(register, pc),
            value,
        });
    }

    #[test]
    fn earlier_initializer_takes_the_scope_that_opens_later() {
        // local a, b = f(), g()
        let proto = with_locals(&[(0, "a", 4..6), (1, "b", 4..6)]);
        let mut func = HirFunc::new(0, false, 0);
        assign(&mut func, 0, 1);
        assign(&mut func, 1, 3);
        let index = AccessIndex::build(&func);
        assert_eq!(index.write_name(&proto, RegRef::new(0, 1)), Some("a"));
        assert_eq!(index.write_name(&proto, RegRef::new(1, 3)), Some("b"));
    }

    #[test]
    fn intervening_access_keeps_a_temporary_anonymous() {
        let proto = with_locals(&[(0, "x", 6..8)]);
        let mut func = HirFunc::new(0, false, 0);
        assign(&mut func, 0, 1);
        let read = func.exprs.alloc(HirExpr::Register(RegRef::new(0, 2)));
        let entry = func.entry;
        func.cfg[entry].stmts.push(HirStmt::ExprStmt(read));
        assign(&mut func, 0, 5);
        let index = AccessIndex::build(&func);
        assert_eq!(index.write_name(&proto, RegRef::new(0, 1)), None);
        assert_eq!(index.write_name(&proto, RegRef::new(0, 5)), Some("x"));
    }
}
