use crate::constant::Constant;
use crate::instruction::Op;
use crate::scope_tree::ScopeTree;

/// Debug information for a function prototype.
#[derive(Debug, Clone, Default)]
pub struct DebugInfo {
    /// Source line per instruction; empty when the dialect stripped it.
    pub lines: Vec<u32>,
    /// Variable scopes indexed by register and PC range.
    pub scopes: ScopeTree,
    /// Upvalue names, in upvalue-index order.
    pub upvalue_names: Vec<String>,
}

impl DebugInfo {
    /// Get the source line number for a given PC.
    pub fn line_for_pc(&self, pc: usize) -> Option<u32> {
        self.lines.get(pc).copied()
    }
}

/// A parsed function prototype.
///
/// A function exclusively owns its nested prototypes: the chunk is a tree.
#[derive(Debug, Clone, Default)]
pub struct Function {
    pub instructions: Vec<Op>,
    pub constants: Vec<Constant>,
    pub num_params: u8,
    pub max_registers: u8,
    pub num_upvalues: u8,
    pub is_vararg: bool,
    pub children: Vec<Function>,
    pub debug: Option<DebugInfo>,
    pub line_defined: u32,
    /// Hash of the prototype's name (BO6 chunks only).
    pub name_hash: Option<u64>,
}

impl Function {
    pub fn constant(&self, idx: crate::instruction::ConstIdx) -> Option<&Constant> {
        self.constants.get(idx.0 as usize)
    }

    pub fn child(&self, idx: crate::instruction::ProtoIdx) -> Option<&Function> {
        self.children.get(idx.0 as usize)
    }

    /// Debug name of `register` when read at `pc`.
    pub fn local_name(&self, register: u8, pc: usize) -> Option<&str> {
        self.debug.as_ref()?.scopes.lookup(register, pc)
    }

    pub fn upvalue_name(&self, index: u16) -> Option<&str> {
        self.debug
            .as_ref()?
            .upvalue_names
            .get(index as usize)
            .map(String::as_str)
    }

    /// Total number of prototypes in this subtree, including `self`.
    pub fn prototype_count(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(Function::prototype_count)
            .sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope_tree::LocalScope;

    #[test]
    fn names_come_from_debug_info() {
        let func = Function {
            debug: Some(DebugInfo {
                lines: vec![1, 1, 2],
                scopes: ScopeTree::new(vec![LocalScope {
                    register: 0,
                    name: "x".into(),
                    pc_range: 1..3,
                }]),
                upvalue_names: vec!["self".into()],
            }),
            ..Function::default()
        };

        assert_eq!(func.local_name(0, 2), Some("x"));
        assert_eq!(func.local_name(0, 0), None);
        assert_eq!(func.upvalue_name(0), Some("self"));
        assert_eq!(func.upvalue_name(1), None);
        assert_eq!(func.debug.as_ref().and_then(|d| d.line_for_pc(2)), Some(2));
    }

    #[test]
    fn prototype_count_walks_the_tree() {
        let leaf = Function::default();
        let mid = Function {
            children: vec![leaf.clone(), leaf],
            ..Function::default()
        };
        let root = Function {
            children: vec![mid],
            ..Function::default()
        };
        assert_eq!(root.prototype_count(), 4);
    }
}
