use std::ops::Range;

/// A local variable scope from bytecode debug info.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalScope {
    pub register: u8,
    pub name: String,
    /// PC range where this variable is in scope: [start, end).
    pub pc_range: Range<usize>,
}

/// Interval lookup for register-to-variable-name mapping.
#[derive(Debug, Clone, Default)]
pub struct ScopeTree {
    /// Sorted by (register, start_pc).
    scopes: Vec<LocalScope>,
}

impl ScopeTree {
    pub fn new(mut scopes: Vec<LocalScope>) -> Self {
        scopes.sort_by_key(|s| (s.register, s.pc_range.start));
        Self { scopes }
    }

    /// Build from locals listed in declaration order, the way both Lua 5.1
    /// and LuaJIT store them. Neither format records the register; a local
    /// occupies the slot equal to the number of earlier locals still live at
    /// its start pc.
    pub fn from_declaration_order(locals: Vec<(String, Range<usize>)>) -> Self {
        let mut scopes: Vec<LocalScope> = Vec::with_capacity(locals.len());
        for (name, pc_range) in locals {
            let start = pc_range.start;
            let live = scopes
                .iter()
                .filter(|s| s.pc_range.start <= start && start < s.pc_range.end)
                .count();
            scopes.push(LocalScope {
                register: live.min(u8::MAX as usize) as u8,
                name,
                pc_range,
            });
        }
        Self::new(scopes)
    }

    /// Look up the variable name for a register at an exact PC.
    ///
    /// Returns the narrowest enclosing scope (largest start_pc that contains
    /// this PC).
    pub fn lookup(&self, register: u8, pc: usize) -> Option<&str> {
        self.scope_for(register, pc).map(|s| s.name.as_str())
    }

    /// The scope that begins exactly at `pc` for `register`, i.e. the local
    /// declared by the instruction at `pc - 1`.
    pub fn declared_at(&self, register: u8, pc: usize) -> Option<&LocalScope> {
        self.scopes_for_register(register)
            .find(|s| s.pc_range.start == pc)
    }

    fn scope_for(&self, register: u8, pc: usize) -> Option<&LocalScope> {
        self.scopes_for_register(register)
            .filter(|s| s.pc_range.start <= pc && pc < s.pc_range.end)
            .max_by_key(|s| s.pc_range.start)
    }

    /// The first scope of `register` that opens after `pc`.
    pub fn next_opening(&self, register: u8, pc: usize) -> Option<&LocalScope> {
        self.scopes_for_register(register)
            .find(|s| s.pc_range.start > pc)
    }

    /// Get all scopes for a given register.
    pub fn scopes_for_register(&self, register: u8) -> impl Iterator<Item = &LocalScope> {
        self.scopes.iter().filter(move |s| s.register == register)
    }

    pub fn all_scopes(&self) -> &[LocalScope] {
        &self.scopes
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_basic() {
        let tree = ScopeTree::new(vec![
            LocalScope {
                register: 5,
                name: "count".into(),
                pc_range: 10..20,
            },
            LocalScope {
                register: 5,
                name: "count".into(),
                pc_range: 25..50,
            },
        ]);

        assert_eq!(tree.lookup(5, 15), Some("count"));
        assert_eq!(tree.lookup(5, 30), Some("count"));
        assert_eq!(tree.lookup(5, 22), None); // between scopes
        assert_eq!(tree.declared_at(5, 25).map(|s| s.pc_range.end), Some(50));
        assert_eq!(tree.next_opening(5, 20).map(|s| s.pc_range.start), Some(25));
        assert!(tree.next_opening(5, 25).is_none());
    }

    #[test]
    fn registers_follow_declaration_order() {
        // function(a, b) local c = a; do local d end; local e end
        let tree = ScopeTree::from_declaration_order(vec![
            ("a".into(), 0..10),
            ("b".into(), 0..10),
            ("c".into(), 2..10),
            ("d".into(), 3..4),
            ("e".into(), 5..10),
        ]);

        assert_eq!(tree.lookup(0, 1), Some("a"));
        assert_eq!(tree.lookup(1, 1), Some("b"));
        assert_eq!(tree.lookup(2, 2), Some("c"));
        assert_eq!(tree.lookup(3, 3), Some("d"));
        // `d` died at pc 4, so `e` reuses its slot.
        assert_eq!(tree.lookup(3, 6), Some("e"));
    }
}
