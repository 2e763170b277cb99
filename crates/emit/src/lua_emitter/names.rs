use codlua_bytecode::function::Function;
use codlua_hir::access::AccessIndex;
use codlua_hir::func::HirFunc;
use codlua_hir::var::{escape_identifier, RegRef};

/// Register and upvalue naming for one prototype.
///
/// Debug scopes win; otherwise parameters are `arg_<register>`, other
/// registers `var_<register>` and upvalues `upval_<index>`.
pub(super) struct Names<'a> {
    proto: &'a Function,
    accesses: AccessIndex,
}

impl<'a> Names<'a> {
    pub(super) fn new(proto: &'a Function, hir: &HirFunc) -> Self {
        Self {
            proto,
            accesses: AccessIndex::build(hir),
        }
    }

    pub(super) fn read(&self, r: RegRef) -> String {
        self.debug(r.register, r.pc)
            .unwrap_or_else(|| self.fallback(r.register))
    }

    /// A local's scope opens after the instructions that initialize it, so
    /// a write is named by the local it initializes, or else by the scope
    /// it lands in.
    pub(super) fn write(&self, r: RegRef) -> String {
        self.accesses
            .write_name(self.proto, r)
            .filter(|name| !name.is_empty())
            .map(escape_identifier)
            .or_else(|| self.debug(r.register, r.pc))
            .unwrap_or_else(|| self.fallback(r.register))
    }

    pub(super) fn param(&self, register: u8) -> String {
        self.debug(register, 0)
            .unwrap_or_else(|| format!("arg_{register}"))
    }

    pub(super) fn upvalue(&self, index: u16) -> String {
        match self.proto.upvalue_name(index) {
            Some(name) if !name.is_empty() => escape_identifier(name),
            _ => format!("upval_{index}"),
        }
    }

    fn debug(&self, register: u8, pc: usize) -> Option<String> {
        self.proto
            .local_name(register, pc)
            .filter(|name| !name.is_empty())
            .map(escape_identifier)
    }

    fn fallback(&self, register: u8) -> String {
        if register < self.proto.num_params {
            format!("arg_{register}")
        } else {
            format!("var_{register}")
        }
    }
}
