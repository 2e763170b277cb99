mod exprs;
mod hoisting;
mod names;
mod precedence;
mod stmts;

#[cfg(test)]
mod tests;

use std::fmt::Write;

use codlua_bytecode::instruction::ProtoIdx;
use codlua_hash::HashResolver;
use codlua_hir::control::ControlNode;
use codlua_hir::func::HirFunc;

use crate::{EmitOptions, Lowered, LoweredFunction};
use hoisting::{root_items, DeclPlan};
use names::Names;

/// Render a whole chunk. The main function's body becomes the top-level
/// code; nested functions are printed inline where their closures appear.
pub fn emit_chunk(
    root: &LoweredFunction<'_>,
    options: &EmitOptions,
    resolver: Option<&dyn HashResolver>,
) -> String {
    let mut output = String::new();
    if options.function_stats {
        output.push_str(&stats_comment(root));
        output.push('\n');
    }
    match &root.body {
        Ok(lowered) => {
            let mut emitter = LuaEmitter::new(root, lowered, options, resolver, 0);
            emitter.emit_body();
            output.push_str(&emitter.output);
        }
        Err(cause) => {
            let _ = writeln!(output, "-- decompilation failed: {cause}");
        }
    }
    output
}

fn stats_comment(func: &LoweredFunction<'_>) -> String {
    let proto = func.proto;
    format!(
        "-- function #{} | params: {} | upvalues: {} | registers: {} | vararg: {} | instructions: {} | constants: {}",
        func.index,
        proto.num_params,
        proto.num_upvalues,
        proto.max_registers,
        if proto.is_vararg { "yes" } else { "no" },
        proto.instructions.len(),
        proto.constants.len(),
    )
}

/// Text that is safe inside a `--[[ ]]` comment.
fn comment_text(text: &str) -> String {
    text.replace("]]", "] ]").replace('\n', " ")
}

pub(crate) struct LuaEmitter<'a> {
    pub(crate) func: &'a LoweredFunction<'a>,
    pub(crate) hir: &'a HirFunc,
    pub(crate) tree: &'a ControlNode,
    pub(crate) names: Names<'a>,
    pub(crate) plan: DeclPlan,
    pub(crate) options: &'a EmitOptions,
    pub(crate) resolver: Option<&'a dyn HashResolver>,
    pub output: String,
    pub(crate) indent: usize,
}

impl<'a> LuaEmitter<'a> {
    pub(crate) fn new(
        func: &'a LoweredFunction<'a>,
        lowered: &'a Lowered,
        options: &'a EmitOptions,
        resolver: Option<&'a dyn HashResolver>,
        indent: usize,
    ) -> Self {
        let names = Names::new(func.proto, &lowered.hir);
        let plan = DeclPlan::build(&lowered.tree, &lowered.hir, &names);
        Self {
            func,
            hir: &lowered.hir,
            tree: &lowered.tree,
            names,
            plan,
            options,
            resolver,
            output: String::new(),
            indent,
        }
    }

    /// Emit the function body; a trailing bare `return` is implicit in Lua.
    pub(crate) fn emit_body(&mut self) {
        let mut items = root_items(self.tree);
        if let Some((ControlNode::Return(values), rest)) = items.split_last() {
            if values.is_empty() {
                items = rest;
            }
        }
        self.emit_items(items);
    }

    /// Print a nested function starting at the current output position and
    /// ending with its `end`, without a trailing newline.
    pub(crate) fn emit_function(&mut self, proto: ProtoIdx, name: Option<&str>, method: bool) {
        self.output.push_str("function");
        if let Some(name) = name {
            self.output.push(' ');
            self.output.push_str(name);
        }
        let Some(child) = self.func.children.get(proto.0 as usize) else {
            log::warn!(
                "function #{} closes over missing prototype {}",
                self.func.index,
                proto.0
            );
            let _ = write!(self.output, "() --[[ missing prototype {} ]] end", proto.0);
            return;
        };
        let lowered = match &child.body {
            Ok(lowered) => lowered,
            Err(cause) => {
                let _ = write!(
                    self.output,
                    "(...) --[[ decompilation failed: {} ]] end",
                    comment_text(cause)
                );
                return;
            }
        };

        let child_names = Names::new(child.proto, &lowered.hir);
        let mut params: Vec<String> = (0..child.proto.num_params)
            .skip(usize::from(method))
            .map(|r| child_names.param(r))
            .collect();
        if child.proto.is_vararg {
            params.push("...".to_string());
        }
        let _ = write!(self.output, "({})", params.join(", "));

        let mut inner = LuaEmitter::new(child, lowered, self.options, self.resolver, self.indent + 1);
        if self.options.function_stats {
            inner.line(&stats_comment(child));
        }
        inner.emit_body();
        if inner.output.is_empty() {
            self.output.push_str(" end");
        } else {
            self.output.push('\n');
            self.output.push_str(&inner.output);
            self.write_indent();
            self.output.push_str("end");
        }
    }

    /// True if the nested function's first parameter is `self`.
    pub(crate) fn is_method(&self, proto: ProtoIdx) -> bool {
        self.func.children.get(proto.0 as usize).is_some_and(|child| {
            child.proto.num_params > 0 && child.proto.local_name(0, 0) == Some("self")
        })
    }

    /// True if the nested function refers to an upvalue called `name`,
    /// which for `local name = function` means it calls itself.
    pub(crate) fn captures(&self, proto: ProtoIdx, name: &str) -> bool {
        self.func.children.get(proto.0 as usize).is_some_and(|child| {
            child
                .proto
                .debug
                .as_ref()
                .is_some_and(|d| d.upvalue_names.iter().any(|u| u == name))
        })
    }

    pub(crate) fn write_indent(&mut self) {
        for _ in 0..self.indent {
            self.output.push_str("    ");
        }
    }

    pub(crate) fn line(&mut self, text: &str) {
        self.write_indent();
        self.output.push_str(text);
        self.output.push('\n');
    }
}
