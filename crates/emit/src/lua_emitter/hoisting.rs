use petgraph::stable_graph::NodeIndex;
use rustc_hash::{FxHashMap, FxHashSet};

use codlua_hir::arena::ExprId;
use codlua_hir::control::ControlNode;
use codlua_hir::expr::HirExpr;
use codlua_hir::func::HirFunc;
use codlua_hir::var::RegRef;

use super::names::Names;

/// A place in the tree where `local` declarations can be printed.
///
/// Nodes are identified by address; the tree is borrowed unchanged from
/// planning through emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(super) enum Anchor {
    /// In front of a body item.
    Item(usize),
    /// In front of the `if not cond then break end` of a `while` whose
    /// header has statements.
    WhileTest(usize),
    /// In front of the `until` of a `repeat`.
    UntilTest(usize),
}

fn addr(node: &ControlNode) -> usize {
    node as *const ControlNode as usize
}

impl Anchor {
    pub(super) fn item(node: &ControlNode) -> Self {
        Anchor::Item(addr(node))
    }

    pub(super) fn while_test(node: &ControlNode) -> Self {
        Anchor::WhileTest(addr(node))
    }

    pub(super) fn until_test(node: &ControlNode) -> Self {
        Anchor::UntilTest(addr(node))
    }
}

/// Where every local of a function gets declared.
///
/// A variable is a register under one name. It is declared in the
/// innermost body enclosing all of its accesses: on its first write when
/// that write is the first access and sits directly in that body, as a
/// bare `local` in front of the first access otherwise. A body laid out
/// with gotos declares all of its locals at the top. Parameters and loop
/// variables are never declared.
#[derive(Debug, Default)]
pub(super) struct DeclPlan {
    hoisted: FxHashMap<Anchor, Vec<String>>,
    inline: FxHashSet<(NodeIndex, usize, u8)>,
}

impl DeclPlan {
    pub(super) fn build(tree: &ControlNode, hir: &HirFunc, names: &Names<'_>) -> Self {
        let mut planner = Planner {
            hir,
            names,
            path: Vec::new(),
            bodies: 0,
            bound: Vec::new(),
            order: Vec::new(),
            accesses: FxHashMap::default(),
        };
        let items = root_items(tree);
        planner.body(0, items);
        // A goto may not jump into the scope of a local, so a flat layout
        // declares everything up front, after its leading comment.
        let top = if tree.has_gotos() {
            items
                .iter()
                .find(|n| !matches!(n, ControlNode::Comment(_)))
                .map(Anchor::item)
        } else {
            None
        };
        planner.finish(top)
    }

    pub(super) fn hoisted(&self, at: Anchor) -> &[String] {
        self.hoisted.get(&at).map_or(&[], Vec::as_slice)
    }

    /// True if statement `stmt` of `block` declares `register`.
    pub(super) fn declares(&self, block: NodeIndex, stmt: usize, register: u8) -> bool {
        self.inline.contains(&(block, stmt, register))
    }
}

pub(super) fn root_items(tree: &ControlNode) -> &[ControlNode] {
    match tree {
        ControlNode::Sequence(items) => items,
        other => std::slice::from_ref(other),
    }
}

/// True when a `while` header has to be printed inside the loop.
pub(super) fn header_has_statements(hir: &HirFunc, header: &ControlNode) -> bool {
    match header {
        ControlNode::Block(n) => !hir.cfg[*n].stmts.is_empty(),
        ControlNode::Sequence(items) => items.iter().any(|i| header_has_statements(hir, i)),
        _ => true,
    }
}

#[derive(Debug, Clone, Copy)]
struct Step {
    body: usize,
    index: usize,
    anchor: Anchor,
}

#[derive(Debug)]
struct Access {
    path: Vec<Step>,
    write: Option<(NodeIndex, usize)>,
}

type VarKey = (u8, String);

struct Planner<'a, 'n> {
    hir: &'a HirFunc,
    names: &'a Names<'n>,
    path: Vec<Step>,
    bodies: usize,
    bound: Vec<u8>,
    order: Vec<VarKey>,
    accesses: FxHashMap<VarKey, Vec<Access>>,
}

impl Planner<'_, '_> {
    fn fresh_body(&mut self) -> usize {
        self.bodies += 1;
        self.bodies
    }

    fn body(&mut self, id: usize, items: &[ControlNode]) {
        self.items(id, 0, items);
    }

    fn items(&mut self, id: usize, offset: usize, items: &[ControlNode]) {
        for (i, node) in items.iter().enumerate() {
            self.path.push(Step {
                body: id,
                index: offset + i,
                anchor: Anchor::item(node),
            });
            self.node(node);
            self.path.pop();
        }
    }

    fn node(&mut self, node: &ControlNode) {
        let hir = self.hir;
        match node {
            ControlNode::Block(n) => {
                for (si, stmt) in hir.cfg[*n].stmts.iter().enumerate() {
                    for root in stmt.expr_roots() {
                        self.reads(root);
                    }
                    if let Some(table) = stmt.implicit_reads() {
                        self.record(table, None);
                    }
                    for target in stmt.defined_registers() {
                        self.record(target, Some((*n, si)));
                    }
                }
            }
            ControlNode::Sequence(items) => {
                let id = self.fresh_body();
                self.body(id, items);
            }
            ControlNode::If {
                condition,
                then_body,
                else_body,
            } => {
                self.reads(*condition);
                let id = self.fresh_body();
                self.body(id, then_body);
                let id = self.fresh_body();
                self.body(id, else_body);
            }
            ControlNode::While {
                header,
                condition,
                body,
            } => {
                let id = self.fresh_body();
                if header_has_statements(hir, header) {
                    self.path.push(Step {
                        body: id,
                        index: 0,
                        anchor: Anchor::item(header),
                    });
                    self.node(header);
                    self.path.pop();
                    self.path.push(Step {
                        body: id,
                        index: 1,
                        anchor: Anchor::while_test(node),
                    });
                    self.reads(*condition);
                    self.path.pop();
                } else {
                    self.reads(*condition);
                }
                self.items(id, 2, body);
            }
            ControlNode::RepeatUntil { body, condition } => {
                let id = self.fresh_body();
                self.body(id, body);
                self.path.push(Step {
                    body: id,
                    index: body.len(),
                    anchor: Anchor::until_test(node),
                });
                self.reads(*condition);
                self.path.pop();
            }
            ControlNode::NumericFor {
                base,
                start,
                limit,
                step,
                body,
            } => {
                for e in [*start, *limit, *step] {
                    self.reads(e);
                }
                self.bound.push(base.saturating_add(3));
                let id = self.fresh_body();
                self.body(id, body);
                self.bound.pop();
            }
            ControlNode::GenericFor {
                base,
                var_count,
                iterators,
                body,
                ..
            } => {
                for e in iterators {
                    self.reads(*e);
                }
                let vars: Vec<u8> = (0..*var_count)
                    .map(|i| base.saturating_add(3).saturating_add(i))
                    .collect();
                let depth = self.bound.len();
                self.bound.extend(vars);
                let id = self.fresh_body();
                self.body(id, body);
                self.bound.truncate(depth);
            }
            ControlNode::Return(values) => {
                for v in values {
                    self.reads(*v);
                }
            }
            ControlNode::Break
            | ControlNode::Label(_)
            | ControlNode::Goto(_)
            | ControlNode::Comment(_) => {}
        }
    }

    fn reads(&mut self, root: ExprId) {
        let mut regs = Vec::new();
        self.hir.exprs.register_reads(root, &mut regs);
        for id in regs {
            if let HirExpr::Register(r) = self.hir.exprs.get(id) {
                self.record(*r, None);
            }
        }
    }

    fn record(&mut self, r: RegRef, write: Option<(NodeIndex, usize)>) {
        if r.register < self.hir.num_params || self.bound.contains(&r.register) {
            return;
        }
        let name = match write {
            Some(_) => self.names.write(r),
            None => self.names.read(r),
        };
        let key = (r.register, name);
        if !self.accesses.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.accesses.entry(key).or_default().push(Access {
            path: self.path.clone(),
            write,
        });
    }

    fn finish(self, top: Option<Anchor>) -> DeclPlan {
        let mut plan = DeclPlan::default();
        if let Some(top) = top {
            let names = plan.hoisted.entry(top).or_default();
            for (_, name) in self.order {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
            return plan;
        }
        for key in self.order {
            let Some(accesses) = self.accesses.get(&key) else {
                continue;
            };
            let Some(first) = accesses.first() else {
                continue;
            };
            let depth = common_depth(accesses);
            let Some(earliest) = accesses
                .iter()
                .filter_map(|a| a.path.get(depth))
                .min_by_key(|s| s.index)
            else {
                continue;
            };
            match first.write {
                Some((block, stmt)) if first.path.len() == depth + 1 => {
                    plan.inline.insert((block, stmt, key.0));
                }
                _ => plan.hoisted.entry(earliest.anchor).or_default().push(key.1),
            }
        }
        plan
    }
}

/// Depth of the innermost body shared by every access path.
fn common_depth(accesses: &[Access]) -> usize {
    let Some(first) = accesses.first() else {
        return 0;
    };
    let mut depth = 0;
    while depth + 1 < first.path.len()
        && accesses.iter().all(|a| {
            a.path.len() > depth + 1 && a.path[depth + 1].body == first.path[depth + 1].body
        })
    {
        depth += 1;
    }
    depth
}
