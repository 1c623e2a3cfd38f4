//! AST to HIR lowering
//!
//! A stateful pre-order visitor keeps a current-block cursor and a per-block
//! SSA environment. Reads of a slot either find a local definition or
//! synthesize a phi; joins merge environments through `add_predecessor`.
//! Nested function literals are queued and built as additional graph roots.

use std::collections::VecDeque;

use super::block::LoopFrame;
use super::graph::HirGraph;
use super::instr::{BlockId, HirKind, InstrId, LitValue};
use crate::ast::{AstKind, AstNode, BinOpKind, ScopeSlot, UnOpKind};
use crate::error::CompileError;

pub struct Builder {
    graph: HirGraph,
    current_block: BlockId,
    current_root: BlockId,
    loops: Vec<LoopFrame>,
    work_queue: VecDeque<(InstrId, AstNode)>,
    /// Stack slot count of the function being built
    stack_slots: usize,
    loop_depth: u32,
}

/// Lower a resolved AST to SSA form. The returned graph has one root block
/// per function literal, the outermost function first.
pub fn build(ast: &AstNode) -> Result<HirGraph, CompileError> {
    let arg_count = match &ast.kind {
        AstKind::Function { params, .. } => params.len(),
        _ => return Err(CompileError::unexpected_ast("top level must be a function")),
    };

    let mut builder = Builder {
        graph: HirGraph::new(),
        current_block: BlockId(0),
        current_root: BlockId(0),
        loops: Vec::new(),
        work_queue: VecDeque::new(),
        stack_slots: 0,
        loop_depth: 0,
    };

    let root = builder.graph.new_instr(
        HirKind::Function {
            body: None,
            arg_count,
        },
        None,
    );
    builder.work_queue.push_back((root, ast.clone()));

    while let Some((instr, node)) = builder.work_queue.pop_front() {
        builder.build_function(instr, &node)?;
    }

    Ok(builder.graph)
}

impl Builder {
    fn build_function(&mut self, instr: InstrId, node: &AstNode) -> Result<(), CompileError> {
        let (params, body, stack_slots, context_slots) = match &node.kind {
            AstKind::Function {
                params,
                body,
                stack_slots,
                context_slots,
            } => (params, body, *stack_slots, *context_slots),
            _ => return Err(CompileError::unexpected_ast("function literal expected")),
        };

        self.stack_slots = stack_slots;
        self.loop_depth = 0;
        let block = self.graph.new_block(stack_slots, 0);
        self.current_block = block;
        self.current_root = block;
        self.graph.roots.push(block);
        if let HirKind::Function { body, .. } = &mut self.graph.instr_mut(instr).kind {
            *body = Some(block);
        }

        self.add(HirKind::Entry { context_slots });
        self.emit_prologue(params)?;

        for stmt in body {
            self.visit_stmt(stmt)?;
        }

        if !self.graph.block(self.current_block).ended {
            let val = self.add(HirKind::Nil);
            let end = self.end_block(HirKind::Return);
            self.graph.add_arg(end, val);
        }

        Ok(())
    }

    /// Load every parameter into its slot. Parameters after a vararg are
    /// addressed with runtime index arithmetic over the vararg's size.
    fn emit_prologue(&mut self, params: &[AstNode]) -> Result<(), CompileError> {
        let mut index: Option<InstrId> = None;
        let mut flat_index = 0usize;
        let mut seen_varg = false;

        if !params.is_empty() {
            index = Some(self.number(0.0));
        }

        for (i, param) in params.iter().enumerate() {
            let (varg, value_node) = match &param.kind {
                AstKind::VarArg(inner) => {
                    seen_varg = true;
                    (true, inner.as_ref())
                }
                AstKind::Value { .. } => (false, param),
                _ => {
                    return Err(CompileError::unexpected_ast(
                        "function parameter must be a variable or vararg",
                    ))
                }
            };
            let slot = match &value_node.kind {
                AstKind::Value { slot } => *slot,
                _ => {
                    return Err(CompileError::unexpected_ast(
                        "vararg parameter must wrap a variable",
                    ))
                }
            };
            self.check_slot(slot)?;

            let mut varg_rest = None;
            let mut varg_arr = None;
            if varg {
                // Result vararg array, then the count of parameters that
                // follow the vararg
                varg_arr = Some(self.add(HirKind::AllocateArray));
                varg_rest = Some(self.number((params.len() - i - 1) as f64));
            }

            let load = if varg {
                self.add(HirKind::LoadVarArg)
            } else {
                self.add(HirKind::LoadArg)
            };
            let idx = index.ok_or_else(|| CompileError::internal("missing argument index"))?;
            self.graph.add_arg(load, idx);

            let mut value = load;
            if varg {
                self.graph.add_arg(load, varg_rest.unwrap());
                self.graph.add_arg(load, varg_arr.unwrap());
                value = varg_arr.unwrap();
            }

            if slot.is_stack() {
                self.assign(slot, value);
            } else {
                let store = self.add(HirKind::StoreContext(slot));
                self.graph.add_arg(store, value);
            }

            // No index needed past the last parameter
            if i + 1 == params.len() {
                continue;
            }

            index = Some(if !varg {
                if !seen_varg {
                    // Index is still linear, a fresh literal will do
                    flat_index += 1;
                    self.number(flat_index as f64)
                } else {
                    let one = self.number(1.0);
                    let add = self.add(HirKind::BinOp(BinOpKind::Add));
                    self.graph.add_arg(add, idx);
                    self.graph.add_arg(add, one);
                    add
                }
            } else {
                // Advance by the vararg's length
                let length = self.add(HirKind::Sizeof);
                self.graph.add_arg(length, value);
                let add = self.add(HirKind::BinOp(BinOpKind::Add));
                self.graph.add_arg(add, idx);
                self.graph.add_arg(add, length);
                add
            });
        }

        Ok(())
    }

    // === Statements ===

    fn visit_stmt(&mut self, node: &AstNode) -> Result<(), CompileError> {
        match &node.kind {
            AstKind::If {
                cond,
                then_body,
                else_body,
            } => self.visit_if(cond, then_body, else_body.as_deref()),
            AstKind::While { cond, body } => self.visit_while(cond, body),
            AstKind::Break => self.visit_break(),
            AstKind::Continue => self.visit_continue(),
            AstKind::Return(value) => self.visit_return(value.as_deref()),
            _ => self.visit_expr(node).map(|_| ()),
        }
    }

    fn visit_if(
        &mut self,
        cond: &AstNode,
        then_body: &[AstNode],
        else_body: Option<&[AstNode]>,
    ) -> Result<(), CompileError> {
        let mut t = self.create_block();
        let mut f = self.create_block();
        let cond = self.visit_expr(cond)?;
        let branch = self.branch(t, f)?;
        self.graph.add_arg(branch, cond);

        self.current_block = t;
        for stmt in then_body {
            self.visit_stmt(stmt)?;
        }
        t = self.current_block;

        if let Some(else_body) = else_body {
            self.current_block = f;
            for stmt in else_body {
                self.visit_stmt(stmt)?;
            }
            f = self.current_block;
        }

        self.current_block = self.join(t, f)?;
        Ok(())
    }

    fn visit_while(&mut self, cond: &AstNode, body: &[AstNode]) -> Result<(), CompileError> {
        let start = self.create_block();

        self.mark_pre_loop();
        self.goto(start)?;

        self.loop_depth += 1;
        self.graph.block_mut(start).loop_depth = self.loop_depth;

        // A block can't be a join and a branch at the same time, so the
        // condition gets its own block after the header.
        let cond_block = self.create_block();
        self.current_block = cond_block;
        self.mark_loop(start);
        self.goto_from(start, cond_block)?;

        let cond = self.visit_expr(cond)?;

        let body_block = self.create_block();
        let back = self.create_block();
        let end = self.create_block();
        self.graph.block_mut(end).loop_depth = self.loop_depth - 1;

        let branch = self.branch(body_block, end)?;
        self.graph.add_arg(branch, cond);

        self.current_block = body_block;
        self.loops.push(LoopFrame::new(end));

        for stmt in body {
            self.visit_stmt(stmt)?;
        }

        // Drain continue targets into the back edge
        loop {
            let next = {
                let frame = self.loops.last_mut().unwrap();
                if frame.continue_blocks.is_empty() {
                    break;
                }
                frame.continue_blocks.remove(0)
            };
            self.goto(next)?;
            self.current_block = next;
        }
        self.goto(back)?;
        self.goto_from(back, start)?;

        self.loop_depth -= 1;
        let frame = self.loops.pop().unwrap();

        // The block after the loop must not be a join
        let after = self.create_block();
        self.goto_from(frame.brk, after)?;
        self.current_block = after;

        Ok(())
    }

    fn visit_break(&mut self) -> Result<(), CompileError> {
        if self.loops.is_empty() {
            return Err(CompileError::unexpected_ast("break outside of a loop"));
        }
        let target = self.chain_break()?;
        self.goto(target)
    }

    fn visit_continue(&mut self) -> Result<(), CompileError> {
        if self.loops.is_empty() {
            return Err(CompileError::unexpected_ast("continue outside of a loop"));
        }
        let target = self.create_block();
        self.loops
            .last_mut()
            .unwrap()
            .continue_blocks
            .push(target);
        self.goto(target)
    }

    fn visit_return(&mut self, value: Option<&AstNode>) -> Result<(), CompileError> {
        let value = match value {
            Some(v) => self.visit_expr(v)?,
            None => self.add(HirKind::Nil),
        };
        let end = self.end_block(HirKind::Return);
        self.graph.add_arg(end, value);
        Ok(())
    }

    // === Expressions ===

    fn visit_expr(&mut self, node: &AstNode) -> Result<InstrId, CompileError> {
        match &node.kind {
            AstKind::Function { params, .. } => {
                let f = self.graph.new_instr(
                    HirKind::Function {
                        body: None,
                        arg_count: params.len(),
                    },
                    None,
                );
                self.work_queue.push_back((f, node.clone()));
                self.append_existing(f);
                Ok(f)
            }
            AstKind::Value { slot } => self.visit_value(*slot),
            AstKind::Number(n) => Ok(self.literal(LitValue::Num(*n), node.offset)),
            AstKind::Str(s) => Ok(self.literal(LitValue::Str(s.clone()), node.offset)),
            AstKind::Property(name) => Ok(self.literal(LitValue::Str(name.clone()), node.offset)),
            AstKind::True => Ok(self.literal(LitValue::Bool(true), node.offset)),
            AstKind::False => Ok(self.literal(LitValue::Bool(false), node.offset)),
            AstKind::Nil => Ok(self.add(HirKind::Nil)),
            AstKind::ObjectLiteral { keys, values } => self.visit_object_literal(keys, values),
            AstKind::ArrayLiteral(items) => self.visit_array_literal(items),
            AstKind::Member { object, property } => {
                let prop = self.visit_expr(property)?;
                let recv = self.visit_expr(object)?;
                let load = self.add(HirKind::LoadProperty);
                self.graph.add_arg(load, recv);
                self.graph.add_arg(load, prop);
                Ok(load)
            }
            AstKind::Assign { target, value } => self.visit_assign(target, value),
            AstKind::BinOp { op, lhs, rhs } => self.visit_bin_op(*op, lhs, rhs, node.offset),
            AstKind::UnOp { op, expr } => self.visit_un_op(*op, expr, node.offset),
            AstKind::Call { callee, args } => self.visit_call(callee, args),
            AstKind::Delete(member) => self.visit_delete(member),
            AstKind::Typeof(e) => self.visit_prefix(HirKind::Typeof, e),
            AstKind::Sizeof(e) => self.visit_prefix(HirKind::Sizeof, e),
            AstKind::Keysof(e) => self.visit_prefix(HirKind::Keysof, e),
            AstKind::Clone(e) => self.visit_prefix(HirKind::Clone, e),
            AstKind::CollectGarbage => {
                self.add(HirKind::CollectGarbage);
                Ok(self.add(HirKind::Nil))
            }
            AstKind::GetStackTrace => Ok(self.add(HirKind::GetStackTrace)),
            AstKind::VarArg(_) | AstKind::SelfArg => Err(CompileError::unexpected_ast(
                "vararg or self marker outside of a call",
            )),
            AstKind::If { .. }
            | AstKind::While { .. }
            | AstKind::Break
            | AstKind::Continue
            | AstKind::Return(_) => Err(CompileError::unexpected_ast(
                "statement in expression position",
            )),
        }
    }

    /// Stack indices must stay inside the function's declared slots; the
    /// extra slot on top is reserved for short-circuit results.
    fn check_slot(&self, slot: ScopeSlot) -> Result<(), CompileError> {
        if let ScopeSlot::Stack { index } = slot {
            if index >= self.stack_slots {
                return Err(CompileError::unexpected_ast(format!(
                    "stack slot {} out of range for {} declared slots",
                    index, self.stack_slots
                )));
            }
        }
        Ok(())
    }

    fn visit_value(&mut self, slot: ScopeSlot) -> Result<InstrId, CompileError> {
        self.check_slot(slot)?;
        match slot {
            ScopeSlot::Stack { index } => {
                let current = self.graph.block(self.current_block).env.at(index);
                if let Some(i) = current {
                    if self.graph.instr(i).block == Some(self.current_block) {
                        // Local value
                        return Ok(i);
                    }
                }
                // External value: a phi placeholder keyed to this block
                let phi = self.create_phi(self.current_block, slot);
                if let Some(i) = current {
                    self.graph.add_arg(phi, i);
                }
                self.assign(slot, phi);
                self.append_existing(phi);
                Ok(phi)
            }
            ScopeSlot::Context { .. } => Ok(self.add(HirKind::LoadContext(slot))),
        }
    }

    fn visit_assign(&mut self, target: &AstNode, value: &AstNode) -> Result<InstrId, CompileError> {
        let rhs = self.visit_expr(value)?;

        match &target.kind {
            AstKind::Value { slot } => {
                self.check_slot(*slot)?;
                if slot.is_stack() {
                    // No instruction is needed
                    self.assign(*slot, rhs);
                } else {
                    let store = self.add(HirKind::StoreContext(*slot));
                    self.graph.add_arg(store, rhs);
                }
                Ok(rhs)
            }
            AstKind::Member { object, property } => {
                let prop = self.visit_expr(property)?;
                let recv = self.visit_expr(object)?;
                let store = self.add(HirKind::StoreProperty);
                self.graph.add_arg(store, recv);
                self.graph.add_arg(store, prop);
                self.graph.add_arg(store, rhs);
                Ok(store)
            }
            _ => Err(CompileError::unexpected_ast("invalid assignment target")),
        }
    }

    fn visit_bin_op(
        &mut self,
        op: BinOpKind,
        lhs: &AstNode,
        rhs: &AstNode,
        offset: i32,
    ) -> Result<InstrId, CompileError> {
        if !op.is_bool_logic() {
            let lhs = self.visit_expr(lhs)?;
            let rhs = self.visit_expr(rhs)?;
            let res = self.add(HirKind::BinOp(op));
            self.graph.add_arg(res, lhs);
            self.graph.add_arg(res, rhs);
            self.graph.instr_mut(res).offset = offset;
            return Ok(res);
        }

        // Short-circuit operators become a diamond over the reserved logic
        // slot; the phi at the join is the expression's value.
        let lhs = self.visit_expr(lhs)?;
        let slot = self.graph.block(self.current_block).env.logic_slot();

        let branch_block = self.create_block();
        self.goto(branch_block)?;
        self.current_block = branch_block;

        let mut t = self.create_block();
        let mut f = self.create_block();
        let branch = self.branch(t, f)?;
        self.graph.add_arg(branch, lhs);

        self.current_block = t;
        if op == BinOpKind::LAnd {
            let rhs = self.visit_expr(rhs)?;
            self.assign(slot, rhs);
        } else {
            self.assign(slot, lhs);
        }
        t = self.current_block;

        self.current_block = f;
        if op == BinOpKind::LAnd {
            self.assign(slot, lhs);
        } else {
            let rhs = self.visit_expr(rhs)?;
            self.assign(slot, rhs);
        }
        f = self.current_block;

        // Join the side holding the left operand first so the phi's inputs
        // read (lhs, rhs)
        let join = if op == BinOpKind::LAnd {
            self.join(f, t)?
        } else {
            self.join(t, f)?
        };
        self.current_block = join;

        let index = match slot {
            ScopeSlot::Stack { index } => index,
            _ => unreachable!(),
        };
        self.graph
            .block(join)
            .env
            .at(index)
            .ok_or_else(|| CompileError::internal("logic slot undefined after join"))
    }

    fn visit_un_op(
        &mut self,
        op: UnOpKind,
        expr: &AstNode,
        offset: i32,
    ) -> Result<InstrId, CompileError> {
        if op.is_changing() {
            // ++i, i++, --i, i--
            let one = AstNode::number(1.0);
            let bin = if matches!(op, UnOpKind::PreInc | UnOpKind::PostInc) {
                BinOpKind::Add
            } else {
                BinOpKind::Sub
            };

            let (result, load, value) = if matches!(op, UnOpKind::PreInc | UnOpKind::PreDec) {
                let wrap = AstNode::bin_op(bin, expr.clone(), one);
                let res = self.visit_expr(&wrap)?;
                // Nothing to store back in a dead region
                let Some(&load) = self.graph.instr(res).args.first() else {
                    return Ok(res);
                };
                (res, load, res)
            } else {
                let ione = self.visit_expr(&one)?;
                let res = self.visit_expr(expr)?;
                let binop = self.add(HirKind::BinOp(bin));
                self.graph.add_arg(binop, res);
                self.graph.add_arg(binop, ione);
                self.graph.instr_mut(binop).offset = offset;
                (res, res, binop)
            };

            // Store the new value back
            match &expr.kind {
                AstKind::Value { slot } => {
                    if slot.is_stack() {
                        self.assign(*slot, value);
                    } else {
                        let store = self.add(HirKind::StoreContext(*slot));
                        self.graph.add_arg(store, value);
                    }
                }
                AstKind::Member { .. } => {
                    let args = self.graph.instr(load).args.clone();
                    if let (Some(&receiver), Some(&property)) = (args.first(), args.get(1)) {
                        let store = self.add(HirKind::StoreProperty);
                        self.graph.add_arg(store, receiver);
                        self.graph.add_arg(store, property);
                        self.graph.add_arg(store, value);
                    }
                }
                _ => {
                    return Err(CompileError::unexpected_ast(
                        "increment of a non-assignable expression",
                    ))
                }
            }

            Ok(result)
        } else if matches!(op, UnOpKind::Plus | UnOpKind::Minus) {
            // +i = 0 + i, -i = 0 - i
            let bin = if op == UnOpKind::Plus {
                BinOpKind::Add
            } else {
                BinOpKind::Sub
            };
            let wrap = AstNode::bin_op(bin, AstNode::number(0.0), expr.clone());
            self.visit_expr(&wrap)
        } else {
            let value = self.visit_expr(expr)?;
            let not = self.add(HirKind::Not);
            self.graph.add_arg(not, value);
            Ok(not)
        }
    }

    fn visit_object_literal(
        &mut self,
        keys: &[AstNode],
        values: &[AstNode],
    ) -> Result<InstrId, CompileError> {
        let res = self.add(HirKind::AllocateObject);
        for (key, value) in keys.iter().zip(values.iter()) {
            let value = self.visit_expr(value)?;
            let key = self.visit_expr(key)?;
            let store = self.add(HirKind::StoreProperty);
            self.graph.add_arg(store, res);
            self.graph.add_arg(store, key);
            self.graph.add_arg(store, value);
        }
        Ok(res)
    }

    fn visit_array_literal(&mut self, items: &[AstNode]) -> Result<InstrId, CompileError> {
        let res = self.add(HirKind::AllocateArray);
        for (i, item) in items.iter().enumerate() {
            let key = self.number(i as f64);
            let value = self.visit_expr(item)?;
            let store = self.add(HirKind::StoreProperty);
            self.graph.add_arg(store, res);
            self.graph.add_arg(store, key);
            self.graph.add_arg(store, value);
        }
        Ok(res)
    }

    fn visit_delete(&mut self, member: &AstNode) -> Result<InstrId, CompileError> {
        let (object, property) = match &member.kind {
            AstKind::Member { object, property } => (object, property),
            _ => {
                return Err(CompileError::unexpected_ast(
                    "delete target must be a member expression",
                ))
            }
        };
        let prop = self.visit_expr(property)?;
        let recv = self.visit_expr(object)?;
        let del = self.add(HirKind::DeleteProperty);
        self.graph.add_arg(del, recv);
        self.graph.add_arg(del, prop);

        // Delete property returns nil
        Ok(self.add(HirKind::Nil))
    }

    fn visit_prefix(&mut self, kind: HirKind, expr: &AstNode) -> Result<InstrId, CompileError> {
        let value = self.visit_expr(expr)?;
        let instr = self.add(kind);
        self.graph.add_arg(instr, value);
        Ok(instr)
    }

    /// Calls evaluate arguments into a reversed store list, align the stack,
    /// emit the stores and finally the call itself. A method call evaluates
    /// its receiver once, reusing it as property base and first argument.
    fn visit_call(&mut self, callee: &AstNode, args: &[AstNode]) -> Result<InstrId, CompileError> {
        let has_self = matches!(args.first().map(|a| &a.kind), Some(AstKind::SelfArg));

        let mut vararg: Option<InstrId> = None;
        let mut stores: Vec<InstrId> = Vec::new();

        for arg in args {
            let (kind, rhs) = match &arg.kind {
                AstKind::SelfArg => continue, // processed below
                AstKind::VarArg(inner) => {
                    let rhs = self.visit_expr(inner)?;
                    vararg = Some(rhs);
                    (HirKind::StoreVarArg, rhs)
                }
                _ => (HirKind::StoreArg, self.visit_expr(arg)?),
            };
            let store = self.graph.new_instr(kind, None);
            self.graph.add_arg(store, rhs);
            stores.insert(0, store);
        }

        // Determine argc; a vararg contributes its dynamic length instead
        let mut argc = args.len();
        if vararg.is_some() {
            argc -= 1;
        }
        let mut hargc = self.number(argc as f64);

        if let Some(va) = vararg {
            let length = self.add(HirKind::Sizeof);
            self.graph.add_arg(length, va);
            let add = self.add(HirKind::BinOp(BinOpKind::Add));
            self.graph.add_arg(add, hargc);
            self.graph.add_arg(add, length);
            hargc = add;
        }

        // The receiver is evaluated exactly once
        let mut receiver = None;
        if has_self {
            let object = match &callee.kind {
                AstKind::Member { object, .. } => object,
                _ => {
                    return Err(CompileError::unexpected_ast(
                        "method call callee must be a member expression",
                    ))
                }
            };
            let recv = self.visit_expr(object)?;
            receiver = Some(recv);
            let store = self.graph.new_instr(HirKind::StoreArg, None);
            self.graph.add_arg(store, recv);
            stores.push(store);
        }

        let callee_value = if has_self {
            let property = match &callee.kind {
                AstKind::Member { property, .. } => property,
                _ => unreachable!(),
            };
            let prop = self.visit_expr(property)?;
            let load = self.add(HirKind::LoadProperty);
            self.graph.add_arg(load, receiver.unwrap());
            self.graph.add_arg(load, prop);
            load
        } else {
            self.visit_expr(callee)?
        };

        let align = self.add(HirKind::AlignStack);
        self.graph.add_arg(align, hargc);

        for store in stores {
            self.append_existing(store);
        }

        let call = self.graph.new_instr(HirKind::Call, None);
        self.graph.add_arg(call, callee_value);
        self.graph.add_arg(call, hargc);
        self.append_existing(call);
        Ok(call)
    }

    // === Block plumbing ===

    fn create_block(&mut self) -> BlockId {
        self.graph.new_block(self.stack_slots, self.loop_depth)
    }

    /// Append a new instruction to the current block. Past a terminator the
    /// region is dead: a detached `Nil` is synthesized instead.
    fn add(&mut self, kind: HirKind) -> InstrId {
        if self.graph.block(self.current_block).ended {
            return self.graph.new_instr(HirKind::Nil, None);
        }
        let instr = self.graph.new_instr(kind, Some(self.current_block));
        self.graph
            .block_mut(self.current_block)
            .instructions
            .push(instr);
        instr
    }

    /// Append an already-created instruction to the current block
    fn append_existing(&mut self, instr: InstrId) {
        if self.graph.block(self.current_block).ended {
            return;
        }
        self.graph.instr_mut(instr).block = Some(self.current_block);
        self.graph
            .block_mut(self.current_block)
            .instructions
            .push(instr);
    }

    fn literal(&mut self, value: LitValue, offset: i32) -> InstrId {
        let instr = self.add(HirKind::Literal(value));
        self.graph.instr_mut(instr).offset = offset;
        instr
    }

    fn number(&mut self, n: f64) -> InstrId {
        self.add(HirKind::Literal(LitValue::Num(n)))
    }

    /// Terminate the current block with `kind` (Return)
    fn end_block(&mut self, kind: HirKind) -> InstrId {
        if self.graph.block(self.current_block).ended {
            return self.graph.new_instr(HirKind::Nil, None);
        }
        let instr = self.add(kind);
        self.graph.block_mut(self.current_block).ended = true;
        instr
    }

    fn goto(&mut self, target: BlockId) -> Result<(), CompileError> {
        self.goto_from(self.current_block, target)
    }

    fn goto_from(&mut self, from: BlockId, target: BlockId) -> Result<(), CompileError> {
        if self.graph.block(from).ended {
            return Ok(());
        }
        let goto = self.graph.new_instr(HirKind::Goto, Some(from));
        self.graph.block_mut(from).instructions.push(goto);
        self.graph.block_mut(from).ended = true;
        self.add_successor(from, target)
    }

    fn branch(&mut self, t: BlockId, f: BlockId) -> Result<InstrId, CompileError> {
        let from = self.current_block;
        if self.graph.block(from).ended {
            return Ok(self.graph.new_instr(HirKind::Nil, None));
        }
        let branch = self.graph.new_instr(HirKind::If, Some(from));
        self.graph.block_mut(from).instructions.push(branch);
        self.graph.block_mut(from).ended = true;
        self.add_successor(from, t)?;
        self.add_successor(from, f)?;
        Ok(branch)
    }

    fn join(&mut self, left: BlockId, right: BlockId) -> Result<BlockId, CompileError> {
        let join = self.create_block();
        self.goto_from(left, join)?;
        self.goto_from(right, join)?;
        Ok(join)
    }

    fn add_successor(&mut self, from: BlockId, to: BlockId) -> Result<(), CompileError> {
        if self.graph.block(from).succs.len() >= 2 {
            return Err(CompileError::internal("block successor limit exceeded"));
        }
        self.graph.block_mut(from).succs.push(to);
        self.add_predecessor(to, from)
    }

    /// Invoked exactly once per edge. The first predecessor donates its
    /// environment verbatim; the second is merged slot by slot, creating or
    /// extending phis.
    fn add_predecessor(&mut self, block: BlockId, pred: BlockId) -> Result<(), CompileError> {
        if self.graph.block(block).preds.len() >= 2 {
            return Err(CompileError::internal("block predecessor limit exceeded"));
        }
        self.graph.block_mut(block).preds.push(pred);

        if self.graph.block(block).preds.len() == 1 {
            // Fast path: copy the environment
            let env = self.graph.block(pred).env.clone();
            self.graph.block_mut(block).env.copy_from(&env);
            return Ok(());
        }

        let slots = self.graph.block(pred).env.stack_slots();
        for i in 0..slots {
            let Some(curr) = self.graph.block(pred).env.at(i) else {
                continue;
            };

            let old = self.graph.block(block).env.at(i);
            if let Some(old) = old {
                // In loops a value can propagate back to the block where it
                // was declared
                if old == curr {
                    continue;
                }

                let slot = ScopeSlot::stack(i);
                let existing = self.graph.block(block).env.phi_at(i);
                let phi = match existing {
                    Some(phi) if self.graph.instr(phi).block == Some(block) => phi,
                    _ => {
                        let phi = self.create_phi(block, slot);
                        self.graph.block_mut(block).instructions.push(phi);
                        self.graph.add_arg(phi, old);
                        self.assign_in(block, slot, phi);
                        phi
                    }
                };
                self.graph.add_arg(phi, curr);
            } else {
                // Propagate the value
                self.graph.block_mut(block).env.set(i, curr);
            }
        }

        Ok(())
    }

    fn create_phi(&mut self, block: BlockId, slot: ScopeSlot) -> InstrId {
        let phi = self.graph.new_instr(HirKind::Phi, Some(block));
        self.graph.instr_mut(phi).slot = Some(slot);
        self.graph.block_mut(block).phis.push(phi);
        if let ScopeSlot::Stack { index } = slot {
            self.graph.block_mut(block).env.set_phi(index, phi);
        }
        phi
    }

    fn assign(&mut self, slot: ScopeSlot, value: InstrId) {
        self.assign_in(self.current_block, slot, value);
    }

    fn assign_in(&mut self, block: BlockId, slot: ScopeSlot, value: InstrId) {
        self.graph.instr_mut(value).slot = Some(slot);
        if let ScopeSlot::Stack { index } = slot {
            self.graph.block_mut(block).env.set(index, value);
        }
    }

    /// Every slot unseen before a loop contributes nil from the pre-loop edge
    fn mark_pre_loop(&mut self) {
        let slots = self.graph.block(self.current_block).env.stack_slots();
        for i in 0..slots - 1 {
            if self.graph.block(self.current_block).env.at(i).is_some() {
                continue;
            }
            let nil = self.add(HirKind::Nil);
            self.assign(ScopeSlot::stack(i), nil);
        }
    }

    /// Seed a phi for every stack slot of a loop header (except the logic
    /// slot); the back edge completes them later.
    fn mark_loop(&mut self, header: BlockId) {
        self.graph.block_mut(header).is_loop = true;
        let slots = self.graph.block(header).env.stack_slots();
        for i in 0..slots - 1 {
            let slot = ScopeSlot::stack(i);
            let old = self.graph.block(header).env.at(i);
            let phi = self.create_phi(header, slot);
            if let Some(old) = old {
                self.graph.add_arg(phi, old);
            }
            self.assign_in(header, slot, phi);
            self.graph.block_mut(header).instructions.push(phi);
        }
    }

    /// Chain a fresh block onto the loop's break edge so no block ever sees
    /// more than two predecessors.
    fn chain_break(&mut self) -> Result<BlockId, CompileError> {
        let brk = self.loops.last().unwrap().brk;
        let block = self.create_block();
        self.goto_from(brk, block)?;
        self.loops.last_mut().unwrap().brk = block;
        Ok(block)
    }
}
