/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! The compilation unit: everything built for one method, from the block
//! graph down to the variables handed to the register allocator.

use log::{debug, trace};

use std::sync::Arc;

use crate::basic_block::BasicBlock;
use crate::bytecode::{
  branch_targets, falls_through, insn_length, is_block_terminator, is_return,
};
use crate::class_model::Method;
use crate::data_structures::{
  BlockIx, ExprIx, Set, StmtIx, TypedIxVec, VarIx, VmType,
};
use crate::expression::{ExprKind, Expression};
use crate::interface::CompileError;
use crate::statement::{Statement, StmtKind};
use crate::vars::Vars;

pub struct CompilationUnit {
  pub method: Arc<Method>,
  pub(crate) blocks: TypedIxVec<BlockIx, BasicBlock>,
  /// Successor of every returning block.  Its range is `[0, 0)`, so offset
  /// lookups never find it.
  exit: BlockIx,
  pub(crate) exprs: TypedIxVec<ExprIx, Expression>,
  pub(crate) stmts: TypedIxVec<StmtIx, Statement>,
  pub vars: Vars,
  /// Machine code buffer, filled by the code emitter.
  pub objcode: Vec<u8>,
  pub is_compiled: bool,
}

impl CompilationUnit {
  pub fn new(method: Arc<Method>) -> Self {
    let mut blocks = TypedIxVec::new();
    let mut exit_block = BasicBlock::new(0, 0);
    exit_block.is_converted = true;
    let exit = blocks.push(exit_block);
    Self {
      method,
      blocks,
      exit,
      exprs: TypedIxVec::new(),
      stmts: TypedIxVec::new(),
      vars: Vars::new(),
      objcode: Vec::new(),
      is_compiled: false,
    }
  }

  //---------------------------------------------------------------------------
  // Blocks

  /// Number of blocks, not counting the exit block.
  pub fn nr_blocks(&self) -> u32 {
    self.blocks.len() - 1
  }

  pub fn block(&self, ix: BlockIx) -> &BasicBlock {
    &self.blocks[ix]
  }

  pub fn block_mut(&mut self, ix: BlockIx) -> &mut BasicBlock {
    &mut self.blocks[ix]
  }

  pub fn blocks(&self) -> impl Iterator<Item = (BlockIx, &BasicBlock)> {
    let exit = self.exit;
    self.blocks.iter_ix().filter(move |&(ix, _)| ix != exit)
  }

  pub fn exit_block(&self) -> &BasicBlock {
    &self.blocks[self.exit]
  }

  pub fn exit_ix(&self) -> BlockIx {
    self.exit
  }

  /// Block indices in bytecode offset order.
  pub fn blocks_in_order(&self) -> Vec<BlockIx> {
    let mut order: Vec<BlockIx> = self.blocks().map(|(ix, _)| ix).collect();
    order.sort_by_key(|&ix| self.blocks[ix].start());
    order
  }

  /// Returns the block whose range contains `offset`.
  pub fn find_block(&self, offset: u32) -> Option<BlockIx> {
    self
      .blocks()
      .find(|(_, block)| block.contains(offset))
      .map(|(ix, _)| ix)
  }

  /// Adds the block `[start, end)`.  Block ranges never overlap; trying to
  /// add one that does is a bug.
  pub fn add_block(&mut self, start: u32, end: u32) -> BlockIx {
    let new_block = BasicBlock::new(start, end);
    if let Some((ix, _)) =
      self.blocks().find(|(_, b)| b.range.overlaps(&new_block.range))
    {
      panic!(
        "add_block: [{}, {}) overlaps {:?} {:?}",
        start, end, ix, self.blocks[ix].range
      );
    }
    let ix = self.blocks.push(new_block);
    trace!("add_block {:?} [{}, {})", ix, start, end);
    ix
  }

  /// Splits `ix` at `offset`: the block keeps `[start, offset)` and falls
  /// through to the returned block, which takes `[offset, end)` and the
  /// outgoing edges.  Only unconverted blocks can be split.
  pub fn split_block(&mut self, ix: BlockIx, offset: u32) -> BlockIx {
    let (start, end) = (self.blocks[ix].start(), self.blocks[ix].end());
    if !(start < offset && offset < end) || self.blocks[ix].is_converted {
      panic!("split_block: cannot split {:?} at {}", ix, offset);
    }
    let mut tail = BasicBlock::new(offset, end);
    {
      let head = &mut self.blocks[ix];
      head.range.end = offset;
      tail.successors = std::mem::take(&mut head.successors);
    }
    let tail_ix = self.blocks.push(tail);
    self.blocks[ix].successors.push(tail_ix);
    trace!("split_block {:?} at {} -> {:?}", ix, offset, tail_ix);
    tail_ix
  }

  /// Discovers the blocks of the method and the edges between them.
  ///
  /// Leaders are offset 0, every branch target and every instruction that
  /// follows a terminator.
  pub fn analyze_control_flow(&mut self) -> Result<(), CompileError> {
    let method = self.method.clone();
    let code = &method.code;
    let code_len = code.len() as u32;
    if code.is_empty() {
      return Ok(());
    }

    let mut insn_starts = Set::default();
    let mut leaders = vec![0u32];
    let mut offset = 0usize;
    while offset < code.len() {
      insn_starts.insert(offset as u32);
      let len = insn_length(code, offset)?;
      let opc = code[offset];
      if is_block_terminator(opc) {
        for &target in branch_targets(code, offset)?.iter() {
          leaders.push(target);
        }
        if offset + len < code.len() {
          leaders.push((offset + len) as u32);
        }
      }
      offset += len;
    }

    for &leader in &leaders {
      if !insn_starts.contains(&leader) {
        return Err(CompileError::InvalidBranchTarget { target: leader });
      }
    }
    leaders.sort_unstable();
    leaders.dedup();

    for (i, &start) in leaders.iter().enumerate() {
      let end = leaders.get(i + 1).cloned().unwrap_or(code_len);
      self.add_block(start, end);
    }

    // Edges.  The last instruction of a block decides where control goes.
    let order = self.blocks_in_order();
    for &ix in &order {
      let (start, end) = (self.blocks[ix].start(), self.blocks[ix].end());
      let mut last = start as usize;
      let mut pos = start as usize;
      while pos < end as usize {
        last = pos;
        pos += insn_length(code, pos)?;
      }
      let opc = code[last];

      let mut successors = Vec::new();
      for &target in branch_targets(code, last)?.iter() {
        if let Some(succ) = self.find_block(target) {
          successors.push(succ);
        }
      }
      if falls_through(opc) && end < code_len {
        if let Some(succ) = self.find_block(end) {
          successors.push(succ);
        }
      }
      if is_return(opc) {
        successors.push(self.exit);
      }
      let block = &mut self.blocks[ix];
      for succ in successors {
        if !block.successors.contains(&succ) {
          block.successors.push(succ);
        }
      }
    }

    debug!(
      "{:?}: {} block(s) over {} byte(s)",
      self.method,
      self.nr_blocks(),
      code_len
    );
    Ok(())
  }

  //---------------------------------------------------------------------------
  // Arenas

  pub fn new_expr(&mut self, kind: ExprKind, bytecode_offset: u32) -> ExprIx {
    self.exprs.push(Expression::new(kind, bytecode_offset))
  }

  pub fn expr(&self, ix: ExprIx) -> &Expression {
    &self.exprs[ix]
  }

  pub fn nr_exprs(&self) -> u32 {
    self.exprs.len()
  }

  pub fn new_stmt(&mut self, kind: StmtKind, bytecode_offset: u32) -> StmtIx {
    self.stmts.push(Statement::new(kind, bytecode_offset))
  }

  pub fn stmt(&self, ix: StmtIx) -> &Statement {
    &self.stmts[ix]
  }

  /// Creates a statement and appends it to `block`.
  pub fn add_stmt(
    &mut self, block: BlockIx, kind: StmtKind, bytecode_offset: u32,
  ) -> StmtIx {
    let stmt = self.new_stmt(kind, bytecode_offset);
    self.blocks[block].stmts.push(stmt);
    stmt
  }

  /// Introduces a compiler temporary of the given kind.
  pub fn alloc_temporary(&mut self, vm_type: VmType) -> VarIx {
    self.vars.new_var(vm_type)
  }
}
