/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Basic blocks and the mimic operand stack used while building them.

use smallvec::SmallVec;

use crate::data_structures::{BlockIx, ExprIx, StmtIx};
use crate::live_range::LiveRange;

/// The compile-time model of the operand stack of one block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MimicStack {
  values: Vec<ExprIx>,
}

impl MimicStack {
  pub fn new() -> Self {
    Self { values: Vec::new() }
  }

  pub fn push(&mut self, expr: ExprIx) {
    self.values.push(expr);
  }

  /// Pops the top value.  The bytecode is verified before it reaches the
  /// compiler, so an underflow is a bug.
  pub fn pop(&mut self) -> ExprIx {
    match self.values.pop() {
      Some(expr) => expr,
      None => panic!("MimicStack::pop: operand stack underflow"),
    }
  }

  pub fn peek(&self) -> Option<ExprIx> {
    self.values.last().cloned()
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  /// Values from the bottom of the stack up.
  pub fn values(&self) -> &[ExprIx] {
    &self.values
  }
}

#[derive(Clone, Debug)]
pub struct BasicBlock {
  /// Bytecode offsets covered by this block.
  pub range: LiveRange,
  pub stmts: Vec<StmtIx>,
  pub mimic_stack: MimicStack,
  /// Blocks ending in a return have the exit block as successor.
  pub successors: SmallVec<[BlockIx; 2]>,
  pub is_converted: bool,
}

impl BasicBlock {
  pub fn new(start: u32, end: u32) -> Self {
    Self {
      range: LiveRange::new(start, end),
      stmts: Vec::new(),
      mimic_stack: MimicStack::new(),
      successors: SmallVec::new(),
      is_converted: false,
    }
  }

  pub fn start(&self) -> u32 {
    self.range.start
  }

  pub fn end(&self) -> u32 {
    self.range.end
  }

  pub fn contains(&self, offset: u32) -> bool {
    self.range.in_range(offset)
  }
}
