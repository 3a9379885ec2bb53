/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Side-effecting IR nodes, kept in per-block order.

use smallvec::SmallVec;

use crate::data_structures::{BlockIx, ExprIx};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StmtKind {
  Store { dest: ExprIx, src: ExprIx },
  NullCheck { reference: ExprIx },
  /// Bounds check of an `ArrayDeref` expression.
  ArrayCheck { deref: ExprIx },
  /// An expression evaluated for its side effects only.
  Expression { expr: ExprIx },
  Return { value: Option<ExprIx> },
  Goto { target: BlockIx },
}

impl StmtKind {
  /// Expressions read by this statement.  The destination of a store is not
  /// included.
  pub fn operands(&self) -> SmallVec<[ExprIx; 2]> {
    let mut out = SmallVec::new();
    match self {
      StmtKind::Store { src, .. } => out.push(*src),
      StmtKind::NullCheck { reference } => out.push(*reference),
      StmtKind::ArrayCheck { deref } => out.push(*deref),
      StmtKind::Expression { expr } => out.push(*expr),
      StmtKind::Return { value } => out.extend(value.iter().cloned()),
      StmtKind::Goto { .. } => {}
    }
    out
  }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Statement {
  pub kind: StmtKind,
  pub bytecode_offset: u32,
}

impl Statement {
  pub fn new(kind: StmtKind, bytecode_offset: u32) -> Self {
    Self { kind, bytecode_offset }
  }
}
