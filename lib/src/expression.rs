/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Value-producing IR nodes.
//!
//! Expressions live in the arena of their compilation unit and refer to each
//! other by `ExprIx`.  The same node may be referenced from a mimic stack
//! slot and from one or more statements at once.

use smallvec::SmallVec;

use crate::class_model::{ArgLocation, ClassId, ResolvedField, ResolvedMethod};
use crate::data_structures::{ArrayElemType, ExprIx, VarIx, VmType};

pub type ExprList = SmallVec<[ExprIx; 4]>;

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
  /// Integer-like constant; ints are kept sign-extended to 64 bits, longs
  /// and references hold their raw bits.
  Value { vm_type: VmType, value: u64 },
  FValue { vm_type: VmType, value: f64 },
  Local { vm_type: VmType, index: u16 },
  Temporary { vm_type: VmType, var: VarIx },
  ArrayDeref { vm_type: VmType, arrayref: ExprIx, index: ExprIx },
  ClassField { vm_type: VmType, field: ResolvedField },
  InstanceField { vm_type: VmType, field: ResolvedField, objectref: ExprIx },
  New { class: ClassId },
  NewArray { size: ExprIx, elem_type: ArrayElemType },
  ANewArray { size: ExprIx, class: ClassId },
  /// `dimensions` is an argument list of the size operands, outermost
  /// dimension first.
  MultiANewArray { class: ClassId, dimensions: ExprIx },
  ArrayLength { arrayref: ExprIx },
  Invoke { method: Box<ResolvedMethod>, args: ExprIx, vm_type: VmType },
  Arg { vm_type: VmType, value: ExprIx, location: ArgLocation },
  /// The receiver of an instance method call.
  ArgThis { value: ExprIx, location: ArgLocation },
  ArgsList { args: ExprList },
  NoArgs,
}

impl ExprKind {
  pub fn vm_type(&self) -> VmType {
    match self {
      ExprKind::Value { vm_type, .. }
      | ExprKind::FValue { vm_type, .. }
      | ExprKind::Local { vm_type, .. }
      | ExprKind::Temporary { vm_type, .. }
      | ExprKind::ArrayDeref { vm_type, .. }
      | ExprKind::ClassField { vm_type, .. }
      | ExprKind::InstanceField { vm_type, .. }
      | ExprKind::Invoke { vm_type, .. }
      | ExprKind::Arg { vm_type, .. } => *vm_type,
      ExprKind::New { .. }
      | ExprKind::NewArray { .. }
      | ExprKind::ANewArray { .. }
      | ExprKind::MultiANewArray { .. }
      | ExprKind::ArgThis { .. } => VmType::Reference,
      ExprKind::ArrayLength { .. } => VmType::Int,
      ExprKind::ArgsList { .. } | ExprKind::NoArgs => VmType::Void,
    }
  }

  /// Direct operands of this node, in evaluation order.
  pub fn children(&self) -> ExprList {
    let mut out = ExprList::new();
    match self {
      ExprKind::Value { .. }
      | ExprKind::FValue { .. }
      | ExprKind::Local { .. }
      | ExprKind::Temporary { .. }
      | ExprKind::ClassField { .. }
      | ExprKind::New { .. }
      | ExprKind::NoArgs => {}
      ExprKind::ArrayDeref { arrayref, index, .. } => {
        out.push(*arrayref);
        out.push(*index);
      }
      ExprKind::InstanceField { objectref, .. } => out.push(*objectref),
      ExprKind::NewArray { size, .. } | ExprKind::ANewArray { size, .. } => {
        out.push(*size)
      }
      ExprKind::MultiANewArray { dimensions, .. } => out.push(*dimensions),
      ExprKind::ArrayLength { arrayref } => out.push(*arrayref),
      ExprKind::Invoke { args, .. } => out.push(*args),
      ExprKind::Arg { value, .. } | ExprKind::ArgThis { value, .. } => {
        out.push(*value)
      }
      ExprKind::ArgsList { args } => out.extend(args.iter().cloned()),
    }
    out
  }

  pub fn temporary(&self) -> Option<VarIx> {
    match self {
      ExprKind::Temporary { var, .. } => Some(*var),
      _ => None,
    }
  }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Expression {
  pub kind: ExprKind,
  /// Offset of the instruction this node was built for.
  pub bytecode_offset: u32,
}

impl Expression {
  pub fn new(kind: ExprKind, bytecode_offset: u32) -> Self {
    Self { kind, bytecode_offset }
  }

  pub fn vm_type(&self) -> VmType {
    self.kind.vm_type()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn allocation_kinds_are_references() {
    let size = ExprIx::new(0);
    let kinds = [
      ExprKind::New { class: ClassId(1) },
      ExprKind::NewArray { size, elem_type: ArrayElemType::Int },
      ExprKind::ANewArray { size, class: ClassId(1) },
      ExprKind::MultiANewArray { class: ClassId(1), dimensions: size },
    ];
    for kind in kinds.iter() {
      assert_eq!(kind.vm_type(), VmType::Reference);
    }
    assert_eq!(ExprKind::ArrayLength { arrayref: size }.vm_type(), VmType::Int);
    assert_eq!(ExprKind::NoArgs.vm_type(), VmType::Void);
  }

  #[test]
  fn children_in_evaluation_order() {
    let deref = ExprKind::ArrayDeref {
      vm_type: VmType::Char,
      arrayref: ExprIx::new(3),
      index: ExprIx::new(1),
    };
    assert_eq!(deref.children().as_slice(), &[ExprIx::new(3), ExprIx::new(1)]);
    assert!(ExprKind::NoArgs.children().is_empty());
    let temp = ExprKind::Temporary { vm_type: VmType::Int, var: VarIx::new(2) };
    assert_eq!(temp.temporary(), Some(VarIx::new(2)));
    assert_eq!(deref.temporary(), None);
  }
}
