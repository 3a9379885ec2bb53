/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Argument lists of calls.
//!
//! Arguments are pushed in declaration order, so the top of the mimic stack
//! holds the last one.  Both converters pop them all and rebuild the list in
//! declaration order.

use crate::class_model::{ArgLocation, ResolvedMethod};
use crate::compilation_unit::CompilationUnit;
use crate::data_structures::{BlockIx, ExprIx};
use crate::expression::{ExprKind, ExprList};

fn pop_values(
  cu: &mut CompilationUnit, block: BlockIx, nr_args: usize,
) -> ExprList {
  let stack = &mut cu.block_mut(block).mimic_stack;
  let mut values: ExprList = (0..nr_args).map(|_| stack.pop()).collect();
  values.reverse();
  values
}

/// An argument node takes the bytecode offset of the value it wraps.
fn wrap_arg(
  cu: &mut CompilationUnit, value: ExprIx, location: ArgLocation,
  is_this: bool,
) -> ExprIx {
  let (vm_type, offset) = {
    let expr = cu.expr(value);
    (expr.vm_type(), expr.bytecode_offset)
  };
  let kind = if is_this {
    ExprKind::ArgThis { value, location }
  } else {
    ExprKind::Arg { vm_type, value, location }
  };
  cu.new_expr(kind, offset)
}

fn args_list(cu: &mut CompilationUnit, args: ExprList) -> ExprIx {
  let offset = args
    .first()
    .map(|&a| cu.expr(a).bytecode_offset)
    .unwrap_or(0);
  cu.new_expr(ExprKind::ArgsList { args }, offset)
}

/// Pops the `nr_args` arguments of a call to `method` off the mimic stack
/// of `block`.  The receiver of an instance method becomes an `ArgThis`;
/// every argument records where the method's args map places it.  A call
/// without arguments gets a `NoArgs` node.
pub fn convert_args(
  cu: &mut CompilationUnit, block: BlockIx, nr_args: usize,
  method: &ResolvedMethod,
) -> ExprIx {
  if nr_args == 0 {
    return cu.new_expr(ExprKind::NoArgs, 0);
  }
  let values = pop_values(cu, block, nr_args);
  let args: ExprList = values
    .iter()
    .enumerate()
    .map(|(i, &value)| {
      let location = match &method.args_map {
        Some(map) => map.location(i),
        None => ArgLocation::Stack,
      };
      wrap_arg(cu, value, location, i == 0 && !method.is_static)
    })
    .collect();
  args_list(cu, args)
}

/// Like `convert_args`, for calls into native code: every argument is passed
/// on the stack and the receiver is not tagged.
pub fn convert_native_args(
  cu: &mut CompilationUnit, block: BlockIx, nr_args: usize,
) -> ExprIx {
  if nr_args == 0 {
    return cu.new_expr(ExprKind::NoArgs, 0);
  }
  let values = pop_values(cu, block, nr_args);
  let args: ExprList = values
    .iter()
    .map(|&value| wrap_arg(cu, value, ArgLocation::Stack, false))
    .collect();
  args_list(cu, args)
}
