/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Conversion of bytecode to the expression/statement IR.
//!
//! Every instruction is first decoded into an `Insn`, which carries exactly
//! the operands its conversion needs, then converted against the mimic stack
//! of the block being built.

use log::{debug, trace};

use crate::bytecode::*;
use crate::class_model::{ClassResolver, ObjectHeap};
use crate::compilation_unit::CompilationUnit;
use crate::data_structures::{BlockIx, ExprIx, Map, VmType};
use crate::expression::ExprKind;
use crate::interface::CompileError;
use crate::statement::StmtKind;

mod args;
mod load_store;
mod object;

pub use args::{convert_args, convert_native_args};
pub use load_store::utf8_to_utf16;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InvokeKind {
  Virtual,
  Special,
  Static,
  Interface,
}

/// One decoded instruction.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Insn {
  Nop,
  AConstNull,
  Const { vm_type: VmType, value: i64 },
  FConst { vm_type: VmType, value: f64 },
  Ldc { index: u16 },
  Load { vm_type: VmType, index: u16 },
  Store { vm_type: VmType, index: u16 },
  ArrayLoad { vm_type: VmType },
  ArrayStore { vm_type: VmType },
  Pop,
  Pop2,
  Dup,
  New { index: u16 },
  NewArray { atype: u8 },
  ANewArray { index: u16 },
  MultiANewArray { index: u16, dimensions: u8 },
  ArrayLength,
  GetStatic { index: u16 },
  PutStatic { index: u16 },
  GetField { index: u16 },
  PutField { index: u16 },
  Invoke { kind: InvokeKind, index: u16 },
  Return { vm_type: VmType },
  Goto { target: u32 },
}

/// Value kinds of the typed instruction groups, in opcode order.
const KINDS: [VmType; 5] = [
  VmType::Int,
  VmType::Long,
  VmType::Float,
  VmType::Double,
  VmType::Reference,
];

fn array_elem_type(opc: u8, base: u8) -> VmType {
  match opc - base {
    0 => VmType::Int,
    1 => VmType::Long,
    2 => VmType::Float,
    3 => VmType::Double,
    4 => VmType::Reference,
    // baload/bastore also serve boolean arrays, so they load ints.
    5 => VmType::Int,
    6 => VmType::Char,
    _ => VmType::Short,
  }
}

impl Insn {
  /// Decodes the instruction at `offset`.  Returns it with its length.
  pub fn decode(
    code: &[u8], offset: usize,
  ) -> Result<(Insn, usize), CompileError> {
    let mut reader = BytecodeReader::new(code, offset);
    let opc = reader.read_u8()?;
    let insn = match opc {
      OPC_NOP => Insn::Nop,
      OPC_ACONST_NULL => Insn::AConstNull,
      OPC_ICONST_M1..=OPC_ICONST_5 => Insn::Const {
        vm_type: VmType::Int,
        value: opc as i64 - OPC_ICONST_0 as i64,
      },
      OPC_LCONST_0 | OPC_LCONST_1 => Insn::Const {
        vm_type: VmType::Long,
        value: (opc - OPC_LCONST_0) as i64,
      },
      OPC_FCONST_0..=OPC_FCONST_2 => Insn::FConst {
        vm_type: VmType::Float,
        value: (opc - OPC_FCONST_0) as f64,
      },
      OPC_DCONST_0 | OPC_DCONST_1 => Insn::FConst {
        vm_type: VmType::Double,
        value: (opc - OPC_DCONST_0) as f64,
      },
      OPC_BIPUSH => {
        Insn::Const { vm_type: VmType::Int, value: reader.read_s8()? as i64 }
      }
      OPC_SIPUSH => {
        Insn::Const { vm_type: VmType::Int, value: reader.read_s16()? as i64 }
      }
      OPC_LDC => Insn::Ldc { index: reader.read_u8()? as u16 },
      OPC_LDC_W | OPC_LDC2_W => Insn::Ldc { index: reader.read_u16()? },
      OPC_ILOAD..=OPC_ALOAD => Insn::Load {
        vm_type: KINDS[(opc - OPC_ILOAD) as usize],
        index: reader.read_u8()? as u16,
      },
      OPC_ILOAD_0..=OPC_ALOAD_3 => {
        let n = opc - OPC_ILOAD_0;
        Insn::Load { vm_type: KINDS[(n / 4) as usize], index: (n % 4) as u16 }
      }
      OPC_IALOAD..=OPC_SALOAD => {
        Insn::ArrayLoad { vm_type: array_elem_type(opc, OPC_IALOAD) }
      }
      OPC_ISTORE..=OPC_ASTORE => Insn::Store {
        vm_type: KINDS[(opc - OPC_ISTORE) as usize],
        index: reader.read_u8()? as u16,
      },
      OPC_ISTORE_0..=OPC_ASTORE_3 => {
        let n = opc - OPC_ISTORE_0;
        Insn::Store { vm_type: KINDS[(n / 4) as usize], index: (n % 4) as u16 }
      }
      OPC_IASTORE..=OPC_SASTORE => {
        Insn::ArrayStore { vm_type: array_elem_type(opc, OPC_IASTORE) }
      }
      OPC_POP => Insn::Pop,
      OPC_POP2 => Insn::Pop2,
      OPC_DUP => Insn::Dup,
      OPC_GOTO => {
        let delta = reader.read_s16()? as i64;
        Insn::Goto { target: (offset as i64 + delta) as u32 }
      }
      OPC_GOTO_W => {
        let delta = reader.read_s32()? as i64;
        Insn::Goto { target: (offset as i64 + delta) as u32 }
      }
      OPC_IRETURN..=OPC_ARETURN => {
        Insn::Return { vm_type: KINDS[(opc - OPC_IRETURN) as usize] }
      }
      OPC_RETURN => Insn::Return { vm_type: VmType::Void },
      OPC_GETSTATIC => Insn::GetStatic { index: reader.read_u16()? },
      OPC_PUTSTATIC => Insn::PutStatic { index: reader.read_u16()? },
      OPC_GETFIELD => Insn::GetField { index: reader.read_u16()? },
      OPC_PUTFIELD => Insn::PutField { index: reader.read_u16()? },
      OPC_INVOKEVIRTUAL | OPC_INVOKESPECIAL | OPC_INVOKESTATIC => {
        let kind = match opc {
          OPC_INVOKEVIRTUAL => InvokeKind::Virtual,
          OPC_INVOKESPECIAL => InvokeKind::Special,
          _ => InvokeKind::Static,
        };
        Insn::Invoke { kind, index: reader.read_u16()? }
      }
      OPC_INVOKEINTERFACE => {
        let index = reader.read_u16()?;
        // count and a zero byte, both redundant with the descriptor
        reader.read_u8()?;
        reader.read_u8()?;
        Insn::Invoke { kind: InvokeKind::Interface, index }
      }
      OPC_NEW => Insn::New { index: reader.read_u16()? },
      OPC_NEWARRAY => Insn::NewArray { atype: reader.read_u8()? },
      OPC_ANEWARRAY => Insn::ANewArray { index: reader.read_u16()? },
      OPC_ARRAYLENGTH => Insn::ArrayLength,
      OPC_MULTIANEWARRAY => {
        let index = reader.read_u16()?;
        Insn::MultiANewArray { index, dimensions: reader.read_u8()? }
      }
      OPC_WIDE => {
        let opc = reader.read_u8()?;
        let index = reader.read_u16()?;
        match opc {
          OPC_ILOAD..=OPC_ALOAD => Insn::Load {
            vm_type: KINDS[(opc - OPC_ILOAD) as usize],
            index,
          },
          OPC_ISTORE..=OPC_ASTORE => Insn::Store {
            vm_type: KINDS[(opc - OPC_ISTORE) as usize],
            index,
          },
          _ => {
            return Err(CompileError::UnsupportedOpcode {
              opcode: opc,
              offset: offset as u32 + 1,
            })
          }
        }
      }
      _ => {
        return Err(CompileError::UnsupportedOpcode {
          opcode: opc,
          offset: offset as u32,
        })
      }
    };
    Ok((insn, reader.position() - offset))
  }
}

//=============================================================================
// Conversion context

/// The state of converting one instruction: where it came from, which block
/// receives its statements, and the collaborators it may call.
pub(crate) struct Context<'a> {
  pub(crate) cu: &'a mut CompilationUnit,
  pub(crate) resolver: &'a dyn ClassResolver,
  pub(crate) heap: &'a dyn ObjectHeap,
  pub(crate) block: BlockIx,
  pub(crate) offset: u32,
}

impl<'a> Context<'a> {
  pub(crate) fn push(&mut self, expr: ExprIx) {
    self.cu.block_mut(self.block).mimic_stack.push(expr);
  }

  pub(crate) fn pop(&mut self) -> ExprIx {
    self.cu.block_mut(self.block).mimic_stack.pop()
  }

  pub(crate) fn expr(&mut self, kind: ExprKind) -> ExprIx {
    self.cu.new_expr(kind, self.offset)
  }

  pub(crate) fn push_expr(&mut self, kind: ExprKind) {
    let expr = self.expr(kind);
    self.push(expr);
  }

  pub(crate) fn stmt(&mut self, kind: StmtKind) {
    self.cu.add_stmt(self.block, kind, self.offset);
  }

  /// Stores `value` into a fresh temporary and pushes the temporary.
  pub(crate) fn push_temporary(&mut self, vm_type: VmType, value: ExprIx) {
    let var = self.cu.alloc_temporary(vm_type);
    let temp = self.expr(ExprKind::Temporary { vm_type, var });
    self.stmt(StmtKind::Store { dest: temp, src: value });
    self.push(temp);
  }
}

fn convert_insn(ctx: &mut Context, insn: Insn) -> Result<(), CompileError> {
  trace!("{:?} @{}: {:?}", ctx.block, ctx.offset, insn);
  match insn {
    Insn::Nop => {}
    Insn::AConstNull => ctx.push_expr(ExprKind::Value {
      vm_type: VmType::Reference,
      value: 0,
    }),
    Insn::Const { vm_type, value } => {
      load_store::convert_const(ctx, vm_type, value)
    }
    Insn::FConst { vm_type, value } => {
      ctx.push_expr(ExprKind::FValue { vm_type, value })
    }
    Insn::Ldc { index } => load_store::convert_ldc(ctx, index)?,
    Insn::Load { vm_type, index } => {
      ctx.push_expr(ExprKind::Local { vm_type, index })
    }
    Insn::Store { vm_type, index } => {
      load_store::convert_store(ctx, vm_type, index)
    }
    Insn::ArrayLoad { vm_type } => object::convert_array_load(ctx, vm_type),
    Insn::ArrayStore { vm_type } => object::convert_array_store(ctx, vm_type),
    Insn::Pop => {
      ctx.pop();
    }
    Insn::Pop2 => {
      // One category-2 value, or two category-1 values.
      let top = ctx.pop();
      if !ctx.cu.expr(top).vm_type().is_wide() {
        ctx.pop();
      }
    }
    Insn::Dup => {
      let top = ctx.pop();
      ctx.push(top);
      ctx.push(top);
    }
    Insn::New { index } => object::convert_new(ctx, index)?,
    Insn::NewArray { atype } => object::convert_newarray(ctx, atype)?,
    Insn::ANewArray { index } => object::convert_anewarray(ctx, index)?,
    Insn::MultiANewArray { index, dimensions } => {
      object::convert_multianewarray(ctx, index, dimensions)?
    }
    Insn::ArrayLength => {
      let arrayref = ctx.pop();
      ctx.push_expr(ExprKind::ArrayLength { arrayref });
    }
    Insn::GetStatic { index } => object::convert_getstatic(ctx, index)?,
    Insn::PutStatic { index } => object::convert_putstatic(ctx, index)?,
    Insn::GetField { index } => object::convert_getfield(ctx, index)?,
    Insn::PutField { index } => object::convert_putfield(ctx, index)?,
    Insn::Invoke { kind, index } => object::convert_invoke(ctx, kind, index)?,
    Insn::Return { vm_type } => {
      let value = if vm_type == VmType::Void { None } else { Some(ctx.pop()) };
      ctx.stmt(StmtKind::Return { value });
    }
    Insn::Goto { target } => {
      let target = ctx
        .cu
        .find_block(target)
        .ok_or(CompileError::InvalidBranchTarget { target })?;
      ctx.stmt(StmtKind::Goto { target });
    }
  }
  Ok(())
}

//=============================================================================
// Drivers

/// Converts the instructions of one block, whose boundaries must already be
/// known, against the block's current mimic stack.
pub fn convert_block(
  cu: &mut CompilationUnit, resolver: &dyn ClassResolver,
  heap: &dyn ObjectHeap, block: BlockIx,
) -> Result<(), CompileError> {
  let method = cu.method.clone();
  let code = &method.code;
  let (start, end) = (cu.block(block).start(), cu.block(block).end());

  let mut offset = start as usize;
  while offset < end as usize {
    let (insn, len) = Insn::decode(code, offset)?;
    let mut ctx =
      Context { cu: &mut *cu, resolver, heap, block, offset: offset as u32 };
    convert_insn(&mut ctx, insn)?;
    offset += len;
  }
  cu.block_mut(block).is_converted = true;
  Ok(())
}

/// Discovers the blocks of the unit's method and converts all of them, in
/// offset order.  Values left on a block's mimic stack flow into the
/// successors that have not been converted yet.
///
/// The first predecessor to reach a block fixes the stack it starts with.
/// Any other edge into it must carry an empty stack, and so must an edge
/// into a block that is already converted; stacked values cannot be merged.
pub fn convert_to_ir(
  cu: &mut CompilationUnit, resolver: &dyn ClassResolver,
  heap: &dyn ObjectHeap,
) -> Result<(), CompileError> {
  cu.analyze_control_flow()?;

  // Depth of the stack each block starts with, once known.
  let mut entry_depth: Map<BlockIx, usize> = Map::default();
  let exit = cu.exit_ix();

  for block in cu.blocks_in_order() {
    let depth = cu.block(block).mimic_stack.len();
    entry_depth.entry(block).or_insert(depth);
    convert_block(cu, resolver, heap, block)?;

    let leftover: Vec<ExprIx> =
      cu.block(block).mimic_stack.values().to_vec();
    let successors = cu.block(block).successors.clone();
    for succ in successors {
      if succ == exit {
        continue;
      }
      match entry_depth.get(&succ) {
        None => {
          let succ_block = cu.block_mut(succ);
          for &expr in &leftover {
            succ_block.mimic_stack.push(expr);
          }
          entry_depth.insert(succ, leftover.len());
        }
        Some(&0) if leftover.is_empty() => {}
        Some(&expected) => {
          return Err(CompileError::StackMismatch {
            target: cu.block(succ).start(),
            expected,
            found: leftover.len(),
          });
        }
      }
    }
  }

  debug!(
    "{:?}: converted {} block(s), {} expression(s), {} temporaries",
    cu.method,
    cu.nr_blocks(),
    cu.nr_exprs(),
    cu.vars.num_vars()
  );
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_vm::{test_method, TestVm};

  use std::sync::Arc;

  fn converted(code: Vec<u8>) -> CompilationUnit {
    let vm = TestVm::new();
    let mut cu = CompilationUnit::new(Arc::new(test_method(code, true)));
    convert_to_ir(&mut cu, &vm, &vm).unwrap();
    cu
  }

  fn top_kind(cu: &CompilationUnit, block: BlockIx) -> ExprKind {
    let top = cu.block(block).mimic_stack.peek().unwrap();
    cu.expr(top).kind.clone()
  }

  #[test]
  fn iconst_0_pushes_one_constant() {
    let cu = converted(vec![OPC_ICONST_0]);
    let b0 = cu.find_block(0).unwrap();
    let block = cu.block(b0);
    assert_eq!(block.mimic_stack.len(), 1);
    assert!(block.stmts.is_empty());
    assert_eq!(
      top_kind(&cu, b0),
      ExprKind::Value { vm_type: VmType::Int, value: 0 }
    );
  }

  #[test]
  fn istore_1_stores_the_stacked_value() {
    let vm = TestVm::new();
    let mut cu =
      CompilationUnit::new(Arc::new(test_method(vec![OPC_ISTORE_1], true)));
    cu.analyze_control_flow().unwrap();
    let b0 = cu.find_block(0).unwrap();
    let seven =
      cu.new_expr(ExprKind::Value { vm_type: VmType::Int, value: 7 }, 0);
    cu.block_mut(b0).mimic_stack.push(seven);

    convert_block(&mut cu, &vm, &vm, b0).unwrap();

    let block = cu.block(b0);
    assert!(block.mimic_stack.is_empty());
    assert_eq!(block.stmts.len(), 1);
    match cu.stmt(block.stmts[0]).kind {
      StmtKind::Store { dest, src } => {
        assert_eq!(
          cu.expr(dest).kind,
          ExprKind::Local { vm_type: VmType::Int, index: 1 }
        );
        assert_eq!(src, seven);
      }
      ref other => panic!("unexpected {:?}", other),
    }
  }

  #[test]
  fn constants_are_sign_extended() {
    let cu = converted(vec![
      OPC_ICONST_M1,
      OPC_BIPUSH,
      0x80,
      OPC_SIPUSH,
      0x01,
      0x00,
    ]);
    let b0 = cu.find_block(0).unwrap();
    let values: Vec<ExprKind> = cu
      .block(b0)
      .mimic_stack
      .values()
      .iter()
      .map(|&e| cu.expr(e).kind.clone())
      .collect();
    assert_eq!(
      values,
      vec![
        ExprKind::Value { vm_type: VmType::Int, value: -1i64 as u64 },
        ExprKind::Value { vm_type: VmType::Int, value: -128i64 as u64 },
        ExprKind::Value { vm_type: VmType::Int, value: 256 },
      ]
    );
  }

  #[test]
  fn short_form_locals() {
    let cu = converted(vec![OPC_ALOAD_2, OPC_DLOAD_3, OPC_LSTORE_0]);
    let b0 = cu.find_block(0).unwrap();
    assert_eq!(
      top_kind(&cu, b0),
      ExprKind::Local { vm_type: VmType::Reference, index: 2 }
    );
    let store = cu.stmt(cu.block(b0).stmts[0]).kind.clone();
    match store {
      StmtKind::Store { dest, .. } => assert_eq!(
        cu.expr(dest).kind,
        ExprKind::Local { vm_type: VmType::Long, index: 0 }
      ),
      other => panic!("unexpected {:?}", other),
    }
  }

  #[test]
  fn wide_locals() {
    let cu = converted(vec![OPC_WIDE, OPC_FLOAD, 0x01, 0x02]);
    let b0 = cu.find_block(0).unwrap();
    assert_eq!(
      top_kind(&cu, b0),
      ExprKind::Local { vm_type: VmType::Float, index: 0x102 }
    );
  }

  #[test]
  fn unsupported_opcodes_fail() {
    let vm = TestVm::new();
    let mut cu = CompilationUnit::new(Arc::new(test_method(
      vec![OPC_ICONST_1, OPC_ICONST_2, OPC_IADD],
      true,
    )));
    match convert_to_ir(&mut cu, &vm, &vm) {
      Err(CompileError::UnsupportedOpcode { opcode: OPC_IADD, offset: 2 }) => {}
      other => panic!("unexpected {:?}", other.err()),
    }
  }

  #[test]
  fn stack_flows_into_successors() {
    // 0: iconst_3
    // 1: goto 4
    // 4: istore_0
    // 5: return
    let cu = converted(vec![
      OPC_ICONST_3,
      OPC_GOTO,
      0,
      3,
      OPC_ISTORE_0,
      OPC_RETURN,
    ]);
    let b1 = cu.find_block(4).unwrap();
    let stmts = &cu.block(b1).stmts;
    assert_eq!(stmts.len(), 2);
    match cu.stmt(stmts[0]).kind {
      StmtKind::Store { src, .. } => assert_eq!(
        cu.expr(src).kind,
        ExprKind::Value { vm_type: VmType::Int, value: 3 }
      ),
      ref other => panic!("unexpected {:?}", other),
    }
    assert_eq!(cu.stmt(stmts[1]).kind, StmtKind::Return { value: None });
    let b0 = cu.find_block(0).unwrap();
    assert_eq!(
      cu.stmt(*cu.block(b0).stmts.last().unwrap()).kind,
      StmtKind::Goto { target: b1 }
    );
  }

  #[test]
  fn balanced_code_leaves_an_empty_stack() {
    let cu = converted(vec![OPC_ICONST_0, OPC_ISTORE_1]);
    let b0 = cu.find_block(0).unwrap();
    let block = cu.block(b0);
    assert!(block.mimic_stack.is_empty());
    assert_eq!(block.stmts.len(), 1);
    match cu.stmt(block.stmts[0]).kind {
      StmtKind::Store { dest, src } => {
        assert_eq!(
          cu.expr(dest).kind,
          ExprKind::Local { vm_type: VmType::Int, index: 1 }
        );
        assert_eq!(
          cu.expr(src).kind,
          ExprKind::Value { vm_type: VmType::Int, value: 0 }
        );
      }
      ref other => panic!("unexpected {:?}", other),
    }
  }

  fn convert_err(code: Vec<u8>) -> Option<CompileError> {
    let vm = TestVm::new();
    let mut cu = CompilationUnit::new(Arc::new(test_method(code, true)));
    convert_to_ir(&mut cu, &vm, &vm).err()
  }

  #[test]
  fn two_predecessors_with_values_do_not_merge() {
    // 0: iconst_1
    // 1: goto 7
    // 4: iconst_2
    // 5: nop
    // 6: nop
    // 7: istore_0
    // 8: return
    let code = vec![
      OPC_ICONST_1,
      OPC_GOTO,
      0,
      6,
      OPC_ICONST_2,
      OPC_NOP,
      OPC_NOP,
      OPC_ISTORE_0,
      OPC_RETURN,
    ];
    match convert_err(code) {
      Some(CompileError::StackMismatch {
        target: 7,
        expected: 1,
        found: 1,
      }) => {}
      other => panic!("unexpected {:?}", other),
    }
  }

  #[test]
  fn back_edge_with_values_does_not_merge() {
    // 0: iconst_0
    // 1: goto 0
    let code = vec![OPC_ICONST_0, OPC_GOTO, 0xff, 0xff];
    match convert_err(code) {
      Some(CompileError::StackMismatch {
        target: 0,
        expected: 0,
        found: 1,
      }) => {}
      other => panic!("unexpected {:?}", other),
    }
  }

  #[test]
  fn empty_stacks_join() {
    // 0: nop
    // 1: goto 7
    // 4: iconst_2
    // 5: istore_1
    // 6: nop
    // 7: return
    let cu = converted(vec![
      OPC_NOP,
      OPC_GOTO,
      0,
      6,
      OPC_ICONST_2,
      OPC_ISTORE_1,
      OPC_NOP,
      OPC_RETURN,
    ]);
    let b2 = cu.find_block(7).unwrap();
    assert!(cu.block(b2).mimic_stack.is_empty());
    assert_eq!(cu.block(b2).successors.as_slice(), &[cu.exit_ix()]);
    for block in cu.blocks_in_order() {
      assert!(cu.block(block).is_converted);
    }
  }

  #[test]
  fn dup_shares_the_node() {
    let cu = converted(vec![OPC_ICONST_4, OPC_DUP]);
    let b0 = cu.find_block(0).unwrap();
    let values = cu.block(b0).mimic_stack.values();
    assert_eq!(values.len(), 2);
    assert_eq!(values[0], values[1]);
  }
}
