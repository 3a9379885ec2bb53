/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! This is the top level interface for the jitcore library.

use std::fmt;

pub use crate::data_structures::{
  make_register_file, ArrayElemType, BlockIx, ExprIx, IntervalIx, Map,
  MachineReg, RegisterFile, Set, SpillSlot, StmtIx, TypedIxVec, UseIx, VarIx,
  VmType,
};

pub use crate::live_range::LiveRange;
pub use crate::vars::{LiveInterval, RegisterInfo, VarInfo, Vars};

pub use crate::class_model::{
  ArgLocation, ArgsMap, Class, ClassId, ClassResolver, Constant, ConstantPool,
  MemberRef, Method, MethodDescriptor, ObjectHeap, ObjectRef, ResolvedField,
  ResolvedMethod,
};

pub use crate::basic_block::{BasicBlock, MimicStack};
pub use crate::compilation_unit::CompilationUnit;
pub use crate::expression::{ExprKind, Expression};
pub use crate::statement::{Statement, StmtKind};

pub use crate::analysis::{
  linearize, run_analysis, AnalysisError, InsnSource, InstVarUses, LinearUnit,
};
pub use crate::checker::{
  check, CheckerError, CheckerErrors, CheckerState, CheckerValue,
};
pub use crate::compiler::{
  compile_method, CompiledMethod, JitState, Options, DEFAULT_NUM_REGS,
};
pub use crate::convert::{
  convert_args, convert_block, convert_native_args, convert_to_ir,
  utf8_to_utf16, Insn, InvokeKind,
};
pub use crate::inst_stream::{edits_at, EditKind, InstToInsert};
pub use crate::linear_scan::{
  allocate_registers, Assignment, Location, RegAllocResult,
};

#[cfg(any(test, feature = "fuzzing"))]
pub use crate::test_vm::{test_method, TestVm};

//=============================================================================
// Errors

/// An error from the register allocator.  All of these are fatal for the
/// compilation unit.
#[derive(Clone, Debug)]
pub enum RegAllocError {
  /// The register file has no registers at all.
  NoRegisters,
  /// Every register is needed at `pos`, and no interval can be evicted.
  OutOfRegisters { pos: u32 },
  /// The allocation checker found inconsistencies in the result.
  Checker(CheckerErrors),
}

impl fmt::Display for RegAllocError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      RegAllocError::NoRegisters => {
        write!(f, "the register file has no registers")
      }
      RegAllocError::OutOfRegisters { pos } => {
        write!(f, "out of registers at position {}", pos)
      }
      RegAllocError::Checker(errors) => {
        write!(f, "allocation checker: {} error(s)", errors.errors.len())?;
        for err in &errors.errors {
          write!(f, "; {}", err)?;
        }
        Ok(())
      }
    }
  }
}

impl std::error::Error for RegAllocError {}

/// An error that abandons the compilation of a method.
#[derive(Clone, Debug)]
pub enum CompileError {
  /// An allocation for the unit (or a constant object) failed.
  OutOfMemory,
  InvalidConstantIndex(u16),
  UnexpectedConstant { index: u16, tag: u8 },
  /// Undecodable modified UTF-8; `offset` is the offending byte.
  MalformedUtf8 { offset: usize },
  UnresolvedClass(String),
  UnresolvedField { class: String, name: String },
  UnresolvedMethod { class: String, name: String },
  UnsupportedOpcode { opcode: u8, offset: u32 },
  TruncatedBytecode { offset: u32 },
  /// A branch lands outside the code or inside an instruction.
  InvalidBranchTarget { target: u32 },
  /// Operand stacks meet at the block starting at `target` that cannot be
  /// merged: a second predecessor, or a branch back to a converted block,
  /// brings `found` values where `expected` were established.
  StackMismatch { target: u32, expected: usize, found: usize },
  InvalidArrayType(u8),
  InvalidDescriptor(String),
  Analysis(AnalysisError),
  RegAlloc(RegAllocError),
}

impl fmt::Display for CompileError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      CompileError::OutOfMemory => write!(f, "out of memory"),
      CompileError::InvalidConstantIndex(index) => {
        write!(f, "invalid constant pool index {}", index)
      }
      CompileError::UnexpectedConstant { index, tag } => {
        write!(f, "unexpected tag {} for constant pool entry {}", tag, index)
      }
      CompileError::MalformedUtf8 { offset } => {
        write!(f, "malformed UTF-8 at byte {}", offset)
      }
      CompileError::UnresolvedClass(name) => {
        write!(f, "unresolved class {}", name)
      }
      CompileError::UnresolvedField { class, name } => {
        write!(f, "unresolved field {}.{}", class, name)
      }
      CompileError::UnresolvedMethod { class, name } => {
        write!(f, "unresolved method {}.{}", class, name)
      }
      CompileError::UnsupportedOpcode { opcode, offset } => {
        write!(f, "unsupported opcode 0x{:02x} at offset {}", opcode, offset)
      }
      CompileError::TruncatedBytecode { offset } => {
        write!(f, "truncated bytecode at offset {}", offset)
      }
      CompileError::InvalidBranchTarget { target } => {
        write!(f, "invalid branch target {}", target)
      }
      CompileError::StackMismatch { target, expected, found } => write!(
        f,
        "operand stacks do not merge at {}: {} value(s) expected, {} found",
        target, expected, found
      ),
      CompileError::InvalidArrayType(tag) => {
        write!(f, "invalid newarray type tag {}", tag)
      }
      CompileError::InvalidDescriptor(desc) => {
        write!(f, "invalid descriptor {}", desc)
      }
      CompileError::Analysis(err) => write!(f, "analysis: {}", err),
      CompileError::RegAlloc(err) => write!(f, "register allocation: {}", err),
    }
  }
}

impl std::error::Error for CompileError {}

impl From<RegAllocError> for CompileError {
  fn from(err: RegAllocError) -> Self {
    CompileError::RegAlloc(err)
  }
}

impl From<AnalysisError> for CompileError {
  fn from(err: AnalysisError) -> Self {
    CompileError::Analysis(err)
  }
}
