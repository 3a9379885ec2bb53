/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! The compile driver: runs the passes over one method and caches the
//! result on the method.

use log::{debug, info};

use std::sync::Arc;

use crate::analysis::{linearize, run_analysis, LinearUnit};
use crate::basic_block::BasicBlock;
use crate::checker::check;
use crate::class_model::{ClassResolver, Method, ObjectHeap};
use crate::compilation_unit::CompilationUnit;
use crate::convert::convert_to_ir;
use crate::data_structures::{
  make_register_file, BlockIx, ExprIx, RegisterFile, StmtIx, TypedIxVec,
};
use crate::expression::Expression;
use crate::interface::{CompileError, RegAllocError};
use crate::linear_scan::{allocate_registers, RegAllocResult};
use crate::statement::Statement;
use crate::vars::Vars;

/// Number of registers handed out when the caller does not say otherwise.
pub const DEFAULT_NUM_REGS: usize = 6;

#[derive(Clone, Debug)]
pub struct Options {
  /// Verify every allocation before accepting it.
  pub run_checker: bool,
  pub registers: RegisterFile,
}

impl Default for Options {
  fn default() -> Self {
    Self {
      run_checker: false,
      registers: make_register_file(DEFAULT_NUM_REGS),
    }
  }
}

impl Options {
  pub fn with_registers(num_regs: usize) -> Self {
    Self { registers: make_register_file(num_regs), ..Self::default() }
  }
}

/// The per-method compilation state, guarded by `Method::jit`.
#[derive(Default)]
pub struct JitState {
  compiled: Option<Arc<CompiledMethod>>,
}

impl JitState {
  pub fn compiled(&self) -> Option<&Arc<CompiledMethod>> {
    self.compiled.as_ref()
  }

  pub fn is_compiled(&self) -> bool {
    self.compiled.is_some()
  }
}

/// What is kept of a compilation unit once all passes have run.  It does not
/// point back at its method.
pub struct CompiledMethod {
  pub name: String,
  blocks: TypedIxVec<BlockIx, BasicBlock>,
  exprs: TypedIxVec<ExprIx, Expression>,
  stmts: TypedIxVec<StmtIx, Statement>,
  /// The statement at every instruction position.
  pub positions: Vec<(BlockIx, StmtIx)>,
  pub vars: Vars,
  pub regalloc: RegAllocResult,
  pub objcode: Vec<u8>,
}

impl CompiledMethod {
  fn from_unit(
    cu: CompilationUnit, linear: LinearUnit, regalloc: RegAllocResult,
  ) -> Self {
    debug_assert!(cu.is_compiled);
    Self {
      name: format!("{:?}", cu.method),
      blocks: cu.blocks,
      exprs: cu.exprs,
      stmts: cu.stmts,
      positions: linear.positions,
      vars: cu.vars,
      regalloc,
      objcode: cu.objcode,
    }
  }

  /// Number of blocks, not counting the exit block.
  pub fn nr_blocks(&self) -> u32 {
    self.blocks.len() - 1
  }

  pub fn block(&self, ix: BlockIx) -> &BasicBlock {
    &self.blocks[ix]
  }

  pub fn expr(&self, ix: ExprIx) -> &Expression {
    &self.exprs[ix]
  }

  pub fn stmt(&self, ix: StmtIx) -> &Statement {
    &self.stmts[ix]
  }
}

fn run_passes(
  cu: &mut CompilationUnit, resolver: &dyn ClassResolver,
  heap: &dyn ObjectHeap, options: &Options,
) -> Result<(LinearUnit, RegAllocResult), CompileError> {
  convert_to_ir(cu, resolver, heap)?;
  let linear = linearize(cu);
  run_analysis(&linear, &mut cu.vars)?;
  let regalloc = allocate_registers(&mut cu.vars, &options.registers)?;
  if options.run_checker {
    check(&linear, &cu.vars, &regalloc.edits)
      .map_err(RegAllocError::Checker)?;
  }
  cu.is_compiled = true;
  Ok((linear, regalloc))
}

/// Compiles `method`, or returns the result of its earlier compilation.
///
/// Compilations of one method are serialized by its `jit` lock; different
/// methods compile in parallel.  A failed compilation leaves nothing behind,
/// so a later call starts over.
pub fn compile_method(
  method: &Arc<Method>, resolver: &dyn ClassResolver, heap: &dyn ObjectHeap,
  options: &Options,
) -> Result<Arc<CompiledMethod>, CompileError> {
  // A poisoned lock never holds a half-built result.
  let mut jit = method.jit.lock().unwrap_or_else(|e| e.into_inner());
  if let Some(compiled) = &jit.compiled {
    debug!("{:?}: already compiled", method);
    return Ok(compiled.clone());
  }

  info!("compiling {:?}", method);
  let mut cu = CompilationUnit::new(method.clone());
  let (linear, regalloc) =
    match run_passes(&mut cu, resolver, heap, options) {
      Ok(result) => result,
      Err(err) => {
        info!("compiling {:?} failed: {}", method, err);
        return Err(err);
      }
    };

  let compiled = Arc::new(CompiledMethod::from_unit(cu, linear, regalloc));
  info!(
    "compiled {:?}: {} position(s), {} spill slot(s)",
    method,
    compiled.positions.len(),
    compiled.regalloc.num_spill_slots
  );
  jit.compiled = Some(compiled.clone());
  Ok(compiled)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::bytecode::*;
  use crate::data_structures::VarIx;
  use crate::inst_stream::EditKind;
  use crate::statement::StmtKind;
  use crate::test_vm::TestVm;

  use std::thread;

  /// Loads two array elements into temporaries, then stores them the other
  /// way round, so that the first temporary is live across the second.
  fn two_temporaries() -> Vec<u8> {
    vec![
      OPC_ALOAD_0,
      OPC_ICONST_0,
      OPC_IALOAD,
      OPC_ALOAD_0,
      OPC_ICONST_1,
      OPC_IALOAD,
      OPC_ISTORE_1,
      OPC_ISTORE_2,
      OPC_RETURN,
    ]
  }

  fn checked(num_regs: usize) -> Options {
    Options { run_checker: true, ..Options::with_registers(num_regs) }
  }

  #[test]
  fn compiles_and_allocates() {
    let vm = TestVm::new();
    let method = vm.method_with_code(two_temporaries());
    let compiled = compile_method(&method, &vm, &vm, &checked(2)).unwrap();

    assert_eq!(compiled.nr_blocks(), 1);
    assert_eq!(compiled.positions.len(), 9);
    let (_, last) = compiled.positions[8];
    assert_eq!(compiled.stmt(last).kind, StmtKind::Return { value: None });
    assert_eq!(compiled.vars.num_vars(), 2);
    assert!(compiled.regalloc.edits.is_empty());
    assert_eq!(compiled.regalloc.assignments.len(), 2);
    assert!(method.jit.lock().unwrap().is_compiled());
  }

  #[test]
  fn one_register_spills_the_first_temporary() {
    let vm = TestVm::new();
    let method = vm.method_with_code(two_temporaries());
    let compiled = compile_method(&method, &vm, &vm, &checked(1)).unwrap();

    let edits: Vec<_> = compiled
      .regalloc
      .edits
      .iter()
      .map(|e| (e.at, e.kind, e.var))
      .collect();
    assert_eq!(
      edits,
      vec![
        (5, EditKind::Spill, VarIx::new(0)),
        (7, EditKind::Reload, VarIx::new(0))
      ]
    );
    assert_eq!(compiled.regalloc.num_spill_slots, 1);
  }

  #[test]
  fn results_are_cached() {
    let vm = TestVm::new();
    let method = vm.method_with_code(two_temporaries());
    let options = Options::default();
    let first = compile_method(&method, &vm, &vm, &options).unwrap();
    let second = compile_method(&method, &vm, &vm, &options).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
  }

  #[test]
  fn failures_are_not_cached() {
    let vm = TestVm::new();
    let method =
      vm.method_with_code(vec![OPC_ICONST_1, OPC_ICONST_2, OPC_IADD]);
    for _ in 0..2 {
      match compile_method(&method, &vm, &vm, &Options::default()) {
        Err(CompileError::UnsupportedOpcode { opcode: OPC_IADD, .. }) => {}
        other => panic!("unexpected {:?}", other.err()),
      }
      assert!(!method.jit.lock().unwrap().is_compiled());
    }

    let method = vm.method_with_code(two_temporaries());
    match compile_method(&method, &vm, &vm, &Options::with_registers(0)) {
      Err(CompileError::RegAlloc(RegAllocError::NoRegisters)) => {}
      other => panic!("unexpected {:?}", other.err()),
    }
  }

  #[test]
  fn concurrent_compiles_share_one_result() {
    let vm = Arc::new(TestVm::new());
    let method = vm.method_with_code(two_temporaries());
    let other =
      vm.method_with_code(vec![OPC_ICONST_4, OPC_ISTORE_0, OPC_RETURN]);

    let handles: Vec<_> = (0..8)
      .map(|i| {
        let vm = vm.clone();
        let method = if i % 2 == 0 { method.clone() } else { other.clone() };
        thread::spawn(move || {
          compile_method(&method, &*vm, &*vm, &Options::default()).unwrap()
        })
      })
      .collect();
    let results: Vec<_> =
      handles.into_iter().map(|h| h.join().unwrap()).collect();

    for (i, result) in results.iter().enumerate() {
      assert!(Arc::ptr_eq(result, &results[i % 2]));
    }
    assert!(!Arc::ptr_eq(&results[0], &results[1]));
  }
}
