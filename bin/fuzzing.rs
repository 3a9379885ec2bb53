/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Implements fuzzing primitives for everything.

use arbitrary::{Arbitrary, Result, Unstructured};

use jitcore::bytecode::*;
use jitcore::{Insn, VarIx};

use crate::test_framework::Program;

pub const MAX_VARS: u32 = 16;
pub const MAX_INSNS: u32 = 64;

/// Registers handed to the allocator by the fuzz targets.
pub const NUM_FUZZ_REGS: usize = 4;

struct FuzzingEnv {
  num_vars: u32,
  /// Variables defined so far, in definition order.
  defined: Vec<VarIx>,
}

impl FuzzingEnv {
  fn def_var(&mut self, u: &mut Unstructured) -> Result<VarIx> {
    let var = VarIx::new(u.int_in_range(0..=self.num_vars - 1)?);
    if !self.defined.contains(&var) {
      self.defined.push(var);
    }
    Ok(var)
  }

  fn use_var(&self, u: &mut Unstructured) -> Result<VarIx> {
    debug_assert!(!self.defined.is_empty());
    Ok(*u.choose(&self.defined)?)
  }

  fn vars(
    &mut self, u: &mut Unstructured, max: u32, define: bool,
  ) -> Result<Vec<VarIx>> {
    let mut vars = Vec::new();
    for _ in 0..u.int_in_range(0..=max)? {
      let var = if define { self.def_var(u)? } else { self.use_var(u)? };
      if !vars.contains(&var) {
        vars.push(var);
      }
    }
    Ok(vars)
  }
}

/// Programs only read variables that an earlier instruction defined.
impl<'a> Arbitrary<'a> for Program {
  fn arbitrary(u: &mut Unstructured<'a>) -> Result<Program> {
    let num_vars = u.int_in_range(1..=MAX_VARS)?;
    let num_insns = u.int_in_range(1..=MAX_INSNS)?;
    let mut env = FuzzingEnv { num_vars, defined: Vec::new() };

    let mut prog = Program::new("fuzz");
    for i in 0..num_vars {
      prog.var(&format!("v{}", i));
    }
    for _ in 0..num_insns {
      let used = if env.defined.is_empty() {
        Vec::new()
      } else {
        env.vars(u, 3, false)?
      };
      let defined = env.vars(u, 2, true)?;
      prog.push(defined, used);
    }
    Ok(prog)
  }
}

//=============================================================================
// Bytecode

/// Straight-line bytecode that keeps the operand stack balanced, from the
/// subset of instructions the converter handles.  Optionally ends with a
/// random byte, to exercise the error paths.
#[derive(Clone, Debug)]
pub struct FuzzBytecode {
  pub code: Vec<u8>,
}

impl<'a> Arbitrary<'a> for FuzzBytecode {
  fn arbitrary(u: &mut Unstructured<'a>) -> Result<FuzzBytecode> {
    const NUM_VARIANTS: u8 = 12;

    let num_insns = u.int_in_range(1..=MAX_INSNS)?;
    let mut code = Vec::new();
    let mut depth = 0usize;

    for _ in 0..num_insns {
      // Pushes, pops and rewrites of the top values, as (code, pops, pushes).
      let (bytes, pops, pushes): (Vec<u8>, usize, usize) =
        match u8::arbitrary(u)? % NUM_VARIANTS {
          0 => (vec![OPC_ICONST_0 + u.int_in_range(0..=5)?], 0, 1),
          1 => (vec![OPC_BIPUSH, u8::arbitrary(u)?], 0, 1),
          2 => {
            let v = u16::arbitrary(u)?;
            (vec![OPC_SIPUSH, (v >> 8) as u8, v as u8], 0, 1)
          }
          3 => (vec![OPC_ALOAD_0 + u.int_in_range(0..=3)?], 0, 1),
          4 => (vec![OPC_ILOAD, u8::arbitrary(u)?], 0, 1),
          5 => (vec![OPC_ISTORE_0 + u.int_in_range(0..=3)?], 1, 0),
          6 => (vec![OPC_POP], 1, 0),
          7 => (vec![OPC_DUP], 1, 2),
          8 => (vec![OPC_IALOAD], 2, 1),
          9 => (vec![OPC_IASTORE], 3, 0),
          10 => (vec![OPC_ARRAYLENGTH], 1, 1),
          _ => (vec![OPC_NEWARRAY, 10], 1, 1),
        };
      if pops > depth {
        continue;
      }
      depth = depth - pops + pushes;
      code.extend_from_slice(&bytes);
    }

    if bool::arbitrary(u)? {
      code.push(trailing_byte(u8::arbitrary(u)?));
    } else {
      code.push(OPC_RETURN);
    }
    Ok(FuzzBytecode { code })
  }
}

/// `byte` if it does not decode on its own, `return` otherwise.  A decodable
/// instruction may pop more values than the tracked stack holds, and an
/// underflow is fatal.
pub fn trailing_byte(byte: u8) -> u8 {
  match Insn::decode(&[byte], 0) {
    Err(_) => byte,
    Ok(_) => OPC_RETURN,
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use jitcore::{compile_method, Options, TestVm};

  #[test]
  fn trailing_byte_never_consumes_values() {
    assert_eq!(trailing_byte(OPC_POP), OPC_RETURN);
    assert_eq!(trailing_byte(OPC_POP2), OPC_RETURN);
    assert_eq!(trailing_byte(OPC_ISTORE_0), OPC_RETURN);
    assert_eq!(trailing_byte(OPC_IRETURN), OPC_RETURN);
    assert_eq!(trailing_byte(OPC_IADD), OPC_IADD);
    // A lone prefix or operand-taking opcode is truncated.
    assert_eq!(trailing_byte(OPC_BIPUSH), OPC_BIPUSH);
  }

  #[test]
  fn every_trailing_byte_compiles_or_fails_cleanly() {
    let vm = TestVm::new();
    for byte in 0..=255u8 {
      for prefix in &[vec![], vec![OPC_ICONST_1]] {
        let mut code = prefix.clone();
        code.push(trailing_byte(byte));
        let method = vm.method_with_code(code);
        let _ = compile_method(&method, &vm, &vm, &Options::default());
      }
    }
  }

  #[test]
  fn generated_bytecode_compiles_or_fails_cleanly() {
    let vm = TestVm::new();
    for seed in 0..64u32 {
      let data: Vec<u8> = (0..256u32)
        .map(|i| (i.wrapping_mul(31).wrapping_add(seed * 17) % 251) as u8)
        .collect();
      let mut u = Unstructured::new(&data);
      let bytecode = match FuzzBytecode::arbitrary(&mut u) {
        Ok(bytecode) => bytecode,
        Err(_) => continue,
      };
      let method = vm.method_with_code(bytecode.code);
      let _ = compile_method(&method, &vm, &vm, &Options::default());
    }
  }
}
