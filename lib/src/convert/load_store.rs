/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Constants and local variables.

use log::debug;

use super::Context;
use crate::class_model::{ClassId, Constant, ObjectRef, ResolvedField};
use crate::data_structures::VmType;
use crate::expression::ExprKind;
use crate::interface::CompileError;
use crate::statement::StmtKind;

pub(super) fn convert_const(ctx: &mut Context, vm_type: VmType, value: i64) {
  ctx.push_expr(ExprKind::Value { vm_type, value: value as u64 });
}

pub(super) fn convert_store(ctx: &mut Context, vm_type: VmType, index: u16) {
  let src = ctx.pop();
  let dest = ctx.expr(ExprKind::Local { vm_type, index });
  ctx.stmt(StmtKind::Store { dest, src });
}

pub(super) fn convert_ldc(
  ctx: &mut Context, index: u16,
) -> Result<(), CompileError> {
  let class = ctx.cu.method.class.clone();
  let kind = match class.constant_pool.get(index)? {
    Constant::Integer(bits) => ExprKind::Value {
      vm_type: VmType::Int,
      value: *bits as i32 as i64 as u64,
    },
    Constant::Float(bits) => ExprKind::FValue {
      vm_type: VmType::Float,
      value: f32::from_bits(*bits) as f64,
    },
    Constant::Long { high, low } => ExprKind::Value {
      vm_type: VmType::Long,
      value: (*high as u64) << 32 | *low as u64,
    },
    Constant::Double { high, low } => ExprKind::FValue {
      vm_type: VmType::Double,
      value: f64::from_bits((*high as u64) << 32 | *low as u64),
    },
    Constant::String { string_index } => {
      let bytes = class.constant_pool.utf8(*string_index)?;
      let string = materialize_string(ctx, bytes)?;
      ExprKind::Value { vm_type: VmType::Reference, value: string.0 }
    }
    other => {
      return Err(CompileError::UnexpectedConstant { index, tag: other.tag() })
    }
  };
  ctx.push_expr(kind);
  Ok(())
}

fn string_field(
  ctx: &Context, class: ClassId, name: &str, descriptor: &str,
) -> Result<ResolvedField, CompileError> {
  ctx.resolver.lookup_field(class, name, descriptor).ok_or_else(|| {
    CompileError::UnresolvedField {
      class: "java/lang/String".to_string(),
      name: name.to_string(),
    }
  })
}

/// Builds the string object for a string constant: a char array holding the
/// decoded text, wrapped in a `java/lang/String`.
fn materialize_string(
  ctx: &mut Context, bytes: &[u8],
) -> Result<ObjectRef, CompileError> {
  let chars = utf8_to_utf16(bytes)?;
  let array =
    ctx.heap.alloc_char_array(&chars).ok_or(CompileError::OutOfMemory)?;
  let count = ctx.heap.array_length(array).unwrap_or(chars.len() as u32);

  let string_class = ctx.resolver.load_class("java/lang/String")?;
  let offset_field = string_field(ctx, string_class, "offset", "I")?;
  let count_field = string_field(ctx, string_class, "count", "I")?;
  let value_field = string_field(ctx, string_class, "value", "[C")?;

  let string =
    ctx.heap.alloc_object(string_class).ok_or(CompileError::OutOfMemory)?;
  ctx.heap.store_int_field(string, &offset_field, 0);
  ctx.heap.store_int_field(string, &count_field, count as i32);
  ctx.heap.store_ref_field(string, &value_field, array);

  debug!(
    "string constant of {} char(s) at offset {}: {:?}",
    count, ctx.offset, string
  );
  Ok(string)
}

/// Decodes modified UTF-8 into UTF-16 code units.
///
/// One, two and three byte forms are accepted.  A sequence cut short by the
/// end of the input fails at its lead byte; a bad continuation byte fails at
/// that byte.
pub fn utf8_to_utf16(bytes: &[u8]) -> Result<Vec<u16>, CompileError> {
  let continuation = |i: usize| -> Result<u16, CompileError> {
    match bytes.get(i) {
      Some(&b) if b & 0xc0 == 0x80 => Ok((b & 0x3f) as u16),
      _ => Err(CompileError::MalformedUtf8 { offset: i }),
    }
  };

  let mut out = Vec::with_capacity(bytes.len());
  let mut i = 0;
  while i < bytes.len() {
    let lead = bytes[i];
    if lead & 0x80 == 0 {
      out.push(lead as u16);
      i += 1;
    } else if lead & 0xe0 == 0xc0 {
      if i + 1 >= bytes.len() {
        return Err(CompileError::MalformedUtf8 { offset: i });
      }
      out.push(((lead & 0x1f) as u16) << 6 | continuation(i + 1)?);
      i += 2;
    } else if lead & 0xf0 == 0xe0 {
      if i + 2 >= bytes.len() {
        return Err(CompileError::MalformedUtf8 { offset: i });
      }
      out.push(
        ((lead & 0x0f) as u16) << 12
          | continuation(i + 1)? << 6
          | continuation(i + 2)?,
      );
      i += 3;
    } else {
      return Err(CompileError::MalformedUtf8 { offset: i });
    }
  }
  Ok(out)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::bytecode::*;
  use crate::compilation_unit::CompilationUnit;
  use crate::convert::convert_to_ir;
  use crate::test_vm::TestVm;

  #[test]
  fn two_byte_sequence() {
    assert_eq!(utf8_to_utf16(b"A\xC3\xA9").unwrap(), vec![0x0041, 0x00e9]);
  }

  #[test]
  fn truncated_sequences_fail() {
    match utf8_to_utf16(b"A\xC3") {
      Err(CompileError::MalformedUtf8 { offset: 1 }) => {}
      other => panic!("unexpected {:?}", other),
    }
    assert!(utf8_to_utf16(b"\xE2\x82").is_err());
  }

  #[test]
  fn bad_continuation_fails_at_that_byte() {
    match utf8_to_utf16(b"\xE2\x41\xAC") {
      Err(CompileError::MalformedUtf8 { offset: 1 }) => {}
      other => panic!("unexpected {:?}", other),
    }
    assert!(utf8_to_utf16(b"\xFF").is_err());
  }

  #[test]
  fn three_byte_and_encoded_nul() {
    assert_eq!(utf8_to_utf16(b"\xE2\x82\xAC").unwrap(), vec![0x20ac]);
    assert_eq!(utf8_to_utf16(b"\xC0\x80").unwrap(), vec![0]);
    assert!(utf8_to_utf16(b"").unwrap().is_empty());
  }

  fn ldc_kind(vm: &TestVm, index: u16) -> Result<ExprKind, CompileError> {
    let code = vec![OPC_LDC_W, (index >> 8) as u8, index as u8];
    let method = vm.method_with_code(code);
    let mut cu = CompilationUnit::new(method);
    convert_to_ir(&mut cu, vm, vm)?;
    let b0 = cu.find_block(0).unwrap();
    let top = cu.block(b0).mimic_stack.peek().unwrap();
    Ok(cu.expr(top).kind.clone())
  }

  #[test]
  fn ldc_numeric_constants() {
    let vm = TestVm::new();
    let i = vm.add_constant(|cp| cp.add_integer(-5));
    let f = vm.add_constant(|cp| cp.add_float(1.5));
    let l = vm.add_constant(|cp| cp.add_long(0x1_0000_0002));
    let d = vm.add_constant(|cp| cp.add_double(-0.25));
    assert_eq!(
      ldc_kind(&vm, i).unwrap(),
      ExprKind::Value { vm_type: VmType::Int, value: -5i64 as u64 }
    );
    assert_eq!(
      ldc_kind(&vm, f).unwrap(),
      ExprKind::FValue { vm_type: VmType::Float, value: 1.5 }
    );
    assert_eq!(
      ldc_kind(&vm, l).unwrap(),
      ExprKind::Value { vm_type: VmType::Long, value: 0x1_0000_0002 }
    );
    assert_eq!(
      ldc_kind(&vm, d).unwrap(),
      ExprKind::FValue { vm_type: VmType::Double, value: -0.25 }
    );
  }

  #[test]
  fn ldc_string_builds_a_string_object() {
    let vm = TestVm::new();
    let s = vm.add_constant(|cp| cp.add_string("h\u{e9}!"));
    match ldc_kind(&vm, s).unwrap() {
      ExprKind::Value { vm_type: VmType::Reference, value } => {
        assert_eq!(vm.string_value(ObjectRef(value)), Some("h\u{e9}!".into()));
      }
      other => panic!("unexpected {:?}", other),
    }
  }

  #[test]
  fn ldc_rejects_bad_indices_and_tags() {
    let vm = TestVm::new();
    match ldc_kind(&vm, 999) {
      Err(CompileError::InvalidConstantIndex(999)) => {}
      other => panic!("unexpected {:?}", other),
    }
    let c = vm.add_constant(|cp| cp.add_class("Foo"));
    match ldc_kind(&vm, c) {
      Err(CompileError::UnexpectedConstant { .. }) => {}
      other => panic!("unexpected {:?}", other),
    }
  }

  #[test]
  fn ldc_string_out_of_memory() {
    let vm = TestVm::new();
    let s = vm.add_constant(|cp| cp.add_string("abc"));
    vm.set_heap_limit(Some(0));
    match ldc_kind(&vm, s) {
      Err(CompileError::OutOfMemory) => {}
      other => panic!("unexpected {:?}", other),
    }
  }
}
