/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Arrays, object allocation, fields and calls.

use super::{convert_args, convert_native_args, Context, InvokeKind};
use crate::data_structures::{ArrayElemType, ExprIx, VmType};
use crate::expression::ExprKind;
use crate::interface::CompileError;
use crate::statement::StmtKind;

//=============================================================================
// Array access.  The null check comes first, then the bounds check, then the
// access itself.

fn array_deref(
  ctx: &mut Context, vm_type: VmType, arrayref: ExprIx, index: ExprIx,
) -> ExprIx {
  let deref = ctx.expr(ExprKind::ArrayDeref { vm_type, arrayref, index });
  ctx.stmt(StmtKind::NullCheck { reference: arrayref });
  ctx.stmt(StmtKind::ArrayCheck { deref });
  deref
}

pub(super) fn convert_array_load(ctx: &mut Context, vm_type: VmType) {
  let index = ctx.pop();
  let arrayref = ctx.pop();
  let deref = array_deref(ctx, vm_type, arrayref, index);
  ctx.push_temporary(vm_type, deref);
}

pub(super) fn convert_array_store(ctx: &mut Context, vm_type: VmType) {
  let value = ctx.pop();
  let index = ctx.pop();
  let arrayref = ctx.pop();
  let deref = array_deref(ctx, vm_type, arrayref, index);
  ctx.stmt(StmtKind::Store { dest: deref, src: value });
}

//=============================================================================
// Allocation

pub(super) fn convert_new(
  ctx: &mut Context, index: u16,
) -> Result<(), CompileError> {
  let class = ctx.resolver.resolve_class(&ctx.cu.method.class, index)?;
  ctx.push_expr(ExprKind::New { class });
  Ok(())
}

pub(super) fn convert_newarray(
  ctx: &mut Context, atype: u8,
) -> Result<(), CompileError> {
  let elem_type = ArrayElemType::from_tag(atype)
    .ok_or(CompileError::InvalidArrayType(atype))?;
  let size = ctx.pop();
  ctx.push_expr(ExprKind::NewArray { size, elem_type });
  Ok(())
}

pub(super) fn convert_anewarray(
  ctx: &mut Context, index: u16,
) -> Result<(), CompileError> {
  let class = ctx.resolver.resolve_class(&ctx.cu.method.class, index)?;
  let size = ctx.pop();
  ctx.push_expr(ExprKind::ANewArray { size, class });
  Ok(())
}

pub(super) fn convert_multianewarray(
  ctx: &mut Context, index: u16, dimensions: u8,
) -> Result<(), CompileError> {
  let class = ctx.resolver.resolve_class(&ctx.cu.method.class, index)?;
  let dimensions =
    convert_native_args(ctx.cu, ctx.block, dimensions as usize);
  ctx.push_expr(ExprKind::MultiANewArray { class, dimensions });
  Ok(())
}

//=============================================================================
// Fields

pub(super) fn convert_getstatic(
  ctx: &mut Context, index: u16,
) -> Result<(), CompileError> {
  let field = ctx.resolver.resolve_field(&ctx.cu.method.class, index)?;
  ctx.push_expr(ExprKind::ClassField { vm_type: field.vm_type, field });
  Ok(())
}

pub(super) fn convert_putstatic(
  ctx: &mut Context, index: u16,
) -> Result<(), CompileError> {
  let field = ctx.resolver.resolve_field(&ctx.cu.method.class, index)?;
  let src = ctx.pop();
  let dest = ctx.expr(ExprKind::ClassField { vm_type: field.vm_type, field });
  ctx.stmt(StmtKind::Store { dest, src });
  Ok(())
}

pub(super) fn convert_getfield(
  ctx: &mut Context, index: u16,
) -> Result<(), CompileError> {
  let field = ctx.resolver.resolve_field(&ctx.cu.method.class, index)?;
  let objectref = ctx.pop();
  ctx.push_expr(ExprKind::InstanceField {
    vm_type: field.vm_type,
    field,
    objectref,
  });
  Ok(())
}

pub(super) fn convert_putfield(
  ctx: &mut Context, index: u16,
) -> Result<(), CompileError> {
  let field = ctx.resolver.resolve_field(&ctx.cu.method.class, index)?;
  let src = ctx.pop();
  let objectref = ctx.pop();
  let dest = ctx.expr(ExprKind::InstanceField {
    vm_type: field.vm_type,
    field,
    objectref,
  });
  ctx.stmt(StmtKind::Store { dest, src });
  Ok(())
}

//=============================================================================
// Calls

pub(super) fn convert_invoke(
  ctx: &mut Context, kind: InvokeKind, index: u16,
) -> Result<(), CompileError> {
  let method = ctx.resolver.resolve_method(&ctx.cu.method.class, index)?;
  if (kind == InvokeKind::Static) != method.is_static {
    return Err(CompileError::UnresolvedMethod {
      class: format!("{:?}", method.class),
      name: method.name,
    });
  }

  let nr_args = method.args_count();
  let args = if method.is_native {
    convert_native_args(ctx.cu, ctx.block, nr_args)
  } else {
    convert_args(ctx.cu, ctx.block, nr_args, &method)
  };

  let vm_type = method.return_type();
  let call =
    ctx.expr(ExprKind::Invoke { method: Box::new(method), args, vm_type });
  if vm_type == VmType::Void {
    ctx.stmt(StmtKind::Expression { expr: call });
  } else {
    ctx.push_temporary(vm_type, call);
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use crate::bytecode::*;
  use crate::compilation_unit::CompilationUnit;
  use crate::convert::convert_to_ir;
  use crate::data_structures::{ArrayElemType, BlockIx, VmType};
  use crate::expression::ExprKind;
  use crate::interface::CompileError;
  use crate::statement::StmtKind;
  use crate::test_vm::TestVm;

  fn convert(
    vm: &TestVm, code: Vec<u8>,
  ) -> Result<(CompilationUnit, BlockIx), CompileError> {
    let mut cu = CompilationUnit::new(vm.method_with_code(code));
    convert_to_ir(&mut cu, vm, vm)?;
    let b0 = cu.find_block(0).unwrap();
    Ok((cu, b0))
  }

  fn stmt_kinds(cu: &CompilationUnit, block: BlockIx) -> Vec<StmtKind> {
    cu.block(block).stmts.iter().map(|&s| cu.stmt(s).kind.clone()).collect()
  }

  fn check_array_access_order(cu: &CompilationUnit, block: BlockIx) {
    let kinds = stmt_kinds(cu, block);
    assert_eq!(kinds.len(), 3);
    let arrayref = match kinds[0] {
      StmtKind::NullCheck { reference } => reference,
      ref other => panic!("expected a null check, got {:?}", other),
    };
    let deref = match kinds[1] {
      StmtKind::ArrayCheck { deref } => deref,
      ref other => panic!("expected a bounds check, got {:?}", other),
    };
    match cu.expr(deref).kind {
      ExprKind::ArrayDeref { arrayref: a, .. } => assert_eq!(a, arrayref),
      ref other => panic!("unexpected {:?}", other),
    }
    match kinds[2] {
      StmtKind::Store { dest, src } => assert!(dest == deref || src == deref),
      ref other => panic!("expected the access, got {:?}", other),
    }
  }

  #[test]
  fn array_loads_check_then_access() {
    let loads = [
      (OPC_IALOAD, VmType::Int),
      (OPC_LALOAD, VmType::Long),
      (OPC_FALOAD, VmType::Float),
      (OPC_DALOAD, VmType::Double),
      (OPC_AALOAD, VmType::Reference),
      (OPC_BALOAD, VmType::Int),
      (OPC_CALOAD, VmType::Char),
      (OPC_SALOAD, VmType::Short),
    ];
    for &(opc, vm_type) in loads.iter() {
      let vm = TestVm::new();
      let code = vec![OPC_ALOAD_0, OPC_ICONST_1, opc];
      let (cu, b0) = convert(&vm, code).unwrap();
      check_array_access_order(&cu, b0);
      let top = cu.block(b0).mimic_stack.peek().unwrap();
      assert_eq!(cu.block(b0).mimic_stack.len(), 1);
      match cu.expr(top).kind {
        ExprKind::Temporary { vm_type: t, .. } => assert_eq!(t, vm_type),
        ref other => panic!("unexpected {:?}", other),
      }
      assert_eq!(cu.vars.num_vars(), 1);
    }
  }

  #[test]
  fn array_stores_check_then_access() {
    for &opc in [OPC_IASTORE, OPC_BASTORE, OPC_CASTORE, OPC_AASTORE].iter() {
      let vm = TestVm::new();
      let code = vec![OPC_ALOAD_0, OPC_ICONST_1, OPC_ICONST_2, opc];
      let (cu, b0) = convert(&vm, code).unwrap();
      check_array_access_order(&cu, b0);
      assert!(cu.block(b0).mimic_stack.is_empty());
    }
  }

  #[test]
  fn newarray_and_arraylength() {
    let vm = TestVm::new();
    let code = vec![OPC_BIPUSH, 10, OPC_NEWARRAY, 10, OPC_ARRAYLENGTH];
    let (cu, b0) = convert(&vm, code).unwrap();
    assert!(cu.block(b0).stmts.is_empty());
    let top = cu.block(b0).mimic_stack.peek().unwrap();
    let arrayref = match cu.expr(top).kind {
      ExprKind::ArrayLength { arrayref } => arrayref,
      ref other => panic!("unexpected {:?}", other),
    };
    match cu.expr(arrayref).kind {
      ExprKind::NewArray { elem_type: ArrayElemType::Int, .. } => {}
      ref other => panic!("unexpected {:?}", other),
    }

    match convert(&vm, vec![OPC_ICONST_1, OPC_NEWARRAY, 3]) {
      Err(CompileError::InvalidArrayType(3)) => {}
      other => panic!("unexpected {:?}", other.err()),
    }
  }

  #[test]
  fn new_and_anewarray_resolve_classes() {
    let vm = TestVm::new();
    let foo = vm.define_class("Foo");
    let idx = vm.add_constant(|cp| cp.add_class("Foo"));
    let code =
      vec![OPC_NEW, 0, idx as u8, OPC_ICONST_2, OPC_ANEWARRAY, 0, idx as u8];
    let (cu, b0) = convert(&vm, code).unwrap();
    let values = cu.block(b0).mimic_stack.values().to_vec();
    assert_eq!(cu.expr(values[0]).kind, ExprKind::New { class: foo });
    match cu.expr(values[1]).kind {
      ExprKind::ANewArray { class, .. } => assert_eq!(class, foo),
      ref other => panic!("unexpected {:?}", other),
    }

    let missing = vm.add_constant(|cp| cp.add_class("Missing"));
    match convert(&vm, vec![OPC_NEW, 0, missing as u8]) {
      Err(CompileError::UnresolvedClass(name)) => assert_eq!(name, "Missing"),
      other => panic!("unexpected {:?}", other.err()),
    }
  }

  #[test]
  fn multianewarray_keeps_declaration_order() {
    let vm = TestVm::new();
    let class = vm.define_class("[[I");
    let idx = vm.add_constant(|cp| cp.add_class("[[I"));
    let code =
      vec![OPC_ICONST_2, OPC_ICONST_3, OPC_MULTIANEWARRAY, 0, idx as u8, 2];
    let (cu, b0) = convert(&vm, code).unwrap();
    assert_eq!(cu.block(b0).mimic_stack.len(), 1);
    let top = cu.block(b0).mimic_stack.peek().unwrap();
    let dims = match cu.expr(top).kind {
      ExprKind::MultiANewArray { class: c, dimensions } => {
        assert_eq!(c, class);
        dimensions
      }
      ref other => panic!("unexpected {:?}", other),
    };
    let args = match cu.expr(dims).kind {
      ExprKind::ArgsList { ref args } => args.clone(),
      ref other => panic!("unexpected {:?}", other),
    };
    let sizes: Vec<ExprKind> = args
      .iter()
      .map(|&a| match cu.expr(a).kind {
        ExprKind::Arg { value, .. } => cu.expr(value).kind.clone(),
        ref other => panic!("unexpected {:?}", other),
      })
      .collect();
    assert_eq!(
      sizes,
      vec![
        ExprKind::Value { vm_type: VmType::Int, value: 2 },
        ExprKind::Value { vm_type: VmType::Int, value: 3 },
      ]
    );
  }

  #[test]
  fn field_access() {
    let vm = TestVm::new();
    let foo = vm.define_class("Foo");
    vm.define_field(foo, "counter", "J", true);
    vm.define_field(foo, "next", "LFoo;", false);
    let counter =
      vm.add_constant(|cp| cp.add_field_ref("Foo", "counter", "J"));
    let next = vm.add_constant(|cp| cp.add_field_ref("Foo", "next", "LFoo;"));

    // getstatic counter; putstatic counter; aload_0; aload_0; getfield next;
    // putfield next
    let code = vec![
      OPC_GETSTATIC,
      0,
      counter as u8,
      OPC_PUTSTATIC,
      0,
      counter as u8,
      OPC_ALOAD_0,
      OPC_ALOAD_0,
      OPC_GETFIELD,
      0,
      next as u8,
      OPC_PUTFIELD,
      0,
      next as u8,
    ];
    let (cu, b0) = convert(&vm, code).unwrap();
    assert!(cu.block(b0).mimic_stack.is_empty());
    let kinds = stmt_kinds(&cu, b0);
    assert_eq!(kinds.len(), 2);
    match kinds[0] {
      StmtKind::Store { dest, src } => {
        match cu.expr(dest).kind {
          ExprKind::ClassField { vm_type: VmType::Long, ref field } => {
            assert_eq!(field.name, "counter");
            assert!(field.is_static);
          }
          ref other => panic!("unexpected {:?}", other),
        }
        assert_eq!(cu.expr(src).vm_type(), VmType::Long);
      }
      ref other => panic!("unexpected {:?}", other),
    }
    match kinds[1] {
      StmtKind::Store { dest, src } => {
        match cu.expr(dest).kind {
          ExprKind::InstanceField { objectref, .. } => assert_eq!(
            cu.expr(objectref).kind,
            ExprKind::Local { vm_type: VmType::Reference, index: 0 }
          ),
          ref other => panic!("unexpected {:?}", other),
        }
        match cu.expr(src).kind {
          ExprKind::InstanceField { vm_type: VmType::Reference, .. } => {}
          ref other => panic!("unexpected {:?}", other),
        }
      }
      ref other => panic!("unexpected {:?}", other),
    }

    let missing = vm.add_constant(|cp| cp.add_field_ref("Foo", "nope", "I"));
    match convert(&vm, vec![OPC_GETSTATIC, 0, missing as u8]) {
      Err(CompileError::UnresolvedField { .. }) => {}
      other => panic!("unexpected {:?}", other.err()),
    }
  }

  #[test]
  fn calls() {
    let vm = TestVm::new();
    let foo = vm.define_class("Foo");
    vm.define_method(foo, "sum", "(II)I", true, false);
    vm.define_method(foo, "run", "()V", false, false);
    let sum = vm.add_constant(|cp| cp.add_method_ref("Foo", "sum", "(II)I"));
    let run = vm.add_constant(|cp| cp.add_method_ref("Foo", "run", "()V"));

    let code = vec![
      OPC_ICONST_1,
      OPC_ICONST_2,
      OPC_INVOKESTATIC,
      0,
      sum as u8,
      OPC_ALOAD_0,
      OPC_INVOKEVIRTUAL,
      0,
      run as u8,
    ];
    let (cu, b0) = convert(&vm, code).unwrap();
    let kinds = stmt_kinds(&cu, b0);
    assert_eq!(kinds.len(), 2);

    // The int result is stored into a temporary which stays on the stack.
    assert_eq!(cu.block(b0).mimic_stack.len(), 1);
    match kinds[0] {
      StmtKind::Store { dest, src } => {
        assert!(cu.expr(dest).kind.temporary().is_some());
        match cu.expr(src).kind {
          ExprKind::Invoke { vm_type: VmType::Int, .. } => {}
          ref other => panic!("unexpected {:?}", other),
        }
      }
      ref other => panic!("unexpected {:?}", other),
    }
    match kinds[1] {
      StmtKind::Expression { expr } => match cu.expr(expr).kind {
        ExprKind::Invoke { vm_type: VmType::Void, args, .. } => {
          match cu.expr(args).kind {
            ExprKind::ArgsList { ref args } => {
              assert_eq!(args.len(), 1);
              match cu.expr(args[0]).kind {
                ExprKind::ArgThis { .. } => {}
                ref other => panic!("unexpected {:?}", other),
              }
            }
            ref other => panic!("unexpected {:?}", other),
          }
        }
        ref other => panic!("unexpected {:?}", other),
      },
      ref other => panic!("unexpected {:?}", other),
    }
  }
}
