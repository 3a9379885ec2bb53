/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

/// Test cases.  The list of them is right at the bottom, function
/// |find_case|.  Add new ones there.
use jitcore::bytecode::*;
use jitcore::TestVm;

use crate::parser;
use crate::test_framework::*;

//=============================================================================
// Interval programs

fn program(name: &str, source: &str) -> TestCase {
  match parser::parse_content(name, source) {
    Ok(prog) => TestCase::Program(prog),
    Err(err) => panic!("test case {} does not parse: {}", name, err),
  }
}

/// Three variables read by one instruction.
fn test_straight_line() -> TestCase {
  program(
    "straight_line",
    "
    a =
    b = a
    c = a b
    = c
    ",
  )
}

/// x is live across y, so that one register is enough only with a spill.
fn test_simple_spill() -> TestCase {
  program(
    "simple_spill",
    "
    x =
    y =
    = y
    = x
    ",
  )
}

/// Values are consumed out of order, three at a time.
fn test_pressure() -> TestCase {
  program(
    "pressure",
    "
    a =
    b =
    c =
    d = a
    e = b c
    = d e
    ",
  )
}

/// A loop body, unrolled once.
fn test_chain() -> TestCase {
  program(
    "chain",
    "
    i =         # induction variable
    n =         # bound
    s = i
    t = s n
    i = t
    u = i n
    s = u
    = s n
    ",
  )
}

//=============================================================================
// Bytecode methods

fn method(name: &str, build: fn(&TestVm) -> Vec<u8>) -> TestCase {
  TestCase::Method(MethodCase { name: name.to_string(), build })
}

/// Two array elements stored into locals in reverse order.
fn test_array_swap() -> TestCase {
  method("array_swap", |_| {
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
  })
}

fn test_string_const() -> TestCase {
  method("string_const", |vm| {
    let s = vm.add_constant(|cp| cp.add_string("h\u{e9}llo"));
    vec![OPC_LDC_W, (s >> 8) as u8, s as u8, OPC_ASTORE_0, OPC_RETURN]
  })
}

/// Two call results, consumed in reverse order.
fn test_static_calls() -> TestCase {
  method("static_calls", |vm| {
    let foo = vm.define_class("Foo");
    vm.define_method(foo, "sum", "(II)I", true, false);
    let sum = vm.add_constant(|cp| cp.add_method_ref("Foo", "sum", "(II)I"));
    vec![
      OPC_ICONST_1,
      OPC_ICONST_2,
      OPC_INVOKESTATIC,
      (sum >> 8) as u8,
      sum as u8,
      OPC_ICONST_3,
      OPC_ICONST_4,
      OPC_INVOKESTATIC,
      (sum >> 8) as u8,
      sum as u8,
      OPC_ISTORE_0,
      OPC_ISTORE_1,
      OPC_RETURN,
    ]
  })
}

fn test_objects() -> TestCase {
  method("objects", |vm| {
    let foo = vm.define_class("Foo");
    vm.define_field(foo, "size", "I", true);
    vm.define_field(foo, "items", "[I", false);
    let class = vm.add_constant(|cp| cp.add_class("Foo"));
    let size = vm.add_constant(|cp| cp.add_field_ref("Foo", "size", "I"));
    let items = vm.add_constant(|cp| cp.add_field_ref("Foo", "items", "[I"));
    vec![
      // Foo obj = new Foo; obj.items = new int[Foo.size];
      OPC_NEW,
      (class >> 8) as u8,
      class as u8,
      OPC_ASTORE_0,
      OPC_ALOAD_0,
      OPC_GETSTATIC,
      (size >> 8) as u8,
      size as u8,
      OPC_NEWARRAY,
      10,
      OPC_PUTFIELD,
      (items >> 8) as u8,
      items as u8,
      // Foo.size = obj.items.length;
      OPC_ALOAD_0,
      OPC_GETFIELD,
      (items >> 8) as u8,
      items as u8,
      OPC_ARRAYLENGTH,
      OPC_PUTSTATIC,
      (size >> 8) as u8,
      size as u8,
      OPC_RETURN,
    ]
  })
}

/// The test cases, by name.  On failure, returns the names of all cases.
pub fn find_case(name: &str) -> Result<TestCase, Vec<String>> {
  // This is really stupid.  Fortunately it's not performance critical :)
  let all_cases = vec![
    test_straight_line(),
    test_simple_spill(),
    test_pressure(),
    test_chain(),
    test_array_swap(),
    test_string_const(),
    test_static_calls(),
    test_objects(),
  ];

  let all_names = all_cases.iter().map(|c| c.name().to_string()).collect();
  for case in all_cases {
    if case.name() == name {
      return Ok(case);
    }
  }
  Err(all_names)
}

pub fn all_case_names() -> Vec<String> {
  match find_case("") {
    Ok(case) => vec![case.name().to_string()],
    Err(names) => names,
  }
}
