/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! The test framework of the jitc tools: interval programs (straight-line
//! sequences of variable defs and uses, fed to the allocator directly),
//! bytecode test methods (fed to the whole compile pipeline), and drivers
//! running both.

use std::fmt::{self, Write};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;

use jitcore::{
  allocate_registers, check, compile_method, make_register_file,
  run_analysis, CompiledMethod, InsnSource, InstVarUses, Location, Options,
  RegAllocError, RegAllocResult, RegisterFile, TestVm, VarIx, Vars, VmType,
};
use log::info;
use rustc_hash::FxHashMap;
use serde::Serialize;

//=============================================================================
// Interval programs

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProgInsn {
  pub defined: Vec<VarIx>,
  pub used: Vec<VarIx>,
}

/// A straight-line program over integer variables.  Every instruction is
/// one position.
#[derive(Clone, Debug, Default)]
pub struct Program {
  pub name: String,
  pub var_names: Vec<String>,
  var_index: FxHashMap<String, VarIx>,
  pub insns: Vec<ProgInsn>,
}

impl Program {
  pub fn new(name: &str) -> Self {
    Self { name: name.to_string(), ..Self::default() }
  }

  /// The variable called `name`, created on first mention.
  pub fn var(&mut self, name: &str) -> VarIx {
    if let Some(&var) = self.var_index.get(name) {
      return var;
    }
    let var = VarIx::new(self.var_names.len() as u32);
    self.var_names.push(name.to_string());
    self.var_index.insert(name.to_string(), var);
    var
  }

  pub fn push(&mut self, defined: Vec<VarIx>, used: Vec<VarIx>) {
    self.insns.push(ProgInsn { defined, used });
  }

  pub fn num_vars(&self) -> u32 {
    self.var_names.len() as u32
  }

  fn var_name(&self, var: VarIx) -> &str {
    self
      .var_names
      .get(var.get() as usize)
      .map(|s| s.as_str())
      .unwrap_or("?")
  }

  pub fn render(&self, title: &str, out: &mut String) -> fmt::Result {
    writeln!(out, "{} {}", title, self.name)?;
    for (pos, insn) in self.insns.iter().enumerate() {
      let names = |vars: &[VarIx]| {
        vars.iter().map(|&v| self.var_name(v)).collect::<Vec<_>>().join(" ")
      };
      writeln!(
        out,
        "  {:>4}  {} = {}",
        pos,
        names(&insn.defined),
        names(&insn.used)
      )?;
    }
    Ok(())
  }

  pub fn print(&self, title: &str) {
    let mut rendered = String::new();
    if self.render(title, &mut rendered).is_ok() {
      println!("{}", rendered);
    }
  }
}

impl InsnSource for Program {
  fn num_insns(&self) -> u32 {
    self.insns.len() as u32
  }

  fn var_uses(&self, pos: u32) -> InstVarUses {
    let insn = &self.insns[pos as usize];
    InstVarUses {
      used: insn.used.iter().cloned().collect(),
      defined: insn.defined.iter().cloned().collect(),
    }
  }
}

/// The allocation of an interval program.
pub struct Allocation {
  pub vars: Vars,
  pub result: RegAllocResult,
}

pub fn run_program(
  prog: &Program, reg_file: &RegisterFile, run_checker: bool,
) -> Result<Allocation, String> {
  let mut vars = Vars::new();
  for _ in 0..prog.num_vars() {
    vars.new_var(VmType::Int);
  }
  run_analysis(prog, &mut vars).map_err(|err| err.to_string())?;
  let result =
    allocate_registers(&mut vars, reg_file).map_err(|err| err.to_string())?;
  if run_checker {
    check(prog, &vars, &result.edits)
      .map_err(|errors| RegAllocError::Checker(errors).to_string())?;
  }
  info!(
    "{}: {} interval(s), {} edit(s)",
    prog.name,
    result.assignments.len(),
    result.edits.len()
  );
  Ok(Allocation { vars, result })
}

//=============================================================================
// Bytecode methods

/// A method of the test class.  `build` sets up the classes and constants
/// the code refers to, and returns the code.
#[derive(Clone)]
pub struct MethodCase {
  pub name: String,
  pub build: fn(&TestVm) -> Vec<u8>,
}

pub fn run_method(
  case: &MethodCase, reg_file: &RegisterFile, run_checker: bool,
) -> Result<Arc<CompiledMethod>, String> {
  let vm = TestVm::new();
  let method = vm.method_with_code((case.build)(&vm));
  let options = Options { run_checker, registers: reg_file.clone() };
  compile_method(&method, &vm, &vm, &options).map_err(|err| err.to_string())
}

//=============================================================================
// Test cases

pub enum TestCase {
  Program(Program),
  Method(MethodCase),
}

impl TestCase {
  pub fn name(&self) -> &str {
    match self {
      TestCase::Program(prog) => &prog.name,
      TestCase::Method(case) => &case.name,
    }
  }

  pub fn print(&self) {
    match self {
      TestCase::Program(prog) => prog.print("program"),
      TestCase::Method(case) => {
        let vm = TestVm::new();
        println!("method {}: {:02x?}", case.name, (case.build)(&vm));
      }
    }
  }
}

pub fn run_case(
  case: &TestCase, num_regs: usize, run_checker: bool,
) -> Result<RegAllocResult, String> {
  let reg_file = make_register_file(num_regs);
  match case {
    TestCase::Program(prog) => {
      run_program(prog, &reg_file, run_checker).map(|alloc| alloc.result)
    }
    TestCase::Method(method) => run_method(method, &reg_file, run_checker)
      .map(|compiled| compiled.regalloc.clone()),
  }
}

//=============================================================================
// Output

pub fn print_result(result: &RegAllocResult, reg_file: &RegisterFile) {
  println!("assignments:");
  for a in &result.assignments {
    let location = match a.location {
      Location::Reg(reg) => reg_file.name(reg).to_string(),
      Location::Stack(slot) => format!("{:?}", slot),
    };
    let mut flags = String::new();
    if a.need_reload {
      flags.push_str(" reload");
    }
    if a.need_spill {
      flags.push_str(" spill");
    }
    println!(
      "  {:?} {:?} {:?} -> {}{}",
      a.interval, a.var, a.range, location, flags
    );
  }
  println!("edits:");
  for edit in &result.edits {
    println!("  {:?}", edit);
  }
  println!("spill slots: {}", result.num_spill_slots);
}

/// Writes `value` to `path` in bincode form.
pub fn dump<T: Serialize>(value: &T, path: &Path) -> Result<(), String> {
  let file = File::create(path).map_err(|err| err.to_string())?;
  bincode::serialize_into(BufWriter::new(file), value)
    .map_err(|err| err.to_string())
}

pub fn dump_result(result: &RegAllocResult, path: &Path) -> Result<(), String> {
  dump(result, path)
}
