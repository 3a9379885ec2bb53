/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Checker: verifies that an allocation, together with its spills and
//! reloads, keeps every variable's value where its uses expect it.
//!
//! There are two parts.  The first looks at the intervals alone: no register
//! is handed to two overlapping intervals, every interval that is spilled or
//! lives in memory has a slot, and use positions lie inside their interval.
//!
//! The second steps through the instructions tracking symbolic values, in
//! the manner of an abstract interpretation.  The state at each position is:
//!
//!   - map `R` of: machine reg -> value (unknown, or the symbol `Vn`)
//!   - map `S` of: spill slot -> value (same)
//!
//! with these transfer functions:
//!
//!   - spill inserted before position p:   S[slot] := R[reg]
//!   - reload inserted before position p:  R[reg] := S[slot]
//!   - instruction defining `Vn`, whose interval holds `reg`:
//!
//!       R[reg] := `Vn`
//!
//! Every variable an instruction reads must then sit in the register of the
//! interval covering that position, with the symbol of that variable in it.
//! Positions are checked in order; a unit is a single linear sequence here,
//! so there are no join points to meet at.

use log::{debug, info};

use std::fmt;

use crate::analysis::InsnSource;
use crate::data_structures::{IntervalIx, MachineReg, Map, SpillSlot, VarIx};
use crate::inst_stream::{edits_at, EditKind, InstToInsert};
use crate::vars::Vars;

/// Abstract state of a storage location (machine register or spill slot).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckerValue {
  /// Nothing known about the location.
  Unknown,
  /// The location holds the value most recently defined for the variable.
  Var(VarIx),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckerError {
  RegisterConflict { reg: MachineReg, first: IntervalIx, second: IntervalIx },
  MissingSpillSlot { interval: IntervalIx },
  /// Neither a register nor a spill slot.
  Unallocated { interval: IntervalIx },
  ReloadWithoutRegister { interval: IntervalIx },
  UseOutsideInterval { interval: IntervalIx, pos: u32 },
  UnorderedUses { interval: IntervalIx },
  /// No interval of `var` covers a position that mentions it.
  UncoveredVar { var: VarIx, pos: u32 },
  NotInRegister { var: VarIx, pos: u32, interval: IntervalIx },
  WrongValue { var: VarIx, pos: u32, reg: MachineReg, found: CheckerValue },
}

impl fmt::Display for CheckerError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      CheckerError::RegisterConflict { reg, first, second } => write!(
        f,
        "{:?} and {:?} overlap and share {:?}",
        first, second, reg
      ),
      CheckerError::MissingSpillSlot { interval } => {
        write!(f, "{:?} is spilled without a spill slot", interval)
      }
      CheckerError::Unallocated { interval } => {
        write!(f, "{:?} has neither a register nor a spill slot", interval)
      }
      CheckerError::ReloadWithoutRegister { interval } => {
        write!(f, "{:?} is reloaded without a register", interval)
      }
      CheckerError::UseOutsideInterval { interval, pos } => {
        write!(f, "use at {} lies outside {:?}", pos, interval)
      }
      CheckerError::UnorderedUses { interval } => {
        write!(f, "use positions of {:?} are out of order", interval)
      }
      CheckerError::UncoveredVar { var, pos } => {
        write!(f, "no interval of {:?} covers {}", var, pos)
      }
      CheckerError::NotInRegister { var, pos, interval } => write!(
        f,
        "{:?} is needed in a register at {}, but {:?} has none",
        var, pos, interval
      ),
      CheckerError::WrongValue { var, pos, reg, found } => write!(
        f,
        "{:?} is expected in {:?} at {}, found {:?}",
        var, reg, pos, found
      ),
    }
  }
}

#[derive(Clone, Debug, Default)]
pub struct CheckerErrors {
  pub errors: Vec<CheckerError>,
}

impl fmt::Display for CheckerErrors {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    for (i, err) in self.errors.iter().enumerate() {
      if i > 0 {
        writeln!(f)?;
      }
      write!(f, "{}", err)?;
    }
    Ok(())
  }
}

impl std::error::Error for CheckerErrors {}

/// State that steps through positions as we scan over the instructions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CheckerState {
  reg_values: Map<MachineReg, CheckerValue>,
  spill_slots: Map<SpillSlot, CheckerValue>,
}

impl CheckerState {
  pub fn new() -> Self {
    Self::default()
  }

  /// Update with an allocator-inserted reload.
  pub fn process_reload(&mut self, into_reg: MachineReg, from_slot: SpillSlot) {
    let val = self.get_slot_value(from_slot);
    self.reg_values.insert(into_reg, val);
  }

  /// Update with an allocator-inserted spill.
  pub fn process_spill(&mut self, into_slot: SpillSlot, from_reg: MachineReg) {
    let val = self.get_reg_value(from_reg);
    self.spill_slots.insert(into_slot, val);
  }

  /// Update with an instruction defining `var` into `reg`.
  pub fn process_def(&mut self, reg: MachineReg, var: VarIx) {
    self.reg_values.insert(reg, CheckerValue::Var(var));
  }

  pub fn process_edit(&mut self, edit: &InstToInsert) {
    match edit.kind {
      EditKind::Spill => self.process_spill(edit.slot, edit.reg),
      EditKind::Reload => self.process_reload(edit.reg, edit.slot),
    }
  }

  pub fn get_reg_value(&self, reg: MachineReg) -> CheckerValue {
    self.reg_values.get(&reg).cloned().unwrap_or(CheckerValue::Unknown)
  }

  pub fn get_slot_value(&self, slot: SpillSlot) -> CheckerValue {
    self.spill_slots.get(&slot).cloned().unwrap_or(CheckerValue::Unknown)
  }
}

//=============================================================================
// Interval checks

fn check_intervals(vars: &Vars, errors: &mut Vec<CheckerError>) {
  let mut by_reg: Map<MachineReg, Vec<IntervalIx>> = Map::default();

  for (ix, int) in vars.live_intervals() {
    if int.range.len() == 0 {
      continue;
    }
    match int.reg {
      Some(reg) => by_reg.entry(reg).or_insert_with(Vec::new).push(ix),
      None if int.spill_slot.is_none() => {
        errors.push(CheckerError::Unallocated { interval: ix })
      }
      None => {}
    }
    if int.need_spill && int.spill_slot.is_none() {
      errors.push(CheckerError::MissingSpillSlot { interval: ix });
    }
    if int.need_reload && int.reg.is_none() {
      errors.push(CheckerError::ReloadWithoutRegister { interval: ix });
    }

    let mut prev = None;
    for &u in &int.uses {
      let pos = vars.use_pos(u).pos;
      if !int.range.in_range(pos) {
        errors.push(CheckerError::UseOutsideInterval { interval: ix, pos });
      }
      if let Some(prev) = prev {
        if pos < prev {
          errors.push(CheckerError::UnorderedUses { interval: ix });
        }
      }
      prev = Some(pos);
    }
  }

  let mut regs: Vec<_> = by_reg.into_iter().collect();
  regs.sort_by_key(|(reg, _)| *reg);
  for (reg, mut ixs) in regs {
    ixs.sort_by_key(|&ix| (vars.interval(ix).start(), ix));
    // The interval reaching farthest so far.
    let mut reach: Option<(IntervalIx, u32)> = None;
    for ix in ixs {
      let int = vars.interval(ix);
      if let Some((holder, end)) = reach {
        if int.start() < end {
          errors.push(CheckerError::RegisterConflict {
            reg,
            first: holder,
            second: ix,
          });
        }
        if int.end() <= end {
          continue;
        }
      }
      reach = Some((ix, int.end()));
    }
  }
}

//=============================================================================
// Value tracking

fn covering_interval(vars: &Vars, var: VarIx, pos: u32) -> Option<IntervalIx> {
  vars.intervals_of(var).find(|&ix| vars.interval(ix).range.in_range(pos))
}

fn check_values<S: InsnSource + ?Sized>(
  source: &S, vars: &Vars, edits: &[InstToInsert],
  errors: &mut Vec<CheckerError>,
) {
  let mut state = CheckerState::new();

  for pos in 0..source.num_insns() {
    for edit in edits_at(edits, pos) {
      state.process_edit(edit);
    }

    let uses = source.var_uses(pos);
    for &var in &uses.used {
      let ix = match covering_interval(vars, var, pos) {
        Some(ix) => ix,
        None => {
          errors.push(CheckerError::UncoveredVar { var, pos });
          continue;
        }
      };
      match vars.interval(ix).reg {
        Some(reg) => {
          let found = state.get_reg_value(reg);
          if found != CheckerValue::Var(var) {
            errors.push(CheckerError::WrongValue { var, pos, reg, found });
          }
        }
        None => {
          errors.push(CheckerError::NotInRegister { var, pos, interval: ix })
        }
      }
    }

    for &var in &uses.defined {
      match covering_interval(vars, var, pos) {
        Some(ix) => match vars.interval(ix).reg {
          Some(reg) => state.process_def(reg, var),
          None => {
            errors.push(CheckerError::NotInRegister { var, pos, interval: ix })
          }
        },
        None => errors.push(CheckerError::UncoveredVar { var, pos }),
      }
    }
  }
}

/// Checks the allocation recorded in `vars`, with its `edits`, against the
/// instructions of `source`.
pub fn check<S: InsnSource + ?Sized>(
  source: &S, vars: &Vars, edits: &[InstToInsert],
) -> Result<(), CheckerErrors> {
  let mut errors = Vec::new();
  check_intervals(vars, &mut errors);
  check_values(source, vars, edits, &mut errors);

  if errors.is_empty() {
    info!("checker: ok");
    Ok(())
  } else {
    for err in &errors {
      debug!("checker: {}", err);
    }
    info!("checker: {} error(s)", errors.len());
    Err(CheckerErrors { errors })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::analysis::{run_analysis, InstVarUses};
  use crate::data_structures::{make_register_file, VmType};
  use crate::linear_scan::allocate_registers;

  /// Instructions given as (used, defined) variable numbers.
  struct Insns(Vec<(Vec<u32>, Vec<u32>)>);

  impl InsnSource for Insns {
    fn num_insns(&self) -> u32 {
      self.0.len() as u32
    }
    fn var_uses(&self, pos: u32) -> InstVarUses {
      let (used, defined) = &self.0[pos as usize];
      InstVarUses {
        used: used.iter().map(|&v| VarIx::new(v)).collect(),
        defined: defined.iter().map(|&v| VarIx::new(v)).collect(),
      }
    }
  }

  /// v0 is live across v1, so that a single register forces a spill.
  fn spilling_program() -> Insns {
    Insns(vec![
      (vec![], vec![0]),
      (vec![], vec![1]),
      (vec![1], vec![]),
      (vec![0], vec![]),
    ])
  }

  fn allocate(insns: &Insns, num_regs: usize) -> (Vars, Vec<InstToInsert>) {
    let mut vars = Vars::new();
    vars.new_var(VmType::Int);
    vars.new_var(VmType::Int);
    run_analysis(insns, &mut vars).unwrap();
    let res = allocate_registers(&mut vars, &make_register_file(num_regs))
      .unwrap();
    (vars, res.edits)
  }

  #[test]
  fn accepts_spill_and_reload() {
    let insns = spilling_program();
    let (vars, edits) = allocate(&insns, 1);
    assert_eq!(edits.len(), 2);
    check(&insns, &vars, &edits).unwrap();
  }

  #[test]
  fn missing_spill_loses_the_value() {
    let insns = spilling_program();
    let (vars, edits) = allocate(&insns, 1);
    let reloads: Vec<_> =
      edits.into_iter().filter(|e| e.kind == EditKind::Reload).collect();
    let errors = check(&insns, &vars, &reloads).unwrap_err().errors;
    assert_eq!(
      errors,
      vec![CheckerError::WrongValue {
        var: VarIx::new(0),
        pos: 3,
        reg: MachineReg::new(0),
        found: CheckerValue::Unknown,
      }]
    );
  }

  #[test]
  fn shared_register_is_a_conflict() {
    let insns = spilling_program();
    let (mut vars, edits) = allocate(&insns, 2);
    check(&insns, &vars, &edits).unwrap();

    let v0 = vars.var(VarIx::new(0)).interval;
    let v1 = vars.var(VarIx::new(1)).interval;
    let reg = vars.interval(v0).reg;
    vars.interval_mut(v1).reg = reg;
    let errors = check(&insns, &vars, &edits).unwrap_err().errors;
    assert!(errors.contains(&CheckerError::RegisterConflict {
      reg: MachineReg::new(0),
      first: v0,
      second: v1,
    }));
    // v1 overwrote v0 at 1, so the read at 3 sees the wrong symbol.
    assert!(errors.contains(&CheckerError::WrongValue {
      var: VarIx::new(0),
      pos: 3,
      reg: MachineReg::new(0),
      found: CheckerValue::Var(VarIx::new(1)),
    }));
  }

  #[test]
  fn spill_flags_need_slots_and_registers() {
    let insns = spilling_program();
    let (mut vars, edits) = allocate(&insns, 2);
    let v0 = vars.var(VarIx::new(0)).interval;
    let v1 = vars.var(VarIx::new(1)).interval;
    vars.interval_mut(v0).need_spill = true;
    {
      let int = vars.interval_mut(v1);
      int.need_reload = true;
      int.reg = None;
      int.spill_slot = Some(SpillSlot::new(0));
    }
    let errors = check(&insns, &vars, &edits).unwrap_err().errors;
    assert!(errors.contains(&CheckerError::MissingSpillSlot { interval: v0 }));
    assert!(
      errors.contains(&CheckerError::ReloadWithoutRegister { interval: v1 })
    );
    assert!(errors.contains(&CheckerError::NotInRegister {
      var: VarIx::new(1),
      pos: 2,
      interval: v1,
    }));
  }

  #[test]
  fn state_follows_spills_and_reloads() {
    let mut state = CheckerState::new();
    let r0 = MachineReg::new(0);
    let s0 = SpillSlot::new(0);
    state.process_def(r0, VarIx::new(4));
    state.process_spill(s0, r0);
    state.process_def(r0, VarIx::new(5));
    assert_eq!(state.get_reg_value(r0), CheckerValue::Var(VarIx::new(5)));
    state.process_reload(r0, s0);
    assert_eq!(state.get_reg_value(r0), CheckerValue::Var(VarIx::new(4)));
    assert_eq!(state.get_reg_value(MachineReg::new(1)), CheckerValue::Unknown);
  }
}
