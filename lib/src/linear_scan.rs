/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Linear-scan register allocation over the live intervals of a unit.
//!
//! Intervals are handled in order of increasing start position.  An interval
//! takes the lowest numbered free register; when there is none, the active
//! interval that ends last gives up its register, unless the new interval
//! ends later still, in which case the new interval goes to memory.  A
//! spilled interval that is used again is split at that use, and the part
//! from the use on is queued for a register of its own.

use log::{debug, info, trace};

use std::fmt;

use crate::data_structures::{
  IntervalIx, MachineReg, Map, RegisterFile, SpillSlot, VarIx,
};
use crate::inst_stream::{collect_edits, InstToInsert};
use crate::interface::RegAllocError;
use crate::live_range::LiveRange;
use crate::vars::Vars;

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

//=============================================================================
// Results

#[derive(Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum Location {
  Reg(MachineReg),
  Stack(SpillSlot),
}

impl fmt::Debug for Location {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Location::Reg(reg) => write!(fmt, "{:?}", reg),
      Location::Stack(slot) => write!(fmt, "{:?}", slot),
    }
  }
}

/// Where one interval lives.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Assignment {
  pub interval: IntervalIx,
  pub var: VarIx,
  pub range: LiveRange,
  pub location: Location,
  pub need_spill: bool,
  pub need_reload: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct RegAllocResult {
  /// One entry per allocated interval, in interval order.
  pub assignments: Vec<Assignment>,
  /// Spills and reloads, sorted by position.
  pub edits: Vec<InstToInsert>,
  pub num_spill_slots: u32,
}

impl RegAllocResult {
  pub fn location_of(&self, interval: IntervalIx) -> Option<Location> {
    self
      .assignments
      .iter()
      .find(|a| a.interval == interval)
      .map(|a| a.location)
  }
}

//=============================================================================
// A mapping from machine register to some T.

#[derive(Clone)]
struct RegisterMapping<T> {
  regs: Vec<(MachineReg, T)>,
}

impl<T: Copy> RegisterMapping<T> {
  fn with_default(reg_file: &RegisterFile, initial_value: T) -> Self {
    let regs =
      reg_file.regs.iter().map(|(reg, _)| (*reg, initial_value)).collect();
    Self { regs }
  }

  fn iter(&self) -> std::slice::Iter<(MachineReg, T)> {
    self.regs.iter()
  }
}

impl<T> std::ops::Index<MachineReg> for RegisterMapping<T> {
  type Output = T;
  fn index(&self, reg: MachineReg) -> &Self::Output {
    &self.regs[reg.get_index()].1
  }
}

impl<T> std::ops::IndexMut<MachineReg> for RegisterMapping<T> {
  fn index_mut(&mut self, reg: MachineReg) -> &mut Self::Output {
    &mut self.regs[reg.get_index()].1
  }
}

//=============================================================================
// State management.

struct State<'a> {
  vars: &'a mut Vars,

  /// Intervals still to be handled.  Kept in reverse (start, index) order,
  /// so that the next one can be popped off the end.
  unhandled: Vec<IntervalIx>,

  /// Intervals holding a register at the current position, in activation
  /// order.
  active: Vec<(IntervalIx, MachineReg)>,

  /// Current holder of every register.
  registers: RegisterMapping<Option<IntervalIx>>,

  /// The spill slot of every variable that has been spilled and is still
  /// live.
  spill_map: Map<VarIx, SpillSlot>,
  free_slots: Vec<SpillSlot>,
  next_spill_slot: u32,

  /// End of the last interval of every variable.
  var_ends: Map<VarIx, u32>,
}

impl<'a> State<'a> {
  fn new(
    vars: &'a mut Vars, reg_file: &RegisterFile, candidates: Vec<IntervalIx>,
  ) -> Self {
    let mut var_ends = Map::default();
    for &ix in &candidates {
      let int = vars.interval(ix);
      let end = var_ends.entry(int.var).or_insert(0);
      if int.end() > *end {
        *end = int.end();
      }
    }
    // Trick! Keep unhandled in reverse sorted order, so we can just pop
    // unhandled ids instead of shifting the first element.
    let unhandled = candidates.into_iter().rev().collect();
    Self {
      vars,
      unhandled,
      active: Vec::new(),
      registers: RegisterMapping::with_default(reg_file, None),
      spill_map: Map::default(),
      free_slots: Vec::new(),
      next_spill_slot: 0,
      var_ends,
    }
  }

  fn next_unhandled(&mut self) -> Option<IntervalIx> {
    self.unhandled.pop()
  }

  fn insert_unhandled(&mut self, ix: IntervalIx) {
    let vars = &*self.vars;
    let key = (vars.interval(ix).start(), ix);
    // Maintain reversed order by inverting the comparison.
    let at = self
      .unhandled
      .partition_point(|&other| (vars.interval(other).start(), other) > key);
    self.unhandled.insert(at, ix);
  }

  /// Retires the active intervals that end at or before `pos`, and the spill
  /// slots of variables that are dead at `pos`.
  fn expire(&mut self, pos: u32) {
    let vars = &*self.vars;
    let registers = &mut self.registers;
    self.active.retain(|&(ix, reg)| {
      if vars.interval(ix).end() <= pos {
        trace!("expire {:?} ({:?}) at {}", ix, reg, pos);
        registers[reg] = None;
        false
      } else {
        true
      }
    });

    let var_ends = &self.var_ends;
    let mut dead: Vec<VarIx> = self
      .spill_map
      .keys()
      .filter(|var| var_ends.get(var).map_or(true, |&end| end <= pos))
      .cloned()
      .collect();
    dead.sort();
    for var in dead {
      if let Some(slot) = self.spill_map.remove(&var) {
        trace!("free {:?} of {:?} at {}", slot, var, pos);
        self.free_slots.push(slot);
      }
    }
  }

  fn free_reg(&self) -> Option<MachineReg> {
    self
      .registers
      .iter()
      .find(|(_, holder)| holder.is_none())
      .map(|(reg, _)| *reg)
  }

  fn assign(&mut self, ix: IntervalIx, reg: MachineReg) {
    debug!("{:?} {:?} <- {:?}", ix, self.vars.interval(ix).var, reg);
    self.vars.interval_mut(ix).reg = Some(reg);
    self.registers[reg] = Some(ix);
    self.active.push((ix, reg));
  }

  /// The spill slot of `var`: its current one, or else the lowest free one.
  fn slot_for(&mut self, var: VarIx) -> SpillSlot {
    if let Some(&slot) = self.spill_map.get(&var) {
      return slot;
    }
    let slot = match self
      .free_slots
      .iter()
      .enumerate()
      .min_by_key(|(_, slot)| **slot)
      .map(|(i, _)| i)
    {
      Some(i) => self.free_slots.swap_remove(i),
      None => {
        let slot = SpillSlot::new(self.next_spill_slot);
        self.next_spill_slot += 1;
        slot
      }
    };
    self.spill_map.insert(var, slot);
    slot
  }

  /// Moves `ix`, which starts at `pos` or later, to the stack slot of its
  /// variable.  If the variable is used again within the interval, the part
  /// from that use on is split off and requeued to be reloaded.
  fn to_memory(&mut self, ix: IntervalIx, pos: u32) {
    let var = self.vars.interval(ix).var;
    let slot = self.slot_for(var);
    {
      let int = self.vars.interval_mut(ix);
      int.reg = None;
      int.spill_slot = Some(slot);
    }
    debug!("{:?} of {:?} -> {:?} at {}", ix, var, slot, pos);

    let (start, end) = {
      let int = self.vars.interval(ix);
      (int.start(), int.end())
    };
    if let Some(next_use) = self.vars.next_use(ix, pos) {
      if start < next_use && next_use < end {
        let reload = self.vars.split(ix, next_use);
        {
          let int = self.vars.interval_mut(reload);
          int.need_reload = true;
          int.spill_slot = Some(slot);
        }
        debug!("{:?} of {:?} reloads at {}", reload, var, next_use);
        self.insert_unhandled(reload);
      }
    }
  }

  /// Takes the register of the active interval `victim` at `pos`.  The part
  /// of the victim before `pos` keeps the register and is stored to the
  /// stack when it ends.
  ///
  /// `need_spill` marks the register-holding segment that does the store,
  /// not the segment living in the slot: the spill edit is emitted at the end
  /// of that segment, where its register still holds the value.  The slot
  /// segment only carries `spill_slot`, and its reload part `need_reload`.
  fn evict(&mut self, victim: IntervalIx, reg: MachineReg, pos: u32) {
    self.active.retain(|&(ix, _)| ix != victim);
    self.registers[reg] = None;

    let var = self.vars.interval(victim).var;
    let slot = self.slot_for(var);
    let spilled = if self.vars.interval(victim).start() < pos {
      let tail = self.vars.split(victim, pos);
      let head = self.vars.interval_mut(victim);
      head.need_spill = true;
      head.spill_slot = Some(slot);
      debug!("evict {:?} ({:?}) at {}: spills to {:?}", victim, reg, pos, slot);
      tail
    } else {
      debug!("evict {:?} ({:?}) at its start {}", victim, reg, pos);
      victim
    };
    self.to_memory(spilled, pos);
  }
}

/// Handles `cur` when every register is taken.
fn allocate_blocked_reg(
  state: &mut State, cur: IntervalIx, pos: u32,
) -> Result<(), RegAllocError> {
  let vars = &*state.vars;
  let cur_end = vars.interval(cur).end();
  // An interval used right at its start must be in a register there.
  let cur_needs_reg = vars.has_use_at(cur, pos);

  // The active interval that ends last, the earliest activated on ties.
  // Intervals used at `pos` need their register and are never evicted.
  let mut victim: Option<(IntervalIx, MachineReg)> = None;
  for &(ix, reg) in &state.active {
    if vars.has_use_at(ix, pos) {
      continue;
    }
    let better = match victim {
      Some((best, _)) => vars.interval(ix).end() > vars.interval(best).end(),
      None => true,
    };
    if better {
      victim = Some((ix, reg));
    }
  }

  match victim {
    Some((victim, reg))
      if cur_needs_reg || state.vars.interval(victim).end() >= cur_end =>
    {
      state.evict(victim, reg, pos);
      state.assign(cur, reg);
      Ok(())
    }
    _ if !cur_needs_reg => {
      debug!("{:?} ends last, spilled at {}", cur, pos);
      state.to_memory(cur, pos);
      Ok(())
    }
    _ => Err(RegAllocError::OutOfRegisters { pos }),
  }
}

//=============================================================================
// Allocator top level.

/// Assigns a register or a spill slot to every interval of `vars` that has a
/// non-empty range.  Intervals are split as needed; the splits show up in
/// `vars` afterwards.  Fails if the register file is empty, or if more
/// intervals need a register at one position than there are registers.
pub fn allocate_registers(
  vars: &mut Vars, reg_file: &RegisterFile,
) -> Result<RegAllocResult, RegAllocError> {
  if reg_file.is_empty() {
    return Err(RegAllocError::NoRegisters);
  }

  let mut candidates: Vec<IntervalIx> = vars
    .live_intervals()
    .filter(|(_, int)| int.range.len() > 0)
    .map(|(ix, _)| ix)
    .collect();
  candidates.sort_by_key(|&ix| (vars.interval(ix).start(), ix));

  info!(
    "linear scan: {} interval(s), {} register(s)",
    candidates.len(),
    reg_file.len()
  );

  let num_spill_slots = {
    let mut state = State::new(vars, reg_file, candidates);

    #[cfg(debug_assertions)]
    let mut prev_start = None;

    while let Some(cur) = state.next_unhandled() {
      let pos = state.vars.interval(cur).start();
      trace!("main loop: allocating {:?} {:?}", cur, state.vars.interval(cur));

      #[cfg(debug_assertions)]
      {
        if let Some(prev) = prev_start {
          debug_assert!(prev <= pos, "main loop must make progress");
        }
        prev_start = Some(pos);
      }

      state.expire(pos);
      match state.free_reg() {
        Some(reg) => state.assign(cur, reg),
        None => allocate_blocked_reg(&mut state, cur, pos)?,
      }
    }
    state.next_spill_slot
  };

  let mut assignments = Vec::new();
  for (ix, int) in vars.live_intervals() {
    let location = match (int.reg, int.spill_slot) {
      (Some(reg), _) => Location::Reg(reg),
      (None, Some(slot)) => Location::Stack(slot),
      (None, None) => continue,
    };
    assignments.push(Assignment {
      interval: ix,
      var: int.var,
      range: int.range,
      location,
      need_spill: int.need_spill,
      need_reload: int.need_reload,
    });
  }

  debug!("allocation results:");
  for a in &assignments {
    debug!("  {:?} {:?} {:?} {:?}", a.interval, a.var, a.range, a.location);
  }

  let edits = collect_edits(vars);
  info!(
    "linear scan: {} edit(s), {} spill slot(s)",
    edits.len(),
    num_spill_slots
  );
  Ok(RegAllocResult { assignments, edits, num_spill_slots })
}
