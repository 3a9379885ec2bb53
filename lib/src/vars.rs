/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Virtual variables, their live intervals and use positions.
//!
//! All three live in one arena (`Vars`) owned by the compilation unit.  The
//! relations between them (use position -> interval, interval -> variable,
//! interval -> split child) are plain indices, never ownership.

use log::trace;
use smallvec::SmallVec;

use std::fmt;

use crate::data_structures::{
  IntervalIx, MachineReg, SpillSlot, TypedIxVec, UseIx, VarIx, VmType,
};
use crate::live_range::LiveRange;

/// One virtual variable.
#[derive(Clone, Debug)]
pub struct VarInfo {
  pub vreg: u32,
  pub vm_type: VmType,
  /// First interval of the variable's split chain.
  pub interval: IntervalIx,
}

/// One use of a variable at one instruction position.
#[derive(Clone, Copy, Debug)]
pub struct RegisterInfo {
  pub pos: u32,
  pub interval: IntervalIx,
}

pub type UseList = SmallVec<[UseIx; 4]>;

#[derive(Clone)]
pub struct LiveInterval {
  /// Parent variable of this interval.
  pub var: VarIx,
  pub range: LiveRange,
  /// Machine register assigned to this interval, if any.
  pub reg: Option<MachineReg>,
  /// Use positions, ordered by increasing position.
  pub uses: UseList,
  /// The register of this interval must be stored to the spill slot when the
  /// interval ends.
  pub need_spill: bool,
  /// The register of this interval must be loaded from the spill slot when
  /// the interval starts.
  pub need_reload: bool,
  pub spill_slot: Option<SpillSlot>,
  /// Neighbours in the split chain of the variable.
  pub parent: Option<IntervalIx>,
  pub child: Option<IntervalIx>,
  pub released: bool,
}

impl fmt::Debug for LiveInterval {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(fmt, "{:?} {:?}", self.var, self.range)?;
    match (self.reg, self.spill_slot) {
      (Some(reg), _) => write!(fmt, " {:?}", reg)?,
      (None, Some(slot)) => write!(fmt, " {:?}", slot)?,
      (None, None) => write!(fmt, " none")?,
    }
    if self.need_spill {
      write!(fmt, " spill->{:?}", self.spill_slot)?;
    }
    if self.need_reload {
      write!(fmt, " reload<-{:?}", self.spill_slot)?;
    }
    Ok(())
  }
}

impl LiveInterval {
  fn new(var: VarIx) -> Self {
    Self {
      var,
      range: LiveRange::empty(),
      reg: None,
      uses: SmallVec::new(),
      need_spill: false,
      need_reload: false,
      spill_slot: None,
      parent: None,
      child: None,
      released: false,
    }
  }

  pub fn start(&self) -> u32 {
    self.range.start
  }

  pub fn end(&self) -> u32 {
    self.range.end
  }
}

/// The variables of a compilation unit, with their intervals and uses.
#[derive(Clone, Debug)]
pub struct Vars {
  vars: TypedIxVec<VarIx, VarInfo>,
  intervals: TypedIxVec<IntervalIx, LiveInterval>,
  uses: TypedIxVec<UseIx, RegisterInfo>,
}

impl Default for Vars {
  fn default() -> Self {
    Self::new()
  }
}

impl Vars {
  pub fn new() -> Self {
    Self {
      vars: TypedIxVec::new(),
      intervals: TypedIxVec::new(),
      uses: TypedIxVec::new(),
    }
  }

  /// Introduces a new variable, together with its (unset) interval.
  pub fn new_var(&mut self, vm_type: VmType) -> VarIx {
    let var = VarIx::new(self.vars.len());
    let interval = IntervalIx::new(self.intervals.len());
    self.intervals.push(LiveInterval::new(var));
    self.vars.push(VarInfo { vreg: var.get(), vm_type, interval })
  }

  /// Creates a fresh interval owned by `var`, with an unset range and no
  /// register.  The interval is not linked into the variable's chain.
  pub fn allocate(&mut self, var: VarIx) -> IntervalIx {
    self.intervals.push(LiveInterval::new(var))
  }

  /// Detaches the interval from its variable's split chain and drops its use
  /// positions.  Releasing the head promotes its child.
  ///
  /// Panics if `ix` is the only interval of its variable, which must always
  /// keep one.
  pub fn release(&mut self, ix: IntervalIx) {
    let (var, parent, child) = {
      let int = &self.intervals[ix];
      (int.var, int.parent, int.child)
    };
    if let Some(parent) = parent {
      self.intervals[parent].child = child;
    } else if self.vars[var].interval == ix {
      match child {
        Some(child) => self.vars[var].interval = child,
        None => panic!("release of {:?}, the only interval of {:?}", ix, var),
      }
    }
    if let Some(child) = child {
      self.intervals[child].parent = parent;
    }
    let int = &mut self.intervals[ix];
    int.uses.clear();
    int.parent = None;
    int.child = None;
    int.reg = None;
    int.released = true;
  }

  /// Splits `ix` at `pos`: the interval keeps `[start, pos)` and the returned
  /// one covers `[pos, end)` and takes every use at or after `pos`.
  ///
  /// Panics unless `start < pos < end`.
  pub fn split(&mut self, ix: IntervalIx, pos: u32) -> IntervalIx {
    let (var, range) = {
      let int = &self.intervals[ix];
      (int.var, int.range)
    };
    if !(range.start < pos && pos < range.end) {
      panic!(
        "split of {:?} at {} outside of its range {:?}",
        ix, pos, range
      );
    }

    let child_ix = self.allocate(var);

    let uses = &self.uses;
    let at = self.intervals[ix]
      .uses
      .iter()
      .position(|&u| uses[u].pos >= pos)
      .unwrap_or(self.intervals[ix].uses.len());
    let moved: UseList = self.intervals[ix].uses.drain(at..).collect();
    for &u in &moved {
      self.uses[u].interval = child_ix;
    }

    let old_child = self.intervals[ix].child;
    {
      let child = &mut self.intervals[child_ix];
      child.range = LiveRange::new(pos, range.end);
      child.uses = moved;
      child.parent = Some(ix);
      child.child = old_child;
    }
    if let Some(old_child) = old_child {
      self.intervals[old_child].parent = Some(child_ix);
    }
    let parent = &mut self.intervals[ix];
    parent.range.end = pos;
    parent.child = Some(child_ix);

    trace!(
      "split {:?} at {}: {:?} / {:?}",
      ix,
      pos,
      self.intervals[ix],
      self.intervals[child_ix]
    );
    child_ix
  }

  /// Records a use of `var` at `pos`, on the interval of the variable that
  /// covers `pos` (or the head of its chain when none does).
  pub fn assoc_var_to_operand(&mut self, var: VarIx, pos: u32) -> UseIx {
    let interval = self
      .intervals_of(var)
      .find(|&ix| self.intervals[ix].range.in_range(pos))
      .unwrap_or(self.vars[var].interval);
    let use_ix = self.uses.push(RegisterInfo { pos, interval });

    let uses = &self.uses;
    let list = &self.intervals[interval].uses;
    let at = list
      .iter()
      .position(|&u| uses[u].pos > pos)
      .unwrap_or(list.len());
    self.intervals[interval].uses.insert(at, use_ix);
    use_ix
  }

  pub fn mach_reg(&self, u: UseIx) -> Option<MachineReg> {
    self.intervals[self.uses[u].interval].reg
  }

  pub fn mach_reg_var(&self, u: UseIx) -> VarIx {
    self.intervals[self.uses[u].interval].var
  }

  pub fn is_vreg(&self, u: UseIx, vreg: u32) -> bool {
    self.vars[self.mach_reg_var(u)].vreg == vreg
  }

  /// Iterates over the split chain of `var`, in position order.
  pub fn intervals_of(&self, var: VarIx) -> IntervalChain {
    IntervalChain { vars: self, next: Some(self.vars[var].interval) }
  }

  pub fn var(&self, ix: VarIx) -> &VarInfo {
    &self.vars[ix]
  }

  pub fn interval(&self, ix: IntervalIx) -> &LiveInterval {
    &self.intervals[ix]
  }

  pub fn interval_mut(&mut self, ix: IntervalIx) -> &mut LiveInterval {
    &mut self.intervals[ix]
  }

  pub fn use_pos(&self, u: UseIx) -> &RegisterInfo {
    &self.uses[u]
  }

  pub fn num_vars(&self) -> u32 {
    self.vars.len()
  }

  pub fn num_intervals(&self) -> u32 {
    self.intervals.len()
  }

  pub fn vars(&self) -> impl Iterator<Item = (VarIx, &VarInfo)> {
    self.vars.iter_ix()
  }

  /// All intervals that have not been released, in creation order.
  pub fn live_intervals(
    &self,
  ) -> impl Iterator<Item = (IntervalIx, &LiveInterval)> {
    self.intervals.iter_ix().filter(|(_, int)| !int.released)
  }

  /// Position of the first use of `ix` at or after `pos`.
  pub fn next_use(&self, ix: IntervalIx, pos: u32) -> Option<u32> {
    self.intervals[ix]
      .uses
      .iter()
      .map(|&u| self.uses[u].pos)
      .find(|&p| p >= pos)
  }

  pub fn has_use_at(&self, ix: IntervalIx, pos: u32) -> bool {
    self.next_use(ix, pos) == Some(pos)
  }
}

pub struct IntervalChain<'a> {
  vars: &'a Vars,
  next: Option<IntervalIx>,
}

impl<'a> Iterator for IntervalChain<'a> {
  type Item = IntervalIx;
  fn next(&mut self) -> Option<IntervalIx> {
    let cur = self.next?;
    self.next = self.vars.intervals[cur].child;
    Some(cur)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn var_with_uses(
    vars: &mut Vars, start: u32, end: u32, uses: &[u32],
  ) -> VarIx {
    let v = vars.new_var(VmType::Int);
    let head = vars.var(v).interval;
    vars.interval_mut(head).range = LiveRange::new(start, end);
    for &p in uses {
      vars.assoc_var_to_operand(v, p);
    }
    v
  }

  fn positions(vars: &Vars, ix: IntervalIx) -> Vec<u32> {
    vars.interval(ix).uses.iter().map(|&u| vars.use_pos(u).pos).collect()
  }

  #[test]
  fn fresh_interval_is_unset() {
    let mut vars = Vars::new();
    let v = vars.new_var(VmType::Int);
    let int = vars.interval(vars.var(v).interval);
    assert!(int.range.is_empty());
    assert!(int.reg.is_none());
    assert!(!int.need_spill && !int.need_reload);
    assert_eq!(int.var, v);
  }

  #[test]
  fn uses_are_kept_ordered() {
    let mut vars = Vars::new();
    let v = var_with_uses(&mut vars, 0, 20, &[9, 2, 15, 4]);
    let head = vars.var(v).interval;
    assert_eq!(positions(&vars, head), vec![2, 4, 9, 15]);
  }

  #[test]
  fn split_partitions_range_and_uses() {
    let mut vars = Vars::new();
    let v = var_with_uses(&mut vars, 0, 20, &[1, 5, 10, 12, 19]);
    let head = vars.var(v).interval;

    let child = vars.split(head, 10);

    assert_eq!(vars.interval(head).range, LiveRange::new(0, 10));
    assert_eq!(vars.interval(child).range, LiveRange::new(10, 20));
    assert!(!vars.interval(head).range.overlaps(&vars.interval(child).range));
    assert_eq!(positions(&vars, head), vec![1, 5]);
    assert_eq!(positions(&vars, child), vec![10, 12, 19]);
    assert_eq!(vars.interval(child).var, v);
    for &u in vars.interval(child).uses.iter() {
      assert_eq!(vars.use_pos(u).interval, child);
      assert!(vars.is_vreg(u, vars.var(v).vreg));
    }
    for p in 0..20 {
      let in_head = vars.interval(head).range.in_range(p);
      let in_child = vars.interval(child).range.in_range(p);
      assert!(in_head ^ in_child);
    }
  }

  #[test]
  fn split_chain_order() {
    let mut vars = Vars::new();
    let v = var_with_uses(&mut vars, 0, 30, &[]);
    let head = vars.var(v).interval;
    let tail = vars.split(head, 20);
    let middle = vars.split(head, 10);
    let chain: Vec<_> = vars.intervals_of(v).collect();
    assert_eq!(chain, vec![head, middle, tail]);
    assert_eq!(vars.interval(middle).range, LiveRange::new(10, 20));

    vars.release(middle);
    let chain: Vec<_> = vars.intervals_of(v).collect();
    assert_eq!(chain, vec![head, tail]);
    assert!(vars.interval(middle).released);
  }

  #[test]
  fn releasing_the_head_promotes_its_child() {
    let mut vars = Vars::new();
    let v = var_with_uses(&mut vars, 0, 30, &[5, 25]);
    let head = vars.var(v).interval;
    let tail = vars.split(head, 20);
    vars.release(head);
    assert_eq!(vars.var(v).interval, tail);
    let chain: Vec<_> = vars.intervals_of(v).collect();
    assert_eq!(chain, vec![tail]);
    assert_eq!(vars.interval(tail).parent, None);
  }

  #[test]
  #[should_panic]
  fn releasing_the_only_interval_is_fatal() {
    let mut vars = Vars::new();
    let v = var_with_uses(&mut vars, 0, 10, &[3]);
    let head = vars.var(v).interval;
    vars.release(head);
  }

  #[test]
  #[should_panic]
  fn split_at_start_is_fatal() {
    let mut vars = Vars::new();
    let v = var_with_uses(&mut vars, 4, 8, &[]);
    let head = vars.var(v).interval;
    vars.split(head, 4);
  }

  #[test]
  #[should_panic]
  fn split_at_end_is_fatal() {
    let mut vars = Vars::new();
    let v = var_with_uses(&mut vars, 4, 8, &[]);
    let head = vars.var(v).interval;
    vars.split(head, 8);
  }

  #[test]
  fn next_use_queries() {
    let mut vars = Vars::new();
    let v = var_with_uses(&mut vars, 0, 10, &[3, 7]);
    let head = vars.var(v).interval;
    assert_eq!(vars.next_use(head, 0), Some(3));
    assert_eq!(vars.next_use(head, 4), Some(7));
    assert_eq!(vars.next_use(head, 8), None);
    assert!(vars.has_use_at(head, 7));
    assert!(!vars.has_use_at(head, 6));
  }
}
