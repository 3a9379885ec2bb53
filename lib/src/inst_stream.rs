/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! The spill and reload instructions the allocator asks the code emitter to
//! insert.

use log::trace;

use std::fmt;

use crate::data_structures::{IntervalIx, MachineReg, SpillSlot, VarIx};
use crate::vars::Vars;

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

//=============================================================================
// Edit list items

/// Spills sort before reloads at the same position, so that a register
/// handed over at `at` is saved before it is overwritten.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum EditKind {
  /// Store `reg` into `slot`.
  Spill,
  /// Load `reg` from `slot`.
  Reload,
}

/// One instruction to insert before the instruction at position `at`.
#[derive(Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct InstToInsert {
  pub at: u32,
  pub kind: EditKind,
  pub var: VarIx,
  /// The interval whose register is saved or restored.
  pub interval: IntervalIx,
  pub reg: MachineReg,
  pub slot: SpillSlot,
}

impl fmt::Debug for InstToInsert {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self.kind {
      EditKind::Spill => write!(
        fmt,
        "@{}: spill {:?} -> {:?} ({:?})",
        self.at, self.reg, self.slot, self.var
      ),
      EditKind::Reload => write!(
        fmt,
        "@{}: reload {:?} <- {:?} ({:?})",
        self.at, self.reg, self.slot, self.var
      ),
    }
  }
}

/// Collects the edits required by the spill and reload flags of the live
/// intervals, sorted by position.  A spill goes at the end of the register
/// holding interval, a reload at the start of the interval it refills.
pub(crate) fn collect_edits(vars: &Vars) -> Vec<InstToInsert> {
  let mut edits = Vec::new();
  for (ix, int) in vars.live_intervals() {
    let (reg, slot) = match (int.reg, int.spill_slot) {
      (Some(reg), Some(slot)) => (reg, slot),
      _ => continue,
    };
    if int.need_spill {
      edits.push(InstToInsert {
        at: int.end(),
        kind: EditKind::Spill,
        var: int.var,
        interval: ix,
        reg,
        slot,
      });
    }
    if int.need_reload {
      edits.push(InstToInsert {
        at: int.start(),
        kind: EditKind::Reload,
        var: int.var,
        interval: ix,
        reg,
        slot,
      });
    }
  }
  edits.sort_by_key(|e| (e.at, e.kind, e.interval));
  for edit in &edits {
    trace!("edit {:?}", edit);
  }
  edits
}

/// The edits to insert before position `pos`, in order.
pub fn edits_at(edits: &[InstToInsert], pos: u32) -> &[InstToInsert] {
  let first = edits.partition_point(|e| e.at < pos);
  let last = edits.partition_point(|e| e.at <= pos);
  &edits[first..last]
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::data_structures::VmType;
  use crate::live_range::LiveRange;

  #[test]
  fn spills_at_end_reloads_at_start() {
    let mut vars = Vars::new();
    let v = vars.new_var(VmType::Int);
    let head = vars.var(v).interval;
    vars.interval_mut(head).range = LiveRange::new(0, 10);
    let tail = vars.split(head, 6);
    {
      let int = vars.interval_mut(head);
      int.reg = Some(MachineReg::new(0));
      int.spill_slot = Some(SpillSlot::new(2));
      int.need_spill = true;
    }
    {
      let int = vars.interval_mut(tail);
      int.reg = Some(MachineReg::new(1));
      int.spill_slot = Some(SpillSlot::new(2));
      int.need_reload = true;
    }
    // A second variable spilling at the same position as the reload.
    let w = vars.new_var(VmType::Int);
    let w_head = vars.var(w).interval;
    {
      let int = vars.interval_mut(w_head);
      int.range = LiveRange::new(3, 6);
      int.reg = Some(MachineReg::new(1));
      int.spill_slot = Some(SpillSlot::new(0));
      int.need_spill = true;
    }

    let edits = collect_edits(&vars);
    let summary: Vec<_> = edits.iter().map(|e| (e.at, e.kind, e.var)).collect();
    assert_eq!(
      summary,
      vec![
        (6, EditKind::Spill, v),
        (6, EditKind::Spill, w),
        (6, EditKind::Reload, v)
      ]
    );
    assert_eq!(edits_at(&edits, 6).len(), 3);
    assert!(edits_at(&edits, 5).is_empty());
  }
}
