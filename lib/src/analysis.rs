/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Interval construction: numbers the instructions of a unit linearly and
//! computes, for every variable, the range over which it is live together
//! with its use positions.

use log::{debug, trace};
use smallvec::SmallVec;

use std::fmt;

use crate::compilation_unit::CompilationUnit;
use crate::data_structures::{BlockIx, ExprIx, StmtIx, VarIx};
use crate::statement::StmtKind;
use crate::vars::Vars;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AnalysisError {
  /// `var` is read at `pos` before anything defines it.
  UseBeforeDef { var: VarIx, pos: u32 },

  /// An instruction mentions a variable the unit does not have.
  UnknownVar { var: VarIx, pos: u32 },
}

impl fmt::Display for AnalysisError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      AnalysisError::UseBeforeDef { var, pos } => {
        write!(f, "{:?} is used at {} before being defined", var, pos)
      }
      AnalysisError::UnknownVar { var, pos } => {
        write!(f, "unknown variable {:?} at {}", var, pos)
      }
    }
  }
}

impl std::error::Error for AnalysisError {}

/// The variables read and written by one instruction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InstVarUses {
  pub used: SmallVec<[VarIx; 4]>,
  pub defined: SmallVec<[VarIx; 2]>,
}

/// A linear sequence of instructions, as seen by the interval analysis and
/// the allocation checker.  Positions run from 0 to `num_insns() - 1`.
pub trait InsnSource {
  fn num_insns(&self) -> u32;

  fn var_uses(&self, pos: u32) -> InstVarUses;
}

/// Computes the live range and use positions of every variable mentioned
/// by `source`.  Each range spans from the first mention to the last one,
/// inclusive.  Expects the intervals of `vars` to be unset.
pub fn run_analysis<S: InsnSource + ?Sized>(
  source: &S, vars: &mut Vars,
) -> Result<(), AnalysisError> {
  let num_vars = vars.num_vars();
  for pos in 0..source.num_insns() {
    let uses = source.var_uses(pos);
    for &var in uses.used.iter().chain(uses.defined.iter()) {
      if var.get() >= num_vars {
        return Err(AnalysisError::UnknownVar { var, pos });
      }
    }

    for &var in uses.used.iter() {
      let head = vars.var(var).interval;
      if vars.interval(head).range.is_empty() {
        return Err(AnalysisError::UseBeforeDef { var, pos });
      }
    }

    let mut mentioned: SmallVec<[VarIx; 4]> = SmallVec::new();
    for &var in uses.used.iter().chain(uses.defined.iter()) {
      if !mentioned.contains(&var) {
        mentioned.push(var);
      }
    }
    for var in mentioned {
      let head = vars.var(var).interval;
      vars.interval_mut(head).range.extend_to(pos);
      vars.assoc_var_to_operand(var, pos);
    }
  }

  for (_, var) in vars.vars() {
    trace!("analysis: v{} {:?}", var.vreg, vars.interval(var.interval).range);
  }
  Ok(())
}

//=============================================================================
// Linear view of a converted unit

/// The statements of a converted unit, in block order, one position each.
pub struct LinearUnit {
  pub positions: Vec<(BlockIx, StmtIx)>,
  uses: Vec<InstVarUses>,
}

impl InsnSource for LinearUnit {
  fn num_insns(&self) -> u32 {
    self.positions.len() as u32
  }

  fn var_uses(&self, pos: u32) -> InstVarUses {
    self.uses[pos as usize].clone()
  }
}

fn collect_reads(cu: &CompilationUnit, expr: ExprIx, out: &mut InstVarUses) {
  let kind = &cu.expr(expr).kind;
  if let Some(var) = kind.temporary() {
    if !out.used.contains(&var) {
      out.used.push(var);
    }
  }
  for child in kind.children() {
    collect_reads(cu, child, out);
  }
}

/// Numbers the statements of `cu`.  A store into a temporary defines it;
/// every other mention of a temporary reads it.
pub fn linearize(cu: &CompilationUnit) -> LinearUnit {
  let mut positions = Vec::new();
  let mut uses = Vec::new();
  for block in cu.blocks_in_order() {
    for &stmt in &cu.block(block).stmts {
      let kind = &cu.stmt(stmt).kind;
      let mut var_uses = InstVarUses::default();
      for operand in kind.operands() {
        collect_reads(cu, operand, &mut var_uses);
      }
      if let StmtKind::Store { dest, .. } = kind {
        match cu.expr(*dest).kind.temporary() {
          Some(var) => var_uses.defined.push(var),
          None => collect_reads(cu, *dest, &mut var_uses),
        }
      }
      positions.push((block, stmt));
      uses.push(var_uses);
    }
  }
  debug!("linearize: {} position(s)", positions.len());
  LinearUnit { positions, uses }
}
