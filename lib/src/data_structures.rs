/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Data structures for the whole crate.

use rustc_hash::FxHashMap;
use rustc_hash::FxHashSet;

use std::fmt;
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};
use std::slice::{Iter, IterMut};

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

//=============================================================================
// Maps and sets

pub type Map<K, V> = FxHashMap<K, V>;
pub type Set<T> = FxHashSet<T>;

//=============================================================================
// Vectors where both the index and element types can be specified (and at
// most 2^32-1 elems can be stored).

pub struct TypedIxVec<TyIx, Ty> {
  vek: Vec<Ty>,
  ty_ix: PhantomData<TyIx>,
}

impl<TyIx, Ty> TypedIxVec<TyIx, Ty>
where
  TyIx: From<u32>,
{
  pub fn new() -> Self {
    Self { vek: Vec::new(), ty_ix: PhantomData::<TyIx> }
  }
  pub fn from_vec(vek: Vec<Ty>) -> Self {
    Self { vek, ty_ix: PhantomData::<TyIx> }
  }
  pub fn iter(&self) -> Iter<Ty> {
    self.vek.iter()
  }
  pub fn iter_mut(&mut self) -> IterMut<Ty> {
    self.vek.iter_mut()
  }
  /// Iterates over the (index, element) pairs, in index order.
  pub fn iter_ix(&self) -> impl Iterator<Item = (TyIx, &Ty)> {
    self.vek.iter().enumerate().map(|(i, t)| (TyIx::from(i as u32), t))
  }
  pub fn len(&self) -> u32 {
    debug_assert!(self.vek.len() <= u32::max_value() as usize);
    self.vek.len() as u32
  }
  pub fn is_empty(&self) -> bool {
    self.vek.is_empty()
  }
  /// Pushes an element and returns its index.
  pub fn push(&mut self, item: Ty) -> TyIx {
    let ix = TyIx::from(self.len());
    self.vek.push(item);
    ix
  }
  pub fn last(&self) -> Option<&Ty> {
    self.vek.last()
  }
  pub fn clear(&mut self) {
    self.vek.clear();
  }
}

impl<TyIx, Ty> Index<TyIx> for TypedIxVec<TyIx, Ty>
where
  TyIx: Into<u32>,
{
  type Output = Ty;
  fn index(&self, ix: TyIx) -> &Ty {
    &self.vek[ix.into() as usize]
  }
}

impl<TyIx, Ty> IndexMut<TyIx> for TypedIxVec<TyIx, Ty>
where
  TyIx: Into<u32>,
{
  fn index_mut(&mut self, ix: TyIx) -> &mut Ty {
    &mut self.vek[ix.into() as usize]
  }
}

impl<TyIx, Ty> Clone for TypedIxVec<TyIx, Ty>
where
  Ty: Clone,
{
  fn clone(&self) -> Self {
    Self { vek: self.vek.clone(), ty_ix: PhantomData::<TyIx> }
  }
}

impl<TyIx, Ty: fmt::Debug> fmt::Debug for TypedIxVec<TyIx, Ty> {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    fmt.debug_list().entries(self.vek.iter()).finish()
  }
}

//=============================================================================
// Typed indices into the arenas of a compilation unit.

macro_rules! generate_boilerplate {
  ($TypeIx:ident, $PrintingPrefix:expr) => {
    #[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
    #[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
    pub struct $TypeIx(u32);

    impl $TypeIx {
      #[inline(always)]
      pub fn new(n: u32) -> Self {
        $TypeIx(n)
      }
      #[inline(always)]
      pub fn get(self) -> u32 {
        self.0
      }
      pub fn plus(self, delta: u32) -> Self {
        $TypeIx(self.0 + delta)
      }
      pub fn minus(self, delta: u32) -> Self {
        $TypeIx(self.0 - delta)
      }
    }
    impl fmt::Debug for $TypeIx {
      fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}{}", $PrintingPrefix, self.0)
      }
    }
    impl From<u32> for $TypeIx {
      fn from(n: u32) -> Self {
        $TypeIx(n)
      }
    }
    impl Into<u32> for $TypeIx {
      fn into(self) -> u32 {
        self.0
      }
    }
  };
}

generate_boilerplate!(VarIx, "v");

generate_boilerplate!(IntervalIx, "int");

generate_boilerplate!(UseIx, "u");

generate_boilerplate!(BlockIx, "b");

generate_boilerplate!(ExprIx, "e");

generate_boilerplate!(StmtIx, "s");

//=============================================================================
// Machine registers and spill slots.

/// A physical register, identified by its index in the `RegisterFile`.
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct MachineReg(u8);

impl MachineReg {
  pub fn new(index: u8) -> Self {
    MachineReg(index)
  }
  pub fn get_index(self) -> usize {
    self.0 as usize
  }
}

impl fmt::Debug for MachineReg {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(fmt, "r{}", self.0)
  }
}

#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct SpillSlot(u32);

impl SpillSlot {
  pub fn new(n: u32) -> Self {
    SpillSlot(n)
  }
  pub fn get(self) -> u32 {
    self.0
  }
}

impl fmt::Debug for SpillSlot {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(fmt, "S{}", self.0)
  }
}

//=============================================================================
// Definition of the register file.

// The register file is a read-only description of the machine registers the
// allocator may hand out.  Every register's index must equal its position in
// |regs|, so the allocator can treat them as a zero based, contiguous array.

#[derive(Clone, Debug)]
pub struct RegisterFile {
  pub regs: Vec<(MachineReg, String)>,
}

impl RegisterFile {
  pub fn new(regs: Vec<(MachineReg, String)>) -> Self {
    let file = Self { regs };
    file.check_is_sane();
    file
  }

  pub fn len(&self) -> usize {
    self.regs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.regs.is_empty()
  }

  pub fn name(&self, reg: MachineReg) -> &str {
    &self.regs[reg.get_index()].1
  }

  // At most 256 registers, since |MachineReg| has an 8-bit index, and every
  // index must point back at its own slot.
  fn check_is_sane(&self) {
    let ok = self.regs.len() <= 256
      && self.regs.iter().enumerate().all(|(i, (reg, _))| reg.get_index() == i);
    if !ok {
      panic!("RegisterFile::check_is_sane: invalid register file");
    }
  }
}

/// Create a register file for testing, with `num_regs` registers named
/// `R0`, `R1`, ...
pub fn make_register_file(num_regs: usize) -> RegisterFile {
  if num_regs > 256 {
    panic!("make_register_file: too many regs, cannot represent");
  }
  let regs = (0..num_regs)
    .map(|i| (MachineReg::new(i as u8), format!("R{}", i)))
    .collect();
  RegisterFile::new(regs)
}

//=============================================================================
// Value kinds of the virtual machine.

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum VmType {
  Byte,
  Char,
  Short,
  Int,
  Long,
  Float,
  Double,
  Boolean,
  Reference,
  Void,
}

impl VmType {
  /// Maps the first character of a field or return descriptor to a kind.
  /// Object and array descriptors are both references.
  pub fn from_descriptor(descriptor: &str) -> Option<VmType> {
    let typ = match descriptor.as_bytes().first()? {
      b'B' => VmType::Byte,
      b'C' => VmType::Char,
      b'S' => VmType::Short,
      b'I' => VmType::Int,
      b'J' => VmType::Long,
      b'F' => VmType::Float,
      b'D' => VmType::Double,
      b'Z' => VmType::Boolean,
      b'L' | b'[' => VmType::Reference,
      b'V' => VmType::Void,
      _ => return None,
    };
    Some(typ)
  }

  /// Long and double values take two local slots and two operand stack words.
  pub fn is_wide(self) -> bool {
    match self {
      VmType::Long | VmType::Double => true,
      _ => false,
    }
  }
}

/// Element types of the `newarray` instruction, keyed by their `atype` tag.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum ArrayElemType {
  Boolean = 4,
  Char = 5,
  Float = 6,
  Double = 7,
  Byte = 8,
  Short = 9,
  Int = 10,
  Long = 11,
}

impl ArrayElemType {
  pub fn from_tag(tag: u8) -> Option<Self> {
    let elem = match tag {
      4 => ArrayElemType::Boolean,
      5 => ArrayElemType::Char,
      6 => ArrayElemType::Float,
      7 => ArrayElemType::Double,
      8 => ArrayElemType::Byte,
      9 => ArrayElemType::Short,
      10 => ArrayElemType::Int,
      11 => ArrayElemType::Long,
      _ => return None,
    };
    Some(elem)
  }

  pub fn tag(self) -> u8 {
    self as u8
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn typed_ix_vec_push_returns_index() {
    let mut v: TypedIxVec<ExprIx, &str> = TypedIxVec::new();
    let a = v.push("a");
    let b = v.push("b");
    assert_eq!(a, ExprIx::new(0));
    assert_eq!(b, ExprIx::new(1));
    assert_eq!(v[b], "b");
    assert_eq!(v.len(), 2);
  }

  #[test]
  fn descriptors_map_to_kinds() {
    assert_eq!(VmType::from_descriptor("I"), Some(VmType::Int));
    assert_eq!(VmType::from_descriptor("J"), Some(VmType::Long));
    assert_eq!(
      VmType::from_descriptor("Ljava/lang/Object;"),
      Some(VmType::Reference)
    );
    assert_eq!(VmType::from_descriptor("[C"), Some(VmType::Reference));
    assert_eq!(VmType::from_descriptor("Q"), None);
    assert_eq!(VmType::from_descriptor(""), None);
  }

  #[test]
  fn register_file_names() {
    let file = make_register_file(3);
    assert_eq!(file.len(), 3);
    assert_eq!(file.name(MachineReg::new(2)), "R2");
    assert!(make_register_file(0).is_empty());
  }

  #[test]
  fn newarray_tags() {
    assert_eq!(ArrayElemType::from_tag(10), Some(ArrayElemType::Int));
    assert_eq!(ArrayElemType::Int.tag(), 10);
    assert_eq!(ArrayElemType::from_tag(3), None);
    assert_eq!(ArrayElemType::from_tag(12), None);
  }
}
