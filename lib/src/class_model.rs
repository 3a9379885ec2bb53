/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! The compiler's view of class metadata: constant pools, methods and
//! descriptors, and the resolver/heap collaborators it calls into.
//!
//! Class loading, resolution and object layout are owned by the virtual
//! machine; this module only fixes the contracts (`ClassResolver`,
//! `ObjectHeap`) and the plain data the compiler reads.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::compiler::JitState;
use crate::data_structures::{MachineReg, VmType};
use crate::interface::CompileError;

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

/// Identifies a loaded class.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct ClassId(pub u32);

/// A handle to a heap object, as baked into generated code.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct ObjectRef(pub u64);

//=============================================================================
// Constant pool

pub const CONSTANT_UTF8: u8 = 1;
pub const CONSTANT_INTEGER: u8 = 3;
pub const CONSTANT_FLOAT: u8 = 4;
pub const CONSTANT_LONG: u8 = 5;
pub const CONSTANT_DOUBLE: u8 = 6;
pub const CONSTANT_CLASS: u8 = 7;
pub const CONSTANT_STRING: u8 = 8;
pub const CONSTANT_FIELDREF: u8 = 9;
pub const CONSTANT_METHODREF: u8 = 10;
pub const CONSTANT_INTERFACE_METHODREF: u8 = 11;
pub const CONSTANT_NAME_AND_TYPE: u8 = 12;

#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
  /// Raw modified UTF-8 bytes.
  Utf8(Vec<u8>),
  Integer(u32),
  Float(u32),
  Long { high: u32, low: u32 },
  Double { high: u32, low: u32 },
  Class { name_index: u16 },
  String { string_index: u16 },
  FieldRef { class_index: u16, name_and_type_index: u16 },
  MethodRef { class_index: u16, name_and_type_index: u16 },
  InterfaceMethodRef { class_index: u16, name_and_type_index: u16 },
  NameAndType { name_index: u16, descriptor_index: u16 },
  /// Index 0, and the slot following a long or double.
  Unusable,
}

impl Constant {
  pub fn tag(&self) -> u8 {
    match self {
      Constant::Utf8(_) => CONSTANT_UTF8,
      Constant::Integer(_) => CONSTANT_INTEGER,
      Constant::Float(_) => CONSTANT_FLOAT,
      Constant::Long { .. } => CONSTANT_LONG,
      Constant::Double { .. } => CONSTANT_DOUBLE,
      Constant::Class { .. } => CONSTANT_CLASS,
      Constant::String { .. } => CONSTANT_STRING,
      Constant::FieldRef { .. } => CONSTANT_FIELDREF,
      Constant::MethodRef { .. } => CONSTANT_METHODREF,
      Constant::InterfaceMethodRef { .. } => CONSTANT_INTERFACE_METHODREF,
      Constant::NameAndType { .. } => CONSTANT_NAME_AND_TYPE,
      Constant::Unusable => 0,
    }
  }

  fn is_wide(&self) -> bool {
    match self {
      Constant::Long { .. } | Constant::Double { .. } => true,
      _ => false,
    }
  }
}

/// A symbolic reference to a field or method, with its names resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberRef {
  pub class_name: String,
  pub name: String,
  pub descriptor: String,
}

/// The constant pool of a class.  Indexing starts at 1.
#[derive(Clone, Debug)]
pub struct ConstantPool {
  entries: Vec<Constant>,
}

impl Default for ConstantPool {
  fn default() -> Self {
    Self::new()
  }
}

impl ConstantPool {
  pub fn new() -> Self {
    Self { entries: vec![Constant::Unusable] }
  }

  /// Number of slots, including the unusable slot 0.
  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.len() <= 1
  }

  /// Appends a constant and returns its index. Longs and doubles take two
  /// slots.
  pub fn push(&mut self, constant: Constant) -> u16 {
    let index = self.entries.len();
    assert!(index + 1 < u16::max_value() as usize, "constant pool overflow");
    let wide = constant.is_wide();
    self.entries.push(constant);
    if wide {
      self.entries.push(Constant::Unusable);
    }
    index as u16
  }

  pub fn is_index_valid(&self, index: u16) -> bool {
    match self.entries.get(index as usize) {
      None | Some(Constant::Unusable) => false,
      Some(_) => true,
    }
  }

  pub fn get(&self, index: u16) -> Result<&Constant, CompileError> {
    match self.entries.get(index as usize) {
      None | Some(Constant::Unusable) => {
        Err(CompileError::InvalidConstantIndex(index))
      }
      Some(constant) => Ok(constant),
    }
  }

  pub fn utf8(&self, index: u16) -> Result<&[u8], CompileError> {
    match self.get(index)? {
      Constant::Utf8(bytes) => Ok(bytes),
      other => {
        Err(CompileError::UnexpectedConstant { index, tag: other.tag() })
      }
    }
  }

  /// A utf8 constant used as a name or descriptor.
  pub fn utf8_str(&self, index: u16) -> Result<&str, CompileError> {
    let bytes = self.utf8(index)?;
    std::str::from_utf8(bytes).map_err(|e| CompileError::MalformedUtf8 {
      offset: e.valid_up_to(),
    })
  }

  pub fn class_name(&self, index: u16) -> Result<&str, CompileError> {
    match self.get(index)? {
      Constant::Class { name_index } => self.utf8_str(*name_index),
      other => {
        Err(CompileError::UnexpectedConstant { index, tag: other.tag() })
      }
    }
  }

  pub fn member_ref(&self, index: u16) -> Result<MemberRef, CompileError> {
    let (class_index, nat_index) = match self.get(index)? {
      Constant::FieldRef { class_index, name_and_type_index }
      | Constant::MethodRef { class_index, name_and_type_index }
      | Constant::InterfaceMethodRef { class_index, name_and_type_index } => {
        (*class_index, *name_and_type_index)
      }
      other => {
        return Err(CompileError::UnexpectedConstant {
          index,
          tag: other.tag(),
        })
      }
    };
    let (name_index, descriptor_index) = match self.get(nat_index)? {
      Constant::NameAndType { name_index, descriptor_index } => {
        (*name_index, *descriptor_index)
      }
      other => {
        return Err(CompileError::UnexpectedConstant {
          index: nat_index,
          tag: other.tag(),
        })
      }
    };
    Ok(MemberRef {
      class_name: self.class_name(class_index)?.to_string(),
      name: self.utf8_str(name_index)?.to_string(),
      descriptor: self.utf8_str(descriptor_index)?.to_string(),
    })
  }

  // Builders, used by class loaders and tests.

  pub fn add_utf8(&mut self, s: &str) -> u16 {
    self.push(Constant::Utf8(s.as_bytes().to_vec()))
  }

  pub fn add_class(&mut self, name: &str) -> u16 {
    let name_index = self.add_utf8(name);
    self.push(Constant::Class { name_index })
  }

  pub fn add_string(&mut self, s: &str) -> u16 {
    let string_index = self.add_utf8(s);
    self.push(Constant::String { string_index })
  }

  pub fn add_integer(&mut self, value: i32) -> u16 {
    self.push(Constant::Integer(value as u32))
  }

  pub fn add_float(&mut self, value: f32) -> u16 {
    self.push(Constant::Float(value.to_bits()))
  }

  pub fn add_long(&mut self, value: i64) -> u16 {
    let bits = value as u64;
    self.push(Constant::Long { high: (bits >> 32) as u32, low: bits as u32 })
  }

  pub fn add_double(&mut self, value: f64) -> u16 {
    let bits = value.to_bits();
    self.push(Constant::Double { high: (bits >> 32) as u32, low: bits as u32 })
  }

  fn add_name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
    let name_index = self.add_utf8(name);
    let descriptor_index = self.add_utf8(descriptor);
    self.push(Constant::NameAndType { name_index, descriptor_index })
  }

  pub fn add_field_ref(
    &mut self, class: &str, name: &str, descriptor: &str,
  ) -> u16 {
    let class_index = self.add_class(class);
    let name_and_type_index = self.add_name_and_type(name, descriptor);
    self.push(Constant::FieldRef { class_index, name_and_type_index })
  }

  pub fn add_method_ref(
    &mut self, class: &str, name: &str, descriptor: &str,
  ) -> u16 {
    let class_index = self.add_class(class);
    let name_and_type_index = self.add_name_and_type(name, descriptor);
    self.push(Constant::MethodRef { class_index, name_and_type_index })
  }
}

//=============================================================================
// Descriptors

/// A parsed method descriptor such as `(I[JLjava/lang/String;)V`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodDescriptor {
  pub args: Vec<VmType>,
  pub ret: VmType,
}

impl MethodDescriptor {
  pub fn parse(source: &str) -> Option<MethodDescriptor> {
    let bytes = source.as_bytes();
    if bytes.first() != Some(&b'(') {
      return None;
    }
    let mut args = Vec::new();
    let mut i = 1;
    loop {
      match bytes.get(i)? {
        b')' => {
          i += 1;
          break;
        }
        _ => {
          let (typ, len) = parse_field_type(&bytes[i..])?;
          args.push(typ);
          i += len;
        }
      }
    }
    let ret = if bytes.get(i) == Some(&b'V') && i + 1 == bytes.len() {
      VmType::Void
    } else {
      let (typ, len) = parse_field_type(&bytes[i..])?;
      if i + len != bytes.len() {
        return None;
      }
      typ
    };
    Some(MethodDescriptor { args, ret })
  }
}

/// Parses one field type; returns its kind and encoded length.
fn parse_field_type(bytes: &[u8]) -> Option<(VmType, usize)> {
  match bytes.first()? {
    b'L' => {
      let semi = bytes.iter().position(|&b| b == b';')?;
      if semi < 2 {
        return None;
      }
      Some((VmType::Reference, semi + 1))
    }
    b'[' => {
      let (_, len) = parse_field_type(&bytes[1..])?;
      Some((VmType::Reference, len + 1))
    }
    b'V' => None,
    &c => {
      let typ = VmType::from_descriptor(std::str::from_utf8(&[c]).ok()?)?;
      Some((typ, 1))
    }
  }
}

//=============================================================================
// Argument locations

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum ArgLocation {
  Register(MachineReg),
  Stack,
}

/// Where each argument of a method (receiver included) is passed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArgsMap {
  pub locations: Vec<ArgLocation>,
}

impl ArgsMap {
  pub fn new(locations: Vec<ArgLocation>) -> Self {
    Self { locations }
  }

  /// Arguments without an entry are passed on the stack.
  pub fn location(&self, index: usize) -> ArgLocation {
    self.locations.get(index).cloned().unwrap_or(ArgLocation::Stack)
  }

  pub fn stack_args_count(&self) -> usize {
    self.locations.iter().filter(|&&loc| loc == ArgLocation::Stack).count()
  }
}

//=============================================================================
// Classes and methods

pub struct Class {
  pub id: ClassId,
  pub name: String,
  pub constant_pool: ConstantPool,
}

impl fmt::Debug for Class {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(fmt, "{:?}:{}", self.id, self.name)
  }
}

/// A method, as handed over by the class loader.
pub struct Method {
  pub class: Arc<Class>,
  pub name: String,
  pub descriptor: String,
  pub code: Vec<u8>,
  pub is_static: bool,
  pub is_native: bool,
  pub args_map: Option<ArgsMap>,
  /// Serializes compilations of this method.
  pub jit: Mutex<JitState>,
}

impl fmt::Debug for Method {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(fmt, "{}.{}{}", self.class.name, self.name, self.descriptor)
  }
}

impl Method {
  pub fn new(
    class: Arc<Class>, name: &str, descriptor: &str, code: Vec<u8>,
    is_static: bool,
  ) -> Self {
    Self {
      class,
      name: name.to_string(),
      descriptor: descriptor.to_string(),
      code,
      is_static,
      is_native: false,
      args_map: None,
      jit: Mutex::new(JitState::default()),
    }
  }

  pub fn with_args_map(mut self, args_map: ArgsMap) -> Self {
    self.args_map = Some(args_map);
    self
  }
}

//=============================================================================
// Resolution results

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct ResolvedField {
  pub class: ClassId,
  pub name: String,
  pub vm_type: VmType,
  pub offset: u32,
  pub is_static: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedMethod {
  pub class: ClassId,
  pub name: String,
  pub descriptor: MethodDescriptor,
  pub is_static: bool,
  pub is_native: bool,
  pub args_map: Option<ArgsMap>,
}

impl ResolvedMethod {
  /// Number of operand stack values consumed by a call, receiver included.
  pub fn args_count(&self) -> usize {
    self.descriptor.args.len() + if self.is_static { 0 } else { 1 }
  }

  pub fn return_type(&self) -> VmType {
    self.descriptor.ret
  }

  pub fn stack_args_count(&self) -> usize {
    match &self.args_map {
      Some(map) => (0..self.args_count())
        .filter(|&i| map.location(i) == ArgLocation::Stack)
        .count(),
      None => self.args_count(),
    }
  }
}

//=============================================================================
// Collaborators

/// Class metadata resolution, provided by the class loader.
pub trait ClassResolver {
  fn resolve_class(
    &self, class: &Class, cp_index: u16,
  ) -> Result<ClassId, CompileError>;

  fn resolve_field(
    &self, class: &Class, cp_index: u16,
  ) -> Result<ResolvedField, CompileError>;

  fn resolve_method(
    &self, class: &Class, cp_index: u16,
  ) -> Result<ResolvedMethod, CompileError>;

  fn load_class(&self, name: &str) -> Result<ClassId, CompileError>;

  fn lookup_field(
    &self, class: ClassId, name: &str, descriptor: &str,
  ) -> Option<ResolvedField>;
}

/// Object allocation, provided by the memory manager.  Allocations return
/// `None` when memory is exhausted.
pub trait ObjectHeap {
  fn alloc_object(&self, class: ClassId) -> Option<ObjectRef>;

  fn alloc_char_array(&self, chars: &[u16]) -> Option<ObjectRef>;

  fn array_length(&self, array: ObjectRef) -> Option<u32>;

  fn store_int_field(&self, obj: ObjectRef, field: &ResolvedField, value: i32);

  fn store_ref_field(
    &self, obj: ObjectRef, field: &ResolvedField, value: ObjectRef,
  );
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pool_indices() {
    let mut cp = ConstantPool::new();
    let i = cp.add_integer(7);
    let l = cp.add_long(-2);
    let f = cp.add_float(1.5);
    assert_eq!(i, 1);
    assert_eq!(l, 2);
    assert_eq!(f, 4);
    assert!(cp.get(0).is_err());
    assert!(cp.get(3).is_err(), "second slot of a long is unusable");
    assert!(cp.get(5).is_err());
    assert_eq!(cp.get(1).unwrap(), &Constant::Integer(7));
    assert_eq!(
      cp.get(2).unwrap(),
      &Constant::Long { high: 0xffff_ffff, low: 0xffff_fffe }
    );
  }

  #[test]
  fn member_refs() {
    let mut cp = ConstantPool::new();
    let idx = cp.add_field_ref("Foo", "bar", "I");
    let member = cp.member_ref(idx).unwrap();
    assert_eq!(member.class_name, "Foo");
    assert_eq!(member.name, "bar");
    assert_eq!(member.descriptor, "I");
    match cp.member_ref(1) {
      Err(CompileError::UnexpectedConstant {
        index: 1,
        tag: CONSTANT_UTF8,
      }) => {}
      other => panic!("unexpected {:?}", other),
    }
  }

  #[test]
  fn method_descriptors() {
    let d = MethodDescriptor::parse("(I[JLjava/lang/String;)V").unwrap();
    assert_eq!(d.args, vec![VmType::Int, VmType::Reference, VmType::Reference]);
    assert_eq!(d.ret, VmType::Void);
    let d = MethodDescriptor::parse("()J").unwrap();
    assert!(d.args.is_empty());
    assert_eq!(d.ret, VmType::Long);
    assert!(MethodDescriptor::parse("(V)V").is_none());
    assert!(MethodDescriptor::parse("(I").is_none());
    assert!(MethodDescriptor::parse("()").is_none());
    assert!(MethodDescriptor::parse("()VV").is_none());
  }

  #[test]
  fn args_map_defaults_to_stack() {
    let map = ArgsMap::new(vec![
      ArgLocation::Register(MachineReg::new(0)),
      ArgLocation::Stack,
    ]);
    assert_eq!(map.location(0), ArgLocation::Register(MachineReg::new(0)));
    assert_eq!(map.location(5), ArgLocation::Stack);
    assert_eq!(map.stack_args_count(), 1);

    let method = ResolvedMethod {
      class: ClassId(0),
      name: "m".to_string(),
      descriptor: MethodDescriptor::parse("(II)V").unwrap(),
      is_static: false,
      is_native: false,
      args_map: Some(map),
    };
    assert_eq!(method.args_count(), 3);
    assert_eq!(method.stack_args_count(), 2);
  }
}
