/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! A small in-memory virtual machine, for tests and fuzzing: a class
//! registry that resolves constant pool references by name, and a heap of
//! plain objects and char arrays.

use log::trace;

use std::sync::{Arc, Mutex, MutexGuard};

use crate::class_model::{
  Class, ClassId, ClassResolver, ConstantPool, Method, MethodDescriptor,
  ObjectHeap, ObjectRef, ResolvedField, ResolvedMethod,
};
use crate::data_structures::{Map, VmType};
use crate::interface::CompileError;

pub const STRING_CLASS: &str = "java/lang/String";

/// The class every method built by `TestVm` belongs to.
pub const TEST_CLASS: &str = "Test";

#[derive(Clone, Debug)]
struct FieldDef {
  name: String,
  descriptor: String,
  field: ResolvedField,
}

#[derive(Clone, Debug)]
struct MethodDef {
  name: String,
  descriptor: String,
  is_static: bool,
  is_native: bool,
}

#[derive(Clone, Debug)]
struct ClassDef {
  name: String,
  fields: Vec<FieldDef>,
  methods: Vec<MethodDef>,
  next_field_offset: u32,
}

#[derive(Clone, Debug)]
enum HeapObject {
  Object { class: ClassId, fields: Map<u32, u64> },
  CharArray(Vec<u16>),
}

struct State {
  classes: Vec<ClassDef>,
  by_name: Map<String, ClassId>,
  /// The constant pool of the test class, as built so far.
  pool: ConstantPool,
  heap: Vec<HeapObject>,
  heap_limit: Option<usize>,
}

impl State {
  fn class_id(&self, name: &str) -> Result<ClassId, CompileError> {
    self
      .by_name
      .get(name)
      .cloned()
      .ok_or_else(|| CompileError::UnresolvedClass(name.to_string()))
  }

  fn class(&self, id: ClassId) -> &ClassDef {
    &self.classes[id.0 as usize]
  }

  fn alloc(&mut self, object: HeapObject) -> Option<ObjectRef> {
    if let Some(limit) = self.heap_limit {
      if self.heap.len() >= limit {
        trace!("test heap: out of memory at {} object(s)", self.heap.len());
        return None;
      }
    }
    self.heap.push(object);
    // Zero stays the null reference.
    Some(ObjectRef(self.heap.len() as u64))
  }

  fn object(&self, obj: ObjectRef) -> Option<&HeapObject> {
    if obj.0 == 0 {
      return None;
    }
    self.heap.get(obj.0 as usize - 1)
  }
}

pub struct TestVm {
  state: Mutex<State>,
}

impl Default for TestVm {
  fn default() -> Self {
    Self::new()
  }
}

impl TestVm {
  /// A VM knowing `java/lang/String` and the test class.
  pub fn new() -> Self {
    let vm = TestVm {
      state: Mutex::new(State {
        classes: Vec::new(),
        by_name: Map::default(),
        pool: ConstantPool::new(),
        heap: Vec::new(),
        heap_limit: None,
      }),
    };
    let string = vm.define_class(STRING_CLASS);
    vm.define_field(string, "value", "[C", false);
    vm.define_field(string, "offset", "I", false);
    vm.define_field(string, "count", "I", false);
    vm.define_class(TEST_CLASS);
    vm
  }

  fn lock(&self) -> MutexGuard<State> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  pub fn define_class(&self, name: &str) -> ClassId {
    let mut state = self.lock();
    if let Some(&id) = state.by_name.get(name) {
      return id;
    }
    let id = ClassId(state.classes.len() as u32);
    state.classes.push(ClassDef {
      name: name.to_string(),
      fields: Vec::new(),
      methods: Vec::new(),
      next_field_offset: 0,
    });
    state.by_name.insert(name.to_string(), id);
    id
  }

  /// Fields are laid out one after the other, eight bytes each.
  pub fn define_field(
    &self, class: ClassId, name: &str, descriptor: &str, is_static: bool,
  ) -> ResolvedField {
    let mut state = self.lock();
    let def = &mut state.classes[class.0 as usize];
    let field = ResolvedField {
      class,
      name: name.to_string(),
      vm_type: VmType::from_descriptor(descriptor).unwrap_or(VmType::Int),
      offset: def.next_field_offset,
      is_static,
    };
    def.next_field_offset += 8;
    def.fields.push(FieldDef {
      name: name.to_string(),
      descriptor: descriptor.to_string(),
      field: field.clone(),
    });
    field
  }

  pub fn define_method(
    &self, class: ClassId, name: &str, descriptor: &str, is_static: bool,
    is_native: bool,
  ) {
    let mut state = self.lock();
    state.classes[class.0 as usize].methods.push(MethodDef {
      name: name.to_string(),
      descriptor: descriptor.to_string(),
      is_static,
      is_native,
    });
  }

  /// Adds to the test class's constant pool; returns the new index.
  pub fn add_constant<F: FnOnce(&mut ConstantPool) -> u16>(&self, f: F) -> u16 {
    f(&mut self.lock().pool)
  }

  /// A static `()V` method of the test class, seeing the constant pool as
  /// built so far.
  pub fn method_with_code(&self, code: Vec<u8>) -> Arc<Method> {
    let class = {
      let state = self.lock();
      let id = state.by_name.get(TEST_CLASS).cloned().unwrap_or(ClassId(0));
      Arc::new(Class {
        id,
        name: TEST_CLASS.to_string(),
        constant_pool: state.pool.clone(),
      })
    };
    Arc::new(Method::new(class, "test", "()V", code, true))
  }

  /// Caps the number of heap objects; `None` removes the cap.
  pub fn set_heap_limit(&self, limit: Option<usize>) {
    self.lock().heap_limit = limit;
  }

  pub fn heap_size(&self) -> usize {
    self.lock().heap.len()
  }

  /// The text of a string object built by the compiler.
  pub fn string_value(&self, obj: ObjectRef) -> Option<String> {
    let state = self.lock();
    let string = state.class_id(STRING_CLASS).ok()?;
    let fields = match state.object(obj)? {
      HeapObject::Object { class, fields } if *class == string => fields,
      _ => return None,
    };
    let field = |name: &str| {
      state
        .class(string)
        .fields
        .iter()
        .find(|f| f.name == name)
        .and_then(|f| fields.get(&f.field.offset).cloned())
    };
    let offset = field("offset")? as usize;
    let count = field("count")? as usize;
    let chars = match state.object(ObjectRef(field("value")?))? {
      HeapObject::CharArray(chars) => chars,
      _ => return None,
    };
    Some(String::from_utf16_lossy(chars.get(offset..offset + count)?))
  }
}

/// A method of a class without constant pool entries, for tests that do not
/// resolve anything.
pub fn test_method(code: Vec<u8>, is_static: bool) -> Method {
  let class = Arc::new(Class {
    id: ClassId(0),
    name: TEST_CLASS.to_string(),
    constant_pool: ConstantPool::new(),
  });
  Method::new(class, "test", "()V", code, is_static)
}

impl ClassResolver for TestVm {
  fn resolve_class(
    &self, class: &Class, cp_index: u16,
  ) -> Result<ClassId, CompileError> {
    let name = class.constant_pool.class_name(cp_index)?;
    self.lock().class_id(name)
  }

  fn resolve_field(
    &self, class: &Class, cp_index: u16,
  ) -> Result<ResolvedField, CompileError> {
    let member = class.constant_pool.member_ref(cp_index)?;
    let state = self.lock();
    let id = state.class_id(&member.class_name)?;
    state
      .class(id)
      .fields
      .iter()
      .find(|f| f.name == member.name && f.descriptor == member.descriptor)
      .map(|f| f.field.clone())
      .ok_or(CompileError::UnresolvedField {
        class: member.class_name,
        name: member.name,
      })
  }

  fn resolve_method(
    &self, class: &Class, cp_index: u16,
  ) -> Result<ResolvedMethod, CompileError> {
    let member = class.constant_pool.member_ref(cp_index)?;
    let state = self.lock();
    let id = state.class_id(&member.class_name)?;
    let def = state
      .class(id)
      .methods
      .iter()
      .find(|m| m.name == member.name && m.descriptor == member.descriptor)
      .ok_or_else(|| CompileError::UnresolvedMethod {
        class: member.class_name.clone(),
        name: member.name.clone(),
      })?;
    let descriptor = MethodDescriptor::parse(&def.descriptor)
      .ok_or_else(|| CompileError::InvalidDescriptor(def.descriptor.clone()))?;
    Ok(ResolvedMethod {
      class: id,
      name: def.name.clone(),
      descriptor,
      is_static: def.is_static,
      is_native: def.is_native,
      args_map: None,
    })
  }

  fn load_class(&self, name: &str) -> Result<ClassId, CompileError> {
    self.lock().class_id(name)
  }

  fn lookup_field(
    &self, class: ClassId, name: &str, descriptor: &str,
  ) -> Option<ResolvedField> {
    let state = self.lock();
    let def = state.classes.get(class.0 as usize)?;
    def
      .fields
      .iter()
      .find(|f| f.name == name && f.descriptor == descriptor)
      .map(|f| f.field.clone())
  }
}

impl ObjectHeap for TestVm {
  fn alloc_object(&self, class: ClassId) -> Option<ObjectRef> {
    self.lock().alloc(HeapObject::Object { class, fields: Map::default() })
  }

  fn alloc_char_array(&self, chars: &[u16]) -> Option<ObjectRef> {
    self.lock().alloc(HeapObject::CharArray(chars.to_vec()))
  }

  fn array_length(&self, array: ObjectRef) -> Option<u32> {
    match self.lock().object(array)? {
      HeapObject::CharArray(chars) => Some(chars.len() as u32),
      HeapObject::Object { .. } => None,
    }
  }

  fn store_int_field(&self, obj: ObjectRef, field: &ResolvedField, value: i32) {
    let mut state = self.lock();
    if obj.0 == 0 {
      return;
    }
    if let Some(HeapObject::Object { fields, .. }) =
      state.heap.get_mut(obj.0 as usize - 1)
    {
      fields.insert(field.offset, value as u32 as u64);
    }
  }

  fn store_ref_field(
    &self, obj: ObjectRef, field: &ResolvedField, value: ObjectRef,
  ) {
    let mut state = self.lock();
    if obj.0 == 0 {
      return;
    }
    if let Some(HeapObject::Object { fields, .. }) =
      state.heap.get_mut(obj.0 as usize - 1)
    {
      fields.insert(field.offset, value.0);
    }
  }
}
