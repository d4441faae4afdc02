use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::class::{Class, ConstantPoolInfo, MethodInfo};
use crate::errors::{VmError, VmResult};

/// One operand-stack or local-variable slot. The type travels with the
/// value; longs and doubles take a single slot in this model.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(Arc<str>),
    Class(Arc<ClassObject>),
    Instance(Arc<Instance>),
    Array(Arc<ArrayObject>),
}

impl Value {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Str(_) => "string",
            Value::Class(_) => "class reference",
            Value::Instance(_) => "instance reference",
            Value::Array(_) => "array reference",
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Class(c) => write!(f, "{c:?}"),
            Value::Instance(i) => write!(f, "{i:?}"),
            Value::Array(a) => write!(f, "{a:?}"),
        }
    }
}

// Numerics and strings compare by value, references by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Class(a), Value::Class(b)) => Arc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Arc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(Arc::from(v))
    }
}

/// The runtime singleton for one loaded class: the immutable [`Class`], a
/// link to the super class object, and the static field map. Static fields
/// are sparse; reading one that was never stored yields [`Value::Null`].
pub struct ClassObject {
    class: Class,
    super_class: Option<Arc<ClassObject>>,
    statics: RwLock<HashMap<Arc<str>, Value>>,
}

impl ClassObject {
    pub(crate) fn new(class: Class, super_class: Option<Arc<ClassObject>>) -> Arc<ClassObject> {
        Arc::new(ClassObject {
            class,
            super_class,
            statics: RwLock::new(HashMap::new()),
        })
    }

    pub fn name(&self) -> &Arc<str> {
        &self.class.name
    }

    pub fn class(&self) -> &Class {
        &self.class
    }

    pub fn super_class(&self) -> Option<&Arc<ClassObject>> {
        self.super_class.as_ref()
    }

    pub fn static_field(&self, name: &str) -> Value {
        self.statics.read().get(name).cloned().unwrap_or(Value::Null)
    }

    pub fn set_static_field(&self, name: &str, value: Value) {
        self.statics.write().insert(Arc::from(name), value);
    }

    pub fn method(&self, name: &str, descriptor: Option<&str>) -> Option<&MethodInfo> {
        self.class.method(name, descriptor)
    }

    pub fn new_instance(self: &Arc<Self>) -> Arc<Instance> {
        Arc::new(Instance {
            class: Arc::clone(self),
            fields: RwLock::new(HashMap::new()),
        })
    }

    pub(crate) fn constant(&self, index: u16) -> VmResult<&ConstantPoolInfo> {
        self.class.constant_pool.get(index)
    }
}

impl Debug for ClassObject {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "class {}", self.class.name)
    }
}

/// One guest object, allocated by `new`. Fields are sparse like statics.
pub struct Instance {
    class: Arc<ClassObject>,
    fields: RwLock<HashMap<Arc<str>, Value>>,
}

impl Instance {
    pub fn class(&self) -> &Arc<ClassObject> {
        &self.class
    }

    pub fn field(&self, name: &str) -> Value {
        self.fields.read().get(name).cloned().unwrap_or(Value::Null)
    }

    pub fn set_field(&self, name: &str, value: Value) {
        self.fields.write().insert(Arc::from(name), value);
    }
}

impl Debug for Instance {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "instance of {}", self.class.name())
    }
}

/// A fixed-length backing store shared by reference.
pub struct ArrayObject {
    elements: RwLock<Vec<Value>>,
}

impl ArrayObject {
    pub(crate) fn filled(len: usize, fill: Value) -> Arc<ArrayObject> {
        Arc::new(ArrayObject {
            elements: RwLock::new(vec![fill; len]),
        })
    }

    pub fn len(&self) -> usize {
        self.elements.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.read().is_empty()
    }

    pub fn get(&self, index: i32) -> VmResult<Value> {
        let elements = self.elements.read();
        usize::try_from(index)
            .ok()
            .and_then(|i| elements.get(i).cloned())
            .ok_or(VmError::IndexOutOfBounds {
                index,
                len: elements.len(),
            })
    }

    pub fn set(&self, index: i32, value: Value) -> VmResult<()> {
        let mut elements = self.elements.write();
        let len = elements.len();
        let slot = usize::try_from(index)
            .ok()
            .and_then(|i| elements.get_mut(i))
            .ok_or(VmError::IndexOutOfBounds { index, len })?;
        *slot = value;
        Ok(())
    }
}

impl Debug for ArrayObject {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "array of length {}", self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_fields_read_as_null() {
        let array = ArrayObject::filled(2, Value::Int(0));
        assert_eq!(array.get(0).unwrap(), Value::Int(0));
        assert!(array.get(2).is_err());
        assert!(array.get(-1).is_err());
    }

    #[test]
    fn array_set_respects_bounds() {
        let array = ArrayObject::filled(3, Value::Null);
        array.set(1, Value::Int(9)).unwrap();
        assert_eq!(array.get(1).unwrap(), Value::Int(9));
        assert!(matches!(
            array.set(3, Value::Null),
            Err(VmError::IndexOutOfBounds { index: 3, len: 3 })
        ));
    }

    #[test]
    fn value_equality_is_identity_for_references() {
        let a = ArrayObject::filled(1, Value::Null);
        let b = ArrayObject::filled(1, Value::Null);
        assert_eq!(Value::Array(Arc::clone(&a)), Value::Array(a));
        let c = ArrayObject::filled(1, Value::Null);
        assert_ne!(Value::Array(b), Value::Array(c));
        assert_eq!(Value::from("x"), Value::from("x"));
        assert_ne!(Value::Int(1), Value::Long(1));
    }
}
