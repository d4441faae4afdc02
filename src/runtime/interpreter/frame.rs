use std::sync::Arc;

use crate::errors::{VmError, VmResult};
use crate::runtime::object::{ArrayObject, ClassObject, Instance, Value};

/// One method activation: the class object providing constant-pool context,
/// the instruction pointer, the code bytes, the local-variable slots, and
/// the operand stack. Frames never outlive their invocation.
pub(crate) struct Frame {
    pub(super) class: Arc<ClassObject>,
    pub(super) ip: usize,
    pub(super) code: Arc<[u8]>,
    pub(super) locals: Vec<Value>,
    pub(super) stack: Vec<Value>,
}

impl Frame {
    pub(crate) fn new(
        class: Arc<ClassObject>,
        code: Arc<[u8]>,
        max_locals: u16,
        max_stack: u16,
        args: Vec<Value>,
    ) -> Frame {
        let mut locals = vec![Value::Null; (max_locals as usize).max(args.len())];
        for (slot, arg) in locals.iter_mut().zip(args) {
            *slot = arg;
        }
        Frame {
            class,
            ip: 0,
            code,
            locals,
            stack: Vec::with_capacity(max_stack as usize),
        }
    }

    pub(super) fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub(super) fn pop(&mut self) -> VmResult<Value> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    pub(super) fn pop_int(&mut self) -> VmResult<i32> {
        match self.pop()? {
            Value::Int(v) => Ok(v),
            other => Err(type_mismatch("int", &other)),
        }
    }

    pub(super) fn pop_long(&mut self) -> VmResult<i64> {
        match self.pop()? {
            Value::Long(v) => Ok(v),
            other => Err(type_mismatch("long", &other)),
        }
    }

    pub(super) fn pop_float(&mut self) -> VmResult<f32> {
        match self.pop()? {
            Value::Float(v) => Ok(v),
            other => Err(type_mismatch("float", &other)),
        }
    }

    pub(super) fn pop_double(&mut self) -> VmResult<f64> {
        match self.pop()? {
            Value::Double(v) => Ok(v),
            other => Err(type_mismatch("double", &other)),
        }
    }

    pub(super) fn pop_instance(&mut self) -> VmResult<Arc<Instance>> {
        match self.pop()? {
            Value::Instance(instance) => Ok(instance),
            other => Err(type_mismatch("instance reference", &other)),
        }
    }

    pub(super) fn pop_array(&mut self) -> VmResult<Arc<ArrayObject>> {
        match self.pop()? {
            Value::Array(array) => Ok(array),
            other => Err(type_mismatch("array reference", &other)),
        }
    }

    pub(super) fn load(&mut self, slot: usize) -> VmResult<()> {
        let value = self
            .locals
            .get(slot)
            .cloned()
            .ok_or(VmError::LocalOutOfRange(slot))?;
        self.push(value);
        Ok(())
    }

    pub(super) fn store(&mut self, slot: usize) -> VmResult<()> {
        let value = self.pop()?;
        if self.locals.len() < slot + 1 {
            self.locals.resize(slot + 1, Value::Null);
        }
        self.locals[slot] = value;
        Ok(())
    }

    pub(super) fn local_mut(&mut self, slot: usize) -> VmResult<&mut Value> {
        self.locals
            .get_mut(slot)
            .ok_or(VmError::LocalOutOfRange(slot))
    }

    // Operand readers advance the instruction pointer past the bytes they
    // consume, so the dispatch loop's trailing increment lands on the next
    // opcode.
    pub(super) fn u8_arg(&mut self) -> VmResult<u8> {
        let byte = *self
            .code
            .get(self.ip + 1)
            .ok_or(VmError::PcOutOfBounds(self.ip + 1))?;
        self.ip += 1;
        Ok(byte)
    }

    pub(super) fn i8_arg(&mut self) -> VmResult<i8> {
        Ok(self.u8_arg()? as i8)
    }

    pub(super) fn u16_arg(&mut self) -> VmResult<u16> {
        if self.ip + 2 >= self.code.len() {
            return Err(VmError::PcOutOfBounds(self.ip + 2));
        }
        let byte1 = self.code[self.ip + 1] as u16;
        let byte2 = self.code[self.ip + 2] as u16;
        self.ip += 2;
        Ok((byte1 << 8) | byte2)
    }

    pub(super) fn i16_arg(&mut self) -> VmResult<i16> {
        Ok(self.u16_arg()? as i16)
    }
}

fn type_mismatch(expected: &'static str, found: &Value) -> VmError {
    VmError::TypeMismatch {
        expected,
        found: found.kind(),
    }
}
