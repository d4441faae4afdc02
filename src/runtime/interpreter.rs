mod frame;
pub(crate) mod instructions;

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::{debug, trace};

pub(crate) use frame::Frame;

use crate::class::{ConstantPoolInfo, MethodInfo};
use crate::descriptor;
use crate::errors::{VmError, VmResult};
use crate::runtime::object::{ArrayObject, ClassObject, Value};
use crate::vm::Vm;

impl Vm {
    /// Runs a resolved method: the bytecode body when a `Code` attribute
    /// exists, the registered native otherwise. Positional arguments land in
    /// the first local slots; for instance methods the receiver is slot 0.
    pub(crate) fn run_method(
        &self,
        class: &Arc<ClassObject>,
        method: &MethodInfo,
        args: Vec<Value>,
    ) -> VmResult<Value> {
        if let Some(code) = method.code() {
            let frame = Frame::new(
                Arc::clone(class),
                Arc::clone(&code.code),
                code.max_locals,
                code.max_stack,
                args,
            );
            self.exec(frame)
        } else if let Some(native) = self.natives.get(class.name(), &method.name) {
            debug!(class = %class.name(), method = %method.name, "dispatching native");
            Ok(native(&args)?.unwrap_or(Value::Null))
        } else {
            Err(VmError::CodeMissing {
                class: class.name().to_string(),
                method: method.name.to_string(),
            })
        }
    }

    fn invoke(
        &self,
        class: &Arc<ClassObject>,
        name: &str,
        descriptor: &str,
        args: Vec<Value>,
    ) -> VmResult<Value> {
        let method =
            class
                .method(name, Some(descriptor))
                .ok_or_else(|| VmError::MethodNotFound {
                    class: class.name().to_string(),
                    method: name.to_string(),
                    descriptor: descriptor.to_string(),
                })?;
        self.run_method(class, method, args)
    }

    // The dispatch loop. Handlers consume their operand bytes through the
    // frame's readers, so the trailing `ip += 1` always lands on the next
    // opcode; taken branches set `ip` themselves and `continue` past it.
    fn exec(&self, mut frame: Frame) -> VmResult<Value> {
        use instructions as inst;
        loop {
            let op = *frame
                .code
                .get(frame.ip)
                .ok_or(VmError::PcOutOfBounds(frame.ip))?;
            trace!("ip={:#06x} op={:#04x} stack={}", frame.ip, op, frame.stack.len());
            match op {
                inst::NOP => {}

                // constants
                inst::ACONST_NULL => frame.push(Value::Null),
                inst::ICONST_M1 => frame.push(Value::Int(-1)),
                inst::ICONST_0 => frame.push(Value::Int(0)),
                inst::ICONST_1 => frame.push(Value::Int(1)),
                inst::ICONST_2 => frame.push(Value::Int(2)),
                inst::ICONST_3 => frame.push(Value::Int(3)),
                inst::ICONST_4 => frame.push(Value::Int(4)),
                inst::ICONST_5 => frame.push(Value::Int(5)),
                inst::LCONST_0 => frame.push(Value::Long(0)),
                inst::LCONST_1 => frame.push(Value::Long(1)),
                inst::FCONST_0 => frame.push(Value::Float(0.0)),
                inst::FCONST_1 => frame.push(Value::Float(1.0)),
                inst::FCONST_2 => frame.push(Value::Float(2.0)),
                inst::DCONST_0 => frame.push(Value::Double(0.0)),
                inst::DCONST_1 => frame.push(Value::Double(1.0)),

                inst::BIPUSH => {
                    let byte = frame.i8_arg()?;
                    frame.push(Value::Int(byte as i32));
                }
                inst::SIPUSH => {
                    let short = frame.i16_arg()?;
                    frame.push(Value::Int(short as i32));
                }

                inst::LDC => {
                    let index = frame.u8_arg()? as u16;
                    let value = constant_value(&frame.class, index)?;
                    frame.push(value);
                }
                inst::LDC_W => {
                    let index = frame.u16_arg()?;
                    let value = constant_value(&frame.class, index)?;
                    frame.push(value);
                }
                inst::LDC2_W => {
                    let index = frame.u16_arg()?;
                    let value = match frame.class.constant(index)? {
                        ConstantPoolInfo::Long(v) => Value::Long(*v),
                        ConstantPoolInfo::Double(v) => Value::Double(*v),
                        _ => return Err(VmError::InvalidConstant(index)),
                    };
                    frame.push(value);
                }

                // loads; the type in the name is advisory, every slot is one
                // tagged value
                inst::ILOAD | inst::LLOAD | inst::FLOAD | inst::DLOAD | inst::ALOAD => {
                    let slot = frame.u8_arg()? as usize;
                    frame.load(slot)?;
                }
                inst::ILOAD_0 | inst::LLOAD_0 | inst::FLOAD_0 | inst::DLOAD_0 | inst::ALOAD_0 => {
                    frame.load(0)?;
                }
                inst::ILOAD_1 | inst::LLOAD_1 | inst::FLOAD_1 | inst::DLOAD_1 | inst::ALOAD_1 => {
                    frame.load(1)?;
                }
                inst::ILOAD_2 | inst::LLOAD_2 | inst::FLOAD_2 | inst::DLOAD_2 | inst::ALOAD_2 => {
                    frame.load(2)?;
                }
                inst::ILOAD_3 | inst::LLOAD_3 | inst::FLOAD_3 | inst::DLOAD_3 | inst::ALOAD_3 => {
                    frame.load(3)?;
                }

                inst::IALOAD
                | inst::LALOAD
                | inst::FALOAD
                | inst::DALOAD
                | inst::AALOAD
                | inst::BALOAD
                | inst::CALOAD
                | inst::SALOAD => {
                    let index = frame.pop_int()?;
                    let array = frame.pop_array()?;
                    frame.push(array.get(index)?);
                }

                // stores
                inst::ISTORE | inst::LSTORE | inst::FSTORE | inst::DSTORE | inst::ASTORE => {
                    let slot = frame.u8_arg()? as usize;
                    frame.store(slot)?;
                }
                inst::ISTORE_0 | inst::LSTORE_0 | inst::FSTORE_0 | inst::DSTORE_0
                | inst::ASTORE_0 => {
                    frame.store(0)?;
                }
                inst::ISTORE_1 | inst::LSTORE_1 | inst::FSTORE_1 | inst::DSTORE_1
                | inst::ASTORE_1 => {
                    frame.store(1)?;
                }
                inst::ISTORE_2 | inst::LSTORE_2 | inst::FSTORE_2 | inst::DSTORE_2
                | inst::ASTORE_2 => {
                    frame.store(2)?;
                }
                inst::ISTORE_3 | inst::LSTORE_3 | inst::FSTORE_3 | inst::DSTORE_3
                | inst::ASTORE_3 => {
                    frame.store(3)?;
                }

                inst::IASTORE
                | inst::LASTORE
                | inst::FASTORE
                | inst::DASTORE
                | inst::AASTORE
                | inst::BASTORE
                | inst::CASTORE
                | inst::SASTORE => {
                    let value = frame.pop()?;
                    let index = frame.pop_int()?;
                    let array = frame.pop_array()?;
                    array.set(index, value)?;
                }

                // stack
                inst::POP => {
                    frame.pop()?;
                }
                inst::DUP => {
                    let top = frame.stack.last().cloned().ok_or(VmError::StackUnderflow)?;
                    frame.push(top);
                }
                inst::SWAP => {
                    let a = frame.pop()?;
                    let b = frame.pop()?;
                    frame.push(a);
                    frame.push(b);
                }

                // arithmetic; sub/div/rem compute `b op a` with a popped
                // first, integer overflow wraps
                inst::IADD => {
                    let a = frame.pop_int()?;
                    let b = frame.pop_int()?;
                    frame.push(Value::Int(b.wrapping_add(a)));
                }
                inst::LADD => {
                    let a = frame.pop_long()?;
                    let b = frame.pop_long()?;
                    frame.push(Value::Long(b.wrapping_add(a)));
                }
                inst::FADD => {
                    let a = frame.pop_float()?;
                    let b = frame.pop_float()?;
                    frame.push(Value::Float(b + a));
                }
                inst::DADD => {
                    let a = frame.pop_double()?;
                    let b = frame.pop_double()?;
                    frame.push(Value::Double(b + a));
                }
                inst::ISUB => {
                    let a = frame.pop_int()?;
                    let b = frame.pop_int()?;
                    frame.push(Value::Int(b.wrapping_sub(a)));
                }
                inst::LSUB => {
                    let a = frame.pop_long()?;
                    let b = frame.pop_long()?;
                    frame.push(Value::Long(b.wrapping_sub(a)));
                }
                inst::FSUB => {
                    let a = frame.pop_float()?;
                    let b = frame.pop_float()?;
                    frame.push(Value::Float(b - a));
                }
                inst::DSUB => {
                    let a = frame.pop_double()?;
                    let b = frame.pop_double()?;
                    frame.push(Value::Double(b - a));
                }
                inst::IMUL => {
                    let a = frame.pop_int()?;
                    let b = frame.pop_int()?;
                    frame.push(Value::Int(b.wrapping_mul(a)));
                }
                inst::LMUL => {
                    let a = frame.pop_long()?;
                    let b = frame.pop_long()?;
                    frame.push(Value::Long(b.wrapping_mul(a)));
                }
                inst::FMUL => {
                    let a = frame.pop_float()?;
                    let b = frame.pop_float()?;
                    frame.push(Value::Float(b * a));
                }
                inst::DMUL => {
                    let a = frame.pop_double()?;
                    let b = frame.pop_double()?;
                    frame.push(Value::Double(b * a));
                }
                inst::IDIV => {
                    let a = frame.pop_int()?;
                    let b = frame.pop_int()?;
                    if a == 0 {
                        return Err(VmError::DivisionByZero);
                    }
                    frame.push(Value::Int(b.wrapping_div(a)));
                }
                inst::LDIV => {
                    let a = frame.pop_long()?;
                    let b = frame.pop_long()?;
                    if a == 0 {
                        return Err(VmError::DivisionByZero);
                    }
                    frame.push(Value::Long(b.wrapping_div(a)));
                }
                inst::FDIV => {
                    let a = frame.pop_float()?;
                    let b = frame.pop_float()?;
                    frame.push(Value::Float(b / a));
                }
                inst::DDIV => {
                    let a = frame.pop_double()?;
                    let b = frame.pop_double()?;
                    frame.push(Value::Double(b / a));
                }
                inst::IREM => {
                    let a = frame.pop_int()?;
                    let b = frame.pop_int()?;
                    if a == 0 {
                        return Err(VmError::DivisionByZero);
                    }
                    frame.push(Value::Int(b.wrapping_rem(a)));
                }
                inst::LREM => {
                    let a = frame.pop_long()?;
                    let b = frame.pop_long()?;
                    if a == 0 {
                        return Err(VmError::DivisionByZero);
                    }
                    frame.push(Value::Long(b.wrapping_rem(a)));
                }
                inst::FREM => {
                    let a = frame.pop_float()?;
                    let b = frame.pop_float()?;
                    frame.push(Value::Float(b % a));
                }
                inst::DREM => {
                    let a = frame.pop_double()?;
                    let b = frame.pop_double()?;
                    frame.push(Value::Double(b % a));
                }
                inst::INEG => {
                    let v = frame.pop_int()?;
                    frame.push(Value::Int(v.wrapping_neg()));
                }
                inst::LNEG => {
                    let v = frame.pop_long()?;
                    frame.push(Value::Long(v.wrapping_neg()));
                }
                inst::FNEG => {
                    let v = frame.pop_float()?;
                    frame.push(Value::Float(-v));
                }
                inst::DNEG => {
                    let v = frame.pop_double()?;
                    frame.push(Value::Double(-v));
                }

                // shifts mask the count to the operand width
                inst::ISHL => {
                    let a = frame.pop_int()?;
                    let b = frame.pop_int()?;
                    frame.push(Value::Int(b.wrapping_shl(a as u32 & 0x1f)));
                }
                inst::LSHL => {
                    let a = frame.pop_int()?;
                    let b = frame.pop_long()?;
                    frame.push(Value::Long(b.wrapping_shl(a as u32 & 0x3f)));
                }
                inst::ISHR => {
                    let a = frame.pop_int()?;
                    let b = frame.pop_int()?;
                    frame.push(Value::Int(b.wrapping_shr(a as u32 & 0x1f)));
                }
                inst::LSHR => {
                    let a = frame.pop_int()?;
                    let b = frame.pop_long()?;
                    frame.push(Value::Long(b.wrapping_shr(a as u32 & 0x3f)));
                }
                inst::IUSHR => {
                    let a = frame.pop_int()?;
                    let b = frame.pop_int()?;
                    frame.push(Value::Int(((b as u32) >> (a as u32 & 0x1f)) as i32));
                }
                inst::LUSHR => {
                    let a = frame.pop_int()?;
                    let b = frame.pop_long()?;
                    frame.push(Value::Long(((b as u64) >> (a as u32 & 0x3f)) as i64));
                }
                inst::IAND => {
                    let a = frame.pop_int()?;
                    let b = frame.pop_int()?;
                    frame.push(Value::Int(b & a));
                }
                inst::LAND => {
                    let a = frame.pop_long()?;
                    let b = frame.pop_long()?;
                    frame.push(Value::Long(b & a));
                }
                inst::IOR => {
                    let a = frame.pop_int()?;
                    let b = frame.pop_int()?;
                    frame.push(Value::Int(b | a));
                }
                inst::LOR => {
                    let a = frame.pop_long()?;
                    let b = frame.pop_long()?;
                    frame.push(Value::Long(b | a));
                }
                inst::IXOR => {
                    let a = frame.pop_int()?;
                    let b = frame.pop_int()?;
                    frame.push(Value::Int(b ^ a));
                }
                inst::LXOR => {
                    let a = frame.pop_long()?;
                    let b = frame.pop_long()?;
                    frame.push(Value::Long(b ^ a));
                }

                inst::IINC => {
                    let slot = frame.u8_arg()? as usize;
                    let delta = frame.i8_arg()? as i32;
                    match frame.local_mut(slot)? {
                        Value::Int(v) => *v = v.wrapping_add(delta),
                        other => {
                            return Err(VmError::TypeMismatch {
                                expected: "int",
                                found: other.kind(),
                            })
                        }
                    }
                }

                // conversions; float to int casts saturate, NaN becomes 0
                inst::I2L => {
                    let v = frame.pop_int()?;
                    frame.push(Value::Long(v as i64));
                }
                inst::I2F => {
                    let v = frame.pop_int()?;
                    frame.push(Value::Float(v as f32));
                }
                inst::I2D => {
                    let v = frame.pop_int()?;
                    frame.push(Value::Double(v as f64));
                }
                inst::L2I => {
                    let v = frame.pop_long()?;
                    frame.push(Value::Int(v as i32));
                }
                inst::L2F => {
                    let v = frame.pop_long()?;
                    frame.push(Value::Float(v as f32));
                }
                inst::L2D => {
                    let v = frame.pop_long()?;
                    frame.push(Value::Double(v as f64));
                }
                inst::F2I => {
                    let v = frame.pop_float()?;
                    frame.push(Value::Int(v as i32));
                }
                inst::F2L => {
                    let v = frame.pop_float()?;
                    frame.push(Value::Long(v as i64));
                }
                inst::F2D => {
                    let v = frame.pop_float()?;
                    frame.push(Value::Double(v as f64));
                }
                inst::D2I => {
                    let v = frame.pop_double()?;
                    frame.push(Value::Int(v as i32));
                }
                inst::D2L => {
                    let v = frame.pop_double()?;
                    frame.push(Value::Long(v as i64));
                }
                inst::D2F => {
                    let v = frame.pop_double()?;
                    frame.push(Value::Float(v as f32));
                }
                inst::I2B => {
                    let v = frame.pop_int()?;
                    frame.push(Value::Int(v as i8 as i32));
                }
                inst::I2C => {
                    // chars are 16-bit unsigned
                    let v = frame.pop_int()?;
                    frame.push(Value::Int(v as u16 as i32));
                }
                inst::I2S => {
                    let v = frame.pop_int()?;
                    frame.push(Value::Int(v as i16 as i32));
                }

                // comparisons
                inst::LCMP => {
                    let a = frame.pop_long()?;
                    let b = frame.pop_long()?;
                    frame.push(Value::Int(ordering_value(b.cmp(&a))));
                }
                inst::FCMPL | inst::FCMPG => {
                    let a = frame.pop_float()?;
                    let b = frame.pop_float()?;
                    frame.push(Value::Int(float_cmp(b as f64, a as f64, op == inst::FCMPG)));
                }
                inst::DCMPL | inst::DCMPG => {
                    let a = frame.pop_double()?;
                    let b = frame.pop_double()?;
                    frame.push(Value::Int(float_cmp(b, a, op == inst::DCMPG)));
                }

                // branches; the offset is relative to the opcode address and
                // the two operand bytes are already consumed
                inst::IFEQ | inst::IFNE | inst::IFLT | inst::IFGE | inst::IFGT | inst::IFLE => {
                    let offset = frame.i16_arg()?;
                    let v = frame.pop_int()?;
                    let taken = match op {
                        inst::IFEQ => v == 0,
                        inst::IFNE => v != 0,
                        inst::IFLT => v < 0,
                        inst::IFGE => v >= 0,
                        inst::IFGT => v > 0,
                        _ => v <= 0,
                    };
                    if taken {
                        frame.ip = frame.ip.wrapping_add_signed(offset as isize - 2);
                        continue;
                    }
                }
                inst::IF_ICMPEQ
                | inst::IF_ICMPNE
                | inst::IF_ICMPLT
                | inst::IF_ICMPGE
                | inst::IF_ICMPGT
                | inst::IF_ICMPLE => {
                    let offset = frame.i16_arg()?;
                    let a = frame.pop_int()?;
                    let b = frame.pop_int()?;
                    let taken = match op {
                        inst::IF_ICMPEQ => b == a,
                        inst::IF_ICMPNE => b != a,
                        inst::IF_ICMPLT => b < a,
                        inst::IF_ICMPGE => b >= a,
                        inst::IF_ICMPGT => b > a,
                        _ => b <= a,
                    };
                    if taken {
                        frame.ip = frame.ip.wrapping_add_signed(offset as isize - 2);
                        continue;
                    }
                }
                inst::IF_ACMPEQ | inst::IF_ACMPNE => {
                    let offset = frame.i16_arg()?;
                    let a = frame.pop()?;
                    let b = frame.pop()?;
                    if (a == b) == (op == inst::IF_ACMPEQ) {
                        frame.ip = frame.ip.wrapping_add_signed(offset as isize - 2);
                        continue;
                    }
                }
                inst::IFNULL | inst::IFNONNULL => {
                    let offset = frame.i16_arg()?;
                    let v = frame.pop()?;
                    if matches!(v, Value::Null) == (op == inst::IFNULL) {
                        frame.ip = frame.ip.wrapping_add_signed(offset as isize - 2);
                        continue;
                    }
                }
                inst::GOTO => {
                    let offset = frame.i16_arg()?;
                    frame.ip = frame.ip.wrapping_add_signed(offset as isize - 2);
                    continue;
                }

                // returns
                inst::IRETURN | inst::LRETURN | inst::FRETURN | inst::DRETURN | inst::ARETURN => {
                    return frame.pop();
                }
                inst::RETURN => {
                    return Ok(Value::Null);
                }

                // field access and invocation share a prologue: member ref
                // from the pool, then the target class is loaded, possibly
                // running its static initializer
                inst::GETSTATIC => {
                    let index = frame.u16_arg()?;
                    let (class_name, name, _) =
                        frame.class.class().constant_pool.member_ref(index)?;
                    let target = self.class(&class_name)?;
                    let value = target.static_field(&name);
                    frame.push(value);
                }
                inst::PUTSTATIC => {
                    let index = frame.u16_arg()?;
                    let (class_name, name, _) =
                        frame.class.class().constant_pool.member_ref(index)?;
                    let target = self.class(&class_name)?;
                    let value = frame.pop()?;
                    target.set_static_field(&name, value);
                }
                inst::GETFIELD => {
                    let index = frame.u16_arg()?;
                    let (class_name, name, _) =
                        frame.class.class().constant_pool.member_ref(index)?;
                    self.class(&class_name)?;
                    let instance = frame.pop_instance()?;
                    frame.push(instance.field(&name));
                }
                inst::PUTFIELD => {
                    let index = frame.u16_arg()?;
                    let (class_name, name, _) =
                        frame.class.class().constant_pool.member_ref(index)?;
                    self.class(&class_name)?;
                    let value = frame.pop()?;
                    let instance = frame.pop_instance()?;
                    instance.set_field(&name, value);
                }
                inst::INVOKEVIRTUAL | inst::INVOKESPECIAL | inst::INVOKESTATIC => {
                    let index = frame.u16_arg()?;
                    let (class_name, name, descriptor) =
                        frame.class.class().constant_pool.member_ref(index)?;
                    let target = self.class(&class_name)?;
                    let desc = descriptor::method_descriptor(&descriptor)?;
                    // instance invokes consume the receiver below the
                    // arguments as well
                    let consumed = desc.argc() + usize::from(op != inst::INVOKESTATIC);
                    let at = frame
                        .stack
                        .len()
                        .checked_sub(consumed)
                        .ok_or(VmError::StackUnderflow)?;
                    let args = frame.stack.split_off(at);
                    let result = self.invoke(&target, &name, &descriptor, args)?;
                    if !desc.is_void() {
                        frame.push(result);
                    }
                }

                inst::NEW => {
                    let index = frame.u16_arg()?;
                    let class_name = frame
                        .class
                        .class()
                        .constant_pool
                        .resolve(index)
                        .ok_or(VmError::InvalidConstant(index))?;
                    let target = self.class(&class_name)?;
                    frame.push(Value::Instance(target.new_instance()));
                }
                inst::NEWARRAY => {
                    let atype = frame.u8_arg()?;
                    let fill = match atype {
                        6 => Value::Float(0.0),
                        7 => Value::Double(0.0),
                        11 => Value::Long(0),
                        4 | 5 | 8 | 9 | 10 => Value::Int(0),
                        _ => return Err(VmError::UnsupportedArrayType(atype)),
                    };
                    let len = array_length(frame.pop_int()?)?;
                    frame.push(Value::Array(ArrayObject::filled(len, fill)));
                }
                inst::ANEWARRAY => {
                    let index = frame.u16_arg()?;
                    frame
                        .class
                        .class()
                        .constant_pool
                        .resolve(index)
                        .ok_or(VmError::InvalidConstant(index))?;
                    let len = array_length(frame.pop_int()?)?;
                    frame.push(Value::Array(ArrayObject::filled(len, Value::Null)));
                }
                inst::ARRAYLENGTH => {
                    let array = frame.pop_array()?;
                    frame.push(Value::Int(array.len() as i32));
                }

                _ => {
                    return Err(VmError::UnknownOpcode { op, ip: frame.ip });
                }
            }

            frame.ip += 1;
        }
    }
}

// ldc and ldc_w: typed entries push their value, name-like entries push
// their resolved text.
fn constant_value(class: &ClassObject, index: u16) -> VmResult<Value> {
    match class.constant(index)? {
        ConstantPoolInfo::Integer(v) => Ok(Value::Int(*v)),
        ConstantPoolInfo::Float(v) => Ok(Value::Float(*v)),
        ConstantPoolInfo::Long(v) => Ok(Value::Long(*v)),
        ConstantPoolInfo::Double(v) => Ok(Value::Double(*v)),
        ConstantPoolInfo::Utf8(_)
        | ConstantPoolInfo::String { .. }
        | ConstantPoolInfo::Class { .. } => class
            .class()
            .constant_pool
            .resolve(index)
            .map(Value::Str)
            .ok_or(VmError::InvalidConstant(index)),
        _ => Err(VmError::InvalidConstant(index)),
    }
}

fn ordering_value(ordering: Ordering) -> i32 {
    match ordering {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

fn float_cmp(b: f64, a: f64, nan_is_greater: bool) -> i32 {
    if a.is_nan() || b.is_nan() {
        if nan_is_greater {
            1
        } else {
            -1
        }
    } else if b < a {
        -1
    } else if b > a {
        1
    } else {
        0
    }
}

fn array_length(count: i32) -> VmResult<usize> {
    usize::try_from(count).map_err(|_| VmError::IndexOutOfBounds {
        index: count,
        len: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::instructions as inst;
    use crate::errors::VmError;
    use crate::runtime::object::Value;
    use crate::testutil::{classpath, ClassBuilder, Code, ACC_PUBLIC, ACC_STATIC};
    use crate::vm::Vm;

    // Builds a single-method class on a temporary search path and calls it.
    fn run_static(
        descriptor: &str,
        max_stack: u16,
        max_locals: u16,
        code: Vec<u8>,
        args: &[Value],
    ) -> Result<Value, VmError> {
        let mut cb = ClassBuilder::new("Ops", Some("java/lang/Object"));
        cb.method(
            ACC_PUBLIC | ACC_STATIC,
            "run",
            descriptor,
            Some(Code {
                max_stack,
                max_locals,
                bytes: code,
            }),
        );
        let dir = classpath(&[("Ops", cb.build())]);
        let vm = Vm::new([dir.path()]);
        vm.call("Ops", "run", args)
    }

    #[test]
    fn iconst_m1_pushes_minus_one() {
        let result = run_static("()I", 1, 0, vec![inst::ICONST_M1, inst::IRETURN], &[]);
        assert_eq!(result.unwrap(), Value::Int(-1));
    }

    #[test]
    fn bipush_sign_extends() {
        let result = run_static("()I", 1, 0, vec![inst::BIPUSH, 0xFF, inst::IRETURN], &[]);
        assert_eq!(result.unwrap(), Value::Int(-1));
    }

    #[test]
    fn sipush_sign_extends() {
        let result = run_static(
            "()I",
            1,
            0,
            vec![inst::SIPUSH, 0x12, 0x34, inst::IRETURN],
            &[],
        );
        assert_eq!(result.unwrap(), Value::Int(0x1234));

        let result = run_static(
            "()I",
            1,
            0,
            vec![inst::SIPUSH, 0xFF, 0xFE, inst::IRETURN],
            &[],
        );
        assert_eq!(result.unwrap(), Value::Int(-2));
    }

    #[test]
    fn lconst_0_pushes_long_zero() {
        let result = run_static("()J", 1, 0, vec![inst::LCONST_0, inst::LRETURN], &[]);
        assert_eq!(result.unwrap(), Value::Long(0));
    }

    #[test]
    fn int_arithmetic_wraps() {
        let add = |x: i32, y: i32| {
            run_static(
                "(II)I",
                2,
                2,
                vec![inst::ILOAD_0, inst::ILOAD_1, inst::IADD, inst::IRETURN],
                &[Value::Int(x), Value::Int(y)],
            )
            .unwrap()
        };
        assert_eq!(add(2, 3), Value::Int(5));
        assert_eq!(add(i32::MAX, 1), Value::Int(i32::MIN));

        let sub = run_static(
            "(II)I",
            2,
            2,
            vec![inst::ILOAD_0, inst::ILOAD_1, inst::ISUB, inst::IRETURN],
            &[Value::Int(7), Value::Int(11)],
        );
        assert_eq!(sub.unwrap(), Value::Int(-4));

        let mul = run_static(
            "(II)I",
            2,
            2,
            vec![inst::ILOAD_0, inst::ILOAD_1, inst::IMUL, inst::IRETURN],
            &[Value::Int(6), Value::Int(7)],
        );
        assert_eq!(mul.unwrap(), Value::Int(42));
    }

    #[test]
    fn integer_division_by_zero_is_an_error() {
        let result = run_static(
            "(II)I",
            2,
            2,
            vec![inst::ILOAD_0, inst::ILOAD_1, inst::IDIV, inst::IRETURN],
            &[Value::Int(5), Value::Int(0)],
        );
        assert!(matches!(result, Err(VmError::DivisionByZero)));

        let result = run_static(
            "(JJ)J",
            2,
            2,
            vec![inst::ILOAD_0, inst::ILOAD_1, inst::LDIV, inst::LRETURN],
            &[Value::Long(5), Value::Long(0)],
        );
        assert!(matches!(result, Err(VmError::DivisionByZero)));
    }

    #[test]
    fn float_division_by_zero_follows_ieee() {
        let result = run_static(
            "(FF)F",
            2,
            2,
            vec![inst::ILOAD_0, inst::ILOAD_1, inst::FDIV, inst::FRETURN],
            &[Value::Float(1.0), Value::Float(0.0)],
        )
        .unwrap();
        assert_eq!(result, Value::Float(f32::INFINITY));

        let result = run_static(
            "(DD)D",
            2,
            2,
            vec![inst::ILOAD_0, inst::ILOAD_1, inst::DDIV, inst::DRETURN],
            &[Value::Double(0.0), Value::Double(0.0)],
        )
        .unwrap();
        match result {
            Value::Double(d) => assert!(d.is_nan()),
            other => panic!("expected a double, got {other:?}"),
        }
    }

    #[test]
    fn idiv_min_by_minus_one_wraps() {
        let result = run_static(
            "(II)I",
            2,
            2,
            vec![inst::ILOAD_0, inst::ILOAD_1, inst::IDIV, inst::IRETURN],
            &[Value::Int(i32::MIN), Value::Int(-1)],
        );
        assert_eq!(result.unwrap(), Value::Int(i32::MIN));
    }

    #[test]
    fn irem_takes_sign_of_dividend() {
        let result = run_static(
            "(II)I",
            2,
            2,
            vec![inst::ILOAD_0, inst::ILOAD_1, inst::IREM, inst::IRETURN],
            &[Value::Int(-7), Value::Int(3)],
        );
        assert_eq!(result.unwrap(), Value::Int(-1));
    }

    #[test]
    fn shifts_mask_their_count() {
        let result = run_static(
            "(II)I",
            2,
            2,
            vec![inst::ILOAD_0, inst::ILOAD_1, inst::ISHL, inst::IRETURN],
            &[Value::Int(1), Value::Int(33)],
        );
        assert_eq!(result.unwrap(), Value::Int(2));

        let result = run_static(
            "(II)I",
            2,
            2,
            vec![inst::ILOAD_0, inst::ILOAD_1, inst::IUSHR, inst::IRETURN],
            &[Value::Int(-1), Value::Int(28)],
        );
        assert_eq!(result.unwrap(), Value::Int(0xF));
    }

    #[test]
    fn i2c_masks_to_sixteen_bits() {
        let result = run_static(
            "()I",
            1,
            0,
            vec![inst::ICONST_M1, inst::I2C, inst::IRETURN],
            &[],
        );
        assert_eq!(result.unwrap(), Value::Int(0xFFFF));
    }

    #[test]
    fn narrowing_conversions_truncate() {
        let result = run_static(
            "()I",
            1,
            0,
            vec![inst::SIPUSH, 0x01, 0x80, inst::I2B, inst::IRETURN],
            &[],
        );
        assert_eq!(result.unwrap(), Value::Int(-128));

        let result = run_static(
            "(J)I",
            1,
            1,
            vec![inst::ILOAD_0, inst::L2I, inst::IRETURN],
            &[Value::Long(0x1_0000_0002)],
        );
        assert_eq!(result.unwrap(), Value::Int(2));
    }

    #[test]
    fn float_to_int_saturates_and_nan_is_zero() {
        let f2i = |f: f32| {
            run_static(
                "(F)I",
                1,
                1,
                vec![inst::ILOAD_0, inst::F2I, inst::IRETURN],
                &[Value::Float(f)],
            )
            .unwrap()
        };
        assert_eq!(f2i(f32::NAN), Value::Int(0));
        assert_eq!(f2i(1e20), Value::Int(i32::MAX));
        assert_eq!(f2i(-1e20), Value::Int(i32::MIN));
    }

    #[test]
    fn lcmp_pushes_sign() {
        let lcmp = |x: i64, y: i64| {
            run_static(
                "(JJ)I",
                2,
                2,
                vec![inst::ILOAD_0, inst::ILOAD_1, inst::LCMP, inst::IRETURN],
                &[Value::Long(x), Value::Long(y)],
            )
            .unwrap()
        };
        assert_eq!(lcmp(1, 2), Value::Int(-1));
        assert_eq!(lcmp(2, 2), Value::Int(0));
        assert_eq!(lcmp(3, 2), Value::Int(1));
    }

    #[test]
    fn fcmp_variants_disagree_only_on_nan() {
        let cmp = |op: u8, x: f32, y: f32| {
            run_static(
                "(FF)I",
                2,
                2,
                vec![inst::ILOAD_0, inst::ILOAD_1, op, inst::IRETURN],
                &[Value::Float(x), Value::Float(y)],
            )
            .unwrap()
        };
        assert_eq!(cmp(inst::FCMPL, 1.0, 2.0), Value::Int(-1));
        assert_eq!(cmp(inst::FCMPG, 1.0, 2.0), Value::Int(-1));
        assert_eq!(cmp(inst::FCMPL, f32::NAN, 0.0), Value::Int(-1));
        assert_eq!(cmp(inst::FCMPG, f32::NAN, 0.0), Value::Int(1));
    }

    #[test]
    fn branching_loop_accumulates() {
        // int acc = 0; while (n > 0) { acc += n; n--; } return acc;
        let code = vec![
            inst::ICONST_0,  // 0
            inst::ISTORE_1,  // 1
            inst::ILOAD_0,   // 2: loop head
            inst::IFLE,      // 3: exit when n <= 0, target 16
            0x00,
            0x0D,
            inst::ILOAD_1,   // 6
            inst::ILOAD_0,   // 7
            inst::IADD,      // 8
            inst::ISTORE_1,  // 9
            inst::IINC,      // 10: n -= 1
            0x00,
            0xFF,
            inst::GOTO,      // 13: back to 2
            0xFF,
            0xF5,
            inst::ILOAD_1,   // 16
            inst::IRETURN,   // 17
        ];
        let result = run_static("(I)I", 2, 2, code, &[Value::Int(4)]);
        assert_eq!(result.unwrap(), Value::Int(10));
    }

    #[test]
    fn stores_actually_write_the_slot() {
        let code = vec![
            inst::BIPUSH,
            42,
            inst::ISTORE,
            0x03,
            inst::ILOAD_3,
            inst::IRETURN,
        ];
        let result = run_static("()I", 1, 4, code, &[]);
        assert_eq!(result.unwrap(), Value::Int(42));
    }

    #[test]
    fn dup_pop_swap_shuffle_the_stack() {
        let code = vec![
            inst::ICONST_1,
            inst::ICONST_2,
            inst::SWAP,     // [2, 1]
            inst::DUP,      // [2, 1, 1]
            inst::IADD,     // [2, 2]
            inst::POP,      // [2]
            inst::IRETURN,
        ];
        let result = run_static("()I", 3, 0, code, &[]);
        assert_eq!(result.unwrap(), Value::Int(2));
    }

    #[test]
    fn acmp_compares_reference_identity() {
        // return (a == b) ? 1 : 0 for two reference arguments
        let code = vec![
            inst::ILOAD_0,
            inst::ILOAD_1,
            inst::IF_ACMPEQ, // target 8
            0x00,
            0x06,
            inst::ICONST_0,
            inst::IRETURN,
            0x00,
            inst::ICONST_1, // 8
            inst::IRETURN,
        ];
        let array = crate::runtime::object::ArrayObject::filled(1, Value::Null);
        let same = run_static(
            "(Ljava/lang/Object;Ljava/lang/Object;)I",
            2,
            2,
            code.clone(),
            &[Value::Array(array.clone()), Value::Array(array)],
        );
        assert_eq!(same.unwrap(), Value::Int(1));

        let a = crate::runtime::object::ArrayObject::filled(1, Value::Null);
        let b = crate::runtime::object::ArrayObject::filled(1, Value::Null);
        let different = run_static(
            "(Ljava/lang/Object;Ljava/lang/Object;)I",
            2,
            2,
            code,
            &[Value::Array(a), Value::Array(b)],
        );
        assert_eq!(different.unwrap(), Value::Int(0));
    }

    #[test]
    fn ifnull_branches_on_null() {
        let code = vec![
            inst::ILOAD_0,
            inst::IFNULL, // target 7
            0x00,
            0x06,
            inst::ICONST_0,
            inst::IRETURN,
            0x00,
            inst::ICONST_1, // 7
            inst::IRETURN,
        ];
        let result = run_static("(Ljava/lang/Object;)I", 1, 1, code.clone(), &[Value::Null]);
        assert_eq!(result.unwrap(), Value::Int(1));
        let result = run_static("(Ljava/lang/Object;)I", 1, 1, code, &[Value::from("x")]);
        assert_eq!(result.unwrap(), Value::Int(0));
    }

    #[test]
    fn arrays_allocate_index_and_measure() {
        // int[] a = new int[3]; a[1] = 7; return a[1] + a.length;
        let code = vec![
            inst::ICONST_3,
            inst::NEWARRAY,
            10, // T_INT
            inst::ASTORE_0,
            inst::ILOAD_0,
            inst::ICONST_1,
            inst::BIPUSH,
            7,
            inst::IASTORE,
            inst::ILOAD_0,
            inst::ICONST_1,
            inst::IALOAD,
            inst::ILOAD_0,
            inst::ARRAYLENGTH,
            inst::IADD,
            inst::IRETURN,
        ];
        let result = run_static("()I", 3, 1, code, &[]);
        assert_eq!(result.unwrap(), Value::Int(10));
    }

    #[test]
    fn array_index_out_of_bounds_is_an_error() {
        let code = vec![
            inst::ICONST_1,
            inst::NEWARRAY,
            10,
            inst::ICONST_2,
            inst::IALOAD,
            inst::IRETURN,
        ];
        let result = run_static("()I", 2, 0, code, &[]);
        assert!(matches!(
            result,
            Err(VmError::IndexOutOfBounds { index: 2, len: 1 })
        ));
    }

    #[test]
    fn anewarray_fills_with_null() {
        let mut cb = ClassBuilder::new("Refs", Some("java/lang/Object"));
        let object = cb.class_const("java/lang/Object");
        cb.method(
            ACC_PUBLIC | ACC_STATIC,
            "first",
            "()Ljava/lang/Object;",
            Some(Code {
                max_stack: 2,
                max_locals: 0,
                bytes: vec![
                    inst::ICONST_2,
                    inst::ANEWARRAY,
                    (object >> 8) as u8,
                    object as u8,
                    inst::ICONST_0,
                    inst::AALOAD,
                    inst::ARETURN,
                ],
            }),
        );
        let dir = classpath(&[("Refs", cb.build())]);
        let vm = Vm::new([dir.path()]);
        assert_eq!(vm.call("Refs", "first", &[]).unwrap(), Value::Null);
    }

    #[test]
    fn ldc_pushes_typed_constants() {
        let mut cb = ClassBuilder::new("Consts", Some("java/lang/Object"));
        let int_index = cb.int_const(1_000_000);
        let str_index = cb.string_const("Hello world");
        let long_index = cb.long_const(1 << 40);
        cb.method(
            ACC_PUBLIC | ACC_STATIC,
            "int",
            "()I",
            Some(Code {
                max_stack: 1,
                max_locals: 0,
                bytes: vec![inst::LDC, int_index as u8, inst::IRETURN],
            }),
        );
        cb.method(
            ACC_PUBLIC | ACC_STATIC,
            "str",
            "()Ljava/lang/String;",
            Some(Code {
                max_stack: 1,
                max_locals: 0,
                bytes: vec![
                    inst::LDC_W,
                    (str_index >> 8) as u8,
                    str_index as u8,
                    inst::ARETURN,
                ],
            }),
        );
        cb.method(
            ACC_PUBLIC | ACC_STATIC,
            "long",
            "()J",
            Some(Code {
                max_stack: 1,
                max_locals: 0,
                bytes: vec![
                    inst::LDC2_W,
                    (long_index >> 8) as u8,
                    long_index as u8,
                    inst::LRETURN,
                ],
            }),
        );
        let dir = classpath(&[("Consts", cb.build())]);
        let vm = Vm::new([dir.path()]);

        assert_eq!(vm.call("Consts", "int", &[]).unwrap(), Value::Int(1_000_000));
        assert_eq!(
            vm.call("Consts", "str", &[]).unwrap(),
            Value::from("Hello world")
        );
        assert_eq!(vm.call("Consts", "long", &[]).unwrap(), Value::Long(1 << 40));
    }

    #[test]
    fn unknown_opcode_on_a_taken_path_is_an_error() {
        let result = run_static("()I", 1, 0, vec![0xCB, inst::IRETURN], &[]);
        assert!(matches!(
            result,
            Err(VmError::UnknownOpcode { op: 0xCB, ip: 0 })
        ));
    }

    #[test]
    fn running_off_the_code_end_is_an_error() {
        let result = run_static("()V", 1, 0, vec![inst::NOP], &[]);
        assert!(matches!(result, Err(VmError::PcOutOfBounds(1))));
    }

    #[test]
    fn typed_pop_mismatch_is_an_error() {
        let result = run_static(
            "()I",
            2,
            0,
            vec![inst::ICONST_1, inst::ACONST_NULL, inst::IADD, inst::IRETURN],
            &[],
        );
        assert!(matches!(
            result,
            Err(VmError::TypeMismatch {
                expected: "int",
                found: "null"
            })
        ));
    }

    #[test]
    fn stack_underflow_is_an_error() {
        let result = run_static("()I", 1, 0, vec![inst::IADD, inst::IRETURN], &[]);
        assert!(matches!(result, Err(VmError::StackUnderflow)));
    }
}
