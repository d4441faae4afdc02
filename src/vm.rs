use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::errors::{VmError, VmResult};
use crate::runtime::class_loader;
use crate::runtime::native::NativeRegistry;
use crate::runtime::object::{ClassObject, Value};

/// An embeddable virtual machine: an ordered class search path, the
/// registry of loaded classes, and the native-method bindings. Nothing is
/// persisted; the registry lives and dies with the value.
///
/// One call runs to completion before control returns. Embedders that need
/// concurrency serialize calls or construct one `Vm` per thread.
pub struct Vm {
    pub(crate) class_path: Vec<PathBuf>,
    pub(crate) classes: DashMap<Arc<str>, Arc<ClassObject>>,
    pub(crate) natives: NativeRegistry,
}

impl Vm {
    /// Creates a VM over an ordered search path of directories. The root
    /// class `java/lang/Object` is pre-registered with a single no-op
    /// `<init>()V` bound to a null-returning native, so constructor chains
    /// terminate.
    pub fn new<P: Into<PathBuf>>(class_path: impl IntoIterator<Item = P>) -> Vm {
        let vm = Vm {
            class_path: class_path.into_iter().map(Into::into).collect(),
            classes: DashMap::new(),
            natives: NativeRegistry::default(),
        };
        let root = ClassObject::new(class_loader::root_class(), None);
        vm.classes.insert(Arc::clone(root.name()), root);
        vm.register_native(class_loader::ROOT_CLASS, "<init>", "()V", |_| Ok(None));
        vm
    }

    /// Binds a host function as the body of `class.method`, used when the
    /// method has no `Code` attribute. The descriptor is advisory for now;
    /// dispatch keys on the name alone. Re-registration replaces the
    /// previous binding.
    pub fn register_native<F>(&self, class: &str, method: &str, _descriptor: &str, f: F)
    where
        F: Fn(&[Value]) -> VmResult<Option<Value>> + Send + Sync + 'static,
    {
        self.natives.register(class, method, f);
    }

    /// Resolves the class, picks the first method with the given name and
    /// runs it with the arguments in the initial local slots. Overloads are
    /// not discriminated here; use [`Vm::call_method`] with a descriptor.
    pub fn call(&self, class: &str, method: &str, args: &[Value]) -> VmResult<Value> {
        let class_object = self.class(class)?;
        self.call_method(&class_object, method, "", args)
    }

    /// As [`Vm::call`], on an already-resolved class object. An empty
    /// descriptor matches any overload.
    pub fn call_method(
        &self,
        class: &Arc<ClassObject>,
        method: &str,
        descriptor: &str,
        args: &[Value],
    ) -> VmResult<Value> {
        let descriptor = (!descriptor.is_empty()).then_some(descriptor);
        let method_info =
            class
                .method(method, descriptor)
                .ok_or_else(|| VmError::MethodNotFound {
                    class: class.name().to_string(),
                    method: method.to_string(),
                    descriptor: descriptor.unwrap_or_default().to_string(),
                })?;
        self.run_method(class, method_info, args.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::runtime::interpreter::instructions as inst;
    use crate::testutil::{
        classpath, fields_and_methods, runtime_class, ClassBuilder, Code, ACC_PUBLIC, ACC_STATIC,
    };

    fn companion_vm() -> (tempfile::TempDir, Vm) {
        let dir = classpath(&[
            ("FieldsAndMethods", fields_and_methods()),
            ("Runtime", runtime_class()),
        ]);
        let vm = Vm::new([dir.path()]);
        (dir, vm)
    }

    #[test]
    fn add_returns_an_int32() {
        let (_dir, vm) = companion_vm();
        let result = vm
            .call("FieldsAndMethods", "add", &[Value::Int(2), Value::Int(3)])
            .unwrap();
        assert_eq!(result, Value::Int(5));
    }

    #[test]
    fn hello_calls_the_registered_native_once() {
        let (_dir, vm) = companion_vm();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        vm.register_native("Runtime", "log", "(Ljava/lang/String;)V", move |args| {
            sink.lock().unwrap().push(args.to_vec());
            Ok(None)
        });

        let result = vm.call("FieldsAndMethods", "hello", &[]).unwrap();
        assert_eq!(result, Value::Null);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], vec![Value::from("Hello world")]);
    }

    #[test]
    fn static_field_accumulates_across_calls() {
        let (_dir, vm) = companion_vm();
        for _ in 0..3 {
            let result = vm.call("FieldsAndMethods", "incrementB", &[]).unwrap();
            assert_eq!(result, Value::Null);
        }
        let class = vm.class("FieldsAndMethods").unwrap();
        // <clinit> seeded b = 2
        assert_eq!(class.static_field("b"), Value::Int(5));
    }

    #[test]
    fn create_builds_an_instance_and_increment_a_mutates_it() {
        let (_dir, vm) = companion_vm();
        let result = vm.call("FieldsAndMethods", "create", &[]).unwrap();
        let Value::Instance(instance) = &result else {
            panic!("expected an instance, got {result:?}");
        };
        assert_eq!(instance.field("a"), Value::Int(1));

        for _ in 0..3 {
            vm.call("FieldsAndMethods", "incrementA", &[result.clone()])
                .unwrap();
        }
        assert_eq!(instance.field("a"), Value::Int(4));
    }

    #[test]
    fn increment_both_reaches_both_fields() {
        let (_dir, vm) = companion_vm();
        let instance = vm.call("FieldsAndMethods", "create", &[]).unwrap();
        vm.call("FieldsAndMethods", "incrementBoth", &[instance.clone()])
            .unwrap();

        let Value::Instance(instance) = instance else {
            unreachable!()
        };
        assert_eq!(instance.field("a"), Value::Int(2));
        let class = vm.class("FieldsAndMethods").unwrap();
        assert_eq!(class.static_field("b"), Value::Int(3));
    }

    #[test]
    fn missing_class_is_a_resolution_error() {
        let (_dir, vm) = companion_vm();
        assert!(matches!(
            vm.call("NoSuchClass", "main", &[]),
            Err(VmError::ClassNotFound(name)) if name == "NoSuchClass"
        ));
    }

    #[test]
    fn missing_method_is_a_dispatch_error() {
        let (_dir, vm) = companion_vm();
        assert!(matches!(
            vm.call("FieldsAndMethods", "nope", &[]),
            Err(VmError::MethodNotFound { method, .. }) if method == "nope"
        ));
    }

    #[test]
    fn unbound_native_method_is_a_dispatch_error() {
        let (_dir, vm) = companion_vm();
        // Runtime.log exists but nothing is registered for it
        assert!(matches!(
            vm.call("FieldsAndMethods", "hello", &[]),
            Err(VmError::CodeMissing { class, method })
                if class == "Runtime" && method == "log"
        ));
    }

    #[test]
    fn call_method_discriminates_overloads_by_descriptor() {
        let mut cb = ClassBuilder::new("Over", Some("java/lang/Object"));
        cb.method(
            ACC_PUBLIC | ACC_STATIC,
            "id",
            "(I)I",
            Some(Code {
                max_stack: 1,
                max_locals: 1,
                bytes: vec![inst::ILOAD_0, inst::IRETURN],
            }),
        );
        cb.method(
            ACC_PUBLIC | ACC_STATIC,
            "id",
            "(J)J",
            Some(Code {
                max_stack: 1,
                max_locals: 1,
                bytes: vec![inst::ILOAD_0, inst::LRETURN],
            }),
        );
        let dir = classpath(&[("Over", cb.build())]);
        let vm = Vm::new([dir.path()]);
        let class = vm.class("Over").unwrap();

        let long = vm
            .call_method(&class, "id", "(J)J", &[Value::Long(7)])
            .unwrap();
        assert_eq!(long, Value::Long(7));

        // the empty descriptor picks the first declaration
        let int = vm.call_method(&class, "id", "", &[Value::Int(7)]).unwrap();
        assert_eq!(int, Value::Int(7));

        assert!(matches!(
            vm.call_method(&class, "id", "(D)D", &[]),
            Err(VmError::MethodNotFound { descriptor, .. }) if descriptor == "(D)D"
        ));
    }
}
