use std::fs;
use std::sync::Arc;

use tracing::debug;

use crate::class::{parser, Class, ConstPool, MethodInfo};
use crate::consts::{ClassAccessFlag, MethodAccessFlag};
use crate::errors::{VmError, VmResult};
use crate::runtime::object::ClassObject;
use crate::vm::Vm;

pub(crate) const ROOT_CLASS: &str = "java/lang/Object";

const CLINIT: &str = "<clinit>";
const VOID_DESCRIPTOR: &str = "()V";

impl Vm {
    /// Resolves a class by name. A registry hit returns the existing
    /// singleton; on a miss the search path is walked in order and the first
    /// artifact that opens and parses wins. The super chain is resolved
    /// recursively, the new class is registered *before* its `<clinit>`
    /// runs so static-initialization cycles terminate, and `<clinit>`
    /// failures propagate to the caller.
    pub fn class(&self, name: &str) -> VmResult<Arc<ClassObject>> {
        if let Some(class) = self.classes.get(name) {
            return Ok(Arc::clone(&class));
        }

        let mut parse_error = None;
        for dir in &self.class_path {
            let path = dir.join(format!("{name}.class"));
            let Ok(bytes) = fs::read(&path) else {
                continue;
            };
            let class = match parser::class_file(&bytes) {
                Ok((_, class)) => class,
                Err(err) => {
                    // best-effort: a later path entry may hold a good copy
                    debug!(path = %path.display(), "skipping unparseable class file");
                    parse_error = Some(VmError::from(err));
                    continue;
                }
            };

            let super_class = match &class.super_name {
                Some(super_name) => Some(self.class(super_name)?),
                None => None,
            };

            let class_object = ClassObject::new(class, super_class);
            self.classes
                .insert(Arc::clone(class_object.name()), Arc::clone(&class_object));
            debug!(class = %class_object.name(), path = %path.display(), "defined class");

            if let Some(clinit) = class_object.method(CLINIT, Some(VOID_DESCRIPTOR)) {
                self.run_method(&class_object, clinit, Vec::new())?;
            }

            return Ok(class_object);
        }

        Err(parse_error.unwrap_or_else(|| VmError::ClassNotFound(name.to_string())))
    }
}

/// The synthetic root class every super chain ends on. Its `<init>` body is
/// supplied by the native registry.
pub(crate) fn root_class() -> Class {
    Class {
        minor_version: 0,
        major_version: 0,
        constant_pool: ConstPool::default(),
        access_flags: ClassAccessFlag::PUBLIC,
        name: Arc::from(ROOT_CLASS),
        super_name: None,
        this_class: 0,
        super_class: 0,
        interfaces: Vec::new(),
        fields: Vec::new(),
        methods: vec![MethodInfo {
            access_flags: MethodAccessFlag::PUBLIC | MethodAccessFlag::NATIVE,
            name: Arc::from("<init>"),
            descriptor: Arc::from(VOID_DESCRIPTOR),
            attributes: Vec::new(),
        }],
        attributes: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::errors::VmError;
    use crate::runtime::interpreter::instructions as inst;
    use crate::testutil::{
        classpath, fields_and_methods, ClassBuilder, Code, ACC_NATIVE, ACC_PUBLIC, ACC_STATIC,
    };
    use crate::vm::Vm;

    #[test]
    fn the_root_class_is_preregistered() {
        let vm = Vm::new(Vec::<PathBuf>::new());
        let root = vm.class("java/lang/Object").unwrap();
        assert_eq!(root.name().as_ref(), "java/lang/Object");
        assert!(root.super_class().is_none());
    }

    #[test]
    fn repeated_resolution_returns_the_same_singleton() {
        let dir = classpath(&[("FieldsAndMethods", fields_and_methods())]);
        let vm = Vm::new([dir.path()]);

        let first = vm.class("FieldsAndMethods").unwrap();
        let second = vm.class("FieldsAndMethods").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn the_super_chain_is_resolved_recursively() {
        let mut base = ClassBuilder::new("Base", Some("java/lang/Object"));
        base.method(
            ACC_PUBLIC | ACC_STATIC,
            "zero",
            "()I",
            Some(Code {
                max_stack: 1,
                max_locals: 0,
                bytes: vec![inst::ICONST_0, inst::IRETURN],
            }),
        );
        let derived = ClassBuilder::new("Derived", Some("Base"));
        let dir = classpath(&[("Base", base.build()), ("Derived", derived.build())]);
        let vm = Vm::new([dir.path()]);

        let derived = vm.class("Derived").unwrap();
        let base = derived.super_class().unwrap();
        assert_eq!(base.name().as_ref(), "Base");
        assert_eq!(
            base.super_class().unwrap().name().as_ref(),
            "java/lang/Object"
        );
        // the super was registered on the way
        assert!(Arc::ptr_eq(base, &vm.class("Base").unwrap()));
    }

    #[test]
    fn missing_super_fails_resolution() {
        let orphan = ClassBuilder::new("Orphan", Some("NoSuchBase"));
        let dir = classpath(&[("Orphan", orphan.build())]);
        let vm = Vm::new([dir.path()]);

        assert!(matches!(
            vm.class("Orphan"),
            Err(VmError::ClassNotFound(name)) if name == "NoSuchBase"
        ));
    }

    #[test]
    fn clinit_runs_exactly_once() {
        // <clinit> calls the native Hooks.tick so invocations are countable
        let mut hooks = ClassBuilder::new("Hooks", Some("java/lang/Object"));
        hooks.method(ACC_PUBLIC | ACC_STATIC | ACC_NATIVE, "tick", "()V", None);

        let mut init = ClassBuilder::new("Init", Some("java/lang/Object"));
        let tick = init.method_ref("Hooks", "tick", "()V");
        init.method(
            ACC_STATIC,
            "<clinit>",
            "()V",
            Some(Code {
                max_stack: 0,
                max_locals: 0,
                bytes: vec![
                    inst::INVOKESTATIC,
                    (tick >> 8) as u8,
                    tick as u8,
                    inst::RETURN,
                ],
            }),
        );

        let dir = classpath(&[("Hooks", hooks.build()), ("Init", init.build())]);
        let vm = Vm::new([dir.path()]);

        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        vm.register_native("Hooks", "tick", "()V", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        });

        vm.class("Init").unwrap();
        vm.class("Init").unwrap();
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clinit_failure_propagates() {
        let mut bad = ClassBuilder::new("Bad", Some("java/lang/Object"));
        bad.method(
            ACC_STATIC,
            "<clinit>",
            "()V",
            Some(Code {
                max_stack: 2,
                max_locals: 0,
                bytes: vec![
                    inst::ICONST_1,
                    inst::ICONST_0,
                    inst::IDIV,
                    inst::RETURN,
                ],
            }),
        );
        let dir = classpath(&[("Bad", bad.build())]);
        let vm = Vm::new([dir.path()]);

        assert!(matches!(vm.class("Bad"), Err(VmError::DivisionByZero)));
    }

    #[test]
    fn later_path_entries_recover_from_a_bad_artifact() {
        let broken = classpath(&[("Thing", b"not a class file".to_vec())]);
        let mut good = ClassBuilder::new("Thing", Some("java/lang/Object"));
        good.method(
            ACC_PUBLIC | ACC_STATIC,
            "one",
            "()I",
            Some(Code {
                max_stack: 1,
                max_locals: 0,
                bytes: vec![inst::ICONST_1, inst::IRETURN],
            }),
        );
        let working = classpath(&[("Thing", good.build())]);

        let vm = Vm::new([broken.path(), working.path()]);
        let result = vm.call("Thing", "one", &[]).unwrap();
        assert_eq!(result, crate::runtime::object::Value::Int(1));
    }

    #[test]
    fn a_bad_artifact_with_no_fallback_surfaces_the_parse_error() {
        let broken = classpath(&[("Thing", b"not a class file".to_vec())]);
        let vm = Vm::new([broken.path()]);
        assert!(matches!(
            vm.class("Thing"),
            Err(VmError::ClassFormat(_))
        ));
    }

    #[test]
    fn search_path_order_decides_which_artifact_wins() {
        let mut first = ClassBuilder::new("Thing", Some("java/lang/Object"));
        first.method(
            ACC_PUBLIC | ACC_STATIC,
            "which",
            "()I",
            Some(Code {
                max_stack: 1,
                max_locals: 0,
                bytes: vec![inst::ICONST_1, inst::IRETURN],
            }),
        );
        let mut second = ClassBuilder::new("Thing", Some("java/lang/Object"));
        second.method(
            ACC_PUBLIC | ACC_STATIC,
            "which",
            "()I",
            Some(Code {
                max_stack: 1,
                max_locals: 0,
                bytes: vec![inst::ICONST_2, inst::IRETURN],
            }),
        );
        let dir_a = classpath(&[("Thing", first.build())]);
        let dir_b = classpath(&[("Thing", second.build())]);

        let vm = Vm::new([dir_a.path(), dir_b.path()]);
        let result = vm.call("Thing", "which", &[]).unwrap();
        assert_eq!(result, crate::runtime::object::Value::Int(1));
    }
}
