//! Test support: an in-memory class-file assembler and the companion
//! artifacts the end-to-end tests run against, written to temporary
//! search-path directories.

use std::fs;

use crate::runtime::interpreter::instructions as inst;

pub(crate) const ACC_PUBLIC: u16 = 0x0001;
pub(crate) const ACC_STATIC: u16 = 0x0008;
pub(crate) const ACC_SUPER: u16 = 0x0020;
pub(crate) const ACC_NATIVE: u16 = 0x0100;

pub(crate) struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub bytes: Vec<u8>,
}

enum PoolEntry {
    Utf8(String),
    Integer(i32),
    Long(i64),
    Class { name_index: u16 },
    Str { string_index: u16 },
    NameAndType { name_index: u16, descriptor_index: u16 },
    FieldRef { class_index: u16, name_and_type_index: u16 },
    MethodRef { class_index: u16, name_and_type_index: u16 },
}

struct Member {
    flags: u16,
    name_index: u16,
    descriptor_index: u16,
    attributes: Vec<(u16, Vec<u8>)>,
}

/// Assembles a syntactically valid class file. Constant-pool indices are
/// handed back at insertion so code arrays can reference them; Utf8 and
/// Class entries are deduplicated.
pub(crate) struct ClassBuilder {
    entries: Vec<(u16, PoolEntry)>,
    next_index: u16,
    access_flags: u16,
    this_class: u16,
    super_class: u16,
    fields: Vec<Member>,
    methods: Vec<Member>,
    class_attributes: Vec<(u16, Vec<u8>)>,
}

impl ClassBuilder {
    pub fn new(name: &str, super_name: Option<&str>) -> ClassBuilder {
        let mut cb = ClassBuilder {
            entries: Vec::new(),
            next_index: 1,
            access_flags: ACC_PUBLIC | ACC_SUPER,
            this_class: 0,
            super_class: 0,
            fields: Vec::new(),
            methods: Vec::new(),
            class_attributes: Vec::new(),
        };
        cb.this_class = cb.class_const(name);
        cb.super_class = match super_name {
            Some(super_name) => cb.class_const(super_name),
            None => 0,
        };
        cb
    }

    fn push(&mut self, entry: PoolEntry) -> u16 {
        let index = self.next_index;
        // 64-bit entries take two slots
        self.next_index += match entry {
            PoolEntry::Long(_) => 2,
            _ => 1,
        };
        self.entries.push((index, entry));
        index
    }

    pub fn utf8(&mut self, text: &str) -> u16 {
        let found = self.entries.iter().find_map(|(i, e)| match e {
            PoolEntry::Utf8(t) if t == text => Some(*i),
            _ => None,
        });
        found.unwrap_or_else(|| self.push(PoolEntry::Utf8(text.to_string())))
    }

    pub fn class_const(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        let found = self.entries.iter().find_map(|(i, e)| match e {
            PoolEntry::Class { name_index: n } if *n == name_index => Some(*i),
            _ => None,
        });
        found.unwrap_or_else(|| self.push(PoolEntry::Class { name_index }))
    }

    pub fn int_const(&mut self, value: i32) -> u16 {
        self.push(PoolEntry::Integer(value))
    }

    pub fn long_const(&mut self, value: i64) -> u16 {
        self.push(PoolEntry::Long(value))
    }

    pub fn string_const(&mut self, text: &str) -> u16 {
        let string_index = self.utf8(text);
        self.push(PoolEntry::Str { string_index })
    }

    fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.push(PoolEntry::NameAndType {
            name_index,
            descriptor_index,
        })
    }

    pub fn field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class_const(owner);
        let name_and_type_index = self.name_and_type(name, descriptor);
        self.push(PoolEntry::FieldRef {
            class_index,
            name_and_type_index,
        })
    }

    pub fn method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class_const(owner);
        let name_and_type_index = self.name_and_type(name, descriptor);
        self.push(PoolEntry::MethodRef {
            class_index,
            name_and_type_index,
        })
    }

    pub fn field(&mut self, flags: u16, name: &str, descriptor: &str) {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.fields.push(Member {
            flags,
            name_index,
            descriptor_index,
            attributes: Vec::new(),
        });
    }

    pub fn method(&mut self, flags: u16, name: &str, descriptor: &str, code: Option<Code>) {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        let mut attributes = Vec::new();
        if let Some(code) = code {
            let code_name = self.utf8("Code");
            let mut payload = Vec::new();
            payload.extend_from_slice(&code.max_stack.to_be_bytes());
            payload.extend_from_slice(&code.max_locals.to_be_bytes());
            payload.extend_from_slice(&(code.bytes.len() as u32).to_be_bytes());
            payload.extend_from_slice(&code.bytes);
            payload.extend_from_slice(&0u16.to_be_bytes()); // exception table
            payload.extend_from_slice(&0u16.to_be_bytes()); // nested attributes
            attributes.push((code_name, payload));
        }
        self.methods.push(Member {
            flags,
            name_index,
            descriptor_index,
            attributes,
        });
    }

    pub fn class_attribute(&mut self, name: &str, payload: Vec<u8>) {
        let name_index = self.utf8(name);
        self.class_attributes.push((name_index, payload));
    }

    pub fn build(self) -> Vec<u8> {
        let mut out = vec![0xCA, 0xFE, 0xBA, 0xBE];
        out.extend_from_slice(&0u16.to_be_bytes()); // minor
        out.extend_from_slice(&61u16.to_be_bytes()); // major

        out.extend_from_slice(&self.next_index.to_be_bytes());
        for (_, entry) in &self.entries {
            write_entry(&mut out, entry);
        }

        out.extend_from_slice(&self.access_flags.to_be_bytes());
        out.extend_from_slice(&self.this_class.to_be_bytes());
        out.extend_from_slice(&self.super_class.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes()); // interfaces

        for members in [&self.fields, &self.methods] {
            out.extend_from_slice(&(members.len() as u16).to_be_bytes());
            for member in members {
                out.extend_from_slice(&member.flags.to_be_bytes());
                out.extend_from_slice(&member.name_index.to_be_bytes());
                out.extend_from_slice(&member.descriptor_index.to_be_bytes());
                write_attributes(&mut out, &member.attributes);
            }
        }

        write_attributes(&mut out, &self.class_attributes);
        out
    }
}

fn write_entry(out: &mut Vec<u8>, entry: &PoolEntry) {
    match entry {
        PoolEntry::Utf8(text) => {
            out.push(1);
            out.extend_from_slice(&(text.len() as u16).to_be_bytes());
            out.extend_from_slice(text.as_bytes());
        }
        PoolEntry::Integer(v) => {
            out.push(3);
            out.extend_from_slice(&v.to_be_bytes());
        }
        PoolEntry::Long(v) => {
            out.push(5);
            out.extend_from_slice(&v.to_be_bytes());
        }
        PoolEntry::Class { name_index } => {
            out.push(7);
            out.extend_from_slice(&name_index.to_be_bytes());
        }
        PoolEntry::Str { string_index } => {
            out.push(8);
            out.extend_from_slice(&string_index.to_be_bytes());
        }
        PoolEntry::FieldRef {
            class_index,
            name_and_type_index,
        } => {
            out.push(9);
            out.extend_from_slice(&class_index.to_be_bytes());
            out.extend_from_slice(&name_and_type_index.to_be_bytes());
        }
        PoolEntry::MethodRef {
            class_index,
            name_and_type_index,
        } => {
            out.push(10);
            out.extend_from_slice(&class_index.to_be_bytes());
            out.extend_from_slice(&name_and_type_index.to_be_bytes());
        }
        PoolEntry::NameAndType {
            name_index,
            descriptor_index,
        } => {
            out.push(12);
            out.extend_from_slice(&name_index.to_be_bytes());
            out.extend_from_slice(&descriptor_index.to_be_bytes());
        }
    }
}

fn write_attributes(out: &mut Vec<u8>, attributes: &[(u16, Vec<u8>)]) {
    out.extend_from_slice(&(attributes.len() as u16).to_be_bytes());
    for (name_index, payload) in attributes {
        out.extend_from_slice(&name_index.to_be_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(payload);
    }
}

fn hi(index: u16) -> u8 {
    (index >> 8) as u8
}

fn lo(index: u16) -> u8 {
    index as u8
}

/// Writes each named class to `<dir>/<name>.class` in a fresh temporary
/// directory suitable as one search-path entry.
pub(crate) fn classpath(classes: &[(&str, Vec<u8>)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, bytes) in classes {
        let path = dir.path().join(format!("{name}.class"));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, bytes).unwrap();
    }
    dir
}

/// The eight-method companion class the end-to-end tests exercise:
///
/// ```java
/// public class FieldsAndMethods {
///     public int a = 1;
///     public static int b = 2;
///     public static int add(int x, int y) { return x + y; }
///     public void hello() { Runtime.log("Hello world"); }
///     public void incrementA() { a++; }
///     public void incrementB() { b++; }
///     public void incrementBoth() { incrementA(); incrementB(); }
///     public static FieldsAndMethods create() { return new FieldsAndMethods(); }
/// }
/// ```
pub(crate) fn fields_and_methods() -> Vec<u8> {
    let mut cb = ClassBuilder::new("FieldsAndMethods", Some("java/lang/Object"));
    cb.field(ACC_PUBLIC, "a", "I");
    cb.field(ACC_PUBLIC | ACC_STATIC, "b", "I");

    let object_init = cb.method_ref("java/lang/Object", "<init>", "()V");
    let field_a = cb.field_ref("FieldsAndMethods", "a", "I");
    let field_b = cb.field_ref("FieldsAndMethods", "b", "I");
    let this_class = cb.class_const("FieldsAndMethods");
    let own_init = cb.method_ref("FieldsAndMethods", "<init>", "()V");
    let increment_a = cb.method_ref("FieldsAndMethods", "incrementA", "()V");
    let increment_b = cb.method_ref("FieldsAndMethods", "incrementB", "()V");
    let hello_str = cb.string_const("Hello world");
    let runtime_log = cb.method_ref("Runtime", "log", "(Ljava/lang/String;)V");

    cb.method(
        ACC_PUBLIC,
        "<init>",
        "()V",
        Some(Code {
            max_stack: 2,
            max_locals: 1,
            bytes: vec![
                inst::ALOAD_0,
                inst::INVOKESPECIAL,
                hi(object_init),
                lo(object_init),
                inst::ALOAD_0,
                inst::ICONST_1,
                inst::PUTFIELD,
                hi(field_a),
                lo(field_a),
                inst::RETURN,
            ],
        }),
    );
    cb.method(
        ACC_STATIC,
        "<clinit>",
        "()V",
        Some(Code {
            max_stack: 1,
            max_locals: 0,
            bytes: vec![
                inst::ICONST_2,
                inst::PUTSTATIC,
                hi(field_b),
                lo(field_b),
                inst::RETURN,
            ],
        }),
    );
    cb.method(
        ACC_PUBLIC | ACC_STATIC,
        "add",
        "(II)I",
        Some(Code {
            max_stack: 2,
            max_locals: 2,
            bytes: vec![inst::ILOAD_0, inst::ILOAD_1, inst::IADD, inst::IRETURN],
        }),
    );
    cb.method(
        ACC_PUBLIC,
        "hello",
        "()V",
        Some(Code {
            max_stack: 1,
            max_locals: 1,
            bytes: vec![
                inst::LDC,
                lo(hello_str),
                inst::INVOKESTATIC,
                hi(runtime_log),
                lo(runtime_log),
                inst::RETURN,
            ],
        }),
    );
    cb.method(
        ACC_PUBLIC,
        "incrementA",
        "()V",
        Some(Code {
            max_stack: 3,
            max_locals: 1,
            bytes: vec![
                inst::ALOAD_0,
                inst::DUP,
                inst::GETFIELD,
                hi(field_a),
                lo(field_a),
                inst::ICONST_1,
                inst::IADD,
                inst::PUTFIELD,
                hi(field_a),
                lo(field_a),
                inst::RETURN,
            ],
        }),
    );
    cb.method(
        ACC_PUBLIC,
        "incrementB",
        "()V",
        Some(Code {
            max_stack: 2,
            max_locals: 1,
            bytes: vec![
                inst::GETSTATIC,
                hi(field_b),
                lo(field_b),
                inst::ICONST_1,
                inst::IADD,
                inst::PUTSTATIC,
                hi(field_b),
                lo(field_b),
                inst::RETURN,
            ],
        }),
    );
    cb.method(
        ACC_PUBLIC,
        "incrementBoth",
        "()V",
        Some(Code {
            max_stack: 1,
            max_locals: 1,
            bytes: vec![
                inst::ALOAD_0,
                inst::INVOKEVIRTUAL,
                hi(increment_a),
                lo(increment_a),
                inst::ALOAD_0,
                inst::INVOKEVIRTUAL,
                hi(increment_b),
                lo(increment_b),
                inst::RETURN,
            ],
        }),
    );
    cb.method(
        ACC_PUBLIC | ACC_STATIC,
        "create",
        "()LFieldsAndMethods;",
        Some(Code {
            max_stack: 2,
            max_locals: 0,
            bytes: vec![
                inst::NEW,
                hi(this_class),
                lo(this_class),
                inst::DUP,
                inst::INVOKESPECIAL,
                hi(own_init),
                lo(own_init),
                inst::ARETURN,
            ],
        }),
    );

    let source = cb.utf8("FieldsAndMethods.java");
    cb.class_attribute("SourceFile", source.to_be_bytes().to_vec());
    cb.build()
}

/// The host-side `Runtime` class: a single native `log` method with no
/// bytecode body, dispatched through the native registry.
pub(crate) fn runtime_class() -> Vec<u8> {
    let mut cb = ClassBuilder::new("Runtime", Some("java/lang/Object"));
    cb.method(
        ACC_PUBLIC | ACC_STATIC | ACC_NATIVE,
        "log",
        "(Ljava/lang/String;)V",
        None,
    );
    cb.build()
}
