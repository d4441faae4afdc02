use std::sync::Arc;

use crate::consts::{ClassAccessFlag, FieldAccessFlag, MethodAccessFlag};
use crate::errors::{VmError, VmResult};

/// One class file, immutable after parsing. Names that the file stores as
/// constant-pool indices (this/super/interfaces, member names, descriptors)
/// are resolved to text during parsing; the indices for this and super are
/// retained alongside so the pool cross-references stay checkable.
#[derive(Debug)]
pub struct Class {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstPool,
    pub access_flags: ClassAccessFlag,
    pub name: Arc<str>,
    pub super_name: Option<Arc<str>>,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<Arc<str>>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub attributes: Vec<AttributeInfo>,
}

impl Class {
    /// Finds the first method matching `name`, and `descriptor` when one is
    /// given. An empty lookup descriptor is expressed as `None` and matches
    /// any overload.
    pub fn method(&self, name: &str, descriptor: Option<&str>) -> Option<&MethodInfo> {
        self.methods.iter().find(|m| {
            m.name.as_ref() == name
                && descriptor.map_or(true, |d| m.descriptor.as_ref() == d)
        })
    }
}

/// Field and method records share one layout in the class-file stream.
#[derive(Debug)]
pub struct FieldInfo {
    pub access_flags: FieldAccessFlag,
    pub name: Arc<str>,
    pub descriptor: Arc<str>,
    pub attributes: Vec<AttributeInfo>,
}

#[derive(Debug)]
pub struct MethodInfo {
    pub access_flags: MethodAccessFlag,
    pub name: Arc<str>,
    pub descriptor: Arc<str>,
    pub attributes: Vec<AttributeInfo>,
}

impl MethodInfo {
    pub fn code(&self) -> Option<&CodeAttribute> {
        self.attributes.iter().find_map(|a| match a {
            AttributeInfo::Code(code) => Some(code),
            _ => None,
        })
    }
}

#[derive(Debug)]
pub enum AttributeInfo {
    Code(CodeAttribute),
    SourceFile(Arc<str>),
    LineNumberTable(Vec<LineNumberTableItem>),
    Unknown(Arc<str>, Vec<u8>),
}

#[derive(Debug)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Arc<[u8]>,
    pub exception_table: Vec<ExceptionTableItem>,
    pub attributes: Vec<AttributeInfo>,
}

#[derive(Debug)]
pub struct ExceptionTableItem {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

#[derive(Debug)]
pub struct LineNumberTableItem {
    pub start_pc: u16,
    pub line_number: u16,
}

/// The constant pool, numbered from 1. Long and Double entries occupy two
/// slots; the second is an [`ConstantPoolInfo::Empty`] placeholder that is
/// never dereferenced.
#[derive(Debug, Default)]
pub struct ConstPool(pub(crate) Vec<ConstantPoolInfo>);

#[derive(Debug)]
pub enum ConstantPoolInfo {
    Utf8(Arc<str>),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class {
        name_index: u16,
    },
    String {
        string_index: u16,
    },
    Fieldref {
        class_index: u16,
        name_and_type_index: u16,
    },
    Methodref {
        class_index: u16,
        name_and_type_index: u16,
    },
    InterfaceMethodref {
        class_index: u16,
        name_and_type_index: u16,
    },
    NameAndType {
        name_index: u16,
        descriptor_index: u16,
    },
    // Parsed for stream position only, never resolved.
    MethodHandle {
        reference_kind: u8,
        reference_index: u16,
    },
    MethodType {
        descriptor_index: u16,
    },
    InvokeDynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    Empty,
}

impl ConstPool {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: u16) -> VmResult<&ConstantPoolInfo> {
        index
            .checked_sub(1)
            .and_then(|i| self.0.get(i as usize))
            .ok_or(VmError::InvalidConstant(index))
    }

    /// Follows indirection until text is reached: Utf8 yields its bytes,
    /// String its referenced Utf8, Class and NameAndType their name. Any
    /// other entry, index 0 included, resolves to nothing.
    pub fn resolve(&self, index: u16) -> Option<Arc<str>> {
        match self.0.get(index.checked_sub(1)? as usize)? {
            ConstantPoolInfo::Utf8(text) => Some(Arc::clone(text)),
            ConstantPoolInfo::String { string_index } => self.resolve(*string_index),
            ConstantPoolInfo::Class { name_index }
            | ConstantPoolInfo::NameAndType { name_index, .. } => self.resolve(*name_index),
            _ => None,
        }
    }

    pub fn name_and_type(&self, index: u16) -> VmResult<(Arc<str>, Arc<str>)> {
        let ConstantPoolInfo::NameAndType {
            name_index,
            descriptor_index,
        } = self.get(index)?
        else {
            return Err(VmError::InvalidConstant(index));
        };
        let name = self
            .resolve(*name_index)
            .ok_or(VmError::InvalidConstant(*name_index))?;
        let descriptor = self
            .resolve(*descriptor_index)
            .ok_or(VmError::InvalidConstant(*descriptor_index))?;
        Ok((name, descriptor))
    }

    /// The shared prologue of the field-access and invoke opcodes: a
    /// Fieldref/Methodref/InterfaceMethodref entry broken out into
    /// `(class name, member name, descriptor)`.
    pub fn member_ref(&self, index: u16) -> VmResult<(Arc<str>, Arc<str>, Arc<str>)> {
        let (class_index, name_and_type_index) = match self.get(index)? {
            ConstantPoolInfo::Fieldref {
                class_index,
                name_and_type_index,
            }
            | ConstantPoolInfo::Methodref {
                class_index,
                name_and_type_index,
            }
            | ConstantPoolInfo::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => (*class_index, *name_and_type_index),
            _ => return Err(VmError::InvalidConstant(index)),
        };
        let class_name = self
            .resolve(class_index)
            .ok_or(VmError::InvalidConstant(class_index))?;
        let (name, descriptor) = self.name_and_type(name_and_type_index)?;
        Ok((class_name, name, descriptor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf8(s: &str) -> ConstantPoolInfo {
        ConstantPoolInfo::Utf8(Arc::from(s))
    }

    #[test]
    fn resolve_walks_indirection_chains() {
        let pool = ConstPool(vec![
            utf8("FieldsAndMethods"),
            ConstantPoolInfo::Class { name_index: 1 },
            ConstantPoolInfo::String { string_index: 1 },
            ConstantPoolInfo::NameAndType {
                name_index: 1,
                descriptor_index: 1,
            },
        ]);
        assert_eq!(pool.resolve(1).as_deref(), Some("FieldsAndMethods"));
        assert_eq!(pool.resolve(2).as_deref(), Some("FieldsAndMethods"));
        assert_eq!(pool.resolve(3).as_deref(), Some("FieldsAndMethods"));
        assert_eq!(pool.resolve(4).as_deref(), Some("FieldsAndMethods"));
    }

    #[test]
    fn resolve_rejects_index_zero_and_non_text_entries() {
        let pool = ConstPool(vec![ConstantPoolInfo::Integer(42)]);
        assert!(pool.resolve(0).is_none());
        assert!(pool.resolve(1).is_none());
        assert!(pool.resolve(9).is_none());
    }

    #[test]
    fn member_ref_breaks_out_all_three_names() {
        let pool = ConstPool(vec![
            utf8("Runtime"),
            ConstantPoolInfo::Class { name_index: 1 },
            utf8("log"),
            utf8("(Ljava/lang/String;)V"),
            ConstantPoolInfo::NameAndType {
                name_index: 3,
                descriptor_index: 4,
            },
            ConstantPoolInfo::Methodref {
                class_index: 2,
                name_and_type_index: 5,
            },
        ]);
        let (class, name, desc) = pool.member_ref(6).unwrap();
        assert_eq!(class.as_ref(), "Runtime");
        assert_eq!(name.as_ref(), "log");
        assert_eq!(desc.as_ref(), "(Ljava/lang/String;)V");
    }

    #[test]
    fn member_ref_rejects_non_reference_entries() {
        let pool = ConstPool(vec![utf8("x")]);
        assert!(matches!(
            pool.member_ref(1),
            Err(VmError::InvalidConstant(1))
        ));
    }
}
