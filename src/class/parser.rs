use std::sync::Arc;

use nom::{
    bytes::complete::take,
    combinator::eof,
    error_position,
    multi::count,
    number::complete::{be_f32, be_f64, be_i32, be_i64, be_u16, be_u32, u8},
    IResult,
};
use tracing::debug;

use crate::{
    class::{
        AttributeInfo, Class, CodeAttribute, ConstPool, ConstantPoolInfo, ExceptionTableItem,
        FieldInfo, LineNumberTableItem, MethodInfo,
    },
    consts::{ClassAccessFlag, FieldAccessFlag, MethodAccessFlag},
};

/// Parses one complete class file. The stream is consumed in the fixed
/// order of the format; trailing bytes are an error.
pub fn class_file(input: &[u8]) -> IResult<&[u8], Class> {
    let (input, (minor, major)) = parse_header(input)?;
    let (input, constant_pool) = parse_constant_pool(input)?;

    let (input, access_flags) = be_u16(input)?;
    let (input, this_class) = be_u16(input)?;
    let (input, super_class) = be_u16(input)?;

    let name = resolve(&constant_pool, this_class, input)?;
    let super_name = if super_class == 0 {
        None
    } else {
        Some(resolve(&constant_pool, super_class, input)?)
    };

    let (input, interfaces) = parse_interfaces(input, &constant_pool)?;
    let (input, fields) = parse_fields(input, &constant_pool)?;
    let (input, methods) = parse_methods(input, &constant_pool)?;
    let (input, attributes) = parse_attributes(input, &constant_pool)?;

    eof(input)?;

    Ok((
        input,
        Class {
            minor_version: minor,
            major_version: major,
            access_flags: ClassAccessFlag::from_bits_retain(access_flags),
            name,
            super_name,
            this_class,
            super_class,
            constant_pool,
            interfaces,
            fields,
            methods,
            attributes,
        },
    ))
}

// The magic word and version pair are consumed but not validated.
fn parse_header(input: &[u8]) -> IResult<&[u8], (u16, u16)> {
    let (input, _magic) = be_u32(input)?;
    let (input, minor) = be_u16(input)?;
    let (input, major) = be_u16(input)?;
    Ok((input, (minor, major)))
}

fn parse_constant_pool(input: &[u8]) -> IResult<&[u8], ConstPool> {
    let (input, constant_pool_count) = be_u16(input)?;

    let slots = constant_pool_count.saturating_sub(1) as usize;
    let mut constant_pool = Vec::with_capacity(slots);

    let mut input = input;

    while constant_pool.len() < slots {
        let constant;
        (input, constant) = parse_constant(input)?;
        let need_empty = matches!(
            constant,
            ConstantPoolInfo::Long(_) | ConstantPoolInfo::Double(_)
        );
        constant_pool.push(constant);
        if need_empty {
            constant_pool.push(ConstantPoolInfo::Empty);
        }
    }

    Ok((input, ConstPool(constant_pool)))
}

fn parse_constant(mut input: &[u8]) -> IResult<&[u8], ConstantPoolInfo> {
    let tag;
    (input, tag) = u8(input)?;
    let cp_info = match tag {
        1 => {
            let length;
            (input, length) = be_u16(input)?;
            let bytes;
            (input, bytes) = take(length)(input)?;
            let text = cesu8::from_java_cesu8(bytes).map_err(|_| {
                nom::Err::Error(error_position!(input, nom::error::ErrorKind::Char))
            })?;
            ConstantPoolInfo::Utf8(Arc::from(text.as_ref()))
        }
        3 => {
            let int;
            (input, int) = be_i32(input)?;
            ConstantPoolInfo::Integer(int)
        }
        4 => {
            let float;
            (input, float) = be_f32(input)?;
            ConstantPoolInfo::Float(float)
        }
        5 => {
            let long;
            (input, long) = be_i64(input)?;
            ConstantPoolInfo::Long(long)
        }
        6 => {
            let double;
            (input, double) = be_f64(input)?;
            ConstantPoolInfo::Double(double)
        }
        7 => {
            let name_index;
            (input, name_index) = be_u16(input)?;
            ConstantPoolInfo::Class { name_index }
        }
        8 => {
            let string_index;
            (input, string_index) = be_u16(input)?;
            ConstantPoolInfo::String { string_index }
        }
        9 => {
            let (class_index, name_and_type_index);
            (input, class_index) = be_u16(input)?;
            (input, name_and_type_index) = be_u16(input)?;
            ConstantPoolInfo::Fieldref {
                class_index,
                name_and_type_index,
            }
        }
        10 => {
            let (class_index, name_and_type_index);
            (input, class_index) = be_u16(input)?;
            (input, name_and_type_index) = be_u16(input)?;
            ConstantPoolInfo::Methodref {
                class_index,
                name_and_type_index,
            }
        }
        11 => {
            let (class_index, name_and_type_index);
            (input, class_index) = be_u16(input)?;
            (input, name_and_type_index) = be_u16(input)?;
            ConstantPoolInfo::InterfaceMethodref {
                class_index,
                name_and_type_index,
            }
        }
        12 => {
            let (name_index, descriptor_index);
            (input, name_index) = be_u16(input)?;
            (input, descriptor_index) = be_u16(input)?;
            ConstantPoolInfo::NameAndType {
                name_index,
                descriptor_index,
            }
        }
        15 => {
            let (reference_kind, reference_index);
            (input, reference_kind) = u8(input)?;
            (input, reference_index) = be_u16(input)?;
            ConstantPoolInfo::MethodHandle {
                reference_kind,
                reference_index,
            }
        }
        16 => {
            let descriptor_index;
            (input, descriptor_index) = be_u16(input)?;
            ConstantPoolInfo::MethodType { descriptor_index }
        }
        18 => {
            let (bootstrap_method_attr_index, name_and_type_index);
            (input, bootstrap_method_attr_index) = be_u16(input)?;
            (input, name_and_type_index) = be_u16(input)?;
            ConstantPoolInfo::InvokeDynamic {
                bootstrap_method_attr_index,
                name_and_type_index,
            }
        }
        _ => {
            debug!(tag, "unsupported constant pool tag");
            return Err(nom::Err::Error(error_position!(
                input,
                nom::error::ErrorKind::Tag
            )));
        }
    };
    Ok((input, cp_info))
}

fn parse_interfaces<'a>(input: &'a [u8], pool: &ConstPool) -> IResult<&'a [u8], Vec<Arc<str>>> {
    let (input, interface_count) = be_u16(input)?;
    let (input, indices) = count(be_u16, interface_count as _)(input)?;

    let mut interfaces = Vec::with_capacity(indices.len());
    for index in indices {
        interfaces.push(resolve(pool, index, input)?);
    }
    Ok((input, interfaces))
}

fn parse_fields<'a>(input: &'a [u8], pool: &ConstPool) -> IResult<&'a [u8], Vec<FieldInfo>> {
    let (input, field_count) = be_u16(input)?;
    let (input, fields) = count(parse_field(pool), field_count as _)(input)?;
    Ok((input, fields))
}

fn parse_field(pool: &ConstPool) -> impl FnMut(&[u8]) -> IResult<&[u8], FieldInfo> + '_ {
    move |input| {
        let (input, access_flags) = be_u16(input)?;
        let (input, name_index) = be_u16(input)?;
        let (input, descriptor_index) = be_u16(input)?;
        let (input, attributes) = parse_attributes(input, pool)?;

        Ok((
            input,
            FieldInfo {
                access_flags: FieldAccessFlag::from_bits_retain(access_flags),
                name: resolve(pool, name_index, input)?,
                descriptor: resolve(pool, descriptor_index, input)?,
                attributes,
            },
        ))
    }
}

// Method records share the field record layout.
fn parse_methods<'a>(input: &'a [u8], pool: &ConstPool) -> IResult<&'a [u8], Vec<MethodInfo>> {
    let (input, methods_count) = be_u16(input)?;
    let (input, methods) = count(parse_method(pool), methods_count as _)(input)?;
    Ok((input, methods))
}

fn parse_method(pool: &ConstPool) -> impl FnMut(&[u8]) -> IResult<&[u8], MethodInfo> + '_ {
    move |input| {
        let (input, access_flags) = be_u16(input)?;
        let (input, name_index) = be_u16(input)?;
        let (input, descriptor_index) = be_u16(input)?;
        let (input, attributes) = parse_attributes(input, pool)?;

        Ok((
            input,
            MethodInfo {
                access_flags: MethodAccessFlag::from_bits_retain(access_flags),
                name: resolve(pool, name_index, input)?,
                descriptor: resolve(pool, descriptor_index, input)?,
                attributes,
            },
        ))
    }
}

fn parse_attributes<'a>(input: &'a [u8], pool: &ConstPool) -> IResult<&'a [u8], Vec<AttributeInfo>> {
    let (input, attributes_count) = be_u16(input)?;
    let (input, attributes) = count(parse_attribute(pool), attributes_count as _)(input)?;
    Ok((input, attributes))
}

// An attribute record is (u2 name index, u4 length, payload). The payload is
// sliced out by length and decoded by name; unrecognized names keep their
// bytes opaque.
fn parse_attribute(pool: &ConstPool) -> impl FnMut(&[u8]) -> IResult<&[u8], AttributeInfo> + '_ {
    move |input| {
        let (input, attribute_name_index) = be_u16(input)?;
        let (input, attribute_length) = be_u32(input)?;
        let (input, info) = take(attribute_length)(input)?;

        let attribute_name = resolve(pool, attribute_name_index, input)?;

        let attribute = match attribute_name.as_ref() {
            "Code" => {
                let (_, code) = parse_code_attribute(info, pool)?;
                code
            }
            "SourceFile" => {
                let (_, sourcefile_index) = be_u16(info)?;
                AttributeInfo::SourceFile(resolve(pool, sourcefile_index, input)?)
            }
            "LineNumberTable" => {
                let (_, line_number_table) = parse_line_number_table(info)?;
                AttributeInfo::LineNumberTable(line_number_table)
            }
            _ => AttributeInfo::Unknown(attribute_name, info.to_vec()),
        };

        Ok((input, attribute))
    }
}

fn parse_code_attribute<'a>(input: &'a [u8], pool: &ConstPool) -> IResult<&'a [u8], AttributeInfo> {
    let (input, max_stack) = be_u16(input)?;
    let (input, max_locals) = be_u16(input)?;

    let (input, code_length) = be_u32(input)?;
    let (input, code) = take(code_length)(input)?;

    let (input, exception_table_length) = be_u16(input)?;
    let (input, exception_table) =
        count(parse_exception_table, exception_table_length as _)(input)?;

    let (input, attributes) = parse_attributes(input, pool)?;

    Ok((
        input,
        AttributeInfo::Code(CodeAttribute {
            max_stack,
            max_locals,
            code: code.into(),
            exception_table,
            attributes,
        }),
    ))
}

fn parse_exception_table(input: &[u8]) -> IResult<&[u8], ExceptionTableItem> {
    let (input, start_pc) = be_u16(input)?;
    let (input, end_pc) = be_u16(input)?;
    let (input, handler_pc) = be_u16(input)?;
    let (input, catch_type) = be_u16(input)?;

    Ok((
        input,
        ExceptionTableItem {
            start_pc,
            end_pc,
            handler_pc,
            catch_type,
        },
    ))
}

fn parse_line_number_table(input: &[u8]) -> IResult<&[u8], Vec<LineNumberTableItem>> {
    let (input, line_number_table_length) = be_u16(input)?;
    count(
        |input| {
            let (input, start_pc) = be_u16(input)?;
            let (input, line_number) = be_u16(input)?;
            Ok((
                input,
                LineNumberTableItem {
                    start_pc,
                    line_number,
                },
            ))
        },
        line_number_table_length as _,
    )(input)
}

fn resolve<'a>(
    pool: &ConstPool,
    index: u16,
    input: &'a [u8],
) -> Result<Arc<str>, nom::Err<nom::error::Error<&'a [u8]>>> {
    pool.resolve(index).ok_or_else(|| {
        nom::Err::Error(error_position!(input, nom::error::ErrorKind::Verify))
    })
}
