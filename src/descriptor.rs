use nom::{
    branch::alt,
    bytes::complete::take_until,
    character::complete::{char, one_of},
    combinator::{eof, map},
    multi::many0,
    sequence::delimited,
    IResult,
};

use crate::errors::{VmError, VmResult};

/// A parsed method descriptor such as `(ILjava/lang/String;)V`.
///
/// Every parameter counts one argument slot in this machine model,
/// longs and doubles included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub parameters: Vec<FieldType>,
    pub return_type: ReturnType,
}

pub type ReturnType = Option<FieldType>;

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum FieldType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Object(String),
    Short,
    Boolean,
    Array(Box<FieldType>),
}

impl MethodDescriptor {
    pub fn argc(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_void(&self) -> bool {
        self.return_type.is_none()
    }
}

/// Parses a full method descriptor, failing on trailing input.
pub fn method_descriptor(descriptor: &str) -> VmResult<MethodDescriptor> {
    parse_method_descriptor(descriptor)
        .map(|(_, d)| d)
        .map_err(|_| VmError::BadDescriptor(descriptor.to_string()))
}

fn parse_method_descriptor(input: &str) -> IResult<&str, MethodDescriptor> {
    let (input, parameters) = delimited(char('('), many0(parse_field_type), char(')'))(input)?;
    let (input, return_type) = parse_return_type(input)?;
    eof(input)?;
    Ok((
        input,
        MethodDescriptor {
            parameters,
            return_type,
        },
    ))
}

fn parse_return_type(input: &str) -> IResult<&str, ReturnType> {
    alt((map(parse_field_type, Some), parse_void_type))(input)
}

fn parse_field_type(input: &str) -> IResult<&str, FieldType> {
    alt((parse_base_type, parse_object_type, parse_array_type))(input)
}

fn parse_base_type(input: &str) -> IResult<&str, FieldType> {
    let (input, ch) = one_of("BCDFIJSZ")(input)?;
    let field_type = match ch {
        'B' => FieldType::Byte,
        'C' => FieldType::Char,
        'D' => FieldType::Double,
        'F' => FieldType::Float,
        'I' => FieldType::Int,
        'J' => FieldType::Long,
        'S' => FieldType::Short,
        'Z' => FieldType::Boolean,
        _ => unreachable!("one_of covers every base type"),
    };
    Ok((input, field_type))
}

fn parse_object_type(input: &str) -> IResult<&str, FieldType> {
    let (input, _) = char('L')(input)?;
    let (input, class_name) = take_until(";")(input)?;
    let (input, _) = char(';')(input)?;
    Ok((input, FieldType::Object(class_name.to_string())))
}

fn parse_array_type(input: &str) -> IResult<&str, FieldType> {
    let (input, _) = char('[')(input)?;
    let (input, element) = parse_field_type(input)?;
    Ok((input, FieldType::Array(Box::new(element))))
}

fn parse_void_type(input: &str) -> IResult<&str, ReturnType> {
    let (input, _) = char('V')(input)?;
    Ok((input, None))
}
