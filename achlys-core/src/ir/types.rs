//! The IR type system.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A first-order IR type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IrType {
    Void,
    /// Integer of the given bit width.
    Int(u32),
    Float,
    Double,
    Ptr(Box<IrType>),
    Array(Box<IrType>, u64),
    Struct(Vec<IrType>),
}

impl IrType {
    /// Pointer, array, and struct values participate in the pointer map.
    pub fn is_pointer_like(&self) -> bool {
        matches!(self, Self::Ptr(_) | Self::Array(_, _) | Self::Struct(_))
    }

    pub fn is_float_like(&self) -> bool {
        matches!(self, Self::Float | Self::Double)
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Self::Void)
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Self::Int(_))
    }

    pub fn is_ptr(&self) -> bool {
        matches!(self, Self::Ptr(_))
    }

    /// The pointed-to type, for pointers.
    pub fn pointee(&self) -> Option<&IrType> {
        match self {
            Self::Ptr(inner) => Some(inner),
            _ => None,
        }
    }

    /// Element type for arrays, pointee for pointers.
    pub fn element(&self) -> Option<&IrType> {
        match self {
            Self::Ptr(inner) | Self::Array(inner, _) => Some(inner),
            _ => None,
        }
    }

    /// Wrap this type in a pointer.
    pub fn ptr_to(self) -> IrType {
        IrType::Ptr(Box::new(self))
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => write!(f, "void"),
            Self::Int(bits) => write!(f, "i{bits}"),
            Self::Float => write!(f, "float"),
            Self::Double => write!(f, "double"),
            Self::Ptr(inner) => write!(f, "{inner}*"),
            Self::Array(inner, len) => write!(f, "[{len} x {inner}]"),
            Self::Struct(fields) => {
                write!(f, "{{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{field}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_likeness() {
        assert!(IrType::Double.ptr_to().is_pointer_like());
        assert!(IrType::Array(Box::new(IrType::Float), 8).is_pointer_like());
        assert!(IrType::Struct(vec![IrType::Int(32)]).is_pointer_like());
        assert!(!IrType::Int(32).is_pointer_like());
        assert!(!IrType::Double.is_pointer_like());
    }

    #[test]
    fn display_forms() {
        assert_eq!(IrType::Int(1).to_string(), "i1");
        assert_eq!(IrType::Float.ptr_to().to_string(), "float*");
        assert_eq!(
            IrType::Array(Box::new(IrType::Double), 4).to_string(),
            "[4 x double]"
        );
    }
}
