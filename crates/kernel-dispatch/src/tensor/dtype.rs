//! Enumerates the scalar element kinds understood by the dispatch layer.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Runtime tag identifying a tensor's scalar data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ElementKind {
    /// IEEE-754 half precision.
    Float16,
    /// bfloat16 (8-bit exponent, 7-bit mantissa).
    BFloat16,
    Float32,
    Float64,
    Int8,
    UInt8,
    Int16,
    Int32,
    Int64,
    /// One byte per element, zero is false.
    Bool,
}

impl ElementKind {
    /// Every supported kind, in declaration order.
    pub const ALL: [ElementKind; 10] = [
        ElementKind::Float16,
        ElementKind::BFloat16,
        ElementKind::Float32,
        ElementKind::Float64,
        ElementKind::Int8,
        ElementKind::UInt8,
        ElementKind::Int16,
        ElementKind::Int32,
        ElementKind::Int64,
        ElementKind::Bool,
    ];

    /// Returns the number of bytes required per scalar element.
    pub const fn size_in_bytes(self) -> usize {
        match self {
            ElementKind::Int8 | ElementKind::UInt8 | ElementKind::Bool => 1,
            ElementKind::Float16 | ElementKind::BFloat16 | ElementKind::Int16 => 2,
            ElementKind::Float32 | ElementKind::Int32 => 4,
            ElementKind::Float64 | ElementKind::Int64 => 8,
        }
    }

    /// Legacy scalar-type name used in user-facing messages.
    pub const fn name(self) -> &'static str {
        match self {
            ElementKind::Float16 => "Half",
            ElementKind::BFloat16 => "BFloat16",
            ElementKind::Float32 => "Float",
            ElementKind::Float64 => "Double",
            ElementKind::Int8 => "Char",
            ElementKind::UInt8 => "Byte",
            ElementKind::Int16 => "Short",
            ElementKind::Int32 => "Int",
            ElementKind::Int64 => "Long",
            ElementKind::Bool => "Bool",
        }
    }

    pub const fn is_floating_point(self) -> bool {
        matches!(
            self,
            ElementKind::Float16 | ElementKind::BFloat16 | ElementKind::Float32 | ElementKind::Float64
        )
    }

    /// Reconstructs a kind from its legacy name.
    pub fn from_name(name: &str) -> Option<Self> {
        ElementKind::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_for_every_kind() {
        for kind in ElementKind::ALL {
            assert_eq!(ElementKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ElementKind::from_name("Quad"), None);
    }

    #[test]
    fn sizes_match_scalar_widths() {
        assert_eq!(ElementKind::Float16.size_in_bytes(), 2);
        assert_eq!(ElementKind::Float64.size_in_bytes(), 8);
        assert_eq!(ElementKind::Bool.size_in_bytes(), 1);
        assert!(ElementKind::BFloat16.is_floating_point());
        assert!(!ElementKind::Int64.is_floating_point());
    }
}
