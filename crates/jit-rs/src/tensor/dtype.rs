//! Enumerates the scalar element kinds a tensor may carry.

use serde::{Deserialize, Serialize};

/// Element kind shared by tensors and tensor-typed IR values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    /// 64-bit floating point.
    Double,
    /// 32-bit floating point.
    Float,
    /// 16-bit floating point (fp16).
    Half,
    /// Unsigned 8-bit integer.
    Byte,
    /// Signed 8-bit integer.
    Char,
    /// Signed 16-bit integer.
    Short,
    /// Signed 32-bit integer.
    Int,
    /// Signed 64-bit integer.
    Long,
}

impl ScalarType {
    pub const ALL: [ScalarType; 8] = [
        ScalarType::Double,
        ScalarType::Float,
        ScalarType::Half,
        ScalarType::Byte,
        ScalarType::Char,
        ScalarType::Short,
        ScalarType::Int,
        ScalarType::Long,
    ];

    /// Returns the number of bytes required per scalar element.
    pub fn size_in_bytes(self) -> usize {
        match self {
            ScalarType::Double | ScalarType::Long => 8,
            ScalarType::Float | ScalarType::Int => 4,
            ScalarType::Half | ScalarType::Short => 2,
            ScalarType::Byte | ScalarType::Char => 1,
        }
    }

    /// Name used in type annotations of the textual IR (`Float(2, 3)`).
    pub fn name(self) -> &'static str {
        match self {
            ScalarType::Double => "Double",
            ScalarType::Float => "Float",
            ScalarType::Half => "Half",
            ScalarType::Byte => "Byte",
            ScalarType::Char => "Char",
            ScalarType::Short => "Short",
            ScalarType::Int => "Int",
            ScalarType::Long => "Long",
        }
    }

    /// Inverse of [`ScalarType::name`].
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.name() == name)
    }

    pub fn is_floating_point(self) -> bool {
        matches!(
            self,
            ScalarType::Double | ScalarType::Float | ScalarType::Half
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for ty in ScalarType::ALL {
            assert_eq!(ScalarType::from_name(ty.name()), Some(ty));
        }
        assert_eq!(ScalarType::from_name("Bool"), None);
    }
}
