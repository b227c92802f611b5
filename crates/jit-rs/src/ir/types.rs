use crate::tensor::{contiguous_strides, ScalarType, Tensor};
use std::fmt;

/// Static type descriptor attached to every [`Value`](super::Value).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Type {
    /// Nothing is known about the value yet.
    #[default]
    Dynamic,
    Tensor(TensorType),
}

/// Tensor element kind together with static sizes and strides.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorType {
    scalar_type: ScalarType,
    sizes: Vec<i64>,
    strides: Vec<i64>,
}

impl TensorType {
    pub fn new(scalar_type: ScalarType, sizes: Vec<i64>, strides: Vec<i64>) -> Self {
        assert_eq!(
            sizes.len(),
            strides.len(),
            "tensor type sizes and strides must have the same rank"
        );
        TensorType {
            scalar_type,
            sizes,
            strides,
        }
    }

    pub fn contiguous_of(scalar_type: ScalarType, sizes: Vec<i64>) -> Self {
        let strides = contiguous_strides(&sizes);
        TensorType::new(scalar_type, sizes, strides)
    }

    pub fn from_tensor(tensor: &Tensor) -> Self {
        TensorType::new(
            tensor.scalar_type(),
            tensor.sizes().to_vec(),
            tensor.strides().to_vec(),
        )
    }

    pub fn scalar_type(&self) -> ScalarType {
        self.scalar_type
    }

    pub fn sizes(&self) -> &[i64] {
        &self.sizes
    }

    pub fn strides(&self) -> &[i64] {
        &self.strides
    }

    /// Same element kind and sizes with row-major strides.
    pub fn contiguous(&self) -> TensorType {
        TensorType::contiguous_of(self.scalar_type, self.sizes.clone())
    }

    pub fn with_sizes(&self, sizes: Vec<i64>) -> TensorType {
        TensorType::contiguous_of(self.scalar_type, sizes)
    }

    pub fn with_scalar_type(&self, scalar_type: ScalarType) -> TensorType {
        TensorType::new(scalar_type, self.sizes.clone(), self.strides.clone())
    }
}

impl Type {
    pub fn tensor(&self) -> Option<&TensorType> {
        match self {
            Type::Tensor(ty) => Some(ty),
            Type::Dynamic => None,
        }
    }

    /// Contiguous version of a tensor type; dynamic stays dynamic.
    pub fn contiguous(&self) -> Type {
        match self {
            Type::Tensor(ty) => Type::Tensor(ty.contiguous()),
            Type::Dynamic => Type::Dynamic,
        }
    }
}

impl From<TensorType> for Type {
    fn from(value: TensorType) -> Self {
        Type::Tensor(value)
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.scalar_type.name())?;
        let contiguous = contiguous_strides(&self.sizes) == self.strides;
        for (axis, size) in self.sizes.iter().enumerate() {
            if axis > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{size}")?;
            if !contiguous {
                write!(f, "!{}", self.strides[axis])?;
            }
        }
        f.write_str(")")
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Dynamic => f.write_str("Dynamic"),
            Type::Tensor(ty) => write!(f, "{ty}"),
        }
    }
}
