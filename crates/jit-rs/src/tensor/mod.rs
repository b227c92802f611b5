//! Opaque tensor values as seen by the IR: element kind, sizes, strides and raw bytes.
//!
//! Numeric computation is out of scope; tensors only travel through the
//! system as constants, attribute payloads and tracer inputs.

mod dtype;
mod host_tensor;

pub use dtype::ScalarType;
pub use host_tensor::{contiguous_strides, Element, Tensor};
