//! Namespaced operator tags (`ns::name`) used as node kinds.

use serde::{Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;

/// Operator kind of a node, e.g. `aten::add` or `onnx::Constant`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(Cow<'static, str>);

impl Symbol {
    pub const fn from_static(qualified: &'static str) -> Self {
        Symbol(Cow::Borrowed(qualified))
    }

    pub fn new(qualified: impl Into<String>) -> Self {
        Symbol(Cow::Owned(qualified.into()))
    }

    pub fn namespaced(namespace: &str, name: &str) -> Self {
        Symbol::new(format!("{namespace}::{name}"))
    }

    pub fn aten(name: &str) -> Self {
        Self::namespaced(ATEN, name)
    }

    pub fn onnx(name: &str) -> Self {
        Self::namespaced(ONNX, name)
    }

    pub fn prim(name: &str) -> Self {
        Self::namespaced(PRIM, name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Namespace part, empty for unqualified symbols.
    pub fn namespace(&self) -> &str {
        match self.0.split_once("::") {
            Some((ns, _)) => ns,
            None => "",
        }
    }

    /// Unqualified operator name.
    pub fn name(&self) -> &str {
        match self.0.split_once("::") {
            Some((_, name)) => name,
            None => &self.0,
        }
    }

    pub fn is_onnx(&self) -> bool {
        self.namespace() == ONNX
    }

    pub fn is_aten(&self) -> bool {
        self.namespace() == ATEN
    }

    pub fn is_prim(&self) -> bool {
        self.namespace() == PRIM
    }
}

pub const ATEN: &str = "aten";
pub const ONNX: &str = "onnx";
pub const PRIM: &str = "prim";

/// Kinds with structural meaning inside the IR.
pub mod kinds {
    use super::Symbol;

    pub const PARAM: Symbol = Symbol::from_static("prim::Param");
    pub const RETURN: Symbol = Symbol::from_static("prim::Return");
    pub const UNDEFINED: Symbol = Symbol::from_static("prim::Undefined");
    pub const EVAL: Symbol = Symbol::from_static("prim::Eval");
    pub const HOST_OP: Symbol = Symbol::from_static("prim::HostOp");
    pub const NATIVE_OP: Symbol = Symbol::from_static("prim::NativeOp");
    pub const IF: Symbol = Symbol::from_static("prim::If");
    pub const WHILE: Symbol = Symbol::from_static("prim::While");
    pub const CONSTANT: Symbol = Symbol::from_static("onnx::Constant");
    pub const EXPAND: Symbol = Symbol::from_static("onnx::Expand");
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Symbol::new(value)
    }
}

impl Serialize for Symbol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_namespace_and_name() {
        let add = Symbol::aten("add");
        assert_eq!(add.namespace(), "aten");
        assert_eq!(add.name(), "add");
        assert!(add.is_aten());
        assert_eq!(Symbol::new("Relu").namespace(), "");
        assert_eq!(Symbol::new("Relu").name(), "Relu");
        assert_eq!(kinds::CONSTANT, Symbol::onnx("Constant"));
    }
}
