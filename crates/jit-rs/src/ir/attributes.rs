//! Typed node attributes.
//!
//! Attributes are stored in insertion order so that printing and export are
//! deterministic. Reading an attribute through an accessor of the wrong kind
//! is a programming error and panics.

use super::graph::Graph;
use crate::tensor::Tensor;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    F,
    Fs,
    I,
    Is,
    S,
    Ss,
    T,
    Ts,
    G,
    Gs,
}

impl AttributeKind {
    pub fn name(self) -> &'static str {
        match self {
            AttributeKind::F => "f",
            AttributeKind::Fs => "fs",
            AttributeKind::I => "i",
            AttributeKind::Is => "is",
            AttributeKind::S => "s",
            AttributeKind::Ss => "ss",
            AttributeKind::T => "t",
            AttributeKind::Ts => "ts",
            AttributeKind::G => "g",
            AttributeKind::Gs => "gs",
        }
    }
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
pub enum AttributeValue {
    F(f64),
    Fs(Vec<f64>),
    I(i64),
    Is(Vec<i64>),
    S(String),
    Ss(Vec<String>),
    T(Tensor),
    Ts(Vec<Tensor>),
    G(Arc<Graph>),
    Gs(Vec<Arc<Graph>>),
}

impl AttributeValue {
    pub fn kind(&self) -> AttributeKind {
        match self {
            AttributeValue::F(_) => AttributeKind::F,
            AttributeValue::Fs(_) => AttributeKind::Fs,
            AttributeValue::I(_) => AttributeKind::I,
            AttributeValue::Is(_) => AttributeKind::Is,
            AttributeValue::S(_) => AttributeKind::S,
            AttributeValue::Ss(_) => AttributeKind::Ss,
            AttributeValue::T(_) => AttributeKind::T,
            AttributeValue::Ts(_) => AttributeKind::Ts,
            AttributeValue::G(_) => AttributeKind::G,
            AttributeValue::Gs(_) => AttributeKind::Gs,
        }
    }
}

/// Ordered attribute map keyed by attribute name.
#[derive(Debug, Clone, Default)]
pub struct Attributes {
    entries: Vec<(String, AttributeValue)>,
}

macro_rules! attribute_accessors {
    ($($setter:ident, $getter:ident, $variant:ident, $ty:ty;)*) => {
        $(
            pub fn $setter(&mut self, name: &str, value: $ty) -> &mut Self {
                self.set(name, AttributeValue::$variant(value))
            }

            pub fn $getter(&self, name: &str) -> &$ty {
                match self.expect_attribute(name) {
                    AttributeValue::$variant(value) => value,
                    other => panic!(
                        "attribute '{}' has kind {}, not {}",
                        name,
                        other.kind(),
                        AttributeKind::$variant
                    ),
                }
            }
        )*
    };
}

impl Attributes {
    pub fn set(&mut self, name: &str, value: AttributeValue) -> &mut Self {
        match self.entries.iter_mut().find(|(key, _)| key == name) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((name.to_string(), value)),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn kind_of(&self, name: &str) -> Option<AttributeKind> {
        self.get(name).map(AttributeValue::kind)
    }

    pub fn remove(&mut self, name: &str) -> Option<AttributeValue> {
        let pos = self.entries.iter().position(|(key, _)| key == name)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> + '_ {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn expect_attribute(&self, name: &str) -> &AttributeValue {
        match self.get(name) {
            Some(value) => value,
            None => panic!("node has no attribute '{name}'"),
        }
    }

    pub fn set_f(&mut self, name: &str, value: f64) -> &mut Self {
        self.set(name, AttributeValue::F(value))
    }

    pub fn f(&self, name: &str) -> f64 {
        match self.expect_attribute(name) {
            AttributeValue::F(value) => *value,
            other => panic!("attribute '{name}' has kind {}, not f", other.kind()),
        }
    }

    pub fn set_i(&mut self, name: &str, value: i64) -> &mut Self {
        self.set(name, AttributeValue::I(value))
    }

    pub fn i(&self, name: &str) -> i64 {
        match self.expect_attribute(name) {
            AttributeValue::I(value) => *value,
            other => panic!("attribute '{name}' has kind {}, not i", other.kind()),
        }
    }

    attribute_accessors! {
        set_fs, fs, Fs, Vec<f64>;
        set_is, is, Is, Vec<i64>;
        set_s, s, S, String;
        set_ss, ss, Ss, Vec<String>;
        set_t, t, T, Tensor;
        set_ts, ts, Ts, Vec<Tensor>;
        set_g, g, G, Arc<Graph>;
        set_gs, gs, Gs, Vec<Arc<Graph>>;
    }
}

pub(crate) fn fmt_attribute(f: &mut fmt::Formatter<'_>, value: &AttributeValue) -> fmt::Result {
    fn list<T>(
        f: &mut fmt::Formatter<'_>,
        items: &[T],
        mut each: impl FnMut(&mut fmt::Formatter<'_>, &T) -> fmt::Result,
    ) -> fmt::Result {
        f.write_str("[")?;
        for (idx, item) in items.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            each(f, item)?;
        }
        f.write_str("]")
    }

    match value {
        AttributeValue::F(v) => write!(f, "{v}"),
        AttributeValue::Fs(vs) => list(f, vs, |f, v| write!(f, "{v}")),
        AttributeValue::I(v) => write!(f, "{v}"),
        AttributeValue::Is(vs) => list(f, vs, |f, v| write!(f, "{v}")),
        AttributeValue::S(v) => write!(f, "{v:?}"),
        AttributeValue::Ss(vs) => list(f, vs, |f, v| write!(f, "{v:?}")),
        AttributeValue::T(t) => write!(f, "{{{t}}}"),
        AttributeValue::Ts(ts) => list(f, ts, |f, t| write!(f, "{{{t}}}")),
        AttributeValue::G(_) => f.write_str("<Graph>"),
        AttributeValue::Gs(gs) => list(f, gs, |f, _| f.write_str("<Graph>")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_in_place_and_keeps_order() {
        let mut attrs = Attributes::default();
        attrs.set_i("dim", 0).set_s("mode", "constant".into()).set_i("dim", 2);
        assert_eq!(attrs.names().collect::<Vec<_>>(), vec!["dim", "mode"]);
        assert_eq!(attrs.i("dim"), 2);
        assert_eq!(attrs.kind_of("mode"), Some(AttributeKind::S));
    }

    #[test]
    #[should_panic(expected = "has kind i, not f")]
    fn reading_wrong_kind_panics() {
        let mut attrs = Attributes::default();
        attrs.set_i("alpha", 1);
        let _ = attrs.f("alpha");
    }
}
