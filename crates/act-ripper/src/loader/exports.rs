//! Export objects produced by module factories.
//!
//! An [`Exports`] value is a shared handle: cloning it yields another
//! reference to the same object, and [`Exports::ptr_eq`] compares identity the
//! way JavaScript compares object references.

use serde_json::{Map, Value};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Lazily evaluated export value.
pub type Getter = Rc<dyn Fn() -> Value>;

#[derive(Clone)]
enum Property {
    Value(Value),
    Getter(Getter),
}

#[derive(Default)]
struct ExportsInner {
    props: RefCell<Vec<(String, Property)>>,
    es_module: Cell<bool>,
}

/// A module's exports object.
#[derive(Clone, Default)]
pub struct Exports(Rc<ExportsInner>);

impl Exports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an exports object from a plain JSON mapping.
    pub fn from_map(map: Map<String, Value>) -> Self {
        let exports = Self::new();
        for (key, value) in map {
            exports.set(key, value);
        }
        exports
    }

    /// Whether `key` is an own property (value or getter).
    pub fn has_own(&self, key: &str) -> bool {
        self.0.props.borrow().iter().any(|(k, _)| k == key)
    }

    /// Plain assignment: overwrites any existing property.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.put(key.into(), Property::Value(value));
    }

    /// Define a getter-backed property, overwriting any existing one.
    pub fn set_getter(&self, key: impl Into<String>, getter: Getter) {
        self.put(key.into(), Property::Getter(getter));
    }

    fn put(&self, key: String, prop: Property) {
        let mut props = self.0.props.borrow_mut();
        match props.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = prop,
            None => props.push((key, prop)),
        }
    }

    /// Read a property, invoking its getter if it has one.
    pub fn get(&self, key: &str) -> Option<Value> {
        // Clone the property out so a getter may touch this object again.
        let prop = self
            .0
            .props
            .borrow()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, p)| p.clone())?;
        Some(match prop {
            Property::Value(v) => v,
            Property::Getter(g) => g(),
        })
    }

    /// Own property names in definition order.
    pub fn keys(&self) -> Vec<String> {
        self.0.props.borrow().iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.0.props.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_es_module(&self) -> bool {
        self.0.es_module.get()
    }

    pub(crate) fn set_es_module(&self) {
        self.0.es_module.set(true);
    }

    pub fn ptr_eq(&self, other: &Exports) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Snapshot every property (getters evaluated) into a JSON object.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        for key in self.keys() {
            if let Some(v) = self.get(&key) {
                map.insert(key, v);
            }
        }
        Value::Object(map)
    }
}

impl fmt::Debug for Exports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exports")
            .field("keys", &self.keys())
            .field("es_module", &self.is_es_module())
            .finish()
    }
}

/// What `require` hands back: an exports object, or whatever plain value a
/// factory assigned to `module.exports`.
#[derive(Clone, Debug)]
pub enum Export {
    Object(Exports),
    Value(Value),
}

impl Export {
    /// The empty-string value returned for ids missing from the table.
    pub fn sentinel() -> Self {
        Export::Value(Value::String(String::new()))
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self, Export::Value(Value::String(s)) if s.is_empty())
    }

    pub fn as_object(&self) -> Option<&Exports> {
        match self {
            Export::Object(o) => Some(o),
            Export::Value(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Export::Value(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Reference identity for objects, value equality otherwise.
    pub fn same_as(&self, other: &Export) -> bool {
        match (self, other) {
            (Export::Object(a), Export::Object(b)) => a.ptr_eq(b),
            (Export::Value(a), Export::Value(b)) => a == b,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_getter_is_lazy() {
        let calls = Rc::new(Cell::new(0));
        let exports = Exports::new();
        let counter = Rc::clone(&calls);
        exports.set_getter(
            "LAZY",
            Rc::new(move || {
                counter.set(counter.get() + 1);
                json!(42)
            }),
        );
        assert_eq!(calls.get(), 0);
        assert!(exports.has_own("LAZY"));
        assert_eq!(exports.get("LAZY"), Some(json!(42)));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_keys_keep_definition_order() {
        let exports = Exports::new();
        exports.set("b", json!(1));
        exports.set("a", json!(2));
        exports.set("b", json!(3));
        assert_eq!(exports.keys(), vec!["b", "a"]);
        assert_eq!(exports.to_value(), json!({"b": 3, "a": 2}));
    }

    #[test]
    fn test_clone_shares_identity() {
        let a = Exports::new();
        let b = a.clone();
        b.set("x", json!(true));
        assert!(a.ptr_eq(&b));
        assert!(a.has_own("x"));
        assert!(!a.ptr_eq(&Exports::new()));
    }

    #[test]
    fn test_sentinel() {
        assert!(Export::sentinel().is_sentinel());
        assert_eq!(Export::sentinel().as_str(), Some(""));
        assert!(!Export::Object(Exports::new()).is_sentinel());
    }
}
