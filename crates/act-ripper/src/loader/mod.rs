//! Bundler-compatible module loader shim.
//!
//! Implements just enough of the bundler runtime's module contract to run the
//! factories that lead to manifest data: id-indexed factory invocation with
//! memoized exports, the ES-module marker, own-property checks and lazy
//! getter definitions. Export activity is observable through scoped
//! observers ([`Loader::observe`]) instead of a patched global primitive.

pub mod exports;

pub use exports::{Export, Exports, Getter};

use crate::error::{FactoryError, LoaderError};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// Module identifier as it appears in a module map.
///
/// Integer-like ids order before named ids, matching the key order of the
/// JavaScript object the table was read from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModuleId {
    Numeric(u64),
    Named(String),
}

impl ModuleId {
    /// Id with path separators replaced, usable as a file stem.
    pub fn file_stem(&self) -> String {
        self.to_string().replace(['/', '\\'], "_")
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleId::Numeric(n) => write!(f, "{n}"),
            ModuleId::Named(s) => f.write_str(s),
        }
    }
}

impl From<u64> for ModuleId {
    fn from(n: u64) -> Self {
        ModuleId::Numeric(n)
    }
}

impl From<&str> for ModuleId {
    fn from(s: &str) -> Self {
        // Only canonical integers: "0042" stays a name so it round-trips.
        if let Ok(n) = s.parse::<u64>() {
            if n.to_string() == s {
                return ModuleId::Numeric(n);
            }
        }
        ModuleId::Named(s.to_string())
    }
}

impl From<String> for ModuleId {
    fn from(s: String) -> Self {
        ModuleId::from(s.as_str())
    }
}

/// A compiled module factory.
pub trait ModuleFactory: Send + Sync {
    /// Factory body text, used for static inspection.
    fn source(&self) -> &str;

    /// Run the factory: `(module, module.exports, require)`.
    fn invoke(
        &self,
        module: &ModuleRecord,
        exports: &Exports,
        require: &Loader<'_>,
    ) -> Result<(), FactoryError>;
}

type FactoryFn =
    dyn Fn(&ModuleRecord, &Exports, &Loader<'_>) -> Result<(), FactoryError> + Send + Sync;

/// Factory backed by a Rust closure.
pub struct FnFactory {
    source: String,
    body: Box<FactoryFn>,
}

impl FnFactory {
    pub fn new<F>(source: impl Into<String>, body: F) -> Self
    where
        F: Fn(&ModuleRecord, &Exports, &Loader<'_>) -> Result<(), FactoryError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            source: source.into(),
            body: Box::new(body),
        }
    }

    /// A factory with source text only; invoking it does nothing.
    pub fn inert(source: impl Into<String>) -> Self {
        Self::new(source, |_, _, _| Ok(()))
    }
}

impl ModuleFactory for FnFactory {
    fn source(&self) -> &str {
        &self.source
    }

    fn invoke(
        &self,
        module: &ModuleRecord,
        exports: &Exports,
        require: &Loader<'_>,
    ) -> Result<(), FactoryError> {
        (self.body)(module, exports, require)
    }
}

/// Mapping of module ids to factories.
#[derive(Clone, Default)]
pub struct ModuleTable {
    factories: BTreeMap<ModuleId, Arc<dyn ModuleFactory>>,
}

impl ModuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<ModuleId>, factory: Arc<dyn ModuleFactory>) {
        self.factories.insert(id.into(), factory);
    }

    /// Builder-style insert of a closure factory.
    pub fn with<F>(mut self, id: impl Into<ModuleId>, source: &str, body: F) -> Self
    where
        F: Fn(&ModuleRecord, &Exports, &Loader<'_>) -> Result<(), FactoryError>
            + Send
            + Sync
            + 'static,
    {
        self.insert(id, Arc::new(FnFactory::new(source, body)));
        self
    }

    /// Shallow-merge `layer` over this table; later entries win.
    pub fn extend(&mut self, layer: &ModuleTable) {
        for (id, factory) in &layer.factories {
            self.factories.insert(id.clone(), Arc::clone(factory));
        }
    }

    pub fn get(&self, id: &ModuleId) -> Option<&Arc<dyn ModuleFactory>> {
        self.factories.get(id)
    }

    pub fn contains(&self, id: &ModuleId) -> bool {
        self.factories.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ModuleId, &Arc<dyn ModuleFactory>)> {
        self.factories.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ModuleId> {
        self.factories.keys()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for ModuleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleTable")
            .field("modules", &self.factories.len())
            .finish()
    }
}

/// Per-run record of one module (`installedModules[id]`).
#[derive(Debug)]
pub struct ModuleRecord {
    id: ModuleId,
    exports: RefCell<Export>,
    loaded: Cell<bool>,
}

impl ModuleRecord {
    fn new(id: ModuleId) -> Self {
        Self {
            id,
            exports: RefCell::new(Export::Object(Exports::new())),
            loaded: Cell::new(false),
        }
    }

    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    pub fn exports(&self) -> Export {
        self.exports.borrow().clone()
    }

    /// `module.exports = value`.
    pub fn set_exports(&self, export: Export) {
        *self.exports.borrow_mut() = export;
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.get()
    }
}

type Observer = Rc<dyn Fn(&Exports)>;

/// The require function and its helper flags, scoped to one run.
pub struct Loader<'t> {
    table: &'t ModuleTable,
    installed: RefCell<HashMap<ModuleId, Rc<ModuleRecord>>>,
    observers: RefCell<Vec<(u64, Observer)>>,
    next_observer: Cell<u64>,
    public_path: String,
}

impl<'t> Loader<'t> {
    pub fn new(table: &'t ModuleTable) -> Self {
        Self {
            table,
            installed: RefCell::new(HashMap::new()),
            observers: RefCell::new(Vec::new()),
            next_observer: Cell::new(0),
            public_path: String::new(),
        }
    }

    pub fn with_public_path(mut self, base: impl Into<String>) -> Self {
        self.public_path = base.into();
        self
    }

    pub fn table(&self) -> &'t ModuleTable {
        self.table
    }

    /// `__webpack_require__.p`
    pub fn public_path(&self) -> &str {
        &self.public_path
    }

    /// Load a module, running its factory at most once per run.
    pub fn require(&self, id: &ModuleId) -> Result<Export, LoaderError> {
        if let Some(record) = self.installed.borrow().get(id) {
            return Ok(record.exports());
        }

        let Some(factory) = self.table.get(id) else {
            return Ok(Export::sentinel());
        };

        // Memoize before running so circular requires see partial exports.
        let record = Rc::new(ModuleRecord::new(id.clone()));
        self.installed
            .borrow_mut()
            .insert(id.clone(), Rc::clone(&record));

        let exports = match record.exports() {
            Export::Object(o) => o,
            Export::Value(_) => Exports::new(),
        };

        factory
            .invoke(&record, &exports, self)
            .map_err(|source| LoaderError::Factory {
                id: id.clone(),
                source,
            })?;

        record.loaded.set(true);
        Ok(record.exports())
    }

    /// Whether `id` has been required (successfully or not) in this run.
    pub fn is_installed(&self, id: &ModuleId) -> bool {
        self.installed.borrow().contains_key(id)
    }

    pub fn installed_count(&self) -> usize {
        self.installed.borrow().len()
    }

    /// `__webpack_require__.r`: set the ES-module marker and notify observers.
    pub fn mark_es_module(&self, exports: &Exports) {
        exports.set_es_module();
        let observers: Vec<Observer> = self
            .observers
            .borrow()
            .iter()
            .map(|(_, o)| Rc::clone(o))
            .collect();
        for observer in observers {
            observer(exports);
        }
    }

    /// `__webpack_require__.o`
    pub fn has_own(object: &Exports, key: &str) -> bool {
        object.has_own(key)
    }

    /// `__webpack_require__.d(exports, name, getter)`
    pub fn define(&self, exports: &Exports, name: &str, getter: Getter) {
        if !exports.has_own(name) {
            exports.set_getter(name, getter);
        }
    }

    /// `__webpack_require__.d(exports, definition)`
    pub fn define_all<I>(&self, exports: &Exports, definitions: I)
    where
        I: IntoIterator<Item = (String, Getter)>,
    {
        for (name, getter) in definitions {
            self.define(exports, &name, getter);
        }
    }

    /// Register an export observer for as long as the guard lives.
    pub fn observe<F>(&self, observer: F) -> ObserverGuard<'_, 't>
    where
        F: Fn(&Exports) + 'static,
    {
        let token = self.next_observer.get();
        self.next_observer.set(token + 1);
        self.observers.borrow_mut().push((token, Rc::new(observer)));
        ObserverGuard {
            loader: self,
            token,
        }
    }
}

/// Removes its observer from the loader on drop.
pub struct ObserverGuard<'l, 't> {
    loader: &'l Loader<'t>,
    token: u64,
}

impl Drop for ObserverGuard<'_, '_> {
    fn drop(&mut self) {
        self.loader
            .observers
            .borrow_mut()
            .retain(|(token, _)| *token != self.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_require_runs_factory_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let table = ModuleTable::new().with(7u64, "function(e,t,n){}", move |_, exports, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            exports.set("value", json!("x"));
            Ok(())
        });
        let loader = Loader::new(&table);

        let first = loader.require(&7u64.into()).unwrap();
        let second = loader.require(&7u64.into()).unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(first.same_as(&second));
        assert!(first.as_object().unwrap().ptr_eq(second.as_object().unwrap()));
    }

    #[test]
    fn test_missing_module_returns_sentinel() {
        let table = ModuleTable::new();
        let loader = Loader::new(&table);
        let result = loader.require(&"./missing.js".into()).unwrap();
        assert!(result.is_sentinel());
        assert_eq!(result.as_str(), Some(""));
    }

    #[test]
    fn test_nested_require_and_string_exports() {
        let table = ModuleTable::new()
            .with(1u64, "e.exports=n.p+\"img/a.png\"", |module, _, require| {
                module.set_exports(Export::Value(json!(format!(
                    "{}img/a.png",
                    require.public_path()
                ))));
                Ok(())
            })
            .with(2u64, "", |_, exports, require| {
                let dep = require.require(&1u64.into())?;
                exports.set("img", json!(dep.as_str().unwrap_or_default()));
                Ok(())
            });
        let loader = Loader::new(&table).with_public_path("https://cdn.test/");

        let exports = loader.require(&2u64.into()).unwrap();
        assert_eq!(
            exports.as_object().unwrap().get("img"),
            Some(json!("https://cdn.test/img/a.png"))
        );
        assert_eq!(loader.installed_count(), 2);
    }

    #[test]
    fn test_circular_require_sees_partial_exports() {
        let table = ModuleTable::new()
            .with(1u64, "", |_, exports, require| {
                exports.set("early", json!(1));
                require.require(&2u64.into())?;
                Ok(())
            })
            .with(2u64, "", |_, exports, require| {
                let back = require.require(&1u64.into())?;
                let saw = back.as_object().map(|o| o.has_own("early")).unwrap_or(false);
                exports.set("saw_early", json!(saw));
                Ok(())
            });
        let loader = Loader::new(&table);
        loader.require(&1u64.into()).unwrap();
        let two = loader.require(&2u64.into()).unwrap();
        assert_eq!(two.as_object().unwrap().get("saw_early"), Some(json!(true)));
    }

    #[test]
    fn test_failed_factory_is_not_rerun() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let table = ModuleTable::new().with(3u64, "", move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(FactoryError::new("boom"))
        });
        let loader = Loader::new(&table);
        assert!(loader.require(&3u64.into()).is_err());
        assert!(loader.require(&3u64.into()).is_ok());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_define_does_not_overwrite_or_invoke() {
        let table = ModuleTable::new();
        let loader = Loader::new(&table);
        let exports = Exports::new();
        exports.set("A", json!(1));
        loader.define(&exports, "A", Rc::new(|| json!(2)));
        loader.define_all(
            &exports,
            vec![("B".to_string(), Rc::new(|| json!(3)) as Getter)],
        );
        assert_eq!(exports.get("A"), Some(json!(1)));
        assert_eq!(exports.get("B"), Some(json!(3)));
        assert!(Loader::has_own(&exports, "B"));
    }

    #[test]
    fn test_observer_is_scoped() {
        let table = ModuleTable::new();
        let loader = Loader::new(&table);
        let seen = Rc::new(RefCell::new(Vec::new()));
        {
            let sink = Rc::clone(&seen);
            let _guard = loader.observe(move |e: &Exports| sink.borrow_mut().push(e.clone()));
            loader.mark_es_module(&Exports::new());
        }
        let after = Exports::new();
        loader.mark_es_module(&after);

        assert_eq!(seen.borrow().len(), 1);
        assert!(after.is_es_module());
    }

    #[test]
    fn test_module_id_parsing_and_order() {
        assert_eq!(ModuleId::from("42"), ModuleId::Numeric(42));
        assert_eq!(ModuleId::from("./a"), ModuleId::Named("./a".into()));
        assert_eq!(ModuleId::from("0"), ModuleId::Numeric(0));
        assert_eq!(ModuleId::from("0042"), ModuleId::Named("0042".into()));
        assert_eq!(ModuleId::from("0042").to_string(), "0042");
        assert_eq!(ModuleId::from("+7"), ModuleId::Named("+7".into()));
        assert!(ModuleId::from("9") < ModuleId::from("10"));
        assert!(ModuleId::from("10") < ModuleId::from("abc"));
        assert_eq!(ModuleId::from("./src/a\\b.png").file_stem(), "._src_a_b.png");
    }

    #[test]
    fn test_table_extend_later_wins() {
        let mut base = ModuleTable::new()
            .with(1u64, "vendor", |_, _, _| Ok(()))
            .with(2u64, "vendor-2", |_, _, _| Ok(()));
        let app = ModuleTable::new().with(2u64, "app-2", |_, _, _| Ok(()));
        base.extend(&app);
        assert_eq!(base.len(), 2);
        assert_eq!(base.get(&2u64.into()).unwrap().source(), "app-2");
        assert_eq!(base.get(&1u64.into()).unwrap().source(), "vendor");
    }
}
