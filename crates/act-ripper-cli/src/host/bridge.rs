//! In-page scripts and the factory type that executes modules inside the
//! page.
//!
//! The setup script runs before any page script. It swaps the bundler's
//! chunk global for a proxy that buffers every pushed chunk, records the
//! runtime's module map if the runtime ever runs, and exposes a readiness
//! promise. The bridge script is evaluated later, once the module table has
//! been acquired, and installs an in-page loader that [`PageFactory`]
//! drives one module at a time.

use act_ripper::acquisition::{Chunk, HostSnapshot, InterceptedModuleBuffer, TableLayout};
use act_ripper::loader::{Export, Exports, Loader, ModuleFactory, ModuleId, ModuleRecord, ModuleTable};
use act_ripper::FactoryError;
use chromiumoxide::page::Page;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::debug;

/// Installed ahead of page scripts. `__CHUNK_GLOBAL__` and `__SETTLE_MS__`
/// are substituted by [`setup_script`].
const SETUP_TEMPLATE: &str = r#"(function () {
  var R = window.__actRipper = { cached: [], loaded: null };
  var resolveReady;
  R.ready = new Promise(function (resolve) { resolveReady = resolve; });
  R.signalReady = function () { resolveReady(true); };
  window.addEventListener('load', function () {
    setTimeout(function () { resolveReady(true); }, __SETTLE_MS__);
  });
  var buffer = [];
  var proxy = new Proxy(buffer, {
    get: function (target, prop) {
      if (prop === 'push') {
        return function () {
          for (var i = 0; i < arguments.length; i++) { R.cached.push(arguments[i]); }
          return R.cached.length;
        };
      }
      return target[prop];
    },
    set: function (target, prop, value) {
      if (prop === 'push') {
        value([['__act_ripper'], {
          __act_ripper: function (module, exports, require) { R.loaded = require.m; }
        }, [['__act_ripper']]]);
        return true;
      }
      target[prop] = value;
      return true;
    }
  });
  var name = __CHUNK_GLOBAL__;
  if (name) { self[name] = proxy; }
})();"#;

/// Collects everything the setup script captured, as a JSON string.
pub const SNAPSHOT_SCRIPT: &str = r#"(function () {
  var R = window.__actRipper || { cached: [], loaded: null };
  function sources(map) {
    var out = {};
    if (!map) { return out; }
    Object.keys(map).forEach(function (k) { out[k] = String(map[k]); });
    return out;
  }
  function chunk(c) {
    var ids = Array.isArray(c[0]) ? c[0] : [c[0]];
    return { ids: ids.map(String), modules: sources(c[1]) };
  }
  var arrays = {};
  Object.keys(window).forEach(function (k) {
    if ((k.indexOf('webpackJsonp') === 0 || k.indexOf('webpackChunk') === 0) && Array.isArray(window[k])) {
      arrays[k] = Array.prototype.slice.call(window[k]).map(chunk);
    }
  });
  return JSON.stringify({
    baseUrl: document.baseURI,
    cached: R.cached.map(chunk),
    loaded: R.loaded ? sources(R.loaded) : null,
    chunkArrays: arrays,
    scripts: Array.prototype.map.call(document.scripts, function (s) { return s.src; }).filter(Boolean)
  });
})()"#;

/// In-page loader. `bind(layout)` rebuilds the acquired table, `invoke(id)`
/// runs one module and reports its exports plus every ES-module exports
/// object that appeared while it ran.
pub const BRIDGE_SCRIPT: &str = r#"(function () {
  var R = window.__actRipper;
  if (!R || R.bind) { return; }
  R.bind = function (layout) {
    var table = {};
    if (layout.kind === 'intercepted') {
      Object.assign(table, R.loaded || {});
      R.cached.forEach(function (c) { Object.assign(table, c[1]); });
    } else {
      var arr = window[layout.property] || [];
      layout.layers.forEach(function (i) { if (arr[i]) { Object.assign(table, arr[i][1]); } });
    }
    var installed = {};
    R.table = table;
    R.reported = new WeakSet();
    R.marked = [];
    function require(id) {
      if (installed[id]) { return installed[id].exports; }
      var module = installed[id] = { exports: {}, id: id, loaded: false };
      if (!table[id]) { return ''; }
      table[id].call(module.exports, module, module.exports, require);
      module.loaded = true;
      return module.exports;
    }
    require.r = function (exports) {
      if (typeof Symbol !== 'undefined' && Symbol.toStringTag) {
        Object.defineProperty(exports, Symbol.toStringTag, { value: 'Module' });
      }
      Object.defineProperty(exports, '__esModule', { value: true });
      R.marked.push(exports);
    };
    require.o = function (object, property) {
      return Object.prototype.hasOwnProperty.call(object, property);
    };
    require.d = function (exports, name, getter) {
      if (!getter) {
        for (var key in name) {
          if (require.o(name, key) && !require.o(exports, key)) {
            Object.defineProperty(exports, key, { enumerable: true, get: name[key] });
          }
        }
        return;
      }
      if (!require.o(exports, name)) {
        Object.defineProperty(exports, name, { enumerable: true, get: getter });
      }
    };
    require.m = table;
    require.c = installed;
    require.p = document.baseURI;
    R.require = require;
    return Object.keys(table).length;
  };
  function plain(value) {
    if (value === null || typeof value !== 'object') { return value; }
    var out = {};
    for (var k in value) {
      try { out[k] = value[k]; } catch (e) { out[k] = null; }
    }
    return out;
  }
  function safeStringify(value) {
    var seen = new WeakSet();
    return JSON.stringify(value, function (key, v) {
      if (typeof v === 'function') { return undefined; }
      if (v !== null && typeof v === 'object') {
        if (seen.has(v)) { return undefined; }
        seen.add(v);
      }
      return v;
    });
  }
  R.invoke = function (id) {
    if (!R.table || !R.table[id]) { return safeStringify({ missing: true }); }
    R.marked = [];
    var exports = R.require(id);
    var fresh = exports !== null && typeof exports === 'object' && !R.reported.has(exports);
    var esModule = fresh && exports.__esModule === true;
    if (fresh) { R.reported.add(exports); }
    var subModules = [];
    R.marked.forEach(function (e) {
      if (e === exports || R.reported.has(e)) { return; }
      R.reported.add(e);
      subModules.push(plain(e));
    });
    return safeStringify({
      missing: false,
      exports: plain(exports),
      esModule: esModule,
      subModules: subModules
    });
  };
})()"#;

/// The setup script for a page whose chunk global is `chunk_global`.
pub fn setup_script(chunk_global: Option<&str>, settle_ms: u64) -> String {
    let name = match chunk_global {
        Some(n) => serde_json::to_string(n).unwrap_or_else(|_| "null".to_string()),
        None => "null".to_string(),
    };
    SETUP_TEMPLATE
        .replace("__CHUNK_GLOBAL__", &name)
        .replace("__SETTLE_MS__", &settle_ms.to_string())
}

/// Expression binding the in-page loader to `layout`.
pub fn bind_expression(layout: &TableLayout) -> Result<String, serde_json::Error> {
    Ok(format!(
        "window.__actRipper.bind({})",
        serde_json::to_string(layout)?
    ))
}

/// Expression invoking module `id` in the page.
pub fn invoke_expression(id: &ModuleId) -> Result<String, serde_json::Error> {
    Ok(format!(
        "window.__actRipper.invoke({})",
        serde_json::to_string(&id.to_string())?
    ))
}

#[derive(Debug, Deserialize)]
struct RawChunk {
    #[serde(default)]
    ids: Vec<String>,
    #[serde(default)]
    modules: BTreeMap<String, String>,
}

/// Snapshot reply of [`SNAPSHOT_SCRIPT`].
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSnapshot {
    #[serde(default)]
    base_url: String,
    #[serde(default)]
    cached: Vec<RawChunk>,
    #[serde(default)]
    loaded: Option<BTreeMap<String, String>>,
    #[serde(default)]
    chunk_arrays: BTreeMap<String, Vec<RawChunk>>,
    #[serde(default)]
    scripts: Vec<String>,
}

impl RawSnapshot {
    /// Build the host snapshot. `make` turns a module's id and source into
    /// a factory.
    pub fn into_snapshot<M>(self, fallback_base: &str, make: M) -> HostSnapshot
    where
        M: Fn(ModuleId, String) -> Arc<dyn ModuleFactory>,
    {
        let table = |modules: BTreeMap<String, String>| {
            let mut t = ModuleTable::new();
            for (id, source) in modules {
                let id = ModuleId::from(id);
                t.insert(id.clone(), make(id, source));
            }
            t
        };
        let chunk = |c: RawChunk| Chunk::new(c.ids, table(c.modules));

        let base_url = if self.base_url.is_empty() || self.base_url == "about:blank" {
            fallback_base.to_string()
        } else {
            self.base_url
        };
        HostSnapshot {
            base_url,
            intercepted: InterceptedModuleBuffer {
                cached: self.cached.into_iter().map(chunk).collect(),
                loaded: self.loaded.map(table),
            },
            chunk_arrays: self
                .chunk_arrays
                .into_iter()
                .map(|(name, chunks)| (name, chunks.into_iter().map(chunk).collect()))
                .collect(),
            script_urls: self.scripts,
        }
    }
}

/// Reply of `__actRipper.invoke`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeReply {
    pub missing: bool,
    #[serde(default)]
    pub exports: Value,
    #[serde(default)]
    pub es_module: bool,
    #[serde(default)]
    pub sub_modules: Vec<Map<String, Value>>,
}

impl InvokeReply {
    /// Replay the page-side effects through the Rust loader: sub-module
    /// exports are marked so observers see them, then the module's own
    /// exports are filled in.
    pub fn apply(self, module: &ModuleRecord, exports: &Exports, require: &Loader<'_>) {
        for sub in self.sub_modules {
            let replayed = Exports::from_map(sub);
            require.mark_es_module(&replayed);
        }
        match self.exports {
            Value::Object(map) => {
                for (key, value) in map {
                    exports.set(key, value);
                }
                if self.es_module {
                    require.mark_es_module(exports);
                }
            }
            Value::Null => {}
            other => module.set_exports(Export::Value(other)),
        }
    }
}

/// Something that can evaluate an expression in the page and return its
/// string result, from a blocking context.
pub trait PageEval: Send + Sync {
    fn eval_string(&self, expression: &str) -> Result<String, String>;
}

/// [`PageEval`] over a live Chromium page.
pub struct LivePage {
    page: Page,
    handle: Handle,
    timeout: Duration,
}

impl LivePage {
    pub fn new(page: Page, handle: Handle, timeout: Duration) -> Self {
        Self {
            page,
            handle,
            timeout,
        }
    }
}

impl PageEval for LivePage {
    fn eval_string(&self, expression: &str) -> Result<String, String> {
        self.handle.block_on(async {
            let result = tokio::time::timeout(self.timeout, self.page.evaluate(expression))
                .await
                .map_err(|_| format!("timed out after {}ms", self.timeout.as_millis()))?
                .map_err(|e| e.to_string())?;
            result
                .into_value::<String>()
                .map_err(|e| format!("unexpected result: {e}"))
        })
    }
}

/// A module whose body lives in the page.
pub struct PageFactory {
    id: ModuleId,
    source: String,
    page: Arc<dyn PageEval>,
}

impl PageFactory {
    pub fn new(id: ModuleId, source: String, page: Arc<dyn PageEval>) -> Self {
        Self { id, source, page }
    }
}

impl ModuleFactory for PageFactory {
    fn source(&self) -> &str {
        &self.source
    }

    fn invoke(
        &self,
        module: &ModuleRecord,
        exports: &Exports,
        require: &Loader<'_>,
    ) -> Result<(), FactoryError> {
        let expression = invoke_expression(&self.id).map_err(|e| FactoryError::new(e.to_string()))?;
        let raw = self
            .page
            .eval_string(&expression)
            .map_err(|e| FactoryError::new(format!("page evaluation failed: {e}")))?;
        let reply: InvokeReply = serde_json::from_str(&raw)
            .map_err(|e| FactoryError::new(format!("bad invoke reply: {e}")))?;
        if reply.missing {
            return Err(FactoryError::new(format!(
                "module {} is not bound in the page",
                self.id
            )));
        }
        debug!(
            "module {} ran in page ({} sub-modules)",
            self.id,
            reply.sub_modules.len()
        );
        reply.apply(module, exports, require);
        Ok(())
    }
}
