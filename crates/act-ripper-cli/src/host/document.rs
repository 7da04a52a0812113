//! Page document rewriting.
//!
//! Before the page is handed to Chromium its HTML is rewritten so that
//! error reporters and the bundler's inline runtime never run, relative
//! assets resolve against the real bundle location, and the interception
//! setup executes ahead of every page script.

use regex::Regex;
use scraper::{Html, Selector};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Script type the browser will not execute.
pub const INERT_SCRIPT_TYPE: &str = "text/dontexecute";

/// Result of [`prepare`].
#[derive(Debug, Clone)]
pub struct PreparedDocument {
    pub html: String,
    pub base_url: String,
    /// Global the bundler runtime pushes chunks into, when detected.
    pub chunk_global: Option<String>,
    /// Number of scripts disabled.
    pub neutralised: usize,
    /// `src` of every external script, as written in the document.
    pub scripts: Vec<String>,
}

fn script_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<script\b([^>]*)>(.*?)</script\s*>").expect("valid regex"))
}

fn type_attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\btype\s*=\s*("[^"]*"|'[^']*'|[^\s>]+)"#).expect("valid regex")
    })
}

fn src_attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\bsrc\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#).expect("valid regex")
    })
}

fn chunk_global_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"self\.(.*?)=self\.(.*?)\|\|\[\]").expect("valid regex"))
}

fn head_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<head\b[^>]*>").expect("valid regex"))
}

/// Rewrite `html` fetched from `page_url`. `setup` builds the setup script
/// from the detected chunk global; it is injected at the top of `<head>`,
/// right after the `<base>` element.
pub fn prepare<S>(html: &str, page_url: &str, setup: S) -> PreparedDocument
where
    S: FnOnce(Option<&str>) -> String,
{
    let scripts = script_sources(html);
    let base_url = base_url(&scripts, page_url);

    let mut chunk_global = None;
    let mut neutralised = 0;
    let rewritten = script_re().replace_all(html, |caps: &regex::Captures<'_>| {
        let whole = &caps[0];
        let attrs = &caps[1];
        let body = &caps[2];

        let src = src_attr(attrs).unwrap_or_default();
        let reporter = src.contains("sentry") || body.contains("Sentry") || body.contains("firebase");
        let runtime = body.contains("Symbol.toStringTag") && body.contains("Object.defineProperty");

        if runtime {
            for name in chunk_globals(body) {
                if let Some(previous) = &chunk_global {
                    if previous != &name {
                        warn!("multiple chunk globals: {previous} and {name}");
                    }
                }
                chunk_global = Some(name);
            }
        }

        if reporter || runtime {
            neutralised += 1;
            debug!("disabling script {}", if src.is_empty() { "(inline)" } else { src.as_str() });
            neutralise(whole, attrs)
        } else {
            whole.to_string()
        }
    });

    let injection = format!(
        "<base href=\"{}\"><script>{}</script>",
        escape_attr(&base_url),
        setup(chunk_global.as_deref())
    );
    let html = match head_re().find(&rewritten) {
        Some(m) => {
            let mut out = String::with_capacity(rewritten.len() + injection.len());
            out.push_str(&rewritten[..m.end()]);
            out.push_str(&injection);
            out.push_str(&rewritten[m.end()..]);
            out
        }
        None => format!("<head>{injection}</head>{rewritten}"),
    };

    PreparedDocument {
        html,
        base_url,
        chunk_global,
        neutralised,
        scripts,
    }
}

/// External script URLs, in document order.
pub fn script_sources(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(sel) = Selector::parse("script[src]") else {
        return Vec::new();
    };
    document
        .select(&sel)
        .filter_map(|el| el.value().attr("src"))
        .map(str::to_string)
        .collect()
}

/// Directory of the `vendors` bundle, absolute; the page URL otherwise.
pub fn base_url(scripts: &[String], page_url: &str) -> String {
    let dir = scripts.iter().find_map(|src| {
        let at = src.find("vendors")?;
        let slash = src[..at].rfind('/')?;
        src.ends_with("js").then(|| src[..=slash].to_string())
    });
    let Some(dir) = dir else {
        return page_url.to_string();
    };
    if dir.contains("://") {
        return dir;
    }
    url::Url::parse(page_url)
        .and_then(|page| page.join(&dir))
        .map(|u| u.to_string())
        .unwrap_or(dir)
}

/// Names assigned by `self.X=self.X||[]` in a runtime script.
pub fn chunk_globals(body: &str) -> Vec<String> {
    chunk_global_re()
        .captures_iter(body)
        .filter(|c| c[1] == c[2])
        .map(|c| c[1].to_string())
        .collect()
}

fn src_attr(attrs: &str) -> Option<String> {
    let caps = src_attr_re().captures(attrs)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))
        .map(|m| m.as_str().to_string())
}

fn neutralise(tag: &str, attrs: &str) -> String {
    let inert = format!("type=\"{INERT_SCRIPT_TYPE}\"");
    let new_attrs = if type_attr_re().is_match(attrs) {
        type_attr_re().replace(attrs, inert.as_str()).into_owned()
    } else {
        format!(" {inert}{attrs}")
    };
    // `<script` is 7 bytes; the attribute run follows it.
    let open_end = 7 + attrs.len();
    format!("<script{}{}", new_attrs, &tag[open_end..])
}

fn escape_attr(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}
