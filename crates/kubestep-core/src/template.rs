//! Named manifest templates rendered with Tera.
//!
//! Rendering is strict: a variable referenced by the template but absent
//! from the [`Data`] mapping fails with [`KubestepError::Render`] instead of
//! producing an empty string.

use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::error::Error as _;
use std::path::{Path, PathBuf};
use tera::{Context, Tera};

use crate::error::{KubestepError, Result};

// ---------------------------------------------------------------------------
// Data
// ---------------------------------------------------------------------------

/// Key/value mapping handed unchanged to the template renderer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Data(BTreeMap<String, JsonValue>);

impl Data {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<JsonValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn context(&self) -> Context {
        let mut ctx = Context::new();
        for (k, v) in &self.0 {
            ctx.insert(k.as_str(), v);
        }
        ctx
    }
}

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    name: String,
    source: String,
}

impl Template {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }

    /// Logical name, also used as the default destination file name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn default_dst(&self, dir: impl AsRef<Path>) -> PathBuf {
        dir.as_ref().join(&self.name)
    }

    pub fn render(&self, data: &Data) -> Result<String> {
        let mut tera = Tera::default();
        tera.add_raw_template(&self.name, &self.source)
            .map_err(|e| self.render_error(&e))?;
        tera.render(&self.name, &data.context())
            .map_err(|e| self.render_error(&e))
    }

    fn render_error(&self, err: &tera::Error) -> KubestepError {
        KubestepError::Render {
            template: self.name.clone(),
            message: error_chain(err),
        }
    }
}

/// Tera reports the interesting part (which variable was missing) in the
/// source chain, not the top-level message.
fn error_chain(err: &tera::Error) -> String {
    let mut parts = vec![err.to_string()];
    let mut cur = err.source();
    while let Some(e) = cur {
        parts.push(e.to_string());
        cur = e.source();
    }
    parts.join(": ")
}
