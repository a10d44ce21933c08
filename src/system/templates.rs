// src/system/templates.rs

//! The templating collaborator: a catalog (`templates.toml`) that maps a
//! template name to its source file, its destination on the host and an
//! optional reload command, plus `{{ key }}` substitution from the context.

use crate::models::Value;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

lazy_static! {
    // `{{ key }}`; a leading backslash keeps the braces literally.
    static ref VAR_RE: Regex =
        Regex::new(r"\\?\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder pattern is valid");
}

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Could not read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse template catalog at '{path}': {source}")]
    CatalogParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("No template named '{0}' in the catalog.")]
    UnknownTemplate(String),
    #[error("Template '{template}' uses '{{{{ {key} }}}}' but no such setting exists.")]
    MissingVariable { template: String, key: String },
}

/// One catalog entry.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct TemplateSpec {
    /// Source file, relative to the template directory. Defaults to the template name.
    pub local: Option<String>,
    /// Destination path on the host; may itself contain `{{ key }}` tokens.
    pub remote: String,
    /// Command that makes the owning service pick up the new file.
    pub reload: Option<String>,
    #[serde(default)]
    pub sudo: bool,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct TemplateCatalog {
    #[serde(default)]
    pub templates: BTreeMap<String, TemplateSpec>,
}

pub trait TemplateRenderer: Send + Sync {
    fn spec(&self, name: &str) -> Result<TemplateSpec, TemplateError>;
    fn render(&self, name: &str, context: &BTreeMap<String, Value>) -> Result<Vec<u8>, TemplateError>;
}

/// Templates read from a directory on the controlling machine.
#[derive(Debug, Clone, Default)]
pub struct FsTemplates {
    dir: PathBuf,
    catalog: TemplateCatalog,
}

impl FsTemplates {
    /// Loads the catalog from `dir/catalog_file`. A missing catalog yields an
    /// empty one, so fleets without templates need no extra files.
    pub fn load(dir: impl Into<PathBuf>, catalog_file: &str) -> Result<Self, TemplateError> {
        let dir = dir.into();
        let path = dir.join(catalog_file);
        let catalog = if path.exists() {
            let content = read(&path)?;
            toml::from_str(&content).map_err(|source| TemplateError::CatalogParse {
                path: path.clone(),
                source,
            })?
        } else {
            log::debug!("No template catalog at {}", path.display());
            TemplateCatalog::default()
        };
        Ok(Self { dir, catalog })
    }
}

impl TemplateRenderer for FsTemplates {
    fn spec(&self, name: &str) -> Result<TemplateSpec, TemplateError> {
        self.catalog
            .templates
            .get(name)
            .cloned()
            .ok_or_else(|| TemplateError::UnknownTemplate(name.to_string()))
    }

    fn render(&self, name: &str, context: &BTreeMap<String, Value>) -> Result<Vec<u8>, TemplateError> {
        let spec = self.spec(name)?;
        let source = self.dir.join(spec.local.as_deref().unwrap_or(name));
        let content = read(&source)?;
        render_str(name, &content, context).map(String::into_bytes)
    }
}

fn read(path: &Path) -> Result<String, TemplateError> {
    fs::read_to_string(path).map_err(|source| TemplateError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Substitutes every `{{ key }}` in `template` from `context`. Lists are
/// joined with spaces.
pub fn render_str(
    name: &str,
    template: &str,
    context: &BTreeMap<String, Value>,
) -> Result<String, TemplateError> {
    let mut missing = None;
    let rendered = VAR_RE.replace_all(template, |caps: &Captures| {
        let full = &caps[0];
        if let Some(escaped) = full.strip_prefix('\\') {
            return escaped.to_string();
        }
        match context.get(&caps[1]) {
            Some(value) => value_to_text(value),
            None => {
                missing.get_or_insert_with(|| caps[1].to_string());
                String::new()
            }
        }
    });
    match missing {
        Some(key) => Err(TemplateError::MissingVariable {
            template: name.to_string(),
            key,
        }),
        None => Ok(rendered.into_owned()),
    }
}

pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(value_to_text).collect::<Vec<_>>().join(" "),
        other => other.to_string(),
    }
}
