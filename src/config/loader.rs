use log::debug;
use regex::{Captures, Regex};
use serde_yaml::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use crate::error::LoadError;

/// Source of template variables.
pub trait Environment {
    fn var(&self, name: &str) -> Option<String>;
}

/// The process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl Environment for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        if envmnt::exists(name) {
            Some(envmnt::get_or(name, ""))
        } else {
            None
        }
    }
}

impl Environment for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

fn template_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"\{\{\s*env\[\s*(?:'([^']*)'|"([^"]*)")\s*\]\s*\}\}"#)
            .expect("template pattern is valid")
    })
}

/// Read the spec at `path` and resolve every `{{ env['NAME'] }}` placeholder.
///
/// All unresolved names are reported together. Duplicate role names are rejected by the
/// YAML parser and surface as [`LoadError::Parse`].
pub fn load_spec(path: &Path, env: &dyn Environment) -> Result<Value, LoadError> {
    let content = fs::read_to_string(path).map_err(|source| LoadError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;

    let mut tree: Value = if content.trim().is_empty() {
        Value::Null
    } else {
        serde_yaml::from_str(&content).map_err(|source| LoadError::Parse {
            path: path.to_path_buf(),
            source,
        })?
    };

    let mut missing = Vec::new();
    render_templates(&mut tree, env, &mut missing);

    if !missing.is_empty() {
        return Err(LoadError::MissingEnvVars {
            path: path.to_path_buf(),
            names: missing,
        });
    }

    debug!("Loaded spec from {}", path.display());

    Ok(tree)
}

/// Walk every string value once, substituting placeholders in place. Unknown names are
/// appended to `missing` in first-appearance order.
pub fn render_templates(value: &mut Value, env: &dyn Environment, missing: &mut Vec<String>) {
    match value {
        Value::String(text) => {
            if let Some(rendered) = render_str(text, env, missing) {
                *text = rendered;
            }
        }
        Value::Sequence(items) => {
            for item in items {
                render_templates(item, env, missing);
            }
        }
        Value::Mapping(map) => {
            for (_, item) in map.iter_mut() {
                render_templates(item, env, missing);
            }
        }
        Value::Tagged(tagged) => render_templates(&mut tagged.value, env, missing),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

fn render_str(text: &str, env: &dyn Environment, missing: &mut Vec<String>) -> Option<String> {
    let pattern = template_pattern();
    if !pattern.is_match(text) {
        return None;
    }

    let rendered = pattern.replace_all(text, |caps: &Captures| {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();

        match env.var(name) {
            Some(value) => value,
            None => {
                if !missing.iter().any(|m| m == name) {
                    missing.push(name.to_string());
                }
                String::new()
            }
        }
    });

    Some(rendered.into_owned())
}
