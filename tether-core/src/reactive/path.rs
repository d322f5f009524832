//! Dotted watch paths (`"user.address.city"`, `"items.0"`).

use crate::error::{ReactiveError, Result};
use crate::reactive::Runtime;
use crate::state::Value;

/// A parsed dot-delimited path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchPath {
    source: String,
    segments: Vec<String>,
}

impl WatchPath {
    /// Parse `path`. Segments may contain letters, digits, `$` and `_`.
    pub fn parse(path: &str) -> Result<Self> {
        let valid = path
            .split('.')
            .all(|segment| !segment.is_empty() && segment.chars().all(is_path_char));

        if !valid {
            return Err(ReactiveError::InvalidPath {
                path: path.to_string(),
            });
        }

        Ok(Self {
            source: path.to_string(),
            segments: path.split('.').map(str::to_string).collect(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Walk the path from `root`, reading through the tracked accessors.
    ///
    /// Stops with `Null` as soon as a segment lands on something that is not
    /// a container.
    pub fn resolve(&self, rt: &Runtime, root: &Value) -> Value {
        let mut current = root.clone();
        for segment in &self.segments {
            current = match &current {
                Value::Object(object) => object.get(rt, segment),
                Value::Array(array) => match segment.parse::<usize>() {
                    Ok(index) => array.get(rt, index),
                    Err(_) => return Value::Null,
                },
                _ => return Value::Null,
            };
        }
        current
    }
}

fn is_path_char(c: char) -> bool {
    c.is_alphanumeric() || c == '$' || c == '_'
}
