//! Ordered environment composed for the guest

use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Ordered mapping of variable name to value
///
/// Insertion order is export order. Re-adding a name keeps its original
/// position and takes the new value. Names merged through [`Environment::reserve`]
/// cannot be shadowed by later [`Environment::update`] calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    order: Vec<String>,
    values: HashMap<String, String>,
    reserved: HashSet<String>,
}

impl Environment {
    /// Create an empty environment
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or shadow a single variable
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        if !self.values.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.values.insert(name, value.into());
    }

    /// Merge a layer whose names become reserved
    pub fn reserve(&mut self, pairs: &[(String, String)]) {
        for (name, value) in pairs {
            self.add(name.clone(), value.clone());
            self.reserved.insert(name.clone());
        }
    }

    /// Merge a later layer, skipping reserved names
    pub fn update(&mut self, pairs: &[(String, String)]) {
        for (name, value) in pairs {
            if self.reserved.contains(name) {
                debug!("Skipping reserved environment variable: {}", name);
                continue;
            }
            self.add(name.clone(), value.clone());
        }
    }

    /// Get a variable's value
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Whether a name belongs to the reserved layer
    pub fn is_reserved(&self, name: &str) -> bool {
        self.reserved.contains(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// The pairs in insertion order
    pub fn ordered(&self) -> Vec<(String, String)> {
        self.order
            .iter()
            .map(|name| (name.clone(), self.values[name].clone()))
            .collect()
    }

    /// Shell lines that export every variable, in order
    pub fn export(&self) -> Vec<String> {
        self.order
            .iter()
            .map(|name| format!("export {}={}", name, shell_quote(&self.values[name])))
            .collect()
    }

    /// Expand `$NAME` and `${NAME}` references; unknown names expand to nothing
    pub fn interpolate(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut chars = input.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '$' {
                out.push(c);
                continue;
            }

            let braced = chars.peek() == Some(&'{');
            if braced {
                chars.next();
            }

            let mut name = String::new();
            while let Some(&next) = chars.peek() {
                if next.is_ascii_alphanumeric() || next == '_' {
                    name.push(next);
                    chars.next();
                } else {
                    break;
                }
            }

            if braced {
                if chars.peek() == Some(&'}') {
                    chars.next();
                } else {
                    // Unterminated, keep it literal
                    out.push_str("${");
                    out.push_str(&name);
                    continue;
                }
            }

            if name.is_empty() {
                out.push('$');
                if braced {
                    out.push_str("{}");
                }
                continue;
            }

            if let Some(value) = self.values.get(&name) {
                out.push_str(value);
            }
        }

        out
    }
}

/// Quote a value for a POSIX shell using single quotes
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Convert borrowed pairs into an owned layer
pub fn layer<K: AsRef<str>, V: AsRef<str>>(pairs: &[(K, V)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
        .collect()
}
