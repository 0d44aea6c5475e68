//! Typed field registry
//!
//! Maps dotted field paths to accessor functions on the configuration
//! schema. Each entry carries the field's declared kind and the coercion
//! rule for that kind, so an override can only ever target a field that was
//! registered at startup.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

/// Declared kind of an overridable field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    String,
    Integer,
    Boolean,
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Integer => write!(f, "integer"),
            Self::Boolean => write!(f, "boolean"),
        }
    }
}

type Setter<T> = Box<dyn Fn(&mut T, &str) -> Result<(), String> + Send + Sync>;

/// One registered field
pub struct FieldEntry<T> {
    kind: FieldKind,
    setter: Setter<T>,
}

impl<T> FieldEntry<T> {
    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    /// Coerce `raw` to the field kind and assign it.
    ///
    /// On error the target is left untouched and the parse failure is returned.
    pub fn assign(&self, target: &mut T, raw: &str) -> Result<(), String> {
        (self.setter)(target, raw)
    }
}

/// Registry of overridable fields for schema `T`
pub struct FieldRegistry<T> {
    fields: BTreeMap<String, FieldEntry<T>>,
}

impl<T: 'static> FieldRegistry<T> {
    pub fn new() -> Self {
        Self {
            fields: BTreeMap::new(),
        }
    }

    /// Register a string field; the raw text is assigned as-is.
    pub fn string(self, path: &str, access: fn(&mut T) -> &mut String) -> Self {
        self.insert(
            path,
            FieldKind::String,
            Box::new(move |target, raw| {
                *access(target) = raw.to_string();
                Ok(())
            }),
        )
    }

    /// Register an optional string field; an override always sets `Some`.
    pub fn optional_string(self, path: &str, access: fn(&mut T) -> &mut Option<String>) -> Self {
        self.insert(
            path,
            FieldKind::String,
            Box::new(move |target, raw| {
                *access(target) = Some(raw.to_string());
                Ok(())
            }),
        )
    }

    /// Register an integer field of any integer type; text must be base-10.
    pub fn integer<N>(self, path: &str, access: fn(&mut T) -> &mut N) -> Self
    where
        N: FromStr + 'static,
        N::Err: Display,
    {
        self.insert(
            path,
            FieldKind::Integer,
            Box::new(move |target, raw| {
                let value = raw.parse::<N>().map_err(|e| e.to_string())?;
                *access(target) = value;
                Ok(())
            }),
        )
    }

    /// Register a boolean field; accepts `true`/`false` in any ASCII case.
    pub fn boolean(self, path: &str, access: fn(&mut T) -> &mut bool) -> Self {
        self.insert(
            path,
            FieldKind::Boolean,
            Box::new(move |target, raw| {
                *access(target) = parse_bool(raw)?;
                Ok(())
            }),
        )
    }

    fn insert(mut self, path: &str, kind: FieldKind, setter: Setter<T>) -> Self {
        assert!(
            !self.fields.contains_key(path),
            "field path '{path}' registered twice"
        );
        self.fields.insert(path.to_string(), FieldEntry { kind, setter });
        self
    }
}

impl<T> FieldRegistry<T> {
    pub fn get(&self, path: &str) -> Option<&FieldEntry<T>> {
        self.fields.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.fields.contains_key(path)
    }

    /// Declared kind of `path`, if registered
    pub fn kind(&self, path: &str) -> Option<FieldKind> {
        self.fields.get(path).map(FieldEntry::kind)
    }

    /// All registered paths, sorted
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<T: 'static> Default for FieldRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for FieldRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.fields.iter().map(|(path, entry)| (path, entry.kind)))
            .finish()
    }
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    if raw.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if raw.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err("expected 'true' or 'false'".to_string())
    }
}
