//! Name Translator
//!
//! Maps paths under the root directory to object identities and back.
//!
//! A file `<root>/a/b.server.lua` becomes `Script` named `<rootObject>.a.b`.
//! Base names may not contain dots, which keeps the three suffix forms
//! mutually exclusive and makes every recognized path round-trip exactly.

use regex::Regex;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

use super::identity::{ObjectIdentity, ScriptKind, SCRIPT_EXTENSION};

/// Errors produced while translating between paths and identities
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslateError {
    /// The path is not a recognized script file
    #[error("Not a recognized script file: {0}")]
    UnrecognizedPath(String),

    /// The path does not live under the root directory
    #[error("Path is outside the root directory: {0}")]
    OutsideRoot(String),

    /// The name cannot be mapped to a path inside the root directory
    #[error("Invalid object name: {0}")]
    InvalidName(String),
}

impl TranslateError {
    /// True for paths that should simply be skipped
    pub fn is_ignorable(&self) -> bool {
        matches!(
            self,
            TranslateError::UnrecognizedPath(_) | TranslateError::OutsideRoot(_)
        )
    }
}

/// Bidirectional path <-> identity mapping for one root directory and root object
///
/// Files or directories with a dot in their base name (`foo.spec.lua`,
/// `a.b/c.lua`) are not recognized and are ignored by the watcher and listing.
#[derive(Debug, Clone)]
pub struct NameTranslator {
    root_directory: PathBuf,
    root_object: String,
    server_pattern: Regex,
    client_pattern: Regex,
    module_pattern: Regex,
    /// `None` when the root object is empty
    root_prefix: Option<Regex>,
}

impl NameTranslator {
    pub fn new(root_directory: impl Into<PathBuf>, root_object: impl Into<String>) -> Result<Self, regex::Error> {
        let root_object = root_object.into();
        let ext = regex::escape(SCRIPT_EXTENSION);

        let root_prefix = if root_object.is_empty() {
            None
        } else {
            // The separator is optional only when the name is the root itself.
            Some(Regex::new(&format!(r"^{}(?:\.|$)", regex::escape(&root_object)))?)
        };

        Ok(Self {
            root_directory: root_directory.into(),
            root_object,
            server_pattern: Regex::new(&format!(r"^([^.]+)\.server\.{}$", ext))?,
            client_pattern: Regex::new(&format!(r"^([^.]+)\.client\.{}$", ext))?,
            module_pattern: Regex::new(&format!(r"^([^.]+)\.{}$", ext))?,
            root_prefix,
        })
    }

    pub fn root_directory(&self) -> &Path {
        &self.root_directory
    }

    pub fn root_object(&self) -> &str {
        &self.root_object
    }

    /// Translate a path under the root directory into an identity
    pub fn file_to_identity(&self, path: &Path) -> Result<ObjectIdentity, TranslateError> {
        let relative = path
            .strip_prefix(&self.root_directory)
            .map_err(|_| TranslateError::OutsideRoot(path.display().to_string()))?;

        let unrecognized = || TranslateError::UnrecognizedPath(path.display().to_string());

        // Normalize separators to '/' before matching
        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => segments.push(part.to_str().ok_or_else(unrecognized)?),
                _ => return Err(unrecognized()),
            }
        }
        let relative = segments.join("/");

        let (kind, base) = [
            (ScriptKind::Server, &self.server_pattern),
            (ScriptKind::Client, &self.client_pattern),
            (ScriptKind::Module, &self.module_pattern),
        ]
        .into_iter()
        .find_map(|(kind, pattern)| {
            pattern
                .captures(&relative)
                .and_then(|caps| caps.get(1))
                .map(|base| (kind, base.as_str()))
        })
        .ok_or_else(unrecognized)?;

        let dotted = base.replace('/', ".");
        let name = if self.root_object.is_empty() {
            dotted
        } else {
            format!("{}.{}", self.root_object, dotted)
        };

        Ok(ObjectIdentity { name, kind })
    }

    /// Translate an identity into the path of its backing file
    pub fn identity_to_file(&self, identity: &ObjectIdentity) -> Result<PathBuf, TranslateError> {
        let invalid = || TranslateError::InvalidName(identity.name.clone());

        let rest = match &self.root_prefix {
            Some(prefix) => prefix.replace(&identity.name, ""),
            None => identity.name.as_str().into(),
        };

        let segments: Vec<&str> = rest.split('.').collect();
        let valid = segments
            .iter()
            .all(|s| !s.is_empty() && !s.contains(['/', '\\']) && Path::new(s).components().count() == 1);
        if !valid {
            return Err(invalid());
        }

        let (last, dirs) = segments.split_last().ok_or_else(invalid)?;
        let mut path = self.root_directory.clone();
        for dir in dirs {
            path.push(dir);
        }
        path.push(format!("{}{}", last, identity.kind.suffix()));

        Ok(path)
    }
}
