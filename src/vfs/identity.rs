//! Object identities
//!
//! An identity is the dotted name plus kind under which a script file is
//! exposed to the remote namespace.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// File extension shared by every recognized script
pub const SCRIPT_EXTENSION: &str = "lua";

/// Kind of script object, which decides the on-disk suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScriptKind {
    /// `<base>.lua`
    #[serde(rename = "ModuleScript", alias = "Module")]
    Module,
    /// `<base>.server.lua`
    #[serde(rename = "Script", alias = "Server")]
    Server,
    /// `<base>.client.lua`
    #[serde(rename = "LocalScript", alias = "Client")]
    Client,
}

impl ScriptKind {
    /// Suffix appended to the base path, including the extension
    pub fn suffix(&self) -> &'static str {
        match self {
            ScriptKind::Module => ".lua",
            ScriptKind::Server => ".server.lua",
            ScriptKind::Client => ".client.lua",
        }
    }

    /// Class name used on the wire
    pub fn class_name(&self) -> &'static str {
        match self {
            ScriptKind::Module => "ModuleScript",
            ScriptKind::Server => "Script",
            ScriptKind::Client => "LocalScript",
        }
    }
}

impl std::fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.class_name())
    }
}

/// Returned when a kind name is neither a class name nor a short form
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown script kind: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for ScriptKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ModuleScript" | "Module" => Ok(ScriptKind::Module),
            "Script" | "Server" => Ok(ScriptKind::Server),
            "LocalScript" | "Client" => Ok(ScriptKind::Client),
            other => Err(UnknownKind(other.to_string())),
        }
    }
}

/// A script's location in the remote namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectIdentity {
    /// Dot-separated path, prefixed by the configured root object
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ScriptKind,
}

impl ObjectIdentity {
    pub fn new(name: impl Into<String>, kind: ScriptKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}
