//! ABI metadata shipped with every package.
//!
//! The ABI is produced by the (external) contract compiler as JSON. This
//! module holds the raw document model; [`AbiAccess`] resolves it once into
//! index-addressed classes, functions and fully self-contained [`Ty`]s.
//!
//! ```json
//! {
//!   "version": 1,
//!   "exports": [
//!     { "kind": "class", "name": "Coin",
//!       "fields": [{ "name": "amount", "type": { "name": "u64" } }],
//!       "methods": [
//!         { "name": "constructor", "args": [{ "name": "amount", "type": { "name": "u64" } }] },
//!         { "name": "send", "args": [{ "name": "amount", "type": { "name": "u64" } }],
//!           "rtype": { "name": "Coin" } }
//!       ] }
//!   ],
//!   "imports": [
//!     { "kind": "class", "name": "Sheep", "pkg": "<64 hex chars>" }
//!   ]
//! }
//! ```

mod access;
mod types;

pub use access::{AbiAccess, Callable, ClassInfo, ExportKind, ImportInfo, ImportKind, InterfaceInfo};
pub use types::{
    align_up, layout_fields, ClassRef, FieldLayout, JigTy, ObjectTy, Ty, JIG_HEADER_SIZE,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Name of the method that constructs a class.
pub const CONSTRUCTOR: &str = "constructor";

/// Raw ABI document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Abi {
    pub version: u16,
    #[serde(default)]
    pub exports: Vec<ExportNode>,
    #[serde(default)]
    pub imports: Vec<ImportNode>,
}

impl Abi {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("parse abi json")
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("encode abi json")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ExportNode {
    Class(ClassNode),
    Function(MethodNode),
    Interface(InterfaceNode),
    Object(ObjectNode),
}

impl ExportNode {
    pub fn name(&self) -> &str {
        match self {
            ExportNode::Class(c) => &c.name,
            ExportNode::Function(f) => &f.name,
            ExportNode::Interface(i) => &i.name,
            ExportNode::Object(o) => &o.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ImportNode {
    Class(ImportRef),
    Function(ImportRef),
    Interface(ImportRef),
}

impl ImportNode {
    pub fn target(&self) -> &ImportRef {
        match self {
            ImportNode::Class(r) | ImportNode::Function(r) | ImportNode::Interface(r) => r,
        }
    }
}

/// Name of an export living in another package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRef {
    pub name: String,
    /// Hex package id.
    pub pkg: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassNode {
    pub name: String,
    #[serde(default)]
    pub extends: Option<String>,
    #[serde(default)]
    pub implements: Vec<String>,
    #[serde(default)]
    pub fields: Vec<FieldNode>,
    #[serde(default)]
    pub methods: Vec<MethodNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceNode {
    pub name: String,
    #[serde(default)]
    pub extends: Vec<String>,
    #[serde(default)]
    pub methods: Vec<MethodNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectNode {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldNode>,
}

/// Method, constructor or free function signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodNode {
    pub name: String,
    #[serde(default)]
    pub args: Vec<FieldNode>,
    #[serde(default)]
    pub rtype: Option<TypeNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldNode {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeNode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeNode {
    pub name: String,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub args: Vec<TypeNode>,
}

impl TypeNode {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nullable: false,
            args: Vec::new(),
        }
    }
}
