//! Index-addressed view over a package ABI.
//!
//! Names are resolved exactly once, when the package is loaded. Afterwards
//! the engine addresses classes, functions and imports by index, and every
//! argument, field and return type is a self-contained [`Ty`].

use std::collections::{BTreeSet, HashMap};

use anyhow::{anyhow, bail, Result};
use jigvm_types::PackageId;

use super::types::{layout_fields, ClassRef, FieldLayout, JigTy, ObjectTy, Ty, JIG_HEADER_SIZE};
use super::{Abi, ClassNode, ExportNode, ImportNode, MethodNode, ObjectNode, TypeNode, CONSTRUCTOR};

// =============================================================================
// Resolved descriptors
// =============================================================================

/// Kind of an export plus its position in the per-kind table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Class(usize),
    Function(usize),
    Interface(usize),
    Object,
}

/// Constructor, method or function signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Callable {
    pub name: String,
    /// Guest export implementing it.
    pub export_name: String,
    /// Arguments laid out as they appear in a host-call argument blob.
    pub args: Vec<FieldLayout>,
    pub ret: Option<Ty>,
}

impl Callable {
    pub fn arg_tys(&self) -> impl Iterator<Item = &Ty> {
        self.args.iter().map(|a| &a.ty)
    }
}

#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub export_idx: usize,
    pub class_ref: ClassRef,
    pub parent: Option<String>,
    /// Inherited fields first, then own fields; offsets include the jig header.
    pub fields: Vec<FieldLayout>,
    pub size: u32,
    pub constructor: Callable,
    /// Inherited methods first, then own; overrides keep the parent's slot.
    pub methods: Vec<Callable>,
    method_index: HashMap<String, usize>,
    conforms: BTreeSet<ClassRef>,
}

impl ClassInfo {
    pub fn name(&self) -> &str {
        &self.class_ref.name
    }

    pub fn method(&self, idx: usize) -> Option<&Callable> {
        self.methods.get(idx)
    }

    pub fn method_index(&self, name: &str) -> Option<usize> {
        self.method_index.get(name).copied()
    }

    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_tys(&self) -> Vec<Ty> {
        self.fields.iter().map(|f| f.ty.clone()).collect()
    }

    /// Classes and interfaces this class is an instance of.
    pub fn conformance(&self) -> &BTreeSet<ClassRef> {
        &self.conforms
    }

    pub fn conforms_to(&self, target: &JigTy) -> bool {
        match target {
            JigTy::Any => true,
            JigTy::Class(r) | JigTy::Interface(r) => self.conforms.contains(r),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub class_ref: ClassRef,
    pub extends: Vec<ClassRef>,
    pub methods: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    Class,
    Function,
    Interface,
}

/// Proxy for code living in another package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportInfo {
    pub kind: ImportKind,
    pub name: String,
    pub pkg: PackageId,
}

// =============================================================================
// AbiAccess
// =============================================================================

/// Resolved, read-only view of one package's ABI.
#[derive(Debug, Clone)]
pub struct AbiAccess {
    pkg: PackageId,
    abi: Abi,
    kinds: Vec<ExportKind>,
    export_names: HashMap<String, usize>,
    classes: Vec<ClassInfo>,
    functions: Vec<Callable>,
    interfaces: Vec<InterfaceInfo>,
    imports: Vec<ImportInfo>,
}

impl AbiAccess {
    pub fn new(pkg: PackageId, abi: Abi) -> Result<Self> {
        let resolver = Resolver::new(pkg, &abi)?;

        let mut kinds = Vec::with_capacity(abi.exports.len());
        let mut classes = Vec::new();
        let mut functions = Vec::new();
        let mut interfaces = Vec::new();

        for (idx, export) in abi.exports.iter().enumerate() {
            match export {
                ExportNode::Class(_) => {
                    kinds.push(ExportKind::Class(classes.len()));
                    classes.push(resolver.class_info(idx)?);
                }
                ExportNode::Function(node) => {
                    kinds.push(ExportKind::Function(functions.len()));
                    functions.push(resolver.callable(node, node.name.clone())?);
                }
                ExportNode::Interface(node) => {
                    kinds.push(ExportKind::Interface(interfaces.len()));
                    let extends = node
                        .extends
                        .iter()
                        .map(|name| resolver.interface_ref(name))
                        .collect::<Result<Vec<_>>>()?;
                    interfaces.push(InterfaceInfo {
                        class_ref: ClassRef::new(pkg, node.name.clone()),
                        extends,
                        methods: node.methods.iter().map(|m| m.name.clone()).collect(),
                    });
                }
                ExportNode::Object(node) => {
                    // Validate eagerly so broken objects fail at load time.
                    resolver.object_ty(node, &mut Vec::new())?;
                    kinds.push(ExportKind::Object);
                }
            }
        }

        let imports = resolver.imports_info();
        let export_names = abi
            .exports
            .iter()
            .enumerate()
            .map(|(i, e)| (e.name().to_string(), i))
            .collect();
        drop(resolver);

        Ok(Self {
            pkg,
            abi,
            kinds,
            export_names,
            classes,
            functions,
            interfaces,
            imports,
        })
    }

    pub fn pkg_id(&self) -> &PackageId {
        &self.pkg
    }

    pub fn abi(&self) -> &Abi {
        &self.abi
    }

    pub fn export_kind(&self, export_idx: usize) -> Option<ExportKind> {
        self.kinds.get(export_idx).copied()
    }

    pub fn export_index(&self, name: &str) -> Option<usize> {
        self.export_names.get(name).copied()
    }

    pub fn classes(&self) -> &[ClassInfo] {
        &self.classes
    }

    pub fn class(&self, export_idx: usize) -> Result<&ClassInfo> {
        match self.export_kind(export_idx) {
            Some(ExportKind::Class(i)) => Ok(&self.classes[i]),
            Some(_) => Err(anyhow!(
                "export {} of package {} is not a class",
                export_idx,
                self.pkg.short()
            )),
            None => Err(anyhow!(
                "package {} has no export {}",
                self.pkg.short(),
                export_idx
            )),
        }
    }

    pub fn class_by_name(&self, name: &str) -> Option<&ClassInfo> {
        self.export_index(name).and_then(|i| self.class(i).ok())
    }

    pub fn function(&self, export_idx: usize) -> Result<&Callable> {
        match self.export_kind(export_idx) {
            Some(ExportKind::Function(i)) => Ok(&self.functions[i]),
            Some(_) => Err(anyhow!(
                "export {} of package {} is not a function",
                export_idx,
                self.pkg.short()
            )),
            None => Err(anyhow!(
                "package {} has no export {}",
                self.pkg.short(),
                export_idx
            )),
        }
    }

    pub fn function_by_name(&self, name: &str) -> Option<&Callable> {
        self.export_index(name).and_then(|i| self.function(i).ok())
    }

    pub fn interface_by_name(&self, name: &str) -> Option<&InterfaceInfo> {
        match self.export_index(name).and_then(|i| self.export_kind(i)) {
            Some(ExportKind::Interface(i)) => self.interfaces.get(i),
            _ => None,
        }
    }

    pub fn imports(&self) -> &[ImportInfo] {
        &self.imports
    }

    pub fn import(&self, idx: usize) -> Result<&ImportInfo> {
        self.imports
            .get(idx)
            .ok_or_else(|| anyhow!("package {} has no import {}", self.pkg.short(), idx))
    }

    /// Whether `name` refers to code in another package.
    pub fn is_proxy(&self, name: &str) -> bool {
        self.imports.iter().any(|i| i.name == name)
    }
}

// =============================================================================
// Resolution
// =============================================================================

struct Resolver<'a> {
    pkg: PackageId,
    abi: &'a Abi,
    exports: HashMap<&'a str, usize>,
    imports: HashMap<&'a str, usize>,
    import_pkgs: Vec<PackageId>,
}

impl<'a> Resolver<'a> {
    fn new(pkg: PackageId, abi: &'a Abi) -> Result<Self> {
        let mut exports = HashMap::new();
        for (i, export) in abi.exports.iter().enumerate() {
            if exports.insert(export.name(), i).is_some() {
                bail!("duplicate export {}", export.name());
            }
        }
        let mut imports = HashMap::new();
        let mut import_pkgs = Vec::with_capacity(abi.imports.len());
        for (i, import) in abi.imports.iter().enumerate() {
            let target = import.target();
            if exports.contains_key(target.name.as_str()) {
                bail!("{} is both exported and imported", target.name);
            }
            if imports.insert(target.name.as_str(), i).is_some() {
                bail!("duplicate import {}", target.name);
            }
            import_pkgs.push(target.pkg.parse::<PackageId>()?);
        }
        Ok(Self {
            pkg,
            abi,
            exports,
            imports,
            import_pkgs,
        })
    }

    fn imports_info(&self) -> Vec<ImportInfo> {
        self.abi
            .imports
            .iter()
            .zip(&self.import_pkgs)
            .map(|(node, pkg)| {
                let kind = match node {
                    ImportNode::Class(_) => ImportKind::Class,
                    ImportNode::Function(_) => ImportKind::Function,
                    ImportNode::Interface(_) => ImportKind::Interface,
                };
                ImportInfo {
                    kind,
                    name: node.target().name.clone(),
                    pkg: *pkg,
                }
            })
            .collect()
    }

    fn ty(&self, node: &TypeNode, visiting: &mut Vec<String>) -> Result<Ty> {
        let base = self.base_ty(node, visiting)?;
        Ok(if node.nullable {
            Ty::Nullable(Box::new(base))
        } else {
            base
        })
    }

    fn base_ty(&self, node: &TypeNode, visiting: &mut Vec<String>) -> Result<Ty> {
        let arity = |n: usize| -> Result<()> {
            if node.args.len() != n {
                bail!(
                    "type {} takes {} type arguments, got {}",
                    node.name,
                    n,
                    node.args.len()
                );
            }
            Ok(())
        };
        let primitive = match node.name.as_str() {
            "bool" => Some(Ty::Bool),
            "u8" => Some(Ty::U8),
            "u16" => Some(Ty::U16),
            "u32" => Some(Ty::U32),
            "u64" => Some(Ty::U64),
            "i8" => Some(Ty::I8),
            "i16" => Some(Ty::I16),
            "i32" => Some(Ty::I32),
            "i64" => Some(Ty::I64),
            "string" => Some(Ty::String),
            "bytes" => Some(Ty::Bytes),
            "f32" | "f64" => bail!("floating point type {} is not supported", node.name),
            _ => None,
        };
        if let Some(ty) = primitive {
            arity(0)?;
            return Ok(ty);
        }
        match node.name.as_str() {
            "Array" => {
                arity(1)?;
                Ok(Ty::Array(Box::new(self.ty(&node.args[0], visiting)?)))
            }
            "Map" => {
                arity(2)?;
                let key = self.ty(&node.args[0], visiting)?;
                if !(key.is_scalar() || key == Ty::String) {
                    bail!("map keys must be integers, bools or strings, got {}", key);
                }
                let value = self.ty(&node.args[1], visiting)?;
                Ok(Ty::Map(Box::new(key), Box::new(value)))
            }
            "Jig" => {
                arity(0)?;
                Ok(Ty::Jig(JigTy::Any))
            }
            name => {
                arity(0)?;
                self.named_ty(name, visiting)
            }
        }
    }

    fn named_ty(&self, name: &str, visiting: &mut Vec<String>) -> Result<Ty> {
        if let Some(&idx) = self.exports.get(name) {
            return match &self.abi.exports[idx] {
                ExportNode::Class(_) => Ok(Ty::Jig(JigTy::Class(ClassRef::new(self.pkg, name)))),
                ExportNode::Interface(_) => {
                    Ok(Ty::Jig(JigTy::Interface(ClassRef::new(self.pkg, name))))
                }
                ExportNode::Object(obj) => self.object_ty(obj, visiting),
                ExportNode::Function(_) => bail!("function {} used as a type", name),
            };
        }
        if let Some(&idx) = self.imports.get(name) {
            let pkg = self.import_pkgs[idx];
            return match &self.abi.imports[idx] {
                ImportNode::Class(r) => Ok(Ty::Jig(JigTy::Class(ClassRef::new(pkg, r.name.clone())))),
                ImportNode::Interface(r) => {
                    Ok(Ty::Jig(JigTy::Interface(ClassRef::new(pkg, r.name.clone()))))
                }
                ImportNode::Function(_) => bail!("function {} used as a type", name),
            };
        }
        bail!("unknown type {}", name)
    }

    fn object_ty(&self, obj: &ObjectNode, visiting: &mut Vec<String>) -> Result<Ty> {
        if visiting.iter().any(|n| n == &obj.name) {
            bail!("recursive object type {}", obj.name);
        }
        visiting.push(obj.name.clone());
        let fields = obj
            .fields
            .iter()
            .map(|f| Ok((f.name.clone(), self.ty(&f.ty, visiting)?)))
            .collect::<Result<Vec<_>>>()?;
        visiting.pop();
        let (fields, size) = layout_fields(0, fields);
        Ok(Ty::Object(ObjectTy {
            name: obj.name.clone(),
            fields,
            size,
        }))
    }

    fn callable(&self, node: &MethodNode, export_name: String) -> Result<Callable> {
        let mut visiting = Vec::new();
        let args = node
            .args
            .iter()
            .map(|a| Ok((a.name.clone(), self.ty(&a.ty, &mut visiting)?)))
            .collect::<Result<Vec<_>>>()?;
        let (args, _) = layout_fields(0, args);
        let ret = node
            .rtype
            .as_ref()
            .map(|t| self.ty(t, &mut visiting))
            .transpose()?;
        Ok(Callable {
            name: node.name.clone(),
            export_name,
            args,
            ret,
        })
    }

    /// Class followed by its ancestors, returned root first.
    fn class_chain(&self, export_idx: usize) -> Result<Vec<&'a ClassNode>> {
        let abi: &'a Abi = self.abi;
        let mut chain: Vec<&'a ClassNode> = Vec::new();
        let mut current = Some(export_idx);
        while let Some(idx) = current {
            let class = match &abi.exports[idx] {
                ExportNode::Class(c) => c,
                other => bail!("{} is not a class", other.name()),
            };
            if chain.iter().any(|c| c.name == class.name) {
                bail!("inheritance cycle through {}", class.name);
            }
            chain.push(class);
            current = match &class.extends {
                None => None,
                Some(parent) => Some(*self.exports.get(parent.as_str()).ok_or_else(|| {
                    anyhow!(
                        "class {} extends {}, which is not a class of this package",
                        class.name,
                        parent
                    )
                })?),
            };
        }
        chain.reverse();
        Ok(chain)
    }

    fn interface_ref(&self, name: &str) -> Result<ClassRef> {
        if let Some(&idx) = self.exports.get(name) {
            if matches!(self.abi.exports[idx], ExportNode::Interface(_)) {
                return Ok(ClassRef::new(self.pkg, name));
            }
        }
        if let Some(&idx) = self.imports.get(name) {
            if let ImportNode::Interface(r) = &self.abi.imports[idx] {
                return Ok(ClassRef::new(self.import_pkgs[idx], r.name.clone()));
            }
        }
        bail!("{} is not an interface", name)
    }

    /// Insert `name` and every local interface it extends.
    fn interface_closure(&self, name: &str, out: &mut BTreeSet<ClassRef>) -> Result<()> {
        let r = self.interface_ref(name)?;
        if !out.insert(r) {
            return Ok(());
        }
        if let Some(&idx) = self.exports.get(name) {
            if let ExportNode::Interface(node) = &self.abi.exports[idx] {
                for parent in &node.extends {
                    self.interface_closure(parent, out)?;
                }
            }
        }
        Ok(())
    }

    fn class_info(&self, export_idx: usize) -> Result<ClassInfo> {
        let chain = self.class_chain(export_idx)?;
        let own = chain
            .last()
            .copied()
            .ok_or_else(|| anyhow!("empty class chain"))?;

        let mut visiting = Vec::new();
        let mut raw_fields = Vec::new();
        for class in &chain {
            for f in &class.fields {
                if raw_fields.iter().any(|(n, _): &(String, Ty)| n == &f.name) {
                    bail!("class {} redeclares field {}", own.name, f.name);
                }
                raw_fields.push((f.name.clone(), self.ty(&f.ty, &mut visiting)?));
            }
        }
        let (fields, size) = layout_fields(JIG_HEADER_SIZE, raw_fields);

        let mut methods: Vec<Callable> = Vec::new();
        let mut method_index = HashMap::new();
        let mut ctor_node: Option<&MethodNode> = None;
        for class in &chain {
            for m in &class.methods {
                if m.name == CONSTRUCTOR {
                    ctor_node = Some(m);
                    continue;
                }
                let callable = self.callable(m, format!("{}${}", class.name, m.name))?;
                match method_index.get(&m.name) {
                    Some(&i) => methods[i] = callable,
                    None => {
                        method_index.insert(m.name.clone(), methods.len());
                        methods.push(callable);
                    }
                }
            }
        }

        let default_ctor = MethodNode {
            name: CONSTRUCTOR.to_string(),
            args: Vec::new(),
            rtype: None,
        };
        let mut constructor = self.callable(
            ctor_node.unwrap_or(&default_ctor),
            format!("{}_constructor", own.name),
        )?;
        constructor.ret = None;

        let mut conforms = BTreeSet::new();
        for class in &chain {
            conforms.insert(ClassRef::new(self.pkg, class.name.clone()));
            for iface in &class.implements {
                self.interface_closure(iface, &mut conforms)?;
            }
        }

        Ok(ClassInfo {
            export_idx,
            class_ref: ClassRef::new(self.pkg, own.name.clone()),
            parent: own.extends.clone(),
            fields,
            size,
            constructor,
            methods,
            method_index,
            conforms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PKG: PackageId = PackageId([1; 32]);

    fn other_pkg_hex() -> String {
        hex::encode([2u8; 32])
    }

    fn sample_abi() -> Abi {
        let json = format!(
            r#"{{
                "version": 1,
                "exports": [
                    {{"kind": "interface", "name": "Named", "methods": [{{"name": "name"}}]}},
                    {{"kind": "interface", "name": "Pet", "extends": ["Named"]}},
                    {{"kind": "class", "name": "Animal", "implements": ["Pet"],
                      "fields": [{{"name": "legs", "type": {{"name": "u8"}}}}],
                      "methods": [
                        {{"name": "constructor", "args": [{{"name": "legs", "type": {{"name": "u8"}}}}]}},
                        {{"name": "name", "rtype": {{"name": "string"}}}},
                        {{"name": "walk"}}
                      ]}},
                    {{"kind": "class", "name": "Dog", "extends": "Animal",
                      "fields": [{{"name": "owner", "type": {{"name": "Keeper", "nullable": true}}}},
                                 {{"name": "tricks", "type": {{"name": "Array", "args": [{{"name": "Trick"}}]}}}}],
                      "methods": [
                        {{"name": "bark", "args": [{{"name": "times", "type": {{"name": "u64"}}}}]}},
                        {{"name": "name", "rtype": {{"name": "string"}}}}
                      ]}},
                    {{"kind": "object", "name": "Trick",
                      "fields": [{{"name": "label", "type": {{"name": "string"}}}},
                                 {{"name": "score", "type": {{"name": "i64"}}}}]}},
                    {{"kind": "function", "name": "adopt",
                      "args": [{{"name": "pet", "type": {{"name": "Pet"}}}}],
                      "rtype": {{"name": "bool"}}}}
                ],
                "imports": [
                    {{"kind": "class", "name": "Keeper", "pkg": "{pkg}"}},
                    {{"kind": "interface", "name": "Tradable", "pkg": "{pkg}"}}
                ]
            }}"#,
            pkg = other_pkg_hex()
        );
        Abi::from_json(&json).unwrap()
    }

    #[test]
    fn test_export_kinds_and_indices() {
        let access = AbiAccess::new(PKG, sample_abi()).unwrap();
        assert_eq!(access.export_kind(0), Some(ExportKind::Interface(0)));
        assert_eq!(access.export_kind(2), Some(ExportKind::Class(0)));
        assert_eq!(access.export_kind(3), Some(ExportKind::Class(1)));
        assert_eq!(access.export_kind(4), Some(ExportKind::Object));
        assert_eq!(access.export_kind(5), Some(ExportKind::Function(0)));
        assert!(access.class(4).is_err());
        assert!(access.class(99).is_err());
        assert_eq!(access.class(3).unwrap().export_idx, 3);
    }

    #[test]
    fn test_inherited_fields_and_offsets() {
        let access = AbiAccess::new(PKG, sample_abi()).unwrap();
        let dog = access.class_by_name("Dog").unwrap();
        let names: Vec<&str> = dog.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["legs", "owner", "tricks"]);
        let offsets: Vec<u32> = dog.fields.iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![4, 8, 12]);
        assert_eq!(dog.size, 16);
    }

    #[test]
    fn test_methods_flattened_with_overrides() {
        let access = AbiAccess::new(PKG, sample_abi()).unwrap();
        let dog = access.class_by_name("Dog").unwrap();
        let names: Vec<&str> = dog.methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["name", "walk", "bark"]);
        assert_eq!(dog.methods[0].export_name, "Dog$name");
        assert_eq!(dog.methods[1].export_name, "Animal$walk");
        assert_eq!(dog.method_index("bark"), Some(2));
        assert_eq!(dog.constructor.export_name, "Dog_constructor");
        assert_eq!(dog.constructor.args.len(), 1);
    }

    #[test]
    fn test_conformance_records() {
        let access = AbiAccess::new(PKG, sample_abi()).unwrap();
        let dog = access.class_by_name("Dog").unwrap();
        assert!(dog.conforms_to(&JigTy::Class(ClassRef::new(PKG, "Animal"))));
        assert!(dog.conforms_to(&JigTy::Interface(ClassRef::new(PKG, "Pet"))));
        assert!(dog.conforms_to(&JigTy::Interface(ClassRef::new(PKG, "Named"))));
        assert!(!dog.conforms_to(&JigTy::Class(ClassRef::new(PackageId([2; 32]), "Keeper"))));

        let animal = access.class_by_name("Animal").unwrap();
        assert!(!animal.conforms_to(&JigTy::Class(ClassRef::new(PKG, "Dog"))));
    }

    #[test]
    fn test_resolved_types_are_self_contained() {
        let access = AbiAccess::new(PKG, sample_abi()).unwrap();
        let dog = access.class_by_name("Dog").unwrap();
        let owner = dog.field("owner").unwrap();
        assert_eq!(
            owner.ty,
            Ty::Nullable(Box::new(Ty::Jig(JigTy::Class(ClassRef::new(
                PackageId([2; 32]),
                "Keeper"
            )))))
        );
        match &dog.field("tricks").unwrap().ty {
            Ty::Array(inner) => match inner.as_ref() {
                Ty::Object(obj) => {
                    assert_eq!(obj.fields[1].offset, 8);
                    assert_eq!(obj.size, 16);
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }

        let adopt = access.function_by_name("adopt").unwrap();
        assert_eq!(adopt.ret, Some(Ty::Bool));
        assert!(access.is_proxy("Keeper"));
        assert!(!access.is_proxy("Dog"));
        assert_eq!(access.import(1).unwrap().kind, ImportKind::Interface);
    }

    #[test]
    fn test_rejects_bad_abis() {
        let cases = [
            r#"{"version":1,"exports":[{"kind":"class","name":"A","extends":"Missing"}]}"#,
            r#"{"version":1,"exports":[{"kind":"class","name":"A","extends":"B"},{"kind":"class","name":"B","extends":"A"}]}"#,
            r#"{"version":1,"exports":[{"kind":"object","name":"O","fields":[{"name":"o","type":{"name":"O"}}]}]}"#,
            r#"{"version":1,"exports":[{"kind":"function","name":"f","args":[{"name":"x","type":{"name":"f64"}}]}]}"#,
            r#"{"version":1,"exports":[{"kind":"function","name":"f"},{"kind":"function","name":"f"}]}"#,
            r#"{"version":1,"exports":[{"kind":"function","name":"f","args":[{"name":"m","type":{"name":"Map","args":[{"name":"bytes"},{"name":"u8"}]}}]}]}"#,
        ];
        for json in cases {
            let abi = Abi::from_json(json).unwrap();
            assert!(AbiAccess::new(PKG, abi).is_err(), "should reject {}", json);
        }
    }
}
