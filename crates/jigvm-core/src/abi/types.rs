//! Resolved value types and guest memory layout.

use std::fmt;

use jigvm_types::PackageId;

/// Bytes reserved at the start of every jig object for its origin pointer.
pub const JIG_HEADER_SIZE: u32 = 4;

/// `(package, export name)` of a class or interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassRef {
    pub pkg: PackageId,
    pub name: String,
}

impl ClassRef {
    pub fn new(pkg: PackageId, name: impl Into<String>) -> Self {
        Self {
            pkg,
            name: name.into(),
        }
    }
}

impl fmt::Display for ClassRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.pkg.short(), self.name)
    }
}

/// What a jig-typed slot accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JigTy {
    /// Any jig.
    Any,
    /// Instances of the class or its subclasses.
    Class(ClassRef),
    /// Instances of classes implementing the interface.
    Interface(ClassRef),
}

/// A field placed at a fixed offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    pub name: String,
    pub ty: Ty,
    pub offset: u32,
}

/// Plain (non-jig) struct type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectTy {
    pub name: String,
    pub fields: Vec<FieldLayout>,
    pub size: u32,
}

/// Fully resolved ABI type. Needs no further lookups to marshal a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ty {
    Bool,
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    String,
    Bytes,
    Array(Box<Ty>),
    Map(Box<Ty>, Box<Ty>),
    Nullable(Box<Ty>),
    Object(ObjectTy),
    Jig(JigTy),
}

impl Ty {
    /// Bytes occupied when stored inline in a struct, array or arg blob.
    pub fn size(&self) -> u32 {
        match self {
            Ty::Bool | Ty::U8 | Ty::I8 => 1,
            Ty::U16 | Ty::I16 => 2,
            Ty::U64 | Ty::I64 => 8,
            _ => 4,
        }
    }

    pub fn align(&self) -> u32 {
        self.size()
    }

    /// Passed as an i64 wasm value.
    pub fn is_wide(&self) -> bool {
        matches!(self, Ty::U64 | Ty::I64)
    }

    /// Stored by value rather than behind a pointer.
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Ty::Bool | Ty::U8 | Ty::U16 | Ty::U32 | Ty::U64 | Ty::I8 | Ty::I16 | Ty::I32 | Ty::I64
        )
    }

    pub fn contains_jig(&self) -> bool {
        match self {
            Ty::Jig(_) => true,
            Ty::Array(inner) | Ty::Nullable(inner) => inner.contains_jig(),
            Ty::Map(k, v) => k.contains_jig() || v.contains_jig(),
            Ty::Object(obj) => obj.fields.iter().any(|f| f.ty.contains_jig()),
            _ => false,
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Bool => write!(f, "bool"),
            Ty::U8 => write!(f, "u8"),
            Ty::U16 => write!(f, "u16"),
            Ty::U32 => write!(f, "u32"),
            Ty::U64 => write!(f, "u64"),
            Ty::I8 => write!(f, "i8"),
            Ty::I16 => write!(f, "i16"),
            Ty::I32 => write!(f, "i32"),
            Ty::I64 => write!(f, "i64"),
            Ty::String => write!(f, "string"),
            Ty::Bytes => write!(f, "bytes"),
            Ty::Array(inner) => write!(f, "Array<{}>", inner),
            Ty::Map(k, v) => write!(f, "Map<{}, {}>", k, v),
            Ty::Nullable(inner) => write!(f, "{} | null", inner),
            Ty::Object(obj) => write!(f, "{}", obj.name),
            Ty::Jig(JigTy::Any) => write!(f, "Jig"),
            Ty::Jig(JigTy::Class(c)) | Ty::Jig(JigTy::Interface(c)) => write!(f, "{}", c),
        }
    }
}

pub fn align_up(offset: u32, align: u32) -> u32 {
    if align <= 1 {
        offset
    } else {
        offset.div_ceil(align) * align
    }
}

/// Lay out fields in order starting at `start`, each aligned to its own size.
///
/// Returns the placed fields and the total size rounded up to the largest
/// alignment seen.
pub fn layout_fields<I>(start: u32, fields: I) -> (Vec<FieldLayout>, u32)
where
    I: IntoIterator<Item = (String, Ty)>,
{
    let mut offset = start;
    let mut max_align = 1;
    let mut placed = Vec::new();
    for (name, ty) in fields {
        let align = ty.align();
        max_align = max_align.max(align);
        offset = align_up(offset, align);
        let size = ty.size();
        placed.push(FieldLayout { name, ty, offset });
        offset += size;
    }
    (placed, align_up(offset, max_align))
}
