//! Moving typed values across the host/guest boundary and into storage.
//!
//! Two encodings exist for every [`Value`]:
//!
//! - **Guest layout**, used inside linear memory. Scalars are stored inline
//!   (little-endian, naturally aligned); everything else is a 4-byte pointer:
//!
//!   | Type          | Pointee                                  |
//!   |---------------|------------------------------------------|
//!   | string/bytes  | `[u32 len][bytes]`                       |
//!   | `Array<T>`    | `[u32 len][u32 data]`, data = `len` × T  |
//!   | `Map<K, V>`   | `[u32 len][u32 entries]`, entry = {K, V} |
//!   | `T \| null`   | 0 for null; scalars are boxed            |
//!   | object        | fields laid out from offset 0            |
//!   | jig           | record whose first word → `[u32 36][origin]` |
//!
//! - **State encoding**, used for output records and transaction arguments:
//!   bcs driven by the type. Nullables are options, maps are canonical bcs
//!   maps, objects are tuples and jigs are their 36-byte origin.

use anyhow::{anyhow, bail, Result};
use jigvm_types::Pointer;
use serde::de::{self, DeserializeSeed, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{self, Serialize, SerializeMap, SerializeSeq, SerializeTuple, Serializer};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt;

use crate::abi::{layout_fields, FieldLayout, JigTy, ObjectTy, Ty};
use crate::memory::LinearMemory;

// =============================================================================
// Value
// =============================================================================

/// Dynamically typed ABI value. Only meaningful together with a [`Ty`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Map(Vec<(Value, Value)>),
    /// The null of a nullable type.
    Null,
    /// Field values in declaration order.
    Object(Vec<Value>),
    /// Reference to a jig by origin.
    Jig(Pointer),
}

impl Value {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::U64(v) => Some(*v),
            Value::U32(v) => Some(*v as u64),
            Value::U16(v) => Some(*v as u64),
            Value::U8(v) => Some(*v as u64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_jig(&self) -> Option<&Pointer> {
        match self {
            Value::Jig(p) => Some(p),
            _ => None,
        }
    }
}

/// Check that `value` has the shape of `ty`.
///
/// Jig class conformance is not checked here; see [`collect_jigs`].
pub fn check_value(ty: &Ty, value: &Value) -> Result<()> {
    let ok = match (ty, value) {
        (Ty::Bool, Value::Bool(_))
        | (Ty::U8, Value::U8(_))
        | (Ty::U16, Value::U16(_))
        | (Ty::U32, Value::U32(_))
        | (Ty::U64, Value::U64(_))
        | (Ty::I8, Value::I8(_))
        | (Ty::I16, Value::I16(_))
        | (Ty::I32, Value::I32(_))
        | (Ty::I64, Value::I64(_))
        | (Ty::String, Value::String(_))
        | (Ty::Bytes, Value::Bytes(_))
        | (Ty::Jig(_), Value::Jig(_))
        | (Ty::Nullable(_), Value::Null) => true,
        (Ty::Nullable(inner), v) => return check_value(inner, v),
        (Ty::Array(inner), Value::Array(items)) => {
            for item in items {
                check_value(inner, item)?;
            }
            true
        }
        (Ty::Map(k, v), Value::Map(entries)) => {
            let mut keys = BTreeSet::new();
            for (key, val) in entries {
                check_value(k, key)?;
                check_value(v, val)?;
                if !keys.insert(encode_value(k, key)?) {
                    bail!("duplicate key {:?} in {}", key, ty);
                }
            }
            true
        }
        (Ty::Object(obj), Value::Object(fields)) => {
            if obj.fields.len() != fields.len() {
                bail!(
                    "{} has {} fields, got {}",
                    obj.name,
                    obj.fields.len(),
                    fields.len()
                );
            }
            for (f, v) in obj.fields.iter().zip(fields) {
                check_value(&f.ty, v)?;
            }
            true
        }
        _ => false,
    };
    if !ok {
        bail!("expected {}, got {:?}", ty, value);
    }
    Ok(())
}

/// Collect every jig reference in `value` with the type its slot demands.
pub fn collect_jigs(ty: &Ty, value: &Value, out: &mut Vec<(Pointer, JigTy)>) {
    match (ty, value) {
        (Ty::Jig(jty), Value::Jig(p)) => out.push((*p, jty.clone())),
        (Ty::Nullable(inner), v) => collect_jigs(inner, v, out),
        (Ty::Array(inner), Value::Array(items)) => {
            for item in items {
                collect_jigs(inner, item, out);
            }
        }
        (Ty::Map(k, v), Value::Map(entries)) => {
            for (key, val) in entries {
                collect_jigs(k, key, out);
                collect_jigs(v, val, out);
            }
        }
        (Ty::Object(obj), Value::Object(fields)) => {
            for (f, v) in obj.fields.iter().zip(fields) {
                collect_jigs(&f.ty, v, out);
            }
        }
        _ => {}
    }
}

/// Default value of `ty`: zero, empty or null.
///
/// Non-nullable jig slots have no default.
pub fn zero_value(ty: &Ty) -> Result<Value> {
    Ok(match ty {
        Ty::Bool => Value::Bool(false),
        Ty::U8 => Value::U8(0),
        Ty::U16 => Value::U16(0),
        Ty::U32 => Value::U32(0),
        Ty::U64 => Value::U64(0),
        Ty::I8 => Value::I8(0),
        Ty::I16 => Value::I16(0),
        Ty::I32 => Value::I32(0),
        Ty::I64 => Value::I64(0),
        Ty::String => Value::String(String::new()),
        Ty::Bytes => Value::Bytes(Vec::new()),
        Ty::Array(_) => Value::Array(Vec::new()),
        Ty::Map(_, _) => Value::Map(Vec::new()),
        Ty::Nullable(_) => Value::Null,
        Ty::Object(obj) => Value::Object(
            obj.fields
                .iter()
                .map(|f| zero_value(&f.ty))
                .collect::<Result<_>>()?,
        ),
        Ty::Jig(_) => bail!("{} has no default value", ty),
    })
}

// =============================================================================
// Guest layout
// =============================================================================

fn map_entry_layout(key: &Ty, value: &Ty) -> (Vec<FieldLayout>, u32) {
    layout_fields(
        0,
        vec![("key".to_string(), key.clone()), ("value".to_string(), value.clone())],
    )
}

fn len_u32(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| anyhow!("collection too large: {}", len))
}

fn scalar_bytes(value: &Value) -> Option<Vec<u8>> {
    Some(match value {
        Value::Bool(b) => vec![*b as u8],
        Value::U8(v) => vec![*v],
        Value::I8(v) => v.to_le_bytes().to_vec(),
        Value::U16(v) => v.to_le_bytes().to_vec(),
        Value::I16(v) => v.to_le_bytes().to_vec(),
        Value::U32(v) => v.to_le_bytes().to_vec(),
        Value::I32(v) => v.to_le_bytes().to_vec(),
        Value::U64(v) => v.to_le_bytes().to_vec(),
        Value::I64(v) => v.to_le_bytes().to_vec(),
        _ => return None,
    })
}

/// Store `value` inline at `addr`, allocating for pointer types.
pub fn write_value<M>(mem: &mut M, ty: &Ty, value: &Value, addr: u32) -> Result<()>
where
    M: LinearMemory + ?Sized,
{
    if ty.is_scalar() {
        check_value(ty, value)?;
        let bytes = scalar_bytes(value).ok_or_else(|| anyhow!("not a scalar: {:?}", value))?;
        return mem.write(addr, &bytes);
    }
    let ptr = alloc_value(mem, ty, value)?;
    mem.write_u32(addr, ptr)
}

/// Allocate the pointee of a pointer-typed value and return its address.
pub fn alloc_value<M>(mem: &mut M, ty: &Ty, value: &Value) -> Result<u32>
where
    M: LinearMemory + ?Sized,
{
    match (ty, value) {
        (Ty::String, Value::String(s)) => mem.write_buf(s.as_bytes()),
        (Ty::Bytes, Value::Bytes(b)) => mem.write_buf(b),
        (Ty::Array(inner), Value::Array(items)) => {
            let stride = inner.size();
            let len = len_u32(items.len())?;
            let data = mem.alloc(len.saturating_mul(stride).max(1))?;
            for (i, item) in items.iter().enumerate() {
                write_value(mem, inner, item, data + i as u32 * stride)?;
            }
            let header = mem.alloc(8)?;
            mem.write_u32(header, len)?;
            mem.write_u32(header + 4, data)?;
            Ok(header)
        }
        (Ty::Map(k, v), Value::Map(entries)) => {
            let (entry, stride) = map_entry_layout(k, v);
            let len = len_u32(entries.len())?;
            let data = mem.alloc(len.saturating_mul(stride).max(1))?;
            for (i, (key, val)) in entries.iter().enumerate() {
                let base = data + i as u32 * stride;
                write_value(mem, k, key, base + entry[0].offset)?;
                write_value(mem, v, val, base + entry[1].offset)?;
            }
            let header = mem.alloc(8)?;
            mem.write_u32(header, len)?;
            mem.write_u32(header + 4, data)?;
            Ok(header)
        }
        (Ty::Nullable(_), Value::Null) => Ok(0),
        (Ty::Nullable(inner), v) if inner.is_scalar() => {
            let ptr = mem.alloc(inner.size())?;
            write_value(mem, inner, v, ptr)?;
            Ok(ptr)
        }
        (Ty::Nullable(inner), v) => alloc_value(mem, inner, v),
        (Ty::Object(obj), Value::Object(fields)) => {
            check_value(ty, value)?;
            let ptr = mem.alloc(obj.size.max(1))?;
            for (f, v) in obj.fields.iter().zip(fields) {
                write_value(mem, &f.ty, v, ptr + f.offset)?;
            }
            Ok(ptr)
        }
        (Ty::Jig(_), Value::Jig(origin)) => {
            let buf = mem.write_buf(&origin.to_bytes())?;
            let record = mem.alloc(4)?;
            mem.write_u32(record, buf)?;
            Ok(record)
        }
        _ => bail!("expected {}, got {:?}", ty, value),
    }
}

fn read_scalar<M>(mem: &M, ty: &Ty, addr: u32) -> Result<Value>
where
    M: LinearMemory + ?Sized,
{
    let b = mem.read(addr, ty.size())?;
    Ok(match ty {
        Ty::Bool => Value::Bool(b[0] != 0),
        Ty::U8 => Value::U8(b[0]),
        Ty::I8 => Value::I8(b[0] as i8),
        Ty::U16 => Value::U16(u16::from_le_bytes([b[0], b[1]])),
        Ty::I16 => Value::I16(i16::from_le_bytes([b[0], b[1]])),
        Ty::U32 => Value::U32(u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        Ty::I32 => Value::I32(i32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        Ty::U64 => Value::U64(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ])),
        Ty::I64 => Value::I64(i64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ])),
        other => bail!("{} is not a scalar", other),
    })
}

/// Read a value stored inline at `addr`.
pub fn read_value<M>(mem: &M, ty: &Ty, addr: u32) -> Result<Value>
where
    M: LinearMemory + ?Sized,
{
    if ty.is_scalar() {
        return read_scalar(mem, ty, addr);
    }
    let ptr = mem.read_u32(addr)?;
    read_pointee(mem, ty, ptr)
}

/// Read the value a pointer-typed slot points at.
pub fn read_pointee<M>(mem: &M, ty: &Ty, ptr: u32) -> Result<Value>
where
    M: LinearMemory + ?Sized,
{
    if let Ty::Nullable(inner) = ty {
        if ptr == 0 {
            return Ok(Value::Null);
        }
        return if inner.is_scalar() {
            read_scalar(mem, inner, ptr)
        } else {
            read_pointee(mem, inner, ptr)
        };
    }
    if ptr == 0 {
        bail!("null pointer for non-nullable {}", ty);
    }
    match ty {
        Ty::String => {
            let bytes = mem.read_buf(ptr)?;
            Ok(Value::String(
                String::from_utf8(bytes).map_err(|e| anyhow!("invalid utf-8 string: {}", e))?,
            ))
        }
        Ty::Bytes => Ok(Value::Bytes(mem.read_buf(ptr)?)),
        Ty::Array(inner) => {
            let len = mem.read_u32(ptr)?;
            let data = mem.read_u32(ptr + 4)?;
            let stride = inner.size();
            mem.check_range(data, len as u64 * stride as u64)?;
            let mut items = Vec::with_capacity(len as usize);
            for i in 0..len {
                items.push(read_value(mem, inner, data + i * stride)?);
            }
            Ok(Value::Array(items))
        }
        Ty::Map(k, v) => {
            let len = mem.read_u32(ptr)?;
            let data = mem.read_u32(ptr + 4)?;
            let (entry, stride) = map_entry_layout(k, v);
            mem.check_range(data, len as u64 * stride as u64)?;
            let mut entries = Vec::with_capacity(len as usize);
            for i in 0..len {
                let base = data + i * stride;
                let key = read_value(mem, k, base + entry[0].offset)?;
                let val = read_value(mem, v, base + entry[1].offset)?;
                entries.push((key, val));
            }
            Ok(Value::Map(entries))
        }
        Ty::Object(obj) => read_object(mem, obj, ptr),
        Ty::Jig(_) => Ok(Value::Jig(read_jig_origin(mem, ptr)?)),
        other => bail!("{} is not a pointer type", other),
    }
}

fn read_object<M>(mem: &M, obj: &ObjectTy, ptr: u32) -> Result<Value>
where
    M: LinearMemory + ?Sized,
{
    let fields = read_fields(mem, &obj.fields, ptr)?;
    Ok(Value::Object(fields))
}

/// Read `fields` relative to `base`.
pub fn read_fields<M>(mem: &M, fields: &[FieldLayout], base: u32) -> Result<Vec<Value>>
where
    M: LinearMemory + ?Sized,
{
    fields
        .iter()
        .map(|f| read_value(mem, &f.ty, base + f.offset))
        .collect()
}

/// Write `values` into `fields` relative to `base`.
pub fn write_fields<M>(mem: &mut M, fields: &[FieldLayout], values: &[Value], base: u32) -> Result<()>
where
    M: LinearMemory + ?Sized,
{
    if fields.len() != values.len() {
        bail!("expected {} values, got {}", fields.len(), values.len());
    }
    for (f, v) in fields.iter().zip(values) {
        write_value(mem, &f.ty, v, base + f.offset)?;
    }
    Ok(())
}

/// Origin stored in the header of the jig object (or proxy record) at `ptr`.
pub fn read_jig_origin<M>(mem: &M, ptr: u32) -> Result<Pointer>
where
    M: LinearMemory + ?Sized,
{
    let buf = mem.read_u32(ptr)?;
    if buf == 0 {
        bail!("jig at {} has no origin yet", ptr);
    }
    Pointer::from_bytes(&mem.read_buf(buf)?)
}

/// Fill the header of a jig object at `ptr` with `origin`.
pub fn write_jig_origin<M>(mem: &mut M, ptr: u32, origin: &Pointer) -> Result<()>
where
    M: LinearMemory + ?Sized,
{
    let buf = mem.write_buf(&origin.to_bytes())?;
    mem.write_u32(ptr, buf)
}

/// Decode a host-call argument blob (a bytes buffer laid out like an object).
pub fn read_args<M>(mem: &M, args: &[FieldLayout], blob: u32) -> Result<Vec<Value>>
where
    M: LinearMemory + ?Sized,
{
    if args.is_empty() {
        return Ok(Vec::new());
    }
    if blob == 0 {
        bail!("missing argument blob");
    }
    let len = mem.read_u32(blob)?;
    let needed = args
        .iter()
        .map(|a| a.offset + a.ty.size())
        .max()
        .unwrap_or(0);
    if len < needed {
        bail!("argument blob is {} bytes, need {}", len, needed);
    }
    read_fields(mem, args, blob + 4)
}

// =============================================================================
// Wasm words
// =============================================================================

/// Lower a value to the raw bits of a wasm parameter.
///
/// Wide types use all 64 bits; everything else fits in the low 32.
pub fn lower_word<M>(mem: &mut M, ty: &Ty, value: &Value) -> Result<u64>
where
    M: LinearMemory + ?Sized,
{
    check_value(ty, value)?;
    Ok(match value {
        Value::Bool(b) => *b as u64,
        Value::U8(v) => *v as u64,
        Value::U16(v) => *v as u64,
        Value::U32(v) => *v as u64,
        Value::U64(v) => *v,
        Value::I8(v) => *v as i32 as u32 as u64,
        Value::I16(v) => *v as i32 as u32 as u64,
        Value::I32(v) => *v as u32 as u64,
        Value::I64(v) => *v as u64,
        _ => alloc_value(mem, ty, value)? as u64,
    })
}

/// Lift the raw bits of a wasm result into a value.
pub fn lift_word<M>(mem: &M, ty: &Ty, bits: u64) -> Result<Value>
where
    M: LinearMemory + ?Sized,
{
    Ok(match ty {
        Ty::Bool => Value::Bool(bits as u32 != 0),
        Ty::U8 => Value::U8(bits as u8),
        Ty::U16 => Value::U16(bits as u16),
        Ty::U32 => Value::U32(bits as u32),
        Ty::U64 => Value::U64(bits),
        Ty::I8 => Value::I8(bits as u8 as i8),
        Ty::I16 => Value::I16(bits as u16 as i16),
        Ty::I32 => Value::I32(bits as u32 as i32),
        Ty::I64 => Value::I64(bits as i64),
        _ => read_pointee(mem, ty, bits as u32)?,
    })
}

// =============================================================================
// State encoding
// =============================================================================

/// Serializes a value as directed by its type.
pub struct TypedValue<'a>(pub &'a Ty, pub &'a Value);

impl Serialize for TypedValue<'_> {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        match (self.0, self.1) {
            (Ty::Bool, Value::Bool(v)) => s.serialize_bool(*v),
            (Ty::U8, Value::U8(v)) => s.serialize_u8(*v),
            (Ty::U16, Value::U16(v)) => s.serialize_u16(*v),
            (Ty::U32, Value::U32(v)) => s.serialize_u32(*v),
            (Ty::U64, Value::U64(v)) => s.serialize_u64(*v),
            (Ty::I8, Value::I8(v)) => s.serialize_i8(*v),
            (Ty::I16, Value::I16(v)) => s.serialize_i16(*v),
            (Ty::I32, Value::I32(v)) => s.serialize_i32(*v),
            (Ty::I64, Value::I64(v)) => s.serialize_i64(*v),
            (Ty::String, Value::String(v)) => s.serialize_str(v),
            (Ty::Bytes, Value::Bytes(v)) => s.serialize_bytes(v),
            (Ty::Array(inner), Value::Array(items)) => {
                let mut seq = s.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(&TypedValue(inner, item))?;
                }
                seq.end()
            }
            (Ty::Map(k, v), Value::Map(entries)) => {
                let mut map = s.serialize_map(Some(entries.len()))?;
                for (key, val) in entries {
                    map.serialize_entry(&TypedValue(k, key), &TypedValue(v, val))?;
                }
                map.end()
            }
            (Ty::Nullable(_), Value::Null) => s.serialize_none(),
            (Ty::Nullable(inner), v) => s.serialize_some(&TypedValue(inner, v)),
            (Ty::Object(obj), Value::Object(fields)) if obj.fields.len() == fields.len() => {
                let mut tuple = s.serialize_tuple(fields.len())?;
                for (f, v) in obj.fields.iter().zip(fields) {
                    tuple.serialize_element(&TypedValue(&f.ty, v))?;
                }
                tuple.end()
            }
            (Ty::Jig(_), Value::Jig(origin)) => origin.serialize(s),
            (ty, v) => Err(ser::Error::custom(format!("expected {}, got {:?}", ty, v))),
        }
    }
}

/// Serializes a row of values (jig state, argument list) as a tuple.
struct TypedRow<'a>(&'a [Ty], &'a [Value]);

impl Serialize for TypedRow<'_> {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        let mut tuple = s.serialize_tuple(self.0.len())?;
        for (ty, v) in self.0.iter().zip(self.1) {
            tuple.serialize_element(&TypedValue(ty, v))?;
        }
        tuple.end()
    }
}

/// Deserializes a value of a known type.
pub struct TySeed<'a>(pub &'a Ty);

impl<'de> DeserializeSeed<'de> for TySeed<'_> {
    type Value = Value;

    fn deserialize<D: Deserializer<'de>>(self, d: D) -> std::result::Result<Value, D::Error> {
        match self.0 {
            Ty::Bool => bool::deserialize(d).map(Value::Bool),
            Ty::U8 => u8::deserialize(d).map(Value::U8),
            Ty::U16 => u16::deserialize(d).map(Value::U16),
            Ty::U32 => u32::deserialize(d).map(Value::U32),
            Ty::U64 => u64::deserialize(d).map(Value::U64),
            Ty::I8 => i8::deserialize(d).map(Value::I8),
            Ty::I16 => i16::deserialize(d).map(Value::I16),
            Ty::I32 => i32::deserialize(d).map(Value::I32),
            Ty::I64 => i64::deserialize(d).map(Value::I64),
            Ty::String => String::deserialize(d).map(Value::String),
            Ty::Bytes => Vec::<u8>::deserialize(d).map(Value::Bytes),
            Ty::Array(inner) => d.deserialize_seq(ArrayVisitor(inner)),
            Ty::Map(k, v) => d.deserialize_map(MapVisitor(k, v)),
            Ty::Nullable(inner) => d.deserialize_option(NullableVisitor(inner)),
            Ty::Object(obj) => {
                let tys: Vec<Ty> = obj.fields.iter().map(|f| f.ty.clone()).collect();
                RowSeed(&tys).deserialize(d).map(Value::Object)
            }
            Ty::Jig(_) => Pointer::deserialize(d).map(Value::Jig),
        }
    }
}

struct RowSeed<'a>(&'a [Ty]);

impl<'de> DeserializeSeed<'de> for RowSeed<'_> {
    type Value = Vec<Value>;

    fn deserialize<D: Deserializer<'de>>(self, d: D) -> std::result::Result<Vec<Value>, D::Error> {
        d.deserialize_tuple(self.0.len(), self)
    }
}

impl<'de> Visitor<'de> for RowSeed<'_> {
    type Value = Vec<Value>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "a tuple of {} values", self.0.len())
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Vec<Value>, A::Error> {
        let mut out = Vec::with_capacity(self.0.len());
        for (i, ty) in self.0.iter().enumerate() {
            let v = seq
                .next_element_seed(TySeed(ty))?
                .ok_or_else(|| de::Error::invalid_length(i, &self))?;
            out.push(v);
        }
        Ok(out)
    }
}

struct ArrayVisitor<'a>(&'a Ty);

impl<'de> Visitor<'de> for ArrayVisitor<'_> {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Array<{}>", self.0)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(4096));
        while let Some(item) = seq.next_element_seed(TySeed(self.0))? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }
}

struct MapVisitor<'a>(&'a Ty, &'a Ty);

impl<'de> Visitor<'de> for MapVisitor<'_> {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Map<{}, {}>", self.0, self.1)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Value, A::Error> {
        let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0).min(4096));
        while let Some(key) = map.next_key_seed(TySeed(self.0))? {
            let value = map.next_value_seed(TySeed(self.1))?;
            entries.push((key, value));
        }
        Ok(Value::Map(entries))
    }
}

struct NullableVisitor<'a>(&'a Ty);

impl<'de> Visitor<'de> for NullableVisitor<'_> {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} | null", self.0)
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> std::result::Result<Value, D::Error> {
        TySeed(self.0).deserialize(d)
    }
}

/// Encode one value.
pub fn encode_value(ty: &Ty, value: &Value) -> Result<Vec<u8>> {
    check_value(ty, value)?;
    bcs::to_bytes(&TypedValue(ty, value)).map_err(|e| anyhow!("encode {}: {}", ty, e))
}

/// Decode one value; trailing bytes are an error.
pub fn decode_value(ty: &Ty, bytes: &[u8]) -> Result<Value> {
    bcs::from_bytes_seed(TySeed(ty), bytes).map_err(|e| anyhow!("decode {}: {}", ty, e))
}

/// Encode jig state: the field values as a tuple.
pub fn encode_state(tys: &[Ty], values: &[Value]) -> Result<Vec<u8>> {
    if tys.len() != values.len() {
        bail!("state has {} fields, got {} values", tys.len(), values.len());
    }
    for (ty, v) in tys.iter().zip(values) {
        check_value(ty, v)?;
    }
    bcs::to_bytes(&TypedRow(tys, values)).map_err(|e| anyhow!("encode state: {}", e))
}

pub fn decode_state(tys: &[Ty], bytes: &[u8]) -> Result<Vec<Value>> {
    bcs::from_bytes_seed(RowSeed(tys), bytes).map_err(|e| anyhow!("decode state: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{ClassRef, JIG_HEADER_SIZE};
    use crate::memory::VecMemory;
    use jigvm_types::PackageId;

    fn point_ty() -> Ty {
        let (fields, size) = layout_fields(
            0,
            vec![("x".to_string(), Ty::I32), ("label".to_string(), Ty::String)],
        );
        Ty::Object(ObjectTy {
            name: "Point".into(),
            fields,
            size,
        })
    }

    fn origin(n: u8) -> Pointer {
        Pointer::new([n; 32], n as u32)
    }

    #[test]
    fn test_scalars_inline() {
        let mut mem = VecMemory::new();
        let addr = mem.alloc(8).unwrap();
        write_value(&mut mem, &Ty::I16, &Value::I16(-2), addr).unwrap();
        assert_eq!(mem.read(addr, 2).unwrap(), vec![0xfe, 0xff]);
        assert_eq!(read_value(&mem, &Ty::I16, addr).unwrap(), Value::I16(-2));

        write_value(&mut mem, &Ty::U64, &Value::U64(1 << 40), addr).unwrap();
        assert_eq!(read_value(&mem, &Ty::U64, addr).unwrap(), Value::U64(1 << 40));

        assert!(write_value(&mut mem, &Ty::U8, &Value::Bool(true), addr).is_err());
    }

    #[test]
    fn test_nested_collections_in_memory() {
        let ty = Ty::Map(
            Box::new(Ty::String),
            Box::new(Ty::Array(Box::new(point_ty()))),
        );
        let value = Value::Map(vec![(
            Value::String("a".into()),
            Value::Array(vec![
                Value::Object(vec![Value::I32(-1), Value::String("p".into())]),
                Value::Object(vec![Value::I32(7), Value::String("".into())]),
            ]),
        )]);
        let mut mem = VecMemory::new();
        let slot = mem.alloc(4).unwrap();
        write_value(&mut mem, &ty, &value, slot).unwrap();
        assert_eq!(read_value(&mem, &ty, slot).unwrap(), value);
    }

    #[test]
    fn test_nullable_scalar_is_boxed() {
        let ty = Ty::Nullable(Box::new(Ty::U32));
        let mut mem = VecMemory::new();
        let slot = mem.alloc(4).unwrap();

        write_value(&mut mem, &ty, &Value::Null, slot).unwrap();
        assert_eq!(mem.read_u32(slot).unwrap(), 0);
        assert_eq!(read_value(&mem, &ty, slot).unwrap(), Value::Null);

        write_value(&mut mem, &ty, &Value::U32(9), slot).unwrap();
        let boxed = mem.read_u32(slot).unwrap();
        assert_ne!(boxed, 0);
        assert_eq!(mem.read_u32(boxed).unwrap(), 9);
        assert_eq!(read_value(&mem, &ty, slot).unwrap(), Value::U32(9));
    }

    #[test]
    fn test_null_for_non_nullable_rejected() {
        let mut mem = VecMemory::new();
        let slot = mem.alloc(4).unwrap();
        assert!(read_value(&mem, &Ty::String, slot).is_err());
    }

    #[test]
    fn test_jig_proxy_record() {
        let ty = Ty::Jig(JigTy::Any);
        let mut mem = VecMemory::new();
        let ptr = alloc_value(&mut mem, &ty, &Value::Jig(origin(3))).unwrap();
        assert_eq!(read_jig_origin(&mem, ptr).unwrap(), origin(3));

        // A real jig object carries the same header before its fields.
        let obj = mem.alloc(JIG_HEADER_SIZE + 8).unwrap();
        assert!(read_jig_origin(&mem, obj).is_err());
        write_jig_origin(&mut mem, obj, &origin(4)).unwrap();
        assert_eq!(
            read_pointee(&mem, &ty, obj).unwrap(),
            Value::Jig(origin(4))
        );
    }

    #[test]
    fn test_read_args_checks_blob_size() {
        let (args, size) = layout_fields(
            0,
            vec![("n".to_string(), Ty::U64), ("flag".to_string(), Ty::Bool)],
        );
        let mut mem = VecMemory::new();
        let blob = mem.alloc(4 + size).unwrap();
        mem.write_u32(blob, size).unwrap();
        write_fields(&mut mem, &args, &[Value::U64(5), Value::Bool(true)], blob + 4).unwrap();
        assert_eq!(
            read_args(&mem, &args, blob).unwrap(),
            vec![Value::U64(5), Value::Bool(true)]
        );

        mem.write_u32(blob, 4).unwrap();
        assert!(read_args(&mem, &args, blob).is_err());
    }

    #[test]
    fn test_words() {
        let mut mem = VecMemory::new();
        assert_eq!(lower_word(&mut mem, &Ty::I8, &Value::I8(-1)).unwrap(), 0xffff_ffff);
        assert_eq!(lift_word(&mem, &Ty::I8, 0xffff_ffff).unwrap(), Value::I8(-1));
        assert_eq!(lift_word(&mem, &Ty::Bool, 2).unwrap(), Value::Bool(true));

        let bits = lower_word(&mut mem, &Ty::String, &Value::String("hi".into())).unwrap();
        assert_eq!(
            lift_word(&mem, &Ty::String, bits).unwrap(),
            Value::String("hi".into())
        );
    }

    #[test]
    fn test_state_encoding_layout() {
        let tys = vec![Ty::U64, Ty::Nullable(Box::new(Ty::Jig(JigTy::Any))), Ty::String];
        let values = vec![Value::U64(300), Value::Jig(origin(1)), Value::String("ab".into())];
        let bytes = encode_state(&tys, &values).unwrap();
        // u64 | some-tag + 36-byte origin | uleb len + bytes
        assert_eq!(bytes.len(), 8 + 1 + 36 + 1 + 2);
        assert_eq!(&bytes[..8], &300u64.to_le_bytes());
        assert_eq!(bytes[8], 1);
        assert_eq!(decode_state(&tys, &bytes).unwrap(), values);
    }

    #[test]
    fn test_maps_encode_canonically() {
        let ty = Ty::Map(Box::new(Ty::U8), Box::new(Ty::Bool));
        let a = Value::Map(vec![
            (Value::U8(2), Value::Bool(true)),
            (Value::U8(1), Value::Bool(false)),
        ]);
        let b = Value::Map(vec![
            (Value::U8(1), Value::Bool(false)),
            (Value::U8(2), Value::Bool(true)),
        ]);
        assert_eq!(encode_value(&ty, &a).unwrap(), encode_value(&ty, &b).unwrap());
        assert_eq!(decode_value(&ty, &encode_value(&ty, &a).unwrap()).unwrap(), b);
    }

    #[test]
    fn test_map_duplicate_keys_rejected() {
        let ty = Ty::Map(Box::new(Ty::String), Box::new(Ty::U32));
        let value = Value::Map(vec![
            (Value::String("a".into()), Value::U32(1)),
            (Value::String("a".into()), Value::U32(2)),
        ]);
        let err = check_value(&ty, &value).unwrap_err();
        assert!(err.to_string().contains("duplicate key"), "{}", err);
        assert!(encode_value(&ty, &value).is_err());
        assert!(encode_state(&[ty], &[value]).is_err());
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert!(decode_value(&Ty::U32, &[1, 2, 3]).is_err());
        assert!(decode_value(&Ty::U8, &[1, 2]).is_err());
        assert!(decode_value(&Ty::Bool, &[7]).is_err());
        assert!(encode_state(&[Ty::U8], &[Value::U16(1)]).is_err());
    }

    #[test]
    fn test_collect_jigs_keeps_slot_types() {
        let class = JigTy::Class(ClassRef::new(PackageId([5; 32]), "Sheep"));
        let ty = Ty::Array(Box::new(Ty::Jig(class.clone())));
        let value = Value::Array(vec![Value::Jig(origin(1)), Value::Jig(origin(2))]);
        let mut out = Vec::new();
        collect_jigs(&ty, &value, &mut out);
        assert_eq!(out, vec![(origin(1), class.clone()), (origin(2), class)]);
    }

    #[test]
    fn test_zero_values() {
        assert_eq!(zero_value(&Ty::U64).unwrap(), Value::U64(0));
        assert_eq!(
            zero_value(&Ty::Nullable(Box::new(Ty::Jig(JigTy::Any)))).unwrap(),
            Value::Null
        );
        assert!(zero_value(&Ty::Jig(JigTy::Any)).is_err());
    }
}
