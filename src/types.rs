//! Primitive kinds, values and the stored type descriptions.
//!
//! Every fixed-width value is laid out little-endian in the flat buffers the record model serializes
//! to. Stored types are described to HDF5 through [`TypeDescriptor`], which uses the byte order of the
//! host; hitree targets little-endian hosts.
use std::fmt;

use byte_slice_cast::{AsByteSlice, AsMutByteSlice, ToByteSlice, ToMutByteSlice};
use byteorder::{ByteOrder, LittleEndian};
use hdf5::types::{FloatSize, IntSize, TypeDescriptor};

/// The closed set of leaf kinds a node may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Text,
}

impl PrimitiveKind {
    /// Width in bytes, text has no fixed width.
    pub fn size(&self) -> usize {
        use PrimitiveKind::*;

        match self {
            U8 | I8 => 1,
            U16 | I16 => 2,
            U32 | I32 | F32 => 4,
            U64 | I64 | F64 => 8,
            Text => 0,
        }
    }

    pub fn datatype(&self) -> Datatype {
        use PrimitiveKind::*;

        match self {
            U8 | U16 | U32 | U64 => Datatype::UInt(self.size()),
            I8 | I16 | I32 | I64 => Datatype::Int(self.size()),
            F32 | F64 => Datatype::Float(self.size()),
            Text => Datatype::VarLenStr,
        }
    }

    pub fn name(&self) -> &'static str {
        use PrimitiveKind::*;

        match self {
            U8 => "uint8",
            U16 => "uint16",
            U32 => "uint32",
            U64 => "uint64",
            I8 => "int8",
            I16 => "int16",
            I32 => "int32",
            I64 => "int64",
            F32 => "float32",
            F64 => "float64",
            Text => "text",
        }
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single leaf value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Text(String),
}

impl Value {
    pub fn kind(&self) -> PrimitiveKind {
        use Value::*;

        match self {
            U8(_) => PrimitiveKind::U8,
            U16(_) => PrimitiveKind::U16,
            U32(_) => PrimitiveKind::U32,
            U64(_) => PrimitiveKind::U64,
            I8(_) => PrimitiveKind::I8,
            I16(_) => PrimitiveKind::I16,
            I32(_) => PrimitiveKind::I32,
            I64(_) => PrimitiveKind::I64,
            F32(_) => PrimitiveKind::F32,
            F64(_) => PrimitiveKind::F64,
            Text(_) => PrimitiveKind::Text,
        }
    }

    /// Zero of the given kind.
    pub fn zero(kind: PrimitiveKind) -> Value {
        use PrimitiveKind::*;

        match kind {
            U8 => Value::U8(0),
            U16 => Value::U16(0),
            U32 => Value::U32(0),
            U64 => Value::U64(0),
            I8 => Value::I8(0),
            I16 => Value::I16(0),
            I32 => Value::I32(0),
            I64 => Value::I64(0),
            F32 => Value::F32(0.),
            F64 => Value::F64(0.),
            Text => Value::Text(String::new()),
        }
    }

    /// Decode a little-endian value of `kind` from the front of `b`.
    pub fn decode(kind: PrimitiveKind, b: &[u8]) -> Value {
        use PrimitiveKind::*;

        match kind {
            U8 => Value::U8(b[0]),
            U16 => Value::U16(LittleEndian::read_u16(b)),
            U32 => Value::U32(LittleEndian::read_u32(b)),
            U64 => Value::U64(LittleEndian::read_u64(b)),
            I8 => Value::I8(b[0] as i8),
            I16 => Value::I16(LittleEndian::read_i16(b)),
            I32 => Value::I32(LittleEndian::read_i32(b)),
            I64 => Value::I64(LittleEndian::read_i64(b)),
            F32 => Value::F32(LittleEndian::read_f32(b)),
            F64 => Value::F64(LittleEndian::read_f64(b)),
            Text => Value::Text(String::new()),
        }
    }

    /// Encode into the front of `out` little-endian. Text has no fixed encoding and writes nothing.
    pub fn encode(&self, out: &mut [u8]) {
        use Value::*;

        match self {
            U8(v) => out[0] = *v,
            U16(v) => LittleEndian::write_u16(out, *v),
            U32(v) => LittleEndian::write_u32(out, *v),
            U64(v) => LittleEndian::write_u64(out, *v),
            I8(v) => out[0] = *v as u8,
            I16(v) => LittleEndian::write_i16(out, *v),
            I32(v) => LittleEndian::write_i32(out, *v),
            I64(v) => LittleEndian::write_i64(out, *v),
            F32(v) => LittleEndian::write_f32(out, *v),
            F64(v) => LittleEndian::write_f64(out, *v),
            Text(_) => {}
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        use Value::*;

        Some(match self {
            U8(v) => *v as f64,
            U16(v) => *v as f64,
            U32(v) => *v as f64,
            U64(v) => *v as f64,
            I8(v) => *v as f64,
            I16(v) => *v as f64,
            I32(v) => *v as f64,
            I64(v) => *v as f64,
            F32(v) => *v as f64,
            F64(v) => *v,
            Text(_) => return None,
        })
    }

    pub fn as_i128(&self) -> Option<i128> {
        use Value::*;

        Some(match self {
            U8(v) => *v as i128,
            U16(v) => *v as i128,
            U32(v) => *v as i128,
            U64(v) => *v as i128,
            I8(v) => *v as i128,
            I16(v) => *v as i128,
            I32(v) => *v as i128,
            I64(v) => *v as i128,
            F32(v) => *v as i128,
            F64(v) => *v as i128,
            Text(_) => return None,
        })
    }

    /// Numeric conversion to another kind with `as` semantics. Text converts only to text.
    pub fn cast(&self, kind: PrimitiveKind) -> Option<Value> {
        use PrimitiveKind::*;

        if self.kind() == kind {
            return Some(self.clone());
        }

        let float = matches!(self, Value::F32(_) | Value::F64(_));
        let i = self.as_i128()?;
        let f = self.as_f64()?;

        Some(match kind {
            U8 => Value::U8(if float { f as u8 } else { i as u8 }),
            U16 => Value::U16(if float { f as u16 } else { i as u16 }),
            U32 => Value::U32(if float { f as u32 } else { i as u32 }),
            U64 => Value::U64(if float { f as u64 } else { i as u64 }),
            I8 => Value::I8(if float { f as i8 } else { i as i8 }),
            I16 => Value::I16(if float { f as i16 } else { i as i16 }),
            I32 => Value::I32(if float { f as i32 } else { i as i32 }),
            I64 => Value::I64(if float { f as i64 } else { i as i64 }),
            F32 => Value::F32(f as f32),
            F64 => Value::F64(f),
            Text => return None,
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Value::*;

        match self {
            U8(v) => write!(f, "{v}"),
            U16(v) => write!(f, "{v}"),
            U32(v) => write!(f, "{v}"),
            U64(v) => write!(f, "{v}"),
            I8(v) => write!(f, "{v}"),
            I16(v) => write!(f, "{v}"),
            I32(v) => write!(f, "{v}"),
            I64(v) => write!(f, "{v}"),
            F32(v) => write!(f, "{v}"),
            F64(v) => write!(f, "{v}"),
            Text(v) => f.write_str(v),
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::Text(s.to_string())
    }
}

/// Rust types that map onto a fixed-width [`PrimitiveKind`].
pub trait Primitive:
    Copy + Default + PartialEq + fmt::Debug + ToByteSlice + ToMutByteSlice + 'static
{
    const KIND: PrimitiveKind;

    fn into_value(self) -> Value;

    /// Converting numeric cast from any numeric value.
    fn from_value(v: &Value) -> Option<Self>;

    fn encode(self, out: &mut [u8]) {
        self.into_value().encode(out)
    }

    fn decode(b: &[u8]) -> Self {
        Self::from_value(&Value::decode(Self::KIND, b)).unwrap_or_default()
    }

    /// Little-endian bytes of a slice of values.
    fn encode_slice(values: &[Self]) -> Vec<u8> {
        if cfg!(target_endian = "little") {
            values.as_byte_slice().to_vec()
        } else {
            let sz = Self::KIND.size();
            let mut out = vec![0u8; values.len() * sz];
            for (v, o) in values.iter().zip(out.chunks_exact_mut(sz)) {
                v.encode(o);
            }
            out
        }
    }

    /// Values from little-endian bytes, trailing partial elements are ignored.
    fn decode_slice(bytes: &[u8]) -> Vec<Self> {
        let sz = Self::KIND.size();
        let n = bytes.len() / sz;

        if cfg!(target_endian = "little") {
            let mut out = vec![Self::default(); n];
            out.as_mut_byte_slice().copy_from_slice(&bytes[..n * sz]);
            out
        } else {
            bytes.chunks_exact(sz).map(Self::decode).collect()
        }
    }
}

macro_rules! impl_primitive {
    ($t:ty, $kind:ident) => {
        impl Primitive for $t {
            const KIND: PrimitiveKind = PrimitiveKind::$kind;

            fn into_value(self) -> Value {
                Value::$kind(self)
            }

            fn from_value(v: &Value) -> Option<Self> {
                match v.cast(PrimitiveKind::$kind)? {
                    Value::$kind(x) => Some(x),
                    _ => None,
                }
            }
        }
    };
}

impl_primitive!(u8, U8);
impl_primitive!(u16, U16);
impl_primitive!(u32, U32);
impl_primitive!(u64, U64);
impl_primitive!(i8, I8);
impl_primitive!(i16, I16);
impl_primitive!(i32, I32);
impl_primitive!(i64, I64);
impl_primitive!(f32, F32);
impl_primitive!(f64, F64);

/// Coarse class of a stored type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeClass {
    Integer,
    Float,
    Compound,
    Array,
    String,
    Other,
}

/// Stored element type of a dataset or attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum Datatype {
    UInt(usize),
    Int(usize),
    Float(usize),
    Compound(CompoundType),
    Array(Box<Datatype>, Vec<u64>),
    VarLenStr,
    FixedStr(usize),

    /// A stored type with no counterpart here (enums, references, variable length arrays..), by size.
    Custom(usize),
}

impl Datatype {
    /// Size of one element in bytes. Variable length strings have no fixed size and report 0.
    pub fn dsize(&self) -> usize {
        use Datatype::*;

        match self {
            UInt(sz) | Int(sz) | Float(sz) | FixedStr(sz) | Custom(sz) => *sz,
            Compound(c) => c.size(),
            Array(base, dims) => base.dsize() * dims.iter().product::<u64>() as usize,
            VarLenStr => 0,
        }
    }

    pub fn class(&self) -> TypeClass {
        use Datatype::*;

        match self {
            UInt(_) | Int(_) => TypeClass::Integer,
            Float(_) => TypeClass::Float,
            Compound(_) => TypeClass::Compound,
            Array(..) => TypeClass::Array,
            VarLenStr | FixedStr(_) => TypeClass::String,
            Custom(_) => TypeClass::Other,
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, Datatype::Int(_) | Datatype::Float(_))
    }

    /// The primitive kind of a numeric leaf type.
    pub fn primitive(&self) -> Option<PrimitiveKind> {
        use Datatype::*;
        use PrimitiveKind as P;

        Some(match self {
            UInt(1) => P::U8,
            UInt(2) => P::U16,
            UInt(4) => P::U32,
            UInt(8) => P::U64,
            Int(1) => P::I8,
            Int(2) => P::I16,
            Int(4) => P::I32,
            Int(8) => P::I64,
            Float(4) => P::F32,
            Float(8) => P::F64,
            VarLenStr => P::Text,
            _ => return None,
        })
    }

    pub fn compound(&self) -> Option<&CompoundType> {
        match self {
            Datatype::Compound(c) => Some(c),
            _ => None,
        }
    }

    /// A compound type holding only the member reached by `path`, nested as in `self`. Used to move the
    /// bytes of a single member of a record.
    pub fn project(&self, path: &[String]) -> anyhow::Result<Datatype> {
        let Some((first, rest)) = path.split_first() else {
            return Ok(self.clone());
        };

        let c = self
            .compound()
            .ok_or_else(|| anyhow!("cannot select member {first} of a non-compound type"))?;
        let field = c
            .field(first)
            .ok_or_else(|| anyhow!("no member named {first}"))?;

        let inner = field.ty.project(rest)?;
        Ok(Datatype::Compound(CompoundType::packed([(
            first.clone(),
            inner,
        )])))
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Datatype::*;

        match self {
            UInt(sz) => write!(f, "uint{}", sz * 8),
            Int(sz) => write!(f, "int{}", sz * 8),
            Float(sz) => write!(f, "float{}", sz * 8),
            Compound(c) => {
                write!(f, "compound {{")?;
                for (i, m) in c.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", m.name, m.ty)?;
                }
                write!(f, "}}")
            }
            Array(base, dims) => write!(f, "{base}{dims:?}"),
            VarLenStr => write!(f, "string"),
            FixedStr(sz) => write!(f, "string[{sz}]"),
            Custom(sz) => write!(f, "opaque[{sz}]"),
        }
    }
}

impl Datatype {
    /// The HDF5 description of this type. Compound members keep their offsets.
    pub fn to_descriptor(&self) -> anyhow::Result<TypeDescriptor> {
        use hdf5::types::{CompoundField as H5Field, CompoundType as H5Compound};
        use Datatype::*;

        let int = |sz: usize| IntSize::from_int(sz).ok_or_else(|| anyhow!("no integer of {sz} bytes"));

        Ok(match self {
            UInt(sz) => TypeDescriptor::Unsigned(int(*sz)?),
            Int(sz) => TypeDescriptor::Integer(int(*sz)?),
            Float(sz) => TypeDescriptor::Float(
                FloatSize::from_int(*sz).ok_or_else(|| anyhow!("no float of {sz} bytes"))?,
            ),
            Compound(c) => TypeDescriptor::Compound(H5Compound {
                fields: c
                    .fields
                    .iter()
                    .enumerate()
                    .map(|(i, f)| Ok(H5Field::new(&f.name, f.ty.to_descriptor()?, f.offset, i)))
                    .collect::<anyhow::Result<_>>()?,
                size: c.size,
            }),
            Array(base, dims) => TypeDescriptor::FixedArray(
                Box::new(base.to_descriptor()?),
                dims.iter().product::<u64>() as usize,
            ),
            VarLenStr => TypeDescriptor::VarLenUnicode,
            FixedStr(sz) => TypeDescriptor::FixedAscii(*sz),
            Custom(sz) => bail!("an opaque type of {sz} bytes cannot be described"),
        })
    }

    /// The HDF5 datatype of this type, used both for creating objects and as memory type.
    pub fn to_hdf5(&self) -> anyhow::Result<hdf5::Datatype> {
        Ok(hdf5::Datatype::from_descriptor(&self.to_descriptor()?)?)
    }
}

impl From<&TypeDescriptor> for Datatype {
    fn from(td: &TypeDescriptor) -> Datatype {
        match td {
            TypeDescriptor::Unsigned(_) => Datatype::UInt(td.size()),
            TypeDescriptor::Integer(_) => Datatype::Int(td.size()),
            TypeDescriptor::Float(_) => Datatype::Float(td.size()),
            TypeDescriptor::Compound(c) => Datatype::Compound(CompoundType {
                fields: c
                    .fields
                    .iter()
                    .map(|f| CompoundField {
                        name: f.name.clone(),
                        offset: f.offset,
                        ty: Datatype::from(&f.ty),
                    })
                    .collect(),
                size: c.size,
            }),
            TypeDescriptor::FixedArray(base, n) => {
                Datatype::Array(Box::new(Datatype::from(base.as_ref())), vec![*n as u64])
            }
            TypeDescriptor::VarLenAscii | TypeDescriptor::VarLenUnicode => Datatype::VarLenStr,
            TypeDescriptor::FixedAscii(sz) | TypeDescriptor::FixedUnicode(sz) => Datatype::FixedStr(*sz),
            _ => Datatype::Custom(td.size()),
        }
    }
}

impl From<&hdf5::Datatype> for Datatype {
    fn from(dtype: &hdf5::Datatype) -> Self {
        match dtype.to_descriptor() {
            Ok(td) => Datatype::from(&td),
            Err(_) => Datatype::Custom(dtype.size()),
        }
    }
}

/// A member of a compound type.
#[derive(Debug, Clone, PartialEq)]
pub struct CompoundField {
    pub name: String,
    pub offset: usize,
    pub ty: Datatype,
}

/// Ordered members with byte offsets.
#[derive(Debug, Clone, PartialEq)]
pub struct CompoundType {
    pub fields: Vec<CompoundField>,
    pub size: usize,
}

impl CompoundType {
    /// Lay out members back to back in the given order.
    pub fn packed<S: Into<String>>(fields: impl IntoIterator<Item = (S, Datatype)>) -> CompoundType {
        let mut offset = 0;
        let fields = fields
            .into_iter()
            .map(|(name, ty)| {
                let f = CompoundField {
                    name: name.into(),
                    offset,
                    ty,
                };
                offset += f.ty.dsize();
                f
            })
            .collect();

        CompoundType {
            fields,
            size: offset,
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn field(&self, name: &str) -> Option<&CompoundField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cast_values() {
        assert_eq!(Value::F64(3.7).cast(PrimitiveKind::I32), Some(Value::I32(3)));
        assert_eq!(Value::U8(200).cast(PrimitiveKind::I8), Some(Value::I8(-56)));
        assert_eq!(Value::I16(-2).cast(PrimitiveKind::F32), Some(Value::F32(-2.)));
        assert_eq!(Value::from("a").cast(PrimitiveKind::U8), None);
    }

    #[test]
    fn encode_decode_slice() {
        let v = vec![1.5f64, -2., 1e10];
        let b = f64::encode_slice(&v);
        assert_eq!(b.len(), 24);
        assert_eq!(f64::decode(&b[8..]), -2.);
        assert_eq!(f64::decode_slice(&b), v);

        let v = vec![1u16, 0x0102];
        assert_eq!(u16::encode_slice(&v), vec![1, 0, 2, 1]);
    }

    #[test]
    fn packed_compound() {
        let c = CompoundType::packed([
            ("a", Datatype::Float(8)),
            ("b", Datatype::Array(Box::new(Datatype::Int(2)), vec![3])),
            ("c", Datatype::UInt(1)),
        ]);

        assert_eq!(c.size(), 15);
        assert_eq!(c.field("b").unwrap().offset, 8);
        assert_eq!(c.field("c").unwrap().offset, 14);
    }

    #[test]
    fn project_member() {
        let inner = CompoundType::packed([("x", Datatype::Float(4)), ("y", Datatype::Float(4))]);
        let outer = Datatype::Compound(CompoundType::packed([
            ("id", Datatype::UInt(4)),
            ("pos", Datatype::Compound(inner)),
        ]));

        let p = outer.project(&["pos".into(), "y".into()]).unwrap();
        assert_eq!(p.dsize(), 4);
        let pos = p.compound().unwrap().field("pos").unwrap();
        assert_eq!(pos.ty.compound().unwrap().fields[0].name, "y");

        assert!(outer.project(&["nope".into()]).is_err());
    }

    #[test]
    fn descriptors() {
        let inner = CompoundType::packed([("x", Datatype::Int(2)), ("y", Datatype::Float(8))]);
        let t = Datatype::Compound(CompoundType::packed([
            ("id", Datatype::UInt(4)),
            ("inner", Datatype::Compound(inner.clone())),
            ("many", Datatype::Array(Box::new(Datatype::Compound(inner)), vec![3])),
        ]));

        let td = t.to_descriptor().unwrap();
        assert_eq!(Datatype::from(&td), t);

        let h = t.to_hdf5().unwrap();
        assert_eq!(Datatype::from(&h), t);

        assert!(Datatype::UInt(3).to_descriptor().is_err());
        assert!(Datatype::Custom(2).to_descriptor().is_err());
        assert_eq!(
            Datatype::from(&TypeDescriptor::Boolean),
            Datatype::Custom(1)
        );
    }

    #[test]
    fn primitive_lookup() {
        assert_eq!(Datatype::Int(2).primitive(), Some(PrimitiveKind::I16));
        assert_eq!(Datatype::Float(2).primitive(), None);
        assert_eq!(PrimitiveKind::U64.datatype(), Datatype::UInt(8));
    }
}
