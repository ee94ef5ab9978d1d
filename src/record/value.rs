use std::cell::RefCell;
use std::fmt::Write;
use std::rc::{Rc, Weak};

use super::array::{ArraySignal, PrimitiveArray, RecordArray};
use super::compound::Compound;
use super::{MemberType, RecordType};
use crate::error::Error;
use crate::filters::byteorder::{self, Order};
use crate::selection::IoFacility;
use crate::tree::TreeNode;
use crate::types::{Datatype, Primitive, PrimitiveKind, Value};

/// Where the bytes of a record or member live.
#[derive(Debug, Clone, Default)]
pub(crate) enum Binding {
    /// Plain value, nothing is read or written.
    #[default]
    Unbound,

    /// Inside the selected element of a dataset.
    Dataset(Weak<RefCell<IoFacility>>),

    /// Inside an element of an array of records: writes raise the pending signal of the outermost
    /// array, which writes the whole array.
    Element(Rc<ArraySignal>),
}

/// Binding plus the member path from the dataset element down to this node.
#[derive(Debug, Clone, Default)]
pub(crate) struct Link {
    pub binding: Binding,
    pub path: Vec<String>,
}

impl Link {
    pub fn dataset(io: Weak<RefCell<IoFacility>>) -> Link {
        Link {
            binding: Binding::Dataset(io),
            path: Vec::new(),
        }
    }

    pub fn element(signal: Rc<ArraySignal>) -> Link {
        Link {
            binding: Binding::Element(signal),
            path: Vec::new(),
        }
    }

    pub fn child(&self, name: &str) -> Link {
        let mut path = self.path.clone();
        path.push(name.to_string());
        Link {
            binding: self.binding.clone(),
            path,
        }
    }

    /// The dataset IO, if bound to a dataset that is open.
    pub fn io(&self) -> Option<Rc<RefCell<IoFacility>>> {
        match &self.binding {
            Binding::Dataset(w) => w.upgrade().filter(|io| io.borrow().is_bound()),
            _ => None,
        }
    }

    pub fn is_dataset(&self) -> bool {
        matches!(self.binding, Binding::Dataset(_))
    }

    /// Read the bytes of the node at this path within the selected element.
    pub fn read(&self, buf: &mut [u8]) -> anyhow::Result<bool> {
        let Some(io) = self.io() else {
            return Ok(false);
        };
        let io = io.borrow();
        let mem = io.mem_type().project(&self.path)?;
        io.read_as(&mem, buf)?;
        Ok(true)
    }

    /// Write the bytes of the node at this path, or raise the array signal.
    pub fn write(&self, buf: &[u8]) -> anyhow::Result<()> {
        match &self.binding {
            Binding::Dataset(_) => match self.io() {
                Some(io) => {
                    let io = io.borrow();
                    let mem = io.mem_type().project(&self.path)?;
                    io.write_as(&mem, buf)
                }
                None => Ok(()),
            },
            Binding::Element(signal) => {
                signal.raise();
                Ok(())
            }
            Binding::Unbound => Ok(()),
        }
    }

    /// Identifies the stored bytes a cached copy of this node was read from.
    pub fn stamp(&self) -> Option<Stamp> {
        self.io().map(|io| {
            let io = io.borrow();
            Stamp {
                indices: io.selection().indices().to_vec(),
                generation: io.generation(),
            }
        })
    }
}

/// Selected element and write generation of a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Stamp {
    indices: Vec<u64>,
    generation: u64,
}

/// The value held by a record member.
#[derive(Debug, Clone)]
pub enum Slot {
    Primitive(Value),
    Record(Record),
    PrimitiveArray(PrimitiveArray),
    RecordArray(RecordArray),
}

/// A named member of a [`Record`].
#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    slot: Slot,
    link: Link,
}

impl Field {
    fn new(name: &str, ty: &MemberType) -> anyhow::Result<Field> {
        let slot = match ty {
            MemberType::Primitive(k) => Slot::Primitive(Value::zero(*k)),
            MemberType::Record(r) => Slot::Record(Record::new(r)?),
            MemberType::Array { element, count } => match element.as_ref() {
                MemberType::Record(r) => Slot::RecordArray(RecordArray::new(r, *count)?),
                MemberType::Primitive(k) => Slot::PrimitiveArray(PrimitiveArray::new(*k, *count)),
                MemberType::Array { .. } => {
                    bail!("member {name}: arrays of arrays are not supported")
                }
            },
        };

        Ok(Field {
            name: name.to_string(),
            slot,
            link: Link::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slot(&self) -> &Slot {
        &self.slot
    }

    pub fn size(&self) -> usize {
        match &self.slot {
            Slot::Primitive(v) => v.kind().size(),
            Slot::Record(r) => r.total_size(),
            Slot::PrimitiveArray(a) => a.total_size(),
            Slot::RecordArray(a) => a.total_size(),
        }
    }

    fn bind(&mut self, link: Link) {
        match &mut self.slot {
            Slot::Primitive(_) => {}
            Slot::Record(r) => r.bind(link.clone()),
            Slot::PrimitiveArray(a) => a.bind(link.clone()),
            Slot::RecordArray(a) => a.bind(link.clone()),
        }
        self.link = link;
    }

    /// Primitive value, read from the bound dataset if any.
    pub fn get(&mut self) -> anyhow::Result<Value> {
        let Slot::Primitive(v) = &mut self.slot else {
            bail!("member {} is not a primitive", self.name);
        };

        let k = v.kind();
        let mut b = vec![0u8; k.size()];
        if self.link.read(&mut b)? {
            *v = Value::decode(k, &b);
        }

        Ok(v.clone())
    }

    /// Set a primitive value and write it through the binding.
    pub fn set(&mut self, value: Value) -> anyhow::Result<()> {
        let Slot::Primitive(v) = &mut self.slot else {
            bail!("member {} is not a primitive", self.name);
        };

        let k = v.kind();
        *v = value.cast(k).ok_or_else(|| Error::KindMismatch {
            expected: k.to_string(),
            got: value.kind().to_string(),
        })?;

        let mut b = vec![0u8; k.size()];
        v.encode(&mut b);
        self.link.write(&b)
    }

    fn serialize(&self, out: &mut Vec<u8>) {
        match &self.slot {
            Slot::Primitive(v) => {
                let n = out.len();
                out.resize(n + v.kind().size(), 0);
                v.encode(&mut out[n..]);
            }
            Slot::Record(r) => r.serialize(out),
            Slot::PrimitiveArray(a) => a.serialize(out),
            Slot::RecordArray(a) => a.serialize(out),
        }
    }

    fn deserialize(&mut self, cur: &mut &[u8]) -> anyhow::Result<()> {
        match &mut self.slot {
            Slot::Primitive(v) => {
                let n = v.kind().size();
                ensure!(cur.len() >= n, "buffer too short for member {}", self.name);
                *v = Value::decode(v.kind(), cur);
                *cur = &cur[n..];
                Ok(())
            }
            Slot::Record(r) => r.deserialize(cur),
            Slot::PrimitiveArray(a) => a.deserialize(cur),
            Slot::RecordArray(a) => a.deserialize(cur),
        }
    }
}

impl TreeNode for Field {
    fn is_leaf(&self) -> Option<PrimitiveKind> {
        match &self.slot {
            Slot::Primitive(v) => Some(v.kind()),
            _ => None,
        }
    }

    fn read_leaf_value(&mut self) -> anyhow::Result<Option<Value>> {
        if matches!(self.slot, Slot::Primitive(_)) {
            self.get().map(Some)
        } else {
            Ok(None)
        }
    }

    fn can_index(&self) -> bool {
        matches!(self.slot, Slot::PrimitiveArray(_) | Slot::RecordArray(_))
    }

    fn index(&mut self, i: usize) -> anyhow::Result<&mut dyn TreeNode> {
        match &mut self.slot {
            Slot::PrimitiveArray(a) => a.index(i),
            Slot::RecordArray(a) => a.index(i),
            _ => bail!("member {} cannot be indexed", self.name),
        }
    }

    fn indexable_size(&self) -> usize {
        match &self.slot {
            Slot::PrimitiveArray(a) => a.len(),
            Slot::RecordArray(a) => a.len(),
            _ => 0,
        }
    }

    fn element_kind(&self) -> Option<PrimitiveKind> {
        match &self.slot {
            Slot::PrimitiveArray(a) => Some(a.kind()),
            _ => None,
        }
    }

    fn bytes_below(&self) -> usize {
        self.size()
    }

    fn read_all_below(&mut self, out: &mut Vec<u8>) -> anyhow::Result<bool> {
        if matches!(self.slot, Slot::Primitive(_)) {
            self.get()?;
        }
        match &mut self.slot {
            Slot::Primitive(_) => {}
            Slot::Record(r) => r.read_all()?,
            Slot::PrimitiveArray(a) => a.read_all()?,
            Slot::RecordArray(a) => a.read_all()?,
        }
        self.serialize(out);
        Ok(true)
    }

    fn memory_value(&self) -> Option<Value> {
        match &self.slot {
            Slot::Primitive(v) => Some(v.clone()),
            _ => None,
        }
    }

    fn children_names(&self) -> Vec<String> {
        match &self.slot {
            Slot::Record(r) => r.names(),
            _ => Vec::new(),
        }
    }

    fn child_by_name(&mut self, name: &str) -> Option<&mut dyn TreeNode> {
        match &mut self.slot {
            Slot::Record(r) => r.child_by_name(name),
            _ => None,
        }
    }
}

/// Values of one record, laid out by a [`RecordType`].
#[derive(Debug, Clone)]
pub struct Record {
    ty: RecordType,
    fields: Vec<Field>,
    link: Link,
}

impl Record {
    /// A record with every member zeroed. Fails for a type that does not validate.
    pub fn new(ty: &RecordType) -> anyhow::Result<Record> {
        ty.validate()?;

        Ok(Record {
            ty: ty.clone(),
            fields: ty
                .members()
                .iter()
                .map(|(n, t)| Field::new(n, t))
                .collect::<anyhow::Result<_>>()?,
            link: Link::default(),
        })
    }

    /// Record holding the values of a statically declared compound.
    pub fn from_compound<C: Compound>(c: &C) -> anyhow::Result<Record> {
        let mut r = Record::new(&C::record_type())?;
        let mut b = Vec::with_capacity(r.total_size());
        c.encode(&mut b);
        r.from_bytes(&b)?;
        Ok(r)
    }

    /// The values as a statically declared compound.
    pub fn to_compound<C: Compound>(&self) -> anyhow::Result<C> {
        let b = self.to_bytes();
        let mut cur = b.as_slice();
        C::decode(&mut cur)
    }

    pub fn record_type(&self) -> &RecordType {
        &self.ty
    }

    pub fn datatype(&self) -> Datatype {
        self.ty.datatype()
    }

    #[must_use]
    pub fn total_size(&self) -> usize {
        self.ty.total_size()
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_mut(&mut self, name: &str) -> anyhow::Result<&mut Field> {
        self.fields
            .iter_mut()
            .find(|f| f.name == name)
            .ok_or_else(|| Error::NotFound(format!("record member {name}")).into())
    }

    /// A copy that is not bound to any storage.
    pub fn detached(&self) -> Record {
        let mut r = self.clone();
        r.bind(Link::default());
        r
    }

    pub(crate) fn bind(&mut self, link: Link) {
        for f in &mut self.fields {
            f.bind(link.child(&f.name));
        }
        self.link = link;
    }

    /// Append the members in order to `out`.
    pub fn serialize(&self, out: &mut Vec<u8>) {
        for f in &self.fields {
            f.serialize(out);
        }
    }

    /// Take the members in order from the front of `cur`, advancing it.
    pub fn deserialize(&mut self, cur: &mut &[u8]) -> anyhow::Result<()> {
        for f in &mut self.fields {
            f.deserialize(cur)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut b = Vec::with_capacity(self.total_size());
        self.serialize(&mut b);
        b
    }

    pub fn from_bytes(&mut self, b: &[u8]) -> anyhow::Result<()> {
        ensure!(
            b.len() == self.total_size(),
            "buffer of {} bytes for record of {} bytes",
            b.len(),
            self.total_size()
        );
        let mut cur = b;
        self.deserialize(&mut cur)
    }

    /// Like [`from_bytes`](Record::from_bytes) for a buffer in byte order `order`.
    pub fn deserialize_swapped(&mut self, b: &[u8], order: Order) -> anyhow::Result<()> {
        if order == Order::LE {
            return self.from_bytes(b);
        }

        let mut b = b.to_vec();
        byteorder::swap_leaves(&self.datatype(), &mut b);
        self.from_bytes(&b)
    }

    /// Read the whole record from its binding.
    pub fn read_all(&mut self) -> anyhow::Result<()> {
        if !self.link.is_dataset() {
            return Ok(());
        }

        let mut b = vec![0u8; self.total_size()];
        if self.link.read(&mut b)? {
            self.from_bytes(&b)?;
        }
        Ok(())
    }

    /// Write the whole record through its binding.
    pub fn write_all(&mut self) -> anyhow::Result<()> {
        let b = self.to_bytes();
        self.link.write(&b)
    }

    /// Primitive member value.
    pub fn get(&mut self, name: &str) -> anyhow::Result<Value> {
        self.field_mut(name)?.get()
    }

    pub fn get_as<T: Primitive>(&mut self, name: &str) -> anyhow::Result<T> {
        let v = self.get(name)?;
        T::from_value(&v).ok_or_else(|| {
            Error::KindMismatch {
                expected: T::KIND.to_string(),
                got: v.kind().to_string(),
            }
            .into()
        })
    }

    pub fn set<T: Primitive>(&mut self, name: &str, value: T) -> anyhow::Result<()> {
        self.field_mut(name)?.set(value.into_value())
    }

    pub fn set_value(&mut self, name: &str, value: Value) -> anyhow::Result<()> {
        self.field_mut(name)?.set(value)
    }

    /// Value held in memory, without reading.
    pub fn value(&self, name: &str) -> Option<Value> {
        match &self.field(name)?.slot {
            Slot::Primitive(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Text form of a member's value. Arrays are rendered as a bracketed list.
    pub fn value_string(&mut self, name: &str) -> anyhow::Result<String> {
        let f = self.field_mut(name)?;
        let mut s = String::new();

        if matches!(f.slot, Slot::Primitive(_)) {
            write!(s, "{}", f.get()?)?;
            return Ok(s);
        }

        match &mut f.slot {
            Slot::Primitive(_) => {}
            Slot::PrimitiveArray(a) => {
                let vals = a.values()?;
                write!(s, "[{}]", itertools::join(vals.iter(), ", "))?;
            }
            Slot::Record(r) => {
                write!(s, "{{")?;
                for (i, n) in r.names().iter().enumerate() {
                    if i > 0 {
                        write!(s, ", ")?;
                    }
                    write!(s, "{}: {}", n, r.value_string(n)?)?;
                }
                write!(s, "}}")?;
            }
            Slot::RecordArray(a) => {
                write!(s, "[{} records]", a.len())?;
            }
        }

        Ok(s)
    }

    pub fn record(&mut self, name: &str) -> anyhow::Result<&mut Record> {
        match &mut self.field_mut(name)?.slot {
            Slot::Record(r) => Ok(r),
            _ => bail!("member {name} is not a record"),
        }
    }

    pub fn array(&mut self, name: &str) -> anyhow::Result<&mut PrimitiveArray> {
        match &mut self.field_mut(name)?.slot {
            Slot::PrimitiveArray(a) => Ok(a),
            _ => bail!("member {name} is not an array of primitives"),
        }
    }

    pub fn records(&mut self, name: &str) -> anyhow::Result<&mut RecordArray> {
        match &mut self.field_mut(name)?.slot {
            Slot::RecordArray(a) => Ok(a),
            _ => bail!("member {name} is not an array of records"),
        }
    }

    /// Set a `u8` array member from text, truncated or zero padded to its length.
    pub fn set_text(&mut self, name: &str, text: &str) -> anyhow::Result<()> {
        self.array(name)?.set_text(text)
    }

    /// Text of a `u8` array member up to the first NUL.
    pub fn text(&mut self, name: &str) -> anyhow::Result<String> {
        self.array(name)?.text()
    }

    /// Write back pending array-of-record changes below this record.
    pub(crate) fn commit_pending(&mut self) -> anyhow::Result<()> {
        for f in &mut self.fields {
            match &mut f.slot {
                Slot::Record(r) => r.commit_pending()?,
                Slot::RecordArray(a) => a.commit()?,
                _ => {}
            }
        }
        Ok(())
    }
}

impl TreeNode for Record {
    fn is_leaf(&self) -> Option<PrimitiveKind> {
        None
    }

    fn bytes_below(&self) -> usize {
        self.total_size()
    }

    fn read_all_below(&mut self, out: &mut Vec<u8>) -> anyhow::Result<bool> {
        self.read_all()?;
        self.serialize(out);
        Ok(true)
    }

    fn children_names(&self) -> Vec<String> {
        self.names()
    }

    fn child_by_name(&mut self, name: &str) -> Option<&mut dyn TreeNode> {
        self.fields
            .iter_mut()
            .find(|f| f.name == name)
            .map(|f| f as &mut dyn TreeNode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::inner;
    use crate::record::MemberType;
    use PrimitiveKind::*;

    fn outer() -> RecordType {
        RecordType::new()
            .with("id", MemberType::Primitive(U32))
            .unwrap()
            .with("inner", MemberType::Record(inner()))
            .unwrap()
            .with("name", MemberType::array(MemberType::Primitive(U8), 6))
            .unwrap()
            .with("recs", MemberType::array(MemberType::Record(inner()), 2))
            .unwrap()
    }

    #[test]
    fn serialize_roundtrip() {
        let mut r = Record::new(&outer()).unwrap();
        r.set("id", 7u32).unwrap();
        r.record("inner").unwrap().set("b", 2.5f64).unwrap();
        r.set_text("name", "abc").unwrap();
        {
            let recs = r.records("recs").unwrap();
            let mut e = recs.element_mut(1).unwrap();
            e.set("a", -3i16).unwrap();
        }

        let b = r.to_bytes();
        assert_eq!(b.len(), r.total_size());
        assert_eq!(&b[0..4], &7u32.to_le_bytes());

        let mut s = Record::new(&outer()).unwrap();
        s.from_bytes(&b).unwrap();
        assert_eq!(s.to_bytes(), b);
        assert_eq!(s.get("id").unwrap(), Value::U32(7));
        assert_eq!(s.text("name").unwrap(), "abc");
        assert_eq!(
            s.records("recs").unwrap().element(1).unwrap().value("a"),
            Some(Value::I16(-3))
        );

        assert!(s.from_bytes(&b[1..]).is_err());
    }

    #[test]
    fn swapped() {
        let mut r = Record::new(&inner()).unwrap();
        let mut b = Vec::new();
        b.extend_from_slice(&(-2i16).to_be_bytes());
        b.extend_from_slice(&1.25f64.to_be_bytes());

        r.deserialize_swapped(&b, Order::BE).unwrap();
        assert_eq!(r.value("a"), Some(Value::I16(-2)));
        assert_eq!(r.value("b"), Some(Value::F64(1.25)));
    }

    #[test]
    fn set_casts_and_rejects_text() {
        let mut r = Record::new(&inner()).unwrap();
        r.set_value("a", Value::F64(3.9)).unwrap();
        assert_eq!(r.value("a"), Some(Value::I16(3)));

        let e = r.set_value("a", Value::from("x")).unwrap_err();
        assert!(matches!(e.downcast_ref::<Error>(), Some(Error::KindMismatch { .. })));
        assert!(r.set("nope", 1u8).is_err());
    }

    #[test]
    fn value_strings() {
        let mut r = Record::new(&outer()).unwrap();
        r.set("id", 3u32).unwrap();
        r.array("name").unwrap().set(0, Value::U8(1)).unwrap();
        assert_eq!(r.value_string("id").unwrap(), "3");
        assert_eq!(r.value_string("name").unwrap(), "[1, 0, 0, 0, 0, 0]");
        assert_eq!(r.value_string("inner").unwrap(), "{a: 0, b: 0}");
        assert_eq!(r.value_string("recs").unwrap(), "[2 records]");
    }

    #[test]
    fn node_protocol() {
        let mut r = Record::new(&outer()).unwrap();
        assert_eq!(r.children_names(), vec!["id", "inner", "name", "recs"]);
        assert_eq!(r.bytes_below(), r.total_size());

        let n = r.child_by_name("name").unwrap();
        assert!(n.can_index());
        assert_eq!(n.indexable_size(), 6);
        assert_eq!(n.element_kind(), Some(U8));
        assert_eq!(n.index(2).unwrap().is_leaf(), Some(U8));

        let n = r.child_by_name("inner").unwrap();
        assert_eq!(n.children_names(), vec!["a", "b"]);
        assert_eq!(n.child_by_name("b").unwrap().is_leaf(), Some(F64));

        let n = r.child_by_name("recs").unwrap();
        assert_eq!(n.indexable_size(), 2);
        assert_eq!(n.index(1).unwrap().children_names(), vec!["a", "b"]);

        let mut out = Vec::new();
        assert!(r.read_all_below(&mut out).unwrap());
        assert_eq!(out.len(), r.total_size());
    }
}
