use std::cell::Cell;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use super::value::{Binding, Link, Record, Stamp};
use super::RecordType;
use crate::error::Error;
use crate::tree::TreeNode;
use crate::types::{Primitive, PrimitiveKind, Value};

/// Raised by writes inside elements of an array of records.
#[derive(Debug, Default)]
pub(crate) struct ArraySignal {
    pending: Cell<bool>,
}

impl ArraySignal {
    pub fn raise(&self) {
        self.pending.set(true);
    }

    pub fn is_raised(&self) -> bool {
        self.pending.get()
    }

    fn clear(&self) {
        self.pending.set(false);
    }
}

fn check_index(i: usize, len: usize) -> anyhow::Result<()> {
    if i < len {
        Ok(())
    } else {
        Err(Error::IndexOutOfBounds {
            axis: 0,
            index: i as u64,
            extent: len as u64,
        }
        .into())
    }
}

/// Fixed-size array of primitives inside a record.
///
/// The array is moved as a whole: setting one element writes all of them.
#[derive(Debug, Clone)]
pub struct PrimitiveArray {
    kind: PrimitiveKind,
    values: Vec<Value>,
    link: Link,
    loaded: Option<Stamp>,
}

impl PrimitiveArray {
    pub fn new(kind: PrimitiveKind, count: usize) -> PrimitiveArray {
        PrimitiveArray {
            kind,
            values: vec![Value::zero(kind); count],
            link: Link::default(),
            loaded: None,
        }
    }

    pub fn kind(&self) -> PrimitiveKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn total_size(&self) -> usize {
        self.kind.size() * self.len()
    }

    pub(crate) fn bind(&mut self, link: Link) {
        self.link = link;
        self.loaded = None;
    }

    /// Re-read when the dataset selection moved or the dataset was written since the last read.
    fn sync(&mut self) -> anyhow::Result<()> {
        if let Some(stamp) = self.link.stamp() {
            if self.loaded.as_ref() != Some(&stamp) {
                self.read_all()?;
            }
        }
        Ok(())
    }

    pub fn read_all(&mut self) -> anyhow::Result<()> {
        let mut b = vec![0u8; self.total_size()];
        if self.link.read(&mut b)? {
            let mut cur = b.as_slice();
            self.deserialize(&mut cur)?;
            self.loaded = self.link.stamp();
        }
        Ok(())
    }

    pub fn write_all(&mut self) -> anyhow::Result<()> {
        let mut b = Vec::with_capacity(self.total_size());
        self.serialize(&mut b);
        self.link.write(&b)?;
        self.loaded = self.link.stamp();
        Ok(())
    }

    pub fn get(&mut self, i: usize) -> anyhow::Result<Value> {
        self.sync()?;
        check_index(i, self.len())?;
        Ok(self.values[i].clone())
    }

    pub fn set(&mut self, i: usize, value: Value) -> anyhow::Result<()> {
        self.sync()?;
        check_index(i, self.len())?;

        self.values[i] = value.cast(self.kind).ok_or_else(|| Error::KindMismatch {
            expected: self.kind.to_string(),
            got: value.kind().to_string(),
        })?;
        self.write_all()
    }

    pub fn values(&mut self) -> anyhow::Result<Vec<Value>> {
        self.sync()?;
        Ok(self.values.clone())
    }

    pub fn to_vec<T: Primitive>(&mut self) -> anyhow::Result<Vec<T>> {
        self.sync()?;
        Ok(self
            .values
            .iter()
            .map(|v| T::from_value(v).unwrap_or_default())
            .collect())
    }

    /// Replace every element.
    pub fn set_all<T: Primitive>(&mut self, values: &[T]) -> anyhow::Result<()> {
        if values.len() != self.len() {
            return Err(Error::ElementCountMismatch {
                expected: self.len(),
                got: values.len(),
            }
            .into());
        }

        for (slot, v) in self.values.iter_mut().zip(values) {
            *slot = v.into_value().cast(self.kind).unwrap_or(Value::zero(self.kind));
        }
        self.write_all()
    }

    /// Store `text` as bytes, truncated or zero padded to the array length.
    pub fn set_text(&mut self, text: &str) -> anyhow::Result<()> {
        ensure!(
            matches!(self.kind, PrimitiveKind::U8 | PrimitiveKind::I8),
            "text needs an array of 8 bit integers, not {}",
            self.kind
        );

        let mut b = text.as_bytes().to_vec();
        b.resize(self.len(), 0);
        for (slot, c) in self.values.iter_mut().zip(b) {
            *slot = Value::U8(c).cast(self.kind).unwrap_or(Value::zero(self.kind));
        }
        self.write_all()
    }

    /// Bytes up to the first NUL as text.
    pub fn text(&mut self) -> anyhow::Result<String> {
        let b: Vec<u8> = self.to_vec::<u8>()?;
        let end = b.iter().position(|c| *c == 0).unwrap_or(b.len());
        Ok(String::from_utf8_lossy(&b[..end]).into_owned())
    }

    pub(crate) fn serialize(&self, out: &mut Vec<u8>) {
        let sz = self.kind.size();
        let n = out.len();
        out.resize(n + self.total_size(), 0);
        for (v, o) in self.values.iter().zip(out[n..].chunks_exact_mut(sz)) {
            v.encode(o);
        }
    }

    pub(crate) fn deserialize(&mut self, cur: &mut &[u8]) -> anyhow::Result<()> {
        let n = self.total_size();
        ensure!(cur.len() >= n, "buffer too short for array of {} bytes", n);

        let sz = self.kind.size();
        for (v, b) in self.values.iter_mut().zip(cur[..n].chunks_exact(sz)) {
            *v = Value::decode(self.kind, b);
        }
        *cur = &cur[n..];
        Ok(())
    }

    pub(crate) fn index(&mut self, i: usize) -> anyhow::Result<&mut dyn TreeNode> {
        self.sync()?;
        check_index(i, self.len())?;
        Ok(&mut self.values[i])
    }
}

/// Fixed-size array of records inside a record.
///
/// Only the outermost array bound to a dataset moves bytes, and always the whole array. Writes to
/// members of its elements (at any depth) raise its pending signal, and the array is written back when
/// the [`ElementMut`] guard is dropped or committed.
#[derive(Debug, Clone)]
pub struct RecordArray {
    ty: RecordType,
    elements: Vec<Record>,
    signal: Rc<ArraySignal>,
    link: Link,
    loaded: Option<Stamp>,
}

impl RecordArray {
    pub fn new(ty: &RecordType, count: usize) -> anyhow::Result<RecordArray> {
        Ok(RecordArray {
            ty: ty.clone(),
            elements: (0..count)
                .map(|_| Record::new(ty))
                .collect::<anyhow::Result<_>>()?,
            signal: Rc::new(ArraySignal::default()),
            link: Link::default(),
            loaded: None,
        })
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn element_type(&self) -> &RecordType {
        &self.ty
    }

    pub fn total_size(&self) -> usize {
        self.ty.total_size() * self.len()
    }

    /// Is this the array that owns the IO for its elements.
    fn is_owner(&self) -> bool {
        self.link.is_dataset()
    }

    /// Whether element writes are waiting to be written back.
    pub fn is_pending(&self) -> bool {
        self.is_owner() && self.signal.is_raised()
    }

    pub(crate) fn bind(&mut self, link: Link) {
        let element = match &link.binding {
            Binding::Dataset(_) => {
                self.signal = Rc::new(ArraySignal::default());
                Link::element(Rc::clone(&self.signal))
            }
            Binding::Element(outer) => Link::element(Rc::clone(outer)),
            Binding::Unbound => Link::default(),
        };

        for e in &mut self.elements {
            e.bind(element.clone());
        }
        self.link = link;
        self.loaded = None;
    }

    fn sync(&mut self) -> anyhow::Result<()> {
        if !self.is_owner() {
            return Ok(());
        }

        self.commit()?;
        if let Some(stamp) = self.link.stamp() {
            if self.loaded.as_ref() != Some(&stamp) {
                self.read_all()?;
            }
        }
        Ok(())
    }

    /// Read every element from the bound dataset.
    pub fn read_all(&mut self) -> anyhow::Result<()> {
        if !self.is_owner() {
            return Ok(());
        }
        self.commit()?;

        let mut b = vec![0u8; self.total_size()];
        if self.link.read(&mut b)? {
            let mut cur = b.as_slice();
            self.deserialize(&mut cur)?;
            self.loaded = self.link.stamp();
        }
        Ok(())
    }

    /// Write every element. Nested arrays pass the write on to the outermost array.
    pub fn write_all(&mut self) -> anyhow::Result<()> {
        if self.is_owner() && self.loaded != self.link.stamp() {
            let pending = self.signal.is_raised();
            self.signal.clear();
            if !pending {
                self.read_all()?;
            }
        }

        let mut b = Vec::with_capacity(self.total_size());
        self.serialize(&mut b);
        self.link.write(&b)?;

        if self.is_owner() {
            self.signal.clear();
            self.loaded = self.link.stamp();
        }
        Ok(())
    }

    /// Write back pending element changes.
    pub fn commit(&mut self) -> anyhow::Result<()> {
        if self.is_pending() {
            log::trace!("writing back array of {} records", self.len());
            self.signal.clear();
            let mut b = Vec::with_capacity(self.total_size());
            self.serialize(&mut b);
            self.link.write(&b)?;
            self.loaded = self.link.stamp();
        }

        for e in &mut self.elements {
            e.commit_pending()?;
        }
        Ok(())
    }

    pub fn element(&mut self, i: usize) -> anyhow::Result<&Record> {
        self.sync()?;
        check_index(i, self.len())?;
        Ok(&self.elements[i])
    }

    /// Mutable access to element `i`, written back when the guard goes away.
    pub fn element_mut(&mut self, i: usize) -> anyhow::Result<ElementMut<'_>> {
        self.sync()?;
        check_index(i, self.len())?;
        Ok(ElementMut {
            array: self,
            index: i,
        })
    }

    /// Detached copies of all elements.
    pub fn elements(&mut self) -> anyhow::Result<Vec<Record>> {
        self.sync()?;
        Ok(self.elements.iter().map(Record::detached).collect())
    }

    pub(crate) fn serialize(&self, out: &mut Vec<u8>) {
        for e in &self.elements {
            e.serialize(out);
        }
    }

    pub(crate) fn deserialize(&mut self, cur: &mut &[u8]) -> anyhow::Result<()> {
        for e in &mut self.elements {
            e.deserialize(cur)?;
        }
        Ok(())
    }

    pub(crate) fn index(&mut self, i: usize) -> anyhow::Result<&mut dyn TreeNode> {
        self.sync()?;
        check_index(i, self.len())?;
        Ok(&mut self.elements[i])
    }
}

/// Mutable element of a [`RecordArray`].
pub struct ElementMut<'a> {
    array: &'a mut RecordArray,
    index: usize,
}

impl ElementMut<'_> {
    /// Write back now instead of on drop.
    pub fn commit(self) -> anyhow::Result<()> {
        self.array.commit()
    }
}

impl Deref for ElementMut<'_> {
    type Target = Record;

    fn deref(&self) -> &Record {
        &self.array.elements[self.index]
    }
}

impl DerefMut for ElementMut<'_> {
    fn deref_mut(&mut self) -> &mut Record {
        &mut self.array.elements[self.index]
    }
}

impl Drop for ElementMut<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.array.commit() {
            log::error!("failed to write back array of records: {e:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::inner;

    #[test]
    fn primitive_array_text() {
        let mut a = PrimitiveArray::new(PrimitiveKind::U8, 4);
        a.set_text("toolong").unwrap();
        assert_eq!(a.text().unwrap(), "tool");

        a.set_text("hi").unwrap();
        assert_eq!(a.to_vec::<u8>().unwrap(), vec![b'h', b'i', 0, 0]);
        assert_eq!(a.text().unwrap(), "hi");

        let mut f = PrimitiveArray::new(PrimitiveKind::F32, 2);
        assert!(f.set_text("x").is_err());
    }

    #[test]
    fn primitive_array_bounds() {
        let mut a = PrimitiveArray::new(PrimitiveKind::I32, 3);
        a.set(2, Value::I32(5)).unwrap();
        assert_eq!(a.get(2).unwrap(), Value::I32(5));
        assert!(a.get(3).is_err());
        assert!(a.set_all(&[1i32, 2]).is_err());
        a.set_all(&[1i32, 2, 3]).unwrap();
        assert_eq!(a.to_vec::<i64>().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn unbound_record_array() {
        let mut a = RecordArray::new(&inner(), 3).unwrap();
        assert_eq!(a.total_size(), 30);
        {
            let mut e = a.element_mut(2).unwrap();
            e.set("b", 4.0f64).unwrap();
        }
        assert!(!a.is_pending());
        assert_eq!(a.element(2).unwrap().value("b"), Some(Value::F64(4.0)));
        assert_eq!(a.element(0).unwrap().value("b"), Some(Value::F64(0.0)));
        assert!(a.element(3).is_err());

        let mut b = Vec::new();
        a.serialize(&mut b);
        assert_eq!(&b[22..30], &4.0f64.to_le_bytes());
    }
}
