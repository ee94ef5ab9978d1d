use std::cell::RefCell;
use std::rc::{Rc, Weak};

use ndarray::{ArrayD, IxDyn};

use crate::error::Error;
use crate::record::{Compound, Link, Record, RecordType};
use crate::selection::IoFacility;
use crate::tree::TreeNode;
use crate::types::{Datatype, Primitive, PrimitiveKind, Value};

/// Element type of a dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementType {
    /// A primitive or variable-length text.
    Primitive(PrimitiveKind),
    Record(RecordType),
}

impl ElementType {
    pub fn datatype(&self) -> Datatype {
        match self {
            ElementType::Primitive(k) => k.datatype(),
            ElementType::Record(r) => r.datatype(),
        }
    }

    /// Size of one element in bytes, zero for text.
    pub fn size(&self) -> usize {
        match self {
            ElementType::Primitive(k) => k.size(),
            ElementType::Record(r) => r.total_size(),
        }
    }

    pub fn kind(&self) -> Option<PrimitiveKind> {
        match self {
            ElementType::Primitive(k) => Some(*k),
            ElementType::Record(_) => None,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, ElementType::Primitive(PrimitiveKind::Text))
    }
}

/// The value latched by a scalar accessor.
#[derive(Debug)]
enum Terminal {
    Value(Value),
    Record(Record),
}

#[derive(Debug)]
enum Body {
    Dim(Box<Accessor>),
    Scalar(Terminal),
}

/// One level of the per-dimension accessor chain of a dataset.
///
/// A dataset of rank `n` is a chain of `n + 1` accessors created up front. The accessor at depth `d` has
/// `d` indices fixed above it: [`index`](Accessor::index) fixes axis `d` and hands out the accessor at
/// depth `d + 1`. The accessor at depth `n` is the scalar accessor, which reads and writes a single
/// element.
///
/// Every operation first drops indices fixed below its own depth, so an accessor can be re-indexed to
/// visit its siblings. Storage is only touched by reads and writes, and is not touched at all before
/// the dataset is bound.
#[derive(Debug)]
pub struct Accessor {
    depth: usize,
    rank: usize,
    element: ElementType,
    io: Weak<RefCell<IoFacility>>,
    body: Body,
}

impl Accessor {
    pub(crate) fn chain(
        depth: usize,
        rank: usize,
        element: &ElementType,
        io: Weak<RefCell<IoFacility>>,
    ) -> anyhow::Result<Accessor> {
        let body = if depth == rank {
            Body::Scalar(match element {
                ElementType::Primitive(k) => Terminal::Value(Value::zero(*k)),
                ElementType::Record(r) => {
                    let mut rec = Record::new(r)?;
                    rec.bind(Link::dataset(Weak::clone(&io)));
                    Terminal::Record(rec)
                }
            })
        } else {
            Body::Dim(Box::new(Accessor::chain(
                depth + 1,
                rank,
                element,
                Weak::clone(&io),
            )?))
        };

        Ok(Accessor {
            depth,
            rank,
            element: element.clone(),
            io,
            body,
        })
    }

    /// Forget cached record state after the dataset was (re)bound.
    pub(crate) fn rebind(&mut self) {
        match &mut self.body {
            Body::Dim(child) => child.rebind(),
            Body::Scalar(Terminal::Record(r)) => r.bind(Link::dataset(Weak::clone(&self.io))),
            Body::Scalar(Terminal::Value(_)) => {}
        }
    }

    /// Write back pending array-of-record changes in the scalar record.
    pub(crate) fn commit_pending(&mut self) -> anyhow::Result<()> {
        match &mut self.body {
            Body::Dim(child) => child.commit_pending(),
            Body::Scalar(Terminal::Record(r)) => r.commit_pending(),
            Body::Scalar(Terminal::Value(_)) => Ok(()),
        }
    }

    pub fn element(&self) -> &ElementType {
        &self.element
    }

    /// Number of axes already fixed above this accessor.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Number of axes left to index.
    pub fn rank(&self) -> usize {
        self.rank - self.depth
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self.body, Body::Scalar(_))
    }

    fn io(&self) -> anyhow::Result<Rc<RefCell<IoFacility>>> {
        self.io
            .upgrade()
            .ok_or_else(|| anyhow!("accessor outlived its dataset"))
    }

    /// The IO facility with the selection cut back to this accessor's depth.
    pub(crate) fn select(&self) -> anyhow::Result<Rc<RefCell<IoFacility>>> {
        let io = self.io()?;
        {
            let mut f = io.borrow_mut();
            ensure!(
                f.selection().indices().len() >= self.depth,
                "accessor at depth {} reached without selecting its parent indices",
                self.depth
            );
            f.truncate(self.depth);
        }
        Ok(io)
    }

    fn is_bound(&self) -> bool {
        self.io().map(|io| io.borrow().is_bound()).unwrap_or(false)
    }

    /// Fix the axis of this accessor at `i` and return the accessor one level down.
    pub fn index(&mut self, i: u64) -> anyhow::Result<&mut Accessor> {
        {
            let io = self.select()?;
            let mut f = io.borrow_mut();
            f.add_index(i)?;
            log::trace!("selected {:?}", f.selection().indices());
        }

        match &mut self.body {
            Body::Dim(child) => Ok(child),
            Body::Scalar(_) => Err(Error::SelectionOverflow { rank: self.rank }.into()),
        }
    }

    /// Current extents of the whole dataset.
    pub fn dims(&self) -> Vec<u64> {
        self.io()
            .map(|io| io.borrow().dims().to_vec())
            .unwrap_or_default()
    }

    pub fn max_dims(&self) -> Vec<u64> {
        self.io()
            .map(|io| io.borrow().max_dims().to_vec())
            .unwrap_or_default()
    }

    pub fn dim_size(&self, axis: usize) -> Option<u64> {
        self.dims().get(axis).copied()
    }

    pub fn max_dim_size(&self, axis: usize) -> Option<u64> {
        self.max_dims().get(axis).copied()
    }

    /// Number of elements in the whole dataset.
    pub fn total_elements(&self) -> u64 {
        self.dims().iter().product()
    }

    /// Number of elements below this accessor.
    pub fn element_count(&self) -> u64 {
        self.shape().iter().product()
    }

    /// Extents of the axes below this accessor.
    pub fn shape(&self) -> Vec<u64> {
        self.dims().get(self.depth..).map(<[u64]>::to_vec).unwrap_or_default()
    }

    pub fn byte_count(&self) -> usize {
        self.element_count() as usize * self.element.size()
    }

    pub(crate) fn check_count(&self, got: usize) -> anyhow::Result<()> {
        let expected = self.element_count() as usize;
        if got != expected {
            return Err(Error::ElementCountMismatch { expected, got }.into());
        }
        Ok(())
    }

    fn check_fixed_width(&self) -> anyhow::Result<()> {
        ensure!(
            !self.element.is_text(),
            "text datasets are read and written as text"
        );
        Ok(())
    }

    fn check_primitive(&self) -> anyhow::Result<PrimitiveKind> {
        match &self.element {
            ElementType::Primitive(PrimitiveKind::Text) | ElementType::Record(_) => {
                Err(Error::KindMismatch {
                    expected: "a numeric dataset".into(),
                    got: self.describe(),
                }
                .into())
            }
            ElementType::Primitive(k) => Ok(*k),
        }
    }

    fn check_record(&self) -> anyhow::Result<&RecordType> {
        match &self.element {
            ElementType::Record(r) => Ok(r),
            _ => Err(Error::KindMismatch {
                expected: "a record dataset".into(),
                got: self.describe(),
            }
            .into()),
        }
    }

    fn describe(&self) -> String {
        match &self.element {
            ElementType::Primitive(k) => format!("a dataset of {k}"),
            ElementType::Record(_) => "a record dataset".into(),
        }
    }

    /// Read every element below this accessor in the stored element layout.
    pub fn read_raw(&self) -> anyhow::Result<Vec<u8>> {
        self.check_fixed_width()?;
        let io = self.select()?;
        let mut buf = vec![0u8; self.byte_count()];
        io.borrow().read(&mut buf)?;
        Ok(buf)
    }

    /// Read every element below this accessor converted to `T`.
    pub fn read<T: Primitive>(&self) -> anyhow::Result<Vec<T>> {
        self.check_primitive()?;
        let io = self.select()?;
        let mut buf = vec![0u8; self.element_count() as usize * T::KIND.size()];
        io.borrow().read_as(&T::KIND.datatype(), &mut buf)?;
        Ok(T::decode_slice(&buf))
    }

    /// Like [`read`](Accessor::read), shaped as the sub-array below this accessor.
    pub fn read_array<T: Primitive>(&self) -> anyhow::Result<ArrayD<T>> {
        let values = self.read::<T>()?;
        let shape: Vec<usize> = self.shape().iter().map(|d| *d as usize).collect();
        Ok(ArrayD::from_shape_vec(IxDyn(&shape), values)?)
    }

    /// Read the members of `C` of every record below this accessor.
    pub fn read_compound<C: Compound>(&self) -> anyhow::Result<Vec<C>> {
        self.check_record()?;
        let ty = C::record_type();
        ty.validate()?;

        let io = self.select()?;
        let mut buf = vec![0u8; self.element_count() as usize * ty.total_size()];
        io.borrow().read_as(&ty.datatype(), &mut buf)?;

        let mut cur = buf.as_slice();
        (0..self.element_count())
            .map(|_| C::decode(&mut cur))
            .collect()
    }

    /// Detached copies of every record below this accessor.
    pub fn read_records(&self) -> anyhow::Result<Vec<Record>> {
        let ty = self.check_record()?.clone();
        let buf = self.read_raw()?;

        let n = ty.total_size();
        buf.chunks_exact(n)
            .map(|b| {
                let mut r = Record::new(&ty)?;
                r.from_bytes(b)?;
                Ok(r)
            })
            .collect()
    }

    /// Write every element below this accessor from the stored element layout.
    pub fn write_raw(&self, buf: &[u8]) -> anyhow::Result<()> {
        self.check_fixed_width()?;
        ensure!(
            buf.len() == self.byte_count(),
            "buffer of {} bytes for {} bytes of elements",
            buf.len(),
            self.byte_count()
        );
        let io = self.select()?;
        let r = io.borrow().write(buf);
        r
    }

    pub fn write<T: Primitive>(&self, values: &[T]) -> anyhow::Result<()> {
        self.check_primitive()?;
        self.check_count(values.len())?;
        let io = self.select()?;
        let r = io
            .borrow()
            .write_as(&T::KIND.datatype(), &T::encode_slice(values));
        r
    }

    /// Write the members of `C` of every record below this accessor, other members are kept.
    pub fn write_compound<C: Compound>(&self, values: &[C]) -> anyhow::Result<()> {
        self.check_record()?;
        self.check_count(values.len())?;
        let ty = C::record_type();
        ty.validate()?;

        let mut buf = Vec::with_capacity(values.len() * ty.total_size());
        for v in values {
            v.encode(&mut buf);
        }

        let io = self.select()?;
        let r = io.borrow().write_as(&ty.datatype(), &buf);
        r
    }

    pub fn write_records(&self, records: &[Record]) -> anyhow::Result<()> {
        let ty = self.check_record()?;
        self.check_count(records.len())?;
        ensure!(
            records.iter().all(|r| r.record_type() == ty),
            "records do not match the record type of the dataset"
        );

        let mut buf = Vec::with_capacity(self.byte_count());
        for r in records {
            r.serialize(&mut buf);
        }
        self.write_raw(&buf)
    }

    /// Write into the axis of this accessor starting at `offset`, up to its current extent.
    pub fn write_raw_starting_at(&self, offset: u64, buf: &[u8]) -> anyhow::Result<()> {
        self.check_fixed_width()?;
        ensure!(!self.is_scalar(), "scalar accessor has no axis to offset into");
        let io = self.select()?;
        let r = io.borrow().write_with_offset(offset, buf);
        r
    }

    /// Set every element below this accessor to `value`.
    pub fn set_all<T: Primitive>(&self, value: T) -> anyhow::Result<()> {
        self.write(&vec![value; self.element_count() as usize])
    }

    pub fn set_all_records(&self, record: &Record) -> anyhow::Result<()> {
        let n = self.element_count() as usize;
        let records = vec![record.detached(); n];
        self.write_records(&records)
    }

    /// Grow the axis of this accessor by `n`. Only unlimited or not yet full axes can grow.
    pub fn extend(&mut self, n: u64) -> anyhow::Result<()> {
        ensure!(!self.is_scalar(), "scalar accessor has no axis to extend");
        let io = self.select()?;
        let r = io.borrow_mut().extend(self.depth, n);
        r
    }

    /// Grow the axis of this accessor by one and write `buf` into the new slot.
    pub fn extend_once_and_write(&mut self, buf: &[u8]) -> anyhow::Result<()> {
        self.check_fixed_width()?;
        let (io, old) = self.extend_once()?;
        let r = io.borrow().write_with_offset(old, buf);
        r
    }

    pub fn extend_once_and_write_values<T: Primitive>(&mut self, values: &[T]) -> anyhow::Result<()> {
        self.check_primitive()?;
        let (io, old) = self.extend_once()?;
        let r = io
            .borrow()
            .write_as_with_offset(&T::KIND.datatype(), old, &T::encode_slice(values));
        r
    }

    pub fn extend_once_and_write_compound<C: Compound>(&mut self, value: &C) -> anyhow::Result<()> {
        self.check_record()?;
        let ty = C::record_type();
        let (io, old) = self.extend_once()?;
        let r = io
            .borrow()
            .write_as_with_offset(&ty.datatype(), old, &value.to_bytes());
        r
    }

    /// Extend by one, returning the selected IO facility and the index of the new slot.
    pub(crate) fn extend_once(&mut self) -> anyhow::Result<(Rc<RefCell<IoFacility>>, u64)> {
        ensure!(!self.is_scalar(), "scalar accessor has no axis to extend");
        let io = self.select()?;
        let old = io.borrow().dims()[self.depth];
        io.borrow_mut().extend(self.depth, 1)?;
        Ok((io, old))
    }

    fn check_scalar(&self) -> anyhow::Result<()> {
        ensure!(
            self.is_scalar(),
            "{} more indices are needed to reach a single element",
            self.rank()
        );
        Ok(())
    }

    /// Read the element of a scalar accessor. Before binding this is the value last set.
    pub fn value(&mut self) -> anyhow::Result<Value> {
        self.check_scalar()?;
        let bound = self.is_bound();
        let got = self.describe();
        let io = self.select()?;

        match &mut self.body {
            Body::Scalar(Terminal::Value(v)) if bound => {
                let k = v.kind();
                if k == PrimitiveKind::Text {
                    let text = io.borrow().read_text()?;
                    *v = Value::Text(text.into_iter().next().unwrap_or_default());
                } else {
                    let mut b = vec![0u8; k.size()];
                    io.borrow().read(&mut b)?;
                    *v = Value::decode(k, &b);
                }
                Ok(v.clone())
            }
            Body::Scalar(Terminal::Value(v)) => Ok(v.clone()),
            _ => Err(Error::KindMismatch {
                expected: "a primitive dataset".into(),
                got,
            }
            .into()),
        }
    }

    /// Write the element of a scalar accessor, converting `value` to the element kind.
    pub fn set_value(&mut self, value: Value) -> anyhow::Result<()> {
        self.check_scalar()?;
        let io = self.select()?;

        let Body::Scalar(Terminal::Value(v)) = &mut self.body else {
            return Err(Error::KindMismatch {
                expected: "a primitive dataset".into(),
                got: "a record dataset".into(),
            }
            .into());
        };

        let k = v.kind();
        *v = value.cast(k).ok_or_else(|| Error::KindMismatch {
            expected: k.to_string(),
            got: value.kind().to_string(),
        })?;

        let f = io.borrow();
        match v {
            Value::Text(s) => f.write_text(&[s.clone()]),
            v => {
                let mut b = vec![0u8; k.size()];
                v.encode(&mut b);
                f.write(&b)
            }
        }
    }

    pub fn get<T: Primitive>(&mut self) -> anyhow::Result<T> {
        let v = self.value()?;
        T::from_value(&v).ok_or_else(|| {
            Error::KindMismatch {
                expected: T::KIND.to_string(),
                got: v.kind().to_string(),
            }
            .into()
        })
    }

    pub fn set<T: Primitive>(&mut self, value: T) -> anyhow::Result<()> {
        self.set_value(value.into_value())
    }

    /// The live record of a scalar accessor. Members are read and written individually.
    pub fn record(&mut self) -> anyhow::Result<&mut Record> {
        self.check_scalar()?;
        self.select()?;

        let got = self.describe();
        match &mut self.body {
            Body::Scalar(Terminal::Record(r)) => Ok(r),
            _ => Err(Error::KindMismatch {
                expected: "a record dataset".into(),
                got,
            }
            .into()),
        }
    }

    /// Read the whole record of a scalar accessor and return it.
    pub fn read_record(&mut self) -> anyhow::Result<&mut Record> {
        let r = self.record()?;
        r.read_all()?;
        Ok(r)
    }

    /// Write `other` as the whole record of a scalar accessor.
    pub fn write_record(&mut self, other: &Record) -> anyhow::Result<()> {
        let r = self.record()?;
        ensure!(
            other.record_type() == r.record_type(),
            "record does not match the record type of the dataset"
        );
        r.from_bytes(&other.to_bytes())?;
        r.write_all()
    }

    /// The latched value of a scalar accessor, without reading.
    pub fn latched(&self) -> Option<Value> {
        match &self.body {
            Body::Scalar(Terminal::Value(v)) => Some(v.clone()),
            _ => None,
        }
    }
}

impl TreeNode for Accessor {
    fn is_leaf(&self) -> Option<PrimitiveKind> {
        match &self.body {
            Body::Scalar(Terminal::Value(v)) => Some(v.kind()),
            _ => None,
        }
    }

    fn read_leaf_value(&mut self) -> anyhow::Result<Option<Value>> {
        if self.is_leaf().is_some() {
            self.value().map(Some)
        } else {
            Ok(None)
        }
    }

    fn can_index(&self) -> bool {
        !self.is_scalar()
    }

    fn index(&mut self, i: usize) -> anyhow::Result<&mut dyn TreeNode> {
        Ok(Accessor::index(self, i as u64)?)
    }

    fn indexable_size(&self) -> usize {
        if self.is_scalar() {
            0
        } else {
            self.dims().get(self.depth).copied().unwrap_or(0) as usize
        }
    }

    fn element_kind(&self) -> Option<PrimitiveKind> {
        self.element.kind()
    }

    fn bytes_below(&self) -> usize {
        self.byte_count()
    }

    fn read_all_below(&mut self, out: &mut Vec<u8>) -> anyhow::Result<bool> {
        if self.element.is_text() {
            return Ok(false);
        }
        out.extend_from_slice(&self.read_raw()?);
        Ok(true)
    }

    fn memory_value(&self) -> Option<Value> {
        self.latched()
    }

    fn children_names(&self) -> Vec<String> {
        match &self.body {
            Body::Scalar(Terminal::Record(r)) => r.names(),
            _ => Vec::new(),
        }
    }

    fn child_by_name(&mut self, name: &str) -> Option<&mut dyn TreeNode> {
        if !self.is_scalar() || self.select().is_err() {
            return None;
        }

        match &mut self.body {
            Body::Scalar(Terminal::Record(r)) => r.child_by_name(name),
            _ => None,
        }
    }
}
