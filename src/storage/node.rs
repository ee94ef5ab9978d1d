use std::cell::{Cell, RefCell};
use std::rc::Rc;

use hdf5::filters::Filter;
use hdf5::types::VarLenUnicode;
use hdf5::{Attribute, Dataset, Group};

use super::h5::{self, Io};
use super::hyperslab::Region;
use super::UNLIMITED;
use crate::error::Error;
use crate::types::Datatype;

/// State of one open container, shared by all its handles.
#[derive(Debug)]
pub(crate) struct Session {
    pub read_only: bool,
    pub open: Cell<bool>,
}

impl Session {
    pub fn new(read_only: bool) -> Rc<Session> {
        Rc::new(Session {
            read_only,
            open: Cell::new(true),
        })
    }

    fn check_open(&self) -> anyhow::Result<()> {
        if self.open.get() {
            Ok(())
        } else {
            Err(Error::Closed.into())
        }
    }

    fn check_writable(&self) -> anyhow::Result<()> {
        self.check_open()?;
        if self.read_only {
            Err(Error::ReadOnly.into())
        } else {
            Ok(())
        }
    }
}

/// Kind of a group member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Group,
    Dataset,

    /// Named datatypes, external or dangling links.
    Other,
}

/// Creation parameters of a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSpec {
    pub dtype: Datatype,
    pub dims: Vec<u64>,
    pub max_dims: Vec<u64>,
    pub chunk: Option<Vec<u64>>,
    pub deflate: Option<u8>,
    pub fill: Option<Vec<u8>>,
}

impl DatasetSpec {
    /// Fixed size dataset without chunking.
    pub fn new(dtype: Datatype, dims: &[u64]) -> DatasetSpec {
        DatasetSpec {
            dtype,
            dims: dims.to_vec(),
            max_dims: dims.to_vec(),
            chunk: None,
            deflate: None,
            fill: None,
        }
    }

    pub(crate) fn validate(&self) -> anyhow::Result<()> {
        let rank = self.dims.len();
        ensure!(
            self.max_dims.len() == rank,
            "max dims {:?} do not match rank of dims {:?}",
            self.max_dims,
            self.dims
        );
        ensure!(
            self.dims.iter().zip(&self.max_dims).all(|(d, m)| d <= m),
            "dims {:?} exceed max dims {:?}",
            self.dims,
            self.max_dims
        );
        ensure!(
            !matches!(self.dtype, Datatype::Compound(ref c) if c.fields.is_empty()),
            "compound type without members"
        );

        if let Some(chunk) = &self.chunk {
            ensure!(rank > 0, "scalar datasets cannot be chunked");
            ensure!(
                chunk.len() == rank && chunk.iter().all(|c| *c > 0),
                "chunk shape {:?} invalid for rank {}",
                chunk,
                rank
            );
            ensure!(
                chunk
                    .iter()
                    .zip(&self.max_dims)
                    .all(|(c, m)| *m == UNLIMITED || c <= m),
                "chunk shape {:?} exceeds max dims {:?}",
                chunk,
                self.max_dims
            );
        } else {
            ensure!(
                self.dims == self.max_dims,
                "extendible datasets require a chunked layout"
            );
            ensure!(
                self.deflate.is_none(),
                "compression requires a chunked layout"
            );
        }

        if let Some(level) = self.deflate {
            ensure!(level <= 9, "deflate level {} out of range 0..=9", level);
        }

        if let Some(fill) = &self.fill {
            ensure!(
                fill.len() == self.dtype.dsize() && self.dtype != Datatype::VarLenStr,
                "fill value of {} bytes for element of {} bytes",
                fill.len(),
                self.dtype.dsize()
            );
        }

        Ok(())
    }
}

fn join(path: &str, name: &str) -> String {
    if path.ends_with('/') {
        format!("{path}{name}")
    } else {
        format!("{path}/{name}")
    }
}

/// Member names in creation order when the location tracks it, otherwise in the stored name order.
fn ordered(names: Vec<String>, by_creation: impl FnOnce(usize) -> Option<Vec<String>>) -> Vec<String> {
    match by_creation(names.len()) {
        Some(o) if o.len() == names.len() => o,
        _ => names,
    }
}

/// Handle to a group of an open container.
#[derive(Debug, Clone)]
pub struct GroupHandle {
    group: Group,
    session: Rc<Session>,
    path: String,
}

impl GroupHandle {
    pub(crate) fn new(group: Group, session: Rc<Session>, path: String) -> GroupHandle {
        GroupHandle {
            group,
            session,
            path,
        }
    }

    /// Absolute path of the group, `/` for the root.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_valid(&self) -> bool {
        self.session.open.get()
    }

    fn check_name(&self, name: &str) -> anyhow::Result<()> {
        ensure!(
            !name.is_empty() && !name.contains('/') && name != ".",
            "invalid object name: {:?}",
            name
        );
        ensure!(
            !self.group.link_exists(name),
            "object {} already exists",
            join(&self.path, name)
        );
        Ok(())
    }

    fn kind(&self, name: &str) -> Option<ObjectKind> {
        if !self.group.link_exists(name) {
            None
        } else if self.group.group(name).is_ok() {
            Some(ObjectKind::Group)
        } else if self.group.dataset(name).is_ok() {
            Some(ObjectKind::Dataset)
        } else {
            Some(ObjectKind::Other)
        }
    }

    pub fn create_group(&self, name: &str) -> anyhow::Result<GroupHandle> {
        self.session.check_writable()?;
        self.check_name(name)?;

        h5::create_group(self.group.id(), name)?;
        self.open_group(name)
    }

    pub fn open_group(&self, name: &str) -> anyhow::Result<GroupHandle> {
        self.session.check_open()?;

        let path = join(&self.path, name);
        match self.kind(name) {
            Some(ObjectKind::Group) => Ok(GroupHandle::new(
                self.group.group(name)?,
                Rc::clone(&self.session),
                path,
            )),
            Some(_) => bail!("{} is not a group", path),
            None => Err(Error::NotFound(path).into()),
        }
    }

    pub fn create_dataset(&self, name: &str, spec: &DatasetSpec) -> anyhow::Result<DatasetHandle> {
        self.session.check_writable()?;
        self.check_name(name)?;
        spec.validate()?;

        let ftype = spec.dtype.to_hdf5()?;
        h5::create_dataset(self.group.id(), name, ftype.id(), spec)?;

        log::debug!(
            "created dataset {} ({}, dims: {:?}, max dims: {:?})",
            join(&self.path, name),
            spec.dtype,
            spec.dims,
            spec.max_dims
        );

        self.open_dataset(name)
    }

    pub fn open_dataset(&self, name: &str) -> anyhow::Result<DatasetHandle> {
        self.session.check_open()?;

        let path = join(&self.path, name);
        match self.kind(name) {
            Some(ObjectKind::Dataset) => {
                DatasetHandle::open(self.group.dataset(name)?, Rc::clone(&self.session), path)
            }
            Some(_) => bail!("{} is not a dataset", path),
            None => Err(Error::NotFound(path).into()),
        }
    }

    /// Immediate members in creation order.
    pub fn members(&self) -> anyhow::Result<Vec<(String, ObjectKind)>> {
        self.session.check_open()?;

        let names = ordered(self.group.member_names()?, |n| {
            h5::links_by_creation(self.group.id(), n)
        });

        Ok(names
            .into_iter()
            .map(|n| {
                let kind = self.kind(&n).unwrap_or(ObjectKind::Other);
                (n, kind)
            })
            .collect())
    }

    pub fn create_attribute(&self, name: &str, dtype: &Datatype) -> anyhow::Result<AttributeHandle> {
        self.session.check_writable()?;
        create_attr(&self.group, &self.path, name, dtype)?;
        self.open_attribute(name)
    }

    pub fn open_attribute(&self, name: &str) -> anyhow::Result<AttributeHandle> {
        self.session.check_open()?;
        open_attr(&self.group, &self.path, name, &self.session)
    }

    pub fn attribute_names(&self) -> anyhow::Result<Vec<String>> {
        self.session.check_open()?;
        attr_names(&self.group)
    }
}

fn create_attr(loc: &hdf5::Location, path: &str, name: &str, dtype: &Datatype) -> anyhow::Result<()> {
    ensure!(!name.is_empty(), "invalid attribute name on {}", path);
    ensure!(
        !loc.attr_names()?.iter().any(|a| a == name),
        "attribute {} already exists on {}",
        name,
        path
    );

    h5::create_attribute(loc.id(), name, dtype.to_hdf5()?.id())
}

fn open_attr(
    loc: &hdf5::Location,
    path: &str,
    name: &str,
    session: &Rc<Session>,
) -> anyhow::Result<AttributeHandle> {
    if !loc.attr_names()?.iter().any(|a| a == name) {
        return Err(Error::NotFound(format!("{path}@{name}")).into());
    }

    let attr = loc.attr(name)?;
    let dtype = Datatype::from(&attr.dtype()?);
    ensure!(
        attr.size() == 1,
        "attribute {}@{} holds {} elements, only scalars are supported",
        path,
        name,
        attr.size()
    );

    Ok(AttributeHandle {
        attr,
        dtype,
        session: Rc::clone(session),
    })
}

fn attr_names(loc: &hdf5::Location) -> anyhow::Result<Vec<String>> {
    Ok(ordered(loc.attr_names()?, |n| {
        h5::attributes_by_creation(loc.id(), n)
    }))
}

/// Layout of a dataset, read once when opened.
#[derive(Debug)]
struct Meta {
    dtype: Datatype,
    dims: RefCell<Vec<u64>>,
    max_dims: Vec<u64>,
    chunk: Option<Vec<u64>>,
    deflate: Option<u8>,
    fill: Option<Vec<u8>>,
}

/// Handle to a dataset of an open container.
#[derive(Debug, Clone)]
pub struct DatasetHandle {
    ds: Dataset,
    meta: Rc<Meta>,
    session: Rc<Session>,
    path: String,
}

impl DatasetHandle {
    fn open(ds: Dataset, session: Rc<Session>, path: String) -> anyhow::Result<DatasetHandle> {
        let dtype = Datatype::from(&ds.dtype()?);
        let (dims, max_dims) = h5::extents(ds.id())?;

        let chunk = ds
            .chunk()
            .map(|c| c.into_iter().map(|d| d as u64).collect());
        let deflate = ds.filters().into_iter().find_map(|f| match f {
            Filter::Deflate(level) => Some(level),
            _ => None,
        });
        let fill = match (&dtype, dtype.to_hdf5()) {
            (Datatype::VarLenStr, _) | (_, Err(_)) => None,
            (_, Ok(mem)) => h5::fill_value(ds.id(), mem.id(), dtype.dsize())?,
        };

        log::trace!("opened dataset {path} ({dtype}, dims: {dims:?})");

        Ok(DatasetHandle {
            ds,
            meta: Rc::new(Meta {
                dtype,
                dims: RefCell::new(dims),
                max_dims,
                chunk,
                deflate,
                fill,
            }),
            session,
            path,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_valid(&self) -> bool {
        self.session.open.get()
    }

    pub fn dtype(&self) -> Datatype {
        self.meta.dtype.clone()
    }

    pub fn dims(&self) -> Vec<u64> {
        self.meta.dims.borrow().clone()
    }

    pub fn max_dims(&self) -> Vec<u64> {
        self.meta.max_dims.clone()
    }

    pub fn chunk(&self) -> Option<Vec<u64>> {
        self.meta.chunk.clone()
    }

    pub fn deflate(&self) -> Option<u8> {
        self.meta.deflate
    }

    pub fn fill(&self) -> Option<Vec<u8>> {
        self.meta.fill.clone()
    }

    fn check_buffer(region: &Region, mem: &Datatype, len: usize) -> anyhow::Result<()> {
        let n = region.len() as usize;
        ensure!(
            mem != &Datatype::VarLenStr,
            "variable length strings are transferred as text"
        );
        ensure!(
            len == n * mem.dsize(),
            "buffer of {} bytes does not hold {} elements of {} bytes",
            len,
            n,
            mem.dsize()
        );
        Ok(())
    }

    /// Read `region` converted to `mem` into `out`, which must hold exactly the selected elements.
    ///
    /// Compound members are matched by name, so `mem` may select a subset of the stored members.
    pub fn read(&self, mem: &Datatype, region: &Region, out: &mut [u8]) -> anyhow::Result<()> {
        self.session.check_open()?;

        let dims = self.dims();
        region.check(&dims)?;
        Self::check_buffer(region, mem, out.len())?;

        let mtype = mem.to_hdf5()?;
        unsafe {
            h5::transfer_dataset(
                self.ds.id(),
                mtype.id(),
                region,
                &dims,
                Io::Read(out.as_mut_ptr().cast()),
            )
        }
    }

    /// Write `buf` holding the elements of `region` in the `mem` layout.
    pub fn write(&self, mem: &Datatype, region: &Region, buf: &[u8]) -> anyhow::Result<()> {
        self.session.check_writable()?;

        let dims = self.dims();
        region.check(&dims)?;
        Self::check_buffer(region, mem, buf.len())?;

        let mtype = mem.to_hdf5()?;
        unsafe {
            h5::transfer_dataset(
                self.ds.id(),
                mtype.id(),
                region,
                &dims,
                Io::Write(buf.as_ptr().cast()),
            )
        }
    }

    fn check_text(&self) -> anyhow::Result<()> {
        ensure!(
            self.meta.dtype == Datatype::VarLenStr,
            "dataset {} does not hold variable length strings",
            self.path
        );
        Ok(())
    }

    pub fn read_text(&self, region: &Region) -> anyhow::Result<Vec<String>> {
        self.session.check_open()?;
        self.check_text()?;

        let dims = self.dims();
        region.check(&dims)?;

        let n = region.len() as usize;
        let mtype = Datatype::VarLenStr.to_hdf5()?;
        let mut buf: Vec<VarLenUnicode> = Vec::with_capacity(n);
        unsafe {
            h5::transfer_dataset(
                self.ds.id(),
                mtype.id(),
                region,
                &dims,
                Io::Read(buf.as_mut_ptr().cast()),
            )?;
            buf.set_len(n);
        }

        Ok(buf.iter().map(|s| s.as_str().to_string()).collect())
    }

    pub fn write_text(&self, region: &Region, values: &[String]) -> anyhow::Result<()> {
        self.session.check_writable()?;
        self.check_text()?;

        let dims = self.dims();
        region.check(&dims)?;

        if values.len() as u64 != region.len() {
            return Err(Error::ElementCountMismatch {
                expected: region.len() as usize,
                got: values.len(),
            }
            .into());
        }

        let buf = values
            .iter()
            .map(|s| s.parse::<VarLenUnicode>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow!("invalid text for {}: {e}", self.path))?;

        let mtype = Datatype::VarLenStr.to_hdf5()?;
        unsafe {
            h5::transfer_dataset(
                self.ds.id(),
                mtype.id(),
                region,
                &dims,
                Io::Write(buf.as_ptr().cast()),
            )
        }
    }

    /// Change the current extents. Elements keep their multi-index, new elements take the fill value.
    pub fn set_extent(&self, dims: &[u64]) -> anyhow::Result<()> {
        self.session.check_writable()?;

        let old = self.dims();
        ensure!(
            dims.len() == old.len(),
            "cannot change rank of {} from {} to {}",
            self.path,
            old.len(),
            dims.len()
        );
        if dims == old.as_slice() {
            return Ok(());
        }
        ensure!(
            self.meta.chunk.is_some(),
            "dataset {} has a contiguous layout and cannot be extended",
            self.path
        );
        for (axis, (d, m)) in dims.iter().zip(&self.meta.max_dims).enumerate() {
            ensure!(
                *m == UNLIMITED || d <= m,
                "extent {} of axis {} exceeds maximum {} of {}",
                d,
                axis,
                m,
                self.path
            );
        }

        h5::set_extent(self.ds.id(), dims)?;

        log::debug!("extended {} from {:?} to {:?}", self.path, old, dims);
        *self.meta.dims.borrow_mut() = dims.to_vec();

        Ok(())
    }

    pub fn create_attribute(&self, name: &str, dtype: &Datatype) -> anyhow::Result<AttributeHandle> {
        self.session.check_writable()?;
        create_attr(&self.ds, &self.path, name, dtype)?;
        self.open_attribute(name)
    }

    pub fn open_attribute(&self, name: &str) -> anyhow::Result<AttributeHandle> {
        self.session.check_open()?;
        open_attr(&self.ds, &self.path, name, &self.session)
    }

    pub fn attribute_names(&self) -> anyhow::Result<Vec<String>> {
        self.session.check_open()?;
        attr_names(&self.ds)
    }
}

/// Handle to a scalar attribute.
#[derive(Debug, Clone)]
pub struct AttributeHandle {
    attr: Attribute,
    dtype: Datatype,
    session: Rc<Session>,
}

impl AttributeHandle {
    pub fn dtype(&self) -> Datatype {
        self.dtype.clone()
    }

    pub fn read(&self, mem: &Datatype, out: &mut [u8]) -> anyhow::Result<()> {
        self.session.check_open()?;
        ensure!(
            out.len() == mem.dsize() && mem != &Datatype::VarLenStr,
            "buffer of {} bytes for attribute of {} bytes",
            out.len(),
            mem.dsize()
        );

        let mtype = mem.to_hdf5()?;
        unsafe { h5::transfer_attribute(self.attr.id(), mtype.id(), Io::Read(out.as_mut_ptr().cast())) }
    }

    pub fn write(&self, mem: &Datatype, buf: &[u8]) -> anyhow::Result<()> {
        self.session.check_writable()?;
        ensure!(
            buf.len() == mem.dsize() && mem != &Datatype::VarLenStr,
            "buffer of {} bytes for attribute of {} bytes",
            buf.len(),
            mem.dsize()
        );

        let mtype = mem.to_hdf5()?;
        unsafe { h5::transfer_attribute(self.attr.id(), mtype.id(), Io::Write(buf.as_ptr().cast())) }
    }

    fn check_text(&self) -> anyhow::Result<()> {
        ensure!(
            self.dtype == Datatype::VarLenStr,
            "attribute of type {} does not hold variable length text",
            self.dtype
        );
        Ok(())
    }

    pub fn read_text(&self) -> anyhow::Result<String> {
        self.session.check_open()?;
        self.check_text()?;

        let mtype = Datatype::VarLenStr.to_hdf5()?;
        let mut buf: Vec<VarLenUnicode> = Vec::with_capacity(1);
        unsafe {
            h5::transfer_attribute(self.attr.id(), mtype.id(), Io::Read(buf.as_mut_ptr().cast()))?;
            buf.set_len(1);
        }

        Ok(buf.first().map(|s| s.as_str().to_string()).unwrap_or_default())
    }

    pub fn write_text(&self, value: &str) -> anyhow::Result<()> {
        self.session.check_writable()?;
        self.check_text()?;

        let v = value
            .parse::<VarLenUnicode>()
            .map_err(|e| anyhow!("invalid text attribute value: {e}"))?;
        let mtype = Datatype::VarLenStr.to_hdf5()?;
        unsafe {
            h5::transfer_attribute(
                self.attr.id(),
                mtype.id(),
                Io::Write((&v as *const VarLenUnicode).cast()),
            )
        }
    }
}
