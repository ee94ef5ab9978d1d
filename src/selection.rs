//! Index selection into an N-dimensional dataset and the deferred IO performed through it.
use std::cell::Cell;

use crate::error::Error;
use crate::storage::{DatasetHandle, Region, UNLIMITED};
use crate::types::Datatype;

/// Fixed leading indices of a dataset, the remaining axes are selected in full.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    dims: Vec<u64>,
    indices: Vec<u64>,
}

impl Selection {
    pub fn new(dims: &[u64]) -> Selection {
        Selection {
            dims: dims.to_vec(),
            indices: Vec::new(),
        }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[u64] {
        &self.dims
    }

    /// Fixed indices in axis order.
    pub fn indices(&self) -> &[u64] {
        &self.indices
    }

    /// Extents of the axes not fixed yet.
    pub fn remaining(&self) -> &[u64] {
        &self.dims[self.indices.len()..]
    }

    pub fn reset(&mut self) {
        self.indices.clear();
    }

    /// Drop fixed indices beyond `depth`.
    pub fn truncate(&mut self, depth: usize) {
        self.indices.truncate(depth);
    }

    pub(crate) fn set_dims(&mut self, dims: &[u64]) {
        self.dims = dims.to_vec();
        self.indices.clear();
    }

    pub(crate) fn set_extent(&mut self, axis: usize, extent: u64) {
        self.dims[axis] = extent;
    }

    /// Fix the next axis at `i`.
    pub fn add_index(&mut self, i: u64) -> anyhow::Result<()> {
        let axis = self.indices.len();

        if axis == self.rank() {
            log::warn!(
                "ignoring index {i}: all {} dimensions already selected",
                self.rank()
            );
            return Err(Error::SelectionOverflow { rank: self.rank() }.into());
        }

        if i >= self.dims[axis] {
            return Err(Error::IndexOutOfBounds {
                axis,
                index: i,
                extent: self.dims[axis],
            }
            .into());
        }

        self.indices.push(i);
        Ok(())
    }

    /// Number of selected elements, the product of the remaining extents.
    pub fn element_count(&self) -> u64 {
        self.remaining().iter().product()
    }

    /// Fixed indices followed by zeros, extent one on fixed axes and full extent on the rest.
    pub fn region(&self) -> Region {
        let k = self.indices.len();

        let mut offset = self.indices.clone();
        offset.resize(self.rank(), 0);

        let mut count = vec![1; k];
        count.extend_from_slice(self.remaining());

        Region { offset, count }
    }

    /// Like [`region`](Selection::region), but the first free axis starts at `offset`.
    pub fn region_from(&self, offset: u64) -> anyhow::Result<Region> {
        let mut r = self.region();
        let k = self.indices.len();

        ensure!(k < self.rank(), "no free dimension to offset into");
        ensure!(
            offset <= self.dims[k],
            "offset {} beyond extent {} of axis {}",
            offset,
            self.dims[k],
            k
        );

        r.offset[k] = offset;
        r.count[k] = self.dims[k] - offset;
        Ok(r)
    }
}

/// Binds a [`Selection`] to a dataset handle and moves the selected elements.
///
/// Before [`init`](IoFacility::init) every operation is a silent no-op.
#[derive(Debug)]
pub struct IoFacility {
    handle: Option<DatasetHandle>,
    mem_type: Datatype,
    max_dims: Vec<u64>,
    selection: Selection,

    /// Bumped by every write and extent change, cached members compare it to detect stale bytes.
    generation: Cell<u64>,
}

impl IoFacility {
    pub fn new(mem_type: Datatype, dims: &[u64], max_dims: &[u64]) -> IoFacility {
        IoFacility {
            handle: None,
            mem_type,
            max_dims: max_dims.to_vec(),
            selection: Selection::new(dims),
            generation: Cell::new(0),
        }
    }

    /// Bind to `handle`, taking over its extents and clearing the selection.
    pub fn init(&mut self, handle: DatasetHandle) {
        self.selection.set_dims(&handle.dims());
        self.max_dims = handle.max_dims();
        self.handle = Some(handle);
        self.touch();
    }

    pub fn unbind(&mut self) {
        self.handle = None;
        self.selection.reset();
        self.touch();
    }

    fn touch(&self) {
        self.generation.set(self.generation.get() + 1);
    }

    /// Number of writes and extent changes so far.
    pub fn generation(&self) -> u64 {
        self.generation.get()
    }

    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.handle.as_ref().map(|h| h.is_valid()).unwrap_or(false)
    }

    pub fn handle(&self) -> Option<&DatasetHandle> {
        self.handle.as_ref()
    }

    pub fn mem_type(&self) -> &Datatype {
        &self.mem_type
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn dims(&self) -> &[u64] {
        self.selection.dims()
    }

    pub fn max_dims(&self) -> &[u64] {
        &self.max_dims
    }

    /// Declare extents before binding.
    pub(crate) fn declare(&mut self, dims: &[u64], max_dims: &[u64]) {
        self.selection.set_dims(dims);
        self.max_dims = max_dims.to_vec();
    }

    pub fn reset(&mut self) {
        self.selection.reset();
    }

    pub fn truncate(&mut self, depth: usize) {
        self.selection.truncate(depth);
    }

    pub fn add_index(&mut self, i: u64) -> anyhow::Result<()> {
        self.selection.add_index(i)
    }

    pub fn element_count(&self) -> u64 {
        self.selection.element_count()
    }

    pub fn byte_count(&self) -> u64 {
        self.element_count() * self.mem_type.dsize() as u64
    }

    fn bound(&self) -> Option<&DatasetHandle> {
        match &self.handle {
            Some(h) if h.is_valid() => Some(h),
            _ => {
                log::trace!("io on unbound dataset ignored");
                None
            }
        }
    }

    /// Read the selection into `buf` in the element layout.
    pub fn read(&self, buf: &mut [u8]) -> anyhow::Result<()> {
        self.read_as(&self.mem_type, buf)
    }

    /// Read the selection converted to `mem`.
    pub fn read_as(&self, mem: &Datatype, buf: &mut [u8]) -> anyhow::Result<()> {
        match self.bound() {
            Some(h) => h.read(mem, &self.selection.region(), buf),
            None => Ok(()),
        }
    }

    pub fn write(&self, buf: &[u8]) -> anyhow::Result<()> {
        self.write_as(&self.mem_type, buf)
    }

    pub fn write_as(&self, mem: &Datatype, buf: &[u8]) -> anyhow::Result<()> {
        match self.bound() {
            Some(h) => {
                self.touch();
                h.write(mem, &self.selection.region(), buf)
            }
            None => Ok(()),
        }
    }

    /// Write into the first free axis starting at `offset` up to its current extent.
    pub fn write_with_offset(&self, offset: u64, buf: &[u8]) -> anyhow::Result<()> {
        self.write_as_with_offset(&self.mem_type, offset, buf)
    }

    pub fn write_as_with_offset(&self, mem: &Datatype, offset: u64, buf: &[u8]) -> anyhow::Result<()> {
        match self.bound() {
            Some(h) => {
                self.touch();
                h.write(mem, &self.selection.region_from(offset)?, buf)
            }
            None => Ok(()),
        }
    }

    pub fn read_text(&self) -> anyhow::Result<Vec<String>> {
        match self.bound() {
            Some(h) => h.read_text(&self.selection.region()),
            None => Ok(Vec::new()),
        }
    }

    /// Write text values, one per selected element.
    pub fn write_text(&self, values: &[String]) -> anyhow::Result<()> {
        let Some(h) = self.bound() else {
            return Ok(());
        };

        let n = self.element_count() as usize;
        if values.len() != n {
            return Err(Error::ElementCountMismatch {
                expected: n,
                got: values.len(),
            }
            .into());
        }

        self.touch();
        h.write_text(&self.selection.region(), values)
    }

    pub fn write_text_with_offset(&self, offset: u64, values: &[String]) -> anyhow::Result<()> {
        match self.bound() {
            Some(h) => {
                self.touch();
                h.write_text(&self.selection.region_from(offset)?, values)
            }
            None => Ok(()),
        }
    }

    /// Grow `axis` by `n`. The tracked extent changes only once the container accepted the new extent.
    pub fn extend(&mut self, axis: usize, n: u64) -> anyhow::Result<()> {
        ensure!(
            axis < self.selection.rank(),
            "axis {} out of range for rank {}",
            axis,
            self.selection.rank()
        );

        let Some(h) = self.bound() else {
            return Ok(());
        };

        let mut dims = self.selection.dims().to_vec();
        dims[axis] += n;
        ensure!(
            self.max_dims[axis] == UNLIMITED || dims[axis] <= self.max_dims[axis],
            "cannot extend axis {} to {}: maximum is {}",
            axis,
            dims[axis],
            self.max_dims[axis]
        );

        h.set_extent(&dims)?;
        self.touch();
        self.selection.set_extent(axis, dims[axis]);
        Ok(())
    }

    /// Resize every axis to `dims`.
    pub fn resize(&mut self, dims: &[u64]) -> anyhow::Result<()> {
        let Some(h) = self.bound() else {
            return Ok(());
        };

        h.set_extent(dims)?;
        self.touch();
        self.selection.set_dims(dims);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Container, DatasetSpec};

    #[test]
    fn region_of_partial_selection() {
        let mut s = Selection::new(&[3, 4, 5]);
        s.add_index(2).unwrap();
        assert_eq!(s.element_count(), 20);

        let r = s.region();
        assert_eq!(r.offset, vec![2, 0, 0]);
        assert_eq!(r.count, vec![1, 4, 5]);

        s.add_index(1).unwrap();
        let r = s.region_from(3).unwrap();
        assert_eq!(r.offset, vec![2, 1, 3]);
        assert_eq!(r.count, vec![1, 1, 2]);
    }

    #[test]
    fn overflow_keeps_selection() {
        let mut s = Selection::new(&[2, 2]);
        s.add_index(1).unwrap();
        s.add_index(0).unwrap();

        let e = s.add_index(0).unwrap_err();
        assert_eq!(
            e.downcast_ref::<Error>(),
            Some(&Error::SelectionOverflow { rank: 2 })
        );
        assert_eq!(s.indices(), &[1, 0]);
        assert_eq!(s.element_count(), 1);
    }

    #[test]
    fn bounds_checked() {
        let mut s = Selection::new(&[2]);
        let e = s.add_index(2).unwrap_err();
        assert!(matches!(
            e.downcast_ref::<Error>(),
            Some(Error::IndexOutOfBounds { axis: 0, index: 2, extent: 2 })
        ));
        assert!(s.indices().is_empty());
    }

    #[test]
    fn scalar_region() {
        let s = Selection::new(&[]);
        assert_eq!(s.element_count(), 1);
        assert_eq!(s.region().len(), 1);
        assert!(s.region_from(0).is_err());
    }

    #[test]
    fn unbound_is_noop() {
        let io = IoFacility::new(Datatype::Int(4), &[4], &[4]);
        let mut b = vec![7u8; 16];
        io.read(&mut b).unwrap();
        assert_eq!(b, vec![7u8; 16]);
        io.write(&b).unwrap();
        assert!(io.read_text().unwrap().is_empty());
        assert_eq!(io.byte_count(), 16);
    }

    #[test]
    fn bound_io() {
        let c = Container::in_memory("io").unwrap();
        let spec = DatasetSpec {
            max_dims: vec![UNLIMITED, 2],
            chunk: Some(vec![1, 2]),
            ..DatasetSpec::new(Datatype::UInt(2), &[2, 2])
        };
        let h = c.root().create_dataset("d", &spec).unwrap();

        let mut io = IoFacility::new(Datatype::UInt(2), &[0, 0], &[0, 0]);
        io.init(h);
        assert_eq!(io.dims(), &[2, 2]);

        io.add_index(1).unwrap();
        let g = io.generation();
        io.write(&[1, 0, 2, 0]).unwrap();
        assert!(io.generation() > g);

        let g = io.generation();
        let mut b = vec![0u8; 4];
        io.read(&mut b).unwrap();
        assert_eq!(io.generation(), g);

        io.extend(0, 1).unwrap();
        assert_eq!(io.dims(), &[3, 2]);

        io.reset();
        io.write_with_offset(2, &[3, 0, 4, 0]).unwrap();

        let mut all = vec![0u8; 12];
        io.read(&mut all).unwrap();
        assert_eq!(all, vec![0, 0, 0, 0, 1, 0, 2, 0, 3, 0, 4, 0]);

        assert!(io.extend(1, 1).is_err());
        assert_eq!(io.dims(), &[3, 2]);
    }
}
