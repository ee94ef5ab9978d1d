//! Calls into the HDF5 C library for what the high level bindings do not expose: creation order
//! tracking, fill values, extents and transfers of dynamically typed buffers.
//!
//! Every call is made under [`hdf5::sync::sync`], which serializes access to the library.
use std::ffi::CString;
use std::ptr;

use hdf5::sync::sync;
use hdf5_sys::h5::{herr_t, hsize_t, H5_index_t, H5_iter_order_t, H5open};
use hdf5_sys::h5a::{H5Aclose, H5Acreate2, H5Aget_name_by_idx, H5Aread, H5Awrite};
use hdf5_sys::h5d::{
    H5D_fill_value_t, H5Dclose, H5Dcreate2, H5Dget_create_plist, H5Dget_space, H5Dread,
    H5Dset_extent, H5Dwrite,
};
use hdf5_sys::h5f::{H5Fclose, H5Fcreate, H5F_ACC_TRUNC};
use hdf5_sys::h5g::{H5Gclose, H5Gcreate2};
use hdf5_sys::h5i::hid_t;
use hdf5_sys::h5l::H5Lget_name_by_idx;
use hdf5_sys::h5p::{
    H5Pclose, H5Pcreate, H5Pfill_value_defined, H5Pget_fill_value, H5Pset_attr_creation_order,
    H5Pset_chunk, H5Pset_deflate, H5Pset_fill_value, H5Pset_link_creation_order, H5Pset_shuffle,
    H5P_CLS_DATASET_CREATE, H5P_CLS_FILE_CREATE, H5P_CLS_GROUP_CREATE,
    H5P_CRT_ORDER_INDEXED, H5P_CRT_ORDER_TRACKED, H5P_DEFAULT,
};
use hdf5_sys::h5s::{
    H5S_class_t, H5S_seloper_t, H5Sclose, H5Screate, H5Screate_simple, H5Sget_simple_extent_dims,
    H5Sget_simple_extent_ndims, H5Sselect_hyperslab, H5S_ALL,
};
use libc::{c_char, c_int, c_uint, c_void, size_t, ssize_t};

use super::hyperslab::Region;
use super::DatasetSpec;

const CRT_ORDER: c_uint = H5P_CRT_ORDER_TRACKED | H5P_CRT_ORDER_INDEXED;

/// An identifier closed with `close` when dropped.
struct Id {
    id: hid_t,
    close: unsafe extern "C" fn(hid_t) -> herr_t,
}

impl Id {
    fn new(id: hid_t, close: unsafe extern "C" fn(hid_t) -> herr_t, what: &str) -> anyhow::Result<Id> {
        ensure!(id >= 0, "could not create {}", what);
        Ok(Id { id, close })
    }
}

impl Drop for Id {
    fn drop(&mut self) {
        let close = self.close;
        let id = self.id;
        sync(|| unsafe { close(id) });
    }
}

fn check(e: herr_t, what: &str) -> anyhow::Result<()> {
    ensure!(e >= 0, "HDF5 failed to {}", what);
    Ok(())
}

fn cstr(name: &str) -> anyhow::Result<CString> {
    CString::new(name).map_err(|_| anyhow!("name {:?} contains a NUL byte", name))
}

fn plist(class: hid_t, what: &str) -> anyhow::Result<Id> {
    Id::new(unsafe { H5Pcreate(class) }, H5Pclose, what)
}

/// Class identifiers are only valid once the library is initialized.
fn classes() -> anyhow::Result<(hid_t, hid_t, hid_t)> {
    sync(|| unsafe {
        check(H5open(), "initialize the library")?;
        Ok((
            *H5P_CLS_FILE_CREATE,
            *H5P_CLS_GROUP_CREATE,
            *H5P_CLS_DATASET_CREATE,
        ))
    })
}

/// Create (or truncate) a file whose root group tracks the creation order of links and attributes.
pub(crate) fn create_file(path: &str) -> anyhow::Result<()> {
    let name = cstr(path)?;
    let (fcls, _, _) = classes()?;

    sync(|| unsafe {
        let fcpl = plist(fcls, "file creation properties")?;
        check(H5Pset_link_creation_order(fcpl.id, CRT_ORDER), "track link order")?;
        check(H5Pset_attr_creation_order(fcpl.id, CRT_ORDER), "track attribute order")?;

        let f = H5Fcreate(name.as_ptr(), H5F_ACC_TRUNC, fcpl.id, H5P_DEFAULT);
        ensure!(f >= 0, "could not create {}", path);
        check(H5Fclose(f), "close the new file")
    })
}

pub(crate) fn create_group(loc: hid_t, name: &str) -> anyhow::Result<()> {
    let cname = cstr(name)?;
    let (_, gcls, _) = classes()?;

    sync(|| unsafe {
        let gcpl = plist(gcls, "group creation properties")?;
        check(H5Pset_link_creation_order(gcpl.id, CRT_ORDER), "track link order")?;
        check(H5Pset_attr_creation_order(gcpl.id, CRT_ORDER), "track attribute order")?;

        let g = Id::new(
            H5Gcreate2(loc, cname.as_ptr(), H5P_DEFAULT, gcpl.id, H5P_DEFAULT),
            H5Gclose,
            name,
        )?;
        drop(g);
        Ok(())
    })
}

fn space(dims: &[u64], max_dims: &[u64]) -> anyhow::Result<Id> {
    let id = if dims.is_empty() {
        unsafe { H5Screate(H5S_class_t::H5S_SCALAR) }
    } else {
        unsafe { H5Screate_simple(dims.len() as c_int, dims.as_ptr(), max_dims.as_ptr()) }
    };
    Id::new(id, H5Sclose, "dataspace")
}

/// Create a dataset of file type `ftype`. The fill value of `spec` is given in the same type.
pub(crate) fn create_dataset(loc: hid_t, name: &str, ftype: hid_t, spec: &DatasetSpec) -> anyhow::Result<()> {
    let cname = cstr(name)?;
    let (_, _, dcls) = classes()?;

    sync(|| unsafe {
        let space = space(&spec.dims, &spec.max_dims)?;
        let dcpl = plist(dcls, "dataset creation properties")?;
        check(H5Pset_attr_creation_order(dcpl.id, CRT_ORDER), "track attribute order")?;

        if let Some(chunk) = &spec.chunk {
            check(
                H5Pset_chunk(dcpl.id, chunk.len() as c_int, chunk.as_ptr()),
                "set the chunk shape",
            )?;
        }
        if let Some(level) = spec.deflate {
            check(H5Pset_shuffle(dcpl.id), "add the shuffle filter")?;
            check(H5Pset_deflate(dcpl.id, level as c_uint), "add the deflate filter")?;
        }
        if let Some(fill) = &spec.fill {
            check(
                H5Pset_fill_value(dcpl.id, ftype, fill.as_ptr() as *const c_void),
                "set the fill value",
            )?;
        }

        let d = Id::new(
            H5Dcreate2(loc, cname.as_ptr(), ftype, space.id, H5P_DEFAULT, dcpl.id, H5P_DEFAULT),
            H5Dclose,
            name,
        )?;
        drop(d);
        Ok(())
    })
}

/// Create a scalar attribute of type `ftype`.
pub(crate) fn create_attribute(loc: hid_t, name: &str, ftype: hid_t) -> anyhow::Result<()> {
    let cname = cstr(name)?;

    sync(|| unsafe {
        let space = space(&[], &[])?;
        let a = Id::new(
            H5Acreate2(loc, cname.as_ptr(), ftype, space.id, H5P_DEFAULT, H5P_DEFAULT),
            H5Aclose,
            name,
        )?;
        drop(a);
        Ok(())
    })
}

/// Name at position `n` as reported by `get`, which follows the `H5*get_name_by_idx` convention of
/// returning the full length when given a too small buffer.
fn name_by_idx(get: impl Fn(*mut c_char, size_t) -> ssize_t) -> Option<String> {
    let len = get(ptr::null_mut(), 0);
    if len < 0 {
        return None;
    }

    let mut buf = vec![0u8; len as usize + 1];
    let n = get(buf.as_mut_ptr() as *mut c_char, buf.len());
    if n < 0 {
        return None;
    }
    buf.truncate(n as usize);
    String::from_utf8(buf).ok()
}

/// Names of the `count` links of group `loc` in creation order, `None` when the group does not track
/// it.
pub(crate) fn links_by_creation(loc: hid_t, count: usize) -> Option<Vec<String>> {
    sync(|| {
        (0..count)
            .map(|i| {
                name_by_idx(|buf, sz| unsafe {
                    H5Lget_name_by_idx(
                        loc,
                        b".\0".as_ptr() as *const c_char,
                        H5_index_t::H5_INDEX_CRT_ORDER,
                        H5_iter_order_t::H5_ITER_INC,
                        i as hsize_t,
                        buf,
                        sz,
                        H5P_DEFAULT,
                    )
                })
            })
            .collect()
    })
}

/// Names of the `count` attributes of `loc` in creation order, `None` when it is not tracked.
pub(crate) fn attributes_by_creation(loc: hid_t, count: usize) -> Option<Vec<String>> {
    sync(|| {
        (0..count)
            .map(|i| {
                name_by_idx(|buf, sz| unsafe {
                    H5Aget_name_by_idx(
                        loc,
                        b".\0".as_ptr() as *const c_char,
                        H5_index_t::H5_INDEX_CRT_ORDER,
                        H5_iter_order_t::H5_ITER_INC,
                        i as hsize_t,
                        buf,
                        sz,
                        H5P_DEFAULT,
                    )
                })
            })
            .collect()
    })
}

/// Current and maximum extents of dataset `dset`, unlimited axes as [`super::UNLIMITED`].
pub(crate) fn extents(dset: hid_t) -> anyhow::Result<(Vec<u64>, Vec<u64>)> {
    sync(|| unsafe {
        let space = Id::new(H5Dget_space(dset), H5Sclose, "dataspace")?;
        let rank = H5Sget_simple_extent_ndims(space.id);
        ensure!(rank >= 0, "could not read the rank of a dataspace");

        let mut dims = vec![0 as hsize_t; rank as usize];
        let mut max = vec![0 as hsize_t; rank as usize];
        ensure!(
            H5Sget_simple_extent_dims(space.id, dims.as_mut_ptr(), max.as_mut_ptr()) >= 0,
            "could not read the extents of a dataspace"
        );

        Ok((dims, max))
    })
}

pub(crate) fn set_extent(dset: hid_t, dims: &[u64]) -> anyhow::Result<()> {
    sync(|| check(unsafe { H5Dset_extent(dset, dims.as_ptr()) }, "change the extent"))
}

/// User defined fill value of `dset` converted to `mem`, `size` bytes.
pub(crate) fn fill_value(dset: hid_t, mem: hid_t, size: usize) -> anyhow::Result<Option<Vec<u8>>> {
    sync(|| unsafe {
        let dcpl = Id::new(H5Dget_create_plist(dset), H5Pclose, "dataset creation properties")?;

        let mut status = H5D_fill_value_t::H5D_FILL_VALUE_UNDEFINED;
        check(H5Pfill_value_defined(dcpl.id, &mut status), "query the fill value")?;
        if !matches!(status, H5D_fill_value_t::H5D_FILL_VALUE_USER_DEFINED) || size == 0 {
            return Ok(None);
        }

        let mut b = vec![0u8; size];
        check(
            H5Pget_fill_value(dcpl.id, mem, b.as_mut_ptr() as *mut c_void),
            "read the fill value",
        )?;
        Ok(Some(b))
    })
}

/// Direction of a transfer, with the memory buffer.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Io {
    Read(*mut c_void),
    Write(*const c_void),
}

/// Move the elements of `region` of dataset `dset` (current extents `dims`) to or from a buffer of
/// memory type `mem`.
///
/// # Safety
///
/// The buffer must hold `region.len()` elements of `mem`.
pub(crate) unsafe fn transfer_dataset(
    dset: hid_t,
    mem: hid_t,
    region: &Region,
    dims: &[u64],
    io: Io,
) -> anyhow::Result<()> {
    if region.is_empty() {
        return Ok(());
    }

    sync(|| {
        let whole = region.offset.iter().all(|o| *o == 0) && region.count.as_slice() == dims;

        // memory and file space, the whole dataset needs no selection
        let spaces = if whole {
            None
        } else {
            let file = Id::new(H5Dget_space(dset), H5Sclose, "dataspace")?;
            check(
                H5Sselect_hyperslab(
                    file.id,
                    H5S_seloper_t::H5S_SELECT_SET,
                    region.offset.as_ptr(),
                    ptr::null(),
                    region.count.as_ptr(),
                    ptr::null(),
                ),
                "select a region",
            )?;
            let n = [region.len()];
            let memory = space(&n, &n)?;
            Some((memory, file))
        };

        let (ms, fs) = spaces
            .as_ref()
            .map(|(m, f)| (m.id, f.id))
            .unwrap_or((H5S_ALL, H5S_ALL));

        match io {
            Io::Read(b) => check(H5Dread(dset, mem, ms, fs, H5P_DEFAULT, b), "read a dataset"),
            Io::Write(b) => check(H5Dwrite(dset, mem, ms, fs, H5P_DEFAULT, b), "write a dataset"),
        }
    })
}

/// Move the whole value of attribute `attr` to or from a buffer of memory type `mem`.
///
/// # Safety
///
/// The buffer must hold every element of the attribute in `mem`.
pub(crate) unsafe fn transfer_attribute(attr: hid_t, mem: hid_t, io: Io) -> anyhow::Result<()> {
    sync(|| match io {
        Io::Read(b) => check(H5Aread(attr, mem, b), "read an attribute"),
        Io::Write(b) => check(H5Awrite(attr, mem, b), "write an attribute"),
    })
}
