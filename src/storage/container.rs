use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Context;

use super::h5;
use super::node::Session;
use super::GroupHandle;

/// An open container: an HDF5 file.
///
/// File backed containers are flushed on [`flush`](Container::flush) and on close, unless opened
/// read-only. In-memory containers use the core driver without a backing store and are never
/// persisted.
#[derive(Debug)]
pub struct Container {
    file: Option<hdf5::File>,
    path: Option<PathBuf>,
    name: String,
    root: GroupHandle,
    session: Rc<Session>,
}

impl Container {
    fn new(file: hdf5::File, path: Option<PathBuf>, name: String, read_only: bool) -> anyhow::Result<Container> {
        let session = Session::new(read_only);
        let root = GroupHandle::new(file.group("/")?, Rc::clone(&session), "/".into());

        Ok(Container {
            file: Some(file),
            path,
            name,
            root,
            session,
        })
    }

    /// Create a new container, truncating any existing file at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> anyhow::Result<Container> {
        let path = path.as_ref();
        log::debug!("creating container {}", path.display());

        let name = path.to_string_lossy().into_owned();
        h5::create_file(&name)?;
        let file = hdf5::File::open_rw(path)
            .with_context(|| format!("could not open {}", path.display()))?;

        Container::new(file, Some(path.into()), name, false)
    }

    /// Open an existing container file.
    pub fn open<P: AsRef<Path>>(path: P, read_only: bool) -> anyhow::Result<Container> {
        let path = path.as_ref();
        log::debug!(
            "opening container {} (read-only: {})",
            path.display(),
            read_only
        );

        let file = if read_only {
            hdf5::File::open(path)
        } else {
            hdf5::File::open_rw(path)
        }
        .with_context(|| format!("{} is not a readable container file", path.display()))?;

        Container::new(
            file,
            Some(path.into()),
            path.to_string_lossy().into_owned(),
            read_only,
        )
    }

    /// A container living only in memory, discarded when closed.
    pub fn in_memory(name: &str) -> anyhow::Result<Container> {
        static COUNT: AtomicUsize = AtomicUsize::new(0);

        log::debug!("creating in-memory container {name}");

        // the core driver needs an initial image: an empty file tracking creation order
        let skeleton = std::env::temp_dir().join(format!(
            "hitree-{}-{}.h5",
            std::process::id(),
            COUNT.fetch_add(1, Ordering::Relaxed)
        ));
        h5::create_file(&skeleton.to_string_lossy())?;

        let file = hdf5::File::with_options()
            .with_fapl(|p| p.core_filebacked(false))
            .open_rw(&skeleton);
        if let Err(e) = std::fs::remove_file(&skeleton) {
            log::warn!("could not remove {}: {e}", skeleton.display());
        }

        Container::new(file?, None, name.to_string(), false)
    }

    pub fn root(&self) -> GroupHandle {
        self.root.clone()
    }

    /// File name, or the name given to an in-memory container.
    pub fn filename(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_read_only(&self) -> bool {
        self.session.read_only
    }

    pub fn is_open(&self) -> bool {
        self.session.open.get()
    }

    /// Flush buffered writes to the backing file.
    pub fn flush(&self) -> anyhow::Result<()> {
        if self.session.read_only || !self.is_open() || self.path.is_none() {
            return Ok(());
        }

        if let Some(f) = &self.file {
            f.flush()?;
            log::debug!("flushed container {}", self.name);
        }
        Ok(())
    }

    /// Flush and invalidate every handle of this container.
    pub fn close(mut self) -> anyhow::Result<()> {
        self.close_inner()
    }

    fn close_inner(&mut self) -> anyhow::Result<()> {
        if !self.is_open() {
            return Ok(());
        }

        let r = self.flush();
        self.session.open.set(false);
        if let Some(f) = self.file.take() {
            f.close()?;
        }
        log::debug!("closed container {}", self.name);
        r
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        if let Err(e) = self.close_inner() {
            log::error!("failed to close container {}: {e:?}", self.name);
        }
    }
}
