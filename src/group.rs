//! Groups: the named nodes holding datasets, attributes and other groups.
//!
//! A tree is declared first and bound to a container afterwards:
//!
//! ```
//! use hitree::prelude::*;
//!
//! let mut root = Group::root();
//! root.add(Dataset::primitive::<f32>("temperature", Shape::fixed(&[2, 3])).unwrap())
//!     .unwrap();
//! root.open_in_memory("demo").unwrap();
//!
//! let t = root.dataset_mut("temperature").unwrap();
//! t.index(1).unwrap().index(2).unwrap().set(21.5f32).unwrap();
//! assert_eq!(t.read::<f32>().unwrap()[5], 21.5);
//!
//! root.close().unwrap();
//! ```
use std::path::Path;

use anyhow::Context;

use crate::attribute::Attribute;
use crate::dataset::Dataset;
use crate::error::Error;
use crate::storage::{Container, GroupHandle};
use crate::tree::TreeNode;
use crate::types::{PrimitiveKind, Value};

/// How a root group gets its container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Create a new file, truncating an existing one, and create every declared object in it.
    Create,

    /// Open an existing file and every declared object in it.
    ReadWrite,

    ReadOnly,

    /// Create every declared object in a container that is never written to disk.
    InMemory,
}

impl OpenMode {
    fn creates(&self) -> bool {
        matches!(self, OpenMode::Create | OpenMode::InMemory)
    }
}

/// A child of a group.
#[derive(Debug)]
pub enum Member {
    Group(Group),
    Dataset(Dataset),
    Attribute(Attribute),
}

impl Member {
    pub fn name(&self) -> &str {
        match self {
            Member::Group(g) => g.name(),
            Member::Dataset(d) => d.name(),
            Member::Attribute(a) => a.name(),
        }
    }

    fn is_attribute(&self) -> bool {
        matches!(self, Member::Attribute(_))
    }

    fn bind(&mut self, h: &GroupHandle, create: bool) -> anyhow::Result<()> {
        match (self, create) {
            (Member::Group(g), true) => {
                let child = h.create_group(&g.name)?;
                g.bind(child, true)
            }
            (Member::Group(g), false) => {
                let child = h.open_group(&g.name)?;
                g.bind(child, false)
            }
            (Member::Dataset(d), true) => d.create_in(h),
            (Member::Dataset(d), false) => d.open_in(h),
            (Member::Attribute(a), true) => a.create_on(h),
            (Member::Attribute(a), false) => a.open_on(h),
        }
    }

    fn unbind(&mut self) -> anyhow::Result<()> {
        match self {
            Member::Group(g) => g.unbind(),
            Member::Dataset(d) => d.close(),
            Member::Attribute(a) => {
                a.unbind();
                Ok(())
            }
        }
    }

    fn commit_pending(&mut self) -> anyhow::Result<()> {
        match self {
            Member::Group(g) => g.commit_pending(),
            Member::Dataset(d) => d.commit_pending(),
            Member::Attribute(_) => Ok(()),
        }
    }
}

impl From<Group> for Member {
    fn from(g: Group) -> Member {
        Member::Group(g)
    }
}

impl From<Dataset> for Member {
    fn from(d: Dataset) -> Member {
        Member::Dataset(d)
    }
}

impl From<Attribute> for Member {
    fn from(a: Attribute) -> Member {
        Member::Attribute(a)
    }
}

/// A named group of datasets, attributes and groups.
///
/// The root group owns the container. Every other group only holds the handle of its storage group,
/// which is valid as long as the root is open.
#[derive(Debug)]
pub struct Group {
    name: String,
    members: Vec<Member>,
    handle: Option<GroupHandle>,
    container: Option<Container>,
    root: bool,
}

impl Group {
    /// An empty root group.
    pub fn root() -> Group {
        Group {
            name: "/".into(),
            members: Vec::new(),
            handle: None,
            container: None,
            root: true,
        }
    }

    pub fn new(name: &str) -> anyhow::Result<Group> {
        ensure!(
            !name.is_empty() && !name.contains('/'),
            "invalid group name: {:?}",
            name
        );

        Ok(Group {
            name: name.to_string(),
            members: Vec::new(),
            handle: None,
            container: None,
            root: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_root(&self) -> bool {
        self.root
    }

    /// Whether the group is bound to an open container.
    pub fn is_open(&self) -> bool {
        self.handle.as_ref().map(|h| h.is_valid()).unwrap_or(false)
    }

    /// Path in the container, when bound.
    pub fn path(&self) -> Option<&str> {
        self.handle.as_ref().map(|h| h.path())
    }

    /// Name of the container file of a root group.
    pub fn filename(&self) -> Option<&str> {
        self.container.as_ref().map(|c| c.filename())
    }

    pub fn container(&self) -> Option<&Container> {
        self.container.as_ref()
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    fn check_new_member(&self, m: &Member) -> anyhow::Result<()> {
        let taken = self
            .members
            .iter()
            .any(|o| o.is_attribute() == m.is_attribute() && o.name() == m.name());
        ensure!(
            !taken,
            "{} already declared in group {}",
            m.name(),
            self.name
        );
        if let Member::Group(g) = m {
            ensure!(!g.root, "a root group cannot be a member");
        }
        Ok(())
    }

    /// Declare a member. Members of an open group are added with
    /// [`adopt_and_create`](Group::adopt_and_create) or [`adopt_and_open`](Group::adopt_and_open).
    pub fn add(&mut self, member: impl Into<Member>) -> anyhow::Result<()> {
        let member = member.into();
        ensure!(
            self.handle.is_none(),
            "group {} is bound, adopt {} instead",
            self.name,
            member.name()
        );
        self.check_new_member(&member)?;
        self.members.push(member);
        Ok(())
    }

    pub fn with(mut self, member: impl Into<Member>) -> anyhow::Result<Group> {
        self.add(member)?;
        Ok(self)
    }

    fn adopt(&mut self, member: Member, create: bool) -> anyhow::Result<()> {
        let mut member = member;
        self.check_new_member(&member)?;

        let Some(h) = self.handle.as_ref().filter(|h| h.is_valid()) else {
            return Err(Error::Closed.into());
        };
        member
            .bind(h, create)
            .with_context(|| format!("binding {} in {}", member.name(), h.path()))?;

        self.members.push(member);
        Ok(())
    }

    /// Add a member to an open group and create it in the container.
    pub fn adopt_and_create(&mut self, member: impl Into<Member>) -> anyhow::Result<()> {
        self.adopt(member.into(), true)
    }

    /// Add a member to an open group and open it from the container.
    pub fn adopt_and_open(&mut self, member: impl Into<Member>) -> anyhow::Result<()> {
        self.adopt(member.into(), false)
    }

    /// Create the container file at `path` and every declared object in it.
    pub fn create<P: AsRef<Path>>(&mut self, path: P) -> anyhow::Result<()> {
        self.open(path, OpenMode::Create)
    }

    /// Open a container for a declared root group and bind every member.
    pub fn open<P: AsRef<Path>>(&mut self, path: P, mode: OpenMode) -> anyhow::Result<()> {
        let path = path.as_ref();
        let c = match mode {
            OpenMode::Create => Container::create(path)?,
            OpenMode::ReadWrite => Container::open(path, false)?,
            OpenMode::ReadOnly => Container::open(path, true)?,
            OpenMode::InMemory => Container::in_memory(&path.to_string_lossy())?,
        };
        self.attach(c, mode.creates())
    }

    pub fn open_in_memory(&mut self, name: &str) -> anyhow::Result<()> {
        self.open(name, OpenMode::InMemory)
    }

    /// Take ownership of an open container and bind the tree to its root.
    pub(crate) fn attach(&mut self, c: Container, create: bool) -> anyhow::Result<()> {
        ensure!(self.root, "only a root group can own a container");
        ensure!(!self.is_open(), "group {} is already open", self.name);

        log::debug!(
            "binding tree to {} ({})",
            c.filename(),
            if create { "create" } else { "open" }
        );

        let h = c.root();
        self.container = Some(c);

        if let Err(e) = self.bind(h, create) {
            if let Err(u) = self.unbind() {
                log::error!("failed to unbind after failed bind: {u:?}");
            }
            self.container = None;
            return Err(e);
        }
        Ok(())
    }

    fn bind(&mut self, h: GroupHandle, create: bool) -> anyhow::Result<()> {
        for m in &mut self.members {
            m.bind(&h, create)
                .with_context(|| format!("binding {} in {}", m.name(), h.path()))?;
        }
        self.handle = Some(h);
        Ok(())
    }

    /// Release the handles of the members, then of this group.
    fn unbind(&mut self) -> anyhow::Result<()> {
        let mut r = Ok(());
        for m in &mut self.members {
            let u = m.unbind();
            if r.is_ok() {
                r = u;
            }
        }
        self.handle = None;
        r
    }

    fn commit_pending(&mut self) -> anyhow::Result<()> {
        for m in &mut self.members {
            m.commit_pending()?;
        }
        Ok(())
    }

    /// Write back pending changes and flush the container of a root group.
    pub fn flush(&mut self) -> anyhow::Result<()> {
        self.commit_pending()?;
        match &self.container {
            Some(c) => c.flush(),
            None => Ok(()),
        }
    }

    /// Unbind the whole tree and close the container. The declared tree is kept and can be opened again.
    pub fn close(&mut self) -> anyhow::Result<()> {
        ensure!(self.root, "only the root group can be closed");

        let mut r = self.unbind();
        if let Some(c) = self.container.take() {
            let name = c.filename().to_string();
            let cr = c.close();
            if r.is_ok() {
                r = cr;
            }
            log::debug!("closed tree of {name}");
        }
        r
    }

    fn find(&self, name: &str, attribute: bool) -> Option<&Member> {
        self.members
            .iter()
            .find(|m| m.is_attribute() == attribute && m.name() == name)
    }

    fn find_mut(&mut self, name: &str, attribute: bool) -> Option<&mut Member> {
        self.members
            .iter_mut()
            .find(|m| m.is_attribute() == attribute && m.name() == name)
    }

    fn not_found(&self, what: &str, name: &str) -> anyhow::Error {
        let at = self.path().unwrap_or(&self.name);
        Error::NotFound(format!("{what} {name} in {at}")).into()
    }

    pub fn group(&self, name: &str) -> anyhow::Result<&Group> {
        match self.find(name, false) {
            Some(Member::Group(g)) => Ok(g),
            _ => Err(self.not_found("group", name)),
        }
    }

    pub fn group_mut(&mut self, name: &str) -> anyhow::Result<&mut Group> {
        let e = self.not_found("group", name);
        match self.find_mut(name, false) {
            Some(Member::Group(g)) => Ok(g),
            _ => Err(e),
        }
    }

    /// A dataset of primitives or records.
    pub fn dataset(&self, name: &str) -> anyhow::Result<&Dataset> {
        match self.find(name, false) {
            Some(Member::Dataset(d)) if !d.is_text() => Ok(d),
            _ => Err(self.not_found("dataset", name)),
        }
    }

    pub fn dataset_mut(&mut self, name: &str) -> anyhow::Result<&mut Dataset> {
        let e = self.not_found("dataset", name);
        match self.find_mut(name, false) {
            Some(Member::Dataset(d)) if !d.is_text() => Ok(d),
            _ => Err(e),
        }
    }

    /// A dataset of text.
    pub fn text(&self, name: &str) -> anyhow::Result<&Dataset> {
        match self.find(name, false) {
            Some(Member::Dataset(d)) if d.is_text() => Ok(d),
            _ => Err(self.not_found("text dataset", name)),
        }
    }

    pub fn text_mut(&mut self, name: &str) -> anyhow::Result<&mut Dataset> {
        let e = self.not_found("text dataset", name);
        match self.find_mut(name, false) {
            Some(Member::Dataset(d)) if d.is_text() => Ok(d),
            _ => Err(e),
        }
    }

    pub fn attribute(&self, name: &str) -> anyhow::Result<&Attribute> {
        match self.find(name, true) {
            Some(Member::Attribute(a)) => Ok(a),
            _ => Err(self.not_found("attribute", name)),
        }
    }

    pub fn attribute_mut(&mut self, name: &str) -> anyhow::Result<&mut Attribute> {
        let e = self.not_found("attribute", name);
        match self.find_mut(name, true) {
            Some(Member::Attribute(a)) => Ok(a),
            _ => Err(e),
        }
    }

    pub fn attribute_names(&self) -> Vec<String> {
        self.members
            .iter()
            .filter(|m| m.is_attribute())
            .map(|m| m.name().to_string())
            .collect()
    }
}

impl Drop for Group {
    fn drop(&mut self) {
        if self.root && self.container.is_some() {
            if let Err(e) = self.close() {
                log::error!("failed to close group {}: {e:?}", self.name);
            }
        }
    }
}

impl TreeNode for Group {
    fn is_leaf(&self) -> Option<PrimitiveKind> {
        None
    }

    fn read_leaf_value(&mut self) -> anyhow::Result<Option<Value>> {
        Ok(None)
    }

    fn bytes_below(&self) -> usize {
        0
    }

    fn read_all_below(&mut self, _out: &mut Vec<u8>) -> anyhow::Result<bool> {
        Ok(false)
    }

    /// Groups and datasets in declaration order. Attributes are not children.
    fn children_names(&self) -> Vec<String> {
        self.members
            .iter()
            .filter(|m| !m.is_attribute())
            .map(|m| m.name().to_string())
            .collect()
    }

    fn child_by_name(&mut self, name: &str) -> Option<&mut dyn TreeNode> {
        match self.find_mut(name, false)? {
            Member::Group(g) => Some(g),
            Member::Dataset(d) => Some(d),
            Member::Attribute(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Shape;

    fn tree() -> Group {
        Group::root()
            .with(Dataset::primitive::<i32>("a", Shape::fixed(&[4])).unwrap())
            .unwrap()
            .with(
                Group::new("sub")
                    .unwrap()
                    .with(Dataset::text("s", Shape::scalar()).unwrap())
                    .unwrap()
                    .with(Attribute::primitive::<u16>("version").unwrap())
                    .unwrap(),
            )
            .unwrap()
    }

    #[test]
    fn declare_and_lookup() {
        let mut g = tree();
        assert_eq!(g.children_names(), vec!["a", "sub"]);
        assert!(g.dataset("a").is_ok());
        assert!(g.text("a").is_err());
        assert!(g.group("a").is_err());

        let sub = g.group_mut("sub").unwrap();
        assert!(sub.text("s").is_ok());
        assert!(sub.dataset("s").is_err());
        assert_eq!(sub.attribute_names(), vec!["version"]);
        assert_eq!(sub.children_names(), vec!["s"]);

        let e = g
            .add(Dataset::primitive::<u8>("a", Shape::scalar()).unwrap())
            .unwrap_err();
        assert!(e.to_string().contains("already declared"));
        assert!(g.add(Group::root()).is_err());

        let mut n = Group::new("n").unwrap();
        assert!(n.open_in_memory("x").is_err());
        assert!(n.close().is_err());
    }

    #[test]
    fn bind_and_close() {
        let mut g = tree();
        g.open_in_memory("groups").unwrap();
        assert!(g.is_open());
        assert_eq!(g.group("sub").unwrap().path(), Some("/sub"));
        assert_eq!(g.filename(), Some("groups"));

        g.group_mut("sub")
            .unwrap()
            .attribute_mut("version")
            .unwrap()
            .set(3u16)
            .unwrap();

        g.adopt_and_create(Dataset::primitive::<f64>("late", Shape::fixed(&[2])).unwrap())
            .unwrap();
        g.dataset_mut("late").unwrap().write(&[1.0, 2.0]).unwrap();
        assert!(g.add(Group::new("x").unwrap()).is_err());

        g.close().unwrap();
        assert!(!g.is_open());
        assert!(!g.dataset("late").unwrap().is_bound());

        // the declared tree stays usable in memory
        let late = g.dataset_mut("late").unwrap();
        assert_eq!(late.read::<f64>().unwrap(), vec![0.0, 0.0]);
    }

    #[test]
    fn open_missing_member_fails() {
        let path = std::env::temp_dir().join(format!("hitree-group-{}.h5", std::process::id()));

        let mut g = Group::root();
        g.create(&path).unwrap();
        g.close().unwrap();

        let mut t = tree();
        let e = t.open(&path, OpenMode::ReadOnly).unwrap_err();
        assert!(e.chain().any(|c| matches!(
            c.downcast_ref::<Error>(),
            Some(Error::NotFound(_))
        )));
        assert!(!t.is_open());
        assert!(t.container().is_none());

        std::fs::remove_file(&path).ok();
    }
}
