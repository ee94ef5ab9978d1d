//! Whole-value attributes of groups and datasets.
use crate::dataset::ElementType;
use crate::error::Error;
use crate::record::{Compound, Record, RecordType};
use crate::storage::{AttributeHandle, DatasetHandle, GroupHandle};
use crate::tree::TreeNode;
use crate::types::{Datatype, Primitive, PrimitiveKind, Value};

/// Objects that attributes can be attached to.
pub(crate) trait AttributeHost {
    fn create_attribute(&self, name: &str, dtype: &Datatype) -> anyhow::Result<AttributeHandle>;

    fn open_attribute(&self, name: &str) -> anyhow::Result<AttributeHandle>;
}

impl AttributeHost for GroupHandle {
    fn create_attribute(
        &self,
        name: &str,
        dtype: &Datatype,
    ) -> anyhow::Result<AttributeHandle> {
        GroupHandle::create_attribute(self, name, dtype)
    }

    fn open_attribute(&self, name: &str) -> anyhow::Result<AttributeHandle> {
        GroupHandle::open_attribute(self, name)
    }
}

impl AttributeHost for DatasetHandle {
    fn create_attribute(
        &self,
        name: &str,
        dtype: &Datatype,
    ) -> anyhow::Result<AttributeHandle> {
        DatasetHandle::create_attribute(self, name, dtype)
    }

    fn open_attribute(&self, name: &str) -> anyhow::Result<AttributeHandle> {
        DatasetHandle::open_attribute(self, name)
    }
}

#[derive(Debug, Clone)]
enum Held {
    Value(Value),
    Record(Record),
}

/// A single primitive, record or text value attached to a group or dataset.
///
/// Attributes are never sliced: every read and write moves the whole value. Before the owner is bound
/// the attribute only holds its value in memory.
#[derive(Debug, Clone)]
pub struct Attribute {
    name: String,
    element: ElementType,
    held: Held,
    handle: Option<AttributeHandle>,
}

impl Attribute {
    pub fn new(name: &str, element: ElementType) -> anyhow::Result<Attribute> {
        ensure!(!name.is_empty(), "attribute without a name");

        let held = match &element {
            ElementType::Primitive(k) => Held::Value(Value::zero(*k)),
            ElementType::Record(r) => Held::Record(Record::new(r)?),
        };

        Ok(Attribute {
            name: name.to_string(),
            element,
            held,
            handle: None,
        })
    }

    pub fn primitive<T: Primitive>(name: &str) -> anyhow::Result<Attribute> {
        Attribute::new(name, ElementType::Primitive(T::KIND))
    }

    pub fn compound<C: Compound>(name: &str) -> anyhow::Result<Attribute> {
        Attribute::new(name, ElementType::Record(C::record_type()))
    }

    pub fn records(name: &str, ty: &RecordType) -> anyhow::Result<Attribute> {
        Attribute::new(name, ElementType::Record(ty.clone()))
    }

    pub fn text(name: &str) -> anyhow::Result<Attribute> {
        Attribute::new(name, ElementType::Primitive(PrimitiveKind::Text))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn element(&self) -> &ElementType {
        &self.element
    }

    pub fn is_bound(&self) -> bool {
        self.handle.is_some()
    }

    pub(crate) fn create_on(&mut self, host: &impl AttributeHost) -> anyhow::Result<()> {
        let h = host.create_attribute(&self.name, &self.element.datatype())?;
        self.handle = Some(h);

        // values set before creation are written out
        self.write()
    }

    pub(crate) fn open_on(&mut self, host: &impl AttributeHost) -> anyhow::Result<()> {
        self.handle = Some(host.open_attribute(&self.name)?);
        Ok(())
    }

    pub(crate) fn unbind(&mut self) {
        self.handle = None;
    }

    /// Read the stored value into memory.
    pub fn read(&mut self) -> anyhow::Result<()> {
        let Some(h) = &self.handle else {
            log::trace!("read of unbound attribute {} ignored", self.name);
            return Ok(());
        };

        match &mut self.held {
            Held::Value(Value::Text(s)) => *s = h.read_text()?,
            Held::Value(v) => {
                let k = v.kind();
                let mut b = vec![0u8; k.size()];
                h.read(&k.datatype(), &mut b)?;
                *v = Value::decode(k, &b);
            }
            Held::Record(r) => {
                let mut b = vec![0u8; r.total_size()];
                h.read(&r.datatype(), &mut b)?;
                r.from_bytes(&b)?;
            }
        }
        Ok(())
    }

    /// Write the value held in memory.
    pub fn write(&mut self) -> anyhow::Result<()> {
        let Some(h) = &self.handle else {
            log::trace!("write of unbound attribute {} ignored", self.name);
            return Ok(());
        };

        match &self.held {
            Held::Value(Value::Text(s)) => h.write_text(s),
            Held::Value(v) => {
                let k = v.kind();
                let mut b = vec![0u8; k.size()];
                v.encode(&mut b);
                h.write(&k.datatype(), &b)
            }
            Held::Record(r) => h.write(&r.datatype(), &r.to_bytes()),
        }
    }

    pub fn value(&mut self) -> anyhow::Result<Value> {
        self.read()?;
        match &self.held {
            Held::Value(v) => Ok(v.clone()),
            Held::Record(_) => Err(Error::KindMismatch {
                expected: "a primitive attribute".into(),
                got: "a record attribute".into(),
            }
            .into()),
        }
    }

    pub fn set_value(&mut self, value: Value) -> anyhow::Result<()> {
        let Held::Value(v) = &mut self.held else {
            return Err(Error::KindMismatch {
                expected: "a record attribute".into(),
                got: value.kind().to_string(),
            }
            .into());
        };

        let k = v.kind();
        *v = value.cast(k).ok_or_else(|| Error::KindMismatch {
            expected: k.to_string(),
            got: value.kind().to_string(),
        })?;
        self.write()
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

    pub fn get_text(&mut self) -> anyhow::Result<String> {
        match self.value()? {
            Value::Text(s) => Ok(s),
            v => Err(Error::KindMismatch {
                expected: "text".into(),
                got: v.kind().to_string(),
            }
            .into()),
        }
    }

    pub fn set_text(&mut self, text: &str) -> anyhow::Result<()> {
        self.set_value(Value::from(text))
    }

    /// Read and return the record value.
    pub fn read_record(&mut self) -> anyhow::Result<&Record> {
        self.read()?;
        match &self.held {
            Held::Record(r) => Ok(r),
            Held::Value(v) => Err(Error::KindMismatch {
                expected: "a record attribute".into(),
                got: v.kind().to_string(),
            }
            .into()),
        }
    }

    pub fn write_record(&mut self, record: &Record) -> anyhow::Result<()> {
        let Held::Record(r) = &mut self.held else {
            bail!("attribute {} does not hold a record", self.name);
        };
        ensure!(
            r.record_type() == record.record_type(),
            "record does not match the record type of attribute {}",
            self.name
        );

        r.from_bytes(&record.to_bytes())?;
        self.write()
    }

    pub fn read_compound<C: Compound>(&mut self) -> anyhow::Result<C> {
        self.read_record()?.to_compound()
    }

    pub fn write_compound<C: Compound>(&mut self, value: &C) -> anyhow::Result<()> {
        self.write_record(&Record::from_compound(value)?)
    }

    /// Copy the value of `other`.
    pub fn assign_from(&mut self, other: &mut Attribute) -> anyhow::Result<()> {
        other.read()?;
        match &other.held {
            Held::Value(v) => self.set_value(v.clone()),
            Held::Record(r) => {
                let r = r.clone();
                self.write_record(&r)
            }
        }
    }
}

impl TreeNode for Attribute {
    fn is_leaf(&self) -> Option<PrimitiveKind> {
        self.element.kind()
    }

    fn read_leaf_value(&mut self) -> anyhow::Result<Option<Value>> {
        if self.element.kind().is_some() {
            self.value().map(Some)
        } else {
            Ok(None)
        }
    }

    fn element_kind(&self) -> Option<PrimitiveKind> {
        self.element.kind()
    }

    fn bytes_below(&self) -> usize {
        self.element.size()
    }

    fn read_all_below(&mut self, out: &mut Vec<u8>) -> anyhow::Result<bool> {
        self.read()?;
        match &self.held {
            Held::Value(Value::Text(_)) => Ok(false),
            Held::Value(v) => {
                let n = out.len();
                out.resize(n + v.kind().size(), 0);
                v.encode(&mut out[n..]);
                Ok(true)
            }
            Held::Record(r) => {
                r.serialize(out);
                Ok(true)
            }
        }
    }

    fn memory_value(&self) -> Option<Value> {
        match &self.held {
            Held::Value(v) => Some(v.clone()),
            Held::Record(_) => None,
        }
    }

    fn children_names(&self) -> Vec<String> {
        match &self.held {
            Held::Record(r) => r.names(),
            Held::Value(_) => Vec::new(),
        }
    }

    fn child_by_name(&mut self, name: &str) -> Option<&mut dyn TreeNode> {
        match &mut self.held {
            Held::Record(r) => r.child_by_name(name),
            Held::Value(_) => None,
        }
    }
}
