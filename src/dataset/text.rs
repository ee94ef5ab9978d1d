//! Variable-length text datasets.
//!
//! Text datasets use the same accessor chain and selection as fixed-width datasets, but move lists of
//! strings instead of byte buffers.
use super::accessor::{Accessor, ElementType};
use super::dataset::{Dataset, Shape};
use crate::error::Error;
use crate::types::{PrimitiveKind, Value};

impl Dataset {
    /// Dataset of variable-length text.
    pub fn text(name: &str, layout: Shape) -> anyhow::Result<Dataset> {
        Dataset::new(name, ElementType::Primitive(PrimitiveKind::Text), layout)
    }

    pub fn is_text(&self) -> bool {
        self.element().is_text()
    }
}

impl Accessor {
    fn check_text(&self) -> anyhow::Result<()> {
        if !self.element().is_text() {
            return Err(Error::KindMismatch {
                expected: "a text dataset".into(),
                got: match self.element().kind() {
                    Some(k) => format!("a dataset of {k}"),
                    None => "a record dataset".into(),
                },
            }
            .into());
        }
        Ok(())
    }

    /// Read every text value below this accessor. Unbound datasets read empty strings.
    pub fn read_text(&self) -> anyhow::Result<Vec<String>> {
        self.check_text()?;
        let io = self.select()?;
        let mut values = io.borrow().read_text()?;
        values.resize(self.element_count() as usize, String::new());
        Ok(values)
    }

    /// Write one text value per element below this accessor.
    pub fn write_text<S: AsRef<str>>(&self, values: &[S]) -> anyhow::Result<()> {
        self.check_text()?;
        self.check_count(values.len())?;
        let values: Vec<String> = values.iter().map(|s| s.as_ref().to_string()).collect();
        let io = self.select()?;
        let r = io.borrow().write_text(&values);
        r
    }

    /// Text of a scalar accessor.
    pub fn get_text(&mut self) -> anyhow::Result<String> {
        self.check_text()?;
        match self.value()? {
            Value::Text(s) => Ok(s),
            v => Ok(v.to_string()),
        }
    }

    pub fn set_text(&mut self, text: &str) -> anyhow::Result<()> {
        self.check_text()?;
        self.set_value(Value::from(text))
    }

    /// Grow the axis of this accessor by one and write `values` into the new slot.
    pub fn extend_once_and_write_text<S: AsRef<str>>(&mut self, values: &[S]) -> anyhow::Result<()> {
        self.check_text()?;
        let values: Vec<String> = values.iter().map(|s| s.as_ref().to_string()).collect();
        let (io, old) = self.extend_once()?;
        let r = io.borrow().write_text_with_offset(old, &values);
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Container, UNLIMITED};

    #[test]
    fn unbound_text_is_latched() {
        let mut ds = Dataset::text("s", Shape::scalar()).unwrap();
        assert_eq!(ds.get_text().unwrap(), "");
        ds.set_text("draft").unwrap();
        assert_eq!(ds.get_text().unwrap(), "draft");
        assert!(ds.read_raw().is_err());
    }

    #[test]
    fn rows_of_text() {
        let c = Container::in_memory("text").unwrap();
        let mut ds = Dataset::text("names", Shape::extendible(&[2], &[UNLIMITED], &[4])).unwrap();
        ds.create_in(&c.root()).unwrap();

        ds.write_text(&["a", "b"]).unwrap();
        ds.extend_once_and_write_text(&["c"]).unwrap();
        assert_eq!(ds.read_text().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(ds.index(1).unwrap().get_text().unwrap(), "b");

        let e = ds.write_text(&["x"]).unwrap_err();
        assert!(matches!(
            e.downcast_ref::<Error>(),
            Some(Error::ElementCountMismatch { expected: 3, got: 1 })
        ));

        let mut n = Dataset::primitive::<u8>("n", Shape::scalar()).unwrap();
        assert!(n.set_text("x").is_err());
    }
}
