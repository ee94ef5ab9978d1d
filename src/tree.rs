//! The uniform capability set of every node in a tree.
//!
//! Groups, datasets at any depth of indexing, record members and attributes all implement
//! [`TreeNode`], which is all generic traversal code (see [`walk`](crate::walk)) relies on.
use crate::types::{PrimitiveKind, Value};

pub trait TreeNode {
    /// The kind of value this node holds if it is directly readable.
    fn is_leaf(&self) -> Option<PrimitiveKind>;

    /// Read the value of a leaf, `None` for nodes that are not leaves.
    fn read_leaf_value(&mut self) -> anyhow::Result<Option<Value>> {
        Ok(None)
    }

    fn can_index(&self) -> bool {
        false
    }

    /// The node of element `i`.
    fn index(&mut self, i: usize) -> anyhow::Result<&mut dyn TreeNode> {
        let _ = i;
        bail!("node cannot be indexed")
    }

    fn indexable_size(&self) -> usize {
        0
    }

    /// The primitive kind of the elements reached by indexing.
    fn element_kind(&self) -> Option<PrimitiveKind> {
        None
    }

    /// Size in bytes of everything below this node.
    fn bytes_below(&self) -> usize;

    /// Append everything below this node to `out`. Returns `false` for nodes that are not readable as a
    /// whole, leaving `out` untouched.
    fn read_all_below(&mut self, out: &mut Vec<u8>) -> anyhow::Result<bool>;

    /// The value currently held in memory, without touching storage.
    fn memory_value(&self) -> Option<Value> {
        None
    }

    fn children_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn child_by_name(&mut self, name: &str) -> Option<&mut dyn TreeNode> {
        let _ = name;
        None
    }
}

/// A bare value is a leaf.
impl TreeNode for Value {
    fn is_leaf(&self) -> Option<PrimitiveKind> {
        Some(self.kind())
    }

    fn read_leaf_value(&mut self) -> anyhow::Result<Option<Value>> {
        Ok(Some(self.clone()))
    }

    fn bytes_below(&self) -> usize {
        self.kind().size()
    }

    fn read_all_below(&mut self, out: &mut Vec<u8>) -> anyhow::Result<bool> {
        let n = out.len();
        out.resize(n + self.kind().size(), 0);
        self.encode(&mut out[n..]);
        Ok(true)
    }

    fn memory_value(&self) -> Option<Value> {
        Some(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_is_leaf() {
        let mut v = Value::I16(-2);
        let n: &mut dyn TreeNode = &mut v;

        assert_eq!(n.is_leaf(), Some(PrimitiveKind::I16));
        assert!(!n.can_index());
        assert!(n.index(0).is_err());
        assert_eq!(n.bytes_below(), 2);

        let mut b = vec![1];
        assert!(n.read_all_below(&mut b).unwrap());
        assert_eq!(b, vec![1, 0xfe, 0xff]);
        assert_eq!(n.read_leaf_value().unwrap(), Some(Value::I16(-2)));
    }
}
