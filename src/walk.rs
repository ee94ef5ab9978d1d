//! Generic traversal of any tree through [`TreeNode`].
use std::io::Write;

use crate::tree::TreeNode;
use crate::types::PrimitiveKind;

/// What [`TreeNode`] reports about one node.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    /// Names from the root joined by `/`, `[0]` for an indexed element.
    pub path: String,
    pub children: Vec<String>,
    pub leaf: Option<PrimitiveKind>,
    pub element_kind: Option<PrimitiveKind>,
    pub indexable_size: usize,
    pub bytes_below: usize,
}

fn join(path: &str, name: &str) -> String {
    if path.ends_with('/') {
        format!("{path}{name}")
    } else {
        format!("{path}/{name}")
    }
}

fn visit(node: &mut dyn TreeNode, path: String, out: &mut Vec<Summary>) -> anyhow::Result<()> {
    let children = node.children_names();
    let size = if node.can_index() {
        node.indexable_size()
    } else {
        0
    };

    out.push(Summary {
        path: path.clone(),
        children: children.clone(),
        leaf: node.is_leaf(),
        element_kind: node.element_kind(),
        indexable_size: size,
        bytes_below: node.bytes_below(),
    });

    for name in &children {
        let child = node
            .child_by_name(name)
            .ok_or_else(|| anyhow!("{} lists {} but does not resolve it", path, name))?;
        visit(child, join(&path, name), out)?;
    }

    if size > 0 {
        visit(node.index(0)?, format!("{path}[0]"), out)?;
    }

    Ok(())
}

/// Depth-first summaries of `node` and everything below it. Indexable nodes are followed through
/// their first element only.
pub fn summarize(node: &mut dyn TreeNode) -> anyhow::Result<Vec<Summary>> {
    let mut out = Vec::new();
    visit(node, "/".into(), &mut out)?;
    Ok(out)
}

fn print_node(
    node: &mut dyn TreeNode,
    name: &str,
    depth: usize,
    values: bool,
    w: &mut dyn Write,
) -> anyhow::Result<()> {
    let indent = "  ".repeat(depth);

    if let Some(k) = node.is_leaf() {
        match values.then(|| node.read_leaf_value()).transpose()?.flatten() {
            Some(v) => writeln!(w, "{indent}{name}: {k} = {v}")?,
            None => writeln!(w, "{indent}{name}: {k}")?,
        }
        return Ok(());
    }

    if node.can_index() {
        let kind = node
            .element_kind()
            .map(|k| k.to_string())
            .unwrap_or_else(|| "record".into());

        // collect the extents by following the first element down to the scalar
        let mut shape = Vec::new();
        let mut n: &mut dyn TreeNode = node;
        while n.can_index() {
            let size = n.indexable_size();
            shape.push(size);
            if size == 0 {
                break;
            }
            n = n.index(0)?;
        }

        writeln!(w, "{indent}{name}: {kind} {shape:?}")?;
        if !n.can_index() {
            for c in n.children_names() {
                if let Some(child) = n.child_by_name(&c) {
                    print_node(child, &c, depth + 1, false, w)?;
                }
            }
        }
        return Ok(());
    }

    writeln!(w, "{indent}{name}/")?;
    for c in node.children_names() {
        if let Some(child) = node.child_by_name(&c) {
            print_node(child, &c, depth + 1, values, w)?;
        }
    }
    Ok(())
}

/// Write an indented listing of the tree below `node`. Scalars are printed with their value, the
/// members of indexed elements only with their kind.
pub fn print_tree(node: &mut dyn TreeNode, w: &mut dyn Write) -> anyhow::Result<()> {
    print_node(node, "", 0, true, w)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Dataset, Shape};
    use crate::group::Group;
    use crate::record::{MemberType, RecordType};

    fn tree() -> Group {
        let rec = RecordType::new()
            .with("id", MemberType::Primitive(PrimitiveKind::U32))
            .unwrap()
            .with("w", MemberType::array(MemberType::Primitive(PrimitiveKind::F32), 2))
            .unwrap();

        let mut root = Group::root();
        root.add(Dataset::primitive::<i16>("grid", Shape::fixed(&[2, 3])).unwrap())
            .unwrap();
        root.add(
            Group::new("obs")
                .unwrap()
                .with(Dataset::records("samples", &rec, Shape::fixed(&[4])).unwrap())
                .unwrap()
                .with(Dataset::text("title", Shape::scalar()).unwrap())
                .unwrap(),
        )
        .unwrap();
        root
    }

    #[test]
    fn summaries() {
        let mut root = tree();
        let s = summarize(&mut root).unwrap();
        let paths: Vec<_> = s.iter().map(|s| s.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "/",
                "/grid",
                "/grid[0]",
                "/grid[0][0]",
                "/obs",
                "/obs/samples",
                "/obs/samples[0]",
                "/obs/samples[0]/id",
                "/obs/samples[0]/w",
                "/obs/samples[0]/w[0]",
                "/obs/title",
            ]
        );

        assert_eq!(s[1].indexable_size, 2);
        assert_eq!(s[1].bytes_below, 12);
        assert_eq!(s[2].bytes_below, 6);
        assert_eq!(s[3].leaf, Some(PrimitiveKind::I16));
        assert_eq!(s[5].bytes_below, 4 * 12);
        assert_eq!(s[5].element_kind, None);
        assert_eq!(s[6].children, vec!["id", "w"]);
        assert_eq!(s[8].indexable_size, 2);
        assert_eq!(s[10].leaf, Some(PrimitiveKind::Text));
    }

    #[test]
    fn listing() {
        let mut root = tree();
        root.group_mut("obs")
            .unwrap()
            .text_mut("title")
            .unwrap()
            .set_text("buoys")
            .unwrap();

        let mut b = Vec::new();
        print_tree(&mut root, &mut b).unwrap();
        let s = String::from_utf8(b).unwrap();
        assert_eq!(
            s,
            "/\n  grid: int16 [2, 3]\n  obs/\n    samples: record [4]\n      id: uint32\n      w: float32 [2]\n    title: text = buoys\n"
        );
    }
}
