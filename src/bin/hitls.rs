//! List the groups, datasets and attributes of a container file.
use std::io::Write;

use clap::Parser;
use hitree::prelude::*;
use hitree::walk;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Container file
    input: std::path::PathBuf,

    /// Only list the group at this path, e.g. `/obs/buoys`
    #[arg(short, long)]
    group: Option<String>,

    /// Also list the attributes of every group
    #[arg(short, long)]
    attributes: bool,
}

fn list_attributes(g: &mut Group, path: &str, w: &mut dyn Write) -> anyhow::Result<()> {
    for name in g.attribute_names() {
        let a = g.attribute_mut(&name)?;
        match a.element().kind() {
            Some(_) => writeln!(w, "{path}@{name} = {}", a.value()?)?,
            None => writeln!(w, "{path}@{name}: record")?,
        }
    }

    for c in g.children_names() {
        if let Ok(sub) = g.group_mut(&c) {
            let p = format!("{}/{}", path.trim_end_matches('/'), c);
            list_attributes(sub, &p, w)?;
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut root = Group::open_reflected(&args.input, OpenMode::ReadOnly)?;

    let mut g = &mut root;
    let mut path = String::from("/");
    if let Some(p) = &args.group {
        for part in p.split('/').filter(|s| !s.is_empty()) {
            g = g.group_mut(part)?;
            path = format!("{}/{}", path.trim_end_matches('/'), part);
        }
    }

    let stdout = std::io::stdout();
    let mut w = stdout.lock();

    writeln!(w, "{}:", args.input.display())?;
    walk::print_tree(g, &mut w)?;

    if args.attributes {
        writeln!(w)?;
        list_attributes(g, &path, &mut w)?;
    }

    w.flush()?;
    drop(w);

    root.close()
}
