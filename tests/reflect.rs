use hitree::prelude::*;
use hitree::walk::{print_tree, summarize};

hitree::compound! {
    pub struct Pair {
        a: i16,
        b: f64,
    }
}

hitree::compound! {
    pub struct Station {
        id: u32,
        name: [u8; 8],
        location: Pair,
        history: [Pair; 4],
    }
}

fn declared() -> Group {
    let mut root = Group::root();
    root.add(
        Dataset::primitive::<f32>("temperature", Shape::extendible(&[2, 3, 4], &[UNLIMITED, 3, 4], &[1, 3, 4]))
            .unwrap()
            .with_attribute(Attribute::text("units").unwrap())
            .unwrap(),
    )
    .unwrap();
    root.add(Dataset::primitive::<u8>("mask", Shape::fixed(&[5])).unwrap())
        .unwrap();
    root.add(Attribute::primitive::<u16>("version").unwrap()).unwrap();

    let mut obs = Group::new("observations").unwrap();
    obs.add(Dataset::compound::<Station>("stations", Shape::fixed(&[3])).unwrap())
        .unwrap();
    obs.add(Dataset::text("comment", Shape::scalar()).unwrap())
        .unwrap();
    obs.add(Dataset::primitive::<i64>("count", Shape::scalar()).unwrap())
        .unwrap();
    obs.add(Group::new("empty").unwrap()).unwrap();
    root.add(obs).unwrap();

    root.add(Dataset::primitive::<i8>("last", Shape::fixed(&[1, 1])).unwrap())
        .unwrap();
    root
}

#[test]
fn reflected_tree_matches_declared() {
    let path = std::env::temp_dir().join(format!("hitree-reflect-{}.h5", std::process::id()));

    let mut root = declared();
    root.create(&path).unwrap();

    root.attribute_mut("version").unwrap().set(4u16).unwrap();
    {
        let t = root.dataset_mut("temperature").unwrap();
        t.write(&(0..24).map(|v| v as f32).collect::<Vec<_>>()).unwrap();
        t.attribute_mut("units").unwrap().set_text("celsius").unwrap();
    }
    {
        let obs = root.group_mut("observations").unwrap();
        let st = obs.dataset_mut("stations").unwrap();
        let r = st.index(1).unwrap().record().unwrap();
        r.set("id", 42u32).unwrap();
        r.set_text("name", "utsira").unwrap();
        r.record("location").unwrap().set("b", 59.3f64).unwrap();
        {
            let mut e = r.records("history").unwrap().element_mut(2).unwrap();
            e.set("a", -7i16).unwrap();
        }

        obs.text_mut("comment").unwrap().set_text("three stations").unwrap();
        obs.dataset_mut("count").unwrap().set(3i64).unwrap();
    }
    root.close().unwrap();

    // declared and reflected trees opened on the same file
    let mut root = declared();
    root.open(&path, OpenMode::ReadOnly).unwrap();
    let mut reflected = Group::open_reflected(&path, OpenMode::ReadOnly).unwrap();

    let a = summarize(&mut root).unwrap();
    let b = summarize(&mut reflected).unwrap();
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(&b) {
        assert_eq!(x, y);
    }

    assert_eq!(reflected.attribute_names(), vec!["version"]);
    assert_eq!(reflected.attribute_mut("version").unwrap().get::<u16>().unwrap(), 4);

    let t = reflected.dataset_mut("temperature").unwrap();
    assert_eq!(t.index(1).unwrap().index(2).unwrap().index(3).unwrap().get::<f32>().unwrap(), 23.0);
    assert_eq!(t.attribute_mut("units").unwrap().get_text().unwrap(), "celsius");

    let obs = reflected.group_mut("observations").unwrap();
    assert_eq!(obs.children_names(), vec!["stations", "comment", "count", "empty"]);
    assert_eq!(obs.text_mut("comment").unwrap().get_text().unwrap(), "three stations");
    assert_eq!(obs.dataset_mut("count").unwrap().get::<i64>().unwrap(), 3);

    let st = obs.dataset_mut("stations").unwrap();
    let r = st.index(1).unwrap().record().unwrap();
    assert_eq!(r.get_as::<u32>("id").unwrap(), 42);
    assert_eq!(r.text("name").unwrap(), "utsira");
    assert_eq!(r.record("location").unwrap().get_as::<f64>("b").unwrap(), 59.3);
    let h = r.records("history").unwrap();
    assert_eq!(h.element(2).unwrap().value("a"), Some(Value::I16(-7)));

    // the reflected tree reads the same records as the declared one
    let declared_stations: Vec<Station> = root
        .group("observations")
        .unwrap()
        .dataset("stations")
        .unwrap()
        .read_compound()
        .unwrap();
    assert_eq!(st.read_compound::<Station>().unwrap(), declared_stations);
    assert_eq!(declared_stations[1].history[2].a, -7);

    let mut listing = Vec::new();
    print_tree(&mut reflected, &mut listing).unwrap();
    let listing = String::from_utf8(listing).unwrap();
    assert!(listing.contains("temperature: float32 [2, 3, 4]"));
    assert!(listing.contains("stations: record [3]"));
    assert!(listing.contains("comment: text = three stations"));

    reflected.close().unwrap();
    root.close().unwrap();

    std::fs::remove_file(&path).unwrap();
}

#[test]
fn reflect_needs_existing_container() {
    let path = std::env::temp_dir().join("hitree-reflect-missing.h5");
    assert!(Group::open_reflected(&path, OpenMode::ReadOnly).is_err());
    assert!(Group::open_reflected(&path, OpenMode::Create).is_err());
}

#[test]
fn reflect_plain_hdf5_file() {
    use hdf5::types::VarLenUnicode;

    let path = std::env::temp_dir().join(format!("hitree-reflect-plain-{}.h5", std::process::id()));
    {
        let f = hdf5::File::create(&path).unwrap();
        let grid = f.create_group("grid").unwrap();
        grid.new_dataset::<f64>()
            .shape([3])
            .create("lat")
            .unwrap()
            .write_raw(&[60.0f64, 60.5, 61.0])
            .unwrap();
        grid.new_dataset::<i16>()
            .shape([2, 4])
            .chunk([1, 4])
            .deflate(4)
            .create("depth")
            .unwrap()
            .write_raw(&[1i16, 2, 3, 4, 5, 6, 7, 8])
            .unwrap();
        f.new_attr::<VarLenUnicode>()
            .shape(())
            .create("title")
            .unwrap()
            .write_scalar(&"coads".parse::<VarLenUnicode>().unwrap())
            .unwrap();
    }

    let mut root = Group::open_reflected(&path, OpenMode::ReadWrite).unwrap();
    assert_eq!(root.children_names(), vec!["grid"]);
    assert_eq!(root.attribute_mut("title").unwrap().get_text().unwrap(), "coads");

    let grid = root.group_mut("grid").unwrap();
    assert_eq!(grid.children_names(), vec!["depth", "lat"]);
    assert_eq!(
        grid.dataset_mut("lat").unwrap().read::<f64>().unwrap(),
        vec![60.0, 60.5, 61.0]
    );

    let depth = grid.dataset_mut("depth").unwrap();
    assert_eq!(depth.layout().deflate, Some(4));
    assert_eq!(depth.index(1).unwrap().read::<i16>().unwrap(), vec![5, 6, 7, 8]);
    depth.index(0).unwrap().write(&[-1i16, -2, -3, -4]).unwrap();
    root.close().unwrap();

    // the write is visible to plain HDF5 readers
    let f = hdf5::File::open(&path).unwrap();
    let d = f.dataset("grid/depth").unwrap().read_raw::<i16>().unwrap();
    assert_eq!(d, vec![-1, -2, -3, -4, 5, 6, 7, 8]);
    drop(f);

    std::fs::remove_file(&path).unwrap();
}
