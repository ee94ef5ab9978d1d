use hitree::prelude::*;
use rand::Rng;

hitree::compound! {
    pub struct Pair {
        a: i16,
        b: f64,
    }
}

hitree::compound! {
    pub struct Observation {
        id: u64,
        time: f64,
        flags: [u8; 4],
        level: i8,
        pair: Pair,
        pairs: [Pair; 3],
        weights: [f32; 5],
    }
}

fn random_pair(rng: &mut impl Rng) -> Pair {
    Pair {
        a: rng.gen(),
        b: rng.gen(),
    }
}

fn random_observation(rng: &mut impl Rng) -> Observation {
    Observation {
        id: rng.gen(),
        time: rng.gen(),
        flags: rng.gen(),
        level: rng.gen(),
        pair: random_pair(rng),
        pairs: [random_pair(rng), random_pair(rng), random_pair(rng)],
        weights: rng.gen(),
    }
}

#[test]
fn record_value_round_trip() {
    let mut rng = rand::thread_rng();

    for _ in 0..20 {
        let v = random_observation(&mut rng);

        let r = Record::from_compound(&v).unwrap();
        assert_eq!(r.total_size(), Observation::record_type().total_size());

        let mut buf = Vec::new();
        r.serialize(&mut buf);

        let mut fresh = Record::new(&Observation::record_type()).unwrap();
        fresh.deserialize(&mut buf.as_slice()).unwrap();
        assert_eq!(fresh.to_compound::<Observation>().unwrap(), v);
    }
}

#[test]
fn stored_records_round_trip() {
    let path = std::env::temp_dir().join(format!("hitree-records-{}.h5", std::process::id()));
    let mut rng = rand::thread_rng();
    let values: Vec<Observation> = (0..8).map(|_| random_observation(&mut rng)).collect();

    let declare = || {
        Group::root()
            .with(
                Dataset::compound::<Observation>("obs", Shape::fixed(&[8]))
                    .unwrap()
                    .with_attribute(Attribute::compound::<Pair>("origin").unwrap())
                    .unwrap(),
            )
            .unwrap()
    };

    let mut root = declare();
    root.create(&path).unwrap();
    let obs = root.dataset_mut("obs").unwrap();
    obs.write_compound(&values).unwrap();
    obs.attribute_mut("origin")
        .unwrap()
        .write_compound(&values[0].pair)
        .unwrap();
    root.close().unwrap();

    let mut root = declare();
    root.open(&path, OpenMode::ReadOnly).unwrap();
    let obs = root.dataset_mut("obs").unwrap();
    assert_eq!(obs.read_compound::<Observation>().unwrap(), values);
    assert_eq!(
        obs.index(5).unwrap().read_compound::<Observation>().unwrap(),
        vec![values[5].clone()]
    );
    assert_eq!(
        obs.attribute_mut("origin")
            .unwrap()
            .read_compound::<Pair>()
            .unwrap(),
        values[0].pair
    );

    // single members are read in place
    let rec = obs.index(2).unwrap().record().unwrap();
    assert_eq!(rec.get_as::<u64>("id").unwrap(), values[2].id);
    assert_eq!(
        rec.record("pair").unwrap().get_as::<f64>("b").unwrap(),
        values[2].pair.b
    );
    assert_eq!(
        rec.array("weights").unwrap().to_vec::<f32>().unwrap(),
        values[2].weights.to_vec()
    );
    root.close().unwrap();

    std::fs::remove_file(&path).unwrap();
}

fn inner() -> RecordType {
    RecordType::new()
        .with("x", MemberType::Primitive(PrimitiveKind::I32))
        .unwrap()
        .with("y", MemberType::Primitive(PrimitiveKind::F32))
        .unwrap()
}

fn two_arrays() -> RecordType {
    RecordType::new()
        .with("first", MemberType::array(MemberType::Record(inner()), 10))
        .unwrap()
        .with("second", MemberType::array(MemberType::Record(inner()), 10))
        .unwrap()
}

#[test]
fn array_of_records_propagation() {
    let mut root = Group::root()
        .with(Dataset::records("arrays", &two_arrays(), Shape::fixed(&[2])).unwrap())
        .unwrap();
    root.open_in_memory("propagation").unwrap();

    let ds = root.dataset_mut("arrays").unwrap();
    {
        let rec = ds.index(1).unwrap().record().unwrap();
        let first = rec.records("first").unwrap();

        let mut e = first.element_mut(4).unwrap();
        e.set("x", 11i32).unwrap();
        e.set("y", 0.5f32).unwrap();
        drop(e);
        assert!(!first.is_pending());

        first.read_all().unwrap();
        assert_eq!(first.element(4).unwrap().value("x"), Some(Value::I32(11)));

        let second = rec.records("second").unwrap();
        second.read_all().unwrap();
        assert_eq!(second.element(4).unwrap().value("x"), Some(Value::I32(0)));
    }

    // the whole array was written to the selected element only
    let b = ds.index(1).unwrap().read_raw().unwrap();
    let x = i32::from_le_bytes(b[4 * 8..4 * 8 + 4].try_into().unwrap());
    assert_eq!(x, 11);
    assert!(ds.index(0).unwrap().read_raw().unwrap().iter().all(|b| *b == 0));

    // an explicit commit writes the array at once
    {
        let rec = ds.index(0).unwrap().record().unwrap();
        let mut e = rec.records("second").unwrap().element_mut(9).unwrap();
        e.set("y", 2.0f32).unwrap();
        e.commit().unwrap();
    }
    let rec = ds.index(0).unwrap().record().unwrap();
    let second = rec.records("second").unwrap();
    second.read_all().unwrap();
    assert_eq!(second.element(9).unwrap().value("y"), Some(Value::F32(2.0)));

    root.close().unwrap();
}

#[test]
fn char_array_text() {
    let ty = RecordType::new()
        .with("name", MemberType::array(MemberType::Primitive(PrimitiveKind::U8), 6))
        .unwrap()
        .with("n", MemberType::Primitive(PrimitiveKind::U16))
        .unwrap();

    let mut root = Group::root()
        .with(Dataset::records("names", &ty, Shape::fixed(&[2])).unwrap())
        .unwrap();
    root.open_in_memory("names").unwrap();

    let ds = root.dataset_mut("names").unwrap();
    let r = ds.index(0).unwrap().record().unwrap();
    r.set_text("name", "bergen-city").unwrap();
    r.set("n", 3u8).unwrap();
    assert_eq!(r.text("name").unwrap(), "bergen");
    assert_eq!(r.value_string("n").unwrap(), "3");

    let r = ds.index(1).unwrap().record().unwrap();
    r.set_text("name", "oslo").unwrap();
    assert_eq!(r.text("name").unwrap(), "oslo");
    assert_eq!(r.value_string("name").unwrap(), "[111, 115, 108, 111, 0, 0]");

    let r = ds.index(0).unwrap().record().unwrap();
    assert_eq!(r.text("name").unwrap(), "bergen");

    root.close().unwrap();
}

hitree::compound! {
    pub struct Point {
        x: i32,
        y: f32,
    }
}

hitree::compound! {
    pub struct Track {
        a: i32,
        w: [f64; 3],
        r: [Point; 2],
    }
}

#[test]
fn cached_arrays_follow_dataset_writes() {
    let mut root = Group::root()
        .with(Dataset::compound::<Track>("tracks", Shape::fixed(&[2])).unwrap())
        .unwrap();
    root.open_in_memory("cached").unwrap();
    let ds = root.dataset_mut("tracks").unwrap();

    // both arrays of element 0 are read while still zeroed
    {
        let rec = ds.index(0).unwrap().record().unwrap();
        assert_eq!(rec.array("w").unwrap().to_vec::<f64>().unwrap(), vec![0.0; 3]);
        let r = rec.records("r").unwrap();
        assert_eq!(r.element(0).unwrap().value("x"), Some(Value::I32(0)));
    }

    let track = Track {
        a: 5,
        w: [1.0, 2.0, 3.0],
        r: [Point { x: 7, y: 0.5 }, Point::default()],
    };
    ds.index(0).unwrap().write_compound(&[track.clone()]).unwrap();

    let rec = ds.index(0).unwrap().record().unwrap();
    assert_eq!(rec.get_as::<i32>("a").unwrap(), 5);
    assert_eq!(rec.array("w").unwrap().to_vec::<f64>().unwrap(), vec![1.0, 2.0, 3.0]);
    assert_eq!(
        rec.records("r").unwrap().element(0).unwrap().value("x"),
        Some(Value::I32(7))
    );

    // single element writes keep the other stored elements
    rec.array("w").unwrap().set(0, Value::F64(9.0)).unwrap();
    {
        let mut e = rec.records("r").unwrap().element_mut(1).unwrap();
        e.set("x", 8i32).unwrap();
    }

    let stored = ds.index(0).unwrap().read_compound::<Track>().unwrap();
    assert_eq!(stored[0].a, 5);
    assert_eq!(stored[0].w, [9.0, 2.0, 3.0]);
    assert_eq!(stored[0].r[0], Point { x: 7, y: 0.5 });
    assert_eq!(stored[0].r[1].x, 8);

    // a write of the whole dataset is seen too
    let mut again = track.clone();
    again.w = [4.0, 5.0, 6.0];
    ds.write_compound(&[again, Track::default()]).unwrap();
    let rec = ds.index(0).unwrap().record().unwrap();
    assert_eq!(rec.array("w").unwrap().to_vec::<f64>().unwrap(), vec![4.0, 5.0, 6.0]);
    assert_eq!(
        rec.records("r").unwrap().element(1).unwrap().value("x"),
        Some(Value::I32(0))
    );

    root.close().unwrap();
}
