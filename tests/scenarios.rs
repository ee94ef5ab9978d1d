use hitree::prelude::*;
use ndarray::Ix2;

fn tmp(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("hitree-{}-{}.h5", name, std::process::id()))
}

#[test]
fn grow_unlimited_column() {
    let path = tmp("grow");

    let mut root = Group::root();
    root.add(
        Dataset::primitive::<i32>("grid", Shape::extendible(&[3, 4], &[3, UNLIMITED], &[3, 4]))
            .unwrap(),
    )
    .unwrap();
    root.create(&path).unwrap();

    {
        let grid = root.dataset_mut("grid").unwrap();
        for r in 0..3 {
            grid.index(r).unwrap().write(&[r as i32; 4]).unwrap();
        }

        grid.extend_dim(1, 1).unwrap();
        assert_eq!(grid.dims(), vec![3, 5]);

        for r in 0..3 {
            grid.index(r).unwrap().index(4).unwrap().set(9i32).unwrap();
        }

        let a = grid.read_array::<i32>().unwrap().into_dimensionality::<Ix2>().unwrap();
        assert_eq!(a.shape(), &[3, 5]);
        assert_eq!(a.column(4).to_vec(), vec![9, 9, 9]);
        for r in 0..3 {
            for c in 0..4 {
                assert_eq!(a[[r, c]], r as i32);
            }
        }
    }
    root.close().unwrap();

    let mut again = Group::open_reflected(&path, OpenMode::ReadOnly).unwrap();
    let grid = again.dataset_mut("grid").unwrap();
    assert_eq!(grid.dims(), vec![3, 5]);
    assert_eq!(
        grid.read::<i32>().unwrap(),
        vec![0, 0, 0, 0, 9, 1, 1, 1, 1, 9, 2, 2, 2, 2, 9]
    );
    assert!(grid.index(0).unwrap().write(&[1i32; 5]).is_err());
    again.close().unwrap();

    std::fs::remove_file(&path).unwrap();
}

#[test]
fn scalar_text_rewrite() {
    let path = tmp("text");

    let mut root = Group::root()
        .with(Dataset::text("greeting", Shape::scalar()).unwrap())
        .unwrap();
    root.create(&path).unwrap();

    let t = root.text_mut("greeting").unwrap();
    t.set_text("hello").unwrap();
    assert_eq!(t.get_text().unwrap(), "hello");
    t.set_text("hi").unwrap();
    assert_eq!(t.get_text().unwrap(), "hi");
    root.close().unwrap();

    root.open(&path, OpenMode::ReadOnly).unwrap();
    assert_eq!(root.text_mut("greeting").unwrap().get_text().unwrap(), "hi");
    root.close().unwrap();

    std::fs::remove_file(&path).unwrap();
}

#[test]
fn selection_order_and_overflow() {
    let mut root = Group::root()
        .with(Dataset::primitive::<i32>("m", Shape::fixed(&[3, 4])).unwrap())
        .unwrap();
    root.open_in_memory("selection").unwrap();

    let m = root.dataset_mut("m").unwrap();
    m.index(2).unwrap().index(1).unwrap().set(7i32).unwrap();
    m.index(0).unwrap().index(3).unwrap().set(5i32).unwrap();

    // the same row accessor visits sibling elements
    let row = m.index(1).unwrap();
    row.index(0).unwrap().set(1i32).unwrap();
    row.index(2).unwrap().set(3i32).unwrap();

    let v = m.read::<i32>().unwrap();
    assert_eq!(v[2 * 4 + 1], 7);
    assert_eq!(v[3], 5);
    assert_eq!(&v[4..8], &[1, 0, 3, 0]);

    let s = m.index(2).unwrap().index(1).unwrap();
    let e = s.index(0).unwrap_err();
    assert_eq!(
        e.downcast_ref::<Error>(),
        Some(&Error::SelectionOverflow { rank: 2 })
    );
    assert_eq!(s.get::<i32>().unwrap(), 7);

    let e = m.index(3).unwrap_err();
    assert_eq!(
        e.downcast_ref::<Error>(),
        Some(&Error::IndexOutOfBounds {
            axis: 0,
            index: 3,
            extent: 3
        })
    );
    let e = m.index(0).unwrap().index(4).unwrap_err();
    assert!(matches!(
        e.downcast_ref::<Error>(),
        Some(Error::IndexOutOfBounds { axis: 1, .. })
    ));

    root.close().unwrap();
}

#[test]
fn extend_and_read() {
    let mut root = Group::root()
        .with(Dataset::primitive::<f64>("series", Shape::extendible(&[2], &[UNLIMITED], &[4])).unwrap())
        .unwrap();
    root.open_in_memory("extend").unwrap();

    let s = root.dataset_mut("series").unwrap();
    s.write(&[1.5, 2.5]).unwrap();
    s.extend(3).unwrap();
    assert_eq!(s.dims(), vec![5]);

    s.index(4).unwrap().set(42.0f64).unwrap();
    assert_eq!(s.index(4).unwrap().get::<f64>().unwrap(), 42.0);
    assert_eq!(s.read::<f64>().unwrap(), vec![1.5, 2.5, 0.0, 0.0, 42.0]);

    s.extend_once_and_write_values(&[7.0f64]).unwrap();
    assert_eq!(s.dims(), vec![6]);
    assert_eq!(s.index(5).unwrap().get::<f64>().unwrap(), 7.0);
    assert_eq!(s.index(1).unwrap().get::<f64>().unwrap(), 2.5);

    root.close().unwrap();
}

#[test]
fn fixed_extent_cannot_grow() {
    let mut root = Group::root()
        .with(Dataset::primitive::<u8>("f", Shape::fixed(&[2])).unwrap())
        .unwrap();
    root.open_in_memory("fixed").unwrap();

    let f = root.dataset_mut("f").unwrap();
    assert!(f.extend(1).is_err());
    assert_eq!(f.dims(), vec![2]);
    root.close().unwrap();
}

#[test]
fn unbound_is_quiet() {
    let mut ds = Dataset::primitive::<u16>("u", Shape::fixed(&[2])).unwrap();
    ds.write(&[1u16, 2]).unwrap();
    assert_eq!(ds.read::<u16>().unwrap(), vec![0, 0]);
    ds.extend(1).unwrap();
    assert_eq!(ds.dims(), vec![2]);

    let e = ds.write(&[1u16]).unwrap_err();
    assert!(matches!(
        e.downcast_ref::<Error>(),
        Some(Error::ElementCountMismatch { expected: 2, got: 1 })
    ));
}

#[test]
fn assign_whole_dataset() {
    let mut source = Group::root()
        .with(Dataset::primitive::<i16>("src", Shape::fixed(&[2, 3])).unwrap())
        .unwrap();
    source.open_in_memory("source").unwrap();
    source
        .dataset_mut("src")
        .unwrap()
        .write(&[1i16, 2, 3, 4, 5, 6])
        .unwrap();

    let mut root = Group::root()
        .with(
            Dataset::primitive::<i64>("grow", Shape::extendible(&[1, 3], &[UNLIMITED, 3], &[1, 3]))
                .unwrap(),
        )
        .unwrap()
        .with(Dataset::primitive::<i16>("small", Shape::fixed(&[1, 3])).unwrap())
        .unwrap();
    root.open_in_memory("assign").unwrap();

    let src = source.dataset("src").unwrap();

    let grow = root.dataset_mut("grow").unwrap();
    grow.assign_from(src).unwrap();
    assert_eq!(grow.dims(), vec![2, 3]);
    assert_eq!(grow.read::<i64>().unwrap(), vec![1, 2, 3, 4, 5, 6]);

    let small = root.dataset_mut("small").unwrap();
    let e = small.assign_from(src).unwrap_err();
    assert!(matches!(
        e.downcast_ref::<Error>(),
        Some(Error::ShapeMismatch { .. })
    ));
    assert_eq!(small.read::<i16>().unwrap(), vec![0, 0, 0]);

    root.close().unwrap();
    source.close().unwrap();
}
