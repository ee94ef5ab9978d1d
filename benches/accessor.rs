use divan::Bencher;

use hitree::prelude::*;

fn grid() -> Group {
    let mut root = Group::root()
        .with(Dataset::primitive::<f32>("grid", Shape::fixed(&[64, 64, 16])).unwrap())
        .unwrap();
    root.open_in_memory("bench").unwrap();

    let values: Vec<f32> = (0..64 * 64 * 16).map(|v| v as f32).collect();
    root.dataset_mut("grid").unwrap().write(&values).unwrap();
    root
}

mod primitives {
    use super::*;

    #[divan::bench]
    fn read_all(b: Bencher) {
        let mut root = grid();
        let ds = root.dataset_mut("grid").unwrap();

        b.bench_local(|| divan::black_box(ds.read::<f32>().unwrap()))
    }

    #[divan::bench]
    fn read_row(b: Bencher) {
        let mut root = grid();
        let ds = root.dataset_mut("grid").unwrap();

        b.bench_local(|| divan::black_box(ds.index(31).unwrap().index(7).unwrap().read::<f32>().unwrap()))
    }

    #[divan::bench]
    fn scalar_walk(b: Bencher) {
        let mut root = grid();
        let ds = root.dataset_mut("grid").unwrap();

        b.bench_local(|| {
            let plane = ds.index(3).unwrap();
            let mut sum = 0.0;
            for j in 0..64 {
                let row = plane.index(j).unwrap();
                for k in 0..16 {
                    sum += row.index(k).unwrap().get::<f32>().unwrap();
                }
            }
            divan::black_box(sum)
        })
    }

    #[divan::bench]
    fn read_as_f64(b: Bencher) {
        let mut root = grid();
        let ds = root.dataset_mut("grid").unwrap();

        b.bench_local(|| divan::black_box(ds.index(10).unwrap().read::<f64>().unwrap()))
    }
}

mod text {
    use super::*;

    #[divan::bench]
    fn append(b: Bencher) {
        let mut root = Group::root()
            .with(Dataset::text("log", Shape::extendible(&[0], &[UNLIMITED], &[64])).unwrap())
            .unwrap();
        root.open_in_memory("text").unwrap();
        let ds = root.text_mut("log").unwrap();

        b.bench_local(|| ds.extend_once_and_write_text(&["another line"]).unwrap())
    }
}

fn main() {
    divan::main();
}
