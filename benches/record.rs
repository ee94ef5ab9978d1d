use divan::Bencher;

use hitree::prelude::*;

hitree::compound! {
    pub struct Pair {
        a: i16,
        b: f64,
    }
}

hitree::compound! {
    pub struct Sample {
        id: u64,
        weights: [f32; 8],
        pair: Pair,
        history: [Pair; 16],
    }
}

fn samples() -> Group {
    let mut root = Group::root()
        .with(Dataset::compound::<Sample>("samples", Shape::fixed(&[256])).unwrap())
        .unwrap();
    root.open_in_memory("records").unwrap();

    let values: Vec<Sample> = (0..256)
        .map(|i| Sample {
            id: i,
            ..Sample::default()
        })
        .collect();
    root.dataset_mut("samples")
        .unwrap()
        .write_compound(&values)
        .unwrap();
    root
}

#[divan::bench]
fn encode_compound(b: Bencher) {
    let s = Sample::default();

    b.bench_local(|| divan::black_box(s.to_bytes()))
}

#[divan::bench]
fn record_round_trip(b: Bencher) {
    let r = Record::from_compound(&Sample::default()).unwrap();
    let mut fresh = Record::new(&Sample::record_type()).unwrap();

    b.bench_local(|| {
        let bytes = r.to_bytes();
        fresh.from_bytes(&bytes).unwrap();
    })
}

#[divan::bench]
fn read_compounds(b: Bencher) {
    let mut root = samples();
    let ds = root.dataset_mut("samples").unwrap();

    b.bench_local(|| divan::black_box(ds.read_compound::<Sample>().unwrap()))
}

#[divan::bench]
fn read_member(b: Bencher) {
    let mut root = samples();
    let ds = root.dataset_mut("samples").unwrap();

    b.bench_local(|| {
        let r = ds.index(100).unwrap().record().unwrap();
        divan::black_box(r.get_as::<u64>("id").unwrap())
    })
}

#[divan::bench]
fn element_write_back(b: Bencher) {
    let mut root = samples();
    let ds = root.dataset_mut("samples").unwrap();

    b.bench_local(|| {
        let r = ds.index(7).unwrap().record().unwrap();
        let mut e = r.records("history").unwrap().element_mut(3).unwrap();
        e.set("a", 1i16).unwrap();
    })
}

fn main() {
    divan::main();
}
