use criterion::{criterion_group, criterion_main, Criterion};
use std::path::Path;

use mbox2pdf::parser::mbox::MboxReader;
use mbox2pdf::parser::mime::Normalizer;

fn bench_read_mbox(c: &mut Criterion) {
    let fixture_path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("sample.mbox");

    c.bench_function("read_sample_mbox", |b| {
        b.iter(|| MboxReader::count_records(&fixture_path).unwrap())
    });
}

fn bench_normalize(c: &mut Criterion) {
    let fixture_path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("sample.mbox");
    let records: Vec<_> = MboxReader::open(&fixture_path)
        .unwrap()
        .map(|r| r.unwrap())
        .collect();
    let normalizer = Normalizer::default();

    c.bench_function("normalize_sample_mbox", |b| {
        b.iter(|| {
            records
                .iter()
                .enumerate()
                .map(|(i, record)| normalizer.normalize(record, i as u64 + 1).unwrap())
                .map(|m| m.attachments.len())
                .sum::<usize>()
        })
    });
}

criterion_group!(benches, bench_read_mbox, bench_normalize);
criterion_main!(benches);
