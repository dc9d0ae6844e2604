//! Benchmarks for chunked payload appends and partial reads

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use gds_rs::{ArrayData, ArraySpec, Container, ContainerBuilder, ElemType};
use tempfile::TempDir;

const ENCODERS: [&str; 3] = ["", "LZ4", "ZSTD"];

fn genotype_bytes(len: usize) -> Vec<u8> {
    // Mostly 0/1/2 with runs, like real genotype calls
    (0..len).map(|i| ((i / 13) % 3) as u8).collect()
}

fn benchmark_append_raw(c: &mut Criterion) {
    let mut group = c.benchmark_group("append_raw");
    let data = genotype_bytes(1024 * 1024);
    group.throughput(Throughput::Bytes(data.len() as u64));

    for encoder in ENCODERS {
        group.bench_with_input(BenchmarkId::from_parameter(encoder), &encoder, |b, &encoder| {
            let temp = TempDir::new().unwrap();
            let gds = Container::create(temp.path().join("append.gds"), false).unwrap();
            let mut i = 0;
            b.iter(|| {
                let raw = gds
                    .root()
                    .add_raw(&format!("r{}", i), Some(encoder).filter(|e| !e.is_empty()))
                    .unwrap();
                raw.append_raw(black_box(&data)).unwrap();
                i += 1;
            });
            gds.close().unwrap();
        });
    }

    group.finish();
}

fn benchmark_read_range(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_raw_4k");
    let data = genotype_bytes(8 * 1024 * 1024);

    for encoder in ENCODERS {
        let temp = TempDir::new().unwrap();
        let gds = Container::create(temp.path().join("read.gds"), false).unwrap();
        let raw = gds
            .root()
            .add_raw("r", Some(encoder).filter(|e| !e.is_empty()))
            .unwrap();
        raw.append_raw(&data).unwrap();
        gds.sync().unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(encoder), &encoder, |b, _| {
            let mut offset = 0u64;
            b.iter(|| {
                black_box(raw.read_raw(offset, 4096).unwrap());
                offset = (offset + 1_000_003) % (data.len() as u64 - 4096);
            });
        });
        gds.close().unwrap();
    }

    group.finish();
}

fn benchmark_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_selected");
    let (samples, variants) = (500u64, 2000u64);

    for cache in [1usize, 64] {
        let temp = TempDir::new().unwrap();
        let gds = ContainerBuilder::new()
            .encoder("LZ4")
            .cache_capacity(cache)
            .create(temp.path().join("select.gds"))
            .unwrap();
        let geno = gds
            .root()
            .add_array("genotype", ArraySpec::integer(ElemType::UInt8, vec![0, variants]))
            .unwrap();
        geno.append_values(ArrayData::UInt8(genotype_bytes((samples * variants) as usize)))
            .unwrap();
        gds.sync().unwrap();

        let masks = vec![
            (0..samples).map(|i| i % 5 == 0).collect::<Vec<_>>(),
            (0..variants).map(|j| j % 3 != 0).collect::<Vec<_>>(),
        ];
        group.bench_with_input(BenchmarkId::new("cache", cache), &masks, |b, masks| {
            b.iter(|| black_box(geno.read_selected(masks, Some(ElemType::Int32)).unwrap()));
        });
        gds.close().unwrap();
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_append_raw,
    benchmark_read_range,
    benchmark_selection
);
criterion_main!(benches);
