use std::fmt::Write as _;

use bulk_populate::entity::{ContainerKind, Target};
use bulk_populate::hierarchy::InMemoryHierarchy;
use bulk_populate::io_utils;
use bulk_populate::populate::{PopulateOptions, populate};
use bulk_populate::rows::RowStream;
use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use encoding_rs::UTF_8;

const IMAGES: i64 = 96;

fn hierarchy() -> InMemoryHierarchy {
    (0..IMAGES).fold(InMemoryHierarchy::new().with_dataset(1, "plate-scan"), |h, i| {
        h.with_image(100 + i, &format!("img{i:03}"), Some(1))
    })
}

fn generate_rows(rows: usize) -> String {
    let mut csv = String::from("Image Name,Area,Intensity,Class,Flag\n");
    for i in 0..rows {
        let image = i as i64 % IMAGES;
        let class = match i % 3 {
            0 => "nucleus",
            1 => "cytoplasm",
            _ => "membrane",
        };
        writeln!(
            csv,
            "img{image:03},{:.2},{},{class},{}",
            (i % 1000) as f64 / 7.0,
            i % 4096,
            i % 2 == 0
        )
        .expect("row");
    }
    csv
}

fn bench_populate(c: &mut Criterion) {
    let hierarchy = hierarchy();
    let input = generate_rows(20_000);
    let target = Target::new(ContainerKind::Dataset, 1);
    let options = PopulateOptions::default();

    c.bench_function("populate_dataset_20k_rows", |b| {
        b.iter_batched(
            || RowStream::new(io_utils::open_csv_reader(input.as_bytes()), UTF_8),
            |stream| populate(stream, target, &hierarchy, &options).expect("populate"),
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_populate);
criterion_main!(benches);
