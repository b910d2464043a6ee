use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use series_archiver::config::IndexFormat;
use series_archiver::pruner::{Disposition, RetentionWindow};
use series_archiver::series::{DirIndexer, FileIndexer, SeriesPattern};
use std::fs;
use tempfile::TempDir;

fn populated_dir(files: u64) -> TempDir {
    let dir = TempDir::new().unwrap();
    for i in 0..files {
        fs::write(dir.path().join(format!("q.y0.{:06}", i)), b"").unwrap();
        fs::write(dir.path().join(format!("q.y1.{:06}.nc", i)), b"").unwrap();
    }
    dir
}

fn bench_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("dir_indexer_list");
    for files in [1_000u64, 10_000] {
        let dir = populated_dir(files);
        let indexer = DirIndexer::new(dir.path());
        let pattern = SeriesPattern::new("q.y0", None).with_format(Some(IndexFormat::padded(6)));
        group.bench_with_input(BenchmarkId::from_parameter(files), &pattern, |b, pattern| {
            b.iter(|| indexer.list(black_box(pattern)).unwrap())
        });
    }
    group.finish();
}

fn bench_list_all(c: &mut Criterion) {
    let dir = populated_dir(10_000);
    let indexer = DirIndexer::new(dir.path());
    let patterns = [SeriesPattern::new("q.y0", None), SeriesPattern::new("q.y1", Some("nc"))];
    c.bench_function("dir_indexer_list_all_two_series", |b| {
        b.iter(|| indexer.list_all(black_box(&patterns)).unwrap())
    });
}

fn bench_disposition(c: &mut Criterion) {
    let window = RetentionWindow::new(1_000, 5_000, 25, 100_000);
    c.bench_function("retention_disposition", |b| {
        b.iter(|| (0..100_000u64).filter(|&i| window.disposition(black_box(i)) == Disposition::Keep).count())
    });
}

criterion_group!(benches, bench_list, bench_list_all, bench_disposition);
criterion_main!(benches);
