use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ouli::fingerprint::key;

fn bench_fingerprint_urls(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint");

    let urls = [
        ("no_query", "/api/posts"),
        ("short_query", "/search?q=a"),
        ("long_query", "/search?q=a&filter=active&sort=desc&page=1&limit=50"),
    ];

    for (name, url) in urls {
        group.bench_with_input(BenchmarkId::from_parameter(name), &url, |b, &url| {
            b.iter(|| key(black_box("GET"), black_box(url)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fingerprint_urls);
criterion_main!(benches);
