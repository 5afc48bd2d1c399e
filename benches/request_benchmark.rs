use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use webgen::path::{sanitize_lenient, sanitize_strict};
use webgen::request::Request;

fn simple_request_parse_benchmark(c: &mut Criterion) {
    let request = b"GET / HTTP/1.1\r\nHost: localhost:7878\r\nUser-Agent: Test\r\n\r\n";

    c.bench_function("simple_request_parse", |b| {
        b.iter(|| {
            let buffer = black_box(request.to_vec());
            let _ = Request::try_from(&buffer, 0).unwrap();
        });
    });
}

fn browser_request_parse_benchmark(c: &mut Criterion) {
    let request = b"GET /blog/my-post.html?ref=feed HTTP/1.1\r\n\
                    Host: localhost:7878\r\n\
                    User-Agent: Mozilla/5.0 (Windows NT 10.0; Win64; x64)\r\n\
                    Accept: text/html,application/xhtml+xml\r\n\
                    Accept-Language: en-US,en;q=0.9\r\n\
                    Accept-Encoding: gzip, deflate, br\r\n\
                    X-Forwarded-For: 203.0.113.9, 10.0.0.1\r\n\
                    Connection: keep-alive\r\n\
                    \r\n";

    c.bench_function("browser_request_parse", |b| {
        b.iter(|| {
            let buffer = black_box(request.to_vec());
            let _ = Request::try_from(&buffer, 0).unwrap();
        });
    });
}

fn request_parse_methods_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_parse_methods");

    let requests = [
        ("GET", b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n".as_slice()),
        ("HEAD", b"HEAD / HTTP/1.1\r\nHost: localhost\r\n\r\n".as_slice()),
        ("OPTIONS", b"OPTIONS * HTTP/1.1\r\nHost: localhost\r\n\r\n".as_slice()),
    ];

    for (name, request) in requests.iter() {
        group.bench_with_input(BenchmarkId::from_parameter(name), request, |b, request| {
            b.iter(|| {
                let _ = Request::try_from(black_box(request), 0).unwrap();
            });
        });
    }

    group.finish();
}

fn sanitize_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("sanitize_strict");

    let paths = [
        ("home", "/"),
        ("flat", "/about-us.html"),
        ("nested", "/blog/2024/rust-async-patterns-in-practice.html"),
        ("query", "/page.html?id=123&name=test"),
        ("traversal", "/../../etc/passwd"),
        ("encoded", "/%2e%2e%2fetc%2fpasswd"),
    ];

    for (name, raw) in paths.iter() {
        group.bench_with_input(BenchmarkId::from_parameter(name), raw, |b, raw| {
            b.iter(|| {
                let _ = sanitize_strict(black_box(raw), 200);
            });
        });
    }

    group.finish();
}

fn sanitize_lenient_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("sanitize_lenient");

    for length in [16, 64, 256].iter() {
        let raw = "../a<b>c".repeat(*length / 8);
        group.bench_with_input(BenchmarkId::from_parameter(length), &raw, |b, raw| {
            b.iter(|| sanitize_lenient(black_box(raw)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    simple_request_parse_benchmark,
    browser_request_parse_benchmark,
    request_parse_methods_benchmark,
    sanitize_benchmark,
    sanitize_lenient_benchmark
);
criterion_main!(benches);
