// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use simplecdn::{classify, file_type_pattern, rewrite_url, RewriteFilterSet, Rewriter, PROVIDER_TABLE};

fn sample_page(images: usize) -> String {
    let mut page = String::from("<html><head><link rel=\"stylesheet\" href=\"/theme/style.css?ver=1\"></head><body>");
    for i in 0..images {
        page.push_str(&format!(
            "<p>paragraph {i}</p><img src=\"https://mysite.com/uploads/{i}.jpg\"><a href=\"/page/{i}/\">link</a>"
        ));
    }
    page.push_str("</body></html>");
    page
}

fn rewrite_page_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("rewrite_page");
    let filters = RewriteFilterSet::new(&file_type_pattern(".css .js .png .jpg .webp", ".pdf"))
        .with_domains(vec!["mysite.com".to_string()]);
    let rewriter = Rewriter::new(&filters);

    for images in [10, 100, 1000].iter() {
        let page = sample_page(*images);
        group.bench_with_input(BenchmarkId::from_parameter(images), &page, |b, page| {
            b.iter(|| rewriter.rewrite_page(black_box(page), black_box("cdn1.example.net")));
        });
    }

    group.finish();
}

fn rewrite_url_benchmark(c: &mut Criterion) {
    let domains = vec!["mysite.com".to_string(), "static.mysite.com".to_string()];
    c.bench_function("rewrite_url_full_domain", |b| {
        b.iter(|| {
            rewrite_url(
                black_box("https://static.mysite.com/uploads/2024/01/photo.jpg"),
                "cdn1.example.net",
                &domains,
                "",
                r"/plugins/",
            )
        })
    });
}

fn classify_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");
    for host in ["d123abc.cloudfront.net", "ec2-1-2-3-4.compute-1.amazonaws.com", "cdn.unknown.example"] {
        group.bench_with_input(BenchmarkId::from_parameter(host), host, |b, host| {
            b.iter(|| classify(black_box(host), &PROVIDER_TABLE));
        });
    }
    group.finish();
}

criterion_group!(benches, rewrite_page_benchmark, rewrite_url_benchmark, classify_benchmark);
criterion_main!(benches);
