use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use hearing_crawler::checkpoint::CheckpointStore;
use hearing_crawler::models::{JurisdictionId, Shard};
use std::io::{BufWriter, Write};
use tempfile::TempDir;

const HEADER: &str =
    r#"{"kind":"header","columns":["case_number","defendant","charge","hearing_date","status","Race","Sex"]}"#;

/// Writes `rows` hearings spread over 26 letters of a handful of jurisdictions, every shard sealed.
fn populate(dir: &TempDir, rows: usize) {
    let file = std::fs::File::create(dir.path().join("hearings.jsonl")).unwrap();
    let mut out = BufWriter::new(file);
    writeln!(out, "{HEADER}").unwrap();

    let letters: Vec<char> = ('A'..='Z').collect();
    let per_shard = (rows / (letters.len() * 4)).max(1);
    let mut written = 0;
    'outer: for jurisdiction in 39..43u32 {
        for &letter in &letters {
            for i in 0..per_shard {
                if written == rows {
                    break 'outer;
                }
                writeln!(
                    out,
                    r#"{{"kind":"hearing","index":{i},"jurisdiction":{jurisdiction},"jurisdiction_name":"Court {jurisdiction}","case_number":"CR{written}","defendant":"{letter}OE, JANE","charge":"LARCENY","hearing_date":"01/04/2021","status":"Active","details":{{"Race":"W","Sex":"F"}}}}"#
                )
                .unwrap();
                written += 1;
            }
            writeln!(
                out,
                r#"{{"kind":"sentinel","index":-1,"jurisdiction":{jurisdiction},"letter":"{letter}"}}"#
            )
            .unwrap();
        }
    }
    out.flush().unwrap();
}

fn bench_checkpoint_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("checkpoint_load");

    for rows in [1_000, 10_000, 100_000] {
        let dir = TempDir::new().unwrap();
        populate(&dir, rows);

        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, _| {
            b.iter(|| black_box(CheckpointStore::load(dir.path()).unwrap()));
        });
    }

    group.finish();
}

fn bench_done_count(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    populate(&dir, 10_000);
    let store = CheckpointStore::load(dir.path()).unwrap();
    let shard = Shard::new(JurisdictionId(40), 'M');

    c.bench_function("done_count_lookup", |b| {
        b.iter(|| black_box(store.done_count(black_box(shard))));
    });
}

criterion_group!(benches, bench_checkpoint_load, bench_done_count);
criterion_main!(benches);
