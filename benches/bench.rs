//! Benchmarks for the `cvs` crate.
//!
//! Run with:
//! - `cargo bench`

#![allow(missing_docs)]

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use cvs::{
    CvsRoot, Event, EventKind, EventPayload, FileArtifact, HandlerTable, SessionId,
    descramble_password, handler, scramble_password,
};

fn abort_with_error(message: &str) -> ! {
    eprintln!("{message}");
    std::process::abort();
}

fn bench_scramble(c: &mut Criterion) {
    let mut group = c.benchmark_group("scramble");
    for len in [8usize, 64, 1024] {
        let plain: String = "anonymous-Passw0rd!".chars().cycle().take(len).collect();
        let scrambled = scramble_password(&plain);
        group.throughput(Throughput::Bytes(len as u64));
        group.bench_with_input(BenchmarkId::new("scramble", len), &plain, |b, plain| {
            b.iter(|| black_box(scramble_password(black_box(plain))));
        });
        group.bench_with_input(
            BenchmarkId::new("descramble", len),
            &scrambled,
            |b, scrambled| {
                b.iter(|| {
                    let plain = match descramble_password(black_box(scrambled)) {
                        Some(plain) => plain,
                        None => abort_with_error("descramble failed for benchmark input"),
                    };
                    black_box(plain);
                });
            },
        );
    }
    group.finish();
}

fn bench_root_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("root_parse");
    for input in [
        ":pserver:cvs.example.org:/cvsroot",
        ":pserver:anonymous@cvs.example.org:/cvsroot/project",
        ":pserver:alice:secret@[2001:db8::1]:2402/var/cvs",
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(input), input, |b, input| {
            b.iter(|| {
                let root = match CvsRoot::parse(black_box(input)) {
                    Ok(root) => root,
                    Err(_) => abort_with_error("CvsRoot::parse failed for benchmark input"),
                };
                black_box(root.path);
            });
        });
    }
    group.finish();
}

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    let event = Event {
        kind: EventKind::UpdatedFile,
        payload: EventPayload::File(FileArtifact {
            directory: "module/".into(),
            path: "module/file.txt".into(),
            entry_line: "/file.txt/1.1///".into(),
            mode: "u=rw,g=r,o=r".into(),
            size: 5,
            data: b"hello".to_vec(),
        }),
        session: SessionId(0),
    };
    for handlers in [1usize, 8, 64] {
        let mut table = HandlerTable::new();
        for priority in 0..handlers {
            let priority = i32::try_from(priority).unwrap_or(i32::MAX);
            table.register(
                EventKind::UpdatedFile,
                -priority,
                handler(|event| {
                    black_box(event.file().map(|file| file.size));
                    Ok(())
                }),
            );
        }
        group.bench_with_input(BenchmarkId::from_parameter(handlers), &table, |b, table| {
            b.iter(|| {
                if table.dispatch(black_box(&event)).is_err() {
                    abort_with_error("dispatch failed");
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_scramble, bench_root_parse, bench_dispatch);
criterion_main!(benches);
