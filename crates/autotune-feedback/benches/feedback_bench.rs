// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use autotune_core::{
    AttachmentShape, FormatId, FramebufferShape, RenderPassShape, SampleCount, SubpassShape,
};
use autotune_feedback::{fingerprint, Fingerprint, HistoryCache, Measurement};
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use std::sync::Arc;
use std::thread;

fn bench_fingerprint(c: &mut Criterion) {
    let attachments = [
        AttachmentShape {
            format: FormatId(44),
            width: 1920,
            height: 1080,
            depth: 1,
            layer_count: 1,
            level_count: 1,
        },
        AttachmentShape {
            format: FormatId(126),
            width: 1920,
            height: 1080,
            depth: 1,
            layer_count: 1,
            level_count: 1,
        },
    ];
    let subpasses = [SubpassShape {
        samples: SampleCount::X4,
        input_count: 0,
        color_count: 1,
        resolve_count: 1,
    }];
    let shape = RenderPassShape::new(
        FramebufferShape {
            width: 1920,
            height: 1080,
            layers: 1,
        },
        &attachments,
        &subpasses,
    );

    let mut group = c.benchmark_group("Fingerprint");
    group.bench_function("Two attachments, one subpass", |b| {
        b.iter(|| black_box(fingerprint(black_box(&shape))));
    });
    group.finish();
}

fn bench_history(c: &mut Criterion) {
    // Setup 1,000 tracked shapes with a full window each
    let cache = Arc::new(HistoryCache::new());
    for key in 0..1_000u64 {
        for i in 0..5u64 {
            cache.record(
                Fingerprint(key),
                Measurement {
                    sequence: key * 5 + i,
                    samples: 100 * i,
                },
                1,
            );
        }
    }

    let mut group = c.benchmark_group("History Cache");

    group.bench_function("Lookup (single thread)", |b| {
        let mut key = 0u64;
        b.iter(|| {
            key = (key + 1) % 1_000;
            black_box(cache.lookup(Fingerprint(key)));
        });
    });

    group.bench_function("Lookup (4 readers, 1 writer)", |b| {
        b.iter(|| {
            thread::scope(|scope| {
                for reader in 0..4u64 {
                    let cache = Arc::clone(&cache);
                    scope.spawn(move || {
                        for key in 0..250u64 {
                            black_box(cache.lookup(Fingerprint(reader * 250 + key)));
                        }
                    });
                }
                let writer = Arc::clone(&cache);
                scope.spawn(move || {
                    for key in 0..50u64 {
                        writer.record(
                            Fingerprint(key),
                            Measurement {
                                sequence: key,
                                samples: 300,
                            },
                            2,
                        );
                    }
                });
            });
        });
    });

    group.finish();
}

criterion_group!(benches, bench_fingerprint, bench_history);
criterion_main!(benches);
