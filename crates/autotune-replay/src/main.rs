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

//! Replays synthetic frames through the autotuner and a software GPU.
//!
//! Run with: cargo run -p autotune-replay -- --frames 200 --threads 4

use anyhow::{Context, Result};
use autotune_core::software::{HostMemoryAllocator, SoftwareCommandBuffer, SoftwareGpu};
use autotune_core::{
    AttachmentShape, AutotuneSettings, FormatId, FramebufferShape, RenderPassShape, SampleCount,
    SubpassShape,
};
use autotune_feedback::{FeedbackState, RenderPassInfo, StreamFeedback};
use autotune_telemetry::logging::init_logging;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

#[derive(Parser, Debug)]
#[command(author, version, about = "Replay synthetic frames through the render-pass autotuner")]
struct Arguments {
    /// Number of frames to submit.
    #[arg(long, default_value_t = 120)]
    frames: u32,
    /// Render passes recorded per frame.
    #[arg(long, default_value_t = 8)]
    passes_per_frame: u32,
    /// Command-recording threads per frame.
    #[arg(long, default_value_t = 2)]
    threads: u32,
    /// Draws recorded in every render pass.
    #[arg(long, default_value_t = 20)]
    draws: u32,
    /// Samples touched by the first render pass; pass `i` touches `(i + 1)` times this.
    #[arg(long, default_value_t = 300)]
    overdraw: u64,
    /// Cost per sample reported for every render pass.
    #[arg(long, default_value_t = 1)]
    cost_per_sample: u64,
    /// Submissions the GPU lags behind before retiring a batch.
    #[arg(long, default_value_t = 2)]
    gpu_lag: usize,
    /// JSON file with autotune settings; missing fields keep their defaults.
    #[arg(long, value_parser)]
    settings: Option<PathBuf>,
    /// Debug flags, same syntax as the AUTOTUNE_DEBUG variable.
    #[arg(long)]
    debug: Option<String>,
    /// Print the final statistics as JSON.
    #[arg(long)]
    json: bool,
}

/// The attachment and subpass layout of one synthetic render pass.
struct PassLayout {
    framebuffer: FramebufferShape,
    attachments: [AttachmentShape; 2],
    subpasses: [SubpassShape; 1],
    overdraw: u64,
}

impl PassLayout {
    fn new(index: u32, base_overdraw: u64) -> Self {
        let width = 256 + 64 * index;
        let height = 256;
        let view = |format| AttachmentShape {
            format: FormatId(format),
            width,
            height,
            depth: 1,
            layer_count: 1,
            level_count: 1,
        };
        let samples = if index % 4 == 3 {
            SampleCount::X4
        } else {
            SampleCount::X1
        };
        Self {
            framebuffer: FramebufferShape {
                width,
                height,
                layers: 1,
            },
            attachments: [view(37), view(126)],
            subpasses: [SubpassShape {
                samples,
                input_count: 0,
                color_count: 1,
                resolve_count: u32::from(samples != SampleCount::X1),
            }],
            overdraw: base_overdraw.saturating_mul(u64::from(index) + 1),
        }
    }

    fn shape(&self) -> RenderPassShape<'_> {
        RenderPassShape::new(self.framebuffer, &self.attachments, &self.subpasses)
    }
}

fn load_settings(arguments: &Arguments) -> Result<AutotuneSettings> {
    let mut settings = match &arguments.settings {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("read settings {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parse settings {}", path.display()))?
        }
        None => AutotuneSettings::from_env(),
    };
    if let Some(flags) = &arguments.debug {
        settings
            .apply_debug_flags(flags)
            .with_context(|| format!("apply debug flags '{flags}'"))?;
    }
    settings.validate().context("validate settings")?;
    Ok(settings)
}

fn main() -> Result<()> {
    init_logging("info");
    let arguments = Arguments::parse();
    let settings = load_settings(&arguments)?;
    let threads = arguments.threads.max(1);

    let allocator = Arc::new(HostMemoryAllocator::new());
    let mut state = FeedbackState::init(settings, allocator.as_ref());
    let mut gpu = SoftwareGpu::new(Arc::clone(&allocator), arguments.gpu_lag);
    let layouts: Vec<PassLayout> = (0..arguments.passes_per_frame)
        .map(|i| PassLayout::new(i, arguments.overdraw))
        .collect();

    log::info!(
        "Replaying {} frames, {} passes per frame on {} threads",
        arguments.frames,
        layouts.len(),
        threads
    );

    for frame in 0..arguments.frames {
        let recorded: Vec<(StreamFeedback, SoftwareCommandBuffer)> = thread::scope(|scope| {
            let handles: Vec<_> = (0..threads)
                .map(|t| {
                    let recorder = state.recorder();
                    let layouts = &layouts;
                    let draws = arguments.draws;
                    let cost_per_sample = arguments.cost_per_sample;
                    scope.spawn(move || {
                        let mut stream = StreamFeedback::new(true);
                        let mut cb = SoftwareCommandBuffer::new();
                        for layout in layouts.iter().skip(t as usize).step_by(threads as usize) {
                            let info = RenderPassInfo {
                                shape: layout.shape(),
                                draw_count: draws,
                                cost_per_sample,
                            };
                            let decision = recorder.on_renderpass_end(&mut stream, &info);
                            if let Some(handle) = decision.measurement {
                                handle.emit_start(&mut cb);
                            }
                            cb.rasterize(layout.overdraw);
                            if let Some(handle) = decision.measurement {
                                handle.emit_end(&mut cb);
                            }
                        }
                        (stream, cb)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join()
                        .map_err(|_| anyhow::anyhow!("recording thread panicked in frame {frame}"))
                })
                .collect::<Result<Vec<_>>>()
        })?;
        let (mut streams, mut cbs): (Vec<_>, Vec<_>) = recorded.into_iter().unzip();

        let needs_fence = FeedbackState::submission_requires_extra_fence(&streams);
        let segment = state.on_submit(&mut streams);
        if needs_fence {
            let mut tail = SoftwareCommandBuffer::new();
            tail.append_segment(&segment);
            cbs.push(tail);
        }
        gpu.submit(cbs)
            .with_context(|| format!("execute frame {frame}"))?;
    }

    // Let the GPU finish and harvest what is left.
    gpu.retire_all().context("drain the software GPU")?;
    state.on_submit(std::iter::empty::<&mut StreamFeedback>());

    let stats = state.stats();
    if arguments.json {
        println!("{}", stats.to_json().context("serialize statistics")?);
    } else {
        println!("autotuning enabled:  {}", state.is_enabled());
        println!("tracked shapes:      {}", state.history().len());
        println!("submissions:         {}", stats.submissions);
        println!(
            "decisions:           {} bypass / {} binned ({} fallback, {} forced)",
            stats.bypass_decisions,
            stats.binned_decisions,
            stats.fallback_decisions,
            stats.forced_decisions
        );
        println!(
            "measurements:        {} allocated, {} harvested, {} discarded",
            stats.measurements_allocated, stats.results_harvested, stats.results_discarded
        );
        println!("evicted entries:     {}", stats.entries_evicted);
        println!("corruption events:   {}", stats.corruption_events);
    }

    state.destroy();
    Ok(())
}
