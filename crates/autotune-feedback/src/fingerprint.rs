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

//! Structural fingerprints of render passes.
//!
//! Two render passes with the same framebuffer dimensions, attachment views and
//! subpass topology get the same fingerprint, even when the underlying API
//! objects were recreated in between. Collisions are not handled: the worst a
//! collision can do is pick a suboptimal rendering path.

use ahash::RandomState;
use autotune_core::shape::RenderPassShape;
use std::fmt;
use std::hash::{BuildHasher, Hasher};

// Fixed seeds keep fingerprints stable for the whole process lifetime.
const SEEDS: [u64; 4] = [
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
];

/// The 64-bit key of a render pass shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(pub u64);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Computes the fingerprint of a render pass shape.
///
/// Fields are folded in a fixed order, list lengths before list contents, so
/// that moving a value from one attachment to the next changes the result.
pub fn fingerprint(shape: &RenderPassShape<'_>) -> Fingerprint {
    let mut hasher = RandomState::with_seeds(SEEDS[0], SEEDS[1], SEEDS[2], SEEDS[3]).build_hasher();

    let fb = &shape.framebuffer;
    hasher.write_u32(fb.width);
    hasher.write_u32(fb.height);
    hasher.write_u32(fb.layers);

    hasher.write_u32(shape.attachments.len() as u32);
    for attachment in shape.attachments {
        hasher.write_u32(attachment.format.0);
        hasher.write_u32(attachment.width);
        hasher.write_u32(attachment.height);
        hasher.write_u32(attachment.depth);
        hasher.write_u32(attachment.layer_count);
        hasher.write_u32(attachment.level_count);
    }

    hasher.write_u32(shape.subpasses.len() as u32);
    for subpass in shape.subpasses {
        hasher.write_u32(subpass.samples.count());
        hasher.write_u32(subpass.input_count);
        hasher.write_u32(subpass.color_count);
        hasher.write_u32(subpass.resolve_count);
    }

    Fingerprint(hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use autotune_core::shape::{
        AttachmentShape, FormatId, FramebufferShape, SampleCount, SubpassShape,
    };
    use std::collections::HashSet;

    fn color(format: u32, width: u32, height: u32) -> AttachmentShape {
        AttachmentShape {
            format: FormatId(format),
            width,
            height,
            depth: 1,
            layer_count: 1,
            level_count: 1,
        }
    }

    fn framebuffer(width: u32, height: u32) -> FramebufferShape {
        FramebufferShape {
            width,
            height,
            layers: 1,
        }
    }

    #[test]
    fn identical_structure_gives_identical_fingerprint() {
        // Two independently built descriptions, as an application recreating
        // its framebuffer every frame would produce.
        let attachments_a = vec![color(37, 1280, 720), color(126, 1280, 720)];
        let attachments_b = attachments_a.clone();
        let subpasses_a = vec![SubpassShape {
            color_count: 1,
            ..Default::default()
        }];
        let subpasses_b = subpasses_a.clone();

        let a = RenderPassShape::new(framebuffer(1280, 720), &attachments_a, &subpasses_a);
        let b = RenderPassShape::new(framebuffer(1280, 720), &attachments_b, &subpasses_b);
        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert_eq!(fingerprint(&a), fingerprint(&a));
    }

    #[test]
    fn single_field_changes_alter_fingerprint() {
        let attachments = [color(37, 800, 600)];
        let subpasses = [SubpassShape {
            color_count: 1,
            ..Default::default()
        }];
        let base = fingerprint(&RenderPassShape::new(
            framebuffer(800, 600),
            &attachments,
            &subpasses,
        ));

        let more_attachments = [color(37, 800, 600), color(37, 800, 600)];
        let msaa = [SubpassShape {
            samples: SampleCount::X4,
            color_count: 1,
            ..Default::default()
        }];
        let other_format = [color(38, 800, 600)];

        let variants = [
            RenderPassShape::new(framebuffer(800, 601), &attachments, &subpasses),
            RenderPassShape::new(framebuffer(800, 600), &more_attachments, &subpasses),
            RenderPassShape::new(framebuffer(800, 600), &attachments, &msaa),
            RenderPassShape::new(framebuffer(800, 600), &other_format, &subpasses),
            RenderPassShape::new(framebuffer(800, 600), &attachments, &[]),
        ];
        for variant in &variants {
            assert_ne!(base, fingerprint(variant), "variant {variant:?} collided");
        }
    }

    #[test]
    fn field_order_matters() {
        // Width and height swapped between framebuffer and attachment.
        let a_att = [color(1, 64, 32)];
        let b_att = [color(1, 32, 64)];
        let a = RenderPassShape::new(framebuffer(32, 64), &a_att, &[]);
        let b = RenderPassShape::new(framebuffer(64, 32), &b_att, &[]);
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn structured_fuzz_set_has_no_collisions() {
        let sizes = [(64, 64), (256, 256), (800, 600), (1280, 720), (1920, 1080), (3840, 2160)];
        let formats = [37, 43, 44, 50, 97, 109, 124, 126, 129, 130];
        let samples = [SampleCount::X1, SampleCount::X2, SampleCount::X4, SampleCount::X8];

        let mut seen = HashSet::new();
        let mut total = 0usize;
        for &(width, height) in &sizes {
            for layers in 1..=3 {
                for &format in &formats {
                    for attachment_count in 0..=4usize {
                        for &sample_count in &samples {
                            for color_count in 0..=3 {
                                for resolve_count in 0..=1 {
                                    let attachments = vec![color(format, width, height); attachment_count];
                                    let subpasses = [SubpassShape {
                                        samples: sample_count,
                                        input_count: 0,
                                        color_count,
                                        resolve_count,
                                    }];
                                    let shape = RenderPassShape::new(
                                        FramebufferShape {
                                            width,
                                            height,
                                            layers,
                                        },
                                        &attachments,
                                        &subpasses,
                                    );
                                    seen.insert(fingerprint(&shape));
                                    total += 1;
                                }
                            }
                        }
                    }
                }
            }
        }

        // Shapes without attachments ignore the format, so those repeat by design.
        let zero_attachment_dupes = sizes.len() * 3 * (formats.len() - 1) * samples.len() * 4 * 2;
        let distinct_shapes = total - zero_attachment_dupes;
        assert_eq!(
            seen.len(),
            distinct_shapes,
            "{} collisions out of {} distinct shapes",
            distinct_shapes - seen.len(),
            distinct_shapes
        );
    }

    #[test]
    fn display_is_zero_padded_hex() {
        assert_eq!(Fingerprint(0xab).to_string(), "00000000000000ab");
    }
}
