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

//! Structural descriptors of a render pass instance.
//!
//! A [`RenderPassShape`] only carries what is needed to recognise a render pass
//! across frames: framebuffer dimensions, attachment views and subpass topology.
//! It borrows its attachment and subpass lists so that describing a pass on the
//! recording hot path never allocates.

/// An opaque, backend-defined texture format code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FormatId(pub u32);

/// The number of samples per pixel of an attachment or subpass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SampleCount {
    /// 1 sample per pixel (MSAA disabled).
    #[default]
    X1,
    /// 2 samples per pixel.
    X2,
    /// 4 samples per pixel.
    X4,
    /// 8 samples per pixel.
    X8,
    /// 16 samples per pixel.
    X16,
}

impl SampleCount {
    /// Returns the number of samples as an integer.
    pub fn count(self) -> u32 {
        match self {
            SampleCount::X1 => 1,
            SampleCount::X2 => 2,
            SampleCount::X4 => 4,
            SampleCount::X8 => 8,
            SampleCount::X16 => 16,
        }
    }
}

/// Dimensions of the framebuffer a render pass draws into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FramebufferShape {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Number of array layers.
    pub layers: u32,
}

/// The view of one framebuffer attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AttachmentShape {
    /// The view format.
    pub format: FormatId,
    /// Width of the view in pixels.
    pub width: u32,
    /// Height of the view in pixels.
    pub height: u32,
    /// Depth of the view (1 for 2D images).
    pub depth: u32,
    /// Number of array layers covered by the view.
    pub layer_count: u32,
    /// Number of mip levels covered by the view.
    pub level_count: u32,
}

/// The topology of one subpass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SubpassShape {
    /// Rasterization sample count of the subpass.
    pub samples: SampleCount,
    /// Number of input attachments read by the subpass.
    pub input_count: u32,
    /// Number of color attachments written by the subpass.
    pub color_count: u32,
    /// Number of resolve attachments written by the subpass.
    pub resolve_count: u32,
}

/// A borrowed structural description of one render pass instance.
#[derive(Debug, Clone, Copy)]
pub struct RenderPassShape<'a> {
    /// The framebuffer the pass renders into.
    pub framebuffer: FramebufferShape,
    /// The attachment views, in framebuffer order.
    pub attachments: &'a [AttachmentShape],
    /// The subpasses, in execution order.
    pub subpasses: &'a [SubpassShape],
}

impl<'a> RenderPassShape<'a> {
    /// Creates a new shape from its parts.
    pub fn new(
        framebuffer: FramebufferShape,
        attachments: &'a [AttachmentShape],
        subpasses: &'a [SubpassShape],
    ) -> Self {
        Self {
            framebuffer,
            attachments,
            subpasses,
        }
    }

    /// Returns `true` if every subpass rasterizes with a single sample.
    pub fn is_single_sampled(&self) -> bool {
        self.subpasses.iter().all(|s| s.samples == SampleCount::X1)
    }
}
