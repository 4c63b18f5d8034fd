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

//! Foundational types and interface contracts shared by the autotuning crates.
//!
//! This crate does not make any decisions. It describes what a render pass looks
//! like ([`shape`]), how commands reach the GPU ([`command`]), how memory shared
//! with the GPU is addressed ([`memory`]), and which knobs the engine exposes
//! ([`settings`]). A software GPU lives in [`software`] for simulation and tests.

#![warn(missing_docs)]

pub mod command;
pub mod error;
pub mod memory;
pub mod settings;
pub mod shape;
pub mod software;

pub use command::{CommandSegment, CommandStream, GpuCommand};
pub use error::{MemoryError, SettingsError};
pub use memory::{SharedMemory, SharedMemoryAllocator};
pub use settings::{AutotuneSettings, ForcedPath};
pub use shape::{
    AttachmentShape, FormatId, FramebufferShape, RenderPassShape, SampleCount, SubpassShape,
};
