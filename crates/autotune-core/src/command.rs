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

//! The command-stream capability the autotuner appends to.
//!
//! The engine never encodes hardware packets itself. It asks a [`CommandStream`]
//! for two things: copy the running sample counter to an address, and write a
//! fence value to an address once all preceding work has completed. The host
//! backend turns those requests into whatever its GPU understands.

/// A GPU command requested by the autotuner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuCommand {
    /// Copy the current 64-bit sample counter to `address` (16-byte aligned).
    WriteSampleCount {
        /// Destination GPU address.
        address: u64,
    },
    /// Write `value` to `address` once every previously submitted command has
    /// completed.
    WriteFence {
        /// Destination GPU address.
        address: u64,
        /// The fence value to write.
        value: u32,
    },
}

/// A command stream that autotuning commands can be appended to.
pub trait CommandStream {
    /// Appends a sample-counter copy to `address`.
    fn write_sample_count(&mut self, address: u64);

    /// Appends a fence write of `value` to `address`, ordered after all
    /// preceding work.
    fn write_fence(&mut self, address: u64, value: u32);
}

/// A standalone segment of autotuning commands.
///
/// This is what the submission path hands back to the host: the host includes
/// it in the submission after the batch's own command streams.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSegment {
    commands: Vec<GpuCommand>,
}

impl CommandSegment {
    /// Creates an empty segment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if nothing was appended.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Returns the number of recorded commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns the recorded commands in append order.
    pub fn commands(&self) -> &[GpuCommand] {
        &self.commands
    }

    /// Replays the recorded commands into another stream.
    pub fn replay_into(&self, stream: &mut dyn CommandStream) {
        for command in &self.commands {
            match *command {
                GpuCommand::WriteSampleCount { address } => stream.write_sample_count(address),
                GpuCommand::WriteFence { address, value } => stream.write_fence(address, value),
            }
        }
    }
}

impl CommandStream for CommandSegment {
    fn write_sample_count(&mut self, address: u64) {
        self.commands.push(GpuCommand::WriteSampleCount { address });
    }

    fn write_fence(&mut self, address: u64, value: u32) {
        self.commands.push(GpuCommand::WriteFence { address, value });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_records_in_append_order() {
        let mut segment = CommandSegment::new();
        assert!(segment.is_empty());

        segment.write_sample_count(0x1010);
        segment.write_fence(0x1000, 7);

        assert_eq!(segment.len(), 2);
        assert_eq!(
            segment.commands(),
            &[
                GpuCommand::WriteSampleCount { address: 0x1010 },
                GpuCommand::WriteFence {
                    address: 0x1000,
                    value: 7
                },
            ]
        );
    }

    #[test]
    fn segment_replays_into_another_stream() {
        let mut source = CommandSegment::new();
        source.write_fence(0x40, 3);
        source.write_sample_count(0x50);

        let mut target = CommandSegment::new();
        source.replay_into(&mut target);
        assert_eq!(source, target);
    }
}
