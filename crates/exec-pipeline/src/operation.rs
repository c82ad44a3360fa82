// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Operations accepted by [`crate::Pipeline::submit`].
//!
//! Host mapping is not an [`Operation`]: it goes through the scoped
//! [`crate::Pipeline::map`] API so that every map has a matching unmap.

use accel_device::Kernel;
use placement_manager::{ContentPolicy, MemoryBuffer};
use std::fmt;

/// One asynchronous step against managed buffers.
#[derive(Debug, Clone)]
pub enum Operation {
    /// Runs a built-in kernel. For `nop`, `elements` is the global work
    /// size; data kernels take `[dst, src]` and cover `elements` items.
    KernelLaunch {
        kernel: Kernel,
        buffers: Vec<MemoryBuffer>,
        elements: usize,
    },
    /// Copies the first `bytes` bytes of `src` into `dst`.
    BufferCopy {
        src: MemoryBuffer,
        dst: MemoryBuffer,
        bytes: usize,
    },
    FillBuffer { buffer: MemoryBuffer, pattern: f32 },
    MigrateToHost {
        buffer: MemoryBuffer,
        content: ContentPolicy,
    },
    MigrateToDevice {
        buffer: MemoryBuffer,
        content: ContentPolicy,
    },
}

impl Operation {
    /// Launches `kernel` over `[dst, src]`, covering every element of `dst`.
    pub fn kernel(kernel: Kernel, dst: &MemoryBuffer, src: &MemoryBuffer) -> Self {
        Self::KernelLaunch {
            kernel,
            buffers: vec![dst.clone(), src.clone()],
            elements: dst.elements(),
        }
    }

    /// An empty kernel over `global` work-items.
    pub fn nop(global: usize) -> Self {
        Self::KernelLaunch {
            kernel: Kernel::Nop,
            buffers: Vec::new(),
            elements: global,
        }
    }

    /// Copies the whole of `src` into `dst`.
    pub fn copy(src: &MemoryBuffer, dst: &MemoryBuffer) -> Self {
        Self::BufferCopy {
            src: src.clone(),
            dst: dst.clone(),
            bytes: src.size_bytes(),
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            Self::KernelLaunch { kernel, .. } => OperationKind::Kernel(*kernel),
            Self::BufferCopy { .. } => OperationKind::Copy,
            Self::FillBuffer { .. } => OperationKind::Fill,
            Self::MigrateToHost { .. } => OperationKind::MigrateToHost,
            Self::MigrateToDevice { .. } => OperationKind::MigrateToDevice,
        }
    }

    /// Buffers the operation touches.
    pub fn buffers(&self) -> Vec<&MemoryBuffer> {
        match self {
            Self::KernelLaunch { buffers, .. } => buffers.iter().collect(),
            Self::BufferCopy { src, dst, .. } => vec![src, dst],
            Self::FillBuffer { buffer, .. }
            | Self::MigrateToHost { buffer, .. }
            | Self::MigrateToDevice { buffer, .. } => vec![buffer],
        }
    }
}

/// What kind of step a token or sample stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperationKind {
    Kernel(Kernel),
    Copy,
    Map,
    Unmap,
    MigrateToHost,
    MigrateToDevice,
    Fill,
    Barrier,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kernel(kernel) => write!(f, "{kernel}"),
            Self::Copy => write!(f, "copy"),
            Self::Map => write!(f, "map"),
            Self::Unmap => write!(f, "unmap"),
            Self::MigrateToHost => write!(f, "migrate-to-host"),
            Self::MigrateToDevice => write!(f, "migrate-to-device"),
            Self::Fill => write!(f, "fill"),
            Self::Barrier => write!(f, "barrier"),
        }
    }
}

impl serde::Serialize for OperationKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
