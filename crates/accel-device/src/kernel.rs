// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Built-in kernels and launch geometry.
//!
//! Every kernel guards its body with `i < n`, so the global range may be
//! rounded up to the device's preferred work-group multiple without
//! touching elements past the logical length.

use crate::{DeviceBuffer, DeviceError};
use std::fmt;

/// The kernels the simulated device can run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Kernel {
    /// Empty body; used to measure dispatch overhead.
    Nop,
    /// `dst[i] = 0; src[i] = i`.
    Set,
    /// `dst[i] += src[i]`.
    Add,
}

impl Kernel {
    pub fn name(self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::Set => "set",
            Self::Add => "add",
        }
    }

    /// Number of buffer arguments.
    pub fn arity(self) -> usize {
        match self {
            Self::Nop => 0,
            Self::Set | Self::Add => 2,
        }
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One-dimensional launch geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct NdRange {
    pub global: usize,
    pub local: Option<usize>,
}

impl NdRange {
    /// Exactly `global` work-items, no work-group size requested.
    pub fn exact(global: usize) -> Self {
        Self {
            global,
            local: None,
        }
    }

    /// Covers `elements` with whole work-groups of `multiple` items.
    pub fn rounded(elements: usize, multiple: usize) -> Self {
        let multiple = multiple.max(1);
        Self {
            global: round_up(elements, multiple),
            local: Some(multiple),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), DeviceError> {
        if self.global == 0 {
            return Err(DeviceError::InvalidValue {
                op: "enqueue_kernel",
                detail: "global work size must be > 0".into(),
            });
        }
        if let Some(local) = self.local {
            if local == 0 || self.global % local != 0 {
                return Err(DeviceError::InvalidValue {
                    op: "enqueue_kernel",
                    detail: format!(
                        "global size {} is not a multiple of local size {local}",
                        self.global
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Rounds `size` up to the next multiple of `base`.
pub fn round_up(size: usize, base: usize) -> usize {
    if base == 0 {
        return size;
    }
    size.div_ceil(base) * base
}

/// A fully described kernel launch.
#[derive(Debug, Clone)]
pub struct KernelLaunch {
    pub kernel: Kernel,
    /// Arguments in kernel order: `[dst, src]` for `set` and `add`.
    pub buffers: Vec<DeviceBuffer>,
    /// Logical element count `n`.
    pub elements: usize,
    pub range: NdRange,
}

impl KernelLaunch {
    pub(crate) fn validate(&self) -> Result<(), DeviceError> {
        let invalid = |detail: String| DeviceError::InvalidValue {
            op: "enqueue_kernel",
            detail,
        };
        self.range.validate()?;
        if self.buffers.len() != self.kernel.arity() {
            return Err(invalid(format!(
                "{} takes {} buffers, got {}",
                self.kernel,
                self.kernel.arity(),
                self.buffers.len()
            )));
        }
        if let [dst, src] = self.buffers.as_slice() {
            if dst.id() == src.id() {
                return Err(invalid(format!("{} needs two distinct buffers", self.kernel)));
            }
        }
        for buffer in &self.buffers {
            buffer.ensure_live()?;
            if self.elements > buffer.elements() {
                return Err(invalid(format!(
                    "n = {} exceeds the {} elements of buffer {}",
                    self.elements,
                    buffer.elements(),
                    buffer.id()
                )));
            }
        }
        Ok(())
    }
}

pub(crate) fn nop(global: usize) {
    for i in 0..global {
        std::hint::black_box(i);
    }
}

pub(crate) fn set(dst: &mut [f32], src: &mut [f32], n: usize, global: usize) {
    for i in 0..global.min(n) {
        dst[i] = 0.0;
        src[i] = i as f32;
    }
}

pub(crate) fn add(dst: &mut [f32], src: &[f32], n: usize, global: usize) {
    for i in 0..global.min(n) {
        dst[i] += src[i];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(1000, 64), 1024);
        assert_eq!(round_up(1024, 64), 1024);
        assert_eq!(round_up(1, 16), 16);
        assert_eq!(round_up(7, 0), 7);
    }

    #[test]
    fn test_rounded_range_validates() {
        let r = NdRange::rounded(1000, 64);
        assert_eq!(r.global, 1024);
        assert!(r.validate().is_ok());
        assert!(NdRange::exact(0).validate().is_err());
        let bad = NdRange {
            global: 100,
            local: Some(64),
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_set_then_add_guarded() {
        let mut dst = vec![9.0; 8];
        let mut src = vec![0.0; 8];
        // Global range past n must not touch the tail.
        set(&mut dst[..6], &mut src[..6], 6, 16);
        assert_eq!(&src[..6], &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(dst[6], 9.0);
        add(&mut dst, &src, 6, 16);
        assert_eq!(dst[5], 5.0);
        assert_eq!(dst[7], 9.0);
    }

    #[test]
    fn test_kernel_serde_names() {
        assert_eq!(serde_json::to_string(&Kernel::Add).unwrap(), "\"add\"");
        assert_eq!(Kernel::Nop.arity(), 0);
    }
}
