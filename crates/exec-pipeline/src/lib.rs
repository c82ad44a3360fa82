// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # exec-pipeline
//!
//! Asynchronous, dependency-wired submission of kernel, copy, fill and
//! migration work against managed buffers.
//!
//! Correctness depends only on the tokens an operation waits on, never on
//! submission order. Before running a kernel, copy or fill, the pipeline
//! asks the placement manager to make the operation's buffers resident
//! and chains the resulting migrations in front of the command.
//!
//! ```text
//! submit(add(b0, b3), waits=[t7])
//!     │
//!     ├─► ensure_resident([b0, b3])  ──► evict b1 (after its last use)
//!     │                                  migrate b3 to device
//!     ▼
//!   enqueue add  waits=[t7, evict, migrate]  ──► t9
//! ```

mod error;
mod operation;
mod pipeline;
mod view;

pub use error::PipelineError;
pub use operation::{Operation, OperationKind};
pub use pipeline::Pipeline;
pub use view::{MappedView, PendingMap};
