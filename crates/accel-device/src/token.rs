// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Dependency tokens: the completion handles of asynchronous commands.
//!
//! A [`DependencyToken`] is produced exactly once, by the enqueue call of
//! the command it represents, and can be cloned freely by every consumer
//! that needs to wait on it. The queue worker drives it through
//! `Queued → Submitted → Running → Complete | Failed`.
//!
//! While pending, a token keeps the tokens it waits on alive so that
//! [`DependencyToken::orders_after`] can answer transitive ordering
//! questions. The wait list is dropped the moment the token signals: a
//! signaled token can only order after tokens that have signaled too.

use crate::{BufferId, DeviceError};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Identity of a token, unique per queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct TokenId(pub(crate) u64);

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Execution status of the command behind a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenStatus {
    Queued,
    Submitted,
    Running,
    Complete,
    Failed(String),
}

impl TokenStatus {
    /// `true` once the token can no longer change state.
    pub fn is_signaled(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed(_))
    }
}

/// Raw profiling timestamps, in nanoseconds since the queue was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ProfilingInfo {
    pub queued_ns: u64,
    pub submit_ns: u64,
    pub start_ns: u64,
    pub end_ns: u64,
}

struct TokenState {
    status: TokenStatus,
    timestamps: ProfilingInfo,
    waits: Vec<DependencyToken>,
}

struct TokenInner {
    id: TokenId,
    label: &'static str,
    buffers: Vec<BufferId>,
    profiling: bool,
    state: Mutex<TokenState>,
    signaled: Condvar,
}

/// Completion handle of one enqueued command.
#[derive(Clone)]
pub struct DependencyToken {
    inner: Arc<TokenInner>,
}

impl DependencyToken {
    pub(crate) fn new(
        id: TokenId,
        label: &'static str,
        buffers: Vec<BufferId>,
        profiling: bool,
        waits: Vec<DependencyToken>,
        queued_ns: u64,
    ) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                id,
                label,
                buffers,
                profiling,
                state: Mutex::new(TokenState {
                    status: TokenStatus::Queued,
                    timestamps: ProfilingInfo {
                        queued_ns,
                        submit_ns: queued_ns,
                        start_ns: queued_ns,
                        end_ns: queued_ns,
                    },
                    waits,
                }),
                signaled: Condvar::new(),
            }),
        }
    }

    pub fn id(&self) -> TokenId {
        self.inner.id
    }

    /// Name of the command that produced this token (`"add"`, `"copy"`, ...).
    pub fn label(&self) -> &'static str {
        self.inner.label
    }

    /// Buffers the command touches.
    pub fn buffers(&self) -> &[BufferId] {
        &self.inner.buffers
    }

    pub fn status(&self) -> TokenStatus {
        self.lock().status.clone()
    }

    pub fn is_signaled(&self) -> bool {
        self.lock().status.is_signaled()
    }

    pub fn is_complete(&self) -> bool {
        self.lock().status == TokenStatus::Complete
    }

    /// Blocks until the token signals.
    pub fn wait(&self) -> Result<(), DeviceError> {
        let mut state = self.lock();
        while !state.status.is_signaled() {
            state = self
                .inner
                .signaled
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        self.outcome(&state.status)
    }

    /// Blocks until the token signals or `timeout` expires.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<(), DeviceError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while !state.status.is_signaled() {
            let now = Instant::now();
            if now >= deadline {
                return Err(DeviceError::Timeout {
                    token: self.id(),
                    label: self.label(),
                    waited: timeout,
                });
            }
            let (next, _) = self
                .inner
                .signaled
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
        }
        self.outcome(&state.status)
    }

    /// Returns the four profiling timestamps of a completed command.
    pub fn profiling_info(&self) -> Result<ProfilingInfo, DeviceError> {
        if !self.inner.profiling {
            return Err(DeviceError::ProfilingNotEnabled);
        }
        let state = self.lock();
        if !state.status.is_signaled() {
            return Err(DeviceError::NotSignaled(self.id()));
        }
        self.outcome(&state.status)?;
        Ok(state.timestamps)
    }

    /// `true` if this token is `earlier` or (transitively) waits on it.
    pub fn orders_after(&self, earlier: &DependencyToken) -> bool {
        let target = earlier.id();
        let mut stack = vec![self.clone()];
        let mut seen = HashSet::new();
        while let Some(token) = stack.pop() {
            if token.id() == target {
                return true;
            }
            if !seen.insert(token.id()) {
                continue;
            }
            stack.extend(token.lock().waits.iter().cloned());
        }
        false
    }

    pub(crate) fn mark_submitted(&self, now_ns: u64) {
        let mut state = self.lock();
        state.status = TokenStatus::Submitted;
        state.timestamps.submit_ns = now_ns;
    }

    pub(crate) fn mark_running(&self, now_ns: u64) {
        let mut state = self.lock();
        state.status = TokenStatus::Running;
        state.timestamps.start_ns = now_ns;
    }

    pub(crate) fn complete(&self, now_ns: u64) {
        self.signal(TokenStatus::Complete, now_ns);
    }

    pub(crate) fn fail(&self, detail: String, now_ns: u64) {
        self.signal(TokenStatus::Failed(detail), now_ns);
    }

    /// Tokens this one still waits on (empty once signaled).
    pub(crate) fn pending_waits(&self) -> Vec<DependencyToken> {
        self.lock().waits.clone()
    }

    fn signal(&self, status: TokenStatus, now_ns: u64) {
        let mut state = self.lock();
        if state.status.is_signaled() {
            return;
        }
        if !matches!(state.status, TokenStatus::Running) {
            state.timestamps.start_ns = now_ns.max(state.timestamps.submit_ns);
        }
        state.timestamps.end_ns = now_ns;
        state.status = status;
        state.waits.clear();
        drop(state);
        self.inner.signaled.notify_all();
    }

    fn outcome(&self, status: &TokenStatus) -> Result<(), DeviceError> {
        match status {
            TokenStatus::Failed(detail) => Err(DeviceError::ExecutionFailed {
                token: self.id(),
                label: self.label(),
                detail: detail.clone(),
            }),
            _ => Ok(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TokenState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl PartialEq for DependencyToken {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for DependencyToken {}

impl fmt::Debug for DependencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyToken")
            .field("id", &self.id())
            .field("label", &self.label())
            .field("status", &self.status())
            .finish()
    }
}

/// A host-signaled token. Commands waiting on it stay pending until
/// [`UserToken::signal`] is called; dropping an unsignaled user token
/// fails it so the queue never hangs on a forgotten gate.
pub struct UserToken {
    token: DependencyToken,
    epoch: Instant,
}

impl UserToken {
    pub(crate) fn new(id: TokenId, epoch: Instant) -> Self {
        let now = epoch.elapsed().as_nanos() as u64;
        Self {
            token: DependencyToken::new(id, "user", Vec::new(), false, Vec::new(), now),
            epoch,
        }
    }

    /// The token to hand to dependent commands.
    pub fn token(&self) -> DependencyToken {
        self.token.clone()
    }

    pub fn signal(&self) {
        self.token.complete(self.now_ns());
    }

    pub fn fail(&self, reason: &str) {
        self.token.fail(reason.to_string(), self.now_ns());
    }

    fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

impl Drop for UserToken {
    fn drop(&mut self) {
        if !self.token.is_signaled() {
            self.fail("user token dropped without being signaled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn token(id: u64, waits: Vec<DependencyToken>) -> DependencyToken {
        DependencyToken::new(TokenId(id), "test", Vec::new(), true, waits, 10)
    }

    #[test]
    fn test_lifecycle_timestamps() {
        let t = token(1, Vec::new());
        assert_eq!(t.status(), TokenStatus::Queued);
        t.mark_submitted(20);
        t.mark_running(30);
        t.complete(45);
        let info = t.profiling_info().unwrap();
        assert_eq!(info.queued_ns, 10);
        assert_eq!(info.submit_ns, 20);
        assert_eq!(info.start_ns, 30);
        assert_eq!(info.end_ns, 45);
    }

    #[test]
    fn test_profiling_before_signal() {
        let t = token(1, Vec::new());
        assert!(matches!(t.profiling_info(), Err(DeviceError::NotSignaled(_))));
    }

    #[test]
    fn test_wait_across_threads() {
        let t = token(1, Vec::new());
        let t2 = t.clone();
        let h = thread::spawn(move || t2.wait());
        thread::sleep(Duration::from_millis(10));
        t.complete(50);
        assert!(h.join().unwrap().is_ok());
    }

    #[test]
    fn test_failed_wait_reports_label() {
        let t = token(3, Vec::new());
        t.fail("boom".into(), 11);
        let err = t.wait().unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert!(err.to_string().contains("t3"));
    }

    #[test]
    fn test_wait_timeout() {
        let t = token(1, Vec::new());
        assert!(matches!(
            t.wait_timeout(Duration::from_millis(5)),
            Err(DeviceError::Timeout { .. })
        ));
    }

    #[test]
    fn test_orders_after_transitive() {
        let a = token(1, Vec::new());
        let b = token(2, vec![a.clone()]);
        let c = token(3, vec![b.clone()]);
        let unrelated = token(4, Vec::new());
        assert!(c.orders_after(&a));
        assert!(c.orders_after(&c));
        assert!(!a.orders_after(&c));
        assert!(!unrelated.orders_after(&a));
    }

    #[test]
    fn test_signal_drops_wait_list() {
        let a = token(1, Vec::new());
        let b = token(2, vec![a.clone()]);
        assert_eq!(b.pending_waits().len(), 1);
        b.complete(20);
        assert!(b.pending_waits().is_empty());
    }

    #[test]
    fn test_user_token_drop_fails() {
        let user = UserToken::new(TokenId(9), Instant::now());
        let t = user.token();
        drop(user);
        assert!(matches!(t.status(), TokenStatus::Failed(_)));
    }
}
