// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Caller-facing error types.
//!
//! Per-batch send failures are not represented here: the `Sender` resolves
//! them itself (log, retry, or state-update) per §7 of the specification
//! rather than returning a `Result` to a caller who can no longer act on a
//! specific batch.

use crate::target::Target;

/// Errors a caller can observe from the public surface of this crate.
#[derive(Debug, thiserror::Error)]
pub enum PusherError {
    /// A `WorkerPool` has been stopped and will not accept further work
    /// (`WorkerPool::submit`).
    #[error("component stopped")]
    Stopped,

    /// `Destination::publish` was called after the destination's reference
    /// count reached zero and it was torn down.
    #[error("output already stopped")]
    ErrOutputStopped,

    /// `TargetManager::init_target` could not create the log stream (and,
    /// if required, the log group) for `target`.
    #[error("failed to initialize target {target}: {source}")]
    TargetInit {
        target: Target,
        #[source]
        source: crate::client::UpstreamError,
    },

    /// `RetryHeap::push` was blocked waiting for capacity, or found the heap
    /// already closed, when `RetryHeap::stop` ran (spec §3/§5/§8: stopping
    /// the heap releases blocked pushers rather than leaving them hung).
    #[error("retry heap stopped while waiting for capacity")]
    RetryHeapStopped,
}

/// Renders a short, human-readable cause chain in a single log line
/// (mirrors the teacher's `eprintln!("... due to {:?}", e)` style in
/// `lib.rs`/`loggers.rs`). Used where a `PusherError` wraps an `UpstreamError`
/// and both should land in one log line rather than just the outer message.
pub(crate) fn display_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(s) = source {
        out.push_str(": ");
        out.push_str(&s.to_string());
        source = s.source();
    }
    out
}
