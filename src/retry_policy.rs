// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! `RetryWaitPolicy` (spec §2, §4.4 step 7): a pure function mapping
//! (error, retry-count) to a wait duration, using two backoff families
//! classified from the error kind.

use std::time::Duration;

use rand::Rng;

use crate::client::UpstreamError;

/// Which backoff family an error belongs to (spec §6's retry taxonomy).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryFamily {
    /// `ServiceUnavailableException`, `ThrottlingException`, generic 5xx,
    /// `RequestTimeout`, `ResponseTimeout`, connection reset/refused/timeout.
    Long,
    /// Any other recognized, typed upstream error.
    Short,
}

/// Classify an `UpstreamError` into the family its retry wait should be
/// computed from. Errors that are not retryable at all (terminal) are not
/// represented here — the `Sender` filters those out before consulting this
/// policy.
#[must_use]
pub fn classify(err: &UpstreamError) -> RetryFamily {
    match err {
        UpstreamError::ServiceUnavailable(_)
        | UpstreamError::Throttling(_)
        | UpstreamError::ServerError(..)
        | UpstreamError::RequestTimeout(_)
        | UpstreamError::ResponseTimeout(_)
        | UpstreamError::ConnectionError(_) => RetryFamily::Long,
        _ => RetryFamily::Short,
    }
}

/// Base delay, doubling factor, and cap for one backoff family.
#[derive(Clone, Copy, Debug)]
struct FamilyParams {
    base: Duration,
    cap: Duration,
}

const SHORT: FamilyParams = FamilyParams {
    base: Duration::from_millis(200),
    cap: Duration::from_secs(60),
};

const LONG: FamilyParams = FamilyParams {
    base: Duration::from_secs(2),
    cap: Duration::from_secs(60),
};

/// Pure function: given the family and how many times this family has
/// already been retried, compute the wait before the next attempt.
/// Exponential backoff capped at 1 minute, with 50% jitter (spec §2).
#[must_use]
pub fn wait_duration(family: RetryFamily, retry_count: u32) -> Duration {
    let params = match family {
        RetryFamily::Short => SHORT,
        RetryFamily::Long => LONG,
    };
    wait_duration_with_rng(params, retry_count, &mut rand::thread_rng())
}

fn wait_duration_with_rng(params: FamilyParams, retry_count: u32, rng: &mut impl Rng) -> Duration {
    let exp = 2u64.saturating_pow(retry_count.min(32));
    let nominal_ms = (params.base.as_millis() as u64)
        .saturating_mul(exp)
        .min(params.cap.as_millis() as u64);

    // 50% jitter: draw uniformly from [nominal * 0.5, nominal * 1.5).
    let half = nominal_ms / 2;
    let jittered_ms = if half == 0 {
        nominal_ms
    } else {
        half + rng.gen_range(0..=nominal_ms)
    };
    Duration::from_millis(jittered_ms.min(params.cap.as_millis() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_matches_spec_taxonomy() {
        assert_eq!(
            classify(&UpstreamError::ServiceUnavailable("x".into())),
            RetryFamily::Long
        );
        assert_eq!(
            classify(&UpstreamError::Throttling("x".into())),
            RetryFamily::Long
        );
        assert_eq!(
            classify(&UpstreamError::ServerError("x".into(), 503)),
            RetryFamily::Long
        );
        assert_eq!(
            classify(&UpstreamError::ConnectionError("x".into())),
            RetryFamily::Long
        );
        assert_eq!(
            classify(&UpstreamError::OtherApiError("Code".into(), "x".into())),
            RetryFamily::Short
        );
    }

    #[test]
    fn wait_duration_is_capped_at_one_minute() {
        for family in [RetryFamily::Short, RetryFamily::Long] {
            for attempt in 0..40 {
                let d = wait_duration(family, attempt);
                assert!(d <= Duration::from_secs(60), "{family:?} attempt {attempt} -> {d:?}");
            }
        }
    }

    #[test]
    fn wait_duration_grows_then_plateaus() {
        // Use a fixed params/rng instance directly to avoid flakiness from
        // jitter across the public API while still proving monotonic growth
        // of the *nominal* (pre-jitter) delay via the cap.
        let mut rng = rand::rngs::mock::StepRng::new(0, 0);
        let d0 = wait_duration_with_rng(SHORT, 0, &mut rng);
        let d5 = wait_duration_with_rng(SHORT, 5, &mut rng);
        assert!(d5 >= d0);
    }
}
