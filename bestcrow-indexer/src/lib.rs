// SPDX-License-Identifier: Apache-2.0

#![allow(clippy::too_many_arguments)]

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod feed;
pub mod fees;
pub mod metrics;
pub mod pipeline;
pub mod projection;
pub mod query;
pub mod reconcile;
pub mod status;
pub mod store;
pub mod types;

/// Retry `$func` with jittered exponential backoff until it succeeds or
/// `$max_elapsed_time` runs out. Evaluates to `Ok(result)` on success and to
/// `Err(last_error)` once the budget is spent.
#[macro_export]
macro_rules! retry_with_max_elapsed_time {
    ($func:expr, $max_elapsed_time:expr) => {
        $crate::retry_with_max_elapsed_time!(
            $func,
            $max_elapsed_time,
            std::time::Duration::from_millis(400)
        )
    };
    ($func:expr, $max_elapsed_time:expr, $initial_interval:expr) => {{
        // Delays of 0.4, 0.8, 1.6 ... capped at 120 secs, applied with jitter.
        let backoff = backoff::ExponentialBackoff {
            initial_interval: $initial_interval,
            randomization_factor: 0.1,
            multiplier: 2.0,
            max_interval: std::time::Duration::from_secs(120),
            max_elapsed_time: Some($max_elapsed_time),
            ..Default::default()
        };
        backoff::future::retry(backoff, || {
            let fut = async {
                let result = $func.await;
                match result {
                    Ok(_) => Ok(result),
                    Err(e) => {
                        tracing::debug!("Retrying due to error: {:?}", e);
                        Err(backoff::Error::transient(e))
                    }
                }
            };
            std::boxed::Box::pin(fut)
        })
        .await
    }};
}
