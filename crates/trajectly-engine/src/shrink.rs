//! Delta-debugging shrinker (classic ddmin).
//!
//! Starting at granularity 2, repeatedly try deleting contiguous chunks of
//! the trace; adopt any candidate that still satisfies the failure
//! predicate and refine, otherwise double the granularity. Stops on the
//! wall-clock budget, the iteration limit, or when chunks reach single
//! events. The budget is checked at iteration boundaries only; an ongoing
//! predicate invocation is never interrupted.

use std::time::{Duration, Instant};

use trajectly_types::TraceEvent;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct ShrinkResult {
    pub original_len: usize,
    pub reduced_len: usize,
    pub iterations: usize,
    pub seconds: f64,
    pub reduced_events: Vec<TraceEvent>,
}

impl ShrinkResult {
    pub fn reduced(&self) -> bool {
        self.reduced_len < self.original_len
    }
}

pub fn ddmin_shrink<F>(
    events: &[TraceEvent],
    mut failure_predicate: F,
    max_duration: Duration,
    max_iterations: usize,
) -> Result<ShrinkResult>
where
    F: FnMut(&[TraceEvent]) -> bool,
{
    if max_duration.is_zero() {
        return Err(Error::InvalidArgument("max_duration must be > 0".to_string()));
    }
    if max_iterations == 0 {
        return Err(Error::InvalidArgument("max_iterations must be > 0".to_string()));
    }
    if events.is_empty() {
        return Err(Error::InvalidArgument("events must not be empty".to_string()));
    }
    if !failure_predicate(events) {
        return Err(Error::InvalidArgument(
            "failure_predicate must hold for original events".to_string(),
        ));
    }

    let started = Instant::now();
    let mut current: Vec<TraceEvent> = events.to_vec();
    let mut granularity: usize = 2;
    let mut iterations: usize = 0;

    while current.len() >= 2 {
        if started.elapsed() >= max_duration || iterations >= max_iterations {
            break;
        }

        let chunk_size = current.len().div_ceil(granularity).max(1);
        let mut reduced_this_round = false;

        let mut start = 0;
        while start < current.len() {
            if started.elapsed() >= max_duration || iterations >= max_iterations {
                break;
            }

            let end = (start + chunk_size).min(current.len());
            let mut candidate = Vec::with_capacity(current.len() - (end - start));
            candidate.extend_from_slice(&current[..start]);
            candidate.extend_from_slice(&current[end..]);
            if candidate.is_empty() {
                start += chunk_size;
                continue;
            }

            iterations += 1;
            if failure_predicate(&candidate) {
                current = candidate;
                granularity = granularity.saturating_sub(1).max(2);
                reduced_this_round = true;
                break;
            }
            start += chunk_size;
        }

        if !reduced_this_round {
            if granularity >= current.len() {
                break;
            }
            granularity = (granularity * 2).min(current.len());
        }
    }

    Ok(ShrinkResult {
        original_len: events.len(),
        reduced_len: current.len(),
        iterations,
        seconds: started.elapsed().as_secs_f64(),
        reduced_events: current,
    })
}
