// ABOUTME: Metric recording helpers for engine counters and gauges.
// ABOUTME: Thin wrappers so call sites stay one line and names stay consistent.

use metrics::{counter, gauge};

use crate::event::EventClass;

/// Record one event entering the dispatch pipeline.
pub fn record_event(class: EventClass) {
    counter!("confab_events_total", "class" => class.as_str()).increment(1);
}

/// Record a handler invocation by name.
pub fn record_handler(name: &str) {
    counter!("confab_handler_invocations_total", "handler" => name.to_string()).increment(1);
}

/// Record a pipeline interrupted by a handler.
pub fn record_interrupt() {
    counter!("confab_pipeline_interrupts_total").increment(1);
}

/// Record a pending wait being registered.
pub fn record_wait_registered() {
    counter!("confab_waits_registered_total").increment(1);
}

/// Record a pending wait resolved by a matching event.
pub fn record_wait_matched() {
    counter!("confab_waits_matched_total").increment(1);
}

/// Record a pending wait expiring.
pub fn record_wait_timeout() {
    counter!("confab_waits_timed_out_total").increment(1);
}

/// Update the live context gauge.
pub fn set_live_contexts(count: u64) {
    gauge!("confab_live_contexts").set(count as f64);
}

/// Update the pending wait gauge.
pub fn set_pending_waits(count: u64) {
    gauge!("confab_pending_waits").set(count as f64);
}
