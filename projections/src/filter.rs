//! Acceptance filter: which events a projector sees.

use plogview_core::{LogEvent, Projector};

/// Decide whether `projector` should be invoked for `event`.
///
/// Exactly one rule applies, checked in this order:
///
/// 1. an event carrying an error marker is accepted iff the projector
///    handles error events;
/// 2. a non-empty event filter accepts only listed event type names;
/// 3. a non-empty argument filter accepts only listed argument type names;
/// 4. a projector with no filters accepts everything.
#[must_use]
pub fn is_acceptable(projector: &Projector, event: &LogEvent) -> bool {
    if event.is_error() {
        return projector.wants_errors();
    }
    if !projector.events().is_empty() {
        return projector.events().contains(event.name());
    }
    if !projector.args().is_empty() {
        return event
            .arg_name()
            .is_some_and(|arg| projector.args().contains(arg));
    }
    true
}
