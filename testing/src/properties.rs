//! Property-based testing strategies.
//!
//! Names are drawn from a small alphabet so generated projector filters and
//! generated events collide often enough to exercise both outcomes.

use plogview_core::{LogEvent, Offset, QName, WorkspaceId};
use proptest::prelude::*;

/// Strategy for qualified names over a small set of packages and entities.
pub fn arb_qname() -> impl Strategy<Value = QName> {
    (
        prop::sample::select(vec!["app", "sys", "test"]),
        prop::sample::select(vec!["A", "B", "C", "D"]),
    )
        .prop_map(|(pkg, entity)| QName::new(pkg, entity))
}

/// Strategy for log events with an optional argument and error marker.
pub fn arb_event() -> impl Strategy<Value = LogEvent> {
    (
        1..1_000_u64,
        1000..1010_u64,
        arb_qname(),
        prop::option::of(arb_qname()),
        any::<bool>(),
    )
        .prop_map(|(offset, workspace, name, arg, failed)| {
            let mut event = LogEvent::new(Offset::new(offset), WorkspaceId::new(workspace), name);
            if let Some(arg) = arg {
                event = event.with_arg(arg);
            }
            if failed {
                event = event.with_error("validation failed");
            }
            event
        })
}

/// Strategy for a set of names, possibly empty.
pub fn arb_qnames() -> impl Strategy<Value = Vec<QName>> {
    prop::collection::vec(arb_qname(), 0..3)
}
