//! Message status information.
//!
//! This module provides the [`Status`] struct returned by receives, probes and
//! completed requests.

/// Information about a probed or received message.
///
/// Returned by [`ProcessGroup::receive`](crate::ProcessGroup::receive),
/// [`ProcessGroup::probe`](crate::ProcessGroup::probe) and
/// [`Request::wait`](crate::Request::wait).
///
/// `source` is a rank of the group the operation ran on. `count` is the
/// number of elements of the requested type; it is exact for arithmetic and
/// serialized payloads alike, because every message records the element count
/// its sender encoded.
///
/// # Example
///
/// ```no_run
/// # use ferrogroup::LocalFabric;
/// LocalFabric::run(2, |world| {
///     if world.rank() == 0 {
///         world.send(&[1.0f64, 2.0, 3.0][..], 1, 7).unwrap();
///     } else {
///         let status = world.probe::<f64>(world.any_source(), world.any_tag()).unwrap();
///         println!("Message from rank {} with tag {}, {} elements",
///                  status.source, status.tag, status.count);
///     }
/// })
/// .unwrap();
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// Source rank of the message.
    pub source: i32,
    /// Tag of the message.
    pub tag: i32,
    /// Number of elements in the message.
    pub count: i64,
}
