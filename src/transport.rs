//! Transport capability surface.
//!
//! A [`Transport`] moves tagged byte messages between the members of a fixed
//! set of processes. It is the only thing [`ProcessGroup`](crate::ProcessGroup)
//! needs from the outside world: collectives, barriers and sub-groups are all
//! built on top of `send`/`recv`/`probe`.
//!
//! Implementations must deliver messages reliably and must not reorder two
//! messages from the same sender that match the same [`Selector`].

use crate::datatype::{DatatypeTag, Element};
use crate::error::TransportError;

/// Wildcard source rank accepted by receive and probe operations.
pub const ANY_SOURCE: i32 = -1;

/// Wildcard tag accepted by receive and probe operations.
///
/// `ANY_TAG` only matches user tags (`>= 0`); collective traffic travels on
/// reserved negative tags and is never matched by it.
pub const ANY_TAG: i32 = -1;

/// Result type used by transports
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Identifier of a communication context.
///
/// Messages sent in one context are only visible to receives in the same
/// context; every process group owns one.
pub type ContextId = u64;

/// The context of the full set of transport ranks.
pub const WORLD_CONTEXT: ContextId = 0;

/// Metadata of a message, available without consuming it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    /// Context the message was sent in
    pub context: ContextId,
    /// Transport rank of the sender
    pub source: i32,
    /// Message tag
    pub tag: i32,
    /// Encoding of the payload
    pub datatype: DatatypeTag,
    /// Number of elements the sender encoded
    pub count: usize,
    /// Payload length in bytes
    pub byte_len: usize,
}

/// A tagged message in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Context the message belongs to
    pub context: ContextId,
    /// Transport rank of the sender; stamped by the transport on send
    pub source: i32,
    /// Message tag
    pub tag: i32,
    /// Encoding of the payload
    pub datatype: DatatypeTag,
    /// Number of encoded elements
    pub count: usize,
    /// Encoded payload
    pub payload: Vec<u8>,
    /// Set on messages that carry no data and report a failure at the sender
    pub failed: bool,
}

impl Message {
    /// Encode `items` into a message.
    pub fn encode<T: Element>(
        context: ContextId,
        tag: i32,
        items: &[T],
    ) -> TransportResult<Self> {
        Ok(Message {
            context,
            source: ANY_SOURCE,
            tag,
            datatype: T::TAG,
            count: items.len(),
            payload: T::encode(items)?,
            failed: false,
        })
    }

    /// A data-less message telling the receiver that the sender failed.
    pub fn failure(context: ContextId, tag: i32) -> Self {
        Message {
            context,
            source: ANY_SOURCE,
            tag,
            datatype: DatatypeTag::U8,
            count: 0,
            payload: Vec::new(),
            failed: true,
        }
    }

    /// Decode the payload, checking the datatype and element count.
    pub fn decode<T: Element>(&self) -> TransportResult<Vec<T>> {
        if self.datatype != T::TAG {
            return Err(TransportError::TypeMismatch {
                expected: T::TAG.to_string(),
                found: self.datatype.to_string(),
            });
        }
        let items = T::decode(&self.payload)?;
        if items.len() != self.count {
            return Err(TransportError::LengthMismatch {
                expected: self.count,
                found: items.len(),
            });
        }
        Ok(items)
    }

    /// The message metadata.
    pub fn envelope(&self) -> Envelope {
        Envelope {
            context: self.context,
            source: self.source,
            tag: self.tag,
            datatype: self.datatype,
            count: self.count,
            byte_len: self.payload.len(),
        }
    }
}

/// Which messages a receive or probe accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selector {
    /// Context to search
    pub context: ContextId,
    /// Transport rank of the sender, or [`ANY_SOURCE`]
    pub source: i32,
    /// Tag, or [`ANY_TAG`]
    pub tag: i32,
}

impl Selector {
    /// Whether `envelope` satisfies this selector.
    pub fn matches(&self, envelope: &Envelope) -> bool {
        envelope.context == self.context
            && (self.source == ANY_SOURCE || envelope.source == self.source)
            && if self.tag == ANY_TAG {
                envelope.tag >= 0
            } else {
                envelope.tag == self.tag
            }
    }
}

/// Final state of a non-blocking operation.
#[derive(Debug)]
pub enum Outcome {
    /// A send has been handed to the transport
    Sent,
    /// A receive matched this message
    Received(Message),
}

/// A non-blocking operation that has been started.
pub trait Completion: Send {
    /// Check for completion without blocking.
    ///
    /// Returns `Some` exactly once; the completion must not be polled again
    /// afterwards.
    fn poll(&mut self) -> TransportResult<Option<Outcome>>;

    /// Block until the operation completes.
    fn wait(self: Box<Self>) -> TransportResult<Outcome>;
}

/// Handle to an in-flight transport operation.
pub type Pending = Box<dyn Completion>;

/// A completion that is already finished.
pub struct Ready(Option<Outcome>);

impl Ready {
    /// Wrap an outcome.
    pub fn new(outcome: Outcome) -> Self {
        Ready(Some(outcome))
    }
}

impl Completion for Ready {
    fn poll(&mut self) -> TransportResult<Option<Outcome>> {
        Ok(self.0.take())
    }

    fn wait(self: Box<Self>) -> TransportResult<Outcome> {
        self.0
            .ok_or_else(|| TransportError::Aborted("completion already consumed".into()))
    }
}

/// Reliable, tagged, ordered delivery between a fixed set of ranks.
pub trait Transport: Send + Sync {
    /// Rank of the calling process, in `[0, size)`.
    fn rank(&self) -> i32;

    /// Number of processes reachable through this transport.
    fn size(&self) -> i32;

    /// Deliver `message` to `dest`, blocking until the transport accepts it.
    ///
    /// The transport stamps its own rank into `message.source`.
    fn send(&self, dest: i32, message: Message) -> TransportResult<()>;

    /// Start delivering `message` to `dest` without blocking.
    fn isend(&self, dest: i32, message: Message) -> TransportResult<Pending>;

    /// Block until a message matching `selector` arrives, then consume it.
    fn recv(&self, selector: Selector) -> TransportResult<Message>;

    /// Start a receive for a message matching `selector`.
    fn irecv(&self, selector: Selector) -> TransportResult<Pending>;

    /// Block until a message matching `selector` is available, without
    /// consuming it.
    fn probe(&self, selector: Selector) -> TransportResult<Envelope>;

    /// Report the first available message matching `selector`, if any.
    fn iprobe(&self, selector: Selector) -> TransportResult<Option<Envelope>>;

    /// Short human-readable name of the transport.
    fn name(&self) -> &str {
        "transport"
    }
}
