//! Process groups and point-to-point messaging.

use crate::buffer::{Buffer, BufferMut};
use crate::datatype::Element;
use crate::error::{Error, Result, TransportError};
use crate::request::Request;
use crate::status::Status;
use crate::timer::Timer;
use crate::transport::{
    ContextId, Envelope, Message, Selector, Transport, TransportResult, ANY_SOURCE, ANY_TAG,
    WORLD_CONTEXT,
};
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    World,
    Derived,
    Serial,
}

/// A handle to an ordered set of processes.
///
/// Every member holds its own handle; ranks run from `0` to `size() - 1`.
/// Operations are methods on the handle, so the group is always passed
/// explicitly. A group of size 1 never touches a transport: collectives
/// copy input to output and point-to-point operations are rejected.
///
/// # Example
///
/// ```
/// use ferrogroup::LocalFabric;
///
/// LocalFabric::run(2, |world| {
///     println!("I am rank {} of {}", world.rank(), world.size());
/// })
/// .unwrap();
/// ```
pub struct ProcessGroup {
    transport: Option<Arc<dyn Transport>>,
    context: ContextId,
    /// Transport rank of each group rank
    members: Arc<[i32]>,
    rank: i32,
    kind: Kind,
    splits: Cell<u64>,
    /// Marker to prevent Send/Sync (a handle belongs to one process)
    _marker: PhantomData<*mut ()>,
}

impl ProcessGroup {
    /// A group containing only the calling process.
    pub fn serial() -> Self {
        ProcessGroup {
            transport: None,
            context: WORLD_CONTEXT,
            members: Arc::from(vec![0]),
            rank: 0,
            kind: Kind::Serial,
            splits: Cell::new(0),
            _marker: PhantomData,
        }
    }

    /// The group of every rank reachable through `transport`.
    pub fn world(transport: Arc<dyn Transport>) -> Self {
        let members: Vec<i32> = (0..transport.size()).collect();
        ProcessGroup {
            rank: transport.rank(),
            transport: Some(transport),
            context: WORLD_CONTEXT,
            members: Arc::from(members),
            kind: Kind::World,
            splits: Cell::new(0),
            _marker: PhantomData,
        }
    }

    /// Get the rank of the calling process in this group.
    pub fn rank(&self) -> i32 {
        self.rank
    }

    /// Get the number of processes in this group.
    pub fn size(&self) -> i32 {
        self.members.len() as i32
    }

    /// Sentinel accepted as `source` by receive and probe operations.
    pub fn any_source(&self) -> i32 {
        ANY_SOURCE
    }

    /// Sentinel accepted as `tag` by receive and probe operations.
    pub fn any_tag(&self) -> i32 {
        ANY_TAG
    }

    /// Whether operations on this group run without communication.
    pub fn is_serial(&self) -> bool {
        self.size() == 1
    }

    /// Communication context owned by this group.
    pub fn context(&self) -> ContextId {
        self.context
    }

    /// Create a stopped timer.
    pub fn create_timer(&self) -> Timer {
        Timer::new()
    }

    // ========================================================================
    // Sub-groups
    // ========================================================================

    /// Partition this group by `color`, ordering each part by `(key, rank)`.
    ///
    /// Must be called by every member. Members passing a negative `color`
    /// take part in the exchange but get `None` back.
    pub fn split(&self, color: i32, key: i32) -> Result<Option<ProcessGroup>> {
        let sequence = self.next_split();
        if self.is_serial() {
            let members = self.members.to_vec();
            return Ok((color >= 0).then(|| self.derive(sequence, color, 0, members)));
        }

        let mut pairs: Vec<i32> = Vec::with_capacity(2 * self.members.len());
        self.all_gather(&[color, key][..], &mut pairs)?;
        if color < 0 {
            log::debug!("{self}: left out of split {sequence}");
            return Ok(None);
        }

        let mut chosen: Vec<(i32, i32)> = pairs
            .chunks_exact(2)
            .zip(0..)
            .filter(|(pair, _)| pair[0] == color)
            .map(|(pair, rank)| (pair[1], rank))
            .collect();
        chosen.sort_unstable();
        let rank = chosen
            .iter()
            .position(|&(_, r)| r == self.rank)
            .ok_or_else(|| {
                Error::InvalidProcessGroup(format!(
                    "rank {} is missing from its own split color {color}",
                    self.rank
                ))
            })? as i32;
        let members = chosen
            .iter()
            .map(|&(_, r)| self.members[r as usize])
            .collect();
        let group = self.derive(sequence, color, rank, members);
        log::debug!("{self}: split {sequence} with color {color} -> {group}");
        Ok(Some(group))
    }

    /// A new group with the same members and its own context.
    ///
    /// Must be called by every member.
    pub fn duplicate(&self) -> Result<ProcessGroup> {
        let sequence = self.next_split();
        Ok(self.derive(sequence, 0, self.rank, self.members.to_vec()))
    }

    fn next_split(&self) -> u64 {
        let sequence = self.splits.get();
        self.splits.set(sequence + 1);
        sequence
    }

    fn derive(&self, sequence: u64, color: i32, rank: i32, members: Vec<i32>) -> ProcessGroup {
        ProcessGroup {
            transport: self.transport.clone(),
            context: derive_context(self.context, sequence, color),
            members: Arc::from(members),
            rank,
            kind: if self.kind == Kind::Serial {
                Kind::Serial
            } else {
                Kind::Derived
            },
            splits: Cell::new(0),
            _marker: PhantomData,
        }
    }

    // ========================================================================
    // Point-to-Point Communication
    // ========================================================================

    /// Send `data` to `dest` with `tag`, blocking until it has been handed
    /// to the transport.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidProcessGroup`] on a group of size 1, for a `dest`
    /// outside the group or a negative `tag`; [`Error::CommunicationFailure`]
    /// if the transport fails.
    pub fn send<B: Buffer + ?Sized>(&self, data: &B, dest: i32, tag: i32) -> Result<()> {
        self.require_peers("Blocking send")?;
        self.check_dest(dest, tag)?;
        let operation =
            || format!("blocking send operation to destination process {dest} with tag {tag}");
        let transport = self.transport()?;
        Message::encode(self.context, tag, data.elements())
            .and_then(|message| transport.send(self.members[dest as usize], message))
            .map_err(|e| self.failure(operation(), e))
    }

    /// Receive a message from `source` with `tag` into `data`.
    ///
    /// `source` may be [`any_source`](Self::any_source) and `tag` may be
    /// [`any_tag`](Self::any_tag). A `Vec` is resized to the message length;
    /// fixed-size buffers must be large enough.
    pub fn receive<B: BufferMut + ?Sized>(
        &self,
        data: &mut B,
        source: i32,
        tag: i32,
    ) -> Result<Status> {
        self.require_peers("Blocking receive")?;
        self.check_source(source, tag)?;
        let operation = || {
            format!(
                "blocking receive operation from source process {} with tag {}",
                describe_source(source),
                describe_tag(tag)
            )
        };
        let transport = self.transport()?;
        transport
            .recv(self.selector(source, tag))
            .and_then(|message| deliver(&self.members, message, data))
            .map_err(|e| self.failure(operation(), e))
    }

    /// Start sending `data` to `dest` with `tag`.
    ///
    /// `data` stays borrowed until the returned request completes.
    pub fn isend<'a, B: Buffer + ?Sized>(
        &self,
        data: &'a B,
        dest: i32,
        tag: i32,
    ) -> Result<Request<'a>> {
        self.require_peers("Non-blocking send")?;
        self.check_dest(dest, tag)?;
        let operation =
            format!("non-blocking send operation to destination process {dest} with tag {tag}");
        let transport = self.transport()?;
        let elements = data.elements();
        let pending = Message::encode(self.context, tag, elements)
            .and_then(|message| transport.isend(self.members[dest as usize], message))
            .map_err(|e| self.failure(operation.clone(), e))?;
        let status = Status {
            source: self.rank,
            tag,
            count: elements.len() as i64,
        };
        Ok(Request::send(pending, status, self.to_string(), operation))
    }

    /// Start receiving a message from `source` with `tag` into `data`.
    ///
    /// `data` stays borrowed until the returned request completes.
    pub fn ireceive<'a, B: BufferMut + ?Sized + 'a>(
        &self,
        data: &'a mut B,
        source: i32,
        tag: i32,
    ) -> Result<Request<'a>> {
        self.require_peers("Non-blocking receive")?;
        self.check_source(source, tag)?;
        let operation = format!(
            "non-blocking receive operation from source process {} with tag {}",
            describe_source(source),
            describe_tag(tag)
        );
        let transport = self.transport()?;
        let pending = transport
            .irecv(self.selector(source, tag))
            .map_err(|e| self.failure(operation.clone(), e))?;
        let members = Arc::clone(&self.members);
        let sink = Box::new(move |message: Message| deliver(&members, message, data));
        Ok(Request::receive(pending, sink, self.to_string(), operation))
    }

    /// Block until a message from `source` with `tag` is available and
    /// report it without receiving it.
    ///
    /// `count` is the number of `T` elements the message holds.
    pub fn probe<T: Element>(&self, source: i32, tag: i32) -> Result<Status> {
        self.require_peers("Blocking probe")?;
        self.check_source(source, tag)?;
        let transport = self.transport()?;
        transport
            .probe(self.selector(source, tag))
            .map(|envelope| self.status_of::<T>(&envelope))
            .map_err(|e| {
                self.failure(
                    format!(
                        "blocking probe operation to source process {} with tag {}",
                        describe_source(source),
                        describe_tag(tag)
                    ),
                    e,
                )
            })
    }

    /// Non-blocking [`probe`](Self::probe): `None` if no matching message
    /// has arrived yet.
    pub fn iprobe<T: Element>(&self, source: i32, tag: i32) -> Result<Option<Status>> {
        self.require_peers("Non-blocking probe")?;
        self.check_source(source, tag)?;
        let transport = self.transport()?;
        transport
            .iprobe(self.selector(source, tag))
            .map(|found| found.map(|envelope| self.status_of::<T>(&envelope)))
            .map_err(|e| {
                self.failure(
                    format!(
                        "non-blocking probe operation to source process {} with tag {}",
                        describe_source(source),
                        describe_tag(tag)
                    ),
                    e,
                )
            })
    }

    fn status_of<T: Element>(&self, envelope: &Envelope) -> Status {
        let count = match (T::TAG.width(), envelope.datatype.is_native()) {
            (Some(width), true) if envelope.datatype != T::TAG => envelope.byte_len / width,
            _ => envelope.count,
        };
        Status {
            source: group_rank(&self.members, envelope.source),
            tag: envelope.tag,
            count: count as i64,
        }
    }

    // ========================================================================
    // Internals shared with the collectives
    // ========================================================================

    pub(crate) fn transport(&self) -> Result<&dyn Transport> {
        self.transport.as_deref().ok_or_else(|| {
            Error::InvalidProcessGroup(format!("{self} has no transport to communicate through"))
        })
    }

    pub(crate) fn failure(&self, operation: String, source: TransportError) -> Error {
        Error::CommunicationFailure {
            group: self.to_string(),
            operation,
            source,
        }
    }

    /// Post `message` to group rank `dest`.
    pub(crate) fn post(&self, dest: i32, message: Message) -> TransportResult<()> {
        match &self.transport {
            Some(transport) => transport.send(self.members[dest as usize], message),
            None => Err(TransportError::InvalidPeer(dest)),
        }
    }

    /// Receive the next message from group rank `source` on a reserved tag.
    ///
    /// A failure marker from `source` becomes [`TransportError::RootFailure`].
    pub(crate) fn fetch(&self, source: i32, tag: i32) -> TransportResult<Message> {
        self.fetch_marked(source, tag, TransportError::RootFailure)
    }

    /// [`fetch`](Self::fetch) for operations without a root; a failure
    /// marker becomes [`TransportError::PeerFailure`].
    pub(crate) fn fetch_from_peer(&self, source: i32, tag: i32) -> TransportResult<Message> {
        self.fetch_marked(source, tag, TransportError::PeerFailure)
    }

    fn fetch_marked(
        &self,
        source: i32,
        tag: i32,
        failed: fn(i32) -> TransportError,
    ) -> TransportResult<Message> {
        let transport = self
            .transport
            .as_deref()
            .ok_or(TransportError::InvalidPeer(source))?;
        let message = transport.recv(Selector {
            context: self.context,
            source: self.members[source as usize],
            tag,
        })?;
        if message.failed {
            return Err(failed(source));
        }
        Ok(message)
    }

    fn selector(&self, source: i32, tag: i32) -> Selector {
        Selector {
            context: self.context,
            source: if source == ANY_SOURCE {
                ANY_SOURCE
            } else {
                self.members[source as usize]
            },
            tag,
        }
    }

    fn require_peers(&self, operation: &str) -> Result<()> {
        if self.is_serial() {
            return Err(Error::InvalidProcessGroup(format!(
                "{operation} operations can only be done with groups of size 2 or greater"
            )));
        }
        Ok(())
    }

    fn check_dest(&self, dest: i32, tag: i32) -> Result<()> {
        if dest < 0 || dest >= self.size() {
            return Err(Error::InvalidProcessGroup(format!(
                "destination process {dest} is not a member of {self}"
            )));
        }
        if tag < 0 {
            return Err(Error::InvalidProcessGroup(format!(
                "send tag {tag} is reserved, user tags must be non-negative"
            )));
        }
        Ok(())
    }

    fn check_source(&self, source: i32, tag: i32) -> Result<()> {
        if source != ANY_SOURCE && (source < 0 || source >= self.size()) {
            return Err(Error::InvalidProcessGroup(format!(
                "source process {source} is not a member of {self}"
            )));
        }
        if tag != ANY_TAG && tag < 0 {
            return Err(Error::InvalidProcessGroup(format!(
                "receive tag {tag} is reserved, user tags must be non-negative"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ProcessGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.kind {
            Kind::World => "World Group",
            Kind::Derived => "Group",
            Kind::Serial => "Serial Group",
        };
        write!(f, "{name} (rank={}, size={})", self.rank, self.size())
    }
}

impl fmt::Debug for ProcessGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessGroup")
            .field("kind", &self.kind)
            .field("rank", &self.rank)
            .field("size", &self.size())
            .field("context", &self.context)
            .finish()
    }
}

/// Decode `message` into `data` and describe it in group ranks.
fn deliver<B: BufferMut + ?Sized>(
    members: &[i32],
    message: Message,
    data: &mut B,
) -> TransportResult<Status> {
    let items = message.decode::<B::Item>()?;
    let count = items.len() as i64;
    data.store(items)?;
    Ok(Status {
        source: group_rank(members, message.source),
        tag: message.tag,
        count,
    })
}

fn group_rank(members: &[i32], transport_rank: i32) -> i32 {
    members
        .iter()
        .position(|&m| m == transport_rank)
        .map_or(transport_rank, |r| r as i32)
}

fn describe_source(source: i32) -> String {
    if source == ANY_SOURCE {
        "\"any source\"".to_string()
    } else {
        source.to_string()
    }
}

fn describe_tag(tag: i32) -> String {
    if tag == ANY_TAG {
        "\"any tag\"".to_string()
    } else {
        tag.to_string()
    }
}

/// FNV-1a over the parent context, split sequence and color.
fn derive_context(parent: ContextId, sequence: u64, color: i32) -> ContextId {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let hash = parent
        .to_le_bytes()
        .into_iter()
        .chain(sequence.to_le_bytes())
        .chain(color.to_le_bytes())
        .fold(OFFSET, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(PRIME));
    if hash == WORLD_CONTEXT {
        1
    } else {
        hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalFabric;

    #[test]
    fn serial_group_basics() {
        let group = ProcessGroup::serial();
        assert_eq!((group.rank(), group.size()), (0, 1));
        assert!(group.is_serial());
        assert_eq!(group.to_string(), "Serial Group (rank=0, size=1)");
        assert_eq!(group.any_source(), ANY_SOURCE);
        assert_eq!(group.any_tag(), ANY_TAG);
    }

    #[test]
    fn serial_group_rejects_point_to_point() {
        let group = ProcessGroup::serial();
        assert!(group.send(&1i32, 0, 0).unwrap_err().is_invalid_group());
        let mut out = 0i32;
        assert!(group.receive(&mut out, 0, 0).unwrap_err().is_invalid_group());
        assert!(group.probe::<i32>(ANY_SOURCE, ANY_TAG).unwrap_err().is_invalid_group());
        assert!(group.iprobe::<i32>(ANY_SOURCE, ANY_TAG).unwrap_err().is_invalid_group());
    }

    #[test]
    fn serial_split_and_duplicate() {
        let group = ProcessGroup::serial();
        assert!(group.split(-1, 0).unwrap().is_none());
        let part = group.split(3, 0).unwrap().unwrap();
        assert_eq!(part.to_string(), "Serial Group (rank=0, size=1)");
        assert_ne!(part.context(), group.context());
        let dup = group.duplicate().unwrap();
        assert_ne!(dup.context(), part.context());
    }

    #[test]
    fn world_display() {
        let fabric = LocalFabric::new(3).unwrap();
        let group = ProcessGroup::world(Arc::new(fabric.endpoint(2).unwrap()));
        assert_eq!(group.to_string(), "World Group (rank=2, size=3)");
    }

    #[test]
    fn peer_validation() {
        let fabric = LocalFabric::new(2).unwrap();
        let group = ProcessGroup::world(Arc::new(fabric.endpoint(0).unwrap()));
        assert!(group.send(&1u8, 2, 0).unwrap_err().is_invalid_group());
        assert!(group.send(&1u8, ANY_SOURCE, 0).unwrap_err().is_invalid_group());
        assert!(group.send(&1u8, 1, -3).unwrap_err().is_invalid_group());
        let mut out = 0u8;
        assert!(group.receive(&mut out, 5, 0).unwrap_err().is_invalid_group());
        assert!(group.receive(&mut out, 1, -12).unwrap_err().is_invalid_group());
    }

    #[test]
    fn context_derivation_is_deterministic() {
        assert_eq!(derive_context(0, 1, 2), derive_context(0, 1, 2));
        assert_ne!(derive_context(0, 1, 2), derive_context(0, 2, 2));
        assert_ne!(derive_context(0, 1, 2), derive_context(0, 1, 3));
        assert_ne!(derive_context(0, 1, 2), WORLD_CONTEXT);
    }

    #[test]
    fn operation_text_names_sentinels() {
        assert_eq!(describe_source(ANY_SOURCE), "\"any source\"");
        assert_eq!(describe_tag(4), "4");
    }

    #[test]
    fn group_rank_translation() {
        assert_eq!(group_rank(&[4, 1, 7], 7), 2);
        assert_eq!(group_rank(&[4, 1, 7], 3), 3);
    }
}
