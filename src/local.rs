//! In-process transport connecting threads of one program.
//!
//! [`LocalFabric`] owns one mailbox per rank. Each [`LocalTransport`] endpoint
//! delivers into its peers' mailboxes and waits on its own. Sends are
//! buffered: a send completes as soon as the message is in the destination
//! mailbox.
//!
//! Posted receives are matched in the order they were posted. An arriving
//! message goes to the oldest posted receive it matches; only unclaimed
//! messages are visible to blocking receives and probes.
//!
//! # Example
//!
//! ```
//! use ferrogroup::{LocalFabric, ReduceOp};
//!
//! let sums = LocalFabric::run(3, |group| {
//!     group.all_reduce_scalar(group.rank() + 1, ReduceOp::Sum)
//! })
//! .unwrap();
//! for sum in sums {
//!     assert_eq!(sum.unwrap(), 6);
//! }
//! ```

use crate::env::LocalConfig;
use crate::error::{Error, Result, TransportError};
use crate::group::ProcessGroup;
use crate::transport::{
    Completion, Envelope, Message, Outcome, Pending, Ready, Selector, Transport, TransportResult,
};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Default)]
struct Mailbox {
    inbox: Mutex<Inbox>,
    arrived: Condvar,
}

#[derive(Default)]
struct Inbox {
    /// Arrived messages no posted receive has claimed, in arrival order
    messages: VecDeque<Message>,
    /// Outstanding posted receives, in posting order
    posted: VecDeque<Posted>,
    next_ticket: u64,
}

struct Posted {
    ticket: u64,
    selector: Selector,
    claimed: Option<Message>,
}

impl Inbox {
    /// Hand `message` to the oldest open posted receive it matches, or queue it.
    fn deliver(&mut self, message: Message) {
        let envelope = message.envelope();
        match self
            .posted
            .iter_mut()
            .find(|posted| posted.claimed.is_none() && posted.selector.matches(&envelope))
        {
            Some(posted) => posted.claimed = Some(message),
            None => self.messages.push_back(message),
        }
    }

    fn take_match(&mut self, selector: &Selector) -> Option<Message> {
        let index = self
            .messages
            .iter()
            .position(|message| selector.matches(&message.envelope()))?;
        self.messages.remove(index)
    }

    fn peek_match(&self, selector: &Selector) -> Option<Envelope> {
        self.messages
            .iter()
            .map(Message::envelope)
            .find(|envelope| selector.matches(envelope))
    }

    fn post(&mut self, selector: Selector) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.posted.push_back(Posted {
            ticket,
            selector,
            claimed: None,
        });
        ticket
    }

    /// Remove the posted receive `ticket` once a message has been handed to it.
    fn claim(&mut self, ticket: u64) -> Option<Message> {
        let index = self
            .posted
            .iter()
            .position(|posted| posted.ticket == ticket && posted.claimed.is_some())?;
        self.posted.remove(index).and_then(|posted| posted.claimed)
    }

    /// Withdraw the posted receive `ticket`, returning a claimed message to
    /// the front of the line.
    fn cancel(&mut self, ticket: u64) {
        let Some(index) = self.posted.iter().position(|posted| posted.ticket == ticket) else {
            return;
        };
        let Some(message) = self.posted.remove(index).and_then(|posted| posted.claimed) else {
            return;
        };
        let envelope = message.envelope();
        match self
            .posted
            .iter_mut()
            .find(|posted| posted.claimed.is_none() && posted.selector.matches(&envelope))
        {
            Some(posted) => posted.claimed = Some(message),
            None => self.messages.push_front(message),
        }
    }
}

struct Shared {
    mailboxes: Vec<Mailbox>,
    aborted: AtomicBool,
    abort_reason: Mutex<String>,
    config: LocalConfig,
}

impl Shared {
    fn check_aborted(&self) -> TransportResult<()> {
        if self.aborted.load(Ordering::SeqCst) {
            Err(TransportError::Aborted(self.abort_reason.lock().clone()))
        } else {
            Ok(())
        }
    }

    fn abort(&self, reason: &str) {
        {
            let mut stored = self.abort_reason.lock();
            if !self.aborted.swap(true, Ordering::SeqCst) {
                *stored = reason.to_string();
            }
        }
        for mailbox in &self.mailboxes {
            let _inbox = mailbox.inbox.lock();
            mailbox.arrived.notify_all();
        }
    }
}

/// A set of connected in-process endpoints.
pub struct LocalFabric {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for LocalFabric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalFabric")
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}

impl LocalFabric {
    /// Create a fabric with `size` ranks and the default configuration.
    pub fn new(size: i32) -> Result<Self> {
        Self::with_config(size, LocalConfig::default())
    }

    /// Create a fabric with `size` ranks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidProcessGroup`] if `size < 1`.
    pub fn with_config(size: i32, config: LocalConfig) -> Result<Self> {
        if size < 1 {
            return Err(Error::InvalidProcessGroup(format!(
                "a fabric needs at least one rank, got {size}"
            )));
        }
        log::debug!("creating local fabric with {size} ranks ({config:?})");
        let mailboxes = (0..size).map(|_| Mailbox::default()).collect();
        Ok(LocalFabric {
            shared: Arc::new(Shared {
                mailboxes,
                aborted: AtomicBool::new(false),
                abort_reason: Mutex::new(String::new()),
                config,
            }),
        })
    }

    /// Number of ranks.
    pub fn size(&self) -> i32 {
        self.shared.mailboxes.len() as i32
    }

    /// The endpoint for `rank`.
    pub fn endpoint(&self, rank: i32) -> Result<LocalTransport> {
        if rank < 0 || rank >= self.size() {
            return Err(Error::InvalidProcessGroup(format!(
                "rank {rank} is outside a fabric of size {}",
                self.size()
            )));
        }
        Ok(LocalTransport {
            rank,
            shared: Arc::clone(&self.shared),
        })
    }

    /// All endpoints in rank order.
    pub fn endpoints(&self) -> Vec<LocalTransport> {
        (0..self.size())
            .map(|rank| LocalTransport {
                rank,
                shared: Arc::clone(&self.shared),
            })
            .collect()
    }

    /// Tear the fabric down, failing every pending and future wait.
    pub fn abort(&self, reason: &str) {
        self.shared.abort(reason);
    }

    /// Whether the fabric has been aborted.
    pub fn is_aborted(&self) -> bool {
        self.shared.aborted.load(Ordering::SeqCst)
    }

    /// Run `f` once per rank, each on its own thread with its own
    /// [`ProcessGroup`], and collect the results in rank order.
    ///
    /// If any rank panics the fabric is aborted so that its peers stop
    /// waiting, and the panic is propagated to the caller.
    pub fn run<F, R>(size: i32, f: F) -> Result<Vec<R>>
    where
        F: Fn(ProcessGroup) -> R + Sync,
        R: Send,
    {
        Self::run_with_config(size, LocalConfig::default(), f)
    }

    /// [`run`](Self::run) with an explicit configuration.
    pub fn run_with_config<F, R>(size: i32, config: LocalConfig, f: F) -> Result<Vec<R>>
    where
        F: Fn(ProcessGroup) -> R + Sync,
        R: Send,
    {
        let fabric = Self::with_config(size, config)?;
        let f = &f;
        let results = std::thread::scope(|scope| {
            let handles: Vec<_> = fabric
                .endpoints()
                .into_iter()
                .map(|endpoint| {
                    let guard = AbortOnPanic(Arc::clone(&fabric.shared));
                    scope.spawn(move || {
                        let result = f(ProcessGroup::world(Arc::new(endpoint)));
                        drop(guard);
                        result
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(payload) => std::panic::resume_unwind(payload),
                })
                .collect()
        });
        Ok(results)
    }
}

struct AbortOnPanic(Arc<Shared>);

impl Drop for AbortOnPanic {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.abort("a peer rank panicked");
        }
    }
}

/// One rank's endpoint of a [`LocalFabric`].
#[derive(Clone)]
pub struct LocalTransport {
    rank: i32,
    shared: Arc<Shared>,
}

impl LocalTransport {
    fn mailbox(&self) -> &Mailbox {
        &self.shared.mailboxes[self.rank as usize]
    }

    /// Wait until `pick` extracts something from the mailbox.
    fn wait_for<T>(&self, mut pick: impl FnMut(&mut Inbox) -> Option<T>) -> TransportResult<T> {
        let mailbox = self.mailbox();
        let timeout = self.shared.config.recv_timeout;
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut inbox = mailbox.inbox.lock();
        loop {
            if let Some(found) = pick(&mut *inbox) {
                return Ok(found);
            }
            self.shared.check_aborted()?;
            match (deadline, timeout) {
                (Some(deadline), Some(timeout)) => {
                    if Instant::now() >= deadline {
                        return Err(TransportError::Timeout(timeout));
                    }
                    mailbox.arrived.wait_until(&mut inbox, deadline);
                }
                _ => mailbox.arrived.wait(&mut inbox),
            }
        }
    }
}

impl Transport for LocalTransport {
    fn rank(&self) -> i32 {
        self.rank
    }

    fn size(&self) -> i32 {
        self.shared.mailboxes.len() as i32
    }

    fn send(&self, dest: i32, mut message: Message) -> TransportResult<()> {
        self.shared.check_aborted()?;
        let mailbox = usize::try_from(dest)
            .ok()
            .and_then(|d| self.shared.mailboxes.get(d))
            .ok_or(TransportError::InvalidPeer(dest))?;
        message.source = self.rank;
        #[cfg(feature = "debug")]
        log::trace!(
            "rank {} -> {dest}: context {} tag {} ({} x {})",
            self.rank,
            message.context,
            message.tag,
            message.count,
            message.datatype
        );
        mailbox.inbox.lock().deliver(message);
        mailbox.arrived.notify_all();
        Ok(())
    }

    fn isend(&self, dest: i32, message: Message) -> TransportResult<Pending> {
        self.send(dest, message)?;
        Ok(Box::new(Ready::new(Outcome::Sent)))
    }

    fn recv(&self, selector: Selector) -> TransportResult<Message> {
        let message = self.wait_for(|inbox| inbox.take_match(&selector))?;
        #[cfg(feature = "debug")]
        log::trace!(
            "rank {} <- {}: context {} tag {}",
            self.rank,
            message.source,
            message.context,
            message.tag
        );
        Ok(message)
    }

    fn irecv(&self, selector: Selector) -> TransportResult<Pending> {
        self.shared.check_aborted()?;
        let mut inbox = self.mailbox().inbox.lock();
        if let Some(message) = inbox.take_match(&selector) {
            return Ok(Box::new(Ready::new(Outcome::Received(message))));
        }
        let ticket = inbox.post(selector);
        Ok(Box::new(PendingReceive {
            transport: self.clone(),
            ticket,
            done: false,
        }))
    }

    fn probe(&self, selector: Selector) -> TransportResult<Envelope> {
        self.wait_for(|inbox| inbox.peek_match(&selector))
    }

    fn iprobe(&self, selector: Selector) -> TransportResult<Option<Envelope>> {
        self.shared.check_aborted()?;
        Ok(self.mailbox().inbox.lock().peek_match(&selector))
    }

    fn name(&self) -> &str {
        "local"
    }
}

/// A receive posted in its owner's mailbox; arriving messages are handed to
/// it in posting order.
struct PendingReceive {
    transport: LocalTransport,
    ticket: u64,
    done: bool,
}

impl Completion for PendingReceive {
    fn poll(&mut self) -> TransportResult<Option<Outcome>> {
        if let Some(message) = self.transport.mailbox().inbox.lock().claim(self.ticket) {
            self.done = true;
            return Ok(Some(Outcome::Received(message)));
        }
        self.transport.shared.check_aborted()?;
        Ok(None)
    }

    fn wait(mut self: Box<Self>) -> TransportResult<Outcome> {
        let ticket = self.ticket;
        let message = self.transport.wait_for(|inbox| inbox.claim(ticket))?;
        self.done = true;
        Ok(Outcome::Received(message))
    }
}

impl Drop for PendingReceive {
    fn drop(&mut self) {
        if !self.done {
            self.transport.mailbox().inbox.lock().cancel(self.ticket);
            self.transport.mailbox().arrived.notify_all();
        }
    }
}
