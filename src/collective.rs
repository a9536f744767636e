//! Collective operations.
//!
//! Every collective is built once on top of the group's point-to-point layer
//! with linear algorithms: rooted operations talk to the root directly and
//! `scan` is a rank-ordered chain. Collective traffic travels on reserved
//! negative tags, so it never matches a user receive.
//!
//! On a group of size 1 nothing is sent. The input is copied to the output,
//! and a requested root other than the calling process is ignored with a
//! warning.
//!
//! When the root of an operation fails before distributing data, it sends a
//! failure marker in place of the data so that its peers return
//! [`TransportError::RootFailure`] instead of waiting forever. In operations
//! without a root a failing member sends the marker to everyone, still
//! receives what its peers sent it, and the peers report
//! [`TransportError::PeerFailure`].

use crate::buffer::{Buffer, BufferMut};
use crate::datatype::Element;
use crate::error::{Error, Result, TransportError};
use crate::group::ProcessGroup;
use crate::reduce::Reduction;
use crate::transport::{Message, TransportResult};

/// Reserved tags; user tags are non-negative.
mod tags {
    pub const BARRIER: i32 = -10;
    pub const BROADCAST: i32 = -11;
    pub const GATHER: i32 = -12;
    pub const ALL_GATHER: i32 = -13;
    pub const SCATTER: i32 = -14;
    pub const ALL_TO_ALL: i32 = -15;
    pub const REDUCE: i32 = -16;
    pub const SCAN: i32 = -17;
    pub const SIZES: i32 = -18;
    pub const READY: i32 = -19;
}

impl ProcessGroup {
    // ========================================================================
    // Synchronization
    // ========================================================================

    /// Block until every member of the group has entered the barrier.
    pub fn barrier(&self) -> Result<()> {
        if self.is_serial() {
            return Ok(());
        }
        self.barrier_impl()
            .map_err(|e| self.failure("barrier operation".into(), e))
    }

    fn barrier_impl(&self) -> TransportResult<()> {
        let empty: &[u8] = &[];
        if self.collect_chunks(empty, 0, tags::BARRIER)?.is_some() {
            self.release(
                tags::BARRIER,
                Message::encode(self.context(), tags::BARRIER, empty),
            )
        } else {
            self.fetch(0, tags::BARRIER).map(|_| ())
        }
    }

    // ========================================================================
    // Broadcast
    // ========================================================================

    /// Broadcast `data` from `root` to every member.
    ///
    /// On non-root processes a `Vec` is resized to the root's length; a
    /// fixed-size buffer must be large enough to hold it.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use ferrogroup::LocalFabric;
    /// LocalFabric::run(4, |world| {
    ///     let mut data = if world.rank() == 0 { vec![1.0, 2.0, 3.0] } else { Vec::new() };
    ///     world.broadcast(&mut data, 0).unwrap();
    ///     assert_eq!(data, vec![1.0, 2.0, 3.0]);
    /// })
    /// .unwrap();
    /// ```
    pub fn broadcast<B: BufferMut + ?Sized>(&self, data: &mut B, root: i32) -> Result<()> {
        if self.is_serial() {
            self.ignore_root("broadcast", root);
            return Ok(());
        }
        self.check_root(root)?;
        self.broadcast_impl(data, root)
            .map_err(|e| self.failure(format!("broadcast operation from root process {root}"), e))
    }

    fn broadcast_impl<B>(&self, data: &mut B, root: i32) -> TransportResult<()>
    where
        B: BufferMut + ?Sized,
    {
        if self.rank() == root {
            self.release(
                tags::BROADCAST,
                Message::encode(self.context(), tags::BROADCAST, data.elements()),
            )
        } else {
            data.store(self.recv_items(root, tags::BROADCAST)?)
        }
    }

    // ========================================================================
    // Gather
    // ========================================================================

    /// Gather equally sized contributions at `root`, concatenated in rank
    /// order. `output` is only written on the root.
    ///
    /// The root checks that `output` can hold `size()` contributions of its
    /// own length before any member sends; if it cannot, every member fails.
    pub fn gather<S, R>(&self, input: &S, output: &mut R, root: i32) -> Result<()>
    where
        S: Buffer + ?Sized,
        R: BufferMut<Item = S::Item> + ?Sized,
    {
        let operation = || format!("gather operation to root process {root}");
        if self.is_serial() {
            self.ignore_root("gather", root);
            return self.serial_copy(input.elements(), output, operation());
        }
        self.check_root(root)?;
        self.gather_impl(input.elements(), output, root)
            .map_err(|e| self.failure(operation(), e))
    }

    fn gather_impl<T, R>(&self, items: &[T], output: &mut R, root: i32) -> TransportResult<()>
    where
        T: Element,
        R: BufferMut<Item = T> + ?Sized,
    {
        if self.rank() == root {
            let required = items.len() * self.size() as usize;
            let ready = if output.can_store(required) {
                Message::encode::<u8>(self.context(), tags::READY, &[])
            } else {
                Err(TransportError::Capacity {
                    required,
                    available: output.fixed_len().unwrap_or(required),
                })
            };
            self.release(tags::READY, ready)?;
        } else {
            self.fetch(root, tags::READY)?;
        }
        if let Some(chunks) = self.collect_chunks(items, root, tags::GATHER)? {
            output.store(uniform_concat(chunks, items.len())?)?;
        }
        Ok(())
    }

    /// Gather equally sized contributions on every member, concatenated in
    /// rank order.
    ///
    /// Every member receives before it stores, so a fixed-size `output` too
    /// small for the result fails on its own member after the exchange,
    /// without touching `output` and without affecting the other members.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use ferrogroup::LocalFabric;
    /// LocalFabric::run(3, |world| {
    ///     let mut all = Vec::new();
    ///     world.all_gather(&(10 * (world.rank() + 1)), &mut all).unwrap();
    ///     assert_eq!(all, vec![10, 20, 30]);
    /// })
    /// .unwrap();
    /// ```
    pub fn all_gather<S, R>(&self, input: &S, output: &mut R) -> Result<()>
    where
        S: Buffer + ?Sized,
        R: BufferMut<Item = S::Item> + ?Sized,
    {
        if self.is_serial() {
            return self.serial_copy(input.elements(), output, "all-gather operation".into());
        }
        let items = input.elements();
        self.exchange_all(items, tags::ALL_GATHER)
            .and_then(|chunks| uniform_concat(chunks, items.len()))
            .and_then(|assembled| output.store(assembled))
            .map_err(|e| self.failure("all-gather operation".into(), e))
    }

    /// Gather contributions of varying length at `root`.
    ///
    /// The lengths are exchanged first, so every member learns them and the
    /// returned vector holds the contribution size of each rank. The root's
    /// `output` receives the contributions back to back in rank order; a
    /// fixed-size output that cannot hold them fails on every member before
    /// any data is moved.
    pub fn gatherv<S, R>(&self, input: &S, output: &mut R, root: i32) -> Result<Vec<i32>>
    where
        S: Buffer + ?Sized,
        R: BufferMut<Item = S::Item> + ?Sized,
    {
        let operation = || format!("gatherv operation to root process {root}");
        let items = input.elements();
        if self.is_serial() {
            self.ignore_root("gatherv", root);
            let size = count_i32(items.len()).map_err(|e| self.failure(operation(), e))?;
            self.serial_copy(items, output, operation())?;
            return Ok(vec![size]);
        }
        self.check_root(root)?;
        self.gatherv_impl(items, output, root)
            .map_err(|e| self.failure(operation(), e))
    }

    fn gatherv_impl<T, R>(
        &self,
        items: &[T],
        output: &mut R,
        root: i32,
    ) -> TransportResult<Vec<i32>>
    where
        T: Element,
        R: BufferMut<Item = T> + ?Sized,
    {
        let capacity = match output.fixed_len() {
            Some(len) if self.rank() == root => len as i64,
            _ => -1,
        };
        let shapes = self.exchange_all(&[items.len() as i64, capacity], tags::SIZES)?;

        let mut sizes = Vec::with_capacity(shapes.len());
        let mut root_capacity = -1;
        for (rank, shape) in shapes.iter().enumerate() {
            let &[len, capacity] = shape.as_slice() else {
                return Err(TransportError::LengthMismatch {
                    expected: 2,
                    found: shape.len(),
                });
            };
            sizes.push(count_i32(len as usize)?);
            if rank as i32 == root {
                root_capacity = capacity;
            }
        }
        let total: usize = sizes.iter().map(|&s| s as usize).sum();
        if root_capacity >= 0 && total > root_capacity as usize {
            return Err(TransportError::Capacity {
                required: total,
                available: root_capacity as usize,
            });
        }

        if let Some(chunks) = self.collect_chunks(items, root, tags::GATHER)? {
            for (chunk, &size) in chunks.iter().zip(&sizes) {
                if chunk.len() != size as usize {
                    return Err(TransportError::LengthMismatch {
                        expected: size as usize,
                        found: chunk.len(),
                    });
                }
            }
            output.store(chunks.into_iter().flatten().collect())?;
        }
        Ok(sizes)
    }

    /// Gather contributions at `root` into caller-chosen positions.
    ///
    /// `sizes[r]` elements of rank `r` are written at `offsets[r]` of the
    /// root's output; an empty `offsets` places contributions back to back.
    /// `sizes` and `offsets` are only significant at the root. The output is
    /// never resized. A contribution longer than its size is truncated with
    /// a warning, and a shorter one leaves the rest of its slot untouched.
    pub fn gatherv_with_layout<S, R>(
        &self,
        input: &S,
        output: &mut R,
        sizes: &[i32],
        offsets: &[i32],
        root: i32,
    ) -> Result<()>
    where
        S: Buffer + ?Sized,
        R: BufferMut<Item = S::Item> + ?Sized,
    {
        let operation = || format!("gatherv operation to root process {root}");
        let items = input.elements();
        if self.is_serial() {
            self.ignore_root("gatherv", root);
            return layout(sizes, offsets, 1, output.elements().len())
                .map(|spans| self.place(&spans, vec![items.to_vec()], output.elements_mut()))
                .map_err(|e| self.failure(operation(), e));
        }
        self.check_root(root)?;
        self.collect_chunks(items, root, tags::GATHER)
            .and_then(|chunks| match chunks {
                Some(chunks) => {
                    let spans = layout(sizes, offsets, chunks.len(), output.elements().len())?;
                    self.place(&spans, chunks, output.elements_mut());
                    Ok(())
                }
                None => Ok(()),
            })
            .map_err(|e| self.failure(operation(), e))
    }

    /// Copy each chunk into its span, truncating chunks that do not fit.
    fn place<T: Element>(&self, spans: &[(usize, usize)], chunks: Vec<Vec<T>>, slots: &mut [T]) {
        for (rank, (&(offset, size), chunk)) in spans.iter().zip(chunks).enumerate() {
            if chunk.len() > size {
                log::warn!(
                    "{self}: process {rank} contributed {} elements but only {size} fit in its slot, the rest is dropped",
                    chunk.len()
                );
            }
            let n = chunk.len().min(size);
            slots[offset..offset + n].clone_from_slice(&chunk[..n]);
        }
    }

    // ========================================================================
    // Scatter
    // ========================================================================

    /// Split the root's `input` into `size()` equal chunks and deliver chunk
    /// `r` to rank `r`.
    ///
    /// The root's input length must be divisible by the group size.
    pub fn scatter<S, R>(&self, input: &S, output: &mut R, root: i32) -> Result<()>
    where
        S: Buffer + ?Sized,
        R: BufferMut<Item = S::Item> + ?Sized,
    {
        let operation = || format!("scatter operation from root process {root}");
        if self.is_serial() {
            self.ignore_root("scatter", root);
            return self.serial_copy(input.elements(), output, operation());
        }
        self.check_root(root)?;
        self.scatter_impl(input.elements(), output, root)
            .map_err(|e| self.failure(operation(), e))
    }

    fn scatter_impl<T, R>(&self, items: &[T], output: &mut R, root: i32) -> TransportResult<()>
    where
        T: Element,
        R: BufferMut<Item = T> + ?Sized,
    {
        if self.rank() != root {
            return output.store(self.recv_items(root, tags::SCATTER)?);
        }
        let parts = self.size() as usize;
        let spans = if items.len() % parts != 0 {
            Err(TransportError::InvalidLayout(format!(
                "{} elements cannot be split evenly among {parts} processes",
                items.len()
            )))
        } else {
            let len = items.len() / parts;
            Ok((0..parts).map(|r| (r * len, len)).collect::<Vec<_>>())
        };
        self.distribute(items, spans, output, tags::SCATTER)
    }

    /// Scatter chunks of varying length from `root`.
    ///
    /// Rank `r` receives `sizes[r]` elements, taken back to back from the
    /// root's input. `sizes` is only significant at the root, which sends it
    /// ahead of the data; an invalid `sizes` fails the operation on every
    /// member.
    pub fn scatterv<S, R>(&self, input: &S, sizes: &[i32], output: &mut R, root: i32) -> Result<()>
    where
        S: Buffer + ?Sized,
        R: BufferMut<Item = S::Item> + ?Sized,
    {
        let operation = || format!("scatterv operation from root process {root}");
        let items = input.elements();
        if self.is_serial() {
            self.ignore_root("scatterv", root);
            return layout(sizes, &[], 1, items.len())
                .and_then(|spans| {
                    let (offset, size) = spans[0];
                    output.store(items[offset..offset + size].to_vec())
                })
                .map_err(|e| self.failure(operation(), e));
        }
        self.check_root(root)?;
        self.scatterv_impl(items, sizes, output, root)
            .map_err(|e| self.failure(operation(), e))
    }

    fn scatterv_impl<T, R>(
        &self,
        items: &[T],
        sizes: &[i32],
        output: &mut R,
        root: i32,
    ) -> TransportResult<()>
    where
        T: Element,
        R: BufferMut<Item = T> + ?Sized,
    {
        if self.rank() != root {
            let sizes: Vec<i32> = self.recv_items(root, tags::SIZES)?;
            let expected = sizes
                .get(self.rank() as usize)
                .map(|&s| s.max(0) as usize)
                .ok_or(TransportError::LengthMismatch {
                    expected: self.size() as usize,
                    found: sizes.len(),
                })?;
            let chunk: Vec<T> = self.recv_items(root, tags::SCATTER)?;
            if chunk.len() != expected {
                return Err(TransportError::LengthMismatch {
                    expected,
                    found: chunk.len(),
                });
            }
            return output.store(chunk);
        }

        let spans = layout(sizes, &[], self.size() as usize, items.len());
        let announced = spans
            .as_ref()
            .map_err(Clone::clone)
            .and_then(|_| Message::encode(self.context(), tags::SIZES, sizes));
        self.release(tags::SIZES, announced)?;
        self.distribute(items, spans, output, tags::SCATTER)
    }

    /// Scatter chunks taken from caller-chosen positions of the root's input.
    ///
    /// Rank `r` receives the `sizes[r]` elements starting at `offsets[r]`;
    /// an empty `offsets` takes chunks back to back. `sizes` and `offsets`
    /// are only significant at the root. A chunk that does not fit in a
    /// fixed-size output is truncated with a warning.
    pub fn scatterv_with_layout<S, R>(
        &self,
        input: &S,
        sizes: &[i32],
        offsets: &[i32],
        output: &mut R,
        root: i32,
    ) -> Result<()>
    where
        S: Buffer + ?Sized,
        R: BufferMut<Item = S::Item> + ?Sized,
    {
        let operation = || format!("scatterv operation from root process {root}");
        let items = input.elements();
        if self.is_serial() {
            self.ignore_root("scatterv", root);
            return layout(sizes, offsets, 1, items.len())
                .and_then(|spans| {
                    let (offset, size) = spans[0];
                    self.store_truncated(items[offset..offset + size].to_vec(), output)
                })
                .map_err(|e| self.failure(operation(), e));
        }
        self.check_root(root)?;
        let result = if self.rank() == root {
            let spans = layout(sizes, offsets, self.size() as usize, items.len());
            self.distribute_with(items, spans, tags::SCATTER)
                .and_then(|own| self.store_truncated(own, output))
        } else {
            self.recv_items(root, tags::SCATTER)
                .and_then(|chunk| self.store_truncated(chunk, output))
        };
        result.map_err(|e| self.failure(operation(), e))
    }

    fn store_truncated<T, R>(&self, mut chunk: Vec<T>, output: &mut R) -> TransportResult<()>
    where
        T: Element,
        R: BufferMut<Item = T> + ?Sized,
    {
        if let Some(len) = output.fixed_len() {
            if chunk.len() > len {
                log::warn!(
                    "{self}: received {} elements but the output holds {len}, the rest is dropped",
                    chunk.len()
                );
                chunk.truncate(len);
            }
        }
        output.store(chunk)
    }

    /// Root side of a scatter: send span `r` of `items` to rank `r` and store
    /// the root's own span. A layout error or an output too small for the
    /// root's span releases every peer with a failure marker.
    fn distribute<T, R>(
        &self,
        items: &[T],
        spans: TransportResult<Vec<(usize, usize)>>,
        output: &mut R,
        tag: i32,
    ) -> TransportResult<()>
    where
        T: Element,
        R: BufferMut<Item = T> + ?Sized,
    {
        let spans = spans.and_then(|spans| {
            let own = spans[self.rank() as usize].1;
            if output.can_store(own) {
                Ok(spans)
            } else {
                Err(TransportError::Capacity {
                    required: own,
                    available: output.fixed_len().unwrap_or(own),
                })
            }
        });
        let own = self.distribute_with(items, spans, tag)?;
        output.store(own)
    }

    /// Send span `r` of `items` to each rank `r` and return the root's own span.
    fn distribute_with<T: Element>(
        &self,
        items: &[T],
        spans: TransportResult<Vec<(usize, usize)>>,
        tag: i32,
    ) -> TransportResult<Vec<T>> {
        let messages = spans.and_then(|spans| {
            spans
                .iter()
                .map(|&(offset, size)| {
                    Message::encode(self.context(), tag, &items[offset..offset + size])
                })
                .collect::<TransportResult<Vec<_>>>()
                .map(|messages| (spans, messages))
        });
        let (spans, messages) = match messages {
            Ok(found) => found,
            Err(e) => {
                self.abandon(tag);
                return Err(e);
            }
        };
        for (dest, message) in messages.into_iter().enumerate() {
            if dest as i32 != self.rank() {
                self.post(dest as i32, message)?;
            }
        }
        let (offset, size) = spans[self.rank() as usize];
        Ok(items[offset..offset + size].to_vec())
    }

    // ========================================================================
    // All-to-all
    // ========================================================================

    /// Every member sends chunk `j` of its input to rank `j` and receives
    /// chunk `i` from every rank `i`, concatenated in rank order.
    ///
    /// The input length must be divisible by the group size. A member whose
    /// input or fixed-size output does not fit fails with its own error and
    /// the other members fail with [`TransportError::PeerFailure`]; every
    /// member still drains the chunks sent to it.
    pub fn all_to_all<S, R>(&self, input: &S, output: &mut R) -> Result<()>
    where
        S: Buffer + ?Sized,
        R: BufferMut<Item = S::Item> + ?Sized,
    {
        if self.is_serial() {
            return self.serial_copy(input.elements(), output, "all-to-all operation".into());
        }
        self.all_to_all_impl(input.elements(), output)
            .map_err(|e| self.failure("all-to-all operation".into(), e))
    }

    fn all_to_all_impl<T, R>(&self, items: &[T], output: &mut R) -> TransportResult<()>
    where
        T: Element,
        R: BufferMut<Item = T> + ?Sized,
    {
        let parts = self.size() as usize;
        let len = items.len() / parts;
        let checked: TransportResult<Vec<(usize, usize)>> = if items.len() % parts != 0 {
            Err(TransportError::InvalidLayout(format!(
                "{} elements cannot be split evenly among {parts} processes",
                items.len()
            )))
        } else if !output.can_store(items.len()) {
            Err(TransportError::Capacity {
                required: items.len(),
                available: output.fixed_len().unwrap_or(0),
            })
        } else {
            Ok((0..parts).map(|r| (r * len, len)).collect())
        };
        let own = self.distribute_with(items, checked, tags::ALL_TO_ALL);
        let received = self.receive_from_all(Vec::new(), tags::ALL_TO_ALL);
        let own = own?;
        let mut chunks = received?;
        chunks[self.rank() as usize] = own;
        output.store(uniform_concat(chunks, len)?)
    }

    // ========================================================================
    // Reductions
    // ========================================================================

    /// Combine the inputs of every member element-wise with `op` and store
    /// the result at `root`.
    ///
    /// Contributions are folded in ascending rank order. `output` is only
    /// written on the root.
    pub fn reduce<S, R, O>(&self, input: &S, output: &mut R, op: O, root: i32) -> Result<()>
    where
        S: Buffer + ?Sized,
        R: BufferMut<Item = S::Item> + ?Sized,
        O: Reduction<S::Item>,
    {
        let operation = || format!("reduce operation to root process {root}");
        if self.is_serial() {
            self.ignore_root("reduce", root);
            return self.serial_copy(input.elements(), output, operation());
        }
        self.check_root(root)?;
        self.reduce_to(input.elements(), &op, root, tags::REDUCE)
            .and_then(|reduced| match reduced {
                Some(values) => output.store(values),
                None => Ok(()),
            })
            .map_err(|e| self.failure(operation(), e))
    }

    /// [`reduce`](Self::reduce) with the result stored on every member.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use ferrogroup::{LocalFabric, ReduceOp};
    /// LocalFabric::run(3, |world| {
    ///     let mut total = 0;
    ///     world.all_reduce(&(10 * (world.rank() + 1)), &mut total, ReduceOp::Sum).unwrap();
    ///     assert_eq!(total, 60);
    /// })
    /// .unwrap();
    /// ```
    pub fn all_reduce<S, R, O>(&self, input: &S, output: &mut R, op: O) -> Result<()>
    where
        S: Buffer + ?Sized,
        R: BufferMut<Item = S::Item> + ?Sized,
        O: Reduction<S::Item>,
    {
        if self.is_serial() {
            return self.serial_copy(input.elements(), output, "all-reduce operation".into());
        }
        self.all_reduce_impl(input.elements(), output, &op)
            .map_err(|e| self.failure("all-reduce operation".into(), e))
    }

    fn all_reduce_impl<T, R, O>(&self, items: &[T], output: &mut R, op: &O) -> TransportResult<()>
    where
        T: Element,
        R: BufferMut<Item = T> + ?Sized,
        O: Reduction<T>,
    {
        let reduced = self.reduce_to(items, op, 0, tags::REDUCE);
        let values = if self.rank() == 0 {
            let reduced = reduced.map(Option::unwrap_or_default);
            let message = reduced
                .as_ref()
                .map_err(Clone::clone)
                .and_then(|values| Message::encode(self.context(), tags::BROADCAST, values));
            self.release(tags::BROADCAST, message)?;
            reduced?
        } else {
            reduced?;
            self.recv_items(0, tags::BROADCAST)?
        };
        output.store(values)
    }

    /// All-reduce `data` in place.
    pub fn all_reduce_in_place<B, O>(&self, data: &mut B, op: O) -> Result<()>
    where
        B: BufferMut + ?Sized,
        O: Reduction<B::Item>,
    {
        let input = data.elements().to_vec();
        self.all_reduce(&input[..], data, op)
    }

    /// Inclusive prefix reduction: rank `r` receives the combination of the
    /// inputs of ranks `0..=r`.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use ferrogroup::{LocalFabric, ReduceOp};
    /// LocalFabric::run(3, |world| {
    ///     let mut prefix = 0;
    ///     world.scan(&(10 * (world.rank() + 1)), &mut prefix, ReduceOp::Sum).unwrap();
    ///     assert_eq!(prefix, [10, 30, 60][world.rank() as usize]);
    /// })
    /// .unwrap();
    /// ```
    pub fn scan<S, R, O>(&self, input: &S, output: &mut R, op: O) -> Result<()>
    where
        S: Buffer + ?Sized,
        R: BufferMut<Item = S::Item> + ?Sized,
        O: Reduction<S::Item>,
    {
        if self.is_serial() {
            return self.serial_copy(input.elements(), output, "scan operation".into());
        }
        self.scan_impl(input.elements(), output, &op)
            .map_err(|e| self.failure("scan operation".into(), e))
    }

    fn scan_impl<T, R, O>(&self, items: &[T], output: &mut R, op: &O) -> TransportResult<()>
    where
        T: Element,
        R: BufferMut<Item = T> + ?Sized,
        O: Reduction<T>,
    {
        let rank = self.rank();
        let prefix = if rank == 0 {
            Ok(items.to_vec())
        } else {
            self.recv_items::<T>(rank - 1, tags::SCAN)
                .and_then(|mut prefix| {
                    if prefix.len() != items.len() {
                        return Err(TransportError::LengthMismatch {
                            expected: items.len(),
                            found: prefix.len(),
                        });
                    }
                    op.fold_into(&mut prefix, items);
                    Ok(prefix)
                })
        };

        let next = rank + 1;
        if next < self.size() {
            let forwarded = match &prefix {
                Ok(values) => Message::encode(self.context(), tags::SCAN, values),
                Err(e) => Err(e.clone()),
            };
            match forwarded {
                Ok(message) => self.post(next, message)?,
                Err(e) => {
                    self.post(next, Message::failure(self.context(), tags::SCAN))?;
                    return Err(e);
                }
            }
        }
        output.store(prefix?)
    }

    /// [`reduce`](Self::reduce) of a single value; `Some` on the root only.
    pub fn reduce_scalar<T, O>(&self, value: T, op: O, root: i32) -> Result<Option<T>>
    where
        T: Element,
        O: Reduction<T>,
    {
        let mut output = Vec::with_capacity(1);
        self.reduce(&[value][..], &mut output, op, root)?;
        Ok(output.pop())
    }

    /// [`all_reduce`](Self::all_reduce) of a single value.
    pub fn all_reduce_scalar<T, O>(&self, value: T, op: O) -> Result<T>
    where
        T: Element,
        O: Reduction<T>,
    {
        let mut output = Vec::with_capacity(1);
        self.all_reduce(&[value][..], &mut output, op)?;
        self.single(output, "all-reduce operation")
    }

    /// [`scan`](Self::scan) of a single value.
    pub fn scan_scalar<T, O>(&self, value: T, op: O) -> Result<T>
    where
        T: Element,
        O: Reduction<T>,
    {
        let mut output = Vec::with_capacity(1);
        self.scan(&[value][..], &mut output, op)?;
        self.single(output, "scan operation")
    }

    fn single<T>(&self, mut output: Vec<T>, operation: &str) -> Result<T> {
        let found = output.len();
        match output.pop() {
            Some(value) if found == 1 => Ok(value),
            _ => Err(self.failure(
                operation.to_string(),
                TransportError::LengthMismatch { expected: 1, found },
            )),
        }
    }

    /// Gather every member's contribution at `root` and fold them in rank
    /// order. `Some` on the root only.
    fn reduce_to<T, O>(
        &self,
        items: &[T],
        op: &O,
        root: i32,
        tag: i32,
    ) -> TransportResult<Option<Vec<T>>>
    where
        T: Element,
        O: Reduction<T>,
    {
        let Some(chunks) = self.collect_chunks(items, root, tag)? else {
            return Ok(None);
        };
        let mut chunks = chunks.into_iter();
        let mut acc = chunks.next().unwrap_or_default();
        for chunk in chunks {
            if chunk.len() != acc.len() {
                return Err(TransportError::LengthMismatch {
                    expected: acc.len(),
                    found: chunk.len(),
                });
            }
            op.fold_into(&mut acc, &chunk);
        }
        Ok(Some(acc))
    }

    // ========================================================================
    // Building blocks
    // ========================================================================

    fn recv_items<T: Element>(&self, source: i32, tag: i32) -> TransportResult<Vec<T>> {
        self.fetch(source, tag)?.decode()
    }

    fn others(&self) -> impl Iterator<Item = i32> {
        let rank = self.rank();
        (0..self.size()).filter(move |&r| r != rank)
    }

    /// Non-root side sends its contribution; the root receives every
    /// contribution in rank order. Every message is drained before any
    /// decoding error is reported.
    fn collect_chunks<T: Element>(
        &self,
        items: &[T],
        root: i32,
        tag: i32,
    ) -> TransportResult<Option<Vec<Vec<T>>>> {
        if self.rank() != root {
            self.post(root, Message::encode(self.context(), tag, items)?)?;
            return Ok(None);
        }
        let received: Vec<TransportResult<Vec<T>>> = (0..self.size())
            .map(|source| {
                if source == root {
                    Ok(items.to_vec())
                } else {
                    self.recv_items(source, tag)
                }
            })
            .collect();
        received.into_iter().collect::<TransportResult<Vec<_>>>().map(Some)
    }

    /// Send `items` to every other member, then receive every member's
    /// contribution in rank order.
    fn exchange_all<T: Element>(&self, items: &[T], tag: i32) -> TransportResult<Vec<Vec<T>>> {
        let sent = match Message::encode(self.context(), tag, items) {
            Ok(message) => {
                for dest in self.others() {
                    self.post(dest, message.clone())?;
                }
                Ok(())
            }
            Err(e) => {
                self.abandon(tag);
                Err(e)
            }
        };
        let received = self.receive_from_all(items.to_vec(), tag);
        sent?;
        received
    }

    /// Receive one message on `tag` from every other member, in rank order,
    /// with `own` in the calling member's slot. Every message is drained
    /// before any error is reported.
    fn receive_from_all<T: Element>(&self, own: Vec<T>, tag: i32) -> TransportResult<Vec<Vec<T>>> {
        let rank = self.rank();
        let mut own = Some(own);
        let received: Vec<TransportResult<Vec<T>>> = (0..self.size())
            .map(|source| {
                if source == rank {
                    Ok(own.take().unwrap_or_default())
                } else {
                    self.fetch_from_peer(source, tag)?.decode()
                }
            })
            .collect();
        received.into_iter().collect()
    }

    /// Send `message` to every other member, or a failure marker if it could
    /// not be produced.
    fn release(&self, tag: i32, message: TransportResult<Message>) -> TransportResult<()> {
        match message {
            Ok(message) => {
                for dest in self.others() {
                    self.post(dest, message.clone())?;
                }
                Ok(())
            }
            Err(e) => {
                self.abandon(tag);
                Err(e)
            }
        }
    }

    fn abandon(&self, tag: i32) {
        for dest in self.others() {
            if let Err(e) = self.post(dest, Message::failure(self.context(), tag)) {
                log::debug!("{self}: could not report failure to process {dest}: {e}");
            }
        }
    }

    fn serial_copy<T, R>(&self, items: &[T], output: &mut R, operation: String) -> Result<()>
    where
        T: Element,
        R: BufferMut<Item = T> + ?Sized,
    {
        output
            .store(items.to_vec())
            .map_err(|e| self.failure(operation, e))
    }

    fn ignore_root(&self, operation: &str, root: i32) {
        if root != self.rank() {
            log::warn!(
                "{self}: the only process available for the {operation} operation is {}! The requested root process {root} will be ignored",
                self.rank()
            );
        }
    }

    fn check_root(&self, root: i32) -> Result<()> {
        if root < 0 || root >= self.size() {
            return Err(Error::InvalidProcessGroup(format!(
                "root process {root} is not a member of {self}"
            )));
        }
        Ok(())
    }
}

/// Concatenate chunks that must all hold `len` elements.
fn uniform_concat<T>(chunks: Vec<Vec<T>>, len: usize) -> TransportResult<Vec<T>> {
    if let Some(chunk) = chunks.iter().find(|c| c.len() != len) {
        return Err(TransportError::LengthMismatch {
            expected: len,
            found: chunk.len(),
        });
    }
    Ok(chunks.into_iter().flatten().collect())
}

fn count_i32(len: usize) -> TransportResult<i32> {
    i32::try_from(len).map_err(|_| {
        TransportError::InvalidLayout(format!("{len} elements exceed the supported count"))
    })
}

/// Resolve `sizes`/`offsets` into `(offset, size)` spans over a buffer of
/// `len` elements. Empty `offsets` lays the spans out back to back.
fn layout(
    sizes: &[i32],
    offsets: &[i32],
    parts: usize,
    len: usize,
) -> TransportResult<Vec<(usize, usize)>> {
    if sizes.len() != parts {
        return Err(TransportError::InvalidLayout(format!(
            "expected {parts} sizes, got {}",
            sizes.len()
        )));
    }
    if !offsets.is_empty() && offsets.len() != parts {
        return Err(TransportError::InvalidLayout(format!(
            "expected {parts} offsets, got {}",
            offsets.len()
        )));
    }
    let mut spans = Vec::with_capacity(parts);
    let mut next = 0usize;
    for (rank, &size) in sizes.iter().enumerate() {
        let size = usize::try_from(size).map_err(|_| {
            TransportError::InvalidLayout(format!("negative size {size} for process {rank}"))
        })?;
        let offset = match offsets.get(rank) {
            Some(&offset) => usize::try_from(offset).map_err(|_| {
                TransportError::InvalidLayout(format!("negative offset {offset} for process {rank}"))
            })?,
            None => next,
        };
        let end = offset + size;
        if end > len {
            return Err(TransportError::Capacity {
                required: end,
                available: len,
            });
        }
        spans.push((offset, size));
        next = end;
    }
    Ok(spans)
}
