//! Host-to-controller ACL buffer pool
//!
//! The controller reports how many ACL packets it can hold and how large
//! each may be. The pool holds exactly that many [`Buffer`]s. A writer
//! checks one out per fragment and commits it to the owning connection
//! once the fragment is on the wire; it only comes back when the
//! controller reports the packet completed or the connection goes away.
//! A completion can be processed before the writer gets to commit; it is
//! then held as a credit on the handle and the commit frees the buffer.
//!
//! Every buffer is owned by exactly one of: the free list, a writer that
//! checked it out, or a connection's in-flight queue.

use crate::error::{HciError, HciResult};
use crate::hci::constants::HCI_ACL_HDR_SIZE;
use log::{debug, warn};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// One controller-sized send buffer
///
/// Not `Clone`: a buffer is returned to the pool by value, so it cannot be
/// checked in twice.
#[derive(Debug)]
pub struct Buffer {
    data: Vec<u8>,
}

impl Buffer {
    fn new(size: usize) -> Self {
        Self {
            data: Vec::with_capacity(1 + HCI_ACL_HDR_SIZE + size),
        }
    }

    /// The frame bytes written so far
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Mutable access for building a frame in place
    pub fn frame_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }

    fn reset(&mut self) {
        self.data.clear();
    }
}

#[derive(Debug)]
struct PoolState {
    free: Vec<Buffer>,
    in_flight: HashMap<u16, VecDeque<Buffer>>,
    // Completions that arrived before the matching commit
    early: HashMap<u16, usize>,
    // Handles torn down since their last activation
    retired: HashSet<u16>,
    closed: Option<String>,
}

/// Bounded set of ACL send buffers
#[derive(Debug)]
pub struct BufferPool {
    capacity: usize,
    buffer_size: usize,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl BufferPool {
    /// Create a pool of `capacity` buffers carrying up to `buffer_size`
    /// bytes of ACL payload each
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        let free = (0..capacity).map(|_| Buffer::new(buffer_size)).collect();
        Self {
            capacity,
            buffer_size,
            state: Mutex::new(PoolState {
                free,
                in_flight: HashMap::new(),
                early: HashMap::new(),
                retired: HashSet::new(),
                closed: None,
            }),
            available: Condvar::new(),
        }
    }

    /// Total number of buffers
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Maximum ACL payload per buffer
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a buffer, blocking until one is free
    ///
    /// Fails only once the pool is closed.
    pub fn checkout(&self) -> HciResult<Buffer> {
        let mut state = self.lock();
        loop {
            if let Some(reason) = &state.closed {
                return Err(HciError::Terminated(reason.clone()));
            }
            if let Some(buffer) = state.free.pop() {
                return Ok(buffer);
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Take a buffer if one is free right now
    pub fn try_checkout(&self) -> Option<Buffer> {
        let mut state = self.lock();
        if state.closed.is_some() {
            return None;
        }
        state.free.pop()
    }

    /// Return a buffer that never reached the controller
    pub fn checkin(&self, mut buffer: Buffer) {
        buffer.reset();
        self.lock().free.push(buffer);
        self.available.notify_one();
    }

    /// Record a written buffer as in flight on `handle`
    ///
    /// A buffer committed to a retired handle goes straight back to the
    /// free list, since no completion will ever arrive for it.
    pub fn commit(&self, handle: u16, mut buffer: Buffer) {
        let mut state = self.lock();
        if state.retired.contains(&handle) {
            debug!("Dropping commit to retired handle {:#06x}", handle);
            buffer.reset();
            state.free.push(buffer);
            drop(state);
            self.available.notify_one();
            return;
        }
        if let Some(credit) = state.early.get_mut(&handle) {
            *credit -= 1;
            if *credit == 0 {
                state.early.remove(&handle);
            }
            buffer.reset();
            state.free.push(buffer);
            drop(state);
            self.available.notify_one();
            return;
        }
        state.in_flight.entry(handle).or_default().push_back(buffer);
    }

    /// Accept commits on `handle` again after the controller reused it
    pub fn activate(&self, handle: u16) {
        let mut state = self.lock();
        state.retired.remove(&handle);
        state.early.remove(&handle);
    }

    /// The controller finished `count` packets on `handle`
    ///
    /// Returns how many buffers went back to the free list.
    pub fn complete(&self, handle: u16, count: usize) -> usize {
        let mut state = self.lock();
        let mut reclaimed = Vec::new();
        if let Some(queue) = state.in_flight.get_mut(&handle) {
            let n = count.min(queue.len());
            reclaimed.extend(queue.drain(..n));
        }
        // The rest may belong to buffers still between write and commit
        let mut shortfall = count - reclaimed.len();
        if shortfall > 0 && !state.retired.contains(&handle) {
            let credited: usize = state.early.values().sum();
            let committed: usize = state.in_flight.values().map(VecDeque::len).sum();
            let uncommitted = self
                .capacity
                .saturating_sub(state.free.len() + reclaimed.len() + committed + credited);
            let held = shortfall.min(uncommitted);
            if held > 0 {
                *state.early.entry(handle).or_default() += held;
                shortfall -= held;
            }
        }
        if shortfall > 0 {
            warn!(
                "Controller completed {} packets on handle {:#06x} but only {} were outstanding",
                count,
                handle,
                count - shortfall
            );
        }
        let n = reclaimed.len();
        for mut buffer in reclaimed {
            buffer.reset();
            state.free.push(buffer);
        }
        drop(state);
        if n > 0 {
            self.available.notify_all();
        }
        n
    }

    /// Reclaim every buffer still in flight on `handle` and retire it
    pub fn checkin_all(&self, handle: u16) -> usize {
        let mut state = self.lock();
        state.retired.insert(handle);
        state.early.remove(&handle);
        let queue = state.in_flight.remove(&handle).unwrap_or_default();
        let n = queue.len();
        for mut buffer in queue {
            buffer.reset();
            state.free.push(buffer);
        }
        drop(state);
        if n > 0 {
            debug!("Reclaimed {} buffers from handle {:#06x}", n, handle);
            self.available.notify_all();
        }
        n
    }

    /// Buffers currently on the free list
    pub fn free_count(&self) -> usize {
        self.lock().free.len()
    }

    /// Buffers in flight on one connection
    pub fn in_flight(&self, handle: u16) -> usize {
        self.lock().in_flight.get(&handle).map_or(0, VecDeque::len)
    }

    /// Buffers in flight across all connections
    pub fn total_in_flight(&self) -> usize {
        self.lock().in_flight.values().map(VecDeque::len).sum()
    }

    /// Fail every current and future checkout
    pub fn close(&self, reason: &str) {
        let mut state = self.lock();
        if state.closed.is_none() {
            state.closed = Some(reason.to_string());
        }
        drop(state);
        self.available.notify_all();
    }
}
