//! Source initialization and destination validation
//!
//! Both go through host buffers in the staging pool. Device-owned buffers
//! are filled and read back with an async copy driven by their owner; host
//! buffers use a plain CPU copy. The pattern is kept as immutable [`Bytes`]
//! so every comparison shares one allocation.

use crate::catalog::{Agent, StagingPool};
use crate::error::Result;
use crate::platform::{BufferHandle, CopyRequest, Platform, SignalHandle};
use crate::wait::CompletionWait;
use bytes::Bytes;
use std::cmp::Ordering;

/// Byte written over the validation buffer before each read-back
pub const POISON_BYTE: u8 = !0x23;

/// Deterministic source pattern
///
/// A fixed `init` value fills every byte. Otherwise each 4-byte word holds
/// `sin(i)` as little-endian `f32`, which never repeats a byte run long
/// enough to hide a misplaced copy.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn fill_pattern(size: usize, init: Option<u8>) -> Bytes {
    if let Some(value) = init {
        return Bytes::from(vec![value; size]);
    }
    let mut data = Vec::with_capacity(size);
    let mut i = 0u32;
    while data.len() + 4 <= size {
        data.extend_from_slice(&(i as f32).sin().to_le_bytes());
        i = i.wrapping_add(1);
    }
    data.resize(size, 0);
    Bytes::from(data)
}

/// `memcmp`-style comparison
///
/// Returns `None` if equal, else the difference of the first mismatching
/// byte pair (`expected - actual`), which is never zero.
#[must_use]
pub fn compare(expected: &[u8], actual: &[u8]) -> Option<i32> {
    let mismatch = expected
        .iter()
        .zip(actual)
        .find(|(e, a)| e != a)
        .map(|(&e, &a)| i32::from(e) - i32::from(a));
    match (mismatch, expected.len().cmp(&actual.len())) {
        (Some(diff), _) => Some(diff),
        (None, Ordering::Equal) => None,
        (None, Ordering::Greater) => Some(1),
        (None, Ordering::Less) => Some(-1),
    }
}

/// Host-side buffers for one transaction or batch
#[derive(Debug)]
pub struct StagingArea<'p> {
    platform: &'p dyn Platform,
    staging: StagingPool,
    init_value: Option<u8>,
    waiter: Box<dyn CompletionWait>,
    source: Option<(BufferHandle, Bytes)>,
    check: Option<BufferHandle>,
    signal: Option<SignalHandle>,
}

impl<'p> StagingArea<'p> {
    /// Staging area over `staging`; nothing is allocated until first use
    ///
    /// Staged copies complete through `waiter`, the run's wait mode.
    pub fn new(
        platform: &'p dyn Platform,
        staging: StagingPool,
        init_value: Option<u8>,
        waiter: Box<dyn CompletionWait>,
    ) -> Self {
        Self {
            platform,
            staging,
            init_value,
            waiter,
            source: None,
            check: None,
            signal: None,
        }
    }

    fn signal(&mut self) -> Result<SignalHandle> {
        if let Some(signal) = self.signal {
            return Ok(signal);
        }
        let signal = self.platform.signal_create(0)?;
        self.signal = Some(signal);
        Ok(signal)
    }

    /// Pattern buffer, allocated and filled for `size` bytes on first call
    fn source(&mut self, size: usize) -> Result<(BufferHandle, Bytes)> {
        if let Some((buffer, pattern)) = &self.source {
            return Ok((*buffer, pattern.clone()));
        }
        let buffer = self.platform.allocate(self.staging.pool, size)?;
        let pattern = fill_pattern(size, self.init_value);
        self.platform.host_write(buffer, 0, &pattern)?;
        self.source = Some((buffer, pattern.clone()));
        Ok((buffer, pattern))
    }

    /// Copy `size` bytes and wait for completion
    fn staged_copy(&mut self, request: impl FnOnce(SignalHandle) -> CopyRequest<'static>) -> Result<()> {
        let signal = self.signal()?;
        self.platform.signal_store(signal, 1)?;
        self.platform.async_copy(&request(signal))?;
        self.waiter.wait(self.platform, signal)
    }

    /// Fill `buffer`, owned by `owner`, with the pattern
    ///
    /// # Errors
    ///
    /// Returns error if staging allocation, access grant or the copy fails.
    pub fn initialize(&mut self, buffer: BufferHandle, owner: &Agent, size: usize) -> Result<()> {
        let (source, _) = self.source(size)?;
        if owner.class.is_host() {
            return self.platform.host_copy(buffer, source, size);
        }
        self.platform.allow_access(&[owner.handle], source)?;
        let staging_agent = self.staging.agent;
        let owner_handle = owner.handle;
        self.staged_copy(|completion| CopyRequest {
            dst: buffer,
            dst_agent: owner_handle,
            src: source,
            src_agent: staging_agent,
            size,
            deps: &[],
            completion,
        })
    }

    /// Read back `size` bytes of `buffer`, owned by `owner`, and compare
    ///
    /// Returns `None` on a match, or the first byte difference.
    ///
    /// # Errors
    ///
    /// Returns error if staging allocation, access grant or the copy fails.
    pub fn verify(
        &mut self,
        buffer: BufferHandle,
        owner: &Agent,
        max_size: usize,
        size: usize,
    ) -> Result<Option<i32>> {
        let (_, pattern) = self.source(max_size)?;
        let check = match self.check {
            Some(check) => check,
            None => {
                let check = self.platform.allocate(self.staging.pool, max_size)?;
                self.check = Some(check);
                check
            }
        };
        self.platform.host_write(check, 0, &vec![POISON_BYTE; size])?;

        if owner.class.is_host() {
            self.platform.host_copy(check, buffer, size)?;
        } else {
            self.platform.allow_access(&[owner.handle], check)?;
            let staging_agent = self.staging.agent;
            let owner_handle = owner.handle;
            self.staged_copy(|completion| CopyRequest {
                dst: check,
                dst_agent: staging_agent,
                src: buffer,
                src_agent: owner_handle,
                size,
                deps: &[],
                completion,
            })?;
        }

        let mut actual = vec![0u8; size];
        self.platform.host_read(check, 0, &mut actual)?;
        Ok(compare(&pattern[..size], &actual))
    }

    /// Free every staging buffer and signal
    ///
    /// Every resource is released even if an earlier one fails.
    ///
    /// # Errors
    ///
    /// Returns the first error the platform reported.
    pub fn release(self) -> Result<()> {
        let mut first = None;
        let buffers = self.source.map(|(buffer, _)| buffer).into_iter().chain(self.check);
        for buffer in buffers {
            if let Err(e) = self.platform.free(buffer) {
                first.get_or_insert(e);
            }
        }
        if let Some(signal) = self.signal {
            if let Err(e) = self.platform.signal_destroy(signal) {
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}
