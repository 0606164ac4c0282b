//! Benchmark execution
//!
//! Runs the transactions of a plan against a [`Platform`] and fills in their
//! result vectors. Copy transactions run one after another; a concurrent
//! plan runs all of its transactions as one batch released by a shared
//! start gate. Every buffer, signal and profiling switch a transaction
//! acquires is released before the next transaction starts, on success and
//! on error alike.

use crate::catalog::{Agent, Catalog};
use crate::config::RunConfig;
use crate::error::{BwError, Result};
use crate::platform::{AgentHandle, BufferHandle, CopyRequest, Platform, PoolHandle, SignalHandle};
use crate::request::{Request, SizeList};
use crate::staging::StagingArea;
use crate::stats::{self, SizeSamples, TimeSource};
use crate::timer::HostTimer;
use crate::transaction::{CopyPayload, Transaction, TransactionPlan};
use crate::wait::{waiter_for, CompletionWait};
use tracing::{debug, info, warn};

/// Everything a transaction holds on the platform
struct Held<'p> {
    platform: &'p dyn Platform,
    buffers: Vec<BufferHandle>,
    signals: Vec<SignalHandle>,
    profiled: Vec<AgentHandle>,
    staging: StagingArea<'p>,
}

impl<'p> Held<'p> {
    fn new(platform: &'p dyn Platform, staging: StagingArea<'p>) -> Self {
        Self {
            platform,
            buffers: Vec::new(),
            signals: Vec::new(),
            profiled: Vec::new(),
            staging,
        }
    }

    fn allocate(&mut self, pool: PoolHandle, size: usize) -> Result<BufferHandle> {
        let buffer = self.platform.allocate(pool, size)?;
        self.buffers.push(buffer);
        Ok(buffer)
    }

    fn signal(&mut self) -> Result<SignalHandle> {
        let signal = self.platform.signal_create(0)?;
        self.signals.push(signal);
        Ok(signal)
    }

    fn profile(&mut self, agent: &Agent) -> Result<()> {
        if agent.class.is_accelerator() && !self.profiled.contains(&agent.handle) {
            self.platform.set_copy_profiling(agent.handle, true)?;
            self.profiled.push(agent.handle);
        }
        Ok(())
    }

    /// Release everything, reporting the first failure
    fn release(self) -> Result<()> {
        let mut first = self.staging.release().err();
        for agent in self.profiled {
            if let Err(e) = self.platform.set_copy_profiling(agent, false) {
                first.get_or_insert(e);
            }
        }
        for signal in self.signals {
            if let Err(e) = self.platform.signal_destroy(signal) {
                first.get_or_insert(e);
            }
        }
        for buffer in self.buffers {
            if let Err(e) = self.platform.free(buffer) {
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

/// One direction of a copy: buffers, owners and completion signal
#[derive(Debug, Clone, Copy)]
struct Lane {
    src: BufferHandle,
    dst: BufferHandle,
    src_agent: usize,
    dst_agent: usize,
    signal: SignalHandle,
}

/// Per-transaction state of a running copy
#[derive(Debug, Clone, Copy)]
struct CopyJob {
    copy: CopyPayload,
    fwd: Lane,
    rev: Option<Lane>,
    source: TimeSource,
}

/// Runs transaction plans
#[derive(Debug)]
pub struct BenchmarkExecutor<'a> {
    platform: &'a dyn Platform,
    catalog: &'a Catalog,
    waiter: Box<dyn CompletionWait>,
    config: RunConfig,
    exit_code: i32,
}

impl<'a> BenchmarkExecutor<'a> {
    /// Executor waiting in the mode `config` selects
    pub fn new(platform: &'a dyn Platform, catalog: &'a Catalog, config: &RunConfig) -> Self {
        Self {
            platform,
            catalog,
            waiter: waiter_for(config.wait_mode),
            config: config.clone(),
            exit_code: 0,
        }
    }

    /// First validation mismatch seen, as a `memcmp`-style byte difference;
    /// zero while everything matched
    pub const fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// Run every transaction of `plan`
    ///
    /// # Errors
    ///
    /// Returns the first platform failure. Transactions already finished
    /// keep their results.
    pub fn run(&mut self, request: &Request, plan: &mut TransactionPlan, sizes: &SizeList) -> Result<()> {
        if sizes.is_empty() || plan.transactions.is_empty() {
            debug!("{}: nothing to run", request.kind);
            return Ok(());
        }
        let base = request.base_iterations(&self.config);
        let iterations = stats::iteration_count(base, request.validate);
        info!(
            "{}: {} transaction(s), {} size(s), {iterations} iteration(s) each",
            request.kind,
            plan.transactions.len(),
            sizes.len()
        );

        if request.kind.is_read_write() {
            warn!(
                "{}: kernel read/write is not supported on this platform, no results recorded",
                request.kind
            );
            return Ok(());
        }
        if request.kind.is_concurrent() {
            return self.run_batch(&mut plan.transactions, request, sizes, base, iterations);
        }
        for transaction in &mut plan.transactions {
            self.run_batch(std::slice::from_mut(transaction), request, sizes, base, iterations)?;
        }
        Ok(())
    }

    fn time_source(&self, request: &Request, copy: &CopyPayload) -> Result<TimeSource> {
        if request.host_time || !copy.uses_accelerator || !self.platform.supports_copy_profiling() {
            return Ok(TimeSource::Host);
        }
        Ok(TimeSource::Device {
            frequency_hz: self.platform.timestamp_frequency()?,
        })
    }

    /// Run `transactions` together, each size and iteration released at once
    fn run_batch(
        &mut self,
        transactions: &mut [Transaction],
        request: &Request,
        sizes: &SizeList,
        base: u32,
        iterations: u32,
    ) -> Result<()> {
        let staging = StagingArea::new(
            self.platform,
            self.catalog.staging()?,
            request.init_value,
            waiter_for(self.waiter.mode()),
        );
        let mut held = Held::new(self.platform, staging);
        let measured = self.measure(&mut held, transactions, request, sizes, iterations);
        let released = held.release();
        let (jobs, samples) = measured?;
        released?;

        for (transaction, (job, per_size)) in transactions.iter_mut().zip(jobs.iter().zip(samples)) {
            for (&size, size_samples) in sizes.as_slice().iter().zip(&per_size) {
                stats::reduce_copy_results(
                    &mut transaction.results,
                    &job.copy,
                    size,
                    size_samples,
                    base,
                    job.source,
                );
            }
            debug!(
                "transaction {}: pool {} -> pool {} done",
                transaction.index, job.copy.src_pool, job.copy.dst_pool
            );
        }
        Ok(())
    }

    #[allow(clippy::type_complexity)]
    fn measure(
        &mut self,
        held: &mut Held<'a>,
        transactions: &[Transaction],
        request: &Request,
        sizes: &SizeList,
        iterations: u32,
    ) -> Result<(Vec<CopyJob>, Vec<Vec<SizeSamples>>)> {
        let max = sizes.max();
        let jobs = transactions
            .iter()
            .map(|t| self.prepare(held, t, request, max))
            .collect::<Result<Vec<_>>>()?;
        let gated = jobs.len() > 1 || jobs.iter().any(|j| j.rev.is_some());
        let gate = if gated { Some(held.signal()?) } else { None };

        let mut samples = vec![Vec::with_capacity(sizes.len()); jobs.len()];
        for &size in sizes.as_slice() {
            let mut per_job = vec![SizeSamples::default(); jobs.len()];
            for _ in 0..iterations {
                let host = self.iterate(&jobs, gate, size)?;
                for (job, job_samples) in jobs.iter().zip(&mut per_job) {
                    job_samples.host.push(host);
                    if let TimeSource::Device { .. } = job.source {
                        job_samples.device_ticks.push(self.device_ticks(job)?);
                    }
                    if request.validate && self.check(held, job, max, size)? {
                        job_samples.failed = true;
                    }
                }
            }
            for (all, job_samples) in samples.iter_mut().zip(per_job) {
                all.push(job_samples);
            }
        }
        Ok((jobs, samples))
    }

    /// Allocate, grant and initialize one transaction's buffers
    fn prepare(&self, held: &mut Held<'a>, transaction: &Transaction, request: &Request, max: usize) -> Result<CopyJob> {
        let copy = *transaction.as_copy().ok_or_else(|| {
            BwError::invalid_request(format!("transaction {} is not a copy", transaction.index))
        })?;
        let src_agent = self.catalog.agent(copy.src_agent)?;
        let dst_agent = self.catalog.agent(copy.dst_agent)?;
        let source = self.time_source(request, &copy)?;
        if let TimeSource::Device { .. } = source {
            held.profile(src_agent)?;
            held.profile(dst_agent)?;
        }

        let fwd = self.lane(held, copy.src_handle, copy.dst_handle, src_agent, dst_agent, max)?;
        held.staging.initialize(fwd.src, src_agent, max)?;
        let rev = if copy.bidirectional {
            let rev = self.lane(held, copy.dst_handle, copy.src_handle, dst_agent, src_agent, max)?;
            held.staging.initialize(rev.src, dst_agent, max)?;
            Some(rev)
        } else {
            None
        };
        Ok(CopyJob {
            copy,
            fwd,
            rev,
            source,
        })
    }

    /// Buffers for one direction; each endpoint is granted the other's
    /// buffer where the platform allows it
    fn lane(
        &self,
        held: &mut Held<'a>,
        src_pool: PoolHandle,
        dst_pool: PoolHandle,
        src_agent: &Agent,
        dst_agent: &Agent,
        size: usize,
    ) -> Result<Lane> {
        let src = held.allocate(src_pool, size)?;
        let dst = held.allocate(dst_pool, size)?;
        if src_agent.index != dst_agent.index {
            if self.platform.pool_access(src_agent.handle, dst_pool)?.is_possible() {
                self.platform.allow_access(&[src_agent.handle], dst)?;
            }
            if self.platform.pool_access(dst_agent.handle, src_pool)?.is_possible() {
                self.platform.allow_access(&[dst_agent.handle], src)?;
            }
        }
        Ok(Lane {
            src,
            dst,
            src_agent: src_agent.index,
            dst_agent: dst_agent.index,
            signal: held.signal()?,
        })
    }

    /// One timed iteration over every job; returns the host time in seconds
    fn iterate(&self, jobs: &[CopyJob], gate: Option<SignalHandle>, size: usize) -> Result<f64> {
        let lanes: Vec<&Lane> = jobs
            .iter()
            .flat_map(|j| std::iter::once(&j.fwd).chain(j.rev.as_ref()))
            .collect();
        if let Some(gate) = gate {
            self.platform.signal_store(gate, 1)?;
        }
        for lane in &lanes {
            self.platform.signal_store(lane.signal, 1)?;
        }

        let gate_deps: Vec<SignalHandle> = gate.into_iter().collect();
        let timer = HostTimer::start();
        for lane in &lanes {
            self.platform.async_copy(&CopyRequest {
                dst: lane.dst,
                dst_agent: self.catalog.agent(lane.dst_agent)?.handle,
                src: lane.src,
                src_agent: self.catalog.agent(lane.src_agent)?.handle,
                size,
                deps: &gate_deps,
                completion: lane.signal,
            })?;
        }
        if let Some(gate) = gate {
            self.platform.signal_store(gate, 0)?;
        }
        for lane in &lanes {
            self.waiter.wait(self.platform, lane.signal)?;
        }
        Ok(timer.elapsed())
    }

    /// Agent whose copy engine timestamps a lane
    fn engine(&self, lane: &Lane) -> Result<AgentHandle> {
        let dst = self.catalog.agent(lane.dst_agent)?;
        if dst.class.is_accelerator() {
            return Ok(dst.handle);
        }
        Ok(self.catalog.agent(lane.src_agent)?.handle)
    }

    #[allow(clippy::cast_precision_loss)]
    fn device_ticks(&self, job: &CopyJob) -> Result<f64> {
        let fwd = self.platform.copy_timestamps(self.engine(&job.fwd)?, job.fwd.signal)?;
        let rev = match &job.rev {
            Some(lane) => Some(self.platform.copy_timestamps(self.engine(lane)?, lane.signal)?),
            None => None,
        };
        Ok(stats::device_copy_window(fwd, rev) as f64)
    }

    /// Validate both directions of a job; `true` on mismatch
    fn check(&mut self, held: &mut Held<'a>, job: &CopyJob, max: usize, size: usize) -> Result<bool> {
        let mut failed = false;
        for lane in std::iter::once(&job.fwd).chain(job.rev.as_ref()) {
            let owner = self.catalog.agent(lane.dst_agent)?;
            if let Some(diff) = held.staging.verify(lane.dst, owner, max, size)? {
                warn!(
                    "Data mismatch copying into agent {} at {size} bytes (difference {diff})",
                    owner.index
                );
                if self.exit_code == 0 {
                    self.exit_code = diff;
                }
                failed = true;
            }
        }
        Ok(failed)
    }
}
