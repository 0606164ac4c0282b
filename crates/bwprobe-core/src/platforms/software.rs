// SPDX-License-Identifier: AGPL-3.0-only

//! Software (simulated fabric) platform
//!
//! Implements [`Platform`] over an in-memory model of a heterogeneous node.
//! A [`FabricSpec`] lists the agents, their pools, the links between agents
//! and any explicit access denials; [`SoftwarePlatform`] then behaves like a
//! runtime for that node:
//!
//! 1. **Real data movement**: buffers are host memory and every async copy
//!    moves bytes, so initialization and validation exercise the same path
//!    they would on hardware.
//!
//! 2. **Start gates**: a copy waits until all of its dependency signals read
//!    zero. Copies released by the same `signal_store` share a start tick.
//!
//! 3. **Access checks**: a copy needs one accelerator endpoint that may
//!    touch both buffers, as owner, by grant or by default. Copies between
//!    host pools run on the host.
//!
//! 4. **Modeled timestamps**: transfer time is the byte count over the
//!    path's bottleneck bandwidth plus a fixed latency, in ticks of a
//!    100 MHz device clock.
//!
//! Copies complete synchronously once their gates are open, so both wait
//! modes observe the completion immediately.
//!
//! ## Presets
//!
//! | Preset | Layout |
//! |--------|--------|
//! | `workstation` | 1 CPU, 2 GPUs on PCIe, GPU peers through the root complex |
//! | `dual-xgmi` | 1 CPU, 2 GPUs joined by one XGMI hop |
//! | `two-socket` | 2 CPUs, 4 GPUs, XGMI pairs per socket, one unreachable and one one-way GPU pair |

use crate::error::{BwError, Result};
use crate::platform::{
    AgentHandle, AgentInfo, BufferHandle, CopyRequest, CopyTimestamps, Platform, PlatformType,
    PoolAccess, PoolHandle, PoolInfo, Segment, SignalHandle,
};
use bwprobe_model::link::{self, HopKind, LinkHop};
use bwprobe_model::pcie::Bdf;
use bwprobe_model::DeviceClass;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Condvar, Mutex, MutexGuard};
use tracing::{debug, info, trace, warn};

/// Tick rate of the simulated device clock
pub const TIMESTAMP_FREQUENCY_HZ: u64 = 100_000_000;

/// Fixed per-copy latency added by the presets (1.5 µs)
pub const DEFAULT_COPY_LATENCY_TICKS: u64 = 150;

/// Largest single allocation a preset pool accepts
pub const PRESET_POOL_SIZE: usize = 1 << 30;

const AGENT_BASE: u64 = 0x1000;
const POOL_BASE: u64 = 0x2_0000;

/// One simulated agent
#[derive(Debug, Clone)]
pub struct AgentSpec {
    /// Name reported by `agent_info`
    pub name: String,
    /// Host or accelerator
    pub class: DeviceClass,
    /// Packed PCIe id (accelerators)
    pub bdf: Option<u32>,
    /// Bandwidth of copies that stay on this agent, GB/s
    pub local_gbps: f64,
}

/// One simulated pool
#[derive(Debug, Clone, Copy)]
pub struct PoolSpec {
    /// Owning agent index
    pub agent: usize,
    /// Reported properties
    pub info: PoolInfo,
}

/// Description of a simulated node
#[derive(Debug, Clone)]
pub struct FabricSpec {
    agents: Vec<AgentSpec>,
    pools: Vec<PoolSpec>,
    links: HashMap<(usize, usize), Vec<LinkHop>>,
    denied: HashSet<(usize, usize)>,
    copy_latency_ticks: u64,
}

impl Default for FabricSpec {
    fn default() -> Self {
        Self::new()
    }
}

impl FabricSpec {
    /// Empty fabric with the default copy latency
    pub fn new() -> Self {
        Self {
            agents: Vec::new(),
            pools: Vec::new(),
            links: HashMap::new(),
            denied: HashSet::new(),
            copy_latency_ticks: DEFAULT_COPY_LATENCY_TICKS,
        }
    }

    /// Add a host agent, returning its index
    pub fn host(&mut self, name: &str) -> usize {
        self.agents.push(AgentSpec {
            name: name.to_string(),
            class: DeviceClass::Host,
            bdf: None,
            local_gbps: 40.0,
        });
        self.agents.len() - 1
    }

    /// Add an accelerator agent at a packed PCIe id, returning its index
    pub fn accelerator(&mut self, name: &str, bdf: u32) -> usize {
        self.agents.push(AgentSpec {
            name: name.to_string(),
            class: DeviceClass::Accelerator,
            bdf: Some(bdf),
            local_gbps: 1000.0,
        });
        self.agents.len() - 1
    }

    /// Add a pool owned by `agent`, returning its index
    pub fn pool(&mut self, agent: usize, info: PoolInfo) -> usize {
        self.pools.push(PoolSpec { agent, info });
        self.pools.len() - 1
    }

    /// Add the usual host pool pair: fine-grained kernarg and coarse-grained
    pub fn host_pools(&mut self, agent: usize) {
        self.pool(agent, pool_info(true, true));
        self.pool(agent, pool_info(false, false));
    }

    /// Add the usual accelerator pool pair: coarse-grained and fine-grained
    pub fn accelerator_pools(&mut self, agent: usize) {
        self.pool(agent, pool_info(false, false));
        self.pool(agent, pool_info(true, false));
    }

    /// Connect two agents through `hops`, in both directions
    pub fn link(&mut self, a: usize, b: usize, hops: Vec<LinkHop>) {
        let mut reversed = hops.clone();
        reversed.reverse();
        self.links.insert((a, b), hops);
        self.links.insert((b, a), reversed);
    }

    /// Forbid `agent` from ever accessing `pool`
    pub fn deny(&mut self, agent: usize, pool: usize) {
        self.denied.insert((agent, pool));
    }

    /// Override the fixed per-copy latency
    pub fn set_copy_latency(&mut self, ticks: u64) {
        self.copy_latency_ticks = ticks;
    }

    /// Set the intra-agent copy bandwidth of `agent`
    pub fn set_local_bandwidth(&mut self, agent: usize, gbps: f64) {
        if let Some(spec) = self.agents.get_mut(agent) {
            spec.local_gbps = gbps;
        }
    }

    fn validate(&self) -> Result<()> {
        let count = self.agents.len();
        let check = |index: usize| {
            if index < count {
                Ok(())
            } else {
                Err(BwError::UnknownAgent { index, count })
            }
        };
        for pool in &self.pools {
            check(pool.agent)?;
        }
        for &(a, b) in self.links.keys() {
            check(a)?;
            check(b)?;
        }
        for &(agent, pool) in &self.denied {
            check(agent)?;
            if pool >= self.pools.len() {
                return Err(BwError::UnknownPool {
                    index: pool,
                    count: self.pools.len(),
                });
            }
        }
        Ok(())
    }
}

/// Global, allocatable pool of the preset size
pub const fn pool_info(fine_grained: bool, kernarg: bool) -> PoolInfo {
    PoolInfo {
        segment: Segment::Global,
        alloc_allowed: true,
        size: PRESET_POOL_SIZE,
        access_to_all: false,
        fine_grained,
        kernarg,
    }
}

/// Built-in fabric layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FabricPreset {
    /// One CPU, two PCIe GPUs
    #[default]
    Workstation,
    /// One CPU, two GPUs with a direct XGMI hop
    DualXgmi,
    /// Two CPU sockets with two GPUs each
    TwoSocket,
}

impl FabricPreset {
    /// Every preset, in listing order
    pub const ALL: [Self; 3] = [Self::Workstation, Self::DualXgmi, Self::TwoSocket];

    /// Name accepted by [`FromStr`]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Workstation => "workstation",
            Self::DualXgmi => "dual-xgmi",
            Self::TwoSocket => "two-socket",
        }
    }

    /// Fabric description for this preset
    pub fn spec(self) -> FabricSpec {
        let pcie = |distance| LinkHop::new(HopKind::Pcie, distance).with_bandwidth(24.0);
        let xgmi = LinkHop::new(HopKind::Xgmi, 15).with_bandwidth(50.0);
        let upi = LinkHop::new(HopKind::Host, 32).with_bandwidth(40.0);

        let mut fabric = FabricSpec::new();
        match self {
            Self::Workstation | Self::DualXgmi => {
                let cpu = fabric.host("AMD EPYC 7713 64-Core Processor");
                let gpu0 = fabric.accelerator("gfx90a", 0xC300);
                let gpu1 = fabric.accelerator("gfx90a", 0x8300);
                fabric.host_pools(cpu);
                fabric.accelerator_pools(gpu0);
                fabric.accelerator_pools(gpu1);
                fabric.link(cpu, gpu0, vec![pcie(20)]);
                fabric.link(cpu, gpu1, vec![pcie(20)]);
                if self == Self::DualXgmi {
                    fabric.link(gpu0, gpu1, vec![xgmi]);
                } else {
                    fabric.link(gpu0, gpu1, vec![pcie(20), pcie(20)]);
                }
            }
            Self::TwoSocket => {
                let cpu0 = fabric.host("AMD EPYC 9354 32-Core Processor");
                let cpu1 = fabric.host("AMD EPYC 9354 32-Core Processor");
                let gpus: Vec<usize> = [0x0300, 0x2300, 0x8300, 0xA300]
                    .into_iter()
                    .map(|bdf| fabric.accelerator("gfx942", bdf))
                    .collect();
                fabric.host_pools(cpu0);
                fabric.host_pools(cpu1);
                for &gpu in &gpus {
                    fabric.accelerator_pools(gpu);
                }
                fabric.link(cpu0, cpu1, vec![upi]);
                fabric.link(cpu0, gpus[0], vec![pcie(20)]);
                fabric.link(cpu0, gpus[1], vec![pcie(20)]);
                fabric.link(cpu1, gpus[2], vec![pcie(20)]);
                fabric.link(cpu1, gpus[3], vec![pcie(20)]);
                fabric.link(cpu0, gpus[2], vec![upi, pcie(20)]);
                fabric.link(cpu0, gpus[3], vec![upi, pcie(20)]);
                fabric.link(cpu1, gpus[0], vec![upi, pcie(20)]);
                fabric.link(cpu1, gpus[1], vec![upi, pcie(20)]);
                fabric.link(gpus[0], gpus[1], vec![xgmi]);
                fabric.link(gpus[2], gpus[3], vec![xgmi]);
                fabric.link(gpus[1], gpus[2], vec![pcie(20), upi, pcie(20)]);
                fabric.link(gpus[1], gpus[3], vec![pcie(20), upi, pcie(20)]);
                fabric.link(gpus[0], gpus[2], vec![pcie(20), upi, pcie(20)]);
                // gpus[0] and gpus[3] share no path at all.

                // gpus[2] may not reach gpus[1]'s memory, the reverse is fine.
                let gpu1_pools: Vec<usize> = fabric
                    .pools
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| p.agent == gpus[1])
                    .map(|(i, _)| i)
                    .collect();
                for pool in gpu1_pools {
                    fabric.deny(gpus[2], pool);
                }
            }
        }
        fabric
    }
}

impl fmt::Display for FabricPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FabricPreset {
    type Err = BwError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|p| p.name()).collect();
                BwError::invalid_request(format!(
                    "unknown fabric '{s}' (expected one of: {})",
                    names.join(", ")
                ))
            })
    }
}

#[derive(Debug)]
struct Buffer {
    pool: usize,
    data: Vec<u8>,
    granted: HashSet<usize>,
}

#[derive(Debug, Default)]
struct SignalState {
    value: i64,
    timestamps: Option<CopyTimestamps>,
}

#[derive(Debug)]
struct PendingCopy {
    dst: BufferHandle,
    src: BufferHandle,
    size: usize,
    deps: Vec<SignalHandle>,
    completion: SignalHandle,
}

#[derive(Debug, Default)]
struct State {
    buffers: HashMap<BufferHandle, Buffer>,
    signals: HashMap<SignalHandle, SignalState>,
    pending: Vec<PendingCopy>,
    profiling: HashSet<usize>,
    corrupt_pools: HashSet<usize>,
    next_buffer: u64,
    next_signal: u64,
    clock: u64,
    copies_completed: u64,
}

impl State {
    fn buffer(&self, handle: BufferHandle) -> Result<&Buffer> {
        self.buffers
            .get(&handle)
            .ok_or_else(|| BwError::platform("buffer", format!("unknown buffer {handle:?}")))
    }

    fn signal_mut(&mut self, handle: SignalHandle) -> Result<&mut SignalState> {
        self.signals
            .get_mut(&handle)
            .ok_or_else(|| BwError::platform("signal", format!("unknown signal {handle:?}")))
    }

    fn gates_open(&self, copy: &PendingCopy) -> bool {
        copy.deps
            .iter()
            .all(|dep| self.signals.get(dep).map_or(true, |s| s.value <= 0))
    }
}

/// Simulated accelerator runtime
#[derive(Debug)]
pub struct SoftwarePlatform {
    fabric: FabricSpec,
    state: Mutex<State>,
    wake: Condvar,
}

impl SoftwarePlatform {
    /// Create a platform simulating `fabric`
    ///
    /// # Errors
    ///
    /// Returns error if a pool, link or denial names a missing agent or pool.
    pub fn new(fabric: FabricSpec) -> Result<Self> {
        fabric.validate()?;
        info!(
            "SoftwarePlatform: {} agents, {} pools, {} directed links",
            fabric.agents.len(),
            fabric.pools.len(),
            fabric.links.len()
        );
        Ok(Self {
            fabric,
            state: Mutex::new(State::default()),
            wake: Condvar::new(),
        })
    }

    /// Create a platform from a built-in layout
    ///
    /// # Errors
    ///
    /// Returns error if the preset is inconsistent.
    pub fn preset(preset: FabricPreset) -> Result<Self> {
        Self::new(preset.spec())
    }

    /// Flip the first byte of every later copy landing in `pool`
    ///
    /// # Errors
    ///
    /// Returns error if the pool is unknown.
    pub fn corrupt_copies_into(&self, pool: PoolHandle) -> Result<()> {
        let index = self.pool_index(pool)?;
        warn!("SoftwarePlatform: corrupting copies into pool {index}");
        self.lock()?.corrupt_pools.insert(index);
        Ok(())
    }

    /// Buffers not yet freed
    ///
    /// # Errors
    ///
    /// Returns error if the state lock is poisoned.
    pub fn live_buffers(&self) -> Result<usize> {
        Ok(self.lock()?.buffers.len())
    }

    /// Signals not yet destroyed
    ///
    /// # Errors
    ///
    /// Returns error if the state lock is poisoned.
    pub fn live_signals(&self) -> Result<usize> {
        Ok(self.lock()?.signals.len())
    }

    /// Copies executed so far
    ///
    /// # Errors
    ///
    /// Returns error if the state lock is poisoned.
    pub fn copies_completed(&self) -> Result<u64> {
        Ok(self.lock()?.copies_completed)
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| BwError::platform("lock", "software platform state poisoned"))
    }

    fn agent_index(&self, agent: AgentHandle) -> Result<usize> {
        agent
            .raw()
            .checked_sub(AGENT_BASE)
            .and_then(|i| usize::try_from(i).ok())
            .filter(|&i| i < self.fabric.agents.len())
            .ok_or_else(|| BwError::platform("agent", format!("unknown agent {agent:?}")))
    }

    fn pool_index(&self, pool: PoolHandle) -> Result<usize> {
        pool.raw()
            .checked_sub(POOL_BASE)
            .and_then(|i| usize::try_from(i).ok())
            .filter(|&i| i < self.fabric.pools.len())
            .ok_or_else(|| BwError::platform("pool", format!("unknown pool {pool:?}")))
    }

    fn access(&self, agent: usize, pool: usize) -> PoolAccess {
        let spec = &self.fabric.pools[pool];
        if spec.agent == agent {
            PoolAccess::AllowedByDefault
        } else if self.fabric.denied.contains(&(agent, pool))
            || !self.fabric.links.contains_key(&(agent, spec.agent))
        {
            PoolAccess::NeverAllowed
        } else if spec.info.access_to_all {
            PoolAccess::AllowedByDefault
        } else {
            PoolAccess::DisallowedByDefault
        }
    }

    fn can_touch(&self, agent: usize, buffer: &Buffer) -> bool {
        buffer.granted.contains(&agent)
            || self.access(agent, buffer.pool) == PoolAccess::AllowedByDefault
    }

    fn host_visible(&self, buffer: &Buffer) -> bool {
        self.fabric.agents[self.fabric.pools[buffer.pool].agent]
            .class
            .is_host()
    }

    fn owner(&self, buffer: &Buffer) -> usize {
        self.fabric.pools[buffer.pool].agent
    }

    /// Modeled transfer time in device ticks
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn duration_ticks(&self, src_owner: usize, dst_owner: usize, size: usize) -> u64 {
        let gbps = if src_owner == dst_owner {
            self.fabric.agents[src_owner].local_gbps
        } else {
            self.fabric
                .links
                .get(&(src_owner, dst_owner))
                .and_then(|hops| link::bottleneck_gbps(hops))
                .unwrap_or(16.0)
        };
        let ticks = (size as f64 * TIMESTAMP_FREQUENCY_HZ as f64 / (gbps * 1e9)).round() as u64;
        ticks.max(1) + self.fabric.copy_latency_ticks
    }

    /// Run every pending copy whose gates are open, until none are left
    fn drain_ready(&self, state: &mut State) -> Result<()> {
        loop {
            let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.pending)
                .into_iter()
                .partition(|copy| state.gates_open(copy));
            state.pending = waiting;
            if ready.is_empty() {
                return Ok(());
            }

            let start = state.clock;
            let mut latest = start;
            for copy in ready {
                let (src_owner, dst_owner) = {
                    let src = state.buffer(copy.src)?;
                    let dst = state.buffer(copy.dst)?;
                    (self.owner(src), self.owner(dst))
                };
                let end = start + self.duration_ticks(src_owner, dst_owner, copy.size);
                Self::transfer(state, &copy, true)?;

                let signal = state.signal_mut(copy.completion)?;
                signal.value -= 1;
                signal.timestamps = Some(CopyTimestamps { start, end });
                state.copies_completed += 1;
                latest = latest.max(end);
                trace!("copy {} bytes done, ticks {start}..{end}", copy.size);
            }
            state.clock = latest + 1;
            self.wake.notify_all();
        }
    }

    /// Move the bytes of one copy; `device` copies are subject to fault injection
    fn transfer(state: &mut State, copy: &PendingCopy, device: bool) -> Result<()> {
        if copy.src == copy.dst {
            return Ok(());
        }
        let src = state
            .buffers
            .remove(&copy.src)
            .ok_or_else(|| BwError::platform("async_copy", "source freed before copy ran"))?;
        let result = match state.buffers.get_mut(&copy.dst) {
            Some(dst) => {
                dst.data[..copy.size].copy_from_slice(&src.data[..copy.size]);
                if device && copy.size > 0 && state.corrupt_pools.contains(&dst.pool) {
                    dst.data[0] ^= 0xFF;
                }
                Ok(())
            }
            None => Err(BwError::platform(
                "async_copy",
                "destination freed before copy ran",
            )),
        };
        state.buffers.insert(copy.src, src);
        result
    }
}

impl Platform for SoftwarePlatform {
    fn platform_type(&self) -> PlatformType {
        PlatformType::Software
    }

    fn agents(&self) -> Result<Vec<AgentHandle>> {
        Ok((0..self.fabric.agents.len() as u64)
            .map(|i| AgentHandle::new(AGENT_BASE + i))
            .collect())
    }

    fn agent_info(&self, agent: AgentHandle) -> Result<AgentInfo> {
        let spec = &self.fabric.agents[self.agent_index(agent)?];
        Ok(AgentInfo {
            name: spec.name.clone(),
            class: spec.class,
            bdf: spec.bdf.map(Bdf::from_packed),
        })
    }

    fn pools(&self, agent: AgentHandle) -> Result<Vec<PoolHandle>> {
        let index = self.agent_index(agent)?;
        Ok(self
            .fabric
            .pools
            .iter()
            .zip(0u64..)
            .filter(|(p, _)| p.agent == index)
            .map(|(_, i)| PoolHandle::new(POOL_BASE + i))
            .collect())
    }

    fn pool_info(&self, pool: PoolHandle) -> Result<PoolInfo> {
        Ok(self.fabric.pools[self.pool_index(pool)?].info)
    }

    fn pool_access(&self, agent: AgentHandle, pool: PoolHandle) -> Result<PoolAccess> {
        Ok(self.access(self.agent_index(agent)?, self.pool_index(pool)?))
    }

    fn link_hops(&self, agent: AgentHandle, pool: PoolHandle) -> Result<Vec<LinkHop>> {
        let agent = self.agent_index(agent)?;
        let owner = self.fabric.pools[self.pool_index(pool)?].agent;
        Ok(self
            .fabric
            .links
            .get(&(agent, owner))
            .cloned()
            .unwrap_or_default())
    }

    fn allocate(&self, pool: PoolHandle, size: usize) -> Result<BufferHandle> {
        let index = self.pool_index(pool)?;
        let info = self.fabric.pools[index].info;
        if !info.alloc_allowed {
            return Err(BwError::platform("allocate", "pool does not allow allocation"));
        }
        if size > info.size {
            return Err(BwError::platform(
                "allocate",
                format!("{size} bytes exceeds pool limit of {} bytes", info.size),
            ));
        }

        let mut state = self.lock()?;
        state.next_buffer += 1;
        let handle = BufferHandle::new(state.next_buffer);
        state.buffers.insert(
            handle,
            Buffer {
                pool: index,
                data: vec![0; size],
                granted: HashSet::new(),
            },
        );
        debug!("SoftwarePlatform: allocated {size} bytes in pool {index} as {handle:?}");
        Ok(handle)
    }

    fn free(&self, buffer: BufferHandle) -> Result<()> {
        self.lock()?
            .buffers
            .remove(&buffer)
            .map(|_| ())
            .ok_or_else(|| BwError::platform("free", format!("unknown buffer {buffer:?}")))
    }

    fn allow_access(&self, agents: &[AgentHandle], buffer: BufferHandle) -> Result<()> {
        let indices = agents
            .iter()
            .map(|&a| self.agent_index(a))
            .collect::<Result<Vec<_>>>()?;
        let mut state = self.lock()?;
        let pool = state.buffer(buffer)?.pool;
        for &agent in &indices {
            if self.access(agent, pool) == PoolAccess::NeverAllowed {
                return Err(BwError::platform(
                    "allow_access",
                    format!("agent {agent} can never access pool {pool}"),
                ));
            }
        }
        if let Some(buf) = state.buffers.get_mut(&buffer) {
            buf.granted.extend(indices);
        }
        Ok(())
    }

    fn host_write(&self, buffer: BufferHandle, offset: usize, data: &[u8]) -> Result<()> {
        let mut state = self.lock()?;
        let visible = self.host_visible(state.buffer(buffer)?);
        let buf = state
            .buffers
            .get_mut(&buffer)
            .filter(|_| visible)
            .ok_or_else(|| BwError::platform("host_write", "buffer is not host-visible"))?;
        let range = buf
            .data
            .get_mut(offset..offset + data.len())
            .ok_or_else(|| BwError::platform("host_write", "range out of bounds"))?;
        range.copy_from_slice(data);
        Ok(())
    }

    fn host_read(&self, buffer: BufferHandle, offset: usize, out: &mut [u8]) -> Result<()> {
        let state = self.lock()?;
        let buf = state.buffer(buffer)?;
        if !self.host_visible(buf) {
            return Err(BwError::platform("host_read", "buffer is not host-visible"));
        }
        let range = buf
            .data
            .get(offset..offset + out.len())
            .ok_or_else(|| BwError::platform("host_read", "range out of bounds"))?;
        out.copy_from_slice(range);
        Ok(())
    }

    fn host_copy(&self, dst: BufferHandle, src: BufferHandle, size: usize) -> Result<()> {
        let mut state = self.lock()?;
        for handle in [dst, src] {
            let buf = state.buffer(handle)?;
            if !self.host_visible(buf) {
                return Err(BwError::platform("host_copy", "buffer is not host-visible"));
            }
            if buf.data.len() < size {
                return Err(BwError::platform("host_copy", "range out of bounds"));
            }
        }
        let copy = PendingCopy {
            dst,
            src,
            size,
            deps: Vec::new(),
            completion: SignalHandle::new(0),
        };
        Self::transfer(&mut state, &copy, false)
    }

    fn signal_create(&self, initial: i64) -> Result<SignalHandle> {
        let mut state = self.lock()?;
        state.next_signal += 1;
        let handle = SignalHandle::new(state.next_signal);
        state.signals.insert(
            handle,
            SignalState {
                value: initial,
                timestamps: None,
            },
        );
        Ok(handle)
    }

    fn signal_destroy(&self, signal: SignalHandle) -> Result<()> {
        self.lock()?
            .signals
            .remove(&signal)
            .map(|_| ())
            .ok_or_else(|| BwError::platform("signal_destroy", format!("unknown signal {signal:?}")))
    }

    fn signal_store(&self, signal: SignalHandle, value: i64) -> Result<()> {
        let mut state = self.lock()?;
        state.signal_mut(signal)?.value = value;
        self.drain_ready(&mut state)?;
        self.wake.notify_all();
        Ok(())
    }

    fn signal_load(&self, signal: SignalHandle) -> Result<i64> {
        Ok(self.lock()?.signal_mut(signal)?.value)
    }

    fn signal_wait_blocking(&self, signal: SignalHandle, below: i64) -> Result<i64> {
        let mut state = self.lock()?;
        loop {
            let value = state.signal_mut(signal)?.value;
            if value < below {
                return Ok(value);
            }
            state = self
                .wake
                .wait(state)
                .map_err(|_| BwError::platform("signal_wait_blocking", "state lock poisoned"))?;
        }
    }

    fn async_copy(&self, request: &CopyRequest<'_>) -> Result<()> {
        let src_agent = self.agent_index(request.src_agent)?;
        let dst_agent = self.agent_index(request.dst_agent)?;
        let mut state = self.lock()?;
        let src = state.buffer(request.src)?;
        let dst = state.buffer(request.dst)?;
        if request.size > src.data.len() || request.size > dst.data.len() {
            return Err(BwError::platform(
                "async_copy",
                format!("copy of {} bytes overruns a buffer", request.size),
            ));
        }

        let engines: Vec<usize> = [src_agent, dst_agent]
            .into_iter()
            .filter(|&a| self.fabric.agents[a].class.is_accelerator())
            .collect();
        let allowed = if engines.is_empty() {
            self.host_visible(src) && self.host_visible(dst)
        } else {
            engines
                .iter()
                .any(|&a| self.can_touch(a, src) && self.can_touch(a, dst))
        };
        if !allowed {
            return Err(BwError::access_denied(format!(
                "no copy engine may access both pool {} and pool {}",
                src.pool, dst.pool
            )));
        }

        state.signal_mut(request.completion)?;
        state.pending.push(PendingCopy {
            dst: request.dst,
            src: request.src,
            size: request.size,
            deps: request.deps.to_vec(),
            completion: request.completion,
        });
        self.drain_ready(&mut state)
    }

    fn supports_copy_profiling(&self) -> bool {
        true
    }

    fn set_copy_profiling(&self, agent: AgentHandle, enabled: bool) -> Result<()> {
        let index = self.agent_index(agent)?;
        let mut state = self.lock()?;
        if enabled {
            state.profiling.insert(index);
        } else {
            state.profiling.remove(&index);
        }
        Ok(())
    }

    fn copy_timestamps(&self, agent: AgentHandle, signal: SignalHandle) -> Result<CopyTimestamps> {
        let index = self.agent_index(agent)?;
        let mut state = self.lock()?;
        if !state.profiling.contains(&index) {
            return Err(BwError::platform(
                "copy_timestamps",
                format!("copy profiling not enabled on agent {index}"),
            ));
        }
        state.signal_mut(signal)?.timestamps.ok_or_else(|| {
            BwError::platform("copy_timestamps", "no copy has completed on this signal")
        })
    }

    fn timestamp_frequency(&self) -> Result<u64> {
        Ok(TIMESTAMP_FREQUENCY_HZ)
    }

    fn shutdown(&self) -> Result<()> {
        let mut state = self.lock()?;
        if !state.buffers.is_empty() || !state.signals.is_empty() || !state.pending.is_empty() {
            warn!(
                "SoftwarePlatform: shutdown with {} buffers, {} signals, {} pending copies",
                state.buffers.len(),
                state.signals.len(),
                state.pending.len()
            );
        }
        *state = State::default();
        info!("SoftwarePlatform: shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workstation() -> SoftwarePlatform {
        SoftwarePlatform::preset(FabricPreset::Workstation).unwrap()
    }

    fn first_pool(p: &SoftwarePlatform, agent: AgentHandle) -> PoolHandle {
        p.pools(agent).unwrap()[0]
    }

    #[test]
    fn presets_parse_by_name() {
        for preset in FabricPreset::ALL {
            assert_eq!(preset.name().parse::<FabricPreset>().unwrap(), preset);
            SoftwarePlatform::preset(preset).unwrap();
        }
        assert!("cluster".parse::<FabricPreset>().is_err());
    }

    #[test]
    fn enumerates_agents_and_pools() {
        let p = workstation();
        let agents = p.agents().unwrap();
        assert_eq!(agents.len(), 3);
        let cpu = p.agent_info(agents[0]).unwrap();
        assert!(cpu.class.is_host());
        assert!(cpu.bdf.is_none());
        let gpu = p.agent_info(agents[1]).unwrap();
        assert_eq!(gpu.bdf.unwrap().to_string(), "c3:00.0");
        assert_eq!(p.pools(agents[1]).unwrap().len(), 2);
        let host_pool = p.pool_info(first_pool(&p, agents[0])).unwrap();
        assert!(host_pool.kernarg && host_pool.fine_grained);
    }

    #[test]
    fn missing_link_means_never_allowed() {
        let p = SoftwarePlatform::preset(FabricPreset::TwoSocket).unwrap();
        let agents = p.agents().unwrap();
        let (gpu0, gpu3) = (agents[2], agents[5]);
        let access = p.pool_access(gpu0, first_pool(&p, gpu3)).unwrap();
        assert_eq!(access, PoolAccess::NeverAllowed);
        assert!(p.link_hops(gpu0, first_pool(&p, gpu3)).unwrap().is_empty());
    }

    #[test]
    fn gated_copies_share_a_start_tick() {
        let p = workstation();
        let agents = p.agents().unwrap();
        let (cpu, gpu) = (agents[0], agents[1]);
        let host = p.allocate(first_pool(&p, cpu), 4096).unwrap();
        let dev = p.allocate(first_pool(&p, gpu), 4096).unwrap();
        p.allow_access(&[gpu], host).unwrap();
        p.set_copy_profiling(gpu, true).unwrap();

        let gate = p.signal_create(1).unwrap();
        let fwd = p.signal_create(1).unwrap();
        let rev = p.signal_create(1).unwrap();
        let deps = [gate];
        p.async_copy(&CopyRequest {
            dst: dev,
            dst_agent: gpu,
            src: host,
            src_agent: cpu,
            size: 4096,
            deps: &deps,
            completion: fwd,
        })
        .unwrap();
        p.async_copy(&CopyRequest {
            dst: host,
            dst_agent: cpu,
            src: dev,
            src_agent: gpu,
            size: 4096,
            deps: &deps,
            completion: rev,
        })
        .unwrap();
        assert_eq!(p.signal_load(fwd).unwrap(), 1, "gate must hold the copy");

        p.signal_store(gate, 0).unwrap();
        assert_eq!(p.signal_wait_blocking(fwd, 1).unwrap(), 0);
        assert_eq!(p.signal_load(rev).unwrap(), 0);
        let a = p.copy_timestamps(gpu, fwd).unwrap();
        let b = p.copy_timestamps(gpu, rev).unwrap();
        assert_eq!(a.start, b.start);
        assert!(a.ticks() > DEFAULT_COPY_LATENCY_TICKS);
    }

    #[test]
    fn copy_without_grant_is_denied() {
        let p = workstation();
        let agents = p.agents().unwrap();
        let (cpu, gpu) = (agents[0], agents[1]);
        let host = p.allocate(first_pool(&p, cpu), 64).unwrap();
        let dev = p.allocate(first_pool(&p, gpu), 64).unwrap();
        let done = p.signal_create(1).unwrap();
        let err = p
            .async_copy(&CopyRequest {
                dst: dev,
                dst_agent: gpu,
                src: host,
                src_agent: cpu,
                size: 64,
                deps: &[],
                completion: done,
            })
            .unwrap_err();
        assert!(matches!(err, BwError::AccessDenied { .. }));
    }

    #[test]
    fn copies_move_bytes_and_corruption_flips_first_byte() {
        let p = workstation();
        let agents = p.agents().unwrap();
        let (cpu, gpu) = (agents[0], agents[1]);
        let host = p.allocate(first_pool(&p, cpu), 8).unwrap();
        let back = p.allocate(first_pool(&p, cpu), 8).unwrap();
        let dev = p.allocate(first_pool(&p, gpu), 8).unwrap();
        p.allow_access(&[gpu], host).unwrap();
        p.allow_access(&[gpu], back).unwrap();
        p.host_write(host, 0, &[7; 8]).unwrap();
        assert!(p.host_write(dev, 0, &[0; 8]).is_err());

        let done = p.signal_create(2).unwrap();
        let copy = |dst, dst_agent, src, src_agent| CopyRequest {
            dst,
            dst_agent,
            src,
            src_agent,
            size: 8,
            deps: &[],
            completion: done,
        };
        p.async_copy(&copy(dev, gpu, host, cpu)).unwrap();
        p.corrupt_copies_into(first_pool(&p, cpu)).unwrap();
        p.async_copy(&copy(back, cpu, dev, gpu)).unwrap();
        assert_eq!(p.signal_load(done).unwrap(), 0);

        let mut out = [0u8; 8];
        p.host_read(back, 0, &mut out).unwrap();
        assert_eq!(out, [7 ^ 0xFF, 7, 7, 7, 7, 7, 7, 7]);
        assert_eq!(p.copies_completed().unwrap(), 2);
    }

    #[test]
    fn shutdown_clears_state() {
        let p = workstation();
        let agents = p.agents().unwrap();
        p.allocate(first_pool(&p, agents[0]), 16).unwrap();
        p.signal_create(0).unwrap();
        p.shutdown().unwrap();
        assert_eq!(p.live_buffers().unwrap(), 0);
        assert_eq!(p.live_signals().unwrap(), 0);
    }
}
