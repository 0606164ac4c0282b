//! Agent and pool discovery
//!
//! Enumerates the platform's agents and their eligible memory pools once,
//! at startup, and freezes the result into an immutable [`Catalog`].
//! Indices are assigned in enumeration order and are opaque to callers:
//! the order is whatever the platform reports.

use crate::config::RunConfig;
use crate::error::{BwError, Result};
use crate::platform::{
    AgentHandle, AgentInfo, Platform, PoolAccess, PoolHandle, PoolInfo, Segment,
};
use bwprobe_model::pcie::Bdf;
use bwprobe_model::DeviceClass;

/// A compute agent
#[derive(Debug, Clone)]
pub struct Agent {
    /// Catalog index
    pub index: usize,

    /// Runtime handle
    pub handle: AgentHandle,

    /// Host or accelerator
    pub class: DeviceClass,

    /// Runtime name
    pub name: String,

    /// PCIe location (accelerators)
    pub bdf: Option<Bdf>,

    /// Indices of the eligible pools this agent owns
    pub pools: Vec<usize>,
}

/// An eligible memory pool
#[derive(Debug, Clone)]
pub struct Pool {
    /// Catalog index
    pub index: usize,

    /// Runtime handle
    pub handle: PoolHandle,

    /// Owning agent index
    pub agent: usize,

    /// Owning agent handle
    pub agent_handle: AgentHandle,

    /// Owning agent class
    pub class: DeviceClass,

    /// Fine-grained rather than coarse-grained
    pub fine_grained: bool,

    /// Maximum allocatable size
    pub size: usize,

    /// Every agent may access allocations by default
    pub access_to_all: bool,

    /// Usable for kernel arguments
    pub kernarg: bool,

    /// Access mode of the owning agent
    pub owner_access: PoolAccess,
}

/// Host-visible pool used to stage initialization and validation data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingPool {
    /// Runtime handle of the pool
    pub pool: PoolHandle,

    /// Agent owning the pool
    pub agent: AgentHandle,
}

/// Accumulates agents and pools during enumeration
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    agents: Vec<Agent>,
    pools: Vec<Pool>,
    staging: Option<StagingPool>,
}

impl CatalogBuilder {
    /// Empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an agent, returning its index
    pub fn add_agent(&mut self, handle: AgentHandle, info: AgentInfo) -> usize {
        let index = self.agents.len();
        self.agents.push(Agent {
            index,
            handle,
            class: info.class,
            name: info.name,
            bdf: info.bdf,
            pools: Vec::new(),
        });
        index
    }

    /// Record an eligible pool of agent `agent`, returning its index
    ///
    /// # Errors
    ///
    /// Returns `UnknownAgent` if the agent has not been added.
    pub fn add_pool(
        &mut self,
        agent: usize,
        handle: PoolHandle,
        info: &PoolInfo,
        owner_access: PoolAccess,
    ) -> Result<usize> {
        let count = self.agents.len();
        let owner = self
            .agents
            .get_mut(agent)
            .ok_or(BwError::UnknownAgent { index: agent, count })?;
        let index = self.pools.len();
        owner.pools.push(index);
        self.pools.push(Pool {
            index,
            handle,
            agent,
            agent_handle: owner.handle,
            class: owner.class,
            fine_grained: info.fine_grained,
            size: info.size,
            access_to_all: info.access_to_all,
            kernarg: info.kernarg,
            owner_access,
        });
        Ok(index)
    }

    /// Record the staging pool unless one is already set
    pub fn offer_staging(&mut self, staging: StagingPool) {
        self.staging.get_or_insert(staging);
    }

    /// Freeze into an immutable catalog
    pub fn finish(self) -> Catalog {
        Catalog {
            agents: self.agents,
            pools: self.pools,
            staging: self.staging,
        }
    }
}

/// Immutable snapshot of discovered agents and pools
#[derive(Debug, Clone)]
pub struct Catalog {
    agents: Vec<Agent>,
    pools: Vec<Pool>,
    staging: Option<StagingPool>,
}

impl Catalog {
    /// Enumerate every agent and its eligible pools
    ///
    /// A pool is eligible if it lives in the global segment and allows
    /// runtime allocation. Per device class only one grain is kept: hosts
    /// keep fine-grained and accelerators keep coarse-grained pools, each
    /// reversible through [`RunConfig`]. The first kernel-argument pool seen
    /// becomes the staging pool, even if its grain is filtered out.
    ///
    /// # Errors
    ///
    /// Returns error if any platform query fails.
    pub fn discover(platform: &dyn Platform, config: &RunConfig) -> Result<Self> {
        tracing::info!("Discovering agents on {}...", platform.platform_type());

        let mut builder = CatalogBuilder::new();
        for handle in platform.agents()? {
            let info = platform.agent_info(handle)?;
            let class = info.class;
            let agent = builder.add_agent(handle, info);

            for pool in platform.pools(handle)? {
                let props = platform.pool_info(pool)?;
                if props.segment != Segment::Global {
                    continue;
                }
                if props.kernarg {
                    builder.offer_staging(StagingPool {
                        pool,
                        agent: handle,
                    });
                }
                if !props.alloc_allowed {
                    continue;
                }
                let keep_fine = match class {
                    DeviceClass::Host => !config.host_keep_coarse,
                    DeviceClass::Accelerator => config.accel_keep_fine,
                };
                if props.fine_grained != keep_fine {
                    tracing::debug!("Agent {agent}: skipping pool {pool:?} (grain filtered)");
                    continue;
                }
                let owner_access = platform.pool_access(handle, pool)?;
                let index = builder.add_pool(agent, pool, &props, owner_access)?;
                tracing::debug!(
                    "Agent {agent}: pool {index} ({}, {} bytes)",
                    if props.fine_grained { "fine" } else { "coarse" },
                    props.size
                );
            }
        }

        let catalog = builder.finish();
        tracing::info!(
            "Discovered {} agent(s), {} pool(s)",
            catalog.agent_count(),
            catalog.pool_count()
        );
        if catalog.staging.is_none() {
            tracing::warn!("No kernel-argument pool found; initialization will fail");
        }
        Ok(catalog)
    }

    /// Number of agents
    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Number of eligible pools
    #[must_use]
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// All agents in index order
    #[must_use]
    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    /// All pools in index order
    #[must_use]
    pub fn pools(&self) -> &[Pool] {
        &self.pools
    }

    /// Agent by index
    ///
    /// # Errors
    ///
    /// Returns `UnknownAgent` if the index is out of range.
    pub fn agent(&self, index: usize) -> Result<&Agent> {
        self.agents.get(index).ok_or(BwError::UnknownAgent {
            index,
            count: self.agents.len(),
        })
    }

    /// Pool by index
    ///
    /// # Errors
    ///
    /// Returns `UnknownPool` if the index is out of range.
    pub fn pool(&self, index: usize) -> Result<&Pool> {
        self.pools.get(index).ok_or(BwError::UnknownPool {
            index,
            count: self.pools.len(),
        })
    }

    /// First pool of an agent, the one reachability is judged against
    #[must_use]
    pub fn representative_pool(&self, agent: usize) -> Option<&Pool> {
        self.agents
            .get(agent)
            .and_then(|a| a.pools.first())
            .and_then(|&p| self.pools.get(p))
    }

    /// Host staging pool
    ///
    /// # Errors
    ///
    /// Returns `NoStagingPool` if discovery found none.
    pub fn staging(&self) -> Result<StagingPool> {
        self.staging.ok_or(BwError::NoStagingPool)
    }
}
