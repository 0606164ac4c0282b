//! Reachability and link matrices
//!
//! Both matrices are indexed by agent, not pool, and are judged against each
//! agent's representative (first) pool. They are built once after discovery
//! and only read afterwards.

use crate::catalog::Catalog;
use crate::error::{BwError, Result};
use crate::matrix::Matrix;
use crate::platform::Platform;
use bwprobe_model::link::{self, LinkType, NO_PATH};
use std::fmt;

/// Access class of an agent pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessClass {
    /// Neither agent can reach the other's pool
    NoAccess,
    /// Exactly one direction is permitted
    Unidirectional,
    /// Both directions are permitted
    Bidirectional,
}

impl AccessClass {
    /// Class from the two directed permissions
    pub const fn from_directions(forward: bool, backward: bool) -> Self {
        match (forward, backward) {
            (true, true) => Self::Bidirectional,
            (false, false) => Self::NoAccess,
            _ => Self::Unidirectional,
        }
    }

    /// `true` unless no direction is permitted
    pub const fn has_path(self) -> bool {
        !matches!(self, Self::NoAccess)
    }

    /// Numeric code for matrix printouts
    pub const fn code(self) -> u8 {
        match self {
            Self::NoAccess => 0,
            Self::Unidirectional => 1,
            Self::Bidirectional => 2,
        }
    }
}

impl fmt::Display for AccessClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Agent × agent access matrix
#[derive(Debug, Clone)]
pub struct Reachability {
    direct: Matrix<bool>,
    classes: Matrix<AccessClass>,
}

impl Reachability {
    /// Query `pool_access` for every ordered agent pair
    ///
    /// Agent `i` reaches agent `j` if access to `j`'s first pool is anything
    /// but never-allowed. An agent without pools is reachable by nobody.
    ///
    /// # Errors
    ///
    /// Returns error if a platform query fails.
    pub fn build(platform: &dyn Platform, catalog: &Catalog) -> Result<Self> {
        let n = catalog.agent_count();
        let direct = Matrix::try_from_fn(n, |i, j| {
            if i == j {
                return Ok(true);
            }
            let Some(pool) = catalog.representative_pool(j) else {
                return Ok(false);
            };
            let agent = catalog.agent(i)?;
            Ok(platform.pool_access(agent.handle, pool.handle)?.is_possible())
        })?;

        let classes = Matrix::try_from_fn(n, |i, j| {
            let forward = direct.get(i, j).copied().unwrap_or(false);
            let backward = direct.get(j, i).copied().unwrap_or(false);
            Ok(AccessClass::from_directions(forward, backward))
        })?;

        tracing::debug!("Access matrix built for {n} agent(s)");
        Ok(Self { direct, classes })
    }

    /// Number of agents covered
    pub const fn size(&self) -> usize {
        self.classes.size()
    }

    /// Access class of the pair `(i, j)`
    ///
    /// # Errors
    ///
    /// Returns `UnknownAgent` if either index is out of range.
    pub fn class(&self, i: usize, j: usize) -> Result<AccessClass> {
        self.classes.get(i, j).copied().ok_or(BwError::UnknownAgent {
            index: i.max(j),
            count: self.size(),
        })
    }

    /// `true` if agent `i` may access agent `j`'s pool
    ///
    /// # Errors
    ///
    /// Returns `UnknownAgent` if either index is out of range.
    pub fn can_access(&self, i: usize, j: usize) -> Result<bool> {
        self.direct.get(i, j).copied().ok_or(BwError::UnknownAgent {
            index: i.max(j),
            count: self.size(),
        })
    }

    /// Whole class matrix
    pub const fn classes(&self) -> &Matrix<AccessClass> {
        &self.classes
    }
}

/// Hop count, link type and distance weight of one ordered agent pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkInfo {
    /// Number of hops, [`NO_PATH`] if unreachable
    pub hops: u32,
    /// Classified link type
    pub link_type: LinkType,
    /// Summed NUMA distance, [`NO_PATH`] if unreachable
    pub weight: u32,
}

impl LinkInfo {
    const SELF: Self = Self {
        hops: 0,
        link_type: LinkType::SelfLink,
        weight: 0,
    };

    const NONE: Self = Self {
        hops: NO_PATH,
        link_type: LinkType::NoPath,
        weight: NO_PATH,
    };
}

/// Agent × agent link properties
///
/// Link types are best effort: the platform collapses multi-hop paths, so
/// any path longer than one hop is reported as [`LinkType::Ignored`] while
/// its weight still sums every hop.
#[derive(Debug, Clone)]
pub struct LinkProps {
    links: Matrix<LinkInfo>,
}

impl LinkProps {
    /// Query `link_hops` for every ordered agent pair
    ///
    /// # Errors
    ///
    /// Returns error if a platform query fails.
    pub fn build(platform: &dyn Platform, catalog: &Catalog) -> Result<Self> {
        let links = Matrix::try_from_fn(catalog.agent_count(), |i, j| {
            if i == j {
                return Ok(LinkInfo::SELF);
            }
            let Some(pool) = catalog.representative_pool(j) else {
                return Ok(LinkInfo::NONE);
            };
            let src = catalog.agent(i)?;
            let hops = platform.link_hops(src.handle, pool.handle)?;
            if hops.is_empty() {
                return Ok(LinkInfo::NONE);
            }
            Ok(LinkInfo {
                hops: u32::try_from(hops.len()).unwrap_or(NO_PATH),
                link_type: link::classify(src.class, pool.class, &hops),
                weight: link::weight(&hops),
            })
        })?;
        tracing::debug!("Link matrix built for {} agent(s)", links.size());
        Ok(Self { links })
    }

    /// Link properties of the pair `(i, j)`
    ///
    /// # Errors
    ///
    /// Returns `UnknownAgent` if either index is out of range.
    pub fn get(&self, i: usize, j: usize) -> Result<LinkInfo> {
        self.links.get(i, j).copied().ok_or(BwError::UnknownAgent {
            index: i.max(j),
            count: self.links.size(),
        })
    }

    /// Whole matrix
    pub const fn matrix(&self) -> &Matrix<LinkInfo> {
        &self.links
    }
}

/// Both matrices, built together after discovery
#[derive(Debug, Clone)]
pub struct Topology {
    /// Access classes
    pub reachability: Reachability,
    /// Hops, types and weights
    pub links: LinkProps,
}

impl Topology {
    /// Build both matrices
    ///
    /// # Errors
    ///
    /// Returns error if a platform query fails.
    pub fn build(platform: &dyn Platform, catalog: &Catalog) -> Result<Self> {
        Ok(Self {
            reachability: Reachability::build(platform, catalog)?,
            links: LinkProps::build(platform, catalog)?,
        })
    }
}
