//! Command-line arguments and their translation into requests

use bwprobe_core::{FabricPreset, Request};
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "bwprobe",
    about = "Copy bandwidth and latency between agent memory pools",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Cmd>,

    #[command(flatten)]
    pub options: RunOptions,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Cmd {
    /// Print agents, pools and the access and link matrices.
    Topology,
    /// Print the tool version.
    Version,
    /// Copy every source pool to every destination pool.
    Copy {
        /// Source pool indices (e.g. 0,1).
        #[arg(short, long, value_delimiter = ',', required = true)]
        src: Vec<usize>,
        /// Destination pool indices (e.g. 2,3).
        #[arg(short, long, value_delimiter = ',', required = true)]
        dst: Vec<usize>,
    },
    /// Copy both ways between every pair of the listed pools.
    Bidir {
        /// Pool indices (e.g. 0,1,2).
        #[arg(value_delimiter = ',', required = true)]
        pools: Vec<usize>,
    },
    /// Sweep every reachable pool pair.
    All {
        /// Copy both ways, one transaction per agent pair.
        #[arg(long)]
        bidir: bool,
    },
    /// Run consecutive pool pairs at the same time.
    Concurrent {
        /// Flat list of pool pairs (e.g. 0,1,2,3).
        #[arg(value_delimiter = ',', required = true)]
        pairs: Vec<usize>,
        /// Copy both ways within each pair.
        #[arg(long)]
        bidir: bool,
    },
    /// Kernel read of pools by agents.
    Read {
        /// Flat list of (pool, agent) pairs.
        #[arg(value_delimiter = ',', required = true)]
        pairs: Vec<usize>,
    },
    /// Kernel write of pools by agents.
    Write {
        /// Flat list of (pool, agent) pairs.
        #[arg(value_delimiter = ',', required = true)]
        pairs: Vec<usize>,
    },
}

/// Options shared by every benchmark command
#[derive(Args, Debug, Clone, Default)]
pub struct RunOptions {
    /// Buffer sizes in MiB (e.g. 1,4,64).
    #[arg(short = 'm', long, value_delimiter = ',', global = true)]
    pub size_mb: Vec<usize>,

    /// Base iteration count.
    #[arg(long, global = true)]
    pub iterations: Option<u32>,

    /// Byte-compare every destination after the copy.
    #[arg(short, long, global = true)]
    pub validate: bool,

    /// Sweep small sizes and report latency.
    #[arg(short, long, global = true)]
    pub latency: bool,

    /// Time copies with the host clock only.
    #[arg(short = 'c', long, global = true)]
    pub host_time: bool,

    /// Fill source buffers with this byte (decimal or 0x-prefixed hex).
    #[arg(short, long, value_parser = parse_byte, global = true)]
    pub init: Option<u8>,

    /// Simulated fabric to probe.
    #[arg(long, default_value = "workstation", value_parser = parse_fabric, global = true)]
    pub fabric: FabricPreset,
}

fn parse_byte(raw: &str) -> Result<u8, String> {
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => raw.parse(),
    };
    parsed.map_err(|e| format!("{raw:?} is not a byte value: {e}"))
}

fn parse_fabric(raw: &str) -> Result<FabricPreset, String> {
    raw.parse().map_err(|e: bwprobe_core::BwError| e.to_string())
}

impl RunOptions {
    /// Apply the shared options to `request`
    pub fn apply(&self, mut request: Request) -> Request {
        if !self.size_mb.is_empty() {
            request = request.with_sizes_mb(self.size_mb.clone());
        }
        if let Some(iterations) = self.iterations {
            request = request.with_iterations(iterations);
        }
        if self.validate {
            request = request.validated();
        }
        if self.latency {
            request = request.with_latency();
        }
        if self.host_time {
            request = request.with_host_time();
        }
        if let Some(value) = self.init {
            request = request.with_init_value(value);
        }
        request
    }
}

impl Cmd {
    /// Benchmark request of this command, `None` for informational ones
    pub fn request(&self) -> Option<Request> {
        match self {
            Self::Topology | Self::Version => None,
            Self::Copy { src, dst } => Some(Request::unidirectional(src.clone(), dst.clone())),
            Self::Bidir { pools } => Some(Request::bidirectional(pools.clone())),
            Self::All { bidir } => Some(Request::all_pairs(*bidir)),
            Self::Concurrent { pairs, bidir } => Some(Request::concurrent(pairs.clone(), *bidir)),
            Self::Read { pairs } => Some(Request::read(pairs.clone())),
            Self::Write { pairs } => Some(Request::write(pairs.clone())),
        }
    }
}
