use clap::Parser;

/// Flags mirror the direct-mode surface; running with none of the resource
/// flags on a terminal drops into the interactive selector instead.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "aivm",
    about = "VM Selector - Launch Claude Code VMs",
    after_help = "Run without --ram/--cpu/--storage on a terminal for interactive mode; \
                  supplying any of them switches to direct mode where all three are required."
)]
pub struct Cli {
    /// RAM in GB (required in direct mode)
    #[arg(short, long, value_name = "RAM")]
    pub ram: Option<String>,

    /// CPU cores (required in direct mode)
    #[arg(short, long, value_name = "CPU")]
    pub cpu: Option<String>,

    /// Disk size in GB (required in direct mode)
    #[arg(short, long, value_name = "STORAGE")]
    pub storage: Option<String>,

    /// VM name
    #[arg(short, long, value_name = "NAME")]
    pub name: Option<String>,

    /// Ephemeral overlay: discard writable-layer changes on shutdown
    #[arg(short, long)]
    pub overlay: bool,

    /// Enable audio passthrough
    #[arg(short, long)]
    pub audio: bool,

    /// Enable desktop mode
    #[arg(short, long)]
    pub desktop: bool,

    /// Desktop resolution (WIDTHxHEIGHT; only takes effect with --desktop)
    #[arg(long, value_name = "WxH")]
    pub resolution: Option<String>,

    /// Share a host directory read-write (repeatable)
    #[arg(long, value_name = "PATH")]
    pub share_rw: Vec<String>,

    /// Share a host directory read-only (repeatable)
    #[arg(long, value_name = "PATH")]
    pub share_ro: Vec<String>,

    /// Share ~/.claude (Claude Code credentials) read-only
    #[arg(long)]
    pub share_claude_auth: bool,

    /// Additional port mapping HOST:GUEST (repeatable)
    #[arg(short = 'p', long = "port", value_name = "HOST:GUEST")]
    pub port: Vec<String>,

    /// Host port forwarded to guest SSH
    #[arg(long, value_name = "PORT", default_value = "2222")]
    pub ssh_port: String,

    /// Skip the default development port mappings (3001, 9080)
    #[arg(long)]
    pub no_default_ports: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Any resource flag present selects direct mode.
    pub fn has_resource_flags(&self) -> bool {
        self.ram.is_some() || self.cpu.is_some() || self.storage.is_some()
    }
}
