use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use vmdeck::{
    BootDevice, DiskFormat, DiskSpec, Graphics, NetworkSpec, Session, Settings, VmAction,
    VmDescriptor, VmFilter, DEFAULT_URI,
};

/// Manage virtual machines through a libvirt daemon.
#[derive(Parser)]
#[command(name = "vmdeck", version)]
struct Cli {
    /// Hypervisor connection URI (e.g. qemu:///system, qemu+ssh://host/system)
    #[arg(short = 'c', long, global = true)]
    connect: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List domains (active ones by default)
    List {
        /// Only domains that are not running
        #[arg(long, conflicts_with = "all")]
        inactive: bool,
        /// Both active and inactive domains
        #[arg(long)]
        all: bool,
    },

    /// Show a domain's details
    Info {
        name: String,
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Boot a stopped domain
    Start { name: String },

    /// Ask the guest OS to shut down (does not wait for completion)
    Stop { name: String },

    /// Force a domain off immediately; unsaved guest state is lost
    Destroy { name: String },

    /// Pause a running domain
    Suspend { name: String },

    /// Unpause a suspended domain
    Resume { name: String },

    /// Remove a stopped domain's definition from the daemon
    Delete { name: String },

    /// Register a new domain without starting it
    Define(DefineOpts),

    /// Read or write persisted settings
    Config {
        #[command(subcommand)]
        op: ConfigOp,
    },
}

#[derive(Args)]
struct DefineOpts {
    /// Domain name, unique per daemon
    #[arg(long)]
    name: String,

    #[arg(long, default_value_t = 1)]
    vcpus: u32,

    /// Memory in MiB
    #[arg(long, default_value_t = 1024)]
    memory: u64,

    /// Existing disk image path; repeatable, first one is the boot disk
    #[arg(long = "disk", required = true)]
    disks: Vec<String>,

    /// Treat disk images as raw instead of qcow2
    #[arg(long)]
    raw: bool,

    /// libvirt network to attach; repeatable, defaults to 'default'
    #[arg(long = "network")]
    networks: Vec<String>,

    #[arg(long, value_enum, default_value_t = BootArg::Hd)]
    boot: BootArg,

    #[arg(long, value_enum, default_value_t = GraphicsArg::Spice)]
    graphics: GraphicsArg,
}

#[derive(Subcommand)]
enum ConfigOp {
    /// Print one setting
    Get { key: String },
    /// Store one setting
    Set { key: String, value: String },
    /// Remove one setting
    Unset { key: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum BootArg {
    Hd,
    Cdrom,
    Network,
}

impl From<BootArg> for BootDevice {
    fn from(arg: BootArg) -> Self {
        match arg {
            BootArg::Hd => BootDevice::Hd,
            BootArg::Cdrom => BootDevice::Cdrom,
            BootArg::Network => BootDevice::Network,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum GraphicsArg {
    Spice,
    Vnc,
}

impl From<GraphicsArg> for Graphics {
    fn from(arg: GraphicsArg) -> Self {
        match arg {
            GraphicsArg::Spice => Graphics::Spice,
            GraphicsArg::Vnc => Graphics::Vnc,
        }
    }
}

fn install_tracing() {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let fmt_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}

fn settings_path() -> Result<std::path::PathBuf> {
    let base = dirs::config_dir().context("no user configuration directory")?;
    Ok(base.join("vmdeck").join("settings.json"))
}

fn main() -> Result<()> {
    install_tracing();
    let cli = Cli::parse();
    let mut settings = Settings::load(settings_path()?);

    let command = match cli.command {
        Command::Config { op } => {
            match op {
                ConfigOp::Get { key } => match settings.get(&key) {
                    Some(value) => println!("{value}"),
                    None => anyhow::bail!("no setting '{key}'"),
                },
                ConfigOp::Set { key, value } => settings.set(&key, &value)?,
                ConfigOp::Unset { key } => settings.unset(&key)?,
            }
            return Ok(());
        }
        other => other,
    };

    let uri = cli
        .connect
        .as_deref()
        .or_else(|| settings.get("uri"))
        .unwrap_or(DEFAULT_URI)
        .to_string();

    let mut session: Session = Session::new(&uri);
    session.connect()?;

    match command {
        Command::List { inactive, all } => {
            let filter = if all {
                VmFilter::All
            } else if inactive {
                VmFilter::Inactive
            } else {
                VmFilter::Active
            };
            for vm in session.list(filter) {
                println!("{:<24} {}", vm.name, vm.state);
            }
        }

        Command::Info { name, json } => {
            let detail = session
                .describe(&name)
                .with_context(|| format!("no details for domain '{name}'"))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&detail)?);
            } else {
                println!("name:       {}", detail.name);
                println!("uuid:       {}", detail.uuid);
                match detail.id {
                    Some(id) => println!("id:         {id}"),
                    None => println!("id:         -"),
                }
                println!("state:      {}", detail.state);
                println!("vcpus:      {}", detail.vcpus);
                println!("memory:     {} KiB", detail.memory_kib);
                println!("max memory: {} KiB", detail.max_memory_kib);
                println!("os type:    {}", detail.os_type);
                println!("autostart:  {}", detail.autostart);
            }
        }

        Command::Start { name } => act(&mut session, &name, VmAction::Start)?,
        Command::Stop { name } => act(&mut session, &name, VmAction::Stop)?,
        Command::Destroy { name } => act(&mut session, &name, VmAction::Destroy)?,
        Command::Suspend { name } => act(&mut session, &name, VmAction::Suspend)?,
        Command::Resume { name } => act(&mut session, &name, VmAction::Resume)?,
        Command::Delete { name } => act(&mut session, &name, VmAction::Delete)?,

        Command::Define(opts) => {
            let format = if opts.raw {
                DiskFormat::Raw
            } else {
                DiskFormat::Qcow2
            };
            let (primary, rest) = opts
                .disks
                .split_first()
                .context("at least one --disk is required")?;
            let primary = DiskSpec::new(primary.clone(), format);

            let mut descriptor =
                VmDescriptor::new(&opts.name, opts.vcpus, opts.memory * 1024, primary)
                    .boot_from(opts.boot.into())
                    .with_graphics(opts.graphics.into());
            for disk in rest {
                descriptor = descriptor.with_disk(DiskSpec::new(disk.clone(), format));
            }
            for network in &opts.networks {
                descriptor = descriptor.with_network(NetworkSpec::new(network.clone()));
            }

            let summary = session.define(&descriptor)?;
            println!("defined '{}' ({})", summary.name, summary.state);
        }

        Command::Config { .. } => unreachable!("handled before connecting"),
    }

    session.disconnect();
    Ok(())
}

fn act(session: &mut Session, name: &str, action: VmAction) -> Result<()> {
    session.perform(name, action)?;
    println!("{action} requested for '{name}'");
    Ok(())
}
