//! Minimal command-line front end over the `nvc` coordinator.
//!
//! The device-selection grammar and the full per-library flag surface
//! are a caller's job, not the coordinator's. This binary is that
//! caller: it parses just enough of both to drive `mount` and
//! `ldcache-update` end to end, then hands pre-built `Selection` and
//! `ContainerConfig` values to `nvc`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nvc::select::GpuRef;
use nvc_container::ContainerConfig;
use nvc_core::{DriverOptions, LibraryConfig, LibraryOptions};
use nvc_driver_helper::DriverHelperClient;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "nvc-cli")]
#[command(about = "GPU container injection runtime CLI", long_about = None)]
struct Cli {
    /// Host driver root.
    #[arg(long, default_value = "/", global = true)]
    root: PathBuf,
    /// Path to the glibc ld.so cache.
    #[arg(long, default_value = "/etc/ld.so.cache", global = true)]
    ldcache: PathBuf,
    /// Path to the /proc mount used to resolve the target container.
    #[arg(long, default_value = "/proc", global = true)]
    proc_root: PathBuf,
    /// Unprivileged uid/gid the driver helper drops to.
    #[arg(long, default_value_t = 65534, global = true)]
    uid: u32,
    #[arg(long, default_value_t = 65534, global = true)]
    gid: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mount the driver, selected devices, and IMEX channels into a container.
    Mount {
        /// Target container's pid, as seen from this process's pid namespace.
        #[arg(long)]
        pid: i32,
        /// Target container's rootfs, as seen from this process.
        #[arg(long)]
        rootfs: PathBuf,
        /// Container flag string (space-separated, e.g. "utility compute no-cgroups").
        #[arg(long)]
        container_opts: Option<String>,
        /// GPU reference: an index, a "GPU-<uuid>" string, or "all". Repeatable.
        #[arg(long = "gpu", required = true)]
        gpus: Vec<String>,
        /// IMEX channel ids to mount. Repeatable.
        #[arg(long = "imex-channel")]
        imex_channels: Vec<u32>,
        /// Use mount(MS_MOVE) instead of pivot_root for the ldconfig child.
        #[arg(long)]
        no_pivot: bool,
        /// Skip GSP firmware discovery.
        #[arg(long)]
        no_gsp_firmware: bool,
    },
    /// Refresh a container's /etc/ld.so.cache.
    LdcacheUpdate {
        #[arg(long)]
        pid: i32,
        #[arg(long)]
        rootfs: PathBuf,
        #[arg(long)]
        container_opts: Option<String>,
        #[arg(long)]
        no_pivot: bool,
    },
}

fn parse_gpu_ref(s: &str) -> GpuRef {
    if s.eq_ignore_ascii_case("all") {
        GpuRef::All
    } else if let Ok(index) = s.parse::<usize>() {
        GpuRef::Index(index)
    } else {
        GpuRef::Uuid(s.to_string())
    }
}

fn library_config(cli: &Cli, no_pivot: bool) -> LibraryConfig {
    LibraryConfig {
        root: cli.root.clone(),
        ldcache: cli.ldcache.clone(),
        uid: cli.uid,
        gid: cli.gid,
        options: LibraryOptions::empty(),
        imex_channels: Vec::new(),
        no_pivot,
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Mount {
            pid,
            rootfs,
            container_opts,
            gpus,
            imex_channels,
            no_pivot,
            no_gsp_firmware,
        } => {
            let mut driver_opts = DriverOptions::empty();
            if *no_gsp_firmware {
                driver_opts |= DriverOptions::NO_GSP_FIRMWARE;
            }

            let mut config = library_config(&cli, *no_pivot);
            config.imex_channels = imex_channels.clone();
            let ctx = nvc::init(config).context("initializing nvc context")?;

            let chroot = if cli.root == PathBuf::from("/") { None } else { Some(cli.root.clone()) };
            let mut helper = DriverHelperClient::spawn(chroot, cli.uid, cli.gid).context("spawning driver helper")?;
            let (driver_info, device_info) = nvc::info::build(&ctx, &mut helper, driver_opts).context("assembling driver/device inventory")?;

            let refs: Vec<GpuRef> = gpus.iter().map(|s| parse_gpu_ref(s)).collect();
            let selection = nvc::select::select(&device_info, &refs).context("resolving gpu selection")?;

            let container_cfg = ContainerConfig::new(*pid, rootfs.clone());
            let container = nvc::container::describe(&cli.proc_root, container_cfg, container_opts.as_deref())
                .context("describing target container")?;

            nvc::mount::mount_driver(&ctx, &container, &driver_info, &device_info, &selection).context("mounting driver into container")?;

            nvc::shutdown(ctx).context("shutting down nvc context")?;
            Ok(())
        }
        Commands::LdcacheUpdate { pid, rootfs, container_opts, no_pivot } => {
            let config = library_config(&cli, *no_pivot);
            let ctx = nvc::init(config).context("initializing nvc context")?;

            let container_cfg = ContainerConfig::new(*pid, rootfs.clone());
            let container = nvc::container::describe(&cli.proc_root, container_cfg, container_opts.as_deref())
                .context("describing target container")?;

            nvc::ldcache::update(&ctx, &container).context("refreshing ld.so cache")?;
            nvc::shutdown(ctx).context("shutting down nvc context")?;
            Ok(())
        }
    }
}
