//! Cloud drive FUSE filesystem for Linux
//!
//! Mounts a remote drive at a local directory. Every filesystem call is
//! answered from short-lived caches or forwarded to the remote drive; file
//! contents are buffered in memory while open for writing.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Arg, ArgAction, Command};
use clouddrive_fuse::config::{Backend, ProjectConfig, Settings};
use clouddrive_fuse::fuse::{BridgeConfig, CloudDriveFuse, DriveBridge};
use clouddrive_fuse::log_appender::setup_logging;
use clouddrive_fuse::remote::graph_client::GraphDriveClient;
use clouddrive_fuse::remote::memory::MemoryDrive;
use clouddrive_fuse::remote::session::TokenSessionProvider;
use clouddrive_fuse::remote::RemoteDriveClient;
use fuser::MountOption;
use log::{error, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn command() -> Command {
    Command::new("clouddrive-fuse")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Mount a cloud drive as a FUSE filesystem")
        .arg(
            Arg::new("mountpoint")
                .short('m')
                .long("mountpoint")
                .value_name("PATH")
                .help("Mount point path")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Settings file path")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("ttl")
                .long("ttl")
                .value_name("SECONDS")
                .help("Seconds a cached path or attribute is trusted")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("read-only")
                .long("read-only")
                .help("Reject every modification")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("backend")
                .long("backend")
                .value_name("BACKEND")
                .help("Remote drive implementation")
                .value_parser(["graph", "memory"]),
        )
        .arg(
            Arg::new("token-file")
                .long("token-file")
                .value_name("FILE")
                .help("File holding the access token")
                .value_parser(clap::value_parser!(PathBuf)),
        )
}

/// Apply command-line flags on top of the settings file
fn apply_overrides(settings: &mut Settings, matches: &clap::ArgMatches) -> Result<()> {
    if let Some(mountpoint) = matches.get_one::<PathBuf>("mountpoint") {
        settings.mountpoint = Some(mountpoint.clone());
    }
    if let Some(ttl) = matches.get_one::<u64>("ttl") {
        settings.cache_ttl_secs = *ttl;
    }
    if matches.get_flag("read-only") {
        settings.read_only = true;
    }
    if let Some(backend) = matches.get_one::<String>("backend") {
        settings.backend = backend.parse()?;
    }
    if let Some(token_file) = matches.get_one::<PathBuf>("token-file") {
        settings.token_file = Some(token_file.clone());
    }
    Ok(())
}

fn build_client(settings: &Settings) -> Arc<dyn RemoteDriveClient> {
    match settings.backend {
        Backend::Graph => {
            let sessions = Arc::new(TokenSessionProvider::new(settings.token_file.clone()));
            Arc::new(GraphDriveClient::new(&settings.api_base_url, sessions))
        }
        Backend::Memory => Arc::new(MemoryDrive::new()),
    }
}

fn unmount(mountpoint: &Path) {
    if let Err(e) = std::process::Command::new("fusermount")
        .arg("-u")
        .arg(mountpoint)
        .output()
    {
        error!("Failed to unmount filesystem: {}", e);
    }
}

fn main() -> Result<()> {
    let matches = command().get_matches();

    let mut project_config = ProjectConfig::new(matches.get_one::<PathBuf>("config").cloned())
        .context("Failed to load settings")?;
    apply_overrides(&mut project_config.settings, &matches)?;
    let settings = project_config.settings;

    setup_logging(project_config.project_dirs.data_dir(), settings.log_level())
        .context("Failed to setup logging")?;
    info!("Settings loaded from {}", project_config.settings_path.display());

    let mountpoint = settings
        .mountpoint
        .clone()
        .ok_or_else(|| anyhow!("No mount point given; pass --mountpoint or set it in settings"))?;

    // A crashed previous run leaves "Transport endpoint is not connected"
    // behind; unmounting first clears it.
    info!("Ensuring clean mount point by unmounting any existing filesystem...");
    unmount(&mountpoint);
    if !mountpoint.is_dir() {
        bail!("Mount point is not a directory: {}", mountpoint.display());
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    let runtime_handle = runtime.handle().clone();

    let client = build_client(&settings);
    runtime
        .block_on(client.list_children(&client.root()))
        .with_context(|| format!("Failed to reach the {:?} drive", settings.backend))?;
    info!("Connected to {:?} drive", settings.backend);

    let bridge = Arc::new(DriveBridge::new(
        client,
        BridgeConfig {
            cache_ttl: settings.cache_ttl(),
            read_only: settings.read_only,
        },
    ));
    // SAFETY: getuid/getgid have no preconditions and cannot fail
    let uid = settings.uid.unwrap_or_else(|| unsafe { libc::getuid() });
    let gid = settings.gid.unwrap_or_else(|| unsafe { libc::getgid() });
    let fs = CloudDriveFuse::new(bridge, uid, gid);

    let mut options = vec![
        MountOption::FSName("clouddrive".to_string()),
        MountOption::DefaultPermissions,
    ];
    options.push(if settings.read_only {
        MountOption::RO
    } else {
        MountOption::RW
    });

    let mountpoint_for_shutdown = mountpoint.clone();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal, shutting down...");
        unmount(&mountpoint_for_shutdown);
    })
    .context("Error setting Ctrl-C handler")?;

    // Mount the filesystem in a separate thread (FUSE is blocking)
    info!("Mounting filesystem at: {}", mountpoint.display());
    let mount_thread = std::thread::spawn(move || {
        let _guard = runtime_handle.enter();
        fuser::mount2(fs, &mountpoint, &options)
    });

    match mount_thread.join() {
        Ok(Ok(())) => {
            info!("Filesystem unmounted");
            Ok(())
        }
        Ok(Err(e)) => {
            error!("FUSE filesystem error: {}", e);
            Err(e).context("FUSE session failed")
        }
        Err(_) => bail!("FUSE thread panicked"),
    }
}
