//! clouddrive-fuse - mount a cloud drive as a local filesystem.

use clap::{Parser, Subcommand};
use clouddrive_fuse::client::{DriveClient, DriveService};
use clouddrive_fuse::config::{Backend, MountConfig};
use clouddrive_fuse::fs::DriveFs;
use clouddrive_fuse::fuse::DriveFuse;
use clouddrive_fuse::memory::MemoryDrive;
use clouddrive_fuse::resolver::ResolveMode;
use fuser::MountOption;
use log::{error, info, warn};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "clouddrive-fuse")]
#[command(about = "Mount a cloud drive as a local filesystem")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mount the drive
    Mount {
        /// Mount point path
        #[arg(value_name = "MOUNT_POINT")]
        mount_point: PathBuf,

        /// Drive gateway URL
        #[arg(long, env = "CLOUDDRIVE_URL")]
        url: Option<String>,

        /// Session token for the gateway
        #[arg(long, env = "CLOUDDRIVE_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Serve an empty in-memory drive instead of a remote one
        #[arg(long, default_value = "false", conflicts_with = "url")]
        memory: bool,

        /// Cache directory (default: platform cache dir)
        #[arg(long, env = "CLOUDDRIVE_CACHE_DIR")]
        cache_dir: Option<PathBuf>,

        /// Seconds a cached attribute, listing or file stays fresh
        #[arg(long, default_value_t = 300)]
        cache_ttl: u64,

        /// Maximum number of cached paths (unbounded when omitted)
        #[arg(long)]
        cache_capacity: Option<NonZeroUsize>,

        /// How nested paths are resolved
        #[arg(long, value_enum, default_value_t = ResolveMode::Descend)]
        resolve: ResolveMode,

        /// Allow other users to access the mount
        #[arg(long, default_value = "false")]
        allow_other: bool,

        /// Run in foreground (don't daemonize)
        #[arg(long, short = 'f', default_value = "false")]
        foreground: bool,

        /// Enable debug logging
        #[arg(long, short = 'v', default_value = "false")]
        debug: bool,
    },
    /// Check version
    Version,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Mount {
            mount_point,
            url,
            token,
            memory,
            cache_dir,
            cache_ttl,
            cache_capacity,
            resolve,
            allow_other,
            foreground,
            debug,
        } => {
            let level = if debug { "debug" } else { "info" };
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

            let config = MountConfig {
                mount_point,
                backend: MountConfig::backend(url, token, memory)?,
                cache_dir: match cache_dir {
                    Some(dir) => dir,
                    None => MountConfig::default_cache_dir()?,
                },
                cache_ttl: Duration::from_secs(cache_ttl),
                cache_capacity,
                resolve_mode: resolve,
                allow_other,
            };

            info!("clouddrive-fuse starting...");
            info!("Mount point: {}", config.mount_point.display());
            config.prepare_cache_dir()?;

            let drive: Arc<dyn DriveService> = match &config.backend {
                Backend::Remote { url, token } => {
                    info!("Drive gateway: {}", url);
                    let client = DriveClient::new(url, token)?;

                    info!("Checking session...");
                    match client.session() {
                        Ok(session) => {
                            let account = session.account.as_deref().unwrap_or("unknown");
                            info!("Authenticated as {}", account);
                            if !session.trusted {
                                warn!("Session is not trusted; the gateway may ask for verification again");
                            }
                        }
                        Err(e) => {
                            error!("Failed to authenticate: {}", e);
                            return Err(e.into());
                        }
                    }
                    Arc::new(client)
                }
                Backend::Memory => {
                    warn!("Serving an in-memory drive; nothing is stored remotely");
                    Arc::new(MemoryDrive::new())
                }
            };

            info!(
                "Cache TTL {}s, resolve mode {:?}",
                config.cache_ttl.as_secs(),
                config.resolve_mode
            );
            let filesystem = DriveFuse::new(DriveFs::new(drive, config.fs_options()));

            let mut options = vec![
                MountOption::FSName("clouddrive".to_string()),
                MountOption::AutoUnmount,
                MountOption::DefaultPermissions,
            ];
            if config.allow_other {
                options.push(MountOption::AllowOther);
            }

            info!("Mounting filesystem...");
            if !foreground {
                // No daemonizing yet; the mount always runs in the foreground
                info!("Running in foreground");
            }
            fuser::mount2(filesystem, &config.mount_point, &options)?;

            info!("Filesystem unmounted");
        }
        Commands::Version => {
            println!("clouddrive-fuse {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
