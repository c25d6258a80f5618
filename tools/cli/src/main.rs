//! StudioSync CLI - Command line interface for local-first cloud storage.
//!
//! This tool wires the persisted storage configuration to a provider rooted
//! in the user's data directory, and exposes file, sync and backend
//! management operations.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use url::Url;

use studiosync_common::{StoragePath, StorageScope};
use studiosync_config::{CloudBackendConfig, ConfigurationStore, JsonFileStore, KeyValueStore};
use studiosync_storage::{
    AuthConfig, AuthManager, BackendKind, CloudBackendSettings, DropboxSettings,
    GoogleDriveSettings, LocalBackend, S3Settings, Tokens, DROPBOX_OAUTH, GOOGLE_DRIVE_OAUTH,
};
use studiosync_sync::{
    DeleteOptions, ReadOptions, StorageProvider, SyncDirection, SyncOptions, SyncResult,
    SyncTarget, WriteOptions,
};

#[derive(Parser)]
#[command(name = "studiosync")]
#[command(about = "StudioSync - Local-first storage with cloud sync")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Settings file (default: <config dir>/studiosync/settings.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Local storage root (default: <data dir>/studiosync).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a file in local storage.
    Put {
        /// Source file to store.
        source: PathBuf,

        /// Destination storage path.
        dest: StoragePath,

        /// MIME type recorded by backends that support it.
        #[arg(long)]
        content_type: Option<String>,

        /// Do not upload even when auto-sync is enabled.
        #[arg(long)]
        no_sync: bool,
    },

    /// Read a file, falling back to the cloud when it is not local.
    Get {
        /// Storage path to read.
        path: StoragePath,

        /// Output file (default: stdout).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Read from the cloud first.
        #[arg(long)]
        cloud: bool,
    },

    /// List a directory.
    Ls {
        /// Directory to list (default: root).
        path: Option<StoragePath>,

        /// List the cloud copy instead of local storage.
        #[arg(long)]
        cloud: bool,
    },

    /// Remove a file or directory.
    Rm {
        path: StoragePath,

        /// Remove directories and their contents.
        #[arg(short, long)]
        recursive: bool,

        /// Keep the cloud copy.
        #[arg(long)]
        local_only: bool,
    },

    /// Synchronize a scope or path with its cloud backend.
    Sync {
        /// Scope name (projects, samples, soundfonts, all) or a storage path.
        #[arg(default_value = "all")]
        target: String,

        #[arg(short, long, value_enum, default_value = "upload")]
        direction: DirectionArg,
    },

    /// Probe every backend.
    Health,

    /// Show storage quotas.
    Quota,

    /// Inspect or change the storage configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Authorize a consumer drive and attach it.
    Auth {
        #[arg(value_enum)]
        service: AuthService,

        #[command(flatten)]
        client: OAuthClientArgs,

        #[command(flatten)]
        routing: RoutingArgs,
    },

    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the stored configuration.
    Show,

    /// Attach an S3-compatible bucket.
    AddS3 {
        #[arg(long)]
        bucket: String,

        #[arg(long, default_value = "us-east-1")]
        region: String,

        /// Custom endpoint for S3-compatible services.
        #[arg(long)]
        endpoint: Option<String>,

        #[arg(long, env = "AWS_ACCESS_KEY_ID")]
        access_key_id: String,

        #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
        secret_access_key: String,

        /// Address the bucket in the path instead of the host name.
        #[arg(long)]
        path_style: bool,

        /// Key prefix inside the bucket.
        #[arg(long, default_value = "")]
        prefix: String,

        #[command(flatten)]
        routing: RoutingArgs,
    },

    /// Attach Google Drive with existing OAuth tokens.
    AddGdrive {
        #[command(flatten)]
        client: OAuthClientArgs,

        #[command(flatten)]
        tokens: TokenArgs,

        /// Root folder ID (default: the app-private folder).
        #[arg(long)]
        root_folder_id: Option<String>,

        #[command(flatten)]
        routing: RoutingArgs,
    },

    /// Attach Dropbox with existing OAuth tokens.
    AddDropbox {
        #[command(flatten)]
        client: OAuthClientArgs,

        #[command(flatten)]
        tokens: TokenArgs,

        /// Folder inside the app folder used as the root.
        #[arg(long, default_value = "")]
        root_path: String,

        #[command(flatten)]
        routing: RoutingArgs,
    },

    /// Detach a cloud backend.
    Remove {
        /// s3, google-drive or dropbox.
        kind: BackendKind,
    },

    /// Enable or disable automatic upload after writes.
    AutoSync {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },

    /// Set the automatic sync debounce.
    Debounce {
        /// Quiet period in milliseconds.
        millis: u64,
    },
}

#[derive(clap::Args)]
struct RoutingArgs {
    /// Scopes routed to the backend, comma separated.
    #[arg(long, value_delimiter = ',', default_value = "all")]
    scopes: Vec<StorageScope>,

    /// Higher wins when several backends cover a scope.
    #[arg(long, default_value_t = 0)]
    priority: i32,
}

#[derive(clap::Args)]
struct OAuthClientArgs {
    #[arg(long)]
    client_id: String,

    #[arg(long)]
    client_secret: Option<String>,
}

#[derive(clap::Args)]
struct TokenArgs {
    #[arg(long)]
    access_token: String,

    #[arg(long)]
    refresh_token: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum DirectionArg {
    Upload,
    Download,
    Both,
}

impl From<DirectionArg> for SyncDirection {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Upload => SyncDirection::Upload,
            DirectionArg::Download => SyncDirection::Download,
            DirectionArg::Both => SyncDirection::Both,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum AuthService {
    Gdrive,
    Dropbox,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "studiosync", &mut io::stdout());
        return Ok(());
    }

    let store = open_store(cli.config.as_deref())?;

    match cli.command {
        Commands::Put {
            source,
            dest,
            content_type,
            no_sync,
        } => {
            let provider = open_provider(&store, cli.data_dir.as_deref())?;
            cmd_put(&store, &provider, &source, &dest, content_type, no_sync).await
        }

        Commands::Get {
            path,
            output,
            cloud,
        } => {
            let provider = open_provider(&store, cli.data_dir.as_deref())?;
            cmd_get(&provider, &path, output.as_deref(), cloud).await
        }

        Commands::Ls { path, cloud } => {
            let provider = open_provider(&store, cli.data_dir.as_deref())?;
            cmd_ls(&provider, &path.unwrap_or_default(), cloud).await
        }

        Commands::Rm {
            path,
            recursive,
            local_only,
        } => {
            let provider = open_provider(&store, cli.data_dir.as_deref())?;
            cmd_rm(&provider, &path, recursive, local_only).await
        }

        Commands::Sync { target, direction } => {
            let provider = open_provider(&store, cli.data_dir.as_deref())?;
            cmd_sync(&store, &provider, &target, direction.into()).await
        }

        Commands::Health => {
            let provider = open_provider(&store, cli.data_dir.as_deref())?;
            cmd_health(&provider).await
        }

        Commands::Quota => {
            let provider = open_provider(&store, cli.data_dir.as_deref())?;
            cmd_quota(&provider).await
        }

        Commands::Config { command } => cmd_config(&store, command),

        Commands::Auth {
            service,
            client,
            routing,
        } => cmd_auth(&store, service, client, routing).await,

        Commands::Completions { .. } => Ok(()),
    }
}

/// Install the global subscriber. `RUST_LOG`, when set, wins over `--verbose`.
fn init_logging(verbose: bool) -> Result<()> {
    let builder = FmtSubscriber::builder().with_target(false).compact();

    if std::env::var_os("RUST_LOG").is_some() {
        let subscriber = builder.with_env_filter(EnvFilter::from_default_env()).finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let level = if verbose { Level::DEBUG } else { Level::INFO };
        let subscriber = builder.with_max_level(level).finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

fn open_store(path: Option<&Path>) -> Result<ConfigurationStore> {
    let backing: Arc<dyn KeyValueStore> = match path {
        Some(path) => Arc::new(JsonFileStore::new(path)),
        None => Arc::new(JsonFileStore::default_location().context("Failed to locate settings")?),
    };
    ConfigurationStore::open(backing).context("Failed to load configuration")
}

/// Build the provider from the stored configuration.
///
/// Each invocation is short-lived, so the debounced auto-sync is disabled
/// here and `put` uploads directly instead.
fn open_provider(store: &ConfigurationStore, data_dir: Option<&Path>) -> Result<StorageProvider> {
    let root = match data_dir {
        Some(dir) => dir.to_path_buf(),
        None => dirs::data_dir()
            .context("No data directory on this platform")?
            .join("studiosync"),
    };
    let local = LocalBackend::on_disk(&root)
        .with_context(|| format!("Failed to open local storage at {}", root.display()))?;

    let provider = StorageProvider::from_configuration(Arc::new(local), &store.get());
    provider.set_auto_sync(false);
    info!("Local storage: {}", root.display());
    Ok(provider)
}

/// Store a file locally, then upload its scope when auto-sync is on.
async fn cmd_put(
    store: &ConfigurationStore,
    provider: &StorageProvider,
    source: &Path,
    dest: &StoragePath,
    content_type: Option<String>,
    no_sync: bool,
) -> Result<()> {
    let content = tokio::fs::read(source)
        .await
        .context("Failed to read source file")?;
    let size = content.len();

    let options = WriteOptions {
        content_type,
        skip_sync: true,
    };
    provider
        .write(dest, content, &options)
        .await
        .context("Failed to store file")?;
    println!("Stored: {} ({} bytes)", dest, size);

    if no_sync || !store.get().auto_sync || provider.backends().is_empty() {
        return Ok(());
    }
    let scope = studiosync_sync::scope_from_path(dest);
    let result = provider
        .sync(scope, SyncOptions::new(SyncDirection::Upload))
        .await;
    finish_sync(store, SyncTarget::Scope(scope), &result)
}

async fn cmd_get(
    provider: &StorageProvider,
    path: &StoragePath,
    output: Option<&Path>,
    cloud: bool,
) -> Result<()> {
    let content = provider
        .read(path, &ReadOptions { prefer_cloud: cloud })
        .await
        .with_context(|| format!("Failed to read {}", path))?;

    match output {
        Some(output) => {
            tokio::fs::write(output, &content)
                .await
                .context("Failed to write output file")?;
            println!("Read: {} -> {} ({} bytes)", path, output.display(), content.len());
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(&content)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

async fn cmd_ls(provider: &StorageProvider, path: &StoragePath, cloud: bool) -> Result<()> {
    let entries = provider
        .list(path, cloud)
        .await
        .context("Failed to list directory")?;

    if entries.is_empty() {
        println!("Directory is empty.");
        return Ok(());
    }

    println!("Contents of /{}:", path);
    for entry in entries {
        if entry.is_directory() {
            println!("  [DIR]  {}/", entry.name);
        } else {
            let size = entry.size.map(|s| format!("{} bytes", s)).unwrap_or_default();
            let modified = entry
                .modified
                .map(|m| m.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default();
            println!("  [FILE] {} ({}) {}", entry.name, size, modified);
        }
    }
    Ok(())
}

async fn cmd_rm(provider: &StorageProvider, path: &StoragePath, recursive: bool, local_only: bool) -> Result<()> {
    let options = DeleteOptions {
        recursive,
        skip_cloud: local_only,
    };
    provider
        .delete(path, &options)
        .await
        .with_context(|| format!("Failed to remove {}", path))?;
    println!("Removed: {}", path);
    Ok(())
}

/// A scope name, or failing that a storage path.
fn parse_target(target: &str) -> Result<SyncTarget> {
    if let Ok(scope) = target.parse::<StorageScope>() {
        return Ok(SyncTarget::Scope(scope));
    }
    let path = StoragePath::parse(target).context("Invalid sync target")?;
    Ok(SyncTarget::Path(path))
}

async fn cmd_sync(
    store: &ConfigurationStore,
    provider: &StorageProvider,
    target: &str,
    direction: SyncDirection,
) -> Result<()> {
    let target = parse_target(target)?;
    let options = SyncOptions::new(direction).with_progress(|progress| {
        if progress.completed < progress.total {
            info!(
                "[{}/{}] {}",
                progress.completed + 1,
                progress.total,
                progress.current_file
            );
        }
    });

    let result = provider.sync(target.clone(), options).await;
    finish_sync(store, target, &result)
}

/// Print a sync summary and stamp the scope on success.
fn finish_sync(store: &ConfigurationStore, target: SyncTarget, result: &SyncResult) -> Result<()> {
    println!(
        "Uploaded {}, downloaded {} file(s).",
        result.files_uploaded, result.files_downloaded
    );
    for error in &result.errors {
        println!("  failed: {} ({})", error.path, error.error);
    }

    if !result.success {
        anyhow::bail!("Sync completed with {} error(s)", result.errors.len());
    }
    if let SyncTarget::Scope(scope) = target {
        store
            .update(|config| config.record_last_sync(scope, Utc::now()))
            .context("Failed to record sync time")?;
    }
    Ok(())
}

async fn cmd_health(provider: &StorageProvider) -> Result<()> {
    let mut statuses: Vec<_> = provider.health_check().await.into_iter().collect();
    statuses.sort_by_key(|(kind, _)| *kind);

    for (kind, status) in statuses {
        let state = if status.healthy { "ok" } else { "FAILED" };
        println!("  {:<13} {:<6} {:>5} ms  {}", kind, state, status.latency_ms, status.message);
    }
    Ok(())
}

async fn cmd_quota(provider: &StorageProvider) -> Result<()> {
    let mut quotas: Vec<_> = provider.storage_quotas().await.into_iter().collect();
    quotas.sort_by_key(|(kind, _)| *kind);

    for (kind, quota) in quotas {
        match quota {
            Some(quota) => println!(
                "  {:<13} {} of {} available",
                kind,
                format_bytes(quota.available),
                format_bytes(quota.total)
            ),
            None => println!("  {:<13} unknown", kind),
        }
    }
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

fn cmd_config(store: &ConfigurationStore, command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            let config = store.get();
            println!("Storage configuration (v{}):", config.version);
            println!("  Auto-sync: {}", config.auto_sync);
            println!("  Debounce: {} ms", config.sync_debounce_ms);
            if config.cloud_backends.is_empty() {
                println!("  No cloud backends.");
            }
            for backend in &config.cloud_backends {
                let scopes: Vec<_> = backend.scopes.iter().map(|s| s.as_str()).collect();
                println!(
                    "  {} [{}] priority {}",
                    backend.settings.describe(),
                    scopes.join(","),
                    backend.priority
                );
            }
            for scope in StorageScope::VARIANTS {
                if let Some(at) = config.last_sync(scope) {
                    println!("  Last {} sync: {}", scope, at.to_rfc3339());
                }
            }
            Ok(())
        }

        ConfigCommands::AddS3 {
            bucket,
            region,
            endpoint,
            access_key_id,
            secret_access_key,
            path_style,
            prefix,
            routing,
        } => {
            let settings = CloudBackendSettings::S3(S3Settings {
                endpoint,
                region,
                bucket,
                access_key_id,
                secret_access_key,
                path_style,
                prefix,
                request_timeout_secs: None,
            });
            attach_backend(store, settings, routing)
        }

        ConfigCommands::AddGdrive {
            client,
            tokens,
            root_folder_id,
            routing,
        } => {
            let mut settings = GoogleDriveSettings::new(client.into(), tokens.into());
            if let Some(root) = root_folder_id {
                settings.root_folder_id = root;
            }
            attach_backend(store, CloudBackendSettings::GoogleDrive(settings), routing)
        }

        ConfigCommands::AddDropbox {
            client,
            tokens,
            root_path,
            routing,
        } => {
            let mut settings = DropboxSettings::new(client.into(), tokens.into());
            settings.root_path = root_path;
            attach_backend(store, CloudBackendSettings::Dropbox(settings), routing)
        }

        ConfigCommands::Remove { kind } => {
            if store.get().cloud_backend(kind).is_none() {
                anyhow::bail!("No {} backend is configured", kind);
            }
            store
                .update(|config| config.remove_cloud_backend(kind))
                .context("Failed to save configuration")?;
            println!("Removed backend: {}", kind);
            Ok(())
        }

        ConfigCommands::AutoSync { enabled } => {
            store
                .update(|config| config.set_auto_sync(enabled))
                .context("Failed to save configuration")?;
            println!("Auto-sync {}", if enabled { "enabled" } else { "disabled" });
            Ok(())
        }

        ConfigCommands::Debounce { millis } => {
            store
                .update(|config| config.set_sync_debounce(millis))
                .context("Failed to save configuration")?;
            println!("Sync debounce set to {} ms", millis);
            Ok(())
        }
    }
}

impl From<OAuthClientArgs> for AuthConfig {
    fn from(args: OAuthClientArgs) -> Self {
        AuthConfig::new(args.client_id, args.client_secret)
    }
}

impl From<TokenArgs> for Tokens {
    /// Treated as expired so the first request refreshes them.
    fn from(args: TokenArgs) -> Self {
        Tokens {
            access_token: args.access_token,
            refresh_token: args.refresh_token,
            expires_at: Utc::now() - Duration::minutes(1),
        }
    }
}

fn attach_backend(store: &ConfigurationStore, settings: CloudBackendSettings, routing: RoutingArgs) -> Result<()> {
    let description = settings.describe();
    let entry = CloudBackendConfig::new(settings, routing.scopes, routing.priority);
    let replaced = store.get().cloud_backend(entry.kind()).is_some();

    store
        .update(|config| config.add_cloud_backend(entry))
        .context("Failed to save configuration")?;

    if replaced {
        println!("Replaced backend: {}", description);
    } else {
        println!("Added backend: {}", description);
    }
    Ok(())
}

/// Accept a bare code or the full redirect URL, checking `state` when the
/// URL carries one.
fn parse_authorization_code(input: &str, csrf: &str) -> Result<String> {
    let input = input.trim();
    let Ok(redirect) = Url::parse(input) else {
        if input.is_empty() {
            anyhow::bail!("No authorization code entered");
        }
        return Ok(input.to_string());
    };

    let mut code = None;
    for (key, value) in redirect.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" if value != csrf => anyhow::bail!("Authorization state does not match"),
            "error" => anyhow::bail!("Authorization was denied: {}", value),
            _ => {}
        }
    }
    code.context("Redirect URL has no authorization code")
}

/// Run the OAuth2 authorization-code flow and attach the backend.
async fn cmd_auth(
    store: &ConfigurationStore,
    service: AuthService,
    client: OAuthClientArgs,
    routing: RoutingArgs,
) -> Result<()> {
    let auth: AuthConfig = client.into();
    let endpoints = match service {
        AuthService::Gdrive => GOOGLE_DRIVE_OAUTH,
        AuthService::Dropbox => DROPBOX_OAUTH,
    };
    let manager = AuthManager::new(endpoints, auth.clone()).context("Invalid OAuth client")?;
    let (url, csrf) = manager.authorization_url();

    println!("Open this URL to authorize StudioSync:\n\n  {}\n", url);
    if let Err(e) = open::that(&url) {
        warn!("Could not open a browser: {}", e);
    }

    print!("Paste the authorization code or redirect URL: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read authorization code")?;
    let code = parse_authorization_code(&line, &csrf)?;

    let tokens = manager
        .exchange_code(&code)
        .await
        .context("Failed to exchange authorization code")?;

    let settings = match service {
        AuthService::Gdrive => CloudBackendSettings::GoogleDrive(GoogleDriveSettings::new(auth, tokens)),
        AuthService::Dropbox => CloudBackendSettings::Dropbox(DropboxSettings::new(auth, tokens)),
    };
    attach_backend(store, settings, routing)
}
