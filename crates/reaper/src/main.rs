mod manifest;

use clap::{Args, Parser, Subcommand, ValueEnum};
use manifest::{load_manifest, Target};
use reaper_controller::{
    ControllerConfig, Manager, CLUSTER_FINALIZER, MANAGEMENT_FINALIZER, REMOVED,
};
use reaper_core::{split_object_key, ManagementCluster, ProvisioningCluster, Resource};
use reaper_store::{LabelSelector, MemoryStore, ResourceClient};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "reaper", about = "Cascading cluster teardown controllers")]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a manifest, run both controllers and delete the given objects
    Run {
        /// Multi-document YAML manifest to load into the store
        #[arg(long)]
        manifest: PathBuf,
        /// Object to delete: <kind>/<namespace>/<name> or management/<name>
        #[arg(long = "delete")]
        deletes: Vec<Target>,
        /// Give up waiting after this many seconds
        #[arg(long, env = "REAPER_TIMEOUT_SECS", default_value_t = 120)]
        timeout_secs: u64,
        #[command(flatten)]
        controller: ControllerArgs,
    },
    /// Run a single teardown evaluation for one provisioning cluster
    Check {
        /// Multi-document YAML manifest to load into the store
        #[arg(long)]
        manifest: PathBuf,
        /// Provisioning cluster as <namespace>/<name>
        #[arg(long)]
        cluster: String,
    },
}

#[derive(Args, Debug, Clone)]
struct ControllerArgs {
    /// Concurrent reconcile workers per controller
    #[arg(long, env = "REAPER_WORKERS", default_value_t = 2)]
    workers: usize,
    /// Seconds between re-checks of a waiting teardown
    #[arg(long, env = "REAPER_REQUEUE_SECS", default_value_t = 5)]
    requeue_secs: u64,
    /// First retry delay after a failed reconcile, in milliseconds
    #[arg(long, env = "REAPER_BACKOFF_BASE_MS", default_value_t = 100)]
    backoff_base_ms: u64,
    /// Upper bound for the retry delay, in seconds
    #[arg(long, env = "REAPER_BACKOFF_MAX_SECS", default_value_t = 60)]
    backoff_max_secs: u64,
    /// Seconds between full re-lists
    #[arg(long, env = "REAPER_RESYNC_SECS", default_value_t = 300)]
    resync_secs: u64,
}

impl From<&ControllerArgs> for ControllerConfig {
    fn from(args: &ControllerArgs) -> Self {
        Self {
            workers: args.workers,
            requeue_delay: Duration::from_secs(args.requeue_secs),
            backoff_base: Duration::from_millis(args.backoff_base_ms),
            backoff_max: Duration::from_secs(args.backoff_max_secs),
            resync_interval: Duration::from_secs(args.resync_secs),
        }
    }
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }

    match cli.command {
        Commands::Run {
            manifest,
            deletes,
            timeout_secs,
            controller,
        } => {
            run_teardown(
                &manifest,
                &deletes,
                Duration::from_secs(timeout_secs),
                ControllerConfig::from(&controller),
            )
            .await
        }
        Commands::Check { manifest, cluster } => {
            let stage = run_check(&manifest, &cluster).await?;
            println!("{}", stage);
            Ok(())
        }
    }
}

/// Load the manifest, start the controllers, delete the targets and wait for them to go away
async fn run_teardown(
    manifest: &Path,
    deletes: &[Target],
    timeout: Duration,
    config: ControllerConfig,
) -> miette::Result<()> {
    let store = MemoryStore::new();
    let loaded = load_manifest(&store, manifest)?;
    info!("Loaded {} objects from {}", loaded.len(), manifest.display());

    let manager = Arc::new(Manager::new(store.clone(), config)?);
    let token = CancellationToken::new();
    let manager_token = token.clone();
    let manager_handle = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            if let Err(e) = manager.run(manager_token).await {
                error!("Controller manager error: {}", e);
            }
        })
    };

    let finished = tokio::select! {
        result = teardown(&store, deletes) => {
            result?;
            true
        }
        _ = tokio::time::sleep(timeout) => {
            warn!("Timed out after {:?} waiting for teardown", timeout);
            false
        }
        result = tokio::signal::ctrl_c() => {
            result.map_err(|e| miette::miette!("Failed to listen for ctrl-c: {}", e))?;
            info!("Interrupted, shutting down");
            false
        }
    };

    token.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), manager_handle).await;

    print_remaining(&store).await?;
    if finished {
        info!("Teardown complete");
    }
    Ok(())
}

/// Wait for finalizers, issue the deletes, then wait until every target is gone
async fn teardown(store: &Arc<MemoryStore>, deletes: &[Target]) -> miette::Result<()> {
    wait_for_finalizers(store).await?;

    for target in deletes {
        match target.delete(store).await {
            Ok(()) => info!("Requested deletion of {}", target),
            Err(e) if e.is_not_found() => warn!("{} does not exist", target),
            Err(e) => return Err(e.into()),
        }
    }

    let poll = Duration::from_millis(100);
    while deletes.iter().any(|t| store.contains(&t.resource_key())) {
        tokio::time::sleep(poll).await;
    }
    Ok(())
}

/// Deletes issued before the controllers own their finalizers would skip teardown
async fn wait_for_finalizers(store: &Arc<MemoryStore>) -> miette::Result<()> {
    let clusters = store.client::<ProvisioningCluster>();
    let management = store.client::<ManagementCluster>();
    let everything = LabelSelector::everything();

    loop {
        let clusters_ready = clusters
            .list("", &everything)
            .await?
            .iter()
            .all(|c| c.has_finalizer(CLUSTER_FINALIZER));
        let management_ready = management
            .list("", &everything)
            .await?
            .iter()
            .all(|c| c.has_finalizer(MANAGEMENT_FINALIZER));

        if clusters_ready && management_ready {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn print_remaining(store: &Arc<MemoryStore>) -> miette::Result<()> {
    let remaining = store.snapshot();
    if remaining.is_empty() {
        println!("no objects remaining");
        return Ok(());
    }

    let clusters = store
        .client::<ProvisioningCluster>()
        .list("", &LabelSelector::everything())
        .await?;

    println!("remaining objects:");
    for object in &remaining {
        let metadata = &object["metadata"];
        let namespace = metadata["namespace"].as_str().unwrap_or_default();
        let name = metadata["name"].as_str().unwrap_or_default();
        let deleting = if metadata["deletionTimestamp"].is_null() {
            ""
        } else {
            " (deleting)"
        };
        println!(
            "  {}/{} {}{}",
            object["apiVersion"].as_str().unwrap_or_default(),
            object["kind"].as_str().unwrap_or_default(),
            reaper_core::object_key(namespace, name),
            deleting
        );
    }

    for cluster in clusters {
        if let Some(message) = REMOVED.get_message(&cluster.status) {
            println!("  {}/{}: {}", cluster.namespace(), cluster.name(), message);
        }
    }
    Ok(())
}

/// One evaluator pass over `<namespace>/<name>`
async fn run_check(manifest: &Path, cluster: &str) -> miette::Result<reaper_controller::Stage> {
    let (namespace, name) = split_object_key(cluster);
    if namespace.is_empty() || name.is_empty() {
        return Err(miette::miette!(
            "Invalid cluster reference '{}', expected <namespace>/<name>",
            cluster
        ));
    }

    let store = MemoryStore::new();
    load_manifest(&store, manifest)?;
    let manager = Manager::new(store.clone(), ControllerConfig::default())?;

    let cluster = store
        .client::<ProvisioningCluster>()
        .get(namespace, name)
        .await?;
    Ok(manager.evaluator().evaluate(&cluster).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn manifest_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    const WAITING: &str = r#"
apiVersion: provisioning.reaper.dev/v1
kind: Cluster
metadata:
  name: foo
  namespace: ns
---
apiVersion: cluster.x-k8s.io/v1beta1
kind: Machine
metadata:
  name: foo-b
  namespace: ns
  labels:
    cluster.x-k8s.io/cluster-name: foo
---
apiVersion: cluster.x-k8s.io/v1beta1
kind: Machine
metadata:
  name: foo-a
  namespace: ns
  labels:
    cluster.x-k8s.io/cluster-name: foo
"#;

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "reaper",
            "--log-format",
            "json",
            "run",
            "--manifest",
            "fleet.yaml",
            "--delete",
            "cluster/ns/foo",
            "--delete",
            "management/mgmt1",
            "--workers",
            "4",
        ])
        .unwrap();

        assert_eq!(cli.log_format, LogFormat::Json);
        match cli.command {
            Commands::Run {
                deletes,
                controller,
                timeout_secs,
                ..
            } => {
                assert_eq!(deletes.len(), 2);
                assert_eq!(timeout_secs, 120);
                let config = ControllerConfig::from(&controller);
                assert_eq!(config.workers, 4);
                assert_eq!(config.requeue_delay, Duration::from_secs(5));
            }
            Commands::Check { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn test_cli_rejects_bad_target() {
        assert!(Cli::try_parse_from([
            "reaper",
            "run",
            "--manifest",
            "fleet.yaml",
            "--delete",
            "pod/ns/foo",
        ])
        .is_err());
    }

    #[test]
    fn test_default_args_match_default_config() {
        let cli = Cli::try_parse_from(["reaper", "run", "--manifest", "fleet.yaml"]).unwrap();
        let Commands::Run { controller, .. } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(ControllerConfig::from(&controller), ControllerConfig::default());
    }

    #[tokio::test]
    async fn test_check_reports_first_machine() {
        let file = manifest_file(WAITING);
        let stage = run_check(file.path(), "ns/foo").await.unwrap();
        assert_eq!(stage.to_string(), "waiting for machine [foo-a] to delete");
    }

    #[tokio::test]
    async fn test_check_complete() {
        let file = manifest_file(
            "apiVersion: provisioning.reaper.dev/v1\nkind: Cluster\nmetadata:\n  name: foo\n  namespace: ns\n",
        );
        let stage = run_check(file.path(), "ns/foo").await.unwrap();
        assert_eq!(stage.to_string(), "teardown complete");
    }

    #[tokio::test]
    async fn test_check_rejects_bad_reference() {
        let file = manifest_file(WAITING);
        assert!(run_check(file.path(), "foo").await.is_err());
        assert!(run_check(file.path(), "ns/missing").await.is_err());
    }
}
