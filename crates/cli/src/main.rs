use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::signal;
use tracing::{info, warn};

use stackspark_core::{AppDocument, Phase, SelectorMap, WatchEvent};
use stackspark_kubehub::{AppPlatform, Deletion, KubePlatform, Session};
use stackspark_ops::AppController;
use stackspark_watch::{ChannelListener, WatcherBuilder};

#[derive(Parser, Debug)]
#[command(name = "sparkctl", version, about = "Submit, inspect, stop and watch SparkApplications")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Kubeconfig file or path list (default: $KUBECONFIG or ~/.kube/config, then in-cluster)
    #[arg(long = "kubeconfig", global = true)]
    kubeconfig: Option<PathBuf>,

    /// Kubeconfig context (default: current context)
    #[arg(long = "context", global = true)]
    context: Option<String>,

    /// Namespace (default: the context's namespace)
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replace-and-create an application from a YAML job definition
    Submit {
        file: PathBuf,
        /// Name to submit under (overrides metadata.name)
        #[arg(long)]
        name: Option<String>,
        /// Server-side dry run; nothing is deleted or persisted
        #[arg(long)]
        dry_run: bool,
    },
    /// Print an application
    Get { name: String },
    /// Delete an application
    Stop { name: String },
    /// Print an application's phase
    Phase { name: String },
    /// Stream change events until Ctrl-C
    Watch {
        /// Label selector term key=value (repeatable)
        #[arg(short = 'l', long = "label", value_parser = selector_term)]
        labels: Vec<(String, String)>,
        /// Field selector term key=value (repeatable)
        #[arg(long = "field", value_parser = selector_term)]
        fields: Vec<(String, String)>,
        /// Only report applications whose whole name matches this regex
        #[arg(long)]
        pattern: Option<String>,
        /// Server-side timeout per watch request (overrides STACKSPARK_WATCH_TIMEOUT_SECS)
        #[arg(long = "timeout-secs")]
        timeout_secs: Option<u32>,
    },
}

fn selector_term(s: &str) -> Result<(String, String), String> {
    SelectorMap::parse_term(s)
}

fn init_tracing() {
    let env = std::env::var("STACKSPARK_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("STACKSPARK_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid STACKSPARK_METRICS_ADDR; expected host:port");
        }
    }
}

async fn session(cli: &Cli) -> Result<Session> {
    let session = match (&cli.kubeconfig, &cli.context) {
        (Some(path), ctx) => Session::from_kubeconfig(path, ctx.as_deref()).await?,
        (None, Some(ctx)) => Session::from_default_kubeconfig(Some(ctx)).await?,
        (None, None) => Session::infer().await?,
    };
    Ok(match &cli.namespace {
        Some(ns) => session.with_namespace(ns.clone()),
        None => session,
    })
}

fn print_doc(output: Output, doc: &AppDocument) -> Result<()> {
    match output {
        Output::Human => {
            let phase = doc.status.as_ref().and_then(|s| s.phase.as_deref()).unwrap_or("-");
            println!(
                "{}/{}  phase={}  rv={}",
                doc.metadata.namespace.as_deref().unwrap_or("-"),
                doc.name().unwrap_or("-"),
                phase,
                doc.resource_version().unwrap_or("-"),
            );
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(doc)?),
    }
    Ok(())
}

fn print_event(output: Output, ev: &WatchEvent) -> Result<()> {
    match output {
        Output::Human => println!("{:<9} {:<40} {}", ev.event_type, ev.app_name, ev.phase),
        Output::Json => println!("{}", serde_json::to_string(ev)?),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let session = session(&cli).await.context("connecting to the cluster")?;
    let platform: Arc<dyn AppPlatform> = Arc::new(KubePlatform::new(session));
    let output = cli.output;

    match cli.command {
        Commands::Submit { file, name, dry_run } => {
            let doc = stackspark_schema::load_document(&file).with_context(|| format!("loading {}", file.display()))?;
            let ctl = AppController::new(platform);
            info!(file = %file.display(), name = ?name, dry_run, "submit invoked");
            let created = if dry_run {
                ctl.validate(&doc, name.as_deref()).await?
            } else {
                ctl.submit(&doc, name.as_deref()).await?
            };
            print_doc(output, &created)?;
        }
        Commands::Get { name } => match AppController::new(platform).get(&name).await? {
            Some(doc) => print_doc(output, &doc)?,
            None => anyhow::bail!("application {name} not found"),
        },
        Commands::Stop { name } => match AppController::new(platform).stop(&name).await? {
            Some(Deletion::Object(doc)) => print_doc(output, &doc)?,
            Some(Deletion::Status) => eprintln!("{name}: deleted"),
            None => eprintln!("{name}: not found"),
        },
        Commands::Phase { name } => {
            let phase: Phase = AppController::new(platform).phase(&name).await?;
            match output {
                Output::Human => println!("{phase}"),
                Output::Json => println!("{}", serde_json::json!({ "name": name, "phase": phase })),
            }
        }
        Commands::Watch { labels, fields, pattern, timeout_secs } => {
            let cap = std::env::var("STACKSPARK_QUEUE_CAP").ok().and_then(|s| s.parse::<usize>().ok()).unwrap_or(2048);
            let (listener, mut rx) = ChannelListener::channel(cap);
            let mut builder = WatcherBuilder::from_env(Arc::clone(&platform))
                .listener(listener)
                .label_selector(labels.into_iter().collect())
                .field_selector(fields.into_iter().collect());
            if let Some(p) = pattern {
                builder = builder.name_pattern(p);
            }
            if let Some(t) = timeout_secs {
                builder = builder.timeout_secs(t);
            }
            let handle = builder.build()?.spawn();
            info!(ns = %platform.namespace(), "watch invoked");

            loop {
                tokio::select! {
                    maybe = rx.recv() => match maybe {
                        Some(ev) => print_event(output, &ev)?,
                        None => {
                            warn!("event channel closed; exiting watch loop");
                            break;
                        }
                    },
                    _ = signal::ctrl_c() => {
                        info!("Ctrl-C received; shutting down watch loop");
                        break;
                    }
                }
            }
            let stats = handle.stats();
            handle.shutdown().await.context("watch task")?;
            info!(stats = ?stats, "watch loop ended");
        }
    }

    Ok(())
}
