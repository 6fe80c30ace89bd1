use std::str::FromStr;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use vista_api::common::ObjectMeta;
use vista_api::{InProcApi, VistaApi};
use vista_channels::NamespaceQuery;
use vista_core::{DataError, ResourceKind};
use vista_dataselect::{DataSelectParams, DataSelectQuery, DEFAULT_ITEMS_PER_PAGE};

#[derive(Parser, Debug)]
#[command(name = "vistactl", version, about = "Vista CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespaces, comma separated; empty means all
    #[arg(long = "ns", global = true, default_value = "")]
    namespace: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Args, Debug, Clone)]
struct SelectArgs {
    /// Filter pairs, e.g. "name,nginx,namespace,prod"
    #[arg(long = "filter-by")]
    filter_by: Option<String>,
    /// Sort pairs, e.g. "d,creationTimestamp,a,name"
    #[arg(long = "sort-by")]
    sort_by: Option<String>,
    /// 1-based page number
    #[arg(long = "page", default_value_t = 1)]
    page: i64,
    /// Page size; 0 disables pagination
    #[arg(long = "items-per-page", env = "VISTA_ITEMS_PER_PAGE", default_value_t = DEFAULT_ITEMS_PER_PAGE)]
    items_per_page: i64,
    /// Metric names, e.g. "cpu/usage_rate,memory/usage"
    #[arg(long = "metrics")]
    metrics: Option<String>,
    /// Aggregations for cumulative metrics: sum, max, min, average
    #[arg(long = "aggregations")]
    aggregations: Option<String>,
}

impl SelectArgs {
    fn to_query(&self) -> DataSelectQuery {
        DataSelectParams {
            filter_by: self.filter_by.clone(),
            sort_by: self.sort_by.clone(),
            page: Some(self.page),
            items_per_page: Some(self.items_per_page),
            metric_names: self.metrics.clone(),
            aggregations: self.aggregations.clone(),
        }
        .to_query()
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List pods with warnings and restart counts
    Pods(SelectArgs),
    /// List deployments with their pod rollup
    Deployments(SelectArgs),
    /// List services with endpoints
    Services(SelectArgs),
    /// List events
    Events(SelectArgs),
    /// Print one object as JSON
    Get {
        /// Resource name, e.g. "pods" or "Deployment"
        resource: String,
        /// Object name
        name: String,
    },
}

fn init_tracing() {
    let env = std::env::var("VISTA_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("VISTA_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid VISTA_METRICS_ADDR; expected host:port");
        }
    }
}

fn print_errors(errors: &[DataError]) {
    for e in errors {
        eprintln!("warning: {}", e);
    }
}

fn age(meta: &ObjectMeta) -> String {
    let Some(t) = meta.creation_timestamp else { return "-".to_string() };
    match (Utc::now() - t).num_seconds().max(0) {
        s if s < 120 => format!("{}s", s),
        s if s < 7200 => format!("{}m", s / 60),
        s if s < 172_800 => format!("{}h", s / 3600),
        s => format!("{}d", s / 86_400),
    }
}

async fn run_list(api: &dyn VistaApi, resource: &str, nsq: &NamespaceQuery, args: &SelectArgs, output: Output) -> Result<()> {
    let t0 = Instant::now();
    let query = args.to_query();
    info!(resource, ns = ?nsq, "list invoked");
    if output == Output::Json {
        let v = vista_api::list_json(api, resource, nsq, &query).await?;
        println!("{}", serde_json::to_string_pretty(&v)?);
        return Ok(());
    }
    match resource {
        "pods" => {
            let list = api.pods(nsq, &query).await?;
            println!("{:<20} {:<40} {:<18} {:>8} {:>6}", "NAMESPACE", "NAME", "STATUS", "RESTARTS", "AGE");
            for p in list.pods.iter() {
                println!(
                    "{:<20} {:<40} {:<18} {:>8} {:>6}",
                    p.object_meta.namespace.as_deref().unwrap_or("-"),
                    p.object_meta.name,
                    p.status,
                    p.restart_count,
                    age(&p.object_meta)
                );
            }
            for m in list.cumulative_metrics.iter() {
                let last = m.data_points.last().map(|p| p.y.to_string()).unwrap_or_else(|| "-".into());
                println!("# {} {:?}: {}", m.metric_name, m.aggregation, last);
            }
            println!("# {} of {} pods", list.pods.len(), list.list_meta.total_items);
            print_errors(&list.errors);
        }
        "deployments" => {
            let list = api.deployments(nsq, &query).await?;
            println!("{:<20} {:<40} {:>7} {:>8} {:>6}", "NAMESPACE", "NAME", "READY", "WARNINGS", "AGE");
            for d in list.deployments.iter() {
                let ready = format!("{}/{}", d.pods.running, d.pods.desired.unwrap_or(d.pods.current));
                println!(
                    "{:<20} {:<40} {:>7} {:>8} {:>6}",
                    d.object_meta.namespace.as_deref().unwrap_or("-"),
                    d.object_meta.name,
                    ready,
                    d.pods.warnings.len(),
                    age(&d.object_meta)
                );
            }
            println!(
                "# {} of {} deployments (running {}, pending {}, failed {})",
                list.deployments.len(),
                list.list_meta.total_items,
                list.status.running,
                list.status.pending,
                list.status.failed
            );
            print_errors(&list.errors);
        }
        "services" => {
            let list = api.services(nsq, &query).await?;
            println!("{:<20} {:<30} {:<14} {:<16} {:>6}", "NAMESPACE", "NAME", "TYPE", "CLUSTER-IP", "AGE");
            for s in list.services.iter() {
                println!(
                    "{:<20} {:<30} {:<14} {:<16} {:>6}",
                    s.object_meta.namespace.as_deref().unwrap_or("-"),
                    s.object_meta.name,
                    s.type_,
                    s.cluster_ip.as_deref().unwrap_or("-"),
                    age(&s.object_meta)
                );
            }
            println!("# {} of {} services", list.services.len(), list.list_meta.total_items);
            print_errors(&list.errors);
        }
        "events" => {
            let list = api.events(nsq, &query).await?;
            println!("{:<20} {:<8} {:<20} {:<30} MESSAGE", "NAMESPACE", "TYPE", "REASON", "OBJECT");
            for e in list.events.iter() {
                println!(
                    "{:<20} {:<8} {:<20} {:<30} {}",
                    e.object_meta.namespace.as_deref().unwrap_or("-"),
                    e.type_,
                    e.reason,
                    format!("{}/{}", e.object_kind.to_lowercase(), e.object),
                    e.message
                );
            }
            println!("# {} of {} events", list.events.len(), list.list_meta.total_items);
            print_errors(&list.errors);
        }
        other => anyhow::bail!("no list handler for {}", other),
    }
    info!(resource, took_ms = %t0.elapsed().as_millis(), "list done");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let nsq = NamespaceQuery::parse(&cli.namespace);
    let api = InProcApi::connect().await.context("connecting to cluster")?;

    let res = match &cli.command {
        Commands::Pods(args) => run_list(&api, "pods", &nsq, args, cli.output).await,
        Commands::Deployments(args) => run_list(&api, "deployments", &nsq, args, cli.output).await,
        Commands::Services(args) => run_list(&api, "services", &nsq, args, cli.output).await,
        Commands::Events(args) => run_list(&api, "events", &nsq, args, cli.output).await,
        Commands::Get { resource, name } => {
            let kind = ResourceKind::from_name(resource).with_context(|| format!("unknown resource: {}", resource))?;
            let ns = match &nsq {
                NamespaceQuery::Only(list) => list.first().map(String::as_str),
                NamespaceQuery::All => None,
            };
            let ns = if kind.namespaced() { Some(ns.unwrap_or("default")) } else { None };
            match api.get_raw(kind, ns, name).await {
                Ok(bytes) => {
                    let v: serde_json::Value = serde_json::from_slice(&bytes)?;
                    println!("{}", serde_json::to_string_pretty(&v)?);
                    Ok(())
                }
                Err(e) => Err(e.into()),
            }
        }
    };
    if let Err(e) = &res {
        error!(error = %e, "command failed");
    }
    res
}
