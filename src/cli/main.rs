use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tim-cli")]
#[command(about = "Topology Incident Manager CLI", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080", env = "TIM_ENDPOINT")]
    endpoint: String,

    /// Tenant sent in the x-tenant-id header
    #[arg(short, long, env = "TIM_TENANT")]
    tenant: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the service graph
    Topology {
        /// Include services without dependency edges
        #[arg(short, long)]
        all: bool,

        /// Comma separated service names
        #[arg(short, long)]
        services: Option<String>,

        #[arg(short, long)]
        environment: Option<String>,
    },

    /// List applications
    Apps,

    /// Create an application
    CreateApp {
        #[arg(short, long)]
        name: String,

        #[arg(short, long)]
        description: Option<String>,

        /// Member service ids
        #[arg(short, long, value_delimiter = ',', required = true)]
        services: Vec<i64>,
    },

    /// Delete an application
    DeleteApp {
        #[arg(value_name = "APPLICATION_ID")]
        id: String,
    },

    /// Import a topology JSON document
    Import {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Replace the tenant's topology instead of merging
        #[arg(short, long)]
        replace: bool,
    },

    /// Submit an alert event
    Alert {
        #[arg(short, long)]
        fingerprint: String,

        #[arg(short, long)]
        name: String,

        #[arg(short, long)]
        service: String,

        #[arg(long, default_value = "firing")]
        status: String,
    },

    /// List incidents
    Incidents {
        #[arg(short, long)]
        application: Option<String>,
    },

    /// Show alerts associated with an incident
    IncidentAlerts {
        #[arg(value_name = "INCIDENT_ID")]
        id: String,
    },

    /// Resolve an incident
    Resolve {
        #[arg(value_name = "INCIDENT_ID")]
        id: String,
    },

    /// Check server health
    Health,
}

fn with_tenant(request: RequestBuilder, tenant: &Option<String>) -> RequestBuilder {
    match tenant {
        Some(tenant) => request.header("x-tenant-id", tenant),
        None => request,
    }
}

async fn print_response(request: RequestBuilder) -> anyhow::Result<()> {
    let response = request.send().await.context("request failed")?;
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);

    println!("{}", serde_json::to_string_pretty(&body)?);
    if !status.is_success() {
        bail!("server returned {}", status);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let endpoint = cli.endpoint.trim_end_matches('/');

    let request = match cli.command {
        Commands::Topology {
            all,
            services,
            environment,
        } => {
            let mut query = vec![("include_empty_deps", all.to_string())];
            if let Some(services) = services {
                query.push(("services", services));
            }
            if let Some(environment) = environment {
                query.push(("environment", environment));
            }
            client.get(format!("{}/topology", endpoint)).query(&query)
        }

        Commands::Apps => client.get(format!("{}/topology/applications", endpoint)),

        Commands::CreateApp {
            name,
            description,
            services,
        } => client
            .post(format!("{}/topology/applications", endpoint))
            .json(&json!({
                "name": name,
                "description": description,
                "services": services.iter().map(|id| json!({ "id": id })).collect::<Vec<_>>(),
            })),

        Commands::DeleteApp { id } => {
            client.delete(format!("{}/topology/applications/{}", endpoint, id))
        }

        Commands::Import { file, replace } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let payload: Value = serde_json::from_str(&content)
                .with_context(|| format!("{} is not valid JSON", file.display()))?;

            client
                .post(format!("{}/topology/import", endpoint))
                .query(&[("replace", replace)])
                .json(&payload)
        }

        Commands::Alert {
            fingerprint,
            name,
            service,
            status,
        } => client
            .post(format!("{}/topology/alerts", endpoint))
            .json(&json!({
                "fingerprint": fingerprint,
                "name": name,
                "service": service,
                "status": status,
            })),

        Commands::Incidents { application } => {
            let mut request = client.get(format!("{}/topology/incidents", endpoint));
            if let Some(application) = application {
                request = request.query(&[("application_id", application)]);
            }
            request
        }

        Commands::IncidentAlerts { id } => {
            client.get(format!("{}/topology/incidents/{}/alerts", endpoint, id))
        }

        Commands::Resolve { id } => {
            client.post(format!("{}/topology/incidents/{}/resolve", endpoint, id))
        }

        Commands::Health => client.get(format!("{}/health", endpoint)),
    };

    print_response(with_tenant(request, &cli.tenant)).await
}
