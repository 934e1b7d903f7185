use anyhow::Result;
use clap::{Parser, Subcommand};
use repogate::settings::{Settings, StoreSettings};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP server
    Serve,
    /// Check configuration for errors and unused options
    CheckConfig,
}

fn print_summary(settings: &Settings) {
    println!(
        "  server:      {}:{}",
        settings.server.host, settings.server.port
    );
    let store = match &settings.store {
        StoreSettings::Memory => "memory",
        StoreSettings::Postgres { .. } => "postgres",
    };
    println!("  store:       {}", store);
    println!("  repo-server: {}", settings.repo_server.url);
    println!(
        "  hydrator:    {}",
        if settings.hydrator.enabled {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!("  policies:    {}", settings.rbac.policies.len());
    if let StoreSettings::Memory = settings.store {
        println!(
            "  seed:        {} projects, {} credential templates, {} applications",
            settings.seed.projects.len(),
            settings.seed.repository_credentials.len(),
            settings.seed.applications.len()
        );
        if settings.seed.projects.is_empty() {
            println!("  ! no projects seeded: app discovery and app details will fail with 'project not found'");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve => {
            let settings = Settings::new()?;
            repogate::run_server(settings).await
        }
        Commands::CheckConfig => {
            println!("Checking configuration...");
            match Settings::new() {
                Ok(settings) => {
                    println!("✓ Configuration is valid");
                    print_summary(&settings);
                    Ok(())
                }
                Err(e) => {
                    eprintln!("✗ Configuration error: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }
}
