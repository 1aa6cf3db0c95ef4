use clap::Parser;
use std::path::PathBuf;

use callgate::simulate::{self, SimulationPlan};
use callgate::{CallgateError, CallgateResult, Profile, ResilienceConfig};

#[derive(Parser)]
#[command(name = "callgate")]
#[command(about = "Resilient execution layer for outbound service calls", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Print the built-in profiles as TOML
    Profiles {
        /// Only print this profile (voice-api, language-model, data-store)
        #[arg(long)]
        name: Option<Profile>,
    },
    /// Load and validate a configuration file
    CheckConfig {
        /// Path to a TOML configuration file
        path: PathBuf,
    },
    /// Run a synthetic workload through the orchestrator on a virtual clock
    Simulate {
        /// Profile supplying the default settings
        #[arg(long, default_value = "voice-api")]
        profile: Profile,

        /// Service key the requests are made against
        #[arg(long, default_value = "simulated")]
        service: String,

        /// Number of operations to run
        #[arg(long, default_value_t = 100)]
        requests: usize,

        /// Probability in [0, 1] that any single attempt fails
        #[arg(long, default_value_t = 0.1)]
        failure_rate: f64,

        /// Configuration file replacing the profile's settings
        #[arg(long)]
        config: Option<PathBuf>,

        /// Operations in flight at once
        #[arg(long, default_value_t = 5)]
        concurrency: usize,

        /// Seed for the failure generator
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

#[tokio::main]
async fn main() -> CallgateResult<()> {
    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(
        "callgate=info"
            .parse()
            .map_err(|e| CallgateError::Config(format!("Invalid log directive: {}", e)))?,
    );

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Profiles { name } => {
            let profiles = match name {
                Some(profile) => vec![profile],
                None => Profile::ALL.to_vec(),
            };
            for profile in profiles {
                println!("# {}", profile);
                println!("{}", profile.config().to_toml_string()?);
            }
        }
        Commands::CheckConfig { path } => {
            let config = ResilienceConfig::from_file(&path)?;
            tracing::info!("Configuration {} is valid", path.display());

            let summary = serde_json::json!({
                "path": path.display().to_string(),
                "valid": true,
                "services": config.services.keys().collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Simulate {
            profile,
            service,
            requests,
            failure_rate,
            config,
            concurrency,
            seed,
        } => {
            let config = config.map(ResilienceConfig::from_file).transpose()?;
            let report = simulate::run(SimulationPlan {
                profile,
                service,
                requests,
                failure_rate,
                concurrency,
                seed,
                config,
            })
            .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
