//! modelgate CLI - validate and self-test LLM dispatch configuration.

use anyhow::Result;
use clap::{Parser, Subcommand};
use modelgate::selftest::{self, Stage};
use modelgate::ResolvedConfig;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "modelgate")]
#[command(version)]
#[command(about = "Provider-routed, rate-limited LLM dispatch layer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the staged setup self-test (includes one live call per role)
    Selftest,

    /// Resolve and validate configuration without any network calls
    Validate,

    /// Show an example .env configuration
    Example,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");
}

fn print_example_config() {
    let example = r#"# modelgate configuration
#
# Each role binds to a provider:vendor/model spec. Unset roles stay
# unbound; calls to them fail fast.

# OpenRouter gateway (latest Anthropic models)
FAST_LLM=openrouter:anthropic/claude-3.5-haiku
SMART_LLM=openrouter:anthropic/claude-sonnet-4
STRATEGIC_LLM=openrouter:anthropic/claude-opus-4.1
OPENROUTER_API_KEY=sk-or-your-key-here
OPENROUTER_LIMIT_RPS=2.0
OPENROUTER_LIMIT_BURST=1

# Direct OpenAI instead:
# FAST_LLM=openai:gpt-4o-mini
# SMART_LLM=openai:gpt-4o
# OPENAI_API_KEY=sk-your-key-here

# Local Ollama (no key needed):
# FAST_LLM=ollama:llama3
# OLLAMA_BASE_URL=http://localhost:11434/v1
"#;
    println!("{example}");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    // Missing .env is fine; the process environment may carry everything
    let _ = dotenv::dotenv();

    match cli.command {
        Commands::Example => {
            print_example_config();
            Ok(())
        }

        Commands::Validate => match ResolvedConfig::from_env() {
            Ok(config) => {
                info!("Configuration is valid");
                for binding in config.bindings() {
                    let budget = config.budget(binding.provider);
                    println!(
                        "  {:<10} -> {}:{} ({} rps, burst {})",
                        binding.role.to_string(),
                        binding.provider,
                        binding.vendor_model,
                        budget.requests_per_second,
                        budget.burst,
                    );
                }
                if config.bound_roles().is_empty() {
                    println!("  (no roles bound)");
                }
                Ok(())
            }
            Err(report) => {
                eprintln!("{report}");
                std::process::exit(1);
            }
        },

        Commands::Selftest => {
            let report = selftest::run_from_env().await;

            for stage in [Stage::Credentials, Stage::Resolution, Stage::LiveCall] {
                let outcomes: Vec<_> = report.stage_outcomes(stage).collect();
                if outcomes.is_empty() {
                    continue;
                }
                println!("\n=== {stage} ===");
                for outcome in outcomes {
                    match &outcome.detail {
                        Some(detail) => {
                            println!("  [{}] {:<12} {detail}", outcome.status, outcome.subject)
                        }
                        None => println!("  [{}] {}", outcome.status, outcome.subject),
                    }
                }
            }

            if report.passed() {
                println!("\nSelf-test passed.");
                Ok(())
            } else {
                println!("\nSelf-test FAILED.");
                std::process::exit(1);
            }
        }
    }
}
