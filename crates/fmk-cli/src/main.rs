use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fmk_schemas::{EquipmentType, Urgency};

#[derive(Parser)]
#[command(name = "fmk")]
#[command(about = "FreightMarket operations CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> site)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Price a lane from the command line
    Quote {
        #[arg(long)]
        origin: String,

        #[arg(long)]
        destination: String,

        /// Load weight in kilograms
        #[arg(long = "weight-kg")]
        weight_kg: i64,

        /// dry_van | flatbed | refrigerated | tanker | container
        #[arg(long)]
        equipment: String,

        /// standard | express | urgent
        #[arg(long, default_value = "standard")]
        urgency: String,
    },

    /// Transition journal utilities
    Journal {
        #[command(subcommand)]
        cmd: JournalCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,

    /// Apply SQL migrations. Guardrail: refuses when any shipment is
    /// ASSIGNED/IN_TRANSIT unless --yes is provided.
    Migrate {
        /// Acknowledge you are migrating a DB with shipments mid-workflow.
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum JournalCmd {
    /// Verify the hash chain of a journal file
    Verify {
        #[arg(long)]
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => match cmd {
            DbCmd::Status => {
                let pool = fmk_db::connect_from_env().await?;
                let st = fmk_db::status(&pool).await?;
                println!("db ok: {}", st.ok);
                println!("shipments table present: {}", st.has_shipments_table);
                if st.has_shipments_table {
                    let busy = fmk_db::count_in_progress_shipments(&pool).await?;
                    println!("shipments mid-workflow: {busy}");
                }
            }
            DbCmd::Migrate { yes } => {
                let pool = fmk_db::connect_from_env().await?;

                // Guardrail: a schema change under assigned/in_transit loads
                // needs an explicit acknowledgement.
                let busy = fmk_db::count_in_progress_shipments(&pool).await?;
                if busy > 0 && !yes {
                    bail!(
                        "refusing to migrate: {busy} shipment(s) are mid-workflow \
                         (assigned/in_transit). Re-run with --yes to acknowledge."
                    );
                }

                fmk_db::migrate(&pool).await?;
                println!("migrations applied");
            }
        },

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(String::as_str).collect();
            let loaded = fmk_config::load_layered_json(&path_refs)?;
            println!("config_hash: {}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Quote {
            origin,
            destination,
            weight_kg,
            equipment,
            urgency,
        } => {
            let equipment = EquipmentType::parse(&equipment)
                .with_context(|| format!("unknown equipment type: {equipment}"))?;
            let urgency = Urgency::parse(&urgency)
                .with_context(|| format!("unknown urgency: {urgency}"))?;

            let quote = fmk_pricing::estimate(&fmk_pricing::QuoteRequest {
                origin_city: origin,
                destination_city: destination,
                weight_kg,
                equipment,
                urgency,
            })?;

            println!("{}", serde_json::to_string_pretty(&quote)?);
        }

        Commands::Journal { cmd } => match cmd {
            JournalCmd::Verify { path } => match fmk_audit::verify_hash_chain(&path)? {
                fmk_audit::VerifyResult::Valid { lines } => {
                    println!("journal chain valid ({lines} entries)");
                }
                fmk_audit::VerifyResult::Broken { line, reason } => {
                    bail!("journal chain BROKEN at line {line}: {reason}");
                }
            },
        },
    }

    Ok(())
}
