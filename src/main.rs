use candlelend::{
    config::{self, database},
    core::{loan, report},
    errors::Result,
    gateway::{HttpAuthProvider, HttpGateway},
};
use dotenvy::dotenv;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const CONFIG_PATH: &str = "config.toml";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file; env vars can also be set externally
    dotenv().ok();

    // 3. Settings file plus env overrides
    let settings = config::load_settings(CONFIG_PATH)
        .inspect_err(|e| error!("Failed to load {}: {}", CONFIG_PATH, e))?;

    // 4. Open the store and make sure the tables exist
    let db = database::create_connection(&settings.database_url())
        .await
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    database::create_tables(&db)
        .await
        .inspect(|()| info!("Database initialized successfully."))?;

    // 5. Make sure the outbound client settings are usable
    HttpGateway::new(&settings.gateway)
        .inspect_err(|e| error!("Invalid gateway settings: {}", e))?;
    HttpAuthProvider::new(&settings.auth)
        .inspect_err(|e| error!("Invalid auth settings: {}", e))?;
    info!(
        "Payment gateway at {} ({:?} checkout), auth at {}",
        settings.gateway.base_url, settings.gateway.flow, settings.auth.base_url
    );

    // 6. Summarize the ledger
    let open = loan::list_open_loans(&db).await?;
    info!("{} loans open for funding", open.len());
    for l in &open {
        let totals = [(l.id, l.funded_total)].into_iter().collect();
        info!(
            "  #{} {} ({}): {}",
            l.id,
            l.name,
            l.country,
            report::LoanProgress::from_totals(l, &totals).summary()
        );
    }

    for (rank, entry) in report::community_leaderboard(&db).await?.iter().enumerate().take(10) {
        info!(
            "{}. {} funded {} across {} loans",
            rank + 1,
            entry.name,
            candlelend::core::validation::format_cents(entry.impact.total_funded),
            entry.impact.loans_funded
        );
    }

    Ok(())
}
