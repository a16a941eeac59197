use anyhow::{Context, Result};
use tracing::{error, info};

use linked_roles::{Client, ClientConfig, MetadataRecord, MetadataType};

fn records() -> linked_roles::Result<Vec<MetadataRecord>> {
    Ok(vec![
        MetadataRecord::new(
            "matches",
            "Matches",
            Some("Minimum matches played".to_string()),
            MetadataType::IntegerGreaterThanOrEqual,
        )?,
        MetadataRecord::new(
            "winrate",
            "Win Rate",
            Some("Minimum win rate in percent".to_string()),
            MetadataType::IntegerGreaterThanOrEqual,
        )?,
        MetadataRecord::new(
            "combat_score",
            "Combat Score",
            Some("Minimum average combat score".to_string()),
            MetadataType::IntegerGreaterThanOrEqual,
        )?,
        MetadataRecord::new(
            "last_update",
            "Last Update",
            Some("Days since the last stats update".to_string()),
            MetadataType::DatetimeLessThanOrEqual,
        )?,
        MetadataRecord::new(
            "verified",
            "Verified",
            Some("Linked a verified account".to_string()),
            MetadataType::BooleanEqual,
        )?,
    ])
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = ClientConfig::from_env().context("Failed to load configuration")?;
    if config.bot_token().is_none() {
        anyhow::bail!("DISCORD_TOKEN is required to register metadata");
    }

    info!(
        application_id = config.application_id(),
        "Registering role connection metadata"
    );

    let client = Client::new(config);
    client.start().await?;

    let result = client.register_schema(records()?, true).await;
    client.close();

    match result {
        Ok(registered) => {
            for record in &registered {
                info!(
                    key = record.key(),
                    kind = ?record.kind(),
                    "Registered {}",
                    record.name()
                );
            }
            Ok(())
        }
        Err(e) => {
            error!("Failed to register metadata: {}", e);
            Err(e.into())
        }
    }
}
