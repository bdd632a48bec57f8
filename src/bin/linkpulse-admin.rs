use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use linkpulse::analytics::{AnalyticsService, FilterParams};
use linkpulse::auth::AuthService;
use linkpulse::config::{Config, DatabaseBackend};
use linkpulse::storage::{PostgresStorage, SqliteStorage, Storage, StorageError};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "linkpulse-admin")]
#[command(about = "LinkPulse user and analytics management CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Map a user id (the `id` token claim) to the username that owns clicks
    AddUser {
        user_id: String,
        username: String,
    },
    /// List all user mappings
    ListUsers,
    /// Print per-widget click totals for an owner
    Stats {
        username: String,
    },
    /// Sign a dashboard token for a user id
    IssueToken {
        user_id: String,
        #[arg(long, default_value = "user")]
        role: String,
        #[arg(long, default_value_t = 168)]
        ttl_hours: u64,
    },
}

/// Token lifetime for `--ttl-hours`, saturating instead of overflowing
fn token_ttl(hours: u64) -> Duration {
    Duration::from_secs(hours.saturating_mul(3600))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let storage: Arc<dyn Storage> = match config.database.backend {
        DatabaseBackend::Sqlite => Arc::new(
            SqliteStorage::new(&config.database.url, config.database.max_connections).await?,
        ),
        DatabaseBackend::Postgres => Arc::new(
            PostgresStorage::new(&config.database.url, config.database.max_connections).await?,
        ),
    };

    // Ensure database is initialized
    storage.init().await?;

    match cli.command {
        Commands::AddUser { user_id, username } => {
            match storage.upsert_user(&user_id, &username).await {
                Ok(()) => println!("✓ Mapped user '{}' to username '{}'", user_id, username),
                Err(StorageError::Conflict) => {
                    anyhow::bail!("username '{}' already belongs to another user", username)
                }
                Err(e) => return Err(e).context("failed to save user"),
            }
        }
        Commands::ListUsers => {
            let users = storage.list_users().await?;
            if users.is_empty() {
                println!("No users found.");
            } else {
                println!("{:<40} {}", "User ID", "Username");
                println!("{}", "-".repeat(60));
                for (user_id, username) in users {
                    println!("{:<40} {}", user_id, username);
                }
            }
        }
        Commands::Stats { username } => {
            let analytics = AnalyticsService::new(Arc::clone(&storage));
            let stats = analytics
                .widget_stats(&username, &FilterParams::default())
                .await?;
            if stats.is_empty() {
                println!("No clicks recorded for '{}'.", username);
            } else {
                println!("{:<24} {:>8} {:>8}  {}", "Widget", "Total", "Unique", "URL");
                println!("{}", "-".repeat(80));
                for stat in stats {
                    println!(
                        "{:<24} {:>8} {:>8}  {}",
                        stat.widget_id, stat.total, stat.unique, stat.url
                    );
                }
            }
        }
        Commands::IssueToken {
            user_id,
            role,
            ttl_hours,
        } => {
            let auth = AuthService::new(&config.auth, Arc::clone(&storage));
            if auth.resolve_owner(&user_id).await?.is_none() {
                eprintln!("⚠ User '{}' has no username mapping yet", user_id);
            }
            let token = auth.issue_token(&user_id, &role, token_ttl(ttl_hours))?;
            println!("{}", token);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_ttl_saturates() {
        assert_eq!(token_ttl(168), Duration::from_secs(168 * 3600));
        assert_eq!(token_ttl(u64::MAX), Duration::from_secs(u64::MAX));
    }
}
