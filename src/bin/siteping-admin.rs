use anyhow::Result;
use clap::{Parser, Subcommand};
use siteping::accounts::AccountManager;
use siteping::buckets::UtcOffset;
use siteping::config::Config;
use siteping::storage;
use siteping::tracker::Tracker;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "siteping-admin")]
#[command(about = "siteping account management CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a user
    CreateUser {
        /// User ID (case-sensitive)
        user_id: String,
        /// Initial password
        password: String,
    },
    /// Replace a user's token; the password keeps working
    RotateToken {
        user_id: String,
    },
    /// Replace a user's password; the token keeps working
    SetPassword {
        user_id: String,
        password: String,
    },
    /// List all users with their site counts
    List,
    /// Print a user's full export as JSON
    Dump {
        user_id: String,
        /// UTC offset in minutes used for the day/month/year buckets
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        utcoffset: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    // Ensure database is initialized
    let storage = storage::connect(&config.database).await?;
    let accounts = AccountManager::new(Arc::clone(&storage));
    let tracker = Tracker::new(Arc::clone(&storage));

    match cli.command {
        Commands::CreateUser { user_id, password } => {
            accounts.create(&user_id, &password).await?;
            let token = accounts.read_token(&user_id).await?;
            println!("✓ Created user '{}'", user_id);
            println!("  token: {}", token);
        }
        Commands::RotateToken { user_id } => {
            let token = accounts.rotate_token(&user_id).await?;
            println!("✓ Rotated token for '{}'", user_id);
            println!("  token: {}", token);
        }
        Commands::SetPassword { user_id, password } => {
            accounts.change_password(&user_id, &password).await?;
            println!("✓ Changed password for '{}'", user_id);
        }
        Commands::List => {
            let users = accounts.list_users().await?;
            if users.is_empty() {
                println!("No users found.");
            } else {
                println!("{:<40} {:>8} {:>12}", "User ID", "Sites", "Visits");
                println!("{}", "-".repeat(62));
                for user_id in users {
                    let links = tracker.get_site_links(&user_id).await?;
                    let visits: i64 = links.values().sum();
                    println!("{:<40} {:>8} {:>12}", user_id, links.len(), visits);
                }
            }
        }
        Commands::Dump { user_id, utcoffset } => {
            let offset: UtcOffset = utcoffset.parse()?;
            let dump = tracker.dump(&accounts, &user_id, offset).await?;
            println!("{}", serde_json::to_string_pretty(&dump)?);
        }
    }

    storage.close().await;
    Ok(())
}
