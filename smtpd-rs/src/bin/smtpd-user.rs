//! CLI tool for managing SMTP user accounts
//!
//! Talks to the credential store directly, bypassing the server.
//!
//! # Usage
//!
//! ```bash
//! # Add a new user
//! smtpd-user add user@example.com password123 --db "sqlite://users.db?mode=rwc"
//!
//! # Check a password
//! smtpd-user verify user@example.com password123 --db sqlite://users.db
//!
//! # Disable an account without deleting it
//! smtpd-user disable user@example.com --db sqlite://users.db
//!
//! # List all users
//! smtpd-user list --db sqlite://users.db
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use smtpd_rs::security::Authenticator;

#[derive(Parser)]
#[command(name = "smtpd-user")]
#[command(about = "Manage SMTP user accounts", long_about = None)]
struct Cli {
    /// Database URL (e.g., sqlite://users.db)
    #[arg(short, long, default_value = "sqlite://users.db?mode=rwc")]
    db: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a new user
    Add {
        /// User email address
        email: String,
        /// User password
        password: String,
    },
    /// Verify a password against the store
    Verify {
        email: String,
        password: String,
    },
    /// Enable a disabled account
    Enable {
        email: String,
    },
    /// Disable an account without deleting it
    Disable {
        email: String,
    },
    /// Delete a user
    Delete {
        email: String,
    },
    /// List all users
    List,
    /// Print a single user's details
    Show {
        email: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let auth = Authenticator::new(&cli.db).await?;

    match cli.command {
        Commands::Add { email, password } => {
            if auth.user_exists(&email).await? {
                eprintln!("Error: User {} already exists", email);
                std::process::exit(1);
            }

            auth.create_user(&email, &password).await?;
            println!("User {} added successfully", email);
        }
        Commands::Verify { email, password } => {
            if auth.verify(&email, &password).await? {
                println!("Credentials accepted for {}", email);
            } else {
                eprintln!("Credentials rejected for {}", email);
                std::process::exit(1);
            }
        }
        Commands::Enable { email } => {
            if !auth.user_exists(&email).await? {
                eprintln!("Error: User {} does not exist", email);
                std::process::exit(1);
            }

            auth.set_enabled(&email, true).await?;
            println!("User {} enabled", email);
        }
        Commands::Disable { email } => {
            if !auth.user_exists(&email).await? {
                eprintln!("Error: User {} does not exist", email);
                std::process::exit(1);
            }

            auth.set_enabled(&email, false).await?;
            println!("User {} disabled", email);
        }
        Commands::Delete { email } => {
            if !auth.user_exists(&email).await? {
                eprintln!("Error: User {} does not exist", email);
                std::process::exit(1);
            }

            auth.delete_user(&email).await?;
            println!("User {} deleted", email);
        }
        Commands::List => {
            let users = auth.list_users().await?;

            if users.is_empty() {
                println!("No users found.");
            } else {
                println!(
                    "{:<30} {:<10} {:<20} {:<20}",
                    "Email", "Enabled", "Created At", "Last Login"
                );
                println!("{:-<80}", "");

                for user in &users {
                    println!(
                        "{:<30} {:<10} {:<20} {:<20}",
                        user.email,
                        if user.enabled { "yes" } else { "no" },
                        user.created_at,
                        user.last_login.as_deref().unwrap_or("Never")
                    );
                }

                println!("\nTotal: {} user(s)", users.len());
            }
        }
        Commands::Show { email } => {
            match auth.lookup(&email).await? {
                Some(user) => {
                    println!("Email:      {}", user.email);
                    println!("Enabled:    {}", if user.enabled { "yes" } else { "no" });
                    println!("Created:    {}", user.created_at);
                    println!(
                        "Last login: {}",
                        user.last_login.as_deref().unwrap_or("Never")
                    );
                }
                None => {
                    eprintln!("Error: User {} does not exist", email);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
