//! mantix-auth - operator CLI for the Mantix identity realm.
//!
//! Thin consumer of the session core: interactive login/logout, session
//! inspection, a foreground refresh watcher, and the privileged directory
//! operations (user provisioning, password resets, role assignment).

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mantix_auth::auth::{
    FileTokenStore, KeyringTokenStore, SessionManager, SessionState, TokenStore,
};
use mantix_auth::models::{NewUser, UserUpdate};
use mantix_auth::{AdminClient, Config, TokenClient};

/// Realm role granted to newly registered users
const DEFAULT_USER_ROLE: &str = "user";

type Manager = SessionManager<Box<dyn TokenStore>, TokenClient>;

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn token_store() -> Result<Box<dyn TokenStore>> {
    if std::env::var("MANTIX_USE_KEYRING").map(|v| v == "1").unwrap_or(false) {
        Ok(Box::new(KeyringTokenStore))
    } else {
        Ok(Box::new(FileTokenStore::new(Config::token_path()?)))
    }
}

fn prompt(label: &str) -> Result<String> {
    eprint!("{}: ", label);
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin()
        .read_line(&mut line)
        .context("Failed to read input")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn usage() -> ! {
    eprintln!(
        "Usage: mantix-auth <command>\n\
         \n\
         Session commands:\n\
         \x20 login <username>          log in with the password grant\n\
         \x20 whoami                    show the current session claims\n\
         \x20 refresh                   force one token refresh\n\
         \x20 watch                     keep the session refreshed until Ctrl-C\n\
         \x20 logout                    revoke and clear the session\n\
         \n\
         Directory commands (service account):\n\
         \x20 users list\n\
         \x20 users create <username> <email> <first> <last>\n\
         \x20 users update <id> <email> <first> <last>\n\
         \x20 users delete <id>\n\
         \x20 users reset-password <id>"
    );
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = Config::load()?;
    let tokens = TokenClient::new(&config)?;
    let manager: Arc<Manager> = Arc::new(SessionManager::new(
        token_store()?,
        tokens.clone(),
        Duration::from_secs(config.refresh_interval_secs),
    ));

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("login") => {
            let username = args.get(2).cloned().unwrap_or_else(|| usage());
            let password = prompt("Password")?;
            let claims = manager.login(&username, &password).await?;
            println!("Logged in as {} ({})", claims.username, claims.email);
        }
        Some("whoami") => {
            let Some(claims) = manager.current_claims() else {
                bail!("No session. Run `mantix-auth login <username>` first.");
            };
            println!("subject:  {}", claims.subject);
            println!("username: {}", claims.username);
            println!("email:    {}", claims.email);
            println!("name:     {} {}", claims.given_name, claims.family_name);
            let mut roles: Vec<_> = claims.roles.iter().cloned().collect();
            roles.sort();
            println!("roles:    {}", roles.join(", "));
            println!("expires:  {}", claims.expiry.to_rfc3339());
            println!(
                "status:   {}",
                if manager.is_authenticated() { "valid" } else { "expired" }
            );
        }
        Some("refresh") => {
            manager.refresh_once().await?;
            println!("Session refreshed");
        }
        Some("watch") => {
            if !manager.is_authenticated() {
                bail!("No valid session to watch. Log in first.");
            }
            watch(&manager).await?;
        }
        Some("logout") => {
            manager.logout().await?;
            println!("Logged out");
        }
        Some("users") => {
            let admin = AdminClient::new(&config, tokens);
            users_command(&admin, &args[2..]).await?;
        }
        _ => usage(),
    }

    Ok(())
}

/// Run the refresh loop in the foreground, reporting state transitions,
/// until Ctrl-C or a forced logout.
async fn watch(manager: &Arc<Manager>) -> Result<()> {
    let mut states = manager.subscribe();
    let handle = manager.spawn_refresh_loop();
    info!("Watching session; Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Stopping");
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow();
                match state {
                    SessionState::Refreshing => {}
                    SessionState::Active => println!("Session refreshed"),
                    SessionState::LoggedOut => {
                        println!("Session ended; log in again");
                        break;
                    }
                }
            }
        }
    }

    handle.stop().await;
    Ok(())
}

async fn users_command(admin: &AdminClient, args: &[String]) -> Result<()> {
    match args.first().map(String::as_str) {
        Some("list") => {
            let users = admin.list_users().await?;
            println!("{:<38} {:<20} {:<30} {}", "ID", "USERNAME", "EMAIL", "NAME");
            for user in &users {
                println!(
                    "{:<38} {:<20} {:<30} {}",
                    user.id.as_deref().unwrap_or("-"),
                    user.username.as_deref().unwrap_or("-"),
                    user.email.as_deref().unwrap_or("-"),
                    user.display_name(),
                );
            }
            println!("{} user(s)", users.len());
        }
        Some("create") => {
            let [username, email, first_name, last_name] = args.get(1..5).map(|s| s.to_vec())
                .and_then(|v| <[String; 4]>::try_from(v).ok())
                .unwrap_or_else(|| usage());
            let password = prompt("Initial password")?;
            let id = admin
                .register_user(
                    &NewUser {
                        username,
                        email,
                        first_name,
                        last_name,
                        password,
                    },
                    DEFAULT_USER_ROLE,
                )
                .await?;
            println!("Created user {}", id);
        }
        Some("update") => {
            let [id, email, first_name, last_name] = args.get(1..5).map(|s| s.to_vec())
                .and_then(|v| <[String; 4]>::try_from(v).ok())
                .unwrap_or_else(|| usage());
            admin
                .update_user(
                    &id,
                    &UserUpdate {
                        email,
                        first_name,
                        last_name,
                    },
                )
                .await?;
            println!("Updated user {}", id);
        }
        Some("delete") => {
            let id = args.get(1).unwrap_or_else(|| usage());
            admin.delete_user(id).await?;
            println!("Deleted user {}", id);
        }
        Some("reset-password") => {
            let id = args.get(1).unwrap_or_else(|| usage());
            let password = prompt("New password")?;
            admin.reset_password(id, &password).await?;
            println!("Password reset for {}", id);
        }
        _ => usage(),
    }
    Ok(())
}
