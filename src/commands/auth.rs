//! Account and session commands

use crate::error::Result;
use crate::sync::SyncEngine;
use colored::Colorize;

/// Create an account. The new user still has to log in.
pub async fn register(engine: &SyncEngine, username: &str, password: &str) -> Result<()> {
    tracing::info!("Registering user {}", username);
    let user = engine.register(username, password).await?;
    println!(
        "{}",
        format!("Registered {} (id {})", user.username, user.id).green()
    );
    println!("Log in with {}", format!("parley login {}", user.username).cyan());
    Ok(())
}

/// Log in and persist the session.
pub async fn login(engine: &SyncEngine, username: &str, password: &str) -> Result<()> {
    tracing::info!("Logging in as {}", username);
    let identity = engine.login(username, password).await?;
    println!(
        "{}",
        format!("Logged in as {} (id {})", identity.username, identity.id).green()
    );
    Ok(())
}

/// Forget the persisted session.
pub async fn logout(engine: &SyncEngine) -> Result<()> {
    if !engine.is_logged_in().await {
        println!("{}", "Not logged in.".yellow());
        return Ok(());
    }
    engine.logout().await?;
    println!("{}", "Logged out.".green());
    Ok(())
}

/// Show the logged-in user.
pub async fn whoami(engine: &SyncEngine) -> Result<()> {
    if !engine.is_logged_in().await {
        println!("{}", "Not logged in.".yellow());
        return Ok(());
    }
    let identity = engine.current_user().await?;
    println!("{} (id {})", identity.username.bold(), identity.id);
    Ok(())
}
