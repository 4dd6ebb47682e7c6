use crate::context::{machine_name, Context, PromptPassphrase};
use crate::VaultCommand;
use anyhow::{bail, Result};
use sentra_core::keys::{EnvelopeRemote, PassphraseSource};
use sentra_core::session::Session;
use tracing::warn;

pub async fn login(ctx: &Context, token: Option<String>) -> Result<()> {
    let token = match token.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) {
        Some(t) => t,
        None => rpassword::prompt_password("Access token: ")?.trim().to_string(),
    };
    if token.is_empty() {
        bail!("access token cannot be empty");
    }

    let session = Session::new(token);
    let user_id = session.user_id()?;
    if session.is_expired(chrono::Utc::now()) {
        bail!("access token has expired");
    }
    ctx.sessions().save(&session)?;

    let mut cfg = ctx.config()?;
    if cfg.set_user_id(&user_id) {
        ctx.save_config(&cfg)?;
    }
    println!("✔ logged in as {}", user_id);

    // Registration is retried on every push, so a failure here is not fatal.
    let remote = ctx.remote()?;
    let identity = ctx.identity()?;
    if let Err(e) = remote.client.register_machine(&identity, &machine_name()).await {
        warn!("machine registration failed: {}", e);
        println!("Machine not registered yet (retry: sentra machines register)");
    }
    Ok(())
}

pub fn logout(ctx: &Context) -> Result<()> {
    ctx.sessions().clear()?;
    println!("✔ logged out");
    Ok(())
}

pub async fn whoami(ctx: &Context) -> Result<()> {
    let remote = ctx.remote()?;
    let me = remote.client.users_me().await?;
    println!("User:    {}", me.id);
    if let Some(email) = &me.email {
        println!("Email:   {}", email);
    }
    println!("Machine: {} ({})", machine_name(), remote.config.machine_id);
    println!("Server:  {}", remote.client.base_url());
    Ok(())
}

pub async fn vault(ctx: &Context, action: VaultCommand) -> Result<()> {
    let remote = ctx.remote()?;
    let keys = ctx.vault_keys();
    match action {
        VaultCommand::Init => {
            if remote.client.fetch_envelope().await?.is_some() {
                bail!("a vault key already exists for this account (run: sentra vault unlock)");
            }
            ctx.vault_key(&remote).await?;
            println!("✔ vault key created and cached on this machine");
        }
        VaultCommand::Unlock => {
            let Some(envelope) = remote.client.fetch_envelope().await? else {
                bail!("no vault key on the server (run: sentra vault init)");
            };
            let pass = PromptPassphrase.passphrase(false)?;
            let key = keys.unlock(&envelope, &pass)?;
            keys.cache(&remote.user_id, &key);
            println!("✔ vault key unlocked");
        }
        VaultCommand::Forget => {
            keys.forget(&remote.user_id)?;
            println!("✔ cached vault key removed from this machine");
        }
    }
    Ok(())
}
