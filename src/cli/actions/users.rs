use crate::{
    cli::globals::{GlobalArgs, Session},
    hash,
};
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use tracing::info;

/// Persist and stop the store if `result` is a success, otherwise stop it
/// without touching the file.
async fn finish(session: Session, result: crate::Result<()>) -> Result<()> {
    match result {
        Ok(()) => session.persist().await,
        Err(err) => {
            session.discard().await;
            Err(err.into())
        }
    }
}

/// # Errors
/// Returns an error if the user exists, the name is invalid, or hashing fails.
pub async fn add(globals: &GlobalArgs, username: &str, password: &SecretString) -> Result<()> {
    let session = globals.open_store(false).await?;
    let result = session.store.add(username, password.expose_secret()).await;
    finish(session, result)
        .await
        .with_context(|| format!("failed to add {username}"))?;

    info!(username, "user added");
    println!("added {username}");
    Ok(())
}

/// # Errors
/// Returns an error if the user does not exist or hashing fails.
pub async fn modify(globals: &GlobalArgs, username: &str, password: &SecretString) -> Result<()> {
    let session = globals.open_store(false).await?;
    let result = session.store.modify(username, password.expose_secret()).await;
    finish(session, result)
        .await
        .with_context(|| format!("failed to modify {username}"))?;

    info!(username, "password replaced");
    println!("modified {username}");
    Ok(())
}

/// # Errors
/// Returns an error if the user does not exist or the current password is wrong.
pub async fn passwd(
    globals: &GlobalArgs,
    username: &str,
    old_password: &SecretString,
    new_password: &SecretString,
) -> Result<()> {
    let session = globals.open_store(false).await?;
    let result = session
        .store
        .verify_modify(
            username,
            old_password.expose_secret(),
            new_password.expose_secret(),
        )
        .await;
    finish(session, result)
        .await
        .with_context(|| format!("failed to change the password of {username}"))?;

    info!(username, "password changed");
    println!("password changed for {username}");
    Ok(())
}

/// # Errors
/// Returns an error if the user does not exist.
pub async fn delete(globals: &GlobalArgs, username: &str) -> Result<()> {
    let session = globals.open_store(false).await?;
    let result = session.store.delete(username).await;
    finish(session, result)
        .await
        .with_context(|| format!("failed to delete {username}"))?;

    info!(username, "user deleted");
    println!("deleted {username}");
    Ok(())
}

/// Check a password without changing the file.
///
/// # Errors
/// Returns an error if the user does not exist or the password is wrong.
pub async fn verify(globals: &GlobalArgs, username: &str, password: &SecretString) -> Result<()> {
    let session = globals.open_store(false).await?;
    let result = session.store.authenticate(username, password.expose_secret()).await;
    session.discard().await;
    // don't tell which of the two failed
    result.map_err(|_| anyhow::anyhow!("authentication failed for {username}"))?;

    println!("ok");
    Ok(())
}

/// # Errors
/// Returns an error if the file cannot be read or the output cannot be encoded.
pub async fn list(globals: &GlobalArgs, json: bool) -> Result<()> {
    let session = globals.open_store(false).await?;
    let entries = session.store.list().await;
    session.discard().await;

    let mut entries = entries.context("failed to list users")?;
    entries.sort_by(|a, b| a.username.cmp(&b.username));

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for entry in &entries {
        let cost = hash::hash_cost(&entry.password_hash)
            .map_or_else(|_| "?".to_string(), |cost| cost.to_string());
        println!("{}\t{cost}", entry.username);
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn globals(dir: &tempfile::TempDir) -> GlobalArgs {
        GlobalArgs::new(dir.path().join("passwd"))
    }

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    async fn write_cost(globals: &GlobalArgs, cost: u32) {
        tokio::fs::write(&globals.file, format!("${cost}\n"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn add_then_verify() {
        let dir = tempfile::tempdir().unwrap();
        let globals = globals(&dir);
        write_cost(&globals, hash::MIN_COST).await;

        add(&globals, "alice", &secret("secret")).await.unwrap();
        verify(&globals, "alice", &secret("secret")).await.unwrap();
        assert!(verify(&globals, "alice", &secret("wrong")).await.is_err());
        assert!(verify(&globals, "ghost", &secret("secret")).await.is_err());

        let contents = tokio::fs::read_to_string(&globals.file).await.unwrap();
        assert!(contents.starts_with("$4\nalice:$2"), "{contents}");
    }

    #[tokio::test]
    async fn duplicate_add_leaves_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let globals = globals(&dir);
        write_cost(&globals, hash::MIN_COST).await;

        add(&globals, "alice", &secret("one")).await.unwrap();
        let before = tokio::fs::read_to_string(&globals.file).await.unwrap();

        let err = add(&globals, "alice", &secret("two")).await.unwrap_err();
        assert!(err.to_string().contains("alice"));
        assert_eq!(
            tokio::fs::read_to_string(&globals.file).await.unwrap(),
            before
        );
        verify(&globals, "alice", &secret("one")).await.unwrap();
    }

    #[tokio::test]
    async fn modify_passwd_delete() {
        let dir = tempfile::tempdir().unwrap();
        let globals = globals(&dir);
        write_cost(&globals, hash::MIN_COST).await;

        add(&globals, "bob", &secret("x")).await.unwrap();
        modify(&globals, "bob", &secret("y")).await.unwrap();
        verify(&globals, "bob", &secret("y")).await.unwrap();

        assert!(
            passwd(&globals, "bob", &secret("wrong"), &secret("z"))
                .await
                .is_err()
        );
        verify(&globals, "bob", &secret("y")).await.unwrap();

        passwd(&globals, "bob", &secret("y"), &secret("z"))
            .await
            .unwrap();
        verify(&globals, "bob", &secret("z")).await.unwrap();

        delete(&globals, "bob").await.unwrap();
        assert!(verify(&globals, "bob", &secret("z")).await.is_err());
        assert!(delete(&globals, "bob").await.is_err());
    }

    #[tokio::test]
    async fn list_succeeds_on_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let globals = globals(&dir);

        list(&globals, false).await.unwrap();
        list(&globals, true).await.unwrap();
    }
}
