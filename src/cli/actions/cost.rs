use crate::cli::globals::GlobalArgs;
use anyhow::{Context, Result};
use tracing::info;

/// Print the target cost, or set it and rewrite the file with the new
/// directive. Existing hashes keep their cost until their owner next
/// authenticates.
///
/// # Errors
/// Returns an error if the file cannot be opened or the store stops early.
pub async fn execute(globals: &GlobalArgs, cost: Option<u32>) -> Result<()> {
    let session = globals.open_store(false).await?;

    let Some(cost) = cost else {
        let current = session.store.get_cost().await;
        session.discard().await;
        println!("{}", current.context("failed to read the cost")?);
        return Ok(());
    };

    session.store.set_cost(cost);
    let applied = session.store.get_cost().await;
    session.persist().await?;

    let applied = applied.context("failed to set the cost")?;
    info!(cost = applied, "target cost updated");
    println!("{applied}");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::hash;

    #[tokio::test]
    async fn set_cost_persists_directive() {
        let dir = tempfile::tempdir().unwrap();
        let globals = GlobalArgs::new(dir.path().join("passwd"));
        let h = hash::hash_password("secret", hash::MIN_COST).unwrap();
        tokio::fs::write(&globals.file, format!("$4\nalice:{h}\n"))
            .await
            .unwrap();

        execute(&globals, Some(6)).await.unwrap();

        let contents = tokio::fs::read_to_string(&globals.file).await.unwrap();
        assert_eq!(contents, format!("$6\nalice:{h}\n"));

        let session = globals.open_store(false).await.unwrap();
        assert_eq!(session.store.get_cost().await.unwrap(), 6);
        session.discard().await;
    }

    #[tokio::test]
    async fn reading_the_cost_leaves_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let globals = GlobalArgs::new(dir.path().join("passwd"));
        tokio::fs::write(&globals.file, "# keep me\n$5\n").await.unwrap();

        execute(&globals, None).await.unwrap();

        assert_eq!(
            tokio::fs::read_to_string(&globals.file).await.unwrap(),
            "# keep me\n$5\n"
        );
    }
}
