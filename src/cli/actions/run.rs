use crate::cli::actions::{Action, cost, users, watch};
use anyhow::Result;

/// Execute the provided action.
// This is the single dispatch point for all CLI actions.
/// # Errors
/// Returns an error if the action fails.
pub async fn execute(action: Action) -> Result<()> {
    match action {
        Action::Add {
            globals,
            username,
            password,
        } => users::add(&globals, &username, &password).await,
        Action::Modify {
            globals,
            username,
            password,
        } => users::modify(&globals, &username, &password).await,
        Action::Passwd {
            globals,
            username,
            old_password,
            new_password,
        } => users::passwd(&globals, &username, &old_password, &new_password).await,
        Action::Delete { globals, username } => users::delete(&globals, &username).await,
        Action::Verify {
            globals,
            username,
            password,
        } => users::verify(&globals, &username, &password).await,
        Action::List { globals, json } => users::list(&globals, json).await,
        Action::Cost { globals, cost } => cost::execute(&globals, cost).await,
        Action::Watch { globals } => watch::execute(&globals).await,
    }
}
