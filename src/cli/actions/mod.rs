pub mod cost;
pub mod users;
pub mod watch;

// Internal "interpreter" for `Action`.
// We keep the match in a separate module so `mod.rs` stays small as more actions are added.
mod run;

use crate::cli::globals::GlobalArgs;
use secrecy::SecretString;

#[derive(Debug)]
pub enum Action {
    Add {
        globals: GlobalArgs,
        username: String,
        password: SecretString,
    },
    Modify {
        globals: GlobalArgs,
        username: String,
        password: SecretString,
    },
    Passwd {
        globals: GlobalArgs,
        username: String,
        old_password: SecretString,
        new_password: SecretString,
    },
    Delete {
        globals: GlobalArgs,
        username: String,
    },
    Verify {
        globals: GlobalArgs,
        username: String,
        password: SecretString,
    },
    List {
        globals: GlobalArgs,
        json: bool,
    },
    Cost {
        globals: GlobalArgs,
        cost: Option<u32>,
    },
    Watch {
        globals: GlobalArgs,
    },
}

impl Action {
    // Convenience wrapper so call sites can do `action.execute().await`.
    /// Execute the action.
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self) -> anyhow::Result<()> {
        run::execute(self).await
    }
}
