use crate::cli::{
    actions::Action,
    commands::{
        ARG_COST, ARG_FILE, ARG_JSON, ARG_LOAD_TIMEOUT_MS, ARG_OLD_PASSWORD, ARG_PASSWORD,
        ARG_POLL_SECONDS, ARG_USERNAME,
    },
    globals::GlobalArgs,
};
use anyhow::{Context, Result, anyhow, bail};
use secrecy::SecretString;
use std::{path::PathBuf, time::Duration};

fn globals(matches: &clap::ArgMatches) -> Result<GlobalArgs> {
    let file = matches
        .get_one::<String>(ARG_FILE)
        .map(PathBuf::from)
        .context("missing required argument: --file")?;

    let mut globals = GlobalArgs::new(file);
    if let Some(seconds) = matches.get_one::<u64>(ARG_POLL_SECONDS) {
        globals.poll_interval = Duration::from_secs(*seconds);
    }
    if let Some(millis) = matches.get_one::<u64>(ARG_LOAD_TIMEOUT_MS) {
        globals.load_timeout = Duration::from_millis(*millis);
    }
    Ok(globals)
}

fn username(matches: &clap::ArgMatches) -> Result<String> {
    matches
        .get_one::<String>(ARG_USERNAME)
        .cloned()
        .context("missing required argument: <username>")
}

/// Password from the flag or environment, prompting on the terminal otherwise.
fn password(matches: &clap::ArgMatches, arg: &str, prompt: &str) -> Result<SecretString> {
    if let Some(password) = matches.get_one::<String>(arg) {
        return Ok(SecretString::from(password.clone()));
    }

    rpassword::prompt_password(prompt)
        .map(SecretString::from)
        .context("failed to read password")
}

/// Prompt twice for a password that is about to be stored.
fn new_password(matches: &clap::ArgMatches) -> Result<SecretString> {
    if let Some(password) = matches.get_one::<String>(ARG_PASSWORD) {
        return Ok(SecretString::from(password.clone()));
    }

    let first = rpassword::prompt_password("New password: ").context("failed to read password")?;
    let second =
        rpassword::prompt_password("Retype new password: ").context("failed to read password")?;
    if first != second {
        bail!("passwords do not match");
    }
    Ok(SecretString::from(first))
}

/// Build the `Action` for the parsed command line.
///
/// # Errors
/// Returns an error if required arguments are missing or a password prompt fails.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let globals = globals(matches)?;

    match matches.subcommand() {
        Some(("add", sub)) => Ok(Action::Add {
            globals,
            username: username(sub)?,
            password: new_password(sub)?,
        }),
        Some(("modify", sub)) => Ok(Action::Modify {
            globals,
            username: username(sub)?,
            password: new_password(sub)?,
        }),
        Some(("passwd", sub)) => Ok(Action::Passwd {
            globals,
            username: username(sub)?,
            old_password: password(sub, ARG_OLD_PASSWORD, "Current password: ")?,
            new_password: new_password(sub)?,
        }),
        Some(("delete", sub)) => Ok(Action::Delete {
            globals,
            username: username(sub)?,
        }),
        Some(("verify", sub)) => Ok(Action::Verify {
            globals,
            username: username(sub)?,
            password: password(sub, ARG_PASSWORD, "Password: ")?,
        }),
        Some(("list", sub)) => Ok(Action::List {
            globals,
            json: sub.get_flag(ARG_JSON),
        }),
        Some(("cost", sub)) => Ok(Action::Cost {
            globals,
            cost: sub.get_one::<u32>(ARG_COST).copied(),
        }),
        Some(("watch", _)) => Ok(Action::Watch { globals }),
        Some((name, _)) => Err(anyhow!("unknown subcommand: {name}")),
        None => Err(anyhow!("missing subcommand")),
    }
}
