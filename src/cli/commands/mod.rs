use crate::hash;
use clap::{
    Arg, ArgAction, ColorChoice, Command,
    builder::{
        ValueParser,
        styling::{AnsiColor, Effects, Styles},
    },
};

pub const ARG_FILE: &str = "file";
pub const ARG_POLL_SECONDS: &str = "poll-seconds";
pub const ARG_LOAD_TIMEOUT_MS: &str = "load-timeout-ms";
pub const ARG_USERNAME: &str = "username";
pub const ARG_PASSWORD: &str = "password";
pub const ARG_OLD_PASSWORD: &str = "old-password";
pub const ARG_COST: &str = "cost";
pub const ARG_JSON: &str = "json";
pub const ARG_VERBOSITY: &str = "verbosity";

/// `CREDSTORE_LOG_LEVEL` may hold a level name or the equivalent `-v` count.
fn log_level() -> ValueParser {
    ValueParser::from(|level: &str| -> std::result::Result<u8, String> {
        let count = match level.to_lowercase().as_str() {
            "error" => 0,
            "warn" => 1,
            "info" => 2,
            "debug" => 3,
            "trace" => 4,
            other => other
                .parse::<u8>()
                .ok()
                .filter(|count| *count <= 4)
                .ok_or_else(|| format!("unknown log level {level:?}"))?,
        };
        Ok(count)
    })
}

fn username() -> Arg {
    Arg::new(ARG_USERNAME)
        .help("Name of the user")
        .required(true)
}

fn password(help: &'static str) -> Arg {
    Arg::new(ARG_PASSWORD)
        .short('p')
        .long("password")
        .help(help)
        .long_help(format!("{help}. Prompted for when not given."))
        .env("CREDSTORE_PASSWORD")
        .hide_env_values(true)
}

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    Command::new("credstore")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new(ARG_FILE)
                .short('f')
                .long("file")
                .help("Path to the credential file")
                .env("CREDSTORE_FILE")
                .global(true),
        )
        .arg(
            Arg::new(ARG_POLL_SECONDS)
                .long("poll-seconds")
                .help("Seconds between checks for external changes while watching (0 disables)")
                .default_value("5")
                .env("CREDSTORE_POLL_SECONDS")
                .global(true)
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_LOAD_TIMEOUT_MS)
                .long("load-timeout-ms")
                .help("Milliseconds before a stalled reload is rolled back")
                .default_value("1000")
                .env("CREDSTORE_LOAD_TIMEOUT_MS")
                .global(true)
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .subcommand(
            Command::new("add")
                .about("Add a user")
                .arg(username())
                .arg(password("Password for the new user")),
        )
        .subcommand(
            Command::new("modify")
                .about("Replace a user's password")
                .arg(username())
                .arg(password("New password")),
        )
        .subcommand(
            Command::new("passwd")
                .about("Change a user's password after checking the current one")
                .arg(username())
                .arg(
                    Arg::new(ARG_OLD_PASSWORD)
                        .long("old-password")
                        .help("Current password")
                        .env("CREDSTORE_OLD_PASSWORD")
                        .hide_env_values(true),
                )
                .arg(password("New password")),
        )
        .subcommand(
            Command::new("delete")
                .about("Remove a user")
                .arg(username()),
        )
        .subcommand(
            Command::new("verify")
                .about("Check a password; exits non-zero on failure")
                .arg(username())
                .arg(password("Password to check")),
        )
        .subcommand(
            Command::new("list")
                .about("List users and the cost of their hashes")
                .arg(
                    Arg::new(ARG_JSON)
                        .long("json")
                        .help("Print entries as JSON")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("cost")
                .about("Show the target bcrypt cost, or set it")
                .arg(
                    Arg::new(ARG_COST)
                        .help("New target cost")
                        .value_parser(
                            clap::value_parser!(u32)
                                .range(i64::from(hash::MIN_COST)..=i64::from(hash::MAX_COST)),
                        ),
                ),
        )
        .arg(
            Arg::new(ARG_VERBOSITY)
                .short('v')
                .long("verbose")
                .help("Log more: -v warnings, -vv reloads and edits, -vvv debug, -vvvv trace")
                .env("CREDSTORE_LOG_LEVEL")
                .global(true)
                .action(ArgAction::Count)
                .value_parser(log_level()),
        )
        .subcommand(
            Command::new("watch")
                .about("Keep the file loaded and reload it on change or SIGHUP until interrupted"),
        )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_new() {
        let command = new();

        assert_eq!(command.get_name(), "credstore");
        assert_eq!(
            command.get_about().map(ToString::to_string),
            Some(env!("CARGO_PKG_DESCRIPTION").to_string())
        );
        assert_eq!(
            command.get_version().map(ToString::to_string),
            Some(env!("CARGO_PKG_VERSION").to_string())
        );
    }

    #[test]
    fn test_add_args() {
        temp_env::with_vars([("CREDSTORE_PASSWORD", None::<String>)], || {
            let matches = new().get_matches_from(vec![
                "credstore",
                "--file",
                "/tmp/passwd",
                "add",
                "alice",
                "--password",
                "secret",
            ]);

            assert_eq!(
                matches.get_one::<String>(ARG_FILE).cloned(),
                Some("/tmp/passwd".to_string())
            );
            let (name, sub) = matches.subcommand().unwrap();
            assert_eq!(name, "add");
            assert_eq!(
                sub.get_one::<String>(ARG_USERNAME).cloned(),
                Some("alice".to_string())
            );
            assert_eq!(
                sub.get_one::<String>(ARG_PASSWORD).cloned(),
                Some("secret".to_string())
            );
        });
    }

    #[test]
    fn test_check_env() {
        temp_env::with_vars(
            [
                ("CREDSTORE_FILE", Some("/srv/passwd")),
                ("CREDSTORE_POLL_SECONDS", Some("30")),
                ("CREDSTORE_LOAD_TIMEOUT_MS", Some("250")),
                ("CREDSTORE_PASSWORD", Some("from-env")),
                ("CREDSTORE_OLD_PASSWORD", Some("old-from-env")),
                ("CREDSTORE_LOG_LEVEL", Some("info")),
            ],
            || {
                let matches = new().get_matches_from(vec!["credstore", "passwd", "bob"]);
                assert_eq!(
                    matches.get_one::<String>(ARG_FILE).cloned(),
                    Some("/srv/passwd".to_string())
                );
                assert_eq!(matches.get_one::<u64>(ARG_POLL_SECONDS).copied(), Some(30));
                assert_eq!(
                    matches.get_one::<u64>(ARG_LOAD_TIMEOUT_MS).copied(),
                    Some(250)
                );
                assert_eq!(
                    matches.get_one::<u8>(ARG_VERBOSITY).copied(),
                    Some(2)
                );

                let sub = matches.subcommand_matches("passwd").unwrap();
                assert_eq!(
                    sub.get_one::<String>(ARG_PASSWORD).cloned(),
                    Some("from-env".to_string())
                );
                assert_eq!(
                    sub.get_one::<String>(ARG_OLD_PASSWORD).cloned(),
                    Some("old-from-env".to_string())
                );
            },
        );
    }

    #[test]
    fn test_defaults() {
        temp_env::with_vars(
            [
                ("CREDSTORE_POLL_SECONDS", None::<&str>),
                ("CREDSTORE_LOAD_TIMEOUT_MS", None),
                ("CREDSTORE_LOG_LEVEL", None),
            ],
            || {
                let matches = new().get_matches_from(vec!["credstore", "list"]);
                assert_eq!(matches.get_one::<u64>(ARG_POLL_SECONDS).copied(), Some(5));
                assert_eq!(
                    matches.get_one::<u64>(ARG_LOAD_TIMEOUT_MS).copied(),
                    Some(1000)
                );
                assert_eq!(
                    matches.get_one::<u8>(ARG_VERBOSITY).copied(),
                    Some(0)
                );
                let sub = matches.subcommand_matches("list").unwrap();
                assert!(!sub.get_flag(ARG_JSON));
            },
        );
    }

    #[test]
    fn test_check_log_level_env() {
        // loop cover all possible value_parse
        let levels = ["error", "warn", "info", "debug", "trace"];
        for (index, &level) in levels.iter().enumerate() {
            temp_env::with_vars([("CREDSTORE_LOG_LEVEL", Some(level))], || {
                let matches = new().get_matches_from(vec!["credstore", "list"]);
                assert_eq!(
                    matches.get_one::<u8>(ARG_VERBOSITY).copied(),
                    u8::try_from(index).ok()
                );
            });
        }
    }

    #[test]
    fn test_log_level_env_numbers_and_garbage() {
        temp_env::with_vars([("CREDSTORE_LOG_LEVEL", Some("3"))], || {
            let matches = new().get_matches_from(vec!["credstore", "list"]);
            assert_eq!(matches.get_one::<u8>(ARG_VERBOSITY).copied(), Some(3));
        });
        for level in ["loud", "9"] {
            temp_env::with_vars([("CREDSTORE_LOG_LEVEL", Some(level))], || {
                assert!(new().try_get_matches_from(vec!["credstore", "list"]).is_err());
            });
        }
    }

    #[test]
    fn test_check_log_level_verbosity() {
        for index in 0..5 {
            temp_env::with_vars([("CREDSTORE_LOG_LEVEL", None::<String>)], || {
                let mut args = vec!["credstore".to_string(), "list".to_string()];

                // Add the appropriate number of "-v" flags based on the index
                if index > 0 {
                    args.push(format!("-{}", "v".repeat(index)));
                }

                let matches = new().get_matches_from(args);
                assert_eq!(
                    matches.get_one::<u8>(ARG_VERBOSITY).copied(),
                    u8::try_from(index).ok()
                );
            });
        }
    }

    #[test]
    fn test_cost_range() {
        let matches = new().get_matches_from(vec!["credstore", "cost", "10"]);
        let sub = matches.subcommand_matches("cost").unwrap();
        assert_eq!(sub.get_one::<u32>(ARG_COST).copied(), Some(10));

        let matches = new().get_matches_from(vec!["credstore", "cost"]);
        let sub = matches.subcommand_matches("cost").unwrap();
        assert_eq!(sub.get_one::<u32>(ARG_COST), None);

        for bad in ["3", "32", "ten"] {
            let result = new().try_get_matches_from(vec!["credstore", "cost", bad]);
            assert!(result.is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_subcommand_required() {
        let result = new().try_get_matches_from(vec!["credstore", "--file", "/tmp/passwd"]);
        assert!(result.is_err());

        let result = new().try_get_matches_from(vec!["credstore", "delete"]);
        assert_eq!(
            result.map_err(|e| e.kind()).err(),
            Some(clap::error::ErrorKind::MissingRequiredArgument)
        );
    }
}
