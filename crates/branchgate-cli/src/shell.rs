//! Interactive shell
//!
//! Keeps one session open so the reference height, and with it the policy
//! address, stays fixed while the user funds it and waits for gates to open.

use crate::commands::App;
use anyhow::Result;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, PartialEq, Eq)]
pub enum ShellCommand {
    Address,
    Status,
    Funds,
    LastTx,
    Spend { branch: String, to: Option<String> },
    Keys,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

impl ShellCommand {
    pub fn parse(line: &str) -> Self {
        let mut words = line.split_whitespace();
        let Some(cmd) = words.next() else {
            return ShellCommand::Empty;
        };
        match cmd {
            "address" | "addr" => ShellCommand::Address,
            "status" => ShellCommand::Status,
            "funds" | "balance" => ShellCommand::Funds,
            "last-tx" | "last" => ShellCommand::LastTx,
            "spend" => match words.next() {
                Some(branch) => ShellCommand::Spend {
                    branch: branch.to_string(),
                    to: words.next().map(str::to_string),
                },
                None => ShellCommand::Unknown("spend needs a branch".into()),
            },
            "keys" => ShellCommand::Keys,
            "help" | "?" => ShellCommand::Help,
            "quit" | "exit" | "q" => ShellCommand::Quit,
            other => ShellCommand::Unknown(other.to_string()),
        }
    }
}

fn print_shell_help() {
    println!(
        r#"Commands:
    address                  Show the policy address
    status                   Branch gates at the current tip
    funds                    Outputs held by the policy address
    last-tx                  Most recent transaction
    spend <branch> [addr]    Spend the oldest output through <branch>
    keys                     Participant keys and compiled policy
    help                     This message
    quit                     Leave the shell"#
    );
}

fn prompt() {
    print!("branchgate> ");
    std::io::stdout().flush().ok();
}

pub async fn run(app: &App) -> Result<()> {
    app.print_address()?;
    println!("Type 'help' for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt();
    while let Some(line) = lines.next_line().await? {
        let result = match ShellCommand::parse(&line) {
            ShellCommand::Empty => Ok(()),
            ShellCommand::Quit => break,
            ShellCommand::Help => {
                print_shell_help();
                Ok(())
            }
            ShellCommand::Address => app.print_address(),
            ShellCommand::Status => app.status().await,
            ShellCommand::Funds => app.funds().await,
            ShellCommand::LastTx => app.last_tx().await,
            ShellCommand::Keys => app.keys(),
            ShellCommand::Spend { branch, to } => {
                app.spend(&branch, to.as_deref()).await.map(|_| ())
            }
            ShellCommand::Unknown(what) => {
                println!("Unknown command: {} (try 'help')", what);
                Ok(())
            }
        };
        if let Err(e) = result {
            println!("Error: {:#}", e);
        }
        prompt();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(ShellCommand::parse(""), ShellCommand::Empty);
        assert_eq!(ShellCommand::parse("   "), ShellCommand::Empty);
        assert_eq!(ShellCommand::parse("status"), ShellCommand::Status);
        assert_eq!(ShellCommand::parse("balance"), ShellCommand::Funds);
        assert_eq!(ShellCommand::parse("exit"), ShellCommand::Quit);
        assert_eq!(
            ShellCommand::parse("spend inheritance"),
            ShellCommand::Spend {
                branch: "inheritance".into(),
                to: None
            }
        );
        assert_eq!(
            ShellCommand::parse("spend recovery tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx"),
            ShellCommand::Spend {
                branch: "recovery".into(),
                to: Some("tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx".into())
            }
        );
        assert!(matches!(ShellCommand::parse("spend"), ShellCommand::Unknown(_)));
        assert_eq!(
            ShellCommand::parse("dance"),
            ShellCommand::Unknown("dance".into())
        );
    }
}
