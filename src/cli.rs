//! CLI argument parsing for the litebill-worker binary.

use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "litebill-worker", about = "LiteBill billing and invoicing worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the worker server (default if no subcommand given)
    Serve,
    /// Run database migrations and exit
    Migrate,
    /// Print a signed access token
    IssueToken {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        tenant: Uuid,
        #[arg(long, default_value = "admin")]
        role: String,
        /// Token lifetime
        #[arg(long, default_value_t = 8)]
        hours: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_migrate_command_parses() {
        let cli = Cli::parse_from(["litebill-worker", "migrate"]);
        assert!(matches!(cli.command, Some(Command::Migrate)));
    }

    #[test]
    fn test_cli_no_command_defaults_to_none() {
        let cli = Cli::parse_from(["litebill-worker"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_serve_command_parses() {
        let cli = Cli::parse_from(["litebill-worker", "serve"]);
        assert!(matches!(cli.command, Some(Command::Serve)));
    }

    #[test]
    fn test_cli_issue_token_parses() {
        let user = Uuid::new_v4();
        let tenant = Uuid::new_v4();
        let cli = Cli::parse_from([
            "litebill-worker",
            "issue-token",
            "--user",
            &user.to_string(),
            "--tenant",
            &tenant.to_string(),
            "--role",
            "operator",
        ]);
        match cli.command {
            Some(Command::IssueToken { user: u, tenant: t, role, hours }) => {
                assert_eq!(u, user);
                assert_eq!(t, tenant);
                assert_eq!(role, "operator");
                assert_eq!(hours, 8);
            }
            _ => panic!("expected issue-token"),
        }
    }

    #[test]
    fn test_cli_issue_token_requires_tenant() {
        let user = Uuid::new_v4().to_string();
        let result = Cli::try_parse_from(["litebill-worker", "issue-token", "--user", &user]);
        assert!(result.is_err());
    }
}
