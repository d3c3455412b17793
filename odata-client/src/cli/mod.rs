//! Command-line edge over [`ODataClient`](crate::api::client::ODataClient)

pub mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;

use crate::api::client::ODataClient;
use crate::config::{ClientConfig, ConfigError, ConfigFile};
use commands::entity::{CreateCommand, DeleteCommand, GetCommand};

#[derive(Parser, Debug)]
#[command(name = "odata-cli", version, about = "Inspect and edit OData services")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Config file (defaults to <config dir>/odata-cli/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Service root URL, overrides config and environment
    #[arg(long, global = true)]
    pub root: Option<String>,

    #[arg(long, global = true, requires = "password")]
    pub user: Option<String>,

    #[arg(long, global = true, requires = "user")]
    pub password: Option<String>,

    /// Print progress and timings; repeat for debug logs
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List entity sets, singletons and entity types of the service
    Metadata,
    /// Read one entity by key or query an entity set
    Get(GetCommand),
    /// Create an entity from a JSON object
    Create(CreateCommand),
    /// Delete an entity by key
    Delete(DeleteCommand),
}

impl GlobalArgs {
    pub fn is_verbose(&self) -> bool {
        self.verbose > 0
    }

    /// Resolve the client configuration; flags win over file and environment
    pub fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        let mut file = ConfigFile::discover(self.config.as_deref())?;
        if let Some(root) = &self.root {
            file.service_root = Some(root.clone());
        }
        if let (Some(user), Some(password)) = (&self.user, &self.password) {
            file.username = Some(user.clone());
            file.password = Some(password.clone());
        }
        file.into_config()
    }

    pub async fn connect(&self) -> Result<ODataClient> {
        let config = self.client_config().context("Failed to load configuration")?;
        if self.is_verbose() {
            println!("Service root: {}", config.service_root.cyan());
        }
        ODataClient::from_config(config.clone())
            .await
            .with_context(|| format!("Failed to connect to {}", config.service_root))
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Metadata => commands::metadata::handle_metadata_command(&cli.global).await,
        Commands::Get(args) => commands::entity::handle_get_command(&cli.global, args).await,
        Commands::Create(args) => commands::entity::handle_create_command(&cli.global, args).await,
        Commands::Delete(args) => commands::entity::handle_delete_command(&cli.global, args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_get_command() {
        let cli = Cli::try_parse_from([
            "odata-cli",
            "--root",
            "http://host/svc",
            "get",
            "Stores",
            "--key",
            "Region=WA",
            "--key",
            "City=Seattle",
            "--format",
            "atom",
            "-v",
        ])
        .unwrap();
        assert_eq!(cli.global.root.as_deref(), Some("http://host/svc"));
        assert!(cli.global.is_verbose());
        match cli.command {
            Commands::Get(args) => {
                assert_eq!(args.entity_set, "Stores");
                assert_eq!(args.key, vec!["Region=WA", "City=Seattle"]);
                assert_eq!(args.format.as_deref(), Some("atom"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_user_requires_password() {
        let result = Cli::try_parse_from(["odata-cli", "--user", "u", "metadata"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "service_root = \"http://file/svc\"\nversion = \"3.0\"\n").unwrap();

        let global = GlobalArgs {
            config: Some(path),
            root: Some("http://flag/svc".into()),
            user: Some("u".into()),
            password: Some("p".into()),
            verbose: 0,
        };
        let config = global.client_config().unwrap();
        assert_eq!(config.service_root, "http://flag/svc");
        assert_eq!(config.credentials.map(|c| c.username).as_deref(), Some("u"));
    }
}
