//! Entity commands: get, create, delete

mod handler;

pub use handler::{handle_create_command, handle_delete_command, handle_get_command, parse_key};

use clap::Args;

#[derive(Args, Debug, Clone)]
pub struct GetCommand {
    /// Entity set to read from
    pub entity_set: String,

    /// Key property as name=value; repeat for composite keys
    #[arg(long, short = 'k')]
    pub key: Vec<String>,

    /// $filter expression
    #[arg(long)]
    pub filter: Option<String>,

    /// Comma-separated properties for $select
    #[arg(long, value_delimiter = ',')]
    pub select: Vec<String>,

    /// Comma-separated navigation properties for $expand
    #[arg(long, value_delimiter = ',')]
    pub expand: Vec<String>,

    #[arg(long)]
    pub top: Option<u64>,

    /// Follow next links until the set is exhausted
    #[arg(long)]
    pub all: bool,

    /// Payload format: json, json-full, json-none or atom
    #[arg(long)]
    pub format: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct CreateCommand {
    pub entity_set: String,

    /// Entity as a JSON object
    #[arg(long, short = 'd')]
    pub data: String,
}

#[derive(Args, Debug, Clone)]
pub struct DeleteCommand {
    pub entity_set: String,

    #[arg(long, short = 'k', required = true)]
    pub key: Vec<String>,
}
