use crate::commands::common::CliContext;
use crate::error::CliError;

pub fn run_config_show(context: &CliContext) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(&context.config)?);
    if context.config.api_token.is_some() {
        eprintln!("(API token is set)");
    }
    Ok(())
}

pub fn run_config_path(context: &CliContext) {
    println!("config:   {}", context.config_path.display());
    println!("database: {}", context.db_path.display());
}
