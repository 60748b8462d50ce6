mod root;
mod ask;

pub use root::Cli;
pub use ask::AskCommand;

use anyhow::Result;
use serde::Serialize;

/// Write a payload to stdout as pretty JSON
pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
