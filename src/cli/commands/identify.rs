//! Identify command - ask a host which WS-Management stack it runs

use super::CommandContext;
use crate::cli::ConnectionArgs;
use anyhow::{Context, Result};
use clap::Parser;

/// Arguments for the identify command
#[derive(Parser, Debug, Clone)]
pub struct IdentifyArgs {
    /// Host alias or address
    pub host: String,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

impl IdentifyArgs {
    /// Execute the identify command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let connection = ctx.connection(&self.host, &self.connection)?;

        let identity = match connection.identify().await {
            Ok(identity) => identity,
            Err(e) => {
                ctx.output.error(&format!("{}: {}", self.host, e));
                return Ok(1);
            }
        };

        if self.json {
            let rendered =
                serde_json::to_string_pretty(&identity).context("Failed to render JSON")?;
            println!("{}", rendered);
        } else {
            ctx.output.fields(&[
                ("Endpoint", connection.config().endpoint_url().as_str()),
                ("Protocol", identity.protocol_version.as_str()),
                ("Vendor", identity.product_vendor.as_str()),
                ("Version", identity.product_version.as_str()),
            ]);
        }

        Ok(0)
    }
}
