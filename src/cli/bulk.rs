//! `taskava bulk` subcommand.

use crate::context::TenantContext;
use crate::db::Database;
use crate::db::bulk::BulkRequest;
use anyhow::{Context, Result};
use clap::Args;
use serde_json::Value;
use std::io::Read;

/// Arguments for the bulk subcommand
#[derive(Args, Debug)]
pub struct BulkArgs {
    /// JSON request file, or `-` for stdin
    ///
    /// Example: {"task_ids": ["..."], "operation": "UPDATE_STATUS", "status": "COMPLETED"}
    #[arg(value_name = "FILE")]
    pub input: String,
}

pub fn run(db: &Database, ctx: &TenantContext, args: BulkArgs) -> Result<Value> {
    let json = if args.input == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading bulk request from stdin")?;
        buf
    } else {
        std::fs::read_to_string(&args.input)
            .with_context(|| format!("reading bulk request {}", args.input))?
    };

    let request = BulkRequest::from_json(&json)?;
    let results = db.apply_bulk(ctx, &request)?;
    Ok(serde_json::to_value(results)?)
}
