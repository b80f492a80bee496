//! `cartography run-job`.

use anyhow::{anyhow, Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::Value;
use std::path::PathBuf;

use cartography_core::{Config, UpdateTag};
use cartography_graph::job::common_job_parameters;
use cartography_graph::{get_job_shortname, GraphClient, GraphJob, Params};

#[derive(Args)]
pub struct RunJobArgs {
    /// Job JSON file
    pub file: PathBuf,

    /// Extra job parameter; JSON values are parsed, anything else is a string
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, Value)>,

    /// Value of $UPDATE_TAG (defaults to the current epoch second)
    #[arg(long)]
    pub update_tag: Option<i64>,
}

pub async fn execute(args: RunJobArgs, mut config: Config) -> Result<()> {
    if let Some(tag) = args.update_tag {
        config.update_tag = Some(UpdateTag(tag));
    }
    let update_tag = config.resolve_update_tag();
    let params = job_parameters(update_tag, args.params);

    let mut job = GraphJob::from_json_file(&args.file)?;
    job.merge_parameters(&params);
    println!(
        "{} {} {}",
        "Running job".bold(),
        get_job_shortname(&args.file).cyan(),
        format!("({} statements)", job.statements.len()).dimmed()
    );

    let client = GraphClient::connect(&config.neo4j)
        .await
        .context("Failed to connect to Neo4j")?;
    job.run(&client).await?;

    println!("{}", "Job complete.".green().bold());
    Ok(())
}

fn job_parameters(update_tag: UpdateTag, extra: Vec<(String, Value)>) -> Params {
    let mut params = common_job_parameters(update_tag.value());
    params.extend(extra);
    params
}

fn parse_param(raw: &str) -> Result<(String, Value)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected KEY=VALUE, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(anyhow!("parameter name must not be empty"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_param() {
        assert_eq!(parse_param("AWS_ID=123456789012").unwrap(), ("AWS_ID".to_string(), json!(123456789012i64)));
        assert_eq!(parse_param("NAME=prod").unwrap(), ("NAME".to_string(), json!("prod")));
        assert_eq!(parse_param("ID=\"0042\"").unwrap(), ("ID".to_string(), json!("0042")));
        assert_eq!(parse_param("EMPTY=").unwrap(), ("EMPTY".to_string(), json!("")));
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=1").is_err());
    }

    #[test]
    fn test_extra_params_override_update_tag() {
        let params = job_parameters(
            UpdateTag(5),
            vec![("UPDATE_TAG".to_string(), json!(6)), ("AWS_ID".to_string(), json!("1"))],
        );
        assert_eq!(params["UPDATE_TAG"], json!(6));
        assert_eq!(params["AWS_ID"], json!("1"));
    }
}
