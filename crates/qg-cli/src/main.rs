//! # qg: command-line client for QUERYGATE
//!
//! - `qg submit <sql>`: submit a query and print rows or the queued job.
//! - `qg status <job-id>` / `qg jobs`: poll scheduled jobs.
//! - `qg credentials list|set|revoke`: manage integration tokens.
//! - `qg hub`: launch the hub.

use std::path::PathBuf;
use std::process::Command;

use clap::{Parser, Subcommand};
use qg_core::{ExecutionPreferences, QueryRequest, QueryResponse, Row, UserContext};
use tabled::builder::Builder;
use tabled::settings::Style;
use tabled::Tabled;

/// QUERYGATE: admission control and routing for enterprise queries.
#[derive(Parser)]
#[command(name = "qg", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a query.
    Submit {
        sql: String,

        #[arg(long, default_value = "cli")]
        user: String,

        /// Role held by the requester (repeatable).
        #[arg(long = "role")]
        roles: Vec<String>,

        #[arg(long)]
        enterprise: String,

        /// Ask for scheduled execution.
        #[arg(long, conflicts_with = "force_real_time")]
        schedule: bool,

        /// Fail instead of scheduling when the query is not eligible.
        #[arg(long)]
        force_real_time: bool,

        /// Skip the cache lookup.
        #[arg(long)]
        no_cache: bool,
    },

    /// Show one job.
    Status { job_id: String },

    /// List jobs.
    Jobs {
        /// queued, running, succeeded or failed
        #[arg(long)]
        state: Option<String>,
    },

    /// Manage integration credentials.
    Credentials {
        #[command(subcommand)]
        action: CredentialCmd,
    },

    /// Launch the QUERYGATE hub.
    Hub {
        /// Server bind address.
        #[arg(long, default_value = "127.0.0.1:3000")]
        bind: String,

        /// Path to config file.
        #[arg(long, default_value = "qg-hub.toml")]
        config: PathBuf,

        /// JSON table fixtures for the in-memory executor.
        #[arg(long)]
        fixtures: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum CredentialCmd {
    List {
        enterprise: String,
    },
    Set {
        enterprise: String,
        service: String,
        #[arg(long)]
        token: String,
        /// Store the credential as inactive.
        #[arg(long)]
        inactive: bool,
    },
    Revoke {
        enterprise: String,
        service: String,
    },
}

#[derive(Tabled)]
struct JobRow {
    job_id: String,
    state: String,
    created_at: String,
    sql_query: String,
}

#[derive(Tabled)]
struct CredentialRow {
    service: String,
    active: bool,
    fingerprint: String,
    updated_at: String,
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Hub {
            bind,
            config,
            fixtures,
        } => {
            eprintln!("QUERYGATE: Launching hub...");
            eprintln!("   Bind:    {}", bind);
            eprintln!("   Config:  {}", config.display());
            eprintln!();

            let config = config.display().to_string();
            let mut args: Vec<&str> = vec![
                "run",
                "-p",
                "qg-hub",
                "--",
                "--bind",
                bind.as_str(),
                "--config",
                config.as_str(),
            ];
            let fixtures = fixtures.map(|f| f.display().to_string());
            if let Some(f) = &fixtures {
                args.push("--fixtures");
                args.push(f.as_str());
            }

            match Command::new("cargo").args(&args).status() {
                Ok(s) if s.success() => {}
                Ok(s) => {
                    eprintln!("Hub exited with: {}", s);
                    std::process::exit(1);
                }
                Err(e) => {
                    eprintln!("Failed to launch hub: {}", e);
                    std::process::exit(1);
                }
            }
        }

        cmd => {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    eprintln!("Failed to build tokio runtime: {}", e);
                    std::process::exit(1);
                }
            };

            if let Err(e) = rt.block_on(async_main(cmd)) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

async fn async_main(cmd: Commands) -> Result<(), String> {
    let client = reqwest::Client::new();
    let base_url =
        std::env::var("QG_BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:3000".to_string());
    let base_url = base_url.trim_end_matches('/');

    match cmd {
        Commands::Submit {
            sql,
            user,
            roles,
            enterprise,
            schedule,
            force_real_time,
            no_cache,
        } => {
            let request = build_request(
                sql,
                user,
                roles,
                enterprise,
                ExecutionPreferences {
                    real_time: !schedule,
                    force_real_time,
                    bypass_cache: no_cache,
                },
            );
            let url = format!("{}/api/v1/sql-query/execute", base_url);
            let resp = client
                .post(&url)
                .json(&request)
                .send()
                .await
                .map_err(|e| e.to_string())?;
            let http_status = resp.status();
            let body: QueryResponse = resp.json().await.map_err(|e| e.to_string())?;
            print_submission(&body);
            if !http_status.is_success() {
                return Err(format!("hub answered {}", http_status));
            }
        }

        Commands::Status { job_id } => {
            let url = format!("{}/api/v1/jobs/{}", base_url, job_id);
            let json = get_json(&client, &url).await?;
            print_json(&json);
        }

        Commands::Jobs { state } => {
            let url = match state {
                Some(s) => format!("{}/api/v1/jobs?state={}", base_url, s),
                None => format!("{}/api/v1/jobs", base_url),
            };
            let json = get_json(&client, &url).await?;
            let rows: Vec<JobRow> = json
                .as_array()
                .map(|jobs| {
                    jobs.iter()
                        .map(|j| JobRow {
                            job_id: text(&j["job_id"]),
                            state: text(&j["state"]),
                            created_at: text(&j["created_at"]),
                            sql_query: text(&j["sql_query"]),
                        })
                        .collect()
                })
                .unwrap_or_default();
            if rows.is_empty() {
                println!("No jobs.");
            } else {
                println!("{}", tabled::Table::new(rows).with(Style::rounded()));
            }
        }

        Commands::Credentials { action } => match action {
            CredentialCmd::List { enterprise } => {
                let url = format!("{}/api/v1/credentials/{}", base_url, enterprise);
                let json = get_json(&client, &url).await?;
                let rows: Vec<CredentialRow> = json
                    .as_array()
                    .map(|creds| {
                        creds
                            .iter()
                            .map(|c| CredentialRow {
                                service: text(&c["service"]),
                                active: c["active"].as_bool().unwrap_or(false),
                                fingerprint: text(&c["fingerprint"]),
                                updated_at: text(&c["updated_at"]),
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                println!("{}", tabled::Table::new(rows).with(Style::rounded()));
            }
            CredentialCmd::Set {
                enterprise,
                service,
                token,
                inactive,
            } => {
                let url = format!("{}/api/v1/credentials/{}/{}", base_url, enterprise, service);
                let payload = serde_json::json!({ "token": token, "active": !inactive });
                let resp = client
                    .put(&url)
                    .json(&payload)
                    .send()
                    .await
                    .map_err(|e| e.to_string())?;
                println!("Credential stored: {}", resp.status());
            }
            CredentialCmd::Revoke {
                enterprise,
                service,
            } => {
                let url = format!("{}/api/v1/credentials/{}/{}", base_url, enterprise, service);
                let resp = client.delete(&url).send().await.map_err(|e| e.to_string())?;
                println!("Credential revoked: {}", resp.status());
            }
        },

        Commands::Hub { .. } => {}
    }
    Ok(())
}

fn build_request(
    sql: String,
    user: String,
    roles: Vec<String>,
    enterprise: String,
    prefs: ExecutionPreferences,
) -> QueryRequest {
    QueryRequest::new(
        sql,
        UserContext {
            user_id: user,
            roles,
        },
        enterprise,
    )
    .with_prefs(prefs)
}

fn print_submission(resp: &QueryResponse) {
    if let Some(err) = &resp.error {
        eprintln!("Failed: {}", err);
        return;
    }
    if let Some(job_id) = &resp.job_id {
        println!("Scheduled as job {}", job_id);
        println!("Poll with: qg status {}", job_id);
        return;
    }
    if let Some(route) = &resp.route {
        eprintln!("Route: {:?}, {} row(s)", route, resp.data.len());
    }
    println!("{}", rows_table(&resp.data));
}

/// Render rows with the union of their columns, in first-seen order.
fn rows_table(rows: &[Row]) -> String {
    if rows.is_empty() {
        return "(no rows)".to_string();
    }

    let mut columns: Vec<&str> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !columns.contains(&key.as_str()) {
                columns.push(key);
            }
        }
    }

    let mut builder = Builder::default();
    builder.push_record(columns.iter().map(|c| c.to_string()));
    for row in rows {
        builder.push_record(
            columns
                .iter()
                .map(|c| row.get(*c).map(text).unwrap_or_default()),
        );
    }
    builder.build().with(Style::rounded()).to_string()
}

fn text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!("{}", value),
    }
}

async fn get_json(client: &reqwest::Client, url: &str) -> Result<serde_json::Value, String> {
    let resp = client.get(url).send().await.map_err(|e| e.to_string())?;
    let status = resp.status();
    let json = resp
        .json::<serde_json::Value>()
        .await
        .map_err(|e| e.to_string())?;
    if !status.is_success() {
        print_json(&json);
        return Err(format!("hub answered {}", status));
    }
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_request_maps_flags() {
        let req = build_request(
            "SELECT name FROM contacts WHERE id = 5".into(),
            "alice".into(),
            vec!["Admin".into()],
            "acme".into(),
            ExecutionPreferences {
                real_time: false,
                force_real_time: false,
                bypass_cache: true,
            },
        );
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["user_context"]["roles"], json!(["Admin"]));
        assert_eq!(value["enterprise_context"]["enterprise_id"], "acme");
        assert_eq!(value["execution_prefs"]["real_time"], false);
        assert_eq!(value["execution_prefs"]["bypass_cache"], true);
    }

    #[test]
    fn test_rows_table_unions_columns() {
        let rows: Vec<Row> = vec![
            json!({ "id": 1, "name": "Ada" }).as_object().unwrap().clone(),
            json!({ "id": 5, "email": "grace@example.com" })
                .as_object()
                .unwrap()
                .clone(),
        ];
        let table = rows_table(&rows);
        assert!(table.contains("id"));
        assert!(table.contains("email"));
        assert!(table.contains("Ada"));
        assert!(table.contains("grace@example.com"));
    }

    #[test]
    fn test_rows_table_empty() {
        assert_eq!(rows_table(&[]), "(no rows)");
    }

    #[test]
    fn test_cli_parses_submit() {
        let cli = Cli::try_parse_from([
            "qg",
            "submit",
            "SELECT 1 FROM t",
            "--enterprise",
            "acme",
            "--role",
            "Admin",
            "--role",
            "Analyst",
            "--no-cache",
        ])
        .unwrap();
        match cli.command {
            Commands::Submit {
                roles, no_cache, ..
            } => {
                assert_eq!(roles, vec!["Admin", "Analyst"]);
                assert!(no_cache);
            }
            _ => panic!("expected submit"),
        }
    }

    #[test]
    fn test_schedule_conflicts_with_force() {
        assert!(Cli::try_parse_from([
            "qg",
            "submit",
            "SELECT 1 FROM t",
            "--enterprise",
            "acme",
            "--schedule",
            "--force-real-time",
        ])
        .is_err());
    }
}
