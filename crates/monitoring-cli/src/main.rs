//! CLI de operador sobre el almacén de monitoreo.
//!
//! Códigos de salida: 0 ok, 2 uso, 3 JSON/fecha inválidos, 4 rechazado o no
//! encontrado, 5 error de backend.

use std::process::ExitCode;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use monitoring_core::reports::{task_fingerprint, IRREGULARITY_REPORT_TASK};
use monitoring_core::{Criteria, FindOptions, IrregularityReportRequest, MonitoringRecord, MonitoringStore};
use monitoring_persistence::pg::{PgMonitoringStore, PoolProvider, SchemaIntrospector};
use monitoring_persistence::{build_dev_pool_from_env, PersistenceError};

#[derive(Parser, Debug)]
#[command(name = "monitoring-cli", version, about = "Delivery execution monitoring store", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Construye el pool y aplica las migraciones pendientes
    Migrate,
    /// Busca registros; `--criteria` usa la gramática posicional, p.ej.
    /// '[{"status":"active"},"OR",{"start_time":">1000"}]'
    Find {
        #[arg(long, default_value = "[]")]
        criteria: String,
        #[arg(long)]
        order: Option<String>,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        #[arg(long)]
        limit: Option<u64>,
        /// Incluye los atributos dinámicos
        #[arg(long)]
        together: bool,
    },
    Count {
        #[arg(long, default_value = "[]")]
        criteria: String,
    },
    /// Crea o reemplaza un registro (`--attr clave=valor`, repetible)
    Save {
        #[arg(long = "id")]
        delivery_execution_id: String,
        #[arg(long = "attr", value_parser = parse_attr)]
        attrs: Vec<(String, String)>,
    },
    Delete {
        #[arg(long = "id")]
        delivery_execution_id: String,
    },
    /// Valida un reporte de irregularidades (fechas RFC3339) y muestra la
    /// tarea que se agendaría. Esta CLI no tiene cola de tareas: sólo
    /// acepta `--dry-run`.
    Report {
        #[arg(long)]
        delivery: String,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        requested_by: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
}

fn parse_attr(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

fn parse_criteria(raw: &str) -> Result<Criteria, ExitCode> {
    serde_json::from_str::<serde_json::Value>(raw).map(|v| Criteria::parse(&v)).map_err(|e| {
                                                                                   eprintln!("criteria JSON parse error: {e}");
                                                                                   ExitCode::from(3)
                                                                               })
}

fn parse_time(label: &str, raw: &str) -> Result<DateTime<Utc>, ExitCode> {
    DateTime::parse_from_rfc3339(raw).map(|t| t.with_timezone(&Utc)).map_err(|e| {
                                                                         eprintln!("--{label}: {e}");
                                                                         ExitCode::from(3)
                                                                     })
}

fn backend_error(e: PersistenceError) -> ExitCode {
    tracing::error!("backend error: {e}");
    eprintln!("error: {e}");
    ExitCode::from(5)
}

fn open_store() -> Result<PgMonitoringStore<PoolProvider>, ExitCode> {
    if std::env::var("DATABASE_URL").is_err() {
        eprintln!("requiere DATABASE_URL para operar contra el backend persistente");
        return Err(ExitCode::from(4));
    }
    let pool = build_dev_pool_from_env().map_err(backend_error)?;
    PgMonitoringStore::introspected(PoolProvider { pool }, &SchemaIntrospector::new()).map_err(backend_error)
}

fn record_json(record: &MonitoringRecord) -> serde_json::Value {
    serde_json::json!({
        "id": record.id,
        "delivery_execution_id": record.delivery_execution_id,
        "attributes": record.attributes,
    })
}

fn report_preview(params: &std::collections::BTreeMap<String, serde_json::Value>) -> serde_json::Value {
    serde_json::json!({
        "task": IRREGULARITY_REPORT_TASK,
        "params": params,
        "fingerprint": task_fingerprint(IRREGULARITY_REPORT_TASK, params),
        "enqueued": false,
    })
}

fn run(command: Command) -> Result<ExitCode, ExitCode> {
    match command {
        Command::Migrate => {
            open_store()?;
            println!("migraciones aplicadas");
        }
        Command::Find { criteria, order, offset, limit, together } => {
            let criteria = parse_criteria(&criteria)?;
            let mut options = FindOptions::default().offset(offset);
            if let Some(order) = order {
                options = options.order(order);
            }
            if let Some(limit) = limit {
                options = options.limit(limit);
            }
            let store = open_store()?;
            let records = store.find(&criteria, &options, together).map_err(backend_error)?;
            tracing::info!("find: {} records", records.len());
            let out: Vec<_> = records.iter().map(record_json).collect();
            println!("{}", serde_json::Value::Array(out));
        }
        Command::Count { criteria } => {
            let criteria = parse_criteria(&criteria)?;
            let store = open_store()?;
            println!("{}", store.count(&criteria).map_err(backend_error)?);
        }
        Command::Save { delivery_execution_id, attrs } => {
            let store = open_store()?;
            let mut record = MonitoringRecord::new(delivery_execution_id);
            record.replace_attributes(attrs);
            if !store.save(&mut record).map_err(backend_error)? {
                eprintln!("rechazado: registro inválido");
                return Err(ExitCode::from(4));
            }
            println!("{}", record_json(&record));
        }
        Command::Delete { delivery_execution_id } => {
            let store = open_store()?;
            let mut record = MonitoringRecord::new(delivery_execution_id);
            if !store.delete(&mut record).map_err(backend_error)? {
                eprintln!("no encontrado: {}", record.delivery_execution_id);
                return Err(ExitCode::from(4));
            }
            println!("eliminado: {}", record.delivery_execution_id);
        }
        Command::Report { delivery, from, to, requested_by, dry_run } => {
            let request = IrregularityReportRequest { delivery_id: delivery,
                                                      from: parse_time("from", &from)?,
                                                      to: parse_time("to", &to)?,
                                                      requested_by };
            let params = request.task_params().map_err(|e| {
                                                  eprintln!("rechazado: {e}");
                                                  ExitCode::from(4)
                                              })?;
            if !dry_run {
                eprintln!("sin cola de tareas configurada: use --dry-run para validar la petición");
                return Err(ExitCode::from(2));
            }
            println!("{}", report_preview(&params));
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    // .env para DATABASE_URL
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
                             .with_writer(std::io::stderr)
                             .init();
    let cli = Cli::parse();
    tracing::debug!("command: {:?}", cli.command);
    match run(cli.command) {
        Ok(code) | Err(code) => code,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn attrs_parse_as_pairs() {
        assert_eq!(parse_attr("status=active"), Ok(("status".into(), "active".into())));
        assert_eq!(parse_attr("note=a=b"), Ok(("note".into(), "a=b".into())));
        assert!(parse_attr("=x").is_err());
        assert!(parse_attr("novalue").is_err());
    }

    #[test]
    fn save_subcommand_collects_repeated_attrs() {
        let cli = Cli::try_parse_from(["monitoring-cli", "save", "--id", "de-1", "--attr", "status=active", "--attr",
                                       "tool=calc"]).expect("parse");
        match cli.command {
            Command::Save { delivery_execution_id, attrs } => {
                assert_eq!(delivery_execution_id, "de-1");
                assert_eq!(attrs.len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    fn report(from: &str, dry_run: bool) -> Command {
        Command::Report { delivery: "d".into(),
                          from: from.into(),
                          to: "2025-03-01T00:00:00Z".into(),
                          requested_by: None,
                          dry_run }
    }

    #[test]
    fn report_rejects_bad_dates() {
        assert!(run(report("yesterday", true)).is_err());
        assert!(run(report("2025-03-02T00:00:00Z", true)).is_err());
    }

    #[test]
    fn report_only_runs_as_dry_run() {
        assert!(run(report("2025-02-28T00:00:00Z", false)).is_err());
        assert!(run(report("2025-02-28T00:00:00Z", true)).is_ok());
        let cli = Cli::try_parse_from(["monitoring-cli", "report", "--delivery", "d", "--from", "2025-02-28T00:00:00Z",
                                       "--to", "2025-03-01T00:00:00Z", "--dry-run"]).expect("parse");
        assert!(matches!(cli.command, Command::Report { dry_run: true, .. }));
    }

    #[test]
    fn preview_never_claims_a_task_id() {
        let params = IrregularityReportRequest { delivery_id: "d".into(),
                                                 from: parse_time("from", "2025-02-28T00:00:00Z").expect("from"),
                                                 to: parse_time("to", "2025-03-01T00:00:00Z").expect("to"),
                                                 requested_by: None }.task_params()
                                                                     .expect("params");
        let preview = report_preview(&params);
        assert_eq!(preview["enqueued"], serde_json::Value::Bool(false));
        assert!(preview.get("id").is_none());
        assert_eq!(preview["fingerprint"].as_str().map(str::len), Some(64));
    }
}
