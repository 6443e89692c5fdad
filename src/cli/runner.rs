//! CLI runner - executes commands

use crate::cli::commands::{Cli, Commands, OutputFormat};
use crate::config::Settings;
use crate::connection::Connection;
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::types::Value;
use serde_json::{json, Value as JsonValue};

/// CLI runner
pub struct Runner {
    cli: Cli,
    registry: Registry,
    settings: Settings,
}

impl Runner {
    /// Create a runner, loading settings and applying command-line overrides
    pub fn new(cli: Cli) -> Result<Self> {
        let settings = match &cli.config {
            Some(path) => Settings::load(path)?,
            None => Settings::discover()?,
        };
        let settings = Self::apply_flags(settings, &cli);
        let registry = Registry::new().with_pool_config(settings.pool_config());

        Ok(Self {
            cli,
            registry,
            settings,
        })
    }

    /// Run the CLI command
    pub async fn run(&self) -> Result<()> {
        let result = match &self.cli.command {
            Commands::Execute { sql, params } => self.execute(sql, params).await,
            Commands::Tables { refresh } => self.tables(*refresh),
            Commands::Check => self.check(),
            Commands::Drivers => self.drivers(),
        };
        self.registry.close_all();
        result
    }

    fn apply_flags(mut settings: Settings, cli: &Cli) -> Settings {
        if let Some(driver) = &cli.driver {
            settings.driver.clone_from(driver);
        }
        if let Some(database) = &cli.database {
            settings.database.clone_from(database);
        }
        if cli.url.is_some() {
            settings.url.clone_from(&cli.url);
        }
        settings
    }

    fn connect(&self) -> Result<Connection> {
        self.registry
            .add_connection(&self.settings.connect_options())
    }

    /// Run one statement and print its result
    async fn execute(&self, sql: &str, raw_params: &[String]) -> Result<()> {
        let connection = self.connect()?;
        let params: Vec<Value> = raw_params.iter().map(|p| parse_param(p)).collect();
        let sql = sql.to_string();

        let (columns, rows, rowcount) = connection
            .with_session_async(move |session| async move {
                session.execute(&sql, &params)?;
                let columns = session.description().unwrap_or_default();
                let rowcount = session.rowcount();
                let rows = session.fetch_all()?;
                Ok::<_, Error>((columns, rows, rowcount))
            })
            .await?;

        let rows: Vec<JsonValue> = rows.iter().map(|row| row.to_json_object(&columns)).collect();
        let column_names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();

        self.output_message(&json!({
            "type": "RESULT",
            "result": {
                "columns": column_names,
                "rows": rows,
                "rowcount": rowcount,
            }
        }));
        Ok(())
    }

    fn tables(&self, refresh: bool) -> Result<()> {
        let connection = self.connect()?;
        let tables = if refresh {
            connection.refresh_tables()?
        } else {
            connection.table_names()?
        };

        self.output_message(&json!({
            "type": "TABLES",
            "tables": tables,
        }));
        Ok(())
    }

    /// Check connection
    fn check(&self) -> Result<()> {
        let options = self.settings.connect_options();

        self.output_message(&json!({
            "type": "LOG",
            "log": {
                "level": "INFO",
                "message": format!("Checking connection to {} database", options.driver)
            }
        }));

        let outcome = self.connect().and_then(|connection| {
            connection.with_session(|session| session.execute("SELECT 1", &[]).map(|_| ()))?;
            Ok(connection)
        });

        match outcome {
            Ok(connection) => {
                self.output_message(&json!({
                    "type": "CONNECTION_STATUS",
                    "connectionStatus": {
                        "status": "SUCCEEDED",
                        "message": format!("Connection to {} successful", connection.url().masked())
                    }
                }));
            }
            Err(e) => {
                self.output_message(&json!({
                    "type": "CONNECTION_STATUS",
                    "connectionStatus": {
                        "status": "FAILED",
                        "message": format!("Connection check failed: {e}")
                    }
                }));
            }
        }

        Ok(())
    }

    fn drivers(&self) -> Result<()> {
        let drivers: Vec<JsonValue> = Driver::ALL
            .iter()
            .map(|driver| {
                let strategy = driver.strategy();
                json!({
                    "name": driver.as_str(),
                    "scheme": strategy.scheme,
                    "odbc_scheme": strategy.odbc_scheme,
                    "embedded": driver.is_embedded(),
                })
            })
            .collect();

        self.output_message(&json!({
            "type": "DRIVERS",
            "drivers": drivers,
        }));
        Ok(())
    }

    fn output_message(&self, msg: &JsonValue) {
        match self.cli.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string(msg).unwrap_or_default());
            }
            OutputFormat::Pretty => {
                println!("{}", serde_json::to_string_pretty(msg).unwrap_or_default());
            }
        }
    }
}

/// Type a command-line parameter: integers, reals, booleans and `null` are
/// recognized, everything else is text
fn parse_param(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Integer(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if f.is_finite() {
            return Value::Real(f);
        }
    }
    match raw {
        "null" | "NULL" => Value::Null,
        "true" => Value::Boolean(true),
        "false" => Value::Boolean(false),
        _ => Value::Text(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_param() {
        assert_eq!(parse_param("42"), Value::Integer(42));
        assert_eq!(parse_param("-1.5"), Value::Real(-1.5));
        assert_eq!(parse_param("true"), Value::Boolean(true));
        assert_eq!(parse_param("null"), Value::Null);
        assert_eq!(parse_param("ian"), Value::Text("ian".to_string()));
        assert_eq!(parse_param("inf"), Value::Text("inf".to_string()));
    }

    #[test]
    fn test_flags_override_settings() {
        let cli = Cli::parse_from([
            "unidb",
            "--driver",
            "duckdb",
            "--database",
            ":memory:",
            "execute",
            "SELECT ?",
            "--param",
            "1",
        ]);
        let settings = Runner::apply_flags(Settings::default(), &cli);

        assert_eq!(settings.driver, "duckdb");
        assert_eq!(settings.database, ":memory:");
        assert_eq!(settings.url, None);
        match cli.command {
            Commands::Execute { sql, params } => {
                assert_eq!(sql, "SELECT ?");
                assert_eq!(params, vec!["1"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_url_flag() {
        let cli = Cli::parse_from(["unidb", "--url", "duckdb://", "check"]);
        let settings = Runner::apply_flags(Settings::default(), &cli);
        assert_eq!(settings.url.as_deref(), Some("duckdb://"));
    }
}
