//! Public entry point: process-wide singleton, and the external-collaborator
//! helper that serializes tabular query results into a sandbox.

use std::sync::{Arc, Mutex, OnceLock};

use serde_json::Value;
use tracing::warn;

use crate::config::SandboxConfig;
use crate::driver::docker::BollardDriver;
use crate::driver::ContainerDriver;
use crate::error::Result;
use crate::manager::{SandboxHandle, SandboxManager};

static SINGLETON: OnceLock<Mutex<Option<Arc<SandboxManager>>>> = OnceLock::new();

fn slot() -> &'static Mutex<Option<Arc<SandboxManager>>> {
    SINGLETON.get_or_init(|| Mutex::new(None))
}

/// Returns the process-wide manager, constructing it on first call. Later
/// calls ignore `config`.
pub fn get(config: Option<SandboxConfig>) -> Result<Arc<SandboxManager>> {
    let mut guard = slot().lock().expect("sandbox manager singleton mutex poisoned");
    if let Some(existing) = guard.as_ref() {
        return Ok(existing.clone());
    }
    crate::metrics::ensure_initialized();

    let config = config.unwrap_or_default();
    config.validate()?;
    let driver: Arc<dyn ContainerDriver> = Arc::new(BollardDriver::new()?);
    let manager = SandboxManager::new(config, driver);
    *guard = Some(manager.clone());
    Ok(manager)
}

/// Test-only reset of the singleton, so each test starts from a clean slate.
#[cfg(test)]
pub fn reset() {
    *slot().lock().expect("sandbox manager singleton mutex poisoned") = None;
}

/// Convenience equivalent to `SandboxManager::create_sandbox`.
pub async fn create_sandbox() -> Result<SandboxHandle> {
    let manager = get(None)?;
    manager.create_sandbox().await
}

/// Re-export of the driver-level exec call, applied to an acquired handle.
pub async fn exec_in_container(
    handle: &SandboxHandle,
    cmd: &str,
) -> Result<crate::driver::ExecResult> {
    handle.exec(cmd).await
}

/// A column header for CSV serialization.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
}

/// A tabular query result to materialize inside a sandbox.
#[derive(Debug, Clone, Default)]
pub struct TabularResult {
    pub rows: Vec<serde_json::Map<String, Value>>,
    pub columns: Vec<Column>,
}

const JSON_RESULT_PATH: &str = "/tmp/mongodb_result.json";
const CSV_RESULT_PATH: &str = "/tmp/mongodb_result.csv";

/// Writes `result` to the well-known JSON and CSV paths inside `handle`'s
/// container. A no-op for empty `rows`. Write failures are logged, not
/// propagated, matching the external-collaborator contract this call backs.
pub async fn write_result_to_container(handle: &SandboxHandle, result: &TabularResult) {
    if result.rows.is_empty() {
        return;
    }

    let json_rows: Vec<Value> = result
        .rows
        .iter()
        .map(|row| Value::Object(row.clone()))
        .collect();
    match serde_json::to_vec_pretty(&json_rows) {
        Ok(bytes) => {
            if let Err(e) = handle.write_file(JSON_RESULT_PATH, &bytes).await {
                warn!(error = %e, path = JSON_RESULT_PATH, "failed to write JSON result");
            }
        }
        Err(e) => warn!(error = %e, "failed to serialize JSON result"),
    }

    let csv = render_csv(result);
    if let Err(e) = handle.write_file(CSV_RESULT_PATH, csv.as_bytes()).await {
        warn!(error = %e, path = CSV_RESULT_PATH, "failed to write CSV result");
    }
}

fn render_csv(result: &TabularResult) -> String {
    let mut out = String::new();

    let header: Vec<String> = result.columns.iter().map(|c| c.name.clone()).collect();
    out.push_str(&header.iter().map(|h| quote_csv_value(h)).collect::<Vec<_>>().join(","));
    out.push('\n');

    for row in &result.rows {
        let fields: Vec<String> = result
            .columns
            .iter()
            .map(|c| format_csv_field(row.get(&c.name)))
            .collect();
        out.push_str(&fields.join(","));
        out.push('\n');
    }

    out
}

fn format_csv_field(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(v @ Value::Object(_)) | Some(v @ Value::Array(_)) => {
            let json = v.to_string();
            format!("\"{}\"", json.replace('"', "\"\""))
        }
        Some(Value::String(s)) => quote_csv_value(s),
        Some(other) => quote_csv_value(&other.to_string()),
    }
}

fn quote_csv_value(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_values_are_unquoted() {
        assert_eq!(quote_csv_value("hello"), "hello");
    }

    #[test]
    fn values_with_commas_are_quoted() {
        assert_eq!(quote_csv_value("a,b"), "\"a,b\"");
    }

    #[test]
    fn embedded_quotes_are_doubled() {
        assert_eq!(quote_csv_value("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn null_formats_as_empty_field() {
        assert_eq!(format_csv_field(Some(&Value::Null)), "");
        assert_eq!(format_csv_field(None), "");
    }

    #[test]
    fn nested_object_is_quoted_json_with_doubled_quotes() {
        let value = json!({"a": 1});
        let rendered = format_csv_field(Some(&value));
        assert_eq!(rendered, "\"{\"\"a\"\":1}\"");
    }

    #[test]
    fn renders_header_and_rows_in_column_order() {
        let mut row = serde_json::Map::new();
        row.insert("name".to_string(), json!("Ada"));
        row.insert("age".to_string(), json!(30));
        let result = TabularResult {
            rows: vec![row],
            columns: vec![
                Column { name: "name".to_string() },
                Column { name: "age".to_string() },
            ],
        };
        let csv = render_csv(&result);
        assert_eq!(csv, "name,age\nAda,30\n");
    }
}
