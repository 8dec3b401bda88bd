use serde_json::Value;

use super::format_cell;

/// Headline figures, most specific first. Paths are JSON pointers into the
/// result envelope.
const PRIORITY_POINTERS: [&str; 6] = [
    "/investment_returns/irr",
    "/irr",
    "/annual_debt_service",
    "/valid",
    "/npv",
    "/investment_returns/equity_multiple",
];

/// Print just the key answer value from the output.
///
/// Looks for well-known result fields in priority order (skipping nulls),
/// then falls back to the first field in the result object.
pub fn print_minimal(value: &Value) {
    let result_obj = value
        .as_object()
        .and_then(|m| m.get("result"))
        .unwrap_or(value);

    for pointer in PRIORITY_POINTERS {
        if let Some(val) = result_obj.pointer(pointer) {
            if !val.is_null() {
                println!("{}", format_minimal(val));
                return;
            }
        }
    }

    if let Value::Object(map) = result_obj {
        if let Some((key, val)) = map.iter().next() {
            println!("{}: {}", key, format_minimal(val));
            return;
        }
    }

    println!("{}", format_minimal(result_obj));
}

fn format_minimal(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        _ => format_cell(value),
    }
}
