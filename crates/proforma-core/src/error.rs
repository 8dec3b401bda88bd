use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Pipeline stage that rejected the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Acquisition,
    Financing,
    Operations,
    Sale,
    Returns,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Acquisition => "acquisition",
            Stage::Financing => "financing",
            Stage::Operations => "operations",
            Stage::Sale => "sale",
            Stage::Returns => "returns",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ProFormaError {
    #[error("Invalid input in {stage} stage: {field}: {reason}")]
    InvalidInput {
        stage: Stage,
        field: String,
        reason: String,
    },

    #[error("Financial impossibility: {0}")]
    FinancialImpossibility(String),

    #[error("Convergence failure: {function} did not converge after {iterations} iterations (delta: {last_delta})")]
    ConvergenceFailure {
        function: String,
        iterations: u32,
        last_delta: Decimal,
    },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Division by zero in {context}")]
    DivisionByZero { context: String },

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for ProFormaError {
    fn from(e: serde_json::Error) -> Self {
        ProFormaError::SerializationError(e.to_string())
    }
}

impl ProFormaError {
    pub(crate) fn invalid(stage: Stage, field: &str, reason: impl Into<String>) -> Self {
        ProFormaError::InvalidInput {
            stage,
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Stage that produced the error, if it is a configuration error.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ProFormaError::InvalidInput { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_input_names_stage_and_field() {
        let err = ProFormaError::invalid(Stage::Sale, "sale_year", "out of range");
        assert_eq!(
            err.to_string(),
            "Invalid input in sale stage: sale_year: out of range"
        );
        assert_eq!(err.stage(), Some(Stage::Sale));
    }

    #[test]
    fn test_non_configuration_errors_have_no_stage() {
        let err = ProFormaError::DivisionByZero {
            context: "NPV".into(),
        };
        assert_eq!(err.stage(), None);
    }

    #[test]
    fn test_serde_json_error_converts() {
        let parse = serde_json::from_str::<serde_json::Value>("{ not json");
        let err: ProFormaError = parse.unwrap_err().into();
        assert!(matches!(err, ProFormaError::SerializationError(_)));
        assert!(err.to_string().starts_with("Serialization error:"));
    }
}
