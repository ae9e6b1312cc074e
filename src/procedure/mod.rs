//! Procedure Parameter Marshalling
//!
//! Parses command-line parameter specs into typed, ordered parameter lists:
//! - IN: `name:type:value[,name:type:value...]`
//! - OUT: `name:type[,name:type...]`
//!
//! Splitting is naive on `,` and `:`, so values containing either character
//! cannot be expressed. Segments that do not have the expected shape are
//! rejected instead of being dropped. A missing or blank spec parses to an
//! empty list.
//!
//! Type tokens are case-insensitive and map through a fixed table
//! (see [`ParamType::parse`]).

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;

use crate::error::{ProcVaultError, Result};

/// Declared parameter type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Varchar,
    Integer,
    Decimal,
    /// Oracle `NUMBER`: integral values stay exact, others become decimals
    Number,
    Date,
    Timestamp,
    Boolean,
}

impl ParamType {
    /// Map a type token; `None` for unknown tokens
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        let kind = match token.trim().to_ascii_uppercase().as_str() {
            "VARCHAR2" | "VARCHAR" | "STRING" | "CHAR" | "NVARCHAR2" => Self::Varchar,
            "INTEGER" | "INT" => Self::Integer,
            "NUMBER" => Self::Number,
            "DECIMAL" | "DOUBLE" | "FLOAT" => Self::Decimal,
            "DATE" => Self::Date,
            "TIMESTAMP" => Self::Timestamp,
            "BOOLEAN" | "BOOL" => Self::Boolean,
            _ => return None,
        };
        Some(kind)
    }

    /// Default bind width (bytes) used when registering OUT parameters
    #[must_use]
    pub const fn default_width(&self) -> u32 {
        match self {
            Self::Varchar => 4000,
            Self::Integer | Self::Decimal | Self::Number => 22,
            Self::Date => 7,
            Self::Timestamp => 11,
            Self::Boolean => 1,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Varchar => "VARCHAR2",
            Self::Integer => "INTEGER",
            Self::Decimal => "DECIMAL",
            Self::Number => "NUMBER",
            Self::Date => "DATE",
            Self::Timestamp => "TIMESTAMP",
            Self::Boolean => "BOOLEAN",
        }
    }

    /// Convert a raw string into a typed value of this type
    pub fn convert(&self, raw: &str) -> std::result::Result<TypedValue, String> {
        let trimmed = raw.trim();
        match self {
            Self::Varchar => Ok(TypedValue::Text(raw.to_string())),
            Self::Integer => trimmed.parse::<i64>().map(TypedValue::Integer).map_err(|e| e.to_string()),
            Self::Decimal => parse_decimal(trimmed).map(TypedValue::Decimal),
            Self::Number => match trimmed.parse::<i64>() {
                Ok(i) => Ok(TypedValue::Integer(i)),
                Err(_) => parse_decimal(trimmed).map(TypedValue::Decimal),
            },
            Self::Date => parse_date(trimmed).map(TypedValue::Date),
            Self::Timestamp => parse_timestamp(trimmed).map(TypedValue::Timestamp),
            Self::Boolean => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "1" | "y" | "yes" => Ok(TypedValue::Boolean(true)),
                "false" | "0" | "n" | "no" => Ok(TypedValue::Boolean(false)),
                _ => Err("expected true/false".to_string()),
            },
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn parse_decimal(raw: &str) -> std::result::Result<f64, String> {
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        Ok(_) => Err("value is not finite".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

fn parse_date(raw: &str) -> std::result::Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| parse_timestamp(raw).map(|ts| ts.date()))
        .map_err(|_| "expected YYYY-MM-DD".to_string())
}

fn parse_timestamp(raw: &str) -> std::result::Result<NaiveDateTime, String> {
    const FORMATS: [&str; 4] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        // A bare date is midnight
        .or_else(|| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok().and_then(|d| d.and_hms_opt(0, 0, 0)))
        .ok_or_else(|| "expected YYYY-MM-DD[ HH:MM:SS]".to_string())
}

/// A parameter value after type conversion
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Text(String),
    Integer(i64),
    Decimal(f64),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Boolean(bool),
    Null,
}

impl TypedValue {
    /// JSON rendering used in result maps
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Text(s) => Value::String(s.clone()),
            Self::Integer(i) => Value::from(*i),
            Self::Decimal(f) => serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number),
            Self::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            Self::Timestamp(ts) => Value::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            Self::Boolean(b) => Value::Bool(*b),
            Self::Null => Value::Null,
        }
    }
}

/// Parameter direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

/// One declared procedure parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcedureParam {
    pub name: String,
    pub param_type: ParamType,
    /// Raw value; `None` for OUT parameters
    pub raw: Option<String>,
}

impl ProcedureParam {
    #[must_use]
    pub const fn direction(&self) -> Direction {
        if self.raw.is_some() {
            Direction::In
        } else {
            Direction::Out
        }
    }

    /// Typed value of an IN parameter, computed on demand
    ///
    /// OUT parameters have no value and yield [`TypedValue::Null`].
    pub fn typed_value(&self) -> Result<TypedValue> {
        let Some(raw) = &self.raw else {
            return Ok(TypedValue::Null);
        };
        self.param_type.convert(raw).map_err(|reason| {
            ProcVaultError::invalid_input(format!(
                "Parameter '{}' value '{raw}' is not a valid {}: {reason}",
                self.name, self.param_type
            ))
        })
    }
}

/// Parse an IN spec (`name:type:value,...`)
pub fn parse_in(spec: Option<&str>) -> Result<Vec<ProcedureParam>> {
    parse(spec, Direction::In)
}

/// Parse an OUT spec (`name:type,...`)
pub fn parse_out(spec: Option<&str>) -> Result<Vec<ProcedureParam>> {
    parse(spec, Direction::Out)
}

/// Parse a spec string in the given direction
///
/// Positions in error messages are 1-based segment indexes.
pub fn parse(spec: Option<&str>, direction: Direction) -> Result<Vec<ProcedureParam>> {
    let Some(spec) = spec.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(Vec::new());
    };

    let mut params: Vec<ProcedureParam> = Vec::new();
    for (idx, segment) in spec.split(',').enumerate() {
        let position = idx + 1;
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }

        let parts: Vec<&str> = segment.split(':').map(str::trim).collect();
        let expected = match direction {
            Direction::In => 3,
            Direction::Out => 2,
        };
        if parts.len() != expected {
            let shape = match direction {
                Direction::In => "name:type:value",
                Direction::Out => "name:type",
            };
            return Err(ProcVaultError::invalid_input(format!(
                "Malformed parameter '{segment}' at position {position}: expected {shape}"
            )));
        }

        let name = parts[0];
        if name.is_empty() {
            return Err(ProcVaultError::invalid_input(format!(
                "Parameter at position {position} has an empty name"
            )));
        }
        let param_type = ParamType::parse(parts[1]).ok_or_else(|| {
            ProcVaultError::invalid_input(format!(
                "Unknown parameter type '{}' at position {position} (parameter '{name}')",
                parts[1]
            ))
        })?;
        if params.iter().any(|p| p.name.eq_ignore_ascii_case(name)) {
            return Err(ProcVaultError::invalid_input(format!(
                "Duplicate parameter name '{name}' at position {position}"
            )));
        }

        params.push(ProcedureParam {
            name: name.to_string(),
            param_type,
            raw: parts.get(2).map(|v| (*v).to_string()),
        });
    }

    Ok(params)
}

/// Validate a procedure identifier (`NAME`, `PKG.NAME`, `SCHEMA.PKG.NAME`)
///
/// The name is interpolated into the call text, so only identifier characters
/// and dots are accepted.
pub fn validate_procedure_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ProcVaultError::invalid_input("Procedure name must not be empty"));
    }
    let valid_part = |part: &str| {
        let mut chars = part.chars();
        chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '#'))
    };
    if !name.split('.').all(valid_part) {
        return Err(ProcVaultError::invalid_input(format!("Invalid procedure name '{name}'")));
    }
    Ok(name)
}

/// Callable-statement text with one positional placeholder per parameter
#[must_use]
pub fn build_call_string(procedure: &str, param_count: usize) -> String {
    format!("{{call {procedure}({})}}", vec!["?"; param_count].join(","))
}
