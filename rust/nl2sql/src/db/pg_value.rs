//! Postgres column values as JSON.
//!
//! Column types in [`BINARY_TYPES`] are decoded from the binary protocol. A result with any other
//! column type is fetched through the simple query protocol instead, where every value arrives in
//! the server's text rendering and is re-typed with [`text_cell`].

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::{Number, Value};
use std::{error::Error, fmt};
use tokio_postgres::{
    types::{FromSql, Type},
    Row,
};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

const BINARY_TYPES: &[&str] = &[
    "bool", "int2", "int4", "int8", "oid", "float4", "float8", "numeric", "text", "varchar",
    "bpchar", "name", "citext", "unknown", "json", "jsonb", "timestamp", "timestamptz", "date",
    "time", "interval", "uuid", "bytea", "_text", "_varchar", "_bool", "_int2", "_int4", "_int8",
    "_float4", "_float8", "_numeric",
];

pub(super) fn binary_decodable(ty: &Type) -> bool {
    BINARY_TYPES.contains(&ty.name())
}

pub(super) fn binary_cell(row: &Row, idx: usize, ty: &Type) -> Result<Value, tokio_postgres::Error> {
    let value = match ty.name() {
        "bool" => row.try_get::<_, Option<bool>>(idx)?.map(Value::Bool),
        "int2" => row.try_get::<_, Option<i16>>(idx)?.map(Value::from),
        "int4" => row.try_get::<_, Option<i32>>(idx)?.map(Value::from),
        "int8" => row.try_get::<_, Option<i64>>(idx)?.map(Value::from),
        "oid" => row.try_get::<_, Option<u32>>(idx)?.map(Value::from),
        "float4" => row
            .try_get::<_, Option<f32>>(idx)?
            .map(|v| float(f64::from(v))),
        "float8" => row.try_get::<_, Option<f64>>(idx)?.map(float),
        "numeric" => row
            .try_get::<_, Option<PgNumeric>>(idx)?
            .map(PgNumeric::into_json),
        "text" | "varchar" | "bpchar" | "name" | "citext" | "unknown" => {
            row.try_get::<_, Option<String>>(idx)?.map(Value::String)
        }
        "json" | "jsonb" => row.try_get::<_, Option<Value>>(idx)?,
        "timestamp" => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(|v| Value::String(v.format(TIMESTAMP_FORMAT).to_string())),
        "timestamptz" => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(|v| Value::String(v.to_rfc3339())),
        "date" => row
            .try_get::<_, Option<NaiveDate>>(idx)?
            .map(|v| Value::String(v.to_string())),
        "time" => row
            .try_get::<_, Option<NaiveTime>>(idx)?
            .map(|v| Value::String(v.to_string())),
        "interval" => row
            .try_get::<_, Option<PgInterval>>(idx)?
            .map(|v| Value::String(v.to_string())),
        "uuid" => row
            .try_get::<_, Option<uuid::Uuid>>(idx)?
            .map(|v| Value::String(v.to_string())),
        "bytea" => row
            .try_get::<_, Option<Vec<u8>>>(idx)?
            .map(|v| Value::String(STANDARD.encode(v))),
        "_text" | "_varchar" => row
            .try_get::<_, Option<Vec<Option<String>>>>(idx)?
            .map(Value::from),
        "_bool" => row
            .try_get::<_, Option<Vec<Option<bool>>>>(idx)?
            .map(Value::from),
        "_int2" => row
            .try_get::<_, Option<Vec<Option<i16>>>>(idx)?
            .map(Value::from),
        "_int4" => row
            .try_get::<_, Option<Vec<Option<i32>>>>(idx)?
            .map(Value::from),
        "_int8" => row
            .try_get::<_, Option<Vec<Option<i64>>>>(idx)?
            .map(Value::from),
        "_float4" => row
            .try_get::<_, Option<Vec<Option<f32>>>>(idx)?
            .map(|values| float_array(values.into_iter().map(|v| v.map(f64::from)))),
        "_float8" => row
            .try_get::<_, Option<Vec<Option<f64>>>>(idx)?
            .map(float_array),
        "_numeric" => row
            .try_get::<_, Option<Vec<Option<PgNumeric>>>>(idx)?
            .map(numeric_array),
        // Statements with other column types never take the binary path.
        _ => None,
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Re-types a value from its text rendering. Anything without a scalar mapping stays a string.
pub(super) fn text_cell(ty: &Type, text: Option<&str>) -> Value {
    let Some(text) = text else {
        return Value::Null;
    };

    let typed = match ty.name() {
        "bool" => match text {
            "t" => Some(Value::Bool(true)),
            "f" => Some(Value::Bool(false)),
            _ => None,
        },
        "int2" | "int4" | "int8" | "oid" => text.parse::<i64>().ok().map(Value::from),
        "float4" | "float8" | "numeric" => text
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(float),
        "json" | "jsonb" => serde_json::from_str(text).ok(),
        "timestamp" => NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
            .ok()
            .map(|v| Value::String(v.format(TIMESTAMP_FORMAT).to_string())),
        "timestamptz" => DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z")
            .ok()
            .map(|v| Value::String(v.with_timezone(&Utc).to_rfc3339())),
        _ => None,
    };
    typed.unwrap_or_else(|| Value::String(text.to_string()))
}

/// Non-finite floats have no JSON form and become `null`.
fn float(value: f64) -> Value {
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}

fn float_array(values: impl IntoIterator<Item = Option<f64>>) -> Value {
    Value::Array(
        values
            .into_iter()
            .map(|v| v.map_or(Value::Null, float))
            .collect(),
    )
}

fn numeric_array(values: Vec<Option<PgNumeric>>) -> Value {
    Value::Array(
        values
            .into_iter()
            .map(|v| v.map_or(Value::Null, PgNumeric::into_json))
            .collect(),
    )
}

/// Text rendering of a NUMERIC value decoded from the binary wire format.
struct PgNumeric(String);

impl PgNumeric {
    fn into_json(self) -> Value {
        self.0
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .and_then(Number::from_f64)
            .map_or(Value::String(self.0), Value::Number)
    }
}

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        decode_numeric(raw).map(PgNumeric)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// INTERVAL as sent on the wire; displays in the server's default `postgres` style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PgInterval {
    microseconds: i64,
    days: i32,
    months: i32,
}

impl<'a> FromSql<'a> for PgInterval {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        let raw: &[u8; 16] = raw
            .try_into()
            .map_err(|_| format!("interval value has {} bytes, expected 16", raw.len()))?;
        let mut micros = [0u8; 8];
        micros.copy_from_slice(&raw[..8]);
        let mut days = [0u8; 4];
        days.copy_from_slice(&raw[8..12]);
        let mut months = [0u8; 4];
        months.copy_from_slice(&raw[12..]);

        Ok(PgInterval {
            microseconds: i64::from_be_bytes(micros),
            days: i32::from_be_bytes(days),
            months: i32::from_be_bytes(months),
        })
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::INTERVAL
    }
}

impl fmt::Display for PgInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        for (value, unit) in [
            (self.months / 12, "year"),
            (self.months % 12, "mon"),
            (self.days, "day"),
        ] {
            if value != 0 {
                let plural = if value == 1 { "" } else { "s" };
                parts.push(format!("{value} {unit}{plural}"));
            }
        }

        if self.microseconds != 0 || parts.is_empty() {
            let date_negative = self.months < 0 || self.days < 0;
            let sign = match (self.microseconds < 0, date_negative) {
                (true, _) => "-",
                (false, true) => "+",
                (false, false) => "",
            };
            let total = self.microseconds.unsigned_abs();
            let seconds = total / 1_000_000;
            let fraction = total % 1_000_000;
            let mut time = format!(
                "{sign}{:02}:{:02}:{:02}",
                seconds / 3600,
                seconds / 60 % 60,
                seconds % 60
            );
            if fraction > 0 {
                let digits = format!("{fraction:06}");
                time.push('.');
                time.push_str(digits.trim_end_matches('0'));
            }
            parts.push(time);
        }

        f.write_str(&parts.join(" "))
    }
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

fn decode_numeric(raw: &[u8]) -> Result<String, Box<dyn Error + Sync + Send>> {
    let word = |offset: usize| u16::from_be_bytes([raw[offset], raw[offset + 1]]);
    if raw.len() < 8 {
        return Err("numeric value is truncated".into());
    }

    let ndigits = word(0) as usize;
    let weight = word(2) as i16;
    let sign = word(4);
    let dscale = word(6) as usize;

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        _ => {}
    }

    if raw.len() < 8 + ndigits * 2 {
        return Err("numeric digits are truncated".into());
    }
    let digits: Vec<u16> = (0..ndigits).map(|i| word(8 + i * 2)).collect();
    let digit_at = |idx: i32| -> u16 {
        if idx < 0 {
            0
        } else {
            digits.get(idx as usize).copied().unwrap_or(0)
        }
    };

    let mut text = String::new();
    if sign == NUMERIC_NEG {
        text.push('-');
    }

    if weight < 0 {
        text.push('0');
    } else {
        for idx in 0..=i32::from(weight) {
            if idx == 0 {
                text.push_str(&digit_at(idx).to_string());
            } else {
                text.push_str(&format!("{:04}", digit_at(idx)));
            }
        }
    }

    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut idx = i32::from(weight) + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", digit_at(idx)));
            idx += 1;
        }
        fraction.truncate(dscale);
        text.push('.');
        text.push_str(&fraction);
    }

    Ok(text)
}
