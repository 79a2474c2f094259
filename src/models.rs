use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::money::{de_amount, de_text};

pub const UNSPECIFIED_PERSON: &str = "No especificado";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementKind {
    Entrada,
    Salida,
}

impl MovementKind {
    pub fn label(self) -> &'static str {
        match self {
            MovementKind::Entrada => "Entrada",
            MovementKind::Salida => "Salida",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "entrada" | "in" => Some(MovementKind::Entrada),
            "salida" | "out" => Some(MovementKind::Salida),
            _ => None,
        }
    }
}

/// A treasury movement (cash injection or withdrawal) within one closing.
///
/// Stored data may predate validation, so `tipo` tolerates unknown values
/// (kept as `None`, ignored by the totals) and `importe` tolerates strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movement {
    #[serde(
        default,
        deserialize_with = "de_kind",
        skip_serializing_if = "Option::is_none"
    )]
    pub tipo: Option<MovementKind>,
    #[serde(default, deserialize_with = "de_text")]
    pub quien: String,
    #[serde(default, deserialize_with = "de_amount")]
    pub importe: f64,
}

impl Movement {
    pub fn new(tipo: MovementKind, quien: &str, importe: f64) -> Self {
        let quien = quien.trim();
        Self {
            tipo: Some(tipo),
            quien: if quien.is_empty() {
                UNSPECIFIED_PERSON.to_string()
            } else {
                quien.to_string()
            },
            importe,
        }
    }

    pub fn quien_or_default(&self) -> &str {
        if self.quien.trim().is_empty() {
            UNSPECIFIED_PERSON
        } else {
            &self.quien
        }
    }
}

fn de_kind<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<MovementKind>, D::Error> {
    let v = Value::deserialize(deserializer)?;
    Ok(match v {
        Value::String(s) => match s.as_str() {
            "entrada" => Some(MovementKind::Entrada),
            "salida" => Some(MovementKind::Salida),
            _ => None,
        },
        _ => None,
    })
}

/// One cash-register closing as persisted under `caja:<key>`.
///
/// Field names match the stored JSON so records written by earlier versions
/// load unchanged; every field is optional on read.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DayRecord {
    #[serde(deserialize_with = "de_text")]
    pub fecha: String,
    #[serde(deserialize_with = "de_text")]
    pub sucursal: String,
    #[serde(deserialize_with = "de_amount")]
    pub apertura: f64,
    #[serde(deserialize_with = "de_text")]
    pub responsable_apertura: String,
    #[serde(deserialize_with = "de_amount")]
    pub ingresos: f64,
    #[serde(deserialize_with = "de_amount")]
    pub ingresos_tarjeta_exora: f64,
    #[serde(deserialize_with = "de_amount")]
    pub ingresos_tarjeta_datafono: f64,
    #[serde(deserialize_with = "de_movements")]
    pub movimientos: Vec<Movement>,
    #[serde(deserialize_with = "de_amount")]
    pub cierre: f64,
    #[serde(deserialize_with = "de_text")]
    pub responsable_cierre: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hora_guardado: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
}

impl DayRecord {
    pub fn card_difference(&self) -> f64 {
        self.ingresos_tarjeta_exora - self.ingresos_tarjeta_datafono
    }
}

/// Non-array movement lists read as empty; non-object entries are dropped.
pub(crate) fn de_movements<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Movement>, D::Error> {
    let v = Value::deserialize(deserializer)?;
    let Value::Array(items) = v else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .filter(Value::is_object)
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect())
}
