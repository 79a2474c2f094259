//! The working form of one closing.
//!
//! A [`RegisterSession`] holds what the cashier has typed so far (raw text,
//! not yet normalized), the treasury movements added one by one, and the key
//! of the stored closing being edited, if any. It is persisted as a whole
//! under `caja:draft` so an interrupted closing survives a restart.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::db::{self, DbState};
use crate::error::{CajaError, Result};
use crate::keys::{parse_date, DayKey, DATE_FORMAT};
use crate::ledger::{self, DRAFT_KEY};
use crate::models::{de_movements, DayRecord, Movement, MovementKind};
use crate::money::{de_text, is_balanced, parse_num, RawAmount};
use crate::totals::{self, Totals};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegisterSession {
    #[serde(deserialize_with = "de_text")]
    pub fecha: String,
    #[serde(deserialize_with = "de_text")]
    pub sucursal: String,
    pub apertura: RawAmount,
    #[serde(deserialize_with = "de_text")]
    pub responsable_apertura: String,
    pub ingresos: RawAmount,
    pub ingresos_tarjeta_exora: RawAmount,
    pub ingresos_tarjeta_datafono: RawAmount,
    #[serde(deserialize_with = "de_movements")]
    pub movimientos: Vec<Movement>,
    pub cierre: RawAmount,
    #[serde(deserialize_with = "de_text")]
    pub responsable_cierre: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edit_key: Option<DayKey>,
}

/// Scalar form fields that can be set by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionField {
    Fecha,
    Sucursal,
    Apertura,
    ResponsableApertura,
    Ingresos,
    IngresosTarjetaExora,
    IngresosTarjetaDatafono,
    Cierre,
    ResponsableCierre,
}

impl SessionField {
    pub const ALL: [SessionField; 9] = [
        SessionField::Fecha,
        SessionField::Sucursal,
        SessionField::Apertura,
        SessionField::ResponsableApertura,
        SessionField::Ingresos,
        SessionField::IngresosTarjetaExora,
        SessionField::IngresosTarjetaDatafono,
        SessionField::Cierre,
        SessionField::ResponsableCierre,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SessionField::Fecha => "fecha",
            SessionField::Sucursal => "sucursal",
            SessionField::Apertura => "apertura",
            SessionField::ResponsableApertura => "responsableApertura",
            SessionField::Ingresos => "ingresos",
            SessionField::IngresosTarjetaExora => "ingresosTarjetaExora",
            SessionField::IngresosTarjetaDatafono => "ingresosTarjetaDatafono",
            SessionField::Cierre => "cierre",
            SessionField::ResponsableCierre => "responsableCierre",
        }
    }
}

impl fmt::Display for SessionField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SessionField {
    type Err = CajaError;

    /// Accepts the stored camelCase name or a kebab/snake spelling of it.
    fn from_str(s: &str) -> Result<Self> {
        let wanted: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        SessionField::ALL
            .into_iter()
            .find(|field| field.name().to_ascii_lowercase() == wanted)
            .ok_or_else(|| CajaError::Validation(format!("unknown field '{s}'")))
    }
}

impl RegisterSession {
    pub fn new(fecha: NaiveDate, sucursal: &str) -> Self {
        Self {
            fecha: fecha.format(DATE_FORMAT).to_string(),
            sucursal: sucursal.to_string(),
            ..Default::default()
        }
    }

    pub fn set(&mut self, field: SessionField, value: &str) {
        let amount = || RawAmount::Text(value.to_string());
        match field {
            SessionField::Fecha => self.fecha = value.trim().to_string(),
            SessionField::Sucursal => self.sucursal = value.trim().to_string(),
            SessionField::Apertura => self.apertura = amount(),
            SessionField::ResponsableApertura => self.responsable_apertura = value.trim().to_string(),
            SessionField::Ingresos => self.ingresos = amount(),
            SessionField::IngresosTarjetaExora => self.ingresos_tarjeta_exora = amount(),
            SessionField::IngresosTarjetaDatafono => self.ingresos_tarjeta_datafono = amount(),
            SessionField::Cierre => self.cierre = amount(),
            SessionField::ResponsableCierre => self.responsable_cierre = value.trim().to_string(),
        }
    }

    /// Append a treasury movement.
    ///
    /// The amount must be present and strictly positive once parsed; the
    /// direction is carried by `tipo`. A blank `quien` is recorded as
    /// "No especificado".
    pub fn add_movement(
        &mut self,
        tipo: MovementKind,
        quien: &str,
        importe: &RawAmount,
    ) -> Result<&Movement> {
        let blank = match importe {
            RawAmount::Missing => true,
            RawAmount::Text(s) => s.trim().is_empty(),
            RawAmount::Number(_) => false,
        };
        if blank {
            warn!("Movement rejected: missing amount");
            return Err(CajaError::Validation("Por favor introduce el importe".into()));
        }
        let value = parse_num(importe);
        if value <= 0.0 || !value.is_finite() {
            warn!(importe = value, "Movement rejected: amount must be greater than zero");
            return Err(CajaError::Validation(
                "Por favor introduce un importe válido mayor que 0".into(),
            ));
        }

        self.movimientos.push(Movement::new(tipo, quien, value));
        debug!(tipo = tipo.label(), importe = value, "Movement added");
        Ok(&self.movimientos[self.movimientos.len() - 1])
    }

    /// Remove the movement at `index`. Out-of-range indexes change nothing.
    pub fn remove_movement(&mut self, index: usize) -> Option<Movement> {
        if index < self.movimientos.len() {
            Some(self.movimientos.remove(index))
        } else {
            None
        }
    }

    pub fn totals(&self) -> Totals {
        totals::compute_totals(&self.apertura, &self.ingresos, &self.movimientos, &self.cierre)
    }

    pub fn card_difference(&self) -> f64 {
        totals::card_difference(&self.ingresos_tarjeta_exora, &self.ingresos_tarjeta_datafono)
    }

    pub fn card_balanced(&self) -> bool {
        is_balanced(self.card_difference())
    }

    pub fn fecha_date(&self) -> Result<NaiveDate> {
        parse_date(&self.fecha)
    }

    /// Build the record to store, stamped with `now`.
    pub fn to_record(&self, now: DateTime<Utc>) -> Result<DayRecord> {
        let fecha = self.fecha_date()?;
        if self.sucursal.trim().is_empty() {
            return Err(CajaError::Validation("Selecciona una sucursal".into()));
        }
        Ok(DayRecord {
            fecha: fecha.format(DATE_FORMAT).to_string(),
            sucursal: self.sucursal.trim().to_string(),
            apertura: parse_num(&self.apertura),
            responsable_apertura: self.responsable_apertura.trim().to_string(),
            ingresos: parse_num(&self.ingresos),
            ingresos_tarjeta_exora: parse_num(&self.ingresos_tarjeta_exora),
            ingresos_tarjeta_datafono: parse_num(&self.ingresos_tarjeta_datafono),
            movimientos: self.movimientos.clone(),
            cierre: parse_num(&self.cierre),
            responsable_cierre: self.responsable_cierre.trim().to_string(),
            hora_guardado: Some(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
            remote_id: None,
        })
    }

    /// Store the closing and keep editing it under the key it landed on.
    pub fn save(&mut self, db: &DbState, now: DateTime<Utc>) -> Result<DayKey> {
        let record = self.to_record(now)?;
        let fecha = self.fecha_date()?;
        let key = ledger::save_record(db, fecha, &record, self.edit_key.as_ref())?;
        self.edit_key = Some(key);
        Ok(key)
    }

    /// Delete the closing being edited, then reset the form.
    /// Returns `false` when nothing was being edited.
    pub fn delete(&mut self, db: &DbState) -> Result<bool> {
        let Some(key) = self.edit_key else {
            return Ok(false);
        };
        ledger::delete_record(db, &key)?;
        self.clear();
        Ok(true)
    }

    /// Open a stored closing for editing.
    pub fn load(db: &DbState, key: &DayKey) -> Result<Option<Self>> {
        let Some(record) = ledger::load_record(db, key)? else {
            return Ok(None);
        };
        Ok(Some(Self {
            fecha: key.fecha.format(DATE_FORMAT).to_string(),
            sucursal: record.sucursal,
            apertura: RawAmount::Number(record.apertura),
            responsable_apertura: record.responsable_apertura,
            ingresos: RawAmount::Number(record.ingresos),
            ingresos_tarjeta_exora: RawAmount::Number(record.ingresos_tarjeta_exora),
            ingresos_tarjeta_datafono: RawAmount::Number(record.ingresos_tarjeta_datafono),
            movimientos: record.movimientos,
            cierre: RawAmount::Number(record.cierre),
            responsable_cierre: record.responsable_cierre,
            edit_key: Some(*key),
        }))
    }

    /// Empty the form. The date and the active branch stay.
    pub fn clear(&mut self) {
        *self = Self {
            fecha: std::mem::take(&mut self.fecha),
            sucursal: std::mem::take(&mut self.sucursal),
            ..Default::default()
        };
    }

    // -- Drafts --------------------------------------------------------------

    pub fn save_draft(&self, db: &DbState) -> Result<()> {
        let conn = db.conn.lock()?;
        db::kv_set(&conn, DRAFT_KEY, &serde_json::to_string(self)?)?;
        debug!(fecha = %self.fecha, movimientos = self.movimientos.len(), "Draft saved");
        Ok(())
    }

    /// The stored draft, if any. A draft that no longer parses is discarded.
    pub fn load_draft(db: &DbState) -> Result<Option<Self>> {
        let conn = db.conn.lock()?;
        let Some(raw) = db::kv_get(&conn, DRAFT_KEY)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable draft");
                db::kv_remove(&conn, DRAFT_KEY)?;
                Ok(None)
            }
        }
    }

    pub fn discard_draft(db: &DbState) -> Result<()> {
        let conn = db.conn.lock()?;
        if db::kv_remove(&conn, DRAFT_KEY)? {
            info!("Draft discarded");
        }
        Ok(())
    }
}
