//! Cash reconciliation arithmetic.
//!
//! `total = apertura + ingresos + entradas - salidas` is the cash that should
//! be in the drawer; `diff = total - cierre` is how much of it is missing
//! (positive) or in surplus (negative). Every scalar goes through the
//! lenient parser, so text and numbers can be mixed freely.

use serde::Serialize;
use serde_json::Value;

use crate::models::{DayRecord, Movement, MovementKind};
use crate::money::{is_balanced, parse_num, RawAmount};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Totals {
    pub entradas: f64,
    pub salidas: f64,
    pub total: f64,
    pub diff: f64,
}

impl Totals {
    pub fn is_balanced(&self) -> bool {
        is_balanced(self.diff)
    }
}

/// Anything that can be summed as a treasury movement.
pub trait TreasuryMovement {
    fn kind(&self) -> Option<MovementKind>;
    fn amount(&self) -> f64;
}

impl TreasuryMovement for Movement {
    fn kind(&self) -> Option<MovementKind> {
        self.tipo
    }

    fn amount(&self) -> f64 {
        self.importe
    }
}

/// Untyped movements as they come out of a draft or an old export.
impl TreasuryMovement for Value {
    fn kind(&self) -> Option<MovementKind> {
        match self.get("tipo").and_then(Value::as_str) {
            Some("entrada") => Some(MovementKind::Entrada),
            Some("salida") => Some(MovementKind::Salida),
            _ => None,
        }
    }

    fn amount(&self) -> f64 {
        self.get("importe")
            .map(|v| parse_num(&RawAmount::from(v)))
            .unwrap_or(0.0)
    }
}

/// Compute entradas, salidas, theoretical total and difference.
///
/// Movements without a recognised `tipo` count towards neither side.
pub fn compute_totals<M: TreasuryMovement>(
    apertura: &RawAmount,
    ingresos: &RawAmount,
    movimientos: &[M],
    cierre: &RawAmount,
) -> Totals {
    let apertura = parse_num(apertura);
    let ingresos = parse_num(ingresos);
    let cierre = parse_num(cierre);

    let (entradas, salidas) =
        movimientos
            .iter()
            .fold((0.0, 0.0), |(entradas, salidas), mov| match mov.kind() {
                Some(MovementKind::Entrada) => (entradas + mov.amount(), salidas),
                Some(MovementKind::Salida) => (entradas, salidas + mov.amount()),
                None => (entradas, salidas),
            });

    let total = apertura + ingresos + entradas - salidas;
    Totals {
        entradas,
        salidas,
        total,
        diff: total - cierre,
    }
}

/// Same as [`compute_totals`] over a JSON movement list. Anything other than
/// an array counts as no movements; entries that are not objects are skipped.
pub fn compute_totals_json(
    apertura: &RawAmount,
    ingresos: &RawAmount,
    movimientos: &Value,
    cierre: &RawAmount,
) -> Totals {
    let items: Vec<Value> = match movimientos {
        Value::Array(items) => items.iter().filter(|v| v.is_object()).cloned().collect(),
        _ => Vec::new(),
    };
    compute_totals(apertura, ingresos, &items, cierre)
}

/// Totals of a stored closing.
pub fn record_totals(record: &DayRecord) -> Totals {
    compute_totals(
        &RawAmount::Number(record.apertura),
        &RawAmount::Number(record.ingresos),
        &record.movimientos,
        &RawAmount::Number(record.cierre),
    )
}

/// Exora (POS) card income minus the card terminal's own figure.
pub fn card_difference(exora: &RawAmount, datafono: &RawAmount) -> f64 {
    parse_num(exora) - parse_num(datafono)
}
