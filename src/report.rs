//! Plain-text summaries and discrepancy alerts.
//!
//! Only the content is produced here. Whoever delivers it (mail client,
//! alert endpoint) lives outside this crate.

use chrono::NaiveDate;
use serde::Serialize;

use crate::filters::DateRange;
use crate::keys::DayKey;
use crate::models::{DayRecord, MovementKind, UNSPECIFIED_PERSON};
use crate::money::{format_currency, format_date, is_balanced};
use crate::totals::record_totals;

const RULE: &str = "═══════════════════════════════════════";
const FOOTER: &str = "Sistema de Gestión de Caja Diaria";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub to: String,
    pub subject: String,
    pub body: String,
}

fn verdict(diff: f64) -> &'static str {
    if is_balanced(diff) {
        "✓ CUADRA"
    } else {
        "⚠ NO CUADRA"
    }
}

fn or_unspecified(name: &str) -> &str {
    if name.trim().is_empty() {
        UNSPECIFIED_PERSON
    } else {
        name
    }
}

/// "juanjo@..." greets "Juanjo".
fn greeting(to: &str) -> String {
    let local = to.split('@').next().unwrap_or_default();
    let mut chars = local.chars();
    match chars.next() {
        Some(first) => format!("Hola {}{},", first.to_uppercase(), chars.as_str()),
        None => "Hola,".to_string(),
    }
}

fn day(date: NaiveDate) -> String {
    format_date(&date.to_string())
}

/// Summary of one closing.
pub fn daily_summary(record: &DayRecord, fecha: NaiveDate, to: &str, generated: NaiveDate) -> Message {
    let totals = record_totals(record);
    let card_diff = record.card_difference();

    let movements = if record.movimientos.is_empty() {
        "   • No hay movimientos registrados".to_string()
    } else {
        let lines: Vec<String> = record
            .movimientos
            .iter()
            .filter_map(|mov| {
                let tipo = mov.tipo?;
                Some(format!(
                    "   - {}: {} € ({})",
                    tipo.label(),
                    format_currency(mov.importe),
                    mov.quien_or_default()
                ))
            })
            .collect();
        format!("\n   Detalle movimientos:\n{}", lines.join("\n"))
    };

    let body = format!(
        "{greeting}

RESUMEN DE CAJA DIARIA
Fecha: {fecha}
Sucursal: {sucursal}

{RULE}

1. APERTURA DE CAJA:
   • Apertura: {apertura} €
   • Responsable: {resp_apertura}

2. INGRESOS EN EFECTIVO:
   • Ingresos (Exora): {ingresos} €

3. GESTIÓN DE TESORERÍA:
   • Total Entradas: {entradas} €
   • Total Salidas: {salidas} €
{movements}

4. INGRESOS EN TARJETA:
   • Ingresos tarjeta (Exora): {exora} €
   • Ingresos tarjeta (Datáfono): {datafono} €

5. CIERRE DE CAJA:
   • Cierre: {cierre} €
   • Responsable: {resp_cierre}

6. DIFERENCIAS:
   • Diferencia Efectivo: {diff} € {diff_verdict}
   • Diferencia Tarjeta: {card_diff} € {card_verdict}

{RULE}

{FOOTER}
Generado automáticamente el {generated}",
        greeting = greeting(to),
        fecha = day(fecha),
        sucursal = record.sucursal,
        apertura = format_currency(record.apertura),
        resp_apertura = or_unspecified(&record.responsable_apertura),
        ingresos = format_currency(record.ingresos),
        entradas = format_currency(totals.entradas),
        salidas = format_currency(totals.salidas),
        exora = format_currency(record.ingresos_tarjeta_exora),
        datafono = format_currency(record.ingresos_tarjeta_datafono),
        cierre = format_currency(record.cierre),
        resp_cierre = or_unspecified(&record.responsable_cierre),
        diff = format_currency(totals.diff),
        diff_verdict = verdict(totals.diff),
        card_diff = format_currency(card_diff),
        card_verdict = verdict(card_diff),
        generated = day(generated),
    );

    Message {
        to: to.to_string(),
        subject: format!("Resumen Caja Diaria - {} - {}", record.sucursal, day(fecha)),
        body,
    }
}

/// Sums over every closing in a range.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Consolidated {
    pub sucursales: Vec<String>,
    pub dias: usize,
    pub apertura: f64,
    pub ingresos: f64,
    pub ingresos_tarjeta_exora: f64,
    pub ingresos_tarjeta_datafono: f64,
    pub entradas: f64,
    pub salidas: f64,
    pub cierre: f64,
}

impl Consolidated {
    /// Branches keep first-seen order.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a DayRecord>) -> Self {
        let mut acc = Self::default();
        for rec in records {
            acc.dias += 1;
            if !acc.sucursales.contains(&rec.sucursal) {
                acc.sucursales.push(rec.sucursal.clone());
            }
            acc.apertura += rec.apertura;
            acc.ingresos += rec.ingresos;
            acc.ingresos_tarjeta_exora += rec.ingresos_tarjeta_exora;
            acc.ingresos_tarjeta_datafono += rec.ingresos_tarjeta_datafono;
            acc.cierre += rec.cierre;
            for mov in &rec.movimientos {
                match mov.tipo {
                    Some(MovementKind::Entrada) => acc.entradas += mov.importe,
                    Some(MovementKind::Salida) => acc.salidas += mov.importe,
                    None => {}
                }
            }
        }
        acc
    }

    pub fn total_teorico(&self) -> f64 {
        self.apertura + self.ingresos + self.entradas - self.salidas
    }

    pub fn diferencia_efectivo(&self) -> f64 {
        self.total_teorico() - self.cierre
    }

    pub fn diferencia_tarjeta(&self) -> f64 {
        self.ingresos_tarjeta_exora - self.ingresos_tarjeta_datafono
    }
}

/// Consolidated summary of the closings in `range`. `None` when the range
/// holds no closing.
pub fn consolidated_summary(
    records: &[(DayKey, DayRecord)],
    range: &DateRange,
    to: &str,
    generated: NaiveDate,
) -> Option<Message> {
    let in_range: Vec<&DayRecord> = records
        .iter()
        .filter(|(key, _)| range.contains(key.fecha))
        .map(|(_, rec)| rec)
        .collect();
    if in_range.is_empty() {
        return None;
    }
    let c = Consolidated::from_records(in_range);
    let sucursales = c.sucursales.join(" y ");
    let (desde, hasta) = (day(range.desde), day(range.hasta));
    let diff = c.diferencia_efectivo();
    let card_diff = c.diferencia_tarjeta();

    let body = format!(
        "{greeting}

RESUMEN CONSOLIDADO DE CAJA
Período: {desde} - {hasta}
Sucursales: {sucursales}
Días procesados: {dias}

{RULE}

1. TOTALES DE APERTURA:
   • Total Aperturas: {apertura} €

2. TOTALES DE INGRESOS EN EFECTIVO:
   • Total Ingresos (Exora): {ingresos} €

3. TOTALES DE GESTIÓN DE TESORERÍA:
   • Total Entradas: {entradas} €
   • Total Salidas: {salidas} €

4. TOTALES DE INGRESOS EN TARJETA:
   • Total Ingresos tarjeta (Exora): {exora} €
   • Total Ingresos tarjeta (Datáfono): {datafono} €

5. TOTALES DE CIERRE:
   • Total Cierres: {cierre} €

6. DIFERENCIAS CONSOLIDADAS:
   • Diferencia Total Efectivo: {diff} € {diff_verdict}
   • Diferencia Total Tarjeta: {card_diff} € {card_verdict}

7. RESUMEN CALCULADO:
   • Total teórico en efectivo: {teorico} €
   • Total real cerrado: {cierre} €

{RULE}

{FOOTER}
Resumen consolidado generado el {generated}",
        greeting = greeting(to),
        dias = c.dias,
        apertura = format_currency(c.apertura),
        ingresos = format_currency(c.ingresos),
        entradas = format_currency(c.entradas),
        salidas = format_currency(c.salidas),
        exora = format_currency(c.ingresos_tarjeta_exora),
        datafono = format_currency(c.ingresos_tarjeta_datafono),
        cierre = format_currency(c.cierre),
        diff = format_currency(diff),
        diff_verdict = verdict(diff),
        card_diff = format_currency(card_diff),
        card_verdict = verdict(card_diff),
        teorico = format_currency(c.total_teorico()),
        generated = day(generated),
    );

    Some(Message {
        to: to.to_string(),
        subject: format!("Resumen Consolidado - {sucursales} - {desde} a {hasta}"),
        body,
    })
}

/// Body posted to the discrepancy alert endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertPayload {
    pub sucursal: String,
    pub fecha: String,
    pub diferencia: f64,
    pub detalle: String,
}

impl AlertPayload {
    /// The mail the alert endpoint sends for this payload.
    pub fn to_message(&self, to: &str) -> Message {
        Message {
            to: to.to_string(),
            subject: format!("Alerta de cierre - {} - {}", self.sucursal, self.fecha),
            body: format!(
                "Sucursal: {}\nFecha: {}\nDiferencia: {}\nDetalle:\n{}",
                self.sucursal, self.fecha, self.diferencia, self.detalle
            ),
        }
    }
}

/// Alert for a closing whose cash does not balance, `None` otherwise.
pub fn alert_for(key: &DayKey, record: &DayRecord) -> Option<AlertPayload> {
    let totals = record_totals(record);
    if totals.is_balanced() {
        return None;
    }
    let detalle = format!(
        "Cierre {key}\nTotal en caja: {} €\nCierre de caja: {} €\nDiferencia: {} €\nResponsable de cierre: {}",
        format_currency(totals.total),
        format_currency(record.cierre),
        format_currency(totals.diff),
        or_unspecified(&record.responsable_cierre),
    );
    Some(AlertPayload {
        sucursal: record.sucursal.clone(),
        fecha: key.fecha.to_string(),
        diferencia: (totals.diff * 100.0).round() / 100.0,
        detalle,
    })
}

/// Alerts for every unbalanced closing among `records`.
pub fn alerts(records: &[(DayKey, DayRecord)]) -> Vec<AlertPayload> {
    records
        .iter()
        .filter_map(|(key, rec)| alert_for(key, rec))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::parse_date;
    use crate::models::Movement;

    fn d(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn k(s: &str) -> DayKey {
        s.parse().unwrap()
    }

    fn rec(sucursal: &str, cierre: f64) -> DayRecord {
        DayRecord {
            sucursal: sucursal.into(),
            apertura: 100.0,
            responsable_apertura: "Juanjo".into(),
            ingresos: 50.0,
            ingresos_tarjeta_exora: 30.0,
            ingresos_tarjeta_datafono: 30.0,
            movimientos: vec![Movement::new(MovementKind::Entrada, "", 20.0)],
            cierre,
            ..Default::default()
        }
    }

    #[test]
    fn test_daily_summary() {
        let msg = daily_summary(
            &rec("Lliçà d'Amunt", 170.0),
            d("2025-08-01"),
            "juanjo@labarberiadejuanjo.com",
            d("2025-08-02"),
        );
        assert_eq!(msg.subject, "Resumen Caja Diaria - Lliçà d'Amunt - 1/8/2025");
        assert!(msg.body.starts_with("Hola Juanjo,\n\nRESUMEN DE CAJA DIARIA\nFecha: 1/8/2025"));
        assert!(msg.body.contains("   - Entrada: 20,00 € (No especificado)"));
        assert!(msg.body.contains("   • Responsable: No especificado"));
        assert!(msg.body.contains("Diferencia Efectivo: 0,00 € ✓ CUADRA"));
        assert!(msg.body.contains("Diferencia Tarjeta: 0,00 € ✓ CUADRA"));
        assert!(msg.body.ends_with("Generado automáticamente el 2/8/2025"));
    }

    #[test]
    fn test_daily_summary_flags_differences() {
        let mut r = rec("Parets del Vallès", 160.0);
        r.movimientos.clear();
        r.ingresos_tarjeta_datafono = 25.0;
        let msg = daily_summary(&r, d("2025-08-01"), "caja@example.com", d("2025-08-01"));
        assert!(msg.body.starts_with("Hola Caja,"));
        assert!(msg.body.contains("   • No hay movimientos registrados"));
        assert!(msg.body.contains("Diferencia Efectivo: -10,00 € ⚠ NO CUADRA"));
        assert!(msg.body.contains("Diferencia Tarjeta: 5,00 € ⚠ NO CUADRA"));
    }

    #[test]
    fn test_consolidated_summary() {
        let records = vec![
            (k("2025-08-01#1"), rec("Lliçà d'Amunt", 170.0)),
            (k("2025-08-02#1"), rec("Parets del Vallès", 165.0)),
            (k("2025-08-02#2"), rec("Lliçà d'Amunt", 170.0)),
            (k("2025-09-01#1"), rec("Granollers", 0.0)),
        ];
        let range = DateRange::new(d("2025-08-01"), d("2025-08-31")).unwrap();
        let msg = consolidated_summary(&records, &range, "juanjo@x.com", d("2025-09-02")).unwrap();
        assert_eq!(
            msg.subject,
            "Resumen Consolidado - Lliçà d'Amunt y Parets del Vallès - 1/8/2025 a 31/8/2025"
        );
        assert!(msg.body.contains("Días procesados: 3"));
        assert!(msg.body.contains("Total Aperturas: 300,00 €"));
        assert!(msg.body.contains("Total Entradas: 60,00 €"));
        assert!(msg.body.contains("Diferencia Total Efectivo: 5,00 € ⚠ NO CUADRA"));
        assert!(msg.body.contains("Total teórico en efectivo: 510,00 €"));
        assert!(msg.body.contains("Total real cerrado: 505,00 €"));

        let empty = DateRange::single(d("2024-01-01"));
        assert!(consolidated_summary(&records, &empty, "x@y", d("2025-01-01")).is_none());
    }

    #[test]
    fn test_alerts_only_for_unbalanced() {
        let records = vec![
            (k("2025-08-01#1"), rec("Lliçà d'Amunt", 170.0)),
            (k("2025-08-02#1"), rec("Parets del Vallès", 165.004)),
        ];
        let found = alerts(&records);
        assert_eq!(found.len(), 1);
        let alert = &found[0];
        assert_eq!(alert.sucursal, "Parets del Vallès");
        assert_eq!(alert.fecha, "2025-08-02");
        assert_eq!(alert.diferencia, 5.0);
        assert!(alert.detalle.contains("Cierre 2025-08-02#1"));

        let msg = alert.to_message("ops@example.com");
        assert_eq!(msg.subject, "Alerta de cierre - Parets del Vallès - 2025-08-02");
        assert!(msg.body.starts_with("Sucursal: Parets del Vallès\nFecha: 2025-08-02\nDiferencia: 5\n"));
    }
}
