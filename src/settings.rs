//! Local preferences: the active branch, the report recipient and the
//! employee roster of each branch. Stored in `local_settings`.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::info;

use crate::db::{self, DbState};
use crate::error::{CajaError, Result};

const CATEGORY_GENERAL: &str = "general";
const CATEGORY_EMPLOYEES: &str = "employees";

const KEY_BRANCH: &str = "sucursal";
const KEY_EMAIL_TO: &str = "email_to";

pub const DEFAULT_EMAIL_TO: &str = "juanjo@labarberiadejuanjo.com";

/// Rosters used until a branch gets its own list.
pub fn default_rosters() -> BTreeMap<String, Vec<String>> {
    BTreeMap::from([
        (
            "Lliçà d'Amunt".to_string(),
            vec!["Juanjo", "Jordi", "Ian Paul", "Miquel"]
                .into_iter()
                .map(String::from)
                .collect(),
        ),
        (
            "Parets del Vallès".to_string(),
            vec!["Juanjo", "Quim", "Genís", "Alex"]
                .into_iter()
                .map(String::from)
                .collect(),
        ),
    ])
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub sucursal: Option<String>,
    pub email_to: String,
    pub employees: BTreeMap<String, Vec<String>>,
}

pub fn load(db: &DbState) -> Result<Settings> {
    Ok(Settings {
        sucursal: branch(db)?,
        email_to: email_to(db)?,
        employees: rosters(db)?,
    })
}

pub fn branch(db: &DbState) -> Result<Option<String>> {
    let conn = db.conn.lock()?;
    Ok(db::get_setting(&conn, CATEGORY_GENERAL, KEY_BRANCH).filter(|s| !s.trim().is_empty()))
}

pub fn set_branch(db: &DbState, sucursal: &str) -> Result<()> {
    let sucursal = sucursal.trim();
    if sucursal.is_empty() {
        return Err(CajaError::Validation("Selecciona una sucursal".into()));
    }
    let conn = db.conn.lock()?;
    db::set_setting(&conn, CATEGORY_GENERAL, KEY_BRANCH, sucursal)?;
    info!(sucursal = %sucursal, "Active branch changed");
    Ok(())
}

pub fn email_to(db: &DbState) -> Result<String> {
    let conn = db.conn.lock()?;
    Ok(db::get_setting(&conn, CATEGORY_GENERAL, KEY_EMAIL_TO)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_EMAIL_TO.to_string()))
}

pub fn set_email_to(db: &DbState, address: &str) -> Result<()> {
    let address = address.trim();
    if !address.contains('@') {
        return Err(CajaError::Validation(format!(
            "'{address}' no es una dirección de email"
        )));
    }
    let conn = db.conn.lock()?;
    db::set_setting(&conn, CATEGORY_GENERAL, KEY_EMAIL_TO, address)
}

/// Every branch roster: stored lists override the defaults.
pub fn rosters(db: &DbState) -> Result<BTreeMap<String, Vec<String>>> {
    let conn = db.conn.lock()?;
    let mut all = default_rosters();
    for (branch, raw) in db::get_category_settings(&conn, CATEGORY_EMPLOYEES)? {
        let names: Vec<String> = serde_json::from_str(&raw)?;
        all.insert(branch, names);
    }
    Ok(all)
}

/// Employees of one branch; unknown branches have none.
pub fn employees(db: &DbState, sucursal: &str) -> Result<Vec<String>> {
    Ok(rosters(db)?.remove(sucursal).unwrap_or_default())
}

/// Replace a branch roster. Blank names are dropped and duplicates collapsed.
pub fn set_employees(db: &DbState, sucursal: &str, names: &[String]) -> Result<Vec<String>> {
    let mut cleaned: Vec<String> = Vec::with_capacity(names.len());
    for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
        if !cleaned.iter().any(|c| c == name) {
            cleaned.push(name.to_string());
        }
    }
    let conn = db.conn.lock()?;
    db::set_setting(
        &conn,
        CATEGORY_EMPLOYEES,
        sucursal.trim(),
        &serde_json::to_string(&cleaned)?,
    )?;
    info!(sucursal = %sucursal, count = cleaned.len(), "Employee roster updated");
    Ok(cleaned)
}

/// Drop a stored roster, falling back to the default (if any).
pub fn reset_employees(db: &DbState, sucursal: &str) -> Result<()> {
    let conn = db.conn.lock()?;
    db::delete_setting(&conn, CATEGORY_EMPLOYEES, sucursal.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;

    #[test]
    fn test_defaults() {
        let db = test_db();
        let s = load(&db).unwrap();
        assert_eq!(s.sucursal, None);
        assert_eq!(s.email_to, DEFAULT_EMAIL_TO);
        assert_eq!(
            employees(&db, "Parets del Vallès").unwrap(),
            vec!["Juanjo", "Quim", "Genís", "Alex"]
        );
        assert!(employees(&db, "Granollers").unwrap().is_empty());
    }

    #[test]
    fn test_branch_and_email() {
        let db = test_db();
        assert!(set_branch(&db, "  ").is_err());
        set_branch(&db, " Lliçà d'Amunt ").unwrap();
        assert_eq!(branch(&db).unwrap().as_deref(), Some("Lliçà d'Amunt"));

        assert!(set_email_to(&db, "nope").is_err());
        set_email_to(&db, "caja@example.com").unwrap();
        assert_eq!(email_to(&db).unwrap(), "caja@example.com");
    }

    #[test]
    fn test_roster_override_and_reset() {
        let db = test_db();
        let names = vec!["Ana".to_string(), " ".into(), "Ana".into(), "Luis ".into()];
        assert_eq!(set_employees(&db, "Granollers", &names).unwrap(), vec!["Ana", "Luis"]);
        set_employees(&db, "Lliçà d'Amunt", &["Juanjo".to_string()]).unwrap();

        let all = rosters(&db).unwrap();
        assert_eq!(all["Granollers"], vec!["Ana", "Luis"]);
        assert_eq!(all["Lliçà d'Amunt"], vec!["Juanjo"]);
        assert_eq!(all["Parets del Vallès"].len(), 4);

        reset_employees(&db, "Lliçà d'Amunt").unwrap();
        assert_eq!(employees(&db, "Lliçà d'Amunt").unwrap().len(), 4);
    }
}
