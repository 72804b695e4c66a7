//! Choosing a grouping column and rendering grouped Markdown summaries.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};

use crate::services::excel::table::{Cell, CellKey, Table};
use crate::services::text::{best_match, normalize, truncate_chars};

const MAX_GROUPS: usize = 30;
const MAX_ITEMS_PER_GROUP: usize = 30;
const MAX_DETAIL_CHARS: usize = 240;

static EXPLICIT_GROUP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:agrup(?:a|ar)|resumen|agrupado|group(?:ed)?)\s+(?:por|by)\s+([^\n\r\t,.;:]{2,60})")
        .expect("valid group hint regex")
});
static LOOSE_GROUP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:por|by)\s+([^\n\r\t,.;:]{2,60})").expect("valid group hint regex"));

const HINT_CUTS: [&str; 15] = [
    " y ", " con ", " de ", " del ", " para ", " donde ", " que ", " en ", " and ", " with ", " of ",
    " for ", " where ", " that ", " in ",
];

pub const SEMANTIC_GROUP_TERMS: &[&str] = &[
    "carrera", "programa", "plan", "nombre carrera", "cliente", "nombre cliente", "proveedor",
    "vendedor", "responsable", "sucursal", "agencia", "region", "comuna", "ciudad", "pais",
    "departamento", "area", "categoria", "tipo", "estado", "canal", "mes", "anio", "año", "fecha",
    "customer", "client", "supplier", "seller", "branch", "city", "country", "department",
    "category", "type", "status", "channel", "month", "year", "date",
];

const SHORT_ID_TOKENS: [&str; 4] = ["id", "rut", "dni", "nro"];
const LONG_ID_TOKENS: [&str; 11] = [
    "uuid", "codigo", "code", "cedula", "correo", "email", "telefono", "phone", "celular", "numero", "folio",
];
const HUMAN_NAME_TOKENS: [&str; 10] =
    ["nombre", "tipo", "categoria", "estado", "grupo", "name", "type", "category", "status", "group"];

/// "agrupa por carrera y jornada" -> "carrera".
pub fn extract_group_hint(question: &str) -> Option<String> {
    let q = normalize(question);
    if q.is_empty() {
        return None;
    }
    let caps = EXPLICIT_GROUP_RE.captures(&q).or_else(|| LOOSE_GROUP_RE.captures(&q))?;
    let mut hint = caps.get(1)?.as_str().trim().to_string();
    for cut in HINT_CUTS {
        if let Some((head, _)) = hint.split_once(cut) {
            hint = head.trim().to_string();
        }
    }
    (hint.chars().count() >= 2).then_some(hint)
}

/// Identifier-like names make poor grouping keys. Short tokens must match a
/// whole word so `id` does not exclude `pedido` or `unidad`, nor `rut` `ruta`.
pub fn is_probably_identifier(name: &str) -> bool {
    let n = normalize(name);
    let words: Vec<&str> = n.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()).collect();
    SHORT_ID_TOKENS.iter().any(|t| words.contains(t)) || LONG_ID_TOKENS.iter().any(|t| n.contains(t))
}

/// First candidate term that fuzzily resolves onto a column.
pub fn pick_semantic_column(table: &Table, candidates: &[&str]) -> Option<String> {
    let cols = table.column_names();
    candidates
        .iter()
        .find_map(|cand| best_match(cand, &cols))
        .map(str::to_string)
}

fn by_cardinality(table: &Table) -> Option<String> {
    let nrows = table.nrows();
    let ceiling = 50usize.min(10usize.max((nrows as f64 * 0.6) as usize));
    let mut best: Option<(f64, &str)> = None;
    for col in table.columns() {
        if col.name.starts_with('_') || is_probably_identifier(&col.name) {
            continue;
        }
        let nunique = col.nunique();
        if nunique < 2 || nunique > ceiling {
            continue;
        }
        let mut score = 1.0 / nunique as f64;
        let name_n = normalize(&col.name);
        if HUMAN_NAME_TOKENS.iter().any(|t| name_n.contains(t)) {
            score += 0.05;
        }
        if best.map_or(true, |(s, _)| score > s) {
            best = Some((score, col.name.as_str()));
        }
    }
    best.map(|(_, name)| name.to_string())
}

/// Picks a column to group by. Preference order: a plan-supplied column,
/// a "by X" hint in the question, a known semantic name, then the
/// low-cardinality column with the most human-looking name.
pub fn pick_group_column(table: &Table, question: &str, preferred: &[String]) -> Option<String> {
    if table.is_empty() {
        return None;
    }
    let cols = table.column_names();

    if let Some(found) = preferred.iter().find_map(|p| best_match(p, &cols)) {
        return Some(found.to_string());
    }
    if let Some(hint) = extract_group_hint(question) {
        if let Some(found) = best_match(&hint, &cols) {
            tracing::debug!("Group column {} taken from question hint {:?}", found, hint);
            return Some(found.to_string());
        }
    }
    pick_semantic_column(table, SEMANTIC_GROUP_TERMS).or_else(|| by_cardinality(table))
}

fn group_label(cell: &Cell) -> String {
    if cell.is_null() {
        "(empty)".to_string()
    } else {
        cell.to_string()
    }
}

struct DetailColumns {
    course: Option<usize>,
    schedule: Option<usize>,
}

impl DetailColumns {
    fn resolve(table: &Table) -> Self {
        let position = |name: Option<String>| {
            name.and_then(|n| table.column_names().iter().position(|c| *c == n))
        };
        Self {
            course: position(pick_semantic_column(
                table,
                &["ramo", "asignatura", "curso", "modulo", "materia", "nombre ramo"],
            )),
            schedule: position(pick_semantic_column(
                table,
                &["horario", "hora", "bloque", "dia", "inicio", "fin", "desde", "hasta"],
            )),
        }
    }

    fn detail(&self, table: &Table, row: usize) -> String {
        let mut parts: Vec<String> = Vec::new();
        for idx in [self.course, self.schedule].into_iter().flatten() {
            if let Some(cell) = table.cell(row, idx).filter(|c| !c.is_null()) {
                parts.push(cell.to_string());
            }
        }
        if parts.is_empty() {
            for col in table.columns().iter().take(3) {
                let cell = &col.cells[row];
                if !cell.is_null() {
                    parts.push(format!("{}={}", col.name, cell));
                }
            }
        }
        truncate_chars(&parts.join(" | "), MAX_DETAIL_CHARS).to_string()
    }
}

/// Markdown digest with one section per group and de-duplicated detail
/// lines. `None` when the table is empty or no grouping column qualifies.
pub fn grouped_summary_markdown(table: &Table, question: &str, preferred: &[String]) -> Option<String> {
    if table.is_empty() {
        return None;
    }
    let group_col = pick_group_column(table, question, preferred)?;
    let group_cells = &table.column(&group_col)?.cells;
    let details = DetailColumns::resolve(table);

    let mut slots: HashMap<CellKey, usize> = HashMap::new();
    let mut groups: Vec<(&Cell, Vec<usize>)> = Vec::new();
    for (row, cell) in group_cells.iter().enumerate() {
        let slot = *slots.entry(cell.key()).or_insert_with(|| {
            groups.push((cell, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(row);
    }
    groups.sort_by_cached_key(|(cell, _)| normalize(&group_label(cell)));

    let truncated = groups.len().saturating_sub(MAX_GROUPS);
    let mut out = vec![format!("**Summary by {}**", group_col)];

    for (cell, rows) in groups.iter().take(MAX_GROUPS) {
        out.push(format!("\n### {}", group_label(cell)));

        let mut seen = HashSet::new();
        let mut items: Vec<String> = Vec::new();
        for &row in rows {
            let detail = details.detail(table, row);
            let key = normalize(&detail);
            if key.is_empty() || !seen.insert(key) {
                continue;
            }
            items.push(detail);
            if items.len() >= MAX_ITEMS_PER_GROUP {
                break;
            }
        }
        for item in &items {
            out.push(format!("- {}", item));
        }
        if rows.len() > items.len() {
            out.push(format!("- … (showing {} of {} rows)", items.len(), rows.len()));
        }
    }

    if truncated > 0 {
        out.push(format!("\n_… and {} more group(s) (summary truncated)._", truncated));
    }
    Some(out.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn courses() -> Table {
        Table::from_rows(
            vec!["carrera".into(), "ramo".into(), "horario".into()],
            vec![
                vec!["Ingeniería".into(), "Cálculo".into(), "Lunes 19:00".into()],
                vec!["Ingeniería".into(), "Cálculo".into(), "Lunes 19:00".into()],
                vec!["Diseño".into(), "Color".into(), Cell::Null],
                vec![Cell::Null, "Ética".into(), "Martes".into()],
            ],
        )
    }

    #[test]
    fn hint_is_cut_at_connectors() {
        assert_eq!(extract_group_hint("Agrupa por Carrera y jornada").as_deref(), Some("carrera"));
        assert_eq!(extract_group_hint("promedio de ventas por región").as_deref(), Some("region"));
        assert_eq!(extract_group_hint("total sales by store for 2024").as_deref(), Some("store"));
        assert_eq!(extract_group_hint("porcentaje"), None);
    }

    #[test]
    fn short_identifier_tokens_match_whole_words() {
        assert!(is_probably_identifier("ID Cliente"));
        assert!(is_probably_identifier("codigo_producto"));
        assert!(is_probably_identifier("pedido_id"));
        assert!(!is_probably_identifier("Pedido"));
        assert!(!is_probably_identifier("Unidad"));
        assert!(!is_probably_identifier("Ruta"));
        assert!(!is_probably_identifier("Categoría"));
    }

    #[test]
    fn preferred_then_hint_then_semantic() {
        let t = Table::from_rows(
            vec!["tienda".into(), "estado".into(), "monto".into()],
            vec![vec!["A".into(), "ok".into(), Cell::Int(1)]],
        );
        assert_eq!(pick_group_column(&t, "", &["Tienda".into()]).as_deref(), Some("tienda"));
        assert_eq!(pick_group_column(&t, "resumen por tienda", &[]).as_deref(), Some("tienda"));
        assert_eq!(pick_group_column(&t, "resumen", &[]).as_deref(), Some("estado"));
    }

    #[test]
    fn cardinality_fallback_prefers_fewer_values_and_human_names() {
        let rows: Vec<Vec<Cell>> = (0..12)
            .map(|i| vec![Cell::Int(i), Cell::text(["x", "y", "z"][i as usize % 3]), Cell::text(["p", "q"][i as usize % 2])])
            .collect();
        let t = Table::from_rows(vec!["folio".into(), "letra".into(), "grupo".into()], rows);
        assert_eq!(pick_group_column(&t, "", &[]).as_deref(), Some("grupo"));
        let unique = Table::from_rows(vec!["zz".into()], vec![vec![Cell::Int(1)]]);
        assert_eq!(pick_group_column(&unique, "", &[]), None);
    }

    #[test]
    fn markdown_sections_dedupe_details() {
        let md = grouped_summary_markdown(&courses(), "", &["carrera".into()]).unwrap();
        let expected = "**Summary by carrera**\n\n### (empty)\n- Ética | Martes\n\n### Diseño\n- Color\n\n### Ingeniería\n- Cálculo | Lunes 19:00\n- … (showing 1 of 2 rows)";
        assert_eq!(md, expected);
    }

    #[test]
    fn group_list_is_capped() {
        let rows: Vec<Vec<Cell>> = (0..35).map(|i| vec![Cell::text(format!("g{:02}", i)), Cell::Int(i)]).collect();
        let t = Table::from_rows(vec!["grupo".into(), "n".into()], rows);
        let md = grouped_summary_markdown(&t, "", &["grupo".into()]).unwrap();
        assert_eq!(md.matches("\n### ").count(), MAX_GROUPS);
        assert!(md.ends_with("_… and 5 more group(s) (summary truncated)._"));
    }
}
