//! Canonical lab-parameter codes plus the text-extraction fallback used when
//! an upstream collaborator hands us raw report text instead of structured
//! rows.

use regex::Regex;

use crate::units::normalize_unit;

/// Alias table applied after slugging. Keys are already-slugged forms.
const PARAMETER_ALIASES: &[(&str, &str)] = &[
    ("MOISTURE", "MOISTURE"),
    ("AFLATOXIN_B1", "AFLA_B1"),
    ("AFLA_B1", "AFLA_B1"),
    ("TOTAL_AFLATOXINS", "AFLA_TOTAL"),
    ("AFLA_TOTAL", "AFLA_TOTAL"),
    ("TOTAL_PLATE_COUNT", "TPC"),
    ("TPC", "TPC"),
];

/// Upper-cases, collapses runs of non-alphanumerics to single underscores,
/// trims edge underscores, then resolves known aliases. Deterministic and
/// pure; unknown names keep their slugged form.
pub fn normalize_parameter_code(parameter_name: &str) -> String {
    let mut slug = String::with_capacity(parameter_name.len());
    let mut pending_separator = false;

    for ch in parameter_name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('_');
            }
            pending_separator = false;
            slug.push(ch.to_ascii_uppercase());
        } else {
            pending_separator = true;
        }
    }

    for (alias, canonical) in PARAMETER_ALIASES {
        if *alias == slug {
            return (*canonical).to_string();
        }
    }
    slug
}

/// One extracted parameter observation candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedParameter {
    pub parameter_name: String,
    pub parameter_code: String,
    pub observed_value: f64,
    pub unit: String,
}

/// Line-oriented extraction of `name : value unit` / `name = value unit`
/// candidates from collaborator-supplied report text. Best-effort; rows the
/// pattern cannot read are skipped rather than reported.
pub fn parse_lab_text(raw_text: &str) -> Vec<ExtractedParameter> {
    let pattern = Regex::new(
        r"(?P<param>[A-Za-z0-9_\- ]+)\s*[:=]\s*(?P<value>\d+(?:\.\d+)?)\s*(?P<unit>[%a-zA-Z/0-9]+)",
    )
    .expect("lab text pattern is valid");

    let mut extracted = Vec::new();
    for captures in pattern.captures_iter(raw_text) {
        let parameter_name = captures["param"].trim().to_string();
        let Ok(observed_value) = captures["value"].parse::<f64>() else {
            continue;
        };
        let parameter_code = normalize_parameter_code(&parameter_name);
        extracted.push(ExtractedParameter {
            parameter_name,
            parameter_code,
            observed_value,
            unit: normalize_unit(&captures["unit"]),
        });
    }
    extracted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_parameter_code_applies_aliases() {
        assert_eq!(normalize_parameter_code("Aflatoxin B1"), "AFLA_B1");
        assert_eq!(normalize_parameter_code("Total Aflatoxins"), "AFLA_TOTAL");
        assert_eq!(normalize_parameter_code("Total Plate Count"), "TPC");
        assert_eq!(normalize_parameter_code("Moisture"), "MOISTURE");
    }

    #[test]
    fn normalize_parameter_code_slugs_unknown_names() {
        assert_eq!(normalize_parameter_code("  Lead (Pb)  "), "LEAD_PB");
        assert_eq!(normalize_parameter_code("pH--value"), "PH_VALUE");
        assert_eq!(normalize_parameter_code("__"), "");
    }

    #[test]
    fn normalize_parameter_code_is_idempotent() {
        for raw in ["Aflatoxin B1", "Total Plate Count", "Lead (Pb)", "Moisture %"] {
            let once = normalize_parameter_code(raw);
            assert_eq!(normalize_parameter_code(&once), once);
        }
    }

    #[test]
    fn parse_lab_text_extracts_rows() {
        let raw = "Moisture: 8.4 %\nAflatoxin B1 = 4 ppb";
        let rows = parse_lab_text(raw);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].parameter_name, "Moisture");
        assert_eq!(rows[0].observed_value, 8.4);
        assert_eq!(rows[0].unit, "%");
        assert_eq!(rows[1].parameter_code, "AFLA_B1");
        assert_eq!(rows[1].unit, "ug/kg");
    }

    #[test]
    fn parse_lab_text_skips_unreadable_lines() {
        let rows = parse_lab_text("no structured content here");
        assert!(rows.is_empty());
    }
}
