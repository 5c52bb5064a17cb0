//! Canonical measurement units. Cross-standard comparison only makes sense
//! after both sides agree on the unit spelling, so every unit string entering
//! the system passes through `normalize_unit` first.

/// Exact alias table applied after lower-casing, micro-sign folding, and
/// whitespace collapsing. Unknown units pass through unchanged.
const UNIT_ALIASES: &[(&str, &str)] = &[
    ("%", "%"),
    ("percent", "%"),
    ("percentage", "%"),
    ("ppb", "ug/kg"),
    ("ug/kg", "ug/kg"),
    ("µg/kg", "ug/kg"),
    ("mcg/kg", "ug/kg"),
    ("ppm", "mg/kg"),
    ("mg/kg", "mg/kg"),
    ("cfu/g", "cfu/g"),
    ("cfu per g", "cfu/g"),
    ("cfu/25g", "cfu/25g"),
    ("cfu per 25g", "cfu/25g"),
    ("absence/25g", "cfu/25g"),
    ("absent/25g", "cfu/25g"),
];

pub fn normalize_unit(raw_unit: &str) -> String {
    let cleaned = raw_unit.trim();
    if cleaned.is_empty() {
        return String::new();
    }

    // U+03BC (Greek mu) and U+00B5 (micro sign) appear interchangeably in lab
    // exports; fold both to the plain-ascii spelling before the alias lookup.
    let lowered = cleaned.to_lowercase().replace('μ', "µ");
    let compact = lowered.split_whitespace().collect::<Vec<_>>().join(" ");

    for (alias, canonical) in UNIT_ALIASES {
        if *alias == compact {
            return (*canonical).to_string();
        }
    }
    compact
}

/// Exact conversion between canonical units, used when an observation and a
/// threshold arrive in compatible mass-fraction units. Returns `None` when no
/// lossless conversion exists.
pub fn convert_value(value: f64, from_unit: &str, to_unit: &str) -> Option<f64> {
    let from = normalize_unit(from_unit);
    let to = normalize_unit(to_unit);

    if from == to {
        return Some(value);
    }
    match (from.as_str(), to.as_str()) {
        ("ug/kg", "mg/kg") => Some(value / 1000.0),
        ("mg/kg", "ug/kg") => Some(value * 1000.0),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_unit_maps_known_aliases() {
        assert_eq!(normalize_unit("ppb"), "ug/kg");
        assert_eq!(normalize_unit("ppm"), "mg/kg");
        assert_eq!(normalize_unit("CFU/25g"), "cfu/25g");
        assert_eq!(normalize_unit("percent"), "%");
        assert_eq!(normalize_unit("%"), "%");
        assert_eq!(normalize_unit("Absence/25g"), "cfu/25g");
    }

    #[test]
    fn normalize_unit_folds_micro_sign_variants() {
        assert_eq!(normalize_unit("µg/kg"), "ug/kg");
        assert_eq!(normalize_unit("μg/kg"), "ug/kg");
    }

    #[test]
    fn normalize_unit_collapses_whitespace_and_passes_unknown_through() {
        assert_eq!(normalize_unit("  CFU  per  g "), "cfu/g");
        assert_eq!(normalize_unit("Brix"), "brix");
        assert_eq!(normalize_unit(""), "");
    }

    #[test]
    fn normalize_unit_is_idempotent() {
        for raw in ["ppb", "PPM", "µg/kg", "cfu per 25g", "unknown-unit", "  % "] {
            let once = normalize_unit(raw);
            assert_eq!(normalize_unit(&once), once);
        }
    }

    #[test]
    fn convert_value_handles_mass_fraction_pairs() {
        assert_eq!(convert_value(1000.0, "ug/kg", "mg/kg"), Some(1.0));
        assert_eq!(convert_value(0.1, "mg/kg", "ug/kg"), Some(100.0));
        assert_eq!(convert_value(5.0, "%", "mg/kg"), None);
        assert_eq!(convert_value(2.5, "ppb", "ug/kg"), Some(2.5));
    }
}
