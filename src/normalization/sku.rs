//! SKU string normalization.
//!
//! External channels disagree on casing and whitespace, and several of them
//! decorate a base SKU with channel-specific affixes (a trailing `_EM` on
//! MercadoLibre fulfillment listings, `_NR` on no-return listings, a leading
//! `ANU-` on annulled/relisted items). Matching always happens on the
//! normalized form; affix stripping only ever produces *candidates* that the
//! resolver re-checks against the catalog.

/// Suffixes that channels append to an otherwise-canonical SKU.
const STRIPPABLE_SUFFIXES: [&str; 2] = ["_EM", "_NR"];

/// Prefixes that channels prepend to an otherwise-canonical SKU.
const STRIPPABLE_PREFIXES: [&str; 1] = ["ANU-"];

/// Canonical comparison form: trimmed, uppercase.
pub fn normalize_sku(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Candidate base SKUs derived by stripping known channel affixes from an
/// already-normalized SKU.
///
/// Order is fixed (suffix strips first, then prefix, then both) so the
/// resolver's derived-pattern step stays deterministic. The input itself is
/// never included; candidates that would be empty are skipped.
pub fn derived_candidates(normalized: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();

    let mut push = |candidate: &str| {
        if !candidate.is_empty()
            && candidate != normalized
            && !out.iter().any(|c| c == candidate)
        {
            out.push(candidate.to_string());
        }
    };

    for suffix in STRIPPABLE_SUFFIXES {
        if let Some(base) = normalized.strip_suffix(suffix) {
            push(base);
        }
    }
    for prefix in STRIPPABLE_PREFIXES {
        if let Some(base) = normalized.strip_prefix(prefix) {
            push(base);
        }
    }
    // Combined strips, e.g. "ANU-XXXX_EM" -> "XXXX"
    for prefix in STRIPPABLE_PREFIXES {
        if let Some(without_prefix) = normalized.strip_prefix(prefix) {
            for suffix in STRIPPABLE_SUFFIXES {
                if let Some(base) = without_prefix.strip_suffix(suffix) {
                    push(base);
                }
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_and_uppercases() {
        assert_eq!(normalize_sku("  bar-chia-001 "), "BAR-CHIA-001");
        assert_eq!(normalize_sku("packcrsurtido"), "PACKCRSURTIDO");
    }

    #[test]
    fn strips_known_suffixes() {
        assert_eq!(
            derived_candidates("XXXX_U04010_EM"),
            vec!["XXXX_U04010".to_string()]
        );
        assert_eq!(
            derived_candidates("BAR-CACAO_NR"),
            vec!["BAR-CACAO".to_string()]
        );
    }

    #[test]
    fn strips_known_prefixes_and_combinations() {
        assert_eq!(
            derived_candidates("ANU-BAR-CHIA-001"),
            vec!["BAR-CHIA-001".to_string()]
        );
        assert_eq!(
            derived_candidates("ANU-XXXX_EM"),
            vec![
                "ANU-XXXX".to_string(),
                "XXXX_EM".to_string(),
                "XXXX".to_string()
            ]
        );
    }

    #[test]
    fn no_affix_means_no_candidates() {
        assert!(derived_candidates("BAR-CHIA-001").is_empty());
        // Affix alone must not collapse to an empty candidate.
        assert!(derived_candidates("_EM").is_empty());
        assert!(derived_candidates("ANU-").is_empty());
    }
}
