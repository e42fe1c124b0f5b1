//! Two-tier label validation.
//!
//! Tier 1 (structural) always runs and needs only the extracted fields.
//! Tier 2 (accuracy) runs per field, only where the caller supplied a
//! reference value; every other accuracy check is recorded as skipped.

use std::collections::HashMap;
use std::time::Instant;

use crate::models::label::{ExtractedFields, ProductCategory, ReferenceFields};
use crate::models::verification::{
    ComplianceStatus, FieldCheck, SkipReason, SkippedCheck, Tier, TierResults, ValidationLevel,
    ValidationResult, Violation,
};
use crate::services::extractor::{GOVERNMENT_WARNING_HEADER, GOVERNMENT_WARNING_TEXT};
use crate::services::ttb_standards;

/// Pass threshold for brand, class/type, net contents and bottler comparisons.
pub const FUZZY_MATCH_THRESHOLD: f64 = 0.90;

/// Looser threshold for the long, noisy warning block.
pub const WARNING_MATCH_THRESHOLD: f64 = 0.85;

/// Extraction confidence below which a warning is attached to the result.
const LOW_CONFIDENCE: f64 = 0.5;

/// Accuracy checks in report order.
pub const ACCURACY_FIELDS: [&str; 6] = [
    "brand_name",
    "class_type",
    "abv",
    "net_contents",
    "bottler",
    "government_warning",
];

/// Matching-blocks similarity in `[0, 1]`: twice the matched characters
/// over the combined length (Ratcliff/Obershelp).
///
/// Case and surrounding/repeated whitespace are ignored. Identical strings
/// score 1.0; an empty side scores 0.0.
pub fn fuzzy_match(a: &str, b: &str) -> f64 {
    let a: Vec<char> = normalize(a).chars().collect();
    let b: Vec<char> = normalize(b).chars().collect();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let mut positions: HashMap<char, Vec<usize>> = HashMap::new();
    for (j, c) in b.iter().enumerate() {
        positions.entry(*c).or_default().push(j);
    }

    let mut matched = 0;
    let mut pending = vec![(0, a.len(), 0, b.len())];
    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let (i, j, size) = longest_match(&a, &positions, (alo, ahi), (blo, bhi));
        if size == 0 {
            continue;
        }
        matched += size;
        if alo < i && blo < j {
            pending.push((alo, i, blo, j));
        }
        if i + size < ahi && j + size < bhi {
            pending.push((i + size, ahi, j + size, bhi));
        }
    }
    2.0 * matched as f64 / (a.len() + b.len()) as f64
}

/// Longest common run of `a[alo..ahi]` and `b[blo..bhi]` as `(i, j, len)`.
///
/// Ties go to the earliest start in `a`, then in `b`.
fn longest_match(
    a: &[char],
    positions: &HashMap<char, Vec<usize>>,
    (alo, ahi): (usize, usize),
    (blo, bhi): (usize, usize),
) -> (usize, usize, usize) {
    let mut best = (alo, blo, 0);
    // run length of the match ending at b[j], for the previous a index
    let mut runs: HashMap<usize, usize> = HashMap::new();
    for (i, c) in a.iter().enumerate().take(ahi).skip(alo) {
        let mut next = HashMap::new();
        for &j in positions.get(c).into_iter().flatten() {
            if j < blo {
                continue;
            }
            if j >= bhi {
                break;
            }
            let len = j.checked_sub(1).and_then(|prev| runs.get(&prev)).copied().unwrap_or(0) + 1;
            next.insert(j, len);
            if len > best.2 {
                best = (i + 1 - len, j + 1 - len, len);
            }
        }
        runs = next;
    }
    best
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Permitted ABV deviation for a product (27 CFR 4.36, 5.37, 7.71).
///
/// For wine the band depends on the declared (reference) value, not the measured one.
pub fn abv_tolerance(category: ProductCategory, reference_abv: f64) -> f64 {
    match category {
        ProductCategory::Wine if reference_abv > 14.0 => 1.0,
        ProductCategory::Wine => 1.5,
        ProductCategory::DistilledSpirits | ProductCategory::MaltBeverage => 0.3,
    }
}

pub fn abv_within_tolerance(extracted: f64, reference: f64, tolerance: f64) -> bool {
    // absorb float error so a difference of exactly the tolerance passes
    (extracted - reference).abs() <= tolerance + 1e-9
}

/// Run both tiers over one label.
///
/// `processing_time_seconds` covers validation only; callers that also ran
/// extraction overwrite it with the end-to-end time.
pub fn validate(
    extracted: &ExtractedFields,
    reference: Option<&ReferenceFields>,
    confidence: Option<f64>,
) -> ValidationResult {
    let started = Instant::now();
    let reference = reference.filter(|r| !r.is_empty());

    let structural = structural_checks(extracted);

    let mut accuracy = Vec::new();
    let mut skipped = Vec::new();
    for field in ACCURACY_FIELDS {
        match reference.and_then(|r| accuracy_check(field, extracted, r)) {
            Some(check) => accuracy.push(check),
            None => skipped.push(SkippedCheck {
                field: field.to_string(),
                reason: SkipReason::NoReferenceValue,
            }),
        }
    }

    let mut violations: Vec<Violation> = structural
        .iter()
        .filter(|c| !c.valid)
        .map(|c| violation(c, Tier::Structural))
        .collect();
    violations.extend(accuracy.iter().filter(|c| !c.valid).map(|c| violation(c, Tier::Accuracy)));

    let validation_level = match (accuracy.len(), skipped.len()) {
        (0, _) => ValidationLevel::StructuralOnly,
        (_, 0) => ValidationLevel::FullValidation,
        _ => ValidationLevel::PartialAccuracy,
    };

    let status = if !violations.is_empty() {
        ComplianceStatus::NonCompliant
    } else if !skipped.is_empty() {
        ComplianceStatus::PartialValidation
    } else {
        ComplianceStatus::Compliant
    };

    let warnings = collect_warnings(extracted, reference.is_some(), confidence);

    ValidationResult {
        status,
        validation_level,
        extracted_fields: extracted.clone(),
        validation_results: TierResults {
            structural,
            accuracy,
        },
        violations,
        skipped_count: skipped.len(),
        skipped,
        warnings,
        processing_time_seconds: started.elapsed().as_secs_f64(),
        backend: None,
        confidence,
    }
}

// ── Tier 1 ───────────────────────────────────────────────────────────────

fn structural_checks(extracted: &ExtractedFields) -> Vec<FieldCheck> {
    let mut checks = vec![
        presence("brand_name", extracted.brand_name.as_ref(), "Brand name not found on label"),
        presence("class_type", extracted.class_type.as_ref(), "Class/type designation not found on label"),
        presence(
            "abv",
            extracted.abv_numeric.map(|_| extracted.abv.clone().unwrap_or_default()).as_ref(),
            "Alcohol content not found on label",
        ),
        presence("net_contents", extracted.net_contents.as_ref(), "Net contents not found on label"),
        presence("bottler", extracted.bottler.as_ref(), "Bottler information not found on label"),
    ];

    let warning = &extracted.government_warning;
    let mut present = FieldCheck::new("government_warning", warning.present, warning.text.clone());
    present.expected = Some("Government warning required".into());
    if !warning.present {
        present.error = Some("Government warning not found on label".into());
    }
    checks.push(present);

    let header_ok = warning.header_correct == Some(true);
    let mut header = FieldCheck::new(
        "government_warning_header",
        header_ok,
        warning.present.then(|| {
            let seen = if header_ok { GOVERNMENT_WARNING_HEADER } else { "Government Warning:" };
            seen.to_string()
        }),
    );
    header.expected = Some(GOVERNMENT_WARNING_HEADER.into());
    if !header_ok {
        header.error = Some(format!("Warning header must read exactly '{GOVERNMENT_WARNING_HEADER}'"));
    }
    checks.push(header);

    let text_ok = warning.text_correct == Some(true);
    let mut text = FieldCheck::new("government_warning_text", text_ok, warning.text.clone());
    text.expected = Some(GOVERNMENT_WARNING_TEXT.into());
    text.similarity_score = warning.similarity_score;
    text.threshold = Some(WARNING_MATCH_THRESHOLD);
    if !text_ok {
        text.error = Some("Warning text does not match required text (27 CFR § 16.21)".into());
    }
    checks.push(text);

    checks
}

fn presence(field: &str, value: Option<&String>, missing: &str) -> FieldCheck {
    let mut check = FieldCheck::new(field, value.is_some(), value.cloned());
    if value.is_none() {
        check.error = Some(missing.to_string());
    }
    check
}

// ── Tier 2 ───────────────────────────────────────────────────────────────

/// `None` when the reference holds no value for `field`.
fn accuracy_check(field: &str, extracted: &ExtractedFields, reference: &ReferenceFields) -> Option<FieldCheck> {
    match field {
        "brand_name" => reference
            .brand_name
            .as_deref()
            .map(|expected| text_check(field, "Brand name", extracted.brand_name.as_deref(), expected, FUZZY_MATCH_THRESHOLD)),
        "class_type" => reference
            .class_type
            .as_deref()
            .map(|expected| text_check(field, "Class/type", extracted.class_type.as_deref(), expected, FUZZY_MATCH_THRESHOLD)),
        "net_contents" => reference
            .net_contents
            .as_deref()
            .map(|expected| text_check(field, "Net contents", extracted.net_contents.as_deref(), expected, FUZZY_MATCH_THRESHOLD)),
        "bottler" => reference
            .bottler
            .as_deref()
            .map(|expected| text_check(field, "Bottler", extracted.bottler.as_deref(), expected, FUZZY_MATCH_THRESHOLD)),
        "government_warning" => reference.government_warning.as_deref().map(|expected| {
            // the extracted block runs to the end of the text; compare like-for-like lengths
            let actual = extracted
                .government_warning
                .text
                .as_deref()
                .map(|t| t.chars().take(expected.chars().count()).collect::<String>());
            text_check(field, "Government warning", actual.as_deref(), expected, WARNING_MATCH_THRESHOLD)
        }),
        "abv" => reference.abv.map(|expected| abv_check(extracted, reference, expected)),
        _ => None,
    }
}

fn text_check(field: &str, label: &str, actual: Option<&str>, expected: &str, threshold: f64) -> FieldCheck {
    let mut check = FieldCheck::new(field, false, actual.map(str::to_string));
    check.expected = Some(expected.to_string());
    check.threshold = Some(threshold);

    match actual {
        None => check.error = Some(format!("{label} not found on label")),
        Some(actual) => {
            let score = fuzzy_match(actual, expected);
            check.valid = score >= threshold;
            check.similarity_score = Some(score);
            if !check.valid {
                check.error = Some(format!("{label} mismatch (similarity: {:.1}%)", score * 100.0));
            }
        }
    }
    check
}

fn abv_check(extracted: &ExtractedFields, reference: &ReferenceFields, expected: f64) -> FieldCheck {
    let (category, inferred) = match reference.product_category {
        Some(category) => (category, false),
        None => {
            let from_text = reference
                .class_type
                .as_deref()
                .and_then(ttb_standards::infer_category)
                .or_else(|| extracted.class_type.as_deref().and_then(ttb_standards::infer_category));
            (from_text.unwrap_or(ProductCategory::Wine), true)
        }
    };
    let tolerance = abv_tolerance(category, expected);

    let mut check = FieldCheck::new("abv", false, extracted.abv_numeric.map(|v| format!("{v}%")));
    check.expected = Some(format!("{expected}%"));
    check.tolerance = Some(tolerance);
    check.category = Some(category);
    check.category_inferred = Some(inferred);

    match extracted.abv_numeric {
        None => check.error = Some("Alcohol content not found on label".into()),
        Some(actual) => {
            check.valid = abv_within_tolerance(actual, expected, tolerance);
            if !check.valid {
                check.error = Some(format!(
                    "ABV outside tolerance (±{tolerance}%): difference is {:.2}%",
                    (actual - expected).abs()
                ));
            }
        }
    }
    check
}

fn violation(check: &FieldCheck, tier: Tier) -> Violation {
    Violation {
        field: check.field.clone(),
        tier,
        message: check
            .error
            .clone()
            .unwrap_or_else(|| format!("{} check failed", check.field)),
        expected: check.expected.clone(),
        actual: check.actual.clone(),
    }
}

fn collect_warnings(extracted: &ExtractedFields, has_reference: bool, confidence: Option<f64>) -> Vec<String> {
    let mut warnings = Vec::new();

    if !has_reference {
        warnings.push(
            "No reference values provided - only structural validation performed. \
             Provide reference values to enable accuracy validation."
                .to_string(),
        );
    }

    let missing = extracted.missing_mandatory();
    if missing >= 2 {
        warnings.push(format!(
            "Extraction missed {missing} mandatory fields. \
             Consider the ollama backend for better accuracy (slower)."
        ));
    }

    if let Some(c) = confidence.filter(|c| *c < LOW_CONFIDENCE) {
        warnings.push(format!("Low extraction confidence ({:.0}%); results may be unreliable", c * 100.0));
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::label::GovernmentWarning;

    fn sample_fields() -> ExtractedFields {
        ExtractedFields {
            brand_name: Some("Stone Creek Vineyards".into()),
            class_type: Some("Cabernet Sauvignon".into()),
            abv: Some("13.5% alc./vol.".into()),
            abv_numeric: Some(13.5),
            net_contents: Some("750 mL".into()),
            bottler: Some("Bottled by Stone Creek Cellars, Napa, CA".into()),
            country_of_origin: None,
            government_warning: GovernmentWarning {
                present: true,
                header_correct: Some(true),
                text_correct: Some(true),
                text: Some(GOVERNMENT_WARNING_TEXT.into()),
                similarity_score: Some(1.0),
            },
        }
    }

    fn full_reference() -> ReferenceFields {
        ReferenceFields {
            brand_name: Some("Stone Creek Vineyards".into()),
            class_type: Some("Cabernet Sauvignon".into()),
            abv: Some(13.5),
            net_contents: Some("750 mL".into()),
            bottler: Some("Bottled by Stone Creek Cellars, Napa, CA".into()),
            government_warning: Some(GOVERNMENT_WARNING_TEXT.into()),
            product_category: None,
        }
    }

    #[test]
    fn test_fuzzy_match_identity_and_empty() {
        assert_eq!(fuzzy_match("Ridge & Co.", "Ridge & Co."), 1.0);
        assert_eq!(fuzzy_match("  RIDGE   & co. ", "ridge & co."), 1.0);
        assert_eq!(fuzzy_match("Ridge", ""), 0.0);
        assert_eq!(fuzzy_match("", ""), 0.0);
        assert_eq!(fuzzy_match("   ", "Ridge"), 0.0);
    }

    #[test]
    fn test_fuzzy_match_counts_matching_blocks() {
        // one shared character out of 21
        assert!((fuzzy_match("Hefeweizen", "Ridge & Co.") - 2.0 / 21.0).abs() < 1e-9);
        assert!((fuzzy_match("750 ml", "750ml") - 10.0 / 11.0).abs() < 1e-9);
        assert!((fuzzy_match("jack daniel's", "jakc daniel's") - 24.0 / 26.0).abs() < 1e-9);
        assert!(fuzzy_match("750 mL", "750mL") >= FUZZY_MATCH_THRESHOLD);
        assert_eq!(fuzzy_match("abc", "xyz"), 0.0);
    }

    #[test]
    fn test_abv_tolerance_table() {
        assert_eq!(abv_tolerance(ProductCategory::Wine, 15.0), 1.0);
        assert_eq!(abv_tolerance(ProductCategory::Wine, 14.0), 1.5);
        assert_eq!(abv_tolerance(ProductCategory::DistilledSpirits, 40.0), 0.3);
        assert_eq!(abv_tolerance(ProductCategory::MaltBeverage, 5.0), 0.3);
    }

    #[test]
    fn test_wine_tolerance_boundary() {
        let tol = abv_tolerance(ProductCategory::Wine, 15.0);
        assert!(!abv_within_tolerance(13.99, 15.0, tol));
        assert!(abv_within_tolerance(14.0, 15.0, tol));
    }

    #[test]
    fn test_full_reference_is_compliant() {
        let result = validate(&sample_fields(), Some(&full_reference()), Some(0.9));
        assert_eq!(result.status, ComplianceStatus::Compliant);
        assert_eq!(result.validation_level, ValidationLevel::FullValidation);
        assert_eq!(result.skipped_count, 0);
        assert_eq!(result.validation_results.accuracy.len(), ACCURACY_FIELDS.len());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_no_reference_is_structural_only() {
        let result = validate(&sample_fields(), None, None);
        assert_eq!(result.validation_level, ValidationLevel::StructuralOnly);
        assert_eq!(result.status, ComplianceStatus::PartialValidation);
        assert_eq!(result.skipped_count, ACCURACY_FIELDS.len());
        assert!(result.validation_results.accuracy.is_empty());
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_brand_only_reference_skips_the_rest() {
        let reference = ReferenceFields {
            brand_name: Some("Stone Creek Vineyards".into()),
            ..Default::default()
        };
        let result = validate(&sample_fields(), Some(&reference), None);
        assert_eq!(result.validation_level, ValidationLevel::PartialAccuracy);
        assert_eq!(result.skipped_count, ACCURACY_FIELDS.len() - 1);
        assert!(result.skipped.iter().all(|s| s.reason == SkipReason::NoReferenceValue));
        // skipped checks dominate a clean run
        assert_eq!(result.status, ComplianceStatus::PartialValidation);
    }

    #[test]
    fn test_missing_warning_is_structural_violation() {
        let mut fields = sample_fields();
        fields.government_warning = GovernmentWarning::default();
        for reference in [None, Some(full_reference())] {
            let result = validate(&fields, reference.as_ref(), None);
            assert_eq!(result.status, ComplianceStatus::NonCompliant);
            assert!(result
                .violations_in(Tier::Structural)
                .any(|v| v.field == "government_warning"));
        }
    }

    #[test]
    fn test_reference_value_missing_from_label_is_violation() {
        let mut fields = sample_fields();
        fields.bottler = None;
        let reference = ReferenceFields {
            bottler: Some("Bottled by Stone Creek Cellars".into()),
            ..Default::default()
        };
        let result = validate(&fields, Some(&reference), None);
        assert!(result.violations_in(Tier::Accuracy).any(|v| v.field == "bottler"));
        let check = &result.validation_results.accuracy[0];
        assert!(!check.valid);
        assert!(check.similarity_score.is_none());
    }

    #[test]
    fn test_brand_mismatch_example() {
        let mut fields = sample_fields();
        fields.brand_name = Some("Hefeweizen".into());
        fields.abv = Some("7.5% ABV".into());
        fields.abv_numeric = Some(7.5);
        let reference = ReferenceFields {
            brand_name: Some("Ridge & Co.".into()),
            abv: Some(7.5),
            ..Default::default()
        };
        let result = validate(&fields, Some(&reference), None);
        assert_eq!(result.status, ComplianceStatus::NonCompliant);

        let accuracy: Vec<_> = result.violations_in(Tier::Accuracy).collect();
        assert_eq!(accuracy.len(), 1);
        assert_eq!(accuracy[0].field, "brand_name");

        let brand = result
            .validation_results
            .accuracy
            .iter()
            .find(|c| c.field == "brand_name")
            .unwrap();
        assert!((brand.similarity_score.unwrap() - 0.095).abs() < 0.001);
        let abv = result.validation_results.accuracy.iter().find(|c| c.field == "abv").unwrap();
        assert!(abv.valid);
    }

    #[test]
    fn test_abv_category_inferred_from_reference_class() {
        let mut fields = sample_fields();
        fields.abv_numeric = Some(40.5);
        let reference = ReferenceFields {
            class_type: Some("Straight Bourbon Whiskey".into()),
            abv: Some(40.0),
            ..Default::default()
        };
        let result = validate(&fields, Some(&reference), None);
        let abv = result.validation_results.accuracy.iter().find(|c| c.field == "abv").unwrap();
        assert_eq!(abv.category, Some(ProductCategory::DistilledSpirits));
        assert_eq!(abv.category_inferred, Some(true));
        assert_eq!(abv.tolerance, Some(0.3));
        assert!(!abv.valid);
    }

    #[test]
    fn test_explicit_category_wins() {
        let mut fields = sample_fields();
        fields.abv_numeric = Some(5.2);
        let reference = ReferenceFields {
            abv: Some(5.0),
            product_category: Some(ProductCategory::MaltBeverage),
            ..Default::default()
        };
        let result = validate(&fields, Some(&reference), None);
        let abv = &result.validation_results.accuracy[0];
        assert_eq!(abv.category_inferred, Some(false));
        assert!(abv.valid);
    }

    #[test]
    fn test_sparse_extraction_warnings() {
        let fields = ExtractedFields {
            brand_name: Some("Old Tom".into()),
            ..Default::default()
        };
        let result = validate(&fields, None, Some(0.3));
        assert!(result.warnings.iter().any(|w| w.contains("ollama")));
        assert!(result.warnings.iter().any(|w| w.contains("Low extraction confidence")));
    }
}
