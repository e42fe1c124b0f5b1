use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// TTB product categories per 27 CFR Parts 4, 5, 7. Drives the ABV tolerance band.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum ProductCategory {
    #[strum(to_string = "wine", serialize = "wines")]
    Wine,
    #[strum(
        to_string = "distilled_spirits",
        serialize = "distilled spirits",
        serialize = "spirits",
        serialize = "spirit"
    )]
    DistilledSpirits,
    #[strum(
        to_string = "malt_beverage",
        serialize = "malt beverage",
        serialize = "malt",
        serialize = "beer"
    )]
    MaltBeverage,
}

/// Government warning sub-record (27 CFR § 16.21).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GovernmentWarning {
    pub present: bool,
    /// Header reads exactly `GOVERNMENT WARNING:`; `None` when no warning was found.
    pub header_correct: Option<bool>,
    /// Body is close enough to the statutory text; `None` when no warning was found.
    pub text_correct: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_score: Option<f64>,
}

/// Fields pulled out of raw label text. Every field is optional: absence is a finding.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtractedFields {
    pub brand_name: Option<String>,
    pub class_type: Option<String>,
    /// ABV statement as printed, e.g. `13.5% alc./vol.` or `80 Proof`.
    pub abv: Option<String>,
    /// ABV as a percentage; proof statements are halved.
    pub abv_numeric: Option<f64>,
    pub net_contents: Option<String>,
    pub bottler: Option<String>,
    pub country_of_origin: Option<String>,
    pub government_warning: GovernmentWarning,
}

impl ExtractedFields {
    /// Number of mandatory label fields the extractor could not find.
    pub fn missing_mandatory(&self) -> usize {
        [
            self.brand_name.is_none(),
            self.class_type.is_none(),
            self.abv_numeric.is_none(),
            self.net_contents.is_none(),
            self.bottler.is_none(),
        ]
        .into_iter()
        .filter(|missing| *missing)
        .count()
    }
}

/// Caller-supplied expected values (ground truth) for Tier 2 comparison.
///
/// Any subset may be present; each field is compared only when supplied.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, PartialEq)]
pub struct ReferenceFields {
    #[garde(length(min = 1, max = 500))]
    pub brand_name: Option<String>,

    #[garde(length(min = 1, max = 500))]
    pub class_type: Option<String>,

    #[garde(range(min = 0.0, max = 100.0))]
    pub abv: Option<f64>,

    #[garde(length(min = 1, max = 200))]
    pub net_contents: Option<String>,

    #[garde(length(min = 1, max = 500))]
    pub bottler: Option<String>,

    #[garde(length(min = 1, max = 2000))]
    pub government_warning: Option<String>,

    #[garde(skip)]
    pub product_category: Option<ProductCategory>,
}

/// ABV values arrive as numbers or as printed strings like `"7.5%"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum AbvValue {
    Number(f64),
    Text(String),
}

impl AbvValue {
    fn into_percent(self) -> Result<f64, ReferenceError> {
        match self {
            AbvValue::Number(n) => Ok(n),
            AbvValue::Text(s) => {
                let cleaned = s.trim().trim_end_matches('%').trim();
                // f64 parsing accepts "nan" and "inf"
                cleaned
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| ReferenceError::Abv(s.clone()))
            }
        }
    }
}

/// Wire shape of reference JSON, including the aliases used by the sample generator.
#[derive(Deserialize, Default)]
#[serde(default)]
struct RawReference {
    brand_name: Option<String>,
    class_type: Option<String>,
    product_type: Option<String>,
    product_category: Option<String>,
    abv: Option<AbvValue>,
    alcohol_content_numeric: Option<AbvValue>,
    net_contents: Option<String>,
    bottler: Option<String>,
    bottler_info: Option<String>,
    bottled_by: Option<String>,
    government_warning: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReferenceError {
    #[error("reference JSON is malformed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("reference must be a JSON object")]
    NotAnObject,

    #[error("reference ABV is not a number: {0:?}")]
    Abv(String),

    #[error("reference values out of range: {0}")]
    Invalid(String),
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl ReferenceFields {
    /// Parse reference JSON, accepting both a flat object and a
    /// `{"ground_truth": {...}}` wrapper. Unknown keys are ignored.
    pub fn from_json_str(json: &str) -> Result<Self, ReferenceError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, ReferenceError> {
        let value = match value {
            serde_json::Value::Object(mut map) => match map.remove("ground_truth") {
                Some(inner @ serde_json::Value::Object(_)) => inner,
                Some(_) => return Err(ReferenceError::NotAnObject),
                None => serde_json::Value::Object(map),
            },
            _ => return Err(ReferenceError::NotAnObject),
        };

        let raw: RawReference = serde_json::from_value(value)?;

        // `product_type` is either a category ("wine") or, in older payloads, the
        // class/type designation itself ("Pinot Noir").
        let typed_category = raw
            .product_type
            .as_deref()
            .and_then(|p| p.trim().parse::<ProductCategory>().ok());
        let product_category = match raw.product_category.as_deref() {
            Some(c) => Some(
                c.trim()
                    .parse::<ProductCategory>()
                    .map_err(|_| ReferenceError::Invalid(format!("unknown product category {c:?}")))?,
            ),
            None => typed_category,
        };
        let class_type = non_blank(raw.class_type).or_else(|| {
            typed_category
                .is_none()
                .then(|| non_blank(raw.product_type))
                .flatten()
        });

        let abv = raw
            .alcohol_content_numeric
            .or(raw.abv)
            .map(AbvValue::into_percent)
            .transpose()?;

        let fields = ReferenceFields {
            brand_name: non_blank(raw.brand_name),
            class_type,
            abv,
            net_contents: non_blank(raw.net_contents),
            bottler: non_blank(raw.bottler_info)
                .or_else(|| non_blank(raw.bottled_by))
                .or_else(|| non_blank(raw.bottler)),
            government_warning: non_blank(raw.government_warning),
            product_category,
        };

        fields
            .validate()
            .map_err(|report| ReferenceError::Invalid(report.to_string()))?;
        Ok(fields)
    }

    /// True when no comparable value was supplied at all.
    pub fn is_empty(&self) -> bool {
        self.brand_name.is_none()
            && self.class_type.is_none()
            && self.abv.is_none()
            && self.net_contents.is_none()
            && self.bottler.is_none()
            && self.government_warning.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_reference() {
        let r = ReferenceFields::from_json_str(r#"{"brand_name":"Ridge & Co.","abv":7.5}"#).unwrap();
        assert_eq!(r.brand_name.as_deref(), Some("Ridge & Co."));
        assert_eq!(r.abv, Some(7.5));
        assert!(r.class_type.is_none());
    }

    #[test]
    fn test_wrapped_reference_with_generator_aliases() {
        let json = r#"{
            "ground_truth": {
                "product_type": "wine",
                "class_type": "Pinot Noir",
                "alcohol_content": "13.5% alc./vol.",
                "alcohol_content_numeric": 13.5,
                "bottler_info": "Bottled by Stone Creek Cellars, Napa, CA",
                "container_size": 750
            }
        }"#;
        let r = ReferenceFields::from_json_str(json).unwrap();
        assert_eq!(r.product_category, Some(ProductCategory::Wine));
        assert_eq!(r.class_type.as_deref(), Some("Pinot Noir"));
        assert_eq!(r.abv, Some(13.5));
        assert_eq!(r.bottler.as_deref(), Some("Bottled by Stone Creek Cellars, Napa, CA"));
    }

    #[test]
    fn test_product_type_as_class_designation() {
        let r = ReferenceFields::from_json_str(r#"{"product_type":"Bourbon Whiskey"}"#).unwrap();
        assert_eq!(r.class_type.as_deref(), Some("Bourbon Whiskey"));
        assert!(r.product_category.is_none());
    }

    #[test]
    fn test_abv_as_percent_string() {
        let r = ReferenceFields::from_json_str(r#"{"abv":"40%"}"#).unwrap();
        assert_eq!(r.abv, Some(40.0));
        assert!(ReferenceFields::from_json_str(r#"{"abv":"forty"}"#).is_err());
    }

    #[test]
    fn test_non_finite_abv_string_rejected() {
        for text in ["nan", "NaN%", "inf", "-infinity"] {
            let json = serde_json::json!({ "abv": text }).to_string();
            assert!(
                matches!(ReferenceFields::from_json_str(&json), Err(ReferenceError::Abv(_))),
                "{text} accepted"
            );
        }
    }

    #[test]
    fn test_out_of_range_abv_rejected() {
        let err = ReferenceFields::from_json_str(r#"{"abv":140}"#).unwrap_err();
        assert!(matches!(err, ReferenceError::Invalid(_)));
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(matches!(
            ReferenceFields::from_json_str("[1,2]").unwrap_err(),
            ReferenceError::NotAnObject
        ));
    }

    #[test]
    fn test_blank_values_are_absent() {
        let r = ReferenceFields::from_json_str(r#"{"brand_name":"  ","net_contents":null}"#).unwrap();
        assert!(r.is_empty());
    }

    #[test]
    fn test_category_aliases() {
        assert_eq!("Spirits".parse::<ProductCategory>().unwrap(), ProductCategory::DistilledSpirits);
        assert_eq!("beer".parse::<ProductCategory>().unwrap(), ProductCategory::MaltBeverage);
        assert_eq!(ProductCategory::MaltBeverage.to_string(), "malt_beverage");
    }
}
