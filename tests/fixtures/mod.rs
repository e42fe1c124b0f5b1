//! Label texts, reference payloads and image headers used across the integration tests.
#![allow(dead_code)]

use label_verifier::services::extractor::GOVERNMENT_WARNING_TEXT;

/// Smallest byte strings that `image::guess_format` recognises.
pub const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x01\0\0\0\x01";
pub const JPEG: &[u8] = b"\xff\xd8\xff\xe0\0\x10JFIF\0\x01\x01";
pub const GIF: &[u8] = b"GIF89a\x01\0\x01\0\x80\0\0";

/// A complete, correctly labelled domestic wine.
pub fn wine_label() -> String {
    format!(
        "STONE CREEK\nCabernet Sauvignon\n13.5% alc./vol.\n750 mL\n\
         Bottled by Stone Creek Cellars, Napa, CA\nProduct of USA\n{GOVERNMENT_WARNING_TEXT}"
    )
}

pub fn wine_reference() -> String {
    serde_json::json!({
        "ground_truth": {
            "brand_name": "Stone Creek",
            "class_type": "Cabernet Sauvignon",
            "alcohol_content_numeric": 13.5,
            "net_contents": "750 mL",
            "bottler_info": "Bottled by Stone Creek Cellars, Napa, CA",
            "government_warning": GOVERNMENT_WARNING_TEXT,
            "product_type": "wine"
        }
    })
    .to_string()
}

/// A wheat beer label with no warning statement.
pub const HEFEWEIZEN_LABEL: &str = "Hefeweizen\n7.5% ABV\n12 FL OZ";

pub const RIDGE_REFERENCE: &str = r#"{"brand_name": "Ridge & Co.", "abv": 7.5}"#;
