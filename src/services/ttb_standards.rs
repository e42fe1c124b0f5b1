//! TTB standards-of-identity reference data.
//!
//! Based on 27 CFR Part 4 (Wine), Part 5 (Distilled Spirits), Part 7 (Malt Beverages).
//! Used to locate the class/type designation in label text and to pick the ABV
//! tolerance band for a product.

use strsim::jaro_winkler;

use crate::models::label::ProductCategory;

/// Minimum similarity for a designation to count as a known standard.
const CLASS_MATCH_THRESHOLD: f64 = 0.88;

// ── Wine (27 CFR 4.21) ──────────────────────────────────────────────────

pub const WINE_TYPES: &[&str] = &[
    "Grape Wine", "Table Wine", "Red Wine", "White Wine", "Rose Wine", "Rosé",
    "Sparkling Wine", "Champagne", "Prosecco", "Cava", "Dessert Wine", "Sherry",
    "Port", "Madeira", "Marsala", "Vermouth", "Sake", "Fruit Wine", "Apple Wine",
    "Hard Cider", "Cider", "Mead", "Honey Wine", "Fortified Wine",
    // varietals
    "Cabernet Sauvignon", "Merlot", "Pinot Noir", "Chardonnay", "Sauvignon Blanc",
    "Riesling", "Pinot Grigio", "Pinot Gris", "Zinfandel", "Syrah", "Shiraz",
    "Malbec", "Tempranillo", "Sangiovese", "Moscato", "Gewurztraminer",
];

// ── Distilled Spirits (27 CFR 5.22) ─────────────────────────────────────

pub const DISTILLED_SPIRITS_TYPES: &[&str] = &[
    "Kentucky Straight Bourbon Whiskey", "Straight Bourbon Whiskey", "Bourbon Whiskey",
    "Tennessee Whiskey", "Straight Rye Whiskey", "Rye Whiskey", "Corn Whiskey",
    "Wheat Whiskey", "Malt Whiskey", "Blended Whiskey", "Scotch Whisky",
    "Irish Whiskey", "Canadian Whisky", "Whiskey", "Whisky", "Bourbon",
    "Vodka", "London Dry Gin", "Distilled Gin", "Gin",
    "Spiced Rum", "Dark Rum", "Light Rum", "Gold Rum", "Rum",
    "Brandy", "Grape Brandy", "Apple Brandy", "Cognac", "Armagnac", "Pisco", "Calvados",
    "Tequila Blanco", "Tequila Reposado", "Tequila Anejo", "Tequila", "Mezcal",
    "Liqueur", "Cordial", "Triple Sec", "Amaretto", "Schnapps",
    "Absinthe", "Aquavit", "Grappa", "Soju", "Cachaca", "Neutral Spirits",
];

// ── Malt Beverages (27 CFR 7.24) ────────────────────────────────────────

pub const MALT_BEVERAGE_TYPES: &[&str] = &[
    "India Pale Ale", "IPA", "Pale Ale", "Amber Ale", "Brown Ale", "Cream Ale",
    "Blonde Ale", "Golden Ale", "Red Ale", "Scotch Ale", "Ale",
    "Lager", "Stout", "Porter", "Pilsner", "Pilsener", "Wheat Beer", "Hefeweizen",
    "Kolsch", "Saison", "Doppelbock", "Bock", "Dunkel", "Marzen", "Oktoberfest",
    "Barleywine", "Sour Beer", "Gose", "Berliner Weisse", "Lambic",
    "Malt Liquor", "Flavored Malt Beverage", "Malt Beverage", "Hard Seltzer", "Beer",
];

/// Known misspellings mapped to the standard term.
pub const COMMON_MISSPELLINGS: &[(&str, &str)] = &[
    ("burbon", "Bourbon"),
    ("bourban", "Bourbon"),
    ("vodca", "Vodka"),
    ("votka", "Vodka"),
    ("tequlia", "Tequila"),
    ("tequilla", "Tequila"),
    ("liqeur", "Liqueur"),
    ("cognack", "Cognac"),
    ("champaign", "Champagne"),
    ("champange", "Champagne"),
    ("cabernet sauvingon", "Cabernet Sauvignon"),
    ("chardonay", "Chardonnay"),
    ("rieseling", "Riesling"),
    ("pinot nior", "Pinot Noir"),
    ("zinfandal", "Zinfandel"),
    ("hefeweisen", "Hefeweizen"),
];

/// Standards tables in lookup order.
const STANDARDS: &[(ProductCategory, &[&str])] = &[
    (ProductCategory::Wine, WINE_TYPES),
    (ProductCategory::DistilledSpirits, DISTILLED_SPIRITS_TYPES),
    (ProductCategory::MaltBeverage, MALT_BEVERAGE_TYPES),
];

/// A class/type designation resolved to its standard of identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub standard: &'static str,
    pub category: ProductCategory,
    pub similarity: f64,
    pub spelling_correction: Option<&'static str>,
}

/// Resolve a class/type designation (e.g. "Straight Bourbon Whiskey") to a category.
///
/// Exact and misspelled whole-designation matches win; otherwise the best
/// Jaro-Winkler score above [`CLASS_MATCH_THRESHOLD`], then any standard term
/// appearing as a phrase inside the designation ("Estate Pinot Noir").
pub fn classify(class_type: &str) -> Option<Classification> {
    let lower = class_type.trim().to_lowercase();
    if lower.is_empty() {
        return None;
    }

    let (term, spelling_correction) = match check_misspelling(&lower) {
        Some(correction) => (correction.to_lowercase(), Some(correction)),
        None => (strip_flavored(&lower).to_string(), None),
    };

    let mut best: Option<Classification> = None;
    for (category, standards) in STANDARDS {
        for standard in *standards {
            let score = jaro_winkler(&term, &standard.to_lowercase());
            if best.as_ref().map_or(true, |b| score > b.similarity) {
                best = Some(Classification {
                    standard,
                    category: *category,
                    similarity: score,
                    spelling_correction,
                });
            }
        }
    }

    match best {
        Some(b) if b.similarity >= CLASS_MATCH_THRESHOLD => Some(b),
        _ => find_designation(&term).map(|(standard, category)| Classification {
            standard,
            category,
            similarity: 1.0,
            spelling_correction,
        }),
    }
}

/// Tolerance category for a designation; `None` when it matches no standard.
pub fn infer_category(class_type: &str) -> Option<ProductCategory> {
    classify(class_type).map(|c| c.category)
}

/// Find the longest standard designation that appears as a whole-word phrase in `text`.
///
/// Ties keep table order (wine, spirits, malt).
pub fn find_designation(text: &str) -> Option<(&'static str, ProductCategory)> {
    let words = tokenize(text);
    let mut best: Option<(&'static str, ProductCategory, usize)> = None;

    for (category, standards) in STANDARDS {
        for standard in *standards {
            let needle = tokenize(standard);
            if needle.is_empty() || needle.len() > words.len() {
                continue;
            }
            let found = words.windows(needle.len()).any(|w| w == needle.as_slice());
            let longer = best.map_or(true, |(_, _, len)| needle.len() > len);
            if found && longer {
                best = Some((standard, *category, needle.len()));
            }
        }
    }

    best.map(|(standard, category, _)| (standard, category))
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

fn check_misspelling(input: &str) -> Option<&'static str> {
    COMMON_MISSPELLINGS
        .iter()
        .find(|(misspelling, _)| input == *misspelling || jaro_winkler(input, misspelling) > 0.95)
        .map(|(_, correction)| *correction)
}

/// "Chocolate Flavored Brandy" classifies as "Brandy".
fn strip_flavored(input: &str) -> &str {
    match input.find("flavored") {
        Some(idx) if !input[idx + "flavored".len()..].trim().is_empty() => {
            input[idx + "flavored".len()..].trim()
        }
        _ => input,
    }
}
