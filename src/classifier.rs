//! Content classification
//!
//! Maps an asset to one of the closed set of [`ImageRole`]s. The caller's
//! declared role always wins; otherwise the role is inferred from keywords in
//! the source identifier, falling back to [`ImageRole::Photo`].

use crate::models::{ImageAsset, ImageRole};

const LOGO_KEYWORDS: &[&str] = &["logo", "brand", "emblem", "favicon"];
const GRAPHICS_KEYWORDS: &[&str] = &[
    "icon", "badge", "barcode", "qr", "chart", "diagram", "graphic", "illustration", "banner",
];
const TEXT_KEYWORDS: &[&str] = &["text", "signature", "scan", "receipt", "caption"];

/// Classify an asset. Pure and infallible.
pub fn classify(asset: &ImageAsset) -> ImageRole {
    asset
        .role_hint
        .unwrap_or_else(|| infer_role(&asset.identifier))
}

/// Infer a role from a path or URL.
///
/// Only the final path segment (query string stripped) is inspected, split on
/// non-alphanumeric characters, so `/brands/photo.jpg` stays a photo while
/// `acme-logo@2x.png` becomes a logo.
pub fn infer_role(identifier: &str) -> ImageRole {
    let without_query = identifier.split(['?', '#']).next().unwrap_or_default();
    let file_name = without_query
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();

    let tokens: Vec<&str> = file_name
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    let mentions = |keywords: &[&str]| tokens.iter().any(|t| keywords.contains(t));

    if mentions(LOGO_KEYWORDS) {
        ImageRole::Logo
    } else if mentions(GRAPHICS_KEYWORDS) {
        ImageRole::Graphics
    } else if mentions(TEXT_KEYWORDS) {
        ImageRole::Text
    } else {
        ImageRole::Photo
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_role_wins() {
        let asset = ImageAsset::new("images/logo.png", vec![]).with_role(ImageRole::Text);
        assert_eq!(classify(&asset), ImageRole::Text);
    }

    #[test]
    fn test_infers_logo_from_file_name() {
        assert_eq!(infer_role("media/acme-logo@2x.png"), ImageRole::Logo);
        assert_eq!(infer_role("https://cdn.shop.test/LOGO.PNG?v=3"), ImageRole::Logo);
        assert_eq!(infer_role(r"C:\assets\brand_mark.png"), ImageRole::Logo);
    }

    #[test]
    fn test_infers_graphics_and_text() {
        assert_eq!(infer_role("labels/shipping-barcode.png"), ImageRole::Graphics);
        assert_eq!(infer_role("icons/cart_icon.webp"), ImageRole::Graphics);
        assert_eq!(infer_role("uploads/customer_signature.png"), ImageRole::Text);
    }

    #[test]
    fn test_defaults_to_photo() {
        assert_eq!(infer_role("catalog/red-shoe.jpg"), ImageRole::Photo);
        assert_eq!(infer_role(""), ImageRole::Photo);
        // Directory names are not inspected.
        assert_eq!(infer_role("logos/product-1234.jpg"), ImageRole::Photo);
        // Substrings inside other words do not match.
        assert_eq!(infer_role("catalog/textured-rug.jpg"), ImageRole::Photo);
    }

    #[test]
    fn test_classify_is_deterministic() {
        let asset = ImageAsset::new("catalog/qr-code.png", vec![1, 2, 3]);
        assert_eq!(classify(&asset), classify(&asset));
        assert_eq!(classify(&asset), ImageRole::Graphics);
    }
}
