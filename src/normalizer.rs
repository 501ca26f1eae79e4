// Name Normalizer
// "Germ-X hand sanitizer - 1 bottle (moisturizing)" -> "Germ-X hand sanitizer"

/// Separators that end the core name, in priority order
const SEPARATORS: &[&str] = &[" - ", " (", "  "];

/// Longest canonical name kept, in characters
pub const MAX_NAME_CHARS: usize = 100;

const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':'];

/// Reduce a verbose item description to a short canonical name.
///
/// Pure and idempotent: normalizing an already-normalized name returns it unchanged.
pub fn normalize_item_name(description: &str) -> String {
    let unbolded = description.replace("**", "");
    let mut name = unbolded.trim();

    // Splitting on each separator in turn keeps the text before the earliest one
    for separator in SEPARATORS {
        if let Some(pos) = name.find(separator) {
            name = name[..pos].trim();
        }
    }

    let capped: String = name.chars().take(MAX_NAME_CHARS).collect();

    capped
        .trim_end_matches(|c: char| TRAILING_PUNCTUATION.contains(&c) || c.is_whitespace())
        .trim_start()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncates_at_dash_separator() {
        assert_eq!(
            normalize_item_name("Germ-X hand sanitizer - 1 bottle (moisturizing original)"),
            "Germ-X hand sanitizer"
        );
    }

    #[test]
    fn test_truncates_at_parenthesis() {
        assert_eq!(
            normalize_item_name("Children's water bottle with red spout (appears to be new)"),
            "Children's water bottle with red spout"
        );
    }

    #[test]
    fn test_earliest_separator_wins() {
        assert_eq!(normalize_item_name("Oat milk (carton) - half full"), "Oat milk");
        assert_eq!(normalize_item_name("Oat milk  extra notes - here"), "Oat milk");
    }

    #[test]
    fn test_strips_trailing_punctuation_and_bold() {
        assert_eq!(normalize_item_name("**Kellogg's Froot Loops**."), "Kellogg's Froot Loops");
        assert_eq!(normalize_item_name("Peanut butter;:,"), "Peanut butter");
        assert_eq!(normalize_item_name("Peanut butter ."), "Peanut butter");
    }

    #[test]
    fn test_hyphenated_brand_is_kept() {
        assert_eq!(normalize_item_name("Germ-X"), "Germ-X");
        assert_eq!(normalize_item_name("Coca-Cola 12-pack"), "Coca-Cola 12-pack");
    }

    #[test]
    fn test_caps_length_on_char_boundary() {
        let long = "é".repeat(150);
        let name = normalize_item_name(&long);
        assert_eq!(name.chars().count(), MAX_NAME_CHARS);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(normalize_item_name(""), "");
        assert_eq!(normalize_item_name("   ...  "), "");
    }

    #[test]
    fn test_idempotent() {
        let samples = [
            "Germ-X hand sanitizer - 1 bottle (moisturizing original)",
            "**Cheerios** - 1 box",
            "Children's water bottle with red spout (appears to be...)",
            "Oat milk  carton",
            "Rice.",
            "  spaced out name  ",
            "***tri bold***",
            "Ends with a cut point at one hundred characters then a period........................................ and more",
            "(leading paren) rest",
            "",
        ];

        for sample in samples {
            let once = normalize_item_name(sample);
            let twice = normalize_item_name(&once);
            assert_eq!(once, twice, "not idempotent for {:?}", sample);
        }
    }
}
