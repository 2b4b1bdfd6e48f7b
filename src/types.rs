use geo::MultiPolygon;
use std::fmt;

/// Canonical census-tract identifier.
///
/// Upstream sources disagree on the representation: the scores CSV carries the
/// tract as a digit string ("53033000100") while the feature service reports it
/// as a float (53033000100.0). Both are normalized to an integer here so the
/// join never compares floating-point keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TractId(pub u64);

impl TractId {
    /// Parses a tract identifier from its textual form. Returns `None` for
    /// anything that is not a non-negative whole number.
    pub fn parse_str(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Ok(v) = trimmed.parse::<u64>() {
            return Some(TractId(v));
        }
        // Some exports write the identifier as "53033000100.0".
        trimmed.parse::<f64>().ok().and_then(Self::from_f64)
    }

    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() || value < 0.0 || value.fract() != 0.0 {
            return None;
        }
        Some(TractId(value as u64))
    }
}

impl fmt::Display for TractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One row of the local food-access table after cleaning.
#[derive(Debug, Clone)]
pub struct FoodAccessRecord {
    pub tract_id: TractId,
    pub access_score: f64,
}

/// One feature from the remote demographic service.
///
/// `percent_poc` stays optional until the join filter runs; the geometry is
/// opaque to everything except the renderers and the lookup API.
#[derive(Debug, Clone)]
pub struct DemographicRecord {
    pub tract_id: TractId,
    pub percent_poc: Option<f64>,
    pub geometry: MultiPolygon<f64>,
}

/// A matched tract carrying both variables plus its derived category.
///
/// `bi_class` is `Some` iff both inputs were non-missing numeric values;
/// `color` is `Some` iff `bi_class` maps to one of the nine configured codes.
/// Records without a color are skipped at render time.
#[derive(Debug, Clone)]
pub struct JoinedRecord {
    pub tract_id: TractId,
    pub percent_poc: f64,
    pub access_score: f64,
    pub geometry: MultiPolygon<f64>,
    pub bi_class: Option<BiClass>,
    pub color: Option<String>,
}

/// A 3x3 bivariate category: demographic class paired with access class,
/// each in 1..=3, rendered as a two-character code like "32".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BiClass {
    pub poc: u8,
    pub access: u8,
}

impl BiClass {
    pub fn new(poc: u8, access: u8) -> Self {
        Self { poc, access }
    }

    pub fn code(&self) -> String {
        format!("{}{}", self.poc, self.access)
    }
}

impl fmt::Display for BiClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.poc, self.access)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_digit_string() {
        assert_eq!(TractId::parse_str("53033000100"), Some(TractId(53033000100)));
    }

    #[test]
    fn parses_float_form() {
        assert_eq!(TractId::parse_str("53033000100.0"), Some(TractId(53033000100)));
        assert_eq!(TractId::parse_str(" 53033000100 "), Some(TractId(53033000100)));
    }

    #[test]
    fn rejects_non_numeric_identifiers() {
        assert_eq!(TractId::parse_str("Statewide"), None);
        assert_eq!(TractId::parse_str(""), None);
        assert_eq!(TractId::parse_str("53033000100.5"), None);
        assert_eq!(TractId::parse_str("-1"), None);
    }

    #[test]
    fn rejects_non_integral_floats() {
        assert_eq!(TractId::from_f64(f64::NAN), None);
        assert_eq!(TractId::from_f64(f64::INFINITY), None);
        assert_eq!(TractId::from_f64(-2.0), None);
        assert_eq!(TractId::from_f64(12.25), None);
        assert_eq!(TractId::from_f64(12.0), Some(TractId(12)));
    }

    #[test]
    fn code_concatenates_classes() {
        assert_eq!(BiClass::new(3, 2).code(), "32");
        assert_eq!(BiClass::new(1, 1).to_string(), "11");
    }
}
