use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// A tracked attribute dimension of a security.
///
/// The string tags (`SECTOR`, `MARKET`, ...) are what the history table
/// stores in its `attribute_type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AttributeType {
    Sector,
    Market,
    Name,
    Department,
    Shares,
}

impl AttributeType {
    /// Every attribute type, in canonical tracking order.
    pub const ALL: [Self; 5] = [
        Self::Name,
        Self::Department,
        Self::Shares,
        Self::Market,
        Self::Sector,
    ];

    /// Stable tag persisted in the store.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sector => "SECTOR",
            Self::Market => "MARKET",
            Self::Name => "NAME",
            Self::Department => "DEPARTMENT",
            Self::Shares => "SHARES",
        }
    }

    /// Provider field that carries this attribute in a raw snapshot row.
    #[must_use]
    pub const fn default_source_field(self) -> &'static str {
        match self {
            Self::Sector => "IDX_IND_NM",
            Self::Market => "MKT_TP_NM",
            Self::Name => "ISU_ABBRV",
            Self::Department => "SECT_TP_NM",
            Self::Shares => "LIST_SHRS",
        }
    }

    /// Numeric attributes are compared with thousands separators removed.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Shares)
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when an attribute tag is not one of the known types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown attribute type '{0}' (expected SECTOR, MARKET, NAME, DEPARTMENT or SHARES)")]
pub struct UnknownAttribute(pub String);

impl FromStr for AttributeType {
    type Err = UnknownAttribute;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SECTOR" => Ok(Self::Sector),
            "MARKET" => Ok(Self::Market),
            "NAME" => Ok(Self::Name),
            "DEPARTMENT" => Ok(Self::Department),
            "SHARES" => Ok(Self::Shares),
            _ => Err(UnknownAttribute(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AttributeType, UnknownAttribute};
    use std::collections::HashSet;
    use std::str::FromStr;

    #[test]
    fn tags_parse_case_insensitively() {
        assert_eq!(
            AttributeType::from_str("sector").unwrap(),
            AttributeType::Sector
        );
        assert_eq!(
            AttributeType::from_str(" Shares ").unwrap(),
            AttributeType::Shares
        );
        assert_eq!(
            AttributeType::from_str("INDUSTRY").unwrap_err(),
            UnknownAttribute("INDUSTRY".to_string())
        );
    }

    #[test]
    fn display_matches_stored_tag() {
        for attr in AttributeType::ALL {
            assert_eq!(attr.to_string(), attr.as_str());
            assert_eq!(AttributeType::from_str(attr.as_str()).unwrap(), attr);
        }
    }

    #[test]
    fn serde_uses_uppercase_tags() {
        assert_eq!(
            serde_json::to_string(&AttributeType::Department).unwrap(),
            "\"DEPARTMENT\""
        );
        assert_eq!(
            serde_json::from_str::<AttributeType>("\"MARKET\"").unwrap(),
            AttributeType::Market
        );
    }

    #[test]
    fn source_fields_are_distinct() {
        let fields: HashSet<_> = AttributeType::ALL
            .iter()
            .map(|a| a.default_source_field())
            .collect();
        assert_eq!(fields.len(), AttributeType::ALL.len());
    }
}
