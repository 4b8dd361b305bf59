//! Keyword rule set: parsed once, validated once, immutable afterwards.
//!
//! The rule document is JSON:
//!
//! ```json
//! {
//!   "keywords": [
//!     {"keywords": ["invoice", "billing@"], "webhook": "https://…", "color": "green"}
//!   ],
//!   "default_webhook": "https://…",
//!   "default_color": "default"
//! }
//! ```
//!
//! Any violation fails the whole load; a broken rule never degrades to
//! "route nothing".

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::pipeline::types::Destination;

// ── Colors ──────────────────────────────────────────────────────────

/// Fixed symbolic palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedColor {
    Red,
    Green,
    Blue,
    Yellow,
    Purple,
    Orange,
    Pink,
    Teal,
    Default,
}

impl NamedColor {
    pub const ALL: [NamedColor; 9] = [
        Self::Red,
        Self::Green,
        Self::Blue,
        Self::Yellow,
        Self::Purple,
        Self::Orange,
        Self::Pink,
        Self::Teal,
        Self::Default,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Red => "red",
            Self::Green => "green",
            Self::Blue => "blue",
            Self::Yellow => "yellow",
            Self::Purple => "purple",
            Self::Orange => "orange",
            Self::Pink => "pink",
            Self::Teal => "teal",
            Self::Default => "default",
        }
    }

    pub fn value(self) -> u32 {
        match self {
            Self::Red => 0xFF0000,
            Self::Green => 0x00FF00,
            Self::Blue => 0x0099FF,
            Self::Yellow => 0xFFFF00,
            Self::Purple => 0x9B59B6,
            Self::Orange => 0xFF9900,
            Self::Pink => 0xFF69B4,
            Self::Teal => 0x1ABC9C,
            Self::Default => 0x7289DA,
        }
    }
}

/// Display color: a palette name or a literal `#RRGGBB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorSpec {
    Named(NamedColor),
    Hex(u32),
}

impl ColorSpec {
    /// 24-bit RGB value.
    pub fn value(self) -> u32 {
        match self {
            Self::Named(named) => named.value(),
            Self::Hex(rgb) => rgb,
        }
    }
}

impl Default for ColorSpec {
    fn default() -> Self {
        Self::Named(NamedColor::Default)
    }
}

impl FromStr for ColorSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(hex) = s.strip_prefix('#') {
            if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(format!("expected #RRGGBB, got {s:?}"));
            }
            return u32::from_str_radix(hex, 16)
                .map(Self::Hex)
                .map_err(|e| e.to_string());
        }
        let lower = s.to_lowercase();
        NamedColor::ALL
            .into_iter()
            .find(|c| c.name() == lower)
            .map(Self::Named)
            .ok_or_else(|| format!("unknown color name {s:?}"))
    }
}

impl fmt::Display for ColorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(named) => f.write_str(named.name()),
            Self::Hex(rgb) => write!(f, "#{rgb:06X}"),
        }
    }
}

// ── Raw document ────────────────────────────────────────────────────

fn default_color_name() -> String {
    NamedColor::Default.name().to_string()
}

/// Rule document as written by the operator.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawRuleSet {
    #[serde(default)]
    pub keywords: Vec<RawRule>,
    pub default_webhook: String,
    #[serde(default = "default_color_name")]
    pub default_color: String,
}

/// One keyword group as written by the operator.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawRule {
    /// Optional label, used only in logs.
    #[serde(default)]
    pub name: Option<String>,
    pub keywords: Vec<String>,
    pub webhook: String,
    #[serde(default = "default_color_name")]
    pub color: String,
}

// ── Validated rule set ──────────────────────────────────────────────

/// A keyword group bound to one destination and one color.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub name: Option<String>,
    /// Lower-cased, trimmed, de-duplicated; never empty.
    pub keywords: Vec<String>,
    pub destination: Destination,
    pub color: ColorSpec,
}

/// Fallback for messages no rule matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultRule {
    pub destination: Destination,
    pub color: ColorSpec,
}

/// Ordered rules plus the fallback. Order is fixed at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<Rule>,
    default: DefaultRule,
}

impl RuleSet {
    /// Validate a raw document.
    pub fn load(raw: RawRuleSet) -> Result<Self, ConfigError> {
        let mut rules = Vec::with_capacity(raw.keywords.len());

        for (index, raw_rule) in raw.keywords.into_iter().enumerate() {
            let position = index + 1;
            if raw_rule.keywords.is_empty() {
                return Err(ConfigError::EmptyKeywords { rule: position });
            }

            let mut keywords: Vec<String> = Vec::with_capacity(raw_rule.keywords.len());
            for keyword in &raw_rule.keywords {
                let normalized = keyword.trim().to_lowercase();
                if normalized.is_empty() {
                    return Err(ConfigError::BlankKeyword { rule: position });
                }
                if !keywords.contains(&normalized) {
                    keywords.push(normalized);
                }
            }

            let target = format!("rule #{position}");
            let destination = parse_destination(&raw_rule.webhook, &target)?;
            let color = parse_color(&raw_rule.color, &target)?;

            rules.push(Rule {
                name: raw_rule.name.filter(|n| !n.trim().is_empty()),
                keywords,
                destination,
                color,
            });
        }

        let default = DefaultRule {
            destination: parse_destination(&raw.default_webhook, "default_webhook")?,
            color: parse_color(&raw.default_color, "default_color")?,
        };

        Ok(Self { rules, default })
    }

    /// Parse and validate a JSON rule document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let raw: RawRuleSet =
            serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        Self::load(raw)
    }

    /// Read, parse and validate a JSON rule document from disk.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn default_rule(&self) -> &DefaultRule {
        &self.default
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn parse_destination(raw: &str, target: &str) -> Result<Destination, ConfigError> {
    Destination::parse(raw).map_err(|reason| ConfigError::InvalidDestination {
        target: target.to_string(),
        reason,
    })
}

fn parse_color(raw: &str, target: &str) -> Result<ColorSpec, ConfigError> {
    raw.parse().map_err(|_| ConfigError::UnknownColor {
        target: target.to_string(),
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const W1: &str = "https://chat.example/hooks/1/w1";
    const W0: &str = "https://chat.example/hooks/0/w0";

    fn doc(rules: serde_json::Value) -> String {
        serde_json::json!({
            "keywords": rules,
            "default_webhook": W0,
            "default_color": "default",
        })
        .to_string()
    }

    #[test]
    fn named_colors_resolve_to_fixed_values() {
        assert_eq!("red".parse::<ColorSpec>().unwrap().value(), 0xFF0000);
        assert_eq!("green".parse::<ColorSpec>().unwrap().value(), 0x00FF00);
        assert_eq!("teal".parse::<ColorSpec>().unwrap().value(), 0x1ABC9C);
        assert_eq!("default".parse::<ColorSpec>().unwrap().value(), 0x7289DA);
    }

    #[test]
    fn color_names_are_case_insensitive() {
        assert_eq!(
            "Purple".parse::<ColorSpec>().unwrap(),
            ColorSpec::Named(NamedColor::Purple)
        );
        assert_eq!(
            " ORANGE ".parse::<ColorSpec>().unwrap(),
            ColorSpec::Named(NamedColor::Orange)
        );
    }

    #[test]
    fn hex_colors_parse() {
        assert_eq!("#1abc9c".parse::<ColorSpec>().unwrap(), ColorSpec::Hex(0x1ABC9C));
        assert_eq!("#000000".parse::<ColorSpec>().unwrap().value(), 0);
        assert_eq!(ColorSpec::Hex(0x0099FF).to_string(), "#0099FF");
    }

    #[test]
    fn malformed_colors_fail() {
        assert!("magenta".parse::<ColorSpec>().is_err());
        assert!("#12345".parse::<ColorSpec>().is_err());
        assert!("#GGGGGG".parse::<ColorSpec>().is_err());
        assert!("".parse::<ColorSpec>().is_err());
    }

    #[test]
    fn loads_valid_document() {
        let rules = RuleSet::from_json(&doc(serde_json::json!([
            {"keywords": ["Invoice", " payment "], "webhook": W1, "color": "green"}
        ])))
        .unwrap();

        assert_eq!(rules.len(), 1);
        let rule = &rules.rules()[0];
        assert_eq!(rule.keywords, vec!["invoice", "payment"]);
        assert_eq!(rule.color, ColorSpec::Named(NamedColor::Green));
        assert_eq!(rule.destination, Destination::parse(W1).unwrap());
        assert_eq!(
            rules.default_rule().destination,
            Destination::parse(W0).unwrap()
        );
    }

    #[test]
    fn colors_default_when_omitted() {
        let json = serde_json::json!({
            "keywords": [{"keywords": ["x"], "webhook": W1}],
            "default_webhook": W0,
        })
        .to_string();
        let rules = RuleSet::from_json(&json).unwrap();
        assert_eq!(rules.rules()[0].color, ColorSpec::default());
        assert_eq!(rules.default_rule().color, ColorSpec::default());
    }

    #[test]
    fn duplicate_keywords_collapse_in_order() {
        let rules = RuleSet::from_json(&doc(serde_json::json!([
            {"keywords": ["b", "A", "a", "B"], "webhook": W1}
        ])))
        .unwrap();
        assert_eq!(rules.rules()[0].keywords, vec!["b", "a"]);
    }

    #[test]
    fn rule_order_is_preserved() {
        let rules = RuleSet::from_json(&doc(serde_json::json!([
            {"name": "first", "keywords": ["one"], "webhook": W1},
            {"name": "second", "keywords": ["two"], "webhook": W0},
        ])))
        .unwrap();
        let names: Vec<_> = rules.rules().iter().map(|r| r.name.as_deref()).collect();
        assert_eq!(names, vec![Some("first"), Some("second")]);
    }

    #[test]
    fn empty_keyword_list_fails() {
        let err = RuleSet::from_json(&doc(serde_json::json!([
            {"keywords": [], "webhook": W1}
        ])))
        .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyKeywords { rule: 1 }));
    }

    #[test]
    fn blank_keyword_fails() {
        let err = RuleSet::from_json(&doc(serde_json::json!([
            {"keywords": ["ok"], "webhook": W1},
            {"keywords": ["fine", "   "], "webhook": W1}
        ])))
        .unwrap_err();
        assert!(matches!(err, ConfigError::BlankKeyword { rule: 2 }));
    }

    #[test]
    fn unknown_color_fails_at_load() {
        let err = RuleSet::from_json(&doc(serde_json::json!([
            {"keywords": ["x"], "webhook": W1, "color": "chartreuse"}
        ])))
        .unwrap_err();
        match err {
            ConfigError::UnknownColor { target, value } => {
                assert_eq!(target, "rule #1");
                assert_eq!(value, "chartreuse");
            }
            other => panic!("Expected UnknownColor, got {other:?}"),
        }
    }

    #[test]
    fn unknown_default_color_fails() {
        let json = serde_json::json!({
            "keywords": [],
            "default_webhook": W0,
            "default_color": "sparkly",
        })
        .to_string();
        assert!(matches!(
            RuleSet::from_json(&json),
            Err(ConfigError::UnknownColor { .. })
        ));
    }

    #[test]
    fn invalid_webhook_fails() {
        let err = RuleSet::from_json(&doc(serde_json::json!([
            {"keywords": ["x"], "webhook": "not a url"}
        ])))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDestination { .. }));
    }

    #[test]
    fn missing_default_webhook_fails() {
        let json = serde_json::json!({"keywords": []}).to_string();
        assert!(matches!(
            RuleSet::from_json(&json),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn unknown_fields_fail() {
        let json = serde_json::json!({
            "keywords": [],
            "default_webhook": W0,
            "defualt_color": "red",
        })
        .to_string();
        assert!(matches!(
            RuleSet::from_json(&json),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn empty_rule_list_is_valid() {
        let rules = RuleSet::from_json(&doc(serde_json::json!([]))).unwrap();
        assert!(rules.is_empty());
    }

    #[test]
    fn from_path_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, doc(serde_json::json!([]))).unwrap();
        assert!(RuleSet::from_path(&path).is_ok());
        assert!(matches!(
            RuleSet::from_path(&dir.path().join("missing.json")),
            Err(ConfigError::Io(_))
        ));
    }
}
