//! Numeral canonicalization for financial prose.
//!
//! Magnitude words (万 / 亿 and their compositions, e.g. 万亿) are exact
//! power-of-ten multipliers, so "3万亿" and "30000亿" must canonicalize to
//! the same value. Arithmetic is exact scaled-decimal; floating point would
//! round at trillion scale.

use std::sync::OnceLock;

use regex::Regex;

use marketbrief_common::MarketBriefError;

// --- Canonical value ---

/// An exact decimal: `mantissa * 10^exponent`, normalized so the mantissa
/// carries no trailing zeros (and zero is `(0, 0)`). Normalization makes
/// equality bit-for-bit: two expressions denote the same quantity iff their
/// canonical forms are identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CanonicalValue {
    mantissa: i128,
    exponent: i32,
}

impl CanonicalValue {
    pub fn new(mantissa: i128, exponent: i32) -> Self {
        let mut mantissa = mantissa;
        let mut exponent = exponent;
        if mantissa == 0 {
            return Self {
                mantissa: 0,
                exponent: 0,
            };
        }
        while mantissa % 10 == 0 {
            mantissa /= 10;
            exponent += 1;
        }
        Self { mantissa, exponent }
    }

    pub fn zero() -> Self {
        Self::new(0, 0)
    }

    pub fn to_f64(&self) -> f64 {
        self.mantissa as f64 * 10f64.powi(self.exponent)
    }

    /// Exact equality first; the relative tolerance applies only when the
    /// caller has an expression marked approximate.
    pub fn approx_eq(&self, other: &CanonicalValue, rel_tol: f64) -> bool {
        if self == other {
            return true;
        }
        if rel_tol <= 0.0 {
            return false;
        }
        let a = self.to_f64();
        let b = other.to_f64();
        let scale = a.abs().max(b.abs());
        if scale == 0.0 {
            return true;
        }
        (a - b).abs() <= rel_tol * scale
    }
}

impl std::fmt::Display for CanonicalValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let digits = self.mantissa.unsigned_abs().to_string();
        let sign = if self.mantissa < 0 { "-" } else { "" };
        if self.exponent >= 0 {
            write!(f, "{sign}{digits}{}", "0".repeat(self.exponent as usize))
        } else {
            let frac_len = (-self.exponent) as usize;
            if digits.len() > frac_len {
                let (int_part, frac_part) = digits.split_at(digits.len() - frac_len);
                write!(f, "{sign}{int_part}.{frac_part}")
            } else {
                write!(f, "{sign}0.{}{digits}", "0".repeat(frac_len - digits.len()))
            }
        }
    }
}

// --- Units ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitScale {
    /// Plain magnitude (counts, currency amounts).
    Count,
    /// Percentage points (% / 百分点), folded as 10^-2.
    Percent,
    /// Basis points (基点 / BP), folded as 10^-4.
    BasisPoint,
}

/// Comparison dimension: percentage points and basis points measure the
/// same kind of quantity and are comparable once canonicalized; absolute
/// amounts are not comparable to either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dimension {
    Absolute,
    Ratio,
}

impl UnitScale {
    pub fn dimension(&self) -> Dimension {
        match self {
            UnitScale::Count => Dimension::Absolute,
            UnitScale::Percent | UnitScale::BasisPoint => Dimension::Ratio,
        }
    }
}

impl std::fmt::Display for UnitScale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitScale::Count => Ok(()),
            UnitScale::Percent => write!(f, "%"),
            UnitScale::BasisPoint => write!(f, "bp"),
        }
    }
}

// --- Parsing ---

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedNumeral {
    pub value: CanonicalValue,
    pub unit: UnitScale,
    pub approximate: bool,
}

/// A numeral occurrence in a larger text, with its byte offset for
/// deterministic ordering of downstream issues.
#[derive(Debug, Clone, PartialEq)]
pub struct NumeralMention {
    pub text: String,
    pub offset: usize,
}

fn mention_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Second alternative: vague quantifiers (数万亿, 几千亿). They carry
        // a magnitude word but no digits, so parse() rejects them and the
        // claim degrades to unverifiable.
        Regex::new(r"(?:[-+]?\d+(?:[,，]\d{3})*(?:\.\d+)?(?:\s*[十百千万亿]+)?(?:\s*(?:个?百分点|个?基点|%|％|BP|bp))?|[数几][十百千万亿]+)")
            .expect("valid numeral regex")
    })
}

fn number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[-+]?\d+(?:\.\d+)?").expect("valid number regex"))
}

/// Find every numeral mention in a text.
pub fn extract(text: &str) -> Vec<NumeralMention> {
    mention_regex()
        .find_iter(text)
        .map(|m| NumeralMention {
            text: m.as_str().to_string(),
            offset: m.start(),
        })
        .collect()
}

const UNIT_PHRASES: [&str; 8] = ["百分点", "基点", "%", "％", "BP", "bp", "万", "亿"];

/// Canonicalize one numeral expression.
///
/// - `Ok(None)` when the text plainly contains no quantity.
/// - `Err(NumeralParse)` when magnitude or unit markers appear without a
///   recognizable numeral token.
/// - `Ok(Some(_))` otherwise. Pure; no side effects.
pub fn parse(text: &str) -> Result<Option<ParsedNumeral>, MarketBriefError> {
    let cleaned: String = text.chars().filter(|c| *c != ',' && *c != '，').collect();

    let Some(number) = number_regex().find(&cleaned) else {
        if UNIT_PHRASES.iter().any(|u| cleaned.contains(u)) {
            return Err(MarketBriefError::NumeralParse(text.to_string()));
        }
        return Ok(None);
    };

    let (mantissa, mut exponent) = decimal_parts(number.as_str())?;
    let tail = &cleaned[number.end()..];

    // Units before magnitudes: 百分点 must not be read as the 百 multiplier.
    let unit = if tail.contains("百分点") || tail.contains('%') || tail.contains('％') {
        exponent -= 2;
        UnitScale::Percent
    } else if tail.contains("基点") || tail.contains("BP") || tail.contains("bp") {
        exponent -= 4;
        UnitScale::BasisPoint
    } else {
        // Compositional magnitude chain directly after the number:
        // 万亿 = 10^4 * 10^8.
        for c in tail.chars() {
            match c {
                ' ' => continue,
                '十' => exponent += 1,
                '百' => exponent += 2,
                '千' => exponent += 3,
                '万' => exponent += 4,
                '亿' => exponent += 8,
                _ => break,
            }
        }
        UnitScale::Count
    };

    let approximate = approx_before(&cleaned[..number.start()])
        || tail.contains("左右")
        || tail.contains("上下");

    Ok(Some(ParsedNumeral {
        value: CanonicalValue::new(mantissa, exponent),
        unit,
        approximate,
    }))
}

/// Canonicalize a mention found by [`extract`], reading the surrounding
/// text for approximation markers the tight mention slice cannot carry
/// (约 before the numeral, 左右 after it).
pub fn parse_mention(
    text: &str,
    mention: &NumeralMention,
) -> Result<Option<ParsedNumeral>, MarketBriefError> {
    let Some(mut parsed) = parse(&mention.text)? else {
        return Ok(None);
    };
    parsed.approximate = parsed.approximate || approximate_near(text, mention);
    Ok(Some(parsed))
}

/// Whether the text immediately around a mention marks it approximate.
pub fn approximate_near(text: &str, mention: &NumeralMention) -> bool {
    let before = &text[..mention.offset];
    let after = &text[mention.offset + mention.text.len()..];
    approx_before(before) || approx_after(after)
}

/// Split "3.5" into an integer mantissa and a decimal exponent (35, -1).
fn decimal_parts(number: &str) -> Result<(i128, i32), MarketBriefError> {
    let negative = number.starts_with('-');
    let unsigned = number.trim_start_matches(['-', '+']);
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, f),
        None => (unsigned, ""),
    };
    let digits = format!("{int_part}{frac_part}");
    let mantissa: i128 = digits
        .parse()
        .map_err(|_| MarketBriefError::NumeralParse(number.to_string()))?;
    let mantissa = if negative { -mantissa } else { mantissa };
    Ok((mantissa, -(frac_part.len() as i32)))
}

const APPROX_PHRASES: [&str; 6] = ["大约", "约为", "约合", "about", "approximately", "roughly"];

/// Words ending in 约 that do not mark approximation (纽约3家银行).
const APPROX_FALSE_FRIENDS: [&str; 5] = ["纽约", "合约", "契约", "预约", "履约"];

fn approx_before(before: &str) -> bool {
    let trimmed = before.trim_end();
    if APPROX_PHRASES.iter().any(|p| trimmed.ends_with(p)) {
        return true;
    }
    if APPROX_FALSE_FRIENDS.iter().any(|p| trimmed.ends_with(p)) {
        return false;
    }
    trimmed
        .chars()
        .last()
        .is_some_and(|c| matches!(c, '约' | '近' | '~'))
}

fn approx_after(after: &str) -> bool {
    let trimmed = after.trim_start();
    trimmed.starts_with("左右") || trimmed.starts_with("上下")
}

/// Equivalence under the configured tolerance: exact canonical equality,
/// or the relative tolerance when either side is marked approximate.
pub fn equivalent(a: &ParsedNumeral, b: &ParsedNumeral, rel_tol: f64) -> bool {
    if a.value == b.value {
        return true;
    }
    (a.approximate || b.approximate) && a.value.approx_eq(&b.value, rel_tol)
}
