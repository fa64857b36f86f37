//! Entity alignment: resolve entity surface forms to canonical ids,
//! collect the numeral claims attributed to each entity, and diff a
//! draft's claims against its source material.

use std::collections::BTreeMap;

use marketbrief_common::config::EntityEntry;

use super::numeral::{self, CanonicalValue, Dimension, UnitScale};

// --- Claims ---

/// An atomic entity+numeral fact, produced during one audit pass and not
/// persisted beyond it.
#[derive(Debug, Clone, PartialEq)]
pub struct Claim {
    pub entity_ref: String,
    pub numeral_text: String,
    pub canonical_value: CanonicalValue,
    pub unit_scale: UnitScale,
    pub approximate: bool,
    /// Byte offset of the numeral in the text it was extracted from.
    pub offset: usize,
}

/// Claims plus the numerals that could not be canonicalized. Unverifiable
/// claims degrade to a note rather than failing the audit.
#[derive(Debug, Clone, Default)]
pub struct ClaimExtraction {
    pub claims: Vec<Claim>,
    pub unverifiable: Vec<String>,
}

// --- Mention resolution ---

#[derive(Debug, Clone, PartialEq)]
struct EntityMention {
    entity_ref: String,
    offset: usize,
    len: usize,
}

/// Find entity mentions, longest surface form first so 中国人民银行 is one
/// mention rather than an overlapping 人民银行.
fn resolve_mentions(text: &str, entities: &[EntityEntry]) -> Vec<EntityMention> {
    let mut candidates: Vec<EntityMention> = Vec::new();
    for entry in entities {
        for form in entry.surface_forms() {
            if form.is_empty() {
                continue;
            }
            for (offset, matched) in text.match_indices(form) {
                candidates.push(EntityMention {
                    entity_ref: entry.id.clone(),
                    offset,
                    len: matched.len(),
                });
            }
        }
    }
    // Longest match wins at the same offset; ties break on id for
    // order-independence.
    candidates.sort_by(|a, b| {
        a.offset
            .cmp(&b.offset)
            .then(b.len.cmp(&a.len))
            .then(a.entity_ref.cmp(&b.entity_ref))
    });

    let mut resolved: Vec<EntityMention> = Vec::new();
    for candidate in candidates {
        let overlaps = resolved
            .iter()
            .any(|kept| candidate.offset < kept.offset + kept.len);
        if !overlaps {
            resolved.push(candidate);
        }
    }
    resolved
}

// --- Claim extraction ---

/// Sentence boundaries for claim attribution. ASCII '.' is excluded so
/// decimals like 0.5 survive.
const SENTENCE_BREAKS: [char; 7] = ['。', '！', '？', '；', '!', '?', '\n'];

fn sentences(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    for (idx, c) in text.char_indices() {
        if SENTENCE_BREAKS.contains(&c) {
            if idx > start {
                spans.push((start, idx));
            }
            start = idx + c.len_utf8();
        }
    }
    if start < text.len() {
        spans.push((start, text.len()));
    }
    spans
}

/// Extract entity+numeral claims from a text span. A numeral is attributed
/// to the nearest preceding entity mention in the same sentence, falling
/// back to the nearest following one.
pub fn extract_claims(text: &str, entities: &[EntityEntry]) -> ClaimExtraction {
    let mentions = resolve_mentions(text, entities);
    let numerals = numeral::extract(text);
    let mut extraction = ClaimExtraction::default();

    for (start, end) in sentences(text) {
        let sentence_entities: Vec<&EntityMention> = mentions
            .iter()
            .filter(|m| m.offset >= start && m.offset < end)
            .collect();
        if sentence_entities.is_empty() {
            continue;
        }
        let sentence_numerals = numerals
            .iter()
            .filter(|n| n.offset >= start && n.offset < end);

        for numeral_mention in sentence_numerals {
            let owner = sentence_entities
                .iter()
                .rev()
                .find(|m| m.offset < numeral_mention.offset)
                .or_else(|| sentence_entities.first())
                .expect("sentence has at least one entity mention");

            match numeral::parse_mention(text, numeral_mention) {
                Ok(Some(parsed)) => extraction.claims.push(Claim {
                    entity_ref: owner.entity_ref.clone(),
                    numeral_text: numeral_mention.text.clone(),
                    canonical_value: parsed.value,
                    unit_scale: parsed.unit,
                    approximate: parsed.approximate,
                    offset: numeral_mention.offset,
                }),
                Ok(None) => {}
                Err(_) => extraction.unverifiable.push(format!(
                    "{}: {}",
                    owner.entity_ref, numeral_mention.text
                )),
            }
        }
    }
    extraction
}

// --- Alignment ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentOutcome {
    /// Draft and source claims agree under canonical equivalence.
    Match,
    /// Draft contradicts the sourced value. Blocking.
    Mismatch,
    /// Claim appears in the draft but nowhere in the sources. Blocking.
    Unsourced,
    /// Present in the sources, never mentioned in the draft.
    /// Informational only.
    Uncited,
    /// The sources disagree among themselves; not the draft's error.
    SourceAmbiguous,
}

impl std::fmt::Display for AlignmentOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlignmentOutcome::Match => write!(f, "match"),
            AlignmentOutcome::Mismatch => write!(f, "mismatch"),
            AlignmentOutcome::Unsourced => write!(f, "unsourced"),
            AlignmentOutcome::Uncited => write!(f, "uncited"),
            AlignmentOutcome::SourceAmbiguous => write!(f, "source_ambiguous"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EntityAlignment {
    pub entity_ref: String,
    pub outcome: AlignmentOutcome,
    /// What the draft says. None for uncited entities.
    pub draft_text: Option<String>,
    /// The sourced value, when one exists.
    pub expected: Option<String>,
    /// Draft byte offset for deterministic issue ordering.
    pub offset: Option<usize>,
}

/// Deduplicate claims that canonicalize to the same value, keeping the
/// earliest occurrence.
fn dedupe_by_value(claims: Vec<&Claim>) -> Vec<&Claim> {
    let mut sorted = claims;
    sorted.sort_by_key(|c| c.offset);
    let mut unique: Vec<&Claim> = Vec::new();
    for claim in sorted {
        if !unique.iter().any(|u| u.canonical_value == claim.canonical_value) {
            unique.push(claim);
        }
    }
    unique
}

/// Compare a draft's claims against source claims. Outcomes are grouped by
/// (entity, dimension) — percentage points compare against basis points,
/// but never against absolute amounts — and ordered by entity id, so the
/// result is independent of input processing order.
pub fn align(draft_claims: &[Claim], source_claims: &[Claim], rel_tol: f64) -> Vec<EntityAlignment> {
    type Group<'a> = (Vec<&'a Claim>, Vec<&'a Claim>);
    let mut groups: BTreeMap<(String, Dimension), Group> = BTreeMap::new();

    for claim in draft_claims {
        groups
            .entry((claim.entity_ref.clone(), claim.unit_scale.dimension()))
            .or_default()
            .0
            .push(claim);
    }
    for claim in source_claims {
        groups
            .entry((claim.entity_ref.clone(), claim.unit_scale.dimension()))
            .or_default()
            .1
            .push(claim);
    }

    let mut alignments = Vec::new();
    for ((entity_ref, _), (draft, source)) in groups {
        let draft = dedupe_by_value(draft);
        let source = dedupe_by_value(source);

        if draft.is_empty() {
            let first = source.first().expect("group has at least one claim");
            alignments.push(EntityAlignment {
                entity_ref,
                outcome: AlignmentOutcome::Uncited,
                draft_text: None,
                expected: Some(first.numeral_text.clone()),
                offset: None,
            });
            continue;
        }

        let sources_agree = source
            .iter()
            .all(|s| equivalent_claims(s, source[0], rel_tol));

        for claim in draft {
            let matched = source.iter().find(|s| equivalent_claims(claim, s, rel_tol));
            let (outcome, expected) = match matched {
                Some(s) => (AlignmentOutcome::Match, Some(s.numeral_text.clone())),
                None if source.is_empty() => (AlignmentOutcome::Unsourced, None),
                None if sources_agree => (
                    AlignmentOutcome::Mismatch,
                    Some(source[0].numeral_text.clone()),
                ),
                None => (
                    AlignmentOutcome::SourceAmbiguous,
                    Some(
                        source
                            .iter()
                            .map(|s| s.numeral_text.as_str())
                            .collect::<Vec<_>>()
                            .join(" / "),
                    ),
                ),
            };
            alignments.push(EntityAlignment {
                entity_ref: entity_ref.clone(),
                outcome,
                draft_text: Some(claim.numeral_text.clone()),
                expected,
                offset: Some(claim.offset),
            });
        }
    }
    alignments
}

fn equivalent_claims(a: &Claim, b: &Claim, rel_tol: f64) -> bool {
    if a.canonical_value == b.canonical_value {
        return true;
    }
    (a.approximate || b.approximate) && a.canonical_value.approx_eq(&b.canonical_value, rel_tol)
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketbrief_common::config::EntityEntry;

    fn entities() -> Vec<EntityEntry> {
        vec![
            EntityEntry {
                id: "pboc".to_string(),
                canonical_name: "中国人民银行".to_string(),
                aliases: vec!["央行".to_string(), "人民银行".to_string()],
            },
            EntityEntry {
                id: "mof".to_string(),
                canonical_name: "财政部".to_string(),
                aliases: vec![],
            },
        ]
    }

    #[test]
    fn longest_surface_form_wins() {
        let text = "中国人民银行今日宣布";
        let mentions = resolve_mentions(text, &entities());
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].entity_ref, "pboc");
        assert_eq!(mentions[0].len, "中国人民银行".len());
    }

    #[test]
    fn claims_pair_entity_with_same_sentence_numeral() {
        let text = "央行宣布降准0.5个百分点。财政部新增专项债3万亿元。";
        let extraction = extract_claims(text, &entities());
        assert_eq!(extraction.claims.len(), 2);
        assert_eq!(extraction.claims[0].entity_ref, "pboc");
        assert_eq!(extraction.claims[0].numeral_text, "0.5个百分点");
        assert_eq!(extraction.claims[1].entity_ref, "mof");
        assert_eq!(extraction.claims[1].numeral_text, "3万亿");
        assert!(extraction.unverifiable.is_empty());
    }

    #[test]
    fn numeral_in_entity_free_sentence_is_ignored() {
        let text = "市场普遍预期已久。利率下行50个基点。";
        let extraction = extract_claims(text, &entities());
        assert!(extraction.claims.is_empty());
    }

    fn claim(entity: &str, text: &str, offset: usize) -> Claim {
        let parsed = numeral::parse(text).unwrap().unwrap();
        Claim {
            entity_ref: entity.to_string(),
            numeral_text: text.to_string(),
            canonical_value: parsed.value,
            unit_scale: parsed.unit,
            approximate: parsed.approximate,
            offset,
        }
    }

    #[test]
    fn equivalent_notations_match() {
        let draft = vec![claim("pboc", "3万亿", 10)];
        let source = vec![claim("pboc", "30000亿", 0)];
        let alignments = align(&draft, &source, 0.0);
        assert_eq!(alignments.len(), 1);
        assert_eq!(alignments[0].outcome, AlignmentOutcome::Match);
    }

    #[test]
    fn contradicting_value_is_a_mismatch() {
        let draft = vec![claim("pboc", "5个百分点", 10)];
        let source = vec![claim("pboc", "0.5个百分点", 0)];
        let alignments = align(&draft, &source, 0.0);
        assert_eq!(alignments[0].outcome, AlignmentOutcome::Mismatch);
        assert_eq!(alignments[0].expected.as_deref(), Some("0.5个百分点"));
        assert_eq!(alignments[0].draft_text.as_deref(), Some("5个百分点"));
    }

    #[test]
    fn claim_without_source_is_unsourced() {
        let draft = vec![claim("mof", "2000亿", 5)];
        let source = vec![claim("pboc", "0.5个百分点", 0)];
        let alignments = align(&draft, &source, 0.0);
        let unsourced: Vec<_> = alignments
            .iter()
            .filter(|a| a.outcome == AlignmentOutcome::Unsourced)
            .collect();
        assert_eq!(unsourced.len(), 1);
        assert_eq!(unsourced[0].entity_ref, "mof");
        // The pboc claim from the source side shows up as uncited
        assert!(alignments
            .iter()
            .any(|a| a.outcome == AlignmentOutcome::Uncited && a.entity_ref == "pboc"));
    }

    #[test]
    fn disagreeing_sources_are_ambiguous_not_mismatched() {
        let draft = vec![claim("pboc", "2.5万亿", 10)];
        let source = vec![claim("pboc", "3万亿", 0), claim("pboc", "2.8万亿", 50)];
        let alignments = align(&draft, &source, 0.0);
        assert_eq!(alignments[0].outcome, AlignmentOutcome::SourceAmbiguous);
    }

    #[test]
    fn ratio_and_absolute_dimensions_never_compare() {
        // A percentage claim must not be judged against an absolute amount
        let draft = vec![claim("pboc", "0.5个百分点", 10)];
        let source = vec![claim("pboc", "3万亿", 0)];
        let alignments = align(&draft, &source, 0.0);
        assert!(alignments
            .iter()
            .any(|a| a.outcome == AlignmentOutcome::Unsourced));
        assert!(alignments
            .iter()
            .any(|a| a.outcome == AlignmentOutcome::Uncited));
    }

    #[test]
    fn alignment_is_order_independent() {
        let draft = vec![claim("pboc", "3万亿", 10), claim("mof", "500亿", 40)];
        let source = vec![claim("mof", "500亿", 0), claim("pboc", "30000亿", 30)];

        let forward = align(&draft, &source, 0.0);
        let reversed_draft: Vec<Claim> = draft.iter().rev().cloned().collect();
        let reversed_source: Vec<Claim> = source.iter().rev().cloned().collect();
        let backward = align(&reversed_draft, &reversed_source, 0.0);

        let key = |a: &EntityAlignment| (a.entity_ref.clone(), a.outcome, a.offset);
        assert_eq!(
            forward.iter().map(key).collect::<Vec<_>>(),
            backward.iter().map(key).collect::<Vec<_>>()
        );
    }
}
