use std::collections::BTreeMap;

use super::tokenizer::Tokenizer;
use crate::config::AnalysisConfig;
use crate::models::{
    AnalysisResult, AnalyzedField, Document, FieldOptions, FieldValue, TokenFreq, TokenLocation,
    ID_FIELD,
};
use crate::Result;

/// Turns a document into per-field term frequencies.
///
/// An error fails the whole batch the document belongs to.
pub trait Analyzer: Send + Sync {
    fn analyze(&self, doc: &Document) -> Result<AnalysisResult>;
}

/// Default analyzer: text fields go through the tokenizer, keywords are
/// indexed verbatim, and the external id is added as the `_id` keyword.
pub struct StandardAnalyzer {
    tokenizer: Tokenizer,
}

impl StandardAnalyzer {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            tokenizer: Tokenizer::new(config),
        }
    }

    fn analyze_field(&self, value: &FieldValue, options: FieldOptions) -> (u32, Vec<TokenFreq>) {
        let keep_locations = options.includes_term_vectors();
        let mut freqs: BTreeMap<String, TokenFreq> = BTreeMap::new();
        let length;

        match value {
            FieldValue::Keyword(s) => {
                length = 1;
                let loc = TokenLocation {
                    position: 0,
                    start: 0,
                    end: s.len() as u32,
                };
                freqs.insert(
                    s.clone(),
                    TokenFreq {
                        term: s.clone(),
                        frequency: 1,
                        locations: if keep_locations { vec![loc] } else { Vec::new() },
                    },
                );
            }
            FieldValue::Text(s) => {
                let tokens = self.tokenizer.tokens(s);
                length = tokens.len() as u32;
                for token in tokens {
                    let entry = freqs.entry(token.term.clone()).or_insert_with(|| TokenFreq {
                        term: token.term.clone(),
                        frequency: 0,
                        locations: Vec::new(),
                    });
                    entry.frequency += 1;
                    if keep_locations {
                        entry.locations.push(TokenLocation {
                            position: token.position,
                            start: token.start,
                            end: token.end,
                        });
                    }
                }
            }
        }

        (length, freqs.into_values().collect())
    }
}

impl Analyzer for StandardAnalyzer {
    fn analyze(&self, doc: &Document) -> Result<AnalysisResult> {
        // Fields sharing a name are folded together, positions continue.
        let mut by_name: BTreeMap<&str, AnalyzedField> = BTreeMap::new();

        for field in &doc.fields {
            if field.name == ID_FIELD || !field.options.is_indexed() {
                continue;
            }
            let (length, tokens) = self.analyze_field(&field.value, field.options);
            let entry = by_name
                .entry(field.name.as_str())
                .or_insert_with(|| AnalyzedField {
                    name: field.name.clone(),
                    options: field.options,
                    length: 0,
                    tokens: Vec::new(),
                });
            let base = entry.length;
            entry.length += length;
            merge_tokens(&mut entry.tokens, tokens, base);
        }

        let id_options = FieldOptions::INDEX | FieldOptions::STORE;
        let (length, tokens) =
            self.analyze_field(&FieldValue::Keyword(doc.id.clone()), id_options);

        let mut fields = Vec::with_capacity(by_name.len() + 1);
        fields.push(AnalyzedField {
            name: ID_FIELD.to_string(),
            options: id_options,
            length,
            tokens,
        });
        fields.extend(by_name.into_values());

        Ok(AnalysisResult {
            document: doc.clone(),
            fields,
        })
    }
}

fn merge_tokens(into: &mut Vec<TokenFreq>, more: Vec<TokenFreq>, position_base: u32) {
    if into.is_empty() {
        into.extend(more);
        return;
    }
    let mut map: BTreeMap<String, TokenFreq> =
        into.drain(..).map(|t| (t.term.clone(), t)).collect();
    for mut tf in more {
        for loc in &mut tf.locations {
            loc.position += position_base;
        }
        match map.get_mut(&tf.term) {
            Some(existing) => {
                existing.frequency += tf.frequency;
                existing.locations.extend(tf.locations);
            }
            None => {
                map.insert(tf.term.clone(), tf);
            }
        }
    }
    into.extend(map.into_values());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Field;

    #[test]
    fn test_analyze_adds_id_field() {
        let analyzer = StandardAnalyzer::new(&AnalysisConfig::default());
        let result = analyzer
            .analyze(&Document::new("doc-1").with_text("body", "hello hello world"))
            .unwrap();

        let id = result.field(ID_FIELD).expect("id field");
        assert_eq!(id.tokens.len(), 1);
        assert_eq!(id.tokens[0].term, "doc-1");

        let body = result.field("body").expect("body field");
        assert_eq!(body.length, 3);
        assert_eq!(body.tokens[0].term, "hello");
        assert_eq!(body.tokens[0].frequency, 2);
        assert_eq!(body.tokens[0].locations.len(), 2);
    }

    #[test]
    fn test_keyword_is_single_term() {
        let analyzer = StandardAnalyzer::new(&AnalysisConfig::default());
        let result = analyzer
            .analyze(&Document::new("a").with_keyword("tag", "Hello World"))
            .unwrap();
        let tag = result.field("tag").expect("tag field");
        assert_eq!(tag.tokens.len(), 1);
        assert_eq!(tag.tokens[0].term, "Hello World");
    }

    #[test]
    fn test_repeated_field_names_fold() {
        let analyzer = StandardAnalyzer::new(&AnalysisConfig::default());
        let doc = Document::new("a")
            .with_text("body", "one two")
            .with_text("body", "two");
        let result = analyzer.analyze(&doc).unwrap();
        let body = result.field("body").expect("body field");
        assert_eq!(body.length, 3);
        let two = body.tokens.iter().find(|t| t.term == "two").expect("two");
        assert_eq!(two.frequency, 2);
        assert_eq!(two.locations[1].position, 2);
    }

    #[test]
    fn test_unindexed_field_skipped() {
        let analyzer = StandardAnalyzer::new(&AnalysisConfig::default());
        let doc = Document::new("a").with_field(Field::text("raw", "x").with_options(FieldOptions::STORE));
        assert!(analyzer.analyze(&doc).unwrap().field("raw").is_none());
    }
}
