use serde::{Deserialize, Serialize};

/// Reserved field holding a document's external identifier.
pub const ID_FIELD: &str = "_id";

/// Per-field indexing options, a small bitset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldOptions(u8);

impl FieldOptions {
    pub const INDEX: FieldOptions = FieldOptions(1);
    pub const STORE: FieldOptions = FieldOptions(1 << 1);
    pub const TERM_VECTORS: FieldOptions = FieldOptions(1 << 2);
    pub const DOC_VALUES: FieldOptions = FieldOptions(1 << 3);

    pub const fn empty() -> Self {
        FieldOptions(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn from_bits(bits: u8) -> Self {
        FieldOptions(bits & 0x0f)
    }

    pub const fn union(self, other: FieldOptions) -> Self {
        FieldOptions(self.0 | other.0)
    }

    pub const fn contains(self, other: FieldOptions) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_indexed(self) -> bool {
        self.contains(Self::INDEX)
    }

    pub fn is_stored(self) -> bool {
        self.contains(Self::STORE)
    }

    pub fn includes_term_vectors(self) -> bool {
        self.contains(Self::TERM_VECTORS)
    }

    pub fn includes_doc_values(self) -> bool {
        self.contains(Self::DOC_VALUES)
    }
}

impl Default for FieldOptions {
    fn default() -> Self {
        Self::INDEX
            .union(Self::STORE)
            .union(Self::TERM_VECTORS)
            .union(Self::DOC_VALUES)
    }
}

impl std::ops::BitOr for FieldOptions {
    type Output = FieldOptions;

    fn bitor(self, rhs: FieldOptions) -> FieldOptions {
        self.union(rhs)
    }
}

/// Field value. Text is analyzed into tokens; a keyword is indexed as a
/// single term.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    Text(String),
    Keyword(String),
}

impl FieldValue {
    pub fn as_str(&self) -> &str {
        match self {
            FieldValue::Text(s) | FieldValue::Keyword(s) => s,
        }
    }

    pub fn kind(&self) -> u8 {
        match self {
            FieldValue::Text(_) => 0,
            FieldValue::Keyword(_) => 1,
        }
    }

    pub fn from_kind(kind: u8, value: String) -> Self {
        match kind {
            1 => FieldValue::Keyword(value),
            _ => FieldValue::Text(value),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub value: FieldValue,
    pub options: FieldOptions,
}

impl Field {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: FieldValue::Text(value.into()),
            options: FieldOptions::default(),
        }
    }

    pub fn keyword(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: FieldValue::Keyword(value.into()),
            options: FieldOptions::default(),
        }
    }

    pub fn with_options(mut self, options: FieldOptions) -> Self {
        self.options = options;
        self
    }
}

/// A document as submitted to a batch, or as rebuilt from stored fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub fields: Vec<Field>,
}

impl Document {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_text(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_field(Field::text(name, value))
    }

    pub fn with_keyword(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_field(Field::keyword(name, value))
    }

    pub fn add_field(&mut self, field: Field) {
        self.fields.push(field);
    }

    /// First field with the given name
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_options_bits() {
        let opts = FieldOptions::INDEX | FieldOptions::STORE;
        assert!(opts.is_indexed());
        assert!(opts.is_stored());
        assert!(!opts.includes_term_vectors());
        assert_eq!(FieldOptions::from_bits(opts.bits()), opts);
        assert!(FieldOptions::default().includes_doc_values());
    }

    #[test]
    fn test_document_builder() {
        let doc = Document::new("a")
            .with_text("body", "hello world")
            .with_keyword("tag", "x");
        assert_eq!(doc.fields.len(), 2);
        assert_eq!(doc.field("tag").map(|f| f.value.as_str()), Some("x"));
        assert!(doc.field("missing").is_none());
    }

    #[test]
    fn test_field_value_kind() {
        let v = FieldValue::Keyword("k".into());
        assert_eq!(FieldValue::from_kind(v.kind(), "k".into()), v);
    }
}
