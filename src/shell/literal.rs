//! Structured literal values.
//!
//! A [`Literal`] is the only value shape that ever leaves the shell parser:
//! maps, sequences, strings, numbers, booleans, null and date-times. Stored
//! documents use the same representation so filters can compare dates
//! against dates without a string round-trip.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::cmp::Ordering;
use std::fmt;

/// Name of the store-internal identifier field.
pub const INTERNAL_ID: &str = "_id";

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    DateTime(DateTime<Utc>),
    Array(Vec<Literal>),
    Map(Document),
}

/// Insertion-ordered map of field name to value.
///
/// Key order is significant: sort specifications and projections are
/// applied in the order the caller wrote them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    entries: Vec<(String, Literal)>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Literal> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Literal> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Insert or replace a field. A replaced field keeps its position.
    pub fn insert(&mut self, key: impl Into<String>, value: Literal) -> Option<Literal> {
        let key = key.into();
        if let Some(slot) = self.get_mut(&key) {
            return Some(std::mem::replace(slot, value));
        }
        self.entries.push((key, value));
        None
    }

    pub fn remove(&mut self, key: &str) -> Option<Literal> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Literal)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.iter().map(|(k, _)| k)
    }

    /// Resolve a dotted path (`a.b.c`) through nested maps.
    pub fn get_path(&self, path: &str) -> Option<&Literal> {
        let mut parts = path.split('.');
        let mut current = self.get(parts.next()?)?;
        for part in parts {
            current = match current {
                Literal::Map(doc) => doc.get(part)?,
                Literal::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

impl FromIterator<(String, Literal)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Literal)>>(iter: I) -> Self {
        let mut doc = Document::new();
        for (k, v) in iter {
            doc.insert(k, v);
        }
        doc
    }
}

impl Extend<(String, Literal)> for Document {
    fn extend<I: IntoIterator<Item = (String, Literal)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl IntoIterator for Document {
    type Item = (String, Literal);
    type IntoIter = std::vec::IntoIter<(String, Literal)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl Literal {
    pub fn type_name(&self) -> &'static str {
        match self {
            Literal::Null => "null",
            Literal::Bool(_) => "bool",
            Literal::Int(_) => "int",
            Literal::Float(_) => "float",
            Literal::String(_) => "string",
            Literal::DateTime(_) => "date",
            Literal::Array(_) => "array",
            Literal::Map(_) => "map",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Literal::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view; floats qualify only when they carry no fraction.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Literal::Int(n) => Some(*n),
            Literal::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Literal::Int(n) => Some(*n as f64),
            Literal::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Literal::Map(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Literal]> {
        match self {
            Literal::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Projection-style truthiness: `0`, `false` and `null` are off.
    pub fn is_truthy(&self) -> bool {
        match self {
            Literal::Null => false,
            Literal::Bool(b) => *b,
            Literal::Int(n) => *n != 0,
            Literal::Float(f) => *f != 0.0,
            _ => true,
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Literal::Null => 0,
            Literal::Int(_) | Literal::Float(_) => 1,
            Literal::String(_) => 2,
            Literal::Map(_) => 3,
            Literal::Array(_) => 4,
            Literal::Bool(_) => 5,
            Literal::DateTime(_) => 6,
        }
    }

    /// True when both values fall in the same comparison class
    /// (all numbers share one class).
    pub fn same_class(&self, other: &Literal) -> bool {
        self.type_rank() == other.type_rank()
    }

    /// Total order across all literal kinds: values of different kinds order
    /// by kind, numbers compare numerically regardless of int/float.
    pub fn canonical_cmp(&self, other: &Literal) -> Ordering {
        let rank = self.type_rank().cmp(&other.type_rank());
        if rank != Ordering::Equal {
            return rank;
        }
        match (self, other) {
            (Literal::Int(a), Literal::Int(b)) => a.cmp(b),
            (a @ (Literal::Int(_) | Literal::Float(_)), b) => {
                let (x, y) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
            (Literal::String(a), Literal::String(b)) => a.cmp(b),
            (Literal::Bool(a), Literal::Bool(b)) => a.cmp(b),
            (Literal::DateTime(a), Literal::DateTime(b)) => a.cmp(b),
            (Literal::Array(a), Literal::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.canonical_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Literal::Map(a), Literal::Map(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                    let ord = ka.cmp(kb).then_with(|| va.canonical_cmp(vb));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => Ordering::Equal,
        }
    }

    /// Equality under the canonical order (`1 == 1.0`).
    pub fn loose_eq(&self, other: &Literal) -> bool {
        self.canonical_cmp(other) == Ordering::Equal
    }
}

impl Serialize for Literal {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Literal::Null => serializer.serialize_unit(),
            Literal::Bool(b) => serializer.serialize_bool(*b),
            Literal::Int(n) => serializer.serialize_i64(*n),
            Literal::Float(f) => serializer.serialize_f64(*f),
            Literal::String(s) => serializer.serialize_str(s),
            Literal::DateTime(dt) => {
                serializer.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Literal::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Literal::Map(doc) => doc.serialize(serializer),
        }
    }
}

impl Serialize for Document {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (k, v) in self.iter() {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "<{}>", self.type_name()),
        }
    }
}

impl From<serde_json::Value> for Literal {
    /// Extended-JSON `{"$date": "<iso>"}` objects become date-times.
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Literal::Null,
            Value::Bool(b) => Literal::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Literal::Int(i),
                None => Literal::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Literal::String(s),
            Value::Array(items) => Literal::Array(items.into_iter().map(Literal::from).collect()),
            Value::Object(obj) => {
                if obj.len() == 1 {
                    if let Some(Value::String(s)) = obj.get("$date") {
                        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                            return Literal::DateTime(dt.with_timezone(&Utc));
                        }
                    }
                }
                Literal::Map(
                    obj.into_iter()
                        .map(|(k, v)| (k, Literal::from(v)))
                        .collect(),
                )
            }
        }
    }
}

impl From<Document> for Literal {
    fn from(doc: Document) -> Self {
        Literal::Map(doc)
    }
}

impl From<&str> for Literal {
    fn from(s: &str) -> Self {
        Literal::String(s.to_string())
    }
}

impl From<i64> for Literal {
    fn from(n: i64) -> Self {
        Literal::Int(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_document_insert_keeps_position() {
        let mut doc = Document::new();
        doc.insert("a", Literal::Int(1));
        doc.insert("b", Literal::Int(2));
        doc.insert("a", Literal::Int(3));

        let keys: Vec<&String> = doc.keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(doc.get("a"), Some(&Literal::Int(3)));
    }

    #[test]
    fn test_remove_and_contains() {
        let mut doc: Document = vec![
            ("_id".to_string(), Literal::from("x1")),
            ("name".to_string(), Literal::from("Alice")),
        ]
        .into_iter()
        .collect();

        assert!(doc.contains_key(INTERNAL_ID));
        assert_eq!(doc.remove(INTERNAL_ID), Some(Literal::from("x1")));
        assert!(!doc.contains_key(INTERNAL_ID));
        assert_eq!(doc.len(), 1);
    }

    #[test]
    fn test_get_path() {
        let lit = Literal::from(json!({"a": {"b": [10, {"c": "deep"}]}}));
        let doc = lit.as_document().unwrap();
        assert_eq!(doc.get_path("a.b.0"), Some(&Literal::Int(10)));
        assert_eq!(doc.get_path("a.b.1.c"), Some(&Literal::from("deep")));
        assert_eq!(doc.get_path("a.x"), None);
    }

    #[test]
    fn test_canonical_order() {
        assert_eq!(Literal::Int(1).canonical_cmp(&Literal::Float(1.5)), Ordering::Less);
        assert!(Literal::Int(2).loose_eq(&Literal::Float(2.0)));
        assert_eq!(
            Literal::Null.canonical_cmp(&Literal::Int(0)),
            Ordering::Less
        );
        assert_eq!(
            Literal::from("z").canonical_cmp(&Literal::Bool(false)),
            Ordering::Less
        );
    }

    #[test]
    fn test_serialize_date_as_rfc3339() {
        let dt = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut doc = Document::new();
        doc.insert("at", Literal::DateTime(dt));
        doc.insert("n", Literal::Int(3));
        let s = serde_json::to_string(&Literal::Map(doc)).unwrap();
        assert_eq!(s, r#"{"at":"2024-01-01T00:00:00Z","n":3}"#);
    }

    #[test]
    fn test_from_extended_json_date() {
        let lit = Literal::from(json!({"$date": "2024-03-05T10:00:00Z"}));
        let expected = Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap();
        assert_eq!(lit, Literal::DateTime(expected));
    }

    #[test]
    fn test_truthiness() {
        assert!(!Literal::Int(0).is_truthy());
        assert!(!Literal::Bool(false).is_truthy());
        assert!(Literal::Int(1).is_truthy());
        assert!(Literal::from("yes").is_truthy());
    }
}
