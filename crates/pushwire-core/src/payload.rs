//! Push payload document and the size-budget truncation algorithm.
//!
//! A payload is a JSON object with a reserved `aps` sub-object holding the
//! protocol fields (`alert`, `badge`, `sound`, and anything newer the caller
//! passes through) plus optional custom fields merged at the top level.
//!
//! The legacy gateway caps a packet at 256 bytes, 45 of which go to the
//! extended header, leaving [`MAX_PAYLOAD_BYTES`] for JSON.

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

use crate::errors::PayloadError;

/// Key of the reserved protocol sub-object.
pub const APS_KEY: &str = "aps";

/// Largest serialized payload the gateway accepts.
pub const MAX_PAYLOAD_BYTES: usize = 211;

/// Filler appended to truncated alerts (U+2026, three bytes of UTF-8).
pub const DEFAULT_TRUNCATION_FILLER: &str = "\u{2026}";

/// A push payload.
///
/// Immutable once built apart from [`Payload::truncate_alert`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Payload {
    aps: Map<String, Value>,
    custom: Map<String, Value>,
}

impl Payload {
    /// Build a payload from `aps` fields and top-level custom fields.
    ///
    /// Fails if a custom field is named `aps` or shadows one of `fields`.
    pub fn build(
        fields: Map<String, Value>,
        custom: Map<String, Value>,
    ) -> Result<Self, PayloadError> {
        if let Some(field) = custom
            .keys()
            .find(|key| key.as_str() == APS_KEY || fields.contains_key(*key))
        {
            return Err(PayloadError::ReservedFieldCollision {
                field: field.clone(),
            });
        }

        Ok(Self {
            aps: fields,
            custom,
        })
    }

    /// Start a typed builder.
    pub fn builder() -> PayloadBuilder {
        PayloadBuilder::default()
    }

    /// The reserved protocol fields.
    pub fn aps(&self) -> &Map<String, Value> {
        &self.aps
    }

    /// Custom fields merged at the top level.
    pub fn custom(&self) -> &Map<String, Value> {
        &self.custom
    }

    /// The alert text that truncation operates on, if any.
    pub fn alert_text(&self) -> Option<&str> {
        match self.aps.get("alert")? {
            Value::String(text) => Some(text),
            Value::Object(alert) => alert.get("body")?.as_str(),
            _ => None,
        }
    }

    /// The whole document as a JSON value.
    pub fn to_value(&self) -> Value {
        let mut root = Map::with_capacity(self.custom.len() + 1);
        let _ = root.insert(APS_KEY.to_owned(), Value::Object(self.aps.clone()));
        root.extend(self.custom.clone());
        Value::Object(root)
    }

    /// Serialize to UTF-8 JSON bytes.
    pub fn to_json(&self) -> Vec<u8> {
        // String-keyed JSON maps cannot fail to serialize.
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Serialized length in bytes.
    pub fn encoded_len(&self) -> usize {
        self.to_json().len()
    }

    /// Whether the serialized payload fits the gateway budget.
    pub fn is_within_budget(&self) -> bool {
        self.encoded_len() <= MAX_PAYLOAD_BYTES
    }

    /// Shorten the alert so the payload fits the budget, ending it with `filler`.
    ///
    /// A payload already within budget is left untouched, even without an
    /// alert. The cut always falls on a character boundary. Lengths are
    /// measured as the characters appear inside the serialized JSON string.
    pub fn truncate_alert(&mut self, filler: &str) -> Result<(), PayloadError> {
        let encoded_len = self.encoded_len();
        if encoded_len <= MAX_PAYLOAD_BYTES {
            return Ok(());
        }

        let Some(alert) = self.alert_text_mut() else {
            return Err(PayloadError::NoTruncatableAlert);
        };

        let available = escaped_len(alert);
        let excess = encoded_len - MAX_PAYLOAD_BYTES + escaped_len(filler);
        if excess > available {
            return Err(PayloadError::InsufficientRoom { excess, available });
        }

        let target = available - excess;
        let mut kept = 0;
        let cut = alert
            .char_indices()
            .find_map(|(index, c)| {
                kept += escaped_char_len(c);
                (kept > target).then_some(index)
            })
            .unwrap_or(alert.len());

        alert.truncate(cut);
        alert.push_str(filler);
        Ok(())
    }

    fn alert_text_mut(&mut self) -> Option<&mut String> {
        match self.aps.get_mut("alert")? {
            Value::String(text) => Some(text),
            Value::Object(alert) => match alert.get_mut("body")? {
                Value::String(body) => Some(body),
                _ => None,
            },
            _ => None,
        }
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.custom.len() + 1))?;
        map.serialize_entry(APS_KEY, &self.aps)?;
        for (key, value) in &self.custom {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Length of a character once written inside a JSON string.
fn escaped_char_len(c: char) -> usize {
    match c {
        '"' | '\\' | '\n' | '\r' | '\t' | '\u{08}' | '\u{0c}' => 2,
        c if u32::from(c) < 0x20 => 6,
        c => c.len_utf8(),
    }
}

fn escaped_len(text: &str) -> usize {
    text.chars().map(escaped_char_len).sum()
}

/// Typed builder for [`Payload`].
#[derive(Clone, Debug, Default)]
pub struct PayloadBuilder {
    fields: Map<String, Value>,
    custom: Map<String, Value>,
}

impl PayloadBuilder {
    /// Plain alert text.
    #[must_use]
    pub fn alert(self, text: impl Into<String>) -> Self {
        self.field("alert", Value::String(text.into()))
    }

    /// Structured alert with a `body`; other alert keys can be added with [`field`](Self::field).
    #[must_use]
    pub fn alert_body(self, body: impl Into<String>) -> Self {
        let mut alert = Map::new();
        let _ = alert.insert("body".to_owned(), Value::String(body.into()));
        self.field("alert", Value::Object(alert))
    }

    /// Badge count shown on the app icon.
    #[must_use]
    pub fn badge(self, badge: u32) -> Self {
        self.field("badge", Value::from(badge))
    }

    /// Sound file name in the app bundle.
    #[must_use]
    pub fn sound(self, sound: impl Into<String>) -> Self {
        self.field("sound", Value::String(sound.into()))
    }

    /// Any field of the reserved `aps` object.
    #[must_use]
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let _ = self.fields.insert(key.into(), value.into());
        self
    }

    /// A top-level custom field.
    #[must_use]
    pub fn custom(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let _ = self.custom.insert(key.into(), value.into());
        self
    }

    /// Finish the payload.
    pub fn build(self) -> Result<Payload, PayloadError> {
        Payload::build(self.fields, self.custom)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn long_alert() -> String {
        (0..30).map(|i| format!("{i:-<10}")).collect()
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn json_string(payload: &Payload) -> String {
        String::from_utf8(payload.to_json()).unwrap()
    }

    #[test]
    fn fields_go_into_the_aps_namespace() {
        let payload = Payload::build(object(json!({"foo": 1, "bar": "baz"})), Map::new()).unwrap();
        assert_eq!(payload.to_value(), json!({"aps": {"foo": 1, "bar": "baz"}}));
    }

    #[test]
    fn custom_fields_go_to_the_top_level() {
        let payload = Payload::builder()
            .alert("hi")
            .custom("fizz", 1)
            .custom("buzz", "bazz")
            .build()
            .unwrap();
        assert_eq!(
            payload.to_value(),
            json!({"aps": {"alert": "hi"}, "fizz": 1, "buzz": "bazz"})
        );
    }

    #[test]
    fn serialization_keeps_aps_first() {
        let payload = Payload::builder()
            .alert("hi")
            .badge(5)
            .custom("thread", "t1")
            .build()
            .unwrap();
        assert_eq!(
            json_string(&payload),
            r#"{"aps":{"alert":"hi","badge":5},"thread":"t1"}"#
        );
    }

    #[test]
    fn custom_field_shadowing_aps_field_is_rejected() {
        let err = Payload::builder()
            .alert("hi")
            .custom("alert", "again")
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            PayloadError::ReservedFieldCollision {
                field: "alert".into()
            }
        );
    }

    #[test]
    fn custom_field_named_aps_is_rejected() {
        let err = Payload::builder().custom("aps", 1).build().unwrap_err();
        assert_matches!(err, PayloadError::ReservedFieldCollision { field } if field == "aps");
    }

    #[test]
    fn budget_check() {
        let small = Payload::build(object(json!({"foo": 1, "bar": "baz"})), Map::new()).unwrap();
        assert!(small.is_within_budget());

        let large = Payload::builder().alert(long_alert()).build().unwrap();
        assert!(!large.is_within_budget());
    }

    #[test]
    fn within_budget_payload_is_untouched() {
        let mut payload = Payload::builder().alert("short").badge(1).build().unwrap();
        let before = payload.to_json();
        payload.truncate_alert(DEFAULT_TRUNCATION_FILLER).unwrap();
        assert_eq!(payload.to_json(), before);
    }

    #[test]
    fn truncates_single_byte_alert() {
        let mut payload = Payload::builder().alert(long_alert()).build().unwrap();
        payload.truncate_alert(DEFAULT_TRUNCATION_FILLER).unwrap();

        let expected = format!("{}18------\u{2026}", &long_alert()[..180]);
        assert_eq!(payload.alert_text(), Some(expected.as_str()));
        assert_eq!(payload.encoded_len(), MAX_PAYLOAD_BYTES);
    }

    #[test]
    fn truncates_structured_alert_body() {
        let mut payload = Payload::builder().alert_body(long_alert()).build().unwrap();
        payload.truncate_alert(DEFAULT_TRUNCATION_FILLER).unwrap();

        let expected = format!("{}17-------\u{2026}", &long_alert()[..170]);
        assert_eq!(payload.aps()["alert"]["body"], Value::String(expected));
        assert_eq!(payload.encoded_len(), MAX_PAYLOAD_BYTES);
    }

    #[test]
    fn blank_filler() {
        let mut payload = Payload::builder().alert(long_alert()).build().unwrap();
        payload.truncate_alert("").unwrap();

        let expected = format!("{}18--------1", &long_alert()[..180]);
        assert_eq!(payload.alert_text(), Some(expected.as_str()));
        assert_eq!(payload.encoded_len(), MAX_PAYLOAD_BYTES);
    }

    #[test]
    fn custom_filler() {
        let mut payload = Payload::builder().alert(long_alert()).build().unwrap();
        payload.truncate_alert("><><><>").unwrap();

        let expected = format!("{}18--><><><>", &long_alert()[..180]);
        assert_eq!(payload.alert_text(), Some(expected.as_str()));
        assert_eq!(payload.encoded_len(), MAX_PAYLOAD_BYTES);
    }

    #[test]
    fn never_splits_multibyte_characters() {
        let alert = "人権の無視及び軽侮が、人類の良心を踏みにじった野蛮行為をもたらし、言論及び信仰の自由が受けられ、恐怖及び欠乏のない世界の到来が、一般の人々の最高の願望として宣言されたので、";
        let mut payload = Payload::builder().alert(alert).build().unwrap();
        payload.truncate_alert(DEFAULT_TRUNCATION_FILLER).unwrap();

        assert_eq!(
            payload.alert_text(),
            Some("人権の無視及び軽侮が、人類の良心を踏みにじった野蛮行為をもたらし、言論及び信仰の自由が受けられ、恐怖及び欠乏のない世界の到来\u{2026}")
        );
        assert_eq!(payload.encoded_len(), 209);
    }

    #[test]
    fn escaped_characters_count_with_their_escapes() {
        let alert = "\"quoted\" ".repeat(30);
        let mut payload = Payload::builder().alert(alert).build().unwrap();
        payload.truncate_alert(DEFAULT_TRUNCATION_FILLER).unwrap();

        assert!(payload.is_within_budget());
        assert!(payload.encoded_len() >= MAX_PAYLOAD_BYTES - 1);
    }

    #[test]
    fn filler_longer_than_alert_room() {
        let mut payload = Payload::builder().alert(long_alert()).build().unwrap();
        let err = payload.truncate_alert(&long_alert()).unwrap_err();
        assert_matches!(err, PayloadError::InsufficientRoom { available: 300, .. });
    }

    #[test]
    fn rest_of_payload_too_large() {
        let mut payload = Payload::builder()
            .badge(5)
            .alert("hmm")
            .custom("thing", long_alert())
            .build()
            .unwrap();
        let err = payload.truncate_alert(DEFAULT_TRUNCATION_FILLER).unwrap_err();
        assert_matches!(err, PayloadError::InsufficientRoom { available: 3, .. });
    }

    #[test]
    fn missing_alert_only_matters_when_over_budget() {
        let mut small = Payload::builder().badge(5).build().unwrap();
        assert_eq!(small.truncate_alert(DEFAULT_TRUNCATION_FILLER), Ok(()));

        let mut large = Payload::builder()
            .badge(5)
            .custom("thing", long_alert())
            .build()
            .unwrap();
        assert_eq!(
            large.truncate_alert(DEFAULT_TRUNCATION_FILLER),
            Err(PayloadError::NoTruncatableAlert)
        );
    }

    #[test]
    fn non_string_alert_is_not_truncatable() {
        let mut payload = Payload::builder()
            .field("alert", 42)
            .custom("thing", long_alert())
            .build()
            .unwrap();
        assert_eq!(
            payload.truncate_alert(DEFAULT_TRUNCATION_FILLER),
            Err(PayloadError::NoTruncatableAlert)
        );
    }

    #[test]
    fn structured_alert_without_body_is_not_truncatable() {
        let mut payload = Payload::builder()
            .field("alert", json!({"title": "x"}))
            .custom("thing", long_alert())
            .build()
            .unwrap();
        assert!(!payload.is_within_budget());
        let before = payload.to_json();

        assert_eq!(
            payload.truncate_alert(DEFAULT_TRUNCATION_FILLER),
            Err(PayloadError::NoTruncatableAlert)
        );
        assert_eq!(payload.to_json(), before);
    }

    proptest! {
        #[test]
        fn ascii_alerts_truncate_to_exact_budget(alert in "[a-zA-Z0-9 .,!?]{192,600}") {
            let mut payload = Payload::builder().alert(alert).build().unwrap();
            payload.truncate_alert(DEFAULT_TRUNCATION_FILLER).unwrap();
            prop_assert_eq!(payload.encoded_len(), MAX_PAYLOAD_BYTES);
            prop_assert!(payload.alert_text().unwrap().ends_with(DEFAULT_TRUNCATION_FILLER));
        }

        #[test]
        fn unicode_alerts_fit_and_end_with_filler(alert in "\\PC{100,300}") {
            let mut payload = Payload::builder().alert(alert).badge(3).build().unwrap();
            let was_within_budget = payload.is_within_budget();
            payload.truncate_alert(DEFAULT_TRUNCATION_FILLER).unwrap();
            prop_assert!(payload.is_within_budget());
            if !was_within_budget {
                prop_assert!(payload.alert_text().unwrap().ends_with(DEFAULT_TRUNCATION_FILLER));
            }
        }
    }
}
