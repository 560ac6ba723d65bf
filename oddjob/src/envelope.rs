use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The message stored in a result queue: the result itself, and the identity allowed to read
/// it.  On the wire this is compact JSON:
///
/// ```json
/// {"r": <result>, "u": "<owner>"}
/// ```
///
/// where `u` is omitted for public results.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Envelope {
    #[serde(rename = "r")]
    pub payload: Value,

    #[serde(rename = "u", default, skip_serializing_if = "Option::is_none")]
    owner: Option<String>,
}

impl Envelope {
    /// Build an envelope for a result.  Unless `public` is set, the result is restricted to
    /// `identity`; an anonymous publisher always produces a public result, since there is no
    /// identity to compare against.
    pub fn new(payload: Value, identity: Option<&str>, public: bool) -> Self {
        let owner = if public {
            None
        } else {
            identity.filter(|id| !id.is_empty()).map(str::to_owned)
        };
        Self { payload, owner }
    }

    /// The identity this result is restricted to, if any
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref().filter(|owner| !owner.is_empty())
    }

    /// Determine whether the given requester may read this result.  Identities are compared
    /// exactly.
    pub fn readable_by(&self, identity: Option<&str>) -> bool {
        match self.owner() {
            None => true,
            Some(owner) => identity == Some(owner),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // serializing a Value with string keys cannot fail
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn public_wire_format() {
        let env = Envelope::new(json!({"x": 1}), Some("alice"), true);
        assert_eq!(env.to_bytes(), br#"{"r":{"x":1}}"#.to_vec());
        assert_eq!(env.owner(), None);
    }

    #[test]
    fn private_wire_format() {
        let env = Envelope::new(json!([1, 2]), Some("alice"), false);
        assert_eq!(env.to_bytes(), br#"{"r":[1,2],"u":"alice"}"#.to_vec());
        assert_eq!(env.owner(), Some("alice"));
    }

    #[test]
    fn anonymous_private_result_is_public() {
        let env = Envelope::new(json!(null), None, false);
        assert_eq!(env.owner(), None);
        assert!(env.readable_by(Some("bob")));
    }

    #[test]
    fn from_bytes_accepts_missing_or_empty_owner() {
        let env = Envelope::from_bytes(br#"{"r":"done"}"#).unwrap();
        assert_eq!(env.payload, json!("done"));
        assert!(env.readable_by(None));

        let env = Envelope::from_bytes(br#"{"r":"done","u":""}"#).unwrap();
        assert!(env.readable_by(None));
    }

    #[test]
    fn from_bytes_rejects_non_envelopes() {
        assert!(Envelope::from_bytes(b"not json").is_err());
        assert!(Envelope::from_bytes(br#"{"u":"alice"}"#).is_err());
    }

    #[test]
    fn readable_by_owner_only() {
        let env = Envelope::new(json!({"sum": 3}), Some("alice"), false);
        assert!(env.readable_by(Some("alice")));
        assert!(!env.readable_by(Some("bob")));
        assert!(!env.readable_by(Some("Alice")));
        assert!(!env.readable_by(None));
    }
}
