//! Account kind tags stored in the account comment field
//!
//! The comment (GECOS) field holds `{tag},{payload}`. A numeric tag is the
//! connection limit of an ordinary account and the payload is its password
//! note; the literal tags `token` and `hwid` mark accounts bound to an
//! opaque client identifier, which is the payload.

use serde::Serialize;
use std::fmt;

const TOKEN_TAG: &str = "token";
const HWID_TAG: &str = "hwid";

/// Connection limit given to anything that is not an ordinary account.
pub const DEFAULT_CONNECTION_LIMIT: u32 = 1;

/// What kind of account a comment field describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    /// Capacity-limited account
    Ordinary,
    /// Token-issued account
    Token,
    /// Account bound to a hardware id
    Hwid,
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AccountKind::Ordinary => "ordinary",
            AccountKind::Token => TOKEN_TAG,
            AccountKind::Hwid => HWID_TAG,
        })
    }
}

/// Decoded comment field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KindTag {
    /// Account kind
    pub kind: AccountKind,
    /// Password note or client identifier, possibly empty
    pub payload: String,
    /// Simultaneous sessions allowed
    pub connection_limit: u32,
}

impl KindTag {
    /// Ordinary account with a connection limit
    pub fn ordinary(connection_limit: u32, payload: impl Into<String>) -> Self {
        Self {
            kind: AccountKind::Ordinary,
            payload: payload.into(),
            connection_limit,
        }
    }

    /// Token-issued account
    pub fn token(client_id: impl Into<String>) -> Self {
        Self {
            kind: AccountKind::Token,
            payload: client_id.into(),
            connection_limit: DEFAULT_CONNECTION_LIMIT,
        }
    }

    /// Hardware-id account
    pub fn hwid(client_id: impl Into<String>) -> Self {
        Self {
            kind: AccountKind::Hwid,
            payload: client_id.into(),
            connection_limit: DEFAULT_CONNECTION_LIMIT,
        }
    }

    /// Comment field text.
    pub fn encode(&self) -> String {
        match self.kind {
            AccountKind::Ordinary => format!("{},{}", self.connection_limit, self.payload),
            AccountKind::Token => format!("{TOKEN_TAG},{}", self.payload),
            AccountKind::Hwid => format!("{HWID_TAG},{}", self.payload),
        }
    }

    /// Decode a comment field.
    ///
    /// Anything that is neither a number nor a known marker decodes as an
    /// ordinary account with the default limit and no payload; the field is
    /// free text and other tools write to it too.
    pub fn decode(field: &str) -> Self {
        let (head, payload) = match field.split_once(',') {
            Some((head, tail)) => (head.trim(), tail),
            None => (field.trim(), ""),
        };

        if head.eq_ignore_ascii_case(TOKEN_TAG) {
            Self::token(payload)
        } else if head.eq_ignore_ascii_case(HWID_TAG) {
            Self::hwid(payload)
        } else if let Ok(limit) = head.parse::<u32>() {
            Self::ordinary(limit, payload)
        } else {
            Self::ordinary(DEFAULT_CONNECTION_LIMIT, "")
        }
    }

    /// Whether the encoded form can be stored in the comment field.
    pub fn is_storable(&self) -> bool {
        !self.payload.contains([':', '\n', '\r'])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_decode_token() {
        let tag = KindTag::decode("token,client-9981");
        assert_eq!(tag.kind, AccountKind::Token);
        assert_eq!(tag.payload, "client-9981");
        assert_eq!(tag.connection_limit, 1);
    }

    #[test]
    fn test_decode_ordinary() {
        let tag = KindTag::decode("5,abc123");
        assert_eq!(tag.kind, AccountKind::Ordinary);
        assert_eq!(tag.connection_limit, 5);
        assert_eq!(tag.payload, "abc123");
    }

    #[test]
    fn test_decode_hwid_case_insensitive() {
        let tag = KindTag::decode("HWID,9f:00");
        assert_eq!(tag.kind, AccountKind::Hwid);
        assert_eq!(tag.payload, "9f:00");
    }

    #[test]
    fn test_decode_unknown_and_empty() {
        assert_eq!(KindTag::decode(""), KindTag::ordinary(1, ""));
        assert_eq!(KindTag::decode("Ubuntu"), KindTag::ordinary(1, ""));
        assert_eq!(KindTag::decode("Backup user,,,"), KindTag::ordinary(1, ""));
    }

    #[test]
    fn test_decode_limit_without_payload() {
        assert_eq!(KindTag::decode("3"), KindTag::ordinary(3, ""));
    }

    #[test]
    fn test_storable() {
        assert!(KindTag::ordinary(2, "pw").is_storable());
        assert!(!KindTag::token("a:b").is_storable());
    }

    fn any_tag() -> impl Strategy<Value = KindTag> {
        let payload = "[a-zA-Z0-9_.,#-]{0,24}";
        prop_oneof![
            (0u32..10_000, payload).prop_map(|(limit, p)| KindTag::ordinary(limit, p)),
            payload.prop_map(KindTag::token),
            payload.prop_map(KindTag::hwid),
        ]
    }

    proptest! {
        #[test]
        fn prop_encode_decode_round_trip(tag in any_tag()) {
            prop_assert_eq!(KindTag::decode(&tag.encode()), tag);
        }
    }
}
