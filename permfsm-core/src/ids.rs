//! Fixed-width identifiers.
//!
//! States and roles are 32-byte tokens. A token is usually a short ASCII
//! name right-padded with zero bytes (`"STATE_ONE"` becomes
//! `0x53544154455f4f4e4500...00`), but any 32-byte value is valid.
//! Function selectors and interface ids are 4 bytes, accounts 20 bytes.
//!
//! All identifiers parse from and print as `0x`-prefixed lowercase hex.
//! Tokens additionally parse from and print as their name when they hold one.

use crate::error::CoreError;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

macro_rules! fixed_bytes {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name([u8; $len]);

        impl $name {
            /// Width in bytes.
            pub const LEN: usize = $len;

            /// The all-zero value.
            pub const ZERO: Self = Self([0u8; $len]);

            pub const fn new(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; $len]
            }

            /// Returns `0x`-prefixed lowercase hex.
            pub fn to_hex(&self) -> String {
                format!("0x{}", hex::encode(self.0))
            }

            /// Parses hex with or without the `0x` prefix. The width must match exactly.
            pub fn from_hex(s: &str) -> Result<Self, CoreError> {
                let digits = s.strip_prefix("0x").unwrap_or(s);
                let mut bytes = [0u8; $len];
                hex::decode_to_slice(digits, &mut bytes).map_err(|e| {
                    CoreError::InvalidIdentifier {
                        value: s.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(Self(bytes))
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(de::Error::custom)
            }
        }
    };
}

macro_rules! hex_identifier {
    ($name:ident) => {
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }
    };
}

macro_rules! token_identifier {
    ($name:ident) => {
        impl $name {
            /// Encodes a short name as a zero-padded token.
            ///
            /// Names must be at most 31 bytes so the token keeps a trailing zero.
            pub fn encode(name: &str) -> Result<Self, CoreError> {
                let bytes = name.as_bytes();
                if bytes.len() >= 32 {
                    return Err(CoreError::InvalidIdentifier {
                        value: name.to_string(),
                        reason: format!("name is {} bytes, limit is 31", bytes.len()),
                    });
                }
                if bytes.contains(&0) {
                    return Err(CoreError::InvalidIdentifier {
                        value: name.to_string(),
                        reason: "name contains a NUL byte".to_string(),
                    });
                }
                let mut token = [0u8; 32];
                token[..bytes.len()].copy_from_slice(bytes);
                Ok(Self(token))
            }

            /// Compile-time variant of [`encode`](Self::encode).
            ///
            /// Panics (at compile time in const contexts) on names of 32 bytes or more.
            pub const fn literal(name: &'static str) -> Self {
                let bytes = name.as_bytes();
                assert!(bytes.len() < 32, "token name longer than 31 bytes");
                let mut token = [0u8; 32];
                let mut i = 0;
                while i < bytes.len() {
                    token[i] = bytes[i];
                    i += 1;
                }
                Self(token)
            }

            /// Returns the name held by this token, if it is a zero-padded
            /// non-empty UTF-8 string of at most 31 bytes.
            ///
            /// Full-width tokens have no name, so they display as hex and
            /// parse back through [`from_hex`](Self::from_hex).
            pub fn name(&self) -> Option<&str> {
                let end = self.0.iter().position(|&b| b == 0)?;
                if end == 0 || self.0[end..].iter().any(|&b| b != 0) {
                    return None;
                }
                std::str::from_utf8(&self.0[..end]).ok()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.name() {
                    Some(name) if !name.starts_with("0x") && !name.chars().any(char::is_control) => {
                        f.write_str(name)
                    }
                    _ => f.write_str(&self.to_hex()),
                }
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            /// Full-width hex (`0x` + 64 digits) parses as raw bytes, anything else as a name.
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if s.len() == 66 && s.starts_with("0x") {
                    Self::from_hex(s)
                } else {
                    Self::encode(s)
                }
            }
        }
    };
}

fixed_bytes!(
    /// Identifier of a state in the transition graph.
    StateId,
    32
);
token_identifier!(StateId);

fixed_bytes!(
    /// Identifier of a role.
    RoleId,
    32
);
token_identifier!(RoleId);

impl RoleId {
    /// Root of the admin hierarchy. Administers itself and every role
    /// without an explicit admin.
    pub const DEFAULT_ADMIN: RoleId = RoleId::ZERO;
}

fixed_bytes!(
    /// Four-byte function selector.
    Selector,
    4
);
hex_identifier!(Selector);

fixed_bytes!(
    /// Four-byte interface identifier used for capability discovery.
    InterfaceId,
    4
);
hex_identifier!(InterfaceId);

fixed_bytes!(
    /// Externally identified principal.
    Account,
    20
);
hex_identifier!(Account);

impl Account {
    /// Account whose 20 bytes all equal `byte`. Handy for fixtures.
    pub const fn repeat_byte(byte: u8) -> Self {
        Self([byte; 20])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_pads_with_zeros() {
        let id = StateId::encode("STATE_ONE").unwrap();
        assert_eq!(&id.as_bytes()[..9], b"STATE_ONE");
        assert!(id.as_bytes()[9..].iter().all(|&b| b == 0));
        assert_eq!(id.name(), Some("STATE_ONE"));
        assert_eq!(id, StateId::literal("STATE_ONE"));
    }

    #[test]
    fn test_encode_rejects_long_names() {
        let long = "X".repeat(32);
        assert!(matches!(
            RoleId::encode(&long),
            Err(CoreError::InvalidIdentifier { .. })
        ));
        assert!(RoleId::encode(&"X".repeat(31)).is_ok());
        assert!(RoleId::encode("A\0B").is_err());
    }

    #[test]
    fn test_display_prefers_names() {
        assert_eq!(RoleId::literal("ROLE_ADMIN").to_string(), "ROLE_ADMIN");
        assert_eq!(
            RoleId::DEFAULT_ADMIN.to_string(),
            format!("0x{}", "0".repeat(64))
        );

        let mut raw = [0u8; 32];
        raw[0] = b'A';
        raw[31] = 1;
        assert!(StateId::new(raw).name().is_none());
        assert!(StateId::new(raw).to_string().starts_with("0x41"));
    }

    #[test]
    fn test_full_width_token_round_trips() {
        let id = StateId::new([b'A'; 32]);
        assert!(id.name().is_none());

        let text = id.to_string();
        assert_eq!(text, format!("0x{}", "41".repeat(32)));
        assert_eq!(text.parse::<StateId>().unwrap(), id);

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(serde_json::from_str::<StateId>(&json).unwrap(), id);

        let longest = RoleId::encode(&"B".repeat(31)).unwrap();
        assert_eq!(longest.to_string(), "B".repeat(31));
        assert_eq!(longest.to_string().parse::<RoleId>().unwrap(), longest);
    }

    #[test]
    fn test_token_parse_accepts_names_and_hex() {
        let by_name: StateId = "STATE_TWO".parse().unwrap();
        let by_hex: StateId = by_name.to_hex().parse().unwrap();
        assert_eq!(by_name, by_hex);
    }

    #[test]
    fn test_hex_identifiers() {
        let account: Account = "0x00000000000000000000000000000000000000aa".parse().unwrap();
        assert_eq!(account.as_bytes()[19], 0xaa);
        assert_eq!(account.to_string(), "0x00000000000000000000000000000000000000aa");

        let selector: Selector = "0x01ffc9a7".parse().unwrap();
        assert_eq!(selector, Selector::new([0x01, 0xff, 0xc9, 0xa7]));

        assert!("0x1234".parse::<Account>().is_err());
        assert!("zz".parse::<Selector>().is_err());
    }

    #[test]
    fn test_serde_uses_display_form() {
        let role = RoleId::literal("ROLE_EDITOR");
        let json = serde_json::to_string(&role).unwrap();
        assert_eq!(json, "\"ROLE_EDITOR\"");
        let back: RoleId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, role);

        let account = Account::repeat_byte(0x11);
        let json = serde_json::to_string(&account).unwrap();
        assert_eq!(serde_json::from_str::<Account>(&json).unwrap(), account);
    }
}
