//! DNSKEY and DS records in zone-file presentation form.
//!
//! Only the two record types that can act as trust anchors are modelled.
//! Parsing follows standard zone-file conventions closely enough to read
//! what resolvers write into trust anchor files:
//!
//! ```text
//! example.com. 3600 IN DNSKEY 257 3 8 AwEAAc...
//! example.com.      IN DS     12345 8 2 49FD46E6C4B45C55D4AC...
//! ```

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hickory_proto::rr::Name;
use ring::digest;

use crate::error::{AnchorError, Result};

/// TTL used when a record line does not carry one.
pub const DEFAULT_TTL: u32 = 3600;

/// The IN class.
pub const CLASS_IN: u16 = 1;

/// Secure entry point flag: the key signs the DNSKEY set (a KSK).
pub const FLAG_SEP: u16 = 0x0001;

/// Revoke flag (RFC 5011 section 7).
pub const FLAG_REVOKE: u16 = 0x0080;

/// Zone key flag.
pub const FLAG_ZONE: u16 = 0x0100;

/// Which of the two trust anchor record types a row holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// DNSKEY record
    Dnskey,
    /// Delegation signer record
    Ds,
}

impl KeyType {
    /// Mnemonic as written in zone files.
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::Dnskey => "DNSKEY",
            Self::Ds => "DS",
        }
    }
}

/// Record data of a trust anchor row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyData {
    /// DNSKEY rdata (RFC 4034 section 2)
    Dnskey {
        /// Flags field (ZONE, SEP, REVOKE)
        flags: u16,
        /// Protocol, always 3 in practice
        protocol: u8,
        /// Signing algorithm number
        algorithm: u8,
        /// Public key bytes
        public_key: Vec<u8>,
    },
    /// DS rdata (RFC 4034 section 5)
    Ds {
        /// Tag of the referenced DNSKEY
        key_tag: u16,
        /// Algorithm of the referenced DNSKEY
        algorithm: u8,
        /// Digest algorithm number
        digest_type: u8,
        /// Digest bytes
        digest: Vec<u8>,
    },
}

impl KeyData {
    /// The record type of this data.
    #[must_use]
    pub const fn key_type(&self) -> KeyType {
        match self {
            Self::Dnskey { .. } => KeyType::Dnskey,
            Self::Ds { .. } => KeyType::Ds,
        }
    }

    /// DNSKEY flags, `None` for DS data.
    #[must_use]
    pub const fn flags(&self) -> Option<u16> {
        match self {
            Self::Dnskey { flags, .. } => Some(*flags),
            Self::Ds { .. } => None,
        }
    }

    /// Algorithm number of the key (or of the key a DS refers to).
    #[must_use]
    pub const fn algorithm(&self) -> u8 {
        match self {
            Self::Dnskey { algorithm, .. } | Self::Ds { algorithm, .. } => *algorithm,
        }
    }

    /// A DNSKEY with the secure entry point flag.
    #[must_use]
    pub const fn is_ksk(&self) -> bool {
        matches!(self.flags(), Some(f) if f & FLAG_SEP != 0)
    }

    /// A DNSKEY with the revoke flag.
    #[must_use]
    pub const fn is_revoked(&self) -> bool {
        matches!(self.flags(), Some(f) if f & FLAG_REVOKE != 0)
    }

    /// Set or clear the revoke flag. No-op on DS data.
    pub fn set_revoked(&mut self, revoked: bool) {
        if let Self::Dnskey { flags, .. } = self {
            if revoked {
                *flags |= FLAG_REVOKE;
            } else {
                *flags &= !FLAG_REVOKE;
            }
        }
    }

    /// Compare two records while ignoring the revoke bit.
    ///
    /// A revoked key is the same key as its unrevoked form; DS data is
    /// compared exactly.
    #[must_use]
    pub fn same_key_ignoring_revoke(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::Dnskey {
                    flags: fa,
                    protocol: pa,
                    algorithm: aa,
                    public_key: ka,
                },
                Self::Dnskey {
                    flags: fb,
                    protocol: pb,
                    algorithm: ab,
                    public_key: kb,
                },
            ) => (fa & !FLAG_REVOKE) == (fb & !FLAG_REVOKE) && pa == pb && aa == ab && ka == kb,
            (Self::Ds { .. }, Self::Ds { .. }) => self == other,
            _ => false,
        }
    }

    /// Rdata in wire form.
    #[must_use]
    pub fn to_wire(&self) -> Vec<u8> {
        match self {
            Self::Dnskey {
                flags,
                protocol,
                algorithm,
                public_key,
            } => {
                let mut out = Vec::with_capacity(4 + public_key.len());
                out.extend_from_slice(&flags.to_be_bytes());
                out.push(*protocol);
                out.push(*algorithm);
                out.extend_from_slice(public_key);
                out
            }
            Self::Ds {
                key_tag,
                algorithm,
                digest_type,
                digest,
            } => {
                let mut out = Vec::with_capacity(4 + digest.len());
                out.extend_from_slice(&key_tag.to_be_bytes());
                out.push(*algorithm);
                out.push(*digest_type);
                out.extend_from_slice(digest);
                out
            }
        }
    }

    /// Key tag (RFC 4034 appendix B). For DS data, the tag it references.
    #[must_use]
    pub fn key_tag(&self) -> u16 {
        match self {
            Self::Ds { key_tag, .. } => *key_tag,
            Self::Dnskey {
                algorithm: 1,
                public_key,
                ..
            } => {
                // RSA/MD5 uses the low 16 bits of the modulus.
                let n = public_key.len();
                if n < 3 {
                    return 0;
                }
                u16::from_be_bytes([public_key[n - 3], public_key[n - 2]])
            }
            Self::Dnskey { .. } => {
                let wire = self.to_wire();
                let mut acc: u32 = 0;
                for (i, byte) in wire.iter().enumerate() {
                    if i % 2 == 0 {
                        acc += u32::from(*byte) << 8;
                    } else {
                        acc += u32::from(*byte);
                    }
                }
                acc += (acc >> 16) & 0xFFFF;
                (acc & 0xFFFF) as u16
            }
        }
    }
}

impl fmt::Display for KeyData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dnskey {
                flags,
                protocol,
                algorithm,
                public_key,
            } => write!(
                f,
                "{flags} {protocol} {algorithm} {}",
                BASE64.encode(public_key)
            ),
            Self::Ds {
                key_tag,
                algorithm,
                digest_type,
                digest,
            } => write!(
                f,
                "{key_tag} {algorithm} {digest_type} {}",
                hex::encode_upper(digest)
            ),
        }
    }
}

/// State carried between record lines of one file: the `$ORIGIN` in force
/// and the last owner name, for lines that omit it.
#[derive(Debug, Clone, Default)]
pub struct ParseContext {
    /// Suffix for relative names; the root when unset
    pub origin: Option<Name>,
    /// Owner of the previous record line
    pub previous_owner: Option<Name>,
}

impl ParseContext {
    /// Resolve an owner token against the current origin.
    pub fn resolve_name(&self, token: &str) -> Result<Name> {
        let root = Name::root();
        let origin = self.origin.as_ref().unwrap_or(&root);
        if token == "@" {
            return Ok(origin.clone());
        }
        Name::parse(token, Some(origin)).map_err(|e| AnchorError::InvalidName {
            name: token.to_string(),
            reason: e.to_string(),
        })
    }
}

/// One DNSKEY or DS record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRr {
    /// Owner name (the trust point's zone)
    pub owner: Name,
    /// Time to live in seconds
    pub ttl: u32,
    /// Numeric record class
    pub class: u16,
    /// Record data
    pub data: KeyData,
}

impl KeyRr {
    /// Build a DNSKEY record.
    #[must_use]
    pub fn dnskey(
        owner: Name,
        ttl: u32,
        flags: u16,
        algorithm: u8,
        public_key: Vec<u8>,
    ) -> Self {
        Self {
            owner,
            ttl,
            class: CLASS_IN,
            data: KeyData::Dnskey {
                flags,
                protocol: 3,
                algorithm,
                public_key,
            },
        }
    }

    /// Parse a record from presentation text.
    ///
    /// Parentheses are treated as whitespace, so a line already joined
    /// from a multi-line group parses the same as a single-line record.
    /// A line starting with whitespace reuses the previous owner.
    pub fn parse(text: &str, ctx: &mut ParseContext) -> Result<Self> {
        let inherits_owner = text.starts_with([' ', '\t']);
        let cleaned: String = text
            .chars()
            .map(|c| if c == '(' || c == ')' { ' ' } else { c })
            .collect();
        let mut tokens = cleaned.split_whitespace();

        let owner = if inherits_owner {
            ctx.previous_owner
                .clone()
                .ok_or(AnchorError::Truncated("owner name"))?
        } else {
            let token = tokens.next().ok_or(AnchorError::Truncated("owner name"))?;
            ctx.resolve_name(token)?
        };

        let mut ttl = None;
        let mut class = None;
        let rtype = loop {
            let token = tokens.next().ok_or(AnchorError::Truncated("record type"))?;
            if ttl.is_none() && token.bytes().all(|b| b.is_ascii_digit()) {
                ttl = Some(
                    token
                        .parse::<u32>()
                        .map_err(|_| AnchorError::field("ttl", token))?,
                );
                continue;
            }
            if class.is_none() {
                if let Some(c) = parse_class(token)? {
                    class = Some(c);
                    continue;
                }
            }
            break token;
        };

        let data = if rtype.eq_ignore_ascii_case("DNSKEY") {
            let flags = next_number(&mut tokens, "flags")?;
            let protocol = next_number(&mut tokens, "protocol")?;
            let algorithm = next_number(&mut tokens, "algorithm")?;
            let key_text: String = tokens.collect();
            if key_text.is_empty() {
                return Err(AnchorError::Truncated("public key"));
            }
            KeyData::Dnskey {
                flags,
                protocol,
                algorithm,
                public_key: BASE64.decode(key_text.as_bytes())?,
            }
        } else if rtype.eq_ignore_ascii_case("DS") {
            let key_tag = next_number(&mut tokens, "key tag")?;
            let algorithm = next_number(&mut tokens, "algorithm")?;
            let digest_type = next_number(&mut tokens, "digest type")?;
            let digest_text: String = tokens.collect();
            if digest_text.is_empty() {
                return Err(AnchorError::Truncated("digest"));
            }
            KeyData::Ds {
                key_tag,
                algorithm,
                digest_type,
                digest: hex::decode(digest_text)?,
            }
        } else {
            return Err(AnchorError::UnsupportedType(rtype.to_ascii_uppercase()));
        };

        ctx.previous_owner = Some(owner.clone());
        Ok(Self {
            owner,
            ttl: ttl.unwrap_or(DEFAULT_TTL),
            class: class.unwrap_or(CLASS_IN),
            data,
        })
    }

    /// Record type of this row.
    #[must_use]
    pub const fn key_type(&self) -> KeyType {
        self.data.key_type()
    }

    /// DNSKEY with the SEP flag.
    #[must_use]
    pub const fn is_ksk(&self) -> bool {
        self.data.is_ksk()
    }

    /// Key tag of the key (see [`KeyData::key_tag`]).
    #[must_use]
    pub fn key_tag(&self) -> u16 {
        self.data.key_tag()
    }

    /// Digest of this DNSKEY as a DS record would carry it.
    ///
    /// Returns `None` for DS rows and for digest types other than
    /// SHA-1 (1), SHA-256 (2) and SHA-384 (4).
    #[must_use]
    pub fn ds_digest(&self, digest_type: u8) -> Option<Vec<u8>> {
        if self.key_type() != KeyType::Dnskey {
            return None;
        }
        let algorithm = digest_algorithm(digest_type)?;
        let mut ctx = digest::Context::new(algorithm);
        ctx.update(&canonical_name_wire(&self.owner));
        ctx.update(&self.data.to_wire());
        Some(ctx.finish().as_ref().to_vec())
    }

    /// Derive the DS record that refers to this DNSKEY.
    #[must_use]
    pub fn to_ds(&self, digest_type: u8) -> Option<Self> {
        let digest = self.ds_digest(digest_type)?;
        Some(Self {
            owner: self.owner.clone(),
            ttl: self.ttl,
            class: self.class,
            data: KeyData::Ds {
                key_tag: self.key_tag(),
                algorithm: self.data.algorithm(),
                digest_type,
                digest,
            },
        })
    }

    /// Whether this DNSKEY is the key the given DS record refers to.
    #[must_use]
    pub fn matches_ds(&self, ds: &Self) -> bool {
        let KeyData::Ds {
            key_tag,
            algorithm,
            digest_type,
            digest,
        } = &ds.data
        else {
            return false;
        };
        if self.key_type() != KeyType::Dnskey
            || self.owner != ds.owner
            || self.class != ds.class
            || self.key_tag() != *key_tag
            || self.data.algorithm() != *algorithm
        {
            return false;
        }
        self.ds_digest(*digest_type)
            .is_some_and(|computed| computed == *digest)
    }
}

impl fmt::Display for KeyRr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}",
            self.owner,
            self.ttl,
            class_mnemonic(self.class),
            self.key_type().mnemonic(),
            self.data
        )
    }
}

/// Parse a class token; `Ok(None)` when the token is not a class.
fn parse_class(token: &str) -> Result<Option<u16>> {
    let upper = token.to_ascii_uppercase();
    let class = match upper.as_str() {
        "IN" => CLASS_IN,
        "CS" => 2,
        "CH" => 3,
        "HS" => 4,
        _ => {
            let Some(number) = upper.strip_prefix("CLASS") else {
                return Ok(None);
            };
            number
                .parse()
                .map_err(|_| AnchorError::InvalidClass(token.to_string()))?
        }
    };
    Ok(Some(class))
}

/// Class mnemonic for output.
#[must_use]
pub fn class_mnemonic(class: u16) -> String {
    match class {
        CLASS_IN => "IN".to_string(),
        2 => "CS".to_string(),
        3 => "CH".to_string(),
        4 => "HS".to_string(),
        other => format!("CLASS{other}"),
    }
}

fn next_number<'a, T: std::str::FromStr>(
    tokens: &mut impl Iterator<Item = &'a str>,
    field: &'static str,
) -> Result<T> {
    let token = tokens.next().ok_or(AnchorError::Truncated(field))?;
    token.parse().map_err(|_| AnchorError::field(field, token))
}

fn digest_algorithm(digest_type: u8) -> Option<&'static digest::Algorithm> {
    match digest_type {
        1 => Some(&digest::SHA1_FOR_LEGACY_USE_ONLY),
        2 => Some(&digest::SHA256),
        4 => Some(&digest::SHA384),
        _ => None,
    }
}

/// Lower-cased, uncompressed wire form of a name.
fn canonical_name_wire(name: &Name) -> Vec<u8> {
    let lower = name.to_lowercase();
    let mut out = Vec::new();
    for label in lower.iter() {
        out.push(label.len() as u8);
        out.extend_from_slice(label);
    }
    out.push(0);
    out
}
