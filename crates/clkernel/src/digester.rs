//
// digester.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

use std::sync::Mutex;

use hmac::{Hmac, Mac};
use sha2::{Sha224, Sha256, Sha384, Sha512};

use crate::connection_file::ConnectionConfig;
use crate::error::KernelError;

/// The HMAC schemes a connection file may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    HmacSha224,
    HmacSha256,
    HmacSha384,
    HmacSha512,
}

impl SignatureScheme {
    /// Look up a scheme by name, ignoring case and hyphens (`HMAC-SHA256`,
    /// `hmacsha256` and `hmac-sha256` are all the same scheme).
    pub fn parse(name: &str) -> Result<Self, KernelError> {
        let normalized = name.to_lowercase().replace('-', "");
        match normalized.as_str() {
            "hmacsha224" => Ok(SignatureScheme::HmacSha224),
            "hmacsha256" => Ok(SignatureScheme::HmacSha256),
            "hmacsha384" => Ok(SignatureScheme::HmacSha384),
            "hmacsha512" => Ok(SignatureScheme::HmacSha512),
            _ => Err(KernelError::MalformedConnection(format!(
                "unsupported signature scheme '{}'",
                name
            ))),
        }
    }

    /// The length of the digest, in bytes.
    pub fn digest_len(&self) -> usize {
        match self {
            SignatureScheme::HmacSha224 => 28,
            SignatureScheme::HmacSha256 => 32,
            SignatureScheme::HmacSha384 => 48,
            SignatureScheme::HmacSha512 => 64,
        }
    }
}

/// A keyed MAC for one of the supported schemes. The copy held by the
/// digester is never updated; each digest is taken from a clone of it.
#[derive(Clone)]
enum KeyedMac {
    Sha224(Hmac<Sha224>),
    Sha256(Hmac<Sha256>),
    Sha384(Hmac<Sha384>),
    Sha512(Hmac<Sha512>),
}

impl KeyedMac {
    fn new(scheme: SignatureScheme, key: &[u8]) -> Result<Self, KernelError> {
        let invalid =
            |e: hmac::digest::InvalidLength| KernelError::MalformedConnection(e.to_string());
        Ok(match scheme {
            SignatureScheme::HmacSha224 => {
                KeyedMac::Sha224(Hmac::<Sha224>::new_from_slice(key).map_err(invalid)?)
            }
            SignatureScheme::HmacSha256 => {
                KeyedMac::Sha256(Hmac::<Sha256>::new_from_slice(key).map_err(invalid)?)
            }
            SignatureScheme::HmacSha384 => {
                KeyedMac::Sha384(Hmac::<Sha384>::new_from_slice(key).map_err(invalid)?)
            }
            SignatureScheme::HmacSha512 => {
                KeyedMac::Sha512(Hmac::<Sha512>::new_from_slice(key).map_err(invalid)?)
            }
        })
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            KeyedMac::Sha224(mac) => mac.update(data),
            KeyedMac::Sha256(mac) => mac.update(data),
            KeyedMac::Sha384(mac) => mac.update(data),
            KeyedMac::Sha512(mac) => mac.update(data),
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            KeyedMac::Sha224(mac) => mac.finalize().into_bytes().to_vec(),
            KeyedMac::Sha256(mac) => mac.finalize().into_bytes().to_vec(),
            KeyedMac::Sha384(mac) => mac.finalize().into_bytes().to_vec(),
            KeyedMac::Sha512(mac) => mac.finalize().into_bytes().to_vec(),
        }
    }

    /// Constant-time comparison against an expected digest.
    fn verify(self, expected: &[u8]) -> bool {
        match self {
            KeyedMac::Sha224(mac) => mac.verify_slice(expected).is_ok(),
            KeyedMac::Sha256(mac) => mac.verify_slice(expected).is_ok(),
            KeyedMac::Sha384(mac) => mac.verify_slice(expected).is_ok(),
            KeyedMac::Sha512(mac) => mac.verify_slice(expected).is_ok(),
        }
    }
}

struct Keyed {
    scheme: SignatureScheme,
    mac: Mutex<KeyedMac>,
}

/// Signs and verifies the JSON parts of wire messages.
///
/// A digester built from an empty scheme or an empty key has signing
/// disabled: `sign` produces an empty signature and `verify` accepts
/// anything.
pub struct Digester {
    keyed: Option<Keyed>,
}

impl Digester {
    pub fn new(signature_scheme: &str, key: &[u8]) -> Result<Self, KernelError> {
        if signature_scheme.is_empty() || key.is_empty() {
            return Ok(Self::disabled());
        }
        let scheme = SignatureScheme::parse(signature_scheme)?;
        Ok(Self {
            keyed: Some(Keyed {
                scheme,
                mac: Mutex::new(KeyedMac::new(scheme, key)?),
            }),
        })
    }

    /// A digester that neither signs nor checks signatures.
    pub fn disabled() -> Self {
        Self { keyed: None }
    }

    pub fn from_config(config: &ConnectionConfig) -> Result<Self, KernelError> {
        Self::new(&config.signature_scheme, config.key.as_bytes())
    }

    pub fn is_enabled(&self) -> bool {
        self.keyed.is_some()
    }

    /// Compute the lowercase hex signature of the given parts.
    pub fn sign(&self, parts: &[&[u8]]) -> String {
        let keyed = match &self.keyed {
            Some(keyed) => keyed,
            None => return String::new(),
        };
        let prototype = keyed.mac.lock().unwrap_or_else(|e| e.into_inner());
        let mut mac = prototype.clone();
        for part in parts {
            mac.update(part);
        }
        hex::encode(mac.finalize())
    }

    /// Check a hex signature against the given parts.
    pub fn verify(&self, signature: &[u8], parts: &[&[u8]]) -> bool {
        let keyed = match &self.keyed {
            Some(keyed) => keyed,
            None => return true,
        };
        let expected = match hex::decode(signature) {
            Ok(expected) => expected,
            Err(_) => return false,
        };
        if expected.len() != keyed.scheme.digest_len() {
            return false;
        }
        let prototype = keyed.mac.lock().unwrap_or_else(|e| e.into_inner());
        let mut mac = prototype.clone();
        for part in parts {
            mac.update(part);
        }
        mac.verify(&expected)
    }
}

impl std::fmt::Debug for Digester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.keyed {
            Some(keyed) => write!(f, "Digester({:?})", keyed.scheme),
            None => write!(f, "Digester(disabled)"),
        }
    }
}
