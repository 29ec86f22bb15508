//! Card number codec - deterministic encryption and display masking
//!
//! Card numbers are stored as ciphertext only. Encryption is deterministic:
//! the same number always yields the same ciphertext, so the ciphertext can
//! back a unique index and equality lookups without a second clear-text
//! column. The trade-off is that anyone with read access to the store can
//! tell two equal numbers apart from two different ones. Lookups depend on
//! this property; do not switch to a randomized scheme without adding a
//! separate blind index.

use std::fmt;
use std::str::FromStr;

use aes_gcm::aead::Aead;
use aes_gcm::aes::cipher::generic_array::GenericArray;
use aes_gcm::aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes_gcm::aes::{Aes128, Aes192, Aes256};
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::domain::result::{Error, Result};

/// Placeholder shown when a number cannot be masked
pub const MASK_PLACEHOLDER: &str = "****";

/// Prefix of every masked number
pub const MASK_PREFIX: &str = "**** **** **** ";

const AES_BLOCK: usize = 16;
const GCM_NONCE: usize = 12;
const GCM_TAG: usize = 16;
const NONCE_DOMAIN: &[u8] = b"bankcards/card-number/nonce/v1";

type Aes192Gcm = AesGcm<Aes192, aes_gcm::aead::consts::U12>;

/// Cipher transformation, named the way the deployment configures it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CipherTransformation {
    /// AES in ECB mode with PKCS#5/7 padding. Byte-compatible with existing
    /// card stores.
    #[default]
    AesEcbPkcs5,
    /// AES-GCM with a nonce derived from key and plaintext. Still
    /// deterministic, but authenticated: a wrong key never decrypts.
    AesGcmDeterministic,
}

impl CipherTransformation {
    pub fn as_str(&self) -> &'static str {
        match self {
            CipherTransformation::AesEcbPkcs5 => "AES/ECB/PKCS5Padding",
            CipherTransformation::AesGcmDeterministic => "AES/GCM/DETERMINISTIC",
        }
    }
}

impl fmt::Display for CipherTransformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CipherTransformation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "AES/ECB/PKCS5PADDING" | "AES/ECB/PKCS7PADDING" | "AES" => {
                Ok(CipherTransformation::AesEcbPkcs5)
            }
            "AES/GCM/DETERMINISTIC" => Ok(CipherTransformation::AesGcmDeterministic),
            other => Err(Error::crypto(format!("unsupported cipher transformation: {}", other))),
        }
    }
}

/// Operational AES key derived once from configured key material
#[derive(Clone, PartialEq, Eq)]
pub struct CryptoKey {
    bytes: Vec<u8>,
}

impl CryptoKey {
    /// Derive a key from configured material.
    ///
    /// Material may be prefixed with its encoding: `base64:`, `hex:` or
    /// `plain:`. Without a prefix it is tried as base64 and otherwise used as
    /// raw bytes. Anything that is not 16, 24 or 32 bytes long is replaced by
    /// its SHA-256 digest. The same material always yields the same key.
    pub fn derive(material: &str) -> Result<Self> {
        if material.trim().is_empty() {
            return Err(Error::crypto("card crypto key is not configured"));
        }

        let raw = if let Some(rest) = material.strip_prefix("base64:") {
            STANDARD
                .decode(rest.trim())
                .map_err(|e| Error::crypto(format!("invalid base64 key material: {}", e)))?
        } else if let Some(rest) = material.strip_prefix("hex:") {
            hex::decode(rest.trim())
                .map_err(|e| Error::crypto(format!("invalid hex key material: {}", e)))?
        } else if let Some(rest) = material.strip_prefix("plain:") {
            rest.as_bytes().to_vec()
        } else {
            STANDARD
                .decode(material)
                .unwrap_or_else(|_| material.as_bytes().to_vec())
        };

        if raw.is_empty() {
            return Err(Error::crypto("card crypto key is empty"));
        }

        let bytes = match raw.len() {
            16 | 24 | 32 => raw,
            _ => Sha256::digest(&raw).to_vec(),
        };

        Ok(Self { bytes })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for CryptoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoKey")
            .field("len", &self.bytes.len())
            .finish_non_exhaustive()
    }
}

enum BlockKey {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

impl BlockKey {
    fn new(key: &[u8]) -> Result<Self> {
        let bad_key = |_| Error::crypto("invalid AES key length");
        match key.len() {
            16 => Aes128::new_from_slice(key).map(BlockKey::Aes128).map_err(bad_key),
            24 => Aes192::new_from_slice(key).map(BlockKey::Aes192).map_err(bad_key),
            32 => Aes256::new_from_slice(key).map(BlockKey::Aes256).map_err(bad_key),
            n => Err(Error::crypto(format!("invalid AES key length: {} bytes", n))),
        }
    }

    fn encrypt_blocks(&self, data: &mut [u8]) {
        for chunk in data.chunks_exact_mut(AES_BLOCK) {
            let block = GenericArray::from_mut_slice(chunk);
            match self {
                BlockKey::Aes128(c) => c.encrypt_block(block),
                BlockKey::Aes192(c) => c.encrypt_block(block),
                BlockKey::Aes256(c) => c.encrypt_block(block),
            }
        }
    }

    fn decrypt_blocks(&self, data: &mut [u8]) {
        for chunk in data.chunks_exact_mut(AES_BLOCK) {
            let block = GenericArray::from_mut_slice(chunk);
            match self {
                BlockKey::Aes128(c) => c.decrypt_block(block),
                BlockKey::Aes192(c) => c.decrypt_block(block),
                BlockKey::Aes256(c) => c.decrypt_block(block),
            }
        }
    }
}

enum GcmKey {
    Aes128(Aes128Gcm),
    Aes192(Aes192Gcm),
    Aes256(Aes256Gcm),
}

impl GcmKey {
    fn new(key: &[u8]) -> Result<Self> {
        let bad_key = |_| Error::crypto("invalid AES-GCM key length");
        match key.len() {
            16 => Aes128Gcm::new_from_slice(key).map(GcmKey::Aes128).map_err(bad_key),
            24 => Aes192Gcm::new_from_slice(key).map(GcmKey::Aes192).map_err(bad_key),
            32 => Aes256Gcm::new_from_slice(key).map(GcmKey::Aes256).map_err(bad_key),
            n => Err(Error::crypto(format!("invalid AES-GCM key length: {} bytes", n))),
        }
    }

    fn seal(&self, nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Nonce::from_slice(nonce);
        let sealed = match self {
            GcmKey::Aes128(c) => c.encrypt(nonce, plaintext),
            GcmKey::Aes192(c) => c.encrypt(nonce, plaintext),
            GcmKey::Aes256(c) => c.encrypt(nonce, plaintext),
        };
        sealed.map_err(|_| Error::crypto("encryption failed"))
    }

    fn open(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Nonce::from_slice(nonce);
        let opened = match self {
            GcmKey::Aes128(c) => c.decrypt(nonce, ciphertext),
            GcmKey::Aes192(c) => c.decrypt(nonce, ciphertext),
            GcmKey::Aes256(c) => c.decrypt(nonce, ciphertext),
        };
        opened.map_err(|_| Error::crypto("decryption failed (wrong key or corrupted data)"))
    }
}

enum CipherEngine {
    Ecb(BlockKey),
    Gcm(GcmKey),
}

/// Card number codec
///
/// Built once at startup from configuration and shared by reference. Holds
/// the expanded key schedule, so no per-call key derivation happens.
pub struct CardCipher {
    transformation: CipherTransformation,
    key: CryptoKey,
    engine: CipherEngine,
}

impl CardCipher {
    /// Create a codec for an already derived key
    pub fn new(key: CryptoKey, transformation: CipherTransformation) -> Result<Self> {
        let engine = match transformation {
            CipherTransformation::AesEcbPkcs5 => CipherEngine::Ecb(BlockKey::new(&key.bytes)?),
            CipherTransformation::AesGcmDeterministic => CipherEngine::Gcm(GcmKey::new(&key.bytes)?),
        };
        Ok(Self {
            transformation,
            key,
            engine,
        })
    }

    /// Create a codec from raw configuration values
    pub fn from_config(key_material: &str, transformation: Option<&str>) -> Result<Self> {
        let transformation = match transformation {
            Some(t) if !t.trim().is_empty() => t.parse()?,
            _ => CipherTransformation::default(),
        };
        Self::new(CryptoKey::derive(key_material)?, transformation)
    }

    pub fn transformation(&self) -> CipherTransformation {
        self.transformation
    }

    /// Encrypt a clear-text card number to base64 ciphertext
    pub fn encrypt(&self, plain: &str) -> Result<String> {
        let bytes = match &self.engine {
            CipherEngine::Ecb(block) => {
                let mut data = pkcs7_pad(plain.as_bytes());
                block.encrypt_blocks(&mut data);
                data
            }
            CipherEngine::Gcm(gcm) => {
                let nonce = self.synthetic_nonce(plain.as_bytes());
                let sealed = gcm.seal(&nonce, plain.as_bytes())?;
                let mut out = Vec::with_capacity(GCM_NONCE + sealed.len());
                out.extend_from_slice(&nonce);
                out.extend_from_slice(&sealed);
                out
            }
        };
        Ok(STANDARD.encode(bytes))
    }

    /// Decrypt base64 ciphertext back to the clear-text card number
    pub fn decrypt(&self, encrypted: &str) -> Result<String> {
        let data = STANDARD
            .decode(encrypted.trim())
            .map_err(|_| Error::crypto("ciphertext is not valid base64"))?;

        let plain = match &self.engine {
            CipherEngine::Ecb(block) => {
                if data.is_empty() || data.len() % AES_BLOCK != 0 {
                    return Err(Error::crypto("ciphertext length is not a multiple of the block size"));
                }
                let mut data = data;
                block.decrypt_blocks(&mut data);
                pkcs7_unpad(data)?
            }
            CipherEngine::Gcm(gcm) => {
                if data.len() < GCM_NONCE + GCM_TAG {
                    return Err(Error::crypto("ciphertext is too short"));
                }
                let (nonce, sealed) = data.split_at(GCM_NONCE);
                gcm.open(nonce, sealed)?
            }
        };

        String::from_utf8(plain).map_err(|_| Error::crypto("decrypted card number is not valid UTF-8"))
    }

    /// Mask a stored ciphertext for display. Never fails.
    pub fn mask(&self, encrypted: &str) -> String {
        match self.decrypt(encrypted) {
            Ok(plain) => mask_number(&plain),
            Err(_) => MASK_PLACEHOLDER.to_string(),
        }
    }

    fn synthetic_nonce(&self, plaintext: &[u8]) -> [u8; GCM_NONCE] {
        let digest = Sha256::new()
            .chain_update(NONCE_DOMAIN)
            .chain_update(&self.key.bytes)
            .chain_update(plaintext)
            .finalize();
        let mut nonce = [0u8; GCM_NONCE];
        nonce.copy_from_slice(&digest[..GCM_NONCE]);
        nonce
    }
}

impl fmt::Debug for CardCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardCipher")
            .field("transformation", &self.transformation)
            .field("key", &self.key)
            .finish()
    }
}

/// Mask a clear-text card number: `**** **** **** 1234`.
///
/// Numbers shorter than four characters become [`MASK_PLACEHOLDER`].
pub fn mask_number(plain: &str) -> String {
    let chars: Vec<char> = plain.chars().collect();
    if chars.len() < 4 {
        return MASK_PLACEHOLDER.to_string();
    }
    let last4: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", MASK_PREFIX, last4)
}

fn pkcs7_pad(data: &[u8]) -> Vec<u8> {
    let pad = AES_BLOCK - data.len() % AES_BLOCK;
    let mut out = Vec::with_capacity(data.len() + pad);
    out.extend_from_slice(data);
    out.resize(data.len() + pad, pad as u8);
    out
}

fn pkcs7_unpad(mut data: Vec<u8>) -> Result<Vec<u8>> {
    let bad_padding = || Error::crypto("decryption failed (bad padding)");
    let pad = *data.last().ok_or_else(bad_padding)? as usize;
    if pad == 0 || pad > AES_BLOCK || pad > data.len() {
        return Err(bad_padding());
    }
    if !data[data.len() - pad..].iter().all(|&b| b as usize == pad) {
        return Err(bad_padding());
    }
    data.truncate(data.len() - pad);
    Ok(data)
}
