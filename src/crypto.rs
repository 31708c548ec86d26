/*!
 * WPS registration cryptography
 *
 * Implements the primitives of the Wi-Fi Simple Configuration exchange:
 * - Diffie-Hellman over the 1536-bit MODP group (RFC 3526 group 5)
 * - KDK and the session key derivation (AuthKey, KeyWrapKey, EMSK)
 * - PSK1/PSK2 and the E-Hash/R-Hash PIN half commitments
 * - Message authenticators
 * - Encrypted Settings (AES-128-CBC with a key wrap authenticator)
 *
 * References:
 * - Wi-Fi Simple Configuration Technical Specification v2.0
 * - RFC 3526 (MODP groups)
 */

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Block};
use hmac::{Hmac, Mac};
use num_bigint::BigUint;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{CryptoError, DecryptError, ParseError};
use crate::pin::{Half, PinCandidate};
use crate::target::MacAddr;
use crate::wsc::{AttrType, AttrWriter, Attributes, ATTR_HEADER_LEN};

type HmacSha256 = Hmac<Sha256>;

pub const PUBLIC_KEY_LEN: usize = 192;
pub const PRIVATE_KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 16;
pub const HASH_LEN: usize = 32;
pub const AUTHENTICATOR_LEN: usize = 8;
const AES_BLOCK: usize = 16;

const KDF_LABEL: &[u8] = b"Wi-Fi Easy and Secure Key Derivation";
const KDF_BITS: u32 = 640;

/// RFC 3526 1536-bit MODP prime, generator 2
const GROUP5_PRIME: [u8; PUBLIC_KEY_LEN] = [
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xC9, 0x0F, 0xDA, 0xA2,
    0x21, 0x68, 0xC2, 0x34, 0xC4, 0xC6, 0x62, 0x8B, 0x80, 0xDC, 0x1C, 0xD1,
    0x29, 0x02, 0x4E, 0x08, 0x8A, 0x67, 0xCC, 0x74, 0x02, 0x0B, 0xBE, 0xA6,
    0x3B, 0x13, 0x9B, 0x22, 0x51, 0x4A, 0x08, 0x79, 0x8E, 0x34, 0x04, 0xDD,
    0xEF, 0x95, 0x19, 0xB3, 0xCD, 0x3A, 0x43, 0x1B, 0x30, 0x2B, 0x0A, 0x6D,
    0xF2, 0x5F, 0x14, 0x37, 0x4F, 0xE1, 0x35, 0x6D, 0x6D, 0x51, 0xC2, 0x45,
    0xE4, 0x85, 0xB5, 0x76, 0x62, 0x5E, 0x7E, 0xC6, 0xF4, 0x4C, 0x42, 0xE9,
    0xA6, 0x37, 0xED, 0x6B, 0x0B, 0xFF, 0x5C, 0xB6, 0xF4, 0x06, 0xB7, 0xED,
    0xEE, 0x38, 0x6B, 0xFB, 0x5A, 0x89, 0x9F, 0xA5, 0xAE, 0x9F, 0x24, 0x11,
    0x7C, 0x4B, 0x1F, 0xE6, 0x49, 0x28, 0x66, 0x51, 0xEC, 0xE4, 0x5B, 0x3D,
    0xC2, 0x00, 0x7C, 0xB8, 0xA1, 0x63, 0xBF, 0x05, 0x98, 0xDA, 0x48, 0x36,
    0x1C, 0x55, 0xD3, 0x9A, 0x69, 0x16, 0x3F, 0xA8, 0xFD, 0x24, 0xCF, 0x5F,
    0x83, 0x65, 0x5D, 0x23, 0xDC, 0xA3, 0xAD, 0x96, 0x1C, 0x62, 0xF3, 0x56,
    0x20, 0x85, 0x52, 0xBB, 0x9E, 0xD5, 0x29, 0x07, 0x70, 0x96, 0x96, 0x6D,
    0x67, 0x0C, 0x35, 0x4E, 0x4A, 0xBC, 0x98, 0x04, 0xF1, 0x74, 0x6C, 0x08,
    0xCA, 0x23, 0x73, 0x27, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
];

#[inline]
fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> [u8; HASH_LEN] {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC can take key of any size");
    for part in parts {
        mac.update(part);
    }
    let mut out = [0u8; HASH_LEN];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// Fill an array from the OS randomness source
pub fn random_bytes<const N: usize>() -> Result<[u8; N], CryptoError> {
    let mut out = [0u8; N];
    OsRng
        .try_fill_bytes(&mut out)
        .map_err(|e| CryptoError::RandomnessUnavailable(e.to_string()))?;
    Ok(out)
}

fn to_fixed_be(value: &BigUint) -> [u8; PUBLIC_KEY_LEN] {
    let bytes = value.to_bytes_be();
    let mut out = [0u8; PUBLIC_KEY_LEN];
    // Values are reduced mod p, so they never exceed 192 bytes
    let start = PUBLIC_KEY_LEN.saturating_sub(bytes.len());
    out[start..].copy_from_slice(&bytes[bytes.len().saturating_sub(PUBLIC_KEY_LEN)..]);
    out
}

/// Diffie-Hellman key pair (short 256-bit private exponent)
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DhKeyPair {
    private: [u8; PRIVATE_KEY_LEN],
    public: [u8; PUBLIC_KEY_LEN],
}

impl DhKeyPair {
    /// Build the pair for a known private exponent
    pub fn from_private(private: [u8; PRIVATE_KEY_LEN]) -> Self {
        let p = BigUint::from_bytes_be(&GROUP5_PRIME);
        let x = BigUint::from_bytes_be(&private);
        let public = to_fixed_be(&BigUint::from(2u32).modpow(&x, &p));
        Self { private, public }
    }

    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.public
    }

    /// SHA-256 of the shared secret g^(ab) mod p
    fn dh_key(&self, peer_public: &[u8]) -> Result<Zeroizing<[u8; HASH_LEN]>, CryptoError> {
        let p = BigUint::from_bytes_be(&GROUP5_PRIME);
        let y = BigUint::from_bytes_be(peer_public);
        let one = BigUint::from(1u32);
        if peer_public.len() > PUBLIC_KEY_LEN || y <= one || y >= &p - &one {
            return Err(CryptoError::InvalidPublicKey);
        }

        let x = BigUint::from_bytes_be(&self.private);
        let mut shared = to_fixed_be(&y.modpow(&x, &p));
        let digest = Sha256::digest(&shared[..]);
        shared.zeroize();

        let mut out = Zeroizing::new([0u8; HASH_LEN]);
        out.copy_from_slice(&digest);
        Ok(out)
    }
}

impl std::fmt::Debug for DhKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhKeyPair")
            .field("public", &format_args!("{:02x?}..", &self.public[..4]))
            .finish_non_exhaustive()
    }
}

/// Fresh key pair from the OS randomness source
pub fn generate_keypair() -> Result<DhKeyPair, CryptoError> {
    let mut private = random_bytes::<PRIVATE_KEY_LEN>()?;
    let pair = DhKeyPair::from_private(private);
    private.zeroize();
    Ok(pair)
}

/// Enrollee and registrar nonces of one exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeNonces {
    pub enrollee: [u8; NONCE_LEN],
    pub registrar: [u8; NONCE_LEN],
}

/// Keys derived for one exchange and one PIN candidate
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    pub auth_key: [u8; 32],
    pub key_wrap_key: [u8; 16],
    pub emsk: [u8; 32],
    pub psk1: [u8; 16],
    pub psk2: [u8; 16],
}

impl SessionKeys {
    pub fn psk(&self, half: Half) -> &[u8; 16] {
        match half {
            Half::First => &self.psk1,
            Half::Second => &self.psk2,
        }
    }
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKeys { .. }")
    }
}

/// WSC KDF: HMAC-SHA256 in counter mode over `i || label || bits`
fn kdf(key: &[u8], label: &[u8], bits: u32) -> Zeroizing<Vec<u8>> {
    let len = (bits / 8) as usize;
    let mut out = Zeroizing::new(Vec::with_capacity(len + HASH_LEN));
    let mut i = 1u32;
    while out.len() < len {
        let block = hmac_sha256(key, &[&i.to_be_bytes(), label, &bits.to_be_bytes()]);
        out.extend_from_slice(&block);
        i += 1;
    }
    out.truncate(len);
    out
}

/// Derive the session keys and the PIN half PSKs.
///
/// Both sides of the exchange reach the same result from their own key pair
/// and the other side's public value.
pub fn derive_keys(
    own: &DhKeyPair,
    peer_public: &[u8],
    nonces: &ExchangeNonces,
    enrollee_mac: &MacAddr,
    pin: &PinCandidate,
) -> Result<SessionKeys, CryptoError> {
    let dh_key = own.dh_key(peer_public)?;
    let kdk = Zeroizing::new(hmac_sha256(
        &dh_key[..],
        &[&nonces.enrollee, enrollee_mac.octets(), &nonces.registrar],
    ));
    let material = kdf(&kdk[..], KDF_LABEL, KDF_BITS);

    let mut keys = SessionKeys {
        auth_key: [0u8; 32],
        key_wrap_key: [0u8; 16],
        emsk: [0u8; 32],
        psk1: [0u8; 16],
        psk2: [0u8; 16],
    };
    keys.auth_key.copy_from_slice(&material[..32]);
    keys.key_wrap_key.copy_from_slice(&material[32..48]);
    keys.emsk.copy_from_slice(&material[48..80]);

    let psk1 = hmac_sha256(&keys.auth_key, &[pin.first_digits().as_bytes()]);
    let psk2 = hmac_sha256(&keys.auth_key, &[pin.second_digits().as_bytes()]);
    keys.psk1.copy_from_slice(&psk1[..16]);
    keys.psk2.copy_from_slice(&psk2[..16]);

    Ok(keys)
}

/// Inputs shared by every hash commitment of an exchange
#[derive(Debug, Clone, Copy)]
pub struct ProofContext<'a> {
    pub keys: &'a SessionKeys,
    pub enrollee_public: &'a [u8],
    pub registrar_public: &'a [u8],
}

/// E-Hash/R-Hash commitment: HMAC(AuthKey, S || PSKx || PKE || PKR)
pub fn compute_hash(half: Half, secret_nonce: &[u8; NONCE_LEN], ctx: &ProofContext) -> [u8; HASH_LEN] {
    hmac_sha256(
        &ctx.keys.auth_key,
        &[
            secret_nonce,
            ctx.keys.psk(half),
            ctx.enrollee_public,
            ctx.registrar_public,
        ],
    )
}

/// Check a peer commitment against our PIN half (constant time)
pub fn verify_hash(
    expected: &[u8],
    half: Half,
    secret_nonce: &[u8; NONCE_LEN],
    ctx: &ProofContext,
) -> bool {
    let computed = compute_hash(half, secret_nonce, ctx);
    computed[..].ct_eq(expected).into()
}

/// First 8 bytes of HMAC(AuthKey, previous message || current message)
pub fn authenticator(auth_key: &[u8; 32], previous: &[u8], current: &[u8]) -> [u8; AUTHENTICATOR_LEN] {
    let mac = hmac_sha256(auth_key, &[previous, current]);
    let mut out = [0u8; AUTHENTICATOR_LEN];
    out.copy_from_slice(&mac[..AUTHENTICATOR_LEN]);
    out
}

/// Verify the trailing Authenticator attribute of `message`
pub fn verify_authenticator(auth_key: &[u8; 32], previous: &[u8], message: &[u8]) -> bool {
    match crate::wsc::split_authenticator(message) {
        Ok((covered, received)) => authenticator(auth_key, previous, covered)[..]
            .ct_eq(received)
            .into(),
        Err(_) => false,
    }
}

fn key_wrap_authenticator(auth_key: &[u8; 32], data: &[u8]) -> [u8; AUTHENTICATOR_LEN] {
    let mac = hmac_sha256(auth_key, &[data]);
    let mut out = [0u8; AUTHENTICATOR_LEN];
    out.copy_from_slice(&mac[..AUTHENTICATOR_LEN]);
    out
}

/// Build an Encrypted Settings value: IV || AES-128-CBC(KWK, attrs || KWA)
pub fn encrypt_settings(plain: &[u8], keys: &SessionKeys, iv: &[u8; AES_BLOCK]) -> Vec<u8> {
    let mut data = Zeroizing::new(Vec::with_capacity(plain.len() + 32));
    data.extend_from_slice(plain);
    let mut kwa = AttrWriter::new();
    kwa.put(
        AttrType::KEY_WRAP_AUTHENTICATOR,
        &key_wrap_authenticator(&keys.auth_key, plain),
    );
    data.extend_from_slice(kwa.as_bytes());

    // PKCS#7 padding, always at least one byte
    let pad = AES_BLOCK - data.len() % AES_BLOCK;
    data.extend(std::iter::repeat(pad as u8).take(pad));

    let cipher = Aes128::new(GenericArray::from_slice(&keys.key_wrap_key));
    let mut out = Vec::with_capacity(AES_BLOCK + data.len());
    out.extend_from_slice(iv);

    let mut prev: [u8; AES_BLOCK] = *iv;
    for chunk in data.chunks_exact(AES_BLOCK) {
        let mut block = Block::clone_from_slice(chunk);
        for (b, p) in block.iter_mut().zip(prev.iter()) {
            *b ^= p;
        }
        cipher.encrypt_block(&mut block);
        prev.copy_from_slice(&block);
        out.extend_from_slice(&block);
    }
    out
}

/// Verified plaintext of an Encrypted Settings attribute
pub struct Settings {
    plain: Zeroizing<Vec<u8>>,
}

/// Network credential delivered in M8
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub essid: String,
    pub psk: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("essid", &self.essid)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("len", &self.plain.len())
            .finish_non_exhaustive()
    }
}

impl Settings {
    pub fn attributes(&self) -> Attributes<'_> {
        // Validated when decrypted
        Attributes::parse(&self.plain).unwrap_or_default()
    }

    /// R-SNonce1/R-SNonce2 (or E-SNonce) carried in M4/M6 (M5/M7)
    pub fn secret_nonce(&self, attr: AttrType) -> Result<[u8; NONCE_LEN], ParseError> {
        self.attributes().require_fixed::<NONCE_LEN>(attr)
    }

    /// First credential of an M8 settings payload
    pub fn credential(&self) -> Result<Credential, ParseError> {
        let attrs = self.attributes();
        let inner = attrs.require(AttrType::CREDENTIAL)?;
        let cred = Attributes::parse(inner)?;
        let essid = String::from_utf8_lossy(cred.require(AttrType::SSID)?).into_owned();
        let psk = String::from_utf8_lossy(cred.get(AttrType::NETWORK_KEY).unwrap_or_default())
            .trim_end_matches('\0')
            .to_string();
        Ok(Credential { essid, psk })
    }
}

/// Decrypt and authenticate an Encrypted Settings value
pub fn decrypt_settings(blob: &[u8], keys: &SessionKeys) -> Result<Settings, DecryptError> {
    if blob.len() < 2 * AES_BLOCK {
        return Err(DecryptError::TooShort(blob.len()));
    }
    let (iv, ciphertext) = blob.split_at(AES_BLOCK);
    if ciphertext.len() % AES_BLOCK != 0 {
        return Err(DecryptError::BadLength(ciphertext.len()));
    }

    let cipher = Aes128::new(GenericArray::from_slice(&keys.key_wrap_key));
    let mut plain = Zeroizing::new(Vec::with_capacity(ciphertext.len()));
    let mut prev = iv;
    for chunk in ciphertext.chunks_exact(AES_BLOCK) {
        let mut block = Block::clone_from_slice(chunk);
        cipher.decrypt_block(&mut block);
        for (b, p) in block.iter_mut().zip(prev.iter()) {
            *b ^= p;
        }
        plain.extend_from_slice(&block);
        prev = chunk;
    }

    let pad = *plain.last().ok_or(DecryptError::BadPadding)? as usize;
    if pad == 0 || pad > AES_BLOCK || plain[plain.len() - pad..].iter().any(|&b| b as usize != pad) {
        return Err(DecryptError::BadPadding);
    }
    let unpadded_len = plain.len() - pad;
    plain.truncate(unpadded_len);

    let kwa_len = ATTR_HEADER_LEN + AUTHENTICATOR_LEN;
    if plain.len() < kwa_len {
        return Err(DecryptError::MissingAuthenticator);
    }
    let split = plain.len() - kwa_len;
    let tail = &plain[split..];
    if u16::from_be_bytes([tail[0], tail[1]]) != AttrType::KEY_WRAP_AUTHENTICATOR.0
        || u16::from_be_bytes([tail[2], tail[3]]) as usize != AUTHENTICATOR_LEN
    {
        return Err(DecryptError::MissingAuthenticator);
    }
    let expected = key_wrap_authenticator(&keys.auth_key, &plain[..split]);
    if !bool::from(expected[..].ct_eq(&tail[ATTR_HEADER_LEN..])) {
        return Err(DecryptError::AuthenticatorMismatch);
    }

    plain.truncate(split);
    Attributes::parse(&plain).map_err(|_| DecryptError::Malformed)?;
    Ok(Settings { plain })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(seed: u8) -> DhKeyPair {
        DhKeyPair::from_private([seed; PRIVATE_KEY_LEN])
    }

    fn nonces() -> ExchangeNonces {
        ExchangeNonces {
            enrollee: [0x11; NONCE_LEN],
            registrar: [0x22; NONCE_LEN],
        }
    }

    fn mac() -> MacAddr {
        "02:11:22:33:44:55".parse().unwrap()
    }

    #[test]
    fn test_both_sides_derive_same_keys() {
        let enrollee = pair(3);
        let registrar = pair(7);
        let pin = PinCandidate::new(1234, 567).unwrap();

        let a = derive_keys(&enrollee, registrar.public_key(), &nonces(), &mac(), &pin).unwrap();
        let b = derive_keys(&registrar, enrollee.public_key(), &nonces(), &mac(), &pin).unwrap();
        assert_eq!(a.auth_key, b.auth_key);
        assert_eq!(a.key_wrap_key, b.key_wrap_key);
        assert_eq!(a.emsk, b.emsk);
        assert_eq!(a.psk1, b.psk1);

        // Deterministic for identical inputs
        let again = derive_keys(&enrollee, registrar.public_key(), &nonces(), &mac(), &pin).unwrap();
        assert_eq!(a.auth_key, again.auth_key);
    }

    #[test]
    fn test_psk_depends_only_on_its_half() {
        let enrollee = pair(3);
        let registrar = pair(7);
        let right = PinCandidate::new(1234, 567).unwrap();
        let wrong_second = PinCandidate::new(1234, 568).unwrap();
        let wrong_first = PinCandidate::new(1235, 567).unwrap();

        let k = derive_keys(&enrollee, registrar.public_key(), &nonces(), &mac(), &right).unwrap();
        let k2 = derive_keys(&enrollee, registrar.public_key(), &nonces(), &mac(), &wrong_second).unwrap();
        let k1 = derive_keys(&enrollee, registrar.public_key(), &nonces(), &mac(), &wrong_first).unwrap();

        assert_eq!(k.psk1, k2.psk1);
        assert_ne!(k.psk2, k2.psk2);
        assert_ne!(k.psk1, k1.psk1);
    }

    #[test]
    fn test_hash_verification() {
        let enrollee = pair(3);
        let registrar = pair(7);
        let ap_pin = PinCandidate::new(1234, 567).unwrap();
        let guess = PinCandidate::new(1111, 567).unwrap();

        let ap_keys = derive_keys(&registrar, enrollee.public_key(), &nonces(), &mac(), &ap_pin).unwrap();
        let our_keys = derive_keys(&enrollee, registrar.public_key(), &nonces(), &mac(), &guess).unwrap();

        let ap_ctx = ProofContext {
            keys: &ap_keys,
            enrollee_public: enrollee.public_key(),
            registrar_public: registrar.public_key(),
        };
        let our_ctx = ProofContext {
            keys: &our_keys,
            ..ap_ctx
        };

        let s1 = [0x5A; NONCE_LEN];
        let r_hash1 = compute_hash(Half::First, &s1, &ap_ctx);
        let r_hash2 = compute_hash(Half::Second, &s1, &ap_ctx);

        assert!(!verify_hash(&r_hash1, Half::First, &s1, &our_ctx));
        assert!(verify_hash(&r_hash2, Half::Second, &s1, &our_ctx));
        assert!(!verify_hash(&r_hash1[..16], Half::First, &s1, &ap_ctx));
    }

    #[test]
    fn test_invalid_peer_public() {
        let own = pair(3);
        let pin = PinCandidate::new(0, 0).unwrap();
        let one = {
            let mut v = [0u8; PUBLIC_KEY_LEN];
            v[PUBLIC_KEY_LEN - 1] = 1;
            v
        };
        assert_eq!(
            derive_keys(&own, &one, &nonces(), &mac(), &pin).unwrap_err(),
            CryptoError::InvalidPublicKey
        );
        assert_eq!(
            derive_keys(&own, &GROUP5_PRIME, &nonces(), &mac(), &pin).unwrap_err(),
            CryptoError::InvalidPublicKey
        );
    }

    #[test]
    fn test_authenticator_chain() {
        let key = [9u8; 32];
        let previous = b"previous message";
        let mut w = AttrWriter::message(crate::wsc::MessageType::M3);
        w.put(AttrType::E_HASH1, &[1u8; 32]);
        let auth = authenticator(&key, previous, w.as_bytes());
        w.put(AttrType::AUTHENTICATOR, &auth);
        let message = w.finish();

        assert!(verify_authenticator(&key, previous, &message));
        assert!(!verify_authenticator(&key, b"other", &message));
        assert!(!verify_authenticator(&[8u8; 32], previous, &message));
    }

    #[test]
    fn test_settings_roundtrip_and_tamper() {
        let keys = derive_keys(
            &pair(3),
            pair(7).public_key(),
            &nonces(),
            &mac(),
            &PinCandidate::new(1234, 567).unwrap(),
        )
        .unwrap();

        let mut cred = AttrWriter::new();
        cred.put_u8(AttrType::NETWORK_INDEX, 1)
            .put(AttrType::SSID, b"TestNet")
            .put(AttrType::NETWORK_KEY, b"hunter2moresecret");
        let mut plain = AttrWriter::new();
        plain.put(AttrType::CREDENTIAL, cred.as_bytes());

        let blob = encrypt_settings(plain.as_bytes(), &keys, &[0xA5; 16]);
        assert_eq!(blob.len() % 16, 0);

        let settings = decrypt_settings(&blob, &keys).unwrap();
        let credential = settings.credential().unwrap();
        assert_eq!(credential.essid, "TestNet");
        assert_eq!(credential.psk, "hunter2moresecret");
        assert!(!format!("{:?}", settings).contains("hunter2"));
        assert!(!format!("{:?}", credential).contains("hunter2"));
        assert_eq!(hmac_sha256(b"", &[b"abc"]), hmac_sha256(&[], &[b"a", b"bc"]));

        // A flipped bit in the last block breaks the padding or the key wrap check
        let mut tampered = blob.clone();
        let idx = tampered.len() - 20;
        tampered[idx] ^= 0x01;
        assert!(decrypt_settings(&tampered, &keys).is_err());

        assert_eq!(
            decrypt_settings(&blob[..20], &keys).unwrap_err(),
            DecryptError::TooShort(20)
        );
        assert_eq!(
            decrypt_settings(&blob[..blob.len() - 1], &keys).unwrap_err(),
            DecryptError::BadLength(blob.len() - 17)
        );
    }

    #[test]
    fn test_secret_nonce_settings() {
        let keys = derive_keys(
            &pair(3),
            pair(7).public_key(),
            &nonces(),
            &mac(),
            &PinCandidate::new(1, 2).unwrap(),
        )
        .unwrap();
        let mut plain = AttrWriter::new();
        plain.put(AttrType::R_SNONCE1, &[0x33; NONCE_LEN]);
        let blob = encrypt_settings(plain.as_bytes(), &keys, &random_bytes::<16>().unwrap());
        let settings = decrypt_settings(&blob, &keys).unwrap();
        assert_eq!(
            settings.secret_nonce(AttrType::R_SNONCE1).unwrap(),
            [0x33; NONCE_LEN]
        );
        assert!(settings.secret_nonce(AttrType::R_SNONCE2).is_err());
    }
}
