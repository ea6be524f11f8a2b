//! 페이로드 암호화 — AES-256-GCM 기반 프레임 라인 봉인/개봉
//!
//! 에이전트는 `--encrypt` 옵션이 켜진 경우 각 페이로드 라인을 공유 키로
//! 봉인하고 헤더에 `encrypted = true`를 표시합니다. 컬렉터는 큐 적재 전에
//! 동일한 키로 개봉합니다. 키는 base64로 인코딩된 32바이트 값입니다.
//!
//! 봉인 형식: `nonce(12바이트) || ciphertext`

use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, KeyInit, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

/// AES-256-GCM nonce 길이 (바이트)
const NONCE_LEN: usize = 12;

/// 암호화 연산 에러
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// 키 디코딩 실패 또는 잘못된 키 길이
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// 봉인 실패
    #[error("seal failed")]
    SealFailed,

    /// 개봉 실패 (변조되었거나 키가 다름)
    #[error("open failed")]
    OpenFailed,
}

/// 공유 키 기반 페이로드 암호화기
pub struct PayloadCipher {
    cipher: Aes256Gcm,
}

impl PayloadCipher {
    /// base64로 인코딩된 32바이트 키에서 암호화기를 생성합니다.
    pub fn from_base64_key(key_b64: &str) -> Result<Self, CryptoError> {
        let key_bytes = STANDARD
            .decode(key_b64)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        if key_bytes.len() != 32 {
            return Err(CryptoError::InvalidKey(format!(
                "expected 32 bytes, got {}",
                key_bytes.len()
            )));
        }
        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// 평문 라인을 봉인합니다. 결과는 `nonce || ciphertext` 형식입니다.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::SealFailed)?;
        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// 봉인된 라인을 개봉합니다.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_LEN {
            return Err(CryptoError::OpenFailed);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::OpenFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 32바이트 제로 키 (테스트 전용)
    fn test_key() -> String {
        STANDARD.encode([0u8; 32])
    }

    #[test]
    fn seal_open_roundtrip() {
        let cipher = PayloadCipher::from_base64_key(&test_key()).unwrap();
        let line = br#"{"id_orig_h":"192.168.1.1"}"#;
        let sealed = cipher.seal(line).unwrap();
        assert_ne!(sealed, line.to_vec());
        let opened = cipher.open(&sealed).unwrap();
        assert_eq!(opened, line.to_vec());
    }

    #[test]
    fn distinct_nonces_per_seal() {
        let cipher = PayloadCipher::from_base64_key(&test_key()).unwrap();
        let a = cipher.seal(b"same line").unwrap();
        let b = cipher.seal(b"same line").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_ciphertext_rejected() {
        let cipher = PayloadCipher::from_base64_key(&test_key()).unwrap();
        let mut sealed = cipher.seal(b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(cipher.open(&sealed).is_err());
    }

    #[test]
    fn wrong_key_rejected() {
        let cipher = PayloadCipher::from_base64_key(&test_key()).unwrap();
        let other = PayloadCipher::from_base64_key(&STANDARD.encode([7u8; 32])).unwrap();
        let sealed = cipher.seal(b"payload").unwrap();
        assert!(other.open(&sealed).is_err());
    }

    #[test]
    fn invalid_key_length_rejected() {
        let short = STANDARD.encode([0u8; 16]);
        assert!(PayloadCipher::from_base64_key(&short).is_err());
    }

    #[test]
    fn invalid_base64_rejected() {
        assert!(PayloadCipher::from_base64_key("not base64!!!").is_err());
    }

    #[test]
    fn truncated_sealed_rejected() {
        let cipher = PayloadCipher::from_base64_key(&test_key()).unwrap();
        assert!(cipher.open(b"short").is_err());
    }
}
