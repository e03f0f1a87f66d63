use ed25519_dalek::{Signer, Verifier};

use crate::error::CoreError;
use crate::ids::{DeviceId, Signature};

pub struct DeviceIdentity {
    signing_key: ed25519_dalek::SigningKey,
}

impl DeviceIdentity {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            signing_key: ed25519_dalek::SigningKey::generate(&mut rng),
        }
    }

    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            signing_key: ed25519_dalek::SigningKey::from_bytes(bytes),
        }
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub fn device_id(&self) -> DeviceId {
        let verifying_key = self.signing_key.verifying_key();
        DeviceId::from_bytes(verifying_key.to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        let sig = self.signing_key.sign(message);
        Signature::from_bytes(sig.to_bytes())
    }
}

pub fn verify_signature(
    device_id: &DeviceId,
    message: &[u8],
    signature: &Signature,
) -> Result<(), CoreError> {
    let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(device_id.as_bytes())
        .map_err(|_| CoreError::InvalidSignature)?;
    let sig = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
    verifying_key
        .verify(message, &sig)
        .map_err(|_| CoreError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_roundtrip() {
        let identity = DeviceIdentity::generate();
        let message = b"hello world";
        let sig = identity.sign(message);
        assert!(verify_signature(&identity.device_id(), message, &sig).is_ok());
    }

    #[test]
    fn wrong_message_fails() {
        let identity = DeviceIdentity::generate();
        let sig = identity.sign(b"message A");
        assert!(verify_signature(&identity.device_id(), b"message B", &sig).is_err());
    }

    #[test]
    fn wrong_key_fails() {
        let identity_a = DeviceIdentity::generate();
        let identity_b = DeviceIdentity::generate();
        let message = b"test message";
        let sig = identity_a.sign(message);
        assert!(verify_signature(&identity_b.device_id(), message, &sig).is_err());
    }

    #[test]
    fn secret_bytes_roundtrip() {
        let identity = DeviceIdentity::generate();
        let bytes = identity.secret_bytes();
        let restored = DeviceIdentity::from_secret_bytes(&bytes);
        assert_eq!(identity.device_id(), restored.device_id());
    }
}
