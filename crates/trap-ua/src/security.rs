// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Security provider abstraction.
//!
//! Certificate handling and the cryptographic primitives (RSA-OAEP,
//! SHA-1) live outside this crate. The connection talks to them through
//! [`SecurityProvider`]:
//!
//! ```text
//! outbound service body ──► encode_outbound ──► SecureFrame.body
//! SecureFrame.body      ──► decode_inbound  ──► inbound service body
//! ```
//!
//! The envelope is only applied once the channel is marked encrypted, so the
//! session and subscription code always handles plaintext service objects.
//! [`NoSecurity`] implements the `None` policy.

use std::fmt;
use std::sync::Arc;

use crate::error::{SecurityError, UaResult};
use crate::messages::MessageType;
use crate::types::SecurityPolicy;

/// Algorithm URI sent with encrypted user name passwords.
pub const PASSWORD_ENCRYPTION_ALGORITHM: &str = "http://www.w3.org/2001/04/xmlenc#rsa-oaep";

// =============================================================================
// SecurityProvider
// =============================================================================

/// Cryptographic collaborator of a connection.
///
/// Implementations must be cheap to call from several tasks at once; the
/// connection holds a single `Arc<dyn SecurityProvider>`.
pub trait SecurityProvider: Send + Sync + fmt::Debug {
    /// Security policy this provider implements.
    fn policy(&self) -> SecurityPolicy;

    /// DER-encoded client certificate, sent in CreateSession and the OPN header.
    fn client_certificate(&self) -> Option<Vec<u8>> {
        None
    }

    /// Signs and encrypts an outbound service body.
    fn encode_outbound(&self, message_type: MessageType, body: &[u8]) -> UaResult<Vec<u8>>;

    /// Verifies and decrypts an inbound service body.
    fn decode_inbound(&self, message_type: MessageType, body: &[u8]) -> UaResult<Vec<u8>>;

    /// Encrypts a user name token secret with the server's public key (RSA-OAEP).
    fn encrypt_password(&self, server_certificate: &[u8], plaintext: &[u8]) -> UaResult<Vec<u8>>;

    /// SHA-1 thumbprint of a certificate. `None` if the provider cannot digest.
    fn thumbprint(&self, certificate: &[u8]) -> Option<Vec<u8>>;
}

/// Shared provider handle.
pub type SharedSecurity = Arc<dyn SecurityProvider>;

// =============================================================================
// NoSecurity
// =============================================================================

/// The `None` security policy.
///
/// The envelope passes bodies through unchanged. Password encryption is
/// refused; user name identities under this policy send the password
/// unencrypted instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSecurity;

impl SecurityProvider for NoSecurity {
    fn policy(&self) -> SecurityPolicy {
        SecurityPolicy::None
    }

    fn encode_outbound(&self, _message_type: MessageType, body: &[u8]) -> UaResult<Vec<u8>> {
        Ok(body.to_vec())
    }

    fn decode_inbound(&self, _message_type: MessageType, body: &[u8]) -> UaResult<Vec<u8>> {
        Ok(body.to_vec())
    }

    fn encrypt_password(&self, _server_certificate: &[u8], _plaintext: &[u8]) -> UaResult<Vec<u8>> {
        Err(SecurityError::PasswordEncryptionUnavailable {
            policy: self.policy().name().to_string(),
        }
        .into())
    }

    fn thumbprint(&self, _certificate: &[u8]) -> Option<Vec<u8>> {
        None
    }
}

/// Builds the user name token secret: `u32_le(len) || password || server_nonce`.
///
/// The length prefix counts the password and nonce bytes together.
pub fn password_plaintext(password: &str, server_nonce: &[u8]) -> Vec<u8> {
    let secret_len = password.len() + server_nonce.len();
    let mut out = Vec::with_capacity(4 + secret_len);
    out.extend_from_slice(&(secret_len as u32).to_le_bytes());
    out.extend_from_slice(password.as_bytes());
    out.extend_from_slice(server_nonce);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UaError;

    #[test]
    fn test_no_security_is_identity() {
        let provider = NoSecurity;
        let body = vec![1, 2, 3, 4];
        assert_eq!(provider.encode_outbound(MessageType::Message, &body).unwrap(), body);
        assert_eq!(provider.decode_inbound(MessageType::Message, &body).unwrap(), body);
        assert_eq!(provider.policy(), SecurityPolicy::None);
        assert!(provider.thumbprint(&body).is_none());
    }

    #[test]
    fn test_no_security_refuses_passwords() {
        let err = NoSecurity.encrypt_password(b"cert", b"secret").unwrap_err();
        assert!(matches!(
            err,
            UaError::Security(SecurityError::PasswordEncryptionUnavailable { .. })
        ));
    }

    #[test]
    fn test_password_plaintext_layout() {
        let plain = password_plaintext("pw", &[0xAA, 0xBB, 0xCC]);
        assert_eq!(&plain[..4], &5u32.to_le_bytes());
        assert_eq!(&plain[4..6], b"pw");
        assert_eq!(&plain[6..], &[0xAA, 0xBB, 0xCC]);
    }
}
