// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Session establishment helpers.
//!
//! Identity policy selection, identity token construction, session naming
//! and nonce generation. Everything here is synchronous and side-effect free
//! apart from the random number generator.

use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};
use tracing::{debug, warn};

use crate::codec::ExtensionObject;
use crate::config::UaConfig;
use crate::error::{SecurityError, UaResult};
use crate::messages::session::{ANONYMOUS_IDENTITY_TOKEN_ID, USER_NAME_IDENTITY_TOKEN_ID};
use crate::messages::{AnonymousIdentityToken, EndpointDescription, UserNameIdentityToken};
use crate::security::{password_plaintext, SecurityProvider, PASSWORD_ENCRYPTION_ALGORITHM};
use crate::types::{SecurityPolicy, UserTokenKind};

/// Length of client nonces.
pub const NONCE_LENGTH: usize = 40;

/// Policy id used when the server advertises no anonymous policy.
pub const ANONYMOUS_POLICY_ID: &str = "anonymous";

/// Policy id used when the server advertises no user name policy.
pub const USERNAME_POLICY_ID: &str = "username";

/// Length of the random suffix in session names.
const SESSION_NAME_SUFFIX_LENGTH: usize = 20;

/// A fresh random nonce.
pub fn generate_nonce() -> Vec<u8> {
    let mut nonce = vec![0u8; NONCE_LENGTH];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// `UaSession:<application name>:<20 random alphanumerics>`.
pub fn session_name(application_name: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_NAME_SUFFIX_LENGTH)
        .map(char::from)
        .collect();
    format!("UaSession:{}:{}", application_name, suffix)
}

// =============================================================================
// Identity Selection
// =============================================================================

/// The identity the client will present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentitySelection {
    /// Token kind.
    pub kind: UserTokenKind,
    /// Policy id advertised by the server.
    pub policy_id: String,
}

/// Picks the identity policy matching the configured credentials.
///
/// Anonymous is wanted without a username, UserName otherwise. Endpoints
/// whose URL equals the configured endpoint are preferred, then any
/// advertised endpoint. Without any advertised policy of the wanted kind the
/// literal `anonymous` or `username` policy id is used.
pub fn select_identity(endpoints: &[EndpointDescription], config: &UaConfig) -> IdentitySelection {
    let wanted = if config.username.is_some() {
        UserTokenKind::UserName
    } else {
        UserTokenKind::Anonymous
    };
    let policy_of = |endpoint: &EndpointDescription| {
        endpoint
            .user_identity_tokens
            .iter()
            .find(|policy| policy.kind() == Some(wanted))
            .map(|policy| policy.policy_id.clone())
    };

    let exact = endpoints
        .iter()
        .filter(|e| e.endpoint_url == config.endpoint)
        .find_map(policy_of);
    let policy_id = match exact {
        Some(policy_id) => policy_id,
        None => match endpoints.iter().find_map(policy_of) {
            Some(policy_id) => {
                warn!(
                    endpoint = %config.endpoint,
                    policy_id = %policy_id,
                    "No advertised endpoint matches the configured URL, using another endpoint's policy"
                );
                policy_id
            }
            None => {
                let literal = match wanted {
                    UserTokenKind::UserName => USERNAME_POLICY_ID,
                    _ => ANONYMOUS_POLICY_ID,
                };
                warn!(
                    endpoint = %config.endpoint,
                    advertised = endpoints.len(),
                    policy_id = literal,
                    "No identity policy advertised, using the default policy id"
                );
                literal.to_string()
            }
        },
    };

    debug!(policy_id = %policy_id, kind = ?wanted, "Identity policy selected");
    IdentitySelection {
        kind: wanted,
        policy_id,
    }
}

/// Builds the identity token for ActivateSession.
///
/// Anonymous tokens carry only the policy id. Under the `None` policy a
/// UserName token carries the plain password bytes with no encryption
/// algorithm. Otherwise it carries the password secret encrypted with the
/// server certificate.
pub fn identity_token(
    selection: &IdentitySelection,
    config: &UaConfig,
    server_nonce: &[u8],
    server_certificate: Option<&[u8]>,
    security: &dyn SecurityProvider,
) -> UaResult<ExtensionObject> {
    match selection.kind {
        UserTokenKind::UserName => {
            let user_name = config.username.clone().unwrap_or_default();
            let password = config.password.as_deref().unwrap_or_default();
            if security.policy() == SecurityPolicy::None {
                return Ok(ExtensionObject::from_encodable(
                    USER_NAME_IDENTITY_TOKEN_ID,
                    &UserNameIdentityToken {
                        policy_id: selection.policy_id.clone(),
                        user_name,
                        password: Some(password.as_bytes().to_vec()),
                        encryption_algorithm: None,
                    },
                ));
            }
            let certificate = server_certificate.ok_or(SecurityError::MissingServerCertificate)?;
            let secret = password_plaintext(password, server_nonce);
            let encrypted = security.encrypt_password(certificate, &secret)?;
            Ok(ExtensionObject::from_encodable(
                USER_NAME_IDENTITY_TOKEN_ID,
                &UserNameIdentityToken {
                    policy_id: selection.policy_id.clone(),
                    user_name,
                    password: Some(encrypted),
                    encryption_algorithm: Some(PASSWORD_ENCRYPTION_ALGORITHM.to_string()),
                },
            ))
        }
        _ => Ok(ExtensionObject::from_encodable(
            ANONYMOUS_IDENTITY_TOKEN_ID,
            &AnonymousIdentityToken {
                policy_id: selection.policy_id.clone(),
            },
        )),
    }
}
