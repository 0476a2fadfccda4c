// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Discovery and session service bodies, plus the identity tokens.

use super::header::{RequestHeader, ResponseHeader};
use crate::codec::{
    BinaryDecode, BinaryEncode, DiagnosticInfo, ExtensionObject, LocalizedText, UaReader, UaWriter,
};
use crate::error::UaResult;
use crate::types::{MessageSecurityMode, NodeId, StatusCode, UserTokenKind};

/// Binary encoding id of `AnonymousIdentityToken`.
pub const ANONYMOUS_IDENTITY_TOKEN_ID: u32 = 321;

/// Binary encoding id of `UserNameIdentityToken`.
pub const USER_NAME_IDENTITY_TOKEN_ID: u32 = 324;

/// `ApplicationType::Client`.
pub const APPLICATION_TYPE_CLIENT: u32 = 1;

// =============================================================================
// Descriptions
// =============================================================================

/// Describes a client or server application.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplicationDescription {
    pub application_uri: String,
    pub product_uri: String,
    pub application_name: LocalizedText,
    pub application_type: u32,
    pub gateway_server_uri: Option<String>,
    pub discovery_profile_uri: Option<String>,
    pub discovery_urls: Vec<String>,
}

impl BinaryEncode for ApplicationDescription {
    fn encode(&self, w: &mut UaWriter) {
        w.write_string(&self.application_uri);
        w.write_string(&self.product_uri);
        self.application_name.encode(w);
        w.write_u32(self.application_type);
        w.write_opt_string(self.gateway_server_uri.as_deref());
        w.write_opt_string(self.discovery_profile_uri.as_deref());
        w.write_string_array(&self.discovery_urls);
    }
}

impl BinaryDecode for ApplicationDescription {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            application_uri: r.read_string()?,
            product_uri: r.read_string()?,
            application_name: LocalizedText::decode(r)?,
            application_type: r.read_u32()?,
            gateway_server_uri: r.read_opt_string()?,
            discovery_profile_uri: r.read_opt_string()?,
            discovery_urls: r.read_string_array()?,
        })
    }
}

/// An identity token type accepted by an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserTokenPolicy {
    pub policy_id: String,
    pub token_type: u32,
    pub issued_token_type: Option<String>,
    pub issuer_endpoint_url: Option<String>,
    pub security_policy_uri: Option<String>,
}

impl UserTokenPolicy {
    /// A policy of `kind` with the given id.
    pub fn new(policy_id: impl Into<String>, kind: UserTokenKind) -> Self {
        Self {
            policy_id: policy_id.into(),
            token_type: kind.value(),
            issued_token_type: None,
            issuer_endpoint_url: None,
            security_policy_uri: None,
        }
    }

    /// Decoded token type.
    pub fn kind(&self) -> Option<UserTokenKind> {
        UserTokenKind::from_value(self.token_type)
    }
}

impl BinaryEncode for UserTokenPolicy {
    fn encode(&self, w: &mut UaWriter) {
        w.write_string(&self.policy_id);
        w.write_u32(self.token_type);
        w.write_opt_string(self.issued_token_type.as_deref());
        w.write_opt_string(self.issuer_endpoint_url.as_deref());
        w.write_opt_string(self.security_policy_uri.as_deref());
    }
}

impl BinaryDecode for UserTokenPolicy {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            policy_id: r.read_string()?,
            token_type: r.read_u32()?,
            issued_token_type: r.read_opt_string()?,
            issuer_endpoint_url: r.read_opt_string()?,
            security_policy_uri: r.read_opt_string()?,
        })
    }
}

/// A server endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescription {
    pub endpoint_url: String,
    pub server: ApplicationDescription,
    pub server_certificate: Option<Vec<u8>>,
    pub security_mode: MessageSecurityMode,
    pub security_policy_uri: String,
    pub user_identity_tokens: Vec<UserTokenPolicy>,
    pub transport_profile_uri: String,
    pub security_level: u8,
}

impl BinaryEncode for EndpointDescription {
    fn encode(&self, w: &mut UaWriter) {
        w.write_string(&self.endpoint_url);
        self.server.encode(w);
        w.write_byte_string(self.server_certificate.as_deref());
        w.write_u32(self.security_mode.value());
        w.write_string(&self.security_policy_uri);
        w.write_array(&self.user_identity_tokens);
        w.write_string(&self.transport_profile_uri);
        w.write_u8(self.security_level);
    }
}

impl BinaryDecode for EndpointDescription {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            endpoint_url: r.read_string()?,
            server: ApplicationDescription::decode(r)?,
            server_certificate: r.read_byte_string()?,
            security_mode: MessageSecurityMode::from_value(r.read_u32()?),
            security_policy_uri: r.read_string()?,
            user_identity_tokens: r.read_array()?,
            transport_profile_uri: r.read_string()?,
            security_level: r.read_u8()?,
        })
    }
}

// =============================================================================
// GetEndpoints
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct GetEndpointsRequest {
    pub request_header: RequestHeader,
    pub endpoint_url: String,
    pub locale_ids: Vec<String>,
    pub profile_uris: Vec<String>,
}

impl BinaryEncode for GetEndpointsRequest {
    fn encode(&self, w: &mut UaWriter) {
        self.request_header.encode(w);
        w.write_string(&self.endpoint_url);
        w.write_string_array(&self.locale_ids);
        w.write_string_array(&self.profile_uris);
    }
}

impl BinaryDecode for GetEndpointsRequest {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            request_header: RequestHeader::decode(r)?,
            endpoint_url: r.read_string()?,
            locale_ids: r.read_string_array()?,
            profile_uris: r.read_string_array()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetEndpointsResponse {
    pub response_header: ResponseHeader,
    pub endpoints: Vec<EndpointDescription>,
}

impl BinaryEncode for GetEndpointsResponse {
    fn encode(&self, w: &mut UaWriter) {
        self.response_header.encode(w);
        w.write_array(&self.endpoints);
    }
}

impl BinaryDecode for GetEndpointsResponse {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            response_header: ResponseHeader::decode(r)?,
            endpoints: r.read_array()?,
        })
    }
}

// =============================================================================
// Signatures
// =============================================================================

/// Algorithm URI plus signature bytes. Both null without message security.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureData {
    pub algorithm: Option<String>,
    pub signature: Option<Vec<u8>>,
}

impl BinaryEncode for SignatureData {
    fn encode(&self, w: &mut UaWriter) {
        w.write_opt_string(self.algorithm.as_deref());
        w.write_byte_string(self.signature.as_deref());
    }
}

impl BinaryDecode for SignatureData {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            algorithm: r.read_opt_string()?,
            signature: r.read_byte_string()?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignedSoftwareCertificate {
    pub certificate_data: Option<Vec<u8>>,
    pub signature: Option<Vec<u8>>,
}

impl BinaryEncode for SignedSoftwareCertificate {
    fn encode(&self, w: &mut UaWriter) {
        w.write_byte_string(self.certificate_data.as_deref());
        w.write_byte_string(self.signature.as_deref());
    }
}

impl BinaryDecode for SignedSoftwareCertificate {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            certificate_data: r.read_byte_string()?,
            signature: r.read_byte_string()?,
        })
    }
}

// =============================================================================
// CreateSession
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct CreateSessionRequest {
    pub request_header: RequestHeader,
    pub client_description: ApplicationDescription,
    pub server_uri: Option<String>,
    pub endpoint_url: String,
    pub session_name: String,
    pub client_nonce: Option<Vec<u8>>,
    pub client_certificate: Option<Vec<u8>>,
    pub requested_session_timeout: f64,
    pub max_response_message_size: u32,
}

impl BinaryEncode for CreateSessionRequest {
    fn encode(&self, w: &mut UaWriter) {
        self.request_header.encode(w);
        self.client_description.encode(w);
        w.write_opt_string(self.server_uri.as_deref());
        w.write_string(&self.endpoint_url);
        w.write_string(&self.session_name);
        w.write_byte_string(self.client_nonce.as_deref());
        w.write_byte_string(self.client_certificate.as_deref());
        w.write_f64(self.requested_session_timeout);
        w.write_u32(self.max_response_message_size);
    }
}

impl BinaryDecode for CreateSessionRequest {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            request_header: RequestHeader::decode(r)?,
            client_description: ApplicationDescription::decode(r)?,
            server_uri: r.read_opt_string()?,
            endpoint_url: r.read_string()?,
            session_name: r.read_string()?,
            client_nonce: r.read_byte_string()?,
            client_certificate: r.read_byte_string()?,
            requested_session_timeout: r.read_f64()?,
            max_response_message_size: r.read_u32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateSessionResponse {
    pub response_header: ResponseHeader,
    pub session_id: NodeId,
    pub authentication_token: NodeId,
    pub revised_session_timeout: f64,
    pub server_nonce: Option<Vec<u8>>,
    pub server_certificate: Option<Vec<u8>>,
    pub server_endpoints: Vec<EndpointDescription>,
    pub server_software_certificates: Vec<SignedSoftwareCertificate>,
    pub server_signature: SignatureData,
    pub max_request_message_size: u32,
}

impl BinaryEncode for CreateSessionResponse {
    fn encode(&self, w: &mut UaWriter) {
        self.response_header.encode(w);
        self.session_id.encode(w);
        self.authentication_token.encode(w);
        w.write_f64(self.revised_session_timeout);
        w.write_byte_string(self.server_nonce.as_deref());
        w.write_byte_string(self.server_certificate.as_deref());
        w.write_array(&self.server_endpoints);
        w.write_array(&self.server_software_certificates);
        self.server_signature.encode(w);
        w.write_u32(self.max_request_message_size);
    }
}

impl BinaryDecode for CreateSessionResponse {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            response_header: ResponseHeader::decode(r)?,
            session_id: NodeId::decode(r)?,
            authentication_token: NodeId::decode(r)?,
            revised_session_timeout: r.read_f64()?,
            server_nonce: r.read_byte_string()?,
            server_certificate: r.read_byte_string()?,
            server_endpoints: r.read_array()?,
            server_software_certificates: r.read_array()?,
            server_signature: SignatureData::decode(r)?,
            max_request_message_size: r.read_u32()?,
        })
    }
}

// =============================================================================
// ActivateSession
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ActivateSessionRequest {
    pub request_header: RequestHeader,
    pub client_signature: SignatureData,
    pub client_software_certificates: Vec<SignedSoftwareCertificate>,
    pub locale_ids: Vec<String>,
    pub user_identity_token: ExtensionObject,
    pub user_token_signature: SignatureData,
}

impl BinaryEncode for ActivateSessionRequest {
    fn encode(&self, w: &mut UaWriter) {
        self.request_header.encode(w);
        self.client_signature.encode(w);
        w.write_array(&self.client_software_certificates);
        w.write_string_array(&self.locale_ids);
        self.user_identity_token.encode(w);
        self.user_token_signature.encode(w);
    }
}

impl BinaryDecode for ActivateSessionRequest {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            request_header: RequestHeader::decode(r)?,
            client_signature: SignatureData::decode(r)?,
            client_software_certificates: r.read_array()?,
            locale_ids: r.read_string_array()?,
            user_identity_token: ExtensionObject::decode(r)?,
            user_token_signature: SignatureData::decode(r)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivateSessionResponse {
    pub response_header: ResponseHeader,
    pub server_nonce: Option<Vec<u8>>,
    pub results: Vec<StatusCode>,
    pub diagnostic_infos: Vec<DiagnosticInfo>,
}

impl BinaryEncode for ActivateSessionResponse {
    fn encode(&self, w: &mut UaWriter) {
        self.response_header.encode(w);
        w.write_byte_string(self.server_nonce.as_deref());
        w.write_array(&self.results);
        w.write_array(&self.diagnostic_infos);
    }
}

impl BinaryDecode for ActivateSessionResponse {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            response_header: ResponseHeader::decode(r)?,
            server_nonce: r.read_byte_string()?,
            results: r.read_array()?,
            diagnostic_infos: r.read_array()?,
        })
    }
}

// =============================================================================
// Identity Tokens
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnonymousIdentityToken {
    pub policy_id: String,
}

impl BinaryEncode for AnonymousIdentityToken {
    fn encode(&self, w: &mut UaWriter) {
        w.write_string(&self.policy_id);
    }
}

impl BinaryDecode for AnonymousIdentityToken {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            policy_id: r.read_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserNameIdentityToken {
    pub policy_id: String,
    pub user_name: String,
    pub password: Option<Vec<u8>>,
    pub encryption_algorithm: Option<String>,
}

impl BinaryEncode for UserNameIdentityToken {
    fn encode(&self, w: &mut UaWriter) {
        w.write_string(&self.policy_id);
        w.write_string(&self.user_name);
        w.write_byte_string(self.password.as_deref());
        w.write_opt_string(self.encryption_algorithm.as_deref());
    }
}

impl BinaryDecode for UserNameIdentityToken {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            policy_id: r.read_string()?,
            user_name: r.read_string()?,
            password: r.read_byte_string()?,
            encryption_algorithm: r.read_opt_string()?,
        })
    }
}

// =============================================================================
// CloseSession
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct CloseSessionRequest {
    pub request_header: RequestHeader,
    pub delete_subscriptions: bool,
}

impl BinaryEncode for CloseSessionRequest {
    fn encode(&self, w: &mut UaWriter) {
        self.request_header.encode(w);
        w.write_bool(self.delete_subscriptions);
    }
}

impl BinaryDecode for CloseSessionRequest {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            request_header: RequestHeader::decode(r)?,
            delete_subscriptions: r.read_bool()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CloseSessionResponse {
    pub response_header: ResponseHeader,
}

impl BinaryEncode for CloseSessionResponse {
    fn encode(&self, w: &mut UaWriter) {
        self.response_header.encode(w);
    }
}

impl BinaryDecode for CloseSessionResponse {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            response_header: ResponseHeader::decode(r)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_from_slice, encode_to_vec};

    #[test]
    fn test_endpoint_with_policies_decodes() {
        let endpoint = EndpointDescription {
            endpoint_url: "opc.tcp://plc:4840".into(),
            server: ApplicationDescription {
                application_uri: "urn:plc".into(),
                application_name: LocalizedText::new("PLC"),
                application_type: 0,
                ..Default::default()
            },
            server_certificate: Some(vec![0x30, 0x82]),
            security_mode: MessageSecurityMode::None,
            security_policy_uri: "http://opcfoundation.org/UA/SecurityPolicy#None".into(),
            user_identity_tokens: vec![
                UserTokenPolicy::new("anonymous", UserTokenKind::Anonymous),
                UserTokenPolicy::new("username", UserTokenKind::UserName),
            ],
            transport_profile_uri: String::new(),
            security_level: 0,
        };
        let decoded: EndpointDescription = decode_from_slice(&encode_to_vec(&endpoint)).unwrap();
        assert_eq!(decoded, endpoint);
        assert_eq!(decoded.user_identity_tokens[1].kind(), Some(UserTokenKind::UserName));
    }

    #[test]
    fn test_identity_token_wrapping() {
        let token = UserNameIdentityToken {
            policy_id: "username".into(),
            user_name: "op".into(),
            password: Some(vec![9; 4]),
            encryption_algorithm: Some("http://www.w3.org/2001/04/xmlenc#rsa-oaep".into()),
        };
        let obj = ExtensionObject::from_encodable(USER_NAME_IDENTITY_TOKEN_ID, &token);
        assert_eq!(obj.decode_as::<UserNameIdentityToken>(324).unwrap(), token);
    }
}
