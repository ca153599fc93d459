// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn issue_verify_round_trip() {
    let keys = AuthKeys::from_secret("test-secret");
    let token = keys.issue("user", 3600).unwrap();
    assert!(keys.verify(&token).is_ok());
}

#[test]
fn token_without_expiry_verifies() {
    let keys = AuthKeys::from_secret("test-secret");
    let token = keys.issue("hq", 0).unwrap();
    assert!(keys.verify(&token).is_ok());
}

#[test]
fn tampered_signature_rejected() {
    let keys = AuthKeys::from_secret("test-secret");
    let token = keys.issue("user", 3600).unwrap();
    let mut tampered = token.clone();
    tampered.pop();
    tampered.push('A');
    assert!(keys.verify(&tampered).is_err());
}

#[test]
fn wrong_secret_rejected() {
    let signer = AuthKeys::from_secret("secret-a");
    let verifier = AuthKeys::from_secret("secret-b");
    let token = signer.issue("user", 3600).unwrap();
    assert!(verifier.verify(&token).is_err());
}

#[test]
fn tampered_claims_rejected() {
    let keys = AuthKeys::from_secret("test-secret");
    let token = keys.issue("user", 3600).unwrap();
    let parts: Vec<&str> = token.split('.').collect();
    let forged_claims = B64.encode(br#"{"sub":"admin","iat":0}"#);
    let forged = format!("{}.{}.{}", parts[0], forged_claims, parts[2]);
    assert!(keys.verify(&forged).is_err());
}

#[test]
fn structurally_invalid_tokens_rejected() {
    let keys = AuthKeys::from_secret("test-secret");
    assert!(keys.verify("").is_err());
    assert!(keys.verify("abc").is_err());
    assert!(keys.verify("a.b").is_err());
    assert!(keys.verify("a.b.c.d").is_err());
    assert!(keys.verify("!!!.###.$$$").is_err());
}

#[test]
fn disabled_auth_accepts_anything() {
    let keys = AuthKeys::disabled();
    assert!(!keys.enabled());
    assert!(keys.verify("whatever").is_ok());
    assert!(keys.issue("user", 10).is_none());
}

#[test]
fn extract_token_prefers_bearer_header() {
    let mut headers = HeaderMap::new();
    headers.insert("authorization", "Bearer tok-from-header".parse().unwrap());
    assert_eq!(
        extract_token(&headers, Some("token=tok-from-query")),
        Some("tok-from-header".to_owned())
    );
}

#[test]
fn extract_token_falls_back_to_query() {
    let headers = HeaderMap::new();
    assert_eq!(
        extract_token(&headers, Some("foo=bar&token=tok-from-query")),
        Some("tok-from-query".to_owned())
    );
    assert_eq!(extract_token(&headers, Some("foo=bar")), None);
    assert_eq!(extract_token(&headers, None), None);
}
