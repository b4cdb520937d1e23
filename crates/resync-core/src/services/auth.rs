//! Authentication service and its cache keys.

use super::base::Endpoint;
use crate::error::Result;
use crate::keys::{CacheKey, KeyFamily, KeyPrefix};
use crate::models::{
    AccessToken, AuthResponse, ChangePassword, LoginCredentials, MagicLinkRequest,
    MessageResponse, RegisterCredentials, ResetPassword, UpdateProfile, User,
};
use crate::network::Transport;
use serde_json::json;
use std::sync::Arc;

/// Cache keys for the `auth` collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthKeys {
    family: KeyFamily,
}

pub const AUTH_KEYS: AuthKeys = AuthKeys {
    family: KeyFamily::new("auth"),
};

impl AuthKeys {
    pub fn all(&self) -> CacheKey {
        self.family.all()
    }

    pub fn everything(&self) -> KeyPrefix {
        self.family.everything()
    }

    pub fn profile(&self) -> CacheKey {
        self.family.custom("profile", None)
    }

    pub fn session(&self) -> CacheKey {
        self.family.custom("session", None)
    }
}

/// Typed access to `/auth`.
#[derive(Clone)]
pub struct AuthService {
    endpoint: Endpoint,
}

impl AuthService {
    pub const BASE_PATH: &'static str = "/auth";

    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            endpoint: Endpoint::new(transport, Self::BASE_PATH),
        }
    }

    pub async fn login(&self, credentials: &LoginCredentials) -> Result<AuthResponse> {
        self.endpoint
            .post("/login", Some(serde_json::to_value(credentials)?))
            .await
    }

    pub async fn register(&self, credentials: &RegisterCredentials) -> Result<AuthResponse> {
        self.endpoint
            .post("/register", Some(serde_json::to_value(credentials)?))
            .await
    }

    pub async fn send_magic_link(&self, request: &MagicLinkRequest) -> Result<MessageResponse> {
        self.endpoint
            .post("/magic-link", Some(serde_json::to_value(request)?))
            .await
    }

    pub async fn verify_magic_link(&self, token: &str) -> Result<AuthResponse> {
        self.endpoint
            .post("/verify-magic-link", Some(json!({ "token": token })))
            .await
    }

    pub async fn refresh_token(&self, refresh_token: &str) -> Result<AccessToken> {
        self.endpoint
            .post("/refresh", Some(json!({ "refreshToken": refresh_token })))
            .await
    }

    pub async fn logout(&self) -> Result<MessageResponse> {
        self.endpoint.post("/logout", None).await
    }

    pub async fn profile(&self) -> Result<User> {
        self.endpoint.get("/profile", Vec::new()).await
    }

    pub async fn update_profile(&self, updates: &UpdateProfile) -> Result<User> {
        self.endpoint
            .patch("/profile", Some(serde_json::to_value(updates)?))
            .await
    }

    pub async fn change_password(&self, request: &ChangePassword) -> Result<MessageResponse> {
        self.endpoint
            .post("/change-password", Some(serde_json::to_value(request)?))
            .await
    }

    pub async fn request_password_reset(&self, email: &str) -> Result<MessageResponse> {
        self.endpoint
            .post("/request-password-reset", Some(json!({ "email": email })))
            .await
    }

    pub async fn reset_password(&self, request: &ResetPassword) -> Result<MessageResponse> {
        self.endpoint
            .post("/reset-password", Some(serde_json::to_value(request)?))
            .await
    }

    pub async fn verify_email(&self, token: &str) -> Result<MessageResponse> {
        self.endpoint
            .post("/verify-email", Some(json!({ "token": token })))
            .await
    }

    pub async fn resend_verification(&self) -> Result<MessageResponse> {
        self.endpoint.post("/resend-verification", None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Method;
    use crate::testing::MockTransport;

    #[tokio::test]
    async fn test_login_unwraps_envelope() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(
            Method::Post,
            "/auth/login",
            json!({
                "success": true,
                "data": {
                    "user": {"id": "u1", "email": "a@b.c", "name": "A"},
                    "accessToken": "t1",
                    "refreshToken": "r1"
                }
            }),
        );
        let service = AuthService::new(transport.clone());

        let response = service
            .login(&LoginCredentials {
                email: "a@b.c".into(),
                password: "pw".into(),
                remember_me: false,
            })
            .await
            .unwrap();

        assert_eq!(response.access_token, "t1");
        assert_eq!(response.user.id, "u1");
        assert_eq!(
            transport.requests()[0].body,
            Some(json!({"email": "a@b.c", "password": "pw"}))
        );
    }

    #[tokio::test]
    async fn test_token_verbs_send_token_body() {
        let transport = Arc::new(MockTransport::new());
        transport
            .respond(Method::Post, "/auth/verify-email", json!({"message": "verified"}))
            .respond(Method::Post, "/auth/refresh", json!({"success": true, "data": {"accessToken": "t2"}}));
        let service = AuthService::new(transport.clone());

        assert_eq!(service.verify_email("abc").await.unwrap().message, "verified");
        assert_eq!(service.refresh_token("r1").await.unwrap().access_token, "t2");

        let requests = transport.requests();
        assert_eq!(requests[0].body, Some(json!({"token": "abc"})));
        assert_eq!(requests[1].body, Some(json!({"refreshToken": "r1"})));
    }

    #[test]
    fn test_keys() {
        assert_eq!(AUTH_KEYS.profile().as_str(), r#"["auth","profile"]"#);
        assert!(AUTH_KEYS.everything().matches(&AUTH_KEYS.session()));
    }
}
