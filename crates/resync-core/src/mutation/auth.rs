//! Session mutations. Successful sign-ins persist tokens and seed the profile key.

use super::coordinator::{Invalidation, Mutation};
use crate::error::{ResyncError, Result};
use crate::models::{AuthResponse, LoginCredentials, RegisterCredentials, UpdateProfile};
use crate::network::{RetryPolicy, TokenStore, Tokens};
use crate::notify::Notification;
use crate::services::{AuthService, AUTH_KEYS};
use crate::store::CacheStore;
use async_trait::async_trait;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::info;

/// Factory for session mutations.
#[derive(Clone)]
pub struct AuthMutations {
    service: AuthService,
    tokens: Arc<dyn TokenStore>,
}

impl AuthMutations {
    pub fn new(service: AuthService, tokens: Arc<dyn TokenStore>) -> Self {
        Self { service, tokens }
    }

    pub fn login(&self) -> SignInMutation<LoginCredentials> {
        SignInMutation {
            session: self.clone(),
            flow: SignInFlow::Login,
            _input: PhantomData,
        }
    }

    pub fn register(&self) -> SignInMutation<RegisterCredentials> {
        SignInMutation {
            session: self.clone(),
            flow: SignInFlow::Register,
            _input: PhantomData,
        }
    }

    pub fn verify_magic_link(&self) -> SignInMutation<String> {
        SignInMutation {
            session: self.clone(),
            flow: SignInFlow::MagicLink,
            _input: PhantomData,
        }
    }

    pub fn logout(&self) -> LogoutMutation {
        LogoutMutation {
            session: self.clone(),
        }
    }

    pub fn update_profile(&self) -> UpdateProfileMutation {
        UpdateProfileMutation {
            service: self.service.clone(),
        }
    }

    async fn persist(&self, response: AuthResponse) -> Result<Value> {
        self.tokens
            .save(&Tokens::new(
                response.access_token.clone(),
                response.refresh_token.clone(),
            ))
            .await?;
        info!("Signed in as {}", response.user.email);
        Ok(serde_json::to_value(response)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignInFlow {
    Login,
    Register,
    MagicLink,
}

impl SignInFlow {
    fn titles(self) -> (&'static str, &'static str, &'static str) {
        match self {
            SignInFlow::Login => (
                "Welcome back!",
                "You have been successfully logged in.",
                "Login failed",
            ),
            SignInFlow::Register => (
                "Account created!",
                "Your account has been successfully created.",
                "Registration failed",
            ),
            SignInFlow::MagicLink => (
                "Logged in!",
                "Magic link verified successfully.",
                "Verification failed",
            ),
        }
    }
}

/// Login, registration and magic-link verification share one shape: call the
/// endpoint, persist tokens, seed the profile.
pub struct SignInMutation<I> {
    session: AuthMutations,
    flow: SignInFlow,
    _input: PhantomData<fn() -> I>,
}

/// Input accepted by a sign-in flow.
#[async_trait]
pub trait SignInInput: Send + Sync {
    async fn sign_in(&self, service: &AuthService) -> Result<AuthResponse>;
}

#[async_trait]
impl SignInInput for LoginCredentials {
    async fn sign_in(&self, service: &AuthService) -> Result<AuthResponse> {
        service.login(self).await
    }
}

#[async_trait]
impl SignInInput for RegisterCredentials {
    async fn sign_in(&self, service: &AuthService) -> Result<AuthResponse> {
        service.register(self).await
    }
}

#[async_trait]
impl SignInInput for String {
    async fn sign_in(&self, service: &AuthService) -> Result<AuthResponse> {
        service.verify_magic_link(self).await
    }
}

#[async_trait]
impl<I: SignInInput + 'static> Mutation for SignInMutation<I> {
    type Input = I;

    fn name(&self) -> &'static str {
        match self.flow {
            SignInFlow::Login => "login",
            SignInFlow::Register => "register",
            SignInFlow::MagicLink => "verify magic link",
        }
    }

    async fn execute(&self, input: &I) -> Result<Value> {
        let response = input.sign_in(&self.session.service).await?;
        self.session.persist(response).await
    }

    fn on_success(&self, store: &CacheStore, _input: &I, server: &Value) {
        if let Some(user) = server.get("user") {
            store.set(&AUTH_KEYS.profile(), user.clone());
        }
    }

    fn invalidations(&self, _input: &I) -> Vec<Invalidation> {
        vec![AUTH_KEYS.session().into()]
    }

    fn success_notification(&self, _input: &I, _server: &Value) -> Option<Notification> {
        let (title, message, _) = self.flow.titles();
        Some(Notification::success(title, message))
    }

    fn error_notification(&self, _input: &I, error: &ResyncError) -> Option<Notification> {
        let (_, _, title) = self.flow.titles();
        Some(Notification::error(title, error.to_string()))
    }
}

/// Ends the session. Local state is cleared even when the server call fails.
pub struct LogoutMutation {
    session: AuthMutations,
}

#[async_trait]
impl Mutation for LogoutMutation {
    type Input = ();

    fn name(&self) -> &'static str {
        "logout"
    }

    async fn execute(&self, _input: &()) -> Result<Value> {
        let result = self.session.service.logout().await;
        self.session.tokens.clear().await?;
        Ok(serde_json::to_value(result?)?)
    }

    fn on_success(&self, store: &CacheStore, _input: &(), _server: &Value) {
        store.remove_prefix(&AUTH_KEYS.everything());
    }

    fn on_error(&self, store: &CacheStore, _input: &(), _error: &ResyncError) {
        store.remove_prefix(&AUTH_KEYS.everything());
    }

    fn success_notification(&self, _input: &(), _server: &Value) -> Option<Notification> {
        Some(Notification::success(
            "Logged out",
            "You have been successfully logged out.",
        ))
    }

    fn error_notification(&self, _input: &(), _error: &ResyncError) -> Option<Notification> {
        Some(Notification::warning(
            "Logged out",
            "You have been logged out locally.",
        ))
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        Some(RetryPolicy::none())
    }
}

pub struct UpdateProfileMutation {
    service: AuthService,
}

#[async_trait]
impl Mutation for UpdateProfileMutation {
    type Input = UpdateProfile;

    fn name(&self) -> &'static str {
        "update profile"
    }

    async fn execute(&self, input: &UpdateProfile) -> Result<Value> {
        Ok(serde_json::to_value(self.service.update_profile(input).await?)?)
    }

    fn on_success(&self, store: &CacheStore, _input: &UpdateProfile, server: &Value) {
        store.set(&AUTH_KEYS.profile(), server.clone());
    }

    fn success_notification(&self, _input: &UpdateProfile, _server: &Value) -> Option<Notification> {
        Some(Notification::success(
            "Profile updated",
            "Your profile has been updated successfully.",
        ))
    }

    fn error_notification(&self, _input: &UpdateProfile, error: &ResyncError) -> Option<Notification> {
        Some(Notification::error("Update failed", error.to_string()))
    }
}
