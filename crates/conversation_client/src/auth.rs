use std::sync::{Arc, PoisonError, RwLock};

/// Bearer credential of the signed-in user, shared between the session and
/// the HTTP store.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    token: Arc<RwLock<Option<String>>>,
}

impl Credentials {
    pub fn new(access_token: Option<String>) -> Self {
        Self {
            token: Arc::new(RwLock::new(normalize(access_token))),
        }
    }

    pub fn sign_in(&self, access_token: impl Into<String>) {
        let mut token = self.token.write().unwrap_or_else(PoisonError::into_inner);
        *token = normalize(Some(access_token.into()));
    }

    pub fn sign_out(&self) {
        let mut token = self.token.write().unwrap_or_else(PoisonError::into_inner);
        *token = None;
    }

    pub fn access_token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token().is_some()
    }
}

fn normalize(token: Option<String>) -> Option<String> {
    token
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
