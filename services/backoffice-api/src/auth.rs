use crate::config::AuthConfig;
use crate::errors::BackofficeError;
use actix_web::{
    dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform},
    Error, FromRequest, HttpMessage, HttpRequest,
};
use futures_util::future::LocalBoxFuture;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::future::{ready, Ready};
use std::rc::Rc;

/// Roles allowed on the admin API
pub const ADMIN_ROLES: &[&str] = &["admin", "compliance"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

/// Caller identity placed in request extensions by [`JwtAuth`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub subject: String,
    pub role: String,
}

impl AuthenticatedUser {
    /// Identity used when auth is switched off
    pub fn anonymous() -> Self {
        Self {
            subject: "anonymous".to_string(),
            role: "admin".to_string(),
        }
    }

    pub fn is_admin(&self) -> bool {
        ADMIN_ROLES.contains(&self.role.as_str())
    }
}

impl From<Claims> for AuthenticatedUser {
    fn from(claims: Claims) -> Self {
        Self {
            subject: claims.sub,
            role: claims.role,
        }
    }
}

impl FromRequest for AuthenticatedUser {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<AuthenticatedUser>()
                .cloned()
                .ok_or_else(|| BackofficeError::Unauthorized.into()),
        )
    }
}

/// HS256 bearer-token middleware, optionally restricted to a set of roles
#[derive(Clone)]
pub struct JwtAuth {
    secret: String,
    enabled: bool,
    roles: Option<&'static [&'static str]>,
}

impl JwtAuth {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            secret: config.jwt_secret.clone(),
            enabled: config.enabled,
            roles: None,
        }
    }

    pub fn require_roles(mut self, roles: &'static [&'static str]) -> Self {
        self.roles = Some(roles);
        self
    }

    fn authenticate(&self, req: &ServiceRequest) -> Result<AuthenticatedUser, BackofficeError> {
        if !self.enabled {
            return Ok(AuthenticatedUser::anonymous());
        }

        let token = req
            .headers()
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(BackofficeError::Unauthorized)?;

        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|e| {
            tracing::warn!("JWT validation failed: {:?}", e);
            BackofficeError::Unauthorized
        })?
        .claims;

        if let Some(roles) = self.roles {
            if !roles.contains(&claims.role.as_str()) {
                return Err(BackofficeError::Forbidden(format!(
                    "role {} may not access this resource",
                    claims.role
                )));
            }
        }
        Ok(claims.into())
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = JwtAuthMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(JwtAuthMiddleware {
            service: Rc::new(service),
            auth: self.clone(),
        }))
    }
}

pub struct JwtAuthMiddleware<S> {
    service: Rc<S>,
    auth: JwtAuth,
}

impl<S, B> Service<ServiceRequest> for JwtAuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        match self.auth.authenticate(&req) {
            Ok(user) => {
                req.extensions_mut().insert(user);
                let fut = self.service.call(req);
                Box::pin(async move { fut.await })
            }
            Err(e) => Box::pin(async move { Err(e.into()) }),
        }
    }
}
