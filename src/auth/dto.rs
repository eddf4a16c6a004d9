use jsonwebtoken::{DecodingKey, EncodingKey};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::auth::repo::Role;

/// Token type used to distinguish access and refresh JWTs.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// JWT payload: the user's identity and role travel inside the token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    pub exp: usize,
    pub iat: usize,
    pub iss: String,
    pub aud: String,
    pub kind: TokenKind,
}

/// Holds JWT signing and verification keys with expiry policy.
#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

/// Request body for student registration.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterStudentRequest {
    pub email: String,
    pub password: String,
    pub password_confirmation: String,
    pub chosen_role: Role,
    pub chosen_department: Uuid,
    pub chosen_program: Uuid,
}

/// Request body for staff/librarian registration.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterStaffRequest {
    pub email: String,
    pub password: String,
    pub password_confirmation: String,
    pub chosen_role: Role,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyEmailRequest {
    pub email: String,
    pub verification_code: String,
}

/// Response returned after login. Tokens ride both the body and httpOnly
/// cookies.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    #[serde(rename = "accessToken")]
    pub access_token: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
    #[serde(rename = "userID")]
    pub user_id: Uuid,
    pub role: Role,
    pub msg: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshResponse {
    #[serde(rename = "newAccessToken")]
    pub new_access_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub msg: String,
}

/// Public part of the user returned to clients.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub role: Role,
    pub department_id: Option<Uuid>,
    pub program_id: Option<Uuid>,
}

impl From<crate::auth::repo::User> for PublicUser {
    fn from(user: crate::auth::repo::User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            username: user.username,
            role: user.role,
            department_id: user.department_id,
            program_id: user.program_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_response_uses_the_wire_field_names() {
        let response = LoginResponse {
            access_token: "a".into(),
            refresh_token: "r".into(),
            user_id: Uuid::new_v4(),
            role: Role::Student,
            msg: "User logged in successfully".into(),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"accessToken\""));
        assert!(json.contains("\"refreshToken\""));
        assert!(json.contains("\"userID\""));
        assert!(json.contains("\"student\""));
    }

    #[test]
    fn register_request_accepts_camel_case() {
        let raw = r#"{
            "email": "maria.santos@university.edu",
            "password": "secret-password",
            "passwordConfirmation": "secret-password",
            "chosenRole": "student",
            "chosenDepartment": "7f2c2e4e-9a5d-4f2a-b6a6-0a4f6e2d1c3b",
            "chosenProgram": "2d1c3b7f-2c2e-4e9a-5d4f-2ab6a60a4f6e"
        }"#;
        let parsed: RegisterStudentRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.chosen_role, Role::Student);
    }

    #[test]
    fn refresh_response_field_name() {
        let json =
            serde_json::to_string(&RefreshResponse { new_access_token: "t".into() }).unwrap();
        assert_eq!(json, r#"{"newAccessToken":"t"}"#);
    }
}
