use std::{env, fs, path::PathBuf};

use jiff::Timestamp;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    http::{HttpClient, Request},
};

const SCOPES: &str = "https://www.googleapis.com/auth/spreadsheets.readonly https://www.googleapis.com/auth/drive.readonly";
const TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// The json key file of a Google service account.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    pub token_uri: Option<String>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Claims {
    pub iss: String,
    pub scope: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

/// `%APPDATA%\gspread\google-drive-client-secret.json` on Windows,
/// `~/.gspread/google-drive-client-secret.json` elsewhere.
pub fn key_path() -> Result<PathBuf> {
    if cfg!(windows) {
        let appdata = env::var("APPDATA").map_err(|_| Error::MissingEnv("APPDATA".to_string()))?;
        Ok(PathBuf::from(appdata)
            .join("gspread")
            .join("google-drive-client-secret.json"))
    } else {
        let home = env::var("HOME").map_err(|_| Error::MissingEnv("HOME".to_string()))?;
        Ok(PathBuf::from(home)
            .join(".gspread")
            .join("google-drive-client-secret.json"))
    }
}

pub fn read_service_account(path: &PathBuf) -> Result<ServiceAccountKey> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

impl ServiceAccountKey {
    fn token_uri(&self) -> &str {
        self.token_uri.as_deref().unwrap_or(TOKEN_URI)
    }

    /// Claims for a token that is valid for an hour from `now`.
    pub fn claims(&self, now: Timestamp) -> Claims {
        let iat = now.as_second();
        Claims {
            iss: self.client_email.clone(),
            scope: SCOPES.to_string(),
            aud: self.token_uri().to_string(),
            iat,
            exp: iat + 3600,
        }
    }

    /// The signed assertion to trade for an access token.
    pub fn assertion(&self, now: Timestamp) -> Result<String> {
        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())?;
        Ok(encode(&Header::new(Algorithm::RS256), &self.claims(now), &key)?)
    }

    pub fn token_request(&self, assertion: &str) -> Request {
        Request::post(self.token_uri()).form(&[("grant_type", GRANT_TYPE), ("assertion", assertion)])
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub fn access_token(client: &dyn HttpClient, key: &ServiceAccountKey) -> Result<String> {
    let assertion = key.assertion(Timestamp::now())?;
    let response = client
        .send(&key.token_request(&assertion))?
        .error_for_status("Google oauth")?;
    Ok(response.json::<TokenResponse>()?.access_token)
}
