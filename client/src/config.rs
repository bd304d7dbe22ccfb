use anyhow::{Context, Error};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;

/// Credentials represents the key pair used to access a bucket.
#[derive(PartialEq, Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// Access key ID
    pub access_key_id: String,

    /// Secret access key
    pub secret_access_key: String,
}

impl Credentials {
    /// Create a new Credentials object from an access key ID and secret
    ///
    /// Examples:
    ///
    /// ```
    /// # use objstream::Credentials;
    /// let _ = Credentials::new("my_key_id", "my_secret");
    /// ```
    pub fn new<S1: Into<String>, S2: Into<String>>(access_key_id: S1, secret: S2) -> Credentials {
        Credentials {
            access_key_id: access_key_id.into(),
            secret_access_key: secret.into(),
        }
    }

    /// Create a new Credentials object from environment variables:
    ///
    /// * `OBJSTREAM_ACCESS_KEY_ID`
    /// * `OBJSTREAM_SECRET_ACCESS_KEY`
    pub fn from_env() -> Result<Credentials, Error> {
        let access_key_id = env::var("OBJSTREAM_ACCESS_KEY_ID").context("OBJSTREAM_ACCESS_KEY_ID")?;
        let secret_access_key =
            env::var("OBJSTREAM_SECRET_ACCESS_KEY").context("OBJSTREAM_SECRET_ACCESS_KEY")?;
        Ok(Credentials {
            access_key_id,
            secret_access_key,
        })
    }
}

// the secret must never end up in logs
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// The identity of a bucket: its name, its region, and the credentials used to reach it.  A
/// BucketConfig is fixed once a downloader or uploader has been built from it.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct BucketConfig {
    pub bucket: String,
    pub region: String,
    pub credentials: Credentials,
}

impl BucketConfig {
    pub fn new<S1: Into<String>, S2: Into<String>>(
        bucket: S1,
        region: S2,
        credentials: Credentials,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            region: region.into(),
            credentials,
        }
    }

    /// Create a BucketConfig from environment variables:
    ///
    /// * `OBJSTREAM_BUCKET`
    /// * `OBJSTREAM_REGION`
    /// * the credential variables read by [`Credentials::from_env`]
    pub fn from_env() -> Result<BucketConfig, Error> {
        let bucket = env::var("OBJSTREAM_BUCKET").context("OBJSTREAM_BUCKET")?;
        let region = env::var("OBJSTREAM_REGION").context("OBJSTREAM_REGION")?;
        Ok(BucketConfig {
            bucket,
            region,
            credentials: Credentials::from_env()?,
        })
    }

    /// Parse a BucketConfig from a JSON document.
    pub fn from_json(json: &str) -> Result<BucketConfig, Error> {
        serde_json::from_str(json).context("parsing bucket configuration")
    }
}
