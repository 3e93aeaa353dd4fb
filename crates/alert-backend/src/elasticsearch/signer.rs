use crate::Error;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_sigv4::http_request::{sign, SignableBody, SignableRequest, SigningSettings};
use aws_sigv4::sign::v4;
use std::time::SystemTime;

/// Service name under which Elasticsearch domains verify signatures.
pub const SERVICE_NAME: &str = "es";

/// Signer adds AWS SigV4 authentication to requests of an AWS-hosted cluster.
pub struct Signer {
    region: String,
    credentials: SharedCredentialsProvider,
}

impl Signer {
    pub fn new(region: &str, credentials: SharedCredentialsProvider) -> Self {
        Self {
            region: region.to_string(),
            credentials,
        }
    }

    /// Build a Signer which draws credentials from the default AWS
    /// provider chain (environment, profile, web identity, instance metadata).
    pub async fn from_env(region: &str) -> Result<Self, Error> {
        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;

        let credentials = sdk_config
            .credentials_provider()
            .ok_or_else(|| Error::Signing("no AWS credentials provider is available".to_string()))?;

        Ok(Self::new(region, credentials))
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Sign `request` as of `time`, adding its authorization headers.
    pub async fn sign(&self, request: &mut reqwest::Request, time: SystemTime) -> Result<(), Error> {
        let credentials = self
            .credentials
            .provide_credentials()
            .await
            .map_err(|err| Error::Signing(format!("failed to resolve AWS credentials: {err}")))?;
        let identity = credentials.into();

        let url = request.url().clone();
        if !request.headers().contains_key(reqwest::header::HOST) {
            let host = match (url.host_str(), url.port()) {
                (Some(host), Some(port)) => format!("{host}:{port}"),
                (Some(host), None) => host.to_string(),
                (None, _) => return Err(Error::Signing(format!("request URL {url} has no host"))),
            };
            let host = reqwest::header::HeaderValue::from_str(&host)
                .map_err(|err| Error::Signing(err.to_string()))?;
            request.headers_mut().insert(reqwest::header::HOST, host);
        }

        let params = v4::SigningParams::builder()
            .identity(&identity)
            .region(&self.region)
            .name(SERVICE_NAME)
            .time(time)
            .settings(SigningSettings::default())
            .build()
            .map_err(|err| Error::Signing(err.to_string()))?
            .into();

        let signed: Vec<(String, String)> = {
            let headers = request
                .headers()
                .iter()
                .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?)));
            let body = request
                .body()
                .and_then(|body| body.as_bytes())
                .unwrap_or_default();

            let signable = SignableRequest::new(
                request.method().as_str(),
                url.as_str(),
                headers,
                SignableBody::Bytes(body),
            )
            .map_err(|err| Error::Signing(err.to_string()))?;

            let (instructions, _signature) = sign(signable, &params)
                .map_err(|err| Error::Signing(err.to_string()))?
                .into_parts();

            instructions
                .headers()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect()
        };

        for (name, value) in signed {
            let name = reqwest::header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| Error::Signing(err.to_string()))?;
            let value = reqwest::header::HeaderValue::from_str(&value)
                .map_err(|err| Error::Signing(err.to_string()))?;
            request.headers_mut().insert(name, value);
        }
        Ok(())
    }
}
