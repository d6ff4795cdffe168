use chrono::{DateTime, Utc};

use super::{Region, MANUAL_DELETION_SUFFIX};
use crate::error::{Result, RotatorError};

const INVOKE_DOMAIN: &str = "execute-api";
const AWS_DOMAIN: &str = "amazonaws.com";

/// One regional gateway relaying requests to the site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub region: Region,
    /// Remote identifier assigned by the provisioning API
    pub remote_id: String,
    pub name: String,
    /// Host requests are sent to, e.g. `abc123.execute-api.us-east-1.amazonaws.com`
    pub invoke_host: String,
    pub created_at: DateTime<Utc>,
    pub ready: bool,
}

impl Endpoint {
    /// Build the public invoke host of an API Gateway REST API
    pub fn aws_invoke_host(remote_id: &str, region: &Region) -> String {
        format!("{}.{}.{}.{}", remote_id, INVOKE_DOMAIN, region, AWS_DOMAIN)
    }

    /// Adopt an already-provisioned gateway from its invoke host
    pub fn from_invoke_host(host: &str) -> Result<Self> {
        let host = host.trim().trim_end_matches('.').to_lowercase();
        let invalid =
            || RotatorError::InvalidConfig(format!("not an API Gateway invoke host: {}", host));

        let rest = host
            .strip_suffix(AWS_DOMAIN)
            .and_then(|r| r.strip_suffix('.'))
            .ok_or_else(invalid)?;
        let mut parts = rest.splitn(3, '.');
        let (Some(remote_id), Some(INVOKE_DOMAIN), Some(region)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        if remote_id.is_empty() || region.is_empty() || region.contains('.') {
            return Err(invalid());
        }

        Ok(Self {
            region: Region::from(region),
            remote_id: remote_id.to_string(),
            name: String::new(),
            invoke_host: host.clone(),
            created_at: Utc::now(),
            ready: true,
        })
    }

    /// Whether `id` designates this endpoint, either as remote id or invoke host
    pub fn matches_id(&self, id: &str) -> bool {
        let id = id.trim();
        let remote_id = id.split('.').next().unwrap_or(id);
        remote_id == self.remote_id
    }

    pub fn requires_manual_deletion(&self) -> bool {
        self.name.ends_with(MANUAL_DELETION_SUFFIX)
    }
}
