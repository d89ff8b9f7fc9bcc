//! Applies an adapter's [`AuthPolicy`] to outbound requests.

use portico_core::{ApiKeyLocation, AuthPolicy};
use reqwest::header::{AUTHORIZATION, COOKIE};
use reqwest::RequestBuilder;

/// Extension for attaching adapter credentials to a request.
pub trait ApplyAuth {
    /// Returns the request with the policy's credentials attached.
    fn with_auth(self, policy: &AuthPolicy) -> Self;
}

impl ApplyAuth for RequestBuilder {
    fn with_auth(self, policy: &AuthPolicy) -> Self {
        match policy {
            AuthPolicy::None => self,
            AuthPolicy::Bearer { token } => self.header(AUTHORIZATION, format!("Bearer {token}")),
            AuthPolicy::Basic { username, password } => self.basic_auth(username, Some(password)),
            AuthPolicy::ApiKey {
                key,
                location,
                name,
            } => match location {
                ApiKeyLocation::Header => self.header(name.as_str(), key.as_str()),
                ApiKeyLocation::Query => self.query(&[(name.as_str(), key.as_str())]),
                ApiKeyLocation::Cookie => self.header(COOKIE, format!("{name}={key}")),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(policy: &AuthPolicy) -> reqwest::Request {
        reqwest::Client::new()
            .post("http://127.0.0.1:9/mcp")
            .with_auth(policy)
            .build()
            .unwrap()
    }

    #[test]
    fn test_none_adds_nothing() {
        let req = build(&AuthPolicy::None);
        assert!(req.headers().get(AUTHORIZATION).is_none());
        assert!(req.url().query().is_none());
    }

    #[test]
    fn test_bearer_header() {
        let req = build(&AuthPolicy::Bearer { token: "abc".into() });
        assert_eq!(req.headers()[AUTHORIZATION], "Bearer abc");
    }

    #[test]
    fn test_basic_header() {
        let req = build(&AuthPolicy::Basic {
            username: "user".into(),
            password: "pass".into(),
        });
        // base64("user:pass")
        assert_eq!(req.headers()[AUTHORIZATION], "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn test_api_key_locations() {
        let header = build(&AuthPolicy::ApiKey {
            key: "k".into(),
            location: ApiKeyLocation::Header,
            name: "X-Api-Key".into(),
        });
        assert_eq!(header.headers()["x-api-key"], "k");

        let query = build(&AuthPolicy::ApiKey {
            key: "k".into(),
            location: ApiKeyLocation::Query,
            name: "api_key".into(),
        });
        assert_eq!(query.url().query(), Some("api_key=k"));

        let cookie = build(&AuthPolicy::ApiKey {
            key: "k".into(),
            location: ApiKeyLocation::Cookie,
            name: "session".into(),
        });
        assert_eq!(cookie.headers()[COOKIE], "session=k");
    }
}
