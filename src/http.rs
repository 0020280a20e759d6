use std::{collections::HashMap, time::Duration};

use reqwest::{
    blocking::Client,
    header::{ACCEPT, USER_AGENT},
};
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
    Put,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Auth {
    Bearer(String),
    Basic { user: String, password: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub auth: Option<Auth>,
    pub json: Option<serde_json::Value>,
    pub form: Option<Vec<(String, String)>>,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Request {
        Request {
            method,
            url: url.into(),
            headers: Vec::new(),
            auth: None,
            json: None,
            form: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Request {
        Request::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Request {
        Request::new(Method::Post, url)
    }

    pub fn header(mut self, name: &str, value: &str) -> Request {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn bearer(mut self, token: &str) -> Request {
        self.auth = Some(Auth::Bearer(token.to_string()));
        self
    }

    pub fn basic_auth(mut self, user: &str, password: &str) -> Request {
        self.auth = Some(Auth::Basic {
            user: user.to_string(),
            password: password.to_string(),
        });
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Request {
        self.json = Some(body);
        self
    }

    pub fn form(mut self, fields: &[(&str, &str)]) -> Request {
        self.form = Some(
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    /// Header names are lowercase.
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(|s| s.as_str())
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// Turn a non 2xx response into an error that names the api.
    pub fn error_for_status(self, api: &str) -> Result<Response> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::Api {
                api: api.to_string(),
                status: self.status,
                body: self.body,
            })
        }
    }
}

/// The connectors only need to send one request at a time and look at the
/// status, headers and body of the response.
pub trait HttpClient {
    fn send(&self, request: &Request) -> Result<Response>;
}

pub struct BlockingClient {
    client: Client,
}

impl BlockingClient {
    pub fn new() -> Result<BlockingClient> {
        BlockingClient::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<BlockingClient> {
        let client = Client::builder().timeout(timeout).use_rustls_tls().build()?;
        Ok(BlockingClient { client })
    }
}

impl HttpClient for BlockingClient {
    fn send(&self, request: &Request) -> Result<Response> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Patch => reqwest::Method::PATCH,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self
            .client
            .request(method, &request.url)
            .header(USER_AGENT, concat!("wherescape/", env!("CARGO_PKG_VERSION")))
            .header(ACCEPT, "application/json");
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        builder = match &request.auth {
            Some(Auth::Bearer(token)) => builder.bearer_auth(token),
            Some(Auth::Basic { user, password }) => builder.basic_auth(user, Some(password)),
            None => builder,
        };
        if let Some(body) = &request.json {
            builder = builder.json(body);
        }
        if let Some(form) = &request.form {
            builder = builder.form(form);
        }

        let response = builder.send()?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.text()?;
        Ok(Response {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::{cell::RefCell, collections::VecDeque};

    use super::*;

    /// Returns the queued responses in order and keeps every request it got.
    #[derive(Default)]
    pub struct FakeClient {
        responses: RefCell<VecDeque<Result<Response>>>,
        pub requests: RefCell<Vec<Request>>,
    }

    impl FakeClient {
        pub fn new() -> FakeClient {
            FakeClient::default()
        }

        pub fn push_json(&self, status: u16, body: serde_json::Value) -> &Self {
            self.push_with_headers(status, body, &[])
        }

        pub fn push_with_headers(
            &self,
            status: u16,
            body: serde_json::Value,
            headers: &[(&str, &str)],
        ) -> &Self {
            self.responses.borrow_mut().push_back(Ok(Response {
                status,
                headers: headers
                    .iter()
                    .map(|(k, v)| (k.to_lowercase(), v.to_string()))
                    .collect(),
                body: body.to_string(),
            }));
            self
        }

        pub fn push_error(&self, error: Error) -> &Self {
            self.responses.borrow_mut().push_back(Err(error));
            self
        }

        pub fn urls(&self) -> Vec<String> {
            self.requests.borrow().iter().map(|r| r.url.clone()).collect()
        }
    }

    impl HttpClient for FakeClient {
        fn send(&self, request: &Request) -> Result<Response> {
            self.requests.borrow_mut().push(request.clone());
            self.responses
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(Error::Config(format!("no response queued for {}", request.url))))
        }
    }
}
