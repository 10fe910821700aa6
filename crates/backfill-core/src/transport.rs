//! Blocking HTTP GET used by pooled clients.
//!
//! Each pooled client owns one transport. `CurlTransport` keeps one libcurl
//! `Easy` handle so keep-alive connections through its proxy are reused
//! between pages. Run `get` from `spawn_blocking` in async code.

use std::time::Duration;

use crate::error::FetchError;
use crate::provision::ProxyEndpoint;

/// A client able to fetch one URL into memory within a deadline.
pub trait HttpGet: Send {
    fn get(&mut self, url: &str, timeout: Duration) -> Result<Vec<u8>, FetchError>;
}

/// Builds one transport per pooled client; `None` means a direct connection.
pub trait TransportFactory {
    fn build(&self, endpoint: Option<&ProxyEndpoint>) -> Result<Box<dyn HttpGet>, FetchError>;
}

/// libcurl transport routed through an optional proxy.
pub struct CurlTransport {
    easy: curl::easy::Easy,
}

impl CurlTransport {
    pub fn new(endpoint: Option<&ProxyEndpoint>, user_agent: &str) -> Result<Self, FetchError> {
        let mut easy = curl::easy::Easy::new();
        easy.useragent(user_agent)?;
        easy.follow_location(true)?;
        easy.max_redirections(10)?;
        easy.connect_timeout(Duration::from_secs(15))?;
        match endpoint {
            Some(ep) => {
                easy.proxy(&ep.proxy_url())?;
                if !ep.user.is_empty() {
                    easy.proxy_username(&ep.user)?;
                    easy.proxy_password(&ep.password)?;
                }
            }
            // Empty string disables proxies from the environment too.
            None => easy.proxy("")?,
        }
        Ok(Self { easy })
    }
}

/// curl takes whole milliseconds and reads 0 as "no timeout".
const MIN_TIMEOUT: Duration = Duration::from_millis(1);

impl HttpGet for CurlTransport {
    fn get(&mut self, url: &str, timeout: Duration) -> Result<Vec<u8>, FetchError> {
        let mut body = Vec::new();
        self.easy.url(url)?;
        self.easy.get(true)?;
        self.easy.timeout(timeout.max(MIN_TIMEOUT))?;
        {
            let mut transfer = self.easy.transfer();
            transfer.write_function(|data| {
                body.extend_from_slice(data);
                Ok(data.len())
            })?;
            transfer.perform()?;
        }

        let code = self.easy.response_code()?;
        if !(200..300).contains(&code) {
            return Err(FetchError::Http(code));
        }
        Ok(body)
    }
}

/// Factory for `CurlTransport` with a fixed user agent.
#[derive(Debug, Clone)]
pub struct CurlFactory {
    user_agent: String,
}

impl CurlFactory {
    pub fn new(user_agent: &str) -> Self {
        Self {
            user_agent: user_agent.to_string(),
        }
    }
}

impl TransportFactory for CurlFactory {
    fn build(&self, endpoint: Option<&ProxyEndpoint>) -> Result<Box<dyn HttpGet>, FetchError> {
        Ok(Box::new(CurlTransport::new(endpoint, &self.user_agent)?))
    }
}
