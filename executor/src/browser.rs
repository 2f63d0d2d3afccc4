use async_trait::async_trait;
use thiserror::Error;

use quarry_logger::debug;
use quarry_types::ProxySpec;

/// Browser/driver instantiation failed; the run crashes before the script
/// starts.
#[derive(Error, Debug)]
#[error("browser driver failure: {0}")]
pub struct BrowserError(pub String);

/// Live browser handle passed into the script context.
///
/// The automation runtime is an external collaborator; this handle carries
/// the endpoint and whether we own the browser (launched) or merely
/// connected to a shared one.
#[derive(Debug)]
pub struct BrowserSession {
    ws_endpoint: Option<String>,
    connected: bool,
}

impl BrowserSession {
    pub fn ws_endpoint(&self) -> Option<&str> {
        self.ws_endpoint.as_deref()
    }

    /// Whether the session attached to a shared browser instead of
    /// launching its own.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Disconnects from a shared browser, or closes an owned one.
    pub async fn close(self) {
        if self.connected {
            debug!("disconnecting from shared browser");
        } else {
            debug!("closing launched browser");
        }
    }
}

/// Instantiates browser sessions for the harness.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Attaches to an already-running browser at `ws_endpoint`.
    async fn connect(
        &self,
        ws_endpoint: &str,
        proxy: Option<&ProxySpec>,
    ) -> Result<BrowserSession, BrowserError>;

    /// Launches a browser owned by this run, configuring the proxy via
    /// launch arguments and registering credentials when present.
    async fn launch(&self, proxy: Option<&ProxySpec>) -> Result<BrowserSession, BrowserError>;
}

/// Driver used when no automation runtime is wired in: sessions only carry
/// the endpoint.
pub struct NullDriver;

#[async_trait]
impl BrowserDriver for NullDriver {
    async fn connect(
        &self,
        ws_endpoint: &str,
        _proxy: Option<&ProxySpec>,
    ) -> Result<BrowserSession, BrowserError> {
        Ok(BrowserSession {
            ws_endpoint: Some(ws_endpoint.to_owned()),
            connected: true,
        })
    }

    async fn launch(&self, proxy: Option<&ProxySpec>) -> Result<BrowserSession, BrowserError> {
        if let Some(proxy) = proxy {
            debug!("launching with proxy {}", proxy.server);
        }
        Ok(BrowserSession {
            ws_endpoint: None,
            connected: false,
        })
    }
}
